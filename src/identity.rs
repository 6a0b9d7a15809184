//! Random 64-bit identities for types and cache instances.
//!
//! Types are not identified through reflection. The registry draws a random
//! value the first time a type is asked about and hands the same value back
//! for the rest of its lifetime.

use ahash::AHashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::any::TypeId;
use std::cell::RefCell;
use std::fmt;

/// Lower bound of generated identities. Keeps `Uuid::NIL` out of the range.
const MIN_UUID: u64 = 1 << 62;
const MAX_UUID: u64 = 1 << 63;

/// A 64-bit identity token
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid(u64);

impl Uuid {
    /// Never produced by the registry
    pub const NIL: Uuid = Uuid(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}-{:04x}-{:08x}",
            self.0 >> 48,
            (self.0 >> 32) & 0xFFFF,
            self.0 & 0xFFFF_FFFF
        )
    }
}

/// Identity of a concrete type
pub type TypeIdentity = Uuid;

/// Identity shared by all handles to one cache entry
pub type InstanceIdentity = Uuid;

/// Generates and caches identities.
///
/// One registry is owned by the engine context and shared (via `Rc`) with the
/// allocator and the asset cache. Single-threaded by construction.
pub struct IdentityRegistry {
    rng: RefCell<ChaCha8Rng>,
    types: RefCell<AHashMap<TypeId, Uuid>>,
}

impl IdentityRegistry {
    /// Registry seeded from the thread-local entropy source
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Deterministic registry
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(seed)),
            types: RefCell::new(AHashMap::new()),
        }
    }

    /// Identity of `T`, generated on first request
    pub fn identity_of<T: ?Sized + 'static>(&self) -> TypeIdentity {
        let key = TypeId::of::<T>();
        if let Some(uuid) = self.types.borrow().get(&key) {
            return *uuid;
        }

        let uuid = self.generate();
        self.types.borrow_mut().insert(key, uuid);
        tracing::trace!(
            type_name = std::any::type_name::<T>(),
            uuid = %uuid,
            "registered type identity"
        );
        uuid
    }

    /// A fresh instance identity
    pub fn new_instance(&self) -> InstanceIdentity {
        self.generate()
    }

    /// Number of types that have been assigned an identity
    pub fn registered_types(&self) -> usize {
        self.types.borrow().len()
    }

    fn generate(&self) -> Uuid {
        Uuid(self.rng.borrow_mut().random_range(MIN_UUID..=MAX_UUID))
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}
