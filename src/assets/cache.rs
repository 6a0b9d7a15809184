use crate::assets::{Asset, AssetRef, FileReader, LoadContext};
use crate::error::{EngineError, Result};
use crate::identity::{IdentityRegistry, InstanceIdentity, TypeIdentity};
use crate::memory::{AllocationTag, Memory};
use ahash::AHashMap;
use slotmap::{new_key_type, SlotMap};
use std::cell::RefCell;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::rc::Rc;

new_key_type! {
    /// Generational slot of a cache entry
    pub struct CacheKey;
}

/// Owner tag on every cached resource block
pub(crate) const CACHE_OWNER: &str = "AssetManager::load";

/// Type-correct teardown of a cached resource
type ReleaseFn = unsafe fn(&Memory, NonNull<u8>) -> Result<()>;

/// # Safety
///
/// `ptr` must come from `alloc_typed_owned::<T>` with [`CACHE_OWNER`].
unsafe fn release_asset<T: Asset>(memory: &Memory, ptr: NonNull<u8>) -> Result<()> {
    let asset = ptr.cast::<T>();
    let live = memory
        .record(asset.as_ptr().cast_const())
        .is_some_and(|record| record.owner() == Some(CACHE_OWNER));
    if !live {
        return Err(EngineError::UntrackedPointer {
            op: "AssetManager::release",
            address: asset.as_ptr() as usize,
        });
    }

    (*asset.as_ptr()).unload();
    memory.dealloc_typed_owned::<T>(asset.as_ptr(), CACHE_OWNER)
}

/// Entry in the asset cache
struct CacheEntry {
    path: String,
    instance: InstanceIdentity,
    type_uuid: TypeIdentity,
    type_name: &'static str,
    resource: NonNull<u8>,
    ref_count: usize,
    release: ReleaseFn,
}

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub unloads: u64,
}

#[derive(Default)]
struct CacheSlots {
    entries: SlotMap<CacheKey, CacheEntry>,
    paths: AHashMap<String, CacheKey>,
    stats: CacheStats,
}

impl CacheSlots {
    fn resolve_mut(
        &mut self,
        key: CacheKey,
        instance: InstanceIdentity,
        op: &'static str,
    ) -> Result<&mut CacheEntry> {
        self.entries
            .get_mut(key)
            .filter(|entry| entry.instance == instance)
            .ok_or_else(|| EngineError::NotFound(format!("{op}: no cache entry for {instance}")))
    }
}

fn check_type<T: Asset>(entry: &CacheEntry, requested: TypeIdentity, context: String) -> Result<()> {
    if entry.type_uuid == requested {
        Ok(())
    } else {
        Err(EngineError::TypeConflict {
            context,
            stored: entry.type_name,
            requested: std::any::type_name::<T>(),
        })
    }
}

/// State shared between the asset manager and its handles.
///
/// Handles keep a `Weak` to this; the manager holds the only strong
/// reference. The slot table is never borrowed while `Asset::load`,
/// `Asset::unload` or a resource drop runs.
pub(crate) struct CacheShared {
    slots: RefCell<CacheSlots>,
    memory: Rc<Memory>,
    identities: Rc<IdentityRegistry>,
    reader: Box<dyn FileReader>,
    asset_root: PathBuf,
}

impl CacheShared {
    pub(crate) fn new(
        memory: Rc<Memory>,
        identities: Rc<IdentityRegistry>,
        reader: Box<dyn FileReader>,
        asset_root: PathBuf,
    ) -> Self {
        Self {
            slots: RefCell::new(CacheSlots::default()),
            memory,
            identities,
            reader,
            asset_root,
        }
    }

    pub(crate) fn memory(&self) -> &Rc<Memory> {
        &self.memory
    }

    pub(crate) fn load<T: Asset>(self: &Rc<Self>, path: &str) -> Result<AssetRef<T>> {
        let requested = self.identities.identity_of::<T>();

        {
            let mut guard = self.slots.borrow_mut();
            let slots = &mut *guard;
            if let Some(&key) = slots.paths.get(path) {
                let entry = slots.entries.get_mut(key).ok_or_else(|| {
                    EngineError::NotFound(format!("AssetManager::load: stale slot for '{path}'"))
                })?;
                check_type::<T>(
                    entry,
                    requested,
                    format!("AssetManager::load: '{path}' already loaded with a different type"),
                )?;
                entry.ref_count += 1;
                slots.stats.hits += 1;
                tracing::trace!(path, ref_count = entry.ref_count, "asset cache hit");
                return Ok(AssetRef::new(Rc::downgrade(self), key, entry.instance));
            }
            slots.stats.misses += 1;
        }

        let resource = self
            .memory
            .alloc_typed_owned(AllocationTag::Asset, T::default(), CACHE_OWNER)
            .map_err(|err| {
                self.slots.borrow_mut().stats.load_failures += 1;
                EngineError::LoadFailure {
                    path: path.to_string(),
                    reason: err.to_string(),
                }
            })?;
        let mut ctx = LoadContext::new(
            path,
            self.asset_root.join(path),
            self.reader.as_ref(),
            &self.memory,
        );
        let outcome = unsafe { (*resource.as_ptr()).load(&mut ctx) };

        if let Err(err) = outcome {
            self.memory
                .dealloc_typed_owned(resource.as_ptr(), CACHE_OWNER)?;
            self.slots.borrow_mut().stats.load_failures += 1;
            tracing::debug!(path, %err, "asset load failed");
            return Err(match err {
                EngineError::LoadFailure { .. } => err,
                other => EngineError::LoadFailure {
                    path: path.to_string(),
                    reason: other.to_string(),
                },
            });
        }

        // Asset::load may have loaded this same path through the manager
        if self.slots.borrow().paths.contains_key(path) {
            unsafe { release_asset::<T>(&self.memory, resource.cast())? };
            self.slots.borrow_mut().stats.load_failures += 1;
            return Err(EngineError::LoadFailure {
                path: path.to_string(),
                reason: "path was loaded again while its own load was running".to_string(),
            });
        }

        let instance = self.identities.new_instance();
        let mut slots = self.slots.borrow_mut();
        let key = slots.entries.insert(CacheEntry {
            path: path.to_string(),
            instance,
            type_uuid: requested,
            type_name: std::any::type_name::<T>(),
            resource: resource.cast(),
            ref_count: 1,
            release: release_asset::<T>,
        });
        slots.paths.insert(path.to_string(), key);
        slots.stats.loads += 1;
        tracing::debug!(path, instance = %instance, "asset loaded");

        Ok(AssetRef::new(Rc::downgrade(self), key, instance))
    }

    /// Add one claim to an entry (handle copy)
    pub(crate) fn acquire<T: Asset>(
        &self,
        key: CacheKey,
        instance: InstanceIdentity,
        op: &'static str,
    ) -> Result<()> {
        let requested = self.identities.identity_of::<T>();
        let mut slots = self.slots.borrow_mut();
        let entry = slots.resolve_mut(key, instance, op)?;
        check_type::<T>(entry, requested, op.to_string())?;
        entry.ref_count += 1;
        Ok(())
    }

    /// Drop one claim; the last claim unloads and frees the resource
    pub(crate) fn release<T: Asset>(
        &self,
        key: CacheKey,
        instance: InstanceIdentity,
        op: &'static str,
    ) -> Result<()> {
        let requested = self.identities.identity_of::<T>();
        let removed = {
            let mut guard = self.slots.borrow_mut();
            let slots = &mut *guard;
            let entry = slots.resolve_mut(key, instance, op)?;
            check_type::<T>(entry, requested, op.to_string())?;
            if entry.ref_count > 1 {
                entry.ref_count -= 1;
                return Ok(());
            }

            let entry = slots
                .entries
                .remove(key)
                .ok_or_else(|| EngineError::NotFound(format!("{op}: entry vanished")))?;
            slots.paths.remove(&entry.path);
            slots.stats.unloads += 1;
            entry
        };

        tracing::debug!(path = %removed.path, "asset unloaded");
        unsafe { (removed.release)(&self.memory, removed.resource) }
    }

    pub(crate) fn resolve<T: Asset>(
        &self,
        key: CacheKey,
        instance: InstanceIdentity,
        op: &'static str,
    ) -> Result<NonNull<T>> {
        let requested = self.identities.identity_of::<T>();
        let mut slots = self.slots.borrow_mut();
        let entry = slots.resolve_mut(key, instance, op)?;
        check_type::<T>(entry, requested, op.to_string())?;
        Ok(entry.resource.cast())
    }

    pub(crate) fn is_loaded<T: Asset>(&self, key: CacheKey, instance: InstanceIdentity) -> bool {
        match self.resolve::<T>(key, instance, "AssetManager::is_loaded") {
            Ok(resource) => unsafe { resource.as_ref().is_loaded() },
            Err(_) => false,
        }
    }

    /// Unload every entry regardless of refcount. Returns the number removed.
    pub(crate) fn unload_all(&self) -> usize {
        let drained: Vec<CacheEntry> = {
            let mut slots = self.slots.borrow_mut();
            slots.paths.clear();
            let drained: Vec<_> = slots.entries.drain().map(|(_, entry)| entry).collect();
            slots.stats.unloads += drained.len() as u64;
            drained
        };

        let count = drained.len();
        for entry in drained {
            if let Err(err) = unsafe { (entry.release)(&self.memory, entry.resource) } {
                tracing::error!(path = %entry.path, %err, "failed to release asset during unload_all");
            }
        }
        count
    }

    pub(crate) fn ref_count(&self, path: &str) -> Option<usize> {
        let slots = self.slots.borrow();
        let key = slots.paths.get(path)?;
        slots.entries.get(*key).map(|entry| entry.ref_count)
    }

    pub(crate) fn instance_of(&self, path: &str) -> Option<InstanceIdentity> {
        let slots = self.slots.borrow();
        let key = slots.paths.get(path)?;
        slots.entries.get(*key).map(|entry| entry.instance)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.borrow().entries.len()
    }

    pub(crate) fn loaded_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.slots.borrow().paths.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.slots.borrow().stats.clone()
    }
}
