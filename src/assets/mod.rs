// Asset Cache Module
//
// Path-keyed, reference-counted cache of loaded resources:
// - Resources live in tracked memory (tag `Asset`)
// - Each concrete asset type is identified by a random type identity
// - Handles share an instance identity and drive the refcount

pub mod cache;
pub mod handle;
pub mod loader;
pub mod manager;

pub use cache::{CacheKey, CacheStats};
pub use handle::AssetRef;
pub use loader::{
    BinaryAsset, FileData, FileReader, FsReader, InMemoryReader, JsonAsset, LoadContext,
    TextAsset,
};
pub use manager::AssetManager;

use crate::error::Result;

/// Trait for resources the cache can hold.
///
/// The cache default-constructs the value in tracked memory, then calls
/// `load`. A failing `load` never produces a cache entry. The storage
/// belongs to the cache: `Memory::dealloc_typed` on it is rejected.
///
/// Implementors must not be zero-sized; loading one fails with
/// `LoadFailure` because tracked memory refuses zero-byte blocks.
pub trait Asset: Default + 'static {
    /// Populate from `ctx.path()`
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()>;

    /// Called before the storage is freed
    fn unload(&mut self);

    fn is_loaded(&self) -> bool;

    /// Get approximate memory size in bytes
    fn memory_size(&self) -> usize {
        std::mem::size_of_val(self)
    }
}
