use crate::assets::cache::CacheShared;
use crate::assets::{Asset, AssetRef, CacheStats, FileReader};
use crate::error::{EngineError, Result};
use crate::identity::{IdentityRegistry, InstanceIdentity};
use crate::memory::Memory;
use std::path::PathBuf;
use std::rc::Rc;

/// Path-keyed cache of loaded assets.
///
/// Per path: absent, then loaded with a refcount of at least one, then
/// absent again once the last handle is released. A failed load never
/// leaves an entry behind.
pub struct AssetManager {
    shared: Rc<CacheShared>,
}

impl AssetManager {
    /// Create an asset manager reading through `reader`, relative to `asset_root`
    pub fn new(
        memory: Rc<Memory>,
        identities: Rc<IdentityRegistry>,
        reader: Box<dyn FileReader>,
        asset_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            shared: Rc::new(CacheShared::new(
                memory,
                identities,
                reader,
                asset_root.into(),
            )),
        }
    }

    /// Load `path` as `T`, or take another claim on the cached entry
    pub fn load<T: Asset>(&self, path: &str) -> Result<AssetRef<T>> {
        self.shared.load::<T>(path)
    }

    /// Release `handle`'s claim; the last claim unloads the asset.
    ///
    /// A handle from another manager is rejected and then dropped normally.
    pub fn unload<T: Asset>(&self, handle: AssetRef<T>) -> Result<()> {
        const OP: &str = "AssetManager::unload";
        self.check_owner(&handle, OP)?;
        let (key, instance) = handle.disarm();
        self.shared.release::<T>(key, instance, OP)
    }

    /// Borrow the asset behind `handle`
    pub fn get<'a, T: Asset>(&'a self, handle: &'a AssetRef<T>) -> Result<&'a T> {
        const OP: &str = "AssetManager::get";
        self.check_owner(handle, OP)?;
        let resource = self.shared.resolve::<T>(handle.key(), handle.instance(), OP)?;
        // The handle's own claim keeps the entry alive for 'a; unload_all needs &mut self
        Ok(unsafe { &*resource.as_ptr() })
    }

    /// Soft query: unknown or stale handles are simply not loaded
    pub fn is_loaded<T: Asset>(&self, handle: &AssetRef<T>) -> bool {
        handle.belongs_to(&self.shared) && handle.is_loaded()
    }

    /// Another handle on the same entry, sharing its instance identity
    pub fn copy_reference<T: Asset>(&self, handle: &AssetRef<T>) -> Result<AssetRef<T>> {
        self.check_owner(handle, "AssetManager::copy_reference")?;
        handle.try_clone()
    }

    /// Unload every asset regardless of outstanding handles.
    ///
    /// Handles still alive afterwards are stale; dropping them is a no-op.
    pub fn unload_all(&mut self) -> usize {
        let count = self.shared.unload_all();
        tracing::debug!(count, "unloaded all assets");
        count
    }

    /// Current refcount for `path`, if loaded
    pub fn ref_count(&self, path: &str) -> Option<usize> {
        self.shared.ref_count(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.shared.ref_count(path).is_some()
    }

    /// Instance identity of the entry at `path`
    pub fn instance_of(&self, path: &str) -> Option<InstanceIdentity> {
        self.shared.instance_of(path)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of cached paths
    pub fn loaded_paths(&self) -> Vec<String> {
        self.shared.loaded_paths()
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.stats()
    }

    pub fn memory(&self) -> &Rc<Memory> {
        self.shared.memory()
    }

    fn check_owner<T: Asset>(&self, handle: &AssetRef<T>, op: &'static str) -> Result<()> {
        if handle.belongs_to(&self.shared) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!(
                "{op}: handle does not belong to this asset manager"
            )))
        }
    }
}

impl Drop for AssetManager {
    fn drop(&mut self) {
        let count = self.shared.unload_all();
        if count > 0 {
            tracing::debug!(count, "asset manager dropped with loaded assets");
        }
    }
}
