use crate::assets::cache::CacheShared;
use crate::assets::{Asset, CacheKey};
use crate::error::{EngineError, Result};
use crate::identity::InstanceIdentity;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// One claim on a cached resource.
///
/// Created only by the asset manager. Every live handle holds exactly one
/// reference count on its entry: `try_clone` adds one, dropping (or passing
/// the handle to `AssetManager::unload`) removes it. All copies of a handle
/// share the entry's instance identity.
///
/// `Clone` is not implemented because copying can fail once the entry is
/// gone; use [`AssetRef::try_clone`].
pub struct AssetRef<T: Asset> {
    /// `None` once the claim has been handed back
    cache: Option<Weak<CacheShared>>,
    key: CacheKey,
    instance: InstanceIdentity,
    _marker: PhantomData<T>,
}

impl<T: Asset> AssetRef<T> {
    pub(crate) fn new(cache: Weak<CacheShared>, key: CacheKey, instance: InstanceIdentity) -> Self {
        Self {
            cache: Some(cache),
            key,
            instance,
            _marker: PhantomData,
        }
    }

    pub fn instance(&self) -> InstanceIdentity {
        self.instance
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// Copy the handle, adding a claim on the same entry.
    ///
    /// Fails with `NotFound` if the entry is gone.
    pub fn try_clone(&self) -> Result<Self> {
        let cache = self.upgrade("AssetRef::try_clone")?;
        cache.acquire::<T>(self.key, self.instance, "AssetRef::try_clone")?;
        Ok(Self::new(Rc::downgrade(&cache), self.key, self.instance))
    }

    /// Make this handle a copy of `source`.
    ///
    /// The new claim is taken before the old one is released, so a failure
    /// leaves `self` untouched.
    pub fn assign_from(&mut self, source: &AssetRef<T>) -> Result<()> {
        let copy = source.try_clone()?;
        // Dropping the previous handle releases its claim
        drop(std::mem::replace(self, copy));
        Ok(())
    }

    /// Soft query; a stale handle reports `false`
    pub fn is_loaded(&self) -> bool {
        match self.cache.as_ref().and_then(Weak::upgrade) {
            Some(cache) => cache.is_loaded::<T>(self.key, self.instance),
            None => false,
        }
    }

    pub(crate) fn belongs_to(&self, cache: &Rc<CacheShared>) -> bool {
        self.cache
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Rc::as_ptr(cache)))
    }

    /// Give up the claim without touching the cache
    pub(crate) fn disarm(mut self) -> (CacheKey, InstanceIdentity) {
        self.cache = None;
        (self.key, self.instance)
    }

    fn upgrade(&self, op: &'static str) -> Result<Rc<CacheShared>> {
        self.cache
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| EngineError::NotFound(format!("{op}: asset manager is gone")))
    }
}

impl<T: Asset> Drop for AssetRef<T> {
    fn drop(&mut self) {
        let Some(cache) = self.cache.take().and_then(|weak| weak.upgrade()) else {
            return;
        };

        // An explicit unload_all may already have removed the entry
        if let Err(err) = cache.release::<T>(self.key, self.instance, "AssetRef::drop") {
            tracing::trace!(%err, instance = %self.instance, "handle outlived its entry");
        }
    }
}

impl<T: Asset> PartialEq for AssetRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.instance == other.instance
    }
}

impl<T: Asset> Eq for AssetRef<T> {}

impl<T: Asset> fmt::Debug for AssetRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRef")
            .field("type", &std::any::type_name::<T>())
            .field("instance", &self.instance.to_string())
            .finish()
    }
}
