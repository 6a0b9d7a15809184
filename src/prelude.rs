//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use tracked_assets::prelude::*;
//! ```

pub use crate::assets::{Asset, AssetManager, AssetRef, LoadContext};
pub use crate::config::EngineConfig;
pub use crate::context::EngineContext;
pub use crate::error::{EngineError, Result};
pub use crate::identity::Uuid;
pub use crate::logging::{LogSeverity, LogSink};
pub use crate::memory::{AllocationTag, Memory};
