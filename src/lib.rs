// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tracked Assets - tag-aware memory tracking and a reference-counted asset cache
//!
//! Every engine allocation goes through [`Memory`], which records size,
//! alignment, category tag and element type, and reports anything still
//! live at shutdown. [`AssetManager`] caches resources by path in that
//! tracked memory, identifies each resource type by a random [`Uuid`] and
//! hands out [`AssetRef`] handles that drive the reference count.
//!
//! Single-threaded: the shared state uses `Rc`/`RefCell`, so none of these
//! types are `Send` or `Sync`.

pub mod assets;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod logging;
pub mod memory;
pub mod prelude;


pub use assets::{
    Asset, AssetManager, AssetRef, BinaryAsset, CacheKey, CacheStats, FileData, FileReader,
    FsReader, InMemoryReader, JsonAsset, LoadContext, TextAsset,
};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::*;
pub use identity::{IdentityRegistry, InstanceIdentity, TypeIdentity, Uuid};
pub use logging::{BufferSink, LogSeverity, LogSink, TracingSink};
pub use memory::{
    AllocationKind, AllocationRecord, AllocationTag, LeakAction, LeakReport, Memory, MemoryStats,
    MemoryTypeDescriptor,
};
