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

//! Tracked, tag-aware allocation
//!
//! Every block handed out by [`Memory`] has a live [`AllocationRecord`].
//! Typed and array blocks also point at a [`MemoryTypeDescriptor`], which is
//! how leak cleanup at teardown knows how to destroy a value it has never
//! seen the type of.

pub mod ops;
pub mod record;
pub mod tracker;

pub use record::{AllocationKind, AllocationRecord, LeakReport, MemoryStats, MemoryTypeDescriptor};
pub use tracker::Memory;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alignment used by `Memory::alloc_aligned`
pub const ALIGNMENT: usize = 16;

/// Round `size` up to the next multiple of [`ALIGNMENT`]
pub const fn aligned_size(size: usize) -> usize {
    let remainder = size % ALIGNMENT;
    if remainder == 0 {
        size
    } else {
        size + (ALIGNMENT - remainder)
    }
}

/// What the default debug-break hook does after logging a leak
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeakAction {
    /// Log at `Fatal` and continue with cleanup
    #[default]
    Log,
    /// Log, then abort the process
    Abort,
}

/// Purpose label attached to every allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocationTag {
    None = 0,
    String = 1,
    File = 2,
    Audio = 3,
    Graphics = 4,
    Font = 5,
    Scene = 6,
    Physics = 7,
    Script = 8,
    Game = 9,
    Node = 10,
    DataStructure = 11,
    Engine = 12,
    Asset = 13,
    /// Iteration bound, never valid for an allocation
    Max = 14,
}

impl AllocationTag {
    /// Every allocatable tag, in declaration order (excludes `Max`)
    pub const ALL: [AllocationTag; 14] = [
        AllocationTag::None,
        AllocationTag::String,
        AllocationTag::File,
        AllocationTag::Audio,
        AllocationTag::Graphics,
        AllocationTag::Font,
        AllocationTag::Scene,
        AllocationTag::Physics,
        AllocationTag::Script,
        AllocationTag::Game,
        AllocationTag::Node,
        AllocationTag::DataStructure,
        AllocationTag::Engine,
        AllocationTag::Asset,
    ];

    pub fn iter() -> impl Iterator<Item = AllocationTag> {
        Self::ALL.into_iter()
    }

    pub const fn is_valid(self) -> bool {
        !matches!(self, AllocationTag::Max)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            AllocationTag::None => "None",
            AllocationTag::String => "String",
            AllocationTag::File => "File",
            AllocationTag::Audio => "Audio",
            AllocationTag::Graphics => "Graphics",
            AllocationTag::Font => "Font",
            AllocationTag::Scene => "Scene",
            AllocationTag::Physics => "Physics",
            AllocationTag::Script => "Script",
            AllocationTag::Game => "Game",
            AllocationTag::Node => "Node",
            AllocationTag::DataStructure => "DataStructure",
            AllocationTag::Engine => "Engine",
            AllocationTag::Asset => "Asset",
            AllocationTag::Max => "Unknown",
        }
    }
}

impl fmt::Display for AllocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
