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

//! Error types

use std::fmt;

/// Engine error type shared by the allocator and the asset cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A zero-byte allocation was requested
    ZeroSize { op: &'static str },

    /// The system allocator could not satisfy the request
    OutOfMemory { op: &'static str, size: usize },

    /// `AllocationTag::Max` (or another non-allocating tag) was passed
    InvalidTag { op: &'static str },

    /// A null pointer was handed to a release call
    NullPointer { op: &'static str },

    /// No live record for the pointer (double free or foreign pointer)
    UntrackedPointer { op: &'static str, address: usize },

    /// Size passed to a release call differs from the recorded size
    SizeMismatch {
        op: &'static str,
        expected: usize,
        given: usize,
    },

    /// Release call does not match the allocation category
    WrongCategory {
        op: &'static str,
        allocated_as: &'static str,
    },

    /// Stored type identity differs from the requested one
    TypeConflict {
        context: String,
        stored: &'static str,
        requested: &'static str,
    },

    /// Cache lookup resolved to no entry
    NotFound(String),

    /// The resource's own load reported failure
    LoadFailure { path: String, reason: String },

    /// IO error (file operations, etc.)
    Io(String),

    /// Configuration could not be parsed
    Config(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ZeroSize { op } => write!(f, "{op}: trying to allocate 0 bytes"),
            EngineError::OutOfMemory { op, size } => {
                write!(f, "{op}: failed to allocate {size} bytes")
            }
            EngineError::InvalidTag { op } => {
                write!(f, "{op}: allocation tag is not a valid category")
            }
            EngineError::NullPointer { op } => write!(f, "{op}: null pointer"),
            EngineError::UntrackedPointer { op, address } => write!(
                f,
                "{op}: untracked pointer {address:#x} (double free or foreign pointer)"
            ),
            EngineError::SizeMismatch { op, expected, given } => write!(
                f,
                "{op}: size mismatch, allocated with {expected} bytes but released with {given}"
            ),
            EngineError::WrongCategory { op, allocated_as } => {
                write!(f, "{op}: pointer was allocated by {allocated_as}")
            }
            EngineError::TypeConflict {
                context,
                stored,
                requested,
            } => write!(
                f,
                "{context}: type conflict, stored as {stored} but requested as {requested}"
            ),
            EngineError::NotFound(msg) => write!(f, "Not found: {msg}"),
            EngineError::LoadFailure { path, reason } => {
                write!(f, "Failed to load '{path}': {reason}")
            }
            EngineError::Io(msg) => write!(f, "IO error: {msg}"),
            EngineError::Config(msg) => write!(f, "Config error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_operation() {
        let err = EngineError::SizeMismatch {
            op: "Memory::dealloc",
            expected: 63,
            given: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("Memory::dealloc"));
        assert!(msg.contains("63"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.txt");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
