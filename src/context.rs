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

//! Engine context
//!
//! Owns the identity registry, the tracked allocator and the asset manager.
//! Fields drop in declaration order, so every cached asset is unloaded
//! before the allocator runs its leak check.

use crate::assets::{AssetManager, FileReader, FsReader};
use crate::config::EngineConfig;
use crate::identity::IdentityRegistry;
use crate::logging::{LogSink, TracingSink};
use crate::memory::Memory;
use std::rc::Rc;

pub struct EngineContext {
    assets: AssetManager,
    memory: Rc<Memory>,
    identities: Rc<IdentityRegistry>,
    sink: Rc<dyn LogSink>,
    config: EngineConfig,
}

impl EngineContext {
    /// Context logging through `tracing` and reading from the filesystem
    pub fn new(config: EngineConfig) -> Self {
        Self::with_io(config, Rc::new(TracingSink), Box::new(FsReader))
    }

    /// Context with a custom log sink and file reader
    pub fn with_io(
        config: EngineConfig,
        sink: Rc<dyn LogSink>,
        reader: Box<dyn FileReader>,
    ) -> Self {
        let identities = Rc::new(match config.identity_seed {
            Some(seed) => IdentityRegistry::with_seed(seed),
            None => IdentityRegistry::new(),
        });
        let memory = Rc::new(
            Memory::new(Rc::clone(&identities), Rc::clone(&sink))
                .with_leak_severity(config.leak_severity)
                .with_leak_action(config.leak_action),
        );
        let assets = AssetManager::new(
            Rc::clone(&memory),
            Rc::clone(&identities),
            reader,
            config.asset_root.clone(),
        );

        tracing::debug!(asset_root = %config.asset_root.display(), "engine context created");
        Self {
            assets,
            memory,
            identities,
            sink,
            config,
        }
    }

    pub fn identities(&self) -> &Rc<IdentityRegistry> {
        &self.identities
    }

    pub fn memory(&self) -> &Rc<Memory> {
        &self.memory
    }

    pub fn assets(&self) -> &AssetManager {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetManager {
        &mut self.assets
    }

    pub fn sink(&self) -> &Rc<dyn LogSink> {
        &self.sink
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{InMemoryReader, TextAsset};
    use crate::logging::{BufferSink, LogSeverity};
    use crate::memory::{AllocationTag, LeakAction};

    fn context(sink: Rc<BufferSink>) -> EngineContext {
        let config = EngineConfig {
            identity_seed: Some(11),
            ..Default::default()
        };
        let reader = InMemoryReader::new().with_file("readme.txt", "read me");
        EngineContext::with_io(config, sink, Box::new(reader))
    }

    #[test]
    fn test_seeded_contexts_agree_on_identities() {
        let a = context(Rc::new(BufferSink::new()));
        let b = context(Rc::new(BufferSink::new()));
        assert_eq!(
            a.identities().identity_of::<TextAsset>(),
            b.identities().identity_of::<TextAsset>()
        );
    }

    #[test]
    fn test_assets_unloaded_before_leak_check() {
        let sink = Rc::new(BufferSink::new());
        let ctx = context(sink.clone());
        let handle = ctx.assets().load::<TextAsset>("readme.txt").unwrap();
        std::mem::forget(handle);
        assert_eq!(ctx.memory().allocation_count(), 1);

        drop(ctx);
        assert!(!sink.contains("leaked"));
    }

    #[test]
    fn test_leak_reported_through_sink() {
        let sink = Rc::new(BufferSink::new());
        let ctx = context(sink.clone());
        ctx.memory().alloc(63, AllocationTag::Engine).unwrap();

        drop(ctx);
        assert!(sink.contains("63 bytes leaked in 1 allocations"));
        assert!(sink.contains("  [Engine]"));
        assert_eq!(sink.count_at(LogSeverity::Fatal), 1);
    }

    #[test]
    fn test_leak_action_reaches_allocator() {
        let config = EngineConfig {
            leak_action: LeakAction::Abort,
            ..Default::default()
        };
        let ctx = EngineContext::with_io(
            config,
            Rc::new(BufferSink::new()),
            Box::new(InMemoryReader::new()),
        );
        assert_eq!(ctx.memory().leak_action(), LeakAction::Abort);
    }

    #[test]
    fn test_unload_all_through_context() {
        let sink = Rc::new(BufferSink::new());
        let mut ctx = context(sink);
        let handle = ctx.assets().load::<TextAsset>("readme.txt").unwrap();
        assert_eq!(ctx.assets_mut().unload_all(), 1);
        assert!(!ctx.assets().is_loaded(&handle));
        drop(handle);
        assert_eq!(ctx.memory().allocation_count(), 0);
    }
}
