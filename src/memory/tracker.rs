use crate::error::{EngineError, Result};
use crate::identity::IdentityRegistry;
use crate::logging::{LogSeverity, LogSink};
use crate::memory::{
    aligned_size, AllocationKind, AllocationRecord, AllocationTag, LeakAction, LeakReport,
    MemoryStats, MemoryTypeDescriptor, ALIGNMENT,
};
use ahash::AHashMap;
use smallvec::SmallVec;
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::rc::Rc;

/// Alignment of blocks from `Memory::alloc`
const RAW_ALIGN: usize = mem::align_of::<usize>();

type DebugBreak = Box<dyn Fn(&LeakReport)>;

struct MemoryState {
    allocations: AHashMap<usize, AllocationRecord>,
    types: Vec<MemoryTypeDescriptor>,
    stats: MemoryStats,
}

impl MemoryState {
    /// Find or append the descriptor for `T`
    fn descriptor_index<T: 'static>(&mut self, identities: &IdentityRegistry, array: bool) -> usize {
        let uuid = identities.identity_of::<T>();
        if let Some(index) = self.types.iter().position(|d| d.uuid == uuid) {
            self.types[index].array |= array;
            return index;
        }

        self.types.push(MemoryTypeDescriptor::of::<T>(uuid, array));
        self.types.len() - 1
    }

    fn mark(&mut self, address: usize, record: AllocationRecord) {
        self.stats.live_bytes += record.aligned_size;
        self.stats.live_count += 1;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.live_bytes);
        self.stats.total_allocations += 1;
        self.allocations.insert(address, record);
    }

    fn unmark(&mut self, address: usize) -> Option<AllocationRecord> {
        let record = self.allocations.remove(&address)?;
        self.stats.live_bytes -= record.aligned_size;
        self.stats.live_count -= 1;
        self.stats.total_deallocations += 1;
        Some(record)
    }
}

/// The tracked allocator.
///
/// Owns the live allocation table and the append-only type descriptor
/// table. All methods take `&self`; no internal borrow is held while user
/// code runs (value drops, sinks, the debug-break hook).
///
/// The descriptor table is never evicted. It grows with the number of
/// distinct types allocated through `alloc_typed`/`alloc_array`, not with
/// allocation volume.
///
/// When blocks are still live at drop, the debug-break hook runs. The
/// default hook only logs at `Fatal`; with [`LeakAction::Abort`] it then
/// aborts the process so an attached debugger stops on the leak.
pub struct Memory {
    state: RefCell<MemoryState>,
    identities: Rc<IdentityRegistry>,
    sink: Rc<dyn LogSink>,
    leak_severity: LogSeverity,
    leak_action: LeakAction,
    debug_break: RefCell<DebugBreak>,
}

impl Memory {
    pub fn new(identities: Rc<IdentityRegistry>, sink: Rc<dyn LogSink>) -> Self {
        let debug_break = Self::default_debug_break(Rc::clone(&sink), LeakAction::Log);
        Self {
            state: RefCell::new(MemoryState {
                allocations: AHashMap::new(),
                types: Vec::new(),
                stats: MemoryStats::default(),
            }),
            identities,
            sink,
            leak_severity: LogSeverity::Error,
            leak_action: LeakAction::Log,
            debug_break: RefCell::new(debug_break),
        }
    }

    /// Severity used for the allocation dump at teardown
    pub fn with_leak_severity(mut self, severity: LogSeverity) -> Self {
        self.leak_severity = severity;
        self
    }

    /// Install the default debug-break hook for `action`
    pub fn with_leak_action(mut self, action: LeakAction) -> Self {
        self.leak_action = action;
        *self.debug_break.get_mut() = Self::default_debug_break(Rc::clone(&self.sink), action);
        self
    }

    pub fn leak_action(&self) -> LeakAction {
        self.leak_action
    }

    /// Replace the hook triggered when leaks are found at teardown
    pub fn set_debug_break(&self, hook: impl Fn(&LeakReport) + 'static) {
        *self.debug_break.borrow_mut() = Box::new(hook);
    }

    fn default_debug_break(sink: Rc<dyn LogSink>, action: LeakAction) -> DebugBreak {
        Box::new(move |report: &LeakReport| {
            sink.log(
                LogSeverity::Fatal,
                &format!(
                    "Memory: debug break, {} allocations ({} bytes) leaked",
                    report.count, report.bytes
                ),
            );
            if action == LeakAction::Abort {
                std::process::abort();
            }
        })
    }

    pub fn identities(&self) -> &Rc<IdentityRegistry> {
        &self.identities
    }

    /// Allocate `size` untyped bytes
    pub fn alloc(&self, size: usize, tag: AllocationTag) -> Result<NonNull<u8>> {
        self.alloc_raw(size, tag, None)
    }

    /// Raw block that only `owner` may release, through `dealloc_owned`
    pub(crate) fn alloc_owned(
        &self,
        size: usize,
        tag: AllocationTag,
        owner: &'static str,
    ) -> Result<NonNull<u8>> {
        self.alloc_raw(size, tag, Some(owner))
    }

    fn alloc_raw(
        &self,
        size: usize,
        tag: AllocationTag,
        owner: Option<&'static str>,
    ) -> Result<NonNull<u8>> {
        const OP: &str = "Memory::alloc";
        Self::check_request(OP, size, tag)?;

        let layout = Layout::from_size_align(size, RAW_ALIGN)
            .map_err(|_| EngineError::OutOfMemory { op: OP, size })?;
        let ptr = Self::system_alloc(OP, layout)?;

        self.state.borrow_mut().mark(
            ptr.as_ptr() as usize,
            AllocationRecord {
                size,
                aligned_size: size,
                tag,
                aligned: false,
                typed: false,
                array: false,
                type_index: None,
                layout,
                owner,
            },
        );
        Ok(ptr)
    }

    /// Release a block from `alloc`; `size` must match the request.
    ///
    /// Blocks owned by a subsystem (cached assets, file buffers) are
    /// rejected with `WrongCategory`.
    pub fn dealloc(&self, ptr: *mut u8, size: usize) -> Result<()> {
        self.dealloc_raw(ptr, size, None)
    }

    pub(crate) fn dealloc_owned(&self, ptr: *mut u8, size: usize, owner: &'static str) -> Result<()> {
        self.dealloc_raw(ptr, size, Some(owner))
    }

    fn dealloc_raw(&self, ptr: *mut u8, size: usize, owner: Option<&'static str>) -> Result<()> {
        const OP: &str = "Memory::dealloc";
        let (ptr, record) = self.take_record(OP, ptr, AllocationKind::Raw, owner, |record, _| {
            if record.size != size {
                return Err(EngineError::SizeMismatch {
                    op: OP,
                    expected: record.size,
                    given: size,
                });
            }
            Ok(())
        })?;

        unsafe { alloc::dealloc(ptr.as_ptr(), record.layout) };
        Ok(())
    }

    /// Allocate `size` bytes on a 16-byte boundary, rounded up to a multiple of 16
    pub fn alloc_aligned(&self, size: usize, tag: AllocationTag) -> Result<NonNull<u8>> {
        const OP: &str = "Memory::alloc_aligned";
        Self::check_request(OP, size, tag)?;

        let rounded = aligned_size(size);
        let layout = Layout::from_size_align(rounded, ALIGNMENT)
            .map_err(|_| EngineError::OutOfMemory { op: OP, size: rounded })?;
        let ptr = Self::system_alloc(OP, layout)?;

        self.state.borrow_mut().mark(
            ptr.as_ptr() as usize,
            AllocationRecord {
                size,
                aligned_size: rounded,
                tag,
                aligned: true,
                typed: false,
                array: false,
                type_index: None,
                layout,
                owner: None,
            },
        );
        Ok(ptr)
    }

    /// Release a block from `alloc_aligned`; `size` is the original logical size
    pub fn dealloc_aligned(&self, ptr: *mut u8, size: usize) -> Result<()> {
        const OP: &str = "Memory::dealloc_aligned";
        let (ptr, record) = self.take_record(OP, ptr, AllocationKind::Aligned, None, |record, _| {
            if record.size != size || record.aligned_size != aligned_size(size) {
                return Err(EngineError::SizeMismatch {
                    op: OP,
                    expected: record.size,
                    given: size,
                });
            }
            Ok(())
        })?;

        unsafe { alloc::dealloc(ptr.as_ptr(), record.layout) };
        Ok(())
    }

    /// Move `value` into tracked storage
    pub fn alloc_typed<T: 'static>(&self, tag: AllocationTag, value: T) -> Result<NonNull<T>> {
        self.typed_alloc(tag, value, None)
    }

    /// Typed block that only `owner` may release, through `dealloc_typed_owned`
    pub(crate) fn alloc_typed_owned<T: 'static>(
        &self,
        tag: AllocationTag,
        value: T,
        owner: &'static str,
    ) -> Result<NonNull<T>> {
        self.typed_alloc(tag, value, Some(owner))
    }

    fn typed_alloc<T: 'static>(
        &self,
        tag: AllocationTag,
        value: T,
        owner: Option<&'static str>,
    ) -> Result<NonNull<T>> {
        const OP: &str = "Memory::alloc_typed";
        let layout = Layout::new::<T>();
        Self::check_request(OP, layout.size(), tag)?;

        let ptr = Self::system_alloc(OP, layout)?.cast::<T>();
        unsafe { ptr.as_ptr().write(value) };

        let mut state = self.state.borrow_mut();
        let type_index = state.descriptor_index::<T>(&self.identities, false);
        state.mark(
            ptr.as_ptr() as usize,
            AllocationRecord {
                size: layout.size(),
                aligned_size: layout.size(),
                tag,
                aligned: false,
                typed: true,
                array: false,
                type_index: Some(type_index),
                layout,
                owner,
            },
        );
        Ok(ptr)
    }

    /// Drop the value and release a block from `alloc_typed`.
    ///
    /// Values owned by the asset cache are rejected with `WrongCategory`.
    pub fn dealloc_typed<T: 'static>(&self, ptr: *mut T) -> Result<()> {
        self.typed_dealloc(ptr, None)
    }

    pub(crate) fn dealloc_typed_owned<T: 'static>(
        &self,
        ptr: *mut T,
        owner: &'static str,
    ) -> Result<()> {
        self.typed_dealloc(ptr, Some(owner))
    }

    fn typed_dealloc<T: 'static>(&self, ptr: *mut T, owner: Option<&'static str>) -> Result<()> {
        const OP: &str = "Memory::dealloc_typed";
        let (ptr, record) =
            self.take_record(OP, ptr.cast(), AllocationKind::Typed, owner, |record, state| {
                self.check_type::<T>(OP, record, state)
            })?;

        unsafe {
            ptr::drop_in_place(ptr.as_ptr().cast::<T>());
            alloc::dealloc(ptr.as_ptr(), record.layout);
        }
        Ok(())
    }

    /// Allocate `count` default-constructed `T`s in one block
    pub fn alloc_array<T: Default + 'static>(
        &self,
        tag: AllocationTag,
        count: usize,
    ) -> Result<NonNull<T>> {
        const OP: &str = "Memory::alloc_array";
        let layout = Layout::array::<T>(count).map_err(|_| EngineError::OutOfMemory {
            op: OP,
            size: mem::size_of::<T>().saturating_mul(count),
        })?;
        Self::check_request(OP, layout.size(), tag)?;

        let ptr = Self::system_alloc(OP, layout)?.cast::<T>();
        for i in 0..count {
            unsafe { ptr.as_ptr().add(i).write(T::default()) };
        }

        let mut state = self.state.borrow_mut();
        let type_index = state.descriptor_index::<T>(&self.identities, true);
        state.mark(
            ptr.as_ptr() as usize,
            AllocationRecord {
                size: layout.size(),
                aligned_size: layout.size(),
                tag,
                aligned: false,
                typed: true,
                array: true,
                type_index: Some(type_index),
                layout,
                owner: None,
            },
        );
        Ok(ptr)
    }

    /// Drop every element and release a block from `alloc_array`
    pub fn dealloc_array<T: 'static>(&self, ptr: *mut T) -> Result<()> {
        const OP: &str = "Memory::dealloc_array";
        let (ptr, record) =
            self.take_record(OP, ptr.cast(), AllocationKind::Array, None, |record, state| {
                self.check_type::<T>(OP, record, state)
            })?;

        let count = record.size / mem::size_of::<T>();
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr.as_ptr().cast::<T>(), count));
            alloc::dealloc(ptr.as_ptr(), record.layout);
        }
        Ok(())
    }

    /// Total bytes in live blocks
    pub fn allocation_size(&self) -> usize {
        self.state.borrow().stats.live_bytes
    }

    /// Number of live blocks
    pub fn allocation_count(&self) -> usize {
        self.state.borrow().stats.live_count
    }

    pub fn stats(&self) -> MemoryStats {
        self.state.borrow().stats
    }

    /// Bytes held by live blocks carrying `tag`
    pub fn bytes_for_tag(&self, tag: AllocationTag) -> usize {
        self.state
            .borrow()
            .allocations
            .values()
            .filter(|r| r.tag == tag)
            .map(|r| r.aligned_size)
            .sum()
    }

    /// Snapshot of the record for a live pointer
    pub fn record<T>(&self, ptr: *const T) -> Option<AllocationRecord> {
        self.state.borrow().allocations.get(&(ptr as usize)).cloned()
    }

    /// Snapshot of the descriptor table
    pub fn descriptors(&self) -> Vec<MemoryTypeDescriptor> {
        self.state.borrow().types.clone()
    }

    /// Dump every live record, grouped by tag
    pub fn print_allocations(&self, sink: &dyn LogSink, severity: LogSeverity) {
        // Formatted up front so the sink runs with no borrow held
        for line in self.allocation_lines() {
            sink.log(severity, &line);
        }
    }

    fn allocation_lines(&self) -> Vec<String> {
        let state = self.state.borrow();
        let mut lines = vec![format!(
            "Memory allocations (total size {}, count {}):",
            state.stats.live_bytes, state.stats.live_count
        )];

        for tag in AllocationTag::iter() {
            let mut entries: SmallVec<[(usize, &AllocationRecord); 16]> = state
                .allocations
                .iter()
                .filter(|(_, record)| record.tag == tag)
                .map(|(address, record)| (*address, record))
                .collect();
            if entries.is_empty() {
                continue;
            }
            entries.sort_unstable_by_key(|(address, _)| *address);

            lines.push(format!("  [{tag}]"));
            for (index, (address, record)) in entries.iter().enumerate() {
                lines.push(format!("    {index}:"));
                lines.push(format!("      address: {address:#x}"));
                lines.push(format!("      size: {} bytes", record.size));
                if record.aligned {
                    lines.push(format!("      aligned: true ({} bytes)", record.aligned_size));
                } else {
                    lines.push("      aligned: false".to_string());
                }

                let descriptor = record.type_index.and_then(|i| state.types.get(i));
                match descriptor {
                    Some(descriptor) if record.typed => {
                        lines.push(format!("      typed: true ({})", descriptor.type_name));
                    }
                    _ => lines.push(format!("      typed: {}", record.typed)),
                }
                match descriptor {
                    Some(descriptor) if record.array => lines.push(format!(
                        "      array: true ({} elements)",
                        descriptor.element_count(record)
                    )),
                    _ => lines.push(format!("      array: {}", record.array)),
                }
            }
        }
        lines
    }

    fn check_request(op: &'static str, size: usize, tag: AllocationTag) -> Result<()> {
        if !tag.is_valid() {
            return Err(EngineError::InvalidTag { op });
        }
        if size == 0 {
            return Err(EngineError::ZeroSize { op });
        }
        Ok(())
    }

    fn system_alloc(op: &'static str, layout: Layout) -> Result<NonNull<u8>> {
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(EngineError::OutOfMemory {
            op,
            size: layout.size(),
        })
    }

    fn check_type<T: 'static>(
        &self,
        op: &'static str,
        record: &AllocationRecord,
        state: &MemoryState,
    ) -> Result<()> {
        let requested = self.identities.identity_of::<T>();
        let stored = record.type_index.and_then(|i| state.types.get(i));
        match stored {
            Some(descriptor) if descriptor.uuid == requested => Ok(()),
            Some(descriptor) => Err(EngineError::TypeConflict {
                context: op.to_string(),
                stored: descriptor.type_name,
                requested: std::any::type_name::<T>(),
            }),
            None => Err(EngineError::TypeConflict {
                context: op.to_string(),
                stored: "<untyped>",
                requested: std::any::type_name::<T>(),
            }),
        }
    }

    /// Validate and remove the record for `ptr`. On error the table is untouched.
    fn take_record(
        &self,
        op: &'static str,
        ptr: *mut u8,
        expected: AllocationKind,
        owner: Option<&'static str>,
        check: impl FnOnce(&AllocationRecord, &MemoryState) -> Result<()>,
    ) -> Result<(NonNull<u8>, AllocationRecord)> {
        let ptr = NonNull::new(ptr).ok_or(EngineError::NullPointer { op })?;
        let address = ptr.as_ptr() as usize;

        let mut state = self.state.borrow_mut();
        let record = state
            .allocations
            .get(&address)
            .ok_or(EngineError::UntrackedPointer { op, address })?;

        let kind = record.kind();
        // Owned blocks are only released by their owner
        if kind != expected || record.owner != owner {
            return Err(EngineError::WrongCategory {
                op,
                allocated_as: record.owner.unwrap_or(kind.origin()),
            });
        }
        check(record, &state)?;

        let record = state
            .unmark(address)
            .ok_or(EngineError::UntrackedPointer { op, address })?;
        Ok((ptr, record))
    }

    fn leak_report(&self) -> LeakReport {
        let state = self.state.borrow();
        let by_tag = AllocationTag::iter()
            .map(|tag| {
                let count = state.allocations.values().filter(|r| r.tag == tag).count();
                (tag, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();
        LeakReport {
            bytes: state.stats.live_bytes,
            count: state.stats.live_count,
            by_tag,
        }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Memory")
            .field("stats", &state.stats)
            .field("descriptors", &state.types.len())
            .finish()
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if self.state.get_mut().allocations.is_empty() {
            return;
        }

        let report = self.leak_report();
        self.sink.log(
            LogSeverity::Error,
            &format!(
                "Memory: {} bytes leaked in {} allocations",
                report.bytes, report.count
            ),
        );
        self.print_allocations(&*self.sink, self.leak_severity);
        (self.debug_break.get_mut())(&report);

        let state = self.state.get_mut();
        let types = mem::take(&mut state.types);
        let leaked: Vec<_> = state.allocations.drain().collect();
        state.stats.live_bytes = 0;
        state.stats.live_count = 0;

        for (address, record) in leaked {
            let ptr = address as *mut u8;
            let descriptor = record.type_index.and_then(|i| types.get(i));
            match (record.kind(), descriptor) {
                (AllocationKind::Typed | AllocationKind::Array, Some(descriptor)) => unsafe {
                    (descriptor.drop_elements)(ptr, descriptor.element_count(&record));
                    alloc::dealloc(ptr, record.layout);
                },
                _ => unsafe { alloc::dealloc(ptr, record.layout) },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::BufferSink;
    use std::cell::Cell;

    fn memory() -> (Memory, Rc<BufferSink>) {
        let sink = Rc::new(BufferSink::new());
        let memory = Memory::new(Rc::new(IdentityRegistry::with_seed(1)), sink.clone());
        (memory, sink)
    }

    #[derive(Default)]
    struct Counted {
        drops: Option<Rc<Cell<usize>>>,
        _payload: [u64; 4],
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            if let Some(drops) = &self.drops {
                drops.set(drops.get() + 1);
            }
        }
    }

    #[test]
    fn test_alloc_dealloc_restores_totals() {
        let (memory, _) = memory();
        let before = memory.stats();

        let ptr = memory.alloc(63, AllocationTag::Engine).unwrap();
        assert_eq!(memory.allocation_count(), 1);
        assert_eq!(memory.allocation_size(), 63);

        memory.dealloc(ptr.as_ptr(), 63).unwrap();
        assert_eq!(memory.allocation_count(), before.live_count);
        assert_eq!(memory.allocation_size(), before.live_bytes);
        assert_eq!(memory.stats().peak_bytes, 63);
    }

    #[test]
    fn test_zero_size_and_invalid_tag() {
        let (memory, _) = memory();
        assert!(matches!(
            memory.alloc(0, AllocationTag::Engine),
            Err(EngineError::ZeroSize { .. })
        ));
        assert!(matches!(
            memory.alloc(8, AllocationTag::Max),
            Err(EngineError::InvalidTag { .. })
        ));
        assert!(matches!(
            memory.alloc_array::<u32>(AllocationTag::Engine, 0),
            Err(EngineError::ZeroSize { .. })
        ));
        assert!(matches!(
            memory.alloc_typed(AllocationTag::Engine, ()),
            Err(EngineError::ZeroSize { .. })
        ));
        assert_eq!(memory.allocation_count(), 0);
    }

    #[test]
    fn test_double_free_is_untracked() {
        let (memory, _) = memory();
        let ptr = memory.alloc(16, AllocationTag::String).unwrap();
        memory.dealloc(ptr.as_ptr(), 16).unwrap();
        assert!(matches!(
            memory.dealloc(ptr.as_ptr(), 16),
            Err(EngineError::UntrackedPointer { .. })
        ));
        assert!(matches!(
            memory.dealloc(ptr::null_mut(), 16),
            Err(EngineError::NullPointer { .. })
        ));
    }

    #[test]
    fn test_size_mismatch_keeps_record() {
        let (memory, _) = memory();
        let ptr = memory.alloc(40, AllocationTag::File).unwrap();
        assert!(matches!(
            memory.dealloc(ptr.as_ptr(), 41),
            Err(EngineError::SizeMismatch { expected: 40, given: 41, .. })
        ));
        assert!(memory.record(ptr.as_ptr()).is_some());
        memory.dealloc(ptr.as_ptr(), 40).unwrap();
    }

    #[test]
    fn test_aligned_allocation() {
        let (memory, _) = memory();
        let ptr = memory.alloc_aligned(100, AllocationTag::Engine).unwrap();
        assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);

        let record = memory.record(ptr.as_ptr()).unwrap();
        assert_eq!(record.size, 100);
        assert_eq!(record.aligned_size, 112);
        assert!(record.aligned);
        assert_eq!(memory.allocation_size(), 112);

        assert!(matches!(
            memory.dealloc_aligned(ptr.as_ptr(), 99),
            Err(EngineError::SizeMismatch { .. })
        ));
        assert!(memory.record(ptr.as_ptr()).is_some());

        assert!(matches!(
            memory.dealloc(ptr.as_ptr(), 100),
            Err(EngineError::WrongCategory { .. })
        ));
        memory.dealloc_aligned(ptr.as_ptr(), 100).unwrap();
        assert_eq!(memory.allocation_count(), 0);
    }

    #[test]
    fn test_dealloc_aligned_on_raw_is_wrong_category() {
        let (memory, _) = memory();
        let ptr = memory.alloc(32, AllocationTag::Engine).unwrap();
        assert!(matches!(
            memory.dealloc_aligned(ptr.as_ptr(), 32),
            Err(EngineError::WrongCategory { allocated_as: "Memory::alloc", .. })
        ));
        memory.dealloc(ptr.as_ptr(), 32).unwrap();
    }

    #[test]
    fn test_typed_roundtrip_runs_drop() {
        let (memory, _) = memory();
        let drops = Rc::new(Cell::new(0));
        let value = Counted {
            drops: Some(drops.clone()),
            ..Default::default()
        };

        let ptr = memory.alloc_typed(AllocationTag::Game, value).unwrap();
        let record = memory.record(ptr.as_ptr()).unwrap();
        assert!(record.typed && !record.array);
        assert_eq!(record.size, mem::size_of::<Counted>());

        memory.dealloc_typed(ptr.as_ptr()).unwrap();
        assert_eq!(drops.get(), 1);
        assert_eq!(memory.allocation_count(), 0);
    }

    #[test]
    fn test_typed_mismatch_detected() {
        let (memory, _) = memory();
        let ptr = memory.alloc_typed(AllocationTag::Game, 7u64).unwrap();

        let err = memory.dealloc_typed(ptr.as_ptr().cast::<i64>()).unwrap_err();
        assert!(matches!(err, EngineError::TypeConflict { stored: "u64", .. }));
        assert!(matches!(
            memory.dealloc_array(ptr.as_ptr()),
            Err(EngineError::WrongCategory { .. })
        ));
        assert!(matches!(
            memory.dealloc(ptr.as_ptr().cast(), 8),
            Err(EngineError::WrongCategory { .. })
        ));

        memory.dealloc_typed(ptr.as_ptr()).unwrap();
    }

    #[test]
    fn test_typed_on_raw_is_wrong_category() {
        let (memory, _) = memory();
        let ptr = memory.alloc(8, AllocationTag::Engine).unwrap();
        assert!(matches!(
            memory.dealloc_typed(ptr.as_ptr().cast::<u64>()),
            Err(EngineError::WrongCategory { .. })
        ));
        memory.dealloc(ptr.as_ptr(), 8).unwrap();
    }

    #[test]
    fn test_array_roundtrip() {
        let (memory, _) = memory();
        let ptr = memory.alloc_array::<u32>(AllocationTag::DataStructure, 10).unwrap();
        unsafe {
            assert_eq!(*ptr.as_ptr().add(9), 0);
            *ptr.as_ptr().add(3) = 42;
        }

        let record = memory.record(ptr.as_ptr()).unwrap();
        assert!(record.typed && record.array);
        assert_eq!(record.size, 40);

        assert!(matches!(
            memory.dealloc_typed(ptr.as_ptr()),
            Err(EngineError::WrongCategory { .. })
        ));
        memory.dealloc_array(ptr.as_ptr()).unwrap();
        assert_eq!(memory.allocation_count(), 0);
    }

    #[test]
    fn test_descriptors_are_deduplicated() {
        let (memory, _) = memory();
        let a = memory.alloc_typed(AllocationTag::Engine, 1u32).unwrap();
        let b = memory.alloc_typed(AllocationTag::Engine, 2u32).unwrap();
        let c = memory.alloc_array::<u32>(AllocationTag::Engine, 4).unwrap();
        let d = memory.alloc_typed(AllocationTag::Engine, 3u16).unwrap();

        let descriptors = memory.descriptors();
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors[0].array);
        assert!(!descriptors[1].array);
        assert_eq!(
            memory.record(a.as_ptr()).unwrap().type_index,
            memory.record(c.as_ptr()).unwrap().type_index
        );

        memory.dealloc_typed(a.as_ptr()).unwrap();
        memory.dealloc_typed(b.as_ptr()).unwrap();
        memory.dealloc_array(c.as_ptr()).unwrap();
        memory.dealloc_typed(d.as_ptr()).unwrap();
        assert_eq!(memory.descriptors().len(), 2);
    }

    #[test]
    fn test_print_allocations_groups_by_tag() {
        let (memory, sink) = memory();
        let ptr = memory.alloc(63, AllocationTag::Engine).unwrap();
        let aligned = memory.alloc_aligned(20, AllocationTag::Audio).unwrap();

        memory.print_allocations(&*sink, LogSeverity::Info);
        let messages = sink.messages();
        assert_eq!(
            messages[0],
            "Memory allocations (total size 95, count 2):"
        );
        let audio = messages.iter().position(|m| m == "  [Audio]").unwrap();
        let engine = messages.iter().position(|m| m == "  [Engine]").unwrap();
        assert!(audio < engine);
        assert!(messages.contains(&"      size: 63 bytes".to_string()));
        assert!(messages.contains(&"      aligned: true (32 bytes)".to_string()));
        assert_eq!(sink.count_at(LogSeverity::Info), messages.len());

        memory.dealloc(ptr.as_ptr(), 63).unwrap();
        memory.dealloc_aligned(aligned.as_ptr(), 20).unwrap();
    }

    #[test]
    fn test_bytes_for_tag() {
        let (memory, _) = memory();
        let a = memory.alloc(10, AllocationTag::Audio).unwrap();
        let b = memory.alloc(5, AllocationTag::Audio).unwrap();
        let c = memory.alloc(7, AllocationTag::Font).unwrap();
        assert_eq!(memory.bytes_for_tag(AllocationTag::Audio), 15);
        assert_eq!(memory.bytes_for_tag(AllocationTag::Font), 7);
        memory.dealloc(a.as_ptr(), 10).unwrap();
        memory.dealloc(b.as_ptr(), 5).unwrap();
        memory.dealloc(c.as_ptr(), 7).unwrap();
    }

    #[test]
    fn test_teardown_frees_leaks_through_correct_path() {
        let (memory, sink) = memory();
        let breaks = Rc::new(Cell::new(0usize));
        let seen = breaks.clone();
        memory.set_debug_break(move |report| {
            assert_eq!(report.count, 4);
            seen.set(seen.get() + 1);
        });

        let drops = Rc::new(Cell::new(0));
        memory.alloc(12, AllocationTag::Scene).unwrap();
        memory.alloc_aligned(12, AllocationTag::Scene).unwrap();
        memory
            .alloc_typed(
                AllocationTag::Node,
                Counted {
                    drops: Some(drops.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        let array = memory.alloc_array::<Counted>(AllocationTag::Node, 3).unwrap();
        for i in 0..3 {
            unsafe { (*array.as_ptr().add(i)).drops = Some(drops.clone()) };
        }

        drop(memory);

        assert_eq!(breaks.get(), 1);
        assert_eq!(drops.get(), 4);
        assert!(sink.contains("leaked in 4 allocations"));
        assert!(sink.contains("  [Scene]"));
        assert!(sink.count_at(LogSeverity::Error) > 1);
    }

    #[test]
    fn test_owned_blocks_reject_external_release() {
        const OWNER: &str = "AssetManager::load";
        let (memory, _) = memory();
        let value = memory
            .alloc_typed_owned(AllocationTag::Asset, 11u64, OWNER)
            .unwrap();
        let bytes = memory.alloc_owned(24, AllocationTag::File, OWNER).unwrap();

        assert!(matches!(
            memory.dealloc_typed(value.as_ptr()),
            Err(EngineError::WrongCategory { allocated_as: OWNER, .. })
        ));
        assert!(matches!(
            memory.dealloc(bytes.as_ptr(), 24),
            Err(EngineError::WrongCategory { allocated_as: OWNER, .. })
        ));
        assert_eq!(memory.allocation_count(), 2);
        assert_eq!(memory.record(value.as_ptr()).unwrap().owner(), Some(OWNER));

        // Caller-owned blocks cannot go through the owned path either
        let plain = memory.alloc_typed(AllocationTag::Game, 3u64).unwrap();
        assert!(matches!(
            memory.dealloc_typed_owned(plain.as_ptr(), OWNER),
            Err(EngineError::WrongCategory { .. })
        ));

        memory.dealloc_typed_owned(value.as_ptr(), OWNER).unwrap();
        memory.dealloc_owned(bytes.as_ptr(), 24, OWNER).unwrap();
        memory.dealloc_typed(plain.as_ptr()).unwrap();
        assert_eq!(memory.allocation_count(), 0);
    }

    #[test]
    fn test_leak_action_defaults_to_log() {
        let (memory, sink) = memory();
        assert_eq!(memory.leak_action(), LeakAction::Log);
        memory.alloc(4, AllocationTag::Engine).unwrap();
        drop(memory);
        assert_eq!(sink.count_at(LogSeverity::Fatal), 1);
    }

    #[test]
    fn test_with_leak_action_is_recorded() {
        let (memory, _) = memory();
        let memory = memory.with_leak_action(LeakAction::Abort);
        assert_eq!(memory.leak_action(), LeakAction::Abort);
        // Clean teardown never reaches the hook
        let ptr = memory.alloc(4, AllocationTag::Engine).unwrap();
        memory.dealloc(ptr.as_ptr(), 4).unwrap();
    }

    #[test]
    fn test_clean_teardown_is_silent() {
        let (memory, sink) = memory();
        let ptr = memory.alloc(8, AllocationTag::Engine).unwrap();
        memory.dealloc(ptr.as_ptr(), 8).unwrap();
        drop(memory);
        assert!(sink.lines().is_empty());
    }
}
