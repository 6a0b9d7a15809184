use crate::identity::TypeIdentity;
use crate::memory::AllocationTag;
use std::alloc::Layout;
use std::ptr;

/// Which allocation call produced a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    Raw,
    Aligned,
    Typed,
    Array,
}

impl AllocationKind {
    /// Name of the allocation call, used in error messages
    pub const fn origin(self) -> &'static str {
        match self {
            AllocationKind::Raw => "Memory::alloc",
            AllocationKind::Aligned => "Memory::alloc_aligned",
            AllocationKind::Typed => "Memory::alloc_typed",
            AllocationKind::Array => "Memory::alloc_array",
        }
    }
}

/// Bookkeeping for one live pointer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Size the caller asked for
    pub size: usize,
    /// Size of the block actually allocated (differs from `size` when aligned)
    pub aligned_size: usize,
    pub tag: AllocationTag,
    pub aligned: bool,
    pub typed: bool,
    pub array: bool,
    /// Index into the descriptor table, set only when `typed`
    pub type_index: Option<usize>,
    pub(crate) layout: Layout,
    /// Subsystem that alone may release the block; `None` for caller-owned blocks
    pub(crate) owner: Option<&'static str>,
}

impl AllocationRecord {
    pub fn kind(&self) -> AllocationKind {
        match (self.aligned, self.typed, self.array) {
            (true, _, _) => AllocationKind::Aligned,
            (false, true, true) => AllocationKind::Array,
            (false, true, false) => AllocationKind::Typed,
            (false, false, _) => AllocationKind::Raw,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn owner(&self) -> Option<&'static str> {
        self.owner
    }
}

/// Per-type bookkeeping, one entry per distinct type ever allocated typed
#[derive(Clone, Debug)]
pub struct MemoryTypeDescriptor {
    pub uuid: TypeIdentity,
    pub type_name: &'static str,
    /// Size of a single element
    pub size: usize,
    pub align: usize,
    /// Set once the type has been used for an array allocation
    pub array: bool,
    pub(crate) drop_elements: unsafe fn(*mut u8, usize),
}

impl MemoryTypeDescriptor {
    pub(crate) fn of<T: 'static>(uuid: TypeIdentity, array: bool) -> Self {
        Self {
            uuid,
            type_name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            array,
            drop_elements: drop_elements::<T>,
        }
    }

    /// Number of elements a record of this type holds
    pub fn element_count(&self, record: &AllocationRecord) -> usize {
        if self.size == 0 {
            0
        } else {
            record.size / self.size
        }
    }
}

/// # Safety
///
/// `ptr` must point at `count` initialized values of `T`.
unsafe fn drop_elements<T>(ptr: *mut u8, count: usize) {
    ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr.cast::<T>(), count));
}

/// Allocation counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently held in live blocks
    pub live_bytes: usize,
    pub live_count: usize,
    pub peak_bytes: usize,
    pub total_allocations: u64,
    pub total_deallocations: u64,
}

/// Summary handed to the debug-break hook at teardown
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakReport {
    pub bytes: usize,
    pub count: usize,
    /// Leaked block count per tag, only tags with leaks
    pub by_tag: Vec<(AllocationTag, usize)>,
}
