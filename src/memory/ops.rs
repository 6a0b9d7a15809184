//! Bulk byte primitives. None of these touch the allocation table.

use crate::memory::Memory;
use std::ptr;

impl Memory {
    /// Copy `size` bytes between non-overlapping regions.
    ///
    /// # Safety
    ///
    /// Both regions must be valid for `size` bytes and must not overlap.
    pub unsafe fn copy(&self, dest: *mut u8, src: *const u8, size: usize) {
        ptr::copy_nonoverlapping(src, dest, size);
    }

    /// Fill `size` bytes with zero.
    ///
    /// # Safety
    ///
    /// `dest` must be valid for writes of `size` bytes.
    pub unsafe fn zero(&self, dest: *mut u8, size: usize) {
        ptr::write_bytes(dest, 0, size);
    }

    /// Fill `size` bytes with `value`.
    ///
    /// # Safety
    ///
    /// `dest` must be valid for writes of `size` bytes.
    pub unsafe fn set(&self, dest: *mut u8, value: u8, size: usize) {
        ptr::write_bytes(dest, value, size);
    }

    /// Copy `size` bytes between possibly overlapping regions.
    ///
    /// # Safety
    ///
    /// Both regions must be valid for `size` bytes.
    pub unsafe fn move_bytes(&self, dest: *mut u8, src: *const u8, size: usize) {
        ptr::copy(src, dest, size);
    }
}
