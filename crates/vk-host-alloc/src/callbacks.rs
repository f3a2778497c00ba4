//! `VkAllocationCallbacks` trampolines.
//!
//! Every entry point recovers the [`Tracker`] from `pUserData` and forwards to it.
//! Nothing may unwind into the driver, so each body runs under `catch_unwind` and
//! a panic degrades to the null / no-op answer.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use ash::vk;

use crate::allocator::{TrackedAllocator, Tracker};

impl TrackedAllocator {
    /// Callback table to pass to `vkCreateInstance`, `vkCreateDevice` and every
    /// `vkCreate*` / `vkDestroy*` call of objects created with them.
    ///
    /// The table borrows the allocator: the driver may call back into it for as
    /// long as any object created with these callbacks is alive, so the allocator
    /// must outlive all of them.
    pub fn callbacks(&self) -> vk::AllocationCallbacks<'_> {
        let mut callbacks = vk::AllocationCallbacks::default();
        callbacks.p_user_data = self.tracker() as *const Tracker as *mut c_void;
        callbacks.pfn_allocation = Some(allocation);
        callbacks.pfn_reallocation = Some(reallocation);
        callbacks.pfn_free = Some(free);
        callbacks.pfn_internal_allocation = Some(internal_allocation);
        callbacks.pfn_internal_free = Some(internal_free);
        callbacks
    }
}

#[inline]
fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(fallback)
}

/// # Safety
///
/// `user_data` must be the `p_user_data` of a table returned by
/// [`TrackedAllocator::callbacks`] whose allocator is still alive.
#[inline]
unsafe fn tracker<'a>(user_data: *mut c_void) -> &'a Tracker {
    unsafe { &*(user_data as *const Tracker) }
}

unsafe extern "system" fn allocation(
    user_data: *mut c_void,
    size: usize,
    alignment: usize,
    scope: vk::SystemAllocationScope,
) -> *mut c_void {
    guarded(ptr::null_mut(), || {
        let tracker = unsafe { tracker(user_data) };
        tracker
            .allocate(size, alignment, scope)
            .map_or(ptr::null_mut(), |block| block.as_ptr().cast())
    })
}

unsafe extern "system" fn reallocation(
    user_data: *mut c_void,
    original: *mut c_void,
    size: usize,
    alignment: usize,
    scope: vk::SystemAllocationScope,
) -> *mut c_void {
    guarded(ptr::null_mut(), || {
        let tracker = unsafe { tracker(user_data) };
        tracker
            .reallocate(NonNull::new(original.cast()), size, alignment, scope)
            .map_or(ptr::null_mut(), |block| block.as_ptr().cast())
    })
}

unsafe extern "system" fn free(user_data: *mut c_void, memory: *mut c_void) {
    guarded((), || {
        let tracker = unsafe { tracker(user_data) };
        tracker.free(NonNull::new(memory.cast()));
    })
}

unsafe extern "system" fn internal_allocation(
    user_data: *mut c_void,
    size: usize,
    kind: vk::InternalAllocationType,
    scope: vk::SystemAllocationScope,
) {
    guarded((), || {
        let tracker = unsafe { tracker(user_data) };
        tracker.internal_allocation_notify(size, kind, scope);
    })
}

unsafe extern "system" fn internal_free(
    user_data: *mut c_void,
    size: usize,
    kind: vk::InternalAllocationType,
    scope: vk::SystemAllocationScope,
) {
    guarded((), || {
        let tracker = unsafe { tracker(user_data) };
        tracker.internal_free_notify(size, kind, scope);
    })
}
