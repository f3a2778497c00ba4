//! Block tracking behind the Vulkan host allocation callbacks.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk;
use serde::{Deserialize, Serialize};

use crate::block::{Address, Block};
use crate::error::AllocError;
use crate::policy::Policy;

/// Host allocator that records every block the driver reserves through it.
///
/// The block table lives in its own heap allocation, and that address is the
/// `pUserData` the driver gets back on every callback. The allocator value can be
/// moved freely; the table stays put until the allocator is dropped.
///
/// Dropping an allocator that still tracks blocks leaks them: the driver may still
/// be using that memory, so the allocator never releases it on its own.
///
/// # Examples
///
/// ```rust
/// use vk_host_alloc::{vk, TrackedAllocator};
///
/// let allocator = TrackedAllocator::new();
/// let ptr = allocator.allocate(10, 8, vk::SystemAllocationScope::OBJECT);
/// assert!(ptr.is_some());
/// assert_eq!(allocator.live_blocks(), 1);
///
/// allocator.free(ptr);
/// assert!(allocator.is_empty());
/// ```
pub struct TrackedAllocator {
    tracker: Box<Tracker>,
}

impl Default for TrackedAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedAllocator")
            .field("policy", &self.tracker.policy)
            .field("live_blocks", &self.live_blocks())
            .field("live_bytes", &self.live_bytes())
            .finish()
    }
}

impl TrackedAllocator {
    /// Allocator using the build-time [`Policy::BUILD`].
    pub fn new() -> Self {
        Self::with_policy(Policy::BUILD)
    }

    pub fn with_policy(policy: Policy) -> Self {
        Self {
            tracker: Box::new(Tracker::new(policy)),
        }
    }

    pub fn policy(&self) -> Policy {
        self.tracker.policy
    }

    pub(crate) fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Reserves a block, returning `None` when the host is out of memory or the
    /// layout is invalid. Never logs above debug level.
    pub fn allocate(
        &self,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Option<NonNull<u8>> {
        self.tracker.allocate(size, alignment, scope)
    }

    /// Moves a tracked block into a new reservation of `size` bytes.
    ///
    /// A `None` original behaves like [`allocate`](Self::allocate). An untracked
    /// original is refused with a warning. A zero `size` frees the original.
    pub fn reallocate(
        &self,
        original: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Option<NonNull<u8>> {
        self.tracker.reallocate(original, size, alignment, scope)
    }

    /// Releases a tracked block. `None` is a no-op, an untracked pointer is logged
    /// and left alone.
    pub fn free(&self, ptr: Option<NonNull<u8>>) {
        self.tracker.free(ptr)
    }

    pub fn try_allocate(
        &self,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Result<NonNull<u8>, AllocError> {
        self.tracker.try_allocate(size, alignment, scope)
    }

    /// Fallible form of [`reallocate`](Self::reallocate). `Ok(None)` means the
    /// original was freed because `size` was zero.
    pub fn try_reallocate(
        &self,
        original: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        self.tracker.try_reallocate(original, size, alignment, scope)
    }

    /// Fallible form of [`free`](Self::free); returns the metadata of the released block.
    pub fn try_free(&self, ptr: NonNull<u8>) -> Result<Block, AllocError> {
        self.tracker.try_free(ptr)
    }

    pub fn internal_allocation_notify(
        &self,
        size: usize,
        kind: vk::InternalAllocationType,
        scope: vk::SystemAllocationScope,
    ) {
        self.tracker.internal_allocation_notify(size, kind, scope)
    }

    pub fn internal_free_notify(
        &self,
        size: usize,
        kind: vk::InternalAllocationType,
        scope: vk::SystemAllocationScope,
    ) {
        self.tracker.internal_free_notify(size, kind, scope)
    }

    /// Snapshot of the block table.
    pub fn blocks(&self) -> HashMap<Address, Block> {
        self.tracker.lock().clone()
    }

    pub fn block(&self, ptr: NonNull<u8>) -> Option<Block> {
        self.tracker.lock().get(&address_of(ptr)).copied()
    }

    pub fn live_blocks(&self) -> usize {
        self.tracker.lock().len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.tracker
            .lock()
            .values()
            .map(|block| block.size as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.lock().is_empty()
    }

    pub fn stats(&self) -> AllocatorStats {
        self.tracker.counters.snapshot()
    }
}

/// Counters of every call the allocator has served.
///
/// `allocations` and `frees` include the blocks reserved and released on behalf of
/// reallocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub allocations: u64,
    pub reallocations: u64,
    pub frees: u64,
    pub failed_allocations: u64,
    pub rounded_allocations: u64,
    pub untracked_frees: u64,
    pub untracked_reallocations: u64,
}

#[derive(Default)]
struct Counters {
    allocations: AtomicU64,
    reallocations: AtomicU64,
    frees: AtomicU64,
    failed_allocations: AtomicU64,
    rounded_allocations: AtomicU64,
    untracked_frees: AtomicU64,
    untracked_reallocations: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
            rounded_allocations: self.rounded_allocations.load(Ordering::Relaxed),
            untracked_frees: self.untracked_frees.load(Ordering::Relaxed),
            untracked_reallocations: self.untracked_reallocations.load(Ordering::Relaxed),
        }
    }
}

/// Heap-pinned state shared with the driver through `pUserData`.
pub(crate) struct Tracker {
    policy: Policy,
    blocks: Mutex<HashMap<Address, Block>>,
    counters: Counters,
}

#[inline]
fn address_of(ptr: NonNull<u8>) -> Address {
    ptr.as_ptr() as Address
}

impl Tracker {
    fn new(policy: Policy) -> Self {
        Self {
            policy,
            blocks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated: every
    // critical section is a single insert, remove or lookup.
    fn lock(&self) -> MutexGuard<'_, HashMap<Address, Block>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn allocate(
        &self,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Option<NonNull<u8>> {
        match self.try_allocate(size, alignment, scope) {
            Ok(ptr) => Some(ptr),
            Err(err) => {
                tracing::debug!("{err}");
                None
            }
        }
    }

    pub(crate) fn reallocate(
        &self,
        original: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Option<NonNull<u8>> {
        match self.try_reallocate(original, size, alignment, scope) {
            Ok(ptr) => ptr,
            Err(err @ AllocError::UntrackedReallocation(_)) => {
                tracing::warn!("{err}");
                None
            }
            Err(err) => {
                tracing::debug!("{err}");
                None
            }
        }
    }

    pub(crate) fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        if let Err(err) = self.try_free(ptr) {
            tracing::warn!("{err}");
        }
    }

    pub(crate) fn try_allocate(
        &self,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Result<NonNull<u8>, AllocError> {
        let reserved = self
            .policy
            .reserved_size(size, alignment)
            .filter(|&reserved| reserved > 0)
            .ok_or(AllocError::InvalidLayout { size, alignment })?;

        let layout = Layout::from_size_align(reserved, alignment)
            .map_err(|_| AllocError::InvalidLayout { size, alignment })?;

        // SAFETY: `layout` has a non-zero size.
        let Some(ptr) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
            Counters::bump(&self.counters.failed_allocations);
            return Err(AllocError::AllocationFailed {
                size: reserved,
                alignment,
            });
        };

        if size % alignment != 0 {
            Counters::bump(&self.counters.rounded_allocations);
        }
        Counters::bump(&self.counters.allocations);

        self.lock()
            .insert(address_of(ptr), Block::new(reserved, alignment, scope));

        Ok(ptr)
    }

    pub(crate) fn try_reallocate(
        &self,
        original: Option<NonNull<u8>>,
        size: usize,
        alignment: usize,
        scope: vk::SystemAllocationScope,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        let Some(original) = original else {
            return self.try_allocate(size, alignment, scope).map(Some);
        };

        let original_addr = address_of(original);
        let Some(old) = self.lock().get(&original_addr).copied() else {
            Counters::bump(&self.counters.untracked_reallocations);
            return Err(AllocError::UntrackedReallocation(original_addr));
        };

        // Vulkan requires a zero-sized reallocation to free, even when padding
        // would make `allocate(0)` succeed.
        if size == 0 {
            self.try_free(original)?;
            return Ok(None);
        }

        let new_block = self.try_allocate(size, alignment, scope)?;

        // SAFETY: `original` is tracked, so it is live for `old.size` bytes, and
        // `new_block` was just reserved for at least `size` bytes. Two live blocks
        // never overlap.
        unsafe {
            ptr::copy_nonoverlapping(
                original.as_ptr(),
                new_block.as_ptr(),
                size.min(old.size),
            );
        }

        if let Err(err) = self.try_free(original) {
            // The original vanished between lookup and free: a concurrent free of
            // the same pointer. Drop the new block too and report.
            let _ = self.try_free(new_block);
            return Err(err);
        }

        Counters::bump(&self.counters.reallocations);
        Ok(Some(new_block))
    }

    pub(crate) fn try_free(&self, ptr: NonNull<u8>) -> Result<Block, AllocError> {
        let addr = address_of(ptr);
        let Some(block) = self.lock().remove(&addr) else {
            Counters::bump(&self.counters.untracked_frees);
            return Err(AllocError::UntrackedFree(addr));
        };

        // SAFETY: the block was reserved by `try_allocate` with exactly this size
        // and alignment, and removing it from the table hands us sole ownership.
        unsafe {
            alloc::dealloc(
                ptr.as_ptr(),
                Layout::from_size_align_unchecked(block.size, block.alignment),
            );
        }
        Counters::bump(&self.counters.frees);

        Ok(block)
    }

    pub(crate) fn internal_allocation_notify(
        &self,
        size: usize,
        kind: vk::InternalAllocationType,
        scope: vk::SystemAllocationScope,
    ) {
        tracing::trace!(size, ?kind, ?scope, "driver internal allocation");
    }

    pub(crate) fn internal_free_notify(
        &self,
        size: usize,
        kind: vk::InternalAllocationType,
        scope: vk::SystemAllocationScope,
    ) {
        tracing::trace!(size, ?kind, ?scope, "driver internal free");
    }
}
