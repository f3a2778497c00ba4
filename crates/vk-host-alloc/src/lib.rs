//! Tracked host memory allocator for Vulkan.
//!
//! [`TrackedAllocator`] hands the driver a [`vk::AllocationCallbacks`] table and
//! records every live block the driver reserves through it: address, reserved size,
//! alignment and [`vk::SystemAllocationScope`]. Double frees and reallocations of
//! memory the allocator never handed out are logged through [`tracing`] and refused
//! instead of reaching the host allocator.
//!
//! ```rust,no_run
//! use vk_host_alloc::TrackedAllocator;
//!
//! let allocator = TrackedAllocator::new();
//! let callbacks = allocator.callbacks();
//! // pass `Some(&callbacks)` to `create_instance` / `create_device`
//! # let _ = callbacks;
//! ```
//!
//! Two build-time toggles shape the reservation policy, see [`Policy::BUILD`]:
//! `align-trace` and `vendor-padding`.
//!
//! [`vk::AllocationCallbacks`]: ash::vk::AllocationCallbacks
//! [`vk::SystemAllocationScope`]: ash::vk::SystemAllocationScope

pub mod allocator;
pub mod block;
mod callbacks;
pub mod error;
pub mod policy;
pub mod report;

pub use allocator::{AllocatorStats, TrackedAllocator};
pub use block::{scope_name, Address, Block};
pub use error::AllocError;
pub use policy::{Policy, VENDOR_PADDING_MULTIPLIER};
pub use report::{
    format_bytes, AllocatorReport, Format, JsonPrettyReporter, JsonReporter, Reporter, ScopeRow,
    TableReporter,
};

#[doc(no_inline)]
pub use ash::vk;
