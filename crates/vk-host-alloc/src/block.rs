use ash::vk;

/// Numeric identity of a live allocation: the pointer value handed to the driver.
pub type Address = usize;

/// Metadata of one live allocation.
///
/// `size` is what was actually reserved (after alignment rounding and vendor
/// padding), never the raw size the driver asked for. Freeing a block rebuilds
/// its layout from these two fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub size: usize,
    pub alignment: usize,
    pub scope: vk::SystemAllocationScope,
}

impl Block {
    pub fn new(size: usize, alignment: usize, scope: vk::SystemAllocationScope) -> Self {
        Self {
            size,
            alignment,
            scope,
        }
    }
}

/// Short lowercase name of an allocation scope, used as a report key.
pub fn scope_name(scope: vk::SystemAllocationScope) -> &'static str {
    match scope {
        vk::SystemAllocationScope::COMMAND => "command",
        vk::SystemAllocationScope::OBJECT => "object",
        vk::SystemAllocationScope::CACHE => "cache",
        vk::SystemAllocationScope::DEVICE => "device",
        vk::SystemAllocationScope::INSTANCE => "instance",
        _ => "unknown",
    }
}
