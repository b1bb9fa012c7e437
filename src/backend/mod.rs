// Backend module - Vulkan lifecycle layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Ownership: each resource tier is a scoped struct whose Drop releases it

pub mod context;
pub mod device;
pub mod swapchain;
pub mod sync;

pub use context::SurfaceContext;
pub use device::DeviceManager;
pub use swapchain::Swapchain;
