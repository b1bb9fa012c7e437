// frameloop - Vulkan device/swapchain lifecycle management
//
// Mediates between one or more on-screen surfaces and a shared Vulkan
// device. Handles multi-surface device selection, swapchain (re)creation,
// and per-frame CPU/GPU synchronization under resize, minimize, and
// multi-window scenarios. Rendering itself (pipelines, shaders, draws) is
// the caller's business; this crate only runs the resource lifecycle that
// must exist before any draw call can be issued.

pub mod backend;
pub mod config;

pub use backend::context::{Drawable, SurfaceContext};
pub use backend::device::{DeviceManager, SharedDeviceManager};
pub use config::Config;
