// Synchronization primitives
//
// Fences and semaphores for CPU-GPU and GPU-GPU sync.
// One FrameSync triple per swapchain image, never a fixed frames-in-flight
// constant: the presentation engine may still be consuming a semaphore after
// present returns, so a semaphore must not be re-signaled before its prior
// wait has retired. Sizing the set to the image count and signaling the
// present semaphore by acquired image index sidesteps that hazard.

use anyhow::{Context, Result};
use ash::vk;

/// One acquire-semaphore / present-semaphore / fence triple.
pub struct FrameSync {
    pub acquire: vk::Semaphore,
    pub present: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Pre-signaled so the first frame's wait does not block
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                acquire: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create acquire semaphore")?,
                present: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create present semaphore")?,
                in_flight: device
                    .create_fence(&fence_info, None)
                    .context("Failed to create in-flight fence")?,
            })
        }
    }
}

/// The full per-image sync set for one swapchain.
pub struct SyncSet {
    frames: Vec<FrameSync>,
    device: ash::Device,
    orphaned: bool,
}

impl SyncSet {
    pub fn new(device: &ash::Device, image_count: usize) -> Result<Self> {
        let mut set = Self {
            frames: Vec::with_capacity(image_count),
            device: device.clone(),
            orphaned: false,
        };

        for _ in 0..image_count {
            set.frames.push(FrameSync::new(device)?);
        }

        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: usize) -> &FrameSync {
        &self.frames[index]
    }

    /// Block until every fence in the set has signaled. Slots other than the
    /// current one may still have outstanding GPU work at teardown time.
    pub fn wait_all(&self) -> Result<()> {
        let fences: Vec<vk::Fence> = self.frames.iter().map(|f| f.in_flight).collect();

        if !fences.is_empty() {
            unsafe {
                self.device
                    .wait_for_fences(&fences, true, u64::MAX)
                    .context("Failed waiting for in-flight fences")?;
            }
        }

        Ok(())
    }

    /// Forget the handles without destroying them. Used when the logical
    /// device they were created on has already been destroyed.
    pub fn abandon(mut self) {
        self.orphaned = true;
    }
}

impl Drop for SyncSet {
    fn drop(&mut self) {
        if self.orphaned {
            return;
        }

        unsafe {
            for frame in &self.frames {
                self.device.destroy_semaphore(frame.acquire, None);
                self.device.destroy_semaphore(frame.present, None);
                self.device.destroy_fence(frame.in_flight, None);
            }
        }
    }
}
