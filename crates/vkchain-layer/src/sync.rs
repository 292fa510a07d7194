//! Fence entry points. `vkWaitForFences` is the canonical blocking call: a
//! Record hook that waits on a fence itself must do so inside
//! [`Recording::begin_blocking_operation`](vkchain_core::Recording::begin_blocking_operation).

use ash::prelude::VkResult;
use ash::vk;

use crate::call::{raw_slice, vk_call, Call, CreateArgs, DestroyArgs};
use crate::device::{write_out, DeviceContext};
use crate::error::LayerError;

vk_call!(
    CreateFence<'a> = "vkCreateFence",
    CreateArgs<'a, vk::FenceCreateInfo<'a>>,
    (),
    VkResult<vk::Fence>
);

vk_call!(
    DestroyFence<'a> = "vkDestroyFence",
    DestroyArgs<'a, vk::Fence>,
    (),
    ()
);

pub struct WaitForFencesArgs<'a> {
    pub device: vk::Device,
    pub fences: &'a [vk::Fence],
    pub wait_all: bool,
    pub timeout: u64,
}

vk_call!(
    WaitForFences<'a> = "vkWaitForFences",
    WaitForFencesArgs<'a>,
    (),
    vk::Result
);

impl DeviceContext {
    /// # Safety
    /// Parameters as for `vkCreateFence`.
    pub unsafe fn create_fence(
        &self,
        p_create_info: *const vk::FenceCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_fence: *mut vk::Fence,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return self.fail(CreateFence::NAME, LayerError::NullPointer("pCreateInfo"));
        };
        let args = CreateArgs {
            device: self.handle(),
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateFence>(&args, |_| {
            self.create_wrapped(|p_real| unsafe {
                (self.table.core.create_fence)(self.table.handle, create_info, p_allocator, p_real)
            })
        });
        unsafe { write_out(p_fence, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyFence`.
    pub unsafe fn destroy_fence(&self, fence: vk::Fence, p_allocator: *const vk::AllocationCallbacks<'_>) {
        unsafe {
            self.destroy::<DestroyFence, _>(fence, p_allocator, |real| {
                (self.table.core.destroy_fence)(self.table.handle, real, p_allocator)
            });
        }
    }

    /// # Safety
    /// Parameters as for `vkWaitForFences`.
    pub unsafe fn wait_for_fences(
        &self,
        fence_count: u32,
        p_fences: *const vk::Fence,
        wait_all: vk::Bool32,
        timeout: u64,
    ) -> vk::Result {
        let fences = unsafe { raw_slice(p_fences, fence_count) };
        let args = WaitForFencesArgs {
            device: self.handle(),
            fences,
            wait_all: wait_all == vk::TRUE,
            timeout,
        };
        self.chain.intercept::<WaitForFences>(&args, |_| {
            let real: Vec<vk::Fence> = fences.iter().map(|&fence| self.unwrap(fence)).collect();
            unsafe {
                (self.table.core.wait_for_fences)(
                    self.table.handle,
                    real.len() as u32,
                    real.as_ptr(),
                    wait_all,
                    timeout,
                )
            }
        })
    }
}
