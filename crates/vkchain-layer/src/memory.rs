//! Buffer entry points.

use ash::prelude::VkResult;
use ash::vk;

use crate::call::{vk_call, Call, CreateArgs, DestroyArgs};
use crate::device::{write_out, DeviceContext};
use crate::error::LayerError;

#[derive(Debug, Default)]
pub struct CreateBufferState {
    /// Usage bits validators need on top of the application's, e.g. for
    /// instrumentation that binds the buffer itself.
    pub extra_usage: vk::BufferUsageFlags,
}

vk_call!(
    CreateBuffer<'a> = "vkCreateBuffer",
    CreateArgs<'a, vk::BufferCreateInfo<'a>>,
    CreateBufferState,
    VkResult<vk::Buffer>
);

vk_call!(
    DestroyBuffer<'a> = "vkDestroyBuffer",
    DestroyArgs<'a, vk::Buffer>,
    (),
    ()
);

impl DeviceContext {
    /// # Safety
    /// Parameters as for `vkCreateBuffer`.
    pub unsafe fn create_buffer(
        &self,
        p_create_info: *const vk::BufferCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_buffer: *mut vk::Buffer,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return self.fail(CreateBuffer::NAME, LayerError::NullPointer("pCreateInfo"));
        };
        let args = CreateArgs {
            device: self.handle(),
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateBuffer>(&args, |state| {
            let mut info = *create_info;
            info.usage |= state.extra_usage;
            self.create_wrapped(|p_real| unsafe {
                (self.table.core.create_buffer)(self.table.handle, &info, p_allocator, p_real)
            })
        });
        unsafe { write_out(p_buffer, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyBuffer`.
    pub unsafe fn destroy_buffer(
        &self,
        buffer: vk::Buffer,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyBuffer, _>(buffer, p_allocator, |real| {
                (self.table.core.destroy_buffer)(self.table.handle, real, p_allocator)
            });
        }
    }
}
