//! `VK_KHR_deferred_host_operations` entry points.
//!
//! Continuations are keyed by the operation handle the application sees.
//! Whichever call first observes completion (a join returning `SUCCESS`, or
//! a result query returning anything but `NOT_READY`) drains them, while
//! calling down and so with no validator lock held.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::call::{vk_call, DestroyArgs};
use crate::device::{write_out, DeviceContext};

pub struct CreateDeferredOperationArgs<'a> {
    pub device: vk::Device,
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

vk_call!(
    CreateDeferredOperation<'a> = "vkCreateDeferredOperationKHR",
    CreateDeferredOperationArgs<'a>,
    (),
    VkResult<vk::DeferredOperationKHR>
);

vk_call!(
    /// Continuations still queued for the operation are discarded.
    DestroyDeferredOperation<'a> = "vkDestroyDeferredOperationKHR",
    DestroyArgs<'a, vk::DeferredOperationKHR>,
    (),
    ()
);

#[derive(Debug, Clone, Copy)]
pub struct DeferredOperationArgs {
    pub device: vk::Device,
    pub operation: vk::DeferredOperationKHR,
}

vk_call!(
    DeferredOperationJoin<'a> = "vkDeferredOperationJoinKHR",
    DeferredOperationArgs,
    (),
    vk::Result
);

vk_call!(
    GetDeferredOperationResult<'a> = "vkGetDeferredOperationResultKHR",
    DeferredOperationArgs,
    (),
    vk::Result
);

impl DeviceContext {
    /// # Safety
    /// Parameters as for `vkCreateDeferredOperationKHR`.
    pub unsafe fn create_deferred_operation_khr(
        &self,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_deferred_operation: *mut vk::DeferredOperationKHR,
    ) -> vk::Result {
        let args = CreateDeferredOperationArgs {
            device: self.handle(),
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateDeferredOperation>(&args, |_| {
            self.create_wrapped(|p_real| unsafe {
                (self.table.deferred_host_operations.create_deferred_operation_khr)(
                    self.table.handle,
                    p_allocator,
                    p_real,
                )
            })
        });
        unsafe { write_out(p_deferred_operation, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyDeferredOperationKHR`.
    pub unsafe fn destroy_deferred_operation_khr(
        &self,
        operation: vk::DeferredOperationKHR,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyDeferredOperation, _>(operation, p_allocator, |real| {
                let dropped = self.deferred.discard(operation.as_raw());
                if dropped > 0 {
                    tracing::warn!(
                        operation = operation.as_raw(),
                        dropped,
                        "deferred operation destroyed before its completion was observed"
                    );
                }
                (self.table.deferred_host_operations.destroy_deferred_operation_khr)(
                    self.table.handle,
                    real,
                    p_allocator,
                )
            });
        }
    }

    /// # Safety
    /// Parameters as for `vkDeferredOperationJoinKHR`.
    pub unsafe fn deferred_operation_join_khr(&self, operation: vk::DeferredOperationKHR) -> vk::Result {
        let args = DeferredOperationArgs {
            device: self.handle(),
            operation,
        };
        self.chain.intercept::<DeferredOperationJoin>(&args, |_| {
            let result = unsafe {
                (self.table.deferred_host_operations.deferred_operation_join_khr)(
                    self.table.handle,
                    self.unwrap(operation),
                )
            };
            if result == vk::Result::SUCCESS {
                self.observe_completion(operation, result);
            }
            result
        })
    }

    /// # Safety
    /// Parameters as for `vkGetDeferredOperationResultKHR`.
    pub unsafe fn get_deferred_operation_result_khr(
        &self,
        operation: vk::DeferredOperationKHR,
    ) -> vk::Result {
        let args = DeferredOperationArgs {
            device: self.handle(),
            operation,
        };
        self.chain.intercept::<GetDeferredOperationResult>(&args, |_| {
            let result = unsafe {
                (self.table.deferred_host_operations.get_deferred_operation_result_khr)(
                    self.table.handle,
                    self.unwrap(operation),
                )
            };
            // Once finished the query reports the operation's own result,
            // which may be an error.
            if result != vk::Result::NOT_READY {
                self.observe_completion(operation, result);
            }
            result
        })
    }

    fn observe_completion(&self, operation: vk::DeferredOperationKHR, result: vk::Result) {
        let ran = self.deferred.drain(operation.as_raw());
        if ran > 0 {
            tracing::debug!(
                operation = operation.as_raw(),
                ran,
                ?result,
                "ran deferred continuations"
            );
        }
    }
}
