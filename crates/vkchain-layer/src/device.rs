//! Device-level state shared by the device entry points.
//!
//! Validators see handles in their wrapped, application-facing form. An
//! entry point unwraps its inputs only when calling down, and wraps newly
//! created handles before the post-call Record hooks run. Handle types this
//! layer never creates (images, image views, samplers, buffer views, pipeline
//! caches, acceleration structures) pass through untouched.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use dashmap::DashMap;
use vkchain_core::{DebugReport, DeferredOperationRegistry, HandleRegistry, ValidationChecks};

use crate::call::{vk_call, DestroyArgs};
use crate::chain::ValidatorChain;
use crate::descriptor::DescriptorTemplateState;
use crate::dispatch::DeviceDispatchTable;
use crate::error::LayerError;
use crate::instance::InstanceContext;

vk_call!(
    DestroyDevice<'a> = "vkDestroyDevice",
    DestroyArgs<'a, vk::Device>,
    (),
    ()
);

/// Everything the layer keeps for one device.
pub struct DeviceContext {
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) instance: Arc<InstanceContext>,
    pub(crate) table: Arc<DeviceDispatchTable>,
    pub(crate) chain: ValidatorChain,
    pub(crate) checks: ValidationChecks,
    pub(crate) enabled_extensions: Arc<[String]>,
    pub(crate) report: Arc<DebugReport>,
    pub(crate) handles: Arc<HandleRegistry>,
    pub(crate) deferred: Arc<DeferredOperationRegistry>,
    /// Real template handle -> what it was created with
    pub(crate) templates: DashMap<u64, Arc<DescriptorTemplateState>>,
    /// Wrapped pool -> wrapped sets allocated from it
    pub(crate) pool_sets: DashMap<u64, Vec<u64>>,
}

impl DeviceContext {
    pub fn handle(&self) -> vk::Device {
        self.table.handle
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn table(&self) -> &Arc<DeviceDispatchTable> {
        &self.table
    }

    pub fn chain(&self) -> &ValidatorChain {
        &self.chain
    }

    pub fn checks(&self) -> ValidationChecks {
        self.checks
    }

    pub fn enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    pub fn report(&self) -> &Arc<DebugReport> {
        &self.report
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    pub fn deferred(&self) -> &Arc<DeferredOperationRegistry> {
        &self.deferred
    }

    /// Report `error` against `entry_point` and return its result code.
    pub(crate) fn fail(&self, entry_point: &'static str, error: LayerError) -> vk::Result {
        self.report.internal_error(entry_point, &error);
        error.as_vk_result()
    }

    pub fn template_state(&self, real_template: vk::DescriptorUpdateTemplate) -> Option<Arc<DescriptorTemplateState>> {
        self.templates
            .get(&real_template.as_raw())
            .map(|state| Arc::clone(state.value()))
    }

    // ── Handle translation ──────────────────────────────────

    pub fn wrap<H: Handle>(&self, real: H) -> H {
        if self.checks.wraps_handles() {
            self.handles.wrap(real)
        } else {
            real
        }
    }

    pub fn unwrap<H: Handle>(&self, wrapped: H) -> H {
        if self.checks.wraps_handles() {
            self.handles.unwrap_handle(wrapped)
        } else {
            wrapped
        }
    }

    /// Forget a wrapped handle that is being destroyed, returning its real form.
    pub fn remove<H: Handle>(&self, wrapped: H) -> H {
        if self.checks.wraps_handles() {
            self.handles.remove_handle(wrapped)
        } else {
            wrapped
        }
    }

    /// Create one handle through `call_down` and wrap it.
    pub(crate) fn create_wrapped<H: Handle>(
        &self,
        call_down: impl FnOnce(*mut H) -> vk::Result,
    ) -> VkResult<H> {
        let mut real = H::from_raw(0);
        match call_down(&mut real) {
            vk::Result::SUCCESS => Ok(self.wrap(real)),
            error => Err(error),
        }
    }

    /// Shared body of the `vkDestroy*` entry points.
    ///
    /// # Safety
    /// `p_allocator` must be null or valid.
    pub(crate) unsafe fn destroy<C, H>(
        &self,
        handle: H,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        call_down: impl FnOnce(H),
    ) where
        H: Handle + Copy,
        C: for<'a> crate::call::Call<Args<'a> = DestroyArgs<'a, H>, Output = ()>,
    {
        let args = DestroyArgs {
            device: self.handle(),
            handle,
            allocator: unsafe { p_allocator.as_ref() },
        };
        self.chain.intercept::<C>(&args, |_| call_down(self.remove(handle)));
    }
}

/// Hand a created handle back to the application.
///
/// # Safety
/// `p_out` must be null or valid for writes.
pub(crate) unsafe fn write_out<H>(p_out: *mut H, output: VkResult<H>) -> vk::Result {
    match output {
        Ok(handle) => {
            if let Some(out) = unsafe { p_out.as_mut() } {
                *out = handle;
            }
            vk::Result::SUCCESS
        }
        Err(error) => error,
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("handle", &self.handle().as_raw())
            .field("validators", &self.chain.kinds())
            .field("templates", &self.templates.len())
            .finish()
    }
}
