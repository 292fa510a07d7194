//! Instance-level state and entry points.

use std::ffi::c_void;
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use vkchain_core::{DebugReport, DisplayMap, HandleRegistry, ValidationChecks};

use crate::call::{raw_slice, vk_call, Call, Vetoable};
use crate::chain::ValidatorChain;
use crate::dispatch::InstanceDispatchTable;
use crate::error::LayerError;

/// Handles an enumeration or multi-create call produced, next to its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Produced<H> {
    pub result: vk::Result,
    pub handles: Vec<H>,
}

impl<H> Vetoable for Produced<H> {
    fn vetoed() -> Self {
        Self {
            result: vk::Result::ERROR_VALIDATION_FAILED_EXT,
            handles: Vec::new(),
        }
    }
}

/// Whether an enumeration wrote its output array.
pub(crate) fn wrote_outputs(result: vk::Result) -> bool {
    matches!(result, vk::Result::SUCCESS | vk::Result::INCOMPLETE)
}

/// Walk a `pNext` chain.
///
/// # Safety
/// `p_next` must be null or a valid Vulkan structure chain that outlives the iterator.
pub(crate) unsafe fn p_next_chain(
    p_next: *const c_void,
) -> impl Iterator<Item = *const vk::BaseInStructure<'static>> {
    let first = p_next.cast::<vk::BaseInStructure<'static>>();
    std::iter::successors((!first.is_null()).then_some(first), |&current| {
        let next = unsafe { (*current).p_next };
        (!next.is_null()).then_some(next)
    })
}

// ── Calls ───────────────────────────────────────────────────

pub struct CreateInstanceArgs<'a> {
    pub create_info: &'a vk::InstanceCreateInfo<'a>,
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

vk_call!(CreateInstance<'a> = "vkCreateInstance", CreateInstanceArgs<'a>, (), VkResult<vk::Instance>);

pub struct DestroyInstanceArgs<'a> {
    pub instance: vk::Instance,
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

vk_call!(DestroyInstance<'a> = "vkDestroyInstance", DestroyInstanceArgs<'a>, (), ());

pub struct EnumeratePhysicalDevicesArgs {
    pub instance: vk::Instance,
    /// The application passed no output array and only asks for the count.
    pub count_only: bool,
}

vk_call!(
    EnumeratePhysicalDevices<'a> = "vkEnumeratePhysicalDevices",
    EnumeratePhysicalDevicesArgs,
    (),
    Produced<vk::PhysicalDevice>
);

pub struct GetDisplayPropertiesArgs {
    pub physical_device: vk::PhysicalDevice,
    pub count_only: bool,
}

vk_call!(
    /// Post-call hooks see the displays already wrapped.
    GetPhysicalDeviceDisplayProperties<'a> = "vkGetPhysicalDeviceDisplayPropertiesKHR",
    GetDisplayPropertiesArgs,
    (),
    Produced<vk::DisplayKHR>
);

pub struct CreateDeviceArgs<'a> {
    pub physical_device: vk::PhysicalDevice,
    pub create_info: &'a vk::DeviceCreateInfo<'a>,
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

/// Adjustments validators make to the device they are about to get.
#[derive(Debug, Default)]
pub struct DeviceCreateState {
    /// Replaces `pEnabledFeatures` when set.
    pub enabled_features: Option<vk::PhysicalDeviceFeatures>,
    /// Enabled in addition to what the application asked for.
    pub extra_extensions: Vec<std::ffi::CString>,
}

vk_call!(CreateDevice<'a> = "vkCreateDevice", CreateDeviceArgs<'a>, DeviceCreateState, VkResult<vk::Device>);

// ── Context ─────────────────────────────────────────────────

/// Everything the layer keeps for one instance.
pub struct InstanceContext {
    pub(crate) table: Arc<InstanceDispatchTable>,
    pub(crate) chain: ValidatorChain,
    pub(crate) checks: ValidationChecks,
    pub(crate) enabled_extensions: Arc<[String]>,
    pub(crate) report: Arc<DebugReport>,
    pub(crate) handles: Arc<HandleRegistry>,
    pub(crate) displays: DisplayMap,
}

impl InstanceContext {
    pub fn handle(&self) -> vk::Instance {
        self.table.handle
    }

    pub fn table(&self) -> &InstanceDispatchTable {
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

    /// Where this instance's validators report. Callbacks registered here
    /// receive messages from the instance and all of its devices.
    pub fn report(&self) -> &Arc<DebugReport> {
        &self.report
    }

    pub fn displays(&self) -> &DisplayMap {
        &self.displays
    }

    /// Report `error` against `entry_point` and return its result code.
    pub(crate) fn fail(&self, entry_point: &'static str, error: LayerError) -> vk::Result {
        self.report.internal_error(entry_point, &error);
        error.as_vk_result()
    }

    /// The application-facing form of an enumerated display.
    pub fn wrap_display(&self, real: vk::DisplayKHR) -> vk::DisplayKHR {
        if self.checks.wraps_handles() {
            self.handles.maybe_wrap_display(real, &self.displays)
        } else {
            real
        }
    }

    /// The real form of a display the application passed in.
    pub fn unwrap_display(&self, display: vk::DisplayKHR) -> vk::DisplayKHR {
        if self.checks.wraps_handles() {
            self.handles.unwrap_handle(display)
        } else {
            display
        }
    }

    /// # Safety
    /// Parameters as for `vkEnumeratePhysicalDevices`.
    pub unsafe fn enumerate_physical_devices(
        &self,
        p_physical_device_count: *mut u32,
        p_physical_devices: *mut vk::PhysicalDevice,
    ) -> vk::Result {
        if p_physical_device_count.is_null() {
            return self.fail(
                EnumeratePhysicalDevices::NAME,
                LayerError::NullPointer("pPhysicalDeviceCount"),
            );
        }
        let args = EnumeratePhysicalDevicesArgs {
            instance: self.handle(),
            count_only: p_physical_devices.is_null(),
        };
        self.chain
            .intercept::<EnumeratePhysicalDevices>(&args, |_| {
                let result = unsafe {
                    (self.table.core.enumerate_physical_devices)(
                        self.table.handle,
                        p_physical_device_count,
                        p_physical_devices,
                    )
                };
                let handles = if wrote_outputs(result) {
                    unsafe { raw_slice(p_physical_devices, *p_physical_device_count) }.to_vec()
                } else {
                    Vec::new()
                };
                Produced { result, handles }
            })
            .result
    }

    /// # Safety
    /// Parameters as for `vkGetPhysicalDeviceDisplayPropertiesKHR`.
    pub unsafe fn get_physical_device_display_properties_khr(
        &self,
        physical_device: vk::PhysicalDevice,
        p_property_count: *mut u32,
        p_properties: *mut vk::DisplayPropertiesKHR<'_>,
    ) -> vk::Result {
        if p_property_count.is_null() {
            return self.fail(
                GetPhysicalDeviceDisplayProperties::NAME,
                LayerError::NullPointer("pPropertyCount"),
            );
        }
        let args = GetDisplayPropertiesArgs {
            physical_device,
            count_only: p_properties.is_null(),
        };
        self.chain
            .intercept::<GetPhysicalDeviceDisplayProperties>(&args, |_| {
                let result = unsafe {
                    (self.table.display.get_physical_device_display_properties_khr)(
                        physical_device,
                        p_property_count,
                        p_properties,
                    )
                };
                let mut handles = Vec::new();
                if wrote_outputs(result) && !p_properties.is_null() {
                    let properties = unsafe {
                        std::slice::from_raw_parts_mut(p_properties, *p_property_count as usize)
                    };
                    for property in properties {
                        property.display = self.wrap_display(property.display);
                        handles.push(property.display);
                    }
                }
                Produced { result, handles }
            })
            .result
    }

    /// Unregister this instance's displays.
    pub(crate) fn release_displays(&self) {
        if self.checks.wraps_handles() {
            self.displays.release(&self.handles);
        }
    }
}

impl std::fmt::Debug for InstanceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceContext")
            .field("handle", &self.handle().as_raw())
            .field("validators", &self.chain.kinds())
            .field("checks", &self.checks)
            .finish()
    }
}
