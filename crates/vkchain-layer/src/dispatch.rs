//! Dispatch keys and the next layer's function tables.
//!
//! The loader writes its dispatch-table pointer into the first pointer-sized
//! word of every dispatchable object. Objects created from one instance (or
//! one device) share that pointer, so it keys the layer's per-instance and
//! per-device contexts: a physical device resolves to its instance, a queue
//! or command buffer to its device.

use std::ffi::{c_void, CStr};

use ash::vk::{self, Handle};

/// The loader's dispatch pointer of a dispatchable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchKey(usize);

impl DispatchKey {
    /// Read the key of a dispatchable object. A null handle has key 0.
    ///
    /// # Safety
    /// A non-null `handle` must point to a live dispatchable object.
    pub unsafe fn of<H: Handle>(handle: H) -> Self {
        let ptr = handle.as_raw() as usize as *const usize;
        if ptr.is_null() {
            return Self(0);
        }
        Self(unsafe { ptr.read() })
    }

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Turn a resolved entry point into the pointer form ash's loaders expect.
pub(crate) fn proc_ptr(f: vk::PFN_vkVoidFunction) -> *const c_void {
    f.map_or(std::ptr::null(), |f| f as *const c_void)
}

// ── Instance ────────────────────────────────────────────────

/// Entry points of the next layer for one instance.
pub struct InstanceDispatchTable {
    pub handle: vk::Instance,
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub core: ash::InstanceFnV1_0,
    pub display: ash::khr::display::InstanceFn,
}

impl InstanceDispatchTable {
    /// # Safety
    /// `get_instance_proc_addr` must be the next layer's resolver and
    /// `handle` an instance it created.
    pub unsafe fn load(
        handle: vk::Instance,
        get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    ) -> Self {
        let load_fn =
            |name: &CStr| proc_ptr(unsafe { get_instance_proc_addr(handle, name.as_ptr()) });
        Self {
            handle,
            get_instance_proc_addr,
            core: ash::InstanceFnV1_0::load(load_fn),
            display: ash::khr::display::InstanceFn::load(load_fn),
        }
    }
}

/// Global entry points of the next layer, resolved with a null instance.
///
/// # Safety
/// `get_instance_proc_addr` must be the next layer's resolver.
pub(crate) unsafe fn load_entry(
    get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
) -> ash::EntryFnV1_0 {
    ash::EntryFnV1_0::load(|name: &CStr| {
        proc_ptr(unsafe { get_instance_proc_addr(vk::Instance::null(), name.as_ptr()) })
    })
}

// ── Device ──────────────────────────────────────────────────

/// Entry points of the next layer for one device.
pub struct DeviceDispatchTable {
    pub handle: vk::Device,
    pub core: ash::DeviceFnV1_0,
    pub core_1_1: ash::DeviceFnV1_1,
    pub deferred_host_operations: ash::khr::deferred_host_operations::DeviceFn,
    pub ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::DeviceFn,
}

impl DeviceDispatchTable {
    /// # Safety
    /// `get_device_proc_addr` must be the next layer's resolver and `handle`
    /// a device it created.
    pub unsafe fn load(handle: vk::Device, get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr) -> Self {
        let load_fn = |name: &CStr| proc_ptr(unsafe { get_device_proc_addr(handle, name.as_ptr()) });
        Self {
            handle,
            core: ash::DeviceFnV1_0::load(load_fn),
            core_1_1: ash::DeviceFnV1_1::load(load_fn),
            deferred_host_operations: ash::khr::deferred_host_operations::DeviceFn::load(load_fn),
            ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::DeviceFn::load(load_fn),
        }
    }
}
