//! Shared fixtures: a fake Vulkan driver the layer calls down into, and
//! validators that journal the hooks they see.
//!
//! Dispatchable objects carry a loader word first, as real ones do, then a
//! pointer back to the driver that created them. Physical devices share
//! their instance's loader word. Non-dispatchable handles are plain counters.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::ffi::{c_char, c_void, CStr};
use std::mem::transmute;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use vkchain_core::LayerSettings;
use vkchain_layer::{
    Call, Chassis, DeviceContext, Hooks, InstanceContext, Intercept, Recording, Scope, Validator,
    ValidatorContext, ValidatorKind, ValidatorRegistry,
};

// ── Fake driver ─────────────────────────────────────────────

#[repr(C)]
struct FakeDispatchable {
    loader_data: usize,
    driver: *const FakeDriver,
}

/// A ray-tracing creation the driver has not finished yet.
#[derive(Debug, Clone, Copy)]
struct PendingPipelines {
    outputs: usize,
    count: usize,
    create_infos: usize,
}

#[derive(Debug, Default)]
struct FakeOperation {
    pending: Option<PendingPipelines>,
    complete: bool,
    /// What a result query reports once complete; `SUCCESS` when unset
    outcome: Option<vk::Result>,
}

pub struct FakeDriver {
    next_handle: AtomicU64,
    instance_key: Mutex<usize>,
    physical_device: Mutex<vk::PhysicalDevice>,
    calls: Mutex<HashMap<&'static str, usize>>,
    /// Non-dispatchable handles created and not yet destroyed
    live: Mutex<HashSet<u64>>,
    /// Handles passed down that the driver never created
    foreign: Mutex<Vec<(&'static str, u64)>>,
    /// Handles the driver received, per entry point
    received: Mutex<HashMap<&'static str, Vec<u64>>>,
    buffer_usage: Mutex<Vec<vk::BufferUsageFlags>>,
    device_extensions: Mutex<Vec<String>>,
    templates: Mutex<HashMap<u64, Vec<vk::DescriptorUpdateTemplateEntry>>>,
    operations: Mutex<HashMap<u64, FakeOperation>>,
    pub displays: Vec<u64>,
    /// Ray-tracing creations with a deferred operation return `OPERATION_DEFERRED_KHR`.
    pub defer_ray_tracing: AtomicBool,
}

thread_local! {
    static INSTALLED: Cell<Option<&'static FakeDriver>> = const { Cell::new(None) };
}

impl FakeDriver {
    /// A driver that lives for the rest of the test process.
    pub fn new() -> &'static Self {
        Box::leak(Box::new(Self {
            next_handle: AtomicU64::new(0x1000),
            instance_key: Mutex::new(0),
            physical_device: Mutex::new(vk::PhysicalDevice::null()),
            calls: Mutex::new(HashMap::new()),
            live: Mutex::new(HashSet::new()),
            foreign: Mutex::new(Vec::new()),
            received: Mutex::new(HashMap::new()),
            buffer_usage: Mutex::new(Vec::new()),
            device_extensions: Mutex::new(Vec::new()),
            templates: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            displays: vec![0xd15_0001, 0xd15_0002],
            defer_ray_tracing: AtomicBool::new(false),
        }))
    }

    /// Make this driver answer `vkCreateInstance` on the current thread.
    pub fn install(&'static self) {
        INSTALLED.with(|installed| installed.set(Some(self)));
    }

    fn installed() -> &'static FakeDriver {
        INSTALLED.with(Cell::get).expect("no fake driver installed on this thread")
    }

    /// # Safety
    /// `handle` must be a dispatchable object this driver created.
    unsafe fn of<H: Handle>(handle: H) -> &'static FakeDriver {
        unsafe { &*(*(handle.as_raw() as *const FakeDispatchable)).driver }
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().get(name).copied().unwrap_or(0)
    }

    pub fn received(&self, name: &str) -> Vec<u64> {
        self.received.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn live_handles(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.live.lock().contains(&raw)
    }

    pub fn foreign_handles(&self) -> Vec<(&'static str, u64)> {
        self.foreign.lock().clone()
    }

    pub fn buffer_usage(&self) -> Vec<vk::BufferUsageFlags> {
        self.buffer_usage.lock().clone()
    }

    pub fn device_extensions(&self) -> Vec<String> {
        self.device_extensions.lock().clone()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        *self.physical_device.lock()
    }

    fn count(&self, name: &'static str) {
        *self.calls.lock().entry(name).or_default() += 1;
    }

    /// A dispatchable object, leaked like the driver itself.
    fn dispatchable(&self, loader_data: Option<usize>) -> u64 {
        let object = Box::leak(Box::new(FakeDispatchable {
            loader_data: 0,
            driver: self,
        }));
        let address = object as *mut FakeDispatchable as usize;
        object.loader_data = loader_data.unwrap_or(address);
        address as u64
    }

    fn create(&self) -> u64 {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(raw);
        raw
    }

    /// Note a handle passed down; it must be one this driver created.
    fn receive(&self, name: &'static str, raw: u64) {
        if raw == 0 {
            return;
        }
        self.received.lock().entry(name).or_default().push(raw);
        if !self.live.lock().contains(&raw) {
            self.foreign.lock().push((name, raw));
        }
    }

    fn destroy(&self, name: &'static str, raw: u64) {
        self.count(name);
        self.receive(name, raw);
        self.live.lock().remove(&raw);
    }

    fn finish(&self, operation: u64) -> vk::Result {
        let mut operations = self.operations.lock();
        let Some(state) = operations.get_mut(&operation) else {
            return vk::Result::ERROR_UNKNOWN;
        };
        if let Some(pending) = state.pending.take() {
            let infos = unsafe {
                std::slice::from_raw_parts(
                    pending.create_infos as *const vk::RayTracingPipelineCreateInfoKHR<'_>,
                    pending.count,
                )
            };
            for info in infos {
                let stages = unsafe { std::slice::from_raw_parts(info.p_stages, info.stage_count as usize) };
                for stage in stages {
                    self.receive("deferred join", stage.module.as_raw());
                }
            }
            let outputs =
                unsafe { std::slice::from_raw_parts_mut(pending.outputs as *mut vk::Pipeline, pending.count) };
            for output in outputs {
                *output = vk::Pipeline::from_raw(self.create());
            }
        }
        state.complete = true;
        vk::Result::SUCCESS
    }

    /// Finishes `operation` (a driver handle) on a worker thread the layer
    /// never sees, so only a result query can observe it. Later queries
    /// report `outcome`.
    pub fn complete_in_background(&self, operation: u64, outcome: vk::Result) {
        std::thread::scope(|scope| {
            scope.spawn(|| self.finish(operation));
        });
        if let Some(state) = self.operations.lock().get_mut(&operation) {
            state.outcome = Some(outcome);
        }
    }
}

macro_rules! entry {
    ($pfn:ty, $f:expr) => {
        Some(unsafe { transmute::<$pfn, unsafe extern "system" fn()>($f) })
    };
}

pub unsafe extern "system" fn get_instance_proc_addr(
    _instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { CStr::from_ptr(p_name) };
    match name.to_bytes() {
        b"vkCreateInstance" => entry!(vk::PFN_vkCreateInstance, create_instance),
        b"vkDestroyInstance" => entry!(vk::PFN_vkDestroyInstance, destroy_instance),
        b"vkEnumeratePhysicalDevices" => {
            entry!(vk::PFN_vkEnumeratePhysicalDevices, enumerate_physical_devices)
        }
        b"vkGetPhysicalDeviceDisplayPropertiesKHR" => entry!(
            vk::PFN_vkGetPhysicalDeviceDisplayPropertiesKHR,
            get_physical_device_display_properties
        ),
        b"vkCreateDevice" => entry!(vk::PFN_vkCreateDevice, create_device),
        b"vkGetDeviceProcAddr" => entry!(vk::PFN_vkGetDeviceProcAddr, get_device_proc_addr),
        _ => None,
    }
}

unsafe extern "system" fn get_device_proc_addr(
    _device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { CStr::from_ptr(p_name) };
    match name.to_bytes() {
        b"vkDestroyDevice" => entry!(vk::PFN_vkDestroyDevice, destroy_device),
        b"vkCreateBuffer" => entry!(vk::PFN_vkCreateBuffer, create_buffer),
        b"vkDestroyBuffer" => entry!(vk::PFN_vkDestroyBuffer, destroy_buffer),
        b"vkCreateFence" => entry!(vk::PFN_vkCreateFence, create_fence),
        b"vkDestroyFence" => entry!(vk::PFN_vkDestroyFence, destroy_fence),
        b"vkWaitForFences" => entry!(vk::PFN_vkWaitForFences, wait_for_fences),
        b"vkCreateShaderModule" => entry!(vk::PFN_vkCreateShaderModule, create_shader_module),
        b"vkDestroyShaderModule" => entry!(vk::PFN_vkDestroyShaderModule, destroy_shader_module),
        b"vkCreatePipelineLayout" => entry!(vk::PFN_vkCreatePipelineLayout, create_pipeline_layout),
        b"vkDestroyPipelineLayout" => {
            entry!(vk::PFN_vkDestroyPipelineLayout, destroy_pipeline_layout)
        }
        b"vkCreateComputePipelines" => {
            entry!(vk::PFN_vkCreateComputePipelines, create_compute_pipelines)
        }
        b"vkDestroyPipeline" => entry!(vk::PFN_vkDestroyPipeline, destroy_pipeline),
        b"vkCreateDescriptorSetLayout" => {
            entry!(vk::PFN_vkCreateDescriptorSetLayout, create_descriptor_set_layout)
        }
        b"vkDestroyDescriptorSetLayout" => {
            entry!(vk::PFN_vkDestroyDescriptorSetLayout, destroy_descriptor_set_layout)
        }
        b"vkCreateDescriptorPool" => entry!(vk::PFN_vkCreateDescriptorPool, create_descriptor_pool),
        b"vkDestroyDescriptorPool" => {
            entry!(vk::PFN_vkDestroyDescriptorPool, destroy_descriptor_pool)
        }
        b"vkAllocateDescriptorSets" => {
            entry!(vk::PFN_vkAllocateDescriptorSets, allocate_descriptor_sets)
        }
        b"vkFreeDescriptorSets" => entry!(vk::PFN_vkFreeDescriptorSets, free_descriptor_sets),
        b"vkCreateDescriptorUpdateTemplate" => {
            entry!(vk::PFN_vkCreateDescriptorUpdateTemplate, create_descriptor_update_template)
        }
        b"vkDestroyDescriptorUpdateTemplate" => {
            entry!(vk::PFN_vkDestroyDescriptorUpdateTemplate, destroy_descriptor_update_template)
        }
        b"vkUpdateDescriptorSetWithTemplate" => {
            entry!(vk::PFN_vkUpdateDescriptorSetWithTemplate, update_descriptor_set_with_template)
        }
        b"vkCreateDeferredOperationKHR" => {
            entry!(vk::PFN_vkCreateDeferredOperationKHR, create_deferred_operation)
        }
        b"vkDestroyDeferredOperationKHR" => {
            entry!(vk::PFN_vkDestroyDeferredOperationKHR, destroy_deferred_operation)
        }
        b"vkDeferredOperationJoinKHR" => {
            entry!(vk::PFN_vkDeferredOperationJoinKHR, deferred_operation_join)
        }
        b"vkGetDeferredOperationResultKHR" => {
            entry!(vk::PFN_vkGetDeferredOperationResultKHR, get_deferred_operation_result)
        }
        b"vkCreateRayTracingPipelinesKHR" => {
            entry!(vk::PFN_vkCreateRayTracingPipelinesKHR, create_ray_tracing_pipelines)
        }
        _ => None,
    }
}

// ── Instance entry points ───────────────────────────────────

unsafe extern "system" fn create_instance(
    _p_create_info: *const vk::InstanceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    let driver = FakeDriver::installed();
    driver.count("vkCreateInstance");
    let instance = driver.dispatchable(None);
    let key = unsafe { (*(instance as *const FakeDispatchable)).loader_data };
    *driver.instance_key.lock() = key;
    *driver.physical_device.lock() = vk::PhysicalDevice::from_raw(driver.dispatchable(Some(key)));
    unsafe { *p_instance = vk::Instance::from_raw(instance) };
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    unsafe { FakeDriver::of(instance) }.count("vkDestroyInstance");
}

unsafe extern "system" fn enumerate_physical_devices(
    instance: vk::Instance,
    p_count: *mut u32,
    p_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(instance) };
    driver.count("vkEnumeratePhysicalDevices");
    if p_devices.is_null() {
        unsafe { *p_count = 1 };
        return vk::Result::SUCCESS;
    }
    if unsafe { *p_count } == 0 {
        return vk::Result::INCOMPLETE;
    }
    unsafe {
        *p_devices = driver.physical_device();
        *p_count = 1;
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn get_physical_device_display_properties(
    physical_device: vk::PhysicalDevice,
    p_count: *mut u32,
    p_properties: *mut vk::DisplayPropertiesKHR<'_>,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(physical_device) };
    driver.count("vkGetPhysicalDeviceDisplayPropertiesKHR");
    if p_properties.is_null() {
        unsafe { *p_count = driver.displays.len() as u32 };
        return vk::Result::SUCCESS;
    }
    let written = (unsafe { *p_count } as usize).min(driver.displays.len());
    for (index, &display) in driver.displays.iter().take(written).enumerate() {
        unsafe {
            *p_properties.add(index) = vk::DisplayPropertiesKHR {
                display: vk::DisplayKHR::from_raw(display),
                ..Default::default()
            };
        }
    }
    unsafe { *p_count = written as u32 };
    if written < driver.displays.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(physical_device) };
    driver.count("vkCreateDevice");
    let info = unsafe { &*p_create_info };
    let names = (0..info.enabled_extension_count as usize).map(|index| {
        unsafe { CStr::from_ptr(*info.pp_enabled_extension_names.add(index)) }
            .to_string_lossy()
            .into_owned()
    });
    *driver.device_extensions.lock() = names.collect();
    unsafe { *p_device = vk::Device::from_raw(driver.dispatchable(None)) };
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_device(device: vk::Device, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    unsafe { FakeDriver::of(device) }.count("vkDestroyDevice");
}

// ── Device entry points ─────────────────────────────────────

macro_rules! fake_create {
    ($fn_name:ident, $info:ty, $handle:ty, $label:literal) => {
        unsafe extern "system" fn $fn_name(
            device: vk::Device,
            _p_create_info: *const $info,
            _p_allocator: *const vk::AllocationCallbacks<'_>,
            p_handle: *mut $handle,
        ) -> vk::Result {
            let driver = unsafe { FakeDriver::of(device) };
            driver.count($label);
            unsafe { *p_handle = <$handle>::from_raw(driver.create()) };
            vk::Result::SUCCESS
        }
    };
}

macro_rules! fake_destroy {
    ($fn_name:ident, $handle:ty, $label:literal) => {
        unsafe extern "system" fn $fn_name(
            device: vk::Device,
            handle: $handle,
            _p_allocator: *const vk::AllocationCallbacks<'_>,
        ) {
            unsafe { FakeDriver::of(device) }.destroy($label, handle.as_raw());
        }
    };
}

fake_create!(create_fence, vk::FenceCreateInfo<'_>, vk::Fence, "vkCreateFence");
fake_create!(create_shader_module, vk::ShaderModuleCreateInfo<'_>, vk::ShaderModule, "vkCreateShaderModule");
fake_create!(
    create_descriptor_set_layout,
    vk::DescriptorSetLayoutCreateInfo<'_>,
    vk::DescriptorSetLayout,
    "vkCreateDescriptorSetLayout"
);
fake_create!(
    create_descriptor_pool,
    vk::DescriptorPoolCreateInfo<'_>,
    vk::DescriptorPool,
    "vkCreateDescriptorPool"
);

fake_destroy!(destroy_buffer, vk::Buffer, "vkDestroyBuffer");
fake_destroy!(destroy_fence, vk::Fence, "vkDestroyFence");
fake_destroy!(destroy_shader_module, vk::ShaderModule, "vkDestroyShaderModule");
fake_destroy!(destroy_pipeline_layout, vk::PipelineLayout, "vkDestroyPipelineLayout");
fake_destroy!(destroy_pipeline, vk::Pipeline, "vkDestroyPipeline");
fake_destroy!(destroy_descriptor_set_layout, vk::DescriptorSetLayout, "vkDestroyDescriptorSetLayout");
fake_destroy!(destroy_descriptor_pool, vk::DescriptorPool, "vkDestroyDescriptorPool");
fake_destroy!(
    destroy_descriptor_update_template,
    vk::DescriptorUpdateTemplate,
    "vkDestroyDescriptorUpdateTemplate"
);

unsafe extern "system" fn create_buffer(
    device: vk::Device,
    p_create_info: *const vk::BufferCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_buffer: *mut vk::Buffer,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkCreateBuffer");
    driver.buffer_usage.lock().push(unsafe { (*p_create_info).usage });
    unsafe { *p_buffer = vk::Buffer::from_raw(driver.create()) };
    vk::Result::SUCCESS
}

unsafe extern "system" fn wait_for_fences(
    device: vk::Device,
    fence_count: u32,
    p_fences: *const vk::Fence,
    _wait_all: vk::Bool32,
    _timeout: u64,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkWaitForFences");
    for fence in unsafe { std::slice::from_raw_parts(p_fences, fence_count as usize) } {
        driver.receive("vkWaitForFences", fence.as_raw());
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn create_pipeline_layout(
    device: vk::Device,
    p_create_info: *const vk::PipelineLayoutCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_layout: *mut vk::PipelineLayout,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkCreatePipelineLayout");
    let info = unsafe { &*p_create_info };
    for layout in unsafe { std::slice::from_raw_parts(info.p_set_layouts, info.set_layout_count as usize) } {
        driver.receive("vkCreatePipelineLayout", layout.as_raw());
    }
    unsafe { *p_layout = vk::PipelineLayout::from_raw(driver.create()) };
    vk::Result::SUCCESS
}

unsafe extern "system" fn create_compute_pipelines(
    device: vk::Device,
    _pipeline_cache: vk::PipelineCache,
    count: u32,
    p_create_infos: *const vk::ComputePipelineCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pipelines: *mut vk::Pipeline,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkCreateComputePipelines");
    let infos = unsafe { std::slice::from_raw_parts(p_create_infos, count as usize) };
    for (index, info) in infos.iter().enumerate() {
        driver.receive("vkCreateComputePipelines", info.stage.module.as_raw());
        driver.receive("vkCreateComputePipelines", info.layout.as_raw());
        unsafe { *p_pipelines.add(index) = vk::Pipeline::from_raw(driver.create()) };
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn allocate_descriptor_sets(
    device: vk::Device,
    p_allocate_info: *const vk::DescriptorSetAllocateInfo<'_>,
    p_sets: *mut vk::DescriptorSet,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkAllocateDescriptorSets");
    let info = unsafe { &*p_allocate_info };
    driver.receive("vkAllocateDescriptorSets", info.descriptor_pool.as_raw());
    let layouts = unsafe { std::slice::from_raw_parts(info.p_set_layouts, info.descriptor_set_count as usize) };
    for (index, layout) in layouts.iter().enumerate() {
        driver.receive("vkAllocateDescriptorSets", layout.as_raw());
        unsafe { *p_sets.add(index) = vk::DescriptorSet::from_raw(driver.create()) };
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn free_descriptor_sets(
    device: vk::Device,
    pool: vk::DescriptorPool,
    count: u32,
    p_sets: *const vk::DescriptorSet,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.receive("vkFreeDescriptorSets", pool.as_raw());
    for set in unsafe { std::slice::from_raw_parts(p_sets, count as usize) } {
        driver.destroy("vkFreeDescriptorSets", set.as_raw());
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn create_descriptor_update_template(
    device: vk::Device,
    p_create_info: *const vk::DescriptorUpdateTemplateCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_template: *mut vk::DescriptorUpdateTemplate,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkCreateDescriptorUpdateTemplate");
    let info = unsafe { &*p_create_info };
    driver.receive("vkCreateDescriptorUpdateTemplate", info.descriptor_set_layout.as_raw());
    let entries = unsafe {
        std::slice::from_raw_parts(info.p_descriptor_update_entries, info.descriptor_update_entry_count as usize)
    };
    let raw = driver.create();
    driver.templates.lock().insert(raw, entries.to_vec());
    unsafe { *p_template = vk::DescriptorUpdateTemplate::from_raw(raw) };
    vk::Result::SUCCESS
}

/// Reads back the buffer handles in the blob, as a driver would.
unsafe extern "system" fn update_descriptor_set_with_template(
    device: vk::Device,
    set: vk::DescriptorSet,
    template: vk::DescriptorUpdateTemplate,
    p_data: *const c_void,
) {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkUpdateDescriptorSetWithTemplate");
    driver.receive("vkUpdateDescriptorSetWithTemplate", set.as_raw());
    driver.receive("vkUpdateDescriptorSetWithTemplate", template.as_raw());
    let entries = driver.templates.lock().get(&template.as_raw()).cloned().unwrap_or_default();
    for entry in entries {
        if entry.descriptor_type != vk::DescriptorType::STORAGE_BUFFER
            && entry.descriptor_type != vk::DescriptorType::UNIFORM_BUFFER
        {
            continue;
        }
        for index in 0..entry.descriptor_count as usize {
            let info = unsafe {
                p_data
                    .cast::<u8>()
                    .add(entry.offset + index * entry.stride)
                    .cast::<vk::DescriptorBufferInfo>()
                    .read_unaligned()
            };
            driver.receive("template buffer", info.buffer.as_raw());
        }
    }
}

unsafe extern "system" fn create_deferred_operation(
    device: vk::Device,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_operation: *mut vk::DeferredOperationKHR,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkCreateDeferredOperationKHR");
    let raw = driver.create();
    driver.operations.lock().insert(raw, FakeOperation::default());
    unsafe { *p_operation = vk::DeferredOperationKHR::from_raw(raw) };
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_deferred_operation(
    device: vk::Device,
    operation: vk::DeferredOperationKHR,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let driver = unsafe { FakeDriver::of(device) };
    driver.operations.lock().remove(&operation.as_raw());
    driver.destroy("vkDestroyDeferredOperationKHR", operation.as_raw());
}

unsafe extern "system" fn deferred_operation_join(device: vk::Device, operation: vk::DeferredOperationKHR) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkDeferredOperationJoinKHR");
    driver.receive("vkDeferredOperationJoinKHR", operation.as_raw());
    driver.finish(operation.as_raw())
}

unsafe extern "system" fn get_deferred_operation_result(
    device: vk::Device,
    operation: vk::DeferredOperationKHR,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkGetDeferredOperationResultKHR");
    match driver.operations.lock().get(&operation.as_raw()) {
        Some(state) if state.complete => state.outcome.unwrap_or(vk::Result::SUCCESS),
        Some(_) => vk::Result::NOT_READY,
        None => vk::Result::ERROR_UNKNOWN,
    }
}

unsafe extern "system" fn create_ray_tracing_pipelines(
    device: vk::Device,
    operation: vk::DeferredOperationKHR,
    _pipeline_cache: vk::PipelineCache,
    count: u32,
    p_create_infos: *const vk::RayTracingPipelineCreateInfoKHR<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pipelines: *mut vk::Pipeline,
) -> vk::Result {
    let driver = unsafe { FakeDriver::of(device) };
    driver.count("vkCreateRayTracingPipelinesKHR");
    driver.receive("vkCreateRayTracingPipelinesKHR", operation.as_raw());
    let infos = unsafe { std::slice::from_raw_parts(p_create_infos, count as usize) };
    for info in infos {
        driver.receive("vkCreateRayTracingPipelinesKHR", info.layout.as_raw());
    }

    if operation != vk::DeferredOperationKHR::null() && driver.defer_ray_tracing.load(Ordering::SeqCst) {
        if let Some(state) = driver.operations.lock().get_mut(&operation.as_raw()) {
            state.complete = false;
            state.pending = Some(PendingPipelines {
                outputs: p_pipelines as usize,
                count: count as usize,
                create_infos: p_create_infos as usize,
            });
            return vk::Result::OPERATION_DEFERRED_KHR;
        }
    }
    for index in 0..count as usize {
        unsafe { *p_pipelines.add(index) = vk::Pipeline::from_raw(driver.create()) };
    }
    vk::Result::SUCCESS
}

// ── Journaling validators ───────────────────────────────────

pub type Journal = Arc<Mutex<Vec<String>>>;

/// Logs every hook it runs as `"<tag> <phase> <call>"` and vetoes the calls
/// named in `veto`.
pub struct Recorder {
    pub tag: &'static str,
    pub journal: Journal,
    pub veto: Vec<&'static str>,
    /// Handles seen by post-call hooks, per call
    pub outputs: Vec<(&'static str, String)>,
}

impl Recorder {
    pub fn new(tag: &'static str, journal: &Journal) -> Self {
        Self {
            tag,
            journal: Arc::clone(journal),
            veto: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn vetoing(mut self, call: &'static str) -> Self {
        self.veto.push(call);
        self
    }
}

impl Validator for Recorder {
    fn intercepts(hooks: &mut Hooks<'_, Self>) {
        use vkchain_layer::{descriptor, device, instance, memory, pipeline, sync};
        hooks
            .on::<instance::CreateDevice>()
            .on::<instance::GetPhysicalDeviceDisplayProperties>()
            .on::<device::DestroyDevice>()
            .on::<memory::CreateBuffer>()
            .on::<memory::DestroyBuffer>()
            .on::<sync::CreateFence>()
            .on::<sync::WaitForFences>()
            .on::<pipeline::CreateShaderModule>()
            .on::<pipeline::CreateComputePipelines>()
            .on::<descriptor::CreateDescriptorSetLayout>()
            .on::<descriptor::UpdateDescriptorSetWithTemplate>();
    }
}

impl<C: Call> Intercept<C> for Recorder
where
    C::Output: std::fmt::Debug,
{
    fn validate(&self, _args: &C::Args<'_>, _state: &mut C::State) -> bool {
        self.journal.lock().push(format!("{} validate {}", self.tag, C::NAME));
        self.veto.contains(&C::NAME)
    }

    fn pre_record(v: &mut Recording<'_, Self>, _args: &C::Args<'_>, _state: &mut C::State) {
        v.journal.lock().push(format!("{} pre {}", v.tag, C::NAME));
    }

    fn post_record(v: &mut Recording<'_, Self>, _args: &C::Args<'_>, _state: &mut C::State, output: &C::Output) {
        v.journal.lock().push(format!("{} post {}", v.tag, C::NAME));
        let entry = (C::NAME, format!("{output:?}"));
        v.outputs.push(entry);
    }
}

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Registry whose only factory builds a validator into `scope`'s chains.
pub fn registry<V, F>(scope: Scope, kind: ValidatorKind, make: F) -> ValidatorRegistry
where
    V: Validator,
    F: Fn(&ValidatorContext) -> V + Send + Sync + 'static,
{
    let mut registry = ValidatorRegistry::new();
    registry.register(kind, move |builder, kind, ctx| {
        if ctx.scope == scope {
            builder.push(kind, make(ctx));
        }
    });
    registry
}

// ── Harness ─────────────────────────────────────────────────

/// A chassis with one instance and one device created on the fake driver.
pub struct Harness {
    pub driver: &'static FakeDriver,
    pub chassis: Chassis,
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
}

impl Harness {
    pub fn new(settings: LayerSettings, validators: ValidatorRegistry) -> Self {
        Self::with_device_extensions(settings, validators, &[])
    }

    pub fn with_device_extensions(
        settings: LayerSettings,
        validators: ValidatorRegistry,
        extensions: &[&CStr],
    ) -> Self {
        Self::build(settings, validators, &vk::InstanceCreateInfo::default(), extensions)
    }

    /// Creates the instance from `instance_info`, `pNext` chain included.
    pub fn with_instance_info(
        settings: LayerSettings,
        validators: ValidatorRegistry,
        instance_info: &vk::InstanceCreateInfo<'_>,
    ) -> Self {
        Self::build(settings, validators, instance_info, &[])
    }

    fn build(
        settings: LayerSettings,
        validators: ValidatorRegistry,
        instance_info: &vk::InstanceCreateInfo<'_>,
        extensions: &[&CStr],
    ) -> Self {
        let driver = FakeDriver::new();
        driver.install();
        let chassis = Chassis::new(settings, validators);

        let mut instance = vk::Instance::null();
        let result = unsafe {
            chassis.create_instance(instance_info, std::ptr::null(), &mut instance, get_instance_proc_addr)
        };
        assert_eq!(result, vk::Result::SUCCESS);

        let instance_ctx = unsafe { chassis.instance(instance) }.unwrap();
        let mut count = 1;
        let mut physical_device = vk::PhysicalDevice::null();
        let result = unsafe { instance_ctx.enumerate_physical_devices(&mut count, &mut physical_device) };
        assert_eq!(result, vk::Result::SUCCESS);

        let names: Vec<*const c_char> = extensions.iter().map(|name| name.as_ptr()).collect();
        let device_info = vk::DeviceCreateInfo::default().enabled_extension_names(&names);
        let mut device = vk::Device::null();
        let result =
            unsafe { chassis.create_device(physical_device, &device_info, std::ptr::null(), &mut device) };
        assert_eq!(result, vk::Result::SUCCESS);

        Self {
            driver,
            chassis,
            instance,
            physical_device,
            device,
        }
    }

    pub fn instance_ctx(&self) -> Arc<InstanceContext> {
        unsafe { self.chassis.instance(self.instance) }.unwrap()
    }

    pub fn device_ctx(&self) -> Arc<DeviceContext> {
        unsafe { self.chassis.device(self.device) }.unwrap()
    }

    pub fn teardown(&self) {
        unsafe {
            self.chassis.destroy_device(self.device, std::ptr::null());
            self.chassis.destroy_instance(self.instance, std::ptr::null());
        }
    }

    pub fn create_buffer(&self) -> vk::Buffer {
        let info = vk::BufferCreateInfo::default()
            .size(256)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER);
        let mut buffer = vk::Buffer::null();
        let result = unsafe { self.device_ctx().create_buffer(&info, std::ptr::null(), &mut buffer) };
        assert_eq!(result, vk::Result::SUCCESS);
        buffer
    }
}

pub fn no_wrapping() -> LayerSettings {
    LayerSettings {
        disables: vec![vkchain_core::config::DisableCheck::HandleWrapping],
        ..Default::default()
    }
}
