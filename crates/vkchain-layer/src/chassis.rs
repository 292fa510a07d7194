//! The layer's context object.
//!
//! A [`Chassis`] owns everything the layer shares across instances: the
//! handle and deferred-operation registries, the validator factories, and the
//! per-instance and per-device contexts keyed by dispatch key. Entry points
//! reach it by reference, so independent chassis can coexist in a process.
//! The registries live from the first instance's creation to the last
//! instance's destruction, when they are cleared.

use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::vk::{self, Handle};
use dashmap::DashMap;
use parking_lot::Mutex;
use vkchain_core::config::default_settings_path;
use vkchain_core::{
    DebugReport, DeferredOperationRegistry, DisplayMap, HandleRegistry, LayerSettings,
    ValidationChecks,
};

use crate::call::{raw_slice, read_string_array, Call};
use crate::device::{DestroyDevice, DeviceContext};
use crate::dispatch::{load_entry, DeviceDispatchTable, DispatchKey, InstanceDispatchTable};
use crate::error::LayerError;
use crate::factory::{Scope, ValidatorContext, ValidatorRegistry};
use crate::instance::{
    p_next_chain, CreateDevice, CreateDeviceArgs, CreateInstance, CreateInstanceArgs,
    DestroyInstance, DestroyInstanceArgs, InstanceContext,
};
use crate::messenger::{chained_messengers, messenger_callback};

pub struct Chassis {
    settings: LayerSettings,
    validators: ValidatorRegistry,
    handles: Arc<HandleRegistry>,
    deferred: Arc<DeferredOperationRegistry>,
    instances: DashMap<DispatchKey, Arc<InstanceContext>>,
    devices: DashMap<DispatchKey, Arc<DeviceContext>>,
    /// Guards the registries' lifetime across instance creation and destruction.
    live_instances: Mutex<usize>,
}

impl Chassis {
    pub fn new(settings: LayerSettings, validators: ValidatorRegistry) -> Self {
        Self {
            settings,
            validators,
            handles: Arc::new(HandleRegistry::new()),
            deferred: Arc::new(DeferredOperationRegistry::new()),
            instances: DashMap::new(),
            devices: DashMap::new(),
            live_instances: Mutex::new(0),
        }
    }

    /// A chassis configured from the settings file, if there is one. Also
    /// installs the layer's log subscriber unless the host has its own.
    pub fn from_default_settings(validators: ValidatorRegistry) -> Self {
        vkchain_common::logging::init_logging();
        let path = default_settings_path();
        tracing::debug!(
            path = %path,
            platform = vkchain_common::platform::platform_name(),
            "loading layer settings"
        );
        Self::new(LayerSettings::load_or_default(&path), validators)
    }

    pub fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    pub fn deferred(&self) -> &Arc<DeferredOperationRegistry> {
        &self.deferred
    }

    pub fn live_instances(&self) -> usize {
        *self.live_instances.lock()
    }

    /// The instance context `dispatchable` (an instance or physical device) belongs to.
    ///
    /// # Safety
    /// `dispatchable` must be null or a live dispatchable object.
    pub unsafe fn instance<H: Handle>(&self, dispatchable: H) -> Result<Arc<InstanceContext>, LayerError> {
        let key = unsafe { DispatchKey::of(dispatchable) };
        self.instances
            .get(&key)
            .map(|context| Arc::clone(context.value()))
            .ok_or(LayerError::UnknownInstance(key))
    }

    /// The device context `dispatchable` (a device, queue or command buffer) belongs to.
    ///
    /// # Safety
    /// `dispatchable` must be null or a live dispatchable object.
    pub unsafe fn device<H: Handle>(&self, dispatchable: H) -> Result<Arc<DeviceContext>, LayerError> {
        let key = unsafe { DispatchKey::of(dispatchable) };
        self.devices
            .get(&key)
            .map(|context| Arc::clone(context.value()))
            .ok_or(LayerError::UnknownDevice(key))
    }

    // ── Instance ────────────────────────────────────────────

    /// Merge the settings file, the environment and the create info's
    /// `pNext` chain into the checks an instance is created with.
    ///
    /// # Safety
    /// The `pNext` chain of `create_info` must be valid.
    pub unsafe fn instance_checks(
        &self,
        create_info: &vk::InstanceCreateInfo<'_>,
    ) -> Result<ValidationChecks, LayerError> {
        let mut checks = self.settings.checks();
        checks.apply_env()?;
        for base in unsafe { p_next_chain(create_info.p_next) } {
            match unsafe { (*base).s_type } {
                vk::StructureType::VALIDATION_FEATURES_EXT => {
                    let features = unsafe { &*base.cast::<vk::ValidationFeaturesEXT<'_>>() };
                    checks.apply_validation_features(
                        unsafe {
                            raw_slice(
                                features.p_enabled_validation_features,
                                features.enabled_validation_feature_count,
                            )
                        },
                        unsafe {
                            raw_slice(
                                features.p_disabled_validation_features,
                                features.disabled_validation_feature_count,
                            )
                        },
                    );
                }
                vk::StructureType::VALIDATION_FLAGS_EXT => {
                    let flags = unsafe { &*base.cast::<vk::ValidationFlagsEXT<'_>>() };
                    checks.apply_validation_flags(unsafe {
                        raw_slice(flags.p_disabled_validation_checks, flags.disabled_validation_check_count)
                    });
                }
                _ => {}
            }
        }
        Ok(checks)
    }

    /// `vkCreateInstance`, calling down through `next_get_instance_proc_addr`.
    ///
    /// # Safety
    /// Parameters as for `vkCreateInstance`; `next_get_instance_proc_addr`
    /// must resolve the next layer's entry points.
    pub unsafe fn create_instance(
        &self,
        p_create_info: *const vk::InstanceCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_instance: *mut vk::Instance,
        next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return rejected(CreateInstance::NAME, LayerError::NullPointer("pCreateInfo"));
        };
        if p_instance.is_null() {
            return rejected(CreateInstance::NAME, LayerError::NullPointer("pInstance"));
        }
        let create_name: &CStr = c"vkCreateInstance";
        if unsafe { next_get_instance_proc_addr(vk::Instance::null(), create_name.as_ptr()) }.is_none() {
            return rejected(
                CreateInstance::NAME,
                LayerError::MissingEntryPoint(CreateInstance::NAME),
            );
        }

        let report = Arc::new(DebugReport::new(&self.settings));
        for info in unsafe { chained_messengers(create_info.p_next) } {
            if let Some(callback) = messenger_callback(info) {
                report.register_callback(callback);
            }
        }
        let checks = match unsafe { self.instance_checks(create_info) } {
            Ok(checks) => checks,
            Err(error) => {
                report.internal_error(CreateInstance::NAME, &error);
                self.settings.checks()
            }
        };
        let enabled_extensions: Arc<[String]> = unsafe {
            read_string_array(
                create_info.pp_enabled_extension_names,
                create_info.enabled_extension_count,
            )
        }
        .into();

        let chain = self.validators.build_chain(&ValidatorContext {
            scope: Scope::Instance,
            checks,
            enabled_extensions: Arc::clone(&enabled_extensions),
            report: Arc::clone(&report),
            handles: Arc::clone(&self.handles),
            deferred: Arc::clone(&self.deferred),
            device: None,
        });

        let args = CreateInstanceArgs {
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = chain.intercept::<CreateInstance>(&args, |_| {
            let entry = unsafe { load_entry(next_get_instance_proc_addr) };
            let mut instance = vk::Instance::null();
            match unsafe { (entry.create_instance)(create_info, p_allocator, &mut instance) } {
                vk::Result::SUCCESS => Ok(instance),
                error => Err(error),
            }
        });
        let instance = match output {
            Ok(instance) => instance,
            Err(error) => return error,
        };

        let table = unsafe { InstanceDispatchTable::load(instance, next_get_instance_proc_addr) };
        let context = Arc::new(InstanceContext {
            table: Arc::new(table),
            chain,
            checks,
            enabled_extensions,
            report,
            handles: Arc::clone(&self.handles),
            displays: DisplayMap::new(),
        });
        let key = unsafe { DispatchKey::of(instance) };
        {
            let mut live = self.live_instances.lock();
            *live += 1;
            self.instances.insert(key, Arc::clone(&context));
        }
        tracing::info!(
            instance = instance.as_raw(),
            validators = ?context.chain.kinds(),
            wraps_handles = checks.wraps_handles(),
            "instance created"
        );

        unsafe { *p_instance = instance };
        vk::Result::SUCCESS
    }

    /// # Safety
    /// Parameters as for `vkDestroyInstance`.
    pub unsafe fn destroy_instance(
        &self,
        instance: vk::Instance,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        if instance == vk::Instance::null() {
            return;
        }
        let key = unsafe { DispatchKey::of(instance) };
        let Some((_, context)) = self.instances.remove(&key) else {
            tracing::warn!(instance = instance.as_raw(), "vkDestroyInstance on an unknown instance");
            return;
        };

        let args = DestroyInstanceArgs {
            instance,
            allocator: unsafe { p_allocator.as_ref() },
        };
        context.chain.intercept::<DestroyInstance>(&args, |_| unsafe {
            (context.table.core.destroy_instance)(context.table.handle, p_allocator)
        });
        context.release_displays();

        let mut live = self.live_instances.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            tracing::debug!(
                handles = self.handles.len(),
                deferred = self.deferred.len(),
                "last instance destroyed, clearing registries"
            );
            self.handles.clear();
            self.deferred.clear();
        }
    }

    // ── Device ──────────────────────────────────────────────

    /// # Safety
    /// Parameters as for `vkCreateDevice`.
    pub unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        p_create_info: *const vk::DeviceCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_device: *mut vk::Device,
    ) -> vk::Result {
        let instance = match unsafe { self.instance(physical_device) } {
            Ok(instance) => instance,
            Err(error) => {
                tracing::error!(%error, "vkCreateDevice on an unknown physical device");
                return error.as_vk_result();
            }
        };
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return instance.fail(CreateDevice::NAME, LayerError::NullPointer("pCreateInfo"));
        };
        if p_device.is_null() {
            return instance.fail(CreateDevice::NAME, LayerError::NullPointer("pDevice"));
        }

        let args = CreateDeviceArgs {
            physical_device,
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let mut enabled_extensions = Vec::new();
        let output = instance.chain.intercept::<CreateDevice>(&args, |state| {
            let mut info = *create_info;
            if let Some(features) = &state.enabled_features {
                info.p_enabled_features = features;
            }

            let requested = unsafe {
                raw_slice(create_info.pp_enabled_extension_names, create_info.enabled_extension_count)
            };
            let mut names: Vec<*const c_char> = requested.to_vec();
            for extra in &state.extra_extensions {
                let already = requested
                    .iter()
                    .any(|&name| !name.is_null() && unsafe { CStr::from_ptr(name) } == extra.as_c_str());
                if !already {
                    names.push(extra.as_ptr());
                }
            }
            info.enabled_extension_count = names.len() as u32;
            info.pp_enabled_extension_names = names.as_ptr();
            enabled_extensions = unsafe { read_string_array(names.as_ptr(), names.len() as u32) };

            let mut device = vk::Device::null();
            match unsafe {
                (instance.table.core.create_device)(physical_device, &info, p_allocator, &mut device)
            } {
                vk::Result::SUCCESS => Ok(device),
                error => Err(error),
            }
        });
        let device = match output {
            Ok(device) => device,
            Err(error) => return error,
        };

        let table = Arc::new(unsafe {
            DeviceDispatchTable::load(device, instance.table.core.get_device_proc_addr)
        });
        let enabled_extensions: Arc<[String]> = enabled_extensions.into();
        let chain = self.validators.build_chain(&ValidatorContext {
            scope: Scope::Device,
            checks: instance.checks,
            enabled_extensions: Arc::clone(&enabled_extensions),
            report: Arc::clone(&instance.report),
            handles: Arc::clone(&self.handles),
            deferred: Arc::clone(&self.deferred),
            device: Some(Arc::clone(&table)),
        });
        let context = Arc::new(DeviceContext {
            physical_device,
            checks: instance.checks,
            report: Arc::clone(&instance.report),
            instance,
            table,
            chain,
            enabled_extensions,
            handles: Arc::clone(&self.handles),
            deferred: Arc::clone(&self.deferred),
            templates: DashMap::new(),
            pool_sets: DashMap::new(),
        });
        self.devices.insert(unsafe { DispatchKey::of(device) }, context);
        tracing::info!(device = device.as_raw(), "device created");

        unsafe { *p_device = device };
        vk::Result::SUCCESS
    }

    /// # Safety
    /// Parameters as for `vkDestroyDevice`.
    pub unsafe fn destroy_device(&self, device: vk::Device, p_allocator: *const vk::AllocationCallbacks<'_>) {
        if device == vk::Device::null() {
            return;
        }
        let key = unsafe { DispatchKey::of(device) };
        let Some((_, context)) = self.devices.remove(&key) else {
            tracing::warn!(device = device.as_raw(), "vkDestroyDevice on an unknown device");
            return;
        };
        let args = crate::call::DestroyArgs {
            device,
            handle: device,
            allocator: unsafe { p_allocator.as_ref() },
        };
        context.chain.intercept::<DestroyDevice>(&args, |_| unsafe {
            (context.table.core.destroy_device)(context.table.handle, p_allocator)
        });
    }
}

/// Fail an entry point that has no instance, and so no debug report, yet.
fn rejected(entry_point: &'static str, error: LayerError) -> vk::Result {
    tracing::error!(entry_point, %error, "internal error");
    error.as_vk_result()
}

impl std::fmt::Debug for Chassis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chassis")
            .field("instances", &self.instances.len())
            .field("devices", &self.devices.len())
            .field("handles", &self.handles.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
