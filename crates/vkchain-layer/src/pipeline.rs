//! Shader module, pipeline layout and pipeline entry points.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::call::{raw_slice, vk_call, Call, CreateArgs, DestroyArgs};
use crate::device::{write_out, DeviceContext};
use crate::error::LayerError;
use crate::instance::Produced;

// ── Shader modules ──────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CreateShaderModuleState {
    /// SPIR-V to create the module from instead of the application's.
    pub replacement_code: Option<Vec<u32>>,
}

vk_call!(
    CreateShaderModule<'a> = "vkCreateShaderModule",
    CreateArgs<'a, vk::ShaderModuleCreateInfo<'a>>,
    CreateShaderModuleState,
    VkResult<vk::ShaderModule>
);

vk_call!(
    DestroyShaderModule<'a> = "vkDestroyShaderModule",
    DestroyArgs<'a, vk::ShaderModule>,
    (),
    ()
);

// ── Pipeline layouts ────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CreatePipelineLayoutState {
    /// Set layouts (wrapped) to create the layout with instead of the
    /// application's, e.g. with a reserved set appended.
    pub set_layouts: Option<Vec<vk::DescriptorSetLayout>>,
}

vk_call!(
    CreatePipelineLayout<'a> = "vkCreatePipelineLayout",
    CreateArgs<'a, vk::PipelineLayoutCreateInfo<'a>>,
    CreatePipelineLayoutState,
    VkResult<vk::PipelineLayout>
);

vk_call!(
    DestroyPipelineLayout<'a> = "vkDestroyPipelineLayout",
    DestroyArgs<'a, vk::PipelineLayout>,
    (),
    ()
);

// ── Compute pipelines ───────────────────────────────────────

pub struct CreateComputePipelinesArgs<'a> {
    pub device: vk::Device,
    pub pipeline_cache: vk::PipelineCache,
    pub create_infos: &'a [vk::ComputePipelineCreateInfo<'a>],
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

#[derive(Debug, Default)]
pub struct CreateComputePipelinesState {
    /// Create info index -> shader module (wrapped) to use instead of the
    /// application's.
    pub module_overrides: Vec<(usize, vk::ShaderModule)>,
}

vk_call!(
    CreateComputePipelines<'a> = "vkCreateComputePipelines",
    CreateComputePipelinesArgs<'a>,
    CreateComputePipelinesState,
    Produced<vk::Pipeline>
);

vk_call!(
    DestroyPipeline<'a> = "vkDestroyPipeline",
    DestroyArgs<'a, vk::Pipeline>,
    (),
    ()
);

// ── Ray-tracing pipelines ───────────────────────────────────

pub struct CreateRayTracingPipelinesArgs<'a> {
    pub device: vk::Device,
    pub deferred_operation: vk::DeferredOperationKHR,
    pub pipeline_cache: vk::PipelineCache,
    pub create_infos: &'a [vk::RayTracingPipelineCreateInfoKHR<'a>],
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

vk_call!(
    /// When the driver defers the creation, post-call hooks see
    /// `OPERATION_DEFERRED_KHR` and no handles; the pipelines reach
    /// post-check continuations registered under the deferred operation.
    CreateRayTracingPipelines<'a> = "vkCreateRayTracingPipelinesKHR",
    CreateRayTracingPipelinesArgs<'a>,
    (),
    Produced<vk::Pipeline>
);

/// Unwrapped copies of ray-tracing create infos. A deferred creation may
/// read them until the operation completes, so they live that long.
struct RayTracingCreateInfos {
    infos: Vec<vk::RayTracingPipelineCreateInfoKHR<'static>>,
    _stages: Vec<Box<[vk::PipelineShaderStageCreateInfo<'static>]>>,
    _libraries: Vec<Box<(vk::PipelineLibraryCreateInfoKHR<'static>, Box<[vk::Pipeline]>)>>,
}

// SAFETY: the pointers only reach heap blocks owned by this value.
unsafe impl Send for RayTracingCreateInfos {}

/// The application's output array, filled in by the driver once a deferred
/// creation completes.
struct PipelineOutputs(*mut vk::Pipeline, usize);

// SAFETY: the application keeps the array alive until the operation completes.
unsafe impl Send for PipelineOutputs {}

impl PipelineOutputs {
    /// # Safety
    /// The array must be valid and not otherwise accessed for `'a`.
    unsafe fn into_slice<'a>(self) -> &'a mut [vk::Pipeline] {
        unsafe { std::slice::from_raw_parts_mut(self.0, self.1) }
    }
}

impl DeviceContext {
    /// # Safety
    /// Parameters as for `vkCreateShaderModule`.
    pub unsafe fn create_shader_module(
        &self,
        p_create_info: *const vk::ShaderModuleCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_shader_module: *mut vk::ShaderModule,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return self.fail(CreateShaderModule::NAME, LayerError::NullPointer("pCreateInfo"));
        };
        let args = CreateArgs {
            device: self.handle(),
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateShaderModule>(&args, |state| {
            let mut info = *create_info;
            if let Some(code) = &state.replacement_code {
                info.code_size = std::mem::size_of_val(code.as_slice());
                info.p_code = code.as_ptr();
            }
            self.create_wrapped(|p_real| unsafe {
                (self.table.core.create_shader_module)(self.table.handle, &info, p_allocator, p_real)
            })
        });
        unsafe { write_out(p_shader_module, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyShaderModule`.
    pub unsafe fn destroy_shader_module(
        &self,
        shader_module: vk::ShaderModule,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyShaderModule, _>(shader_module, p_allocator, |real| {
                (self.table.core.destroy_shader_module)(self.table.handle, real, p_allocator)
            });
        }
    }

    /// # Safety
    /// Parameters as for `vkCreatePipelineLayout`.
    pub unsafe fn create_pipeline_layout(
        &self,
        p_create_info: *const vk::PipelineLayoutCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_pipeline_layout: *mut vk::PipelineLayout,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return self.fail(CreatePipelineLayout::NAME, LayerError::NullPointer("pCreateInfo"));
        };
        let args = CreateArgs {
            device: self.handle(),
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreatePipelineLayout>(&args, |state| {
            let set_layouts = state.set_layouts.as_deref().unwrap_or(unsafe {
                raw_slice(create_info.p_set_layouts, create_info.set_layout_count)
            });
            let real: Vec<vk::DescriptorSetLayout> =
                set_layouts.iter().map(|&layout| self.unwrap(layout)).collect();
            let mut info = *create_info;
            info.set_layout_count = real.len() as u32;
            info.p_set_layouts = real.as_ptr();
            self.create_wrapped(|p_real| unsafe {
                (self.table.core.create_pipeline_layout)(self.table.handle, &info, p_allocator, p_real)
            })
        });
        unsafe { write_out(p_pipeline_layout, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyPipelineLayout`.
    pub unsafe fn destroy_pipeline_layout(
        &self,
        pipeline_layout: vk::PipelineLayout,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyPipelineLayout, _>(pipeline_layout, p_allocator, |real| {
                (self.table.core.destroy_pipeline_layout)(self.table.handle, real, p_allocator)
            });
        }
    }

    /// # Safety
    /// Parameters as for `vkCreateComputePipelines`.
    pub unsafe fn create_compute_pipelines(
        &self,
        pipeline_cache: vk::PipelineCache,
        create_info_count: u32,
        p_create_infos: *const vk::ComputePipelineCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_pipelines: *mut vk::Pipeline,
    ) -> vk::Result {
        if p_pipelines.is_null() && create_info_count > 0 {
            return self.fail(CreateComputePipelines::NAME, LayerError::NullPointer("pPipelines"));
        }
        let create_infos = unsafe { raw_slice(p_create_infos, create_info_count) };
        let args = CreateComputePipelinesArgs {
            device: self.handle(),
            pipeline_cache,
            create_infos,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateComputePipelines>(&args, |state| {
            let mut infos: Vec<vk::ComputePipelineCreateInfo<'_>> = create_infos.to_vec();
            for &(index, module) in &state.module_overrides {
                if let Some(info) = infos.get_mut(index) {
                    info.stage.module = module;
                }
            }
            for info in &mut infos {
                info.stage.module = self.unwrap(info.stage.module);
                info.layout = self.unwrap(info.layout);
                info.base_pipeline_handle = self.unwrap(info.base_pipeline_handle);
            }
            let result = unsafe {
                (self.table.core.create_compute_pipelines)(
                    self.table.handle,
                    pipeline_cache,
                    infos.len() as u32,
                    infos.as_ptr(),
                    p_allocator,
                    p_pipelines,
                )
            };
            let handles = unsafe { self.wrap_pipelines_in_place(p_pipelines, infos.len()) };
            Produced { result, handles }
        });
        output.result
    }

    /// # Safety
    /// Parameters as for `vkDestroyPipeline`.
    pub unsafe fn destroy_pipeline(
        &self,
        pipeline: vk::Pipeline,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyPipeline, _>(pipeline, p_allocator, |real| {
                (self.table.core.destroy_pipeline)(self.table.handle, real, p_allocator)
            });
        }
    }

    /// # Safety
    /// Parameters as for `vkCreateRayTracingPipelinesKHR`. With a deferred
    /// operation, the create infos and `p_pipelines` must stay valid until
    /// the operation completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn create_ray_tracing_pipelines_khr(
        &self,
        deferred_operation: vk::DeferredOperationKHR,
        pipeline_cache: vk::PipelineCache,
        create_info_count: u32,
        p_create_infos: *const vk::RayTracingPipelineCreateInfoKHR<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_pipelines: *mut vk::Pipeline,
    ) -> vk::Result {
        if p_pipelines.is_null() && create_info_count > 0 {
            return self.fail(
                CreateRayTracingPipelines::NAME,
                LayerError::NullPointer("pPipelines"),
            );
        }
        let create_infos = unsafe { raw_slice(p_create_infos, create_info_count) };
        let args = CreateRayTracingPipelinesArgs {
            device: self.handle(),
            deferred_operation,
            pipeline_cache,
            create_infos,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateRayTracingPipelines>(&args, |_| {
            let local = unsafe { self.unwrap_ray_tracing_infos(create_infos) };
            let result = unsafe {
                (self.table.ray_tracing_pipeline.create_ray_tracing_pipelines_khr)(
                    self.table.handle,
                    self.unwrap(deferred_operation),
                    pipeline_cache,
                    local.infos.len() as u32,
                    local.infos.as_ptr(),
                    p_allocator,
                    p_pipelines,
                )
            };

            if result == vk::Result::OPERATION_DEFERRED_KHR {
                self.wrap_when_complete(deferred_operation, local, PipelineOutputs(p_pipelines, create_infos.len()));
                return Produced {
                    result,
                    handles: Vec::new(),
                };
            }
            let handles = unsafe { self.wrap_pipelines_in_place(p_pipelines, create_infos.len()) };
            Produced { result, handles }
        });
        output.result
    }

    /// Wrap the non-null pipelines the driver wrote to `p_pipelines`.
    ///
    /// # Safety
    /// `p_pipelines` must be null or valid for `count` elements.
    unsafe fn wrap_pipelines_in_place(&self, p_pipelines: *mut vk::Pipeline, count: usize) -> Vec<vk::Pipeline> {
        if p_pipelines.is_null() {
            return Vec::new();
        }
        let pipelines = unsafe { std::slice::from_raw_parts_mut(p_pipelines, count) };
        for pipeline in pipelines.iter_mut() {
            *pipeline = self.wrap(*pipeline);
        }
        pipelines.to_vec()
    }

    /// Queue wrapping of a deferred creation's pipelines, to run when
    /// `operation` is observed complete. The wrapped pipelines become the
    /// operation's results.
    fn wrap_when_complete(
        &self,
        operation: vk::DeferredOperationKHR,
        local: RayTracingCreateInfos,
        outputs: PipelineOutputs,
    ) {
        let handles = Arc::clone(&self.handles);
        let deferred = Arc::clone(&self.deferred);
        let wraps = self.checks.wraps_handles();
        let key = operation.as_raw();

        self.deferred.register_completion(key, move || {
            let pipelines = unsafe { outputs.into_slice() };
            if wraps {
                for pipeline in pipelines.iter_mut() {
                    *pipeline = handles.wrap(*pipeline);
                }
            }
            let results: Vec<u64> = pipelines.iter().map(|pipeline| pipeline.as_raw()).collect();
            deferred.record_results(key, &results);
            drop(local);
        });
        tracing::trace!(operation = key, "deferred ray-tracing pipeline creation");
    }

    /// # Safety
    /// Every pointer inside `infos` must be valid.
    unsafe fn unwrap_ray_tracing_infos(
        &self,
        infos: &[vk::RayTracingPipelineCreateInfoKHR<'_>],
    ) -> RayTracingCreateInfos {
        let mut local = RayTracingCreateInfos {
            infos: Vec::with_capacity(infos.len()),
            _stages: Vec::with_capacity(infos.len()),
            _libraries: Vec::new(),
        };
        for info in infos {
            let stages: Box<[vk::PipelineShaderStageCreateInfo<'static>]> =
                unsafe { raw_slice(info.p_stages, info.stage_count) }
                    .iter()
                    .map(|stage| {
                        let unwrapped = vk::PipelineShaderStageCreateInfo {
                            module: self.unwrap(stage.module),
                            ..*stage
                        };
                        unsafe {
                            std::mem::transmute::<
                                vk::PipelineShaderStageCreateInfo<'_>,
                                vk::PipelineShaderStageCreateInfo<'static>,
                            >(unwrapped)
                        }
                    })
                    .collect();

            let unwrapped = vk::RayTracingPipelineCreateInfoKHR {
                p_stages: stages.as_ptr(),
                layout: self.unwrap(info.layout),
                base_pipeline_handle: self.unwrap(info.base_pipeline_handle),
                ..*info
            };
            let mut unwrapped = unsafe {
                std::mem::transmute::<
                    vk::RayTracingPipelineCreateInfoKHR<'_>,
                    vk::RayTracingPipelineCreateInfoKHR<'static>,
                >(unwrapped)
            };

            if let Some(library) = unsafe { info.p_library_info.as_ref() } {
                let libraries: Box<[vk::Pipeline]> =
                    unsafe { raw_slice(library.p_libraries, library.library_count) }
                        .iter()
                        .map(|&pipeline| self.unwrap(pipeline))
                        .collect();
                let library_info = vk::PipelineLibraryCreateInfoKHR {
                    p_libraries: libraries.as_ptr(),
                    ..*library
                };
                let library_info = unsafe {
                    std::mem::transmute::<
                        vk::PipelineLibraryCreateInfoKHR<'_>,
                        vk::PipelineLibraryCreateInfoKHR<'static>,
                    >(library_info)
                };
                let boxed = Box::new((library_info, libraries));
                unwrapped.p_library_info = &boxed.0;
                local._libraries.push(boxed);
            }

            local._stages.push(stages);
            local.infos.push(unwrapped);
        }
        local
    }
}
