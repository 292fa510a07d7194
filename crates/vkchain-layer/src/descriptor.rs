//! Descriptor set layout, pool, set and update-template entry points.

use std::ffi::c_void;
use std::mem::size_of;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::call::{raw_slice, vk_call, Call, CreateArgs, DestroyArgs};
use crate::device::{write_out, DeviceContext};
use crate::error::LayerError;

vk_call!(
    CreateDescriptorSetLayout<'a> = "vkCreateDescriptorSetLayout",
    CreateArgs<'a, vk::DescriptorSetLayoutCreateInfo<'a>>,
    (),
    VkResult<vk::DescriptorSetLayout>
);

vk_call!(
    DestroyDescriptorSetLayout<'a> = "vkDestroyDescriptorSetLayout",
    DestroyArgs<'a, vk::DescriptorSetLayout>,
    (),
    ()
);

vk_call!(
    CreateDescriptorPool<'a> = "vkCreateDescriptorPool",
    CreateArgs<'a, vk::DescriptorPoolCreateInfo<'a>>,
    (),
    VkResult<vk::DescriptorPool>
);

vk_call!(
    /// Destroying a pool frees every set allocated from it.
    DestroyDescriptorPool<'a> = "vkDestroyDescriptorPool",
    DestroyArgs<'a, vk::DescriptorPool>,
    (),
    ()
);

pub struct AllocateDescriptorSetsArgs<'a> {
    pub device: vk::Device,
    pub allocate_info: &'a vk::DescriptorSetAllocateInfo<'a>,
}

#[derive(Debug, Default)]
pub struct AllocateDescriptorSetsState {
    /// Descriptors the allocation needs from the pool, per type.
    pub required_descriptors: Vec<(vk::DescriptorType, u32)>,
}

vk_call!(
    AllocateDescriptorSets<'a> = "vkAllocateDescriptorSets",
    AllocateDescriptorSetsArgs<'a>,
    AllocateDescriptorSetsState,
    VkResult<Vec<vk::DescriptorSet>>
);

pub struct FreeDescriptorSetsArgs<'a> {
    pub device: vk::Device,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_sets: &'a [vk::DescriptorSet],
}

vk_call!(
    FreeDescriptorSets<'a> = "vkFreeDescriptorSets",
    FreeDescriptorSetsArgs<'a>,
    (),
    vk::Result
);

vk_call!(
    CreateDescriptorUpdateTemplate<'a> = "vkCreateDescriptorUpdateTemplate",
    CreateArgs<'a, vk::DescriptorUpdateTemplateCreateInfo<'a>>,
    (),
    VkResult<vk::DescriptorUpdateTemplate>
);

vk_call!(
    DestroyDescriptorUpdateTemplate<'a> = "vkDestroyDescriptorUpdateTemplate",
    DestroyArgs<'a, vk::DescriptorUpdateTemplate>,
    (),
    ()
);

pub struct UpdateDescriptorSetWithTemplateArgs {
    pub device: vk::Device,
    pub descriptor_set: vk::DescriptorSet,
    pub descriptor_update_template: vk::DescriptorUpdateTemplate,
    /// Laid out as the template's entries describe.
    pub data: *const c_void,
}

vk_call!(
    UpdateDescriptorSetWithTemplate<'a> = "vkUpdateDescriptorSetWithTemplate",
    UpdateDescriptorSetWithTemplateArgs,
    (),
    ()
);

// ── Template state ──────────────────────────────────────────

/// What a descriptor update template was created with; needed to find the
/// handles inside the raw data blobs it is later used with.
#[derive(Debug, Clone)]
pub struct DescriptorTemplateState {
    pub template_type: vk::DescriptorUpdateTemplateType,
    pub set_layout: vk::DescriptorSetLayout,
    pub entries: Vec<vk::DescriptorUpdateTemplateEntry>,
}

impl DescriptorTemplateState {
    /// # Safety
    /// The entry array of `create_info` must be valid.
    pub unsafe fn new(create_info: &vk::DescriptorUpdateTemplateCreateInfo<'_>) -> Self {
        Self {
            template_type: create_info.template_type,
            set_layout: create_info.descriptor_set_layout,
            entries: unsafe {
                raw_slice(
                    create_info.p_descriptor_update_entries,
                    create_info.descriptor_update_entry_count,
                )
            }
            .to_vec(),
        }
    }

    /// Bytes of the data blob the entries cover.
    pub fn data_extent(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.descriptor_count > 0)
            .map(|entry| match element_layout(entry) {
                // An inline uniform block's count is its size in bytes.
                ElementLayout::InlineBytes => entry.offset + entry.descriptor_count as usize,
                ElementLayout::Info(size) | ElementLayout::Opaque(size) => {
                    entry.offset + (entry.descriptor_count as usize - 1) * entry.stride + size
                }
            })
            .max()
            .unwrap_or(0)
    }

    /// Copy `data`, replacing every buffer handle by `unwrap_buffer` of it.
    ///
    /// # Safety
    /// `data` must be laid out as the entries describe.
    pub unsafe fn unwrapped_data(
        &self,
        data: *const u8,
        unwrap_buffer: impl Fn(vk::Buffer) -> vk::Buffer,
    ) -> Vec<u8> {
        let mut out = vec![0u8; self.data_extent()];
        for entry in &self.entries {
            let ty = entry.descriptor_type;
            let size = match element_layout(entry) {
                ElementLayout::InlineBytes => {
                    unsafe { copy_bytes(data, &mut out, entry.offset, entry.descriptor_count as usize) };
                    continue;
                }
                ElementLayout::Info(size) => size,
                ElementLayout::Opaque(size) => {
                    tracing::warn!(?ty, "unknown descriptor type in update template, passing its data through");
                    size
                }
            };
            for index in 0..entry.descriptor_count as usize {
                let offset = entry.offset + index * entry.stride;
                if is_buffer_descriptor(ty) {
                    let mut info: vk::DescriptorBufferInfo =
                        unsafe { data.add(offset).cast::<vk::DescriptorBufferInfo>().read_unaligned() };
                    info.buffer = unwrap_buffer(info.buffer);
                    unsafe {
                        out.as_mut_ptr()
                            .add(offset)
                            .cast::<vk::DescriptorBufferInfo>()
                            .write_unaligned(info)
                    };
                } else {
                    // Image views, samplers, buffer views and acceleration
                    // structures are not wrapped by this layer.
                    unsafe { copy_bytes(data, &mut out, offset, size) };
                }
            }
        }
        out
    }
}

fn is_buffer_descriptor(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

/// How one template entry's elements sit in the data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementLayout {
    /// `descriptor_count` raw bytes at `offset`
    InlineBytes,
    /// A known info struct or handle of this size per element
    Info(usize),
    /// A type this layer does not know; its bytes are copied unchanged
    Opaque(usize),
}

fn element_layout(entry: &vk::DescriptorUpdateTemplateEntry) -> ElementLayout {
    match entry.descriptor_type {
        vk::DescriptorType::INLINE_UNIFORM_BLOCK => ElementLayout::InlineBytes,
        vk::DescriptorType::SAMPLER
        | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        | vk::DescriptorType::SAMPLED_IMAGE
        | vk::DescriptorType::STORAGE_IMAGE
        | vk::DescriptorType::INPUT_ATTACHMENT
        | vk::DescriptorType::SAMPLE_WEIGHT_IMAGE_QCOM
        | vk::DescriptorType::BLOCK_MATCH_IMAGE_QCOM => {
            ElementLayout::Info(size_of::<vk::DescriptorImageInfo>())
        }
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
            ElementLayout::Info(size_of::<vk::BufferView>())
        }
        ty if is_buffer_descriptor(ty) => ElementLayout::Info(size_of::<vk::DescriptorBufferInfo>()),
        vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => {
            ElementLayout::Info(size_of::<vk::AccelerationStructureKHR>())
        }
        vk::DescriptorType::ACCELERATION_STRUCTURE_NV => {
            ElementLayout::Info(size_of::<vk::AccelerationStructureNV>())
        }
        // A strided entry owns its stride; otherwise assume a single
        // non-dispatchable handle.
        _ if entry.stride > 0 => ElementLayout::Opaque(entry.stride),
        _ => ElementLayout::Opaque(size_of::<u64>()),
    }
}

/// # Safety
/// `src` must be valid for reads of `len` bytes at `offset`.
unsafe fn copy_bytes(src: *const u8, dst: &mut [u8], offset: usize, len: usize) {
    let source = unsafe { std::slice::from_raw_parts(src.add(offset), len) };
    dst[offset..offset + len].copy_from_slice(source);
}

// ── Entry points ────────────────────────────────────────────

impl DeviceContext {
    /// # Safety
    /// Parameters as for `vkCreateDescriptorSetLayout`.
    pub unsafe fn create_descriptor_set_layout(
        &self,
        p_create_info: *const vk::DescriptorSetLayoutCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_set_layout: *mut vk::DescriptorSetLayout,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return self.fail(
                CreateDescriptorSetLayout::NAME,
                LayerError::NullPointer("pCreateInfo"),
            );
        };
        let args = CreateArgs {
            device: self.handle(),
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateDescriptorSetLayout>(&args, |_| {
            self.create_wrapped(|p_real| unsafe {
                (self.table.core.create_descriptor_set_layout)(
                    self.table.handle,
                    create_info,
                    p_allocator,
                    p_real,
                )
            })
        });
        unsafe { write_out(p_set_layout, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyDescriptorSetLayout`.
    pub unsafe fn destroy_descriptor_set_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyDescriptorSetLayout, _>(set_layout, p_allocator, |real| {
                (self.table.core.destroy_descriptor_set_layout)(self.table.handle, real, p_allocator)
            });
        }
    }

    /// # Safety
    /// Parameters as for `vkCreateDescriptorPool`.
    pub unsafe fn create_descriptor_pool(
        &self,
        p_create_info: *const vk::DescriptorPoolCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_descriptor_pool: *mut vk::DescriptorPool,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return self.fail(CreateDescriptorPool::NAME, LayerError::NullPointer("pCreateInfo"));
        };
        let args = CreateArgs {
            device: self.handle(),
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateDescriptorPool>(&args, |_| {
            self.create_wrapped(|p_real| unsafe {
                (self.table.core.create_descriptor_pool)(self.table.handle, create_info, p_allocator, p_real)
            })
        });
        unsafe { write_out(p_descriptor_pool, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyDescriptorPool`.
    pub unsafe fn destroy_descriptor_pool(
        &self,
        descriptor_pool: vk::DescriptorPool,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyDescriptorPool, _>(descriptor_pool, p_allocator, |real| {
                if let Some((_, sets)) = self.pool_sets.remove(&descriptor_pool.as_raw()) {
                    for set in sets {
                        self.remove(vk::DescriptorSet::from_raw(set));
                    }
                }
                (self.table.core.destroy_descriptor_pool)(self.table.handle, real, p_allocator)
            });
        }
    }

    /// # Safety
    /// Parameters as for `vkAllocateDescriptorSets`.
    pub unsafe fn allocate_descriptor_sets(
        &self,
        p_allocate_info: *const vk::DescriptorSetAllocateInfo<'_>,
        p_descriptor_sets: *mut vk::DescriptorSet,
    ) -> vk::Result {
        let Some(allocate_info) = (unsafe { p_allocate_info.as_ref() }) else {
            return self.fail(
                AllocateDescriptorSets::NAME,
                LayerError::NullPointer("pAllocateInfo"),
            );
        };
        let args = AllocateDescriptorSetsArgs {
            device: self.handle(),
            allocate_info,
        };
        let output = self.chain.intercept::<AllocateDescriptorSets>(&args, |_| {
            let layouts: Vec<vk::DescriptorSetLayout> = unsafe {
                raw_slice(allocate_info.p_set_layouts, allocate_info.descriptor_set_count)
            }
            .iter()
            .map(|&layout| self.unwrap(layout))
            .collect();
            let mut info = *allocate_info;
            info.descriptor_pool = self.unwrap(allocate_info.descriptor_pool);
            info.descriptor_set_count = layouts.len() as u32;
            info.p_set_layouts = layouts.as_ptr();

            let mut sets = vec![vk::DescriptorSet::null(); layouts.len()];
            let result = unsafe {
                (self.table.core.allocate_descriptor_sets)(self.table.handle, &info, sets.as_mut_ptr())
            };
            if result != vk::Result::SUCCESS {
                return Err(result);
            }
            let wrapped: Vec<vk::DescriptorSet> = sets.into_iter().map(|set| self.wrap(set)).collect();
            self.pool_sets
                .entry(allocate_info.descriptor_pool.as_raw())
                .or_default()
                .extend(wrapped.iter().map(|set| set.as_raw()));
            Ok(wrapped)
        });

        match output {
            Ok(sets) => {
                if !p_descriptor_sets.is_null() {
                    unsafe {
                        std::ptr::copy_nonoverlapping(sets.as_ptr(), p_descriptor_sets, sets.len())
                    };
                }
                vk::Result::SUCCESS
            }
            Err(error) => error,
        }
    }

    /// # Safety
    /// Parameters as for `vkFreeDescriptorSets`.
    pub unsafe fn free_descriptor_sets(
        &self,
        descriptor_pool: vk::DescriptorPool,
        descriptor_set_count: u32,
        p_descriptor_sets: *const vk::DescriptorSet,
    ) -> vk::Result {
        let descriptor_sets = unsafe { raw_slice(p_descriptor_sets, descriptor_set_count) };
        let args = FreeDescriptorSetsArgs {
            device: self.handle(),
            descriptor_pool,
            descriptor_sets,
        };
        self.chain.intercept::<FreeDescriptorSets>(&args, |_| {
            if let Some(mut sets) = self.pool_sets.get_mut(&descriptor_pool.as_raw()) {
                sets.retain(|set| !descriptor_sets.iter().any(|freed| freed.as_raw() == *set));
            }
            let real: Vec<vk::DescriptorSet> = descriptor_sets.iter().map(|&set| self.remove(set)).collect();
            unsafe {
                (self.table.core.free_descriptor_sets)(
                    self.table.handle,
                    self.unwrap(descriptor_pool),
                    real.len() as u32,
                    real.as_ptr(),
                )
            }
        })
    }

    /// # Safety
    /// Parameters as for `vkCreateDescriptorUpdateTemplate`.
    pub unsafe fn create_descriptor_update_template(
        &self,
        p_create_info: *const vk::DescriptorUpdateTemplateCreateInfo<'_>,
        p_allocator: *const vk::AllocationCallbacks<'_>,
        p_descriptor_update_template: *mut vk::DescriptorUpdateTemplate,
    ) -> vk::Result {
        let Some(create_info) = (unsafe { p_create_info.as_ref() }) else {
            return self.fail(
                CreateDescriptorUpdateTemplate::NAME,
                LayerError::NullPointer("pCreateInfo"),
            );
        };
        let args = CreateArgs {
            device: self.handle(),
            create_info,
            allocator: unsafe { p_allocator.as_ref() },
        };
        let output = self.chain.intercept::<CreateDescriptorUpdateTemplate>(&args, |_| {
            let mut info = *create_info;
            info.descriptor_set_layout = self.unwrap(create_info.descriptor_set_layout);
            info.pipeline_layout = self.unwrap(create_info.pipeline_layout);

            let mut real = vk::DescriptorUpdateTemplate::null();
            let result = unsafe {
                (self.table.core_1_1.create_descriptor_update_template)(
                    self.table.handle,
                    &info,
                    p_allocator,
                    &mut real,
                )
            };
            if result != vk::Result::SUCCESS {
                return Err(result);
            }
            let state = unsafe { DescriptorTemplateState::new(create_info) };
            self.templates.insert(real.as_raw(), std::sync::Arc::new(state));
            Ok(self.wrap(real))
        });
        unsafe { write_out(p_descriptor_update_template, output) }
    }

    /// # Safety
    /// Parameters as for `vkDestroyDescriptorUpdateTemplate`.
    pub unsafe fn destroy_descriptor_update_template(
        &self,
        descriptor_update_template: vk::DescriptorUpdateTemplate,
        p_allocator: *const vk::AllocationCallbacks<'_>,
    ) {
        unsafe {
            self.destroy::<DestroyDescriptorUpdateTemplate, _>(
                descriptor_update_template,
                p_allocator,
                |real| {
                    self.templates.remove(&real.as_raw());
                    (self.table.core_1_1.destroy_descriptor_update_template)(
                        self.table.handle,
                        real,
                        p_allocator,
                    )
                },
            );
        }
    }

    /// # Safety
    /// Parameters as for `vkUpdateDescriptorSetWithTemplate`.
    pub unsafe fn update_descriptor_set_with_template(
        &self,
        descriptor_set: vk::DescriptorSet,
        descriptor_update_template: vk::DescriptorUpdateTemplate,
        p_data: *const c_void,
    ) {
        let args = UpdateDescriptorSetWithTemplateArgs {
            device: self.handle(),
            descriptor_set,
            descriptor_update_template,
            data: p_data,
        };
        self.chain.intercept::<UpdateDescriptorSetWithTemplate>(&args, |_| {
            let real_set = self.unwrap(descriptor_set);
            let real_template = self.unwrap(descriptor_update_template);
            let update = |data: *const c_void| unsafe {
                (self.table.core_1_1.update_descriptor_set_with_template)(
                    self.table.handle,
                    real_set,
                    real_template,
                    data,
                )
            };

            if !self.checks.wraps_handles() || p_data.is_null() {
                return update(p_data);
            }
            match self.template_state(real_template) {
                Some(state) => {
                    let data = unsafe {
                        state.unwrapped_data(p_data.cast(), |buffer| self.unwrap(buffer))
                    };
                    update(data.as_ptr().cast());
                }
                None => {
                    self.report.internal_error(
                        UpdateDescriptorSetWithTemplate::NAME,
                        &LayerError::UnknownTemplate(real_template.as_raw()),
                    );
                    update(p_data);
                }
            }
        });
    }
}
