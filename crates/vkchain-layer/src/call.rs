//! Intercepted Vulkan calls as types.
//!
//! Each entry point the layer intercepts gets a marker type implementing
//! [`Call`]. The marker names what hooks see of the call (its arguments), the
//! per-call state threaded from Validate through Record, and the outcome of
//! calling down.

use ash::prelude::VkResult;
use ash::vk;

pub trait Call: 'static {
    /// Vulkan entry-point name, used in logs and internal-error reports.
    const NAME: &'static str;
    /// Arguments as the hooks see them, with handles in their wrapped form.
    type Args<'a>;
    /// Scratch state created fresh for every call. Validate hooks may fill it
    /// so Record hooks reuse the work instead of redoing it.
    type State: Default;
    /// What calling down produced, as the post-call Record hooks see it.
    type Output: Vetoable;
}

/// The value an entry point returns when a Validate hook vetoes the call.
pub trait Vetoable {
    fn vetoed() -> Self;
}

impl Vetoable for () {
    fn vetoed() {}
}

impl Vetoable for vk::Result {
    fn vetoed() -> Self {
        vk::Result::ERROR_VALIDATION_FAILED_EXT
    }
}

impl<T> Vetoable for VkResult<T> {
    fn vetoed() -> Self {
        Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
    }
}

/// Declare a [`Call`] marker.
///
/// ```ignore
/// vk_call!(CreateFence<'a> = "vkCreateFence", CreateFenceArgs<'a>, (), VkResult<vk::Fence>);
/// ```
macro_rules! vk_call {
    ($(#[$meta:meta])* $name:ident<$lt:lifetime> = $vk_name:literal, $args:ty, $state:ty, $output:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub enum $name {}

        impl $crate::call::Call for $name {
            const NAME: &'static str = $vk_name;
            type Args<$lt> = $args;
            type State = $state;
            type Output = $output;
        }
    };
}

pub(crate) use vk_call;

/// Arguments of the `vkCreate*` calls that create one object from one create info.
#[derive(Debug, Clone, Copy)]
pub struct CreateArgs<'a, I> {
    pub device: vk::Device,
    pub create_info: &'a I,
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

/// Arguments shared by every `vkDestroy*` call on a device.
#[derive(Debug, Clone, Copy)]
pub struct DestroyArgs<'a, H> {
    pub device: vk::Device,
    pub handle: H,
    pub allocator: Option<&'a vk::AllocationCallbacks<'a>>,
}

/// Borrow `count` elements at `ptr`, treating null as empty.
///
/// # Safety
/// A non-null `ptr` must point to `count` initialized elements that outlive `'a`.
pub(crate) unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, count as usize) }
    }
}

/// Read a `ppEnabledExtensionNames`-style array.
///
/// # Safety
/// A non-null `ptrs` must point to `count` pointers, each null or a valid C string.
pub(crate) unsafe fn read_string_array(
    ptrs: *const *const std::ffi::c_char,
    count: u32,
) -> Vec<String> {
    unsafe { raw_slice(ptrs, count) }
        .iter()
        .filter(|ptr| !ptr.is_null())
        .map(|&ptr| {
            unsafe { std::ffi::CStr::from_ptr(ptr) }
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}
