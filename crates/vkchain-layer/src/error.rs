use ash::vk;
use vkchain_core::CoreError;

use crate::dispatch::DispatchKey;

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("no instance context for dispatch key {0:?}")]
    UnknownInstance(DispatchKey),

    #[error("no device context for dispatch key {0:?}")]
    UnknownDevice(DispatchKey),

    #[error("next layer does not provide {0}")]
    MissingEntryPoint(&'static str),

    #[error("no descriptor update template state for {0:#x}")]
    UnknownTemplate(u64),

    #[error("required pointer {0} is null")]
    NullPointer(&'static str),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("driver returned {0}")]
    Vulkan(#[from] vk::Result),
}

impl LayerError {
    /// The code an entry point returns for this error.
    pub fn as_vk_result(&self) -> vk::Result {
        match self {
            LayerError::Vulkan(result) => *result,
            LayerError::UnknownInstance(_)
            | LayerError::UnknownDevice(_)
            | LayerError::NullPointer(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
            _ => vk::Result::ERROR_UNKNOWN,
        }
    }
}
