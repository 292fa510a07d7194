//! vkchain validation layer
//!
//! Interception chassis for a Vulkan validation layer. Each intercepted
//! entry point runs its call through a chain of validators: Validate hooks
//! that may veto, pre-call Record hooks, the call down to the next layer or
//! driver, and post-call Record hooks. Along the way the layer wraps the
//! handles it hands to the application, and runs continuations queued on
//! deferred host operations once their completion is observed.
//!
//! Entry points are methods on [`Chassis`] (instance and device lifetime)
//! and on [`InstanceContext`] / [`DeviceContext`] (everything else), taking
//! the Vulkan parameter list minus the leading dispatchable handle. The
//! exported `vkGetInstanceProcAddr` trampolines that route loader calls to a
//! process-wide chassis belong to the layer binary built on this crate.

pub mod call;
pub mod chain;
pub mod chassis;
pub mod deferred_host;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod instance;
pub mod memory;
mod messenger;
pub mod pipeline;
pub mod sync;

pub use call::{Call, CreateArgs, DestroyArgs, Vetoable};
pub use chain::{ChainBuilder, Hooks, Intercept, Validator, ValidatorChain, ValidatorKind};
pub use chassis::Chassis;
pub use device::DeviceContext;
pub use dispatch::DispatchKey;
pub use error::LayerError;
pub use factory::{Scope, ValidatorContext, ValidatorFactory, ValidatorRegistry};
pub use instance::{InstanceContext, Produced};

pub use vkchain_core::{Recording, ValidatorCell};
