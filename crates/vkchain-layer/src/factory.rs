//! Which validators a chain is built from.
//!
//! The merged check flags decide which [`ValidatorKind`]s are active; a
//! [`ValidatorRegistry`] maps each kind to the factories that construct its
//! validators into the chain.

use std::sync::Arc;

use vkchain_core::config::{DisableFlags, EnableFlags};
use vkchain_core::{DebugReport, DeferredOperationRegistry, HandleRegistry, ValidationChecks};

use crate::chain::{ChainBuilder, ValidatorChain, ValidatorKind};
use crate::dispatch::DeviceDispatchTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Instance,
    Device,
}

/// Everything a factory may hand to the validator it constructs.
#[derive(Clone)]
pub struct ValidatorContext {
    pub scope: Scope,
    pub checks: ValidationChecks,
    pub enabled_extensions: Arc<[String]>,
    pub report: Arc<DebugReport>,
    pub handles: Arc<HandleRegistry>,
    pub deferred: Arc<DeferredOperationRegistry>,
    /// The table device-scoped validators call down through.
    pub device: Option<Arc<DeviceDispatchTable>>,
}

impl ValidatorContext {
    pub fn extension_enabled(&self, name: &str) -> bool {
        self.enabled_extensions.iter().any(|enabled| enabled == name)
    }
}

pub type ValidatorFactory =
    Arc<dyn Fn(&mut ChainBuilder, ValidatorKind, &ValidatorContext) + Send + Sync>;

/// Kinds the flags enable, in chain order.
pub fn selected_kinds(checks: &ValidationChecks) -> Vec<ValidatorKind> {
    let mut kinds: Vec<ValidatorKind> = ValidatorKind::ALL
        .into_iter()
        .filter(|&kind| match kind {
            ValidatorKind::ThreadSafety => !checks.is_disabled(DisableFlags::THREAD_SAFETY),
            ValidatorKind::ParameterValidation => {
                !checks.is_disabled(DisableFlags::STATELESS_CHECKS)
            }
            ValidatorKind::ObjectLifetimes => !checks.is_disabled(DisableFlags::OBJECT_TRACKING),
            ValidatorKind::CoreChecks => !checks.is_disabled(DisableFlags::CORE_CHECKS),
            ValidatorKind::BestPractices => checks.is_enabled(EnableFlags::BEST_PRACTICES),
            ValidatorKind::GpuAssisted => checks.is_enabled(EnableFlags::GPU_VALIDATION),
            ValidatorKind::DebugPrintf => checks.is_enabled(EnableFlags::DEBUG_PRINTF),
            ValidatorKind::SyncValidation => checks.is_enabled(EnableFlags::SYNC_VALIDATION),
        })
        .collect();

    if kinds.contains(&ValidatorKind::GpuAssisted) && kinds.contains(&ValidatorKind::DebugPrintf) {
        tracing::warn!("GPU-assisted validation and debug printf are mutually exclusive; disabling debug printf");
        kinds.retain(|&kind| kind != ValidatorKind::DebugPrintf);
    }
    kinds
}

#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    factories: Vec<(ValidatorKind, ValidatorFactory)>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: ValidatorKind, factory: F) -> &mut Self
    where
        F: Fn(&mut ChainBuilder, ValidatorKind, &ValidatorContext) + Send + Sync + 'static,
    {
        self.factories.push((kind, Arc::new(factory)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build a chain for `ctx`: for each selected kind in chain order, run
    /// its factories in registration order.
    pub fn build_chain(&self, ctx: &ValidatorContext) -> ValidatorChain {
        let mut builder = ValidatorChain::builder();
        for kind in selected_kinds(&ctx.checks) {
            let mut found = false;
            for (_, factory) in self.factories.iter().filter(|(registered, _)| *registered == kind) {
                factory(&mut builder, kind, ctx);
                found = true;
            }
            if !found {
                tracing::debug!(kind = kind.name(), scope = ?ctx.scope, "no validator registered");
            }
        }
        let chain = builder.build();
        tracing::debug!(scope = ?ctx.scope, validators = chain.len(), "built validator chain");
        chain
    }
}
