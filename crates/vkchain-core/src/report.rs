//! The debug-report path: validation messages tagged with a rule identifier,
//! filtered by the layer settings and delivered to the application's callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk::{self, Handle};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;

use crate::config::{LayerSettings, ReportSeverity};

/// An object a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub object_type: vk::ObjectType,
    pub handle: u64,
}

impl ObjectRef {
    pub fn new<H: Handle>(handle: H) -> Self {
        Self {
            object_type: H::TYPE,
            handle: handle.as_raw(),
        }
    }
}

/// A message as delivered to callbacks.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub severity: ReportSeverity,
    pub rule_id: &'a str,
    pub objects: &'a [ObjectRef],
    pub text: &'a str,
}

/// Returns `true` to ask that the call be aborted.
pub type ReportCallback = Arc<dyn Fn(&Message<'_>) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub const INTERNAL_ERROR_RULE: &str = "UNASSIGNED-vkchain-internal-error";

pub struct DebugReport {
    callbacks: RwLock<Vec<(CallbackId, ReportCallback)>>,
    next_callback: AtomicU64,
    severities: Vec<ReportSeverity>,
    muted: DashSet<String>,
    duplicate_limit: u32,
    /// Rule identifier -> times reported
    counts: DashMap<String, u32>,
    /// Entry points that already reported an internal error
    internal_errors: DashSet<&'static str>,
}

impl DebugReport {
    pub fn new(settings: &LayerSettings) -> Self {
        let muted = DashSet::new();
        for rule_id in &settings.message_id_filter {
            muted.insert(rule_id.clone());
        }
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            severities: settings.report_flags.clone(),
            muted,
            duplicate_limit: settings.duplicate_message_limit,
            counts: DashMap::new(),
            internal_errors: DashSet::new(),
        }
    }

    pub fn register_callback(&self, callback: ReportCallback) -> CallbackId {
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, callback));
        id
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(registered, _)| *registered != id);
        callbacks.len() != before
    }

    pub fn log_error(&self, rule_id: &str, objects: &[ObjectRef], text: &str) -> bool {
        self.log(ReportSeverity::Error, rule_id, objects, text)
    }

    pub fn log_warning(&self, rule_id: &str, objects: &[ObjectRef], text: &str) -> bool {
        self.log(ReportSeverity::Warning, rule_id, objects, text)
    }

    pub fn log_perf(&self, rule_id: &str, objects: &[ObjectRef], text: &str) -> bool {
        self.log(ReportSeverity::Performance, rule_id, objects, text)
    }

    pub fn log_info(&self, rule_id: &str, objects: &[ObjectRef], text: &str) -> bool {
        self.log(ReportSeverity::Info, rule_id, objects, text)
    }

    /// Report a message. Returns `true` if any callback asked to abort the call.
    pub fn log(
        &self,
        severity: ReportSeverity,
        rule_id: &str,
        objects: &[ObjectRef],
        text: &str,
    ) -> bool {
        if !self.severities.contains(&severity) || self.muted.contains(rule_id) {
            return false;
        }
        if self.duplicate_limit > 0 {
            let mut count = self.counts.entry(rule_id.to_string()).or_insert(0);
            if *count >= self.duplicate_limit {
                return false;
            }
            *count += 1;
        }

        match severity {
            ReportSeverity::Error => tracing::error!(rule_id, "{}", text),
            ReportSeverity::Warning | ReportSeverity::Performance => {
                tracing::warn!(rule_id, ?severity, "{}", text)
            }
            ReportSeverity::Info => tracing::info!(rule_id, "{}", text),
            ReportSeverity::Verbose => tracing::debug!(rule_id, "{}", text),
        }

        let message = Message {
            severity,
            rule_id,
            objects,
            text,
        };
        // Callbacks may register further callbacks; call them unlocked.
        let callbacks: Vec<ReportCallback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        callbacks
            .iter()
            .fold(false, |abort, callback| callback(&message) | abort)
    }

    /// Report an unexpected failure inside the layer. Each entry point
    /// reports at most once.
    pub fn internal_error(&self, entry_point: &'static str, error: &dyn std::fmt::Display) {
        if !self.internal_errors.insert(entry_point) {
            return;
        }
        tracing::error!(entry_point, %error, "internal error");
        let text = format!("{}: {}", entry_point, error);
        self.log(ReportSeverity::Error, INTERNAL_ERROR_RULE, &[], &text);
    }
}

impl Default for DebugReport {
    fn default() -> Self {
        Self::new(&LayerSettings::default())
    }
}
