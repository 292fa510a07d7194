use std::str::FromStr;

use ash::vk;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

bitflags! {
    /// Validation categories that have been switched off.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DisableFlags: u32 {
        const COMMAND_BUFFER_STATE = 1 << 0;
        const OBJECT_IN_USE = 1 << 1;
        const QUERY_VALIDATION = 1 << 2;
        const IMAGE_LAYOUT_VALIDATION = 1 << 3;
        const OBJECT_TRACKING = 1 << 4;
        const CORE_CHECKS = 1 << 5;
        const THREAD_SAFETY = 1 << 6;
        const STATELESS_CHECKS = 1 << 7;
        const HANDLE_WRAPPING = 1 << 8;
        const SHADER_VALIDATION = 1 << 9;
        const SHADER_VALIDATION_CACHING = 1 << 10;
    }
}

bitflags! {
    /// Optional validation features that have been switched on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnableFlags: u32 {
        const GPU_VALIDATION = 1 << 0;
        const GPU_VALIDATION_RESERVE_BINDING_SLOT = 1 << 1;
        const BEST_PRACTICES = 1 << 2;
        const VENDOR_SPECIFIC_ARM = 1 << 3;
        const VENDOR_SPECIFIC_AMD = 1 << 4;
        const DEBUG_PRINTF = 1 << 5;
        const SYNC_VALIDATION = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableCheck {
    CommandBufferState,
    ObjectInUse,
    QueryValidation,
    ImageLayoutValidation,
    ObjectTracking,
    CoreChecks,
    ThreadSafety,
    StatelessChecks,
    HandleWrapping,
    ShaderValidation,
    ShaderValidationCaching,
}

impl DisableCheck {
    pub const ALL: [DisableCheck; 11] = [
        DisableCheck::CommandBufferState,
        DisableCheck::ObjectInUse,
        DisableCheck::QueryValidation,
        DisableCheck::ImageLayoutValidation,
        DisableCheck::ObjectTracking,
        DisableCheck::CoreChecks,
        DisableCheck::ThreadSafety,
        DisableCheck::StatelessChecks,
        DisableCheck::HandleWrapping,
        DisableCheck::ShaderValidation,
        DisableCheck::ShaderValidationCaching,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DisableCheck::CommandBufferState => "command_buffer_state",
            DisableCheck::ObjectInUse => "object_in_use",
            DisableCheck::QueryValidation => "query_validation",
            DisableCheck::ImageLayoutValidation => "image_layout_validation",
            DisableCheck::ObjectTracking => "object_tracking",
            DisableCheck::CoreChecks => "core_checks",
            DisableCheck::ThreadSafety => "thread_safety",
            DisableCheck::StatelessChecks => "stateless_checks",
            DisableCheck::HandleWrapping => "handle_wrapping",
            DisableCheck::ShaderValidation => "shader_validation",
            DisableCheck::ShaderValidationCaching => "shader_validation_caching",
        }
    }

    pub fn flag(self) -> DisableFlags {
        match self {
            DisableCheck::CommandBufferState => DisableFlags::COMMAND_BUFFER_STATE,
            DisableCheck::ObjectInUse => DisableFlags::OBJECT_IN_USE,
            DisableCheck::QueryValidation => DisableFlags::QUERY_VALIDATION,
            DisableCheck::ImageLayoutValidation => DisableFlags::IMAGE_LAYOUT_VALIDATION,
            DisableCheck::ObjectTracking => DisableFlags::OBJECT_TRACKING,
            DisableCheck::CoreChecks => DisableFlags::CORE_CHECKS,
            DisableCheck::ThreadSafety => DisableFlags::THREAD_SAFETY,
            DisableCheck::StatelessChecks => DisableFlags::STATELESS_CHECKS,
            DisableCheck::HandleWrapping => DisableFlags::HANDLE_WRAPPING,
            DisableCheck::ShaderValidation => DisableFlags::SHADER_VALIDATION,
            DisableCheck::ShaderValidationCaching => DisableFlags::SHADER_VALIDATION_CACHING,
        }
    }
}

impl FromStr for DisableCheck {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisableCheck::ALL
            .into_iter()
            .find(|check| check.name() == s)
            .ok_or_else(|| CoreError::UnknownSetting(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnableCheck {
    GpuValidation,
    GpuValidationReserveBindingSlot,
    BestPractices,
    VendorSpecificArm,
    VendorSpecificAmd,
    DebugPrintf,
    SyncValidation,
}

impl EnableCheck {
    pub const ALL: [EnableCheck; 7] = [
        EnableCheck::GpuValidation,
        EnableCheck::GpuValidationReserveBindingSlot,
        EnableCheck::BestPractices,
        EnableCheck::VendorSpecificArm,
        EnableCheck::VendorSpecificAmd,
        EnableCheck::DebugPrintf,
        EnableCheck::SyncValidation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EnableCheck::GpuValidation => "gpu_validation",
            EnableCheck::GpuValidationReserveBindingSlot => "gpu_validation_reserve_binding_slot",
            EnableCheck::BestPractices => "best_practices",
            EnableCheck::VendorSpecificArm => "vendor_specific_arm",
            EnableCheck::VendorSpecificAmd => "vendor_specific_amd",
            EnableCheck::DebugPrintf => "debug_printf",
            EnableCheck::SyncValidation => "sync_validation",
        }
    }

    pub fn flag(self) -> EnableFlags {
        match self {
            EnableCheck::GpuValidation => EnableFlags::GPU_VALIDATION,
            EnableCheck::GpuValidationReserveBindingSlot => {
                EnableFlags::GPU_VALIDATION_RESERVE_BINDING_SLOT
            }
            EnableCheck::BestPractices => EnableFlags::BEST_PRACTICES,
            EnableCheck::VendorSpecificArm => EnableFlags::VENDOR_SPECIFIC_ARM,
            EnableCheck::VendorSpecificAmd => EnableFlags::VENDOR_SPECIFIC_AMD,
            EnableCheck::DebugPrintf => EnableFlags::DEBUG_PRINTF,
            EnableCheck::SyncValidation => EnableFlags::SYNC_VALIDATION,
        }
    }
}

impl FromStr for EnableCheck {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnableCheck::ALL
            .into_iter()
            .find(|check| check.name() == s)
            .ok_or_else(|| CoreError::UnknownSetting(s.to_string()))
    }
}

/// Severity classes the debug-report path distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSeverity {
    Error,
    Warning,
    Performance,
    Info,
    Verbose,
}

/// Layer settings, loaded from vkchain.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSettings {
    /// Validation categories to switch off
    #[serde(default)]
    pub disables: Vec<DisableCheck>,
    /// Optional validation features to switch on
    #[serde(default)]
    pub enables: Vec<EnableCheck>,
    /// How many times a single rule identifier is reported (0 = unlimited)
    #[serde(default = "default_duplicate_message_limit")]
    pub duplicate_message_limit: u32,
    /// Rule identifiers that are never reported
    #[serde(default)]
    pub message_id_filter: Vec<String>,
    /// Severities that reach the application's callbacks
    #[serde(default = "default_report_flags")]
    pub report_flags: Vec<ReportSeverity>,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            disables: Vec::new(),
            enables: Vec::new(),
            duplicate_message_limit: default_duplicate_message_limit(),
            message_id_filter: Vec::new(),
            report_flags: default_report_flags(),
        }
    }
}

impl LayerSettings {
    /// Load settings from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let settings: LayerSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(CoreError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!(path, error = %e, "ignoring unreadable layer settings");
                Self::default()
            }
        }
    }

    /// The disable/enable sets described by this file alone.
    pub fn checks(&self) -> ValidationChecks {
        let mut checks = ValidationChecks::default();
        for check in &self.disables {
            checks.disabled |= check.flag();
        }
        for check in &self.enables {
            checks.enabled |= check.flag();
        }
        checks
    }
}

/// The merged disable/enable sets an instance is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationChecks {
    pub disabled: DisableFlags,
    pub enabled: EnableFlags,
}

impl ValidationChecks {
    pub fn is_disabled(&self, flag: DisableFlags) -> bool {
        self.disabled.contains(flag)
    }

    pub fn is_enabled(&self, flag: EnableFlags) -> bool {
        self.enabled.contains(flag)
    }

    pub fn wraps_handles(&self) -> bool {
        !self.is_disabled(DisableFlags::HANDLE_WRAPPING)
    }

    /// Apply the `VKCHAIN_DISABLES` / `VKCHAIN_ENABLES` environment variables.
    pub fn apply_env(&mut self) -> Result<(), CoreError> {
        let disables = std::env::var("VKCHAIN_DISABLES").unwrap_or_default();
        let enables = std::env::var("VKCHAIN_ENABLES").unwrap_or_default();
        self.apply_lists(&disables, &enables)
    }

    /// Apply comma-separated lists of check names. `all` disables everything.
    pub fn apply_lists(&mut self, disables: &str, enables: &str) -> Result<(), CoreError> {
        for name in split_list(disables) {
            if name == "all" {
                self.disabled = DisableFlags::all();
            } else {
                self.disabled |= name.parse::<DisableCheck>()?.flag();
            }
        }
        for name in split_list(enables) {
            self.enabled |= name.parse::<EnableCheck>()?.flag();
        }
        Ok(())
    }

    /// Apply a `VkValidationFeaturesEXT` structure from the instance create info.
    pub fn apply_validation_features(
        &mut self,
        enables: &[vk::ValidationFeatureEnableEXT],
        disables: &[vk::ValidationFeatureDisableEXT],
    ) {
        for &disable in disables {
            self.disabled |= match disable {
                vk::ValidationFeatureDisableEXT::ALL => DisableFlags::all(),
                vk::ValidationFeatureDisableEXT::SHADERS => DisableFlags::SHADER_VALIDATION,
                vk::ValidationFeatureDisableEXT::THREAD_SAFETY => DisableFlags::THREAD_SAFETY,
                vk::ValidationFeatureDisableEXT::API_PARAMETERS => DisableFlags::STATELESS_CHECKS,
                vk::ValidationFeatureDisableEXT::OBJECT_LIFETIMES => DisableFlags::OBJECT_TRACKING,
                vk::ValidationFeatureDisableEXT::CORE_CHECKS => DisableFlags::CORE_CHECKS,
                vk::ValidationFeatureDisableEXT::UNIQUE_HANDLES => DisableFlags::HANDLE_WRAPPING,
                vk::ValidationFeatureDisableEXT::SHADER_VALIDATION_CACHE => {
                    DisableFlags::SHADER_VALIDATION_CACHING
                }
                other => {
                    tracing::debug!(?other, "ignoring unknown validation feature disable");
                    DisableFlags::empty()
                }
            };
        }
        for &enable in enables {
            self.enabled |= match enable {
                vk::ValidationFeatureEnableEXT::GPU_ASSISTED => EnableFlags::GPU_VALIDATION,
                vk::ValidationFeatureEnableEXT::GPU_ASSISTED_RESERVE_BINDING_SLOT => {
                    EnableFlags::GPU_VALIDATION_RESERVE_BINDING_SLOT
                }
                vk::ValidationFeatureEnableEXT::BEST_PRACTICES => EnableFlags::BEST_PRACTICES,
                vk::ValidationFeatureEnableEXT::DEBUG_PRINTF => EnableFlags::DEBUG_PRINTF,
                vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION => {
                    EnableFlags::SYNC_VALIDATION
                }
                other => {
                    tracing::debug!(?other, "ignoring unknown validation feature enable");
                    EnableFlags::empty()
                }
            };
        }
    }

    /// Apply the older `VkValidationFlagsEXT` structure.
    pub fn apply_validation_flags(&mut self, checks: &[vk::ValidationCheckEXT]) {
        for &check in checks {
            match check {
                vk::ValidationCheckEXT::ALL => self.disabled = DisableFlags::all(),
                vk::ValidationCheckEXT::SHADERS => self.disabled |= DisableFlags::SHADER_VALIDATION,
                other => tracing::debug!(?other, "ignoring unknown validation check"),
            }
        }
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Returns the settings file path.
/// Search order:
/// 1. `VKCHAIN_SETTINGS` environment variable
/// 2. System-wide config: `%PROGRAMDATA%\vkchain\vkchain.toml` (Windows) or `/etc/vkchain/vkchain.toml`
/// 3. Local fallback: `./vkchain.toml`
pub fn default_settings_path() -> String {
    if let Ok(path) = std::env::var("VKCHAIN_SETTINGS") {
        return path;
    }
    let system_path = vkchain_common::platform::system_settings_path();
    if std::path::Path::new(&system_path).exists() {
        return system_path;
    }
    "vkchain.toml".to_string()
}

fn default_duplicate_message_limit() -> u32 {
    10
}

fn default_report_flags() -> Vec<ReportSeverity> {
    vec![ReportSeverity::Error, ReportSeverity::Warning]
}
