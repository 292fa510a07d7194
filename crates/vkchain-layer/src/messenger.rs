//! Delivery of layer messages to `VK_EXT_debug_utils` messengers.

use std::ffi::{c_void, CString};
use std::sync::Arc;

use ash::vk;
use vkchain_core::config::ReportSeverity;
use vkchain_core::report::ReportCallback;
use vkchain_core::Message;

struct AppMessenger {
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback: unsafe extern "system" fn(
        vk::DebugUtilsMessageSeverityFlagsEXT,
        vk::DebugUtilsMessageTypeFlagsEXT,
        *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
        *mut c_void,
    ) -> vk::Bool32,
    /// Opaque to the layer; handed back to the application untouched.
    user_data: usize,
}

fn severity_flags(severity: ReportSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    match severity {
        ReportSeverity::Error => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        ReportSeverity::Warning | ReportSeverity::Performance => {
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        }
        ReportSeverity::Info => vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        ReportSeverity::Verbose => vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
    }
}

fn type_flags(severity: ReportSeverity) -> vk::DebugUtilsMessageTypeFlagsEXT {
    match severity {
        ReportSeverity::Performance => vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        _ => vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
    }
}

impl AppMessenger {
    fn deliver(&self, message: &Message<'_>) -> bool {
        let severity = severity_flags(message.severity);
        let types = type_flags(message.severity);
        if !self.severity.intersects(severity) || !self.types.intersects(types) {
            return false;
        }

        let rule_id = c_text(message.rule_id);
        let text = c_text(message.text);
        let objects: Vec<vk::DebugUtilsObjectNameInfoEXT<'_>> = message
            .objects
            .iter()
            .map(|object| vk::DebugUtilsObjectNameInfoEXT {
                object_type: object.object_type,
                object_handle: object.handle,
                ..Default::default()
            })
            .collect();
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message_id_name: rule_id.as_ptr(),
            p_message: text.as_ptr(),
            object_count: objects.len() as u32,
            p_objects: objects.as_ptr(),
            ..Default::default()
        };

        let abort = unsafe { (self.callback)(severity, types, &data, self.user_data as *mut c_void) };
        abort == vk::TRUE
    }
}

/// `text` as a C string, with interior NULs replaced.
fn c_text(text: &str) -> CString {
    let text = text.replace('\0', "\u{fffd}");
    CString::new(text).unwrap_or_default()
}

/// Adapt a messenger create info into a report callback. `None` if it names
/// no callback function.
pub(crate) fn messenger_callback(
    info: &vk::DebugUtilsMessengerCreateInfoEXT<'_>,
) -> Option<ReportCallback> {
    let messenger = AppMessenger {
        severity: info.message_severity,
        types: info.message_type,
        callback: info.pfn_user_callback?,
        user_data: info.p_user_data as usize,
    };
    Some(Arc::new(move |message: &Message<'_>| messenger.deliver(message)))
}

/// Messenger create infos chained onto an instance create info.
///
/// # Safety
/// `p_next` must be a valid Vulkan structure chain.
pub(crate) unsafe fn chained_messengers<'a>(
    p_next: *const c_void,
) -> Vec<&'a vk::DebugUtilsMessengerCreateInfoEXT<'a>> {
    unsafe { crate::instance::p_next_chain(p_next) }
        .filter(|&base| unsafe { (*base).s_type } == vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT)
        .filter_map(|base| unsafe { base.cast::<vk::DebugUtilsMessengerCreateInfoEXT<'a>>().as_ref() })
        .collect()
}
