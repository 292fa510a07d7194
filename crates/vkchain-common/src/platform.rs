/// Returns the system-wide settings file location for this platform.
pub fn system_settings_path() -> String {
    #[cfg(windows)]
    {
        let programdata = std::env::var("PROGRAMDATA")
            .unwrap_or_else(|_| r"C:\ProgramData".to_string());
        format!(r"{}\vkchain\vkchain.toml", programdata)
    }
    #[cfg(not(windows))]
    {
        "/etc/vkchain/vkchain.toml".to_string()
    }
}

/// Returns the platform name string.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    { "windows" }
    #[cfg(target_os = "linux")]
    { "linux" }
    #[cfg(target_os = "macos")]
    { "macos" }
    #[cfg(target_os = "android")]
    { "android" }
    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos", target_os = "android")))]
    { "unknown" }
}
