#[cfg(target_os = "windows")]
pub(crate) mod windows;
