//! Monitor enumeration over the DXGI adapter/output topology.
//!
//! Monitors are addressed by a flat index in enumeration order, matching
//! the `--source`/`--target` CLI surface. Each entry carries the DXGI
//! adapter and output so duplication can be established directly on the
//! owning adapter, plus HDR metadata joined in from the display-config
//! API (the OS-side SDR white level the tonemapper can be compared
//! against).

use std::mem;

use anyhow::Context;
use rustc_hash::FxHashMap;
use windows::Win32::Devices::Display::{
    DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO,
    DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL, DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
    DISPLAYCONFIG_DEVICE_INFO_HEADER, DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO,
    DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_PATH_INFO, DISPLAYCONFIG_SDR_WHITE_LEVEL,
    DISPLAYCONFIG_SOURCE_DEVICE_NAME, DisplayConfigGetDeviceInfo, GetDisplayConfigBufferSizes,
    QDC_ONLY_ACTIVE_PATHS, QueryDisplayConfig,
};
use windows::Win32::Foundation::{POINT, RECT};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, IDXGIAdapter, IDXGIFactory1, IDXGIOutput,
};
use windows::Win32::Graphics::Gdi::{HMONITOR, MONITOR_DEFAULTTOPRIMARY, MonitorFromPoint};

use crate::error::{MirrorError, MirrorResult};

pub(crate) struct MonitorDescriptor {
    pub index: usize,
    pub name: String,
    /// Desktop coordinates of the monitor in the virtual screen.
    pub rect: RECT,
    pub is_primary: bool,
    /// Advanced color (HDR pipeline) active on this output.
    pub advanced_color: bool,
    /// OS-reported SDR white level in nits, when advanced color is on.
    pub sdr_white_nits: Option<f32>,
    pub adapter: IDXGIAdapter,
    pub output: IDXGIOutput,
}

impl MonitorDescriptor {
    pub fn width(&self) -> u32 {
        (self.rect.right - self.rect.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.rect.bottom - self.rect.top).max(0) as u32
    }

    /// One row of the `--list` table.
    pub fn list_line(&self) -> String {
        let mut line = format!(
            "  {}: {}x{} at ({},{})",
            self.index,
            self.width(),
            self.height(),
            self.rect.left,
            self.rect.top
        );
        if self.is_primary {
            line.push_str(" [primary]");
        }
        if self.advanced_color {
            line.push_str(" [hdr]");
        }
        line
    }
}

/// Enumerate every output attached to the desktop, in adapter-then-output
/// order.
pub(crate) fn enumerate_monitors() -> MirrorResult<Vec<MonitorDescriptor>> {
    let hdr_map = query_displayconfig_hdr_map();

    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(MirrorError::Platform)?;
    let primary = primary_hmonitor();

    let mut monitors = Vec::new();
    let mut adapter_idx = 0u32;

    loop {
        let adapter = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(adapter) => adapter,
            Err(error) if error.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(error) => {
                return Err(MirrorError::Platform(
                    anyhow::Error::from(error)
                        .context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let adapter: IDXGIAdapter = adapter
            .cast()
            .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
            .map_err(MirrorError::Platform)?;

        let mut output_idx = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_idx) } {
                Ok(output) => output,
                Err(error) if error.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(error) => {
                    return Err(MirrorError::Platform(anyhow::Error::from(error).context(
                        format!("EnumOutputs({output_idx}) on adapter {adapter_idx} failed"),
                    )));
                }
            };

            let desc = unsafe { output.GetDesc() }
                .context("IDXGIOutput::GetDesc failed")
                .map_err(MirrorError::Platform)?;

            if desc.AttachedToDesktop.as_bool() {
                let name = utf16z_to_string(&desc.DeviceName);
                let hdr = hdr_map.get(&name).copied().unwrap_or_default();
                monitors.push(MonitorDescriptor {
                    index: monitors.len(),
                    name,
                    rect: desc.DesktopCoordinates,
                    is_primary: desc.Monitor == primary,
                    advanced_color: hdr.advanced_color_enabled,
                    sdr_white_nits: hdr.sdr_white_level_nits,
                    adapter: adapter.clone(),
                    output,
                });
            }

            output_idx += 1;
        }

        adapter_idx += 1;
    }

    Ok(monitors)
}

fn primary_hmonitor() -> HMONITOR {
    unsafe { MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY) }
}

fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

#[derive(Clone, Copy, Debug, Default)]
struct DisplayConfigHdrInfo {
    advanced_color_enabled: bool,
    sdr_white_level_nits: Option<f32>,
}

/// Join advanced-color state and the SDR white level onto GDI device
/// names via the display-config API. Best-effort: any failure yields an
/// empty map and the mirror falls back to configured values.
fn query_displayconfig_hdr_map() -> FxHashMap<String, DisplayConfigHdrInfo> {
    let mut path_count = 0u32;
    let mut mode_count = 0u32;
    if unsafe {
        GetDisplayConfigBufferSizes(QDC_ONLY_ACTIVE_PATHS, &mut path_count, &mut mode_count)
    }
    .ok()
    .is_err()
        || path_count == 0
    {
        return FxHashMap::default();
    }

    let mut paths = vec![DISPLAYCONFIG_PATH_INFO::default(); path_count as usize];
    let mut modes = vec![DISPLAYCONFIG_MODE_INFO::default(); mode_count as usize];
    if unsafe {
        QueryDisplayConfig(
            QDC_ONLY_ACTIVE_PATHS,
            &mut path_count,
            paths.as_mut_ptr(),
            &mut mode_count,
            modes.as_mut_ptr(),
            None,
        )
    }
    .ok()
    .is_err()
    {
        return FxHashMap::default();
    }

    let mut map = FxHashMap::default();
    let count = usize::min(path_count as usize, paths.len());
    for path in &paths[..count] {
        let mut source = DISPLAYCONFIG_SOURCE_DEVICE_NAME {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
                size: mem::size_of::<DISPLAYCONFIG_SOURCE_DEVICE_NAME>() as u32,
                adapterId: path.sourceInfo.adapterId,
                id: path.sourceInfo.id,
            },
            ..Default::default()
        };
        if unsafe { DisplayConfigGetDeviceInfo(&mut source.header) } != 0 {
            continue;
        }
        let gdi_name = utf16z_to_string(&source.viewGdiDeviceName);
        if gdi_name.is_empty() {
            continue;
        }

        let mut advanced = DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO,
                size: mem::size_of::<DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO>() as u32,
                adapterId: path.targetInfo.adapterId,
                id: path.targetInfo.id,
            },
            ..Default::default()
        };
        let advanced_color_enabled =
            if unsafe { DisplayConfigGetDeviceInfo(&mut advanced.header) } == 0 {
                let flags = unsafe { advanced.Anonymous.value };
                // Bit 0: advanced color supported, bit 1: enabled.
                (flags & 0x1) != 0 && (flags & 0x2) != 0
            } else {
                false
            };

        let mut sdr_white = DISPLAYCONFIG_SDR_WHITE_LEVEL {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL,
                size: mem::size_of::<DISPLAYCONFIG_SDR_WHITE_LEVEL>() as u32,
                adapterId: path.targetInfo.adapterId,
                id: path.targetInfo.id,
            },
            ..Default::default()
        };
        // SDRWhiteLevel is in thousandths of the 80-nit reference.
        let sdr_white_level_nits = if advanced_color_enabled
            && unsafe { DisplayConfigGetDeviceInfo(&mut sdr_white.header) } == 0
        {
            Some(((sdr_white.SDRWhiteLevel as f32) * 80.0 / 1000.0).round())
        } else {
            None
        };

        let entry: &mut DisplayConfigHdrInfo = map.entry(gdi_name).or_default();
        entry.advanced_color_enabled |= advanced_color_enabled;
        if entry.sdr_white_level_nits.is_none() {
            entry.sdr_white_level_nits = sdr_white_level_nits;
        }
    }

    map
}
