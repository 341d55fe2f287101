//! Desktop-duplication capture engine.
//!
//! Runs on its own thread at the source monitor's refresh cadence,
//! blocking in `AcquireNextFrame`. Each accepted frame is copied through
//! the capture device into the shared slot textures and published to the
//! triple buffer with a fresh frame ID. The slot textures themselves are
//! created on the *render* device once the first frame reveals the real
//! capture format, then opened here through cross-device shared handles
//! so neither device's context is ever driven from the other thread.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_DESC, DXGI_OUTDUPL_FRAME_INFO,
    DXGI_OUTDUPL_POINTER_SHAPE_INFO, IDXGIOutput, IDXGIOutput1, IDXGIOutput5,
    IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::cursor::{CursorShape, CursorShapeKind};
use crate::error::{MirrorError, MirrorResult};
use crate::frame::{SourceDescriptor, SourceFormat};
use crate::session::{SharedState, SlotTable};

use super::d3d11;
use super::monitor::MonitorDescriptor;

const ACQUIRE_TIMEOUT_MS: u32 = 100;
const ACCESS_LOST_BACKOFF: Duration = Duration::from_millis(100);

/// Formats requested from the duplication interface, in preference
/// order: HDR sources arrive as linear scRGB float, SDR sources in the
/// 8-bit sRGB container.
const PREFERRED_FORMATS: [windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT; 2] =
    [DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_FORMAT_B8G8R8A8_UNORM];

/// Setup-time facts about the duplication stream, printed in the
/// startup banner before the first frame arrives.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DuplicationInfo {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: f32,
    pub reported_hdr: bool,
}

pub(crate) struct CaptureEngine {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    output: IDXGIOutput,
    render_device: ID3D11Device,
    shared: Arc<SharedState>,
    show_cursor: bool,
    reported_hdr: bool,
    /// Capture-device aliases of the shared slot textures.
    slot_copies: Option<[ID3D11Texture2D; 3]>,
    /// Reused pointer-shape buffer, grown on demand.
    shape_buffer: Vec<u8>,
}

// The engine is constructed on the main thread and then moved onto the
// capture thread, which becomes the only user of its COM pointers. The
// D3D11 devices are created without the single-threaded flag, and the
// render device is only used here for (free-threaded) resource
// creation, never for context work.
unsafe impl Send for CaptureEngine {}

impl CaptureEngine {
    pub fn new(
        monitor: &MonitorDescriptor,
        render_device: ID3D11Device,
        shared: Arc<SharedState>,
        show_cursor: bool,
    ) -> MirrorResult<Self> {
        let (device, context) = d3d11::create_device("capture").map_err(MirrorError::Platform)?;
        let duplication = create_duplication(&monitor.output, &device)?;

        let mut desc = DXGI_OUTDUPL_DESC::default();
        unsafe { duplication.GetDesc(&mut desc) };
        let reported_hdr = desc.ModeDesc.Format == DXGI_FORMAT_R16G16B16A16_FLOAT;

        Ok(Self {
            device,
            context,
            duplication,
            output: monitor.output.clone(),
            render_device,
            shared,
            show_cursor,
            reported_hdr,
            slot_copies: None,
            shape_buffer: Vec::new(),
        })
    }

    pub fn info(&self) -> DuplicationInfo {
        let mut desc = DXGI_OUTDUPL_DESC::default();
        unsafe { self.duplication.GetDesc(&mut desc) };
        let refresh_hz = if desc.ModeDesc.RefreshRate.Denominator != 0 {
            desc.ModeDesc.RefreshRate.Numerator as f32 / desc.ModeDesc.RefreshRate.Denominator as f32
        } else {
            0.0
        };
        DuplicationInfo {
            width: desc.ModeDesc.Width,
            height: desc.ModeDesc.Height,
            refresh_hz,
            reported_hdr: self.reported_hdr,
        }
    }

    /// Capture-thread entry point. Returns when the running flag drops;
    /// a fatal first-frame error is recorded on the shared state before
    /// returning so the main thread can report it.
    pub fn run(mut self) {
        while self.shared.is_running() {
            let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource: Option<IDXGIResource> = None;
            let acquired = unsafe {
                self.duplication
                    .AcquireNextFrame(ACQUIRE_TIMEOUT_MS, &mut info, &mut resource)
            };

            if let Err(error) = acquired {
                if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                    continue;
                }
                if error.code() == DXGI_ERROR_ACCESS_LOST {
                    debug!("duplication access lost, rebuilding");
                    self.rebuild_duplication();
                    continue;
                }
                debug!("AcquireNextFrame failed: {error}");
                continue;
            }

            if self.show_cursor {
                self.update_cursor(&info);
            }

            // A frame with no present and no accumulation is a
            // mouse-only update; the very first frame is always taken
            // so the slot textures can be initialized.
            let has_new_content = info.LastPresentTime != 0
                || info.AccumulatedFrames > 0
                || self.slot_copies.is_none();

            if has_new_content {
                match resource.as_ref().map(|res| res.cast::<ID3D11Texture2D>()) {
                    Some(Ok(texture)) => {
                        if self.slot_copies.is_none() {
                            if let Err(error) = self.initialize_slots(&texture) {
                                drop(texture);
                                drop(resource);
                                unsafe { self.duplication.ReleaseFrame() }.ok();
                                self.shared.record_failure(error);
                                self.shared.stop();
                                return;
                            }
                        }
                        self.copy_and_publish(&texture);
                    }
                    Some(Err(error)) => {
                        debug!("acquired resource is not a texture: {error}")
                    }
                    None => {}
                }
            }

            drop(resource);
            unsafe { self.duplication.ReleaseFrame() }.ok();
        }
    }

    fn copy_and_publish(&mut self, texture: &ID3D11Texture2D) {
        let Some(slots) = self.slot_copies.as_ref() else {
            return;
        };
        let write = self.shared.buffer.write_index();
        unsafe {
            self.context.CopyResource(&slots[write], texture);
            self.context.Flush();
        }

        let frame_id = self.shared.counters.next_frame_id();
        self.shared.buffer.publish(frame_id);

        // The ready flag is raised only after the first publish so a
        // consumer that observes it also observes slot contents and the
        // format descriptor.
        if !self.shared.is_buffer_ready() {
            self.shared.mark_buffer_ready();
            debug!(frame_id, "triple buffer initialized and first frame published");
        }
    }

    /// Create the three shared slot textures in the format the first
    /// frame actually arrived in, and open them on the capture device.
    fn initialize_slots(&mut self, first_frame: &ID3D11Texture2D) -> MirrorResult<()> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { first_frame.GetDesc(&mut desc) };

        let format = match desc.Format {
            DXGI_FORMAT_R16G16B16A16_FLOAT => SourceFormat::Rgba16Float,
            DXGI_FORMAT_B8G8R8A8_UNORM => SourceFormat::Bgra8,
            other => {
                return Err(MirrorError::UnsupportedFormat(format!(
                    "DXGI_FORMAT({})",
                    other.0
                )));
            }
        };
        debug!(
            width = desc.Width,
            height = desc.Height,
            ?format,
            "initializing slot textures from first frame"
        );

        let slot_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.Width,
            Height: desc.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: desc.Format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
            ..Default::default()
        };

        let mut shared_textures = Vec::with_capacity(3);
        let mut local_copies = Vec::with_capacity(3);
        for slot in 0..3 {
            let mut texture: Option<ID3D11Texture2D> = None;
            unsafe {
                self.render_device
                    .CreateTexture2D(&slot_desc, None, Some(&mut texture))
            }
            .with_context(|| format!("CreateTexture2D for slot {slot} failed"))
            .map_err(MirrorError::Platform)?;
            let texture = texture
                .with_context(|| format!("CreateTexture2D returned no texture for slot {slot}"))
                .map_err(MirrorError::Platform)?;

            let dxgi_resource: IDXGIResource = texture
                .cast()
                .context("failed to cast a slot texture to IDXGIResource")
                .map_err(MirrorError::Platform)?;
            let handle = unsafe { dxgi_resource.GetSharedHandle() }
                .context("GetSharedHandle for a slot texture failed")
                .map_err(MirrorError::Platform)?;
            let mut opened: Option<ID3D11Texture2D> = None;
            unsafe { self.device.OpenSharedResource(handle, &mut opened) }
                .with_context(|| format!("OpenSharedResource for slot {slot} failed"))
                .map_err(MirrorError::Platform)?;
            let opened = opened
                .with_context(|| format!("OpenSharedResource returned no texture for slot {slot}"))
                .map_err(MirrorError::Platform)?;

            shared_textures.push(texture);
            local_copies.push(opened);
        }

        let descriptor = SourceDescriptor {
            format,
            width: desc.Width,
            height: desc.Height,
            reported_hdr: self.reported_hdr,
        };
        let textures: [ID3D11Texture2D; 3] = shared_textures
            .try_into()
            .map_err(|_| MirrorError::Platform(anyhow::anyhow!("slot texture count mismatch")))?;
        self.shared.install_slots(SlotTable {
            textures,
            descriptor,
        });
        self.slot_copies = Some(
            local_copies
                .try_into()
                .map_err(|_| MirrorError::Platform(anyhow::anyhow!("slot alias count mismatch")))?,
        );
        Ok(())
    }

    fn update_cursor(&mut self, info: &DXGI_OUTDUPL_FRAME_INFO) {
        // A zero mouse-update time means the pointer did not move this
        // frame; keep the last known position.
        if info.LastMouseUpdateTime != 0 {
            self.shared.cursor.set_position(
                info.PointerPosition.Position.x,
                info.PointerPosition.Position.y,
                info.PointerPosition.Visible.as_bool(),
            );
        }

        if info.PointerShapeBufferSize == 0 {
            return;
        }
        let required = info.PointerShapeBufferSize as usize;
        if self.shape_buffer.len() < required {
            self.shape_buffer.resize(required, 0);
        }

        let mut written = 0u32;
        let mut shape_info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        let result = unsafe {
            self.duplication.GetFramePointerShape(
                self.shape_buffer.len() as u32,
                self.shape_buffer.as_mut_ptr() as *mut _,
                &mut written,
                &mut shape_info,
            )
        };
        if let Err(error) = result {
            debug!("GetFramePointerShape failed: {error}");
            return;
        }

        let Some(kind) = CursorShapeKind::from_dxgi(shape_info.Type) else {
            debug!(shape_type = shape_info.Type, "unknown pointer shape type");
            return;
        };
        debug!(
            ?kind,
            width = shape_info.Width,
            height = shape_info.Height,
            pitch = shape_info.Pitch,
            "pointer shape updated"
        );
        self.shared.cursor.store_shape(CursorShape {
            kind,
            width: shape_info.Width,
            height: shape_info.Height,
            pitch: shape_info.Pitch,
            bytes: self.shape_buffer[..written as usize].to_vec(),
        });
    }

    /// Tear down and re-establish the duplication interface after an
    /// access-lost, backing off between attempts. The slot textures are
    /// dropped too: a mode change behind the access-lost can alter the
    /// desktop's size or format, so the next frame re-initializes them.
    fn rebuild_duplication(&mut self) {
        self.slot_copies = None;
        while self.shared.is_running() {
            std::thread::sleep(ACCESS_LOST_BACKOFF);
            match create_duplication(&self.output, &self.device) {
                Ok(duplication) => {
                    let mut desc = DXGI_OUTDUPL_DESC::default();
                    unsafe { duplication.GetDesc(&mut desc) };
                    self.reported_hdr = desc.ModeDesc.Format == DXGI_FORMAT_R16G16B16A16_FLOAT;
                    self.duplication = duplication;
                    debug!("duplication interface re-established");
                    return;
                }
                Err(error) => {
                    warn!("failed to re-establish duplication: {error}");
                }
            }
        }
    }
}

/// Establish duplication on the output, preferring the format-aware
/// interface so HDR sources arrive as linear scRGB.
fn create_duplication(
    output: &IDXGIOutput,
    device: &ID3D11Device,
) -> MirrorResult<IDXGIOutputDuplication> {
    if let Ok(output5) = output.cast::<IDXGIOutput5>() {
        match unsafe { output5.DuplicateOutput1(device, 0, &PREFERRED_FORMATS) } {
            Ok(duplication) => {
                debug!("using IDXGIOutput5::DuplicateOutput1 (HDR capable)");
                return Ok(duplication);
            }
            Err(error) => {
                debug!("DuplicateOutput1 failed, falling back: {error}");
            }
        }
    }

    let output1: IDXGIOutput1 = output.cast().map_err(|error| {
        MirrorError::DuplicationUnavailable(format!("IDXGIOutput1 unavailable: {error}"))
    })?;
    unsafe { output1.DuplicateOutput(device) }
        .map_err(|error| MirrorError::DuplicationUnavailable(error.to_string()))
}
