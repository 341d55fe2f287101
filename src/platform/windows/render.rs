//! Vsync-locked render engine: waitable swap chain, full-screen quad
//! pipeline with per-format pixel shaders, and the cursor overlay.
//!
//! All GPU objects except the per-slot resources are created once at
//! startup. Slot shader-resource views appear on the first rendered
//! frame (the capture engine only then knows the real source format)
//! and the cursor texture is rebuilt whenever the shape-dirty handshake
//! fires.

use anyhow::Context;
use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_CONSTANT_BUFFER, D3D11_BIND_SHADER_RESOURCE, D3D11_BIND_VERTEX_BUFFER,
    D3D11_BLEND_DESC, D3D11_BLEND_INV_SRC_ALPHA, D3D11_BLEND_ONE, D3D11_BLEND_OP_ADD,
    D3D11_BLEND_SRC_ALPHA, D3D11_BLEND_ZERO, D3D11_BUFFER_DESC, D3D11_CPU_ACCESS_WRITE,
    D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA, D3D11_MAP_WRITE_DISCARD,
    D3D11_MAPPED_SUBRESOURCE, D3D11_SAMPLER_DESC, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC,
    D3D11_TEXTURE_ADDRESS_CLAMP, D3D11_USAGE_DEFAULT, D3D11_USAGE_DYNAMIC, D3D11_USAGE_IMMUTABLE,
    D3D11_VIEWPORT, ID3D11BlendState, ID3D11Buffer, ID3D11Device, ID3D11DeviceContext,
    ID3D11InputLayout, ID3D11PixelShader, ID3D11RenderTargetView, ID3D11SamplerState,
    ID3D11ShaderResourceView, ID3D11Texture2D, ID3D11VertexShader,
    D3D11_COLOR_WRITE_ENABLE_ALL, D3D11_FILTER_MIN_MAG_MIP_LINEAR,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R32G32_FLOAT, DXGI_MODE_DESC, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_PRESENT, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT,
    DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT, IDXGIAdapter, IDXGIDevice,
    IDXGIFactory2, IDXGISwapChain1, IDXGISwapChain2,
};
use windows::Win32::System::Threading::WaitForSingleObjectEx;
use windows::core::Interface;

use crate::config::MirrorConfig;
use crate::cursor::CursorShape;
use crate::error::{MirrorError, MirrorResult};
use crate::frame::{SourceDescriptor, SourceFormat};
use crate::session::SharedState;
use crate::tonemap::TonemapConstants;
use crate::viewport::{FitRect, cursor_ndc_rect, fit_viewport};

use super::d3d11;
use super::shaders;
use super::window::MirrorWindow;

#[repr(C)]
#[derive(Clone, Copy)]
struct Vertex {
    position: [f32; 2],
    tex_coord: [f32; 2],
}

/// Full-screen quad as a 4-vertex triangle strip.
const QUAD: [Vertex; 4] = [
    Vertex {
        position: [-1.0, 1.0],
        tex_coord: [0.0, 0.0],
    },
    Vertex {
        position: [1.0, 1.0],
        tex_coord: [1.0, 0.0],
    },
    Vertex {
        position: [-1.0, -1.0],
        tex_coord: [0.0, 1.0],
    },
    Vertex {
        position: [1.0, -1.0],
        tex_coord: [1.0, 1.0],
    },
];

/// Per-slot views plus the viewport derived from the source geometry.
/// Created on the first rendered frame and rebuilt whenever the capture
/// engine installs a new slot table (access-lost recovery may change
/// the source mode).
struct SlotViews {
    srvs: [ID3D11ShaderResourceView; 3],
    descriptor: SourceDescriptor,
    viewport: FitRect,
    generation: u64,
}

pub(crate) struct RenderEngine {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swap_chain: IDXGISwapChain1,
    latency_waitable: Option<HANDLE>,
    rtv: ID3D11RenderTargetView,

    vertex_shader: ID3D11VertexShader,
    input_layout: ID3D11InputLayout,
    ps_passthrough: ID3D11PixelShader,
    ps_linear_srgb: ID3D11PixelShader,
    ps_tonemap: ID3D11PixelShader,
    ps_cursor: ID3D11PixelShader,
    sampler: ID3D11SamplerState,
    quad_vb: ID3D11Buffer,
    cursor_vb: ID3D11Buffer,
    tonemap_cb: ID3D11Buffer,
    blend_state: ID3D11BlendState,

    slot_views: Option<SlotViews>,
    cursor_srv: Option<ID3D11ShaderResourceView>,

    window_width: u32,
    window_height: u32,
    preserve_aspect: bool,
    tonemap_enabled: bool,
    sdr_white_nits: f32,
    show_cursor: bool,
    first_render_logged: bool,
}

impl RenderEngine {
    pub fn new(window: &MirrorWindow, config: &MirrorConfig) -> MirrorResult<Self> {
        let (device, context) = d3d11::create_device("render").map_err(MirrorError::Platform)?;

        let dxgi_device: IDXGIDevice = device
            .cast()
            .context("failed to query IDXGIDevice from the render device")
            .map_err(MirrorError::Platform)?;
        let adapter: IDXGIAdapter = unsafe { dxgi_device.GetAdapter() }
            .context("IDXGIDevice::GetAdapter failed")
            .map_err(MirrorError::Platform)?;
        let factory: IDXGIFactory2 = unsafe { adapter.GetParent() }
            .context("IDXGIAdapter::GetParent failed")
            .map_err(MirrorError::Platform)?;

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: window.width(),
            Height: window.height(),
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: 2,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            Flags: if config.use_waitable_swapchain {
                DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT.0 as u32
            } else {
                0
            },
            ..Default::default()
        };
        let swap_chain = unsafe {
            factory.CreateSwapChainForHwnd(&device, window.hwnd(), &swap_chain_desc, None, None)
        }
        .context("CreateSwapChainForHwnd failed")
        .map_err(MirrorError::Platform)?;

        // Latency 1 keeps exactly one frame queued, so the waitable
        // fires right after the vsync that consumed it.
        let latency_waitable = if config.use_waitable_swapchain {
            match swap_chain.cast::<IDXGISwapChain2>() {
                Ok(swap_chain2) => {
                    unsafe { swap_chain2.SetMaximumFrameLatency(1) }
                        .context("SetMaximumFrameLatency failed")
                        .map_err(MirrorError::Platform)?;
                    Some(unsafe { swap_chain2.GetFrameLatencyWaitableObject() })
                }
                Err(error) => {
                    debug!("waitable swap chain unavailable: {error}");
                    None
                }
            }
        } else {
            None
        };

        let back_buffer: ID3D11Texture2D = unsafe { swap_chain.GetBuffer(0) }
            .context("IDXGISwapChain1::GetBuffer failed")
            .map_err(MirrorError::Platform)?;
        let mut rtv = None;
        unsafe { device.CreateRenderTargetView(&back_buffer, None, Some(&mut rtv)) }
            .context("CreateRenderTargetView for the back buffer failed")
            .map_err(MirrorError::Platform)?;
        let rtv = rtv
            .context("CreateRenderTargetView returned no view")
            .map_err(MirrorError::Platform)?;

        let shader_set = shaders::load_shader_set()?;

        let mut vertex_shader = None;
        unsafe { device.CreateVertexShader(&shader_set.vs, None, Some(&mut vertex_shader)) }
            .context("CreateVertexShader failed")
            .map_err(MirrorError::Platform)?;
        let vertex_shader = vertex_shader
            .context("CreateVertexShader returned no shader")
            .map_err(MirrorError::Platform)?;

        let input_elements = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: windows::core::s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: windows::core::s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 8,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut input_layout = None;
        unsafe { device.CreateInputLayout(&input_elements, &shader_set.vs, Some(&mut input_layout)) }
            .context("CreateInputLayout failed")
            .map_err(MirrorError::Platform)?;
        let input_layout = input_layout
            .context("CreateInputLayout returned no layout")
            .map_err(MirrorError::Platform)?;

        let ps_passthrough = create_pixel_shader(&device, &shader_set.ps_passthrough, "passthrough")?;
        let ps_linear_srgb = create_pixel_shader(&device, &shader_set.ps_linear_srgb, "linear-srgb")?;
        let ps_tonemap = create_pixel_shader(&device, &shader_set.ps_tonemap, "tonemap")?;
        let ps_cursor = create_pixel_shader(&device, &shader_set.ps_cursor, "cursor")?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            ..Default::default()
        };
        let mut sampler = None;
        unsafe { device.CreateSamplerState(&sampler_desc, Some(&mut sampler)) }
            .context("CreateSamplerState failed")
            .map_err(MirrorError::Platform)?;
        let sampler = sampler
            .context("CreateSamplerState returned no sampler")
            .map_err(MirrorError::Platform)?;

        let quad_vb_desc = D3D11_BUFFER_DESC {
            ByteWidth: std::mem::size_of_val(&QUAD) as u32,
            Usage: D3D11_USAGE_IMMUTABLE,
            BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
            ..Default::default()
        };
        let quad_data = D3D11_SUBRESOURCE_DATA {
            pSysMem: QUAD.as_ptr() as *const _,
            ..Default::default()
        };
        let mut quad_vb = None;
        unsafe { device.CreateBuffer(&quad_vb_desc, Some(&quad_data), Some(&mut quad_vb)) }
            .context("CreateBuffer for the quad vertex buffer failed")
            .map_err(MirrorError::Platform)?;
        let quad_vb = quad_vb
            .context("CreateBuffer returned no quad vertex buffer")
            .map_err(MirrorError::Platform)?;

        let cursor_vb_desc = D3D11_BUFFER_DESC {
            ByteWidth: std::mem::size_of_val(&QUAD) as u32,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            ..Default::default()
        };
        let mut cursor_vb = None;
        unsafe { device.CreateBuffer(&cursor_vb_desc, None, Some(&mut cursor_vb)) }
            .context("CreateBuffer for the cursor vertex buffer failed")
            .map_err(MirrorError::Platform)?;
        let cursor_vb = cursor_vb
            .context("CreateBuffer returned no cursor vertex buffer")
            .map_err(MirrorError::Platform)?;

        let tonemap_cb_desc = D3D11_BUFFER_DESC {
            ByteWidth: std::mem::size_of::<TonemapConstants>() as u32,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            ..Default::default()
        };
        let mut tonemap_cb = None;
        unsafe { device.CreateBuffer(&tonemap_cb_desc, None, Some(&mut tonemap_cb)) }
            .context("CreateBuffer for the tonemap constant buffer failed")
            .map_err(MirrorError::Platform)?;
        let tonemap_cb = tonemap_cb
            .context("CreateBuffer returned no tonemap constant buffer")
            .map_err(MirrorError::Platform)?;

        // Straight-alpha blend for the cursor overlay.
        let mut blend_desc = D3D11_BLEND_DESC::default();
        blend_desc.RenderTarget[0].BlendEnable = true.into();
        blend_desc.RenderTarget[0].SrcBlend = D3D11_BLEND_SRC_ALPHA;
        blend_desc.RenderTarget[0].DestBlend = D3D11_BLEND_INV_SRC_ALPHA;
        blend_desc.RenderTarget[0].BlendOp = D3D11_BLEND_OP_ADD;
        blend_desc.RenderTarget[0].SrcBlendAlpha = D3D11_BLEND_ONE;
        blend_desc.RenderTarget[0].DestBlendAlpha = D3D11_BLEND_ZERO;
        blend_desc.RenderTarget[0].BlendOpAlpha = D3D11_BLEND_OP_ADD;
        blend_desc.RenderTarget[0].RenderTargetWriteMask = D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8;
        let mut blend_state = None;
        unsafe { device.CreateBlendState(&blend_desc, Some(&mut blend_state)) }
            .context("CreateBlendState failed")
            .map_err(MirrorError::Platform)?;
        let blend_state = blend_state
            .context("CreateBlendState returned no blend state")
            .map_err(MirrorError::Platform)?;

        Ok(Self {
            device,
            context,
            swap_chain,
            latency_waitable,
            rtv,
            vertex_shader,
            input_layout,
            ps_passthrough,
            ps_linear_srgb,
            ps_tonemap,
            ps_cursor,
            sampler,
            quad_vb,
            cursor_vb,
            tonemap_cb,
            blend_state,
            slot_views: None,
            cursor_srv: None,
            window_width: window.width(),
            window_height: window.height(),
            preserve_aspect: config.preserve_aspect,
            tonemap_enabled: config.tonemap,
            sdr_white_nits: config.sdr_white_nits,
            show_cursor: config.show_cursor,
            first_render_logged: false,
        })
    }

    /// The render device; the capture engine creates the shared slot
    /// textures on it.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    /// Refresh rate of the output the swap chain presents to.
    pub fn target_refresh_hz(&self) -> Option<f32> {
        let output = unsafe { self.swap_chain.GetContainingOutput() }.ok()?;
        let mode = DXGI_MODE_DESC {
            Width: self.window_width,
            Height: self.window_height,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            ..Default::default()
        };
        let mut closest = DXGI_MODE_DESC::default();
        unsafe { output.FindClosestMatchingMode(&mode, &mut closest, &self.device) }.ok()?;
        if closest.RefreshRate.Denominator == 0 {
            return None;
        }
        Some(closest.RefreshRate.Numerator as f32 / closest.RefreshRate.Denominator as f32)
    }

    /// Block until the swap chain is ready for the next frame, aligning
    /// the iteration just after the destination vsync. Bounded at 100 ms
    /// so shutdown is never stalled.
    pub fn wait_for_latency_gate(&self) {
        if let Some(waitable) = self.latency_waitable {
            unsafe {
                WaitForSingleObjectEx(waitable, 100, true);
            }
        }
    }

    /// Draw the freshest captured frame (and the cursor) into the back
    /// buffer. Returns the frame ID that was drawn, or `None` when the
    /// triple buffer is not initialized yet.
    pub fn render(&mut self, shared: &SharedState) -> MirrorResult<Option<u64>> {
        if !shared.is_buffer_ready() {
            return Ok(None);
        }
        self.ensure_slot_views(shared)?;

        let Some((slot, frame_id)) = shared.buffer.acquire() else {
            return Ok(None);
        };

        let (source_srv, descriptor, viewport) = {
            // The ready flag is raised only after the slot table is
            // installed, so the views exist by the time acquire can
            // succeed.
            let Some(views) = self.slot_views.as_ref() else {
                return Ok(None);
            };
            (views.srvs[slot].clone(), views.descriptor, views.viewport)
        };

        if !self.first_render_logged {
            debug!(
                slot,
                frame_id,
                format = %descriptor.format,
                "first frame rendered"
            );
            self.first_render_logged = true;
        }

        unsafe {
            self.context.OMSetRenderTargets(Some(&[Some(self.rtv.clone())]), None);
            self.context
                .ClearRenderTargetView(&self.rtv, &[0.0, 0.0, 0.0, 1.0]);
            self.context.RSSetViewports(Some(&[d3d_viewport(viewport)]));

            self.context.VSSetShader(&self.vertex_shader, None);
            self.context.IASetInputLayout(&self.input_layout);
            self.context
                .IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP);
            let stride = std::mem::size_of::<Vertex>() as u32;
            let offset = 0u32;
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(self.quad_vb.clone())),
                Some(&stride),
                Some(&offset),
            );
        }

        self.bind_source_shader(descriptor)?;

        unsafe {
            self.context
                .PSSetShaderResources(0, Some(&[Some(source_srv)]));
            self.context
                .PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            self.context.Draw(4, 0);
        }

        if self.show_cursor {
            self.draw_cursor(shared, viewport, descriptor)?;
        }

        // Unbind so the producer-side copies never overlap a bound SRV.
        unsafe {
            self.context.PSSetShaderResources(0, Some(&[None]));
        }

        Ok(Some(frame_id))
    }

    /// Present with interval 1 (vsync). Presentation failures are
    /// transient in the steady state and surface as debug diagnostics.
    pub fn present(&self) {
        let hr = unsafe { self.swap_chain.Present(1, DXGI_PRESENT(0)) };
        if hr.is_err() {
            debug!("Present failed: 0x{:08X}", hr.0);
        }
    }

    fn ensure_slot_views(&mut self, shared: &SharedState) -> MirrorResult<()> {
        let generation = shared.slots_generation();
        if self
            .slot_views
            .as_ref()
            .is_some_and(|views| views.generation == generation)
        {
            return Ok(());
        }
        let Some(table) = shared.slot_table() else {
            return Ok(());
        };

        let mut srvs = Vec::with_capacity(3);
        for texture in &table.textures {
            let mut srv = None;
            unsafe { self.device.CreateShaderResourceView(texture, None, Some(&mut srv)) }
                .context("CreateShaderResourceView for a slot texture failed")
                .map_err(MirrorError::Platform)?;
            srvs.push(
                srv.context("CreateShaderResourceView returned no view")
                    .map_err(MirrorError::Platform)?,
            );
        }
        let srvs: [ID3D11ShaderResourceView; 3] = srvs
            .try_into()
            .map_err(|_| MirrorError::Platform(anyhow::anyhow!("slot view count mismatch")))?;

        let viewport = fit_viewport(
            table.descriptor.width as f32,
            table.descriptor.height as f32,
            self.window_width as f32,
            self.window_height as f32,
            self.preserve_aspect,
        );
        debug!(
            width = table.descriptor.width,
            height = table.descriptor.height,
            format = %table.descriptor.format,
            "slot views created"
        );

        self.slot_views = Some(SlotViews {
            srvs,
            descriptor: table.descriptor,
            viewport,
            generation,
        });
        Ok(())
    }

    /// Pick the pixel shader for the source format and upload the
    /// tonemap constants when the HDR path is taken.
    fn bind_source_shader(&self, descriptor: SourceDescriptor) -> MirrorResult<()> {
        match descriptor.format {
            SourceFormat::Rgba16Float if self.tonemap_enabled => {
                self.upload_tonemap_constants()?;
                unsafe {
                    self.context
                        .PSSetConstantBuffers(0, Some(&[Some(self.tonemap_cb.clone())]));
                    self.context.PSSetShader(&self.ps_tonemap, None);
                }
            }
            // An HDR-reported source handing over an 8-bit container
            // carries linear values; gamma-encode them on the way out.
            SourceFormat::Bgra8 if descriptor.reported_hdr => unsafe {
                self.context.PSSetShader(&self.ps_linear_srgb, None);
            },
            _ => unsafe {
                self.context.PSSetShader(&self.ps_passthrough, None);
            },
        }
        Ok(())
    }

    fn upload_tonemap_constants(&self) -> MirrorResult<()> {
        let constants = TonemapConstants::new(self.sdr_white_nits);
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&self.tonemap_cb, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
        }
        .context("Map of the tonemap constant buffer failed")
        .map_err(MirrorError::Platform)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                &constants as *const TonemapConstants as *const u8,
                mapped.pData as *mut u8,
                std::mem::size_of::<TonemapConstants>(),
            );
            self.context.Unmap(&self.tonemap_cb, 0);
        }
        Ok(())
    }

    fn draw_cursor(
        &mut self,
        shared: &SharedState,
        viewport: FitRect,
        descriptor: SourceDescriptor,
    ) -> MirrorResult<()> {
        if !shared.cursor.has_shape() || !shared.cursor.is_visible() {
            return Ok(());
        }

        if shared.cursor.take_dirty() {
            if let Some(shape) = shared.cursor.snapshot_shape() {
                self.cursor_srv = Some(self.build_cursor_texture(&shape)?);
                debug!(
                    kind = ?shape.kind,
                    width = shape.width,
                    height = shape.logical_height(),
                    "cursor shape rebuilt"
                );
            }
        }
        let Some(cursor_srv) = self.cursor_srv.clone() else {
            return Ok(());
        };

        let ndc = cursor_ndc_rect(
            viewport,
            (descriptor.width as f32, descriptor.height as f32),
            (self.window_width as f32, self.window_height as f32),
            shared.cursor.position(),
            shared.cursor.size(),
        );

        let vertices = [
            Vertex {
                position: [ndc.x0, ndc.y0],
                tex_coord: [0.0, 0.0],
            },
            Vertex {
                position: [ndc.x1, ndc.y0],
                tex_coord: [1.0, 0.0],
            },
            Vertex {
                position: [ndc.x0, ndc.y1],
                tex_coord: [0.0, 1.0],
            },
            Vertex {
                position: [ndc.x1, ndc.y1],
                tex_coord: [1.0, 1.0],
            },
        ];
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&self.cursor_vb, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
        }
        .context("Map of the cursor vertex buffer failed")
        .map_err(MirrorError::Platform)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                vertices.as_ptr() as *const u8,
                mapped.pData as *mut u8,
                std::mem::size_of_val(&vertices),
            );
            self.context.Unmap(&self.cursor_vb, 0);
        }

        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        unsafe {
            self.context
                .OMSetBlendState(&self.blend_state, Some(&[0.0; 4]), u32::MAX);
            self.context.PSSetShader(&self.ps_cursor, None);
            self.context
                .PSSetShaderResources(0, Some(&[Some(cursor_srv)]));
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(self.cursor_vb.clone())),
                Some(&stride),
                Some(&offset),
            );
            self.context.Draw(4, 0);
            self.context.OMSetBlendState(None, Some(&[0.0; 4]), u32::MAX);
        }
        Ok(())
    }

    /// Convert the raw shape into a BGRA texture and view. The previous
    /// texture (if any) is released by the assignment in the caller.
    fn build_cursor_texture(
        &self,
        shape: &CursorShape,
    ) -> MirrorResult<ID3D11ShaderResourceView> {
        let pixels = shape.to_bgra();
        let width = shape.width;
        let height = shape.logical_height();

        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            ..Default::default()
        };
        let init_data = D3D11_SUBRESOURCE_DATA {
            pSysMem: pixels.as_ptr() as *const _,
            SysMemPitch: width * 4,
            ..Default::default()
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&texture_desc, Some(&init_data), Some(&mut texture))
        }
        .context("CreateTexture2D for the cursor failed")
        .map_err(MirrorError::Platform)?;
        let texture = texture
            .context("CreateTexture2D returned no cursor texture")
            .map_err(MirrorError::Platform)?;

        let mut srv = None;
        unsafe {
            self.device
                .CreateShaderResourceView(&texture, None, Some(&mut srv))
        }
        .context("CreateShaderResourceView for the cursor failed")
        .map_err(MirrorError::Platform)?;
        srv.context("CreateShaderResourceView returned no cursor view")
            .map_err(MirrorError::Platform)
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        if let Some(waitable) = self.latency_waitable.take() {
            unsafe {
                let _ = CloseHandle(waitable);
            }
        }
    }
}

fn create_pixel_shader(
    device: &ID3D11Device,
    bytecode: &[u8],
    label: &'static str,
) -> MirrorResult<ID3D11PixelShader> {
    let mut shader = None;
    unsafe { device.CreatePixelShader(bytecode, None, Some(&mut shader)) }
        .with_context(|| format!("CreatePixelShader ({label}) failed"))
        .map_err(MirrorError::Platform)?;
    shader
        .with_context(|| format!("CreatePixelShader ({label}) returned no shader"))
        .map_err(MirrorError::Platform)
}

fn d3d_viewport(rect: FitRect) -> D3D11_VIEWPORT {
    D3D11_VIEWPORT {
        TopLeftX: rect.x,
        TopLeftY: rect.y,
        Width: rect.width,
        Height: rect.height,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    }
}
