//! Shader bytecode for the presentation pipeline.
//!
//! `build.rs` precompiles every entry point of `mirror.hlsl` with
//! `fxc.exe` when a Windows SDK is available and hands the .cso paths
//! over via env vars plus the `has_precompiled_shaders` cfg. Without an
//! SDK the same source is compiled at startup with `D3DCompile`, with
//! compiler diagnostics surfaced in the error chain; either way shader
//! compilation failures are explicit initialization errors, never a
//! silent black screen.

#[cfg(not(has_precompiled_shaders))]
use anyhow::anyhow;

#[cfg(not(has_precompiled_shaders))]
use crate::error::MirrorError;
use crate::error::MirrorResult;

/// HLSL source, kept as immutable build-time data.
#[cfg(not(has_precompiled_shaders))]
const HLSL_SOURCE: &str = include_str!("mirror.hlsl");

#[cfg(has_precompiled_shaders)]
const VS_CSO: &[u8] = include_bytes!(env!("GLASS_MIRROR_VS_CSO"));
#[cfg(has_precompiled_shaders)]
const PS_PASSTHROUGH_CSO: &[u8] = include_bytes!(env!("GLASS_MIRROR_PS_PASSTHROUGH_CSO"));
#[cfg(has_precompiled_shaders)]
const PS_LINEAR_SRGB_CSO: &[u8] = include_bytes!(env!("GLASS_MIRROR_PS_LINEAR_SRGB_CSO"));
#[cfg(has_precompiled_shaders)]
const PS_TONEMAP_CSO: &[u8] = include_bytes!(env!("GLASS_MIRROR_PS_TONEMAP_CSO"));
#[cfg(has_precompiled_shaders)]
const PS_CURSOR_CSO: &[u8] = include_bytes!(env!("GLASS_MIRROR_PS_CURSOR_CSO"));

/// Bytecode for every pipeline stage the render engine creates.
pub(crate) struct ShaderSet {
    pub vs: Vec<u8>,
    pub ps_passthrough: Vec<u8>,
    pub ps_linear_srgb: Vec<u8>,
    pub ps_tonemap: Vec<u8>,
    pub ps_cursor: Vec<u8>,
}

#[cfg(has_precompiled_shaders)]
pub(crate) fn load_shader_set() -> MirrorResult<ShaderSet> {
    Ok(ShaderSet {
        vs: VS_CSO.to_vec(),
        ps_passthrough: PS_PASSTHROUGH_CSO.to_vec(),
        ps_linear_srgb: PS_LINEAR_SRGB_CSO.to_vec(),
        ps_tonemap: PS_TONEMAP_CSO.to_vec(),
        ps_cursor: PS_CURSOR_CSO.to_vec(),
    })
}

#[cfg(not(has_precompiled_shaders))]
pub(crate) fn load_shader_set() -> MirrorResult<ShaderSet> {
    Ok(ShaderSet {
        vs: compile(b"vs_main\0", b"vs_5_0\0")?,
        ps_passthrough: compile(b"ps_passthrough\0", b"ps_5_0\0")?,
        ps_linear_srgb: compile(b"ps_linear_srgb\0", b"ps_5_0\0")?,
        ps_tonemap: compile(b"ps_tonemap\0", b"ps_5_0\0")?,
        ps_cursor: compile(b"ps_cursor\0", b"ps_5_0\0")?,
    })
}

/// Compile one entry point of the embedded source with `D3DCompile`,
/// turning the compiler's error blob into readable context.
#[cfg(not(has_precompiled_shaders))]
fn compile(entry: &'static [u8], target: &'static [u8]) -> MirrorResult<Vec<u8>> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
    use windows::core::PCSTR;

    let source = HLSL_SOURCE.as_bytes();
    let mut blob = None;
    let mut errors = None;

    let hr = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            PCSTR::from_raw(entry.as_ptr()),
            PCSTR::from_raw(target.as_ptr()),
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    let entry_name = String::from_utf8_lossy(&entry[..entry.len() - 1]).into_owned();
    if let Err(error) = hr {
        let diagnostics = errors
            .map(|blob| String::from_utf8_lossy(blob_as_slice(&blob)).into_owned())
            .unwrap_or_default();
        return Err(MirrorError::Platform(
            anyhow!("{error}").context(format!(
                "HLSL compilation of {entry_name} failed: {diagnostics}"
            )),
        ));
    }

    let blob = blob.ok_or_else(|| {
        MirrorError::Platform(anyhow!("D3DCompile returned no bytecode for {entry_name}"))
    })?;
    Ok(blob_as_slice(&blob).to_vec())
}

#[cfg(not(has_precompiled_shaders))]
fn blob_as_slice(blob: &windows::Win32::Graphics::Direct3D::ID3DBlob) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    }
}
