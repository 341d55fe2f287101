use anyhow::{Context, Result};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
    ID3D11DeviceContext,
};

const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 2] = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];

/// Create a hardware D3D11 device on the default adapter.
///
/// Two of these exist at runtime: one owned by the render engine (swap
/// chain, shaders, triple-buffer textures) and one owned by the capture
/// engine (duplication interface, shared-handle copies). Each device is
/// driven only from its own thread; the slot textures cross the device
/// boundary through shared handles, never through a shared context.
pub(crate) fn create_device(purpose: &'static str) -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;

    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&FEATURE_LEVELS),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .with_context(|| format!("D3D11CreateDevice ({purpose}) failed"))?;

    let device =
        device.with_context(|| format!("D3D11CreateDevice ({purpose}) did not return a device"))?;
    let context = context
        .with_context(|| format!("D3D11CreateDevice ({purpose}) did not return a context"))?;
    Ok((device, context))
}
