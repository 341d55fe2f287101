//! Runtime description of the captured frame stream.
//!
//! The duplication interface reports a format at setup time, but the
//! format of the textures it actually hands over is only known once the
//! first frame arrives, and the two can disagree (an HDR-capable monitor
//! running in SDR mode reports float but delivers the 8-bit container).
//! Both views live here so the render path can pick its shader from what
//! was actually captured.

use std::fmt;

/// Pixel format of the captured desktop textures.
///
/// Anything else coming out of the duplication interface is rejected at
/// first-frame time; the preferred-format list we submit makes other
/// formats unreachable on stock drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    /// 8-bit sRGB-encoded container (`B8G8R8A8_UNORM`).
    Bgra8,
    /// 16-bit linear float in scRGB (`R16G16B16A16_FLOAT`), where 1.0
    /// equals 80 cd/m² reference white and HDR highlights exceed 1.0.
    Rgba16Float,
}

impl SourceFormat {
    pub fn is_hdr(self) -> bool {
        matches!(self, Self::Rgba16Float)
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bgra8 => write!(f, "SDR (B8G8R8A8_UNORM)"),
            Self::Rgba16Float => write!(f, "HDR (R16G16B16A16_FLOAT)"),
        }
    }
}

/// Format and geometry of the frame stream, established from the first
/// captured texture and immutable afterwards.
#[derive(Clone, Copy, Debug)]
pub struct SourceDescriptor {
    pub format: SourceFormat,
    pub width: u32,
    pub height: u32,
    /// Whether the duplication interface claimed an HDR mode at setup.
    /// May disagree with `format`; the render path trusts `format` for
    /// shader selection and uses this only for the linear-container
    /// gamma case.
    pub reported_hdr: bool,
}
