//! glass-mirror: low-latency display mirroring.
//!
//! Mirrors one attached monitor onto another with a lock-free triple
//! buffer between a desktop-duplication capture thread and a
//! vsync-locked render loop, frame-identity pacing when the source
//! refresh rate exceeds the target's, and maxRGB-Reinhard HDR-to-SDR
//! tonemapping on the GPU.

pub mod config;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod pacing;
pub mod stats;
pub mod tonemap;
pub mod triple_buffer;
pub mod viewport;

mod platform;
#[cfg(target_os = "windows")]
pub mod session;

pub use config::{MirrorArgs, MirrorConfig};
pub use error::{MirrorError, MirrorErrorClass, MirrorResult};
pub use frame::{SourceDescriptor, SourceFormat};
pub use stats::StatsLine;
pub use tonemap::{reinhard_max_rgb, srgb_oetf, tonemap_scrgb};
pub use triple_buffer::TripleBuffer;
