//! Command-line surface and the immutable runtime configuration
//! derived from it.

use std::time::Duration;

use clap::Parser;

use crate::error::{MirrorError, MirrorResult};
use crate::tonemap::DEFAULT_SDR_WHITE_NITS;

/// Mirror one monitor onto another with vsync-locked, low-latency
/// presentation and HDR-to-SDR tonemapping.
#[derive(Parser, Debug)]
#[command(name = "glass-mirror", version, about)]
pub struct MirrorArgs {
    /// Source monitor index
    #[arg(long, default_value_t = 0)]
    pub source: usize,

    /// Target monitor index
    #[arg(long, default_value_t = 1)]
    pub target: usize,

    /// Stretch to fill the target (ignore aspect ratio)
    #[arg(long)]
    pub stretch: bool,

    /// Disable HDR to SDR tonemapping
    #[arg(long = "no-tonemap")]
    pub no_tonemap: bool,

    /// SDR white level in nits for HDR tonemapping
    #[arg(long = "sdr-white", value_name = "NITS", default_value_t = DEFAULT_SDR_WHITE_NITS)]
    pub sdr_white: f32,

    /// Hide the mouse cursor
    #[arg(long = "no-cursor")]
    pub no_cursor: bool,

    /// Disable the latency-waitable swap chain
    #[arg(long = "no-waitable")]
    pub no_waitable: bool,

    /// Disable smart frame selection (fall back to a fixed delay)
    #[arg(long = "no-smart-select")]
    pub no_smart_select: bool,

    /// Disable the post-vsync frame delay
    #[arg(long = "no-frame-delay")]
    pub no_frame_delay: bool,

    /// Frame delay in microseconds
    #[arg(long = "frame-delay", value_name = "US", default_value_t = 1000)]
    pub frame_delay: u32,

    /// Enable verbose diagnostics
    #[arg(long)]
    pub debug: bool,

    /// List monitors and exit
    #[arg(long)]
    pub list: bool,
}

/// Runtime configuration, immutable after startup.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    pub source_index: usize,
    pub target_index: usize,
    pub preserve_aspect: bool,
    pub tonemap: bool,
    pub sdr_white_nits: f32,
    pub show_cursor: bool,
    pub use_waitable_swapchain: bool,
    pub use_smart_frame_selection: bool,
    pub frame_delay: Option<Duration>,
    pub debug: bool,
}

impl MirrorConfig {
    pub fn from_args(args: &MirrorArgs) -> MirrorResult<Self> {
        if args.sdr_white <= 0.0 || !args.sdr_white.is_finite() {
            return Err(MirrorError::InvalidConfig(format!(
                "--sdr-white must be a positive nit value, got {}",
                args.sdr_white
            )));
        }

        let frame_delay = if args.no_frame_delay || args.frame_delay == 0 {
            None
        } else {
            Some(Duration::from_micros(u64::from(args.frame_delay)))
        };

        Ok(Self {
            source_index: args.source,
            target_index: args.target,
            preserve_aspect: !args.stretch,
            tonemap: !args.no_tonemap,
            sdr_white_nits: args.sdr_white,
            show_cursor: !args.no_cursor,
            use_waitable_swapchain: !args.no_waitable,
            use_smart_frame_selection: !args.no_smart_select,
            frame_delay,
            debug: args.debug,
        })
    }

    /// Check the monitor indices against the enumerated monitor count.
    /// Runs before any device initialization.
    pub fn validate_monitors(&self, monitor_count: usize) -> MirrorResult<()> {
        if self.source_index >= monitor_count {
            return Err(MirrorError::InvalidConfig(format!(
                "source monitor {} does not exist ({} monitors attached)",
                self.source_index, monitor_count
            )));
        }
        if self.target_index >= monitor_count {
            return Err(MirrorError::InvalidConfig(format!(
                "target monitor {} does not exist ({} monitors attached)",
                self.target_index, monitor_count
            )));
        }
        if self.source_index == self.target_index {
            return Err(MirrorError::InvalidConfig(
                "source and target must be different monitors".into(),
            ));
        }
        Ok(())
    }

    /// Human-readable pacing strategy for the startup banner.
    pub fn pacing_description(&self, target_frame_skip: u64) -> String {
        if target_frame_skip > 1 && self.use_smart_frame_selection {
            format!("Smart selection (wait for frame N+{target_frame_skip})")
        } else if let Some(delay) = self.frame_delay {
            format!("Fixed delay ({} us)", delay.as_micros())
        } else {
            "None (immediate)".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> MirrorArgs {
        MirrorArgs::try_parse_from(std::iter::once("glass-mirror").chain(argv.iter().copied()))
            .expect("argv should parse")
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = MirrorConfig::from_args(&parse(&[])).unwrap();
        assert_eq!(config.source_index, 0);
        assert_eq!(config.target_index, 1);
        assert!(config.preserve_aspect);
        assert!(config.tonemap);
        assert_eq!(config.sdr_white_nits, 240.0);
        assert!(config.show_cursor);
        assert!(config.use_waitable_swapchain);
        assert!(config.use_smart_frame_selection);
        assert_eq!(config.frame_delay, Some(Duration::from_micros(1000)));
        assert!(!config.debug);
    }

    #[test]
    fn every_disable_flag_flips_its_feature() {
        let config = MirrorConfig::from_args(&parse(&[
            "--stretch",
            "--no-tonemap",
            "--no-cursor",
            "--no-waitable",
            "--no-smart-select",
            "--no-frame-delay",
            "--debug",
        ]))
        .unwrap();
        assert!(!config.preserve_aspect);
        assert!(!config.tonemap);
        assert!(!config.show_cursor);
        assert!(!config.use_waitable_swapchain);
        assert!(!config.use_smart_frame_selection);
        assert_eq!(config.frame_delay, None);
        assert!(config.debug);
    }

    #[test]
    fn value_flags_parse_their_arguments() {
        let args = parse(&[
            "--source",
            "2",
            "--target",
            "0",
            "--sdr-white",
            "160",
            "--frame-delay",
            "500",
        ]);
        let config = MirrorConfig::from_args(&args).unwrap();
        assert_eq!(config.source_index, 2);
        assert_eq!(config.target_index, 0);
        assert_eq!(config.sdr_white_nits, 160.0);
        assert_eq!(config.frame_delay, Some(Duration::from_micros(500)));
    }

    #[test]
    fn zero_frame_delay_disables_the_spin() {
        let config = MirrorConfig::from_args(&parse(&["--frame-delay", "0"])).unwrap();
        assert_eq!(config.frame_delay, None);
    }

    #[test]
    fn non_positive_sdr_white_is_rejected() {
        let args = parse(&["--sdr-white", "0"]);
        assert!(MirrorConfig::from_args(&args).is_err());
        let args = parse(&["--sdr-white", "NaN"]);
        assert!(MirrorConfig::from_args(&args).is_err());
    }

    #[test]
    fn unknown_flags_fail_to_parse() {
        assert!(
            MirrorArgs::try_parse_from(["glass-mirror", "--frobnicate"]).is_err()
        );
    }

    #[test]
    fn monitor_validation_rejects_bad_indices() {
        let config = MirrorConfig::from_args(&parse(&[])).unwrap();
        assert!(config.validate_monitors(2).is_ok());
        // Only one monitor: default target index 1 is out of range.
        assert!(config.validate_monitors(1).is_err());

        let same = MirrorConfig::from_args(&parse(&["--source", "1", "--target", "1"])).unwrap();
        assert!(same.validate_monitors(3).is_err());
    }

    #[test]
    fn pacing_description_tracks_the_configuration() {
        let config = MirrorConfig::from_args(&parse(&[])).unwrap();
        assert_eq!(
            config.pacing_description(2),
            "Smart selection (wait for frame N+2)"
        );
        assert_eq!(config.pacing_description(1), "Fixed delay (1000 us)");

        let fixed = MirrorConfig::from_args(&parse(&["--no-smart-select"])).unwrap();
        assert_eq!(fixed.pacing_description(2), "Fixed delay (1000 us)");

        let none =
            MirrorConfig::from_args(&parse(&["--no-smart-select", "--no-frame-delay"])).unwrap();
        assert_eq!(none.pacing_description(2), "None (immediate)");
    }
}
