//! HDR-to-SDR tonemapping math.
//!
//! The GPU does the real work in `ps_tonemap` (see `mirror.hlsl`); this
//! module owns the constant block uploaded to the shader and a scalar
//! reference of the exact same pipeline, used to validate the curve and
//! to document the mapping in one greppable place.
//!
//! Pipeline, per pixel: clamp negative scRGB channels to zero, scale by
//! `80 / sdr_white_nits` so the configured SDR white lands on 1.0, run
//! maxRGB Reinhard on anything still above 1.0, saturate, then apply
//! the piecewise sRGB OETF.

/// scRGB pins 1.0 to 80 cd/m² (IEC 61966-2-2 reference white).
pub const SCRGB_REFERENCE_WHITE_NITS: f32 = 80.0;

/// Default SDR white level in nits when the user does not override it.
pub const DEFAULT_SDR_WHITE_NITS: f32 = 240.0;

/// Constant buffer layout for the tonemap pixel shader. 16 bytes, the
/// minimum cbuffer size; only the first float carries data.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct TonemapConstants {
    pub sdr_white_nits: f32,
    _padding: [f32; 3],
}

impl TonemapConstants {
    pub fn new(sdr_white_nits: f32) -> Self {
        Self {
            sdr_white_nits,
            _padding: [0.0; 3],
        }
    }
}

/// Piecewise sRGB OETF (linear to gamma).
pub fn srgb_oetf(linear: f32) -> f32 {
    if linear <= 0.003_130_8 {
        12.92 * linear
    } else {
        1.055 * linear.abs().powf(1.0 / 2.4) - 0.055
    }
}

/// maxRGB Reinhard: scale the RGB vector by `m / (1 + m) / m` where
/// `m = max(r, g, b)`, but only when `m > 1`. Values at or below SDR
/// range pass through untouched, which keeps SDR content in an HDR
/// container pixel-exact; the single-channel maximum preserves hue.
pub fn reinhard_max_rgb(rgb: [f32; 3]) -> [f32; 3] {
    let max_rgb = rgb[0].max(rgb[1]).max(rgb[2]);
    if max_rgb <= 1.0 {
        return rgb;
    }
    let scale = max_rgb / (1.0 + max_rgb) / max_rgb;
    rgb.map(|channel| channel * scale)
}

/// Scalar reference of the full shader pipeline: linear scRGB in,
/// gamma-encoded sRGB out.
pub fn tonemap_scrgb(rgb: [f32; 3], sdr_white_nits: f32) -> [f32; 3] {
    let scale = SCRGB_REFERENCE_WHITE_NITS / sdr_white_nits;
    let scaled = rgb.map(|channel| channel.max(0.0) * scale);
    let compressed = reinhard_max_rgb(scaled);
    compressed.map(|channel| srgb_oetf(channel.clamp(0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn constants_block_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<TonemapConstants>(), 16);
    }

    #[test]
    fn oetf_matches_the_srgb_anchors() {
        assert_close(srgb_oetf(0.0), 0.0);
        assert_close(srgb_oetf(1.0), 1.0);
        // Below the linear-segment knee.
        assert_close(srgb_oetf(0.002), 12.92 * 0.002);
        // 18% gray encodes near 46%.
        assert_close(srgb_oetf(0.18), 0.4613);
    }

    #[test]
    fn reinhard_is_identity_inside_sdr_range() {
        for value in [0.0, 0.25, 0.5, 1.0] {
            assert_eq!(reinhard_max_rgb([value; 3]), [value; 3]);
        }
        // Hue preservation: channel ratios survive compression.
        let out = reinhard_max_rgb([4.0, 2.0, 1.0]);
        assert_close(out[0] / out[1], 2.0);
        assert_close(out[1] / out[2], 2.0);
    }

    #[test]
    fn reinhard_compresses_highlights_toward_one() {
        let out = reinhard_max_rgb([3.0; 3]);
        assert_close(out[0], 3.0 / 4.0);
        // Brighter inputs stay brighter but never reach 1.0.
        let brighter = reinhard_max_rgb([100.0; 3]);
        assert!(brighter[0] > out[0]);
        assert!(brighter[0] < 1.0);
    }

    #[test]
    fn at_reference_white_the_tonemap_is_the_srgb_oetf() {
        // With sdr-white = 80 the scRGB scale is 1.0, and inputs in
        // [0, 1] bypass the Reinhard stage entirely.
        for value in [0.0, 0.1, 0.5, 0.9, 1.0] {
            let out = tonemap_scrgb([value; 3], SCRGB_REFERENCE_WHITE_NITS);
            assert_close(out[0], srgb_oetf(value));
        }
    }

    #[test]
    fn raising_sdr_white_darkens_the_same_input() {
        // A highlight that stays above the Reinhard knee for every
        // tested white level, and an SDR value that stays below it.
        for input in [[6.0, 4.5, 3.0], [0.9, 0.5, 0.2]] {
            let mut previous = f32::INFINITY;
            for nits in [80.0, 160.0, 240.0, 400.0] {
                let out = tonemap_scrgb(input, nits);
                assert!(out[0] < previous, "not monotone at {nits} nits");
                previous = out[0];
            }
        }
    }

    #[test]
    fn configured_sdr_white_maps_to_output_white() {
        // 240 / 80 = 3.0 scRGB is the configured white point; it must
        // land on sRGB 1.0 exactly (scaled to 1.0, Reinhard identity at
        // the boundary, OETF(1) = 1).
        let out = tonemap_scrgb([3.0; 3], 240.0);
        assert_close(out[0], 1.0);
    }

    #[test]
    fn scrgb_reference_white_lands_at_a_third_before_gamma() {
        // 1.0 scRGB under sdr-white 240 scales to 1/3 linear, below the
        // Reinhard knee, so the output is just the OETF of 1/3.
        let out = tonemap_scrgb([1.0; 3], 240.0);
        assert_close(out[0], srgb_oetf(1.0 / 3.0));
    }

    #[test]
    fn negative_out_of_gamut_channels_clamp_to_zero() {
        let out = tonemap_scrgb([-0.5, 0.0, 0.5], 80.0);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);
        assert_close(out[2], srgb_oetf(0.5));
    }
}
