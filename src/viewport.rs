//! Aspect-ratio policy and cursor coordinate mapping.
//!
//! Pure geometry, kept off the GPU types so the pillarbox/letterbox
//! behavior and the cursor's source-space -> NDC transform are testable
//! anywhere.

/// Destination-window rectangle the source image is drawn into, in
/// pixels relative to the window's top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Compute the viewport for the source image inside the target window.
///
/// With `preserve_aspect` the result is the largest centered rectangle
/// matching the source aspect ratio (black bars fill the remainder);
/// otherwise the full window is used.
pub fn fit_viewport(
    source_width: f32,
    source_height: f32,
    window_width: f32,
    window_height: f32,
    preserve_aspect: bool,
) -> FitRect {
    if !preserve_aspect {
        return FitRect {
            x: 0.0,
            y: 0.0,
            width: window_width,
            height: window_height,
        };
    }

    let source_aspect = source_width / source_height;
    let window_aspect = window_width / window_height;

    if source_aspect > window_aspect {
        // Source is wider: full width, letterbox top and bottom.
        let height = window_width / source_aspect;
        FitRect {
            x: 0.0,
            y: (window_height - height) / 2.0,
            width: window_width,
            height,
        }
    } else {
        // Source is taller or equal: full height, pillarbox left/right.
        let width = window_height * source_aspect;
        FitRect {
            x: (window_width - width) / 2.0,
            y: 0.0,
            width,
            height: window_height,
        }
    }
}

/// An axis-aligned rectangle in normalized device coordinates.
/// `(x0, y0)` is the top-left corner; NDC y points up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NdcRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// Map a cursor quad from source-space pixels to NDC, going through the
/// preserved-aspect viewport transform so the cursor lands on the same
/// desktop feature it covers on the source monitor.
pub fn cursor_ndc_rect(
    viewport: FitRect,
    source_size: (f32, f32),
    window_size: (f32, f32),
    cursor_position: (i32, i32),
    cursor_size: (u32, u32),
) -> NdcRect {
    let scale_x = viewport.width / source_size.0;
    let scale_y = viewport.height / source_size.1;

    let left = viewport.x + cursor_position.0 as f32 * scale_x;
    let top = viewport.y + cursor_position.1 as f32 * scale_y;
    let width = cursor_size.0 as f32 * scale_x;
    let height = cursor_size.1 as f32 * scale_y;

    NdcRect {
        x0: (left / window_size.0) * 2.0 - 1.0,
        y0: 1.0 - (top / window_size.1) * 2.0,
        x1: ((left + width) / window_size.0) * 2.0 - 1.0,
        y1: 1.0 - ((top + height) / window_size.1) * 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn matching_aspect_fills_the_window() {
        let viewport = fit_viewport(1920.0, 1080.0, 1920.0, 1080.0, true);
        assert_eq!(
            viewport,
            FitRect {
                x: 0.0,
                y: 0.0,
                width: 1920.0,
                height: 1080.0
            }
        );
    }

    #[test]
    fn wider_source_letterboxes_vertically_only() {
        // 21:9 source on a 16:9 window.
        let viewport = fit_viewport(3440.0, 1440.0, 1920.0, 1080.0, true);
        assert_close(viewport.x, 0.0);
        assert_close(viewport.width, 1920.0);
        assert_close(viewport.height, 1920.0 / (3440.0 / 1440.0));
        // Bars split evenly top and bottom.
        assert_close(viewport.y * 2.0 + viewport.height, 1080.0);
        assert!(viewport.y > 0.0);
    }

    #[test]
    fn taller_source_pillarboxes_horizontally_only() {
        // Portrait source on a 16:9 window.
        let viewport = fit_viewport(1080.0, 1920.0, 1920.0, 1080.0, true);
        assert_close(viewport.y, 0.0);
        assert_close(viewport.height, 1080.0);
        assert_close(viewport.width, 1080.0 * (1080.0 / 1920.0));
        assert_close(viewport.x * 2.0 + viewport.width, 1920.0);
        assert!(viewport.x > 0.0);
    }

    #[test]
    fn stretch_mode_ignores_aspect() {
        let viewport = fit_viewport(3440.0, 1440.0, 1920.0, 1080.0, false);
        assert_eq!(
            viewport,
            FitRect {
                x: 0.0,
                y: 0.0,
                width: 1920.0,
                height: 1080.0
            }
        );
    }

    #[test]
    fn cursor_at_origin_maps_to_the_viewport_corner() {
        let viewport = fit_viewport(1920.0, 1080.0, 1920.0, 1080.0, true);
        let rect = cursor_ndc_rect(
            viewport,
            (1920.0, 1080.0),
            (1920.0, 1080.0),
            (0, 0),
            (32, 32),
        );
        assert_close(rect.x0, -1.0);
        assert_close(rect.y0, 1.0);
        assert!(rect.x1 > rect.x0);
        assert!(rect.y1 < rect.y0);
    }

    #[test]
    fn cursor_center_stays_centered_through_scaling() {
        // 4K source mirrored onto a 1080p window: everything halves.
        let viewport = fit_viewport(3840.0, 2160.0, 1920.0, 1080.0, true);
        let rect = cursor_ndc_rect(
            viewport,
            (3840.0, 2160.0),
            (1920.0, 1080.0),
            (1920, 1080),
            (64, 64),
        );
        assert_close(rect.x0, 0.0);
        assert_close(rect.y0, 0.0);
        // 64 source pixels cover 32 window pixels.
        assert_close(rect.x1 - rect.x0, 32.0 / 1920.0 * 2.0);
        assert_close(rect.y0 - rect.y1, 32.0 / 1080.0 * 2.0);
    }

    #[test]
    fn cursor_respects_pillarbox_offset() {
        let viewport = fit_viewport(1080.0, 1920.0, 1920.0, 1080.0, true);
        let rect = cursor_ndc_rect(
            viewport,
            (1080.0, 1920.0),
            (1920.0, 1080.0),
            (0, 0),
            (32, 32),
        );
        // Source origin lands at the left edge of the *viewport*, not
        // of the window.
        let expected_x0 = (viewport.x / 1920.0) * 2.0 - 1.0;
        assert_close(rect.x0, expected_x0);
        assert!(rect.x0 > -1.0);
        assert_close(rect.y0, 1.0);
    }
}
