//! Cursor state shared between the capture and render threads, and the
//! conversion of DXGI pointer shapes into a texture-ready BGRA image.
//!
//! The capture thread is the only writer; the render thread consumes the
//! position through atomics and the shape through a dirty-flag
//! handshake: the flag is raised with a release store after the shape
//! bytes are in place and consumed with `swap(false, Acquire)` before
//! the texture rebuild, so an update landing mid-rebuild re-raises the
//! flag and is applied one frame later instead of being lost.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// The three pointer shape variants the duplication interface delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorShapeKind {
    /// 1 bpp AND mask stacked on top of a 1 bpp XOR mask.
    Monochrome,
    /// 32 bpp BGRA with a straight alpha channel.
    Color,
    /// 32 bpp BGRA where alpha 0xFF means "replace" and alpha 0 with a
    /// non-zero color means "XOR with the screen".
    MaskedColor,
}

impl CursorShapeKind {
    /// Map a `DXGI_OUTDUPL_POINTER_SHAPE_TYPE_*` value.
    pub fn from_dxgi(shape_type: u32) -> Option<Self> {
        match shape_type {
            1 => Some(Self::Monochrome),
            2 => Some(Self::Color),
            4 => Some(Self::MaskedColor),
            _ => None,
        }
    }
}

/// A raw pointer shape as delivered by the duplication interface.
#[derive(Clone, Debug)]
pub struct CursorShape {
    pub kind: CursorShapeKind,
    /// Raw bitmap width in pixels.
    pub width: u32,
    /// Raw bitmap height in rows. For monochrome shapes this counts
    /// both stacked masks; the drawable cursor is half as tall.
    pub height: u32,
    /// Bytes per bitmap row.
    pub pitch: u32,
    pub bytes: Vec<u8>,
}

impl CursorShape {
    /// Height of the cursor as drawn on screen.
    pub fn logical_height(&self) -> u32 {
        match self.kind {
            CursorShapeKind::Monochrome => self.height / 2,
            _ => self.height,
        }
    }

    /// Convert the shape into a `width x logical_height` BGRA image
    /// suitable for a straight-alpha blended quad.
    pub fn to_bgra(&self) -> Vec<u8> {
        match self.kind {
            CursorShapeKind::Monochrome => self.monochrome_to_bgra(),
            CursorShapeKind::Color => self.color_to_bgra(),
            CursorShapeKind::MaskedColor => self.masked_color_to_bgra(),
        }
    }

    fn monochrome_to_bgra(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.logical_height() as usize;
        let pitch = self.pitch as usize;
        let mut out = vec![0u8; width * height * 4];

        for y in 0..height {
            for x in 0..width {
                let byte_idx = x / 8;
                let bit = 7 - (x % 8);
                let and_bit = self
                    .bytes
                    .get(y * pitch + byte_idx)
                    .map_or(1, |byte| (byte >> bit) & 1);
                let xor_bit = self
                    .bytes
                    .get((y + height) * pitch + byte_idx)
                    .map_or(0, |byte| (byte >> bit) & 1);

                let bgra: [u8; 4] = match (and_bit, xor_bit) {
                    (0, 0) => [0x00, 0x00, 0x00, 0xFF], // opaque black
                    (0, 1) => [0xFF, 0xFF, 0xFF, 0xFF], // opaque white
                    (1, 0) => [0x00, 0x00, 0x00, 0x00], // transparent
                    // Screen-invert; approximated as half-transparent
                    // white since a blend state cannot XOR.
                    _ => [0xFF, 0xFF, 0xFF, 0x80],
                };
                out[(y * width + x) * 4..(y * width + x) * 4 + 4].copy_from_slice(&bgra);
            }
        }
        out
    }

    fn color_to_bgra(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.logical_height() as usize;
        let pitch = self.pitch as usize;
        let mut out = vec![0u8; width * height * 4];

        // Already BGRA with straight alpha; repack rows to drop the
        // pitch padding. Opaque black stays opaque; treating black as
        // transparent would hollow out I-beam cursors.
        for y in 0..height {
            for x in 0..width {
                let src = y * pitch + x * 4;
                let dst = (y * width + x) * 4;
                if let Some(pixel) = self.bytes.get(src..src + 4) {
                    out[dst..dst + 4].copy_from_slice(pixel);
                }
            }
        }
        out
    }

    fn masked_color_to_bgra(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.logical_height() as usize;
        let pitch = self.pitch as usize;
        let mut out = vec![0u8; width * height * 4];

        for y in 0..height {
            for x in 0..width {
                let src = y * pitch + x * 4;
                let dst = (y * width + x) * 4;
                let Some([b, g, r, a]) = self.bytes.get(src..src + 4) else {
                    continue;
                };
                let bgra: [u8; 4] = if *a == 0xFF {
                    [*b, *g, *r, 0xFF]
                } else if *a == 0 && (*b | *g | *r) != 0 {
                    // XOR-with-color; approximated as half-transparent.
                    [*b, *g, *r, 0x80]
                } else {
                    [0, 0, 0, 0]
                };
                out[dst..dst + 4].copy_from_slice(&bgra);
            }
        }
        out
    }
}

/// Cursor state updated exclusively by the capture engine and consumed
/// exclusively by the render engine.
#[derive(Debug, Default)]
pub struct CursorState {
    visible: AtomicBool,
    has_shape: AtomicBool,
    x: AtomicI32,
    y: AtomicI32,
    width: AtomicU32,
    height: AtomicU32,
    dirty: AtomicBool,
    /// Only locked when a shape arrives or a rebuild runs; the
    /// steady-state render path touches atomics only.
    shape: Mutex<Option<CursorShape>>,
}

impl CursorState {
    pub fn new() -> Self {
        Self {
            // Visible until the first pointer event says otherwise.
            visible: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn set_position(&self, x: i32, y: i32, visible: bool) {
        self.x.store(x, Ordering::Relaxed);
        self.y.store(y, Ordering::Relaxed);
        self.visible.store(visible, Ordering::Relaxed);
    }

    /// Install a new shape and raise the dirty flag.
    pub fn store_shape(&self, shape: CursorShape) {
        self.width.store(shape.width, Ordering::Relaxed);
        self.height.store(shape.logical_height(), Ordering::Relaxed);
        match self.shape.lock() {
            Ok(mut slot) => *slot = Some(shape),
            Err(poisoned) => *poisoned.into_inner() = Some(shape),
        }
        self.has_shape.store(true, Ordering::Relaxed);
        self.dirty.store(true, Ordering::Release);
    }

    /// Consume the dirty flag; `true` at most once per shape update.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Acquire)
    }

    /// Clone the current shape for a texture rebuild.
    pub fn snapshot_shape(&self) -> Option<CursorShape> {
        match self.shape.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn position(&self) -> (i32, i32) {
        (
            self.x.load(Ordering::Relaxed),
            self.y.load(Ordering::Relaxed),
        )
    }

    /// Logical on-screen size of the current shape.
    pub fn size(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn has_shape(&self) -> bool {
        self.has_shape.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(image: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) * 4) as usize;
        image[idx..idx + 4].try_into().unwrap()
    }

    /// 8x2 logical monochrome cursor exercising all four mask pairs in
    /// the first four columns.
    fn monochrome_shape() -> CursorShape {
        // Rows 0-1: AND mask, rows 2-3: XOR mask, 1 byte pitch.
        let bytes = vec![
            0b0011_1111, // AND row 0: pixels 0,1 opaque
            0b1111_1111, // AND row 1: all transparent/invert
            0b0101_1111, // XOR row 0: pixels 1,3 set
            0b0101_1111, // XOR row 1
        ];
        CursorShape {
            kind: CursorShapeKind::Monochrome,
            width: 8,
            height: 4,
            pitch: 1,
            bytes,
        }
    }

    #[test]
    fn monochrome_height_is_halved() {
        let shape = monochrome_shape();
        assert_eq!(shape.logical_height(), 2);
        assert_eq!(shape.to_bgra().len(), 8 * 2 * 4);
    }

    #[test]
    fn monochrome_mask_pairs_map_to_the_documented_pixels() {
        let shape = monochrome_shape();
        let image = shape.to_bgra();
        // (AND=0, XOR=0) -> opaque black
        assert_eq!(pixel(&image, 8, 0, 0), [0x00, 0x00, 0x00, 0xFF]);
        // (AND=0, XOR=1) -> opaque white
        assert_eq!(pixel(&image, 8, 1, 0), [0xFF, 0xFF, 0xFF, 0xFF]);
        // (AND=1, XOR=0) -> transparent
        assert_eq!(pixel(&image, 8, 2, 0), [0x00, 0x00, 0x00, 0x00]);
        // (AND=1, XOR=1) -> half-transparent white
        assert_eq!(pixel(&image, 8, 3, 0), [0xFF, 0xFF, 0xFF, 0x80]);
    }

    #[test]
    fn monochrome_pixels_are_only_black_white_or_clear() {
        let shape = monochrome_shape();
        let image = shape.to_bgra();
        for chunk in image.chunks_exact(4) {
            let rgb_ok = chunk[..3].iter().all(|&c| c == 0x00) || chunk[..3].iter().all(|&c| c == 0xFF);
            assert!(rgb_ok, "unexpected monochrome color {chunk:?}");
        }
    }

    #[test]
    fn color_shape_is_copied_without_pitch_padding() {
        let shape = CursorShape {
            kind: CursorShapeKind::Color,
            width: 2,
            height: 1,
            pitch: 12, // 4 bytes of row padding
            bytes: vec![1, 2, 3, 200, 5, 6, 7, 0, 9, 9, 9, 9],
        };
        let image = shape.to_bgra();
        assert_eq!(image, vec![1, 2, 3, 200, 5, 6, 7, 0]);
    }

    #[test]
    fn masked_color_alpha_rules() {
        let shape = CursorShape {
            kind: CursorShapeKind::MaskedColor,
            width: 3,
            height: 1,
            pitch: 12,
            bytes: vec![
                10, 20, 30, 0xFF, // replace -> opaque
                40, 50, 60, 0x00, // XOR with color -> half alpha
                0, 0, 0, 0x00, // no color -> transparent
            ],
        };
        let image = shape.to_bgra();
        assert_eq!(pixel(&image, 3, 0, 0), [10, 20, 30, 0xFF]);
        assert_eq!(pixel(&image, 3, 1, 0), [40, 50, 60, 0x80]);
        assert_eq!(pixel(&image, 3, 2, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn dirty_flag_fires_once_per_shape_update() {
        let state = CursorState::new();
        assert!(!state.take_dirty());
        state.store_shape(CursorShape {
            kind: CursorShapeKind::Color,
            width: 1,
            height: 1,
            pitch: 4,
            bytes: vec![0, 0, 0, 0xFF],
        });
        assert!(state.take_dirty());
        assert!(!state.take_dirty());
        assert!(state.has_shape());
        assert_eq!(state.size(), (1, 1));
    }

    #[test]
    fn shape_type_mapping_matches_dxgi_constants() {
        assert_eq!(
            CursorShapeKind::from_dxgi(1),
            Some(CursorShapeKind::Monochrome)
        );
        assert_eq!(CursorShapeKind::from_dxgi(2), Some(CursorShapeKind::Color));
        assert_eq!(
            CursorShapeKind::from_dxgi(4),
            Some(CursorShapeKind::MaskedColor)
        );
        assert_eq!(CursorShapeKind::from_dxgi(3), None);
    }
}
