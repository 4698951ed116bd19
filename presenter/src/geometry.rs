//! Destination rectangle computation and plane alignment
//!
//! The video plane can be sized independently of the framebuffer. The
//! player positions video in the coordinate space of its GUI surface, which
//! may be smaller than the CRTC mode, so the rectangle is rescaled to the
//! physical display before it reaches the hardware.

use common::{PresentError, Rect, Result, Size};

/// Scale a logical rectangle from `source` space onto a `display`.
///
/// Uses a uniform "fit" scale (the smaller of the two axis ratios) and
/// centres the scaled source inside the display. A zero-sized source leaves
/// the rectangle untouched.
pub fn compute_destination(display: Size, source: Size, logical: Rect) -> Rect {
    if source.is_empty() {
        return logical;
    }

    let hratio = display.width as f64 / source.width as f64;
    let vratio = display.height as f64 / source.height as f64;
    let ratio = hratio.min(vratio);

    let offset_x = (display.width as f64 - ratio * source.width as f64) / 2.0;
    let offset_y = (display.height as f64 - ratio * source.height as f64) / 2.0;

    let scale = |v: i32, offset: f64| (v as f64 * ratio + offset).round() as i32;

    Rect::new(
        scale(logical.x0, offset_x),
        scale(logical.y0, offset_y),
        scale(logical.x1, offset_x),
        scale(logical.y1, offset_y),
    )
}

/// Granularity required by a plane scaler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentPolicy {
    /// Destination origin is rounded down to a multiple of this
    pub origin: u32,
    /// Destination extent is rounded up to a multiple of this
    pub extent: u32,
}

impl Default for AlignmentPolicy {
    fn default() -> Self {
        Self {
            origin: 2,
            extent: 2,
        }
    }
}

impl AlignmentPolicy {
    pub fn new(origin: u32, extent: u32) -> Result<Self> {
        for (name, value) in [("origin", origin), ("extent", extent)] {
            if value == 0 || !value.is_power_of_two() {
                return Err(PresentError::Unsupported(format!(
                    "{} alignment {} is not a power of two",
                    name, value
                )));
            }
        }
        Ok(Self { origin, extent })
    }

    pub fn align_origin(&self, v: i32) -> i32 {
        let a = self.origin as i32;
        v.div_euclid(a) * a
    }

    pub fn align_extent(&self, v: u32) -> u32 {
        v.div_ceil(self.extent) * self.extent
    }
}

/// Plane coordinates as written to the display controller.
///
/// Source values are 16.16 fixed point in framebuffer space, CRTC values
/// are integer device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub src_x: u32,
    pub src_y: u32,
    pub src_w: u32,
    pub src_h: u32,
    pub crtc_x: i32,
    pub crtc_y: i32,
    pub crtc_w: u32,
    pub crtc_h: u32,
}

impl PlaneGeometry {
    pub fn new(src: Rect, dst: Rect, align: AlignmentPolicy) -> Result<Self> {
        if src.is_empty() || src.x0 < 0 || src.y0 < 0 {
            return Err(PresentError::InvalidFrame(format!(
                "bad source rectangle {:?}",
                src
            )));
        }
        if dst.is_empty() {
            return Err(PresentError::InvalidFrame(format!(
                "bad destination rectangle {:?}",
                dst
            )));
        }

        let fixed = |v: i32| {
            (v as u32).checked_mul(1 << 16).ok_or_else(|| {
                PresentError::InvalidFrame(format!(
                    "source rectangle {:?} exceeds 16.16 range",
                    src
                ))
            })
        };

        Ok(Self {
            src_x: fixed(src.x0)?,
            src_y: fixed(src.y0)?,
            src_w: fixed(src.width())?,
            src_h: fixed(src.height())?,
            crtc_x: align.align_origin(dst.x0),
            crtc_y: align.align_origin(dst.y0),
            crtc_w: align.align_extent(dst.width() as u32),
            crtc_h: align.align_extent(dst.height() as u32),
        })
    }
}
