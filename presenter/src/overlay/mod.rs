//! Hardware overlay presentation
//!
//! Decoded frames are scanned out directly on a dedicated video plane, with
//! no GPU copy. This module provides:
//!
//! - `plane`: the KMS plane manager (atomic or legacy commits)
//! - `wayland`: subsurface backend placeholder
//!
//! # Buffer lifetime
//!
//! A framebuffer handed to the display stays in use until a later update
//! replaces it and that update has latched. Non-blocking atomic commits
//! latch one refresh late, so the manager keeps three generations alive;
//! legacy `set_plane` blocks on the ioctl and needs two.

mod plane;
mod wayland;

pub use plane::{OverlayPlaneManager, PresentedFrame};
pub use wayland::WaylandOverlay;

use crate::display::{OverlayTargets, PropertyRequest};
use crate::geometry::AlignmentPolicy;
use crate::image::SharedImage;
use common::{PresentError, Rect, Result, Size};

/// How plane updates reach the display controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStrategy {
    /// Properties are appended to the caller's atomic request
    Atomic,
    /// Immediate `set_plane` call per frame
    Legacy,
}

impl CommitStrategy {
    /// Generations kept alive before the oldest is released
    pub fn ring_depth(self) -> usize {
        match self {
            Self::Atomic => 3,
            Self::Legacy => 2,
        }
    }
}

impl std::str::FromStr for CommitStrategy {
    type Err = PresentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "atomic" => Ok(Self::Atomic),
            "legacy" => Ok(Self::Legacy),
            other => Err(PresentError::Unsupported(format!(
                "commit strategy '{}'",
                other
            ))),
        }
    }
}

/// Settings of one overlay plane, fixed for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayConfig {
    pub targets: OverlayTargets,
    pub strategy: CommitStrategy,
    pub alignment: AlignmentPolicy,
    pub zpos: u64,
    /// Size of the GUI surface destination rectangles are expressed in
    pub osd_size: Option<Size>,
}

impl OverlayConfig {
    pub fn new(targets: OverlayTargets, strategy: CommitStrategy) -> Self {
        Self {
            targets,
            strategy,
            alignment: AlignmentPolicy::default(),
            zpos: 0,
            osd_size: None,
        }
    }
}

/// Common interface of overlay backends
pub trait Overlay {
    /// Show `frame` in `dst`, or end the stream when `frame` is `None`.
    ///
    /// Atomic backends append their property writes to `batch`; the caller
    /// commits it together with the rest of the refresh.
    fn present(
        &mut self,
        frame: Option<&SharedImage>,
        src: Rect,
        dst: Rect,
        batch: &mut PropertyRequest,
    ) -> Result<()>;

    /// Release every resource; safe to call more than once
    fn uninit(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_depth_per_strategy() {
        assert_eq!(CommitStrategy::Atomic.ring_depth(), 3);
        assert_eq!(CommitStrategy::Legacy.ring_depth(), 2);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("atomic".parse::<CommitStrategy>().unwrap(), CommitStrategy::Atomic);
        assert_eq!("legacy".parse::<CommitStrategy>().unwrap(), CommitStrategy::Legacy);
        assert!("vulkan".parse::<CommitStrategy>().is_err());
    }
}
