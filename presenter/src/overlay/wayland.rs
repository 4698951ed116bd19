//! Wayland subsurface overlay backend
//!
//! Placeholder for scanning out through a compositor-managed subsurface
//! instead of owning a KMS plane. It initialises so backend selection works,
//! but refuses every frame.

use super::Overlay;
use crate::display::PropertyRequest;
use crate::image::SharedImage;
use common::{PresentError, Rect, Result};

/// Overlay backend that reports every frame as unsupported
#[derive(Debug, Default)]
pub struct WaylandOverlay {
    _private: (),
}

impl WaylandOverlay {
    pub fn new() -> Result<Self> {
        log::debug!("Wayland overlay backend initialised (presentation not available)");
        Ok(Self::default())
    }
}

impl Overlay for WaylandOverlay {
    fn present(
        &mut self,
        frame: Option<&SharedImage>,
        _src: Rect,
        _dst: Rect,
        _batch: &mut PropertyRequest,
    ) -> Result<()> {
        match frame {
            // Nothing was ever shown, so ending the stream is trivially done
            None => Ok(()),
            Some(_) => Err(PresentError::Unsupported(
                "Wayland subsurface overlay is not implemented".into(),
            )),
        }
    }

    fn uninit(&mut self) {}
}
