//! Common types for primeplane.
//!
//! This crate defines the data shared between the decoder side (which
//! produces DMA-buf backed frames) and the presenter (which scans them out on
//! a hardware plane or samples them as external textures).
//!
//! # Frame model
//!
//! A decoded frame is described by a [`FrameDescriptor`]: a list of memory
//! objects (DMA-buf file descriptors), and a list of layers, each carrying a
//! DRM fourcc and the planes that make up that layer. The descriptor is
//! immutable once built and is shared read-only by every presentation path.
//!
//! # Examples
//!
//! ```no_run
//! use common::{DrmLayer, DrmObject, DrmPlane, FrameDescriptor, fourcc};
//! use std::os::fd::OwnedFd;
//!
//! # fn dmabuf() -> OwnedFd { unimplemented!() }
//! // Single-object NV12 frame: luma and chroma share one buffer
//! let desc = FrameDescriptor::new(
//!     vec![DrmObject::new(dmabuf(), 1920 * 1080 * 3 / 2)],
//!     vec![DrmLayer::new(
//!         fourcc::NV12,
//!         vec![
//!             DrmPlane { object_index: 0, offset: 0, pitch: 1920 },
//!             DrmPlane { object_index: 0, offset: 1920 * 1080, pitch: 1920 },
//!         ],
//!     )],
//! )
//! .unwrap();
//! assert_eq!(desc.layers().len(), 1);
//! ```

mod color;
mod frame;
mod geometry;

pub use color::{ColorParams, ColorPrimaries, ColorTransfer, ContentLightLevel, MasteringLuminance};
pub use frame::{DrmLayer, DrmObject, DrmPlane, FrameDescriptor, MAX_PLANES, fourcc};
pub use geometry::{Rect, Size};

use thiserror::Error;

/// Errors reported by the presentation paths.
///
/// Only `CapabilityMissing` is fatal, and only at initialisation. Every
/// other variant aborts the current frame update and leaves the previously
/// presented frame on screen.
#[derive(Error, Debug)]
pub enum PresentError {
    #[error("Capability missing: {0}")]
    CapabilityMissing(String),

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Teardown error: {0}")]
    Teardown(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PresentError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T, E = PresentError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let err: PresentError = std::io::Error::other("ioctl failed").into();
        assert!(matches!(err, PresentError::Io(ref msg) if msg == "ioctl failed"));
    }

    #[test]
    fn test_error_display() {
        let err = PresentError::Import("object 1".to_string());
        assert_eq!(err.to_string(), "Import failed: object 1");
    }
}
