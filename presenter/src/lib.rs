//! Zero-copy presentation of DRM-PRIME video frames.
//!
//! Frames decoded into DMA-buf memory are shown without any CPU or GPU copy,
//! through one of two paths:
//!
//! - [`overlay`]: the frame is scanned out directly on a KMS overlay plane,
//!   with optional HDR signalling on atomic drivers.
//! - [`texture`]: every layer of the frame is imported as an EGL image and
//!   bound to an external texture for a GLES renderer to sample.
//!
//! Both paths keep the decoder's buffers alive until the display or the GPU
//! can no longer be reading them. See [`ring::GenerationRing`].

mod macros;

pub mod config;
pub mod display;
pub mod geometry;
pub mod hdr;
pub mod image;
pub mod import;
pub mod overlay;
pub mod ring;
pub mod stats;
pub mod texture;

pub use config::Config;
pub use display::{DisplayDevice, OverlayTargets, PropertyRequest};
pub use image::{DecodedImage, SharedImage};
pub use overlay::{CommitStrategy, Overlay, OverlayConfig, OverlayPlaneManager, WaylandOverlay};
pub use ring::GenerationRing;
pub use stats::PresentStats;
pub use texture::{ExternalImageApi, TextureMapper};

#[cfg(feature = "drm")]
pub use display::KmsDevice;
#[cfg(feature = "gles")]
pub use texture::EglImageApi;
