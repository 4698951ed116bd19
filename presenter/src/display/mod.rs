//! Display subsystem interface
//!
//! [`DisplayDevice`] is the boundary between presentation logic and the
//! kernel mode-setting API. The overlay manager only ever talks to this
//! trait, so the ring/release logic can be exercised against a recording
//! device in tests while production uses the KMS backend.
//!
//! Architecture:
//! - `kms`: DRM/KMS implementation on top of the `drm` crate
//! - `PropertyRequest`: batched atomic property writes, resolved by name at
//!   commit time

#[cfg(feature = "drm")]
pub mod kms;
#[cfg(test)]
pub(crate) mod mock;

#[cfg(feature = "drm")]
pub use kms::KmsDevice;

use common::Size;
use std::io;
use std::os::fd::BorrowedFd;

/// KMS property names written by the overlay path
pub mod props {
    pub const FB_ID: &str = "FB_ID";
    pub const CRTC_ID: &str = "CRTC_ID";
    pub const SRC_X: &str = "SRC_X";
    pub const SRC_Y: &str = "SRC_Y";
    pub const SRC_W: &str = "SRC_W";
    pub const SRC_H: &str = "SRC_H";
    pub const CRTC_X: &str = "CRTC_X";
    pub const CRTC_Y: &str = "CRTC_Y";
    pub const CRTC_W: &str = "CRTC_W";
    pub const CRTC_H: &str = "CRTC_H";
    pub const ZPOS: &str = "ZPOS";
    pub const EOTF: &str = "EOTF";
    pub const COLOR_SPACE: &str = "COLOR_SPACE";
    pub const HDR_SOURCE_METADATA: &str = "HDR_SOURCE_METADATA";
    pub const HDMI_OUTPUT_FORMAT: &str = "HDMI_OUTPUT_FORMAT";
    pub const HDR_PANEL_METADATA: &str = "HDR_PANEL_METADATA";
}

/// Kernel-side GEM handle for an imported DMA-buf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GemHandle(pub u32);

/// Display controller framebuffer id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Property blob id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub u32);

/// A mode object property writes can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeObject {
    Plane(u32),
    Crtc(u32),
    Connector(u32),
}

/// One property write in an atomic request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyWrite {
    pub object: ModeObject,
    pub name: &'static str,
    pub value: u64,
}

/// Batched atomic request.
///
/// Writes accumulate for one display refresh and are submitted together by
/// [`DisplayDevice::commit`]. Later writes to the same property win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyRequest {
    writes: Vec<PropertyWrite>,
}

impl PropertyRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, object: ModeObject, name: &'static str, value: u64) {
        self.writes.push(PropertyWrite {
            object,
            name,
            value,
        });
    }

    /// Append every write of `other`, preserving order
    pub fn extend(&mut self, other: PropertyRequest) {
        self.writes.extend(other.writes);
    }

    pub fn writes(&self) -> &[PropertyWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Last value written for a property, if any
    pub fn value(&self, object: ModeObject, name: &str) -> Option<u64> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.object == object && w.name == name)
            .map(|w| w.value)
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }
}

/// Layout of a framebuffer to create from imported handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferLayout {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub handles: [Option<GemHandle>; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
}

/// Arguments of a legacy (non-atomic) plane update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneUpdate {
    pub plane: u32,
    pub crtc: u32,
    /// `None` disables the plane
    pub framebuffer: Option<FramebufferId>,
    pub crtc_rect: (i32, i32, u32, u32),
    /// 16.16 fixed point
    pub src_rect: (u32, u32, u32, u32),
}

/// Native display operations used by the overlay path.
///
/// Every call is synchronous; `commit` with `nonblock` returns before the
/// hardware latches the new state.
pub trait DisplayDevice {
    /// Whether the driver can import DMA-bufs (`DRM_CAP_PRIME`)
    fn supports_prime_import(&self) -> io::Result<bool>;

    /// Active mode size of a CRTC, `None` when it is off
    fn crtc_mode_size(&self, crtc: u32) -> io::Result<Option<Size>>;

    /// Contents of a blob-valued property, `None` when absent or empty
    fn property_blob(&self, object: ModeObject, name: &str) -> io::Result<Option<Vec<u8>>>;

    fn import_prime_fd(&self, fd: BorrowedFd<'_>) -> io::Result<GemHandle>;

    fn close_handle(&self, handle: GemHandle) -> io::Result<()>;

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<FramebufferId>;

    fn destroy_framebuffer(&self, fb: FramebufferId) -> io::Result<()>;

    fn create_blob(&self, data: &[u8]) -> io::Result<BlobId>;

    fn destroy_blob(&self, blob: BlobId) -> io::Result<()>;

    /// Legacy immediate plane update
    fn set_plane(&self, update: &PlaneUpdate) -> io::Result<()>;

    /// Submit an atomic request
    fn commit(&self, request: &PropertyRequest, nonblock: bool) -> io::Result<()>;
}

/// Objects the overlay path drives, read once from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayTargets {
    pub crtc: u32,
    pub connector: u32,
    pub video_plane: u32,
}
