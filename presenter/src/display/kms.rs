//! DRM/KMS display device

use super::{
    BlobId, DisplayDevice, FramebufferId, FramebufferLayout, GemHandle, ModeObject,
    OverlayTargets, PlaneUpdate, PropertyRequest,
};
use anyhow::{Context, Result};
use common::Size;
use drm::buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{
    AtomicCommitFlags, Device as ControlDevice, FbCmd2Flags, PlaneType, ResourceHandle,
    atomic::AtomicModeReq, connector, crtc, framebuffer, plane, property,
};
use drm::{ClientCapability, Device as _, DriverCapability};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroU32;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

/// An open DRM card node
#[derive(Debug)]
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl ControlDevice for Card {}

type PropertyKey = (ModeObject, &'static str);

/// [`DisplayDevice`] on a DRM card
pub struct KmsDevice {
    card: Card,
    /// Property handles resolved by name, `None` when the object lacks it
    properties: RefCell<HashMap<PropertyKey, Option<property::Handle>>>,
    /// Properties already reported missing
    missing_logged: RefCell<HashSet<PropertyKey>>,
}

fn invalid_id(kind: &str, id: u32) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {} id {}", kind, id))
}

fn handle<T: From<NonZeroU32>>(kind: &str, id: u32) -> io::Result<T> {
    NonZeroU32::new(id)
        .map(T::from)
        .ok_or_else(|| invalid_id(kind, id))
}

impl KmsDevice {
    /// Open a card node and enable the client capabilities the overlay needs
    pub fn open(path: &Path, atomic: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open DRM device {}", path.display()))?;
        let card = Card(file);

        card.set_client_capability(ClientCapability::UniversalPlanes, true)
            .context("Failed to enable universal planes")?;
        if atomic {
            card.set_client_capability(ClientCapability::Atomic, true)
                .context("Failed to enable atomic modesetting")?;
        }

        log::debug!("Opened DRM device {}", path.display());
        Ok(Self {
            card,
            properties: RefCell::new(HashMap::new()),
            missing_logged: RefCell::new(HashSet::new()),
        })
    }

    /// Find a connected connector, its CRTC and an overlay plane for it
    pub fn discover_targets(&self) -> Result<OverlayTargets> {
        let resources = self
            .card
            .resource_handles()
            .context("Failed to get DRM resources")?;

        let mut found = None;
        for &conn in resources.connectors() {
            let info = self
                .card
                .get_connector(conn, false)
                .context("Failed to get connector")?;
            if info.state() != connector::State::Connected {
                continue;
            }
            let Some(encoder) = info.current_encoder() else {
                continue;
            };
            if let Some(crtc) = self.card.get_encoder(encoder)?.crtc() {
                found = Some((conn, crtc));
                break;
            }
        }
        let (conn, crtc) = found.context("No connected connector with an active CRTC")?;

        let planes = self.card.plane_handles().context("Failed to get planes")?;
        let mut video_plane = None;
        for plane in planes {
            let info = self.card.get_plane(plane)?;
            if !resources.filter_crtcs(info.possible_crtcs()).contains(&crtc) {
                continue;
            }
            if self.plane_type(plane)? == Some(PlaneType::Overlay as u64) {
                video_plane = Some(plane);
                break;
            }
        }
        let video_plane = video_plane.context("No overlay plane for the active CRTC")?;

        let targets = OverlayTargets {
            crtc: crtc.into(),
            connector: conn.into(),
            video_plane: video_plane.into(),
        };
        log::debug!("Discovered overlay targets {:?}", targets);
        Ok(targets)
    }

    fn plane_type(&self, plane: plane::Handle) -> io::Result<Option<u64>> {
        for (prop, value) in self.card.get_properties(plane)? {
            let info = self.card.get_property(prop)?;
            if info.name().to_bytes() == b"type" {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn find_property<H: ResourceHandle>(
        &self,
        object: H,
        key: PropertyKey,
    ) -> io::Result<Option<property::Handle>> {
        if let Some(cached) = self.properties.borrow().get(&key) {
            return Ok(*cached);
        }

        let mut found = None;
        for (prop, _) in self.card.get_properties(object)? {
            let info = self.card.get_property(prop)?;
            if info.name().to_bytes() == key.1.as_bytes() {
                found = Some(prop);
                break;
            }
        }
        self.properties.borrow_mut().insert(key, found);
        Ok(found)
    }

    fn property_value<H: ResourceHandle>(&self, object: H, name: &str) -> io::Result<Option<u64>> {
        for (prop, value) in self.card.get_properties(object)? {
            let info = self.card.get_property(prop)?;
            if info.name().to_bytes() == name.as_bytes() {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Append one write to `req`, skipping properties the driver lacks
    fn add_write(
        &self,
        req: &mut AtomicModeReq,
        object: ModeObject,
        name: &'static str,
        value: u64,
    ) -> io::Result<()> {
        let key = (object, name);
        match object {
            ModeObject::Plane(id) => {
                self.add_to(req, handle::<plane::Handle>("plane", id)?, key, value)
            }
            ModeObject::Crtc(id) => self.add_to(req, handle::<crtc::Handle>("CRTC", id)?, key, value),
            ModeObject::Connector(id) => {
                self.add_to(req, handle::<connector::Handle>("connector", id)?, key, value)
            }
        }
    }

    fn add_to<H: ResourceHandle>(
        &self,
        req: &mut AtomicModeReq,
        object: H,
        key: PropertyKey,
        value: u64,
    ) -> io::Result<()> {
        match self.find_property(object, key)? {
            Some(prop) => req.add_property(object, prop, property::Value::UnsignedRange(value)),
            None => {
                if self.missing_logged.borrow_mut().insert(key) {
                    log::debug!("{:?} has no {} property, skipping", key.0, key.1);
                }
            }
        }
        Ok(())
    }
}

/// Framebuffer layout in the shape `drmModeAddFB2` expects
struct PlanarLayout<'a> {
    layout: &'a FramebufferLayout,
    format: DrmFourcc,
}

impl PlanarBuffer for PlanarLayout<'_> {
    fn size(&self) -> (u32, u32) {
        (self.layout.width, self.layout.height)
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        self.layout.pitches
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        self.layout
            .handles
            .map(|h| h.and_then(|h| NonZeroU32::new(h.0)).map(buffer::Handle::from))
    }

    fn offsets(&self) -> [u32; 4] {
        self.layout.offsets
    }
}

impl DisplayDevice for KmsDevice {
    fn supports_prime_import(&self) -> io::Result<bool> {
        let caps = self.card.get_driver_capability(DriverCapability::Prime)?;
        // DRM_PRIME_CAP_IMPORT
        Ok(caps & 0x1 != 0)
    }

    fn crtc_mode_size(&self, crtc: u32) -> io::Result<Option<Size>> {
        let info = self.card.get_crtc(handle::<crtc::Handle>("CRTC", crtc)?)?;
        Ok(info.mode().map(|mode| {
            let (w, h) = mode.size();
            Size::new(w as u32, h as u32)
        }))
    }

    fn property_blob(&self, object: ModeObject, name: &str) -> io::Result<Option<Vec<u8>>> {
        let value = match object {
            ModeObject::Plane(id) => {
                self.property_value(handle::<plane::Handle>("plane", id)?, name)?
            }
            ModeObject::Crtc(id) => self.property_value(handle::<crtc::Handle>("CRTC", id)?, name)?,
            ModeObject::Connector(id) => {
                self.property_value(handle::<connector::Handle>("connector", id)?, name)?
            }
        };
        match value {
            None | Some(0) => Ok(None),
            Some(blob) => {
                let data = self.card.get_property_blob(blob)?;
                Ok((!data.is_empty()).then_some(data))
            }
        }
    }

    fn import_prime_fd(&self, fd: BorrowedFd<'_>) -> io::Result<GemHandle> {
        let handle = self.card.prime_fd_to_buffer(fd)?;
        Ok(GemHandle(handle.into()))
    }

    fn close_handle(&self, gem: GemHandle) -> io::Result<()> {
        self.card.close_buffer(handle::<buffer::Handle>("GEM handle", gem.0)?)
    }

    fn add_framebuffer(&self, layout: &FramebufferLayout) -> io::Result<FramebufferId> {
        let format = DrmFourcc::try_from(layout.format).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{:?}", e))
        })?;
        let planar = PlanarLayout { layout, format };
        let fb = self
            .card
            .add_planar_framebuffer(&planar, FbCmd2Flags::empty())?;
        Ok(FramebufferId(fb.into()))
    }

    fn destroy_framebuffer(&self, fb: FramebufferId) -> io::Result<()> {
        self.card
            .destroy_framebuffer(handle::<framebuffer::Handle>("framebuffer", fb.0)?)
    }

    fn create_blob(&self, data: &[u8]) -> io::Result<BlobId> {
        let mut data = data.to_vec();
        let blob = drm_ffi::mode::create_property_blob(self.card.as_fd(), &mut data)?;
        Ok(BlobId(blob.blob_id))
    }

    fn destroy_blob(&self, blob: BlobId) -> io::Result<()> {
        self.card.destroy_property_blob(u64::from(blob.0))
    }

    fn set_plane(&self, update: &PlaneUpdate) -> io::Result<()> {
        let fb = update
            .framebuffer
            .map(|fb| handle::<framebuffer::Handle>("framebuffer", fb.0))
            .transpose()?;
        self.card.set_plane(
            handle::<plane::Handle>("plane", update.plane)?,
            handle::<crtc::Handle>("CRTC", update.crtc)?,
            fb,
            0,
            update.crtc_rect,
            update.src_rect,
        )
    }

    fn commit(&self, request: &PropertyRequest, nonblock: bool) -> io::Result<()> {
        let mut req = AtomicModeReq::new();
        for write in request.writes() {
            self.add_write(&mut req, write.object, write.name, write.value)?;
        }

        let flags = if nonblock {
            AtomicCommitFlags::NONBLOCK
        } else {
            AtomicCommitFlags::empty()
        };
        self.card.atomic_commit(flags, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_id_is_rejected() {
        let err = handle::<plane::Handle>("plane", 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(handle::<crtc::Handle>("CRTC", 7).is_ok());
    }

    #[test]
    fn test_planar_layout_handles() {
        let layout = FramebufferLayout {
            width: 1920,
            height: 1080,
            format: common::fourcc::NV12,
            handles: [Some(GemHandle(5)), Some(GemHandle(5)), None, None],
            pitches: [1920, 1920, 0, 0],
            offsets: [0, 1920 * 1088, 0, 0],
        };
        let format = DrmFourcc::try_from(layout.format).unwrap();
        assert_eq!(format, DrmFourcc::Nv12);

        let planar = PlanarLayout {
            layout: &layout,
            format,
        };
        let handles = planar.handles();
        assert_eq!(handles[0].map(u32::from), Some(5));
        assert_eq!(handles[1], handles[0]);
        assert!(handles[2].is_none());
        assert_eq!(planar.size(), (1920, 1080));
    }
}
