//! DRM-PRIME frame descriptor model
//!
//! Mirrors the layout a hardware decoder hands out for DMA-buf frames:
//! objects own the memory, planes point into objects, layers group planes
//! under a pixel format.

use crate::{PresentError, Result};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

/// Upper bound for objects, layers and planes per layer
pub const MAX_PLANES: usize = 4;

/// DRM fourcc codes used by hardware decoders
pub mod fourcc {
    const fn code(a: u8, b: u8, c: u8, d: u8) -> u32 {
        (a as u32) | (b as u32) << 8 | (c as u32) << 16 | (d as u32) << 24
    }

    pub const NV12: u32 = code(b'N', b'V', b'1', b'2');
    pub const NV16: u32 = code(b'N', b'V', b'1', b'6');
    pub const P010: u32 = code(b'P', b'0', b'1', b'0');
    pub const YUV420: u32 = code(b'Y', b'U', b'1', b'2');
    pub const R8: u32 = code(b'R', b'8', b' ', b' ');
    pub const GR88: u32 = code(b'G', b'R', b'8', b'8');
    pub const R16: u32 = code(b'R', b'1', b'6', b' ');
    pub const GR1616: u32 = code(b'G', b'R', b'3', b'2');
    pub const XRGB8888: u32 = code(b'X', b'R', b'2', b'4');
    pub const ARGB8888: u32 = code(b'A', b'R', b'2', b'4');
}

/// One DMA-buf memory object
#[derive(Debug)]
pub struct DrmObject {
    fd: OwnedFd,
    size: usize,
}

impl DrmObject {
    pub fn new(fd: OwnedFd, size: usize) -> Self {
        Self { fd, size }
    }

    /// Borrow the file descriptor for an import call
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// A plane inside one of the descriptor's objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmPlane {
    pub object_index: usize,
    pub offset: u32,
    pub pitch: u32,
}

/// A pixel format plus the ordered planes carrying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmLayer {
    pub format: u32,
    pub planes: Vec<DrmPlane>,
}

impl DrmLayer {
    pub fn new(format: u32, planes: Vec<DrmPlane>) -> Self {
        Self { format, planes }
    }
}

/// Immutable description of a decoded frame's backing memory
#[derive(Debug)]
pub struct FrameDescriptor {
    objects: Vec<DrmObject>,
    layers: Vec<DrmLayer>,
}

impl FrameDescriptor {
    /// Build a descriptor, checking that every plane resolves to an object
    pub fn new(objects: Vec<DrmObject>, layers: Vec<DrmLayer>) -> Result<Self> {
        if objects.is_empty() || objects.len() > MAX_PLANES {
            return Err(PresentError::InvalidFrame(format!(
                "{} objects (expected 1..={})",
                objects.len(),
                MAX_PLANES
            )));
        }
        if layers.is_empty() || layers.len() > MAX_PLANES {
            return Err(PresentError::InvalidFrame(format!(
                "{} layers (expected 1..={})",
                layers.len(),
                MAX_PLANES
            )));
        }

        for (l, layer) in layers.iter().enumerate() {
            if layer.planes.is_empty() || layer.planes.len() > MAX_PLANES {
                return Err(PresentError::InvalidFrame(format!(
                    "layer {} has {} planes",
                    l,
                    layer.planes.len()
                )));
            }
            if let Some(plane) = layer
                .planes
                .iter()
                .find(|p| p.object_index >= objects.len())
            {
                return Err(PresentError::InvalidFrame(format!(
                    "layer {} references object {} of {}",
                    l,
                    plane.object_index,
                    objects.len()
                )));
            }
        }

        Ok(Self { objects, layers })
    }

    pub fn objects(&self) -> &[DrmObject] {
        &self.objects
    }

    pub fn layers(&self) -> &[DrmLayer] {
        &self.layers
    }

    pub fn object(&self, index: usize) -> Option<&DrmObject> {
        self.objects.get(index)
    }

    /// Distinct object indices referenced by the layers, in first-use order
    pub fn referenced_objects(&self) -> Vec<usize> {
        let mut seen = Vec::with_capacity(self.objects.len());
        for plane in self.layers.iter().flat_map(|l| l.planes.iter()) {
            if !seen.contains(&plane.object_index) {
                seen.push(plane.object_index);
            }
        }
        seen
    }

    /// Planes that make up a single scanout framebuffer.
    ///
    /// Single-layer descriptors contribute all planes of layer 0. Multi-layer
    /// descriptors (one object per component) contribute the first plane of
    /// each layer, in layer order.
    pub fn scanout_planes(&self) -> Vec<DrmPlane> {
        if self.layers.len() == 1 {
            self.layers[0].planes.clone()
        } else {
            self.layers.iter().map(|l| l.planes[0]).collect()
        }
    }

    /// Pixel format of the framebuffer built from [`scanout_planes`].
    ///
    /// Multi-layer descriptors carry one single-component format per layer;
    /// those map to the equivalent multi-planar format. Layer sets with no
    /// such equivalent are `Unsupported`.
    ///
    /// [`scanout_planes`]: Self::scanout_planes
    pub fn scanout_format(&self) -> Result<u32> {
        let formats: Vec<u32> = self.layers.iter().map(|l| l.format).collect();
        match formats.as_slice() {
            [single] => Ok(*single),
            [fourcc::R8, fourcc::GR88] => Ok(fourcc::NV12),
            [fourcc::R16, fourcc::GR1616] => Ok(fourcc::P010),
            [fourcc::R8, fourcc::R8, fourcc::R8] => Ok(fourcc::YUV420),
            _ => Err(PresentError::Unsupported(format!(
                "no scanout format for layers {:#010x?}",
                formats
            ))),
        }
    }
}
