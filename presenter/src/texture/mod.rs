//! External texture import for GPU compositing
//!
//! When the video cannot go on its own plane, each layer of a decoded frame
//! is wrapped in an EGL image straight from its DMA-bufs and sampled through
//! an external-OES texture. The pixel data never leaves the buffers the
//! decoder wrote.
//!
//! - `TextureMapper`: per-frame image lifetime on top of an
//!   [`ExternalImageApi`]
//! - `egl`: EGL/GLES implementation of the API

#[cfg(feature = "gles")]
pub mod egl;

#[cfg(feature = "gles")]
pub use egl::EglImageApi;

use crate::image::SharedImage;
use crate::log_and_continue;
use crate::ring::GenerationRing;
use common::{MAX_PLANES, PresentError, Result};
use std::fmt::Debug;
use std::os::fd::{AsRawFd, BorrowedFd};

/// Sampler target for external images (`GL_TEXTURE_EXTERNAL_OES`)
pub const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// Shader extensions needed to sample the bound textures
pub const SHADER_EXTENSIONS: &[&str] = &["GL_OES_EGL_image_external"];

/// EGL attribute tokens of `EGL_EXT_image_dma_buf_import`
pub mod attrib {
    pub const NONE: i32 = 0x3038;
    pub const WIDTH: i32 = 0x3057;
    pub const HEIGHT: i32 = 0x3056;
    pub const LINUX_DMA_BUF: u32 = 0x3270;
    pub const LINUX_DRM_FOURCC: i32 = 0x3271;
    pub const YUV_COLOR_SPACE_HINT: i32 = 0x327B;
    pub const SAMPLE_RANGE_HINT: i32 = 0x327C;
    pub const ITU_REC601: i32 = 0x327F;
    pub const YUV_NARROW_RANGE: i32 = 0x3283;

    /// (fd, offset, pitch) tokens per plane
    pub const PLANE: [(i32, i32, i32); 4] = [
        (0x3272, 0x3273, 0x3274),
        (0x3275, 0x3276, 0x3277),
        (0x3278, 0x3279, 0x327A),
        (0x3440, 0x3441, 0x3442),
    ];
}

/// One plane of an external image
#[derive(Debug, Clone, Copy)]
pub struct ImagePlane<'a> {
    pub fd: BorrowedFd<'a>,
    pub offset: u32,
    pub pitch: u32,
}

/// Everything needed to import one layer as an external image
#[derive(Debug, Clone)]
pub struct ExternalImageDesc<'a> {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<ImagePlane<'a>>,
}

impl<'a> ExternalImageDesc<'a> {
    /// Describe layer `layer` of a decoded image
    pub fn from_layer(image: &'a SharedImage, layer: usize) -> Result<Self> {
        let descriptor = &image.descriptor;
        let drm_layer = descriptor.layers().get(layer).ok_or_else(|| {
            PresentError::InvalidFrame(format!("frame has no layer {}", layer))
        })?;

        let planes = drm_layer
            .planes
            .iter()
            .map(|plane| {
                let object = descriptor.object(plane.object_index).ok_or_else(|| {
                    PresentError::InvalidFrame(format!(
                        "layer {} references missing object {}",
                        layer, plane.object_index
                    ))
                })?;
                Ok(ImagePlane {
                    fd: object.fd(),
                    offset: plane.offset,
                    pitch: plane.pitch,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            fourcc: drm_layer.format,
            width: image.width,
            height: image.height,
            planes,
        })
    }

    /// `EGL_NONE`-terminated attribute list for `eglCreateImageKHR`.
    ///
    /// Colour hints are fixed to BT.601 narrow range.
    pub fn to_egl_attribs(&self) -> Vec<i32> {
        let mut attribs = Vec::with_capacity(7 + self.planes.len() * 6 + 4);
        attribs.extend([attrib::LINUX_DRM_FOURCC, self.fourcc as i32]);
        attribs.extend([attrib::WIDTH, self.width as i32]);
        attribs.extend([attrib::HEIGHT, self.height as i32]);

        for (plane, (fd, offset, pitch)) in self.planes.iter().zip(attrib::PLANE) {
            attribs.extend([fd, plane.fd.as_raw_fd()]);
            attribs.extend([offset, plane.offset as i32]);
            attribs.extend([pitch, plane.pitch as i32]);
        }

        attribs.extend([attrib::YUV_COLOR_SPACE_HINT, attrib::ITU_REC601]);
        attribs.extend([attrib::SAMPLE_RANGE_HINT, attrib::YUV_NARROW_RANGE]);
        attribs.push(attrib::NONE);
        attribs
    }
}

/// GPU-side operations used to sample DMA-bufs as textures
pub trait ExternalImageApi {
    type Image: Copy + Debug;
    type Texture: Copy + Debug + PartialEq;

    /// Create `count` textures with linear filtering and edge clamping
    fn create_textures(&mut self, count: usize) -> Result<Vec<Self::Texture>>;

    fn delete_textures(&mut self, textures: &[Self::Texture]);

    fn create_image(&mut self, desc: &ExternalImageDesc<'_>) -> Result<Self::Image>;

    fn destroy_image(&mut self, image: Self::Image) -> Result<()>;

    /// Attach `image` to `texture` on the external sampler target
    fn bind_image(&mut self, texture: Self::Texture, image: Self::Image) -> Result<()>;
}

/// A layer ready for sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding<T> {
    pub texture: T,
    pub target: u32,
    /// Row pitch of the layer's first plane, in bytes
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
struct MappedFrame<I> {
    images: Vec<I>,
    _image: SharedImage,
}

/// Maps decoded frames to external textures, one frame at a time
pub struct TextureMapper<A: ExternalImageApi> {
    api: A,
    textures: Vec<A::Texture>,
    mapped: GenerationRing<MappedFrame<A::Image>>,
}

impl<A: ExternalImageApi> TextureMapper<A> {
    pub fn create(api: A) -> Self {
        log::debug!(
            "External texture import ready (shader needs {})",
            SHADER_EXTENSIONS.join(", ")
        );
        Self {
            api,
            textures: Vec::new(),
            mapped: GenerationRing::new(1),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Recreate the texture objects, dropping whatever they held
    pub fn reinit(&mut self) -> Result<()> {
        self.unmap();
        self.delete_textures();
        self.textures = self.api.create_textures(MAX_PLANES)?;
        Ok(())
    }

    /// Import every layer of `image` and bind it to its texture.
    ///
    /// Images from the previous call are destroyed first. If any layer
    /// fails, everything created by this call is destroyed again.
    pub fn map_frame(&mut self, image: &SharedImage) -> Result<Vec<TextureBinding<A::Texture>>> {
        self.unmap();
        if self.textures.is_empty() {
            self.reinit()?;
        }

        let layers = image.descriptor.layers();
        let mut images = Vec::with_capacity(layers.len());
        let mut bindings = Vec::with_capacity(layers.len());

        for (l, layer) in layers.iter().enumerate() {
            let texture = self.textures[l];
            let result = ExternalImageDesc::from_layer(image, l)
                .and_then(|desc| self.api.create_image(&desc))
                .and_then(|egl_image| {
                    images.push(egl_image);
                    self.api.bind_image(texture, egl_image)
                });

            if let Err(e) = result {
                for created in images.drain(..) {
                    log_and_continue!(self.api.destroy_image(created), "destroy partial image");
                }
                return Err(e);
            }

            bindings.push(TextureBinding {
                texture,
                target: TEXTURE_EXTERNAL_OES,
                width: layer.planes[0].pitch,
                height: image.height,
            });
        }

        let api = &mut self.api;
        self.mapped.advance(
            MappedFrame {
                images,
                _image: SharedImage::clone(image),
            },
            |frame| release_images(api, frame),
        );
        Ok(bindings)
    }

    /// Destroy the images of the mapped frame, if any
    pub fn unmap(&mut self) {
        let api = &mut self.api;
        self.mapped.drain(|frame| release_images(api, frame));
    }

    /// Number of EGL images currently alive
    pub fn mapped_images(&self) -> usize {
        self.mapped.iter().map(|f| f.images.len()).sum()
    }

    pub fn destroy(&mut self) {
        self.unmap();
        self.delete_textures();
    }

    fn delete_textures(&mut self) {
        if !self.textures.is_empty() {
            self.api.delete_textures(&self.textures);
            self.textures.clear();
        }
    }
}

impl<A: ExternalImageApi> Drop for TextureMapper<A> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn release_images<A: ExternalImageApi>(api: &mut A, frame: MappedFrame<A::Image>) {
    for image in frame.images {
        log_and_continue!(api.destroy_image(image), "destroy external image");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::DecodedImage;
    use common::{ColorParams, DrmLayer, DrmObject, DrmPlane, FrameDescriptor, fourcc};
    use std::collections::BTreeSet;
    use std::os::fd::OwnedFd;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct MockApi {
        next: u32,
        live_images: BTreeSet<u32>,
        live_textures: BTreeSet<u32>,
        bound: Vec<(u32, u32)>,
        fail_create_at: Option<usize>,
        created: usize,
    }

    impl ExternalImageApi for MockApi {
        type Image = u32;
        type Texture = u32;

        fn create_textures(&mut self, count: usize) -> Result<Vec<u32>> {
            let textures: Vec<u32> = (0..count as u32).map(|i| 1000 + self.next + i).collect();
            self.next += count as u32;
            self.live_textures.extend(&textures);
            Ok(textures)
        }

        fn delete_textures(&mut self, textures: &[u32]) {
            for t in textures {
                self.live_textures.remove(t);
            }
        }

        fn create_image(&mut self, _desc: &ExternalImageDesc<'_>) -> Result<u32> {
            if self.fail_create_at == Some(self.created) {
                return Err(PresentError::Import("image rejected".into()));
            }
            self.created += 1;
            self.next += 1;
            self.live_images.insert(self.next);
            Ok(self.next)
        }

        fn destroy_image(&mut self, image: u32) -> Result<()> {
            self.live_images.remove(&image);
            Ok(())
        }

        fn bind_image(&mut self, texture: u32, image: u32) -> Result<()> {
            self.bound.push((texture, image));
            Ok(())
        }
    }

    fn object() -> DrmObject {
        DrmObject::new(OwnedFd::from(tempfile::tempfile().unwrap()), 1 << 20)
    }

    fn two_layer_image() -> SharedImage {
        let plane = |object_index, pitch| DrmPlane {
            object_index,
            offset: 0,
            pitch,
        };
        let descriptor = FrameDescriptor::new(
            vec![object(), object()],
            vec![
                DrmLayer::new(fourcc::R8, vec![plane(0, 1280)]),
                DrmLayer::new(fourcc::GR88, vec![plane(1, 1280)]),
            ],
        )
        .unwrap();
        DecodedImage::new(descriptor, 1270, 720, ColorParams::default()).shared()
    }

    #[test]
    fn test_attribs_layout() {
        let image = two_layer_image();
        let desc = ExternalImageDesc::from_layer(&image, 1).unwrap();
        let attribs = desc.to_egl_attribs();

        assert_eq!(&attribs[..6], &[0x3271, fourcc::GR88 as i32, 0x3057, 1270, 0x3056, 720]);
        assert_eq!(attribs[6], 0x3272);
        assert_eq!(attribs[8..12], [0x3273, 0, 0x3274, 1280]);
        assert_eq!(&attribs[12..16], &[0x327B, 0x327F, 0x327C, 0x3283]);
        assert_eq!(attribs.last(), Some(&attrib::NONE));
        assert_eq!(attribs.len(), 17);
    }

    #[test]
    fn test_map_frame_binds_each_layer() {
        let mut mapper = TextureMapper::create(MockApi::default());
        mapper.reinit().unwrap();
        let image = two_layer_image();

        let bindings = mapper.map_frame(&image).unwrap();
        assert_eq!(bindings.len(), 2);
        for binding in &bindings {
            assert_eq!(binding.target, TEXTURE_EXTERNAL_OES);
            assert_eq!(binding.width, 1280);
            assert_eq!(binding.height, 720);
        }
        assert_ne!(bindings[0].texture, bindings[1].texture);
        assert_eq!(mapper.api().live_images.len(), 2);
        assert_eq!(Arc::strong_count(&image), 2);
    }

    #[test]
    fn test_next_frame_unmaps_previous() {
        let mut mapper = TextureMapper::create(MockApi::default());
        let first = two_layer_image();
        let second = two_layer_image();

        mapper.map_frame(&first).unwrap();
        mapper.map_frame(&second).unwrap();
        assert_eq!(mapper.mapped_images(), 2);
        assert_eq!(mapper.api().live_images.len(), 2);
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn test_failed_layer_rolls_back() {
        let mut mapper = TextureMapper::create(MockApi::default());
        mapper.map_frame(&two_layer_image()).unwrap();

        mapper.api.fail_create_at = Some(3);
        let err = mapper.map_frame(&two_layer_image()).unwrap_err();
        assert!(matches!(err, PresentError::Import(_)));
        assert_eq!(mapper.api().live_images.len(), 0);
        assert_eq!(mapper.mapped_images(), 0);
    }

    #[test]
    fn test_textures_survive_frames_until_reinit() {
        let mut mapper = TextureMapper::create(MockApi::default());
        let first = mapper.map_frame(&two_layer_image()).unwrap();
        let second = mapper.map_frame(&two_layer_image()).unwrap();
        assert_eq!(first[0].texture, second[0].texture);

        mapper.reinit().unwrap();
        let third = mapper.map_frame(&two_layer_image()).unwrap();
        assert_ne!(first[0].texture, third[0].texture);
        assert_eq!(mapper.api().live_textures.len(), MAX_PLANES);

        mapper.destroy();
        assert!(mapper.api().live_textures.is_empty());
        assert!(mapper.api().live_images.is_empty());
    }
}
