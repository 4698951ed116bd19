//! EGL/GLES backend for external image import
//!
//! Works on whatever EGL context is current on the calling thread; the
//! renderer owns context creation. Image entry points are resolved through
//! `eglGetProcAddress` so EGL 1.4 drivers with `EGL_KHR_image_base` work.

use super::{ExternalImageApi, ExternalImageDesc, TEXTURE_EXTERNAL_OES, attrib};
use common::{PresentError, Result};
use glow::HasContext as _;
use khronos_egl as egl;
use std::ffi::c_void;

type CreateImageKhr = unsafe extern "system" fn(
    display: *mut c_void,
    context: *mut c_void,
    target: u32,
    buffer: *mut c_void,
    attribs: *const i32,
) -> *mut c_void;
type DestroyImageKhr = unsafe extern "system" fn(display: *mut c_void, image: *mut c_void) -> u32;
type ImageTargetTexture2dOes = unsafe extern "system" fn(target: u32, image: *mut c_void);

const REQUIRED_EGL_EXTENSIONS: [&str; 2] = ["EXT_image_dma_buf_import", "EGL_KHR_image_base"];
const REQUIRED_GL_EXTENSION: &str = "GL_OES_EGL_image";

/// Sampling state of every external texture
const TEXTURE_PARAMETERS: [(u32, u32); 4] = [
    (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
    (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
    (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
    (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
];

/// GL keeps at most one flag per error kind
const MAX_PENDING_ERRORS: usize = 16;

/// Clear the sticky GL error flags, returning how many were set
fn drain_errors(mut get_error: impl FnMut() -> u32) -> usize {
    (0..MAX_PENDING_ERRORS)
        .take_while(|_| get_error() != glow::NO_ERROR)
        .count()
}

/// Handle of an imported EGL image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EglImage(*mut c_void);

/// External image API on the current EGL display
pub struct EglImageApi {
    _instance: egl::DynamicInstance<egl::EGL1_4>,
    display: egl::Display,
    gl: glow::Context,
    create_image: CreateImageKhr,
    destroy_image: DestroyImageKhr,
    image_target_texture: ImageTargetTexture2dOes,
}

impl EglImageApi {
    /// Bind to the current context and check the import extensions.
    ///
    /// # Safety
    /// An EGL context must be current on this thread and stay current for
    /// every later call on the returned value.
    pub unsafe fn from_current() -> Result<Self> {
        let instance = unsafe { egl::DynamicInstance::<egl::EGL1_4>::load_required() }
            .map_err(|e| PresentError::CapabilityMissing(format!("load libEGL: {}", e)))?;

        if instance.get_current_context().is_none() {
            return Err(PresentError::CapabilityMissing("no current EGL context".into()));
        }
        let display = instance
            .get_current_display()
            .ok_or_else(|| PresentError::CapabilityMissing("no current EGL display".into()))?;

        let extensions = instance
            .query_string(Some(display), egl::EXTENSIONS)
            .map_err(|e| PresentError::CapabilityMissing(format!("query EGL extensions: {}", e)))?
            .to_string_lossy()
            .into_owned();

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                instance
                    .get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        };

        let missing: Vec<&str> = REQUIRED_EGL_EXTENSIONS
            .iter()
            .copied()
            .filter(|ext| !extensions.contains(ext))
            .chain(
                (!gl.supported_extensions().contains(REQUIRED_GL_EXTENSION))
                    .then_some(REQUIRED_GL_EXTENSION),
            )
            .collect();
        if !missing.is_empty() {
            return Err(PresentError::CapabilityMissing(format!(
                "EGL doesn't support the following extensions: {}",
                missing.join(", ")
            )));
        }

        let resolve = |name: &str| {
            instance.get_proc_address(name).ok_or_else(|| {
                PresentError::CapabilityMissing(format!("missing entry point {}", name))
            })
        };
        let create_image = resolve("eglCreateImageKHR")?;
        let destroy_image = resolve("eglDestroyImageKHR")?;
        let image_target_texture = resolve("glEGLImageTargetTexture2DOES")?;

        log::info!("Using EGL DMA-buf interop");

        // SAFETY: the entry points were resolved by name and have the
        // signatures given by their extension specifications.
        unsafe {
            Ok(Self {
                _instance: instance,
                display,
                gl,
                create_image: std::mem::transmute::<extern "system" fn(), CreateImageKhr>(
                    create_image,
                ),
                destroy_image: std::mem::transmute::<extern "system" fn(), DestroyImageKhr>(
                    destroy_image,
                ),
                image_target_texture: std::mem::transmute::<
                    extern "system" fn(),
                    ImageTargetTexture2dOes,
                >(image_target_texture),
            })
        }
    }
}

impl ExternalImageApi for EglImageApi {
    type Image = EglImage;
    type Texture = glow::NativeTexture;

    fn create_textures(&mut self, count: usize) -> Result<Vec<glow::NativeTexture>> {
        let mut textures = Vec::with_capacity(count);
        for _ in 0..count {
            let texture = unsafe { self.gl.create_texture() }.map_err(|e| {
                self.delete_textures(&textures);
                PresentError::Import(format!("create texture: {}", e))
            })?;
            // The first bind fixes the texture's target for its whole life
            unsafe {
                self.gl.bind_texture(TEXTURE_EXTERNAL_OES, Some(texture));
                for (param, value) in TEXTURE_PARAMETERS {
                    self.gl.tex_parameter_i32(TEXTURE_EXTERNAL_OES, param, value as i32);
                }
            }
            textures.push(texture);
        }
        unsafe { self.gl.bind_texture(TEXTURE_EXTERNAL_OES, None) };
        Ok(textures)
    }

    fn delete_textures(&mut self, textures: &[glow::NativeTexture]) {
        for &texture in textures {
            unsafe { self.gl.delete_texture(texture) };
        }
    }

    fn create_image(&mut self, desc: &ExternalImageDesc<'_>) -> Result<EglImage> {
        let attribs = desc.to_egl_attribs();
        let image = unsafe {
            (self.create_image)(
                self.display.as_ptr(),
                std::ptr::null_mut(),
                attrib::LINUX_DMA_BUF,
                std::ptr::null_mut(),
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            return Err(PresentError::Import(format!(
                "eglCreateImageKHR failed for {}x{} fourcc {:#010x}",
                desc.width, desc.height, desc.fourcc
            )));
        }
        Ok(EglImage(image))
    }

    fn destroy_image(&mut self, image: EglImage) -> Result<()> {
        let ok = unsafe { (self.destroy_image)(self.display.as_ptr(), image.0) };
        if ok == egl::FALSE {
            return Err(PresentError::Teardown("eglDestroyImageKHR failed".into()));
        }
        Ok(())
    }

    fn bind_image(&mut self, texture: glow::NativeTexture, image: EglImage) -> Result<()> {
        let stale = drain_errors(|| unsafe { self.gl.get_error() });
        if stale > 0 {
            log::trace!("Discarded {} pending GL errors before image bind", stale);
        }
        unsafe {
            self.gl.active_texture(glow::TEXTURE0);
            self.gl.bind_texture(TEXTURE_EXTERNAL_OES, Some(texture));
            (self.image_target_texture)(TEXTURE_EXTERNAL_OES, image.0);
            self.gl.bind_texture(TEXTURE_EXTERNAL_OES, None);
        }
        match unsafe { self.gl.get_error() } {
            glow::NO_ERROR => Ok(()),
            code => Err(PresentError::Import(format!(
                "glEGLImageTargetTexture2DOES failed ({:#06x})",
                code
            ))),
        }
    }
}
