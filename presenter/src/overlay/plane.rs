//! KMS video plane manager

use super::{CommitStrategy, Overlay, OverlayConfig};
use crate::display::{
    BlobId, DisplayDevice, FramebufferId, FramebufferLayout, ModeObject, PlaneUpdate,
    PropertyRequest, props,
};
use crate::geometry::{PlaneGeometry, compute_destination};
use crate::hdr::{
    Eotf, HdmiOutputFormat, HdrStaticMetadata, PanelMetadata, PlaneColorSpace,
    derive_hdr_metadata,
};
use crate::image::SharedImage;
use crate::import::ImportedHandles;
use crate::ring::GenerationRing;
use crate::stats::PresentStats;
use crate::{log_and_continue, log_once};
use common::{PresentError, Rect, Result, Size};
use std::time::Duration;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// One generation on screen (or about to be)
#[derive(Debug)]
pub struct PresentedFrame {
    framebuffer: Option<FramebufferId>,
    handles: ImportedHandles,
    image: Option<SharedImage>,
}

impl PresentedFrame {
    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn image(&self) -> Option<&SharedImage> {
        self.image.as_ref()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Destroy the framebuffer, close the handles and drop the image.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    pub fn release<D: DisplayDevice + ?Sized>(&mut self, device: &D) -> Result<()> {
        let mut result = Ok(());
        if let Some(fb) = self.framebuffer.take() {
            if let Err(e) = device.destroy_framebuffer(fb) {
                result = Err(PresentError::Teardown(format!(
                    "destroy framebuffer {}: {}",
                    fb.0, e
                )));
            }
        }
        if let Err(e) = self.handles.release(device) {
            if result.is_ok() {
                result = Err(e);
            }
        }
        self.image = None;
        result
    }
}

/// Source metadata published for the current stream
#[derive(Debug)]
struct HdrSession {
    metadata: HdrStaticMetadata,
    blob: BlobId,
}

/// Presents decoded frames on a KMS plane.
///
/// Owns the video plane and the connector's source metadata slot for its
/// whole lifetime.
pub struct OverlayPlaneManager<D: DisplayDevice> {
    device: D,
    config: OverlayConfig,
    display_size: Option<Size>,
    panel: PanelMetadata,
    ring: GenerationRing<PresentedFrame>,
    hdr: Option<HdrSession>,
    stats: PresentStats,
    hdr_skip_logged: bool,
    torn_down: bool,
}

impl<D: DisplayDevice> OverlayPlaneManager<D> {
    /// Probe the device and take over the video plane.
    ///
    /// Fails with [`PresentError::CapabilityMissing`] if the driver cannot
    /// import DMA-bufs.
    pub fn new(device: D, config: OverlayConfig) -> Result<Self> {
        let prime = device.supports_prime_import().map_err(|e| {
            PresentError::CapabilityMissing(format!("prime capability query: {}", e))
        })?;
        if !prime {
            return Err(PresentError::CapabilityMissing(
                "card does not support prime handles".into(),
            ));
        }

        let display_size = query_mode(&device, config.targets.crtc);

        let panel = match device.property_blob(
            ModeObject::Connector(config.targets.connector),
            props::HDR_PANEL_METADATA,
        ) {
            Ok(Some(blob)) => PanelMetadata::from_blob(&blob),
            Ok(None) => PanelMetadata::default(),
            Err(e) => {
                log::debug!("No panel HDR metadata: {}", e);
                PanelMetadata::default()
            }
        };
        if panel.supports_hdr() {
            log::info!("Panel supports HDR");
        }

        log::info!(
            "Video overlay on plane {} (CRTC {}, connector {}), {:?} commits, display {}",
            config.targets.video_plane,
            config.targets.crtc,
            config.targets.connector,
            config.strategy,
            display_size.map_or_else(|| "unknown".to_string(), |s| format!("{}x{}", s.width, s.height)),
        );

        let manager = Self {
            device,
            config,
            display_size,
            panel,
            ring: GenerationRing::new(config.strategy.ring_depth()),
            hdr: None,
            stats: PresentStats::new(),
            hdr_skip_logged: false,
            torn_down: false,
        };
        manager.disable_plane();
        Ok(manager)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn display_size(&self) -> Option<Size> {
        self.display_size
    }

    /// Re-read the CRTC's mode after a mode change.
    ///
    /// Destinations are scaled against the result from the next frame on.
    /// The first frame of every stream refreshes it as well.
    pub fn refresh_display_mode(&mut self) -> Option<Size> {
        let size = query_mode(&self.device, self.config.targets.crtc);
        if size != self.display_size {
            log::debug!(
                "CRTC {} mode changed: {:?} -> {:?}",
                self.config.targets.crtc,
                self.display_size,
                size
            );
        }
        self.display_size = size;
        size
    }

    pub fn panel(&self) -> &PanelMetadata {
        &self.panel
    }

    pub fn stats(&self) -> &PresentStats {
        &self.stats
    }

    /// Generations currently held, oldest first
    pub fn generations(&self) -> impl Iterator<Item = &PresentedFrame> {
        self.ring.iter()
    }

    /// Imported handles alive across all held generations
    pub fn live_handles(&self) -> usize {
        self.ring.iter().map(PresentedFrame::handle_count).sum()
    }

    /// Source metadata of the current stream, once the first frame is shown
    pub fn hdr_metadata(&self) -> Option<&HdrStaticMetadata> {
        self.hdr.as_ref().map(|s| &s.metadata)
    }

    /// Detach the plane from its CRTC right away.
    ///
    /// Issued as its own commit so the plane stops scanning out before any
    /// framebuffer is freed. Failure is logged only.
    pub fn disable_plane(&self) {
        let plane = self.config.targets.video_plane;
        let result = match self.config.strategy {
            CommitStrategy::Atomic => {
                let mut request = PropertyRequest::new();
                request.set(ModeObject::Plane(plane), props::FB_ID, 0);
                request.set(ModeObject::Plane(plane), props::CRTC_ID, 0);
                self.device.commit(&request, true)
            }
            CommitStrategy::Legacy => self.device.set_plane(&PlaneUpdate {
                plane,
                crtc: self.config.targets.crtc,
                framebuffer: None,
                crtc_rect: (0, 0, 0, 0),
                src_rect: (0, 0, 0, 0),
            }),
        };
        log_and_continue!(result, "commit disable plane request");
    }

    fn present_image(
        &mut self,
        image: &SharedImage,
        src: Rect,
        dst: Rect,
        batch: &mut PropertyRequest,
    ) -> Result<()> {
        if self.ring.is_empty() {
            self.refresh_display_mode();
        }
        let dst = match (self.config.osd_size, self.display_size) {
            (Some(osd), Some(display)) => compute_destination(display, osd, dst),
            _ => dst,
        };
        let geometry = PlaneGeometry::new(src, dst, self.config.alignment)?;

        let descriptor = &image.descriptor;
        let planes = descriptor.scanout_planes();
        let format = descriptor.scanout_format()?;

        // The tail generation is older than anything the display may still read
        let device = &self.device;
        self.ring.make_room(|mut evicted| {
            log_and_continue!(evicted.release(device), "release superseded frame");
        });

        let handles = match ImportedHandles::import(&self.device, descriptor, &planes) {
            Ok(handles) => handles,
            Err(e) => {
                if matches!(e, PresentError::Import(_)) {
                    self.stats.import_failures += 1;
                }
                self.stats.live_handles = self.live_handles();
                return Err(e);
            }
        };

        // Sized to the whole image so a cropped source stays inside it
        let size = Size::new(image.width, image.height);
        let mut layout = FramebufferLayout {
            width: size.width,
            height: size.height,
            format,
            handles: [None; 4],
            pitches: [0; 4],
            offsets: [0; 4],
        };
        for (i, plane) in planes.iter().enumerate() {
            layout.handles[i] = handles.get(plane.object_index);
            layout.pitches[i] = plane.pitch;
            layout.offsets[i] = plane.offset;
        }

        let mut frame = PresentedFrame {
            framebuffer: None,
            handles,
            image: None,
        };

        match self.device.add_framebuffer(&layout) {
            Ok(fb) => frame.framebuffer = Some(fb),
            Err(e) => {
                log_and_continue!(frame.release(&self.device), "release aborted frame");
                self.stats.import_failures += 1;
                return Err(PresentError::Import(format!(
                    "create {}x{} framebuffer: {}",
                    size.width, size.height, e
                )));
            }
        }

        let submitted = match self.config.strategy {
            CommitStrategy::Atomic => self.stage_atomic(image, &frame, &geometry).map(|request| {
                batch.extend(request);
            }),
            CommitStrategy::Legacy => self.submit_legacy(&frame, &geometry),
        };
        if let Err(e) = submitted {
            log_and_continue!(frame.release(&self.device), "release aborted frame");
            self.stats.commit_failures += 1;
            return Err(e);
        }

        frame.image = Some(SharedImage::clone(image));
        let device = &self.device;
        self.ring.advance(frame, |mut evicted| {
            log_and_continue!(evicted.release(device), "release superseded frame");
        });

        self.stats.frames_presented += 1;
        self.stats.live_handles = self.live_handles();
        self.stats.maybe_log_stats(STATS_INTERVAL);
        Ok(())
    }

    /// Build the plane and HDR property writes for `frame`
    fn stage_atomic(
        &mut self,
        image: &SharedImage,
        frame: &PresentedFrame,
        geometry: &PlaneGeometry,
    ) -> Result<PropertyRequest> {
        let targets = self.config.targets;
        let plane = ModeObject::Plane(targets.video_plane);
        let connector = ModeObject::Connector(targets.connector);
        let fb = frame.framebuffer.map_or(0, |fb| fb.0);

        let mut request = PropertyRequest::new();
        request.set(plane, props::FB_ID, fb as u64);
        request.set(plane, props::CRTC_ID, targets.crtc as u64);
        request.set(plane, props::SRC_X, geometry.src_x as u64);
        request.set(plane, props::SRC_Y, geometry.src_y as u64);
        request.set(plane, props::SRC_W, geometry.src_w as u64);
        request.set(plane, props::SRC_H, geometry.src_h as u64);
        // Signed coordinates travel as two's complement in the 64-bit value
        request.set(plane, props::CRTC_X, geometry.crtc_x as i64 as u64);
        request.set(plane, props::CRTC_Y, geometry.crtc_y as i64 as u64);
        request.set(plane, props::CRTC_W, geometry.crtc_w as u64);
        request.set(plane, props::CRTC_H, geometry.crtc_h as u64);
        request.set(plane, props::ZPOS, self.config.zpos);

        if self.hdr.is_none() {
            let metadata = derive_hdr_metadata(&image.color);
            let blob = self
                .device
                .create_blob(metadata.as_bytes())
                .map_err(|e| PresentError::Commit(format!("create HDR metadata blob: {}", e)))?;
            log::info!(
                "Video detected as {}",
                if metadata.is_hdr() { "HDR" } else { "SDR" }
            );
            self.hdr = Some(HdrSession { metadata, blob });
        }

        if let Some(session) = &self.hdr {
            let eotf = session.metadata.eotf;
            if self.panel.supports_hdr() {
                request.set(connector, props::HDR_SOURCE_METADATA, session.blob.0 as u64);
                request.set(plane, props::EOTF, eotf as u64);
            } else {
                let fallback = if session.metadata.is_hdr() {
                    Eotf::TraditionalGammaHdr
                } else {
                    Eotf::TraditionalGammaSdr
                };
                request.set(plane, props::EOTF, fallback as u64);
            }
            request.set(
                plane,
                props::COLOR_SPACE,
                PlaneColorSpace::for_transfer(image.color.transfer) as u64,
            );
            request.set(
                connector,
                props::HDMI_OUTPUT_FORMAT,
                HdmiOutputFormat::YcbcrHq as u64,
            );
        }

        Ok(request)
    }

    fn submit_legacy(&mut self, frame: &PresentedFrame, geometry: &PlaneGeometry) -> Result<()> {
        log_once!(
            self.hdr_skip_logged,
            debug,
            "Legacy plane updates carry no HDR metadata, skipping HDR signalling"
        );

        let update = PlaneUpdate {
            plane: self.config.targets.video_plane,
            crtc: self.config.targets.crtc,
            framebuffer: frame.framebuffer,
            crtc_rect: (
                geometry.crtc_x,
                geometry.crtc_y,
                geometry.crtc_w,
                geometry.crtc_h,
            ),
            src_rect: (geometry.src_x, geometry.src_y, geometry.src_w, geometry.src_h),
        };
        self.device.set_plane(&update).map_err(|e| {
            PresentError::Commit(format!(
                "set plane {} (buffer {}): {}",
                update.plane,
                frame.framebuffer.map_or(0, |fb| fb.0),
                e
            ))
        })
    }

    fn drain_ring(&mut self) {
        let device = &self.device;
        self.ring.drain(|mut frame| {
            log_and_continue!(frame.release(device), "release drained frame");
        });
        self.stats.live_handles = 0;
    }

    fn destroy_hdr_session(&mut self) {
        if let Some(session) = self.hdr.take() {
            log_and_continue!(
                self.device.destroy_blob(session.blob),
                "destroy HDR metadata blob"
            );
        }
    }

    fn end_stream(&mut self, batch: &mut PropertyRequest) {
        self.disable_plane();

        let drained = self.ring.len();
        self.drain_ring();

        if self.config.strategy == CommitStrategy::Atomic {
            let plane = ModeObject::Plane(self.config.targets.video_plane);
            let connector = ModeObject::Connector(self.config.targets.connector);
            batch.set(plane, props::EOTF, Eotf::TraditionalGammaSdr as u64);
            batch.set(plane, props::COLOR_SPACE, PlaneColorSpace::Default as u64);
            batch.set(
                connector,
                props::HDMI_OUTPUT_FORMAT,
                HdmiOutputFormat::DefaultRgb as u64,
            );
            batch.set(connector, props::HDR_SOURCE_METADATA, 0);
        }

        self.destroy_hdr_session();
        self.stats.drains += 1;
        log::debug!("End of stream: released {} frames", drained);
    }
}

fn query_mode<D: DisplayDevice>(device: &D, crtc: u32) -> Option<Size> {
    match device.crtc_mode_size(crtc) {
        Ok(size) => size,
        Err(e) => {
            log::warn!("Failed to read mode of CRTC {}: {}", crtc, e);
            None
        }
    }
}

impl<D: DisplayDevice> Overlay for OverlayPlaneManager<D> {
    fn present(
        &mut self,
        frame: Option<&SharedImage>,
        src: Rect,
        dst: Rect,
        batch: &mut PropertyRequest,
    ) -> Result<()> {
        match frame {
            Some(image) => {
                self.torn_down = false;
                self.present_image(image, src, dst, batch)
            }
            None => {
                self.end_stream(batch);
                Ok(())
            }
        }
    }

    fn uninit(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.disable_plane();
        self.drain_ring();
        self.destroy_hdr_session();
        log::debug!(
            "Overlay released ({} frames presented)",
            self.stats.frames_presented
        );
    }
}

impl<D: DisplayDevice> Drop for OverlayPlaneManager<D> {
    fn drop(&mut self) {
        self.uninit();
    }
}
