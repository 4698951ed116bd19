use anyhow::{Context, Result};
use presenter::Config;

fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.general.log_level),
    )
    .init();

    log::info!("Starting primeplane v{}", env!("CARGO_PKG_VERSION"));
    log::info!("  Device: {}", config.drm.device.display());
    log::info!("  Commit: {}", config.drm.commit);
    log::info!("  Overlay backend: {}", config.overlay.backend);
    log::info!(
        "  Texture path: {}",
        if config.texture.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    probe(&config)
}

/// Take over the video plane, report what the display supports and hand it back
#[cfg(feature = "drm")]
fn probe(config: &Config) -> Result<()> {
    use presenter::{
        CommitStrategy, DisplayDevice, KmsDevice, Overlay, OverlayPlaneManager, PropertyRequest,
        WaylandOverlay,
    };

    let strategy = config.commit_strategy()?;
    let empty = common::Rect::new(0, 0, 0, 0);

    if config.overlay.backend == "wayland" {
        let mut overlay = WaylandOverlay::new()?;
        overlay.present(None, empty, empty, &mut PropertyRequest::new())?;
        overlay.uninit();
        log::info!("Wayland overlay backend is available but cannot present frames yet");
        return Ok(());
    }

    let device = KmsDevice::open(&config.drm.device, strategy == CommitStrategy::Atomic)?;
    let targets = device
        .discover_targets()
        .context("Failed to find a display to present on")?;
    let overlay_config = config.overlay_config(targets)?;
    log::info!(
        "Using connector {}, CRTC {}, plane {}",
        overlay_config.targets.connector,
        overlay_config.targets.crtc,
        overlay_config.targets.video_plane
    );

    let mut manager = OverlayPlaneManager::new(device, overlay_config)?;
    match manager.display_size() {
        Some(size) => log::info!("Display mode: {}x{}", size.width, size.height),
        None => log::warn!("CRTC has no active mode"),
    }
    log::info!(
        "Panel HDR: {}",
        if manager.panel().supports_hdr() {
            "supported"
        } else {
            "not reported"
        }
    );

    let mut batch = PropertyRequest::new();
    manager.present(None, empty, empty, &mut batch)?;
    if strategy == CommitStrategy::Atomic && !batch.is_empty() {
        manager
            .device()
            .commit(&batch, false)
            .context("Failed to commit end-of-stream request")?;
    }
    manager.uninit();

    log::info!("Overlay plane released");
    Ok(())
}

#[cfg(not(feature = "drm"))]
fn probe(_config: &Config) -> Result<()> {
    anyhow::bail!("primeplane was built without the drm feature")
}
