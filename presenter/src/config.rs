use crate::display::OverlayTargets;
use crate::geometry::AlignmentPolicy;
use crate::overlay::{CommitStrategy, OverlayConfig};
use crate::validate_enum;
use anyhow::{Context, Result};
use common::Size;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub drm: DrmSettings,

    #[serde(default)]
    pub overlay: OverlaySettings,

    #[serde(default)]
    pub texture: TextureSettings,
}

/// General settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Display device and the objects the video plane is attached to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DrmSettings {
    #[serde(default = "default_device")]
    pub device: PathBuf,

    pub connector_id: Option<u32>,

    pub crtc_id: Option<u32>,

    pub video_plane_id: Option<u32>,

    /// "atomic" or "legacy"
    #[serde(default = "default_commit")]
    pub commit: String,
}

impl Default for DrmSettings {
    fn default() -> Self {
        Self {
            device: default_device(),
            connector_id: None,
            crtc_id: None,
            video_plane_id: None,
            commit: default_commit(),
        }
    }
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/dri/card0")
}
fn default_commit() -> String {
    "atomic".to_string()
}

/// Overlay plane placement
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlaySettings {
    /// "drm" or "wayland"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_alignment")]
    pub origin_alignment: u32,

    /// Some scalers need 16
    #[serde(default = "default_alignment")]
    pub extent_alignment: u32,

    #[serde(default)]
    pub zpos: u64,

    /// GUI surface size destination rectangles are given in
    pub osd_width: Option<u32>,
    pub osd_height: Option<u32>,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            origin_alignment: default_alignment(),
            extent_alignment: default_alignment(),
            zpos: 0,
            osd_width: None,
            osd_height: None,
        }
    }
}

fn default_backend() -> String {
    "drm".to_string()
}
fn default_alignment() -> u32 {
    2
}

/// External texture path
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextureSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("primeplane");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;
        self.validate_commit(&self.drm.commit)?;
        self.validate_backend(&self.overlay.backend)?;

        AlignmentPolicy::new(self.overlay.origin_alignment, self.overlay.extent_alignment)
            .context("Invalid overlay alignment")?;

        if self.overlay.osd_width.is_some() != self.overlay.osd_height.is_some() {
            anyhow::bail!("osd_width and osd_height must be set together");
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_commit(&self, commit: &str) -> Result<()> {
        validate_enum!(commit, "atomic", "legacy")
    }

    fn validate_backend(&self, backend: &str) -> Result<()> {
        validate_enum!(backend, "drm", "wayland")
    }

    pub fn commit_strategy(&self) -> Result<CommitStrategy> {
        Ok(self.drm.commit.parse()?)
    }

    pub fn osd_size(&self) -> Option<Size> {
        match (self.overlay.osd_width, self.overlay.osd_height) {
            (Some(w), Some(h)) => Some(Size::new(w, h)),
            _ => None,
        }
    }

    /// Overlay settings for the given display objects.
    ///
    /// Ids missing from the file are filled in from `discovered`.
    pub fn overlay_config(&self, discovered: OverlayTargets) -> Result<OverlayConfig> {
        let targets = OverlayTargets {
            crtc: self.drm.crtc_id.unwrap_or(discovered.crtc),
            connector: self.drm.connector_id.unwrap_or(discovered.connector),
            video_plane: self.drm.video_plane_id.unwrap_or(discovered.video_plane),
        };

        let mut config = OverlayConfig::new(targets, self.commit_strategy()?);
        config.alignment =
            AlignmentPolicy::new(self.overlay.origin_alignment, self.overlay.extent_alignment)?;
        config.zpos = self.overlay.zpos;
        config.osd_size = self.osd_size();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.drm.device, PathBuf::from("/dev/dri/card0"));
        assert_eq!(config.drm.commit, "atomic");
        assert_eq!(config.overlay.origin_alignment, 2);
        assert_eq!(config.overlay.extent_alignment, 2);
        assert!(config.texture.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[general]
log_level = "debug"

[drm]
device = "/dev/dri/card1"
connector_id = 77
crtc_id = 61
video_plane_id = 45
commit = "legacy"

[overlay]
extent_alignment = 16
zpos = 1
osd_width = 1920
osd_height = 1080

[texture]
enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.drm.connector_id, Some(77));
        assert_eq!(config.commit_strategy().unwrap(), CommitStrategy::Legacy);
        assert_eq!(config.osd_size(), Some(Size::new(1920, 1080)));
        assert!(!config.texture.enabled);

        let discovered = OverlayTargets {
            crtc: 1,
            connector: 2,
            video_plane: 3,
        };
        let overlay = config.overlay_config(discovered).unwrap();
        assert_eq!(overlay.targets.crtc, 61);
        assert_eq!(overlay.targets.video_plane, 45);
        assert_eq!(overlay.alignment.extent, 16);
        assert_eq!(overlay.zpos, 1);
    }

    #[test]
    fn test_missing_ids_use_discovered() {
        let config = Config::default();
        let discovered = OverlayTargets {
            crtc: 10,
            connector: 20,
            video_plane: 30,
        };
        let overlay = config.overlay_config(discovered).unwrap();
        assert_eq!(overlay.targets, discovered);
        assert_eq!(overlay.strategy, CommitStrategy::Atomic);
        assert_eq!(overlay.osd_size, None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.drm.commit = "async".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.overlay.backend = "x11".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.overlay.extent_alignment = 12;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.overlay.osd_width = Some(1920);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.general.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.overlay.backend, "drm");
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[drm]\ncommit = \"sometimes\"\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }
}
