//! HDR static metadata exchanged with the display controller
//!
//! The blob layout and the enumerations below follow the vendor KMS
//! properties (`HDR_SOURCE_METADATA`, `HDR_PANEL_METADATA`, `EOTF`,
//! `COLOR_SPACE`, `HDMI_OUTPUT_FORMAT`). They are part of the kernel ABI and
//! must stay bit-for-bit identical.

use bytemuck::{Pod, Zeroable};
use common::{ColorParams, ColorPrimaries, ColorTransfer};

/// Values of the plane `EOTF` property
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eotf {
    TraditionalGammaSdr = 0,
    TraditionalGammaHdr = 1,
    SmpteSt2084 = 2,
    Hlg = 3,
}

impl Eotf {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::TraditionalGammaSdr),
            1 => Some(Self::TraditionalGammaHdr),
            2 => Some(Self::SmpteSt2084),
            3 => Some(Self::Hlg),
            _ => None,
        }
    }
}

/// Values of the plane `COLOR_SPACE` property (V4L2 colorspace numbering)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneColorSpace {
    Default = 0,
    Smpte170m = 1,
    Rec709 = 3,
    Srgb = 8,
    Bt2020 = 10,
    DciP3 = 12,
}

impl PlaneColorSpace {
    /// Colorspace signalled alongside a given transfer function
    pub fn for_transfer(transfer: ColorTransfer) -> Self {
        if transfer.is_hdr() {
            Self::Bt2020
        } else {
            Self::Default
        }
    }
}

/// Values of the connector `HDMI_OUTPUT_FORMAT` property
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdmiOutputFormat {
    DefaultRgb = 0,
    Ycbcr444 = 1,
    Ycbcr422 = 2,
    Ycbcr420 = 3,
    /// Highest-quality subsampled YUV the sink accepts
    YcbcrHq = 4,
    /// Lowest-quality subsampled YUV the sink accepts
    YcbcrLq = 5,
}

/// HDR static metadata blob (`struct hdr_static_metadata`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct HdrStaticMetadata {
    pub eotf: u16,
    pub metadata_type: u16,
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_mastering_display_luminance: u16,
    pub min_mastering_display_luminance: u16,
    pub max_fall: u16,
    pub max_cll: u16,
    pub min_cll: u16,
}

impl HdrStaticMetadata {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn eotf(&self) -> Option<Eotf> {
        Eotf::from_raw(self.eotf)
    }

    pub fn is_hdr(&self) -> bool {
        self.eotf != Eotf::TraditionalGammaSdr as u16
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Parse a kernel blob; short blobs are zero-extended, long ones truncated
    pub fn from_blob(blob: &[u8]) -> Self {
        let mut metadata = Self::zeroed();
        let len = blob.len().min(Self::SIZE);
        bytemuck::bytes_of_mut(&mut metadata)[..len].copy_from_slice(&blob[..len]);
        metadata
    }
}

/// Capabilities the connected panel advertises through `HDR_PANEL_METADATA`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PanelMetadata {
    raw: HdrStaticMetadata,
}

impl PanelMetadata {
    pub fn from_blob(blob: &[u8]) -> Self {
        Self {
            raw: HdrStaticMetadata::from_blob(blob),
        }
    }

    /// A panel that advertises any EOTF besides SDR gamma accepts HDR metadata
    pub fn supports_hdr(&self) -> bool {
        self.raw.is_hdr()
    }

    pub fn raw(&self) -> &HdrStaticMetadata {
        &self.raw
    }
}

/// CIE 1931 chromaticity coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
struct Chromaticity {
    x: f64,
    y: f64,
}

const fn xy(x: f64, y: f64) -> Chromaticity {
    Chromaticity { x, y }
}

/// Red, green, blue and white point of a gamut
#[derive(Debug, Clone, Copy, PartialEq)]
struct Gamut {
    red: Chromaticity,
    green: Chromaticity,
    blue: Chromaticity,
    white: Chromaticity,
}

const D65: Chromaticity = xy(0.3127, 0.3290);
const DCI: Chromaticity = xy(0.3140, 0.3510);

fn gamut(primaries: ColorPrimaries) -> Gamut {
    let (red, green, blue, white) = match primaries {
        ColorPrimaries::Bt601_525 => (xy(0.630, 0.340), xy(0.310, 0.595), xy(0.155, 0.070), D65),
        ColorPrimaries::Bt601_625 => (xy(0.640, 0.330), xy(0.290, 0.600), xy(0.150, 0.060), D65),
        ColorPrimaries::Bt709 => (xy(0.640, 0.330), xy(0.300, 0.600), xy(0.150, 0.060), D65),
        ColorPrimaries::Bt2020 => (xy(0.708, 0.292), xy(0.170, 0.797), xy(0.131, 0.046), D65),
        ColorPrimaries::DciP3 => (xy(0.680, 0.320), xy(0.265, 0.690), xy(0.150, 0.060), DCI),
        ColorPrimaries::DisplayP3 => (xy(0.680, 0.320), xy(0.265, 0.690), xy(0.150, 0.060), D65),
        ColorPrimaries::Apple => (xy(0.625, 0.340), xy(0.280, 0.595), xy(0.115, 0.070), D65),
        ColorPrimaries::Adobe => (xy(0.640, 0.330), xy(0.210, 0.710), xy(0.150, 0.060), D65),
    };
    Gamut {
        red,
        green,
        blue,
        white,
    }
}

/// Chromaticity coordinates are sent in units of 0.00002
fn chroma_units(v: f64) -> u16 {
    (v * 50000.0).round() as u16
}

/// Derive the source metadata blob for a stream from its first image
pub fn derive_hdr_metadata(color: &ColorParams) -> HdrStaticMetadata {
    let eotf = match color.transfer {
        ColorTransfer::Pq => Eotf::SmpteSt2084,
        ColorTransfer::Hlg => Eotf::Hlg,
        _ => Eotf::TraditionalGammaSdr,
    };

    let g = gamut(color.primaries);
    let mut metadata = HdrStaticMetadata {
        eotf: eotf as u16,
        display_primaries_x: [g.red.x, g.green.x, g.blue.x].map(chroma_units),
        display_primaries_y: [g.red.y, g.green.y, g.blue.y].map(chroma_units),
        white_point_x: chroma_units(g.white.x),
        white_point_y: chroma_units(g.white.y),
        ..Default::default()
    };

    if let Some(mastering) = color.mastering {
        metadata.max_mastering_display_luminance =
            mastering.max.round().clamp(0.0, u16::MAX as f32) as u16;
        // Minimum luminance is carried in 0.0001 cd/m² units
        metadata.min_mastering_display_luminance =
            (mastering.min * 10000.0).round().clamp(0.0, u16::MAX as f32) as u16;
    }
    if let Some(light) = color.light_level {
        metadata.max_cll = light.max_cll;
        metadata.max_fall = light.max_fall;
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ContentLightLevel, MasteringLuminance};

    #[test]
    fn test_blob_layout() {
        assert_eq!(HdrStaticMetadata::SIZE, 30);

        let metadata = HdrStaticMetadata {
            eotf: 2,
            white_point_x: 0x1234,
            min_cll: 0xbeef,
            ..Default::default()
        };
        let bytes = metadata.as_bytes();
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]), 2);
        assert_eq!(u16::from_ne_bytes([bytes[16], bytes[17]]), 0x1234);
        assert_eq!(u16::from_ne_bytes([bytes[28], bytes[29]]), 0xbeef);
    }

    #[test]
    fn test_pq_bt2020() {
        let color = ColorParams {
            primaries: ColorPrimaries::Bt2020,
            transfer: ColorTransfer::Pq,
            mastering: Some(MasteringLuminance {
                min: 0.005,
                max: 1000.0,
            }),
            light_level: Some(ContentLightLevel {
                max_cll: 1000,
                max_fall: 400,
            }),
        };

        let metadata = derive_hdr_metadata(&color);
        assert_eq!(metadata.eotf(), Some(Eotf::SmpteSt2084));
        assert_eq!(metadata.display_primaries_x, [35400, 8500, 6550]);
        assert_eq!(metadata.display_primaries_y, [14600, 39850, 2300]);
        assert_eq!(metadata.white_point_x, 15635);
        assert_eq!(metadata.white_point_y, 16450);
        assert_eq!(metadata.max_mastering_display_luminance, 1000);
        assert_eq!(metadata.min_mastering_display_luminance, 50);
        assert_eq!(metadata.max_cll, 1000);
        assert_eq!(metadata.max_fall, 400);
    }

    #[test]
    fn test_sdr_defaults() {
        let metadata = derive_hdr_metadata(&ColorParams::default());
        assert_eq!(metadata.eotf(), Some(Eotf::TraditionalGammaSdr));
        assert!(!metadata.is_hdr());
        assert_eq!(metadata.max_cll, 0);
    }

    #[test]
    fn test_hlg() {
        let color = ColorParams {
            transfer: ColorTransfer::Hlg,
            ..Default::default()
        };
        assert_eq!(derive_hdr_metadata(&color).eotf(), Some(Eotf::Hlg));
    }

    #[test]
    fn test_panel_metadata_short_blob() {
        assert!(!PanelMetadata::from_blob(&[]).supports_hdr());
        assert!(!PanelMetadata::from_blob(&0u16.to_ne_bytes()).supports_hdr());

        let panel = PanelMetadata::from_blob(&(Eotf::SmpteSt2084 as u16).to_ne_bytes());
        assert!(panel.supports_hdr());
        assert_eq!(panel.raw().white_point_x, 0);
    }

    #[test]
    fn test_panel_metadata_long_blob() {
        let mut blob = vec![0u8; 64];
        blob[0] = 3;
        let panel = PanelMetadata::from_blob(&blob);
        assert_eq!(panel.raw().eotf(), Some(Eotf::Hlg));
    }

    #[test]
    fn test_colorspace_for_transfer() {
        assert_eq!(
            PlaneColorSpace::for_transfer(ColorTransfer::Pq),
            PlaneColorSpace::Bt2020
        );
        assert_eq!(
            PlaneColorSpace::for_transfer(ColorTransfer::Bt1886),
            PlaneColorSpace::Default
        );
    }
}
