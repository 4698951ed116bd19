/// Transfer characteristic (EOTF) tagged on a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorTransfer {
    #[default]
    Bt1886,
    Srgb,
    Linear,
    Gamma22,
    /// SMPTE ST 2084
    Pq,
    /// ARIB STD-B67
    Hlg,
}

impl ColorTransfer {
    pub fn is_hdr(&self) -> bool {
        matches!(self, Self::Pq | Self::Hlg)
    }
}

/// Colour primaries tagged on a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPrimaries {
    Bt601_525,
    Bt601_625,
    #[default]
    Bt709,
    Bt2020,
    DciP3,
    DisplayP3,
    Apple,
    Adobe,
}

/// Mastering display luminance range in cd/m²
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasteringLuminance {
    pub min: f32,
    pub max: f32,
}

/// Content light level info (CTA-861.3), in cd/m²
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLightLevel {
    pub max_cll: u16,
    pub max_fall: u16,
}

/// Colour metadata carried by a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorParams {
    pub primaries: ColorPrimaries,
    pub transfer: ColorTransfer,
    pub mastering: Option<MasteringLuminance>,
    pub light_level: Option<ContentLightLevel>,
}
