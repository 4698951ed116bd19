//! Decoded images as handed over by the decoder

use common::{ColorParams, FrameDescriptor};
use std::sync::Arc;

/// A decoded DRM-PRIME frame.
///
/// Shared between the decoder and every presentation slot that scans it
/// out. The backing DMA-bufs stay open for as long as any [`SharedImage`]
/// exists.
#[derive(Debug)]
pub struct DecodedImage {
    pub descriptor: FrameDescriptor,
    pub width: u32,
    pub height: u32,
    pub color: ColorParams,
}

/// Shared-ownership handle to a decoded image.
///
/// Installing a clone into a slot retains the image; clearing the slot with
/// `Option::take` releases it. There is no separate retain/release call.
pub type SharedImage = Arc<DecodedImage>;

impl DecodedImage {
    pub fn new(descriptor: FrameDescriptor, width: u32, height: u32, color: ColorParams) -> Self {
        Self {
            descriptor,
            width,
            height,
            color,
        }
    }

    pub fn shared(self) -> SharedImage {
        Arc::new(self)
    }
}
