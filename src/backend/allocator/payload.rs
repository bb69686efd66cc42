//! Metadata attached to video surfaces
//!
//! Video producers reserve a metadata area next to the pixel data of their
//! surfaces and store a [`VideoPayload`] in it. The overlay reads it to learn
//! about the content and writes back which orientation it wants the content in,
//! together with the location of the rotated copy once one exists.

use std::ptr::NonNull;
use std::time::Duration;

use super::{Format, YuvStride};
use crate::utils::Transform;

/// Output path requested by the producer of a video surface
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    /// Let the compositor decide
    #[default]
    Auto,
    /// Content has to go through the overlay
    Overlay,
    /// Content has to be composed by the GPU
    Gpu,
}

/// Location and layout of a rotated copy of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatedBufferInfo {
    /// Driver handle of the rotation buffer
    pub handle: u32,
    /// Page offset of the rotation buffer in device memory
    pub gtt_offset_in_page: u32,
    /// Width of the rotated frame
    pub width: u32,
    /// Height of the rotated frame
    pub height: u32,
    /// Strides of the rotated frame
    pub stride: YuvStride,
}

/// Per-frame video metadata
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPayload {
    /// Width of the decoded frame
    pub width: u32,
    /// Height of the decoded frame
    pub height: u32,
    /// Strides of the decoded frame
    pub stride: YuvStride,
    /// Pixel format of the decoded frame
    pub format: Format,
    /// Output path requested by the producer
    pub force_output_method: OutputMethod,
    /// Orientation of the content currently described by [`VideoPayload::rotated`]
    pub client_transform: Transform,
    /// Orientation last requested by the overlay
    pub layer_transform: Transform,
    /// Time the overlay last requested a new orientation
    pub hwc_timestamp: Option<Duration>,
    /// CPU address of the decoded pixels, for payloads synthesized by the overlay
    pub source: Option<NonNull<u8>>,
    /// Rotated copy of the frame, if one was produced
    pub rotated: Option<RotatedBufferInfo>,
}

impl VideoPayload {
    /// Creates a payload describing an unrotated frame
    pub fn new(width: u32, height: u32, stride: YuvStride, format: Format) -> Self {
        VideoPayload {
            width,
            height,
            stride,
            format,
            force_output_method: OutputMethod::Auto,
            client_transform: Transform::Normal,
            layer_transform: Transform::Normal,
            hwc_timestamp: None,
            source: None,
            rotated: None,
        }
    }
}
