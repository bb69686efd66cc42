//! Buffer metadata and device memory management.
//!
//! Collection of common traits and types describing the buffers an overlay
//! plane scans out of, and the device memory backing them.
//!
//! - [`Buffer`] and [`BufferMapper`] describe a mapped graphics buffer
//! - [`DeviceBuffer`] is a page-granular allocation inside device-addressable memory
//! - [`BackBufferAllocator`] hands out device memory for overlay register images
//! - [`VideoPayload`] is the per-frame metadata a video producer attaches to its surfaces

use std::ptr::NonNull;

pub mod payload;
pub use payload::{OutputMethod, RotatedBufferInfo, VideoPayload};

pub use drm_fourcc::{
    DrmFormat as Format, DrmFourcc as Fourcc, DrmModifier as Modifier, UnrecognizedFourcc,
};

/// Size of a page of device-addressable memory
pub const PAGE_SIZE: u32 = 4096;
/// Shift converting a page offset into a device address
pub const PAGE_SHIFT: u32 = 12;

/// Common trait describing common properties of most types of buffers.
pub trait Buffer {
    /// Width of the two-dimensional buffer
    fn width(&self) -> u32;
    /// Height of the two-dimensional buffer
    fn height(&self) -> u32;
    /// Size (w x h) of the two-dimensional buffer
    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
    /// Pixel format of the buffer
    fn format(&self) -> Format;
}

/// Named sub-buffers of a mapped surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubBuffer {
    /// Pixel data
    Pixels,
    /// Metadata area reserved for the [`VideoPayload`] of video surfaces
    Metadata,
}

/// Strides of the planes of a YUV semi-planar buffer, in bytes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct YuvStride {
    /// Stride of the luma plane
    pub luma: u32,
    /// Stride of the interleaved chroma plane
    pub chroma: u32,
}

/// A mapped graphics buffer.
///
/// Exposes everything the overlay needs to know about a buffer handed over
/// by the compositor. Implementations are read-only views, except for the
/// metadata sub-buffer of video surfaces which is shared with the producer.
pub trait BufferMapper: Buffer {
    /// Stable identity of the underlying buffer
    fn key(&self) -> u64;

    /// Per-plane strides
    fn stride(&self) -> YuvStride;

    /// CPU visible address of a sub-buffer, if it is mapped
    fn cpu_address(&self, sub_buffer: SubBuffer) -> Option<NonNull<u8>>;

    /// Page offset of the pixel data inside device-addressable memory
    fn gtt_offset_in_page(&self) -> u32;

    /// Whether the content is protected and needs to be decrypted by the display engine
    fn is_protected(&self) -> bool {
        false
    }

    /// Video metadata stored in the [`SubBuffer::Metadata`] area, if the producer attached one
    fn video_payload(&mut self) -> Option<&mut VideoPayload>;
}

/// A page-granular allocation inside device-addressable memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceBuffer {
    /// Driver handle of the allocation
    pub handle: u32,
    /// Offset of the first page of the allocation
    pub gtt_offset_in_page: u32,
    /// Size of the allocation in bytes
    pub size: u32,
}

impl DeviceBuffer {
    /// Device address of the first byte of the allocation
    #[inline]
    pub fn device_address(&self) -> u32 {
        self.gtt_offset_in_page << PAGE_SHIFT
    }
}

/// Interface to allocate device memory
pub trait BackBufferAllocator {
    /// Error type thrown if allocations fail
    type Error: std::error::Error + Send + Sync + 'static;

    /// Try to allocate `size` bytes of device-addressable memory
    fn allocate(&mut self, size: u32) -> Result<DeviceBuffer, Self::Error>;

    /// Give a previously allocated buffer back
    fn release(&mut self, buffer: DeviceBuffer);
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` has to be a power of two.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
