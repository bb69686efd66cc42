//! Rotation buffers for video content
//!
//! The overlay engine can not rotate semi-planar YUV content on the fly. When
//! the display orientation differs from the orientation of a video surface,
//! a rotated copy of the frame is produced by a [`RotationDevice`] into a buffer
//! owned by the [`RotationBufferProvider`], and the overlay scans out of that
//! copy instead.

use std::ptr::NonNull;

use tracing::{debug, info_span, instrument, trace};

use crate::backend::allocator::{
    align_to, DeviceBuffer, Format, Fourcc, Modifier, RotatedBufferInfo, VideoPayload, YuvStride,
};
use crate::utils::{Buffer as BufferCoords, Size, Transform};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Engine producing rotated copies of video frames
pub trait RotationDevice {
    /// Error type thrown by the engine
    type Error: std::error::Error + Send + Sync + 'static;

    /// Acquires the engine context used for all following calls
    fn create_context(&mut self) -> Result<(), Self::Error>;

    /// Releases the engine context
    fn destroy_context(&mut self);

    /// Allocates a rotation target for a frame of the given (already rotated) geometry
    fn allocate(&mut self, width: u32, height: u32, stride: u32) -> Result<DeviceBuffer, Self::Error>;

    /// Gives a rotation target back
    fn release(&mut self, buffer: DeviceBuffer);

    /// Writes the frame described by `source`, rotated by `transform`, into `target`
    fn rotate(
        &mut self,
        source: &VideoPayload,
        target: &DeviceBuffer,
        transform: Transform,
    ) -> Result<(), Self::Error>;
}

/// Errors thrown by the [`RotationBufferProvider`]
#[derive(thiserror::Error, Debug)]
pub enum RotationError {
    /// The provider was used before it was initialized
    #[error("Rotation buffer provider is not initialized")]
    NotInitialized,
    /// The frame geometry can not be rotated
    #[error("Invalid frame geometry {width}x{height} with stride {stride}")]
    InvalidGeometry {
        /// Width of the frame
        width: u32,
        /// Height of the frame
        height: u32,
        /// Luma stride of the frame
        stride: u32,
    },
    /// The rotation engine failed
    #[error("Rotation device failure")]
    Device(#[source] BoxedError),
}

/// Configuration of a [`RotationBufferProvider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationConfig {
    /// Number of rotation targets cycled through
    pub max_buffers: usize,
    /// Alignment of the stride of rotated frames, in bytes, a power of two
    pub stride_alignment: u32,
    /// Alignment of the height of rotated frames, in lines, a power of two
    pub height_alignment: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        RotationConfig {
            max_buffers: 3,
            stride_alignment: 64,
            height_alignment: 16,
        }
    }
}

/// Returns true for the formats the overlay can display rotated
///
/// These are the two semi-planar YUV 4:2:0 layouts produced by video decoders,
/// linear and tiled NV12.
pub fn is_rotation_format(format: &Format) -> bool {
    format.code == Fourcc::Nv12
        && (format.modifier == Modifier::Linear || format.modifier == Modifier::I915_y_tiled)
}

/// Returns true for linear NV12, the only rotation format that may come without a payload
pub fn is_linear_nv12(format: &Format) -> bool {
    format.code == Fourcc::Nv12 && format.modifier == Modifier::Linear
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    width: u32,
    height: u32,
    stride: u32,
    aligned_height: u32,
}

#[derive(Debug)]
struct PoolEntry {
    buffer: DeviceBuffer,
    stale: bool,
}

#[derive(Debug)]
struct LastRotation {
    source: NonNull<u8>,
    width: u32,
    height: u32,
    transform: Transform,
    info: RotatedBufferInfo,
}

/// Pool of rotation targets and the logic deciding how to fill them
#[derive(Debug)]
pub struct RotationBufferProvider<D: RotationDevice> {
    device: D,
    config: RotationConfig,
    initialized: bool,
    geometry: Option<Geometry>,
    pool: Vec<PoolEntry>,
    next: usize,
    last: Option<LastRotation>,
    rotations: usize,
    span: tracing::Span,
}

impl<D: RotationDevice> RotationBufferProvider<D> {
    /// Creates a new provider on top of a rotation engine
    ///
    /// The provider has to be [initialized](RotationBufferProvider::initialize) before use.
    pub fn new(device: D, config: RotationConfig) -> Self {
        RotationBufferProvider {
            device,
            config,
            initialized: false,
            geometry: None,
            pool: Vec::with_capacity(config.max_buffers),
            next: 0,
            last: None,
            rotations: 0,
            span: info_span!("rotation_provider"),
        }
    }

    /// Acquires the engine context
    pub fn initialize(&mut self) -> Result<(), RotationError> {
        if self.initialized {
            return Ok(());
        }

        let _guard = self.span.enter();
        self.device
            .create_context()
            .map_err(|err| RotationError::Device(Box::new(err)))?;
        self.initialized = true;
        debug!(max_buffers = self.config.max_buffers, "rotation context created");
        Ok(())
    }

    /// Releases every rotation target and the engine context
    pub fn deinitialize(&mut self) {
        if !self.initialized {
            return;
        }

        let span = self.span.clone();
        let _guard = span.enter();
        self.release_pool();
        self.last = None;
        self.device.destroy_context();
        self.initialized = false;
        debug!("rotation context destroyed");
    }

    /// Whether the engine context is held
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of rotations computed so far
    pub fn rotations(&self) -> usize {
        self.rotations
    }

    /// Number of rotation targets currently allocated
    pub fn buffer_count(&self) -> usize {
        self.pool.len()
    }

    /// Describes a linear NV12 frame that came without a payload.
    ///
    /// If the last rotation was produced from the same pixels and is still
    /// valid, the returned payload refers to it, so that the frame does not
    /// get rotated again for an unchanged orientation.
    pub fn prepare_buffer_info(
        &self,
        width: u32,
        height: u32,
        stride: u32,
        source: NonNull<u8>,
    ) -> Result<VideoPayload, RotationError> {
        if width == 0 || height == 0 || stride < width {
            return Err(RotationError::InvalidGeometry { width, height, stride });
        }

        let mut payload = VideoPayload::new(
            width,
            height,
            YuvStride {
                luma: stride,
                chroma: stride,
            },
            Format {
                code: Fourcc::Nv12,
                modifier: Modifier::Linear,
            },
        );
        payload.source = Some(source);

        if let Some(last) = self.last.as_ref().filter(|last| {
            last.source == source
                && last.width == width
                && last.height == height
                && self.is_valid(last.info.handle)
        }) {
            payload.client_transform = last.transform;
            payload.rotated = Some(last.info);
        }

        Ok(payload)
    }

    /// Produces a copy of the frame described by `payload` rotated by `transform`.
    ///
    /// On success the payload describes the rotated copy and records `transform`
    /// as the orientation of its content. On failure the payload is left
    /// untouched and the frame must not be displayed.
    #[instrument(level = "debug", parent = &self.span, skip(self, payload), fields(width = payload.width, height = payload.height))]
    pub fn setup_rotation_buffer(
        &mut self,
        payload: &mut VideoPayload,
        transform: Transform,
    ) -> Result<(), RotationError> {
        if !self.initialized {
            return Err(RotationError::NotInitialized);
        }
        if payload.width == 0 || payload.height == 0 {
            return Err(RotationError::InvalidGeometry {
                width: payload.width,
                height: payload.height,
                stride: payload.stride.luma,
            });
        }

        let size = transform.transform_size(Size::<u32, BufferCoords>::new(payload.width, payload.height));
        let geometry = Geometry {
            width: size.w,
            height: size.h,
            stride: align_to(size.w, self.config.stride_alignment),
            aligned_height: align_to(size.h, self.config.height_alignment),
        };
        if self.geometry != Some(geometry) {
            if !self.pool.is_empty() {
                debug!(?geometry, "rotated geometry changed, reallocating rotation buffers");
            }
            self.release_pool();
            self.last = None;
            self.geometry = Some(geometry);
        }

        let slot = self.next % self.config.max_buffers.max(1);
        if slot >= self.pool.len() {
            let buffer = self
                .device
                .allocate(geometry.width, geometry.aligned_height, geometry.stride)
                .map_err(|err| RotationError::Device(Box::new(err)))?;
            debug!(handle = buffer.handle, slot, "allocated rotation buffer");
            self.pool.push(PoolEntry { buffer, stale: true });
        }
        let slot = slot.min(self.pool.len() - 1);

        let entry = &mut self.pool[slot];
        entry.stale = true;
        self.device
            .rotate(payload, &entry.buffer, transform)
            .map_err(|err| RotationError::Device(Box::new(err)))?;
        entry.stale = false;

        let info = RotatedBufferInfo {
            handle: entry.buffer.handle,
            gtt_offset_in_page: entry.buffer.gtt_offset_in_page,
            width: geometry.width,
            height: geometry.height,
            stride: YuvStride {
                luma: geometry.stride,
                chroma: geometry.stride,
            },
        };
        payload.rotated = Some(info);
        payload.client_transform = transform;

        self.last = payload.source.map(|source| LastRotation {
            source,
            width: payload.width,
            height: payload.height,
            transform,
            info,
        });
        self.next = slot + 1;
        self.rotations += 1;
        trace!(handle = info.handle, ?transform, "frame rotated");

        Ok(())
    }

    /// Invalidates the content of every rotation target.
    ///
    /// The targets stay allocated and are refilled by the next
    /// [`setup_rotation_buffer`](RotationBufferProvider::setup_rotation_buffer).
    pub fn reset(&mut self) {
        for entry in &mut self.pool {
            entry.stale = true;
        }
        self.last = None;
        self.next = 0;
    }

    /// Whether `info` still describes the content of one of the rotation targets.
    ///
    /// Targets are invalidated by [`reset`](RotationBufferProvider::reset) and
    /// whenever the pool gets reallocated.
    pub fn is_current(&self, info: &RotatedBufferInfo) -> bool {
        self.pool.iter().any(|entry| {
            entry.buffer.handle == info.handle
                && entry.buffer.gtt_offset_in_page == info.gtt_offset_in_page
                && !entry.stale
        })
    }

    fn is_valid(&self, handle: u32) -> bool {
        self.pool
            .iter()
            .any(|entry| entry.buffer.handle == handle && !entry.stale)
    }

    fn release_pool(&mut self) {
        for entry in self.pool.drain(..) {
            self.device.release(entry.buffer);
        }
        self.geometry = None;
        self.next = 0;
    }
}

impl<D: RotationDevice> Drop for RotationBufferProvider<D> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}
