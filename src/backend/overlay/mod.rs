//! Hardware video overlay planes
//!
//! This module drives one video overlay plane of a display pipe. It translates
//! "show this buffer" requests of the compositor into the register image the
//! overlay engine reads, and takes care of rotating video content the engine
//! can not rotate by itself.
//!
//! ## How to use it
//!
//! An [`OverlayPlane`] is created for an overlay index and the [`DisplayDevice`]
//! it is attached to. It needs three collaborators, all injected at construction:
//!
//! - a [`BackBufferAllocator`](crate::backend::allocator::BackBufferAllocator)
//!   handing out device memory for the register images,
//! - a [`RotationDevice`] producing rotated copies of video frames,
//! - a [`RegisterChannel`] delivering register updates to the display driver.
//!
//! ```rust,ignore
//! use hwc_overlay::backend::overlay::{DisplayDevice, DisplayPlane, FlushFlags, OverlayPlane};
//! use hwc_overlay::utils::Transform;
//!
//! let mut plane = OverlayPlane::new(0, DisplayDevice::Primary, allocator, rotation_device, channel)?;
//! plane.initialize(3)?;
//! plane.set_transform(Transform::_90);
//!
//! // once per frame, on the compositor thread
//! plane.set_data_buffer(&mut mapper)?;
//! plane.flip()?;
//! commit(plane.context());
//!
//! // when the plane gets turned on or off
//! plane.flush(FlushFlags::ENABLE)?;
//! ```
//!
//! ### Rotation
//!
//! Semi-planar YUV video (NV12, linear or tiled) displayed with a transform
//! other than [`Transform::Normal`](crate::utils::Transform::Normal) is copied
//! into a rotation buffer first. The copy is only recomputed when the requested
//! orientation differs from the orientation recorded in the frame's
//! [`VideoPayload`](crate::backend::allocator::VideoPayload).
//!
//! ### Threading
//!
//! Planes are driven from a single compositor thread and provide no internal
//! locking. Register submissions block until the driver answered.

use bitflags::bitflags;

use crate::backend::allocator::BufferMapper;

mod base;
mod error;
mod plane;
pub mod registers;
pub mod rotation;
#[cfg(test)]
pub(crate) mod test_utils;

pub use self::base::{BackBuffer, OverlayPlaneBase, RotatedBufferMapper};
pub use self::error::{Error, ErrorKind};
pub use self::plane::OverlayPlane;
pub use self::registers::{
    OverlayAddress, OverlayContext, OverlayRegisters, PlaneType, RegisterChannel, RegisterRequest,
};
pub use self::rotation::{RotationBufferProvider, RotationConfig, RotationDevice, RotationError};

bitflags! {
    /// Requested plane transition of a [`DisplayPlane::flush`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FlushFlags: u32 {
        /// Turn the plane on
        const ENABLE = 0x1;
        /// Turn the plane off
        const DISABLE = 0x2;
    }
}

/// Display a plane is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayDevice {
    /// Built-in panel, driven by pipe A
    Primary,
    /// External display, driven by pipe B
    External,
}

impl DisplayDevice {
    /// Device id as understood by the display driver
    pub fn id(&self) -> u32 {
        match self {
            DisplayDevice::Primary => 0,
            DisplayDevice::External => 1,
        }
    }

    /// Value of the pipe select field of the overlay address
    pub fn pipe_select(&self) -> u32 {
        match self {
            DisplayDevice::Primary => 0b00,
            DisplayDevice::External => 0b10,
        }
    }
}

/// Lifecycle state of a plane
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneState {
    /// No resources are held
    #[default]
    Deinitialized,
    /// Resources are allocated, the plane was not flushed yet
    Initialized,
    /// The plane was turned on
    Enabled,
    /// The plane was turned off
    Disabled,
}

impl PlaneState {
    /// Whether resources are held, regardless of the enable state
    pub fn is_initialized(&self) -> bool {
        !matches!(self, PlaneState::Deinitialized)
    }
}

/// Common interface of display planes
pub trait DisplayPlane {
    /// Per-frame state committed to the hardware
    type Context;

    /// Allocates `buffer_count` back buffers and everything else the plane needs
    fn initialize(&mut self, buffer_count: usize) -> Result<(), Error>;

    /// Releases all resources of the plane
    fn deinitialize(&mut self);

    /// Prepares the context for the current back buffer
    fn flip(&mut self) -> Result<(), Error>;

    /// Turns the plane on or off
    fn flush(&mut self, flags: FlushFlags) -> Result<(), Error>;

    /// Forgets the buffers associated with the plane, keeping its allocations
    fn reset(&mut self);

    /// Associates a buffer with the current back buffer
    fn set_data_buffer(&mut self, mapper: &mut dyn BufferMapper) -> Result<(), Error>;

    /// Context built by the last [`flip`](DisplayPlane::flip)
    fn context(&self) -> &Self::Context;
}
