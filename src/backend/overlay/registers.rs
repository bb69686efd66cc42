//! Register level representation of the overlay
//!
//! The overlay engine reads its configuration from a register image living in
//! device memory (one per back buffer, see [`OverlayRegisters`]). The address
//! of the image to use next is handed to the display driver either as part of
//! the per-frame [`OverlayContext`], or through a [`RegisterRequest`] submitted
//! on a [`RegisterChannel`] when the plane gets enabled or disabled.

use std::rc::Rc;
use std::sync::Arc;

use crate::backend::allocator::{YuvStride, PAGE_SHIFT};

/// Kind of display plane, as understood by the display driver
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneType {
    /// Sprite plane
    Sprite = 1,
    /// Video overlay plane
    Overlay = 2,
    /// Primary plane
    Primary = 3,
    /// Cursor plane
    Cursor = 4,
}

/// Address word of the overlay register image.
///
/// Packs three fields into one `u32`:
///
/// | bits     | field                                         |
/// |----------|-----------------------------------------------|
/// | `0`      | enable                                        |
/// | `6..=7`  | pipe select                                   |
/// | `12..=31`| page offset of the register image             |
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayAddress(u32);

impl OverlayAddress {
    /// Enable bit
    pub const ENABLE: u32 = 0x1;
    /// Position of the pipe select field
    pub const PIPE_SELECT_SHIFT: u32 = 6;
    /// Mask of the pipe select field
    pub const PIPE_SELECT_MASK: u32 = 0x3 << Self::PIPE_SELECT_SHIFT;
    /// Mask of the page offset field
    pub const PAGE_MASK: u32 = !((1 << PAGE_SHIFT) - 1);

    /// An address with all fields cleared
    pub const fn new() -> Self {
        OverlayAddress(0)
    }

    /// Reinterprets a raw register value
    pub const fn from_bits(bits: u32) -> Self {
        OverlayAddress(bits)
    }

    /// Raw register value
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Page offset of the register image
    pub fn gtt_offset_in_page(&self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// Replaces the page offset of the register image
    pub fn set_gtt_offset_in_page(&mut self, page: u32) {
        self.0 = (self.0 & !Self::PAGE_MASK) | ((page << PAGE_SHIFT) & Self::PAGE_MASK);
    }

    /// Pipe the overlay is routed to
    pub fn pipe_select(&self) -> u32 {
        (self.0 & Self::PIPE_SELECT_MASK) >> Self::PIPE_SELECT_SHIFT
    }

    /// Routes the overlay to another pipe
    pub fn set_pipe_select(&mut self, pipe: u32) {
        self.0 = (self.0 & !Self::PIPE_SELECT_MASK)
            | ((pipe << Self::PIPE_SELECT_SHIFT) & Self::PIPE_SELECT_MASK);
    }

    /// Whether the enable bit is set
    pub fn enabled(&self) -> bool {
        self.0 & Self::ENABLE != 0
    }

    /// Sets or clears the enable bit
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.0 |= Self::ENABLE;
        } else {
            self.0 &= !Self::ENABLE;
        }
    }

    /// Builder variant of [`OverlayAddress::set_gtt_offset_in_page`]
    pub fn with_gtt_offset_in_page(mut self, page: u32) -> Self {
        self.set_gtt_offset_in_page(page);
        self
    }

    /// Builder variant of [`OverlayAddress::set_pipe_select`]
    pub fn with_pipe_select(mut self, pipe: u32) -> Self {
        self.set_pipe_select(pipe);
        self
    }

    /// Builder variant of [`OverlayAddress::set_enabled`]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.set_enabled(enabled);
        self
    }
}

impl std::fmt::Debug for OverlayAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayAddress")
            .field("bits", &format_args!("{:#x}", self.0))
            .field("gtt_offset_in_page", &self.gtt_offset_in_page())
            .field("pipe_select", &self.pipe_select())
            .field("enabled", &self.enabled())
            .finish()
    }
}

/// Per-frame overlay configuration committed on flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayContext {
    /// Kind of plane, always [`PlaneType::Overlay`] once built
    pub plane_type: PlaneType,
    /// Register image address combined with pipe select and enable bit
    pub ovadd: OverlayAddress,
    /// Index of the overlay
    pub index: u32,
    /// Pipe the overlay is attached to
    pub pipe: u32,
}

impl Default for OverlayContext {
    fn default() -> Self {
        OverlayContext {
            plane_type: PlaneType::Overlay,
            ovadd: OverlayAddress::new(),
            index: 0,
            pipe: 0,
        }
    }
}

/// Register update request delivered to the display driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Turn the plane on
    pub plane_enable_mask: bool,
    /// Turn the plane off
    pub plane_disable_mask: bool,
    /// Kind of plane to update
    pub plane_type: PlaneType,
    /// Index of the plane to update
    pub index: u32,
    /// Register image address combined with pipe select
    pub ctx: OverlayAddress,
}

/// Transport of [`RegisterRequest`]s to the display driver
pub trait RegisterChannel {
    /// Error returned if the driver rejects a request
    type Error: std::error::Error + Send + Sync + 'static;

    /// Submits a request and waits for the driver to process it
    fn write_read(&self, request: &mut RegisterRequest) -> Result<(), Self::Error>;
}

impl<C: RegisterChannel + ?Sized> RegisterChannel for &C {
    type Error = C::Error;

    fn write_read(&self, request: &mut RegisterRequest) -> Result<(), Self::Error> {
        (**self).write_read(request)
    }
}

impl<C: RegisterChannel + ?Sized> RegisterChannel for Rc<C> {
    type Error = C::Error;

    fn write_read(&self, request: &mut RegisterRequest) -> Result<(), Self::Error> {
        (**self).write_read(request)
    }
}

impl<C: RegisterChannel + ?Sized> RegisterChannel for Arc<C> {
    type Error = C::Error;

    fn write_read(&self, request: &mut RegisterRequest) -> Result<(), Self::Error> {
        (**self).write_read(request)
    }
}

/// Register image of one overlay back buffer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRegisters {
    /// Offset of the luma plane inside the buffer
    pub obuf_0y: u32,
    /// Offset of the chroma plane inside the buffer
    pub obuf_0u: u32,
    /// Luma stride (low half) and chroma stride (high half)
    pub ostride: u32,
    /// Start address of the luma plane, field 0
    pub ostart_0y: u32,
    /// Start address of the luma plane, field 1
    pub ostart_1y: u32,
    /// Start address of the chroma plane, field 0
    pub ostart_0u: u32,
    /// Start address of the chroma plane, field 1
    pub ostart_1u: u32,
    /// Source width in pixels, luma (low half) and chroma (high half)
    pub swidth: u32,
    /// Source height in lines, luma (low half) and chroma (high half)
    pub sheight: u32,
}

impl OverlayRegisters {
    /// Decryption request bit of the start registers.
    ///
    /// Only allowed to change on a synchronous flip.
    pub const DECRYPTION_REQUEST: u32 = 0x1;

    /// Programs the image for a semi-planar buffer starting at `gtt_offset_in_page`
    pub fn program(&mut self, gtt_offset_in_page: u32, width: u32, height: u32, stride: YuvStride) {
        let base = gtt_offset_in_page << PAGE_SHIFT;
        let chroma_offset = stride.luma.wrapping_mul(height);

        *self = OverlayRegisters {
            obuf_0y: 0,
            obuf_0u: chroma_offset,
            ostride: (stride.luma & 0xffff) | ((stride.chroma & 0xffff) << 16),
            ostart_0y: base,
            ostart_1y: base,
            ostart_0u: base.wrapping_add(chroma_offset),
            ostart_1u: base.wrapping_add(chroma_offset),
            swidth: (width & 0xffff) | (((width / 2) & 0xffff) << 16),
            sheight: (height & 0xffff) | (((height / 2) & 0xffff) << 16),
        };
    }

    /// Asks the display engine to decrypt the buffer described by this image
    pub fn request_decryption(&mut self) {
        self.ostart_0y |= Self::DECRYPTION_REQUEST;
        self.ostart_1y |= Self::DECRYPTION_REQUEST;
        self.ostart_0u |= Self::DECRYPTION_REQUEST;
        self.ostart_1u |= Self::DECRYPTION_REQUEST;
    }

    /// Whether the decryption request is set on every start register
    pub fn decryption_requested(&self) -> bool {
        [self.ostart_0y, self.ostart_1y, self.ostart_0u, self.ostart_1u]
            .iter()
            .all(|start| start & Self::DECRYPTION_REQUEST != 0)
    }
}
