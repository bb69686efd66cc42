//! Hardware facing parts of the compositor
//!
//! - [`allocator`] describes buffers and device memory
//! - [`overlay`] drives video overlay planes

pub mod allocator;
pub mod overlay;
