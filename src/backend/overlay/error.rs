use crate::backend::allocator::{Format, OutputMethod};

use super::rotation::RotationError;
use super::FlushFlags;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Errors thrown by the [`OverlayPlane`](super::OverlayPlane)
/// and the [`OverlayPlaneBase`](super::OverlayPlaneBase).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The plane was used before it was initialized
    #[error("Overlay plane is not initialized")]
    NotInitialized,
    /// A plane has to own at least one back buffer
    #[error("Overlay plane needs at least one back buffer")]
    NoBackBuffers,
    /// The current back buffer has not been programmed with a data buffer yet
    #[error("No data buffer was set for back buffer {0}")]
    NoDataBuffer(usize),
    /// Flush flags did not ask for exactly one of enable or disable
    #[error("Flush flags `{0:?}` have to contain exactly one of ENABLE or DISABLE")]
    InvalidFlushFlags(FlushFlags),
    /// The pixel format can not be rotated by the overlay
    #[error("Invalid video format {0:?}")]
    InvalidFormat(Format),
    /// The pixels of a buffer are not mapped into CPU memory
    #[error("Failed to get buffer user pointer")]
    NoCpuAddress,
    /// Neither an attached nor a synthesized video payload is available
    #[error("No video payload found")]
    NoPayload,
    /// The video payload does not describe a rotation buffer to scan out of
    #[error("Video payload carries no rotated buffer")]
    NoRotatedBuffer,
    /// The producer requested an output path the overlay can not provide
    #[error("Output method {0:?} is not supported by the overlay")]
    UnsupportedOutputMethod(OutputMethod),
    /// The clock used to timestamp rotation requests is unavailable
    #[error("Failed to read the monotonic clock")]
    Clock(#[source] std::io::Error),
    /// Allocating back buffers failed
    #[error("Failed to allocate overlay back buffers")]
    Allocator(#[source] BoxedError),
    /// The display driver rejected a register update
    #[error("Overlay update failed")]
    Channel(#[source] BoxedError),
    /// The rotation buffer provider failed
    #[error("Rotation buffer provider failed")]
    Rotation(#[from] RotationError),
}

/// Classification of [`Error`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller used the plane wrongly, the call can be corrected
    Precondition,
    /// A collaborator of the plane reported a failure
    Collaborator,
    /// The input is not supported by the overlay
    Unsupported,
}

impl Error {
    /// Classifies this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotInitialized
            | Error::NoBackBuffers
            | Error::NoDataBuffer(_)
            | Error::InvalidFlushFlags(_) => ErrorKind::Precondition,
            Error::InvalidFormat(_) | Error::UnsupportedOutputMethod(_) => ErrorKind::Unsupported,
            Error::NoCpuAddress
            | Error::NoPayload
            | Error::NoRotatedBuffer
            | Error::Clock(_)
            | Error::Allocator(_)
            | Error::Channel(_)
            | Error::Rotation(_) => ErrorKind::Collaborator,
        }
    }
}
