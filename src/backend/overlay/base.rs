use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use crate::backend::allocator::{
    BackBufferAllocator, Buffer, BufferMapper, DeviceBuffer, Format, RotatedBufferInfo, SubBuffer,
    VideoPayload, YuvStride, PAGE_SIZE,
};
use crate::utils::Transform;

use super::registers::{OverlayAddress, OverlayRegisters};
use super::{DisplayDevice, Error};

/// One back buffer of an overlay plane.
///
/// Holds the register image the overlay engine reads when this buffer is flipped
/// to, and the device memory backing it.
#[derive(Debug)]
pub struct BackBuffer {
    buffer: DeviceBuffer,
    registers: OverlayRegisters,
    data: Option<u64>,
}

impl BackBuffer {
    /// Page offset of the register image in device memory
    pub fn gtt_offset_in_page(&self) -> u32 {
        self.buffer.gtt_offset_in_page
    }

    /// Register image of this back buffer
    pub fn registers(&self) -> &OverlayRegisters {
        &self.registers
    }

    /// Mutable access to the register image of this back buffer
    pub fn registers_mut(&mut self) -> &mut OverlayRegisters {
        &mut self.registers
    }

    /// Key of the buffer the register image was last programmed with
    pub fn data_buffer(&self) -> Option<u64> {
        self.data
    }
}

/// Buffer mapper describing a rotation buffer.
///
/// Scanning out of it shows the content of the source buffer it was created
/// from, rotated by the transform recorded in the video payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatedBufferMapper {
    source: u64,
    format: Format,
    protected: bool,
    info: RotatedBufferInfo,
}

impl RotatedBufferMapper {
    /// Describes the rotation buffer recorded in `payload`.
    ///
    /// `source` and `protected` are taken over from the buffer the content
    /// originates from. Returns `None` if the payload does not refer to a
    /// rotation buffer.
    pub fn from_payload(source: u64, protected: bool, payload: &VideoPayload) -> Option<Self> {
        payload.rotated.map(|info| RotatedBufferMapper {
            source,
            format: payload.format,
            protected,
            info,
        })
    }

    /// Key of the buffer the rotated content originates from
    pub fn source(&self) -> u64 {
        self.source
    }

    /// Location and layout of the rotation buffer
    pub fn info(&self) -> &RotatedBufferInfo {
        &self.info
    }
}

impl Buffer for RotatedBufferMapper {
    fn width(&self) -> u32 {
        self.info.width
    }

    fn height(&self) -> u32 {
        self.info.height
    }

    fn format(&self) -> Format {
        self.format
    }
}

impl BufferMapper for RotatedBufferMapper {
    fn key(&self) -> u64 {
        (1 << 63) | self.info.handle as u64
    }

    fn stride(&self) -> YuvStride {
        self.info.stride
    }

    fn cpu_address(&self, _sub_buffer: SubBuffer) -> Option<NonNull<u8>> {
        None
    }

    fn gtt_offset_in_page(&self) -> u32 {
        self.info.gtt_offset_in_page
    }

    fn is_protected(&self) -> bool {
        self.protected
    }

    fn video_payload(&mut self) -> Option<&mut VideoPayload> {
        None
    }
}

/// State shared by all overlay planes.
///
/// Owns the pool of back buffers and the rotating index selecting the current
/// one. Hardware specific planes embed it and build on top of it.
#[derive(Debug)]
pub struct OverlayPlaneBase<A: BackBufferAllocator> {
    allocator: A,
    index: u32,
    device: DisplayDevice,
    back_buffers: Vec<BackBuffer>,
    current: usize,
    initialized: bool,
    transform: Transform,
    is_protected_buffer: bool,
}

impl<A: BackBufferAllocator> OverlayPlaneBase<A> {
    /// Creates the base state of overlay `index` on `device`
    pub fn new(index: u32, device: DisplayDevice, allocator: A) -> Self {
        OverlayPlaneBase {
            allocator,
            index,
            device,
            back_buffers: Vec::new(),
            current: 0,
            initialized: false,
            transform: Transform::Normal,
            is_protected_buffer: false,
        }
    }

    /// Index of the overlay
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Display the overlay is attached to
    pub fn device(&self) -> DisplayDevice {
        self.device
    }

    /// Pipe select field of the overlay address, in place
    pub fn pipe_config(&self) -> u32 {
        OverlayAddress::new()
            .with_pipe_select(self.device.pipe_select())
            .bits()
    }

    /// Allocates `count` back buffers.
    ///
    /// Either all buffers get allocated, or none is kept.
    pub fn initialize(&mut self, count: usize) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::NoBackBuffers);
        }
        if self.initialized {
            self.deinitialize();
        }

        let mut back_buffers = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocator.allocate(PAGE_SIZE) {
                Ok(buffer) => back_buffers.push(BackBuffer {
                    buffer,
                    registers: OverlayRegisters::default(),
                    data: None,
                }),
                Err(err) => {
                    warn!(allocated = back_buffers.len(), count, "failed to allocate back buffer");
                    for back_buffer in back_buffers {
                        self.allocator.release(back_buffer.buffer);
                    }
                    return Err(Error::Allocator(Box::new(err)));
                }
            }
        }

        debug!(count, "allocated overlay back buffers");
        self.back_buffers = back_buffers;
        self.current = 0;
        self.initialized = true;
        Ok(())
    }

    /// Releases every back buffer
    pub fn deinitialize(&mut self) {
        for back_buffer in self.back_buffers.drain(..) {
            self.allocator.release(back_buffer.buffer);
        }
        self.current = 0;
        self.is_protected_buffer = false;
        self.initialized = false;
    }

    /// Whether back buffers are allocated
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of back buffers
    pub fn back_buffer_count(&self) -> usize {
        self.back_buffers.len()
    }

    /// Index of the current back buffer
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The current back buffer
    pub fn current_back_buffer(&self) -> Option<&BackBuffer> {
        self.back_buffers.get(self.current)
    }

    /// Mutable access to the current back buffer
    pub fn current_back_buffer_mut(&mut self) -> Option<&mut BackBuffer> {
        self.back_buffers.get_mut(self.current)
    }

    /// Orientation the content is displayed in
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Changes the orientation the content is displayed in
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Whether the last data buffer needs decryption
    pub fn is_protected_buffer(&self) -> bool {
        self.is_protected_buffer
    }

    /// Moves to the next back buffer and programs it for `mapper`
    pub fn set_data_buffer(&mut self, mapper: &dyn BufferMapper) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        if self.back_buffers[self.current].data.is_some() {
            self.current = (self.current + 1) % self.back_buffers.len();
        }

        let back_buffer = &mut self.back_buffers[self.current];
        back_buffer.registers.program(
            mapper.gtt_offset_in_page(),
            mapper.width(),
            mapper.height(),
            mapper.stride(),
        );
        back_buffer.data = Some(mapper.key());
        self.is_protected_buffer = mapper.is_protected();

        trace!(
            slot = self.current,
            key = mapper.key(),
            protected = self.is_protected_buffer,
            "programmed back buffer"
        );
        Ok(())
    }

    /// Checks the current back buffer can be flipped to, and returns it
    pub fn check_flip(&self) -> Result<&BackBuffer, Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        let back_buffer = &self.back_buffers[self.current];
        if back_buffer.data.is_none() {
            return Err(Error::NoDataBuffer(self.current));
        }
        Ok(back_buffer)
    }

    /// Forgets every programmed data buffer, keeping the allocations
    pub fn reset(&mut self) {
        for back_buffer in &mut self.back_buffers {
            back_buffer.registers = OverlayRegisters::default();
            back_buffer.data = None;
        }
        self.current = 0;
        self.is_protected_buffer = false;
    }

}

impl<A: BackBufferAllocator> Drop for OverlayPlaneBase<A> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

#[cfg(test)]
mod tests {
    use super::{OverlayPlaneBase, RotatedBufferMapper};
    use crate::backend::allocator::{Buffer, BufferMapper, RotatedBufferInfo, YuvStride};
    use crate::backend::overlay::test_utils::{nv12_payload, Call, CallLog, MockAllocator, MockMapper};
    use crate::backend::overlay::{DisplayDevice, Error};

    fn base(log: &CallLog) -> OverlayPlaneBase<MockAllocator> {
        OverlayPlaneBase::new(0, DisplayDevice::Primary, MockAllocator::new(log.clone()))
    }

    #[test]
    fn partial_allocation_is_rolled_back() {
        let log = CallLog::default();
        let mut base = base(&log);
        log.fail_back_buffers_after(Some(2));

        assert!(matches!(base.initialize(3), Err(Error::Allocator(_))));
        assert!(!base.is_initialized());
        assert_eq!(
            log.calls(),
            vec![
                Call::BackBufferAllocate(1),
                Call::BackBufferAllocate(2),
                Call::BackBufferRelease(1),
                Call::BackBufferRelease(2),
            ]
        );
    }

    #[test]
    fn zero_back_buffers_are_rejected() {
        let log = CallLog::default();
        let mut base = base(&log);

        assert!(matches!(base.initialize(0), Err(Error::NoBackBuffers)));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn data_buffers_rotate_through_slots() {
        let log = CallLog::default();
        let mut base = base(&log);
        base.initialize(2).unwrap();

        base.set_data_buffer(&MockMapper::nv12(1, 64, 32)).unwrap();
        assert_eq!(base.current_index(), 0);
        base.set_data_buffer(&MockMapper::nv12(2, 64, 32)).unwrap();
        assert_eq!(base.current_index(), 1);
        base.set_data_buffer(&MockMapper::nv12(3, 64, 32)).unwrap();
        assert_eq!(base.current_index(), 0);
        assert_eq!(base.current_back_buffer().unwrap().data_buffer(), Some(3));
    }

    #[test]
    fn flip_needs_a_programmed_slot() {
        let log = CallLog::default();
        let mut base = base(&log);
        assert!(matches!(base.check_flip(), Err(Error::NotInitialized)));

        base.initialize(2).unwrap();
        assert!(matches!(base.check_flip(), Err(Error::NoDataBuffer(0))));

        let mapper = MockMapper::nv12(1, 64, 32);
        base.set_data_buffer(&mapper).unwrap();
        let back_buffer = base.check_flip().unwrap();
        assert_eq!(
            back_buffer.registers().ostart_0y,
            mapper.gtt_offset_in_page() << 12
        );

        base.reset();
        assert!(matches!(base.check_flip(), Err(Error::NoDataBuffer(0))));
        assert_eq!(base.back_buffer_count(), 2);
    }

    #[test]
    fn rotated_mapper_follows_the_source_buffer() {
        let mut payload = nv12_payload(64, 32);
        assert_eq!(RotatedBufferMapper::from_payload(7, true, &payload), None);

        payload.rotated = Some(RotatedBufferInfo {
            handle: 42,
            gtt_offset_in_page: 0x900,
            width: 32,
            height: 64,
            stride: YuvStride { luma: 64, chroma: 64 },
        });
        let rotated = RotatedBufferMapper::from_payload(7, false, &payload).unwrap();
        assert_eq!(rotated.source(), 7);
        assert!(!rotated.is_protected());
        assert_eq!(rotated.gtt_offset_in_page(), 0x900);
        assert_eq!((rotated.width(), rotated.height()), (32, 64));

        // same rotation buffer, source now carries protected content
        let rotated = RotatedBufferMapper::from_payload(7, true, &payload).unwrap();
        assert!(rotated.is_protected());
        assert_eq!(rotated.format(), payload.format);
    }

    #[test]
    fn drop_releases_back_buffers() {
        let log = CallLog::default();
        {
            let mut base = base(&log);
            base.initialize(2).unwrap();
        }
        assert_eq!(
            log.count(|call| matches!(call, Call::BackBufferRelease(_))),
            2
        );
    }
}
