//! Recording stand-ins for the collaborators of the overlay

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;

use crate::backend::allocator::{
    BackBufferAllocator, Buffer, BufferMapper, DeviceBuffer, Format, Fourcc, Modifier, SubBuffer,
    VideoPayload, YuvStride,
};
use crate::utils::Transform;

use super::registers::{RegisterChannel, RegisterRequest};
use super::rotation::RotationDevice;

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, thiserror::Error)]
#[error("mock failure: {0}")]
pub(crate) struct MockError(&'static str);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    BackBufferAllocate(u32),
    BackBufferRelease(u32),
    RotationCreateContext,
    RotationDestroyContext,
    RotationAllocate { width: u32, height: u32, stride: u32 },
    RotationRelease(u32),
    Rotate { handle: u32, transform: Transform },
    Register(RegisterRequest),
}

#[derive(Debug, Default)]
struct Inner {
    calls: RefCell<Vec<Call>>,
    next_handle: Cell<u32>,
    live_rotation_contexts: Cell<i32>,
    fail_back_buffer_after: Cell<Option<usize>>,
    fail_context: Cell<bool>,
    fail_rotation: Cell<bool>,
    fail_register: Cell<bool>,
}

/// Shared, ordered record of every collaborator call
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Rc<Inner>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.calls.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.calls.borrow().iter().filter(|call| pred(*call)).count()
    }

    pub fn clear(&self) {
        self.0.calls.borrow_mut().clear();
    }

    pub fn registers(&self) -> Vec<RegisterRequest> {
        self.0
            .calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Register(request) => Some(*request),
                _ => None,
            })
            .collect()
    }

    pub fn rotations(&self) -> usize {
        self.count(|call| matches!(call, Call::Rotate { .. }))
    }

    pub fn live_rotation_contexts(&self) -> i32 {
        self.0.live_rotation_contexts.get()
    }

    /// Lets back buffer allocation fail once `count` buffers were handed out
    pub fn fail_back_buffers_after(&self, count: Option<usize>) {
        self.0.fail_back_buffer_after.set(count);
    }

    pub fn fail_context(&self, fail: bool) {
        self.0.fail_context.set(fail);
    }

    pub fn fail_rotation(&self, fail: bool) {
        self.0.fail_rotation.set(fail);
    }

    pub fn fail_register(&self, fail: bool) {
        self.0.fail_register.set(fail);
    }

    fn push(&self, call: Call) {
        self.0.calls.borrow_mut().push(call);
    }

    fn handle(&self) -> u32 {
        let handle = self.0.next_handle.get() + 1;
        self.0.next_handle.set(handle);
        handle
    }
}

#[derive(Debug)]
pub(crate) struct MockAllocator {
    log: CallLog,
    allocated: usize,
}

impl MockAllocator {
    pub fn new(log: CallLog) -> Self {
        MockAllocator { log, allocated: 0 }
    }
}

impl BackBufferAllocator for MockAllocator {
    type Error = MockError;

    fn allocate(&mut self, size: u32) -> Result<DeviceBuffer, MockError> {
        if self
            .log
            .0
            .fail_back_buffer_after
            .get()
            .is_some_and(|limit| self.allocated >= limit)
        {
            return Err(MockError("out of device memory"));
        }
        let handle = self.log.handle();
        self.allocated += 1;
        self.log.push(Call::BackBufferAllocate(handle));
        Ok(DeviceBuffer {
            handle,
            gtt_offset_in_page: 0x100 + handle,
            size,
        })
    }

    fn release(&mut self, buffer: DeviceBuffer) {
        self.allocated -= 1;
        self.log.push(Call::BackBufferRelease(buffer.handle));
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockRotationDevice {
    log: CallLog,
}

impl MockRotationDevice {
    pub fn new(log: CallLog) -> Self {
        MockRotationDevice { log }
    }
}

impl RotationDevice for MockRotationDevice {
    type Error = MockError;

    fn create_context(&mut self) -> Result<(), MockError> {
        if self.log.0.fail_context.get() {
            return Err(MockError("no rotation engine"));
        }
        self.log.0.live_rotation_contexts.set(self.log.live_rotation_contexts() + 1);
        self.log.push(Call::RotationCreateContext);
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.log.0.live_rotation_contexts.set(self.log.live_rotation_contexts() - 1);
        self.log.push(Call::RotationDestroyContext);
    }

    fn allocate(&mut self, width: u32, height: u32, stride: u32) -> Result<DeviceBuffer, MockError> {
        let handle = self.log.handle();
        self.log.push(Call::RotationAllocate { width, height, stride });
        Ok(DeviceBuffer {
            handle,
            gtt_offset_in_page: 0x800 + handle,
            size: stride * height * 3 / 2,
        })
    }

    fn release(&mut self, buffer: DeviceBuffer) {
        self.log.push(Call::RotationRelease(buffer.handle));
    }

    fn rotate(
        &mut self,
        _source: &VideoPayload,
        target: &DeviceBuffer,
        transform: Transform,
    ) -> Result<(), MockError> {
        if self.log.0.fail_rotation.get() {
            return Err(MockError("rotation engine hung"));
        }
        self.log.push(Call::Rotate {
            handle: target.handle,
            transform,
        });
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct MockChannel {
    log: CallLog,
}

impl MockChannel {
    pub fn new(log: CallLog) -> Self {
        MockChannel { log }
    }
}

impl RegisterChannel for MockChannel {
    type Error = MockError;

    fn write_read(&self, request: &mut RegisterRequest) -> Result<(), MockError> {
        self.log.push(Call::Register(*request));
        if self.log.0.fail_register.get() {
            return Err(MockError("ioctl failed"));
        }
        Ok(())
    }
}

pub(crate) fn nv12() -> Format {
    Format {
        code: Fourcc::Nv12,
        modifier: Modifier::Linear,
    }
}

pub(crate) fn nv12_payload(width: u32, height: u32) -> VideoPayload {
    VideoPayload::new(
        width,
        height,
        YuvStride {
            luma: width,
            chroma: width,
        },
        nv12(),
    )
}

#[derive(Debug)]
pub(crate) struct MockMapper {
    pub key: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub gtt_offset_in_page: u32,
    pub protected: bool,
    pub pixels: Option<Vec<u8>>,
    pub payload: Option<VideoPayload>,
}

impl MockMapper {
    /// A mapped linear NV12 frame without attached payload
    pub fn nv12(key: u64, width: u32, height: u32) -> Self {
        MockMapper {
            key,
            format: nv12(),
            width,
            height,
            gtt_offset_in_page: 0x2000 + key as u32,
            protected: false,
            pixels: Some(vec![0; (width * height * 3 / 2) as usize]),
            payload: None,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_payload(mut self) -> Self {
        self.payload = Some(nv12_payload(self.width, self.height));
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }
}

impl Buffer for MockMapper {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> Format {
        self.format
    }
}

impl BufferMapper for MockMapper {
    fn key(&self) -> u64 {
        self.key
    }

    fn stride(&self) -> YuvStride {
        YuvStride {
            luma: self.width,
            chroma: self.width,
        }
    }

    fn cpu_address(&self, sub_buffer: SubBuffer) -> Option<NonNull<u8>> {
        match sub_buffer {
            SubBuffer::Pixels => self
                .pixels
                .as_ref()
                .and_then(|pixels| NonNull::new(pixels.as_ptr() as *mut u8)),
            SubBuffer::Metadata => None,
        }
    }

    fn gtt_offset_in_page(&self) -> u32 {
        self.gtt_offset_in_page
    }

    fn is_protected(&self) -> bool {
        self.protected
    }

    fn video_payload(&mut self) -> Option<&mut VideoPayload> {
        self.payload.as_mut()
    }
}
