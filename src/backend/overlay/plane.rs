use tracing::{debug, error, info, info_span, trace, warn};

use crate::backend::allocator::{BackBufferAllocator, BufferMapper, OutputMethod, SubBuffer, VideoPayload};
use crate::utils::{Clock, Monotonic, Transform};

use super::base::{OverlayPlaneBase, RotatedBufferMapper};
use super::registers::{OverlayAddress, OverlayContext, PlaneType, RegisterChannel, RegisterRequest};
use super::rotation::{
    is_linear_nv12, is_rotation_format, RotationBufferProvider, RotationConfig, RotationDevice,
};
use super::{DisplayDevice, DisplayPlane, Error, FlushFlags, PlaneState};

/// Video overlay plane of a display pipe.
///
/// Builds the per-frame [`OverlayContext`] from its back buffers, submits
/// enable/disable transitions to the display driver and keeps rotated copies
/// of video content up to date.
#[derive(Debug)]
pub struct OverlayPlane<A, D, C>
where
    A: BackBufferAllocator,
    D: RotationDevice + Clone,
    C: RegisterChannel,
{
    base: OverlayPlaneBase<A>,
    rotation_device: D,
    rotation_config: RotationConfig,
    rotation: Option<RotationBufferProvider<D>>,
    channel: C,
    context: OverlayContext,
    state: PlaneState,
    clock: Clock<Monotonic>,
    span: tracing::Span,
}

impl<A, D, C> OverlayPlane<A, D, C>
where
    A: BackBufferAllocator,
    D: RotationDevice + Clone,
    C: RegisterChannel,
{
    /// Creates overlay `index` on `device`.
    ///
    /// The plane holds no resources until it is [initialized](DisplayPlane::initialize).
    pub fn new(
        index: u32,
        device: DisplayDevice,
        allocator: A,
        rotation_device: D,
        channel: C,
    ) -> Result<Self, Error> {
        Self::with_rotation_config(
            index,
            device,
            allocator,
            rotation_device,
            channel,
            RotationConfig::default(),
        )
    }

    /// Creates overlay `index` on `device` with a custom rotation buffer configuration
    pub fn with_rotation_config(
        index: u32,
        device: DisplayDevice,
        allocator: A,
        rotation_device: D,
        channel: C,
        rotation_config: RotationConfig,
    ) -> Result<Self, Error> {
        let clock = Clock::new().map_err(Error::Clock)?;
        Ok(OverlayPlane {
            base: OverlayPlaneBase::new(index, device, allocator),
            rotation_device,
            rotation_config,
            rotation: None,
            channel,
            context: OverlayContext::default(),
            state: PlaneState::Deinitialized,
            clock,
            span: info_span!("overlay", index, device = device.id()),
        })
    }

    /// Lifecycle state of the plane
    pub fn state(&self) -> PlaneState {
        self.state
    }

    /// The double-buffering state the plane builds on
    pub fn base(&self) -> &OverlayPlaneBase<A> {
        &self.base
    }

    /// The rotation buffer provider, present while the plane is initialized
    pub fn rotation_provider(&self) -> Option<&RotationBufferProvider<D>> {
        self.rotation.as_ref()
    }

    /// Orientation the content is displayed in
    pub fn transform(&self) -> Transform {
        self.base.transform()
    }

    /// Changes the orientation the content is displayed in
    pub fn set_transform(&mut self, transform: Transform) {
        self.base.set_transform(transform);
    }

    fn ensure_initialized(&self) -> Result<(), Error> {
        if !self.state.is_initialized() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    /// Makes sure a copy of `mapper`'s content in the requested orientation exists.
    ///
    /// The copy is only recomputed if the orientation recorded in the frame's
    /// video payload differs from the orientation of the plane, or if the
    /// rotation buffer it refers to got invalidated. Returns the mapper of the
    /// buffer holding the rotated content.
    pub fn rotated_buffer_ready(
        &mut self,
        mapper: &mut dyn BufferMapper,
    ) -> Result<RotatedBufferMapper, Error> {
        self.ensure_initialized()?;
        let _guard = self.span.enter();

        let format = mapper.format();
        if !is_rotation_format(&format) {
            error!(?format, "Invalid video format");
            return Err(Error::InvalidFormat(format));
        }
        let provider = self.rotation.as_mut().ok_or(Error::NotInitialized)?;
        let transform = self.base.transform();

        let (key, protected) = (mapper.key(), mapper.is_protected());
        let (width, height) = (mapper.width(), mapper.height());
        let stride = mapper.stride().luma;
        let pixels = mapper.cpu_address(SubBuffer::Pixels);

        let mut synthesized: VideoPayload;
        let payload = match mapper.video_payload() {
            Some(payload) => payload,
            None if is_linear_nv12(&format) => {
                let Some(source) = pixels else {
                    error!("failed to get buffer user pointer");
                    return Err(Error::NoCpuAddress);
                };
                synthesized = provider
                    .prepare_buffer_info(width, height, stride, source)
                    .map_err(|err| {
                        error!(?err, "failed to prepare buffer info");
                        err
                    })?;
                &mut synthesized
            }
            None => {
                error!("no payload found");
                return Err(Error::NoPayload);
            }
        };

        if payload.force_output_method == OutputMethod::Gpu {
            error!("Output method is not supported!");
            return Err(Error::UnsupportedOutputMethod(payload.force_output_method));
        }

        let stale = payload.rotated.is_some_and(|info| !provider.is_current(&info));
        if stale {
            debug!("rotation buffer invalidated, rotating again");
        }
        if payload.client_transform != transform || stale {
            payload.hwc_timestamp = Some(self.clock.now().map_err(Error::Clock)?.into());
            payload.layer_transform = transform;
            provider.setup_rotation_buffer(payload, transform).map_err(|err| {
                error!(?err, "failed to setup rotation buffer");
                err
            })?;
        } else {
            trace!(?transform, "orientation unchanged, keeping rotation buffer");
        }

        RotatedBufferMapper::from_payload(key, protected, payload).ok_or(Error::NoRotatedBuffer)
    }
}

impl<A, D, C> DisplayPlane for OverlayPlane<A, D, C>
where
    A: BackBufferAllocator,
    D: RotationDevice + Clone,
    C: RegisterChannel,
{
    type Context = OverlayContext;

    fn initialize(&mut self, buffer_count: usize) -> Result<(), Error> {
        if self.state.is_initialized() {
            self.deinitialize();
        }
        let _guard = self.span.enter();

        if let Err(err) = self.base.initialize(buffer_count) {
            error!(?err, "failed to initialize OverlayPlaneBase");
            return Err(err);
        }

        let mut provider = RotationBufferProvider::new(self.rotation_device.clone(), self.rotation_config);
        if let Err(err) = provider.initialize() {
            error!(?err, "failed to initialize RotationBufferProvider");
            drop(provider);
            self.base.deinitialize();
            return Err(err.into());
        }
        self.rotation = Some(provider);
        self.state = PlaneState::Initialized;

        info!(buffer_count, "overlay plane initialized");
        Ok(())
    }

    fn deinitialize(&mut self) {
        let _guard = self.span.enter();

        // rotation buffers are derived from the back buffers
        if let Some(mut provider) = self.rotation.take() {
            provider.deinitialize();
        }
        self.base.deinitialize();

        if self.state.is_initialized() {
            info!("overlay plane deinitialized");
        }
        self.state = PlaneState::Deinitialized;
    }

    fn flip(&mut self) -> Result<(), Error> {
        self.ensure_initialized()?;
        let back_buffer = self.base.check_flip()?;

        let ovadd = OverlayAddress::from_bits(self.base.pipe_config())
            .with_gtt_offset_in_page(back_buffer.gtt_offset_in_page())
            .with_enabled(true);
        self.context = OverlayContext {
            plane_type: PlaneType::Overlay,
            ovadd,
            index: self.base.index(),
            pipe: self.base.device().id(),
        };

        let _guard = self.span.enter();
        trace!(ovadd = format_args!("{:#x}", ovadd.bits()), "flip");
        Ok(())
    }

    fn flush(&mut self, flags: FlushFlags) -> Result<(), Error> {
        self.ensure_initialized()?;
        let _guard = self.span.enter();
        trace!(?flags, "flush");

        let enable = flags.contains(FlushFlags::ENABLE);
        let disable = flags.contains(FlushFlags::DISABLE);
        if enable == disable {
            return Err(Error::InvalidFlushFlags(flags));
        }

        let back_buffer = self.base.current_back_buffer().ok_or(Error::NoBackBuffers)?;
        let mut request = RegisterRequest {
            plane_enable_mask: enable,
            plane_disable_mask: disable,
            plane_type: PlaneType::Overlay,
            index: self.base.index(),
            ctx: OverlayAddress::from_bits(self.base.pipe_config())
                .with_gtt_offset_in_page(back_buffer.gtt_offset_in_page()),
        };

        if disable {
            debug!(
                "disabling overlay {} on device {}",
                self.base.index(),
                self.base.device().id()
            );
        }

        if let Err(err) = self.channel.write_read(&mut request) {
            warn!(%err, "overlay update failed");
            return Err(Error::Channel(Box::new(err)));
        }

        self.state = if disable {
            PlaneState::Disabled
        } else {
            PlaneState::Enabled
        };
        Ok(())
    }

    fn reset(&mut self) {
        self.base.reset();
        if let Some(provider) = self.rotation.as_mut() {
            provider.reset();
        }
    }

    fn set_data_buffer(&mut self, mapper: &mut dyn BufferMapper) -> Result<(), Error> {
        self.ensure_initialized()?;

        if self.base.transform() != Transform::Normal && is_rotation_format(&mapper.format()) {
            let rotated = self.rotated_buffer_ready(mapper)?;
            self.base.set_data_buffer(&rotated)?;
        } else {
            self.base.set_data_buffer(&*mapper)?;
        }

        if self.base.is_protected_buffer() {
            if let Some(back_buffer) = self.base.current_back_buffer_mut() {
                back_buffer.registers_mut().request_decryption();
            }
        }
        Ok(())
    }

    fn context(&self) -> &OverlayContext {
        &self.context
    }
}

impl<A, D, C> Drop for OverlayPlane<A, D, C>
where
    A: BackBufferAllocator,
    D: RotationDevice + Clone,
    C: RegisterChannel,
{
    fn drop(&mut self) {
        self.deinitialize();
    }
}
