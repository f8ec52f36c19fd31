mod swapchain;

pub use swapchain::{ImageToken, ViewSwapchain};

use crate::session::{ActiveSession, SessionManager, SessionState};
use crate::xr::{
    BlendMode, Fov, Pose, ProjectionLayerView, SpaceHandle, SubmittedLayer, SwapchainDesc,
    SwapchainFormat, ViewPose, XrContext, XrError, XrResult, XrTime,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FrameDriverConfig {
    pub format: SwapchainFormat,
    pub sample_count: u32,
    pub frame_wait_timeout: Duration,
    pub image_wait_timeout: Duration,
}

impl Default for FrameDriverConfig {
    fn default() -> Self {
        Self {
            format: SwapchainFormat::Rgba8,
            sample_count: 1,
            frame_wait_timeout: Duration::from_millis(100),
            image_wait_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub frame_index: u64,
    pub predicted_display_time: XrTime,
    pub predicted_display_period: Duration,
    pub should_render: bool,
    /// Located views in the session reference space; empty on skipped frames.
    pub views: Vec<ViewPose>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub view: usize,
    pub pose: Pose,
    pub fov: Fov,
}

impl From<(usize, ViewPose)> for ProjectionView {
    fn from((view, located): (usize, ViewPose)) -> Self {
        Self {
            view,
            pose: located.pose,
            fov: located.fov,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositionLayer {
    Projection(Vec<ProjectionView>),
    /// Shows the image rendered into `view`'s swapchain on a quad in the reference space.
    Quad {
        view: usize,
        pose: Pose,
        size: [f32; 2],
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSubmission {
    pub layers: Vec<CompositionLayer>,
}

impl FrameSubmission {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single projection layer covering every located view of `frame`.
    pub fn projection(frame: &FrameState) -> Self {
        let views = frame
            .views
            .iter()
            .copied()
            .enumerate()
            .map(ProjectionView::from)
            .collect();
        Self {
            layers: vec![CompositionLayer::Projection(views)],
        }
    }

    pub fn push(&mut self, layer: CompositionLayer) {
        self.layers.push(layer);
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Drives wait/begin/end frame against the runtime and owns the per-view swapchains.
pub struct FrameDriver {
    config: FrameDriverConfig,
    swapchains: Vec<ViewSwapchain>,
    swapchain_generation: u64,
    current: Option<FrameState>,
    released: Vec<bool>,
    frame_index: u64,
    last_display_time: Option<XrTime>,
    skipped_frames: u64,
}

impl FrameDriver {
    pub fn new(config: FrameDriverConfig) -> Self {
        Self {
            config,
            swapchains: Vec::new(),
            swapchain_generation: 0,
            current: None,
            released: Vec::new(),
            frame_index: 0,
            last_display_time: None,
            skipped_frames: 0,
        }
    }

    pub fn in_frame(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_frame(&self) -> Option<&FrameState> {
        self.current.as_ref()
    }

    /// Index of the most recently begun frame; 0 before the first one.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    pub fn swapchains(&self) -> &[ViewSwapchain] {
        &self.swapchains
    }

    pub fn view_count(&self) -> usize {
        self.swapchains.len()
    }

    /// Waits (bounded) for the next frame and begins it.
    ///
    /// `FrameSkipped` means the frame *has* begun but nothing may be rendered;
    /// the caller still owes an `end_frame`, normally with an empty submission.
    pub fn begin_frame(
        &mut self,
        ctx: &mut XrContext,
        session: &SessionManager,
    ) -> XrResult<FrameState> {
        if self.current.is_some() {
            return Err(XrError::FrameOrder("begin_frame while a frame is in progress"));
        }
        let active = running_session(session)?;
        self.ensure_swapchains(ctx, &active)?;

        let timing = ctx
            .runtime_mut()
            .wait_frame(active.handle, self.config.frame_wait_timeout)?;
        ctx.runtime_mut().begin_frame(active.handle)?;

        self.frame_index += 1;
        if let Some(last) = self.last_display_time {
            if timing.predicted_display_time <= last {
                log::warn!(
                    "[frame] predicted display time went backwards: {} <= {}",
                    timing.predicted_display_time.nanos(),
                    last.nanos()
                );
            }
        }
        self.last_display_time = Some(timing.predicted_display_time);

        let mut should_render = timing.should_render && session.state().allows_rendering();
        let mut views = Vec::new();
        if should_render {
            match ctx.runtime_mut().locate_views(
                active.handle,
                active.space,
                timing.predicted_display_time,
            ) {
                Ok(located) if located.len() == self.swapchains.len() => views = located,
                Ok(located) => {
                    log::warn!(
                        "[frame] runtime located {} views for {} swapchains; skipping frame",
                        located.len(),
                        self.swapchains.len()
                    );
                    should_render = false;
                }
                Err(err) => {
                    log::warn!("[frame] locate_views failed; skipping frame: {err}");
                    should_render = false;
                }
            }
        }

        let frame = FrameState {
            frame_index: self.frame_index,
            predicted_display_time: timing.predicted_display_time,
            predicted_display_period: timing.predicted_display_period,
            should_render,
            views,
        };
        self.released = vec![false; self.swapchains.len()];
        self.current = Some(frame.clone());

        if should_render {
            Ok(frame)
        } else {
            self.skipped_frames += 1;
            Err(XrError::FrameSkipped)
        }
    }

    /// Checks out the next image of `view`'s swapchain and waits until it is writable.
    pub fn acquire_image(&mut self, ctx: &mut XrContext, view: usize) -> XrResult<ImageToken> {
        let frame = self
            .current
            .as_ref()
            .ok_or(XrError::FrameOrder("acquire_image outside begin_frame/end_frame"))?;
        if !frame.should_render {
            return Err(XrError::FrameOrder("acquire_image on a skipped frame"));
        }
        let frame_index = frame.frame_index;
        let count = self.swapchains.len();
        let chain = self
            .swapchains
            .get_mut(view)
            .ok_or(XrError::InvalidView { view, count })?;
        if let Some(image) = chain.checked_out {
            return Err(XrError::SwapchainExhausted { view, image });
        }

        let runtime = ctx.runtime_mut();
        let index = runtime.acquire_swapchain_image(chain.handle)?;
        chain.checked_out = Some(index);
        chain.waited = false;
        runtime.wait_swapchain_image(chain.handle, self.config.image_wait_timeout)?;
        chain.waited = true;

        let native_image = chain.images.get(index as usize).copied().unwrap_or_default();
        Ok(ImageToken::new(
            view,
            index,
            native_image,
            chain.handle,
            self.swapchain_generation,
            frame_index,
        ))
    }

    pub fn release_image(&mut self, ctx: &mut XrContext, token: ImageToken) -> XrResult<()> {
        let in_same_frame = self
            .current
            .as_ref()
            .is_some_and(|frame| frame.frame_index == token.frame_index());
        if token.generation() != self.swapchain_generation || !in_same_frame {
            log::warn!(
                "[frame] image {} of view {} released after its frame ended",
                token.image_index(),
                token.view()
            );
            return Ok(());
        }
        let count = self.swapchains.len();
        let chain = self
            .swapchains
            .get_mut(token.view())
            .ok_or(XrError::InvalidView {
                view: token.view(),
                count,
            })?;
        if chain.checked_out != Some(token.image_index()) {
            return Err(XrError::FrameOrder("released image is not checked out"));
        }

        ctx.runtime_mut().release_swapchain_image(chain.handle)?;
        chain.checked_out = None;
        chain.waited = false;
        if let Some(released) = self.released.get_mut(token.view()) {
            *released = true;
        }
        Ok(())
    }

    /// Submits the frame begun by the matching `begin_frame`.
    pub fn end_frame(
        &mut self,
        ctx: &mut XrContext,
        session: &SessionManager,
        submission: FrameSubmission,
    ) -> XrResult<()> {
        let frame = self
            .current
            .take()
            .ok_or(XrError::FrameOrder("end_frame without begin_frame"))?;
        let released = std::mem::take(&mut self.released);
        self.release_outstanding(ctx);

        let Some(active) = session.session().copied() else {
            log::warn!("[frame] session destroyed during frame {}", frame.frame_index);
            return Ok(());
        };

        let layers = if frame.should_render {
            self.build_layers(active.space, &released, submission)
        } else {
            if !submission.is_empty() {
                log::debug!("[frame] dropping layers submitted on skipped frame");
            }
            Vec::new()
        };
        let blend_mode = ctx
            .instance()
            .map_or(BlendMode::Opaque, |instance| instance.blend_mode);
        ctx.runtime_mut()
            .end_frame(active.handle, frame.predicted_display_time, blend_mode, &layers)?;
        Ok(())
    }

    /// Destroys the swapchains of the current session. Must run before the
    /// session itself is destroyed.
    pub fn shutdown(&mut self, ctx: &mut XrContext, session: &SessionManager) {
        if let Some(frame) = self.current.take() {
            log::warn!("[frame] shutting down inside frame {}", frame.frame_index);
            self.release_outstanding(ctx);
        }
        let live = session
            .session()
            .is_some_and(|active| active.generation == self.swapchain_generation);
        for chain in self.swapchains.drain(..) {
            if live {
                ctx.runtime_mut().destroy_swapchain(chain.handle);
            }
        }
        self.released.clear();
    }

    fn ensure_swapchains(&mut self, ctx: &mut XrContext, active: &ActiveSession) -> XrResult<()> {
        if !self.swapchains.is_empty() && self.swapchain_generation == active.generation {
            return Ok(());
        }
        if !self.swapchains.is_empty() {
            log::debug!(
                "[frame] discarding {} swapchains of session {}",
                self.swapchains.len(),
                self.swapchain_generation
            );
            self.swapchains.clear();
        }

        let views = ctx
            .instance()
            .map(|instance| instance.views.clone())
            .ok_or(XrError::NotRunning(SessionState::Uninitialized))?;
        let runtime = ctx.runtime_mut();
        let mut created = Vec::with_capacity(views.len());
        for (view, config_view) in views.iter().enumerate() {
            let desc = SwapchainDesc {
                format: self.config.format,
                width: config_view.recommended_width,
                height: config_view.recommended_height,
                sample_count: self.config.sample_count.max(1),
                array_size: 1,
            };
            match runtime.create_swapchain(active.handle, &desc) {
                Ok(info) => created.push(ViewSwapchain {
                    view,
                    handle: info.handle,
                    format: desc.format,
                    width: desc.width,
                    height: desc.height,
                    sample_count: desc.sample_count,
                    images: info.images,
                    checked_out: None,
                    waited: false,
                }),
                Err(err) => {
                    for chain in created {
                        runtime.destroy_swapchain(chain.handle);
                    }
                    return Err(err.into());
                }
            }
        }

        log::info!(
            "[frame] created {} swapchains ({:?}, {}x{}) for session {}",
            created.len(),
            self.config.format,
            created.first().map_or(0, |chain| chain.width),
            created.first().map_or(0, |chain| chain.height),
            active.generation
        );
        self.swapchains = created;
        self.swapchain_generation = active.generation;
        Ok(())
    }

    fn release_outstanding(&mut self, ctx: &mut XrContext) {
        for chain in &mut self.swapchains {
            let Some(image) = chain.checked_out else {
                continue;
            };
            log::warn!(
                "[frame] view {} image {image} still checked out; releasing",
                chain.view
            );
            let runtime = ctx.runtime_mut();
            if !chain.waited {
                if let Err(err) =
                    runtime.wait_swapchain_image(chain.handle, self.config.image_wait_timeout)
                {
                    log::warn!("[frame] wait before forced release failed: {err}");
                }
            }
            if let Err(err) = runtime.release_swapchain_image(chain.handle) {
                log::warn!("[frame] forced release failed: {err}");
            }
            chain.checked_out = None;
            chain.waited = false;
        }
    }

    fn build_layers(
        &self,
        space: SpaceHandle,
        released: &[bool],
        submission: FrameSubmission,
    ) -> Vec<SubmittedLayer> {
        let rendered = |view: usize| released.get(view).copied().unwrap_or(false);
        let mut layers = Vec::with_capacity(submission.layers.len());
        for layer in submission.layers {
            match layer {
                CompositionLayer::Projection(views) => {
                    let total = views.len();
                    let views: Vec<ProjectionLayerView> = views
                        .into_iter()
                        .filter(|view| rendered(view.view))
                        .filter_map(|view| {
                            let chain = self.swapchains.get(view.view)?;
                            Some(ProjectionLayerView {
                                swapchain: chain.handle,
                                image_rect: chain.image_rect(),
                                image_array_index: 0,
                                pose: view.pose,
                                fov: view.fov,
                            })
                        })
                        .collect();
                    if views.len() < total {
                        log::warn!(
                            "[frame] dropped {} projection views without a released image",
                            total - views.len()
                        );
                    }
                    if !views.is_empty() {
                        layers.push(SubmittedLayer::Projection { space, views });
                    }
                }
                CompositionLayer::Quad { view, pose, size } => {
                    match self.swapchains.get(view).filter(|_| rendered(view)) {
                        Some(chain) => layers.push(SubmittedLayer::Quad {
                            space,
                            swapchain: chain.handle,
                            image_rect: chain.image_rect(),
                            pose,
                            size,
                        }),
                        None => log::warn!("[frame] dropped quad layer for view {view}"),
                    }
                }
            }
        }
        layers
    }
}

fn running_session(session: &SessionManager) -> XrResult<ActiveSession> {
    session
        .session()
        .copied()
        .filter(ActiveSession::is_running)
        .ok_or(XrError::NotRunning(session.state()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::LifecycleSignal;
    use crate::session::SessionConfig;
    use crate::xr::{GraphicsBinding, SimulatedConfig, SimulatedControl, SimulatedRuntime};

    struct Harness {
        ctx: XrContext,
        control: SimulatedControl,
        session: SessionManager,
        frames: FrameDriver,
    }

    fn harness(config: SimulatedConfig) -> Harness {
        let runtime = SimulatedRuntime::new(config);
        let control = runtime.control();
        let mut ctx = XrContext::new(Box::new(runtime));
        let mut session = SessionManager::new(SessionConfig::default());
        session.initialize(&mut ctx).expect("initialize");
        for signal in [
            LifecycleSignal::Resumed,
            LifecycleSignal::WindowInitialized(GraphicsBinding::Headless),
        ] {
            session
                .handle_platform_signal(&mut ctx, &signal)
                .expect("signal");
        }
        session.poll_lifecycle_events(&mut ctx).expect("poll");
        Harness {
            ctx,
            control,
            session,
            frames: FrameDriver::new(FrameDriverConfig::default()),
        }
    }

    fn render_all(h: &mut Harness, frame: &FrameState) {
        for view in 0..frame.views.len() {
            let token = h.frames.acquire_image(&mut h.ctx, view).expect("acquire");
            h.frames.release_image(&mut h.ctx, token).expect("release");
        }
    }

    #[test]
    fn rendered_frame_submits_projection_layer() {
        let mut h = harness(SimulatedConfig::default());
        let frame = h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
        assert_eq!(frame.frame_index, 1);
        assert_eq!(frame.views.len(), 2);
        assert_eq!(h.frames.view_count(), 2);
        assert_eq!(h.frames.swapchains()[0].width, 1440);

        render_all(&mut h, &frame);
        h.frames
            .end_frame(&mut h.ctx, &h.session, FrameSubmission::projection(&frame))
            .expect("end");

        let submitted = h.control.submitted_frames();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].display_time, frame.predicted_display_time);
        match &submitted[0].layers[..] {
            [SubmittedLayer::Projection { views, .. }] => assert_eq!(views.len(), 2),
            other => panic!("unexpected layers {other:?}"),
        }
        assert!(h.control.violations().is_empty());
    }

    #[test]
    fn skipped_frame_still_ends() {
        let mut h = harness(SimulatedConfig::default());
        h.control.script_should_render([false]);

        let err = h.frames.begin_frame(&mut h.ctx, &h.session).unwrap_err();
        assert!(matches!(err, XrError::FrameSkipped));
        assert!(h.frames.in_frame());
        assert!(matches!(
            h.frames.acquire_image(&mut h.ctx, 0),
            Err(XrError::FrameOrder(_))
        ));
        h.frames
            .end_frame(&mut h.ctx, &h.session, FrameSubmission::empty())
            .expect("end");

        assert_eq!(h.control.frame_counts(), (1, 1));
        assert!(h.control.submitted_frames()[0].layers.is_empty());
        assert_eq!(h.frames.skipped_frames(), 1);
    }

    #[test]
    fn second_acquire_on_same_view_is_exhausted() {
        let mut h = harness(SimulatedConfig::default());
        h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
        let token = h.frames.acquire_image(&mut h.ctx, 0).expect("acquire");
        let err = h.frames.acquire_image(&mut h.ctx, 0).unwrap_err();
        assert!(matches!(err, XrError::SwapchainExhausted { view: 0, image: 0 }));

        h.frames.release_image(&mut h.ctx, token).expect("release");
        h.frames
            .end_frame(&mut h.ctx, &h.session, FrameSubmission::empty())
            .expect("end");
        assert!(h.control.violations().is_empty());
    }

    #[test]
    fn out_of_range_view_is_rejected() {
        let mut h = harness(SimulatedConfig::default());
        h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
        assert!(matches!(
            h.frames.acquire_image(&mut h.ctx, 2),
            Err(XrError::InvalidView { view: 2, count: 2 })
        ));
        h.frames
            .end_frame(&mut h.ctx, &h.session, FrameSubmission::empty())
            .expect("end");
    }

    #[test]
    fn unreleased_images_are_returned_and_their_views_dropped() {
        let mut h = harness(SimulatedConfig::default());
        let frame = h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
        let left = h.frames.acquire_image(&mut h.ctx, 0).expect("acquire");
        h.frames.release_image(&mut h.ctx, left).expect("release");
        let right = h.frames.acquire_image(&mut h.ctx, 1).expect("acquire");

        h.frames
            .end_frame(&mut h.ctx, &h.session, FrameSubmission::projection(&frame))
            .expect("end");
        assert!(h.control.violations().is_empty());
        match &h.control.submitted_frames()[0].layers[..] {
            [SubmittedLayer::Projection { views, .. }] => assert_eq!(views.len(), 1),
            other => panic!("unexpected layers {other:?}"),
        }

        h.frames.release_image(&mut h.ctx, right).expect("late release");
        assert!(h.control.violations().is_empty());
    }

    #[test]
    fn begin_twice_is_a_protocol_error() {
        let mut h = harness(SimulatedConfig::default());
        h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
        assert!(matches!(
            h.frames.begin_frame(&mut h.ctx, &h.session),
            Err(XrError::FrameOrder(_))
        ));
        assert!(matches!(
            FrameDriver::new(FrameDriverConfig::default()).end_frame(
                &mut h.ctx,
                &h.session,
                FrameSubmission::empty()
            ),
            Err(XrError::FrameOrder(_))
        ));
    }

    #[test]
    fn frame_wait_timeout_leaves_no_frame_open() {
        let mut h = harness(SimulatedConfig::default());
        h.control.fail_next_frame_waits(1);
        let err = h.frames.begin_frame(&mut h.ctx, &h.session).unwrap_err();
        assert!(!err.is_fatal());
        assert!(!h.frames.in_frame());
        h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
    }

    #[test]
    fn frames_require_running_session() {
        let mut h = harness(SimulatedConfig::default());
        let idle = SessionManager::new(SessionConfig::default());
        assert!(matches!(
            h.frames.begin_frame(&mut h.ctx, &idle),
            Err(XrError::NotRunning(SessionState::Uninitialized))
        ));
    }

    #[test]
    fn display_times_increase() {
        let mut h = harness(SimulatedConfig::default());
        let mut last = XrTime(0);
        for _ in 0..5 {
            let frame = h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
            assert!(frame.predicted_display_time > last);
            last = frame.predicted_display_time;
            h.frames
                .end_frame(&mut h.ctx, &h.session, FrameSubmission::empty())
                .expect("end");
        }
    }

    #[test]
    fn shutdown_destroys_live_swapchains() {
        let mut h = harness(SimulatedConfig::default());
        h.frames.begin_frame(&mut h.ctx, &h.session).expect("begin");
        h.frames
            .end_frame(&mut h.ctx, &h.session, FrameSubmission::empty())
            .expect("end");
        h.frames.shutdown(&mut h.ctx, &h.session);
        let destroyed = h
            .control
            .calls()
            .iter()
            .filter(|call| **call == "destroy_swapchain")
            .count();
        assert_eq!(destroyed, 2);
        assert!(h.frames.swapchains().is_empty());
    }
}
