use crate::config::AppConfig;
use crate::frame::{CompositionLayer, FrameDriver, FrameState, FrameSubmission};
use crate::input::{ActionMapper, SyncOutcome};
use crate::platform::{ExitReason, LifecycleSender, PlatformBridge};
use crate::render::{FrameInputs, LayerRenderer};
use crate::session::{SessionManager, Transition};
use crate::xr::{Severity, SimulatedRuntime, XrContext, XrError, XrResult, XrRuntime};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_FRAMES: u32 = 3;
const TRANSITION_HISTORY: usize = 256;

/// What to do when a caller breaks the frame or action contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractPolicy {
    Panic,
    SkipFrame,
}

impl Default for ContractPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ContractPolicy::Panic
        } else {
            ContractPolicy::SkipFrame
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No running session; only lifecycle events were processed.
    Idle,
    Rendered { views: usize },
    /// The runtime asked for no rendering; an empty frame was submitted.
    Skipped,
    /// A recoverable error cut the frame short.
    Dropped,
    Exit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub iterations: u64,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
    pub idle_iterations: u64,
    pub transitions: u64,
    pub contract_violations: u64,
    pub average_frame_time: f32,
    pub last_sync: Option<SyncOutcome>,
}

/// Returns the loader-backed runtime when it is compiled in, otherwise the simulated one.
pub fn build_runtime() -> Box<dyn XrRuntime> {
    #[cfg(all(feature = "vr-openxr", target_os = "android"))]
    {
        Box::new(crate::xr::openxr::OpenXrRuntime::new())
    }
    #[cfg(not(all(feature = "vr-openxr", target_os = "android")))]
    {
        Box::new(SimulatedRuntime::default())
    }
}

/// Owns every lifecycle component and runs them in a fixed order each frame.
pub struct XrApp {
    config: AppConfig,
    ctx: XrContext,
    platform: PlatformBridge,
    sender: LifecycleSender,
    session: SessionManager,
    frames: FrameDriver,
    actions: ActionMapper,
    renderer: Box<dyn LayerRenderer>,
    stats: FrameStats,
    history: VecDeque<Transition>,
    started: bool,
    last_frame: Option<Instant>,
    elapsed_seconds: f32,
}

impl XrApp {
    pub fn new(
        config: AppConfig,
        runtime: Box<dyn XrRuntime>,
        renderer: Box<dyn LayerRenderer>,
    ) -> XrResult<Self> {
        config.validate()?;
        let actions = config.action_mapper()?;
        let (platform, sender) = PlatformBridge::new();
        Ok(Self {
            session: SessionManager::new(config.session_config()),
            frames: FrameDriver::new(config.frame_config()),
            ctx: XrContext::new(runtime),
            platform,
            sender,
            actions,
            renderer,
            config,
            stats: FrameStats::default(),
            history: VecDeque::with_capacity(TRANSITION_HISTORY),
            started: false,
            last_frame: None,
            elapsed_seconds: 0.0,
        })
    }

    pub fn from_config(config: AppConfig) -> XrResult<Self> {
        let renderer = config.render.build();
        Self::new(config, build_runtime(), renderer)
    }

    /// Handle for the OS callback thread.
    pub fn lifecycle_sender(&self) -> LifecycleSender {
        self.sender.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn context(&self) -> &XrContext {
        &self.ctx
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn frames(&self) -> &FrameDriver {
        &self.frames
    }

    pub fn actions(&self) -> &ActionMapper {
        &self.actions
    }

    pub fn platform(&self) -> &PlatformBridge {
        &self.platform
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn renderer_label(&self) -> &'static str {
        self.renderer.label()
    }

    /// Most recent state transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.platform.exit_reason()
    }

    /// Creates the XR instance. Fatal failures are recorded as the exit reason.
    pub fn start(&mut self) -> XrResult<()> {
        if self.started {
            return Ok(());
        }
        if let Err(err) = self.session.initialize(&mut self.ctx) {
            self.platform.report_fatal(&err);
            return Err(err);
        }
        self.started = true;
        log::info!(
            "[app] started on {} with {}",
            self.ctx.runtime_label(),
            self.renderer.label()
        );
        Ok(())
    }

    /// One pass of the loop: platform signals, lifecycle events, then at most one frame.
    /// Only fatal errors are returned.
    pub fn run_frame(&mut self) -> XrResult<FrameOutcome> {
        self.start()?;
        self.stats.iterations += 1;
        match self.step() {
            Err(err) => {
                self.platform.report_fatal(&err);
                Err(err)
            }
            ok => ok,
        }
    }

    /// Runs until the application should exit or `max_frames` iterations pass.
    /// Returns the exit reason, or `None` when the budget ran out first.
    pub fn run(&mut self, max_frames: u32) -> XrResult<Option<ExitReason>> {
        let idle_wait = Duration::from_millis(self.config.frame.idle_poll_ms);
        for _ in 0..max_frames.max(1) {
            match self.run_frame()? {
                FrameOutcome::Exit => {
                    return Ok(self.platform.exit_reason().cloned());
                }
                FrameOutcome::Idle if !idle_wait.is_zero() => std::thread::sleep(idle_wait),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Tears down swapchains, the session, then the instance. Idempotent.
    pub fn shutdown(&mut self) {
        if self.frames.in_frame() || !self.frames.swapchains().is_empty() {
            self.frames.shutdown(&mut self.ctx, &self.session);
        }
        let transitions = self.session.shutdown(&mut self.ctx);
        self.record(transitions);
        if self.started {
            log::info!(
                "[app] shut down after {} frames ({} rendered, {} skipped)",
                self.stats.iterations,
                self.stats.frames_rendered,
                self.stats.frames_skipped
            );
            self.started = false;
        }
    }

    fn step(&mut self) -> XrResult<FrameOutcome> {
        for signal in self.platform.drain() {
            let transitions = self.session.handle_platform_signal(&mut self.ctx, &signal)?;
            self.record(transitions);
        }

        let transitions = self.session.poll_lifecycle_events(&mut self.ctx)?;
        self.record(transitions);
        self.actions.track_generation(self.session.generation());
        if self.session.take_interaction_profile_changed() {
            self.actions.interaction_profile_changed();
        }

        if self.session.should_exit() {
            if let Some(reason) = self.session.exit_reason().cloned() {
                self.platform.record_exit(reason);
            }
            if !self.frames.swapchains().is_empty() {
                self.frames.shutdown(&mut self.ctx, &self.session);
            }
            return Ok(FrameOutcome::Exit);
        }
        if !self.session.is_running() {
            self.stats.idle_iterations += 1;
            return Ok(FrameOutcome::Idle);
        }

        match self.frames.begin_frame(&mut self.ctx, &self.session) {
            Ok(frame) => self.render_frame(frame),
            Err(XrError::FrameSkipped) => self.skip_frame(),
            Err(err) => {
                self.absorb(err)?;
                self.stats.frames_dropped += 1;
                Ok(FrameOutcome::Dropped)
            }
        }
    }

    fn render_frame(&mut self, frame: FrameState) -> XrResult<FrameOutcome> {
        let delta_seconds = self.tick(frame.predicted_display_period);
        let mut fatal = None;
        let mut poisoned = false;

        match self
            .actions
            .sync_actions(&mut self.ctx, &self.session, &self.frames)
        {
            Ok(outcome) => self.stats.last_sync = Some(outcome),
            // Stale input does not invalidate the frame's content.
            Err(err) => {
                self.absorb_into(err, &mut fatal);
            }
        }

        let inputs = FrameInputs {
            frame_index: frame.frame_index,
            delta_seconds,
            elapsed_seconds: self.elapsed_seconds,
            display_time: frame.predicted_display_time,
        };
        let mut failed = Vec::new();
        for (view, pose) in frame.views.iter().enumerate() {
            if fatal.is_some() || poisoned {
                break;
            }
            let token = match self.frames.acquire_image(&mut self.ctx, view) {
                Ok(token) => token,
                Err(err) => {
                    poisoned |= self.absorb_into(err, &mut fatal);
                    failed.push(view);
                    continue;
                }
            };
            if let Err(err) = self.renderer.render_view(view, &token, pose, &inputs) {
                log::warn!("[app] {} failed on view {view}: {err}", self.renderer.label());
                failed.push(view);
            }
            if let Err(err) = self.frames.release_image(&mut self.ctx, token) {
                poisoned |= self.absorb_into(err, &mut fatal);
                failed.push(view);
            }
        }

        failed.dedup();

        let submission = if poisoned || fatal.is_some() {
            FrameSubmission::empty()
        } else {
            without_views(self.renderer.compose(&frame), &failed)
        };
        if let Err(err) = self
            .frames
            .end_frame(&mut self.ctx, &self.session, submission)
        {
            poisoned |= self.absorb_into(err, &mut fatal);
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        if poisoned {
            self.stats.frames_dropped += 1;
            return Ok(FrameOutcome::Dropped);
        }
        self.stats.frames_rendered += 1;
        Ok(FrameOutcome::Rendered {
            views: frame.views.len().saturating_sub(failed.len()),
        })
    }

    fn skip_frame(&mut self) -> XrResult<FrameOutcome> {
        let period = self
            .frames
            .current_frame()
            .map_or(Duration::ZERO, |frame| frame.predicted_display_period);
        self.tick(period);
        let mut fatal = None;
        match self
            .actions
            .sync_actions(&mut self.ctx, &self.session, &self.frames)
        {
            Ok(outcome) => self.stats.last_sync = Some(outcome),
            Err(err) => {
                self.absorb_into(err, &mut fatal);
            }
        }
        if let Err(err) =
            self.frames
                .end_frame(&mut self.ctx, &self.session, FrameSubmission::empty())
        {
            self.absorb_into(err, &mut fatal);
        }
        if let Some(err) = fatal {
            return Err(err);
        }
        self.stats.frames_skipped += 1;
        Ok(FrameOutcome::Skipped)
    }

    /// Applies the error policy; returns `Err` only for fatal errors.
    fn absorb(&mut self, err: XrError) -> XrResult<()> {
        let mut fatal = None;
        self.absorb_into(err, &mut fatal);
        fatal.map_or(Ok(()), Err)
    }

    /// Returns `true` when the error invalidates the current frame's content.
    fn absorb_into(&mut self, err: XrError, fatal: &mut Option<XrError>) -> bool {
        match err.severity() {
            Severity::Fatal => {
                fatal.get_or_insert(err);
                true
            }
            Severity::Recoverable => {
                log::warn!("[app] {err}; session will be re-created");
                self.session.mark_session_lost();
                true
            }
            Severity::Expected => false,
            Severity::Transient => {
                log::warn!("[app] {err}; retrying next frame");
                true
            }
            Severity::ContractViolation => {
                self.stats.contract_violations += 1;
                match self.config.contract_policy {
                    ContractPolicy::Panic => panic!("XR contract violation: {err}"),
                    ContractPolicy::SkipFrame => {
                        log::error!("[app] contract violation, skipping frame content: {err}");
                        true
                    }
                }
            }
        }
    }

    fn tick(&mut self, predicted_period: Duration) -> f32 {
        let now = Instant::now();
        let raw = self
            .last_frame
            .map_or(0.0, |last| now.duration_since(last).as_secs_f32());
        self.last_frame = Some(now);
        let delta = if raw == 0.0 {
            predicted_period.as_secs_f32()
        } else {
            raw
        };
        self.elapsed_seconds += delta;

        let frames = (self.stats.frames_rendered + self.stats.frames_skipped + 1) as f32;
        self.stats.average_frame_time += (delta - self.stats.average_frame_time) / frames;
        delta
    }

    fn record(&mut self, transitions: Vec<Transition>) {
        self.stats.transitions += transitions.len() as u64;
        for transition in transitions {
            if self.history.len() == TRANSITION_HISTORY {
                self.history.pop_front();
            }
            self.history.push_back(transition);
        }
    }
}

impl Drop for XrApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn without_views(mut submission: FrameSubmission, failed: &[usize]) -> FrameSubmission {
    if failed.is_empty() {
        return submission;
    }
    submission.layers.retain_mut(|layer| match layer {
        CompositionLayer::Projection(views) => {
            views.retain(|view| !failed.contains(&view.view));
            !views.is_empty()
        }
        CompositionLayer::Quad { view, .. } => !failed.contains(view),
    });
    submission
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::LifecycleSignal;
    use crate::render::NullLayerRenderer;
    use crate::session::SessionState;
    use crate::xr::{GraphicsBinding, SimulatedConfig, SimulatedControl};

    fn app_with(sim: SimulatedConfig) -> (XrApp, SimulatedControl) {
        let runtime = SimulatedRuntime::new(sim);
        let control = runtime.control();
        let mut config = AppConfig::default();
        config.contract_policy = ContractPolicy::SkipFrame;
        config.frame.idle_poll_ms = 0;
        let app = XrApp::new(
            config,
            Box::new(runtime),
            Box::new(NullLayerRenderer::default()),
        )
        .expect("app");
        (app, control)
    }

    fn foreground(app: &XrApp) {
        let sender = app.lifecycle_sender();
        sender.send(LifecycleSignal::Created);
        sender.send(LifecycleSignal::Resumed);
        sender.send(LifecycleSignal::WindowInitialized(GraphicsBinding::Headless));
    }

    #[test]
    fn idle_until_platform_delivers_a_window() {
        let (mut app, control) = app_with(SimulatedConfig::default());
        assert_eq!(app.run_frame().expect("frame"), FrameOutcome::Idle);
        assert!(control.active_session().is_none());

        foreground(&app);
        assert_eq!(
            app.run_frame().expect("frame"),
            FrameOutcome::Rendered { views: 2 }
        );
        assert_eq!(app.session().state(), SessionState::Focused);
        assert_eq!(app.stats().last_sync, Some(SyncOutcome::Sampled));
    }

    #[test]
    fn run_stops_at_frame_budget() {
        let (mut app, control) = app_with(SimulatedConfig::default());
        foreground(&app);
        assert_eq!(app.run(DEFAULT_MAX_FRAMES).expect("run"), None);
        assert_eq!(app.stats().frames_rendered, u64::from(DEFAULT_MAX_FRAMES));
        assert_eq!(control.frame_counts(), (3, 3));
        assert!(control.violations().is_empty());
    }

    #[test]
    fn destroy_signal_exits_at_frame_boundary() {
        let (mut app, control) = app_with(SimulatedConfig::default());
        foreground(&app);
        app.run_frame().expect("frame");

        app.lifecycle_sender().send(LifecycleSignal::Destroyed);
        let reason = app.run(10).expect("run");
        assert_eq!(reason, Some(ExitReason::Requested));
        assert!(control.active_session().is_none());
        assert!(control.violations().is_empty());
        let (begins, ends) = control.frame_counts();
        assert_eq!(begins, ends);
    }

    #[test]
    fn missing_loader_records_unsupported_device() {
        let (mut app, _control) = app_with(SimulatedConfig {
            loader_present: false,
            ..Default::default()
        });
        let err = app.run_frame().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            app.exit_reason(),
            Some(ExitReason::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn transient_frame_wait_failure_drops_one_frame() {
        let (mut app, control) = app_with(SimulatedConfig::default());
        foreground(&app);
        app.run_frame().expect("frame");
        control.fail_next_frame_waits(1);
        assert_eq!(app.run_frame().expect("frame"), FrameOutcome::Dropped);
        assert_eq!(
            app.run_frame().expect("frame"),
            FrameOutcome::Rendered { views: 2 }
        );
    }

    #[test]
    fn shutdown_is_idempotent_and_clean() {
        let (mut app, control) = app_with(SimulatedConfig::default());
        foreground(&app);
        app.run(2).expect("run");
        app.shutdown();
        app.shutdown();
        assert!(!control.instance_alive());
        assert!(control.violations().is_empty());
        assert!(app.transitions().all(Transition::is_valid));
    }

    #[test]
    fn failed_views_are_removed_from_submission() {
        let submission = FrameSubmission {
            layers: vec![CompositionLayer::Projection(vec![
                crate::frame::ProjectionView {
                    view: 0,
                    pose: Default::default(),
                    fov: Default::default(),
                },
                crate::frame::ProjectionView {
                    view: 1,
                    pose: Default::default(),
                    fov: Default::default(),
                },
            ])],
        };
        let filtered = without_views(submission, &[1]);
        match &filtered.layers[..] {
            [CompositionLayer::Projection(views)] => assert_eq!(views.len(), 1),
            other => panic!("unexpected layers {other:?}"),
        }
    }
}
