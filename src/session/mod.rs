mod state;

pub use state::{SessionState, Transition, TransitionCause};

use crate::platform::{ExitReason, LifecycleSignal, TargetAbi};
use crate::xr::{
    AppInfo, BlendMode, GraphicsBinding, InstanceDesc, OverlayPlacement, ReferenceSpaceKind,
    RuntimeError, RuntimeEvent, SessionHandle, SpaceHandle, ViewConfigurationKind, XrContext,
    XrError, XrResult, XrTime,
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub app: AppInfo,
    pub view_configuration: ViewConfigurationKind,
    pub reference_space: ReferenceSpaceKind,
    /// Placement requested through `XR_EXTX_overlay`; `None` creates a regular session.
    pub overlay: Option<OverlayPlacement>,
    pub overlay_required: bool,
    pub blend_preference: Vec<BlendMode>,
    pub max_events_per_poll: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app: AppInfo {
                application_name: "XR Overlay".into(),
                application_version: 1,
                engine_name: "xr_overlay".into(),
                engine_version: 1,
            },
            view_configuration: ViewConfigurationKind::PrimaryStereo,
            reference_space: ReferenceSpaceKind::Local,
            overlay: None,
            overlay_required: false,
            blend_preference: vec![BlendMode::Opaque],
            max_events_per_poll: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSession {
    pub handle: SessionHandle,
    pub space: SpaceHandle,
    pub generation: u64,
    running: bool,
}

impl ActiveSession {
    /// `begin_session` succeeded and `end_session` has not been called yet.
    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Owns the session state machine. Every state change comes from a runtime
/// event; the manager only reacts (begin, end, destroy, re-create).
pub struct SessionManager {
    config: SessionConfig,
    state: SessionState,
    session: Option<ActiveSession>,
    generation: u64,
    resumed: bool,
    binding: Option<GraphicsBinding>,
    begin_deferred: bool,
    suspending: bool,
    lost: bool,
    exit_requested: bool,
    exit_reason: Option<ExitReason>,
    profile_changed: bool,
    rejected_transitions: u64,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            session: None,
            generation: 0,
            resumed: false,
            binding: None,
            begin_deferred: false,
            suspending: false,
            lost: false,
            exit_requested: false,
            exit_reason: None,
            profile_changed: false,
            rejected_transitions: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    /// Generation of the current (or most recent) session; 0 before the first one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some_and(|session| session.running)
    }

    /// True only while the running session holds input focus.
    pub fn is_focused(&self) -> bool {
        self.is_running() && self.state == SessionState::Focused
    }

    pub fn is_foreground(&self) -> bool {
        self.resumed && self.binding.is_some()
    }

    pub fn should_exit(&self) -> bool {
        self.exit_requested && self.session.is_none()
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.exit_reason.as_ref()
    }

    pub fn rejected_transitions(&self) -> u64 {
        self.rejected_transitions
    }

    pub fn take_interaction_profile_changed(&mut self) -> bool {
        std::mem::take(&mut self.profile_changed)
    }

    /// Creates the instance against the loader and records what the system offers.
    pub fn initialize(&mut self, ctx: &mut XrContext) -> XrResult<()> {
        if ctx.has_instance() {
            return Ok(());
        }
        if let Some(reason) = TargetAbi::loader_restriction() {
            log::error!("[session] {reason}");
            return Err(XrError::RuntimeUnavailable(reason));
        }

        let desc = InstanceDesc {
            app: self.config.app.clone(),
            view_configuration: self.config.view_configuration,
            request_overlay: self.config.overlay.is_some(),
        };
        let mut info = ctx.runtime_mut().create_instance(&desc).map_err(|err| {
            log::error!("[session] failed to create instance: {err}");
            match XrError::from(err) {
                XrError::Runtime(other) => XrError::RuntimeUnavailable(other.to_string()),
                mapped => mapped,
            }
        })?;

        if self.config.overlay_required && !info.overlay_enabled {
            ctx.runtime_mut().destroy_instance();
            log::error!("[session] XR_EXTX_overlay is not supported by the runtime");
            return Err(XrError::RuntimeUnavailable(
                "required extension XR_EXTX_overlay not supported".into(),
            ));
        }
        if info.views.is_empty() {
            ctx.runtime_mut().destroy_instance();
            return Err(XrError::RuntimeUnavailable(
                "system exposes no views for the configured view configuration".into(),
            ));
        }

        info.blend_mode = BlendMode::select(&self.config.blend_preference, &info.blend_modes);
        if !self.config.blend_preference.contains(&info.blend_mode) {
            log::warn!(
                "[session] none of the preferred blend modes are supported; using {:?}",
                info.blend_mode
            );
        }
        log::info!(
            "[session] instance created on {} ({}, {} views, blend {:?}, overlay {})",
            info.runtime_name,
            info.system_name,
            info.views.len(),
            info.blend_mode,
            info.overlay_enabled
        );
        ctx.set_instance(info);

        if let Err(err) = self.ensure_session(ctx) {
            if err.is_fatal() {
                return Err(err);
            }
            log::warn!("[session] session creation deferred: {err}");
        }
        Ok(())
    }

    /// Drains pending runtime events without blocking and advances the state
    /// machine. Returns the transitions observed during this call.
    pub fn poll_lifecycle_events(&mut self, ctx: &mut XrContext) -> XrResult<Vec<Transition>> {
        let mut transitions = Vec::new();
        if !ctx.has_instance() {
            return Ok(transitions);
        }

        if std::mem::take(&mut self.lost) {
            log::warn!("[session] session lost; re-creating");
            self.teardown_session(ctx, &mut transitions);
        }
        self.create_session_logged(ctx)?;
        self.retry_pending_calls(ctx, &mut transitions)?;

        for _ in 0..self.config.max_events_per_poll {
            let event = match ctx.runtime_mut().poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(RuntimeError::InstanceLost) => {
                    return Err(XrError::InstanceLost("event poll reported instance loss".into()));
                }
                Err(err) => {
                    log::warn!("[session] event poll failed, retrying next frame: {err}");
                    break;
                }
            };
            self.handle_event(ctx, event, &mut transitions)?;
        }

        Ok(transitions)
    }

    /// Applies one platform lifecycle signal drained at the top of the frame loop.
    pub fn handle_platform_signal(
        &mut self,
        ctx: &mut XrContext,
        signal: &LifecycleSignal,
    ) -> XrResult<Vec<Transition>> {
        let mut transitions = Vec::new();
        match signal {
            LifecycleSignal::Created => {
                log::debug!("[session] platform created");
            }
            LifecycleSignal::Resumed => {
                self.resumed = true;
                self.create_session_logged(ctx)?;
                self.retry_pending_calls(ctx, &mut transitions)?;
            }
            LifecycleSignal::WindowInitialized(binding) => {
                self.binding = Some(*binding);
                self.create_session_logged(ctx)?;
                self.retry_pending_calls(ctx, &mut transitions)?;
            }
            LifecycleSignal::Paused => {
                self.resumed = false;
                self.leave_foreground(ctx);
            }
            LifecycleSignal::WindowTerminated => {
                self.binding = None;
                self.leave_foreground(ctx);
            }
            LifecycleSignal::Destroyed => {
                self.exit_requested = true;
                self.exit_reason.get_or_insert(ExitReason::Requested);
                if self.is_running() {
                    self.leave_foreground(ctx);
                } else {
                    self.teardown_session(ctx, &mut transitions);
                }
            }
        }
        Ok(transitions)
    }

    /// Flags the current session as lost after a runtime call reported it.
    /// The session is torn down and re-created on the next poll.
    pub fn mark_session_lost(&mut self) {
        if self.session.is_some() {
            self.lost = true;
        }
    }

    /// Tears down the session, then the instance. Safe to call repeatedly.
    pub fn shutdown(&mut self, ctx: &mut XrContext) -> Vec<Transition> {
        let mut transitions = Vec::new();
        if let Some(active) = self.session {
            if active.running && self.state == SessionState::Stopping {
                if let Err(err) = ctx.runtime_mut().end_session(active.handle) {
                    log::debug!("[session] end_session during shutdown failed: {err}");
                }
            } else if active.running {
                log::debug!(
                    "[session] destroying running session in state {}",
                    self.state.label()
                );
            }
        }
        self.teardown_session(ctx, &mut transitions);

        if ctx.take_instance().is_some() {
            ctx.runtime_mut().destroy_instance();
            log::info!("[session] instance destroyed");
        }
        self.exit_requested = true;
        self.exit_reason.get_or_insert(ExitReason::Requested);
        transitions
    }

    fn handle_event(
        &mut self,
        ctx: &mut XrContext,
        event: RuntimeEvent,
        transitions: &mut Vec<Transition>,
    ) -> XrResult<()> {
        match event {
            RuntimeEvent::SessionStateChanged {
                session,
                state,
                time,
            } => {
                let current = self.session.map(|active| active.handle);
                if current != Some(session) {
                    log::debug!(
                        "[session] ignoring {} for stale session {}",
                        state.label(),
                        session.0
                    );
                    return Ok(());
                }
                if !self.state.accepts_runtime_transition(state) {
                    self.rejected_transitions += 1;
                    let err = XrError::InvalidTransition {
                        from: self.state,
                        to: state,
                    };
                    log::warn!("[session] {err}; keeping {}", self.state.label());
                    return Ok(());
                }
                self.apply_runtime_state(ctx, state, time, transitions)
            }
            RuntimeEvent::InstanceLossPending { loss_time } => {
                log::error!("[session] instance loss pending at {}ns", loss_time.nanos());
                self.teardown_session(ctx, transitions);
                Err(XrError::InstanceLost(format!(
                    "runtime announced instance loss at {}ns",
                    loss_time.nanos()
                )))
            }
            RuntimeEvent::InteractionProfileChanged { session } => {
                if self.session.map(|active| active.handle) == Some(session) {
                    log::info!("[session] interaction profile changed");
                    self.profile_changed = true;
                }
                Ok(())
            }
            RuntimeEvent::ReferenceSpaceChangePending { kind, .. } => {
                log::info!("[session] reference space {kind:?} change pending");
                Ok(())
            }
            RuntimeEvent::EventsLost { count } => {
                log::warn!("[session] runtime dropped {count} events");
                Ok(())
            }
        }
    }

    fn apply_runtime_state(
        &mut self,
        ctx: &mut XrContext,
        to: SessionState,
        time: XrTime,
        transitions: &mut Vec<Transition>,
    ) -> XrResult<()> {
        let from = self.state;
        self.state = to;
        transitions.push(Transition {
            from,
            to,
            cause: TransitionCause::Runtime,
            generation: self.generation,
            time: Some(time),
        });
        log::info!("[session] {} -> {}", from.label(), to.label());

        match to {
            SessionState::Ready => self.begin(ctx, transitions),
            SessionState::Stopping => self.end(ctx, transitions),
            SessionState::Exiting => {
                let suspended = std::mem::take(&mut self.suspending);
                self.teardown_session(ctx, transitions);
                if suspended && !self.exit_requested {
                    log::info!("[session] session ended while in background");
                } else {
                    self.exit_requested = true;
                    self.exit_reason.get_or_insert(ExitReason::RuntimeExit);
                }
                Ok(())
            }
            SessionState::LossPending => {
                self.teardown_session(ctx, transitions);
                self.create_session_logged(ctx)
            }
            _ => Ok(()),
        }
    }

    fn begin(&mut self, ctx: &mut XrContext, transitions: &mut Vec<Transition>) -> XrResult<()> {
        let Some(active) = self.session.as_mut() else {
            return Ok(());
        };
        if active.running || self.exit_requested {
            return Ok(());
        }
        if !(self.resumed && self.binding.is_some()) {
            log::info!("[session] ready while in background; deferring begin");
            self.begin_deferred = true;
            return Ok(());
        }

        match ctx
            .runtime_mut()
            .begin_session(active.handle, self.config.view_configuration)
        {
            Ok(()) => {
                active.running = true;
                self.begin_deferred = false;
                log::info!("[session] session {} running", active.generation);
                Ok(())
            }
            Err(RuntimeError::SessionLost) => {
                self.handle_lost_call(ctx, transitions);
                Ok(())
            }
            Err(RuntimeError::InstanceLost) => {
                Err(XrError::InstanceLost("begin_session reported instance loss".into()))
            }
            Err(err) => {
                log::warn!("[session] begin_session failed, retrying: {err}");
                self.begin_deferred = true;
                Ok(())
            }
        }
    }

    fn end(&mut self, ctx: &mut XrContext, transitions: &mut Vec<Transition>) -> XrResult<()> {
        let Some(active) = self.session.as_mut() else {
            return Ok(());
        };
        if !active.running {
            return Ok(());
        }
        match ctx.runtime_mut().end_session(active.handle) {
            Ok(()) => {
                active.running = false;
                log::info!("[session] session {} ended", active.generation);
                Ok(())
            }
            Err(RuntimeError::SessionLost) => {
                self.handle_lost_call(ctx, transitions);
                Ok(())
            }
            Err(RuntimeError::InstanceLost) => {
                Err(XrError::InstanceLost("end_session reported instance loss".into()))
            }
            Err(err) => {
                log::warn!("[session] end_session failed, retrying next poll: {err}");
                Ok(())
            }
        }
    }

    fn retry_pending_calls(
        &mut self,
        ctx: &mut XrContext,
        transitions: &mut Vec<Transition>,
    ) -> XrResult<()> {
        match self.state {
            SessionState::Ready if self.begin_deferred => self.begin(ctx, transitions),
            SessionState::Stopping if self.is_running() => self.end(ctx, transitions),
            _ => Ok(()),
        }
    }

    fn leave_foreground(&mut self, ctx: &mut XrContext) {
        let Some(active) = self.session else {
            return;
        };
        if !active.running || self.state == SessionState::Stopping {
            return;
        }
        match ctx.runtime_mut().request_exit_session(active.handle) {
            Ok(()) => {
                if !self.exit_requested {
                    self.suspending = true;
                }
                log::info!(
                    "[session] requested exit of session {} from {}",
                    active.generation,
                    self.state.label()
                );
            }
            Err(RuntimeError::SessionLost) => self.mark_session_lost(),
            Err(err) => log::warn!("[session] request_exit_session failed: {err}"),
        }
    }

    fn handle_lost_call(&mut self, ctx: &mut XrContext, transitions: &mut Vec<Transition>) {
        log::warn!("[session] runtime call reported session loss");
        self.teardown_session(ctx, transitions);
        if let Err(err) = self.ensure_session(ctx) {
            log::warn!("[session] session re-creation deferred: {err}");
        }
    }

    fn create_session_logged(&mut self, ctx: &mut XrContext) -> XrResult<()> {
        match self.ensure_session(ctx) {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                log::warn!("[session] session creation deferred: {err}");
                Ok(())
            }
        }
    }

    fn ensure_session(&mut self, ctx: &mut XrContext) -> XrResult<()> {
        if self.session.is_some() || self.exit_requested || !self.resumed {
            return Ok(());
        }
        let Some(binding) = self.binding else {
            return Ok(());
        };
        let Some(instance) = ctx.instance() else {
            return Ok(());
        };
        let overlay = self.config.overlay.filter(|_| instance.overlay_enabled);

        let runtime = ctx.runtime_mut();
        let handle = runtime.create_session(&binding, overlay)?;
        let space = match runtime.create_reference_space(handle, self.config.reference_space) {
            Ok(space) => space,
            Err(err) => {
                runtime.destroy_session(handle);
                return Err(err.into());
            }
        };

        self.generation += 1;
        self.session = Some(ActiveSession {
            handle,
            space,
            generation: self.generation,
            running: false,
        });
        log::info!(
            "[session] created session {} ({:?} space{})",
            self.generation,
            self.config.reference_space,
            if overlay.is_some() { ", overlay" } else { "" }
        );
        Ok(())
    }

    fn teardown_session(&mut self, ctx: &mut XrContext, transitions: &mut Vec<Transition>) {
        let Some(active) = self.session.take() else {
            return;
        };
        ctx.runtime_mut().destroy_session(active.handle);
        if self.state != SessionState::Uninitialized {
            transitions.push(Transition {
                from: self.state,
                to: SessionState::Uninitialized,
                cause: TransitionCause::Teardown,
                generation: active.generation,
                time: None,
            });
        }
        self.state = SessionState::Uninitialized;
        self.begin_deferred = false;
        self.suspending = false;
        self.lost = false;
        log::info!("[session] destroyed session {}", active.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xr::{SimulatedConfig, SimulatedControl, SimulatedRuntime};

    fn setup(config: SimulatedConfig) -> (XrContext, SimulatedControl, SessionManager) {
        let runtime = SimulatedRuntime::new(config);
        let control = runtime.control();
        let ctx = XrContext::new(Box::new(runtime));
        (ctx, control, SessionManager::new(SessionConfig::default()))
    }

    fn foreground(manager: &mut SessionManager, ctx: &mut XrContext) {
        manager
            .handle_platform_signal(ctx, &LifecycleSignal::Resumed)
            .expect("resume");
        manager
            .handle_platform_signal(
                ctx,
                &LifecycleSignal::WindowInitialized(GraphicsBinding::Headless),
            )
            .expect("window");
    }

    fn states(transitions: &[Transition]) -> Vec<SessionState> {
        transitions.iter().map(|t| t.to).collect()
    }

    #[test]
    fn missing_loader_leaves_no_instance() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig {
            loader_present: false,
            ..Default::default()
        });
        let err = manager.initialize(&mut ctx).unwrap_err();
        assert!(matches!(err, XrError::RuntimeUnavailable(_)));
        assert!(!ctx.has_instance());
        assert!(!control.instance_alive());
        assert_eq!(manager.state(), SessionState::Uninitialized);
    }

    #[test]
    fn required_overlay_without_support_is_unavailable() {
        let (mut ctx, control, _) = setup(SimulatedConfig {
            overlay_supported: false,
            ..Default::default()
        });
        let mut manager = SessionManager::new(SessionConfig {
            overlay: Some(OverlayPlacement(1)),
            overlay_required: true,
            ..Default::default()
        });
        let err = manager.initialize(&mut ctx).unwrap_err();
        assert!(matches!(err, XrError::RuntimeUnavailable(_)));
        assert!(!ctx.has_instance());
        assert!(!control.instance_alive());
    }

    #[test]
    fn blend_mode_follows_preference() {
        let (mut ctx, _, _) = setup(SimulatedConfig::default());
        let mut manager = SessionManager::new(SessionConfig {
            blend_preference: vec![BlendMode::AlphaBlend, BlendMode::Additive],
            ..Default::default()
        });
        manager.initialize(&mut ctx).expect("initialize");
        assert_eq!(
            ctx.instance().map(|info| info.blend_mode),
            Some(BlendMode::AlphaBlend)
        );
    }

    #[test]
    fn session_waits_for_window_and_resume() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        assert!(manager.session().is_none());
        assert!(manager.poll_lifecycle_events(&mut ctx).expect("poll").is_empty());

        foreground(&mut manager, &mut ctx);
        assert!(control.active_session().is_some());

        let transitions = manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(
            states(&transitions),
            vec![
                SessionState::Idle,
                SessionState::Ready,
                SessionState::Synchronized,
                SessionState::Visible,
                SessionState::Focused,
            ]
        );
        assert!(manager.is_running());
        assert!(transitions.iter().all(Transition::is_valid));
    }

    #[test]
    fn focus_follows_runtime_state() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        assert!(!manager.is_focused());
        foreground(&mut manager, &mut ctx);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert!(manager.is_focused());

        control.inject_state(SessionState::Visible);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert!(!manager.is_focused());
        assert!(manager.is_running());
    }

    #[test]
    fn unexpected_runtime_transition_is_rejected() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(manager.state(), SessionState::Focused);

        control.inject_state(SessionState::Ready);
        let transitions = manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert!(transitions.is_empty());
        assert_eq!(manager.state(), SessionState::Focused);
        assert_eq!(manager.rejected_transitions(), 1);
    }

    #[test]
    fn session_loss_recreates_session() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig {
            auto_focus: false,
            ..Default::default()
        });
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(manager.state(), SessionState::Visible);
        let first = control.active_session();

        control.inject_session_lost();
        let transitions = manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(transitions[0].to, SessionState::LossPending);
        assert_eq!(transitions[1].to, SessionState::Uninitialized);
        assert_eq!(transitions[1].cause, TransitionCause::Teardown);
        assert_ne!(control.active_session(), first);
        assert_eq!(manager.generation(), 2);
        assert!(transitions.iter().all(Transition::is_valid));
        assert_eq!(manager.state(), SessionState::Visible);
        assert!(manager.is_running());
    }

    #[test]
    fn pause_requests_exit_and_resume_creates_fresh_session() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");

        manager
            .handle_platform_signal(&mut ctx, &LifecycleSignal::Paused)
            .expect("pause");
        assert_eq!(manager.state(), SessionState::Focused);

        let transitions = manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(
            states(&transitions),
            vec![
                SessionState::Stopping,
                SessionState::Idle,
                SessionState::Exiting,
                SessionState::Uninitialized,
            ]
        );
        assert!(!manager.should_exit());
        assert!(control.active_session().is_none());

        manager
            .handle_platform_signal(&mut ctx, &LifecycleSignal::Resumed)
            .expect("resume");
        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(manager.state(), SessionState::Focused);
        assert_eq!(manager.generation(), 2);
    }

    #[test]
    fn destroy_signal_exits_after_stopping() {
        let (mut ctx, _, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");

        manager
            .handle_platform_signal(&mut ctx, &LifecycleSignal::Destroyed)
            .expect("destroy");
        assert!(!manager.should_exit());
        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert!(manager.should_exit());
        assert_eq!(manager.exit_reason(), Some(&ExitReason::Requested));
    }

    #[test]
    fn instance_loss_is_fatal() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");

        control.inject_instance_loss();
        let err = manager.poll_lifecycle_events(&mut ctx).unwrap_err();
        assert!(err.is_fatal());
        assert!(manager.session().is_none());
    }

    #[test]
    fn transient_poll_failure_is_retried() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        control.fail_next_polls(1);

        let transitions = manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert!(transitions.is_empty());
        let transitions = manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(transitions.last().map(|t| t.to), Some(SessionState::Focused));
    }

    #[test]
    fn shutdown_destroys_session_before_instance_and_is_idempotent() {
        let (mut ctx, control, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        manager.poll_lifecycle_events(&mut ctx).expect("poll");

        let transitions = manager.shutdown(&mut ctx);
        assert_eq!(states(&transitions), vec![SessionState::Uninitialized]);
        assert!(manager.shutdown(&mut ctx).is_empty());

        let calls = control.calls();
        let session_pos = calls.iter().position(|c| *c == "destroy_session");
        let instance_pos = calls.iter().position(|c| *c == "destroy_instance");
        assert!(session_pos < instance_pos);
        assert_eq!(calls.iter().filter(|c| **c == "destroy_instance").count(), 1);
        assert!(control.violations().is_empty());
        assert!(!ctx.has_instance());
    }

    #[test]
    fn ready_in_background_defers_begin() {
        let (mut ctx, _, mut manager) = setup(SimulatedConfig::default());
        manager.initialize(&mut ctx).expect("initialize");
        foreground(&mut manager, &mut ctx);
        manager
            .handle_platform_signal(&mut ctx, &LifecycleSignal::Paused)
            .expect("pause");

        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(manager.state(), SessionState::Ready);
        assert!(!manager.is_running());

        manager
            .handle_platform_signal(&mut ctx, &LifecycleSignal::Resumed)
            .expect("resume");
        assert!(manager.is_running());
        manager.poll_lifecycle_events(&mut ctx).expect("poll");
        assert_eq!(manager.state(), SessionState::Focused);
    }
}
