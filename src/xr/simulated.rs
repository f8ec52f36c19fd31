use super::runtime::{
    FrameTiming, InstanceDesc, InstanceInfo, RuntimeActionState, RuntimeError, RuntimeEvent,
    RuntimeResult, SubmittedLayer, SwapchainDesc, SwapchainInfo, XrRuntime,
};
use super::{
    BlendMode, GraphicsBinding, OverlayPlacement, Pose, ReferenceSpaceKind, SessionHandle,
    SpaceHandle, SwapchainHandle, ViewConfigView, ViewConfigurationKind, ViewPose, XrTime,
};
use crate::input::{ActionKind, ActionSetDesc, ActionValue};
use crate::platform::LOADER_LIBRARY;
use crate::session::SessionState;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const START_TIME_NS: i64 = 1_000_000_000;
const EYE_OFFSET_M: f32 = 0.032;

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub loader_present: bool,
    pub system_available: bool,
    pub overlay_supported: bool,
    pub view_resolution: [u32; 2],
    pub blend_modes: Vec<BlendMode>,
    pub image_count: u32,
    pub frame_period: Duration,
    /// Report `Focused` right after `Visible` once a session begins.
    pub auto_focus: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            loader_present: true,
            system_available: true,
            overlay_supported: true,
            view_resolution: [1440, 1600],
            blend_modes: vec![BlendMode::Opaque, BlendMode::AlphaBlend],
            image_count: 3,
            frame_period: Duration::from_nanos(13_888_889),
            auto_focus: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedFrame {
    pub session: SessionHandle,
    pub display_time: XrTime,
    pub blend_mode: BlendMode,
    pub layers: Vec<SubmittedLayer>,
}

#[derive(Debug)]
struct SimSwapchain {
    image_count: u32,
    next: u32,
    acquired: Option<u32>,
    waited: bool,
}

#[derive(Debug)]
struct SimSession {
    handle: SessionHandle,
    state: SessionState,
    running: bool,
    exit_requested: bool,
    lost: bool,
    frame_begun: bool,
    spaces: HashSet<u64>,
    swapchains: HashMap<u64, SimSwapchain>,
    action_kinds: Option<HashMap<String, ActionKind>>,
}

#[derive(Debug)]
struct SimState {
    config: SimulatedConfig,
    view_count: usize,
    instance_alive: bool,
    next_handle: u64,
    session: Option<SimSession>,
    events: VecDeque<RuntimeEvent>,
    poll_failures: u32,
    frame_wait_failures: u32,
    action_failures: HashMap<String, u32>,
    should_render_script: VecDeque<bool>,
    time: i64,
    action_values: HashMap<String, ActionValue>,
    calls: Vec<&'static str>,
    frames: Vec<SubmittedFrame>,
    violations: Vec<String>,
    begin_frames: u64,
    end_frames: u64,
}

impl SimState {
    fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            view_count: 0,
            instance_alive: false,
            next_handle: 1,
            session: None,
            events: VecDeque::new(),
            poll_failures: 0,
            frame_wait_failures: 0,
            action_failures: HashMap::new(),
            should_render_script: VecDeque::new(),
            time: START_TIME_NS,
            action_values: HashMap::new(),
            calls: Vec::new(),
            frames: Vec::new(),
            violations: Vec::new(),
            begin_frames: 0,
            end_frames: 0,
        }
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn queue_state(&mut self, state: SessionState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
            let handle = session.handle;
            self.events.push_back(RuntimeEvent::SessionStateChanged {
                session: handle,
                state,
                time: XrTime(self.time),
            });
        }
    }

    fn session_mut(
        &mut self,
        call: &'static str,
        handle: SessionHandle,
    ) -> RuntimeResult<&mut SimSession> {
        match self.session.as_mut() {
            Some(session) if session.handle == handle => {
                if session.lost {
                    Err(RuntimeError::SessionLost)
                } else {
                    Ok(session)
                }
            }
            _ => Err(RuntimeError::InvalidHandle {
                call,
                handle: handle.0,
            }),
        }
    }

    fn swapchain_mut(
        &mut self,
        call: &'static str,
        handle: SwapchainHandle,
    ) -> RuntimeResult<&mut SimSwapchain> {
        let session = self.session.as_mut().ok_or(RuntimeError::InvalidHandle {
            call,
            handle: handle.0,
        })?;
        if session.lost {
            return Err(RuntimeError::SessionLost);
        }
        session
            .swapchains
            .get_mut(&handle.0)
            .ok_or(RuntimeError::InvalidHandle {
                call,
                handle: handle.0,
            })
    }

    fn violation(&mut self, message: String) -> RuntimeError {
        log::warn!("[sim] contract violation: {message}");
        self.violations.push(message.clone());
        RuntimeError::CallFailed {
            call: "validation",
            reason: message,
        }
    }
}

/// In-process runtime that follows the OpenXR session lifecycle.
///
/// Used when no loader backend is compiled in, and by tests through
/// [`SimulatedControl`] to inject events and inspect what was submitted.
pub struct SimulatedRuntime {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRuntime {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    pub fn control(&self) -> SimulatedControl {
        SimulatedControl {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl XrRuntime for SimulatedRuntime {
    fn label(&self) -> &'static str {
        "Simulated Runtime"
    }

    fn create_instance(&mut self, desc: &InstanceDesc) -> RuntimeResult<InstanceInfo> {
        let mut state = self.lock();
        state.calls.push("create_instance");
        if !state.config.loader_present {
            return Err(RuntimeError::LoaderMissing(format!(
                "{LOADER_LIBRARY} could not be loaded"
            )));
        }
        if state.instance_alive {
            return Err(RuntimeError::CallFailed {
                call: "create_instance",
                reason: "instance already exists".into(),
            });
        }
        if !state.config.system_available {
            return Err(RuntimeError::SystemUnavailable(
                "no head-mounted display attached".into(),
            ));
        }

        state.instance_alive = true;
        state.view_count = desc.view_configuration.view_count();
        let view = ViewConfigView::from_resolution(state.config.view_resolution);
        Ok(InstanceInfo {
            runtime_name: "Simulated Runtime".into(),
            system_name: "Simulated HMD".into(),
            vendor_id: 0,
            view_configuration: desc.view_configuration,
            views: vec![view; state.view_count],
            blend_modes: state.config.blend_modes.clone(),
            overlay_enabled: desc.request_overlay && state.config.overlay_supported,
            blend_mode: BlendMode::Opaque,
        })
    }

    fn destroy_instance(&mut self) {
        let mut state = self.lock();
        state.calls.push("destroy_instance");
        if state.session.is_some() {
            let message = "instance destroyed before its session".to_string();
            state.violation(message);
        }
        state.instance_alive = false;
        state.session = None;
        state.events.clear();
    }

    fn poll_event(&mut self) -> RuntimeResult<Option<RuntimeEvent>> {
        let mut state = self.lock();
        if !state.instance_alive {
            return Err(RuntimeError::InstanceLost);
        }
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(RuntimeError::CallFailed {
                call: "poll_event",
                reason: "injected failure".into(),
            });
        }
        Ok(state.events.pop_front())
    }

    fn create_session(
        &mut self,
        _binding: &GraphicsBinding,
        _overlay: Option<OverlayPlacement>,
    ) -> RuntimeResult<SessionHandle> {
        let mut state = self.lock();
        state.calls.push("create_session");
        if !state.instance_alive {
            return Err(RuntimeError::InstanceLost);
        }
        if state.session.is_some() {
            return Err(state.violation("second session created on one instance".into()));
        }
        let handle = SessionHandle(state.allocate());
        state.session = Some(SimSession {
            handle,
            state: SessionState::Uninitialized,
            running: false,
            exit_requested: false,
            lost: false,
            frame_begun: false,
            spaces: HashSet::new(),
            swapchains: HashMap::new(),
            action_kinds: None,
        });
        state.queue_state(SessionState::Idle);
        state.queue_state(SessionState::Ready);
        Ok(handle)
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        _kind: ReferenceSpaceKind,
    ) -> RuntimeResult<SpaceHandle> {
        let mut state = self.lock();
        state.session_mut("create_reference_space", session)?;
        let handle = state.allocate();
        state
            .session_mut("create_reference_space", session)?
            .spaces
            .insert(handle);
        Ok(SpaceHandle(handle))
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        _view_configuration: ViewConfigurationKind,
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.calls.push("begin_session");
        let auto_focus = state.config.auto_focus;
        let sim = state.session_mut("begin_session", session)?;
        if sim.state != SessionState::Ready || sim.running {
            let message = format!("begin_session in state {:?}", sim.state);
            return Err(state.violation(message));
        }
        sim.running = true;
        state.queue_state(SessionState::Synchronized);
        state.queue_state(SessionState::Visible);
        if auto_focus {
            state.queue_state(SessionState::Focused);
        }
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.calls.push("end_session");
        let sim = state.session_mut("end_session", session)?;
        if sim.state != SessionState::Stopping {
            let message = format!("end_session in state {:?}", sim.state);
            return Err(state.violation(message));
        }
        sim.running = false;
        sim.frame_begun = false;
        let exit_requested = sim.exit_requested;
        state.queue_state(SessionState::Idle);
        if exit_requested {
            state.queue_state(SessionState::Exiting);
        }
        Ok(())
    }

    fn request_exit_session(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.calls.push("request_exit_session");
        let sim = state.session_mut("request_exit_session", session)?;
        if !sim.running {
            return Err(RuntimeError::SessionNotRunning);
        }
        sim.exit_requested = true;
        if sim.state != SessionState::Stopping {
            state.queue_state(SessionState::Stopping);
        }
        Ok(())
    }

    fn destroy_session(&mut self, session: SessionHandle) {
        let mut state = self.lock();
        state.calls.push("destroy_session");
        if state.session.as_ref().map(|s| s.handle) == Some(session) {
            state.session = None;
        }
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        desc: &SwapchainDesc,
    ) -> RuntimeResult<SwapchainInfo> {
        let mut state = self.lock();
        state.calls.push("create_swapchain");
        let image_count = state.config.image_count.max(1);
        let handle = state.allocate();
        let sim = state.session_mut("create_swapchain", session)?;
        if desc.width == 0 || desc.height == 0 {
            return Err(RuntimeError::CallFailed {
                call: "create_swapchain",
                reason: format!("invalid extent {}x{}", desc.width, desc.height),
            });
        }
        sim.swapchains.insert(
            handle,
            SimSwapchain {
                image_count,
                next: 0,
                acquired: None,
                waited: false,
            },
        );
        Ok(SwapchainInfo {
            handle: SwapchainHandle(handle),
            images: (0..image_count as u64).map(|i| handle * 100 + i).collect(),
        })
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        let mut state = self.lock();
        state.calls.push("destroy_swapchain");
        if let Some(session) = state.session.as_mut() {
            session.swapchains.remove(&swapchain.0);
        }
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32> {
        let mut state = self.lock();
        let chain = state.swapchain_mut("acquire_swapchain_image", swapchain)?;
        if let Some(held) = chain.acquired {
            let message = format!("image {held} of swapchain {} acquired twice", swapchain.0);
            return Err(state.violation(message));
        }
        let index = chain.next;
        chain.next = (chain.next + 1) % chain.image_count;
        chain.acquired = Some(index);
        chain.waited = false;
        Ok(index)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        _timeout: Duration,
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        let chain = state.swapchain_mut("wait_swapchain_image", swapchain)?;
        if chain.acquired.is_none() {
            let message = format!("wait on swapchain {} without acquire", swapchain.0);
            return Err(state.violation(message));
        }
        chain.waited = true;
        Ok(())
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()> {
        let mut state = self.lock();
        let chain = state.swapchain_mut("release_swapchain_image", swapchain)?;
        if chain.acquired.is_none() || !chain.waited {
            let message = format!("release on swapchain {} without acquire/wait", swapchain.0);
            return Err(state.violation(message));
        }
        chain.acquired = None;
        chain.waited = false;
        Ok(())
    }

    fn wait_frame(
        &mut self,
        session: SessionHandle,
        _timeout: Duration,
    ) -> RuntimeResult<FrameTiming> {
        let mut state = self.lock();
        let period = state.config.frame_period;
        let (running, visible) = {
            let sim = state.session_mut("wait_frame", session)?;
            (
                sim.running,
                matches!(sim.state, SessionState::Visible | SessionState::Focused),
            )
        };
        if !running {
            return Err(RuntimeError::SessionNotRunning);
        }
        if state.frame_wait_failures > 0 {
            state.frame_wait_failures -= 1;
            return Err(RuntimeError::Timeout("wait_frame"));
        }
        state.time += period.as_nanos() as i64;
        let should_render = state.should_render_script.pop_front().unwrap_or(visible);
        Ok(FrameTiming {
            predicted_display_time: XrTime(state.time),
            predicted_display_period: period,
            should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()> {
        let mut state = self.lock();
        let sim = state.session_mut("begin_frame", session)?;
        if !sim.running {
            return Err(RuntimeError::SessionNotRunning);
        }
        let already_begun = sim.frame_begun;
        sim.frame_begun = true;
        state.begin_frames += 1;
        if already_begun {
            state.violation("begin_frame while a frame is in progress".into());
        }
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        _space: SpaceHandle,
        _display_time: XrTime,
    ) -> RuntimeResult<Vec<ViewPose>> {
        let mut state = self.lock();
        let view_count = state.view_count;
        state.session_mut("locate_views", session)?;
        Ok((0..view_count)
            .map(|eye| {
                let offset = if view_count == 1 {
                    0.0
                } else if eye == 0 {
                    -EYE_OFFSET_M
                } else {
                    EYE_OFFSET_M
                };
                ViewPose {
                    pose: Pose {
                        position: [offset, 0.0, 0.0],
                        ..Pose::IDENTITY
                    },
                    fov: Default::default(),
                }
            })
            .collect())
    }

    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: XrTime,
        blend_mode: BlendMode,
        layers: &[SubmittedLayer],
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        let sim = state.session_mut("end_frame", session)?;
        if !sim.frame_begun {
            return Err(state.violation("end_frame without begin_frame".into()));
        }
        sim.frame_begun = false;
        let held: Vec<u64> = sim
            .swapchains
            .iter()
            .filter(|(_, chain)| chain.acquired.is_some())
            .map(|(handle, _)| *handle)
            .collect();
        let (kept, unknown) = SubmittedLayer::retain_known(
            layers,
            |space| sim.spaces.contains(&space.0),
            |swapchain| sim.swapchains.contains_key(&swapchain.0),
        );
        let kept: Vec<SubmittedLayer> = kept.into_iter().cloned().collect();
        state.end_frames += 1;
        for handle in held {
            state.violation(format!("end_frame with swapchain {handle} image still acquired"));
        }
        state.frames.push(SubmittedFrame {
            session,
            display_time,
            blend_mode,
            layers: kept,
        });
        match unknown {
            Some(handle) => Err(RuntimeError::InvalidHandle {
                call: "end_frame",
                handle,
            }),
            None => Ok(()),
        }
    }

    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        sets: &[ActionSetDesc],
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.calls.push("attach_action_sets");
        let sim = state.session_mut("attach_action_sets", session)?;
        if sim.action_kinds.is_some() {
            return Err(state.violation("action sets attached twice to one session".into()));
        }
        let kinds = sets
            .iter()
            .flat_map(|set| set.actions.iter())
            .map(|action| (action.name.clone(), action.kind))
            .collect();
        sim.action_kinds = Some(kinds);
        Ok(())
    }

    fn sync_actions(&mut self, session: SessionHandle) -> RuntimeResult<bool> {
        let mut state = self.lock();
        let sim = state.session_mut("sync_actions", session)?;
        if sim.action_kinds.is_none() {
            return Err(state.violation("sync_actions before attach".into()));
        }
        Ok(sim.state == SessionState::Focused)
    }

    fn action_state(
        &mut self,
        session: SessionHandle,
        _set: &str,
        action: &str,
        _space: SpaceHandle,
        _display_time: XrTime,
    ) -> RuntimeResult<RuntimeActionState> {
        let mut state = self.lock();
        if let Some(remaining) = state.action_failures.get_mut(action) {
            *remaining -= 1;
            if *remaining == 0 {
                state.action_failures.remove(action);
            }
            return Err(RuntimeError::CallFailed {
                call: "action_state",
                reason: format!("injected failure for {action}"),
            });
        }
        let sim = state.session_mut("action_state", session)?;
        let focused = sim.state == SessionState::Focused;
        let kind = sim
            .action_kinds
            .as_ref()
            .and_then(|kinds| kinds.get(action).copied())
            .ok_or_else(|| RuntimeError::CallFailed {
                call: "action_state",
                reason: format!("action {action} not attached"),
            })?;
        let value = state
            .action_values
            .get(action)
            .copied()
            .unwrap_or_else(|| ActionValue::default_for(kind));
        Ok(RuntimeActionState {
            value,
            is_active: focused,
            changed_since_last_sync: false,
        })
    }
}

/// Test and tooling handle onto a [`SimulatedRuntime`].
#[derive(Clone)]
pub struct SimulatedControl {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedControl {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }

    pub fn inject_event(&self, event: RuntimeEvent) {
        self.lock().events.push_back(event);
    }

    /// Queues a state change for the current session exactly as the runtime
    /// would report it. Returns `false` when there is no session.
    pub fn inject_state(&self, session_state: SessionState) -> bool {
        let mut state = self.lock();
        if state.session.is_none() {
            return false;
        }
        state.queue_state(session_state);
        true
    }

    /// Marks the current session lost and reports `LossPending` for it.
    pub fn inject_session_lost(&self) -> bool {
        let mut state = self.lock();
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        session.lost = true;
        state.queue_state(SessionState::LossPending);
        true
    }

    pub fn inject_instance_loss(&self) {
        let mut state = self.lock();
        let loss_time = XrTime(state.time);
        state
            .events
            .push_back(RuntimeEvent::InstanceLossPending { loss_time });
    }

    pub fn fail_next_polls(&self, count: u32) {
        self.lock().poll_failures = count;
    }

    pub fn fail_next_frame_waits(&self, count: u32) {
        self.lock().frame_wait_failures = count;
    }

    /// Fails the next `count` samples of `action` without affecting other actions.
    pub fn fail_next_action_states(&self, action: &str, count: u32) {
        let mut state = self.lock();
        if count == 0 {
            state.action_failures.remove(action);
        } else {
            state.action_failures.insert(action.to_string(), count);
        }
    }

    pub fn script_should_render(&self, frames: impl IntoIterator<Item = bool>) {
        self.lock().should_render_script.extend(frames);
    }

    pub fn set_action_value(&self, action: &str, value: ActionValue) {
        self.lock().action_values.insert(action.to_string(), value);
    }

    pub fn set_loader_present(&self, present: bool) {
        self.lock().config.loader_present = present;
    }

    pub fn active_session(&self) -> Option<SessionHandle> {
        self.lock().session.as_ref().map(|session| session.handle)
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.lock().session.as_ref().map(|session| session.state)
    }

    pub fn instance_alive(&self) -> bool {
        self.lock().instance_alive
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn submitted_frames(&self) -> Vec<SubmittedFrame> {
        self.lock().frames.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    pub fn frame_counts(&self) -> (u64, u64) {
        let state = self.lock();
        (state.begin_frames, state.end_frames)
    }

    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xr::AppInfo;

    fn desc() -> InstanceDesc {
        InstanceDesc {
            app: AppInfo {
                application_name: "test".into(),
                application_version: 1,
                engine_name: "test".into(),
                engine_version: 1,
            },
            view_configuration: ViewConfigurationKind::PrimaryStereo,
            request_overlay: false,
        }
    }

    #[test]
    fn missing_loader_fails_instance_creation() {
        let mut runtime = SimulatedRuntime::new(SimulatedConfig {
            loader_present: false,
            ..Default::default()
        });
        let err = runtime.create_instance(&desc()).unwrap_err();
        assert!(matches!(err, RuntimeError::LoaderMissing(_)));
        assert!(!runtime.control().instance_alive());
    }

    #[test]
    fn session_creation_reports_idle_then_ready() {
        let mut runtime = SimulatedRuntime::default();
        runtime.create_instance(&desc()).expect("instance");
        let session = runtime
            .create_session(&GraphicsBinding::Headless, None)
            .expect("session");

        let mut states = Vec::new();
        while let Some(event) = runtime.poll_event().expect("poll") {
            if let RuntimeEvent::SessionStateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec![SessionState::Idle, SessionState::Ready]);

        runtime
            .begin_session(session, ViewConfigurationKind::PrimaryStereo)
            .expect("begin");
        assert_eq!(
            runtime.control().session_state(),
            Some(SessionState::Focused)
        );
    }

    #[test]
    fn unknown_layer_handle_still_ends_the_frame() {
        let mut runtime = SimulatedRuntime::default();
        runtime.create_instance(&desc()).expect("instance");
        let session = runtime
            .create_session(&GraphicsBinding::Headless, None)
            .expect("session");
        while runtime.poll_event().expect("poll").is_some() {}
        runtime
            .begin_session(session, ViewConfigurationKind::PrimaryStereo)
            .expect("begin session");
        let space = runtime
            .create_reference_space(session, ReferenceSpaceKind::Local)
            .expect("space");

        let timing = runtime
            .wait_frame(session, Duration::from_millis(100))
            .expect("wait");
        runtime.begin_frame(session).expect("begin frame");
        let layers = [SubmittedLayer::Quad {
            space,
            swapchain: SwapchainHandle(999),
            image_rect: [0, 0, 64, 64],
            pose: Pose::IDENTITY,
            size: [1.0, 1.0],
        }];
        let err = runtime
            .end_frame(session, timing.predicted_display_time, BlendMode::Opaque, &layers)
            .unwrap_err();

        assert_eq!(
            err,
            RuntimeError::InvalidHandle {
                call: "end_frame",
                handle: 999
            }
        );
        let control = runtime.control();
        assert_eq!(control.frame_counts(), (1, 1));
        assert!(control.submitted_frames()[0].layers.is_empty());
        assert!(control.violations().is_empty());
    }

    #[test]
    fn double_acquire_is_recorded_as_violation() {
        let mut runtime = SimulatedRuntime::default();
        runtime.create_instance(&desc()).expect("instance");
        let session = runtime
            .create_session(&GraphicsBinding::Headless, None)
            .expect("session");
        let chain = runtime
            .create_swapchain(
                session,
                &SwapchainDesc {
                    format: crate::xr::SwapchainFormat::Rgba8,
                    width: 64,
                    height: 64,
                    sample_count: 1,
                    array_size: 1,
                },
            )
            .expect("swapchain");
        assert_eq!(chain.images.len(), 3);

        assert_eq!(runtime.acquire_swapchain_image(chain.handle), Ok(0));
        assert!(runtime.acquire_swapchain_image(chain.handle).is_err());
        assert_eq!(runtime.control().violations().len(), 1);
    }
}
