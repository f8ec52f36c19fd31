pub mod bindings;

pub use bindings::default_action_set;

use crate::frame::FrameDriver;
use crate::session::{SessionManager, SessionState};
use crate::xr::{Pose, RuntimeError, XrContext, XrError, XrResult, XrTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Thumbstick magnitudes below this are reported as zero.
pub const STICK_DEADZONE: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Boolean,
    Float,
    Vector2,
    Pose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionValue {
    Boolean(bool),
    Float(f32),
    Vector2([f32; 2]),
    /// `None` when the runtime could not locate the pose.
    Pose(Option<Pose>),
}

impl ActionValue {
    pub fn default_for(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Boolean => ActionValue::Boolean(false),
            ActionKind::Float => ActionValue::Float(0.0),
            ActionKind::Vector2 => ActionValue::Vector2([0.0, 0.0]),
            ActionKind::Pose => ActionValue::Pose(None),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionValue::Boolean(_) => ActionKind::Boolean,
            ActionValue::Float(_) => ActionKind::Float,
            ActionValue::Vector2(_) => ActionKind::Vector2,
            ActionValue::Pose(_) => ActionKind::Pose,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ActionValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ActionValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    fn with_deadzone(self) -> Self {
        match self {
            ActionValue::Vector2([x, y]) => ActionValue::Vector2([
                if x.abs() < STICK_DEADZONE { 0.0 } else { x },
                if y.abs() < STICK_DEADZONE { 0.0 } else { y },
            ]),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDesc {
    pub name: String,
    pub localized_name: String,
    pub kind: ActionKind,
    #[serde(default)]
    pub subaction_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedBinding {
    pub action: String,
    pub path: String,
}

impl SuggestedBinding {
    pub fn new(action: &str, user_path: &str, component: &str) -> Self {
        Self {
            action: action.into(),
            path: format!("{user_path}/input/{component}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileBinding {
    pub profile: String,
    pub bindings: Vec<SuggestedBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSetDesc {
    pub name: String,
    pub localized_name: String,
    #[serde(default)]
    pub priority: u32,
    pub actions: Vec<ActionDesc>,
    #[serde(default)]
    pub bindings: Vec<ProfileBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledAction {
    pub value: ActionValue,
    pub is_active: bool,
    pub sync_index: u64,
    pub frame_index: u64,
    pub display_time: XrTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Registered actions were sampled for this frame. An action whose sample
    /// failed has no value until a later sync succeeds.
    Sampled,
    /// The session is not focused; last-known values are kept.
    Degraded,
}

/// Maps logical actions onto runtime action sets and samples them once per frame.
pub struct ActionMapper {
    sets: Vec<ActionSetDesc>,
    kinds: HashMap<String, ActionKind>,
    attached_generation: Option<u64>,
    values_generation: u64,
    values: HashMap<String, SampledAction>,
    sync_index: u64,
}

impl ActionMapper {
    pub fn new() -> Self {
        Self {
            sets: Vec::new(),
            kinds: HashMap::new(),
            attached_generation: None,
            values_generation: 0,
            values: HashMap::new(),
            sync_index: 0,
        }
    }

    pub fn with_default_bindings() -> Self {
        let mut mapper = Self::new();
        if let Err(err) = mapper.register_action_set(default_action_set()) {
            log::error!("[input] default action set rejected: {err}");
        }
        mapper
    }

    /// Adds an action set. Only allowed before the first attach; action
    /// names are unique across all sets.
    pub fn register_action_set(&mut self, set: ActionSetDesc) -> XrResult<()> {
        if self.attached_generation.is_some() {
            return Err(XrError::Config(format!(
                "action set '{}' registered after attach",
                set.name
            )));
        }
        if self.sets.iter().any(|existing| existing.name == set.name) {
            return Err(XrError::Config(format!("duplicate action set '{}'", set.name)));
        }
        for action in &set.actions {
            if self.kinds.contains_key(&action.name)
                || set.actions.iter().filter(|a| a.name == action.name).count() > 1
            {
                return Err(XrError::Config(format!("duplicate action '{}'", action.name)));
            }
        }
        for profile in &set.bindings {
            if let Some(binding) = profile
                .bindings
                .iter()
                .find(|binding| !set.actions.iter().any(|a| a.name == binding.action))
            {
                return Err(XrError::Config(format!(
                    "{} binds undeclared action '{}'",
                    profile.profile, binding.action
                )));
            }
        }

        for action in &set.actions {
            self.kinds.insert(action.name.clone(), action.kind);
        }
        log::debug!(
            "[input] registered action set '{}' ({} actions, {} profiles)",
            set.name,
            set.actions.len(),
            set.bindings.len()
        );
        self.sets.push(set);
        Ok(())
    }

    pub fn action_sets(&self) -> &[ActionSetDesc] {
        &self.sets
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.sets
            .iter()
            .flat_map(|set| set.actions.iter().map(|action| action.name.as_str()))
    }

    pub fn sync_index(&self) -> u64 {
        self.sync_index
    }

    /// Drops sampled values that belong to an older session generation.
    pub fn track_generation(&mut self, generation: u64) {
        if generation != self.values_generation {
            if !self.values.is_empty() {
                log::debug!(
                    "[input] clearing {} values from session {}",
                    self.values.len(),
                    self.values_generation
                );
            }
            self.values.clear();
            self.values_generation = generation;
        }
    }

    /// Bindings moved to another controller, so values sampled through the
    /// old profile are dropped until the next focused sync.
    pub fn interaction_profile_changed(&mut self) {
        log::info!(
            "[input] interaction profile changed; dropping {} sampled values",
            self.values.len()
        );
        self.values.clear();
    }

    /// Syncs and samples every registered action. Must run between
    /// `begin_frame` and `end_frame`.
    pub fn sync_actions(
        &mut self,
        ctx: &mut XrContext,
        session: &SessionManager,
        frames: &FrameDriver,
    ) -> XrResult<SyncOutcome> {
        let frame = frames
            .current_frame()
            .ok_or(XrError::FrameOrder("sync_actions outside begin_frame/end_frame"))?;
        let active = session
            .session()
            .copied()
            .ok_or(XrError::NotRunning(session.state()))?;
        self.track_generation(active.generation);

        if self.sets.is_empty() {
            return Ok(SyncOutcome::Degraded);
        }
        if self.attached_generation != Some(active.generation) {
            ctx.runtime_mut()
                .attach_action_sets(active.handle, &self.sets)
                .map_err(XrError::from)?;
            self.attached_generation = Some(active.generation);
            log::debug!(
                "[input] attached {} action sets to session {}",
                self.sets.len(),
                active.generation
            );
        }

        if session.state() != SessionState::Focused {
            return Ok(SyncOutcome::Degraded);
        }
        if !ctx.runtime_mut().sync_actions(active.handle).map_err(XrError::from)? {
            return Ok(SyncOutcome::Degraded);
        }

        self.sync_index += 1;
        for set in &self.sets {
            for action in &set.actions {
                let state = match ctx.runtime_mut().action_state(
                    active.handle,
                    &set.name,
                    &action.name,
                    active.space,
                    frame.predicted_display_time,
                ) {
                    Ok(state) => state,
                    Err(RuntimeError::SessionLost) => {
                        return Err(XrError::from(RuntimeError::SessionLost));
                    }
                    Err(err) => {
                        log::warn!("[input] failed to sample '{}': {err}", action.name);
                        self.values.remove(&action.name);
                        continue;
                    }
                };
                let value = if state.value.kind() == action.kind {
                    state.value.with_deadzone()
                } else {
                    log::warn!(
                        "[input] '{}' sampled as {:?}, expected {:?}",
                        action.name,
                        state.value.kind(),
                        action.kind
                    );
                    ActionValue::default_for(action.kind)
                };
                self.values.insert(
                    action.name.clone(),
                    SampledAction {
                        value,
                        is_active: state.is_active,
                        sync_index: self.sync_index,
                        frame_index: frame.frame_index,
                        display_time: frame.predicted_display_time,
                    },
                );
            }
        }
        Ok(SyncOutcome::Sampled)
    }

    /// Most recent value of `name` sampled in the current session lifetime.
    pub fn get_action_value(&self, name: &str) -> XrResult<SampledAction> {
        if !self.kinds.contains_key(name) {
            return Err(XrError::UnknownAction(name.to_string()));
        }
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| XrError::StaleAction(name.to_string()))
    }
}

impl Default for ActionMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDriver, FrameDriverConfig, FrameSubmission};
    use crate::platform::LifecycleSignal;
    use crate::session::SessionConfig;
    use crate::xr::{GraphicsBinding, SimulatedConfig, SimulatedControl, SimulatedRuntime};

    struct Harness {
        ctx: XrContext,
        control: SimulatedControl,
        session: SessionManager,
        frames: FrameDriver,
        mapper: ActionMapper,
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
            mapper: ActionMapper::with_default_bindings(),
        }
    }

    fn sync_one_frame(h: &mut Harness) -> XrResult<SyncOutcome> {
        let begun = h.frames.begin_frame(&mut h.ctx, &h.session);
        assert!(matches!(begun, Ok(_) | Err(XrError::FrameSkipped)));
        let outcome = h.mapper.sync_actions(&mut h.ctx, &h.session, &h.frames);
        h.frames
            .end_frame(&mut h.ctx, &h.session, FrameSubmission::empty())
            .expect("end frame");
        outcome
    }

    #[test]
    fn unknown_and_stale_actions_are_distinguished() {
        let mapper = ActionMapper::with_default_bindings();
        assert!(matches!(
            mapper.get_action_value("jump"),
            Err(XrError::UnknownAction(_))
        ));
        assert!(matches!(
            mapper.get_action_value("trigger"),
            Err(XrError::StaleAction(_))
        ));
    }

    #[test]
    fn focused_sync_samples_every_action() {
        let mut h = harness(SimulatedConfig::default());
        h.control.set_action_value("trigger", ActionValue::Float(0.75));

        assert_eq!(sync_one_frame(&mut h).expect("sync"), SyncOutcome::Sampled);
        let trigger = h.mapper.get_action_value("trigger").expect("trigger");
        assert_eq!(trigger.value, ActionValue::Float(0.75));
        assert!(trigger.is_active);
        assert_eq!(trigger.sync_index, 1);
        assert_eq!(trigger.frame_index, h.frames.frame_index());
        assert_eq!(
            h.mapper.get_action_value("grip_pose").expect("pose").value,
            ActionValue::Pose(None)
        );
        assert_eq!(
            h.control
                .calls()
                .iter()
                .filter(|call| **call == "attach_action_sets")
                .count(),
            1
        );
    }

    #[test]
    fn unfocused_sync_keeps_last_values() {
        let mut h = harness(SimulatedConfig::default());
        h.control.set_action_value("primary", ActionValue::Boolean(true));
        sync_one_frame(&mut h).expect("sync");

        h.control.inject_state(SessionState::Visible);
        h.session.poll_lifecycle_events(&mut h.ctx).expect("poll");
        h.control.set_action_value("primary", ActionValue::Boolean(false));

        assert_eq!(sync_one_frame(&mut h).expect("sync"), SyncOutcome::Degraded);
        let primary = h.mapper.get_action_value("primary").expect("primary");
        assert_eq!(primary.value, ActionValue::Boolean(true));
        assert_eq!(primary.sync_index, 1);
    }

    #[test]
    fn sync_outside_frame_is_rejected() {
        let mut h = harness(SimulatedConfig::default());
        let err = h
            .mapper
            .sync_actions(&mut h.ctx, &h.session, &h.frames)
            .unwrap_err();
        assert!(matches!(err, XrError::FrameOrder(_)));
    }

    #[test]
    fn new_session_generation_invalidates_values() {
        let mut h = harness(SimulatedConfig::default());
        sync_one_frame(&mut h).expect("sync");
        assert!(h.mapper.get_action_value("trigger").is_ok());

        h.mapper.track_generation(h.session.generation() + 1);
        assert!(matches!(
            h.mapper.get_action_value("trigger"),
            Err(XrError::StaleAction(_))
        ));
    }

    #[test]
    fn thumbstick_deadzone_is_applied() {
        let mut h = harness(SimulatedConfig::default());
        h.control
            .set_action_value("thumbstick", ActionValue::Vector2([0.02, -0.6]));
        sync_one_frame(&mut h).expect("sync");
        assert_eq!(
            h.mapper.get_action_value("thumbstick").expect("stick").value,
            ActionValue::Vector2([0.0, -0.6])
        );
    }

    #[test]
    fn failed_sample_never_returns_older_value() {
        let mut h = harness(SimulatedConfig::default());
        h.control.set_action_value("trigger", ActionValue::Float(0.9));
        h.control.set_action_value("primary", ActionValue::Boolean(true));
        sync_one_frame(&mut h).expect("first sync");
        assert_eq!(h.mapper.get_action_value("trigger").expect("trigger").sync_index, 1);

        h.control.fail_next_action_states("trigger", 1);
        assert_eq!(sync_one_frame(&mut h).expect("second sync"), SyncOutcome::Sampled);
        assert_eq!(h.mapper.sync_index(), 2);
        assert!(matches!(
            h.mapper.get_action_value("trigger"),
            Err(XrError::StaleAction(_))
        ));
        let primary = h.mapper.get_action_value("primary").expect("primary");
        assert_eq!(primary.sync_index, h.mapper.sync_index());

        sync_one_frame(&mut h).expect("third sync");
        let trigger = h.mapper.get_action_value("trigger").expect("trigger recovered");
        assert_eq!(trigger.value, ActionValue::Float(0.9));
        assert_eq!(trigger.sync_index, h.mapper.sync_index());
    }

    #[test]
    fn profile_change_drops_values_until_next_sync() {
        let mut h = harness(SimulatedConfig::default());
        sync_one_frame(&mut h).expect("sync");
        assert!(h.mapper.get_action_value("trigger").is_ok());

        h.mapper.interaction_profile_changed();
        assert!(matches!(
            h.mapper.get_action_value("trigger"),
            Err(XrError::StaleAction(_))
        ));

        sync_one_frame(&mut h).expect("resync");
        assert_eq!(
            h.mapper.get_action_value("trigger").expect("trigger").sync_index,
            h.mapper.sync_index()
        );
    }

    #[test]
    fn registration_after_attach_is_rejected() {
        let mut h = harness(SimulatedConfig::default());
        sync_one_frame(&mut h).expect("sync");
        let extra = ActionSetDesc {
            name: "extra".into(),
            localized_name: "Extra".into(),
            priority: 1,
            actions: Vec::new(),
            bindings: Vec::new(),
        };
        assert!(matches!(
            h.mapper.register_action_set(extra),
            Err(XrError::Config(_))
        ));
    }

    #[test]
    fn duplicate_action_names_are_rejected() {
        let mut mapper = ActionMapper::with_default_bindings();
        let mut set = default_action_set();
        set.name = "second".into();
        assert!(matches!(
            mapper.register_action_set(set),
            Err(XrError::Config(_))
        ));
    }
}
