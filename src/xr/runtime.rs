use super::{
    AppInfo, BlendMode, GraphicsBinding, OverlayPlacement, Pose, ReferenceSpaceKind,
    SessionHandle, SpaceHandle, SwapchainFormat, SwapchainHandle, ViewConfigView,
    ViewConfigurationKind, ViewPose, XrTime,
};
use crate::input::{ActionSetDesc, ActionValue};
use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("OpenXR loader unavailable: {0}")]
    LoaderMissing(String),
    #[error("no compatible XR system: {0}")]
    SystemUnavailable(String),
    #[error("extension {0} not supported")]
    ExtensionMissing(String),
    #[error("session lost")]
    SessionLost,
    #[error("instance lost")]
    InstanceLost,
    #[error("session not running")]
    SessionNotRunning,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("{call} used an invalid handle {handle}")]
    InvalidHandle { call: &'static str, handle: u64 },
    #[error("{call} failed: {reason}")]
    CallFailed { call: &'static str, reason: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDesc {
    pub app: AppInfo,
    pub view_configuration: ViewConfigurationKind,
    pub request_overlay: bool,
}

/// What the runtime reported about the system behind a freshly created instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub runtime_name: String,
    pub system_name: String,
    pub vendor_id: u32,
    pub view_configuration: ViewConfigurationKind,
    pub views: Vec<ViewConfigView>,
    pub blend_modes: Vec<BlendMode>,
    pub overlay_enabled: bool,
    pub blend_mode: BlendMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time: XrTime,
    },
    InstanceLossPending {
        loss_time: XrTime,
    },
    InteractionProfileChanged {
        session: SessionHandle,
    },
    ReferenceSpaceChangePending {
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    },
    EventsLost {
        count: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub format: SwapchainFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub array_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub handle: SwapchainHandle,
    /// Native image names, e.g. GL texture ids.
    pub images: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub predicted_display_time: XrTime,
    pub predicted_display_period: Duration,
    pub should_render: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionLayerView {
    pub swapchain: SwapchainHandle,
    pub image_rect: [i32; 4],
    pub image_array_index: u32,
    pub pose: Pose,
    pub fov: super::Fov,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmittedLayer {
    Projection {
        space: SpaceHandle,
        views: Vec<ProjectionLayerView>,
    },
    Quad {
        space: SpaceHandle,
        swapchain: SwapchainHandle,
        image_rect: [i32; 4],
        pose: Pose,
        size: [f32; 2],
    },
}

impl SubmittedLayer {
    /// Keeps the layers whose space and swapchains pass the lookups, in
    /// order. Also returns the first handle that failed one.
    pub fn retain_known<'a>(
        layers: &'a [SubmittedLayer],
        known_space: impl Fn(SpaceHandle) -> bool,
        known_swapchain: impl Fn(SwapchainHandle) -> bool,
    ) -> (Vec<&'a SubmittedLayer>, Option<u64>) {
        let mut kept = Vec::with_capacity(layers.len());
        let mut unknown = None;
        for layer in layers {
            let missing = match layer {
                SubmittedLayer::Projection { space, .. } | SubmittedLayer::Quad { space, .. }
                    if !known_space(*space) =>
                {
                    Some(space.0)
                }
                SubmittedLayer::Projection { views, .. } => views
                    .iter()
                    .map(|view| view.swapchain)
                    .find(|swapchain| !known_swapchain(*swapchain))
                    .map(|swapchain| swapchain.0),
                SubmittedLayer::Quad { swapchain, .. } => {
                    (!known_swapchain(*swapchain)).then_some(swapchain.0)
                }
            };
            match missing {
                Some(handle) => {
                    unknown.get_or_insert(handle);
                }
                None => kept.push(layer),
            }
        }
        (kept, unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeActionState {
    pub value: ActionValue,
    pub is_active: bool,
    pub changed_since_last_sync: bool,
}

/// Entry-point contract of an OpenXR loader and the runtime behind it.
///
/// Every method maps onto one (or a short, fixed group of) OpenXR calls.
/// Implementations own all native handles; the core only ever sees the
/// opaque handle newtypes.
pub trait XrRuntime: Send {
    fn label(&self) -> &'static str;

    fn create_instance(&mut self, desc: &InstanceDesc) -> RuntimeResult<InstanceInfo>;
    fn destroy_instance(&mut self);
    fn poll_event(&mut self) -> RuntimeResult<Option<RuntimeEvent>>;

    fn create_session(
        &mut self,
        binding: &GraphicsBinding,
        overlay: Option<OverlayPlacement>,
    ) -> RuntimeResult<SessionHandle>;
    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> RuntimeResult<SpaceHandle>;
    fn begin_session(
        &mut self,
        session: SessionHandle,
        view_configuration: ViewConfigurationKind,
    ) -> RuntimeResult<()>;
    fn end_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    fn request_exit_session(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    /// Destroys the session together with every space and swapchain created from it.
    fn destroy_session(&mut self, session: SessionHandle);

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        desc: &SwapchainDesc,
    ) -> RuntimeResult<SwapchainInfo>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);
    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<u32>;
    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout: Duration,
    ) -> RuntimeResult<()>;
    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RuntimeResult<()>;

    fn wait_frame(&mut self, session: SessionHandle, timeout: Duration)
    -> RuntimeResult<FrameTiming>;
    fn begin_frame(&mut self, session: SessionHandle) -> RuntimeResult<()>;
    fn locate_views(
        &mut self,
        session: SessionHandle,
        space: SpaceHandle,
        display_time: XrTime,
    ) -> RuntimeResult<Vec<ViewPose>>;
    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: XrTime,
        blend_mode: BlendMode,
        layers: &[SubmittedLayer],
    ) -> RuntimeResult<()>;

    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        sets: &[ActionSetDesc],
    ) -> RuntimeResult<()>;
    /// Returns `false` when the runtime skipped the sync because the session is not focused.
    fn sync_actions(&mut self, session: SessionHandle) -> RuntimeResult<bool>;
    fn action_state(
        &mut self,
        session: SessionHandle,
        set: &str,
        action: &str,
        space: SpaceHandle,
        display_time: XrTime,
    ) -> RuntimeResult<RuntimeActionState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(space: u64, swapchain: u64) -> SubmittedLayer {
        SubmittedLayer::Quad {
            space: SpaceHandle(space),
            swapchain: SwapchainHandle(swapchain),
            image_rect: [0, 0, 64, 64],
            pose: Pose::IDENTITY,
            size: [1.0, 1.0],
        }
    }

    #[test]
    fn unknown_handles_drop_only_their_layer() {
        let projection = SubmittedLayer::Projection {
            space: SpaceHandle(1),
            views: vec![ProjectionLayerView {
                swapchain: SwapchainHandle(7),
                image_rect: [0, 0, 64, 64],
                image_array_index: 0,
                pose: Pose::IDENTITY,
                fov: super::super::Fov::symmetric(90.0, 90.0),
            }],
        };
        let layers = vec![quad(1, 10), projection, quad(2, 10), quad(1, 11)];

        let (kept, unknown) = SubmittedLayer::retain_known(
            &layers,
            |space| space.0 == 1,
            |swapchain| swapchain.0 == 10 || swapchain.0 == 11,
        );
        assert_eq!(kept, vec![&layers[0], &layers[3]]);
        assert_eq!(unknown, Some(7));
    }

    #[test]
    fn known_layers_pass_through() {
        let layers = vec![quad(1, 10)];
        let (kept, unknown) = SubmittedLayer::retain_known(&layers, |_| true, |_| true);
        assert_eq!(kept.len(), 1);
        assert_eq!(unknown, None);
    }
}
