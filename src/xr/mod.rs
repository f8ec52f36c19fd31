pub mod context;
#[cfg(all(feature = "vr-openxr", target_os = "android"))]
pub mod openxr;
pub mod runtime;
pub mod simulated;

pub use context::XrContext;
pub use runtime::{
    FrameTiming, InstanceDesc, InstanceInfo, ProjectionLayerView, RuntimeActionState,
    RuntimeError, RuntimeEvent, RuntimeResult, SubmittedLayer, SwapchainDesc, SwapchainInfo,
    XrRuntime,
};
pub use simulated::{SimulatedConfig, SimulatedControl, SimulatedRuntime};

use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime-assigned display time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct XrTime(pub i64);

impl XrTime {
    pub fn nanos(self) -> i64 {
        self.0
    }

    pub fn offset(self, nanos: i64) -> Self {
        Self(self.0.saturating_add(nanos))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    /// Quaternion as `[x, y, z, w]`.
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0, 0.0, 0.0],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Field of view as the four half-angles in radians, left and down negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(horizontal_degrees: f32, vertical_degrees: f32) -> Self {
        let h = horizontal_degrees.to_radians() * 0.5;
        let v = vertical_degrees.to_radians() * 0.5;
        Self {
            angle_left: -h,
            angle_right: h,
            angle_up: v,
            angle_down: -v,
        }
    }
}

impl Default for Fov {
    fn default() -> Self {
        Self::symmetric(90.0, 90.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewPose {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfigView {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_samples: u32,
}

impl ViewConfigView {
    pub fn from_resolution(resolution: [u32; 2]) -> Self {
        Self {
            recommended_width: resolution[0],
            recommended_height: resolution[1],
            max_width: resolution[0] * 2,
            max_height: resolution[1] * 2,
            recommended_samples: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

impl BlendMode {
    /// First preferred mode the system offers, falling back to opaque.
    pub fn select(preferences: &[BlendMode], available: &[BlendMode]) -> BlendMode {
        preferences
            .iter()
            .copied()
            .find(|mode| available.contains(mode))
            .unwrap_or(BlendMode::Opaque)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewConfigurationKind {
    PrimaryMono,
    PrimaryStereo,
}

impl ViewConfigurationKind {
    pub fn view_count(self) -> usize {
        match self {
            ViewConfigurationKind::PrimaryMono => 1,
            ViewConfigurationKind::PrimaryStereo => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpaceKind {
    View,
    Local,
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapchainFormat {
    Rgba8,
    Srgb8Alpha8,
}

impl SwapchainFormat {
    pub fn gl_internal_format(self) -> i64 {
        match self {
            SwapchainFormat::Rgba8 => 0x8058,
            SwapchainFormat::Srgb8Alpha8 => 0x8C43,
        }
    }
}

/// Graphics API handles the session is bound to. EGL handles are carried as
/// raw addresses so the binding can cross the platform channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsBinding {
    OpenGlEs {
        display: usize,
        config: usize,
        context: usize,
    },
    Headless,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
}

/// Session layer placement requested through `XR_EXTX_overlay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayPlacement(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Recoverable,
    Expected,
    Transient,
    ContractViolation,
}

#[derive(Debug, Error)]
pub enum XrError {
    #[error("no compatible OpenXR runtime: {0}")]
    RuntimeUnavailable(String),
    #[error("OpenXR instance lost: {0}")]
    InstanceLost(String),
    #[error("session lost: {0}")]
    SessionLost(String),
    #[error("frame skipped: runtime requested no rendering")]
    FrameSkipped,
    #[error("swapchain for view {view} still has image {image} checked out")]
    SwapchainExhausted { view: usize, image: u32 },
    #[error("action '{0}' has not been synced in this session")]
    StaleAction(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("view {view} out of range ({count} views)")]
    InvalidView { view: usize, count: usize },
    #[error("frame protocol violation: {0}")]
    FrameOrder(&'static str),
    #[error("session is not running (state {0:?})")]
    NotRunning(SessionState),
    #[error("runtime reported transition {from:?} -> {to:?} outside the lifecycle graph")]
    InvalidTransition { from: SessionState, to: SessionState },
    #[error("runtime call failed: {0}")]
    Runtime(RuntimeError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl XrError {
    pub fn severity(&self) -> Severity {
        match self {
            XrError::RuntimeUnavailable(_) | XrError::InstanceLost(_) | XrError::Config(_) => {
                Severity::Fatal
            }
            XrError::SessionLost(_) => Severity::Recoverable,
            XrError::FrameSkipped => Severity::Expected,
            XrError::NotRunning(_) | XrError::Runtime(_) | XrError::InvalidTransition { .. } => {
                Severity::Transient
            }
            XrError::SwapchainExhausted { .. }
            | XrError::StaleAction(_)
            | XrError::UnknownAction(_)
            | XrError::InvalidView { .. }
            | XrError::FrameOrder(_) => Severity::ContractViolation,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<RuntimeError> for XrError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::LoaderMissing(reason) | RuntimeError::SystemUnavailable(reason) => {
                XrError::RuntimeUnavailable(reason)
            }
            RuntimeError::ExtensionMissing(name) => {
                XrError::RuntimeUnavailable(format!("required extension {name} not supported"))
            }
            RuntimeError::SessionLost => XrError::SessionLost("runtime reported loss".into()),
            RuntimeError::InstanceLost => XrError::InstanceLost("runtime reported loss".into()),
            other => XrError::Runtime(other),
        }
    }
}

pub type XrResult<T> = Result<T, XrError>;
