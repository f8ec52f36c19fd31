use crate::app::ContractPolicy;
use crate::frame::FrameDriverConfig;
use crate::input::{ActionMapper, ActionSetDesc};
use crate::render::RenderConfig;
use crate::session::SessionConfig;
use crate::xr::{
    AppInfo, BlendMode, OverlayPlacement, ReferenceSpaceKind, SwapchainFormat,
    ViewConfigurationKind, XrError,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MAX_WAIT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for XrError {
    fn from(value: ConfigError) -> Self {
        XrError::Config(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub version: u32,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "XR Overlay".into(),
            version: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySection {
    /// Request an `XR_EXTX_overlay` session when the runtime offers the extension.
    pub enabled: bool,
    /// Fail initialization instead of falling back to a regular session.
    pub required: bool,
    pub placement: u32,
}

impl Default for OverlaySection {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            placement: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub view_configuration: ViewConfigurationKind,
    pub reference_space: ReferenceSpaceKind,
    pub overlay: OverlaySection,
    pub blend_preference: Vec<BlendMode>,
    pub max_events_per_poll: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            view_configuration: ViewConfigurationKind::PrimaryStereo,
            reference_space: ReferenceSpaceKind::View,
            overlay: OverlaySection::default(),
            blend_preference: vec![BlendMode::AlphaBlend, BlendMode::Additive, BlendMode::Opaque],
            max_events_per_poll: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSection {
    pub format: SwapchainFormat,
    pub sample_count: u32,
    pub frame_wait_timeout_ms: u64,
    pub image_wait_timeout_ms: u64,
    /// Sleep between loop iterations while no session is running.
    pub idle_poll_ms: u64,
}

impl Default for FrameSection {
    fn default() -> Self {
        Self {
            format: SwapchainFormat::Rgba8,
            sample_count: 1,
            frame_wait_timeout_ms: 100,
            image_wait_timeout_ms: 100,
            idle_poll_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSection {
    /// Register the built-in controller action set.
    pub default_bindings: bool,
    pub action_sets: Vec<ActionSetDesc>,
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            default_bindings: true,
            action_sets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub session: SessionSection,
    pub frame: FrameSection,
    pub input: InputSection,
    pub render: RenderConfig,
    pub contract_policy: ContractPolicy,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        log::debug!("[config] loaded {}", path.display());
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = self.to_json_pretty()?;
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, json).map_err(io_error)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid(reason));

        if self.app.name.trim().is_empty() {
            return invalid("app.name must not be empty".into());
        }
        if self.session.max_events_per_poll == 0 {
            return invalid("session.max_events_per_poll must be at least 1".into());
        }
        if self.session.blend_preference.is_empty() {
            return invalid("session.blend_preference must list at least one mode".into());
        }
        if self.session.overlay.required && !self.session.overlay.enabled {
            return invalid("session.overlay.required needs session.overlay.enabled".into());
        }
        if !(1..=8).contains(&self.frame.sample_count) {
            return invalid(format!(
                "frame.sample_count {} outside 1..=8",
                self.frame.sample_count
            ));
        }
        for (name, value) in [
            ("frame.frame_wait_timeout_ms", self.frame.frame_wait_timeout_ms),
            ("frame.image_wait_timeout_ms", self.frame.image_wait_timeout_ms),
        ] {
            if value == 0 || value > MAX_WAIT_MS {
                return invalid(format!("{name} {value} outside 1..={MAX_WAIT_MS}"));
            }
        }
        if self.frame.idle_poll_ms > MAX_WAIT_MS {
            return invalid(format!(
                "frame.idle_poll_ms {} exceeds {MAX_WAIT_MS}",
                self.frame.idle_poll_ms
            ));
        }
        if !(self.render.near_z > 0.0 && self.render.far_z > self.render.near_z) {
            return invalid(format!(
                "render clip planes must satisfy 0 < near_z < far_z (got {} / {})",
                self.render.near_z, self.render.far_z
            ));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        let overlay = &self.session.overlay;
        SessionConfig {
            app: AppInfo {
                application_name: self.app.name.clone(),
                application_version: self.app.version,
                engine_name: env!("CARGO_PKG_NAME").into(),
                engine_version: 1,
            },
            view_configuration: self.session.view_configuration,
            reference_space: self.session.reference_space,
            overlay: overlay.enabled.then_some(OverlayPlacement(overlay.placement)),
            overlay_required: overlay.required,
            blend_preference: self.session.blend_preference.clone(),
            max_events_per_poll: self.session.max_events_per_poll,
        }
    }

    pub fn frame_config(&self) -> FrameDriverConfig {
        FrameDriverConfig {
            format: self.frame.format,
            sample_count: self.frame.sample_count,
            frame_wait_timeout: Duration::from_millis(self.frame.frame_wait_timeout_ms),
            image_wait_timeout: Duration::from_millis(self.frame.image_wait_timeout_ms),
        }
    }

    pub fn action_mapper(&self) -> Result<ActionMapper, XrError> {
        let mut mapper = if self.input.default_bindings {
            ActionMapper::with_default_bindings()
        } else {
            ActionMapper::new()
        };
        for set in &self.input.action_sets {
            mapper.register_action_set(set.clone())?;
        }
        Ok(mapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ActionDesc, ActionKind};

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().expect("default config is valid");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = AppConfig::from_json_str(
            r#"{ "session": { "reference_space": "local", "overlay": { "enabled": false } } }"#,
        )
        .expect("parse");
        assert_eq!(config.session.reference_space, ReferenceSpaceKind::Local);
        assert_eq!(config.session.max_events_per_poll, 64);
        assert_eq!(config.session_config().overlay, None);
        assert_eq!(config.frame, FrameSection::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = AppConfig::from_json_str(r#"{ "frame": { "frame_wait_timeout_ms": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_json_str(r#"{ "render": { "near_z": 5.0, "far_z": 1.0 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("near_z"));

        let err = AppConfig::from_json_str(r#"{ "session": { "blend_preference": [] } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            AppConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn write_then_load_through_a_file() {
        let tmp_dir = tempfile::tempdir().expect("tmpdir");
        let path = tmp_dir.path().join("nested").join("xr_overlay.json");
        let mut config = AppConfig::default();
        config.session.overlay.required = true;
        config.write_json(&path).expect("write config");

        let loaded = AppConfig::load(&path).expect("load config");
        assert_eq!(loaded, config);
        assert!(loaded.session_config().overlay_required);
    }

    #[test]
    fn missing_file_reports_path() {
        let tmp_dir = tempfile::tempdir().expect("tmpdir");
        let path = tmp_dir.path().join("absent.json");
        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn extra_action_sets_are_registered() {
        let mut config = AppConfig::default();
        config.input.default_bindings = false;
        config.input.action_sets.push(ActionSetDesc {
            name: "tools".into(),
            localized_name: "Tools".into(),
            priority: 1,
            actions: vec![ActionDesc {
                name: "select".into(),
                localized_name: "Select".into(),
                kind: ActionKind::Boolean,
                subaction_paths: Vec::new(),
            }],
            bindings: Vec::new(),
        });
        let mapper = config.action_mapper().expect("mapper");
        assert_eq!(mapper.action_names().collect::<Vec<_>>(), vec!["select"]);
    }

    #[test]
    fn session_config_carries_overlay_placement() {
        let session = AppConfig::default().session_config();
        assert_eq!(session.overlay, Some(OverlayPlacement(1)));
        assert_eq!(session.reference_space, ReferenceSpaceKind::View);
        assert_eq!(session.blend_preference[0], BlendMode::AlphaBlend);
    }
}
