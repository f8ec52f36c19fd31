mod math;
mod overlay;

pub use math::Mat4;
pub use overlay::{
    DrawCommand, OverlayQuad, OverlayRenderer, OverlayScene, TapTarget, screen_to_ndc, tap_target,
};

use crate::frame::{FrameState, FrameSubmission, ImageToken};
use crate::xr::{ViewPose, XrTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    Null,
    Overlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub renderer: RendererKind,
    pub near_z: f32,
    pub far_z: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Overlay,
            near_z: 0.1,
            far_z: 100.0,
        }
    }
}

impl RenderConfig {
    pub fn build(&self) -> Box<dyn LayerRenderer> {
        match self.renderer {
            RendererKind::Null => Box::new(NullLayerRenderer::default()),
            RendererKind::Overlay => Box::new(OverlayRenderer::new(
                OverlayScene::default(),
                self.near_z,
                self.far_z,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInputs {
    pub frame_index: u64,
    pub delta_seconds: f32,
    pub elapsed_seconds: f32,
    pub display_time: XrTime,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer expected {expected} views but frame has {got}")]
    ViewMismatch { expected: usize, got: usize },
    #[error("render backend failure: {0}")]
    Backend(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Draws one view of a frame into a checked-out swapchain image.
pub trait LayerRenderer: Send {
    fn label(&self) -> &'static str;

    fn render_view(
        &mut self,
        view_index: usize,
        image: &ImageToken,
        view: &ViewPose,
        inputs: &FrameInputs,
    ) -> RenderResult<()>;

    /// Layers to submit once every view was rendered.
    fn compose(&mut self, frame: &FrameState) -> FrameSubmission {
        FrameSubmission::projection(frame)
    }
}

#[derive(Debug, Default)]
pub struct NullLayerRenderer {
    rendered_views: u64,
}

impl NullLayerRenderer {
    pub fn rendered_views(&self) -> u64 {
        self.rendered_views
    }
}

impl LayerRenderer for NullLayerRenderer {
    fn label(&self) -> &'static str {
        "Null Layer Renderer"
    }

    fn render_view(
        &mut self,
        view_index: usize,
        image: &ImageToken,
        _view: &ViewPose,
        inputs: &FrameInputs,
    ) -> RenderResult<()> {
        log::trace!(
            "[render] frame {} view {view_index} -> image {}",
            inputs.frame_index,
            image.image_index()
        );
        self.rendered_views += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDriver, FrameDriverConfig};
    use crate::platform::LifecycleSignal;
    use crate::session::{SessionConfig, SessionManager};
    use crate::xr::{GraphicsBinding, SimulatedRuntime, XrContext, XrError};

    fn running() -> (XrContext, SessionManager, FrameDriver) {
        let mut ctx = XrContext::new(Box::new(SimulatedRuntime::default()));
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
        (ctx, session, FrameDriver::new(FrameDriverConfig::default()))
    }

    fn render_frame(renderer: &mut dyn LayerRenderer) -> Result<FrameState, XrError> {
        let (mut ctx, session, mut frames) = running();
        let frame = frames.begin_frame(&mut ctx, &session)?;
        let inputs = FrameInputs {
            frame_index: frame.frame_index,
            delta_seconds: 0.0,
            elapsed_seconds: 0.0,
            display_time: frame.predicted_display_time,
        };
        for (view, pose) in frame.views.iter().enumerate() {
            let token = frames.acquire_image(&mut ctx, view)?;
            renderer
                .render_view(view, &token, pose, &inputs)
                .expect("render");
            frames.release_image(&mut ctx, token)?;
        }
        let submission = renderer.compose(&frame);
        frames.end_frame(&mut ctx, &session, submission)?;
        Ok(frame)
    }

    #[test]
    fn null_renderer_counts_views() {
        let mut renderer = NullLayerRenderer::default();
        render_frame(&mut renderer).expect("frame");
        assert_eq!(renderer.rendered_views(), 2);
    }

    #[test]
    fn overlay_renderer_records_scene_per_view() {
        let mut renderer = OverlayRenderer::default();
        render_frame(&mut renderer).expect("frame");

        let commands = renderer.commands();
        assert_eq!(commands.len(), 2 * renderer.scene().quads.len());
        assert_eq!(commands[0].quad, "background");
        assert!(!commands[0].blended);
        assert!(commands[1].blended);
        assert_eq!(commands[3].view, 1);

        // Eye offsets shift the background quad in opposite directions.
        let left = commands[0].mvp.transform_point([0.0, 0.0, 0.0]);
        let right = commands[3].mvp.transform_point([0.0, 0.0, 0.0]);
        assert!(left[0] / left[3] > right[0] / right[3]);
    }

    #[test]
    fn config_builds_requested_renderer() {
        let config = RenderConfig {
            renderer: RendererKind::Null,
            ..Default::default()
        };
        assert_eq!(config.build().label(), "Null Layer Renderer");
        assert_eq!(RenderConfig::default().build().label(), "Overlay Renderer");
    }
}
