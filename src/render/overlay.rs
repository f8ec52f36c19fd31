use super::{FrameInputs, LayerRenderer, Mat4, RenderResult};
use crate::frame::ImageToken;
use crate::xr::ViewPose;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayQuad {
    pub name: &'static str,
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub alpha: f32,
}

impl OverlayQuad {
    pub fn is_translucent(&self) -> bool {
        self.alpha < 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapTarget {
    Blue,
    Magenta,
    Green,
    Background,
}

impl TapTarget {
    pub fn label(self) -> &'static str {
        match self {
            TapTarget::Blue => "blue quad",
            TapTarget::Magenta => "magenta quad",
            TapTarget::Green => "green quad",
            TapTarget::Background => "background",
        }
    }
}

/// Screen-space tap boxes as `[min_x, max_x, min_y, max_y]` in NDC, tested in order.
const TAP_BOXES: [(TapTarget, [f32; 4]); 3] = [
    (TapTarget::Blue, [-0.65, -0.15, 0.15, 0.65]),
    (TapTarget::Magenta, [-0.25, 0.25, -0.25, 0.25]),
    (TapTarget::Green, [0.15, 0.65, -0.25, 0.25]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayScene {
    pub clear_color: [f32; 4],
    /// Drawn in order: the opaque background first, translucent quads after.
    pub quads: Vec<OverlayQuad>,
}

impl Default for OverlayScene {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.2, 0.3, 1.0],
            quads: vec![
                OverlayQuad {
                    name: "background",
                    position: [0.0, 0.0, -3.0],
                    color: [0.2, 0.3, 0.8],
                    alpha: 1.0,
                },
                OverlayQuad {
                    name: "red",
                    position: [0.3, 0.2, -1.5],
                    color: [1.0, 0.2, 0.2],
                    alpha: 0.7,
                },
                OverlayQuad {
                    name: "green",
                    position: [-0.3, -0.2, -2.0],
                    color: [0.2, 1.0, 0.2],
                    alpha: 0.6,
                },
            ],
        }
    }
}

impl OverlayScene {
    /// Which element a tap at the given NDC position lands on.
    pub fn hit_test(ndc_x: f32, ndc_y: f32) -> TapTarget {
        TAP_BOXES
            .iter()
            .find(|(_, [min_x, max_x, min_y, max_y])| {
                ndc_x > *min_x && ndc_x < *max_x && ndc_y > *min_y && ndc_y < *max_y
            })
            .map_or(TapTarget::Background, |(target, _)| *target)
    }
}

/// Converts window pixel coordinates to NDC with +Y up.
pub fn screen_to_ndc(x: f32, y: f32, width: u32, height: u32) -> Option<(f32, f32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let ndc_x = (x / width as f32) * 2.0 - 1.0;
    let ndc_y = -((y / height as f32) * 2.0 - 1.0);
    Some((ndc_x, ndc_y))
}

/// Resolves a touch at window pixel `(x, y)` to the element under it.
pub fn tap_target(x: f32, y: f32, width: u32, height: u32) -> Option<TapTarget> {
    let (ndc_x, ndc_y) = screen_to_ndc(x, y, width, height)?;
    let target = OverlayScene::hit_test(ndc_x, ndc_y);
    log::info!("[render] {} tapped", target.label());
    Some(target)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub view: usize,
    pub native_image: u64,
    pub quad: &'static str,
    pub color: [f32; 3],
    pub alpha: f32,
    pub blended: bool,
    pub mvp: Mat4,
}

/// Records the overlay scene as per-view draw commands.
pub struct OverlayRenderer {
    scene: OverlayScene,
    near_z: f32,
    far_z: f32,
    commands: Vec<DrawCommand>,
    frame_index: u64,
}

impl OverlayRenderer {
    pub fn new(scene: OverlayScene, near_z: f32, far_z: f32) -> Self {
        Self {
            scene,
            near_z,
            far_z,
            commands: Vec::new(),
            frame_index: 0,
        }
    }

    pub fn scene(&self) -> &OverlayScene {
        &self.scene
    }

    /// Draw commands recorded for the most recent frame.
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(OverlayScene::default(), 0.1, 100.0)
    }
}

impl LayerRenderer for OverlayRenderer {
    fn label(&self) -> &'static str {
        "Overlay Renderer"
    }

    fn render_view(
        &mut self,
        view_index: usize,
        image: &ImageToken,
        view: &ViewPose,
        inputs: &FrameInputs,
    ) -> RenderResult<()> {
        if inputs.frame_index != self.frame_index {
            self.commands.clear();
            self.frame_index = inputs.frame_index;
        }
        let view_projection = Mat4::projection_from_fov(&view.fov, self.near_z, self.far_z)
            * Mat4::view_from_pose(&view.pose);

        for quad in &self.scene.quads {
            let [x, y, z] = quad.position;
            self.commands.push(DrawCommand {
                view: view_index,
                native_image: image.native_image(),
                quad: quad.name,
                color: quad.color,
                alpha: quad.alpha,
                blended: quad.is_translucent(),
                mvp: view_projection * Mat4::translation(x, y, z),
            });
        }
        Ok(())
    }
}
