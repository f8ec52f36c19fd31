use crate::xr::{Fov, Pose};
use std::ops::Mul;

/// Column-major 4x4 matrix, laid out the way `glUniformMatrix4fv` expects it.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.cols[3] = [x, y, z, 1.0];
        m
    }

    pub fn scale(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.cols[0][0] = x;
        m.cols[1][1] = y;
        m.cols[2][2] = z;
        m
    }

    /// OpenGL clip-space projection for an asymmetric field of view.
    pub fn projection_from_fov(fov: &Fov, near: f32, far: f32) -> Self {
        let tan_left = fov.angle_left.tan();
        let tan_right = fov.angle_right.tan();
        let tan_down = fov.angle_down.tan();
        let tan_up = fov.angle_up.tan();
        let width = tan_right - tan_left;
        let height = tan_up - tan_down;

        Mat4 {
            cols: [
                [2.0 / width, 0.0, 0.0, 0.0],
                [0.0, 2.0 / height, 0.0, 0.0],
                [
                    (tan_right + tan_left) / width,
                    (tan_up + tan_down) / height,
                    -(far + near) / (far - near),
                    -1.0,
                ],
                [0.0, 0.0, -2.0 * far * near / (far - near), 0.0],
            ],
        }
    }

    /// Inverse of the rigid transform described by `pose`.
    pub fn view_from_pose(pose: &Pose) -> Self {
        let [qx, qy, qz, qw] = pose.orientation;
        let (x2, y2, z2) = (qx + qx, qy + qy, qz + qz);
        let (xx, xy, xz) = (qx * x2, qx * y2, qx * z2);
        let (yy, yz, zz) = (qy * y2, qy * z2, qz * z2);
        let (wx, wy, wz) = (qw * x2, qw * y2, qw * z2);

        // Rows of the rotation matrix, i.e. columns of its transpose.
        let r0 = [1.0 - (yy + zz), xy - wz, xz + wy];
        let r1 = [xy + wz, 1.0 - (xx + zz), yz - wx];
        let r2 = [xz - wy, yz + wx, 1.0 - (xx + yy)];
        let [px, py, pz] = pose.position;
        let dot = |col: usize| -(r0[col] * px + r1[col] * py + r2[col] * pz);

        Mat4 {
            cols: [
                [r0[0], r0[1], r0[2], 0.0],
                [r1[0], r1[1], r1[2], 0.0],
                [r2[0], r2[1], r2[2], 0.0],
                [dot(0), dot(1), dot(2), 1.0],
            ],
        }
    }

    pub fn transform_point(&self, point: [f32; 3]) -> [f32; 4] {
        let [x, y, z] = point;
        let mut out = [0.0; 4];
        for (row, value) in out.iter_mut().enumerate() {
            *value = self.cols[0][row] * x
                + self.cols[1][row] * y
                + self.cols[2][row] * z
                + self.cols[3][row];
        }
        out
    }

    pub fn as_array(&self) -> &[f32; 16] {
        bytemuck::cast_ref(self)
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for (col, out_col) in out.iter_mut().enumerate() {
            for (row, value) in out_col.iter_mut().enumerate() {
                *value = (0..4)
                    .map(|k| self.cols[k][row] * rhs.cols[col][k])
                    .sum();
            }
        }
        Mat4 { cols: out }
    }
}
