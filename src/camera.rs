// camera.rs - 由视角状态 (yaw/pitch/roll + FOV) 生成 view / projection 矩阵
//
// 相机固定在球心, 只有朝向变化.
// 世界坐标: +Y 向上, -Z 为 yaw=0 (北), +X 为 yaw=+90° (东).

use glam::{Mat4, Quat, Vec3};

use crate::arbiter::ViewState;
use crate::config::CameraConfig;

pub const PITCH_LIMIT: f32 = 90.0;

pub fn wrap_degrees(deg: f32) -> f32 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

pub fn direction(yaw_deg: f32, pitch_deg: f32) -> Vec3 {
    let (sy, cy) = yaw_deg.to_radians().sin_cos();
    let (sp, cp) = pitch_deg.to_radians().sin_cos();
    Vec3::new(sy * cp, sp, -cy * cp)
}

pub fn rotation(yaw_deg: f32, pitch_deg: f32, roll_deg: f32) -> Quat {
    Quat::from_rotation_y(-yaw_deg.to_radians())
        * Quat::from_rotation_x(pitch_deg.to_radians())
        * Quat::from_rotation_z(roll_deg.to_radians())
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Angles {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Angles {
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    // 正上/正下时 yaw 没有意义
    pub fn from_quat(q: Quat) -> Self {
        let forward = q * Vec3::NEG_Z;
        let yaw = forward.x.atan2(-forward.z).to_degrees();
        let pitch = forward.y.clamp(-1.0, 1.0).asin().to_degrees();

        // 去掉 yaw/pitch 后剩下的就是绕视线的 roll
        let residual = rotation(yaw, pitch, 0.0).conjugate() * q;
        let roll = wrap_degrees((2.0 * residual.z.atan2(residual.w)).to_degrees());

        Self { yaw, pitch, roll }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTransform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub rotation: Quat,
    // [-180, 180)
    pub yaw: f32,
    // [-90, 90]
    pub pitch: f32,
    pub roll: f32,
    pub fov_y_deg: f32,
    pub aspect: f32,
}

impl CameraTransform {
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }
}

pub struct CameraController {
    config: CameraConfig,
    viewport: Viewport,
}

impl CameraController {
    pub fn new(config: CameraConfig, viewport: Viewport) -> Self {
        Self { config, viewport }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if !viewport.is_empty() {
            self.viewport = viewport;
        }
    }

    pub fn set_free_roll(&mut self, free_roll: bool) {
        self.config.free_roll = free_roll;
    }

    pub fn transform(&self, state: &ViewState) -> CameraTransform {
        let yaw = wrap_degrees(state.yaw);
        let pitch = if state.pitch.is_finite() {
            state.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT)
        } else {
            0.0
        };
        let roll = if self.config.free_roll {
            wrap_degrees(state.roll)
        } else {
            0.0
        };
        let fov_y_deg = state
            .fov_deg
            .clamp(self.config.min_fov_deg, self.config.max_fov_deg);
        let aspect = self.viewport.aspect();

        let rotation = rotation(yaw, pitch, roll);
        // View matrix is the inverse of the camera's world transform; the camera sits at the origin.
        let view = Mat4::from_quat(rotation.conjugate());
        let projection =
            Mat4::perspective_rh(fov_y_deg.to_radians(), aspect, self.config.near, self.config.far);

        CameraTransform {
            view,
            projection,
            view_projection: projection * view,
            rotation,
            yaw,
            pitch,
            roll,
            fov_y_deg,
            aspect,
        }
    }
}
