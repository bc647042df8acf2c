// arbiter.rs - 传感器 / 手动拖拽 的控制权仲裁
//
// 三个状态:
//   Sensor   (初始) 视角跟随传感器
//   Manual   拖拽中, 视角跟随手指
//   Blending 松手后在固定时长内缓动回传感器视角
//
// 触摸事件先排队, 在下一次帧 tick 开始时一次性应用, 不会在帧中途改变视角.

use crate::camera::{wrap_degrees, Angles, Viewport, PITCH_LIMIT};
use crate::config::{CameraConfig, InputConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Sensor,
    Manual,
    Blending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub fov_deg: f32,
    pub mode: InputMode,
}

impl ViewState {
    pub fn angles(&self) -> Angles {
        Angles::new(self.yaw, self.pitch, self.roll)
    }
}

// 屏幕像素坐标 (左上角为原点, y 向下)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    DragBegin { x: f32, y: f32 },
    DragMove { x: f32, y: f32 },
    DragEnd,
    Pinch { scale: f32 },
    ZoomBy { degrees: f32 },
    SetFov { degrees: f32 },
}

#[derive(Debug, Clone, Copy)]
struct Blend {
    from: Angles,
    elapsed: f32,
}

// smoothstep
fn ease(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub struct InputArbiter {
    config: InputConfig,
    min_fov: f32,
    max_fov: f32,
    state: ViewState,
    pending: Vec<TouchEvent>,
    drag_anchor: Option<(f32, f32)>,
    blend: Option<Blend>,
}

impl InputArbiter {
    pub fn new(config: InputConfig, camera: &CameraConfig) -> Self {
        Self {
            config,
            min_fov: camera.min_fov_deg,
            max_fov: camera.max_fov_deg,
            state: ViewState {
                yaw: 0.0,
                pitch: 0.0,
                roll: 0.0,
                fov_deg: camera.fov_deg.clamp(camera.min_fov_deg, camera.max_fov_deg),
                mode: InputMode::Sensor,
            },
            pending: Vec::new(),
            drag_anchor: None,
            blend: None,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn mode(&self) -> InputMode {
        self.state.mode
    }

    pub fn queue(&mut self, event: TouchEvent) {
        self.pending.push(event);
    }

    pub fn set_fov(&mut self, degrees: f32) {
        if degrees.is_finite() {
            self.state.fov_deg = degrees.clamp(self.min_fov, self.max_fov);
        }
    }

    // sensor 为 None: 还没有姿态估计, 只能手动控制
    pub fn tick(&mut self, dt: f32, sensor: Option<Angles>, viewport: Viewport) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        for event in std::mem::take(&mut self.pending) {
            self.apply(event, viewport);
        }

        match self.state.mode {
            InputMode::Sensor => {
                if let Some(target) = sensor {
                    self.set_angles(target);
                }
            }
            InputMode::Manual => {}
            InputMode::Blending => self.step_blend(dt, sensor),
        }
    }

    fn apply(&mut self, event: TouchEvent, viewport: Viewport) {
        match event {
            TouchEvent::DragBegin { x, y } => {
                if self.state.mode != InputMode::Manual {
                    log::debug!("{:?} -> Manual", self.state.mode);
                }
                // 从当前显示的角度开始拖, 放弃进行中的缓动
                self.blend = None;
                self.state.mode = InputMode::Manual;
                self.drag_anchor = Some((x, y));
            }
            TouchEvent::DragMove { x, y } => {
                if self.state.mode != InputMode::Manual {
                    return;
                }
                if let Some((last_x, last_y)) = self.drag_anchor {
                    self.drag_by(x - last_x, y - last_y, viewport);
                }
                self.drag_anchor = Some((x, y));
            }
            TouchEvent::DragEnd => {
                self.drag_anchor = None;
                if self.state.mode == InputMode::Manual {
                    log::debug!("Manual -> Blending");
                    self.state.mode = InputMode::Blending;
                    self.blend = Some(Blend {
                        from: self.state.angles(),
                        elapsed: 0.0,
                    });
                }
            }
            TouchEvent::Pinch { scale } => {
                if scale.is_finite() && scale > 0.0 {
                    self.set_fov(self.state.fov_deg / scale);
                }
            }
            TouchEvent::ZoomBy { degrees } => self.set_fov(self.state.fov_deg + degrees),
            TouchEvent::SetFov { degrees } => self.set_fov(degrees),
        }
    }

    fn drag_by(&mut self, dx: f32, dy: f32, viewport: Viewport) {
        if viewport.is_empty() || !dx.is_finite() || !dy.is_finite() {
            return;
        }
        let width = viewport.width as f32;
        let height = viewport.height as f32;

        let v_f = self.state.fov_deg.to_radians();
        let h_f = 2.0 * ((v_f / 2.0).tan() * viewport.aspect()).atan();

        let yaw_per_px_deg = (h_f / width).to_degrees();
        let pitch_per_px_deg = (v_f / height).to_degrees();
        let sensitivity = self.config.drag_sensitivity;

        // 抓取式拖拽: 手指向右拖, 画面跟着右移, 视线向左转
        self.state.yaw = wrap_degrees(self.state.yaw - dx * yaw_per_px_deg * sensitivity);
        self.state.pitch = (self.state.pitch + dy * pitch_per_px_deg * sensitivity)
            .clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    fn step_blend(&mut self, dt: f32, sensor: Option<Angles>) {
        let Some(blend) = self.blend.as_mut() else {
            self.state.mode = InputMode::Sensor;
            return;
        };
        let Some(target) = sensor else {
            // 没有传感器就停在手动视角
            self.finish_blend();
            return;
        };

        blend.elapsed += dt;
        let duration = self.config.blend_duration_s;
        let t = if duration > 0.0 { blend.elapsed / duration } else { 1.0 };

        if t >= 1.0 {
            self.set_angles(target);
            self.finish_blend();
            return;
        }

        let from = blend.from;
        let e = ease(t);
        self.state.yaw = wrap_degrees(from.yaw + wrap_degrees(target.yaw - from.yaw) * e);
        self.state.pitch = from.pitch + (target.pitch - from.pitch) * e;
        self.state.roll = wrap_degrees(from.roll + wrap_degrees(target.roll - from.roll) * e);
    }

    fn finish_blend(&mut self) {
        log::debug!("Blending -> Sensor");
        self.blend = None;
        self.state.mode = InputMode::Sensor;
    }

    fn set_angles(&mut self, angles: Angles) {
        self.state.yaw = wrap_degrees(angles.yaw);
        self.state.pitch = angles.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.state.roll = wrap_degrees(angles.roll);
    }
}
