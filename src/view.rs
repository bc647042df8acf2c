// view.rs - 全景视图的生命周期: 宿主程序唯一需要接触的对象
//
// 构造时加载照片并启动传感器; 宿主每个显示帧调用 tick(); stop_update() 停止传感器
// 与帧循环 (可重复调用). 所有错误都在内部降级处理, 通过 status() 暴露.

use crate::arbiter::{InputArbiter, InputMode, TouchEvent, ViewState};
use crate::camera::{CameraController, CameraTransform, Viewport};
use crate::config::ViewConfig;
use crate::error::{RenderError, ViewError};
use crate::fusion::{Orientation, OrientationEstimator};
use crate::panorama::PhotoLibrary;
use crate::renderer::{PanoramaRenderer, RenderBackend};
use crate::sensor::{MotionDevice, SampleSlot, SensorSet, SensorSource};

#[derive(Debug, Clone, PartialEq)]
pub struct ViewStatus {
    pub photo: String,
    pub texture_loaded: bool,
    pub sensors: SensorSet,
    pub sensors_running: bool,
    pub orientation_ready: bool,
    pub mode: InputMode,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_deg: f32,
    pub frames: u64,
    pub fps: f32,
    pub rejected_samples: u64,
    pub stopped: bool,
    pub last_error: Option<ViewError>,
}

#[derive(Default)]
struct FrameCounter {
    frames: u32,
    elapsed: f32,
    fps: f32,
}

impl FrameCounter {
    fn tick(&mut self, dt: f32) {
        self.frames += 1;
        self.elapsed += dt;
        if self.elapsed >= 1.0 {
            self.fps = self.frames as f32 / self.elapsed;
            self.frames = 0;
            self.elapsed = 0.0;
        }
    }
}

pub struct PanoramaView<B: RenderBackend> {
    photo: String,
    config: ViewConfig,
    sensors: SensorSource,
    slot: SampleSlot,
    available: SensorSet,
    estimator: OrientationEstimator,
    arbiter: InputArbiter,
    camera: CameraController,
    renderer: PanoramaRenderer,
    backend: B,
    last_transform: Option<CameraTransform>,
    last_error: Option<ViewError>,
    rejected_samples: u64,
    counter: FrameCounter,
    stopped: bool,
}

impl<B: RenderBackend> PanoramaView<B> {
    /// Build a view of `photo`, start the sensors and make it ready to tick.
    /// Never fails: problems leave the view degraded and show up in [`PanoramaView::status`].
    pub fn new(
        photo: &str,
        library: &dyn PhotoLibrary,
        device: Box<dyn MotionDevice>,
        mut backend: B,
        viewport: Viewport,
        config: ViewConfig,
    ) -> Self {
        let config = config.validated();
        let mut last_error = None;

        let mut sensors = SensorSource::new(device, config.sensor.rate_hz);
        let slot = sensors.slot();
        let available = sensors.start();
        let missing = sensors.available().missing();
        if !missing.is_empty() {
            last_error = Some(ViewError::SensorUnavailable { missing });
        }

        backend.resize(viewport);
        let mut renderer = PanoramaRenderer::new(config.render.clone());
        if let Err(e) = renderer.load(photo, library, &mut backend) {
            log::warn!("{}, showing placeholder", e);
            last_error = Some(e);
        }

        log::info!("Panorama view '{}' started", photo);
        Self {
            photo: photo.to_owned(),
            estimator: OrientationEstimator::new(config.fusion.clone()),
            arbiter: InputArbiter::new(config.input.clone(), &config.camera),
            camera: CameraController::new(config.camera.clone(), viewport),
            config,
            sensors,
            slot,
            available,
            renderer,
            backend,
            last_transform: None,
            last_error,
            rejected_samples: 0,
            counter: FrameCounter::default(),
            stopped: false,
        }
    }

    /// One display frame: consume the newest sample, arbitrate, build the camera
    /// and draw. Returns `None` once the view is stopped.
    pub fn tick(&mut self, dt: f32) -> Option<CameraTransform> {
        if self.stopped {
            return None;
        }

        // 只取最新一帧, 没有新数据就沿用上一次的姿态
        if let Some(sample) = self.slot.take() {
            if let Err(e) = self.estimator.update(&sample) {
                self.rejected_samples += 1;
                if self.rejected_samples == 1 || self.rejected_samples % 100 == 0 {
                    log::warn!("{} (rejected {} so far)", e, self.rejected_samples);
                }
                self.last_error = Some(e);
            }
        }

        let sensor = self.estimator.orientation().map(|o| o.angles());
        let viewport = self.camera.viewport();
        self.arbiter.tick(dt, sensor, viewport);

        let transform = self.camera.transform(self.arbiter.state());
        match self.renderer.render(&transform, viewport, &mut self.backend) {
            Ok(()) => {}
            Err(RenderError::SurfaceLost) => {
                log::debug!("Surface lost, reconfiguring");
                self.backend.resize(viewport);
            }
            Err(e) => {
                log::warn!("Render failed: {}", e);
                self.last_error = Some(e.into());
            }
        }

        self.counter.tick(dt);
        self.last_transform = Some(transform);
        Some(transform)
    }

    pub fn handle_touch(&mut self, event: TouchEvent) {
        if !self.stopped {
            self.arbiter.queue(event);
        }
    }

    pub fn resize(&mut self, viewport: Viewport) {
        if viewport.is_empty() {
            return;
        }
        self.camera.set_viewport(viewport);
        self.backend.resize(viewport);
    }

    /// Make the current heading straight ahead and restore the default zoom.
    pub fn recenter(&mut self) {
        self.estimator.set_yaw_reference();
        self.arbiter.set_fov(self.config.camera.fov_deg);
    }

    pub fn recalibrate(&mut self) {
        self.estimator.recalibrate();
    }

    /// Stop the sensors and the frame loop and release the texture. Safe to call
    /// any number of times; after it returns no sensor data is consumed.
    pub fn stop_update(&mut self) {
        if self.stopped {
            return;
        }
        self.sensors.stop();
        self.slot.clear();
        self.renderer.release(&mut self.backend);
        self.stopped = true;
        log::info!("Panorama view '{}' stopped", self.photo);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn view_state(&self) -> &ViewState {
        self.arbiter.state()
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.estimator.orientation()
    }

    pub fn camera_transform(&self) -> Option<&CameraTransform> {
        self.last_transform.as_ref()
    }

    pub fn renderer(&self) -> &PanoramaRenderer {
        &self.renderer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn status(&self) -> ViewStatus {
        let state = self.arbiter.state();
        ViewStatus {
            photo: self.photo.clone(),
            texture_loaded: self.renderer.has_texture(),
            sensors: self.available,
            sensors_running: self.sensors.is_running(),
            orientation_ready: self.estimator.orientation().is_some(),
            mode: state.mode,
            yaw: state.yaw,
            pitch: state.pitch,
            fov_deg: state.fov_deg,
            frames: self.renderer.frames(),
            fps: self.counter.fps,
            rejected_samples: self.rejected_samples,
            stopped: self.stopped,
            last_error: self.last_error.clone(),
        }
    }
}

impl<B: RenderBackend> Drop for PanoramaView<B> {
    fn drop(&mut self) {
        self.stop_update();
    }
}
