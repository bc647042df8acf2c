// 端到端场景: PanoramaView + SimulatedDevice + SoftwareBackend, 不需要 GPU 和窗口

use std::io::Cursor;
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

use panorama_view::arbiter::ViewState;
use panorama_view::camera::{self, wrap_degrees, CameraController};
use panorama_view::config::{CameraConfig, FusionConfig};
use panorama_view::fusion::OrientationEstimator;
use panorama_view::panorama::equirect_uv;
use panorama_view::renderer::FrameContent;
use panorama_view::{
    InputMode, MemoryLibrary, MotionDevice, PanoramaView, SensorSet, SimulatedDevice, SoftwareBackend,
    TouchEvent, ViewConfig, ViewError, Viewport,
};

const DT: f32 = 1.0 / 60.0;

fn library() -> MemoryLibrary {
    let img = RgbaImage::from_fn(512, 256, |x, y| Rgba([(x / 2) as u8, y as u8, 0, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    let mut library = MemoryLibrary::new();
    library.insert("lobby", bytes);
    library
}

fn open(photo: &str, device: SimulatedDevice) -> PanoramaView<SoftwareBackend> {
    PanoramaView::new(
        photo,
        &library(),
        Box::new(device),
        SoftwareBackend::new(),
        Viewport::new(64, 32),
        ViewConfig::default(),
    )
}

/// Tick in real time until the sensor thread has delivered an estimate.
fn wait_for_orientation(view: &mut PanoramaView<SoftwareBackend>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !view.status().orientation_ready {
        assert!(Instant::now() < deadline, "no orientation within 5s");
        view.tick(DT);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn level_device_looks_at_the_center_of_the_photo() {
    let mut view = open("lobby", SimulatedDevice::level());
    wait_for_orientation(&mut view);

    // 设备静止 2 秒: 按显示帧节奏 tick, 直到融合结果覆盖 2 秒的采样
    let first = view.orientation().unwrap().timestamp;
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut transform = view.tick(DT).unwrap();
    while view.orientation().unwrap().timestamp - first < 2.0 {
        assert!(Instant::now() < deadline, "sensor samples stopped arriving");
        std::thread::sleep(Duration::from_millis(16));
        transform = view.tick(DT).unwrap();
    }
    assert_eq!(view.camera_transform(), Some(&transform));

    let uv = view.renderer().uv_at_ndc(&transform, Vec2::ZERO);
    assert!((uv - Vec2::new(0.5, 0.5)).length() < 1e-3, "{uv:?}");

    let status = view.status();
    assert!(status.texture_loaded);
    assert!(status.sensors_running);
    assert_eq!(status.mode, InputMode::Sensor);
    assert!(status.last_error.is_none(), "{:?}", status.last_error);
    assert_eq!(
        view.backend().last_instruction().unwrap().content,
        FrameContent::Panorama
    );
}

#[test]
fn unknown_photo_shows_placeholder_and_reports_failure() {
    let mut view = open("no-such-photo", SimulatedDevice::level());
    let status = view.status();
    assert!(!status.texture_loaded);
    assert!(matches!(
        status.last_error,
        Some(ViewError::TextureLoadFailed { ref photo, .. }) if photo == "no-such-photo"
    ));

    assert!(view.tick(DT).is_some());
    assert_eq!(
        view.backend().last_instruction().unwrap().content,
        FrameContent::Placeholder
    );
    assert!(view.backend().frame().is_some());
}

#[test]
fn turning_ninety_degrees_shifts_the_view_a_quarter_turn() {
    let config = FusionConfig {
        calibration_samples: 0,
        ..FusionConfig::default()
    };
    let controller = CameraController::new(CameraConfig::default(), Viewport::new(64, 32));

    let mut device = SimulatedDevice::level()
        .with_angular_velocity(Vec3::new(0.0, -std::f32::consts::FRAC_PI_2, 0.0));
    let mut estimator = OrientationEstimator::new(config);

    let sample = device.read(0.0).unwrap();
    let start = estimator.update(&sample).unwrap();
    let mut t = 0.0;
    for _ in 0..60 {
        t += 1.0 / 60.0;
        estimator.update(&device.read(t).unwrap()).unwrap();
    }
    let end = estimator.orientation().unwrap();

    let state = |yaw: f32, pitch: f32| ViewState {
        yaw,
        pitch,
        roll: 0.0,
        fov_deg: 60.0,
        mode: InputMode::Sensor,
    };
    let a = start.angles();
    let b = end.angles();
    let before = controller.transform(&state(a.yaw, a.pitch));
    let after = controller.transform(&state(b.yaw, b.pitch));

    let turned = before.forward().angle_between(after.forward()).to_degrees();
    assert!((turned - 90.0).abs() < 1.0, "turned {turned}°");

    let du = (equirect_uv(after.yaw, after.pitch).x - equirect_uv(before.yaw, before.pitch).x)
        .rem_euclid(1.0);
    assert!((du - 0.25).abs() < 0.005, "du = {du}");
}

#[test]
fn drag_then_release_returns_smoothly_to_the_sensor_view() {
    let mut view = open("lobby", SimulatedDevice::level());
    wait_for_orientation(&mut view);
    view.tick(DT);
    let sensor_yaw = view.view_state().yaw;

    view.handle_touch(TouchEvent::DragBegin { x: 32.0, y: 16.0 });
    view.handle_touch(TouchEvent::DragMove { x: 12.0, y: 10.0 });
    view.tick(DT);
    assert_eq!(view.view_state().mode, InputMode::Manual);
    let dragged = view.view_state().yaw;
    assert!(wrap_degrees(dragged - sensor_yaw).abs() > 5.0);

    // 拖拽期间传感器不影响视角
    view.tick(DT);
    assert_eq!(view.view_state().yaw, dragged);

    view.handle_touch(TouchEvent::DragEnd);
    view.tick(DT);
    assert_eq!(view.view_state().mode, InputMode::Blending);

    let mut distance = wrap_degrees(view.view_state().yaw - sensor_yaw).abs();
    for _ in 0..120 {
        if view.view_state().mode == InputMode::Sensor {
            break;
        }
        view.tick(DT);
        let now = wrap_degrees(view.view_state().yaw - sensor_yaw).abs();
        assert!(now <= distance + 1e-3, "moved away from the sensor view");
        distance = now;
    }
    assert_eq!(view.view_state().mode, InputMode::Sensor);
    assert!(distance < 0.5);
}

#[test]
fn stop_update_is_idempotent() {
    let mut view = open("lobby", SimulatedDevice::level());
    view.tick(DT);

    view.stop_update();
    let first = view.status();
    view.stop_update();
    let second = view.status();

    assert_eq!(first, second);
    assert!(first.stopped);
    assert!(!first.sensors_running);
    assert!(!first.texture_loaded);
    assert!(!view.backend().has_texture());
    assert!(view.tick(DT).is_none());
}

#[test]
fn no_sensors_leaves_manual_control_working() {
    let mut view = open("lobby", SimulatedDevice::level().with_sensors(SensorSet::NONE));
    assert!(matches!(
        view.status().last_error,
        Some(ViewError::SensorUnavailable { .. })
    ));

    view.handle_touch(TouchEvent::DragBegin { x: 32.0, y: 16.0 });
    view.handle_touch(TouchEvent::DragMove { x: 22.0, y: 16.0 });
    view.handle_touch(TouchEvent::DragEnd);
    view.tick(DT);
    let yaw = view.view_state().yaw;
    assert!(yaw > 0.0);

    for _ in 0..60 {
        view.tick(DT);
    }
    assert_eq!(view.view_state().yaw, yaw);
    assert_eq!(view.view_state().mode, InputMode::Sensor);
}

#[test]
fn magnetometer_alone_degrades_to_manual_control() {
    let mut view = open(
        "lobby",
        SimulatedDevice::level().with_sensors(SensorSet {
            magnetometer: true,
            ..SensorSet::NONE
        }),
    );
    for _ in 0..50 {
        view.tick(DT);
        std::thread::sleep(Duration::from_millis(1));
    }

    let status = view.status();
    assert!(!status.sensors_running);
    assert!(status.sensors.is_empty());
    assert!(!status.orientation_ready);
    assert_eq!(status.rejected_samples, 0);
    assert_eq!(
        status.last_error,
        Some(ViewError::SensorUnavailable {
            missing: SensorSet {
                accelerometer: true,
                gyroscope: true,
                magnetometer: false,
            }
        })
    );

    view.handle_touch(TouchEvent::DragBegin { x: 32.0, y: 16.0 });
    view.handle_touch(TouchEvent::DragMove { x: 22.0, y: 16.0 });
    view.tick(DT);
    assert!(view.view_state().yaw > 0.0);
}

#[test]
fn camera_pitch_is_clamped_and_yaw_is_cyclic() {
    let controller = CameraController::new(CameraConfig::default(), Viewport::new(64, 32));
    let state = |yaw: f32, pitch: f32| ViewState {
        yaw,
        pitch,
        roll: 0.0,
        fov_deg: 60.0,
        mode: InputMode::Manual,
    };

    for pitch in [-500.0, -90.5, 90.5, 1e6] {
        let t = controller.transform(&state(0.0, pitch));
        assert!((-90.0..=90.0).contains(&t.pitch), "pitch {pitch} -> {}", t.pitch);
    }

    for yaw in [-170.0_f32, -45.0, 0.0, 30.0, 179.0] {
        let base = controller.transform(&state(yaw, 20.0)).forward();
        for turns in [-2.0, -1.0, 1.0, 3.0] {
            let t = controller.transform(&state(yaw + 360.0 * turns, 20.0));
            assert!((t.forward() - base).length() < 1e-3);
            assert!((-180.0..180.0).contains(&t.yaw));
        }
        assert!((base - camera::direction(yaw, 20.0)).length() < 1e-4);
    }
}

#[test]
fn resize_changes_aspect_but_not_direction() {
    let mut view = open("lobby", SimulatedDevice::level().with_sensors(SensorSet::NONE));
    let wide = view.tick(DT).unwrap();
    view.resize(Viewport::new(32, 64));
    let tall = view.tick(DT).unwrap();

    assert!(wide.aspect > 1.0 && tall.aspect < 1.0);
    assert!((wide.forward() - tall.forward()).length() < 1e-6);
    assert_eq!(view.backend().frame().unwrap().dimensions(), (32, 64));

    // 空视口被忽略
    view.resize(Viewport::new(0, 0));
    assert_eq!(view.tick(DT).unwrap().aspect, tall.aspect);
}
