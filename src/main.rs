// main.rs - 桌面宿主: 在一个窗口里托管一个全景视图
//
// 桌面没有运动传感器, 用 SimulatedDevice 代替 (可选恒定 yaw 角速度).
// 鼠标拖拽与触摸都当作拖拽手势; 滚轮缩放; R 重置视角; F11 全屏; Esc 退出.
//
// 用法: panorama_view <photo> [--assets <dir>] [--config <file.json>]
//                     [--simulate-yaw-rate <deg/s>] [--no-sensors] [--snapshot <out.png>]

use panorama_view::camera::Viewport;
use panorama_view::config::ViewConfig;
use panorama_view::error::{RenderError, ViewError};
use panorama_view::gpu::WgpuBackend;
use panorama_view::panorama::DirectoryLibrary;
use panorama_view::renderer::SoftwareBackend;
use panorama_view::sensor::{SensorSet, SimulatedDevice};
use panorama_view::{PanoramaView, TouchEvent};

use glam::Vec3;
use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Fullscreen, WindowBuilder},
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Args {
    photo: String,
    assets: Vec<PathBuf>,
    config: Option<PathBuf>,
    yaw_rate_deg: f32,
    no_sensors: bool,
    snapshot: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut photo = None;
    let mut assets = Vec::new();
    let mut config = None;
    let mut yaw_rate_deg = 0.0;
    let mut no_sensors = false;
    let mut snapshot = None;

    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or(format!("{name} needs a value"));
        match arg.as_str() {
            "--assets" => assets.push(PathBuf::from(value("--assets")?)),
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            "--simulate-yaw-rate" => {
                yaw_rate_deg = value("--simulate-yaw-rate")?
                    .parse()
                    .map_err(|e| format!("--simulate-yaw-rate: {e}"))?
            }
            "--no-sensors" => no_sensors = true,
            "--snapshot" => snapshot = Some(PathBuf::from(value("--snapshot")?)),
            other if other.starts_with("--") => return Err(format!("unknown option {other}")),
            other => photo = Some(other.to_owned()),
        }
    }

    Ok(Args {
        photo: photo.ok_or("missing photo identifier")?,
        assets,
        config,
        yaw_rate_deg,
        no_sensors,
        snapshot,
    })
}

// 搜索顺序: --assets, <exe_dir>/assets, ./assets, 工作目录
fn photo_library(extra: &[PathBuf]) -> DirectoryLibrary {
    let mut roots = extra.to_vec();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            roots.push(dir.join("assets"));
        }
    }
    roots.push(PathBuf::from("assets"));
    roots.push(PathBuf::from("."));
    DirectoryLibrary::new(roots)
}

fn simulated_device(args: &Args) -> SimulatedDevice {
    let sensors = if args.no_sensors {
        SensorSet::NONE
    } else {
        SensorSet::ALL
    };
    // yaw 向东为正, 对应绕 +Y 的负角速度
    SimulatedDevice::level()
        .with_sensors(sensors)
        .with_angular_velocity(Vec3::new(0.0, -args.yaw_rate_deg.to_radians(), 0.0))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args().map_err(|e| {
        eprintln!("usage: panorama_view <photo> [--assets <dir>] [--config <file.json>] [--simulate-yaw-rate <deg/s>] [--no-sensors] [--snapshot <out.png>]");
        e
    })?;
    let config = match &args.config {
        Some(path) => ViewConfig::load(path)?,
        None => ViewConfig::default(),
    };
    let library = photo_library(&args.assets);

    if let Some(out) = &args.snapshot {
        return snapshot(&args, &library, config, out);
    }

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Panorama")
            .with_inner_size(LogicalSize::new(1280, 720))
            .build(&event_loop)?,
    );

    let backend = pollster::block_on(WgpuBackend::new(window.clone()))?;
    let mut config = config;
    config.render.max_texture_dimension = config
        .render
        .max_texture_dimension
        .min(backend.max_texture_dimension());

    let size = window.inner_size();
    let mut view = PanoramaView::new(
        &args.photo,
        &library,
        Box::new(simulated_device(&args)),
        backend,
        Viewport::new(size.width, size.height),
        config,
    );

    // 交互状态
    let mut mouse_pressed = false;
    let mut cursor = PhysicalPosition::new(0.0, 0.0);
    let mut is_fullscreen = false;
    let mut last_frame = Instant::now();
    let mut last_title = Instant::now();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    view.stop_update();
                    *control_flow = ControlFlow::Exit;
                }

                WindowEvent::Resized(new_size) => {
                    view.resize(Viewport::new(new_size.width, new_size.height));
                }

                WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                    view.resize(Viewport::new(new_inner_size.width, new_inner_size.height));
                }

                WindowEvent::KeyboardInput { input, .. } => {
                    if input.state == ElementState::Pressed {
                        match input.virtual_keycode {
                            Some(VirtualKeyCode::R) => view.recenter(),
                            Some(VirtualKeyCode::C) => view.recalibrate(),
                            Some(VirtualKeyCode::F11) => {
                                is_fullscreen = !is_fullscreen;
                                if is_fullscreen {
                                    window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                                } else {
                                    window.set_fullscreen(None);
                                }
                            }
                            Some(VirtualKeyCode::Escape) => {
                                view.stop_update();
                                *control_flow = ControlFlow::Exit;
                            }
                            _ => {}
                        }
                    }
                }

                // 鼠标按住拖动 = 单指拖拽
                WindowEvent::MouseInput { state, button, .. } => {
                    if button == MouseButton::Left {
                        mouse_pressed = state == ElementState::Pressed;
                        view.handle_touch(if mouse_pressed {
                            TouchEvent::DragBegin {
                                x: cursor.x as f32,
                                y: cursor.y as f32,
                            }
                        } else {
                            TouchEvent::DragEnd
                        });
                    }
                }

                WindowEvent::CursorMoved { position, .. } => {
                    cursor = position;
                    if mouse_pressed {
                        view.handle_touch(TouchEvent::DragMove {
                            x: position.x as f32,
                            y: position.y as f32,
                        });
                    }
                }

                WindowEvent::Touch(Touch { phase, location, .. }) => {
                    let (x, y) = (location.x as f32, location.y as f32);
                    view.handle_touch(match phase {
                        TouchPhase::Started => TouchEvent::DragBegin { x, y },
                        TouchPhase::Moved => TouchEvent::DragMove { x, y },
                        TouchPhase::Ended | TouchPhase::Cancelled => TouchEvent::DragEnd,
                    });
                }

                WindowEvent::MouseWheel { delta, .. } => {
                    let scroll = match delta {
                        MouseScrollDelta::LineDelta(_, y) => y,
                        MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                    };
                    view.handle_touch(TouchEvent::ZoomBy {
                        degrees: -scroll * 2.5,
                    });
                }

                _ => {}
            },

            Event::RedrawRequested(_) => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;

                if view.tick(dt).is_none() {
                    return;
                }

                let status = view.status();
                if let Some(ViewError::Backend(RenderError::OutOfMemory)) = status.last_error {
                    log::error!("GPU out of memory, exiting");
                    view.stop_update();
                    *control_flow = ControlFlow::Exit;
                    return;
                }

                if now.duration_since(last_title) >= Duration::from_millis(500) {
                    last_title = now;
                    window.set_title(&format!(
                        "{} | {:?} | Yaw {:.1}° | Pitch {:.1}° | FOV {:.1}° | {:.0} fps{}",
                        status.photo,
                        status.mode,
                        status.yaw,
                        status.pitch,
                        status.fov_deg,
                        status.fps,
                        match &status.last_error {
                            Some(e) => format!(" | {e}"),
                            None => String::new(),
                        }
                    ));
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}

fn snapshot(
    args: &Args,
    library: &DirectoryLibrary,
    config: ViewConfig,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut view = PanoramaView::new(
        &args.photo,
        library,
        Box::new(simulated_device(args)),
        SoftwareBackend::new(),
        Viewport::new(960, 540),
        config,
    );

    // 等第一帧传感器数据到达, 最多 1 秒
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        view.tick(1.0 / 60.0);
        if view.status().orientation_ready {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    view.tick(1.0 / 60.0);

    let status = view.status();
    if let Some(e) = &status.last_error {
        log::warn!("{}", e);
    }
    if let Some(frame) = view.backend().frame() {
        frame.save(out)?;
        log::info!("Snapshot written to {:?}", out);
    }
    view.stop_update();
    Ok(())
}
