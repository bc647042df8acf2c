// lib.rs - 手持设备上的 360° 全景照片视图
//
// 数据流: SensorSource -> OrientationEstimator -> InputArbiter -> CameraController
//         -> PanoramaRenderer -> RenderBackend
// 宿主程序只需要 PanoramaView.

pub mod arbiter;
pub mod camera;
pub mod config;
pub mod error;
pub mod fusion;
pub mod gpu;
pub mod panorama;
pub mod renderer;
pub mod sensor;
pub mod view;

pub use arbiter::{InputMode, TouchEvent, ViewState};
pub use camera::{CameraTransform, Viewport};
pub use config::ViewConfig;
pub use error::ViewError;
pub use panorama::{DirectoryLibrary, MemoryLibrary, PhotoLibrary};
pub use renderer::{RenderBackend, SoftwareBackend};
pub use sensor::{MotionDevice, SensorSet, SimulatedDevice};
pub use view::{PanoramaView, ViewStatus};
