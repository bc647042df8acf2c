// config.rs - 视图参数 (JSON 配置文件, 缺省值与校验)
//
// 所有字段都有默认值, 配置文件里只需要写想覆盖的部分:
//
// {
//   "camera": { "fov_deg": 60.0 },
//   "input":  { "blend_duration_s": 0.8 }
// }

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub sensor: SensorConfig,
    pub fusion: FusionConfig,
    pub input: InputConfig,
    pub camera: CameraConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub rate_hz: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { rate_hz: 60.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // 0.98 = 每帧 2% 加速度计校正
    pub gyro_weight: f32,
    pub mag_gain: f32,
    // 加速度模长偏离 1g 超过该值时完全暂停校正
    pub accel_rejection_g: f32,
    // 0 = 不校准
    pub calibration_samples: u32,
    // 低于该角速度 (rad/s) 视为静止. 要接近真实零偏量级,
    // 否则缓慢转动会被当成零偏
    pub stationary_rate: f32,
    pub max_dt: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            gyro_weight: 0.98,
            mag_gain: 0.02,
            accel_rejection_g: 0.2,
            calibration_samples: 60,
            stationary_rate: 0.01,
            max_dt: 0.25,
        }
    }
}

impl FusionConfig {
    pub fn accel_gain(&self) -> f32 {
        1.0 - self.gyro_weight
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub blend_duration_s: f32,
    pub drag_sensitivity: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            blend_duration_s: 0.6,
            drag_sensitivity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    // 垂直 FOV
    pub fov_deg: f32,
    pub min_fov_deg: f32,
    pub max_fov_deg: f32,
    pub near: f32,
    pub far: f32,
    pub free_roll: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_deg: 46.8,
            min_fov_deg: 5.0,
            max_fov_deg: 120.0,
            near: 0.1,
            far: 100.0,
            free_roll: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Geometry {
    Sphere,
    Cylinder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub geometry: Geometry,
    pub cylinder_half_height_deg: f32,
    pub max_texture_dimension: u32,
    pub pad_to_two_to_one: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::Sphere,
            cylinder_half_height_deg: 60.0,
            max_texture_dimension: 8192,
            pad_to_two_to_one: true,
        }
    }
}

impl ViewConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: ViewConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;
        log::info!("Loaded config from {:?}", path);
        Ok(config.validated())
    }

    pub fn validated(mut self) -> Self {
        fn fix(name: &str, value: &mut f32, lo: f32, hi: f32, default: f32) {
            // 缺省值也要落在 [lo, hi] 内, 后面的字段拿它当边界
            if !value.is_finite() {
                let fallback = default.clamp(lo, hi);
                log::warn!("config {name} is not finite, using {fallback}");
                *value = fallback;
            } else if *value < lo || *value > hi {
                let clamped = value.clamp(lo, hi);
                log::warn!("config {name}={value} out of range [{lo}, {hi}], using {clamped}");
                *value = clamped;
            }
        }

        let d = ViewConfig::default();
        fix("sensor.rate_hz", &mut self.sensor.rate_hz, 1.0, 1000.0, d.sensor.rate_hz);
        fix("fusion.gyro_weight", &mut self.fusion.gyro_weight, 0.0, 1.0, d.fusion.gyro_weight);
        fix("fusion.mag_gain", &mut self.fusion.mag_gain, 0.0, 1.0, d.fusion.mag_gain);
        fix("fusion.accel_rejection_g", &mut self.fusion.accel_rejection_g, 0.01, 10.0, d.fusion.accel_rejection_g);
        fix("fusion.stationary_rate", &mut self.fusion.stationary_rate, 0.0, 10.0, d.fusion.stationary_rate);
        fix("fusion.max_dt", &mut self.fusion.max_dt, 0.001, 5.0, d.fusion.max_dt);
        fix("input.blend_duration_s", &mut self.input.blend_duration_s, 0.0, 10.0, d.input.blend_duration_s);
        fix("input.drag_sensitivity", &mut self.input.drag_sensitivity, 0.1, 5.0, d.input.drag_sensitivity);
        fix("camera.min_fov_deg", &mut self.camera.min_fov_deg, 1.0, 179.0, d.camera.min_fov_deg);
        fix("camera.max_fov_deg", &mut self.camera.max_fov_deg, self.camera.min_fov_deg, 179.9, d.camera.max_fov_deg);
        fix("camera.fov_deg", &mut self.camera.fov_deg, self.camera.min_fov_deg, self.camera.max_fov_deg, d.camera.fov_deg);
        fix("camera.near", &mut self.camera.near, 1e-4, 10.0, d.camera.near);
        fix("camera.far", &mut self.camera.far, self.camera.near * 2.0, 1e6, d.camera.far);
        fix("render.cylinder_half_height_deg", &mut self.render.cylinder_half_height_deg, 1.0, 89.0, d.render.cylinder_half_height_deg);
        if self.render.max_texture_dimension < 16 {
            log::warn!("config render.max_texture_dimension too small, using {}", d.render.max_texture_dimension);
            self.render.max_texture_dimension = d.render.max_texture_dimension;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ViewConfig =
            serde_json::from_str(r#"{ "camera": { "fov_deg": 60.0 } }"#).unwrap();
        assert_eq!(config.camera.fov_deg, 60.0);
        assert_eq!(config.camera.min_fov_deg, 5.0);
        assert_eq!(config.input, InputConfig::default());
        assert_eq!(config.render.geometry, Geometry::Sphere);
    }

    #[test]
    fn geometry_parses_by_name() {
        let config: ViewConfig =
            serde_json::from_str(r#"{ "render": { "geometry": "Cylinder" } }"#).unwrap();
        assert_eq!(config.render.geometry, Geometry::Cylinder);
    }

    #[test]
    fn validation_clamps_out_of_range_values() {
        let mut config = ViewConfig::default();
        config.fusion.gyro_weight = 1.5;
        config.camera.fov_deg = 500.0;
        config.sensor.rate_hz = f32::NAN;
        let config = config.validated();
        assert_eq!(config.fusion.gyro_weight, 1.0);
        assert_eq!(config.camera.fov_deg, config.camera.max_fov_deg);
        assert_eq!(config.sensor.rate_hz, 60.0);
    }

    #[test]
    fn non_finite_max_fov_never_drops_below_min_fov() {
        let mut config = ViewConfig::default();
        config.camera.min_fov_deg = 150.0;
        config.camera.max_fov_deg = f32::NAN;
        let config = config.validated();
        assert_eq!(config.camera.min_fov_deg, 150.0);
        assert_eq!(config.camera.max_fov_deg, 150.0);
        assert_eq!(config.camera.fov_deg, 150.0);
    }

    #[test]
    fn non_finite_bounds_everywhere_still_validate() {
        let mut config = ViewConfig::default();
        config.camera.min_fov_deg = f32::INFINITY;
        config.camera.max_fov_deg = f32::NAN;
        config.camera.fov_deg = f32::NAN;
        config.camera.near = f32::NAN;
        config.camera.far = f32::NEG_INFINITY;
        let config = config.validated();
        assert!(config.camera.min_fov_deg <= config.camera.fov_deg);
        assert!(config.camera.fov_deg <= config.camera.max_fov_deg);
        assert!(config.camera.far > config.camera.near);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = ViewConfig::load(Path::new("/nonexistent/panorama_view.json")).unwrap();
        assert_eq!(config, ViewConfig::default());
    }

    #[test]
    fn accel_gain_is_complement_of_gyro_weight() {
        let fusion = FusionConfig::default();
        assert!((fusion.accel_gain() - 0.02).abs() < 1e-6);
    }
}
