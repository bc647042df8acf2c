// fusion.rs - 互补滤波姿态融合
//
// 陀螺仪积分负责高频响应, 加速度计 (重力方向) 和磁力计 (北向) 以固定小增益
// 做低频校正, 抵消陀螺仪漂移. 加速度模长明显偏离 1g 时 (设备在做线性运动),
// 重力不再可靠, 加速度计校正按偏离程度降权直至暂停.

use glam::{Quat, Vec3};

use crate::camera::Angles;
use crate::config::FusionConfig;
use crate::error::ViewError;
use crate::sensor::RawSample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub quaternion: Quat,
    pub timestamp: f64,
}

impl Default for Orientation {
    fn default() -> Self {
        Self {
            quaternion: Quat::IDENTITY,
            timestamp: 0.0,
        }
    }
}

impl Orientation {
    pub fn angles(&self) -> Angles {
        Angles::from_quat(self.quaternion)
    }

    pub fn forward(&self) -> Vec3 {
        self.quaternion * Vec3::NEG_Z
    }
}

enum CalibrationState {
    Collecting { sum: Vec3, count: u32, target: u32 },
    Calibrated,
}

// 小于该模长 (g) 的加速度没有可用方向
const MIN_ACCEL_NORM: f32 = 0.1;
// 接近磁极时水平分量太小, 不做航向校正
const MIN_MAG_HORIZONTAL: f32 = 0.05;

pub struct OrientationEstimator {
    config: FusionConfig,
    attitude: Option<Quat>,
    last_timestamp: Option<f64>,
    gyro_bias: Vec3,
    calibration: CalibrationState,
    yaw_reference: Quat,
    accel_rejected: bool,
    sample_count: u64,
}

impl OrientationEstimator {
    pub fn new(config: FusionConfig) -> Self {
        let calibration = Self::calibration_for(config.calibration_samples);
        Self {
            config,
            attitude: None,
            last_timestamp: None,
            gyro_bias: Vec3::ZERO,
            calibration,
            yaw_reference: Quat::IDENTITY,
            accel_rejected: false,
            sample_count: 0,
        }
    }

    fn calibration_for(samples: u32) -> CalibrationState {
        if samples == 0 {
            CalibrationState::Calibrated
        } else {
            CalibrationState::Collecting {
                sum: Vec3::ZERO,
                count: 0,
                target: samples,
            }
        }
    }

    /// Latest estimate, `None` until a usable sample has arrived.
    pub fn orientation(&self) -> Option<Orientation> {
        self.attitude.map(|q| Orientation {
            quaternion: (self.yaw_reference * q).normalize(),
            timestamp: self.last_timestamp.unwrap_or_default(),
        })
    }

    pub fn gyro_bias(&self) -> Vec3 {
        self.gyro_bias
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self.calibration, CalibrationState::Calibrated)
    }

    pub fn accel_rejected(&self) -> bool {
        self.accel_rejected
    }

    pub fn recalibrate(&mut self) {
        self.calibration = Self::calibration_for(self.config.calibration_samples);
        self.gyro_bias = Vec3::ZERO;
        log::info!(
            "Gyro recalibration started ({} samples)",
            self.config.calibration_samples
        );
    }

    /// Make the current heading the new yaw zero. Tilt is untouched.
    pub fn set_yaw_reference(&mut self) {
        let Some(q) = self.attitude else {
            return;
        };
        let forward = q * Vec3::NEG_Z;
        let heading = forward.x.atan2(-forward.z);
        self.yaw_reference = Quat::from_rotation_y(heading);
        log::info!("Yaw reference set at {:.1}°", heading.to_degrees());
    }

    /// Fuse one sample. Invalid samples are rejected and the previous
    /// estimate is kept.
    pub fn update(&mut self, sample: &RawSample) -> Result<Orientation, ViewError> {
        self.validate(sample)?;

        let dt = match self.last_timestamp {
            Some(last) => ((sample.timestamp - last) as f32).min(self.config.max_dt),
            None => 0.0,
        };
        self.last_timestamp = Some(sample.timestamp);
        self.sample_count += 1;

        if let Some(gyro) = sample.gyro {
            self.collect_bias(gyro);
        }

        let Some(previous) = self.attitude else {
            let initial = self.initial_alignment(sample);
            self.attitude = Some(initial);
            log::debug!("Attitude initialised from first sample");
            return Ok(self.orientation().unwrap_or_default());
        };

        let mut q = previous;

        // 1. 陀螺仪积分 (机体坐标系角速度, 右乘)
        if let Some(gyro) = sample.gyro {
            let rate = gyro - self.gyro_bias;
            q = (q * Quat::from_scaled_axis(rate * dt)).normalize();
        }

        // 只有加速度计/磁力计时直接跟随测量值
        let full_gain = sample.gyro.is_none();

        // 2. 重力校正 tilt
        self.accel_rejected = false;
        if let Some(accel) = sample.accel {
            let norm = accel.length();
            let weight = self.accel_weight(norm);
            self.accel_rejected = weight <= 0.0;
            if weight > 0.0 {
                let gain = if full_gain { 1.0 } else { self.config.accel_gain() * weight };
                q = Self::tilt_correction(q, accel / norm, gain) * q;
            } else if self.sample_count % 60 == 0 {
                log::trace!("Accelerometer correction suspended (|a| = {:.2}g)", norm);
            }
        }

        // 3. 磁力计校正 heading
        if let Some(mag) = sample.mag {
            let gain = if full_gain { 1.0 } else { self.config.mag_gain };
            q = Self::heading_correction(q, mag, gain) * q;
        }

        q = q.normalize();
        // 保持半球连续, 避免帧间 q / -q 跳变
        if q.dot(previous) < 0.0 {
            q = -q;
        }
        self.attitude = Some(q);

        Ok(self.orientation().unwrap_or_default())
    }

    fn validate(&self, sample: &RawSample) -> Result<(), ViewError> {
        if !sample.is_finite() {
            return Err(ViewError::InvalidOrientationInput {
                reason: "non-finite sensor value".to_owned(),
            });
        }
        if sample.accel.is_none() && sample.gyro.is_none() {
            return Err(ViewError::InvalidOrientationInput {
                reason: "sample has neither accelerometer nor gyroscope data".to_owned(),
            });
        }
        if let Some(last) = self.last_timestamp {
            if sample.timestamp < last {
                return Err(ViewError::InvalidOrientationInput {
                    reason: format!(
                        "timestamp went backwards ({:.4}s < {:.4}s)",
                        sample.timestamp, last
                    ),
                });
            }
        }
        Ok(())
    }

    fn collect_bias(&mut self, gyro: Vec3) {
        let CalibrationState::Collecting { sum, count, target } = &mut self.calibration else {
            return;
        };

        if gyro.length() > self.config.stationary_rate {
            // 设备在动, 重新开始累计
            *sum = Vec3::ZERO;
            *count = 0;
            return;
        }

        *sum += gyro;
        *count += 1;
        if *count >= *target {
            self.gyro_bias = *sum / *count as f32;
            self.calibration = CalibrationState::Calibrated;
            log::info!(
                "Gyro calibration complete, bias = ({:.4}, {:.4}, {:.4}) rad/s",
                self.gyro_bias.x,
                self.gyro_bias.y,
                self.gyro_bias.z
            );
        }
    }

    fn accel_weight(&self, norm: f32) -> f32 {
        if norm < MIN_ACCEL_NORM {
            return 0.0;
        }
        let deviation = (norm - 1.0).abs();
        (1.0 - deviation / self.config.accel_rejection_g).clamp(0.0, 1.0)
    }

    fn initial_alignment(&self, sample: &RawSample) -> Quat {
        let Some(accel) = sample.accel.filter(|a| a.length() >= MIN_ACCEL_NORM) else {
            return Quat::IDENTITY;
        };
        let mut q = Quat::from_rotation_arc(accel.normalize(), Vec3::Y);
        if let Some(mag) = sample.mag {
            q = Self::heading_correction(q, mag, 1.0) * q;
        }
        q.normalize()
    }

    fn tilt_correction(q: Quat, accel_unit: Vec3, gain: f32) -> Quat {
        let measured_up = q * accel_unit;
        let full = Quat::from_rotation_arc(measured_up, Vec3::Y);
        Quat::IDENTITY.slerp(full, gain.clamp(0.0, 1.0))
    }

    fn heading_correction(q: Quat, mag: Vec3, gain: f32) -> Quat {
        let field = q * mag;
        let horizontal = Vec3::new(field.x, 0.0, field.z);
        if field.length() <= f32::EPSILON
            || horizontal.length() < MIN_MAG_HORIZONTAL * field.length()
        {
            return Quat::IDENTITY;
        }
        let heading = horizontal.x.atan2(-horizontal.z);
        Quat::from_rotation_y(heading * gain.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera;
    use crate::sensor::{MotionDevice, SensorSet, SimulatedDevice};

    const DT: f64 = 1.0 / 60.0;

    // acos 在小角度下精度不够, 用 atan2
    fn angle_between(a: Quat, b: Quat) -> f32 {
        let d = a.conjugate() * b;
        (2.0 * d.xyz().length().atan2(d.w.abs())).to_degrees()
    }

    fn run(estimator: &mut OrientationEstimator, device: &mut SimulatedDevice, start: f64, n: usize) -> f64 {
        let mut t = start;
        for _ in 0..n {
            let sample = device.read(t).unwrap();
            estimator.update(&sample).unwrap();
            t += DT;
        }
        t
    }

    #[test]
    fn static_device_converges_and_stays_put() {
        let truth = camera::rotation(40.0, 15.0, -5.0);
        let mut device = SimulatedDevice::level().with_attitude(truth);
        let mut estimator = OrientationEstimator::new(FusionConfig::default());

        let t = run(&mut estimator, &mut device, 0.0, 120);
        let settled = estimator.orientation().unwrap().quaternion;
        assert!(angle_between(settled, truth) < 0.1);

        run(&mut estimator, &mut device, t, 600);
        let later = estimator.orientation().unwrap().quaternion;
        assert!(angle_between(later, settled) < 0.01, "drifted while static");
    }

    #[test]
    fn corrections_pull_a_wrong_estimate_back() {
        // 初始化为水平, 然后设备 "瞬移" 到 20° 俯仰 (陀螺仪没有记录到), 靠重力校正收敛
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        let mut level = SimulatedDevice::level();
        run(&mut estimator, &mut level, 0.0, 10);

        let truth = camera::rotation(0.0, 20.0, 0.0);
        let mut tilted = SimulatedDevice::level().with_attitude(truth);
        let mut errors = Vec::new();
        let mut t = 10.0 * DT;
        for _ in 0..600 {
            estimator.update(&tilted.read(t).unwrap()).unwrap();
            errors.push(angle_between(estimator.orientation().unwrap().quaternion, truth));
            t += DT;
        }
        assert!(errors[0] > 15.0);
        assert!(*errors.last().unwrap() < 0.5);
        // 单调收敛, 不振荡
        assert!(errors.windows(2).all(|w| w[1] <= w[0] + 1e-3));
    }

    #[test]
    fn yaw_rotation_is_tracked() {
        let mut device = SimulatedDevice::level()
            .with_angular_velocity(Vec3::new(0.0, -std::f32::consts::FRAC_PI_2, 0.0));
        let mut estimator = OrientationEstimator::new(FusionConfig {
            calibration_samples: 0,
            ..FusionConfig::default()
        });
        run(&mut estimator, &mut device, 0.0, 61);
        let yaw = estimator.orientation().unwrap().angles().yaw;
        assert!((yaw - 90.0).abs() < 2.0, "yaw = {yaw}");
    }

    #[test]
    fn strong_linear_acceleration_suspends_tilt_correction() {
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        let mut level = SimulatedDevice::level();
        let t = run(&mut estimator, &mut level, 0.0, 10);

        // 水平方向 1g 的线性加速度: 测量到的 "上" 偏了 45°, 不应被当作重力
        let mut shaken = SimulatedDevice::level().with_linear_accel(Vec3::new(1.0, 0.0, 0.0));
        run(&mut estimator, &mut shaken, t, 60);
        assert!(estimator.accel_rejected());
        let q = estimator.orientation().unwrap().quaternion;
        assert!(angle_between(q, Quat::IDENTITY) < 0.5);
    }

    #[test]
    fn invalid_samples_are_rejected_and_estimate_held() {
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        let mut device = SimulatedDevice::level();
        run(&mut estimator, &mut device, 0.0, 5);
        let before = estimator.orientation().unwrap();

        let mut bad = device.read(1.0).unwrap();
        bad.gyro = Some(Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(matches!(
            estimator.update(&bad),
            Err(ViewError::InvalidOrientationInput { .. })
        ));

        let mut stale = device.read(1.0).unwrap();
        stale.timestamp = 0.0;
        assert!(estimator.update(&stale).is_err());

        let empty = RawSample {
            timestamp: 2.0,
            accel: None,
            gyro: None,
            mag: Some(Vec3::X),
        };
        assert!(estimator.update(&empty).is_err());

        assert_eq!(estimator.orientation().unwrap(), before);
    }

    #[test]
    fn gyro_bias_is_learned_while_stationary() {
        let bias = Vec3::new(0.004, -0.006, 0.002);
        let mut device = SimulatedDevice::level()
            .with_gyro_bias(bias)
            .with_sensors(SensorSet {
                magnetometer: false,
                ..SensorSet::ALL
            });
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        assert!(!estimator.is_calibrated());
        run(&mut estimator, &mut device, 0.0, 60);
        assert!(estimator.is_calibrated());
        assert!((estimator.gyro_bias() - bias).length() < 1e-5);

        estimator.recalibrate();
        assert!(!estimator.is_calibrated());
        assert_eq!(estimator.gyro_bias(), Vec3::ZERO);
    }

    #[test]
    fn slow_pan_without_magnetometer_is_not_learned_as_bias() {
        // 2°/s 的缓慢转动, 只有加速度计和陀螺仪, 10 秒
        let rate = 2.0_f32.to_radians();
        let mut device = SimulatedDevice::level()
            .with_angular_velocity(Vec3::new(0.0, -rate, 0.0))
            .with_sensors(SensorSet {
                magnetometer: false,
                ..SensorSet::ALL
            });
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        run(&mut estimator, &mut device, 0.0, 601);

        assert_eq!(estimator.gyro_bias(), Vec3::ZERO);
        let truth = Angles::from_quat(device.attitude()).yaw;
        let yaw = estimator.orientation().unwrap().angles().yaw;
        assert!((truth - 20.0).abs() < 0.1, "truth = {truth}");
        assert!((yaw - truth).abs() < 0.2, "yaw = {yaw}, truth = {truth}");
    }

    #[test]
    fn output_quaternion_is_normalized_and_continuous() {
        let mut device = SimulatedDevice::level().with_angular_velocity(Vec3::new(0.3, 2.0, -0.7));
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        let mut t = 0.0;
        let mut previous: Option<Quat> = None;
        for _ in 0..600 {
            estimator.update(&device.read(t).unwrap()).unwrap();
            let q = estimator.orientation().unwrap().quaternion;
            assert!((q.length() - 1.0).abs() < 1e-4);
            if let Some(p) = previous {
                assert!(q.dot(p) > 0.0, "sign flip between frames");
            }
            previous = Some(q);
            t += DT;
        }
    }

    #[test]
    fn yaw_reference_zeroes_heading_only() {
        let truth = camera::rotation(60.0, 10.0, 0.0);
        let mut device = SimulatedDevice::level().with_attitude(truth);
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        run(&mut estimator, &mut device, 0.0, 5);
        estimator.set_yaw_reference();
        let angles = estimator.orientation().unwrap().angles();
        assert!(angles.yaw.abs() < 0.1);
        assert!((angles.pitch - 10.0).abs() < 0.1);
    }

    #[test]
    fn accelerometer_only_still_gives_tilt() {
        let truth = camera::rotation(0.0, -30.0, 0.0);
        let mut device = SimulatedDevice::level().with_attitude(truth).with_sensors(SensorSet {
            accelerometer: true,
            gyroscope: false,
            magnetometer: false,
        });
        let mut estimator = OrientationEstimator::new(FusionConfig::default());
        run(&mut estimator, &mut device, 0.0, 3);
        let pitch = estimator.orientation().unwrap().angles().pitch;
        assert!((pitch + 30.0).abs() < 0.1);
    }
}
