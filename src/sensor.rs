// sensor.rs - 运动传感器采样 (加速度计 / 陀螺仪 / 磁力计)
//
// SensorSource 拥有一个轮询线程, 按固定频率读取 MotionDevice,
// 把最新一帧写进 SampleSlot (单槽, 新数据覆盖旧数据, 不排队).
// 渲染帧每次只取最新的一帧.

use glam::{Quat, Vec3};
use parking_lot::Mutex;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One reading of the motion sensors. Timestamp is in seconds since the source started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub timestamp: f64,
    /// Specific force in g, device frame. Reads +Y when level and at rest.
    pub accel: Option<Vec3>,
    pub gyro: Option<Vec3>,
    pub mag: Option<Vec3>,
}

impl RawSample {
    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite()
            && [self.accel, self.gyro, self.mag]
                .iter()
                .all(|v| v.map_or(true, |v| v.is_finite()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorSet {
    pub accelerometer: bool,
    pub gyroscope: bool,
    pub magnetometer: bool,
}

impl SensorSet {
    pub const ALL: Self = Self {
        accelerometer: true,
        gyroscope: true,
        magnetometer: true,
    };
    pub const NONE: Self = Self {
        accelerometer: false,
        gyroscope: false,
        magnetometer: false,
    };

    pub fn is_empty(&self) -> bool {
        !(self.accelerometer || self.gyroscope || self.magnetometer)
    }

    pub fn missing(&self) -> Self {
        Self {
            accelerometer: !self.accelerometer,
            gyroscope: !self.gyroscope,
            magnetometer: !self.magnetometer,
        }
    }

    // 磁力计只能给出航向, 必须有加速度计或陀螺仪才能估计姿态
    pub fn can_estimate(&self) -> bool {
        self.accelerometer || self.gyroscope
    }
}

impl fmt::Display for SensorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.accelerometer, "accelerometer"),
            (self.gyroscope, "gyroscope"),
            (self.magnetometer, "magnetometer"),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

/// Platform access to the motion hardware.
pub trait MotionDevice: Send + 'static {
    fn available(&self) -> SensorSet;

    /// Read the sensors at `timestamp`. `None` when no new data is ready.
    fn read(&mut self, timestamp: f64) -> Option<RawSample>;

    fn set_active(&mut self, _active: bool) {}
}

#[derive(Clone, Default)]
pub struct SampleSlot {
    latest: Arc<Mutex<Option<RawSample>>>,
}

impl SampleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, sample: RawSample) {
        *self.latest.lock() = Some(sample);
    }

    pub fn take(&self) -> Option<RawSample> {
        self.latest.lock().take()
    }

    pub fn clear(&self) {
        self.latest.lock().take();
    }
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<Box<dyn MotionDevice>>,
}

pub struct SensorSource {
    device: Option<Box<dyn MotionDevice>>,
    available: SensorSet,
    period: Duration,
    slot: SampleSlot,
    worker: Option<Worker>,
    // 时间戳基准, 重启后继续递增
    epoch: Instant,
}

impl SensorSource {
    pub fn new(device: Box<dyn MotionDevice>, rate_hz: f32) -> Self {
        let available = device.available();
        let rate_hz = if rate_hz.is_finite() && rate_hz > 0.0 { rate_hz } else { 60.0 };
        Self {
            device: Some(device),
            available,
            period: Duration::from_secs_f32(1.0 / rate_hz),
            slot: SampleSlot::new(),
            worker: None,
            epoch: Instant::now(),
        }
    }

    pub fn slot(&self) -> SampleSlot {
        self.slot.clone()
    }

    pub fn available(&self) -> SensorSet {
        self.available
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start polling. Returns the sensors that will actually deliver data;
    /// when they cannot produce an attitude no thread is started and the result is empty.
    pub fn start(&mut self) -> SensorSet {
        if self.worker.is_some() {
            return self.available;
        }

        let missing = self.available.missing();
        if !missing.is_empty() {
            log::warn!("Sensors unavailable: {}", missing);
        }
        if !self.available.can_estimate() {
            log::warn!(
                "No accelerometer or gyroscope ({}), falling back to manual control only",
                self.available
            );
            return SensorSet::NONE;
        }

        let Some(mut device) = self.device.take() else {
            return SensorSet::NONE;
        };

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let slot = self.slot.clone();
        let period = self.period;
        let epoch = self.epoch;

        let handle = std::thread::spawn(move || {
            device.set_active(true);
            let mut next = Instant::now();
            let mut count: u64 = 0;

            loop {
                next += period;
                let wait = next.saturating_duration_since(Instant::now());
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                if let Some(sample) = device.read(epoch.elapsed().as_secs_f64()) {
                    slot.publish(sample);
                    count += 1;
                    if count % 600 == 0 {
                        log::trace!("{} sensor samples published", count);
                    }
                }
            }

            device.set_active(false);
            device
        });

        log::info!(
            "Sensor polling started at {:.0} Hz ({})",
            1.0 / self.period.as_secs_f32(),
            self.available
        );
        self.worker = Some(Worker { stop_tx, handle });
        self.available
    }

    /// Stop polling and power the hardware down. Blocks until the polling
    /// thread has exited, so nothing is published after this returns.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = worker.stop_tx.send(());
        match worker.handle.join() {
            Ok(device) => self.device = Some(device),
            Err(_) => log::error!("Sensor thread panicked"),
        }
        log::info!("Sensor polling stopped");
    }
}

impl Drop for SensorSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// 世界坐标系中的地磁方向 (带磁倾角)
const WORLD_MAG: Vec3 = Vec3::new(0.0, -0.5, -0.866);

/// A device that reports physically consistent readings for a scripted motion.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    sensors: SensorSet,
    attitude: Quat,
    // rad/s
    angular_velocity: Vec3,
    gyro_bias: Vec3,
    linear_accel: Vec3,
    last_timestamp: Option<f64>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            sensors: SensorSet::ALL,
            attitude: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
            gyro_bias: Vec3::ZERO,
            linear_accel: Vec3::ZERO,
            last_timestamp: None,
        }
    }
}

impl SimulatedDevice {
    pub fn level() -> Self {
        Self::default()
    }

    pub fn with_sensors(mut self, sensors: SensorSet) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn with_attitude(mut self, attitude: Quat) -> Self {
        self.attitude = attitude.normalize();
        self
    }

    pub fn with_angular_velocity(mut self, angular_velocity: Vec3) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn with_gyro_bias(mut self, bias: Vec3) -> Self {
        self.gyro_bias = bias;
        self
    }

    pub fn with_linear_accel(mut self, accel: Vec3) -> Self {
        self.linear_accel = accel;
        self
    }

    pub fn attitude(&self) -> Quat {
        self.attitude
    }
}

impl MotionDevice for SimulatedDevice {
    fn available(&self) -> SensorSet {
        self.sensors
    }

    fn read(&mut self, timestamp: f64) -> Option<RawSample> {
        if let Some(last) = self.last_timestamp {
            let dt = (timestamp - last).max(0.0) as f32;
            self.attitude = (self.attitude * Quat::from_scaled_axis(self.angular_velocity * dt)).normalize();
        }
        self.last_timestamp = Some(timestamp);

        let to_device = self.attitude.conjugate();
        Some(RawSample {
            timestamp,
            accel: self
                .sensors
                .accelerometer
                .then(|| to_device * (Vec3::Y + self.linear_accel)),
            gyro: self
                .sensors
                .gyroscope
                .then(|| self.angular_velocity + self.gyro_bias),
            mag: self.sensors.magnetometer.then(|| to_device * WORLD_MAG),
        })
    }
}
