use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{check_positive, ConfigError};
use crate::motion_buffer::MotionBuffer;
use crate::types::{MotionSample, ProcessedMotion, Vector3, DEFAULT_TARGET_HZ, MIN_DT};

/// Muestras mínimas que guarda el historial
const MIN_HISTORY_SAMPLES: usize = 10;

/// Parámetros del extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Frecuencia nominal del sensor (Hz)
    pub target_hz: f64,
    /// Constante de tiempo del filtro paso bajo (s)
    pub low_pass_tau_secs: f64,
    /// Segundos de historial reciente
    pub history_secs: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target_hz: DEFAULT_TARGET_HZ,
            low_pass_tau_secs: 0.25,
            history_secs: 6.0,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("features.target_hz", self.target_hz)?;
        check_positive("features.low_pass_tau_secs", self.low_pass_tau_secs)?;
        check_positive("features.history_secs", self.history_secs)?;
        Ok(())
    }

    /// Copia con los valores llevados a mínimos seguros
    pub fn sanitized(&self) -> Self {
        Self {
            target_hz: finite_or(self.target_hz, DEFAULT_TARGET_HZ).max(1.0),
            low_pass_tau_secs: finite_or(self.low_pass_tau_secs, 0.25).max(MIN_DT),
            history_secs: finite_or(self.history_secs, 0.0).max(0.0),
        }
    }

    /// Número de muestras que caben en el historial
    pub fn history_capacity(&self) -> usize {
        let samples = (self.history_secs * self.target_hz).floor();
        if samples.is_finite() && samples > 0.0 {
            (samples as usize).max(MIN_HISTORY_SAMPLES)
        } else {
            MIN_HISTORY_SAMPLES
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Factor de suavizado EMA para un intervalo `dt` y constante `tau`
pub fn ema_alpha(dt: f64, tau: f64) -> f64 {
    let tau = tau.max(MIN_DT);
    dt / (tau + dt)
}

/// Reloj incremental para los filtros: devuelve el dt desde la muestra
/// anterior, acotado a `MIN_DT`, y si el timestamp retrocedió o se repitió.
#[derive(Debug, Clone, Default)]
pub(crate) struct SampleClock {
    last: Option<f64>,
}

impl SampleClock {
    pub(crate) fn tick(&mut self, timestamp: f64, first_dt: f64) -> (f64, bool) {
        let step = match self.last {
            Some(last) => {
                let raw = timestamp - last;
                (raw.max(MIN_DT), raw <= 0.0)
            }
            None => (first_dt, false),
        };
        self.last = Some(timestamp);
        step
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
    }
}

/// Pitch en radianes: atan2(-gx, sqrt(gy² + gz²))
pub fn gravity_pitch(g: &Vector3) -> f64 {
    (-g.x).atan2((g.y * g.y + g.z * g.z).sqrt())
}

/// Roll en radianes: atan2(gy, gz)
pub fn gravity_roll(g: &Vector3) -> f64 {
    g.y.atan2(g.z)
}

/// Magnitudes, orientación desde la gravedad y filtrado paso bajo por
/// muestra, con historial acotado.
///
/// El EMA sobre ángulos no desenrolla ±π; los rangos de uso quedan lejos
/// de ese borde.
pub struct FeatureExtractor {
    config: FeatureConfig,
    clock: SampleClock,
    acc_lp: f64,
    gyro_lp: f64,
    pitch_lp: f64,
    roll_lp: f64,
    initialized: bool,
    history: MotionBuffer<ProcessedMotion>,
    timestamp_anomalies: u64,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let config = config.sanitized();
        let history = MotionBuffer::new(config.history_capacity());
        Self {
            config,
            clock: SampleClock::default(),
            acc_lp: 0.0,
            gyro_lp: 0.0,
            pitch_lp: 0.0,
            roll_lp: 0.0,
            initialized: false,
            history,
            timestamp_anomalies: 0,
        }
    }

    /// Cambia la configuración; el historial conserva las entradas más
    /// recientes que quepan
    pub fn update_config(&mut self, config: FeatureConfig) {
        self.config = config.sanitized();
        self.history.resize(self.config.history_capacity());
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Limpia filtros e historial; la configuración se mantiene
    pub fn reset(&mut self) {
        self.clock.reset();
        self.acc_lp = 0.0;
        self.gyro_lp = 0.0;
        self.pitch_lp = 0.0;
        self.roll_lp = 0.0;
        self.initialized = false;
        self.history.clear();
        self.timestamp_anomalies = 0;
    }

    pub fn process(&mut self, sample: &MotionSample) -> ProcessedMotion {
        let acc_magnitude = sample.acceleration.magnitude();
        let gyro_magnitude = sample.rotation_rate.magnitude();
        let pitch = gravity_pitch(&sample.gravity);
        let roll = gravity_roll(&sample.gravity);

        let (dt, anomaly) = self.clock.tick(sample.timestamp, 1.0 / self.config.target_hz);
        if anomaly {
            self.timestamp_anomalies += 1;
            debug!(
                timestamp = sample.timestamp,
                total = self.timestamp_anomalies,
                "timestamp no creciente, dt acotado"
            );
        }

        if !self.initialized {
            // La primera muestra siembra el filtro
            self.acc_lp = acc_magnitude;
            self.gyro_lp = gyro_magnitude;
            self.pitch_lp = pitch;
            self.roll_lp = roll;
            self.initialized = true;
        } else {
            let alpha = ema_alpha(dt, self.config.low_pass_tau_secs);
            self.acc_lp = alpha * acc_magnitude + (1.0 - alpha) * self.acc_lp;
            self.gyro_lp = alpha * gyro_magnitude + (1.0 - alpha) * self.gyro_lp;
            self.pitch_lp = alpha * pitch + (1.0 - alpha) * self.pitch_lp;
            self.roll_lp = alpha * roll + (1.0 - alpha) * self.roll_lp;
        }

        let processed = ProcessedMotion {
            timestamp: sample.timestamp,
            acceleration: sample.acceleration,
            rotation_rate: sample.rotation_rate,
            gravity: sample.gravity,
            acc_magnitude,
            gyro_magnitude,
            pitch,
            roll,
            acc_magnitude_lp: self.acc_lp,
            gyro_magnitude_lp: self.gyro_lp,
            pitch_lp: self.pitch_lp,
            roll_lp: self.roll_lp,
        };

        self.history.push(processed);
        processed
    }

    /// Copia del historial (más antigua → más reciente)
    pub fn recent_history(&self) -> Vec<ProcessedMotion> {
        self.history.snapshot()
    }

    pub fn history_capacity(&self) -> usize {
        self.history.capacity()
    }

    /// Muestras con timestamp repetido o hacia atrás desde el último reset
    pub fn timestamp_anomalies(&self) -> u64 {
        self.timestamp_anomalies
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}
