use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{check_non_negative, check_order, check_positive, ConfigError};
use crate::feature_extractor::{ema_alpha, SampleClock};
use crate::types::{ProcessedMotion, DEFAULT_TARGET_HZ, MIN_DT};

/// Política de detección de repeticiones. Es una heurística ajustable,
/// no un detector de picos óptimo: los cinco umbrales son independientes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepConfig {
    /// Separación mínima entre repeticiones contadas (s)
    pub min_rep_interval_secs: f64,
    /// Caída desde el pico candidato para confirmarlo
    pub fall_delta: f64,
    /// Altura mínima del pico sobre la línea base
    pub min_prominence: f64,
    /// Constante de tiempo de la línea base (s)
    pub baseline_tau_secs: f64,
    /// Pasado este intervalo se olvida la cadencia anterior (s)
    pub max_rep_interval_secs: f64,
    /// Máximo de giro exigido durante la ventana del candidato (rad/s)
    pub min_gyro_magnitude: f64,
    /// Tras contar, la señal debe bajar esto desde el pico antes de rearmar
    pub rearm_drop: f64,
}

impl Default for RepConfig {
    fn default() -> Self {
        Self {
            min_rep_interval_secs: 0.80,
            fall_delta: 0.080,
            min_prominence: 0.090,
            baseline_tau_secs: 3.0,
            max_rep_interval_secs: 6.0,
            min_gyro_magnitude: 0.6,
            rearm_drop: 0.85,
        }
    }
}

impl RepConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("reps.min_rep_interval_secs", self.min_rep_interval_secs)?;
        check_positive("reps.fall_delta", self.fall_delta)?;
        check_non_negative("reps.min_prominence", self.min_prominence)?;
        check_positive("reps.baseline_tau_secs", self.baseline_tau_secs)?;
        check_positive("reps.max_rep_interval_secs", self.max_rep_interval_secs)?;
        check_order(
            "reps.min_rep_interval_secs",
            self.min_rep_interval_secs,
            self.max_rep_interval_secs,
            "must not exceed reps.max_rep_interval_secs",
        )?;
        check_non_negative("reps.min_gyro_magnitude", self.min_gyro_magnitude)?;
        check_non_negative("reps.rearm_drop", self.rearm_drop)?;
        Ok(())
    }

    pub fn sanitized(&self) -> Self {
        Self {
            min_rep_interval_secs: self.min_rep_interval_secs.max(0.0),
            fall_delta: self.fall_delta.max(MIN_DT),
            min_prominence: self.min_prominence,
            baseline_tau_secs: self.baseline_tau_secs.max(MIN_DT),
            max_rep_interval_secs: self.max_rep_interval_secs.max(self.min_rep_interval_secs),
            min_gyro_magnitude: self.min_gyro_magnitude.max(0.0),
            rearm_drop: self.rearm_drop.max(0.0),
        }
    }
}

/// Una repetición confirmada
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepEvent {
    /// Instante del pico
    pub timestamp: f64,
    pub peak_value: f64,
    pub baseline_value: f64,
    /// `peak_value - baseline_value`
    pub prominence: f64,
    /// Tiempo desde la repetición contada anterior, si sigue la misma cadencia
    pub rep_interval: Option<f64>,
}

/// Detector de picos con línea base adaptativa, confirmación por caída,
/// anti-rebote temporal y rearme.
pub struct RepDetector {
    config: RepConfig,

    baseline: f64,
    baseline_initialized: bool,
    clock: SampleClock,

    candidate_peak_value: f64,
    candidate_peak_time: f64,
    /// Máximo de la señal de giro desde que empezó el candidato
    peak_gyro_magnitude: f64,

    last_rep_time: Option<f64>,

    armed: bool,
    last_counted_peak_value: f64,
}

impl RepDetector {
    pub fn new(config: RepConfig) -> Self {
        Self {
            config: config.sanitized(),
            baseline: 0.0,
            baseline_initialized: false,
            clock: SampleClock::default(),
            candidate_peak_value: f64::NEG_INFINITY,
            candidate_peak_time: 0.0,
            peak_gyro_magnitude: 0.0,
            last_rep_time: None,
            armed: true,
            last_counted_peak_value: 0.0,
        }
    }

    pub fn update_config(&mut self, config: RepConfig) {
        self.config = config.sanitized();
    }

    pub fn config(&self) -> &RepConfig {
        &self.config
    }

    /// Línea base actual (no inicializada hasta la primera muestra)
    pub fn baseline(&self) -> Option<f64> {
        self.baseline_initialized.then_some(self.baseline)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn reset(&mut self) {
        self.baseline = 0.0;
        self.baseline_initialized = false;
        self.clock.reset();

        self.candidate_peak_value = f64::NEG_INFINITY;
        self.candidate_peak_time = 0.0;
        self.peak_gyro_magnitude = 0.0;

        self.last_rep_time = None;

        self.armed = true;
        self.last_counted_peak_value = 0.0;
    }

    /// Versión sobre una muestra procesada: |pitch filtrado| como señal y
    /// magnitud de giro filtrada como compuerta
    pub fn update_motion(&mut self, motion: &ProcessedMotion, should_count_reps: bool) -> Option<RepEvent> {
        self.update(
            motion.timestamp,
            motion.pitch_lp.abs(),
            motion.gyro_magnitude_lp,
            should_count_reps,
        )
    }

    pub fn update(
        &mut self,
        timestamp: f64,
        value: f64,
        gyro_magnitude: f64,
        should_count_reps: bool,
    ) -> Option<RepEvent> {
        // La línea base sigue la deriva aunque no se cuente
        self.update_baseline(timestamp, value);

        if !should_count_reps {
            self.candidate_peak_value = f64::NEG_INFINITY;
            self.candidate_peak_time = timestamp;
            self.peak_gyro_magnitude = 0.0;
            self.armed = true;
            return None;
        }

        if !self.armed {
            // Exigir una bajada real desde el último pico contado
            if value <= self.last_counted_peak_value - self.config.rearm_drop {
                self.armed = true;
                self.candidate_peak_value = value;
                self.candidate_peak_time = timestamp;
                self.peak_gyro_magnitude = gyro_magnitude;
            }
            return None;
        }

        self.peak_gyro_magnitude = self.peak_gyro_magnitude.max(gyro_magnitude);

        if value > self.candidate_peak_value {
            self.candidate_peak_value = value;
            self.candidate_peak_time = timestamp;
            return None;
        }

        if self.candidate_peak_value - value < self.config.fall_delta {
            return None;
        }

        // Pico confirmado
        let prominence = self.candidate_peak_value - self.baseline;

        if let Some(last) = self.last_rep_time {
            let interval = self.candidate_peak_time - last;
            if interval < self.config.min_rep_interval_secs {
                self.reset_candidate(value, timestamp);
                return None;
            }
            if interval > self.config.max_rep_interval_secs {
                self.last_rep_time = None;
            }
        }

        if prominence < self.config.min_prominence {
            self.reset_candidate(value, timestamp);
            return None;
        }

        if self.peak_gyro_magnitude < self.config.min_gyro_magnitude {
            debug!(
                timestamp = self.candidate_peak_time,
                gyro = self.peak_gyro_magnitude,
                "pico descartado: sin giro suficiente"
            );
            self.reset_candidate(value, timestamp);
            return None;
        }

        let rep_interval = self.last_rep_time.map(|last| self.candidate_peak_time - last);
        self.last_rep_time = Some(self.candidate_peak_time);

        self.last_counted_peak_value = self.candidate_peak_value;
        self.armed = false;

        let event = RepEvent {
            timestamp: self.candidate_peak_time,
            peak_value: self.candidate_peak_value,
            baseline_value: self.baseline,
            prominence,
            rep_interval,
        };

        self.reset_candidate(value, timestamp);
        Some(event)
    }

    fn reset_candidate(&mut self, value: f64, timestamp: f64) {
        self.candidate_peak_value = value;
        self.candidate_peak_time = timestamp;
        self.peak_gyro_magnitude = 0.0;
    }

    fn update_baseline(&mut self, timestamp: f64, value: f64) {
        let (dt, _) = self.clock.tick(timestamp, 1.0 / DEFAULT_TARGET_HZ);

        if !self.baseline_initialized {
            self.baseline = value;
            self.baseline_initialized = true;
        } else {
            let alpha = ema_alpha(dt, self.config.baseline_tau_secs);
            self.baseline = alpha * value + (1.0 - alpha) * self.baseline;
        }
    }
}

impl Default for RepDetector {
    fn default() -> Self {
        Self::new(RepConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const HZ: f64 = 50.0;

    /// Alimenta el detector con `signal(t)` y giro constante
    fn run<F: Fn(f64) -> f64>(detector: &mut RepDetector, secs: f64, gyro: f64, signal: F) -> Vec<RepEvent> {
        let n = (secs * HZ).round() as usize;
        (0..n)
            .filter_map(|i| {
                let t = i as f64 / HZ;
                detector.update(t, signal(t), gyro, true)
            })
            .collect()
    }

    fn sinusoid(offset: f64, amplitude: f64, period: f64) -> impl Fn(f64) -> f64 {
        move |t| offset + amplitude * (2.0 * PI * t / period).sin()
    }

    #[test]
    fn test_sinusoid_counts_one_rep_per_period() {
        let mut detector = RepDetector::default();
        let (amplitude, period, duration) = (0.6, 2.0, 20.0);
        let events = run(&mut detector, duration, 1.0, sinusoid(0.8, amplitude, period));

        let expected = (duration / period).floor() as i64;
        assert!(
            (events.len() as i64 - expected).abs() <= 1,
            "expected ~{} reps, got {}",
            expected,
            events.len()
        );

        for event in &events {
            assert_relative_eq!(event.prominence, amplitude, max_relative = 0.25);
            assert_relative_eq!(event.peak_value, 1.4, epsilon = 1e-3);
        }

        // Cadencia estable: intervalos ≈ periodo
        for event in events.iter().skip(1) {
            let interval = event.rep_interval.expect("misma cadencia");
            assert_relative_eq!(interval, period, epsilon = 0.05);
        }
    }

    #[test]
    fn test_never_emits_closer_than_min_interval() {
        let mut detector = RepDetector::default();
        // Oscilación rápida con ruido: picos cada 0.5 s
        let events = run(&mut detector, 30.0, 1.0, |t| {
            0.8 + 0.7 * (2.0 * PI * t / 0.5).sin() + 0.05 * (2.0 * PI * t / 0.07).sin()
        });

        assert!(!events.is_empty());
        let min = detector.config().min_rep_interval_secs;
        for pair in events.windows(2) {
            assert!(pair[1].timestamp - pair[0].timestamp >= min);
        }
    }

    #[test]
    fn test_monotonic_ramp_emits_nothing() {
        let mut detector = RepDetector::default();
        let events = run(&mut detector, 10.0, 2.0, |t| 0.1 * t);
        assert!(events.is_empty());
    }

    #[test]
    fn test_static_pose_without_rotation_is_discarded() {
        let mut detector = RepDetector::default();
        let events = run(&mut detector, 20.0, 0.1, sinusoid(0.8, 0.6, 2.0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_small_prominence_is_discarded() {
        let mut detector = RepDetector::default();
        // Amplitud por debajo de min_prominence
        let events = run(&mut detector, 20.0, 1.0, sinusoid(0.8, 0.05, 2.0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_rearm_prevents_double_count() {
        let mut detector = RepDetector::default();

        // Sube a 1.4, baja a 1.2, vuelve a 1.35 y solo entonces baja del todo
        let profile = |t: f64| -> f64 {
            match t {
                t if t < 1.0 => 0.2 + 1.2 * t,
                t if t < 1.5 => 1.4 - 0.4 * (t - 1.0),
                t if t < 2.5 => 1.2 + 0.15 * (t - 1.5),
                t if t < 3.5 => 1.35 - 1.15 * (t - 2.5),
                _ => 0.2,
            }
        };
        let events = run(&mut detector, 6.0, 1.0, profile);

        assert_eq!(events.len(), 1);
        assert_relative_eq!(events[0].timestamp, 1.0, epsilon = 0.03);
        assert!(detector.is_armed());
    }

    #[test]
    fn test_long_pause_resets_cadence() {
        let mut detector = RepDetector::default();
        let bump = |center: f64| move |t: f64| 0.2 + 1.2 * (-((t - center) / 0.3).powi(2)).exp();

        let first = bump(1.0);
        let second = bump(12.0);
        let events = run(&mut detector, 14.0, 1.0, |t| first(t).max(second(t)));

        assert_eq!(events.len(), 2);
        assert!(events[0].rep_interval.is_none());
        assert!(events[1].rep_interval.is_none());
    }

    #[test]
    fn test_gating_off_suppresses_and_tracks_baseline() {
        let mut detector = RepDetector::default();
        let signal = sinusoid(0.8, 0.6, 2.0);

        for i in 0..1000 {
            let t = i as f64 / HZ;
            assert!(detector.update(t, signal(t), 1.0, false).is_none());
        }
        for i in 1000..1500 {
            let t = i as f64 / HZ;
            assert!(detector.update(t, 2.0, 1.0, false).is_none());
        }

        // La línea base siguió la señal aunque no se contara
        let baseline = detector.baseline().unwrap();
        assert!(baseline > 1.9, "baseline {}", baseline);
        assert!(detector.is_armed());
    }

    #[test]
    fn test_reset_reproduces_events() {
        let mut detector = RepDetector::default();
        let signal = sinusoid(0.8, 0.6, 1.7);

        let first = run(&mut detector, 15.0, 1.0, &signal);
        detector.reset();
        assert!(detector.baseline().is_none());
        let second = run(&mut detector, 15.0, 1.0, &signal);

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_update_motion_uses_absolute_pitch() {
        let mut detector = RepDetector::default();
        let motion = |t: f64, pitch: f64| ProcessedMotion {
            timestamp: t,
            acceleration: Default::default(),
            rotation_rate: Default::default(),
            gravity: Default::default(),
            acc_magnitude: 0.0,
            gyro_magnitude: 1.0,
            pitch,
            roll: 0.0,
            acc_magnitude_lp: 0.0,
            gyro_magnitude_lp: 1.0,
            pitch_lp: pitch,
            roll_lp: 0.0,
        };

        // Pitch negativo: el pico en |pitch| se detecta igual
        let signal = sinusoid(0.8, 0.6, 2.0);
        let events: Vec<RepEvent> = (0..500)
            .filter_map(|i| {
                let t = i as f64 / HZ;
                detector.update_motion(&motion(t, -signal(t)), true)
            })
            .collect();

        assert!(events.len() >= 4);
        assert!(events.iter().all(|e| e.peak_value > 0.0));
    }
}
