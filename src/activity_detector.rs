use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{check_non_negative, check_order, ConfigError};

/// Parámetros de la histéresis actividad/reposo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Umbral alto para pasar a activo
    pub enter_threshold: f64,
    /// Umbral bajo para volver a reposo (histéresis)
    pub exit_threshold: f64,
    /// Tiempo continuo por encima de `enter_threshold` (s)
    pub min_active_secs: f64,
    /// Tiempo continuo por debajo de `exit_threshold` (s)
    pub min_rest_secs: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            enter_threshold: 0.06,
            exit_threshold: 0.04,
            min_active_secs: 0.35,
            min_rest_secs: 0.9,
        }
    }
}

impl ActivityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("activity.enter_threshold", self.enter_threshold)?;
        check_non_negative("activity.exit_threshold", self.exit_threshold)?;
        check_order(
            "activity.exit_threshold",
            self.exit_threshold,
            self.enter_threshold,
            "must not exceed activity.enter_threshold",
        )?;
        check_non_negative("activity.min_active_secs", self.min_active_secs)?;
        check_non_negative("activity.min_rest_secs", self.min_rest_secs)?;
        Ok(())
    }

    pub fn sanitized(&self) -> Self {
        Self {
            enter_threshold: self.enter_threshold,
            exit_threshold: self.exit_threshold.min(self.enter_threshold),
            min_active_secs: self.min_active_secs.max(0.0),
            min_rest_secs: self.min_rest_secs.max(0.0),
        }
    }
}

/// Estado de actividad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    /// Quieto (estado inicial)
    #[default]
    Resting,
    /// En movimiento
    Active,
}

impl ActivityState {
    pub fn is_active(self) -> bool {
        self == ActivityState::Active
    }
}

/// Máquina de dos estados con histéresis y tiempo mínimo de permanencia
/// sobre una señal filtrada (normalmente `acc_magnitude_lp`).
pub struct ActivityDetector {
    config: ActivityConfig,
    state: ActivityState,
    /// Desde cuándo la señal está por encima del umbral de entrada
    above_since: Option<f64>,
    /// Desde cuándo la señal está por debajo del umbral de salida
    below_since: Option<f64>,
}

impl ActivityDetector {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config: config.sanitized(),
            state: ActivityState::Resting,
            above_since: None,
            below_since: None,
        }
    }

    pub fn update_config(&mut self, config: ActivityConfig) {
        self.config = config.sanitized();
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    /// Vuelve a reposo y limpia ambos temporizadores
    pub fn reset(&mut self) {
        self.state = ActivityState::Resting;
        self.above_since = None;
        self.below_since = None;
    }

    /// Llamar una vez por muestra
    pub fn update(&mut self, timestamp: f64, value: f64) -> ActivityState {
        match self.state {
            ActivityState::Resting => {
                if value >= self.config.enter_threshold {
                    let since = *self.above_since.get_or_insert(timestamp);
                    if timestamp - since >= self.config.min_active_secs {
                        self.state = ActivityState::Active;
                        self.below_since = None;
                        debug!(timestamp, value, "actividad: reposo -> activo");
                    }
                } else {
                    // Cualquier caída reinicia la cuenta
                    self.above_since = None;
                }
            }

            ActivityState::Active => {
                if value <= self.config.exit_threshold {
                    let since = *self.below_since.get_or_insert(timestamp);
                    if timestamp - since >= self.config.min_rest_secs {
                        self.state = ActivityState::Resting;
                        self.above_since = None;
                        debug!(timestamp, value, "actividad: activo -> reposo");
                    }
                } else {
                    self.below_since = None;
                }
            }
        }

        self.state
    }
}

impl Default for ActivityDetector {
    fn default() -> Self {
        Self::new(ActivityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.01;

    fn feed(detector: &mut ActivityDetector, start: f64, secs: f64, value: f64) -> (f64, Vec<ActivityState>) {
        let steps = (secs / DT).round() as usize;
        let mut t = start;
        let mut states = Vec::with_capacity(steps);
        for _ in 0..steps {
            states.push(detector.update(t, value));
            t += DT;
        }
        (t, states)
    }

    #[test]
    fn test_below_enter_threshold_stays_resting() {
        let mut detector = ActivityDetector::default();
        let mut t = 0.0;
        for i in 0..2000 {
            // Oscila bajo el umbral de entrada
            let value = 0.059 * ((i as f64 * 0.1).sin().abs());
            assert_eq!(detector.update(t, value), ActivityState::Resting);
            t += DT;
        }
    }

    #[test]
    fn test_enters_active_after_dwell() {
        let mut detector = ActivityDetector::default();
        let (_, states) = feed(&mut detector, 0.0, 0.5, 0.1);

        // Activo a partir de t >= 0.35
        assert_eq!(states[30], ActivityState::Resting);
        assert_eq!(states[36], ActivityState::Active);
        assert_eq!(*states.last().unwrap(), ActivityState::Active);
    }

    #[test]
    fn test_dwell_boundary_never_transitions() {
        let config = ActivityConfig::default();
        let mut detector = ActivityDetector::new(config.clone());

        // Por encima durante min_active - ε y luego cae
        let mut t = 0.0;
        while t < config.min_active_secs - 0.005 {
            assert_eq!(detector.update(t, 1.0), ActivityState::Resting);
            t += DT;
        }
        for _ in 0..100 {
            assert_eq!(detector.update(t, 0.0), ActivityState::Resting);
            t += DT;
        }
    }

    #[test]
    fn test_momentary_dip_restarts_timer() {
        let mut detector = ActivityDetector::default();
        let (t, _) = feed(&mut detector, 0.0, 0.3, 0.1);
        detector.update(t, 0.01);
        let (_, states) = feed(&mut detector, t + DT, 0.3, 0.1);

        // 0.3 s después de la caída todavía no alcanza 0.35 s continuos
        assert!(states.iter().all(|s| *s == ActivityState::Resting));
    }

    #[test]
    fn test_exit_uses_lower_threshold_and_rest_dwell() {
        let mut detector = ActivityDetector::default();
        let (t, _) = feed(&mut detector, 0.0, 0.5, 0.1);
        assert_eq!(detector.state(), ActivityState::Active);

        // Entre ambos umbrales no sale de activo
        let (t, states) = feed(&mut detector, t, 2.0, 0.05);
        assert!(states.iter().all(|s| *s == ActivityState::Active));

        // Por debajo del umbral de salida necesita 0.9 s
        let (_, states) = feed(&mut detector, t, 1.0, 0.0);
        assert_eq!(states[80], ActivityState::Active);
        assert_eq!(*states.last().unwrap(), ActivityState::Resting);
    }

    #[test]
    fn test_reset_returns_to_resting() {
        let mut detector = ActivityDetector::default();
        feed(&mut detector, 0.0, 0.5, 0.1);
        assert!(detector.state().is_active());

        detector.reset();
        assert_eq!(detector.state(), ActivityState::Resting);

        // El temporizador también se limpió
        assert_eq!(detector.update(10.0, 0.1), ActivityState::Resting);
        assert_eq!(detector.update(10.2, 0.1), ActivityState::Resting);
        assert_eq!(detector.update(10.4, 0.1), ActivityState::Active);
    }

    #[test]
    fn test_reset_reproduces_sequence() {
        let values: Vec<f64> = (0..500).map(|i| 0.2 * ((i as f64) * 0.05).sin().abs()).collect();
        let mut detector = ActivityDetector::default();

        let first: Vec<ActivityState> = values
            .iter()
            .enumerate()
            .map(|(i, v)| detector.update(i as f64 * DT, *v))
            .collect();
        detector.reset();
        let second: Vec<ActivityState> = values
            .iter()
            .enumerate()
            .map(|(i, v)| detector.update(i as f64 * DT, *v))
            .collect();

        assert_eq!(first, second);
        assert!(first.contains(&ActivityState::Active));
    }

    #[test]
    fn test_backward_timestamps_do_not_transition() {
        let mut detector = ActivityDetector::default();
        detector.update(5.0, 0.1);
        // El tiempo retrocede: la diferencia es negativa y no cuenta
        assert_eq!(detector.update(4.0, 0.1), ActivityState::Resting);
        assert_eq!(detector.update(4.5, 0.1), ActivityState::Resting);
        assert_eq!(detector.update(5.4, 0.1), ActivityState::Active);
    }
}
