use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity_detector::ActivityState;
use crate::classifier::normalize_label;
use crate::config::{check_non_negative, check_order, check_unit, ConfigError};
use crate::rep_detector::RepEvent;
use crate::types::IDLE_LABEL;

/// Umbrales y tiempos de la máquina de estados de ejercicio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Confianza mínima para bloquear una etiqueta
    pub enter_confidence: f64,
    /// Por debajo de esto una predicción no cuenta como "fuerte"
    pub exit_confidence: f64,
    /// Tiempo sin predicción fuerte antes de cerrar la serie (s)
    pub hold_secs: f64,
    /// Margen extra para la salida forzada si el modelo se detiene (s)
    pub fallback_extra_secs: f64,
    /// Validez de las repeticiones pendientes (s)
    pub pending_window_secs: f64,
    /// Fuerza reposo cuando el detector de actividad dice Resting
    pub activity_gate: bool,
    /// Peso que se anota en cada serie
    pub weight_kg: f64,
    /// Etiquetas equivalentes a "sin ejercicio" (se normalizan)
    pub idle_labels: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enter_confidence: 0.60,
            exit_confidence: 0.45,
            hold_secs: 1.0,
            fallback_extra_secs: 0.6,
            pending_window_secs: 1.2,
            activity_gate: false,
            weight_kg: 10.0,
            idle_labels: vec![IDLE_LABEL.to_string()],
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("session.enter_confidence", self.enter_confidence)?;
        check_unit("session.exit_confidence", self.exit_confidence)?;
        check_order(
            "session.exit_confidence",
            self.exit_confidence,
            self.enter_confidence,
            "must not exceed session.enter_confidence",
        )?;
        check_non_negative("session.hold_secs", self.hold_secs)?;
        check_non_negative("session.fallback_extra_secs", self.fallback_extra_secs)?;
        check_non_negative("session.pending_window_secs", self.pending_window_secs)?;
        check_non_negative("session.weight_kg", self.weight_kg)?;
        Ok(())
    }

    pub fn sanitized(&self) -> Self {
        let enter = clamp_unit(self.enter_confidence);
        Self {
            enter_confidence: enter,
            exit_confidence: clamp_unit(self.exit_confidence).min(enter),
            hold_secs: self.hold_secs.max(0.0),
            fallback_extra_secs: self.fallback_extra_secs.max(0.0),
            pending_window_secs: self.pending_window_secs.max(0.0),
            activity_gate: self.activity_gate,
            weight_kg: if self.weight_kg.is_finite() { self.weight_kg.max(0.0) } else { 0.0 },
            idle_labels: self.idle_labels.iter().map(|l| normalize_label(l)).collect(),
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Modo de la sesión
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "label", rename_all = "lowercase")]
pub enum ExerciseMode {
    /// Sin etiqueta bloqueada
    #[default]
    Idle,
    /// Etiqueta bloqueada y serie abierta
    Exercising(String),
}

impl ExerciseMode {
    pub fn is_exercising(&self) -> bool {
        matches!(self, ExerciseMode::Exercising(_))
    }

    pub fn label(&self) -> &str {
        match self {
            ExerciseMode::Idle => IDLE_LABEL,
            ExerciseMode::Exercising(label) => label,
        }
    }
}

/// Serie terminada. Solo existe si tuvo al menos una repetición.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedSet {
    pub exercise: String,
    /// 1-based, por ejercicio
    pub set_index: u32,
    pub reps: u32,
    pub weight_kg: f64,
    pub started_at: f64,
    pub ended_at: f64,
    pub avg_confidence: f64,
}

impl CompletedSet {
    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).max(0.0)
    }

    pub fn volume(&self) -> f64 {
        self.reps as f64 * self.weight_kg
    }
}

/// Último motivo por el que la sesión hizo (o no hizo) una transición
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GateStatus {
    #[default]
    Ready,
    /// La ventana del clasificador aún no está llena
    WarmingUp { filled: usize, needed: usize },
    /// Entre dos invocaciones del clasificador
    StrideWait,
    BelowEnter,
    Entered(String),
    Updated(String),
    HoldTimeout,
    FallbackExit,
    ActivityGate,
    PredictError(String),
    Stopped,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateStatus::Ready => write!(f, "-"),
            GateStatus::WarmingUp { filled, needed } => write!(f, "warming_up {}/{}", filled, needed),
            GateStatus::StrideWait => write!(f, "stride_wait"),
            GateStatus::BelowEnter => write!(f, "below_enter"),
            GateStatus::Entered(label) => write!(f, "enter {}", label),
            GateStatus::Updated(label) => write!(f, "update {}", label),
            GateStatus::HoldTimeout => write!(f, "hold_timeout"),
            GateStatus::FallbackExit => write!(f, "fallback_exit"),
            GateStatus::ActivityGate => write!(f, "activity_gate"),
            GateStatus::PredictError(msg) => write!(f, "predict_error: {}", msg),
            GateStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Vista de solo lectura del estado, segura de consultar tras cada muestra
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub timestamp: Option<f64>,
    pub activity: ActivityState,
    pub mode: ExerciseMode,
    /// Etiqueta mostrada ("idle" fuera de una serie)
    pub label: String,
    pub confidence: f64,
    pub reps: u32,
    /// Repeticiones aún sin atribuir
    pub pending_reps: u32,
    /// 0 fuera de una serie
    pub set_index: u32,
    pub last_rep_at: Option<f64>,
    pub raw_label: Option<String>,
    pub raw_confidence: f64,
    pub gate: GateStatus,
    /// Última transición o error del controlador; el calentamiento y el
    /// stride no lo pisan
    pub last_event: GateStatus,
    pub completed_sets: usize,
}

struct OpenSet {
    started_at: f64,
    set_index: u32,
    confidence_sum: f64,
    confidence_count: u32,
}

/// Máquina de estados Idle/Exercising: agrupa repeticiones en series
/// según las predicciones del clasificador.
pub struct SessionController {
    config: SessionConfig,
    mode: ExerciseMode,
    activity: ActivityState,

    label: String,
    confidence: f64,
    raw_label: Option<String>,
    raw_confidence: f64,
    gate: GateStatus,
    last_event: GateStatus,

    reps: u32,
    last_rep_at: Option<f64>,
    pending_reps: u32,
    pending_last_rep_at: f64,

    last_strong_prediction_at: f64,
    last_timestamp: Option<f64>,

    open_set: Option<OpenSet>,
    set_index_by_exercise: HashMap<String, u32>,
    completed_sets: Vec<CompletedSet>,
}

impl SessionController {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: config.sanitized(),
            mode: ExerciseMode::Idle,
            activity: ActivityState::Resting,
            label: IDLE_LABEL.to_string(),
            confidence: 1.0,
            raw_label: None,
            raw_confidence: 0.0,
            gate: GateStatus::Ready,
            last_event: GateStatus::Ready,
            reps: 0,
            last_rep_at: None,
            pending_reps: 0,
            pending_last_rep_at: 0.0,
            last_strong_prediction_at: 0.0,
            last_timestamp: None,
            open_set: None,
            set_index_by_exercise: HashMap::new(),
            completed_sets: Vec::new(),
        }
    }

    pub fn update_config(&mut self, config: SessionConfig) {
        self.config = config.sanitized();
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Aplica a las series que se cierren a partir de ahora
    pub fn set_weight(&mut self, weight_kg: f64) {
        if weight_kg.is_finite() && weight_kg >= 0.0 {
            self.config.weight_kg = weight_kg;
        } else {
            warn!(weight_kg, "peso inválido ignorado");
        }
    }

    pub fn mode(&self) -> &ExerciseMode {
        &self.mode
    }

    pub fn gate(&self) -> &GateStatus {
        &self.gate
    }

    pub fn last_event(&self) -> &GateStatus {
        &self.last_event
    }

    pub fn completed_sets(&self) -> &[CompletedSet] {
        &self.completed_sets
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    /// Solo se cuentan repeticiones dentro de una serie, o en reposo de
    /// etiqueta si hay movimiento y el clasificador ya está listo
    pub fn should_count_reps(&self, active: bool, classifier_ready: bool) -> bool {
        self.mode.is_exercising() || (active && classifier_ready)
    }

    pub fn is_idle_label(&self, normalized: &str) -> bool {
        normalized.is_empty()
            || normalized == IDLE_LABEL
            || self.config.idle_labels.iter().any(|l| l == normalized)
    }

    /// Paso por muestra: contabiliza la repetición (si la hay), caduca las
    /// pendientes y aplica la salida forzada y la compuerta de actividad.
    pub fn on_sample(&mut self, timestamp: f64, activity: ActivityState, rep: Option<&RepEvent>) {
        self.last_timestamp = Some(timestamp);
        self.activity = activity;

        if let Some(rep) = rep {
            self.last_rep_at = Some(rep.timestamp);
            if self.mode.is_exercising() {
                self.reps += 1;
                debug!(label = self.mode.label(), reps = self.reps, "repetición");
            } else {
                self.pending_reps += 1;
                self.pending_last_rep_at = rep.timestamp;
                debug!(pending = self.pending_reps, "repetición pendiente");
            }
        }

        if self.pending_reps > 0 && timestamp - self.pending_last_rep_at > self.config.pending_window_secs {
            debug!(discarded = self.pending_reps, "repeticiones pendientes caducadas");
            self.clear_pending();
        }

        if !self.mode.is_exercising() {
            return;
        }

        if timestamp - self.last_strong_prediction_at > self.config.hold_secs + self.config.fallback_extra_secs {
            self.exit_exercise(timestamp, GateStatus::FallbackExit);
        } else if self.config.activity_gate && !activity.is_active() {
            self.exit_exercise(timestamp, GateStatus::ActivityGate);
        }
    }

    /// Una predicción del clasificador (una vez por stride)
    pub fn on_prediction(&mut self, timestamp: f64, raw_label: &str, confidence: f64) {
        let confidence = clamp_unit(confidence);
        self.raw_label = Some(raw_label.to_string());
        self.raw_confidence = confidence;

        let label = normalize_label(raw_label);
        let is_idle = self.is_idle_label(&label);

        if self.config.activity_gate && !self.activity.is_active() {
            if self.mode.is_exercising() {
                self.exit_exercise(timestamp, GateStatus::ActivityGate);
            } else {
                self.record(GateStatus::ActivityGate);
            }
            return;
        }

        match &self.mode {
            ExerciseMode::Idle => {
                if confidence >= self.config.enter_confidence && !is_idle {
                    self.enter_exercise(timestamp, label, confidence);
                } else {
                    // Las pendientes se quedan: su caducidad las limpia
                    self.label = IDLE_LABEL.to_string();
                    self.confidence = 1.0;
                    self.record(GateStatus::BelowEnter);
                }
            }

            ExerciseMode::Exercising(locked) => {
                if confidence >= self.config.exit_confidence && !is_idle {
                    // Otra etiqueta no corta la serie: pasa a ser la bloqueada
                    if *locked != label {
                        debug!(from = %locked, to = %label, "cambio de etiqueta en la serie");
                        self.mode = ExerciseMode::Exercising(label.clone());
                    }
                    self.last_strong_prediction_at = timestamp;
                    self.label = label.clone();
                    self.confidence = confidence;
                    if let Some(set) = self.open_set.as_mut() {
                        set.confidence_sum += confidence;
                        set.confidence_count += 1;
                    }
                    self.record(GateStatus::Updated(label));
                } else if timestamp - self.last_strong_prediction_at > self.config.hold_secs {
                    self.exit_exercise(timestamp, GateStatus::HoldTimeout);
                }
            }
        }
    }

    /// Falla la inferencia: se conserva la etiqueta y confianza anteriores
    pub fn on_prediction_error(&mut self, message: impl Into<String>) {
        self.record(GateStatus::PredictError(message.into()));
    }

    /// Estado de diagnóstico fijado por el pipeline (calentamiento, stride)
    pub fn set_gate(&mut self, gate: GateStatus) {
        self.gate = gate;
    }

    /// Cierre final: misma lógica que la salida forzada, al instante de la
    /// última muestra
    pub fn stop(&mut self) -> &[CompletedSet] {
        let end = self.last_timestamp.unwrap_or(0.0);
        self.exit_exercise(end, GateStatus::Stopped);
        self.clear_pending();
        self.raw_label = None;
        self.raw_confidence = 0.0;
        &self.completed_sets
    }

    /// Borra todo el estado acumulado, incluidas las series terminadas.
    /// La configuración se conserva.
    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = Self::new(config);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            timestamp: self.last_timestamp,
            activity: self.activity,
            mode: self.mode.clone(),
            label: self.label.clone(),
            confidence: self.confidence,
            reps: self.reps,
            pending_reps: self.pending_reps,
            set_index: self.open_set.as_ref().map(|s| s.set_index).unwrap_or(0),
            last_rep_at: self.last_rep_at,
            raw_label: self.raw_label.clone(),
            raw_confidence: self.raw_confidence,
            gate: self.gate.clone(),
            last_event: self.last_event.clone(),
            completed_sets: self.completed_sets.len(),
        }
    }

    fn enter_exercise(&mut self, timestamp: f64, label: String, confidence: f64) {
        let set_index = self.set_index_by_exercise.entry(label.clone()).or_insert(0);
        *set_index += 1;
        let set_index = *set_index;

        // La repetición que disparó la entrada no se pierde
        self.reps = self.pending_reps;
        if self.pending_reps > 0 {
            self.last_rep_at = Some(self.pending_last_rep_at);
        }
        self.clear_pending();

        self.last_strong_prediction_at = timestamp;
        self.label = label.clone();
        self.confidence = confidence;
        self.open_set = Some(OpenSet {
            started_at: timestamp,
            set_index,
            confidence_sum: confidence,
            confidence_count: 1,
        });

        info!(
            exercise = %label,
            set_index,
            confidence,
            seeded_reps = self.reps,
            "inicio de serie"
        );
        self.record(GateStatus::Entered(label.clone()));
        self.mode = ExerciseMode::Exercising(label);
    }

    fn exit_exercise(&mut self, timestamp: f64, reason: GateStatus) {
        self.finish_set(timestamp);

        self.mode = ExerciseMode::Idle;
        self.label = IDLE_LABEL.to_string();
        self.confidence = 1.0;
        self.reps = 0;
        self.clear_pending();
        self.record(reason);
    }

    fn record(&mut self, status: GateStatus) {
        self.last_event = status.clone();
        self.gate = status;
    }

    fn finish_set(&mut self, end: f64) {
        let Some(set) = self.open_set.take() else {
            return;
        };
        let exercise = self.mode.label().to_string();

        if self.is_idle_label(&exercise) || self.reps == 0 {
            debug!(exercise = %exercise, set_index = set.set_index, "serie sin repeticiones descartada");
            return;
        }

        let avg_confidence = if set.confidence_count > 0 {
            set.confidence_sum / set.confidence_count as f64
        } else {
            self.confidence
        };

        let completed = CompletedSet {
            exercise,
            set_index: set.set_index,
            reps: self.reps,
            weight_kg: self.config.weight_kg,
            started_at: set.started_at,
            ended_at: end,
            avg_confidence,
        };
        info!(
            exercise = %completed.exercise,
            set_index = completed.set_index,
            reps = completed.reps,
            avg_confidence = completed.avg_confidence,
            "serie terminada"
        );
        self.completed_sets.push(completed);
    }

    fn clear_pending(&mut self) {
        self.pending_reps = 0;
        self.pending_last_rep_at = 0.0;
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
