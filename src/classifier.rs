use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{check_count, ConfigError};
use crate::types::{ProcessedMotion, CLASSIFIER_STRIDE, CLASSIFIER_WINDOW};

/// Cuántas clases se guardan en `Prediction::scores`
pub const TOP_K: usize = 5;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier not ready: {filled}/{needed} samples")]
    NotReady { filled: usize, needed: usize },

    #[error("Invalid window size: expected {expected}, got {actual}")]
    InvalidWindowSize { expected: usize, actual: usize },

    #[error("Recurrent state size mismatch: expected {expected}, got {actual}")]
    StateSizeMismatch { expected: usize, actual: usize },

    #[error("Model error: {0}")]
    Backend(String),

    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    OnnxError(#[from] ort::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No output tensor found")]
    NoOutputTensor,

    #[error("Missing model {kind}")]
    MissingIo { kind: &'static str },
}

/// Tamaño de ventana y cada cuántas muestras se invoca al modelo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierWindowConfig {
    pub window_size: usize,
    pub stride: usize,
}

impl Default for ClassifierWindowConfig {
    fn default() -> Self {
        Self {
            window_size: CLASSIFIER_WINDOW,
            stride: CLASSIFIER_STRIDE,
        }
    }
}

impl ClassifierWindowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_count("classifier.window_size", self.window_size)?;
        check_count("classifier.stride", self.stride)?;
        Ok(())
    }

    pub fn sanitized(&self) -> Self {
        Self {
            window_size: self.window_size.max(1),
            stride: self.stride.max(1),
        }
    }
}

/// Estado recurrente opaco del modelo (p. ej. LSTM). La sesión lo guarda
/// entre llamadas sin interpretarlo y lo pone a cero al reiniciar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecurrentState {
    values: Vec<f32>,
}

impl RecurrentState {
    /// Estado a cero con `len` valores
    pub fn zeroed(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn check_len(&self, expected: usize) -> Result<(), ClassifierError> {
        if self.values.len() != expected {
            return Err(ClassifierError::StateSizeMismatch {
                expected,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    /// Vuelve a la forma cero conservando el tamaño
    pub fn reset(&mut self) {
        self.values.fill(0.0);
    }
}

/// Resultado de una inferencia
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prediction {
    /// Etiqueta tal como la devuelve el modelo (sin normalizar)
    pub label: String,
    /// En [0, 1]
    pub confidence: f64,
    /// Top-K de probabilidades (descendente), puede estar vacío
    pub scores: Vec<(String, f64)>,
    /// Estado recurrente a usar en la próxima llamada
    pub next_state: Option<RecurrentState>,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
            scores: Vec::new(),
            next_state: None,
        }
    }

    /// Construye la predicción desde un mapa de probabilidades: gana la
    /// etiqueta más probable
    pub fn from_scores(scores: HashMap<String, f64>) -> Option<Self> {
        let mut sorted: Vec<(String, f64)> = scores.into_iter().collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let (label, confidence) = sorted.first().cloned()?;
        sorted.truncate(TOP_K);
        Some(Self {
            label,
            confidence,
            scores: sorted,
            next_state: None,
        })
    }

    /// "squat=0.70, curl=0.20" para diagnóstico
    pub fn describe_scores(&self) -> String {
        self.scores
            .iter()
            .map(|(label, score)| format!("{}={:.2}", label, score))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Contrato del clasificador externo: recibe las últimas N muestras
/// procesadas (más antigua → más reciente) y el estado recurrente.
pub trait ExerciseClassifier {
    /// Estado inicial (forma cero) para modelos recurrentes
    fn initial_state(&self) -> RecurrentState {
        RecurrentState::default()
    }

    fn predict(
        &mut self,
        window: &[ProcessedMotion],
        state: &RecurrentState,
    ) -> Result<Prediction, ClassifierError>;
}

impl<C: ExerciseClassifier + ?Sized> ExerciseClassifier for Box<C> {
    fn initial_state(&self) -> RecurrentState {
        (**self).initial_state()
    }

    fn predict(
        &mut self,
        window: &[ProcessedMotion],
        state: &RecurrentState,
    ) -> Result<Prediction, ClassifierError> {
        (**self).predict(window, state)
    }
}

/// Normaliza una etiqueta del modelo: minúsculas, sin espacios ni
/// puntuación ("Push-Up " -> "pushup")
pub fn normalize_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Clasificador de referencia para grabaciones etiquetadas: responde con
/// la etiqueta mayoritaria de la ventana y su proporción como confianza.
pub struct LabelTrackClassifier {
    /// (inicio, etiqueta) ordenado por tiempo
    track: Vec<(f64, String)>,
}

impl LabelTrackClassifier {
    /// `labels` son pares (timestamp, etiqueta) de la grabación
    pub fn new(labels: impl IntoIterator<Item = (f64, String)>) -> Self {
        let mut track: Vec<(f64, String)> = Vec::new();
        let mut sorted: Vec<(f64, String)> = labels.into_iter().collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Solo los cambios de etiqueta
        for (t, label) in sorted {
            if track.last().map(|(_, last)| last != &label).unwrap_or(true) {
                track.push((t, label));
            }
        }

        Self { track }
    }

    fn label_at(&self, timestamp: f64) -> Option<&str> {
        let idx = self.track.partition_point(|(t, _)| *t <= timestamp);
        idx.checked_sub(1).map(|i| self.track[i].1.as_str())
    }
}

impl ExerciseClassifier for LabelTrackClassifier {
    fn predict(
        &mut self,
        window: &[ProcessedMotion],
        _state: &RecurrentState,
    ) -> Result<Prediction, ClassifierError> {
        if window.is_empty() {
            return Err(ClassifierError::NotReady { filled: 0, needed: 1 });
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for motion in window {
            if let Some(label) = self.label_at(motion.timestamp) {
                *counts.entry(label.to_string()).or_insert(0) += 1;
            }
        }

        let total = window.len() as f64;
        let scores = counts
            .into_iter()
            .map(|(label, count)| (label, count as f64 / total))
            .collect();

        Prediction::from_scores(scores)
            .ok_or_else(|| ClassifierError::Backend("no labels cover the window".to_string()))
    }
}

/// Siempre la misma etiqueta y confianza (pruebas de banco sin modelo)
pub struct FixedLabelClassifier {
    label: String,
    confidence: f64,
}

impl FixedLabelClassifier {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl ExerciseClassifier for FixedLabelClassifier {
    fn predict(
        &mut self,
        _window: &[ProcessedMotion],
        _state: &RecurrentState,
    ) -> Result<Prediction, ClassifierError> {
        Ok(Prediction::new(self.label.clone(), self.confidence))
    }
}
