use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::activity_detector::{ActivityDetector, ActivityState};
use crate::classifier::{ExerciseClassifier, Prediction, RecurrentState};
use crate::config::{ConfigError, TrackerConfig};
use crate::feature_extractor::FeatureExtractor;
use crate::motion_buffer::MotionBuffer;
use crate::rep_detector::{RepDetector, RepEvent};
use crate::session::{CompletedSet, GateStatus, SessionController, SessionSnapshot};
use crate::types::{MotionSample, ProcessedMotion};

/// Lo que produjo una muestra
#[derive(Debug, Clone, Default)]
pub struct SampleOutcome {
    pub rep: Option<RepEvent>,
    pub prediction: Option<Prediction>,
    /// Serie cerrada en este paso (salida por espera, forzada o compuerta)
    pub closed_set: Option<CompletedSet>,
}

/// Contadores de la sesión
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub samples: u64,
    pub batches: u64,
    pub rep_events: u64,
    pub predictions: u64,
    pub predict_errors: u64,
    /// Estimada a partir del último dt positivo
    pub estimated_hz: f64,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
    pub timestamp_anomalies: u64,
}

impl SessionStats {
    pub fn elapsed_secs(&self) -> f64 {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => (last - first).max(0.0),
            _ => 0.0,
        }
    }

    fn record(&mut self, timestamp: f64) {
        self.samples += 1;
        if let Some(last) = self.last_timestamp {
            let dt = timestamp - last;
            if dt > 0.0 {
                self.estimated_hz = 1.0 / dt;
            }
        }
        self.first_timestamp.get_or_insert(timestamp);
        self.last_timestamp = Some(timestamp);
    }
}

/// Pipeline completo de una sesión: extractor → actividad → repeticiones →
/// controlador, con el clasificador invocado cada `stride` muestras.
///
/// Una muestra se procesa entera antes de aceptar la siguiente; todo el
/// estado pertenece a esta instancia.
pub struct WorkoutSession<C: ExerciseClassifier> {
    config: TrackerConfig,
    extractor: FeatureExtractor,
    activity: ActivityDetector,
    reps: RepDetector,
    window: MotionBuffer<ProcessedMotion>,
    classifier: C,
    recurrent_state: RecurrentState,
    controller: SessionController,
    stride_counter: usize,
    stats: SessionStats,
    last_prediction: Option<Prediction>,
}

impl<C: ExerciseClassifier> WorkoutSession<C> {
    pub fn new(config: TrackerConfig, classifier: C) -> Self {
        let recurrent_state = classifier.initial_state();
        Self {
            extractor: FeatureExtractor::new(config.features.clone()),
            activity: ActivityDetector::new(config.activity.clone()),
            reps: RepDetector::new(config.reps.clone()),
            window: MotionBuffer::new(config.classifier.sanitized().window_size),
            controller: SessionController::new(config.session.clone()),
            classifier,
            recurrent_state,
            stride_counter: 0,
            stats: SessionStats::default(),
            last_prediction: None,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            timestamp_anomalies: self.extractor.timestamp_anomalies(),
            ..self.stats.clone()
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.controller.snapshot()
    }

    pub fn completed_sets(&self) -> &[CompletedSet] {
        self.controller.completed_sets()
    }

    pub fn last_prediction(&self) -> Option<&Prediction> {
        self.last_prediction.as_ref()
    }

    pub fn activity_state(&self) -> ActivityState {
        self.activity.state()
    }

    /// Historial reciente del extractor (más antigua → más reciente)
    pub fn recent_history(&self) -> Vec<ProcessedMotion> {
        self.extractor.recent_history()
    }

    pub fn classifier_ready(&self) -> bool {
        self.window.is_ready()
    }

    /// Aplica una configuración nueva entre muestras. Los detectores
    /// conservan su estado; la ventana del clasificador conserva las
    /// muestras más recientes que quepan.
    pub fn reconfigure(&mut self, config: TrackerConfig) -> Result<(), ConfigError> {
        config.validate()?;

        self.extractor.update_config(config.features.clone());
        self.activity.update_config(config.activity.clone());
        self.reps.update_config(config.reps.clone());
        self.controller.update_config(config.session.clone());
        self.window.resize(config.classifier.window_size);
        self.config = config;

        info!("configuración aplicada");
        Ok(())
    }

    pub fn set_weight(&mut self, weight_kg: f64) {
        self.controller.set_weight(weight_kg);
        self.config.session.weight_kg = self.controller.config().weight_kg;
    }

    /// Un paso completo del pipeline
    pub fn handle_sample(&mut self, sample: &MotionSample) -> SampleOutcome {
        self.stats.record(sample.timestamp);

        let motion = self.extractor.process(sample);
        let activity = self.activity.update(motion.timestamp, motion.acc_magnitude_lp);

        let should_count = self
            .controller
            .should_count_reps(activity.is_active(), self.window.is_ready());
        let rep = self.reps.update_motion(&motion, should_count);
        if rep.is_some() {
            self.stats.rep_events += 1;
        }

        let sets_before = self.controller.completed_sets().len();
        self.controller.on_sample(motion.timestamp, activity, rep.as_ref());

        self.window.push(motion);
        self.stride_counter += 1;
        let prediction = self.classify(motion.timestamp);

        SampleOutcome {
            rep,
            prediction,
            closed_set: self.newly_closed(sets_before),
        }
    }

    /// Procesa un lote en orden; devuelve las series cerradas durante el lote
    pub fn handle_batch(&mut self, samples: &[MotionSample]) -> Vec<CompletedSet> {
        self.stats.batches += 1;
        samples
            .iter()
            .filter_map(|sample| self.handle_sample(sample).closed_set)
            .collect()
    }

    /// Consume lotes hasta que el emisor se desconecta y cierra la sesión.
    /// `on_set` recibe cada serie en cuanto se cierra.
    pub fn run<F>(&mut self, receiver: Receiver<Vec<MotionSample>>, mut on_set: F) -> Vec<CompletedSet>
    where
        F: FnMut(&CompletedSet),
    {
        for batch in receiver.iter() {
            debug!(size = batch.len(), "lote recibido");
            for set in self.handle_batch(&batch) {
                on_set(&set);
            }
        }

        info!(samples = self.stats.samples, "fin del flujo de muestras");
        let sets_before = self.controller.completed_sets().len();
        let sets = self.stop();
        for set in &sets[sets_before..] {
            on_set(set);
        }
        sets
    }

    /// Cierra la serie abierta al instante de la última muestra y devuelve
    /// todas las series de la sesión
    pub fn stop(&mut self) -> Vec<CompletedSet> {
        self.recurrent_state.reset();
        self.stride_counter = 0;
        self.controller.stop().to_vec()
    }

    /// Reinicio total: detectores, ventana, estado recurrente, series y
    /// estadísticas. La configuración se conserva.
    pub fn reset(&mut self) {
        self.extractor.reset();
        self.activity.reset();
        self.reps.reset();
        self.window.clear();
        self.recurrent_state = self.classifier.initial_state();
        self.controller.reset();
        self.stride_counter = 0;
        self.stats = SessionStats::default();
        self.last_prediction = None;
    }

    fn classify(&mut self, timestamp: f64) -> Option<Prediction> {
        if !self.window.is_ready() {
            self.controller.set_gate(GateStatus::WarmingUp {
                filled: self.window.len(),
                needed: self.window.capacity(),
            });
            return None;
        }

        let stride = self.config.classifier.stride.max(1);
        if self.stride_counter % stride != 0 {
            self.controller.set_gate(GateStatus::StrideWait);
            return None;
        }

        match self.classifier.predict(self.window.window(), &self.recurrent_state) {
            Ok(mut prediction) => {
                if let Some(next) = prediction.next_state.take() {
                    self.recurrent_state = next;
                }
                self.stats.predictions += 1;
                debug!(
                    label = %prediction.label,
                    confidence = prediction.confidence,
                    top = %prediction.describe_scores(),
                    "predicción"
                );
                self.controller
                    .on_prediction(timestamp, &prediction.label, prediction.confidence);
                self.last_prediction = Some(prediction.clone());
                Some(prediction)
            }
            Err(e) => {
                self.stats.predict_errors += 1;
                warn!(error = %e, "fallo del clasificador, se mantiene la predicción anterior");
                self.controller.on_prediction_error(e.to_string());
                None
            }
        }
    }

    fn newly_closed(&self, sets_before: usize) -> Option<CompletedSet> {
        self.controller.completed_sets().get(sets_before).cloned()
    }
}
