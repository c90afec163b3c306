use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Value, ValueType};
use serde::Deserialize;
use tracing::{info, warn};

use crate::classifier::{ClassifierError, ExerciseClassifier, Prediction, RecurrentState};
use crate::types::{ProcessedMotion, CLASSIFIER_CHANNELS};

/// Nombres de la entrada/salida del estado recurrente
const STATE_INPUT: &str = "stateIn";
const STATE_OUTPUT: &str = "stateOut";

#[derive(Debug, Deserialize)]
struct ClassesJson {
    index_to_class: HashMap<String, String>,
}

/// Clasificador sobre ONNX Runtime. Entrada `[1, N, 9]` (acc, giro,
/// gravedad por muestra); salida de probabilidades por clase en el orden
/// de `classes.json`.
pub struct OnnxExerciseClassifier {
    session: Session,
    labels: Vec<String>,
    input_name: String,
    prob_output_name: String,
    /// Forma del estado si el modelo tiene `stateIn`
    state_shape: Option<Vec<usize>>,
    has_state_input: bool,
    has_state_output: bool,
}

impl OnnxExerciseClassifier {
    pub fn new(model_path: impl AsRef<Path>, classes_path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let model_path = model_path.as_ref();
        let labels = Self::load_classes(classes_path.as_ref())?;

        let session = Session::builder()?.commit_from_file(model_path)?;

        let has_state_input = session.inputs.iter().any(|input| input.name == STATE_INPUT);
        let has_state_output = session.outputs.iter().any(|output| output.name == STATE_OUTPUT);

        let input_name = session
            .inputs
            .iter()
            .find(|input| input.name != STATE_INPUT)
            .map(|input| input.name.clone())
            .ok_or(ClassifierError::MissingIo { kind: "input" })?;

        let prob_output_name = session
            .outputs
            .iter()
            .filter(|output| output.name != STATE_OUTPUT)
            .find(|output| {
                matches!(
                    output.output_type,
                    ValueType::Tensor {
                        ty: TensorElementType::Float32,
                        ..
                    }
                )
            })
            .map(|output| output.name.clone())
            .ok_or(ClassifierError::MissingIo { kind: "output" })?;

        info!(
            model = %model_path.display(),
            classes = labels.len(),
            input = %input_name,
            output = %prob_output_name,
            recurrent = has_state_input,
            "modelo ONNX cargado"
        );

        Ok(Self {
            session,
            labels,
            input_name,
            prob_output_name,
            state_shape: None,
            has_state_input,
            has_state_output,
        })
    }

    /// Forma del tensor `stateIn` (p. ej. `[1, 64]`) para modelos recurrentes
    pub fn with_state_shape(mut self, shape: Vec<usize>) -> Self {
        if !self.has_state_input {
            warn!("el modelo no tiene {}, se ignora la forma del estado", STATE_INPUT);
        }
        self.state_shape = Some(shape);
        self
    }

    fn load_classes(path: &Path) -> Result<Vec<String>, ClassifierError> {
        let content = fs::read_to_string(path)?;
        let data: ClassesJson = serde_json::from_str(&content)?;

        let mut pairs: Vec<(usize, String)> = data
            .index_to_class
            .into_iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v)))
            .collect();

        pairs.sort_by_key(|(idx, _)| *idx);
        Ok(pairs.into_iter().map(|(_, name)| name).collect())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn window_tensor(window: &[ProcessedMotion]) -> Vec<f32> {
        let mut data = vec![0.0_f32; window.len() * CLASSIFIER_CHANNELS];
        for (motion, row) in window.iter().zip(data.chunks_exact_mut(CLASSIFIER_CHANNELS)) {
            motion.to_channels(row);
        }
        data
    }
}

impl ExerciseClassifier for OnnxExerciseClassifier {
    fn initial_state(&self) -> RecurrentState {
        match (&self.state_shape, self.has_state_input) {
            (Some(shape), true) => RecurrentState::zeroed(shape.iter().product()),
            _ => RecurrentState::default(),
        }
    }

    fn predict(
        &mut self,
        window: &[ProcessedMotion],
        state: &RecurrentState,
    ) -> Result<Prediction, ClassifierError> {
        if window.is_empty() {
            return Err(ClassifierError::NotReady { filled: 0, needed: 1 });
        }

        let shape = vec![1_usize, window.len(), CLASSIFIER_CHANNELS];
        let input_value = Value::from_array((shape, Self::window_tensor(window)))?;

        let state_value = match (&self.state_shape, self.has_state_input) {
            (Some(state_shape), true) => {
                state.check_len(state_shape.iter().product())?;
                Some(Value::from_array((state_shape.clone(), state.values().to_vec()))?)
            }
            _ => None,
        };

        let outputs = match &state_value {
            Some(state_value) => self.session.run(ort::inputs![
                self.input_name.as_str() => &input_value,
                STATE_INPUT => state_value,
            ])?,
            None => self.session.run(ort::inputs![
                self.input_name.as_str() => &input_value,
            ])?,
        };

        let (prob_shape, prob_data) = outputs[self.prob_output_name.as_str()].try_extract_tensor::<f32>()?;
        let num_classes = if prob_shape.len() >= 2 {
            prob_shape[1] as usize
        } else {
            prob_shape[0] as usize
        };

        let scores: HashMap<String, f64> = self
            .labels
            .iter()
            .zip(prob_data.iter())
            .take(num_classes)
            .map(|(label, score)| (label.clone(), *score as f64))
            .collect();

        let mut prediction = Prediction::from_scores(scores).ok_or(ClassifierError::NoOutputTensor)?;

        if self.has_state_output {
            let (_, state_data) = outputs[STATE_OUTPUT].try_extract_tensor::<f32>()?;
            prediction.next_state = Some(RecurrentState::from_values(state_data.to_vec()));
        }

        Ok(prediction)
    }
}
