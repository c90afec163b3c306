/*
Contador de repeticiones en tiempo real

Lee lotes motionBatch_v2 (un JSON por línea) desde stdin o un archivo,
detecta actividad y repeticiones, agrupa las repeticiones en series según
el clasificador y al terminar imprime el resumen en JSON.

Ejemplo (sin modelo, etiqueta fija):
    cat sesion.jsonl | ./target/release/contador-reps --label squat --weight 40

Con modelo ONNX:
    cargo build --release --features onnx
    ./target/release/contador-reps --model ejercicios.onnx --classes classes.json < sesion.jsonl
*/

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use contador_reps::batch::spawn_batch_reader;
use contador_reps::classifier::{ExerciseClassifier, FixedLabelClassifier};
use contador_reps::config::TrackerConfig;
use contador_reps::session::CompletedSet;
use contador_reps::summary::SessionSummary;
use contador_reps::workout::WorkoutSession;

/// Lotes en vuelo entre el lector y el pipeline
const CHANNEL_CAPACITY: usize = 100;

#[derive(Parser, Debug)]
#[command(
    name = "contador-reps",
    version,
    about = "Cuenta repeticiones y series a partir de lotes de muestras IMU",
    long_about = None
)]
struct Args {
    /// Configuración JSON (los campos ausentes usan los valores por defecto)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Archivo con lotes, uno por línea. Por defecto stdin.
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Peso en kg que se anota en cada serie
    #[arg(long)]
    weight: Option<f64>,

    /// Fuerza reposo cuando no hay movimiento
    #[arg(long, default_value_t = false)]
    activity_gate: bool,

    /// Modelo ONNX del clasificador
    #[cfg(feature = "onnx")]
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Clases del modelo (index_to_class)
    #[cfg(feature = "onnx")]
    #[arg(long, value_name = "FILE", default_value = "classes.json")]
    classes: PathBuf,

    /// Forma del estado recurrente, p. ej. 1,64
    #[cfg(feature = "onnx")]
    #[arg(long, value_delimiter = ',')]
    state_shape: Option<Vec<usize>>,

    /// Sin modelo: etiqueta fija que devuelve el clasificador
    #[arg(long)]
    label: Option<String>,

    /// Confianza de la etiqueta fija
    #[arg(long, default_value_t = 0.9)]
    confidence: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => TrackerConfig::live(),
    };
    if let Some(weight) = args.weight {
        config.session.weight_kg = weight;
    }
    if args.activity_gate {
        config.session.activity_gate = true;
    }
    config.validate()?;

    let classifier = build_classifier(&args)?;
    let mut session = WorkoutSession::new(config, classifier);

    let reader: Box<dyn BufRead + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("No se pudo abrir {:?}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let (tx, rx) = bounded(CHANNEL_CAPACITY);
    let reader_handle = spawn_batch_reader(reader, tx);

    eprintln!("🎯 Esperando muestras...");
    let sets = session.run(rx, print_set);

    let reader_stats = reader_handle
        .join()
        .map_err(|_| anyhow!("El lector de lotes terminó con pánico"))?;
    let stats = session.stats();
    info!(
        samples = stats.samples,
        batches = reader_stats.batches,
        rejected = reader_stats.rejected,
        reps = stats.rep_events,
        predictions = stats.predictions,
        predict_errors = stats.predict_errors,
        anomalies = stats.timestamp_anomalies,
        "sesión terminada"
    );

    let summary = SessionSummary::new(
        stats.first_timestamp.unwrap_or(0.0),
        stats.last_timestamp.unwrap_or(0.0),
        &sets,
    );
    eprintln!(
        "\n🏁 {} series, {} repeticiones, volumen {:.1} kg",
        summary.sets.len(),
        summary.total_reps(),
        summary.total_volume()
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn print_set(set: &CompletedSet) {
    eprintln!(
        "✅ {} serie {}: {} reps × {:.1} kg ({:.1}s, conf {:.0}%)",
        set.exercise,
        set.set_index,
        set.reps,
        set.weight_kg,
        set.duration_secs(),
        set.avg_confidence * 100.0
    );
}

fn build_classifier(args: &Args) -> Result<Box<dyn ExerciseClassifier>> {
    #[cfg(feature = "onnx")]
    if let Some(model) = &args.model {
        let mut classifier = contador_reps::onnx_classifier::OnnxExerciseClassifier::new(model, &args.classes)?;
        if let Some(shape) = &args.state_shape {
            classifier = classifier.with_state_shape(shape.clone());
        }
        return Ok(Box::new(classifier));
    }

    match &args.label {
        Some(label) => Ok(Box::new(FixedLabelClassifier::new(label.clone(), args.confidence))),
        None => bail!("Sin modelo hace falta --label para el clasificador"),
    }
}
