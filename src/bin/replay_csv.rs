use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use contador_reps::classifier::LabelTrackClassifier;
use contador_reps::config::TrackerConfig;
use contador_reps::recording::load_recording;
use contador_reps::summary::SessionSummary;
use contador_reps::workout::WorkoutSession;

#[derive(Parser, Debug)]
#[command(
    name = "replay_csv",
    version,
    about = "Reproduce una grabación CSV por el pipeline usando su columna de etiquetas como clasificador",
    long_about = None
)]
struct Args {
    /// Grabación timestamp,ax,ay,az,gx,gy,gz,grx,gry,grz,label
    csv: PathBuf,

    /// Configuración JSON
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Muestra cada repetición detectada
    #[arg(long, default_value_t = false)]
    dump_reps: bool,

    /// Muestra cada predicción
    #[arg(long, default_value_t = false)]
    dump_predictions: bool,

    /// Imprime el resumen final en JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => TrackerConfig::default(),
    };

    println!("🎞️  Reproduciendo sesión desde {:?}", args.csv);
    let recording = load_recording(&args.csv)?;
    println!(
        "ℹ️  {} muestras, {:.1}s",
        recording.len(),
        recording.duration_secs()
    );

    let classifier = LabelTrackClassifier::new(recording.label_track());
    let mut session = WorkoutSession::new(config, classifier);

    for sample in &recording.samples {
        let outcome = session.handle_sample(sample);

        if args.dump_reps {
            if let Some(rep) = &outcome.rep {
                let snapshot = session.snapshot();
                println!(
                    "  🔁 t={:>8.2}s pico={:.3} base={:.3} prom={:.3} [{} +{} pend]",
                    rep.timestamp,
                    rep.peak_value,
                    rep.baseline_value,
                    rep.prominence,
                    snapshot.label,
                    snapshot.pending_reps
                );
            }
        }

        if args.dump_predictions {
            if let Some(prediction) = &outcome.prediction {
                println!(
                    "  🧠 t={:>8.2}s {} ({:.0}%) -> {}",
                    sample.timestamp,
                    prediction.label,
                    prediction.confidence * 100.0,
                    session.snapshot().gate
                );
            }
        }

        if let Some(set) = &outcome.closed_set {
            println!(
                "✅ {} serie {}: {} reps ({:.1}s → {:.1}s, conf {:.0}%)",
                set.exercise,
                set.set_index,
                set.reps,
                set.started_at,
                set.ended_at,
                set.avg_confidence * 100.0
            );
        }
    }

    let sets_before = session.completed_sets().len();
    let sets = session.stop();
    for set in &sets[sets_before..] {
        println!(
            "✅ {} serie {}: {} reps (cerrada al final)",
            set.exercise, set.set_index, set.reps
        );
    }

    let stats = session.stats();
    let summary = SessionSummary::new(
        stats.first_timestamp.unwrap_or(0.0),
        stats.last_timestamp.unwrap_or(0.0),
        &sets,
    );

    println!("\nRepeticiones por ejercicio:");
    for (exercise, reps) in summary.reps_by_exercise() {
        println!("  {:<20} {:>4}", exercise, reps);
    }
    println!(
        "\n📊 {} muestras, {} repeticiones detectadas, {} predicciones, {} anomalías de timestamp",
        stats.samples, stats.rep_events, stats.predictions, stats.timestamp_anomalies
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
