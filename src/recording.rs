use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use csv::{ReaderBuilder, Writer};

use crate::types::{MotionSample, IDLE_LABEL, SAMPLE_STRIDE};

/// Cabecera de las grabaciones
pub const RECORDING_HEADER: [&str; 11] = [
    "timestamp", "ax", "ay", "az", "gx", "gy", "gz", "grx", "gry", "grz", "label",
];

/// Sesión grabada: muestras y la etiqueta de cada una
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub samples: Vec<MotionSample>,
    pub labels: Vec<String>,
}

impl Recording {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Pares (timestamp, etiqueta) para `LabelTrackClassifier`
    pub fn label_track(&self) -> Vec<(f64, String)> {
        self.samples
            .iter()
            .zip(&self.labels)
            .map(|(s, l)| (s.timestamp, l.clone()))
            .collect()
    }

    pub fn duration_secs(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).max(0.0),
            _ => 0.0,
        }
    }
}

/// Carga un CSV `timestamp,ax,ay,az,gx,gy,gz,grx,gry,grz,label`.
/// La columna label es opcional; sin ella la muestra queda como "idle".
pub fn load_recording(path: impl AsRef<Path>) -> Result<Recording> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;

    let mut recording = Recording::default();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Fila {} inválida en {:?}", row_idx + 1, path))?;
        if record.len() < SAMPLE_STRIDE {
            bail!(
                "La fila {} tiene {} columnas, se esperaban al menos {}",
                row_idx + 1,
                record.len(),
                SAMPLE_STRIDE
            );
        }

        let mut row = [0.0; SAMPLE_STRIDE];
        for (col, value) in row.iter_mut().enumerate() {
            *value = record[col].parse().with_context(|| {
                format!(
                    "{} inválido en fila {}: {:?}",
                    RECORDING_HEADER[col],
                    row_idx + 1,
                    &record[col]
                )
            })?;
        }

        let label = record
            .get(SAMPLE_STRIDE)
            .filter(|l| !l.is_empty())
            .unwrap_or(IDLE_LABEL);

        recording.samples.push(MotionSample::from_row(&row));
        recording.labels.push(label.to_string());
    }

    ensure!(!recording.is_empty(), "El CSV {:?} no contiene datos", path);
    Ok(recording)
}

/// Escribe una grabación con la misma etiqueta en todas las filas
pub fn write_recording(path: impl AsRef<Path>, samples: &[MotionSample], label: &str) -> Result<()> {
    let path = path.as_ref();
    let mut writer = Writer::from_path(path).with_context(|| format!("No se pudo crear {:?}", path))?;

    writer.write_record(RECORDING_HEADER)?;
    for sample in samples {
        let mut record: Vec<String> = sample.to_row().iter().map(|v| v.to_string()).collect();
        record.push(label.to_string());
        writer.write_record(&record)?;
    }
    writer.flush().with_context(|| format!("No se pudo escribir {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector3;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("motion_squat.csv");
        let samples: Vec<MotionSample> = (0..5)
            .map(|i| {
                MotionSample::new(
                    i as f64 * 0.01,
                    Vector3::new(0.1, -0.2, 0.3),
                    Vector3::new(1.0, 0.0, -1.0),
                    Vector3::new(0.0, 0.0, -1.0),
                )
            })
            .collect();

        write_recording(&path, &samples, "squat").unwrap();
        let recording = load_recording(&path).unwrap();

        assert_eq!(recording.samples, samples);
        assert!(recording.labels.iter().all(|l| l == "squat"));
        assert!((recording.duration_secs() - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_missing_label_defaults_to_idle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nolabel.csv");
        fs::write(
            &path,
            "timestamp,ax,ay,az,gx,gy,gz,grx,gry,grz,label\n\
             0.0,0,0,0,0,0,0,0,0,-1\n\
             0.02,0,0,0,0,0,0,0,0,-1,curl\n",
        )
        .unwrap();

        let recording = load_recording(&path).unwrap();
        assert_eq!(recording.labels, vec!["idle".to_string(), "curl".to_string()]);
        assert_eq!(recording.label_track()[1], (0.02, "curl".to_string()));
    }

    #[test]
    fn test_rejects_bad_rows() {
        let dir = tempdir().unwrap();

        let short = dir.path().join("short.csv");
        fs::write(&short, "timestamp,ax,ay,az,gx,gy,gz,grx,gry,grz,label\n0.0,1,2\n").unwrap();
        assert!(load_recording(&short).is_err());

        let garbage = dir.path().join("garbage.csv");
        fs::write(&garbage, "timestamp,ax,ay,az,gx,gy,gz,grx,gry,grz,label\n0.0,x,0,0,0,0,0,0,0,-1,idle\n").unwrap();
        let err = load_recording(&garbage).unwrap_err();
        assert!(format!("{:#}", err).contains("ax"));

        let empty = dir.path().join("empty.csv");
        fs::write(&empty, "timestamp,ax,ay,az,gx,gy,gz,grx,gry,grz,label\n").unwrap();
        assert!(load_recording(&empty).is_err());

        assert!(load_recording(dir.path().join("missing.csv")).is_err());
    }
}
