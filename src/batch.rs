use std::io::BufRead;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{MotionSample, LIVE_TARGET_HZ, SAMPLE_STRIDE};

/// Tipo de mensaje que transporta muestras
pub const MOTION_BATCH_TYPE: &str = "motionBatch_v2";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unsupported message type: {0}")]
    UnsupportedType(String),

    #[error("Unsupported stride: expected {expected}, got {actual}")]
    UnsupportedStride { expected: usize, actual: usize },

    #[error("Truncated batch: {len} values is not a multiple of {stride}")]
    Truncated { len: usize, stride: usize },
}

/// Mensaje tal como viaja: muestras aplanadas de 10 valores
/// `t, ax, ay, az, gx, gy, gz, grx, gry, grz`
#[derive(Debug, Serialize, Deserialize)]
struct WirePayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "default_hz")]
    hz: f64,
    #[serde(default = "default_stride")]
    stride: usize,
    #[serde(default)]
    data: Vec<f64>,
}

fn default_hz() -> f64 {
    LIVE_TARGET_HZ
}

fn default_stride() -> usize {
    SAMPLE_STRIDE
}

/// Lote decodificado
#[derive(Debug, Clone, PartialEq)]
pub struct MotionBatch {
    pub hz: f64,
    pub samples: Vec<MotionSample>,
}

impl MotionBatch {
    pub fn decode(payload: &str) -> Result<Self, BatchError> {
        let wire: WirePayload = serde_json::from_str(payload)?;

        if wire.kind != MOTION_BATCH_TYPE {
            return Err(BatchError::UnsupportedType(wire.kind));
        }
        if wire.stride != SAMPLE_STRIDE {
            return Err(BatchError::UnsupportedStride {
                expected: SAMPLE_STRIDE,
                actual: wire.stride,
            });
        }
        if wire.data.len() % SAMPLE_STRIDE != 0 {
            return Err(BatchError::Truncated {
                len: wire.data.len(),
                stride: SAMPLE_STRIDE,
            });
        }

        let samples = wire
            .data
            .chunks_exact(SAMPLE_STRIDE)
            .filter_map(|chunk| <&[f64; SAMPLE_STRIDE]>::try_from(chunk).ok())
            .map(MotionSample::from_row)
            .collect();

        Ok(Self { hz: wire.hz, samples })
    }

    pub fn encode(&self) -> Result<String, BatchError> {
        let wire = WirePayload {
            kind: MOTION_BATCH_TYPE.to_string(),
            hz: self.hz,
            stride: SAMPLE_STRIDE,
            data: self.samples.iter().flat_map(|s| s.to_row()).collect(),
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

/// Contadores del lector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReaderStats {
    pub lines: u64,
    pub batches: u64,
    pub samples: u64,
    pub rejected: u64,
}

/// Lanza un hilo que lee mensajes JSON (uno por línea), decodifica los
/// lotes y los envía por el canal. Las líneas inválidas se registran y se
/// saltan. El hilo termina al agotarse la entrada o si el receptor se
/// cierra; al terminar suelta el `Sender`.
pub fn spawn_batch_reader<R>(reader: R, tx: Sender<Vec<MotionSample>>) -> JoinHandle<BatchReaderStats>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        let mut stats = BatchReaderStats::default();
        let mut last_timestamp: Option<f64> = None;

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "error leyendo la entrada, se detiene el lector");
                    break;
                }
            };
            stats.lines += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let batch = match MotionBatch::decode(line) {
                Ok(batch) => batch,
                Err(BatchError::UnsupportedType(kind)) => {
                    debug!(kind = %kind, "mensaje ignorado");
                    continue;
                }
                Err(e) => {
                    stats.rejected += 1;
                    warn!(line = stats.lines, error = %e, "lote descartado");
                    continue;
                }
            };

            if let (Some(last), Some(first)) = (last_timestamp, batch.samples.first()) {
                if first.timestamp < last {
                    debug!(last, first = first.timestamp, "lote fuera de orden");
                }
            }
            if let Some(sample) = batch.samples.last() {
                last_timestamp = Some(sample.timestamp);
            }

            stats.batches += 1;
            stats.samples += batch.samples.len() as u64;

            if tx.send(batch.samples).is_err() {
                debug!("receptor cerrado, se detiene el lector");
                break;
            }
        }

        info!(
            batches = stats.batches,
            samples = stats.samples,
            rejected = stats.rejected,
            "lector de lotes terminado"
        );
        stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector3;
    use approx::assert_relative_eq;
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    fn payload(data: &[f64]) -> String {
        serde_json::json!({ "type": "motionBatch_v2", "hz": 100.0, "stride": 10, "data": data }).to_string()
    }

    #[test]
    fn test_decode_motion_batch() {
        let data: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let batch = MotionBatch::decode(&payload(&data)).unwrap();

        assert_relative_eq!(batch.hz, 100.0);
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.samples[0].timestamp, 0.0);
        assert_eq!(batch.samples[0].acceleration, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(batch.samples[0].rotation_rate, Vector3::new(4.0, 5.0, 6.0));
        assert_eq!(batch.samples[1].timestamp, 10.0);
        assert_eq!(batch.samples[1].gravity, Vector3::new(17.0, 18.0, 19.0));
    }

    #[test]
    fn test_defaults_for_missing_hz_and_stride() {
        let batch = MotionBatch::decode(r#"{ "type": "motionBatch_v2", "data": [] }"#).unwrap();
        assert_relative_eq!(batch.hz, 100.0);
        assert!(batch.samples.is_empty());
    }

    #[test]
    fn test_rejects_malformed_batches() {
        let data: Vec<f64> = (0..15).map(|i| i as f64).collect();
        assert!(matches!(
            MotionBatch::decode(&payload(&data)),
            Err(BatchError::Truncated { len: 15, .. })
        ));

        let odd_stride = r#"{ "type": "motionBatch_v2", "stride": 7, "data": [] }"#;
        assert!(matches!(
            MotionBatch::decode(odd_stride),
            Err(BatchError::UnsupportedStride { actual: 7, .. })
        ));

        let ack = r#"{ "type": "recordingStarted" }"#;
        assert!(matches!(MotionBatch::decode(ack), Err(BatchError::UnsupportedType(_))));

        assert!(matches!(MotionBatch::decode("not json"), Err(BatchError::JsonError(_))));
    }

    #[test]
    fn test_encode_matches_wire_layout() {
        let sample = MotionSample::new(
            1.5,
            Vector3::new(0.1, 0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(0.0, 0.0, -1.0),
        );
        let batch = MotionBatch {
            hz: 50.0,
            samples: vec![sample],
        };
        let value: serde_json::Value = serde_json::from_str(&batch.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "motionBatch_v2");
        assert_eq!(value["stride"], 10);
        assert_eq!(value["data"][0], 1.5);
        assert_eq!(value["data"][9], -1.0);
    }

    #[test]
    fn test_reader_forwards_batches_and_skips_bad_lines() {
        let data: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let input = format!(
            "{}\n\n{{ broken\n{}\n{}\n",
            payload(&data[..10]),
            r#"{ "type": "recordingStopped" }"#,
            payload(&data[10..]),
        );

        let (tx, rx) = unbounded();
        let handle = spawn_batch_reader(Cursor::new(input.into_bytes()), tx);
        let batches: Vec<Vec<MotionSample>> = rx.iter().collect();
        let stats = handle.join().unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 2);
        assert_eq!(
            stats,
            BatchReaderStats {
                lines: 5,
                batches: 2,
                samples: 3,
                rejected: 1,
            }
        );
    }
}
