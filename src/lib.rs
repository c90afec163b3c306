pub mod activity_detector;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod feature_extractor;
pub mod motion_buffer;
#[cfg(feature = "onnx")]
pub mod onnx_classifier;
pub mod recording;
pub mod rep_detector;
pub mod session;
pub mod summary;
pub mod types;
pub mod workout;
