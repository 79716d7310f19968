//! `sim`: Lane traffic simulator: vehicle trajectories, noisy detector and
//! OCR output, replay logs, and a runner that feeds them to the pipeline.

pub mod camera_sim;
pub mod replay;
pub mod runner;
pub mod scenarios;
pub mod vehicle;

pub use camera_sim::{CameraParams, CameraSimulator, PlateReading, SimFrame};
pub use replay::{load_replay, save_replay, CameraStream, ReplayLog};
pub use runner::{run_stream, tag_readings, StreamRunner};
pub use scenarios::{Scenario, ScenarioKind};
pub use vehicle::{MotionSpec, Vehicle};
