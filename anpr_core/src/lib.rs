//! `anpr_core`: lane entry/exit decision core.
//!
//! Turns per-frame vehicle detections and OCR plate samples into a
//! deduplicated log of ENTRY/EXIT events.
//!
//! # Module layout
//! - [`types`]        : IDs, vehicle classes, detections, plate samples, frames
//! - [`geometry`]     : Boxes, IOU, IOU matrix
//! - [`kf`]           : Kalman box filter (predict / update)
//! - [`association`]  : Bipartite graph, greedy matching, Hungarian solver
//! - [`track`]        : Track struct, status and lifecycle notifications
//! - [`track_manager`]: Birth / confirmation / loss / deletion policy
//! - [`tracker`]      : Per-frame Track Lifecycle Manager
//! - [`fusion`]       : Plate Fusion Engine
//! - [`events`]       : Entry/Exit Event Engine and dedup cache
//! - [`sink`]         : Event persistence contract
//! - [`pipeline`]     : Per-camera orchestrator
//! - [`metrics`]      : Pipeline statistics
//! - [`queue`]        : Bounded drop-oldest stage queue
//! - [`config`]       : Configuration and validation

pub mod association;
pub mod config;
pub mod events;
pub mod fusion;
pub mod geometry;
pub mod kf;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod sink;
pub mod track;
pub mod track_manager;
pub mod tracker;
pub mod types;

pub use config::{AnprConfig, ConfigError, EventConfig, FusionConfig, TrackingConfig};
pub use events::{CrossingPhase, Event, EventEngine, EventKind};
pub use fusion::{FusedPlate, PlateFusionEngine};
pub use geometry::BBox;
pub use metrics::{PipelineStats, StatsReport};
pub use pipeline::{CameraPipeline, FrameReport};
pub use queue::DropOldestQueue;
pub use sink::{EventSink, MemorySink, SharedSink, SinkError};
pub use track::{LifecycleEvent, LifecycleKind, Track, TrackStatus};
pub use tracker::Tracker;
pub use types::{CameraId, Detection, Frame, PlateCandidate, Timestamp, TrackId, VehicleClass};
