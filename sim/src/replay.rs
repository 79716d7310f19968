//! Replay: serialize/deserialize recorded camera streams for offline runs.

use crate::camera_sim::SimFrame;
use anpr_core::CameraId;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A full recorded scenario: one frame stream per camera.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario_name: String,
    pub seed: u64,
    pub duration: f64,
    pub cameras: Vec<CameraStream>,
}

/// Frames of one camera in capture order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraStream {
    pub camera_id: CameraId,
    pub fps: f64,
    pub frames: Vec<SimFrame>,
}

impl ReplayLog {
    pub fn total_frames(&self) -> usize {
        self.cameras.iter().map(|c| c.frames.len()).sum()
    }
}

/// Save a replay log to a JSON file.
pub fn save_replay(log: &ReplayLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating replay file {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer(writer, log).context("writing replay log")?;
    Ok(())
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening replay file {}", path.display()))?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)
        .with_context(|| format!("parsing replay file {}", path.display()))?;
    Ok(log)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{Scenario, ScenarioKind};

    #[test]
    fn replay_survives_disk_roundtrip() {
        let log = Scenario::build(ScenarioKind::Simple, 3).record();
        let path = std::env::temp_dir().join(format!("lanewatch_replay_{}.json", std::process::id()));
        save_replay(&log, &path).expect("save");
        let loaded = load_replay(&path).expect("load");
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.scenario_name, log.scenario_name);
        assert_eq!(loaded.total_frames(), log.total_frames());
        let (a, b) = (&log.cameras[0].frames[40], &loaded.cameras[0].frames[40]);
        assert_eq!(a.frame.detections.len(), b.frame.detections.len());
        for (da, db) in a.frame.detections.iter().zip(&b.frame.detections) {
            assert!((da.bbox.y1 - db.bbox.y1).abs() < 1e-9);
        }
        let texts = |f: &SimFrame| f.readings.iter().map(|r| r.text.clone()).collect::<Vec<_>>();
        assert_eq!(texts(a), texts(b));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_replay(Path::new("/nonexistent/lanewatch.json")).expect_err("no such file");
        assert!(format!("{err:#}").contains("/nonexistent/lanewatch.json"));
    }
}
