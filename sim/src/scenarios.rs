//! Scenario definitions.
//!
//! Each scenario is a named set of lane cameras and the vehicles they see.
//! All scenarios are deterministic given the same seed.

use crate::{
    camera_sim::{CameraParams, CameraSimulator},
    replay::{CameraStream, ReplayLog},
    vehicle::{MotionSpec, Vehicle},
};
use anpr_core::{CameraId, VehicleClass};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// 3 vehicles, one camera, clean detector, fixed plates
    Simple,
    /// 8 vehicles nose to tail with clutter and random plates
    Convoy,
    /// 2 vehicles hidden for 1.5 s, one inside the lane, one approaching
    Occlusion,
    /// A vehicle turns back before the entry line, then a normal passage
    UTurn,
    /// 3 independent lane cameras with different detector quality
    MultiCamera,
}

/// One camera and the traffic in its field of view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraSetup {
    pub camera_id: CameraId,
    pub params: CameraParams,
    pub vehicles: Vec<Vehicle>,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub duration: f64, // seconds
    pub cameras: Vec<CameraSetup>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Simple => Self::simple(seed),
            ScenarioKind::Convoy => Self::convoy(seed),
            ScenarioKind::Occlusion => Self::occlusion(seed),
            ScenarioKind::UTurn => Self::u_turn(seed),
            ScenarioKind::MultiCamera => Self::multi_camera(seed),
        }
    }

    /// Run every camera simulator over the scenario and collect the frames.
    pub fn record(&self) -> ReplayLog {
        let cameras = self
            .cameras
            .iter()
            .map(|setup| {
                let camera_seed = self.seed.wrapping_add(u64::from(setup.camera_id.0) * 7919);
                let mut sim = CameraSimulator::new(setup.camera_id, setup.params.clone(), camera_seed);
                let mut vehicles = setup.vehicles.clone();
                let fps = setup.params.fps;
                let dt = 1.0 / fps;
                let n_frames = (self.duration * fps).round() as u64;

                let frames = (0..n_frames)
                    .map(|i| {
                        let t = i as f64 * dt;
                        let frame = sim.generate(&vehicles, i, t);
                        for v in &mut vehicles {
                            v.step(t, dt);
                        }
                        frame
                    })
                    .collect::<Vec<_>>();
                debug!(camera = %setup.camera_id, frames = frames.len(), vehicles = vehicles.len(), "camera recorded");

                CameraStream {
                    camera_id: setup.camera_id,
                    fps,
                    frames,
                }
            })
            .collect();

        ReplayLog {
            scenario_name: self.name.clone(),
            seed: self.seed,
            duration: self.duration,
            cameras,
        }
    }

    /// Ground-truth plates of every vehicle, all cameras.
    pub fn plates(&self) -> Vec<&str> {
        self.cameras
            .iter()
            .flat_map(|c| c.vehicles.iter().map(|v| v.plate.as_str()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Simple
    // -----------------------------------------------------------------------
    fn simple(seed: u64) -> Self {
        let vehicles = vec![
            Vehicle::new(0, "KXM4417", 0.5, 0.0).with_speed(0.12),
            Vehicle::new(1, "BRT2093", 0.5, 5.0).with_speed(0.12),
            Vehicle::new(2, "LNC7750", 0.5, 10.0)
                .with_speed(0.12)
                .with_class(VehicleClass::Truck),
        ];

        Scenario {
            name: "simple".into(),
            seed,
            duration: 30.0,
            cameras: vec![CameraSetup {
                camera_id: CameraId(0),
                params: CameraParams::default(),
                vehicles,
            }],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Convoy
    // -----------------------------------------------------------------------
    fn convoy(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let vehicles = (0..8)
            .map(|i| random_vehicle(&mut rng, i, 0.5, i as f64 * 2.5).with_speed(0.13))
            .collect();

        Scenario {
            name: "convoy".into(),
            seed,
            duration: 35.0,
            cameras: vec![CameraSetup {
                camera_id: CameraId(0),
                params: CameraParams {
                    lambda_clutter: 0.3,
                    ..Default::default()
                },
                vehicles,
            }],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Occlusion
    // -----------------------------------------------------------------------
    fn occlusion(seed: u64) -> Self {
        // At 0.12/s the first vehicle is at y ≈ 0.67 when hidden, the second
        // at y ≈ 0.31
        let vehicles = vec![
            Vehicle::new(0, "OCC1001", 0.3, 0.0)
                .with_speed(0.12)
                .with_occlusion(6.0, 7.5),
            Vehicle::new(1, "OCC2002", 0.7, 3.0)
                .with_speed(0.12)
                .with_occlusion(6.0, 7.5),
        ];

        Scenario {
            name: "occlusion".into(),
            seed,
            duration: 30.0,
            cameras: vec![CameraSetup {
                camera_id: CameraId(0),
                params: CameraParams::default(),
                vehicles,
            }],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 4: U-turn
    // -----------------------------------------------------------------------
    fn u_turn(seed: u64) -> Self {
        let vehicles = vec![
            Vehicle::new(0, "UTN4821", 0.3, 0.0)
                .with_speed(0.12)
                .with_motion(MotionSpec::UTurn { turn_y: 0.45 }),
            Vehicle::new(1, "STR9034", 0.7, 10.0).with_speed(0.12),
        ];

        Scenario {
            name: "u_turn".into(),
            seed,
            duration: 30.0,
            cameras: vec![CameraSetup {
                camera_id: CameraId(0),
                params: CameraParams::default(),
                vehicles,
            }],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 5: Multi-camera
    // -----------------------------------------------------------------------
    fn multi_camera(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(5));
        let params = [
            CameraParams::default(),
            // Busy background, more false detections
            CameraParams {
                lambda_clutter: 0.5,
                ..Default::default()
            },
            // Poor OCR: fewer reads, more confusions
            CameraParams {
                p_ocr: 0.3,
                p_confusion: 0.12,
                fps: 15.0,
                ..Default::default()
            },
        ];

        let cameras = params
            .into_iter()
            .enumerate()
            .map(|(c, params)| {
                let mut appear = 0.0;
                let vehicles = (0..4)
                    .map(|i| {
                        let v = random_vehicle(&mut rng, (c * 100 + i) as u64, 0.5, appear);
                        appear += 4.0 + rng.gen::<f64>() * 3.0;
                        v.with_speed(0.1 + rng.gen::<f64>() * 0.04)
                    })
                    .collect();
                CameraSetup {
                    camera_id: CameraId(c as u32),
                    params,
                    vehicles,
                }
            })
            .collect();

        Scenario {
            name: "multi_camera".into(),
            seed,
            duration: 40.0,
            cameras,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder helpers
// ---------------------------------------------------------------------------

/// Three letters then four digits.
fn random_plate(rng: &mut ChaCha8Rng) -> String {
    let letters: String = (0..3)
        .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
        .collect();
    format!("{letters}{:04}", rng.gen_range(0..10_000u32))
}

fn random_vehicle(rng: &mut ChaCha8Rng, id: u64, x: f64, appear_at: f64) -> Vehicle {
    let plate = random_plate(rng);
    let class = match rng.gen_range(0u8..10) {
        0 => VehicleClass::Truck,
        1 => VehicleClass::Bus,
        2 => VehicleClass::Motorcycle,
        _ => VehicleClass::Car,
    };
    let mut v = Vehicle::new(id, plate, x, appear_at).with_class(class);
    match class {
        VehicleClass::Motorcycle => v.width = 0.07,
        VehicleClass::Truck | VehicleClass::Bus => v.height = 0.16,
        _ => {}
    }
    v
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
