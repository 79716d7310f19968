//! Camera simulator: noisy detector and OCR output for one lane camera.
//!
//! Generates per-frame output with:
//! - Uniform box jitter on centre and size
//! - Miss probability (1 - P_D)
//! - Poisson clutter (false detections)
//! - OCR readings inside a readable band, with confusable-character
//!   substitutions (O/0, I/1, S/5, B/8) and occasional dropped characters

use crate::vehicle::Vehicle;
use anpr_core::{BBox, CameraId, Detection, Frame, VehicleClass};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Detector and OCR characteristics of one camera.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraParams {
    /// Frames per second
    pub fps: f64,
    /// Probability a visible vehicle is detected
    pub p_detection: f64,
    /// Half-width of the uniform jitter on box centre and size
    pub box_noise: f64,
    /// Mean number of false detections per frame
    pub lambda_clutter: f64,
    /// Probability a visible vehicle inside the band yields an OCR reading
    pub p_ocr: f64,
    /// Vertical band (centre y) where plates are readable
    pub ocr_band: (f64, f64),
    /// Per-character probability of a confusable substitution
    pub p_confusion: f64,
    /// Probability one character is lost from a reading
    pub p_drop_char: f64,
    /// OCR confidence range
    pub ocr_confidence: (f64, f64),
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            fps: 10.0,
            p_detection: 0.97,
            box_noise: 0.003,
            lambda_clutter: 0.0,
            p_ocr: 0.5,
            ocr_band: (0.3, 0.85),
            p_confusion: 0.05,
            p_drop_char: 0.02,
            ocr_confidence: (0.62, 0.95),
        }
    }
}

/// An untagged OCR result: the plate region and what was read there.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateReading {
    pub roi: BBox,
    pub text: String,
    pub confidence: f64,
}

/// Ground truth for one visible vehicle in a frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleTruth {
    pub vehicle_id: u64,
    pub plate: String,
    pub bbox: BBox,
}

/// One simulated frame: detector output, OCR readings and ground truth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimFrame {
    /// Detections only; plate candidates are attached by the runner once
    /// readings are tagged with track IDs
    pub frame: Frame,
    pub readings: Vec<PlateReading>,
    pub truth: Vec<VehicleTruth>,
}

/// Swap a character for the one OCR most often confuses it with.
fn confusable(c: char) -> Option<char> {
    match c {
        'O' => Some('0'),
        '0' => Some('O'),
        'I' => Some('1'),
        '1' => Some('I'),
        'S' => Some('5'),
        '5' => Some('S'),
        'B' => Some('8'),
        '8' => Some('B'),
        _ => None,
    }
}

/// Generates frames for one camera from a set of vehicles.
pub struct CameraSimulator {
    pub camera_id: CameraId,
    pub params: CameraParams,
    rng: ChaCha8Rng,
}

impl CameraSimulator {
    pub fn new(camera_id: CameraId, params: CameraParams, seed: u64) -> Self {
        Self {
            camera_id,
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn jitter(&mut self) -> f64 {
        let n = self.params.box_noise;
        self.rng.gen::<f64>() * n * 2.0 - n
    }

    /// Garble a plate the way OCR does.
    fn read_plate(&mut self, plate: &str) -> String {
        let mut text: String = plate
            .chars()
            .map(|c| match confusable(c) {
                Some(alt) if self.rng.gen_bool(self.params.p_confusion) => alt,
                _ => c,
            })
            .collect();
        if !text.is_empty() && self.rng.gen_bool(self.params.p_drop_char) {
            let idx = self.rng.gen_range(0..text.len());
            text.remove(idx);
        }
        text
    }

    /// Poisson draw by multiplying uniforms until the product falls below
    /// e^{-λ}.
    fn poisson(&mut self, lambda: f64) -> usize {
        if lambda <= 0.0 {
            return 0;
        }
        let threshold = (-lambda).exp();
        let mut n = 0usize;
        let mut prod = self.rng.gen::<f64>();
        while prod > threshold && n < 50 {
            prod *= self.rng.gen::<f64>();
            n += 1;
        }
        n
    }

    /// Produce frame `index` at time `t` for the current vehicle states.
    pub fn generate(&mut self, vehicles: &[Vehicle], index: u64, t: f64) -> SimFrame {
        let mut frame = Frame::new(index, t, 1.0);
        let mut readings = Vec::new();
        let mut truth = Vec::new();

        for v in vehicles {
            if !v.is_visible(t) {
                continue;
            }
            let Some(true_box) = v.bbox() else {
                continue;
            };
            truth.push(VehicleTruth {
                vehicle_id: v.id,
                plate: v.plate.clone(),
                bbox: true_box,
            });

            if self.rng.gen::<f64>() <= self.params.p_detection {
                let (cx, cy) = true_box.center();
                let bbox = BBox::from_center_size(
                    cx + self.jitter(),
                    cy + self.jitter(),
                    true_box.width() + self.jitter(),
                    true_box.height() + self.jitter(),
                );
                let confidence = self.rng.gen_range(0.7..0.95);
                let class = if self.rng.gen_bool(0.1) {
                    VehicleClass::Unknown
                } else {
                    v.class
                };
                frame.detections.push(Detection::new(bbox, confidence, class));
            }

            let (lo, hi) = self.params.ocr_band;
            if v.y >= lo && v.y <= hi && self.rng.gen_bool(self.params.p_ocr) {
                let (cmin, cmax) = self.params.ocr_confidence;
                let roi = BBox::new(true_box.x1, true_box.center().1, true_box.x2, true_box.y2);
                readings.push(PlateReading {
                    roi,
                    text: self.read_plate(&v.plate),
                    confidence: self.rng.gen_range(cmin..=cmax),
                });
            }
        }

        for _ in 0..self.poisson(self.params.lambda_clutter) {
            let w = self.rng.gen_range(0.04..0.1);
            let h = self.rng.gen_range(0.04..0.1);
            let cx = self.rng.gen_range(w..1.0 - w);
            let cy = self.rng.gen_range(h..1.0 - h);
            frame.detections.push(Detection::new(
                BBox::from_center_size(cx, cy, w, h),
                self.rng.gen_range(0.3..0.6),
                VehicleClass::Unknown,
            ));
        }

        SimFrame {
            frame,
            readings,
            truth,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
