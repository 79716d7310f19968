//! Kalman filter for vehicle boxes: predict and update steps.
//!
//! # Design choices
//! - Linear KF, one step per processed frame (dt = 1 frame).
//! - Constant velocity on the box centre; width/height are a random walk,
//!   which smooths box size independently of motion.
//! - Noise terms scale with the box height so the same configuration works
//!   for pixel and normalised coordinates.
//!
//! ## State vector
//! x = [cx, cy, w, h, vx, vy]ᵀ
//!
//! ## Transition
//! cx += vx, cy += vy; w, h, vx, vy carried over.
//!
//! ## Observation
//! z = [cx, cy, w, h]ᵀ, H = [I₄ 0]

use crate::geometry::BBox;
use crate::types::{StateCov, StateVec};
use nalgebra::{Matrix4, Matrix4x6, Matrix6, Matrix6x4, Vector4, Vector6};
use serde::{Deserialize, Serialize};

/// Smallest box height used to scale noise, keeps S invertible for tiny boxes.
const MIN_NOISE_SCALE: f64 = 1e-3;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Trait for a box motion filter (predict + update).
pub trait KalmanFilter {
    /// Advance state and covariance by one frame.
    fn predict(&self, state: &StateVec, cov: &StateCov) -> (StateVec, StateCov);

    /// Correct with an observed box `z = [cx, cy, w, h]`.
    /// Returns `None` if the innovation covariance cannot be inverted, in
    /// which case the caller keeps its prediction.
    fn update(&self, state: &StateVec, cov: &StateCov, z: &Vector4<f64>) -> Option<KfUpdateResult>;
}

/// Result of a KF update step.
#[derive(Clone, Debug)]
pub struct KfUpdateResult {
    pub state: StateVec,
    pub cov: StateCov,
    /// Innovation ν = z − H·x
    pub innovation: Vector4<f64>,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub innovation_cov: Matrix4<f64>,
}

// ---------------------------------------------------------------------------
// Box filter
// ---------------------------------------------------------------------------

/// Noise weights, each multiplied by the current box height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Centre position noise (process and measurement)
    pub position_std_weight: f64,
    /// Centre velocity process noise
    pub velocity_std_weight: f64,
    /// Width/height random-walk and measurement noise
    pub size_std_weight: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            position_std_weight: 1.0 / 20.0,
            velocity_std_weight: 1.0 / 160.0,
            size_std_weight: 1.0 / 20.0,
        }
    }
}

/// Constant-velocity box filter.
#[derive(Clone, Debug, Default)]
pub struct BoxKalmanFilter {
    pub config: KalmanConfig,
}

impl BoxKalmanFilter {
    pub fn new(config: KalmanConfig) -> Self {
        Self { config }
    }

    /// Transition matrix F for one frame.
    pub fn transition_matrix() -> Matrix6<f64> {
        let mut f = Matrix6::<f64>::identity();
        f[(0, 4)] = 1.0;
        f[(1, 5)] = 1.0;
        f
    }

    /// Observation matrix H (4×6).
    pub fn observation_matrix() -> Matrix4x6<f64> {
        Matrix4x6::from_row_slice(&[
            1., 0., 0., 0., 0., 0., //
            0., 1., 0., 0., 0., 0., //
            0., 0., 1., 0., 0., 0., //
            0., 0., 0., 1., 0., 0.,
        ])
    }

    fn noise_scale(height: f64) -> f64 {
        if height.is_finite() {
            height.abs().max(MIN_NOISE_SCALE)
        } else {
            MIN_NOISE_SCALE
        }
    }

    /// Initial state and covariance for a freshly born track.
    pub fn initiate(&self, bbox: &BBox) -> (StateVec, StateCov) {
        let z = bbox.to_measurement();
        let state = Vector6::new(z[0], z[1], z[2], z[3], 0.0, 0.0);
        let s = Self::noise_scale(z[3]);
        let pos = 2.0 * self.config.position_std_weight * s;
        let size = 2.0 * self.config.size_std_weight * s;
        let vel = 10.0 * self.config.velocity_std_weight * s;
        let cov = StateCov::from_diagonal(&Vector6::new(
            pos * pos,
            pos * pos,
            size * size,
            size * size,
            vel * vel,
            vel * vel,
        ));
        (state, cov)
    }

    /// Process noise Q for one frame, discrete white-noise acceleration on
    /// the centre and a plain random walk on the size.
    fn process_noise(&self, height: f64) -> Matrix6<f64> {
        let s = Self::noise_scale(height);
        let qa = (self.config.velocity_std_weight * s).powi(2);
        let qs = (self.config.size_std_weight * s).powi(2);
        let mut q = Matrix6::<f64>::zeros();
        // dt = 1: Q_pos = q/4, Q_pos_vel = q/2, Q_vel = q
        for (p, v) in [(0usize, 4usize), (1, 5)] {
            q[(p, p)] = qa / 4.0;
            q[(p, v)] = qa / 2.0;
            q[(v, p)] = qa / 2.0;
            q[(v, v)] = qa;
        }
        q[(2, 2)] = qs;
        q[(3, 3)] = qs;
        q
    }

    /// Measurement noise R for an observed box of height `height`.
    fn measurement_noise(&self, height: f64) -> Matrix4<f64> {
        let s = Self::noise_scale(height);
        let rp = (self.config.position_std_weight * s).powi(2);
        let rs = (self.config.size_std_weight * s).powi(2);
        Matrix4::from_diagonal(&Vector4::new(rp, rp, rs, rs))
    }
}

/// Box implied by a filter state.
pub fn state_to_bbox(state: &StateVec) -> BBox {
    BBox::from_center_size(state[0], state[1], state[2], state[3])
}

impl KalmanFilter for BoxKalmanFilter {
    fn predict(&self, state: &StateVec, cov: &StateCov) -> (StateVec, StateCov) {
        let f = Self::transition_matrix();
        let q = self.process_noise(state[3]);
        let mut predicted_state = f * state;
        // Size cannot go negative; a collapsed box is degenerate, not inverted.
        predicted_state[2] = predicted_state[2].max(0.0);
        predicted_state[3] = predicted_state[3].max(0.0);
        let predicted_cov = f * cov * f.transpose() + q;
        (predicted_state, predicted_cov)
    }

    fn update(&self, state: &StateVec, cov: &StateCov, z: &Vector4<f64>) -> Option<KfUpdateResult> {
        let h = Self::observation_matrix();
        let r = self.measurement_noise(z[3]);

        // Innovation: ν = z − H·x
        let innovation = z - h * state;

        // Innovation covariance: S = H·P·Hᵀ + R
        let s = h * cov * h.transpose() + r;
        let s_inv = s.try_inverse()?;

        // Kalman gain: K = P·Hᵀ·S⁻¹
        let k: Matrix6x4<f64> = cov * h.transpose() * s_inv;

        let new_state = state + k * innovation;

        // Joseph form: P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ
        let i_kh = Matrix6::<f64>::identity() - k * h;
        let new_cov = i_kh * cov * i_kh.transpose() + k * r * k.transpose();

        Some(KfUpdateResult {
            state: new_state,
            cov: new_cov,
            innovation,
            innovation_cov: s,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn predict_constant_velocity() {
        let kf = BoxKalmanFilter::default();
        // Box centred at (100, 50), 40×20, moving +2 px/frame down
        let state = Vector6::new(100.0, 50.0, 40.0, 20.0, 0.0, 2.0);
        let cov = StateCov::identity();

        let (pred, _) = kf.predict(&state, &cov);
        assert_abs_diff_eq!(pred[1], 52.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred[0], 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred[5], 2.0, epsilon = 1e-9); // vy unchanged
        assert_abs_diff_eq!(pred[2], 40.0, epsilon = 1e-9); // size carried over
    }

    #[test]
    fn predict_clamps_collapsed_size() {
        let kf = BoxKalmanFilter::default();
        let state = Vector6::new(10.0, 10.0, -3.0, 5.0, 0.0, 0.0);
        let (pred, _) = kf.predict(&state, &StateCov::identity());
        assert_eq!(pred[2], 0.0);
        assert_eq!(state_to_bbox(&pred).area(), 0.0);
    }

    #[test]
    fn update_reduces_uncertainty() {
        let kf = BoxKalmanFilter::default();
        let (state, cov) = kf.initiate(&BBox::new(80.0, 40.0, 120.0, 60.0));
        let (state, cov) = kf.predict(&state, &cov);
        let z = Vector4::new(101.0, 51.0, 40.0, 20.0);

        let res = kf.update(&state, &cov, &z).expect("S invertible");
        let prior_trace: f64 = (0..6).map(|i| cov[(i, i)]).sum();
        let post_trace: f64 = (0..6).map(|i| res.cov[(i, i)]).sum();
        assert!(post_trace < prior_trace, "Update should reduce uncertainty");
        // Estimate moves toward the observation
        assert!(res.state[0] > 100.0 && res.state[0] <= 101.0);
    }

    #[test]
    fn velocity_converges_on_steady_motion() {
        let kf = BoxKalmanFilter::default();
        let (mut state, mut cov) = kf.initiate(&BBox::from_center_size(100.0, 100.0, 40.0, 40.0));
        for i in 1..=30 {
            let (s, c) = kf.predict(&state, &cov);
            let z = Vector4::new(100.0, 100.0 + 3.0 * i as f64, 40.0, 40.0);
            let res = kf.update(&s, &c, &z).expect("S invertible");
            state = res.state;
            cov = res.cov;
        }
        assert_abs_diff_eq!(state[5], 3.0, epsilon = 0.2);
        assert_abs_diff_eq!(state[4], 0.0, epsilon = 0.1);
    }
}
