//! Box geometry: IOU, centre/size conversion and the IOU matrix used by
//! association. Pure functions, no state.

use nalgebra::{DMatrix, Vector4};
use serde::{Deserialize, Serialize};

/// Axis-aligned box with corners (x1, y1) top-left and (x2, y2) bottom-right.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from centre and size. Negative sizes are clamped to zero.
    pub fn from_center_size(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        let hw = w.max(0.0) / 2.0;
        let hh = h.max(0.0) / 2.0;
        Self::new(cx - hw, cy - hh, cx + hw, cy + hh)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Area, zero for inverted boxes.
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Finite corners and strictly positive width and height.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Measurement vector [cx, cy, w, h] for the box filter.
    pub fn to_measurement(&self) -> Vector4<f64> {
        let (cx, cy) = self.center();
        Vector4::new(cx, cy, self.width(), self.height())
    }
}

/// Intersection over union in [0, 1].
///
/// Degenerate boxes (non-finite, zero or negative area) have IOU 0 with
/// everything, so callers never divide by zero.
pub fn iou(a: &BBox, b: &BBox) -> f64 {
    if !a.is_valid() || !b.is_valid() {
        return 0.0;
    }
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    if ix2 <= ix1 || iy2 <= iy1 {
        return 0.0;
    }
    let inter = (ix2 - ix1) * (iy2 - iy1);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    (inter / union).clamp(0.0, 1.0)
}

/// IOU matrix, rows = track boxes, columns = detection boxes.
pub fn iou_matrix(tracks: &[BBox], detections: &[BBox]) -> DMatrix<f64> {
    DMatrix::from_fn(tracks.len(), detections.len(), |r, c| {
        iou(&tracks[r], &detections[c])
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identical_boxes_have_unit_iou() {
        let a = BBox::new(10.0, 10.0, 50.0, 30.0);
        assert_abs_diff_eq!(iou(&a, &a), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn half_overlap() {
        // Two 10×10 boxes sharing a 5×10 strip: 50 / 150
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        assert_abs_diff_eq!(iou(&a, &b), 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn disjoint_and_touching_boxes_are_zero() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&a, &BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert_eq!(iou(&a, &BBox::new(10.0, 0.0, 20.0, 10.0)), 0.0);
    }

    #[test]
    fn degenerate_box_is_zero_not_nan() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let flat = BBox::new(2.0, 2.0, 2.0, 8.0);
        let nan = BBox::new(f64::NAN, 0.0, 1.0, 1.0);
        assert_eq!(iou(&a, &flat), 0.0);
        assert_eq!(iou(&flat, &flat), 0.0);
        assert_eq!(iou(&a, &nan), 0.0);
    }

    #[test]
    fn center_size_roundtrip() {
        let b = BBox::from_center_size(50.0, 40.0, 20.0, 10.0);
        assert_eq!(b, BBox::new(40.0, 35.0, 60.0, 45.0));
        let z = b.to_measurement();
        assert_abs_diff_eq!(z[0], 50.0);
        assert_abs_diff_eq!(z[3], 10.0);
    }

    #[test]
    fn matrix_shape_follows_inputs() {
        let tracks = [BBox::new(0.0, 0.0, 10.0, 10.0), BBox::new(100.0, 100.0, 110.0, 110.0)];
        let dets = [BBox::new(0.0, 0.0, 10.0, 10.0)];
        let m = iou_matrix(&tracks, &dets);
        assert_eq!(m.shape(), (2, 1));
        assert_abs_diff_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(1, 0)], 0.0);
    }
}
