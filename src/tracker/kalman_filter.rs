//! Constant-velocity Kalman filter over a box center, used as the motion prior
//! of the template tracker.
//!
//! State is `[cx, cy, vx, vy]`, the measurement is `[cx, cy]`. Noise scales
//! with the object's size so large and small boxes behave alike.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Matrix4<f64>,
    update_mat: Matrix2x4<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

/// Mean and covariance of one filtered object.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanState {
    pub mean: Vector4<f64>,
    pub covariance: Matrix4<f64>,
}

impl KalmanState {
    pub fn position(&self) -> (f64, f64) {
        (self.mean[0], self.mean[1])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.mean[2], self.mean[3])
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion_mat = Matrix4::identity();
        motion_mat[(0, 2)] = 1.0;
        motion_mat[(1, 3)] = 1.0;

        let mut update_mat = Matrix2x4::zeros();
        update_mat[(0, 0)] = 1.0;
        update_mat[(1, 1)] = 1.0;

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Start filtering from a first measurement; velocity starts at zero.
    /// `scale` is the object's size in pixels (e.g. its height).
    pub fn initiate(&self, measurement: [f64; 2], scale: f64) -> KalmanState {
        let mean = Vector4::new(measurement[0], measurement[1], 0.0, 0.0);

        let pos = 2.0 * self.std_weight_position * scale;
        let vel = 10.0 * self.std_weight_velocity * scale;
        let covariance = Matrix4::from_diagonal(&Vector4::new(
            pos * pos,
            pos * pos,
            vel * vel,
            vel * vel,
        ));

        KalmanState { mean, covariance }
    }

    /// Project the state one frame forward.
    pub fn predict(&self, state: &mut KalmanState, scale: f64) {
        let pos = self.std_weight_position * scale;
        let vel = self.std_weight_velocity * scale;
        let motion_cov =
            Matrix4::from_diagonal(&Vector4::new(pos * pos, pos * pos, vel * vel, vel * vel));

        state.mean = self.motion_mat * state.mean;
        state.covariance =
            self.motion_mat * state.covariance * self.motion_mat.transpose() + motion_cov;
    }

    /// Fold a new center measurement into the state.
    ///
    /// Returns `false` and leaves the state untouched when the innovation
    /// covariance cannot be inverted.
    pub fn update(&self, state: &mut KalmanState, measurement: [f64; 2], scale: f64) -> bool {
        let pos = self.std_weight_position * scale;
        let innovation_cov = Matrix2::from_diagonal(&Vector2::new(pos * pos, pos * pos));

        let projected_mean = self.update_mat * state.mean;
        let projected_cov =
            self.update_mat * state.covariance * self.update_mat.transpose() + innovation_cov;

        let Some(s_inv) = projected_cov.try_inverse() else {
            return false;
        };

        let innovation = Vector2::new(measurement[0], measurement[1]) - projected_mean;
        let kalman_gain = state.covariance * self.update_mat.transpose() * s_inv;

        state.mean += kalman_gain * innovation;
        state.covariance -= kalman_gain * projected_cov * kalman_gain.transpose();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate() {
        let kf = KalmanFilter::new();
        let state = kf.initiate([100.0, 200.0], 50.0);
        assert_eq!(state.position(), (100.0, 200.0));
        assert_eq!(state.velocity(), (0.0, 0.0));
    }

    #[test]
    fn test_learns_velocity() {
        let kf = KalmanFilter::new();
        let mut state = kf.initiate([0.0, 0.0], 40.0);
        for step in 1..=20 {
            kf.predict(&mut state, 40.0);
            assert!(kf.update(&mut state, [step as f64 * 4.0, 0.0], 40.0));
        }
        let (vx, vy) = state.velocity();
        assert!((vx - 4.0).abs() < 1.0, "vx = {vx}");
        assert!(vy.abs() < 1.0);

        kf.predict(&mut state, 40.0);
        assert!((state.position().0 - 84.0).abs() < 4.0);
    }
}
