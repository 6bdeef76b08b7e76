//! Pinhole camera intrinsics and Brown-Conrady lens distortion.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Uncalibrated guess: focal length equal to the image width, principal
    /// point at the image centre.
    pub fn approximate(width: u32, height: u32) -> Self {
        let w = width as f64;
        let h = height as f64;
        Self {
            fx: w,
            fy: w,
            cx: w / 2.0,
            cy: h / 2.0,
        }
    }

    /// Chessboard calibration of the rig's tracking camera at 640x480.
    pub fn calibrated_640x480() -> Self {
        Self {
            fx: 7.353_083_355_304_351e2,
            fy: 7.353_083_355_304_351e2,
            cx: 320.0,
            cy: 240.0,
        }
    }

    /// Pixel to normalized image-plane coordinates (no distortion handling).
    pub fn normalize(&self, u: f64, v: f64) -> (f64, f64) {
        ((u - self.cx) / self.fx, (v - self.cy) / self.fy)
    }
}

/// Radial (k1, k2, k3) and tangential (p1, p2) distortion, OpenCV ordering.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Distortion {
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
    #[serde(default)]
    pub k3: f64,
}

impl Distortion {
    pub fn none() -> Self {
        Self::default()
    }

    /// From an OpenCV `[k1, k2, p1, p2, k3]` coefficient vector.
    pub fn from_coefficients(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    /// Distortion measured alongside [`CameraIntrinsics::calibrated_640x480`].
    pub fn calibrated_640x480() -> Self {
        Self::from_coefficients([
            -2.352_866_755_803_422_6e-2,
            1.330_143_187_910_885_6,
            0.0,
            0.0,
            -6.078_667_330_048_043_4,
        ])
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }

    /// Apply distortion to a normalized point.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xd = x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (xd, yd)
    }
}

/// Project a camera-frame point to pixels. Points at or behind the camera
/// plane yield `None`.
pub fn project(k: &CameraIntrinsics, dist: &Distortion, pc: &Vector3<f64>) -> Option<(f64, f64)> {
    if pc.z <= f64::EPSILON {
        return None;
    }
    let (x, y) = dist.distort(pc.x / pc.z, pc.y / pc.z);
    Some((k.fx * x + k.cx, k.fy * y + k.cy))
}
