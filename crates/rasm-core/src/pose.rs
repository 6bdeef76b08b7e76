//! Head pose derived from a PnP solution: Euler angles and where the head
//! sits relative to the camera.

use crate::correspondence::ObservedPoints;
use crate::intrinsics::{CameraIntrinsics, Distortion};
use crate::pnp::{solve_pnp, PnpSolution, PoseError};
use crate::reference::ReferenceModel;
use crate::types::Point3;
use nalgebra::{Matrix3, Rotation3};
use serde::Serialize;

pub const CM_PER_INCH: f64 = 2.54;
/// Half of the tracking camera's horizontal field of view.
pub const HALF_FOV_HORIZONTAL_DEG: f64 = 27.6;
/// Half of the tracking camera's vertical field of view.
pub const HALF_FOV_VERTICAL_DEG: f64 = 20.0;
/// Half edge of the cube drawn around the head, in model units.
const CUBE_HALF_EDGE: f64 = 10.0;

/// Rotation split as `R = Rz(roll) * Ry(yaw) * Rx(pitch)`, in degrees.
///
/// This is the order OpenCV's `RQDecomp3x3` reports, so a frontal face
/// reads pitch near ±180 and roll keeps OpenCV's sign.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EulerAngles {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

impl EulerAngles {
    pub fn from_rotation(r: &Matrix3<f64>) -> Self {
        let sy = (-r[(2, 0)]).clamp(-1.0, 1.0);
        let yaw = sy.asin();
        let (pitch, roll) = if sy.abs() < 1.0 - 1e-9 {
            (r[(2, 1)].atan2(r[(2, 2)]), r[(1, 0)].atan2(r[(0, 0)]))
        } else {
            // Gimbal lock: fold everything into pitch.
            ((-r[(1, 2)]).atan2(r[(1, 1)]), 0.0)
        };
        Self {
            pitch: pitch.to_degrees(),
            yaw: yaw.to_degrees(),
            roll: roll.to_degrees(),
        }
    }

    pub fn to_rotation(&self) -> Rotation3<f64> {
        let rx = Rotation3::from_axis_angle(&nalgebra::Vector3::x_axis(), self.pitch.to_radians());
        let ry = Rotation3::from_axis_angle(&nalgebra::Vector3::y_axis(), self.yaw.to_radians());
        let rz = Rotation3::from_axis_angle(&nalgebra::Vector3::z_axis(), self.roll.to_radians());
        rz * ry * rx
    }
}

/// Head position relative to the camera axis, in inches.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HeadPosition {
    /// Along the optical axis.
    pub distance: f64,
    /// Sideways; positive when the head is left of centre in the image.
    pub lateral: f64,
    /// Up/down; positive when the head is below centre in the image.
    pub vertical: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadPose {
    /// Rodrigues rotation vector, radians.
    pub rotation_vector: [f64; 3],
    /// Model origin in camera coordinates, centimetres.
    pub translation: [f64; 3],
    pub euler: EulerAngles,
    pub position: HeadPosition,
    /// Pixels.
    pub reprojection_rms: f64,
}

impl HeadPose {
    pub fn from_solution(
        solution: &PnpSolution,
        k: &CameraIntrinsics,
        dist: &Distortion,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let rv = solution.rotation_vector();
        let t = solution.translation;
        Self {
            rotation_vector: [rv.x, rv.y, rv.z],
            translation: [t.x, t.y, t.z],
            euler: EulerAngles::from_rotation(solution.rotation.matrix()),
            position: head_position(solution, k, dist, frame_width, frame_height),
            reprojection_rms: solution.rms_error,
        }
    }
}

/// Solve the head pose for one set of observed points.
pub fn estimate_head_pose(
    observed: &ObservedPoints,
    model: &ReferenceModel,
    k: &CameraIntrinsics,
    dist: &Distortion,
    frame_width: u32,
    frame_height: u32,
) -> Result<HeadPose, PoseError> {
    let solution = solve_pnp(model.points(), observed.points(), k, dist)?;
    Ok(HeadPose::from_solution(&solution, k, dist, frame_width, frame_height))
}

/// Locate the head from the centre of its reprojected bounding cube.
///
/// The cube centre's offset from the image centre, as a fraction of the half
/// frame, scales the half field of view at the head's depth.
pub fn head_position(
    solution: &PnpSolution,
    k: &CameraIntrinsics,
    dist: &Distortion,
    frame_width: u32,
    frame_height: u32,
) -> HeadPosition {
    let depth = solution.translation.z;

    let mut sum = (0.0, 0.0);
    let mut count = 0usize;
    for corner in cube_corners() {
        if let Some(p) = solution.project(&corner, k, dist) {
            sum.0 += p.x;
            sum.1 += p.y;
            count += 1;
        }
    }
    let (x_off, y_off) = if count == 0 || frame_width == 0 || frame_height == 0 {
        (0.0, 0.0)
    } else {
        (
            sum.0 / count as f64 / frame_width as f64 - 0.5,
            sum.1 / count as f64 / frame_height as f64 - 0.5,
        )
    };

    let lateral_cm = -depth * HALF_FOV_HORIZONTAL_DEG.to_radians().tan() * x_off / 0.5;
    let vertical_cm = depth * HALF_FOV_VERTICAL_DEG.to_radians().tan() * y_off / 0.5;

    HeadPosition {
        distance: depth / CM_PER_INCH,
        lateral: lateral_cm / CM_PER_INCH,
        vertical: vertical_cm / CM_PER_INCH,
    }
}

fn cube_corners() -> [Point3; 8] {
    let h = CUBE_HALF_EDGE;
    [
        Point3::new(h, h, h),
        Point3::new(h, h, -h),
        Point3::new(h, -h, -h),
        Point3::new(h, -h, h),
        Point3::new(-h, h, h),
        Point3::new(-h, h, -h),
        Point3::new(-h, -h, -h),
        Point3::new(-h, -h, h),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsics::project;
    use crate::types::Point2;
    use nalgebra::Vector3;

    #[test]
    fn test_euler_inverts_known_rotation() {
        let angles = EulerAngles { pitch: 12.0, yaw: -25.0, roll: 7.5 };
        let back = EulerAngles::from_rotation(angles.to_rotation().matrix());
        assert!((back.pitch - 12.0).abs() < 1e-9);
        assert!((back.yaw + 25.0).abs() < 1e-9);
        assert!((back.roll - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_euler_matches_rq_decomposition() {
        // Frontal face tilted 10 degrees in the image plane.
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), 10f64.to_radians());
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
        let e = EulerAngles::from_rotation((rz * rx).matrix());
        assert!((e.roll - 10.0).abs() < 1e-9, "{e:?}");
        assert!((e.pitch.abs() - 180.0).abs() < 1e-9, "{e:?}");
        assert!(e.yaw.abs() < 1e-9, "{e:?}");
    }

    #[test]
    fn test_euler_reads_rotation_matrix_entries() {
        // Rows as RQDecomp3x3 reports them for pitch 20, yaw 30, roll 40.
        let (sx, cx) = 20f64.to_radians().sin_cos();
        let (sy, cy) = 30f64.to_radians().sin_cos();
        let (sz, cz) = 40f64.to_radians().sin_cos();
        let r = Matrix3::new(
            cy * cz, sx * sy * cz - cx * sz, cx * sy * cz + sx * sz,
            cy * sz, sx * sy * sz + cx * cz, cx * sy * sz - sx * cz,
            -sy, sx * cy, cx * cy,
        );
        let e = EulerAngles::from_rotation(&r);
        assert!((e.pitch - 20.0).abs() < 1e-9, "{e:?}");
        assert!((e.yaw - 30.0).abs() < 1e-9, "{e:?}");
        assert!((e.roll - 40.0).abs() < 1e-9, "{e:?}");
    }

    #[test]
    fn test_euler_identity() {
        let e = EulerAngles::from_rotation(&Matrix3::identity());
        assert_eq!(e, EulerAngles::default());
    }

    #[test]
    fn test_euler_gimbal_lock() {
        let angles = EulerAngles { pitch: 30.0, yaw: 90.0, roll: 0.0 };
        let back = EulerAngles::from_rotation(angles.to_rotation().matrix());
        assert!((back.yaw - 90.0).abs() < 1e-6);
        assert!((back.pitch - 30.0).abs() < 1e-6);
        assert_eq!(back.roll, 0.0);
    }

    fn centred_solution(depth: f64) -> PnpSolution {
        PnpSolution {
            rotation: Rotation3::identity(),
            translation: Vector3::new(0.0, 0.0, depth),
            rms_error: 0.0,
            iterations: 0,
        }
    }

    #[test]
    fn test_centred_head_has_no_offset() {
        let k = CameraIntrinsics::approximate(640, 480);
        let pos = head_position(&centred_solution(50.8), &k, &Distortion::none(), 640, 480);
        assert!((pos.distance - 20.0).abs() < 1e-9);
        assert!(pos.lateral.abs() < 1e-9);
        assert!(pos.vertical.abs() < 1e-9);
    }

    #[test]
    fn test_head_below_centre_is_positive_vertical() {
        let k = CameraIntrinsics::approximate(640, 480);
        let mut sol = centred_solution(50.0);
        sol.translation.y = 5.0;
        let pos = head_position(&sol, &k, &Distortion::none(), 640, 480);
        assert!(pos.vertical > 0.0);
        assert!(pos.lateral.abs() < 1e-9);
    }

    #[test]
    fn test_head_right_in_image_is_negative_lateral() {
        let k = CameraIntrinsics::approximate(640, 480);
        let mut sol = centred_solution(50.0);
        sol.translation.x = 5.0;
        let pos = head_position(&sol, &k, &Distortion::none(), 640, 480);
        assert!(pos.lateral < 0.0);
    }

    #[test]
    fn test_estimate_from_synthetic_observation() {
        let k = CameraIntrinsics::approximate(640, 480);
        let dist = Distortion::none();
        let truth = EulerAngles { pitch: 180.0, yaw: 10.0, roll: -8.0 }.to_rotation();
        let t = Vector3::new(0.0, 0.0, 55.0);
        let pts: Vec<Point2> = ReferenceModel
            .points()
            .iter()
            .map(|p| {
                let (u, v) = project(&k, &dist, &(truth * Vector3::new(p.x, p.y, p.z) + t)).unwrap();
                Point2::new(u, v)
            })
            .collect();
        let observed = ObservedPoints::from_points(pts).unwrap();

        let pose = estimate_head_pose(&observed, &ReferenceModel, &k, &dist, 640, 480).unwrap();

        assert!((pose.euler.yaw - 10.0).abs() < 1e-3, "{:?}", pose.euler);
        assert!((pose.euler.roll + 8.0).abs() < 1e-3, "{:?}", pose.euler);
        assert!((pose.euler.pitch.abs() - 180.0).abs() < 1e-3, "{:?}", pose.euler);
        assert!((pose.translation[2] - 55.0).abs() < 1e-3);
        assert!(pose.reprojection_rms < 1e-4);
    }

    #[test]
    fn test_head_pose_serializes() {
        let k = CameraIntrinsics::approximate(640, 480);
        let pose = HeadPose::from_solution(&centred_solution(40.0), &k, &Distortion::none(), 640, 480);
        let json = serde_json::to_value(&pose).unwrap();
        assert!(json["euler"]["roll"].is_number());
        assert_eq!(json["translation"][2], 40.0);
    }
}
