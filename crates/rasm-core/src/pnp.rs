//! Perspective-n-Point pose solver.
//!
//! Finds the rigid transform `T_C_M` (model frame into camera frame) that
//! best explains a set of 3D model points and their 2D projections:
//! an EPnP estimate on undistorted rays, refined by Levenberg-Marquardt on
//! pixel reprojection error through the full distortion model.

use crate::intrinsics::{project, CameraIntrinsics, Distortion};
use crate::types::{Point2, Point3};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{
    linalg::SymmetricEigen, storage::Owned, DMatrix, DVector, Dyn, Matrix3, Rotation3, Vector3,
};
use thiserror::Error;

/// EPnP needs four control points' worth of constraints.
pub const MIN_POINTS: usize = 4;
const UNDISTORT_ITERATIONS: usize = 20;
const POSE_PARAMS: usize = 6;
const JACOBIAN_STEP: f64 = 1e-6;
const TOLERANCE: f64 = 1e-12;
/// Function evaluations allowed per parameter.
const PATIENCE: usize = 50;

#[derive(Error, Debug, PartialEq)]
pub enum PoseError {
    #[error("model has {model} points but {image} image points were given")]
    CountMismatch { model: usize, image: usize },
    #[error("need at least 4 correspondences, got {0}")]
    TooFewPoints(usize),
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),
    #[error("decomposition failed: {0}")]
    Decomposition(&'static str),
}

/// A solved pose.
#[derive(Debug, Clone, PartialEq)]
pub struct PnpSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    /// Root-mean-square reprojection error in pixels.
    pub rms_error: f64,
    /// Residual evaluations spent by the refinement.
    pub iterations: usize,
}

impl PnpSolution {
    /// Rodrigues rotation vector (axis scaled by angle in radians).
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Model point into the camera frame.
    pub fn transform(&self, p: &Point3) -> Vector3<f64> {
        self.rotation * Vector3::new(p.x, p.y, p.z) + self.translation
    }

    /// Model point to pixels.
    pub fn project(&self, p: &Point3, k: &CameraIntrinsics, dist: &Distortion) -> Option<Point2> {
        project(k, dist, &self.transform(p)).map(|(u, v)| Point2::new(u, v))
    }
}

/// Solve for the model-to-camera pose.
pub fn solve_pnp(
    model: &[Point3],
    image: &[Point2],
    k: &CameraIntrinsics,
    dist: &Distortion,
) -> Result<PnpSolution, PoseError> {
    if model.len() != image.len() {
        return Err(PoseError::CountMismatch {
            model: model.len(),
            image: image.len(),
        });
    }
    if model.len() < MIN_POINTS {
        return Err(PoseError::TooFewPoints(model.len()));
    }

    let rays: Vec<(f64, f64)> = image
        .iter()
        .map(|p| {
            let (xd, yd) = k.normalize(p.x, p.y);
            undistort(dist, xd, yd)
        })
        .collect();

    let (rotation, translation) = epnp(model, &rays)?;
    tracing::trace!(?translation, "EPnP initial estimate");

    refine(model, image, k, dist, rotation, translation)
}

/// Invert the distortion model by fixed-point iteration.
fn undistort(dist: &Distortion, xd: f64, yd: f64) -> (f64, f64) {
    if dist.is_zero() {
        return (xd, yd);
    }
    let (mut x, mut y) = (xd, yd);
    for _ in 0..UNDISTORT_ITERATIONS {
        let (dx, dy) = dist.distort(x, y);
        x += xd - dx;
        y += yd - dy;
    }
    (x, y)
}

/// EPnP on normalized rays.
fn epnp(model: &[Point3], rays: &[(f64, f64)]) -> Result<(Rotation3<f64>, Vector3<f64>), PoseError> {
    let n = model.len();
    let world: Vec<Vector3<f64>> = model.iter().map(|p| Vector3::new(p.x, p.y, p.z)).collect();

    let centroid = world.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n as f64;
    let mut cov = Matrix3::zeros();
    for p in &world {
        let d = p - centroid;
        cov += d * d.transpose();
    }
    cov /= n as f64;

    let eig = SymmetricEigen::new(cov);
    let mut control_w = [centroid; 4];
    for i in 0..3 {
        let spread = eig.eigenvalues[i].abs().sqrt();
        control_w[i + 1] = centroid + eig.eigenvectors.column(i).into_owned() * spread;
    }

    let basis = Matrix3::from_columns(&[
        control_w[1] - control_w[0],
        control_w[2] - control_w[0],
        control_w[3] - control_w[0],
    ]);
    let basis_inv = basis
        .try_inverse()
        .ok_or(PoseError::Degenerate("model points are coplanar or collinear"))?;

    let alphas: Vec<[f64; 4]> = world
        .iter()
        .map(|p| {
            let c = basis_inv * (p - control_w[0]);
            [1.0 - c.x - c.y - c.z, c.x, c.y, c.z]
        })
        .collect();

    let mut m = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (a, &(u, v))) in alphas.iter().zip(rays.iter()).enumerate() {
        for (j, &alpha) in a.iter().enumerate() {
            let c = 3 * j;
            m[(2 * i, c)] = alpha;
            m[(2 * i, c + 2)] = -u * alpha;
            m[(2 * i + 1, c + 1)] = alpha;
            m[(2 * i + 1, c + 2)] = -v * alpha;
        }
    }

    // Null vector of M from the smallest eigenpair of MᵀM; works for any n >= 4.
    let mtm = m.transpose() * &m;
    let eig = SymmetricEigen::new(mtm);
    let smallest = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .ok_or(PoseError::Decomposition("empty eigen decomposition"))?;
    let null = eig.eigenvectors.column(smallest);

    let mut control_c = [Vector3::zeros(); 4];
    for (j, cc) in control_c.iter_mut().enumerate() {
        *cc = Vector3::new(null[3 * j], null[3 * j + 1], null[3 * j + 2]);
    }

    // Fix scale from inter-control-point distances.
    let (mut sum_w, mut sum_c) = (0.0, 0.0);
    for i in 0..4 {
        for j in (i + 1)..4 {
            sum_w += (control_w[i] - control_w[j]).norm_squared();
            sum_c += (control_c[i] - control_c[j]).norm_squared();
        }
    }
    if sum_c <= f64::EPSILON {
        return Err(PoseError::Degenerate("control points collapsed"));
    }
    let scale = (sum_w / sum_c).sqrt();

    let mut camera: Vec<Vector3<f64>> = alphas
        .iter()
        .map(|a| {
            a.iter()
                .zip(control_c.iter())
                .fold(Vector3::zeros(), |acc, (&alpha, c)| acc + c * (alpha * scale))
        })
        .collect();

    // The null vector's sign is arbitrary; the scene must sit in front of the camera.
    let mean_depth = camera.iter().map(|p| p.z).sum::<f64>() / n as f64;
    if mean_depth < 0.0 {
        for p in &mut camera {
            *p = -*p;
        }
    }

    align(&world, &camera)
}

/// Kabsch alignment of corresponding point sets: `camera ≈ R * world + t`.
fn align(
    world: &[Vector3<f64>],
    camera: &[Vector3<f64>],
) -> Result<(Rotation3<f64>, Vector3<f64>), PoseError> {
    let n = world.len() as f64;
    let c_w = world.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let c_c = camera.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;

    let mut h = Matrix3::zeros();
    for (pw, pc) in world.iter().zip(camera.iter()) {
        h += (pc - c_c) * (pw - c_w).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or(PoseError::Decomposition("svd U"))?;
    let v_t = svd.v_t.ok_or(PoseError::Decomposition("svd Vᵀ"))?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    let t = c_c - r * c_w;
    Ok((Rotation3::from_matrix_unchecked(r), t))
}

/// Reprojection residuals of a pose `[rx, ry, rz, tx, ty, tz]`, as the
/// least-squares problem the Levenberg-Marquardt solver drives.
struct ReprojectionProblem<'a> {
    model: &'a [Point3],
    image: &'a [Point2],
    k: &'a CameraIntrinsics,
    dist: &'a Distortion,
    params: DVector<f64>,
}

impl ReprojectionProblem<'_> {
    /// Pixel residuals at `params`; `None` if a point falls behind the camera.
    fn residuals_at(&self, params: &DVector<f64>) -> Option<DVector<f64>> {
        let (rotation, translation) = unpack(params);
        let mut r = DVector::zeros(2 * self.model.len());
        for (i, (pm, pi)) in self.model.iter().zip(self.image.iter()).enumerate() {
            let pc = rotation * Vector3::new(pm.x, pm.y, pm.z) + translation;
            let (u, v) = project(self.k, self.dist, &pc)?;
            r[2 * i] = u - pi.x;
            r[2 * i + 1] = v - pi.y;
        }
        Some(r)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals_at(&self.params)
    }

    /// Central differences through the distortion model.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jac = DMatrix::zeros(2 * self.model.len(), POSE_PARAMS);
        for col in 0..POSE_PARAMS {
            let h = JACOBIAN_STEP * (1.0 + self.params[col].abs());
            let mut plus = self.params.clone();
            let mut minus = self.params.clone();
            plus[col] += h;
            minus[col] -= h;
            let diff = (self.residuals_at(&plus)? - self.residuals_at(&minus)?) / (2.0 * h);
            jac.set_column(col, &diff);
        }
        Some(jac)
    }
}

fn unpack(params: &DVector<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    let rotation = Rotation3::new(Vector3::new(params[0], params[1], params[2]));
    let translation = Vector3::new(params[3], params[4], params[5]);
    (rotation, translation)
}

fn refine(
    model: &[Point3],
    image: &[Point2],
    k: &CameraIntrinsics,
    dist: &Distortion,
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
) -> Result<PnpSolution, PoseError> {
    let rv = rotation.scaled_axis();
    let start = DVector::from_column_slice(&[
        rv.x,
        rv.y,
        rv.z,
        translation.x,
        translation.y,
        translation.z,
    ]);
    let problem = ReprojectionProblem {
        model,
        image,
        k,
        dist,
        params: start.clone(),
    };
    let initial = problem
        .residuals_at(&start)
        .ok_or(PoseError::Degenerate("initial pose puts points behind the camera"))?
        .norm_squared();

    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(TOLERANCE)
        .with_xtol(TOLERANCE)
        .with_gtol(TOLERANCE)
        .with_patience(PATIENCE)
        .minimize(problem);
    tracing::trace!(
        termination = ?report.termination,
        evaluations = report.number_of_evaluations,
        "PnP refinement finished"
    );

    // The solver can stop on a pose that pushed points behind the camera.
    let refined = problem.params();
    let (params, cost) = match problem.residuals_at(&refined) {
        Some(r) if r.norm_squared() <= initial => (refined, r.norm_squared()),
        _ => {
            tracing::debug!(
                termination = ?report.termination,
                "refinement rejected, keeping EPnP pose"
            );
            (start, initial)
        }
    };

    let (rotation, translation) = unpack(&params);
    Ok(PnpSolution {
        rotation,
        translation,
        rms_error: (cost / model.len() as f64).sqrt(),
        iterations: report.number_of_evaluations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::REFERENCE_MODEL;

    fn synthetic(
        rotation: Rotation3<f64>,
        translation: Vector3<f64>,
        k: &CameraIntrinsics,
        dist: &Distortion,
    ) -> Vec<Point2> {
        REFERENCE_MODEL
            .iter()
            .map(|p| {
                let pc = rotation * Vector3::new(p.x, p.y, p.z) + translation;
                let (u, v) = project(k, dist, &pc).unwrap();
                Point2::new(u, v)
            })
            .collect()
    }

    fn rotation_error(a: &Rotation3<f64>, b: &Rotation3<f64>) -> f64 {
        a.rotation_to(b).angle()
    }

    #[test]
    fn test_recovers_synthetic_pose() {
        let k = CameraIntrinsics::approximate(640, 480);
        let dist = Distortion::none();
        let rot = Rotation3::from_euler_angles(std::f64::consts::PI + 0.1, -0.2, 0.05);
        let t = Vector3::new(2.0, -1.5, 60.0);
        let image = synthetic(rot, t, &k, &dist);

        let sol = solve_pnp(&REFERENCE_MODEL, &image, &k, &dist).unwrap();

        assert!((sol.translation - t).norm() < 1e-3, "t = {:?}", sol.translation);
        assert!(rotation_error(&sol.rotation, &rot) < 1e-5);
        assert!(sol.rms_error < 1e-4, "rms = {}", sol.rms_error);
    }

    #[test]
    fn test_recovers_pose_with_distortion() {
        let k = CameraIntrinsics::calibrated_640x480();
        let dist = Distortion { k1: -0.05, k2: 0.01, p1: 0.001, p2: -0.0005, k3: 0.0 };
        let rot = Rotation3::from_euler_angles(std::f64::consts::PI - 0.15, 0.25, -0.1);
        let t = Vector3::new(-3.0, 2.0, 45.0);
        let image = synthetic(rot, t, &k, &dist);

        let sol = solve_pnp(&REFERENCE_MODEL, &image, &k, &dist).unwrap();

        assert!((sol.translation - t).norm() < 1e-2, "t = {:?}", sol.translation);
        assert!(rotation_error(&sol.rotation, &rot) < 1e-4);
    }

    #[test]
    fn test_noisy_points_still_converge() {
        let k = CameraIntrinsics::approximate(640, 480);
        let dist = Distortion::none();
        let rot = Rotation3::from_euler_angles(std::f64::consts::PI, 0.1, 0.0);
        let t = Vector3::new(0.0, 0.0, 50.0);
        let mut image = synthetic(rot, t, &k, &dist);
        for (i, p) in image.iter_mut().enumerate() {
            let jitter = if i % 2 == 0 { 0.5 } else { -0.5 };
            p.x += jitter;
            p.y -= jitter;
        }

        let sol = solve_pnp(&REFERENCE_MODEL, &image, &k, &dist).unwrap();

        assert!((sol.translation.z - 50.0).abs() < 2.0, "z = {}", sol.translation.z);
        assert!(sol.rms_error < 1.0);
    }

    #[test]
    fn test_refinement_converges_from_perturbed_start() {
        let k = CameraIntrinsics::calibrated_640x480();
        let dist = Distortion::calibrated_640x480();
        let rot = Rotation3::from_euler_angles(std::f64::consts::PI + 0.05, 0.3, 0.1);
        let t = Vector3::new(1.0, 2.0, 50.0);
        let image = synthetic(rot, t, &k, &dist);
        let start = Rotation3::from_euler_angles(0.05, -0.04, 0.03) * rot;

        let sol = refine(&REFERENCE_MODEL, &image, &k, &dist, start, t + Vector3::new(1.5, -1.0, 4.0))
            .unwrap();

        assert!(sol.iterations > 0);
        assert!((sol.translation - t).norm() < 1e-3, "t = {:?}", sol.translation);
        assert!(rotation_error(&sol.rotation, &rot) < 1e-5);
        assert!(sol.rms_error < 1e-4, "rms = {}", sol.rms_error);
    }

    #[test]
    fn test_refinement_rejects_pose_behind_camera() {
        let k = CameraIntrinsics::approximate(640, 480);
        let image = vec![Point2::new(320.0, 240.0); REFERENCE_MODEL.len()];
        let err = refine(
            &REFERENCE_MODEL,
            &image,
            &k,
            &Distortion::none(),
            Rotation3::identity(),
            Vector3::new(0.0, 0.0, -50.0),
        )
        .unwrap_err();
        assert!(matches!(err, PoseError::Degenerate(_)));
    }

    #[test]
    fn test_count_mismatch() {
        let k = CameraIntrinsics::approximate(640, 480);
        let image = vec![Point2::default(); 13];
        let err = solve_pnp(&REFERENCE_MODEL, &image, &k, &Distortion::none()).unwrap_err();
        assert_eq!(err, PoseError::CountMismatch { model: 14, image: 13 });
    }

    #[test]
    fn test_too_few_points() {
        let k = CameraIntrinsics::approximate(640, 480);
        let model = &REFERENCE_MODEL[..3];
        let image = vec![Point2::default(); 3];
        let err = solve_pnp(model, &image, &k, &Distortion::none()).unwrap_err();
        assert_eq!(err, PoseError::TooFewPoints(3));
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let dist = Distortion::calibrated_640x480();
        let (xd, yd) = dist.distort(0.1, -0.05);
        let (x, y) = undistort(&dist, xd, yd);
        assert!((x - 0.1).abs() < 1e-9);
        assert!((y + 0.05).abs() < 1e-9);
    }
}
