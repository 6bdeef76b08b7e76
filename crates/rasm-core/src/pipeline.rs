//! Per-frame head pose estimation: detect, select, predict landmarks, solve.

use crate::correspondence::{CorrespondenceError, ObservedPoints};
use crate::detector::{DetectorConfig, DetectorError, FaceDetector};
use crate::intrinsics::{CameraIntrinsics, Distortion};
use crate::landmarks::{LandmarkConfig, LandmarkError, LandmarkPredictor};
use crate::pnp::PoseError;
use crate::pose::{estimate_head_pose, HeadPose};
use crate::reference::ReferenceModel;
use crate::selection::FaceSelector;
use crate::types::{FaceBox, LandmarkSet};
use rasm_hw::Frame;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "face_detector.onnx";
pub const LANDMARK_MODEL_FILE: &str = "face_landmarks.onnx";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Landmarks(#[from] LandmarkError),
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),
    #[error(transparent)]
    Pose(#[from] PoseError),
}

/// Where the camera model comes from.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Calibration {
    /// Derive intrinsics from each frame's size; no distortion.
    #[default]
    Approximate,
    Fixed {
        intrinsics: CameraIntrinsics,
        distortion: Distortion,
    },
}

impl Calibration {
    pub fn resolve(&self, width: u32, height: u32) -> (CameraIntrinsics, Distortion) {
        match self {
            Calibration::Approximate => (CameraIntrinsics::approximate(width, height), Distortion::none()),
            Calibration::Fixed { intrinsics, distortion } => (*intrinsics, *distortion),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub model_dir: PathBuf,
    pub detector: DetectorConfig,
    pub landmarks: LandmarkConfig,
    pub calibration: Calibration,
    pub center_weight: f32,
    pub proximal_weight: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            detector: DetectorConfig::default(),
            landmarks: LandmarkConfig::default(),
            calibration: Calibration::default(),
            center_weight: 1.0,
            proximal_weight: 1.0,
        }
    }
}

impl EstimatorConfig {
    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn landmark_path(&self) -> PathBuf {
        self.model_dir.join(LANDMARK_MODEL_FILE)
    }
}

/// One processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct PoseReport {
    pub sequence: u32,
    pub face_count: usize,
    /// The tracked face, if any face was found.
    pub face: Option<FaceBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<LandmarkSet>,
    pub pose: Option<HeadPose>,
}

pub struct PoseEstimator {
    detector: FaceDetector,
    predictor: LandmarkPredictor,
    selector: FaceSelector,
    model: ReferenceModel,
    calibration: Calibration,
    keep_landmarks: bool,
}

impl PoseEstimator {
    pub fn load(config: &EstimatorConfig) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(&config.detector_path(), config.detector)?;
        let predictor = LandmarkPredictor::load(&config.landmark_path(), config.landmarks)?;
        Ok(Self {
            detector,
            predictor,
            selector: FaceSelector::new(config.center_weight, config.proximal_weight),
            model: ReferenceModel,
            calibration: config.calibration,
            keep_landmarks: false,
        })
    }

    /// Include the full 68-point set in each report.
    pub fn keep_landmarks(&mut self, keep: bool) {
        self.keep_landmarks = keep;
    }

    pub fn selector_mut(&mut self) -> &mut FaceSelector {
        &mut self.selector
    }

    pub fn model_dir_hint(path: &Path) -> String {
        format!(
            "expected {} and {} in {}",
            DETECTOR_MODEL_FILE,
            LANDMARK_MODEL_FILE,
            path.display()
        )
    }

    pub fn process(&mut self, frame: &Frame) -> Result<PoseReport, PipelineError> {
        let faces = self.detector.detect(frame)?;
        let face_count = faces.len();

        let Some(index) = self.selector.select(&faces, frame.width, frame.height) else {
            tracing::debug!(sequence = frame.sequence, "no face in frame");
            return Ok(PoseReport {
                sequence: frame.sequence,
                face_count,
                face: None,
                landmarks: None,
                pose: None,
            });
        };
        let face = faces[index].clone();

        let landmarks = self.predictor.predict(frame, &face)?;
        let observed = ObservedPoints::from_landmarks(&landmarks, &self.model)?;

        let (k, dist) = self.calibration.resolve(frame.width, frame.height);
        let pose = estimate_head_pose(&observed, &self.model, &k, &dist, frame.width, frame.height)?;

        tracing::debug!(
            sequence = frame.sequence,
            face_count,
            pitch = pose.euler.pitch,
            yaw = pose.euler.yaw,
            roll = pose.euler.roll,
            rms = pose.reprojection_rms,
            "pose estimated"
        );

        Ok(PoseReport {
            sequence: frame.sequence,
            face_count,
            face: Some(face),
            landmarks: self.keep_landmarks.then_some(landmarks),
            pose: Some(pose),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths() {
        let config = EstimatorConfig {
            model_dir: PathBuf::from("/opt/rasm/models"),
            ..Default::default()
        };
        assert_eq!(config.detector_path(), PathBuf::from("/opt/rasm/models/face_detector.onnx"));
        assert_eq!(config.landmark_path(), PathBuf::from("/opt/rasm/models/face_landmarks.onnx"));
    }

    #[test]
    fn test_missing_detector_model_is_typed_error() {
        let config = EstimatorConfig {
            model_dir: PathBuf::from("/nonexistent/rasm-models"),
            ..Default::default()
        };
        let err = PoseEstimator::load(&config).err().unwrap();
        assert!(matches!(err, PipelineError::Detector(DetectorError::ModelNotFound(_))));
    }

    #[test]
    fn test_approximate_calibration_follows_frame_size() {
        let (k, d) = Calibration::Approximate.resolve(1280, 720);
        assert_eq!(k.fx, 1280.0);
        assert_eq!(k.cy, 360.0);
        assert!(d.is_zero());
    }

    #[test]
    fn test_fixed_calibration_ignores_frame_size() {
        let cal = Calibration::Fixed {
            intrinsics: CameraIntrinsics::calibrated_640x480(),
            distortion: Distortion::calibrated_640x480(),
        };
        let (k, d) = cal.resolve(320, 240);
        assert_eq!(k, CameraIntrinsics::calibrated_640x480());
        assert!(!d.is_zero());
    }

    #[test]
    fn test_empty_report_serializes() {
        let report = PoseReport {
            sequence: 3,
            face_count: 0,
            face: None,
            landmarks: None,
            pose: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["face_count"], 0);
        assert!(json["pose"].is_null());
        assert!(json.get("landmarks").is_none());
    }
}
