//! rasm-core — Face detection, landmarks, and head-pose solving.
//!
//! SCRFD finds faces and a 68-point regressor places landmarks, both via
//! ONNX Runtime. Fourteen of those landmarks are matched against a fixed 3D
//! face model and a PnP solve yields the head's rotation and position.

pub mod correspondence;
pub mod detector;
pub mod intrinsics;
pub mod landmarks;
pub mod pipeline;
pub mod pnp;
pub mod pose;
pub mod reference;
mod resample;
pub mod selection;
pub mod types;

pub use correspondence::{CorrespondenceError, ObservedPoints};
pub use detector::{DetectorConfig, DetectorError, FaceDetector};
pub use intrinsics::{CameraIntrinsics, Distortion};
pub use landmarks::{LandmarkConfig, LandmarkError, LandmarkPredictor, TensorLayout};
pub use pipeline::{Calibration, EstimatorConfig, PipelineError, PoseEstimator, PoseReport};
pub use pnp::{solve_pnp, PnpSolution, PoseError};
pub use pose::{estimate_head_pose, EulerAngles, HeadPose, HeadPosition};
pub use reference::{ReferenceModel, REFERENCE_MODEL};
pub use selection::FaceSelector;
pub use types::{FaceBox, LandmarkSet, Point2, Point3};
