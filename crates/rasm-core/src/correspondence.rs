//! Pairing detected landmarks with the reference model.

use crate::reference::{ReferenceModel, REFERENCE_POINT_COUNT};
use crate::types::{LandmarkSet, Point2};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CorrespondenceError {
    #[error("need {expected} observed points to match the reference model, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("landmark index {0} is outside the landmark set")]
    IndexOutOfRange(usize),
}

/// The 2D half of the pose correspondence, index-aligned with the reference model.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedPoints {
    points: [Point2; REFERENCE_POINT_COUNT],
}

impl ObservedPoints {
    /// Pick the reference landmarks out of a full 68-point set.
    pub fn from_landmarks(
        landmarks: &LandmarkSet,
        model: &ReferenceModel,
    ) -> Result<Self, CorrespondenceError> {
        let selected = model
            .landmark_indices()
            .iter()
            .map(|&i| landmarks.get(i).ok_or(CorrespondenceError::IndexOutOfRange(i)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_points(selected)
    }

    /// Accept an already-selected point list; it must match the model one-to-one.
    pub fn from_points(points: Vec<Point2>) -> Result<Self, CorrespondenceError> {
        let actual = points.len();
        let points: [Point2; REFERENCE_POINT_COUNT] =
            points
                .try_into()
                .map_err(|_| CorrespondenceError::CountMismatch {
                    expected: REFERENCE_POINT_COUNT,
                    actual,
                })?;
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point2; REFERENCE_POINT_COUNT] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
