//! Canonical 3D face model used as the object side of the pose solve.
//!
//! Fourteen points from an anthropometric head model, in centimetres,
//! with +x toward the subject's left, +y up and +z out of the face.
//! Each point is paired with the 68-point landmark index that observes it.

use crate::types::Point3;

pub const REFERENCE_POINT_COUNT: usize = 14;

/// Model points, in the order the landmark indices below refer to them.
///
/// Values from the glAnthropometric3DModel head model (ISR, University of
/// Coimbra).
pub const REFERENCE_MODEL: [Point3; REFERENCE_POINT_COUNT] = [
    Point3::new(6.825897, 6.760612, 4.402142),   // left brow, left corner
    // 1.330353 as in the anthropometric model, mirroring point 2; some
    // copies of this table carry a mistyped 2.330353.
    Point3::new(1.330353, 7.122144, 6.903745),   // left brow, right corner
    Point3::new(-1.330353, 7.122144, 6.903745),  // right brow, left corner
    Point3::new(-6.825897, 6.760612, 4.402142),  // right brow, right corner
    Point3::new(5.311432, 5.485328, 3.987654),   // left eye, left corner
    Point3::new(1.789930, 5.393625, 4.413414),   // left eye, right corner
    Point3::new(-1.789930, 5.393625, 4.413414),  // right eye, left corner
    Point3::new(-5.311432, 5.485328, 3.987654),  // right eye, right corner
    Point3::new(2.005628, 1.409845, 6.165652),   // nose, left corner
    Point3::new(-2.005628, 1.409845, 6.165652),  // nose, right corner
    Point3::new(2.774015, -2.080775, 5.048531),  // mouth, left corner
    Point3::new(-2.774015, -2.080775, 5.048531), // mouth, right corner
    Point3::new(0.000000, -3.116408, 6.097667),  // mouth, bottom centre
    Point3::new(0.000000, -7.415691, 4.070434),  // chin
];

/// 68-point landmark index observing each entry of [`REFERENCE_MODEL`].
pub const REFERENCE_LANDMARK_INDICES: [usize; REFERENCE_POINT_COUNT] =
    [17, 21, 22, 26, 36, 39, 42, 45, 31, 35, 48, 54, 57, 8];

/// Read-only handle to the constant model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceModel;

impl ReferenceModel {
    pub fn points(&self) -> &'static [Point3; REFERENCE_POINT_COUNT] {
        &REFERENCE_MODEL
    }

    pub fn landmark_indices(&self) -> &'static [usize; REFERENCE_POINT_COUNT] {
        &REFERENCE_LANDMARK_INDICES
    }

    pub fn len(&self) -> usize {
        REFERENCE_POINT_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
