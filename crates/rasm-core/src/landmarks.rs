//! 68-point facial landmark regression via ONNX Runtime.
//!
//! The face box is squared around its centre, cropped from the frame and
//! resampled to the network input. The model returns 136 values, the x/y
//! pairs of each landmark normalized to the crop.

use crate::resample;
use crate::types::{FaceBox, LandmarkSet, Point2, LANDMARK_COUNT};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rasm_hw::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: usize = 128;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("face box is empty")]
    EmptyCrop,
    #[error("landmark model returned {actual} values, expected {expected}")]
    InvalidOutput { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Channel ordering of the network input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkConfig {
    pub input_size: usize,
    pub layout: TensorLayout,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            layout: TensorLayout::Nhwc,
        }
    }
}

/// Square region of the frame fed to the network, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crop {
    pub x: f32,
    pub y: f32,
    pub side: f32,
}

impl Crop {
    pub fn around(face: &FaceBox) -> Option<Self> {
        let side = face.width.max(face.height);
        if side.is_nan() || side <= 0.0 {
            return None;
        }
        let (cx, cy) = face.center();
        Some(Self {
            x: cx - side / 2.0,
            y: cy - side / 2.0,
            side,
        })
    }

    /// Crop-normalized coordinates back to frame pixels.
    pub fn to_frame(&self, u: f32, v: f32) -> Point2 {
        Point2::new(
            (self.x + u * self.side) as f64,
            (self.y + v * self.side) as f64,
        )
    }
}

pub struct LandmarkPredictor {
    session: Session,
    config: LandmarkConfig,
}

impl LandmarkPredictor {
    pub fn load(model_path: &Path, config: LandmarkConfig) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            input_size = config.input_size,
            layout = ?config.layout,
            "loaded landmark model"
        );

        Ok(Self { session, config })
    }

    pub fn predict(&mut self, frame: &Frame, face: &FaceBox) -> Result<LandmarkSet, LandmarkError> {
        let crop = Crop::around(face).ok_or(LandmarkError::EmptyCrop)?;
        let input = preprocess(frame, &crop, &self.config);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, values) = outputs[0].try_extract_tensor::<f32>()?;

        decode(values, &crop)
    }
}

/// Sample the crop into a 3-channel float tensor with values in 0..=255.
fn preprocess(frame: &Frame, crop: &Crop, config: &LandmarkConfig) -> Array4<f32> {
    let n = config.input_size;
    let shape = match config.layout {
        TensorLayout::Nhwc => (1, n, n, 3),
        TensorLayout::Nchw => (1, 3, n, n),
    };
    let mut tensor = Array4::<f32>::zeros(shape);
    let step = crop.side / n as f32;
    let (w, h) = (frame.width as usize, frame.height as usize);

    for y in 0..n {
        let src_y = crop.y + (y as f32 + 0.5) * step - 0.5;
        for x in 0..n {
            let src_x = crop.x + (x as f32 + 0.5) * step - 0.5;
            let v = resample::sample_bilinear(&frame.data, w, h, src_x, src_y);
            for c in 0..3 {
                match config.layout {
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                }
            }
        }
    }
    tensor
}

fn decode(values: &[f32], crop: &Crop) -> Result<LandmarkSet, LandmarkError> {
    let expected = LANDMARK_COUNT * 2;
    if values.len() != expected {
        return Err(LandmarkError::InvalidOutput {
            expected,
            actual: values.len(),
        });
    }
    let points = values
        .chunks_exact(2)
        .map(|uv| crop.to_frame(uv[0], uv[1]))
        .collect();
    LandmarkSet::new(points).ok_or(LandmarkError::InvalidOutput {
        expected,
        actual: values.len(),
    })
}
