//! Choosing which detected face to track.

use crate::types::FaceBox;

/// Picks one face per frame.
///
/// Unlocked, the winner maximises
/// `center_weight * centeredness + proximal_weight * proximity`, where
/// centeredness is 1 at the frame centre and 0 at a corner, and proximity is
/// 1 for a box covering half the frame. Locked, the winner is the box whose
/// edges moved least since the previous pick. Ties keep the earliest box.
#[derive(Debug, Clone)]
pub struct FaceSelector {
    pub center_weight: f32,
    pub proximal_weight: f32,
    locked: bool,
    last: Option<FaceBox>,
}

impl Default for FaceSelector {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl FaceSelector {
    pub fn new(center_weight: f32, proximal_weight: f32) -> Self {
        Self {
            center_weight,
            proximal_weight,
            locked: false,
            last: None,
        }
    }

    /// Follow the previously selected face instead of re-scoring.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn last_selected(&self) -> Option<&FaceBox> {
        self.last.as_ref()
    }

    /// Select a face and remember it. Returns the index into `faces`.
    pub fn select(&mut self, faces: &[FaceBox], frame_width: u32, frame_height: u32) -> Option<usize> {
        let index = match (faces.len(), self.locked, &self.last) {
            (0, _, _) => None,
            (1, _, _) => Some(0),
            (_, true, Some(last)) => closest_to(faces, last),
            _ => self.best_scoring(faces, frame_width, frame_height),
        }?;
        self.last = Some(faces[index].clone());
        tracing::trace!(index, locked = self.locked, "selected face");
        Some(index)
    }

    pub fn score(&self, face: &FaceBox, frame_width: u32, frame_height: u32) -> f32 {
        let cx = frame_width as f32 / 2.0;
        let cy = frame_height as f32 / 2.0;
        if cx <= 0.0 || cy <= 0.0 {
            return 0.0;
        }
        let (fx, fy) = face.center();
        let centeredness = 1.0 - 0.5 * ((cx - fx).abs() / cx + (cy - fy).abs() / cy);
        let proximity = (face.area() / (2.0 * cx * cy)).sqrt();
        self.center_weight * centeredness + self.proximal_weight * proximity
    }

    fn best_scoring(&self, faces: &[FaceBox], frame_width: u32, frame_height: u32) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, face) in faces.iter().enumerate() {
            let s = self.score(face, frame_width, frame_height);
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((i, s));
            }
        }
        best.map(|(i, _)| i)
    }
}

fn closest_to(faces: &[FaceBox], last: &FaceBox) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, face) in faces.iter().enumerate() {
        let d = face.edge_distance(last);
        if best.map_or(true, |(_, b)| d < b) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}
