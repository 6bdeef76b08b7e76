//! rasm-hw — Hardware abstraction for camera capture.
//!
//! Opens V4L2 cameras by index, negotiates a format we can convert,
//! and hands out 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameStream, PixelFormat, DEFAULT_CAMERA_INDEX};
pub use frame::{Frame, FrameError};
