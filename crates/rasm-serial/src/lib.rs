//! rasm-serial — Serial link to the controller board.
//!
//! Provides a raw termios port, a line-oriented request/response session
//! with a bounded read, an interactive console loop, and the servo
//! command framing understood by the board firmware.

pub mod command;
pub mod console;
pub mod port;
pub mod session;

pub use command::{Axis, ServoCommand, ServoMixer};
pub use port::{SerialError, TtyPort};
pub use session::{Reply, SerialSession, SessionConfig};
