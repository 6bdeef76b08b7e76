//! Servo command framing for the controller board.
//!
//! Each command is a one-character axis prefix, a sign-prefixed
//! zero-padded integer of at least three characters, and a NUL
//! terminator: `#+05\0`, `$-12\0`.

use std::fmt;
use std::time::{Duration, Instant};

/// Roll values under this magnitude (degrees) are treated as level.
pub const ROLL_DEADBAND_DEG: f64 = 5.0;
/// Vertical offsets at or under this magnitude (inches) are treated as centered.
pub const VERTICAL_DEADBAND_IN: f64 = 3.0;
/// How long an axis stays at zero after it was last still.
pub const DEBOUNCE: Duration = Duration::from_secs(1);
/// Output units per input unit; the sign flips to mirror the viewer.
pub const COMMAND_GAIN: f64 = -2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Head roll, prefix `#`.
    Roll,
    /// Vertical offset, prefix `$`.
    Vertical,
}

impl Axis {
    pub fn prefix(self) -> char {
        match self {
            Axis::Roll => '#',
            Axis::Vertical => '$',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCommand {
    pub axis: Axis,
    pub value: i32,
}

impl ServoCommand {
    /// Scale a measurement into a command; truncates toward zero.
    pub fn from_measurement(axis: Axis, measurement: f64) -> Self {
        Self {
            axis,
            value: (measurement * COMMAND_GAIN) as i32,
        }
    }

    /// Wire bytes, NUL-terminated.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(0);
        bytes
    }
}

impl fmt::Display for ServoCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:+03}", self.axis.prefix(), self.value)
    }
}

/// Zeroes small values and holds zero briefly after the value settles,
/// so a head hovering near level does not chatter the servos.
#[derive(Debug, Clone)]
pub struct Deadband {
    threshold: f64,
    inclusive: bool,
    hold: Duration,
    still: bool,
    last_still: Option<Instant>,
}

impl Deadband {
    /// Values with `|v| < threshold` are zeroed.
    pub fn new(threshold: f64, hold: Duration) -> Self {
        Self {
            threshold,
            inclusive: false,
            hold,
            still: false,
            last_still: None,
        }
    }

    /// Values with `|v| <= threshold` are zeroed.
    pub fn inclusive(mut self) -> Self {
        self.inclusive = true;
        self
    }

    pub fn apply(&mut self, value: f64, now: Instant) -> f64 {
        if self.still {
            self.last_still = Some(now);
        }

        let magnitude = value.abs();
        self.still = if self.inclusive {
            magnitude <= self.threshold
        } else {
            magnitude < self.threshold
        };

        let held = self.last_still.is_some_and(|t| now < t + self.hold);
        if self.still || held {
            0.0
        } else {
            value
        }
    }
}

/// Turns per-frame head measurements into the two servo commands.
#[derive(Debug, Clone)]
pub struct ServoMixer {
    roll: Deadband,
    vertical: Deadband,
}

impl Default for ServoMixer {
    fn default() -> Self {
        Self {
            roll: Deadband::new(ROLL_DEADBAND_DEG, DEBOUNCE),
            vertical: Deadband::new(VERTICAL_DEADBAND_IN, DEBOUNCE).inclusive(),
        }
    }
}

impl ServoMixer {
    /// `roll_deg` in degrees, `vertical_in` in inches.
    pub fn commands(&mut self, roll_deg: f64, vertical_in: f64, now: Instant) -> [ServoCommand; 2] {
        let roll = self.roll.apply(roll_deg, now);
        let vertical = self.vertical.apply(vertical_in, now);
        [
            ServoCommand::from_measurement(Axis::Roll, roll),
            ServoCommand::from_measurement(Axis::Vertical, vertical),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_padding_and_sign() {
        let cmd = ServoCommand { axis: Axis::Roll, value: 5 };
        assert_eq!(cmd.encode(), b"#+05\0");

        let cmd = ServoCommand { axis: Axis::Vertical, value: -12 };
        assert_eq!(cmd.encode(), b"$-12\0");

        let cmd = ServoCommand { axis: Axis::Roll, value: 0 };
        assert_eq!(cmd.to_string(), "#+00");

        let cmd = ServoCommand { axis: Axis::Roll, value: 130 };
        assert_eq!(cmd.to_string(), "#+130");
    }

    #[test]
    fn test_from_measurement_truncates() {
        assert_eq!(ServoCommand::from_measurement(Axis::Roll, 7.9).value, -15);
        assert_eq!(ServoCommand::from_measurement(Axis::Roll, -7.9).value, 15);
    }

    #[test]
    fn test_deadband_zeroes_small_values() {
        let now = Instant::now();
        let mut band = Deadband::new(5.0, Duration::ZERO);
        assert_eq!(band.apply(4.9, now), 0.0);
        assert_eq!(band.apply(5.0, now), 5.0);
    }

    #[test]
    fn test_deadband_inclusive_edge() {
        let now = Instant::now();
        let mut band = Deadband::new(3.0, Duration::ZERO).inclusive();
        assert_eq!(band.apply(3.0, now), 0.0);
        assert_eq!(band.apply(-3.1, now), -3.1);
    }

    #[test]
    fn test_deadband_holds_after_still() {
        let t0 = Instant::now();
        let mut band = Deadband::new(5.0, Duration::from_secs(1));

        // Still frame: zeroed, and the next frame records the still time.
        assert_eq!(band.apply(1.0, t0), 0.0);
        let t1 = t0 + Duration::from_millis(100);
        assert_eq!(band.apply(20.0, t1), 0.0);

        // Within the hold window of t1.
        let t2 = t1 + Duration::from_millis(500);
        assert_eq!(band.apply(20.0, t2), 0.0);

        // Past the hold window.
        let t3 = t1 + Duration::from_millis(1500);
        assert_eq!(band.apply(20.0, t3), 20.0);
    }

    #[test]
    fn test_deadband_passes_through_when_never_still() {
        let t0 = Instant::now();
        let mut band = Deadband::new(5.0, Duration::from_secs(1));
        assert_eq!(band.apply(12.0, t0), 12.0);
        assert_eq!(band.apply(-9.0, t0 + Duration::from_millis(10)), -9.0);
    }

    #[test]
    fn test_mixer_commands() {
        let mut mixer = ServoMixer::default();
        let [roll, vertical] = mixer.commands(10.0, -4.0, Instant::now());
        assert_eq!(roll.encode(), b"#-20\0");
        assert_eq!(vertical.encode(), b"$+08\0");
    }
}
