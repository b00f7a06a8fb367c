#![doc = include_str!("../README.md")]

pub mod angle;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use angle::{angle_diff, angles_almost_equal, wrap_azimuth};

/// Timestamp in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create timestamp from microseconds.
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Get timestamp as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Current wall-clock time.
    ///
    /// A clock set before 1970 reads as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self(micros)
    }
}

/// Telescope pointing target as published by the mount.
///
/// Only the latest target matters; each update supersedes the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelescopeTarget {
    /// Target azimuth in degrees
    pub azimuth: f64,
    /// Target elevation in degrees
    pub elevation: f64,
    /// Time the mount published the target
    pub timestamp: Timestamp,
}

impl TelescopeTarget {
    /// Create a new target stamped with the current time.
    pub fn new(azimuth: f64, elevation: f64) -> Self {
        Self::with_timestamp(azimuth, elevation, Timestamp::now())
    }

    /// Create a new target with an explicit timestamp.
    pub fn with_timestamp(azimuth: f64, elevation: f64, timestamp: Timestamp) -> Self {
        Self {
            azimuth,
            elevation,
            timestamp,
        }
    }

    /// True if both targets point at the same azimuth and elevation.
    ///
    /// Timestamps are ignored, so a re-published target compares equal.
    pub fn same_position(&self, other: &TelescopeTarget) -> bool {
        self.azimuth == other.azimuth && self.elevation == other.elevation
    }
}

/// What the dome was last told to do with its azimuth axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomeCommandedState {
    /// No move commanded since startup or reconnect
    Unknown,
    /// Moving to (or holding at) a commanded azimuth
    GoToPosition,
}

/// Commanded azimuth state event reported by the dome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AzimuthCommandedState {
    pub commanded_state: DomeCommandedState,
    /// Commanded azimuth in degrees; `None` unless `commanded_state` is `GoToPosition`
    pub azimuth: Option<f64>,
    pub timestamp: Timestamp,
}

impl AzimuthCommandedState {
    /// Event reporting that no azimuth has been commanded.
    pub fn unknown() -> Self {
        Self {
            commanded_state: DomeCommandedState::Unknown,
            azimuth: None,
            timestamp: Timestamp::now(),
        }
    }

    /// Event reporting a commanded azimuth.
    pub fn go_to_position(azimuth: f64) -> Self {
        Self {
            commanded_state: DomeCommandedState::GoToPosition,
            azimuth: Some(azimuth),
            timestamp: Timestamp::now(),
        }
    }

    /// The commanded azimuth, if the dome is going to a position.
    pub fn commanded_azimuth(&self) -> Option<f64> {
        match self.commanded_state {
            DomeCommandedState::GoToPosition => self.azimuth,
            DomeCommandedState::Unknown => None,
        }
    }
}

/// Dome azimuth position telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomePosition {
    /// Measured azimuth in degrees
    pub azimuth_position: f64,
    /// Azimuth setpoint in degrees
    pub azimuth_position_set: f64,
    pub timestamp: Timestamp,
}

/// Anything the dome reports back to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DomeStatus {
    CommandedState(AzimuthCommandedState),
    Position(DomePosition),
}

/// Command to move the dome to an absolute azimuth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveAzimuth {
    /// Desired azimuth in degrees
    pub azimuth: f64,
}

impl MoveAzimuth {
    pub fn new(azimuth: f64) -> Self {
        Self { azimuth }
    }
}

/// Failure to hand a command to the dome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Command queue is full; the dome is not keeping up.
    #[error("dome command queue is full")]
    Full,

    /// The dome side of the link has gone away.
    #[error("dome command link is closed")]
    Closed,

    /// The dome refused the command.
    #[error("dome rejected command: {0}")]
    Rejected(String),
}

/// Interface for commanding the dome azimuth axis.
///
/// Implementations must not block for long: the controller calls this from its
/// single control loop and a slow sink would stall target tracking. Retry policy,
/// if any, belongs to the implementation.
pub trait DomeCommandSink: Send {
    /// Send a move command to the dome.
    fn move_azimuth(&mut self, command: MoveAzimuth) -> Result<(), DeliveryError>;
}

impl<T: DomeCommandSink + ?Sized> DomeCommandSink for Box<T> {
    fn move_azimuth(&mut self, command: MoveAzimuth) -> Result<(), DeliveryError> {
        (**self).move_azimuth(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip() {
        let ts = Timestamp::from_micros(1_704_067_200_000_000);
        assert_eq!(ts.as_micros(), 1_704_067_200_000_000);
        assert!(Timestamp::now() > ts);
    }

    #[test]
    fn test_same_position_ignores_timestamp() {
        let a = TelescopeTarget::with_timestamp(10.0, 45.0, Timestamp(1));
        let b = TelescopeTarget::with_timestamp(10.0, 45.0, Timestamp(2));
        let c = TelescopeTarget::with_timestamp(10.5, 45.0, Timestamp(2));
        assert!(a.same_position(&b));
        assert!(!a.same_position(&c));
    }

    #[test]
    fn test_commanded_azimuth() {
        assert_eq!(AzimuthCommandedState::unknown().commanded_azimuth(), None);
        assert_eq!(
            AzimuthCommandedState::go_to_position(123.0).commanded_azimuth(),
            Some(123.0)
        );

        // An azimuth attached to an Unknown state is ignored
        let odd = AzimuthCommandedState {
            commanded_state: DomeCommandedState::Unknown,
            azimuth: Some(5.0),
            timestamp: Timestamp(0),
        };
        assert_eq!(odd.commanded_azimuth(), None);
    }

    #[test]
    fn test_dome_status_serializes() {
        let status = DomeStatus::CommandedState(AzimuthCommandedState {
            commanded_state: DomeCommandedState::GoToPosition,
            azimuth: Some(42.0),
            timestamp: Timestamp(7),
        });
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("GoToPosition"));
        let back: DomeStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    struct CountingSink(usize);

    impl DomeCommandSink for CountingSink {
        fn move_azimuth(&mut self, _command: MoveAzimuth) -> Result<(), DeliveryError> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let mut sink: Box<CountingSink> = Box::new(CountingSink(0));
        sink.move_azimuth(MoveAzimuth::new(1.0)).unwrap();
        sink.move_azimuth(MoveAzimuth::new(2.0)).unwrap();
        assert_eq!(sink.0, 2);
    }
}
