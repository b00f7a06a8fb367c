//! Dome trajectory controller.
//!
//! Keeps the dome aperture on the telescope target while commanding the dome as
//! rarely as possible. The [`controller::Controller`] owns the lifecycle and the
//! active [`algorithm::TrajectoryAlgorithm`]; [`service::spawn`] runs it on a
//! tokio task fed by operator commands, telescope targets and dome status.

pub mod algorithm;
pub mod config;
pub mod config_storage;
pub mod control_loop;
pub mod controller;
pub mod error;
pub mod service;

pub use algorithm::{AlgorithmRegistry, MoveDecision, SimpleAlgorithm, TrajectoryAlgorithm};
pub use config::{validate, AlgorithmConfig};
pub use config_storage::ConfigStorage;
pub use control_loop::{ControlLoop, FollowOutcome};
pub use controller::{Controller, ControllerEvent, ControllerSnapshot, LifecycleCommand, SummaryState};
pub use error::{CommandError, ConfigErrorKind, ConfigurationError};
pub use service::{spawn, ControllerHandle, ControllerSettings};
