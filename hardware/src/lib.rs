//! Dome-side collaborators for the dome trajectory controller.
//!
//! Real dome and mount links are out of scope; this crate provides stand-ins
//! that speak the [`dome_proto`] types:
//!
//! - [`fake_dome::FakeDome`] - simulated azimuth axis that slews toward commanded
//!   positions and reports commanded-state events and position telemetry
//! - [`mock_dome::MockDome`] - in-memory command sink that records every command
//!   and can be told to fail
//! - [`pointing::SimulatedPointing`] - telescope target generator that drifts and
//!   periodically slews to a random position

pub mod fake_dome;
pub mod mock_dome;
pub mod pointing;

pub use fake_dome::{FakeDome, FakeDomeConfig, FakeDomeLink};
pub use mock_dome::MockDome;
pub use pointing::{PointingConfig, SimulatedPointing};
