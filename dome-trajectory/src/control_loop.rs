//! Target-following state and the follow step.
//!
//! [`ControlLoop`] owns everything the follow step reads and writes: the latest
//! target, the tracked dome azimuth and the delivery-failure count. The
//! controller passes it by exclusive reference, so a move command and the
//! tracked azimuth update always happen together.
//!
//! Dome reports of its commanded state lag behind our own commands. A report
//! stamped before the last delivered move, or echoing a move that a newer one
//! has already replaced, is dropped so it cannot roll the tracked azimuth back.

use std::collections::VecDeque;

use dome_proto::{
    angles_almost_equal, AzimuthCommandedState, DeliveryError, DomeCommandSink, DomePosition,
    MoveAzimuth, TelescopeTarget, Timestamp,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::algorithm::{MoveDecision, TrajectoryAlgorithm};

/// Delivered moves whose echo we still wait for.
const MAX_PENDING_ECHOES: usize = 16;

/// Echoed azimuths within this of a delivered move count as its echo.
const ECHO_TOLERANCE: f64 = 1e-9;

/// Result of one follow pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowOutcome {
    /// Not enabled; the target was only recorded.
    Inactive,
    /// Target had a non-finite coordinate and was dropped.
    Rejected,
    /// Target matches the previous one; nothing re-decided.
    Duplicate,
    /// No target received yet.
    Idle,
    /// Within the hysteresis band.
    Holding,
    /// Move command delivered.
    Moved(f64),
    /// Move command could not be delivered.
    DeliveryFailed {
        azimuth: f64,
        error: DeliveryError,
        /// Consecutive failures including this one
        consecutive: u32,
    },
}

/// Mutable follow state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlLoop {
    target: Option<TelescopeTarget>,
    dome_cmd_az: Option<f64>,
    dome_position: Option<DomePosition>,
    commands_issued: u64,
    consecutive_failures: u32,
    last_command_at: Option<Timestamp>,
    #[serde(skip)]
    pending_echoes: VecDeque<f64>,
}

impl ControlLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest telescope target.
    pub fn target(&self) -> Option<&TelescopeTarget> {
        self.target.as_ref()
    }

    /// Azimuth the dome was last commanded to, if known.
    pub fn dome_cmd_az(&self) -> Option<f64> {
        self.dome_cmd_az
    }

    /// Last dome position telemetry.
    pub fn dome_position(&self) -> Option<&DomePosition> {
        self.dome_position.as_ref()
    }

    pub fn commands_issued(&self) -> u64 {
        self.commands_issued
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// When the last move was delivered.
    pub fn last_command_at(&self) -> Option<Timestamp> {
        self.last_command_at
    }

    /// Record a new target.
    ///
    /// Returns false if it points where the previous target did.
    pub fn record_target(&mut self, target: TelescopeTarget) -> bool {
        let changed = !self
            .target
            .as_ref()
            .is_some_and(|prev| prev.same_position(&target));
        self.target = Some(target);
        changed
    }

    /// Take the dome's own report of its commanded azimuth.
    ///
    /// Returns false if the report was stale or unusable and left tracking alone.
    pub fn apply_commanded_state(&mut self, state: &AzimuthCommandedState) -> bool {
        if self
            .last_command_at
            .is_some_and(|issued| state.timestamp < issued)
        {
            debug!(
                "Ignoring dome commanded state from {:?}, before last move at {:?}",
                state.timestamp, self.last_command_at
            );
            return false;
        }

        let commanded = state.commanded_azimuth();
        match commanded {
            Some(azimuth) if !azimuth.is_finite() => {
                warn!("Ignoring non-finite dome commanded azimuth {}", azimuth);
                return false;
            }
            Some(azimuth) => {
                let echoed = self
                    .pending_echoes
                    .iter()
                    .position(|&pending| angles_almost_equal(pending, azimuth, ECHO_TOLERANCE));
                match echoed {
                    Some(index) => {
                        self.pending_echoes.drain(..=index);
                        if !self.pending_echoes.is_empty() {
                            debug!("Ignoring echo of superseded move to az={:.3}", azimuth);
                            return false;
                        }
                    }
                    None => self.pending_echoes.clear(),
                }
            }
            None => self.pending_echoes.clear(),
        }

        if commanded != self.dome_cmd_az {
            debug!(
                "Dome reports commanded azimuth {:?} (tracked {:?})",
                commanded, self.dome_cmd_az
            );
        }
        self.dome_cmd_az = commanded;
        true
    }

    /// Keep position telemetry for diagnostics.
    pub fn record_position(&mut self, position: DomePosition) {
        self.dome_position = Some(position);
    }

    /// Forget the tracked azimuth, failure count and moves awaiting an echo.
    ///
    /// Used when the controller returns to Standby so the next session starts
    /// from a cold dome.
    pub fn reset_dome(&mut self) {
        self.dome_cmd_az = None;
        self.consecutive_failures = 0;
        self.last_command_at = None;
        self.pending_echoes.clear();
    }

    /// Decide on the retained target and command the dome if needed.
    ///
    /// The tracked azimuth only changes when the command is delivered.
    pub fn follow(
        &mut self,
        algorithm: &dyn TrajectoryAlgorithm,
        sink: &mut dyn DomeCommandSink,
    ) -> FollowOutcome {
        let Some(target) = self.target else {
            return FollowOutcome::Idle;
        };

        match algorithm.decide(self.dome_cmd_az, &target) {
            MoveDecision::NoMove => FollowOutcome::Holding,
            MoveDecision::MoveTo(azimuth) => match sink.move_azimuth(MoveAzimuth::new(azimuth)) {
                Ok(()) => {
                    info!(
                        "Commanding dome to az={:.3} (was {:?}) for target az={:.3} el={:.3}",
                        azimuth, self.dome_cmd_az, target.azimuth, target.elevation
                    );
                    self.dome_cmd_az = Some(azimuth);
                    self.last_command_at = Some(Timestamp::now());
                    if self.pending_echoes.len() == MAX_PENDING_ECHOES {
                        self.pending_echoes.pop_front();
                    }
                    self.pending_echoes.push_back(azimuth);
                    self.commands_issued += 1;
                    self.consecutive_failures = 0;
                    FollowOutcome::Moved(azimuth)
                }
                Err(error) => {
                    self.consecutive_failures += 1;
                    warn!(
                        "Failed to command dome to az={:.3}: {} ({} consecutive)",
                        azimuth, error, self.consecutive_failures
                    );
                    FollowOutcome::DeliveryFailed {
                        azimuth,
                        error,
                        consecutive: self.consecutive_failures,
                    }
                }
            },
        }
    }
}
