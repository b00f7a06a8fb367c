//! Lifecycle state machine for the dome trajectory controller.
//!
//! ```text
//! Offline --initialize--> Standby --start--> Disabled --enable--> Enabled
//!                            ^                  |  ^                 |
//!                            +----standby-------+  +----disable------+
//!
//! any state --exitControl--> Offline (terminal)
//! any state --invariant violation--> Fault --standby--> Standby
//! ```
//!
//! The controller owns the active algorithm, which exists only in Disabled and
//! Enabled, and the [`ControlLoop`] state, which is only evaluated in Enabled.
//! All methods take `&mut self`; serializing calls is the caller's job (see
//! [`crate::service`]).

use std::fmt;
use std::str::FromStr;

use dome_proto::{DomeCommandSink, DomePosition, DomeStatus, TelescopeTarget};
use serde::Serialize;
use strum::{Display, EnumString};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::algorithm::{AlgorithmRegistry, TrajectoryAlgorithm};
use crate::config::{validate, AlgorithmConfig};
use crate::config_storage::ConfigStorage;
use crate::control_loop::{ControlLoop, FollowOutcome};
use crate::error::CommandError;

/// Consecutive delivery failures tolerated before entering Fault.
pub const DEFAULT_MAX_DELIVERY_FAILURES: u32 = 3;

/// Capacity of the notification broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Operational lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
pub enum SummaryState {
    Offline,
    Standby,
    Disabled,
    Enabled,
    Fault,
}

/// Operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleCommand {
    /// Load and install the algorithm named by a configuration selector.
    Start { selector: String },
    Enable,
    Disable,
    /// Discard the algorithm; also recovers from Fault.
    Standby,
    /// Shut down for good.
    ExitControl,
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { .. } => write!(f, "start"),
            Self::Enable => write!(f, "enable"),
            Self::Disable => write!(f, "disable"),
            Self::Standby => write!(f, "standby"),
            Self::ExitControl => write!(f, "exitControl"),
        }
    }
}

impl FromStr for LifecycleCommand {
    type Err = String;

    /// Parse an operator line such as `start valid.yaml` or `enable`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or_else(|| "empty command".to_string())?;
        let argument = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments to {command}"));
        }

        let parsed = match command {
            "start" => Self::Start {
                selector: argument.unwrap_or_default().to_string(),
            },
            "enable" => Self::Enable,
            "disable" => Self::Disable,
            "standby" => Self::Standby,
            "exitControl" => Self::ExitControl,
            other => return Err(format!("unknown command {other:?}")),
        };

        if argument.is_some() && !matches!(parsed, Self::Start { .. }) {
            return Err(format!("{command} takes no arguments"));
        }
        Ok(parsed)
    }
}

/// Notification published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ControllerEvent {
    /// The lifecycle state changed.
    SummaryState(SummaryState),
    /// An algorithm was installed by `start`; `config` is YAML.
    Algorithm { name: String, config: String },
    DomeMoveCommanded { azimuth: f64 },
    CommandDeliveryFailed { azimuth: f64, error: String },
    FaultEntered { reason: String },
}

/// Read-only view of the controller for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub summary_state: SummaryState,
    pub algorithm: Option<AlgorithmConfig>,
    pub target: Option<TelescopeTarget>,
    pub dome_cmd_az: Option<f64>,
    pub dome_position: Option<DomePosition>,
    pub commands_issued: u64,
    pub consecutive_failures: u32,
}

/// Dome trajectory controller.
pub struct Controller {
    state: SummaryState,
    terminated: bool,
    registry: AlgorithmRegistry,
    storage: ConfigStorage,
    sink: Box<dyn DomeCommandSink>,
    algorithm: Option<Box<dyn TrajectoryAlgorithm>>,
    algorithm_config: Option<AlgorithmConfig>,
    control: ControlLoop,
    max_delivery_failures: u32,
    events: broadcast::Sender<ControllerEvent>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("terminated", &self.terminated)
            .field("algorithm", &self.algorithm)
            .field("control", &self.control)
            .field("storage", &self.storage.root_path())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create an Offline controller commanding `sink`.
    pub fn new(storage: ConfigStorage, sink: Box<dyn DomeCommandSink>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            state: SummaryState::Offline,
            terminated: false,
            registry: AlgorithmRegistry::default(),
            storage,
            sink,
            algorithm: None,
            algorithm_config: None,
            control: ControlLoop::new(),
            max_delivery_failures: DEFAULT_MAX_DELIVERY_FAILURES,
            events,
        }
    }

    /// Replace the algorithm registry.
    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Consecutive delivery failures that force Fault; at least one.
    pub fn with_max_delivery_failures(mut self, max: u32) -> Self {
        self.max_delivery_failures = max.max(1);
        self
    }

    /// Resize the notification channel. Drops existing subscriptions.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    /// Receive notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<ControllerEvent> {
        self.events.clone()
    }

    pub fn summary_state(&self) -> SummaryState {
        self.state
    }

    /// True after `exitControl`.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn control(&self) -> &ControlLoop {
        &self.control
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            summary_state: self.state,
            algorithm: self.algorithm_config.clone(),
            target: self.control.target().copied(),
            dome_cmd_az: self.control.dome_cmd_az(),
            dome_position: self.control.dome_position().copied(),
            commands_issued: self.control.commands_issued(),
            consecutive_failures: self.control.consecutive_failures(),
        }
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn transition(&mut self, new_state: SummaryState) {
        info!("Summary state {} -> {}", self.state, new_state);
        self.state = new_state;
        self.emit(ControllerEvent::SummaryState(new_state));
    }

    fn reject(&self, command: LifecycleCommand) -> CommandError {
        if self.terminated {
            return CommandError::Offline;
        }
        warn!("Rejected {} in state {}", command, self.state);
        CommandError::InvalidTransition {
            command,
            state: self.state,
        }
    }

    /// Offline to Standby.
    pub fn initialize(&mut self) -> Result<(), CommandError> {
        if self.terminated {
            return Err(CommandError::Offline);
        }
        if self.state != SummaryState::Offline {
            debug!("Already initialized, state {}", self.state);
            return Ok(());
        }
        self.transition(SummaryState::Standby);
        Ok(())
    }

    /// Dispatch an operator command.
    pub fn handle_command(&mut self, command: LifecycleCommand) -> Result<(), CommandError> {
        match command {
            LifecycleCommand::Start { selector } => self.start(&selector),
            LifecycleCommand::Enable => self.enable(),
            LifecycleCommand::Disable => self.disable(),
            LifecycleCommand::Standby => self.standby(),
            LifecycleCommand::ExitControl => self.exit_control(),
        }
    }

    /// Standby to Disabled, installing the algorithm `selector` names.
    ///
    /// On any configuration error the state stays Standby.
    pub fn start(&mut self, selector: &str) -> Result<(), CommandError> {
        if self.state != SummaryState::Standby || self.terminated {
            return Err(self.reject(LifecycleCommand::Start {
                selector: selector.to_string(),
            }));
        }

        let (config, algorithm) = match self.load_algorithm(selector) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("start({:?}) failed: {}", selector, e);
                return Err(e.into());
            }
        };

        info!(
            "Installed algorithm {:?} from {:?}: {:?}",
            config.name, selector, algorithm
        );
        let parameters = match config.parameters_yaml() {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!("start({:?}) failed: {}", selector, e);
                return Err(e.into());
            }
        };
        self.emit(ControllerEvent::Algorithm {
            name: config.name.clone(),
            config: parameters,
        });
        self.algorithm = Some(algorithm);
        self.algorithm_config = Some(config);
        self.transition(SummaryState::Disabled);
        Ok(())
    }

    fn load_algorithm(
        &self,
        selector: &str,
    ) -> Result<(AlgorithmConfig, Box<dyn TrajectoryAlgorithm>), crate::error::ConfigurationError>
    {
        let document = self.storage.load(selector)?;
        let config = validate(&self.registry, &document)?;
        let algorithm = config.instantiate(&self.registry)?;
        Ok((config, algorithm))
    }

    /// Disabled to Enabled; the retained target is evaluated right away.
    pub fn enable(&mut self) -> Result<(), CommandError> {
        if self.state != SummaryState::Disabled || self.terminated {
            return Err(self.reject(LifecycleCommand::Enable));
        }
        if self.algorithm.is_none() {
            let reason = "enable with no algorithm installed".to_string();
            self.enter_fault(reason.clone());
            return Err(CommandError::InvariantViolation(reason));
        }

        self.transition(SummaryState::Enabled);
        self.follow();
        Ok(())
    }

    /// Enabled to Disabled. Target and dome tracking are kept.
    pub fn disable(&mut self) -> Result<(), CommandError> {
        if self.state != SummaryState::Enabled || self.terminated {
            return Err(self.reject(LifecycleCommand::Disable));
        }
        self.transition(SummaryState::Disabled);
        Ok(())
    }

    /// Disabled or Fault to Standby, discarding the algorithm.
    pub fn standby(&mut self) -> Result<(), CommandError> {
        if !matches!(self.state, SummaryState::Disabled | SummaryState::Fault) || self.terminated {
            return Err(self.reject(LifecycleCommand::Standby));
        }
        self.algorithm = None;
        self.algorithm_config = None;
        self.control.reset_dome();
        self.transition(SummaryState::Standby);
        Ok(())
    }

    /// Any state to Offline. Terminal.
    pub fn exit_control(&mut self) -> Result<(), CommandError> {
        if self.terminated {
            return Err(CommandError::Offline);
        }
        self.algorithm = None;
        self.algorithm_config = None;
        self.terminated = true;
        self.transition(SummaryState::Offline);
        Ok(())
    }

    /// Force Fault. Recovery is an explicit `standby`.
    pub fn enter_fault(&mut self, reason: String) {
        if self.terminated || self.state == SummaryState::Fault {
            return;
        }
        error!("Entering Fault from {}: {}", self.state, reason);
        self.algorithm = None;
        self.algorithm_config = None;
        self.emit(ControllerEvent::FaultEntered { reason });
        self.transition(SummaryState::Fault);
    }

    /// Take a telescope target.
    ///
    /// Recorded in every live state; evaluated only when Enabled. Targets with a
    /// non-finite coordinate are dropped without touching the retained one.
    pub fn update_target(&mut self, target: TelescopeTarget) -> FollowOutcome {
        if self.terminated {
            return FollowOutcome::Inactive;
        }
        if !target.azimuth.is_finite() || !target.elevation.is_finite() {
            warn!(
                "Ignoring target with non-finite position az={} el={}",
                target.azimuth, target.elevation
            );
            return FollowOutcome::Rejected;
        }
        let changed = self.control.record_target(target);
        if self.state != SummaryState::Enabled {
            return FollowOutcome::Inactive;
        }
        if !changed {
            return FollowOutcome::Duplicate;
        }
        self.follow()
    }

    /// Take a dome status report.
    pub fn update_dome_status(&mut self, status: DomeStatus) {
        if self.terminated {
            return;
        }
        match status {
            DomeStatus::CommandedState(commanded) => {
                let applied = self.control.apply_commanded_state(&commanded);
                if applied && self.state == SummaryState::Enabled {
                    self.follow();
                }
            }
            DomeStatus::Position(position) => self.control.record_position(position),
        }
    }

    fn follow(&mut self) -> FollowOutcome {
        let Some(algorithm) = self.algorithm.as_deref() else {
            self.enter_fault(format!("no algorithm installed in state {}", self.state));
            return FollowOutcome::Inactive;
        };

        let outcome = self.control.follow(algorithm, self.sink.as_mut());
        match &outcome {
            FollowOutcome::Moved(azimuth) => {
                self.emit(ControllerEvent::DomeMoveCommanded { azimuth: *azimuth });
            }
            FollowOutcome::DeliveryFailed {
                azimuth,
                error,
                consecutive,
            } => {
                self.emit(ControllerEvent::CommandDeliveryFailed {
                    azimuth: *azimuth,
                    error: error.to_string(),
                });
                if *consecutive >= self.max_delivery_failures {
                    self.enter_fault(format!(
                        "{consecutive} consecutive dome command failures, last: {error}"
                    ));
                }
            }
            _ => {}
        }
        outcome
    }
}
