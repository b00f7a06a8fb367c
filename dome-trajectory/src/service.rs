//! Async controller service.
//!
//! One task owns the [`Controller`] and takes work from two queues: operator
//! commands, always drained first, and telemetry (targets and dome status).
//! Everything the controller does therefore happens one message at a time, in
//! arrival order within each queue, and an `exitControl` is never stuck behind
//! a backlog of targets.

use std::path::PathBuf;

use dome_proto::{DomeCommandSink, DomeStatus, TelescopeTarget};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config_storage::ConfigStorage;
use crate::controller::{
    Controller, ControllerEvent, ControllerSnapshot, LifecycleCommand, SummaryState,
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_DELIVERY_FAILURES,
};
use crate::error::CommandError;

/// Runtime settings for a controller service.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Configuration directory; `None` uses [`ConfigStorage::new`]
    pub config_dir: Option<PathBuf>,
    /// State to walk to on startup: Offline, Standby, Disabled or Enabled
    pub initial_state: SummaryState,
    /// Selector used when `initial_state` is Disabled or Enabled
    pub initial_selector: String,
    /// Consecutive delivery failures that force Fault
    pub max_delivery_failures: u32,
    /// Notification channel capacity
    pub event_capacity: usize,
    /// Command and telemetry queue capacity
    pub request_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            config_dir: None,
            initial_state: SummaryState::Standby,
            initial_selector: String::new(),
            max_delivery_failures: DEFAULT_MAX_DELIVERY_FAILURES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            request_capacity: 32,
        }
    }
}

impl ControllerSettings {
    pub fn storage(&self) -> ConfigStorage {
        match &self.config_dir {
            Some(dir) => ConfigStorage::with_path(dir.clone()),
            None => ConfigStorage::default(),
        }
    }

    /// Build an Offline controller commanding `sink`.
    pub fn build_controller(&self, sink: Box<dyn DomeCommandSink>) -> Controller {
        Controller::new(self.storage(), sink)
            .with_max_delivery_failures(self.max_delivery_failures)
            .with_event_capacity(self.event_capacity)
    }
}

struct Request {
    command: LifecycleCommand,
    reply: oneshot::Sender<Result<(), CommandError>>,
}

enum Telemetry {
    Target(TelescopeTarget),
    Dome(DomeStatus),
    Snapshot(oneshot::Sender<ControllerSnapshot>),
}

/// Walk a fresh controller to `state` through the standard transitions.
pub fn walk_to(
    controller: &mut Controller,
    state: SummaryState,
    selector: &str,
) -> Result<(), CommandError> {
    match state {
        SummaryState::Offline => Ok(()),
        SummaryState::Standby => controller.initialize(),
        SummaryState::Disabled => {
            controller.initialize()?;
            controller.start(selector)
        }
        SummaryState::Enabled => {
            controller.initialize()?;
            controller.start(selector)?;
            controller.enable()
        }
        SummaryState::Fault => Err(CommandError::InvariantViolation(
            "cannot start in Fault".to_string(),
        )),
    }
}

/// Run `controller` on its own task.
///
/// The controller is first walked to `settings.initial_state`; subscribe with
/// [`Controller::subscribe`] before calling this to see those notifications.
pub fn spawn(
    mut controller: Controller,
    settings: &ControllerSettings,
) -> Result<(ControllerHandle, JoinHandle<()>), CommandError> {
    walk_to(
        &mut controller,
        settings.initial_state,
        &settings.initial_selector,
    )?;

    let capacity = settings.request_capacity.max(1);
    let (request_tx, request_rx) = mpsc::channel(capacity);
    let (telemetry_tx, telemetry_rx) = mpsc::channel(capacity);
    let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());

    let handle = ControllerHandle {
        requests: request_tx,
        telemetry: telemetry_tx,
        snapshot: snapshot_rx,
        events: controller.event_sender(),
    };
    let task = tokio::spawn(run(controller, request_rx, telemetry_rx, snapshot_tx));
    Ok((handle, task))
}

async fn run(
    mut controller: Controller,
    mut requests: mpsc::Receiver<Request>,
    mut telemetry: mpsc::Receiver<Telemetry>,
    snapshot: watch::Sender<ControllerSnapshot>,
) {
    info!(
        "Controller service started in state {}",
        controller.summary_state()
    );

    loop {
        tokio::select! {
            biased;

            request = requests.recv() => {
                let Some(Request { command, reply }) = request else {
                    break;
                };
                debug!("Operator command {}", command);
                let result = controller.handle_command(command);
                snapshot.send_replace(controller.snapshot());
                // Caller may have given up waiting.
                let _ = reply.send(result);
            }

            message = telemetry.recv() => {
                match message {
                    Some(Telemetry::Target(target)) => {
                        controller.update_target(target);
                        snapshot.send_replace(controller.snapshot());
                    }
                    Some(Telemetry::Dome(status)) => {
                        controller.update_dome_status(status);
                        snapshot.send_replace(controller.snapshot());
                    }
                    Some(Telemetry::Snapshot(reply)) => {
                        let _ = reply.send(controller.snapshot());
                    }
                    None => break,
                }
            }
        }

        if controller.is_terminated() {
            break;
        }
    }

    info!(
        "Controller service stopped in state {}",
        controller.summary_state()
    );
}

/// Cloneable handle to a running controller service.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    requests: mpsc::Sender<Request>,
    telemetry: mpsc::Sender<Telemetry>,
    snapshot: watch::Receiver<ControllerSnapshot>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ControllerHandle {
    /// Run an operator command and wait for its result.
    ///
    /// Returns [`CommandError::Offline`] once the service has stopped.
    pub async fn command(&self, command: LifecycleCommand) -> Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request { command, reply })
            .await
            .map_err(|_| CommandError::Offline)?;
        response.await.map_err(|_| CommandError::Offline)?
    }

    pub async fn start(&self, selector: impl Into<String>) -> Result<(), CommandError> {
        self.command(LifecycleCommand::Start {
            selector: selector.into(),
        })
        .await
    }

    pub async fn enable(&self) -> Result<(), CommandError> {
        self.command(LifecycleCommand::Enable).await
    }

    pub async fn disable(&self) -> Result<(), CommandError> {
        self.command(LifecycleCommand::Disable).await
    }

    pub async fn standby(&self) -> Result<(), CommandError> {
        self.command(LifecycleCommand::Standby).await
    }

    pub async fn exit_control(&self) -> Result<(), CommandError> {
        self.command(LifecycleCommand::ExitControl).await
    }

    /// Queue a telescope target.
    pub async fn send_target(&self, target: TelescopeTarget) -> Result<(), CommandError> {
        self.telemetry
            .send(Telemetry::Target(target))
            .await
            .map_err(|_| CommandError::Offline)
    }

    /// Queue a dome status report.
    pub async fn send_dome_status(&self, status: DomeStatus) -> Result<(), CommandError> {
        self.telemetry
            .send(Telemetry::Dome(status))
            .await
            .map_err(|_| CommandError::Offline)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot taken after all telemetry queued so far has been handled.
    pub async fn current_snapshot(&self) -> Result<ControllerSnapshot, CommandError> {
        let (reply, response) = oneshot::channel();
        self.telemetry
            .send(Telemetry::Snapshot(reply))
            .await
            .map_err(|_| CommandError::Offline)?;
        response.await.map_err(|_| CommandError::Offline)
    }

    /// Receiver that sees every published snapshot.
    pub fn watch_snapshot(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot.clone()
    }

    /// Receive notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// True once the service task has stopped.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// Forward a target stream into the controller until either side closes.
pub async fn forward_targets(mut targets: mpsc::Receiver<TelescopeTarget>, handle: ControllerHandle) {
    while let Some(target) = targets.recv().await {
        if handle.send_target(target).await.is_err() {
            debug!("Controller stopped, no longer forwarding targets");
            break;
        }
    }
}

/// Forward dome status reports into the controller until either side closes.
pub async fn forward_dome_status(mut statuses: mpsc::Receiver<DomeStatus>, handle: ControllerHandle) {
    while let Some(status) = statuses.recv().await {
        if handle.send_dome_status(status).await.is_err() {
            debug!("Controller stopped, no longer forwarding dome status");
            break;
        }
    }
}
