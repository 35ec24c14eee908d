use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

use super::error::SessionError;
use super::state::BrokerRole;
use super::state::SessionSnapshot;
use super::state::SessionState;
use super::transport::Transport;
use super::transport::TransportError;
use super::transport::TransportEvent;
use crate::config::BrokerConfig;
use crate::config::DebounceConfig;
use crate::config::MqttConfig;
use crate::debounce::CommandDebouncer;
use crate::debounce::EchoVerdict;
use crate::debounce::SendVerdict;
use crate::devices::DeviceKey;
use crate::devices::DeviceStore;
use crate::event_log::EventLog;
use crate::event_log::LogCategory;

/// What happened to a command handed to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishOutcome {
    /// Handed to the transport
    Sent,
    /// Dropped as a repeat of a command still in flight
    Debounced,
}

/// A scheduled reconnect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectTimer {
    pub deadline: tokio::time::Instant,
    /// Broker the attempt starts with
    pub target: BrokerRole,
}

/// Owner of the MQTT connection and everything fed by it
///
/// All state changes go through `&mut self`; the controller is driven by a
/// single task (see [`SessionController::spawn`]), so nothing here needs
/// locking. Reconnect and failover delays are fixed per broker, not
/// exponential.
pub struct SessionController<T: Transport> {
    pub(super) transport: T,
    config: MqttConfig,
    client_id: String,
    state: SessionState,
    broker: Option<BrokerRole>,
    pub(super) reconnect: Option<ReconnectTimer>,
    debouncer: CommandDebouncer,
    devices: DeviceStore,
    log: EventLog,
    /// Set once the controller runs in its own task
    pub(super) snapshots: Option<watch::Sender<Arc<SessionSnapshot>>>,
}

impl<T: Transport> SessionController<T> {
    pub fn new(transport: T, config: &MqttConfig, debounce: &DebounceConfig) -> Self {
        let client_id = format!("{}_{:08x}", config.client_id_prefix, rand::random::<u32>());
        Self {
            transport,
            config: config.clone(),
            client_id,
            state: SessionState::Disconnected,
            broker: None,
            reconnect: None,
            debouncer: CommandDebouncer::new(debounce),
            devices: DeviceStore::new(&config.namespace),
            log: EventLog::new(),
            snapshots: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn broker(&self) -> Option<BrokerRole> {
        self.broker
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn pending_reconnect(&self) -> Option<ReconnectTimer> {
        self.reconnect
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            broker: self.broker,
            client_id: self.client_id.clone(),
            devices: self.devices.devices().clone(),
            sensors: self.devices.sensors().clone(),
            log: self.log.to_vec(),
        }
    }

    /// Start a connection cycle on the primary broker
    ///
    /// Does nothing while a connection exists or is being established.
    pub async fn connect(&mut self) {
        if self.state.is_active() {
            debug!("Connect requested while {}, ignoring", self.state);
            return;
        }
        self.run_cycle(BrokerRole::Primary).await;
    }

    /// Close the connection. Only valid while connected.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            warn!("Disconnect requested while {}", self.state);
            return Err(SessionError::NotConnected);
        }

        self.transport.disconnect().await;
        self.reconnect = None;
        let role = self.broker.unwrap_or(BrokerRole::Primary);
        self.enter(
            SessionState::Disconnected,
            role,
            format!("Disconnected from MQTT broker {}", self.describe(role)),
        );
        Ok(())
    }

    /// Publish a command, subject to debouncing
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
    ) -> Result<PublishOutcome, SessionError> {
        if self.state != SessionState::Connected {
            self.log.append(
                format!("Command not sent, not connected: {}: {}", topic, payload),
                LogCategory::System,
            );
            return Err(SessionError::NotConnected);
        }

        if self.debouncer.before_send(topic, payload, Instant::now()) == SendVerdict::Suppress {
            self.log.append(
                format!("Command debounced: {}: {}", topic, payload),
                LogCategory::System,
            );
            return Ok(PublishOutcome::Debounced);
        }

        match self.transport.publish(topic, payload, false).await {
            Ok(()) => {
                self.log
                    .append(format!("{}: {}", topic, payload), LogCategory::Sent);
                Ok(PublishOutcome::Sent)
            }
            Err(e) => {
                // The command never left, so a retry must not be debounced
                self.debouncer.forget(topic);
                self.log.append(
                    format!("Publish to {} failed: {}", topic, e),
                    LogCategory::System,
                );
                Err(SessionError::Publish(e.to_string()))
            }
        }
    }

    /// Send a command to a device from the static table
    pub async fn send_command(
        &mut self,
        device: DeviceKey,
        payload: &str,
    ) -> Result<PublishOutcome, SessionError> {
        if !device.kind().accepts(payload) {
            self.log.append(
                format!("Rejected command {} for {}", payload, device),
                LogCategory::System,
            );
            return Err(SessionError::InvalidCommand {
                device,
                payload: payload.to_string(),
            });
        }

        let topic = device.command_topic(&self.config.namespace);
        self.publish(&topic, payload).await
    }

    /// React to something the transport reported
    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { topic, payload } => self.on_message(&topic, &payload),
            TransportEvent::ConnectionLost { reason } => self.on_connection_lost(&reason),
            TransportEvent::SubscribeFailed { reason } => {
                self.log
                    .append(format!("Subscription failed: {}", reason), LogCategory::System);
            }
        }
    }

    /// Run the scheduled reconnect, if it is still wanted
    ///
    /// The session may have been reconnected by hand since the timer was
    /// set, so the current state decides, not the state at scheduling time.
    pub async fn on_reconnect_timer(&mut self) {
        let timer = match self.reconnect.take() {
            Some(timer) => timer,
            None => return,
        };

        if self.state.is_active() {
            debug!(
                "Reconnect to {} skipped, session is already {}",
                timer.target, self.state
            );
            return;
        }

        self.run_cycle(timer.target).await;
    }

    fn on_message(&mut self, topic: &str, payload: &str) {
        match self
            .debouncer
            .on_inbound_status(topic, payload, Instant::now())
        {
            EchoVerdict::Accept => {
                self.log
                    .append(format!("{}: {}", topic, payload), LogCategory::Received);
            }
            EchoVerdict::Ignore => {
                debug!("Echo of own command on {}: {}", topic, payload);
            }
        }

        // Echo or not, the status is the device's confirmed state
        if let Some(change) = self.devices.apply_status(topic, payload) {
            debug!("State updated: {:?}", change);
        }
    }

    fn on_connection_lost(&mut self, reason: &str) {
        if self.state != SessionState::Connected {
            debug!("Connection loss reported while {}, ignoring", self.state);
            return;
        }

        let lost = self.broker.unwrap_or(BrokerRole::Primary);
        let target = self.failover_target(lost);
        let delay = self.broker_config(lost).reconnect_delay();
        self.schedule_reconnect(target, delay);
        self.enter(
            SessionState::ConnectionLost,
            lost,
            format!(
                "Connection to {} lost: {}. Reconnecting to {} in {}",
                self.describe(lost),
                reason,
                self.describe(target),
                format_delay(delay)
            ),
        );
    }

    /// One connection cycle: try `first`, fail over once to the other broker,
    /// then give up and schedule a retry
    async fn run_cycle(&mut self, first: BrokerRole) {
        let mut role = first;
        self.enter(
            SessionState::Connecting,
            role,
            format!("Connecting to MQTT broker {}", self.describe(role)),
        );

        loop {
            let result = {
                let broker = self.broker_config(role).clone();
                self.transport.connect(&broker, &self.client_id).await
            };

            match result {
                Ok(()) => {
                    self.on_connected(role).await;
                    return;
                }
                Err(TransportError::Unavailable(reason)) => {
                    // Not something a retry fixes
                    self.enter(
                        SessionState::Disconnected,
                        role,
                        format!("MQTT transport unavailable: {}", reason),
                    );
                    return;
                }
                Err(e) => {
                    let next = role.other();
                    if self.state == SessionState::Connecting && self.alternate_enabled() {
                        self.enter(
                            SessionState::FailingOver,
                            next,
                            format!(
                                "Connection to {} failed: {}. Failing over to {}",
                                self.describe(role),
                                e,
                                self.describe(next)
                            ),
                        );
                        role = next;
                        continue;
                    }

                    let target = self.failover_target(role);
                    let delay = self.broker_config(role).reconnect_delay();
                    self.schedule_reconnect(target, delay);
                    self.enter(
                        SessionState::Disconnected,
                        role,
                        format!(
                            "Connection to {} failed: {}. Retrying {} in {}",
                            self.describe(role),
                            e,
                            self.describe(target),
                            format_delay(delay)
                        ),
                    );
                    return;
                }
            }
        }
    }

    async fn on_connected(&mut self, role: BrokerRole) {
        self.enter(
            SessionState::Connected,
            role,
            format!("Connected to MQTT broker {}", self.describe(role)),
        );

        let filter = self.config.subscription_filter();
        match self.transport.subscribe(&filter).await {
            Ok(()) => {
                self.log
                    .append(format!("Subscribed to {}", filter), LogCategory::System);
            }
            Err(e) => {
                // The connection stays usable for publishing
                self.log.append(
                    format!("Subscription to {} failed: {}", filter, e),
                    LogCategory::System,
                );
            }
        }
    }

    fn enter(&mut self, state: SessionState, role: BrokerRole, message: String) {
        debug!("Session {} -> {} ({})", self.state, state, role);
        self.state = state;
        self.broker = Some(role);
        self.log.append(message, LogCategory::System);
        // Connection attempts can take a while; let observers see each step
        self.publish_snapshot();
    }

    /// Push the current snapshot to observers, if anyone is watching
    pub(super) fn publish_snapshot(&self) {
        if let Some(snapshots) = &self.snapshots {
            snapshots.send_replace(Arc::new(self.snapshot()));
        }
    }

    fn schedule_reconnect(&mut self, target: BrokerRole, delay: Duration) {
        self.reconnect = Some(ReconnectTimer {
            deadline: tokio::time::Instant::now() + delay,
            target,
        });
    }

    fn alternate_enabled(&self) -> bool {
        self.config.alternate.enabled
    }

    /// Broker to use after `failed` went away: the other one, when there is
    /// another one
    fn failover_target(&self, failed: BrokerRole) -> BrokerRole {
        if self.alternate_enabled() {
            failed.other()
        } else {
            BrokerRole::Primary
        }
    }

    fn broker_config(&self, role: BrokerRole) -> &BrokerConfig {
        match role {
            BrokerRole::Primary => &self.config.primary,
            BrokerRole::Alternate => &self.config.alternate,
        }
    }

    fn describe(&self, role: BrokerRole) -> String {
        let broker = self.broker_config(role);
        format!("{}:{}{}", broker.host, broker.port, broker.path)
    }
}

fn format_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}
