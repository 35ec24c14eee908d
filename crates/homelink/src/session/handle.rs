use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::controller::PublishOutcome;
use super::controller::SessionController;
use super::error::SessionError;
use super::state::SessionSnapshot;
use super::state::SessionState;
use super::transport::Transport;
use super::transport::TransportEvent;
use crate::devices::DeviceKey;

type Reply<T> = oneshot::Sender<T>;

/// Requests from the rest of the process to the controller task
#[derive(Debug)]
enum SessionCommand {
    Connect {
        reply: Reply<SessionState>,
    },
    Disconnect {
        reply: Reply<Result<(), SessionError>>,
    },
    Publish {
        topic: String,
        payload: String,
        reply: Reply<Result<PublishOutcome, SessionError>>,
    },
    SendCommand {
        device: DeviceKey,
        payload: String,
        reply: Reply<Result<PublishOutcome, SessionError>>,
    },
    Shutdown,
}

/// What woke the controller task up
enum Wake {
    Command(Option<SessionCommand>),
    Transport(TransportEvent),
    ReconnectTimer,
}

/// Cloneable handle to a running session controller
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<Arc<SessionSnapshot>>,
}

impl SessionHandle {
    /// Start a connection cycle and report the state it ended in
    pub async fn connect(&self) -> Result<SessionState, SessionError> {
        self.request(|reply| SessionCommand::Connect { reply }).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await?
    }

    /// Publish a raw command to `topic`
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<PublishOutcome, SessionError> {
        let topic = topic.into();
        let payload = payload.into();
        self.request(|reply| SessionCommand::Publish {
            topic,
            payload,
            reply,
        })
        .await?
    }

    /// Send a command to a device by its key (e.g. "living_room_light")
    pub async fn send_command(
        &self,
        device: &str,
        payload: impl Into<String>,
    ) -> Result<PublishOutcome, SessionError> {
        let device = DeviceKey::from_str(device)
            .map_err(|_| SessionError::UnknownDevice(device.to_string()))?;
        let payload = payload.into();
        self.request(|reply| SessionCommand::SendCommand {
            device,
            payload,
            reply,
        })
        .await?
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every change the controller makes
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.snapshots.clone()
    }

    /// Ask the controller task to disconnect and stop
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(Reply<R>) -> SessionCommand,
    ) -> Result<R, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SessionError::ControllerGone)?;
        rx.await.map_err(|_| SessionError::ControllerGone)
    }
}

impl<T: Transport + 'static> SessionController<T> {
    /// Move the controller into its own task
    pub fn spawn(mut self) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(Arc::new(self.snapshot()));
        self.snapshots = Some(snapshots_tx);

        let task = tokio::spawn(self.run(commands_rx));
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        (handle, task)
    }

    /// Controller main loop
    ///
    /// Commands, transport events and the reconnect timer are handled one at
    /// a time, in arrival order. A snapshot is published after each, and on
    /// every state transition in between.
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        info!("Session controller started (client id {})", self.client_id());

        loop {
            let deadline = self.reconnect.map(|timer| timer.deadline);
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                event = self.transport.next_event() => Wake::Transport(event),
                _ = sleep_until(deadline) => Wake::ReconnectTimer,
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(SessionCommand::Shutdown)) => break,
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Transport(event) => {
                    self.handle_event(event).await;
                    self.publish_snapshot();
                }
                Wake::ReconnectTimer => {
                    self.on_reconnect_timer().await;
                    self.publish_snapshot();
                }
            }
        }

        if self.state() == SessionState::Connected {
            let _ = self.disconnect().await;
            self.publish_snapshot();
        }
        info!("Session controller stopped");
    }

    /// Execute a request, publishing the resulting snapshot before replying
    /// so the caller never reads a state older than its own request
    async fn handle_command(&mut self, command: SessionCommand) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            SessionCommand::Connect { reply } => {
                self.connect().await;
                self.publish_snapshot();
                let _ = reply.send(self.state());
            }
            SessionCommand::Disconnect { reply } => {
                let result = self.disconnect().await;
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            SessionCommand::Publish {
                topic,
                payload,
                reply,
            } => {
                let result = self.publish(&topic, &payload).await;
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            SessionCommand::SendCommand {
                device,
                payload,
                reply,
            } => {
                let result = self.send_command(device, &payload).await;
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            SessionCommand::Shutdown => {}
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::DebounceConfig;
    use crate::config::MqttConfig;
    use crate::session::state::BrokerRole;
    use crate::session::transport::MockTransport;

    fn spawn(transport: MockTransport) -> (SessionHandle, JoinHandle<()>) {
        SessionController::new(transport, &MqttConfig::default(), &DebounceConfig::default())
            .spawn()
    }

    #[tokio::test]
    async fn test_connect_and_command_through_handle() {
        let (handle, task) = spawn(MockTransport::new());
        assert_eq!(handle.snapshot().state, SessionState::Disconnected);

        assert_eq!(handle.connect().await, Ok(SessionState::Connected));
        assert_eq!(handle.snapshot().state, SessionState::Connected);

        assert_eq!(
            handle.send_command("living_room_light", "ON").await,
            Ok(PublishOutcome::Sent)
        );
        assert_eq!(
            handle.send_command("living_room_light", "ON").await,
            Ok(PublishOutcome::Debounced)
        );
        assert_eq!(
            handle.publish("casa/quarto/luz", "OFF").await,
            Ok(PublishOutcome::Sent)
        );

        assert_eq!(handle.disconnect().await, Ok(()));
        assert_eq!(
            handle.publish("casa/quarto/luz", "ON").await,
            Err(SessionError::NotConnected)
        );

        handle.shutdown();
        task.await.unwrap();
        assert_eq!(handle.connect().await, Err(SessionError::ControllerGone));
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (handle, _task) = spawn(MockTransport::new());
        assert_eq!(
            handle.send_command("garage", "ON").await,
            Err(SessionError::UnknownDevice("garage".to_string()))
        );
    }

    #[tokio::test]
    async fn test_transport_events_reach_snapshot() {
        let mut transport = MockTransport::new();
        transport.events.push_back(TransportEvent::Message {
            topic: "casa/sala/umidade".to_string(),
            payload: "55".to_string(),
        });
        let (handle, _task) = spawn(transport);
        let mut snapshots = handle.subscribe();

        snapshots
            .wait_for(|snapshot| snapshot.sensors.humidity == 55.0)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_visible_during_connect() {
        let mut transport = MockTransport::new().fail_host("broker.hivemq.com");
        transport.connect_delay = Some(Duration::from_secs(3));
        let (handle, _task) = spawn(transport);
        let mut snapshots = handle.subscribe();

        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect().await }
        });

        let snapshot = snapshots
            .wait_for(|snapshot| snapshot.state == SessionState::Connecting)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.broker, Some(BrokerRole::Primary));

        let snapshot = snapshots
            .wait_for(|snapshot| snapshot.state == SessionState::FailingOver)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.broker, Some(BrokerRole::Alternate));
        assert!(!connecting.is_finished());

        assert_eq!(connecting.await.unwrap(), Ok(SessionState::Connected));
        assert_eq!(handle.snapshot().broker, Some(BrokerRole::Alternate));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_timer_fires_after_delay() {
        let mut transport = MockTransport::new();
        transport.events.push_back(TransportEvent::ConnectionLost {
            reason: "eof".to_string(),
        });
        // The mock hands out the loss as soon as the loop polls it, so the
        // first connect happens before the task starts
        let mut controller = SessionController::new(
            transport,
            &MqttConfig::default(),
            &DebounceConfig::default(),
        );
        controller.connect().await;
        let (handle, _task) = controller.spawn();
        let mut snapshots = handle.subscribe();

        snapshots
            .wait_for(|snapshot| snapshot.state == SessionState::ConnectionLost)
            .await
            .unwrap();
        let lost_at = tokio::time::Instant::now();

        let snapshot = snapshots
            .wait_for(|snapshot| snapshot.state == SessionState::Connected)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.broker, Some(BrokerRole::Alternate));
        assert!(tokio::time::Instant::now() - lost_at >= Duration::from_secs(5));
    }
}
