use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::ConnectReturnCode;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Outgoing;
use rumqttc::Packet;
use rumqttc::QoS;
use rumqttc::SubscribeReasonCode;
use rumqttc::Transport as MqttTransport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::BrokerConfig;
use crate::config::MqttConfig;
use crate::config::TransportKind;

/// Something the transport reports without being asked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message arrived on a subscribed topic
    Message { topic: String, payload: String },

    /// The broker connection dropped
    ConnectionLost { reason: String },

    /// The broker rejected a subscription after accepting the request
    SubscribeFailed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The client library cannot be set up for this endpoint at all
    #[error("MQTT transport unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Connect(String),

    #[error("{0}")]
    Subscribe(String),

    #[error("{0}")]
    Publish(String),

    #[error("MQTT client not connected")]
    NotConnected,
}

/// Trait for MQTT transport operations
///
/// The session controller is the only user. This trait allows for mocking
/// the MQTT client for testing purposes.
#[async_trait]
pub trait Transport: Send {
    /// Open a session with `broker`, resolving once the broker has accepted
    /// or refused it. Any previous session is torn down first.
    async fn connect(&mut self, broker: &BrokerConfig, client_id: &str)
        -> Result<(), TransportError>;

    /// Subscribe to a topic filter at QoS 0
    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError>;

    /// Publish a text payload at QoS 0
    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Close the current session, if any
    async fn disconnect(&mut self);

    /// Wait for the next event from the current session
    ///
    /// Pends forever while no session is open, so it can sit in a `select!`
    /// unconditionally. Must be cancel safe.
    async fn next_event(&mut self) -> TransportEvent;
}

/// Real MQTT transport implementation using rumqttc
pub struct RumqttcTransport {
    kind: TransportKind,
    keep_alive: Duration,
    connect_timeout: Duration,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Event receiver (created in connect())
    event_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcTransport {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            kind: config.transport,
            keep_alive: config.keep_alive(),
            connect_timeout: config.connect_timeout(),
            client: None,
            event_rx: None,
            event_loop_task: None,
        }
    }

    fn mqtt_options(
        &self,
        broker: &BrokerConfig,
        client_id: &str,
    ) -> Result<MqttOptions, TransportError> {
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(TransportError::Unavailable(format!(
                "invalid client id {:?}",
                client_id
            )));
        }
        if broker.host.is_empty() {
            return Err(TransportError::Unavailable("empty broker host".to_string()));
        }
        if self.keep_alive < Duration::from_secs(1) {
            return Err(TransportError::Unavailable(
                "keep alive must be at least one second".to_string(),
            ));
        }

        let mut options = match self.kind {
            TransportKind::Websocket => {
                let scheme = if broker.use_ssl { "wss" } else { "ws" };
                let url = format!("{}://{}:{}{}", scheme, broker.host, broker.port, broker.path);
                let mut options = MqttOptions::new(client_id, url, broker.port);
                if broker.use_ssl {
                    options.set_transport(MqttTransport::wss_with_default_config());
                } else {
                    options.set_transport(MqttTransport::Ws);
                }
                options
            }
            TransportKind::Tcp => {
                let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
                if broker.use_ssl {
                    options.set_transport(MqttTransport::tls_with_default_config());
                }
                options
            }
        };

        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        Ok(options)
    }

    async fn teardown(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!("MQTT disconnect request failed: {}", e);
            }
        }

        if let Some(task) = self.event_loop_task.take() {
            // Give the event loop a moment to flush the DISCONNECT packet
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        self.event_rx = None;
    }
}

#[async_trait]
impl Transport for RumqttcTransport {
    async fn connect(
        &mut self,
        broker: &BrokerConfig,
        client_id: &str,
    ) -> Result<(), TransportError> {
        self.teardown().await;

        let options = self.mqtt_options(broker, client_id)?;
        let (client, mut event_loop) = AsyncClient::new(options, 10);

        // Drive the event loop until the broker answers the CONNECT
        let handshake = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(TransportError::Connect(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Connect(e.to_string())),
                }
            }
        };
        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Connect(format!(
                    "no answer from broker within {}s",
                    self.connect_timeout.as_secs()
                )))
            }
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Spawn background task to poll event loop. It stops at the first
        // error instead of letting rumqttc reconnect on its own: reconnecting
        // (and picking the broker) is the session controller's job.
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let event = TransportEvent::Message {
                            topic: publish.topic.clone(),
                            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                        };

                        // Send to channel; if receiver dropped, exit
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(suback))) => {
                        let rejected = suback
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure));
                        if rejected {
                            let event = TransportEvent::SubscribeFailed {
                                reason: format!("broker rejected subscription {}", suback.pkid),
                            };
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {
                        // Ignore other events (pingresp, puback, etc.)
                    }
                    Err(e) => {
                        warn!("MQTT event loop error: {}", e);
                        let _ = event_tx.send(TransportEvent::ConnectionLost {
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
            info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.event_rx = Some(event_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;

        client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;

        client
            .publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn disconnect(&mut self) {
        self.teardown().await;
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.event_rx.as_mut() {
                Some(rx) => match rx.recv().await {
                    Some(event) => return event,
                    // Event loop task is gone; wait for the next connect()
                    None => self.event_rx = None,
                },
                None => std::future::pending::<()>().await,
            }
        }
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

/// Mock MQTT transport for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Hosts passed to connect(), in order
    pub connects: Vec<String>,
    /// Hosts whose connect() fails
    pub failing_hosts: std::collections::HashSet<String>,
    pub unavailable: bool,
    /// How long each connect() takes to answer
    pub connect_delay: Option<Duration>,
    pub fail_subscribe: bool,
    pub fail_publish: bool,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String, bool)>,
    pub disconnects: usize,
    pub is_connected: bool,
    pub events: std::collections::VecDeque<TransportEvent>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connect() fail for `host`
    pub fn fail_host(mut self, host: &str) -> Self {
        self.failing_hosts.insert(host.to_string());
        self
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &mut self,
        broker: &BrokerConfig,
        _client_id: &str,
    ) -> Result<(), TransportError> {
        if self.unavailable {
            return Err(TransportError::Unavailable("mock disabled".to_string()));
        }
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.connects.push(broker.host.clone());
        if self.failing_hosts.contains(&broker.host) {
            self.is_connected = false;
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        self.is_connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        if self.fail_subscribe {
            return Err(TransportError::Subscribe("not authorized".to_string()));
        }
        self.subscriptions.push(filter.to_string());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.fail_publish {
            return Err(TransportError::Publish("socket closed".to_string()));
        }
        self.published
            .push((topic.to_string(), payload.to_string(), retain));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.disconnects += 1;
        self.is_connected = false;
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.events.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(host: &str, use_ssl: bool) -> BrokerConfig {
        BrokerConfig {
            enabled: true,
            host: host.to_string(),
            port: 8000,
            path: "/mqtt".to_string(),
            use_ssl,
            reconnect_delay_ms: 5_000,
        }
    }

    #[test]
    fn test_websocket_options() {
        let transport = RumqttcTransport::new(&MqttConfig::default());
        let options = transport
            .mqtt_options(&broker("broker.hivemq.com", false), "dashboard_0a1b2c3d")
            .unwrap();

        let (host, port) = options.broker_address();
        assert_eq!(host, "ws://broker.hivemq.com:8000/mqtt");
        assert_eq!(port, 8000);
        assert_eq!(options.client_id(), "dashboard_0a1b2c3d");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_tcp_options() {
        let config = MqttConfig {
            transport: TransportKind::Tcp,
            ..MqttConfig::default()
        };
        let transport = RumqttcTransport::new(&config);
        let options = transport
            .mqtt_options(&broker("localhost", false), "dashboard_1")
            .unwrap();

        assert_eq!(options.broker_address(), ("localhost".to_string(), 8000));
    }

    #[test]
    fn test_invalid_client_id_is_unavailable() {
        let transport = RumqttcTransport::new(&MqttConfig::default());
        let err = transport
            .mqtt_options(&broker("localhost", false), "")
            .unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_publish_before_connect() {
        let mut transport = RumqttcTransport::new(&MqttConfig::default());
        let err = transport.publish("casa/sala/luz", "ON", false).await;
        assert!(matches!(err, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_next_event_pends_without_session() {
        let mut transport = RumqttcTransport::new(&MqttConfig::default());
        let result =
            tokio::time::timeout(Duration::from_millis(20), transport.next_event()).await;
        assert!(result.is_err());
    }
}
