//! MQTT session management.
//!
//! A single [`SessionController`] owns the transport and drives the
//! connection state machine: connect, subscribe to the namespace, fail over
//! between the primary and alternate broker, and reconnect after a fixed
//! delay when the connection drops. It runs inside one tokio task; the rest
//! of the process talks to it through a [`SessionHandle`].

mod controller;
mod error;
mod handle;
mod state;
mod transport;

pub use controller::PublishOutcome;
pub use controller::ReconnectTimer;
pub use controller::SessionController;
pub use error::SessionError;
pub use handle::SessionHandle;
pub use state::BrokerRole;
pub use state::SessionSnapshot;
pub use state::SessionState;
pub use transport::RumqttcTransport;
pub use transport::Transport;
#[cfg(test)]
pub(crate) use transport::MockTransport;
pub use transport::TransportError;
pub use transport::TransportEvent;
