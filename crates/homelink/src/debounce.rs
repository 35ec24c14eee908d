use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use crate::config::DebounceConfig;

/// Suffix that turns a command topic into its status topic
pub const STATUS_SUFFIX: &str = "/status";

/// A command recently published to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub topic: String,
    pub payload: String,
    pub sent_at: Instant,
}

/// Verdict for an outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendVerdict {
    Allow,
    Suppress,
}

/// Verdict for an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoVerdict {
    /// New information from the outside world
    Accept,
    /// Confirmation of a command this session just sent
    Ignore,
}

/// Tracks recently sent commands per topic
///
/// Used for two things: dropping a repeat of the same command while the
/// first one is still in flight, and recognizing the status message a device
/// publishes in response to our own command.
#[derive(Debug)]
pub struct CommandDebouncer {
    pending: HashMap<String, PendingCommand>,
    resend_window: Duration,
    echo_window: Duration,
    expiry: Duration,
}

impl CommandDebouncer {
    pub fn new(config: &DebounceConfig) -> Self {
        Self {
            pending: HashMap::new(),
            resend_window: Duration::from_millis(config.resend_window_ms),
            echo_window: Duration::from_millis(config.echo_window_ms),
            expiry: Duration::from_millis(config.expiry_ms),
        }
    }

    /// Decide whether a command may be published
    ///
    /// On `Allow` the command becomes the pending command for its topic,
    /// replacing whatever was there.
    pub fn before_send(&mut self, topic: &str, payload: &str, now: Instant) -> SendVerdict {
        self.purge_expired(now);

        if let Some(pending) = self.pending.get(topic) {
            if pending.payload == payload && elapsed(pending.sent_at, now) < self.resend_window {
                return SendVerdict::Suppress;
            }
        }

        self.pending.insert(
            topic.to_string(),
            PendingCommand {
                topic: topic.to_string(),
                payload: payload.to_string(),
                sent_at: now,
            },
        );
        SendVerdict::Allow
    }

    /// Classify an inbound message as an echo of our own command or not
    pub fn on_inbound_status(&mut self, topic: &str, payload: &str, now: Instant) -> EchoVerdict {
        self.purge_expired(now);

        let command_topic = topic.strip_suffix(STATUS_SUFFIX).unwrap_or(topic);
        match self.pending.get(command_topic) {
            Some(pending)
                if pending.payload == payload
                    && elapsed(pending.sent_at, now) < self.echo_window =>
            {
                EchoVerdict::Ignore
            }
            _ => EchoVerdict::Accept,
        }
    }

    /// Drop the pending command for `topic`, e.g. when it never got sent
    pub fn forget(&mut self, topic: &str) {
        self.pending.remove(topic);
    }

    pub fn pending(&self, topic: &str) -> Option<&PendingCommand> {
        self.pending.get(topic)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn purge_expired(&mut self, now: Instant) {
        let expiry = self.expiry;
        self.pending
            .retain(|_, pending| elapsed(pending.sent_at, now) < expiry);
    }
}

fn elapsed(since: Instant, now: Instant) -> Duration {
    now.saturating_duration_since(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> CommandDebouncer {
        CommandDebouncer::new(&DebounceConfig::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_resend_window() {
        let mut d = debouncer();
        let t0 = Instant::now();

        assert_eq!(d.before_send("casa/sala/luz", "ON", t0), SendVerdict::Allow);
        assert_eq!(
            d.before_send("casa/sala/luz", "ON", t0 + ms(500)),
            SendVerdict::Suppress
        );
        assert_eq!(
            d.before_send("casa/sala/luz", "ON", t0 + ms(1000)),
            SendVerdict::Allow
        );
    }

    #[test]
    fn test_suppressed_send_does_not_refresh_window() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/sala/luz", "ON", t0);
        d.before_send("casa/sala/luz", "ON", t0 + ms(900));
        assert_eq!(d.pending("casa/sala/luz").unwrap().sent_at, t0);
    }

    #[test]
    fn test_different_payload_is_allowed() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/sala/luz", "ON", t0);
        assert_eq!(
            d.before_send("casa/sala/luz", "OFF", t0 + ms(100)),
            SendVerdict::Allow
        );
        assert_eq!(d.pending("casa/sala/luz").unwrap().payload, "OFF");
    }

    #[test]
    fn test_topics_are_independent() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/sala/luz", "ON", t0);
        assert_eq!(
            d.before_send("casa/quarto/luz", "ON", t0 + ms(10)),
            SendVerdict::Allow
        );
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn test_echo_of_own_command_is_ignored() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/garagem/luz", "ON", t0);
        assert_eq!(
            d.on_inbound_status("casa/garagem/luz/status", "ON", t0 + ms(300)),
            EchoVerdict::Ignore
        );
        // The broker also reflects the command itself back to us
        assert_eq!(
            d.on_inbound_status("casa/garagem/luz", "ON", t0 + ms(50)),
            EchoVerdict::Ignore
        );
    }

    #[test]
    fn test_echo_window_boundary() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/garagem/luz", "ON", t0);
        assert_eq!(
            d.on_inbound_status("casa/garagem/luz/status", "ON", t0 + ms(1999)),
            EchoVerdict::Ignore
        );
        assert_eq!(
            d.on_inbound_status("casa/garagem/luz/status", "ON", t0 + ms(2000)),
            EchoVerdict::Accept
        );
    }

    #[test]
    fn test_status_with_other_payload_is_accepted() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/garagem/portao/social", "ABRIR", t0);
        assert_eq!(
            d.on_inbound_status("casa/garagem/portao/social/status", "ABERTO", t0 + ms(100)),
            EchoVerdict::Accept
        );
    }

    #[test]
    fn test_forget_allows_immediate_resend() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/sala/luz", "ON", t0);
        d.forget("casa/sala/luz");
        assert!(d.pending("casa/sala/luz").is_none());
        assert_eq!(
            d.before_send("casa/sala/luz", "ON", t0 + ms(10)),
            SendVerdict::Allow
        );
    }

    #[test]
    fn test_entries_expire() {
        let mut d = debouncer();
        let t0 = Instant::now();

        d.before_send("casa/sala/luz", "ON", t0);
        d.on_inbound_status("casa/sala/temperatura", "22", t0 + ms(3000));
        assert!(d.is_empty());
    }
}
