#![expect(
    clippy::module_name_repetitions,
    reason = "The machine type names the connection it drives"
)]

//! Synchronous connection state machine.
//!
//! The machine performs no IO. The driver in [`super::connection`] feeds it
//! transport events and commands, and carries out the returned [`Action`].
//! Every transition is published on a watch channel.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use backoff::backoff::Backoff as _;
use tokio::sync::watch;
use tokio::time::Instant;

use super::backoff::ReconnectBackoff;
use super::config::Config;
use super::connection::ConnectionStatus;
use super::history::MessageHistory;

/// Close code for a graceful shutdown. Any other code is abnormal.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code recorded when the transport ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code recorded for a close frame that carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// What the driver must do after a transition.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport to the endpoint
    Connect,
    /// Arm the retry timer, then call [`ConnectionMachine::on_retry_elapsed`]
    Retry(Duration),
    /// Nothing scheduled, wait for a command
    Idle,
    /// Release the transport and stop
    Stop,
}

pub struct ConnectionMachine<M> {
    backoff: ReconnectBackoff,
    status_tx: watch::Sender<ConnectionStatus>,
    history: Arc<RwLock<MessageHistory<M>>>,
}

impl<M> ConnectionMachine<M> {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            backoff: ReconnectBackoff::new(config.reconnect.clone()),
            status_tx,
            history: Arc::new(RwLock::new(MessageHistory::with_capacity(
                config.history_capacity,
            ))),
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Shared handle to the message history. Only the machine writes to it.
    #[must_use]
    pub fn history(&self) -> Arc<RwLock<MessageHistory<M>>> {
        Arc::clone(&self.history)
    }

    /// Attempts charged since the last successful open.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Initial connection.
    pub fn start(&mut self) -> Action {
        self.set_status(ConnectionStatus::Connecting);
        Action::Connect
    }

    pub fn on_open(&mut self) {
        self.backoff.reset();
        self.set_status(ConnectionStatus::Connected {
            since: Instant::now(),
        });
    }

    /// Record a parsed payload as the latest message.
    pub fn on_message(&mut self, message: M) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// A transport error. Reconnection is left to the close that follows.
    pub fn on_error(&mut self) {
        self.set_status(ConnectionStatus::Error);
    }

    /// The transport closed, or never opened.
    pub fn on_close(&mut self, code: u16) -> Action {
        self.set_status(ConnectionStatus::Disconnected);

        if code == NORMAL_CLOSURE {
            #[cfg(feature = "tracing")]
            tracing::info!(code, "WebSocket closed normally");
            return Action::Idle;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            code,
            attempts = self.backoff.attempts(),
            "WebSocket closed abnormally"
        );

        if let Some(delay) = self.backoff.next_backoff() {
            self.set_status(ConnectionStatus::Reconnecting {
                attempt: self.backoff.attempts(),
                max_attempts: self.backoff.max_attempts(),
                delay,
                retry_at: Instant::now() + delay,
            });
            Action::Retry(delay)
        } else {
            #[cfg(feature = "tracing")]
            tracing::error!(
                attempts = self.backoff.attempts(),
                "Max reconnection attempts reached"
            );
            self.set_status(ConnectionStatus::Failed {
                attempts: self.backoff.attempts(),
            });
            Action::Idle
        }
    }

    /// The pending retry timer fired.
    pub fn on_retry_elapsed(&mut self) -> Action {
        self.set_status(ConnectionStatus::Connecting);
        Action::Connect
    }

    /// Manual reconnect, from any state. The driver drops any pending timer
    /// and open transport before acting on the returned [`Action::Connect`].
    pub fn reconnect(&mut self) -> Action {
        self.backoff.reset();
        self.set_status(ConnectionStatus::Connecting);
        Action::Connect
    }

    /// Owner-initiated teardown.
    pub fn teardown(&mut self) -> Action {
        self.set_status(ConnectionStatus::Disconnected);
        Action::Stop
    }

    fn set_status(&self, status: ConnectionStatus) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%status, "WebSocket status changed");

        self.status_tx.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::ws::config::ReconnectConfig;

    fn machine() -> ConnectionMachine<Value> {
        ConnectionMachine::new(&Config::default())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn starts_disconnected_then_connects() {
        let mut machine = machine();
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);

        assert_eq!(machine.start(), Action::Connect);
        assert_eq!(machine.status(), ConnectionStatus::Connecting);

        machine.on_open();
        assert!(machine.status().is_connected());
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn retry_delays_follow_exponential_backoff() {
        let mut machine = machine();
        machine.start();
        machine.on_open();

        let mut delays = Vec::new();
        while let Action::Retry(delay) = machine.on_close(ABNORMAL_CLOSURE) {
            delays.push(delay);
            assert_eq!(machine.on_retry_elapsed(), Action::Connect);
        }

        assert_eq!(delays, [secs(1), secs(2), secs(4), secs(8), secs(16)]);
    }

    #[test]
    fn exhausted_retries_fail_without_scheduling() {
        let mut machine = machine();
        machine.start();

        for _ in 0..5 {
            assert!(matches!(
                machine.on_close(ABNORMAL_CLOSURE),
                Action::Retry(_)
            ));
            machine.on_retry_elapsed();
        }

        assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Idle);
        assert_eq!(machine.status(), ConnectionStatus::Failed { attempts: 5 });
        assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Idle);
    }

    #[test]
    fn manual_reconnect_from_failed_resets_attempts() {
        let config = Config::builder()
            .reconnect(ReconnectConfig::builder().max_attempts(1).build())
            .build();
        let mut machine = ConnectionMachine::<Value>::new(&config);
        machine.start();
        machine.on_close(ABNORMAL_CLOSURE);
        machine.on_retry_elapsed();
        machine.on_close(ABNORMAL_CLOSURE);
        assert!(matches!(machine.status(), ConnectionStatus::Failed { .. }));

        assert_eq!(machine.reconnect(), Action::Connect);
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
        assert_eq!(machine.attempts(), 0);
        assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Retry(secs(1)));
    }

    #[test]
    fn manual_reconnect_while_waiting_restarts_backoff() {
        let mut machine = machine();
        machine.start();
        machine.on_close(ABNORMAL_CLOSURE);
        machine.on_retry_elapsed();
        assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Retry(secs(2)));

        machine.reconnect();
        assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Retry(secs(1)));
    }

    #[test]
    fn normal_closure_never_schedules_retry() {
        let mut machine = machine();
        machine.start();
        machine.on_close(ABNORMAL_CLOSURE);
        machine.on_retry_elapsed();
        machine.on_open();

        assert_eq!(machine.on_close(NORMAL_CLOSURE), Action::Idle);
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn teardown_stops_from_any_state() {
        let mut machine = machine();
        machine.start();
        machine.on_close(ABNORMAL_CLOSURE);
        assert!(matches!(
            machine.status(),
            ConnectionStatus::Reconnecting { .. }
        ));

        assert_eq!(machine.teardown(), Action::Stop);
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn successful_retries_reset_the_delay() {
        let mut machine = machine();
        machine.start();
        machine.on_open();

        for _ in 0..3 {
            assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Retry(secs(1)));
            machine.on_retry_elapsed();
            machine.on_open();
            assert_eq!(machine.attempts(), 0);
        }

        assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Retry(secs(1)));
    }

    #[test]
    fn error_then_close_schedules_one_retry() {
        let mut machine = machine();
        machine.start();
        machine.on_open();

        machine.on_error();
        assert_eq!(machine.status(), ConnectionStatus::Error);
        assert_eq!(machine.attempts(), 0);

        assert_eq!(machine.on_close(ABNORMAL_CLOSURE), Action::Retry(secs(1)));
        assert_eq!(machine.attempts(), 1);
    }

    #[test]
    fn reconnecting_status_reports_attempt_and_delay() {
        let mut machine = machine();
        machine.start();
        machine.on_close(NO_STATUS_RECEIVED);

        let ConnectionStatus::Reconnecting {
            attempt,
            max_attempts,
            delay,
            ..
        } = machine.status()
        else {
            panic!("expected reconnecting, got {:?}", machine.status());
        };
        assert_eq!((attempt, max_attempts, delay), (1, 5, secs(1)));
    }

    #[test]
    fn messages_land_in_history_in_order() {
        let mut machine = machine();
        let history = machine.history();
        for id in 1..=10 {
            machine.on_message(json!({ "id": id }));
        }

        let history = history.read().unwrap();
        let expected: Vec<_> = (1..=10).map(|id| json!({ "id": id })).collect();
        assert_eq!(history.to_vec(), expected);
        assert_eq!(history.latest(), Some(&json!({ "id": 10 })));
    }

    #[test]
    fn status_changes_are_published() {
        let mut machine = machine();
        let mut rx = machine.status_receiver();

        machine.start();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Connecting);
    }
}
