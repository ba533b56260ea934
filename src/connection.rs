//! Connection state tracking.
//!
//! The transport reports raw connection events; the tracker folds them into a
//! stable [`ConnectionState`] and tells the application only about real
//! changes. Repeated events that leave status and reason untouched are
//! swallowed.
//!
//! The tracker never fails pending operations. Operations waiting for a
//! connection are judged by the retry engine on its own schedule.

use alloc::boxed::Box;
use core::fmt;

use crate::time::Instant;

/// Coarse connection status reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionStatus {
    /// Not connected and not trying to reconnect.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and authenticated.
    Connected,
    /// Connection lost; reconnect attempts are scheduled.
    DisconnectedRetrying,
}

/// Why the connection is in its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionReason {
    /// No connection has been attempted yet.
    NotConnected,
    /// The connection is healthy.
    ConnectionOk,
    /// The SAS token expired and must be renewed.
    ExpiredSasToken,
    /// The service disabled this device.
    DeviceDisabled,
    /// The service refused the credentials.
    BadCredential,
    /// Reconnecting took longer than the retry policy allows.
    RetryExpired,
    /// The network is unreachable.
    NoNetwork,
    /// The link failed or a protocol error occurred.
    CommunicationError,
    /// The service stopped answering keep-alive pings.
    NoPingResponse,
    /// The application closed the client.
    ClientClosed,
}

/// Raw connection event surfaced by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionEvent {
    /// The connection is up.
    Connected,
    /// The connection dropped. `retryable` tells whether reconnecting makes
    /// sense at all.
    Disconnected {
        /// Cause reported by the transport.
        reason: ConnectionReason,
        /// Whether the core should schedule reconnect attempts.
        retryable: bool,
    },
    /// The credentials expired while connected.
    AuthExpired,
}

/// Snapshot of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Cause of the current status.
    pub reason: ConnectionReason,
    /// When status or reason last changed.
    pub last_changed_at: Instant,
}

/// Callback invoked on every connection status change.
pub type ConnectionStatusCallback = Box<dyn FnMut(ConnectionStatus, ConnectionReason)>;

/// Debounces transport connection events into a [`ConnectionState`].
pub struct ConnectionTracker {
    state: ConnectionState,
    callback: Option<ConnectionStatusCallback>,
    retrying_since: Option<Instant>,
    reconnect_attempts: u32,
    next_reconnect_at: Option<Instant>,
    exhausted: bool,
}

impl ConnectionTracker {
    /// Creates a tracker in the `Disconnected`/`NotConnected` state.
    pub fn new(now: Instant) -> Self {
        Self {
            state: ConnectionState {
                status: ConnectionStatus::Disconnected,
                reason: ConnectionReason::NotConnected,
                last_changed_at: now,
            },
            callback: None,
            retrying_since: None,
            reconnect_attempts: 0,
            next_reconnect_at: None,
            exhausted: false,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether operations may be handed to the transport.
    pub fn is_connected(&self) -> bool {
        self.state.status == ConnectionStatus::Connected
    }

    /// Whether the first connection attempt is still outstanding.
    pub fn needs_initial_connect(&self) -> bool {
        self.state.status == ConnectionStatus::Disconnected
            && self.state.reason == ConnectionReason::NotConnected
    }

    /// Registers or clears the status callback.
    pub fn set_callback(&mut self, callback: Option<ConnectionStatusCallback>) {
        self.callback = callback;
    }

    /// Records that the first connection attempt was issued.
    pub fn connecting(&mut self, now: Instant) -> bool {
        self.apply(ConnectionStatus::Connecting, ConnectionReason::NotConnected, now)
    }

    /// Folds a transport event into the state. Returns whether the state
    /// changed.
    pub fn on_event(&mut self, event: ConnectionEvent, now: Instant) -> bool {
        match event {
            ConnectionEvent::Connected => {
                self.retrying_since = None;
                self.reconnect_attempts = 0;
                self.next_reconnect_at = None;
                self.exhausted = false;
                self.apply(ConnectionStatus::Connected, ConnectionReason::ConnectionOk, now)
            }
            ConnectionEvent::Disconnected {
                reason,
                retryable: true,
            } => self.lost(reason, now),
            ConnectionEvent::AuthExpired => self.lost(ConnectionReason::ExpiredSasToken, now),
            ConnectionEvent::Disconnected {
                reason,
                retryable: false,
            } => {
                error!("connection failed permanently: {}", reason);
                self.stop(reason, now)
            }
        }
    }

    /// Gives up reconnecting.
    pub fn stop(&mut self, reason: ConnectionReason, now: Instant) -> bool {
        self.retrying_since = None;
        self.next_reconnect_at = None;
        self.exhausted = false;
        self.apply(ConnectionStatus::Disconnected, reason, now)
    }

    fn lost(&mut self, reason: ConnectionReason, now: Instant) -> bool {
        if self.exhausted {
            warn!("connection lost after the last reconnect attempt");
            return self.stop(ConnectionReason::RetryExpired, now);
        }
        if self.retrying_since.is_none() {
            self.retrying_since = Some(now);
        }
        self.apply(ConnectionStatus::DisconnectedRetrying, reason, now)
    }

    /// When reconnecting started, if it is in progress.
    pub fn retrying_since(&self) -> Option<Instant> {
        self.retrying_since
    }

    /// Whether a reconnect attempt should be issued now.
    pub fn reconnect_due(&self, now: Instant) -> bool {
        self.state.status == ConnectionStatus::DisconnectedRetrying
            && !self.exhausted
            && self.next_reconnect_at.is_none_or(|at| at <= now)
    }

    /// Counts a reconnect attempt and returns the new attempt number.
    pub fn record_reconnect_attempt(&mut self) -> u32 {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect_attempts
    }

    /// Sets the earliest instant of the next reconnect attempt.
    pub fn schedule_reconnect(&mut self, at: Instant) {
        self.next_reconnect_at = Some(at);
    }

    /// Marks the attempt just issued as the last one. If it fails too, the
    /// tracker stops with [`ConnectionReason::RetryExpired`].
    pub fn give_up_reconnecting(&mut self) {
        self.exhausted = true;
        self.next_reconnect_at = None;
    }

    fn apply(&mut self, status: ConnectionStatus, reason: ConnectionReason, now: Instant) -> bool {
        if self.state.status == status && self.state.reason == reason {
            return false;
        }
        info!("connection status {} ({})", status, reason);
        self.state = ConnectionState {
            status,
            reason,
            last_changed_at: now,
        };
        if let Some(callback) = self.callback.as_mut() {
            callback(status, reason);
        }
        true
    }
}

impl fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("state", &self.state)
            .field("retrying_since", &self.retrying_since)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("next_reconnect_at", &self.next_reconnect_at)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    type Seen = Rc<RefCell<Vec<(ConnectionStatus, ConnectionReason)>>>;

    fn tracker_with_log() -> (ConnectionTracker, Seen) {
        let seen = Seen::default();
        let mut tracker = ConnectionTracker::new(Instant::ZERO);
        let sink = seen.clone();
        tracker.set_callback(Some(Box::new(move |s: ConnectionStatus, r: ConnectionReason| sink.borrow_mut().push((s, r)))));
        (tracker, seen)
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn same_state_events_are_coalesced() {
        let (mut tracker, seen) = tracker_with_log();
        assert!(tracker.on_event(ConnectionEvent::Connected, at(1)));
        assert!(!tracker.on_event(ConnectionEvent::Connected, at(2)));
        assert!(!tracker.on_event(ConnectionEvent::Connected, at(3)));

        assert_eq!(
            *seen.borrow(),
            vec![(ConnectionStatus::Connected, ConnectionReason::ConnectionOk)]
        );
        assert_eq!(tracker.state().last_changed_at, at(1));
    }

    #[test]
    fn reason_change_is_signalled() {
        let (mut tracker, seen) = tracker_with_log();
        let lost = |reason| ConnectionEvent::Disconnected {
            reason,
            retryable: true,
        };
        tracker.on_event(lost(ConnectionReason::NoNetwork), at(1));
        tracker.on_event(lost(ConnectionReason::NoNetwork), at(2));
        tracker.on_event(lost(ConnectionReason::NoPingResponse), at(3));

        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(tracker.retrying_since(), Some(at(1)));
    }

    #[test]
    fn fatal_disconnect_stops_reconnecting() {
        let (mut tracker, seen) = tracker_with_log();
        tracker.on_event(ConnectionEvent::Connected, at(0));
        tracker.on_event(
            ConnectionEvent::Disconnected {
                reason: ConnectionReason::BadCredential,
                retryable: false,
            },
            at(5),
        );

        assert_eq!(tracker.state().status, ConnectionStatus::Disconnected);
        assert!(!tracker.reconnect_due(at(10)));
        assert!(!tracker.needs_initial_connect());
        assert_eq!(
            seen.borrow().last(),
            Some(&(ConnectionStatus::Disconnected, ConnectionReason::BadCredential))
        );
    }

    #[test]
    fn auth_expiry_schedules_reconnect() {
        let (mut tracker, _) = tracker_with_log();
        tracker.on_event(ConnectionEvent::Connected, at(0));
        tracker.on_event(ConnectionEvent::AuthExpired, at(10));

        assert_eq!(tracker.state().reason, ConnectionReason::ExpiredSasToken);
        assert!(tracker.reconnect_due(at(10)));
        tracker.record_reconnect_attempt();
        tracker.schedule_reconnect(at(1_010));
        assert!(!tracker.reconnect_due(at(500)));
        assert!(tracker.reconnect_due(at(1_010)));
    }

    #[test]
    fn reconnect_resets_bookkeeping() {
        let (mut tracker, _) = tracker_with_log();
        tracker.on_event(ConnectionEvent::AuthExpired, at(10));
        assert_eq!(tracker.record_reconnect_attempt(), 1);
        tracker.on_event(ConnectionEvent::Connected, at(20));
        assert_eq!(tracker.retrying_since(), None);
        assert_eq!(tracker.record_reconnect_attempt(), 1);
    }

    #[test]
    fn initial_connect_is_requested_once() {
        let (mut tracker, seen) = tracker_with_log();
        assert!(tracker.needs_initial_connect());
        assert!(tracker.connecting(at(0)));
        assert!(!tracker.needs_initial_connect());
        assert!(!tracker.connecting(at(1)));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn loss_after_last_attempt_expires_retry() {
        let (mut tracker, seen) = tracker_with_log();
        let lost = ConnectionEvent::Disconnected {
            reason: ConnectionReason::NoNetwork,
            retryable: true,
        };
        tracker.on_event(lost, at(0));
        tracker.record_reconnect_attempt();
        tracker.give_up_reconnecting();
        assert!(!tracker.reconnect_due(at(100)));

        tracker.on_event(lost, at(200));
        assert_eq!(tracker.state().status, ConnectionStatus::Disconnected);
        assert_eq!(tracker.state().reason, ConnectionReason::RetryExpired);
        assert_eq!(seen.borrow().len(), 2);
    }
}
