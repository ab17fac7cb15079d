//! Push-channel connection manager.
//!
//! A finite-state object driven through `transition`. It never touches a
//! socket itself: it returns `ConnectionAction`s for the runtime to execute
//! and publishes the `connected` flag for the poll scheduler.
//!
//! Retry policy: a fixed delay between attempts and a bounded budget of
//! consecutive abnormal closures. Once the budget is spent the channel is
//! `Exhausted` for the rest of the session.

use ride_protocol::NORMAL_CLOSURE;
use serde::Serialize;

use crate::config::PushConfig;
use crate::signal::{Subscription, Watch, WatchReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close_code: Option<u16>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            retry_count: 0,
            last_close_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Opened,
    Closed { code: Option<u16> },
    Errored { reason: String },
    RetryTimerFired,
    DisconnectRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    Open { url: String },
    Close { code: u16 },
    ScheduleReconnect { delay_ms: u64 },
    CancelReconnect,
}

/// Where the current socket (if any) is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketPhase {
    None,
    Opening,
    Open,
}

pub struct ConnectionManager {
    url: String,
    config: PushConfig,
    state: ConnectionState,
    socket: SocketPhase,
    reconnect_pending: bool,
    disposed: bool,
    connected: Watch<bool>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, config: PushConfig) -> Self {
        Self {
            url: url.into(),
            config,
            state: ConnectionState::default(),
            socket: SocketPhase::None,
            reconnect_pending: false,
            disposed: false,
            connected: Watch::new(false),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn is_connecting(&self) -> bool {
        self.socket == SocketPhase::Opening
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.status == ConnectionStatus::Exhausted
    }

    pub fn connected(&self) -> WatchReader<bool> {
        self.connected.reader()
    }

    pub fn subscribe_connected<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&bool) + 'static,
    {
        self.connected.subscribe(listener)
    }

    pub fn connect(&mut self) -> Vec<ConnectionAction> {
        self.transition(ConnectionEvent::ConnectRequested)
    }

    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.transition(ConnectionEvent::DisconnectRequested)
    }

    pub fn transition(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        match event {
            ConnectionEvent::ConnectRequested => self.on_connect_requested(),
            ConnectionEvent::Opened => self.on_opened(),
            ConnectionEvent::Closed { code } => self.on_failure(code, None),
            ConnectionEvent::Errored { reason } => self.on_failure(None, Some(reason)),
            ConnectionEvent::RetryTimerFired => self.on_retry_timer(),
            ConnectionEvent::DisconnectRequested => self.on_disconnect(),
        }
    }

    fn on_connect_requested(&mut self) -> Vec<ConnectionAction> {
        if self.disposed || self.is_exhausted() {
            tracing::debug!(status = ?self.state.status, "Connect ignored");
            return Vec::new();
        }
        if self.socket != SocketPhase::None {
            tracing::debug!("Connect ignored; attempt already in flight");
            return Vec::new();
        }
        let mut actions = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(ConnectionAction::CancelReconnect);
        }
        actions.push(self.open());
        actions
    }

    fn open(&mut self) -> ConnectionAction {
        self.socket = SocketPhase::Opening;
        self.state.status = ConnectionStatus::Connecting;
        tracing::info!(
            url = %self.url,
            retry_count = self.state.retry_count,
            "Opening push channel"
        );
        ConnectionAction::Open {
            url: self.url.clone(),
        }
    }

    fn on_opened(&mut self) -> Vec<ConnectionAction> {
        if self.disposed {
            // Raced with teardown; close what just opened.
            return vec![ConnectionAction::Close {
                code: NORMAL_CLOSURE,
            }];
        }
        if self.socket != SocketPhase::Opening {
            return Vec::new();
        }
        self.socket = SocketPhase::Open;
        self.state.status = ConnectionStatus::Connected;
        self.state.retry_count = 0;
        tracing::info!(url = %self.url, "Push channel connected");
        self.connected.set(true);
        Vec::new()
    }

    /// Handles both `close` and `error`. Only the first failure reported for
    /// a given socket counts; a close that follows an error is ignored.
    fn on_failure(&mut self, code: Option<u16>, reason: Option<String>) -> Vec<ConnectionAction> {
        if self.socket == SocketPhase::None {
            return Vec::new();
        }
        self.socket = SocketPhase::None;
        self.connected.set(false);
        if code.is_some() {
            self.state.last_close_code = code;
        }

        if self.disposed || code == Some(NORMAL_CLOSURE) {
            self.state.status = ConnectionStatus::Disconnected;
            tracing::info!(code = ?code, "Push channel closed normally");
            return Vec::new();
        }

        self.state.retry_count = self.state.retry_count.saturating_add(1);
        if self.state.retry_count >= self.config.retry_budget {
            self.state.status = ConnectionStatus::Exhausted;
            tracing::warn!(
                retry_count = self.state.retry_count,
                code = ?code,
                reason = reason.as_deref().unwrap_or(""),
                "Push channel retry budget exhausted"
            );
            return Vec::new();
        }

        self.state.status = ConnectionStatus::Connecting;
        self.reconnect_pending = true;
        tracing::warn!(
            retry_count = self.state.retry_count,
            code = ?code,
            reason = reason.as_deref().unwrap_or(""),
            delay_ms = self.config.reconnect_delay_ms,
            "Push channel dropped; reconnect scheduled"
        );
        vec![ConnectionAction::ScheduleReconnect {
            delay_ms: self.config.reconnect_delay_ms,
        }]
    }

    fn on_retry_timer(&mut self) -> Vec<ConnectionAction> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        if self.disposed || self.is_exhausted() || self.socket != SocketPhase::None {
            return Vec::new();
        }
        vec![self.open()]
    }

    fn on_disconnect(&mut self) -> Vec<ConnectionAction> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;

        let mut actions = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(ConnectionAction::CancelReconnect);
        }
        if self.socket != SocketPhase::None {
            self.socket = SocketPhase::None;
            actions.push(ConnectionAction::Close {
                code: NORMAL_CLOSURE,
            });
        }
        if !self.is_exhausted() {
            self.state.status = ConnectionStatus::Disconnected;
        }
        self.connected.set(false);
        tracing::debug!("Push channel torn down");
        actions
    }
}
