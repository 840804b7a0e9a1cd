//! Connection lifecycle: connect, announce, heartbeat, reconnect.

use chatty_shared::api::ws::{ClientAction, ClientFrame};
use chatty_shared::codec::serialize_envelope;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use super::{Command, Session, SessionState};
use crate::error::{ClientError, TransportError};
use crate::transport::{Link, LinkEvent};

/// How a connected period ended.
enum LinkOutcome {
    Closed,
    Failed(String),
    Shutdown,
}

impl Session {
    pub(crate) async fn run(mut self) {
        loop {
            self.set_state(SessionState::Connecting);
            let link = match self.connect().await {
                None => break,
                Some(Ok(link)) => link,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "relay connection failed");
                    self.set_state(SessionState::Error);
                    if self.wait_before_reconnect().await {
                        continue;
                    }
                    break;
                }
            };

            match self.run_connected(link).await {
                LinkOutcome::Closed => {
                    tracing::info!("relay closed the connection");
                    self.set_state(SessionState::Disconnected);
                }
                LinkOutcome::Failed(reason) => {
                    tracing::warn!(reason = %reason, "relay connection broke");
                    self.set_state(SessionState::Error);
                }
                LinkOutcome::Shutdown => break,
            }

            if !self.wait_before_reconnect().await {
                break;
            }
        }

        self.set_state(SessionState::Disconnected);
        if let Err(e) = self.conversations.sync().await {
            tracing::warn!(error = %e, "conversations not fully saved at shutdown");
        }
        tracing::info!("session stopped");
    }

    /// Open a fresh link while still serving commands. `None` means the
    /// session is shutting down.
    async fn connect(&mut self) -> Option<Result<Link, TransportError>> {
        let connector = self.connector.clone();
        let connecting = connector.connect();
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => return Some(result),
                command = self.commands.recv() => {
                    if !self.serve(command).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep out the reconnect delay while serving commands. Returns `false`
    /// if the session should stop instead of reconnecting.
    async fn wait_before_reconnect(&mut self) -> bool {
        let delay = tokio::time::sleep(self.timing.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = self.commands.recv() => {
                    if !self.serve(command).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_connected(&mut self, link: Link) -> LinkOutcome {
        let (outbound, mut inbound, _pumps) = link.into_parts();
        self.outbound = Some(outbound);
        self.set_state(SessionState::Connected);
        self.announce();

        // First tick fires immediately, so a ping goes out right after the
        // announcements.
        let mut heartbeat = tokio::time::interval(self.timing.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(LinkEvent::Frame(text)) => self.handle_frame(&text).await,
                    Some(LinkEvent::Closed) | None => break LinkOutcome::Closed,
                    Some(LinkEvent::Failed(reason)) => break LinkOutcome::Failed(reason),
                },
                command = self.commands.recv() => {
                    if !self.serve(command).await {
                        break LinkOutcome::Shutdown;
                    }
                }
                _ = heartbeat.tick() => {
                    self.ping();
                    self.expire_key_requests();
                }
            }
        };

        self.outbound = None;
        self.last_ping = None;
        outcome
    }

    /// Authenticate, publish our keys, and re-send fetches that were still
    /// outstanding when the previous link went away.
    fn announce(&mut self) {
        let uid = self.identity.user_id();
        if let Err(e) = self.transmit(&ClientFrame::Auth { uid }) {
            tracing::warn!(error = %e, "failed to send auth frame");
        }

        match self.identity.encrypt_public_key().to_base64() {
            Ok(key) => {
                if let Err(e) = self.transmit_action(ClientAction::UpdatePub { key }) {
                    tracing::warn!(error = %e, "failed to announce encryption key");
                }
            }
            Err(e) => tracing::error!(error = %e, "cannot encode encryption key"),
        }

        let key = self.identity.sign_public_key().to_base64();
        if let Err(e) = self.transmit_action(ClientAction::UpdateSign { key }) {
            tracing::warn!(error = %e, "failed to announce signing key");
        }

        let now = Instant::now().into_std();
        for uid in self.encrypt_keys.pending().outstanding() {
            if let Err(e) = self.transmit_action(ClientAction::GetPub { uid }) {
                tracing::warn!(peer = %uid, error = %e, "failed to re-request encryption key");
            }
        }
        self.encrypt_keys.pending_mut().refresh(now);

        for target in self.sign_requests.outstanding() {
            if let Err(e) = self.transmit_action(ClientAction::GetSignPub { target }) {
                tracing::warn!(peer = %target, error = %e, "failed to re-request signing key");
            }
        }
        self.sign_requests.refresh(now);
    }

    fn ping(&mut self) {
        match self.transmit_action(ClientAction::Ping) {
            Ok(()) => self.last_ping = Some(Instant::now()),
            Err(e) => tracing::debug!(error = %e, "heartbeat ping not sent"),
        }
    }

    pub(crate) fn on_pong(&mut self) {
        let Some(sent) = self.last_ping.take() else {
            tracing::debug!("pong without outstanding ping");
            return;
        };
        let latency = sent.elapsed();
        self.latency.send_replace(Some(latency));
        tracing::trace!(latency_ms = latency.as_millis() as u64, "heartbeat");
    }

    /// Queue a frame on the current link. Fails with `NotConnected` when
    /// there is none; never blocks.
    pub(crate) fn transmit<T: Serialize>(&self, frame: &T) -> Result<(), ClientError> {
        let outbound = self.outbound.as_ref().ok_or(ClientError::NotConnected)?;
        let text = serialize_envelope(frame)?;
        outbound
            .try_send(text)
            .map_err(|_| ClientError::Transport(TransportError::Closed))
    }

    pub(crate) fn transmit_action(&self, action: ClientAction) -> Result<(), ClientError> {
        self.transmit(&ClientFrame::from(action))
    }

    /// Handle one command. Returns `false` when the session should stop.
    async fn serve(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Shutdown) => {
                tracing::info!("session shutdown requested");
                false
            }
            Some(command) => {
                self.handle_command(command).await;
                true
            }
            // Every handle is gone.
            None => false,
        }
    }
}
