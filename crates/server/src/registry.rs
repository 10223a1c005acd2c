//! Registry actor: the single owner of live sessions.
//!
//! All registry state lives in one tokio task. Sessions and HTTP handlers
//! talk to it through a cheap-to-clone `RegistryHandle` that sends
//! `RegistryCommand`s over an mpsc channel; queries carry a oneshot reply.
//! Commands apply in arrival order, so no locking of the maps is needed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chatrelay_protocol::ChatMessage;

pub use crate::registry_command::{RegistryCommand, RegistryStats};
use crate::session::{Session, SessionConfig};
use crate::upstream::UpstreamSender;

const COMMAND_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry is not running")]
    Stopped,
}

/// Handle to the running registry actor (cheap to Clone).
#[derive(Clone)]
pub struct RegistryHandle {
    command_tx: mpsc::Sender<RegistryCommand>,
    session_config: SessionConfig,
}

impl RegistryHandle {
    pub(crate) fn from_sender(
        command_tx: mpsc::Sender<RegistryCommand>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            command_tx,
            session_config,
        }
    }

    /// Mint a session for `user_id` and register it.
    pub async fn create_session(
        &self,
        user_id: impl Into<String>,
    ) -> Result<Arc<Session>, RegistryError> {
        let session = Arc::new(Session::new(user_id, self.session_config, self.clone()));
        self.command_tx
            .send(RegistryCommand::Register {
                session: Arc::clone(&session),
            })
            .await
            .map_err(|_| RegistryError::Stopped)?;
        Ok(session)
    }

    pub async fn unregister(&self, session_id: Uuid) {
        self.send(RegistryCommand::Unregister { session_id }).await;
    }

    pub async fn send_upstream(&self, message: ChatMessage, session_id: Uuid) {
        self.send(RegistryCommand::SendUpstream {
            message,
            session_id,
        })
        .await;
    }

    pub async fn find_by_id(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.query(|reply| RegistryCommand::FindById { session_id, reply })
            .await
            .flatten()
    }

    pub async fn find_by_user(&self, user_id: &str) -> Option<Arc<Session>> {
        let user_id = user_id.to_string();
        self.query(|reply| RegistryCommand::FindByUser { user_id, reply })
            .await
            .flatten()
    }

    pub async fn find_by_message(&self, message_id: &str) -> Option<Arc<Session>> {
        let message_id = message_id.to_string();
        self.query(|reply| RegistryCommand::FindByMessage { message_id, reply })
            .await
            .flatten()
    }

    pub async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        self.query(|reply| RegistryCommand::Stats { reply })
            .await
            .ok_or(RegistryError::Stopped)
    }

    /// Send a command to the actor (fire-and-forget).
    async fn send(&self, cmd: RegistryCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "registry",
                event = "registry.command.dropped",
                "Registry channel closed, command dropped"
            );
        }
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(build(tx)).await.is_err() {
            warn!(
                component = "registry",
                event = "registry.query.dropped",
                "Registry channel closed, query dropped"
            );
            return None;
        }
        rx.await.ok()
    }
}

struct RegisteredSession {
    session: Arc<Session>,
    /// Registration order, so "first match" lookups are stable.
    seq: u64,
}

struct IndexedMessage {
    message: ChatMessage,
    session_id: Uuid,
}

/// State owned by the registry task.
pub struct Registry {
    sessions: HashMap<Uuid, RegisteredSession>,
    messages: HashMap<String, IndexedMessage>,
    next_seq: u64,
    sender: Arc<dyn UpstreamSender>,
}

impl Registry {
    fn new(sender: Arc<dyn UpstreamSender>) -> Self {
        Self {
            sessions: HashMap::new(),
            messages: HashMap::new(),
            next_seq: 0,
            sender,
        }
    }

    /// Spawn the registry actor.
    ///
    /// The actor runs until `shutdown` fires and every session has
    /// unregistered, or `grace` elapses after `shutdown`, whichever is first.
    pub fn spawn(
        sender: Arc<dyn UpstreamSender>,
        session_config: SessionConfig,
        shutdown: CancellationToken,
        grace: Duration,
    ) -> (RegistryHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let registry = Registry::new(sender);
        let task = tokio::spawn(registry.run(command_rx, shutdown, grace));
        (RegistryHandle::from_sender(command_tx, session_config), task)
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<RegistryCommand>,
        shutdown: CancellationToken,
        grace: Duration,
    ) {
        info!(
            component = "registry",
            event = "registry.started",
            "Chat registry started"
        );

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => self.apply(cmd),
                    None => return,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        self.begin_drain();
        let deadline = tokio::time::Instant::now() + grace;
        while !self.sessions.is_empty() {
            match tokio::time::timeout_at(deadline, command_rx.recv()).await {
                Ok(Some(cmd)) => self.apply(cmd),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        component = "registry",
                        event = "registry.drain.timeout",
                        remaining = self.sessions.len(),
                        "Graceful timeout elapsed with sessions still live"
                    );
                    break;
                }
            }
        }

        info!(
            component = "registry",
            event = "registry.stopped",
            "Chat registry stopped"
        );
    }

    /// Ask attached sessions to close and drop the ones nobody connected to.
    fn begin_drain(&mut self) {
        let mut detached = Vec::new();
        for (id, entry) in &self.sessions {
            entry.session.shutdown();
            if !entry.session.is_attached() {
                detached.push(*id);
            }
        }
        for id in detached {
            self.remove_session(id);
        }
        info!(
            component = "registry",
            event = "registry.drain.started",
            remaining = self.sessions.len(),
            "Draining chat sessions"
        );
    }

    fn apply(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register { session } => {
                let seq = self.next_seq;
                self.next_seq += 1;
                info!(
                    component = "registry",
                    event = "registry.session.registered",
                    session_id = %session.id(),
                    user_id = %session.user_id(),
                    "Registering new chat"
                );
                self.sessions
                    .insert(session.id(), RegisteredSession { session, seq });
            }
            RegistryCommand::Unregister { session_id } => {
                if self.remove_session(session_id).is_none() {
                    debug!(
                        component = "registry",
                        event = "registry.session.unknown",
                        session_id = %session_id,
                        "Unregister for unknown chat"
                    );
                }
            }
            RegistryCommand::SendUpstream {
                message,
                session_id,
            } => self.send_upstream(message, session_id),
            RegistryCommand::FindById { session_id, reply } => {
                let _ = reply.send(self.find_by_id(session_id));
            }
            RegistryCommand::FindByUser { user_id, reply } => {
                let _ = reply.send(self.find_by_user(&user_id));
            }
            RegistryCommand::FindByMessage { message_id, reply } => {
                let _ = reply.send(self.find_by_message(&message_id));
            }
            RegistryCommand::Stats { reply } => {
                let _ = reply.send(RegistryStats {
                    sessions: self.sessions.len(),
                    messages: self.messages.len(),
                });
            }
        }
    }

    fn remove_session(&mut self, session_id: Uuid) -> Option<Arc<Session>> {
        let entry = self.sessions.remove(&session_id)?;
        entry.session.shutdown();
        let before = self.messages.len();
        self.messages
            .retain(|_, indexed| indexed.session_id != session_id);
        info!(
            component = "registry",
            event = "registry.session.unregistered",
            session_id = %session_id,
            purged_messages = before - self.messages.len(),
            "Unregistering chat"
        );
        Some(entry.session)
    }

    fn send_upstream(&mut self, message: ChatMessage, session_id: Uuid) {
        if !self.sessions.contains_key(&session_id) {
            warn!(
                component = "registry",
                event = "registry.send_upstream.session_gone",
                session_id = %session_id,
                message_id = %message.id,
                "Chat is gone, dropping message"
            );
            return;
        }

        if let Some(previous) = self.messages.get(&message.id) {
            if previous.session_id != session_id {
                warn!(
                    component = "registry",
                    event = "registry.message.id_reused",
                    message_id = %message.id,
                    previous_session_id = %previous.session_id,
                    session_id = %session_id,
                    "Message id reused by another chat, overwriting"
                );
            }
        }
        self.messages.insert(
            message.id.clone(),
            IndexedMessage {
                message: message.clone(),
                session_id,
            },
        );

        let sender = Arc::clone(&self.sender);
        tokio::spawn(async move {
            debug!(
                component = "registry",
                event = "upstream.send.started",
                session_id = %session_id,
                message_id = %message.id,
                "Sending message upstream"
            );
            match sender.send_message(&message).await {
                Ok(remote_id) => info!(
                    component = "registry",
                    event = "upstream.send.succeeded",
                    session_id = %session_id,
                    message_id = %message.id,
                    remote_id = %remote_id,
                    "Message sent upstream"
                ),
                Err(e) => error!(
                    component = "registry",
                    event = "upstream.send.failed",
                    session_id = %session_id,
                    message_id = %message.id,
                    error = %e,
                    "Failed to send message upstream"
                ),
            }
        });
    }

    fn find_by_id(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(&entry.session))
    }

    fn find_by_user(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .values()
            .filter(|entry| entry.session.user_id() == user_id)
            .min_by_key(|entry| entry.seq)
            .map(|entry| Arc::clone(&entry.session))
    }

    fn find_by_message(&self, message_id: &str) -> Option<Arc<Session>> {
        let indexed = self.messages.get(message_id)?;
        debug_assert_eq!(indexed.message.id, message_id);
        self.find_by_id(indexed.session_id)
    }
}
