//! Commands sent to the registry actor from sessions and HTTP handlers.

use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use chatrelay_protocol::ChatMessage;

use crate::session::Session;

/// Counters exposed for health checks and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub sessions: usize,
    pub messages: usize,
}

/// A command that can be sent to the registry actor.
pub enum RegistryCommand {
    // -- Mutations (fire-and-forget) --
    Register {
        session: Arc<Session>,
    },
    Unregister {
        session_id: Uuid,
    },
    /// Index `message` under its id and dispatch it to the provider.
    SendUpstream {
        message: ChatMessage,
        session_id: Uuid,
    },

    // -- Queries (use oneshot reply channels) --
    FindById {
        session_id: Uuid,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    /// First live session registered for `user_id`.
    FindByUser {
        user_id: String,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    /// Session that sent the message with `message_id`.
    FindByMessage {
        message_id: String,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}
