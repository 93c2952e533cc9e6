//! Single-writer dispatcher.
//!
//! One tokio task owns the `Server` and applies commands from every
//! connection strictly in arrival order. Outbound messages are routed to
//! per-connection outboxes in the order the server produced them.

use std::collections::{HashMap, VecDeque};

use rookery_rules::RulesEngine;
use rookery_wire::{ClientMessage, ServerMessage};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::TransportError;
use crate::{ConnectionId, Outbound, Server};

/// Commands queued before the dispatcher applies backpressure.
pub const DISPATCH_QUEUE_DEPTH: usize = 1024;

/// Messages buffered for one connection before it counts as stalled.
pub const OUTBOX_DEPTH: usize = 256;

/// Per-connection queue of encoded-later server messages. A connection
/// whose outbox fills up is disconnected.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Work for the dispatcher.
#[derive(Debug)]
pub enum DispatchCommand {
    /// A transport connection opened.
    Open {
        fallback_session: Option<String>,
        outbox: Outbox,
        reply: oneshot::Sender<ConnectionId>,
    },
    /// A decoded client command.
    Inbound {
        conn: ConnectionId,
        message: ClientMessage,
    },
    /// The transport is gone.
    Closed { conn: ConnectionId },
}

/// Cloneable sender side of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    commands: mpsc::Sender<DispatchCommand>,
}

impl DispatchHandle {
    pub async fn open(
        &self,
        fallback_session: Option<String>,
        outbox: Outbox,
    ) -> Result<ConnectionId, TransportError> {
        let (reply, id) = oneshot::channel();
        self.send(DispatchCommand::Open {
            fallback_session,
            outbox,
            reply,
        })
        .await?;
        id.await.map_err(|_| TransportError::DispatcherGone)
    }

    pub async fn inbound(
        &self,
        conn: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), TransportError> {
        self.send(DispatchCommand::Inbound { conn, message }).await
    }

    pub async fn closed(&self, conn: ConnectionId) -> Result<(), TransportError> {
        self.send(DispatchCommand::Closed { conn }).await
    }

    async fn send(&self, command: DispatchCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::DispatcherGone)
    }
}

/// Owner of the server state.
pub struct Dispatcher<R> {
    server: Server<R>,
    outboxes: HashMap<ConnectionId, Outbox>,
    commands: mpsc::Receiver<DispatchCommand>,
}

impl<R: RulesEngine> Dispatcher<R> {
    pub fn new(server: Server<R>) -> (Self, DispatchHandle) {
        let (tx, rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
        let dispatcher = Self {
            server,
            outboxes: HashMap::new(),
            commands: rx,
        };
        (dispatcher, DispatchHandle { commands: tx })
    }

    /// Process commands until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.apply(command);
        }
        info!("dispatcher stopped");
    }

    pub fn apply(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::Open {
                fallback_session,
                outbox,
                reply,
            } => {
                let conn = self.server.accept_connection(fallback_session.as_deref());
                self.outboxes.insert(conn, outbox);
                if reply.send(conn).is_err() {
                    // The transport gave up before the reply; forget it.
                    self.outboxes.remove(&conn);
                    self.server.disconnect(conn);
                }
            }
            DispatchCommand::Inbound { conn, message } => {
                let out = self.server.handle(conn, message);
                self.route(out);
            }
            DispatchCommand::Closed { conn } => {
                self.outboxes.remove(&conn);
                let out = self.server.disconnect(conn);
                self.route(out);
            }
        }
    }

    fn route(&mut self, out: Vec<Outbound>) {
        let mut pending = VecDeque::from(out);
        while let Some(Outbound { to, message }) = pending.pop_front() {
            let kind = message.kind();
            let Some(outbox) = self.outboxes.get(&to) else {
                debug!(conn = to, event = kind, "no outbox, dropped");
                continue;
            };
            match outbox.try_send(message) {
                Ok(()) => debug!(conn = to, event = kind, "routed"),
                Err(TrySendError::Full(_)) => {
                    warn!(conn = to, event = kind, "outbox full, disconnecting");
                    // Dropping the outbox ends the writer, which closes the socket.
                    self.outboxes.remove(&to);
                    pending.extend(self.server.disconnect(to));
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn = to, event = kind, "outbox closed, dropped");
                }
            }
        }
    }

    pub fn server(&self) -> &Server<R> {
        &self.server
    }
}

/// Spawn the dispatcher on the current runtime.
pub fn spawn<R: RulesEngine>(server: Server<R>) -> (DispatchHandle, JoinHandle<()>) {
    let (dispatcher, handle) = Dispatcher::new(server);
    (handle, tokio::spawn(dispatcher.run()))
}
