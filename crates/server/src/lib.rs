//! Rookery Session Server
//!
//! The server coordinates two-player board-game sessions plus spectators
//! over persistent websocket connections. It owns:
//! - The session registry (lazy creation, removal when empty)
//! - Role assignment and the per-connection context
//! - Turn arbitration (legality is delegated to a `RulesEngine`)
//! - Clock accounting
//! - Resign, draw, rematch and chat flows
//! - Game records for finished games
//!
//! # Architecture
//!
//! `Server` is a synchronous state machine: every operation takes
//! `&mut self` and returns the ordered list of messages to deliver. The
//! `dispatch` module runs it as a single-writer task, so commands from all
//! connections are processed one at a time in arrival order. The
//! `transport` module owns sockets and never touches session state.

#![deny(unsafe_code)]

pub mod arbiter;
pub mod clock;
pub mod dispatch;
mod handler;
pub mod negotiation;
pub mod registry;
pub mod session;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use rookery_rules::{ChessRules, RulesEngine};
use rookery_wire::ServerMessage;

pub use arbiter::Rejection;
use clock::{SystemTime, TimeSource};
use registry::SessionRegistry;
use session::{Role, Session, SessionId};

// ============================================================================
// Parameters
// ============================================================================

/// Starting allotment per side in milliseconds.
pub const INITIAL_CLOCK_MS: u64 = 600_000;

/// Session joined when neither the command nor the connection names one.
pub const DEFAULT_SESSION_ID: &str = "default";

// ============================================================================
// Configuration
// ============================================================================

/// How draw and rematch accepts are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OfferPolicy {
    /// Accepts are honored without a prior offer.
    #[default]
    Trusting,
    /// Accepts must answer the opponent's outstanding offer.
    Verified,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub initial_clock_ms: u64,
    pub offer_policy: OfferPolicy,
    pub default_session_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            initial_clock_ms: INITIAL_CLOCK_MS,
            offer_policy: OfferPolicy::default(),
            default_session_id: DEFAULT_SESSION_ID.to_string(),
        }
    }
}

// ============================================================================
// Connections
// ============================================================================

/// Transport connection identifier (server-internal).
pub type ConnectionId = u64;

/// One message for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: ConnectionId,
    pub message: ServerMessage,
}

/// Session and role bound to a connection at join. Never changes after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub session_id: SessionId,
    pub role: Role,
}

#[derive(Debug, Clone)]
struct Connection {
    /// Session named by the transport (request path), if any.
    fallback_session: Option<SessionId>,
    context: Option<ConnectionContext>,
}

// ============================================================================
// Server State
// ============================================================================

/// Session coordination state for every connection and session.
pub struct Server<R = ChessRules> {
    config: ServerConfig,
    default_session: SessionId,
    registry: SessionRegistry<R>,
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,
    time: Arc<dyn TimeSource>,
}

impl Server<ChessRules> {
    /// Standard chess server on the system clock.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_rules(config)
    }
}

impl<R: RulesEngine> Server<R> {
    /// Server for any rules engine, on the system clock.
    pub fn with_rules(config: ServerConfig) -> Self {
        Self::with_time_source(config, Arc::new(SystemTime))
    }

    pub fn with_time_source(config: ServerConfig, time: Arc<dyn TimeSource>) -> Self {
        let default_session = SessionId::parse(&config.default_session_id).unwrap_or_default();

        Self {
            registry: SessionRegistry::new(config.initial_clock_ms),
            default_session,
            connections: HashMap::new(),
            next_connection_id: 1,
            time,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a new transport connection.
    ///
    /// `fallback_session` is the session the transport derived for it
    /// (request path), used when `joinGame` names none.
    pub fn accept_connection(&mut self, fallback_session: Option<&str>) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(
            id,
            Connection {
                fallback_session: fallback_session.and_then(SessionId::parse),
                context: None,
            },
        );
        id
    }

    /// Context of a joined connection.
    pub fn context(&self, conn: ConnectionId) -> Option<&ConnectionContext> {
        self.connections
            .get(&conn)
            .and_then(|connection| connection.context.as_ref())
    }

    pub fn session(&self, id: &str) -> Option<&Session<R>> {
        self.registry.get(&SessionId::parse(id)?)
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
