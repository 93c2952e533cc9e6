//! Connection Handler.
//!
//! Binds a transport connection to a session and a role, dispatches its
//! commands and handles its departure.

use rookery_rules::{MoveRequest, RulesEngine};
use rookery_wire::client_message::Command;
use rookery_wire::{
    ClientMessage, GameStart, InvalidMove, JoinGame, MoveCmd, PlayerDisconnected, PlayerRole,
    SpectatorRole,
};
use tracing::{debug, info, warn};

use crate::arbiter::{self, Rejection};
use crate::negotiation;
use crate::session::{Phase, PlayerIdentity, Role, Session, SessionId};
use crate::{ConnectionContext, ConnectionId, Outbound, Server};

impl<R: RulesEngine> Server<R> {
    /// Process one inbound command. Rejections go to the sender only.
    pub fn handle(&mut self, conn: ConnectionId, message: ClientMessage) -> Vec<Outbound> {
        let kind = message.kind();
        let mut attempted: Option<MoveCmd> = None;

        let result = match message.command {
            None => Err(Rejection::EmptyCommand),
            Some(Command::JoinGame(join)) => self.join(conn, join),
            Some(Command::Move(cmd)) => {
                let request = MoveRequest::from(&cmd);
                attempted = Some(cmd);
                self.with_session(conn, |session, role, now| {
                    arbiter::play_move(session, role, &request, now)
                })
            }
            Some(Command::Resign(_)) => {
                self.with_session(conn, |session, role, now| negotiation::resign(session, role, now))
            }
            Some(Command::OfferDraw(_)) => {
                let policy = self.config.offer_policy;
                self.with_session(conn, |session, role, _| {
                    negotiation::offer_draw(session, role, policy)
                })
            }
            Some(Command::AcceptDraw(_)) => {
                let policy = self.config.offer_policy;
                self.with_session(conn, |session, role, now| {
                    negotiation::accept_draw(session, role, policy, now)
                })
            }
            Some(Command::RequestRematch(_)) => {
                let policy = self.config.offer_policy;
                self.with_session(conn, |session, role, _| {
                    negotiation::request_rematch(session, role, policy)
                })
            }
            Some(Command::AcceptRematch(_)) => {
                let policy = self.config.offer_policy;
                self.with_session(conn, |session, role, now| {
                    negotiation::accept_rematch(session, role, policy, now)
                })
            }
            Some(Command::Chat(chat)) => self.with_session(conn, |session, role, now| {
                Ok(negotiation::chat(session, role, chat.text, now))
            }),
        };

        match result {
            Ok(out) => out,
            Err(rejection) => {
                warn!(conn, command = kind, reason = %rejection, "command rejected");
                vec![Outbound {
                    to: conn,
                    message: InvalidMove {
                        reason: rejection.to_string(),
                        r#move: attempted,
                    }
                    .into(),
                }]
            }
        }
    }

    /// Run `f` against the sender's session and role.
    fn with_session<F>(&mut self, conn: ConnectionId, f: F) -> Result<Vec<Outbound>, Rejection>
    where
        F: FnOnce(&mut Session<R>, Role, u64) -> Result<Vec<Outbound>, Rejection>,
    {
        let context = self.context(conn).cloned().ok_or(Rejection::NotJoined)?;
        let now = self.time.now_ms();
        let session = self
            .registry
            .get_mut(&context.session_id)
            .ok_or(Rejection::NotJoined)?;
        f(session, context.role, now)
    }

    fn join(&mut self, conn: ConnectionId, join: JoinGame) -> Result<Vec<Outbound>, Rejection> {
        let connection = self.connections.get(&conn).ok_or(Rejection::NotJoined)?;
        if connection.context.is_some() {
            return Err(Rejection::AlreadyJoined);
        }

        let session_id = SessionId::parse(&join.session_id)
            .or_else(|| connection.fallback_session.clone())
            .unwrap_or_else(|| self.default_session.clone());
        let identity = PlayerIdentity::from_info(join.player_info.as_ref());
        let now = self.time.now_ms();

        let session = self.registry.get_or_create(&session_id);
        let name = identity.display_name.clone();
        let role = session.admit(conn, identity);
        info!(conn, session = %session_id, role = role.name(), player = %name, "joined");

        let mut out = vec![Outbound {
            to: conn,
            message: match role.side() {
                Some(side) => PlayerRole {
                    role: side.name().to_string(),
                    color: side.code().to_string(),
                }
                .into(),
                None => SpectatorRole {}.into(),
            },
        }];
        out.push(Outbound {
            to: conn,
            message: session.game_state().into(),
        });
        out.extend(session.broadcast(session.players_update()));

        if role != Role::Spectator && session.both_seated() {
            match session.phase {
                Phase::WaitingForPlayers => {
                    session.phase = Phase::Active;
                    session.clock.start(now);
                    info!(session = %session_id, "game started");
                    out.extend(session.broadcast(GameStart {}));
                }
                Phase::Active => {
                    session.clock.resume(now);
                    debug!(session = %session_id, "seat reclaimed, clock resumed");
                }
                Phase::Finished => {}
            }
        }

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.context = Some(ConnectionContext { session_id, role });
        }
        Ok(out)
    }

    /// Transport loss or close. Never fails.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Vec<Outbound> {
        let Some(connection) = self.connections.remove(&conn) else {
            return Vec::new();
        };
        let Some(context) = connection.context else {
            debug!(conn, "connection closed before joining");
            return Vec::new();
        };
        let now = self.time.now_ms();
        let Some(session) = self.registry.get_mut(&context.session_id) else {
            return Vec::new();
        };

        let Some(role) = session.vacate(conn) else {
            return Vec::new();
        };
        info!(conn, session = %context.session_id, role = role.name(), "disconnected");

        if let Some(side) = role.side() {
            if session.phase == Phase::Active {
                session.clock.pause(now);
            }
            session.offers.withdraw_from(side);
        }

        let mut out = session.broadcast(PlayerDisconnected {
            role: role.name().to_string(),
        });
        out.extend(session.broadcast(session.players_update()));

        if session.is_empty() {
            self.registry.remove(&context.session_id);
        }
        out
    }
}
