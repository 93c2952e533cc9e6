//! Session state.
//!
//! A Session is one game room: seats, spectators, move log, clocks and
//! phase. It is owned by the registry and mutated only by the handler,
//! the arbiter and the negotiation flows.

use std::collections::BTreeSet;

use rookery_record::{MoveLog, RecordHeader, RecordOutcome, finalize, record_digest};
use rookery_rules::{RulesEngine, Side};
use rookery_wire::{
    GameOver, GameRecordProto, GameState, PlayerInfo, Players, PlayersUpdate, ServerMessage, Timers,
};
use tracing::info;

use crate::clock::ClockAccountant;
use crate::{ConnectionId, Outbound};

/// Display name used when a joiner supplies none.
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Rating used when a joiner supplies none.
pub const DEFAULT_RATING: u32 = 1200;

// ============================================================================
// Identifiers and Roles
// ============================================================================

/// Session identifier (opaque, never blank).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Trimmed id, or `None` when blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self(crate::DEFAULT_SESSION_ID.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connection's participation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    White,
    Black,
    Spectator,
}

impl Role {
    pub fn side(self) -> Option<Side> {
        match self {
            Self::White => Some(Side::White),
            Self::Black => Some(Side::Black),
            Self::Spectator => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
            Self::Spectator => "spectator",
        }
    }
}

impl From<Side> for Role {
    fn from(side: Side) -> Self {
        match side {
            Side::White => Self::White,
            Side::Black => Self::Black,
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForPlayers,
    Active,
    Finished,
}

/// Name and rating attached to a seat for the session's duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub display_name: String,
    pub rating: u32,
}

impl PlayerIdentity {
    /// Identity from the join payload, filling in anonymous defaults.
    pub fn from_info(info: Option<&PlayerInfo>) -> Self {
        match info {
            Some(info) if !info.username.trim().is_empty() => Self {
                display_name: info.username.trim().to_string(),
                rating: info.rating,
            },
            Some(info) => Self {
                display_name: ANONYMOUS_NAME.to_string(),
                rating: if info.rating == 0 { DEFAULT_RATING } else { info.rating },
            },
            None => Self::default(),
        }
    }
}

impl Default for PlayerIdentity {
    fn default() -> Self {
        Self {
            display_name: ANONYMOUS_NAME.to_string(),
            rating: DEFAULT_RATING,
        }
    }
}

impl From<&PlayerIdentity> for PlayerInfo {
    fn from(identity: &PlayerIdentity) -> Self {
        Self {
            username: identity.display_name.clone(),
            rating: identity.rating,
        }
    }
}

/// What an outstanding offer asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferKind {
    Draw,
    Rematch,
}

/// Outstanding draw offer or rematch request (verified policy only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOffer {
    pub from: Side,
    pub kind: OfferKind,
}

/// At most one outstanding offer per kind. A draw offer and a rematch
/// request never displace each other; a repeat of the same kind replaces
/// the earlier one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingOffers {
    draw: Option<Side>,
    rematch: Option<Side>,
}

impl PendingOffers {
    fn slot(&mut self, kind: OfferKind) -> &mut Option<Side> {
        match kind {
            OfferKind::Draw => &mut self.draw,
            OfferKind::Rematch => &mut self.rematch,
        }
    }

    /// Offering side for `kind`, if any.
    pub fn get(&self, kind: OfferKind) -> Option<Side> {
        match kind {
            OfferKind::Draw => self.draw,
            OfferKind::Rematch => self.rematch,
        }
    }

    pub fn record(&mut self, offer: PendingOffer) {
        *self.slot(offer.kind) = Some(offer.from);
    }

    /// Remove `offer` if it is the one outstanding. Returns whether it was.
    pub fn take(&mut self, offer: PendingOffer) -> bool {
        let slot = self.slot(offer.kind);
        if *slot == Some(offer.from) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn withdraw(&mut self, kind: OfferKind) {
        *self.slot(kind) = None;
    }

    /// Drop every offer made by `side`.
    pub fn withdraw_from(&mut self, side: Side) {
        for kind in [OfferKind::Draw, OfferKind::Rematch] {
            let slot = self.slot(kind);
            if *slot == Some(side) {
                *slot = None;
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.draw.is_none() && self.rematch.is_none()
    }
}

/// How a game ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEnding {
    Checkmate { winner: Side },
    Resignation { winner: Side },
    Draw { reason: String },
}

impl GameEnding {
    pub fn result(&self) -> &'static str {
        match self {
            Self::Checkmate { .. } => "checkmate",
            Self::Resignation { .. } => "resignation",
            Self::Draw { .. } => "draw",
        }
    }

    pub fn winner(&self) -> Option<Side> {
        match self {
            Self::Checkmate { winner } | Self::Resignation { winner } => Some(*winner),
            Self::Draw { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Draw { reason } => Some(reason),
            _ => None,
        }
    }
}

impl From<&GameEnding> for GameOver {
    fn from(ending: &GameEnding) -> Self {
        Self {
            result: ending.result().to_string(),
            winner: ending.winner().map(|side| side.code().to_string()),
            reason: ending.reason().map(str::to_string),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone)]
struct Seat {
    conn: ConnectionId,
    identity: PlayerIdentity,
}

/// Authoritative per-room state.
#[derive(Debug, Clone)]
pub struct Session<R> {
    id: SessionId,
    pub(crate) rules: R,
    initial_position: String,
    white: Option<Seat>,
    black: Option<Seat>,
    spectators: BTreeSet<ConnectionId>,
    pub(crate) moves: MoveLog,
    pub(crate) clock: ClockAccountant,
    pub(crate) phase: Phase,
    pub(crate) offers: PendingOffers,
    last_record: Option<GameRecordProto>,
}

impl<R: RulesEngine> Session<R> {
    pub fn new(id: SessionId, initial_clock_ms: u64) -> Self {
        let rules = R::default();
        Self {
            id,
            initial_position: rules.position_notation(),
            rules,
            white: None,
            black: None,
            spectators: BTreeSet::new(),
            moves: MoveLog::new(),
            clock: ClockAccountant::new(initial_clock_ms),
            phase: Phase::WaitingForPlayers,
            offers: PendingOffers::default(),
            last_record: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn move_log(&self) -> &MoveLog {
        &self.moves
    }

    pub fn clock(&self) -> &ClockAccountant {
        &self.clock
    }

    pub fn offers(&self) -> &PendingOffers {
        &self.offers
    }

    /// Record of the last finished game, kept until a rematch.
    pub fn last_record(&self) -> Option<&GameRecordProto> {
        self.last_record.as_ref()
    }

    // ------------------------------------------------------------------------
    // Seats
    // ------------------------------------------------------------------------

    fn seat(&self, side: Side) -> Option<&Seat> {
        match side {
            Side::White => self.white.as_ref(),
            Side::Black => self.black.as_ref(),
        }
    }

    fn seat_mut(&mut self, side: Side) -> &mut Option<Seat> {
        match side {
            Side::White => &mut self.white,
            Side::Black => &mut self.black,
        }
    }

    /// Connection seated on `side`, if any.
    pub fn holder(&self, side: Side) -> Option<ConnectionId> {
        self.seat(side).map(|seat| seat.conn)
    }

    pub fn identity(&self, side: Side) -> Option<&PlayerIdentity> {
        self.seat(side).map(|seat| &seat.identity)
    }

    pub fn both_seated(&self) -> bool {
        self.white.is_some() && self.black.is_some()
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    /// No seat held and no spectator left.
    pub fn is_empty(&self) -> bool {
        self.white.is_none() && self.black.is_none() && self.spectators.is_empty()
    }

    /// Seat a joiner: first free seat (White before Black), else spectator.
    pub fn admit(&mut self, conn: ConnectionId, identity: PlayerIdentity) -> Role {
        for side in [Side::White, Side::Black] {
            let seat = self.seat_mut(side);
            if seat.is_none() {
                *seat = Some(Seat { conn, identity });
                return side.into();
            }
        }
        self.spectators.insert(conn);
        Role::Spectator
    }

    /// Remove a connection from its seat or from the audience.
    pub fn vacate(&mut self, conn: ConnectionId) -> Option<Role> {
        for side in [Side::White, Side::Black] {
            let seat = self.seat_mut(side);
            if seat.as_ref().is_some_and(|s| s.conn == conn) {
                *seat = None;
                return Some(side.into());
            }
        }
        self.spectators.remove(&conn).then_some(Role::Spectator)
    }

    // ------------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------------

    /// Every member in broadcast order: White, Black, then spectators.
    pub fn members(&self) -> Vec<ConnectionId> {
        self.white
            .iter()
            .chain(self.black.iter())
            .map(|seat| seat.conn)
            .chain(self.spectators.iter().copied())
            .collect()
    }

    pub fn broadcast(&self, message: impl Into<ServerMessage>) -> Vec<Outbound> {
        let message = message.into();
        self.members()
            .into_iter()
            .map(|to| Outbound {
                to,
                message: message.clone(),
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    pub fn players_update(&self) -> PlayersUpdate {
        PlayersUpdate {
            white: self.white.is_some(),
            black: self.black.is_some(),
            spectators: u32::try_from(self.spectators.len()).unwrap_or(u32::MAX),
        }
    }

    /// Full state, identical for every recipient.
    pub fn game_state(&self) -> GameState {
        let flags = self.rules.status_flags();
        GameState {
            fen: self.rules.position_notation(),
            turn: self.moves.side_to_move().code().to_string(),
            is_check: flags.is_check,
            is_checkmate: flags.is_checkmate,
            is_draw: flags.is_draw(),
            is_stalemate: flags.is_stalemate,
            is_game_over: self.phase == Phase::Finished || flags.is_game_over(),
            move_history: self.moves.san_history(),
            timers: Some(Timers {
                white_ms: self.clock.remaining(Side::White),
                black_ms: self.clock.remaining(Side::Black),
            }),
            players: Some(Players {
                white: self.identity(Side::White).map(PlayerInfo::from),
                black: self.identity(Side::Black).map(PlayerInfo::from),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Enter Finished, stop the clock, keep the record and announce the
    /// result to every member.
    pub fn finish(&mut self, ending: GameEnding, now: u64) -> Vec<Outbound> {
        self.phase = Phase::Finished;
        self.clock.pause(now);
        self.offers.withdraw(OfferKind::Draw);

        let header = RecordHeader {
            session_id: self.id.to_string(),
            initial_position: self.initial_position.clone(),
            white: self.identity(Side::White).map(PlayerInfo::from),
            black: self.identity(Side::Black).map(PlayerInfo::from),
        };
        let outcome = RecordOutcome {
            result: ending.result().to_string(),
            winner: ending.winner(),
            reason: ending.reason().map(str::to_string),
        };
        let record = finalize(&self.moves, header, outcome);
        info!(
            session = %self.id,
            result = ending.result(),
            winner = ending.winner().map(Side::code),
            moves = record.moves.len(),
            digest = %record_digest(&record),
            "game over"
        );
        self.last_record = Some(record);

        self.broadcast(GameOver::from(&ending))
    }

    /// Fresh board, empty log, full clocks, Active.
    pub fn reset(&mut self, now: u64) {
        self.rules = R::default();
        self.initial_position = self.rules.position_notation();
        self.moves.clear();
        self.clock.reset(now);
        self.phase = Phase::Active;
        self.offers.clear();
        self.last_record = None;
    }
}
