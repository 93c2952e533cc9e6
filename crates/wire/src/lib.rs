//! Rookery Wire Protocol Types
//!
//! This crate defines the shared Protobuf message types exchanged between
//! game clients and the session server. One encoded envelope travels per
//! binary websocket frame:
//!
//! - `ClientMessage`: client → server commands
//! - `ServerMessage`: server → client events
//!
//! The game-record artifact produced at the end of a game lives here as
//! well so that every consumer decodes the same schema.

#![deny(unsafe_code)]

use prost::Message;
use rookery_rules::{AppliedMove, MoveRequest};

// ============================================================================
// Shared Payloads
// ============================================================================

/// Display name and rating supplied by a player at join.
#[derive(Clone, PartialEq, Message)]
pub struct PlayerInfo {
    #[prost(string, tag = "1")]
    pub username: String,

    #[prost(uint32, tag = "2")]
    pub rating: u32,
}

/// A move as requested by a client.
#[derive(Clone, PartialEq, Message)]
pub struct MoveCmd {
    /// Origin square (e.g. "e2").
    #[prost(string, tag = "1")]
    pub from: String,

    /// Destination square (e.g. "e4").
    #[prost(string, tag = "2")]
    pub to: String,

    /// Promotion hint: "q", "r", "b" or "n".
    #[prost(string, optional, tag = "3")]
    pub promotion: Option<String>,
}

/// A move as applied by the server.
#[derive(Clone, PartialEq, Message)]
pub struct MoveRecord {
    #[prost(string, tag = "1")]
    pub from: String,

    #[prost(string, tag = "2")]
    pub to: String,

    #[prost(string, optional, tag = "3")]
    pub promotion: Option<String>,

    /// Standard algebraic notation.
    #[prost(string, tag = "4")]
    pub san: String,
}

/// Remaining time per side in milliseconds.
#[derive(Clone, PartialEq, Message)]
pub struct Timers {
    #[prost(uint64, tag = "1")]
    pub white_ms: u64,

    #[prost(uint64, tag = "2")]
    pub black_ms: u64,
}

/// Identities seated at the board.
#[derive(Clone, PartialEq, Message)]
pub struct Players {
    #[prost(message, optional, tag = "1")]
    pub white: Option<PlayerInfo>,

    #[prost(message, optional, tag = "2")]
    pub black: Option<PlayerInfo>,
}

/// Full authoritative view of a session, identical for every recipient.
#[derive(Clone, PartialEq, Message)]
pub struct GameState {
    #[prost(string, tag = "1")]
    pub fen: String,

    /// Side to move: "w" or "b".
    #[prost(string, tag = "2")]
    pub turn: String,

    #[prost(bool, tag = "3")]
    pub is_check: bool,

    #[prost(bool, tag = "4")]
    pub is_checkmate: bool,

    #[prost(bool, tag = "5")]
    pub is_draw: bool,

    #[prost(bool, tag = "6")]
    pub is_stalemate: bool,

    #[prost(bool, tag = "7")]
    pub is_game_over: bool,

    /// SAN of every move played so far.
    #[prost(string, repeated, tag = "8")]
    pub move_history: Vec<String>,

    #[prost(message, optional, tag = "9")]
    pub timers: Option<Timers>,

    #[prost(message, optional, tag = "10")]
    pub players: Option<Players>,
}

// ============================================================================
// Client → Server
// ============================================================================

/// Join (or create) a session.
#[derive(Clone, PartialEq, Message)]
pub struct JoinGame {
    /// Empty means "use the connection's default session".
    #[prost(string, tag = "1")]
    pub session_id: String,

    #[prost(message, optional, tag = "2")]
    pub player_info: Option<PlayerInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Resign {}

#[derive(Clone, PartialEq, Message)]
pub struct OfferDraw {}

#[derive(Clone, PartialEq, Message)]
pub struct AcceptDraw {}

#[derive(Clone, PartialEq, Message)]
pub struct RequestRematch {}

#[derive(Clone, PartialEq, Message)]
pub struct AcceptRematch {}

/// Free-text chat from any session member.
#[derive(Clone, PartialEq, Message)]
pub struct ChatCmd {
    #[prost(string, tag = "1")]
    pub text: String,
}

/// Envelope for every client command.
#[derive(Clone, PartialEq, Message)]
pub struct ClientMessage {
    #[prost(oneof = "client_message::Command", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub command: Option<client_message::Command>,
}

pub mod client_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Command {
        #[prost(message, tag = "1")]
        JoinGame(super::JoinGame),
        #[prost(message, tag = "2")]
        Move(super::MoveCmd),
        #[prost(message, tag = "3")]
        Resign(super::Resign),
        #[prost(message, tag = "4")]
        OfferDraw(super::OfferDraw),
        #[prost(message, tag = "5")]
        AcceptDraw(super::AcceptDraw),
        #[prost(message, tag = "6")]
        RequestRematch(super::RequestRematch),
        #[prost(message, tag = "7")]
        AcceptRematch(super::AcceptRematch),
        #[prost(message, tag = "8")]
        Chat(super::ChatCmd),
    }
}

impl ClientMessage {
    /// Protocol name of the carried command, for logs.
    pub fn kind(&self) -> &'static str {
        use client_message::Command;
        match &self.command {
            Some(Command::JoinGame(_)) => "joinGame",
            Some(Command::Move(_)) => "move",
            Some(Command::Resign(_)) => "resign",
            Some(Command::OfferDraw(_)) => "offerDraw",
            Some(Command::AcceptDraw(_)) => "acceptDraw",
            Some(Command::RequestRematch(_)) => "requestRematch",
            Some(Command::AcceptRematch(_)) => "acceptRematch",
            Some(Command::Chat(_)) => "chatMessage",
            None => "empty",
        }
    }
}

// ============================================================================
// Server → Client
// ============================================================================

/// Role confirmation for a seated player.
#[derive(Clone, PartialEq, Message)]
pub struct PlayerRole {
    /// "white" or "black".
    #[prost(string, tag = "1")]
    pub role: String,

    /// "w" or "b".
    #[prost(string, tag = "2")]
    pub color: String,
}

/// Role confirmation for a spectator.
#[derive(Clone, PartialEq, Message)]
pub struct SpectatorRole {}

/// Both seats are filled; the game is on.
#[derive(Clone, PartialEq, Message)]
pub struct GameStart {}

/// An accepted move and the position it produced.
#[derive(Clone, PartialEq, Message)]
pub struct MoveMade {
    /// The move as played (`move` on the wire).
    #[prost(message, optional, tag = "1")]
    pub r#move: Option<MoveRecord>,

    #[prost(message, optional, tag = "2")]
    pub game_state: Option<GameState>,
}

/// Rejection sent to the originating connection only.
#[derive(Clone, PartialEq, Message)]
pub struct InvalidMove {
    #[prost(string, tag = "1")]
    pub reason: String,

    /// The rejected move, when the command was a move.
    #[prost(message, optional, tag = "2")]
    pub r#move: Option<MoveCmd>,
}

/// The named side is now in check.
#[derive(Clone, PartialEq, Message)]
pub struct Check {
    #[prost(string, tag = "1")]
    pub player: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct GameOver {
    /// "checkmate", "resignation" or "draw".
    #[prost(string, tag = "1")]
    pub result: String,

    /// "w" or "b"; absent for draws.
    #[prost(string, optional, tag = "2")]
    pub winner: Option<String>,

    /// Draw reason; absent otherwise.
    #[prost(string, optional, tag = "3")]
    pub reason: Option<String>,
}

/// Seat occupancy and audience size.
#[derive(Clone, PartialEq, Message)]
pub struct PlayersUpdate {
    #[prost(bool, tag = "1")]
    pub white: bool,

    #[prost(bool, tag = "2")]
    pub black: bool,

    #[prost(uint32, tag = "3")]
    pub spectators: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlayerDisconnected {
    /// "white", "black" or "spectator".
    #[prost(string, tag = "1")]
    pub role: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct DrawOffered {
    #[prost(string, tag = "1")]
    pub from: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RematchRequested {
    #[prost(string, tag = "1")]
    pub from: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct GameReset {
    #[prost(message, optional, tag = "1")]
    pub game_state: Option<GameState>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChatMessage {
    /// "white", "black" or "spectator".
    #[prost(string, tag = "1")]
    pub sender: String,

    #[prost(string, tag = "2")]
    pub message: String,

    /// RFC 3339, UTC.
    #[prost(string, tag = "3")]
    pub timestamp: String,
}

/// Envelope for every server event.
#[derive(Clone, PartialEq, Message)]
pub struct ServerMessage {
    #[prost(
        oneof = "server_message::Event",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14"
    )]
    pub event: Option<server_message::Event>,
}

pub mod server_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        PlayerRole(super::PlayerRole),
        #[prost(message, tag = "2")]
        SpectatorRole(super::SpectatorRole),
        #[prost(message, tag = "3")]
        GameState(super::GameState),
        #[prost(message, tag = "4")]
        GameStart(super::GameStart),
        #[prost(message, tag = "5")]
        MoveMade(super::MoveMade),
        #[prost(message, tag = "6")]
        InvalidMove(super::InvalidMove),
        #[prost(message, tag = "7")]
        Check(super::Check),
        #[prost(message, tag = "8")]
        GameOver(super::GameOver),
        #[prost(message, tag = "9")]
        PlayersUpdate(super::PlayersUpdate),
        #[prost(message, tag = "10")]
        PlayerDisconnected(super::PlayerDisconnected),
        #[prost(message, tag = "11")]
        DrawOffered(super::DrawOffered),
        #[prost(message, tag = "12")]
        RematchRequested(super::RematchRequested),
        #[prost(message, tag = "13")]
        GameReset(super::GameReset),
        #[prost(message, tag = "14")]
        ChatMessage(super::ChatMessage),
    }
}

impl ServerMessage {
    /// Protocol name of the carried event, for logs.
    pub fn kind(&self) -> &'static str {
        use server_message::Event;
        match &self.event {
            Some(Event::PlayerRole(_)) => "playerRole",
            Some(Event::SpectatorRole(_)) => "spectatorRole",
            Some(Event::GameState(_)) => "gameState",
            Some(Event::GameStart(_)) => "gameStart",
            Some(Event::MoveMade(_)) => "moveMade",
            Some(Event::InvalidMove(_)) => "invalidMove",
            Some(Event::Check(_)) => "check",
            Some(Event::GameOver(_)) => "gameOver",
            Some(Event::PlayersUpdate(_)) => "playersUpdate",
            Some(Event::PlayerDisconnected(_)) => "playerDisconnected",
            Some(Event::DrawOffered(_)) => "drawOffered",
            Some(Event::RematchRequested(_)) => "rematchRequested",
            Some(Event::GameReset(_)) => "gameReset",
            Some(Event::ChatMessage(_)) => "chatMessage",
            None => "empty",
        }
    }
}

// ============================================================================
// Game Record Artifact
// ============================================================================

/// One accepted move in a finished game.
#[derive(Clone, PartialEq, Message)]
pub struct RecordedMoveProto {
    #[prost(string, tag = "1")]
    pub uci: String,

    #[prost(string, tag = "2")]
    pub san: String,

    /// Position notation after the move.
    #[prost(string, tag = "3")]
    pub resulting_position: String,

    /// Server time the move was accepted (ms since epoch).
    #[prost(uint64, tag = "4")]
    pub timestamp_ms: u64,
}

/// Complete record of one finished game.
#[derive(Clone, PartialEq, Message)]
pub struct GameRecordProto {
    /// Schema version (starts at 1).
    #[prost(uint32, tag = "1")]
    pub record_format_version: u32,

    #[prost(string, tag = "2")]
    pub session_id: String,

    /// Position notation before the first move.
    #[prost(string, tag = "3")]
    pub initial_position: String,

    #[prost(message, repeated, tag = "4")]
    pub moves: Vec<RecordedMoveProto>,

    /// "checkmate", "resignation" or "draw".
    #[prost(string, tag = "5")]
    pub result: String,

    #[prost(string, optional, tag = "6")]
    pub winner: Option<String>,

    #[prost(string, optional, tag = "7")]
    pub reason: Option<String>,

    #[prost(message, optional, tag = "8")]
    pub white: Option<PlayerInfo>,

    #[prost(message, optional, tag = "9")]
    pub black: Option<PlayerInfo>,
}

// ============================================================================
// Conversion Traits
// ============================================================================

macro_rules! into_envelope {
    ($envelope:ident . $field:ident => $module:ident :: $oneof:ident { $($variant:ident($payload:ty)),* $(,)? }) => {
        $(
            impl From<$payload> for $envelope {
                fn from(payload: $payload) -> Self {
                    Self {
                        $field: Some($module::$oneof::$variant(payload)),
                    }
                }
            }
        )*
    };
}

into_envelope!(ClientMessage.command => client_message::Command {
    JoinGame(JoinGame),
    Move(MoveCmd),
    Resign(Resign),
    OfferDraw(OfferDraw),
    AcceptDraw(AcceptDraw),
    RequestRematch(RequestRematch),
    AcceptRematch(AcceptRematch),
    Chat(ChatCmd),
});

into_envelope!(ServerMessage.event => server_message::Event {
    PlayerRole(PlayerRole),
    SpectatorRole(SpectatorRole),
    GameState(GameState),
    GameStart(GameStart),
    MoveMade(MoveMade),
    InvalidMove(InvalidMove),
    Check(Check),
    GameOver(GameOver),
    PlayersUpdate(PlayersUpdate),
    PlayerDisconnected(PlayerDisconnected),
    DrawOffered(DrawOffered),
    RematchRequested(RematchRequested),
    GameReset(GameReset),
    ChatMessage(ChatMessage),
});

impl From<&AppliedMove> for MoveRecord {
    fn from(m: &AppliedMove) -> Self {
        Self {
            from: m.from.clone(),
            to: m.to.clone(),
            promotion: m.promotion.map(String::from),
            san: m.san.clone(),
        }
    }
}

impl From<&MoveCmd> for MoveRequest {
    fn from(cmd: &MoveCmd) -> Self {
        Self {
            from: cmd.from.clone(),
            to: cmd.to.clone(),
            promotion: cmd.promotion.as_deref().and_then(|p| p.chars().next()),
        }
    }
}

impl From<&MoveRequest> for MoveCmd {
    fn from(request: &MoveRequest) -> Self {
        Self {
            from: request.from.clone(),
            to: request.to.clone(),
            promotion: request.promotion.map(String::from),
        }
    }
}

/// Encode an envelope for one binary frame.
pub fn encode_frame<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

// ============================================================================
// Tests
// ============================================================================
