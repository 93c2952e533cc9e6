//! Rookery Rules Engine
//!
//! This crate defines the capability contract the session layer uses to
//! talk to a board-game rules engine, plus the standard chess
//! implementation backed by `shakmaty`.
//!
//! # Architecture Constraints
//!
//! A rules engine MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Know about connections, roles or clocks
//!
//! The engine is authoritative on legality and derived position status.
//! Turn ownership and sequencing belong to the session layer.

#![deny(unsafe_code)]

mod standard;

use thiserror::Error;

pub use standard::ChessRules;

// ============================================================================
// Sides
// ============================================================================

/// One of the two seats at the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The other side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    /// Single-letter code used on the wire (`"w"` / `"b"`).
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::White => "w",
            Self::Black => "b",
        }
    }

    /// Lowercase name (`"white"` / `"black"`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
        }
    }

    /// Side to move after `moves_played` half-moves from the start.
    ///
    /// Even counts mean White is to move.
    #[must_use]
    pub const fn to_move_after(moves_played: usize) -> Self {
        if moves_played % 2 == 0 {
            Self::White
        } else {
            Self::Black
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Moves
// ============================================================================

/// A move as submitted by a client: origin, destination and an optional
/// promotion hint (`q`, `r`, `b`, `n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
    pub promotion: Option<char>,
}

impl MoveRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, promotion: char) -> Self {
        self.promotion = Some(promotion);
        self
    }
}

/// A move the engine accepted and applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub from: String,
    pub to: String,
    pub promotion: Option<char>,
    /// Standard algebraic notation including `+` / `#` suffixes.
    pub san: String,
    /// UCI notation (e.g. `e2e4`, `e7e8q`).
    pub uci: String,
}

// ============================================================================
// Derived Status
// ============================================================================

/// Why a position is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawReason {
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
    /// Both players agreed. Never produced by an engine.
    Agreement,
}

impl DrawReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stalemate => "stalemate",
            Self::InsufficientMaterial => "insufficient material",
            Self::ThreefoldRepetition => "threefold repetition",
            Self::FiftyMoveRule => "50-move rule",
            Self::Agreement => "agreement",
        }
    }
}

/// Position status derived by the engine after every move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    /// The side to move is in check.
    pub is_check: bool,
    pub is_checkmate: bool,
    pub is_stalemate: bool,
    pub draw_reason: Option<DrawReason>,
}

impl StatusFlags {
    pub fn is_draw(&self) -> bool {
        self.draw_reason.is_some()
    }

    pub fn is_game_over(&self) -> bool {
        self.is_checkmate || self.is_draw()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Unexpected failure inside an engine while attempting a move.
///
/// Distinct from an illegal move: the engine could not decide.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EngineFault(pub String);

/// Errors building a rules state.
#[derive(Debug, Error)]
pub enum RulesError {
    /// Invalid FEN string.
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
}

// ============================================================================
// Capability Contract
// ============================================================================

/// What the session layer needs from a rules engine.
///
/// `Default` MUST produce the standard starting position; a reset is a
/// replacement with `Default::default()`. Any engine satisfying this
/// contract (in-process or a proxy to a remote one) can back a session.
pub trait RulesEngine: Clone + Default + Send + 'static {
    /// Try to play a move for the side to move.
    ///
    /// Returns `Ok(None)` when the move is illegal. On `Ok(None)` and on
    /// `Err` the engine state MUST be unchanged.
    fn attempt_move(&mut self, request: &MoveRequest) -> Result<Option<AppliedMove>, EngineFault>;

    /// Side to move in the current position.
    fn current_turn(&self) -> Side;

    /// Textual notation of the current position (FEN for chess).
    fn position_notation(&self) -> String;

    /// Derived status of the current position.
    fn status_flags(&self) -> StatusFlags;
}
