//! Standard chess rules backed by shakmaty.

use std::collections::HashMap;

use shakmaty::{
    CastlingMode, Chess, EnPassantMode, Move, Position, Role, Square, fen::Fen, san::San,
    uci::UciMove,
};

use crate::{
    AppliedMove, DrawReason, EngineFault, MoveRequest, RulesEngine, RulesError, Side, StatusFlags,
};

/// Number of plies without capture or pawn move that draws the game.
const FIFTY_MOVE_PLIES: u32 = 100;

/// Occurrences of one position that draw the game.
const REPETITION_LIMIT: u32 = 3;

/// Standard chess position with repetition tracking.
#[derive(Debug, Clone)]
pub struct ChessRules {
    position: Chess,
    /// Occurrence count per position key (FEN without move counters).
    repetitions: HashMap<String, u32>,
}

impl ChessRules {
    /// Standard starting position.
    #[must_use]
    pub fn new() -> Self {
        Self::from_position(Chess::default())
    }

    /// Start from an arbitrary FEN.
    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let fen: Fen = fen
            .parse()
            .map_err(|e| RulesError::InvalidFen(format!("{e}")))?;
        let position: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| RulesError::InvalidFen(format!("{e}")))?;
        Ok(Self::from_position(position))
    }

    fn from_position(position: Chess) -> Self {
        let mut rules = Self {
            position,
            repetitions: HashMap::new(),
        };
        rules.record_occurrence();
        rules
    }

    fn repetition_key(&self) -> String {
        self.position_notation()
            .split(' ')
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn record_occurrence(&mut self) {
        let key = self.repetition_key();
        *self.repetitions.entry(key).or_insert(0) += 1;
    }

    /// Map a client request onto a legal shakmaty move, if there is one.
    ///
    /// A hint on a non-promoting move is ignored; a promoting move without
    /// a hint becomes a queen promotion.
    fn resolve(&self, request: &MoveRequest) -> Option<Move> {
        let from: Square = request.from.trim().to_ascii_lowercase().parse().ok()?;
        let to: Square = request.to.trim().to_ascii_lowercase().parse().ok()?;

        let candidates = match request.promotion {
            Some(hint) => [Some(Role::from_char(hint.to_ascii_lowercase())?), None],
            None => [None, Some(Role::Queen)],
        };

        candidates.into_iter().find_map(|promotion| {
            UciMove::Normal {
                from,
                to,
                promotion,
            }
            .to_move(&self.position)
            .ok()
        })
    }
}

impl Default for ChessRules {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesEngine for ChessRules {
    fn attempt_move(&mut self, request: &MoveRequest) -> Result<Option<AppliedMove>, EngineFault> {
        let Some(m) = self.resolve(request) else {
            return Ok(None);
        };

        let san = San::from_move(&self.position, &m);
        let uci = UciMove::from_move(&m, CastlingMode::Standard).to_string();

        let next = self
            .position
            .clone()
            .play(&m)
            .map_err(|_| EngineFault(format!("resolved move {uci} rejected by position")))?;

        let suffix = if next.is_checkmate() {
            "#"
        } else if next.is_check() {
            "+"
        } else {
            ""
        };

        self.position = next;
        self.record_occurrence();

        Ok(Some(AppliedMove {
            from: uci.get(0..2).unwrap_or_default().to_string(),
            to: uci.get(2..4).unwrap_or_default().to_string(),
            promotion: m.promotion().map(Role::char),
            san: format!("{san}{suffix}"),
            uci,
        }))
    }

    fn current_turn(&self) -> Side {
        match self.position.turn() {
            shakmaty::Color::White => Side::White,
            shakmaty::Color::Black => Side::Black,
        }
    }

    fn position_notation(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    fn status_flags(&self) -> StatusFlags {
        let is_checkmate = self.position.is_checkmate();
        let is_stalemate = self.position.is_stalemate();

        let repeated = self
            .repetitions
            .get(&self.repetition_key())
            .is_some_and(|&count| count >= REPETITION_LIMIT);

        let draw_reason = if is_checkmate {
            None
        } else if is_stalemate {
            Some(DrawReason::Stalemate)
        } else if self.position.is_insufficient_material() {
            Some(DrawReason::InsufficientMaterial)
        } else if self.position.halfmoves() >= FIFTY_MOVE_PLIES {
            Some(DrawReason::FiftyMoveRule)
        } else if repeated {
            Some(DrawReason::ThreefoldRepetition)
        } else {
            None
        };

        StatusFlags {
            is_check: self.position.is_check(),
            is_checkmate,
            is_stalemate,
            draw_reason,
        }
    }
}
