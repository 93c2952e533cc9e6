//! Rookery Game Records
//!
//! This crate owns the append-only move log a session keeps while a game
//! is played, and the record artifact built from it when the game ends.
//!
//! # Architecture
//!
//! - `MoveLog`: ordered, append-only list of accepted moves. Its length
//!   decides whose turn it is.
//! - `finalize`: turns a log plus outcome into a `GameRecordProto`.
//! - `verify_record`: replays a record through a fresh rules engine and
//!   checks every resulting position.
//! - `record_digest`: SHA-256 over the encoded record.
//!
//! Records are kept in memory only.

#![deny(unsafe_code)]

use prost::Message;
use rookery_rules::{AppliedMove, MoveRequest, RulesEngine, Side};
use rookery_wire::{GameRecordProto, PlayerInfo, RecordedMoveProto};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Current record schema version.
pub const RECORD_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Move Log
// ============================================================================

/// One accepted move with the position it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveEntry {
    pub applied: AppliedMove,
    pub resulting_position: String,
    pub timestamp_ms: u64,
}

impl From<&MoveEntry> for RecordedMoveProto {
    fn from(entry: &MoveEntry) -> Self {
        Self {
            uci: entry.applied.uci.clone(),
            san: entry.applied.san.clone(),
            resulting_position: entry.resulting_position.clone(),
            timestamp_ms: entry.timestamp_ms,
        }
    }
}

/// Append-only move log.
///
/// Entries are never edited or removed one by one; `clear` exists only for
/// starting a fresh game in the same session.
#[derive(Debug, Clone, Default)]
pub struct MoveLog {
    entries: Vec<MoveEntry>,
}

impl MoveLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MoveEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MoveEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&MoveEntry> {
        self.entries.last()
    }

    /// Side to move by log parity (even length: White).
    pub fn side_to_move(&self) -> Side {
        Side::to_move_after(self.entries.len())
    }

    /// SAN of every move, in order.
    pub fn san_history(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.applied.san.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Record Finalization
// ============================================================================

/// Session-level facts stored alongside the moves.
#[derive(Debug, Clone, Default)]
pub struct RecordHeader {
    pub session_id: String,
    pub initial_position: String,
    pub white: Option<PlayerInfo>,
    pub black: Option<PlayerInfo>,
}

/// How the game ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// "checkmate", "resignation" or "draw".
    pub result: String,
    pub winner: Option<Side>,
    pub reason: Option<String>,
}

/// Build the record artifact for a finished game.
pub fn finalize(log: &MoveLog, header: RecordHeader, outcome: RecordOutcome) -> GameRecordProto {
    GameRecordProto {
        record_format_version: RECORD_FORMAT_VERSION,
        session_id: header.session_id,
        initial_position: header.initial_position,
        moves: log.entries().iter().map(Into::into).collect(),
        result: outcome.result,
        winner: outcome.winner.map(|side| side.code().to_string()),
        reason: outcome.reason,
        white: header.white,
        black: header.black,
    }
}

/// SHA-256 (lowercase hex) of the encoded record.
pub fn record_digest(record: &GameRecordProto) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.encode_to_vec());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Record Verification
// ============================================================================

/// Record verification error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("unsupported record format version {0}")]
    UnsupportedVersion(u32),

    #[error("initial position mismatch: expected {expected}, engine starts at {actual}")]
    InitialPositionMismatch { expected: String, actual: String },

    #[error("ply {ply}: malformed move {uci:?}")]
    MalformedMove { ply: usize, uci: String },

    #[error("ply {ply}: illegal move {uci}")]
    IllegalMove { ply: usize, uci: String },

    #[error("ply {ply}: engine fault: {reason}")]
    EngineFault { ply: usize, reason: String },

    #[error("ply {ply}: position mismatch: expected {expected}, got {actual}")]
    PositionMismatch {
        ply: usize,
        expected: String,
        actual: String,
    },
}

/// Verify that replaying a record through a fresh engine reproduces every
/// recorded position.
pub fn verify_record<R: RulesEngine>(record: &GameRecordProto) -> Result<(), VerifyError> {
    if record.record_format_version != RECORD_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion(
            record.record_format_version,
        ));
    }

    let mut engine = R::default();

    let start = engine.position_notation();
    if start != record.initial_position {
        return Err(VerifyError::InitialPositionMismatch {
            expected: record.initial_position.clone(),
            actual: start,
        });
    }

    for (ply, recorded) in record.moves.iter().enumerate() {
        let request = parse_uci(&recorded.uci).ok_or_else(|| VerifyError::MalformedMove {
            ply,
            uci: recorded.uci.clone(),
        })?;

        match engine.attempt_move(&request) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(VerifyError::IllegalMove {
                    ply,
                    uci: recorded.uci.clone(),
                });
            }
            Err(fault) => {
                return Err(VerifyError::EngineFault {
                    ply,
                    reason: fault.to_string(),
                });
            }
        }

        let actual = engine.position_notation();
        if actual != recorded.resulting_position {
            return Err(VerifyError::PositionMismatch {
                ply,
                expected: recorded.resulting_position.clone(),
                actual,
            });
        }
    }

    Ok(())
}

/// Split a UCI string into a move request.
fn parse_uci(uci: &str) -> Option<MoveRequest> {
    if !uci.is_ascii() || !(4..=5).contains(&uci.len()) {
        return None;
    }
    let request = MoveRequest::new(&uci[0..2], &uci[2..4]);
    Some(match uci[4..].chars().next() {
        Some(promotion) => request.with_promotion(promotion),
        None => request,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rookery_rules::ChessRules;

    fn play_game(moves: &[(&str, &str)]) -> (MoveLog, String) {
        let mut engine = ChessRules::default();
        let initial = engine.position_notation();
        let mut log = MoveLog::new();

        for (i, (from, to)) in moves.iter().enumerate() {
            let applied = engine
                .attempt_move(&MoveRequest::new(*from, *to))
                .unwrap()
                .unwrap();
            log.push(MoveEntry {
                applied,
                resulting_position: engine.position_notation(),
                timestamp_ms: 1_000 * (i as u64 + 1),
            });
        }

        (log, initial)
    }

    fn fools_mate_record() -> GameRecordProto {
        let (log, initial) = play_game(&[("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")]);
        finalize(
            &log,
            RecordHeader {
                session_id: "abc".to_string(),
                initial_position: initial,
                white: Some(PlayerInfo {
                    username: "alice".to_string(),
                    rating: 1500,
                }),
                black: None,
            },
            RecordOutcome {
                result: "checkmate".to_string(),
                winner: Some(Side::Black),
                reason: None,
            },
        )
    }

    #[test]
    fn test_log_parity() {
        let (log, _) = play_game(&[]);
        assert_eq!(log.side_to_move(), Side::White);

        let (log, _) = play_game(&[("e2", "e4")]);
        assert_eq!(log.side_to_move(), Side::Black);
        assert_eq!(log.san_history(), vec!["e4".to_string()]);

        let (mut log, _) = play_game(&[("e2", "e4"), ("e7", "e5")]);
        assert_eq!(log.side_to_move(), Side::White);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_finalize_carries_outcome() {
        let record = fools_mate_record();

        assert_eq!(record.record_format_version, RECORD_FORMAT_VERSION);
        assert_eq!(record.session_id, "abc");
        assert_eq!(record.moves.len(), 4);
        assert_eq!(record.moves[3].san, "Qh4#");
        assert_eq!(record.moves[3].timestamp_ms, 4_000);
        assert_eq!(record.winner.as_deref(), Some("b"));
        assert_eq!(record.white.as_ref().map(|p| p.rating), Some(1500));
    }

    #[test]
    fn test_verify_passes() {
        let record = fools_mate_record();
        assert_eq!(verify_record::<ChessRules>(&record), Ok(()));
    }

    #[test]
    fn test_verify_detects_position_tamper() {
        let mut record = fools_mate_record();
        record.moves[1].resulting_position = "8/8/8/8/8/8/8/8 w - - 0 1".to_string();

        assert!(matches!(
            verify_record::<ChessRules>(&record),
            Err(VerifyError::PositionMismatch { ply: 1, .. })
        ));
    }

    #[test]
    fn test_verify_detects_illegal_move() {
        let mut record = fools_mate_record();
        record.moves[0].uci = "e2e5".to_string();

        assert!(matches!(
            verify_record::<ChessRules>(&record),
            Err(VerifyError::IllegalMove { ply: 0, .. })
        ));
    }

    #[test]
    fn test_verify_detects_malformed_move() {
        let mut record = fools_mate_record();
        record.moves[2].uci = "g2".to_string();

        assert!(matches!(
            verify_record::<ChessRules>(&record),
            Err(VerifyError::MalformedMove { ply: 2, .. })
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_start() {
        let mut record = fools_mate_record();
        record.initial_position = "8/8/8/4k3/8/8/8/4K3 w - - 0 1".to_string();

        assert!(matches!(
            verify_record::<ChessRules>(&record),
            Err(VerifyError::InitialPositionMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_rejects_unknown_version() {
        let mut record = fools_mate_record();
        record.record_format_version = 99;

        assert_eq!(
            verify_record::<ChessRules>(&record),
            Err(VerifyError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let record = fools_mate_record();
        let digest = record_digest(&record);

        assert_eq!(digest.len(), 64);
        assert_eq!(digest, record_digest(&fools_mate_record()));

        let mut tampered = record;
        tampered.moves[0].timestamp_ms += 1;
        assert_ne!(digest, record_digest(&tampered));
    }

    #[test]
    fn test_parse_uci() {
        assert_eq!(parse_uci("e2e4"), Some(MoveRequest::new("e2", "e4")));
        assert_eq!(
            parse_uci("a7a8n"),
            Some(MoveRequest::new("a7", "a8").with_promotion('n'))
        );
        assert_eq!(parse_uci("e2"), None);
        assert_eq!(parse_uci("é2e4"), None);
    }
}
