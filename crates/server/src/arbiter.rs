//! Turn Arbiter.
//!
//! Enforces turn ownership and sequencing; legality belongs to the rules
//! engine. Rejections:
//! - Spectator or wrong side: "not your turn"
//! - Phase not Active: "game has not started" / "game is over"
//! - Engine refuses: "illegal move"
//! - Engine errors or panics: "engine fault: ..."
//!
//! A rejected move never touches the session.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use rookery_record::MoveEntry;
use rookery_rules::{MoveRequest, RulesEngine, Side};
use rookery_wire::{Check, MoveMade, MoveRecord};
use thiserror::Error;
use tracing::{debug, warn};

use crate::Outbound;
use crate::session::{GameEnding, OfferKind, Phase, Role, Session};

/// Why a command was refused. `Display` is the `invalidMove.reason`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("not joined")]
    NotJoined,

    #[error("already joined")]
    AlreadyJoined,

    #[error("empty command")]
    EmptyCommand,

    #[error("not your turn")]
    NotYourTurn,

    #[error("game has not started")]
    NotStarted,

    #[error("game is over")]
    GameOver,

    #[error("illegal move")]
    IllegalMove,

    #[error("engine fault: {0}")]
    EngineFault(String),

    #[error("spectators cannot {0}")]
    SpectatorsCannot(&'static str),

    #[error("no opponent")]
    NoOpponent,

    #[error("no pending draw offer")]
    NoPendingDraw,

    #[error("no pending rematch request")]
    NoPendingRematch,
}

/// Gate a command that needs an Active game.
pub(crate) fn require_active(phase: Phase) -> Result<(), Rejection> {
    match phase {
        Phase::Active => Ok(()),
        Phase::WaitingForPlayers => Err(Rejection::NotStarted),
        Phase::Finished => Err(Rejection::GameOver),
    }
}

/// Side the sender plays; spectators get "not your turn".
fn moving_side<R: RulesEngine>(session: &Session<R>, role: Role) -> Result<Side, Rejection> {
    let side = role.side().ok_or(Rejection::NotYourTurn)?;
    require_active(session.phase)?;
    if session.moves.side_to_move() != side {
        return Err(Rejection::NotYourTurn);
    }
    Ok(side)
}

/// Validate, apply and announce one move.
///
/// On success the move is logged, the mover's clock is charged and every
/// member receives `moveMade`, then exactly one of `gameOver` or `check`
/// when either applies.
pub fn play_move<R: RulesEngine>(
    session: &mut Session<R>,
    role: Role,
    request: &MoveRequest,
    now: u64,
) -> Result<Vec<Outbound>, Rejection> {
    let side = moving_side(session, role)?;

    // The engine works on a copy; the session keeps its state on failure.
    let mut trial = session.rules.clone();
    if trial.current_turn() != side {
        let fault = format!(
            "engine expects {} to move, move log says {}",
            trial.current_turn(),
            side
        );
        warn!(session = %session.id(), %fault, "engine fault");
        return Err(Rejection::EngineFault(fault));
    }

    let attempt = panic::catch_unwind(AssertUnwindSafe(|| trial.attempt_move(request)));
    let applied = match attempt {
        Ok(Ok(Some(applied))) => applied,
        Ok(Ok(None)) => return Err(Rejection::IllegalMove),
        Ok(Err(fault)) => {
            warn!(session = %session.id(), %fault, "engine fault");
            return Err(Rejection::EngineFault(fault.to_string()));
        }
        Err(payload) => {
            let fault = panic_message(payload.as_ref());
            warn!(session = %session.id(), %fault, "engine panicked");
            return Err(Rejection::EngineFault(fault));
        }
    };

    session.rules = trial;
    let elapsed = session.clock.charge(side, now);
    session.moves.push(MoveEntry {
        applied: applied.clone(),
        resulting_position: session.rules.position_notation(),
        timestamp_ms: now,
    });
    session.offers.withdraw(OfferKind::Draw);

    debug!(
        session = %session.id(),
        side = side.code(),
        san = %applied.san,
        elapsed_ms = elapsed,
        ply = session.moves.len(),
        "move accepted"
    );

    let mut out = session.broadcast(MoveMade {
        r#move: Some(MoveRecord::from(&applied)),
        game_state: Some(session.game_state()),
    });

    let flags = session.rules.status_flags();
    if flags.is_checkmate {
        out.extend(session.finish(GameEnding::Checkmate { winner: side }, now));
    } else if let Some(reason) = flags.draw_reason {
        out.extend(session.finish(
            GameEnding::Draw {
                reason: reason.as_str().to_string(),
            },
            now,
        ));
    } else if flags.is_check {
        out.extend(session.broadcast(Check {
            player: side.opposite().code().to_string(),
        }));
    }

    Ok(out)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "engine panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PlayerIdentity, SessionId};
    use rookery_rules::{AppliedMove, ChessRules, EngineFault, StatusFlags};
    use rookery_wire::server_message::Event;

    fn active<R: RulesEngine>() -> Session<R> {
        let mut session = Session::new(SessionId::parse("t").unwrap(), 60_000);
        session.admit(1, PlayerIdentity::default());
        session.admit(2, PlayerIdentity::default());
        session.admit(3, PlayerIdentity::default());
        session.phase = Phase::Active;
        session.clock.start(0);
        session
    }

    fn kinds(out: &[Outbound], to: u64) -> Vec<&'static str> {
        out.iter()
            .filter(|o| o.to == to)
            .map(|o| o.message.kind())
            .collect()
    }

    #[test]
    fn test_accepted_move_broadcasts_in_seat_order() {
        let mut session = active::<ChessRules>();
        let out = play_move(&mut session, Role::White, &MoveRequest::new("e2", "e4"), 2_500).unwrap();

        let recipients: Vec<_> = out.iter().map(|o| o.to).collect();
        assert_eq!(recipients, vec![1, 2, 3]);
        assert_eq!(session.moves.len(), 1);
        assert_eq!(session.clock.remaining(Side::White), 57_500);
        assert_eq!(session.clock.remaining(Side::Black), 60_000);

        let Some(Event::MoveMade(made)) = &out[0].message.event else {
            panic!("expected moveMade");
        };
        let state = made.game_state.as_ref().unwrap();
        assert_eq!(state.turn, "b");
        assert_eq!(state.move_history, vec!["e4".to_string()]);
    }

    #[test]
    fn test_wrong_side_rejected_without_mutation() {
        let mut session = active::<ChessRules>();
        let before = session.rules.position_notation();

        for _ in 0..2 {
            let result = play_move(&mut session, Role::Black, &MoveRequest::new("e7", "e5"), 5_000);
            assert_eq!(result, Err(Rejection::NotYourTurn));
        }
        assert!(session.moves.is_empty());
        assert_eq!(session.rules.position_notation(), before);
        assert_eq!(session.clock.remaining(Side::Black), 60_000);
    }

    #[test]
    fn test_spectator_move_rejected() {
        let mut session = active::<ChessRules>();
        let result = play_move(&mut session, Role::Spectator, &MoveRequest::new("e2", "e4"), 0);
        assert_eq!(result, Err(Rejection::NotYourTurn));
    }

    #[test]
    fn test_phase_gates() {
        let mut session = active::<ChessRules>();
        session.phase = Phase::WaitingForPlayers;
        assert_eq!(
            play_move(&mut session, Role::White, &MoveRequest::new("e2", "e4"), 0),
            Err(Rejection::NotStarted)
        );

        session.phase = Phase::Finished;
        assert_eq!(
            play_move(&mut session, Role::White, &MoveRequest::new("e2", "e4"), 0),
            Err(Rejection::GameOver)
        );
    }

    #[test]
    fn test_illegal_move_no_charge() {
        let mut session = active::<ChessRules>();
        let result = play_move(&mut session, Role::White, &MoveRequest::new("e2", "e5"), 9_000);

        assert_eq!(result, Err(Rejection::IllegalMove));
        assert!(session.moves.is_empty());
        assert_eq!(session.clock.remaining(Side::White), 60_000);
    }

    #[test]
    fn test_check_then_checkmate() {
        let mut session = active::<ChessRules>();
        let moves = [
            (Role::White, "e2", "e4"),
            (Role::Black, "e7", "e5"),
            (Role::White, "d1", "h5"),
            (Role::Black, "b8", "c6"),
            (Role::White, "f1", "c4"),
            (Role::Black, "g8", "f6"),
        ];
        for (role, from, to) in moves {
            let out = play_move(&mut session, role, &MoveRequest::new(from, to), 0).unwrap();
            assert_eq!(kinds(&out, 1), vec!["moveMade"]);
        }

        let out = play_move(&mut session, Role::White, &MoveRequest::new("h5", "f7"), 0).unwrap();
        assert_eq!(kinds(&out, 1), vec!["moveMade", "gameOver"]);
        assert_eq!(kinds(&out, 3), vec!["moveMade", "gameOver"]);
        assert_eq!(session.phase, Phase::Finished);
        assert_eq!(session.last_record().unwrap().moves.len(), 7);

        let Some(Event::GameOver(over)) = &out.last().unwrap().message.event else {
            panic!("expected gameOver");
        };
        assert_eq!(over.result, "checkmate");
        assert_eq!(over.winner.as_deref(), Some("w"));
    }

    #[test]
    fn test_check_event_names_side_in_check() {
        let mut session = active::<ChessRules>();
        play_move(&mut session, Role::White, &MoveRequest::new("e2", "e4"), 0).unwrap();
        play_move(&mut session, Role::Black, &MoveRequest::new("f7", "f5"), 0).unwrap();
        let out = play_move(&mut session, Role::White, &MoveRequest::new("d1", "h5"), 0).unwrap();

        assert_eq!(kinds(&out, 2), vec!["moveMade", "check"]);
        let Some(Event::Check(check)) = &out.last().unwrap().message.event else {
            panic!("expected check");
        };
        assert_eq!(check.player, "b");
    }

    #[test]
    fn test_stalemate_ends_in_draw() {
        let mut session = active::<ChessRules>();
        session.rules = ChessRules::from_fen("k7/8/8/2Q5/8/8/8/7K w - - 0 1").unwrap();

        let out = play_move(&mut session, Role::White, &MoveRequest::new("c5", "b6"), 0).unwrap();
        for member in [1, 2, 3] {
            assert_eq!(kinds(&out, member), vec!["moveMade", "gameOver"]);
        }
        assert_eq!(session.phase, Phase::Finished);

        let Some(Event::GameOver(over)) = &out.last().unwrap().message.event else {
            panic!("expected gameOver");
        };
        assert_eq!(over.result, "draw");
        assert_eq!(over.winner, None);
        assert_eq!(over.reason.as_deref(), Some("stalemate"));
    }

    /// Engine that fails on demand.
    #[derive(Debug, Clone, Default)]
    struct FaultyRules {
        plies: usize,
    }

    impl RulesEngine for FaultyRules {
        fn attempt_move(
            &mut self,
            request: &MoveRequest,
        ) -> Result<Option<AppliedMove>, EngineFault> {
            self.plies += 1;
            match request.from.as_str() {
                "err" => Err(EngineFault("lookup table corrupt".to_string())),
                "panic" => panic!("index out of range"),
                _ => Ok(Some(AppliedMove {
                    from: request.from.clone(),
                    to: request.to.clone(),
                    promotion: None,
                    san: format!("{}{}", request.from, request.to),
                    uci: format!("{}{}", request.from, request.to),
                })),
            }
        }

        fn current_turn(&self) -> Side {
            Side::to_move_after(self.plies)
        }

        fn position_notation(&self) -> String {
            format!("ply {}", self.plies)
        }

        fn status_flags(&self) -> StatusFlags {
            StatusFlags::default()
        }
    }

    #[test]
    fn test_engine_error_is_fault() {
        let mut session = active::<FaultyRules>();
        let result = play_move(&mut session, Role::White, &MoveRequest::new("err", "x"), 0);

        assert_eq!(
            result,
            Err(Rejection::EngineFault("lookup table corrupt".to_string()))
        );
        assert_eq!(session.rules.plies, 0);
        assert!(session.moves.is_empty());
    }

    #[test]
    fn test_engine_panic_is_fault() {
        let mut session = active::<FaultyRules>();
        let result = play_move(&mut session, Role::White, &MoveRequest::new("panic", "x"), 0);

        assert_eq!(
            result,
            Err(Rejection::EngineFault("index out of range".to_string()))
        );
        assert_eq!(session.rules.plies, 0);

        // The session is still usable.
        play_move(&mut session, Role::White, &MoveRequest::new("a", "b"), 0).unwrap();
        assert_eq!(session.rules.plies, 1);
    }

    #[test]
    fn test_rejection_reasons() {
        assert_eq!(Rejection::NotYourTurn.to_string(), "not your turn");
        assert_eq!(
            Rejection::SpectatorsCannot("resign").to_string(),
            "spectators cannot resign"
        );
        assert_eq!(
            Rejection::EngineFault("boom".to_string()).to_string(),
            "engine fault: boom"
        );
    }
}
