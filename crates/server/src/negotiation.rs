//! Negotiation Protocol: resign, draw offers, rematches and chat.
//!
//! Every flow is a single message. Under `OfferPolicy::Trusting` accepts
//! are honored as they arrive; under `OfferPolicy::Verified` an accept must
//! answer the opponent's outstanding offer.

use chrono::{DateTime, SecondsFormat, Utc};
use rookery_rules::{DrawReason, RulesEngine, Side};
use rookery_wire::{ChatMessage, DrawOffered, GameReset, RematchRequested, ServerMessage};
use tracing::{debug, info};

use crate::arbiter::{Rejection, require_active};
use crate::session::{GameEnding, OfferKind, PendingOffer, Role, Session};
use crate::{OfferPolicy, Outbound};

fn player_side(role: Role, action: &'static str) -> Result<Side, Rejection> {
    role.side().ok_or(Rejection::SpectatorsCannot(action))
}

/// Unicast to the opponent of `side`.
fn to_opponent<R: RulesEngine>(
    session: &Session<R>,
    side: Side,
    message: impl Into<ServerMessage>,
) -> Result<Vec<Outbound>, Rejection> {
    let to = session
        .holder(side.opposite())
        .ok_or(Rejection::NoOpponent)?;
    Ok(vec![Outbound {
        to,
        message: message.into(),
    }])
}

/// Consume the opponent's offer of `kind`, or refuse the accept.
fn take_offer<R: RulesEngine>(
    session: &mut Session<R>,
    policy: OfferPolicy,
    side: Side,
    kind: OfferKind,
) -> Result<(), Rejection> {
    if policy == OfferPolicy::Trusting {
        return Ok(());
    }
    if session.offers.take(PendingOffer {
        from: side.opposite(),
        kind,
    }) {
        return Ok(());
    }
    Err(match kind {
        OfferKind::Draw => Rejection::NoPendingDraw,
        OfferKind::Rematch => Rejection::NoPendingRematch,
    })
}

pub fn resign<R: RulesEngine>(
    session: &mut Session<R>,
    role: Role,
    now: u64,
) -> Result<Vec<Outbound>, Rejection> {
    let side = player_side(role, "resign")?;
    require_active(session.phase)?;
    info!(session = %session.id(), side = side.code(), "resignation");
    Ok(session.finish(
        GameEnding::Resignation {
            winner: side.opposite(),
        },
        now,
    ))
}

pub fn offer_draw<R: RulesEngine>(
    session: &mut Session<R>,
    role: Role,
    policy: OfferPolicy,
) -> Result<Vec<Outbound>, Rejection> {
    let side = player_side(role, "offer draws")?;
    require_active(session.phase)?;
    let out = to_opponent(
        session,
        side,
        DrawOffered {
            from: side.name().to_string(),
        },
    )?;
    if policy == OfferPolicy::Verified {
        session.offers.record(PendingOffer {
            from: side,
            kind: OfferKind::Draw,
        });
    }
    debug!(session = %session.id(), side = side.code(), "draw offered");
    Ok(out)
}

pub fn accept_draw<R: RulesEngine>(
    session: &mut Session<R>,
    role: Role,
    policy: OfferPolicy,
    now: u64,
) -> Result<Vec<Outbound>, Rejection> {
    let side = player_side(role, "accept draws")?;
    require_active(session.phase)?;
    take_offer(session, policy, side, OfferKind::Draw)?;
    Ok(session.finish(
        GameEnding::Draw {
            reason: DrawReason::Agreement.as_str().to_string(),
        },
        now,
    ))
}

pub fn request_rematch<R: RulesEngine>(
    session: &mut Session<R>,
    role: Role,
    policy: OfferPolicy,
) -> Result<Vec<Outbound>, Rejection> {
    let side = player_side(role, "request rematches")?;
    let out = to_opponent(
        session,
        side,
        RematchRequested {
            from: side.name().to_string(),
        },
    )?;
    if policy == OfferPolicy::Verified {
        session.offers.record(PendingOffer {
            from: side,
            kind: OfferKind::Rematch,
        });
    }
    debug!(session = %session.id(), side = side.code(), "rematch requested");
    Ok(out)
}

/// Reset the board, log and clocks; works from Active or Finished.
pub fn accept_rematch<R: RulesEngine>(
    session: &mut Session<R>,
    role: Role,
    policy: OfferPolicy,
    now: u64,
) -> Result<Vec<Outbound>, Rejection> {
    let side = player_side(role, "accept rematches")?;
    if !session.both_seated() {
        return Err(Rejection::NoOpponent);
    }
    take_offer(session, policy, side, OfferKind::Rematch)?;

    session.reset(now);
    info!(session = %session.id(), "rematch started");
    Ok(session.broadcast(GameReset {
        game_state: Some(session.game_state()),
    }))
}

/// Relay chat verbatim to every member.
pub fn chat<R: RulesEngine>(session: &Session<R>, role: Role, text: String, now: u64) -> Vec<Outbound> {
    session.broadcast(ChatMessage {
        sender: role.name().to_string(),
        message: text,
        timestamp: rfc3339(now),
    })
}

fn rfc3339(now_ms: u64) -> String {
    i64::try_from(now_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Phase, PlayerIdentity, SessionId};
    use rookery_rules::ChessRules;
    use rookery_wire::server_message::Event;

    fn active() -> Session<ChessRules> {
        let mut session = Session::new(SessionId::parse("n").unwrap(), 60_000);
        session.admit(1, PlayerIdentity::default());
        session.admit(2, PlayerIdentity::default());
        session.admit(3, PlayerIdentity::default());
        session.phase = Phase::Active;
        session.clock.start(0);
        session
    }

    #[test]
    fn test_resign_names_opponent() {
        let mut session = active();
        let out = resign(&mut session, Role::Black, 0).unwrap();

        assert_eq!(out.len(), 3);
        let Some(Event::GameOver(over)) = &out[0].message.event else {
            panic!("expected gameOver");
        };
        assert_eq!(over.result, "resignation");
        assert_eq!(over.winner.as_deref(), Some("w"));
        assert_eq!(session.phase(), Phase::Finished);

        assert_eq!(resign(&mut session, Role::White, 0), Err(Rejection::GameOver));
    }

    #[test]
    fn test_offer_draw_reaches_opponent_only() {
        let mut session = active();
        for _ in 0..2 {
            let out = offer_draw(&mut session, Role::White, OfferPolicy::Trusting).unwrap();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].to, 2);
            assert_eq!(out[0].message.kind(), "drawOffered");
        }
        assert!(session.offers().is_empty());
    }

    #[test]
    fn test_trusting_accept_without_offer() {
        let mut session = active();
        let out = accept_draw(&mut session, Role::Black, OfferPolicy::Trusting, 0).unwrap();

        let Some(Event::GameOver(over)) = &out[0].message.event else {
            panic!("expected gameOver");
        };
        assert_eq!(over.result, "draw");
        assert_eq!(over.reason.as_deref(), Some("agreement"));
        assert_eq!(over.winner, None);
    }

    #[test]
    fn test_verified_draw_needs_opponent_offer() {
        let mut session = active();
        assert_eq!(
            accept_draw(&mut session, Role::Black, OfferPolicy::Verified, 0),
            Err(Rejection::NoPendingDraw)
        );

        offer_draw(&mut session, Role::White, OfferPolicy::Verified).unwrap();
        // The offerer cannot accept its own offer.
        assert_eq!(
            accept_draw(&mut session, Role::White, OfferPolicy::Verified, 0),
            Err(Rejection::NoPendingDraw)
        );
        accept_draw(&mut session, Role::Black, OfferPolicy::Verified, 0).unwrap();
        assert_eq!(session.phase(), Phase::Finished);
    }

    #[test]
    fn test_verified_rematch_needs_request() {
        let mut session = active();
        resign(&mut session, Role::White, 0).unwrap();

        assert_eq!(
            accept_rematch(&mut session, Role::White, OfferPolicy::Verified, 0),
            Err(Rejection::NoPendingRematch)
        );
        let out = request_rematch(&mut session, Role::Black, OfferPolicy::Verified).unwrap();
        assert_eq!(out[0].to, 1);
        assert_eq!(out[0].message.kind(), "rematchRequested");

        accept_rematch(&mut session, Role::White, OfferPolicy::Verified, 0).unwrap();
        assert_eq!(session.phase(), Phase::Active);
        assert!(session.offers().is_empty());
    }

    #[test]
    fn test_rematch_request_keeps_draw_offer() {
        let mut session = active();
        offer_draw(&mut session, Role::White, OfferPolicy::Verified).unwrap();
        request_rematch(&mut session, Role::White, OfferPolicy::Verified).unwrap();
        assert_eq!(session.offers().get(OfferKind::Draw), Some(Side::White));
        assert_eq!(session.offers().get(OfferKind::Rematch), Some(Side::White));

        accept_draw(&mut session, Role::Black, OfferPolicy::Verified, 0).unwrap();
        assert_eq!(session.phase(), Phase::Finished);
        assert_eq!(session.offers().get(OfferKind::Draw), None);

        // The rematch request outlives the game it was made in.
        accept_rematch(&mut session, Role::Black, OfferPolicy::Verified, 0).unwrap();
        assert_eq!(session.phase(), Phase::Active);
        assert!(session.offers().is_empty());
    }

    #[test]
    fn test_rematch_needs_both_seats() {
        let mut session = active();
        session.vacate(2);
        assert_eq!(
            request_rematch(&mut session, Role::White, OfferPolicy::Trusting),
            Err(Rejection::NoOpponent)
        );
        assert_eq!(
            accept_rematch(&mut session, Role::White, OfferPolicy::Trusting, 0),
            Err(Rejection::NoOpponent)
        );
    }

    #[test]
    fn test_spectators_cannot_negotiate() {
        let mut session = active();
        assert_eq!(
            resign(&mut session, Role::Spectator, 0),
            Err(Rejection::SpectatorsCannot("resign"))
        );
        assert_eq!(
            offer_draw(&mut session, Role::Spectator, OfferPolicy::Trusting),
            Err(Rejection::SpectatorsCannot("offer draws"))
        );
        assert_eq!(
            accept_rematch(&mut session, Role::Spectator, OfferPolicy::Trusting, 0),
            Err(Rejection::SpectatorsCannot("accept rematches"))
        );
        assert_eq!(session.phase(), Phase::Active);
    }

    #[test]
    fn test_chat_broadcast_verbatim() {
        let session = active();
        let out = chat(&session, Role::Spectator, "  gg <b>wp</b> ".to_string(), 1_500);

        assert_eq!(out.iter().map(|o| o.to).collect::<Vec<_>>(), vec![1, 2, 3]);
        let Some(Event::ChatMessage(msg)) = &out[0].message.event else {
            panic!("expected chatMessage");
        };
        assert_eq!(msg.sender, "spectator");
        assert_eq!(msg.message, "  gg <b>wp</b> ");
        assert_eq!(msg.timestamp, "1970-01-01T00:00:01.500Z");
    }
}
