//! Failure taxonomy.
//!
//! Sandbox faults are always recovered by the orchestrator with a fallback move, they only
//! reach the logs. A [`RulesError`] reaching the orchestrator from anything other than a bot
//! is a programming error and aborts the match.

use thiserror::Error;

use crate::{board::Color, game::Move};

/// Rejection by the rules engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// The move is not in the legal set of the seat on move.
    #[error("illegal move {mv}: {reason}")]
    IllegalMove {
        /// The offending move.
        mv: Move,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The match already has a winner.
    #[error("game already won by {0}")]
    GameOver(Color),
    /// No seat could move after this many consecutive rolls.
    #[error("no seat can move after {0} rolls")]
    Deadlock(usize),
}

/// Why a sandbox did not produce a move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxFault {
    /// No answer within the budget.
    #[error("bot timed out")]
    Timeout,
    /// The bot raised an error, panicked, died or answered garbage.
    #[error("bot crashed: {0}")]
    Crashed(String),
    /// The bot could not be loaded at all (e.g. it failed to compile or to start).
    #[error("bot unavailable: {0}")]
    Unavailable(String),
}
