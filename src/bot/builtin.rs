//! Strategies shipped with the crate, used as sparring partners and in tests.

use anyhow::{anyhow, Context};
use rand::seq::SliceRandom;

use crate::{
    board::SpotKind,
    bot::Bot,
    game::{Move, MoveOptions},
};

/// Picks uniformly among the legal moves.
pub fn random_move(options: &MoveOptions) -> anyhow::Result<Move> {
    options
        .moves
        .choose(&mut rand::thread_rng())
        .copied()
        .context("no legal move")
}

/// Always plays the first listed move.
pub fn first_move(options: &MoveOptions) -> anyhow::Result<Move> {
    options.moves.first().copied().context("no legal move")
}

/// Captures an opponent whenever it can, otherwise plays at random.
pub fn killer_move(options: &MoveOptions) -> anyhow::Result<Move> {
    let capture = options.moves.iter().find(|m| {
        options
            .other_pawns
            .iter()
            .any(|p| p.position == Some(m.to))
    });
    match capture {
        Some(mv) => Ok(*mv),
        None => random_move(options),
    }
}

/// Wins if it can, otherwise plays the move ending closest to the goal among those that
/// make progress.
pub fn basic_move(options: &MoveOptions) -> anyhow::Result<Move> {
    let winning = options
        .moves
        .iter()
        .find(|m| options.spot(m.to).is_some_and(|s| s.kind == SpotKind::Goal));
    if let Some(mv) = winning {
        return Ok(*mv);
    }
    options
        .moves
        .iter()
        .filter(|m| options.distance_before(m) > options.distance_after(m))
        .min_by_key(|m| options.distance_after(m))
        .or_else(|| options.moves.first())
        .copied()
        .ok_or_else(|| anyhow!("no legal move"))
}

/// [`random_move`] as a bot.
pub fn random() -> Bot {
    Bot::native("RandomBot", random_move)
}

/// [`first_move`] as a bot.
pub fn first_is_best() -> Bot {
    Bot::native("FirstIsBestBot", first_move)
}

/// [`killer_move`] as a bot.
pub fn killer() -> Bot {
    Bot::native("KillerBot", killer_move)
}

/// [`basic_move`] as a bot.
pub fn basic() -> Bot {
    Bot::native("BasicBot", basic_move)
}

/// Every built-in bot.
pub fn all() -> Vec<Bot> {
    vec![random(), killer(), basic(), first_is_best()]
}
