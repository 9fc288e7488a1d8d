//! # Blockade Arena
//!
//! Rules engine, sandboxed bot execution and rated tournaments for a four-player race game in
//! the style of Malefiz: each seat walks five pawns from its base to a shared goal, a die roll
//! at a time, capturing opponents and carrying barricades out of the way.
//!
//! It provides:
//! - the board model and a pure rules engine ([`board`], [`game`], [`rules`])
//! - isolation of untrusted move functions behind a time budget ([`sandbox`]), either on a
//!   worker thread or in a child process talking the [`protocol`]
//! - a match driver that never stalls on a misbehaving bot ([`orchestrator`])
//! - tournaments balancing games per bot and rating them with Weng-Lin
//!   ([`tournament_scheduler`], [`rating`])
//!
//! # Documentation Overview
//!
//! - For the game itself, see [`rules`]; it is a set of pure functions over a
//!   [`GameState`](crate::game::GameState).
//! - For what a bot is shown and must answer, see [`MoveOptions`](crate::game::MoveOptions)
//!   and [`Move`](crate::game::Move).
//! - For runtime knobs (move budget, seeds, parallelism), see
//!   [`Configuration`](crate::configuration::Configuration).
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use blockade_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env().with_verbose(true);
//!     let scheduler = TournamentScheduler::new(Arc::new(Board::standard()), config)?;
//!
//!     let mut pool = builtin::all();
//!     pool.push(Bot::native("Cautious", |options: &MoveOptions| {
//!         // never enters a new pawn if one is already on the board
//!         let mv = options
//!             .moves
//!             .iter()
//!             .find(|m| m.from.is_some())
//!             .or(options.moves.first())
//!             .copied();
//!         mv.ok_or_else(|| anyhow::anyhow!("no move"))
//!     }));
//!
//!     for rating in scheduler.run(&pool, 20)? {
//!         println!("{}: {:.2} ({} wins)", rating.name, rating.skill.mean, rating.wins);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Out-of-process bots
//!
//! A [`Bot::executable`](crate::bot::Bot::executable) is launched with the port to connect to as
//! its first argument and answers newline-delimited JSON requests, see [`protocol::serve`].
//! The `tcp_bot` binary of this crate is a complete example.
#![warn(missing_docs)]

pub use anyhow;

pub mod board;
pub mod bot;
pub mod configuration;
pub mod error;
pub mod game;
pub mod logger;
pub mod orchestrator;
pub mod process;
pub mod protocol;
pub mod rating;
pub mod rules;
pub mod sandbox;
pub mod tournament_scheduler;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use blockade_arena::prelude::*;
/// ```
pub mod prelude {
    pub use crate::board::{Board, Color, Position, Spot, SpotKind};
    pub use crate::bot::{builtin, Bot, BotProgram, NativeProgram};
    pub use crate::configuration::Configuration;
    pub use crate::error::{RulesError, SandboxFault};
    pub use crate::game::{GameState, Move, MoveOptions, PawnId};
    pub use crate::orchestrator::{
        MatchObserver, MatchOutcome, Resolution, TurnOrchestrator, TurnRecord,
    };
    pub use crate::rating::{Rating, SkillRater, WengLinRater};
    pub use crate::sandbox::{MatchToken, MoveSandbox};
    pub use crate::tournament_scheduler::{MatchRecord, TournamentScheduler};
}
