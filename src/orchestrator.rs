//! Match driver.
//!
//! A [`TurnOrchestrator`] runs one match at a time through the phases
//! `Idle -> AwaitingMove -> Applying -> (AwaitingMove | Finished)`. It owns the authoritative
//! [`GameState`], asks the seat on move for a move through its sandbox, and substitutes a
//! uniformly random legal move whenever the answer is late, missing or illegal.
//!
//! Every request is tagged with the [`MatchToken`] of the match it belongs to. Starting a new
//! match retires the previous token, so proposals still in flight for an older match are
//! reported as [`Resolution::Stale`] and never touch the new state.
//!
//! ```no_run
//! use std::sync::Arc;
//! use blockade_arena::prelude::*;
//!
//! let mut orchestrator = TurnOrchestrator::new(Arc::new(Board::standard()), Configuration::new());
//! let seats = [builtin::basic(), builtin::killer(), builtin::random(), builtin::first_is_best()];
//! let outcome = orchestrator.run(&seats)?;
//! println!("{:?} won after {} turns", outcome.winner, outcome.turns);
//! # anyhow::Ok(())
//! ```

use std::{fmt::Display, sync::Arc};

use anyhow::Context;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument, warn};

use crate::{
    board::{Board, Color},
    bot::Bot,
    configuration::Configuration,
    error::SandboxFault,
    game::{GameState, Move, MoveOptions},
    rules,
    sandbox::{load_sandbox, MatchToken, MoveSandbox, PendingProposal, Proposal, SandboxSettings},
};

const FALLBACK_SALT: u64 = 0x6d61_6c65_6669_7a21;

/// Where the active match stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// No match started yet.
    Idle,
    /// Waiting for the seat on move.
    AwaitingMove,
    /// A move is being applied.
    Applying,
    /// The match is over.
    Finished,
}

/// Why a fallback move replaced the bot's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// No answer within the budget.
    Timeout,
    /// The bot failed.
    Crashed,
    /// The bot could not be loaded.
    Unavailable,
    /// The answer was not a legal move.
    InvalidMove,
}

impl From<&SandboxFault> for FallbackReason {
    fn from(fault: &SandboxFault) -> Self {
        match fault {
            SandboxFault::Timeout => FallbackReason::Timeout,
            SandboxFault::Crashed(_) => FallbackReason::Crashed,
            SandboxFault::Unavailable(_) => FallbackReason::Unavailable,
        }
    }
}

/// Per-seat counters of one match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatStats {
    /// Moves applied for this seat.
    pub turns: u32,
    /// Fallbacks after a timeout.
    pub timeouts: u32,
    /// Fallbacks after a crash.
    pub crashes: u32,
    /// Fallbacks because the bot could not be loaded.
    pub unavailable: u32,
    /// Fallbacks after an illegal answer.
    pub invalid: u32,
}

impl SeatStats {
    /// Moves that were not chosen by the bot.
    pub fn fallbacks(&self) -> u32 {
        self.timeouts + self.crashes + self.unavailable + self.invalid
    }

    fn record(&mut self, fallback: Option<FallbackReason>) {
        self.turns += 1;
        match fallback {
            None => {}
            Some(FallbackReason::Timeout) => self.timeouts += 1,
            Some(FallbackReason::Crashed) => self.crashes += 1,
            Some(FallbackReason::Unavailable) => self.unavailable += 1,
            Some(FallbackReason::InvalidMove) => self.invalid += 1,
        }
    }
}

/// One applied move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnRecord {
    /// Seat that moved.
    pub seat: Color,
    /// Move applied.
    pub mv: Move,
    /// Set when the move was substituted.
    pub fallback: Option<FallbackReason>,
}

impl Display for TurnRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.seat, self.mv)?;
        if let Some(reason) = self.fallback {
            write!(f, " (fallback: {reason:?})")?;
        }
        Ok(())
    }
}

/// What feeding a proposal to the orchestrator did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The proposal belonged to a superseded match or turn and was dropped.
    Stale(MatchToken),
    /// A move was applied, the next seat has been asked.
    Played(TurnRecord),
    /// A move was applied and ended the match.
    Finished(TurnRecord),
}

/// Result of a finished match.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Match identifier.
    pub token: MatchToken,
    /// Bot names in seat order.
    pub seats: [String; 4],
    /// Seat that reached the goal, `None` if the turn limit stopped the match.
    pub winner: Option<Color>,
    /// Seats from best to worst.
    pub finishing_order: Vec<Color>,
    /// Moves applied.
    pub turns: u32,
    /// Counters per seat, indexed by [`Color::index`].
    pub stats: [SeatStats; 4],
    /// State after the last move.
    pub final_state: GameState,
}

impl MatchOutcome {
    /// Name of the bot playing `seat`.
    pub fn bot(&self, seat: Color) -> &str {
        &self.seats[seat.index()]
    }
}

/// Presentation hook. Both methods default to doing nothing.
pub trait MatchObserver: Send {
    /// The state changed. `pending` is what the seat on move was shown, if any.
    fn on_update(&mut self, _state: &GameState, _pending: Option<&MoveOptions>) {}

    /// The match ended.
    fn on_finished(&mut self, _final_state: &GameState, _outcome: &MatchOutcome) {}
}

struct ActiveMatch {
    token: MatchToken,
    phase: MatchPhase,
    state: GameState,
    seats: [String; 4],
    sandboxes: Vec<Box<dyn MoveSandbox>>,
    pending: Option<PendingProposal>,
    options: Option<MoveOptions>,
    rng: ChaCha8Rng,
    stats: [SeatStats; 4],
    outcome: Option<MatchOutcome>,
}

impl ActiveMatch {
    fn finish(&mut self) -> &MatchOutcome {
        self.phase = MatchPhase::Finished;
        self.shutdown();
        self.outcome.insert(MatchOutcome {
            token: self.token,
            seats: self.seats.clone(),
            winner: self.state.winner(),
            finishing_order: rules::finishing_order(&self.state),
            turns: self.state.turn(),
            stats: self.stats,
            final_state: self.state.clone(),
        })
    }

    fn shutdown(&mut self) {
        for sandbox in &mut self.sandboxes {
            sandbox.teardown();
        }
    }
}

/// Drives matches on one board.
pub struct TurnOrchestrator {
    board: Arc<Board>,
    config: Configuration,
    last_token: u64,
    active: Option<ActiveMatch>,
    observers: Vec<Box<dyn MatchObserver>>,
}

impl TurnOrchestrator {
    /// Orchestrator for matches on `board`.
    pub fn new(board: Arc<Board>, config: Configuration) -> TurnOrchestrator {
        TurnOrchestrator {
            board,
            config,
            last_token: 0,
            active: None,
            observers: vec![],
        }
    }

    /// Register a presentation hook.
    pub fn with_observer(mut self, observer: impl MatchObserver + 'static) -> Self {
        self.add_observer(observer);
        self
    }

    /// Register a presentation hook.
    pub fn add_observer(&mut self, observer: impl MatchObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Start a match with `seats` given in seat order, Blue first.
    ///
    /// Any match still running is abandoned and its sandboxes torn down. Proposals it still has
    /// in flight will resolve as [`Resolution::Stale`].
    ///
    /// # Errors
    /// Fails if the board leaves nobody a move.
    #[instrument(skip_all, fields(seats = ?seats.iter().map(|b| b.name.as_str()).collect::<Vec<_>>()))]
    pub fn start(&mut self, seats: &[Bot; 4]) -> anyhow::Result<MatchToken> {
        if let Some(mut previous) = self.active.take() {
            if previous.phase != MatchPhase::Finished {
                debug!(token = %previous.token, "superseding unfinished match");
            }
            previous.shutdown();
        }

        self.last_token += 1;
        let token = MatchToken(self.last_token);
        let seed = match self.config.seed {
            Some(seed) => seed.wrapping_add(token.0),
            None => rand::random(),
        };
        let state = rules::initial_state(self.board.clone(), seed)
            .context("board leaves nobody a move")?;

        let settings = SandboxSettings {
            startup_timeout: self.config.startup_timeout,
            bot_stderr: self.config.debug_bot_stderr,
        };
        let sandboxes = Color::ALL
            .iter()
            .zip(seats)
            .map(|(seat, bot)| load_sandbox(bot, *seat, settings))
            .collect();

        self.active = Some(ActiveMatch {
            token,
            phase: MatchPhase::Idle,
            state,
            seats: seats.clone().map(|b| b.name),
            sandboxes,
            pending: None,
            options: None,
            rng: ChaCha8Rng::seed_from_u64(seed ^ FALLBACK_SALT),
            stats: Default::default(),
            outcome: None,
        });
        info!(%token, seed, "match started");
        self.await_move();
        Ok(token)
    }

    /// Hand the outstanding request to the caller, who must feed its answer back through
    /// [`resolve`](Self::resolve).
    pub fn take_pending(&mut self) -> Option<PendingProposal> {
        self.active.as_mut()?.pending.take()
    }

    /// Wait for the seat on move and apply its answer.
    ///
    /// # Errors
    /// Fails if no request is outstanding or if applying a move breaks the rules engine.
    pub fn step(&mut self) -> anyhow::Result<Resolution> {
        let pending = self
            .take_pending()
            .context("no move request outstanding")?;
        self.resolve(pending.wait())
    }

    /// Apply `proposal`, or the fallback it calls for, to the active match.
    ///
    /// Proposals for another match, another seat or another turn are dropped.
    ///
    /// # Errors
    /// Only on internal inconsistencies: the rules engine rejecting a move the orchestrator
    /// checked, or a seat on move without legal moves.
    pub fn resolve(&mut self, proposal: Proposal) -> anyhow::Result<Resolution> {
        let Some(active) = self.active.as_mut() else {
            debug!(token = %proposal.token, "no active match, dropping proposal");
            return Ok(Resolution::Stale(proposal.token));
        };
        if proposal.token != active.token
            || active.phase != MatchPhase::AwaitingMove
            || proposal.seat != rules::current_player(&active.state)
            || proposal.turn != active.state.turn()
        {
            debug!(
                token = %proposal.token,
                active = %active.token,
                seat = %proposal.seat,
                "dropping stale proposal"
            );
            return Ok(Resolution::Stale(proposal.token));
        }

        active.phase = MatchPhase::Applying;
        active.pending = None;
        let options = active
            .options
            .take()
            .context("no options recorded for the seat on move")?;
        let seat = proposal.seat;

        let fallback = match &proposal.outcome {
            Ok(mv) if options.moves.contains(mv) => None,
            Ok(mv) => {
                warn!(%seat, %mv, "illegal move proposed, playing a random one");
                Some(FallbackReason::InvalidMove)
            }
            Err(fault) => {
                warn!(%seat, %fault, elapsed = ?proposal.elapsed, "playing a random move");
                if *fault == SandboxFault::Timeout {
                    active.sandboxes[seat.index()].teardown();
                }
                Some(FallbackReason::from(fault))
            }
        };
        let mv = match (fallback, proposal.outcome) {
            (None, Ok(mv)) => mv,
            _ => options
                .moves
                .choose(&mut active.rng)
                .copied()
                .with_context(|| format!("{seat} is on move without a legal move"))?,
        };

        active.state = rules::apply_move(&active.state, &mv)
            .with_context(|| format!("rules engine rejected a checked move in {}", active.token))?;
        active.stats[seat.index()].record(fallback);
        let record = TurnRecord { seat, mv, fallback };

        if active.state.winner().is_some() || active.state.turn() >= self.config.max_turns {
            let outcome = active.finish();
            info!(
                token = %outcome.token,
                winner = ?outcome.winner,
                order = ?outcome.finishing_order,
                turns = outcome.turns,
                "match finished"
            );
            for observer in &mut self.observers {
                observer.on_finished(&outcome.final_state, outcome);
            }
            return Ok(Resolution::Finished(record));
        }

        self.await_move();
        Ok(Resolution::Played(record))
    }

    /// Play a whole match with `seats`, blocking until it ends.
    pub fn run(&mut self, seats: &[Bot; 4]) -> anyhow::Result<MatchOutcome> {
        self.start(seats)?;
        loop {
            if let Resolution::Finished(_) = self.step()? {
                break;
            }
        }
        self.outcome().cloned().context("match ended without an outcome")
    }

    /// Phase of the active match, [`MatchPhase::Idle`] before the first one.
    pub fn phase(&self) -> MatchPhase {
        self.active.as_ref().map_or(MatchPhase::Idle, |a| a.phase)
    }

    /// Token of the active match.
    pub fn active_token(&self) -> Option<MatchToken> {
        self.active.as_ref().map(|a| a.token)
    }

    /// Copy of the authoritative state.
    pub fn state(&self) -> Option<GameState> {
        self.active.as_ref().map(|a| a.state.clone())
    }

    /// Copy of what the seat on move was shown.
    pub fn pending_options(&self) -> Option<MoveOptions> {
        self.active.as_ref()?.options.clone()
    }

    /// Result of the active match once it is finished.
    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.active.as_ref()?.outcome.as_ref()
    }

    fn await_move(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let seat = rules::current_player(&active.state);
        let legal = rules::legal_moves(&active.state, seat);
        let pending = active.sandboxes[seat.index()].propose(
            active.token,
            &legal.options,
            self.config.move_budget,
        );
        active.pending = Some(pending);
        active.options = Some(legal.options);
        active.phase = MatchPhase::AwaitingMove;

        for observer in &mut self.observers {
            observer.on_update(&active.state, active.options.as_ref());
        }
    }
}
