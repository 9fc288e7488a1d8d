//! Isolation boundary between the host and bot code.
//!
//! A sandbox receives a deep copy of the [`MoveOptions`] and answers asynchronously through a
//! [`PendingProposal`]. The host never hands out references into its own state, and a bot never
//! blocks the host for longer than the move budget: [`PendingProposal::wait`] gives up at the
//! deadline whatever the bot is doing.

use std::{
    fmt::Display,
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    board::Color,
    bot::{Bot, BotProgram},
    error::SandboxFault,
    game::{Move, MoveOptions},
};

mod process_sandbox;
mod thread_sandbox;

pub use process_sandbox::ProcessSandbox;
pub use thread_sandbox::ThreadSandbox;

/// Identifies one match of an orchestrator. Proposals carrying an older token are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchToken(pub u64);

impl Display for MatchToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "match#{}", self.0)
    }
}

/// Answer of a sandbox, tagged with the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Match the request was issued for.
    pub token: MatchToken,
    /// Seat that was asked.
    pub seat: Color,
    /// Turn counter of the state the request was built from.
    pub turn: u32,
    /// The move, or why there is none.
    pub outcome: Result<Move, SandboxFault>,
    /// Time between the request and the answer (or the deadline).
    pub elapsed: Duration,
}

/// A request in flight.
#[derive(Debug)]
pub struct PendingProposal {
    token: MatchToken,
    seat: Color,
    turn: u32,
    started: Instant,
    deadline: Instant,
    reply: Receiver<Result<Move, SandboxFault>>,
}

impl PendingProposal {
    /// Request answered through `reply`, due within `budget`.
    pub fn new(
        token: MatchToken,
        options: &MoveOptions,
        budget: Duration,
        reply: Receiver<Result<Move, SandboxFault>>,
    ) -> PendingProposal {
        let started = Instant::now();
        PendingProposal {
            token,
            seat: options.color,
            turn: options.turn,
            started,
            deadline: started + budget,
            reply,
        }
    }

    /// Request that is already answered, e.g. because the bot could not be loaded.
    pub fn resolved(
        token: MatchToken,
        options: &MoveOptions,
        outcome: Result<Move, SandboxFault>,
    ) -> PendingProposal {
        let (tx, rx) = mpsc::channel();
        // the receiver is alive, so this cannot fail
        let _ = tx.send(outcome);
        PendingProposal::new(token, options, Duration::ZERO, rx)
    }

    /// Match the request belongs to.
    pub fn token(&self) -> MatchToken {
        self.token
    }

    /// Seat that was asked.
    pub fn seat(&self) -> Color {
        self.seat
    }

    /// When the answer is due.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Non-blocking poll. Gives the request back while it is neither answered nor late.
    pub fn try_take(self) -> Result<Proposal, PendingProposal> {
        match self.reply.try_recv() {
            Ok(outcome) => Ok(self.finish(outcome)),
            Err(mpsc::TryRecvError::Disconnected) => {
                Ok(self.finish(Err(SandboxFault::Crashed("sandbox went away".into()))))
            }
            Err(mpsc::TryRecvError::Empty) if Instant::now() >= self.deadline => {
                Ok(self.finish(Err(SandboxFault::Timeout)))
            }
            Err(mpsc::TryRecvError::Empty) => Err(self),
        }
    }

    /// Block until the answer arrives or the deadline passes.
    pub fn wait(self) -> Proposal {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let outcome = match self.reply.recv_timeout(remaining) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(SandboxFault::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SandboxFault::Crashed("sandbox went away".into()))
            }
        };
        self.finish(outcome)
    }

    fn finish(self, outcome: Result<Move, SandboxFault>) -> Proposal {
        Proposal {
            token: self.token,
            seat: self.seat,
            turn: self.turn,
            outcome,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Host side of an isolated bot.
pub trait MoveSandbox: Send {
    /// Ask for a move. At most one request is outstanding: proposing again first abandons the
    /// previous one.
    fn propose(&mut self, token: MatchToken, options: &MoveOptions, budget: Duration)
        -> PendingProposal;

    /// Stop whatever the bot is doing. The next [`propose`](MoveSandbox::propose) starts a
    /// fresh instance if the program can be restarted.
    fn teardown(&mut self);
}

/// Timing knobs shared by every sandbox of a match.
#[derive(Debug, Clone, Copy)]
pub struct SandboxSettings {
    /// How long a child process gets to connect back.
    pub startup_timeout: Duration,
    /// Child processes keep their stderr instead of discarding it.
    pub bot_stderr: bool,
}

/// Sandbox for a bot whose program could not be built. Every request fails immediately.
#[derive(Debug)]
pub struct UnavailableSandbox {
    reason: String,
}

impl UnavailableSandbox {
    /// Sandbox failing with `reason`.
    pub fn new(reason: impl Into<String>) -> UnavailableSandbox {
        UnavailableSandbox {
            reason: reason.into(),
        }
    }
}

impl MoveSandbox for UnavailableSandbox {
    fn propose(
        &mut self,
        token: MatchToken,
        options: &MoveOptions,
        _budget: Duration,
    ) -> PendingProposal {
        PendingProposal::resolved(
            token,
            options,
            Err(SandboxFault::Unavailable(self.reason.clone())),
        )
    }

    fn teardown(&mut self) {}
}

/// Load `bot` for `seat`.
pub fn load_sandbox(bot: &Bot, seat: Color, settings: SandboxSettings) -> Box<dyn MoveSandbox> {
    let label = format!("{}@{seat}", bot.name);
    match &bot.program {
        BotProgram::Native(program) => Box::new(ThreadSandbox::new(label, program.clone())),
        BotProgram::Executable { path, args } => Box::new(ProcessSandbox::new(
            label,
            path.clone(),
            args.clone(),
            settings,
        )),
        BotProgram::Broken(reason) => {
            warn!(bot = %bot.name, %seat, %reason, "bot is unavailable");
            Box::new(UnavailableSandbox::new(reason.clone()))
        }
    }
}
