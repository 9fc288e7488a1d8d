//! Bots: named move-selection programs.
//!
//! Turning user source into something runnable is done elsewhere; a [`Bot`] only carries the
//! result of that step as a [`BotProgram`].

use std::{
    fmt::Debug,
    hash::Hash,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::game::{Move, MoveOptions};

pub mod builtin;

/// Compiled move function of an in-process bot.
pub type MoveFn = Arc<dyn Fn(&MoveOptions) -> anyhow::Result<Move> + Send + Sync>;

/// Move function of an in-process bot, shared by every sandbox running it.
///
/// Also counts the workers that were abandoned in a call which has not returned yet. Sandboxes
/// stop starting new workers for the program once [`MAX_STALLED_WORKERS`] are stuck.
#[derive(Clone)]
pub struct NativeProgram {
    run: MoveFn,
    stalled: Arc<AtomicUsize>,
}

/// Abandoned workers of one program allowed to keep running at the same time.
pub const MAX_STALLED_WORKERS: usize = 4;

impl NativeProgram {
    /// Wrap a move function.
    pub fn new(run: MoveFn) -> NativeProgram {
        NativeProgram {
            run,
            stalled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run the move function on the calling thread.
    pub fn call(&self, options: &MoveOptions) -> anyhow::Result<Move> {
        (self.run)(options)
    }

    /// Workers still stuck in a call they were abandoned in.
    pub fn stalled_workers(&self) -> usize {
        self.stalled.load(Ordering::Acquire)
    }

    pub(crate) fn stalled_counter(&self) -> &AtomicUsize {
        &self.stalled
    }
}

/// What runs when a bot is asked for a move.
#[derive(Clone)]
pub enum BotProgram {
    /// Called on a dedicated worker thread.
    Native(NativeProgram),
    /// Launched as a child process speaking the [`protocol`](crate::protocol).
    Executable {
        /// Binary to launch. Its first argument is the port to connect to.
        path: PathBuf,
        /// Extra arguments, passed after the port.
        args: Vec<String>,
    },
    /// The program could not be built. Every request for a move fails.
    Broken(String),
}

impl Debug for BotProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotProgram::Native(_) => f.write_str("Native(..)"),
            BotProgram::Executable { path, args } => f
                .debug_struct("Executable")
                .field("path", path)
                .field("args", args)
                .finish(),
            BotProgram::Broken(reason) => f.debug_tuple("Broken").field(reason).finish(),
        }
    }
}

/// A named program competing for seats.
#[derive(Debug, Clone)]
pub struct Bot {
    /// Unique within a pool.
    pub name: String,
    /// What to run.
    pub program: BotProgram,
}

impl PartialEq for Bot {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Bot {}

impl Hash for Bot {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Bot {
    /// In-process bot running `f`.
    pub fn native<F>(name: impl Into<String>, f: F) -> Bot
    where
        F: Fn(&MoveOptions) -> anyhow::Result<Move> + Send + Sync + 'static,
    {
        Bot {
            name: name.into(),
            program: BotProgram::Native(NativeProgram::new(Arc::new(f))),
        }
    }

    /// Out-of-process bot launched from `path`.
    pub fn executable(name: impl Into<String>, path: impl Into<PathBuf>, args: Vec<String>) -> Bot {
        Bot {
            name: name.into(),
            program: BotProgram::Executable {
                path: path.into(),
                args,
            },
        }
    }

    /// Bot whose program failed to build.
    pub fn broken(name: impl Into<String>, reason: impl Into<String>) -> Bot {
        Bot {
            name: name.into(),
            program: BotProgram::Broken(reason.into()),
        }
    }
}
