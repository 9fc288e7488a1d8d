//! Config for matches and tournaments
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive, set them to `"true"` to enable them.
//! Numbers that do not parse keep their default.
//!
//! - `ARENA_VERBOSE`: print match results and standings (default: `false`)
//! - `ARENA_LOG`: enable logging to a file (default: `false`)
//! - `ARENA_MOVE_BUDGET_MS`: time a bot gets to answer, in milliseconds (default: `200`)
//! - `ARENA_SEED`: seed for dice, seat selection and fallback moves (default: random)
//! - `ARENA_MAX_TURNS`: moves after which a match is stopped (default: `10000`)
//! - `ARENA_PARALLEL_MATCHES`: matches run at the same time, `0` for one per CPU (default: `1`)
//! - `ARENA_STARTUP_TIMEOUT_MS`: time a bot process gets to connect (default: `1000`)
//! - `ARENA_DEBUG_BOT_STDERR`: let bot processes write to stderr (default: `false`)

use std::{str::FromStr, time::Duration};

/// Configuration for matches and tournaments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) move_budget: Duration,
    pub(crate) seed: Option<u64>,
    pub(crate) max_turns: u32,
    pub(crate) parallel_matches: usize,
    pub(crate) startup_timeout: Duration,
    pub(crate) debug_bot_stderr: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Nothing is printed to stdout and logging to file is disabled.
    /// - Bots get 200 ms per move and bot processes 1 s to connect.
    /// - Randomness is seeded from the OS.
    /// - Matches stop after 10 000 moves.
    /// - One match runs at a time.
    /// - Bot processes' stderr is discarded.
    pub fn new() -> Self {
        Self {
            verbose: false,
            log: false,
            move_budget: Duration::from_millis(200),
            seed: None,
            max_turns: 10_000,
            parallel_matches: 1,
            startup_timeout: Duration::from_millis(1000),
            debug_bot_stderr: false,
        }
    }

    /// Create configuration from environment variables, see the [module documentation](self).
    ///
    /// Any unset or unparsable variable leaves the default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_number<T: FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let defaults = Self::new();
        Self {
            verbose: get_env_flag("ARENA_VERBOSE", defaults.verbose),
            log: get_env_flag("ARENA_LOG", defaults.log),
            move_budget: get_env_number("ARENA_MOVE_BUDGET_MS")
                .map_or(defaults.move_budget, Duration::from_millis),
            seed: get_env_number("ARENA_SEED").or(defaults.seed),
            max_turns: get_env_number("ARENA_MAX_TURNS").unwrap_or(defaults.max_turns),
            parallel_matches: get_env_number("ARENA_PARALLEL_MATCHES")
                .unwrap_or(defaults.parallel_matches),
            startup_timeout: get_env_number("ARENA_STARTUP_TIMEOUT_MS")
                .map_or(defaults.startup_timeout, Duration::from_millis),
            debug_bot_stderr: get_env_flag("ARENA_DEBUG_BOT_STDERR", defaults.debug_bot_stderr),
        }
    }

    /// Enable or disable printing results to stdout.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Time a bot gets to answer one move request.
    pub fn with_move_budget(mut self, value: Duration) -> Self {
        self.move_budget = value;
        self
    }

    /// Fix the seed of every random choice, making runs with in-process bots reproducible.
    pub fn with_seed(mut self, value: Option<u64>) -> Self {
        self.seed = value;
        self
    }

    /// Moves after which a match is stopped without a winner.
    pub fn with_max_turns(mut self, value: u32) -> Self {
        self.max_turns = value;
        self
    }

    /// Matches run at the same time by a tournament. `0` means one per CPU.
    pub fn with_parallel_matches(mut self, value: usize) -> Self {
        self.parallel_matches = value;
        self
    }

    /// Time a bot process gets to connect back after launch.
    pub fn with_startup_timeout(mut self, value: Duration) -> Self {
        self.startup_timeout = value;
        self
    }

    /// Let bot processes write to stderr, for debugging them.
    pub fn with_debug_bot_stderr(mut self, value: bool) -> Self {
        self.debug_bot_stderr = value;
        self
    }

    /// Whether results are printed.
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Whether logs go to a file.
    pub fn log(&self) -> bool {
        self.log
    }

    /// Time a bot gets per move.
    pub fn move_budget(&self) -> Duration {
        self.move_budget
    }

    /// Seed of every random choice, if fixed.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Moves after which a match is stopped.
    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Matches run at the same time, `0` resolved to the number of CPUs.
    pub fn parallel_matches(&self) -> usize {
        match self.parallel_matches {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// Time a bot process gets to connect.
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Whether bot processes keep their stderr.
    pub fn debug_bot_stderr(&self) -> bool {
        self.debug_bot_stderr
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Configuration::new()
            .with_move_budget(Duration::from_millis(30))
            .with_seed(Some(4))
            .with_parallel_matches(3);
        assert_eq!(config.move_budget(), Duration::from_millis(30));
        assert_eq!(config.seed(), Some(4));
        assert_eq!(config.parallel_matches(), 3);
        assert_eq!(config.max_turns(), 10_000);
        assert!(!config.verbose());
        assert!(!config.debug_bot_stderr());
        assert!(config.with_debug_bot_stderr(true).debug_bot_stderr());
    }

    #[test]
    fn zero_parallel_matches_means_one_per_cpu() {
        let config = Configuration::new().with_parallel_matches(0);
        assert_eq!(config.parallel_matches(), num_cpus::get());
    }
}
