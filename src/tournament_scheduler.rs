//! Rated tournaments over a pool of bots.
//!
//! The scheduler keeps seating four bots at a time, favouring the ones that played least, until
//! every bot has played the target number of matches. Each finishing order is folded into a
//! [`Scoreboard`]. Matches run on worker threads, up to
//! [`Configuration::parallel_matches`] at once, and report back over a channel.

use std::{
    fmt::Display,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc},
    thread,
};

use anyhow::{anyhow, bail, Context};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, instrument, trace};

use crate::{
    board::{Board, Color},
    bot::Bot,
    configuration::Configuration,
    logger::init_logger,
    orchestrator::{MatchOutcome, TurnOrchestrator},
    rating::{Rating, Scoreboard, SkillRater, WengLinRater},
};

/// Bots seated in every match.
pub const SEATS: usize = 4;

/// Summary of one finished tournament match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    /// Order in which the match was scheduled, from 1.
    pub number: usize,
    /// Bot names in seat order, Blue first.
    pub seats: [String; SEATS],
    /// Bot names from best to worst.
    pub finishing_order: Vec<String>,
    /// Bot credited with the win.
    pub winner: String,
    /// Whether the winner actually reached the goal, as opposed to leading when the turn limit
    /// stopped the match.
    pub reached_goal: bool,
    /// Moves applied.
    pub turns: u32,
    /// Moves that were substituted for a bot's answer.
    pub fallbacks: u32,
}

impl Display for MatchRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} [{}]", self.number, self.seats.join(", "))
    }
}

/// Result sent back by a match thread.
struct Finished {
    number: usize,
    seats: Vec<usize>,
    result: anyhow::Result<MatchOutcome>,
}

/// Pick the pool indexes of the next match.
///
/// Bots are split by `counts` into under, at and over `target`; each group is shuffled on its
/// own and the first [`SEATS`] of under-at-over are taken. `counts` must have at least
/// [`SEATS`] entries.
pub fn select_seats(counts: &[u32], target: u32, rng: &mut impl Rng) -> Vec<usize> {
    let mut group = |keep: fn(u32, u32) -> bool| {
        let mut members: Vec<usize> = (0..counts.len())
            .filter(|&i| keep(counts[i], target))
            .collect();
        members.shuffle(&mut *rng);
        members
    };
    let under = group(|count, target| count < target);
    let at = group(|count, target| count == target);
    let over = group(|count, target| count > target);

    under.into_iter().chain(at).chain(over).take(SEATS).collect()
}

/// Runs tournaments on one board.
pub struct TournamentScheduler<R: SkillRater = WengLinRater> {
    board: Arc<Board>,
    config: Configuration,
    rater: R,
}

impl TournamentScheduler<WengLinRater> {
    /// Scheduler rating bots with Weng-Lin.
    ///
    /// # Errors
    /// See [`with_rater`](Self::with_rater).
    pub fn new(board: Arc<Board>, config: Configuration) -> anyhow::Result<Self> {
        Self::with_rater(board, config, WengLinRater::new())
    }
}

impl<R: SkillRater> TournamentScheduler<R> {
    /// Scheduler rating bots with `rater`. Installs the file logger when `config` asks for it.
    ///
    /// # Errors
    /// Fails if the file logger cannot be installed.
    #[instrument(skip_all)]
    pub fn with_rater(board: Arc<Board>, config: Configuration, rater: R) -> anyhow::Result<Self> {
        if config.log {
            init_logger()?;
        }
        trace!(?config);

        Ok(TournamentScheduler {
            board,
            config,
            rater,
        })
    }

    /// Play until every bot of `pool` has finished at least `target` matches and return the
    /// standings, best first.
    pub fn run(&self, pool: &[Bot], target: u32) -> anyhow::Result<Vec<Rating>> {
        self.run_with(pool, target, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_match` after each finished match.
    ///
    /// # Errors
    /// Fails for pools of fewer than four bots, duplicated names, or a match that could not be
    /// played to the end.
    #[instrument(skip_all, fields(pool = pool.len(), games = target))]
    pub fn run_with(
        &self,
        pool: &[Bot],
        target: u32,
        mut on_match: impl FnMut(&MatchRecord),
    ) -> anyhow::Result<Vec<Rating>> {
        if pool.len() < SEATS {
            bail!("a tournament needs at least {SEATS} bots, got {}", pool.len());
        }
        for (i, bot) in pool.iter().enumerate() {
            if pool[..i].contains(bot) {
                bail!("bot name '{}' is used twice", bot.name);
            }
        }
        let mut scores = Scoreboard::new(pool.iter().map(|b| b.name.clone()), &self.rater);

        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let capacity = self.config.parallel_matches().max(1);
        let (tx_result, rx_result) = mpsc::channel();
        let mut in_flight = vec![0u32; pool.len()];
        let mut running = 0;
        let mut scheduled = 0;

        let outcome = loop {
            // fill every free slot
            while running < capacity {
                let counts: Vec<u32> = scores
                    .ratings()
                    .iter()
                    .zip(&in_flight)
                    .map(|(r, n)| r.played + n)
                    .collect();
                if counts.iter().all(|&c| c >= target) {
                    break;
                }
                let seats = select_seats(&counts, target, &mut rng);
                scheduled += 1;
                running += 1;
                for &i in &seats {
                    in_flight[i] += 1;
                }
                self.launch_match(scheduled, seats, pool, tx_result.clone())?;
            }
            if running == 0 {
                break Ok(());
            }

            // not finished <=> match running <=> result to receive
            let Finished {
                number,
                seats,
                result,
            } = rx_result
                .recv()
                .context("every match thread disappeared")?;
            running -= 1;
            for &i in &seats {
                in_flight[i] -= 1;
            }
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => break Err(e.context(format!("match #{number} failed"))),
            };

            let record = self.record(&mut scores, number, &seats, &outcome, pool);
            if self.config.verbose {
                print_match_record(&record);
            }
            on_match(&record);
        };

        if outcome.is_err() {
            // let the matches still running wind down
            for _ in 0..running {
                let _ = rx_result.recv();
            }
        }
        outcome?;
        let standings = scores.standings();

        info!(matches = scheduled, "tournament finished");
        if self.config.verbose {
            print_standings(&standings);
        }
        Ok(standings)
    }

    fn launch_match(
        &self,
        number: usize,
        seats: Vec<usize>,
        pool: &[Bot],
        tx_result: mpsc::Sender<Finished>,
    ) -> anyhow::Result<()> {
        let bots: [Bot; SEATS] = std::array::from_fn(|s| pool[seats[s]].clone());
        let board = self.board.clone();
        let config = self
            .config
            .with_seed(self.config.seed.map(|seed| seed.wrapping_add(number as u64 * 7919)));
        trace!(
            number,
            seats = ?bots.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
            "launching match"
        );

        thread::Builder::new()
            .name(format!("match-{number}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    TurnOrchestrator::new(board, config).run(&bots)
                }))
                .unwrap_or_else(|_| Err(anyhow!("match thread panicked")));
                // the scheduler stops listening only after a failure
                let _ = tx_result.send(Finished {
                    number,
                    seats,
                    result,
                });
            })
            .context("could not spawn match thread")?;
        Ok(())
    }

    fn record(
        &self,
        scores: &mut Scoreboard,
        number: usize,
        seats: &[usize],
        outcome: &MatchOutcome,
        pool: &[Bot],
    ) -> MatchRecord {
        let bot_of = |seat: &Color| seats[seat.index()];
        let order: Vec<usize> = outcome.finishing_order.iter().map(bot_of).collect();
        scores.record(&order, &self.rater);

        let names: Vec<String> = order.iter().map(|&i| pool[i].name.clone()).collect();
        MatchRecord {
            number,
            seats: outcome.seats.clone(),
            winner: names.first().cloned().unwrap_or_default(),
            finishing_order: names,
            reached_goal: outcome.winner.is_some(),
            turns: outcome.turns,
            fallbacks: outcome.stats.iter().map(|s| s.fallbacks()).sum(),
        }
    }
}

fn print_match_record(record: &MatchRecord) {
    // clear line, green match, order, red fallbacks, start of line
    println!(
        "\x1b[2K\x1b[32m{record}: \x1b[39m{} \x1b[31m{}\x1b[39m\x1b[0G",
        record.finishing_order.join(" > "),
        match record.fallbacks {
            0 => String::new(),
            n => format!("({n} fallbacks)"),
        }
    );
}

fn print_standings(standings: &[Rating]) {
    println!(
        "\x1b[32m{:<24} {:>8} {:>8} {:>6} {:>6}\x1b[39m",
        "bot", "mean", "sigma", "played", "wins"
    );
    for rating in standings {
        println!(
            "{:<24} {:>8.2} {:>8.2} {:>6} {:>6}",
            rating.name, rating.skill.mean, rating.skill.uncertainty, rating.played, rating.wins
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_prefers_bots_under_target() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let counts = [5, 2, 3, 9, 1, 4, 3];
        for _ in 0..50 {
            let mut seats = select_seats(&counts, 4, &mut rng);
            seats.sort_unstable();
            // 1, 2, 4 and 6 are under target
            assert_eq!(seats, vec![1, 2, 4, 6]);
        }
    }

    #[test]
    fn selection_fills_up_with_bots_at_then_over_target() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let counts = [4, 6, 1, 4, 5, 4];
        for _ in 0..50 {
            let seats = select_seats(&counts, 4, &mut rng);
            assert_eq!(seats.len(), SEATS);
            assert_eq!(seats[0], 2);
            let mut at: Vec<usize> = seats[1..].to_vec();
            at.sort_unstable();
            assert_eq!(at, vec![0, 3, 5]);
        }

        let counts = [7, 9, 8, 7, 8];
        let seats = select_seats(&counts, 7, &mut rng);
        assert_eq!(seats.len(), SEATS);
        assert!(seats[..2].iter().all(|&i| counts[i] == 7));
        assert!(seats[2..].iter().all(|&i| counts[i] > 7));
    }

    #[test]
    fn selection_shuffles_within_a_group() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let counts = [0; 8];
        let picks: Vec<Vec<usize>> = (0..20).map(|_| select_seats(&counts, 1, &mut rng)).collect();
        assert!(picks.iter().any(|p| p != &picks[0]));
    }

    #[test]
    fn small_pools_are_rejected() {
        let board = Arc::new(Board::standard());
        let scheduler = TournamentScheduler::new(board, Configuration::new()).unwrap();
        let pool = crate::bot::builtin::all()[..3].to_vec();
        assert!(scheduler.run(&pool, 1).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let board = Arc::new(Board::standard());
        let scheduler = TournamentScheduler::new(board, Configuration::new()).unwrap();
        let mut pool = crate::bot::builtin::all();
        pool.push(crate::bot::builtin::random());
        assert!(scheduler.run(&pool, 1).is_err());
    }
}
