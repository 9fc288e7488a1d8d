use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc::{self, Sender},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{debug, warn};

use super::{MatchToken, MoveSandbox, PendingProposal};
use crate::{
    bot::{NativeProgram, MAX_STALLED_WORKERS},
    error::SandboxFault,
    game::{Move, MoveOptions},
};

const IDLE: u8 = 0;
const BUSY: u8 = 1;
// torn down while busy, the call has not returned yet
const ABANDONED: u8 = 2;
const RELEASED: u8 = 3;

/// Runs an in-process bot on a dedicated worker thread.
///
/// Options cross the boundary as JSON, so the bot only ever sees its own copy. A worker that
/// misses its deadline cannot be stopped: it is abandoned, and no other worker is started for
/// this sandbox until its call returns. Requests made meanwhile time out at once. Across all
/// sandboxes of a program at most [`MAX_STALLED_WORKERS`] abandoned workers exist.
pub struct ThreadSandbox {
    label: String,
    program: NativeProgram,
    worker: Option<Worker>,
    stalled: Option<Arc<AtomicU8>>,
}

struct Job {
    payload: String,
    reply: Sender<Result<Move, SandboxFault>>,
}

struct Worker {
    jobs: Sender<Job>,
    state: Arc<AtomicU8>,
}

impl ThreadSandbox {
    /// Sandbox running `program`, its threads named after `label`.
    pub fn new(label: impl Into<String>, program: NativeProgram) -> ThreadSandbox {
        let mut sandbox = ThreadSandbox {
            label: label.into(),
            program,
            worker: None,
            stalled: None,
        };
        if let Err(e) = sandbox.ensure_worker() {
            warn!(bot = %sandbox.label, "could not start worker: {e:#}");
        }
        sandbox
    }

    fn ensure_worker(&mut self) -> anyhow::Result<&Worker> {
        if self.worker.is_none() {
            self.worker = Some(spawn_worker(&self.label, self.program.clone())?);
        }
        self.worker
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("worker vanished"))
    }

    /// True while the abandoned worker of this sandbox is still inside the bot's code.
    fn still_stalled(&mut self) -> bool {
        let stuck = self
            .stalled
            .as_ref()
            .is_some_and(|state| state.load(Ordering::Acquire) == ABANDONED);
        if !stuck {
            self.stalled = None;
        }
        stuck
    }
}

impl MoveSandbox for ThreadSandbox {
    fn propose(
        &mut self,
        token: MatchToken,
        options: &MoveOptions,
        budget: Duration,
    ) -> PendingProposal {
        if self
            .worker
            .as_ref()
            .is_some_and(|w| w.state.load(Ordering::Acquire) == BUSY)
        {
            debug!(bot = %self.label, "previous request still running");
            self.teardown();
        }
        if self.still_stalled() {
            debug!(bot = %self.label, "abandoned worker still running, not starting another");
            return PendingProposal::resolved(token, options, Err(SandboxFault::Timeout));
        }
        if self.program.stalled_workers() >= MAX_STALLED_WORKERS {
            warn!(bot = %self.label, "too many stuck workers, not starting another");
            return PendingProposal::resolved(token, options, Err(SandboxFault::Timeout));
        }

        let payload = match serde_json::to_string(options) {
            Ok(payload) => payload,
            Err(e) => {
                let fault = SandboxFault::Crashed(format!("cannot encode options: {e}"));
                return PendingProposal::resolved(token, options, Err(fault));
            }
        };
        let worker = match self.ensure_worker() {
            Ok(worker) => worker,
            Err(e) => {
                let fault = SandboxFault::Unavailable(format!("{e:#}"));
                return PendingProposal::resolved(token, options, Err(fault));
            }
        };

        let (tx, rx) = mpsc::channel();
        worker.state.store(BUSY, Ordering::Release);
        if worker.jobs.send(Job { payload, reply: tx }).is_err() {
            self.worker = None;
            let fault = SandboxFault::Crashed("worker thread is gone".into());
            return PendingProposal::resolved(token, options, Err(fault));
        }
        PendingProposal::new(token, options, budget, rx)
    }

    fn teardown(&mut self) {
        // dropping the job sender lets an idle worker exit
        let Some(worker) = self.worker.take() else {
            return;
        };
        let stalled = self.program.stalled_counter();
        stalled.fetch_add(1, Ordering::AcqRel);
        if worker
            .state
            .compare_exchange(BUSY, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!(bot = %self.label, "worker stuck in the bot's code, abandoned");
            self.stalled = Some(worker.state);
        } else {
            stalled.fetch_sub(1, Ordering::AcqRel);
            debug!(bot = %self.label, "worker stopped");
        }
    }
}

impl Drop for ThreadSandbox {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_worker(label: &str, program: NativeProgram) -> anyhow::Result<Worker> {
    let (jobs, queue) = mpsc::channel::<Job>();
    let state = Arc::new(AtomicU8::new(IDLE));
    let flag = state.clone();

    thread::Builder::new()
        .name(format!("bot-{label}"))
        .spawn(move || {
            for job in queue {
                let outcome = run_job(&program, &job.payload);
                let abandoned = flag
                    .compare_exchange(BUSY, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err();
                // the host may have stopped waiting
                let _ = job.reply.send(outcome);
                if abandoned {
                    flag.store(RELEASED, Ordering::Release);
                    program.stalled_counter().fetch_sub(1, Ordering::AcqRel);
                    break;
                }
            }
        })?;

    Ok(Worker { jobs, state })
}

fn run_job(program: &NativeProgram, payload: &str) -> Result<Move, SandboxFault> {
    let options: MoveOptions = serde_json::from_str(payload)
        .map_err(|e| SandboxFault::Crashed(format!("cannot decode options: {e}")))?;
    match panic::catch_unwind(AssertUnwindSafe(|| program.call(&options))) {
        Ok(Ok(mv)) => Ok(mv),
        Ok(Err(e)) => Err(SandboxFault::Crashed(format!("{e:#}"))),
        Err(panic) => Err(SandboxFault::Crashed(format!(
            "panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize},
            Arc,
        },
        time::Instant,
    };

    use super::*;
    use crate::{board::Board, rules};

    fn options() -> MoveOptions {
        let state = rules::initial_state(Arc::new(Board::standard()), 11).unwrap();
        rules::legal_moves(&state, rules::current_player(&state)).options
    }

    fn sandbox<F>(f: F) -> ThreadSandbox
    where
        F: Fn(&MoveOptions) -> anyhow::Result<Move> + Send + Sync + 'static,
    {
        ThreadSandbox::new("test", NativeProgram::new(Arc::new(f)))
    }

    #[test]
    fn answers_with_the_bot_move() {
        let options = options();
        let mut sandbox = sandbox(|o| Ok(o.moves[0]));
        let proposal = sandbox
            .propose(MatchToken(1), &options, Duration::from_secs(5))
            .wait();
        assert_eq!(proposal.outcome, Ok(options.moves[0]));
        assert_eq!(proposal.token, MatchToken(1));
        assert_eq!(proposal.seat, options.color);
    }

    #[test]
    fn bot_errors_and_panics_are_crashes() {
        let options = options();
        let mut failing = sandbox(|_| anyhow::bail!("no idea"));
        let outcome = failing
            .propose(MatchToken(1), &options, Duration::from_secs(5))
            .wait()
            .outcome;
        assert!(matches!(outcome, Err(SandboxFault::Crashed(m)) if m.contains("no idea")));

        let mut panicking = sandbox(|_| panic!("boom"));
        let outcome = panicking
            .propose(MatchToken(1), &options, Duration::from_secs(5))
            .wait()
            .outcome;
        assert!(matches!(outcome, Err(SandboxFault::Crashed(m)) if m.contains("boom")));

        // the worker survives a panic
        let outcome = panicking
            .propose(MatchToken(2), &options, Duration::from_secs(5))
            .wait()
            .outcome;
        assert!(matches!(outcome, Err(SandboxFault::Crashed(_))));
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Move function blocking until `release` is set, counting its calls.
    fn blocking(release: &Arc<AtomicBool>, calls: &Arc<AtomicUsize>) -> NativeProgram {
        let (gate, count) = (release.clone(), calls.clone());
        NativeProgram::new(Arc::new(move |o: &MoveOptions| -> anyhow::Result<Move> {
            count.fetch_add(1, Ordering::SeqCst);
            while !gate.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
            Ok(o.moves[0])
        }))
    }

    #[test]
    fn hung_bot_times_out_and_blocks_its_seat_until_it_returns() {
        let options = options();
        let release = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let program = blocking(&release, &calls);
        let mut sandbox = ThreadSandbox::new("hung", program.clone());

        let start = Instant::now();
        let proposal = sandbox
            .propose(MatchToken(1), &options, Duration::from_millis(50))
            .wait();
        assert_eq!(proposal.outcome, Err(SandboxFault::Timeout));
        assert!(start.elapsed() < Duration::from_secs(5));
        sandbox.teardown();
        assert_eq!(program.stalled_workers(), 1);

        // no second thread while the first one is stuck
        let proposal = sandbox
            .propose(MatchToken(1), &options, Duration::from_secs(5))
            .wait();
        assert_eq!(proposal.outcome, Err(SandboxFault::Timeout));
        assert!(proposal.elapsed < Duration::from_secs(1));
        wait_until(|| calls.load(Ordering::SeqCst) == 1);

        release.store(true, Ordering::SeqCst);
        wait_until(|| program.stalled_workers() == 0);
        let proposal = sandbox
            .propose(MatchToken(1), &options, Duration::from_secs(5))
            .wait();
        assert_eq!(proposal.outcome, Ok(options.moves[0]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stuck_workers_are_capped_per_program() {
        let options = options();
        let release = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let program = blocking(&release, &calls);
        let mut sandboxes: Vec<ThreadSandbox> = (0..MAX_STALLED_WORKERS + 2)
            .map(|i| ThreadSandbox::new(format!("seat-{i}"), program.clone()))
            .collect();

        for sandbox in &mut sandboxes {
            let proposal = sandbox
                .propose(MatchToken(1), &options, Duration::from_millis(20))
                .wait();
            assert_eq!(proposal.outcome, Err(SandboxFault::Timeout));
            sandbox.teardown();
        }
        assert_eq!(program.stalled_workers(), MAX_STALLED_WORKERS);
        wait_until(|| calls.load(Ordering::SeqCst) == MAX_STALLED_WORKERS);

        release.store(true, Ordering::SeqCst);
        wait_until(|| program.stalled_workers() == 0);
        for sandbox in &mut sandboxes {
            let proposal = sandbox
                .propose(MatchToken(2), &options, Duration::from_secs(5))
                .wait();
            assert_eq!(proposal.outcome, Ok(options.moves[0]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2 * MAX_STALLED_WORKERS + 2);
    }

    #[test]
    fn bot_mutations_stay_on_its_copy() {
        let options = options();
        let mut sandbox = sandbox(|o| {
            let mut mine = o.clone();
            mine.moves.clear();
            mine.all_spots.clear();
            Ok(o.moves[0])
        });
        let before = options.clone();
        sandbox
            .propose(MatchToken(1), &options, Duration::from_secs(5))
            .wait();
        assert_eq!(options, before);
    }
}
