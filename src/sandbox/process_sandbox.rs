use std::{
    io::{BufRead, BufReader, ErrorKind, Write},
    net::{Ipv4Addr, Shutdown, TcpListener, TcpStream},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use tracing::{debug, instrument, warn};

use super::{MatchToken, MoveSandbox, PendingProposal, SandboxSettings};
use crate::{
    error::SandboxFault,
    game::{Move, MoveOptions},
    process::BotProcess,
    protocol::{self, BotReply, Request, Response},
};

/// Runs a bot executable as a child process talking the [`protocol`](crate::protocol) over a
/// loopback socket.
///
/// A bot that misses its deadline is killed; the next request relaunches it. A bot that cannot
/// be launched when the sandbox is created stays unavailable for the whole match.
pub struct ProcessSandbox {
    label: String,
    program: PathBuf,
    args: Vec<String>,
    settings: SandboxSettings,
    link: Option<Link>,
    failure: Option<String>,
    next_request: u64,
}

struct Link {
    writer: TcpStream,
    waiting: Arc<Mutex<Option<Waiter>>>,
    alive: Arc<AtomicBool>,
    process: BotProcess,
}

struct Waiter {
    token: MatchToken,
    request: u64,
    reply: Sender<Result<Move, SandboxFault>>,
}

fn lock(waiting: &Mutex<Option<Waiter>>) -> MutexGuard<'_, Option<Waiter>> {
    waiting.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessSandbox {
    /// Launch `program` and wait up to the startup timeout of `settings` for it to connect.
    pub fn new(
        label: impl Into<String>,
        program: PathBuf,
        args: Vec<String>,
        settings: SandboxSettings,
    ) -> ProcessSandbox {
        let mut sandbox = ProcessSandbox {
            label: label.into(),
            program,
            args,
            settings,
            link: None,
            failure: None,
            next_request: 0,
        };
        match sandbox.connect() {
            Ok(link) => sandbox.link = Some(link),
            Err(e) => {
                warn!(bot = %sandbox.label, "bot is unavailable: {e:#}");
                sandbox.failure = Some(format!("{e:#}"));
            }
        }
        sandbox
    }

    /// True while a child process is connected.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    #[instrument(skip_all, fields(bot = %self.label))]
    fn connect(&self) -> anyhow::Result<Link> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .context("could not create TcpListener")?;
        let port = listener.local_addr()?.port().to_string();
        let args: Vec<String> = std::iter::once(port).chain(self.args.iter().cloned()).collect();

        let mut process = BotProcess::launch(&self.program, &args, self.settings.bot_stderr)?;
        listener
            .set_nonblocking(true)
            .context("setting non-blocking to true")?;

        let deadline = Instant::now() + self.settings.startup_timeout;
        let stream = loop {
            match listener.accept() {
                Ok((stream, _addr)) => break stream,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e).context("accepting bot connection"),
            }
            if process.has_exited() {
                bail!("bot exited before connecting");
            }
            if Instant::now() >= deadline {
                bail!("no connection within {:?}", self.settings.startup_timeout);
            }
            thread::sleep(Duration::from_millis(5));
        };
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        debug!(pid = process.id(), "bot connected");

        let reader = stream.try_clone()?;
        let waiting = Arc::new(Mutex::new(None));
        let alive = Arc::new(AtomicBool::new(true));
        let (slot, flag) = (waiting.clone(), alive.clone());
        let label = self.label.clone();
        thread::Builder::new()
            .name(format!("bot-io-{}", self.label))
            .spawn(move || read_responses(reader, &slot, &flag, &label))?;

        Ok(Link {
            writer: stream,
            waiting,
            alive,
            process,
        })
    }

    fn send(
        &mut self,
        token: MatchToken,
        options: &MoveOptions,
        budget: Duration,
    ) -> anyhow::Result<mpsc::Receiver<Result<Move, SandboxFault>>> {
        let Some(link) = self.link.as_mut() else {
            bail!("bot is not connected");
        };
        self.next_request += 1;
        let request = Request {
            token,
            request: self.next_request,
            options: options.clone(),
        };
        let line = protocol::encode(&request)?;

        let (tx, rx) = mpsc::channel();
        *lock(&link.waiting) = Some(Waiter {
            token,
            request: request.request,
            reply: tx,
        });
        link.writer
            .set_write_timeout(Some(budget.max(Duration::from_millis(1))))?;
        link.writer
            .write_all(line.as_bytes())
            .context("could not send request")?;
        Ok(rx)
    }
}

impl MoveSandbox for ProcessSandbox {
    fn propose(
        &mut self,
        token: MatchToken,
        options: &MoveOptions,
        budget: Duration,
    ) -> PendingProposal {
        if let Some(reason) = &self.failure {
            let fault = SandboxFault::Unavailable(reason.clone());
            return PendingProposal::resolved(token, options, Err(fault));
        }
        if self
            .link
            .as_mut()
            .is_some_and(|link| {
                !link.alive.load(Ordering::Acquire)
                    || link.process.has_exited()
                    || lock(&link.waiting).is_some()
            })
        {
            debug!(bot = %self.label, "bot process is gone or still busy");
            self.teardown();
        }
        if self.link.is_none() {
            match self.connect() {
                Ok(link) => self.link = Some(link),
                Err(e) => {
                    let fault = SandboxFault::Unavailable(format!("relaunch failed: {e:#}"));
                    return PendingProposal::resolved(token, options, Err(fault));
                }
            }
        }

        match self.send(token, options, budget) {
            Ok(rx) => PendingProposal::new(token, options, budget, rx),
            Err(e) => {
                self.teardown();
                let fault = SandboxFault::Crashed(format!("{e:#}"));
                PendingProposal::resolved(token, options, Err(fault))
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.writer.shutdown(Shutdown::Both);
            if let Err(e) = link.process.try_kill(Duration::from_secs(1)) {
                warn!(bot = %self.label, "{e:#}");
            }
            debug!(bot = %self.label, "bot process stopped");
        }
    }
}

impl Drop for ProcessSandbox {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn read_responses(
    stream: TcpStream,
    waiting: &Mutex<Option<Waiter>>,
    alive: &AtomicBool,
    label: &str,
) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else {
            break;
        };
        let mut slot = lock(waiting);
        match protocol::decode::<Response>(&line) {
            Ok(response) => match slot.take() {
                Some(waiter)
                    if waiter.token == response.token && waiter.request == response.request =>
                {
                    let outcome = match response.reply {
                        BotReply::Move(mv) => Ok(mv),
                        BotReply::Error(message) => Err(SandboxFault::Crashed(message)),
                    };
                    let _ = waiter.reply.send(outcome);
                }
                other => {
                    debug!(bot = label, request = response.request, "dropping stale response");
                    *slot = other;
                }
            },
            Err(e) => {
                if let Some(waiter) = slot.take() {
                    let _ = waiter.reply.send(Err(SandboxFault::Crashed(format!("{e:#}"))));
                }
            }
        }
    }
    alive.store(false, Ordering::Release);
    if let Some(waiter) = lock(waiting).take() {
        let _ = waiter
            .reply
            .send(Err(SandboxFault::Crashed("bot closed the connection".into())));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{board::Board, rules};

    #[test]
    fn missing_program_is_unavailable() {
        let state = rules::initial_state(Arc::new(Board::standard()), 1).unwrap();
        let options = rules::legal_moves(&state, rules::current_player(&state)).options;
        let mut sandbox = ProcessSandbox::new(
            "ghost",
            PathBuf::from("/definitely/not/a/bot"),
            vec![],
            SandboxSettings {
                startup_timeout: Duration::from_millis(200),
                bot_stderr: false,
            },
        );
        assert!(!sandbox.is_connected());
        let outcome = sandbox
            .propose(MatchToken(1), &options, Duration::from_secs(1))
            .wait()
            .outcome;
        assert!(matches!(outcome, Err(SandboxFault::Unavailable(_))));
    }
}
