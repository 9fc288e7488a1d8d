//! Child processes hosting out-of-process bots.

use std::{
    path::Path,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{trace, warn};

/// A bot process. Killed on drop.
#[derive(Debug)]
pub struct BotProcess {
    child: Child,
    cleaned_up: bool,
}

impl BotProcess {
    /// Launch `program` with `args`. Stdin and stdout are discarded; stderr too unless
    /// `allow_stderr`.
    pub fn launch(program: &Path, args: &[String], allow_stderr: bool) -> anyhow::Result<BotProcess> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null());
        if !allow_stderr {
            cmd.stderr(Stdio::null());
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("could not launch '{}'", program.display()))?;
        trace!(pid = child.id(), "bot process launched");

        Ok(BotProcess {
            child,
            cleaned_up: false,
        })
    }

    /// OS identifier of the process.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// True once the process has exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Kill the process and reap it, waiting at most `max_duration` for it to go away.
    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        if !self.has_exited() {
            // fails only if the process already exited
            let _ = self.child.kill();
        }
        let deadline = Instant::now() + max_duration;
        loop {
            if self
                .child
                .try_wait()
                .context("could not wait for bot process")?
                .is_some()
            {
                self.cleaned_up = true;
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("bot process {} still alive after kill", self.child.id());
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for BotProcess {
    fn drop(&mut self) {
        static CLEANUP_DURATION: Duration = Duration::from_secs(1);
        if let Err(e) = self.try_kill(CLEANUP_DURATION) {
            warn!("leaking bot process: {e:#}");
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::{fs, path::PathBuf};

    use super::*;

    fn stderr_target(allow_stderr: bool) -> PathBuf {
        let mut process =
            BotProcess::launch(Path::new("sleep"), &["5".to_string()], allow_stderr).unwrap();
        let target = fs::read_link(format!("/proc/{}/fd/2", process.id())).unwrap();
        process.try_kill(Duration::from_secs(1)).unwrap();
        assert!(process.has_exited());
        target
    }

    #[test]
    fn stderr_is_discarded_unless_allowed() {
        assert_eq!(stderr_target(false), Path::new("/dev/null"));
        // inherited from the host
        let own = fs::read_link("/proc/self/fd/2").unwrap();
        assert_eq!(stderr_target(true), own);
    }
}
