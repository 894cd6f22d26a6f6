//! Line-oriented access to an external scanner subprocess.
//!
//! The scanner binaries are opaque; all acquisition code consumes them
//! through [`LineSource`], so protocol decoders can be driven by scripted
//! fixtures in tests without spawning anything.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, warn};

/// A stoppable stream of output lines.
pub trait LineSource: Send {
    /// Wait up to `wait` for the next line. `None` means nothing arrived
    /// in time (or the stream ended); the caller decides when to give up.
    fn poll_line(&mut self, wait: Duration) -> Result<Option<String>>;

    /// Terminate the underlying producer. Idempotent.
    fn kill(&mut self);
}

/// Factory for (re)spawning a line source; the PCH state machine respawns
/// its scanner on retry.
pub trait SpawnLineSource: Send {
    fn spawn(&self) -> Result<Box<dyn LineSource>>;
}

impl<F> SpawnLineSource for F
where
    F: Fn() -> Result<Box<dyn LineSource>> + Send,
{
    fn spawn(&self) -> Result<Box<dyn LineSource>> {
        self()
    }
}

/// Subprocess-backed line source. Stdout and stderr are drained by reader
/// threads into a channel, so polling never blocks on the pipe itself.
pub struct ProcessLineSource {
    child: Child,
    rx: Receiver<String>,
}

impl ProcessLineSource {
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("empty scanner command line")?;

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn scanner: {program}"))?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx);
        }

        debug!("Spawned scanner subprocess: {program}");
        Ok(Self { child, rx })
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R, tx: Sender<String>) {
    std::thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

impl LineSource for ProcessLineSource {
    fn poll_line(&mut self, wait: Duration) -> Result<Option<String>> {
        match self.rx.recv_timeout(wait) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                // Pipe closed; keep the caller's poll cadence instead of
                // spinning.
                std::thread::sleep(wait);
                Ok(None)
            }
        }
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            // Already gone is fine.
            debug!("Scanner kill: {e}");
        }
        if let Err(e) = self.child.wait() {
            warn!("Scanner wait failed: {e}");
        }
    }
}

impl Drop for ProcessLineSource {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
pub(crate) mod script {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Canned line source for driving protocol decoders in tests.
    pub struct ScriptedLineSource {
        lines: VecDeque<String>,
    }

    impl ScriptedLineSource {
        pub fn new<I, S>(lines: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                lines: lines.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl LineSource for ScriptedLineSource {
        fn poll_line(&mut self, _wait: Duration) -> Result<Option<String>> {
            Ok(self.lines.pop_front())
        }

        fn kill(&mut self) {
            self.lines.clear();
        }
    }

    /// Factory dealing out one script per spawn and counting spawns.
    pub struct ScriptedSpawner {
        scripts: Mutex<VecDeque<Vec<String>>>,
        pub spawns: Arc<AtomicU32>,
    }

    impl ScriptedSpawner {
        pub fn new(scripts: Vec<Vec<String>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                spawns: Arc::new(AtomicU32::new(0)),
            }
        }

        pub fn spawn_count(&self) -> u32 {
            self.spawns.load(Ordering::SeqCst)
        }
    }

    impl SpawnLineSource for ScriptedSpawner {
        fn spawn(&self) -> Result<Box<dyn LineSource>> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(Box::new(ScriptedLineSource::new(script)))
        }
    }
}
