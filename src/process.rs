use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long pipes may stay open after the child itself has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One external program call with an explicit argv (no shell).
#[derive(Clone, Debug)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn cwd(mut self, dir: Option<&Path>) -> Self {
        self.cwd = dir.map(Path::to_path_buf);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(&a.to_string_lossy());
        }
        s
    }
}

#[derive(Clone, Debug)]
pub struct ProcessOutput {
    /// `None` when the process ended without an exit code (signal).
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {} seconds and was killed", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

/// Runs external programs to completion.
pub trait Executor {
    fn execute(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// Real child processes, with a bounded wait when the invocation has a timeout.
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, inv: &Invocation) -> Result<ProcessOutput, ProcessError> {
        let program = inv.program.display().to_string();
        log::info!("exec: {}", inv.display());

        let mut command = Command::new(&inv.program);
        command
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &inv.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let started = Instant::now();

        // drain pipes on their own threads so a chatty child never blocks on a full pipe
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    kill_and_reap(&mut child);
                    return Err(ProcessError::Wait { program, source });
                }
            }

            if let Some(timeout) = inv.timeout {
                if started.elapsed() > timeout {
                    kill_and_reap(&mut child);
                    log::warn!("{} killed after {:?}", program, timeout);
                    return Err(ProcessError::TimedOut { program, timeout });
                }
            }

            thread::sleep(POLL_INTERVAL);
        };

        // a detached grandchild can hold the pipes open long after the child exits
        let drain_until = Instant::now() + DRAIN_GRACE;
        let (stdout, stdout_closed) = drain(stdout, drain_until);
        let (stderr, stderr_closed) = drain(stderr, drain_until);
        if !(stdout_closed && stderr_closed) {
            log::warn!(
                "{} exited with its pipes still held open; keeping partial output",
                program
            );
        }

        let out = ProcessOutput {
            code: status.code(),
            stdout,
            stderr,
            elapsed: started.elapsed(),
        };
        log::debug!(
            "{} exited with {:?} in {:.1}s",
            program,
            out.code,
            out.elapsed.as_secs_f64()
        );
        Ok(out)
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Forwards everything read from `pipe` as chunks; the channel closes at EOF.
fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut p| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match p.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        });
        rx
    })
}

/// Collects chunks until the reader hits EOF or `until` passes.
/// The flag is false when the deadline cut the pipe short.
fn drain(rx: Option<Receiver<Vec<u8>>>, until: Instant) -> (String, bool) {
    let Some(rx) = rx else {
        return (String::new(), true);
    };
    let mut buf = Vec::new();
    let closed = loop {
        match rx.recv_timeout(until.saturating_duration_since(Instant::now())) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break true,
            Err(RecvTimeoutError::Timeout) => break false,
        }
    };
    (String::from_utf8_lossy(&buf).into_owned(), closed)
}

/// Scripted stand-in for `SystemExecutor` used by the unit tests.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    pub type Responder = Box<dyn Fn(&Invocation) -> Result<ProcessOutput, ProcessError>>;

    pub struct FakeExecutor {
        pub calls: RefCell<Vec<Invocation>>,
        queued: RefCell<VecDeque<Responder>>,
        fallback: Responder,
    }

    pub fn exit(code: i32, stdout: &str) -> ProcessOutput {
        ProcessOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    impl FakeExecutor {
        /// Every call succeeds with empty output unless a response is queued.
        pub fn new() -> Self {
            Self::with_fallback(Box::new(|_| Ok(exit(0, ""))))
        }

        pub fn with_fallback(fallback: Responder) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                queued: RefCell::new(VecDeque::new()),
                fallback,
            }
        }

        pub fn push(&self, responder: Responder) {
            self.queued.borrow_mut().push_back(responder);
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|c| c.program.display().to_string())
                .collect()
        }

        pub fn args_of(&self, index: usize) -> Vec<String> {
            self.calls.borrow()[index]
                .args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        }
    }

    impl Executor for FakeExecutor {
        fn execute(&self, inv: &Invocation) -> Result<ProcessOutput, ProcessError> {
            self.calls.borrow_mut().push(inv.clone());
            let next = self.queued.borrow_mut().pop_front();
            match next {
                Some(responder) => responder(inv),
                None => (self.fallback)(inv),
            }
        }
    }
}
