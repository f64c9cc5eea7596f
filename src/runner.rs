//! Process execution.
//!
//! This module contains the `CommandRunner` seam through which every child process is
//! spawned: the external tool, diagnostic probes and the direct re-run of a server
//! command. `SystemRunner` is the real implementation on top of `tokio::process`; output
//! is either captured through reader tasks or streamed straight to the terminal.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long reader tasks may keep draining pipes after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One command to run.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Kill the child once this elapses (captured mode only).
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    /// Exit code; `None` when killed by a signal or by the timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl Captured {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }

    pub fn describe_exit(&self) -> String {
        match (self.timed_out, self.code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => format!("exit status {}", code),
            (false, None) => "terminated by signal".to_string(),
        }
    }
}

/// Spawns child processes on behalf of the invoker and diagnostics.
pub trait CommandRunner {
    /// Runs to completion with stdout and stderr buffered.
    async fn capture(&self, invocation: &Invocation) -> io::Result<Captured>;

    /// Runs to completion with stdout and stderr attached to the terminal. The returned
    /// value carries only the exit status.
    async fn stream(&self, invocation: &Invocation) -> io::Result<Captured>;

    /// Resolves a program on the search path.
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Runs real subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        if !invocation.env.is_empty() {
            command.envs(&invocation.env);
        }
        command
    }
}

impl CommandRunner for SystemRunner {
    async fn capture(&self, invocation: &Invocation) -> io::Result<Captured> {
        let mut command = Self::command(invocation);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

        let (code, timed_out) = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => (status?.code(), false),
                Err(_) => {
                    let _ = child.kill().await;
                    (None, true)
                }
            },
            None => (child.wait().await?.code(), false),
        };

        Ok(Captured {
            code,
            stdout: join_output(stdout, timed_out).await,
            stderr: join_output(stderr, timed_out).await,
            timed_out,
        })
    }

    async fn stream(&self, invocation: &Invocation) -> io::Result<Captured> {
        let mut command = Self::command(invocation);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let status = command.spawn()?.wait().await?;
        Ok(Captured {
            code: status.code(),
            ..Captured::default()
        })
    }
}

async fn read_all<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

// A killed child may leave grandchildren holding the pipes open, so draining after a
// timeout is bounded.
async fn join_output(handle: Option<JoinHandle<String>>, timed_out: bool) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    if timed_out {
        match tokio::time::timeout(DRAIN_GRACE, handle).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => String::new(),
        }
    } else {
        handle.await.unwrap_or_default()
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted runner used by invoker and diagnostics tests.

    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone)]
    pub enum Reply {
        Exit {
            code: i32,
            stdout: String,
            stderr: String,
        },
        Missing,
        TimedOut {
            stderr: String,
        },
    }

    pub fn ok(stdout: &str) -> Reply {
        Reply::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Reply {
        Reply::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    // `program arg arg ...`, unmasked.
    fn command_line(invocation: &Invocation) -> String {
        let mut parts = Vec::with_capacity(1 + invocation.args.len());
        parts.push(invocation.program.clone());
        parts.extend(invocation.args.iter().cloned());
        parts.join(" ")
    }

    struct Rule {
        prefix: String,
        replies: VecDeque<Reply>,
    }

    /// Matches each command line against registered prefixes; the first matching rule
    /// answers. A rule's replies are consumed in order and the last one repeats.
    /// Unmatched commands exit with status 1 and no output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: RefCell<Vec<Rule>>,
        calls: RefCell<Vec<String>>,
        streamed: RefCell<Vec<String>>,
        on_path: Vec<String>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, prefix: &str, reply: Reply) -> Self {
            {
                let mut rules = self.rules.borrow_mut();
                match rules.iter_mut().find(|rule| rule.prefix == prefix) {
                    Some(rule) => rule.replies.push_back(reply),
                    None => rules.push(Rule {
                        prefix: prefix.to_string(),
                        replies: VecDeque::from([reply]),
                    }),
                }
            }
            self
        }

        pub fn with_program(mut self, program: &str) -> Self {
            self.on_path.push(program.to_string());
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        /// Calls that went through [`CommandRunner::stream`].
        pub fn streamed(&self) -> Vec<String> {
            self.streamed.borrow().clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        }

        fn answer(&self, invocation: &Invocation) -> io::Result<Captured> {
            let line = command_line(invocation);
            self.calls.borrow_mut().push(line.clone());
            let reply = {
                let mut rules = self.rules.borrow_mut();
                rules
                    .iter_mut()
                    .find(|rule| line.starts_with(&rule.prefix))
                    .map(|rule| {
                        if rule.replies.len() > 1 {
                            rule.replies.pop_front().unwrap()
                        } else {
                            rule.replies[0].clone()
                        }
                    })
            };
            match reply {
                Some(Reply::Exit {
                    code,
                    stdout,
                    stderr,
                }) => Ok(Captured {
                    code: Some(code),
                    stdout,
                    stderr,
                    timed_out: false,
                }),
                Some(Reply::Missing) => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "No such file or directory (os error 2)",
                )),
                Some(Reply::TimedOut { stderr }) => Ok(Captured {
                    code: None,
                    stdout: String::new(),
                    stderr,
                    timed_out: true,
                }),
                None => Ok(Captured {
                    code: Some(1),
                    ..Captured::default()
                }),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn capture(&self, invocation: &Invocation) -> io::Result<Captured> {
            self.answer(invocation)
        }

        async fn stream(&self, invocation: &Invocation) -> io::Result<Captured> {
            self.streamed.borrow_mut().push(command_line(invocation));
            self.answer(invocation)
        }

        fn locate(&self, program: &str) -> Option<PathBuf> {
            self.on_path
                .iter()
                .any(|known| known == program)
                .then(|| PathBuf::from("/usr/bin").join(program))
        }
    }
}
