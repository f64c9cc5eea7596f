//! Process Invoker.
//!
//! Runs the external tool on behalf of the CLI: registration probes, launch with post-launch
//! verification, stop and stop-all. Real argument values (secrets included) are sent to the
//! tool; everything echoed to the terminal, the tracing log or a debug log is masked first.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::builder::CommandBuilder;
use crate::config::{LaunchSpec, Registry};
use crate::diagnostics;
use crate::error::{CmcpError, Result};
use crate::masking;
use crate::output;
use crate::runner::{Captured, CommandRunner, Invocation};
use crate::status::{self, ServerHealth};

/// Command group every tool invocation is issued under.
pub const TOOL_GROUP: &str = "mcp";

/// Program name used when no explicit binary is configured and none is found on the path.
pub const DEFAULT_TOOL: &str = "claude";

/// Whether tool output is buffered (and filtered) or attached to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Captured,
    Raw,
}

impl DisplayMode {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            DisplayMode::Raw
        } else {
            DisplayMode::Captured
        }
    }
}

/// How to reach the external tool.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub program: String,
    /// Insert the tool's own debug flag into add and remove calls.
    pub debug_flag: bool,
}

impl ToolSettings {
    pub fn resolve(explicit: Option<PathBuf>, debug_flag: bool) -> Self {
        let program = explicit
            .or_else(|| which::which(DEFAULT_TOOL).ok())
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| DEFAULT_TOOL.to_string());
        Self {
            program,
            debug_flag,
        }
    }
}

/// Timing of the post-launch verification loop.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    /// Wait before the first poll.
    pub settle: Duration,
    pub attempts: u32,
    /// The wait after attempt `n` (zero-based) is `step * (n + 1)`.
    pub step: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            attempts: 3,
            step: Duration::from_secs(1),
        }
    }
}

impl VerifyPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.step * (attempt + 1)
    }
}

/// Where per-operation debug logs go. Log failures never fail the operation.
#[derive(Debug, Clone)]
pub struct DebugLogs {
    dir: Option<PathBuf>,
}

impl DebugLogs {
    pub fn in_temp_dir() -> Self {
        Self::at(std::env::temp_dir().join("cmcp-debug"))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    fn create(&self, operation: &str, command: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let path = dir.join(format!("cmcp-{}-{}.log", operation, log_timestamp()));
        let header = format!("Command: {}\nTimestamp: {}\n\n", command, log_timestamp());
        let written = fs::create_dir_all(dir).and_then(|_| fs::write(&path, header));
        match written {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not create debug log");
                None
            }
        }
    }

    fn append(path: Option<&Path>, text: &str) {
        let Some(path) = path else { return };
        let result = OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(text.as_bytes()));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "could not write debug log");
        }
    }
}

fn log_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

fn capture_report(captured: &Captured) -> String {
    format!(
        "Exit: {}\n\nStdout:\n{}\n\nStderr:\n{}\n\n",
        captured.describe_exit(),
        masking::mask_output(&captured.stdout),
        masking::mask_output(&captured.stderr)
    )
}

// Appends the debug log pointer to errors whose text is shown as-is.
fn with_log_hint(err: CmcpError, log: Option<&Path>) -> CmcpError {
    let Some(path) = log else { return err };
    let hint = output::debug_log_hint(path);
    match err {
        CmcpError::Invocation { message } => CmcpError::Invocation {
            message: format!("{}\n\n{}", message, hint),
        },
        CmcpError::VerificationFailed { message } => CmcpError::VerificationFailed {
            message: format!("{}\n\n{}", message, hint),
        },
        CmcpError::VerificationTimeout { message } => CmcpError::VerificationTimeout {
            message: format!("{}\n\n{}", message, hint),
        },
        other => other,
    }
}

pub struct Invoker<R> {
    runner: R,
    builder: CommandBuilder,
    tool: ToolSettings,
    policy: VerifyPolicy,
    logs: DebugLogs,
}

impl<R: CommandRunner> Invoker<R> {
    pub fn new(runner: R, builder: CommandBuilder, tool: ToolSettings) -> Self {
        Self {
            runner,
            builder,
            tool,
            policy: VerifyPolicy::default(),
            logs: DebugLogs::in_temp_dir(),
        }
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: VerifyPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[cfg(test)]
    pub fn with_debug_logs(mut self, logs: DebugLogs) -> Self {
        self.logs = logs;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    fn mutating_args(&self, args: Vec<String>) -> Vec<String> {
        if self.tool.debug_flag {
            self.builder.with_debug_flag(args)
        } else {
            args
        }
    }

    async fn run_tool(&self, args: &[String], mode: DisplayMode) -> Result<Captured> {
        debug!(
            program = %self.tool.program,
            args = %shell_words::join(self.builder.mask_tool_args(args)),
            ?mode,
            "invoking tool"
        );
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(TOOL_GROUP.to_string());
        full.extend(args.iter().cloned());
        let invocation = Invocation::new(self.tool.program.clone(), full);
        let result = match mode {
            DisplayMode::Captured => self.runner.capture(&invocation).await,
            DisplayMode::Raw => self.runner.stream(&invocation).await,
        };
        result.map_err(|err| {
            CmcpError::invocation(format!("failed to run {}: {}", self.tool.program, err))
        })
    }

    /// True when the tool's `get` succeeds for `name`. Tool errors read as false.
    pub async fn is_registered(&self, name: &str) -> bool {
        match self
            .run_tool(&self.builder.get_args(name), DisplayMode::Captured)
            .await
        {
            Ok(captured) => captured.success(),
            Err(err) => {
                debug!(server = name, error = %err, "registration probe failed");
                false
            }
        }
    }

    /// Raw `list` output. A non-zero exit is returned as-is for the caller to judge.
    pub async fn list(&self) -> Result<Captured> {
        self.run_tool(&self.builder.list_args(), DisplayMode::Captured)
            .await
    }

    /// Registers `name` with the tool and waits until the tool reports it connected.
    /// A failed verification is explained by diagnostics when they find anything.
    pub async fn launch(&self, name: &str, spec: &LaunchSpec, mode: DisplayMode) -> Result<()> {
        let args = self.mutating_args(self.builder.launch_args(name, spec)?);
        let display = self.launch_display(name, spec, mode)?;
        let log = match mode {
            DisplayMode::Captured => self.logs.create(&format!("start-{}", name), &display),
            DisplayMode::Raw => None,
        };
        info!(server = name, "registering server");
        self.mutate(
            &args,
            &display,
            mode,
            log.as_deref(),
            format!("failed to add server '{}' to Claude", name),
        )
        .await?;

        let Err(err) = self.verify(name, log.as_deref()).await else {
            info!(server = name, "server connected");
            return Ok(());
        };
        let result = diagnostics::diagnose(self, name, spec).await;
        let report = result.format_report(log.as_deref());
        DebugLogs::append(log.as_deref(), &format!("Diagnostics:\n{}\n", report));
        if result.is_inconclusive() {
            return Err(with_log_hint(err, log.as_deref()));
        }
        Err(CmcpError::Diagnosed { report })
    }

    // Raw mode echoes the pretty form with shell references; logs keep the compact one.
    fn launch_display(&self, name: &str, spec: &LaunchSpec, mode: DisplayMode) -> Result<String> {
        self.builder.display_launch(name, spec, mode == DisplayMode::Raw)
    }

    /// Polls `list` until `name` shows a success or failure marker or the attempts run
    /// out.
    pub async fn verify(&self, name: &str, log: Option<&Path>) -> Result<()> {
        tokio::time::sleep(self.policy.settle).await;
        for attempt in 0..self.policy.attempts {
            let listing = self.list().await?;
            if !listing.success() {
                return Err(CmcpError::invocation(format!(
                    "failed to check server status: {}",
                    listing.describe_exit()
                )));
            }
            let combined = listing.combined();
            DebugLogs::append(
                log,
                &format!(
                    "Verification attempt {}:\n{}\n",
                    attempt + 1,
                    masking::mask_output(&combined)
                ),
            );
            match status::health_of(&combined, name) {
                Some(ServerHealth::Failed) => {
                    return Err(CmcpError::VerificationFailed {
                        message: "failed to connect".to_string(),
                    })
                }
                Some(_) => return Ok(()),
                None => debug!(server = name, attempt, "server not reported yet"),
            }
            if attempt + 1 < self.policy.attempts {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }
        Err(CmcpError::VerificationTimeout {
            message: format!("failed to connect after {} attempts", self.policy.attempts),
        })
    }

    /// Removes `name` from the tool. Fails fast when it is not registered.
    pub async fn stop(&self, name: &str, mode: DisplayMode) -> Result<()> {
        if !self.is_registered(name).await {
            return Err(CmcpError::NotRegistered(name.to_string()));
        }
        self.remove_registered(name, mode).await
    }

    /// Stops every registry entry the tool currently knows. Continues past failures and
    /// returns the stopped names; any failure turns the whole call into `Bulk`.
    pub async fn stop_all(&self, registry: &Registry) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        let mut errors = Vec::new();
        for name in registry.names() {
            if !self.is_registered(&name).await {
                continue;
            }
            match self.remove_registered(&name, DisplayMode::Captured).await {
                Ok(()) => stopped.push(name),
                Err(err) => errors.push(format!("{}: {}", name, err)),
            }
        }
        if errors.is_empty() {
            Ok(stopped)
        } else {
            Err(CmcpError::Bulk(errors))
        }
    }

    async fn remove_registered(&self, name: &str, mode: DisplayMode) -> Result<()> {
        let stop_args = self.builder.stop_args(name);
        let display = self.builder.display_args(&stop_args);
        let args = self.mutating_args(stop_args);
        let log = match mode {
            DisplayMode::Captured => self.logs.create(&format!("stop-{}", name), &display),
            DisplayMode::Raw => None,
        };
        info!(server = name, "removing server");
        self.mutate(
            &args,
            &display,
            mode,
            log.as_deref(),
            format!("failed to remove server '{}' from Claude", name),
        )
        .await
    }

    // Shared add/remove execution. Raw mode streams the tool's output unmasked.
    async fn mutate(
        &self,
        args: &[String],
        display: &str,
        mode: DisplayMode,
        log: Option<&Path>,
        failure: String,
    ) -> Result<()> {
        if mode == DisplayMode::Raw {
            println!("  Command: {}", display);
            println!();
            let streamed = self.run_tool(args, mode).await?;
            if !streamed.success() {
                return Err(CmcpError::invocation(format!(
                    "{}: {}",
                    failure,
                    streamed.describe_exit()
                )));
            }
            return Ok(());
        }

        let captured = match self.run_tool(args, mode).await {
            Ok(captured) => captured,
            Err(err) => {
                DebugLogs::append(log, &format!("Error: {}\n", err));
                return Err(with_log_hint(err, log));
            }
        };
        DebugLogs::append(log, &capture_report(&captured));
        if !captured.success() {
            println!("  Command failed: {}", display);
            if !captured.stderr.trim().is_empty() {
                eprint!("{}", captured.stderr);
            }
            let err = CmcpError::invocation(format!("{}: {}", failure, captured.describe_exit()));
            return Err(with_log_hint(err, log));
        }
        for line in output::file_modified_lines(&captured.stdout) {
            println!("  {}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{fail, ok, Reply, ScriptedRunner};

    fn tool() -> ToolSettings {
        ToolSettings {
            program: "claude".to_string(),
            debug_flag: true,
        }
    }

    fn instant() -> VerifyPolicy {
        VerifyPolicy {
            settle: Duration::ZERO,
            attempts: 3,
            step: Duration::ZERO,
        }
    }

    fn invoker(runner: ScriptedRunner) -> Invoker<ScriptedRunner> {
        Invoker::new(runner, CommandBuilder::new(), tool())
            .with_policy(instant())
            .with_debug_logs(DebugLogs::disabled())
    }

    fn spec(command: &str, args: &[&str]) -> LaunchSpec {
        let mut spec = LaunchSpec::new(command);
        spec.args = args.iter().map(|s| s.to_string()).collect();
        spec
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = VerifyPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn launch_registers_then_verifies() {
        let runner = ScriptedRunner::new()
            .on(
                "claude mcp add",
                ok("Added stdio MCP server api with command: node s.js\nFile modified: /h/.claude.json\n"),
            )
            .on("claude mcp list", ok("api: node s.js - ✓ Connected\n"));
        let invoker = invoker(runner);

        invoker
            .launch("api", &spec("node", &["s.js"]), DisplayMode::Captured)
            .await
            .unwrap();

        assert_eq!(
            invoker.runner().calls(),
            vec!["claude mcp add --debug api -- node s.js", "claude mcp list"]
        );
    }

    #[tokio::test]
    async fn verify_stops_at_failure_marker() {
        let runner = ScriptedRunner::new()
            .on("claude mcp list", ok("api: node s.js - ✗ Failed to connect\n"));
        let invoker = invoker(runner);

        let err = invoker.verify("api", None).await.unwrap_err();

        assert!(matches!(err, CmcpError::VerificationFailed { .. }));
        assert_eq!(invoker.runner().count("claude mcp list"), 1);
    }

    #[tokio::test]
    async fn verify_retries_until_reported() {
        let runner = ScriptedRunner::new()
            .on("claude mcp list", ok("Checking MCP server health...\n"))
            .on("claude mcp list", ok("api: node s.js - ✓ Connected\n"));
        let invoker = invoker(runner);

        invoker.verify("api", None).await.unwrap();
        assert_eq!(invoker.runner().count("claude mcp list"), 2);
    }

    #[tokio::test]
    async fn verify_gives_up_after_budget() {
        let runner = ScriptedRunner::new().on("claude mcp list", ok("other: x - ✓ Connected\n"));
        let invoker = invoker(runner);

        let err = invoker.verify("api", None).await.unwrap_err();

        assert!(matches!(err, CmcpError::VerificationTimeout { .. }));
        assert_eq!(err.to_string(), "failed to connect after 3 attempts");
        assert_eq!(invoker.runner().count("claude mcp list"), 3);
    }

    #[tokio::test]
    async fn verify_surfaces_list_failures() {
        let runner = ScriptedRunner::new().on("claude mcp list", fail(1, "boom"));
        let err = invoker(runner).verify("api", None).await.unwrap_err();
        assert!(matches!(err, CmcpError::Invocation { .. }));
    }

    #[tokio::test]
    async fn failed_add_is_an_invocation_error() {
        let runner = ScriptedRunner::new().on("claude mcp add", fail(1, "already exists"));
        let invoker = invoker(runner);

        let err = invoker
            .launch("api", &spec("node", &["s.js"]), DisplayMode::Captured)
            .await
            .unwrap_err();

        assert!(matches!(err, CmcpError::Invocation { .. }));
        assert!(err.to_string().starts_with("failed to add server 'api' to Claude"));
        assert_eq!(invoker.runner().count("claude mcp list"), 0);
    }

    #[tokio::test]
    async fn missing_tool_is_an_invocation_error() {
        let runner = ScriptedRunner::new().on("claude", Reply::Missing);
        let invoker = invoker(runner);

        let err = invoker
            .launch("api", &spec("node", &[]), DisplayMode::Captured)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to run claude"));
        assert!(!invoker.is_registered("api").await);
    }

    #[tokio::test]
    async fn launch_of_missing_binary_is_diagnosed_without_leaking() {
        let mut spec = spec("nonexistent-command", &["--x"]);
        spec.env.insert("API_TOKEN".into(), "sekrit-value".into());
        let runner = ScriptedRunner::new()
            .on("claude mcp add-json", ok(""))
            .on(
                "claude mcp list",
                ok("ghost: nonexistent-command --x - ✗ Failed to connect\n"),
            )
            .on("claude mcp get ghost", ok("ghost:\n  Type: stdio\n"))
            .on("nonexistent-command", Reply::Missing);
        let invoker = invoker(runner);

        let err = invoker
            .launch("ghost", &spec, DisplayMode::Captured)
            .await
            .unwrap_err();

        let CmcpError::Diagnosed { report } = &err else {
            panic!("expected a diagnostics report, got {err:?}");
        };
        assert!(report.starts_with("Connection failed"));
        assert!(report.contains("Command 'nonexistent-command' not found"));
        assert!(!report.contains("sekrit-value"));
        assert!(invoker.runner().calls()[0].contains("sekrit-value"));
    }

    #[tokio::test]
    async fn stop_requires_registration() {
        let runner = ScriptedRunner::new().on("claude mcp get", fail(1, "No MCP server found"));
        let invoker = invoker(runner);

        let err = invoker.stop("api", DisplayMode::Captured).await.unwrap_err();

        assert!(matches!(err, CmcpError::NotRegistered(ref name) if name == "api"));
        assert_eq!(invoker.runner().count("claude mcp remove"), 0);
    }

    #[tokio::test]
    async fn stop_removes_registered_server() {
        let runner = ScriptedRunner::new()
            .on("claude mcp get api", ok(""))
            .on("claude mcp remove", ok("Removed MCP server api\n"));
        let invoker = invoker(runner);

        invoker.stop("api", DisplayMode::Captured).await.unwrap();
        assert_eq!(
            invoker.runner().calls(),
            vec!["claude mcp get api", "claude mcp remove --debug api"]
        );
    }

    #[tokio::test]
    async fn stop_all_only_touches_registered_servers() {
        let mut registry = Registry::default();
        registry.add("a", spec("node", &["a.js"])).unwrap();
        let mut b = spec("node", &["b.js"]);
        b.env.insert("TOKEN".into(), "x".into());
        registry.add("b", b).unwrap();
        let runner = ScriptedRunner::new()
            .on("claude mcp get a", ok(""))
            .on("claude mcp get b", fail(1, "not found"))
            .on("claude mcp remove", ok(""));
        let invoker = invoker(runner);

        let stopped = invoker.stop_all(&registry).await.unwrap();

        assert_eq!(stopped, vec!["a"]);
        assert_eq!(invoker.runner().count("claude mcp remove"), 1);
        assert_eq!(invoker.runner().count("claude mcp remove --debug a"), 1);
    }

    #[tokio::test]
    async fn stop_all_aggregates_failures() {
        let mut registry = Registry::default();
        registry.add("a", spec("node", &[])).unwrap();
        registry.add("b", spec("node", &[])).unwrap();
        let runner = ScriptedRunner::new()
            .on("claude mcp get", ok(""))
            .on("claude mcp remove --debug a", fail(1, "locked"))
            .on("claude mcp remove --debug b", ok(""));
        let invoker = invoker(runner);

        let err = invoker.stop_all(&registry).await.unwrap_err();

        let CmcpError::Bulk(errors) = err else {
            panic!("expected bulk error");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("a: failed to remove server 'a'"));
        assert_eq!(invoker.runner().count("claude mcp remove"), 2);
    }

    #[tokio::test]
    async fn debug_log_is_masked() {
        let dir = tempfile::tempdir().unwrap();
        let spec = github_spec();
        let runner = ScriptedRunner::new().on(
            "claude mcp add-json",
            fail(1, "invalid config GITHUB_TOKEN=ghp_real"),
        );
        let invoker = invoker(runner).with_debug_logs(DebugLogs::at(dir.path()));

        let err = invoker
            .launch("github", &spec, DisplayMode::Captured)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Debug log saved to:"));

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("cmcp-start-github-"));
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("Command: claude mcp add-json github"));
        assert!(contents.contains("Exit: exit status 1"));
        assert!(!contents.contains("ghp_real"));
    }

    fn github_spec() -> LaunchSpec {
        let mut spec = spec("docker", &["run", "-i", "img"]);
        spec.env.insert("GITHUB_TOKEN".into(), "ghp_real".into());
        spec
    }

    fn log_count(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn raw_launch_streams_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .on("claude mcp add", ok(""))
            .on("claude mcp list", ok("api: node s.js - ✓ Connected\n"));
        let invoker = invoker(runner).with_debug_logs(DebugLogs::at(dir.path()));

        invoker
            .launch("api", &spec("node", &["s.js"]), DisplayMode::Raw)
            .await
            .unwrap();

        assert_eq!(
            invoker.runner().streamed(),
            vec!["claude mcp add --debug api -- node s.js"]
        );
        assert_eq!(invoker.runner().count("claude mcp list"), 1);
        assert_eq!(log_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn raw_launch_failure_has_no_log_hint() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().on("claude mcp add", fail(1, "already exists"));
        let invoker = invoker(runner).with_debug_logs(DebugLogs::at(dir.path()));

        let err = invoker
            .launch("api", &spec("node", &["s.js"]), DisplayMode::Raw)
            .await
            .unwrap_err();

        assert!(matches!(err, CmcpError::Invocation { .. }));
        assert_eq!(
            err.to_string(),
            "failed to add server 'api' to Claude: exit status 1"
        );
        assert_eq!(invoker.runner().streamed().len(), 1);
        assert_eq!(invoker.runner().count("claude mcp list"), 0);
        assert_eq!(log_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn raw_stop_streams_removal_only() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .on("claude mcp get api", ok(""))
            .on("claude mcp remove", ok("Removed MCP server api\n"));
        let invoker = invoker(runner).with_debug_logs(DebugLogs::at(dir.path()));

        invoker.stop("api", DisplayMode::Raw).await.unwrap();

        assert_eq!(
            invoker.runner().calls(),
            vec!["claude mcp get api", "claude mcp remove --debug api"]
        );
        assert_eq!(
            invoker.runner().streamed(),
            vec!["claude mcp remove --debug api"]
        );
        assert_eq!(log_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn raw_stop_failure_has_no_log_hint() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .on("claude mcp get api", ok(""))
            .on("claude mcp remove", fail(2, "locked"));
        let invoker = invoker(runner).with_debug_logs(DebugLogs::at(dir.path()));

        let err = invoker.stop("api", DisplayMode::Raw).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to remove server 'api' from Claude: exit status 2"
        );
        assert_eq!(log_count(dir.path()), 0);
    }

    #[test]
    fn raw_launch_echo_uses_shell_references() {
        let invoker = invoker(ScriptedRunner::new());
        let spec = github_spec();

        let raw = invoker.launch_display("github", &spec, DisplayMode::Raw).unwrap();
        assert!(raw.contains("\"GITHUB_TOKEN\": $GITHUB_TOKEN"));
        assert!(!raw.contains("ghp_real"));

        let captured = invoker
            .launch_display("github", &spec, DisplayMode::Captured)
            .unwrap();
        assert!(captured.contains(r#""GITHUB_TOKEN":"***""#));
        assert!(!captured.contains("ghp_real"));
    }
}
