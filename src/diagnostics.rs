//! Best-effort explanation of a failed launch.
//!
//! Diagnostics never fail: every probe swallows its own errors and the worst outcome is a
//! result with fewer suggestions. Probes are chosen from a flat table keyed by the literal
//! command name; the server command is then re-run directly under a short timeout and its
//! output is matched against a fixed list of known error substrings.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LaunchSpec;
use crate::invoker::Invoker;
use crate::masking;
use crate::output;
use crate::runner::{CommandRunner, Invocation};
use crate::status;

/// Limit for the direct re-run of the server command.
pub const RERUN_TIMEOUT: Duration = Duration::from_secs(3);

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const NOT_REGISTERED_HINT: &str = "Server may not be properly registered with Claude";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Docker,
    Node,
    Python,
}

const PROBES: &[(&str, Probe)] = &[
    ("docker", Probe::Docker),
    ("node", Probe::Node),
    ("npx", Probe::Node),
    ("python", Probe::Python),
    ("python3", Probe::Python),
];

/// Known error substrings and the suggestion each one produces, in reporting order.
pub const ERROR_PATTERNS: &[(&[&str], &str)] = &[
    (
        &["permission denied", "Permission denied"],
        "Permission denied. Check file permissions or try running with appropriate privileges.",
    ),
    (
        &["connection refused", "Connection refused"],
        "Connection refused. Check if the service is running and accessible.",
    ),
    (
        &["address already in use"],
        "Port already in use. Check for conflicting services or change the port.",
    ),
    (
        &["ModuleNotFoundError", "Cannot find module"],
        "Missing dependencies. Install required packages for your project.",
    ),
    (
        &["environment variable", "env var"],
        "Missing or invalid environment variables. Check your configuration.",
    ),
];

/// Everything gathered about one failed server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticResult {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Last error observed, usually from the direct re-run.
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
    /// The tool's `list` line for this server.
    pub health_check: Option<String>,
    pub suggestions: Vec<String>,
}

impl DiagnosticResult {
    fn new(name: &str, spec: &LaunchSpec) -> Self {
        Self {
            name: name.to_string(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            ..Self::default()
        }
    }

    fn suggest(&mut self, suggestion: impl Into<String>) {
        let suggestion = suggestion.into();
        if !self.suggestions.contains(&suggestion) {
            self.suggestions.push(suggestion);
        }
    }

    /// Nothing worth showing instead of the original error.
    pub fn is_inconclusive(&self) -> bool {
        self.suggestions.is_empty() && self.stderr.trim().is_empty()
    }

    // Removes literal values of sensitive env vars from everything captured.
    fn scrub(&mut self, spec: &LaunchSpec) {
        let secrets: Vec<&str> = spec
            .env
            .iter()
            .filter(|(key, _)| masking::is_sensitive_key(key))
            .map(|(_, value)| value.as_str())
            .collect();
        if secrets.is_empty() {
            return;
        }
        self.stdout = masking::redact_values(&self.stdout, secrets.iter().copied());
        self.stderr = masking::redact_values(&self.stderr, secrets.iter().copied());
        self.error = self
            .error
            .take()
            .map(|error| masking::redact_values(&error, secrets.iter().copied()));
        self.health_check = self
            .health_check
            .take()
            .map(|line| masking::redact_values(&line, secrets.iter().copied()));
    }

    /// Human-readable report shown in place of the raw failure.
    pub fn format_report(&self, debug_log: Option<&Path>) -> String {
        let mut report = String::from("Connection failed\n");
        if let Some(line) = &self.health_check {
            report.push_str(&format!("\nHealth check output:\n  {}\n", line));
        }
        if !self.stderr.trim().is_empty() {
            report.push_str(&format!(
                "\nServer error:\n{}\n",
                masking::mask_output(self.stderr.trim_end())
            ));
        } else if let Some(error) = &self.error {
            report.push_str(&format!("\nError: {}\n", masking::mask_output(error)));
        }
        if !self.suggestions.is_empty() {
            report.push_str("\nPossible solutions:\n");
            for (idx, suggestion) in self.suggestions.iter().enumerate() {
                report.push_str(&format!("  {}. {}\n", idx + 1, suggestion));
            }
        }
        if let Some(path) = debug_log {
            report.push('\n');
            report.push_str(&output::debug_log_hint(path));
            report.push('\n');
        }
        report.trim_end().to_string()
    }
}

/// Suggestions for every known error substring found in `output`, in table order.
pub fn matching_suggestions(output: &str) -> Vec<&'static str> {
    ERROR_PATTERNS
        .iter()
        .filter(|(patterns, _)| patterns.iter().any(|pattern| output.contains(pattern)))
        .map(|(_, suggestion)| *suggestion)
        .collect()
}

fn probe_for(command: &str) -> Option<Probe> {
    PROBES
        .iter()
        .find(|(known, _)| *known == command)
        .map(|(_, probe)| *probe)
}

/// Investigates why `name` did not connect.
pub async fn diagnose<R: CommandRunner>(
    invoker: &Invoker<R>,
    name: &str,
    spec: &LaunchSpec,
) -> DiagnosticResult {
    let mut result = DiagnosticResult::new(name, spec);

    if !invoker.is_registered(name).await {
        result.error = Some("server not found in Claude configuration".to_string());
        result.suggest(NOT_REGISTERED_HINT);
        return result;
    }

    match invoker.list().await {
        Ok(listing) if listing.success() => {
            result.health_check = status::health_line(&listing.combined(), name);
        }
        Ok(listing) => debug!(exit = %listing.describe_exit(), "list unavailable for diagnostics"),
        Err(err) => debug!(error = %err, "list unavailable for diagnostics"),
    }

    let runner = invoker.runner();
    match probe_for(&spec.command) {
        Some(Probe::Docker) => probe_docker(runner, spec, &mut result).await,
        Some(Probe::Node) => probe_node(runner, spec, &mut result),
        Some(Probe::Python) => probe_python(runner, spec, &mut result),
        None => {}
    }

    rerun(runner, spec, &mut result).await;
    result.scrub(spec);
    debug!(
        server = %result.name,
        command = %result.command,
        args = %shell_words::join(masking::mask_args(&result.args)),
        suggestions = result.suggestions.len(),
        "diagnostics finished"
    );
    result
}

async fn succeeds<R: CommandRunner>(runner: &R, program: &str, args: &[&str]) -> bool {
    let invocation = Invocation::new(program, args.iter().copied()).with_timeout(PROBE_TIMEOUT);
    match runner.capture(&invocation).await {
        Ok(captured) => captured.success(),
        Err(err) => {
            debug!(program, error = %err, "probe could not run");
            false
        }
    }
}

async fn probe_docker<R: CommandRunner>(runner: &R, spec: &LaunchSpec, result: &mut DiagnosticResult) {
    if !succeeds(runner, "docker", &["info"]).await {
        result.suggest(
            "Docker daemon is not running. Please start Docker Desktop or the Docker service.",
        );
        return;
    }

    let image = spec
        .args
        .iter()
        .find(|arg| !arg.starts_with('-') && (arg.starts_with("ghcr.io/") || arg.contains(':')));
    if let Some(image) = image {
        if !succeeds(runner, "docker", &["image", "inspect", image.as_str()]).await {
            result.suggest(format!(
                "Docker image '{}' not found. Try: docker pull {}",
                image, image
            ));
        }
    }

    if spec
        .args
        .iter()
        .any(|arg| arg == "-e" || arg.starts_with("--env"))
    {
        result.suggest("Check that required environment variables are set in your shell");
    }
}

// Relative paths resolve against the server's working directory, if any.
fn resolve(spec: &LaunchSpec, path: &str) -> PathBuf {
    match &spec.cwd {
        Some(cwd) => Path::new(cwd).join(path),
        None => PathBuf::from(path),
    }
}

fn probe_node<R: CommandRunner>(runner: &R, spec: &LaunchSpec, result: &mut DiagnosticResult) {
    if runner.locate(&spec.command).is_none() {
        result.suggest(format!("{} not found. Please install Node.js.", spec.command));
        return;
    }
    let Some(script) = spec.args.first() else {
        return;
    };
    if (script.ends_with(".js") || script.ends_with(".mjs")) && !resolve(spec, script).is_file() {
        result.suggest(format!("Script file '{}' not found", script));
    }
    if !script.starts_with('@') && !script.contains('/') && resolve(spec, "package.json").is_file()
    {
        result.suggest("Run 'npm install' to install dependencies");
    }
}

fn probe_python<R: CommandRunner>(runner: &R, spec: &LaunchSpec, result: &mut DiagnosticResult) {
    if runner.locate(&spec.command).is_none() {
        result.suggest(format!("{} not found. Please install Python.", spec.command));
        return;
    }
    let Some(script) = spec.args.first().filter(|arg| arg.ends_with(".py")) else {
        return;
    };
    if !resolve(spec, script).is_file() {
        result.suggest(format!("Python script '{}' not found", script));
    }
    if resolve(spec, "requirements.txt").is_file() {
        result.suggest("Run 'pip install -r requirements.txt' to install dependencies");
    }
}

// Runs the server command itself to capture its startup output.
async fn rerun<R: CommandRunner>(runner: &R, spec: &LaunchSpec, result: &mut DiagnosticResult) {
    let invocation = Invocation::new(spec.command.clone(), spec.args.clone())
        .with_env(spec.env.clone())
        .with_cwd(spec.cwd.clone())
        .with_timeout(RERUN_TIMEOUT);
    match runner.capture(&invocation).await {
        Ok(captured) => {
            let failed = !captured.success();
            if failed {
                result.error = Some(format!("{} {}", spec.command, captured.describe_exit()));
            }
            result.stdout = captured.stdout;
            result.stderr = captured.stderr;
            if failed {
                let combined = format!("{}{}", result.stderr, result.stdout);
                for suggestion in matching_suggestions(&combined) {
                    result.suggest(suggestion);
                }
            }
        }
        Err(err) => {
            result.error = Some(format!("failed to start '{}': {}", spec.command, err));
            if err.kind() == io::ErrorKind::NotFound {
                let already_reported = format!("{} not found", spec.command);
                if !result
                    .suggestions
                    .iter()
                    .any(|s| s.starts_with(&already_reported))
                {
                    result.suggest(format!(
                        "Command '{}' not found. Install it or use an absolute path in the server configuration.",
                        spec.command
                    ));
                }
            } else {
                warn!(command = %spec.command, error = %err, "could not re-run server command");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CommandBuilder;
    use crate::invoker::{DebugLogs, ToolSettings};
    use crate::runner::testing::{fail, ok, Reply, ScriptedRunner};

    fn invoker(runner: ScriptedRunner) -> Invoker<ScriptedRunner> {
        let tool = ToolSettings {
            program: "claude".to_string(),
            debug_flag: false,
        };
        Invoker::new(runner, CommandBuilder::new(), tool).with_debug_logs(DebugLogs::disabled())
    }

    fn spec(command: &str, args: &[&str]) -> LaunchSpec {
        let mut spec = LaunchSpec::new(command);
        spec.args = args.iter().map(|s| s.to_string()).collect();
        spec
    }

    fn registered() -> ScriptedRunner {
        ScriptedRunner::new()
            .on("claude mcp get", ok(""))
            .on("claude mcp list", ok("srv: cmd - ✗ Failed to connect\n"))
    }

    #[test]
    fn pattern_table_matches_known_errors() {
        assert_eq!(
            matching_suggestions("Error: EACCES: permission denied, open '/x'"),
            vec![ERROR_PATTERNS[0].1]
        );
        assert_eq!(
            matching_suggestions("ModuleNotFoundError: No module named 'mcp'\nconnection refused"),
            vec![ERROR_PATTERNS[1].1, ERROR_PATTERNS[3].1]
        );
        assert!(matching_suggestions("PERMISSION DENIED").is_empty());
        assert!(matching_suggestions("all good").is_empty());
    }

    #[test]
    fn probe_table_is_literal() {
        assert_eq!(probe_for("docker"), Some(Probe::Docker));
        assert_eq!(probe_for("npx"), Some(Probe::Node));
        assert_eq!(probe_for("python3"), Some(Probe::Python));
        assert_eq!(probe_for("/usr/bin/docker"), None);
        assert_eq!(probe_for("uvx"), None);
    }

    #[tokio::test]
    async fn unregistered_server_short_circuits() {
        let runner = ScriptedRunner::new().on("claude mcp get", fail(1, "not found"));
        let invoker = invoker(runner);

        let result = diagnose(&invoker, "srv", &spec("node", &["s.js"])).await;

        assert_eq!(result.suggestions, vec![NOT_REGISTERED_HINT]);
        assert_eq!(invoker.runner().calls(), vec!["claude mcp get srv"]);
    }

    #[tokio::test]
    async fn docker_daemon_down() {
        let runner = registered()
            .on("docker info", fail(1, "Cannot connect to the Docker daemon"))
            .on("docker run", fail(125, "docker: Cannot connect to the Docker daemon"));
        let invoker = invoker(runner);

        let result = diagnose(&invoker, "srv", &spec("docker", &["run", "-i", "ghcr.io/x/y"])).await;

        assert_eq!(
            result.health_check.as_deref(),
            Some("srv: cmd - ✗ Failed to connect")
        );
        assert_eq!(
            result.suggestions[0],
            "Docker daemon is not running. Please start Docker Desktop or the Docker service."
        );
        assert_eq!(invoker.runner().count("docker image inspect"), 0);
    }

    #[tokio::test]
    async fn docker_missing_image_and_env_flags() {
        let runner = registered()
            .on("docker info", ok(""))
            .on("docker image inspect", fail(1, "No such image"))
            .on("docker run", fail(125, "Unable to find image"));
        let invoker = invoker(runner);
        let spec = spec(
            "docker",
            &["run", "-i", "--rm", "-e", "GITHUB_TOKEN", "ghcr.io/github/github-mcp-server"],
        );

        let result = diagnose(&invoker, "srv", &spec).await;

        assert_eq!(
            result.suggestions,
            vec![
                "Docker image 'ghcr.io/github/github-mcp-server' not found. Try: docker pull ghcr.io/github/github-mcp-server",
                "Check that required environment variables are set in your shell",
            ]
        );
    }

    #[tokio::test]
    async fn node_runtime_missing() {
        let runner = registered().on("npx", Reply::Missing);
        let invoker = invoker(runner);

        let result = diagnose(&invoker, "srv", &spec("npx", &["-y", "@scope/server"])).await;

        assert_eq!(result.suggestions, vec!["npx not found. Please install Node.js."]);
        assert!(result.error.unwrap().starts_with("failed to start 'npx'"));
    }

    #[tokio::test]
    async fn node_script_and_manifest_checks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let runner = registered()
            .with_program("node")
            .on("node", fail(1, "Error: Cannot find module '/w/server.js'"));
        let invoker = invoker(runner);
        let mut spec = spec("node", &["server.js"]);
        spec.cwd = Some(dir.path().display().to_string());

        let result = diagnose(&invoker, "srv", &spec).await;

        assert_eq!(
            result.suggestions,
            vec![
                "Script file 'server.js' not found",
                "Run 'npm install' to install dependencies",
                "Missing dependencies. Install required packages for your project.",
            ]
        );
    }

    #[tokio::test]
    async fn python_script_checks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.py"), "print('hi')").unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "mcp\n").unwrap();
        let runner = registered()
            .with_program("python3")
            .on("python3", fail(1, "ModuleNotFoundError: No module named 'mcp'"));
        let invoker = invoker(runner);
        let mut spec = spec("python3", &["server.py"]);
        spec.cwd = Some(dir.path().display().to_string());

        let result = diagnose(&invoker, "srv", &spec).await;

        assert_eq!(
            result.suggestions,
            vec![
                "Run 'pip install -r requirements.txt' to install dependencies",
                "Missing dependencies. Install required packages for your project.",
            ]
        );
    }

    #[tokio::test]
    async fn rerun_output_is_scrubbed_and_masked() {
        let runner = registered().on(
            "uvx",
            fail(1, "auth failed for hunter2-value\nAPI_KEY: hunter2-value rejected\n"),
        );
        let invoker = invoker(runner);
        let mut spec = spec("uvx", &["mcp-server"]);
        spec.env.insert("API_KEY".into(), "hunter2-value".into());
        spec.env.insert("PORT".into(), "8080".into());

        let result = diagnose(&invoker, "srv", &spec).await;
        let report = result.format_report(None);

        assert!(!result.stderr.contains("hunter2-value"));
        assert!(!report.contains("hunter2-value"));
        assert!(report.contains("Server error:"));
        assert!(report.contains("API_KEY: ***"));
        assert!(!result.is_inconclusive());
    }

    #[tokio::test]
    async fn short_secret_values_leave_addresses_intact() {
        let runner = registered().on(
            "uvx",
            fail(1, "Error: listen EADDRINUSE: address already in use 127.0.0.1:8080\n"),
        );
        let invoker = invoker(runner);
        let mut spec = spec("uvx", &["mcp-server"]);
        spec.env.insert("TOKEN".into(), "1".into());

        let result = diagnose(&invoker, "srv", &spec).await;

        assert!(result
            .stderr
            .contains("address already in use 127.0.0.1:8080"));
        assert!(result
            .format_report(None)
            .contains("address already in use 127.0.0.1:8080"));
    }

    #[test]
    fn report_layout() {
        let result = DiagnosticResult {
            name: "srv".into(),
            command: "node".into(),
            error: Some("node exit status 1".into()),
            health_check: Some("srv: node s.js - ✗ Failed".into()),
            suggestions: vec!["first".into(), "second".into()],
            ..DiagnosticResult::default()
        };

        let report = result.format_report(Some(Path::new("/tmp/cmcp-debug/cmcp-start-srv-1.log")));

        assert_eq!(
            report,
            "Connection failed\n\
             \nHealth check output:\n  srv: node s.js - ✗ Failed\n\
             \nError: node exit status 1\n\
             \nPossible solutions:\n  1. first\n  2. second\n\
             \nDebug log saved to:\n  /tmp/cmcp-debug/cmcp-start-srv-1.log\n  View this file for detailed error information"
        );
    }

    #[test]
    fn inconclusive_without_suggestions_or_stderr() {
        let mut result = DiagnosticResult {
            error: Some("timed out".into()),
            ..DiagnosticResult::default()
        };
        assert!(result.is_inconclusive());
        result.stderr = "boom".into();
        assert!(!result.is_inconclusive());
    }
}
