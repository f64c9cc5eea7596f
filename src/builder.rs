//! Translation of launch specs into external tool invocations.
//!
//! The builder is stateless: one value is created per CLI run and passed to whoever
//! needs it. Argument vectors start at the tool subcommand (`add`, `remove`, ...); the
//! invoker prefixes the program and its `mcp` command group.

use serde_json::Value;

use crate::config::LaunchSpec;
use crate::error::{CmcpError, Result};
use crate::masking;

/// How the external tool is spelled in displayed commands.
pub const TOOL_DISPLAY: &str = "claude mcp";

/// Flag that asks the external tool for its own diagnostic stream.
pub const TOOL_DEBUG_FLAG: &str = "--debug";

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Specs with environment variables must go through `add-json`; the plain form
    /// cannot carry them next to arbitrary positional arguments.
    pub fn uses_json(&self, spec: &LaunchSpec) -> bool {
        !spec.env.is_empty()
    }

    /// Arguments that register `name` with the external tool.
    pub fn launch_args(&self, name: &str, spec: &LaunchSpec) -> Result<Vec<String>> {
        if spec.command.trim().is_empty() {
            return Err(CmcpError::Build {
                name: name.to_string(),
                reason: "command is empty".to_string(),
            });
        }
        if self.uses_json(spec) {
            Ok(vec![
                "add-json".to_string(),
                name.to_string(),
                self.json_payload(name, spec)?,
            ])
        } else {
            Ok(self.plain_args(name, spec))
        }
    }

    // add <name> [--env K=V]... -- <command> [args...]
    fn plain_args(&self, name: &str, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec!["add".to_string(), name.to_string()];
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--".to_string());
        args.push(spec.command.clone());
        args.extend(spec.args.iter().cloned());
        args
    }

    fn json_payload(&self, name: &str, spec: &LaunchSpec) -> Result<String> {
        serde_json::to_string(&Value::Object(spec.to_json_map())).map_err(|err| {
            CmcpError::Build {
                name: name.to_string(),
                reason: err.to_string(),
            }
        })
    }

    /// Masked shell rendering of the plain `add` form.
    pub fn display_command(&self, name: &str, spec: &LaunchSpec) -> Result<String> {
        let args = self.plain_args(name, spec);
        Ok(self.display_args(&args))
    }

    /// Masked rendering of the `add-json` form. `pretty` swaps `***` for shell
    /// references and pretty-prints the payload.
    pub fn display_command_json(
        &self,
        name: &str,
        spec: &LaunchSpec,
        pretty: bool,
    ) -> Result<String> {
        let payload = self.json_payload(name, spec)?;
        let rendered = if pretty {
            masking::pretty_masked_json(&payload, "  ")?
        } else {
            masking::mask_json(&payload)?
        };
        Ok(format!(
            "{} add-json {} '{}'",
            TOOL_DISPLAY,
            shell_words::quote(name),
            rendered
        ))
    }

    /// Masked rendering of whichever encoding [`launch_args`](Self::launch_args) picks.
    pub fn display_launch(&self, name: &str, spec: &LaunchSpec, pretty: bool) -> Result<String> {
        if self.uses_json(spec) {
            self.display_command_json(name, spec, pretty)
        } else {
            self.display_command(name, spec)
        }
    }

    pub fn display_args(&self, args: &[String]) -> String {
        format!("{} {}", TOOL_DISPLAY, shell_words::join(self.mask_tool_args(args)))
    }

    /// Masks a tool argument vector, including the trailing payload of `add-json`.
    pub fn mask_tool_args(&self, args: &[String]) -> Vec<String> {
        let mut masked = masking::mask_args(args);
        if masked.first().map(String::as_str) == Some("add-json") && masked.len() > 2 {
            if let Some(payload) = masked.last_mut() {
                *payload = masking::mask_json(payload).unwrap_or_else(|_| masking::MASK.to_string());
            }
        }
        masked
    }

    pub fn stop_args(&self, name: &str) -> Vec<String> {
        vec!["remove".to_string(), name.to_string()]
    }

    pub fn bulk_stop_args(&self, names: &[String]) -> Vec<Vec<String>> {
        names.iter().map(|name| self.stop_args(name)).collect()
    }

    pub fn list_args(&self) -> Vec<String> {
        vec!["list".to_string()]
    }

    pub fn get_args(&self, name: &str) -> Vec<String> {
        vec!["get".to_string(), name.to_string()]
    }

    /// Inserts the tool's debug flag right after the subcommand.
    pub fn with_debug_flag(&self, mut args: Vec<String>) -> Vec<String> {
        let at = args.len().min(1);
        args.insert(at, TOOL_DEBUG_FLAG.to_string());
        args
    }
}
