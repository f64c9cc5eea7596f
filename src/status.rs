//! Parsing of the external tool's `list` output.
//!
//! The tool prints one free-text line per server, e.g.
//! `github: docker run -i ghcr.io/github/github-mcp-server - ✓ Connected`. cmcp only
//! looks for `<name>:` and the success or failure markers on that line.

use crate::output::sanitize_text;

/// What the tool prints when nothing is registered.
pub const EMPTY_LISTING: &str = "No MCP servers configured. Use `claude mcp add` to add a server.";

/// Shown by `cmcp online` in place of [`EMPTY_LISTING`].
pub const EMPTY_LISTING_HINT: &str =
    "No servers are currently running. Use `cmcp start` to start a server.";

/// Health of one server as reported by a `list` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHealth {
    Connected,
    Failed,
    /// The line mentions the server without either marker.
    Pending,
}

impl ServerHealth {
    /// Failure markers take precedence over success markers.
    pub fn classify(line: &str) -> Self {
        if line.contains('✗') || line.contains("Failed") {
            ServerHealth::Failed
        } else if line.contains('✓') || line.contains("Connected") {
            ServerHealth::Connected
        } else {
            ServerHealth::Pending
        }
    }
}

/// Lines of `output` that mention `name:`, ANSI codes removed and trimmed.
pub fn server_lines(output: &str, name: &str) -> Vec<String> {
    let needle = format!("{}:", name);
    sanitize_text(output, true)
        .lines()
        .filter(|line| line.contains(&needle))
        .map(|line| line.trim().to_string())
        .collect()
}

/// The first decisive health among the lines for `name`. `None` when the server is
/// absent or no line carries a marker.
pub fn health_of(output: &str, name: &str) -> Option<ServerHealth> {
    server_lines(output, name)
        .iter()
        .map(|line| ServerHealth::classify(line))
        .find(|health| *health != ServerHealth::Pending)
}

/// The first line for `name`, kept as the health-check summary in diagnostics.
pub fn health_line(output: &str, name: &str) -> Option<String> {
    server_lines(output, name).into_iter().next()
}

pub fn is_empty_listing(stdout: &str, stderr: &str) -> bool {
    stdout.contains(EMPTY_LISTING) || stderr.contains(EMPTY_LISTING)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "Checking MCP server health...\n\n\
        files: npx -y @modelcontextprotocol/server-filesystem /tmp - ✓ Connected\n\
        github: docker run -i ghcr.io/github/github-mcp-server - ✗ Failed to connect\n\
        slow: node server.js - connecting\n";

    #[test]
    fn classifies_markers() {
        assert_eq!(ServerHealth::classify("a: x - ✓ Connected"), ServerHealth::Connected);
        assert_eq!(ServerHealth::classify("a: x - ✗ Failed"), ServerHealth::Failed);
        assert_eq!(ServerHealth::classify("a: x - ✓ but Failed"), ServerHealth::Failed);
        assert_eq!(ServerHealth::classify("a: x"), ServerHealth::Pending);
    }

    #[test]
    fn reads_health_per_server() {
        assert_eq!(health_of(LISTING, "files"), Some(ServerHealth::Connected));
        assert_eq!(health_of(LISTING, "github"), Some(ServerHealth::Failed));
        assert_eq!(health_of(LISTING, "slow"), None);
        assert_eq!(health_of(LISTING, "absent"), None);
    }

    #[test]
    fn ignores_ansi_around_markers() {
        let colored = "api: node s.js - \u{1b}[31m✗ Failed\u{1b}[0m\n";
        assert_eq!(health_of(colored, "api"), Some(ServerHealth::Failed));
        assert_eq!(
            health_line(colored, "api").as_deref(),
            Some("api: node s.js - ✗ Failed")
        );
    }

    #[test]
    fn detects_empty_listing() {
        assert!(is_empty_listing(&format!("{}\n", EMPTY_LISTING), ""));
        assert!(is_empty_listing("", EMPTY_LISTING));
        assert!(!is_empty_listing(LISTING, ""));
    }
}
