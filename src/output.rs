//! Terminal output helpers.
//!
//! Text sanitization for captured tool output, ANSI coloring for cmcp's own messages and
//! the small filters applied to what the external tool prints on success.

use std::io::IsTerminal;
use std::path::Path;

use strip_ansi_escapes::strip;

/// Marker of the tool's stdout lines worth echoing after a successful add or remove.
pub const FILE_MODIFIED_MARKER: &str = "File modified:";

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

/// Wraps `text` in the SGR code for a named color. Unknown names leave it untouched.
pub fn apply_color(text: &str, color: Option<&str>) -> String {
    let code = match color.unwrap_or("").to_lowercase().as_str() {
        "red" => "31",
        "green" => "32",
        "yellow" => "33",
        "blue" => "34",
        "magenta" => "35",
        "cyan" => "36",
        "gray" | "grey" => "90",
        "bold" => "1",
        _ => "0",
    };
    if code == "0" {
        text.to_string()
    } else {
        format!("\u{1b}[{}m{}\u{1b}[0m", code, text)
    }
}

/// Coloring switch for everything cmcp prints itself.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Colors are on unless `--no-color` was given, `NO_COLOR` is set or stdout is not
    /// a terminal.
    pub fn detect(no_color: bool) -> Self {
        let enabled =
            !no_color && std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();
        Self::new(enabled)
    }

    pub fn paint(&self, text: &str, color: &str) -> String {
        if self.enabled {
            apply_color(text, Some(color))
        } else {
            text.to_string()
        }
    }

    pub fn red(&self, text: &str) -> String {
        self.paint(text, "red")
    }

    pub fn green(&self, text: &str) -> String {
        self.paint(text, "green")
    }

    pub fn yellow(&self, text: &str) -> String {
        self.paint(text, "yellow")
    }

    pub fn blue(&self, text: &str) -> String {
        self.paint(text, "blue")
    }

    pub fn cyan(&self, text: &str) -> String {
        self.paint(text, "cyan")
    }

    pub fn gray(&self, text: &str) -> String {
        self.paint(text, "gray")
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint(text, "bold")
    }

    /// Colors keys, string values and unquoted `$REFERENCE`s in a pretty-printed,
    /// masked JSON payload. Line structure is preserved.
    pub fn json(&self, rendered: &str) -> String {
        if !self.enabled {
            return rendered.to_string();
        }
        rendered
            .lines()
            .map(|line| self.json_line(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn json_line(&self, line: &str) -> String {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let Some(rest) = trimmed.strip_prefix('"') else {
            return format!("{}{}", indent, self.json_value(trimmed));
        };
        let Some(end) = rest.find("\": ") else {
            return format!("{}{}", indent, self.json_value(trimmed));
        };
        let key = &trimmed[..end + 2];
        let value = &rest[end + 3..];
        format!("{}{}: {}", indent, self.cyan(key), self.json_value(value))
    }

    fn json_value(&self, value: &str) -> String {
        let (body, comma) = match value.strip_suffix(',') {
            Some(body) => (body, ","),
            None => (value, ""),
        };
        let painted = if body.starts_with('$') {
            self.yellow(body)
        } else if body.starts_with('"') {
            self.green(body)
        } else {
            body.to_string()
        };
        format!("{}{}", painted, comma)
    }
}

/// Lines of successful tool output that are echoed back to the user.
pub fn file_modified_lines(stdout: &str) -> Vec<&str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.contains(FILE_MODIFIED_MARKER))
        .collect()
}

/// Pointer to a debug log artifact, appended to failure messages.
pub fn debug_log_hint(path: &Path) -> String {
    format!(
        "Debug log saved to:\n  {}\n  View this file for detailed error information",
        path.display()
    )
}
