//! Secret masking for anything cmcp echoes back to the user.
//!
//! Environment keys are classified as sensitive by name alone, never by inspecting the
//! value. Three renderings are supported: a flat argument vector, compact JSON and
//! pretty JSON where secrets become shell-style references such as `$GITHUB_TOKEN`.
//! Captured process output is masked separately by [`mask_output`].

use regex::Regex;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Serializer, Value};

use crate::error::Result;

/// Replacement for a sensitive value.
pub const MASK: &str = "***";

/// Substrings that mark an environment key as sensitive, matched case-insensitively.
pub const SENSITIVE_PATTERNS: &[&str] = &[
    "TOKEN",
    "KEY",
    "SECRET",
    "PASSWORD",
    "PAT",
    "CREDENTIAL",
    "AUTH",
];

/// Shell variable names used for well-known keys in illustrative commands.
const SHELL_ALIASES: &[(&str, &str)] = &[
    ("GITHUB_PERSONAL_ACCESS_TOKEN", "GITHUB_TOKEN"),
    ("GITHUB_TOKEN", "GITHUB_TOKEN"),
    ("ANTHROPIC_API_KEY", "ANTHROPIC_KEY"),
    ("OPENAI_API_KEY", "OPENAI_KEY"),
    ("GROQ_API_KEY", "GROQ_KEY"),
    ("GOOGLE_API_KEY", "GOOGLE_KEY"),
    ("AWS_ACCESS_KEY_ID", "AWS_KEY_ID"),
    ("AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY"),
];

pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| upper.contains(pattern))
}

fn mask_value(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        MASK
    }
}

/// Masks `KEY=VALUE` in a single token when the key is sensitive.
fn mask_assignment(token: &str) -> Option<String> {
    let (key, value) = token.split_once('=')?;
    is_sensitive_key(key).then(|| format!("{}={}", key, mask_value(value)))
}

/// Masks sensitive values in `--env KEY=VALUE`, `--env=KEY=VALUE`, `-e KEY=VALUE` and
/// `-eKEY=VALUE` forms. Every other token passes through unchanged and in order.
pub fn mask_args(args: &[String]) -> Vec<String> {
    let mut masked = args.to_vec();
    for idx in 0..masked.len() {
        let token = masked[idx].as_str();
        if token == "--env" || token == "-e" {
            if let Some(replaced) = masked.get(idx + 1).and_then(|next| mask_assignment(next)) {
                masked[idx + 1] = replaced;
            }
        } else if let Some(fused) = token.strip_prefix("--env=") {
            if let Some(replaced) = mask_assignment(fused) {
                masked[idx] = format!("--env={}", replaced);
            }
        } else if let Some(fused) = token.strip_prefix("-e").filter(|rest| !rest.is_empty()) {
            if let Some(replaced) = mask_assignment(fused) {
                masked[idx] = format!("-e{}", replaced);
            }
        }
    }
    masked
}

// Rewrites sensitive entries of a top-level `env` object in place.
fn rewrite_env(data: &mut Map<String, Value>, mut replace: impl FnMut(&str, &Value) -> Value) {
    let Some(Value::Object(env)) = data.get_mut("env") else {
        return;
    };
    for (key, value) in env.iter_mut() {
        if is_sensitive_key(key) {
            *value = replace(key, value);
        }
    }
}

/// Masks sensitive `env` values in a compact JSON object.
pub fn mask_json(json: &str) -> Result<String> {
    let mut data: Map<String, Value> = serde_json::from_str(json)?;
    rewrite_env(&mut data, |_, value| {
        let raw = value.as_str().unwrap_or(MASK);
        Value::String(mask_value(raw).to_string())
    });
    Ok(serde_json::to_string(&data)?)
}

/// Shell reference shown in place of a sensitive value, e.g. `$GITHUB_TOKEN`.
pub fn shell_reference(key: &str) -> String {
    let alias = SHELL_ALIASES
        .iter()
        .find(|(known, _)| *known == key)
        .map(|(_, alias)| *alias)
        .unwrap_or(key);
    format!("${}", alias)
}

/// Pretty-prints a JSON object with sensitive `env` values replaced by unquoted shell
/// references. The result is for display only and is not valid JSON.
pub fn pretty_masked_json(json: &str, indent: &str) -> Result<String> {
    let mut data: Map<String, Value> = serde_json::from_str(json)?;
    let mut references = Vec::new();
    rewrite_env(&mut data, |key, _| {
        let reference = shell_reference(key);
        references.push(reference.clone());
        Value::String(reference)
    });

    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = Serializer::with_formatter(&mut buf, formatter);
    data.serialize(&mut serializer)?;
    let mut rendered = String::from_utf8_lossy(&buf).into_owned();

    for reference in references {
        rendered = rendered.replace(&format!("\"{}\"", reference), &reference);
    }
    Ok(rendered)
}

/// Masks captured output line by line: a sensitive-looking word followed by `=` or `:`
/// keeps everything up to the separator and the rest of the line becomes `***`.
pub fn mask_output(output: &str) -> String {
    let pattern = format!("(?i)(?:{})[^=:\\n]*[=:]", SENSITIVE_PATTERNS.join("|"));
    let Ok(re) = Regex::new(&pattern) else {
        return output.to_string();
    };
    output
        .split('\n')
        .map(|line| match re.find(line) {
            Some(found) => format!("{} {}", &line[..found.end()], MASK),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Values shorter than this are only redacted where they stand as a whole token.
const MIN_INLINE_SECRET: usize = 8;

/// Replaces occurrences of secret values in free text.
///
/// Long values are replaced wherever they appear. Short ones are replaced only when
/// they are not glued to neighbouring token characters, so a one-digit value does not
/// eat into addresses or numbers.
pub fn redact_values<'a>(text: &str, secrets: impl IntoIterator<Item = &'a str>) -> String {
    let mut redacted = text.to_string();
    for secret in secrets {
        if secret.is_empty() {
            continue;
        }
        redacted = if secret.len() >= MIN_INLINE_SECRET {
            redacted.replace(secret, MASK)
        } else {
            redact_token(&redacted, secret)
        };
    }
    redacted
}

fn redact_token(text: &str, secret: &str) -> String {
    let mut redacted = String::with_capacity(text.len());
    let mut last = 0;
    for (at, _) in text.match_indices(secret) {
        let end = at + secret.len();
        let glued = is_token_char(text[..at].chars().next_back())
            || is_token_char(text[end..].chars().next());
        if glued {
            continue;
        }
        redacted.push_str(&text[last..at]);
        redacted.push_str(MASK);
        last = end;
    }
    redacted.push_str(&text[last..]);
    redacted
}

fn is_token_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+'))
}
