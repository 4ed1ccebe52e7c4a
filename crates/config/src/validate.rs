//! Configuration validation engine.
//!
//! Checks a configuration document against the known schema, detects
//! unknown or misspelled fields, and reports semantic problems in the bus
//! settings. Adapter-specific checks are added by the adapter crates through
//! the same [`Diagnostic`] type.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{
    loader::{ConfigFormat, find_config_file, parse_config_value},
    env_subst::substitute_env,
    schema::RelayConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "range",
    /// "missing-field", "format", "security", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "channels.signal.phone_number"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
    /// Parsed config, when the document deserialized.
    pub config: Option<RelayConfig>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// Append diagnostics produced elsewhere (e.g. by an adapter).
    pub fn extend(&mut self, more: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(more);
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A table with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// Scalar or list value; stop recursion.
    Leaf,
}

/// Build the full schema map mirroring every field in `schema.rs` and the
/// adapter sections it carries.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let signal = Struct(HashMap::from([
        ("enabled", Leaf),
        ("phone_number", Leaf),
        ("signal_service", Leaf),
        ("allow_from", Leaf),
        ("reject_unauthorized", Leaf),
        ("rejection_message", Leaf),
        ("quote_replies", Leaf),
        ("start_timeout_secs", Leaf),
        ("stop_timeout_secs", Leaf),
        ("send_timeout_secs", Leaf),
    ]));

    Struct(HashMap::from([
        (
            "bus",
            Struct(HashMap::from([
                ("queue_capacity", Leaf),
                ("handoff_timeout_ms", Leaf),
            ])),
        ),
        ("channels", Struct(HashMap::from([("signal", signal)]))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let b_len = b_chars.len();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Find the best match for `needle` among `candidates` using Levenshtein
/// distance. Returns `Some(best)` if the distance is <= `max_distance`.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
            config: Some(RelayConfig::default()),
        };
    };

    let read = ConfigFormat::from_path(&actual_path).and_then(|format| {
        std::fs::read_to_string(&actual_path)
            .map(|raw| (raw, format))
            .map_err(anyhow::Error::from)
    });
    let mut result = match read {
        Ok((raw, format)) => validate_str(&raw, format),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "file-ref",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            ..Default::default()
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text without touching the file system.
#[must_use]
pub fn validate_str(raw: &str, format: ConfigFormat) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match parse_config_value(&substitute_env(raw), format) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                ..Default::default()
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Types
    let config = match serde_json::from_value::<RelayConfig>(value) {
        Ok(config) => Some(config),
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "type-error",
                path: String::new(),
                message: format!("type error: {e}"),
            });
            None
        },
    };

    // 4. Semantics
    if let Some(config) = &config {
        check_semantics(config, &mut diagnostics);
    }

    ValidationResult {
        diagnostics,
        config_path: None,
        config,
    }
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        // Leaf or type mismatch; type errors are caught later.
        return;
    };
    let mut known_keys: Vec<&str> = fields.keys().copied().collect();
    known_keys.sort_unstable();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            "at top level "
        } else {
            ""
        };
        let msg = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
            None => format!("unknown field {level}"),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message: msg.trim().to_string(),
        });
    }
}

fn check_semantics(config: &RelayConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.bus.queue_capacity == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "range",
            path: "bus.queue_capacity".into(),
            message: "queue_capacity must be at least 1".into(),
        });
    }
    if config.bus.handoff_timeout_ms == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "range",
            path: "bus.handoff_timeout_ms".into(),
            message: "handoff_timeout_ms must be greater than zero".into(),
        });
    }
    if config.channels.configured().is_empty() {
        diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "missing-field",
            path: "channels".into(),
            message: "no channels configured; the relay will have nothing to run".into(),
        });
    }
}
