//! `chatrelay check`: config validation report.
//!
//! Prints one section per concern with `[ok]`, `[warn]`, `[fail]`, `[skip]`
//! or `[info]` per item and exits non-zero when anything failed.

use std::path::Path;

use {
    anyhow::Result,
    chatrelay_config::{Diagnostic, RelayConfig, Severity, ValidationResult, validate},
};

// ── ANSI helpers ────────────────────────────────────────────────────────────

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Per-check result used to build the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Skip,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Skip => DIM,
            Self::Info => CYAN,
        }
    }
}

impl From<Severity> for Status {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Error => Self::Fail,
            Severity::Warning => Self::Warn,
            Severity::Info => Self::Info,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: String,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem {
            status,
            message: message.into(),
        });
    }

    fn push_diagnostic(&mut self, d: &Diagnostic) {
        let message = if d.path.is_empty() {
            d.message.clone()
        } else {
            format!("{}: {}", d.path, d.message)
        };
        self.push(d.severity.into(), message);
    }

    fn failures(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == Status::Fail)
            .count()
    }
}

// ── Printing ────────────────────────────────────────────────────────────────

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
            match item.status {
                Status::Fail => errors += 1,
                Status::Warn => warnings += 1,
                _ => {},
            }
        }
        eprintln!();
    }

    (errors, warnings)
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub fn handle_check(path: Option<&Path>) -> Result<()> {
    eprintln!("{BOLD}chatrelay check{RESET}");
    eprintln!("{BOLD}==============={RESET}\n");

    let result = validate(path);
    let mut sections = vec![check_config(&result)];
    if let Some(config) = &result.config {
        sections.push(check_channels(config));
    }

    let (errors, warnings) = print_report(&sections);
    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

// ── Config file ─────────────────────────────────────────────────────────────

fn check_config(result: &ValidationResult) -> Section {
    let label = result
        .config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".into());
    let mut section = Section::new(format!("Config ({label})"));

    let fatal: Vec<&Diagnostic> = result
        .diagnostics
        .iter()
        .filter(|d| matches!(d.category, "syntax" | "file-ref") && d.severity == Severity::Error)
        .collect();
    if !fatal.is_empty() {
        for d in fatal {
            section.push_diagnostic(d);
        }
        // Nothing else can be checked without a document.
        return section;
    }
    section.push(Status::Ok, "Syntax valid");

    let unknown: Vec<&Diagnostic> = result
        .diagnostics
        .iter()
        .filter(|d| d.category == "unknown-field")
        .collect();
    if unknown.is_empty() {
        section.push(Status::Ok, "All fields recognized");
    } else {
        for d in unknown {
            section.push_diagnostic(d);
        }
    }

    let type_errors: Vec<&Diagnostic> = result
        .diagnostics
        .iter()
        .filter(|d| d.category == "type-error")
        .collect();
    if type_errors.is_empty() {
        section.push(Status::Ok, "No type errors");
    } else {
        for d in type_errors {
            section.push(Status::Fail, d.message.clone());
        }
    }

    for d in result
        .diagnostics
        .iter()
        .filter(|d| !matches!(d.category, "syntax" | "unknown-field" | "type-error"))
    {
        section.push_diagnostic(d);
    }

    section
}

// ── Channels ────────────────────────────────────────────────────────────────

fn check_channels(config: &RelayConfig) -> Section {
    let mut section = Section::new("Channels");
    match &config.channels.signal {
        None => section.push(Status::Skip, "signal: not configured"),
        Some(raw) => check_signal(raw, &mut section),
    }
    section
}

#[cfg(feature = "signal")]
fn check_signal(raw: &serde_json::Value, section: &mut Section) {
    use chatrelay_signal::SignalAccountConfig;

    let config = match SignalAccountConfig::from_value(raw.clone()) {
        Ok(config) => config,
        Err(e) => {
            section.push(Status::Fail, format!("signal: {e}"));
            return;
        },
    };
    if !config.enabled {
        section.push(Status::Skip, "signal: disabled");
        return;
    }

    let before = section.failures();
    for d in config.diagnostics() {
        section.push_diagnostic(&d);
    }
    if section.failures() == before {
        section.push(
            Status::Ok,
            format!(
                "signal: {} via {}",
                config.phone_number, config.signal_service
            ),
        );
    }
}

#[cfg(not(feature = "signal"))]
fn check_signal(raw: &serde_json::Value, section: &mut Section) {
    if raw
        .get("enabled")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        section.push(
            Status::Fail,
            "signal: enabled but this build does not include Signal support",
        );
    } else {
        section.push(Status::Skip, "signal: disabled");
    }
}
