//! Configuration validation engine.
//!
//! File checks ([`validate`], [`validate_str`]) catch syntax errors,
//! unknown/misspelled fields and type errors. [`check_config`] runs semantic
//! checks on the effective config, after environment overrides.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{
    env_subst::substitute_env,
    loader::{parse_config, parse_config_value},
    schema::CronlockConfig,
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
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "cron-dir",
    /// "namespace", "scheduler", "redis"
    pub category: &'static str,
    /// Dotted path, e.g. "scheduler.timezone"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
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
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// Scalar value, stop recursion.
    Leaf,
}

/// Build the full schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        ("name", Leaf),
        ("cron_dir", Leaf),
        ("environment", Leaf),
        ("redis", Struct(HashMap::from([("url", Leaf)]))),
        (
            "scheduler",
            Struct(HashMap::from([
                ("default_duration_ms", Leaf),
                ("max_output_bytes", Leaf),
                ("timezone", Leaf),
            ])),
        ),
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

// ── File validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    match std::fs::read_to_string(&actual_path) {
        Ok(content) => {
            let mut result = validate_str(&substitute_env(&content), &actual_path);
            result.config_path = Some(actual_path);
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: Some(actual_path),
        },
    }
}

/// Validate raw config text. `path` only selects the format by extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", e.to_string()));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Types
    if let Err(e) = parse_config(raw, path) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            e.to_string(),
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        // Leaf or type mismatch; type errors are caught by deserialization.
        return;
    };

    let known_keys: Vec<&str> = fields.keys().copied().collect();
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
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            msg.trim(),
        ));
    }
}

// ── Semantic checks ─────────────────────────────────────────────────────────

/// Semantic checks on the effective config. `cron_dir` is resolved against
/// `base`.
#[must_use]
pub fn check_config(config: &CronlockConfig, base: &Path) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let name = config.name.trim();
    if name.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "namespace",
            "name",
            "application name must not be empty",
        ));
    } else if name.contains(':') || name.contains(char::is_whitespace) {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "namespace",
            "name",
            "name contains ':' or whitespace; lock keys may collide across applications",
        ));
    }

    match config.cron_dir.as_deref().map(str::trim) {
        None | Some("") => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "cron-dir",
            "cron_dir",
            "no cron directory configured (set `cron_dir` or CRONLOCK_CRON_DIR)",
        )),
        Some(dir) => {
            let path = base.join(dir);
            if !path.is_dir() {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "cron-dir",
                    "cron_dir",
                    format!("{} does not exist or is not a directory", path.display()),
                ));
            }
        },
    }

    if config.scheduler.default_duration_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "scheduler",
            "scheduler.default_duration_ms",
            "default lock duration must be greater than 0",
        ));
    }

    if config.scheduler.max_output_bytes == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "scheduler",
            "scheduler.max_output_bytes",
            "command output will not be logged",
        ));
    }

    if let Some(tz) = config.scheduler.timezone.as_deref()
        && !tz.eq_ignore_ascii_case("utc")
        && tz.parse::<chrono_tz::Tz>().is_err()
    {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "scheduler",
            "scheduler.timezone",
            format!("unknown timezone \"{tz}\""),
        ));
    }

    let url = config.redis.url.as_str();
    if !["redis://", "rediss://", "unix://", "redis+unix://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "redis",
            "redis.url",
            format!("\"{url}\" does not look like a redis URL"),
        ));
    }

    diagnostics
}
