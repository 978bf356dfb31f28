use {
    anyhow::Result,
    cronlock_config::validate::{self, Diagnostic, Severity},
    cronlock_cron::registry::CallableCatalog,
};

use crate::bootstrap::{self, Overrides};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Validate the config file, the effective settings and every job file.
///
/// Exits with status 1 when anything is an error.
pub async fn check(overrides: &Overrides, verbose: bool) -> Result<()> {
    let mut result = validate::validate(overrides.config.as_deref());

    // Print which file we're checking
    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    // A broken file cannot produce effective settings.
    let settings = if file_result_ok(&result.diagnostics) {
        let settings = bootstrap::load_settings(overrides)?;
        result
            .diagnostics
            .extend(validate::check_config(&settings.config, &settings.base_dir));
        Some(settings)
    } else {
        None
    };

    let mut shown = print_diagnostics(&result.diagnostics, verbose);
    let mut errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    // Only worth loading jobs once the directory itself checks out.
    if let Some(ref settings) = settings
        && !result.diagnostics.iter().any(|d| d.category == "cron-dir")
    {
        eprintln!("Loading jobs from {}", bootstrap::cron_dir_display(settings));
        match bootstrap::load_registry(settings, CallableCatalog::new()).await {
            Ok(registry) => {
                eprintln!(
                    "  {} job(s), {} enabled",
                    registry.len(),
                    registry.enabled_jobs().count()
                );
            },
            Err(e) => {
                eprintln!("  {BOLD}{RED}error{RESET} {e:#}");
                errors += 1;
                shown += 1;
            },
        }
    }

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn print_diagnostics(diagnostics: &[Diagnostic], verbose: bool) -> usize {
    let mut shown = 0;
    for d in diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!(
                "  {BOLD}{color}{}{RESET} {}: {}",
                d.severity, d.path, d.message
            );
        }
        shown += 1;
    }
    shown
}

fn file_result_ok(diagnostics: &[Diagnostic]) -> bool {
    !diagnostics
        .iter()
        .any(|d| d.severity == Severity::Error && matches!(d.category, "syntax" | "type-error"))
}
