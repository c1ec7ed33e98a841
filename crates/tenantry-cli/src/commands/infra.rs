//! CLI commands for ownership validation and artifact composition.
//!
//! - `tenantry validate`
//! - `tenantry compose [--check]`
//! - `tenantry all [--check]`
//!
//! Each prints one `ERROR: <problem>` line per problem found, or `OK`.
//!
//! # Exit Codes
//!
//! - 0: No problems
//! - 1: At least one problem

use std::io::Write;

use clap::Args;
use tenantry_core::Violation;
use tenantry_core::compose::{OutputMode, compose};
use tenantry_core::ownership::validate;

use super::Context;

/// Exit codes for infra commands.
pub mod exit_codes {
    /// No problems found.
    pub const SUCCESS: u8 = 0;
    /// Validation or composition problems were reported.
    pub const ERROR: u8 = 1;
}

/// Arguments of `compose` and `all`.
#[derive(Debug, Clone, Copy, Args)]
pub struct ComposeArgs {
    /// Fail if generated files differ from on-disk content; never writes.
    #[arg(long)]
    pub check: bool,
}

impl ComposeArgs {
    const fn mode(self) -> OutputMode {
        if self.check {
            OutputMode::Check
        } else {
            OutputMode::Write
        }
    }
}

/// Prints `violations` and maps them to an exit code.
pub fn report(violations: &[Violation], out: &mut dyn Write) -> u8 {
    let written = if violations.is_empty() {
        writeln!(out, "OK")
    } else {
        violations
            .iter()
            .try_for_each(|violation| writeln!(out, "ERROR: {violation}"))
    };
    if let Err(err) = written {
        tracing::error!(error = %err, "failed to write report");
        return exit_codes::ERROR;
    }

    if violations.is_empty() {
        exit_codes::SUCCESS
    } else {
        exit_codes::ERROR
    }
}

/// Validation problems followed by composition problems, each reported once.
///
/// Both passes read the same fragments, so an unreadable fragment surfaces in
/// each of them.
fn collect(
    context: &Context,
    validate_units: bool,
    compose_args: Option<ComposeArgs>,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    if validate_units {
        violations.extend(validate(&context.layout));
    }
    if let Some(args) = compose_args {
        for violation in compose(
            &context.layout,
            &context.config.layout.preferred_order,
            args.mode(),
        ) {
            if !violations.contains(&violation) {
                violations.push(violation);
            }
        }
    }
    violations
}

/// Runs `validate`.
pub fn run_validate(context: &Context) -> u8 {
    report(&collect(context, true, None), &mut std::io::stdout().lock())
}

/// Runs `compose`.
pub fn run_compose(context: &Context, args: &ComposeArgs) -> u8 {
    report(&collect(context, false, Some(*args)), &mut std::io::stdout().lock())
}

/// Runs `all`: validation problems followed by composition problems.
pub fn run_all(context: &Context, args: &ComposeArgs) -> u8 {
    report(&collect(context, true, Some(*args)), &mut std::io::stdout().lock())
}
