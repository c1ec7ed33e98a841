//! Bearer token sources.
//!
//! The index admin API authenticates with an opaque bearer token. Where it
//! comes from is a deployment concern, so it sits behind [`TokenSource`]:
//!
//! - [`EnvTokenSource`] reads an environment variable (CI with workload
//!   identity, pre-minted tokens)
//! - [`CommandTokenSource`] runs a program that prints a token, by default
//!   `gcloud auth print-access-token`
//! - [`ConfiguredTokenSource`] combines the two as configured
//!
//! Tokens are held as [`SecretString`] and never logged.

use std::process::Command;

use secrecy::{ExposeSecret, SecretString};

use super::error::ReconcileError;
use crate::config::SyncConfig;

/// Something that can hand out a bearer token.
pub trait TokenSource: Send + Sync {
    /// Obtains a token.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Token`] when no non-empty token is
    /// available.
    fn token(&self) -> Result<SecretString, ReconcileError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

fn non_empty(token: &str, origin: &str) -> Result<SecretString, ReconcileError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ReconcileError::Token {
            message: format!("{origin} yielded an empty token"),
        });
    }
    Ok(SecretString::from(token.to_string()))
}

/// Reads the token from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    /// Creates a source reading `var`.
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// Whether the variable is set at all.
    #[must_use]
    pub fn is_set(&self) -> bool {
        std::env::var_os(&self.var).is_some()
    }
}

impl TokenSource for EnvTokenSource {
    fn token(&self) -> Result<SecretString, ReconcileError> {
        let value = std::env::var(&self.var).map_err(|e| ReconcileError::Token {
            message: format!("environment variable {}: {e}", self.var),
        })?;
        non_empty(&value, &format!("environment variable {}", self.var))
    }

    fn name(&self) -> &'static str {
        "env"
    }
}

/// Runs a program and uses its trimmed stdout as the token.
#[derive(Debug, Clone)]
pub struct CommandTokenSource {
    program: String,
    args: Vec<String>,
}

impl CommandTokenSource {
    /// Creates a source running `program` with `args`.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a source from `[program, args...]`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Token`] when `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Result<Self, ReconcileError> {
        let (program, args) = argv.split_first().ok_or_else(|| ReconcileError::Token {
            message: "token command is empty".to_string(),
        })?;
        Ok(Self::new(program.clone(), args.iter().cloned()))
    }
}

impl TokenSource for CommandTokenSource {
    fn token(&self) -> Result<SecretString, ReconcileError> {
        tracing::debug!(program = %self.program, "requesting access token");
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| ReconcileError::Token {
                message: format!("failed to run {}: {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReconcileError::Token {
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        non_empty(&String::from_utf8_lossy(&output.stdout), &self.program)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// A fixed token.
#[derive(Debug)]
pub struct StaticTokenSource {
    token: SecretString,
}

impl StaticTokenSource {
    /// Wraps `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

impl TokenSource for StaticTokenSource {
    fn token(&self) -> Result<SecretString, ReconcileError> {
        non_empty(self.token.expose_secret(), "static token")
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// The configured environment variable when set, otherwise the configured
/// command.
#[derive(Debug, Clone)]
pub struct ConfiguredTokenSource {
    env: Option<EnvTokenSource>,
    command: CommandTokenSource,
}

impl ConfiguredTokenSource {
    /// Builds the source described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Token`] when the token command is empty.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ReconcileError> {
        Ok(Self {
            env: config.token_env.as_deref().map(EnvTokenSource::new),
            command: CommandTokenSource::from_argv(&config.token_command)?,
        })
    }
}

impl ConfiguredTokenSource {
    fn active(&self) -> &dyn TokenSource {
        match &self.env {
            Some(env) if env.is_set() => env as &dyn TokenSource,
            _ => &self.command,
        }
    }
}

impl TokenSource for ConfiguredTokenSource {
    fn token(&self) -> Result<SecretString, ReconcileError> {
        self.active().token()
    }

    /// Name of the source a call to `token` would use.
    fn name(&self) -> &'static str {
        self.active().name()
    }
}
