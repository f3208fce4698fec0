//! Command allow-list: decides which command lines the shell action may run.
//!
//! Rules:
//! - If `allowed_commands` contains `"*"` → allow any command line
//! - If `allowed_commands` is empty → deny all (secure by default)
//! - Otherwise the first word must be in the list, and the line must not
//!   chain, pipe, substitute or redirect into another command

use rago_config::CommandPolicyConfig;
use tracing::debug;

/// Shell syntax that would let an allowed command smuggle in another one.
const CHAINING_TOKENS: &[&str] = &[";", "&", "|", "`", "$(", ">", "<", "\n", "\r"];

/// Result of checking a command line against the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    /// Command may run
    Allowed,
    /// Command is denied
    Denied { command: String, reason: String },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Allow-list policy for the Command action.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed_commands: Vec<String>,
}

impl CommandPolicy {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    /// A policy that allows every command line.
    pub fn permissive() -> Self {
        Self::new(vec!["*".into()])
    }

    pub fn from_config(config: &CommandPolicyConfig) -> Self {
        Self::new(config.allowed_commands.clone())
    }

    fn allows_everything(&self) -> bool {
        self.allowed_commands.iter().any(|c| c == "*")
    }

    /// Check a full command line.
    pub fn check(&self, command: &str) -> PolicyDecision {
        if self.allows_everything() {
            return PolicyDecision::Allowed;
        }

        if self.allowed_commands.is_empty() {
            return PolicyDecision::Denied {
                command: command.into(),
                reason: "No commands configured (deny by default)".into(),
            };
        }

        if let Some(token) = CHAINING_TOKENS.iter().find(|t| command.contains(**t)) {
            debug!(command = %command, token = %token.escape_debug(), "Chained command rejected");
            return PolicyDecision::Denied {
                command: command.into(),
                reason: format!("Shell operator '{}' is not allowed", token.escape_debug()),
            };
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("");
        if base_cmd.is_empty() {
            return PolicyDecision::Denied {
                command: command.into(),
                reason: "Empty command".into(),
            };
        }

        if self.allowed_commands.iter().any(|a| a == base_cmd) {
            PolicyDecision::Allowed
        } else {
            PolicyDecision::Denied {
                command: command.into(),
                reason: format!(
                    "Command '{}' not in allowlist ({} commands configured)",
                    base_cmd,
                    self.allowed_commands.len()
                ),
            }
        }
    }
}
