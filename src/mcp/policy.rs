//! Command allowlist policy.
//!
//! Hosts without `allowed_commands` accept any command; the operator has accepted full
//! remote-shell risk for them. For hosts with an allowlist, a command is accepted only
//! if it contains none of the shell metacharacters in [`BLOCKED_CHARS`] and its first
//! whitespace-delimited token equals one of the allowed entries.
//!
//! # Limits of the policy
//!
//! OpenSSH servers run exec requests through `sh -c`, which is why chaining,
//! substitution, redirection and quoting characters are refused outright. The check
//! only holds while the remote shell gives those characters their POSIX meaning.
//!
//! Matching is on the first token only. Allowing a program whose own grammar runs
//! other programs (`find -exec`, `xargs`, `env`, `sudo`, `docker exec`) allows whatever
//! that program can run. This is a policy boundary, not an implementation gap: list
//! such programs only for hosts where that is acceptable.

use crate::mcp::registry::HostConfig;

/// Characters that chain, substitute, redirect or quote in `sh -c`.
///
/// `!` (interactive history only) and `{}` (brace expansion) are not included.
pub const BLOCKED_CHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\'', '"', '\n'];

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Rejected(String),
}

#[cfg(test)]
impl Verdict {
    pub(crate) fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Decide whether `command` may be sent to `host`. Pure.
pub fn validate(host: &HostConfig, command: &str) -> Verdict {
    let Some(allowed) = &host.allowed_commands else {
        return Verdict::Allowed;
    };

    if let Some(c) = command.chars().find(|c| BLOCKED_CHARS.contains(c)) {
        return Verdict::Rejected(format!(
            "command contains shell metacharacter {:?}; host '{}' has an allowlist. \
             Send each command separately without pipes, chaining, redirection or quotes.",
            c, host.name
        ));
    }

    let Some(program) = command.split_whitespace().next() else {
        return Verdict::Rejected("empty command".to_string());
    };

    if allowed.iter().any(|entry| entry == program) {
        Verdict::Allowed
    } else {
        Verdict::Rejected(format!(
            "command '{}' not in allowlist for '{}'. Allowed: {}",
            program,
            host.name,
            allowed.join(", ")
        ))
    }
}
