//! The request actor recorded in audit fields.

use serde::{Deserialize, Serialize};

/// Identity performing a control-plane request.
///
/// Lodestar is single-user and local; the actor is the OS user by default.
/// Audit fields (`created_by` / `updated_by`) record the principal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Principal string recorded in audit fields, e.g. `user:alice`.
    pub principal: String,
}

impl Actor {
    /// Create an actor with an explicit principal.
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }

    /// The local OS user, falling back to `user:local` when `$USER` is unset.
    #[must_use]
    pub fn local_user() -> Self {
        let name = std::env::var("USER").unwrap_or_else(|_| "local".to_owned());
        Self {
            principal: format!("user:{name}"),
        }
    }

    /// The control plane itself, for system-managed writes.
    #[must_use]
    pub fn system() -> Self {
        Self {
            principal: "system:lodestar".to_owned(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_principal() {
        let actor = Actor::new("user:ci");
        assert_eq!(actor.to_string(), "user:ci");
    }

    #[test]
    fn test_system_actor() {
        assert_eq!(Actor::system().principal, "system:lodestar");
    }
}
