//! Caller identity passed explicitly into every mutating ledger operation.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::UserId;

/// Staff role used for ledger policy decisions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Reserved for the system sentinel.
    System,
    Admin,
    Manager,
    Pharmacist,
    Cashier,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Pharmacist => "pharmacist",
            Role::Cashier => "cashier",
        }
    }

    /// Privileged roles may override time-boxed policies such as the void window.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "pharmacist" => Ok(Role::Pharmacist),
            "cashier" => Ok(Role::Cashier),
            other => Err(DomainError::validation(format!("unknown role '{other}'"))),
        }
    }
}

/// The identity on whose behalf an operation runs.
///
/// There is no implicit "current user": callers construct an `Actor` from
/// their authenticated context, or use [`Actor::system`] for unattended work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    user_id: UserId,
    role: Role,
}

impl Actor {
    /// A human staff member.
    ///
    /// The system sentinel id or the `System` role cannot be used here; that
    /// identity is only available through [`Actor::system`].
    pub fn user(user_id: UserId, role: Role) -> Result<Self, DomainError> {
        if user_id.is_system() || role == Role::System {
            return Err(DomainError::validation(
                "the system identity cannot be used as a staff user",
            ));
        }
        Ok(Self { user_id, role })
    }

    /// The system sentinel: nil user id, `System` role, never privileged.
    pub const fn system() -> Self {
        Self {
            user_id: UserId::system(),
            role: Role::System,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }

    /// Reject the system identity for work that must be attributed to a person.
    pub fn ensure_staff(&self, action: &str) -> Result<(), DomainError> {
        if self.is_system() {
            return Err(DomainError::unauthorized(format!(
                "{action} must be performed by a staff member"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_actor_is_not_privileged() {
        let actor = Actor::system();
        assert!(actor.is_system());
        assert!(!actor.is_privileged());
        assert!(actor.user_id().is_system());
        assert!(actor.ensure_staff("voiding a sale").is_err());
    }

    #[test]
    fn staff_actor_cannot_impersonate_system() {
        assert!(Actor::user(UserId::system(), Role::Cashier).is_err());
        assert!(Actor::user(UserId::new(), Role::System).is_err());
    }

    #[test]
    fn admin_and_manager_are_privileged() {
        for (role, privileged) in [
            (Role::Admin, true),
            (Role::Manager, true),
            (Role::Pharmacist, false),
            (Role::Cashier, false),
        ] {
            let actor = Actor::user(UserId::new(), role).unwrap();
            assert_eq!(actor.is_privileged(), privileged, "{role}");
        }
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Manager".parse::<Role>().unwrap(), Role::Manager);
        assert!("owner".parse::<Role>().is_err());
    }
}
