use rxledger_core::{Actor, Role, UserId};

/// Caller identity for a request.
///
/// Inserted by the identity middleware; every ledger route requires it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: Actor,
}

impl ActorContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn user_id(&self) -> UserId {
        self.actor.user_id()
    }

    pub fn role(&self) -> Role {
        self.actor.role()
    }
}
