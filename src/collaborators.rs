//! Systems the settlement core calls out to

use crate::types::Balance;

/// Resolves the organization that signed the current invocation.
pub trait IdentityResolver {
    fn caller_organization(&self) -> anyhow::Result<String>;
}

/// Identity already established by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownOrganization(pub String);

impl KnownOrganization {
    pub fn new(organization: &str) -> Self {
        Self(organization.to_string())
    }
}

impl IdentityResolver for KnownOrganization {
    fn caller_organization(&self) -> anyhow::Result<String> {
        if self.0.is_empty() {
            anyhow::bail!("caller identity has no organization");
        }
        Ok(self.0.clone())
    }
}

/// Position bookkeeping kept outside the instruction ledger.
pub trait BalanceLedger {
    /// Whether `balance` holds at least `quantity` of `security`.
    fn check_balance(&self, balance: &Balance, security: &str, quantity: &str) -> anyhow::Result<bool>;

    /// Organization allowed to drive settlement statuses and registry changes.
    fn privileged_organization(&self) -> anyhow::Result<String>;
}

impl<T: BalanceLedger + ?Sized> BalanceLedger for &T {
    fn check_balance(&self, balance: &Balance, security: &str, quantity: &str) -> anyhow::Result<bool> {
        (**self).check_balance(balance, security, quantity)
    }

    fn privileged_organization(&self) -> anyhow::Result<String> {
        (**self).privileged_organization()
    }
}
