//! Ownership of depository balances by organizations
//!
//! Each registered balance is stored at `\0Authentication\0account\0division\0`
//! and names the organization (and its deponent code) allowed to act for it.
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{create_composite_key, object_type_prefix, split_composite_key};
use crate::error::InstructionError;
use crate::ledger::Invocation;
use crate::types::Balance;

pub const AUTHENTICATION_INDEX: &str = "Authentication";
pub const DEPLOYMENT_INDEX: &str = "Deployment";

/// Organization and the balances it owns, as exchanged with clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    #[serde(rename = "organization")]
    pub name: String,
    #[serde(default)]
    pub deponent: String,
    #[serde(default)]
    pub balances: Vec<Balance>,
}

/// Stored value of a balance mapping.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OrganizationRecord {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub deponent: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BalanceOwner {
    pub organization: String,
    pub deponent: String,
    pub balance: Balance,
}

fn balance_key(balance: &Balance) -> Result<String, InstructionError> {
    create_composite_key(AUTHENTICATION_INDEX, &[&balance.account, &balance.division])
}

pub fn owner_of(
    inv: &mut Invocation<'_>,
    balance: &Balance,
) -> Result<Option<OrganizationRecord>, InstructionError> {
    inv.get_state(&balance_key(balance)?)?
        .map(|bytes| Ok(minicbor::decode(&bytes)?))
        .transpose()
}

/// Whether `organization` is registered as the owner of `balance`.
pub fn authenticate(
    inv: &mut Invocation<'_>,
    organization: &str,
    balance: &Balance,
) -> Result<bool, InstructionError> {
    let owner = owner_of(inv, balance)?;
    debug!(
        organization,
        account = %balance.account,
        division = %balance.division,
        owner = owner.as_ref().map(|o| o.name.as_str()),
        "authenticate"
    );
    Ok(owner.is_some_and(|owner| owner.name == organization))
}

/// Record the one-time deployment, failing if the ledger was already
/// initialised.
pub fn mark_deployed(inv: &mut Invocation<'_>, caller: &str) -> Result<(), InstructionError> {
    let marker = object_type_prefix(DEPLOYMENT_INDEX);
    if let Some(bytes) = inv.get_state(&marker)? {
        let deployer = String::from_utf8_lossy(&bytes).into_owned();
        warn!(caller, %deployer, "repeated init rejected");
        return Err(InstructionError::AlreadyDeployed(deployer));
    }
    inv.put_state(&marker, caller.as_bytes().to_vec())
}

/// Upsert every balance of every organization.
pub fn register(inv: &mut Invocation<'_>, organizations: &[Organization]) -> Result<(), InstructionError> {
    for organization in organizations {
        let record = OrganizationRecord {
            name: organization.name.clone(),
            deponent: organization.deponent.clone(),
        };
        let bytes = minicbor::to_vec(&record)?;
        for balance in &organization.balances {
            inv.put_state(&balance_key(balance)?, bytes.clone())?;
        }
        info!(organization = %organization.name, balances = organization.balances.len(), "balances registered");
    }
    Ok(())
}

/// Remove the listed balances still owned by the listed organization.
pub fn deregister(inv: &mut Invocation<'_>, organizations: &[Organization]) -> Result<(), InstructionError> {
    for organization in organizations {
        for balance in &organization.balances {
            match owner_of(inv, balance)? {
                Some(owner) if owner.name == organization.name => {
                    inv.del_state(&balance_key(balance)?)?;
                }
                _ => debug!(
                    organization = %organization.name,
                    account = %balance.account,
                    "balance not owned, skipped"
                ),
            }
        }
        info!(organization = %organization.name, "balances removed");
    }
    Ok(())
}

pub fn list(inv: &mut Invocation<'_>) -> Result<Vec<BalanceOwner>, InstructionError> {
    inv.scan_prefix(&object_type_prefix(AUTHENTICATION_INDEX))?
        .into_iter()
        .map(|(key, bytes)| {
            let (_, parts) = split_composite_key(&key)?;
            let [account, division] = <[String; 2]>::try_from(parts)
                .map_err(|parts| InstructionError::Corrupt(format!("balance key {parts:?}")))?;
            let record: OrganizationRecord = minicbor::decode(&bytes)?;
            Ok(BalanceOwner {
                organization: record.name,
                deponent: record.deponent,
                balance: Balance { account, division },
            })
        })
        .collect()
}
