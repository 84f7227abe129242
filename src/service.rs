//! Service layer API for instruction workflow operations
//!
//! Every public operation runs in its own ledger invocation and either
//! commits all of its writes or none of them.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::{INSTRUCTION_INDEX, Submission, object_type_prefix};
use crate::collaborators::BalanceLedger;
use crate::document;
use crate::error::InstructionError;
use crate::instruction::{Instruction, InstructionKey, InstructionValue};
use crate::ledger::{Invocation, Ledger};
use crate::registry::{self, BalanceOwner, Organization};
use crate::settings::Settings;
use crate::types::{Role, Status};
use crate::uniqueness;

/// One committed version of an instruction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub tx_id: String,
    pub value: Option<InstructionValue>,
    pub timestamp: String,
    pub is_delete: bool,
}

pub struct InstructionService<B: BalanceLedger> {
    ledger: Arc<Ledger>,
    balances: B,
    settings: Settings,
}

impl<B: BalanceLedger> InstructionService<B> {
    pub fn new(ledger: Arc<Ledger>, balances: B, settings: Settings) -> Self {
        Self {
            ledger,
            balances,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run `operation` in a fresh invocation and commit it on success.
    fn execute<T>(
        &self,
        caller: &str,
        operation: impl FnOnce(&mut Invocation<'_>) -> Result<T, InstructionError>,
    ) -> Result<T, InstructionError> {
        let mut inv = self.ledger.begin(caller);
        let output = operation(&mut inv)?;
        inv.commit()?;
        Ok(output)
    }

    fn is_privileged(&self, caller: &str) -> Result<bool, InstructionError> {
        Ok(self.balances.privileged_organization()? == caller)
    }

    fn require_privileged(&self, caller: &str) -> Result<(), InstructionError> {
        if !self.is_privileged(caller)? {
            return Err(InstructionError::Unauthorized(format!(
                "{caller} is not the privileged organization"
            )));
        }
        Ok(())
    }

    // ---- balance registry ----

    /// Register the initial organizations at deployment. Succeeds once per
    /// ledger; later ownership changes go through `add_balances`.
    pub fn init(&self, caller: &str, organizations: &[Organization]) -> Result<(), InstructionError> {
        info!(caller, organizations = organizations.len(), "init");
        self.execute(caller, |inv| {
            registry::mark_deployed(inv, caller)?;
            registry::register(inv, organizations)
        })
    }

    pub fn add_balances(&self, caller: &str, organizations: &[Organization]) -> Result<(), InstructionError> {
        self.require_privileged(caller)?;
        self.execute(caller, |inv| registry::register(inv, organizations))
    }

    pub fn remove_balances(&self, caller: &str, organizations: &[Organization]) -> Result<(), InstructionError> {
        self.require_privileged(caller)?;
        self.execute(caller, |inv| registry::deregister(inv, organizations))
    }

    pub fn get_balances(&self, caller: &str) -> Result<Vec<BalanceOwner>, InstructionError> {
        self.execute(caller, registry::list)
    }

    // ---- matching ----

    /// Submit the receiver's half of an instruction.
    pub fn receive(&self, caller: &str, submission: Submission) -> Result<Instruction, InstructionError> {
        self.execute(caller, |inv| self.submit(inv, caller, Role::Receiver, submission))
    }

    /// Submit the transferer's half of an instruction.
    pub fn transfer(&self, caller: &str, submission: Submission) -> Result<Instruction, InstructionError> {
        self.execute(caller, |inv| self.submit(inv, caller, Role::Transferer, submission))
    }

    fn submit(
        &self,
        inv: &mut Invocation<'_>,
        caller: &str,
        role: Role,
        submission: Submission,
    ) -> Result<Instruction, InstructionError> {
        let Submission {
            key,
            deponent_from,
            deponent_to,
            member_instruction_id,
            reason,
            additional_information,
        } = submission;
        key.validate()?;

        let balance = match role {
            Role::Transferer => &key.transferer,
            Role::Receiver => &key.receiver,
        };
        if !registry::authenticate(inv, caller, balance)? {
            return Err(InstructionError::Unauthorized(format!(
                "{caller} does not own the {role} balance {}/{}",
                balance.account, balance.division
            )));
        }

        let address = key.composite_key()?;

        let Some(mut value) = load(inv, &address)? else {
            uniqueness::reserve_all(inv, &key, &address, caller, &member_instruction_id)?;

            let mut value = InstructionValue::new(role, deponent_from, deponent_to);
            let leg = value.leg_mut(role);
            leg.member_instruction_id = member_instruction_id;
            leg.reason = reason;
            if key.payment().is_some() {
                value.additional_information = additional_information;
            }

            let instruction = Instruction::new(key, value);
            store(inv, &address, &instruction)?;
            emit(inv, &instruction)?;
            info!(%role, reference = %instruction.key.reference, "instruction initiated");
            return Ok(instruction);
        };

        if value.initiator == role {
            return Err(InstructionError::AlreadyInitiated(role));
        }
        if value.status != Status::Initiated {
            return Err(InstructionError::InvalidTransition {
                from: value.status,
                to: Status::Matched,
            });
        }
        if value.deponent_from != deponent_from || value.deponent_to != deponent_to {
            return Err(InstructionError::DeponentMismatch);
        }

        uniqueness::reserve_all(inv, &key, &address, caller, &member_instruction_id)?;

        let leg = value.leg_mut(role);
        leg.member_instruction_id = member_instruction_id;
        leg.reason = reason;
        if key.payment().is_some() && value.additional_information.is_none() {
            value.additional_information = additional_information;
        }

        let mut instruction = Instruction::new(key, value);
        self.match_instruction(&mut instruction)?;
        store(inv, &address, &instruction)?;
        emit(inv, &instruction)?;
        info!(reference = %instruction.key.reference, "instruction matched");

        Ok(instruction)
    }

    /// Both halves agree: check the position and render settlement orders.
    fn match_instruction(&self, instruction: &mut Instruction) -> Result<(), InstructionError> {
        let status = instruction.status();
        if !status.can_transition_to(Status::Matched) {
            return Err(InstructionError::InvalidTransition {
                from: status,
                to: Status::Matched,
            });
        }

        if self.settings.check_positions {
            let key = &instruction.key;
            if !self
                .balances
                .check_balance(&key.transferer, &key.security, &key.quantity)?
            {
                return Err(InstructionError::InsufficientPosition);
            }
        }

        instruction.value.status = Status::Matched;
        let depositary = &self.settings.depositary_code;
        let transferer = document::render(instruction, Role::Transferer, depositary)?;
        let receiver = document::render(instruction, Role::Receiver, depositary)?;
        instruction.value.transferer.document = transferer;
        instruction.value.receiver.document = receiver;

        Ok(())
    }

    // ---- lifecycle ----

    /// Record a party's signature; the second signature moves the
    /// instruction to `signed`.
    pub fn sign(&self, caller: &str, key: &InstructionKey, signature: &str) -> Result<Instruction, InstructionError> {
        self.execute(caller, |inv| {
            let (address, mut instruction) = load_existing(inv, key)?;

            let is_transferer = registry::authenticate(inv, caller, &instruction.key.transferer)?;
            let is_receiver = registry::authenticate(inv, caller, &instruction.key.receiver)?;
            if !(is_transferer || is_receiver) {
                return Err(InstructionError::Unauthorized(
                    "Caller must be either transferer or receiver".into(),
                ));
            }

            let status = instruction.status();
            if status != Status::Matched {
                return Err(InstructionError::InvalidTransition {
                    from: status,
                    to: Status::Signed,
                });
            }

            let value = &mut instruction.value;
            if is_transferer {
                value.transferer.signature = signature.to_string();
            }
            if is_receiver {
                value.receiver.signature = signature.to_string();
            }

            if !value.transferer.signature.is_empty() && !value.receiver.signature.is_empty() {
                value.status = Status::Signed;
                emit(inv, &instruction)?;
                info!(reference = %instruction.key.reference, "instruction signed");
            }

            store(inv, &address, &instruction)?;
            Ok(instruction)
        })
    }

    /// Move an instruction to `status`.
    ///
    /// Returns `None` when the instruction was canceled and removed.
    pub fn set_status(
        &self,
        caller: &str,
        key: &InstructionKey,
        status: Status,
        detail: Option<&str>,
    ) -> Result<Option<Instruction>, InstructionError> {
        let privileged = self.is_privileged(caller)?;

        self.execute(caller, |inv| {
            let (address, mut instruction) = load_existing(inv, key)?;
            let current = instruction.status();

            if privileged && status.is_privileged_target() {
                if !current.can_transition_to(status) {
                    return Err(InstructionError::InvalidTransition { from: current, to: status });
                }

                instruction.value.status = status;
                if let Some(detail) = detail {
                    instruction.value.status_detail = detail.to_string();
                }
                if status == Status::RollbackDone {
                    release_legs(inv, &instruction, &address)?;
                }

                store(inv, &address, &instruction)?;
                emit(inv, &instruction)?;
                info!(from = %current, to = %status, reference = %instruction.key.reference, "status changed");
                return Ok(Some(instruction));
            }

            let initiator = instruction.value.initiator;
            if status == Status::Canceled
                && registry::authenticate(inv, caller, instruction.party(initiator))?
            {
                if !current.can_transition_to(Status::Canceled) {
                    return Err(InstructionError::InvalidTransition { from: current, to: status });
                }

                let member_instruction_id = instruction.value.leg(initiator).member_instruction_id.clone();
                uniqueness::release_all(inv, &instruction.key, &address, caller, &member_instruction_id)?;
                inv.del_state(&address)?;

                instruction.value.status = Status::Canceled;
                if let Some(detail) = detail {
                    instruction.value.status_detail = detail.to_string();
                }
                emit(inv, &instruction)?;
                info!(reference = %instruction.key.reference, "instruction canceled");
                return Ok(None);
            }

            let is_party = registry::authenticate(inv, caller, &instruction.key.transferer)?
                || registry::authenticate(inv, caller, &instruction.key.receiver)?;
            if !(is_party || privileged) {
                return Err(InstructionError::Unauthorized(
                    "Caller must be the privileged organization or a party".into(),
                ));
            }

            debug!(caller, from = %current, to = %status, "status change rejected");
            Err(InstructionError::StatusRejected)
        })
    }

    /// Start rolling back a settled instruction.
    pub fn rollback(
        &self,
        caller: &str,
        key: &InstructionKey,
        detail: Option<&str>,
    ) -> Result<Instruction, InstructionError> {
        self.require_privileged(caller)?;

        self.execute(caller, |inv| {
            let (address, mut instruction) = load_existing(inv, key)?;
            let current = instruction.status();
            if !current.can_transition_to(Status::RollbackInitiated) {
                return Err(InstructionError::InvalidTransition {
                    from: current,
                    to: Status::RollbackInitiated,
                });
            }

            instruction.value.status = Status::RollbackInitiated;
            if let Some(detail) = detail {
                instruction.value.status_detail = detail.to_string();
            }

            store(inv, &address, &instruction)?;
            emit(inv, &instruction)?;
            info!(from = %current, reference = %instruction.key.reference, "rollback initiated");
            Ok(instruction)
        })
    }

    /// Mark `party`'s signed order as downloaded by the depositary.
    pub fn update_download_flags(
        &self,
        caller: &str,
        key: &InstructionKey,
        party: Role,
    ) -> Result<Instruction, InstructionError> {
        self.require_privileged(caller)?;

        self.execute(caller, |inv| {
            let (address, mut instruction) = load_existing(inv, key)?;

            // only signed orders exist to be downloaded
            let current = instruction.status();
            if !matches!(current, Status::Signed | Status::Downloaded) {
                return Err(InstructionError::InvalidTransition {
                    from: current,
                    to: Status::Downloaded,
                });
            }
            let leg = instruction.value.leg_mut(party);
            if leg.signature.is_empty() {
                return Err(InstructionError::StatusRejected);
            }
            leg.signature_downloaded = true;

            let value = &mut instruction.value;
            if value.status == Status::Signed
                && value.transferer.signature_downloaded
                && value.receiver.signature_downloaded
            {
                value.status = Status::Downloaded;
                emit(inv, &instruction)?;
                info!(reference = %instruction.key.reference, "instruction downloaded");
            }

            store(inv, &address, &instruction)?;
            Ok(instruction)
        })
    }

    // ---- queries ----

    /// Instructions visible to `caller`.
    pub fn query(&self, caller: &str) -> Result<Vec<Instruction>, InstructionError> {
        let privileged = self.is_privileged(caller)?;

        self.execute(caller, |inv| {
            let mut visible = vec![];
            for instruction in scan(inv)? {
                if privileged || is_visible_to(inv, caller, &instruction)? {
                    visible.push(instruction);
                }
            }
            Ok(visible)
        })
    }

    pub fn query_by_status(&self, caller: &str, status: Status) -> Result<Vec<Instruction>, InstructionError> {
        self.require_privileged(caller)?;

        self.execute(caller, |inv| {
            Ok(scan(inv)?
                .into_iter()
                .filter(|instruction| instruction.status() == status)
                .collect())
        })
    }

    /// Every committed version of the instruction at `key`, oldest first.
    pub fn history(&self, key: &InstructionKey) -> Result<Vec<HistoryEntry>, InstructionError> {
        self.ledger
            .history(&key.composite_key()?)?
            .into_iter()
            .map(|record| {
                let value = record
                    .value
                    .as_ref()
                    .map(|bytes| InstructionValue::from_cbor(bytes))
                    .transpose()?;
                Ok(HistoryEntry {
                    is_delete: record.is_delete(),
                    tx_id: record.tx_id,
                    value,
                    timestamp: record.timestamp.to_datetime_utc().to_rfc3339(),
                })
            })
            .collect()
    }
}

fn load(inv: &mut Invocation<'_>, address: &str) -> Result<Option<InstructionValue>, InstructionError> {
    inv.get_state(address)?
        .map(|bytes| InstructionValue::from_cbor(&bytes))
        .transpose()
}

fn load_existing(
    inv: &mut Invocation<'_>,
    key: &InstructionKey,
) -> Result<(String, Instruction), InstructionError> {
    let address = key.composite_key()?;
    let value = load(inv, &address)?.ok_or(InstructionError::NotFound)?;
    Ok((address, Instruction::new(key.clone(), value)))
}

fn store(inv: &mut Invocation<'_>, address: &str, instruction: &Instruction) -> Result<(), InstructionError> {
    inv.put_state(address, instruction.value.to_cbor()?)
}

fn emit(inv: &mut Invocation<'_>, instruction: &Instruction) -> Result<(), InstructionError> {
    let name = format!("{INSTRUCTION_INDEX}.{}", instruction.status());
    inv.set_event(&name, serde_json::to_string(instruction)?);
    Ok(())
}

fn scan(inv: &mut Invocation<'_>) -> Result<Vec<Instruction>, InstructionError> {
    inv.scan_prefix(&object_type_prefix(INSTRUCTION_INDEX))?
        .into_iter()
        .map(|(address, bytes)| {
            Ok(Instruction::new(
                InstructionKey::from_composite_key(&address)?,
                InstructionValue::from_cbor(&bytes)?,
            ))
        })
        .collect()
}

// initiators always see their instruction, counterparties once it is agreed
fn is_visible_to(
    inv: &mut Invocation<'_>,
    caller: &str,
    instruction: &Instruction,
) -> Result<bool, InstructionError> {
    let initiator = instruction.value.initiator;
    if registry::authenticate(inv, caller, instruction.party(initiator))? {
        return Ok(true);
    }
    Ok(instruction.status().is_agreed()
        && registry::authenticate(inv, caller, instruction.party(initiator.counterpart()))?)
}

fn release_legs(inv: &mut Invocation<'_>, instruction: &Instruction, address: &str) -> Result<(), InstructionError> {
    for role in [Role::Transferer, Role::Receiver] {
        let Some(owner) = registry::owner_of(inv, instruction.party(role))? else {
            debug!(%role, "balance owner gone, indexes left to stale takeover");
            continue;
        };
        let member_instruction_id = &instruction.value.leg(role).member_instruction_id;
        uniqueness::release_all(inv, &instruction.key, address, &owner.name, member_instruction_id)?;
    }
    Ok(())
}
