//! Secondary indexes rejecting duplicate economic submissions
//!
//! An index entry maps a business key to the ledger address of the
//! instruction holding it. Entries left behind by deleted or rolled back
//! instructions are stale and may be taken over.
use std::fmt;

use tracing::warn;

use crate::codec::create_composite_key;
use crate::error::InstructionError;
use crate::instruction::{InstructionKey, InstructionValue};
use crate::ledger::Invocation;
use crate::types::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// (reference, organization, instruction date, trade date)
    Reference,
    /// (member instruction id, organization, instruction date)
    MemberInstructionId,
}

impl IndexKind {
    pub fn object_type(self) -> &'static str {
        match self {
            IndexKind::Reference => "UniqueReference",
            IndexKind::MemberInstructionId => "UniqueMemberInstructionId",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Reference => f.write_str("reference"),
            IndexKind::MemberInstructionId => f.write_str("member instruction id"),
        }
    }
}

/// Index entries one organization's submission occupies.
pub fn index_keys(
    key: &InstructionKey,
    organization: &str,
    member_instruction_id: &str,
) -> Result<Vec<(IndexKind, String)>, InstructionError> {
    let mut keys = vec![(
        IndexKind::Reference,
        create_composite_key(
            IndexKind::Reference.object_type(),
            &[
                key.reference.as_str(),
                organization,
                key.instruction_date.as_str(),
                key.trade_date.as_str(),
            ],
        )?,
    )];

    if !member_instruction_id.is_empty() {
        keys.push((
            IndexKind::MemberInstructionId,
            create_composite_key(
                IndexKind::MemberInstructionId.object_type(),
                &[member_instruction_id, organization, key.instruction_date.as_str()],
            )?,
        ));
    }

    Ok(keys)
}

fn is_stale(inv: &mut Invocation<'_>, owner: &str) -> Result<bool, InstructionError> {
    Ok(match inv.get_state(owner)? {
        None => true,
        Some(bytes) => InstructionValue::from_cbor(&bytes)?.status == Status::RollbackDone,
    })
}

/// Claim `index_key` for the instruction stored at `address`.
pub fn reserve(
    inv: &mut Invocation<'_>,
    kind: IndexKind,
    index_key: &str,
    address: &str,
) -> Result<(), InstructionError> {
    let Some(owner) = inv.get_state(index_key)? else {
        return inv.put_state(index_key, address.as_bytes().to_vec());
    };
    let owner = String::from_utf8(owner).map_err(|e| InstructionError::Corrupt(e.to_string()))?;

    if owner == address {
        return Ok(());
    }
    if is_stale(inv, &owner)? {
        warn!(%kind, "taking over stale uniqueness index");
        return inv.put_state(index_key, address.as_bytes().to_vec());
    }

    Err(InstructionError::NotUnique(format!(
        "{kind} is already used by another instruction"
    )))
}

/// Drop `index_key` if the instruction at `address` holds it.
pub fn release(inv: &mut Invocation<'_>, index_key: &str, address: &str) -> Result<(), InstructionError> {
    if inv.get_state(index_key)?.as_deref() == Some(address.as_bytes()) {
        inv.del_state(index_key)?;
    }
    Ok(())
}

pub fn reserve_all(
    inv: &mut Invocation<'_>,
    key: &InstructionKey,
    address: &str,
    organization: &str,
    member_instruction_id: &str,
) -> Result<(), InstructionError> {
    for (kind, index_key) in index_keys(key, organization, member_instruction_id)? {
        reserve(inv, kind, &index_key, address)?;
    }
    Ok(())
}

pub fn release_all(
    inv: &mut Invocation<'_>,
    key: &InstructionKey,
    address: &str,
    organization: &str,
    member_instruction_id: &str,
) -> Result<(), InstructionError> {
    for (_, index_key) in index_keys(key, organization, member_instruction_id)? {
        release(inv, &index_key, address)?;
    }
    Ok(())
}
