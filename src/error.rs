//! Error taxonomy for instruction invocations
use crate::types::{Role, Status};

#[derive(thiserror::Error, Debug)]
pub enum InstructionError {
    // validation
    #[error("Incorrect number of arguments: {0}")]
    InvalidArguments(String),
    #[error("Quantity must be an unsigned integer, got {0:?}")]
    InvalidQuantity(String),
    #[error("Type of instruction must be either \"fop\" or \"dvp\", got {0:?}")]
    InvalidType(String),
    #[error("Payment amount must be a decimal number (dvp), got {0:?}")]
    InvalidPaymentAmount(String),
    #[error("Key part {0:?} contains a reserved character")]
    InvalidKeyPart(String),
    #[error("Unknown instruction status {0:?}")]
    InvalidStatus(String),
    #[error("Unknown party {0:?}, expected transferer or receiver")]
    InvalidRole(String),
    #[error("Date {0:?} is not a YYYY-MM-DD date")]
    InvalidDate(String),
    #[error("Unknown function {0:?}")]
    UnknownFunction(String),
    #[error("Malformed JSON argument: {0}")]
    Json(#[from] serde_json::Error),

    // authorization
    #[error("{0}")]
    Unauthorized(String),

    #[error("Instruction not found")]
    NotFound,

    // conflict
    #[error("Instruction is not unique: {0}")]
    NotUnique(String),
    #[error("Instruction is not unique: already created by {0}")]
    AlreadyInitiated(Role),
    #[error("Ledger was already initialised by {0}")]
    AlreadyDeployed(String),
    #[error("Deponents declared by the counterparty do not match the instruction")]
    DeponentMismatch,
    #[error("Instruction status cannot change from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },
    #[error("Instruction status or caller identity is wrong")]
    StatusRejected,
    #[error("Transferer position is insufficient for the instruction")]
    InsufficientPosition,
    #[error("Ledger key was modified by a concurrent invocation")]
    ReadConflict,

    // persistence
    #[error("Persistence failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Ledger value is corrupt: {0}")]
    Corrupt(String),
    #[error("External call failed: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl InstructionError {
    /// Response status code reported to the invoking client.
    pub fn status_code(&self) -> u16 {
        use InstructionError::*;

        match self {
            InvalidArguments(_) | InvalidQuantity(_) | InvalidType(_) | InvalidPaymentAmount(_)
            | InvalidKeyPart(_) | InvalidStatus(_) | InvalidRole(_) | InvalidDate(_)
            | UnknownFunction(_) | Json(_) => {
                400
            }
            Unauthorized(_) => 403,
            NotFound => 404,
            NotUnique(_)
            | AlreadyInitiated(_)
            | AlreadyDeployed(_)
            | DeponentMismatch
            | InvalidTransition { .. }
            | StatusRejected
            | InsufficientPosition
            | ReadConflict => 409,
            Storage(_) | Corrupt(_) | Collaborator(_) => 500,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status_code() == 409
    }
}

impl From<minicbor::decode::Error> for InstructionError {
    fn from(value: minicbor::decode::Error) -> Self {
        InstructionError::Corrupt(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for InstructionError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        InstructionError::Corrupt(value.to_string())
    }
}
