//! Instruction key and value
use serde::{Deserialize, Serialize};

use crate::error::InstructionError;
use crate::types::{Balance, Reason, Requisites, Role, Status};

/// Payment leg of a delivery-versus-payment instruction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub transferer_requisites: Requisites,
    pub receiver_requisites: Requisites,
    pub payment_amount: String,
    pub payment_currency: String,
}

/// Instrument type. Payment fields only exist for DVP.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Settlement {
    Fop,
    Dvp(Payment),
}

impl Settlement {
    pub fn type_literal(&self) -> &'static str {
        match self {
            Settlement::Fop => "fop",
            Settlement::Dvp(_) => "dvp",
        }
    }
}

/// Immutable natural key of an instruction. It *is* the ledger address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstructionKey {
    pub transferer: Balance,
    pub receiver: Balance,
    pub security: String,
    pub quantity: String,
    pub reference: String,
    pub instruction_date: String,
    pub trade_date: String,
    #[serde(flatten)]
    pub settlement: Settlement,
}

/// One party's contribution to the instruction.
#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    #[n(0)]
    pub member_instruction_id: String,
    #[n(1)]
    pub reason: Reason,
    // settlement message text, rendered at match time
    #[n(2)]
    pub document: String,
    #[n(3)]
    pub signature: String,
    #[n(4)]
    pub signature_downloaded: bool,
}

/// Mutable part of an instruction, stored at the key's ledger address.
#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstructionValue {
    #[n(0)]
    pub status: Status,
    #[n(1)]
    pub status_detail: String,
    #[n(2)]
    pub initiator: Role,
    #[n(3)]
    pub deponent_from: String,
    #[n(4)]
    pub deponent_to: String,
    #[n(5)]
    pub transferer: Leg,
    #[n(6)]
    pub receiver: Leg,
    // dvp only
    #[n(7)]
    pub additional_information: Option<Reason>,
}

impl InstructionValue {
    pub fn new(initiator: Role, deponent_from: String, deponent_to: String) -> Self {
        Self {
            status: Status::Initiated,
            status_detail: String::new(),
            initiator,
            deponent_from,
            deponent_to,
            transferer: Leg::default(),
            receiver: Leg::default(),
            additional_information: None,
        }
    }

    pub fn leg(&self, role: Role) -> &Leg {
        match role {
            Role::Transferer => &self.transferer,
            Role::Receiver => &self.receiver,
        }
    }

    pub fn leg_mut(&mut self, role: Role) -> &mut Leg {
        match role {
            Role::Transferer => &mut self.transferer,
            Role::Receiver => &mut self.receiver,
        }
    }

    /// Deponent code the given leg acts under.
    pub fn deponent(&self, role: Role) -> &str {
        match role {
            Role::Transferer => &self.deponent_from,
            Role::Receiver => &self.deponent_to,
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, InstructionError> {
        Ok(minicbor::to_vec(self)?)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, InstructionError> {
        Ok(minicbor::decode(bytes)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub key: InstructionKey,
    pub value: InstructionValue,
}

impl Instruction {
    pub fn new(key: InstructionKey, value: InstructionValue) -> Self {
        Self { key, value }
    }

    pub fn status(&self) -> Status {
        self.value.status
    }

    pub fn party(&self, role: Role) -> &Balance {
        match role {
            Role::Transferer => &self.key.transferer,
            Role::Receiver => &self.key.receiver,
        }
    }
}

impl InstructionKey {
    /// Construct a free-of-payment key, the basis for a submission.
    pub fn fop(transferer: Balance, receiver: Balance) -> Self {
        Self {
            transferer,
            receiver,
            security: String::new(),
            quantity: String::new(),
            reference: String::new(),
            instruction_date: String::new(),
            trade_date: String::new(),
            settlement: Settlement::Fop,
        }
    }
    pub fn dvp(transferer: Balance, receiver: Balance, payment: Payment) -> Self {
        Self {
            settlement: Settlement::Dvp(payment),
            ..Self::fop(transferer, receiver)
        }
    }
    pub fn set_security(mut self, security: &str) -> Self {
        self.security = security.to_string();
        self
    }
    pub fn set_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity.to_string();
        self
    }
    pub fn set_reference(mut self, reference: &str) -> Self {
        self.reference = reference.to_uppercase();
        self
    }
    pub fn set_instruction_date(mut self, date: &str) -> Self {
        self.instruction_date = date.to_string();
        self
    }
    pub fn set_trade_date(mut self, date: &str) -> Self {
        self.trade_date = date.to_string();
        self
    }

    pub fn payment(&self) -> Option<&Payment> {
        match &self.settlement {
            Settlement::Fop => None,
            Settlement::Dvp(payment) => Some(payment),
        }
    }
}
