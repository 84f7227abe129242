//! Shared value types: parties, reasons, statuses and ledger timestamps
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InstructionError;

/// A depository balance: the account and division securities are held in.
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct Balance {
    #[n(0)]
    pub account: String,
    #[n(1)]
    pub division: String,
}

impl Balance {
    pub fn new(account: &str, division: &str) -> Self {
        Self {
            account: account.to_string(),
            division: division.to_string(),
        }
    }
}

/// Payment details of one side of a DVP instruction.
#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq,
)]
pub struct Requisites {
    #[n(0)]
    pub account: String,
    #[n(1)]
    pub bic: String,
}

/// Document a leg bases its instruction on.
#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq,
)]
#[serde(default)]
pub struct Reason {
    #[n(0)]
    pub document: String,
    #[n(1)]
    pub description: String,
    #[n(2)]
    #[serde(rename = "created")]
    pub document_date: String,
}

impl Reason {
    pub fn is_complete(&self) -> bool {
        !self.document.is_empty() && !self.description.is_empty() && !self.document_date.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty() && self.description.is_empty() && self.document_date.is_empty()
    }
}

/// Side of the instruction a caller acts for.
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[n(0)]
    Transferer,
    #[n(1)]
    Receiver,
}

impl Role {
    pub fn counterpart(self) -> Role {
        match self {
            Role::Transferer => Role::Receiver,
            Role::Receiver => Role::Transferer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Transferer => "transferer",
            Role::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = InstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transferer" => Ok(Role::Transferer),
            "receiver" => Ok(Role::Receiver),
            other => Err(InstructionError::InvalidRole(other.to_string())),
        }
    }
}

/// Lifecycle status of an instruction.
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    #[n(0)]
    Initiated,
    #[n(1)]
    Matched,
    #[n(2)]
    Signed,
    #[n(3)]
    Executed,
    #[n(4)]
    Downloaded,
    #[n(5)]
    Declined,
    #[n(6)]
    Canceled,
    #[n(7)]
    RollbackInitiated,
    #[n(8)]
    RollbackDone,
    #[n(9)]
    RollbackDeclined,
}

impl Status {
    pub const ALL: [Status; 10] = [
        Status::Initiated,
        Status::Matched,
        Status::Signed,
        Status::Executed,
        Status::Downloaded,
        Status::Declined,
        Status::Canceled,
        Status::RollbackInitiated,
        Status::RollbackDone,
        Status::RollbackDeclined,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Initiated => "initiated",
            Status::Matched => "matched",
            Status::Signed => "signed",
            Status::Executed => "executed",
            Status::Downloaded => "downloaded",
            Status::Declined => "declined",
            Status::Canceled => "canceled",
            Status::RollbackInitiated => "rollbackInitiated",
            Status::RollbackDone => "rollbackDone",
            Status::RollbackDeclined => "rollbackDeclined",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `executed` is final for the settlement path and can only be left
    /// through `rollbackInitiated`.
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;

        matches!(
            (self, next),
            (Initiated, Matched | Canceled | Declined)
                | (Matched, Signed | Declined | RollbackInitiated)
                | (Signed, Downloaded | Executed | Declined | RollbackInitiated)
                | (Downloaded, Executed | Declined | RollbackInitiated)
                | (Executed, RollbackInitiated)
                | (RollbackInitiated, RollbackDone | RollbackDeclined)
        )
    }

    pub fn is_terminal(self) -> bool {
        Status::ALL
            .iter()
            .all(|next| !self.can_transition_to(*next) || *next == Status::RollbackInitiated)
    }

    /// Targets only the privileged organization may request through `status`.
    pub fn is_privileged_target(self) -> bool {
        use Status::*;

        matches!(
            self,
            Declined | Executed | Downloaded | RollbackInitiated | RollbackDone | RollbackDeclined
        )
    }

    /// Both counterparties have agreed on the instruction.
    pub fn is_agreed(self) -> bool {
        !matches!(self, Status::Initiated | Status::Canceled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = InstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| InstructionError::InvalidStatus(s.to_string()))
    }
}

/// Ledger timestamp, CBOR-encoded as nanoseconds since the epoch.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Manual impls: `derive` would require `T: PartialOrd`, which `Utc` lacks.
impl<T: TimeZone + Eq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
