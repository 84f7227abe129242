//! Versioned key-value ledger on top of sled
//!
//! Every client call runs inside an [`Invocation`]. Reads go to the committed
//! `state` tree (overlaid with the invocation's own pending writes) and are
//! remembered; writes and the lifecycle event are buffered. [`Invocation::commit`]
//! applies them, one history record per written key and the event in a single
//! multi-tree transaction, after checking that nothing the invocation read
//! has changed in the meantime.
use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use minicbor::bytes::ByteVec;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{IVec, Transactional};
use tracing::{debug, warn};

use crate::error::InstructionError;
use crate::types::TimeStamp;
use crate::utils;

const STATE_TREE: &str = "state";
const HISTORY_TREE: &str = "history";
const EVENTS_TREE: &str = "events";

/// One committed version of a key.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct HistoryRecord {
    #[n(0)]
    pub tx_id: String,
    #[n(1)]
    pub timestamp: TimeStamp<Utc>,
    // None marks a deletion
    #[n(2)]
    pub value: Option<ByteVec>,
}

impl HistoryRecord {
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// Lifecycle event published by a committed invocation.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Event {
    #[n(0)]
    pub tx_id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub payload: String,
}

pub struct Ledger {
    db: sled::Db,
    state: sled::Tree,
    history: sled::Tree,
    events: sled::Tree,
}

impl Ledger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, InstructionError> {
        Self::from_db(sled::open(path)?)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, InstructionError> {
        Ok(Self {
            state: db.open_tree(STATE_TREE)?,
            history: db.open_tree(HISTORY_TREE)?,
            events: db.open_tree(EVENTS_TREE)?,
            db,
        })
    }

    /// Start an invocation on behalf of `creator`.
    pub fn begin(&self, creator: &str) -> Invocation<'_> {
        let tx_id = utils::new_transaction_id(creator);
        debug!(%tx_id, creator, "invocation started");

        Invocation {
            ledger: self,
            tx_id,
            timestamp: TimeStamp::new(),
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            event: None,
        }
    }

    /// Every committed version of `key`, oldest first.
    pub fn history(&self, key: &str) -> Result<Vec<HistoryRecord>, InstructionError> {
        self.history
            .scan_prefix(utils::history_prefix(key))
            .values()
            .map(|value| Ok(minicbor::decode(&value?)?))
            .collect()
    }

    /// All events in commit order.
    pub fn events(&self) -> Result<Vec<Event>, InstructionError> {
        self.events
            .iter()
            .values()
            .map(|value| Ok(minicbor::decode(&value?)?))
            .collect()
    }
}

/// Transaction context of a single call.
pub struct Invocation<'a> {
    ledger: &'a Ledger,
    tx_id: String,
    timestamp: TimeStamp<Utc>,
    // first observed committed value of every key read
    reads: BTreeMap<String, Option<IVec>>,
    // None marks a pending deletion
    writes: BTreeMap<String, Option<Vec<u8>>>,
    event: Option<(String, String)>,
}

impl Invocation<'_> {
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn timestamp(&self) -> &TimeStamp<Utc> {
        &self.timestamp
    }

    pub fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, InstructionError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }

        let committed = self.ledger.state.get(key)?;
        let value = committed.as_ref().map(|v| v.to_vec());
        self.reads.entry(key.to_string()).or_insert(committed);

        Ok(value)
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), InstructionError> {
        if key.is_empty() {
            return Err(InstructionError::InvalidKeyPart(String::new()));
        }
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    pub fn del_state(&mut self, key: &str) -> Result<(), InstructionError> {
        if key.is_empty() {
            return Err(InstructionError::InvalidKeyPart(String::new()));
        }
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    /// All live entries whose key starts with `prefix`, in key order,
    /// including this invocation's pending writes.
    pub fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, InstructionError> {
        let mut merged = BTreeMap::new();

        for entry in self.ledger.state.scan_prefix(prefix) {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| InstructionError::Corrupt(e.to_string()))?;
            merged.insert(key.clone(), value.to_vec());
            self.reads.entry(key).or_insert(Some(value));
        }

        for (key, pending) in self.writes.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match pending {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }

        Ok(merged.into_iter().collect())
    }

    /// Replace the event published when this invocation commits.
    pub fn set_event(&mut self, name: &str, payload: String) {
        self.event = Some((name.to_string(), payload));
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty() && self.event.is_none()
    }

    /// Atomically apply the write-set. Read-only invocations leave no trace.
    pub fn commit(self) -> Result<String, InstructionError> {
        if self.is_read_only() {
            return Ok(self.tx_id);
        }

        let ledger = self.ledger;
        let mut versions = Vec::with_capacity(self.writes.len());
        for (key, value) in &self.writes {
            let record = HistoryRecord {
                tx_id: self.tx_id.clone(),
                timestamp: self.timestamp.clone(),
                value: value.clone().map(ByteVec::from),
            };
            let mut history_key = utils::history_prefix(key).into_bytes();
            history_key.extend_from_slice(&ledger.db.generate_id()?.to_be_bytes());
            versions.push((key.as_bytes(), value.as_deref(), history_key, minicbor::to_vec(&record)?));
        }

        let event = match &self.event {
            Some((name, payload)) => {
                let event = Event {
                    tx_id: self.tx_id.clone(),
                    name: name.clone(),
                    payload: payload.clone(),
                };
                Some((ledger.db.generate_id()?.to_be_bytes(), minicbor::to_vec(&event)?))
            }
            None => None,
        };

        let result = (&ledger.state, &ledger.history, &ledger.events).transaction(
            |(state, history, events)| {
                for (key, observed) in &self.reads {
                    if state.get(key.as_bytes())? != *observed {
                        return Err(ConflictableTransactionError::Abort(
                            InstructionError::ReadConflict,
                        ));
                    }
                }

                for (key, value, history_key, record) in &versions {
                    match value {
                        Some(value) => state.insert(*key, *value)?,
                        None => state.remove(*key)?,
                    };
                    history.insert(history_key.as_slice(), record.as_slice())?;
                }

                if let Some((event_key, event)) = &event {
                    events.insert(&event_key[..], event.as_slice())?;
                }

                Ok(())
            },
        );

        match result {
            Ok(()) => {
                debug!(tx_id = %self.tx_id, writes = versions.len(), "invocation committed");
                Ok(self.tx_id)
            }
            Err(TransactionError::Abort(e)) => {
                warn!(tx_id = %self.tx_id, error = %e, "invocation aborted");
                Err(e)
            }
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }
}
