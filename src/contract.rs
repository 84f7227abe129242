//! String-argument invocation surface
//!
//! Clients call a named function with ordered string arguments and get a
//! [`Response`] back. Errors never escape as `Err`; they become responses
//! carrying the matching status code.
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::{LegacyKeys, decode_key_args, decode_submission};
use crate::collaborators::{BalanceLedger, IdentityResolver};
use crate::error::InstructionError;
use crate::ledger::Ledger;
use crate::logging::init_logging;
use crate::registry::Organization;
use crate::service::InstructionService;
use crate::settings::{Settings, load_settings};
use crate::types::{Role, Status};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub message: String,
    // JSON document
    pub payload: Option<String>,
}

impl Response {
    pub fn success(payload: Option<String>) -> Self {
        Self {
            status: 200,
            message: String::new(),
            payload,
        }
    }

    pub fn error(error: &InstructionError) -> Self {
        Self {
            status: error.status_code(),
            message: error.to_string(),
            payload: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

pub struct InstructionContract<B: BalanceLedger> {
    service: InstructionService<B>,
}

fn expect_args(args: &[String], count: usize) -> Result<(), InstructionError> {
    if args.len() != count {
        return Err(InstructionError::InvalidArguments(format!(
            "expected {count}, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn json<T: Serialize>(value: &T) -> Result<Option<String>, InstructionError> {
    Ok(Some(serde_json::to_string(value)?))
}

impl<B: BalanceLedger> InstructionContract<B> {
    pub fn new(service: InstructionService<B>) -> Self {
        Self { service }
    }

    /// Open the ledger at `settings.storage_path`.
    pub fn open(settings: Settings, balances: B) -> Result<Self, InstructionError> {
        let ledger = Arc::new(Ledger::open(&settings.storage_path)?);
        Ok(Self::new(InstructionService::new(ledger, balances, settings)))
    }

    /// Load layered settings, install logging and open the ledger.
    pub fn bootstrap(config_path: Option<&str>, balances: B) -> anyhow::Result<Self> {
        let settings = load_settings(config_path).context("loading settings")?;
        init_logging(&settings.log_filter)?;
        info!(storage = %settings.storage_path, legacy_keys = settings.accept_legacy_keys, "opening ledger");

        Ok(Self::open(settings, balances)?)
    }

    pub fn service(&self) -> &InstructionService<B> {
        &self.service
    }

    /// Deployment entry point. The optional argument is a JSON array of
    /// organizations to register.
    pub fn init(&self, identity: &dyn IdentityResolver, args: &[String]) -> Response {
        let result = self.register_initial(identity, args);

        match result {
            Ok(()) => Response::success(None),
            Err(e) => {
                warn!(error = %e, "init failed");
                Response::error(&e)
            }
        }
    }

    fn register_initial(&self, identity: &dyn IdentityResolver, args: &[String]) -> Result<(), InstructionError> {
        if args.len() > 1 {
            return Err(InstructionError::InvalidArguments(format!(
                "init takes at most 1 argument, got {}",
                args.len()
            )));
        }
        let organizations: Vec<Organization> = match args.first() {
            Some(raw) => serde_json::from_str(raw)?,
            None => vec![],
        };
        self.service.init(&identity.caller_organization()?, &organizations)
    }

    pub fn invoke(&self, identity: &dyn IdentityResolver, function: &str, args: &[String]) -> Response {
        info!(function, args = args.len(), "invoke");

        match self.dispatch(identity, function, args) {
            Ok(payload) => Response::success(payload),
            Err(e) => {
                warn!(function, status = e.status_code(), error = %e, "invocation rejected");
                Response::error(&e)
            }
        }
    }

    fn dispatch(
        &self,
        identity: &dyn IdentityResolver,
        function: &str,
        args: &[String],
    ) -> Result<Option<String>, InstructionError> {
        let legacy = LegacyKeys::from(self.service.settings().accept_legacy_keys);
        let service = &self.service;

        // arguments are validated before the caller is resolved
        match function {
            "receive" => {
                let submission = decode_submission(args, legacy)?;
                service.receive(&identity.caller_organization()?, submission)?;
                Ok(None)
            }
            "transfer" => {
                let submission = decode_submission(args, legacy)?;
                service.transfer(&identity.caller_organization()?, submission)?;
                Ok(None)
            }
            "status" => {
                let (key, rest) = decode_key_args(args, legacy, 1..=2)?;
                let status: Status = rest[0].parse()?;
                let detail = rest.get(1).map(String::as_str);
                service.set_status(&identity.caller_organization()?, &key, status, detail)?;
                Ok(None)
            }
            "sign" => {
                let (key, rest) = decode_key_args(args, legacy, 1..=1)?;
                service.sign(&identity.caller_organization()?, &key, &rest[0])?;
                Ok(None)
            }
            "rollback" => {
                let (key, rest) = decode_key_args(args, legacy, 0..=1)?;
                let detail = rest.first().map(String::as_str);
                service.rollback(&identity.caller_organization()?, &key, detail)?;
                Ok(None)
            }
            "updateDownloadFlags" => {
                let (key, rest) = decode_key_args(args, legacy, 1..=1)?;
                let party: Role = rest[0].parse()?;
                service.update_download_flags(&identity.caller_organization()?, &key, party)?;
                Ok(None)
            }
            "history" => {
                let (key, _) = decode_key_args(args, legacy, 0..=0)?;
                json(&service.history(&key)?)
            }
            "query" => {
                expect_args(args, 0)?;
                json(&service.query(&identity.caller_organization()?)?)
            }
            "queryByType" => {
                expect_args(args, 1)?;
                let status: Status = args[0].parse()?;
                json(&service.query_by_status(&identity.caller_organization()?, status)?)
            }
            "addBalances" => {
                expect_args(args, 1)?;
                let organizations: Vec<Organization> = serde_json::from_str(&args[0])?;
                service.add_balances(&identity.caller_organization()?, &organizations)?;
                Ok(None)
            }
            "removeBalances" => {
                expect_args(args, 1)?;
                let organizations: Vec<Organization> = serde_json::from_str(&args[0])?;
                service.remove_balances(&identity.caller_organization()?, &organizations)?;
                Ok(None)
            }
            "getBalances" => {
                expect_args(args, 0)?;
                json(&service.get_balances(&identity.caller_organization()?)?)
            }
            other => Err(InstructionError::UnknownFunction(other.to_string())),
        }
    }
}
