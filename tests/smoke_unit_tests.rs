//! Smoke Screen Unit tests for instruction settlement components
//!
//! These tests span the public API of the crate and exercise the small
//! building blocks in isolation from the lifecycle scenarios. They mostly
//! cover the happy path.

use chrono::Utc;
use instruction_settlement::{
    InstructionError, Response,
    codec::{Submission, create_composite_key, object_type_prefix},
    collaborators::{IdentityResolver, KnownOrganization},
    instruction::{Instruction, InstructionKey, InstructionValue},
    ledger::Ledger,
    logging::init_logging,
    settings::Settings,
    types::{Balance, Reason, Role, Status, TimeStamp},
    utils::{history_prefix, new_transaction_id},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Transaction ids are hex sha256 digests
    #[test]
    fn transaction_id_is_hex_digest() {
        let id = new_transaction_id("a.example.com");

        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Two organizations invoking at once still get distinct ids
    #[test]
    fn transaction_ids_differ_per_call() {
        let ids: Vec<String> = (0..16).map(|_| new_transaction_id("a.example.com")).collect();
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();

        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn history_prefix_is_fixed_width() {
        assert_eq!(history_prefix("").len(), history_prefix("a much longer ledger key").len());
    }
}

// TYPES MODULE TESTS
#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn timestamps_are_ordered() {
        let earlier = TimeStamp::<Utc>::new();
        let later = TimeStamp::<Utc>::new();

        assert!(earlier <= later);
    }

    #[test]
    fn role_counterpart_is_involutive() {
        for role in [Role::Transferer, Role::Receiver] {
            assert_eq!(role.counterpart().counterpart(), role);
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn agreed_statuses() {
        assert!(!Status::Initiated.is_agreed());
        assert!(!Status::Canceled.is_agreed());
        assert!(Status::Matched.is_agreed());
        assert!(Status::RollbackDone.is_agreed());
    }
}

// INSTRUCTION MODULE TESTS
#[cfg(test)]
mod instruction_tests {
    use super::*;

    fn key() -> InstructionKey {
        InstructionKey::fop(Balance::new("A", "1"), Balance::new("B", "2"))
            .set_security("RU000A0JVVB5")
            .set_quantity(500)
            .set_reference("ref")
            .set_instruction_date("2018-03-29")
            .set_trade_date("2018-03-29")
    }

    #[test]
    fn party_follows_role() {
        let instruction = Instruction::new(key(), InstructionValue::new(Role::Receiver, "F".into(), "T".into()));

        assert_eq!(instruction.party(Role::Transferer), &Balance::new("A", "1"));
        assert_eq!(instruction.party(Role::Receiver), &Balance::new("B", "2"));
        assert_eq!(instruction.value.deponent(Role::Receiver), "T");
        assert_eq!(instruction.status(), Status::Initiated);
    }

    #[test]
    fn address_lives_under_instruction_prefix() {
        let address = key().composite_key().unwrap();

        assert!(address.starts_with(&object_type_prefix("Instruction")));
        assert_eq!(address, create_composite_key("Instruction", &key().to_parts()).unwrap());
    }

    #[test]
    fn submission_builder() {
        let submission = Submission::new(key(), "F", "T")
            .set_member_instruction_id("m-1")
            .set_reason(Reason {
                document: "1".into(),
                ..Reason::default()
            });

        assert_eq!(submission.member_instruction_id, "m-1");
        assert!(!submission.reason.is_complete());
        assert!(submission.additional_information.is_none());
    }
}

// AMBIENT STACK TESTS
#[cfg(test)]
mod ambient_tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = Settings::default();

        assert_eq!(settings.depositary_code, "NDC000000000");
        assert!(!settings.accept_legacy_keys);
        assert!(settings.check_positions);
    }

    #[test]
    fn logging_initialises_once() {
        assert!(init_logging("info").is_ok());
        assert!(init_logging("debug").is_ok());
    }

    #[test]
    fn known_organization_resolves() {
        assert_eq!(KnownOrganization::new("a.example.com").caller_organization().unwrap(), "a.example.com");
        assert!(KnownOrganization::new("").caller_organization().is_err());
    }

    #[test]
    fn error_response_carries_status_code() {
        let response = Response::error(&InstructionError::NotFound);

        assert_eq!(response.status, 404);
        assert_eq!(response.message, "Instruction not found");
        assert!(!response.is_ok());
        assert!(Response::success(None).is_ok());
    }

    #[test]
    fn fresh_ledger_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = Ledger::open(dir.path().join("smoke.db"))?;

        assert!(ledger.events()?.is_empty());
        assert!(ledger.history("anything")?.is_empty());
        Ok(())
    }
}
