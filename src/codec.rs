//! Composite ledger keys and invocation argument decoding
//!
//! Instruction keys are laid out as an ordered list of strings:
//!
//! ```text
//! 0 transferer account   5 quantity           10 transferer payment account
//! 1 transferer division  6 reference          11 transferer bic
//! 2 receiver account     7 instruction date   12 receiver payment account
//! 3 receiver division    8 trade date         13 receiver bic
//! 4 security             9 type (fop|dvp)     14 payment amount
//!                                             15 payment currency
//! ```
//!
//! Older clients omit the type field entirely. Those nine-part keys are only
//! accepted through [`KeyLayout::Legacy`] and always re-encode to the typed
//! FOP address.
use std::ops::RangeInclusive;

use chrono::NaiveDate;

use crate::error::InstructionError;
use crate::instruction::{InstructionKey, Payment, Settlement};
use crate::types::{Balance, Reason, Requisites};

pub const INSTRUCTION_INDEX: &str = "Instruction";

pub const LEGACY_KEY_LENGTH: usize = 9;
pub const FOP_KEY_LENGTH: usize = 10;
pub const DVP_KEY_LENGTH: usize = 16;

const SEPARATOR: char = '\u{0}';

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a canonical `YYYY-MM-DD` date. Signed or five-digit years and
/// unpadded fields are rejected.
pub fn parse_date(value: &str) -> Result<NaiveDate, InstructionError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .filter(|date| value.len() == 10 && date.format(DATE_FORMAT).to_string() == value)
        .ok_or_else(|| InstructionError::InvalidDate(value.to_string()))
}

/// Build a ledger key of the form `\0objectType\0part\0part\0`.
pub fn create_composite_key<S: AsRef<str>>(
    object_type: &str,
    attributes: &[S],
) -> Result<String, InstructionError> {
    check_key_part(object_type)?;

    let mut key = String::with_capacity(
        2 + object_type.len() + attributes.iter().map(|a| a.as_ref().len() + 1).sum::<usize>(),
    );
    key.push(SEPARATOR);
    key.push_str(object_type);
    key.push(SEPARATOR);
    for attribute in attributes {
        let attribute = attribute.as_ref();
        check_key_part(attribute)?;
        key.push_str(attribute);
        key.push(SEPARATOR);
    }

    Ok(key)
}

/// Inverse of [`create_composite_key`].
pub fn split_composite_key(key: &str) -> Result<(String, Vec<String>), InstructionError> {
    let body = key
        .strip_prefix(SEPARATOR)
        .and_then(|rest| rest.strip_suffix(SEPARATOR))
        .ok_or_else(|| InstructionError::Corrupt(format!("not a composite key: {key:?}")))?;

    let mut parts = body.split(SEPARATOR).map(str::to_string);
    let object_type = parts
        .next()
        .ok_or_else(|| InstructionError::Corrupt(format!("not a composite key: {key:?}")))?;

    Ok((object_type, parts.collect()))
}

/// Prefix matching every composite key of `object_type`.
pub fn object_type_prefix(object_type: &str) -> String {
    format!("{SEPARATOR}{object_type}{SEPARATOR}")
}

fn check_key_part(part: &str) -> Result<(), InstructionError> {
    if part.contains(SEPARATOR) {
        return Err(InstructionError::InvalidKeyPart(part.escape_debug().to_string()));
    }
    Ok(())
}

/// How the leading arguments of an invocation were laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// Explicit `fop`/`dvp` type at position 9.
    Typed,
    /// Nine parts without a type field, settled free of payment.
    Legacy,
}

/// Whether the decoder may fall back to [`KeyLayout::Legacy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegacyKeys {
    Accept,
    #[default]
    Reject,
}

impl From<bool> for LegacyKeys {
    fn from(accept: bool) -> Self {
        if accept {
            LegacyKeys::Accept
        } else {
            LegacyKeys::Reject
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub key: InstructionKey,
    pub layout: KeyLayout,
    /// Number of leading parts the key occupied.
    pub length: usize,
}

impl InstructionKey {
    /// Key parts in canonical typed order.
    pub fn to_parts(&self) -> Vec<&str> {
        let mut parts = vec![
            self.transferer.account.as_str(),
            self.transferer.division.as_str(),
            self.receiver.account.as_str(),
            self.receiver.division.as_str(),
            self.security.as_str(),
            self.quantity.as_str(),
            self.reference.as_str(),
            self.instruction_date.as_str(),
            self.trade_date.as_str(),
            self.settlement.type_literal(),
        ];

        if let Settlement::Dvp(payment) = &self.settlement {
            parts.extend([
                payment.transferer_requisites.account.as_str(),
                payment.transferer_requisites.bic.as_str(),
                payment.receiver_requisites.account.as_str(),
                payment.receiver_requisites.bic.as_str(),
                payment.payment_amount.as_str(),
                payment.payment_currency.as_str(),
            ]);
        }

        parts
    }

    /// Decode the leading key parts of `parts`, returning how many were used.
    pub fn from_parts<S: AsRef<str>>(
        parts: &[S],
        legacy: LegacyKeys,
    ) -> Result<DecodedKey, InstructionError> {
        if parts.len() < LEGACY_KEY_LENGTH {
            return Err(InstructionError::InvalidArguments(format!(
                "instruction key needs at least {LEGACY_KEY_LENGTH} parts, got {}",
                parts.len()
            )));
        }
        let part = |i: usize| parts[i].as_ref().to_string();

        let type_field = parts.get(9).map(|p| p.as_ref());
        let (settlement, layout, length) = match type_field {
            Some("fop") => (Settlement::Fop, KeyLayout::Typed, FOP_KEY_LENGTH),
            Some("dvp") => {
                if parts.len() < DVP_KEY_LENGTH {
                    return Err(InstructionError::InvalidArguments(format!(
                        "\"dvp\" instruction key needs {DVP_KEY_LENGTH} parts, got {}",
                        parts.len()
                    )));
                }
                let amount = part(14);
                if !amount.parse::<f64>().is_ok_and(f64::is_finite) {
                    return Err(InstructionError::InvalidPaymentAmount(amount));
                }
                let payment = Payment {
                    transferer_requisites: Requisites {
                        account: part(10),
                        bic: part(11),
                    },
                    receiver_requisites: Requisites {
                        account: part(12),
                        bic: part(13),
                    },
                    payment_amount: amount,
                    payment_currency: part(15),
                };
                (Settlement::Dvp(payment), KeyLayout::Typed, DVP_KEY_LENGTH)
            }
            _ if legacy == LegacyKeys::Accept => {
                (Settlement::Fop, KeyLayout::Legacy, LEGACY_KEY_LENGTH)
            }
            other => {
                return Err(InstructionError::InvalidType(
                    other.unwrap_or_default().to_string(),
                ));
            }
        };

        let key = InstructionKey {
            transferer: Balance {
                account: part(0),
                division: part(1),
            },
            receiver: Balance {
                account: part(2),
                division: part(3),
            },
            security: part(4),
            quantity: part(5),
            reference: part(6),
            instruction_date: part(7),
            trade_date: part(8),
            settlement,
        };
        key.validate()?;

        Ok(DecodedKey {
            key,
            layout,
            length,
        })
    }

    /// Field checks every submitted key must pass before anything is written.
    pub fn validate(&self) -> Result<(), InstructionError> {
        if self.quantity.parse::<u64>().is_err() {
            return Err(InstructionError::InvalidQuantity(self.quantity.clone()));
        }
        parse_date(&self.instruction_date)?;
        parse_date(&self.trade_date)?;
        Ok(())
    }

    /// Ledger address of the instruction.
    pub fn composite_key(&self) -> Result<String, InstructionError> {
        create_composite_key(INSTRUCTION_INDEX, &self.to_parts())
    }

    /// Decode a stored ledger address. Stored keys are always typed.
    pub fn from_composite_key(key: &str) -> Result<Self, InstructionError> {
        let (object_type, parts) = split_composite_key(key)?;
        if object_type != INSTRUCTION_INDEX {
            return Err(InstructionError::Corrupt(format!(
                "expected an {INSTRUCTION_INDEX} key, got {object_type}"
            )));
        }

        let decoded = Self::from_parts(&parts, LegacyKeys::Reject)?;
        if decoded.length != parts.len() {
            return Err(InstructionError::Corrupt(format!(
                "instruction key has {} trailing parts",
                parts.len() - decoded.length
            )));
        }
        Ok(decoded.key)
    }
}

/// Decode an instruction key from invocation arguments and check the number
/// of arguments that follow it. Returns the key and the trailing arguments.
pub fn decode_key_args<'a>(
    args: &'a [String],
    legacy: LegacyKeys,
    trailing: RangeInclusive<usize>,
) -> Result<(InstructionKey, &'a [String]), InstructionError> {
    let mut decoded = InstructionKey::from_parts(args, legacy)?;
    let rest = &args[decoded.length..];

    if !trailing.contains(&rest.len()) {
        return Err(InstructionError::InvalidArguments(format!(
            "expected {} to {} arguments after the {} key, got {}",
            trailing.start(),
            trailing.end(),
            decoded.key.settlement.type_literal(),
            rest.len()
        )));
    }

    decoded.key.reference = decoded.key.reference.to_uppercase();
    Ok((decoded.key, rest))
}

/// Payload of a `receive` or `transfer` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub key: InstructionKey,
    pub deponent_from: String,
    pub deponent_to: String,
    pub member_instruction_id: String,
    pub reason: Reason,
    pub additional_information: Option<Reason>,
}

impl Submission {
    pub fn new(key: InstructionKey, deponent_from: &str, deponent_to: &str) -> Self {
        Self {
            key,
            deponent_from: deponent_from.to_string(),
            deponent_to: deponent_to.to_string(),
            member_instruction_id: String::new(),
            reason: Reason::default(),
            additional_information: None,
        }
    }
    pub fn set_member_instruction_id(mut self, id: &str) -> Self {
        self.member_instruction_id = id.to_string();
        self
    }
    pub fn set_reason(mut self, reason: Reason) -> Self {
        self.reason = reason;
        self
    }
    pub fn set_additional_information(mut self, info: Reason) -> Self {
        self.additional_information = Some(info);
        self
    }
}

/// `key.. deponentFrom deponentTo memberInstructionId reason [additionalInformation]`
///
/// The additional information argument is only accepted for DVP.
pub fn decode_submission(
    args: &[String],
    legacy: LegacyKeys,
) -> Result<Submission, InstructionError> {
    let (key, rest) = decode_key_args(args, legacy, 4..=5)?;

    if rest.len() == 5 && key.payment().is_none() {
        return Err(InstructionError::InvalidArguments(
            "additional information is only accepted for dvp instructions".into(),
        ));
    }

    let reason: Reason = serde_json::from_str(&rest[3])?;
    let additional_information = rest
        .get(4)
        .map(|raw| serde_json::from_str::<Reason>(raw))
        .transpose()?;

    Ok(Submission {
        key,
        deponent_from: rest[0].clone(),
        deponent_to: rest[1].clone(),
        member_instruction_id: rest[2].clone(),
        reason,
        additional_information,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    const FOP: [&str; 10] = [
        "MFONISSUEACC",
        "19000000000000000",
        "RBIOWNER0ACC",
        "00000000000000000",
        "RU000ABC0001",
        "123",
        "ref-23",
        "2017-02-28",
        "2017-02-28",
        "fop",
    ];

    const TRAILING: [&str; 4] = [
        "DE000DB7HWY7",
        "CA9861913023",
        "memberInstructionId",
        "{\"json_reason\":\"any json\"}",
    ];

    #[test]
    fn composite_key_roundtrip() {
        let key = create_composite_key("Instruction", &["a", "b", ""]).unwrap();
        assert_eq!(key, "\u{0}Instruction\u{0}a\u{0}b\u{0}\u{0}");

        let (object_type, parts) = split_composite_key(&key).unwrap();
        assert_eq!(object_type, "Instruction");
        assert_eq!(parts, vec!["a", "b", ""]);
    }

    #[test]
    fn composite_key_rejects_separator() {
        let err = create_composite_key("Instruction", &["a\u{0}b"]).unwrap_err();
        assert!(matches!(err, InstructionError::InvalidKeyPart(_)));
    }

    #[test]
    fn decodes_fop_submission() {
        let submission =
            decode_submission(&args(&[&FOP[..], &TRAILING[..]].concat()), LegacyKeys::Reject)
                .unwrap();

        assert_eq!(submission.key.settlement, Settlement::Fop);
        assert_eq!(submission.key.transferer.account, "MFONISSUEACC");
        assert_eq!(submission.key.receiver.division, "00000000000000000");
        assert_eq!(submission.key.reference, "REF-23");
        assert_eq!(submission.deponent_from, "DE000DB7HWY7");
        assert_eq!(submission.member_instruction_id, "memberInstructionId");
        assert!(submission.reason.is_empty());
    }

    #[test]
    fn decodes_dvp_submission() {
        let mut parts = args(&FOP);
        parts[9] = "dvp".into();
        parts.extend(args(&[
            "40701810000000001000",
            "f044525505op",
            "40701810000000001001",
            "f044525505oq",
            "30000000",
            "RUB",
        ]));
        parts.extend(args(&TRAILING));
        parts.push(r#"{"description": "Additional info."}"#.into());

        let submission = decode_submission(&parts, LegacyKeys::Reject).unwrap();
        let payment = submission.key.payment().unwrap();

        assert_eq!(payment.transferer_requisites.bic, "f044525505op");
        assert_eq!(payment.receiver_requisites.account, "40701810000000001001");
        assert_eq!(payment.payment_amount, "30000000");
        assert_eq!(payment.payment_currency, "RUB");
        assert_eq!(
            submission.additional_information.unwrap().description,
            "Additional info."
        );
    }

    #[test]
    fn legacy_layout_requires_opt_in() {
        let legacy = args(&[&FOP[..9], &TRAILING[..]].concat());

        let err = decode_submission(&legacy, LegacyKeys::Reject).unwrap_err();
        assert!(matches!(err, InstructionError::InvalidType(_)));

        let decoded = InstructionKey::from_parts(&legacy, LegacyKeys::Accept).unwrap();
        assert_eq!(decoded.layout, KeyLayout::Legacy);
        assert_eq!(decoded.length, LEGACY_KEY_LENGTH);
        assert_eq!(decoded.key.settlement, Settlement::Fop);

        let submission = decode_submission(&legacy, LegacyKeys::Accept).unwrap();
        assert_eq!(submission.deponent_to, "CA9861913023");
    }

    #[test]
    fn rejects_bad_numeric_fields() {
        let mut parts = args(&[&FOP[..], &TRAILING[..]].concat());
        parts[5] = "12x".into();
        assert!(matches!(
            decode_submission(&parts, LegacyKeys::Reject),
            Err(InstructionError::InvalidQuantity(_))
        ));

        let mut parts = args(&FOP);
        parts[9] = "dvp".into();
        parts.extend(args(&["a", "b", "c", "d", "lots", "RUB"]));
        parts.extend(args(&TRAILING));
        assert!(matches!(
            decode_submission(&parts, LegacyKeys::Reject),
            Err(InstructionError::InvalidPaymentAmount(_))
        ));
    }

    #[test]
    fn rejects_non_canonical_dates() {
        for date in ["2017-2-31", "2017-02-31", "+262143-12-20", "02017-1-01", ""] {
            let mut parts = args(&[&FOP[..], &TRAILING[..]].concat());
            parts[7] = date.into();
            assert!(
                matches!(decode_submission(&parts, LegacyKeys::Reject), Err(InstructionError::InvalidDate(_))),
                "{date:?} accepted"
            );
        }

        let mut parts = args(&[&FOP[..], &TRAILING[..]].concat());
        parts[8] = "28.02.2017".into();
        assert!(matches!(
            decode_submission(&parts, LegacyKeys::Reject),
            Err(InstructionError::InvalidDate(_))
        ));

        assert_eq!(parse_date("2017-02-28").unwrap(), NaiveDate::from_ymd_opt(2017, 2, 28).unwrap());
    }

    #[test]
    fn rejects_wrong_trailing_count() {
        let parts = args(&[&FOP[..], &TRAILING[..3]].concat());
        assert!(matches!(
            decode_submission(&parts, LegacyKeys::Reject),
            Err(InstructionError::InvalidArguments(_))
        ));

        // additional information is a dvp-only argument
        let mut parts = args(&[&FOP[..], &TRAILING[..]].concat());
        parts.push("{}".into());
        assert!(matches!(
            decode_submission(&parts, LegacyKeys::Reject),
            Err(InstructionError::InvalidArguments(_))
        ));
    }

    #[test]
    fn stored_key_roundtrip() {
        let decoded = InstructionKey::from_parts(&FOP, LegacyKeys::Reject).unwrap();
        let address = decoded.key.composite_key().unwrap();

        assert_eq!(InstructionKey::from_composite_key(&address).unwrap(), decoded.key);
    }
}
