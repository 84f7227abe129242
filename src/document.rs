//! Depository settlement orders rendered for each leg at match time
//!
//! Free-of-payment instructions produce an `MF010` order, delivery versus
//! payment instructions an `MF170` order.
use chrono::{Days, NaiveTime};

use crate::codec::parse_date;
use crate::error::InstructionError;
use crate::instruction::{Instruction, Payment, Settlement};
use crate::types::Role;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// free of payment orders stay open for thirty days
const FOP_VALIDITY_DAYS: u64 = 29;

fn order_code(settlement: &Settlement, leg: Role) -> &'static str {
    match (settlement, leg) {
        (Settlement::Fop, Role::Transferer) => "16",
        (Settlement::Fop, Role::Receiver) => "16/1",
        (Settlement::Dvp(_), Role::Transferer) => "16/2",
        (Settlement::Dvp(_), Role::Receiver) => "16/3",
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

struct Document {
    out: String,
}

impl Document {
    fn new() -> Self {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"Windows-1251\"?>\n");
        out.push_str("<Batch>\n<Documents_amount>1</Documents_amount>\n<Document DOC_ID=\"1\" version=\"7\">\n");
        Self { out }
    }

    fn open(&mut self, name: &str) {
        self.out.push_str(&format!("<{name}>\n"));
    }

    fn close(&mut self, name: &str) {
        self.out.push_str(&format!("</{name}>\n"));
    }

    fn field(&mut self, name: &str, value: &str) {
        self.out.push_str(&format!("<{name}>{}</{name}>\n", escape(value)));
    }

    fn securities(&mut self, instruction: &Instruction) {
        self.open("securities");
        self.open("security");
        self.field("security_c", &instruction.key.security);
        self.field("security_q", &instruction.key.quantity);
        self.close("security");
        self.close("securities");
    }

    fn finish(mut self) -> String {
        self.out.push_str("</Document>\n</Batch>");
        self.out
    }
}

/// Render the settlement order of `leg` for a matched instruction.
pub fn render(instruction: &Instruction, leg: Role, depositary: &str) -> Result<String, InstructionError> {
    let key = &instruction.key;
    let value = &instruction.value;

    let date = parse_date(&key.instruction_date)?;
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    let last_day = match key.settlement {
        Settlement::Fop => date
            .checked_add_days(Days::new(FOP_VALIDITY_DAYS))
            .ok_or_else(|| InstructionError::InvalidDate(key.instruction_date.clone()))?,
        Settlement::Dvp(_) => date,
    };
    let expiry = last_day.and_time(end_of_day);

    let mut doc = Document::new();
    doc.open("ORDER_HEADER");
    doc.field("deposit_c", depositary);
    doc.field("contrag_c", value.deponent(leg));
    doc.field("contr_d_id", &value.leg(leg).member_instruction_id);
    doc.field("createdate", &key.instruction_date);
    doc.field("order_t_id", order_code(&key.settlement, leg));
    doc.field("execute_dt", &date.and_time(NaiveTime::MIN).format(DATETIME_FORMAT).to_string());
    doc.field("expirat_dt", &expiry.format(DATETIME_FORMAT).to_string());
    doc.close("ORDER_HEADER");

    match &key.settlement {
        Settlement::Fop => free_of_payment(&mut doc, instruction, leg),
        Settlement::Dvp(payment) => versus_payment(&mut doc, instruction, payment, leg),
    }

    Ok(doc.finish())
}

fn free_of_payment(doc: &mut Document, instruction: &Instruction, leg: Role) {
    let key = &instruction.key;
    let value = &instruction.value;

    doc.open("MF010");
    doc.field("dep_acc_c", &key.transferer.account);
    doc.field("sec_c", &key.transferer.division);
    doc.field("deponent_c", &value.deponent_from);
    doc.field("corr_acc_c", &key.receiver.account);
    doc.field("corr_sec_c", &key.receiver.division);
    doc.field("corr_code", &value.deponent_to);

    let reason = &value.leg(leg).reason;
    if reason.is_complete() {
        doc.field("based_on", &reason.description);
        doc.field("based_numb", &reason.document);
        doc.field("based_date", &reason.document_date);
    }

    doc.securities(instruction);
    doc.field("deal_reference", &key.reference.to_uppercase());
    doc.field("date_deal", &key.trade_date);
    doc.close("MF010");
}

fn versus_payment(doc: &mut Document, instruction: &Instruction, payment: &Payment, leg: Role) {
    let key = &instruction.key;
    let value = &instruction.value;

    doc.open("MF170");
    doc.field("dep_acc_c", &key.transferer.account);
    doc.field("sec_c", &key.transferer.division);
    doc.field("corr_acc_c", &key.receiver.account);
    doc.field("corr_sec_c", &key.receiver.division);
    doc.field("deal_num", &key.reference.to_uppercase());
    doc.field("deal_date", &key.trade_date);
    doc.field("con_code", value.deponent(leg.counterpart()));
    // money flows from the receiver of securities to the transferer
    doc.field("sen_acc", &payment.receiver_requisites.account);
    doc.field("sen_bic", &payment.receiver_requisites.bic);
    doc.field("rec_acc", &payment.transferer_requisites.account);
    doc.field("rec_bic", &payment.transferer_requisites.bic);
    doc.field("pay_sum", &payment.payment_amount);
    doc.field("pay_curr", &payment.payment_currency);

    let reason = &value.leg(leg).reason;
    if !reason.description.is_empty() {
        doc.field("based_on", &reason.description);
    }
    doc.field("block_securities", "N");
    doc.field(
        "f_instruction",
        match leg {
            Role::Transferer => "N",
            Role::Receiver => "Y",
        },
    );
    doc.field("auto_borr", "N");

    if leg == Role::Receiver {
        if let Some(info) = value
            .additional_information
            .as_ref()
            .filter(|info| !info.description.is_empty())
        {
            doc.field("add_info", &format!("/NZP {}", info.description));
        }
    }

    doc.securities(instruction);
    doc.close("MF170");
}
