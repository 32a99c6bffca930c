//! Human-readable transaction codes: `TRX-YYYYMMDD-XXXXXXXX`.

use chrono::{DateTime, Utc};

use rxledger_core::TransactionId;

const PREFIX: &str = "TRX";

/// Code for a transaction created at `at`: the UTC date plus the last eight
/// hex digits of the (random tail of the) transaction id, uppercased.
///
/// Uniqueness is enforced by the store; on collision the engine retries with
/// a fresh id.
pub fn transaction_code(id: TransactionId, at: DateTime<Utc>) -> String {
    let hex = id.as_uuid().simple().to_string().to_ascii_uppercase();
    let tail = &hex[hex.len() - 8..];
    format!("{PREFIX}-{}-{tail}", at.format("%Y%m%d"))
}

pub fn is_transaction_code(code: &str) -> bool {
    let mut parts = code.split('-');
    let (Some(prefix), Some(date), Some(tail), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    prefix == PREFIX
        && date.len() == 8
        && date.bytes().all(|b| b.is_ascii_digit())
        && tail.len() == 8
        && tail
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn code_has_date_and_hex_tail() {
        let at = Utc.with_ymd_and_hms(2026, 2, 3, 10, 0, 0).unwrap();
        let code = transaction_code(TransactionId::new(), at);
        assert!(code.starts_with("TRX-20260203-"), "{code}");
        assert_eq!(code.len(), "TRX-20260203-".len() + 8);
        assert!(is_transaction_code(&code));
    }

    #[test]
    fn rejects_foreign_formats() {
        assert!(!is_transaction_code("TRX-2026-ABCDEF12"));
        assert!(!is_transaction_code("INV-20260203-ABCDEF12"));
        assert!(!is_transaction_code("TRX-20260203-abcdef12"));
        assert!(!is_transaction_code("TRX-20260203-ABCDEF12-1"));
    }
}
