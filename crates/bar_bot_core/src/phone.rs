//! crates/bar_bot_core/src/phone.rs
//!
//! Phone number handling for Kenyan mobile numbers: validating a payment phone
//! typed by a customer, converting to the payment provider's format, and
//! matching stored phones against webhook senders that may use a different
//! representation (local, national, E.164 or a SHA-256 hash of one of those).

use sha2::{Digest, Sha256};

const COUNTRY_CODE: &str = "254";

/// Keeps only ASCII digits.
pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// The last nine digits of a phone, i.e. the subscriber number without any
/// country code or trunk prefix. Shorter inputs are returned whole.
pub fn last_nine_digits(input: &str) -> String {
    let digits = digits_only(input);
    if digits.len() >= 9 {
        digits[digits.len() - 9..].to_string()
    } else {
        digits
    }
}

fn strip_separators(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect::<String>()
        .trim_start_matches('+')
        .to_string()
}

/// Validates a customer-typed payment phone and returns it in `+254XXXXXXXXX` form.
///
/// Accepted inputs: local `07XXXXXXXX` / `01XXXXXXXX`, bare national
/// `7XXXXXXXX` / `1XXXXXXXX` and full `254XXXXXXXXX`, with optional spaces,
/// dashes and a leading plus. The subscriber number must start with 7 or 1.
pub fn normalize_payment_phone(input: &str) -> Option<String> {
    let cleaned = strip_separators(input);
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let subscriber = match cleaned.len() {
        10 if cleaned.starts_with('0') => &cleaned[1..],
        9 => cleaned.as_str(),
        12 if cleaned.starts_with(COUNTRY_CODE) => &cleaned[3..],
        _ => return None,
    };

    if !(subscriber.starts_with('7') || subscriber.starts_with('1')) {
        return None;
    }

    Some(format!("+{COUNTRY_CODE}{subscriber}"))
}

/// Converts any stored phone into the bare national form the payment provider
/// expects (`2547XXXXXXXX`, no leading plus).
pub fn to_provider_format(phone: &str) -> String {
    let cleaned = strip_separators(phone);
    if let Some(rest) = cleaned.strip_prefix('0') {
        format!("{COUNTRY_CODE}{rest}")
    } else if cleaned.starts_with(COUNTRY_CODE) {
        cleaned
    } else {
        format!("{COUNTRY_CODE}{cleaned}")
    }
}

/// Whether two phones refer to the same subscriber: equal as given, or equal
/// on their last nine digits.
pub fn same_subscriber(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (a9, b9) = (last_nine_digits(a), last_nine_digits(b));
    a9.len() == 9 && a9 == b9
}

/// Every representation of `stored` that a provider might have hashed.
/// The list is ordered and free of duplicates.
pub fn hash_variants(stored: &str) -> Vec<String> {
    let compact: String = stored.chars().filter(|c| *c != ' ' && *c != '-').collect();
    let mut variants: Vec<String> = Vec::with_capacity(7);
    let mut push = |value: String| {
        if !value.is_empty() && !variants.contains(&value) {
            variants.push(value);
        }
    };

    push(compact.clone());
    push(format!("+{}", compact.trim_start_matches('+')));
    push(compact.trim_start_matches('+').to_string());

    let nine = last_nine_digits(&compact);
    if nine.len() == 9 {
        push(nine.clone());
        push(format!("0{nine}"));
        push(format!("{COUNTRY_CODE}{nine}"));
        push(format!("+{COUNTRY_CODE}{nine}"));
    }
    variants
}

/// Hex-encoded SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Whether any representation of `stored` hashes to `hashed`.
pub fn matches_hashed_phone(stored: &str, hashed: &str) -> bool {
    let hashed = hashed.trim();
    if hashed.is_empty() {
        return false;
    }
    hash_variants(stored)
        .iter()
        .any(|variant| sha256_hex(variant).eq_ignore_ascii_case(hashed))
}

/// Masks all but the last four digits, for logs.
pub fn mask(phone: &str) -> String {
    let digits = digits_only(phone);
    if digits.len() <= 4 {
        return "***".to_string();
    }
    format!("***{}", &digits[digits.len() - 4..])
}
