use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

use super::PaymentError;

static MSISDN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^254\d{9}$")
        .context("Failed to create MSISDN regex")
        .unwrap()
});

static CARD_NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{16}$")
        .context("Failed to create card number regex")
        .unwrap()
});

static CVV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{3,4}$")
        .context("Failed to create CVV regex")
        .unwrap()
});

static EXPIRY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0[1-9]|1[0-2])/(\d{2})$")
        .context("Failed to create expiry regex")
        .unwrap()
});

/// Rewrites local Kenyan numbers into the `254…` form M-Pesa expects.
/// Only the prefix is touched; anything else passes through.
pub fn normalize_phone(input: &str) -> String {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let compact = compact.trim_start_matches('+');

    if let Some(rest) = compact.strip_prefix('0') {
        format!("254{}", rest)
    } else if compact.len() == 9 && (compact.starts_with('7') || compact.starts_with('1')) {
        format!("254{}", compact)
    } else {
        compact.to_string()
    }
}

pub fn validate_phone(input: &str) -> Result<String, PaymentError> {
    if input.trim().is_empty() {
        return Err(PaymentError::ValidationError("Phone number is required".into()));
    }

    let normalized = normalize_phone(input);
    if !MSISDN_REGEX.is_match(&normalized) {
        return Err(PaymentError::ValidationError(format!(
            "Invalid phone number: {}",
            input.trim()
        )));
    }

    Ok(normalized)
}

/// Groups digits in fours for display; non-digits are dropped and input is
/// capped at 16 digits.
pub fn format_card_number(input: &str) -> String {
    let digits: Vec<char> = input.chars().filter(char::is_ascii_digit).take(16).collect();

    digits
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"1226"` → `"12/26"`, as typed into an expiry field.
pub fn format_expiry(input: &str) -> String {
    let digits: String = input.chars().filter(char::is_ascii_digit).take(4).collect();

    if digits.len() > 2 {
        format!("{}/{}", &digits[..2], &digits[2..])
    } else {
        digits
    }
}

pub fn card_digits(input: &str) -> String {
    input.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Validates a card and returns `(digits, month, year)`.
pub fn validate_card(number: &str, expiry: &str, cvv: &str) -> Result<(String, String, String), PaymentError> {
    let digits = card_digits(number);
    if !CARD_NUMBER_REGEX.is_match(&digits) {
        return Err(PaymentError::ValidationError("Card number must be 16 digits".into()));
    }

    let captures = EXPIRY_REGEX
        .captures(expiry.trim())
        .ok_or_else(|| PaymentError::ValidationError("Expiry must be MM/YY".into()))?;
    let month = captures[1].to_string();
    let year = captures[2].to_string();

    if !CVV_REGEX.is_match(cvv.trim()) {
        return Err(PaymentError::ValidationError("CVV must be 3 or 4 digits".into()));
    }

    Ok((digits, month, year))
}

pub fn validate_amount(amount: f64) -> Result<(), PaymentError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PaymentError::ValidationError(format!("Invalid amount: {}", amount)));
    }
    Ok(())
}

pub fn validate_item(item_id: &str) -> Result<(), PaymentError> {
    if item_id.trim().is_empty() {
        return Err(PaymentError::ValidationError("Item id is required".into()));
    }
    Ok(())
}
