//! Starting reference parsing.
//!
//! A reference is a card link such as
//! `https://rx.example.com/Client/#/card/4e585572-f5a6-4c0d-9c0b-6f6f8d8e6a11/1001`:
//! the id is the trailing run of digits, the discriminator is the 36-character
//! UUID following `card/`. Both must be present.

use crate::models::StartRef;
use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d+)$").expect("Invalid regex"));
static DISCRIMINATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"card/([0-9a-fA-F\-]{36})").expect("Invalid regex"));

fn capture<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    re.captures(input).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Extract `(id, discriminator)` from a card link.
pub fn parse_reference(input: &str) -> Result<StartRef> {
    let input = input.trim();

    let id_text = capture(&ID_RE, input)
        .ok_or_else(|| Error::InvalidInput(format!("No trailing /<id> in '{}'", input)))?;
    let discriminator_text = capture(&DISCRIMINATOR_RE, input).ok_or_else(|| {
        Error::InvalidInput(format!("No card/<discriminator> in '{}'", input))
    })?;

    let id: i64 = id_text
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Id out of range: {}", id_text)))?;
    let discriminator = Uuid::parse_str(discriminator_text).map_err(|e| {
        Error::InvalidInput(format!("Bad discriminator {}: {}", discriminator_text, e))
    })?;

    Ok(StartRef::new(id, discriminator))
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: &str = "4e585572-f5a6-4c0d-9c0b-6f6f8d8e6a11";

    #[test]
    fn test_patterns_compile() {
        assert!(ID_RE.is_match("/card/x/7"));
        assert!(DISCRIMINATOR_RE.is_match(&format!("card/{D}")));
    }

    #[test]
    fn test_parse_card_link() {
        let start =
            parse_reference(&format!("https://rx.example.com/Client/#/card/{D}/1001")).unwrap();
        assert_eq!(start.id, 1001);
        assert_eq!(start.discriminator.to_string(), D);
    }

    #[test]
    fn test_parse_trims_whitespace_and_accepts_uppercase() {
        let link = format!("  http://rx/card/{}/42 \n", D.to_uppercase());
        let start = parse_reference(&link).unwrap();
        assert_eq!(start.id, 42);
        assert_eq!(start.discriminator.to_string(), D);
    }

    #[test]
    fn test_id_must_be_trailing() {
        let err = parse_reference(&format!("https://rx/card/{D}/1001/history")).unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_discriminator_required() {
        let err = parse_reference("https://rx/Client/#/task/1001").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("discriminator"));
    }

    #[test]
    fn test_malformed_discriminator_is_rejected() {
        let dashes = "-".repeat(36);
        assert!(parse_reference(&format!("https://rx/card/{dashes}/1")).is_err());
    }

    #[test]
    fn test_id_overflow_is_rejected() {
        let err = parse_reference(&format!("https://rx/card/{D}/99999999999999999999")).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
