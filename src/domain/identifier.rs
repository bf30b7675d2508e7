//! Production codes that drive a reprocessing run.
//!
//! A code is one of the accepted leading letters followed by exactly
//! seven ASCII digits (e.g. `Q1234567`). Codes are normalized to
//! uppercase before any step touches an external system.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::outcome::{StepDetail, StepKind, StepOutcome};
use crate::core::StepError;

/// Leading letters accepted for a production code
pub const ALLOWED_PREFIXES: [char; 2] = ['Q', 'R'];

/// Number of digits that must follow the leading letter
pub const DIGIT_COUNT: usize = 7;

/// A validated, uppercase production code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Parse and normalize a raw code
    pub fn parse(raw: &str) -> Result<Self, StepError> {
        let normalized = raw.to_uppercase();

        if !Self::matches_grammar(&normalized) {
            return Err(StepError::InvalidIdentifier {
                raw: raw.to_string(),
            });
        }

        Ok(Self(normalized))
    }

    fn matches_grammar(candidate: &str) -> bool {
        let mut chars = candidate.chars();

        let Some(first) = chars.next() else {
            return false;
        };
        if !ALLOWED_PREFIXES.contains(&first) {
            return false;
        }

        let digits: Vec<char> = chars.collect();
        digits.len() == DIGIT_COUNT && digits.iter().all(|c| c.is_ascii_digit())
    }

    /// The normalized code
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the document this code refers to (`<CODE>.xml`)
    pub fn filename(&self) -> String {
        format!("{}.xml", self.0)
    }

    /// Outcome recorded when validation succeeds
    pub fn outcome(&self) -> StepOutcome {
        StepOutcome::ok(
            StepKind::Validate,
            format!("Code \"{}\" validated", self.0),
        )
        .with_detail(StepDetail::Validated {
            code: self.0.clone(),
        })
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = StepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

/// Validate a raw code (pipeline step 1)
pub fn validate(raw: &str) -> Result<Identifier, StepError> {
    Identifier::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;

    #[test]
    fn test_accepts_both_prefixes() {
        assert_eq!(validate("Q1234567").unwrap().as_str(), "Q1234567");
        assert_eq!(validate("R7654321").unwrap().as_str(), "R7654321");
    }

    #[test]
    fn test_normalizes_to_uppercase() {
        let id = validate("q0000001").unwrap();
        assert_eq!(id.as_str(), "Q0000001");
        assert_eq!(id.filename(), "Q0000001.xml");
    }

    #[test]
    fn test_rejects_bad_grammar() {
        let bad = [
            "",
            "Z1234567",
            "Q123456",
            "Q12345678",
            "QQ234567",
            "Q12345a7",
            "Q１234567",
            "../Q1234567",
            "Q1234567.xml",
            "Q 1234567",
        ];

        for raw in bad {
            let err = validate(raw).unwrap_err();
            assert_eq!(err.kind(), FailureKind::Validation, "accepted {raw:?}");
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Identifier = serde_json::from_str("\"r1111111\"").unwrap();
        assert_eq!(ok.as_str(), "R1111111");

        assert!(serde_json::from_str::<Identifier>("\"X1111111\"").is_err());
    }
}
