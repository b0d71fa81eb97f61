use sha2::{Digest, Sha256};
use std::fmt;

const MAX_SEGMENT_LEN: usize = 1024;

/// An opaque segment filter expression, e.g. `browserCode==ff;visitorType==new`.
///
/// The archive stores one set of numbers per distinct segment, keyed by
/// [`Segment::hash`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    expression: String,
}

/// Returned when a segment expression is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSegment(pub &'static str);

impl fmt::Display for InvalidSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid segment: {}", self.0)
    }
}

impl std::error::Error for InvalidSegment {}

impl Segment {
    /// Parse an optional `segment` parameter. Blank means "all visits".
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>, InvalidSegment> {
        let Some(expression) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        if expression.len() > MAX_SEGMENT_LEN {
            return Err(InvalidSegment("must be at most 1024 characters"));
        }
        if !expression.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err(InvalidSegment("may only contain printable ASCII characters"));
        }
        Ok(Some(Self {
            expression: expression.to_string(),
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Lowercase hex SHA-256 of the expression.
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.expression.as_bytes()))
    }
}

/// Archive key for an optional segment; the empty string means no segment.
pub fn segment_key(segment: Option<&Segment>) -> String {
    segment.map_or_else(String::new, Segment::hash)
}
