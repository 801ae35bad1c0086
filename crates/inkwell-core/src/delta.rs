//! Prefix/suffix delta codec for document content.
//!
//! Edits in an editor are localized around the cursor, so two consecutive
//! versions almost always share a long common prefix and suffix. A delta
//! keeps those two lengths and the literal middle segment of the new text,
//! which is O(n) to compute and replay.
//!
//! ```text
//! old:  [ prefix ][ removed ][ suffix ]
//! new:  [ prefix ][ inserted  ][ suffix ]
//! ```
//!
//! All lengths are byte lengths that land on UTF-8 character boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded difference between two content versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeltaRecord {
    /// The new content stored verbatim
    Full { content: String },
    /// Retained prefix/suffix of the base plus the inserted middle segment
    Delta {
        /// Length of the content this delta must be applied to
        base_len: usize,
        prefix_len: usize,
        suffix_len: usize,
        inserted: String,
    },
}

impl DeltaRecord {
    /// Length of the literal segment carried by this record
    pub fn added_len(&self) -> usize {
        match self {
            Self::Full { content } => content.len(),
            Self::Delta { inserted, .. } => inserted.len(),
        }
    }

    pub const fn is_delta(&self) -> bool {
        matches!(self, Self::Delta { .. })
    }
}

/// Errors replaying a delta against a base it does not belong to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("base length mismatch: delta expects {expected} bytes, got {actual}")]
    BaseMismatch { expected: usize, actual: usize },

    #[error("retained range {prefix_len}+{suffix_len} exceeds base length {base_len}")]
    OutOfRange {
        prefix_len: usize,
        suffix_len: usize,
        base_len: usize,
    },

    #[error("offset {0} is not on a character boundary")]
    NotCharBoundary(usize),
}

/// Compute the record that turns `old` into `new`.
///
/// Falls back to [`DeltaRecord::Full`] when the versions share nothing or when
/// the changed segment is at least as large as what the delta would retain.
pub fn calculate_delta(old: &str, new: &str) -> DeltaRecord {
    let prefix_len = common_prefix_len(old, new);
    // Suffix is measured on the remainders so it can never overlap the prefix.
    let suffix_len = common_suffix_len(&old[prefix_len..], &new[prefix_len..]);
    let inserted = &new[prefix_len..new.len() - suffix_len];
    let retained = prefix_len + suffix_len;

    if retained == 0 || inserted.len() >= retained {
        return DeltaRecord::Full {
            content: new.to_string(),
        };
    }

    DeltaRecord::Delta {
        base_len: old.len(),
        prefix_len,
        suffix_len,
        inserted: inserted.to_string(),
    }
}

/// Rebuild the newer content from `old` and a record produced by
/// [`calculate_delta`] for the same `old`.
pub fn apply_delta(old: &str, delta: &DeltaRecord) -> Result<String, DeltaError> {
    match delta {
        DeltaRecord::Full { content } => Ok(content.clone()),
        DeltaRecord::Delta {
            base_len,
            prefix_len,
            suffix_len,
            inserted,
        } => {
            if old.len() != *base_len {
                return Err(DeltaError::BaseMismatch {
                    expected: *base_len,
                    actual: old.len(),
                });
            }
            if prefix_len + suffix_len > *base_len {
                return Err(DeltaError::OutOfRange {
                    prefix_len: *prefix_len,
                    suffix_len: *suffix_len,
                    base_len: *base_len,
                });
            }

            let suffix_start = base_len - suffix_len;
            for offset in [*prefix_len, suffix_start] {
                if !old.is_char_boundary(offset) {
                    return Err(DeltaError::NotCharBoundary(offset));
                }
            }

            let mut out = String::with_capacity(prefix_len + inserted.len() + suffix_len);
            out.push_str(&old[..*prefix_len]);
            out.push_str(inserted);
            out.push_str(&old[suffix_start..]);
            Ok(out)
        }
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.len_utf8())
        .sum()
}

fn common_suffix_len(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.len_utf8())
        .sum()
}
