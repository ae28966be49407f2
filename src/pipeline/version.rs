// src/pipeline/version.rs

//! Content fingerprinting and change classification.

use sha2::{Digest, Sha256};

/// How a fetched document relates to the corpus's stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// No record exists for the id
    Added,
    /// A record exists and the content fingerprint differs
    Updated,
    /// A record exists with an equal fingerprint
    Unchanged,
}

/// Stable 64-bit content fingerprint, hex-encoded (16 chars).
///
/// Computed over the extracted, pre-normalization text so that cleaning-rule
/// changes alone do not churn the corpus.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..8])
}

/// Classify a freshly computed fingerprint against the stored one.
///
/// Fingerprint equality is the sole no-change criterion; metadata-only
/// differences never trigger a rewrite.
pub fn classify(stored: Option<&str>, fresh: &str) -> ChangeKind {
    match stored {
        None => ChangeKind::Added,
        Some(existing) if existing == fresh => ChangeKind::Unchanged,
        Some(_) => ChangeKind::Updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        let text = "An Act to amend the law relating to evidence.";
        assert_eq!(fingerprint(text), fingerprint(text));
    }

    #[test]
    fn fingerprint_is_sensitive_to_content() {
        let before = fingerprint("Act No. 1 of 2024");
        let after = fingerprint("Act No. 1 of 2024 (amended)");
        assert_ne!(before, after);
    }

    #[test]
    fn fingerprint_is_sixteen_lowercase_hex_chars() {
        let fp = fingerprint("some judgment text");
        assert_eq!(fp.len(), 16);
        assert!(fp
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn classifies_new_changed_and_unchanged() {
        let fp = fingerprint("content");
        assert_eq!(classify(None, &fp), ChangeKind::Added);
        assert_eq!(classify(Some(&fp), &fp), ChangeKind::Unchanged);
        assert_eq!(
            classify(Some("0000000000000000"), &fp),
            ChangeKind::Updated
        );
    }
}
