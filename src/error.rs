//! Error kinds surfaced by the hierarchy engine and its validators.
//!
//! Validator failures are terminal for the request that produced them: nothing
//! is persisted and nothing is retried. Storage and signing failures come from
//! external collaborators and are carried through verbatim.

use thiserror::Error;

use crate::name_constraints::GeneralSubtree;

/// Convenience alias used throughout the library.
pub type CaResult<T> = std::result::Result<T, CaError>;

#[derive(Debug, Error)]
pub enum CaError {
    #[error("No record found matching serial '{0}'")]
    NotFound(String),

    #[error("Serial prefix '{prefix}' is ambiguous, it matches: {}", .candidates.join(", "))]
    AmbiguousPrefix {
        prefix: String,
        candidates: Vec<String>,
    },

    /// `required` is the depth or pathlen the new CA would need (`None` means
    /// unconstrained), `available` what `ancestor` can still delegate.
    #[error(
        "Parent CA cannot create intermediate CA due to pathlen restrictions: \
         {ancestor} allows {available}, but {} is required",
        .required.map_or_else(|| "an unconstrained pathlen".to_string(), |r| r.to_string())
    )]
    PathLenExceeded {
        ancestor: String,
        required: Option<u32>,
        available: i64,
    },

    #[error("Name constraint {pattern} is not permitted by CA {ancestor}")]
    NameConstraintViolation {
        pattern: GeneralSubtree,
        ancestor: String,
    },

    #[error("{} cannot be used to revoke root CAs.", .0)]
    RootCaUrlNotAllowed(&'static str),

    #[error("Corrupt CA chain: {0}")]
    CorruptChain(String),

    #[error("Invalid name constraint '{0}'")]
    InvalidNameConstraint(String),

    #[error("Invalid subject '{0}'")]
    InvalidSubject(String),

    #[error("Invalid serial '{0}'")]
    InvalidSerial(String),

    #[error("A record with serial {0} already exists")]
    DuplicateSerial(String),

    #[error("CA {0} is disabled")]
    CaDisabled(String),

    #[error("Certificate {0} is already revoked")]
    AlreadyRevoked(String),

    #[error("Request cancelled before signing")]
    Cancelled,

    #[error("Signing failed: {0:#}")]
    Signing(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl CaError {
    pub fn storage(err: anyhow::Error) -> Self {
        CaError::Storage(err)
    }

    pub fn signing(err: anyhow::Error) -> Self {
        CaError::Signing(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_prefix_lists_candidates() {
        let err = CaError::AmbiguousPrefix {
            prefix: "BD:5B".to_string(),
            candidates: vec!["BD:5B:AB".to_string(), "BD:5B:CD".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("BD:5B:AB"));
        assert!(msg.contains("BD:5B:CD"));
    }

    #[test]
    fn test_root_url_messages() {
        assert_eq!(
            CaError::RootCaUrlNotAllowed("CRLs").to_string(),
            "CRLs cannot be used to revoke root CAs."
        );
        assert_eq!(
            CaError::RootCaUrlNotAllowed("OCSP").to_string(),
            "OCSP cannot be used to revoke root CAs."
        );
    }

    #[test]
    fn test_pathlen_message_names_ancestor() {
        let err = CaError::PathLenExceeded {
            ancestor: "Root (AA:BB)".to_string(),
            required: None,
            available: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("Root (AA:BB)"));
        assert!(msg.contains("unconstrained"));
    }

    #[test]
    fn test_storage_error_keeps_context() {
        let inner = anyhow::anyhow!("disk full").context("Failed to write store");
        let msg = CaError::storage(inner).to_string();
        assert!(msg.contains("Failed to write store"));
        assert!(msg.contains("disk full"));
    }
}
