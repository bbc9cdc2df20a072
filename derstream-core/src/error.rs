use thiserror::Error;

/// Main error type for derstream operations
///
/// Every pipeline stage reports failures through this type. The first error
/// raised anywhere in a pipeline run aborts that run; there is no partial
/// result and no retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Asn1Error {
    /// A structurally well-formed encoding that violates a canonicality
    /// policy (the policy domain is "DER" throughout this codec).
    #[error("{domain} policy failure: {reason}")]
    Policy { domain: &'static str, reason: String },

    /// Malformed input detected while parsing, or an uncategorized failure
    /// caught at a stage boundary.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid data handed to an encoder.
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl Asn1Error {
    /// Build a DER policy failure with the given reason.
    pub fn der_policy(reason: impl Into<String>) -> Self {
        Asn1Error::Policy {
            domain: "DER",
            reason: reason.into(),
        }
    }
}

/// Result type alias for derstream operations
pub type Asn1Result<T> = Result<T, Asn1Error>;
