use std::fmt;

/// Closed set of results a submission can end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The domain was recorded; carries the normalized apex zone.
    Accepted { domain: String },
    RateLimited,
    InvalidDomain,
    Duplicate,
    InternalError,
}

impl Outcome {
    /// Returns the label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::RateLimited => "rate_limited",
            Self::InvalidDomain => "invalid_domain",
            Self::Duplicate => "duplicate",
            Self::InternalError => "internal_error",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { domain } => write!(f, "accepted({domain})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Classification of everything that can stop a submission short of acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or unextractable domain, too deep, unresolvable or non-public.
    InvalidInput,
    /// Attempt quota for the current window is exhausted.
    RateLimited,
    /// Domain is already recorded.
    Duplicate,
    /// Store lock contention; retrying later may succeed.
    StoreBusy,
    /// Unexpected store failure or consistency violation.
    InternalError,
}

impl ErrorKind {
    /// Maps the error onto the outcome reported to the submitter.
    pub fn outcome(self) -> Outcome {
        match self {
            Self::InvalidInput => Outcome::InvalidDomain,
            Self::RateLimited => Outcome::RateLimited,
            Self::Duplicate => Outcome::Duplicate,
            Self::StoreBusy | Self::InternalError => Outcome::InternalError,
        }
    }

    /// Returns `true` when an operator must be notified in addition to the submitter.
    pub fn requires_operator(self) -> bool {
        matches!(self, Self::StoreBusy | Self::InternalError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::Duplicate => "duplicate",
            Self::StoreBusy => "store_busy",
            Self::InternalError => "internal_error",
        }
    }
}
