use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use domain_intake_core::{extract_apex_zone, Cancellation, ErrorKind, ExtractError, Outcome};
use domain_intake_dns::{DomainValidator, HostLookup, ResolveError};
use domain_intake_storage::{
    DomainRepository, DomainStoreError, NewDomain, RateDecision, RateLimitError, RateLimiter,
};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runs a submission through rate limiting, extraction, resolution and storage.
///
/// Stages run strictly in that order and the first failure settles the
/// submission. No database transaction is held while DNS is queried.
pub struct SubmissionPipeline<L> {
    limiter: RateLimiter,
    validator: DomainValidator<L>,
    domains: DomainRepository,
    clock: Clock,
}

impl<L: HostLookup> SubmissionPipeline<L> {
    pub fn new(limiter: RateLimiter, validator: DomainValidator<L>, domains: DomainRepository) -> Self {
        Self {
            limiter,
            validator,
            domains,
            clock: Arc::new(Utc::now),
        }
    }

    /// Length of the per-user quota window, quoted in the rate-limit reply.
    pub fn rate_limit_window(&self) -> Duration {
        self.limiter.window()
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Processes one message from `user_id`, returning the recorded apex zone.
    pub async fn submit(
        &self,
        user_id: i64,
        text: &str,
        cancel: &Cancellation,
    ) -> Result<String, SubmissionError> {
        let result = self.run_stages(user_id, text, cancel).await;

        let label = match &result {
            Ok(_) => "accepted",
            Err(err) => err.outcome().map(|outcome| outcome.as_str()).unwrap_or("cancelled"),
        };
        counter!("submissions_total", "outcome" => label).increment(1);

        match &result {
            Ok(domain) => info!(stage = "pipeline", user_id, %domain, "domain accepted"),
            Err(SubmissionError::Cancelled) => {
                debug!(stage = "pipeline", user_id, "submission cancelled")
            }
            Err(err) if err.requires_operator() => {
                error!(stage = "pipeline", user_id, error = %err, kind = err.kind().as_str(), "submission failed")
            }
            Err(err) => {
                debug!(stage = "pipeline", user_id, error = %err, kind = err.kind().as_str(), "submission rejected")
            }
        }

        result
    }

    async fn run_stages(
        &self,
        user_id: i64,
        text: &str,
        cancel: &Cancellation,
    ) -> Result<String, SubmissionError> {
        let decision = cancel
            .run(self.limiter.can_pass(user_id, (self.clock)()))
            .await
            .map_err(|_| SubmissionError::Cancelled)?
            .map_err(|err| {
                if matches!(err, RateLimitError::Busy(_)) {
                    counter!("db_busy_total", "op" => "rate_limit").increment(1);
                }
                SubmissionError::RateLimiter(err)
            })?;
        match decision {
            RateDecision::Allowed { attempt } => {
                debug!(stage = "pipeline", user_id, attempt, "rate limit passed")
            }
            RateDecision::Denied => return Err(SubmissionError::RateLimited),
        }

        let domain = extract_apex_zone(text)?;

        match self.validator.is_resolvable(&domain, cancel).await {
            Ok(true) => {}
            Ok(false) => return Err(SubmissionError::Unresolvable { domain }),
            Err(ResolveError::Cancelled) => return Err(SubmissionError::Cancelled),
            Err(err) => return Err(SubmissionError::Resolve(err)),
        }

        let record = NewDomain {
            domain: &domain,
            created_at_unix: (self.clock)().timestamp(),
            created_by_user_id: user_id,
        };
        cancel
            .run(self.domains.insert(&record))
            .await
            .map_err(|_| SubmissionError::Cancelled)?
            .map_err(|err| {
                if matches!(err, DomainStoreError::Busy(_)) {
                    counter!("db_busy_total", "op" => "insert_domain").increment(1);
                    warn!(stage = "pipeline", user_id, domain = %record.domain, "database busy on domain insertion");
                }
                SubmissionError::Store(err)
            })?;

        Ok(domain)
    }
}

/// Why a submission did not end with an accepted domain.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error(transparent)]
    RateLimiter(RateLimitError),
    #[error("invalid domain: {0}")]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Resolve(ResolveError),
    #[error("domain '{domain}' is not resolvable")]
    Unresolvable { domain: String },
    #[error(transparent)]
    Store(DomainStoreError),
    #[error("submission cancelled")]
    Cancelled,
}

impl SubmissionError {
    /// Error class; a cancelled submission is reported as internal.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited => ErrorKind::RateLimited,
            Self::RateLimiter(err) => err.kind(),
            Self::Extract(_) | Self::Unresolvable { .. } => ErrorKind::InvalidInput,
            Self::Resolve(err) => err.kind(),
            Self::Store(err) => err.kind(),
            Self::Cancelled => ErrorKind::InternalError,
        }
    }

    /// Outcome to report to the submitter, or `None` when nothing should be sent.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Cancelled => None,
            other => Some(other.kind().outcome()),
        }
    }

    pub fn requires_operator(&self) -> bool {
        !matches!(self, Self::Cancelled) && self.kind().requires_operator()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{collections::HashMap, net::IpAddr};

    use domain_intake_dns::{HostLookup, LookupError};

    /// Answers from a fixed table; unknown hosts have no records.
    #[derive(Default)]
    pub struct StaticLookup {
        answers: HashMap<String, Vec<IpAddr>>,
    }

    impl StaticLookup {
        pub fn with(mut self, host: &str, addrs: &[&str]) -> Self {
            let addrs = addrs
                .iter()
                .map(|addr| addr.parse().expect("ip literal"))
                .collect();
            self.answers.insert(host.to_string(), addrs);
            self
        }
    }

    impl HostLookup for StaticLookup {
        async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, LookupError> {
            self.answers.get(host).cloned().ok_or(LookupError::NoRecords)
        }
    }
}
