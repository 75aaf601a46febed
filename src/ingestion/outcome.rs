//! Terminal classification of an ingestion job
//!
//! Each entity kind is recorded as a success or a failure; the job's final
//! status and error text are derived from those records alone.

use crate::database::models::{EntityKind, JobStatus};
use crate::error::IngestError;

/// How one entity kind ended; failures carry their `<kind>: <error>` text.
#[derive(Debug, Clone, PartialEq)]
pub enum KindOutcome {
    Succeeded,
    Failed { message: String },
}

#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    outcomes: Vec<KindOutcome>,
    degradations: Vec<String>,
}

impl JobOutcome {
    pub fn record_success(&mut self) {
        self.outcomes.push(KindOutcome::Succeeded);
    }

    pub fn record_failure(&mut self, kind: EntityKind, err: &IngestError) {
        self.outcomes.push(KindOutcome::Failed {
            message: format!("{}: {}", kind, err),
        });
    }

    /// A non-fatal loss inside an otherwise successful kind.
    pub fn record_degradation(&mut self, message: String) {
        self.degradations.push(message);
    }

    /// Status plus error text; the text is `None` exactly when the job completed.
    ///
    /// Outcomes are kept in extraction order, so the first failure is the
    /// earliest one in pull request, issue, commit order. A rate limit is an
    /// ordinary failure here: partial while another kind succeeded.
    pub fn classify(&self) -> (JobStatus, Option<String>) {
        let first_failure = self.outcomes.iter().find_map(|outcome| match outcome {
            KindOutcome::Failed { message } => Some(message.clone()),
            KindOutcome::Succeeded => None,
        });
        let any_success = self.outcomes.contains(&KindOutcome::Succeeded);

        match first_failure {
            None if self.degradations.is_empty() => (JobStatus::Completed, None),
            None => (JobStatus::Partial, Some(self.degradations.join("; "))),
            Some(message) if any_success => (JobStatus::Partial, Some(message)),
            Some(message) => (JobStatus::Failed, Some(message)),
        }
    }
}
