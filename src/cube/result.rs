use std::{error::Error, time::Duration};

use crate::cube::Status;

/// Outcome of one guarded aggregation run
#[derive(Debug)]
pub struct AggregationResult<R> {
    status: Status,
    duration: Duration,
    results: Vec<R>,
    message: Option<String>,
}

impl<R> AggregationResult<R> {
    pub(crate) fn ok(results: Vec<R>, duration: Duration) -> Self {
        Self {
            status: Status::Ok,
            duration,
            results,
            message: None,
        }
    }

    pub(crate) fn not_run(message: impl Into<String>) -> Self {
        Self {
            status: Status::NotRun,
            duration: Duration::ZERO,
            results: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub(crate) fn failed(message: String, duration: Duration) -> Self {
        Self {
            status: Status::Error,
            duration,
            results: Vec::new(),
            message: Some(message),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn results(&self) -> &[R] {
        &self.results
    }

    pub fn into_results(self) -> Vec<R> {
        self.results
    }

    /// Diagnostic text, set on every non-OK status
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Flatten an error and all of its sources, one cause per line
pub fn describe_chain(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::CubeError;

    #[test]
    fn test_chain_is_flattened() {
        let err = CubeError::MissingValue {
            label: "Mars".into(),
            dimension: "geo".into(),
        }
        .during("partition");
        let text = describe_chain(&err);
        assert_eq!(
            text,
            "Aggregation failed during partition\n  caused by: Value 'Mars' not found in dimension 'geo'"
        );
    }

    #[test]
    fn test_statuses() {
        let r: AggregationResult<u8> = AggregationResult::not_run("nothing to do");
        assert_eq!(r.status(), Status::NotRun);
        assert_eq!(r.message(), Some("nothing to do"));
        let r = AggregationResult::ok(vec![1u8], Duration::from_millis(1));
        assert!(r.is_ok());
        assert_eq!(r.into_results(), vec![1]);
    }
}
