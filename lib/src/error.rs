use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Failure type produced by user `run` closures.
pub type UserFnError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by an invocation of the engine.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A task's `run` closure returned an error or panicked.
    #[error("task {id} failed: {source}")]
    UserNode {
        id: String,
        #[source]
        source: UserFnError,
    },

    /// A blocking wait elapsed without a single completion.
    #[error("timeout reached while waiting for tasks {pending:?} to finish. Waited a total of {waited:?}")]
    Timeout {
        pending: Vec<String>,
        waited: Duration,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A precondition violated on the working graph.
    #[error("graph operation failed: {0}")]
    Graph(String),
}

/// What to do with the rest of the graph when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Abort the invocation on the first failure.
    Strict,
    /// Log the failure and keep going; dependents observe an empty result.
    Permissive,
    /// Prune every transitive dependent of the failed task, then keep going.
    AllChildren,
}

impl FromStr for ErrorStrategy {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(ErrorStrategy::Strict),
            "permissive" => Ok(ErrorStrategy::Permissive),
            "all_children" | "all-children" => Ok(ErrorStrategy::AllChildren),
            unknown => Err(ExecError::Configuration(format!(
                "unknown error strategy: {unknown}"
            ))),
        }
    }
}

impl std::fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorStrategy::Strict => write!(f, "strict"),
            ErrorStrategy::Permissive => write!(f, "permissive"),
            ErrorStrategy::AllChildren => write!(f, "all_children"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_strategy_from_str_normal() {
        assert_eq!(
            "strict".parse::<ErrorStrategy>().unwrap(),
            ErrorStrategy::Strict
        );
        assert_eq!(
            "permissive".parse::<ErrorStrategy>().unwrap(),
            ErrorStrategy::Permissive
        );
        assert_eq!(
            "all_children".parse::<ErrorStrategy>().unwrap(),
            ErrorStrategy::AllChildren
        );
    }

    #[test]
    fn test_error_strategy_from_str_unknown() {
        let err = "lenient".parse::<ErrorStrategy>().unwrap_err();
        assert!(matches!(err, ExecError::Configuration(_)));
    }

    #[test]
    fn test_error_strategy_display_round_trip() {
        for strategy in [
            ErrorStrategy::Strict,
            ErrorStrategy::Permissive,
            ErrorStrategy::AllChildren,
        ] {
            assert_eq!(
                strategy.to_string().parse::<ErrorStrategy>().unwrap(),
                strategy
            );
        }
    }

    #[test]
    fn test_timeout_error_names_pending_tasks() {
        let err = ExecError::Timeout {
            pending: vec!["slow".to_string()],
            waited: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("slow"));
    }
}
