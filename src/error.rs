use thiserror::Error;

/// The error taxonomy surfaced across the scheduling and execution engine.
///
/// Each variant corresponds to one of the error kinds in the system's error
/// handling design: individual-scenario failures are tolerated by their
/// group, deployment failures abort their group but not the benchmark, and
/// only `PermissionError` is fatal at construction time.
#[derive(Debug, Error)]
pub enum AutobenchError {
    #[error("failed to fetch compute catalog: {0}")]
    CatalogFetchError(String),

    #[error("model is not feasible on this instance: {0}")]
    RecommenderInfeasible(String),

    #[error("namespace is not a payable principal: {0}")]
    PermissionError(String),

    #[error("failed to create endpoint: {0}")]
    EndpointError(String),

    #[error("endpoint not found: {0}")]
    NotFound(String),

    #[error("deployment {0} is not running")]
    DeploymentNotRunning(String),

    #[error("load generator exited with a non-zero status: {0}")]
    SubprocessNonzero(String),

    #[error("failed to parse load generator output as JSON")]
    ParseError,

    #[error("failed to delete endpoint: {0}")]
    DeleteError(String),

    #[error("result persistence failed: {0}")]
    PersistenceError(String),

    #[error("script template error: {0}")]
    TemplateError(String),
}

pub type Result<T> = std::result::Result<T, AutobenchError>;
