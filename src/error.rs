use thiserror::Error;

/// Errors surfaced by parsers and the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("`{tool}` command not found or unusable")]
    ToolingAbsent { tool: String },

    #[error("no modules or vendors found, install them first, e.g.: {hint}")]
    NotInstalled { hint: String },

    #[error("{op}: {source}")]
    Parse {
        op: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("could not resolve dependency: {0}")]
    Resolution(String),

    #[error("registry request failed: {0}")]
    Registry(String),

    #[error("failed to convert modules")]
    FailedToConvertModules,

    #[error("no parser available for the given project path")]
    NoPluginAvailable,

    #[error("failed to read modules: {0}")]
    FailedToReadModules(#[source] Box<Error>),

    #[error("local dependency cache not found")]
    NoDependencyCache,

    #[error("invalid project type: {0}")]
    InvalidProjectType(String),

    #[error("unable to determine {0} version")]
    VersionNotFound(String),

    #[error("`{program}` failed ({status}): {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a decoder error with the name of the operation that failed.
    pub fn parse<E>(op: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Parse {
            op: op.into(),
            source: source.into(),
        }
    }

    pub fn tooling_absent(tool: impl Into<String>) -> Self {
        Error::ToolingAbsent { tool: tool.into() }
    }

    pub fn not_installed(hint: impl Into<String>) -> Self {
        Error::NotInstalled { hint: hint.into() }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Registry(err.to_string())
    }
}
