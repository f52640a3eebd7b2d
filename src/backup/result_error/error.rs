use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error("Configuration file not found: {0:?}")]
    ConfigNotFound(PathBuf),
    #[error("Configuration file is empty: {0:?}")]
    ConfigEmpty(PathBuf),
    #[error("Configuration file could not be read: {path:?}: {source}")]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to start {tool:?}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool:?} exited with {status}{}", format_stderr(.stderr))]
    ToolExit {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{tool:?} did not finish within {}", humantime_duration(.timeout))]
    ToolTimeout { tool: String, timeout: Duration },
    #[error("Entry name {name:?} is used by more than one source: {}", .sources.iter().map(|p| format!("{p:?}")).join(", "))]
    DuplicateEntryName { name: String, sources: Vec<PathBuf> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send + Sync>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

fn format_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(":\n{}", indent::indent_all_with("  ", stderr))
    }
}

fn humantime_duration(d: &Duration) -> String {
    humantime_serde::re::humantime::format_duration(*d).to_string()
}

impl<S: Into<String>, O: Debug + Send + Sync + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(
            errors
                .into_iter()
                .flat_map(|e| e.into_iter())
                .collect_vec(),
        )
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Configuration problems abort the whole run; everything else is scoped to one job.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Error::ConfigNotFound(_)
            | Error::ConfigEmpty(_)
            | Error::ConfigUnreadable { .. }
            | Error::SerdeYml(_)
            | Error::ValidationError(_) => true,
            Error::WithMsg { error, .. } | Error::WithDebugObjAndFnName { error, .. } => {
                error.is_configuration_error()
            }
            Error::LotsOfError(v) => v.iter().any(Error::is_configuration_error),
            _ => false,
        }
    }
}
