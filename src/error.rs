//! Standard error type for the engine.

use ocl::core::Status;

pub type Result<T> = std::result::Result<T, Error>;

/// An enum covering every failure the engine core can surface.
///
/// Implements the usual error traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A buffer operation exceeded the buffer's capacity.
    #[error("buffer operation needs {requested} bytes but only {capacity} are allocated")]
    WrongSize { requested: usize, capacity: usize },
    /// The pool could not satisfy an allocation.
    #[error("out of memory while allocating a pooled buffer")]
    OutOfMemory,
    /// An OpenCL API call failed with the contained status code.
    #[error("OpenCL error (status {0})")]
    Cl(i32),
    /// An OpenCL layer failure without an API status (setup, resolution).
    #[error("{0}")]
    Ocl(String),
    /// Kernel compilation failed; contains the compiler log.
    #[error("kernel build failed: {0}")]
    KernelBuild(String),
    /// A kernel source file could not be resolved against the search paths.
    #[error("kernel source '{0}' not found")]
    KernelNotFound(String),
    /// The graph references a plugin the registry does not know.
    #[error("plugin '{0}' not found")]
    PluginNotFound(String),
    /// Graph construction or validation failed.
    #[error("bad graph: {0}")]
    BadGraph(String),
    /// A push was attempted on a closed channel.
    #[error("channel is closed")]
    Closed,
    /// A task capability was invoked outside of the task's mode.
    #[error("operation not supported by this task: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the raw OpenCL status code for `Cl` variants.
    pub fn cl_status(&self) -> Option<i32> {
        match *self {
            Error::Cl(code) => Some(code),
            _ => None,
        }
    }
}

impl From<ocl::Error> for Error {
    fn from(err: ocl::Error) -> Error {
        match err.api_status() {
            Some(status) => Error::Cl(status as i32),
            None => Error::Ocl(err.to_string()),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Error {
        Error::Cl(status as i32)
    }
}
