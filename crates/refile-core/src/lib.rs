pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod matcher;
pub mod path_mapper;
pub mod plan;
pub mod progress;
pub mod relocator;
pub mod remote;
pub mod scanner;
pub mod validator;

pub use config::{load_configuration, RunConfig};
pub use engine::{Engine, RunReport};
pub use error::Error;
pub use hasher::HashAlgorithm;
pub use progress::{ProgressReporter, SilentReporter};
pub use relocator::{LinkMode, RelocationStatus};
pub use remote::{LocalTransport, SshDestination, SshTransport, Transport};
