#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pipeline;
pub mod ssh;
pub mod transport;

pub use pipeline::{
    FleetHandle, PipelineError, PipelineInputs, RemoteTaskPipeline, StepFailure, StepTimeouts,
};
pub use ssh::{SshConfig, SshTransport};
pub use transport::{ExecOutput, RemoteSession, RemoteTransport, TransportError};
