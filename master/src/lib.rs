//! Orquestación de un render en paralelo sobre un fleet de nodos remotos.

pub mod aggregator;
pub mod aws;
pub mod config;
pub mod dispatcher;
pub mod fleet;
pub mod job;
pub mod provider;

pub use aggregator::{MergeError, ResultAggregator};
pub use aws::{AwsCliProvider, AwsCredentials};
pub use config::RenderConfig;
pub use dispatcher::{DispatchError, DispatchPlan, DispatchResult, FleetDispatcher};
pub use fleet::{FleetLifecycleManager, ProvisionError, ProvisionedFleet};
pub use job::{JobError, RenderJob};
pub use provider::{ComputeProvider, CreateNodesResult, NodeFailure, NodeInfo, ProviderError};
