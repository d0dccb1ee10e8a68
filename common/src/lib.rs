pub mod archive;
pub mod job;
pub mod partition;
pub mod results;
pub mod task;
pub mod worker;

pub use archive::{unpack_flat, ArchiveError};
pub use job::{new_job_id, JobId, JobStatus, Workload};
pub use partition::{partition, FrameRange, PartitionError};
pub use results::{JobReport, OutcomeStatus, PipelineStep, WorkerOutcome};
pub use task::{frame_file_name, RemoteLayout, RenderSettings, RenderTask};
pub use worker::{NodeTemplate, Worker, WorkerId, WorkerState};
