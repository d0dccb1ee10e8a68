use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::{JobId, JobStatus, Workload};
use crate::partition::FrameRange;
use crate::worker::WorkerId;

/// Pasos del pipeline remoto, en orden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStep {
    Stage,
    Execute,
    Package,
    Fetch,
    Unpack,
    Release,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Stage => "stage",
            PipelineStep::Execute => "execute",
            PipelineStep::Package => "package",
            PipelineStep::Fetch => "fetch",
            PipelineStep::Unpack => "unpack",
            PipelineStep::Release => "release",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Succeeded,
    Failed { step: PipelineStep, error: String },
    /// La tarea local murió antes de reportar (panic o cancelación)
    Aborted { error: String },
}

/// Resultado de un pipeline (uno por worker del fleet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub worker_id: WorkerId,
    pub index: u32,
    pub range: FrameRange,
    pub status: OutcomeStatus,
    /// Archivos desempaquetados en el directorio local
    pub files: Vec<String>,
    pub duration_ms: u64,
}

impl WorkerOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded)
    }
}

/// Informe final del job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub workload: Workload,
    pub status: JobStatus,

    /// -------- Fleet --------
    pub requested_workers: u32,
    pub ready_workers: u32,
    pub failed_worker_ids: Vec<WorkerId>,
    pub processors_per_node: u32,
    pub processors_total: u32,

    pub outcomes: Vec<WorkerOutcome>,

    /// Rangos de workers fallidos (no se re-reparten)
    pub missing_ranges: Vec<FrameRange>,
    /// Frames esperados que no aparecieron en el directorio local
    pub missing_frames: Vec<u32>,

    pub output_dir: String,
    pub merged_artifact: Option<String>,

    /// -------- Métricas --------
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub render_time_ms: u64,
}

impl JobReport {
    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.succeeded_count()
    }

    /// Rangos no vacíos de los workers que fallaron, en orden de fleet.
    pub fn collect_missing_ranges(outcomes: &[WorkerOutcome]) -> Vec<FrameRange> {
        let mut ranges: Vec<(u32, FrameRange)> = outcomes
            .iter()
            .filter(|o| !o.succeeded() && !o.range.is_empty())
            .map(|o| (o.index, o.range))
            .collect();
        ranges.sort_by_key(|(index, _)| *index);
        ranges.into_iter().map(|(_, r)| r).collect()
    }

    pub fn status_for(outcomes: &[WorkerOutcome]) -> JobStatus {
        let ok = outcomes.iter().filter(|o| o.succeeded()).count();
        if ok == outcomes.len() && ok > 0 {
            JobStatus::Succeeded
        } else if ok == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        }
    }
}
