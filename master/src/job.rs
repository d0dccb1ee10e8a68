use chrono::Utc;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

use common::{new_job_id, JobReport, Workload};
use worker::{PipelineInputs, RemoteTransport};

use crate::{
    aggregator::{MergeError, ResultAggregator},
    config::{RenderConfig, RESULT_FILE},
    dispatcher::{DispatchError, DispatchPlan, FleetDispatcher},
    fleet::FleetLifecycleManager,
    provider::ComputeProvider,
};

pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("no se pudo preparar {path}: {source}")]
    LocalDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no se pudieron borrar los resultados anteriores: {0}")]
    StaleResults(#[source] MergeError),
}

/// Un render completo: fleet → pipelines → merge → informe.
pub struct RenderJob {
    config: RenderConfig,
    provider: Arc<dyn ComputeProvider>,
    transport: Arc<dyn RemoteTransport>,
}

impl RenderJob {
    pub fn new(
        config: RenderConfig,
        provider: Arc<dyn ComputeProvider>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            config,
            provider,
            transport,
        }
    }

    pub async fn run(&self, workload: Workload, instances: u32) -> Result<JobReport, JobError> {
        let job_id = new_job_id();
        let started_at = Utc::now();
        info!("job {}: {} frames en {} instancia/s", job_id, workload.frames, instances);

        let results_dir = self.config.results_dir();
        tokio::fs::create_dir_all(&results_dir)
            .await
            .map_err(|source| JobError::LocalDir {
                path: results_dir.clone(),
                source,
            })?;

        // Antes de crear nodos: si falla, no se gasta nada
        let aggregator = ResultAggregator::new(self.config.merge_tool(), RESULT_FILE);
        aggregator
            .clear_previous(&results_dir)
            .map_err(JobError::StaleResults)?;

        let fleet = Arc::new(FleetLifecycleManager::new(self.provider.clone()));
        let dispatcher = FleetDispatcher::new(
            fleet,
            self.transport.clone(),
            PipelineInputs {
                renderer: self.config.renderer_path(),
                scene: self.config.scene_path(),
                results_dir: results_dir.clone(),
            },
            DispatchPlan {
                group: format!("{}-{}", self.config.group, job_id),
                template: self.config.template.clone(),
                settings: self.config.settings.clone(),
                layout: self.config.layout.clone(),
                timeouts: self.config.timeouts,
                max_concurrency: self.config.max_concurrency,
            },
        );

        let dispatched = dispatcher.run(workload, instances).await?;

        let missing_ranges = JobReport::collect_missing_ranges(&dispatched.outcomes);
        for range in &missing_ranges {
            warn!("frames {} sin renderizar (worker fallido)", range);
        }

        let base = &self.config.settings.output_base;
        let missing_frames =
            ResultAggregator::missing_frames(&results_dir, base, workload.frames).unwrap_or_else(
                |e| {
                    warn!("no se pudo revisar {}: {}", results_dir.display(), e);
                    Vec::new()
                },
            );

        // Con frames parciales igual se arma la animación
        let merged_artifact = match aggregator.merge(&results_dir).await {
            Ok(path) => {
                info!("animación lista en {}", path.display());
                Some(path.display().to_string())
            }
            Err(e) => {
                warn!("no se pudo armar la animación: {}", e);
                None
            }
        };

        let fleet = dispatched.fleet;
        let report = JobReport {
            job_id,
            workload,
            status: JobReport::status_for(&dispatched.outcomes),
            requested_workers: fleet.requested,
            ready_workers: fleet.ready.len() as u32,
            failed_worker_ids: fleet.failed_ids.clone(),
            processors_per_node: fleet.processors_per_node(),
            processors_total: fleet.processors_total(),
            outcomes: dispatched.outcomes,
            missing_ranges,
            missing_frames,
            output_dir: results_dir.display().to_string(),
            merged_artifact,
            started_at,
            finished_at: Some(Utc::now()),
            render_time_ms: dispatched.render_time.as_millis() as u64,
        };

        self.write_report(&report).await;
        Ok(report)
    }

    async fn write_report(&self, report: &JobReport) {
        let path = self.config.results_dir().join(REPORT_FILE);
        let json = match serde_json::to_vec_pretty(report) {
            Ok(json) => json,
            Err(e) => {
                warn!("no se pudo serializar el informe: {}", e);
                return;
            }
        };
        match tokio::fs::write(&path, json).await {
            Ok(()) => info!("informe guardado en {}", path.display()),
            Err(e) => warn!("no se pudo guardar {}: {}", path.display(), e),
        }
    }
}
