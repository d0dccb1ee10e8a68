use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{error, info, warn};

use common::{
    partition, FrameRange, OutcomeStatus, PartitionError, RenderSettings, RemoteLayout, RenderTask,
    Worker, WorkerOutcome, WorkerState, Workload,
};
use worker::{PipelineInputs, RemoteTaskPipeline, RemoteTransport, StepTimeouts};

use crate::fleet::{FleetLifecycleManager, ProvisionError, ProvisionedFleet};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("no se pudo repartir el trabajo: {0}")]
    Partition(#[from] PartitionError),
}

/// Parámetros fijos de un despacho.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub group: String,
    pub template: common::NodeTemplate,
    pub settings: RenderSettings,
    pub layout: RemoteLayout,
    pub timeouts: StepTimeouts,
    /// None = todos los pipelines a la vez
    pub max_concurrency: Option<usize>,
}

#[derive(Debug)]
pub struct DispatchResult {
    pub fleet: ProvisionedFleet,
    /// Un outcome por worker listo, en orden de fleet
    pub outcomes: Vec<WorkerOutcome>,
    pub render_time: Duration,
}

/// Provisiona el fleet, reparte los frames y corre un pipeline por
/// worker. Vuelve cuando todos los pipelines terminaron.
pub struct FleetDispatcher {
    fleet: Arc<FleetLifecycleManager>,
    transport: Arc<dyn RemoteTransport>,
    inputs: Arc<PipelineInputs>,
    plan: DispatchPlan,
}

impl FleetDispatcher {
    pub fn new(
        fleet: Arc<FleetLifecycleManager>,
        transport: Arc<dyn RemoteTransport>,
        inputs: PipelineInputs,
        plan: DispatchPlan,
    ) -> Self {
        Self {
            fleet,
            transport,
            inputs: Arc::new(inputs),
            plan,
        }
    }

    pub async fn run(
        &self,
        workload: Workload,
        requested: u32,
    ) -> Result<DispatchResult, DispatchError> {
        let provisioned = self
            .fleet
            .provision(requested, &self.plan.group, &self.plan.template)
            .await?;

        info!(
            "procesadores por nodo: {}, total: {}",
            provisioned.processors_per_node(),
            provisioned.processors_total()
        );

        // Se reparte sobre los workers que quedaron, no sobre los pedidos
        let ranges = match partition(workload.frames, provisioned.ready.len() as u32) {
            Ok(ranges) => ranges,
            Err(e) => {
                self.fleet.destroy_remaining().await;
                return Err(e.into());
            }
        };

        let started = Instant::now();
        let outcomes = self
            .run_pipelines(&provisioned.ready, &ranges, workload.frames)
            .await;
        let render_time = started.elapsed();
        info!("render terminado en {:.2?}", render_time);

        // Red de seguridad: nada debería quedar vivo a esta altura
        let leaked = self.fleet.destroy_remaining().await;
        if leaked > 0 {
            warn!("{} nodo/s destruidos en el barrido final", leaked);
        }

        Ok(DispatchResult {
            fleet: provisioned,
            outcomes,
            render_time,
        })
    }

    async fn run_pipelines(
        &self,
        workers: &[Worker],
        ranges: &[FrameRange],
        total_frames: u32,
    ) -> Vec<WorkerOutcome> {
        let permits = self
            .plan
            .max_concurrency
            .unwrap_or(workers.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut handles: Vec<(Worker, FrameRange, JoinHandle<WorkerOutcome>)> =
            Vec::with_capacity(workers.len());

        for (worker, range) in workers.iter().zip(ranges.iter().copied()) {
            self.fleet.mark(&worker.id, WorkerState::Assigned);
            info!("worker {} ({}) -> frames {}", worker.index, worker.id, range);

            let task = RenderTask {
                worker: worker.clone(),
                range,
                total_frames,
                settings: self.plan.settings.clone(),
                layout: self.plan.layout.clone(),
            };
            let pipeline = RemoteTaskPipeline::new(
                task,
                self.inputs.clone(),
                self.transport.clone(),
                self.fleet.clone(),
                self.plan.timeouts,
            );
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                // el semáforo nunca se cierra
                let _permit = semaphore.acquire_owned().await.ok();
                pipeline.run().await
            });
            handles.push((worker.clone(), range, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (worker, range, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("el pipeline del worker {} se abortó: {}", worker.id, e);
                    self.fleet.destroy(&worker.id).await;
                    WorkerOutcome {
                        worker_id: worker.id.clone(),
                        index: worker.index,
                        range,
                        status: OutcomeStatus::Aborted {
                            error: e.to_string(),
                        },
                        files: Vec::new(),
                        duration_ms: 0,
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }
}
