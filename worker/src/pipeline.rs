use async_trait::async_trait;
use std::{
    future::Future,
    io::Cursor,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use common::{
    unpack_flat, ArchiveError, OutcomeStatus, PipelineStep, RenderTask, WorkerId, WorkerOutcome,
    WorkerState,
};

use crate::transport::{ExecOutput, RemoteSession, RemoteTransport, TransportError};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Archivos locales compartidos por todos los pipelines del job.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub renderer: PathBuf,
    pub scene: PathBuf,
    /// Directorio plano donde se desempaquetan los frames de todos los workers
    pub results_dir: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub step: Duration,
    pub execute: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP_TIMEOUT,
            execute: DEFAULT_EXECUTE_TIMEOUT,
        }
    }
}

/// Lo que el pipeline necesita del dueño del fleet.
#[async_trait]
pub trait FleetHandle: Send + Sync {
    fn mark(&self, worker_id: &WorkerId, state: WorkerState);

    /// Pide destruir el nodo. Idempotente y sin errores hacia afuera.
    async fn release(&self, worker_id: &WorkerId);
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("el comando remoto terminó con código {status}: {stderr}")]
    RemoteCommand { status: i32, stderr: String },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("timeout después de {0:?}")]
    Timeout(Duration),
    #[error("la tarea local se abortó: {0}")]
    Aborted(String),
}

#[derive(Debug)]
pub struct StepFailure {
    pub step: PipelineStep,
    pub error: PipelineError,
}

/// Pipeline de un worker: stage → execute → package → fetch → unpack →
/// release. Los pasos son estrictamente secuenciales; cualquier fallo corta
/// este pipeline y nada más.
pub struct RemoteTaskPipeline {
    task: RenderTask,
    inputs: Arc<PipelineInputs>,
    transport: Arc<dyn RemoteTransport>,
    fleet: Arc<dyn FleetHandle>,
    timeouts: StepTimeouts,
}

impl RemoteTaskPipeline {
    pub fn new(
        task: RenderTask,
        inputs: Arc<PipelineInputs>,
        transport: Arc<dyn RemoteTransport>,
        fleet: Arc<dyn FleetHandle>,
        timeouts: StepTimeouts,
    ) -> Self {
        Self {
            task,
            inputs,
            transport,
            fleet,
            timeouts,
        }
    }

    /// Corre el pipeline completo. Nunca devuelve error: el fallo queda
    /// registrado en el `WorkerOutcome`. El nodo se libera siempre.
    pub async fn run(self) -> WorkerOutcome {
        let started = Instant::now();
        let worker_id = self.task.worker.id.clone();

        let result = self.run_remote().await;

        // Release: la sesión ya está cerrada, sólo queda el nodo
        info!("destruyendo nodo {}", worker_id);
        self.fleet.release(&worker_id).await;

        let (status, files) = match result {
            Ok(files) => {
                info!(
                    "worker {} terminó frames {} ({} archivos)",
                    worker_id,
                    self.task.range,
                    files.len()
                );
                (OutcomeStatus::Succeeded, files)
            }
            Err(StepFailure { step, error }) => {
                warn!(
                    "worker {} falló en el paso {} (frames {}): {}",
                    worker_id, step, self.task.range, error
                );
                (
                    OutcomeStatus::Failed {
                        step,
                        error: error.to_string(),
                    },
                    Vec::new(),
                )
            }
        };

        WorkerOutcome {
            worker_id,
            index: self.task.worker.index,
            range: self.task.range,
            status,
            files,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Abre la sesión, corre los pasos y la cierra pase lo que pase.
    async fn run_remote(&self) -> Result<Vec<String>, StepFailure> {
        let worker = &self.task.worker;
        self.fleet.mark(&worker.id, WorkerState::Executing);

        let mut session = self
            .step(PipelineStep::Stage, self.timeouts.step, async {
                Ok::<_, PipelineError>(self.transport.connect(worker).await?)
            })
            .await?;

        let result = self.run_steps(session.as_mut()).await;

        match tokio::time::timeout(self.timeouts.step, session.close()).await {
            Ok(Ok(())) => debug!("sesión con {} cerrada", worker.id),
            Ok(Err(e)) => warn!("error cerrando sesión con {}: {}", worker.id, e),
            Err(_) => warn!("timeout cerrando sesión con {}", worker.id),
        }

        result
    }

    async fn run_steps(&self, session: &mut dyn RemoteSession) -> Result<Vec<String>, StepFailure> {
        let task = &self.task;
        let worker_id = &task.worker.id;

        // 1) Stage: directorio remoto + binario + escena
        info!("copiando archivos al nodo {}", worker_id);
        self.step(PipelineStep::Stage, self.timeouts.step, async {
            check_exit(session.exec(&task.mkdir_command()).await?)?;
            session
                .put(&self.inputs.renderer, &task.layout.renderer())
                .await?;
            session.put(&self.inputs.scene, &task.layout.scene()).await?;
            Ok::<_, PipelineError>(())
        })
        .await?;

        // 2) Execute
        info!("renderizando frames {} en el nodo {}", task.range, worker_id);
        self.step(PipelineStep::Execute, self.timeouts.execute, async {
            check_exit(session.exec(&task.render_command()).await?)
        })
        .await?;

        // 3) Package: un tar.gz por worker
        self.fleet.mark(worker_id, WorkerState::Collecting);
        self.step(PipelineStep::Package, self.timeouts.step, async {
            check_exit(session.exec(&task.package_command()).await?)
        })
        .await?;

        // 4) Fetch
        info!("descargando resultados de {}", worker_id);
        let archive_path = task.archive_path();
        let bytes = self
            .step(PipelineStep::Fetch, self.timeouts.step, async {
                Ok::<_, PipelineError>(session.get(&archive_path).await?)
            })
            .await?;

        // 5) Unpack en un hilo de bloqueo. Si el paso vence, el guard
        // prende `cancel` y el hilo deja de escribir en results/
        let results_dir = self.inputs.results_dir.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        self.step(PipelineStep::Unpack, self.timeouts.step, async move {
            let _guard = CancelOnDrop(cancel.clone());
            let handle = tokio::task::spawn_blocking(move || {
                unpack_flat(Cursor::new(bytes), &results_dir, &cancel)
            });
            match handle.await {
                Ok(res) => Ok::<_, PipelineError>(res?),
                Err(e) => Err(PipelineError::Aborted(e.to_string())),
            }
        })
        .await
    }

    async fn step<T, F>(&self, step: PipelineStep, limit: Duration, fut: F) -> Result<T, StepFailure>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        debug!("worker {}: paso {}", self.task.worker.id, step);
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(StepFailure { step, error }),
            Err(_) => Err(StepFailure {
                step,
                error: PipelineError::Timeout(limit),
            }),
        }
    }
}

/// Prende la bandera al soltarse. Cuando el timeout descarta el futuro
/// del paso, el hilo de bloqueo sigue vivo y necesita enterarse.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn check_exit(output: ExecOutput) -> Result<(), PipelineError> {
    if output.success() {
        Ok(())
    } else {
        Err(PipelineError::RemoteCommand {
            status: output.exit_status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
