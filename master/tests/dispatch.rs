use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{frame_file_name, FrameRange, JobStatus, NodeTemplate, OutcomeStatus, Workload};
use master::{
    ComputeProvider, CreateNodesResult, DispatchError, JobError, NodeFailure, NodeInfo,
    ProviderError, ProvisionError, RenderConfig, RenderJob,
};
use worker::mock::{MockCall, MockTransport, NodeBehavior};

/// Proveedor de mentira: `ready` nodos utilizables y `broken` que
/// arrancan mal. Cuenta cada destroy.
struct FakeProvider {
    ready: u32,
    broken: u32,
    destroyed: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn new(ready: u32, broken: u32) -> Arc<Self> {
        Arc::new(Self {
            ready,
            broken,
            destroyed: Mutex::new(Vec::new()),
        })
    }

    fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeProvider for FakeProvider {
    async fn create_nodes(
        &self,
        _group: &str,
        count: u32,
        _template: &NodeTemplate,
    ) -> Result<CreateNodesResult, ProviderError> {
        let ready = self.ready.min(count);
        let nodes = (0..ready)
            .map(|i| NodeInfo {
                id: format!("i-{i}"),
                address: address(i),
                processors: 2,
            })
            .collect();
        let failed = (0..self.broken)
            .map(|i| NodeFailure {
                id: Some(format!("i-roto-{i}")),
                reason: "impaired".to_string(),
            })
            .collect();
        Ok(CreateNodesResult { nodes, failed })
    }

    async fn destroy_node(&self, id: &str) -> Result<(), ProviderError> {
        self.destroyed.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

fn address(index: u32) -> String {
    format!("10.0.0.{}", index + 1)
}

/// tar.gz como el que arma `tar -czPf`: rutas absolutas del nodo.
fn archive_for(range: FrameRange, total: u32) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for frame in range.frames() {
        let name = frame_file_name("scherk", frame, total);
        let data = format!("frame {frame}");
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                format!("tmp/homework_5/results/{name}"),
                data.as_bytes(),
            )
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

struct Setup {
    dir: tempfile::TempDir,
    transport: MockTransport,
}

impl Setup {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let povray = dir.path().join("povray");
        fs::create_dir(&povray).unwrap();
        fs::write(povray.join("povray"), b"#!binario").unwrap();
        fs::write(povray.join("scherk.pov"), b"// escena").unwrap();
        install_fake_merge_tool(&povray);

        Self {
            dir,
            transport: MockTransport::new(),
        }
    }

    /// Cada nodo devuelve los frames de su rango.
    fn nodes_render(&self, ranges: &[FrameRange], total: u32) {
        for (i, range) in ranges.iter().enumerate() {
            self.transport.set_behavior(
                &address(i as u32),
                NodeBehavior {
                    archive: archive_for(*range, total),
                    ..Default::default()
                },
            );
        }
    }

    fn job(&self, provider: Arc<FakeProvider>) -> RenderJob {
        let config = RenderConfig {
            local_dir: self.dir.path().to_path_buf(),
            ..RenderConfig::default()
        };
        RenderJob::new(config, provider, Arc::new(self.transport.clone()))
    }

    fn results(&self) -> std::path::PathBuf {
        self.dir.path().join("results")
    }
}

#[cfg(unix)]
fn install_fake_merge_tool(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let tool = dir.join("gm");
    fs::write(&tool, "#!/bin/sh\nfor a; do last=$a; done\ntouch \"$last\"\n").unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
fn install_fake_merge_tool(_dir: &Path) {}

fn local_frames(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".png"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn reparte_10_frames_en_3_workers_y_junta_todo() {
    let setup = Setup::new();
    setup.nodes_render(
        &[
            FrameRange::new(1, 4),
            FrameRange::new(5, 3),
            FrameRange::new(8, 3),
        ],
        10,
    );
    let provider = FakeProvider::new(3, 0);

    let report = setup
        .job(provider.clone())
        .run(Workload::new(10), 3)
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(report.ready_workers, 3);
    assert_eq!(report.processors_total, 6);
    assert!(report.missing_ranges.is_empty());
    assert!(report.missing_frames.is_empty());

    let expected: Vec<String> = (1..=10).map(|f| frame_file_name("scherk", f, 10)).collect();
    assert_eq!(local_frames(&setup.results()), expected);

    // un destroy por nodo, ni más ni menos
    let mut destroyed = provider.destroyed();
    destroyed.sort();
    assert_eq!(destroyed, vec!["i-0", "i-1", "i-2"]);
    assert_eq!(setup.transport.open_sessions(), 0);

    assert!(setup.results().join("report.json").exists());
    #[cfg(unix)]
    assert!(report.merged_artifact.is_some());
}

#[tokio::test]
async fn cada_worker_recibe_su_rango() {
    let setup = Setup::new();
    setup.nodes_render(
        &[
            FrameRange::new(1, 4),
            FrameRange::new(5, 3),
            FrameRange::new(8, 3),
        ],
        10,
    );

    setup
        .job(FakeProvider::new(3, 0))
        .run(Workload::new(10), 3)
        .await
        .unwrap();

    let render_of = |addr: &str| -> String {
        setup
            .transport
            .calls_for(addr)
            .into_iter()
            .find_map(|c| match c {
                MockCall::Exec { command, .. } if command.contains("+SF") => Some(command),
                _ => None,
            })
            .unwrap()
    };
    assert!(render_of("10.0.0.1").contains("+SF1 +EF4"));
    assert!(render_of("10.0.0.2").contains("+SF5 +EF7"));
    assert!(render_of("10.0.0.3").contains("+SF8 +EF10"));
    assert!(render_of("10.0.0.3").contains("+KFF10"));
}

#[tokio::test]
async fn worker_fallido_deja_su_rango_faltante() {
    let setup = Setup::new();
    setup.nodes_render(
        &[
            FrameRange::new(1, 4),
            FrameRange::new(5, 3),
            FrameRange::new(8, 3),
        ],
        10,
    );
    setup.transport.set_behavior(
        "10.0.0.2",
        NodeBehavior {
            fail_exec_containing: Some("+SF".to_string()),
            ..Default::default()
        },
    );
    let provider = FakeProvider::new(3, 0);

    let report = setup
        .job(provider.clone())
        .run(Workload::new(10), 3)
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Partial);
    assert_eq!(report.missing_ranges, vec![FrameRange::new(5, 3)]);
    assert_eq!(report.missing_frames, vec![5, 6, 7]);
    assert!(matches!(
        report.outcomes[1].status,
        OutcomeStatus::Failed { .. }
    ));
    // los otros siguen y el fallido también se destruye
    assert_eq!(report.succeeded_count(), 2);
    assert_eq!(provider.destroyed().len(), 3);
    assert_eq!(local_frames(&setup.results()).len(), 7);
    #[cfg(unix)]
    assert!(report.merged_artifact.is_some());
}

#[tokio::test]
async fn sin_workers_utilizables_no_hay_io_remoto() {
    let setup = Setup::new();
    let provider = FakeProvider::new(0, 2);

    let err = setup
        .job(provider.clone())
        .run(Workload::new(10), 2)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        JobError::Dispatch(DispatchError::Provision(ProvisionError::NoUsableWorkers {
            requested: 2
        }))
    ));
    assert!(setup.transport.calls().is_empty());
    // los que arrancaron mal igual se destruyen
    assert_eq!(provider.destroyed().len(), 2);
}

#[tokio::test]
async fn fleet_parcial_reparte_sobre_los_listos() {
    let setup = Setup::new();
    setup.nodes_render(&[FrameRange::new(1, 5), FrameRange::new(6, 5)], 10);
    let provider = FakeProvider::new(2, 1);

    let report = setup
        .job(provider.clone())
        .run(Workload::new(10), 3)
        .await
        .unwrap();

    assert_eq!(report.requested_workers, 3);
    assert_eq!(report.ready_workers, 2);
    assert_eq!(report.failed_worker_ids, vec!["i-roto-0".to_string()]);
    assert_eq!(report.status, JobStatus::Succeeded);
    assert!(report.missing_frames.is_empty());

    let ranges: Vec<_> = report.outcomes.iter().map(|o| o.range).collect();
    assert_eq!(ranges, vec![FrameRange::new(1, 5), FrameRange::new(6, 5)]);
    assert_eq!(provider.destroyed().len(), 3);
}

#[tokio::test]
async fn mas_workers_que_frames() {
    let setup = Setup::new();
    setup.nodes_render(
        &[
            FrameRange::new(1, 1),
            FrameRange::new(2, 1),
            FrameRange::new(3, 0),
            FrameRange::new(3, 0),
        ],
        2,
    );
    let provider = FakeProvider::new(4, 0);

    let report = setup
        .job(provider.clone())
        .run(Workload::new(2), 4)
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Succeeded);
    assert!(report.outcomes[2].range.is_empty());
    assert!(report.outcomes[3].files.is_empty());
    assert_eq!(local_frames(&setup.results()), vec!["scherk1.png", "scherk2.png"]);

    // los de rango vacío no renderizan pero sí se destruyen
    let rendered = setup
        .transport
        .calls()
        .iter()
        .filter(|c| matches!(c, MockCall::Exec { command, .. } if command.contains("+SF")))
        .count();
    assert_eq!(rendered, 2);
    assert_eq!(provider.destroyed().len(), 4);
}

#[tokio::test]
async fn frames_de_una_corrida_anterior_no_cuentan() {
    let setup = Setup::new();
    fs::create_dir(setup.results()).unwrap();
    // restos de corridas con otro F (otro ancho de número) y del mismo F
    fs::write(setup.results().join("scherk05.png"), b"viejo").unwrap();
    fs::write(setup.results().join("scherk001.png"), b"viejo").unwrap();
    fs::write(setup.results().join("result.gif"), b"viejo").unwrap();

    setup.nodes_render(
        &[
            FrameRange::new(1, 4),
            FrameRange::new(5, 3),
            FrameRange::new(8, 3),
        ],
        10,
    );
    setup.transport.set_behavior(
        "10.0.0.2",
        NodeBehavior {
            fail_exec_containing: Some("+SF".to_string()),
            ..Default::default()
        },
    );

    let report = setup
        .job(FakeProvider::new(3, 0))
        .run(Workload::new(10), 3)
        .await
        .unwrap();

    assert_eq!(report.missing_frames, vec![5, 6, 7]);
    let expected: Vec<String> = [1, 2, 3, 4, 8, 9, 10]
        .iter()
        .map(|f| frame_file_name("scherk", *f, 10))
        .collect();
    assert_eq!(local_frames(&setup.results()), expected);
    // la animación vieja no sobrevive a la corrida nueva
    let gif = fs::read(setup.results().join("result.gif")).unwrap_or_default();
    assert_ne!(gif, b"viejo".to_vec());
}

/// Cada nodo tarda un poco en renderizar, así los pipelines se solapan
/// si nada los limita.
fn slow_nodes(setup: &Setup, ranges: &[FrameRange], total: u32) {
    for (i, range) in ranges.iter().enumerate() {
        setup.transport.set_behavior(
            &address(i as u32),
            NodeBehavior {
                archive: archive_for(*range, total),
                exec_delay: Some(Duration::from_millis(150)),
                ..Default::default()
            },
        );
    }
}

const SIX_IN_THREE: [FrameRange; 3] = [
    FrameRange { start: 1, end: 2 },
    FrameRange { start: 3, end: 4 },
    FrameRange { start: 5, end: 6 },
];

#[tokio::test]
async fn concurrencia_limitada_corre_de_a_un_pipeline() {
    let setup = Setup::new();
    slow_nodes(&setup, &SIX_IN_THREE, 6);
    let config = RenderConfig {
        local_dir: setup.dir.path().to_path_buf(),
        max_concurrency: Some(1),
        ..RenderConfig::default()
    };
    let provider = FakeProvider::new(3, 0);
    let job = RenderJob::new(config, provider.clone(), Arc::new(setup.transport.clone()));

    let report = job.run(Workload::new(6), 3).await.unwrap();

    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(setup.transport.peak_sessions(), 1);
    assert_eq!(local_frames(&setup.results()).len(), 6);
    assert_eq!(provider.destroyed().len(), 3);
}

#[tokio::test]
async fn sin_limite_todos_los_pipelines_corren_juntos() {
    let setup = Setup::new();
    slow_nodes(&setup, &SIX_IN_THREE, 6);

    let report = setup
        .job(FakeProvider::new(3, 0))
        .run(Workload::new(6), 3)
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(setup.transport.peak_sessions(), 3);
}
