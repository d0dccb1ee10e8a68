use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use common::{JobReport, OutcomeStatus, Workload};
use master::{AwsCliProvider, AwsCredentials, JobError, RenderConfig, RenderJob};
use worker::SshTransport;

/// Renderiza una animación repartiendo los frames en instancias EC2.
///
/// El resto de la configuración sale de variables `RENDER_*`
/// (`RENDER_REGION`, `RENDER_SSH_KEY`, `RENDER_MAX_CONCURRENCY`, ...).
#[derive(Parser)]
#[command(name = "render")]
#[command(about = "Render paralelo de frames en un fleet de instancias")]
struct Cli {
    #[arg(value_name = "ACCESS_KEY_ID")]
    access_key_id: String,

    #[arg(value_name = "SECRET_ACCESS_KEY")]
    secret_access_key: String,

    /// Instancias a lanzar
    #[arg(value_name = "INSTANCES", value_parser = clap::value_parser!(u32).range(1..))]
    instances: u32,

    /// Frames de la animación
    #[arg(value_name = "FRAMES", value_parser = clap::value_parser!(u32).range(1..))]
    frames: u32,

    /// Imprime el informe completo en JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("master=debug,worker=debug,render=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = RenderConfig::from_env();

    let provider = AwsCliProvider::new(
        AwsCredentials {
            access_key_id: cli.access_key_id,
            secret_access_key: cli.secret_access_key,
        },
        config.template.region.clone(),
    );
    let transport = SshTransport::new(config.ssh_config());

    let job = RenderJob::new(config, Arc::new(provider), Arc::new(transport));

    let report = match job.run(Workload::new(cli.frames), cli.instances).await {
        Ok(report) => report,
        Err(JobError::Dispatch(e)) => {
            error!("no se pudo completar el fleet: {}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &JobReport) {
    println!("Job {}:", report.job_id);
    println!("  estado: {:?}", report.status);
    println!(
        "  instancias: {}/{} listas",
        report.ready_workers, report.requested_workers
    );
    println!("  procesadores por nodo: {}", report.processors_per_node);
    println!("  procesadores totales: {}", report.processors_total);
    println!("  tiempo de render: {} ms", report.render_time_ms);

    println!("Workers:");
    for o in &report.outcomes {
        let status = match &o.status {
            OutcomeStatus::Succeeded => format!("ok ({} archivos)", o.files.len()),
            OutcomeStatus::Failed { step, error } => format!("falló en {step}: {error}"),
            OutcomeStatus::Aborted { error } => format!("abortado: {error}"),
        };
        println!("  [{}] {} frames {} -> {}", o.index, o.worker_id, o.range, status);
    }

    if !report.missing_frames.is_empty() {
        println!("Frames faltantes: {:?}", report.missing_frames);
    }
    println!("Resultados en {}", report.output_dir);
    match &report.merged_artifact {
        Some(path) => println!("Animación: {path}"),
        None => println!("No se generó la animación"),
    }
}
