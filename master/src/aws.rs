//! Proveedor EC2 sobre el CLI `aws`.
//!
//! Las credenciales llegan por argumentos de la línea de comandos y se
//! pasan al CLI como variables de entorno del proceso hijo.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use common::NodeTemplate;

use crate::provider::{ComputeProvider, CreateNodesResult, NodeFailure, NodeInfo, ProviderError};

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct AwsCliProvider {
    credentials: AwsCredentials,
    region: String,
}

impl AwsCliProvider {
    pub fn new(credentials: AwsCredentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    async fn aws(&self, args: &[String]) -> Result<Vec<u8>, ProviderError> {
        debug!("aws {}", args.join(" "));

        let output = Command::new("aws")
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json"])
            .env("AWS_ACCESS_KEY_ID", &self.credentials.access_key_id)
            .env("AWS_SECRET_ACCESS_KEY", &self.credentials.secret_access_key)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Command(stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }

    async fn describe(&self, ids: &[String]) -> Result<Vec<Instance>, ProviderError> {
        let mut args = vec![
            "ec2".to_string(),
            "describe-instances".to_string(),
            "--instance-ids".to_string(),
        ];
        args.extend(ids.iter().cloned());

        let stdout = self.aws(&args).await?;
        let parsed: DescribeInstancesOutput =
            serde_json::from_slice(&stdout).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .collect())
    }
}

#[async_trait]
impl ComputeProvider for AwsCliProvider {
    async fn create_nodes(
        &self,
        group: &str,
        count: u32,
        template: &NodeTemplate,
    ) -> Result<CreateNodesResult, ProviderError> {
        let mut args = vec![
            "ec2".to_string(),
            "run-instances".to_string(),
            "--image-id".to_string(),
            template.image.clone(),
            "--instance-type".to_string(),
            template.instance_type.clone(),
            // min 1: EC2 lanza lo que pueda en vez de fallar todo
            "--count".to_string(),
            format!("1:{count}"),
            "--tag-specifications".to_string(),
            format!("ResourceType=instance,Tags=[{{Key=group,Value={group}}}]"),
        ];
        if let Some(key) = &template.key_pair {
            args.push("--key-name".to_string());
            args.push(key.clone());
        }

        let stdout = self.aws(&args).await?;
        let launched: RunInstancesOutput =
            serde_json::from_slice(&stdout).map_err(|e| ProviderError::Parse(e.to_string()))?;
        let ids: Vec<String> = launched
            .instances
            .into_iter()
            .map(|i| i.instance_id)
            .collect();
        info!("EC2 lanzó {}/{} instancias en {}", ids.len(), count, group);
        if ids.is_empty() {
            return Err(ProviderError::Command("EC2 no lanzó ninguna instancia".to_string()));
        }

        // Esperar a que arranquen; si alguna no llega, describe lo dirá
        let mut wait = vec![
            "ec2".to_string(),
            "wait".to_string(),
            "instance-running".to_string(),
            "--instance-ids".to_string(),
        ];
        wait.extend(ids.iter().cloned());
        if let Err(e) = self.aws(&wait).await {
            warn!("no todas las instancias llegaron a running: {}", e);
        }

        let instances = self.describe(&ids).await?;
        let mut result = classify(instances);

        for _ in ids.len()..count as usize {
            result.failed.push(NodeFailure {
                id: None,
                reason: "EC2 no lanzó la instancia (capacidad)".to_string(),
            });
        }
        Ok(result)
    }

    async fn destroy_node(&self, id: &str) -> Result<(), ProviderError> {
        self.aws(&[
            "ec2".to_string(),
            "terminate-instances".to_string(),
            "--instance-ids".to_string(),
            id.to_string(),
        ])
        .await?;
        Ok(())
    }
}

/* ---------- respuestas JSON del CLI ---------- */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunInstancesOutput {
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    #[serde(default)]
    public_ip_address: Option<String>,
    #[serde(default)]
    state: Option<InstanceState>,
    #[serde(default)]
    cpu_options: Option<CpuOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CpuOptions {
    core_count: u32,
    threads_per_core: u32,
}

/// Separa instancias utilizables (running y con IP pública) del resto.
fn classify(instances: Vec<Instance>) -> CreateNodesResult {
    let mut result = CreateNodesResult::default();

    for inst in instances {
        let state = inst
            .state
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("unknown");

        match (state, inst.public_ip_address) {
            ("running", Some(address)) => {
                let processors = inst
                    .cpu_options
                    .map(|c| c.core_count * c.threads_per_core)
                    .unwrap_or(1);
                result.nodes.push(NodeInfo {
                    id: inst.instance_id,
                    address,
                    processors,
                });
            }
            (state, _) => result.failed.push(NodeFailure {
                reason: format!("instancia {} en estado {}", inst.instance_id, state),
                id: Some(inst.instance_id),
            }),
        }
    }

    result
}
