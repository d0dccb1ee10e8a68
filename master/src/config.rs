use std::{env, path::PathBuf, time::Duration};

use common::{NodeTemplate, RemoteLayout, RenderSettings};
use worker::{SshConfig, StepTimeouts};

pub const DEFAULT_INSTANCE_TYPE: &str = "t1.micro";
/// Última AMI de Amazon Linux, resuelta por EC2 vía SSM
pub const DEFAULT_IMAGE: &str =
    "resolve:ssm:/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";
pub const DEFAULT_REGION: &str = "us-west-1";
pub const DEFAULT_GROUP: &str = "homework5";
pub const DEFAULT_SSH_USER: &str = "ec2-user";
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 5 * 60;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30 * 60;

pub const POVRAY_DIR: &str = "povray";
pub const MERGE_TOOL: &str = "gm";
pub const RESULT_FILE: &str = "result.gif";

/// Configuración del job. Todo tiene default y se puede pisar con
/// variables de entorno `RENDER_*`.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub template: NodeTemplate,
    /// Prefijo del grupo de instancias; se le agrega el id del job
    pub group: String,
    pub ssh_user: String,
    pub ssh_key: Option<PathBuf>,
    /// Pipelines corriendo a la vez; None = uno por worker
    pub max_concurrency: Option<usize>,
    pub timeouts: StepTimeouts,
    /// Directorio con `povray/` y donde se crea `results/`
    pub local_dir: PathBuf,
    pub settings: RenderSettings,
    pub layout: RemoteLayout,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            template: NodeTemplate {
                instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
                image: DEFAULT_IMAGE.to_string(),
                region: DEFAULT_REGION.to_string(),
                key_pair: None,
            },
            group: DEFAULT_GROUP.to_string(),
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_key: None,
            max_concurrency: None,
            timeouts: StepTimeouts {
                step: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
                execute: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            },
            local_dir: PathBuf::from("."),
            settings: RenderSettings::default(),
            layout: RemoteLayout::default(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|s| s.parse::<T>().ok())
}

impl RenderConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let local_dir = env_string("RENDER_LOCAL_DIR")
            .map(PathBuf::from)
            .or_else(|| env::current_dir().ok())
            .unwrap_or(d.local_dir);

        Self {
            template: NodeTemplate {
                instance_type: env_string("RENDER_INSTANCE_TYPE")
                    .unwrap_or(d.template.instance_type),
                image: env_string("RENDER_OS_IMAGE").unwrap_or(d.template.image),
                region: env_string("RENDER_REGION").unwrap_or(d.template.region),
                key_pair: env_string("RENDER_KEY_PAIR"),
            },
            group: env_string("RENDER_GROUP").unwrap_or(d.group),
            ssh_user: env_string("RENDER_SSH_USER").unwrap_or(d.ssh_user),
            ssh_key: env_string("RENDER_SSH_KEY").map(PathBuf::from),
            max_concurrency: env_parse::<usize>("RENDER_MAX_CONCURRENCY").filter(|n| *n > 0),
            timeouts: StepTimeouts {
                step: env_parse::<u64>("RENDER_STEP_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(d.timeouts.step),
                execute: env_parse::<u64>("RENDER_EXEC_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(d.timeouts.execute),
            },
            local_dir,
            settings: d.settings,
            layout: d.layout,
        }
    }

    pub fn renderer_path(&self) -> PathBuf {
        self.local_dir.join(POVRAY_DIR).join(common::task::RENDERER)
    }

    pub fn scene_path(&self) -> PathBuf {
        self.local_dir.join(POVRAY_DIR).join(common::task::SCENE)
    }

    pub fn merge_tool(&self) -> PathBuf {
        self.local_dir.join(POVRAY_DIR).join(MERGE_TOOL)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.local_dir.join(common::task::RESULTS)
    }

    pub fn ssh_config(&self) -> SshConfig {
        SshConfig {
            user: self.ssh_user.clone(),
            identity_file: self.ssh_key.clone(),
            ..SshConfig::default()
        }
    }
}
