//! Entry point for the sandbox guest storage agent.

#[cfg(not(target_os = "linux"))]
compile_error!("The sandbox guest agent is Linux-only; build with a Linux target");

#[cfg(target_os = "linux")]
mod config;
#[cfg(target_os = "linux")]
mod sandbox;
#[cfg(target_os = "linux")]
mod service;
#[cfg(target_os = "linux")]
mod storage;

#[cfg(target_os = "linux")]
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::path::{Path, PathBuf};
#[cfg(target_os = "linux")]
use std::sync::Arc;

#[cfg(target_os = "linux")]
use agent_shared::{AgentError, AgentResult, StorageDescriptor};
#[cfg(target_os = "linux")]
use clap::Parser;
#[cfg(target_os = "linux")]
use tracing::info;

#[cfg(target_os = "linux")]
use crate::config::StorageConfig;
#[cfg(target_os = "linux")]
use crate::sandbox::Sandbox;
#[cfg(target_os = "linux")]
use crate::service::StorageService;
#[cfg(target_os = "linux")]
use crate::storage::{HandlerRegistry, StorageOrchestrator};

/// Sandbox guest agent - attaches host-provided storages inside the VM
#[cfg(target_os = "linux")]
#[derive(Parser, Debug)]
#[command(author, version, about = "Sandbox guest agent - storage attachment")]
struct AgentArgs {
    /// JSON array of storage descriptors; `null` entries are skipped
    #[arg(short, long)]
    storages: PathBuf,

    /// JSON storage configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON object mapping PCI paths to device nodes, as the hotplug
    /// listener would record them
    ///
    /// Example: {"0000:00:02.0/0000:01:03.0": "/dev/vdb"}
    #[arg(short, long)]
    devices: Option<PathBuf>,

    /// Override the sysfs root used for PCI topology discovery
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Override the number of attach attempts
    #[arg(long)]
    retries: Option<u32>,
}

#[cfg(target_os = "linux")]
impl AgentArgs {
    fn load_config(&self) -> AgentResult<StorageConfig> {
        let mut config = match &self.config {
            Some(path) => StorageConfig::load(path)?,
            None => StorageConfig::default(),
        };
        if let Some(root) = &self.sysfs_root {
            config.sysfs_root = root.clone();
        }
        if let Some(attempts) = self.retries {
            config.retry.attempts = attempts.max(1);
        }
        Ok(config)
    }
}

#[cfg(target_os = "linux")]
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> AgentResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> AgentResult<()> {
    // Set panic hook to ensure we see panics
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("[PANIC] Guest agent panicked: {}", panic_info);
        std::process::exit(1);
    }));

    // Initialize tracing subscriber - respects RUST_LOG env var
    // Default to "error" level if RUST_LOG is not set
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    let args = AgentArgs::parse();
    let config = args.load_config()?;
    info!("Guest storage agent starting (sysfs at {})", config.sysfs_root.display());

    let sandbox = Arc::new(Sandbox::new());
    if let Some(path) = &args.devices {
        let devices: HashMap<String, String> = read_json(path)?;
        info!("Preloading {} hotplugged devices", devices.len());
        for (pci_path, dev_path) in devices {
            sandbox.record_device(pci_path, dev_path);
        }
    }

    let descriptors: Vec<Option<StorageDescriptor>> = read_json(&args.storages)?;
    info!("Attaching {} storages", descriptors.len());

    let orchestrator = StorageOrchestrator::new(HandlerRegistry::default(), config);
    let service = StorageService::new(orchestrator, sandbox);
    let mounted = service.attach(descriptors).await?;

    println!("{}", serde_json::to_string(&mounted)?);
    Ok(())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = AgentArgs::parse_from([
            "sandbox-agent",
            "--storages",
            "/run/storages.json",
            "--sysfs-root",
            "/tmp/sys",
            "--retries",
            "0",
        ]);
        assert_eq!(args.storages, PathBuf::from("/run/storages.json"));
        assert!(args.config.is_none());

        let config = args.load_config().unwrap();
        assert_eq!(config.sysfs_root, PathBuf::from("/tmp/sys"));
        assert_eq!(config.retry.attempts, 1);
    }

    #[test]
    fn test_read_json_descriptors() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"[null, {"driver": "local", "mountPoint": "/run/shared"}]"#,
        )
        .unwrap();
        let batch: Vec<Option<StorageDescriptor>> = read_json(tmp.path()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].as_ref().unwrap().mount_point, "/run/shared");

        let err = read_json::<Vec<Option<StorageDescriptor>>>(Path::new("/nonexistent"));
        assert!(matches!(err, Err(AgentError::Config(_))));
    }
}
