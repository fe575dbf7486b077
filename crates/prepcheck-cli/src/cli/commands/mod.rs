use super::args::*;
use prepcheck_core::config::{load_config, validate, HarnessConfig};
use prepcheck_core::engine::runner::{Runner, RunnerSettings};
use prepcheck_core::executor::memory::{Fault, MemoryBackend, MemoryFaults};
use prepcheck_core::executor::mysql::MysqlConnector;
use prepcheck_core::executor::Connector;
use prepcheck_core::model::{CacheMode, CachePolicy, EngineTarget};
use prepcheck_core::provision::container::ContainerProvisioner;
use prepcheck_core::provision::Provisioner;
use prepcheck_core::report::RunArtifacts;
use prepcheck_core::scenario::cache_boundary;
use prepcheck_core::storage::store::Store;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod history;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

const DEFAULT_CONFIG: &str = "prepcheck.yaml";

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => cmd_run(args).await,
        Command::Init(args) => cmd_init(args),
        Command::History(args) => history::cmd_history(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("note: {} already exists", args.config.display());
        return Ok(exit_codes::OK);
    }
    ensure_parent_dir(&args.config)?;
    prepcheck_core::config::write_sample_config(&args.config)?;
    eprintln!("created {}", args.config.display());
    Ok(exit_codes::OK)
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let cfg = match resolve_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let faults = match parse_faults(&args) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let reuse = args.reuse || cfg.settings.reuse_instances();
    let (provisioner, connector): (Arc<dyn Provisioner>, Arc<dyn Connector>) = match args.provisioner {
        ProvisionerKind::Memory => {
            let backend = Arc::new(MemoryBackend::new(reuse).with_faults(faults));
            (
                backend.clone() as Arc<dyn Provisioner>,
                backend as Arc<dyn Connector>,
            )
        }
        ProvisionerKind::Container => (
            Arc::new(ContainerProvisioner::new(reuse, cfg.settings.provision_timeout())) as Arc<dyn Provisioner>,
            Arc::new(MysqlConnector) as Arc<dyn Connector>,
        ),
    };

    let store = if args.no_db {
        None
    } else {
        let store = Store::open(&args.db)?;
        store.init_schema()?;
        Some(store)
    };

    let runner = Runner {
        provisioner,
        connector,
        settings: RunnerSettings::from(&cfg.settings),
        store,
    };
    let scenario = cache_boundary(&cfg.scenario);
    let artifacts = runner
        .run_matrix(&cfg.suite, &cfg.targets, &cfg.policies, &scenario)
        .await?;

    if let Some(path) = &args.json {
        ensure_parent_dir(path)?;
        prepcheck_core::report::json::write_json(&artifacts, path)?;
    }
    if let Some(path) = &args.junit {
        ensure_parent_dir(path)?;
        prepcheck_core::report::junit::write_junit(&artifacts, path)?;
    }
    prepcheck_core::report::console::print_summary(&artifacts);

    Ok(decide_exit_code(&artifacts))
}

/// Loads the config file (or defaults) and applies command-line overrides.
fn resolve_config(args: &RunArgs) -> anyhow::Result<HarnessConfig> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path, args.strict)?,
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(&PathBuf::from(DEFAULT_CONFIG), args.strict)?,
        None => {
            tracing::info!(event = "prepcheck.config.defaults", "no {} found, using built-in defaults", DEFAULT_CONFIG);
            HarnessConfig::default()
        }
    };

    if !args.targets.is_empty() {
        cfg.targets = args
            .targets
            .iter()
            .map(|t| t.parse::<EngineTarget>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("config error: {}", e))?;
    }
    if !args.policies.is_empty() {
        cfg.policies = args
            .policies
            .iter()
            .map(|p| p.parse::<CacheMode>().map(CachePolicy::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("config error: {}", e))?;
    }
    if let Some(n) = args.parallel {
        cfg.settings.parallel = Some(n);
    }
    validate(&cfg)?;
    Ok(cfg)
}

fn parse_faults(args: &RunArgs) -> anyhow::Result<MemoryFaults> {
    if !args.faults.is_empty() && args.provisioner != ProvisionerKind::Memory {
        anyhow::bail!("--fault only applies to --provisioner memory");
    }
    args.faults.iter().try_fold(MemoryFaults::default(), |acc, name| {
        let fault: Fault = name.parse().map_err(anyhow::Error::msg)?;
        Ok(acc.with(fault))
    })
}

fn decide_exit_code(artifacts: &RunArtifacts) -> i32 {
    if artifacts.ok() {
        exit_codes::OK
    } else {
        exit_codes::TEST_FAILED
    }
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
