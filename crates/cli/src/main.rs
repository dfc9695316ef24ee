use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{builder::BoolishValueParser, Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use tracing::{error, info};

use keel_api::{check_rollout, AdmissionApi, AdmissionEngine, Verdict};
use keel_core::{AppConfig, Application, CallerIdentity, EngineConfig, ObjectMeta, ValidationSnapshot};
use keel_kubehub::KubeHub;
use keel_rollout::{plan_even, Rollout};

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel admission checks")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for manifests that do not set one
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

/// Overrides for the `KEEL_*` engine settings; anything unset keeps its environment value.
#[derive(Args, Debug)]
struct EngineArgs {
    /// Trusted namespace searched first for definitions [env: KEEL_SYSTEM_NAMESPACE]
    #[arg(long, global = true)]
    system_namespace: Option<String>,
    /// Retries for a component that is not visible yet [env: KEEL_FETCH_MAX_RETRIES]
    #[arg(long, global = true)]
    fetch_retries: Option<u32>,
    /// [env: KEEL_FETCH_BACKOFF_MS]
    #[arg(long, global = true)]
    fetch_backoff_ms: Option<u64>,
    /// [env: KEEL_FETCH_BACKOFF_MAX_MS]
    #[arg(long, global = true)]
    fetch_backoff_max_ms: Option<u64>,
    /// Check that the caller may use every definition an application references [env: KEEL_VALIDATE_PERMISSIONS]
    #[arg(long, global = true, value_parser = BoolishValueParser::new(), action = clap::ArgAction::Set)]
    validate_permissions: Option<bool>,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        self.apply(EngineConfig::from_env())
    }

    fn apply(&self, mut cfg: EngineConfig) -> EngineConfig {
        if let Some(ns) = &self.system_namespace {
            cfg.system_namespace = ns.clone();
        }
        if let Some(n) = self.fetch_retries {
            cfg.fetch_retry.max_retries = n;
        }
        if let Some(ms) = self.fetch_backoff_ms {
            cfg.fetch_retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.fetch_backoff_max_ms {
            cfg.fetch_retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(on) = self.validate_permissions {
            cfg.validate_permissions = on;
        }
        cfg
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split a replica count into rollout batches
    Plan {
        total: i32,
        batches: i32,
    },
    /// Default and check a Rollout manifest (offline)
    CheckRollout {
        file: PathBuf,
    },
    /// Review an ApplicationConfiguration against the cluster
    CheckAppconfig {
        file: PathBuf,
    },
    /// Review an Application on behalf of a user
    CheckApp {
        file: PathBuf,
        /// User the request is made as
        #[arg(long)]
        user: String,
        /// Groups of that user (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,
    },
    /// Resolve an ApplicationConfiguration and print what validation would see
    Resolve {
        file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn default_namespace(meta: &mut ObjectMeta, ns: Option<&str>) {
    if meta.namespace.is_none() {
        meta.namespace = ns.map(str::to_string);
    }
}

async fn engine(cli: &Cli) -> Result<AdmissionEngine> {
    let hub = KubeHub::connect().await?;
    Ok(AdmissionEngine::new(Arc::new(hub.reader), Arc::new(hub.access), Arc::new(hub.mapper), cli.engine.config()))
}

fn report(output: Output, verdict: &Verdict) -> Result<()> {
    match output {
        Output::Human => {
            if verdict.allowed {
                println!("admitted");
            } else {
                println!("rejected:");
                for e in &verdict.errors {
                    println!("  {}", e);
                }
            }
            if let Some(patched) = &verdict.patched {
                println!("defaulted object:");
                print!("{}", serde_yaml::to_string(patched)?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(verdict)?),
    }
    if !verdict.allowed {
        bail!("{}", verdict.reason());
    }
    Ok(())
}

fn print_snapshot(output: Output, snapshot: &ValidationSnapshot) -> Result<()> {
    if output == Output::Json {
        let components: Vec<serde_json::Value> = snapshot
            .components
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "workload": { "apiVersion": c.workload_view.api_version, "kind": c.workload_view.kind },
                    "workloadDefinition": c.workload_definition.name,
                    "traits": c.traits.iter().map(|t| serde_json::json!({
                        "apiVersion": t.view.api_version,
                        "kind": t.view.kind,
                        "definition": t.definition.name(),
                        "known": t.definition.known().is_some(),
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        let summary = serde_json::json!({ "name": snapshot.name, "namespace": snapshot.namespace, "components": components });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("{}/{}", snapshot.namespace, snapshot.name);
    for c in &snapshot.components {
        println!(
            "  {} • {} {} • workload {}",
            c.name,
            c.workload_view.api_version,
            c.workload_view.kind,
            c.workload_definition.name
        );
        for t in &c.traits {
            let state = if t.definition.known().is_some() { "" } else { " (unknown)" };
            println!("    trait {}/{} • {}{}", t.view.api_version, t.view.kind, t.definition.name(), state);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_deref();

    let outcome = match &cli.command {
        Commands::Plan { total, batches } => {
            let sizes = plan_even(*total, *batches)?;
            match cli.output {
                Output::Human => println!("{}", sizes.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" ")),
                Output::Json => println!("{}", serde_json::to_string(&sizes)?),
            }
            Ok(())
        }
        Commands::CheckRollout { file } => {
            let mut rollout: Rollout = load(file)?;
            default_namespace(&mut rollout.metadata, ns);
            let verdict = check_rollout(&rollout)?;
            report(cli.output, &verdict)
        }
        Commands::CheckAppconfig { file } => {
            let mut config: AppConfig = load(file)?;
            default_namespace(&mut config.metadata, ns);
            info!(name = %config.metadata.name, components = config.spec.components.len(), "reviewing configuration");
            let verdict = engine(&cli).await?.review_app_config(&config).await?;
            report(cli.output, &verdict)
        }
        Commands::CheckApp { file, user, groups } => {
            let mut app: Application = load(file)?;
            default_namespace(&mut app.metadata, ns);
            let caller = CallerIdentity::new(user.clone(), groups.iter().cloned());
            let verdict = engine(&cli).await?.review_application(&app, &caller).await?;
            report(cli.output, &verdict)
        }
        Commands::Resolve { file } => {
            let mut config: AppConfig = load(file)?;
            default_namespace(&mut config.metadata, ns);
            let snapshot = engine(&cli).await?.resolve(&config).await?;
            print_snapshot(cli.output, &snapshot)
        }
    };
    if let Err(e) = &outcome {
        error!(error = %e, "command failed");
    }
    outcome
}
