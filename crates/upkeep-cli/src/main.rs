//! Upkeep - policy-driven maintenance automation
//!
//! ## Commands
//!
//! - `init`: Write a default policy file
//! - `validate`: Check a policy file without running anything
//! - `analyze`: Show which dependency updates the policy would approve
//! - `run`: Run updates, scans and backups and deliver the report
//! - `backups`: List cataloged backups
//! - `prune`: Apply retention to the backup catalog

mod adapters;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use upkeep_core::notifier::render;
use upkeep_core::telemetry::init_tracing;
use upkeep_core::{
    BackupEngine, DependencyEngine, Granularity, NotificationTransport, Notifier, Orchestrator,
    OverallStatus, PolicyFile, PolicyModel, RunAction, RunRequest, SecurityScanner,
};
use upkeep_state::{FsBackupCatalog, FsStorageBackend};

use adapters::{
    CommandInstaller, CommandTestRunner, DirectorySnapshotSource, IntegrationConfig,
    InventoryFileProvider, LogTransport, WebhookTransport,
};

const DEFAULT_BACKUP_DIR: &str = ".upkeep/backups";

#[derive(Parser)]
#[command(name = "upkeep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Policy-driven maintenance automation", long_about = None)]
struct Cli {
    /// Policy file
    #[arg(
        short,
        long,
        global = true,
        env = "UPKEEP_POLICY",
        default_value = "maintenance_policies.yaml"
    )]
    policy: PathBuf,

    /// Slack incoming webhook; overrides the policy file
    #[arg(long, global = true, env = "SLACK_WEBHOOK", hide_env_values = true)]
    slack_webhook: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default policy file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Parse and validate the policy file
    Validate,

    /// Show update decisions without applying anything
    Analyze,

    /// Run maintenance actions
    Run {
        /// Apply approved dependency updates
        #[arg(long)]
        update: bool,

        /// Run security scans
        #[arg(long)]
        scan: bool,

        /// Create a backup and apply retention
        #[arg(long)]
        backup: bool,

        /// Shorthand for --update --scan --backup
        #[arg(long)]
        all: bool,

        /// Scheduled run: backups only happen when due
        #[arg(long)]
        scheduled: bool,

        /// Backup bucket for manual runs
        #[arg(long, conflicts_with = "scheduled")]
        granularity: Option<Granularity>,
    },

    /// List cataloged backups, oldest first
    Backups,

    /// Delete backups beyond the retention policy
    Prune,
}

/// Policy plus the wiring read from its `integrations` section.
struct Loaded {
    policy: PolicyModel,
    file: PolicyFile,
    integrations: IntegrationConfig,
}

impl Loaded {
    fn load(path: &Path) -> Result<Self> {
        let file = PolicyFile::load(path)?;
        let policy = file.to_policy()?;
        let integrations = IntegrationConfig::from_value(file.integrations.as_ref())?;
        Ok(Self {
            policy,
            file,
            integrations,
        })
    }

    fn backup_destination(&self) -> PathBuf {
        self.integrations
            .backup_destination
            .clone()
            .or_else(|| self.file.backup_directory().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR))
    }

    fn dependency_engine(&self) -> Option<DependencyEngine> {
        let inventory = self.integrations.inventory_file.as_ref()?;
        let Some(install) = self.integrations.install_command.clone() else {
            warn!("inventory_file is set but install_command is not; updates disabled");
            return None;
        };
        if self.integrations.test_command.is_none() && self.policy.dependencies.test_before_update
        {
            warn!("No test_command configured; every applied update will fail its gate");
        }
        Some(DependencyEngine::new(
            Arc::new(InventoryFileProvider::new(inventory)),
            Arc::new(CommandInstaller::new(install)),
            Arc::new(CommandTestRunner::new(
                self.integrations.test_command.clone(),
            )),
            self.policy.timeouts,
        ))
    }

    fn security_scanner(&self) -> Result<SecurityScanner> {
        let scanner = self
            .integrations
            .scan_adapters()?
            .into_iter()
            .fold(SecurityScanner::new(self.policy.timeouts.scan), |s, a| {
                s.with_adapter(Arc::new(a))
            });
        Ok(scanner)
    }

    fn backup_engine(&self) -> Result<BackupEngine> {
        let destination = self.backup_destination();
        let storage = FsStorageBackend::new(&destination)
            .with_context(|| format!("Failed to open backup storage {}", destination.display()))?;
        let catalog_path = self
            .integrations
            .catalog_file
            .clone()
            .unwrap_or_else(|| destination.join("catalog.json"));
        let catalog = FsBackupCatalog::open(&catalog_path)
            .with_context(|| format!("Failed to open catalog {}", catalog_path.display()))?;

        let root = self
            .integrations
            .backup_source
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let source = DirectorySnapshotSource::new(&root)
            .excluding(&destination)
            .excluding(root.join(&destination));

        Ok(BackupEngine::new(
            Arc::new(source),
            Arc::new(storage),
            Arc::new(catalog),
            self.policy.timeouts,
        ))
    }

    /// Wire every engine the request needs. A backup engine that cannot be
    /// opened fails only the backup section of the run.
    fn orchestrator(&self, webhook: Option<&str>, request: &RunRequest) -> Result<Orchestrator> {
        let mut orchestrator = Orchestrator::new(self.policy.clone())?
            .with_security_scanner(self.security_scanner()?)
            .with_notifier(self.notifier(webhook));
        if let Some(engine) = self.dependency_engine() {
            orchestrator = orchestrator.with_dependency_engine(engine);
        }
        if request.requests(RunAction::Backup) && self.policy.backup.enabled {
            orchestrator = match self.backup_engine() {
                Ok(engine) => orchestrator.with_backup_engine(engine),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Backup engine unavailable");
                    orchestrator.with_backup_unavailable(format!("{e:#}"))
                }
            };
        }
        Ok(orchestrator)
    }

    fn notifier(&self, webhook_override: Option<&str>) -> Notifier {
        let webhook = webhook_override
            .map(str::to_string)
            .or_else(|| self.policy.notifications.slack_webhook.clone());
        let transport: Arc<dyn NotificationTransport> = match webhook {
            Some(url) => Arc::new(WebhookTransport::new(url)),
            None => Arc::new(LogTransport),
        };
        Notifier::new(vec![transport], self.policy.timeouts.notify)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.log_json, level);

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.policy, force),
        Commands::Validate => cmd_validate(&cli.policy, cli.json),
        Commands::Analyze => cmd_analyze(&cli.policy, cli.json).await,
        Commands::Run {
            update,
            scan,
            backup,
            all,
            scheduled,
            granularity,
        } => {
            let mut actions = BTreeSet::new();
            if update || all {
                actions.insert(RunAction::Update);
            }
            if scan || all {
                actions.insert(RunAction::Scan);
            }
            if backup || all {
                actions.insert(RunAction::Backup);
            }
            if actions.is_empty() {
                bail!("Nothing to run: pass --update, --scan, --backup or --all");
            }
            let request = if scheduled {
                RunRequest::scheduled(actions, chrono::Utc::now())
            } else {
                let request = RunRequest::manual(actions);
                match granularity {
                    Some(g) => request.with_granularity(g),
                    None => request,
                }
            };
            cmd_run(&cli.policy, cli.slack_webhook.as_deref(), request, cli.json).await
        }
        Commands::Backups => cmd_backups(&cli.policy, cli.json).await,
        Commands::Prune => cmd_prune(&cli.policy, cli.json).await,
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let document = PolicyFile::default_document()?;
    std::fs::write(path, document)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✓ Wrote default policy to {}", path.display());
    Ok(())
}

fn cmd_validate(path: &Path, json: bool) -> Result<()> {
    let loaded = Loaded::load(path)?;
    loaded.security_scanner()?;
    if json {
        println!("{}", serde_json::json!({ "valid": true, "policy": path }));
        return Ok(());
    }
    let policy = &loaded.policy;
    println!("✓ {} is valid", path.display());
    println!(
        "  Dependencies: patch={} minor={} security_override={} cap={}",
        policy.dependencies.auto_update_patch,
        policy.dependencies.auto_update_minor,
        policy.dependencies.security_override,
        policy.dependencies.max_updates_per_run
    );
    println!(
        "  Critical:     {}",
        policy.dependencies.critical_packages().collect::<Vec<_>>().join(", ")
    );
    println!(
        "  Scans:        {}",
        policy
            .security
            .scan_categories
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Backups:      enabled={} every {}d at {:02}:00, keep {}/{}/{}",
        policy.backup.enabled,
        policy.backup.schedule.frequency_days,
        policy.backup.schedule.hour_of_day,
        policy.backup.retention.daily,
        policy.backup.retention.weekly,
        policy.backup.retention.monthly
    );
    let wiring = &loaded.integrations;
    println!(
        "  Updates:      {}",
        match (&wiring.inventory_file, &wiring.install_command) {
            (Some(inventory), Some(_)) => format!("wired (inventory {})", inventory.display()),
            _ => "not wired".to_string(),
        }
    );
    println!(
        "  Scan tools:   {}",
        if wiring.scan_commands.is_empty() {
            "none".to_string()
        } else {
            wiring.scan_commands.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    );
    println!("  Backup dir:   {}", loaded.backup_destination().display());
    Ok(())
}

async fn cmd_analyze(path: &Path, json: bool) -> Result<()> {
    let loaded = Loaded::load(path)?;
    let Some(engine) = loaded.dependency_engine() else {
        bail!("Dependency updates need integrations.inventory_file and install_command");
    };
    let analysis = engine.analyze(&loaded.policy.dependencies).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }
    if analysis.decisions.is_empty() {
        println!("All packages are up to date.");
    }
    for d in &analysis.decisions {
        let c = &d.candidate;
        println!(
            "{:<16} {:<24} {} -> {} ({}{})  {}",
            d.kind.to_string(),
            c.name,
            c.current_version,
            c.available_version,
            c.version_delta,
            c.advisory_severity
                .map(|s| format!(", {s} advisory"))
                .unwrap_or_default(),
            d.reason
        );
    }
    for issue in &analysis.issues {
        println!("! {}: {}", issue.package, issue.detail);
    }
    Ok(())
}

async fn cmd_run(
    path: &Path,
    webhook: Option<&str>,
    request: RunRequest,
    json: bool,
) -> Result<()> {
    let loaded = Loaded::load(path)?;
    let orchestrator = loaded.orchestrator(webhook, &request)?;

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight work and stopping");
            cancel.cancel();
        }
    });

    let report = orchestrator.run(request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let formatted = render(&report, loaded.policy.security.notification_threshold);
        println!("{}", formatted.to_text());
    }

    info!(run_id = %report.run_id, status = %report.overall_status, "Run finished");
    if report.overall_status == OverallStatus::Failed {
        bail!("Run {} failed", report.run_id);
    }
    Ok(())
}

async fn cmd_backups(path: &Path, json: bool) -> Result<()> {
    let loaded = Loaded::load(path)?;
    let artifacts = loaded.backup_engine()?.artifacts().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }
    if artifacts.is_empty() {
        println!("No backups cataloged.");
        return Ok(());
    }
    for a in &artifacts {
        println!(
            "{:<8} {}  {:>10} bytes  {}",
            a.granularity.to_string(),
            a.created_at.format("%Y-%m-%d %H:%M:%S"),
            a.size_bytes,
            a.id
        );
    }
    Ok(())
}

async fn cmd_prune(path: &Path, json: bool) -> Result<()> {
    let loaded = Loaded::load(path)?;
    let report = loaded
        .backup_engine()?
        .prune(&loaded.policy.backup.retention)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("✓ Removed {} backup(s)", report.removed.len());
        for f in &report.failed {
            println!("✗ {}: {}", f.artifact.id, f.error);
        }
        for orphan in &report.orphans {
            println!("? Uncataloged payload {orphan}");
        }
    }
    if !report.failed.is_empty() {
        bail!("{} backup(s) could not be removed", report.failed.len());
    }
    Ok(())
}
