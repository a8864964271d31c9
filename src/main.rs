//! dlp-sentinel - sensitivity classification and access response for S3
//!
//! Scans a bucket with the local rule table or a Macie job, writes the
//! sensitivity tag on every object, and evaluates access events against
//! HIGH objects.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use dlp_sentinel::provider::aws::{
    self, IamIdentityService, MacieClassifier, S3ObjectStore, SesEmailNotifier, SnsNotifier,
};
use dlp_sentinel::types::{ObjectPage, TagSet};
use dlp_sentinel::{
    split_records, AccessResponder, BucketScanner, Decision, IdentityService,
    MaciePipeline, MemoryIdentityService, MemoryNotifier, NatsNotifier, Notifier, ObjectRef,
    ObjectStore, ScanSummary, SentinelConfig, TagReconciler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dlp-sentinel")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Sensitivity classification, tagging and access response for S3")]
struct Cli {
    /// Configuration file path (.toml)
    #[arg(short, long, env = "DLP_SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Read from AWS but perform no writes: tags are logged, principals
    /// are not disabled and alerts are printed instead of sent.
    /// Not available for `macie`, which has to create identifiers and a job.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every object in a bucket with the local rule table
    Scan {
        /// Bucket to scan
        bucket: String,
    },

    /// Classify a bucket with a Macie job and tag from its findings
    Macie {
        /// Bucket to scan
        bucket: String,
    },

    /// Evaluate access events from a file, or stdin when omitted
    Respond {
        /// JSON file with one event, an array, or a CloudTrail `Records` log
        file: Option<PathBuf>,
    },

    /// Print the active rule table
    Rules,
}

/// Object store wrapper that reads through and drops tag writes
struct DryRunStore {
    inner: Arc<dyn ObjectStore>,
}

#[async_trait]
impl ObjectStore for DryRunStore {
    async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<&str>,
    ) -> dlp_sentinel::Result<ObjectPage> {
        self.inner.list_objects(bucket, continuation).await
    }

    async fn get_object(&self, object: &ObjectRef) -> dlp_sentinel::Result<Bytes> {
        self.inner.get_object(object).await
    }

    async fn get_tags(&self, object: &ObjectRef) -> dlp_sentinel::Result<TagSet> {
        self.inner.get_tags(object).await
    }

    async fn put_tags(&self, object: &ObjectRef, tags: &TagSet) -> dlp_sentinel::Result<()> {
        tracing::info!(object = %object, tags = ?tags, "Dry run, tag write skipped");
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dlp_sentinel={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    check_dry_run(&cli)?;
    let config = SentinelConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Rules => print_rules(&config),
        Commands::Scan { bucket } => {
            let sdk = aws::load_sdk_config(&config.aws).await;
            let store = object_store(&sdk, cli.dry_run);
            let summary = BucketScanner::from_config(store, &config)?
                .scan_bucket(&bucket)
                .await;
            print_summary(&summary)
        }
        Commands::Macie { bucket } => {
            let sdk = aws::load_sdk_config(&config.aws).await;
            let account = aws::caller_account_id(&sdk).await?;
            let classifier = Arc::new(MacieClassifier::new(&sdk, account));
            let store = object_store(&sdk, cli.dry_run);
            let summary = MaciePipeline::from_config(classifier, store, &config)?
                .run(&bucket)
                .await
                .with_context(|| format!("Macie run over {} failed", bucket))?;
            print_summary(&summary)
        }
        Commands::Respond { file } => respond(&config, file, cli.dry_run).await,
    }
}

/// Reject `--dry-run` for commands that cannot run without writing
fn check_dry_run(cli: &Cli) -> Result<()> {
    if cli.dry_run && matches!(cli.command, Commands::Macie { .. }) {
        anyhow::bail!(
            "--dry-run is not supported for `macie`: a Macie run creates custom data \
             identifiers and a classification job"
        );
    }
    Ok(())
}

fn object_store(sdk: &aws_config::SdkConfig, dry_run: bool) -> Arc<dyn ObjectStore> {
    let s3: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(sdk));
    if dry_run {
        Arc::new(DryRunStore { inner: s3 })
    } else {
        s3
    }
}

fn print_rules(config: &SentinelConfig) -> Result<()> {
    for rule in config.rules() {
        println!(
            "{:<6} {:<22} {}  ({})",
            rule.tier.as_str(),
            rule.name,
            rule.pattern,
            rule.description
        );
    }
    Ok(())
}

fn print_summary(summary: &ScanSummary) -> Result<()> {
    let json =
        serde_json::to_string_pretty(summary).context("Failed to serialize scan summary")?;
    println!("{}", json);
    Ok(())
}

async fn notifiers(
    sdk: &aws_config::SdkConfig,
    config: &SentinelConfig,
) -> Result<Vec<Arc<dyn Notifier>>> {
    let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(ref topic) = config.notify.sns_topic_arn {
        channels.push(Arc::new(SnsNotifier::new(sdk, topic)));
    }
    if let Some(ref sender) = config.notify.email_sender {
        channels.push(Arc::new(SesEmailNotifier::new(
            sdk,
            sender,
            config.notify.email_recipients.clone(),
        )));
    }
    if let Some(ref nats) = config.notify.nats {
        let notifier = NatsNotifier::connect(nats.clone())
            .await
            .context("Failed to connect NATS alert channel")?;
        channels.push(Arc::new(notifier));
    }
    if channels.is_empty() {
        tracing::warn!("No notification channel configured, alerts will only be logged");
    }
    Ok(channels)
}

async fn read_payload(file: Option<PathBuf>) -> Result<serde_json::Value> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("Event payload is not valid JSON")
}

async fn respond(config: &SentinelConfig, file: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let payload = read_payload(file).await?;
    let sdk = aws::load_sdk_config(&config.aws).await;

    let store = object_store(&sdk, dry_run);
    let tags = TagReconciler::new(store, &config.scan.tag_key);
    let mut responder = AccessResponder::new(tags, config.responder.clone())?;

    let dry_notifier = Arc::new(MemoryNotifier::new("dry-run"));
    if dry_run {
        let identity: Arc<dyn IdentityService> = Arc::new(MemoryIdentityService::default());
        responder = responder
            .with_identity(identity)
            .with_notifier(dry_notifier.clone());
    } else {
        responder = responder.with_identity(Arc::new(IamIdentityService::new(&sdk)));
        for channel in notifiers(&sdk, config).await? {
            responder = responder.with_notifier(channel);
        }
    }

    for record in split_records(payload) {
        match responder.handle_payload(&record).await {
            Decision::Alerted(report) | Decision::Malformed(report) => {
                tracing::info!(
                    alert_id = %report.alert.id,
                    delivered = report.delivered(),
                    channels = report.deliveries.len(),
                    "Alert raised"
                );
            }
            Decision::Ignored {
                event_id, reason, ..
            } => tracing::info!(event_id = %event_id, reason = ?reason, "Event ignored"),
            Decision::Duplicate { event_id } => {
                tracing::info!(event_id = %event_id, "Duplicate event skipped")
            }
        }
    }

    if dry_run {
        for alert in dry_notifier.alerts().await {
            println!("{}\n", alert.render_text());
        }
    }
    Ok(())
}
