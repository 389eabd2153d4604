use std::sync::Arc;

use topicscan::config::{AiConfig, NotifyConfig, RetryConfig, ScanConfig, SchedulerConfig};
use topicscan::llm::{TopicGenerator, create_provider};
use topicscan::mail::{ImapConfig, ImapMailProvider, MailProvider};
use topicscan::notify::{EmailNotifier, Notifier, SmtpConfig, WebhookNotifier};
use topicscan::pipeline::{Classifier, ScanPipeline};
use topicscan::scheduler::ScanScheduler;
use topicscan::store::{LibSqlBackend, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let scan_config = ScanConfig::from_env();
    let scheduler_config = SchedulerConfig::from_env();
    let retry_config = RetryConfig::from_env();
    let notify_config = NotifyConfig::from_env();
    let ai_config = AiConfig::from_env()?;

    eprintln!("📬 topicscan v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", ai_config.model);
    eprintln!(
        "   Scan times: {} ({})",
        scheduler_config.scan_times.join(", "),
        scheduler_config.timezone
    );
    eprintln!("   Labels: {}", scan_config.labels.join(", "));

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("TOPICSCAN_DB_PATH").unwrap_or_else(|_| "./data/topicscan.db".to_string());
    let store: Arc<dyn Store> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", db_path);

    // ── Collaborators ────────────────────────────────────────────────────
    let llm = create_provider(&ai_config)?;
    let generator = TopicGenerator::new(
        llm,
        ai_config,
        retry_config.clone(),
        scan_config.max_topics_per_scan,
    );

    let imap_config = ImapConfig::from_env()?;
    eprintln!("   IMAP: {}:{}", imap_config.host, imap_config.port);
    let mail: Arc<dyn MailProvider> = Arc::new(ImapMailProvider::new(imap_config));

    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(ref email_to) = notify_config.email_to {
        let smtp_config = SmtpConfig::from_env()?;
        eprintln!("   Notify email: {}", email_to);
        notifiers.push(Arc::new(EmailNotifier::new(smtp_config, email_to.clone())));
    }
    if let Some(ref url) = notify_config.webhook_url {
        eprintln!("   Notify webhook: {}", url);
        notifiers.push(Arc::new(WebhookNotifier::new(url.clone())));
    }
    if notifiers.is_empty() {
        eprintln!("   Notify: disabled");
    }

    // ── Pipeline + scheduler ─────────────────────────────────────────────
    let classifier = Classifier::with_default_rules(scan_config.relevance_threshold);
    let pipeline = Arc::new(ScanPipeline::new(
        mail,
        generator,
        Arc::clone(&store),
        notifiers,
        notify_config,
        classifier,
        scan_config,
        retry_config,
    ));

    let scheduler = Arc::new(ScanScheduler::new(scheduler_config, pipeline, store)?);
    let ticker = Arc::clone(&scheduler).start();

    if std::env::var("TOPICSCAN_RUN_NOW").is_ok() {
        scheduler.trigger_now().await;
    }

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down...");
    scheduler.shutdown();
    ticker.await?;

    Ok(())
}
