use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kickerd::config::Config;
use kickerd::daemon::Daemon;
use kickerd::error::KickerError;
use kickerd::lock::KvLocker;
use kickerd::queue::sqs::queue_url;
use kickerd::queue::{MessageQueue, SqsQueue};
use kickerd::shutdown::install_shutdown_handler;
use kickerd::store::{ConditionalStore, DynamoStore};
use kickerd::throttle::{KvThrottle, Sweeper};

#[derive(Parser, Debug)]
#[command(name = "kickerd", version)]
#[command(about = "A queue-driven job kicker daemon with fleet-wide dedup and locking")]
struct Args {
    /// Config file path
    #[arg(long, default_value = "/etc/kickerd/config.toml")]
    conf: String,

    /// Log level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// AWS profile override
    #[arg(long)]
    profile: Option<String>,

    /// AWS region override
    #[arg(long)]
    region: Option<String>,

    /// DynamoDB table for lock records
    #[arg(long)]
    lock_table: Option<String>,

    /// DynamoDB table for throttle records
    #[arg(long)]
    throttle_table: Option<String>,

    /// Stats api unix domain socket path
    #[arg(long)]
    stats_socket: Option<String>,

    /// Stats api tcp port
    #[arg(long)]
    stats_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let mut config = Config::from_file(&args.conf)?;

    // Flags override the config file.
    if let Some(profile) = args.profile {
        config.account.profile = profile;
    }
    if let Some(region) = args.region {
        config.account.region = region;
    }
    if let Some(table) = args.lock_table {
        config.store.lock_table = table;
    }
    if let Some(table) = args.throttle_table {
        config.store.throttle_table = table;
    }
    if let Some(sock) = args.stats_socket {
        config.set_stats_socket(sock)?;
    }
    if let Some(port) = args.stats_port {
        config.set_stats_port(port)?;
    }
    config.validate()?;

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.account.region.clone()));
    if !config.account.profile.is_empty() {
        loader = loader.profile_name(&config.account.profile);
    }
    let aws_conf = loader.load().await;

    let url = queue_url(
        &config.account.region,
        &config.account.id,
        &config.queue.queue_name,
    );
    tracing::info!(queue_url = %url, "starting kickerd");

    let queue = Arc::new(SqsQueue::new(aws_sdk_sqs::Client::new(&aws_conf), url));
    let retention_period = queue
        .retention_period()
        .await
        .map_err(KickerError::Queue)?;
    tracing::info!(retention_period = ?retention_period, "described queue");

    let mut daemon = Daemon::new(config.clone(), queue);

    if !config.store.lock_table.is_empty() {
        let store = Arc::new(DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&aws_conf),
            config.store.lock_table.clone(),
        ));
        daemon.set_locker(Arc::new(KvLocker::new(store)));
    }

    if !config.store.throttle_table.is_empty() {
        let store: Arc<dyn ConditionalStore> = Arc::new(DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&aws_conf),
            config.store.throttle_table.clone(),
        ));
        daemon.set_throttle(Arc::new(KvThrottle::new(store.clone(), retention_period)));
        daemon.set_sweeper(Sweeper::new(store).await.map_err(KickerError::Store)?);
    }

    let token = install_shutdown_handler();
    daemon.run(token).await?;

    Ok(())
}
