use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use archive::{GatewayClient, GatewayConfig, TagFilter, Wallet, APP_NAME};
use cipher::{MasterKey, PackageCipher};
use db::{CounterSet, Database, StatsStore, TrackStore};
use keyshare_client::KeyShareClient;

use tracker::batcher::{Batcher, UuidCoupling};
use tracker::broadcast::StatsBroadcast;
use tracker::cli::{Cli, Commands};
use tracker::config::Config;
use tracker::feed::FeedClient;
use tracker::orchestrator::Orchestrator;
use tracker::pipeline::UploadPipeline;
use tracker::register::register_node;
use tracker::restore::restore_on_start;
use tracker::snapshot::{SnapshotBackup, BACKUP_KEY_ID};
use tracker::stats::{wall_clock_ms, PipelineKind, StatsRegister};
use tracker::uploader::{ClearUploader, EncryptedUploader, UploadContext};

/// How long shutdown waits for in-flight uploads to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    monitoring::init_logging()?;

    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => run_start(config).await,
        Commands::Register => run_register(config).await,
        Commands::Stats => run_stats(config).await,
        Commands::RestoreCheck => run_restore_check(config).await,
    }
}

async fn run_start(config: Config) -> Result<()> {
    // Fail fast on the two secrets the node cannot run without.
    let master = MasterKey::from_hex(&config.data.encryption_key)
        .context("data.encryption_key is unusable")?;
    let wallet = Arc::new(Wallet::load(&config.wallet_key_path())?);

    info!(
        "tracker {} starting: wallet {}, {} antennas, database {}",
        env!("CARGO_PKG_VERSION"),
        wallet.address(),
        config.enabled_antennas().count(),
        config.database.path
    );

    let database = Database::open(&config.database.path).await?;
    let conn = database.connection().clone();
    let package_cipher = Arc::new(PackageCipher::new(master));
    let gateway = Arc::new(GatewayClient::new(
        GatewayConfig {
            base_url: config.archive.gateway_url.clone(),
        },
        Arc::clone(&wallet),
    ));

    // Reconcile with the archived snapshot before the counters initialise.
    match restore_on_start(&conn, &gateway, &package_cipher).await {
        Ok(outcome) => info!("Snapshot restore: {:?}", outcome),
        Err(e) => warn!("Snapshot restore skipped: {:#}", e),
    }

    let boot_ms = wall_clock_ms();
    let stats_store = Arc::new(StatsStore::load_or_init(conn.clone(), boot_ms).await?);
    let row = stats_store.fetch().await?;
    let stats = StatsRegister::new(row.system_start_time);
    stats.load_counters(&CounterSet::from_row(&row));

    let keyshare = Arc::new(KeyShareClient::new(config.keyshare.url.clone()));
    let track_store = Arc::new(TrackStore::new(conn.clone()));
    let coupling = UuidCoupling::new();
    let source = config
        .enabled_antennas()
        .map(|a| a.id.clone())
        .collect::<Vec<_>>()
        .join(",");

    let ctx = Arc::new(UploadContext {
        gateway: Arc::clone(&gateway),
        cipher: Arc::clone(&package_cipher),
        keyshare,
        conn,
        track_store: Arc::clone(&track_store),
        stats: Arc::clone(&stats),
        coupling: Arc::clone(&coupling),
        source,
    });

    let clear_pipeline = UploadPipeline::new(
        "clear",
        Arc::new(ClearUploader::new(Arc::clone(&ctx))),
        stats.counters(PipelineKind::Clear),
        stats.clone(),
    );
    let encrypted_pipeline = UploadPipeline::new(
        "encrypted",
        Arc::new(EncryptedUploader::new(Arc::clone(&ctx))),
        stats.counters(PipelineKind::Encrypted),
        stats.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(
        Arc::clone(&stats).run_persistence(Arc::clone(&stats_store), stop_rx.clone()),
    );
    tokio::spawn(
        SnapshotBackup::new(
            Arc::clone(&stats_store),
            Arc::clone(&package_cipher),
            Arc::clone(&gateway),
        )
        .run(stop_rx.clone()),
    );
    let broadcast = StatsBroadcast::new(Arc::clone(&stats));
    tokio::spawn(Arc::clone(&broadcast).run(stop_rx.clone()));

    {
        // Informational; boot continues regardless.
        let gateway = Arc::clone(&gateway);
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = register_node(&gateway, &config).await {
                warn!("Node registration failed: {:#}", e);
            }
        });
    }

    let feeds = config
        .enabled_antennas()
        .map(|a| FeedClient::new(&a.id, &a.url))
        .collect::<Result<Vec<_>>>()?;

    let orchestrator = Orchestrator::new(
        feeds,
        Batcher::new(coupling),
        Arc::clone(&clear_pipeline),
        Arc::clone(&encrypted_pipeline),
        Arc::clone(&stats),
        track_store,
    );
    let orchestrator_handle = tokio::spawn(orchestrator.run(stop_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    let _ = stop_tx.send(true);
    let _ = orchestrator_handle.await;

    // Let in-flight uploads finish; queued batches were already dropped.
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        clear_pipeline.wait_idle().await;
        encrypted_pipeline.wait_idle().await;
    })
    .await;
    if drained.is_err() {
        error!("In-flight uploads did not finish within {:?}", SHUTDOWN_GRACE);
    }

    info!("tracker stopped");
    Ok(())
}

async fn run_register(config: Config) -> Result<()> {
    let wallet = Arc::new(Wallet::load(&config.wallet_key_path())?);
    let gateway = GatewayClient::new(
        GatewayConfig {
            base_url: config.archive.gateway_url.clone(),
        },
        wallet,
    );
    let tx_id = register_node(&gateway, &config).await?;
    println!("{}", tx_id);
    Ok(())
}

async fn run_stats(config: Config) -> Result<()> {
    use sea_orm::EntityTrait;

    let database = Database::open(&config.database.path).await?;
    let row = db::entity::system_stats::Entity::find()
        .one(database.connection())
        .await?;
    match row {
        Some(row) => println!("{:#?}", row),
        None => println!("no stats row yet"),
    }
    Ok(())
}

async fn run_restore_check(config: Config) -> Result<()> {
    let master = MasterKey::from_hex(&config.data.encryption_key)?;
    let wallet = Arc::new(Wallet::load(&config.wallet_key_path())?);
    let gateway = GatewayClient::new(
        GatewayConfig {
            base_url: config.archive.gateway_url.clone(),
        },
        wallet,
    );
    let package_cipher = PackageCipher::new(master);

    let filters = [
        TagFilter {
            name: "App-Name".into(),
            values: vec![APP_NAME.into()],
        },
        TagFilter {
            name: "Type".into(),
            values: vec!["stats-backup".into()],
        },
    ];
    let Some(tx_id) = gateway.latest_owned_tx(&filters).await? else {
        println!("no snapshot found");
        return Ok(());
    };
    let sealed = gateway
        .download(&tx_id)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let plaintext = package_cipher.decrypt_with_key_id(BACKUP_KEY_ID, &sealed)?;
    let doc: serde_json::Value = serde_json::from_slice(&plaintext)?;
    println!("tx: {}", tx_id);
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
