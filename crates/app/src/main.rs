mod handler;
mod maintenance;
mod pipeline;
mod poller;
mod replies;
mod router;
mod telemetry;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use domain_intake_core::Cancellation;
use domain_intake_dns::{DomainValidator, HickoryLookup};
use domain_intake_storage::{Database, RateLimiter};
use domain_intake_telegram::{BotApiClient, ChatId};
use domain_intake_util::{ensure_utc_timezone, load_env_file, AppConfig};
use tokio::sync::watch;
use tracing::{error, info};
use url::Url;

use crate::handler::UpdateHandler;
use crate::maintenance::CheckpointWorker;
use crate::pipeline::SubmissionPipeline;
use crate::poller::Poller;

/// Must exceed the long-poll timeout so idle polls are not cut short.
const BOT_HTTP_TIMEOUT: Duration = Duration::from_secs(35);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    ensure_utc_timezone()?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::open(&config.database_path).await?;
    database.run_migrations().await?;
    info!(stage = "storage", path = %config.database_path.display(), "database ready");

    let limiter = RateLimiter::new(
        database.rate_limits(),
        config.rate_limit.max_attempts,
        config.rate_limit.window,
    );
    let validator = DomainValidator::new(HickoryLookup::new(config.dns_server), config.dns_retries);
    let pipeline = SubmissionPipeline::new(limiter, validator, database.domains());

    let http = bot_http_client(config.bot_http_proxy_url.as_deref())?;
    let bot = BotApiClient::new(
        config.bot_token.clone(),
        Url::parse(&config.bot_api_base_url)?,
        http,
    );
    let me = bot.get_me().await?;
    info!(stage = "telegram", bot_id = me.id, username = me.username.as_deref().unwrap_or_default(), "bot token verified");

    let handler = Arc::new(UpdateHandler::new(
        pipeline,
        bot.clone(),
        ChatId::parse(&config.publish_chat_id),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = Cancellation::from_shutdown(shutdown_rx);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let state = router::AppState::new(metrics, database.clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router::app_router(state))
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let checkpoints =
        CheckpointWorker::new(database.clone(), config.wal_checkpoint_interval);
    let checkpoint_task = checkpoints.clone().spawn(shutdown.clone());
    let poller = Poller::new(bot, handler, shutdown).spawn();

    tokio::signal::ctrl_c().await?;
    info!(stage = "app", "shutdown requested");
    shutdown_tx.send(true).ok();

    if let Err(err) = poller.await {
        error!(stage = "app", error = %err, "poller task failed");
    }
    match server.await {
        Ok(Err(err)) => error!(stage = "app", error = %err, "HTTP server failed"),
        Err(err) => error!(stage = "app", error = %err, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    if let Err(err) = checkpoint_task.await {
        error!(stage = "app", error = %err, "checkpoint task failed");
    }
    if let Err(err) = checkpoints.run_once().await {
        error!(stage = "storage", error = %err, "final WAL checkpoint failed");
    }

    info!(stage = "storage", "closing database connection");
    database.close().await;
    Ok(())
}

/// HTTP client for the Bot API, optionally routed through a proxy.
fn bot_http_client(proxy_url: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(BOT_HTTP_TIMEOUT);
    if let Some(proxy_url) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        info!(stage = "telegram", "Bot API traffic goes through the configured proxy");
    }
    builder.build()
}
