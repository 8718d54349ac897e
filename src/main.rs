use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::{
    api::RelayState,
    config::RelayConfig,
    media::{bridge::PipelineBridge, origin::MediaOrigin},
    transport::rtc::WebRtcTransport,
};

mod api;
mod config;
mod handler;
mod manager;
mod media;
mod signaling;
mod transport;

/// How long shutdown waits for the server and for the pipeline threads.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("webrtc", log::LevelFilter::Warn)
        .filter_module("webrtc_ice", log::LevelFilter::Warn)
        .filter_module("webrtc_dtls", log::LevelFilter::Warn)
        .filter_module("webrtc_srtp", log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = RelayConfig::parse();

    let code = match run(config).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(config: RelayConfig) -> anyhow::Result<i32> {
    log::info!("Initializing WebRTC transport");
    let transport = Arc::new(WebRtcTransport::new(config.ice_servers())?);

    log::info!("Initializing WebRTC tracks");
    let origin = Arc::new(MediaOrigin::new(transport.as_ref())?);

    log::info!("Creating and starting pipeline");
    let fatal = CancellationToken::new();
    let bridge = Arc::new(
        PipelineBridge::create(
            config.pipeline(),
            Arc::clone(&origin),
            config.sample_queue(),
            fatal.clone(),
        )
        .context("create pipeline")?,
    );
    bridge.start().context("start pipeline")?;

    let (listener, addr) = config::bind_listener(&config.listen_addrs()).await?;

    let cancel = CancellationToken::new();
    let state = RelayState::new(
        transport,
        origin,
        config.session_options(),
        cancel.clone(),
        {
            let bridge = Arc::clone(&bridge);
            move || bridge.is_started()
        },
    );
    let server = api::start_api_server(listener, state, cancel.clone());
    log::info!("Television is now available on '{}', have fun!", addr);

    let code = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 0;
            },
            _ = fatal.cancelled() => {
                log::error!("media track failed, shutting down");
                cancel.cancel();
                break 1;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    };

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("API server task failed: {}", e),
        Err(_) => log::warn!("API server did not stop in time"),
    }
    let stop = tokio::task::spawn_blocking(move || bridge.stop());
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, stop).await.is_err() {
        log::warn!("pipeline did not stop in time");
    }
    Ok(code)
}
