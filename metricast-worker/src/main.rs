use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use metricast_core::composite::CompositeSet;
use metricast_core::config::WorkerConfig;
use metricast_worker::{bus, cache::RpcCacheClient, worker::MethodRegistry};

mod cli;
mod logging;

use cli::WorkerCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = WorkerCli::parse();

    // 설정 로드 + CLI 오버라이드
    let mut config = WorkerConfig::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config.validate().context("invalid configuration")?;

    // --validate: 정의 문서까지 확인하고 종료
    if cli.validate {
        let composites = CompositeSet::load(&config.composites.path)
            .await
            .context("invalid composite definitions")?;
        println!(
            "configuration ok: {} composite(s) defined",
            composites.len()
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(config = %cli.config.display(), "metricast-worker starting");

    // 기동 실패 시 2초 쉬고 재초기화합니다. 시그널 종료는 코드 0으로 끝납니다.
    loop {
        match build_and_serve(&config).await {
            Ok(()) => break,
            Err(e) => {
                tracing::error!(error = %e, "startup failed, reinitializing in 2s");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }

    tracing::info!("metricast-worker shut down");
    Ok(())
}

/// 정의 로드 → 캐시 클라이언트/레지스트리 구성 → 버스 서비스.
///
/// 종료 시그널을 받으면 연결과 워커를 정리하고 `Ok`로 돌아갑니다.
async fn build_and_serve(config: &WorkerConfig) -> Result<()> {
    let composites = CompositeSet::load(&config.composites.path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load composite definitions: {e}"))?;
    if composites.is_empty() {
        tracing::warn!("no composites defined, serving ping only");
    } else {
        tracing::info!(composites = composites.len(), "composite definitions loaded");
    }

    let cancel = CancellationToken::new();
    let cache_client = RpcCacheClient::new(config.cache.clone(), cancel.child_token());
    let registry = Arc::new(MethodRegistry::new(
        Arc::new(cache_client),
        composites,
        config,
    ));

    let mut server = tokio::spawn(bus::serve(
        config.bus.clone(),
        registry,
        cancel.child_token(),
    ));

    tokio::select! {
        result = &mut server => {
            cancel.cancel();
            match result {
                Ok(Ok(())) => Err(anyhow::anyhow!("bus exited unexpectedly")),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            }
        }
        signal = wait_for_shutdown_signal() => {
            let signal = signal?;
            tracing::info!(signal, "shutdown signal received");
            cancel.cancel();
            let _ = server.await;
            Ok(())
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {e}"))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
