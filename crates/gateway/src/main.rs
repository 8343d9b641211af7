//! # certgate Gateway
//!
//! IDトークンで認証された利用者にオーバーレイネットワークの証明書を発行する。
//!
//! ## 役割
//! - IDプロバイダのJWKSによるIDトークン検証
//! - IPv4アドレスの逐次割り当て（永続化）
//! - 外部署名器（nebula-cert）による証明書発行
//! - 発行記録の保存
//!
//! ## API エンドポイント
//! - `POST /issuecert`: 証明書発行
//! - `GET /issuecert`: 固定文言
//! - `GET /welcome`: 死活確認
//! - `GET /.well-known/nebula-configuration`: OIDC設定の公開

mod config;
mod endpoints;
mod error;
mod issuance;
mod signer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use certgate_auth::{KeySetFetcher, TokenVerifier};
use certgate_store::{AddressAllocator, DurableStore, RecordLedger};
use clap::{Parser, Subcommand};

use config::{ConfigFile, GatewayState};
use issuance::{pubkey_fingerprint, IssuanceOrchestrator, IssuanceSettings};
use signer::NebulaCertSigner;

/// JWKS取得のタイムアウト。
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "certgate-gateway", version, about = "certgate 証明書発行Gateway")]
struct Cli {
    /// 設定ファイルのパス
    #[arg(long, default_value = "./config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// HTTPサーバーを起動する（デフォルト）
    Serve,
    /// 発行記録を一覧表示する
    ListRecords,
}

// ---------------------------------------------------------------------------
// エントリポイント
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = ConfigFile::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::ListRecords => list_records(&config),
    }
}

async fn serve(config: ConfigFile) -> anyhow::Result<()> {
    let store = DurableStore::open(&config.db.path)
        .with_context(|| format!("ストアを開けません: {}", config.db.path.display()))?;

    let allocator = Arc::new(AddressAllocator::new(store.clone(), config.db.initialip)?);
    if let Some(current) = allocator.current()? {
        tracing::info!(ip_address = %current, "最後に割り当てたアドレス");
    }
    let ledger = Arc::new(RecordLedger::new(store.clone()));

    let signer = Arc::new(NebulaCertSigner::new(
        &config.ca.nebulacert,
        &config.ca.cacertfile,
        &config.ca.cakeyfile,
    ));

    let orchestrator = Arc::new(IssuanceOrchestrator::new(
        IssuanceSettings {
            jwks_url: config.ca.jwksurl.clone(),
            client_id: config.auth.clientid.clone(),
            prefix_len: config.db.prefixlen,
            sign_timeout: Duration::from_secs(config.ca.signtimeoutsecs),
        },
        KeySetFetcher::new(JWKS_FETCH_TIMEOUT)?,
        TokenVerifier::new(config.auth.issuer.clone()),
        allocator,
        ledger,
        signer,
    ));

    let state = Arc::new(GatewayState {
        orchestrator,
        nebula_configuration: config.nebula_configuration(),
    });

    let app = endpoints::router(state);

    let addr = config.server.listen.as_str();
    tracing::info!("Gatewayを {} で起動します", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("{addr} にバインドできません"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close()?;
    tracing::info!("Gatewayを停止しました");
    Ok(())
}

/// 発行記録を標準出力に一覧表示する。
fn list_records(config: &ConfigFile) -> anyhow::Result<()> {
    let store = DurableStore::open(&config.db.path)
        .with_context(|| format!("ストアを開けません: {}", config.db.path.display()))?;
    let ledger = RecordLedger::new(store.clone());

    let mut count = 0usize;
    for entry in ledger.list_all() {
        match entry {
            Ok((id, record)) => {
                println!(
                    "{id}\t{}\t{}",
                    record.ip_addr,
                    pubkey_fingerprint(&record.pub_key)
                );
                count += 1;
            }
            Err(e) => tracing::warn!(error = %e, "読み込めない発行記録をスキップ"),
        }
    }
    tracing::info!(count, "発行記録を一覧表示しました");

    store.close()?;
    Ok(())
}

/// SIGINT / SIGTERMを待つ。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+Cの待機に失敗");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERMの待機に失敗");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("シャットダウンを開始します");
}
