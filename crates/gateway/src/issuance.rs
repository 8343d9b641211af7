//! # 証明書発行フロー
//!
//! `Received → TokenVerified → AddressAllocated → Signed → Recorded → Complete`
//! の順に進み、いずれかの段階で失敗した場合はその段階を保持した
//! [`IssuanceError`] で終了する。
//!
//! - アドレスはトークン検証に成功した後にのみ割り当てる。
//! - 署名に失敗したアドレスは返却しない（再利用しない）。
//! - 署名後に記録の保存に失敗した場合、証明書は記録されないまま存在する。
//!   IDとアドレスをerrorレベルでログに残す。

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use certgate_auth::{JwksError, KeySetFetcher, TokenVerifier, VerifyError};
use certgate_store::{AddressAllocator, AllocError, RecordLedger};
use certgate_types::{CertRecord, IssueCertRequest};
use sha2::{Digest, Sha256};

use crate::signer::{CertSigner, SignError, SigningRequest};

/// 署名器呼び出しのデフォルトタイムアウト（秒）。
pub const DEFAULT_SIGN_TIMEOUT_SECS: u64 = 30;

/// 発行フローの段階。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceStage {
    Received,
    TokenVerified,
    AddressAllocated,
    Signed,
    Recorded,
    Complete,
}

impl fmt::Display for IssuanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssuanceStage::Received => "received",
            IssuanceStage::TokenVerified => "token_verified",
            IssuanceStage::AddressAllocated => "address_allocated",
            IssuanceStage::Signed => "signed",
            IssuanceStage::Recorded => "recorded",
            IssuanceStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// 発行フローのエラー。各バリアントは失敗した遷移に対応する。
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// IDトークンの検証に失敗
    #[error("IDトークンの検証に失敗: {0}")]
    Auth(#[from] VerifyError),
    /// JWKSの取得に失敗
    #[error("JWKSの取得に失敗: {0}")]
    KeySet(#[from] JwksError),
    /// アドレスの割り当てに失敗
    #[error("アドレスの割り当てに失敗: {0}")]
    Allocation(#[from] AllocError),
    /// 署名に失敗（タイムアウトを含む）
    #[error("証明書の署名に失敗: {0}")]
    Signing(#[from] SignError),
    /// 署名済み証明書の記録に失敗
    #[error("発行記録の保存に失敗 (id={id}, ip_address={ip_address}): {detail}")]
    Persistence {
        id: String,
        ip_address: Ipv4Addr,
        detail: String,
    },
    /// ブロッキングタスクの実行に失敗
    #[error("内部エラー ({stage}): {detail}")]
    Internal {
        stage: IssuanceStage,
        detail: String,
    },
}

impl IssuanceError {
    /// 失敗時点で到達していた段階。
    pub fn stage(&self) -> IssuanceStage {
        match self {
            IssuanceError::Auth(_) | IssuanceError::KeySet(_) => IssuanceStage::Received,
            IssuanceError::Allocation(_) => IssuanceStage::TokenVerified,
            IssuanceError::Signing(_) => IssuanceStage::AddressAllocated,
            IssuanceError::Persistence { .. } => IssuanceStage::Signed,
            IssuanceError::Internal { stage, .. } => *stage,
        }
    }
}

/// 発行に成功した証明書。
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// 発行記録のID（UUID v4）
    pub id: String,
    /// 署名済み証明書（PEM）
    pub certificate: String,
    /// 割り当てたアドレス
    pub ip_address: Ipv4Addr,
}

/// 発行フローの設定値。
#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    /// JWKSのURL
    pub jwks_url: String,
    /// トークンの期待audience（OIDCクライアントID）
    pub client_id: String,
    /// オーバーレイネットワークのプレフィックス長
    pub prefix_len: u8,
    /// 署名器呼び出しのタイムアウト
    pub sign_timeout: Duration,
}

/// 証明書発行のオーケストレータ。
///
/// 依存するコンポーネントは全て構築時に注入する。
pub struct IssuanceOrchestrator {
    settings: IssuanceSettings,
    fetcher: KeySetFetcher,
    verifier: TokenVerifier,
    allocator: Arc<AddressAllocator>,
    ledger: Arc<RecordLedger>,
    signer: Arc<dyn CertSigner>,
}

impl IssuanceOrchestrator {
    pub fn new(
        settings: IssuanceSettings,
        fetcher: KeySetFetcher,
        verifier: TokenVerifier,
        allocator: Arc<AddressAllocator>,
        ledger: Arc<RecordLedger>,
        signer: Arc<dyn CertSigner>,
    ) -> Self {
        Self {
            settings,
            fetcher,
            verifier,
            allocator,
            ledger,
            signer,
        }
    }

    /// 1件の発行要求を処理する。
    pub async fn issue(
        &self,
        request: &IssueCertRequest,
    ) -> Result<IssuedCertificate, IssuanceError> {
        let fingerprint = pubkey_fingerprint(&request.pub_key);
        tracing::debug!(stage = %IssuanceStage::Received, pubkey = %fingerprint, "発行要求を受信");

        // Received → TokenVerified
        self.verifier.check_structure(&request.token)?;
        let key_set = self.fetcher.fetch(&self.settings.jwks_url).await?;
        let identity = self
            .verifier
            .verify(&request.token, &key_set, &self.settings.client_id)?;
        tracing::info!(
            stage = %IssuanceStage::TokenVerified,
            subject = %identity.subject,
            name = %identity.name(),
            "IDトークンを検証"
        );

        // TokenVerified → AddressAllocated
        let allocator = Arc::clone(&self.allocator);
        let ip_address = tokio::task::spawn_blocking(move || allocator.next_address())
            .await
            .map_err(|e| IssuanceError::Internal {
                stage: IssuanceStage::TokenVerified,
                detail: e.to_string(),
            })??;
        tracing::info!(
            stage = %IssuanceStage::AddressAllocated,
            ip_address = %ip_address,
            "アドレスを割り当て"
        );

        // AddressAllocated → Signed
        let signing_request = SigningRequest {
            public_key: request.pub_key.clone(),
            name: identity.name().to_string(),
            ip_address,
            prefix_len: self.settings.prefix_len,
        };
        let certificate = match tokio::time::timeout(
            self.settings.sign_timeout,
            self.signer.sign(&signing_request),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(SignError::Timeout(self.settings.sign_timeout.as_secs()).into()),
        };
        tracing::info!(
            stage = %IssuanceStage::Signed,
            ip_address = %ip_address,
            "証明書に署名"
        );

        // Signed → Recorded
        let id = uuid::Uuid::new_v4().to_string();
        let record = CertRecord {
            pub_key: request.pub_key.clone(),
            token: request.token.clone(),
            ip_addr: ip_address.to_string(),
        };
        let ledger = Arc::clone(&self.ledger);
        let record_id = id.clone();
        let stored = tokio::task::spawn_blocking(move || ledger.put(&record_id, &record))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));
        if let Err(detail) = stored {
            tracing::error!(
                stage = %IssuanceStage::Signed,
                record_id = %id,
                ip_address = %ip_address,
                pubkey = %fingerprint,
                error = %detail,
                "署名済み証明書を記録できませんでした"
            );
            return Err(IssuanceError::Persistence {
                id,
                ip_address,
                detail,
            });
        }
        tracing::info!(
            stage = %IssuanceStage::Recorded,
            record_id = %id,
            ip_address = %ip_address,
            "発行記録を保存"
        );

        tracing::info!(
            stage = %IssuanceStage::Complete,
            record_id = %id,
            ip_address = %ip_address,
            name = %identity.name(),
            "証明書を発行"
        );
        Ok(IssuedCertificate {
            id,
            certificate,
            ip_address,
        })
    }
}

/// 公開鍵のSHA-256フィンガープリント（先頭8バイトの16進表記）。
pub fn pubkey_fingerprint(pub_key: &str) -> String {
    let digest = Sha256::digest(pub_key.as_bytes());
    hex::encode(&digest[..8])
}
