//! # nebula-cert署名器
//!
//! 一時ディレクトリに公開鍵を書き出し、`nebula-cert sign` を実行して
//! 生成された証明書を読み戻す。一時ディレクトリは呼び出しごとに作成・削除される。

use std::path::PathBuf;

use super::{CertSigner, SignError, SigningRequest};

const PUBKEY_FILE: &str = "host.pub";
const CERT_FILE: &str = "host.crt";

/// `nebula-cert` バイナリによる署名器。
pub struct NebulaCertSigner {
    /// nebula-certの実行ファイルパス
    binary: PathBuf,
    /// CA証明書のパス
    ca_cert: PathBuf,
    /// CA秘密鍵のパス
    ca_key: PathBuf,
}

impl NebulaCertSigner {
    pub fn new(
        binary: impl Into<PathBuf>,
        ca_cert: impl Into<PathBuf>,
        ca_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            ca_cert: ca_cert.into(),
            ca_key: ca_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl CertSigner for NebulaCertSigner {
    async fn sign(&self, request: &SigningRequest) -> Result<String, SignError> {
        let temp_dir = tempfile::Builder::new()
            .prefix("nebula-temp")
            .tempdir()
            .map_err(|e| SignError::Io(format!("一時ディレクトリの作成に失敗: {e}")))?;
        let pub_path = temp_dir.path().join(PUBKEY_FILE);
        let crt_path = temp_dir.path().join(CERT_FILE);

        tokio::fs::write(&pub_path, request.public_key.as_bytes())
            .await
            .map_err(|e| SignError::Io(format!("公開鍵の書き出しに失敗: {e}")))?;

        let output = tokio::process::Command::new(&self.binary)
            .arg("sign")
            .arg("-ca-crt")
            .arg(&self.ca_cert)
            .arg("-ca-key")
            .arg(&self.ca_key)
            .arg("-name")
            .arg(&request.name)
            .arg("-ip")
            .arg(request.cidr())
            .arg("-in-pub")
            .arg(&pub_path)
            .arg("-out-crt")
            .arg(&crt_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SignError::Io(format!("{} の起動に失敗: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SignError::Failed(format!(
                "{} ({})",
                stderr.trim(),
                output.status
            )));
        }

        let certificate = tokio::fs::read_to_string(&crt_path)
            .await
            .map_err(|e| SignError::Io(format!("証明書の読み込みに失敗: {e}")))?;

        tracing::debug!(name = %request.name, ip = %request.cidr(), "nebula-certで署名");
        Ok(certificate)
    }
}
