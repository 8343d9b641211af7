//! # Gateway設定・共有状態
//!
//! YAML設定ファイルの読み込みとGatewayの共有状態の定義。

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use certgate_types::NebulaConfiguration;
use serde::Deserialize;

use crate::issuance::{IssuanceOrchestrator, DEFAULT_SIGN_TIMEOUT_SECS};

/// デフォルトの待ち受けアドレス。
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8000";

/// 待ち受けアドレスを上書きする環境変数。
pub const ENV_LISTEN: &str = "CERTGATE_LISTEN";

/// ストアのパスを上書きする環境変数。
pub const ENV_DB_PATH: &str = "CERTGATE_DB_PATH";

/// 設定ファイル全体。
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub auth: AuthConfig,
    pub ca: CaConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// クライアントに公開するOIDC設定。
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub discoveryurl: String,
    pub clientid: String,
    pub redirecturi: String,
    pub caurl: String,
    /// 指定された場合、トークンの `iss` と一致を要求する
    #[serde(default)]
    pub issuer: Option<String>,
}

/// 署名器とJWKSの設定。
#[derive(Debug, Clone, Deserialize)]
pub struct CaConfig {
    pub cakeyfile: PathBuf,
    pub cacertfile: PathBuf,
    pub jwksurl: String,
    #[serde(default = "default_nebula_cert")]
    pub nebulacert: PathBuf,
    #[serde(default = "default_sign_timeout_secs")]
    pub signtimeoutsecs: u64,
}

/// ストアとアドレス割り当ての設定。
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub path: PathBuf,
    pub initialip: Ipv4Addr,
    pub prefixlen: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_nebula_cert() -> PathBuf {
    PathBuf::from("nebula-cert")
}

fn default_sign_timeout_secs() -> u64 {
    DEFAULT_SIGN_TIMEOUT_SECS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl ConfigFile {
    /// 設定ファイルを読み込み、環境変数による上書きを適用する。
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        validate_config_path(path)?;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("設定ファイルの読み込みに失敗: {}", path.display()))?;
        let mut config = Self::parse(&text)
            .with_context(|| format!("設定ファイルのパースに失敗: {}", path.display()))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// YAML文字列から設定を構築する。
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: ConfigFile = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.auth.clientid.is_empty() {
            anyhow::bail!("auth.clientid が空です");
        }
        if self.ca.jwksurl.is_empty() {
            anyhow::bail!("ca.jwksurl が空です");
        }
        if self.db.prefixlen == 0 || self.db.prefixlen > 32 {
            anyhow::bail!("db.prefixlen は1〜32である必要があります: {}", self.db.prefixlen);
        }
        if self.ca.signtimeoutsecs == 0 {
            anyhow::bail!("ca.signtimeoutsecs は1以上である必要があります");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.server.listen = listen;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.db.path = PathBuf::from(path);
        }
    }

    /// `GET /.well-known/nebula-configuration` で公開する設定。
    pub fn nebula_configuration(&self) -> NebulaConfiguration {
        NebulaConfiguration {
            discovery_url: self.auth.discoveryurl.clone(),
            client_id: self.auth.clientid.clone(),
            redirect_uri: self.auth.redirecturi.clone(),
            ca_url: self.auth.caurl.clone(),
        }
    }
}

/// 設定ファイルのパスが存在する通常ファイルであることを確認する。
pub fn validate_config_path(path: &Path) -> anyhow::Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("設定ファイルが見つかりません: {}", path.display()))?;
    if metadata.is_dir() {
        anyhow::bail!("'{}' はディレクトリです。通常ファイルを指定してください", path.display());
    }
    if !metadata.is_file() {
        anyhow::bail!("'{}' は通常ファイルではありません", path.display());
    }
    Ok(())
}

/// Gatewayの共有状態。
pub struct GatewayState {
    /// 証明書発行フロー。リクエストとは独立したタスクから共有される
    pub orchestrator: Arc<IssuanceOrchestrator>,
    /// 公開するOIDC設定
    pub nebula_configuration: NebulaConfiguration,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
auth:
  discoveryurl: https://idp.example.com/.well-known/openid-configuration
  clientid: my-client
  redirecturi: http://localhost:8080/callback
  caurl: https://ca.example.com
ca:
  cakeyfile: /etc/nebula/ca.key
  cacertfile: /etc/nebula/ca.crt
  jwksurl: https://idp.example.com/keys
db:
  path: ./certgate.db
  initialip: 10.0.0.1
  prefixlen: 8
"#;

    /// 省略可能な項目にデフォルト値が入ることを確認
    #[test]
    fn test_parse_defaults() {
        let config = ConfigFile::parse(SAMPLE).unwrap();
        assert_eq!(config.auth.clientid, "my-client");
        assert_eq!(config.auth.issuer, None);
        assert_eq!(config.ca.nebulacert, PathBuf::from("nebula-cert"));
        assert_eq!(config.ca.signtimeoutsecs, DEFAULT_SIGN_TIMEOUT_SECS);
        assert_eq!(config.db.initialip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.server.listen, DEFAULT_LISTEN);
    }

    /// 公開設定がauthセクションから作られることを確認
    #[test]
    fn test_nebula_configuration() {
        let config = ConfigFile::parse(SAMPLE).unwrap();
        let public = config.nebula_configuration();
        assert_eq!(public.client_id, "my-client");
        assert_eq!(public.ca_url, "https://ca.example.com");
    }

    /// 環境変数による上書き
    #[test]
    fn test_env_overrides() {
        let mut config = ConfigFile::parse(SAMPLE).unwrap();
        config.apply_env_overrides(|key| match key {
            ENV_LISTEN => Some("0.0.0.0:9000".to_string()),
            ENV_DB_PATH => Some("/var/lib/certgate.db".to_string()),
            _ => None,
        });
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.db.path, PathBuf::from("/var/lib/certgate.db"));
    }

    /// 不正な値は拒否
    #[test]
    fn test_parse_rejects_invalid() {
        let bad_prefix = SAMPLE.replace("prefixlen: 8", "prefixlen: 40");
        assert!(ConfigFile::parse(&bad_prefix).is_err());

        let bad_ip = SAMPLE.replace("initialip: 10.0.0.1", "initialip: 10.0.0");
        assert!(ConfigFile::parse(&bad_ip).is_err());

        let missing_section = SAMPLE.replace("db:", "database:");
        assert!(ConfigFile::parse(&missing_section).is_err());
    }

    /// 設定ファイルパスの検証
    #[test]
    fn test_validate_config_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_config_path(dir.path()).is_err());
        assert!(validate_config_path(&dir.path().join("missing.yml")).is_err());

        let file = dir.path().join("config.yml");
        std::fs::write(&file, SAMPLE).unwrap();
        assert!(validate_config_path(&file).is_ok());
        assert!(ConfigFile::load(&file).is_ok());
    }
}
