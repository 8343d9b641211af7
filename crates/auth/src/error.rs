//! # 認証エラー型
//!
//! エラーメッセージはサーバーログ用。クライアントには詳細を返さない。

/// JWKS取得のエラー。
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// リクエストの送信に失敗、またはタイムアウト
    #[error("JWKSの取得に失敗: {0}")]
    Transport(String),
    /// 200以外のステータスコード
    #[error("JWKSエンドポイントがHTTP {0}を返しました")]
    Status(u16),
    /// レスポンスがJWKSとしてデコードできない
    #[error("JWKSのデコードに失敗: {0}")]
    Decode(String),
}

/// IDトークン検証のエラー。
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// 署名付きトークンとして認識できない
    #[error("トークンの形式が不正です: {0}")]
    MalformedToken(String),
    /// 署名の不一致、または対応する鍵が見つからない
    #[error("トークンの署名検証に失敗: {0}")]
    Signature(String),
    /// 標準クレームの検証に失敗
    #[error("クレーム `{claim}` が不正です: {reason}")]
    ClaimsInvalid { claim: &'static str, reason: String },
    /// audienceに期待するクライアントIDが含まれない
    #[error("トークンのaudienceに {expected} が含まれていません")]
    AudienceMismatch { expected: String },
}

impl VerifyError {
    pub(crate) fn claim(claim: &'static str, reason: impl Into<String>) -> Self {
        VerifyError::ClaimsInvalid {
            claim,
            reason: reason.into(),
        }
    }
}
