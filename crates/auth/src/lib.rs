//! # certgate IDトークン検証
//!
//! IDプロバイダが公開するJSON Web Key Set（JWKS）を取得し、
//! IDトークン（JWS compact形式）の署名・有効期限・audienceを検証する。
//!
//! ## 検証順序
//! 1. トークンの構造をパース
//! 2. ヘッダの `kid` に対応する鍵で署名を検証
//! 3. 署名検証後にのみクレームをデコードし、`exp` / `iat` / `nbf` / `iss` / `sub` を検証
//! 4. `aud` に期待するクライアントIDが含まれることを検証
//!
//! 署名を検証する前にクレームの値を信頼することはない。

pub mod error;
pub mod jwks;
pub mod verifier;

pub use error::{JwksError, VerifyError};
pub use jwks::{KeySet, KeySetFetcher};
pub use verifier::{Identity, TokenVerifier};
