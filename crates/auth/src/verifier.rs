//! # IDトークン検証
//!
//! JWS compact形式のIDトークンを、取得済みのJWKSに対して検証する。
//! 検証に成功した場合のみ [`Identity`] を返す。

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::jwk::KeyAlgorithm;
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, Header, Validation};
use serde::Deserialize;

use crate::error::VerifyError;
use crate::jwks::KeySet;

/// 時刻クレーム検証の許容誤差（秒）。
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// 検証済みトークンから得られる利用者の識別情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// `sub` クレーム
    pub subject: String,
    /// `email` クレーム（存在する場合）
    pub email: Option<String>,
    /// `iss` クレーム（存在する場合）
    pub issuer: Option<String>,
    /// `aud` クレーム
    pub audience: Vec<String>,
}

impl Identity {
    /// 証明書に記載する名前。emailがあればemail、なければsubject。
    pub fn name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.subject)
    }
}

/// `aud` は文字列または文字列の配列。
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// 署名検証後にデコードするクレーム。
/// NumericDateは小数を含み得るためf64で受ける。
#[derive(Debug, Deserialize)]
struct RawClaims {
    iss: Option<String>,
    sub: Option<String>,
    aud: Option<Audience>,
    exp: Option<f64>,
    iat: Option<f64>,
    nbf: Option<f64>,
    email: Option<String>,
}

/// IDトークン検証器。
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    expected_issuer: Option<String>,
    leeway_secs: u64,
}

impl Default for TokenVerifier {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TokenVerifier {
    /// `expected_issuer` が指定された場合、`iss` クレームの一致も要求する。
    pub fn new(expected_issuer: Option<String>) -> Self {
        Self {
            expected_issuer,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }

    /// トークンの構造のみを検査する。鍵セットを取得する前の事前チェック用。
    pub fn check_structure(&self, token: &str) -> Result<(), VerifyError> {
        parse_header(token).map(|_| ())
    }

    /// 現在時刻でトークンを検証する。
    pub fn verify(
        &self,
        token: &str,
        key_set: &KeySet,
        expected_audience: &str,
    ) -> Result<Identity, VerifyError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.verify_at(token, key_set, expected_audience, now)
    }

    /// 指定したUNIX時刻（秒）でトークンを検証する。
    pub fn verify_at(
        &self,
        token: &str,
        key_set: &KeySet,
        expected_audience: &str,
        now: u64,
    ) -> Result<Identity, VerifyError> {
        // 1. 構造
        let header = parse_header(token)?;

        // 2. 署名
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| VerifyError::Signature("ヘッダにkidがありません".to_string()))?;
        let jwk = key_set
            .find(kid)
            .ok_or_else(|| VerifyError::Signature(format!("kid {kid} に対応する鍵がありません")))?;
        if let Some(key_alg) = &jwk.common.key_algorithm {
            if !key_algorithm_matches(key_alg, header.alg) {
                return Err(VerifyError::Signature(format!(
                    "鍵のアルゴリズム {key_alg:?} とトークンのアルゴリズム {:?} が一致しません",
                    header.alg
                )));
            }
        }
        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| VerifyError::Signature(format!("鍵の読み込みに失敗: {e}")))?;

        // 時刻・audienceは下で独自に検証する
        let mut validation = Validation::new(header.alg);
        validation.algorithms = vec![header.alg];
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<serde_json::Value>(token, &decoding_key, &validation)
            .map_err(map_decode_error)?;

        // 3. クレーム
        let claims: RawClaims = serde_json::from_value(data.claims)
            .map_err(|e| VerifyError::claim("payload", e.to_string()))?;
        self.validate_claims(&claims, now)?;

        // 4. audience
        let audience = claims.aud.map(Audience::into_vec).unwrap_or_default();
        if !audience.iter().any(|aud| aud == expected_audience) {
            return Err(VerifyError::AudienceMismatch {
                expected: expected_audience.to_string(),
            });
        }

        let subject = claims.sub.unwrap_or_default();
        tracing::debug!(subject = %subject, kid = %kid, "IDトークンを検証");

        Ok(Identity {
            subject,
            email: claims.email,
            issuer: claims.iss,
            audience,
        })
    }

    fn validate_claims(&self, claims: &RawClaims, now: u64) -> Result<(), VerifyError> {
        let now = now as f64;
        let leeway = self.leeway_secs as f64;

        let exp = claims
            .exp
            .ok_or_else(|| VerifyError::claim("exp", "ありません"))?;
        if now > exp + leeway {
            return Err(VerifyError::claim("exp", "有効期限切れです"));
        }
        if let Some(iat) = claims.iat {
            if iat > now + leeway {
                return Err(VerifyError::claim("iat", "発行時刻が未来です"));
            }
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now + leeway {
                return Err(VerifyError::claim("nbf", "まだ有効になっていません"));
            }
        }
        if let Some(expected) = &self.expected_issuer {
            if claims.iss.as_deref() != Some(expected.as_str()) {
                return Err(VerifyError::claim(
                    "iss",
                    format!("期待値 {expected} と一致しません"),
                ));
            }
        }
        match claims.sub.as_deref() {
            Some(sub) if !sub.is_empty() => Ok(()),
            _ => Err(VerifyError::claim("sub", "ありません")),
        }
    }
}

fn parse_header(token: &str) -> Result<Header, VerifyError> {
    if token.split('.').count() != 3 {
        return Err(VerifyError::MalformedToken(
            "JWS compact形式（3セグメント）ではありません".to_string(),
        ));
    }
    jsonwebtoken::decode_header(token)
        .map_err(|e| VerifyError::MalformedToken(format!("ヘッダのデコードに失敗: {e}")))
}

/// JWKの `alg` がトークンヘッダの `alg` と対応するか。
fn key_algorithm_matches(key_alg: &KeyAlgorithm, alg: Algorithm) -> bool {
    matches!(
        (key_alg, alg),
        (KeyAlgorithm::HS256, Algorithm::HS256)
            | (KeyAlgorithm::HS384, Algorithm::HS384)
            | (KeyAlgorithm::HS512, Algorithm::HS512)
            | (KeyAlgorithm::ES256, Algorithm::ES256)
            | (KeyAlgorithm::ES384, Algorithm::ES384)
            | (KeyAlgorithm::RS256, Algorithm::RS256)
            | (KeyAlgorithm::RS384, Algorithm::RS384)
            | (KeyAlgorithm::RS512, Algorithm::RS512)
            | (KeyAlgorithm::PS256, Algorithm::PS256)
            | (KeyAlgorithm::PS384, Algorithm::PS384)
            | (KeyAlgorithm::PS512, Algorithm::PS512)
            | (KeyAlgorithm::EdDSA, Algorithm::EdDSA)
    )
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    match err.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => {
            VerifyError::MalformedToken(err.to_string())
        }
        ErrorKind::Json(_) | ErrorKind::Utf8(_) => VerifyError::claim("payload", err.to_string()),
        _ => VerifyError::Signature(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use ed25519_dalek::SigningKey;
    use jsonwebtoken::EncodingKey;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000;
    const CLIENT_ID: &str = "certgate-client";

    /// Ed25519秘密鍵のPKCS#8 DERプレフィックス
    const PKCS8_ED25519_PREFIX: [u8; 16] = [
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
        0x20,
    ];

    struct TestKey {
        signing_key: SigningKey,
        kid: String,
    }

    impl TestKey {
        fn generate(kid: &str) -> Self {
            Self {
                signing_key: SigningKey::generate(&mut rand::rngs::OsRng),
                kid: kid.to_string(),
            }
        }

        fn jwk(&self) -> serde_json::Value {
            json!({
                "kty": "OKP",
                "crv": "Ed25519",
                "x": URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().as_bytes()),
                "kid": self.kid,
                "alg": "EdDSA",
                "use": "sig",
            })
        }

        fn sign(&self, claims: &serde_json::Value) -> String {
            let mut der = PKCS8_ED25519_PREFIX.to_vec();
            der.extend_from_slice(self.signing_key.as_bytes());
            let mut header = Header::new(Algorithm::EdDSA);
            header.kid = Some(self.kid.clone());
            jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(&der)).unwrap()
        }
    }

    fn key_set(keys: &[&TestKey]) -> KeySet {
        let keys: Vec<_> = keys.iter().map(|k| k.jwk()).collect();
        serde_json::from_value(json!({ "keys": keys })).unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        json!({
            "iss": "https://idp.example.com",
            "sub": "user-123",
            "aud": CLIENT_ID,
            "exp": NOW + 300,
            "iat": NOW - 10,
            "email": "alice@example.com",
        })
    }

    /// 正常なトークンからIdentityが得られることを確認
    #[test]
    fn test_verify_ok() {
        let key = TestKey::generate("key-1");
        let token = key.sign(&valid_claims());

        let identity = TokenVerifier::default()
            .verify_at(&token, &key_set(&[&key]), CLIENT_ID, NOW)
            .unwrap();
        assert_eq!(identity.subject, "user-123");
        assert_eq!(identity.name(), "alice@example.com");
        assert_eq!(identity.audience, vec![CLIENT_ID.to_string()]);
    }

    /// emailがなければsubjectが名前になる
    #[test]
    fn test_name_falls_back_to_subject() {
        let key = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims.as_object_mut().unwrap().remove("email");
        let token = key.sign(&claims);

        let identity = TokenVerifier::default()
            .verify_at(&token, &key_set(&[&key]), CLIENT_ID, NOW)
            .unwrap();
        assert_eq!(identity.name(), "user-123");
    }

    /// audienceが配列の場合も含まれていれば受理
    #[test]
    fn test_audience_array() {
        let key = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims["aud"] = json!(["other", CLIENT_ID]);
        let token = key.sign(&claims);

        let identity = TokenVerifier::default()
            .verify_at(&token, &key_set(&[&key]), CLIENT_ID, NOW)
            .unwrap();
        assert_eq!(identity.audience.len(), 2);
    }

    /// audienceに含まれなければAudienceMismatch
    #[test]
    fn test_audience_mismatch() {
        let key = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims["aud"] = json!("someone-else");
        let token = key.sign(&claims);

        let result = TokenVerifier::default().verify_at(&token, &key_set(&[&key]), CLIENT_ID, NOW);
        assert!(matches!(result, Err(VerifyError::AudienceMismatch { .. })));
    }

    /// 期限切れはClaimsInvalid（許容誤差内なら受理）
    #[test]
    fn test_expired() {
        let key = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims["exp"] = json!(NOW - 30);
        let token = key.sign(&claims);
        let keys = key_set(&[&key]);

        assert!(TokenVerifier::default()
            .verify_at(&token, &keys, CLIENT_ID, NOW)
            .is_ok());

        let result = TokenVerifier::default().verify_at(&token, &keys, CLIENT_ID, NOW + 31);
        assert!(matches!(
            result,
            Err(VerifyError::ClaimsInvalid { claim: "exp", .. })
        ));
    }

    /// expがなければClaimsInvalid
    #[test]
    fn test_missing_exp() {
        let key = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims.as_object_mut().unwrap().remove("exp");
        let token = key.sign(&claims);

        let result = TokenVerifier::default().verify_at(&token, &key_set(&[&key]), CLIENT_ID, NOW);
        assert!(matches!(
            result,
            Err(VerifyError::ClaimsInvalid { claim: "exp", .. })
        ));
    }

    /// 未来のnbfはClaimsInvalid
    #[test]
    fn test_not_yet_valid() {
        let key = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims["nbf"] = json!(NOW + 120);
        let token = key.sign(&claims);

        let result = TokenVerifier::default().verify_at(&token, &key_set(&[&key]), CLIENT_ID, NOW);
        assert!(matches!(
            result,
            Err(VerifyError::ClaimsInvalid { claim: "nbf", .. })
        ));
    }

    /// 許容誤差を超えて未来に発行されたトークンは拒否し、誤差内は受理
    #[test]
    fn test_issued_in_future() {
        let key = TestKey::generate("key-1");
        let keys = key_set(&[&key]);

        let mut claims = valid_claims();
        claims["iat"] = json!(NOW + 120);
        let result = TokenVerifier::default().verify_at(&key.sign(&claims), &keys, CLIENT_ID, NOW);
        assert!(matches!(
            result,
            Err(VerifyError::ClaimsInvalid { claim: "iat", .. })
        ));

        claims["iat"] = json!(NOW + 30);
        let identity = TokenVerifier::default()
            .verify_at(&key.sign(&claims), &keys, CLIENT_ID, NOW)
            .unwrap();
        assert_eq!(identity.subject, "user-123");
    }

    /// issuerが指定されている場合は一致を要求
    #[test]
    fn test_issuer_mismatch() {
        let key = TestKey::generate("key-1");
        let token = key.sign(&valid_claims());
        let keys = key_set(&[&key]);

        let ok = TokenVerifier::new(Some("https://idp.example.com".to_string()))
            .verify_at(&token, &keys, CLIENT_ID, NOW);
        assert!(ok.is_ok());

        let result = TokenVerifier::new(Some("https://evil.example.com".to_string()))
            .verify_at(&token, &keys, CLIENT_ID, NOW);
        assert!(matches!(
            result,
            Err(VerifyError::ClaimsInvalid { claim: "iss", .. })
        ));
    }

    /// 別の鍵で署名されたトークンはSignature
    #[test]
    fn test_wrong_key() {
        let published = TestKey::generate("key-1");
        let attacker = TestKey::generate("key-1");
        let token = attacker.sign(&valid_claims());

        let result =
            TokenVerifier::default().verify_at(&token, &key_set(&[&published]), CLIENT_ID, NOW);
        assert!(matches!(result, Err(VerifyError::Signature(_))));
    }

    /// 署名不正かつ期限切れの場合、署名エラーが優先される
    #[test]
    fn test_signature_checked_before_claims() {
        let published = TestKey::generate("key-1");
        let attacker = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims["exp"] = json!(NOW - 3600);
        claims["aud"] = json!("someone-else");
        let token = attacker.sign(&claims);

        let result =
            TokenVerifier::default().verify_at(&token, &key_set(&[&published]), CLIENT_ID, NOW);
        assert!(matches!(result, Err(VerifyError::Signature(_))));
    }

    /// 未知のkidはSignature
    #[test]
    fn test_unknown_kid() {
        let published = TestKey::generate("key-1");
        let other = TestKey::generate("key-2");
        let token = other.sign(&valid_claims());

        let result =
            TokenVerifier::default().verify_at(&token, &key_set(&[&published]), CLIENT_ID, NOW);
        assert!(matches!(result, Err(VerifyError::Signature(_))));
    }

    /// 複数鍵のJWKSからkidで正しい鍵が選ばれる
    #[test]
    fn test_key_selected_by_kid() {
        let first = TestKey::generate("key-1");
        let second = TestKey::generate("key-2");
        let token = second.sign(&valid_claims());

        let identity = TokenVerifier::default()
            .verify_at(&token, &key_set(&[&first, &second]), CLIENT_ID, NOW)
            .unwrap();
        assert_eq!(identity.subject, "user-123");
    }

    /// 署名後にペイロードを改ざんしたトークンはSignature
    #[test]
    fn test_tampered_payload() {
        let key = TestKey::generate("key-1");
        let token = key.sign(&valid_claims());
        let parts: Vec<&str> = token.split('.').collect();
        let mut claims = valid_claims();
        claims["sub"] = json!("admin");
        let forged_payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        let result = TokenVerifier::default().verify_at(&forged, &key_set(&[&key]), CLIENT_ID, NOW);
        assert!(matches!(result, Err(VerifyError::Signature(_))));
    }

    /// JWS形式でない文字列はMalformedToken
    #[test]
    fn test_malformed() {
        let key = TestKey::generate("key-1");
        let keys = key_set(&[&key]);
        let verifier = TokenVerifier::default();

        for token in ["", "not-a-token", "a.b", "a.b.c.d", "!!!.???.###"] {
            let result = verifier.verify_at(token, &keys, CLIENT_ID, NOW);
            assert!(
                matches!(result, Err(VerifyError::MalformedToken(_))),
                "token {token:?} の結果: {result:?}"
            );
        }
    }

    /// 構造の事前チェックは署名を見ない
    #[test]
    fn test_check_structure() {
        let key = TestKey::generate("key-1");
        let verifier = TokenVerifier::default();
        assert!(verifier.check_structure(&key.sign(&valid_claims())).is_ok());
        assert!(matches!(
            verifier.check_structure("a.b"),
            Err(VerifyError::MalformedToken(_))
        ));
    }

    /// subがなければClaimsInvalid
    #[test]
    fn test_missing_subject() {
        let key = TestKey::generate("key-1");
        let mut claims = valid_claims();
        claims.as_object_mut().unwrap().remove("sub");
        let token = key.sign(&claims);

        let result = TokenVerifier::default().verify_at(&token, &key_set(&[&key]), CLIENT_ID, NOW);
        assert!(matches!(
            result,
            Err(VerifyError::ClaimsInvalid { claim: "sub", .. })
        ));
    }
}
