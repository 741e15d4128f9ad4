use actix_web::http::Cookie;
use actix_web::{HttpMessage, HttpRequest};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";

/// Sessions live for one hour; expiry is the only kill switch, there is no
/// server-side revocation list.
pub const SESSION_TTL_SECS: i64 = 60 * 60;

/// Symmetric secret used to sign session tokens. Loaded once at startup; a
/// missing secret is a fatal configuration error, never a per-request one.
#[derive(Clone)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn new(secret: Vec<u8>) -> SessionKey {
        SessionKey(secret)
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.0).expect("hmac accepts any key length")
    }
}

/// Signed token payload. Readable by the client (base64, not encrypted) but
/// not forgeable without the key. Times are unix seconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: u64,
    pub username: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: u64,
    pub username: String,
}

/// Signs a fresh token for an already-authenticated identity. The token is
/// `base64url(payload) "." base64url(hmac_sha256(payload_b64))`.
pub fn issue(key: &SessionKey, user_id: u64, username: &str, now: i64) -> String {
    let claims = Claims {
        user_id,
        username: username.to_owned(),
        issued_at: now,
        expires_at: now + SESSION_TTL_SECS,
    };
    let body = base64::encode_config(
        serde_json::to_vec(&claims).unwrap(),
        base64::URL_SAFE_NO_PAD,
    );
    let mut mac = key.mac();
    mac.update(body.as_bytes());
    let sig = base64::encode_config(mac.finalize().into_bytes(), base64::URL_SAFE_NO_PAD);
    format!("{}.{}", body, sig)
}

/// Recovers the identity carried by a token. Every failure mode (missing
/// segment, bad base64, wrong signature, malformed payload, expiry passed)
/// collapses to `None`; callers treat `None` as anonymous.
pub fn resolve(key: &SessionKey, token: &str, now: i64) -> Option<Identity> {
    let mut parts = token.splitn(2, '.');
    let body = parts.next()?;
    let sig = parts.next()?;
    let sig = base64::decode_config(sig, base64::URL_SAFE_NO_PAD).ok()?;
    let mut mac = key.mac();
    mac.update(body.as_bytes());
    mac.verify_slice(&sig).ok()?;
    let payload = base64::decode_config(body, base64::URL_SAFE_NO_PAD).ok()?;
    let claims: Claims = serde_json::from_slice(&payload).ok()?;
    if claims.expires_at <= now {
        return None;
    }
    Some(Identity {
        user_id: claims.user_id,
        username: claims.username,
    })
}

/// Builds the session cookie for a fresh login, overwriting any prior one.
pub fn session_cookie(key: &SessionKey, user_id: u64, username: &str) -> Cookie<'static> {
    let token = issue(key, user_id, username, Utc::now().timestamp());
    Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .max_age_time(time::Duration::seconds(SESSION_TTL_SECS))
        .finish()
}

/// Logout: an empty value with an immediate expiry makes the client drop the
/// cookie. A token already held elsewhere stays valid until natural expiry.
pub fn expired_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .max_age_time(time::Duration::zero())
        .finish()
}

pub fn identity_from_request(req: &HttpRequest, key: &SessionKey) -> Option<Identity> {
    let cookie = req.cookie(SESSION_COOKIE)?;
    resolve(key, cookie.value(), Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new(b"a test signing secret".to_vec())
    }

    #[test]
    fn round_trip() {
        let key = key();
        let token = issue(&key, 1, "alice", 1_000_000);
        let identity = resolve(&key, &token, 1_000_000).unwrap();
        assert_eq!(identity.user_id, 1);
        assert_eq!(identity.username, "alice");
    }

    #[test]
    fn expired_token_is_absent() {
        let key = key();
        let token = issue(&key, 1, "alice", 1_000_000);
        assert!(resolve(&key, &token, 1_000_000 + SESSION_TTL_SECS).is_none());
        assert!(resolve(&key, &token, 1_000_000 + SESSION_TTL_SECS + 1).is_none());
        // Still valid one second before expiry.
        assert!(resolve(&key, &token, 1_000_000 + SESSION_TTL_SECS - 1).is_some());
    }

    #[test]
    fn tampered_signature_is_absent() {
        let key = key();
        let mut token = issue(&key, 1, "alice", 1_000_000).into_bytes();
        let last = token.len() - 1;
        token[last] = if token[last] == b'A' { b'B' } else { b'A' };
        let token = String::from_utf8(token).unwrap();
        assert!(resolve(&key, &token, 1_000_000).is_none());
    }

    #[test]
    fn tampered_payload_is_absent() {
        let key = key();
        let token = issue(&key, 1, "alice", 1_000_000);
        let dot = token.find('.').unwrap();
        let mut bytes = token.into_bytes();
        bytes[dot - 1] = if bytes[dot - 1] == b'A' { b'B' } else { b'A' };
        let token = String::from_utf8(bytes).unwrap();
        assert!(resolve(&key, &token, 1_000_000).is_none());
    }

    #[test]
    fn wrong_key_is_absent() {
        let token = issue(&key(), 1, "alice", 1_000_000);
        let other = SessionKey::new(b"another secret".to_vec());
        assert!(resolve(&other, &token, 1_000_000).is_none());
    }

    #[test]
    fn garbage_tokens_are_absent() {
        let key = key();
        assert!(resolve(&key, "", 0).is_none());
        assert!(resolve(&key, "no-dot-here", 0).is_none());
        assert!(resolve(&key, "body.!!!not-base64!!!", 0).is_none());
        assert!(resolve(&key, ".", 0).is_none());
    }
}
