use anyhow::{Context, Result, bail};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

pub const API_KEY_ID_ENV: &str = "VERACODE_API_KEY_ID";
pub const API_KEY_SECRET_ENV: &str = "VERACODE_API_KEY_SECRET";

const AUTH_SCHEME: &str = "VERACODE-HMAC-SHA-256";
const REQUEST_VERSION: &[u8] = b"vcode_request_version_1";

type HmacSha256 = Hmac<Sha256>;

/// API key pair. The secret is hex encoded, as issued by the service.
#[derive(Clone)]
pub struct Credentials {
    pub id: String,
    secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("secret", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let secret = secret.into();
        if id.trim().is_empty() || secret.trim().is_empty() {
            bail!("API credentials are empty; set {API_KEY_ID_ENV} and {API_KEY_SECRET_ENV}");
        }
        hex::decode(&secret).context("API key secret is not valid hex")?;
        Ok(Self { id, secret })
    }

    /// Explicit values win over the environment.
    pub fn resolve(id: Option<String>, secret: Option<String>) -> Result<Self> {
        let id = id
            .or_else(|| std::env::var(API_KEY_ID_ENV).ok())
            .with_context(|| format!("{API_KEY_ID_ENV} is not set"))?;
        let secret = secret
            .or_else(|| std::env::var(API_KEY_SECRET_ENV).ok())
            .with_context(|| format!("{API_KEY_SECRET_ENV} is not set"))?;
        Self::new(id, secret)
    }

    /// `Authorization` header value for a request to `url`.
    pub fn authorization_header(&self, url: &Url, method: &str) -> Result<String> {
        let nonce = hex::encode(rand::random::<[u8; 16]>());
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.header_with(url, method, timestamp, &nonce)
    }

    fn header_with(&self, url: &Url, method: &str, timestamp: i64, nonce: &str) -> Result<String> {
        let host = url.host_str().context("request URL has no host")?;
        let path = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let data = signing_data(&self.id, host, &path, method);
        let signature = self.signature(&data, timestamp, nonce)?;
        Ok(format!(
            "{AUTH_SCHEME} id={},ts={timestamp},nonce={nonce},sig={signature}",
            self.id
        ))
    }

    fn signature(&self, data: &str, timestamp: i64, nonce: &str) -> Result<String> {
        let secret = hex::decode(&self.secret).context("API key secret is not valid hex")?;
        let nonce = hex::decode(nonce).context("nonce is not valid hex")?;
        let key_nonce = mac(&secret, &nonce)?;
        let key_date = mac(&key_nonce, timestamp.to_string().as_bytes())?;
        let signing_key = mac(&key_date, REQUEST_VERSION)?;
        Ok(hex::encode(mac(&signing_key, data.as_bytes())?))
    }
}

fn signing_data(id: &str, host: &str, path: &str, method: &str) -> String {
    format!(
        "id={}&host={}&url={path}&method={}",
        id.to_lowercase(),
        host.to_lowercase(),
        method.to_uppercase()
    )
}

fn mac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut m = HmacSha256::new_from_slice(key).context("invalid HMAC key")?;
    m.update(data);
    Ok(m.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("702a1650", "0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn signing_data_normalises_case() {
        assert_eq!(
            signing_data("ABCdef", "VERACODE.com", "/Home", "get"),
            "id=abcdef&host=veracode.com&url=/Home&method=GET"
        );
    }

    #[test]
    fn header_matches_known_signature() {
        let url = Url::parse(
            "https://analysiscenter.veracode.com:443/api/5.0/getbuildinfo.do?app_id=1&build_id=2",
        )
        .unwrap();
        let header = creds()
            .header_with(&url, "GET", 1445452792746, "00112233445566778899aabbccddeeff")
            .unwrap();
        assert_eq!(
            header,
            "VERACODE-HMAC-SHA-256 id=702a1650,ts=1445452792746,\
             nonce=00112233445566778899aabbccddeeff,\
             sig=c43ec2d9d48c62d7fa2a441611ea71ce9a829a3d56380b5a4cfc6f3c1a6ecd0d"
        );
    }

    #[test]
    fn fresh_headers_use_new_nonces() {
        let url = Url::parse("https://analysiscenter.veracode.com/api/5.0/getapplist.do").unwrap();
        let a = creds().authorization_header(&url, "GET").unwrap();
        let b = creds().authorization_header(&url, "GET").unwrap();
        assert!(a.starts_with("VERACODE-HMAC-SHA-256 id=702a1650,ts="));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_or_non_hex_secret() {
        assert!(Credentials::new("id", "").is_err());
        assert!(Credentials::new("id", "not-hex").is_err());
    }

    #[test]
    fn explicit_values_win() {
        let c = Credentials::resolve(Some("cli-id".into()), Some("abcd".into())).unwrap();
        assert_eq!(c.id, "cli-id");
    }

    #[test]
    fn debug_hides_secret() {
        let shown = format!("{:?}", creds());
        assert!(!shown.contains("0123456789abcdef"));
    }
}
