//! Volcengine OpenAPI request signing.
//!
//! V4-style HMAC-SHA256 signing: a canonical request is hashed into a
//! string-to-sign, the secret key is folded through date/region/service into
//! a signing key, and the result lands in the `Authorization` header. The
//! signed header set is fixed to `content-type;host;x-content-sha256;x-date`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Signature algorithm name used in the string-to-sign and Authorization.
const ALGORITHM: &str = "HMAC-SHA256";

/// Header set covered by the signature, in canonical order.
const SIGNED_HEADERS: &str = "content-type;host;x-content-sha256;x-date";

/// Content type of all OpenAPI requests.
const CONTENT_TYPE: &str = "application/json";

/// Credentials and scope for signing requests.
#[derive(Debug, Clone)]
pub(crate) struct RequestSigner {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub service: String,
}

/// The signature-bearing headers for one request.
#[derive(Debug)]
pub(crate) struct SignedHeaders {
    pub x_date: String,
    pub x_content_sha256: String,
    pub authorization: String,
    pub security_token: Option<String>,
}

impl RequestSigner {
    /// Sign a request and produce its auth headers.
    ///
    /// `query` must already be the canonical (sorted, encoded) query string.
    pub fn sign(
        &self,
        method: &str,
        host: &str,
        query: &str,
        body: &[u8],
        date: DateTime<Utc>,
    ) -> SignedHeaders {
        let x_date = date.format("%Y%m%dT%H%M%SZ").to_string();
        let short_date = date.format("%Y%m%d").to_string();

        let payload_hash = hex::encode(Sha256::digest(body));

        let canonical_request =
            canonical_request(method, query, host, &payload_hash, &x_date);

        let credential_scope = format!(
            "{}/{}/{}/request",
            short_date, self.region, self.service
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            x_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.signing_key(&short_date);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key, credential_scope, SIGNED_HEADERS, signature
        );

        SignedHeaders {
            x_date,
            x_content_sha256: payload_hash,
            authorization,
            security_token: self.session_token.clone(),
        }
    }

    /// Fold the secret key through date, region and service.
    fn signing_key(&self, short_date: &str) -> Vec<u8> {
        let k_date = hmac_sha256(self.secret_key.as_bytes(), short_date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"request")
    }
}

/// Assemble the canonical request string.
fn canonical_request(
    method: &str,
    query: &str,
    host: &str,
    payload_hash: &str,
    x_date: &str,
) -> String {
    format!(
        "{method}\n/\n{query}\ncontent-type:{content_type}\nhost:{host}\nx-content-sha256:{payload_hash}\nx-date:{x_date}\n\n{signed_headers}\n{payload_hash}",
        content_type = CONTENT_TYPE,
        signed_headers = SIGNED_HEADERS,
    )
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Build a canonical query string from key/value pairs.
///
/// Keys are sorted; keys and values are percent-encoded.
pub(crate) fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode everything outside the unreserved set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_signer() -> RequestSigner {
        RequestSigner {
            access_key: "AKTEST".to_string(),
            secret_key: "secret".to_string(),
            session_token: None,
            region: "cn-beijing".to_string(),
            service: "ark".to_string(),
        }
    }

    fn test_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_canonical_request_layout() {
        let canonical = canonical_request(
            "POST",
            "Action=ListApiKeys&Version=2024-01-01",
            "open.volcengineapi.com",
            "abc123",
            "20250601T123045Z",
        );

        let lines: Vec<&str> = canonical.split('\n').collect();
        assert_eq!(lines[0], "POST");
        assert_eq!(lines[1], "/");
        assert_eq!(lines[2], "Action=ListApiKeys&Version=2024-01-01");
        assert_eq!(lines[3], "content-type:application/json");
        assert_eq!(lines[4], "host:open.volcengineapi.com");
        assert_eq!(lines[5], "x-content-sha256:abc123");
        assert_eq!(lines[6], "x-date:20250601T123045Z");
        assert_eq!(lines[7], "");
        assert_eq!(lines[8], SIGNED_HEADERS);
        assert_eq!(lines[9], "abc123");
    }

    #[test]
    fn test_signed_headers_shape() {
        let headers = test_signer().sign(
            "POST",
            "open.volcengineapi.com",
            "Action=ListApiKeys&Version=2024-01-01",
            b"{}",
            test_date(),
        );

        assert_eq!(headers.x_date, "20250601T123045Z");
        assert_eq!(headers.x_content_sha256.len(), 64);
        assert!(headers.authorization.starts_with(
            "HMAC-SHA256 Credential=AKTEST/20250601/cn-beijing/ark/request, SignedHeaders=content-type;host;x-content-sha256;x-date, Signature="
        ));
        assert!(headers.security_token.is_none());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let signer = test_signer();
        let a = signer.sign("POST", "h", "q=1", b"{}", test_date());
        let b = signer.sign("POST", "h", "q=1", b"{}", test_date());
        assert_eq!(a.authorization, b.authorization);
    }

    #[test]
    fn test_signature_depends_on_body() {
        let signer = test_signer();
        let a = signer.sign("POST", "h", "q=1", b"{}", test_date());
        let b = signer.sign("POST", "h", "q=1", b"{\"x\":1}", test_date());
        assert_ne!(a.authorization, b.authorization);
        assert_ne!(a.x_content_sha256, b.x_content_sha256);
    }

    #[test]
    fn test_session_token_is_carried() {
        let mut signer = test_signer();
        signer.session_token = Some("token".to_string());
        let headers = signer.sign("POST", "h", "", b"{}", test_date());
        assert_eq!(headers.security_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_canonical_query_sorts_and_encodes() {
        let query = canonical_query(&[("Version", "2024-01-01"), ("Action", "ListApiKeys")]);
        assert_eq!(query, "Action=ListApiKeys&Version=2024-01-01");

        let query = canonical_query(&[("Id", "a b/c")]);
        assert_eq!(query, "Id=a%20b%2Fc");
    }
}
