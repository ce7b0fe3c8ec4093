//! Request signing for IAM-authenticated endpoints.
//!
//! [`SigV4Signer`] produces AWS Signature Version 4 headers for the
//! WebSocket upgrade request. The signature covers the host, the request
//! path, and the timestamp, so a fresh set of headers is needed for every
//! connection attempt.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::traversal::Headers;

/// Signing service identifier for the graph database.
pub const GRAPH_DB_SERVICE: &str = "neptune-db";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// Errors from request signing.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("Missing endpoint: {0}")]
    MissingEndpoint(&'static str),

    #[error("Invalid signing key")]
    InvalidKey,
}

/// Credentials as configured. Missing fields fall back to the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
}

/// Credentials with every required field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

impl Credentials {
    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<ResolvedCredentials, SigningError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve using `lookup` for any field not set explicitly.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ResolvedCredentials, SigningError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |explicit: &Option<String>, var: &str| {
            explicit
                .clone()
                .or_else(|| lookup(var))
                .filter(|v| !v.is_empty())
        };

        let access_key_id = pick(&self.access_key_id, "AWS_ACCESS_KEY_ID")
            .ok_or(SigningError::MissingCredentials("access key id"))?;
        let secret_access_key = pick(&self.secret_access_key, "AWS_SECRET_ACCESS_KEY")
            .ok_or(SigningError::MissingCredentials("secret access key"))?;
        let region = pick(&self.region, "AWS_REGION")
            .ok_or(SigningError::MissingCredentials("region"))?;
        let session_token = pick(&self.session_token, "AWS_SESSION_TOKEN");

        Ok(ResolvedCredentials {
            access_key_id,
            secret_access_key,
            session_token,
            region,
        })
    }
}

impl From<&tether_core::ConnectionConfig> for Credentials {
    fn from(config: &tether_core::ConnectionConfig) -> Self {
        Self {
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            session_token: config.session_token.clone(),
            region: config.region.clone(),
        }
    }
}

/// Everything needed to sign one connection attempt.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub service: String,
    pub credentials: Credentials,
}

/// Produces authentication headers for a connection attempt.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &SigningRequest) -> Result<Headers, SigningError>;
}

/// AWS Signature Version 4 signer.
#[derive(Debug, Clone, Default)]
pub struct SigV4Signer {
    fixed_time: Option<DateTime<Utc>>,
}

impl SigV4Signer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign with a fixed timestamp instead of the current time.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            fixed_time: Some(time),
        }
    }

    fn sign_resolved(
        &self,
        request: &SigningRequest,
        credentials: &ResolvedCredentials,
    ) -> Result<Headers, SigningError> {
        let host = request
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(SigningError::MissingEndpoint("host"))?;
        let port = request.port.ok_or(SigningError::MissingEndpoint("port"))?;

        let now = self.fixed_time.unwrap_or_else(Utc::now);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let host_header = format!("{host}:{port}");

        let mut canonical_headers = vec![
            ("host", host_header.clone()),
            ("x-amz-date", amz_date.clone()),
        ];
        if let Some(token) = &credentials.session_token {
            canonical_headers.push(("x-amz-security-token", token.clone()));
        }
        let signed_headers = canonical_headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");
        let header_block: String = canonical_headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n\n{header_block}\n{signed_headers}\n{}",
            request.path,
            hex::encode(Sha256::digest(b"")),
        );

        let scope = format!(
            "{date}/{}/{}/aws4_request",
            credentials.region, request.service
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes())),
        );

        let key = signing_key(
            &credentials.secret_access_key,
            &date,
            &credentials.region,
            &request.service,
        )?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        let mut headers = Headers::new();
        headers.insert("Host".to_string(), host_header);
        headers.insert("X-Amz-Date".to_string(), amz_date);
        headers.insert(
            "Authorization".to_string(),
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                credentials.access_key_id
            ),
        );
        if let Some(token) = &credentials.session_token {
            headers.insert("X-Amz-Security-Token".to_string(), token.clone());
        }
        Ok(headers)
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(&self, request: &SigningRequest) -> Result<Headers, SigningError> {
        let credentials = request.credentials.resolve()?;
        self.sign_resolved(request, &credentials)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the per-day, per-region, per-service signing key.
fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn explicit_credentials(token: Option<&str>) -> Credentials {
        Credentials {
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            session_token: token.map(str::to_string),
            region: Some("us-east-1".to_string()),
        }
    }

    fn request(credentials: Credentials) -> SigningRequest {
        SigningRequest {
            host: Some("db.cluster.example.com".to_string()),
            port: Some(8182),
            path: "/gremlin".to_string(),
            service: GRAPH_DB_SERVICE.to_string(),
            credentials,
        }
    }

    fn fixed_signer() -> SigV4Signer {
        SigV4Signer::at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
    }

    #[test]
    fn test_hmac_matches_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_signing_key_matches_published_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_headers_shape() {
        let headers = fixed_signer().sign(&request(explicit_credentials(None))).unwrap();
        assert_eq!(headers["Host"], "db.cluster.example.com:8182");
        assert_eq!(headers["X-Amz-Date"], "20240301T123000Z");
        let auth = &headers["Authorization"];
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240301/us-east-1/neptune-db/aws4_request, "
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-date, "));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(!headers.contains_key("X-Amz-Security-Token"));
    }

    #[test]
    fn test_session_token_is_signed() {
        let headers = fixed_signer()
            .sign(&request(explicit_credentials(Some("token-123"))))
            .unwrap();
        assert_eq!(headers["X-Amz-Security-Token"], "token-123");
        assert!(headers["Authorization"]
            .contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_signature_is_deterministic_and_path_sensitive() {
        let signer = fixed_signer();
        let a = signer.sign(&request(explicit_credentials(None))).unwrap();
        let b = signer.sign(&request(explicit_credentials(None))).unwrap();
        assert_eq!(a, b);

        let mut other = request(explicit_credentials(None));
        other.path = "/status".to_string();
        let c = signer.sign(&other).unwrap();
        assert_ne!(a["Authorization"], c["Authorization"]);
    }

    #[test]
    fn test_missing_credentials() {
        let creds = Credentials {
            region: Some("us-east-1".to_string()),
            ..Default::default()
        };
        let err = creds.resolve_with(|_| None).unwrap_err();
        assert!(matches!(err, SigningError::MissingCredentials("access key id")));
    }

    #[test]
    fn test_environment_fallback() {
        let creds = Credentials {
            access_key_id: Some("AKID".to_string()),
            ..Default::default()
        };
        let resolved = creds
            .resolve_with(|name| match name {
                "AWS_SECRET_ACCESS_KEY" => Some("secret".to_string()),
                "AWS_REGION" => Some("eu-west-1".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(resolved.access_key_id, "AKID");
        assert_eq!(resolved.secret_access_key, "secret");
        assert_eq!(resolved.region, "eu-west-1");
        assert_eq!(resolved.session_token, None);
    }

    #[test]
    fn test_missing_endpoint() {
        let mut req = request(explicit_credentials(None));
        req.host = None;
        let err = fixed_signer().sign(&req).unwrap_err();
        assert!(matches!(err, SigningError::MissingEndpoint("host")));

        let mut req = request(explicit_credentials(None));
        req.port = None;
        let err = fixed_signer().sign(&req).unwrap_err();
        assert!(matches!(err, SigningError::MissingEndpoint("port")));
    }
}
