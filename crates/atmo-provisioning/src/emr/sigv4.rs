//! AWS Signature Version 4 for JSON protocol requests
//!
//! Only what the EMR JSON protocol needs: `POST /`, no query string, a small
//! fixed set of signed headers.

use crate::error::{ProvisioningError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Long-lived or session credentials
#[derive(Debug, Clone)]
pub struct SigningCredentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
}

/// Headers to attach to a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
    pub security_token: Option<String>,
}

/// Request fields covered by the signature
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub host: &'a str,
    pub content_type: &'a str,
    pub target: &'a str,
    pub body: &'a [u8],
}

pub fn sign(
    credentials: &SigningCredentials<'_>,
    region: &str,
    service: &str,
    request: &SigningRequest<'_>,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers = vec![
        ("content-type", request.content_type.trim().to_string()),
        ("host", request.host.trim().to_string()),
        ("x-amz-date", amz_date.clone()),
        ("x-amz-target", request.target.trim().to_string()),
    ];
    if let Some(token) = credentials.session_token {
        headers.push(("x-amz-security-token", token.trim().to_string()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(request.body))
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(credentials.secret_access_key, &date, region, service)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    Ok(SignedHeaders {
        amz_date,
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
        ),
        security_token: credentials.session_token.map(str::to_string),
    })
}

/// Derive the per-day, per-region, per-service signing key
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProvisioningError::Configuration(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signing_key_matches_reference_derivation() {
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
    fn test_authorization_header_shape() {
        let credentials = SigningCredentials {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            session_token: Some("session"),
        };
        let request = SigningRequest {
            host: "elasticmapreduce.us-west-2.amazonaws.com",
            content_type: "application/x-amz-json-1.1",
            target: "ElasticMapReduce.DescribeCluster",
            body: br#"{"ClusterId":"j-1"}"#,
        };
        let now = Utc.with_ymd_and_hms(2017, 5, 23, 13, 28, 0).unwrap();

        let signed = sign(&credentials, "us-west-2", "elasticmapreduce", &request, now).unwrap();
        assert_eq!(signed.amz_date, "20170523T132800Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20170523/us-west-2/elasticmapreduce/aws4_request, "
        ));
        assert!(signed.authorization.contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target, "
        ));
        let signature = signed.authorization.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);

        // Deterministic for identical input
        let again = sign(&credentials, "us-west-2", "elasticmapreduce", &request, now).unwrap();
        assert_eq!(signed, again);
    }
}
