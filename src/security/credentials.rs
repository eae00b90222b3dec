// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! IoT Hub device connection strings and SAS tokens

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// MQTT api-version IoT Hub expects in the username
pub const IOT_HUB_API_VERSION: &str = "2021-04-12";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("connection string is missing {0}")]
    MissingField(&'static str),

    #[error("malformed connection string segment #{0}")]
    Malformed(usize),

    #[error("shared access key is not valid base64")]
    InvalidKey,
}

/// How the device proves its identity
#[derive(Debug)]
enum DeviceAuth {
    /// Key we sign fresh SAS tokens with
    SharedAccessKey(SecretString),
    /// Token issued out of band, used verbatim
    SharedAccessSignature(SecretString),
}

/// Parsed `HostName=...;DeviceId=...;SharedAccessKey=...` connection string.
///
/// Secrets stay wrapped in [`SecretString`] so `Debug` output never leaks them.
#[derive(Debug)]
pub struct DeviceCredentials {
    pub host_name: String,
    pub device_id: String,
    auth: DeviceAuth,
}

impl DeviceCredentials {
    pub fn parse(connection_string: &str) -> Result<Self, CredentialError> {
        let mut host_name = None;
        let mut device_id = None;
        let mut key = None;
        let mut signature = None;

        let segments = connection_string.split(';').map(str::trim).filter(|s| !s.is_empty());
        for (index, segment) in segments.enumerate() {
            // values (base64 keys, tokens) may themselves contain '='
            let (name, value) = segment.split_once('=').ok_or(CredentialError::Malformed(index + 1))?;
            match name.trim() {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "SharedAccessKey" => key = Some(value.to_string()),
                "SharedAccessSignature" => signature = Some(value.to_string()),
                _ => {}
            }
        }

        let host_name = host_name
            .filter(|h| !h.is_empty())
            .ok_or(CredentialError::MissingField("HostName"))?;
        let device_id = device_id
            .filter(|d| !d.is_empty())
            .ok_or(CredentialError::MissingField("DeviceId"))?;
        let auth = match (key, signature) {
            (Some(key), _) => {
                base64::engine::general_purpose::STANDARD
                    .decode(&key)
                    .map_err(|_| CredentialError::InvalidKey)?;
                DeviceAuth::SharedAccessKey(SecretString::new(key))
            }
            (None, Some(signature)) => DeviceAuth::SharedAccessSignature(SecretString::new(signature)),
            (None, None) => return Err(CredentialError::MissingField("SharedAccessKey")),
        };

        Ok(Self { host_name, device_id, auth })
    }

    /// `{host}/devices/{device}` - the resource a SAS token is scoped to
    pub fn resource_uri(&self) -> String {
        format!("{}/devices/{}", self.host_name, self.device_id)
    }

    pub fn mqtt_username(&self) -> String {
        format!("{}/{}/?api-version={}", self.host_name, self.device_id, IOT_HUB_API_VERSION)
    }

    /// MQTT password: a SAS token valid until `expiry`, or the pre-issued one
    pub fn password(&self, expiry: DateTime<Utc>) -> Result<SecretString, CredentialError> {
        match &self.auth {
            DeviceAuth::SharedAccessKey(key) => {
                sign_sas_token(&self.resource_uri(), key.expose_secret(), expiry.timestamp())
            }
            DeviceAuth::SharedAccessSignature(token) => Ok(token.clone()),
        }
    }
}

/// Build `SharedAccessSignature sr=..&sig=..&se=..` for `resource_uri`
pub fn sign_sas_token(resource_uri: &str, key_base64: &str, expiry: i64) -> Result<SecretString, CredentialError> {
    let key = base64::engine::general_purpose::STANDARD
        .decode(key_base64)
        .map_err(|_| CredentialError::InvalidKey)?;
    let encoded_uri = url_encode(resource_uri);

    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| CredentialError::InvalidKey)?;
    mac.update(format!("{encoded_uri}\n{expiry}").as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    Ok(SecretString::new(format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_uri,
        url_encode(&signature),
        expiry
    )))
}

/// Percent-encode everything outside the RFC 3986 unreserved set
fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KEY: &str = "cmlkZWF1LWNhbmFsLXRlc3Qta2V5LTAxMjM0NTY3ODk=";

    fn connection_string() -> String {
        format!("HostName=canal-hub.azure-devices.net;DeviceId=dows-lake;SharedAccessKey={KEY}")
    }

    #[test]
    fn test_parse_connection_string() {
        let creds = DeviceCredentials::parse(&connection_string()).unwrap();
        assert_eq!(creds.host_name, "canal-hub.azure-devices.net");
        assert_eq!(creds.device_id, "dows-lake");
        assert_eq!(creds.resource_uri(), "canal-hub.azure-devices.net/devices/dows-lake");
        assert_eq!(
            creds.mqtt_username(),
            "canal-hub.azure-devices.net/dows-lake/?api-version=2021-04-12"
        );
        assert!(!format!("{creds:?}").contains(KEY));
    }

    #[test]
    fn test_sas_token_signature() {
        let creds = DeviceCredentials::parse(&connection_string()).unwrap();
        let expiry = Utc.with_ymd_and_hms(2025, 1, 15, 14, 30, 0).unwrap();
        let token = creds.password(expiry).unwrap();

        assert_eq!(
            token.expose_secret(),
            "SharedAccessSignature sr=canal-hub.azure-devices.net%2Fdevices%2Fdows-lake\
             &sig=0e0irNHevqFcfau%2FqwAFkPkefudkDzuHvFfRn9U8kL8%3D&se=1736951400"
        );
    }

    #[test]
    fn test_pre_issued_signature_used_verbatim() {
        let creds = DeviceCredentials::parse(
            "HostName=h.azure-devices.net;DeviceId=nac;SharedAccessSignature=SharedAccessSignature sr=x&sig=y&se=1",
        )
        .unwrap();
        let token = creds.password(Utc::now()).unwrap();
        assert_eq!(token.expose_secret(), "SharedAccessSignature sr=x&sig=y&se=1");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = DeviceCredentials::parse("DeviceId=nac;SharedAccessKey=abcd").unwrap_err();
        assert!(matches!(err, CredentialError::MissingField("HostName")));

        let err = DeviceCredentials::parse("HostName=h;DeviceId=nac").unwrap_err();
        assert!(matches!(err, CredentialError::MissingField("SharedAccessKey")));
    }

    #[test]
    fn test_bad_key_and_segments_rejected() {
        let err = DeviceCredentials::parse("HostName=h;DeviceId=nac;SharedAccessKey=***").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidKey));

        let err = DeviceCredentials::parse("HostName=h;garbage-secret").unwrap_err();
        assert_eq!(err.to_string(), "malformed connection string segment #2");
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("a/b+c=d"), "a%2Fb%2Bc%3Dd");
        assert_eq!(url_encode("safe-_.~"), "safe-_.~");
    }
}
