//! Client configuration and connection strings.
//!
//! A device connection string is a `;`-separated list of `key=value` pairs:
//!
//! ```text
//! HostName=myhub.azure-devices.net;DeviceId=sensor-7;SharedAccessKey=c2VjcmV0
//! ```
//!
//! Recognised keys are `HostName`, `DeviceId`, `SharedAccessKey`,
//! `SharedAccessSignature`, `x509` and `GatewayHostName`. Exactly one
//! credential must be present.

use base64ct::{Base64, Encoding};
use heapless::String;

use crate::error::{Error, Result};

/// Maximum length of the hub name and of the DNS suffix.
pub const MAX_HUB_NAME_LEN: usize = 128;
/// Maximum length of a device id.
pub const MAX_DEVICE_ID_LEN: usize = 128;
/// Maximum length of a host name: a hub name, a `.` and a DNS suffix.
pub const MAX_HOST_NAME_LEN: usize = 2 * MAX_HUB_NAME_LEN + 1;
/// Maximum length of a base64 shared access key.
pub const MAX_KEY_LEN: usize = 128;
/// Maximum length of a SAS token.
pub const MAX_SAS_TOKEN_LEN: usize = 512;

/// How the device authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Symmetric key, base64 encoded.
    SharedAccessKey(String<MAX_KEY_LEN>),
    /// Pre-built shared access signature.
    SasToken(String<MAX_SAS_TOKEN_LEN>),
    /// Client certificate configured on the transport.
    X509,
    /// Credentials come from a device authentication provider (HSM/DPS).
    DeviceAuth,
}

/// Everything needed to build a transport for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hub name, the first label of the host name.
    pub iothub_name: String<MAX_HUB_NAME_LEN>,
    /// DNS suffix, the rest of the host name.
    pub iothub_suffix: String<MAX_HUB_NAME_LEN>,
    /// Device identity.
    pub device_id: String<MAX_DEVICE_ID_LEN>,
    /// Authentication method.
    pub credential: Credential,
    /// Edge gateway to connect through, if any.
    pub gateway_host: Option<String<MAX_HOST_NAME_LEN>>,
}

impl ClientConfig {
    /// Builds a configuration from its parts.
    pub fn new(host_name: &str, device_id: &str, credential: Credential) -> Result<Self> {
        let (name, suffix) = host_name.split_once('.').ok_or(Error::InvalidArgument)?;
        Ok(Self {
            iothub_name: non_empty(name)?,
            iothub_suffix: non_empty(suffix)?,
            device_id: non_empty(device_id)?,
            credential,
            gateway_host: None,
        })
    }

    /// Parses a device connection string.
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let mut host_name = None;
        let mut device_id = None;
        let mut key = None;
        let mut token = None;
        let mut x509 = false;
        let mut gateway = None;

        for pair in connection_string.split(';').filter(|p| !p.trim().is_empty()) {
            let (name, value) = pair.split_once('=').ok_or(Error::InvalidArgument)?;
            let value = value.trim();
            if value.is_empty() {
                return Err(Error::InvalidArgument);
            }
            match name.trim() {
                "HostName" => host_name = Some(value),
                "DeviceId" => device_id = Some(value),
                "SharedAccessKey" => key = Some(value),
                "SharedAccessSignature" => token = Some(value),
                "x509" => x509 = value.eq_ignore_ascii_case("true"),
                "GatewayHostName" => gateway = Some(value),
                other => debug!("ignoring connection string key {}", other),
            }
        }

        let credential = match (key, token, x509) {
            (Some(key), None, false) => Credential::SharedAccessKey(shared_access_key(key)?),
            (None, Some(token), false) => Credential::SasToken(non_empty(token)?),
            (None, None, true) => Credential::X509,
            _ => return Err(Error::InvalidArgument),
        };

        let host_name = host_name.ok_or(Error::InvalidArgument)?;
        let device_id = device_id.ok_or(Error::InvalidArgument)?;
        let mut config = Self::new(host_name, device_id, credential)?;
        config.gateway_host = gateway.map(non_empty).transpose()?;
        Ok(config)
    }

    /// Configuration for a device whose credentials come from a device
    /// authentication provider.
    pub fn from_device_auth(iothub_uri: &str, device_id: &str) -> Result<Self> {
        Self::new(iothub_uri, device_id, Credential::DeviceAuth)
    }

    /// Fully qualified host name of the hub.
    ///
    /// Fails with [`Error::InvalidArgument`] if the parts do not fit in
    /// [`MAX_HOST_NAME_LEN`].
    pub fn host_name(&self) -> Result<String<MAX_HOST_NAME_LEN>> {
        let mut host = String::new();
        host.push_str(&self.iothub_name)
            .and_then(|()| host.push('.'))
            .and_then(|()| host.push_str(&self.iothub_suffix))
            .map_err(|()| Error::InvalidArgument)?;
        Ok(host)
    }
}

fn non_empty<const N: usize>(value: &str) -> Result<String<N>> {
    if value.is_empty() {
        return Err(Error::InvalidArgument);
    }
    String::try_from(value).map_err(|_| Error::InvalidArgument)
}

fn shared_access_key(key: &str) -> Result<String<MAX_KEY_LEN>> {
    let mut decoded = [0u8; MAX_KEY_LEN];
    match Base64::decode(key, &mut decoded) {
        Ok(bytes) if !bytes.is_empty() => non_empty(key),
        _ => Err(Error::InvalidArgument),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "HostName=myhub.azure-devices.net;DeviceId=sensor-7;SharedAccessKey=c2VjcmV0a2V5MTIz";

    #[test]
    fn parses_key_connection_string() {
        let config = ClientConfig::from_connection_string(GOOD).unwrap();
        assert_eq!(config.iothub_name.as_str(), "myhub");
        assert_eq!(config.iothub_suffix.as_str(), "azure-devices.net");
        assert_eq!(config.device_id.as_str(), "sensor-7");
        assert_eq!(config.host_name().unwrap().as_str(), "myhub.azure-devices.net");
        assert!(matches!(config.credential, Credential::SharedAccessKey(_)));
        assert_eq!(config.gateway_host, None);
    }

    #[test]
    fn key_padding_survives_splitting() {
        let cs = "HostName=h.net;DeviceId=d;SharedAccessKey=a2V5cw==;GatewayHostName=edge.local";
        let config = ClientConfig::from_connection_string(cs).unwrap();
        assert_eq!(
            config.credential,
            Credential::SharedAccessKey(String::try_from("a2V5cw==").unwrap())
        );
        assert_eq!(config.gateway_host.unwrap().as_str(), "edge.local");
    }

    #[test]
    fn x509_and_token_credentials() {
        let cs = "HostName=h.net;DeviceId=d;x509=true";
        assert_eq!(
            ClientConfig::from_connection_string(cs).unwrap().credential,
            Credential::X509
        );
        let cs = "HostName=h.net;DeviceId=d;SharedAccessSignature=SharedAccessSignature sr=h.net&sig=abc";
        assert!(matches!(
            ClientConfig::from_connection_string(cs).unwrap().credential,
            Credential::SasToken(_)
        ));
    }

    #[test]
    fn rejects_missing_or_conflicting_parts() {
        for cs in [
            "",
            "DeviceId=d;SharedAccessKey=a2V5",
            "HostName=h.net;SharedAccessKey=a2V5",
            "HostName=h.net;DeviceId=d",
            "HostName=h.net;DeviceId=d;SharedAccessKey=a2V5;x509=true",
            "HostName=nodots;DeviceId=d;SharedAccessKey=a2V5",
            "HostName=h.net;DeviceId=;SharedAccessKey=a2V5",
            "HostName=h.net;DeviceId=d;SharedAccessKey=!!notbase64!!",
            "HostName=h.net;DeviceId",
        ] {
            assert_eq!(
                ClientConfig::from_connection_string(cs),
                Err(Error::InvalidArgument),
                "accepted {cs:?}"
            );
        }
    }

    #[test]
    fn longest_host_name_keeps_its_suffix() {
        let name = "a".repeat(MAX_HUB_NAME_LEN);
        let suffix = "b".repeat(MAX_HUB_NAME_LEN);
        let host = alloc::format!("{name}.{suffix}");
        let config = ClientConfig::new(&host, "dev", Credential::X509).unwrap();
        assert_eq!(config.host_name().unwrap().as_str(), host);

        let too_long = alloc::format!("{name}a.{suffix}");
        assert_eq!(
            ClientConfig::new(&too_long, "dev", Credential::X509),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn device_auth_config() {
        let config = ClientConfig::from_device_auth("hub.example.net", "dev").unwrap();
        assert_eq!(config.credential, Credential::DeviceAuth);
        assert!(ClientConfig::from_device_auth("", "dev").is_err());
    }
}
