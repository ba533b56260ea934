//! Named client options.
//!
//! `set_option` accepts a fixed set of names. Each name expects one value
//! type; anything else is refused with [`Error::InvalidArgument`].
//!
//! | name | value | handled by |
//! |------|-------|------------|
//! | [`OPTION_KEEP_ALIVE`] | `Integer` seconds | transport |
//! | [`OPTION_PRODUCT_INFO`] | `Str` | core and transport |
//! | [`OPTION_PROXY_DATA`] | `Proxy` | transport |
//! | [`OPTION_LOG_TRACE`] | `Bool` | transport |
//! | [`OPTION_TRUSTED_CERT`] | `Str` (PEM) | transport |
//! | [`OPTION_MESSAGE_TIMEOUT`] | `Integer` milliseconds, 0 disables | core |
//! | [`OPTION_RETRY_INTERVAL_SEC`] | `Integer` seconds | core |
//! | [`OPTION_BLOB_UPLOAD_BLOCK_SIZE`] | `Integer` bytes | core |

use core::time::Duration;

use crate::error::{Error, Result};
use crate::upload::MAX_BLOCK_SIZE;

/// MQTT/AMQP keep-alive interval.
pub const OPTION_KEEP_ALIVE: &str = "keepalive";
/// Product information appended to the user agent.
pub const OPTION_PRODUCT_INFO: &str = "product_info";
/// HTTP proxy settings.
pub const OPTION_PROXY_DATA: &str = "proxy_data";
/// Protocol level tracing in the transport.
pub const OPTION_LOG_TRACE: &str = "logtrace";
/// Extra trusted root certificates.
pub const OPTION_TRUSTED_CERT: &str = "TrustedCerts";
/// Time after which an unacknowledged operation times out.
pub const OPTION_MESSAGE_TIMEOUT: &str = "messageTimeout";
/// Delay used by the `Interval` retry policy.
pub const OPTION_RETRY_INTERVAL_SEC: &str = "retry_interval_sec";
/// Block size for single-shot blob uploads.
pub const OPTION_BLOB_UPLOAD_BLOCK_SIZE: &str = "blob_upload_block_size";

/// Maximum length of the product info string.
pub const MAX_PRODUCT_INFO_LEN: usize = 128;

/// Proxy settings. Username and password go together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyOptions<'a> {
    /// Proxy host name.
    pub host: &'a str,
    /// Proxy port.
    pub port: u16,
    /// Optional user name.
    pub username: Option<&'a str>,
    /// Optional password.
    pub password: Option<&'a str>,
}

/// Value passed to `set_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue<'a> {
    /// Integer value.
    Integer(u64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    Str(&'a str),
    /// Proxy settings.
    Proxy(ProxyOptions<'a>),
}

/// Option forwarded to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOption<'a> {
    /// Keep-alive interval in seconds.
    KeepAlive(u32),
    /// Product information string.
    ProductInfo(&'a str),
    /// Proxy settings.
    Proxy(ProxyOptions<'a>),
    /// Protocol tracing on or off.
    LogTrace(bool),
    /// Trusted certificates in PEM format.
    TrustedCerts(&'a str),
}

/// A validated option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOption<'a> {
    /// Handled by the transport alone.
    Transport(TransportOption<'a>),
    /// Stored by the core and forwarded to the transport.
    ProductInfo(&'a str),
    /// Per-operation timeout; `None` disables it.
    MessageTimeout(Option<Duration>),
    /// Delay of the `Interval` retry policy.
    RetryInterval(Duration),
    /// Single-shot upload block size.
    BlobBlockSize(usize),
}

impl<'a> ClientOption<'a> {
    /// Validates `name` and `value`.
    pub fn parse(name: &str, value: OptionValue<'a>) -> Result<Self> {
        let option = match (name, value) {
            (OPTION_KEEP_ALIVE, OptionValue::Integer(secs)) => {
                let secs = u32::try_from(secs).map_err(|_| Error::InvalidArgument)?;
                ClientOption::Transport(TransportOption::KeepAlive(secs))
            }
            (OPTION_PRODUCT_INFO, OptionValue::Str(info)) => {
                if info.len() > MAX_PRODUCT_INFO_LEN {
                    return Err(Error::InvalidArgument);
                }
                ClientOption::ProductInfo(info)
            }
            (OPTION_PROXY_DATA, OptionValue::Proxy(proxy)) => {
                let credentials_paired = proxy.username.is_some() == proxy.password.is_some();
                if proxy.host.is_empty() || proxy.port == 0 || !credentials_paired {
                    return Err(Error::InvalidArgument);
                }
                ClientOption::Transport(TransportOption::Proxy(proxy))
            }
            (OPTION_LOG_TRACE, OptionValue::Bool(on)) => ClientOption::Transport(TransportOption::LogTrace(on)),
            (OPTION_TRUSTED_CERT, OptionValue::Str(pem)) if !pem.is_empty() => {
                ClientOption::Transport(TransportOption::TrustedCerts(pem))
            }
            (OPTION_MESSAGE_TIMEOUT, OptionValue::Integer(ms)) => {
                ClientOption::MessageTimeout((ms > 0).then(|| Duration::from_millis(ms)))
            }
            (OPTION_RETRY_INTERVAL_SEC, OptionValue::Integer(secs)) if secs > 0 => {
                ClientOption::RetryInterval(Duration::from_secs(secs))
            }
            (OPTION_BLOB_UPLOAD_BLOCK_SIZE, OptionValue::Integer(bytes)) => {
                let bytes = usize::try_from(bytes).map_err(|_| Error::InvalidArgument)?;
                if bytes == 0 || bytes > MAX_BLOCK_SIZE {
                    return Err(Error::InvalidArgument);
                }
                ClientOption::BlobBlockSize(bytes)
            }
            _ => {
                warn!("rejected option {}", name);
                return Err(Error::InvalidArgument);
            }
        };
        Ok(option)
    }
}
