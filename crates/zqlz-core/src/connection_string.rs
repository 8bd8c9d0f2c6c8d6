//! Connection string codec
//!
//! Splits a URI-shaped connection string into its components and puts it
//! back together without touching anything the caller did not change.
//! Credentials are kept exactly as written (no percent decoding), so
//! `parse(s).to_string()` reproduces `s` for every observable component and
//! replacing the password never disturbs the user, host or options.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::{Result, ZqlzError};

/// `scheme://[user[:password]@]host[:port][/path][?query][#fragment]`
///
/// The user may not contain `:`, `@` or `/`; the password may contain `:`
/// but not `@` or `/`. Hosts may be bracketed IPv6 literals.
static CONNECTION_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^([a-z][a-z\d+\-.]*)://(?:([^:@/\s]*)(?::([^@/\s]*))?@)?([^:/\s]+|\[[^\]]+\])(?::(\d+))?(?:/([^?#\s]*))?(?:\?([^#\s]*))?(?:#(.*))?$",
    )
    .expect("valid regex")
});

/// Placeholder shown instead of a password in logs and UI
pub const REDACTED_PASSWORD: &str = "****";

/// A parsed connection string
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionUrl {
    scheme: String,
    user: String,
    password: String,
    host: String,
    port: Option<String>,
    /// Path after the leading slash. `Some("")` means the string ended with `/`.
    path: Option<String>,
    query: Option<String>,
    fragment: Option<String>,
}

impl ConnectionUrl {
    /// Parse a connection string. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let captures = CONNECTION_URL_RE.captures(trimmed).ok_or_else(|| {
            ZqlzError::InvalidConnectionString(
                "expected scheme://[user[:password]@]host[:port][/database]".to_string(),
            )
        })?;

        let group = |i: usize| captures.get(i).map(|m| m.as_str().to_string());

        Ok(Self {
            scheme: group(1).unwrap_or_default(),
            user: group(2).unwrap_or_default(),
            password: group(3).unwrap_or_default(),
            host: group(4).unwrap_or_default(),
            port: group(5),
            path: group(6),
            query: group(7),
            fragment: group(8),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Port as a number, if present and in range
    pub fn port_number(&self) -> Option<u16> {
        self.port.as_deref().and_then(|p| p.parse().ok())
    }

    /// Path without its leading slash
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Database name: the path, unless it is empty
    pub fn database(&self) -> Option<&str> {
        self.path.as_deref().filter(|p| !p.is_empty())
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// Replace the password component. The value is inserted as-is; use
    /// [`encode_credential`] first for text typed by a user.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn clear_password(&mut self) {
        self.password.clear();
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = user.into();
    }

    /// Decoded `key=value` pairs from the query string
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match self.query.as_deref() {
            Some(query) => url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// First value for a query parameter
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// TLS settings implied by the query parameters, if any
    pub fn ssl_config(&self) -> Result<Option<SslConfig>> {
        SslConfig::from_url(self)
    }

    /// Render with the password masked, for logs
    pub fn redacted(&self) -> String {
        let mut masked = self.clone();
        if masked.has_password() {
            masked.password = REDACTED_PASSWORD.to_string();
        }
        masked.to_string()
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;

        if !self.user.is_empty() || !self.password.is_empty() {
            f.write_str(&self.user)?;
            if !self.password.is_empty() {
                write!(f, ":{}", self.password)?;
            }
            f.write_str("@")?;
        }

        f.write_str(&self.host)?;
        if let Some(port) = &self.port {
            write!(f, ":{}", port)?;
        }
        if let Some(path) = &self.path {
            write!(f, "/{}", path)?;
        }
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ConnectionUrl {
    type Err = ZqlzError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Whether `raw` carries a non-empty password
pub fn has_password(raw: &str) -> Result<bool> {
    Ok(ConnectionUrl::parse(raw)?.has_password())
}

/// Extract the password component, `None` when absent or empty
pub fn password_of(raw: &str) -> Result<Option<String>> {
    let url = ConnectionUrl::parse(raw)?;
    Ok(url.has_password().then(|| url.password().to_string()))
}

/// Replace only the password component of `raw`
pub fn with_password(raw: &str, password: &str) -> Result<String> {
    let mut url = ConnectionUrl::parse(raw)?;
    url.set_password(password);
    Ok(url.to_string())
}

/// Remove the password component of `raw`
pub fn without_password(raw: &str) -> Result<String> {
    let mut url = ConnectionUrl::parse(raw)?;
    url.clear_password();
    Ok(url.to_string())
}

/// Percent-encode a user name or password so it can be placed in the
/// userinfo section. Unreserved characters are left alone.
pub fn encode_credential(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// TLS configuration derived from connection string parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SslConfig {
    Disabled,
    Enabled,
    Options(SslOptions),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SslOptions {
    pub reject_unauthorized: Option<bool>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub ca: Option<String>,
    pub passphrase: Option<String>,
    pub servername: Option<String>,
}

impl SslConfig {
    fn from_url(url: &ConnectionUrl) -> Result<Option<Self>> {
        let ssl_mode = url.query_param("sslmode");
        let ssl = url.query_param("ssl");
        let cert = url.query_param("sslcert");
        let key = url.query_param("sslkey");
        let root_cert = url.query_param("sslrootcert");
        let passphrase = url.query_param("sslpassword");
        let servername = url.query_param("sslservername");

        let has_cert_params = cert.is_some()
            || key.is_some()
            || root_cert.is_some()
            || passphrase.is_some()
            || servername.is_some();

        if ssl_mode.is_some() || has_cert_params {
            let mode = ssl_mode.as_deref();

            if mode == Some("disable") && has_cert_params {
                return Err(ZqlzError::InvalidConnectionString(
                    "sslmode=disable cannot be combined with sslcert, sslkey, sslrootcert, sslpassword or sslservername"
                        .to_string(),
                ));
            }

            if !has_cert_params {
                match mode {
                    Some("disable") => return Ok(Some(SslConfig::Disabled)),
                    Some("no-verify") => {
                        return Ok(Some(SslConfig::Options(SslOptions {
                            reject_unauthorized: Some(false),
                            ..Default::default()
                        })));
                    }
                    Some("verify") => {
                        return Ok(Some(SslConfig::Options(SslOptions {
                            reject_unauthorized: Some(true),
                            ..Default::default()
                        })));
                    }
                    _ => {}
                }
            }

            let lenient = matches!(mode, Some("prefer") | Some("no-verify"))
                || (mode == Some("require") && root_cert.is_none() && !has_cert_params);

            return Ok(Some(SslConfig::Options(SslOptions {
                reject_unauthorized: lenient.then_some(false),
                cert,
                key,
                ca: root_cert,
                passphrase,
                servername,
            })));
        }

        match ssl.as_deref().map(str::to_lowercase).as_deref() {
            Some("1") | Some("true") => Ok(Some(SslConfig::Enabled)),
            Some("0") | Some("false") => Ok(Some(SslConfig::Disabled)),
            _ => Ok(None),
        }
    }
}
