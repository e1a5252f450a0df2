//! TLS and basic authentication settings for the HTTP endpoint.
//!
//! Loaded from the optional file passed as `--web.config`. The file uses the
//! Prometheus web configuration layout, in YAML:
//!
//! ```yaml
//! tls_server_config:
//!   cert_file: /etc/v2ray-exporter/server.crt
//!   key_file: /etc/v2ray-exporter/server.key
//! basic_auth_users:
//!   # bcrypt hash of the password
//!   prometheus: $2y$10$X0h1gDsPszWURQaxFh.zoubFi6DXncSjhoQNJgRrnGs7EsimhC7zG
//! ```
//!
//! Files ending in `.json5` are read as JSON5 with the same keys.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;

use crate::config::ConfigError;
use crate::error::{Error, Result};

/// Contents of the web config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSecurityConfig {
    /// Serve over TLS when set.
    #[serde(default)]
    pub tls_server_config: Option<TlsServerConfig>,

    /// Username to bcrypt hash of the password. Empty disables auth.
    #[serde(default)]
    pub basic_auth_users: HashMap<String, String>,
}

/// Server certificate and key, both PEM encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsServerConfig {
    pub cert_file: String,
    pub key_file: String,
}

impl WebSecurityConfig {
    /// Load and validate a web config file, YAML unless it ends in `.json5`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json5") => Self::parse_json5(&content),
            _ => Self::parse(&content),
        }
    }

    /// Parse and validate a web config from a YAML string.
    pub fn parse(content: &str) -> std::result::Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: WebSecurityConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a web config from a JSON5 string.
    pub fn parse_json5(content: &str) -> std::result::Result<Self, ConfigError> {
        let config: WebSecurityConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some(tls) = &self.tls_server_config {
            for (what, path) in [("cert_file", &tls.cert_file), ("key_file", &tls.key_file)] {
                if path.is_empty() {
                    return Err(ConfigError::Validation(format!("{} must be set", what)));
                }
                if !Path::new(path).is_file() {
                    return Err(ConfigError::Validation(format!(
                        "{} not found: {}",
                        what, path
                    )));
                }
            }
        }

        for (user, hash) in &self.basic_auth_users {
            if !is_bcrypt_hash(hash) {
                return Err(ConfigError::Validation(format!(
                    "password hash for user '{}' is not a bcrypt hash",
                    user
                )));
            }
        }

        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_server_config.is_some()
    }

    pub fn auth_enabled(&self) -> bool {
        !self.basic_auth_users.is_empty()
    }

    /// Check an `Authorization` header value against the configured users.
    pub fn authorize(&self, header: Option<&str>) -> bool {
        if !self.auth_enabled() {
            return true;
        }

        let Some((user, password)) = header.and_then(parse_basic_auth) else {
            return false;
        };

        match self.basic_auth_users.get(&user) {
            Some(hash) => bcrypt::verify(&password, hash).unwrap_or(false),
            None => false,
        }
    }

    /// Build the rustls server configuration, if TLS is enabled.
    pub fn rustls_config(&self) -> Result<Option<Arc<ServerConfig>>> {
        let Some(tls) = &self.tls_server_config else {
            return Ok(None);
        };

        let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&tls.cert_file)?))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(Error::Tls(format!(
                "no certificates found in {}",
                tls.cert_file
            )));
        }

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&tls.key_file)?))?
            .ok_or_else(|| Error::Tls(format!("no private key found in {}", tls.key_file)))?;

        let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(e.to_string()))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Some(Arc::new(config)))
    }
}

/// `$2a$`, `$2b$`, `$2x$` or `$2y$` followed by cost, salt and digest.
fn is_bcrypt_hash(hash: &str) -> bool {
    hash.len() == 60
        && ["$2a$", "$2b$", "$2x$", "$2y$"]
            .iter()
            .any(|prefix| hash.starts_with(prefix))
}

/// Decode `Basic base64(user:password)`.
fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn basic(credentials: &str) -> String {
        format!("Basic {}", STANDARD.encode(credentials))
    }

    fn secret_hash() -> String {
        bcrypt::hash("secret", 4).unwrap()
    }

    fn auth_config() -> WebSecurityConfig {
        WebSecurityConfig::parse(&format!(
            "basic_auth_users:\n  prometheus: '{}'\n",
            secret_hash()
        ))
        .unwrap()
    }

    #[test]
    fn test_parse_empty() {
        let config = WebSecurityConfig::parse("{}").unwrap();
        assert!(!config.tls_enabled());
        assert!(!config.auth_enabled());
        assert!(config.authorize(None));
        assert!(config.rustls_config().unwrap().is_none());

        assert!(!WebSecurityConfig::parse("\n").unwrap().auth_enabled());
    }

    #[test]
    fn test_authorize() {
        let config = auth_config();
        assert!(config.auth_enabled());

        assert!(config.authorize(Some(&basic("prometheus:secret"))));
        assert!(!config.authorize(Some(&basic("prometheus:wrong"))));
        assert!(!config.authorize(Some(&basic("someone:secret"))));
        assert!(!config.authorize(Some("Bearer abc")));
        assert!(!config.authorize(Some("Basic !!!not-base64")));
        assert!(!config.authorize(None));
    }

    #[test]
    fn test_authorize_2y_hash() {
        // htpasswd -B writes the $2y$ variant.
        let hash = secret_hash().replacen("$2b$", "$2y$", 1);
        let config =
            WebSecurityConfig::parse(&format!("basic_auth_users:\n  ops: '{}'\n", hash)).unwrap();

        assert!(config.authorize(Some(&basic("ops:secret"))));
        assert!(!config.authorize(Some(&basic("ops:nope"))));
    }

    #[test]
    fn test_parse_web_config_layout() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "cert").unwrap();
        writeln!(key, "key").unwrap();

        let yaml = format!(
            "tls_server_config:
  cert_file: {}
  key_file: {}
  client_auth_type: NoClientCert
  min_version: TLS12
http_server_config:
  http2: true
basic_auth_users:
  prometheus: '{}'
",
            cert.path().display(),
            key.path().display(),
            secret_hash()
        );

        let config = WebSecurityConfig::parse(&yaml).unwrap();
        assert!(config.tls_enabled());
        assert!(config.auth_enabled());
        assert_eq!(
            config.tls_server_config.unwrap().cert_file,
            cert.path().display().to_string()
        );
    }

    #[test]
    fn test_parse_basic_auth_password_with_colon() {
        assert_eq!(
            parse_basic_auth(&basic("user:pa:ss")),
            Some(("user".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic_auth(&basic("nocolon")), None);
    }

    #[test]
    fn test_invalid_hash_rejected() {
        let result = WebSecurityConfig::parse("basic_auth_users:\n  bob: plaintext\n");
        assert!(result.unwrap_err().to_string().contains("bob"));

        // An unsalted sha256 hex digest is not accepted either.
        let result = WebSecurityConfig::parse(
            "basic_auth_users:\n  bob: 2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b\n",
        );
        assert!(result.unwrap_err().to_string().contains("not a bcrypt hash"));
    }

    #[test]
    fn test_missing_tls_files_rejected() {
        let result = WebSecurityConfig::parse(
            "tls_server_config:\n  cert_file: /nonexistent.crt\n  key_file: /nonexistent.key\n",
        );
        assert!(result.unwrap_err().to_string().contains("cert_file not found"));
    }

    #[test]
    fn test_tls_files_without_pem_content() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        writeln!(key, "not a key").unwrap();

        let config = WebSecurityConfig::parse_json5(&format!(
            "{{ tls_server_config: {{ cert_file: {:?}, key_file: {:?} }} }}",
            cert.path().display().to_string(),
            key.path().display().to_string()
        ))
        .unwrap();

        assert!(config.tls_enabled());
        assert!(matches!(config.rustls_config(), Err(Error::Tls(_))));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "basic_auth_users:\n  ops: '{}'", secret_hash()).unwrap();

        let config = WebSecurityConfig::load_from_file(file.path()).unwrap();
        assert!(config.authorize(Some(&basic("ops:secret"))));
    }

    #[test]
    fn test_load_json5_file() {
        let mut file = tempfile::Builder::new().suffix(".json5").tempfile().unwrap();
        writeln!(file, "{{ basic_auth_users: {{ ops: \"{}\" }} }}", secret_hash()).unwrap();

        let config = WebSecurityConfig::load_from_file(file.path()).unwrap();
        assert!(config.authorize(Some(&basic("ops:secret"))));
    }
}
