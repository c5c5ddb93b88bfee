//! Configuration for the iapgate server.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. The deployment variables `GCS_BUCKET`, `IAP_AUDIENCE` and `PORT`
//! 2. Environment variables (prefixed with `IAPGATE__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `IAPGATE__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `IAPGATE__PORT=8888` sets the listen port
//! - `IAPGATE__STORAGE__BUCKET=my-site` sets the bucket
//! - `IAPGATE__AUTH__AUDIENCE=/projects/1/global/backendServices/2` sets the expected audience
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! port: 8888
//!
//! storage:
//!   type: gcs
//!   bucket: my-site
//!
//! auth:
//!   audience: /projects/1/global/backendServices/2
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use jsonwebtoken::Algorithm;
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "IAPGATE__";

/// Header set by Identity-Aware Proxy on every request it forwards.
pub const DEFAULT_ASSERTION_HEADER: &str = "x-goog-iap-jwt-assertion";

/// Public keys used by Identity-Aware Proxy to sign assertions.
pub const DEFAULT_JWKS_URL: &str = "https://www.gstatic.com/iap/verify/public_key-jwk";

/// A configuration value that must not show up in logs.
///
/// Wrap it in a [`secrecy::SecretBox`] and read it with [`secrecy::ExposeSecret`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Storage backend configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
///
/// Used in: [`Config::storage`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// [Google Cloud Storage] backend (type `"gcs"`).
    ///
    /// Authentication uses Application Default Credentials (ADC), which can be provided via the
    /// `GOOGLE_APPLICATION_CREDENTIALS` environment variable or the GCE/Cloud Run metadata
    /// service. The credentials need read access to the bucket's objects.
    ///
    /// [Google Cloud Storage]: https://cloud.google.com/storage
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: gcs
    ///   bucket: my-site
    /// ```
    Gcs {
        /// Optional custom GCS endpoint URL.
        ///
        /// Useful for testing with emulators. When set, requests are sent unauthenticated.
        ///
        /// # Environment Variables
        ///
        /// - `IAPGATE__STORAGE__ENDPOINT=http://localhost:4443` (optional)
        endpoint: Option<String>,

        /// GCS bucket name. Required.
        ///
        /// # Environment Variables
        ///
        /// - `GCS_BUCKET=my-site`
        /// - `IAPGATE__STORAGE__BUCKET=my-site`
        bucket: String,
    },

    /// Local filesystem backend (type `"filesystem"`).
    ///
    /// Serves objects from a local directory. Intended for development.
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: filesystem
    ///   path: ./site
    /// ```
    FileSystem {
        /// Directory that object names are resolved against.
        path: PathBuf,
    },
}

impl Default for Storage {
    fn default() -> Self {
        Self::Gcs {
            endpoint: None,
            bucket: String::new(),
        }
    }
}

/// Authorization configuration.
///
/// Every request must carry a JWT assertion issued by Identity-Aware Proxy. The assertion is
/// verified against IAP's published keys (or locally configured keys) and must name
/// [`audience`](Self::audience) in its `aud` claim.
///
/// Used in: [`Config::auth`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Auth {
    /// Expected value of the `aud` claim. Required.
    ///
    /// For IAP this has the form `/projects/PROJECT_NUMBER/global/backendServices/SERVICE_ID` or
    /// `/projects/PROJECT_NUMBER/apps/PROJECT_ID`.
    ///
    /// # Environment Variables
    ///
    /// - `IAP_AUDIENCE`
    /// - `IAPGATE__AUTH__AUDIENCE`
    pub audience: String,

    /// Name of the request header carrying the assertion.
    ///
    /// # Default
    ///
    /// `x-goog-iap-jwt-assertion`
    pub header: String,

    /// Accepted values of the `iss` claim.
    ///
    /// # Default
    ///
    /// Empty (the issuer is not checked)
    pub issuers: Vec<String>,

    /// Signature algorithms that assertions may use.
    ///
    /// # Default
    ///
    /// `["ES256", "RS256"]`
    pub algorithms: Vec<Algorithm>,

    /// Clock skew tolerated when checking `exp` and `nbf`.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,

    /// URL of the JWK set used to verify assertions.
    ///
    /// # Default
    ///
    /// `https://www.gstatic.com/iap/verify/public_key-jwk`
    pub jwks_url: String,

    /// How long a fetched JWK set is used before it is refreshed.
    ///
    /// # Default
    ///
    /// `1h`
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,

    /// Locally configured verification keys, mapping a key ID (`kid`) to a PEM file.
    ///
    /// When non-empty, these keys replace the remote JWK set entirely.
    ///
    /// # YAML Example
    ///
    /// ```yaml
    /// auth:
    ///   keys:
    ///     my-key: /etc/iapgate/my-key.pub.pem
    /// ```
    pub keys: BTreeMap<String, PathBuf>,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            audience: String::new(),
            header: DEFAULT_ASSERTION_HEADER.to_owned(),
            issuers: Vec::new(),
            algorithms: vec![Algorithm::ES256, Algorithm::RS256],
            leeway: Duration::from_secs(10),
            jwks_url: DEFAULT_JWKS_URL.to_owned(),
            jwks_ttl: Duration::from_secs(3600),
            keys: BTreeMap::new(),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Json`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z INFO iapgate_server::web::server: HTTP server listening on 0.0.0.0:8080
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2020-12-04T12:11:08.729716Z","level":"INFO","fields":{"message":"successful_request","status":200},"target":"iapgate_server::request_log"}
    /// ```
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `IAPGATE__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, JSON lines otherwise)
    ///
    /// # Environment Variable
    ///
    /// `IAPGATE__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// [Sentry](https://sentry.io/) error reporting configuration.
///
/// Sentry is disabled unless a DSN is configured.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `IAPGATE__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name for this deployment (e.g. "production").
    pub environment: Option<String>,

    /// Error event sampling rate.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    pub sample_rate: f32,

    /// Performance trace sampling rate.
    ///
    /// # Default
    ///
    /// `0.01` (send 1% of traces)
    pub traces_sample_rate: f32,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
        }
    }
}

/// Main configuration struct for the iapgate server.
///
/// Fields without a default must be provided, see [`Config::validate`].
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Interface the HTTP server binds to.
    ///
    /// # Default
    ///
    /// `0.0.0.0`
    pub host: IpAddr,

    /// Port the HTTP server listens on.
    ///
    /// # Default
    ///
    /// `8080`
    ///
    /// # Environment Variables
    ///
    /// - `PORT`
    /// - `IAPGATE__PORT`
    pub port: u16,

    /// The blob store that objects are served from.
    pub storage: Storage,

    /// Verification of IAP assertions.
    pub auth: Auth,

    /// Log level and format.
    pub logging: Logging,

    /// Optional error reporting.
    pub sentry: Sentry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            storage: Storage::default(),
            auth: Auth::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
        }
    }
}

/// Maps the plain deployment variables onto their configuration keys.
fn deployment_env() -> Env {
    Env::raw()
        .only(&["GCS_BUCKET", "IAP_AUDIENCE", "PORT"])
        .map(|key| match key.as_str().to_ascii_uppercase().as_str() {
            "GCS_BUCKET" => "storage.bucket".into(),
            "IAP_AUDIENCE" => "auth.audience".into(),
            _ => "port".into(),
        })
}

impl Config {
    /// Loads and validates configuration, optionally reading a YAML file.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `IAPGATE__`)
    /// 4. `GCS_BUCKET`, `IAP_AUDIENCE` and `PORT`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    /// - Required fields are missing, see [`Config::validate`]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(deployment_env())
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks that all required values are present.
    pub fn validate(&self) -> Result<()> {
        if let Storage::Gcs { bucket, .. } = &self.storage
            && bucket.is_empty()
        {
            anyhow::bail!("GCS_BUCKET environment variable not set");
        }

        if self.auth.audience.is_empty() {
            anyhow::bail!("IAP_AUDIENCE environment variable not set");
        }

        Ok(())
    }

    /// The socket address the HTTP server binds to.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn configurable_via_deployment_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("GCS_BUCKET", "my-site");
            jail.set_env("IAP_AUDIENCE", "/projects/1/apps/my-project");
            jail.set_env("PORT", "9090");

            let config = Config::load(None).unwrap();

            let Storage::Gcs { endpoint, bucket } = &dbg!(&config).storage else {
                panic!("expected gcs storage");
            };
            assert_eq!(endpoint, &None);
            assert_eq!(bucket, "my-site");
            assert_eq!(config.auth.audience, "/projects/1/apps/my-project");
            assert_eq!(
                config.http_addr(),
                "0.0.0.0:9090".parse::<SocketAddr>().unwrap()
            );

            Ok(())
        });
    }

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("GCS_BUCKET", "my-site");
            jail.set_env("IAP_AUDIENCE", "aud");

            let config = Config::load(None).unwrap();

            assert_eq!(config.port, 8080);
            assert_eq!(config.auth.header, DEFAULT_ASSERTION_HEADER);
            assert_eq!(config.auth.jwks_url, DEFAULT_JWKS_URL);
            assert_eq!(config.auth.algorithms, [Algorithm::ES256, Algorithm::RS256]);
            assert_eq!(config.auth.leeway, Duration::from_secs(10));
            assert!(config.auth.issuers.is_empty());
            assert!(config.auth.keys.is_empty());
            assert_eq!(config.logging.level, LevelFilter::INFO);
            assert!(!config.sentry.is_enabled());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_prefixed_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("IAPGATE__STORAGE__TYPE", "gcs");
            jail.set_env("IAPGATE__STORAGE__ENDPOINT", "http://localhost:4443");
            jail.set_env("IAPGATE__STORAGE__BUCKET", "whatever");
            jail.set_env("IAPGATE__AUTH__AUDIENCE", "aud");
            jail.set_env("IAPGATE__AUTH__JWKS_TTL", "5m");
            jail.set_env("IAPGATE__LOGGING__FORMAT", "json");
            jail.set_env("IAPGATE__LOGGING__LEVEL", "debug");

            let config = Config::load(None).unwrap();

            let Storage::Gcs { endpoint, bucket } = &config.storage else {
                panic!("expected gcs storage");
            };
            assert_eq!(endpoint.as_deref(), Some("http://localhost:4443"));
            assert_eq!(bucket, "whatever");
            assert_eq!(config.auth.jwks_ttl, Duration::from_secs(300));
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.logging.level, LevelFilter::DEBUG);

            Ok(())
        });
    }

    #[test]
    fn deployment_env_overrides_prefixed_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("IAPGATE__STORAGE__BUCKET", "from-prefixed");
            jail.set_env("IAPGATE__AUTH__AUDIENCE", "aud");
            jail.set_env("IAPGATE__PORT", "1234");
            jail.set_env("GCS_BUCKET", "from-deployment");
            jail.set_env("PORT", "4321");

            let config = Config::load(None).unwrap();

            let Storage::Gcs { bucket, .. } = &config.storage else {
                panic!("expected gcs storage");
            };
            assert_eq!(bucket, "from-deployment");
            assert_eq!(config.port, 4321);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            port: 8888
            storage:
                type: filesystem
                path: /srv/site
            auth:
                audience: /projects/1/global/backendServices/2
                issuers: ["https://cloud.google.com/iap"]
                keys:
                    kid1: /etc/iapgate/kid1.pem
            sentry:
                dsn: abcde
                environment: production
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            let Storage::FileSystem { path } = &dbg!(&config).storage else {
                panic!("expected filesystem storage");
            };
            assert_eq!(path, Path::new("/srv/site"));
            assert_eq!(config.port, 8888);
            assert_eq!(config.auth.audience, "/projects/1/global/backendServices/2");
            assert_eq!(config.auth.issuers, ["https://cloud.google.com/iap"]);
            assert_eq!(
                config.auth.keys.get("kid1").map(PathBuf::as_path),
                Some(Path::new("/etc/iapgate/kid1.pem"))
            );
            assert_eq!(config.sentry.dsn.unwrap().expose_secret().as_str(), "abcde");
            assert_eq!(config.sentry.environment.as_deref(), Some("production"));

            Ok(())
        });
    }

    #[test]
    fn redacts_sentry_dsn() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("GCS_BUCKET", "my-site");
            jail.set_env("IAP_AUDIENCE", "aud");
            jail.set_env("IAPGATE__SENTRY__DSN", "https://secret-key@sentry.example.com/1");

            let config = Config::load(None).unwrap();
            assert!(config.sentry.is_enabled());
            assert!(!format!("{config:?}").contains("secret-key"));

            let dsn = config.sentry.dsn.as_ref().unwrap();
            assert_eq!(
                dsn.expose_secret().as_str(),
                "https://secret-key@sentry.example.com/1"
            );

            Ok(())
        });
    }

    #[test]
    fn missing_bucket_fails() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("IAP_AUDIENCE", "aud");

            let err = Config::load(None).unwrap_err();
            assert!(err.to_string().contains("GCS_BUCKET"));

            Ok(())
        });
    }

    #[test]
    fn missing_audience_fails() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("GCS_BUCKET", "my-site");

            let err = Config::load(None).unwrap_err();
            assert!(err.to_string().contains("IAP_AUDIENCE"));

            Ok(())
        });
    }
}
