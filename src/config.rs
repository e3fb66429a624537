use std::env;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use dotenvy::Error as DotenvError;
use mock_ec2_metadata_store::{MetadataStore, MetadataValues, UserdataValues};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory first.
pub const LOCAL_CONFIG_PATH: &str = "./mock-ec2-metadata-config.json";
/// System-wide fallback location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/mock-ec2-metadata-config.json";

const CONFIG_PATH_ENV: &str = "MOCK_EC2_METADATA_CONFIG";
const PORT_ENV: &str = "MOCK_EC2_METADATA_PORT";
const ADDR_ENV: &str = "MOCK_EC2_METADATA_ADDR";

/// The JSON configuration document.
///
/// Keys are matched case-sensitively; anything missing falls back to its empty value and
/// unknown keys are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "Server")]
    pub server: ServerSection,
    #[serde(rename = "MetadataValues")]
    pub metadata_values: MetadataValues,
    /// Roots under which the full metadata endpoint set is mounted.
    #[serde(rename = "MetadataPrefixes")]
    pub metadata_prefixes: Vec<String>,
    #[serde(rename = "UserdataValues")]
    pub userdata_values: UserdataValues,
    #[serde(rename = "UserdataPrefixes")]
    pub userdata_prefixes: Vec<String>,
    /// Accepted for compatibility with existing documents; nothing is mounted here.
    #[serde(rename = "NetworkPrefixes")]
    pub network_prefixes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    #[serde(rename = "HTTPPort")]
    pub http_port: u16,
}

impl Config {
    /// Finds and loads the configuration document.
    ///
    /// Values from a local `.env` file are applied first, so `MOCK_EC2_METADATA_CONFIG` can
    /// point at an explicit document. Without it, [`LOCAL_CONFIG_PATH`] and then
    /// [`SYSTEM_CONFIG_PATH`] are tried and the first existing file wins.
    pub fn discover() -> Result<(PathBuf, Self), ConfigError> {
        load_env_overrides()?;

        let candidates = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => vec![PathBuf::from(path)],
            None => default_candidates(),
        };

        let path = locate(&candidates)?;
        let config = Self::load(&path)?;
        Ok((path, config))
    }

    /// Reads and parses the document at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Parses a document that is already in memory.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Freezes the configured values into a [`MetadataStore`].
    pub fn store(&self) -> MetadataStore {
        MetadataStore::new(self.metadata_values.clone(), self.userdata_values.clone())
    }
}

/// Well-known config locations in lookup order.
pub fn default_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from(LOCAL_CONFIG_PATH),
        PathBuf::from(SYSTEM_CONFIG_PATH),
    ]
}

/// Returns the first candidate that exists on disk.
pub fn locate(candidates: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    candidates
        .iter()
        .find(|path| path.exists())
        .cloned()
        .ok_or_else(|| ConfigError::NotFound {
            searched: candidates.to_vec(),
        })
}

/// Settings consumed by the runtime before the listener is bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub bind_addr: SocketAddr,
}

impl RuntimeConfig {
    /// Derives the listen address from the document's `Server.HTTPPort`.
    ///
    /// `MOCK_EC2_METADATA_PORT` and `MOCK_EC2_METADATA_ADDR` override the port and bind IP.
    /// Unparseable overrides are logged and ignored.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::builder()
            .port(env_override::<u16>(PORT_ENV).unwrap_or(config.server.http_port));
        if let Some(addr) = env_override::<IpAddr>(ADDR_ENV) {
            builder = builder.addr(addr);
        }
        builder.build()
    }

    /// Returns a builder for programmatic overrides.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

/// Builder type for [`RuntimeConfig`].
#[derive(Default, Clone, Debug)]
pub struct RuntimeConfigBuilder {
    addr: Option<IpAddr>,
    port: Option<u16>,
}

impl RuntimeConfigBuilder {
    /// Sets the IP the listener binds to.
    pub fn addr(mut self, addr: IpAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Sets the listener port. `0` asks the OS for an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builds the final configuration, binding `0.0.0.0` when no address was set.
    pub fn build(self) -> RuntimeConfig {
        RuntimeConfig {
            bind_addr: SocketAddr::new(
                self.addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                self.port.unwrap_or_default(),
            ),
        }
    }
}

/// Errors that can occur while loading the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to locate config file (searched {searched:?})")]
    NotFound { searched: Vec<PathBuf> },
    #[error("unable to read config file '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("unable to parse JSON in config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to load .env overrides: {0}")]
    Dotenv(#[from] DotenvError),
}

fn load_env_overrides() -> Result<(), ConfigError> {
    match dotenvy::dotenv_override() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err)),
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(var = name, %value, "ignoring unparseable override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const DOCUMENT: &str = r#"{
        "Server": { "HTTPPort": 8111 },
        "MetadataValues": {
            "instance-id": "i-0123456789abcdef0",
            "User": "mock-role",
            "security-groups": ["default"]
        },
        "MetadataPrefixes": ["/latest/meta-data", "/2016-09-02/meta-data"],
        "UserdataValues": { "env": "dev" },
        "UserdataPrefixes": ["/latest/user-data"],
        "NetworkPrefixes": ["/latest/network"]
    }"#;

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn parses_full_document() {
        let config = Config::from_json(DOCUMENT).expect("config");

        assert_eq!(config.server.http_port, 8111);
        assert_eq!(config.metadata_values.instance_id, "i-0123456789abcdef0");
        assert_eq!(config.metadata_values.user, "mock-role");
        assert_eq!(config.metadata_prefixes.len(), 2);
        assert_eq!(config.userdata_values["env"], "dev");
        assert_eq!(config.userdata_prefixes, ["/latest/user-data"]);
        assert_eq!(config.network_prefixes, ["/latest/network"]);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_json("{}").expect("config");
        assert_eq!(config, Config::default());
        assert_eq!(config.store().instance_id(), "");
    }

    #[test]
    fn ignores_unknown_keys() {
        let config = Config::from_json(r#"{"Extra": true, "MetadataPrefixes": ["/m"]}"#).unwrap();
        assert_eq!(config.metadata_prefixes, ["/m"]);
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(matches!(
            Config::from_json(r#"{"MetadataPrefixes": "/latest"}"#),
            Err(ConfigError::Json(_))
        ));
        assert!(Config::from_json("not json").is_err());
    }

    #[test]
    fn locate_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        fs::write(&first, "{}").unwrap();
        fs::write(&second, "{}").unwrap();

        let found = locate(&[missing.clone(), first.clone(), second]).unwrap();
        assert_eq!(found, first);

        let err = locate(&[missing]).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { searched } if searched.len() == 1));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ \"Server\": ").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(&err, ConfigError::Parse { path: reported, .. } if reported == &path));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn load_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn discover_honors_explicit_path() {
        let _guard = env_lock().lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        fs::write(&path, DOCUMENT).unwrap();

        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, &path);
        }
        let discovered = Config::discover();
        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }

        let (found, config) = discovered.expect("config");
        assert_eq!(found, path);
        assert_eq!(config.server.http_port, 8111);
    }

    #[test]
    fn discover_searches_working_directory_then_etc() {
        let _guard = env_lock().lock().unwrap();
        assert_eq!(
            default_candidates(),
            [
                PathBuf::from(LOCAL_CONFIG_PATH),
                PathBuf::from(SYSTEM_CONFIG_PATH)
            ]
        );

        let dir = tempfile::tempdir().unwrap();
        let previous = env::current_dir().unwrap();
        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }
        env::set_current_dir(dir.path()).unwrap();

        let without_local = Config::discover();
        fs::write(dir.path().join("mock-ec2-metadata-config.json"), DOCUMENT).unwrap();
        let with_local = Config::discover();

        env::set_current_dir(previous).unwrap();

        // /etc is only consulted when the working directory has no document
        match without_local {
            Ok((path, _)) => assert_eq!(path, PathBuf::from(SYSTEM_CONFIG_PATH)),
            Err(ConfigError::NotFound { searched }) => {
                assert_eq!(searched, default_candidates())
            }
            Err(err) => assert!(
                matches!(&err, ConfigError::Read { path, .. } | ConfigError::Parse { path, .. }
                    if path == &PathBuf::from(SYSTEM_CONFIG_PATH)),
                "{err}"
            ),
        }

        let (path, config) = with_local.expect("local config");
        assert_eq!(path, PathBuf::from(LOCAL_CONFIG_PATH));
        assert_eq!(config.server.http_port, 8111);
    }

    #[test]
    fn runtime_config_reads_port_from_document() {
        let _guard = env_lock().lock().unwrap();
        unsafe {
            std::env::remove_var(PORT_ENV);
            std::env::remove_var(ADDR_ENV);
        }

        let config = Config::from_json(DOCUMENT).unwrap();
        let runtime = RuntimeConfig::from_config(&config);
        assert_eq!(
            runtime.bind_addr,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8111)
        );
    }

    #[test]
    fn runtime_config_env_overrides() {
        let _guard = env_lock().lock().unwrap();
        unsafe {
            std::env::set_var(PORT_ENV, "9000");
            std::env::set_var(ADDR_ENV, "127.0.0.2");
        }

        let runtime = RuntimeConfig::from_config(&Config::default());

        unsafe {
            std::env::set_var(PORT_ENV, "not-a-port");
            std::env::remove_var(ADDR_ENV);
        }
        let fallback = RuntimeConfig::from_config(&Config::from_json(DOCUMENT).unwrap());

        unsafe {
            std::env::remove_var(PORT_ENV);
        }

        assert_eq!(
            runtime.bind_addr,
            SocketAddr::new("127.0.0.2".parse().unwrap(), 9000)
        );
        assert_eq!(fallback.bind_addr.port(), 8111);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = RuntimeConfig::builder()
            .addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .port(9999)
            .build();
        assert_eq!(
            config.bind_addr,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999)
        );

        assert_eq!(RuntimeConfig::builder().build().bind_addr.port(), 0);
    }
}
