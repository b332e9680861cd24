//! Configuration management for the mining client
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON). Explicit flags and environment
//! variables win over the file, which wins over built-in defaults.

use crate::stratum::ConnectionConfig;
use crate::{Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Highest meaningful difficulty: every hex character of the digest is zero
pub const MAX_DIFFICULTY: u32 = crate::crypto::DIGEST_HEX_LEN;

/// Nonce search strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Exhaustive search on the CPU
    Cpu,
    /// Batch search through an external kernel process
    External,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Cpu => write!(f, "cpu"),
            StrategyKind::External => write!(f, "external"),
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
    Pretty,
}

/// Complete configuration for the mining client
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "tuna-miner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Proof-of-work mining client for Stratum-style pools",
    long_about = "Connects to a Stratum-style pool, searches the assigned nonce space on the CPU or an external accelerator kernel, and submits qualifying nonces"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Pool URL, e.g. stratum+tcp://pool.example.com:3333 (overrides host/port)
    #[arg(long, env = "TUNA_POOL_URL")]
    #[serde(default)]
    pub pool_url: Option<String>,

    /// Pool host
    #[arg(long, env = "STRATUM_HOST", default_value = "localhost")]
    #[serde(default = "default_host")]
    pub host: String,

    /// Pool port
    #[arg(long, env = "STRATUM_PORT", default_value = "3333")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Payout address
    #[arg(short = 'a', long, env = "TUNA_ADDRESS")]
    #[serde(default)]
    pub address: Option<String>,

    /// Worker label appended to the address
    #[arg(short = 'w', long, env = "STRATUM_WORKER", default_value = "")]
    #[serde(default)]
    pub worker: String,

    /// Pool password
    #[arg(long, env = "STRATUM_PASSWORD", default_value = "x")]
    #[serde(default = "default_password")]
    pub password: String,

    /// Bound on a single socket read
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Bound on establishing the pool connection
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long shutdown waits for the listener
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Sleep while waiting for the first job
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    #[serde(default = "default_idle_delay", with = "humantime_serde")]
    pub idle_delay: Duration,

    /// Interval between hash-rate log lines
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,

    /// Required leading zero hex characters for a submitted digest
    #[arg(short = 'd', long, default_value = "8")]
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,

    /// Use the pool's mining.set_difficulty value once received
    #[arg(long)]
    #[serde(default)]
    pub follow_pool_difficulty: bool,

    /// Nonce search strategy
    #[arg(short = 's', long, default_value = "cpu")]
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Hashes between cancellation checks in the CPU search
    #[arg(long, default_value = "65536")]
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// External kernel command (program and leading arguments)
    #[arg(long, env = "TUNA_EXTERNAL_COMMAND")]
    #[serde(default)]
    pub external_command: Option<String>,

    /// Extra argument for the external kernel (repeatable)
    #[arg(long = "external-arg", value_name = "ARG", allow_hyphen_values = true)]
    #[serde(default)]
    pub external_args: Vec<String>,

    /// Kernel loop budget per batch
    #[arg(short = 'n', long, default_value = "4096")]
    #[serde(default = "default_loops")]
    pub loops: u32,

    /// Hashes one kernel loop covers, for rate reporting
    #[arg(long, default_value = "262144")]
    #[serde(default = "default_hashes_per_loop")]
    pub hashes_per_loop: u64,

    /// Header bytes stripped from each kernel candidate
    #[arg(long, default_value = "4")]
    #[serde(default = "default_candidate_header_len")]
    pub candidate_header_len: usize,

    /// Bound on a single kernel run
    #[arg(long, default_value = "300s", value_parser = humantime::parse_duration)]
    #[serde(default = "default_external_timeout", with = "humantime_serde")]
    pub external_timeout: Duration,

    /// Log level
    #[arg(short = 'l', long, env = "TUNA_LOG", default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the process arguments and optional file
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    /// Build configuration from parsed arguments, merging the config file if given
    pub async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(matches).map_err(|e| Error::config(e.to_string()))?;

        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config, matches);
        }

        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration for an address, all other values default
    pub fn for_address(address: impl Into<String>) -> Self {
        let mut config = Self::parse_from(["tuna-miner"]);
        config.address = Some(address.into());
        config
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Take file values for every field not set on the command line or environment
    fn merge_with_file(mut self, file: Self, matches: &ArgMatches) -> Self {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if !is_explicit(matches, stringify!($field)) {
                        self.$field = file.$field;
                    }
                )*
            };
        }

        merge!(
            pool_url,
            host,
            port,
            address,
            worker,
            password,
            read_timeout,
            connect_timeout,
            shutdown_timeout,
            idle_delay,
            report_interval,
            difficulty,
            follow_pool_difficulty,
            strategy,
            check_interval,
            external_command,
            external_args,
            loops,
            hashes_per_loop,
            candidate_header_len,
            external_timeout,
            log_level,
            log_format,
            log_file,
        );
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.address.as_deref().map(str::trim) {
            None | Some("") => return Err(Error::config("A payout address is required (--address)")),
            Some(_) => {}
        }

        self.pool_endpoint()?;

        if self.difficulty > MAX_DIFFICULTY {
            return Err(Error::config(format!(
                "Difficulty must be between 0 and {}",
                MAX_DIFFICULTY
            )));
        }

        if self.loops == 0 {
            return Err(Error::config("Loop count must be greater than 0"));
        }

        if self.hashes_per_loop == 0 {
            return Err(Error::config("Hashes per loop must be greater than 0"));
        }

        if self.check_interval == 0 {
            return Err(Error::config("Check interval must be greater than 0"));
        }

        if self.read_timeout.is_zero() {
            return Err(Error::config("Read timeout must be greater than 0"));
        }

        if self.strategy == StrategyKind::External
            && self.external_command.as_deref().map_or(true, |c| c.trim().is_empty())
        {
            return Err(Error::config("External strategy requires --external-command"));
        }

        Ok(())
    }

    /// Identity used for authorize and submit: `address` or `address.worker`
    pub fn identity(&self) -> String {
        let address = self.address.as_deref().unwrap_or_default();
        if self.worker.is_empty() {
            address.to_string()
        } else {
            format!("{}.{}", address, self.worker)
        }
    }

    /// Pool host and port, from the URL when one is given
    pub fn pool_endpoint(&self) -> Result<(String, u16)> {
        let Some(pool_url) = &self.pool_url else {
            if self.port == 0 {
                return Err(Error::config("Pool port must be greater than 0"));
            }
            return Ok((self.host.clone(), self.port));
        };

        let url = Url::parse(pool_url)
            .map_err(|e| Error::config(format!("Invalid pool URL: {}", e)))?;
        if !matches!(url.scheme(), "stratum+tcp" | "tcp") {
            return Err(Error::config(format!(
                "Unsupported pool URL scheme {:?}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::config("Pool URL has no host"))?;
        let port = url
            .port()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::config("Pool URL has no port"))?;
        Ok((host.to_string(), port))
    }

    /// Connection settings derived from this configuration
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            identity: self.identity(),
            password: self.password.clone(),
            read_timeout: self.read_timeout,
            connect_timeout: self.connect_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

fn is_explicit(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable)
    )
}

/// Serde adapter storing durations in humantime form ("1s", "5m")
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

// Default value functions for serde
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 3333 }
fn default_password() -> String { "x".to_string() }
fn default_read_timeout() -> Duration { Duration::from_secs(1) }
fn default_connect_timeout() -> Duration { Duration::from_secs(10) }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(5) }
fn default_idle_delay() -> Duration { Duration::from_secs(1) }
fn default_report_interval() -> Duration { Duration::from_secs(10) }
fn default_difficulty() -> u32 { 8 }
fn default_strategy() -> StrategyKind { StrategyKind::Cpu }
fn default_check_interval() -> u64 { crate::worker::cpu::DEFAULT_CHECK_INTERVAL }
fn default_loops() -> u32 { 4096 }
fn default_hashes_per_loop() -> u64 { crate::worker::external::DEFAULT_HASHES_PER_LOOP }
fn default_candidate_header_len() -> usize { 4 }
fn default_external_timeout() -> Duration { Duration::from_secs(300) }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Config {
        let mut full = vec!["tuna-miner"];
        full.extend_from_slice(args);
        Config::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = parse(&[]);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3333);
        assert_eq!(config.password, "x");
        assert_eq!(config.difficulty, 8);
        assert_eq!(config.loops, 4096);
        assert_eq!(config.hashes_per_loop, 256 * 32 * 32);
        assert_eq!(config.candidate_header_len, 4);
        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.strategy, StrategyKind::Cpu);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.follow_pool_difficulty);
    }

    #[test]
    fn test_identity() {
        let mut config = Config::for_address("addr_test1qq");
        assert_eq!(config.identity(), "addr_test1qq");

        config.worker = "rig7".into();
        assert_eq!(config.identity(), "addr_test1qq.rig7");
        assert_eq!(config.connection_config().identity, "addr_test1qq.rig7");
    }

    #[test]
    fn test_pool_endpoint() {
        let mut config = Config::for_address("a");
        assert_eq!(config.pool_endpoint().unwrap(), ("localhost".to_string(), 3333));

        config.pool_url = Some("stratum+tcp://pool.example.com:4444".into());
        assert_eq!(config.pool_endpoint().unwrap(), ("pool.example.com".to_string(), 4444));

        config.pool_url = Some("http://pool.example.com:4444".into());
        assert_matches!(config.pool_endpoint(), Err(Error::Config { .. }));

        config.pool_url = Some("stratum+tcp://pool.example.com".into());
        assert_matches!(config.pool_endpoint(), Err(Error::Config { .. }));
    }

    #[test]
    fn test_validation() {
        assert!(Config::for_address("a").validate().is_ok());
        assert_matches!(parse(&[]).validate(), Err(Error::Config { .. }));

        let mut config = Config::for_address("a");
        config.difficulty = 65;
        assert!(config.validate().is_err());

        let mut config = Config::for_address("a");
        config.loops = 0;
        assert!(config.validate().is_err());

        let mut config = Config::for_address("a");
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::for_address("a");
        config.strategy = StrategyKind::External;
        assert!(config.validate().is_err());
        config.external_command = Some("kernel --fast".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_flags() {
        let config = parse(&[
            "--address",
            "addr1",
            "--strategy",
            "external",
            "--external-command",
            "cuda-kernel",
            "--external-arg",
            "--device",
            "--external-arg",
            "0",
            "--read-timeout",
            "250ms",
            "-d",
            "6",
        ]);
        assert_eq!(config.strategy, StrategyKind::External);
        assert_eq!(config.external_args, vec!["--device", "0"]);
        assert_eq!(config.read_timeout, Duration::from_millis(250));
        assert_eq!(config.difficulty, 6);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_config_from_yaml() {
        let yaml_content = r#"
address: "addr_test1vz"
worker: "rig1"
host: "pool.example.com"
port: 4444
difficulty: 7
read_timeout: "2s"
strategy: external
external_command: "kernel"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.address.as_deref(), Some("addr_test1vz"));
        assert_eq!(config.identity(), "addr_test1vz.rig1");
        assert_eq!(config.port, 4444);
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.strategy, StrategyKind::External);
        assert_eq!(config.loops, 4096);
        assert_eq!(config.password, "x");
    }

    #[tokio::test]
    async fn test_cli_overrides_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            temp_file,
            r#"{{"address":"from_file","difficulty":5,"port":5555,"idle_delay":"250ms"}}"#
        )
        .unwrap();

        let path = temp_file.path().to_str().unwrap().to_string();
        let matches = Config::command()
            .try_get_matches_from(["tuna-miner", "--config-file", &path, "--difficulty", "9"])
            .unwrap();
        let config = Config::from_matches(&matches).await.unwrap();

        assert_eq!(config.address.as_deref(), Some("from_file"));
        assert_eq!(config.port, 5555);
        assert_eq!(config.difficulty, 9);
        assert_eq!(config.idle_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_print_config_roundtrip() {
        let config = Config::for_address("addr1");
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("read_timeout: 1s"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.identity(), config.identity());
        assert_eq!(parsed.external_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(StrategyKind::Cpu.to_string(), "cpu");
        assert_eq!(StrategyKind::External.to_string(), "external");
    }
}
