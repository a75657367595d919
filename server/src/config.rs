//! Server configuration.
//!
//! Settings are merged from three sources, later ones overriding
//! earlier ones: built-in defaults, the YAML file named by
//! `--config`, and individual command-line flags.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

/// Seconds in an average Gregorian year, the `y` duration suffix.
const YEAR_SECONDS: u64 = 31_556_952;

/// vcpkg binary cache server.
#[derive(Debug, Default, Parser)]
#[clap(name = "vcached", version)]
pub struct Opts {
    /// Directory where to read and write cached archives.
    #[clap(long = "cache_dir", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// File holding the metadata database.
    #[clap(long = "db_file", value_name = "FILE")]
    pub db_file: Option<PathBuf>,

    /// Port to listen on, defaults to 80, or 443 with TLS configured.
    #[clap(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Address to bind.
    #[clap(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Verbosity level 0 (all) to 6 (off).
    #[clap(long, value_name = "LEVEL")]
    pub verbosity: Option<u8>,

    /// Log file, written with log level 0 (all).
    #[clap(long = "log_file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Config file to read settings from.
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Authentication tokens granted write access.
    #[clap(long, value_name = "TOKEN", num_args = 1..)]
    pub auth: Vec<String>,

    /// TLS certificate file; requires --key.
    #[clap(long, value_name = "FILE")]
    pub cert: Option<PathBuf>,

    /// TLS private key file; requires --cert.
    #[clap(long, value_name = "FILE")]
    pub key: Option<PathBuf>,
}

/// Fully merged and validated configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub db_file: PathBuf,
    pub host: String,
    pub port: u16,
    pub verbosity: u8,
    pub log_file: Option<PathBuf>,
    pub cert_and_key: Option<(PathBuf, PathBuf)>,
    pub auth: Authorization,
    pub maintenance: MaintenanceSettings,
}

#[derive(Debug, Clone, Default)]
pub struct Authorization {
    /// Bearer token to username; membership grants write access.
    pub write: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct MaintenanceSettings {
    pub dry_run: bool,
    pub max_total_size: Option<u64>,
    pub max_package_size: Option<u64>,
    pub max_age: Option<Duration>,
    pub max_unused: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    cache_dir: Option<PathBuf>,
    db_file: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
    verbosity: Option<u8>,
    log_file: Option<PathBuf>,
    ssl: Option<SslSection>,
    auth: Option<BTreeMap<String, String>>,
    maintenance: Option<MaintenanceSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SslSection {
    cert: PathBuf,
    key: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaintenanceSection {
    max_total_size: Option<ByteSize>,
    max_package_size: Option<ByteSize>,
    max_age: Option<DurationSpec>,
    max_unused: Option<DurationSpec>,
    dry_run: Option<bool>,
}

/// A byte count, written either as a bare integer or with a decimal
/// suffix: `500 GB`, `10MB`, `1 TB`.
#[derive(Debug, Clone, Copy)]
struct ByteSize(u64);

/// A duration written as space-separated components: `1y 30d 12h 5m 10s`.
/// A bare integer means seconds.
#[derive(Debug, Clone, Copy)]
struct DurationSpec(Duration);

pub fn parse_byte_size(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let (number, factor) = if let Some(p) = trimmed.strip_suffix("TB") {
        (p, 1_000_000_000_000)
    } else if let Some(p) = trimmed.strip_suffix("GB") {
        (p, 1_000_000_000)
    } else if let Some(p) = trimmed.strip_suffix("MB") {
        (p, 1_000_000)
    } else if let Some(p) = trimmed.strip_suffix("kB") {
        (p, 1_000)
    } else {
        (trimmed, 1)
    };

    number
        .trim()
        .parse::<u64>()
        .map(|value| value * factor)
        .map_err(|_| format!("invalid byte size {s:?}"))
}

pub fn parse_duration_spec(s: &str) -> Result<Duration, String> {
    let mut total = 0u64;
    for token in s.split_whitespace() {
        let (number, factor) = if let Some(p) = token.strip_suffix('y') {
            (p, YEAR_SECONDS)
        } else if let Some(p) = token.strip_suffix('d') {
            (p, 86_400)
        } else if let Some(p) = token.strip_suffix('h') {
            (p, 3_600)
        } else if let Some(p) = token.strip_suffix('m') {
            (p, 60)
        } else if let Some(p) = token.strip_suffix('s') {
            (p, 1)
        } else {
            (token, 1)
        };

        let count = number
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid duration {s:?}"))?;
        total += count * factor;
    }
    Ok(Duration::from_secs(total))
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a byte count, optionally with a kB/MB/GB/TB suffix")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteSize, E> {
                parse_byte_size(v).map(ByteSize).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

impl<'de> Deserialize<'de> for DurationSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = DurationSpec;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration like \"1y 30d 12h 5m 10s\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<DurationSpec, E> {
                Ok(DurationSpec(Duration::from_secs(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<DurationSpec, E> {
                parse_duration_spec(v).map(DurationSpec).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

impl Settings {
    /// Merges defaults, the optional YAML file and the command line.
    pub fn load(opts: &Opts) -> Result<Self> {
        let mut cache_dir = None;
        let mut db_file = None;
        let mut port = None;
        let mut host = "0.0.0.0".to_owned();
        let mut verbosity = 2u8;
        let mut log_file = None;
        let mut cert_and_key = None;
        let mut auth = Authorization::default();
        let mut maintenance = MaintenanceSettings::default();

        if let Some(path) = &opts.config {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Error reading config file {}", path.display()))?;
            let file: ConfigFile = serde_yaml::from_str(&text)
                .with_context(|| format!("Error parsing config file {}", path.display()))?;

            cache_dir = file.cache_dir.or(cache_dir);
            db_file = file.db_file.or(db_file);
            port = file.port.or(port);
            if let Some(h) = file.host {
                host = h;
            }
            if let Some(v) = file.verbosity {
                verbosity = v;
            }
            log_file = file.log_file.or(log_file);
            if let Some(ssl) = file.ssl {
                cert_and_key = Some((ssl.cert, ssl.key));
            }
            if let Some(map) = file.auth {
                auth.write.extend(map);
            }
            if let Some(section) = file.maintenance {
                maintenance.max_total_size = section.max_total_size.map(|b| b.0);
                maintenance.max_package_size = section.max_package_size.map(|b| b.0);
                maintenance.max_age = section.max_age.map(|d| d.0);
                maintenance.max_unused = section.max_unused.map(|d| d.0);
                maintenance.dry_run = section.dry_run.unwrap_or(false);
            }
        }

        if let Some(dir) = &opts.cache_dir {
            cache_dir = Some(dir.clone());
        }
        if let Some(file) = &opts.db_file {
            db_file = Some(file.clone());
        }
        if let Some(p) = opts.port {
            port = Some(p);
        }
        if let Some(h) = &opts.host {
            host = h.clone();
        }
        if let Some(v) = opts.verbosity {
            verbosity = v;
        }
        if let Some(file) = &opts.log_file {
            log_file = Some(file.clone());
        }
        // CLI tokens come without usernames.
        for (i, token) in opts.auth.iter().enumerate() {
            auth.write.insert(token.clone(), format!("User {}", i + 1));
        }
        match (&opts.cert, &opts.key) {
            (Some(cert), Some(key)) => cert_and_key = Some((cert.clone(), key.clone())),
            (None, None) => {}
            _ => bail!("--cert and --key have to be passed together"),
        }

        let port = port.unwrap_or(if cert_and_key.is_some() { 443 } else { 80 });
        let cache_dir = cache_dir.context("A cache dir must be provided")?;
        let db_file = db_file.context("A db file must be provided")?;
        if verbosity > 6 {
            bail!("Verbosity must be between 0 and 6");
        }

        Ok(Self {
            cache_dir,
            db_file,
            host,
            port,
            verbosity,
            log_file,
            cert_and_key,
            auth,
            maintenance,
        })
    }

    /// Log level of the console sink.
    pub fn level_filter(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::TRACE,
            1 => LevelFilter::DEBUG,
            2 => LevelFilter::INFO,
            3 => LevelFilter::WARN,
            4 | 5 => LevelFilter::ERROR,
            _ => LevelFilter::OFF,
        }
    }
}
