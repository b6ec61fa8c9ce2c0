use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::jsonapi::PageDefaults;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_PAGE_SIZE: usize = 25;
const DEFAULT_MAX_PAGE_SIZE: usize = 100;
const DEFAULT_FILE_BASE_URL: &str = "/files/";
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
pub const MIN_JWT_SECRET_LEN: usize = 32;
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_bind: SocketAddr,
    /// N-Quads file the graph is restored from and flushed to
    pub snapshot_path: Option<PathBuf>,
    pub jwt_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub allow_registration: bool,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Prefix of `links.self` and pagination links
    pub public_base_url: String,
    /// Prefix of stored file URLs
    pub file_base_url: String,
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,
    /// `*` allows any origin; empty allows none
    pub cors_origins: Vec<String>,
    pub graceful_shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Defaults around a signing secret
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            http_bind: DEFAULT_HTTP_BIND
                .parse()
                .expect("default bind address valid"),
            snapshot_path: None,
            jwt_secret: jwt_secret.into(),
            access_token_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_token_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            allow_registration: false,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            public_base_url: String::new(),
            file_base_url: DEFAULT_FILE_BASE_URL.to_string(),
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
            cors_origins: Vec::new(),
            graceful_shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            http_bind: cli_http_bind,
            snapshot_path: cli_snapshot_path,
            jwt_secret: cli_jwt_secret,
            access_token_ttl_secs: cli_access_ttl,
            refresh_token_ttl_secs: cli_refresh_ttl,
            allow_registration: cli_allow_registration,
            default_page_size: cli_default_page_size,
            max_page_size: cli_max_page_size,
            public_base_url: cli_public_base_url,
            file_base_url: cli_file_base_url,
            bootstrap_admin_email: cli_admin_email,
            bootstrap_admin_password: cli_admin_password,
            cors_origins: cli_cors_origins,
            graceful_shutdown_timeout_secs: cli_shutdown_timeout,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            http_bind: file_http_bind,
            snapshot_path: file_snapshot_path,
            jwt_secret: file_jwt_secret,
            access_token_ttl_secs: file_access_ttl,
            refresh_token_ttl_secs: file_refresh_ttl,
            allow_registration: file_allow_registration,
            default_page_size: file_default_page_size,
            max_page_size: file_max_page_size,
            public_base_url: file_public_base_url,
            file_base_url: file_file_base_url,
            bootstrap_admin_email: file_admin_email,
            bootstrap_admin_password: file_admin_password,
            cors_origins: file_cors_origins,
            graceful_shutdown_timeout_secs: file_shutdown_timeout,
        } = file_config;

        let jwt_secret = cli_jwt_secret
            .or(file_jwt_secret)
            .context("a JWT signing secret is required (--jwt-secret or ASSETGRAPH_JWT_SECRET)")?;

        let mut config = Self::with_secret(jwt_secret);
        if let Some(bind) = cli_http_bind.or(file_http_bind) {
            config.http_bind = bind;
        }
        config.snapshot_path = cli_snapshot_path.or(file_snapshot_path);
        config.access_token_ttl_secs = cli_access_ttl
            .or(file_access_ttl)
            .unwrap_or(DEFAULT_ACCESS_TTL_SECS);
        config.refresh_token_ttl_secs = cli_refresh_ttl
            .or(file_refresh_ttl)
            .unwrap_or(DEFAULT_REFRESH_TTL_SECS);
        config.allow_registration = cli_allow_registration
            .or(file_allow_registration)
            .unwrap_or(false);
        config.default_page_size = cli_default_page_size
            .or(file_default_page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        config.max_page_size = cli_max_page_size
            .or(file_max_page_size)
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE);
        config.public_base_url = cli_public_base_url
            .or(file_public_base_url)
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        config.file_base_url = cli_file_base_url
            .or(file_file_base_url)
            .unwrap_or_else(|| DEFAULT_FILE_BASE_URL.to_string());
        config.bootstrap_admin_email = cli_admin_email.or(file_admin_email);
        config.bootstrap_admin_password = cli_admin_password.or(file_admin_password);
        config.cors_origins = cli_cors_origins
            .or(file_cors_origins)
            .unwrap_or_default()
            .into_iter()
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        config.graceful_shutdown_timeout_secs = cli_shutdown_timeout
            .or(file_shutdown_timeout)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.jwt_secret.len() >= MIN_JWT_SECRET_LEN,
            "JWT secret must be at least {MIN_JWT_SECRET_LEN} bytes"
        );
        anyhow::ensure!(
            self.access_token_ttl_secs > 0 && self.refresh_token_ttl_secs > 0,
            "token lifetimes must be positive"
        );
        anyhow::ensure!(
            self.refresh_token_ttl_secs <= MAX_TTL_SECS,
            "token lifetimes cannot exceed {MAX_TTL_SECS} seconds"
        );
        anyhow::ensure!(
            self.refresh_token_ttl_secs >= self.access_token_ttl_secs,
            "refresh tokens must outlive access tokens"
        );
        anyhow::ensure!(
            self.default_page_size >= 1 && self.default_page_size <= self.max_page_size,
            "default page size {} must be between 1 and max page size {}",
            self.default_page_size,
            self.max_page_size
        );
        if let Some(dir) = self
            .snapshot_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            anyhow::ensure!(
                dir.is_dir(),
                "snapshot directory {:?} does not exist",
                dir
            );
        }
        anyhow::ensure!(
            self.bootstrap_admin_email.is_some() == self.bootstrap_admin_password.is_some(),
            "bootstrap admin email and password must be given together"
        );
        Ok(())
    }

    pub fn page_defaults(&self) -> PageDefaults {
        PageDefaults {
            default_size: self.default_page_size,
            max_size: self.max_page_size,
        }
    }

    /// Public URL of a stored object
    pub fn file_url(&self, key: &str) -> String {
        if self.file_base_url.ends_with('/') {
            format!("{}{key}", self.file_base_url)
        } else {
            format!("{}/{key}", self.file_base_url)
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "assetgraph",
    about = "JSON:API server for company equipment, loans, employees and suppliers",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(long, env = "ASSETGRAPH_HTTP_BIND", value_name = "ADDR", help = "HTTP bind address")]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "ASSETGRAPH_SNAPSHOT_PATH",
        value_name = "FILE",
        help = "N-Quads file the graph is loaded from and saved to"
    )]
    pub snapshot_path: Option<PathBuf>,

    #[arg(
        long,
        env = "ASSETGRAPH_JWT_SECRET",
        value_name = "SECRET",
        hide_env_values = true,
        help = "HS256 signing secret for access and refresh tokens"
    )]
    pub jwt_secret: Option<String>,

    #[arg(
        long,
        env = "ASSETGRAPH_ACCESS_TOKEN_TTL_SECS",
        value_name = "SECS",
        value_parser = clap::value_parser!(u64)
    )]
    pub access_token_ttl_secs: Option<u64>,

    #[arg(
        long,
        env = "ASSETGRAPH_REFRESH_TOKEN_TTL_SECS",
        value_name = "SECS",
        value_parser = clap::value_parser!(u64)
    )]
    pub refresh_token_ttl_secs: Option<u64>,

    #[arg(
        long,
        env = "ASSETGRAPH_ALLOW_REGISTRATION",
        value_name = "BOOL",
        help = "Allow self-service company registration"
    )]
    pub allow_registration: Option<bool>,

    #[arg(
        long,
        env = "ASSETGRAPH_DEFAULT_PAGE_SIZE",
        value_name = "N",
        value_parser = clap::value_parser!(usize)
    )]
    pub default_page_size: Option<usize>,

    #[arg(
        long,
        env = "ASSETGRAPH_MAX_PAGE_SIZE",
        value_name = "N",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_page_size: Option<usize>,

    #[arg(
        long,
        env = "ASSETGRAPH_PUBLIC_BASE_URL",
        value_name = "URL",
        help = "Base URL used in resource and pagination links"
    )]
    pub public_base_url: Option<String>,

    #[arg(
        long,
        env = "ASSETGRAPH_FILE_BASE_URL",
        value_name = "URL",
        help = "Base URL stored files are served from"
    )]
    pub file_base_url: Option<String>,

    #[arg(long, env = "ASSETGRAPH_BOOTSTRAP_ADMIN_EMAIL", value_name = "EMAIL")]
    pub bootstrap_admin_email: Option<String>,

    #[arg(
        long,
        env = "ASSETGRAPH_BOOTSTRAP_ADMIN_PASSWORD",
        value_name = "PASSWORD",
        hide_env_values = true
    )]
    pub bootstrap_admin_password: Option<String>,

    #[arg(
        long,
        env = "ASSETGRAPH_CORS_ORIGINS",
        value_name = "ORIGIN",
        value_delimiter = ',',
        help = "Comma-separated allowed origins, or * for any"
    )]
    pub cors_origins: Option<Vec<String>>,

    #[arg(
        long,
        env = "ASSETGRAPH_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        value_parser = clap::value_parser!(u64)
    )]
    pub graceful_shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    http_bind: Option<SocketAddr>,
    snapshot_path: Option<PathBuf>,
    jwt_secret: Option<String>,
    access_token_ttl_secs: Option<u64>,
    refresh_token_ttl_secs: Option<u64>,
    allow_registration: Option<bool>,
    default_page_size: Option<usize>,
    max_page_size: Option<usize>,
    public_base_url: Option<String>,
    file_base_url: Option<String>,
    bootstrap_admin_email: Option<String>,
    bootstrap_admin_password: Option<String>,
    cors_origins: Option<Vec<String>>,
    graceful_shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
