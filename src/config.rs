use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub broker: BrokerConfig,
}

/// Storage-side settings consumed by the broker components.
///
/// These mirror the object store settings of the site; the operator-editable
/// part (CORS origin, scheme, ACL) lives in the settings table instead.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Bucket receiving the uploads.
    pub bucket: String,

    /// Region used for signing and the default store hostname.
    pub region: String,

    /// Optional folder every key lives under (without slashes at either end).
    pub root_folder: Option<String>,

    /// Bucket folder backing the `public://` scheme.
    pub public_folder: String,

    /// Bucket folder backing the `private://` scheme.
    pub private_folder: String,

    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    /// Custom store hostname (e.g. a MinIO endpoint) replacing `s3.<region>.amazonaws.com`.
    pub custom_host: Option<String>,

    /// Address the bucket as `host/bucket` instead of `bucket.host`.
    pub path_style: bool,

    /// Resource pattern the federation token policy is scoped to.
    pub sts_policy_resource: String,

    /// Name given to federated sessions.
    pub federation_name: String,

    /// Secret for anonymous file reuse tokens.
    pub form_token_secret: String,

    /// Replace `: * ? " < > |` in uploaded file names.
    pub replace_reserved_chars: bool,

    /// Upload size limit used when a field does not set its own.
    pub default_max_upload_size: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bucket: "uploads".into(),
            region: "us-east-1".into(),
            root_folder: None,
            public_folder: DEFAULT_PUBLIC_FOLDER.into(),
            private_folder: DEFAULT_PRIVATE_FOLDER.into(),
            access_key: None,
            secret_key: None,
            custom_host: None,
            path_style: false,
            sts_policy_resource: String::new(),
            federation_name: "upload-broker".into(),
            form_token_secret: String::new(),
            replace_reserved_chars: cfg!(windows),
            default_max_upload_size: 32 * 1024 * 1024,
        }
    }
}

// Secrets stay out of the startup log line.
impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("root_folder", &self.root_folder)
            .field("public_folder", &self.public_folder)
            .field("private_folder", &self.private_folder)
            .field("static_credentials", &self.access_key.is_some())
            .field("custom_host", &self.custom_host)
            .field("path_style", &self.path_style)
            .field("sts_policy_resource", &self.sts_policy_resource)
            .field("federation_name", &self.federation_name)
            .field("replace_reserved_chars", &self.replace_reserved_chars)
            .field("default_max_upload_size", &self.default_max_upload_size)
            .finish_non_exhaustive()
    }
}

pub const DEFAULT_PUBLIC_FOLDER: &str = "s3fs-public";
pub const DEFAULT_PRIVATE_FOLDER: &str = "s3fs-private";

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Direct-to-object-store upload broker")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_BROKER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_BROKER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides UPLOAD_BROKER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Target bucket (overrides UPLOAD_BROKER_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides UPLOAD_BROKER_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Root folder inside the bucket (overrides UPLOAD_BROKER_ROOT_FOLDER)
    #[arg(long)]
    pub root_folder: Option<String>,

    /// Custom store hostname (overrides UPLOAD_BROKER_CUSTOM_HOST)
    #[arg(long)]
    pub custom_host: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    pub path_style: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("UPLOAD_BROKER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("UPLOAD_BROKER_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing UPLOAD_BROKER_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading UPLOAD_BROKER_PORT"),
        };
        let env_db = env::var("UPLOAD_BROKER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/upload_broker.db".into());

        let defaults = BrokerConfig::default();
        let broker = BrokerConfig {
            bucket: args
                .bucket
                .or_else(|| optional_env("UPLOAD_BROKER_BUCKET"))
                .context("a bucket is required (--bucket or UPLOAD_BROKER_BUCKET)")?,
            region: args
                .region
                .or_else(|| optional_env("UPLOAD_BROKER_REGION"))
                .unwrap_or(defaults.region),
            root_folder: args
                .root_folder
                .or_else(|| optional_env("UPLOAD_BROKER_ROOT_FOLDER"))
                .map(|folder| folder.trim_matches('/').to_string())
                .filter(|folder| !folder.is_empty()),
            public_folder: optional_env("UPLOAD_BROKER_PUBLIC_FOLDER")
                .unwrap_or(defaults.public_folder),
            private_folder: optional_env("UPLOAD_BROKER_PRIVATE_FOLDER")
                .unwrap_or(defaults.private_folder),
            access_key: optional_env("UPLOAD_BROKER_ACCESS_KEY"),
            secret_key: optional_env("UPLOAD_BROKER_SECRET_KEY"),
            custom_host: args
                .custom_host
                .or_else(|| optional_env("UPLOAD_BROKER_CUSTOM_HOST")),
            path_style: args.path_style || env_flag("UPLOAD_BROKER_PATH_STYLE")?.unwrap_or(false),
            sts_policy_resource: optional_env("UPLOAD_BROKER_STS_POLICY_RESOURCE")
                .unwrap_or(defaults.sts_policy_resource),
            federation_name: optional_env("UPLOAD_BROKER_FEDERATION_NAME")
                .unwrap_or(defaults.federation_name),
            form_token_secret: optional_env("UPLOAD_BROKER_FORM_TOKEN_SECRET")
                .unwrap_or(defaults.form_token_secret),
            replace_reserved_chars: env_flag("UPLOAD_BROKER_REPLACE_RESERVED_CHARS")?
                .unwrap_or(defaults.replace_reserved_chars),
            default_max_upload_size: match optional_env("UPLOAD_BROKER_MAX_UPLOAD_SIZE") {
                Some(value) => value.parse::<u64>().with_context(|| {
                    format!("parsing UPLOAD_BROKER_MAX_UPLOAD_SIZE value `{}`", value)
                })?,
                None => defaults.default_max_upload_size,
            },
        };

        if broker.access_key.is_some() != broker.secret_key.is_some() {
            anyhow::bail!(
                "UPLOAD_BROKER_ACCESS_KEY and UPLOAD_BROKER_SECRET_KEY must be set together"
            );
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            broker,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    match optional_env(name) {
        None => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => anyhow::bail!("parsing {} value `{}` as a flag", name, other),
        },
    }
}
