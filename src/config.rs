use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default encoder quality when the request carries no `q` modifier.
pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_MAX_INPUT_SIZE: usize = 8 * 1024 * 1024;
/// Largest output width or height, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;
pub const DEFAULT_S3_ENDPOINT: &str = "https://s3.amazonaws.com";
pub const DEFAULT_S3_PORT: u16 = 9000;
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Output formats the bundled engine can encode.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    jpeg,
    png,
    webp,
    avif,
    gif,
    tiff,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::jpeg => write!(f, "jpeg"),
            ImageFormat::png => write!(f, "png"),
            ImageFormat::webp => write!(f, "webp"),
            ImageFormat::avif => write!(f, "avif"),
            ImageFormat::gif => write!(f, "gif"),
            ImageFormat::tiff => write!(f, "tiff"),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::jpeg),
            "png" => Ok(ImageFormat::png),
            "webp" => Ok(ImageFormat::webp),
            "avif" => Ok(ImageFormat::avif),
            "gif" => Ok(ImageFormat::gif),
            "tiff" | "tif" => Ok(ImageFormat::tiff),
            _ => Err(format!("Invalid format: {}", s)),
        }
    }
}

/// Local filesystem source settings. The same directory serves favicons.
#[derive(Debug, Clone)]
pub struct FsSourceConfig {
    pub dir: PathBuf,
    pub max_age: u64,
}

/// Remote HTTP source settings.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub domains: Vec<String>,
    pub max_age: u64,
    pub max_input_size: usize, // bytes
}

/// S3-compatible object store backing the external cache.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    pub port: u16,
    pub use_ssl: bool,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

impl StoreConfig {
    /// Endpoint URL handed to the S3 client. A value that already carries a
    /// scheme is used verbatim, a bare host is combined with port and TLS flag.
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            return self.endpoint.clone();
        }
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.endpoint, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub fs: FsSourceConfig,
    pub http: HttpSourceConfig,
    /// `None` disables the external cache tier.
    pub store: Option<StoreConfig>,
    pub default_quality: u8,
    pub max_dimension: u32,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            fs: FsSourceConfig {
                dir: PathBuf::from("./public"),
                max_age: 0,
            },
            http: HttpSourceConfig {
                domains: Vec::new(),
                max_age: 0,
                max_input_size: DEFAULT_MAX_INPUT_SIZE,
            },
            store: None,
            default_quality: DEFAULT_QUALITY,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Max dimension must be > 0")] InvalidMaxDimension,
    #[error("S3 bucket name cannot be empty")] EmptyBucket,
}

impl EdgeConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds configuration from an arbitrary variable lookup, so tests can
    /// feed a map instead of mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let fs = FsSourceConfig {
            dir: lookup("IPX_FS_DIR").map(PathBuf::from).unwrap_or(defaults.fs.dir),
            max_age: parse_var(&lookup, "IPX_FS_MAX_AGE")?.unwrap_or(0),
        };

        let http = HttpSourceConfig {
            domains: lookup("IPX_HTTP_DOMAINS")
                .map(|v| {
                    v.split(',')
                        .map(normalize_domain)
                        .filter(|d| !d.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_age: parse_var(&lookup, "IPX_HTTP_MAX_AGE")?.unwrap_or(0),
            max_input_size: parse_var(&lookup, "IPX_MAX_INPUT_SIZE")?
                .unwrap_or(DEFAULT_MAX_INPUT_SIZE),
        };

        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let store = match (
            non_empty("S3_ACCESS_KEY"),
            non_empty("S3_SECRET_KEY"),
            non_empty("S3_BUCKET"),
        ) {
            (Some(access_key), Some(secret_key), Some(bucket)) => Some(StoreConfig {
                endpoint: non_empty("S3_ENDPOINT").unwrap_or_else(|| DEFAULT_S3_ENDPOINT.into()),
                port: parse_var(&lookup, "S3_PORT")?.unwrap_or(DEFAULT_S3_PORT),
                use_ssl: lookup("S3_USE_SSL").map(|v| v == "true").unwrap_or(true),
                region: non_empty("S3_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.into()),
                access_key,
                secret_key,
                bucket,
            }),
            _ => None,
        };

        Ok(Self {
            fs,
            http,
            store,
            default_quality: DEFAULT_QUALITY,
            max_dimension: parse_var(&lookup, "IPX_MAX_DIMENSION")?
                .unwrap_or(DEFAULT_MAX_DIMENSION),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        if self.max_dimension == 0 { return Err(ConfigError::InvalidMaxDimension); }
        if let Some(store) = &self.store {
            if store.bucket.trim().is_empty() { return Err(ConfigError::EmptyBucket); }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

// Accepts `example.com`, `https://example.com` or `example.com/` alike.
fn normalize_domain(domain: &str) -> String {
    let d = domain.trim();
    let d = d.split_once("://").map(|(_, rest)| rest).unwrap_or(d);
    d.trim_end_matches('/').to_lowercase()
}
