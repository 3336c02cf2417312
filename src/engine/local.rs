use super::{ImageEngine, ProcessedImage, SourceMeta};
use crate::config::{EdgeConfig, FsSourceConfig, HttpSourceConfig, ImageFormat};
use crate::fetch::{fetch_meta, fetch_source};
use crate::request::Modifiers;
use crate::transform::{decode_image, encode_image, resize_image, TransformParams};
use crate::{ImageKitError, Result};
use bytes::Bytes;
use reqwest::{Client, Url};
use std::path::{Component, Path, PathBuf};

/// Where a resource id points to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    File(PathBuf),
    Remote(Url),
}

/// Engine backed by the local filesystem and an allow-list of HTTP hosts,
/// transforming with the `image` crate.
pub struct LocalEngine {
    client: Client,
    fs: FsSourceConfig,
    http: HttpSourceConfig,
    default_quality: u8,
    max_dimension: u32,
}

impl LocalEngine {
    pub fn new(config: &EdgeConfig) -> Self {
        Self {
            client: Client::new(),
            fs: config.fs.clone(),
            http: config.http.clone(),
            default_quality: config.default_quality,
            max_dimension: config.max_dimension,
        }
    }

    fn resolve(&self, id: &str) -> Result<Source> {
        if id.starts_with("http://") || id.starts_with("https://") {
            let url = Url::parse(id)
                .map_err(|e| ImageKitError::InvalidArgument(format!("Invalid URL {}: {}", id, e)))?;
            let host = url.host_str().unwrap_or_default().to_lowercase();
            if !self.http.domains.iter().any(|d| *d == host) {
                return Err(ImageKitError::Forbidden(format!("Host not allowed: {}", host)));
            }
            return Ok(Source::Remote(url));
        }

        let relative = Path::new(id.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ImageKitError::Forbidden(format!("Path not allowed: {}", id)));
        }
        Ok(Source::File(self.fs.dir.join(relative)))
    }

    async fn load(&self, id: &str, source: &Source) -> Result<Bytes> {
        match source {
            Source::Remote(url) => {
                fetch_source(&self.client, url.as_str(), self.http.max_input_size).await
            }
            Source::File(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| io_error(id, e)),
        }
    }
}

fn io_error(id: &str, e: std::io::Error) -> ImageKitError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ImageKitError::NotFound(id.to_string())
    } else {
        ImageKitError::InternalError(format!("{}: {}", id, e))
    }
}

#[async_trait::async_trait]
impl ImageEngine for LocalEngine {
    async fn source_meta(&self, id: &str, _modifiers: &Modifiers) -> Result<SourceMeta> {
        match self.resolve(id)? {
            Source::Remote(url) => fetch_meta(&self.client, url.as_str(), self.http.max_age).await,
            Source::File(path) => {
                let meta = tokio::fs::metadata(&path).await.map_err(|e| io_error(id, e))?;
                if !meta.is_file() {
                    return Err(ImageKitError::NotFound(id.to_string()));
                }
                Ok(SourceMeta {
                    mtime: meta.modified().ok(),
                    max_age: Some(self.fs.max_age),
                })
            }
        }
    }

    async fn process(&self, id: &str, modifiers: &Modifiers) -> Result<ProcessedImage> {
        let params = TransformParams::from_modifiers(modifiers, self.max_dimension)?;
        let source = self.resolve(id)?;
        let bytes = self.load(id, &source).await?;
        let default_quality = self.default_quality;
        let max_dimension = self.max_dimension;

        tracing::debug!("Transforming id={} with {:?}", id, params);

        // Decoding and encoding are CPU bound; keep them off the async workers.
        let (encoded, format) = tokio::task::spawn_blocking(move || {
            let (img, source_format) = decode_image(&bytes)?;
            let resized =
                resize_image(img, params.width, params.height, params.fit_mode, max_dimension)?;
            let format = params.format.or(source_format).unwrap_or(ImageFormat::jpeg);
            let quality = params.quality.unwrap_or(default_quality);
            encode_image(&resized, format, quality).map(|out| (out, format))
        })
        .await
        .map_err(|e| ImageKitError::InternalError(e.to_string()))??;

        Ok(ProcessedImage {
            data: Bytes::from(encoded),
            format: Some(format.to_string()),
        })
    }
}
