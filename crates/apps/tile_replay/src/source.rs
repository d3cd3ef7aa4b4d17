//! Where tile payloads come from.
//!
//! - Filesystem (`level/x/y.ext` directory structure)
//! - Remote HTTP (URL template)
//!
//! Both serve a base stream and, optionally, a label stream per tile.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use streaming::{Filter, Stream, TileAddress};

/// Why a source could not answer for one tile. A missing tile is not an
/// error; sources report it as `Ok(None)`.
#[derive(Debug)]
pub enum SourceError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Request(reqwest::Error),
    Status {
        address: TileAddress,
        status: reqwest::StatusCode,
    },
    /// The source has no template or layout for this stream.
    Unsupported { address: TileAddress, stream: Stream },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            SourceError::Request(e) => write!(f, "HTTP request failed: {e}"),
            SourceError::Status { address, status } => write!(f, "{address}: HTTP {status}"),
            SourceError::Unsupported { address, stream } => {
                write!(f, "{address}: no {stream:?} stream")
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Read { source, .. } => Some(source),
            SourceError::Request(e) => Some(e),
            SourceError::Status { .. } | SourceError::Unsupported { .. } => None,
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Tile provider used by the replay transport.
///
/// `Ok(None)` means the tile does not exist (a 404), which the transport
/// reports as a failed fetch.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, stream: Stream) -> bool;

    fn get_tile(
        &self,
        address: TileAddress,
        stream: Stream,
        filter: Filter,
    ) -> BoxFuture<'_, Result<Option<Bytes>, SourceError>>;
}

/// Tiles stored as `root/level/x/y.ext`, labels as `root/level/x/y.labels.json`.
pub struct FilesystemSource {
    name: String,
    root: PathBuf,
    extension: String,
}

impl FilesystemSource {
    pub fn new(root: impl AsRef<Path>, extension: impl Into<String>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            name: format!("fs:{}", root.display()),
            root,
            extension: extension.into(),
        }
    }

    pub fn tile_path(&self, address: TileAddress, stream: Stream) -> PathBuf {
        let file = match stream {
            Stream::Base => format!("{}.{}", address.y, self.extension),
            Stream::Labels => format!("{}.labels.json", address.y),
        };
        self.root
            .join(address.level.to_string())
            .join(address.x.to_string())
            .join(file)
    }
}

impl DataSource for FilesystemSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _stream: Stream) -> bool {
        true
    }

    fn get_tile(
        &self,
        address: TileAddress,
        stream: Stream,
        _filter: Filter,
    ) -> BoxFuture<'_, Result<Option<Bytes>, SourceError>> {
        let path = self.tile_path(address, stream);
        Box::pin(async move {
            let read = tokio::fs::read(&path).await;
            match read {
                Ok(data) => Ok(Some(Bytes::from(data))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(SourceError::Read { path, source }),
            }
        })
    }
}

/// Tiles fetched from `{level}`/`{z}`, `{x}`, `{y}` URL templates.
///
/// The filter is forwarded as `layers` and `filter` query parameters.
pub struct HttpSource {
    name: String,
    tiles_template: String,
    labels_template: Option<String>,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(tiles_template: impl Into<String>) -> Self {
        let tiles_template = tiles_template.into();
        Self {
            name: format!("http:{tiles_template}"),
            tiles_template,
            labels_template: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_labels(mut self, labels_template: impl Into<String>) -> Self {
        self.labels_template = Some(labels_template.into());
        self
    }

    pub fn tile_url(&self, address: TileAddress, stream: Stream) -> Option<String> {
        let template = match stream {
            Stream::Base => &self.tiles_template,
            Stream::Labels => self.labels_template.as_ref()?,
        };
        Some(
            template
                .replace("{level}", &address.level.to_string())
                .replace("{z}", &address.level.to_string())
                .replace("{x}", &address.x.to_string())
                .replace("{y}", &address.y.to_string()),
        )
    }
}

fn filter_query(filter: &Filter) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if !filter.layers.is_empty() {
        query.push(("layers", filter.layers.join(",")));
    }
    if let Some(expression) = &filter.expression {
        query.push(("filter", expression.clone()));
    }
    query
}

impl DataSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, stream: Stream) -> bool {
        match stream {
            Stream::Base => true,
            Stream::Labels => self.labels_template.is_some(),
        }
    }

    fn get_tile(
        &self,
        address: TileAddress,
        stream: Stream,
        filter: Filter,
    ) -> BoxFuture<'_, Result<Option<Bytes>, SourceError>> {
        let url = self.tile_url(address, stream);
        Box::pin(async move {
            let Some(url) = url else {
                return Err(SourceError::Unsupported { address, stream });
            };
            let resp = self
                .client
                .get(&url)
                .query(&filter_query(&filter))
                .send()
                .await
                .map_err(SourceError::Request)?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(SourceError::Status {
                    address,
                    status: resp.status(),
                });
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(SourceError::Request)?;
            Ok(Some(bytes))
        })
    }
}

#[cfg(test)]
mod tests {
    use streaming::{Filter, Stream, TileAddress};

    use super::{filter_query, DataSource, FilesystemSource, HttpSource, SourceError};

    #[tokio::test]
    async fn filesystem_source_reads_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let tile_dir = dir.path().join("2").join("1");
        std::fs::create_dir_all(&tile_dir).unwrap();
        std::fs::write(tile_dir.join("3.pbf"), b"base").unwrap();
        std::fs::write(tile_dir.join("3.labels.json"), b"[\"Harbor\"]").unwrap();

        let source = FilesystemSource::new(dir.path(), "pbf");
        let address = TileAddress::new(2, 1, 3);
        let base = source
            .get_tile(address, Stream::Base, Filter::default())
            .await
            .unwrap();
        assert_eq!(base.as_deref(), Some(&b"base"[..]));
        let labels = source
            .get_tile(address, Stream::Labels, Filter::default())
            .await
            .unwrap();
        assert_eq!(labels.as_deref(), Some(&b"[\"Harbor\"]"[..]));
    }

    #[tokio::test]
    async fn filesystem_source_reports_missing_tiles_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilesystemSource::new(dir.path(), "pbf");
        let missing = source
            .get_tile(TileAddress::new(0, 0, 0), Stream::Base, Filter::default())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn http_source_expands_templates() {
        let source = HttpSource::new("https://tiles.example.com/{z}/{x}/{y}.pbf");
        let address = TileAddress::new(4, 3, 9);
        assert_eq!(
            source.tile_url(address, Stream::Base).as_deref(),
            Some("https://tiles.example.com/4/3/9.pbf")
        );
        assert!(!source.supports(Stream::Labels));
        assert_eq!(source.tile_url(address, Stream::Labels), None);

        let source = source.with_labels("https://tiles.example.com/labels/{level}/{x}/{y}");
        assert_eq!(
            source.tile_url(address, Stream::Labels).as_deref(),
            Some("https://tiles.example.com/labels/4/3/9")
        );
    }

    #[tokio::test]
    async fn http_source_without_label_template_rejects_label_fetches() {
        let source = HttpSource::new("http://127.0.0.1:9/{z}/{x}/{y}.pbf");
        let address = TileAddress::new(1, 0, 1);
        let err = source
            .get_tile(address, Stream::Labels, Filter::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SourceError::Unsupported {
                stream: Stream::Labels,
                ..
            }
        ));
        assert_eq!(err.to_string(), "1-0-1: no Labels stream");
    }

    #[tokio::test]
    async fn unreadable_tile_path_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the tile file should be.
        std::fs::create_dir_all(dir.path().join("0").join("0").join("0.pbf")).unwrap();
        let source = FilesystemSource::new(dir.path(), "pbf");
        let err = source
            .get_tile(TileAddress::new(0, 0, 0), Stream::Base, Filter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
    }

    #[test]
    fn filter_becomes_query_parameters() {
        let filter = Filter {
            layers: vec!["roads".into(), "water".into()],
            expression: Some("class = 'primary'".into()),
        };
        assert_eq!(
            filter_query(&filter),
            vec![
                ("layers", "roads,water".to_string()),
                ("filter", "class = 'primary'".to_string())
            ]
        );
        assert!(filter_query(&Filter::default()).is_empty());
    }
}
