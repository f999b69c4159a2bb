//! Schema loading from various sources.
//!
//! Handles loading schemas from files, strings, and HTTP URLs, and provides
//! [`SourceRetriever`], the [`Retrieve`] implementation used by the CLI.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{LoadError, RetrieveError};
use crate::types::Retrieve;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a schema from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a schema from a JSON string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_schema_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a schema from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the status is
/// not a success, or if the body isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_schema_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    debug!(url, "fetching schema");
    client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .and_then(reqwest::blocking::Response::json::<Value>)
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// `file://` URL for a local path, used as the base URI of a schema loaded from disk.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the path can't be canonicalized.
pub fn file_uri(path: &Path) -> Result<String, LoadError> {
    let canonical = path.canonicalize().map_err(|_| LoadError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    Url::from_file_path(&canonical)
        .map(String::from)
        .map_err(|()| LoadError::UnsupportedLocation {
            uri: canonical.display().to_string(),
        })
}

/// Load a schema from a file path or URL.
///
/// Automatically detects whether the source is a URL or file path.
/// URL loading requires the `remote` feature.
///
/// # Errors
///
/// Returns appropriate errors based on the source type.
pub fn load_schema_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_schema_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::UnsupportedLocation {
                uri: source.to_string(),
            })
        }
    } else {
        load_schema(Path::new(source))
    }
}

/// Retrieves referenced documents from disk and, with the `remote` feature, HTTP.
///
/// URIs starting with the configured remote base are served from the local
/// base directory instead of the network:
///
/// ```text
/// remote_base = "https://example.com/schemas"
/// local_base  = "site"
/// https://example.com/schemas/types/pet.json -> site/types/pet.json
/// ```
///
/// Relative URIs (from a schema with a relative base) are resolved against
/// `base_dir`.
#[derive(Debug, Clone, Default)]
pub struct SourceRetriever {
    base_dir: PathBuf,
    url_mapping: Option<(PathBuf, String)>,
}

impl SourceRetriever {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            url_mapping: None,
        }
    }

    /// Serve URIs under `remote_base` from `local_base`.
    pub fn with_url_mapping(
        mut self,
        local_base: impl Into<PathBuf>,
        remote_base: impl Into<String>,
    ) -> Self {
        self.url_mapping = Some((local_base.into(), remote_base.into()));
        self
    }

    /// Load the document a URI names.
    ///
    /// # Errors
    ///
    /// Returns the underlying `LoadError`; `LoadError::UnsupportedLocation`
    /// for schemes other than `file` and `http(s)`.
    pub fn load(&self, uri: &str) -> Result<Value, LoadError> {
        if let Some(path) = self.mapped_path(uri) {
            debug!(uri, path = %path.display(), "serving mapped URI from disk");
            return load_schema(&path);
        }

        if is_url(uri) {
            #[cfg(feature = "remote")]
            {
                return load_schema_url(uri);
            }
            #[cfg(not(feature = "remote"))]
            {
                return Err(LoadError::UnsupportedLocation {
                    uri: uri.to_string(),
                });
            }
        }

        match Url::parse(uri) {
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| LoadError::UnsupportedLocation {
                        uri: uri.to_string(),
                    })?;
                load_schema(&path)
            }
            Ok(_) => Err(LoadError::UnsupportedLocation {
                uri: uri.to_string(),
            }),
            Err(_) => load_schema(&self.base_dir.join(uri)),
        }
    }

    fn mapped_path(&self, uri: &str) -> Option<PathBuf> {
        let (local_base, remote_base) = self.url_mapping.as_ref()?;
        let remainder = uri.strip_prefix(remote_base.as_str())?;
        Some(local_base.join(remainder.trim_start_matches('/')))
    }
}

impl Retrieve for SourceRetriever {
    fn retrieve(&self, uri: &str) -> Result<Value, RetrieveError> {
        self.load(uri).map_err(RetrieveError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn load_schema_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let schema = load_schema(file.path()).unwrap();
        assert_eq!(schema["type"], "object");
    }

    #[test]
    fn load_schema_file_not_found() {
        let result = load_schema(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_schema_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_schema(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_schema_str_valid() {
        let schema = load_schema_str(r#"{"type": "object"}"#).unwrap();
        assert_eq!(schema["type"], "object");
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://example.com/schema.json"));
        assert!(is_url("http://example.com/schema.json"));
        assert!(!is_url("/path/to/schema.json"));
        assert!(!is_url("file:///path/to/schema.json"));
        assert!(!is_url("schema.json"));
    }

    #[test]
    fn load_schema_auto_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "string"}}"#).unwrap();

        let schema = load_schema_auto(file.path().to_str().unwrap()).unwrap();
        assert_eq!(schema["type"], "string");
    }

    #[test]
    fn file_uri_round_trips_through_retriever() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "integer"}}"#).unwrap();

        let uri = file_uri(file.path()).unwrap();
        assert!(uri.starts_with("file://"));
        let schema = SourceRetriever::default().load(&uri).unwrap();
        assert_eq!(schema["type"], "integer");
    }

    #[test]
    fn relative_uri_resolves_against_base_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("types")).unwrap();
        std::fs::write(dir.path().join("types/pet.json"), r#"{"type": "object"}"#).unwrap();

        let retriever = SourceRetriever::new(dir.path());
        let schema = retriever.load("types/pet.json").unwrap();
        assert_eq!(schema["type"], "object");
    }

    #[test]
    fn mapped_url_served_from_local_base() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("schemas")).unwrap();
        std::fs::write(dir.path().join("schemas/pet.json"), r#"{"title": "Pet"}"#).unwrap();

        let retriever = SourceRetriever::new("/unused")
            .with_url_mapping(dir.path(), "https://example.com/draft");
        let schema = retriever
            .load("https://example.com/draft/schemas/pet.json")
            .unwrap();
        assert_eq!(schema["title"], "Pet");
    }

    #[test]
    fn mapping_ignores_other_prefixes() {
        let retriever = SourceRetriever::new("/some/dir")
            .with_url_mapping("/local", "https://example.com/draft");
        assert_eq!(
            retriever.mapped_path("https://example.com/draft/schemas/foo.json"),
            Some(PathBuf::from("/local/schemas/foo.json"))
        );
        assert_eq!(retriever.mapped_path("https://other.com/foo.json"), None);
    }

    #[test]
    fn unsupported_scheme() {
        let result = SourceRetriever::default().load("urn:example:schema");
        assert!(matches!(result, Err(LoadError::UnsupportedLocation { .. })));
    }

    #[test]
    fn retrieve_boxes_load_error() {
        let err = SourceRetriever::new("/nonexistent")
            .retrieve("missing.json")
            .unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn load_schema_url_valid() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/schema.json")
                .with_header("content-type", "application/json")
                .with_body(r#"{"type": "boolean"}"#)
                .create();

            let schema = load_schema_url(&format!("{}/schema.json", server.url())).unwrap();
            assert_eq!(schema["type"], "boolean");
            mock.assert();
        }

        #[test]
        fn load_schema_url_404() {
            let mut server = mockito::Server::new();
            server.mock("GET", "/missing.json").with_status(404).create();

            let result = load_schema_url(&format!("{}/missing.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }

        #[test]
        fn load_schema_url_invalid_host() {
            let result =
                load_schema_url("https://this-domain-does-not-exist-12345.invalid/schema.json");
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }
    }
}
