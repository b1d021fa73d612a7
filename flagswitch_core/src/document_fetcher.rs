//! A client that loads rule documents from HTTP(S) URLs or local files.
use std::{
    fmt,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use reqwest::header::{CACHE_CONTROL, PRAGMA};
use url::Url;

use crate::{
    document_store::DocumentSnapshot, Error, FetchError, Result, RuleDocument,
};

/// Where a document is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentLocation {
    Http(Url),
    File(PathBuf),
}

impl DocumentLocation {
    /// Parse a location string: an `http(s)://` URL, a `file://` URL, or a plain filesystem path.
    pub fn parse(location: &str) -> Result<DocumentLocation> {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = Url::parse(location).map_err(Error::InvalidUrl)?;
            return Ok(DocumentLocation::Http(url));
        }
        if location.starts_with("file://") {
            let url = Url::parse(location).map_err(Error::InvalidUrl)?;
            let path = url
                .to_file_path()
                .map_err(|()| Error::InvalidLocation(location.to_owned()))?;
            return Ok(DocumentLocation::File(path));
        }
        Ok(DocumentLocation::File(PathBuf::from(location)))
    }
}

impl fmt::Display for DocumentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentLocation::Http(url) => write!(f, "{url}"),
            DocumentLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Fetches documents from a fixed location, always bypassing intermediary caches.
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    location: DocumentLocation,
}

impl DocumentFetcher {
    pub fn new(location: DocumentLocation) -> DocumentFetcher {
        DocumentFetcher::with_client(reqwest::Client::new(), location)
    }

    pub fn with_client(client: reqwest::Client, location: DocumentLocation) -> DocumentFetcher {
        DocumentFetcher { client, location }
    }

    pub fn location(&self) -> &DocumentLocation {
        &self.location
    }

    /// Fetch and parse a document.
    pub async fn fetch<D: RuleDocument>(&self) -> Result<DocumentSnapshot<D>> {
        let bytes = self.fetch_bytes().await?;
        let document = D::from_slice(&bytes).map_err(|err| self.error(err))?;
        log::debug!(target: "flagswitch", location:% = self.location, format = D::FORMAT; "successfully loaded document");
        Ok(DocumentSnapshot::new(document, bytes))
    }

    /// Fetch the raw document bytes.
    pub async fn fetch_bytes(&self) -> Result<Vec<u8>> {
        let result = match &self.location {
            DocumentLocation::Http(url) => self.fetch_http(url.clone()).await,
            DocumentLocation::File(path) => tokio::fs::read(path).await.map_err(FetchError::from),
        };
        result.map_err(|err| {
            log::warn!(target: "flagswitch", location:% = self.location; "failed to fetch document: {err}");
            self.error(err)
        })
    }

    async fn fetch_http(&self, mut url: Url) -> std::result::Result<Vec<u8>, FetchError> {
        // A unique query parameter defeats caches that ignore request headers.
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        url.query_pairs_mut().append_pair("_", &millis.to_string());

        log::debug!(target: "flagswitch", location:% = self.location; "fetching document");
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }

    fn error(&self, source: FetchError) -> Error {
        Error::DocumentFetch {
            location: self.location.to_string(),
            source,
        }
    }
}
