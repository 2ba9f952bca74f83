//! Cache protocol client.
//!
//! A save runs `reserve -> upload chunks -> commit`; a restore runs
//! `lookup -> download -> verify`. Calls to the cache service go through an
//! authenticated [`HttpClient`]; archive downloads go through an anonymous
//! one, since archive locations are pre-signed.

use std::fmt;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use stowbox_http::{
    BearerCredentialHandler, Headers, HttpClient, HttpClientConfig, RequestBody, Response,
    StatusCode, Url,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt};
use tracing::{debug, info, instrument, warn};

use crate::config::{ServiceConfig, UploadOptions};
use crate::entry::{
    ArtifactCacheEntry, CacheEntry, CommitCacheRequest, ReservationId, ReserveCacheRequest,
    ReserveCacheResponse,
};
use crate::error::CacheError;
use crate::key::{check_key, check_keys};
use crate::mask::{SecretMasker, WorkflowCommandMasker};
use crate::metrics;
use crate::range::ByteRange;

const API_PATH: &str = "_apis/artifactcache/";
const API_ACCEPT: &str = "application/json;api-version=6.0-preview.1";
const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Characters escaped in query values: everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Client of the artifact cache service.
pub struct CacheClient {
    config: ServiceConfig,
    api: HttpClient,
    blob: HttpClient,
    masker: Arc<dyn SecretMasker>,
}

impl CacheClient {
    /// Creates a client with default HTTP settings that masks archive
    /// locations through workflow commands.
    pub fn new(config: ServiceConfig) -> Result<Self, CacheError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ServiceConfig) -> CacheClientBuilder {
        CacheClientBuilder::new(config)
    }

    /// URL of `resource` on the artifact cache endpoint.
    ///
    /// The runtime service URL points at the pipelines service; its
    /// `pipelines` segment is swapped for `artifactcache`.
    pub fn resolve_service_url(&self, resource: &str) -> Result<Url, CacheError> {
        let base = self.config.service_url().trim();
        if base.is_empty() {
            return Err(CacheError::Configuration(
                "cache service url is empty".to_owned(),
            ));
        }

        let mut base = base.replacen("pipelines", "artifactcache", 1);
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Url::parse(&base)?.join(API_PATH)?.join(resource)?)
    }

    fn reservation_url(&self, reservation: ReservationId) -> Result<Url, CacheError> {
        self.resolve_service_url(&format!("caches/{reservation}"))
    }

    /// Looks up the first entry matching one of `keys` at `version`.
    ///
    /// Returns `Ok(None)` when the service has no matching entry. On a hit
    /// the archive location is registered with the secret masker before it is
    /// returned.
    #[instrument(skip(self))]
    pub async fn get_cache_entry(
        &self,
        keys: &[&str],
        version: &str,
    ) -> Result<Option<CacheEntry>, CacheError> {
        check_keys(keys)?;

        let mut url = self.resolve_service_url("cache")?;
        url.set_query(Some(&format!(
            "keys={}&version={}",
            utf8_percent_encode(&keys.join(","), URI_COMPONENT),
            utf8_percent_encode(version, URI_COMPONENT),
        )));

        let response = self.api.get(url, &Headers::new()).await?;
        if response.status() == StatusCode::NO_CONTENT {
            debug!("cache miss");
            metrics::record_lookup(false);
            return Ok(None);
        }
        if !response.is_success() {
            return Err(service_error(response).await);
        }

        let raw: ArtifactCacheEntry = response.json().await?;
        let entry = CacheEntry::try_from(raw)?;
        self.masker.mask(entry.archive_location.as_str());
        metrics::record_lookup(true);

        debug!(cache_key = %entry.cache_key, scope = %entry.scope, "cache hit");
        Ok(Some(entry))
    }

    pub async fn has_cache(&self, keys: &[&str], version: &str) -> Result<bool, CacheError> {
        Ok(self.get_cache_entry(keys, version).await?.is_some())
    }

    /// Streams the archive at `url` into `destination`, creating parent
    /// directories, and returns the size of the written file.
    ///
    /// When the response announces a `Content-Length`, the file must end up
    /// exactly that long, even if the connection drops mid-body. A failed
    /// download removes the partial file.
    #[instrument(skip(self, url, destination), fields(destination = %destination.display()))]
    pub async fn download_file(&self, url: &Url, destination: &Path) -> Result<u64, CacheError> {
        let response = self.blob.get(url, &Headers::new()).await?;
        if !response.is_success() {
            return Err(service_error(response).await);
        }
        let expected = response.content_length();

        if let Some(parent) = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(destination).await?;
        let piped = response.pipe_to(&mut file).await;
        drop(file);

        let actual = tokio::fs::metadata(destination).await?.len();
        let verified = match piped {
            Ok(written) => {
                metrics::record_download(written);
                verify_download_size(expected, actual)
            }
            Err(error) => {
                warn!(%error, bytes = actual, "archive body ended early");
                verify_download_size(expected, actual).and(Err(error.into()))
            }
        };
        if let Err(error) = verified {
            discard_partial(destination).await;
            return Err(error);
        }

        debug!(bytes = actual, "download complete");
        Ok(actual)
    }

    /// Reserves `key` at `version` for writing.
    ///
    /// Returns `Ok(None)` when another writer already holds the reservation
    /// or when the service does not hand out an id; either way the caller
    /// must not upload.
    #[instrument(skip(self))]
    pub async fn reserve_cache(
        &self,
        key: &str,
        version: &str,
    ) -> Result<Option<ReservationId>, CacheError> {
        check_key(key)?;

        let url = self.resolve_service_url("caches")?;
        let body = serde_json::to_string(&ReserveCacheRequest { key, version })?;
        let response = self.api.post(url, body, &json_headers()).await?;

        if response.status() == StatusCode::CONFLICT {
            info!("cache is already reserved by another writer");
            metrics::record_reservation_conflict();
            return Ok(None);
        }
        if !response.is_success() {
            return Err(service_error(response).await);
        }

        let body = response.read_body().await?;
        let cache_id = if body.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<ReserveCacheResponse>(&body)?.cache_id
        };
        if cache_id.is_none() {
            warn!("reservation response carries no cache id");
        }
        Ok(cache_id.map(ReservationId::new))
    }

    /// Uploads one chunk of a reservation.
    ///
    /// `open` yields a reader positioned at `range.start`; exactly
    /// `range.len()` bytes are read from it.
    #[instrument(skip(self, open))]
    pub async fn upload_chunk<F, Fut, R>(
        &self,
        reservation: ReservationId,
        open: F,
        range: ByteRange,
    ) -> Result<(), CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = io::Result<R>>,
        R: AsyncRead + Send + Sync + 'static,
    {
        let reader = open().await?;
        let body = RequestBody::from_reader_with_length(reader, range.len());
        self.send_chunk(reservation, body, range).await
    }

    async fn send_chunk(
        &self,
        reservation: ReservationId,
        body: RequestBody,
        range: ByteRange,
    ) -> Result<(), CacheError> {
        let url = self.reservation_url(reservation)?;
        let mut headers = Headers::new();
        headers
            .set("content-type", "application/octet-stream")
            .set("content-range", range.content_range());

        let started = Instant::now();
        let result = async {
            let response = self.api.patch(url, body, &headers).await?;
            if !response.is_success() {
                return Err(service_error(response).await);
            }
            Ok::<(), CacheError>(())
        }
        .await;
        metrics::record_chunk_upload(range.len(), started.elapsed(), result.is_ok());
        result
    }

    /// Uploads the file at `path` in chunks and returns its size.
    ///
    /// The file is cut into `ceil(size / max_chunk_size)` contiguous chunks,
    /// at most `concurrency` of them in flight. Each chunk reads through its
    /// own handle. After the first failure no new chunk is started; chunks
    /// already in flight are awaited and the first failure is returned.
    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn upload_file(
        &self,
        reservation: ReservationId,
        path: &Path,
        options: &UploadOptions,
    ) -> Result<u64, CacheError> {
        let size = tokio::fs::metadata(path).await?.len();
        let concurrency = options.concurrency.max(1);
        let mut ranges = ByteRange::tile(size, options.max_chunk_size);

        let mut in_flight = FuturesUnordered::new();
        let mut failure = None;
        loop {
            while failure.is_none() && in_flight.len() < concurrency {
                let Some(range) = ranges.next() else {
                    break;
                };
                in_flight.push(self.upload_chunk(
                    reservation,
                    move || open_at(path, range.start),
                    range,
                ));
            }

            match in_flight.next().await {
                Some(Ok(())) => {}
                Some(Err(error)) => {
                    if failure.is_none() {
                        warn!(
                            %error,
                            in_flight = in_flight.len(),
                            "chunk upload failed, no further chunks will be started"
                        );
                        failure = Some(error);
                    }
                }
                None => break,
            }
        }

        match failure {
            Some(error) => Err(error),
            None => {
                debug!(size, "file uploaded");
                Ok(size)
            }
        }
    }

    /// Finalizes a reservation; `size` is the total blob length.
    #[instrument(skip(self))]
    pub async fn commit_cache(
        &self,
        reservation: ReservationId,
        size: u64,
    ) -> Result<(), CacheError> {
        let url = self.reservation_url(reservation)?;
        let body = serde_json::to_string(&CommitCacheRequest { size })?;
        let response = self.api.post(url, body, &json_headers()).await?;
        if !response.is_success() {
            return Err(service_error(response).await);
        }

        debug!("cache committed");
        Ok(())
    }

    /// [`upload_file`](Self::upload_file) followed by
    /// [`commit_cache`](Self::commit_cache) with the uploaded size.
    pub async fn save_file(
        &self,
        reservation: ReservationId,
        path: &Path,
        options: &UploadOptions,
    ) -> Result<u64, CacheError> {
        let size = self.upload_file(reservation, path, options).await?;
        self.commit_cache(reservation, size).await?;
        Ok(size)
    }

    /// Uploads `text` as a single chunk.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn upload_text(
        &self,
        reservation: ReservationId,
        text: &str,
    ) -> Result<(), CacheError> {
        if text.is_empty() {
            return Ok(());
        }
        let range = ByteRange::new(0, text.len() as u64);
        self.send_chunk(reservation, RequestBody::from(text.to_owned()), range)
            .await
    }

    pub async fn save_text(&self, reservation: ReservationId, text: &str) -> Result<(), CacheError> {
        self.upload_text(reservation, text).await?;
        self.commit_cache(reservation, text.len() as u64).await
    }

    /// Buffers the archive at `url` into a string.
    #[instrument(skip_all)]
    pub async fn read_url(&self, url: &Url) -> Result<String, CacheError> {
        let response = self.blob.get(url, &Headers::new()).await?;
        if !response.is_success() {
            return Err(service_error(response).await);
        }
        Ok(response.read_body().await?)
    }

    pub async fn read_cache_entry(
        &self,
        keys: &[&str],
        version: &str,
    ) -> Result<Option<String>, CacheError> {
        match self.get_cache_entry(keys, version).await? {
            Some(entry) => Ok(Some(self.read_url(&entry.archive_location).await?)),
            None => Ok(None),
        }
    }

    /// Stores the file at `path` under `key` and `version`.
    ///
    /// Returns `Ok(None)` without uploading when another writer holds the
    /// reservation. The service offers no way to release a reservation, so a
    /// failed upload or commit leaves it open until the service expires it.
    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn save(
        &self,
        key: &str,
        version: &str,
        path: &Path,
        options: &UploadOptions,
    ) -> Result<Option<ReservationId>, CacheError> {
        let Some(reservation) = self.reserve_cache(key, version).await? else {
            return Ok(None);
        };

        match self.save_file(reservation, path, options).await {
            Ok(size) => {
                info!(%reservation, size, "cache saved");
                Ok(Some(reservation))
            }
            Err(error) => {
                warn!(%reservation, %error, "saving failed, reservation is left open");
                Err(error)
            }
        }
    }

    /// Downloads the first entry matching `keys` at `version` into
    /// `destination`.
    #[instrument(skip(self, destination), fields(destination = %destination.display()))]
    pub async fn restore(
        &self,
        keys: &[&str],
        version: &str,
        destination: &Path,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let Some(entry) = self.get_cache_entry(keys, version).await? else {
            return Ok(None);
        };
        let size = self.download_file(&entry.archive_location, destination).await?;

        info!(cache_key = %entry.cache_key, size, "cache restored");
        Ok(Some(entry))
    }

    /// Releases both connection pools.
    pub fn dispose(self) {
        self.api.dispose();
        self.blob.dispose();
    }
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CacheClient`].
pub struct CacheClientBuilder {
    config: ServiceConfig,
    http: HttpClientConfig,
    masker: Arc<dyn SecretMasker>,
}

impl CacheClientBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            http: HttpClientConfig::default(),
            masker: Arc::new(WorkflowCommandMasker),
        }
    }

    /// Settings shared by the service and the archive clients.
    pub fn http_config(self, http: HttpClientConfig) -> Self {
        CacheClientBuilder { http, ..self }
    }

    pub fn masker<M>(self, masker: M) -> Self
    where
        M: SecretMasker + 'static,
    {
        CacheClientBuilder {
            masker: Arc::new(masker),
            ..self
        }
    }

    pub fn build(self) -> Result<CacheClient, CacheError> {
        let mut http = self.http;
        http.user_agent
            .get_or_insert_with(|| DEFAULT_USER_AGENT.to_owned());

        let api = HttpClient::builder()
            .config(http.clone())
            .header("accept", API_ACCEPT)
            .handler(BearerCredentialHandler::new(self.config.runtime_token()))
            .build()?;
        let blob = HttpClient::new(http)?;

        Ok(CacheClient {
            config: self.config,
            api,
            blob,
            masker: self.masker,
        })
    }
}

/// Checks a finished download against the announced length.
pub(crate) fn verify_download_size(expected: Option<u64>, actual: u64) -> Result<(), CacheError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(CacheError::IncompleteDownload { expected, actual })
        }
        Some(_) => Ok(()),
        None => {
            debug!("no content-length, skipping download size check");
            Ok(())
        }
    }
}

async fn discard_partial(destination: &Path) {
    if let Err(error) = tokio::fs::remove_file(destination).await {
        warn!(%error, "failed to remove partial download");
    }
}

async fn open_at(path: &Path, offset: u64) -> io::Result<File> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(file)
}

async fn service_error(response: Response) -> CacheError {
    let status = response.status();
    let body = response
        .read_body()
        .await
        .unwrap_or_else(|error| error.to_string());
    CacheError::Service { status, body }
}

fn json_headers() -> Headers {
    let mut headers = Headers::new();
    headers.set("content-type", "application/json");
    headers
}
