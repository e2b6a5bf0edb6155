use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::collections::Catalog;
use crate::config::load_config;
use crate::convention::FieldConvention;
use crate::error::{RapiError, check_maintenance, classify};
use crate::util::{endpoint, guess_filename_from_url, retriable_status};

/// Production RAPI root.
pub const DEFAULT_RAPI_ROOT: &str = "https://www.eodms-sgdot.nrcan-rncan.gc.ca/wes/rapi";

const TIMEOUT_STEP: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ClientConfig {
    /// RAPI root URL, typically [`DEFAULT_RAPI_ROOT`].
    pub url: String,
    /// EODMS account name.
    pub username: String,
    /// EODMS account password.
    pub password: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("verify", &self.verify)
            .finish()
    }
}

/// A session with the EODMS RAPI.
///
/// Clones share the HTTP connection pool, cookies and the collection cache.
#[derive(Clone)]
pub struct Client {
    root: String,
    username: String,
    password: String,

    query_timeout: Duration,
    order_timeout: Duration,
    attempts: usize,
    retry_wait: Duration,
    progress: bool,
    convention: FieldConvention,

    http: HttpClient,
    pub(crate) catalog: Arc<Mutex<Catalog>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("root", &self.root)
            .field("username", &self.username)
            .field("query_timeout", &self.query_timeout)
            .field("order_timeout", &self.order_timeout)
            .field("attempts", &self.attempts)
            .field("convention", &self.convention)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Download URL.
    pub location: String,
    /// Expected content length in bytes; 0 when unknown.
    pub content_length: u64,
    /// Optional content type.
    pub content_type: Option<String>,
}

impl Client {
    /// Creates a client from `EODMS_USER`/`EODMS_PASSWORD` and/or `.eodmsrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `username`/`password` arguments
    /// - environment variables `EODMS_USER` / `EODMS_PASSWORD` / `EODMS_RAPI_URL`
    /// - config file from `EODMS_RC` or `.eodmsrc`
    pub fn new(
        username: Option<String>,
        password: Option<String>,
        verify: Option<bool>,
    ) -> Result<Self> {
        let cfg = load_config(username, password, verify)?;
        Self::with_config(cfg)
    }

    pub fn with_config(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("eodms-rapi-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("eodms-rapi-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .cookie_store(true)
            .timeout(None);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            root: cfg.url.trim_end_matches('/').to_string(),
            username: cfg.username,
            password: cfg.password,
            query_timeout: Duration::from_secs(120),
            order_timeout: Duration::from_secs(180),
            attempts: 4,
            retry_wait: Duration::from_secs(3),
            progress: true,
            convention: FieldConvention::default(),
            http,
            catalog: Arc::new(Mutex::new(Catalog::default())),
        })
    }

    /// Timeout for searches, collection and metadata queries.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Timeout for order submission and order lookups.
    pub fn with_order_timeout(mut self, timeout: Duration) -> Self {
        self.order_timeout = timeout;
        self
    }

    /// Number of tries for a single request (at least 1).
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Pause between two tries of a failed request.
    pub fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_field_convention(mut self, convention: FieldConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Points the client at another RAPI root. The collection cache is reset.
    pub fn with_root_url(mut self, url: impl Into<String>) -> Self {
        self.root = url.into().trim_end_matches('/').to_string();
        self.catalog = Arc::new(Mutex::new(Catalog::default()));
        self
    }

    pub fn root_url(&self) -> &str {
        &self.root
    }

    pub fn field_convention(&self) -> FieldConvention {
        self.convention
    }

    pub(crate) fn progress(&self) -> bool {
        self.progress
    }

    pub(crate) fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub(crate) fn order_timeout(&self) -> Duration {
        self.order_timeout
    }

    pub(crate) fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<String> {
        endpoint(&self.root, segments, query)
    }

    /// Returns `Ok(false)` when the RAPI rejects the account credentials.
    pub fn check_auth(&self) -> Result<bool> {
        let url = self.url(&["collections"], &[("format", "json")])?;
        match self.get_json::<Value>(&url, self.query_timeout) {
            Ok(_) => Ok(true),
            Err(e) => match e.downcast_ref::<RapiError>() {
                Some(RapiError::Unauthorized { .. }) => Ok(false),
                _ => Err(e),
            },
        }
    }

    /// RAPI service metadata.
    pub fn get_metadata(&self) -> Result<Value> {
        let url = self.url(&["metadata"], &[("format", "json")])?;
        self.get_json(&url, self.query_timeout)
    }

    /// Ends the EODMS web session held in the cookie store.
    pub fn logout(&self) -> Result<()> {
        let base = url::Url::parse(&self.root)
            .with_context(|| format!("invalid RAPI root URL: {}", self.root))?;
        let logout = base
            .join("logout.jsp")
            .context("failed to build logout URL")?;
        info!("Logging out of EODMS");
        self.send::<Value>(Method::GET, logout.as_str(), None, self.query_timeout)?;
        Ok(())
    }

    /// Downloads `file` to `target`, resuming a partial file and skipping a
    /// complete one.
    pub fn download_file(&self, file: &RemoteFile, target: &Path) -> Result<PathBuf> {
        let target = if target.as_os_str().is_empty() {
            guess_filename_from_url(&file.location)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("download"))
        } else {
            target.to_path_buf()
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }

        let known_size = file.content_length > 0;
        let mut downloaded: u64 = 0;
        let mut range_from: Option<u64> = None;

        if target.exists() {
            let existing = std::fs::metadata(&target)?.len();
            if known_size && existing == file.content_length {
                info!(path = %target.display(), "No download necessary, local file already exists");
                return Ok(target);
            }
            if known_size && existing < file.content_length {
                downloaded = existing;
                range_from = Some(existing);
            } else if existing > 0 {
                warn!(path = %target.display(), "File size mismatch, downloading again");
            }
        }

        let pb = if self.progress {
            let pb = ProgressBar::new(file.content_length);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} {msg} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
                )
                .context("invalid progress bar template")?
                .progress_chars("=>-"),
            );
            if let Some(name) = target.file_name() {
                pb.set_message(name.to_string_lossy().into_owned());
            }
            pb.set_position(downloaded);
            Some(pb)
        } else {
            None
        };

        let mut tries = 0usize;
        'download_attempt: while tries < self.attempts {
            let mut headers = HeaderMap::new();
            if let Some(from) = range_from {
                headers.insert(RANGE, HeaderValue::from_str(&format!("bytes={}-", from))?);
            }

            let mut resp = self.send_with_headers(
                Method::GET,
                &file.location,
                headers,
                self.order_timeout,
            )?;

            // A server that ignores the Range header sends the whole file again.
            let append = range_from.is_some() && resp.status() == StatusCode::PARTIAL_CONTENT;
            if !append {
                downloaded = 0;
                if let Some(pb) = &pb {
                    pb.set_position(0);
                }
            }

            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&target)
                .with_context(|| format!("failed to open {}", target.display()))?;

            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match resp.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tries += 1;
                        if tries >= self.attempts {
                            return Err(e).context("download interrupted");
                        }
                        warn!(error = %e, attempt = tries, "Download interrupted, resuming");

                        out.flush().ok();
                        downloaded = std::fs::metadata(&target)?.len();
                        range_from = Some(downloaded);
                        if let Some(pb) = &pb {
                            pb.set_position(downloaded);
                        }
                        thread::sleep(self.retry_wait);
                        continue 'download_attempt;
                    }
                };

                out.write_all(&buf[..n])?;
                downloaded += n as u64;
                if let Some(pb) = &pb {
                    pb.inc(n as u64);
                }
            }

            out.flush()?;

            if !known_size || downloaded >= file.content_length {
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                info!(path = %target.display(), bytes = downloaded, "Download complete");
                return Ok(target);
            }

            tries += 1;
            downloaded = std::fs::metadata(&target)?.len();
            range_from = Some(downloaded);
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
            thread::sleep(self.retry_wait);
        }

        Err(anyhow!(
            "download failed: downloaded {} byte(s) out of {}",
            downloaded,
            file.content_length
        ))
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        req.basic_auth(&self.username, Some(&self.password))
    }

    pub(crate) fn get_json<TResp: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<TResp> {
        self.api_json::<Value, TResp>(Method::GET, url, None, timeout)
    }

    pub(crate) fn api_json<TReq: Serialize + ?Sized, TResp: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        request: Option<&TReq>,
        timeout: Duration,
    ) -> Result<TResp> {
        let text = self.api_text(method, url, request, timeout)?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str::<TResp>(text)
            .with_context(|| format!("failed to parse RAPI JSON (url={})", url))
    }

    pub(crate) fn api_text<TReq: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        request: Option<&TReq>,
        timeout: Duration,
    ) -> Result<String> {
        let resp = self.send(method, url, request, timeout)?;
        let text = resp
            .text()
            .with_context(|| format!("failed to read RAPI response (url={})", url))?;
        check_maintenance(&text)?;
        Ok(text)
    }

    /// Sends one request (retrying transient failures) and turns an
    /// unsuccessful status into a [`RapiError`].
    pub(crate) fn send<TReq: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        request: Option<&TReq>,
        timeout: Duration,
    ) -> Result<Response> {
        debug!(%method, url, "RAPI request");
        if let Some(body) = request {
            if let Ok(json) = serde_json::to_string(body) {
                debug!(body = %json, "RAPI request body");
            }
        }

        let resp = self.robust_request(timeout, |t| {
            let mut req = self.apply_auth(self.http.request(method.clone(), url)).timeout(t);
            if let Some(body) = request {
                req = req.json(body);
            }
            req.send()
        })?;
        check_status(resp, url)
    }

    pub(crate) fn send_with_headers(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Response> {
        debug!(%method, url, "RAPI request");
        let resp = self.robust_request(timeout, |t| {
            self.apply_auth(self.http.request(method.clone(), url))
                .headers(headers.clone())
                .timeout(t)
                .send()
        })?;
        check_status(resp, url)
    }

    fn robust_request<F>(&self, timeout: Duration, mut f: F) -> Result<Response>
    where
        F: FnMut(Duration) -> std::result::Result<Response, reqwest::Error>,
    {
        let mut timeout = timeout;
        let mut tries = 0usize;
        loop {
            tries += 1;
            match f(timeout) {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if retriable_status(status) && tries < self.attempts {
                        warn!(status, attempt = tries, "RAPI request failed, attempting to connect again");
                        thread::sleep(self.retry_wait);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if tries >= self.attempts {
                        return Err(err)
                            .with_context(|| format!("could not reach the RAPI after {} attempt(s)", tries));
                    }
                    if err.is_timeout() {
                        timeout += TIMEOUT_STEP;
                        warn!(
                            attempt = tries,
                            timeout_secs = timeout.as_secs(),
                            "RAPI request timed out, increasing timeout and trying again"
                        );
                    } else {
                        warn!(error = %err, attempt = tries, "RAPI request failed, attempting to connect again");
                    }
                    thread::sleep(self.retry_wait);
                }
            }
        }
    }
}

fn check_status(resp: Response, url: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    check_maintenance(&body)?;
    Err(classify(status, url, &body).into())
}
