//! Polls order items until the RAPI makes them available, then downloads them.

use anyhow::{Context, Result};
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

use crate::client::{Client, RemoteFile};
use crate::error::{RapiError, is_fatal};
use crate::order::{OrderItem, find_item_in_orders, remove_duplicate_orders};
use crate::util::{guess_filename_from_url, html_hrefs};

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    /// Pause before every check of the order status.
    pub wait: Duration,
    /// Number of status checks before giving up; unlimited when `None`.
    pub max_attempts: Option<usize>,
    /// Overall time budget; unlimited when `None`.
    pub timeout: Option<Duration>,
    pub show_progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(10),
            max_attempts: None,
            timeout: None,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPath {
    pub url: String,
    pub local_destination: PathBuf,
}

/// An order item that reached a final state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedItem {
    #[serde(flatten)]
    pub item: OrderItem,
    /// False for items that failed, expired or were cancelled.
    pub downloaded: bool,
    pub download_paths: Vec<DownloadPath>,
}

/// `name_{record_id}.ext`
fn with_record_suffix(name: &str, record_id: &str) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, record_id, ext.to_string_lossy()),
        None => format!("{}_{}", stem, record_id),
    }
}

/// Where a downloaded file or folder goes. A name already written during
/// this run gets the record id appended.
fn local_target(dest: &Path, name: &str, record_id: &str, used: &HashSet<PathBuf>) -> PathBuf {
    let target = dest.join(name);
    if used.contains(&target) {
        dest.join(with_record_suffix(name, record_id))
    } else {
        target
    }
}

impl Client {
    /// Waits for `items` to become available and downloads them into `dest`.
    ///
    /// Returns every item that reached a final state. Fails with
    /// [`RapiError::AttemptsExhausted`] when the attempt or time budget runs
    /// out first; files downloaded up to then stay on disk.
    pub fn download(
        &self,
        items: &[OrderItem],
        dest: &Path,
        opts: &DownloadOptions,
    ) -> Result<Vec<DownloadedItem>> {
        if items.is_empty() {
            info!("No images to download");
            return Ok(Vec::new());
        }

        let client = self.clone().with_progress(self.progress() && opts.show_progress);
        let unique = remove_duplicate_orders(items);
        info!(count = unique.len(), dest = %dest.display(), "Downloading images...");

        let started = Instant::now();
        let mut complete: Vec<DownloadedItem> = Vec::new();
        let mut done: HashSet<String> = HashSet::new();
        let mut used_paths: HashSet<PathBuf> = HashSet::new();
        let mut attempt = 0usize;

        while done.len() < unique.len() {
            thread::sleep(opts.wait);
            attempt += 1;

            let out_of_attempts = opts.max_attempts.is_some_and(|max| attempt > max);
            let out_of_time = opts.timeout.is_some_and(|t| started.elapsed() > t);
            if out_of_attempts || out_of_time {
                let pending = unique
                    .iter()
                    .filter(|i| !done.contains(&i.item_id))
                    .map(|i| i.item_id.clone())
                    .collect();
                return Err(RapiError::AttemptsExhausted {
                    attempts: attempt - 1,
                    completed: complete.len(),
                    pending,
                }
                .into());
            }

            let pending: Vec<OrderItem> = unique
                .iter()
                .filter(|i| !done.contains(&i.item_id))
                .cloned()
                .collect();
            let orders = client.get_orders_for_items(&pending)?;
            if orders.is_empty() {
                info!(attempt, "No orders could be found yet");
                continue;
            }

            let before = complete.len();
            for wanted in &pending {
                let Some(cur) = find_item_in_orders(&wanted.item_id, &orders) else {
                    continue;
                };

                if cur.is_failed() {
                    if cur.status == "FAILED" {
                        warn!(
                            item_id = %cur.item_id,
                            order_id = %cur.order_id,
                            record_id = %cur.record_id,
                            collection = %cur.collection_id,
                            reason = cur.status_message.as_deref().unwrap_or("unknown"),
                            "Order item has failed"
                        );
                    } else {
                        info!(
                            item_id = %cur.item_id,
                            record_id = %cur.record_id,
                            collection = %cur.collection_id,
                            status = %cur.status,
                            "Order item will not be downloaded"
                        );
                    }
                    done.insert(wanted.item_id.clone());
                    complete.push(DownloadedItem {
                        item: cur.clone(),
                        downloaded: false,
                        download_paths: Vec::new(),
                    });
                } else if cur.is_available() {
                    let download_paths = client.download_item(cur, dest, &mut used_paths)?;
                    done.insert(wanted.item_id.clone());
                    complete.push(DownloadedItem {
                        item: cur.clone(),
                        downloaded: true,
                        download_paths,
                    });
                }
            }

            if complete.is_empty() {
                info!(attempt, "No items are ready for download yet");
            } else if complete.len() == before {
                info!(attempt, "No new items are ready for download yet");
            }
        }

        info!(count = complete.len(), "Downloads finished");
        Ok(complete)
    }

    fn download_item(
        &self,
        item: &OrderItem,
        dest: &Path,
        used_paths: &mut HashSet<PathBuf>,
    ) -> Result<Vec<DownloadPath>> {
        std::fs::create_dir_all(dest)
            .with_context(|| format!("failed to create directory {}", dest.display()))?;

        let mut paths = Vec::new();
        for file in item.remote_files() {
            let Some(name) = guess_filename_from_url(&file.location) else {
                warn!(url = %file.location, "Cannot name a local file for download URL, skipping");
                continue;
            };
            let target = local_target(dest, &name, &item.record_id, used_paths);

            info!(
                item_id = %item.item_id,
                order_id = %item.order_id,
                collection = %item.collection_id,
                record_id = %item.record_id,
                file = %name,
                "Downloading order item"
            );

            let res = if file.location.ends_with(".zip") {
                self.download_file(&file, &target).map(|_| ())
            } else {
                self.download_folder(&file.location, &target).map(|_| ())
            };
            if let Err(e) = res {
                if is_fatal(&e) {
                    return Err(e);
                }
                warn!(url = %file.location, error = %format!("{:#}", e), "Download failed");
                continue;
            }

            used_paths.insert(target.clone());
            let local_destination = std::path::absolute(&target).unwrap_or(target);
            paths.push(DownloadPath {
                url: file.location,
                local_destination,
            });
        }
        Ok(paths)
    }

    /// Downloads an online folder listing into `dest`, recursing into
    /// entries served with `Entry-Type: Directory`. Returns the local files.
    pub fn download_folder(&self, url: &str, dest: &Path) -> Result<Vec<PathBuf>> {
        info!(url, "Downloading folder...");
        std::fs::create_dir_all(dest)
            .with_context(|| format!("failed to create directory {}", dest.display()))?;

        let base_str = format!("{}/", url.trim_end_matches('/'));
        let base = Url::parse(&base_str).with_context(|| format!("invalid folder URL: {}", url))?;
        let listing = self.api_text::<Value>(Method::GET, &base_str, None, self.order_timeout())?;

        let mut files = Vec::new();
        // The first link of a listing points back to the parent.
        for href in html_hrefs(&listing).into_iter().skip(1) {
            let Ok(entry) = base.join(&href) else {
                continue;
            };
            let entry = entry.as_str().trim_end_matches('/').to_string();
            if !entry.starts_with(base.as_str()) {
                continue;
            }
            let Some(name) = guess_filename_from_url(&entry) else {
                continue;
            };

            let head = self.send_with_headers(Method::HEAD, &entry, HeaderMap::new(), self.query_timeout())?;
            let is_dir = head
                .headers()
                .get("Entry-Type")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("Directory"));

            if is_dir {
                let sub = if dest
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().contains(name.as_str()))
                {
                    dest.to_path_buf()
                } else {
                    dest.join(&name)
                };
                files.extend(self.download_folder(&entry, &sub)?);
            } else {
                let remote = RemoteFile {
                    location: entry,
                    content_length: 0,
                    content_type: None,
                };
                files.push(self.download_file(&remote, &dest.join(&name))?);
            }
        }
        Ok(files)
    }
}
