//! Asset pipeline: make a rendered page self-contained.
//!
//! Every `link[href]`, `script[src]` and `img[src]` that resolves to an
//! http(s) URL is downloaded, stored under `<storage_path>/_assets/` with a
//! content-addressed name, and the attribute is rewritten to the relative
//! path. An asset that cannot be archived keeps its original value; those
//! failures are counted, logged, and never fail the job.

use anyhow::{Context, Result};
use futures::future::join_all;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::models::{ASSET_DIR, THUMBNAIL};
use crate::kernel::errors::StorageError;
use crate::kernel::BaseObjectStore;

/// Elements and the attribute that carries their resource reference
const REFERENCE_ATTRIBUTES: [(&str, &str); 3] = [
    ("link[href]", "href"),
    ("script[src]", "src"),
    ("img[src]", "src"),
];

const REJECTED_PREFIXES: [&str; 6] = ["data:", "javascript:", "#", "mailto:", "tel:", "blob:"];

/// References this long are almost always inlined payloads
const MAX_REFERENCE_LEN: usize = 2048;

const FALLBACK_EXTENSION: &str = "asset";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Outcome counts for one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetReport {
    /// Distinct absolute URLs found in the document
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct AssetPipeline {
    store: Arc<dyn BaseObjectStore>,
    concurrency: usize,
}

impl AssetPipeline {
    pub fn new(store: Arc<dyn BaseObjectStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Archive the assets referenced by `html` and return the rewritten document.
    ///
    /// Only a malformed `page_url` or a rewriter failure is an error; asset
    /// failures are reported in the `AssetReport`.
    pub async fn process_html(
        &self,
        html: &str,
        storage_path: &str,
        page_url: &str,
    ) -> Result<(String, AssetReport)> {
        let base = Url::parse(page_url)
            .with_context(|| format!("Invalid page URL {}", page_url))?;

        let candidates = discover_assets(html, &base);
        let mut report = AssetReport {
            discovered: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            return Ok((html.to_string(), report));
        }

        let archived = self.archive_all(candidates, storage_path).await;

        report.succeeded = archived.len();
        report.failed = report.discovered - report.succeeded;

        let rewritten = rewrite_references(html, &base, &archived)?;

        info!(
            storage_path = %storage_path,
            discovered = report.discovered,
            succeeded = report.succeeded,
            failed = report.failed,
            "assets processed"
        );

        Ok((rewritten, report))
    }

    /// Copy the rendering service's screenshot into the snapshot.
    ///
    /// Returns whether the thumbnail was stored; failures are only logged.
    pub async fn store_screenshot(&self, screenshot_url: &str, storage_path: &str) -> bool {
        let key = format!("{}/{}", storage_path, THUMBNAIL);

        let result = async {
            let body = self.store.download(screenshot_url).await?;
            self.store.upload(&key, body, "image/png").await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(key = %key, "thumbnail stored");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to store thumbnail");
                false
            }
        }
    }

    /// Fetch and store every URL with at most `concurrency` in flight.
    ///
    /// Waits for all of them to settle. Returns absolute URL → relative path
    /// for the ones that were stored.
    async fn archive_all(&self, urls: Vec<String>, storage_path: &str) -> HashMap<String, String> {
        let permits = Arc::new(Semaphore::new(self.concurrency));

        let tasks = urls.into_iter().map(|url| {
            let permits = Arc::clone(&permits);
            async move {
                // The semaphore is never closed, so acquire only waits
                let _permit = permits.acquire().await.ok();
                let outcome = self.archive_asset(&url, storage_path).await;
                (url, outcome)
            }
        });

        join_all(tasks)
            .await
            .into_iter()
            .filter_map(|(url, outcome)| match outcome {
                Ok(local_path) => Some((url, local_path)),
                Err(e) if e.is_not_found() => {
                    debug!(url = %url, "asset not found (404), keeping original URL");
                    None
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "failed to archive asset");
                    None
                }
            })
            .collect()
    }

    async fn archive_asset(&self, url: &str, storage_path: &str) -> Result<String, StorageError> {
        let name = asset_file_name(url);
        let body = self.store.download(url).await?;

        self.store
            .upload(&asset_key(storage_path, &name), body, content_type_for(&name))
            .await?;

        Ok(format!("{}/{}", ASSET_DIR, name))
    }
}

/// Whether an attribute value points at something we could fetch.
pub fn is_fetchable_reference(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || value.len() >= MAX_REFERENCE_LEN {
        return false;
    }

    let lower = value.to_ascii_lowercase();
    !REJECTED_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Resolve an attribute value against the page URL.
///
/// `None` for rejected values, unresolvable values, and non-http(s) results.
pub fn resolve_reference(value: &str, base: &Url) -> Option<Url> {
    if !is_fetchable_reference(value) {
        return None;
    }

    let resolved = base.join(value.trim()).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Content-addressed file name: md5 of the absolute URL plus its extension.
///
/// The same URL always maps to the same name.
pub fn asset_file_name(url: &str) -> String {
    let digest = md5::compute(url.as_bytes());
    format!("{:x}.{}", digest, url_extension(url))
}

pub fn asset_key(storage_path: &str, name: &str) -> String {
    format!("{}/{}/{}", storage_path, ASSET_DIR, name)
}

pub fn content_type_for(name: &str) -> &'static str {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

fn url_extension(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Distinct absolute URLs referenced by the document, in document order.
fn discover_assets(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for (selector, attribute) in REFERENCE_ATTRIBUTES {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };

        for element in document.select(&selector) {
            let Some(value) = element.value().attr(attribute) else {
                continue;
            };
            if let Some(url) = resolve_reference(value, base) {
                let url = url.to_string();
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
    }

    urls
}

/// Point every archived reference at its local copy, leaving the rest untouched.
fn rewrite_references(
    html: &str,
    base: &Url,
    archived: &HashMap<String, String>,
) -> Result<String> {
    if archived.is_empty() {
        return Ok(html.to_string());
    }

    let local_path = |value: &str| -> Option<&String> {
        let lookup = |candidate: &str| {
            resolve_reference(candidate, base).and_then(|url| archived.get(url.as_str()))
        };
        // The rewriter sees attribute text before entity decoding
        lookup(value).or_else(|| lookup(&value.replace("&amp;", "&")))
    };
    let local_path = &local_path;

    let handlers = REFERENCE_ATTRIBUTES
        .iter()
        .map(|&(selector, attribute)| {
            element!(selector, move |el| {
                if let Some(value) = el.get_attribute(attribute) {
                    if let Some(path) = local_path(&value) {
                        el.set_attribute(attribute, path)?;
                    }
                }
                Ok(())
            })
        })
        .collect();

    // Bound to a local so the settings (and the closures borrowing
    // `local_path`) are dropped before `local_path` is
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::new()
        },
    )
    .context("Failed to rewrite asset references");

    rewritten
}
