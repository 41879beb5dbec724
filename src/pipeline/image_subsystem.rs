//! Image acquisition subsystem
//!
//! Per-product fetch, JPEG normalization, and upload of gallery imagery,
//! bounded to a per-site worker count. Object keys are pure functions of
//! (site, product id, index), so a re-run HEAD-checks and reuses instead of
//! re-uploading. Results are sorted by input index before persisting so the
//! stored list reflects gallery order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use reqwest::header::USER_AGENT;
use tracing::{error, info, warn};

use crate::infrastructure::catalog::Catalog;
use crate::infrastructure::object_store::{self, ObjectStore};
use crate::pipeline::bad_images::BadImages;

/// Browser user agents rotated per image fetch. Image CDNs throttle the
/// crawler UA far more aggressively than product pages do.
const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Firefox/117.0",
];

#[derive(Debug, Default)]
pub struct ImageReport {
    pub uploaded: Vec<String>,
    pub thumbnail: Option<String>,
    pub skipped_known_bad: bool,
}

pub struct ImageSubsystem {
    store: ObjectStore,
    catalog: Catalog,
    bad_images: Arc<BadImages>,
    http: reqwest::Client,
}

impl ImageSubsystem {
    pub fn new(store: ObjectStore, catalog: Catalog, bad_images: Arc<BadImages>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .build()
            .context("Failed to create image HTTP client")?;
        Ok(Self { store, catalog, bad_images, http })
    }

    /// Run the full per-product flow: bad-image consult, bounded-parallel
    /// upload, row update, thumbnail.
    pub async fn process_product(
        &self,
        product_id: i64,
        site: &str,
        product_url: &str,
        image_urls: &[String],
        workers: usize,
    ) -> Result<ImageReport> {
        if image_urls.is_empty() {
            return Ok(ImageReport::default());
        }

        if self.bad_images.contains(&image_urls[0]) {
            warn!("Known-bad first image for {product_url}; flagging for review");
            self.catalog.mark_requires_attention(site, product_url).await?;
            return Ok(ImageReport { skipped_known_bad: true, ..Default::default() });
        }

        let started = std::time::Instant::now();
        let mut results: Vec<(usize, Option<String>)> = futures::stream::iter(
            image_urls
                .iter()
                .enumerate()
                .map(|(i, url)| self.upload_one(site, product_id, i + 1, url)),
        )
        .buffer_unordered(workers.max(1))
        .collect()
        .await;
        results.sort_by_key(|(index, _)| *index);

        let uploaded: Vec<String> =
            results.iter().filter_map(|(_, url)| url.clone()).collect();
        info!(
            "Uploaded {}/{} images for product {product_id} in {:.2}s",
            uploaded.len(),
            image_urls.len(),
            started.elapsed().as_secs_f64()
        );

        if uploaded.is_empty() {
            error!("All image uploads failed for product {product_id}");
            self.catalog.mark_image_download_failed(product_id).await?;
            self.bad_images.flag(&image_urls[0])?;
            return Ok(ImageReport::default());
        }

        // Persist only matched pairs so the two lists always line up 1:1.
        let originals: Vec<String> = results
            .iter()
            .zip(image_urls.iter())
            .filter(|((_, uploaded_url), _)| uploaded_url.is_some())
            .map(|(_, original)| original.clone())
            .collect();
        self.catalog.update_image_urls(product_id, &originals, &uploaded).await?;

        let thumbnail = match self.generate_thumbnail(site, product_id, &uploaded[0]).await {
            Ok(url) => {
                self.catalog.set_thumbnail(product_id, &url).await?;
                Some(url)
            }
            Err(e) => {
                warn!("Thumbnail generation failed for product {product_id}: {e}");
                None
            }
        };

        Ok(ImageReport { uploaded, thumbnail, skipped_known_bad: false })
    }

    /// Fetch, transcode, and upload one image; reuse the object when the
    /// key already exists.
    async fn upload_one(
        &self,
        site: &str,
        product_id: i64,
        index: usize,
        image_url: &str,
    ) -> (usize, Option<String>) {
        let key = ObjectStore::object_key(site, product_id, index);
        match self.store.object_exists(&key).await {
            Ok(true) => return (index, Some(self.store.object_url(&key))),
            Ok(false) => {}
            Err(e) => {
                error!("HEAD check failed for {key}: {e}");
                return (index, None);
            }
        }

        let result: Result<String> = async {
            let bytes = self.fetch_image_bytes(image_url).await?;
            let jpeg = object_store::encode_product_jpeg(&bytes)?;
            self.store.upload_jpeg(&key, jpeg).await?;
            Ok(self.store.object_url(&key))
        }
        .await;

        match result {
            Ok(url) => (index, Some(url)),
            Err(e) => {
                error!("Error uploading image {image_url}: {e}");
                (index, None)
            }
        }
    }

    async fn fetch_image_bytes(&self, url: &str) -> Result<Vec<u8>> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
            match self.try_fetch_image_bytes(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("Image fetch attempt {}/{MAX_ATTEMPTS} failed for {url}: {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("image fetch failed: {url}")))
    }

    async fn try_fetch_image_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let agent = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, agent)
            .send()
            .await
            .with_context(|| format!("Failed to fetch image {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("Image fetch returned {} for {url}", response.status());
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn generate_thumbnail(
        &self,
        site: &str,
        product_id: i64,
        first_object_url: &str,
    ) -> Result<String> {
        let source = self.store.https_url_from_object_url(first_object_url);
        let bytes = self.fetch_image_bytes(&source).await?;
        let thumb = object_store::encode_thumbnail_jpeg(&bytes)?;
        let key = ObjectStore::thumbnail_key(site, product_id);
        self.store.upload_jpeg(&key, thumb).await?;
        Ok(self.store.https_url(&key))
    }
}
