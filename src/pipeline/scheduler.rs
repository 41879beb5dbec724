//! Scheduler
//!
//! The outer control loop: wake, run whichever passes are due, sleep until
//! the earliest next due time. Availability passes fan out across sources
//! with a hard concurrency bound and a per-source lock, so one source is
//! never walked by two workers at once; scrape passes run sequentially.
//! Cancellation breaks between sites, never mid-transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::site_profile::SiteProfile;
use crate::enrichment::{Classifier, Embedder};
use crate::infrastructure::catalog::Catalog;
use crate::infrastructure::config::{RunMode, SchedulerConfig};
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};
use crate::pipeline::availability_tracker::{self, AvailabilityDeps};
use crate::pipeline::detail_processor::DetailContext;
use crate::pipeline::image_subsystem::ImageSubsystem;
use crate::pipeline::site_processor;

/// Earliest next due time across the scheduled passes, floored at one
/// second; a full minute when nothing is scheduled at all.
pub fn next_sleep(remaining: &[Duration]) -> Duration {
    match remaining.iter().min() {
        Some(shortest) => (*shortest).max(Duration::from_secs(1)),
        None => Duration::from_secs(60),
    }
}

fn remaining_until(last_run: Option<Instant>, interval: Duration) -> Duration {
    match last_run {
        None => Duration::ZERO,
        Some(at) => interval.saturating_sub(at.elapsed()),
    }
}

pub struct Scheduler {
    catalog: Catalog,
    images: Arc<ImageSubsystem>,
    classifier: Option<Arc<dyn Classifier>>,
    embedder: Option<Arc<dyn Embedder>>,
    http_config: HttpClientConfig,
    config: SchedulerConfig,
    profiles: Vec<SiteProfile>,
    cancel: CancellationToken,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Catalog,
        images: Arc<ImageSubsystem>,
        classifier: Option<Arc<dyn Classifier>>,
        embedder: Option<Arc<dyn Embedder>>,
        http_config: HttpClientConfig,
        config: SchedulerConfig,
        profiles: Vec<SiteProfile>,
        cancel: CancellationToken,
    ) -> Self {
        Self { catalog, images, classifier, embedder, http_config, config, profiles, cancel }
    }

    /// Profiles eligible for absence-based reconciliation. Sold-archive
    /// sites are excluded by definition (scenario S6) and go through the
    /// scrape path only.
    fn availability_profiles(&self) -> Vec<SiteProfile> {
        self.profiles.iter().filter(|p| !p.is_sold_archive).cloned().collect()
    }

    pub async fn run(&self) -> Result<()> {
        if self.config.run_mode == RunMode::DataIntegrity {
            return self.run_integrity_pass().await;
        }

        let mut last_avail_run: Option<Instant> = None;
        let mut last_scrape_run: Option<Instant> = None;

        loop {
            if self.cancel.is_cancelled() {
                info!("Scheduler cancelled; shutting down");
                return Ok(());
            }

            if self.config.run_mode.includes_availability()
                && remaining_until(last_avail_run, self.config.availability_interval()).is_zero()
            {
                info!("Running availability check for all selected sites");
                self.run_availability_fanout().await;
                last_avail_run = Some(Instant::now());
            }

            if self.cancel.is_cancelled() {
                return Ok(());
            }

            if self.config.run_mode.includes_scrape()
                && remaining_until(last_scrape_run, self.config.scrape_interval()).is_zero()
            {
                self.run_scrape_round().await;
                last_scrape_run = Some(Instant::now());
            }

            let mut upcoming = Vec::new();
            if self.config.run_mode.includes_availability() {
                upcoming.push(remaining_until(last_avail_run, self.config.availability_interval()));
            }
            if self.config.run_mode.includes_scrape() {
                upcoming.push(remaining_until(last_scrape_run, self.config.scrape_interval()));
            }
            let sleep = next_sleep(&upcoming);
            info!(
                "Sleeping {}s; next check at {}",
                sleep.as_secs(),
                Utc::now() + chrono::Duration::seconds(sleep.as_secs() as i64)
            );
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {},
                _ = self.cancel.cancelled() => {
                    info!("Scheduler cancelled during sleep; shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Group profiles by source and walk up to `max_concurrent_sites`
    /// sources at once, one worker per source.
    async fn run_availability_fanout(&self) {
        let mut groups: HashMap<String, Vec<SiteProfile>> = HashMap::new();
        for profile in self.availability_profiles() {
            groups.entry(profile.source_name.clone()).or_default().push(profile);
        }
        if groups.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sites.max(1)));
        let source_locks: HashMap<String, Arc<Mutex<()>>> = groups
            .keys()
            .map(|name| (name.clone(), Arc::new(Mutex::new(()))))
            .collect();

        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();
        for (source_name, group) in groups {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let lock = source_locks[&source_name].clone();
            let catalog = self.catalog.clone();
            let http_config = self.http_config.clone();
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let _guard = lock.lock().await;
                let result = async {
                    let http = HttpClient::for_profile(&group[0], http_config)?;
                    let deps = AvailabilityDeps { http: &http, catalog: &catalog };
                    let refs: Vec<&SiteProfile> = group.iter().collect();
                    availability_tracker::run_availability_pass(&deps, &refs, cancel).await
                }
                .await;
                (source_name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, Ok(()))) => info!("Finished availability pass for {source}"),
                Ok((source, Err(e))) => error!("Availability pass failed for {source}: {e}"),
                Err(e) => error!("Availability worker panicked: {e}"),
            }
        }
    }

    /// Scrape every selected profile in order, breaking cleanly between
    /// sites on cancellation.
    async fn run_scrape_round(&self) {
        for profile in &self.profiles {
            if self.cancel.is_cancelled() {
                info!("Scrape round cancelled between sites");
                return;
            }
            info!("Switching to site: {} [{}]", profile.source_name, profile.json_desc);
            let http = match HttpClient::for_profile(profile, self.http_config.clone()) {
                Ok(http) => http,
                Err(e) => {
                    error!("{}: cannot build HTTP client: {e}", profile.source_name);
                    continue;
                }
            };
            let ctx = DetailContext {
                http: &http,
                catalog: &self.catalog,
                images: &self.images,
                classifier: self.classifier.as_deref(),
                embedder: self.embedder.as_deref(),
                sleep_range: (self.config.detail_sleep_min, self.config.detail_sleep_max),
                cancel: &self.cancel,
            };
            match site_processor::run_scrape_pass(
                &ctx,
                profile,
                self.config.target_match,
                self.cancel.clone(),
            )
            .await
            {
                Ok(_) => info!("Successfully processed site: {}", profile.source_name),
                Err(e) => error!("Error processing site {}: {e}", profile.source_name),
            }
        }
    }

    /// One-shot integrity pass: liveness, then the two invariant repairs
    /// the catalog can express directly.
    async fn run_integrity_pass(&self) -> Result<()> {
        self.catalog.ping().await?;
        let repaired = self.catalog.repair_missing_date_sold().await?;
        if repaired > 0 {
            warn!("Integrity: stamped date_sold on {repaired} sold rows");
        }
        let flagged = self.catalog.flag_image_count_mismatch().await?;
        if flagged > 0 {
            warn!("Integrity: flagged {flagged} rows with mismatched image lists");
        }
        info!("Data integrity pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_sleep_floors_at_one_second() {
        assert_eq!(next_sleep(&[Duration::ZERO]), Duration::from_secs(1));
        assert_eq!(next_sleep(&[Duration::from_millis(200)]), Duration::from_secs(1));
    }

    #[test]
    fn next_sleep_picks_earliest_due_pass() {
        let sleep = next_sleep(&[Duration::from_secs(900), Duration::from_secs(60)]);
        assert_eq!(sleep, Duration::from_secs(60));
    }

    #[test]
    fn next_sleep_defaults_when_nothing_scheduled() {
        assert_eq!(next_sleep(&[]), Duration::from_secs(60));
    }

    #[test]
    fn remaining_until_is_zero_when_never_run() {
        assert_eq!(remaining_until(None, Duration::from_secs(900)), Duration::ZERO);
    }
}
