//! Availability tracker
//!
//! Per-source reconciliation of what is live on the site with what the
//! catalog believes. Tile mode walks the listing pages, marks explicit
//! sold signals immediately, and then sweeps catalog rows that the walk
//! never saw. The sweep is guarded: a demonstrably incomplete scrape must
//! never empty a site's inventory. Last-seen mode stamps timestamps and
//! expires the stale rows instead, for sites that delete sold listings.
//!
//! Sold-archive profiles never reach this module; the scheduler routes
//! them to the scrape path, because absence from a sold archive carries no
//! information.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::counters::PassCounters;
use crate::domain::site_profile::{BulkAvailabilityMode, SiteProfile};
use crate::infrastructure::catalog::Catalog;
use crate::infrastructure::http_client::HttpClient;
use crate::pipeline::tile_pipeline::TilePipeline;

/// Minimum pages a walk must cover before an absence sweep is trusted.
pub const MIN_PAGES_FOR_SWEEP: u32 = 5;
/// Below this seen/known ratio the scrape is considered failed.
pub const MIN_SCRAPE_SUCCESS_RATE: f64 = 0.10;

/// Verdict of the pre-sweep safety check.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepGate {
    Proceed,
    ProceedCautiously { pages_walked: u32 },
    Refuse { reason: String },
}

/// Pure gate decision so the thresholds stay testable without a database.
pub fn evaluate_sweep_gate(pages_walked: u32, total_seen: usize, db_total: i64) -> SweepGate {
    if pages_walked < MIN_PAGES_FOR_SWEEP {
        return SweepGate::Refuse {
            reason: format!("only {pages_walked} pages walked"),
        };
    }
    if total_seen == 0 {
        return SweepGate::Refuse {
            reason: "0 products seen".to_string(),
        };
    }
    let rate = total_seen as f64 / db_total.max(1) as f64;
    if rate < MIN_SCRAPE_SUCCESS_RATE {
        return SweepGate::Refuse {
            reason: format!("scrape success rate {:.1}% below threshold", rate * 100.0),
        };
    }
    if pages_walked < 10 {
        SweepGate::ProceedCautiously { pages_walked }
    } else {
        SweepGate::Proceed
    }
}

pub struct AvailabilityDeps<'a> {
    pub http: &'a HttpClient,
    pub catalog: &'a Catalog,
}

/// Run the availability pass for one source cohort (all profiles sharing a
/// `source_name`).
pub async fn run_availability_pass(
    deps: &AvailabilityDeps<'_>,
    profiles: &[&SiteProfile],
    cancel: CancellationToken,
) -> Result<()> {
    let Some(first) = profiles.first() else {
        warn!("Availability pass invoked with no profiles");
        return Ok(());
    };
    let source_name = first.source_name.clone();

    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut already_marked_sold: HashSet<String> = HashSet::new();
    let mut pages_walked = 0u32;
    let mut total_seen = 0usize;
    let mut sold_seen = 0usize;

    for profile in profiles {
        if profile.is_sold_archive {
            warn!(
                "{source_name}: sold-archive profile routed to availability; skipping it"
            );
            continue;
        }
        if cancel.is_cancelled() {
            info!("{source_name}: availability pass cancelled");
            return Ok(());
        }
        match profile.bulk_availability_mode {
            BulkAvailabilityMode::Tile => {
                let walk = walk_tile_mode(deps, profile, cancel.clone()).await?;
                pages_walked += walk.pages_walked;
                total_seen += walk.total_seen;
                sold_seen += walk.sold_seen;
                seen_urls.extend(walk.seen_urls);
                already_marked_sold.extend(walk.marked_sold);
            }
            BulkAvailabilityMode::LastSeen => {
                walk_last_seen_mode(deps, profile, cancel.clone()).await?;
            }
        }
    }

    // The last-seen profiles reconcile themselves through their timestamps;
    // the absence sweep below only concerns tile-mode inventory.
    if profiles
        .iter()
        .all(|p| p.bulk_availability_mode == BulkAvailabilityMode::LastSeen || p.is_sold_archive)
    {
        return Ok(());
    }

    let (db_available, db_sold) = deps.catalog.availability_counts(&source_name).await?;
    let db_total = db_available + db_sold;

    match evaluate_sweep_gate(pages_walked, total_seen, db_total) {
        SweepGate::Refuse { reason } => {
            error!(
                "{source_name}: CRITICAL: {reason}; skipping absence sweep to protect the catalog"
            );
            return Ok(());
        }
        SweepGate::ProceedCautiously { pages_walked } => {
            warn!("{source_name}: only {pages_walked} pages walked; proceeding cautiously");
        }
        SweepGate::Proceed => {}
    }

    let available_urls = deps.catalog.available_urls(&source_name).await?;
    let unseen: Vec<String> = available_urls
        .into_iter()
        .filter(|url| !seen_urls.contains(url) && !already_marked_sold.contains(url))
        .collect();

    let newly_marked = if unseen.is_empty() {
        info!("{source_name}: no unseen products to mark sold");
        0
    } else {
        info!("{source_name}: marking {} unseen URLs sold", unseen.len());
        deps.catalog.mark_urls_sold(&source_name, &unseen).await?
    };

    log_summary(
        &source_name,
        total_seen,
        sold_seen,
        db_available,
        db_sold,
        newly_marked,
        &unseen,
    );
    Ok(())
}

struct TileWalk {
    seen_urls: HashSet<String>,
    marked_sold: HashSet<String>,
    pages_walked: u32,
    total_seen: usize,
    sold_seen: usize,
}

/// Walk one profile's pages, recording every URL and pushing explicit sold
/// signals to the catalog as they appear.
async fn walk_tile_mode(
    deps: &AvailabilityDeps<'_>,
    profile: &SiteProfile,
    cancel: CancellationToken,
) -> Result<TileWalk> {
    info!("{} [{}]: availability walk (tile mode)", profile.source_name, profile.json_desc);

    let mut counters = PassCounters::start(profile.access_config.start_page);
    let mut pipeline = TilePipeline::new(profile, deps.http, cancel);
    let mut walk = TileWalk {
        seen_urls: HashSet::new(),
        marked_sold: HashSet::new(),
        pages_walked: 0,
        total_seen: 0,
        sold_seen: 0,
    };

    while let Some(tiles) = pipeline.next_page(&mut counters).await {
        let sold_urls: Vec<String> = tiles
            .iter()
            .filter(|tile| !tile.available)
            .map(|tile| tile.url.clone())
            .collect();
        if !sold_urls.is_empty() {
            info!(
                "{}: {} tiles marked sold on page",
                profile.source_name,
                sold_urls.len()
            );
            deps.catalog.mark_urls_sold(&profile.source_name, &sold_urls).await?;
            walk.sold_seen += sold_urls.len();
            walk.marked_sold.extend(sold_urls);
        }
        walk.total_seen += tiles.len();
        walk.seen_urls.extend(tiles.into_iter().map(|tile| tile.url));
    }

    walk.pages_walked = counters.pages_walked;
    Ok(walk)
}

/// Stamp `last_seen` for every URL found, then expire whatever the walk
/// never touched.
async fn walk_last_seen_mode(
    deps: &AvailabilityDeps<'_>,
    profile: &SiteProfile,
    cancel: CancellationToken,
) -> Result<()> {
    info!("{} [{}]: availability walk (last-seen mode)", profile.source_name, profile.json_desc);
    let pass_started = Utc::now();

    let mut counters = PassCounters::start(profile.access_config.start_page);
    let mut pipeline = TilePipeline::new(profile, deps.http, cancel);

    while let Some(tiles) = pipeline.next_page(&mut counters).await {
        let urls: Vec<String> = tiles.into_iter().map(|tile| tile.url).collect();
        deps.catalog
            .touch_last_seen(&profile.source_name, &urls, Utc::now())
            .await?;
    }

    let expired = deps
        .catalog
        .expire_stale_last_seen(&profile.source_name, pass_started)
        .await?;
    info!(
        "{}: expired {expired} rows not seen since {pass_started}",
        profile.source_name
    );
    Ok(())
}

fn log_summary(
    source_name: &str,
    total_seen: usize,
    sold_seen: usize,
    db_available: i64,
    db_sold: i64,
    newly_marked: u64,
    unseen: &[String],
) {
    info!("=============== AVAILABILITY SUMMARY: {source_name} ===============");
    info!("- Products seen this run        : {total_seen}");
    info!("  - Available                   : {}", total_seen - sold_seen);
    info!("  - Sold                        : {sold_seen}");
    info!("- Products in DB for this site  : {}", db_available + db_sold);
    info!("  - Available in DB             : {db_available}");
    info!("  - Sold in DB                  : {db_sold}");
    info!("- Newly marked sold this run    : {newly_marked}");

    let expected = db_available - (total_seen as i64 - sold_seen as i64);
    let discrepancy = newly_marked as i64 - expected;
    if discrepancy != 0 {
        warn!("{source_name}: availability discrepancy detected");
        warn!("Expected to mark {expected} sold, actually marked {newly_marked} ({discrepancy:+})");
        for url in unseen {
            warn!("  unseen but marked sold: {url}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Property 5 / scenario S4: an incomplete scrape performs zero
    // absence-based updates.
    #[test]
    fn gate_refuses_short_walks() {
        assert!(matches!(
            evaluate_sweep_gate(4, 500, 1000),
            SweepGate::Refuse { .. }
        ));
    }

    #[test]
    fn gate_refuses_empty_walks() {
        assert!(matches!(
            evaluate_sweep_gate(20, 0, 1000),
            SweepGate::Refuse { .. }
        ));
    }

    #[test]
    fn gate_refuses_low_success_rate() {
        // S4: 40 seen of 1000 known = 4%.
        let gate = evaluate_sweep_gate(20, 40, 1000);
        assert!(matches!(gate, SweepGate::Refuse { .. }));
    }

    #[test]
    fn gate_is_cautious_under_ten_pages() {
        assert_eq!(
            evaluate_sweep_gate(7, 500, 1000),
            SweepGate::ProceedCautiously { pages_walked: 7 }
        );
    }

    #[test]
    fn gate_proceeds_on_healthy_walks() {
        assert_eq!(evaluate_sweep_gate(25, 900, 1000), SweepGate::Proceed);
    }

    #[test]
    fn gate_handles_empty_catalog() {
        // A brand-new site has nothing to sweep but the gate math must not
        // divide by zero.
        assert_eq!(evaluate_sweep_gate(25, 30, 0), SweepGate::Proceed);
    }
}
