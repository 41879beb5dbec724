//! Site processor
//!
//! One scrape pass over one profile: walk the catalog pages, diff each
//! page's tiles against the snapshot, apply the cheap availability flips
//! directly, and hand everything else to the detail processor. A run of
//! consecutive pages with no catalog work ends the pass once it reaches
//! the configured target.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::counters::PassCounters;
use crate::domain::product::TileClass;
use crate::domain::site_profile::SiteProfile;
use crate::pipeline::detail_processor::{self, DetailContext, DetailOutcome};
use crate::pipeline::tile_differ;
use crate::pipeline::tile_pipeline::TilePipeline;

/// Run a scrape pass. `target_match` is the consecutive-empty-page budget:
/// 1 for new-inventory sweeps, higher for deep backfills.
pub async fn run_scrape_pass(
    ctx: &DetailContext<'_>,
    profile: &SiteProfile,
    target_match: u32,
    cancel: CancellationToken,
) -> Result<PassCounters> {
    info!(
        "{}: starting scrape pass (targetMatch = {target_match})",
        profile.source_name
    );

    let snapshot = ctx.catalog.load_snapshot(&profile.source_name).await?;
    let mut counters = PassCounters::start(profile.access_config.start_page);
    let mut pipeline = TilePipeline::new(profile, ctx.http, cancel.clone());

    while let Some(tiles) = pipeline.next_page(&mut counters).await {
        let mut needs_detail = Vec::new();
        let mut availability_updates = Vec::new();

        for tile in tiles {
            match tile_differ::classify(&tile, &snapshot) {
                TileClass::Unchanged => counters.unchanged_count += 1,
                TileClass::AvailabilityOnly { available } => {
                    availability_updates.push((tile.url.clone(), available));
                }
                TileClass::NeedsDetail => needs_detail.push(tile),
            }
        }

        for (url, available) in &availability_updates {
            match ctx
                .catalog
                .update_availability(&profile.source_name, url, *available)
                .await
            {
                Ok(()) => counters.availability_update_count += 1,
                Err(e) => warn!("{}: availability update failed for {url}: {e}", profile.source_name),
            }
        }

        info!(
            "{}: page {} -> {} need detail, {} availability updates",
            profile.source_name,
            counters.current_page,
            needs_detail.len(),
            availability_updates.len()
        );

        for tile in &needs_detail {
            if cancel.is_cancelled() {
                counters.halt();
                break;
            }
            match detail_processor::process_tile(ctx, profile, tile).await {
                Ok(DetailOutcome::Inserted) => counters.new_count += 1,
                Ok(DetailOutcome::Updated) => {}
                Ok(DetailOutcome::Unchanged) => counters.unchanged_count += 1,
                Ok(DetailOutcome::RedirectedSold) => counters.availability_update_count += 1,
                Ok(DetailOutcome::Unfetchable | DetailOutcome::Skipped) => {}
                Err(e) => warn!("{}: detail processing failed for {}: {e}", profile.source_name, tile.url),
            }
        }

        if needs_detail.is_empty() && availability_updates.is_empty() {
            let run = counters.record_empty_page();
            if run >= target_match {
                info!(
                    "{}: {run} consecutive empty page(s), ending pass",
                    profile.source_name
                );
                counters.halt();
            }
        } else {
            counters.record_productive_page();
        }
    }

    info!(
        "{}: pass finished. seen={} new={} unchanged={} availability_updates={} pages={}",
        profile.source_name,
        counters.total_seen,
        counters.new_count,
        counters.unchanged_count,
        counters.availability_update_count,
        counters.pages_walked,
    );
    Ok(counters)
}
