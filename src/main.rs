//! Milivault entry point
//!
//! Menu-driven bootstrap: pick an environment, pick the inventory-check
//! kind, pick sites, then hand everything to the scheduler until the user
//! interrupts. Exit code 0 on clean shutdown, non-zero on unrecoverable
//! configuration errors.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use milivault::domain::site_profile::SiteProfile;
use milivault::infrastructure::catalog::Catalog;
use milivault::infrastructure::config::{self, AppConfig, DbCredentials, RunMode};
use milivault::infrastructure::logging;
use milivault::infrastructure::object_store::ObjectStore;
use milivault::pipeline::bad_images::BadImages;
use milivault::pipeline::image_subsystem::ImageSubsystem;
use milivault::pipeline::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init_logging(&logging::default_log_directory(), "info")?;

    let mut app_config = choose_environment()?;
    choose_check_kind(&mut app_config)?;

    let profiles = config::load_profiles(&app_config.profiles_dir)
        .context("Failed to load site profiles")?;
    if profiles.is_empty() {
        bail!("No site profiles found in {}", app_config.profiles_dir.display());
    }

    let selected = choose_sites(&profiles)?;
    if selected.is_empty() {
        bail!("No sites selected");
    }
    info!(
        "Selected sites: {:?}",
        selected.iter().map(|p| p.source_name.as_str()).collect::<Vec<_>>()
    );

    let db_credentials = DbCredentials::load(&app_config.db_credentials_file)?;
    let catalog = Catalog::connect(&db_credentials).await?;
    catalog.ping().await.context("Catalog liveness check failed")?;

    let store = ObjectStore::from_credentials_file(&app_config.s3_credentials_file)?;
    let bad_images = Arc::new(BadImages::load(app_config.bad_image_file.clone()));
    let images = Arc::new(ImageSubsystem::new(store, catalog.clone(), bad_images)?);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; finishing the current site then stopping");
            ctrl_c_cancel.cancel();
        }
    });

    let scheduler = Scheduler::new(
        catalog,
        images,
        None,
        None,
        app_config.http.clone(),
        app_config.scheduler.clone(),
        selected,
        cancel,
    );

    if let Err(e) = scheduler.run().await {
        error!("Scheduler terminated with error: {e}");
        return Err(e);
    }
    info!("Clean shutdown");
    Ok(())
}

fn prompt(question: &str) -> Result<String> {
    print!("{question}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn choose_environment() -> Result<AppConfig> {
    println!();
    println!("Choose your settings:");
    println!("1. AWS settings");
    println!("2. Local settings");
    println!("3. Custom settings");
    loop {
        let choice = prompt("Enter the number corresponding to your choice (1-3): ")?;
        match choice.as_str() {
            "1" => return Ok(AppConfig::aws_default()),
            "2" => return Ok(AppConfig::local_default()),
            "3" => {
                let db = prompt("Path to the DB credentials file: ")?;
                let s3 = prompt("Path to the S3 credentials file: ")?;
                let dir = prompt("Path to the site profile folder: ")?;
                return Ok(AppConfig::custom(
                    PathBuf::from(db),
                    PathBuf::from(s3),
                    PathBuf::from(dir),
                ));
            }
            _ => println!("Invalid choice. Please enter 1, 2 or 3."),
        }
    }
}

fn choose_check_kind(app_config: &mut AppConfig) -> Result<()> {
    println!();
    println!("Choose the type of inventory check:");
    println!("1. New inventory check (1 page tolerance, 15 minute cadence)");
    println!("2. Availability check");
    println!("3. Custom check");
    loop {
        let choice = prompt("Enter your choice (1/2/3): ")?;
        match choice.as_str() {
            "1" => {
                app_config.scheduler.run_mode = RunMode::Scrape;
                app_config.scheduler.target_match = 1;
                app_config.scheduler.scrape_sleeptime = 15 * 60;
                return Ok(());
            }
            "2" => {
                app_config.scheduler.run_mode = RunMode::Availability;
                return Ok(());
            }
            "3" => {
                let pages = prompt("Consecutive empty pages before stopping: ")?;
                let target_match: u32 = pages.parse().context("Not a number")?;
                let sleep = prompt("Seconds between scrape passes: ")?;
                let sleeptime: u64 = sleep.parse().context("Not a number")?;
                app_config.scheduler.run_mode = RunMode::Both;
                app_config.scheduler.target_match = target_match.max(1);
                app_config.scheduler.scrape_sleeptime = sleeptime;
                return Ok(());
            }
            _ => println!("Invalid choice. Please enter 1, 2 or 3."),
        }
    }
}

fn choose_sites(profiles: &[SiteProfile]) -> Result<Vec<SiteProfile>> {
    let mut working: Vec<&SiteProfile> = profiles.iter().filter(|p| p.is_working).collect();
    let broken: Vec<&SiteProfile> = profiles.iter().filter(|p| !p.is_working).collect();

    println!();
    println!("WORKING SITES");
    for (i, profile) in working.iter().enumerate() {
        print_site_line(i + 1, profile);
    }
    println!();
    println!("NOT WORKING SITES");
    for (i, profile) in broken.iter().enumerate() {
        print_site_line(working.len() + i + 1, profile);
    }
    working.extend(broken);

    loop {
        let choice = prompt("\nSelect sites to scrape (e.g., '1,3-5,7'): ")?;
        match parse_site_selection(&choice, working.len()) {
            Ok(indices) => {
                return Ok(indices.into_iter().map(|i| working[i].clone()).collect());
            }
            Err(e) => println!("Invalid selection: {e}. Please try again."),
        }
    }
}

fn print_site_line(index: usize, profile: &SiteProfile) {
    let note = profile.notes.trim();
    if note.is_empty() {
        println!("{index:>3}. {}", profile.json_desc);
    } else {
        println!("{index:>3}. {}\n     > {note}", profile.json_desc);
    }
}

/// Parse a `1,3-5,7` style selection into zero-based indices, sorted.
fn parse_site_selection(input: &str, count: usize) -> Result<Vec<usize>> {
    let mut indices = std::collections::BTreeSet::new();
    if input.trim().is_empty() {
        bail!("empty selection");
    }
    for part in input.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse().context("bad range start")?;
            let end: usize = end.trim().parse().context("bad range end")?;
            if start == 0 || start > end {
                bail!("invalid range: {part}");
            }
            for i in start..=end {
                indices.insert(i - 1);
            }
        } else {
            let index: usize = part.parse().context("bad index")?;
            if index == 0 {
                bail!("indices start at 1");
            }
            indices.insert(index - 1);
        }
    }
    if indices.iter().any(|&i| i >= count) {
        bail!("one or more indices are out of range");
    }
    Ok(indices.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_indices_and_ranges() {
        assert_eq!(parse_site_selection("1,3-5,7", 10).unwrap(), vec![0, 2, 3, 4, 6]);
        assert_eq!(parse_site_selection(" 2 ", 3).unwrap(), vec![1]);
    }

    #[test]
    fn rejects_bad_selections() {
        assert!(parse_site_selection("", 5).is_err());
        assert!(parse_site_selection("0", 5).is_err());
        assert!(parse_site_selection("5-3", 5).is_err());
        assert!(parse_site_selection("6", 5).is_err());
        assert!(parse_site_selection("a,b", 5).is_err());
    }

    #[test]
    fn deduplicates_overlapping_ranges() {
        assert_eq!(parse_site_selection("1-3,2-4", 5).unwrap(), vec![0, 1, 2, 3]);
    }
}
