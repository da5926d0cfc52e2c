//! `cronstack list`: show jobs and when they run next.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;

use cronstack_config::JobConfig;
use cronstack_supervisor::parse_schedule;

use crate::cli::OutputFormat;
use crate::manifest::Manifest;

/// Print every job in the manifest with its next occurrence.
pub(crate) fn list(manifest: &Manifest, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = &manifest.config;
    let tz = config.supervisor.tz()?;
    let now = Utc::now();

    if config.jobs.is_empty() {
        println!("No jobs defined in {}.", manifest.path.display());
        return Ok(());
    }

    match format {
        OutputFormat::Json => {
            let jobs: Vec<_> = config
                .jobs
                .iter()
                .map(|job| {
                    json!({
                        "name": job.name,
                        "schedule": job.schedule,
                        "next_occurrence": next_occurrence(job, tz, now).map(|t| t.to_rfc3339()),
                        "prevent_overlapping": job.prevent_overlapping,
                        "timeout_ms": job.timeout_ms,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            println!("{:<24} {:<20} {:<27} {:<8} {}", "NAME", "SCHEDULE", "NEXT", "OVERLAP", "TIMEOUT");
            println!("{}", "-".repeat(90));
            for job in &config.jobs {
                let next = match next_occurrence(job, tz, now) {
                    Some(next) => next.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
                    None => "invalid schedule".to_string(),
                };
                let overlap = if job.prevent_overlapping { "no" } else { "yes" };
                let timeout = if job.timeout_ms == 0 {
                    "-".to_string()
                } else {
                    format!("{}ms", job.timeout_ms)
                };
                println!("{:<24} {:<20} {:<27} {:<8} {}", job.name, job.schedule, next, overlap, timeout);
            }
        }
    }

    Ok(())
}

fn next_occurrence(job: &JobConfig, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Tz>> {
    let schedule = parse_schedule(&job.schedule).ok()?;
    schedule.after(&now.with_timezone(&tz)).next()
}
