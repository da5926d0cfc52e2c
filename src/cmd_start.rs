//! `cronstack start`: run the supervisor in the foreground.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use cronstack_config::{Config, ConfigLoader, ConfigValidator};
use cronstack_daemon::{DaemonError, RunExit, Runner, SignalHandler};
use cronstack_supervisor::{
    JobDescriptor, ProcessLauncher, RegistrationError, RunMode, Supervisor, SupervisorHandle,
};

use crate::cli::StartArgs;
use crate::manifest::Manifest;

/// Start the supervisor and block until shutdown, or until every job has
/// run in once modes.
pub(crate) async fn start(manifest: Manifest, args: StartArgs) -> Result<(), Box<dyn std::error::Error>> {
    let Manifest {
        path,
        mut config,
        base_dir,
    } = manifest;

    apply_overrides(&mut config, &args);
    for name in config.retain_jobs(&args.jobs) {
        warn!("Unknown job \"{}\" ignored", name);
    }
    if !args.jobs.is_empty() && config.jobs.is_empty() {
        return Err("None of the requested jobs are defined in the manifest".into());
    }

    let validation = ConfigValidator::validate(&config, &base_dir)?;
    for warning in &validation.warnings {
        warn!("{}: {}", warning.path, warning.message);
    }

    let launcher = ProcessLauncher::new()
        .with_cwd(&base_dir)
        .with_exit_grace(config.supervisor.cancel_grace());
    let supervisor = Supervisor::new(config.supervisor.clone(), Arc::new(launcher)).start()?;

    let names = register_valid(&supervisor, build_descriptors(&config, &base_dir)).await?;
    info!(
        manifest = %path.display(),
        mode = ?config.supervisor.mode,
        time_zone = %config.supervisor.time_zone,
        "Started {} job(s): {}",
        names.len(),
        names.join(", ")
    );

    let signals = SignalHandler::new();
    signals.install_os_handlers()?;

    let source = reload_source(path, base_dir, args.jobs);
    let exit = Runner::new(supervisor, signals)
        .with_manifest_source(Arc::new(source))
        .run()
        .await?;

    match exit {
        RunExit::Finished => info!("All jobs done"),
        RunExit::Shutdown(report) if report.unconfirmed > 0 => {
            return Err(format!("{} job(s) could not be confirmed stopped", report.unconfirmed).into());
        }
        RunExit::Shutdown(_) => {}
    }
    Ok(())
}

/// Apply command line overrides to the manifest's supervisor section.
fn apply_overrides(config: &mut Config, args: &StartArgs) {
    if args.once {
        config.supervisor.mode = RunMode::Once;
    } else if args.once_now {
        config.supervisor.mode = RunMode::OnceNow;
    }
    if let Some(time_zone) = &args.time_zone {
        config.supervisor.time_zone = time_zone.clone();
    }
}

/// Convert every job, skipping the ones whose entrypoint is unusable.
fn build_descriptors(config: &Config, base_dir: &Path) -> Vec<JobDescriptor> {
    config
        .jobs
        .iter()
        .filter_map(|job| match job.to_descriptor(base_dir) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(job = %job.name, "{}. The job will not run.", e);
                None
            }
        })
        .collect()
}

/// Register `descriptors`, dropping each job the supervisor rejects by
/// name until the rest is accepted.
async fn register_valid(
    supervisor: &SupervisorHandle,
    mut descriptors: Vec<JobDescriptor>,
) -> Result<Vec<String>, RegistrationError> {
    loop {
        let err = match supervisor.register(descriptors.clone()).await {
            Ok(names) => return Ok(names),
            Err(e) => e,
        };
        let Some(job) = err.job().map(str::to_string) else {
            return Err(err);
        };
        // A duplicate keeps its first definition.
        let Some(index) = descriptors.iter().rposition(|d| d.name == job) else {
            return Err(err);
        };
        warn!(job = %job, "{}. The job will not run.", err);
        descriptors.remove(index);
    }
}

/// Re-read the manifest on reload, keeping the job filter from startup.
///
/// Only `[[jobs]]` are reloaded; the `[supervisor]` section is fixed for
/// the life of the process.
fn reload_source(
    path: PathBuf,
    base_dir: PathBuf,
    filter: Vec<String>,
) -> impl Fn() -> Result<Vec<JobDescriptor>, DaemonError> + Send + Sync {
    move || {
        let mut config = ConfigLoader::load(&path).map_err(|e| DaemonError::Manifest(e.to_string()))?;
        config.retain_jobs(&filter);
        config
            .descriptors(&base_dir)
            .map_err(|e| DaemonError::Manifest(e.to_string()))
    }
}
