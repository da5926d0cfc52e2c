//! `cronstack check`: validate the manifest without running anything.

use cronstack_config::{ConfigValidator, ValidationResult};

use crate::manifest::Manifest;

pub(crate) fn check(manifest: &Manifest) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(&manifest.config, &manifest.base_dir)?;
    print!("{}", render(&result));

    if !result.is_valid() {
        return Err(format!("{} has {} error(s)", manifest.path.display(), result.errors.len()).into());
    }
    let names = manifest.config.job_names();
    println!(
        "{}: {} job(s) OK ({})",
        manifest.path.display(),
        names.len(),
        names.join(", ")
    );
    Ok(())
}

fn render(result: &ValidationResult) -> String {
    let mut out = String::new();
    for error in &result.errors {
        out.push_str(&format!("error: {}: {}\n", error.path, error.message));
    }
    for warning in &result.warnings {
        out.push_str(&format!("warning: {}: {}\n", warning.path, warning.message));
    }
    out
}
