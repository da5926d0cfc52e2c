use super::*;
use std::path::PathBuf;

fn base_dir() -> PathBuf {
    std::env::temp_dir()
}

fn job(name: &str, schedule: &str) -> JobConfig {
    let mut job = JobConfig::new(name, schedule);
    job.command = Some("true".to_string());
    job
}

fn config_with(jobs: Vec<JobConfig>) -> Config {
    Config {
        jobs,
        ..Default::default()
    }
}

#[test]
fn test_validate_valid_config() {
    let config = config_with(vec![job("a", "* * * * * *"), job("b", "0 0 * * *")]);
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(result.is_valid(), "{:?}", result.errors);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
}

#[test]
fn test_empty_manifest_warns() {
    let result = ConfigValidator::validate(&Config::default(), &base_dir()).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "jobs"));
}

#[test]
fn test_invalid_schedule() {
    let config = config_with(vec![job("broken", "every day")]);
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "jobs.broken.schedule"));
}

#[test]
fn test_duplicate_names() {
    let config = config_with(vec![job("a", "* * * * * *"), job("a", "*/2 * * * * *")]);
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].message.contains("more than once"));
}

#[test]
fn test_empty_name() {
    let config = config_with(vec![job("", "* * * * * *")]);
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "jobs[0]"));
}

#[test]
fn test_missing_entrypoint() {
    let config = config_with(vec![JobConfig::new("bare", "* * * * * *")]);
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "jobs.bare"));
}

#[test]
fn test_unknown_time_zone() {
    let mut config = config_with(vec![job("a", "* * * * * *")]);
    config.supervisor.time_zone = "Atlantis/Capital".to_string();
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "supervisor.time_zone"));
}

#[test]
fn test_zero_drain_grace() {
    let mut config = config_with(vec![job("a", "* * * * * *")]);
    config.supervisor.drain_grace_ms = 0;
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(!result.is_valid());
}

#[test]
fn test_unbounded_overlap_warning() {
    let mut wide = job("wide", "* * * * * *");
    wide.prevent_overlapping = false;
    let result = ConfigValidator::validate(&config_with(vec![wide]), &base_dir()).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "jobs.wide"));
}

#[test]
fn test_missing_cwd_warning() {
    let mut j = job("a", "* * * * * *");
    j.cwd = Some("/nonexistent/cronstack/dir".to_string());
    let result = ConfigValidator::validate(&config_with(vec![j]), &base_dir()).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "jobs.a.cwd"));
}

#[test]
fn test_log_directive_is_accepted() {
    let mut config = config_with(vec![job("a", "* * * * * *")]);
    config.logging.level = "cronstack=debug,info".to_string();
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(result.warnings.is_empty());

    config.logging.level = "loud".to_string();
    let result = ConfigValidator::validate(&config, &base_dir()).unwrap();
    assert!(result.warnings.iter().any(|w| w.path == "logging.level"));
}
