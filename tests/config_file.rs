//! Loading balancer configuration from disk.

use std::fs;

use team_balancer::{BalanceConfig, BalanceError, ScrambleMode, SkillMetric};

#[test]
fn toml_file_is_loaded_and_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("balance.toml");
    fs::write(
        &path,
        r#"
max_size_difference = 2
skill_metric = "performance"
skill_threshold = -1.0

[scramble]
mode = "periodic"
every_rounds = 4

[boost]
percentage = 150
"#,
    )
    .unwrap();

    let (config, warnings) = BalanceConfig::from_file(&path).unwrap();
    assert_eq!(config.max_size_difference, 2);
    assert_eq!(config.skill_metric, SkillMetric::Performance);
    assert_eq!(config.scramble.mode, ScrambleMode::Periodic);
    assert_eq!(config.scramble.every_rounds, 4);
    assert_eq!(config.boost.percentage, 100);
    assert_eq!(config.skill_threshold, 0.2);
    assert_eq!(warnings.len(), 2);
}

#[test]
fn json_file_is_detected_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("balance.json");
    fs::write(&path, r#"{ "min_participants": 10, "size_only": true }"#).unwrap();

    let (config, warnings) = BalanceConfig::from_file(&path).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(config.min_participants, 10);
    assert!(config.size_only);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = BalanceConfig::from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(BalanceError::ConfigIo(_))));
}

#[test]
fn written_defaults_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defaults.toml");
    fs::write(&path, BalanceConfig::default().to_toml_string().unwrap()).unwrap();

    let (config, warnings) = BalanceConfig::from_file(&path).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(config.min_participants, 6);
    assert_eq!(config.boost.tiers.len(), 3);
}
