//! Configuration loading integration tests.
//!
//! Covers file formats, the explicit/env/discovery resolution order, and the
//! invariants checked by `validate()`.

use filtrate::FiltrateError;
use filtrate::core::config::{BackendKind, CONFIG_ENV_VAR, FiltrateConfig, SinkBackendKind};
use filtrate::plugins::FilterRegistry;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const REGISTRY_YAML: &str = r#"
metadata_store_path: /srv/store
case_sensitive_extensions: false
lock:
  backend: redis
  url: redis://cache:6379/0
  ttl_secs: 600
sink:
  backend: redis
  url: redis://cache:6379/1
  queue: filters
filters:
  - name: CSV image filter
    extensions: [csv]
    path: filtrate.filters.csv.CsvImageFilter
    output_name: CSV
    schema: http://example.org/schemas/csv
    args: [/usr/bin/ssconvert]
  - name: Diffraction image filter
    extensions: [img, osc, cbf]
    path: filtrate.filters.diffraction.DiffractionImageFilter
    output_name: DIFFRACTION
    schema: http://example.org/schemas/diffraction
    args: [/opt/tools/diffdump, /opt/tools/diff2jpeg]
    kwargs:
      tagsToExclude: [detectorSN]
"#;

#[test]
fn test_yaml_registry_with_short_keys() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("filtrate.yaml");
    fs::write(&config_path, REGISTRY_YAML).unwrap();

    let config = FiltrateConfig::from_file(&config_path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.metadata_store_path, PathBuf::from("/srv/store"));
    assert!(!config.case_sensitive_extensions);
    assert_eq!(config.lock.backend, BackendKind::Redis);
    assert_eq!(config.lock.ttl_secs, 600);
    assert_eq!(config.sink.backend, SinkBackendKind::Redis);
    assert_eq!(config.sink.queue, "filters");
    assert_eq!(config.sink.priority, 4);

    assert_eq!(config.filters.len(), 2);
    let diffraction = &config.filters[1];
    assert_eq!(diffraction.display_name, "Diffraction image filter");
    assert_eq!(diffraction.loadable_ref, "filtrate.filters.diffraction.DiffractionImageFilter");
    assert_eq!(diffraction.output_schema, "http://example.org/schemas/diffraction");
    assert!(diffraction.accepts("osc", true));
    assert_eq!(diffraction.args.len(), 2);
    assert_eq!(diffraction.kwargs["tagsToExclude"][0], "detectorSN");
}

#[test]
fn test_registry_preserves_configuration_order() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("filtrate.yml");
    fs::write(&config_path, REGISTRY_YAML).unwrap();

    let config = FiltrateConfig::from_file(&config_path).unwrap();
    let registry = FilterRegistry::from_config(&config);

    let names: Vec<&str> = registry.specs().iter().map(|spec| spec.output_name.as_str()).collect();
    assert_eq!(names, vec!["CSV", "DIFFRACTION"]);
    assert!(registry.get("diffraction").is_some());
}

#[test]
fn test_json_and_toml_agree() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("filtrate.toml");
    let json_path = temp_dir.path().join("filtrate.json");

    fs::write(
        &toml_path,
        r#"
[[filters]]
display_name = "PDF image filter"
accepted_extensions = ["pdf"]
loadable_ref = "filtrate.filters.pdf.PdfImageFilter"
output_name = "PDF"
output_schema = "http://example.org/schemas/pdf"
"#,
    )
    .unwrap();
    fs::write(
        &json_path,
        r#"{"filters": [{
            "display_name": "PDF image filter",
            "accepted_extensions": ["pdf"],
            "loadable_ref": "filtrate.filters.pdf.PdfImageFilter",
            "output_name": "PDF",
            "output_schema": "http://example.org/schemas/pdf"
        }]}"#,
    )
    .unwrap();

    let from_toml = FiltrateConfig::from_file(&toml_path).unwrap();
    let from_json = FiltrateConfig::from_file(&json_path).unwrap();

    assert_eq!(from_toml.filters, from_json.filters);
    assert!(from_toml.filters[0].args.is_empty());
    assert!(from_toml.filters[0].kwargs.is_empty());
}

#[test]
fn test_missing_file_is_configuration_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = FiltrateConfig::from_file(temp_dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, FiltrateError::Configuration { .. }));
}

#[test]
fn test_load_validates_explicit_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("filtrate.toml");
    fs::write(&config_path, "[lock]\nbackend = \"redis\"\n").unwrap();

    let err = FiltrateConfig::load(Some(&config_path)).unwrap_err();
    assert!(err.to_string().contains("lock.url"));
}

#[test]
fn test_validate_rejects_empty_loadable_ref() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("filtrate.toml");
    fs::write(
        &config_path,
        r#"
[[filters]]
display_name = "Broken"
accepted_extensions = ["csv"]
loadable_ref = "  "
output_name = "BROKEN"
output_schema = "s"
"#,
    )
    .unwrap();

    let err = FiltrateConfig::load(Some(&config_path)).unwrap_err();
    assert!(err.to_string().contains("empty loadable_ref"));
}

#[test]
#[serial_test::serial]
fn test_load_prefers_env_var_over_discovery() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("custom.json");
    fs::write(&config_path, r#"{"max_concurrent_jobs": 5}"#).unwrap();

    unsafe { std::env::set_var(CONFIG_ENV_VAR, &config_path) };
    let config = FiltrateConfig::load(None);
    unsafe { std::env::remove_var(CONFIG_ENV_VAR) };

    assert_eq!(config.unwrap().max_concurrent_jobs(), 5);
}

#[test]
#[serial_test::serial]
fn test_load_discovers_file_in_parent_directory() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("filtrate.toml"), "[lock]\nttl_secs = 45\n").unwrap();
    let sub_dir = temp_dir.path().join("datasets").join("run1");
    fs::create_dir_all(&sub_dir).unwrap();

    let original_dir = std::env::current_dir().unwrap();
    std::env::set_current_dir(&sub_dir).unwrap();
    let config = FiltrateConfig::load(None);
    std::env::set_current_dir(original_dir).unwrap();

    assert_eq!(config.unwrap().lock.ttl_secs, 45);
}

#[test]
#[serial_test::serial]
fn test_explicit_path_wins_over_env_var() {
    let temp_dir = TempDir::new().unwrap();
    let env_path = temp_dir.path().join("env.toml");
    let explicit_path = temp_dir.path().join("explicit.toml");
    fs::write(&env_path, "[sink]\nqueue = \"from-env\"\n").unwrap();
    fs::write(&explicit_path, "[sink]\nqueue = \"explicit\"\n").unwrap();

    unsafe { std::env::set_var(CONFIG_ENV_VAR, &env_path) };
    let config = FiltrateConfig::load(Some(&explicit_path));
    unsafe { std::env::remove_var(CONFIG_ENV_VAR) };

    assert_eq!(config.unwrap().sink.queue, "explicit");
}

#[test]
fn test_round_trip_through_toml() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("filtrate.toml");

    let mut config = FiltrateConfig::default();
    config.max_concurrent_jobs = Some(2);
    config.lock.ttl_secs = 90;
    fs::write(&config_path, toml::to_string(&config)?)?;

    let loaded = FiltrateConfig::load(Some(&config_path))?;
    assert_eq!(loaded.max_concurrent_jobs(), 2);
    assert_eq!(loaded.lock.ttl_secs, 90);
    Ok(())
}
