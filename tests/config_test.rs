mod common;

use std::collections::HashMap;

use clap::Parser;
use tempfile::TempDir;

use common::{SchemaFixture, write};
use taxonomy_reader::cli::Cli;
use taxonomy_reader::config::{Config, ConfigManager, EnvProvider, OutputFormatConfig};
use taxonomy_reader::engine::TaxonomyReader;

struct FixedEnv(HashMap<&'static str, &'static str>);

impl EnvProvider for FixedEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| v.to_string())
    }
}

#[tokio::test]
async fn test_file_then_environment_then_cli() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("taxonomy-reader.toml");
    std::fs::write(
        &config_path,
        r#"
[network]
timeout_seconds = 45
retry_attempts = 2

[engine]
max_concurrent_units = 6
exclude_patterns = ["draft/**"]

[output]
format = "json"
"#,
    )
    .unwrap();

    let file = ConfigManager::load_from_file(&config_path).await.unwrap();
    let config = ConfigManager::merge_configs(Config::default(), file);
    assert_eq!(config.network.timeout_seconds, 45);
    assert_eq!(config.output.format, OutputFormatConfig::Json);

    let env = FixedEnv(HashMap::from([
        ("TAXONOMY_READER_TIMEOUT", "20"),
        ("TAXONOMY_READER_RETRY_ATTEMPTS", "0"),
        ("TAXONOMY_READER_FORMAT", "summary"),
    ]));
    let config = ConfigManager::apply_environment_overrides_with(&env, config).unwrap();
    assert_eq!(config.network.timeout_seconds, 20);
    assert_eq!(config.network.retry_attempts, 0);

    let cache_dir = temp_dir.path().join("cli-cache");
    let cli = Cli::try_parse_from([
        "taxonomy-reader",
        "--threads",
        "2",
        "--cache-dir",
        cache_dir.to_str().unwrap(),
        "entry.xsd",
    ])
    .unwrap();
    let config = ConfigManager::merge_with_cli(config, &cli);
    ConfigManager::validate_config(&config).unwrap();

    assert_eq!(config.engine.max_concurrent_units, Some(2));
    assert_eq!(config.max_concurrent_units(), 2);
    assert_eq!(config.cache.directory, cache_dir);
    assert_eq!(config.network.timeout_seconds, 20);
    assert_eq!(config.network.retry_attempts, 0);
    assert_eq!(config.engine.exclude_patterns, vec!["draft/**"]);
    assert_eq!(config.output.format, OutputFormatConfig::Summary);
}

#[tokio::test]
async fn test_layered_config_drives_discovery() {
    let temp_dir = TempDir::new().unwrap();
    let taxo = temp_dir.path().join("taxo");
    write(&taxo, "a.xsd", &SchemaFixture::new("urn:a").build());
    write(&taxo, "b.xml", "<not-read/>");
    write(&taxo, "draft/c.xsd", &SchemaFixture::new("urn:c").build());

    let cli = Cli::try_parse_from([
        "taxonomy-reader",
        "--exclude",
        "draft/**",
        "--extensions",
        ".XSD",
        "--retry-attempts",
        "0",
        taxo.to_str().unwrap(),
    ])
    .unwrap();
    let config = ConfigManager::merge_with_cli(
        Config::with_cache_dir(temp_dir.path().join("cache")),
        &cli,
    );
    assert_eq!(config.engine.schema_extensions, vec!["xsd"]);

    let report = TaxonomyReader::new(config).read(&cli.entry).await.unwrap();

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.units.len(), 1);
    assert!(report.units[0].path.ends_with("taxo/a.xsd"));
}

#[test]
fn test_invalid_layers_are_rejected() {
    let env = FixedEnv(HashMap::from([("TAXONOMY_READER_FORMAT", "yaml")]));
    assert!(ConfigManager::apply_environment_overrides_with(&env, Config::default()).is_err());

    let cli = Cli::try_parse_from(["taxonomy-reader", "--threads", "0", "entry.xsd"]).unwrap();
    assert!(cli.validate().is_err());
    let config = ConfigManager::merge_with_cli(Config::default(), &cli);
    assert!(ConfigManager::validate_config(&config).is_err());
}
