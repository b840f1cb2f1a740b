//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`<PREFIX>` + path segments joined by `__`)
//! 2. `<dir>/<name>.json`, `<dir>/<name>.yaml`, `<dir>/<name>.toml`
//! 3. `<dir>/default.{json,yaml,toml}`
//! 4. `T::default()`

use errors::{HubError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Load `config/<name>.*` merged with `<env_prefix>` environment variables
pub fn load_config<T>(name: &str, env_prefix: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
{
    load_config_in(Path::new("config"), name, env_prefix)
}

/// Same as [`load_config`] with an explicit configuration directory
pub fn load_config_in<T>(dir: &Path, name: &str, env_prefix: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
{
    let figment = Figment::from(Serialized::defaults(T::default()))
        .merge(Toml::file(dir.join("default.toml")))
        .merge(Yaml::file(dir.join("default.yaml")))
        .merge(Json::file(dir.join("default.json")))
        .merge(Toml::file(dir.join(format!("{name}.toml"))))
        .merge(Yaml::file(dir.join(format!("{name}.yaml"))))
        .merge(Json::file(dir.join(format!("{name}.json"))))
        .merge(Env::prefixed(env_prefix).split("__"));

    figment
        .extract()
        .map_err(|e| HubError::config(format!("Failed to load configuration: {e}")))
}

/// Load configuration from a specific file, format chosen by extension
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(HubError::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| HubError::config("Config file must have an extension"))?;

    let base = Figment::from(Serialized::defaults(T::default()));
    let figment = match extension {
        "toml" => base.merge(Toml::file(path)),
        "yaml" | "yml" => base.merge(Yaml::file(path)),
        "json" => base.merge(Json::file(path)),
        _ => {
            return Err(HubError::config(format!(
                "Unsupported config file format: {extension}"
            )))
        },
    };

    figment.extract().map_err(|e| {
        HubError::config(format!(
            "Failed to load configuration from {}: {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    #[serde(default)]
    struct TestConfig {
        name: String,
        port: u16,
        nested: NestedConfig,
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(default)]
    struct NestedConfig {
        enabled: bool,
        limit: u32,
    }

    impl Default for NestedConfig {
        fn default() -> Self {
            Self {
                enabled: true,
                limit: 16,
            }
        }
    }

    #[test]
    fn test_load_yaml_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.yaml");
        std::fs::write(&path, "name: plant\nnested:\n  limit: 64\n").unwrap();

        let cfg: TestConfig = load_config_from_file(&path).unwrap();
        assert_eq!(cfg.name, "plant");
        assert_eq!(cfg.port, 0);
        assert!(cfg.nested.enabled);
        assert_eq!(cfg.nested.limit, 64);
    }

    #[test]
    fn test_load_toml_and_json_files() {
        let dir = TempDir::new().unwrap();
        let toml_path = dir.path().join("hub.toml");
        std::fs::write(&toml_path, "port = 4840\n").unwrap();
        let cfg: TestConfig = load_config_from_file(&toml_path).unwrap();
        assert_eq!(cfg.port, 4840);

        let json_path = dir.path().join("hub.json");
        std::fs::write(&json_path, r#"{"nested": {"enabled": false}}"#).unwrap();
        let cfg: TestConfig = load_config_from_file(&json_path).unwrap();
        assert!(!cfg.nested.enabled);
    }

    #[test]
    fn test_unsupported_extension_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config_from_file::<TestConfig, _>(&path).is_err());
        assert!(load_config_from_file::<TestConfig, _>(dir.path().join("nope.yaml")).is_err());
    }

    #[test]
    fn test_layered_dir_with_env_override() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("default.toml"), "name = \"base\"\nport = 1\n").unwrap();
        std::fs::write(dir.path().join("hub.yaml"), "port: 2\n").unwrap();
        std::env::set_var("IDHCFGTEST_NESTED__LIMIT", "99");

        let cfg: TestConfig = load_config_in(dir.path(), "hub", "IDHCFGTEST_").unwrap();
        assert_eq!(cfg.name, "base");
        assert_eq!(cfg.port, 2);
        assert_eq!(cfg.nested.limit, 99);

        std::env::remove_var("IDHCFGTEST_NESTED__LIMIT");
    }
}
