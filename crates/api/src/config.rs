//! Types for use when configuring lodr modules.

use crate::*;
use std::sync::Mutex;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> LodrResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| LodrError::other_src("encode", e))?,
    )
    .map_err(|e| LodrError::other_src("decode", e))
}

/// Denotes a type used to configure a specific lodr module.
///
/// A module config is a struct with a single camelCase field named after
/// the module, e.g. `CoreOdrModConfig { core_odr: CoreOdrConfig }`. This
/// keeps every module's parameters under its own key in the shared
/// [Config] map.
///
/// Note, the types defined in this struct are specifically for configuration
/// that cannot be changed at runtime, the likes of which might be found
/// in a configuration file.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

impl<
        T: 'static
            + Sized
            + Default
            + std::fmt::Debug
            + serde::Serialize
            + serde::de::DeserializeOwned
            + Send
            + Sync,
    > ModConfig for T
{
}

/// LODR configuration.
#[derive(Debug, Default)]
pub struct Config(Mutex<serde_json::Map<String, serde_json::Value>>);

impl serde::Serialize for Config {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.lock().unwrap().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map: serde_json::Map<String, serde_json::Value> =
            serde::Deserialize::deserialize(deserializer)?;
        Ok(Self(Mutex::new(map)))
    }
}

impl Config {
    /// Merge the top-level keys of a module config into this config,
    /// overwriting any previous values stored under those keys.
    ///
    /// Module factories call this from their `default_config` to add their
    /// default parameters. Tests call it to tune a module before it is
    /// created.
    pub fn set_module_config<M: ModConfig>(&self, config: &M) -> LodrResult<()> {
        let value = serde_json::to_value(config)
            .map_err(|e| LodrError::other_src("encode module config", e))?;
        let serde_json::Value::Object(map) = value else {
            return Err(LodrError::other(
                "module config must serialize to a json object",
            ));
        };
        let mut lock = self.0.lock().unwrap();
        for (k, v) in map {
            lock.insert(k, v);
        }
        Ok(())
    }

    /// Extract a module config from this config. Note that this config may
    /// be loaded from disk and edited by humans, so the module config is
    /// expected to be tolerant to missing properties by falling back to
    /// its defaults.
    pub fn get_module_config<M: ModConfig>(&self) -> LodrResult<M> {
        let lock = self.0.lock().unwrap();
        tc(&*lock)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(
        Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    struct ModAConfig {
        p_a: u32,
        p_b: String,
    }

    #[derive(
        Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    struct ModAModConfig {
        mod_a: ModAConfig,
    }

    #[derive(
        Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    struct ModBModConfig {
        mod_b: u64,
    }

    #[test]
    fn config_usage_example() {
        let config = Config::default();
        config
            .set_module_config(&ModAModConfig {
                mod_a: ModAConfig {
                    p_a: 42,
                    p_b: "x".into(),
                },
            })
            .unwrap();
        config.set_module_config(&ModBModConfig { mod_b: 7 }).unwrap();

        assert_eq!(
            r##"{
  "modA": {
    "pA": 42,
    "pB": "x"
  },
  "modB": 7
}"##,
            serde_json::to_string_pretty(&config).unwrap()
        );

        let a: ModAModConfig = config.get_module_config().unwrap();
        assert_eq!(42, a.mod_a.p_a);
        let b: ModBModConfig = config.get_module_config().unwrap();
        assert_eq!(7, b.mod_b);
    }

    #[test]
    fn tolerates_missing_and_extra_properties() {
        let config: Config = serde_json::from_str(
            r#"{
          "modBAD": { "foo": "bar" },
          "modA": { "pB": "test-p_b" }
        }"#,
        )
        .unwrap();

        let a: ModAModConfig = config.get_module_config().unwrap();
        assert_eq!(
            ModAConfig {
                p_a: 0,
                p_b: "test-p_b".to_string(),
            },
            a.mod_a
        );

        // unset mods get the default
        let b: ModBModConfig = config.get_module_config().unwrap();
        assert_eq!(ModBModConfig::default(), b);
    }

    #[test]
    fn set_overwrites_previous_values() {
        let config = Config::default();
        config.set_module_config(&ModBModConfig { mod_b: 1 }).unwrap();
        config.set_module_config(&ModBModConfig { mod_b: 2 }).unwrap();
        let b: ModBModConfig = config.get_module_config().unwrap();
        assert_eq!(2, b.mod_b);
    }
}
