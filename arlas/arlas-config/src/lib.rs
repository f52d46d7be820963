// Copyright 2024-Present Gisaïa
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context};
use json_comments::StripComments;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

mod arlas_config;
mod serde_utils;

pub use arlas_config::{
    load_arlas_config_from_file, load_arlas_config_with_env, ArlasConfig, CacheBackend,
    CacheConfig, ElasticConfig, ReplicatedCacheConfig, ARLAS_CACHE_BACKEND, ARLAS_CACHE_TIMEOUT,
    ARLAS_ELASTIC_COLLECTION_INDEX, ARLAS_ELASTIC_NODES, DEFAULT_COLLECTION_INDEX,
};
pub use serde_utils::DurationAsStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Yaml => "yaml",
        }
    }

    pub fn sniff_from_path(path: &Path) -> anyhow::Result<ConfigFormat> {
        let extension_str: &str = path
            .extension()
            .and_then(|extension| extension.to_str())
            .with_context(|| {
                format!(
                    "failed to read config file `{}`: file extension is missing. Supported file \
                     formats and extensions are JSON (.json), TOML (.toml), and YAML (.yaml or \
                     .yml)",
                    path.display()
                )
            })?;
        ConfigFormat::from_str(extension_str).with_context(|| {
            format!(
                "failed to identify configuration file format `{}`",
                path.display()
            )
        })
    }

    /// Parses a versioned configuration. A numeric `version` is accepted and turned into
    /// its string representation.
    pub fn parse<T>(&self, payload: &[u8]) -> anyhow::Result<T>
    where T: DeserializeOwned {
        match self {
            ConfigFormat::Json => {
                let mut json_value: JsonValue = serde_json::from_reader(StripComments::new(payload))
                    .context("failed to read JSON file")?;
                let version_value = json_value.get_mut("version").context("missing version")?;
                let version_str_opt = match version_value {
                    JsonValue::Number(version_number) => Some(version_number.to_string()),
                    _ => None,
                };
                if let Some(version_str) = version_str_opt {
                    warn!("`version` is supposed to be a string");
                    *version_value = JsonValue::String(version_str);
                }
                serde_json::from_value(json_value).context("failed to read JSON file")
            }
            ConfigFormat::Toml => {
                let payload_str = std::str::from_utf8(payload)
                    .context("configuration file contains invalid UTF-8 characters")?;
                let mut toml_value: toml::Value =
                    toml::from_str(payload_str).context("failed to read TOML file")?;
                let version_value = toml_value.get_mut("version").context("missing version")?;
                let version_str_opt = match version_value {
                    toml::Value::Float(version_number) => Some(version_number.to_string()),
                    toml::Value::Integer(version_number) => Some(version_number.to_string()),
                    _ => None,
                };
                if let Some(version_str) = version_str_opt {
                    warn!("`version` is supposed to be a string");
                    *version_value = toml::Value::String(version_str);
                }
                toml_value.try_into().context("failed to read TOML file")
            }
            ConfigFormat::Yaml => {
                let mut yaml_value: serde_yaml::Value =
                    serde_yaml::from_slice(payload).context("failed to read YAML file")?;
                let version_value = yaml_value.get_mut("version").context("missing version")?;
                let version_str_opt = match version_value {
                    serde_yaml::Value::Number(version_number) => Some(version_number.to_string()),
                    _ => None,
                };
                if let Some(version_str) = version_str_opt {
                    *version_value = serde_yaml::Value::String(version_str);
                }
                serde_yaml::from_value(yaml_value).context("failed to read YAML file")
            }
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = anyhow::Error;

    fn from_str(ext: &str) -> anyhow::Result<Self> {
        match ext {
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => bail!(
                "file extension `.{ext}` is not supported. Supported file formats and extensions \
                 are JSON (.json), TOML (.toml), and YAML (.yaml or .yml)",
            ),
        }
    }
}
