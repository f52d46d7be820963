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

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use super::{ArlasConfig, CacheBackend};
use crate::{ConfigFormat, DurationAsStr};

pub const DEFAULT_COLLECTION_INDEX: &str = ".arlas";

pub const ARLAS_ELASTIC_NODES: &str = "ARLAS_ELASTIC_NODES";
pub const ARLAS_ELASTIC_COLLECTION_INDEX: &str = "ARLAS_ELASTIC_COLLECTION_INDEX";
pub const ARLAS_CACHE_BACKEND: &str = "ARLAS_CACHE_BACKEND";
pub const ARLAS_CACHE_TIMEOUT: &str = "ARLAS_CACHE_TIMEOUT";

#[derive(Debug, Deserialize)]
#[serde(tag = "version")]
enum VersionedArlasConfig {
    #[serde(rename = "0.1")]
    V0_1(ArlasConfig),
}

impl From<VersionedArlasConfig> for ArlasConfig {
    fn from(versioned_config: VersionedArlasConfig) -> Self {
        match versioned_config {
            VersionedArlasConfig::V0_1(config) => config,
        }
    }
}

/// Parses a configuration, applies the overrides found in `env_vars` and validates the result.
pub fn load_arlas_config_with_env(
    config_format: ConfigFormat,
    config_content: &[u8],
    env_vars: &HashMap<String, String>,
) -> anyhow::Result<ArlasConfig> {
    let versioned_config: VersionedArlasConfig = config_format.parse(config_content)?;
    let mut config: ArlasConfig = versioned_config.into();
    apply_env_overrides(&mut config, env_vars)?;
    config.validate()?;
    Ok(config)
}

/// Reads the configuration file at `config_path`, sniffing its format from the extension.
pub async fn load_arlas_config_from_file(
    config_path: &Path,
    env_vars: &HashMap<String, String>,
) -> anyhow::Result<ArlasConfig> {
    let config_format = ConfigFormat::sniff_from_path(config_path)?;
    let config_content = tokio::fs::read(config_path).await.with_context(|| {
        format!(
            "failed to read config file `{}`",
            config_path.display()
        )
    })?;
    let config = load_arlas_config_with_env(config_format, &config_content, env_vars)?;
    info!(config_path=%config_path.display(), "loaded configuration");
    Ok(config)
}

fn apply_env_overrides(
    config: &mut ArlasConfig,
    env_vars: &HashMap<String, String>,
) -> anyhow::Result<()> {
    if let Some(nodes_str) = env_vars.get(ARLAS_ELASTIC_NODES) {
        config.elastic.nodes = arlas_nodes_from_str(nodes_str);
    }
    if let Some(collection_index) = env_vars.get(ARLAS_ELASTIC_COLLECTION_INDEX) {
        config.elastic.collection_index = collection_index.trim().to_string();
    }
    if let Some(backend_str) = env_vars.get(ARLAS_CACHE_BACKEND) {
        config.cache.backend = CacheBackend::from_str(backend_str)
            .with_context(|| format!("failed to parse `{ARLAS_CACHE_BACKEND}`"))?;
    }
    if let Some(timeout_str) = env_vars.get(ARLAS_CACHE_TIMEOUT) {
        config.cache.timeout = DurationAsStr::try_from(timeout_str.trim().to_string())
            .with_context(|| format!("failed to parse `{ARLAS_CACHE_TIMEOUT}`"))?;
    }
    Ok(())
}

fn arlas_nodes_from_str(nodes_str: &str) -> Vec<String> {
    nodes_str
        .split(',')
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .map(str::to_string)
        .collect()
}
