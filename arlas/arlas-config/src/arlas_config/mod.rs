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

mod serialize;

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};
pub use serialize::{
    load_arlas_config_from_file, load_arlas_config_with_env, ARLAS_CACHE_BACKEND,
    ARLAS_CACHE_TIMEOUT, ARLAS_ELASTIC_COLLECTION_INDEX, ARLAS_ELASTIC_NODES,
    DEFAULT_COLLECTION_INDEX,
};

use crate::DurationAsStr;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticConfig {
    #[serde(default = "ElasticConfig::default_nodes")]
    pub nodes: Vec<String>,
    #[serde(default = "ElasticConfig::default_collection_index")]
    pub collection_index: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "ElasticConfig::default_connect_timeout")]
    pub connect_timeout: DurationAsStr,
    #[serde(default = "ElasticConfig::default_request_timeout")]
    pub request_timeout: DurationAsStr,
    #[serde(default = "ElasticConfig::default_scroll_page_size")]
    pub scroll_page_size: usize,
    #[serde(default = "ElasticConfig::default_scroll_keep_alive")]
    pub scroll_keep_alive: DurationAsStr,
}

impl ElasticConfig {
    fn default_nodes() -> Vec<String> {
        vec!["http://localhost:9200".to_string()]
    }

    fn default_collection_index() -> String {
        DEFAULT_COLLECTION_INDEX.to_string()
    }

    fn default_connect_timeout() -> DurationAsStr {
        DurationAsStr::from_duration(Duration::from_secs(5))
    }

    fn default_request_timeout() -> DurationAsStr {
        DurationAsStr::from_duration(Duration::from_secs(30))
    }

    fn default_scroll_page_size() -> usize {
        100
    }

    fn default_scroll_keep_alive() -> DurationAsStr {
        DurationAsStr::from_duration(Duration::from_secs(60))
    }

    /// Returns the node requests are sent to.
    pub fn first_node(&self) -> anyhow::Result<&str> {
        match self.nodes.first() {
            Some(node) => Ok(node.as_str()),
            None => bail!("at least one Elasticsearch node must be configured"),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.nodes.is_empty(),
            "at least one Elasticsearch node must be configured"
        );
        for node in &self.nodes {
            let uri = http::Uri::from_str(node)
                .map_err(|error| anyhow::anyhow!("invalid Elasticsearch node `{node}`: {error}"))?;
            ensure!(
                matches!(uri.scheme_str(), Some("http") | Some("https")),
                "invalid Elasticsearch node `{node}`: scheme must be `http` or `https`"
            );
        }
        ensure!(
            !self.collection_index.is_empty(),
            "collection index name must not be empty"
        );
        ensure!(
            self.scroll_page_size > 0,
            "scroll page size must be strictly positive"
        );
        ensure!(
            !self.scroll_keep_alive.is_zero(),
            "scroll keep-alive must be strictly positive"
        );
        ensure!(
            !self.request_timeout.is_zero(),
            "request timeout must be strictly positive"
        );
        ensure!(
            self.username.is_some() || self.password.is_none(),
            "a password is configured without a username"
        );
        Ok(())
    }
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            nodes: Self::default_nodes(),
            collection_index: Self::default_collection_index(),
            username: None,
            password: None,
            connect_timeout: Self::default_connect_timeout(),
            request_timeout: Self::default_request_timeout(),
            scroll_page_size: Self::default_scroll_page_size(),
            scroll_keep_alive: Self::default_scroll_keep_alive(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Noop,
    #[default]
    Local,
    Replicated,
}

impl FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(backend_str: &str) -> anyhow::Result<Self> {
        match backend_str.trim().to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "local" => Ok(Self::Local),
            "replicated" => Ok(Self::Replicated),
            _ => bail!(
                "unknown cache backend `{backend_str}`. Supported backends are `noop`, `local`, \
                 and `replicated`"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicatedCacheConfig {
    #[serde(default = "ReplicatedCacheConfig::default_cluster_id")]
    pub cluster_id: String,
    #[serde(default = "ReplicatedCacheConfig::default_node_id")]
    pub node_id: String,
    #[serde(default = "ReplicatedCacheConfig::default_listen_address")]
    pub listen_address: SocketAddr,
    #[serde(default)]
    pub peer_seeds: Vec<String>,
    #[serde(default = "ReplicatedCacheConfig::default_gossip_interval")]
    pub gossip_interval: DurationAsStr,
}

impl ReplicatedCacheConfig {
    fn default_cluster_id() -> String {
        "arlas-cluster".to_string()
    }

    fn default_node_id() -> String {
        "arlas-node".to_string()
    }

    fn default_listen_address() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 7210))
    }

    fn default_gossip_interval() -> DurationAsStr {
        DurationAsStr::from_duration(Duration::from_secs(1))
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.cluster_id.is_empty(), "cluster ID must not be empty");
        ensure!(!self.node_id.is_empty(), "node ID must not be empty");
        ensure!(
            !self.gossip_interval.is_zero(),
            "gossip interval must be strictly positive"
        );
        Ok(())
    }
}

impl Default for ReplicatedCacheConfig {
    fn default() -> Self {
        Self {
            cluster_id: Self::default_cluster_id(),
            node_id: Self::default_node_id(),
            listen_address: Self::default_listen_address(),
            peer_seeds: Vec::new(),
            gossip_interval: Self::default_gossip_interval(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Time-to-live of the entries written without an explicit one.
    #[serde(default = "CacheConfig::default_timeout")]
    pub timeout: DurationAsStr,
    #[serde(default = "CacheConfig::default_max_entries_per_namespace")]
    pub max_entries_per_namespace: usize,
    #[serde(default)]
    pub replicated: ReplicatedCacheConfig,
}

impl CacheConfig {
    fn default_timeout() -> DurationAsStr {
        DurationAsStr::from_duration(Duration::from_secs(60))
    }

    fn default_max_entries_per_namespace() -> usize {
        10_000
    }

    pub fn for_backend(backend: CacheBackend) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.timeout.is_zero(),
            "cache timeout must be strictly positive"
        );
        ensure!(
            self.max_entries_per_namespace > 0,
            "max entries per namespace must be strictly positive"
        );
        if self.backend == CacheBackend::Replicated {
            self.replicated.validate()?;
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            timeout: Self::default_timeout(),
            max_entries_per_namespace: Self::default_max_entries_per_namespace(),
            replicated: ReplicatedCacheConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArlasConfig {
    #[serde(default)]
    pub elastic: ElasticConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl ArlasConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.elastic.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}
