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

//! Cache store replicated across the nodes of a cluster through chitchat gossip.
//!
//! Every node publishes its own writes in its chitchat node state:
//! - `cache/{namespace}/{key}` holds a JSON [`VersionedEntry`]. Removals are tombstones.
//! - `cache-clear/{namespace}` holds the timestamp of the last clear of the namespace.
//!
//! A read considers the entries published by all the live nodes and keeps the most recent one
//! (last write wins). The entry is ignored if it is a tombstone, has expired, or was written
//! before the most recent clear of its namespace.
//!
//! Each node periodically withdraws the entries it published that another live node has
//! superseded, so an invalidation still holds once the node that issued it is gone. A node
//! that rejoins the cluster publishes its previous key-values again under its new generation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arlas_config::ReplicatedCacheConfig;
use async_trait::async_trait;
use chitchat::transport::Transport;
use chitchat::{
    spawn_chitchat, Chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
    NodeState,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reconnecting_cache_store::Reconnect;
use crate::{CacheError, CacheResult, CacheStore};

const CACHE_KEY_PREFIX: &str = "cache/";

const CLEAR_KEY_PREFIX: &str = "cache-clear/";

const MARKED_FOR_DELETION_GRACE_PERIOD: usize = if cfg!(any(test, feature = "testsuite")) {
    100
} else {
    5_000
};

/// Entries larger than this are not replicated: they would not fit in a gossip datagram.
const MAX_ENTRY_NUM_BYTES: usize = 60_000;

/// A member whose heartbeat stalls, or that sees none of its peers, for this many gossip
/// intervals has lost its membership.
const MEMBERSHIP_TIMEOUT_NUM_GOSSIP_INTERVALS: u32 = 40;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct VersionedEntry {
    /// Nanoseconds since the Unix epoch, taken from the writer's clock.
    written_at: u64,
    expires_at: u64,
    value: Option<JsonValue>,
}

impl VersionedEntry {
    fn tombstone(written_at: u64) -> Self {
        Self {
            written_at,
            expires_at: u64::MAX,
            value: None,
        }
    }

    fn has_expired(&self, now: u64) -> bool {
        self.value.is_some() && self.expires_at <= now
    }
}

fn entry_key(namespace: &str, key: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{namespace}/{key}")
}

fn namespace_prefix(namespace: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{namespace}/")
}

fn clear_key(namespace: &str) -> String {
    format!("{CLEAR_KEY_PREFIX}{namespace}")
}

fn entry_namespace(entry_key: &str) -> Option<&str> {
    entry_key
        .strip_prefix(CACHE_KEY_PREFIX)?
        .split_once('/')
        .map(|(namespace, _)| namespace)
}

/// Returns the value of `key`, unless the key is marked for deletion.
fn live_value<'a>(node_state: &'a NodeState, key: &str) -> Option<&'a str> {
    node_state
        .get_versioned(key)
        .filter(|versioned_value| versioned_value.tombstone.is_none())
        .map(|versioned_value| versioned_value.value.as_str())
}

fn now_nanos() -> u64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos().max(0) as u64
}

/// Wall clock in nanoseconds that never returns the same value twice, so that two writes issued
/// by one node are always ordered.
#[derive(Debug, Default)]
struct MonotonicClock {
    last_nanos: AtomicU64,
}

impl MonotonicClock {
    fn tick(&self) -> u64 {
        let wall_nanos = now_nanos();
        let previous_nanos = self
            .last_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last_nanos| {
                Some(wall_nanos.max(last_nanos + 1))
            })
            .unwrap_or_else(|last_nanos| last_nanos);
        wall_nanos.max(previous_nanos + 1)
    }
}

/// What a member last observed of its own gossip loop and of its peers.
#[derive(Debug)]
struct MembershipHealth {
    last_heartbeat: u64,
    last_heartbeat_at: Instant,
    has_seen_peers: bool,
    last_peer_contact_at: Instant,
}

impl MembershipHealth {
    fn new(now: Instant) -> Self {
        Self {
            last_heartbeat: 0,
            last_heartbeat_at: now,
            has_seen_peers: false,
            last_peer_contact_at: now,
        }
    }

    /// Records an observation and returns the reason the membership is lost, if it is.
    ///
    /// A node without peer seeds cannot rejoin anybody by itself, so it is never considered
    /// isolated.
    fn observe(
        &mut self,
        heartbeat: u64,
        num_live_peers: usize,
        has_peer_seeds: bool,
        timeout: Duration,
        now: Instant,
    ) -> Result<(), String> {
        if heartbeat != self.last_heartbeat {
            self.last_heartbeat = heartbeat;
            self.last_heartbeat_at = now;
        } else if now.saturating_duration_since(self.last_heartbeat_at) > timeout {
            return Err(format!("gossip heartbeat stalled at {heartbeat}"));
        }
        if num_live_peers > 0 {
            self.has_seen_peers = true;
            self.last_peer_contact_at = now;
        } else if has_peer_seeds
            && self.has_seen_peers
            && now.saturating_duration_since(self.last_peer_contact_at) > timeout
        {
            return Err("no peer is reachable anymore".to_string());
        }
        Ok(())
    }
}

struct ClusterMember {
    chitchat_id: ChitchatId,
    chitchat_handle: ChitchatHandle,
    health: Mutex<MembershipHealth>,
    sweep_handle: JoinHandle<()>,
}

pub struct ClusterCacheStore {
    cluster_id: String,
    node_id: String,
    listen_addr: SocketAddr,
    peer_seeds: Vec<String>,
    gossip_interval: Duration,
    transport: Arc<dyn Transport>,
    member_opt: RwLock<Option<ClusterMember>>,
    // Key-values published by the last member, kept between `leave` and `reconnect`.
    retained_key_values: Mutex<Vec<(String, String)>>,
    clock: MonotonicClock,
    default_ttl: Duration,
}

impl ClusterCacheStore {
    /// Joins the cache cluster described by `replicated_config`.
    pub async fn join(
        replicated_config: &ReplicatedCacheConfig,
        default_ttl: Duration,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let cluster_cache_store = Self {
            cluster_id: replicated_config.cluster_id.clone(),
            node_id: replicated_config.node_id.clone(),
            listen_addr: replicated_config.listen_address,
            peer_seeds: replicated_config.peer_seeds.clone(),
            gossip_interval: *replicated_config.gossip_interval,
            transport,
            member_opt: RwLock::new(None),
            retained_key_values: Mutex::new(Vec::new()),
            clock: MonotonicClock::default(),
            default_ttl,
        };
        let member = cluster_cache_store.spawn_member(Vec::new()).await?;
        *cluster_cache_store.member_opt.write().await = Some(member);
        Ok(cluster_cache_store)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    fn membership_timeout(&self) -> Duration {
        self.gossip_interval * MEMBERSHIP_TIMEOUT_NUM_GOSSIP_INTERVALS
    }

    async fn spawn_member(
        &self,
        initial_key_values: Vec<(String, String)>,
    ) -> anyhow::Result<ClusterMember> {
        // A new generation lets peers tell a rejoining node from its previous incarnation.
        let generation_id = self.clock.tick();
        let chitchat_id = ChitchatId::new(self.node_id.clone(), generation_id, self.listen_addr);
        info!(
            cluster_id=%self.cluster_id,
            node_id=%self.node_id,
            generation_id=%generation_id,
            listen_addr=%self.listen_addr,
            peer_seeds=%self.peer_seeds.join(", "),
            num_key_values=initial_key_values.len(),
            "joining cache cluster"
        );
        let chitchat_config = ChitchatConfig {
            cluster_id: self.cluster_id.clone(),
            chitchat_id: chitchat_id.clone(),
            listen_addr: self.listen_addr,
            seed_nodes: self.peer_seeds.clone(),
            failure_detector_config: FailureDetectorConfig {
                initial_interval: self.gossip_interval,
                ..Default::default()
            },
            gossip_interval: self.gossip_interval,
            marked_for_deletion_grace_period: MARKED_FOR_DELETION_GRACE_PERIOD,
        };
        let chitchat_handle =
            spawn_chitchat(chitchat_config, initial_key_values, self.transport.as_ref()).await?;
        let sweep_handle = spawn_sweep_loop(&chitchat_handle.chitchat(), self.gossip_interval);
        Ok(ClusterMember {
            chitchat_id,
            chitchat_handle,
            health: Mutex::new(MembershipHealth::new(Instant::now())),
            sweep_handle,
        })
    }

    /// Leaves the cluster. Until [`Reconnect::reconnect`] is called, every operation fails
    /// with [`CacheError::MembershipLost`].
    pub async fn leave(&self) {
        let member_opt = self.member_opt.write().await.take();
        if let Some(member) = member_opt {
            let published_key_values = shutdown_member(member).await;
            *self.retained_key_values.lock().await = published_key_values;
        }
    }

    fn membership_lost(&self, reason: &str) -> CacheError {
        CacheError::MembershipLost(format!(
            "node `{}` of cluster `{}`: {reason}",
            self.node_id, self.cluster_id
        ))
    }

    /// Locks the chitchat state of the current member, after checking that the member is still
    /// part of the cluster.
    async fn lock_chitchat(&self) -> CacheResult<OwnedMutexGuard<Chitchat>> {
        let member_guard = self.member_opt.read().await;
        let Some(member) = member_guard.as_ref() else {
            return Err(self.membership_lost("not a member of the cluster"));
        };
        let chitchat_guard = member.chitchat_handle.chitchat().lock_owned().await;

        let self_chitchat_id = chitchat_guard.self_chitchat_id();
        let heartbeat = chitchat_guard
            .node_state(self_chitchat_id)
            .map(|node_state| u64::from(node_state.hearbeat()))
            .unwrap_or_default();
        let num_live_peers = chitchat_guard
            .live_nodes()
            .filter(|chitchat_id| *chitchat_id != self_chitchat_id)
            .count();
        let observation = member.health.lock().await.observe(
            heartbeat,
            num_live_peers,
            !self.peer_seeds.is_empty(),
            self.membership_timeout(),
            Instant::now(),
        );
        if let Err(reason) = observation {
            warn!(
                node_id=%self.node_id,
                generation_id=%member.chitchat_id.generation_id,
                reason=%reason,
                "cache cluster membership lost"
            );
            return Err(self.membership_lost(&reason));
        }
        Ok(chitchat_guard)
    }

    async fn write_entry(
        &self,
        namespace: &str,
        key: &str,
        entry: VersionedEntry,
    ) -> CacheResult<()> {
        let mut entry_json = serde_json::to_string(&entry)?;

        if entry_json.len() > MAX_ENTRY_NUM_BYTES {
            debug!(
                namespace=%namespace,
                key=%key,
                num_bytes=entry_json.len(),
                "cache entry too large to be replicated, writing a tombstone instead"
            );
            entry_json = serde_json::to_string(&VersionedEntry::tombstone(entry.written_at))?;
        }
        let mut chitchat_guard = self.lock_chitchat().await?;
        chitchat_guard
            .self_node_state()
            .set(entry_key(namespace, key), entry_json);
        Ok(())
    }
}

/// Shuts the member down and returns the cache key-values it still published.
async fn shutdown_member(member: ClusterMember) -> Vec<(String, String)> {
    info!(
        node_id=%member.chitchat_id.node_id,
        generation_id=%member.chitchat_id.generation_id,
        "leaving cache cluster"
    );
    member.sweep_handle.abort();

    let published_key_values = {
        let chitchat = member.chitchat_handle.chitchat();
        let mut chitchat_guard = chitchat.lock().await;
        sweep_self_node_state(&mut chitchat_guard, now_nanos());
        published_key_values(&chitchat_guard)
    };
    if let Err(error) = member.chitchat_handle.shutdown().await {
        warn!(error=?error, "failed to shut down cache cluster member");
    }
    published_key_values
}

fn published_key_values(chitchat: &Chitchat) -> Vec<(String, String)> {
    let Some(self_node_state) = chitchat.node_state(chitchat.self_chitchat_id()) else {
        return Vec::new();
    };
    self_node_state
        .iter_prefix(CACHE_KEY_PREFIX)
        .chain(self_node_state.iter_prefix(CLEAR_KEY_PREFIX))
        .map(|(key, versioned_value)| (key.to_string(), versioned_value.value.clone()))
        .collect()
}

fn spawn_sweep_loop(chitchat: &Arc<Mutex<Chitchat>>, sweep_interval: Duration) -> JoinHandle<()> {
    let weak_chitchat = Arc::downgrade(chitchat);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let Some(chitchat) = weak_chitchat.upgrade() else {
                return;
            };
            let mut chitchat_guard = chitchat.lock().await;
            sweep_self_node_state(&mut chitchat_guard, now_nanos());
        }
    })
}

/// Marks for deletion the entries this node published that can no longer be served: expired
/// or undecodable values, and entries superseded by a newer write or clear from a live peer.
fn sweep_self_node_state(chitchat: &mut Chitchat, now: u64) {
    let self_chitchat_id = chitchat.self_chitchat_id().clone();

    let obsolete_keys: Vec<String> = {
        let mut peer_written_at: HashMap<&str, u64> = HashMap::new();
        let mut peer_cleared_at: HashMap<&str, u64> = HashMap::new();

        for chitchat_id in chitchat.live_nodes() {
            if *chitchat_id == self_chitchat_id {
                continue;
            }
            let Some(node_state) = chitchat.node_state(chitchat_id) else {
                continue;
            };
            for (key, versioned_value) in node_state.iter_prefix(CACHE_KEY_PREFIX) {
                if let Ok(entry) = serde_json::from_str::<VersionedEntry>(&versioned_value.value) {
                    let written_at = peer_written_at.entry(key).or_default();
                    *written_at = (*written_at).max(entry.written_at);
                }
            }
            for (key, versioned_value) in node_state.iter_prefix(CLEAR_KEY_PREFIX) {
                if let Ok(cleared_at) = versioned_value.value.parse::<u64>() {
                    let namespace = &key[CLEAR_KEY_PREFIX.len()..];
                    let namespace_cleared_at = peer_cleared_at.entry(namespace).or_default();
                    *namespace_cleared_at = (*namespace_cleared_at).max(cleared_at);
                }
            }
        }
        let Some(self_node_state) = chitchat.node_state(&self_chitchat_id) else {
            return;
        };
        self_node_state
            .iter_prefix(CACHE_KEY_PREFIX)
            .filter(|(key, versioned_value)| {
                let Ok(entry) = serde_json::from_str::<VersionedEntry>(&versioned_value.value)
                else {
                    return true;
                };
                if entry.has_expired(now) {
                    return true;
                }
                if peer_written_at
                    .get(key)
                    .is_some_and(|written_at| *written_at > entry.written_at)
                {
                    return true;
                }
                entry_namespace(key)
                    .and_then(|namespace| peer_cleared_at.get(namespace))
                    .is_some_and(|cleared_at| entry.written_at <= *cleared_at)
            })
            .map(|(key, _)| key.to_string())
            .collect()
    };
    for obsolete_key in obsolete_keys {
        debug!(key=%obsolete_key, "withdrawing obsolete cache entry");
        chitchat.self_node_state().mark_for_deletion(&obsolete_key);
    }
}

#[async_trait]
impl CacheStore for ClusterCacheStore {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<JsonValue>> {
        let chitchat_guard = self.lock_chitchat().await?;

        let entry_key = entry_key(namespace, key);
        let clear_key = clear_key(namespace);

        let mut cleared_at = 0;
        let mut newest_entry_opt: Option<(u64, &str, VersionedEntry)> = None;

        for chitchat_id in chitchat_guard.live_nodes() {
            let Some(node_state) = chitchat_guard.node_state(chitchat_id) else {
                continue;
            };
            if let Some(node_cleared_at) = live_value(node_state, &clear_key)
                .and_then(|cleared_at_str| cleared_at_str.parse::<u64>().ok())
            {
                cleared_at = cleared_at.max(node_cleared_at);
            }
            let Some(entry_json) = live_value(node_state, &entry_key) else {
                continue;
            };
            let entry: VersionedEntry = match serde_json::from_str(entry_json) {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(
                        node_id=%chitchat_id.node_id,
                        key=%entry_key,
                        error=?error,
                        "failed to deserialize replicated cache entry"
                    );
                    continue;
                }
            };
            let is_newer = match &newest_entry_opt {
                Some((written_at, node_id, _)) => {
                    (entry.written_at, chitchat_id.node_id.as_str()) > (*written_at, *node_id)
                }
                None => true,
            };
            if is_newer {
                newest_entry_opt = Some((entry.written_at, &chitchat_id.node_id, entry));
            }
        }
        let Some((_, _, newest_entry)) = newest_entry_opt else {
            return Ok(None);
        };
        if newest_entry.written_at <= cleared_at || newest_entry.expires_at <= now_nanos() {
            return Ok(None);
        }
        Ok(newest_entry.value)
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: JsonValue,
        ttl_opt: Option<Duration>,
    ) -> CacheResult<()> {
        let ttl = ttl_opt.unwrap_or(self.default_ttl);
        let written_at = self.clock.tick();
        let ttl_nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
        let entry = VersionedEntry {
            written_at,
            expires_at: written_at.saturating_add(ttl_nanos),
            value: Some(value),
        };
        self.write_entry(namespace, key, entry).await
    }

    async fn remove(&self, namespace: &str, key: &str) -> CacheResult<()> {
        let entry = VersionedEntry::tombstone(self.clock.tick());
        self.write_entry(namespace, key, entry).await
    }

    async fn clear_namespace(&self, namespace: &str) -> CacheResult<()> {
        let mut chitchat_guard = self.lock_chitchat().await?;
        let cleared_at = self.clock.tick();
        let prefix = namespace_prefix(namespace);

        chitchat_guard
            .self_node_state()
            .set(clear_key(namespace), cleared_at.to_string());

        // The clear marker shadows every entry of the namespace written so far.
        let obsolete_keys: Vec<String> = chitchat_guard
            .self_node_state()
            .iter_prefix(&prefix)
            .map(|(key, _)| key.to_string())
            .collect();
        for obsolete_key in obsolete_keys {
            chitchat_guard
                .self_node_state()
                .mark_for_deletion(&obsolete_key);
        }
        Ok(())
    }
}

#[async_trait]
impl Reconnect for ClusterCacheStore {
    async fn reconnect(&self) -> CacheResult<()> {
        let mut member_guard = self.member_opt.write().await;

        let initial_key_values = match member_guard.take() {
            Some(member) => shutdown_member(member).await,
            None => std::mem::take(&mut *self.retained_key_values.lock().await),
        };
        match self.spawn_member(initial_key_values.clone()).await {
            Ok(member) => {
                *member_guard = Some(member);
                Ok(())
            }
            Err(error) => {
                *self.retained_key_values.lock().await = initial_key_values;
                Err(CacheError::Join(error.to_string()))
            }
        }
    }
}
