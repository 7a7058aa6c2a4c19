// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backing store.
//!
//! Standalone servers get a small pool of multiplexed
//! [`ConnectionManager`]s picked round-robin. When the seed answers
//! `CLUSTER NODES` the store switches to a [`ClusterConnection`], which
//! follows `MOVED`/`ASK` redirects for single-key commands. Work spanning
//! keys or nodes is split by hash slot (see [`super::cluster`]):
//!
//! - batches and multi-key DEL: one pipeline per master
//! - SCAN: every master in turn, behind one cursor
//! - INFO and CONFIG SET: sent to every master
//!
//! Every command runs under the configured command timeout; the handshake
//! retries with backoff, commands never do.
//!
//! Keys are namespaced with an optional prefix:
//! ```text
//! prefix "myapp:" + key "user:1"  →  "myapp:user:1"
//! ```
//!
//! Topology comes from `CLUSTER NODES`. A standalone server (cluster
//! support disabled) reports itself as a single healthy node.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::cluster_routing::{Route, RoutingInfo, SingleNodeRoutingInfo, SlotAddr};
use redis::{cmd, pipe, Client, Cmd, FromRedisValue, Pipeline, RedisFuture, RedisResult, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cluster::{decode_cursor, encode_cursor, key_slot, split_address, NodeRoute, SlotMap};
use super::traits::{BackingStore, BatchOp, KeyMetadata, NodeInfo, ScanPage, ServerStats, StorageError, WriteBatch};
use crate::config::{CacheEngineConfig, ClusterMode, EvictionPolicy};
use crate::resilience::retry::{retry, RetryConfig};

/// A pooled standalone connection or the shared cluster connection.
#[derive(Clone)]
enum Connection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

impl ConnectionLike for Connection {
    fn req_packed_command<'a>(&'a mut self, command: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Self::Standalone(conn) => conn.req_packed_command(command),
            Self::Cluster(conn) => conn.req_packed_command(command),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        pipeline: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Self::Standalone(conn) => conn.req_packed_commands(pipeline, offset, count),
            Self::Cluster(conn) => conn.req_packed_commands(pipeline, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Self::Standalone(conn) => conn.get_db(),
            Self::Cluster(conn) => conn.get_db(),
        }
    }
}

struct ClusterRouting {
    conn: ClusterConnection,
    /// Refreshed from every `CLUSTER NODES` reply and after a failed pipeline
    slots: RwLock<SlotMap>,
}

pub struct RedisStore {
    pool: Vec<Connection>,
    next: AtomicUsize,
    cluster: Option<ClusterRouting>,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:user:1")
    prefix: String,
    address: String,
    command_timeout: Duration,
}

impl RedisStore {
    /// Connect using the address, pool and timeout settings in `config`.
    ///
    /// Seed addresses are tried in order. In cluster mode every seed is
    /// handed to the cluster client; otherwise the first reachable one is
    /// used for the whole pool.
    pub async fn connect(config: &CacheEngineConfig) -> Result<Self, StorageError> {
        Self::connect_with_retry(config, &RetryConfig::connect()).await
    }

    pub async fn connect_with_retry(
        config: &CacheEngineConfig,
        retry_config: &RetryConfig,
    ) -> Result<Self, StorageError> {
        let mut last_err = StorageError::Unavailable("no addresses configured".into());

        for address in &config.addrs {
            match Self::connect_seed(address, config, retry_config).await {
                Ok(store) => {
                    if config.apply_eviction_policy {
                        store.apply_eviction_policy(config.eviction_policy, config.max_memory_bytes).await?;
                    }
                    return Ok(store);
                }
                Err(e) => {
                    warn!(%address, error = %e, "Redis seed unreachable");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn connect_seed(
        address: &str,
        config: &CacheEngineConfig,
        retry_config: &RetryConfig,
    ) -> Result<Self, StorageError> {
        let client = Client::open(address).map_err(|e| StorageError::Backend(e.to_string()))?;
        let first = Self::open_connection(&client, config, retry_config).await?;

        if config.cluster_mode != ClusterMode::Standalone {
            match cluster_nodes(&first, config.command_timeout()).await? {
                Some(text) => return Self::connect_cluster(address, &text, config, retry_config).await,
                None if config.cluster_mode == ClusterMode::Cluster => {
                    return Err(StorageError::Backend(format!("{address} has cluster support disabled")));
                }
                None => {}
            }
        }

        let size = config.pool_size.max(1);
        let mut pool = Vec::with_capacity(size);
        pool.push(Connection::Standalone(first));
        while pool.len() < size {
            pool.push(Connection::Standalone(Self::open_connection(&client, config, retry_config).await?));
        }
        info!(%address, connections = pool.len(), "Connected to Redis");

        Ok(Self {
            pool,
            next: AtomicUsize::new(0),
            cluster: None,
            prefix: config.key_prefix.clone(),
            address: address.to_string(),
            command_timeout: config.command_timeout(),
        })
    }

    async fn open_connection(
        client: &Client,
        config: &CacheEngineConfig,
        retry_config: &RetryConfig,
    ) -> Result<ConnectionManager, StorageError> {
        let connect_timeout = config.connect_timeout();
        retry("redis_connect", retry_config, || {
            let client = client.clone();
            async move {
                match tokio::time::timeout(connect_timeout, ConnectionManager::new(client)).await {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(StorageError::Unavailable(e.to_string())),
                    Err(_) => Err(StorageError::Timeout { operation: "connect", after: connect_timeout }),
                }
            }
        })
        .await
    }

    async fn connect_cluster(
        address: &str,
        nodes: &str,
        config: &CacheEngineConfig,
        retry_config: &RetryConfig,
    ) -> Result<Self, StorageError> {
        let client = ClusterClient::new(config.addrs.clone()).map_err(|e| StorageError::Backend(e.to_string()))?;
        let connect_timeout = config.connect_timeout();
        let conn = retry("redis_cluster_connect", retry_config, || {
            let client = client.clone();
            async move {
                match tokio::time::timeout(connect_timeout, client.get_async_connection()).await {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(StorageError::Unavailable(e.to_string())),
                    Err(_) => Err(StorageError::Timeout { operation: "connect", after: connect_timeout }),
                }
            }
        })
        .await?;

        let slots = SlotMap::from_cluster_nodes(nodes);
        info!(%address, masters = slots.masters().len(), "Connected to Redis Cluster");

        Ok(Self {
            pool: vec![Connection::Cluster(conn.clone())],
            next: AtomicUsize::new(0),
            cluster: Some(ClusterRouting { conn, slots: RwLock::new(slots) }),
            prefix: config.key_prefix.clone(),
            address: address.to_string(),
            command_timeout: config.command_timeout(),
        })
    }

    /// Set `maxmemory-policy` (and `maxmemory`, when non-zero) on every
    /// master.
    pub async fn apply_eviction_policy(
        &self,
        policy: EvictionPolicy,
        max_memory_bytes: u64,
    ) -> Result<(), StorageError> {
        let mut set_policy = cmd("CONFIG");
        set_policy.arg("SET").arg("maxmemory-policy").arg(policy.redis_policy());
        self.on_every_node::<()>("config_set", set_policy).await?;

        if max_memory_bytes > 0 {
            let mut set_memory = cmd("CONFIG");
            set_memory.arg("SET").arg("maxmemory").arg(max_memory_bytes);
            self.on_every_node::<()>("config_set", set_memory).await?;
        }
        info!(policy = policy.redis_policy(), max_memory_bytes, "Applied eviction policy");
        Ok(())
    }

    /// Get the configured prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the store is routing by cluster hash slots.
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.cluster.is_some()
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix(&self, key: String) -> String {
        if self.prefix.is_empty() {
            key
        } else {
            match key.strip_prefix(&self.prefix) {
                Some(stripped) => stripped.to_string(),
                None => key,
            }
        }
    }

    /// EXISTS on an already prefixed key.
    async fn exists_raw(&self, key: &str) -> Result<bool, StorageError> {
        let count = self
            .run("exists", |mut conn| async move {
                cmd("EXISTS").arg(key).query_async::<u64>(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    fn conn(&self) -> Connection {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        self.pool[i].clone()
    }

    /// Run one command on the next pooled connection under the command timeout.
    async fn run<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, f(self.conn())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_redis_error(e)),
            Err(_) => Err(StorageError::Timeout { operation, after: self.command_timeout }),
        }
    }

    /// Run one command on an explicit cluster route under the command timeout.
    async fn run_routed<T: FromRedisValue>(
        &self,
        operation: &'static str,
        routing: &ClusterRouting,
        command: &Cmd,
        route: RoutingInfo,
    ) -> Result<T, StorageError> {
        let mut conn = routing.conn.clone();
        let value = match tokio::time::timeout(self.command_timeout, conn.route_command(command, route)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(map_redis_error(e)),
            Err(_) => return Err(StorageError::Timeout { operation, after: self.command_timeout }),
        };
        redis::from_redis_value(&value).map_err(map_redis_error)
    }

    /// Send `command` to every master, or once to a standalone server.
    async fn on_every_node<T>(&self, operation: &'static str, command: Cmd) -> Result<Vec<T>, StorageError>
    where
        T: FromRedisValue + Send,
    {
        let Some(routing) = &self.cluster else {
            let reply = self
                .run(operation, |mut conn| async move { command.query_async::<T>(&mut conn).await })
                .await?;
            return Ok(vec![reply]);
        };

        let masters = self.masters(routing).await?;
        let mut replies = Vec::with_capacity(masters.len());
        for node in &masters {
            replies.push(self.run_routed(operation, routing, &command, node_route(node)?).await?);
        }
        Ok(replies)
    }

    /// Current masters, re-reading the slot map once if it is empty.
    async fn masters(&self, routing: &ClusterRouting) -> Result<Vec<String>, StorageError> {
        let masters = routing.slots.read().masters().to_vec();
        if !masters.is_empty() {
            return Ok(masters);
        }
        self.refresh_slots(routing).await?;
        let masters = routing.slots.read().masters().to_vec();
        if masters.is_empty() {
            return Err(StorageError::Unavailable("cluster reports no master owning slots".into()));
        }
        Ok(masters)
    }

    /// Re-read `CLUSTER NODES` into the slot map, returning the raw reply.
    async fn refresh_slots(&self, routing: &ClusterRouting) -> Result<String, StorageError> {
        let text = self
            .run("cluster_nodes", |mut conn| async move {
                cmd("CLUSTER").arg("NODES").query_async::<String>(&mut conn).await
            })
            .await?;
        *routing.slots.write() = SlotMap::from_cluster_nodes(&text);
        Ok(text)
    }

    /// Send each group's pipeline to its node, returning every reply in
    /// order. A failed group refreshes the slot map before the error is
    /// returned; groups already sent stay written.
    async fn run_cluster_pipelines(
        &self,
        operation: &'static str,
        routing: &ClusterRouting,
        groups: Vec<(NodeRoute, Pipeline)>,
    ) -> Result<Vec<Value>, StorageError> {
        let mut replies = Vec::new();
        for (node, pipeline) in groups {
            match self.run_routed_pipeline(operation, routing, &pipeline, &node).await {
                Ok(values) => replies.extend(values),
                Err(e) => {
                    if let Err(refresh) = self.refresh_slots(routing).await {
                        debug!(error = %refresh, "Slot map refresh failed");
                    }
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }

    async fn run_routed_pipeline(
        &self,
        operation: &'static str,
        routing: &ClusterRouting,
        pipeline: &Pipeline,
        node: &NodeRoute,
    ) -> Result<Vec<Value>, StorageError> {
        let route = match node {
            NodeRoute::Master(address) => {
                let (host, port) = split_address(address)
                    .ok_or_else(|| StorageError::Backend(format!("bad cluster node address {address}")))?;
                SingleNodeRoutingInfo::ByAddress { host, port }
            }
            NodeRoute::Slot(slot) => SingleNodeRoutingInfo::SpecificNode(Route::new(*slot, SlotAddr::Master)),
        };
        let count = pipeline.cmd_iter().count();
        let mut conn = routing.conn.clone();
        let values = match tokio::time::timeout(self.command_timeout, conn.route_pipeline(pipeline, 0, count, route)).await
        {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => return Err(map_redis_error(e)),
            Err(_) => return Err(StorageError::Timeout { operation, after: self.command_timeout }),
        };
        values
            .into_iter()
            .map(|value| value.extract_error().map_err(map_redis_error))
            .collect()
    }

    async fn scan_cluster(
        &self,
        routing: &ClusterRouting,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StorageError> {
        let masters = self.masters(routing).await?;
        let (index, node_cursor) = decode_cursor(cursor);
        let Some(node) = masters.get(index) else {
            // The cluster shrank under a running scan
            return Ok(ScanPage::default());
        };

        let mut command = cmd("SCAN");
        command.arg(node_cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(count);
        let (next, keys): (u64, Vec<String>) = self.run_routed("scan", routing, &command, node_route(node)?).await?;

        let cursor = if next != 0 {
            encode_cursor(index, next)?
        } else if index + 1 < masters.len() {
            encode_cursor(index + 1, 0)?
        } else {
            0
        };
        Ok(ScanPage {
            keys: keys.into_iter().map(|k| self.strip_prefix(k)).collect(),
            cursor,
        })
    }
}

/// `CLUSTER NODES` on a plain connection; `None` when cluster support is off.
async fn cluster_nodes(conn: &ConnectionManager, timeout: Duration) -> Result<Option<String>, StorageError> {
    let mut conn = conn.clone();
    let reply = tokio::time::timeout(timeout, cmd("CLUSTER").arg("NODES").query_async::<String>(&mut conn))
        .await
        .map_err(|_| StorageError::Timeout { operation: "cluster_nodes", after: timeout })?;
    match reply {
        Ok(text) => Ok(Some(text)),
        // "ERR This instance has cluster support disabled"
        Err(e) if e.kind() == redis::ErrorKind::ResponseError => Ok(None),
        Err(e) => Err(map_redis_error(e)),
    }
}

fn node_route(node: &str) -> Result<RoutingInfo, StorageError> {
    let (host, port) =
        split_address(node).ok_or_else(|| StorageError::Backend(format!("bad cluster node address {node}")))?;
    Ok(RoutingInfo::SingleNode(SingleNodeRoutingInfo::ByAddress { host, port }))
}

fn key_route(key: &str) -> RoutingInfo {
    RoutingInfo::SingleNode(SingleNodeRoutingInfo::SpecificNode(Route::new(key_slot(key), SlotAddr::Master)))
}

fn map_redis_error(e: redis::RedisError) -> StorageError {
    if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
        StorageError::Unavailable(e.to_string())
    } else {
        StorageError::Backend(e.to_string())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn add_batch_op(pipeline: &mut Pipeline, key: String, op: BatchOp) {
    match op {
        BatchOp::Set { value, ttl, .. } => {
            let c = pipeline.cmd("SET").arg(key).arg(value);
            if !ttl.is_zero() {
                c.arg("PX").arg(ttl_millis(ttl));
            }
            c.ignore();
        }
        BatchOp::Del { .. } => {
            pipeline.cmd("DEL").arg(key).ignore();
        }
        BatchOp::Expire { ttl, .. } => {
            pipeline.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
    }
}

/// Sum per-master `INFO` figures; a field missing on any node stays unknown.
fn merge_stats(total: ServerStats, node: ServerStats) -> ServerStats {
    let add = |a: Option<u64>, b: Option<u64>| Some(a? + b?);
    ServerStats {
        memory_used_bytes: add(total.memory_used_bytes, node.memory_used_bytes),
        evicted_keys: add(total.evicted_keys, node.evicted_keys),
        connections: total.connections + node.connections,
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = self.prefixed_key(key);
        self.run("get", |mut conn| async move {
            cmd("GET").arg(&key).query_async::<Option<Vec<u8>>>(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        let key = self.prefixed_key(key);
        self.run("set", |mut conn| async move {
            let mut c = cmd("SET");
            c.arg(&key).arg(value);
            if !ttl.is_zero() {
                c.arg("PX").arg(ttl_millis(ttl));
            }
            c.query_async::<()>(&mut conn).await
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        let Some(routing) = &self.cluster else {
            return self
                .run("del", |mut conn| async move {
                    cmd("DEL").arg(&keys).query_async::<u64>(&mut conn).await
                })
                .await;
        };

        // Multi-key DEL must stay inside one slot
        let groups = routing.slots.read().group_keys_by_slot(keys);
        let pipelines = groups
            .into_iter()
            .map(|(node, slots)| {
                let mut pipeline = pipe();
                for keys in slots {
                    pipeline.cmd("DEL").arg(keys);
                }
                (node, pipeline)
            })
            .collect();
        let mut deleted = 0;
        for reply in self.run_cluster_pipelines("del", routing, pipelines).await? {
            deleted += redis::from_redis_value::<u64>(&reply).map_err(map_redis_error)?;
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.exists_raw(&self.prefixed_key(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let key = self.prefixed_key(key);
        let updated = self
            .run("expire", |mut conn| async move {
                cmd("PEXPIRE").arg(&key).arg(ttl_millis(ttl)).query_async::<u64>(&mut conn).await
            })
            .await?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        let key = self.prefixed_key(key);
        let ms = self
            .run("ttl", |mut conn| async move {
                cmd("PTTL").arg(&key).query_async::<i64>(&mut conn).await
            })
            .await?;
        // -2: missing key, -1: no expiry
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StorageError> {
        let pattern = self.prefixed_key(pattern);
        if let Some(routing) = &self.cluster {
            return self.scan_cluster(routing, cursor, &pattern, count).await;
        }

        let (next, keys) = self
            .run("scan", |mut conn| async move {
                cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(count)
                    .query_async::<(u64, Vec<String>)>(&mut conn)
                    .await
            })
            .await?;
        Ok(ScanPage {
            keys: keys.into_iter().map(|k| self.strip_prefix(k)).collect(),
            cursor: next,
        })
    }

    async fn exec_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        let ops: Vec<(String, BatchOp)> =
            batch.into_ops().into_iter().map(|op| (self.prefixed_key(op.key()), op)).collect();

        let Some(routing) = &self.cluster else {
            let mut pipeline = pipe();
            for (key, op) in ops {
                add_batch_op(&mut pipeline, key, op);
            }
            self.run("exec_batch", |mut conn| async move {
                pipeline.query_async::<()>(&mut conn).await
            })
            .await?;
            debug!(count, "Pipelined batch executed");
            return Ok(());
        };

        let groups = routing.slots.read().group_by_node(ops, |(key, _)| key.as_str());
        let nodes = groups.len();
        let pipelines = groups
            .into_iter()
            .map(|(node, ops)| {
                let mut pipeline = pipe();
                for (key, op) in ops {
                    add_batch_op(&mut pipeline, key, op);
                }
                (node, pipeline)
            })
            .collect();
        self.run_cluster_pipelines("exec_batch", routing, pipelines).await?;
        debug!(count, nodes, "Pipelined batch executed");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.run("ping", |mut conn| async move {
            cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }

    async fn cluster_topology(&self) -> Result<Vec<NodeInfo>, StorageError> {
        if let Some(routing) = &self.cluster {
            let text = self.refresh_slots(routing).await?;
            return Ok(parse_cluster_nodes(&text));
        }

        let Connection::Standalone(conn) = self.conn() else {
            return Err(StorageError::Backend("standalone pool holds a cluster connection".into()));
        };
        match cluster_nodes(&conn, self.command_timeout).await? {
            Some(text) => Ok(parse_cluster_nodes(&text)),
            None => {
                debug!("Cluster mode unavailable, reporting single node");
                Ok(vec![NodeInfo {
                    id: self.address.clone(),
                    address: self.address.clone(),
                    weight: 1,
                    healthy: true,
                }])
            }
        }
    }

    async fn server_stats(&self) -> Result<ServerStats, StorageError> {
        let replies = self.on_every_node::<String>("info", cmd("INFO")).await?;
        let mut stats = replies
            .iter()
            .map(|info| parse_info(info))
            .reduce(merge_stats)
            .unwrap_or_default();
        stats.connections = match &self.cluster {
            Some(_) => replies.len(),
            None => self.pool.len(),
        };
        Ok(stats)
    }

    async fn key_metadata(&self, key: &str) -> Result<Option<KeyMetadata>, StorageError> {
        let key = self.prefixed_key(key);
        if !self.exists_raw(&key).await? {
            return Ok(None);
        }

        // IDLETIME errors under an LFU policy, FREQ under any other one
        let object = |subcommand: &'static str| {
            let key = key.clone();
            async move {
                let mut command = cmd("OBJECT");
                command.arg(subcommand).arg(&key);
                let reply = match &self.cluster {
                    Some(routing) => {
                        self.run_routed::<Option<u64>>("object", routing, &command, key_route(&key)).await
                    }
                    None => {
                        self.run("object", |mut conn| async move {
                            command.query_async::<Option<u64>>(&mut conn).await
                        })
                        .await
                    }
                };
                reply.ok().flatten()
            }
        };
        let idle_secs = object("IDLETIME").await;
        let access_count = object("FREQ").await;

        Ok(Some(KeyMetadata {
            created_at_ms: None,
            last_access_ms: idle_secs.map(|idle| crate::unix_millis().saturating_sub(idle * 1000)),
            access_count,
        }))
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Connections close when the last clone drops
        debug!(address = %self.address, cluster = self.is_cluster(), "Redis store closed");
        Ok(())
    }
}

/// Parse `CLUSTER NODES` output.
///
/// Line format: `<id> <ip:port@cport> <flags> <master> <ping> <pong> <epoch> <link-state> <slots>...`
/// A node is healthy when its link is `connected` and it is not flagged `fail`.
#[must_use]
pub fn parse_cluster_nodes(text: &str) -> Vec<NodeInfo> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return None;
            }
            let address = fields[1].split('@').next().unwrap_or(fields[1]);
            let failing = fields[2].split(',').any(|f| f == "fail" || f == "fail?");
            Some(NodeInfo {
                id: fields[0].to_string(),
                address: address.to_string(),
                weight: 1,
                healthy: fields[7] == "connected" && !failing,
            })
        })
        .collect()
}

/// Pull memory and eviction figures out of `INFO` output.
#[must_use]
pub fn parse_info(text: &str) -> ServerStats {
    let mut stats = ServerStats::default();
    for line in text.lines() {
        let Some((field, value)) = line.trim_end().split_once(':') else {
            continue;
        };
        match field {
            "used_memory" => stats.memory_used_bytes = value.parse().ok(),
            "evicted_keys" => stats.evicted_keys = value.parse().ok(),
            _ => {}
        }
    }
    stats
}
