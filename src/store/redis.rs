//! Redis-backed regional store
//!
//! Talks RESP to a real Redis (or `RegionStoreServer`). Idle connections are
//! kept in a bounded lock-free queue. A request checks a connection out and
//! only puts it back after a complete request/response exchange, so a
//! request abandoned on timeout takes its connection down with it and can
//! never leave a half-read reply behind for another caller.
//!
//! On checkout an idle connection is dropped if it sat in the pool longer
//! than the idle timeout or if the server already closed it.

use super::{CounterStore, StoreFuture, StoreKeys};
use crate::error::{StoreError, StoreResult};
use crate::redis::{RespCodec, RespValue, StoreCommand};
use crossbeam::queue::ArrayQueue;
use futures::{SinkExt, StreamExt};
use std::io::{Error as IoError, ErrorKind};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

type Connection = Framed<TcpStream, RespCodec>;

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

impl IdleConnection {
    fn is_reusable(&self, idle_timeout: Duration) -> bool {
        if self.since.elapsed() >= idle_timeout || !self.conn.read_buffer().is_empty() {
            return false;
        }
        let mut peek = [0u8; 1];
        match self.conn.get_ref().try_read(&mut peek) {
            Err(e) => e.kind() == ErrorKind::WouldBlock,
            // EOF from a closed peer, or bytes nobody asked for
            Ok(_) => false,
        }
    }
}

pub struct RedisCounterStore {
    endpoint: String,
    keys: StoreKeys,
    connect_timeout: Duration,
    idle_timeout: Duration,
    idle: ArrayQueue<IdleConnection>,
}

impl RedisCounterStore {
    pub fn new(endpoint: impl Into<String>, keys: StoreKeys) -> Self {
        RedisCounterStore {
            endpoint: endpoint.into(),
            keys,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            idle: ArrayQueue::new(DEFAULT_POOL_SIZE),
        }
    }

    /// Maximum number of idle connections kept for reuse.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.idle = ArrayQueue::new(pool_size.max(1));
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// How long a connection may sit in the pool before it is discarded.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.len()
    }

    async fn checkout(&self) -> StoreResult<Connection> {
        while let Some(idle) = self.idle.pop() {
            if idle.is_reusable(self.idle_timeout) {
                return Ok(idle.conn);
            }
            debug!("Discarding stale connection to store {}", self.endpoint);
        }

        let started = Instant::now();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.endpoint.as_str()))
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "connect",
                elapsed_ms: started.elapsed().as_millis() as u64,
            })??;
        let _ = stream.set_nodelay(true);
        debug!("Opened connection to store {}", self.endpoint);

        Ok(Framed::new(stream, RespCodec::client()))
    }

    fn checkin(&self, conn: Connection) {
        // A full pool just closes the surplus connection
        let _ = self.idle.push(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }

    async fn request(&self, command: StoreCommand) -> StoreResult<RespValue> {
        let mut conn = self.checkout().await?;

        conn.send(command.to_resp()).await?;
        let reply = match conn.next().await {
            Some(frame) => frame?,
            None => {
                return Err(StoreError::Connection(IoError::new(
                    ErrorKind::ConnectionReset,
                    "connection closed by store",
                )))
            }
        };

        self.checkin(conn);

        match reply {
            RespValue::Error(msg) => Err(StoreError::Protocol(format!(
                "{} failed: {}",
                command.name(),
                msg
            ))),
            other => Ok(other),
        }
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("endpoint", &self.endpoint)
            .field("keys", &self.keys)
            .field("idle", &self.idle.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl CounterStore for RedisCounterStore {
    fn counter(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let reply = self.request(StoreCommand::Get(self.keys.counter.clone())).await?;
            match reply {
                RespValue::BulkString(None) => Ok(0),
                RespValue::BulkString(Some(data)) => parse_count(&data),
                RespValue::Integer(n) => non_negative(n),
                other => Err(unexpected("GET", &other)),
            }
        })
    }

    fn unique_estimate(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let reply = self
                .request(StoreCommand::PfCount(self.keys.uniques.clone()))
                .await?;
            match reply {
                RespValue::Integer(n) => non_negative(n),
                other => Err(unexpected("PFCOUNT", &other)),
            }
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            match self.request(StoreCommand::Ping(None)).await? {
                RespValue::SimpleString(s) if s == "PONG" => Ok(()),
                other => Err(unexpected("PING", &other)),
            }
        })
    }

    fn increment(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            match self.request(StoreCommand::Incr(self.keys.counter.clone())).await? {
                RespValue::Integer(n) => non_negative(n),
                other => Err(unexpected("INCR", &other)),
            }
        })
    }

    fn add_visitor<'a>(&'a self, visitor_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let command = StoreCommand::PfAdd(self.keys.uniques.clone(), vec![visitor_id.to_string()]);
            match self.request(command).await? {
                RespValue::Integer(n) => Ok(n == 1),
                other => Err(unexpected("PFADD", &other)),
            }
        })
    }

    fn connect(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let conn = self.checkout().await?;
            self.checkin(conn);
            Ok(())
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn parse_count(data: &[u8]) -> StoreResult<u64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            StoreError::Protocol(format!(
                "counter is not a non-negative integer: {}",
                String::from_utf8_lossy(data)
            ))
        })
}

fn non_negative(n: i64) -> StoreResult<u64> {
    u64::try_from(n).map_err(|_| StoreError::Protocol(format!("negative count: {}", n)))
}

fn unexpected(command: &str, reply: &RespValue) -> StoreError {
    StoreError::Protocol(format!("unexpected {} reply: {:?}", command, reply))
}
