//! Minimal Redis-compatible region store.
//!
//! Serves the command subset a region needs (PING, ECHO, GET, INCR, PFADD,
//! PFCOUNT) over one counter key and one estimator key, backed by an
//! `InMemoryCounterStore`. Other keys read as empty and reject writes.

use super::command::StoreCommand;
use super::resp::{RespCodec, RespValue};
use crate::store::{InMemoryCounterStore, StoreKeys};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

pub struct RegionStoreServer {
    listener: TcpListener,
    store: Arc<InMemoryCounterStore>,
    keys: StoreKeys,
}

impl RegionStoreServer {
    pub async fn bind(
        addr: &str,
        store: Arc<InMemoryCounterStore>,
        keys: StoreKeys,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(RegionStoreServer {
            listener,
            store,
            keys,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Region store listening on {}", addr),
            Err(e) => warn!("Region store listening on unknown address: {}", e),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let handler = ConnectionHandler {
                        framed: Framed::new(stream, RespCodec::server()),
                        store: Arc::clone(&self.store),
                        keys: self.keys.clone(),
                        client_addr: addr,
                    };
                    tokio::spawn(handler.run());
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

struct ConnectionHandler {
    framed: Framed<TcpStream, RespCodec>,
    store: Arc<InMemoryCounterStore>,
    keys: StoreKeys,
    client_addr: SocketAddr,
}

impl ConnectionHandler {
    async fn run(mut self) {
        debug!("Client connected: {}", self.client_addr);

        while let Some(frame) = self.framed.next().await {
            let request = match frame {
                Ok(request) => request,
                Err(e) => {
                    warn!("Dropping client {}: {}", self.client_addr, e);
                    let _ = self.framed.send(RespValue::error(format!("ERR {}", e))).await;
                    return;
                }
            };

            let response = match StoreCommand::from_resp(&request) {
                Ok(command) => execute(&self.store, &self.keys, command),
                Err(e) => {
                    warn!("Invalid command from {}: {}", self.client_addr, e);
                    RespValue::error(format!("ERR {}", e))
                }
            };

            if let Err(e) = self.framed.send(response).await {
                error!("Failed to write response to {}: {}", self.client_addr, e);
                return;
            }
        }

        debug!("Client disconnected: {}", self.client_addr);
    }
}

fn execute(store: &InMemoryCounterStore, keys: &StoreKeys, command: StoreCommand) -> RespValue {
    match command {
        StoreCommand::Ping(None) => RespValue::pong(),
        StoreCommand::Ping(Some(message)) | StoreCommand::Echo(message) => RespValue::bulk(message),
        StoreCommand::Get(key) if key == keys.counter => {
            RespValue::bulk(store.value().to_string())
        }
        StoreCommand::Get(_) => RespValue::nil(),
        StoreCommand::Incr(key) if key == keys.counter => RespValue::Integer(store.incr() as i64),
        StoreCommand::PfAdd(key, members) if key == keys.uniques => {
            let changed = members
                .iter()
                .fold(false, |changed, member| store.add_unique(member) || changed);
            RespValue::Integer(i64::from(changed))
        }
        StoreCommand::PfCount(key) if key == keys.uniques => {
            RespValue::Integer(store.unique_count() as i64)
        }
        StoreCommand::PfCount(_) => RespValue::Integer(0),
        StoreCommand::Incr(key) | StoreCommand::PfAdd(key, _) => {
            RespValue::error(format!("ERR key '{}' is not served by this region", key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> StoreCommand {
        StoreCommand::from_resp(&RespValue::command(parts)).unwrap()
    }

    #[test]
    fn test_execute_counter_commands() {
        let store = InMemoryCounterStore::new();
        let keys = StoreKeys::default();

        assert_eq!(
            execute(&store, &keys, command(&["GET", "post:1:likes"])),
            RespValue::bulk("0")
        );
        assert_eq!(
            execute(&store, &keys, command(&["INCR", "post:1:likes"])),
            RespValue::Integer(1)
        );
        assert_eq!(execute(&store, &keys, command(&["GET", "other"])), RespValue::nil());
        assert!(matches!(
            execute(&store, &keys, command(&["INCR", "other"])),
            RespValue::Error(_)
        ));
    }

    #[test]
    fn test_execute_estimator_commands() {
        let store = InMemoryCounterStore::new();
        let keys = StoreKeys::default();

        assert_eq!(
            execute(&store, &keys, command(&["PFADD", "post:1:uniques", "a", "b"])),
            RespValue::Integer(1)
        );
        assert_eq!(
            execute(&store, &keys, command(&["PFADD", "post:1:uniques", "a"])),
            RespValue::Integer(0)
        );
        assert_eq!(
            execute(&store, &keys, command(&["PFCOUNT", "post:1:uniques"])),
            RespValue::Integer(2)
        );
        assert_eq!(
            execute(&store, &keys, command(&["PING"])),
            RespValue::pong()
        );
    }
}
