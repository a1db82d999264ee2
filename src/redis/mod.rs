//! RESP wire layer shared by the Redis-backed store client and the
//! region store server.

mod command;
mod resp;
mod server;

pub use command::StoreCommand;
pub use resp::{RespCodec, RespError, RespValue};
pub use server::RegionStoreServer;
