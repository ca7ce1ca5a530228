pub mod api;
pub mod server;
pub mod types;

pub use api::LockstepApiServer;
pub use server::{RpcServer, RpcServerState};
pub use types::{RpcEscrow, RpcHealth, RpcLedgerHealth, RpcSide, RpcSwap};
