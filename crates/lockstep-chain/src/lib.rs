pub mod adapter;
pub mod backoff;
pub mod error;
pub mod memory;
pub mod rpc;

pub use adapter::{ChainAdapter, CreateEscrowParams, EventBatch, Receipt};
pub use backoff::backoff_delay_ms;
pub use error::ChainError;
pub use memory::MemoryChain;
pub use rpc::RpcChain;
