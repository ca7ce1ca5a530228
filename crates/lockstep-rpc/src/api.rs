use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{RpcHealth, RpcSwap};

/// Lockstep operator JSON-RPC 2.0 API.
///
/// All method names are prefixed with "lockstep_" via `namespace`.
#[rpc(server, namespace = "lockstep")]
pub trait LockstepApi {
    /// Ledger connectivity, store reachability, ingestor cursor lag and
    /// incident counters.
    #[method(name = "health")]
    async fn health(&self) -> RpcResult<RpcHealth>;

    /// Every non-terminal swap, escrow snapshots included.
    #[method(name = "listActiveSwaps")]
    async fn list_active_swaps(&self) -> RpcResult<Vec<RpcSwap>>;

    /// One swap by its 64-char hex id, or null if unknown (or purged).
    #[method(name = "getSwap")]
    async fn get_swap(&self, swap_id: String) -> RpcResult<Option<RpcSwap>>;

    /// Schedule refunds for all still-locked sides of a swap regardless of
    /// auto-policy. Refunds still wait for each side's on-chain deadline.
    /// Returns the updated swap.
    #[method(name = "forceRefund")]
    async fn force_refund(&self, swap_id: String) -> RpcResult<RpcSwap>;
}
