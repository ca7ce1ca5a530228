use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use lockstep_core::swap::Swap;
use lockstep_core::types::{LedgerId, SwapId};
use lockstep_engine::SwapEngine;
use lockstep_ingest::IngestStatus;
use lockstep_store::SwapStore;

use crate::api::LockstepApiServer;
use crate::types::{RpcHealth, RpcLedgerHealth, RpcSwap};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub store: Arc<SwapStore>,
    pub engine: Arc<SwapEngine>,
    pub status_a: Arc<IngestStatus>,
    pub status_b: Arc<IngestStatus>,
    pub network: String,
    pub fee_bps: u32,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "operator RPC started");
        Ok(handle)
    }

    fn swap_view(&self, swap: &Swap) -> RpcResult<RpcSwap> {
        let load = |ledger| -> RpcResult<Option<lockstep_core::escrow::Escrow>> {
            match swap.side(ledger) {
                Some(side) => self
                    .state
                    .store
                    .get_escrow(&side.escrow_id)
                    .map_err(|e| rpc_err(-32603, e.to_string())),
                None => Ok(None),
            }
        };
        let escrow_a = load(LedgerId::A)?;
        let escrow_b = load(LedgerId::B)?;
        Ok(RpcSwap::from_swap(swap, escrow_a.as_ref(), escrow_b.as_ref(), self.state.fee_bps))
    }
}

fn ledger_health(ledger: LedgerId, status: &IngestStatus) -> RpcLedgerHealth {
    RpcLedgerHealth {
        ledger: ledger.to_string(),
        connected: status.connected.load(Ordering::Relaxed),
        head_height: status.head_height.load(Ordering::Relaxed),
        cursor_height: status.cursor_height.load(Ordering::Relaxed),
        cursor_lag: status.lag(),
        events_ingested: status.events_ingested.load(Ordering::Relaxed),
        cursor_rewinds: status.cursor_rewinds.load(Ordering::Relaxed),
    }
}

#[async_trait]
impl LockstepApiServer for RpcServer {
    async fn health(&self) -> RpcResult<RpcHealth> {
        // A cursor read exercises the store end to end.
        let store_ok = self.state.store.cursor(LedgerId::A).is_ok();
        let active = self
            .state
            .store
            .active_swaps()
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        let ambiguous = active.iter().filter(|s| s.ambiguous).count() as u64;

        let ledger_a = ledger_health(LedgerId::A, &self.state.status_a);
        let ledger_b = ledger_health(LedgerId::B, &self.state.status_b);
        let ok = store_ok && ledger_a.connected && ledger_b.connected;

        Ok(RpcHealth {
            ok,
            network: self.state.network.clone(),
            store_ok,
            ledger_a,
            ledger_b,
            active_swaps: active.len() as u64,
            ambiguous_swaps: ambiguous,
            incidents: self.state.engine.incident_count(),
        })
    }

    async fn list_active_swaps(&self) -> RpcResult<Vec<RpcSwap>> {
        let mut swaps = self
            .state
            .store
            .active_swaps()
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        swaps.sort_by_key(|s| s.created_ms);
        swaps.iter().map(|s| self.swap_view(s)).collect()
    }

    async fn get_swap(&self, swap_id: String) -> RpcResult<Option<RpcSwap>> {
        let id = SwapId::from_hex(&swap_id)
            .map_err(|e| rpc_err(-32602, format!("invalid swap id: {e}")))?;
        match self
            .state
            .store
            .get_swap(&id)
            .map_err(|e| rpc_err(-32603, e.to_string()))?
        {
            Some(swap) => Ok(Some(self.swap_view(&swap)?)),
            None => Ok(None),
        }
    }

    async fn force_refund(&self, swap_id: String) -> RpcResult<RpcSwap> {
        let id = SwapId::from_hex(&swap_id)
            .map_err(|e| rpc_err(-32602, format!("invalid swap id: {e}")))?;
        let swap = self
            .state
            .engine
            .flag_force_refund(&id)
            .map_err(|e| rpc_err(-32000, e.to_string()))?;
        info!(swap_id = %id, "operator force-refund accepted");
        self.swap_view(&swap)
    }
}
