use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use lockstep_core::escrow::Escrow;
use lockstep_core::event::{ChainEvent, EscrowEvent};
use lockstep_core::types::{
    Amount, Cursor, Digest, EscrowId, HashAlgo, LedgerId, Secret, TxRef,
};

use crate::adapter::{ChainAdapter, CreateEscrowParams, EventBatch, Receipt};
use crate::error::ChainError;

// Stable error codes the escrow gateways attach to JSON-RPC failures.
const CODE_INSUFFICIENT_FUNDS: i64 = -32001;
const CODE_REJECTED: i64 = -32002;
const CODE_INVALID_SECRET: i64 = -32003;
const CODE_EXPIRED: i64 = -32004;
const CODE_ALREADY_PROCESSED: i64 = -32005;
const CODE_NOT_EXPIRED: i64 = -32006;
const CODE_UNAUTHORIZED: i64 = -32007;
const CODE_NOT_FOUND: i64 = -32008;

/// JSON-RPC 2.0 client for a per-ledger escrow gateway.
///
/// The gateway is the collaborator that owns contract ABI details, key
/// custody (via the opaque `key_ref`), and transaction signing; this adapter
/// only speaks the abstract escrow surface and canonicalizes the gateway's
/// responses. Uses raw HTTP POST with serde_json rather than a full RPC
/// client stack to keep the adapter lean.
pub struct RpcChain {
    ledger: LedgerId,
    url: String,
    local_address: String,
    key_ref: String,
    finality_depth: u64,
    client: reqwest::Client,
}

impl RpcChain {
    pub fn new(
        ledger: LedgerId,
        url: impl Into<String>,
        local_address: impl Into<String>,
        key_ref: impl Into<String>,
        finality_depth: u64,
    ) -> Self {
        Self {
            ledger,
            url: url.into(),
            local_address: local_address.into(),
            key_ref: key_ref.into(),
            finality_depth: finality_depth.max(1),
            client: reqwest::Client::new(),
        }
    }

    /// Ledger A embeds digests 0x-prefixed in call data; ledger B takes bare
    /// hex. The store form is always bare (see `Digest::to_hex`).
    fn encode_digest(&self, digest: &Digest) -> String {
        match self.ledger {
            LedgerId::A => digest.to_prefixed_hex(),
            LedgerId::B => digest.to_hex(),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChainError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Unavailable(format!("{method} to {}: {e}", self.url)))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChainError::Gateway(format!("{method}: malformed response: {e}")))?;

        if let Some(err) = json.get("error") {
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown gateway error")
                .to_string();
            debug!(ledger = %self.ledger, method, code, "gateway error");
            return Err(map_gateway_error(code, message));
        }
        Ok(json.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

fn map_gateway_error(code: i64, message: String) -> ChainError {
    match code {
        CODE_INSUFFICIENT_FUNDS => ChainError::InsufficientFunds,
        CODE_REJECTED => ChainError::Rejected(message),
        CODE_INVALID_SECRET => ChainError::InvalidSecret,
        CODE_EXPIRED => ChainError::Expired,
        CODE_ALREADY_PROCESSED => ChainError::AlreadyProcessed,
        CODE_NOT_EXPIRED => ChainError::NotExpired,
        CODE_UNAUTHORIZED => ChainError::Unauthorized,
        CODE_NOT_FOUND => ChainError::NotFound(message),
        _ => ChainError::Gateway(format!("code {code}: {message}")),
    }
}

// ── Gateway DTOs ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GatewayEscrow {
    escrow_id: String,
    owner: String,
    beneficiary: String,
    token: String,
    /// Stringified to survive JSON number precision limits.
    amount: String,
    digest: String,
    algorithm_flag: u8,
    start_ms: i64,
    lock_duration_ms: i64,
    withdrawn: bool,
    refunded: bool,
    #[serde(default)]
    revealed_secret: Option<String>,
}

impl GatewayEscrow {
    fn into_escrow(self, ledger: LedgerId) -> Result<Escrow, ChainError> {
        let amount: Amount = self
            .amount
            .parse()
            .map_err(|e| ChainError::Gateway(format!("bad amount {:?}: {e}", self.amount)))?;
        let digest = Digest::from_hex(&self.digest)
            .map_err(|e| ChainError::Gateway(format!("bad digest: {e}")))?;
        let algo = HashAlgo::from_flag(self.algorithm_flag)
            .map_err(|e| ChainError::Gateway(e.to_string()))?;
        let revealed_secret = self
            .revealed_secret
            .as_deref()
            .map(Secret::from_hex)
            .transpose()
            .map_err(|e| ChainError::Gateway(format!("bad revealed secret: {e}")))?;
        Ok(Escrow {
            escrow_id: EscrowId::new(ledger, self.escrow_id),
            owner: self.owner,
            beneficiary: self.beneficiary,
            token: self.token,
            amount,
            digest,
            algo,
            start_ms: self.start_ms,
            lock_duration_ms: self.lock_duration_ms,
            withdrawn: self.withdrawn,
            refunded: self.refunded,
            revealed_secret,
        })
    }
}

#[derive(Deserialize)]
struct GatewayEvent {
    kind: String,
    height: u64,
    index: u32,
    tx_ref: String,
    #[serde(default)]
    escrow: Option<GatewayEscrow>,
    #[serde(default)]
    escrow_id: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    by: Option<String>,
}

impl GatewayEvent {
    fn into_event(self, ledger: LedgerId) -> Result<ChainEvent, ChainError> {
        let missing = |field: &str| ChainError::Gateway(format!("{} event missing {field}", ledger));
        let body = match self.kind.as_str() {
            "created" => {
                let escrow = self.escrow.ok_or_else(|| missing("escrow"))?;
                EscrowEvent::Created { escrow: escrow.into_escrow(ledger)? }
            }
            "withdrawn" => EscrowEvent::Withdrawn {
                escrow_id: EscrowId::new(ledger, self.escrow_id.ok_or_else(|| missing("escrow_id"))?),
                digest: Digest::from_hex(&self.digest.ok_or_else(|| missing("digest"))?)
                    .map_err(|e| ChainError::Gateway(format!("bad digest: {e}")))?,
                secret: Secret::from_hex(&self.secret.ok_or_else(|| missing("secret"))?)
                    .map_err(|e| ChainError::Gateway(format!("bad secret: {e}")))?,
                by: self.by.unwrap_or_default(),
            },
            "refunded" => EscrowEvent::Refunded {
                escrow_id: EscrowId::new(ledger, self.escrow_id.ok_or_else(|| missing("escrow_id"))?),
                digest: Digest::from_hex(&self.digest.ok_or_else(|| missing("digest"))?)
                    .map_err(|e| ChainError::Gateway(format!("bad digest: {e}")))?,
                by: self.by.unwrap_or_default(),
            },
            other => return Err(ChainError::Gateway(format!("unknown event kind {other:?}"))),
        };
        Ok(ChainEvent {
            ledger,
            height: self.height,
            index: self.index,
            tx_ref: TxRef::new(self.tx_ref),
            body,
        })
    }
}

#[derive(Deserialize)]
struct GatewayEventPage {
    events: Vec<GatewayEvent>,
    cursor_height: u64,
    cursor_index: u32,
    head_height: u64,
    #[serde(default)]
    rewind_to_height: Option<u64>,
}

#[derive(Deserialize)]
struct GatewaySubmission {
    escrow_id: Option<String>,
    tx_ref: String,
}

#[derive(Deserialize)]
struct GatewayReceipt {
    tx_ref: String,
    height: u64,
    confirmations: u64,
}

// ── Adapter implementation ───────────────────────────────────────────────────

#[async_trait]
impl ChainAdapter for RpcChain {
    fn ledger(&self) -> LedgerId {
        self.ledger
    }

    async fn create_escrow(&self, p: CreateEscrowParams) -> Result<(EscrowId, TxRef), ChainError> {
        let result = self
            .call(
                "escrow_create",
                serde_json::json!([{
                    "from": self.local_address,
                    "key_ref": self.key_ref,
                    "token": p.token,
                    "amount": p.amount.to_string(),
                    "digest": self.encode_digest(&p.digest),
                    "algorithm_flag": p.algo.as_flag(),
                    "beneficiary": p.beneficiary,
                    "lock_duration_ms": p.lock_duration_ms,
                }]),
            )
            .await?;
        let sub: GatewaySubmission = serde_json::from_value(result)
            .map_err(|e| ChainError::Gateway(format!("escrow_create: {e}")))?;
        let id = sub
            .escrow_id
            .ok_or_else(|| ChainError::Gateway("escrow_create returned no escrow_id".into()))?;
        Ok((EscrowId::new(self.ledger, id), TxRef::new(sub.tx_ref)))
    }

    async fn withdraw(&self, escrow_id: &EscrowId, secret: &Secret) -> Result<TxRef, ChainError> {
        let result = self
            .call(
                "escrow_withdraw",
                serde_json::json!([{
                    "from": self.local_address,
                    "key_ref": self.key_ref,
                    "escrow_id": escrow_id.id,
                    "secret": secret.to_hex(),
                }]),
            )
            .await?;
        let sub: GatewaySubmission = serde_json::from_value(result)
            .map_err(|e| ChainError::Gateway(format!("escrow_withdraw: {e}")))?;
        Ok(TxRef::new(sub.tx_ref))
    }

    async fn refund(&self, escrow_id: &EscrowId) -> Result<TxRef, ChainError> {
        let result = self
            .call(
                "escrow_refund",
                serde_json::json!([{
                    "from": self.local_address,
                    "key_ref": self.key_ref,
                    "escrow_id": escrow_id.id,
                }]),
            )
            .await?;
        let sub: GatewaySubmission = serde_json::from_value(result)
            .map_err(|e| ChainError::Gateway(format!("escrow_refund: {e}")))?;
        Ok(TxRef::new(sub.tx_ref))
    }

    async fn get_escrow(&self, escrow_id: &EscrowId) -> Result<Escrow, ChainError> {
        let result = self
            .call("escrow_get", serde_json::json!([escrow_id.id]))
            .await?;
        if result.is_null() {
            return Err(ChainError::NotFound(escrow_id.to_string()));
        }
        let dto: GatewayEscrow = serde_json::from_value(result)
            .map_err(|e| ChainError::Gateway(format!("escrow_get: {e}")))?;
        dto.into_escrow(self.ledger)
    }

    async fn find_escrows_by_digest(&self, digest: &Digest) -> Result<Vec<EscrowId>, ChainError> {
        let result = self
            .call(
                "escrow_findByDigest",
                serde_json::json!([self.encode_digest(digest)]),
            )
            .await?;
        let ids: Vec<String> = serde_json::from_value(result)
            .map_err(|e| ChainError::Gateway(format!("escrow_findByDigest: {e}")))?;
        Ok(ids.into_iter().map(|id| EscrowId::new(self.ledger, id)).collect())
    }

    async fn poll_events(&self, from: Cursor, limit: usize) -> Result<EventBatch, ChainError> {
        let result = self
            .call(
                "escrow_events",
                serde_json::json!([{
                    "from_height": from.height,
                    "from_index": from.index,
                    "limit": limit,
                    "finality_depth": self.finality_depth,
                }]),
            )
            .await?;
        let page: GatewayEventPage = serde_json::from_value(result)
            .map_err(|e| ChainError::Gateway(format!("escrow_events: {e}")))?;

        if let Some(height) = page.rewind_to_height {
            return Err(ChainError::CursorGap { rewind_to: Cursor::end_of_height(height) });
        }

        let mut events = Vec::with_capacity(page.events.len());
        for ev in page.events {
            events.push(ev.into_event(self.ledger)?);
        }
        Ok(EventBatch {
            events,
            cursor: Cursor::new(page.cursor_height, page.cursor_index),
            head_height: page.head_height,
        })
    }

    async fn submit_and_wait(&self, tx_ref: &TxRef) -> Result<Receipt, ChainError> {
        let result = self
            .call(
                "escrow_waitForReceipt",
                serde_json::json!([{
                    "tx_ref": tx_ref.as_str(),
                    "confirmations": self.finality_depth,
                }]),
            )
            .await?;
        let dto: GatewayReceipt = serde_json::from_value(result)
            .map_err(|e| ChainError::Gateway(format!("escrow_waitForReceipt: {e}")))?;
        Ok(Receipt {
            tx_ref: TxRef::new(dto.tx_ref),
            height: dto.height,
            confirmations: dto.confirmations,
        })
    }

    async fn head_height(&self) -> Result<u64, ChainError> {
        let result = self.call("escrow_head", serde_json::json!([])).await?;
        result
            .as_u64()
            .ok_or_else(|| ChainError::Gateway("escrow_head returned a non-integer".into()))
    }

    async fn register_resolver(&self, stake: Amount) -> Result<(), ChainError> {
        match self
            .call(
                "resolver_register",
                serde_json::json!([{
                    "from": self.local_address,
                    "key_ref": self.key_ref,
                    "stake": stake.to_string(),
                }]),
            )
            .await
        {
            Ok(_) | Err(ChainError::AlreadyProcessed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_codes_map_to_kinds() {
        assert!(matches!(
            map_gateway_error(CODE_INVALID_SECRET, "x".into()),
            ChainError::InvalidSecret
        ));
        assert!(matches!(
            map_gateway_error(CODE_ALREADY_PROCESSED, "x".into()),
            ChainError::AlreadyProcessed
        ));
        assert!(matches!(
            map_gateway_error(CODE_NOT_EXPIRED, "x".into()),
            ChainError::NotExpired
        ));
        assert!(matches!(map_gateway_error(-1, "x".into()), ChainError::Gateway(_)));
    }

    #[test]
    fn created_event_canonicalizes() {
        let raw = serde_json::json!({
            "kind": "created",
            "height": 7,
            "index": 0,
            "tx_ref": "0xdead",
            "escrow": {
                "escrow_id": "0xe5c1",
                "owner": "0xa11ce",
                "beneficiary": "0xb0b",
                "token": "native",
                "amount": "1000",
                "digest": "aa".repeat(32),
                "algorithm_flag": 1,
                "start_ms": 1_000,
                "lock_duration_ms": 60_000,
                "withdrawn": false,
                "refunded": false
            }
        });
        let dto: GatewayEvent = serde_json::from_value(raw).unwrap();
        let ev = dto.into_event(LedgerId::A).unwrap();
        assert_eq!(ev.kind(), "created");
        assert_eq!(ev.height, 7);
        match ev.body {
            EscrowEvent::Created { escrow } => {
                assert_eq!(escrow.amount, 1_000);
                assert_eq!(escrow.algo, HashAlgo::Sha256);
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        let raw = serde_json::json!({
            "kind": "teleported", "height": 1, "index": 0, "tx_ref": "t"
        });
        let dto: GatewayEvent = serde_json::from_value(raw).unwrap();
        assert!(dto.into_event(LedgerId::B).is_err());
    }

    #[test]
    fn digest_encoding_is_per_ledger() {
        let a = RpcChain::new(LedgerId::A, "http://gw-a", "0xme", "k", 12);
        let b = RpcChain::new(LedgerId::B, "http://gw-b", "me-b", "k", 1);
        let d = Digest::from_bytes([0xab; 32]);
        assert!(a.encode_digest(&d).starts_with("0x"));
        assert!(!b.encode_digest(&d).starts_with("0x"));
    }
}
