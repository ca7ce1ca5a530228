pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod event;
pub mod swap;
pub mod types;

pub use config::{Config, LedgerConfig, Network};
pub use constants::*;
pub use error::LockstepError;
pub use escrow::Escrow;
pub use event::{ChainEvent, EscrowEvent};
pub use swap::{Reveal, SignalReason, Swap, SwapPhase, SwapRole, SwapSide, SwapSignal};
pub use types::*;
