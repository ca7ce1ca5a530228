//! lockstep-ctl
//!
//! Operator CLI for a running lockstep coordinator.
//!
//! Usage:
//!   lockstep-ctl health             [--rpc <url>]
//!   lockstep-ctl list-active-swaps  [--rpc <url>]
//!   lockstep-ctl get-swap <id>      [--rpc <url>]
//!   lockstep-ctl force-refund <id>  [--rpc <url>]

use clap::{Parser, Subcommand};

use lockstep_rpc::{RpcSide, RpcSwap};

mod rpc_client;
use rpc_client::CtlClient;

#[derive(Parser, Debug)]
#[command(
    name = "lockstep-ctl",
    version,
    about = "Lockstep operator CLI — inspect and steer the swap coordinator"
)]
struct Args {
    /// Coordinator RPC endpoint.
    #[arg(long, global = true, default_value = "http://127.0.0.1:7700")]
    rpc: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ledger connectivity, cursor lag, and incident counters.
    Health,

    /// List every non-terminal swap.
    ListActiveSwaps,

    /// Show one swap by its 64-char hex id.
    GetSwap {
        /// Swap id (hex).
        id: String,
    },

    /// Schedule refunds for all still-locked sides of a swap, regardless of
    /// auto-policy. Refunds still wait for each side's on-chain deadline.
    ForceRefund {
        /// Swap id (hex).
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = CtlClient::new(&args.rpc);

    match args.command {
        Command::Health => {
            let health = client.health().await?;
            println!("status:    {}", if health.ok { "ok" } else { "DEGRADED" });
            println!("network:   {}", health.network);
            println!("store:     {}", if health.store_ok { "ok" } else { "UNREACHABLE" });
            for ledger in [&health.ledger_a, &health.ledger_b] {
                println!(
                    "ledger {}:  connected={} head={} cursor={} lag={} ingested={} rewinds={}",
                    ledger.ledger,
                    ledger.connected,
                    ledger.head_height,
                    ledger.cursor_height,
                    ledger.cursor_lag,
                    ledger.events_ingested,
                    ledger.cursor_rewinds,
                );
            }
            println!("active:    {} swap(s), {} ambiguous", health.active_swaps, health.ambiguous_swaps);
            println!("incidents: {}", health.incidents);
        }

        Command::ListActiveSwaps => {
            let swaps = client.list_active_swaps().await?;
            if swaps.is_empty() {
                println!("no active swaps");
                return Ok(());
            }
            for swap in &swaps {
                println!(
                    "{}  {:14}  digest {}…  retries {}{}",
                    swap.swap_id,
                    swap.phase,
                    &swap.digest[..16],
                    swap.retry_count,
                    if swap.ambiguous { "  [AMBIGUOUS]" } else { "" },
                );
            }
        }

        Command::GetSwap { id } => match client.get_swap(&id).await? {
            Some(swap) => print_swap(&swap),
            None => println!("swap not found: {id}"),
        },

        Command::ForceRefund { id } => {
            let swap = client.force_refund(&id).await?;
            println!("force-refund scheduled");
            print_swap(&swap);
        }
    }

    Ok(())
}

fn print_swap(swap: &RpcSwap) {
    println!("swap      {}", swap.swap_id);
    println!("phase     {}{}", swap.phase, if swap.ambiguous { "  [AMBIGUOUS]" } else { "" });
    println!("digest    {} ({})", swap.digest, swap.algorithm);
    print_side("A", swap.a_side.as_ref(), swap.a_deadline_ms);
    print_side("B", swap.b_side.as_ref(), swap.b_deadline_ms);
    println!("created   {}   updated {}", swap.created_ms, swap.updated_ms);
    if swap.retry_count > 0 {
        println!("retries   {}", swap.retry_count);
    }
    if let Some(err) = &swap.last_error {
        println!("last err  {err}");
    }
    if swap.force_refund {
        println!("force-refund pending");
    }
}

fn print_side(label: &str, side: Option<&RpcSide>, deadline_ms: Option<i64>) {
    match side {
        None => println!("side {label}    (not yet locked)"),
        Some(side) => {
            let role = side.role.as_deref().unwrap_or("unassigned");
            let state = match &side.escrow {
                Some(e) if e.withdrawn => "withdrawn",
                Some(e) if e.refunded => "refunded",
                Some(_) => "locked",
                None => "unknown",
            };
            println!(
                "side {label}    {}  {}  {}  deadline {}{}",
                side.escrow_id,
                role,
                state,
                deadline_ms.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                if side.refund_attempted { "  refund-attempted" } else { "" },
            );
        }
    }
}
