mod handlers;
mod remote;
mod server;
mod session;

#[cfg(test)]
#[path = "remote_test.rs"]
mod remote_test;
#[cfg(test)]
#[path = "server_test.rs"]
mod server_test;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use gridlease_core::config::GridConfig;
use gridlease_core::reconciler::ReconcilePolicy;
use gridlease_core::retry::RetryPolicy;
use gridlease_core::state::{CellVerdict, GridKernel};
use gridlease_core::types::{document, CellId, GridDims, SalePayload};
use gridlease_core::validation;
use gridlease_core::ReservationApi;

use crate::remote::RemoteGridApi;
use crate::server::ServeOptions;
use crate::session::HoldOptions;

#[derive(Parser)]
#[command(
    name = "gridlease",
    about = "gridlease: reserve, renew and sell cells of a shared grid",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Grid settings shared by the server and offline tools
#[derive(Args, Clone)]
struct GridArgs {
    #[arg(long, default_value = "100", env = "GRIDLEASE_WIDTH")]
    width: u32,

    #[arg(long, default_value = "100", env = "GRIDLEASE_HEIGHT")]
    height: u32,

    /// TTL applied when a reserve request names none
    #[arg(long, default_value = "180000", env = "GRIDLEASE_DEFAULT_TTL_MS")]
    default_ttl_ms: u64,

    #[arg(long, default_value = "900000", env = "GRIDLEASE_MAX_TTL_MS")]
    max_ttl_ms: u64,

    #[arg(long, default_value = "3000", env = "GRIDLEASE_MAX_CELLS")]
    max_cells: usize,

    /// Compare-and-swap rounds before a write gives up
    #[arg(long, default_value = "3", env = "GRIDLEASE_RETRY_ATTEMPTS")]
    retry_attempts: u32,

    /// Timeout for every remote store call
    #[arg(long, default_value = "10000", env = "GRIDLEASE_STORE_TIMEOUT_MS")]
    store_timeout_ms: u64,
}

impl GridArgs {
    fn to_config(&self) -> Result<GridConfig, String> {
        if self.width == 0 || self.height == 0 {
            return Err("grid width and height must be positive".to_string());
        }
        if self.default_ttl_ms == 0 || self.default_ttl_ms > self.max_ttl_ms {
            return Err("default TTL must be positive and not above the max TTL".to_string());
        }
        Ok(GridConfig {
            dims: GridDims::new(self.width, self.height),
            default_ttl_ms: self.default_ttl_ms,
            max_ttl_ms: self.max_ttl_ms,
            max_cells_per_request: self.max_cells,
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
            },
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            ..GridConfig::default()
        })
    }
}

/// Where client commands send their requests
#[derive(Args, Clone)]
struct RemoteArgs {
    /// Base URL of a running `gridlease serve`
    #[arg(long, default_value = "http://127.0.0.1:3100", env = "GRIDLEASE_SERVER")]
    server: String,

    #[arg(long, env = "GRIDLEASE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = "10000", env = "GRIDLEASE_HTTP_TIMEOUT_MS")]
    timeout_ms: u64,
}

impl RemoteArgs {
    fn api(&self) -> RemoteGridApi {
        RemoteGridApi::new(&self.server, self.api_key.clone(), Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gridlease HTTP coordination server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100", env = "GRIDLEASE_PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory", "sqlite:<path>" or "http:<url>"
        #[arg(long, default_value = "memory", env = "GRIDLEASE_STORAGE")]
        storage: String,

        /// Bearer token sent to an HTTP document store
        #[arg(long, env = "GRIDLEASE_STORE_TOKEN", hide_env_values = true)]
        store_token: Option<String>,

        /// Require `Authorization: Bearer <key>` on every route but /health
        #[arg(long, env = "GRIDLEASE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Requests served at once
        #[arg(long, default_value = "256", env = "GRIDLEASE_MAX_CONCURRENCY")]
        max_concurrency: usize,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Print grid counts, or the full snapshot with --full
    Status {
        #[arg(long)]
        full: bool,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Lock cells for an owner
    Reserve {
        #[arg(long)]
        owner: String,

        /// Comma-separated cell indices
        #[arg(long, value_delimiter = ',', required = true)]
        cells: Vec<u32>,

        #[arg(long)]
        ttl_ms: Option<u64>,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Release an owner's locks
    Unlock {
        #[arg(long)]
        owner: String,

        #[arg(long, value_delimiter = ',', required = true)]
        cells: Vec<u32>,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Sell cells to an owner
    Finalize {
        #[arg(long)]
        owner: String,

        #[arg(long, value_delimiter = ',', required = true)]
        cells: Vec<u32>,

        #[arg(long, default_value = "")]
        name: String,

        #[arg(long)]
        link: String,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Attach an asset URL to a sold region
    LinkAsset {
        #[arg(long)]
        region: String,

        #[arg(long)]
        url: String,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Drop expired locks from the stored document
    Prune {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Reserve cells and keep renewing them until Ctrl-C or --for-secs
    Hold {
        #[arg(long)]
        owner: String,

        #[arg(long, value_delimiter = ',', required = true)]
        cells: Vec<u32>,

        #[arg(long, default_value = "180000")]
        ttl_ms: u64,

        /// Renewal period; must be below the TTL
        #[arg(long, default_value = "60000")]
        interval_ms: u64,

        /// How often the grid is re-read
        #[arg(long, default_value = "5000")]
        poll_ms: u64,

        /// Grace window for foreign locks that vanish from a snapshot
        #[arg(long, default_value = "5000", env = "GRIDLEASE_GRACE_WINDOW_MS")]
        grace_window_ms: u64,

        #[arg(long = "for-secs")]
        for_secs: Option<u64>,

        /// Finalize with this link when the hold ends instead of unlocking
        #[arg(long)]
        finalize_link: Option<String>,

        #[arg(long, default_value = "")]
        finalize_name: String,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Validate a stored grid document read from stdin, and optionally
    /// evaluate a reserve request against it without writing anything
    Check {
        #[arg(long, requires = "cells")]
        owner: Option<String>,

        #[arg(long, value_delimiter = ',', requires = "owner")]
        cells: Vec<u32>,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Print version information
    Version,
}

fn cell_ids(raw: &[u32]) -> Vec<CellId> {
    raw.iter().copied().map(CellId).collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

async fn run(command: Commands) -> Result<(), String> {
    match command {
        Commands::Serve {
            port,
            host,
            storage,
            store_token,
            api_key,
            max_concurrency,
            grid,
        } => {
            server::run(ServeOptions {
                host,
                port,
                storage,
                store_token,
                api_key,
                max_concurrency,
                config: grid.to_config()?,
            })
            .await
        }
        Commands::Status { full, remote } => {
            let status = remote.api().status_full().map_err(|e| e.to_string())?;
            if full {
                print_json(&status)
            } else {
                print_json(&status.stats)
            }
        }
        Commands::Reserve {
            owner,
            cells,
            ttl_ms,
            remote,
        } => {
            let api = remote.api();
            let ttl_ms = ttl_ms.unwrap_or(GridConfig::default().default_ttl_ms);
            let outcome = api.reserve(&owner, &cell_ids(&cells), ttl_ms).map_err(|e| e.to_string())?;
            print_json(&outcome)
        }
        Commands::Unlock { owner, cells, remote } => {
            let outcome = remote
                .api()
                .unlock(&owner, &cell_ids(&cells))
                .map_err(|e| e.to_string())?;
            print_json(&outcome)
        }
        Commands::Finalize {
            owner,
            cells,
            name,
            link,
            remote,
        } => {
            let payload = SalePayload::new(name, link);
            let outcome = remote
                .api()
                .finalize(&owner, &cell_ids(&cells), &payload)
                .map_err(|e| e.to_string())?;
            print_json(&outcome)?;
            if outcome.is_partial() {
                return Err(format!("{} cell(s) were already taken", outcome.taken.len()));
            }
            Ok(())
        }
        Commands::LinkAsset { region, url, remote } => {
            let linked = remote.api().set_asset_url(&region, &url).map_err(|e| e.to_string())?;
            print_json(&linked)
        }
        Commands::Prune { remote } => {
            let pruned = remote.api().prune().map_err(|e| e.to_string())?;
            print_json(&pruned)
        }
        Commands::Hold {
            owner,
            cells,
            ttl_ms,
            interval_ms,
            poll_ms,
            grace_window_ms,
            for_secs,
            finalize_link,
            finalize_name,
            remote,
        } => {
            let opts = HoldOptions {
                owner_id: owner,
                cells: cell_ids(&cells),
                ttl_ms,
                interval_ms,
                poll_ms,
                policy: ReconcilePolicy { grace_window_ms },
                hold_for: for_secs.map(Duration::from_secs),
                finalize_with: finalize_link.map(|link| SalePayload::new(finalize_name, link)),
            };
            let api = remote.api();
            let health = api.health().map_err(|e| e.to_string())?;
            if health.status != "ok" {
                tracing::warn!(status = %health.status, storage = %health.storage, "Server reports degraded store");
            }
            session::hold(api, opts).await
        }
        Commands::Check { owner, cells, grid } => {
            let config = grid.to_config()?;
            eprintln!("Reading grid document from stdin...");
            let mut input = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)
                .map_err(|e| format!("failed to read stdin: {}", e))?;

            let snapshot = document::decode(Some(&input), config.dims).map_err(|e| e.to_string())?;
            let now = gridlease_core::clock::now_ms();
            snapshot.check_exclusive()?;
            print_json(&snapshot.stats(config.dims, now))?;

            let expired = snapshot.locks.values().filter(|l| !l.is_live(now)).count();
            if expired > 0 {
                eprintln!("{} expired lock(s) would be pruned on the next write", expired);
            }

            if let Some(owner) = owner {
                let cells = cell_ids(&cells);
                validation::validate_owner(&owner, &config).map_err(|e| e.to_string())?;
                validation::validate_cells(&cells, &config).map_err(|e| e.to_string())?;
                let verdicts: Vec<serde_json::Value> = cells
                    .iter()
                    .map(|&cell| match GridKernel::evaluate_cell(&snapshot, &owner, cell, now) {
                        CellVerdict::Grant => serde_json::json!({ "cell": cell, "grant": true }),
                        CellVerdict::Conflict(reason) => {
                            serde_json::json!({ "cell": cell, "grant": false, "reason": reason })
                        }
                    })
                    .collect();
                print_json(&verdicts)?;
            }
            Ok(())
        }
        Commands::Version => {
            println!("gridlease {}", env!("CARGO_PKG_VERSION"));
            println!("Reservation and sale coordination over compare-and-swap document stores");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
