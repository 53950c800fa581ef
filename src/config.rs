//! Application configuration loaded from environment variables.
//!
//! One immutable struct, passed into each component at construction. There is
//! no module-level mutable state anywhere in the crate.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Capital pools (USD) ===
    /// Pool spent across both outcomes during the INITIAL phase.
    #[serde(default = "default_initial_pool")]
    pub initial_pool_usd: Decimal,

    /// Pool available for REBALANCE-phase top-ups.
    #[serde(default = "default_rebalance_pool")]
    pub rebalance_pool_usd: Decimal,

    /// Pool reserved for the final RESERVE phase before lock.
    #[serde(default = "default_reserve_pool")]
    pub reserve_pool_usd: Decimal,

    // === Entry criteria ===
    /// Lower bound of the acceptance band for the higher-priced outcome.
    /// Below this the market is too thin to trust.
    #[serde(default = "default_entry_band_low")]
    pub entry_band_low: Decimal,

    /// Upper bound of the acceptance band. Above this the risk/reward is poor.
    #[serde(default = "default_entry_band_high")]
    pub entry_band_high: Decimal,

    // === Rebalancing ===
    /// Token imbalance ratio that triggers a rebalance buy (e.g. 0.05 = 5%).
    #[serde(default = "default_imbalance_threshold")]
    pub imbalance_threshold: Decimal,

    /// Maximum notional per rebalance step (USD).
    #[serde(default = "default_rebalance_step")]
    pub rebalance_step_usd: Decimal,

    /// Seconds before close at which the RESERVE phase begins.
    #[serde(default = "default_reserve_window")]
    pub reserve_window_secs: u64,

    /// Hard cutoff: with less than this left, lock whatever we hold.
    #[serde(default = "default_lock_cutoff")]
    pub lock_cutoff_secs: u64,

    // === Execution ===
    /// Maximum tolerated slippage ratio for any fill (e.g. 0.02 = 2%).
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,

    /// Notional above which orders are split into iceberg chunks (USD).
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_usd: Decimal,

    /// Fraction of the top book level used to size one chunk.
    #[serde(default = "default_chunk_fraction")]
    pub chunk_top_level_fraction: Decimal,

    /// Delay between iceberg chunks, to reduce detectable market impact.
    #[serde(default = "default_inter_chunk_delay")]
    pub inter_chunk_delay_ms: u64,

    /// Transport retries per iceberg chunk.
    #[serde(default = "default_chunk_retries")]
    pub chunk_max_retries: u32,

    /// Whether an iceberg run may stop early and report a partial fill.
    #[serde(default = "default_true")]
    pub allow_partial_iceberg: bool,

    // === Confirmation ===
    /// Cap on any single confirmation race (seconds).
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,

    /// Poll interval for exchange order-status probes (milliseconds).
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,

    /// Poll interval for chain receipt probes (milliseconds).
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,

    /// Bound on recovering a fill tx ref from the exchange trade record (ms).
    #[serde(default = "default_tx_ref_recovery_ms")]
    pub tx_ref_recovery_ms: u64,

    // === Window timing ===
    /// Grace period after official close during which retries continue.
    /// Liquidity sometimes remains momentarily.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    // === Persistence ===
    /// TTL for cache-tier entries (seconds).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    // === Session ===
    /// Stop trading a symbol after this many consecutive unbalanced windows.
    #[serde(default = "default_max_unbalanced_streak")]
    pub max_unbalanced_streak: u32,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_initial_pool() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_rebalance_pool() -> Decimal {
    Decimal::new(50, 0) // $50
}

fn default_reserve_pool() -> Decimal {
    Decimal::new(25, 0) // $25
}

fn default_entry_band_low() -> Decimal {
    Decimal::new(52, 2) // 0.52
}

fn default_entry_band_high() -> Decimal {
    Decimal::new(65, 2) // 0.65
}

fn default_imbalance_threshold() -> Decimal {
    Decimal::new(5, 2) // 5%
}

fn default_rebalance_step() -> Decimal {
    Decimal::new(10, 0) // $10
}

fn default_reserve_window() -> u64 {
    120
}

fn default_lock_cutoff() -> u64 {
    30
}

fn default_max_slippage() -> Decimal {
    Decimal::new(2, 2) // 2%
}

fn default_chunk_threshold() -> Decimal {
    Decimal::new(25, 0) // $25
}

fn default_chunk_fraction() -> Decimal {
    Decimal::new(3, 1) // 30% of the top level
}

fn default_inter_chunk_delay() -> u64 {
    400
}

fn default_chunk_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_confirm_timeout() -> u64 {
    15
}

fn default_status_poll_ms() -> u64 {
    250
}

fn default_receipt_poll_ms() -> u64 {
    500
}

fn default_tx_ref_recovery_ms() -> u64 {
    2_000
}

fn default_grace_period() -> u64 {
    20
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_max_unbalanced_streak() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_pool_usd <= Decimal::ZERO {
            return Err("INITIAL_POOL_USD must be positive".to_string());
        }
        if self.rebalance_pool_usd < Decimal::ZERO || self.reserve_pool_usd < Decimal::ZERO {
            return Err("pool sizes must be non-negative".to_string());
        }
        if self.entry_band_low >= self.entry_band_high {
            return Err("ENTRY_BAND_LOW must be below ENTRY_BAND_HIGH".to_string());
        }
        if self.entry_band_high >= Decimal::ONE {
            return Err("ENTRY_BAND_HIGH must be below 1.0".to_string());
        }
        if self.imbalance_threshold <= Decimal::ZERO || self.imbalance_threshold >= Decimal::ONE {
            return Err("IMBALANCE_THRESHOLD must be in (0, 1)".to_string());
        }
        if self.max_slippage <= Decimal::ZERO {
            return Err("MAX_SLIPPAGE must be positive".to_string());
        }
        if self.chunk_top_level_fraction <= Decimal::ZERO
            || self.chunk_top_level_fraction > Decimal::ONE
        {
            return Err("CHUNK_TOP_LEVEL_FRACTION must be in (0, 1]".to_string());
        }
        if self.lock_cutoff_secs >= self.reserve_window_secs {
            return Err("LOCK_CUTOFF_SECS must be below RESERVE_WINDOW_SECS".to_string());
        }
        Ok(())
    }

    /// Total capital committed to one window across all pools.
    pub fn total_budget(&self) -> Decimal {
        self.initial_pool_usd + self.rebalance_pool_usd + self.reserve_pool_usd
    }
}

impl Default for Config {
    fn default() -> Self {
        // serde defaults double as the programmatic defaults
        serde_json::from_str("{}").expect("default config is valid")
    }
}
