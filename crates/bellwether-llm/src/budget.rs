//! Shared token/cost budget tracker.
//!
//! Counters are atomic so concurrent workers can record usage without a
//! lock; the soft-limit warning fires at most once via an atomic latch.
//! Prices are a table loaded at startup, not compile-time constants.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{TokenUsage, UsageCallback};

/// Cost of one model, in USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Input cost per 1K tokens
    pub input_per_1k: f64,
    /// Output cost per 1K tokens
    pub output_per_1k: f64,
}

/// Per-model price table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl PriceTable {
    /// Empty table; unknown models cost zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table seeded with common hosted models. Callers extend or replace
    /// entries from configuration.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.insert("gpt-4o", ModelPrice { input_per_1k: 0.0025, output_per_1k: 0.01 });
        table.insert("gpt-4o-mini", ModelPrice { input_per_1k: 0.00015, output_per_1k: 0.0006 });
        table.insert("deepseek-chat", ModelPrice { input_per_1k: 0.00027, output_per_1k: 0.0011 });
        table
    }

    /// Add or replace a model's price.
    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    /// Price for a model, if known.
    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }

    /// Cost of the given usage in USD; zero for unknown models.
    pub fn cost(&self, model: &str, usage: TokenUsage) -> f64 {
        let Some(price) = self.price_for(model) else {
            return 0.0;
        };
        (usage.input_tokens as f64 / 1000.0) * price.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * price.output_per_1k
    }
}

/// Budget configuration.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Hard cap on total tokens; `None` disables the cap
    pub max_total_tokens: Option<u64>,
    /// Hard cap on cumulative cost in USD; `None` disables the cap
    pub max_cost_usd: Option<f64>,
    /// Fraction of the hard cap at which the one-shot warning fires
    pub soft_warn_fraction: f64,
    /// Price table for cost derivation
    pub prices: PriceTable,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_tokens: None,
            max_cost_usd: None,
            soft_warn_fraction: 0.8,
            prices: PriceTable::with_defaults(),
        }
    }
}

/// Budget snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Cumulative input tokens
    pub input_tokens: u64,
    /// Cumulative output tokens
    pub output_tokens: u64,
    /// Cumulative total tokens
    pub total_tokens: u64,
    /// Cumulative cost in USD
    pub cost_usd: f64,
    /// Hard token cap, if any
    pub max_total_tokens: Option<u64>,
    /// Whether the soft warning has fired
    pub soft_limit_reached: bool,
}

type WarningCallback = Box<dyn Fn(&BudgetStatus) + Send + Sync>;

/// Shared token/cost budget.
pub struct BudgetTracker {
    config: BudgetConfig,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    /// Cost accumulated in microdollars so it stays atomic
    cost_microdollars: AtomicU64,
    warned: AtomicBool,
    on_warning: StdMutex<Option<WarningCallback>>,
}

impl std::fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("input_tokens", &self.input_tokens)
            .field("output_tokens", &self.output_tokens)
            .field("max_total_tokens", &self.config.max_total_tokens)
            .finish()
    }
}

impl BudgetTracker {
    /// Create a tracker.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            cost_microdollars: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            on_warning: StdMutex::new(None),
        }
    }

    /// Register the one-shot soft-limit warning callback.
    pub fn set_warning_callback(&self, callback: impl Fn(&BudgetStatus) + Send + Sync + 'static) {
        *self.on_warning.lock().expect("warning mutex poisoned") = Some(Box::new(callback));
    }

    /// Record usage for one call.
    pub fn record_usage(&self, model: &str, usage: TokenUsage) {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);

        let cost = self.config.prices.cost(model, usage);
        if cost > 0.0 {
            self.cost_microdollars
                .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);
        }

        self.maybe_warn();
    }

    /// Whether adding the estimated tokens would cross a hard cap.
    pub fn would_exceed(&self, est_input: u64, est_output: u64) -> bool {
        if let Some(max) = self.config.max_total_tokens {
            let projected = self.total_tokens() + est_input + est_output;
            if projected > max {
                return true;
            }
        }
        if let Some(max_cost) = self.config.max_cost_usd
            && self.cost_usd() >= max_cost
        {
            return true;
        }
        false
    }

    /// Current snapshot.
    pub fn status(&self) -> BudgetStatus {
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        BudgetStatus {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cost_usd: self.cost_usd(),
            max_total_tokens: self.config.max_total_tokens,
            soft_limit_reached: self.warned.load(Ordering::Relaxed),
        }
    }

    /// A usage callback wired to this tracker, for provider construction.
    pub fn usage_callback(self: &Arc<Self>) -> UsageCallback {
        let tracker = Arc::clone(self);
        Arc::new(move |report| {
            tracker.record_usage(&report.model, report.usage);
        })
    }

    fn total_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed) + self.output_tokens.load(Ordering::Relaxed)
    }

    fn cost_usd(&self) -> f64 {
        self.cost_microdollars.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Fire the soft-limit warning once. Under concurrent recording the
    /// single emission is best-effort: the latch, not a lock, decides.
    fn maybe_warn(&self) {
        let crossed = match (self.config.max_total_tokens, self.config.max_cost_usd) {
            (Some(max), _) if self.total_tokens() as f64
                >= max as f64 * self.config.soft_warn_fraction => true,
            (_, Some(max_cost)) if self.cost_usd() >= max_cost * self.config.soft_warn_fraction => {
                true
            }
            _ => false,
        };
        if crossed && !self.warned.swap(true, Ordering::SeqCst) {
            let status = self.status();
            warn!(
                "budget soft limit reached: {} tokens (${:.4})",
                status.total_tokens, status.cost_usd
            );
            if let Some(callback) = self.on_warning.lock().expect("warning mutex poisoned").as_ref()
            {
                callback(&status);
            }
        }
    }
}
