//! Aggregate-state tracker
//!
//! Every coordinator fetch and every relay carries a [`SourceStatus`] plus the
//! [`Generation`] of the dispatch that set it to pending. A completion only
//! settles its source when the generation still matches, so a pending count
//! can never be decremented twice or by a superseded dispatch.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::book::MergedBook;
use super::mode::ConnectionMode;
use crate::coordinator::Coordinator;
use crate::domain::{ExchangeInfo, ExchangeStats, OrderType};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SourceStatus {
    #[default]
    Idle,
    Pending,
    Loaded,
    Failed(String),
}

impl SourceStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, SourceStatus::Pending)
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Idle => write!(f, "idle"),
            SourceStatus::Pending => write!(f, "pending"),
            SourceStatus::Loaded => write!(f, "loaded"),
            SourceStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Book,
    Info,
    Limits,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Book => "book",
            FetchKind::Info => "info",
            FetchKind::Limits => "limits",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

#[derive(Debug, Clone, Default)]
struct Tracked {
    status: SourceStatus,
    generation: Generation,
}

impl Tracked {
    fn settle(&mut self, generation: Generation, outcome: Result<(), String>) -> bool {
        if self.generation != generation || !self.status.is_pending() {
            return false;
        }
        self.status = match outcome {
            Ok(()) => SourceStatus::Loaded,
            Err(reason) => SourceStatus::Failed(reason),
        };
        true
    }
}

#[derive(Debug, Clone, Default)]
struct FetchProgress {
    book: Tracked,
    info: Tracked,
    limits: Tracked,
}

impl FetchProgress {
    fn get(&self, kind: FetchKind) -> &Tracked {
        match kind {
            FetchKind::Book => &self.book,
            FetchKind::Info => &self.info,
            FetchKind::Limits => &self.limits,
        }
    }

    fn get_mut(&mut self, kind: FetchKind) -> &mut Tracked {
        match kind {
            FetchKind::Book => &mut self.book,
            FetchKind::Info => &mut self.info,
            FetchKind::Limits => &mut self.limits,
        }
    }

    fn any_pending(&self) -> bool {
        self.book.status.is_pending()
            || self.info.status.is_pending()
            || self.limits.status.is_pending()
    }
}

/// Per-coordinator view handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub alias: String,
    pub long_alias: String,
    pub enabled: bool,
    pub url: Option<String>,
    pub book: SourceStatus,
    pub info: SourceStatus,
    pub limits: SourceStatus,
    pub orders: usize,
}

#[derive(Debug, Default)]
pub struct SourceTracker {
    next_generation: u64,
    coordinators: HashMap<String, FetchProgress>,
    relays: BTreeMap<String, Tracked>,
}

impl SourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> Generation {
        self.next_generation += 1;
        Generation(self.next_generation)
    }

    /// Mark a fetch pending and return the generation its completion must present.
    pub fn begin(&mut self, alias: &str, kind: FetchKind) -> Generation {
        let generation = self.bump();
        *self
            .coordinators
            .entry(alias.to_string())
            .or_default()
            .get_mut(kind) = Tracked {
            status: SourceStatus::Pending,
            generation,
        };
        generation
    }

    /// Returns true if this completion was the one the source was waiting for.
    pub fn settle(
        &mut self,
        alias: &str,
        kind: FetchKind,
        generation: Generation,
        outcome: Result<(), String>,
    ) -> bool {
        self.coordinators
            .get_mut(alias)
            .map(|progress| progress.get_mut(kind).settle(generation, outcome))
            .unwrap_or(false)
    }

    pub fn is_pending(&self, alias: &str) -> bool {
        self.coordinators
            .get(alias)
            .map(FetchProgress::any_pending)
            .unwrap_or(false)
    }

    pub fn status(&self, alias: &str, kind: FetchKind) -> SourceStatus {
        self.coordinators
            .get(alias)
            .map(|progress| progress.get(kind).status.clone())
            .unwrap_or_default()
    }

    /// Abandon every pending fetch of `kind`; late completions are ignored.
    pub fn cancel(&mut self, kind: FetchKind) {
        let generation = self.bump();
        for progress in self.coordinators.values_mut() {
            let tracked = progress.get_mut(kind);
            if tracked.status.is_pending() {
                *tracked = Tracked {
                    status: SourceStatus::Idle,
                    generation,
                };
            }
        }
    }

    /// Mark every relay pending under one subscription generation.
    pub fn begin_relays<I, S>(&mut self, urls: I) -> Generation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let generation = self.bump();
        self.relays = urls
            .into_iter()
            .map(|url| {
                (
                    url.into(),
                    Tracked {
                        status: SourceStatus::Pending,
                        generation,
                    },
                )
            })
            .collect();
        generation
    }

    pub fn settle_relay(
        &mut self,
        url: &str,
        generation: Generation,
        outcome: Result<(), String>,
    ) -> bool {
        self.relays
            .get_mut(url)
            .map(|tracked| tracked.settle(generation, outcome))
            .unwrap_or(false)
    }

    /// Fail every relay still pending for `generation`. Returns how many settled.
    pub fn fail_pending_relays(&mut self, generation: Generation, reason: &str) -> usize {
        let mut settled = 0;
        for tracked in self.relays.values_mut() {
            if tracked.settle(generation, Err(reason.to_string())) {
                settled += 1;
            }
        }
        settled
    }

    pub fn clear_relays(&mut self) {
        self.relays.clear();
    }

    pub fn pending_coordinators(&self) -> usize {
        self.coordinators
            .values()
            .filter(|progress| progress.any_pending())
            .count()
    }

    pub fn pending_relays(&self) -> usize {
        self.relays
            .values()
            .filter(|tracked| tracked.status.is_pending())
            .count()
    }

    pub fn relay_statuses(&self) -> BTreeMap<String, SourceStatus> {
        self.relays
            .iter()
            .map(|(url, tracked)| (url.clone(), tracked.status.clone()))
            .collect()
    }

    pub fn coordinator_status(&self, coordinator: &Coordinator) -> CoordinatorStatus {
        let alias = coordinator.alias();
        CoordinatorStatus {
            alias: alias.to_string(),
            long_alias: coordinator.descriptor.long_alias.clone(),
            enabled: coordinator.enabled,
            url: coordinator.url.clone(),
            book: self.status(alias, FetchKind::Book),
            info: self.status(alias, FetchKind::Info),
            limits: self.status(alias, FetchKind::Limits),
            orders: coordinator.book.len(),
        }
    }
}

/// Inputs for one stats recomputation
pub struct StatsInput<'a> {
    pub coordinators: &'a BTreeMap<String, Coordinator>,
    pub book: &'a MergedBook,
    pub tracker: &'a SourceTracker,
    pub mode: ConnectionMode,
    pub online: usize,
    pub include_disabled: bool,
}

/// Full recount; never adjusts counters incrementally.
pub fn compute_stats(input: StatsInput<'_>) -> ExchangeStats {
    let StatsInput {
        coordinators,
        book,
        tracker,
        mode,
        online,
        include_disabled,
    } = input;

    let enabled = coordinators.values().filter(|c| c.enabled).count();
    let pending_coordinators = tracker.pending_coordinators();
    let pending_relays = tracker.pending_relays();

    let mut info = ExchangeInfo::aggregate(
        coordinators
            .values()
            .filter(|c| include_disabled || c.enabled)
            .filter_map(|c| c.info.as_ref()),
    );
    if mode == ConnectionMode::Subscribed {
        info.num_public_buy_orders = book.count(OrderType::Buy);
        info.num_public_sell_orders = book.count(OrderType::Sell);
        info.book_liquidity = book.liquidity_btc();
    }

    ExchangeStats {
        total_coordinators: coordinators.len(),
        enabled_coordinators: enabled,
        online_coordinators: online,
        pending_coordinators,
        pending_relays,
        loading: pending_coordinators > 0 || pending_relays > 0,
        info,
    }
}
