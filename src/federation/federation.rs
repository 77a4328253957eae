//! Federation orchestrator
//!
//! [`Federation`] is a cheap `Clone` handle over one shared state. All state
//! sits behind a single `RwLock`; network work is spawned and re-enters
//! through the write lock when it completes. Every dispatch records the mode
//! epoch and a per-source generation, and a completion whose epoch or
//! generation is no longer current is dropped without touching state.
//!
//! Hooks are triggered after the lock is released, once per operation.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::book::MergedBook;
use super::hooks::{FederationHook, HookHandle, HookRegistry};
use super::mode::{ConnectionMode, Epoch, ModeMachine};
use super::tracker::{
    compute_stats, CoordinatorStatus, FetchKind, Generation, SourceStatus, SourceTracker,
    StatsInput,
};
use crate::coordinator::{
    Coordinator, CoordinatorApi, CoordinatorAttributes, CoordinatorDescriptor,
    CoordinatorEndpoint, FederationDirectory, HostContext, Network, UrlStore,
};
use crate::domain::{ExchangeStats, PublicOrder};
use crate::error::{FedError, Result};
use crate::relay::{
    coordinator_relay_url, decode_order, BookFilter, PubkeyDirectory, RelayMessage, RelayPool,
    RelayService,
};

/// Runtime knobs for the orchestrator
#[derive(Debug, Clone)]
pub struct FederationSettings {
    /// Upper bound for every coordinator request
    pub fetch_timeout: Duration,
    /// Relays that have not delivered their backlog by then are marked failed
    pub eose_timeout: Duration,
    /// Count disabled coordinators in the aggregated exchange info
    pub include_disabled_in_info: bool,
    /// Only request relay events newer than this window
    pub relay_lookback: Option<Duration>,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            eose_timeout: Duration::from_secs(15),
            include_disabled_in_info: true,
            relay_lookback: None,
        }
    }
}

impl FederationSettings {
    fn relay_since(&self) -> Option<i64> {
        self.relay_lookback
            .map(|window| chrono::Utc::now().timestamp() - window.as_secs() as i64)
    }
}

/// A fetch that has been marked pending and is about to be sent
struct Dispatch {
    endpoint: CoordinatorEndpoint,
    generation: Generation,
}

struct FederationState {
    context: HostContext,
    coordinators: BTreeMap<String, Coordinator>,
    book: MergedBook,
    stats: ExchangeStats,
    mode: ModeMachine,
    tracker: SourceTracker,
    online: usize,
    pubkeys: PubkeyDirectory,
    /// Coordinators whose books make up the current polling union
    round: BTreeSet<String>,
    /// Relay generation of the live subscription
    subscription: Option<Generation>,
}

impl FederationState {
    fn recompute(&mut self, include_disabled: bool) {
        self.stats = compute_stats(StatsInput {
            coordinators: &self.coordinators,
            book: &self.book,
            tracker: &self.tracker,
            mode: self.mode.mode(),
            online: self.online,
            include_disabled,
        });
    }

    fn rebuild_union(&mut self) {
        let round = &self.round;
        self.book.replace_with_union(
            self.coordinators
                .values()
                .filter(|c| round.contains(c.alias()))
                .map(|c| &c.book),
        );
    }

    /// Drop the merged book and abandon every in-flight book source.
    fn reset_book(&mut self) {
        self.book.clear();
        self.round.clear();
        self.tracker.cancel(FetchKind::Book);
        self.tracker.clear_relays();
        self.subscription = None;
    }

    fn accepts_relay(&self, epoch: Epoch, generation: Generation) -> bool {
        self.mode.is_current(epoch, ConnectionMode::Subscribed)
            && self.subscription == Some(generation)
    }

    fn insert_coordinator(&mut self, descriptor: CoordinatorDescriptor) -> Option<Coordinator> {
        let replaced_key = self
            .coordinators
            .get(&descriptor.short_alias)
            .and_then(|c| c.descriptor.nostr_hex_pubkey.clone());
        if let Some(pubkey) = replaced_key {
            self.pubkeys.remove(&pubkey, &descriptor.short_alias);
        }
        if let Some(pubkey) = &descriptor.nostr_hex_pubkey {
            self.pubkeys.insert(pubkey, &descriptor.short_alias);
        }
        let coordinator = Coordinator::new(descriptor, &self.context);
        self.coordinators
            .insert(coordinator.alias().to_string(), coordinator)
    }

    /// Mark `kind` pending for each alias. Coordinators without a usable URL
    /// settle as failed straight away.
    fn prepare(&mut self, kind: FetchKind, aliases: Vec<String>) -> Vec<Dispatch> {
        let mut dispatches = Vec::with_capacity(aliases.len());
        for alias in aliases {
            let generation = self.tracker.begin(&alias, kind);
            match self.coordinators.get(&alias).and_then(Coordinator::endpoint) {
                Some(endpoint) => dispatches.push(Dispatch {
                    endpoint,
                    generation,
                }),
                None => {
                    let reason = format!(
                        "no {} url for origin {:?}",
                        self.context.network, self.context.origin
                    );
                    warn!(coordinator = %alias, kind = kind.as_str(), %reason, "skipping fetch");
                    self.tracker.settle(&alias, kind, generation, Err(reason));
                }
            }
        }
        dispatches
    }
}

struct Shared {
    state: RwLock<FederationState>,
    hooks: HookRegistry,
    updated: Notify,
    /// Serializes mode transitions and subscription restarts
    transitions: Mutex<()>,
    api: Arc<dyn CoordinatorApi>,
    relays: Arc<dyn RelayService>,
    url_store: Option<Arc<dyn UrlStore>>,
    settings: FederationSettings,
}

pub struct FederationBuilder {
    directory: FederationDirectory,
    context: HostContext,
    settings: FederationSettings,
    api: Option<Arc<dyn CoordinatorApi>>,
    relays: Option<Arc<dyn RelayService>>,
    url_store: Option<Arc<dyn UrlStore>>,
}

impl FederationBuilder {
    pub fn settings(mut self, settings: FederationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn coordinator_api(mut self, api: Arc<dyn CoordinatorApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Relay transport. Defaults to a [`RelayPool`] over every enabled
    /// coordinator's own relay.
    pub fn relays(mut self, relays: Arc<dyn RelayService>) -> Self {
        self.relays = Some(relays);
        self
    }

    pub fn url_store(mut self, store: Arc<dyn UrlStore>) -> Self {
        self.url_store = Some(store);
        self
    }

    pub fn build(self) -> Result<Federation> {
        let api = self.api.ok_or_else(|| {
            FedError::Validation("federation requires a coordinator client".to_string())
        })?;

        let mut context = self.context;
        if self
            .directory
            .iter()
            .any(|d| d.testnet.contains(&context.host_url))
        {
            info!(host = %context.host_url, "served from a testnet coordinator, using testnet");
            context.network = Network::Testnet;
        }

        let mut state = FederationState {
            context,
            coordinators: BTreeMap::new(),
            book: MergedBook::new(),
            stats: ExchangeStats::default(),
            mode: ModeMachine::new(),
            tracker: SourceTracker::new(),
            online: 0,
            pubkeys: PubkeyDirectory::default(),
            round: BTreeSet::new(),
            subscription: None,
        };
        for descriptor in self.directory.iter() {
            if descriptor.is_local() && !state.context.is_loopback_dev() {
                debug!("skipping local coordinator outside the development host");
                continue;
            }
            state.insert_coordinator(descriptor.clone());
            state.tracker.begin(&descriptor.short_alias, FetchKind::Info);
            state.tracker.begin(&descriptor.short_alias, FetchKind::Limits);
        }

        let relays = match self.relays {
            Some(relays) => relays,
            None => Arc::new(RelayPool::new(default_relay_urls(&state.coordinators))?),
        };

        state.recompute(self.settings.include_disabled_in_info);
        info!(
            coordinators = state.coordinators.len(),
            network = %state.context.network,
            relays = relays.relay_urls().len(),
            "federation initialized"
        );

        Ok(Federation {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                hooks: HookRegistry::new(),
                updated: Notify::new(),
                transitions: Mutex::new(()),
                api,
                relays,
                url_store: self.url_store,
                settings: self.settings,
            }),
        })
    }
}

fn default_relay_urls(coordinators: &BTreeMap<String, Coordinator>) -> Vec<String> {
    coordinators
        .values()
        .filter(|c| c.enabled)
        .filter_map(|c| c.url.as_deref().and_then(coordinator_relay_url))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

async fn bounded<T>(
    limit: Duration,
    kind: FetchKind,
    alias: &str,
    fetch: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(limit, fetch).await.map_err(|_| FedError::Timeout {
        operation: format!("{} fetch from {alias}", kind.as_str()),
        elapsed_ms: limit.as_millis() as u64,
    })?
}

#[derive(Clone)]
pub struct Federation {
    shared: Arc<Shared>,
}

impl Federation {
    pub fn builder(directory: FederationDirectory, context: HostContext) -> FederationBuilder {
        FederationBuilder {
            directory,
            context,
            settings: FederationSettings::default(),
            api: None,
            relays: None,
            url_store: None,
        }
    }

    fn include_disabled(&self) -> bool {
        self.shared.settings.include_disabled_in_info
    }

    fn notify(&self) {
        self.shared.updated.notify_waiters();
        self.shared.hooks.trigger(FederationHook::Updated);
    }

    // ==================== Hooks ====================

    pub fn register_hook<F>(&self, hook: FederationHook, callback: F) -> HookHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.hooks.register(hook, callback)
    }

    pub fn remove_hook(&self, handle: HookHandle) -> bool {
        self.shared.hooks.remove(handle)
    }

    // ==================== Read access ====================

    pub async fn connection_mode(&self) -> ConnectionMode {
        self.shared.state.read().await.mode.mode()
    }

    pub async fn exchange(&self) -> ExchangeStats {
        self.shared.state.read().await.stats.clone()
    }

    pub async fn loading(&self) -> bool {
        self.shared.state.read().await.stats.loading
    }

    pub async fn book(&self) -> MergedBook {
        self.shared.state.read().await.book.clone()
    }

    pub async fn host_context(&self) -> HostContext {
        self.shared.state.read().await.context.clone()
    }

    pub async fn coordinators(&self) -> Vec<Coordinator> {
        self.shared
            .state
            .read()
            .await
            .coordinators
            .values()
            .cloned()
            .collect()
    }

    pub async fn get_coordinator(&self, alias: &str) -> Result<Coordinator> {
        self.shared
            .state
            .read()
            .await
            .coordinators
            .get(alias)
            .cloned()
            .ok_or_else(|| FedError::not_found(alias))
    }

    pub async fn coordinator_status(&self, alias: &str) -> Result<CoordinatorStatus> {
        let state = self.shared.state.read().await;
        let coordinator = state
            .coordinators
            .get(alias)
            .ok_or_else(|| FedError::not_found(alias))?;
        Ok(state.tracker.coordinator_status(coordinator))
    }

    pub async fn coordinator_statuses(&self) -> Vec<CoordinatorStatus> {
        let state = self.shared.state.read().await;
        state
            .coordinators
            .values()
            .map(|c| state.tracker.coordinator_status(c))
            .collect()
    }

    pub async fn relay_statuses(&self) -> BTreeMap<String, SourceStatus> {
        self.shared.state.read().await.tracker.relay_statuses()
    }

    /// Resolves once nothing is pending.
    pub async fn wait_until_loaded(&self) {
        loop {
            let notified = self.shared.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.loading().await {
                return;
            }
            notified.await;
        }
    }

    // ==================== Coordinator set ====================

    /// Insert a coordinator built from `attributes` over the default
    /// descriptor. An existing coordinator with the same alias is replaced
    /// and returned.
    pub async fn add_coordinator(
        &self,
        attributes: CoordinatorAttributes,
    ) -> Result<Option<Coordinator>> {
        let descriptor = attributes.into_descriptor()?;
        let alias = descriptor.short_alias.clone();
        let previous = {
            let mut state = self.shared.state.write().await;
            let previous = state.insert_coordinator(descriptor);
            state.recompute(self.include_disabled());
            previous
        };
        info!(coordinator = %alias, replaced = previous.is_some(), "coordinator added");
        self.notify();
        Ok(previous)
    }

    /// Like [`Federation::add_coordinator`] but refuses to replace.
    pub async fn try_add_coordinator(&self, attributes: CoordinatorAttributes) -> Result<()> {
        let descriptor = attributes.into_descriptor()?;
        let alias = descriptor.short_alias.clone();
        {
            let mut state = self.shared.state.write().await;
            if state.coordinators.contains_key(&alias) {
                return Err(FedError::AliasConflict { alias });
            }
            state.insert_coordinator(descriptor);
            state.recompute(self.include_disabled());
        }
        info!(coordinator = %alias, "coordinator added");
        self.notify();
        Ok(())
    }

    pub async fn enable_coordinator(&self, alias: &str) -> Result<()> {
        self.set_enabled(alias, true).await
    }

    /// Orders already merged from this coordinator stay until the next reload.
    pub async fn disable_coordinator(&self, alias: &str) -> Result<()> {
        self.set_enabled(alias, false).await
    }

    async fn set_enabled(&self, alias: &str, enabled: bool) -> Result<()> {
        {
            let mut state = self.shared.state.write().await;
            let coordinator = state
                .coordinators
                .get_mut(alias)
                .ok_or_else(|| FedError::not_found(alias))?;
            if enabled {
                coordinator.enable();
            } else {
                coordinator.disable();
            }
            state.recompute(self.include_disabled());
        }
        info!(coordinator = %alias, enabled, "coordinator toggled");
        self.notify();
        Ok(())
    }

    /// Re-resolve every coordinator URL for `context` and persist the result
    /// (`alias -> url + base path`) to the configured store.
    pub async fn update_urls(&self, context: HostContext) -> Result<BTreeMap<String, String>> {
        let urls: BTreeMap<String, String> = {
            let mut state = self.shared.state.write().await;
            for coordinator in state.coordinators.values_mut() {
                coordinator.resolve_url(&context);
            }
            state.context = context;
            state.recompute(self.include_disabled());
            state
                .coordinators
                .values()
                .filter_map(|c| {
                    c.url
                        .as_ref()
                        .map(|url| (c.alias().to_string(), format!("{url}{}", c.base_path)))
                })
                .collect()
        };
        if let Some(store) = &self.shared.url_store {
            store.persist(&urls).await?;
        }
        info!(count = urls.len(), "coordinator urls updated");
        self.notify();
        Ok(urls)
    }

    // ==================== Connection mode ====================

    pub async fn set_connection_mode(&self, mode: ConnectionMode) -> Result<()> {
        let _guard = self.shared.transitions.lock().await;
        let transition = {
            let mut state = self.shared.state.write().await;
            let transition = state.mode.transition(mode);
            state.reset_book();
            state.recompute(self.include_disabled());
            transition
        };
        info!(
            from = %transition.from,
            to = %transition.to,
            epoch = %transition.epoch,
            "connection mode changed"
        );

        if transition.from == ConnectionMode::Subscribed {
            self.shared.relays.close().await;
        }
        let outcome = match mode {
            ConnectionMode::Polling => {
                self.start_polling_round(transition.epoch).await;
                Ok(())
            }
            ConnectionMode::Subscribed => {
                self.open_subscription(transition.epoch, transition.cancel)
                    .await
            }
            ConnectionMode::Disconnected => Ok(()),
        };
        self.notify();
        outcome
    }

    /// Load info, limits and the book in `mode`.
    pub async fn start(&self, mode: ConnectionMode) -> Result<()> {
        self.load_info().await;
        self.load_limits().await;
        self.set_connection_mode(mode).await
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self
            .set_connection_mode(ConnectionMode::Disconnected)
            .await
        {
            warn!(error = %e, "failed to disconnect cleanly");
        }
        self.shared.relays.close().await;
        info!("federation shut down");
    }

    // ==================== Polling ====================

    /// Full reload of every enabled coordinator's book.
    pub async fn load_book_polling(&self) -> Result<()> {
        let epoch = self
            .shared
            .state
            .read()
            .await
            .mode
            .require(ConnectionMode::Polling)?;
        self.start_polling_round(epoch).await;
        self.notify();
        Ok(())
    }

    async fn start_polling_round(&self, epoch: Epoch) {
        let dispatches = {
            let mut state = self.shared.state.write().await;
            if !state.mode.is_current(epoch, ConnectionMode::Polling) {
                return;
            }
            let round: BTreeSet<String> = state
                .coordinators
                .values()
                .filter(|c| c.enabled)
                .map(|c| c.alias().to_string())
                .collect();
            for alias in &round {
                if let Some(coordinator) = state.coordinators.get_mut(alias) {
                    coordinator.book.clear();
                }
            }
            state.book.clear();
            state.round = round.clone();
            let dispatches = state.prepare(FetchKind::Book, round.into_iter().collect());
            state.recompute(self.include_disabled());
            dispatches
        };
        debug!(%epoch, fetches = dispatches.len(), "polling round started");

        let limit = self.shared.settings.fetch_timeout;
        for dispatch in dispatches {
            let federation = self.clone();
            tokio::spawn(async move {
                let outcome = bounded(
                    limit,
                    FetchKind::Book,
                    &dispatch.endpoint.alias,
                    federation.shared.api.fetch_book(&dispatch.endpoint),
                )
                .await;
                federation.settle_book(epoch, dispatch, outcome).await;
            });
        }
    }

    async fn settle_book(
        &self,
        epoch: Epoch,
        dispatch: Dispatch,
        outcome: Result<Vec<PublicOrder>>,
    ) {
        let alias = dispatch.endpoint.alias;
        {
            let mut state = self.shared.state.write().await;
            if !state.mode.is_current(epoch, ConnectionMode::Polling) {
                debug!(
                    coordinator = %alias,
                    %epoch,
                    "discarding book from a previous connection mode"
                );
                return;
            }
            let result = outcome.as_ref().map(|_| ()).map_err(ToString::to_string);
            if !state
                .tracker
                .settle(&alias, FetchKind::Book, dispatch.generation, result)
            {
                debug!(coordinator = %alias, "discarding superseded book fetch");
                return;
            }
            if let Some(coordinator) = state.coordinators.get_mut(&alias) {
                match outcome {
                    Ok(orders) => {
                        debug!(coordinator = %alias, orders = orders.len(), "book loaded");
                        coordinator.store_book(orders);
                    }
                    Err(e) => {
                        warn!(coordinator = %alias, error = %e, "book fetch failed");
                        coordinator.book.clear();
                    }
                }
            }
            state.rebuild_union();
            state.recompute(self.include_disabled());
        }
        self.notify();
    }

    // ==================== Info & limits ====================

    /// Fetch `/info` from every coordinator. Results are not tied to the
    /// connection mode; only a newer `load_info` supersedes them.
    pub async fn load_info(&self) {
        let dispatches = self.prepare_all(FetchKind::Info, false).await;
        self.notify();

        let limit = self.shared.settings.fetch_timeout;
        for dispatch in dispatches {
            let federation = self.clone();
            tokio::spawn(async move {
                let outcome = bounded(
                    limit,
                    FetchKind::Info,
                    &dispatch.endpoint.alias,
                    federation.shared.api.fetch_info(&dispatch.endpoint),
                )
                .await;
                federation
                    .settle_fetch(FetchKind::Info, dispatch, outcome, |state, alias, info| {
                        if let Some(coordinator) = state.coordinators.get_mut(alias) {
                            coordinator.info = Some(info);
                        }
                    })
                    .await;
            });
        }
    }

    /// Fetch `/limits` from every coordinator. A coordinator counts as online
    /// once its limits arrive.
    pub async fn load_limits(&self) {
        let dispatches = self.prepare_all(FetchKind::Limits, true).await;
        self.notify();

        let limit = self.shared.settings.fetch_timeout;
        for dispatch in dispatches {
            let federation = self.clone();
            tokio::spawn(async move {
                let outcome = bounded(
                    limit,
                    FetchKind::Limits,
                    &dispatch.endpoint.alias,
                    federation.shared.api.fetch_limits(&dispatch.endpoint),
                )
                .await;
                federation
                    .settle_fetch(FetchKind::Limits, dispatch, outcome, |state, alias, limits| {
                        if let Some(coordinator) = state.coordinators.get_mut(alias) {
                            coordinator.limits = limits;
                        }
                        state.online += 1;
                    })
                    .await;
            });
        }
    }

    async fn prepare_all(&self, kind: FetchKind, reset_online: bool) -> Vec<Dispatch> {
        let mut state = self.shared.state.write().await;
        if reset_online {
            state.online = 0;
        }
        let aliases = state.coordinators.keys().cloned().collect();
        let dispatches = state.prepare(kind, aliases);
        state.recompute(self.include_disabled());
        debug!(kind = kind.as_str(), fetches = dispatches.len(), "fetches dispatched");
        dispatches
    }

    async fn settle_fetch<T, F>(
        &self,
        kind: FetchKind,
        dispatch: Dispatch,
        outcome: Result<T>,
        apply: F,
    ) where
        T: Send,
        F: FnOnce(&mut FederationState, &str, T) + Send,
    {
        let alias = dispatch.endpoint.alias;
        {
            let mut state = self.shared.state.write().await;
            let result = outcome.as_ref().map(|_| ()).map_err(ToString::to_string);
            if !state.tracker.settle(&alias, kind, dispatch.generation, result) {
                debug!(coordinator = %alias, kind = kind.as_str(), "discarding superseded fetch");
                return;
            }
            match outcome {
                Ok(value) => apply(&mut *state, &alias, value),
                Err(e) => {
                    warn!(coordinator = %alias, kind = kind.as_str(), error = %e, "fetch failed")
                }
            }
            state.recompute(self.include_disabled());
        }
        self.notify();
    }

    // ==================== Subscription ====================

    /// Restart the relay subscription from an empty book.
    pub async fn load_book_subscribed(&self) -> Result<()> {
        let _guard = self.shared.transitions.lock().await;
        let (epoch, cancel) = {
            let state = self.shared.state.read().await;
            (
                state.mode.require(ConnectionMode::Subscribed)?,
                state.mode.cancel_token(),
            )
        };
        let outcome = self.open_subscription(epoch, cancel).await;
        self.notify();
        outcome
    }

    async fn open_subscription(&self, epoch: Epoch, cancel: CancellationToken) -> Result<()> {
        let relays = Arc::clone(&self.shared.relays);
        let (generation, filter) = {
            let mut state = self.shared.state.write().await;
            if !state.mode.is_current(epoch, ConnectionMode::Subscribed) {
                return Ok(());
            }
            state.book.clear();
            let generation = state.tracker.begin_relays(relays.relay_urls());
            state.subscription = Some(generation);
            let mut authors: Vec<String> = state.pubkeys.pubkeys().cloned().collect();
            authors.sort();
            state.recompute(self.include_disabled());
            (
                generation,
                BookFilter::orders(authors, self.shared.settings.relay_since()),
            )
        };

        if let Err(e) = relays.connect().await {
            warn!(error = %e, "relay pool connect failed, relays will retry on subscribe");
        }
        let rx = match relays.subscribe_book(filter).await {
            Ok(rx) => rx,
            Err(e) => {
                let mut state = self.shared.state.write().await;
                if state.accepts_relay(epoch, generation) {
                    state
                        .tracker
                        .fail_pending_relays(generation, &e.to_string());
                    state.recompute(self.include_disabled());
                }
                return Err(e);
            }
        };

        let federation = self.clone();
        tokio::spawn(async move {
            federation.pump(rx, epoch, generation, cancel).await;
        });
        Ok(())
    }

    async fn pump(
        self,
        mut rx: mpsc::Receiver<RelayMessage>,
        epoch: Epoch,
        generation: Generation,
        cancel: CancellationToken,
    ) {
        let deadline = tokio::time::sleep(self.shared.settings.eose_timeout);
        tokio::pin!(deadline);
        let mut awaiting_backlog = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%epoch, "relay pump cancelled");
                    break;
                }
                _ = &mut deadline, if awaiting_backlog => {
                    awaiting_backlog = false;
                    let reason = format!(
                        "no end of stream within {}ms",
                        self.shared.settings.eose_timeout.as_millis()
                    );
                    self.fail_pending_relays(epoch, generation, &reason).await;
                }
                message = rx.recv() => match message {
                    Some(message) => self.on_relay_message(epoch, generation, message).await,
                    None => {
                        self.fail_pending_relays(epoch, generation, "subscription closed").await;
                        break;
                    }
                }
            }
        }
    }

    async fn on_relay_message(&self, epoch: Epoch, generation: Generation, message: RelayMessage) {
        let changed = {
            let mut state = self.shared.state.write().await;
            if !state.accepts_relay(epoch, generation) {
                debug!(relay = message.relay(), "discarding message from a closed subscription");
                return;
            }
            let changed = match message {
                RelayMessage::Event { relay, event } => {
                    match decode_order(&event, &state.pubkeys) {
                        // Backlog events are published together once every relay settles.
                        Ok((key, order)) => {
                            state.book.apply(key, order).is_change()
                                && state.tracker.pending_relays() == 0
                        }
                        Err(e) => {
                            warn!(
                                %relay,
                                event = %event.id,
                                error = %e,
                                "skipping undecodable relay event"
                            );
                            false
                        }
                    }
                }
                RelayMessage::EndOfStream { relay } => {
                    let settled = state.tracker.settle_relay(&relay, generation, Ok(()));
                    if settled {
                        debug!(%relay, orders = state.book.len(), "relay backlog delivered");
                    }
                    settled
                }
                RelayMessage::Failed { relay, reason } => {
                    warn!(%relay, %reason, "relay subscription failed");
                    state.tracker.settle_relay(&relay, generation, Err(reason))
                }
            };
            if changed {
                state.recompute(self.include_disabled());
            }
            changed
        };
        if changed {
            self.notify();
        }
    }

    async fn fail_pending_relays(&self, epoch: Epoch, generation: Generation, reason: &str) {
        let settled = {
            let mut state = self.shared.state.write().await;
            if !state.accepts_relay(epoch, generation) {
                return;
            }
            let settled = state.tracker.fail_pending_relays(generation, reason);
            if settled > 0 {
                warn!(relays = settled, %reason, "relays marked failed");
                state.recompute(self.include_disabled());
            }
            settled
        };
        if settled > 0 {
            self.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::client::MockCoordinatorApi;
    use crate::coordinator::{NetworkUrls, Origin, LOOPBACK_DEV_HOST};
    use crate::domain::{CoordinatorInfo, LimitList};
    use crate::relay::pool::MockRelayService;
    use crate::relay::{RawEvent, ORDER_EVENT_KIND};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;

    const MOON_PUBKEY: &str = "7af6f7cfc3bfdf8aa65df2465aa7841096fa8ee6b2d4d14fc43d974e5db9ab96";
    const RELAY: &str = "wss://relay.example/relay/";

    #[derive(Default)]
    struct FakeApi {
        books: HashMap<String, Vec<PublicOrder>>,
        failing: HashSet<String>,
        stalled: HashSet<String>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl CoordinatorApi for FakeApi {
        async fn fetch_book(&self, endpoint: &CoordinatorEndpoint) -> Result<Vec<PublicOrder>> {
            if self.stalled.contains(&endpoint.alias) {
                std::future::pending::<()>().await;
            }
            if let Some(gate) = &self.gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| FedError::Internal(e.to_string()))?;
            }
            if self.failing.contains(&endpoint.alias) {
                return Err(FedError::Internal("coordinator exploded".into()));
            }
            Ok(self.books.get(&endpoint.alias).cloned().unwrap_or_default())
        }

        async fn fetch_info(&self, _endpoint: &CoordinatorEndpoint) -> Result<CoordinatorInfo> {
            Ok(CoordinatorInfo {
                num_public_buy_orders: 1,
                ..Default::default()
            })
        }

        async fn fetch_limits(&self, endpoint: &CoordinatorEndpoint) -> Result<LimitList> {
            if self.failing.contains(&endpoint.alias) {
                return Err(FedError::Internal("coordinator exploded".into()));
            }
            Ok(LimitList::new())
        }
    }

    #[derive(Default)]
    struct FakeRelays {
        urls: Vec<String>,
        sender: StdMutex<Option<mpsc::Sender<RelayMessage>>>,
        closes: AtomicUsize,
    }

    impl FakeRelays {
        fn with_relay() -> Self {
            Self {
                urls: vec![RELAY.to_string()],
                ..Default::default()
            }
        }

        fn sender(&self) -> mpsc::Sender<RelayMessage> {
            self.sender
                .lock()
                .unwrap()
                .clone()
                .expect("subscription should be open")
        }
    }

    #[async_trait]
    impl RelayService for FakeRelays {
        fn relay_urls(&self) -> Vec<String> {
            self.urls.clone()
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {
            self.sender.lock().unwrap().take();
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        async fn subscribe_book(
            &self,
            _filter: BookFilter,
        ) -> Result<mpsc::Receiver<RelayMessage>> {
            let (tx, rx) = mpsc::channel(64);
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        saved: StdMutex<Vec<BTreeMap<String, String>>>,
    }

    #[async_trait]
    impl UrlStore for RecordingStore {
        async fn persist(&self, urls: &BTreeMap<String, String>) -> Result<()> {
            self.saved.lock().unwrap().push(urls.clone());
            Ok(())
        }
    }

    fn descriptor(alias: &str) -> CoordinatorDescriptor {
        CoordinatorDescriptor {
            short_alias: alias.into(),
            long_alias: format!("{alias} coordinator"),
            nostr_hex_pubkey: (alias == "moon").then(|| MOON_PUBKEY.to_string()),
            mainnet: NetworkUrls {
                clearnet: Some(format!("https://{alias}.example")),
                ..Default::default()
            },
            testnet: NetworkUrls {
                clearnet: Some(format!("https://test.{alias}.example")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn directory(aliases: &[&str]) -> FederationDirectory {
        FederationDirectory::from_descriptors(aliases.iter().map(|a| descriptor(a)))
            .expect("valid directory")
    }

    fn context() -> HostContext {
        HostContext::new("client.example", Origin::Clearnet, Network::Mainnet)
    }

    fn settings() -> FederationSettings {
        FederationSettings {
            fetch_timeout: Duration::from_millis(200),
            eose_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn order(id: u64, side: u8) -> PublicOrder {
        serde_json::from_value(json!({
            "id": id,
            "created_at": "2024-03-01T10:00:00Z",
            "expires_at": "2024-03-02T10:00:00Z",
            "type": side,
            "currency": 1,
            "satoshis_now": 100000,
        }))
        .expect("valid order")
    }

    fn order_event(key: &str, status: &str) -> RelayMessage {
        let tags = [
            vec!["d", key],
            vec!["k", "sell"],
            vec!["f", "eur"],
            vec!["s", status],
            vec!["amt", "50000"],
            vec!["fa", "100"],
            vec!["pm", "SEPA"],
            vec!["premium", "1"],
            vec!["bond", "3"],
        ];
        RelayMessage::Event {
            relay: RELAY.to_string(),
            event: RawEvent {
                id: format!("{key}-{status}"),
                pubkey: MOON_PUBKEY.to_string(),
                created_at: 1_700_000_000,
                kind: ORDER_EVENT_KIND,
                tags: tags
                    .iter()
                    .map(|tag| tag.iter().map(|s| s.to_string()).collect())
                    .collect(),
                content: String::new(),
                sig: String::new(),
            },
        }
    }

    fn end_of_stream() -> RelayMessage {
        RelayMessage::EndOfStream {
            relay: RELAY.to_string(),
        }
    }

    fn federation(api: FakeApi, relays: Arc<FakeRelays>) -> Federation {
        Federation::builder(directory(&["lake", "moon"]), context())
            .settings(settings())
            .coordinator_api(Arc::new(api))
            .relays(relays)
            .build()
            .expect("federation builds")
    }

    async fn settle(federation: &Federation) {
        tokio::time::timeout(Duration::from_secs(2), federation.wait_until_loaded())
            .await
            .expect("federation should settle");
    }

    /// Federation with info and limits loaded, so only book sources are pending.
    async fn ready(api: FakeApi, relays: Arc<FakeRelays>) -> Federation {
        let federation = federation(api, relays);
        federation.load_info().await;
        federation.load_limits().await;
        settle(&federation).await;
        federation
    }

    fn count_updates(federation: &Federation) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        federation.register_hook(FederationHook::Updated, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn book_keys(book: &MergedBook) -> Vec<String> {
        book.orders().keys().cloned().collect()
    }

    #[tokio::test]
    async fn construction_skips_local_off_the_dev_host() {
        let directory = directory(&["lake", "local", "moon"]);
        let federation = Federation::builder(directory.clone(), context())
            .coordinator_api(Arc::new(FakeApi::default()))
            .relays(Arc::new(FakeRelays::default()))
            .build()
            .expect("federation builds");

        let stats = federation.exchange().await;
        assert_eq!(stats.total_coordinators, 2);
        assert_eq!(stats.pending_coordinators, 2);
        assert!(stats.loading);
        assert!(federation.get_coordinator("local").await.is_err());

        let dev = HostContext::new(LOOPBACK_DEV_HOST, Origin::Clearnet, Network::Mainnet);
        let federation = Federation::builder(directory, dev)
            .coordinator_api(Arc::new(FakeApi::default()))
            .relays(Arc::new(FakeRelays::default()))
            .build()
            .expect("federation builds");
        assert_eq!(federation.exchange().await.total_coordinators, 3);
    }

    #[tokio::test]
    async fn testnet_host_switches_network() {
        let host = HostContext::new("test.moon.example", Origin::Clearnet, Network::Mainnet);
        let federation = Federation::builder(directory(&["lake", "moon"]), host)
            .coordinator_api(Arc::new(FakeApi::default()))
            .relays(Arc::new(FakeRelays::default()))
            .build()
            .expect("federation builds");

        assert_eq!(federation.host_context().await.network, Network::Testnet);
        let lake = federation.get_coordinator("lake").await.expect("lake exists");
        assert_eq!(lake.url.as_deref(), Some("https://test.lake.example"));
    }

    #[tokio::test]
    async fn default_relays_come_from_coordinator_urls() {
        let federation = Federation::builder(directory(&["lake", "moon"]), context())
            .coordinator_api(Arc::new(FakeApi::default()))
            .build()
            .expect("federation builds");
        assert_eq!(
            federation.shared.relays.relay_urls(),
            vec![
                "wss://lake.example/relay/".to_string(),
                "wss://moon.example/relay/".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn enable_disable_round_trip() {
        let federation = federation(FakeApi::default(), Arc::new(FakeRelays::default()));
        let updates = count_updates(&federation);

        federation.disable_coordinator("moon").await.expect("known alias");
        assert_eq!(federation.exchange().await.enabled_coordinators, 1);
        federation.enable_coordinator("moon").await.expect("known alias");
        assert_eq!(federation.exchange().await.enabled_coordinators, 2);
        assert_eq!(updates.load(Ordering::SeqCst), 2);

        assert!(matches!(
            federation.disable_coordinator("mars").await,
            Err(FedError::CoordinatorNotFound { .. })
        ));
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn added_coordinator_keeps_defaults_for_omitted_fields() {
        let federation = federation(FakeApi::default(), Arc::new(FakeRelays::default()));

        let previous = federation
            .add_coordinator(CoordinatorAttributes::with_alias("sun"))
            .await
            .expect("valid attributes");
        assert!(previous.is_none());

        let sun = federation.get_coordinator("sun").await.expect("sun exists");
        assert_eq!(sun.descriptor.color, "#000000");
        assert!(sun.enabled);
        assert!(sun.url.is_none());
        assert_eq!(federation.exchange().await.total_coordinators, 3);

        let replaced = federation
            .add_coordinator(CoordinatorAttributes {
                long_alias: Some("Sun Federation".into()),
                ..CoordinatorAttributes::with_alias("sun")
            })
            .await
            .expect("valid attributes");
        assert_eq!(replaced.map(|c| c.descriptor.long_alias), Some(String::new()));

        assert!(matches!(
            federation
                .try_add_coordinator(CoordinatorAttributes::with_alias("sun"))
                .await,
            Err(FedError::AliasConflict { .. })
        ));
        assert_eq!(federation.exchange().await.total_coordinators, 3);
    }

    #[tokio::test]
    async fn replacing_a_coordinator_drops_its_old_relay_key() {
        let federation = federation(FakeApi::default(), Arc::new(FakeRelays::default()));
        let new_key = "1111111111111111111111111111111111111111111111111111111111111111";

        federation
            .add_coordinator(CoordinatorAttributes {
                nostr_hex_pubkey: Some(new_key.into()),
                ..CoordinatorAttributes::with_alias("moon")
            })
            .await
            .expect("valid attributes");

        let state = federation.shared.state.read().await;
        let keys: Vec<String> = state.pubkeys.pubkeys().cloned().collect();
        assert_eq!(keys, vec![new_key.to_string()]);
        assert_eq!(state.pubkeys.alias_for(new_key), Some("moon"));
        assert!(state.pubkeys.alias_for(MOON_PUBKEY).is_none());
    }

    #[tokio::test]
    async fn polling_merges_books_keyed_by_alias_and_id() {
        let mut api = FakeApi::default();
        api.books.insert("moon".into(), vec![order(1, 0), order(2, 1)]);
        api.books.insert("lake".into(), vec![order(1, 1)]);
        let federation = ready(api, Arc::new(FakeRelays::default())).await;

        federation
            .set_connection_mode(ConnectionMode::Polling)
            .await
            .expect("mode switch");
        settle(&federation).await;

        let book = federation.book().await;
        assert_eq!(book_keys(&book), vec!["lake/1", "moon/1", "moon/2"]);
        assert_eq!(
            book.get("lake/1").and_then(|o| o.coordinator_short_alias.clone()),
            Some("lake".to_string())
        );
        let status = federation.coordinator_status("moon").await.expect("moon exists");
        assert_eq!(status.book, SourceStatus::Loaded);
        assert_eq!(status.orders, 2);
    }

    #[tokio::test]
    async fn polling_reload_requires_polling_mode() {
        let federation = federation(FakeApi::default(), Arc::new(FakeRelays::default()));
        assert!(matches!(
            federation.load_book_polling().await,
            Err(FedError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn failed_and_stalled_fetches_settle_as_failed() {
        let mut api = FakeApi::default();
        api.failing.insert("moon".into());
        api.stalled.insert("lake".into());
        let federation = federation(api, Arc::new(FakeRelays::default()));
        federation.load_info().await;
        federation.load_limits().await;

        federation
            .set_connection_mode(ConnectionMode::Polling)
            .await
            .expect("mode switch");
        settle(&federation).await;

        let lake = federation.coordinator_status("lake").await.expect("lake exists");
        assert!(matches!(lake.book, SourceStatus::Failed(reason) if reason.contains("200ms")));
        let moon = federation.coordinator_status("moon").await.expect("moon exists");
        assert!(matches!(moon.book, SourceStatus::Failed(_)));
        assert!(matches!(moon.limits, SourceStatus::Failed(_)));

        let stats = federation.exchange().await;
        assert!(!stats.loading);
        assert_eq!(stats.online_coordinators, 1);
        assert!(federation.book().await.is_empty());
    }

    #[tokio::test]
    async fn subscribed_merge_honours_event_order() {
        let relays = Arc::new(FakeRelays::with_relay());
        let federation = ready(FakeApi::default(), Arc::clone(&relays)).await;
        federation
            .set_connection_mode(ConnectionMode::Subscribed)
            .await
            .expect("mode switch");
        assert!(federation.loading().await);

        let tx = relays.sender();
        // insert then tombstone
        tx.send(order_event("k1", "pending")).await.expect("pump alive");
        tx.send(order_event("k2", "pending")).await.expect("pump alive");
        tx.send(order_event("k1", "canceled")).await.expect("pump alive");
        // tombstone then insert
        tx.send(order_event("k3", "canceled")).await.expect("pump alive");
        tx.send(order_event("k3", "pending")).await.expect("pump alive");
        tx.send(order_event("k4", "pending")).await.expect("pump alive");
        tx.send(end_of_stream()).await.expect("pump alive");
        settle(&federation).await;

        let book = federation.book().await;
        assert_eq!(book_keys(&book), vec!["k2", "k3", "k4"]);
        let stats = federation.exchange().await;
        assert_eq!(stats.info.num_public_sell_orders, 3);
        assert_eq!(stats.info.num_public_buy_orders, 0);
        assert_eq!(
            federation.relay_statuses().await.get(RELAY),
            Some(&SourceStatus::Loaded)
        );
    }

    #[tokio::test]
    async fn switching_to_polling_cuts_off_relay_events() {
        let mut api = FakeApi::default();
        api.books.insert("moon".into(), vec![order(7, 0)]);
        let relays = Arc::new(FakeRelays::with_relay());
        let federation = ready(api, Arc::clone(&relays)).await;

        federation
            .set_connection_mode(ConnectionMode::Subscribed)
            .await
            .expect("mode switch");
        let tx = relays.sender();
        tx.send(order_event("k1", "pending")).await.expect("pump alive");
        tx.send(end_of_stream()).await.expect("pump alive");
        settle(&federation).await;
        assert_eq!(book_keys(&federation.book().await), vec!["k1"]);

        federation
            .set_connection_mode(ConnectionMode::Polling)
            .await
            .expect("mode switch");
        settle(&federation).await;
        let _ = tx.send(order_event("k9", "pending")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(book_keys(&federation.book().await), vec!["moon/7"]);
        assert_eq!(relays.closes.load(Ordering::SeqCst), 1);
        assert!(federation.relay_statuses().await.is_empty());
    }

    #[tokio::test]
    async fn stale_polling_completion_is_discarded_after_mode_switch() {
        let gate = Arc::new(Semaphore::new(0));
        let mut api = FakeApi::default();
        api.books.insert("moon".into(), vec![order(1, 0)]);
        api.gate = Some(Arc::clone(&gate));
        let federation = ready(api, Arc::new(FakeRelays::with_relay())).await;

        federation
            .set_connection_mode(ConnectionMode::Polling)
            .await
            .expect("mode switch");
        assert_eq!(federation.exchange().await.pending_coordinators, 2);

        federation
            .set_connection_mode(ConnectionMode::Subscribed)
            .await
            .expect("mode switch");
        gate.add_permits(8);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(federation.book().await.is_empty());
        let moon = federation.coordinator_status("moon").await.expect("moon exists");
        assert_eq!(moon.book, SourceStatus::Idle);
        assert_eq!(moon.orders, 0);
        let stats = federation.exchange().await;
        assert_eq!(stats.pending_coordinators, 0);
        assert_eq!(stats.pending_relays, 1);
    }

    #[tokio::test]
    async fn silent_relay_fails_after_eose_timeout() {
        let relays = Arc::new(FakeRelays::with_relay());
        let federation = Federation::builder(directory(&["moon"]), context())
            .settings(FederationSettings {
                eose_timeout: Duration::from_millis(100),
                ..settings()
            })
            .coordinator_api(Arc::new(FakeApi::default()))
            .relays(relays)
            .build()
            .expect("federation builds");
        federation.load_info().await;
        federation.load_limits().await;

        federation
            .set_connection_mode(ConnectionMode::Subscribed)
            .await
            .expect("mode switch");
        settle(&federation).await;

        assert!(matches!(
            federation.relay_statuses().await.get(RELAY),
            Some(SourceStatus::Failed(_))
        ));
    }

    #[tokio::test]
    async fn undecodable_events_are_skipped_without_ending_the_subscription() {
        let relays = Arc::new(FakeRelays::with_relay());
        let federation = ready(FakeApi::default(), Arc::clone(&relays)).await;
        federation
            .set_connection_mode(ConnectionMode::Subscribed)
            .await
            .expect("mode switch");

        let mut no_key = order_event("k0", "pending");
        if let RelayMessage::Event { event, .. } = &mut no_key {
            event.tags.retain(|tag| tag.first().map(String::as_str) != Some("d"));
        }
        let mut wrong_kind = order_event("k9", "pending");
        if let RelayMessage::Event { event, .. } = &mut wrong_kind {
            event.kind = 1;
        }

        let tx = relays.sender();
        tx.send(no_key).await.expect("pump alive");
        tx.send(wrong_kind).await.expect("pump alive");
        tx.send(order_event("k1", "pending")).await.expect("pump alive");
        tx.send(end_of_stream()).await.expect("pump alive");
        settle(&federation).await;

        assert_eq!(book_keys(&federation.book().await), vec!["k1"]);
        assert_eq!(
            federation.relay_statuses().await.get(RELAY),
            Some(&SourceStatus::Loaded)
        );
    }

    #[tokio::test]
    async fn relay_failure_settles_the_pending_relay() {
        let relays = Arc::new(FakeRelays::with_relay());
        let federation = ready(FakeApi::default(), Arc::clone(&relays)).await;
        federation
            .set_connection_mode(ConnectionMode::Subscribed)
            .await
            .expect("mode switch");
        assert!(federation.loading().await);

        relays
            .sender()
            .send(RelayMessage::Failed {
                relay: RELAY.to_string(),
                reason: "rate limited".to_string(),
            })
            .await
            .expect("pump alive");
        settle(&federation).await;

        assert!(matches!(
            federation.relay_statuses().await.get(RELAY),
            Some(SourceStatus::Failed(reason)) if reason == "rate limited"
        ));
        let stats = federation.exchange().await;
        assert!(!stats.loading);
        assert_eq!(stats.pending_relays, 0);
    }

    #[tokio::test]
    async fn hooks_fire_once_per_operation_in_registration_order() {
        let federation = federation(FakeApi::default(), Arc::new(FakeRelays::default()));
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let handles: Vec<_> = (0..2)
            .map(|id| {
                let calls = Arc::clone(&calls);
                federation.register_hook(FederationHook::Updated, move || {
                    calls.lock().unwrap().push(id);
                })
            })
            .collect();

        federation.disable_coordinator("lake").await.expect("known alias");
        assert_eq!(*calls.lock().unwrap(), vec![0, 1]);

        assert!(federation.remove_hook(handles[0]));
        federation.enable_coordinator("lake").await.expect("known alias");
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 1]);

        federation
            .set_connection_mode(ConnectionMode::Disconnected)
            .await
            .expect("mode switch");
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 1, 1]);
    }

    #[tokio::test]
    async fn update_urls_persists_selfhosted_routes() {
        let store = Arc::new(RecordingStore::default());
        let federation = Federation::builder(directory(&["lake", "moon"]), context())
            .coordinator_api(Arc::new(FakeApi::default()))
            .relays(Arc::new(FakeRelays::default()))
            .url_store(Arc::clone(&store) as Arc<dyn UrlStore>)
            .build()
            .expect("federation builds");

        let mut selfhosted = HostContext::new("node.example", Origin::Clearnet, Network::Mainnet);
        selfhosted.selfhosted = true;
        let urls = federation.update_urls(selfhosted).await.expect("persisted");

        assert_eq!(urls["moon"], "https://node.example/mainnet/moon");
        assert_eq!(store.saved.lock().unwrap().as_slice(), &[urls]);
    }

    #[tokio::test]
    async fn coordinator_without_url_is_never_fetched() {
        let mut api = MockCoordinatorApi::new();
        api.expect_fetch_info()
            .times(1)
            .returning(|_| Ok(CoordinatorInfo::default()));

        let mut unreachable = descriptor("void");
        unreachable.mainnet = NetworkUrls::default();
        let directory = FederationDirectory::from_descriptors([descriptor("moon"), unreachable])
            .expect("valid directory");
        let federation = Federation::builder(directory, context())
            .coordinator_api(Arc::new(api))
            .relays(Arc::new(FakeRelays::default()))
            .build()
            .expect("federation builds");

        federation.load_info().await;
        let void = federation.coordinator_status("void").await.expect("void exists");
        assert!(matches!(void.info, SourceStatus::Failed(_)));

        tokio::time::timeout(Duration::from_secs(2), async {
            while federation
                .coordinator_status("moon")
                .await
                .map(|s| s.info.is_pending())
                .unwrap_or(false)
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("moon info should settle");
        let moon = federation.get_coordinator("moon").await.expect("moon exists");
        assert!(moon.info.is_some());
    }

    #[tokio::test]
    async fn subscribe_failure_marks_relays_failed() {
        let mut relays = MockRelayService::new();
        relays
            .expect_relay_urls()
            .return_const(vec![RELAY.to_string()]);
        relays.expect_connect().returning(|| Ok(()));
        relays
            .expect_subscribe_book()
            .returning(|_| Err(FedError::RelayUnavailable("refused".into())));
        let federation = Federation::builder(directory(&["moon"]), context())
            .coordinator_api(Arc::new(FakeApi::default()))
            .relays(Arc::new(relays))
            .build()
            .expect("federation builds");

        assert!(federation
            .set_connection_mode(ConnectionMode::Subscribed)
            .await
            .is_err());
        assert_eq!(federation.exchange().await.pending_relays, 0);
        assert!(matches!(
            federation.relay_statuses().await.get(RELAY),
            Some(SourceStatus::Failed(_))
        ));
    }
}
