use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{CarId, CarRecord, ConnectionStatus},
    error::BackendError,
    protocol::{DiscoveryEvent, DiscoveryEventKind, DiscoveryStatus},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

pub mod camera;
pub mod sim;

pub const STATUS_STARTING: &str = "Starting...";
pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_STOPPED: &str = "Stopped";
pub const STATUS_ERROR: &str = "Error";

const EVENT_LANE_CAPACITY: usize = 256;

type ObserverCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct ObserverRegistry<T> {
    observers: Arc<Mutex<HashMap<u64, ObserverCallback<T>>>>,
    next_id: AtomicU64,
}

pub struct ObserverHandle {
    cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl ObserverHandle {
    pub fn unsubscribe(self) {
        (self.cancel)();
    }
}

impl<T: 'static> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));

        let observers = Arc::downgrade(&self.observers);
        ObserverHandle {
            cancel: Box::new(move || {
                if let Some(observers) = observers.upgrade() {
                    observers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                }
            }),
        }
    }

    /// Invokes every live callback with the payload. Callbacks run outside
    /// the registry lock, so they may subscribe or unsubscribe freely.
    pub fn notify(&self, payload: &T) {
        let callbacks: Vec<ObserverCallback<T>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(payload);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: 'static> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct RosterUpdate {
    pub cars: Vec<CarRecord>,
    pub count: usize,
}

struct RosterEntry {
    car: CarRecord,
    rank: u64,
}

struct RosterState {
    cars: HashMap<CarId, RosterEntry>,
    next_rank: u64,
    last_error: Option<String>,
}

/// Id-keyed roster of currently known cars. Every mutation recomputes the
/// number-ordered view and fans it out to subscribed roster observers.
pub struct DiscoveryStore {
    inner: Mutex<RosterState>,
    car_observers: ObserverRegistry<RosterUpdate>,
}

impl DiscoveryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RosterState {
                cars: HashMap::new(),
                next_rank: 0,
                last_error: None,
            }),
            car_observers: ObserverRegistry::new(),
        }
    }

    pub fn upsert(&self, car: CarRecord) {
        let update = {
            let mut state = self.state();
            let existing_rank = state.cars.get(&car.id).map(|entry| entry.rank);
            let rank = match existing_rank {
                Some(rank) => rank,
                None => {
                    let rank = state.next_rank;
                    state.next_rank += 1;
                    rank
                }
            };
            state.cars.insert(car.id.clone(), RosterEntry { car, rank });
            Self::snapshot(&state)
        };
        self.car_observers.notify(&update);
    }

    pub fn remove(&self, car_id: &CarId) -> Option<CarRecord> {
        let (removed, update) = {
            let mut state = self.state();
            let removed = state.cars.remove(car_id).map(|entry| entry.car);
            let update = removed.as_ref().map(|_| Self::snapshot(&state));
            (removed, update)
        };
        if let Some(update) = update {
            self.car_observers.notify(&update);
        }
        removed
    }

    pub fn clear(&self) {
        let update = {
            let mut state = self.state();
            if state.cars.is_empty() {
                None
            } else {
                state.cars.clear();
                Some(Self::snapshot(&state))
            }
        };
        if let Some(update) = update {
            self.car_observers.notify(&update);
        }
    }

    pub fn get(&self, car_id: &CarId) -> Option<CarRecord> {
        self.state().cars.get(car_id).map(|entry| entry.car.clone())
    }

    pub fn get_by_number(&self, number: u32) -> Option<CarRecord> {
        self.list_ordered_by_number()
            .into_iter()
            .find(|car| car.number == number)
    }

    pub fn filter_by_team(&self, team: &str) -> Vec<CarRecord> {
        let needle = team.to_lowercase();
        self.list_ordered_by_number()
            .into_iter()
            .filter(|car| car.team.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn filter_by_driver(&self, driver: &str) -> Vec<CarRecord> {
        let needle = driver.to_lowercase();
        self.list_ordered_by_number()
            .into_iter()
            .filter(|car| car.driver.to_lowercase().contains(&needle))
            .collect()
    }

    /// Ascending by racing number; cars sharing a number keep the order they
    /// first entered the roster.
    pub fn list_ordered_by_number(&self) -> Vec<CarRecord> {
        Self::ordered(&self.state())
    }

    pub fn count(&self) -> usize {
        self.state().cars.len()
    }

    pub fn subscribe_cars(
        &self,
        callback: impl Fn(&RosterUpdate) + Send + Sync + 'static,
    ) -> ObserverHandle {
        self.car_observers.subscribe(callback)
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.state().last_error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.state().last_error = None;
    }

    pub(crate) fn upsert_if_present(&self, car: CarRecord) -> bool {
        let update = {
            let mut state = self.state();
            let Some(rank) = state.cars.get(&car.id).map(|entry| entry.rank) else {
                return false;
            };
            state.cars.insert(car.id.clone(), RosterEntry { car, rank });
            Self::snapshot(&state)
        };
        self.car_observers.notify(&update);
        true
    }

    fn state(&self) -> MutexGuard<'_, RosterState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ordered(state: &RosterState) -> Vec<CarRecord> {
        let mut entries: Vec<&RosterEntry> = state.cars.values().collect();
        entries.sort_by_key(|entry| (entry.car.number, entry.rank));
        entries.into_iter().map(|entry| entry.car.clone()).collect()
    }

    fn snapshot(state: &RosterState) -> RosterUpdate {
        let cars = Self::ordered(state);
        let count = cars.len();
        RosterUpdate { cars, count }
    }
}

impl Default for DiscoveryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct SelectionState {
    selected: Option<CarId>,
    connection_status: ConnectionStatus,
}

/// Tracks the single car the operator is focused on. Holds no truth of its
/// own beyond the pointer; connection status is derived from the roster.
pub struct SelectionCoordinator {
    store: Arc<DiscoveryStore>,
    inner: Mutex<SelectionState>,
}

impl SelectionCoordinator {
    pub fn new(store: Arc<DiscoveryStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(SelectionState {
                selected: None,
                connection_status: ConnectionStatus::Disconnected,
            }),
        }
    }

    pub fn select(&self, car_id: CarId) {
        let status = self
            .store
            .get(&car_id)
            .map(|car| car.connection_status)
            .unwrap_or(ConnectionStatus::Disconnected);
        info!(car_id = %car_id.0, "car selected");
        let mut state = self.state();
        state.selected = Some(car_id);
        state.connection_status = status;
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.selected = None;
        state.connection_status = ConnectionStatus::Disconnected;
    }

    pub fn selected_id(&self) -> Option<CarId> {
        self.state().selected.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state().connection_status
    }

    pub(crate) fn on_roster_update(&self, update: &RosterUpdate) {
        let mut state = self.state();
        let Some(selected) = state.selected.clone() else {
            return;
        };
        state.connection_status = update
            .cars
            .iter()
            .find(|car| car.id == selected)
            .map(|car| car.connection_status)
            .unwrap_or(ConnectionStatus::Disconnected);
    }

    pub(crate) fn handle_removed(&self, car_id: &CarId) {
        let mut state = self.state();
        if state.selected.as_ref() == Some(car_id) {
            info!(car_id = %car_id.0, "selected car removed, clearing selection");
            state.selected = None;
            state.connection_status = ConnectionStatus::Disconnected;
        }
    }

    fn state(&self) -> MutexGuard<'_, SelectionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    async fn start_discovery(&self) -> Result<(), BackendError>;
    async fn stop_discovery(&self) -> Result<(), BackendError>;
    async fn discovered_cars(&self) -> Result<Vec<CarRecord>, BackendError>;
    async fn car_by_id(&self, car_id: &CarId) -> Result<Option<CarRecord>, BackendError>;
    async fn is_discovery_running(&self) -> Result<bool, BackendError>;
    fn subscribe(&self, kind: DiscoveryEventKind) -> broadcast::Receiver<DiscoveryEvent>;
}

pub struct EventLanes {
    lanes: [broadcast::Sender<DiscoveryEvent>; 5],
}

impl EventLanes {
    pub fn new(capacity: usize) -> Self {
        Self {
            lanes: std::array::from_fn(|_| broadcast::channel(capacity).0),
        }
    }

    pub fn subscribe(&self, kind: DiscoveryEventKind) -> broadcast::Receiver<DiscoveryEvent> {
        self.lanes[Self::lane_index(kind)].subscribe()
    }

    pub fn publish(&self, event: DiscoveryEvent) {
        let _ = self.lanes[Self::lane_index(event.kind())].send(event);
    }

    fn lane_index(kind: DiscoveryEventKind) -> usize {
        match kind {
            DiscoveryEventKind::CarDiscovered => 0,
            DiscoveryEventKind::CarUpdated => 1,
            DiscoveryEventKind::CarOffline => 2,
            DiscoveryEventKind::CarRemoved => 3,
            DiscoveryEventKind::Status => 4,
        }
    }
}

impl Default for EventLanes {
    fn default() -> Self {
        Self::new(EVENT_LANE_CAPACITY)
    }
}

pub struct MissingBackend {
    events: EventLanes,
}

impl MissingBackend {
    pub fn new() -> Self {
        Self {
            events: EventLanes::default(),
        }
    }
}

impl Default for MissingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryBackend for MissingBackend {
    async fn start_discovery(&self) -> Result<(), BackendError> {
        Err(BackendError::internal("discovery backend not configured"))
    }

    async fn stop_discovery(&self) -> Result<(), BackendError> {
        Err(BackendError::internal("discovery backend not configured"))
    }

    async fn discovered_cars(&self) -> Result<Vec<CarRecord>, BackendError> {
        Err(BackendError::internal("discovery backend not configured"))
    }

    async fn car_by_id(&self, _car_id: &CarId) -> Result<Option<CarRecord>, BackendError> {
        Err(BackendError::internal("discovery backend not configured"))
    }

    async fn is_discovery_running(&self) -> Result<bool, BackendError> {
        Err(BackendError::internal("discovery backend not configured"))
    }

    fn subscribe(&self, kind: DiscoveryEventKind) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe(kind)
    }
}

struct BridgeState {
    is_running: bool,
    status_message: String,
    listener_tasks: Vec<JoinHandle<()>>,
}

/// Binds one forwarding task per backend event kind and performs exactly one
/// roster mutation per event, in delivery order.
pub struct EventBridge {
    backend: Arc<dyn DiscoveryBackend>,
    store: Arc<DiscoveryStore>,
    selection: Arc<SelectionCoordinator>,
    inner: Mutex<BridgeState>,
    status_observers: ObserverRegistry<DiscoveryStatus>,
}

impl EventBridge {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        store: Arc<DiscoveryStore>,
        selection: Arc<SelectionCoordinator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            store,
            selection,
            inner: Mutex::new(BridgeState {
                is_running: false,
                status_message: STATUS_STOPPED.to_string(),
                listener_tasks: Vec::new(),
            }),
            status_observers: ObserverRegistry::new(),
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), BackendError> {
        info!("starting car discovery");
        self.store.clear_error();
        self.set_status(false, STATUS_STARTING);

        let tasks: Vec<JoinHandle<()>> = DiscoveryEventKind::ALL
            .iter()
            .map(|kind| self.spawn_listener(*kind))
            .collect();
        {
            let mut state = self.state();
            for stale in state.listener_tasks.drain(..) {
                stale.abort();
            }
            state.listener_tasks = tasks;
        }

        if let Err(err) = self.backend.start_discovery().await {
            error!(error = %err, "discovery start failed");
            self.store.set_error(err.to_string());
            self.set_status(false, STATUS_ERROR);
            return Err(err);
        }

        self.state().is_running = true;

        // Picks up cars the backend found before our listeners were live.
        self.refresh_roster().await?;

        self.set_status(true, STATUS_RUNNING);
        Ok(())
    }

    pub async fn stop(&self) {
        info!("stopping car discovery");
        self.store.clear_error();
        if let Err(err) = self.backend.stop_discovery().await {
            error!(error = %err, "discovery stop failed");
        }
        self.set_status(false, STATUS_STOPPED);

        let tasks: Vec<JoinHandle<()>> = {
            let mut state = self.state();
            state.listener_tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
    }

    /// Replaces the whole roster with the backend's current snapshot. The
    /// clear happens first so no stale entry survives a refresh cycle.
    pub async fn refresh_roster(&self) -> Result<Vec<CarRecord>, BackendError> {
        self.store.clear_error();
        match self.backend.discovered_cars().await {
            Ok(cars) => {
                self.store.clear();
                for car in &cars {
                    self.store.upsert(car.clone());
                }
                debug!(count = cars.len(), "roster refreshed");
                Ok(cars)
            }
            Err(err) => {
                error!(error = %err, "roster refresh failed");
                self.store.set_error(err.to_string());
                self.set_status(false, STATUS_ERROR);
                Err(err)
            }
        }
    }

    pub async fn car_by_id(&self, car_id: &CarId) -> Option<CarRecord> {
        if let Some(car) = self.store.get(car_id) {
            return Some(car);
        }
        match self.backend.car_by_id(car_id).await {
            Ok(Some(car)) => {
                self.store.upsert(car.clone());
                Some(car)
            }
            Ok(None) => None,
            Err(err) => {
                error!(car_id = %car_id.0, error = %err, "car lookup failed");
                self.store.set_error(err.to_string());
                None
            }
        }
    }

    pub async fn check_is_running(&self) -> bool {
        match self.backend.is_discovery_running().await {
            Ok(running) => {
                self.adopt_running(running);
                running
            }
            Err(err) => {
                error!(error = %err, "discovery health check failed");
                self.store.set_error(err.to_string());
                self.adopt_running(false);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running
    }

    pub fn status_message(&self) -> String {
        self.state().status_message.clone()
    }

    pub fn subscribe_status(
        &self,
        callback: impl Fn(&DiscoveryStatus) + Send + Sync + 'static,
    ) -> ObserverHandle {
        self.status_observers.subscribe(callback)
    }

    fn spawn_listener(self: &Arc<Self>, kind: DiscoveryEventKind) -> JoinHandle<()> {
        let mut events = self.backend.subscribe(kind);
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.kind() != kind {
                            warn!(
                                lane = ?kind,
                                got = ?event.kind(),
                                "event on wrong lane, dropping"
                            );
                            continue;
                        }
                        bridge.apply_event(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(lane = ?kind, skipped, "discovery event lane lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn apply_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::CarDiscovered { car } => {
                info!(
                    car_id = %car.id.0,
                    number = car.number,
                    driver = %car.driver,
                    "car discovered"
                );
                self.store.upsert(car);
            }
            DiscoveryEvent::CarUpdated { car } => {
                debug!(car_id = %car.id.0, number = car.number, "car updated");
                self.store.upsert(car);
            }
            DiscoveryEvent::CarOffline { car } => {
                // An offline marker must never introduce a record on its own.
                if self.store.upsert_if_present(car.clone()) {
                    info!(car_id = %car.id.0, number = car.number, "car offline");
                } else {
                    debug!(car_id = %car.id.0, "offline event for unknown car, ignoring");
                }
            }
            DiscoveryEvent::CarRemoved { car_id } => {
                info!(car_id = %car_id.0, "car removed");
                self.store.remove(&car_id);
                self.selection.handle_removed(&car_id);
            }
            DiscoveryEvent::Status {
                is_running,
                message,
            } => {
                info!(is_running, message = %message, "discovery status changed");
                self.set_status(is_running, &message);
            }
        }
    }

    fn set_status(&self, is_running: bool, message: &str) {
        let status = {
            let mut state = self.state();
            state.is_running = is_running;
            state.status_message = message.to_string();
            DiscoveryStatus {
                is_running,
                message: message.to_string(),
            }
        };
        self.status_observers.notify(&status);
    }

    fn adopt_running(&self, running: bool) {
        let status = {
            let mut state = self.state();
            if state.is_running == running {
                return;
            }
            state.is_running = running;
            DiscoveryStatus {
                is_running: running,
                message: state.status_message.clone(),
            }
        };
        self.status_observers.notify(&status);
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the store, bridge and selection for one cockpit session. Constructed
/// explicitly by whoever drives the UI; there is no process-wide instance.
pub struct CockpitSession {
    store: Arc<DiscoveryStore>,
    selection: Arc<SelectionCoordinator>,
    bridge: Arc<EventBridge>,
    _selection_feed: ObserverHandle,
}

impl CockpitSession {
    pub fn new() -> Arc<Self> {
        Self::new_with_backend(Arc::new(MissingBackend::new()))
    }

    pub fn new_with_backend(backend: Arc<dyn DiscoveryBackend>) -> Arc<Self> {
        let store = Arc::new(DiscoveryStore::new());
        let selection = Arc::new(SelectionCoordinator::new(Arc::clone(&store)));
        let bridge = EventBridge::new(backend, Arc::clone(&store), Arc::clone(&selection));

        let selection_feed = {
            let selection = Arc::clone(&selection);
            store.subscribe_cars(move |update| selection.on_roster_update(update))
        };

        Arc::new(Self {
            store,
            selection,
            bridge,
            _selection_feed: selection_feed,
        })
    }

    pub fn store(&self) -> &Arc<DiscoveryStore> {
        &self.store
    }

    pub fn selection(&self) -> &Arc<SelectionCoordinator> {
        &self.selection
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub async fn start(&self) -> Result<(), BackendError> {
        self.bridge.start().await
    }

    pub async fn shutdown(&self) {
        self.bridge.stop().await;
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
