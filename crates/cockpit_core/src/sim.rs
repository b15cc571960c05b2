use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{CarId, CarRecord, ConnectionStatus},
    error::BackendError,
    protocol::{DiscoveryEvent, DiscoveryEventKind},
};
use tokio::sync::broadcast;
use tracing::info;

use crate::{DiscoveryBackend, EventLanes, STATUS_RUNNING, STATUS_STOPPED};

/// In-process discovery backend for demos and integration tests. Holds its
/// own car map and publishes the same event stream a live backend would.
pub struct SimulatedBackend {
    inner: Mutex<SimState>,
    events: EventLanes,
}

struct SimState {
    cars: HashMap<CarId, CarRecord>,
    is_running: bool,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimState {
                cars: HashMap::new(),
                is_running: false,
            }),
            events: EventLanes::default(),
        }
    }

    pub fn fixture_roster() -> Vec<CarRecord> {
        vec![
            fixture_car(1, "Max Verstappen", "Oracle Red Bull Racing", "192.168.0.100", "1.0.0"),
            fixture_car(16, "Charles Leclerc", "Scuderia Ferrari HP", "192.168.0.101", "1.0.2"),
            fixture_car(55, "Carlos Sainz", "Atlassian Williams Racing", "192.168.0.102", "1.0.3"),
        ]
    }

    pub fn announce_car(&self, mut car: CarRecord) {
        car.last_seen = Some(Utc::now());
        info!(car_id = %car.id.0, number = car.number, "announcing car");
        self.state().cars.insert(car.id.clone(), car.clone());
        self.events.publish(DiscoveryEvent::CarDiscovered { car });
    }

    pub fn update_car(&self, mut car: CarRecord) {
        car.last_seen = Some(Utc::now());
        self.state().cars.insert(car.id.clone(), car.clone());
        self.events.publish(DiscoveryEvent::CarUpdated { car });
    }

    pub fn set_connection_status(&self, car_id: &CarId, status: ConnectionStatus) {
        let car = {
            let mut state = self.state();
            let Some(car) = state.cars.get_mut(car_id) else {
                return;
            };
            car.connection_status = status;
            car.last_seen = Some(Utc::now());
            car.clone()
        };
        self.events.publish(DiscoveryEvent::CarUpdated { car });
    }

    pub fn mark_offline(&self, car_id: &CarId) {
        let car = {
            let mut state = self.state();
            let Some(car) = state.cars.get_mut(car_id) else {
                return;
            };
            car.connection_status = ConnectionStatus::Disconnected;
            car.last_seen = Some(Utc::now());
            car.clone()
        };
        self.events.publish(DiscoveryEvent::CarOffline { car });
    }

    pub fn remove_car(&self, car_id: &CarId) {
        if self.state().cars.remove(car_id).is_some() {
            self.events.publish(DiscoveryEvent::CarRemoved {
                car_id: car_id.clone(),
            });
        }
    }

    pub fn publish_status(&self, is_running: bool, message: &str) {
        self.state().is_running = is_running;
        self.events.publish(DiscoveryEvent::Status {
            is_running,
            message: message.to_string(),
        });
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn fixture_car(number: u32, driver: &str, team: &str, ip: &str, version: &str) -> CarRecord {
    CarRecord {
        id: CarId(format!("car-{number}")),
        number,
        driver: driver.to_string(),
        team: team.to_string(),
        ip: ip.to_string(),
        port: 8080,
        version: version.to_string(),
        connection_status: ConnectionStatus::Disconnected,
        last_seen: None,
    }
}

#[async_trait]
impl DiscoveryBackend for SimulatedBackend {
    async fn start_discovery(&self) -> Result<(), BackendError> {
        {
            let mut state = self.state();
            if state.is_running {
                return Err(BackendError::already_running());
            }
            state.is_running = true;
        }
        self.events.publish(DiscoveryEvent::Status {
            is_running: true,
            message: STATUS_RUNNING.to_string(),
        });
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), BackendError> {
        {
            let mut state = self.state();
            if !state.is_running {
                return Err(BackendError::not_running());
            }
            state.is_running = false;
        }
        self.events.publish(DiscoveryEvent::Status {
            is_running: false,
            message: STATUS_STOPPED.to_string(),
        });
        Ok(())
    }

    async fn discovered_cars(&self) -> Result<Vec<CarRecord>, BackendError> {
        Ok(self.state().cars.values().cloned().collect())
    }

    async fn car_by_id(&self, car_id: &CarId) -> Result<Option<CarRecord>, BackendError> {
        Ok(self.state().cars.get(car_id).cloned())
    }

    async fn is_discovery_running(&self) -> Result<bool, BackendError> {
        Ok(self.state().is_running)
    }

    fn subscribe(&self, kind: DiscoveryEventKind) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe(kind)
    }
}

#[cfg(test)]
#[path = "tests/sim_tests.rs"]
mod tests;
