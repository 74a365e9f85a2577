//! Driver over a pre-declared list of machines.
//!
//! The list is read from the `machines` configuration key at
//! [`Driver::initialize`] and registered through the [`MachineRegistry`].
//! Machines cannot be created or destroyed; start and stop only acknowledge
//! machines the driver registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::billing::UsageHistory;
use crate::config::{ConfigSource, MACHINES_KEY, read_key};
use crate::driver::{Driver, DriverError, DriverFuture};
use crate::lifecycle::{BootTimers, apply_refresh};
use crate::machine::{Image, ImageSpec, Machine, MachineId, MachineRecord, MachineSpec, Secret};
use crate::registry::MachineRegistry;

/// Name reported by [`StaticDriver`].
pub const STATIC_DRIVER_NAME: &str = "static";

#[derive(Debug, Default)]
struct StaticState {
    initialized: bool,
    machines: HashMap<MachineId, Machine>,
}

/// Driver whose machines are declared up front in configuration.
pub struct StaticDriver {
    registry: Arc<dyn MachineRegistry>,
    config: Arc<dyn ConfigSource>,
    state: Mutex<StaticState>,
    timers: BootTimers,
}

impl fmt::Debug for StaticDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticDriver").finish_non_exhaustive()
    }
}

impl StaticDriver {
    /// Creates an uninitialised driver.
    #[must_use]
    pub fn new(registry: Arc<dyn MachineRegistry>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            registry,
            config,
            state: Mutex::new(StaticState::default()),
            timers: BootTimers::new(),
        }
    }

    /// Snapshot of the machines registered by `initialize`.
    pub async fn machines(&self) -> Vec<Machine> {
        self.state.lock().await.machines.values().cloned().collect()
    }

    const fn unsupported(operation: &'static str) -> DriverError {
        DriverError::Unsupported {
            driver: STATIC_DRIVER_NAME,
            operation,
        }
    }

    async fn ensure_registered(&self, id: &MachineId) -> Result<(), DriverError> {
        let state = self.state.lock().await;
        if !state.initialized {
            return Err(DriverError::BackendUnavailable(String::from(
                "static driver used before initialize",
            )));
        }
        if !state.machines.contains_key(id) {
            return Err(DriverError::MachineNotFound { id: id.clone() });
        }
        Ok(())
    }

    async fn acknowledge(&self, machine: Machine, action: &str) -> Result<Machine, DriverError> {
        self.ensure_registered(&machine.id).await?;
        debug!(machine_id = %machine.id, action, "request acknowledged");
        Ok(machine)
    }

    /// Registers `record`, adopting a machine an earlier initialize already
    /// stored under the same id.
    async fn register(&self, record: MachineRecord) -> Result<Machine, DriverError> {
        if let Some(id) = &record.id {
            let existing = self
                .registry
                .find_machine(id)
                .await
                .map_err(|err| DriverError::BackendUnavailable(err.to_string()))?;
            if let Some(machine) = existing {
                debug!(machine_id = %machine.id, "static machine already registered");
                return Ok(machine);
            }
        }
        self.registry
            .create_machine(record)
            .await
            .map_err(|err| DriverError::BackendUnavailable(err.to_string()))
    }
}

impl Driver for StaticDriver {
    fn initialize(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let records = read_key::<Vec<MachineRecord>>(self.config.as_ref(), MACHINES_KEY)
                .await
                .map_err(|err| DriverError::BackendUnavailable(err.to_string()))?
                .unwrap_or_else(|| {
                    warn!("no static machines configured");
                    Vec::new()
                });

            let mut registered = HashMap::with_capacity(records.len());
            for mut record in records {
                if record.driver.is_empty() {
                    STATIC_DRIVER_NAME.clone_into(&mut record.driver);
                }
                let machine = self.register(record).await?;
                debug!(machine_id = %machine.id, name = %machine.name, "static machine registered");
                registered.insert(machine.id.clone(), machine);
            }

            let mut state = self.state.lock().await;
            let count = registered.len();
            state.machines = registered;
            state.initialized = true;
            info!(driver = STATIC_DRIVER_NAME, machines = count, "driver initialised");
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        STATIC_DRIVER_NAME
    }

    fn create_machine<'a>(
        &'a self,
        _spec: &'a MachineSpec,
        _image: &'a Image,
    ) -> DriverFuture<'a, Machine> {
        Box::pin(async { Err(Self::unsupported("create_machine")) })
    }

    fn start_machine(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        Box::pin(self.acknowledge(machine, "start"))
    }

    fn stop_machine(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        Box::pin(self.acknowledge(machine, "stop"))
    }

    fn destroy_machine<'a>(&'a self, _machine: &'a Machine) -> DriverFuture<'a, ()> {
        Box::pin(async { Err(Self::unsupported("destroy_machine")) })
    }

    fn create_image<'a>(&'a self, _spec: &'a ImageSpec) -> DriverFuture<'a, Image> {
        Box::pin(async { Err(Self::unsupported("create_image")) })
    }

    fn user_credit<'a>(&'a self, _user: &'a dyn UsageHistory) -> DriverFuture<'a, Decimal> {
        Box::pin(async { Err(Self::unsupported("user_credit")) })
    }

    fn refresh(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        Box::pin(async move {
            self.ensure_registered(&machine.id).await?;
            let refreshed = apply_refresh(machine, None, &self.timers).await?;
            if let Some(stored) = self.state.lock().await.machines.get_mut(&refreshed.id) {
                stored.status = refreshed.status;
            }
            Ok(refreshed)
        })
    }

    fn password<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, Option<Secret>> {
        Box::pin(async move {
            self.ensure_registered(&machine.id).await?;
            if machine.is_error() {
                return Err(DriverError::MachineInErrorState {
                    id: machine.id.clone(),
                });
            }
            if machine.password.is_some() {
                return Ok(machine.password.clone());
            }
            Ok(self
                .state
                .lock()
                .await
                .machines
                .get(&machine.id)
                .and_then(|stored| stored.password.clone()))
        })
    }

    fn instances_size(&self, size: &str) -> String {
        size.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigSource;
    use crate::machine::MachineStatus;
    use crate::registry::InMemoryRegistry;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use crate::billing::{FixedUsageHistory, UsageRecord};

    fn declared() -> StaticConfigSource {
        StaticConfigSource::new().with(
            MACHINES_KEY,
            json!([
                {"id": "rack-1", "name": "rack-1", "ip": "10.0.0.5",
                 "username": "Administrator", "password": "pw-1"},
                {"id": "rack-2", "name": "rack-2", "type": "lab", "plazaport": 9090}
            ]),
        )
    }

    async fn ready(config: StaticConfigSource) -> (StaticDriver, InMemoryRegistry) {
        let registry = InMemoryRegistry::new();
        let driver = StaticDriver::new(Arc::new(registry.clone()), Arc::new(config));
        driver.initialize().await.expect("initialize");
        (driver, registry)
    }

    async fn machine(driver: &StaticDriver, id: &str) -> Machine {
        driver
            .machines()
            .await
            .into_iter()
            .find(|machine| machine.id.as_str() == id)
            .expect("declared machine")
    }

    #[tokio::test]
    async fn initialize_registers_declared_machines() {
        let (driver, registry) = ready(declared()).await;
        assert_eq!(driver.machines().await.len(), 2);
        assert_eq!(registry.machines().await.len(), 2);

        let first = machine(&driver, "rack-1").await;
        assert_eq!(first.driver, STATIC_DRIVER_NAME);
        assert_eq!(first.status, MachineStatus::Running);
        let second = machine(&driver, "rack-2").await;
        assert_eq!(second.driver, "lab");
        assert_eq!(second.control_port, Some(9090));
    }

    #[tokio::test]
    async fn missing_machine_list_registers_nothing() {
        let (driver, _registry) = ready(StaticConfigSource::new()).await;
        assert!(driver.machines().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_machine_list_fails_initialize() {
        let registry = InMemoryRegistry::new();
        let config = StaticConfigSource::new().with(MACHINES_KEY, json!({"not": "a list"}));
        let driver = StaticDriver::new(Arc::new(registry), Arc::new(config));
        let err = driver.initialize().await.expect_err("bad shape");
        assert!(matches!(err, DriverError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn every_operation_requires_initialize() {
        let registry = InMemoryRegistry::new();
        let driver = StaticDriver::new(Arc::new(registry), Arc::new(declared()));
        let stray = MachineRecord::default().into_machine(MachineStatus::Running);

        let outcomes = [
            ("start", driver.start_machine(stray.clone()).await.map(drop)),
            ("stop", driver.stop_machine(stray.clone()).await.map(drop)),
            ("refresh", driver.refresh(stray.clone()).await.map(drop)),
            ("password", driver.password(&stray).await.map(drop)),
        ];
        for (operation, outcome) in outcomes {
            assert!(
                matches!(outcome, Err(DriverError::BackendUnavailable(_))),
                "{operation} ran before initialize: {outcome:?}"
            );
        }
    }

    #[tokio::test]
    async fn repeated_initialize_adopts_registered_machines() {
        let registry = InMemoryRegistry::new();
        registry
            .create_machine(MachineRecord {
                id: Some(MachineId::from("rack-1")),
                name: String::from("rack-1"),
                driver: String::from(STATIC_DRIVER_NAME),
                ..MachineRecord::default()
            })
            .await
            .expect("pre-register");
        let driver = StaticDriver::new(Arc::new(registry.clone()), Arc::new(declared()));

        driver.initialize().await.expect("first initialize");
        driver.initialize().await.expect("second initialize");
        assert_eq!(driver.machines().await.len(), 2);
        assert_eq!(registry.machines().await.len(), 2);
    }

    #[tokio::test]
    async fn start_and_stop_acknowledge_registered_machines() {
        let (driver, _registry) = ready(declared()).await;
        let rack = machine(&driver, "rack-1").await;
        let started = driver.start_machine(rack.clone()).await.expect("start");
        assert_eq!(started, rack);
        driver.stop_machine(rack).await.expect("stop");

        let stray = MachineRecord::default().into_machine(MachineStatus::Running);
        let err = driver.stop_machine(stray.clone()).await.expect_err("unknown");
        assert_eq!(err, DriverError::MachineNotFound { id: stray.id });
    }

    #[rstest]
    #[case("create_machine")]
    #[case("destroy_machine")]
    #[case("create_image")]
    #[case("user_credit")]
    #[tokio::test]
    async fn unsupported_operations_fail(#[case] operation: &str) {
        let (driver, _registry) = ready(declared()).await;
        let rack = machine(&driver, "rack-1").await;
        let history = FixedUsageHistory::new(vec![UsageRecord::new("t2.small", dec!(1))]);
        let err = match operation {
            "create_machine" => driver
                .create_machine(&MachineSpec::new("new"), &Image::new("base"))
                .await
                .map(|_| ()),
            "destroy_machine" => driver.destroy_machine(&rack).await,
            "create_image" => driver
                .create_image(&ImageSpec::new("img", rack.id.clone()))
                .await
                .map(|_| ()),
            _ => driver.user_credit(&history).await.map(|_| ()),
        }
        .expect_err("unsupported");
        assert!(matches!(
            err,
            DriverError::Unsupported { driver: STATIC_DRIVER_NAME, operation: op } if op == operation
        ));
    }

    #[tokio::test]
    async fn refresh_settles_without_delay() {
        let (driver, _registry) = ready(declared()).await;
        let mut rack = machine(&driver, "rack-1").await;
        rack.status = MachineStatus::Stopping;
        let refreshed = driver.refresh(rack).await.expect("refresh");
        assert_eq!(refreshed.status, MachineStatus::Stopped);
        assert_eq!(
            machine(&driver, "rack-1").await.status,
            MachineStatus::Stopped
        );
    }

    #[tokio::test]
    async fn refresh_of_unregistered_machine_fails() {
        let (driver, _registry) = ready(declared()).await;
        let stray = MachineRecord::default().into_machine(MachineStatus::Stopping);
        let err = driver.refresh(stray.clone()).await.expect_err("unknown");
        assert_eq!(err, DriverError::MachineNotFound { id: stray.id });
    }

    #[tokio::test]
    async fn password_uses_declared_secret() {
        let (driver, _registry) = ready(declared()).await;
        let mut rack = machine(&driver, "rack-1").await;
        rack.password = None;
        let secret = driver.password(&rack).await.expect("password");
        assert_eq!(secret, Some(Secret::new("pw-1")));

        rack.status = MachineStatus::Error;
        let err = driver.password(&rack).await.expect_err("error state");
        assert_eq!(err, DriverError::MachineInErrorState { id: rack.id });
    }
}
