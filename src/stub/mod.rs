//! Deterministic in-memory driver for tests and local development.
//!
//! Machines live in a map owned by the driver instance. Each instance can
//! run its own session endpoint (see [`sessions`]), so tests never share
//! state or ports.

pub mod sessions;

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::billing::{PriceCatalog, UsageHistory, user_cost};
use crate::config::{ConfigSource, boot_delay};
use crate::driver::{Driver, DriverError, DriverFuture};
use crate::lifecycle::{BootTimers, apply_refresh};
use crate::machine::{
    DEFAULT_INSTANCES_SIZE, DEFAULT_RDP_PORT, Image, ImageId, ImageSpec, Machine, MachineId,
    MachineSpec, MachineStatus, Secret,
};
use crate::registry::MachineRegistry;
use sessions::SessionEndpoint;

/// Name reported by [`StubDriver`].
pub const STUB_DRIVER_NAME: &str = "stub";

/// Login name given to stub machines.
pub const STUB_USERNAME: &str = "Administrator";

/// Image whose default flavor is reset during initialisation.
pub const DEFAULT_IMAGE_NAME: &str = "Default";

#[derive(Debug, Default)]
struct StubState {
    initialized: bool,
    machines: HashMap<MachineId, Machine>,
    endpoint: Option<SessionEndpoint>,
}

/// In-memory driver with a fixed one-product price catalog.
pub struct StubDriver {
    registry: Arc<dyn MachineRegistry>,
    config: Arc<dyn ConfigSource>,
    catalog: PriceCatalog,
    session_endpoint: bool,
    state: Mutex<StubState>,
    timers: BootTimers,
}

impl fmt::Debug for StubDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubDriver")
            .field("catalog", &self.catalog)
            .field("session_endpoint", &self.session_endpoint)
            .finish_non_exhaustive()
    }
}

impl StubDriver {
    /// Creates an uninitialised driver. The session endpoint is enabled.
    #[must_use]
    pub fn new(registry: Arc<dyn MachineRegistry>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            registry,
            config,
            catalog: PriceCatalog::stub_default(),
            session_endpoint: true,
            state: Mutex::new(StubState::default()),
            timers: BootTimers::new(),
        }
    }

    /// Enables or disables the session endpoint started by `initialize`.
    #[must_use]
    pub const fn with_session_endpoint(mut self, enabled: bool) -> Self {
        self.session_endpoint = enabled;
        self
    }

    /// Replaces the built-in price catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: PriceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Address of the running session endpoint, if any.
    pub async fn session_endpoint_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .await
            .endpoint
            .as_ref()
            .map(SessionEndpoint::local_addr)
    }

    /// Number of machines the backend currently tracks.
    pub async fn machine_count(&self) -> usize {
        self.state.lock().await.machines.len()
    }

    /// Stops the session endpoint, if one is running.
    pub async fn shutdown(&self) {
        let endpoint = self.state.lock().await.endpoint.take();
        if let Some(running) = endpoint {
            running.shutdown().await;
        }
    }

    async fn ensure_initialized(&self) -> Result<(), DriverError> {
        if self.state.lock().await.initialized {
            Ok(())
        } else {
            Err(DriverError::BackendUnavailable(String::from(
                "stub driver used before initialize",
            )))
        }
    }

    async fn tracked(&self, id: &MachineId) -> Result<(), DriverError> {
        if self.state.lock().await.machines.contains_key(id) {
            Ok(())
        } else {
            Err(DriverError::MachineNotFound { id: id.clone() })
        }
    }

    async fn source_password(&self, id: &MachineId) -> Result<Option<Secret>, DriverError> {
        if let Some(machine) = self.state.lock().await.machines.get(id) {
            return Ok(machine.password.clone());
        }
        self.registry
            .find_machine(id)
            .await?
            .map(|machine| machine.password)
            .ok_or_else(|| DriverError::MachineNotFound { id: id.clone() })
    }
}

impl Driver for StubDriver {
    fn initialize(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.registry
                .set_image_flavor(DEFAULT_IMAGE_NAME, DEFAULT_INSTANCES_SIZE)
                .await
                .map_err(|err| DriverError::BackendUnavailable(err.to_string()))?;

            let endpoint = if self.session_endpoint {
                Some(SessionEndpoint::start().await?)
            } else {
                None
            };

            let mut state = self.state.lock().await;
            state.endpoint = endpoint;
            state.initialized = true;
            info!(driver = STUB_DRIVER_NAME, "driver initialised");
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        STUB_DRIVER_NAME
    }

    fn create_machine<'a>(
        &'a self,
        spec: &'a MachineSpec,
        image: &'a Image,
    ) -> DriverFuture<'a, Machine> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            if spec.name.trim().is_empty() {
                return Err(DriverError::ProvisioningFailed(String::from(
                    "machine name must not be empty",
                )));
            }

            let mut state = self.state.lock().await;
            let control = state.endpoint.as_ref().map(SessionEndpoint::local_addr);
            let flavor = spec.flavor.as_deref().map_or_else(
                || image.instances_size.clone(),
                |requested| self.instances_size(requested),
            );
            let machine = Machine {
                id: MachineId::generate(),
                name: spec.name.clone(),
                driver: STUB_DRIVER_NAME.to_owned(),
                flavor,
                ip: Some(control.map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |addr| addr.ip())),
                username: STUB_USERNAME.to_owned(),
                password: image.password.clone(),
                control_port: control.map(|addr| addr.port()),
                domain: String::new(),
                rdp_port: DEFAULT_RDP_PORT,
                image: Some(image.id.clone()),
                status: MachineStatus::Booting,
                created_at: Utc::now(),
                destroyed_at: None,
            };
            state.machines.insert(machine.id.clone(), machine.clone());
            info!(machine_id = %machine.id, name = %machine.name, "machine created");
            Ok(machine)
        })
    }

    fn start_machine(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            self.tracked(&machine.id).await?;
            debug!(machine_id = %machine.id, "start requested");
            Ok(machine)
        })
    }

    fn stop_machine(&self, mut machine: Machine) -> DriverFuture<'_, Machine> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            let mut state = self.state.lock().await;
            let Some(stored) = state.machines.get_mut(&machine.id) else {
                return Err(DriverError::MachineNotFound { id: machine.id });
            };
            if machine.status != MachineStatus::Error {
                machine.status = MachineStatus::Stopping;
                stored.status = MachineStatus::Stopping;
            }
            debug!(machine_id = %machine.id, "stop requested");
            Ok(machine)
        })
    }

    fn destroy_machine<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            let removed = self.state.lock().await.machines.remove(&machine.id);
            if removed.is_none() {
                return Err(DriverError::MachineNotFound {
                    id: machine.id.clone(),
                });
            }
            self.timers.cancel(&machine.id).await;
            info!(machine_id = %machine.id, "machine destroyed");
            Ok(())
        })
    }

    fn create_image<'a>(&'a self, spec: &'a ImageSpec) -> DriverFuture<'a, Image> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            let password = self.source_password(&spec.build_from).await?;
            let image = Image {
                id: ImageId::generate(),
                name: spec.name.clone(),
                build_from: Some(spec.build_from.clone()),
                instances_size: DEFAULT_INSTANCES_SIZE.to_owned(),
                password,
            };
            info!(image_id = %image.id, source = %spec.build_from, "image created");
            Ok(image)
        })
    }

    fn user_credit<'a>(&'a self, user: &'a dyn UsageHistory) -> DriverFuture<'a, Decimal> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            user_cost(user, self.name(), &self.catalog)
                .await
                .map_err(DriverError::from)
        })
    }

    fn refresh(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            let delay = boot_delay(self.config.as_ref()).await?;
            let refreshed = apply_refresh(machine, delay, &self.timers).await?;
            let mut state = self.state.lock().await;
            match state.machines.get_mut(&refreshed.id) {
                Some(stored) => stored.status = refreshed.status,
                None if refreshed.driver == STUB_DRIVER_NAME => {
                    return Err(DriverError::MachineNotFound { id: refreshed.id });
                }
                None => {}
            }
            Ok(refreshed)
        })
    }

    fn password<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, Option<Secret>> {
        Box::pin(async move {
            self.ensure_initialized().await?;
            if machine.is_error() {
                return Err(DriverError::MachineInErrorState {
                    id: machine.id.clone(),
                });
            }
            Ok(machine.password.clone())
        })
    }

    fn instances_size(&self, size: &str) -> String {
        size.to_owned()
    }
}
