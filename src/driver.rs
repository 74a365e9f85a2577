//! Driver abstraction for provisioning and monitoring compute machines.
//!
//! A process selects one [`Driver`] at startup, calls
//! [`Driver::initialize`] once, and then invokes lifecycle operations per
//! machine. [`AnyDriver`] is the closed set of variants this crate ships,
//! held as a single handle for the process lifetime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::billing::{CatalogError, HistoryError, UsageHistory};
use crate::config::{ConfigError, ConfigSource, DriverConfig, DriverKind};
use crate::machine::{Image, ImageSpec, Machine, MachineId, MachineSpec, Secret};
use crate::registry::{MachineRegistry, RegistryError};
use crate::static_list::StaticDriver;
use crate::stub::StubDriver;

/// Errors raised by drivers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when backend setup fails or the driver is used before setup.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// Raised when the backend rejects a creation request.
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),
    /// Raised when the backend does not recognise a machine.
    #[error("machine {id} not found")]
    MachineNotFound {
        /// Identifier the backend did not recognise.
        id: MachineId,
    },
    /// Raised when a machine is in the terminal error state.
    #[error("machine {id} is in error state")]
    MachineInErrorState {
        /// Identifier of the failed machine.
        id: MachineId,
    },
    /// Raised when the backend variant does not implement an operation.
    #[error("{driver} driver does not support {operation}")]
    Unsupported {
        /// Driver name.
        driver: &'static str,
        /// Operation name.
        operation: &'static str,
    },
    /// Wrapper for configuration service failures.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Wrapper for registry failures.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Wrapper for usage history failures.
    #[error(transparent)]
    History(#[from] HistoryError),
    /// Wrapper for price catalog failures.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Capability contract every backend implements.
///
/// Start and stop are requests; the resulting state is observed through
/// [`Driver::refresh`], the only operation that moves a machine through the
/// lifecycle. Operations a backend cannot perform fail with
/// [`DriverError::Unsupported`].
pub trait Driver: Send + Sync {
    /// Performs one-time backend setup. Must run before any other operation.
    fn initialize(&self) -> DriverFuture<'_, ()>;

    /// Stable backend identifier used for routing and logging.
    fn name(&self) -> &'static str;

    /// Requests a new machine from `image`. Returns without waiting for the
    /// machine to become ready.
    fn create_machine<'a>(
        &'a self,
        spec: &'a MachineSpec,
        image: &'a Image,
    ) -> DriverFuture<'a, Machine>;

    /// Requests that the machine be powered on.
    fn start_machine(&self, machine: Machine) -> DriverFuture<'_, Machine>;

    /// Requests that the machine be powered off.
    fn stop_machine(&self, machine: Machine) -> DriverFuture<'_, Machine>;

    /// Removes the machine from the backend. A destroyed machine never
    /// reappears.
    fn destroy_machine<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, ()>;

    /// Builds an image from the machine named in `spec`.
    fn create_image<'a>(&'a self, spec: &'a ImageSpec) -> DriverFuture<'a, Image>;

    /// Bills the user's usage on this backend.
    fn user_credit<'a>(&'a self, user: &'a dyn UsageHistory) -> DriverFuture<'a, Decimal>;

    /// Observes the machine and applies one lifecycle transition.
    fn refresh(&self, machine: Machine) -> DriverFuture<'_, Machine>;

    /// Returns the machine's current secret.
    fn password<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, Option<Secret>>;

    /// Normalises a requested flavor label.
    fn instances_size(&self, size: &str) -> String;
}

/// Every driver variant shipped by this crate.
#[derive(Debug)]
pub enum AnyDriver {
    /// Deterministic in-memory driver.
    Stub(StubDriver),
    /// Driver over a pre-declared machine list.
    Static(StaticDriver),
}

impl AnyDriver {
    /// Builds the driver variant named by `kind`.
    #[must_use]
    pub fn from_kind(
        kind: DriverKind,
        registry: Arc<dyn MachineRegistry>,
        config: Arc<dyn ConfigSource>,
        session_endpoint: bool,
    ) -> Self {
        match kind {
            DriverKind::Stub => {
                Self::Stub(StubDriver::new(registry, config).with_session_endpoint(session_endpoint))
            }
            DriverKind::Static => Self::Static(StaticDriver::new(registry, config)),
        }
    }

    /// Builds the driver described by process settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the settings fail validation.
    pub fn from_config(
        settings: &DriverConfig,
        registry: Arc<dyn MachineRegistry>,
        config: Arc<dyn ConfigSource>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self::from_kind(
            settings.kind()?,
            registry,
            config,
            settings.session_endpoint,
        ))
    }

    fn inner(&self) -> &dyn Driver {
        match self {
            Self::Stub(driver) => driver,
            Self::Static(driver) => driver,
        }
    }
}

impl Driver for AnyDriver {
    fn initialize(&self) -> DriverFuture<'_, ()> {
        self.inner().initialize()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn create_machine<'a>(
        &'a self,
        spec: &'a MachineSpec,
        image: &'a Image,
    ) -> DriverFuture<'a, Machine> {
        self.inner().create_machine(spec, image)
    }

    fn start_machine(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        self.inner().start_machine(machine)
    }

    fn stop_machine(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        self.inner().stop_machine(machine)
    }

    fn destroy_machine<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, ()> {
        self.inner().destroy_machine(machine)
    }

    fn create_image<'a>(&'a self, spec: &'a ImageSpec) -> DriverFuture<'a, Image> {
        self.inner().create_image(spec)
    }

    fn user_credit<'a>(&'a self, user: &'a dyn UsageHistory) -> DriverFuture<'a, Decimal> {
        self.inner().user_credit(user)
    }

    fn refresh(&self, machine: Machine) -> DriverFuture<'_, Machine> {
        self.inner().refresh(machine)
    }

    fn password<'a>(&'a self, machine: &'a Machine) -> DriverFuture<'a, Option<Secret>> {
        self.inner().password(machine)
    }

    fn instances_size(&self, size: &str) -> String {
        self.inner().instances_size(size)
    }
}
