//! Core library for Machina, a pluggable machine-provisioning layer.
//!
//! The crate exposes a [`Driver`] abstraction that provisions, starts,
//! stops, destroys and images remote machines, a lifecycle state machine
//! applied on [`Driver::refresh`], and a usage billing calculator. Two
//! drivers ship with it: a deterministic in-memory [`StubDriver`] with a
//! local session endpoint, and a [`StaticDriver`] over a configured machine
//! list.

pub mod billing;
pub mod config;
pub mod driver;
mod files;
pub mod lifecycle;
pub mod machine;
pub mod registry;
pub mod static_list;
pub mod stub;

pub use billing::{
    CatalogError, FixedUsageHistory, HistoryError, HistoryFuture, JsonUsageHistory, PriceCatalog,
    PriceCatalogEntry, UsageHistory, UsageRecord, total_cost, user_cost,
};
pub use config::{ConfigError, ConfigSource, DriverConfig, DriverKind, StaticConfigSource};
pub use driver::{AnyDriver, Driver, DriverError, DriverFuture};
pub use lifecycle::{BootTimers, RefreshPlan, plan_refresh};
pub use machine::{
    Image, ImageId, ImageSpec, Machine, MachineId, MachineRecord, MachineSpec, MachineStatus,
    Secret,
};
pub use registry::{InMemoryRegistry, MachineRegistry, RegistryError};
pub use static_list::StaticDriver;
pub use stub::StubDriver;
