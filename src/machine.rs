//! Machine and image records handed to drivers by the orchestration layer.
//!
//! Drivers receive these values, may update status and credential fields,
//! and hand them back. Identity fields are assigned once and never change.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote desktop port assigned when a record does not carry one.
pub const DEFAULT_RDP_PORT: u16 = 3389;

/// Flavor given to freshly built images.
pub const DEFAULT_INSTANCES_SIZE: &str = "medium";

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Opaque, globally unique machine identifier.
    MachineId
);
identifier!(
    /// Opaque, globally unique image identifier.
    ImageId
);

/// Credential string whose `Debug` output is redacted.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the credential in clear text.
    #[must_use]
    pub const fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Lifecycle status of a machine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    /// Requested but not yet confirmed running.
    Booting,
    /// Up and reachable.
    Running,
    /// Stop requested, awaiting confirmation.
    Stopping,
    /// Powered off.
    Stopped,
    /// Failed; requires operator intervention.
    Error,
    /// Destroyed. Set by the orchestration layer, never by a driver refresh.
    Terminated,
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Booting => "booting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// A provisioned compute instance tracked by the platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Machine {
    /// Unique identifier; immutable.
    pub id: MachineId,
    /// Display name.
    pub name: String,
    /// Name of the driver that owns this machine.
    pub driver: String,
    /// Flavor (size class) the machine was provisioned with.
    pub flavor: String,
    /// Network address, when known.
    pub ip: Option<IpAddr>,
    /// Login username.
    pub username: String,
    /// Login secret, never serialised.
    #[serde(skip_serializing)]
    pub password: Option<Secret>,
    /// Backend control-plane port, when the backend exposes one.
    pub control_port: Option<u16>,
    /// Login domain.
    pub domain: String,
    /// Remote desktop port.
    pub rdp_port: u16,
    /// Image the machine was provisioned from.
    pub image: Option<ImageId>,
    /// Current lifecycle status.
    pub status: MachineStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Destruction timestamp, set by the orchestration layer.
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl Machine {
    /// Returns `true` when the machine is in the terminal error state.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == MachineStatus::Error
    }
}

/// Declarative machine description used by the registry and the static
/// driver's configured machine list.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MachineRecord {
    /// Identifier to keep; a fresh one is generated when absent.
    pub id: Option<MachineId>,
    /// Display name.
    pub name: String,
    /// Driver tag.
    #[serde(alias = "type")]
    pub driver: String,
    /// Flavor label.
    pub flavor: String,
    /// Network address.
    pub ip: Option<IpAddr>,
    /// Login username.
    pub username: String,
    /// Login secret.
    pub password: Option<Secret>,
    /// Backend control-plane port.
    #[serde(alias = "plazaport")]
    pub control_port: Option<u16>,
    /// Login domain.
    pub domain: String,
    /// Remote desktop port.
    pub rdp_port: Option<u16>,
    /// Source image.
    pub image: Option<ImageId>,
    /// Initial status.
    pub status: Option<MachineStatus>,
}

impl MachineRecord {
    /// Materialises the record into a machine, generating an id when needed.
    #[must_use]
    pub fn into_machine(self, default_status: MachineStatus) -> Machine {
        Machine {
            id: self.id.unwrap_or_else(MachineId::generate),
            name: self.name,
            driver: self.driver,
            flavor: self.flavor,
            ip: self.ip,
            username: self.username,
            password: self.password,
            control_port: self.control_port,
            domain: self.domain,
            rdp_port: self.rdp_port.unwrap_or(DEFAULT_RDP_PORT),
            image: self.image,
            status: self.status.unwrap_or(default_status),
            created_at: Utc::now(),
            destroyed_at: None,
        }
    }
}

/// Parameters for a machine creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineSpec {
    /// Display name for the new machine.
    pub name: String,
    /// Optional flavor override; the image default applies otherwise.
    pub flavor: Option<String>,
}

impl MachineSpec {
    /// Creates a spec with the given name, trimming whitespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            flavor: None,
        }
    }

    /// Sets the flavor override.
    #[must_use]
    pub fn flavor(mut self, value: impl Into<String>) -> Self {
        self.flavor = Some(value.into().trim().to_owned());
        self
    }
}

/// A reusable provisioning template derived from a machine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Image {
    /// Unique identifier.
    pub id: ImageId,
    /// Display name.
    pub name: String,
    /// Machine this image was built from.
    pub build_from: Option<MachineId>,
    /// Default flavor for machines provisioned from this image.
    pub instances_size: String,
    /// Secret inherited from the source machine.
    #[serde(skip_serializing)]
    pub password: Option<Secret>,
}

impl Image {
    /// Builds a fresh image record with the default flavor.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ImageId::generate(),
            name: name.into(),
            build_from: None,
            instances_size: DEFAULT_INSTANCES_SIZE.to_owned(),
            password: None,
        }
    }
}

/// Parameters for an image creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSpec {
    /// Display name for the new image.
    pub name: String,
    /// Machine to build the image from.
    pub build_from: MachineId,
}

impl ImageSpec {
    /// Creates an image request.
    #[must_use]
    pub fn new(name: impl Into<String>, build_from: impl Into<MachineId>) -> Self {
        Self {
            name: name.into(),
            build_from: build_from.into(),
        }
    }
}
