//! Orchestration-layer seam for machine and image records.
//!
//! Drivers never talk to persistence directly. They receive a
//! [`MachineRegistry`] and use it to register machines, look them up by id,
//! and apply administrative image updates.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::machine::{Image, ImageId, Machine, MachineId, MachineRecord, MachineStatus};

/// Errors raised by registry implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when a record with the same id is already registered.
    #[error("machine {id} already registered")]
    Duplicate {
        /// Conflicting identifier.
        id: MachineId,
    },
    /// Wrapper for storage level failures.
    #[error("registry storage error: {message}")]
    Storage {
        /// Message returned by the storage layer.
        message: String,
    },
}

/// Future returned by registry operations.
pub type RegistryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RegistryError>> + Send + 'a>>;

/// Machine and image persistence as seen by drivers.
pub trait MachineRegistry: Send + Sync {
    /// Materialises and stores a machine from a record.
    fn create_machine(&self, record: MachineRecord) -> RegistryFuture<'_, Machine>;

    /// Looks a machine up by id.
    fn find_machine<'a>(&'a self, id: &'a MachineId) -> RegistryFuture<'a, Option<Machine>>;

    /// Sets the default flavor of every image named `name`, returning how
    /// many images changed.
    fn set_image_flavor<'a>(
        &'a self,
        name: &'a str,
        flavor: &'a str,
    ) -> RegistryFuture<'a, usize>;
}

#[derive(Debug, Default)]
struct Records {
    machines: HashMap<MachineId, Machine>,
    images: HashMap<ImageId, Image>,
}

/// Process-local registry used by the binary and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistry {
    records: Arc<Mutex<Records>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an image record.
    pub async fn insert_image(&self, image: Image) {
        self.records
            .lock()
            .await
            .images
            .insert(image.id.clone(), image);
    }

    /// Returns a snapshot of all images.
    pub async fn images(&self) -> Vec<Image> {
        self.records.lock().await.images.values().cloned().collect()
    }

    /// Returns a snapshot of all machines.
    pub async fn machines(&self) -> Vec<Machine> {
        self.records
            .lock()
            .await
            .machines
            .values()
            .cloned()
            .collect()
    }
}

impl MachineRegistry for InMemoryRegistry {
    fn create_machine(&self, record: MachineRecord) -> RegistryFuture<'_, Machine> {
        Box::pin(async move {
            let machine = record.into_machine(MachineStatus::Running);
            let mut records = self.records.lock().await;
            if records.machines.contains_key(&machine.id) {
                return Err(RegistryError::Duplicate { id: machine.id });
            }
            records.machines.insert(machine.id.clone(), machine.clone());
            Ok(machine)
        })
    }

    fn find_machine<'a>(&'a self, id: &'a MachineId) -> RegistryFuture<'a, Option<Machine>> {
        Box::pin(async move { Ok(self.records.lock().await.machines.get(id).cloned()) })
    }

    fn set_image_flavor<'a>(
        &'a self,
        name: &'a str,
        flavor: &'a str,
    ) -> RegistryFuture<'a, usize> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let mut updated = 0;
            for image in records.images.values_mut().filter(|image| image.name == name) {
                flavor.clone_into(&mut image.instances_size);
                updated += 1;
            }
            Ok(updated)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> MachineRecord {
        MachineRecord {
            id: Some(MachineId::from(id)),
            name: id.to_owned(),
            ..MachineRecord::default()
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let registry = InMemoryRegistry::new();
        let created = registry
            .create_machine(record("m-1"))
            .await
            .expect("create");
        let found = registry
            .find_machine(&created.id)
            .await
            .expect("lookup")
            .expect("machine present");
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let registry = InMemoryRegistry::new();
        registry.create_machine(record("m-1")).await.expect("first");
        let err = registry
            .create_machine(record("m-1"))
            .await
            .expect_err("duplicate");
        assert_eq!(
            err,
            RegistryError::Duplicate {
                id: MachineId::from("m-1")
            }
        );
    }

    #[tokio::test]
    async fn set_image_flavor_touches_matching_names_only() {
        let registry = InMemoryRegistry::new();
        let mut default = Image::new("Default");
        default.instances_size = String::from("small");
        registry.insert_image(default).await;
        registry.insert_image(Image::new("Other")).await;

        let updated = registry
            .set_image_flavor("Default", "large")
            .await
            .expect("update");
        assert_eq!(updated, 1);

        let images = registry.images().await;
        let sizes: Vec<_> = images
            .iter()
            .map(|image| (image.name.as_str(), image.instances_size.as_str()))
            .collect();
        assert!(sizes.contains(&("Default", "large")));
        assert!(sizes.contains(&("Other", "medium")));
    }
}
