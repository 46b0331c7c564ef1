//! # printfleet-machines
//!
//! Machines of the fleet and everything that keeps them connected.
//!
//! - [`VendorAdapter`] / [`ConnectorFactory`]: the seam to vendor wire protocols
//! - [`DeviceConnection`]: per-machine lifecycle, operations, and state commits
//! - [`ConnectionRegistry`]: the fleet, loaded from a [`ConfigurationStore`]
//! - [`FileStore`]: content-addressed cache of files downloaded from machines
//! - [`SimulatedAdapter`]: an in-process machine for tests and demos

#![deny(unsafe_code)]

pub mod adapter;
pub mod config_store;
pub mod connection;
pub mod errors;
pub mod events;
pub mod files;
pub mod registry;
pub mod simulated;

pub use adapter::{Connector, ConnectorFactory, FileStream, VendorAdapter};
pub use config_store::{
    ConfigurationStore, JsonFileConfigurationStore, MemoryConfigurationStore, StoredConfiguration,
};
pub use connection::{ConnectionOptions, ConnectionState, DeviceConnection, StateCommitter};
pub use errors::{AdapterError, RegistryError, StoreError};
pub use events::FleetEvent;
pub use files::{FileStore, MemoryFileStore, PruneOptions, PruneResult, StorageInfo};
pub use registry::ConnectionRegistry;
pub use simulated::{SIMULATED_DISCRIMINATOR, SimulatedAdapter, SimulatedConfig, SimulatedFactory};
