//! Pool-driver registry and front-end.
//!
//! Compressed-page consumers do not talk to a concrete allocator; they ask
//! the registry for a pool by driver name and go through the uniform
//! [`Zpool`] surface. This module provides the registry, the front-end, and
//! the `"zblock"` driver backed by [`ZblockPool`].
//!
//! Drivers are registered explicitly via [`init`] and removed via
//! [`shutdown`]; nothing registers implicitly.

use crate::handle::Handle;
use crate::page::AllocFlags;
use crate::pool::{AllocError, EvictOps, ReclaimError, ZblockPool};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_sync::SpinLock;
use log::info;

/// How a mapping will be used. The zblock backend keeps no per-mapping
/// state beyond the slot's mapped bit, so the mode is advisory.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MapMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Pool creation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateError {
    /// No driver is registered under the requested type name.
    #[error("unknown pool driver {0:?}")]
    UnknownDriver(String),
}

/// Operations every pool backend provides to the front-end.
pub trait ZpoolBackend: Send + Sync {
    fn malloc(&self, size: usize, flags: AllocFlags) -> Result<Handle, AllocError>;
    fn free(&self, handle: Handle);
    fn shrink(&self, pages: usize) -> Result<usize, ReclaimError>;
    fn map(&self, handle: Handle, mode: MapMode) -> *mut u8;
    fn unmap(&self, handle: Handle);
    fn total_size(&self) -> u64;
}

/// A pool implementation that can be instantiated by type name.
pub trait ZpoolDriver: Send + Sync {
    /// The name pools of this kind are requested under.
    fn type_name(&self) -> &'static str;
    /// Builds a new pool. `name` identifies the pool to the embedder only.
    fn create(&self, name: &str, evict_ops: Option<Box<dyn EvictOps>>) -> Box<dyn ZpoolBackend>;
}

static DRIVERS: SpinLock<Vec<&'static dyn ZpoolDriver>> = SpinLock::new(Vec::new());

/// Makes `driver` available to [`create`]. Registering the same driver
/// again is a no-op.
pub fn register_driver(driver: &'static dyn ZpoolDriver) {
    let mut drivers = DRIVERS.lock();
    if !drivers
        .iter()
        .any(|d| core::ptr::eq::<dyn ZpoolDriver>(*d, driver))
    {
        drivers.push(driver);
    }
}

/// Removes `driver` from the registry. Existing pools stay functional.
pub fn unregister_driver(driver: &'static dyn ZpoolDriver) {
    DRIVERS
        .lock()
        .retain(|d| !core::ptr::eq::<dyn ZpoolDriver>(*d, driver));
}

/// Creates a pool through the driver registered under `type_name`.
pub fn create(
    type_name: &str,
    name: &str,
    evict_ops: Option<Box<dyn EvictOps>>,
) -> Result<Zpool, CreateError> {
    let driver = {
        let drivers = DRIVERS.lock();
        drivers
            .iter()
            .copied()
            .find(|d| d.type_name() == type_name)
    };
    driver.map_or_else(
        || Err(CreateError::UnknownDriver(String::from(type_name))),
        |driver| {
            Ok(Zpool {
                backend: driver.create(name, evict_ops),
            })
        },
    )
}

/// A pool handle obtained from the registry. Dropping it destroys the pool.
pub struct Zpool {
    backend: Box<dyn ZpoolBackend>,
}

impl core::fmt::Debug for Zpool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Zpool")
            .field("total_size", &self.backend.total_size())
            .finish()
    }
}

impl Zpool {
    pub fn malloc(&self, size: usize, flags: AllocFlags) -> Result<Handle, AllocError> {
        self.backend.malloc(size, flags)
    }

    pub fn free(&self, handle: Handle) {
        self.backend.free(handle);
    }

    pub fn shrink(&self, pages: usize) -> Result<usize, ReclaimError> {
        self.backend.shrink(pages)
    }

    pub fn map(&self, handle: Handle, mode: MapMode) -> *mut u8 {
        self.backend.map(handle, mode)
    }

    pub fn unmap(&self, handle: Handle) {
        self.backend.unmap(handle);
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.backend.total_size()
    }
}

impl ZpoolBackend for ZblockPool {
    fn malloc(&self, size: usize, flags: AllocFlags) -> Result<Handle, AllocError> {
        self.alloc(size, flags)
    }

    fn free(&self, handle: Handle) {
        Self::free(self, handle);
    }

    fn shrink(&self, pages: usize) -> Result<usize, ReclaimError> {
        Self::shrink(self, pages)
    }

    fn map(&self, handle: Handle, _mode: MapMode) -> *mut u8 {
        Self::map(self, handle)
    }

    fn unmap(&self, handle: Handle) {
        Self::unmap(self, handle);
    }

    fn total_size(&self) -> u64 {
        Self::total_size(self)
    }
}

struct ZblockDriver;

impl ZpoolDriver for ZblockDriver {
    fn type_name(&self) -> &'static str {
        "zblock"
    }

    fn create(&self, _name: &str, evict_ops: Option<Box<dyn EvictOps>>) -> Box<dyn ZpoolBackend> {
        Box::new(ZblockPool::new(evict_ops))
    }
}

static ZBLOCK_DRIVER: ZblockDriver = ZblockDriver;

/// Registers the `"zblock"` driver.
pub fn init() {
    register_driver(&ZBLOCK_DRIVER);
    info!("zblock: loaded");
}

/// Unregisters the `"zblock"` driver.
pub fn shutdown() {
    unregister_driver(&ZBLOCK_DRIVER);
    info!("zblock: unloaded");
}
