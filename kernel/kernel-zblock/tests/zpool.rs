use kernel_zblock::pool::{AllocError, EvictOps, ZblockPool};
use kernel_zblock::zpool::{self, CreateError, ZpoolBackend, ZpoolDriver};
use kernel_zblock::{AllocFlags, EvictError, Handle, MapMode, PAGE_SIZE};

#[test]
fn zblock_driver_serves_the_front_end() {
    zpool::init();

    let pool = zpool::create("zblock", "swap", None).expect("create");
    let handle = pool.malloc(128, AllocFlags::KERNEL).expect("malloc");

    let ptr = pool.map(handle, MapMode::ReadWrite);
    unsafe {
        std::ptr::write_bytes(ptr, 0x5A, 128);
    }
    pool.unmap(handle);

    let ptr = pool.map(handle, MapMode::ReadOnly);
    let back = unsafe { std::slice::from_raw_parts(ptr, 128) };
    assert!(back.iter().all(|&b| b == 0x5A));
    pool.unmap(handle);

    assert_eq!(pool.total_size(), PAGE_SIZE as u64);
    pool.free(handle);
    assert_eq!(pool.total_size(), 0);

    assert_eq!(
        pool.malloc(0, AllocFlags::KERNEL).unwrap_err(),
        AllocError::InvalidSize
    );
}

#[test]
fn unknown_driver_is_rejected() {
    zpool::init();
    assert_eq!(
        zpool::create("z9fold", "swap", None).unwrap_err(),
        CreateError::UnknownDriver("z9fold".into())
    );
}

struct NoopEvictor;

impl EvictOps for NoopEvictor {
    fn evict(&self, _pool: &ZblockPool, _handle: Handle) -> Result<(), EvictError> {
        Ok(())
    }
}

/// A second driver to exercise registration without touching the global
/// zblock driver that other tests depend on.
struct ShadowDriver;

impl ZpoolDriver for ShadowDriver {
    fn type_name(&self) -> &'static str {
        "zshadow"
    }

    fn create(
        &self,
        _name: &str,
        evict_ops: Option<Box<dyn EvictOps>>,
    ) -> Box<dyn ZpoolBackend> {
        Box::new(ZblockPool::new(evict_ops))
    }
}

static SHADOW: ShadowDriver = ShadowDriver;

#[test]
fn drivers_register_and_unregister() {
    assert!(matches!(
        zpool::create("zshadow", "a", None),
        Err(CreateError::UnknownDriver(_))
    ));

    zpool::register_driver(&SHADOW);
    // Idempotent.
    zpool::register_driver(&SHADOW);

    let pool = zpool::create("zshadow", "a", Some(Box::new(NoopEvictor))).expect("create");
    let h = pool.malloc(64, AllocFlags::KERNEL).expect("malloc");
    pool.free(h);

    zpool::unregister_driver(&SHADOW);
    assert!(matches!(
        zpool::create("zshadow", "a", None),
        Err(CreateError::UnknownDriver(_))
    ));
}
