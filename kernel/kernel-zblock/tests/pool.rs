use kernel_zblock::{AllocError, AllocFlags, PAGE_SIZE, ZblockPool};
use std::sync::{Arc, Barrier};
use std::thread;

fn write_payload(pool: &ZblockPool, handle: kernel_zblock::Handle, byte: u8, len: usize) {
    let ptr = pool.map(handle);
    unsafe {
        std::ptr::write_bytes(ptr, byte, len);
    }
    pool.unmap(handle);
}

fn read_payload(pool: &ZblockPool, handle: kernel_zblock::Handle, len: usize) -> Vec<u8> {
    let ptr = pool.map(handle);
    let data = unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec();
    pool.unmap(handle);
    data
}

#[test]
fn alloc_map_free_round_trip() {
    let pool = ZblockPool::new(None);

    let handle = pool.alloc(64, AllocFlags::KERNEL).expect("alloc");
    assert!(pool.slot_in_use(handle));

    write_payload(&pool, handle, 0xAB, 64);
    let back = read_payload(&pool, handle, 64);
    assert_eq!(back, vec![0xAB; 64]);

    // 64 bytes lands in the densest class: one order-0 block.
    assert_eq!(pool.total_size(), PAGE_SIZE as u64);

    // Freeing the sole occupant returns the block's pages.
    pool.free(handle);
    assert_eq!(pool.total_size(), 0);
}

#[test]
fn distinct_slots_do_not_overlap() {
    let pool = ZblockPool::new(None);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let h = pool.alloc(100, AllocFlags::KERNEL).expect("alloc");
            write_payload(&pool, h, 0x10 + i, 100);
            h
        })
        .collect();

    for (i, &h) in handles.iter().enumerate() {
        assert_eq!(read_payload(&pool, h, 100), vec![0x10 + i as u8; 100]);
    }
    for h in handles {
        pool.free(h);
    }
    assert_eq!(pool.total_size(), 0);
}

#[test]
fn size_limits_are_enforced() {
    let pool = ZblockPool::new(None);

    assert_eq!(
        pool.alloc(0, AllocFlags::KERNEL).unwrap_err(),
        AllocError::InvalidSize
    );
    assert_eq!(
        pool.alloc(PAGE_SIZE + 1, AllocFlags::KERNEL).unwrap_err(),
        AllocError::OutOfSpace
    );

    // A whole page is still storable (the last class holds one).
    let h = pool.alloc(PAGE_SIZE, AllocFlags::KERNEL).expect("alloc");
    pool.free(h);
    assert_eq!(pool.total_size(), 0);
}

#[test]
fn class_selection_is_visible_in_accounting() {
    let pool = ZblockPool::new(None);

    // 1 and 64 byte payloads share the densest order-0 class.
    let a = pool.alloc(1, AllocFlags::KERNEL).expect("alloc");
    assert_eq!(pool.total_size(), PAGE_SIZE as u64);
    let b = pool.alloc(64, AllocFlags::KERNEL).expect("alloc");
    assert_eq!(pool.total_size(), PAGE_SIZE as u64);

    // 2 KiB and 4 KiB payloads land in (different) order-3 classes.
    let c = pool.alloc(2048, AllocFlags::KERNEL).expect("alloc");
    assert_eq!(pool.total_size(), (PAGE_SIZE + (PAGE_SIZE << 3)) as u64);
    let d = pool.alloc(4096, AllocFlags::KERNEL).expect("alloc");
    assert_eq!(pool.total_size(), (PAGE_SIZE + 2 * (PAGE_SIZE << 3)) as u64);

    for h in [a, b, c, d] {
        pool.free(h);
    }
    assert_eq!(pool.total_size(), 0);
}

#[test]
fn slot_accounting_is_exact() {
    let pool = ZblockPool::new(None);

    // The densest class packs 32 slots into one order-0 block.
    let mut handles: Vec<_> = (0..32)
        .map(|_| pool.alloc(32, AllocFlags::KERNEL).expect("alloc"))
        .collect();
    assert_eq!(pool.total_size(), PAGE_SIZE as u64);

    // Freed slots are found again before the pool grows.
    for h in handles.drain(..5) {
        pool.free(h);
    }
    for _ in 0..5 {
        handles.push(pool.alloc(32, AllocFlags::KERNEL).expect("alloc"));
    }
    assert_eq!(pool.total_size(), PAGE_SIZE as u64);

    // Slot 33 must grow the class by one block.
    handles.push(pool.alloc(32, AllocFlags::KERNEL).expect("alloc"));
    assert_eq!(pool.total_size(), 2 * PAGE_SIZE as u64);

    for h in handles {
        pool.free(h);
    }
    assert_eq!(pool.total_size(), 0);
}

#[test]
fn handles_are_unique_while_live() {
    let pool = ZblockPool::new(None);
    let handles: Vec<_> = (0..100)
        .map(|_| pool.alloc(500, AllocFlags::KERNEL).expect("alloc"))
        .collect();

    let mut raw: Vec<_> = handles.iter().map(|h| h.into_raw()).collect();
    raw.sort_unstable();
    raw.dedup();
    assert_eq!(raw.len(), 100);

    for h in handles {
        pool.free(h);
    }
}

#[test]
fn concurrent_alloc_free_balances_to_empty() {
    let threads = 8;
    let iters = 300;

    let pool = Arc::new(ZblockPool::new(None));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for i in 0..iters {
                    let size = 1 + (t * 997 + i * 131) % PAGE_SIZE;
                    let h = pool.alloc(size, AllocFlags::KERNEL).expect("alloc");
                    write_payload(&pool, h, (i % 251) as u8, size);
                    let back = read_payload(&pool, h, size);
                    assert!(back.iter().all(|&b| b == (i % 251) as u8));
                    pool.free(h);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // Every slot was freed, so every block must have been returned.
    assert_eq!(pool.total_size(), 0);
}
