//! Tests against real MTE hardware. Run with `cargo test -p tiktag-aarch64 -- --ignored`
//! on an MTE-capable AArch64 Linux machine.
#![cfg(all(target_arch = "aarch64", target_os = "linux"))]

use tiktag_aarch64::{MtePlatform, mte_allocator};
use tiktag_core::fault::trigger_boundary_fault;
use tiktag_core::lifecycle::TagManager;
use tiktag_core::oracle::Oracle;
use tiktag_core::platform::{CacheTiming, MemoryTagging, TagCheckControl};
use tiktag_core::tag::{IncludeMask, Tag};
use tiktag_core::util::{Size, page_size};

/// Runs `f` in a forked child and returns the signal that terminated it, if any.
fn child_signal(f: impl FnOnce()) -> Option<i32> {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        f();
        unsafe { libc::_exit(0) };
    }
    let mut status = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(ret, pid);
    if libc::WIFSIGNALED(status) {
        Some(libc::WTERMSIG(status))
    } else {
        assert_eq!(libc::WEXITSTATUS(status), 0, "child failed");
        None
    }
}

#[test]
#[ignore]
fn detects_and_enables_mte() -> anyhow::Result<()> {
    let mte = MtePlatform::new();
    mte.detect()?;
    mte.enable_sync_checking(IncludeMask::DEFAULT)?;
    Ok(())
}

#[test]
#[ignore]
fn bound_key_round_trips_through_ldg() -> anyhow::Result<()> {
    let mte = MtePlatform::new();
    mte.detect()?;
    mte.enable_sync_checking(IncludeMask::DEFAULT)?;
    let manager = TagManager::new(&mte, IncludeMask::DEFAULT);
    let region = manager.allocate_tagged_region(&mut mte_allocator(), Size::Pages(2))?;
    assert_eq!(manager.lock_of(region.base()), Tag::UNTAGGED);
    let key = manager.generate_key(region.base());
    assert!(IncludeMask::DEFAULT.contains(key.tag()));
    manager.bind_lock(key);
    assert_eq!(manager.lock_of(region.base()), key.tag());
    mte.write_byte(key, 0x36)?;
    assert_eq!(mte.read_byte(key)?, 0x36);
    region.dealloc();
    Ok(())
}

#[test]
#[ignore]
fn probe_returns_one_sample_per_iteration() -> anyhow::Result<()> {
    let mte = MtePlatform::new();
    mte.detect()?;
    mte.enable_sync_checking(IncludeMask::DEFAULT)?;
    let manager = TagManager::new(&mte, IncludeMask::DEFAULT);
    let region = manager.allocate_tagged_region(&mut mte_allocator(), Size::Pages(2))?;
    let key = manager.generate_key(region.base());
    let offset = page_size() + 0x10;
    manager.bind_lock(key.byte_add(offset));
    mte.write_byte(key.byte_add(offset), 0x45)?;
    let samples = Oracle::new(&mte, &mte).probe_many(key, offset, 1000, |_, _| {});
    assert_eq!(samples.len(), 1000);
    region.dealloc();
    Ok(())
}

#[test]
#[ignore]
fn cold_reads_time_slower_than_warm_reads() -> anyhow::Result<()> {
    let mte = MtePlatform::new();
    mte.detect()?;
    mte.enable_sync_checking(IncludeMask::DEFAULT)?;
    let manager = TagManager::new(&mte, IncludeMask::DEFAULT);
    let region = manager.allocate_tagged_region(&mut mte_allocator(), Size::Pages(1))?;
    let key = manager.generate_key(region.base());
    manager.bind_lock(key);
    mte.write_byte(key, 0x45)?;

    let timed = |flush: bool| -> anyhow::Result<u64> {
        let mut samples = Vec::with_capacity(1000);
        for _ in 0..1000 {
            if flush {
                mte.flush_cache_line(key);
            } else {
                mte.read_byte(key)?;
            }
            let start = mte.read_cycle_counter();
            std::hint::black_box(mte.read_byte(key)?);
            let end = mte.read_cycle_counter();
            assert!(end >= start, "counter went backwards");
            samples.push(end - start);
        }
        samples.sort_unstable();
        Ok(samples[samples.len() / 2])
    };
    let warm = timed(false)?;
    let cold = timed(true)?;
    assert!(cold >= warm, "cold median {} below warm median {}", cold, warm);
    region.dealloc();
    Ok(())
}

#[test]
#[ignore]
fn writes_inside_the_bound_granule_do_not_fault() {
    let signal = child_signal(|| {
        let mte = MtePlatform::new();
        mte.detect().expect("no MTE");
        mte.enable_sync_checking(IncludeMask::DEFAULT)
            .expect("prctl");
        let manager = TagManager::new(&mte, IncludeMask::DEFAULT);
        let region = manager
            .allocate_tagged_region(&mut mte_allocator(), Size::Pages(2))
            .expect("mmap");
        let key = manager.generate_key(region.base());
        manager.bind_lock(key);
        for offset in 0..0x10 {
            mte.write_byte(key.byte_add(offset), 0x55).expect("write");
        }
    });
    assert_eq!(signal, None);
}

#[test]
#[ignore]
fn boundary_write_terminates_with_sigsegv() {
    let signal = child_signal(|| {
        let mte = MtePlatform::new();
        mte.detect().expect("no MTE");
        mte.enable_sync_checking(IncludeMask::DEFAULT)
            .expect("prctl");
        let manager = TagManager::new(&mte, IncludeMask::DEFAULT);
        let region = manager
            .allocate_tagged_region(&mut mte_allocator(), Size::Pages(2))
            .expect("mmap");
        let key = manager.generate_key(region.base());
        manager.bind_lock(key);
        trigger_boundary_fault(&mte, key);
    });
    assert_eq!(signal, Some(libc::SIGSEGV));
}
