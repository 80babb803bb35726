mod common;

use common::boot;
use kernel_core::{GlobalKernel, KernelError, SimulatedPlatform};

#[test]
fn access_before_publishing_fails() {
    static KERNEL: GlobalKernel<SimulatedPlatform> = GlobalKernel::new();
    assert!(!KERNEL.is_published());
    assert_eq!(KERNEL.with(|_| ()).err(), Some(KernelError::NotPublished));
    assert!(!KERNEL.tick());
}

#[test]
fn published_context_is_shared() {
    static KERNEL: GlobalKernel<SimulatedPlatform> = GlobalKernel::new();
    KERNEL.publish(boot()).unwrap();
    assert!(KERNEL.is_published());
    assert_eq!(
        KERNEL.publish(boot()).err(),
        Some(KernelError::AlreadyPublished)
    );

    let p = KERNEL.try_with(|k| k.kmalloc(128)).unwrap();
    KERNEL.try_with(|k| k.kfree(p)).unwrap();
    let before = KERNEL.with(|k| k.scheduler().current()).unwrap();
    assert!(KERNEL.tick());
    assert_eq!(KERNEL.with(|k| k.scheduler().current()).unwrap(), before);
}

#[test]
fn tick_is_dropped_while_the_context_is_held() {
    static KERNEL: GlobalKernel<SimulatedPlatform> = GlobalKernel::new();
    KERNEL.publish(boot()).unwrap();
    let delivered = KERNEL.with(|_| KERNEL.tick()).unwrap();
    assert!(!delivered);
    assert!(KERNEL.tick());
}

#[test]
fn release_after_switch_unlocks_a_parked_guard() {
    static KERNEL: GlobalKernel<SimulatedPlatform> = GlobalKernel::new();
    KERNEL.publish(boot()).unwrap();
    KERNEL
        .with(|_| {
            // what a task sees on its first instruction after the switch
            unsafe { KERNEL.release_after_switch() };
        })
        .unwrap();
    assert!(KERNEL.tick());
}
