//! Synchronization primitives: interrupt-masking spinlock and a
//! scheduler-integrated blocking mutex.

pub mod mutex;
pub mod spinlock;

pub use mutex::{Mutex, MutexGuard};
pub use spinlock::{PrimitiveSpinlockGuard, Spinlock, SpinlockGuard};
