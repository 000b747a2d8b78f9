//! # dedicated-pool — a dedicated work-stealing thread pool
//!
//! A fixed-identity pool of worker threads executing short-running
//! closures with low dispatch latency and good locality. Work submitted
//! from a worker lands on that worker's own LIFO deque; work from outside
//! goes through a shared FIFO injection queue. Idle workers steal the
//! oldest work from their peers.
//!
//! ## Architecture
//!
//! - **Deque**: a Chase–Lev work-stealing deque per worker, with a growing
//!   and shrinking power-of-two backing array
//! - **Injection queue**: the shared FIFO for outside submissions
//! - **Unfair semaphore**: a throttling gate that releases recently-active
//!   spinners before kernel-blocked waiters, preserving cache locality
//! - **Dispatch loop**: local → global → steal selection, yielding on a
//!   30 ms quantum, with wake-ups coalesced so an enqueue storm does not
//!   become a wake storm
//!
//! ## Example
//!
//! ```
//! use dedicated_pool::ThreadPool;
//!
//! let pool = ThreadPool::with_default_settings();
//!
//! let counter = pool.run(|| {
//!     println!("hello from the pool");
//! }).unwrap();
//!
//! pool.wait_for_counter(&counter);
//! pool.dispose();
//! ```

pub mod counter;
pub mod deque;
pub mod error;
pub mod injector;
pub mod job;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod semaphore;

mod circular;
mod queue;
mod rng;
mod worker;

pub use counter::Counter;
pub use error::{SettingsError, ShutdownError};
pub use job::Job;
pub use pool::{PoolSettings, ThreadPool};
pub use worker::DISPATCH_QUANTUM_MS;
