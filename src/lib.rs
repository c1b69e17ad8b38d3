//! A thread-safe reference counted pointer, [`Rc`].
//!
//! Every payload is paired with one control block holding an atomic strong
//! count ([`RefCount`]). Handles increment the count when they are created or
//! cloned and decrement it when they are dropped or reassigned; the handle
//! whose decrement observes the last reference destroys the payload and the
//! control block together.
//!
//! The `stress` binary under `src/bin` hammers the counter from many threads
//! and checks that every payload is destroyed exactly once. Its command line
//! is parsed by [`config::stress`].

#[macro_use]
extern crate cfg_if;

mod block;
pub mod config;
mod counter;
mod rc;

pub use counter::RefCount;
pub use rc::Rc;

cfg_if! {
    if #[cfg(all(not(feature = "sanitize"), target_os = "linux"))] {
        extern crate tikv_jemalloc_ctl;
        pub struct MemSampler {
            epoch_mib: tikv_jemalloc_ctl::epoch_mib,
            allocated_mib: tikv_jemalloc_ctl::stats::allocated_mib,
        }
        impl MemSampler {
            pub fn new() -> Self {
                MemSampler {
                    epoch_mib: tikv_jemalloc_ctl::epoch::mib().unwrap(),
                    allocated_mib: tikv_jemalloc_ctl::stats::allocated::mib().unwrap(),
                }
            }
            pub fn sample(&self) -> usize {
                self.epoch_mib.advance().unwrap();
                self.allocated_mib.read().unwrap()
            }
        }
    } else {
        pub struct MemSampler {}
        impl MemSampler {
            pub fn new() -> Self {
                println!("NOTE: Memory usage benchmark is supported only for linux.");
                MemSampler {}
            }
            pub fn sample(&self) -> usize {
                0
            }
        }
    }
}

impl Default for MemSampler {
    fn default() -> Self {
        Self::new()
    }
}
