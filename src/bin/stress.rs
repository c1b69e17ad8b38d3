use crossbeam_utils::thread::scope;
use rand::prelude::*;
use std::cmp::max;
use std::error::Error;
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Instant;

use refcounted_ptr::config::stress::{setup, Config, Perf, Workload};
use refcounted_ptr::Rc;

#[cfg(all(not(feature = "sanitize"), target_os = "linux"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

static CREATED: AtomicUsize = AtomicUsize::new(0);
static DESTROYED: AtomicUsize = AtomicUsize::new(0);

/// A payload that keeps track of how many instances were built and dropped.
struct Payload {
    id: usize,
    _data: [u64; 4],
}

impl Payload {
    fn new(id: usize) -> Self {
        CREATED.fetch_add(1, Ordering::Relaxed);
        Self { id, _data: [0; 4] }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        DESTROYED.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let (config, output) = setup("stress")?;
    println!("{}", config);
    let perf = bench(&config);
    output.write_record(&config, &perf)?;
    println!("{}", perf);

    if !perf.is_balanced() {
        eprintln!(
            "payload leak or double free: {} created, {} destroyed",
            perf.created, perf.destroyed
        );
        std::process::exit(1);
    }
    Ok(())
}

fn bench(config: &Config) -> Perf {
    let pool = (0..config.pool)
        .map(|id| Rc::new(Payload::new(id)))
        .collect::<Vec<_>>();
    let sources = &pool;

    let barrier = &Arc::new(Barrier::new(config.threads + config.aux_thread));
    let (ops_sender, ops_receiver) = mpsc::channel();
    let (mem_sender, mem_receiver) = mpsc::channel();

    scope(|s| {
        // sampling thread
        if config.aux_thread > 0 {
            let mem_sender = mem_sender.clone();
            s.spawn(move |_| {
                let mut samples = 0usize;
                let mut acc = 0usize;
                let mut peak = 0usize;
                barrier.clone().wait();

                let start = Instant::now();
                let mut next_sampling = start + config.sampling_period;
                while start.elapsed() < config.duration {
                    let now = Instant::now();
                    if now > next_sampling {
                        let allocated = config.mem_sampler.sample();
                        samples += 1;

                        acc += allocated;
                        peak = max(peak, allocated);

                        next_sampling = now + config.sampling_period;
                    }
                    std::thread::sleep(config.aux_thread_period);
                }

                mem_sender.send((peak, acc / max(samples, 1))).unwrap();
            });
        } else {
            mem_sender.send((0, 0)).unwrap();
        }

        for _ in 0..config.threads {
            let ops_sender = ops_sender.clone();
            s.spawn(move |_| {
                let rng = &mut rand::thread_rng();
                barrier.clone().wait();
                let start = Instant::now();

                let ops = match config.workload {
                    Workload::Clone => run_clone(config, &sources[0], start),
                    Workload::Assign => run_assign(config, sources, start, rng),
                    Workload::Churn => run_churn(config, start, rng),
                };
                ops_sender.send(ops).unwrap();
            });
        }
    })
    .unwrap();

    let mut ops = 0;
    for _ in 0..config.threads {
        let local_ops = ops_receiver.recv().unwrap();
        ops += local_ops;
    }
    let ops_per_sec = ops / max(config.interval, 1);
    let (peak_mem, avg_mem) = mem_receiver.recv().unwrap();

    drop(pool);
    Perf {
        ops_per_sec,
        peak_mem,
        avg_mem,
        created: CREATED.load(Ordering::Acquire),
        destroyed: DESTROYED.load(Ordering::Acquire),
    }
}

fn run_clone(config: &Config, shared: &Rc<Payload>, start: Instant) -> u64 {
    let mut ops: u64 = 0;
    while start.elapsed() < config.duration {
        let copy = shared.clone();
        black_box(copy.as_ptr());
        drop(copy);
        ops += 1;
    }
    ops
}

fn run_assign(
    config: &Config,
    sources: &[Rc<Payload>],
    start: Instant,
    rng: &mut ThreadRng,
) -> u64 {
    let mut ops: u64 = 0;
    let mut local = Rc::null();
    while start.elapsed() < config.duration {
        let source = &sources[rng.gen_range(0..sources.len())];
        local.assign(source);
        black_box(local.as_ref().map(|p| p.id));
        ops += 1;
    }
    ops
}

fn run_churn(config: &Config, start: Instant, rng: &mut ThreadRng) -> u64 {
    let mut ops: u64 = 0;
    let mut fan = Vec::with_capacity(config.fanout);
    while start.elapsed() < config.duration {
        let fresh = Rc::new_with(|| Payload::new(rng.gen()));
        fan.extend((0..config.fanout).map(|_| fresh.clone()));
        drop(fresh);
        // Let a random copy be the one that destroys the payload.
        fan.shuffle(rng);
        fan.clear();
        ops += 1;
    }
    ops
}
