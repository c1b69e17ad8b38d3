use crate::MemSampler;
use clap::builder::RangedU64ValueParser;
use clap::{value_parser, Arg, ArgAction, Command, ValueEnum};
use csv::Writer;
use std::error::Error;
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;
use std::time::Duration;

/// The access pattern every worker thread runs against the shared handles.
#[derive(PartialEq, Eq, Debug, ValueEnum, Clone, Copy)]
pub enum Workload {
    /// Clone one shared handle and drop the clone.
    Clone,
    /// Reassign a thread-local handle round-robin from a pool of shared handles.
    Assign,
    /// Construct fresh handles, fan each out to a few clones, drop them all.
    Churn,
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_possible_value().unwrap().get_name())
    }
}

pub struct Config {
    pub workload: Workload,
    pub threads: usize,
    pub fanout: usize,
    pub pool: usize,

    pub aux_thread: usize,
    pub aux_thread_period: Duration,
    pub sampling_period: Duration,

    pub interval: u64,
    pub duration: Duration,

    pub mem_sampler: MemSampler,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} threads, fanout {}, pool {}, {}s",
            self.workload, self.threads, self.fanout, self.pool, self.interval,
        )
    }
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

#[derive(Clone)]
pub struct Perf {
    pub ops_per_sec: u64,
    pub peak_mem: usize,
    pub avg_mem: usize,
    /// Payloads constructed during the run, prefill included.
    pub created: usize,
    /// Payloads destroyed by the time every handle was dropped.
    pub destroyed: usize,
}

impl Perf {
    /// Every payload must have been destroyed exactly once.
    pub fn is_balanced(&self) -> bool {
        self.created == self.destroyed
    }
}

impl fmt::Display for Perf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ops/s: {}, peak mem: {}, avg_mem: {}, created: {}, destroyed: {}",
            self.ops_per_sec,
            readable_bytes(self.peak_mem),
            readable_bytes(self.avg_mem),
            self.created,
            self.destroyed,
        )
    }
}

fn readable_bytes(num: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    for (i, unit) in UNITS.iter().enumerate() {
        if num / 2usize.pow(i as u32 * 10) < 1000 {
            return format!("{:.3} {}", num as f64 / 2f64.powf(i as f64 * 10.0), unit);
        }
    }
    format!(
        "{:.3} GiB",
        num as f64 / 2f64.powf((UNITS.len() - 1) as f64 * 10.0),
    )
}

const HEADER: [&str; 10] = [
    "workload",
    "threads",
    "fanout",
    "pool",
    "sampling_period",
    "throughput",
    "peak_mem",
    "avg_mem",
    "created",
    "destroyed",
];

impl BenchWriter {
    pub fn write_record(self, config: &Config, perf: &Perf) -> csv::Result<()> {
        if let Some(mut output) = self.output {
            output.write_record(&[
                config.workload.to_string(),
                config.threads.to_string(),
                config.fanout.to_string(),
                config.pool.to_string(),
                config.sampling_period.as_millis().to_string(),
                perf.ops_per_sec.to_string(),
                perf.peak_mem.to_string(),
                perf.avg_mem.to_string(),
                perf.created.to_string(),
                perf.destroyed.to_string(),
            ])?;
            output.flush()?;
        }
        Ok(())
    }
}

fn open_output(output_name: &str) -> Result<Writer<File>, Box<dyn Error>> {
    let output_path = Path::new(output_name);
    if let Some(dir) = output_path.parent() {
        create_dir_all(dir)?;
    }
    match OpenOptions::new().read(true).append(true).open(output_path) {
        Ok(f) => Ok(csv::Writer::from_writer(f)),
        Err(_) => {
            let f = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(output_path)?;
            let mut output = csv::Writer::from_writer(f);
            // NOTE: keep in sync with `BenchWriter::write_record`
            output.write_record(HEADER)?;
            output.flush()?;
            Ok(output)
        }
    }
}

pub fn command(name: &'static str) -> Command {
    Command::new(name)
        .arg(
            Arg::new("workload")
                .short('w')
                .value_parser(value_parser!(Workload))
                .required(true)
                .ignore_case(true)
                .help("Workload to run"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                .required(true)
                .help("Numbers of threads to run."),
        )
        .arg(
            Arg::new("fanout")
                .short('f')
                .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                .help("Clones taken of every fresh handle (churn)")
                .default_value("4"),
        )
        .arg(
            Arg::new("pool")
                .short('p')
                .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                .help("Number of shared source handles (assign)")
                .default_value("16"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .value_parser(value_parser!(u64))
                .help("Time interval in seconds to run the benchmark")
                .default_value("10"),
        )
        .arg(
            Arg::new("sampling period")
                .short('s')
                .value_parser(value_parser!(u64))
                .help(
                    "The period to query jemalloc stats.allocated (ms). 0 for no sampling. \
                     Only supported on linux.",
                )
                .default_value("1"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

/// The sampling thread runs only when jemalloc can be queried.
fn aux_threads(sampling_period: u64) -> usize {
    if sampling_period > 0 && cfg!(all(not(feature = "sanitize"), target_os = "linux")) {
        1
    } else {
        0
    }
}

pub fn setup(name: &'static str) -> Result<(Config, BenchWriter), Box<dyn Error>> {
    let m = command(name).get_matches();

    // Every argument below is either required or has a default value.
    let workload = m.get_one::<Workload>("workload").copied().unwrap();
    let threads = m.get_one::<usize>("threads").copied().unwrap();
    let fanout = m.get_one::<usize>("fanout").copied().unwrap();
    let pool = m.get_one::<usize>("pool").copied().unwrap();
    let interval = m.get_one::<u64>("interval").copied().unwrap();
    let sampling_period = m.get_one::<u64>("sampling period").copied().unwrap();
    let duration = Duration::from_secs(interval);

    if m.get_flag("dry run") {
        std::process::exit(0);
    }

    let output = match m.get_one::<String>("output") {
        Some(output_name) => Some(open_output(output_name)?),
        None => None,
    };
    let config = Config {
        workload,
        threads,
        fanout,
        pool,

        aux_thread: aux_threads(sampling_period),
        aux_thread_period: Duration::from_millis(1),
        sampling_period: Duration::from_millis(sampling_period),

        interval,
        duration,

        mem_sampler: MemSampler::new(),
    };

    Ok((config, BenchWriter { output }))
}

#[cfg(test)]
mod test {
    use super::{aux_threads, command, readable_bytes, Workload};

    #[test]
    fn parse_arguments() {
        let m = command("stress")
            .try_get_matches_from(["stress", "-w", "CHURN", "-t", "8", "-f", "2"])
            .unwrap();
        assert_eq!(m.get_one::<Workload>("workload"), Some(&Workload::Churn));
        assert_eq!(m.get_one::<usize>("threads"), Some(&8));
        assert_eq!(m.get_one::<usize>("fanout"), Some(&2));
        assert_eq!(m.get_one::<usize>("pool"), Some(&16));
        assert_eq!(m.get_one::<u64>("interval"), Some(&10));
    }

    #[test]
    fn reject_zero_threads() {
        let res = command("stress").try_get_matches_from(["stress", "-w", "clone", "-t", "0"]);
        assert!(res.is_err());
    }

    #[test]
    fn workload_names() {
        assert_eq!(Workload::Clone.to_string(), "clone");
        assert_eq!(Workload::Assign.to_string(), "assign");
    }

    #[test]
    fn bytes() {
        assert_eq!(readable_bytes(512), "512.000 B");
        assert_eq!(readable_bytes(2048), "2.000 KiB");
    }

    #[test]
    fn sampling_thread() {
        assert_eq!(aux_threads(0), 0);
        let expected = cfg!(all(not(feature = "sanitize"), target_os = "linux")) as usize;
        assert_eq!(aux_threads(5), expected);
    }
}
