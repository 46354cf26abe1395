//! Bridge simulation binary.
//!
//! Runs a concurrent AES workload against simulated secure partitions and
//! checks the resource-accounting invariants once every thread is done.
//!
//! # Usage
//!
//! ```bash
//! # Eight threads of blocking AES-CTR and AES-ECB on one accelerator
//! nsbridge-sim --threads 8 --operations 500 --mode blocking
//!
//! # Same workload with 5% of secure calls failing at the transport
//! nsbridge-sim --mode callback --failure-rate 0.05 --seed 7
//! ```

use std::{
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use nsbridge_core::{
    AccessLock, Completion, Driver, DriverConfig, DriverError, Params, RefCountPower, Timeout,
};
use nsbridge_drivers::{
    AesCtr, AesCtrDriver, AesEcb, AesEcbDriver, CryptoKey,
    aesctr::AesCtrOneStep,
    aesecb::{AesEcbOperation, BLOCK_LEN},
};
use nsbridge_harness::{
    Accelerator, AesCtrEngine, AesEcbEngine, BridgeSnapshot, ChaoticChannel, InvariantRegistry,
    PartitionConfig, SimPartition, Timing,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Return behavior every simulated handle is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Polling,
    Blocking,
    Callback,
}

/// Non-secure bridge simulator
#[derive(Parser, Debug)]
#[command(name = "nsbridge-sim")]
#[command(about = "Concurrent workload against simulated secure crypto partitions")]
#[command(version)]
struct Args {
    /// Worker threads; each opens one AES-CTR and one AES-ECB handle
    #[arg(short, long, default_value = "4")]
    threads: u8,

    /// Operations per thread
    #[arg(short, long, default_value = "200")]
    operations: usize,

    /// Return behavior
    #[arg(short, long, value_enum, default_value = "blocking")]
    mode: Mode,

    /// Completion delay in microseconds
    #[arg(long, default_value = "50")]
    delay_us: u64,

    /// Probability that a secure call fails at the transport
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Seed for the workload and fault injection
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

type CtrChannel = ChaoticChannel<SimPartition<AesCtr, AesCtrEngine>>;
type EcbChannel = ChaoticChannel<SimPartition<AesEcb, AesEcbEngine>>;

#[derive(Debug, Default)]
struct Tally {
    done: AtomicUsize,
    pending: AtomicUsize,
    completed: AtomicUsize,
    busy: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record(&self, result: &Result<Completion, DriverError>) {
        let counter = match result {
            Ok(Completion::Done) => &self.done,
            Ok(Completion::Pending) => &self.pending,
            Err(DriverError::ResourceUnavailable) => &self.busy,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Bridge {
    ctr: AesCtrDriver<CtrChannel>,
    ecb: AesEcbDriver<EcbChannel>,
    accelerator: Accelerator,
}

impl Bridge {
    fn new(args: &Args) -> Self {
        let config = PartitionConfig {
            static_slots: args.threads,
            pool_slots: 0,
            timing: if args.delay_us == 0 {
                Timing::Immediate
            } else {
                Timing::Deferred(Duration::from_micros(args.delay_us))
            },
        };
        let accelerator = Accelerator::new();
        let power = RefCountPower::new();
        let access = AccessLock::new();
        let driver_config = DriverConfig { max_handles: usize::from(args.threads) };

        let ctr_partition =
            SimPartition::on_accelerator(AesCtrEngine::default(), config, accelerator.clone());
        let ecb_partition =
            SimPartition::on_accelerator(AesEcbEngine::default(), config, accelerator.clone());

        let ctr = AesCtrDriver::new(Driver::new(
            ChaoticChannel::with_seed(ctr_partition, args.failure_rate, args.seed),
            power.clone(),
            access.clone(),
            driver_config,
        ));
        let ecb = AesEcbDriver::new(Driver::new(
            ChaoticChannel::with_seed(ecb_partition, args.failure_rate, args.seed.rotate_left(17)),
            power,
            access,
            driver_config,
        ));
        ctr.init();
        ecb.init();

        Self { ctr, ecb, accelerator }
    }

    fn params<F: nsbridge_core::Family>(mode: Mode, tally: &Arc<Tally>) -> Params<F> {
        match mode {
            Mode::Polling => Params::polling(),
            Mode::Blocking => {
                Params::blocking().with_timeout(Timeout::After(Duration::from_millis(50)))
            },
            Mode::Callback => {
                let tally = Arc::clone(tally);
                Params::callback(move |_| {
                    tally.completed.fetch_add(1, Ordering::Relaxed);
                })
            },
        }
    }

    fn snapshot(&self) -> BridgeSnapshot {
        let mut snapshot = BridgeSnapshot::of_driver(self.ctr.inner());
        snapshot.add_family(self.ecb.inner());
        snapshot.with_max_concurrent(self.accelerator.max_concurrent())
    }
}

fn worker(bridge: &Bridge, index: u8, args: &Args, tally: &Arc<Tally>) {
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed ^ u64::from(index));

    let ctr = bridge.ctr.open(index, Some(Bridge::params(args.mode, tally)));
    let ecb = bridge.ecb.open(index, Some(Bridge::params(args.mode, tally)));
    let (ctr, ecb) = match (ctr, ecb) {
        (Ok(ctr), Ok(ecb)) => (ctr, ecb),
        (ctr, ecb) => {
            let (ctr_error, ecb_error) = (ctr.as_ref().err(), ecb.as_ref().err());
            tracing::warn!(index, ctr = ?ctr_error, ecb = ?ecb_error, "open failed");
            if let Ok(handle) = ctr {
                let _ = bridge.ctr.close(handle);
            }
            if let Ok(handle) = ecb {
                let _ = bridge.ecb.close(handle);
            }
            return;
        },
    };

    let key = match CryptoKey::aes(vec![index; 16]) {
        Ok(key) => key,
        Err(error) => {
            tracing::error!(%error, "bad workload key");
            return;
        },
    };

    for _ in 0..args.operations {
        let result = if rng.gen_bool(0.5) {
            let len = rng.gen_range(0..256);
            let mut op = AesCtrOneStep {
                key: key.clone(),
                input: vec![0u8; len],
                ..AesCtrOneStep::default()
            };
            bridge.ctr.one_step_encrypt(&ctr, &mut op)
        } else {
            let blocks = rng.gen_range(1..8);
            let mut op = AesEcbOperation {
                key: key.clone(),
                input: vec![0u8; blocks * BLOCK_LEN],
                output: Vec::new(),
            };
            bridge.ecb.one_step_encrypt(&ecb, &mut op)
        };
        tally.record(&result);
        if result.is_err() {
            thread::yield_now();
        }
    }

    // callback handles may still have an operation in flight
    while bridge.ctr.inner().is_in_flight(&ctr) || bridge.ecb.inner().is_in_flight(&ecb) {
        thread::yield_now();
    }
    if let Err(error) = bridge.ctr.close(ctr) {
        tracing::warn!(index, %error, "close failed");
    }
    if let Err(error) = bridge.ecb.close(ecb) {
        tracing::warn!(index, %error, "close failed");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if !(0.0..=1.0).contains(&args.failure_rate) {
        tracing::error!(rate = args.failure_rate, "failure rate must be between 0 and 1");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        threads = args.threads,
        operations = args.operations,
        mode = ?args.mode,
        failure_rate = args.failure_rate,
        seed = args.seed,
        "simulation starting"
    );

    let bridge = Bridge::new(&args);
    let tally = Arc::new(Tally::default());
    let started = Instant::now();

    thread::scope(|scope| {
        for index in 0..args.threads {
            let (bridge, args, tally) = (&bridge, &args, &tally);
            scope.spawn(move || worker(bridge, index, args, tally));
        }
    });

    let elapsed = started.elapsed();
    tracing::info!(
        done = tally.done.load(Ordering::Relaxed),
        pending = tally.pending.load(Ordering::Relaxed),
        callbacks = tally.completed.load(Ordering::Relaxed),
        busy = tally.busy.load(Ordering::Relaxed),
        failed = tally.failed.load(Ordering::Relaxed),
        max_concurrent = bridge.accelerator.max_concurrent(),
        ?elapsed,
        "simulation finished"
    );

    match InvariantRegistry::standard().check_all(&bridge.snapshot()) {
        Ok(()) => {
            tracing::info!("all invariants hold");
            ExitCode::SUCCESS
        },
        Err(violations) => {
            for violation in violations {
                tracing::error!(%violation, "invariant violated");
            }
            ExitCode::FAILURE
        },
    }
}
