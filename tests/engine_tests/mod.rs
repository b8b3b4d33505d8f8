use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use darklaunch::{
    config, Args, Capability, DarkHandler, DarkLaunch, DarkLaunchConfig, OperationResult, Outcome,
};
use tracing::debug;

pub mod evaluation_test;

fn setup_engine(config_str: &str) -> DarkLaunch {
    let config: DarkLaunchConfig = config::from_str(config_str).unwrap();
    debug!("Config: {:?}", config);
    DarkLaunch::with_config(&config).unwrap()
}

/// Polls `condition` until it holds, failing the test after two seconds.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Holds operations until opened.
#[derive(Default)]
pub struct Latch {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened() -> Arc<Self> {
        let latch = Self::closed();
        latch.open();
        latch
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

/// Tracks how many evaluations are between their check and their outcome.
#[derive(Default)]
pub struct Overlap {
    current: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl Overlap {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Passing handler whose check waits on a latch and then holds for `hold`.
pub struct Blocking {
    keys: &'static str,
    latch: Arc<Latch>,
    hold: Duration,
    pub overlap: Overlap,
}

impl Blocking {
    pub fn new(keys: &'static str, latch: Arc<Latch>, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            keys,
            latch,
            hold,
            overlap: Overlap::default(),
        })
    }

    fn check(&self, _args: &Args) -> OperationResult<bool> {
        self.overlap.enter();
        self.latch.wait();
        std::thread::sleep(self.hold);
        Ok(true)
    }

    fn on_pass(&self, args: &Args) -> OperationResult<Outcome> {
        self.overlap.leave();
        Ok(Outcome::single(args.get::<i64>(0)?))
    }
}

impl DarkHandler for Blocking {
    fn capability(&self) -> Capability<Self> {
        Capability::new()
            .key_list(self.keys)
            .check("check", Self::check)
            .on_pass("on_pass", Self::on_pass)
    }
}
