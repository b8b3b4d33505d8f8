use clap::{command, Parser, ValueEnum};
use darklaunch::{
    args, Args, Capability, DarkHandler, DarkLaunch, DarkLaunchConfig, DarkLaunchError,
    OperationResult, Outcome, Verdict,
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const FEATURE_KEY: &str = "checkout.new_flow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Sync,
    AsyncExec,
    AsyncCheck,
    Transactional,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "darklaunch.json")]
    config: PathBuf,

    /// Number of evaluations to fire
    #[arg(short = 'n', long, default_value_t = 100)]
    requests: u32,

    /// Percentage of users routed to the new flow
    #[arg(short, long, default_value_t = 20)]
    rollout: u8,

    #[arg(short, long, value_enum, default_value_t = Mode::Sync)]
    mode: Mode,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

/// Routes a fixed percentage of user ids to the new flow.
struct PercentRollout {
    percent: i64,
    served_new: AtomicUsize,
    served_legacy: AtomicUsize,
}

impl PercentRollout {
    fn in_rollout(&self, args: &Args) -> OperationResult<bool> {
        let user: i64 = args.get(0)?;
        Ok(user.rem_euclid(100) < self.percent)
    }

    fn serve_new(&self, args: &Args) -> OperationResult<Outcome> {
        self.served_new.fetch_add(1, Ordering::Relaxed);
        Ok(Outcome::pair("new", args.get::<i64>(0)?))
    }

    fn serve_legacy(&self, args: &Args) -> OperationResult<Outcome> {
        self.served_legacy.fetch_add(1, Ordering::Relaxed);
        Ok(Outcome::pair("legacy", args.get::<i64>(0)?))
    }
}

impl DarkHandler for PercentRollout {
    fn capability(&self) -> Capability<Self> {
        Capability::new()
            .key(FEATURE_KEY)
            .check("in_rollout", Self::in_rollout)
            .on_pass("serve_new", Self::serve_new)
            .on_fail("serve_legacy", Self::serve_legacy)
    }
}

async fn run(cli: &Cli) -> Result<(), DarkLaunchError> {
    let config = if cli.config.exists() {
        DarkLaunchConfig::from_file(&cli.config)?
    } else {
        DarkLaunchConfig::default()
    };

    info!("config loaded.");
    debug!("config: {:?}", config);

    let engine = DarkLaunch::with_config(&config)?;
    let handler = Arc::new(PercentRollout {
        percent: i64::from(cli.rollout.min(100)),
        served_new: AtomicUsize::new(0),
        served_legacy: AtomicUsize::new(0),
    });

    match cli.mode {
        Mode::Sync => engine.register(handler.clone(), false)?,
        Mode::AsyncExec => engine.register(handler.clone(), true)?,
        Mode::AsyncCheck => engine.register_async(handler.clone(), false)?,
        Mode::Transactional => engine.register_async(handler.clone(), true)?,
    }

    let evaluations = futures::future::join_all(
        (0..cli.requests).map(|user| engine.evaluate(FEATURE_KEY, args![i64::from(user)])),
    )
    .await;

    let mut passed = 0;
    let mut deferred = 0;
    let mut background = Vec::new();
    for mut evaluation in evaluations {
        if evaluation.verdict == Verdict::Deferred {
            deferred += 1;
        } else if evaluation.passed {
            passed += 1;
        }
        if let Some(task) = evaluation.take_background() {
            background.push(task.join());
        }
    }
    let reports = futures::future::join_all(background).await;
    let settled_passed = reports.iter().flatten().filter(|r| r.passed).count();

    println!("mode: {:?}", cli.mode);
    println!("evaluations: {}", cli.requests);
    println!("passed inline: {}", passed);
    println!("deferred: {} ({} passed in background)", deferred, settled_passed);
    println!(
        "served new: {}, legacy: {}",
        handler.served_new.load(Ordering::Relaxed),
        handler.served_legacy.load(Ordering::Relaxed)
    );

    for (key, signature) in engine.preview() {
        println!("{}: {}", key, signature);
    }

    engine.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
