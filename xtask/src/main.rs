use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the locator workspace",
    long_about = "A unified CLI for running the demo, benchmarks, load tests,\n\
                  and CI checks in the locator workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed a synthetic fleet and print nearby agents and surge as JSON
    Demo {
        /// Number of seeded agents
        #[arg(long, default_value_t = 500)]
        agents: usize,
        /// Demand markers tracked at the centre
        #[arg(long, default_value_t = 40)]
        demand: usize,
    },
    /// Run Criterion benchmarks
    Bench,
    /// Benchmark uncommitted changes against HEAD (find_nearby, update_location, surge)
    BenchCompare {
        /// Criterion baseline name recorded for HEAD
        #[arg(long, default_value = "head")]
        baseline: String,
        /// Only run benchmarks whose id matches this filter, e.g. `find_nearby`
        #[arg(long)]
        filter: Option<String>,
    },
    /// Run CI checks (fmt, clippy, tests, demo, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run load tests (ignored tests in locator_core)
    LoadTest,
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Run the CLI demo end to end
    Demo,
    /// Run benchmarks
    Bench,
    /// Run check + demo + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn git(args: &[&str]) -> ExitStatus {
    eprintln!("+ git {}", args.join(" "));
    Command::new("git")
        .args(args)
        .status()
        .expect("failed to execute git")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_git(args: &[&str]) {
    let status = git(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_demo(agents: usize, demand: usize) {
    let agents = agents.to_string();
    let demand = demand.to_string();
    run_cargo(&[
        "run",
        "-p",
        "locator_cli",
        "--release",
        "--",
        "simulate",
        "--agents",
        &agents,
        "--demand",
        &demand,
    ]);
}

const BENCH_ARGS: [&str; 5] = ["bench", "--package", "locator_core", "--bench", "performance"];

fn bench_with(extra: &[&str]) {
    let mut args = BENCH_ARGS.to_vec();
    if !extra.is_empty() {
        args.push("--");
        args.extend_from_slice(extra);
    }
    run_cargo(&args);
}

/// Criterion flags after `--`: an optional id filter followed by baseline flags.
fn criterion_args<'a>(filter: Option<&'a str>, baseline_flag: &'a str, baseline: &'a str) -> Vec<&'a str> {
    let mut args = Vec::new();
    args.extend(filter);
    args.extend([baseline_flag, baseline]);
    args
}

fn bench_compare(baseline: &str, filter: Option<&str>) {
    let dirty = !git(&["diff", "--quiet", "HEAD"]).success();
    if !dirty {
        eprintln!("No uncommitted changes; recording `{baseline}` only.");
        bench_with(&criterion_args(filter, "--save-baseline", baseline));
        return;
    }

    step("Stashing working tree to benchmark HEAD");
    run_git(&["stash", "push", "-m", "xtask bench-compare"]);

    step(&format!("Recording baseline `{baseline}` at HEAD"));
    let mut args = BENCH_ARGS.to_vec();
    args.push("--");
    args.extend(criterion_args(filter, "--save-baseline", baseline));
    let status = cargo(&args);

    step("Restoring working tree");
    run_git(&["stash", "pop"]);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }

    step(&format!("Comparing working tree against `{baseline}`"));
    bench_with(&criterion_args(filter, "--baseline", baseline));
    eprintln!("\nCompared against `{baseline}`; Criterion reports are under target/criterion.");
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test locator_core");
    run_cargo(&["test", "-p", "locator_core"]);

    step("Build locator_cli");
    run_cargo(&["build", "-p", "locator_cli"]);
}

fn ci_demo() {
    step("Run locator demo (500 agents, 40 demand markers)");
    run_demo(500, 40);
}

fn ci_bench() {
    step("Run benchmarks");
    bench_with(&[]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { agents, demand } => run_demo(agents, demand),
        Commands::Bench => bench_with(&[]),
        Commands::BenchCompare { baseline, filter } => bench_compare(&baseline, filter.as_deref()),
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Demo => ci_demo(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_demo();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::LoadTest => {
            run_cargo(&[
                "test",
                "-p",
                "locator_core",
                "--test",
                "load_tests",
                "--release",
                "--",
                "--ignored",
            ]);
        }
    }
}
