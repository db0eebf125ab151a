//! Build automation tasks for the docdb-driver workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for docdb-driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test)
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy with all features
    Clippy,
    /// Run all tests
    Test,
    /// Build the pool without the `async` feature
    NoDefault,
    /// Repeat the pool concurrency tests to shake out races
    Stress {
        /// Number of runs
        #[arg(long, default_value_t = 20)]
        iterations: u32,
    },
    /// Run the property tests with more cases
    Props {
        /// Cases per property
        #[arg(long, default_value_t = 512)]
        cases: u32,
    },
    /// Generate documentation
    Doc,
    /// Run benchmarks
    Bench,
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to workspace root
    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            no_default(&sh)?;
            test(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test => test(&sh)?,
        Command::NoDefault => no_default(&sh)?,
        Command::Stress { iterations } => stress(&sh, iterations)?,
        Command::Props { cases } => props(&sh, cases)?,
        Command::Doc => doc(&sh)?,
        Command::Bench => bench(&sh)?,
        Command::Clean => clean(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    println!("Formatting check passed.");
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(
        sh,
        "cargo clippy --all-features --all-targets -- -D warnings"
    )
    .run()?;
    println!("Clippy check passed.");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("Running tests...");
    cmd!(sh, "cargo test --all-features").run()?;
    println!("All tests passed.");
    Ok(())
}

fn no_default(sh: &Shell) -> Result<()> {
    println!("Checking docdb-driver-pool without default features...");
    cmd!(sh, "cargo check -p docdb-driver-pool --no-default-features").run()?;
    Ok(())
}

fn stress(sh: &Shell, iterations: u32) -> Result<()> {
    if iterations == 0 {
        bail!("--iterations must be at least 1");
    }
    cmd!(sh, "cargo test -p docdb-driver-pool --test concurrency --no-run").run()?;
    for i in 1..=iterations {
        println!("Stress run {i}/{iterations}...");
        cmd!(sh, "cargo test -p docdb-driver-pool --test concurrency --quiet")
            .run()
            .with_context(|| format!("concurrency tests failed on run {i}"))?;
    }
    println!("{iterations} stress runs passed.");
    Ok(())
}

fn props(sh: &Shell, cases: u32) -> Result<()> {
    println!("Running property tests with {cases} cases...");
    let cases = cases.to_string();
    cmd!(sh, "cargo test -p docdb-driver-pool --test generation_props")
        .env("PROPTEST_CASES", cases)
        .run()?;
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    cmd!(sh, "cargo doc --all-features --no-deps").run()?;
    println!("Documentation generated.");
    Ok(())
}

fn bench(sh: &Shell) -> Result<()> {
    println!("Running benchmarks...");
    cmd!(sh, "cargo bench -p docdb-driver-pool").run()?;
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("Clean complete.");
    Ok(())
}
