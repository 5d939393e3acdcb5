use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::process::Command;

const CRATES: &[&str] = &[
    "cellgraph-common",
    "cellgraph-kernel",
    "cellgraph-persist",
    "cellgraph-contact",
    "cellgraph-mesh",
    "cellgraph-scratch",
];

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for cellgraph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// fmt, clippy, tests and docs, stopping at the first failure
    Check,
    Fmt,
    Clippy,
    /// Run tests for the workspace or a single crate
    Test {
        /// Short crate name, e.g. `kernel` for cellgraph-kernel
        #[arg(short, long)]
        package: Option<String>,
        /// Number of cases per property test
        #[arg(long)]
        cases: Option<u32>,
    },
    Doc,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test(None, None)?;
            doc()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test { package, cases } => test(package.as_deref(), cases)?,
        Commands::Doc => doc()?,
    }

    Ok(())
}

fn fmt() -> Result<()> {
    cargo("fmt", &["fmt", "--all", "--", "--check"], &[])
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        &[],
    )
}

fn test(package: Option<&str>, cases: Option<u32>) -> Result<()> {
    let mut args = vec!["test".to_owned()];
    match package {
        Some(short) => {
            let name = resolve_crate(short)?;
            args.extend(["-p".to_owned(), name.to_owned()]);
        }
        None => args.push("--workspace".to_owned()),
    }
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let cases = cases.map(|n| n.to_string());
    let env: Vec<(&str, &str)> = cases.iter().map(|n| ("PROPTEST_CASES", n.as_str())).collect();
    cargo("test", &args, &env)
}

fn doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"], &[])
}

fn resolve_crate(short: &str) -> Result<&'static str> {
    let full = format!("cellgraph-{short}");
    match CRATES.iter().copied().find(|c| *c == short || *c == full) {
        Some(name) => Ok(name),
        None => bail!("unknown crate `{short}`, expected one of {}", CRATES.join(", ")),
    }
}

fn cargo(step: &str, args: &[&str], env: &[(&str, &str)]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .envs(env.iter().copied())
        .status()
        .with_context(|| format!("failed to launch cargo {step}"))?;
    if !status.success() {
        bail!("cargo {step} failed");
    }
    Ok(())
}
