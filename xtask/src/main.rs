use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for levelflow")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy, tests, deny and doc in order
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run all tests
    Test,
    /// Run cargo deny check
    Deny,
    /// Build rustdoc for the workspace
    Doc,
    /// Run the streaming activation benchmark in release mode
    Bench,
    /// Stream and travel through the bundled demo manifest
    Demo,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test()?;
            deny()?;
            doc()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test => test()?,
        Commands::Deny => deny()?,
        Commands::Doc => doc()?,
        Commands::Bench => cargo(
            "streaming benchmark",
            &["bench", "-p", "levelflow-stream", "--bench", "bench_stream_activation"],
        )?,
        Commands::Demo => {
            let manifest = "demos/station.yaml";
            cargo(
                "demo streaming",
                &["run", "-p", "levelflow-cli", "--", "stream", "--manifest", manifest, "--ticks", "20"],
            )?;
            cargo(
                "demo travel",
                &["run", "-p", "levelflow-cli", "--", "travel", "--manifest", manifest, "--to", "Hangar?Name=Ash"],
            )?;
        }
    }

    Ok(())
}

fn cargo(label: &str, args: &[&str]) -> Result<()> {
    println!("==> {label}: cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{label} failed");
    }
    Ok(())
}

fn fmt() -> Result<()> {
    cargo("fmt", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn test() -> Result<()> {
    cargo("tests", &["test", "--workspace"])
}

fn deny() -> Result<()> {
    cargo("deny", &["deny", "check", "licenses", "bans", "sources"])
}

fn doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}
