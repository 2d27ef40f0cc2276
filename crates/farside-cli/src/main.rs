//! farside — share one keyboard, mouse, and clipboard with remote
//! hosts over ssh.
//!
//! With a config file argument this process is the master: it captures
//! local input and tunnels it to the focused remote. Invoked with no
//! arguments (the way the master's ssh transport starts it on the far
//! host, with stdio on the tunnel) it runs as a subordinate.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "farside",
    about = "Forward keyboard, mouse, and clipboard input to remote hosts",
    version
)]
struct Cli {
    /// Master configuration file. Omit it only when running as the
    /// remote end of a transport.
    config: Option<PathBuf>,
}

fn progname() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| std::path::Path::new(arg0).file_name()?.to_str().map(String::from))
        .unwrap_or_else(|| "farside".to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.config {
        Some(path) => run_master(&path).await,
        None => run_subordinate().await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "fatal");
        eprintln!("farside: {e}");
        std::process::exit(1);
    }
}

async fn run_master(path: &std::path::Path) -> anyhow::Result<()> {
    let config = farside_daemon::config::load(path)?;
    let resolved = farside_daemon::topology::resolve(config, &progname())?;
    let platform = farside_platform::default_platform()?;
    let mut master = farside_daemon::Master::new(resolved, platform);
    master.run().await?;
    Ok(())
}

async fn run_subordinate() -> anyhow::Result<()> {
    // A bare invocation on a terminal is somebody expecting the master;
    // a real subordinate has the transport's pipes on stdio.
    if std::io::stdin().is_terminal() || std::io::stdout().is_terminal() {
        anyhow::bail!("missing CONFIGFILE argument (run with --help for usage)");
    }
    let platform = farside_platform::default_platform()?;
    farside_daemon::subordinate::run(platform).await?;
    Ok(())
}
