use ansi_term::Colour::Red;
use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, WaitOptions};
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;
use vmctl_common::TaskError;

mod client;
mod commands;

use client::EndpointClient;

/// vmctl - Power on/off virtual machines and revert snapshots on a management endpoint
#[derive(Parser, Debug)]
#[command(name = "vmctl")]
#[command(author = "vmctl Team")]
#[command(version)]
#[command(about = "VM lifecycle client for a virtualization management endpoint", long_about = None)]
struct Cli {
    /// Remote host to connect to
    #[arg(short = 'x', long)]
    host: String,

    /// Port to connect on
    #[arg(short = 'o', long, default_value_t = 8443)]
    port: u16,

    /// User name to use when connecting to host
    #[arg(short = 'u', long)]
    user: String,

    /// Password to use when connecting to host (prompted when omitted)
    #[arg(short = 'p', long, env = "VMCTL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Give up waiting on tasks after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log task progress to stderr
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", Red.paint(describe_error(&e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let password = match cli.password {
        Some(p) => p,
        None => prompt_password(&cli.host, &cli.user)?,
    };

    let mut client = EndpointClient::new(&cli.host, cli.port);
    client
        .login(&cli.user, &password)
        .await
        .context("Cannot connect to specified host using specified username and password")?;

    let options = WaitOptions {
        timeout: cli.timeout.map(Duration::from_secs),
    };
    let result = cli.command.execute(&client, options).await;

    if let Err(e) = client.logout().await {
        tracing::warn!("Failed to log out: {:#}", e);
    }

    result
}

fn prompt_password(host: &str, user: &str) -> Result<String> {
    eprint!("Enter password for host {} and user {}: ", host, user);
    std::io::stderr().flush().context("Failed to write prompt")?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// User-facing message for a failed command
fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<TaskError>() {
        Some(TaskError::RemoteTaskFailed { fault, .. }) => format!("Caught fault : {}", fault.msg),
        Some(other) => format!("Caught exception : {}", other),
        None => format!("{:#}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmctl_common::{MethodFault, TaskHandle};

    #[test]
    fn test_parse_power_on_with_repeated_vms() {
        let cli = Cli::try_parse_from([
            "vmctl", "-x", "10.10.1.1", "-u", "admin", "-p", "secret", "poweron", "-v", "web-01",
            "-v", "db-01",
        ])
        .unwrap();
        assert_eq!(cli.port, 8443);
        assert_eq!(cli.password.as_deref(), Some("secret"));
        match cli.command {
            Commands::PowerOn(args) => assert_eq!(args.vms, vec!["web-01", "db-01"]),
            other => panic!("Expected PowerOn, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_revert_requires_snapshot() {
        let result = Cli::try_parse_from([
            "vmctl", "-x", "host", "-u", "admin", "revert", "-v", "web-01",
        ]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "vmctl", "-x", "host", "-o", "443", "-u", "admin", "--timeout", "30", "revert",
            "--vmname", "web-01", "-s", "clean-install",
        ])
        .unwrap();
        assert_eq!(cli.port, 443);
        assert_eq!(cli.timeout, Some(30));
        match cli.command {
            Commands::Revert(args) => assert_eq!(args.snapshot, "clean-install"),
            other => panic!("Expected Revert, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_requires_vm() {
        let result = Cli::try_parse_from(["vmctl", "-x", "host", "-u", "admin", "poweroff"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_describe_remote_fault() {
        let err = anyhow::Error::new(TaskError::RemoteTaskFailed {
            task: TaskHandle::new("task-1"),
            fault: MethodFault::new("InvalidPowerState", "already on"),
        });
        assert_eq!(describe_error(&err), "Caught fault : already on");
    }

    #[test]
    fn test_describe_timeout_and_plain_errors() {
        let err = anyhow::Error::new(TaskError::Timeout(Duration::from_secs(5)));
        assert!(describe_error(&err).starts_with("Caught exception : "));

        let err = anyhow::anyhow!("VM specified was not found");
        assert_eq!(describe_error(&err), "VM specified was not found");
    }
}
