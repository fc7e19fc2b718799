use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, builder::PossibleValuesParser};
use log::info;
use vos_cert_engine::{
    CertificateInspector, EngineConfig, RemoteShellAutomaton, ShellCommand, SshTarget,
    shell::{DEFAULT_SSH_PORT, vos},
};

#[derive(Parser)]
#[command(name = "vos-cert-engine")]
#[command(about = "Certificate lifecycle tooling for Cisco VOS appliances", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Remote {
    /// Appliance hostname or address
    host: String,

    /// Administrative CLI user
    user: String,

    #[arg(long, default_value_t = DEFAULT_SSH_PORT)]
    port: u16,

    #[arg(long, env = "VOS_CERT_SSH_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the certificate currently served by a host
    Inspect { host: String },

    /// Check that the administrative CLI answers with its prompt
    Probe(Remote),

    /// Restart a service (Cisco Tomcat by default)
    Restart {
        #[command(flatten)]
        remote: Remote,

        #[arg(long, default_value = vos::TOMCAT_SERVICE)]
        service: String,
    },

    /// Show the appliance's own certificate for a unit
    ShowCert {
        #[command(flatten)]
        remote: Remote,

        #[arg(long, default_value = "tomcat", value_parser = PossibleValuesParser::new(vos::CERT_UNITS.iter().copied()))]
        unit: String,
    },
}

impl Remote {
    fn target(&self) -> SshTarget {
        SshTarget::new(&self.host, &self.user, &self.password).with_port(self.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    info!("[config] environment {:?}, accounts root {}", config.environment, config.accounts_root.display());

    match cli.command {
        Commands::Inspect { host } => {
            let inspector = CertificateInspector::new(&config);
            match inspector.inspect(&host).await {
                Some(inspection) => println!("{}", serde_json::to_string_pretty(&inspection)?),
                None => println!("not found"),
            }
        }
        Commands::Probe(remote) => {
            run_remote(&remote, vos::test_connection()).await?;
        }
        Commands::Restart { remote, service } => {
            run_remote(&remote, vos::restart_service(&service)).await?;
        }
        Commands::ShowCert { remote, unit } => {
            run_remote(&remote, vos::show_cert_own(&unit)).await?;
        }
    }
    Ok(())
}

async fn run_remote(remote: &Remote, command: ShellCommand) -> Result<()> {
    let automaton = RemoteShellAutomaton::new();
    let mut echo = |chunk: &str| print!("{chunk}");
    let outcome = automaton.run(&remote.target(), &command, Some(&mut echo)).await;
    println!();
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "status": outcome.status,
        "final_state": outcome.final_state,
        "elapsed_ms": outcome.elapsed.as_millis() as u64,
    }))?);
    if !outcome.is_success() {
        anyhow::bail!("{:?} did not succeed on {}", command.kind, remote.host);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_cert_accepts_only_catalog_units() {
        let cli = Cli::try_parse_from([
            "vos-cert-engine", "show-cert", "cucm.example.com", "administrator", "--password", "secret",
            "--unit", "ipsec",
        ])
        .expect("known unit parses");
        assert!(matches!(cli.command, Commands::ShowCert { ref unit, .. } if unit == "ipsec"));

        let rejected = Cli::try_parse_from([
            "vos-cert-engine", "show-cert", "cucm.example.com", "administrator", "--password", "secret",
            "--unit", "webserver",
        ]);
        assert!(rejected.is_err());
    }

    #[test]
    fn restart_defaults_to_tomcat() {
        let cli = Cli::try_parse_from([
            "vos-cert-engine", "restart", "cucm.example.com", "administrator", "--password", "secret",
        ])
        .expect("restart parses");
        assert!(matches!(cli.command, Commands::Restart { ref service, .. } if service == vos::TOMCAT_SERVICE));
    }
}
