use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use dnsacme::{
    account,
    config::Config,
    csr::CsrRequest,
    directory::Directory,
    dns_update::{Provisioner, TsigUpdate},
    key_pair::AccountKey,
    order::CertificateFlow,
    resolver::RecursiveLookup,
    session::{self, Session},
};

/// Tiny ACME client: obtains a TLS certificate chain by answering
/// DNS-01 challenges through TSIG-signed dynamic updates.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration file
    config: PathBuf,

    /// CSR file to use instead of the one named in the configuration
    #[arg(long)]
    csr: Option<PathBuf>,

    /// Show only errors on stderr
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,

    /// Show debug information on stderr
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(chain) => {
            // 憑證鏈走 stdout，日誌走 stderr
            print!("{chain}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let mut config = Config::load(&cli.config).context("loading configuration")?;
    if let Some(csr_path) = &cli.csr {
        config.acme.csr_file = csr_path.clone();
    }

    let account_key = AccountKey::from_pem_file(&config.acme.account_key_file)
        .context("loading the account key")?;
    let csr =
        CsrRequest::from_file(&config.acme.csr_file).context("loading the certificate request")?;
    csr.ensure_distinct_key(&account_key)?;

    let client = session::http_client(&config.acme.language, config.http_timeout())?;
    let directory = Directory::fetch(&client, &config.acme.directory_url)
        .context("fetching the ACME directory")?;
    let mut session = Session::new(client, directory, account_key)?;
    account::register(&mut session, &config.acme.contacts)?;

    let lookup = RecursiveLookup::new(&config.dns.nameservers, config.dns_timeout())?;
    let transport = TsigUpdate::new(
        &config.tsig.key_name,
        &config.tsig.key_value,
        &config.tsig.algorithm,
        config.dns_timeout(),
    )?;
    let provisioner = Provisioner::new(&lookup, &transport, config.dns.update_port);

    let mut flow = CertificateFlow::new(
        &mut session,
        &csr,
        &lookup,
        provisioner,
        config.dns.ttl_secs,
        config.dns.self_check_attempts,
        &config.acme.certificate_format,
    );
    Ok(flow.run()?)
}
