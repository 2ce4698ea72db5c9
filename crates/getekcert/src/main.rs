// SPDX-License-Identifier: MIT OR Apache-2.0

//! getekcert: create an endorsement key and retrieve its certificate

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ekcert::{provision_or_fetch, CertificateFetcher, DeviceNode, EkError, ProvisionConfig};

#[derive(Parser, Debug)]
#[command(name = "getekcert")]
#[command(about = "Create a TPM endorsement key and fetch its manufacturer certificate", version)]
struct Cli {
    /// Endorsement hierarchy authorization
    #[arg(short = 'P', long = "eh-auth", env = "GETEKCERT_EH_AUTH")]
    endorsement_auth: Option<String>,

    /// Owner hierarchy authorization
    #[arg(short = 'w', long = "owner-auth", env = "GETEKCERT_OWNER_AUTH")]
    owner_auth: Option<String>,

    /// Authorization value for the created EK
    #[arg(short = 'p', long = "ek-auth")]
    ek_auth: Option<String>,

    /// Persistent handle for the EK, or `-` for the first vacant one
    #[arg(short = 'H', long = "persistent-handle", allow_hyphen_values = true)]
    persistent_handle: Option<String>,

    /// EK algorithm: rsa, ecc, keyedhash or symcipher
    #[arg(short = 'G', long = "key-algorithm")]
    key_algorithm: Option<String>,

    /// Save the EK public area to this file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Do not persist the EK
    #[arg(short = 'N', long)]
    non_persistent: bool,

    /// Fingerprint a previously saved public area instead of creating an EK
    #[arg(short = 'O', long)]
    offline: Option<PathBuf>,

    /// Write the certificate to this file instead of stdout
    #[arg(short = 'E', long = "ec-cert")]
    ec_cert: Option<PathBuf>,

    /// Do not verify the certificate server's TLS certificate
    #[arg(short = 'U', long)]
    untrusted: bool,

    /// Print the public key hash and log request details
    #[arg(short = 'v', long)]
    verbose: bool,

    /// TPM device node [default: /dev/tpmrm0]
    #[arg(long)]
    device: Option<String>,

    /// Read options from a JSON file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the EK certificate service
    server_url: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<ProvisionConfig, EkError> {
        let mut config = match &self.config {
            Some(path) => ProvisionConfig::from_json_file(path)?,
            None => ProvisionConfig::default(),
        };

        macro_rules! overlay {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(value) = self.$field {
                    config.$field = Some(value);
                })+
            };
        }
        overlay!(
            endorsement_auth,
            owner_auth,
            ek_auth,
            persistent_handle,
            output,
            offline,
            ec_cert,
            server_url,
        );
        if let Some(algorithm) = self.key_algorithm {
            config.key_algorithm = algorithm;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        config.non_persistent |= self.non_persistent;
        config.untrusted |= self.untrusted;
        config.verbose |= self.verbose;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(config: ProvisionConfig) -> Result<()> {
    let plan = config.validate().map_err(EkError::from)?;
    debug!(fetch = ?plan.fetch, device = %plan.device, "validated options");

    let fetcher = CertificateFetcher::new(plan.fetch.server_url.clone(), plan.fetch.trust)
        .map_err(EkError::from)?;
    let mut device = DeviceNode::new(plan.device.clone());

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    let report = provision_or_fetch(&plan, &mut device, &fetcher, &mut stdout)
        .context("failed to retrieve EK certificate")?;
    debug!(len = report.certificate_len, "done");
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<EkError>().map_or(1, EkError::exit_code)
}

fn main() -> ExitCode {
    let result = Cli::parse()
        .into_config()
        .map_err(anyhow::Error::from)
        .and_then(|config| {
            init_logging(config.verbose);
            run(config)
        });

    let _ = io::stdout().flush();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let _ = io::stderr().flush();
            ExitCode::from(exit_code(&e))
        }
    }
}
