//! Binary entry point for the Machina CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use machina::billing::{PriceCatalog, user_cost};
use machina::stub::{DEFAULT_IMAGE_NAME, STUB_DRIVER_NAME};
use machina::{
    AnyDriver, Driver, DriverConfig, Image, InMemoryRegistry, JsonUsageHistory, Machine,
    MachineSpec, MachineStatus, StaticConfigSource,
};

mod cli;

use cli::{Cli, CreditCommand, ProvisionCommand};

/// Refresh attempts made while waiting for a new machine to run.
const MAX_REFRESH_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("driver error: {0}")]
    Driver(#[from] machina::DriverError),
    #[error("billing error: {0}")]
    Billing(String),
    #[error("machine {id} is still {status} after {attempts} refreshes")]
    NotRunning {
        id: String,
        status: MachineStatus,
        attempts: usize,
    },
    #[error("failed to render output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Provision(command) => provision(command).await,
        Cli::Credit(command) => credit(command).await,
    }
}

async fn provision(args: ProvisionCommand) -> Result<(), CliError> {
    let settings =
        DriverConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let source = StaticConfigSource::from_driver_config(&settings)
        .map_err(|err| CliError::Config(err.to_string()))?;
    let registry = InMemoryRegistry::new();
    registry.insert_image(Image::new(DEFAULT_IMAGE_NAME)).await;

    let driver = AnyDriver::from_config(&settings, Arc::new(registry.clone()), Arc::new(source))
        .map_err(|err| CliError::Config(err.to_string()))?;
    driver.initialize().await?;

    let image = registry
        .images()
        .await
        .into_iter()
        .find(|image| image.name == DEFAULT_IMAGE_NAME)
        .unwrap_or_else(|| Image::new(DEFAULT_IMAGE_NAME));
    let mut spec = MachineSpec::new(args.name);
    if let Some(flavor) = args.flavor {
        spec = spec.flavor(flavor);
    }

    let result = run_provision(&driver, &spec, &image, args.keep).await;
    if let AnyDriver::Stub(stub) = &driver {
        stub.shutdown().await;
    }
    result
}

async fn run_provision(
    driver: &AnyDriver,
    spec: &MachineSpec,
    image: &Image,
    keep: bool,
) -> Result<(), CliError> {
    let created = driver.create_machine(spec, image).await?;
    info!(machine_id = %created.id, driver = driver.name(), "waiting for machine to run");
    let machine = wait_until_running(driver, created).await?;

    let rendered =
        serde_json::to_string_pretty(&machine).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))?;

    if keep {
        warn!(machine_id = %machine.id, "keeping machine; it lives only as long as this process");
    } else {
        driver.destroy_machine(&machine).await?;
    }
    Ok(())
}

async fn wait_until_running(driver: &AnyDriver, mut machine: Machine) -> Result<Machine, CliError> {
    for _ in 0..MAX_REFRESH_ATTEMPTS {
        if machine.status == MachineStatus::Running {
            return Ok(machine);
        }
        machine = driver.refresh(machine).await?;
    }
    if machine.status == MachineStatus::Running {
        return Ok(machine);
    }
    Err(CliError::NotRunning {
        id: machine.id.to_string(),
        status: machine.status,
        attempts: MAX_REFRESH_ATTEMPTS,
    })
}

async fn credit(args: CreditCommand) -> Result<(), CliError> {
    let catalog = match args.catalog.as_deref() {
        Some(path) => PriceCatalog::from_offer_file(Utf8Path::new(path))
            .map_err(|err| CliError::Billing(err.to_string()))?,
        None => PriceCatalog::stub_default(),
    };
    let history = JsonUsageHistory::new(args.usage);
    let cost = user_cost(&history, STUB_DRIVER_NAME, &catalog)
        .await
        .map_err(|err| CliError::Billing(err.to_string()))?;
    writeln!(io::stdout(), "{cost}").map_err(|err| CliError::Output(err.to_string()))?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn provision_defaults_parse() {
        let cli = Cli::try_parse_from(["machina", "provision"]).expect("parse");
        let Cli::Provision(command) = cli else {
            panic!("expected provision");
        };
        assert_eq!(command.name, "machina");
        assert_eq!(command.flavor, None);
        assert!(!command.keep);
    }

    #[rstest]
    fn credit_requires_usage() {
        assert!(Cli::try_parse_from(["machina", "credit"]).is_err());
    }

    #[rstest]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::NotRunning {
            id: String::from("m-1"),
            status: MachineStatus::Booting,
            attempts: 3,
        };
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "machine m-1 is still booting after 3 refreshes\n");
    }
}
