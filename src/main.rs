//! Binary entry point for the `testbed` CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::Level;

use testbed::config::{ConfigError, ScalewayConfig, TestbedConfig};
use testbed::driver::Driver;
use testbed::driver::docker::{self, DockerCli, DockerDriver};
use testbed::driver::scaleway::{self, ScalewayDriver, ScalewayHttpApi};
use testbed::executor::{AnsibleExecutor, ExecutorError, ExecutorSettings};
use testbed::image::ImageBuilder;
use testbed::instance::InstanceSpec;
use testbed::lifecycle::LifecycleOrchestrator;
use testbed::runner::ProcessCommandRunner;
use testbed::scenario::{Scenario, ScenarioError};
use testbed::state::{FileStateStore, StateError, StateStore};
use testbed::telemetry::init_tracing;

mod cli;

use cli::{Cli, Command};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("automation engine unavailable: {0}")]
    Executor(#[from] ExecutorError),
    #[error("unknown driver '{name}' (expected one of: {expected})")]
    UnknownDriver { name: String, expected: String },
    #[error("driver setup failed: {0}")]
    DriverSetup(String),
    #[error("cannot use working directory: {0}")]
    WorkDir(String),
    #[error("{0}")]
    Lifecycle(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

const KNOWN_DRIVERS: [&str; 2] = [docker::DRIVER_NAME, scaleway::DRIVER_NAME];

#[tokio::main]
async fn main() {
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

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = TestbedConfig::load_without_cli_args()?;
    config.validate()?;
    init_tracing(config.log_json, Level::INFO);

    let scenario_path = Utf8PathBuf::from(cli.scenario.as_deref().unwrap_or(&config.scenario_file));
    let scenario = Scenario::load(&scenario_path)?;
    let store = FileStateStore::new(&config.state_dir);
    let recorded = store.load()?.driver;
    let driver_name = select_driver(cli.driver.as_deref(), config.driver.as_deref(), recorded.as_deref())?;

    match driver_name.as_str() {
        docker::DRIVER_NAME => {
            let driver = docker_driver(&config, working_directory()?)?;
            execute(LifecycleOrchestrator::new(driver, store), scenario.instances, &cli.command).await
        }
        _ => {
            let driver = scaleway_driver()?;
            execute(LifecycleOrchestrator::new(driver, store), scenario.instances, &cli.command).await
        }
    }
}

/// Resolves the driver for this invocation: the CLI flag, then configuration,
/// then the driver recorded by the last `create`, then `docker`.
fn select_driver(
    flag: Option<&str>,
    configured: Option<&str>,
    recorded: Option<&str>,
) -> Result<String, CliError> {
    let name = flag
        .or(configured)
        .or(recorded)
        .unwrap_or(docker::DRIVER_NAME);
    if KNOWN_DRIVERS.contains(&name) {
        return Ok(name.to_owned());
    }
    Err(CliError::UnknownDriver {
        name: name.to_owned(),
        expected: KNOWN_DRIVERS.join(", "),
    })
}

fn working_directory() -> Result<Utf8PathBuf, CliError> {
    let cwd = env::current_dir().map_err(|err| CliError::WorkDir(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::WorkDir(format!("{} is not valid UTF-8", path.display())))
}

/// Image builder whose manifest and build context are `work_dir`.
fn image_builder(config: &TestbedConfig, work_dir: Utf8PathBuf) -> ImageBuilder {
    ImageBuilder::new(work_dir, config.build_image)
}

fn docker_driver(
    config: &TestbedConfig,
    work_dir: Utf8PathBuf,
) -> Result<DockerDriver<DockerCli<ProcessCommandRunner>, AnsibleExecutor<ProcessCommandRunner>>, CliError>
{
    let state_dir = Utf8PathBuf::from(&config.state_dir);
    let executor = AnsibleExecutor::new(
        ExecutorSettings {
            ansible_bin: config.ansible_bin.clone(),
            ansible_playbook_bin: config.ansible_playbook_bin.clone(),
            state_dir,
        },
        ProcessCommandRunner,
    )?;
    Ok(DockerDriver::new(
        DockerCli::new(config.docker_bin.clone(), ProcessCommandRunner),
        executor,
        image_builder(config, work_dir),
    ))
}

fn scaleway_driver() -> Result<ScalewayDriver<ScalewayHttpApi>, CliError> {
    let config = ScalewayConfig::load_without_cli_args()?;
    let api = ScalewayHttpApi::new(&config.secret_key);
    ScalewayDriver::new(api, config).map_err(|err| CliError::DriverSetup(err.to_string()))
}

async fn execute<D, S>(
    orchestrator: LifecycleOrchestrator<D, S>,
    instances: Vec<InstanceSpec>,
    command: &Command,
) -> Result<(), CliError>
where
    D: Driver,
    S: StateStore,
{
    let lifecycle_error = |err: testbed::lifecycle::LifecycleError<D::Error>| {
        CliError::Lifecycle(err.to_string())
    };
    let ctx = orchestrator.context(instances).map_err(lifecycle_error)?;
    let token = ctx.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let mut stdout = io::stdout();
    match command {
        Command::Create => orchestrator.up(&ctx).await.map_err(lifecycle_error)?,
        Command::Destroy => orchestrator.destroy(&ctx).await.map_err(lifecycle_error)?,
        Command::Status => {
            for status in orchestrator.status(&ctx).await.map_err(lifecycle_error)? {
                writeln!(
                    stdout,
                    "{}\t{}\t{}\t{}",
                    status.name,
                    status.provider,
                    status.state,
                    status.ports.join(",")
                )?;
            }
        }
        Command::List => {
            for record in orchestrator.instances(&ctx).await.map_err(lifecycle_error)? {
                writeln!(stdout, "{}\t{}", record.spec.name, record.created)?;
            }
        }
        Command::Login(login) => {
            let rendered = orchestrator
                .login(&ctx, &login.name)
                .map_err(lifecycle_error)?;
            writeln!(stdout, "{rendered}")?;
        }
        Command::Inventory => write!(stdout, "{}", orchestrator.inventory(&ctx))?,
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
