use anyhow::Context;
use clap::builder::PossibleValuesParser;
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use pyci_kernel::config::{load_task_file, RunnerSettings};
use pyci_kernel::construction::TaskBuilder;
use pyci_kernel::executor::Executor;
use pyci_kernel::logging::{self, LogFormat, LogSettings};
use pyci_kernel::presets::Preset;
use pyci_kernel::report::JUnitReport;
use pyci_kernel::ValidatedTask;
use std::path::PathBuf;

/// Exit code for usage, configuration and runner faults
const EXIT_RUNNER_ERROR: i32 = 2;

fn task_source_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("preset")
            .long("preset")
            .value_parser(PossibleValuesParser::new(Preset::ALL.map(Preset::name)))
            .help("Built-in task to run"),
    )
    .arg(
        Arg::new("file")
            .long("file")
            .short('f')
            .value_parser(value_parser!(PathBuf))
            .help("Task file (.toml, .yaml, .yml)"),
    )
    .group(
        ArgGroup::new("source")
            .args(["preset", "file"])
            .required(true),
    )
    .arg(
        Arg::new("workspace")
            .long("workspace")
            .value_parser(value_parser!(PathBuf))
            .help("CI workspace directory (overrides $WORKSPACE)"),
    )
    .arg(
        Arg::new("venv")
            .long("venv")
            .value_parser(value_parser!(PathBuf))
            .conflicts_with("file")
            .help("Virtual environment directory for presets (overrides $PYCI_VENV)"),
    )
    .arg(
        Arg::new("python")
            .long("python")
            .conflicts_with("file")
            .help("Interpreter used to create a preset's venv (overrides $PYCI_PYTHON)"),
    )
}

fn cli() -> Command {
    Command::new("pyci")
        .version(pyci_kernel::VERSION)
        .about("Provision a venv, install poetry/tox and run tox for CI")
        .subcommand_required(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .value_parser(["text", "json"])
                .default_value("text")
                .help("Log output format"),
        )
        .arg(
            Arg::new("log-filter")
                .long("log-filter")
                .global(true)
                .help("Log filter directive (overrides $PYCI_LOG / $RUST_LOG)"),
        )
        .subcommand(
            task_source_args(Command::new("run").about("Run a task"))
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Print the plan without running anything"),
                )
                .arg(
                    Arg::new("junit-report")
                        .long("junit-report")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write a JUnit report with one test case per step"),
                )
                .arg(
                    Arg::new("summary")
                        .long("summary")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the execution summary as JSON"),
                ),
        )
        .subcommand(
            task_source_args(Command::new("plan").about("Show the validated steps of a task")).arg(
                Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)
                    .help("Output as JSON"),
            ),
        )
        .subcommand(Command::new("presets").about("List built-in tasks"))
}

fn settings_from(args: &ArgMatches) -> RunnerSettings {
    let mut settings = RunnerSettings::from_env();
    if let Some(ws) = args.get_one::<PathBuf>("workspace") {
        settings.workspace = Some(ws.clone());
    }
    if let Some(venv) = args.get_one::<PathBuf>("venv") {
        settings.venv = venv.clone();
    }
    if let Some(python) = args.get_one::<String>("python") {
        settings.python = python.clone();
    }
    settings
}

fn load_task(args: &ArgMatches, settings: &RunnerSettings) -> anyhow::Result<ValidatedTask> {
    let spec = if let Some(name) = args.get_one::<String>("preset") {
        name.parse::<Preset>()?.task_spec(settings)?
    } else {
        let path = args
            .get_one::<PathBuf>("file")
            .context("either --preset or --file is required")?;
        load_task_file(path, &|key| settings.lookup(key))
            .with_context(|| format!("loading task file {}", path.display()))?
    };

    Ok(TaskBuilder::from_spec(spec).validate()?)
}

async fn run(matches: ArgMatches) -> anyhow::Result<i32> {
    let env_settings = RunnerSettings::from_env();
    let log_format: LogFormat = matches
        .get_one::<String>("log-format")
        .map_or(Ok(LogFormat::Text), |f| f.parse())?;
    let log_filter = matches
        .get_one::<String>("log-filter")
        .cloned()
        .or(env_settings.log_filter);
    logging::init(&LogSettings {
        format: log_format,
        filter: log_filter,
    })?;

    match matches.subcommand() {
        Some(("run", args)) => {
            let settings = settings_from(args);
            let task = load_task(args, &settings)?;

            if args.get_flag("dry-run") {
                print!("{}", task.describe());
                return Ok(0);
            }

            let summary = Executor::new().run(task).await?;

            if let Some(path) = args.get_one::<PathBuf>("junit-report") {
                JUnitReport::from_summary(&summary).write_to(path)?;
            }
            if let Some(path) = args.get_one::<PathBuf>("summary") {
                let json = serde_json::to_string_pretty(&summary)?;
                std::fs::write(path, json)
                    .with_context(|| format!("writing summary {}", path.display()))?;
            }

            Ok(summary.exit_code)
        }
        Some(("plan", args)) => {
            let settings = settings_from(args);
            let task = load_task(args, &settings)?;

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print!("{}", task.describe());
            }
            Ok(0)
        }
        Some(("presets", _)) => {
            for preset in Preset::ALL {
                println!("{}\t{}", preset.name(), preset.description());
            }
            Ok(0)
        }
        _ => Ok(0),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let code = match run(matches).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pyci: error: {e:#}");
            EXIT_RUNNER_ERROR
        }
    };

    std::process::exit(code);
}
