//! sensorgraph: compile and simulate sensor graph programs.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sensorgraph_rs::{
    compile_file, optimize, render, DataStreamSelector, DeviceModel, OutputFormat, SensorGraph,
    Simulator,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sensorgraph", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a program and print it in the chosen format
    Compile {
        file: PathBuf,
        #[arg(short, long, default_value = "nodes")]
        format: OutputFormat,
        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        disable_optimizer: bool,
        /// Device model TOML file
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Compile a program and run it in the simulator
    Sim {
        file: PathBuf,
        /// Stop condition such as "run_time 1 day"
        #[arg(short = 's', long = "stop")]
        stop: Vec<String>,
        /// Stimulus such as "10 minutes: input 1 = 5"
        #[arg(short = 'i', long = "stimulus")]
        stimulus: Vec<String>,
        /// Print readings pushed into streams matching this selector
        #[arg(short = 'w', long = "watch")]
        watch: Vec<String>,
        /// Save the trace as JSON
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        disable_optimizer: bool,
        #[arg(long)]
        model: Option<PathBuf>,
    },
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sensorgraph_rs=debug"));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            Ok(None)
        }
    }
}

fn load_model(path: Option<&Path>) -> anyhow::Result<DeviceModel> {
    match path {
        Some(path) => DeviceModel::load(path)
            .with_context(|| format!("loading device model {}", path.display())),
        None => Ok(DeviceModel::default()),
    }
}

fn build_graph(file: &Path, model: &DeviceModel, disable_optimizer: bool) -> anyhow::Result<SensorGraph> {
    let graph = compile_file(file, model).with_context(|| format!("compiling {}", file.display()))?;
    if disable_optimizer {
        return Ok(graph);
    }
    optimize(&graph).context("optimizing graph")
}

fn compile(
    file: &Path,
    format: OutputFormat,
    output: Option<&Path>,
    disable_optimizer: bool,
    model: Option<&Path>,
) -> anyhow::Result<()> {
    if format.is_binary() && output.is_none() {
        bail!("the {} format is binary and needs an output file (-o)", format);
    }

    let model = load_model(model)?;
    let program = sensorgraph_rs::parse_file(file)
        .with_context(|| format!("parsing {}", file.display()))?;
    let graph = sensorgraph_rs::parser::compile(&program, &model)
        .with_context(|| format!("compiling {}", file.display()))?;
    let graph = if disable_optimizer {
        graph
    } else {
        optimize(&graph).context("optimizing graph")?
    };

    let rendered = render(format, &program, &graph)?;
    match output {
        Some(path) => std::fs::write(path, &rendered)
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout().write_all(&rendered)?,
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    file: &Path,
    stop: &[String],
    stimulus: &[String],
    watch: &[String],
    trace: Option<&Path>,
    disable_optimizer: bool,
    model: Option<&Path>,
) -> anyhow::Result<()> {
    let model = load_model(model)?;
    let graph = build_graph(file, &model, disable_optimizer)?;

    let mut sim = Simulator::new(graph);
    for condition in stop {
        sim.stop_condition(condition)?;
    }
    if stop.is_empty() {
        sim.stop_condition("run_time 1 day")?;
    }
    for text in stimulus {
        sim.stimulus(text)?;
    }

    let selectors = watch
        .iter()
        .map(|text| text.parse::<DataStreamSelector>())
        .collect::<sensorgraph_rs::Result<Vec<_>>>()?;
    if !watch.is_empty() || trace.is_some() {
        sim.record_trace(&selectors);
    }

    sim.load_constants()?;
    sim.run()?;

    if let Some(recorded) = sim.take_trace() {
        if !watch.is_empty() {
            let mut stdout = std::io::stdout().lock();
            for reading in &recorded.readings {
                writeln!(stdout, "@{:>8}  {}  {}", reading.raw_time, reading.stream, reading.value)?;
            }
        }
        if let Some(path) = trace {
            recorded
                .save(path)
                .with_context(|| format!("saving trace {}", path.display()))?;
            tracing::info!("Saved {} readings to {}", recorded.len(), path.display());
        }
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Compile {
            file,
            format,
            output,
            disable_optimizer,
            model,
        } => compile(&file, format, output.as_deref(), disable_optimizer, model.as_deref()),
        Command::Sim {
            file,
            stop,
            stimulus,
            watch,
            trace,
            disable_optimizer,
            model,
        } => simulate(
            &file,
            &stop,
            &stimulus,
            &watch,
            trace.as_deref(),
            disable_optimizer,
            model.as_deref(),
        ),
    }
}

fn main() {
    let cli = Cli::parse();
    let _guard = match init_logging(cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("sensorgraph: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("sensorgraph: {:#}", e);
        std::process::exit(1);
    }
}
