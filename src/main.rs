use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use cemflow::{
    calculators::{self, Phases},
    config::{PipelineConfig, RunsOn},
    datatypes::{BeamGeometry, BeamSetup},
    forward::{stress_at, ThreePointBending},
    lab::{Credentials, OntodockerClient, Triplestore},
    mesher,
    post_processor::{self, GaussianKde, DEFAULT_GRID_CUT, DEFAULT_GRID_POINTS},
    propagation::{perform_prediction, PropagationMode},
    units::{UnitRegistry, Value},
    workflow::{
        emodul::{self, WorkflowMode},
        Runner, TaskGraph,
    },
};

/// cemflow - forward models and data pipeline for concrete experiments
#[derive(Parser)]
#[command(name = "cemflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propagate posterior samples of Young's modulus through the beam model
    Predict {
        /// File with one Young's modulus sample (kN/mm^2) per line
        parameters: PathBuf,

        /// Poisson ratio held fixed for every sample
        #[arg(long, default_value_t = 0.2)]
        known_input: f64,

        #[arg(long, value_enum, default_value_t = Mode::Cheap)]
        mode: Mode,

        /// Samples to evaluate in full mode (default: all)
        #[arg(long)]
        samples: Option<usize>,

        /// Beam input json (default: built-in beam)
        #[arg(long)]
        beam: Option<PathBuf>,

        /// Directory for samples.csv, kde.csv and summary.json
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },

    /// Solve the beam once and write the nodal and element fields
    Solve {
        /// Beam input json (default: built-in beam)
        #[arg(long)]
        beam: Option<PathBuf>,

        /// Young's modulus in kN/mm^2
        #[arg(long, default_value_t = 30.0)]
        youngs_modulus: f64,

        #[arg(long, default_value_t = 0.2)]
        poisson_ratio: f64,

        #[arg(long, default_value = ".")]
        output: PathBuf,
    },

    /// Derived quantities of cement pastes
    Calc {
        #[command(subcommand)]
        calculation: Calculation,
    },

    /// The Young's modulus data pipeline
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,

        /// Directory holding Data/E-modul
        #[arg(long, global = true, default_value = ".")]
        root: PathBuf,

        /// Pipeline config json
        #[arg(long, global = true)]
        config: Option<PathBuf>,

        /// Overrides the configured mode
        #[arg(long, global = true, value_enum)]
        mode: Option<Mode>,

        /// Overrides where the pipeline runs
        #[arg(long, global = true, value_enum)]
        runs_on: Option<Host>,

        #[arg(long, global = true, env = "OPENBIS_USERNAME")]
        openbis_username: Option<String>,

        #[arg(long, global = true, env = "OPENBIS_PASSWORD", hide_env_values = true)]
        openbis_password: Option<String>,
    },

    /// Manage knowledge graph datasets on an ontodocker instance
    Ontodocker {
        #[command(subcommand)]
        action: OntodockerAction,

        #[arg(long, global = true, default_value = "https://ontodocker-pmd.bam.de")]
        url: String,

        #[arg(long, global = true, env = "ONTODOCKER_TOKEN", hide_env_values = true)]
        token: Option<String>,

        #[arg(long, global = true, value_enum, default_value_t = Store::Jena)]
        triplestore: Store,
    },
}

#[derive(Subcommand)]
enum Calculation {
    /// Volume fraction of a cement substitute
    VolumeFraction {
        /// Mass fraction of the substitute in the binder
        #[arg(long)]
        mass_fraction: f64,

        #[arg(long, default_value = "2900 kg/m^3")]
        density_sub: String,

        #[arg(long, default_value = "3150 kg/m^3")]
        density_cem: String,
    },

    /// Specific heat capacity of a paste
    HeatCapacity {
        /// Volume fractions of cement, substitute and water
        #[arg(long, num_args = 3, value_delimiter = ',')]
        fractions: Vec<f64>,

        /// Heat capacities of cement, substitute and water, e.g. "750 J/kg/K"
        #[arg(long, num_args = 3, value_delimiter = ',')]
        capacities: Vec<String>,
    },

    /// Hydration kinetics parameters for a slag content
    Hydration {
        #[arg(long)]
        slag_ratio: f64,

        /// Degree of hydration at which to evaluate the heat release rate
        #[arg(long)]
        alpha: Option<f64>,

        #[arg(long, default_value_t = 0.85)]
        alpha_max: f64,

        #[arg(long, default_value = "20 degC")]
        temperature: String,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Run all out of date tasks
    Run,
    /// Remove every task target
    Clean,
    /// List the tasks in execution order
    List,
}

#[derive(Subcommand)]
enum OntodockerAction {
    List,
    Create { dataset: String },
    Delete { dataset: String },
    Upload { dataset: String, files: Vec<PathBuf> },
    Query { dataset: String, sparql: String },
    Update { dataset: String, sparql: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Cheap,
    Full,
}

#[derive(Clone, Copy, ValueEnum)]
enum Host {
    Actions,
    Local,
}

#[derive(Clone, Copy, ValueEnum)]
enum Store {
    Jena,
    Blazegraph,
}

impl From<Store> for Triplestore {
    fn from(store: Store) -> Triplestore {
        match store {
            Store::Jena => Triplestore::Jena,
            Store::Blazegraph => Triplestore::Blazegraph,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Predict {
            parameters,
            known_input,
            mode,
            samples,
            beam,
            output,
        } => predict(&parameters, known_input, mode, samples, beam.as_deref(), &output),
        Commands::Solve {
            beam,
            youngs_modulus,
            poisson_ratio,
            output,
        } => solve(beam.as_deref(), youngs_modulus, poisson_ratio, &output),
        Commands::Calc { calculation } => calc(calculation),
        Commands::Workflow {
            action,
            root,
            config,
            mode,
            runs_on,
            openbis_username,
            openbis_password,
        } => {
            let mut pipeline_config = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(mode) = mode {
                pipeline_config.mode = match mode {
                    Mode::Cheap => WorkflowMode::Cheap,
                    Mode::Full => WorkflowMode::Full,
                };
            }
            if let Some(host) = runs_on {
                pipeline_config.openbis.runs_on = match host {
                    Host::Actions => RunsOn::Actions,
                    Host::Local => RunsOn::Local,
                };
            }
            let credentials = match (openbis_username, openbis_password) {
                (Some(username), Some(password)) => Some(Credentials { username, password }),
                _ => None,
            };
            workflow(action, &root, &pipeline_config, credentials)
        }
        Commands::Ontodocker {
            action,
            url,
            token,
            triplestore,
        } => {
            let token = token.context("an ontodocker token is required (--token or ONTODOCKER_TOKEN)")?;
            ontodocker(action, &url, token, triplestore.into())
        }
    }
}

fn beam_setup(beam: Option<&Path>) -> Result<BeamSetup> {
    match beam {
        Some(path) => mesher::load_beam_setup(path)
            .with_context(|| format!("failed to load beam input {}", path.display())),
        None => {
            let geometry = BeamGeometry::default();
            Ok(BeamSetup {
                geometry,
                boundary_rules: mesher::three_point_bending_rules(&geometry),
            })
        }
    }
}

fn read_samples(path: &Path) -> Result<Vec<f64>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read parameter samples {}", path.display()))?;
    contents
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("invalid parameter sample '{token}'"))
        })
        .collect()
}

fn predict(
    parameters: &Path,
    known_input: f64,
    mode: Mode,
    samples: Option<usize>,
    beam: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let parameter = read_samples(parameters)?;
    let propagation_mode = match mode {
        Mode::Cheap => PropagationMode::Cheap,
        Mode::Full => PropagationMode::Full(samples.unwrap_or(parameter.len())),
    };

    let solver = ThreePointBending::new(UnitRegistry::new(), beam_setup(beam)?)?;
    let prediction = perform_prediction(solver, parameter, known_input, propagation_mode)?;
    println!(
        "posterior predictive stress: mean = {:.4} N/mm^2, sd = {:.4} N/mm^2 ({} samples)",
        prediction.summary.mean, prediction.summary.std_dev, prediction.summary.count
    );

    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    post_processor::samples_csv_output(&prediction.samples, &output.join("samples.csv"))?;
    match GaussianKde::new(&prediction.samples) {
        Ok(kde) => {
            let grid = kde.grid(DEFAULT_GRID_POINTS, DEFAULT_GRID_CUT)?;
            post_processor::kde_csv_output(&grid, &output.join("kde.csv"))?;
        }
        Err(err) => warn!("no density estimate: {err}"),
    }

    let summary_path = output.join("summary.json");
    std::fs::write(&summary_path, serde_json::to_string_pretty(&prediction)?)
        .with_context(|| format!("failed to write {}", summary_path.display()))?;

    Ok(())
}

fn solve(beam: Option<&Path>, youngs_modulus: f64, poisson_ratio: f64, output: &Path) -> Result<()> {
    let model = ThreePointBending::new(UnitRegistry::new(), beam_setup(beam)?)?;
    let (nodes, elements) = model.solve_fields(youngs_modulus, poisson_ratio)?;

    let geometry = model.setup().geometry;
    let sensor = cemflow::datatypes::Vertex {
        x: 0.5 * geometry.length,
        y: 0.0,
    };
    println!(
        "bottom midspan stress: {:.4} N/mm^2",
        stress_at(&nodes, &elements, &sensor)?
    );

    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    post_processor::csv_output(
        &elements,
        &nodes,
        &output.join("nodes.csv"),
        &output.join("elements.csv"),
    )?;
    Ok(())
}

fn calc(calculation: Calculation) -> Result<()> {
    let ureg = UnitRegistry::new();

    match calculation {
        Calculation::VolumeFraction {
            mass_fraction,
            density_sub,
            density_cem,
        } => {
            let density_sub = ureg.parse_quantity(&density_sub)?;
            let density_cem = ureg.parse_quantity(&density_cem)?;
            match calculators::substitute_volume_fraction(&ureg, mass_fraction, &density_sub, &density_cem)? {
                Value::Plain(value) => println!("volume fraction: {value}"),
                Value::Quantity(quantity) => println!("volume fraction: {}", quantity.si_value()),
            }
        }
        Calculation::HeatCapacity {
            fractions,
            capacities,
        } => {
            let [cement, substitute, water] = fractions[..] else {
                bail!("expected three volume fractions");
            };
            let capacities = capacities
                .iter()
                .map(|c| ureg.parse_quantity(c))
                .collect::<cemflow::Result<Vec<_>>>()?;
            let [cap_cement, cap_substitute, cap_water] = capacities[..] else {
                bail!("expected three heat capacities");
            };

            let fractions = Phases::new(
                ureg.quantity(cement, "")?,
                ureg.quantity(substitute, "")?,
                ureg.quantity(water, "")?,
            );
            let capacities = Phases::new(cap_cement, cap_substitute, cap_water);
            let heat_capacity = calculators::paste_specific_heat_capacity(&ureg, &fractions, &capacities)?;
            println!(
                "paste specific heat capacity: {} J/kg/K",
                ureg.magnitude_in(&heat_capacity, "J/kg/K")?
            );
        }
        Calculation::Hydration {
            slag_ratio,
            alpha,
            alpha_max,
            temperature,
        } => {
            let params = calculators::hydration_parameters(&ureg, &ureg.quantity(slag_ratio, "")?)?;
            println!("B1 = {} 1/s", ureg.magnitude_in(&params.b1, "1/s")?);
            println!("B2 = {}", params.b2.si_value());
            println!("eta = {}", params.eta.si_value());
            println!("E_act = {} J/mol", ureg.magnitude_in(&params.e_act, "J/mol")?);
            println!("Q_pot = {} J/kg", ureg.magnitude_in(&params.q_pot, "J/kg")?);
            println!("T_ref = {} degC", ureg.magnitude_in(&params.t_ref, "degC")?);

            if let Some(alpha) = alpha {
                let temperature = ureg.parse_quantity(&temperature)?;
                let rate = params.heat_release_rate(&ureg, alpha, alpha_max, &temperature)?;
                println!("heat release rate = {} W/kg", ureg.magnitude_in(&rate, "W/kg")?);
            }
        }
    }
    Ok(())
}

fn workflow(
    action: WorkflowAction,
    root: &Path,
    config: &PipelineConfig,
    credentials: Option<Credentials>,
) -> Result<()> {
    if config.openbis.runs_on == RunsOn::Local && credentials.is_none() {
        warn!("no openBIS credentials given, uploads will fail");
    }
    let tasks = emodul::tasks(config, root, credentials)?;
    let runner = Runner::new(TaskGraph::new(tasks)?);

    match action {
        WorkflowAction::Run => {
            let report = runner.run()?;
            info!(
                "{} tasks executed, {} up to date",
                report.executed.len(),
                report.up_to_date.len()
            );
        }
        WorkflowAction::Clean => {
            runner.clean()?;
        }
        WorkflowAction::List => {
            for task in runner.graph().ordered() {
                println!("{}", task.name);
            }
        }
    }
    Ok(())
}

fn ontodocker(action: OntodockerAction, url: &str, token: String, triplestore: Triplestore) -> Result<()> {
    let client = OntodockerClient::new(url, token)?;

    let response = match action {
        OntodockerAction::List => client.list_datasets()?,
        OntodockerAction::Create { dataset } => client.create_dataset(triplestore, &dataset)?,
        OntodockerAction::Delete { dataset } => client.delete_dataset(triplestore, &dataset)?,
        OntodockerAction::Upload { dataset, files } => {
            let mut responses = Vec::with_capacity(files.len());
            for file in &files {
                responses.push(client.upload_turtle(triplestore, &dataset, file)?);
            }
            responses.join("\n")
        }
        OntodockerAction::Query { dataset, sparql } => client.query(triplestore, &dataset, &sparql)?,
        OntodockerAction::Update { dataset, sparql } => client.update(triplestore, &dataset, &sparql)?,
    };
    println!("{response}");
    Ok(())
}
