//! dbexchange CLI - hierarchical data exchange between PostgreSQL installations.

mod archive;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dbexchange::{
    generate_create_script, BinaryStore, Config, ExchangeError, Exporter, Importer, Model,
    PgGateway, Record, StructureCatalog,
};
use indexmap::IndexMap;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "dbexchange")]
#[command(about = "Hierarchical data exchange between PostgreSQL installations")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Override the mapping description file
    #[arg(long)]
    description: Option<String>,

    /// Override the structure cache file
    #[arg(long)]
    structure: Option<String>,

    /// Override the data file
    #[arg(long)]
    data: Option<String>,

    /// Override the binary payload folder
    #[arg(long)]
    binary_folder: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the modeled data into the exchange files
    Export {
        /// Key filter file restricting the first primary table
        #[arg(long)]
        keys: Option<PathBuf>,

        /// Pack the exchange files into one zip archive
        #[arg(long)]
        zip: bool,
    },

    /// Import the exchange files into the database
    Import {
        /// Read the exchange files from the zip archive
        #[arg(long)]
        zip: bool,
    },

    /// Introspect the database and write the structure cache file
    Structure,

    /// Generate the table-creation SQL script from the structure cache
    Create,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn run() -> dbexchange::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity);

    let mut config = Config::load(&cli.config)?;
    if let Some(description) = cli.description {
        config.files.description = description;
    }
    if let Some(structure) = cli.structure {
        config.files.structure = structure;
    }
    if let Some(data) = cli.data {
        config.files.data = data;
    }
    if let Some(binary_folder) = cli.binary_folder {
        config.files.binary_folder = binary_folder;
    }
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Export { keys, zip } => run_export(&config, keys.as_deref(), zip),
        Commands::Import { zip } => run_import(&config, zip),
        Commands::Structure => run_structure(&config),
        Commands::Create => run_create(&config),
    }
}

fn run_export(config: &Config, keys_override: Option<&Path>, pack: bool) -> dbexchange::Result<()> {
    let mut gateway = PgGateway::connect(&config.database)?;
    let model = load_model(Path::new(&config.files.description))?;
    let catalog = load_or_build_structure(&mut gateway, &model, Path::new(&config.files.structure))?;

    let keys_path = keys_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.files.keys));
    let key_filter = load_key_filter(&keys_path)?;

    let store = BinaryStore::new(&config.files.binary_folder);
    let data = Exporter::new(&model, &catalog, store).export_all(&mut gateway, &key_filter)?;
    fs::write(&config.files.data, serde_json::to_string_pretty(&data)?)?;

    for (alias, rows) in &data {
        println!("  {}: {} rows", alias, rows.len());
    }
    println!("Export written to {}", config.files.data);

    if pack {
        archive::pack(
            Path::new(&config.files.zip),
            &[
                Path::new(&config.files.description),
                Path::new(&config.files.structure),
                Path::new(&config.files.data),
            ],
            Path::new(&config.files.binary_folder),
        )?;
        println!("Archive written to {}", config.files.zip);
    }
    Ok(())
}

fn run_import(config: &Config, from_zip: bool) -> dbexchange::Result<()> {
    let mut gateway = PgGateway::connect(&config.database)?;

    // The extraction directory must outlive the whole import.
    let mut _workdir = None;
    let (description_path, structure_path, data_path, binary_folder) = if from_zip {
        let dir = tempfile::tempdir()?;
        archive::unpack(Path::new(&config.files.zip), dir.path())?;
        let base = dir.path().to_path_buf();
        _workdir = Some(dir);
        (
            base.join(&config.files.description),
            base.join(&config.files.structure),
            base.join(&config.files.data),
            base.join("binary"),
        )
    } else {
        (
            PathBuf::from(&config.files.description),
            PathBuf::from(&config.files.structure),
            PathBuf::from(&config.files.data),
            PathBuf::from(&config.files.binary_folder),
        )
    };

    let model = load_model(&description_path)?;
    let catalog = if structure_path.is_file() {
        StructureCatalog::load(&fs::read_to_string(&structure_path)?)?
    } else {
        StructureCatalog::build(&mut gateway, &model)?
    };

    let content = fs::read_to_string(&data_path).map_err(|source| {
        ExchangeError::Config(format!(
            "unable to read the data file {}: {}",
            data_path.display(),
            source
        ))
    })?;
    let data: IndexMap<String, Vec<Record>> = serde_json::from_str(&content)?;

    let store = BinaryStore::new(binary_folder);
    Importer::new(&model, &catalog, store).import_all(&mut gateway, &data)?;

    for (alias, rows) in &data {
        println!("  {}: {} rows processed", alias, rows.len());
    }
    println!("Import committed");
    Ok(())
}

fn run_structure(config: &Config) -> dbexchange::Result<()> {
    let mut gateway = PgGateway::connect(&config.database)?;
    let model = load_model(Path::new(&config.files.description))?;
    let catalog = StructureCatalog::build(&mut gateway, &model)?;
    fs::write(&config.files.structure, catalog.to_json()?)?;
    println!(
        "Structure of {} tables written to {}",
        catalog.len(),
        config.files.structure
    );
    Ok(())
}

fn run_create(config: &Config) -> dbexchange::Result<()> {
    let structure_path = Path::new(&config.files.structure);
    if !structure_path.is_file() {
        return Err(ExchangeError::Config(format!(
            "the structure file {} does not exist; run the structure action on the source side first",
            structure_path.display()
        )));
    }
    let catalog = StructureCatalog::load(&fs::read_to_string(structure_path)?)?;
    let script = generate_create_script(&catalog)?;
    fs::write(&config.files.sql, script)?;
    println!("Creation script written to {}", config.files.sql);
    Ok(())
}

fn load_model(path: &Path) -> dbexchange::Result<Model> {
    let content = fs::read_to_string(path).map_err(|source| {
        ExchangeError::Config(format!(
            "unable to read the description file {}: {}",
            path.display(),
            source
        ))
    })?;
    Model::load(&content)
}

/// Load the structure cache, introspecting and writing it when absent so the
/// first export of a fresh installation just works.
fn load_or_build_structure(
    gateway: &mut PgGateway,
    model: &Model,
    path: &Path,
) -> dbexchange::Result<StructureCatalog> {
    if path.is_file() {
        return StructureCatalog::load(&fs::read_to_string(path)?);
    }
    info!("structure file {:?} not found, introspecting", path);
    let catalog = StructureCatalog::build(gateway, model)?;
    fs::write(path, catalog.to_json()?)?;
    Ok(catalog)
}

/// An absent key file simply means no filter.
fn load_key_filter(path: &Path) -> dbexchange::Result<Vec<i64>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn setup_logging(verbosity: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
