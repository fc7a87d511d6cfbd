//! dbexchange - hierarchical data exchange between PostgreSQL installations
//!
//! Moves relational data between independent installations of the same
//! schema through portable files: a JSON data file holding nested record
//! trees plus one file per binary payload. The exchange is driven by a
//! declarative mapping description recording, per table, its relationships:
//! parent/child, one-to-one, many-to-many via a junction, and parameter
//! lookups matched by business key.
//!
//! # Architecture
//!
//! - **model**: the mapping description registry
//! - **structure**: introspected (or cached) table metadata
//! - **export**: recursive read-only walk producing record trees
//! - **import**: recursive transactional upsert of record trees
//! - **ddl**: table-creation script generation from the catalog
//! - **gateway**: blocking PostgreSQL access behind a trait
//! - **binary**: externalized binary payload files
//!
//! # Example
//!
//! ```no_run
//! use dbexchange::{BinaryStore, Exporter, Model, PgGateway, StructureCatalog};
//!
//! # fn main() -> dbexchange::Result<()> {
//! let config = dbexchange::Config::load(std::path::Path::new("config.yaml"))?;
//! let mut gateway = PgGateway::connect(&config.database)?;
//!
//! let description = std::fs::read_to_string(&config.files.description)?;
//! let model = Model::load(&description)?;
//! let catalog = StructureCatalog::build(&mut gateway, &model)?;
//!
//! let store = BinaryStore::new(&config.files.binary_folder);
//! let data = Exporter::new(&model, &catalog, store).export_all(&mut gateway, &[])?;
//! std::fs::write(&config.files.data, serde_json::to_string_pretty(&data)?)?;
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod config;
pub mod core;
pub mod ddl;
pub mod error;
pub mod export;
pub mod gateway;
pub mod import;
pub mod model;
pub mod structure;

pub use binary::BinaryStore;
pub use config::{Config, DatabaseConfig, FilesConfig};
pub use core::{Record, Value};
pub use ddl::generate_create_script;
pub use error::{ExchangeError, Result};
pub use export::Exporter;
pub use gateway::{Gateway, PgGateway, SqlRow};
pub use import::Importer;
pub use model::{Model, TableAlias, DESCRIPTION_VERSION};
pub use structure::{StructureCatalog, StructureEntry};
