//! Model registry: the declarative mapping description.
//!
//! The description is a JSON document with a version tag and one entry per
//! table alias, recording the table's relationships: parent/child, one-to-one,
//! many-to-many via a junction, and parameter lookups resolved by business
//! key. The registry is built once per run and never mutated afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

/// Description format version this build understands.
pub const DESCRIPTION_VERSION: &str = "2.0";

/// A dependent child alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildLink {
    /// Alias of the child table.
    pub alias: String,

    /// Strict children are fully owned: on import the child set replaces
    /// whatever previously existed for the parent.
    #[serde(default)]
    pub is_strict: bool,
}

/// A lookup-table reference resolved by business key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterLink {
    /// Alias of the parameter table.
    pub alias: String,

    /// Column on the referencing table holding the parameter's key.
    pub field_name: String,
}

/// The other side of a many-to-many junction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JunctionLink {
    /// Alias of the partner table.
    pub secondary_alias: String,

    /// Column on the junction holding the partner's key.
    pub secondary_parent_key: String,
}

/// One entry of the mapping description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableAlias {
    /// Logical name of this role; defaults to the table name.
    #[serde(default)]
    pub alias: String,

    /// Physical table name, optionally schema-qualified.
    pub table_name: String,

    /// Primary-key column. Local to one database, never portable.
    #[serde(default)]
    pub technical_key: String,

    /// Natural-identity column used to match rows across databases.
    #[serde(default)]
    pub business_key: String,

    /// Foreign-key column pointing at the parent row; empty means this is a
    /// primary (root) table.
    #[serde(default)]
    pub parent_key: String,

    /// Reference data only: exported/imported solely by explicit key list.
    #[serde(default)]
    pub is_empty: bool,

    /// Shares the parent's technical key.
    #[serde(default)]
    pub is_one_to_one: bool,

    /// Junction table between the parent and the partner in `junction`.
    #[serde(default)]
    pub is_many_to_many: bool,

    /// Partner side of a many-to-many junction.
    #[serde(default)]
    pub junction: Option<JunctionLink>,

    /// Dependent child aliases.
    #[serde(default)]
    pub children: Vec<ChildLink>,

    /// Parameter lookups.
    #[serde(default)]
    pub parameters: Vec<ParameterLink>,

    /// Columns declared boolean in the description (the structure catalog
    /// derives the rest from column types).
    #[serde(default)]
    pub boolean_fields: Vec<String>,
}

impl TableAlias {
    /// A primary table has no parent and is not reference-only data. These
    /// are the only export entry points.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.parent_key.is_empty() && !self.is_empty
    }

    /// Junction descriptor, or a Model error for a junction-flagged alias
    /// missing it.
    pub fn junction(&self) -> Result<&JunctionLink> {
        self.junction.as_ref().ok_or_else(|| {
            ExchangeError::model(format!(
                "the alias {} is flagged many-to-many but has no junction description",
                self.alias
            ))
        })
    }

    /// Strictness of a declared child link; false for undeclared aliases.
    #[must_use]
    pub fn child_is_strict(&self, alias: &str) -> bool {
        self.children
            .iter()
            .find(|c| c.alias == alias)
            .map(|c| c.is_strict)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct Description {
    version: String,
    #[serde(default)]
    tables: Vec<TableAlias>,
}

/// The parsed registry, keyed by alias in description order.
#[derive(Debug, Clone)]
pub struct Model {
    tables: IndexMap<String, TableAlias>,
}

impl Model {
    /// Parse and validate a mapping description.
    ///
    /// Fails with a Model error if the version tag does not match
    /// [`DESCRIPTION_VERSION`], an alias is duplicated, or any
    /// cross-referenced alias (child, parameter, junction partner) is
    /// undefined. Unresolved references are a load-time error, never a
    /// runtime one.
    pub fn load(json: &str) -> Result<Self> {
        let description: Description = serde_json::from_str(json)?;

        if description.version != DESCRIPTION_VERSION {
            return Err(ExchangeError::model(format!(
                "the version of the description is not compatible with this program. Required: {}, supplied: {}",
                DESCRIPTION_VERSION, description.version
            )));
        }
        if description.tables.is_empty() {
            return Err(ExchangeError::model("the mapping description is empty"));
        }

        let mut tables = IndexMap::new();
        for mut entry in description.tables {
            if entry.alias.is_empty() {
                entry.alias = entry.table_name.clone();
            }
            let alias = entry.alias.clone();
            if tables.insert(alias.clone(), entry).is_some() {
                return Err(ExchangeError::model(format!(
                    "the alias {} is described more than once",
                    alias
                )));
            }
        }

        let model = Model { tables };
        model.validate_references()?;
        Ok(model)
    }

    fn validate_references(&self) -> Result<()> {
        for entry in self.tables.values() {
            for child in &entry.children {
                self.require(&child.alias, &entry.alias, "child")?;
            }
            for parameter in &entry.parameters {
                self.require(&parameter.alias, &entry.alias, "parameter")?;
                if parameter.field_name.is_empty() {
                    return Err(ExchangeError::model(format!(
                        "the parameter {} of alias {} has no field name",
                        parameter.alias, entry.alias
                    )));
                }
            }
            if entry.is_many_to_many {
                let junction = entry.junction()?;
                self.require(&junction.secondary_alias, &entry.alias, "junction partner")?;
                if junction.secondary_parent_key.is_empty() {
                    return Err(ExchangeError::model(format!(
                        "the junction of alias {} has no secondary parent key",
                        entry.alias
                    )));
                }
            }
        }
        Ok(())
    }

    fn require(&self, alias: &str, referrer: &str, role: &str) -> Result<()> {
        if self.tables.contains_key(alias) {
            Ok(())
        } else {
            Err(ExchangeError::model(format!(
                "the {} {} referenced by alias {} is not described in the model",
                role, alias, referrer
            )))
        }
    }

    /// Look up an alias; unknown aliases are a Model error.
    pub fn get(&self, alias: &str) -> Result<&TableAlias> {
        self.tables.get(alias).ok_or_else(|| {
            ExchangeError::model(format!(
                "the alias {} was not described in the model",
                alias
            ))
        })
    }

    /// All aliases with no parent key and `isEmpty` false, in description
    /// order. These are the export entry points.
    #[must_use]
    pub fn primary_tables(&self) -> Vec<&str> {
        self.tables
            .values()
            .filter(|t| t.is_primary())
            .map(|t| t.alias.as_str())
            .collect()
    }

    /// Distinct physical table names, in description order.
    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for entry in self.tables.values() {
            if !names.contains(&entry.table_name.as_str()) {
                names.push(entry.table_name.as_str());
            }
        }
        names
    }

    /// Iterate over all aliases in description order.
    pub fn iter(&self) -> impl Iterator<Item = &TableAlias> {
        self.tables.values()
    }

    /// Aliases mapping to the given physical table.
    pub fn aliases_for_table<'a>(&'a self, table_name: &'a str) -> impl Iterator<Item = &'a TableAlias> {
        self.tables
            .values()
            .filter(move |t| t.table_name == table_name)
    }
}
