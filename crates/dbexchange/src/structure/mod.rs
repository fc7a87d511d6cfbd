//! Structure catalog: introspected (or cached) table metadata.
//!
//! For every physical table named by the model, the catalog records the
//! ordered column list with types, comments, nullability and primary-key
//! membership, the derived boolean and binary column subsets, the table
//! comment, and the cross-reference relations the DDL generator needs.
//!
//! Built once per run: by live introspection on the source side, or loaded
//! from the JSON cache produced there on the target side — that is how two
//! heterogeneous installations stay structurally in sync without re-probing
//! each one.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::Value;
use crate::error::{ExchangeError, Result};
use crate::gateway::Gateway;
use crate::model::Model;

const BOOLEAN_TYPE: &str = "boolean";
const BINARY_TYPE: &str = "bytea";

/// Column list for one table, ordered by physical position.
const COLUMNS_SQL: &str = "select pg_attribute.attname as field, \
     pg_catalog.format_type(pg_attribute.atttypid, pg_attribute.atttypmod) as type, \
     col_description(pg_attribute.attrelid, pg_attribute.attnum) as comment, \
     pg_attribute.attnotnull as notnull, \
     (pg_constraint.conname is not null) as isprimarykey, \
     pg_get_expr(pg_attrdef.adbin, pg_attrdef.adrelid) as def \
     from pg_tables \
     join pg_namespace on pg_namespace.nspname = pg_tables.schemaname \
     join pg_class on pg_class.relname = pg_tables.tablename \
       and pg_class.relnamespace = pg_namespace.oid \
     join pg_attribute on pg_class.oid = pg_attribute.attrelid \
       and pg_attribute.atttypid <> 0::oid and pg_attribute.attnum > 0 \
     left join pg_attrdef on pg_attrdef.adrelid = pg_class.oid \
       and pg_attrdef.adnum = pg_attribute.attnum \
     left join pg_constraint on pg_constraint.contype = 'p' \
       and pg_constraint.conrelid = pg_class.oid \
       and pg_attribute.attnum = any (pg_constraint.conkey) \
     where pg_tables.tablename = :tablename";

const COLUMNS_ORDER: &str = " order by pg_attribute.attnum asc";

/// Table-level comment.
const TABLE_COMMENT_SQL: &str = "select description \
     from pg_catalog.pg_statio_all_tables st \
     left outer join pg_catalog.pg_description \
       on (relid = objoid and objsubid = 0) \
     where relname = :tablename and schemaname = :schemaname";

/// One introspected column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Column name.
    pub field: String,

    /// Formatted type, e.g. `integer`, `character varying(80)`, `serial`.
    pub r#type: String,

    /// Column comment.
    #[serde(default)]
    pub comment: Option<String>,

    /// NOT NULL flag.
    #[serde(default)]
    pub not_null: bool,

    /// Primary-key membership.
    #[serde(default)]
    pub is_primary_key: bool,
}

/// One foreign-key relation derived from the model, recorded so DDL
/// generation does not need the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub parent_table: String,
    pub parent_key: String,
    pub child_table: String,
    pub child_key: String,
}

/// Metadata for one physical table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureEntry {
    /// Table comment.
    #[serde(default)]
    pub description: Option<String>,

    /// Columns ordered by physical position.
    pub attributes: Vec<Attribute>,

    /// Columns of boolean type.
    #[serde(default)]
    pub boolean_fields: Vec<String>,

    /// Columns of binary (bytea) type.
    #[serde(default)]
    pub binary_fields: Vec<String>,

    /// Child links where this table is the parent.
    #[serde(default)]
    pub children: Vec<Relation>,

    /// Lookup links (parameters, junction partner) where this table is the
    /// referencing side.
    #[serde(default)]
    pub parents: Vec<Relation>,
}

impl StructureEntry {
    /// Column names excluding binary fields — the select list for export.
    #[must_use]
    pub fn column_list(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.r#type != BINARY_TYPE)
            .map(|a| a.field.as_str())
            .collect()
    }

    /// First column name, the ordering fallback when no technical key is
    /// declared.
    #[must_use]
    pub fn first_column(&self) -> Option<&str> {
        self.attributes.first().map(|a| a.field.as_str())
    }

    /// Primary-key member column names.
    #[must_use]
    pub fn primary_key_fields(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.is_primary_key)
            .map(|a| a.field.as_str())
            .collect()
    }

    #[must_use]
    pub fn has_binary(&self) -> bool {
        !self.binary_fields.is_empty()
    }
}

/// The catalog: one entry per physical table, in model order.
#[derive(Debug, Clone, Default)]
pub struct StructureCatalog {
    tables: IndexMap<String, StructureEntry>,
}

impl StructureCatalog {
    /// Introspect every distinct table named by the model.
    ///
    /// One catalog query per table, ordered by physical column position,
    /// plus one query for the table comment. A table with zero columns is
    /// unknown and raises a Schema error. A table carrying binary fields
    /// must declare a business key; that is checked here, where the binary
    /// fields first become known.
    pub fn build(gateway: &mut dyn Gateway, model: &Model) -> Result<Self> {
        let mut tables = IndexMap::new();
        for table_name in model.table_names() {
            debug!(table = table_name, "introspecting");
            let entry = introspect_table(gateway, table_name)?;
            if entry.has_binary() {
                for alias in model.aliases_for_table(table_name) {
                    if alias.business_key.is_empty() {
                        return Err(ExchangeError::model(format!(
                            "the table {} has binary fields but its alias {} declares no business key",
                            table_name, alias.alias
                        )));
                    }
                }
            }
            tables.insert(table_name.to_string(), entry);
        }
        let mut catalog = StructureCatalog { tables };
        catalog.derive_relations(model);
        Ok(catalog)
    }

    /// Load a previously serialized catalog as-is, skipping introspection.
    pub fn load(json: &str) -> Result<Self> {
        let tables: IndexMap<String, StructureEntry> = serde_json::from_str(json)?;
        if tables.is_empty() {
            return Err(ExchangeError::model("the structure of the export is empty"));
        }
        Ok(StructureCatalog { tables })
    }

    /// Serialize the catalog for the structure cache file.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.tables)?)
    }

    /// Look up a table; unknown tables are a Schema error.
    pub fn get(&self, table_name: &str) -> Result<&StructureEntry> {
        self.tables.get(table_name).ok_or_else(|| {
            ExchangeError::schema(format!(
                "the table {} is not part of the structure catalog",
                table_name
            ))
        })
    }

    /// Iterate over entries in model order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StructureEntry)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Record the model's child, parameter and junction links as per-table
    /// relations.
    fn derive_relations(&mut self, model: &Model) {
        for alias in model.iter() {
            for child in &alias.children {
                let Ok(child_alias) = model.get(&child.alias) else {
                    continue;
                };
                let relation = Relation {
                    parent_table: alias.table_name.clone(),
                    parent_key: alias.technical_key.clone(),
                    child_table: child_alias.table_name.clone(),
                    child_key: child_alias.parent_key.clone(),
                };
                if let Some(entry) = self.tables.get_mut(&alias.table_name) {
                    entry.children.push(relation);
                }
            }
            for parameter in &alias.parameters {
                let Ok(parameter_alias) = model.get(&parameter.alias) else {
                    continue;
                };
                let relation = Relation {
                    parent_table: parameter_alias.table_name.clone(),
                    parent_key: parameter_alias.technical_key.clone(),
                    child_table: alias.table_name.clone(),
                    child_key: parameter.field_name.clone(),
                };
                if let Some(entry) = self.tables.get_mut(&alias.table_name) {
                    entry.parents.push(relation);
                }
            }
            if alias.is_many_to_many {
                let Some(junction) = &alias.junction else {
                    continue;
                };
                let Ok(partner) = model.get(&junction.secondary_alias) else {
                    continue;
                };
                let relation = Relation {
                    parent_table: partner.table_name.clone(),
                    parent_key: partner.technical_key.clone(),
                    child_table: alias.table_name.clone(),
                    child_key: junction.secondary_parent_key.clone(),
                };
                if let Some(entry) = self.tables.get_mut(&alias.table_name) {
                    entry.parents.push(relation);
                }
            }
        }
    }
}

fn introspect_table(gateway: &mut dyn Gateway, table_name: &str) -> Result<StructureEntry> {
    let (schema_name, bare_name) = match table_name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, table_name),
    };

    let mut sql = COLUMNS_SQL.to_string();
    let mut params: Vec<(&str, Value)> = vec![("tablename", Value::from(bare_name))];
    if let Some(schema) = schema_name {
        sql.push_str(" and pg_tables.schemaname = :schemaname");
        params.push(("schemaname", Value::from(schema)));
    }
    sql.push_str(COLUMNS_ORDER);

    let rows = gateway.execute(&sql, &params)?;
    if rows.is_empty() {
        return Err(ExchangeError::schema(format!(
            "the table {} does not exist or has no columns",
            table_name
        )));
    }

    let mut entry = StructureEntry::default();
    for row in rows {
        let field = text_of(&row, "field");
        let mut r#type = text_of(&row, "type");
        // Integer columns fed by a sequence are portable as serial.
        if r#type == "integer" && text_of(&row, "def").starts_with("nextval") {
            r#type = "serial".to_string();
        }
        if r#type == BOOLEAN_TYPE {
            entry.boolean_fields.push(field.clone());
        }
        if r#type == BINARY_TYPE {
            entry.binary_fields.push(field.clone());
        }
        let comment = match row.get("comment") {
            Some(Value::Text(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        entry.attributes.push(Attribute {
            field,
            r#type,
            comment,
            not_null: bool_of(&row, "notnull"),
            is_primary_key: bool_of(&row, "isprimarykey"),
        });
    }

    let comment_params = [
        ("tablename", Value::from(bare_name)),
        ("schemaname", Value::from(schema_name.unwrap_or("public"))),
    ];
    let comment_rows = gateway.execute(TABLE_COMMENT_SQL, &comment_params)?;
    entry.description = comment_rows.first().and_then(|row| match row.get("description") {
        Some(Value::Text(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    });

    Ok(entry)
}

fn text_of(row: &crate::gateway::SqlRow, field: &str) -> String {
    match row.get(field) {
        Some(Value::Text(s)) => s.clone(),
        Some(v) => v.to_plain_string(),
        None => String::new(),
    }
}

fn bool_of(row: &crate::gateway::SqlRow, field: &str) -> bool {
    row.get(field).map(|v| !v.is_false_like()).unwrap_or(false)
}
