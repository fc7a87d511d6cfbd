//! Recursive transactional importer.
//!
//! Walks an incoming nested record tree, resolving business keys to rows
//! already present in the target, inserting or updating, re-attaching
//! externalized binary payloads, all inside one transaction. Any failure
//! anywhere in the walk rolls back every write performed so far.
//!
//! Technical keys carried in the input are never trusted: only a business
//! key match makes a row an update of an existing identity.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::binary::BinaryStore;
use crate::core::identifier::{quote_ident, quote_table};
use crate::core::{Record, Value};
use crate::error::{ExchangeError, Result};
use crate::gateway::Gateway;
use crate::model::{Model, TableAlias};
use crate::structure::{StructureCatalog, StructureEntry};

pub struct Importer<'a> {
    model: &'a Model,
    catalog: &'a StructureCatalog,
    store: BinaryStore,
}

impl<'a> Importer<'a> {
    pub fn new(model: &'a Model, catalog: &'a StructureCatalog, store: BinaryStore) -> Self {
        Importer {
            model,
            catalog,
            store,
        }
    }

    /// Import every top-level alias of the data set inside one transaction.
    ///
    /// Commits on success; any failure rolls the whole run back before the
    /// error surfaces, leaving the target unchanged.
    pub fn import_all(
        &self,
        gateway: &mut dyn Gateway,
        data: &IndexMap<String, Vec<Record>>,
    ) -> Result<()> {
        gateway.begin_transaction()?;
        for (alias, rows) in data {
            debug!(alias, rows = rows.len(), "importing top-level alias");
            let mut path = Vec::new();
            if let Err(err) = self.import_table(gateway, alias, rows, 0, &[], false, &mut path) {
                // Best effort: the walk's error is the one worth surfacing.
                if let Err(rollback_err) = gateway.rollback() {
                    warn!(error = %rollback_err, "rollback failed after import error");
                }
                return Err(err);
            }
        }
        gateway.commit()
    }

    /// Import one alias's rows, then recurse into their children.
    ///
    /// `extra_values` are stamped onto every row before the write; an empty
    /// extra value is refused, it would silently propagate missing parent
    /// context. `delete_before_insert` replaces the parent's existing child
    /// set wholesale (strict children, and always junction rows).
    #[allow(clippy::too_many_arguments)]
    pub fn import_table(
        &self,
        gateway: &mut dyn Gateway,
        alias_name: &str,
        rows: &[Record],
        parent_key: i64,
        extra_values: &[(String, Value)],
        delete_before_insert: bool,
        path: &mut Vec<String>,
    ) -> Result<()> {
        let alias = self.model.get(alias_name)?;
        if path.iter().any(|visited| visited == alias_name) {
            return Err(ExchangeError::model(format!(
                "the model cycles through the alias {} (path: {})",
                alias_name,
                path.join(" > ")
            )));
        }
        path.push(alias_name.to_string());
        let result = self.import_rows(gateway, alias, rows, parent_key, extra_values, delete_before_insert, path);
        path.pop();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn import_rows(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        rows: &[Record],
        parent_key: i64,
        extra_values: &[(String, Value)],
        delete_before_insert: bool,
        path: &mut Vec<String>,
    ) -> Result<()> {
        let entry = self.catalog.get(&alias.table_name)?;

        // Junction rows are always fully replaced for their parent; strict
        // children likewise.
        if (delete_before_insert || alias.is_many_to_many)
            && parent_key > 0
            && !alias.parent_key.is_empty()
        {
            let sql = format!(
                "delete from {} where {} = :parentKey",
                quote_table(&alias.table_name)?,
                quote_ident(&alias.parent_key)?
            );
            gateway.execute(&sql, &[("parentKey", Value::Int(parent_key))])?;
        }

        for source in rows {
            // Nothing to anchor the write to. Junction rows may carry their
            // parent key in their own fields instead of the caller argument.
            let anchored = source.has_value(&alias.technical_key)
                || source.has_value(&alias.business_key)
                || source.has_value(&alias.parent_key)
                || parent_key > 0;
            if !anchored {
                continue;
            }

            let mut row = source.clone();
            self.resolve_identity(gateway, alias, &mut row)?;

            if parent_key > 0 && !alias.parent_key.is_empty() {
                row.set(alias.parent_key.clone(), Value::Int(parent_key));
            }
            if alias.is_one_to_one && parent_key > 0 {
                // Shared identity with the parent.
                row.set(alias.technical_key.clone(), Value::Int(parent_key));
            }

            if alias.is_many_to_many {
                let junction = alias.junction()?;
                if let Some(partner) = row.parameters.shift_remove(&junction.secondary_alias) {
                    let key =
                        self.resolve_reference(gateway, &junction.secondary_alias, &partner)?;
                    row.set(junction.secondary_parent_key.clone(), Value::Int(key));
                }
            }

            for parameter in &alias.parameters {
                if let Some(lookup) = row.parameters.shift_remove(&parameter.alias) {
                    let key = self.resolve_reference(gateway, &parameter.alias, &lookup)?;
                    row.set(parameter.field_name.clone(), Value::Int(key));
                }
            }

            for (field, value) in extra_values {
                if value.is_empty() {
                    return Err(ExchangeError::import(format!(
                        "the value supplied for the column {} of table {} is empty",
                        field, alias.table_name
                    )));
                }
                row.set(field.clone(), value.clone());
            }

            let children = std::mem::take(&mut row.children);
            row.parameters.clear();

            let written_key = self.write_data(gateway, alias, entry, &mut row)?;

            if let Some(written_key) = written_key {
                for (child_alias, child_rows) in &children {
                    self.import_table(
                        gateway,
                        child_alias,
                        child_rows,
                        written_key,
                        &[],
                        alias.child_is_strict(child_alias),
                        path,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Business-key resolution: a business-key match claims the existing
    /// identity; in every other case the supplied technical key is dropped
    /// so the write inserts a new row. Source keys are never trusted across
    /// installations, not even when the alias declares no business key.
    /// One-to-one and parent stamping reinstate shared keys afterwards.
    fn resolve_identity(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        row: &mut Record,
    ) -> Result<()> {
        if alias.technical_key.is_empty() {
            return Ok(());
        }
        if !alias.business_key.is_empty() && row.has_value(&alias.business_key) {
            let business = row
                .get(&alias.business_key)
                .map(Value::to_plain_string)
                .unwrap_or_default();
            if let Some(existing) = self.lookup_by_business_key(gateway, alias, &business)? {
                row.set(alias.technical_key.clone(), Value::Int(existing));
                return Ok(());
            }
        }
        row.remove(&alias.technical_key);
        Ok(())
    }

    fn lookup_by_business_key(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        business: &str,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "select {} from {} where {} = :businessKey",
            quote_ident(&alias.technical_key)?,
            quote_table(&alias.table_name)?,
            quote_ident(&alias.business_key)?
        );
        let rows = gateway.execute(&sql, &[("businessKey", Value::from(business))])?;
        Ok(rows
            .first()
            .and_then(|r| r.get(&alias.technical_key))
            .and_then(Value::as_key))
    }

    /// Resolve a parameter or junction-partner row to a technical key in the
    /// target, creating the row when its business key is unknown there.
    fn resolve_reference(
        &self,
        gateway: &mut dyn Gateway,
        alias_name: &str,
        reference: &Record,
    ) -> Result<i64> {
        let alias = self.model.get(alias_name)?;
        if alias.business_key.is_empty() || alias.technical_key.is_empty() {
            return Err(ExchangeError::import(format!(
                "the reference alias {} declares no business key to resolve by",
                alias_name
            )));
        }
        let business = reference
            .get(&alias.business_key)
            .map(Value::to_plain_string)
            .unwrap_or_default();
        if business.is_empty() {
            return Err(ExchangeError::import(format!(
                "the row referencing {} carries no business key value",
                alias_name
            )));
        }
        if let Some(existing) = self.lookup_by_business_key(gateway, alias, &business)? {
            return Ok(existing);
        }

        debug!(alias = alias_name, business, "creating missing reference row");
        let entry = self.catalog.get(&alias.table_name)?;
        let mut fresh = reference.clone();
        fresh.children.clear();
        fresh.parameters.clear();
        fresh.remove(&alias.technical_key);
        self.write_data(gateway, alias, entry, &mut fresh)?
            .ok_or_else(|| {
                ExchangeError::import(format!(
                    "unable to create the {} row with business key {}",
                    alias_name, business
                ))
            })
    }

    /// Write one flat row, returning the technical key it ended up under.
    ///
    /// Update-vs-insert is decided by an explicit existence check on the
    /// technical key, never by the mere presence of the field. Junction rows
    /// generate no key and report none.
    fn write_data(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        entry: &StructureEntry,
        row: &mut Record,
    ) -> Result<Option<i64>> {
        self.normalize_booleans(alias, entry, row);

        let supplied_key = row.key(&alias.technical_key);
        let exists = match supplied_key {
            Some(key) => self.row_exists(gateway, alias, key)?,
            None => false,
        };

        let written_key = if exists {
            self.update_row(gateway, alias, row)?;
            if alias.is_many_to_many {
                None
            } else {
                supplied_key
            }
        } else {
            self.insert_row(gateway, alias, row)?
        };

        self.attach_binaries(gateway, alias, entry, row, written_key)?;
        Ok(written_key)
    }

    /// Boolean columns, model-declared and catalog-derived alike, are bound
    /// as real booleans: false-like payloads become false, the rest true.
    fn normalize_booleans(&self, alias: &TableAlias, entry: &StructureEntry, row: &mut Record) {
        let fields = alias
            .boolean_fields
            .iter()
            .chain(entry.boolean_fields.iter());
        for field in fields {
            if let Some(value) = row.get(field) {
                let normalized = Value::Bool(!value.is_false_like());
                row.set(field.clone(), normalized);
            }
        }
    }

    fn row_exists(&self, gateway: &mut dyn Gateway, alias: &TableAlias, key: i64) -> Result<bool> {
        let sql = format!(
            "select 1 as present from {} where {} = :key",
            quote_table(&alias.table_name)?,
            quote_ident(&alias.technical_key)?
        );
        let rows = gateway.execute(&sql, &[("key", Value::Int(key))])?;
        Ok(!rows.is_empty())
    }

    fn update_row(&self, gateway: &mut dyn Gateway, alias: &TableAlias, row: &Record) -> Result<()> {
        // Junction rows update under their composite key, everything else
        // under the technical key.
        let predicate_fields: Vec<&str> = if alias.is_many_to_many {
            let junction = alias.junction()?;
            vec![&alias.parent_key, &junction.secondary_parent_key]
        } else {
            vec![&alias.technical_key]
        };

        let mut assignments = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for (field, value) in &row.fields {
            if field == &alias.technical_key || predicate_fields.contains(&field.as_str()) {
                continue;
            }
            let name = format!("v{}", names.len());
            assignments.push(format!("{} = :{}", quote_ident(field)?, name));
            names.push(name);
            values.push(value.clone());
        }
        if assignments.is_empty() {
            return Ok(());
        }

        let mut predicates = Vec::new();
        for field in &predicate_fields {
            let name = format!("w{}", names.len());
            predicates.push(format!("{} = :{}", quote_ident(field)?, name));
            values.push(row.get(field).cloned().unwrap_or(Value::Null));
            names.push(name);
        }

        let sql = format!(
            "update {} set {} where {}",
            quote_table(&alias.table_name)?,
            assignments.join(", "),
            predicates.join(" and ")
        );
        let params: Vec<(&str, Value)> = names
            .iter()
            .map(String::as_str)
            .zip(values.into_iter())
            .collect();
        gateway.execute(&sql, &params)?;
        Ok(())
    }

    fn insert_row(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        row: &Record,
    ) -> Result<Option<i64>> {
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for (field, value) in &row.fields {
            if field == &alias.technical_key && value.is_empty() {
                continue;
            }
            let name = format!("v{}", names.len());
            columns.push(quote_ident(field)?);
            placeholders.push(format!(":{}", name));
            names.push(name);
            values.push(value.clone());
        }
        if columns.is_empty() {
            return Ok(None);
        }

        let mut sql = format!(
            "insert into {} ({}) values ({})",
            quote_table(&alias.table_name)?,
            columns.join(", "),
            placeholders.join(", ")
        );
        let wants_key = !alias.is_many_to_many && !alias.technical_key.is_empty();
        if wants_key {
            sql.push_str(&format!(" returning {}", quote_ident(&alias.technical_key)?));
        }

        let params: Vec<(&str, Value)> = names
            .iter()
            .map(String::as_str)
            .zip(values.into_iter())
            .collect();
        let result = gateway.execute(&sql, &params)?;
        if !wants_key {
            return Ok(None);
        }
        Ok(result
            .first()
            .and_then(|r| r.get(&alias.technical_key))
            .and_then(Value::as_key))
    }

    /// Stream back externalized payloads for every binary column of the
    /// freshly written row, via a separate bound update.
    fn attach_binaries(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        entry: &StructureEntry,
        row: &Record,
        written_key: Option<i64>,
    ) -> Result<()> {
        if entry.binary_fields.is_empty() {
            return Ok(());
        }
        let Some(key) = written_key else {
            return Ok(());
        };
        if !self.store.exists() {
            return Err(ExchangeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!(
                    "the binary folder {} is missing while the table {} has binary columns",
                    self.store.folder().display(),
                    alias.table_name
                ),
            )));
        }
        let business = row
            .get(&alias.business_key)
            .map(Value::to_plain_string)
            .unwrap_or_default();
        if business.is_empty() {
            return Err(ExchangeError::import(format!(
                "the table {} has binary columns but the row carries no business key value to locate its files",
                alias.table_name
            )));
        }
        for field in &entry.binary_fields {
            let Some(payload) = self.store.read(&alias.table_name, field, &business)? else {
                continue;
            };
            let sql = format!(
                "update {} set {} = :payload where {} = :key",
                quote_table(&alias.table_name)?,
                quote_ident(field)?,
                quote_ident(&alias.technical_key)?
            );
            gateway.execute(
                &sql,
                &[
                    ("payload", Value::Bytes(payload)),
                    ("key", Value::Int(key)),
                ],
            )?;
        }
        Ok(())
    }
}
