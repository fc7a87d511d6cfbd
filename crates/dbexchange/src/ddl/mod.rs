//! DDL generation from the structure catalog.
//!
//! Emits a plain SQL script recreating every cataloged table: CREATE TABLE
//! with introspected types and not-null flags, a primary-key clause, table
//! and column comments, then one foreign-key constraint per derived
//! relation. No transaction control is embedded; executing the script is
//! the caller's business.

use crate::core::identifier::{quote_ident, quote_table};
use crate::error::{ExchangeError, Result};
use crate::structure::{Relation, StructureCatalog};

/// Generate the full creation script for every table of the catalog.
pub fn generate_create_script(catalog: &StructureCatalog) -> Result<String> {
    let mut script = String::new();

    for (table_name, entry) in catalog.iter() {
        let mut lines: Vec<String> = Vec::with_capacity(entry.attributes.len() + 1);
        for attribute in &entry.attributes {
            let mut line = format!("    {} {}", quote_ident(&attribute.field)?, attribute.r#type);
            if attribute.not_null {
                line.push_str(" not null");
            }
            lines.push(line);
        }

        let key_fields = entry.primary_key_fields();
        if !key_fields.is_empty() {
            let mut quoted = Vec::with_capacity(key_fields.len());
            for field in &key_fields {
                quoted.push(quote_ident(field)?);
            }
            lines.push(format!("    primary key ({})", quoted.join(", ")));
        }

        script.push_str(&format!(
            "create table {} (\n{}\n);\n",
            quote_table(table_name)?,
            lines.join(",\n")
        ));

        if let Some(description) = &entry.description {
            script.push_str(&format!(
                "comment on table {} is '{}';\n",
                quote_table(table_name)?,
                escape_literal(description)
            ));
        }
        for attribute in &entry.attributes {
            if let Some(comment) = &attribute.comment {
                script.push_str(&format!(
                    "comment on column {}.{} is '{}';\n",
                    quote_table(table_name)?,
                    quote_ident(&attribute.field)?,
                    escape_literal(comment)
                ));
            }
        }
        script.push('\n');
    }

    for (table_name, entry) in catalog.iter() {
        for relation in entry.children.iter().chain(entry.parents.iter()) {
            script.push_str(&foreign_key(table_name, relation)?);
        }
    }

    Ok(script)
}

fn foreign_key(owner: &str, relation: &Relation) -> Result<String> {
    if relation.parent_table.is_empty()
        || relation.parent_key.is_empty()
        || relation.child_table.is_empty()
        || relation.child_key.is_empty()
    {
        return Err(ExchangeError::schema(format!(
            "the relation between {} and {} recorded for {} is incomplete",
            relation.parent_table, relation.child_table, owner
        )));
    }
    Ok(format!(
        "alter table {} add foreign key ({}) references {} ({});\n",
        quote_table(&relation.child_table)?,
        quote_ident(&relation.child_key)?,
        quote_table(&relation.parent_table)?,
        quote_ident(&relation.parent_key)?
    ))
}

fn escape_literal(text: &str) -> String {
    text.replace('\'', "''")
}
