//! Recursive exporter.
//!
//! Starting from the model's primary tables, pulls rows and recursively
//! attaches children, parameter lookups and junction partners, producing the
//! nested record trees written to the data file. Binary columns never enter
//! the trees: their payloads are externalized to the binary store. The walk
//! is strictly read-only.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::binary::BinaryStore;
use crate::core::identifier::{quote_ident, quote_table};
use crate::core::{Record, Value};
use crate::error::{ExchangeError, Result};
use crate::gateway::Gateway;
use crate::model::{Model, TableAlias};
use crate::structure::StructureCatalog;

pub struct Exporter<'a> {
    model: &'a Model,
    catalog: &'a StructureCatalog,
    store: BinaryStore,
}

impl<'a> Exporter<'a> {
    pub fn new(model: &'a Model, catalog: &'a StructureCatalog, store: BinaryStore) -> Self {
        Exporter {
            model,
            catalog,
            store,
        }
    }

    /// Export every primary table.
    ///
    /// A non-empty key filter restricts the first primary table only; the
    /// remaining primary tables export in full. This lets a caller pull one
    /// selected root entity and everything it owns while reference roots
    /// still travel whole.
    pub fn export_all(
        &self,
        gateway: &mut dyn Gateway,
        key_filter: &[i64],
    ) -> Result<IndexMap<String, Vec<Record>>> {
        let mut data = IndexMap::new();
        let mut filter = key_filter;
        for alias in self.model.primary_tables() {
            debug!(alias, keys = filter.len(), "exporting primary table");
            let mut path = Vec::new();
            let rows = self.export_table(gateway, alias, filter, 0, &mut path)?;
            data.insert(alias.to_string(), rows);
            filter = &[];
        }
        Ok(data)
    }

    /// Export one alias: its rows, then children, parameters and the
    /// junction partner, depth first.
    ///
    /// `path` carries the aliases currently being visited; re-entering one
    /// means the model describes a cycle and the walk stops with a Model
    /// error instead of recursing forever.
    pub fn export_table(
        &self,
        gateway: &mut dyn Gateway,
        alias_name: &str,
        keys: &[i64],
        parent_key: i64,
        path: &mut Vec<String>,
    ) -> Result<Vec<Record>> {
        let alias = self.model.get(alias_name)?;
        if path.iter().any(|visited| visited == alias_name) {
            return Err(ExchangeError::model(format!(
                "the model cycles through the alias {} (path: {})",
                alias_name,
                path.join(" > ")
            )));
        }
        path.push(alias_name.to_string());
        let result = self.export_rows(gateway, alias, keys, parent_key, path);
        path.pop();
        result
    }

    fn export_rows(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        keys: &[i64],
        parent_key: i64,
        path: &mut Vec<String>,
    ) -> Result<Vec<Record>> {
        // Reference data travels by explicit key only, never in bulk.
        if alias.is_empty && keys.is_empty() {
            return Ok(Vec::new());
        }

        let entry = self.catalog.get(&alias.table_name)?;
        let rows = self.fetch_rows(gateway, alias, entry.column_list(), keys, parent_key, entry.first_column())?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Record::from_fields(row);

            for field in &entry.binary_fields {
                self.externalize_binary(gateway, alias, field, &record)?;
            }

            if let Some(row_key) = record.key(&alias.technical_key) {
                for child in &alias.children {
                    let nested = self.export_table(gateway, &child.alias, &[], row_key, path)?;
                    if !nested.is_empty() {
                        record.children.insert(child.alias.clone(), nested);
                    }
                }
            }

            for parameter in &alias.parameters {
                if let Some(lookup_key) = record.key(&parameter.field_name) {
                    let nested =
                        self.export_table(gateway, &parameter.alias, &[lookup_key], 0, path)?;
                    if let Some(first) = nested.into_iter().next() {
                        record.parameters.insert(parameter.alias.clone(), first);
                    }
                }
            }

            if alias.is_many_to_many {
                let junction = alias.junction()?;
                if let Some(partner_key) = record.key(&junction.secondary_parent_key) {
                    let nested = self.export_table(
                        gateway,
                        &junction.secondary_alias,
                        &[partner_key],
                        0,
                        path,
                    )?;
                    if let Some(first) = nested.into_iter().next() {
                        record
                            .parameters
                            .insert(junction.secondary_alias.clone(), first);
                    }
                }
            }

            records.push(record);
        }
        Ok(records)
    }

    /// Fetch the flat rows: binary columns excluded, selection by key list,
    /// else by parent key, else whole table; deterministic ordering by the
    /// technical key, or the first column when none is declared.
    fn fetch_rows(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        columns: Vec<&str>,
        keys: &[i64],
        parent_key: i64,
        first_column: Option<&str>,
    ) -> Result<Vec<crate::gateway::SqlRow>> {
        let mut quoted_columns = Vec::with_capacity(columns.len());
        for column in &columns {
            quoted_columns.push(quote_ident(column)?);
        }
        let mut sql = format!(
            "select {} from {}",
            quoted_columns.join(", "),
            quote_table(&alias.table_name)?
        );

        let mut names: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if !keys.is_empty() && !alias.technical_key.is_empty() {
            let placeholders = (0..keys.len())
                .map(|i| format!(":k{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(
                " where {} in ({})",
                quote_ident(&alias.technical_key)?,
                placeholders
            ));
            for (i, key) in keys.iter().enumerate() {
                names.push(format!("k{}", i));
                values.push(Value::Int(*key));
            }
        } else if parent_key > 0 && !alias.parent_key.is_empty() {
            sql.push_str(&format!(
                " where {} = :parentKey",
                quote_ident(&alias.parent_key)?
            ));
            names.push("parentKey".to_string());
            values.push(Value::Int(parent_key));
        }

        if !alias.technical_key.is_empty() {
            sql.push_str(&format!(" order by {} asc", quote_ident(&alias.technical_key)?));
        } else if let Some(first) = first_column {
            sql.push_str(&format!(" order by {} asc", quote_ident(first)?));
        }

        let params: Vec<(&str, Value)> = names
            .iter()
            .map(String::as_str)
            .zip(values.into_iter())
            .collect();
        gateway.execute(&sql, &params)
    }

    /// Pull one binary column for one row and write it to the store, named
    /// by the row's business key value so the target side can find it again.
    fn externalize_binary(
        &self,
        gateway: &mut dyn Gateway,
        alias: &TableAlias,
        field: &str,
        record: &Record,
    ) -> Result<()> {
        let Some(row_key) = record.key(&alias.technical_key) else {
            return Ok(());
        };
        let business_value = record
            .get(&alias.business_key)
            .map(Value::to_plain_string)
            .unwrap_or_default();
        if business_value.is_empty() {
            warn!(
                table = alias.table_name,
                field,
                key = row_key,
                "binary payload skipped: the row has no business key value"
            );
            return Ok(());
        }

        let sql = format!(
            "select {} from {} where {} = :key",
            quote_ident(field)?,
            quote_table(&alias.table_name)?,
            quote_ident(&alias.technical_key)?
        );
        let rows = gateway.execute(&sql, &[("key", Value::Int(row_key))])?;
        let Some(Value::Bytes(payload)) = rows.first().and_then(|r| r.get(field)) else {
            return Ok(());
        };
        self.store
            .write(&alias.table_name, field, &business_value, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{row, MockGateway};

    fn model(tables: &str) -> Model {
        Model::load(&format!("{{\"version\":\"2.0\",\"tables\":{}}}", tables)).unwrap()
    }

    fn catalog(json: &str) -> StructureCatalog {
        StructureCatalog::load(json).unwrap()
    }

    fn plain_structure(tables: &[(&str, &[&str])]) -> StructureCatalog {
        let entries = tables
            .iter()
            .map(|(name, cols)| {
                let attrs = cols
                    .iter()
                    .map(|c| format!("{{\"field\":\"{}\",\"type\":\"integer\"}}", c))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("\"{}\":{{\"attributes\":[{}]}}", name, attrs)
            })
            .collect::<Vec<_>>()
            .join(",");
        catalog(&format!("{{{}}}", entries))
    }

    fn store() -> (tempfile::TempDir, BinaryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BinaryStore::new(dir.path().join("binary"));
        (dir, store)
    }

    #[test]
    fn test_export_nests_children_and_parameters() {
        let m = model(
            r#"[
            {"alias":"order","tableName":"orders","technicalKey":"order_id",
             "children":[{"alias":"line"}],
             "parameters":[{"alias":"status","fieldName":"status_id"}]},
            {"alias":"line","tableName":"order_lines","technicalKey":"line_id","parentKey":"order_id"},
            {"alias":"status","tableName":"statuses","technicalKey":"status_id","businessKey":"code","isEmpty":true}
        ]"#,
        );
        let c = plain_structure(&[
            ("orders", &["order_id", "status_id"]),
            ("order_lines", &["line_id", "order_id"]),
            ("statuses", &["status_id", "code"]),
        ]);
        let (_dir, s) = store();

        let mut gw = MockGateway::new();
        gw.expect(
            "from \"orders\"",
            vec![row(&[
                ("order_id", Value::Int(1)),
                ("status_id", Value::Int(7)),
            ])],
        );
        gw.expect(
            "where \"order_id\" = :parentKey",
            vec![row(&[
                ("line_id", Value::Int(10)),
                ("order_id", Value::Int(1)),
            ])],
        );
        gw.expect(
            "where \"status_id\" in (:k0)",
            vec![row(&[
                ("status_id", Value::Int(7)),
                ("code", Value::Text("OPEN".into())),
            ])],
        );

        let exporter = Exporter::new(&m, &c, s);
        let data = exporter.export_all(&mut gw, &[]).unwrap();
        gw.verify_done();

        let orders = &data["order"];
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].children["line"].len(), 1);
        assert_eq!(
            orders[0].parameters["status"].get("code"),
            Some(&Value::Text("OPEN".into()))
        );
    }

    #[test]
    fn test_junction_partner_attached_under_parameters() {
        let m = model(
            r#"[
            {"alias":"order","tableName":"orders","technicalKey":"order_id",
             "children":[{"alias":"order_tag"}]},
            {"alias":"order_tag","tableName":"order_tags","parentKey":"order_id",
             "isManyToMany":true,
             "junction":{"secondaryAlias":"tag","secondaryParentKey":"tag_id"}},
            {"alias":"tag","tableName":"tags","technicalKey":"tag_id","businessKey":"label","isEmpty":true}
        ]"#,
        );
        let c = plain_structure(&[
            ("orders", &["order_id"]),
            ("order_tags", &["order_id", "tag_id"]),
            ("tags", &["tag_id", "label"]),
        ]);
        let (_dir, s) = store();

        let mut gw = MockGateway::new();
        gw.expect("from \"orders\"", vec![row(&[("order_id", Value::Int(1))])]);
        gw.expect(
            "where \"order_id\" = :parentKey",
            vec![row(&[
                ("order_id", Value::Int(1)),
                ("tag_id", Value::Int(2)),
            ])],
        );
        gw.expect(
            "where \"tag_id\" in (:k0)",
            vec![row(&[
                ("tag_id", Value::Int(2)),
                ("label", Value::Text("urgent".into())),
            ])],
        );

        let exporter = Exporter::new(&m, &c, s);
        let data = exporter.export_all(&mut gw, &[]).unwrap();
        gw.verify_done();

        let junction = &data["order"][0].children["order_tag"][0];
        assert_eq!(
            junction.parameters["tag"].get("label"),
            Some(&Value::Text("urgent".into()))
        );
    }

    #[test]
    fn test_key_filter_applies_to_first_primary_table_only() {
        let m = model(
            r#"[
            {"alias":"a","tableName":"a","technicalKey":"a_id"},
            {"alias":"b","tableName":"b","technicalKey":"b_id"}
        ]"#,
        );
        let c = plain_structure(&[("a", &["a_id"]), ("b", &["b_id"])]);
        let (_dir, s) = store();

        let mut gw = MockGateway::new();
        gw.expect("\"a_id\" in (:k0, :k1)", vec![]);
        gw.expect("from \"b\"", vec![]);

        Exporter::new(&m, &c, s).export_all(&mut gw, &[3, 5]).unwrap();
        gw.verify_done();
        assert!(!gw.executed()[1].contains("in ("));
    }

    #[test]
    fn test_empty_table_without_keys_issues_no_query() {
        let m = model(
            r#"[{"alias":"ref","tableName":"refs","technicalKey":"ref_id","isEmpty":true,"parentKey":"x"}]"#,
        );
        let c = plain_structure(&[("refs", &["ref_id"])]);
        let (_dir, s) = store();
        let mut gw = MockGateway::new();
        let mut path = Vec::new();
        let rows = Exporter::new(&m, &c, s)
            .export_table(&mut gw, "ref", &[], 0, &mut path)
            .unwrap();
        assert!(rows.is_empty());
        assert!(gw.executed().is_empty());
    }

    #[test]
    fn test_ordering_falls_back_to_first_column() {
        let m = model(r#"[{"alias":"t","tableName":"t"}]"#);
        let c = plain_structure(&[("t", &["created", "label"])]);
        let (_dir, s) = store();
        let mut gw = MockGateway::new();
        gw.expect("order by \"created\" asc", vec![]);
        Exporter::new(&m, &c, s).export_all(&mut gw, &[]).unwrap();
        gw.verify_done();
    }

    #[test]
    fn test_binary_payload_named_by_business_key() {
        let m = model(
            r#"[{"alias":"doc","tableName":"documents","technicalKey":"doc_id","businessKey":"uuid"}]"#,
        );
        let c = catalog(
            r#"{"documents":{
                "attributes":[
                    {"field":"doc_id","type":"serial","isPrimaryKey":true},
                    {"field":"uuid","type":"character varying(36)"},
                    {"field":"content","type":"bytea"}],
                "binaryFields":["content"]}}"#,
        );
        let (dir, s) = store();

        let mut gw = MockGateway::new();
        gw.expect(
            "from \"documents\"",
            vec![row(&[
                ("doc_id", Value::Int(4)),
                ("uuid", Value::Text("D-001".into())),
            ])],
        );
        gw.expect(
            "select \"content\" from \"documents\" where \"doc_id\" = :key",
            vec![row(&[("content", Value::Bytes(vec![1, 2, 3]))])],
        );

        let data = Exporter::new(&m, &c, s).export_all(&mut gw, &[]).unwrap();
        gw.verify_done();

        // Payload lands in the store, never in the record tree.
        assert!(data["doc"][0].get("content").is_none());
        let payload =
            std::fs::read(dir.path().join("binary").join("documents-content-D-001.bin")).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_binary_skipped_without_business_value() {
        let m = model(
            r#"[{"alias":"doc","tableName":"documents","technicalKey":"doc_id","businessKey":"uuid"}]"#,
        );
        let c = catalog(
            r#"{"documents":{
                "attributes":[
                    {"field":"doc_id","type":"serial"},
                    {"field":"uuid","type":"text"},
                    {"field":"content","type":"bytea"}],
                "binaryFields":["content"]}}"#,
        );
        let (dir, s) = store();

        let mut gw = MockGateway::new();
        gw.expect(
            "from \"documents\"",
            vec![row(&[("doc_id", Value::Int(4)), ("uuid", Value::Null)])],
        );

        Exporter::new(&m, &c, s).export_all(&mut gw, &[]).unwrap();
        gw.verify_done();
        assert!(!dir.path().join("binary").exists());
    }

    #[test]
    fn test_cyclic_model_fails_instead_of_recursing() {
        let m = model(
            r#"[
            {"alias":"a","tableName":"a","technicalKey":"a_id","children":[{"alias":"b"}]},
            {"alias":"b","tableName":"b","technicalKey":"b_id","parentKey":"a_id","children":[{"alias":"a"}]}
        ]"#,
        );
        let c = plain_structure(&[("a", &["a_id"]), ("b", &["b_id", "a_id"])]);
        let (_dir, s) = store();

        let mut gw = MockGateway::new();
        gw.expect("from \"a\"", vec![row(&[("a_id", Value::Int(1))])]);
        gw.expect("from \"b\"", vec![row(&[("b_id", Value::Int(2)), ("a_id", Value::Int(1))])]);

        let err = Exporter::new(&m, &c, s).export_all(&mut gw, &[]).unwrap_err();
        assert!(matches!(err, ExchangeError::Model(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_alias_performs_no_reads() {
        let m = model(r#"[{"alias":"a","tableName":"a"}]"#);
        let c = plain_structure(&[("a", &["a_id"])]);
        let (_dir, s) = store();
        let mut gw = MockGateway::new();
        let mut path = Vec::new();
        let err = Exporter::new(&m, &c, s)
            .export_table(&mut gw, "ghost", &[], 0, &mut path)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Model(_)));
        assert!(gw.executed().is_empty());
    }
}
