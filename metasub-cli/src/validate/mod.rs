//! Row validation
//!
//! Two stages, both running before anything touches the network:
//! - `audit_cell` normalizes and type-checks a single cell against the
//!   category schema
//! - `audit_row` checks accession shape and the category's cross-field
//!   rules on the assembled record
//!
//! Validation is all-or-nothing at the batch level: every problem across
//! the whole workbook is collected into one report before the run aborts.

pub mod rules;

use crate::batch::{Batch, CategoryBatch, Record};
use crate::catalog::{CategorySchema, SchemaCatalog};
use crate::sheet::{RawSheet, SheetCell, excel_serial_to_date};

/// A single cell failed normalization; row-fatal, scanning continues
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    RequiredField { field: String },
    InvalidChoice { field: String, value: String },
    NotANumber { field: String, value: String },
    NotADate { field: String, value: String },
    NotABoolean { field: String, value: String },
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellError::RequiredField { field } => {
                write!(f, "required field {} is empty", field)
            }
            CellError::InvalidChoice { field, value } => {
                write!(f, "{} is not an accepted value for {}", value, field)
            }
            CellError::NotANumber { field, value } => {
                write!(f, "{} expects a number, got {}", field, value)
            }
            CellError::NotADate { field, value } => {
                write!(f, "{} expects a date, got {}", field, value)
            }
            CellError::NotABoolean { field, value } => {
                write!(f, "{} expects TRUE or FALSE, got {}", field, value)
            }
        }
    }
}

impl std::error::Error for CellError {}

/// A cross-field rule failed on an assembled row; row-fatal
#[derive(Debug, Clone)]
pub struct RowRuleError {
    pub category: String,
    pub message: String,
}

impl RowRuleError {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RowRuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for RowRuleError {}

/// What a cell turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum AuditedCell {
    /// A schema field with its normalized value
    Field {
        name: String,
        value: serde_json::Value,
    },
    UserAccession(String),
    SystemAccession(String),
    /// A relationship column, split into its target accessions
    Connection {
        name: String,
        target_category: String,
        accessions: Vec<String>,
    },
    /// An empty optional cell, nothing to record
    Blank,
    /// The column header means nothing to this category's schema
    Unmapped,
}

/// Normalize one cell against the category schema.
///
/// Headers that map to neither a field nor a connection come back as
/// `Unmapped` and do not abort the row; the worksheet reader has already
/// warned about them once.
pub fn audit_cell(
    schema: &CategorySchema,
    display_label: &str,
    cell: &SheetCell,
) -> Result<AuditedCell, CellError> {
    // older templates title-case the user accession header
    let label = match display_label {
        "User Accession" => "User accession",
        other => other,
    };

    if let Some(connection) = schema.connection_by_label(label) {
        let text = cell.as_text();
        let accessions = if text.is_empty() || text == "NA" {
            Vec::new()
        } else {
            text.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        return Ok(AuditedCell::Connection {
            name: connection.name.clone(),
            target_category: connection.target_category.clone(),
            accessions,
        });
    }

    let Some(field) = schema.field_by_label(label) else {
        return Ok(AuditedCell::Unmapped);
    };

    let Some(value) = coerce_field(field, cell)? else {
        return Ok(AuditedCell::Blank);
    };

    match field.name.as_str() {
        "accession" => Ok(AuditedCell::SystemAccession(as_plain_text(&value))),
        "user_accession" => Ok(AuditedCell::UserAccession(as_plain_text(&value))),
        _ => Ok(AuditedCell::Field {
            name: field.name.clone(),
            value,
        }),
    }
}

fn as_plain_text(value: &serde_json::Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// Apply the type coercion rules of one field. `Ok(None)` means the cell is
/// an empty optional and nothing should be recorded.
fn coerce_field(
    field: &crate::api::FieldDef,
    cell: &SheetCell,
) -> Result<Option<serde_json::Value>, CellError> {
    use crate::api::FieldType;

    // accession cells normalize NA and empty to "", never to a default
    if field.name == "accession" || field.name == "user_accession" {
        let text = cell.as_text();
        let text = if text == "NA" { String::new() } else { text };
        return Ok(Some(serde_json::Value::String(text)));
    }

    // spreadsheet booleans become literal TRUE/FALSE strings whatever the
    // declared column type
    if let SheetCell::Bool(b) = cell {
        let text = if *b { "TRUE" } else { "FALSE" };
        return Ok(Some(serde_json::Value::String(text.to_string())));
    }

    let value = match field.data_type {
        FieldType::Text | FieldType::Textarea => match cell {
            SheetCell::Empty => return handle_empty(field),
            SheetCell::Number(n) => {
                Some(serde_json::Value::String(trim_trailing_zeros(&n.to_string())))
            }
            SheetCell::Date(d) => Some(serde_json::Value::String(d.format("%Y-%m-%d").to_string())),
            SheetCell::Text(s) => {
                check_choice(field, s)?;
                Some(serde_json::Value::String(s.clone()))
            }
            SheetCell::Bool(_) => None,
        },
        FieldType::Date => match cell {
            SheetCell::Empty => {
                if field.required {
                    return Err(CellError::RequiredField {
                        field: field.name.clone(),
                    });
                }
                Some(serde_json::Value::String("1970-01-01".to_string()))
            }
            SheetCell::Text(s) if s == "NA" => {
                Some(serde_json::Value::String("1970-01-01".to_string()))
            }
            SheetCell::Date(d) => Some(serde_json::Value::String(d.format("%Y-%m-%d").to_string())),
            SheetCell::Number(n) => match excel_serial_to_date(*n) {
                Some(d) => Some(serde_json::Value::String(d.format("%Y-%m-%d").to_string())),
                None => {
                    return Err(CellError::NotADate {
                        field: field.name.clone(),
                        value: cell.as_text(),
                    });
                }
            },
            SheetCell::Text(s) => Some(serde_json::Value::String(s.clone())),
            SheetCell::Bool(_) => None,
        },
        FieldType::Number | FieldType::Float => match cell {
            SheetCell::Number(n) => Some(number_value(round2(*n))),
            SheetCell::Empty => {
                if field.required {
                    return Err(CellError::RequiredField {
                        field: field.name.clone(),
                    });
                }
                log::info!("treating empty {} as -1", field.name);
                Some(serde_json::json!(-1))
            }
            SheetCell::Text(s) if s == "NA" => {
                log::info!("treating NA as -1 for {}", field.name);
                Some(serde_json::json!(-1))
            }
            _ => {
                return Err(CellError::NotANumber {
                    field: field.name.clone(),
                    value: cell.as_text(),
                });
            }
        },
        FieldType::Textnumber => match cell {
            SheetCell::Empty => return handle_empty(field),
            SheetCell::Number(n) => Some(number_value(round2(*n))),
            SheetCell::Text(s) => {
                check_choice(field, s)?;
                Some(serde_json::Value::String(s.clone()))
            }
            SheetCell::Date(d) => Some(serde_json::Value::String(d.format("%Y-%m-%d").to_string())),
            SheetCell::Bool(_) => None,
        },
        FieldType::Boolean => match cell {
            SheetCell::Empty => return handle_empty(field),
            SheetCell::Text(s) => {
                let upper = s.to_uppercase();
                if upper == "TRUE" || upper == "FALSE" {
                    Some(serde_json::Value::String(upper))
                } else {
                    return Err(CellError::NotABoolean {
                        field: field.name.clone(),
                        value: s.clone(),
                    });
                }
            }
            _ => {
                return Err(CellError::NotABoolean {
                    field: field.name.clone(),
                    value: cell.as_text(),
                });
            }
        },
    };

    Ok(value)
}

fn handle_empty(field: &crate::api::FieldDef) -> Result<Option<serde_json::Value>, CellError> {
    if field.required {
        Err(CellError::RequiredField {
            field: field.name.clone(),
        })
    } else {
        Ok(None)
    }
}

fn check_choice(field: &crate::api::FieldDef, value: &str) -> Result<(), CellError> {
    if field.values_restricted
        && !field.values.is_empty()
        && !value.is_empty()
        && !field.values.iter().any(|v| v == value)
    {
        return Err(CellError::InvalidChoice {
            field: field.name.clone(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

fn number_value(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::json!(n as i64)
    } else {
        serde_json::json!(n)
    }
}

/// "5.10" -> "5.1", "5.0" -> "5", "500" -> "500"
fn trim_trailing_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// Check the general accession-shape rule, then the category's cross-field
/// rules, on a fully assembled record.
pub fn audit_row(schema: &CategorySchema, record: &Record) -> Result<(), RowRuleError> {
    check_accession_shape(schema, record)?;
    rules::rule_for(&schema.sheet_name)(record)
}

fn check_accession_shape(schema: &CategorySchema, record: &Record) -> Result<(), RowRuleError> {
    let user = &record.user_accession;
    let system = &record.system_accession;

    if !user.is_empty() && !user.starts_with(&schema.user_prefix) {
        return Err(RowRuleError::new(
            &schema.sheet_name,
            format!(
                "user accession {} does not start with {}",
                user, schema.user_prefix
            ),
        ));
    }
    if !system.is_empty() && !system.starts_with(&schema.system_prefix) {
        return Err(RowRuleError::new(
            &schema.sheet_name,
            format!(
                "system accession {} does not start with {}",
                system, schema.system_prefix
            ),
        ));
    }
    if user.is_empty() && system.is_empty() {
        return Err(RowRuleError::new(
            &schema.sheet_name,
            "record carries neither a user nor a system accession",
        ));
    }
    Ok(())
}

/// One problem found while validating, with its workbook position
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub category: String,
    pub row: usize,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} row {}: {}", self.category, self.row, self.message)
    }
}

/// Every problem found across the workbook; produced instead of a batch
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{}", issue)?;
        }
        write!(f, "{} validation issue(s)", self.issues.len())
    }
}

impl std::error::Error for ValidationReport {}

/// Validate every row of every worksheet and assemble the batch.
///
/// Nothing is submitted unless every row passes: a single issue anywhere
/// fails the whole workbook, but scanning always continues so the report
/// covers every problem at once.
pub fn audit_workbook(
    catalog: &SchemaCatalog,
    sheets: &[RawSheet],
) -> Result<Batch, ValidationReport> {
    let mut issues = Vec::new();
    let mut batch = Batch::new();

    for category in catalog.submission_order() {
        let Some(raw) = sheets.iter().find(|s| &s.category == category) else {
            continue;
        };
        let Ok(schema) = catalog.schema_for(category) else {
            continue;
        };

        let mut category_batch = CategoryBatch::new(category.clone());
        for row in &raw.rows {
            let mut record = Record::new(category.clone());
            let mut row_ok = true;

            for (col, cell) in row.cells.iter().enumerate() {
                let Some(header) = raw.headers.get(col) else {
                    continue;
                };
                if header.is_empty() {
                    continue;
                }
                match audit_cell(schema, header, cell) {
                    Ok(AuditedCell::Field { name, value }) => record.set_field(name, value),
                    Ok(AuditedCell::UserAccession(value)) => record.user_accession = value,
                    Ok(AuditedCell::SystemAccession(value)) => record.system_accession = value,
                    Ok(AuditedCell::Connection {
                        name,
                        target_category,
                        accessions,
                    }) => {
                        if !accessions.is_empty() {
                            record.add_connection(name, target_category, accessions);
                        }
                    }
                    Ok(AuditedCell::Blank) | Ok(AuditedCell::Unmapped) => {}
                    Err(e) => {
                        issues.push(ValidationIssue {
                            category: category.clone(),
                            row: row.row_number,
                            message: e.to_string(),
                        });
                        row_ok = false;
                    }
                }
            }

            if let Err(e) = audit_row(schema, &record) {
                issues.push(ValidationIssue {
                    category: category.clone(),
                    row: row.row_number,
                    message: e.message,
                });
                row_ok = false;
            }

            if row_ok {
                category_batch.records.push(record);
            }
        }
        batch.push(category_batch);
    }

    if issues.is_empty() {
        Ok(batch)
    } else {
        Err(ValidationReport { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ConnectionDef, FieldDef, FieldType};
    use chrono::NaiveDate;

    fn make_field(name: &str, label: &str, data_type: FieldType, required: bool) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            display_label: label.to_string(),
            data_type,
            required,
            placeholder: String::new(),
            values: Vec::new(),
            values_restricted: false,
        }
    }

    fn make_restricted(name: &str, label: &str, values: &[&str]) -> FieldDef {
        FieldDef {
            values: values.iter().map(|v| v.to_string()).collect(),
            values_restricted: true,
            ..make_field(name, label, FieldType::Text, false)
        }
    }

    fn make_schema() -> CategorySchema {
        CategorySchema {
            sheet_name: "Biosample".to_string(),
            category: "biosample".to_string(),
            collection: "biosamples".to_string(),
            fields: vec![
                make_field("accession", "System Accession", FieldType::Text, false),
                make_field("user_accession", "User accession", FieldType::Text, false),
                make_field("sample_alias", "Sample Alias", FieldType::Text, true),
                make_field("collection_date", "Collection Date", FieldType::Date, false),
                make_field("weight", "Weight", FieldType::Number, false),
                make_field("frozen", "Frozen", FieldType::Boolean, false),
                make_restricted("tissue", "Tissue", &["Liver", "Blood"]),
            ],
            connections: vec![ConnectionDef {
                name: "collected_by".to_string(),
                display_label: "Lab".to_string(),
                target_category: "lab".to_string(),
                target_collection: "labs".to_string(),
                placeholder: String::new(),
                allow_multiple: false,
                required: false,
            }],
            system_prefix: "SYSBSM".to_string(),
            user_prefix: "USRBSM".to_string(),
        }
    }

    #[test]
    fn test_boolean_cell_becomes_literal_string() {
        let schema = make_schema();
        let audited = audit_cell(&schema, "Frozen", &SheetCell::Bool(true)).unwrap();
        assert_eq!(
            audited,
            AuditedCell::Field {
                name: "frozen".to_string(),
                value: serde_json::json!("TRUE"),
            }
        );
    }

    #[test]
    fn test_numeric_text_strips_trailing_zeros() {
        let schema = make_schema();
        let audited = audit_cell(&schema, "Sample Alias", &SheetCell::Number(5.0)).unwrap();
        assert_eq!(
            audited,
            AuditedCell::Field {
                name: "sample_alias".to_string(),
                value: serde_json::json!("5"),
            }
        );
    }

    #[test]
    fn test_na_date_becomes_epoch() {
        let schema = make_schema();
        let audited = audit_cell(
            &schema,
            "Collection Date",
            &SheetCell::Text("NA".to_string()),
        )
        .unwrap();
        assert_eq!(
            audited,
            AuditedCell::Field {
                name: "collection_date".to_string(),
                value: serde_json::json!("1970-01-01"),
            }
        );
    }

    #[test]
    fn test_empty_optional_date_becomes_epoch() {
        let schema = make_schema();
        let audited = audit_cell(&schema, "Collection Date", &SheetCell::Empty).unwrap();
        assert_eq!(
            audited,
            AuditedCell::Field {
                name: "collection_date".to_string(),
                value: serde_json::json!("1970-01-01"),
            }
        );
    }

    #[test]
    fn test_date_cell_formats_iso() {
        let schema = make_schema();
        let date = NaiveDate::from_ymd_opt(2021, 6, 15).unwrap();
        let audited = audit_cell(&schema, "Collection Date", &SheetCell::Date(date)).unwrap();
        assert_eq!(
            audited,
            AuditedCell::Field {
                name: "collection_date".to_string(),
                value: serde_json::json!("2021-06-15"),
            }
        );
    }

    #[test]
    fn test_na_number_becomes_minus_one() {
        let schema = make_schema();
        let audited = audit_cell(&schema, "Weight", &SheetCell::Text("NA".to_string())).unwrap();
        assert_eq!(
            audited,
            AuditedCell::Field {
                name: "weight".to_string(),
                value: serde_json::json!(-1),
            }
        );
    }

    #[test]
    fn test_number_rounds_to_two_decimals() {
        let schema = make_schema();
        let audited = audit_cell(&schema, "Weight", &SheetCell::Number(12.3456)).unwrap();
        assert_eq!(
            audited,
            AuditedCell::Field {
                name: "weight".to_string(),
                value: serde_json::json!(12.35),
            }
        );
    }

    #[test]
    fn test_text_in_number_field_is_an_error() {
        let schema = make_schema();
        let result = audit_cell(&schema, "Weight", &SheetCell::Text("heavy".to_string()));
        assert!(matches!(result, Err(CellError::NotANumber { .. })));
    }

    #[test]
    fn test_required_field_empty_is_an_error() {
        let schema = make_schema();
        let result = audit_cell(&schema, "Sample Alias", &SheetCell::Empty);
        assert_eq!(
            result,
            Err(CellError::RequiredField {
                field: "sample_alias".to_string()
            })
        );
    }

    #[test]
    fn test_restricted_choice_membership() {
        let schema = make_schema();
        assert!(audit_cell(&schema, "Tissue", &SheetCell::Text("Liver".to_string())).is_ok());
        let result = audit_cell(&schema, "Tissue", &SheetCell::Text("Spleen".to_string()));
        assert!(matches!(result, Err(CellError::InvalidChoice { .. })));
    }

    #[test]
    fn test_unknown_header_is_unmapped_not_fatal() {
        let schema = make_schema();
        let audited =
            audit_cell(&schema, "Mystery Column", &SheetCell::Text("x".to_string())).unwrap();
        assert_eq!(audited, AuditedCell::Unmapped);
    }

    #[test]
    fn test_accession_cells_normalize_na_to_empty() {
        let schema = make_schema();
        let audited = audit_cell(
            &schema,
            "System Accession",
            &SheetCell::Text("NA".to_string()),
        )
        .unwrap();
        assert_eq!(audited, AuditedCell::SystemAccession(String::new()));

        let audited = audit_cell(&schema, "User accession", &SheetCell::Empty).unwrap();
        assert_eq!(audited, AuditedCell::UserAccession(String::new()));
    }

    #[test]
    fn test_connection_cell_splits_targets() {
        let schema = make_schema();
        let audited = audit_cell(
            &schema,
            "Lab",
            &SheetCell::Text("USRLAB001, SYSLAB002".to_string()),
        )
        .unwrap();
        assert_eq!(
            audited,
            AuditedCell::Connection {
                name: "collected_by".to_string(),
                target_category: "lab".to_string(),
                accessions: vec!["USRLAB001".to_string(), "SYSLAB002".to_string()],
            }
        );
    }

    #[test]
    fn test_connection_na_means_no_targets() {
        let schema = make_schema();
        let audited = audit_cell(&schema, "Lab", &SheetCell::Text("NA".to_string())).unwrap();
        assert_eq!(
            audited,
            AuditedCell::Connection {
                name: "collected_by".to_string(),
                target_category: "lab".to_string(),
                accessions: Vec::new(),
            }
        );
    }

    #[test]
    fn test_accession_shape_rules() {
        let schema = make_schema();

        let mut record = Record::new("Biosample");
        record.user_accession = "USRBSM001".to_string();
        assert!(audit_row(&schema, &record).is_ok());

        record.system_accession = "WRONG001".to_string();
        assert!(audit_row(&schema, &record).is_err());

        let empty = Record::new("Biosample");
        assert!(audit_row(&schema, &empty).is_err());
    }

    #[test]
    fn test_trim_trailing_zeros() {
        assert_eq!(trim_trailing_zeros("5.10"), "5.1");
        assert_eq!(trim_trailing_zeros("5.0"), "5");
        assert_eq!(trim_trailing_zeros("500"), "500");
        assert_eq!(trim_trailing_zeros("5.25"), "5.25");
    }
}
