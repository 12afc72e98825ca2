//! Batch data model
//!
//! A `Batch` holds every record read from one workbook, grouped by category
//! in submission order. Records carry their two identity slots (user and
//! system accession) explicitly; the `AccessionTranslationTable` is built
//! between the submit and link phases to rewrite relationship targets from
//! placeholder aliases to authoritative accessions.

use std::collections::{BTreeMap, HashMap};

use crate::api::RelationshipState;

/// Where a record stands in the submit protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionOutcome {
    #[default]
    Unsubmitted,
    /// Created this run, accession freshly minted
    Submitted,
    /// Existed before this run, fields updated in place
    Updated,
    /// The store refused the create or update call
    Failed,
}

impl SubmissionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionOutcome::Unsubmitted)
    }
}

impl std::fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SubmissionOutcome::Unsubmitted => "unsubmitted",
            SubmissionOutcome::Submitted => "submitted",
            SubmissionOutcome::Updated => "updated",
            SubmissionOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One row of one category worksheet
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// Category sheet name (e.g., "Biosample")
    pub category: String,
    /// Field name -> normalized value, identity fields excluded
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Connection name -> target category -> target accessions
    pub relationships: RelationshipState,
    /// Caller-chosen placeholder accession, empty when not provided
    pub user_accession: String,
    /// Store-issued accession, empty until the record is persisted
    pub system_accession: String,
    /// Original user accession, kept when a fresh placeholder is synthesized
    pub prior_user_accession: String,
    pub outcome: SubmissionOutcome,
}

impl Record {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn add_connection(
        &mut self,
        connection_name: impl Into<String>,
        target_category: impl Into<String>,
        accessions: Vec<String>,
    ) {
        self.relationships
            .entry(connection_name.into())
            .or_default()
            .insert(target_category.into(), accessions);
    }

    /// Field value as text, when present and textual
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    /// Outcomes only move away from `Unsubmitted`, never between terminal states
    pub fn mark(&mut self, outcome: SubmissionOutcome) {
        if self.outcome.is_terminal() {
            log::warn!(
                "ignoring outcome change {} -> {} for {}",
                self.outcome,
                outcome,
                self.accession_pair()
            );
            return;
        }
        self.outcome = outcome;
    }

    /// Swap in a synthesized placeholder, keeping the original as an alias
    pub fn replace_user_accession(&mut self, fresh: String) {
        self.prior_user_accession = std::mem::replace(&mut self.user_accession, fresh);
    }

    /// "user/system" accession pair for log lines
    pub fn accession_pair(&self) -> String {
        format!("{}/{}", self.user_accession, self.system_accession)
    }

    /// Request body for create/update calls: fields plus the user accession
    pub fn payload(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut body: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.user_accession.is_empty() {
            body.insert(
                "user_accession".to_string(),
                serde_json::Value::String(self.user_accession.clone()),
            );
        }
        body
    }
}

/// Records of one category, in worksheet row order
#[derive(Debug, Clone, Default)]
pub struct CategoryBatch {
    pub category: String,
    pub records: Vec<Record>,
}

impl CategoryBatch {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            records: Vec::new(),
        }
    }
}

/// The full workbook content, categories in submission order
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub categories: Vec<CategoryBatch>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category_batch: CategoryBatch) {
        self.categories.push(category_batch);
    }

    pub fn get(&self, category: &str) -> Option<&CategoryBatch> {
        self.categories.iter().find(|c| c.category == category)
    }

    pub fn remove_category(&mut self, category: &str) -> Option<CategoryBatch> {
        let index = self.categories.iter().position(|c| c.category == category)?;
        Some(self.categories.remove(index))
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.categories.iter().flat_map(|c| c.records.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.categories.iter().all(|c| c.records.is_empty())
    }

    /// Rewrite every relationship target found in the table; returns how
    /// many targets were rewritten.
    pub fn rewrite_relationships(&mut self, table: &AccessionTranslationTable) -> usize {
        let mut rewritten = 0;
        for category_batch in &mut self.categories {
            for record in &mut category_batch.records {
                for targets_by_category in record.relationships.values_mut() {
                    for accessions in targets_by_category.values_mut() {
                        for accession in accessions.iter_mut() {
                            if let Some(resolved) = table.resolve(accession) {
                                *accession = resolved.to_string();
                                rewritten += 1;
                            }
                        }
                    }
                }
            }
        }
        rewritten
    }
}

/// Alias -> system accession, built once after the submit phase
#[derive(Debug, Default)]
pub struct AccessionTranslationTable {
    map: HashMap<String, String>,
}

impl AccessionTranslationTable {
    /// Collect every known alias of every persisted record. Records without
    /// a system accession contribute nothing.
    pub fn from_batch(batch: &Batch) -> Self {
        let mut map = HashMap::new();
        for record in batch.records() {
            if record.system_accession.is_empty() {
                continue;
            }
            if !record.user_accession.is_empty() {
                map.insert(
                    record.user_accession.clone(),
                    record.system_accession.clone(),
                );
            }
            if !record.prior_user_accession.is_empty() {
                map.insert(
                    record.prior_user_accession.clone(),
                    record.system_accession.clone(),
                );
            }
        }
        Self { map }
    }

    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.map.get(alias).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(category: &str, user: &str, system: &str) -> Record {
        let mut record = Record::new(category);
        record.user_accession = user.to_string();
        record.system_accession = system.to_string();
        record
    }

    #[test]
    fn test_outcome_transitions_are_monotonic() {
        let mut record = make_record("Lab", "USRLAB001", "");
        assert_eq!(record.outcome, SubmissionOutcome::Unsubmitted);

        record.mark(SubmissionOutcome::Submitted);
        assert_eq!(record.outcome, SubmissionOutcome::Submitted);

        record.mark(SubmissionOutcome::Failed);
        assert_eq!(record.outcome, SubmissionOutcome::Submitted);
    }

    #[test]
    fn test_replace_user_accession_keeps_alias() {
        let mut record = make_record("Lab", "USRLAB001", "");
        record.replace_user_accession("USRLAB-f3a2".to_string());
        assert_eq!(record.user_accession, "USRLAB-f3a2");
        assert_eq!(record.prior_user_accession, "USRLAB001");
    }

    #[test]
    fn test_payload_includes_user_accession_but_not_system() {
        let mut record = make_record("Lab", "USRLAB001", "SYSLAB001");
        record.set_field("lab_name", serde_json::json!("Smith Lab"));

        let payload = record.payload();
        assert_eq!(payload.get("lab_name").unwrap(), "Smith Lab");
        assert_eq!(payload.get("user_accession").unwrap(), "USRLAB001");
        assert!(!payload.contains_key("accession"));
    }

    #[test]
    fn test_translation_table_maps_both_aliases() {
        let mut batch = Batch::new();
        let mut labs = CategoryBatch::new("Lab");

        let mut record = make_record("Lab", "USRLAB-fresh", "SYSLAB001");
        record.prior_user_accession = "USRLAB001".to_string();
        labs.records.push(record);
        labs.records.push(make_record("Lab", "USRLAB002", ""));
        batch.push(labs);

        let table = AccessionTranslationTable::from_batch(&batch);
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("USRLAB-fresh"), Some("SYSLAB001"));
        assert_eq!(table.resolve("USRLAB001"), Some("SYSLAB001"));
        assert_eq!(table.resolve("USRLAB002"), None);
    }

    #[test]
    fn test_rewrite_relationships() {
        let mut batch = Batch::new();

        let mut labs = CategoryBatch::new("Lab");
        labs.records.push(make_record("Lab", "USRLAB001", "SYSLAB001"));
        batch.push(labs);

        let mut samples = CategoryBatch::new("Biosample");
        let mut sample = make_record("Biosample", "USRBSM001", "SYSBSM001");
        sample.add_connection(
            "collected_by",
            "lab",
            vec!["USRLAB001".to_string(), "SYSLAB009".to_string()],
        );
        samples.records.push(sample);
        batch.push(samples);

        let table = AccessionTranslationTable::from_batch(&batch);
        let rewritten = batch.rewrite_relationships(&table);

        assert_eq!(rewritten, 1);
        let sample = &batch.get("Biosample").unwrap().records[0];
        let targets = &sample.relationships["collected_by"]["lab"];
        assert_eq!(targets, &vec!["SYSLAB001".to_string(), "SYSLAB009".to_string()]);
    }
}
