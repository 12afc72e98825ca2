//! Cross-field rules per category
//!
//! Each category with extra business rules registers an evaluator in a
//! strategy map; categories without an entry get the no-op evaluator. Every
//! table here is closed: unknown techniques, classifications or run types
//! fall through without restriction.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::RowRuleError;
use crate::batch::Record;

pub type RuleFn = fn(&Record) -> Result<(), RowRuleError>;

static RULES: Lazy<HashMap<&'static str, RuleFn>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, RuleFn> = HashMap::new();
    map.insert("Assay", assay_rules as RuleFn);
    map.insert("Biosample", biosample_rules);
    map.insert("File", file_rules);
    map.insert("Treatment", treatment_rules);
    map
});

/// The evaluator registered for a category, or the no-op default
pub fn rule_for(category: &str) -> RuleFn {
    RULES.get(category).copied().unwrap_or(no_extra_rule)
}

fn no_extra_rule(_record: &Record) -> Result<(), RowRuleError> {
    Ok(())
}

/// Values counting as "not filled in": the empty string, the NA sentinel,
/// the -1 numeric sentinel and the epoch date sentinel.
fn field_is_set(record: &Record, name: &str) -> bool {
    match record.fields.get(name) {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => {
            !s.is_empty() && s != "NA" && s != "1970-01-01"
        }
        Some(serde_json::Value::Number(n)) => n.as_f64() != Some(-1.0),
        Some(_) => true,
    }
}

fn field_text<'a>(record: &'a Record, name: &str) -> Option<&'a str> {
    record.field_str(name).filter(|s| !s.is_empty() && *s != "NA")
}

/// Whether any target accession is recorded under a connection name
fn connection_is_set(record: &Record, name: &str) -> bool {
    record
        .relationships
        .get(name)
        .map(|targets| targets.values().any(|accessions| !accessions.is_empty()))
        .unwrap_or(false)
}

/// Target categories a connection points to
fn connection_targets<'a>(record: &'a Record, name: &str) -> Vec<&'a str> {
    record
        .relationships
        .get(name)
        .map(|targets| {
            targets
                .iter()
                .filter(|(_, accessions)| !accessions.is_empty())
                .map(|(category, _)| category.as_str())
                .collect()
        })
        .unwrap_or_default()
}

/// Input material and antibody expectations per assay technique
fn assay_expectation(technique: &str) -> Option<(&'static str, bool)> {
    match technique {
        "ChIP-seq" => Some(("biosample", true)),
        "ATAC-seq" => Some(("biosample", false)),
        "RNA-seq" => Some(("library", false)),
        "WGBS" => Some(("library", false)),
        _ => None,
    }
}

fn assay_rules(record: &Record) -> Result<(), RowRuleError> {
    let Some(technique) = field_text(record, "technique") else {
        return Ok(());
    };
    let Some((expected_input, antibody_required)) = assay_expectation(technique) else {
        return Ok(());
    };

    for target in connection_targets(record, "assay_input") {
        if target != expected_input {
            return Err(RowRuleError::new(
                &record.category,
                format!(
                    "assay input must point to a {} for technique {}, found {}",
                    expected_input, technique, target
                ),
            ));
        }
    }

    let antibody_set = field_is_set(record, "antibody");
    if antibody_required && !antibody_set {
        return Err(RowRuleError::new(
            &record.category,
            format!("technique {} requires an antibody", technique),
        ));
    }
    if !antibody_required && antibody_set {
        return Err(RowRuleError::new(
            &record.category,
            format!("technique {} does not take an antibody", technique),
        ));
    }
    Ok(())
}

const TARGET_TISSUES: [&str; 8] = [
    "Liver", "Heart", "Kidney", "Lung", "Brain", "Gonad", "Adipose", "Muscle",
];
const SURROGATE_TISSUES: [&str; 5] = ["Blood", "Cord blood", "Placenta", "Buccal swab", "Skin"];

/// Culture fields that only make sense together
const CULTURE_TRIO: [&str; 3] = ["culture_type", "passage_number", "culture_duration"];

fn biosample_rules(record: &Record) -> Result<(), RowRuleError> {
    if let (Some(classification), Some(tissue)) = (
        field_text(record, "tissue_classification"),
        field_text(record, "tissue"),
    ) {
        let allowed: &[&str] = match classification {
            "Target" => &TARGET_TISSUES,
            "Surrogate" => &SURROGATE_TISSUES,
            _ => &[],
        };
        if !allowed.is_empty() && !allowed.contains(&tissue) {
            return Err(RowRuleError::new(
                &record.category,
                format!(
                    "tissue {} is not a valid {} tissue",
                    tissue,
                    classification.to_lowercase()
                ),
            ));
        }
    }

    let set_count = CULTURE_TRIO
        .iter()
        .filter(|name| field_is_set(record, name))
        .count();
    if set_count != 0 && set_count != CULTURE_TRIO.len() {
        return Err(RowRuleError::new(
            &record.category,
            "culture type, passage number and culture duration must be filled in together",
        ));
    }
    Ok(())
}

fn file_rules(record: &Record) -> Result<(), RowRuleError> {
    let paired = field_text(record, "run_type") == Some("paired-end");
    let pair_set = field_is_set(record, "pair");
    let mate_linked = connection_is_set(record, "paired_file");

    if paired && !(pair_set && mate_linked) {
        return Err(RowRuleError::new(
            &record.category,
            "paired-end files need a pair value and a paired file connection",
        ));
    }
    if !paired && (pair_set || mate_linked) {
        return Err(RowRuleError::new(
            &record.category,
            "pair value and paired file connection are only valid for paired-end files",
        ));
    }
    Ok(())
}

fn treatment_rules(record: &Record) -> Result<(), RowRuleError> {
    let challenged = field_is_set(record, "challenge_after_exposure");
    let diet_linked = connection_is_set(record, "challenge_diet");

    if challenged && !diet_linked {
        return Err(RowRuleError::new(
            &record.category,
            "challenge after exposure requires a challenge diet connection",
        ));
    }
    if !challenged && diet_linked {
        return Err(RowRuleError::new(
            &record.category,
            "a challenge diet connection requires challenge after exposure to be filled in",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_record(category: &str) -> Record {
        let mut record = Record::new(category);
        record.user_accession = format!("USR{}001", &category.to_uppercase()[..3]);
        record
    }

    #[test]
    fn test_default_rule_is_noop() {
        let record = make_record("Litter");
        assert!(rule_for("Litter")(&record).is_ok());
        assert!(rule_for("Gadget")(&record).is_ok());
    }

    #[test]
    fn test_biosample_target_tissue_accepted() {
        let mut record = make_record("Biosample");
        record.set_field("tissue_classification", json!("Target"));
        record.set_field("tissue", json!("Liver"));
        assert!(rule_for("Biosample")(&record).is_ok());
    }

    #[test]
    fn test_biosample_surrogate_tissue_rejected() {
        let mut record = make_record("Biosample");
        record.set_field("tissue_classification", json!("Surrogate"));
        record.set_field("tissue", json!("Liver"));
        let err = rule_for("Biosample")(&record).unwrap_err();
        assert!(err.message.contains("Liver"));
    }

    #[test]
    fn test_biosample_unknown_classification_unrestricted() {
        let mut record = make_record("Biosample");
        record.set_field("tissue_classification", json!("Archival"));
        record.set_field("tissue", json!("Liver"));
        assert!(rule_for("Biosample")(&record).is_ok());
    }

    #[test]
    fn test_biosample_culture_trio_all_or_none() {
        let mut record = make_record("Biosample");
        record.set_field("culture_type", json!("primary"));
        assert!(rule_for("Biosample")(&record).is_err());

        record.set_field("passage_number", json!(3));
        record.set_field("culture_duration", json!(14));
        assert!(rule_for("Biosample")(&record).is_ok());

        let empty = make_record("Biosample");
        assert!(rule_for("Biosample")(&empty).is_ok());
    }

    #[test]
    fn test_biosample_na_sentinels_count_as_unset() {
        let mut record = make_record("Biosample");
        record.set_field("culture_type", json!("NA"));
        record.set_field("passage_number", json!(-1));
        record.set_field("culture_duration", json!(-1));
        assert!(rule_for("Biosample")(&record).is_ok());
    }

    #[test]
    fn test_file_paired_end_needs_pair_and_mate() {
        let mut record = make_record("File");
        record.set_field("run_type", json!("paired-end"));
        assert!(rule_for("File")(&record).is_err());

        record.set_field("pair", json!("1"));
        assert!(rule_for("File")(&record).is_err());

        record.add_connection("paired_file", "file", vec!["USRFLE002".to_string()]);
        assert!(rule_for("File")(&record).is_ok());
    }

    #[test]
    fn test_file_single_end_must_not_pair() {
        let mut record = make_record("File");
        record.set_field("run_type", json!("single-end"));
        assert!(rule_for("File")(&record).is_ok());

        record.set_field("pair", json!("1"));
        assert!(rule_for("File")(&record).is_err());
    }

    #[test]
    fn test_treatment_challenge_diet_iff_challenged() {
        let mut record = make_record("Treatment");
        assert!(rule_for("Treatment")(&record).is_ok());

        record.set_field("challenge_after_exposure", json!("high-fat rechallenge"));
        assert!(rule_for("Treatment")(&record).is_err());

        record.add_connection("challenge_diet", "diet", vec!["USRDIE001".to_string()]);
        assert!(rule_for("Treatment")(&record).is_ok());

        let mut only_link = make_record("Treatment");
        only_link.add_connection("challenge_diet", "diet", vec!["USRDIE001".to_string()]);
        assert!(rule_for("Treatment")(&only_link).is_err());
    }

    #[test]
    fn test_assay_technique_restricts_input_category() {
        let mut record = make_record("Assay");
        record.set_field("technique", json!("RNA-seq"));
        record.add_connection("assay_input", "library", vec!["USRLIB001".to_string()]);
        assert!(rule_for("Assay")(&record).is_ok());

        let mut wrong = make_record("Assay");
        wrong.set_field("technique", json!("RNA-seq"));
        wrong.add_connection("assay_input", "biosample", vec!["USRBSM001".to_string()]);
        assert!(rule_for("Assay")(&wrong).is_err());
    }

    #[test]
    fn test_assay_antibody_pairing() {
        let mut chip = make_record("Assay");
        chip.set_field("technique", json!("ChIP-seq"));
        chip.add_connection("assay_input", "biosample", vec!["USRBSM001".to_string()]);
        assert!(rule_for("Assay")(&chip).is_err());

        chip.set_field("antibody", json!("H3K27ac"));
        assert!(rule_for("Assay")(&chip).is_ok());

        let mut atac = make_record("Assay");
        atac.set_field("technique", json!("ATAC-seq"));
        atac.set_field("antibody", json!("H3K27ac"));
        assert!(rule_for("Assay")(&atac).is_err());
    }

    #[test]
    fn test_assay_unknown_technique_unrestricted() {
        let mut record = make_record("Assay");
        record.set_field("technique", json!("long-read"));
        record.add_connection("assay_input", "biosample", vec!["USRBSM001".to_string()]);
        assert!(rule_for("Assay")(&record).is_ok());
    }
}
