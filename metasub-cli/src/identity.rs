//! Identity reconciliation
//!
//! A batch arrives with any mix of user and system accessions; the store
//! holds the authoritative pairs. `reconcile` checks the batch against the
//! remote state for one category, fills in the missing half of every pair
//! it can, and rejects anything that would make identity ambiguous. After
//! it returns, no two records of the category share a non-empty accession
//! on either side.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::api::ExistingRecord;
use crate::batch::Record;
use crate::catalog::CategorySchema;

/// Identity in this category can no longer be trusted; its submission aborts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityConflictError {
    /// The remote store itself holds a duplicated accession
    CorruptRemote {
        category: String,
        accession: String,
    },
    /// A user/system pair in the batch contradicts the remote pair
    PairMismatch {
        category: String,
        user_accession: String,
        system_accession: String,
    },
    DuplicateUser {
        category: String,
        user_accession: String,
    },
    DuplicateSystem {
        category: String,
        system_accession: String,
    },
    /// A system accession in the batch does not exist remotely
    UnknownSystem {
        category: String,
        system_accession: String,
    },
}

impl std::fmt::Display for IdentityConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityConflictError::CorruptRemote {
                category,
                accession,
            } => write!(
                f,
                "the store holds duplicated accession {} in {}; contact the data coordination team",
                accession, category
            ),
            IdentityConflictError::PairMismatch {
                category,
                user_accession,
                system_accession,
            } => write!(
                f,
                "accession pair {}/{} in {} does not match the store",
                user_accession, system_accession, category
            ),
            IdentityConflictError::DuplicateUser {
                category,
                user_accession,
            } => write!(
                f,
                "user accession {} appears more than once in {}",
                user_accession, category
            ),
            IdentityConflictError::DuplicateSystem {
                category,
                system_accession,
            } => write!(
                f,
                "system accession {} appears more than once in {}",
                system_accession, category
            ),
            IdentityConflictError::UnknownSystem {
                category,
                system_accession,
            } => write!(
                f,
                "system accession {} in {} does not exist in the store",
                system_accession, category
            ),
        }
    }
}

impl std::error::Error for IdentityConflictError {}

/// Reconcile one category's records against the remote state.
///
/// `existing` must already be filtered to the submitting user's records.
/// In dry-run mode every creation candidate gets a freshly synthesized
/// user accession so test submissions never collide in the shared
/// identity space; the original value is kept as an alias.
pub fn reconcile(
    schema: &CategorySchema,
    records: &mut [Record],
    existing: &[ExistingRecord],
    dry_run: bool,
) -> Result<(), IdentityConflictError> {
    let category = &schema.sheet_name;

    // user -> system map of the remote state; it must be injective on both
    // sides before anything in the batch can be trusted against it
    let mut remote: HashMap<&str, &str> = HashMap::new();
    let mut remote_systems: HashSet<&str> = HashSet::new();
    for record in existing {
        if !record.user_accession.is_empty()
            && remote
                .insert(&record.user_accession, &record.accession)
                .is_some()
        {
            return Err(IdentityConflictError::CorruptRemote {
                category: category.clone(),
                accession: record.user_accession.clone(),
            });
        }
        if !record.accession.is_empty() && !remote_systems.insert(&record.accession) {
            return Err(IdentityConflictError::CorruptRemote {
                category: category.clone(),
                accession: record.accession.clone(),
            });
        }
    }
    let remote_users_by_system: HashMap<&str, &str> =
        remote.iter().map(|(user, system)| (*system, *user)).collect();

    let mut seen_users: HashSet<String> = HashSet::new();
    let mut seen_systems: HashSet<String> = HashSet::new();

    for record in records.iter_mut() {
        let user = record.user_accession.clone();
        let system = record.system_accession.clone();

        match (!user.is_empty(), !system.is_empty()) {
            (true, true) => {
                if remote.get(user.as_str()).copied() != Some(system.as_str()) {
                    return Err(IdentityConflictError::PairMismatch {
                        category: category.clone(),
                        user_accession: user,
                        system_accession: system,
                    });
                }
                if seen_users.contains(&user) {
                    return Err(IdentityConflictError::DuplicateUser {
                        category: category.clone(),
                        user_accession: user,
                    });
                }
                if seen_systems.contains(&system) {
                    return Err(IdentityConflictError::DuplicateSystem {
                        category: category.clone(),
                        system_accession: system,
                    });
                }
            }
            (false, true) => {
                if seen_systems.contains(&system) {
                    return Err(IdentityConflictError::DuplicateSystem {
                        category: category.clone(),
                        system_accession: system,
                    });
                }
                let Some(remote_user) = remote_users_by_system.get(system.as_str()) else {
                    return Err(IdentityConflictError::UnknownSystem {
                        category: category.clone(),
                        system_accession: system,
                    });
                };
                record.user_accession = remote_user.to_string();
            }
            (true, false) => {
                if seen_users.contains(&user) {
                    return Err(IdentityConflictError::DuplicateUser {
                        category: category.clone(),
                        user_accession: user,
                    });
                }
                if let Some(remote_system) = remote.get(user.as_str()) {
                    // known placeholder: the record will be updated in place
                    record.system_accession = remote_system.to_string();
                } else if dry_run {
                    let fresh = synthesize_placeholder(&schema.user_prefix);
                    log::debug!(
                        "replacing user accession {} with {} for the test store",
                        user,
                        fresh
                    );
                    record.replace_user_accession(fresh);
                }
            }
            (false, false) => {
                // unreachable once audit_row has passed; kept as a guard
                return Err(IdentityConflictError::PairMismatch {
                    category: category.clone(),
                    user_accession: user,
                    system_accession: system,
                });
            }
        }

        if !record.user_accession.is_empty() {
            seen_users.insert(record.user_accession.clone());
        }
        if !record.system_accession.is_empty() {
            seen_systems.insert(record.system_accession.clone());
        }
    }

    Ok(())
}

fn synthesize_placeholder(user_prefix: &str) -> String {
    format!("{}{}", user_prefix, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_schema() -> CategorySchema {
        CategorySchema {
            sheet_name: "Biosample".to_string(),
            category: "biosample".to_string(),
            collection: "biosamples".to_string(),
            fields: Vec::new(),
            connections: Vec::new(),
            system_prefix: "SYSBSM".to_string(),
            user_prefix: "USRBSM".to_string(),
        }
    }

    fn make_existing(user: &str, system: &str) -> ExistingRecord {
        ExistingRecord {
            accession: system.to_string(),
            user_accession: user.to_string(),
            user: "tester".to_string(),
        }
    }

    fn make_record(user: &str, system: &str) -> Record {
        let mut record = Record::new("Biosample");
        record.user_accession = user.to_string();
        record.system_accession = system.to_string();
        record
    }

    #[test]
    fn test_new_user_accession_stays_a_creation_candidate() {
        let schema = make_schema();
        let mut records = vec![make_record("USRBSM001", "")];
        reconcile(&schema, &mut records, &[], false).unwrap();
        assert_eq!(records[0].user_accession, "USRBSM001");
        assert!(records[0].system_accession.is_empty());
    }

    #[test]
    fn test_known_user_accession_backfills_system() {
        let schema = make_schema();
        let existing = vec![make_existing("USRBSM001", "SYSBSM001")];
        let mut records = vec![make_record("USRBSM001", "")];
        reconcile(&schema, &mut records, &existing, false).unwrap();
        assert_eq!(records[0].system_accession, "SYSBSM001");
    }

    #[test]
    fn test_known_system_accession_backfills_user() {
        let schema = make_schema();
        let existing = vec![make_existing("USRBSM001", "SYSBSM001")];
        let mut records = vec![make_record("", "SYSBSM001")];
        reconcile(&schema, &mut records, &existing, false).unwrap();
        assert_eq!(records[0].user_accession, "USRBSM001");
    }

    #[test]
    fn test_unknown_system_accession_is_a_conflict() {
        let schema = make_schema();
        let mut records = vec![make_record("", "SYSBSM999")];
        let err = reconcile(&schema, &mut records, &[], false).unwrap_err();
        assert!(matches!(err, IdentityConflictError::UnknownSystem { .. }));
    }

    #[test]
    fn test_pair_must_match_remote_state() {
        let schema = make_schema();
        let existing = vec![make_existing("USRBSM001", "SYSBSM001")];
        let mut records = vec![make_record("USRBSM001", "SYSBSM002")];
        let err = reconcile(&schema, &mut records, &existing, false).unwrap_err();
        assert!(matches!(err, IdentityConflictError::PairMismatch { .. }));
    }

    #[test]
    fn test_duplicate_user_accessions_rejected() {
        let schema = make_schema();
        let mut records = vec![make_record("USRBSM001", ""), make_record("USRBSM001", "")];
        let err = reconcile(&schema, &mut records, &[], false).unwrap_err();
        assert!(matches!(err, IdentityConflictError::DuplicateUser { .. }));
    }

    #[test]
    fn test_duplicate_system_accessions_rejected() {
        let schema = make_schema();
        let existing = vec![make_existing("USRBSM001", "SYSBSM001")];
        let mut records = vec![make_record("", "SYSBSM001"), make_record("", "SYSBSM001")];
        let err = reconcile(&schema, &mut records, &existing, false).unwrap_err();
        assert!(matches!(err, IdentityConflictError::DuplicateSystem { .. }));
    }

    #[test]
    fn test_no_shared_accessions_after_reconcile() {
        let schema = make_schema();
        let existing = vec![
            make_existing("USRBSM001", "SYSBSM001"),
            make_existing("USRBSM002", "SYSBSM002"),
        ];
        let mut records = vec![
            make_record("USRBSM001", ""),
            make_record("", "SYSBSM002"),
            make_record("USRBSM003", ""),
        ];
        reconcile(&schema, &mut records, &existing, false).unwrap();

        let users: HashSet<_> = records
            .iter()
            .map(|r| r.user_accession.as_str())
            .filter(|u| !u.is_empty())
            .collect();
        let systems: HashSet<_> = records
            .iter()
            .map(|r| r.system_accession.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(users.len(), 3);
        assert_eq!(systems.len(), 2);
    }

    #[test]
    fn test_corrupt_remote_state_is_fatal() {
        let schema = make_schema();
        let existing = vec![
            make_existing("USRBSM001", "SYSBSM001"),
            make_existing("USRBSM001", "SYSBSM002"),
        ];
        let mut records = vec![make_record("USRBSM009", "")];
        let err = reconcile(&schema, &mut records, &existing, false).unwrap_err();
        assert!(matches!(err, IdentityConflictError::CorruptRemote { .. }));
    }

    #[test]
    fn test_dry_run_synthesizes_placeholder_and_keeps_alias() {
        let schema = make_schema();
        let mut records = vec![make_record("USRBSM001", "")];
        reconcile(&schema, &mut records, &[], true).unwrap();

        assert_ne!(records[0].user_accession, "USRBSM001");
        assert!(records[0].user_accession.starts_with("USRBSM"));
        assert_eq!(records[0].prior_user_accession, "USRBSM001");
    }

    #[test]
    fn test_dry_run_leaves_existing_records_alone() {
        let schema = make_schema();
        let existing = vec![make_existing("USRBSM001", "SYSBSM001")];
        let mut records = vec![make_record("USRBSM001", "")];
        reconcile(&schema, &mut records, &existing, true).unwrap();

        assert_eq!(records[0].user_accession, "USRBSM001");
        assert_eq!(records[0].system_accession, "SYSBSM001");
        assert!(records[0].prior_user_accession.is_empty());
    }
}
