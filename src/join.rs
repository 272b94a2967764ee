//! Component G: the annotation join.
//!
//! Grounded on `examples/original_source/scripts/null-deref/join.py`
//! (`join_annotations`), ported field-for-field: the tally counters and the
//! `may_deref`/`must_deref` combination direction are kept exactly as
//! observed, including the `∧`/`∨` asymmetry flagged in `SPEC_FULL.md` §11.

use crate::codec::{AnnotationDatabase, AnnotationRecord, ParamView};
use crate::error::JoinMismatch;

/// Per-category tallies produced by a single `join` run, mirroring the five
/// `print` lines of the source `join_annotations`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub only_in_a: usize,
    pub only_in_b: usize,
    pub a_strictly_better: usize,
    pub b_strictly_better: usize,
    pub cross_improve: usize,
    pub identical: usize,
    pub mismatch: usize,
}

fn params_compatible(a: &[crate::codec::Param], b: &[crate::codec::Param]) -> bool {
    a.iter().zip(b).all(|(p1, p2)| p1.is_pointer == p2.is_pointer && p1.name == p2.name)
}

/// Merges `a`'s and `b`'s param lists in place on a clone of `a`'s record,
/// under the lattice: `must_deref := a ∨ b` (strengthens certainty of
/// dereference), `may_deref := a ∧ b` — replicated exactly as observed in
/// the source; see the open question in `SPEC_FULL.md` §11 before "fixing"
/// this direction.
fn merge_params(record: &mut AnnotationRecord, other: &AnnotationRecord) -> (bool, bool) {
    let mut a_better = false;
    let mut b_better = false;

    for (p1, p2) in record.params.iter_mut().zip(&other.params) {
        if let (ParamView::Pointer { may_deref: may1, must_deref: must1 }, ParamView::Pointer { may_deref: may2, must_deref: must2 }) =
            (p1.view(), p2.view())
        {
            if must1 != must2 {
                if must1 {
                    a_better = true;
                } else {
                    b_better = true;
                }
            }
            let must = must1 || must2;

            if may1 != may2 {
                if !may1 {
                    a_better = true;
                } else {
                    b_better = true;
                }
            }
            let may = may1 && may2;

            p1.must_deref = Some(must);
            p1.may_deref = Some(may);
        }
    }

    (a_better, b_better)
}

/// Merges `a`'s and `b`'s return fields onto `record` (a clone of `a`'s
/// record) by disjunction on the "may" booleans, when the two records agree
/// on return kind. Per `SPEC_FULL.md` §4.G; unlike `merge_params` this never
/// feeds the A/B-better tally, matching the source's param-only accounting.
fn merge_returns(record: &mut AnnotationRecord, other: &AnnotationRecord) {
    if record.returns_pointer != other.returns_pointer || record.returns_signed != other.returns_signed {
        return;
    }
    if record.returns_pointer {
        record.may_return_null = Some(record.may_return_null.unwrap_or(false) || other.may_return_null.unwrap_or(false));
        record.may_return_errptr =
            Some(record.may_return_errptr.unwrap_or(false) || other.may_return_errptr.unwrap_or(false));
    } else if record.returns_signed {
        record.may_return_negative =
            Some(record.may_return_negative.unwrap_or(false) || other.may_return_negative.unwrap_or(false));
        record.may_return_positive =
            Some(record.may_return_positive.unwrap_or(false) || other.may_return_positive.unwrap_or(false));
    }
}

/// Joins `a` and `b` into a soundly-weakened database, per `SPEC_FULL.md`
/// §4.G. Mismatched functions keep `a`'s record and are reported via
/// `mismatches`, not as an `Err` — the join as a whole never fails.
pub fn join(a: &AnnotationDatabase, b: &AnnotationDatabase) -> (AnnotationDatabase, JoinStats, Vec<JoinMismatch>) {
    log::info!("joining annotations");

    let mut joined = AnnotationDatabase::new();
    let mut stats = JoinStats::default();
    let mut mismatches = Vec::new();

    for (name, files) in a {
        for (source_file, record1) in files {
            let mut merged = record1.clone();

            let Some(record2) = b.get(name).and_then(|files2| files2.get(source_file)) else {
                joined.entry(name.clone()).or_default().insert(source_file.clone(), merged);
                stats.only_in_a += 1;
                continue;
            };

            if !params_compatible(&record1.params, &record2.params) {
                stats.mismatch += 1;
                mismatches.push(JoinMismatch { name: name.clone(), source_file: source_file.clone() });
                joined.entry(name.clone()).or_default().insert(source_file.clone(), merged);
                continue;
            }

            let (a_better, b_better) = merge_params(&mut merged, record2);
            merge_returns(&mut merged, record2);

            match (a_better, b_better) {
                (true, true) => stats.cross_improve += 1,
                (true, false) => stats.a_strictly_better += 1,
                (false, true) => stats.b_strictly_better += 1,
                (false, false) => stats.identical += 1,
            }

            joined.entry(name.clone()).or_default().insert(source_file.clone(), merged);
        }
    }

    for (name, files) in b {
        for (source_file, record2) in files {
            let already_present = a.get(name).map(|files1| files1.contains_key(source_file)).unwrap_or(false);
            if already_present {
                continue;
            }
            joined.entry(name.clone()).or_default().insert(source_file.clone(), record2.clone());
            stats.only_in_b += 1;
        }
    }

    log::info!(
        "join: {} only-A, {} only-B, {} A-better, {} B-better, {} identical, {} cross-improve, {} mismatch",
        stats.only_in_a,
        stats.only_in_b,
        stats.a_strictly_better,
        stats.b_strictly_better,
        stats.identical,
        stats.cross_improve,
        stats.mismatch,
    );

    (joined, stats, mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AnnotationRecord, Param};
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn record_with_param(may_deref: bool, must_deref: bool) -> AnnotationRecord {
        AnnotationRecord {
            signature: "void f(int *p)".to_string(),
            params: vec![Param::pointer("p", may_deref, must_deref)],
            returns_pointer: false,
            returns_signed: false,
            may_return_null: None,
            may_return_errptr: None,
            may_return_negative: None,
            may_return_positive: None,
        }
    }

    fn db(name: &str, source_file: &str, record: AnnotationRecord) -> AnnotationDatabase {
        let mut files = BTreeMap::new();
        files.insert(source_file.to_string(), record);
        let mut db = AnnotationDatabase::new();
        db.insert(name.to_string(), files);
        db
    }

    #[test]
    fn b_strictly_better_when_b_proves_must_deref() {
        let a = db("f", "a.c", record_with_param(true, false));
        let b = db("f", "a.c", record_with_param(true, true));
        let (joined, stats, mismatches) = join(&a, &b);
        assert!(mismatches.is_empty());
        assert_eq!(stats.b_strictly_better, 1);
        let merged = &joined["f"]["a.c"];
        assert_matches!(merged.params[0].view(), ParamView::Pointer { may_deref: true, must_deref: true });
    }

    fn record_returning_pointer(may_return_null: bool, may_return_errptr: bool) -> AnnotationRecord {
        AnnotationRecord {
            signature: "void *f(void)".to_string(),
            params: vec![],
            returns_pointer: true,
            returns_signed: false,
            may_return_null: Some(may_return_null),
            may_return_errptr: Some(may_return_errptr),
            may_return_negative: None,
            may_return_positive: None,
        }
    }

    #[test]
    fn matching_return_kinds_merge_by_disjunction() {
        let a = db("f", "a.c", record_returning_pointer(true, false));
        let b = db("f", "a.c", record_returning_pointer(false, true));
        let (joined, _, mismatches) = join(&a, &b);
        assert!(mismatches.is_empty());
        let merged = &joined["f"]["a.c"];
        assert_eq!(merged.may_return_null, Some(true));
        assert_eq!(merged.may_return_errptr, Some(true));
    }

    #[test]
    fn only_in_a_and_only_in_b_are_tallied_separately() {
        let a = db("f1", "a.c", record_with_param(true, false));
        let b = db("f2", "b.c", record_with_param(true, false));
        let (joined, stats, _) = join(&a, &b);
        assert_eq!(stats.only_in_a, 1);
        assert_eq!(stats.only_in_b, 1);
        assert!(joined.contains_key("f1"));
        assert!(joined.contains_key("f2"));
    }

    #[test]
    fn mismatched_params_keep_a_and_are_reported() {
        let a = db("f", "a.c", record_with_param(true, false));
        let mut mismatched = record_with_param(true, false);
        mismatched.params[0].is_pointer = false;
        mismatched.params[0].may_deref = None;
        mismatched.params[0].must_deref = None;
        let b = db("f", "a.c", mismatched);
        let (joined, stats, mismatches) = join(&a, &b);
        assert_eq!(stats.mismatch, 1);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(joined["f"]["a.c"], a["f"]["a.c"]);
    }

    #[test]
    fn identical_records_are_tallied_as_identical() {
        let a = db("f", "a.c", record_with_param(true, true));
        let b = db("f", "a.c", record_with_param(true, true));
        let (_, stats, _) = join(&a, &b);
        assert_eq!(stats.identical, 1);
    }
}
