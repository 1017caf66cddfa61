use splice_core::{
    locate, merge, AttemptSelection, CandidateStore, FsCandidateStore, MergeError, SourceUnit,
    StoreError,
};
use tempfile::tempdir;

const SHAPES: &str = r#"#include <math.h>

// area of a circle
static double circle(double r) {
    return M_PI * r * r;
}

double square(double s) { return s * s; }

/* "}" inside a comment must not close anything */
double rect(double w, double h)
{
    const char *label = "{ rect }";
    (void)label;
    return w * h;
}

int main(void) { return (int)(circle(1) + square(2) + rect(3, 4)); }
"#;

fn shapes_unit() -> SourceUnit {
    SourceUnit::new(
        "shapes.c",
        SHAPES,
        vec!["circle".into(), "square".into(), "rect".into()],
        1,
    )
}

#[test]
fn attempts_survive_store_reopen() {
    let dir = tempdir().unwrap();
    let unit = shapes_unit();
    {
        let store = FsCandidateStore::new(dir.path()).unwrap();
        assert_eq!(store.put(&unit.id, 2, "double square(double s) { return s*s; }").unwrap(), 1);
        assert_eq!(store.put(&unit.id, 2, "double square(double s) { return s * s; }").unwrap(), 2);
    }

    let reopened = FsCandidateStore::new(dir.path()).unwrap();
    assert_eq!(reopened.attempts(&unit.id, 2).unwrap(), vec![1, 2]);
    assert_eq!(reopened.latest(&unit.id, 2).unwrap(), 2);
    assert_eq!(reopened.put(&unit.id, 2, "x").unwrap(), 3);
    assert_eq!(
        reopened.get(&unit.id, 2, 1).unwrap(),
        "double square(double s) { return s*s; }"
    );
    assert!(matches!(
        reopened.latest(&unit.id, 1),
        Err(StoreError::NoCandidates { .. })
    ));
}

#[test]
fn empty_selection_is_identity() {
    let dir = tempdir().unwrap();
    let store = FsCandidateStore::new(dir.path()).unwrap();
    let unit = shapes_unit();
    let spans = locate(SHAPES, &unit.functions).unwrap();

    let variant = merge(&unit, &spans, &AttemptSelection::new(), &store).unwrap();
    assert_eq!(variant.text, SHAPES);
    assert_eq!(variant.window, 0);
}

#[test]
fn replacing_one_span_leaves_every_other_byte_alone() {
    let dir = tempdir().unwrap();
    let store = FsCandidateStore::new(dir.path()).unwrap();
    let unit = shapes_unit();
    let spans = locate(SHAPES, &unit.functions).unwrap();

    let replacement = "static double circle(double r) { return 3.14159 * r * r; }";
    store.put(&unit.id, 1, replacement).unwrap();
    let variant = merge(&unit, &spans, &AttemptSelection::new().with(1, 1), &store).unwrap();

    let prefix = &SHAPES[..spans[0].start];
    let suffix = &SHAPES[spans[0].end..];
    assert_eq!(variant.text, format!("{prefix}{replacement}{suffix}"));
    assert!(prefix.ends_with("// area of a circle\n"));
    assert!(variant.text.contains("const char *label = \"{ rect }\";"));
}

#[test]
fn merge_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = FsCandidateStore::new(dir.path()).unwrap();
    let unit = shapes_unit();
    let spans = locate(SHAPES, &unit.functions).unwrap();
    store.put(&unit.id, 1, "static double circle(double r) { return r; }").unwrap();
    store.put(&unit.id, 2, "double square(double s) { return s; }").unwrap();

    let selection = AttemptSelection::new().with(1, 1).with(2, 1);
    let a = merge(&unit, &spans, &selection, &store).unwrap();
    let b = merge(&unit, &spans, &selection, &store).unwrap();
    assert_eq!(a.text, b.text);
    assert_eq!(a.digest(), b.digest());
    assert_eq!(a.file_name(&unit), "shapes_3_trial_1_merge_2_a1-1.c");
}

#[test]
fn selection_gaps_are_rejected() {
    let dir = tempdir().unwrap();
    let store = FsCandidateStore::new(dir.path()).unwrap();
    let unit = shapes_unit();
    let spans = locate(SHAPES, &unit.functions).unwrap();
    store.put(&unit.id, 2, "double square(double s) { return s; }").unwrap();

    let err = merge(&unit, &spans, &AttemptSelection::new().with(2, 1), &store).unwrap_err();
    match err {
        MergeError::IncompleteSelection { window, missing } => {
            assert_eq!(window, 2);
            assert_eq!(missing, vec![1]);
        }
        other => panic!("expected IncompleteSelection, got {other:?}"),
    }
}

#[test]
fn missing_candidate_surfaces_store_error() {
    let dir = tempdir().unwrap();
    let store = FsCandidateStore::new(dir.path()).unwrap();
    let unit = shapes_unit();
    let spans = locate(SHAPES, &unit.functions).unwrap();

    let err = merge(&unit, &spans, &AttemptSelection::new().with(1, 7), &store).unwrap_err();
    assert!(matches!(
        err,
        MergeError::Store(StoreError::NotFound { attempt: 7, .. })
    ));
}
