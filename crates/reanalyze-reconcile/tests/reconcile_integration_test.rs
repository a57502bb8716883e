use reanalyze_core::{MarkerOp, MarkerStore, RawIssue, ScopeId, Severity, TextRange, UserState};
use reanalyze_reconcile::{CommitOutcome, InMemoryMarkerStore, MarkerLedger};
use std::path::Path;
use std::sync::Arc;

fn foo_java(blank_lines_before: usize) -> String {
    let mut text = String::from("package demo;\n");
    text.push_str(&"\n".repeat(blank_lines_before));
    text.push_str("class Foo {\n    private int unused = 0;\n}\n");
    text
}

fn unused_field(line: u32) -> RawIssue {
    RawIssue::new(
        "java:S1068",
        "Foo.java",
        TextRange::new(line, 4, line, 27),
        "Remove this unused private field",
        Severity::Major,
    )
}

#[tokio::test]
async fn test_issue_shifted_by_edit_keeps_marker() {
    let store = Arc::new(InMemoryMarkerStore::new());
    let ledger = MarkerLedger::new(store.clone());
    let scope = ScopeId::from("demo");
    let file = Path::new("Foo.java");

    // line 10 after seven blank lines, line 12 after nine
    let before = foo_java(7);
    ledger
        .commit(&scope, file, 1, vec![unused_field(10)], Some(Arc::from(before.as_str())))
        .await
        .unwrap();
    let created = store.markers(&scope, file);
    assert_eq!(created.len(), 1);
    let identity = created.markers[0].identity.clone();

    let after = foo_java(9);
    let outcome = ledger
        .commit(&scope, file, 2, vec![unused_field(12)], Some(Arc::from(after.as_str())))
        .await
        .unwrap();
    assert!(matches!(outcome, CommitOutcome::Applied { created: 0, updated: 1, deleted: 0, .. }));

    let ops = store.applied_ops(&scope, file);
    assert_eq!(ops.len(), 2);
    match &ops[1] {
        MarkerOp::Update { identity: updated, marker } => {
            assert_eq!(updated, &identity);
            assert_eq!(marker.identity, identity);
            assert_eq!(marker.range.start_line, 12);
        }
        other => panic!("expected update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_identity_stable_across_many_shifts() {
    let store = Arc::new(InMemoryMarkerStore::new());
    let ledger = MarkerLedger::new(store.clone());
    let scope = ScopeId::from("demo");
    let file = Path::new("Foo.java");

    let mut identity = None;
    for (generation, blanks) in [0usize, 3, 1, 8, 2].into_iter().enumerate() {
        let text = foo_java(blanks);
        let line = 3 + blanks as u32;
        ledger
            .commit(&scope, file, generation as u64 + 1, vec![unused_field(line)], Some(Arc::from(text.as_str())))
            .await
            .unwrap();
        let shown = store.markers(&scope, file);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown.markers[0].range.start_line, line);
        let current = shown.markers[0].identity.clone();
        let first = identity.get_or_insert_with(|| current.clone()).clone();
        assert_eq!(first, current);
    }
}

#[tokio::test]
async fn test_fixed_issue_deletes_marker_and_user_state_persists() {
    let store = Arc::new(InMemoryMarkerStore::new());
    let scope = ScopeId::from("demo");
    let file = Path::new("Foo.java");
    let text = foo_java(0);

    let ledger = MarkerLedger::new(store.clone());
    ledger
        .commit(&scope, file, 1, vec![unused_field(3)], Some(Arc::from(text.as_str())))
        .await
        .unwrap();

    // The IDE marks the issue ignored; a fresh ledger picks that up on load.
    let mut shown = store.markers(&scope, file);
    shown.markers[0].user_state = UserState::IgnoredLocally;
    let marker = shown.markers[0].clone();
    store
        .apply(&scope, file, &[MarkerOp::Update { identity: marker.identity.clone(), marker }])
        .await
        .unwrap();

    let ledger = MarkerLedger::new(store.clone());
    ledger
        .commit(&scope, file, 2, vec![unused_field(3)], Some(Arc::from(text.as_str())))
        .await
        .unwrap();
    assert_eq!(store.markers(&scope, file).markers[0].user_state, UserState::IgnoredLocally);

    ledger.commit(&scope, file, 3, vec![], Some(Arc::from(text.as_str()))).await.unwrap();
    assert!(store.markers(&scope, file).is_empty());
}
