use super::*;
use crate::filter::downsample::Downsample;
use crate::filter::external::ExternalProgram;
use crate::filter::source::PointSource;
use crate::filter::{FilterKind, PropertyValue};

fn demo_session() -> AnalysisSession {
    let mut s = AnalysisSession::default();
    let load = s
        .add_filter(Box::new(PointSource::with_count(200, 6)), None)
        .unwrap();
    let down = s
        .add_filter(Box::new(Downsample::with_fraction(0.25)), Some(load))
        .unwrap();
    s.set_label(down, Some("quarter".to_owned())).unwrap();
    s.stash(down, "kept sampler").unwrap();
    s.set_collaborator_state(Some(serde_json::json!({"camera": {"dist": 3.5}})));
    s
}

#[test]
fn save_load_round_trip_preserves_everything() {
    let original = demo_session();
    let mut buf = Vec::new();
    original.save_state(&mut buf).unwrap();

    let mut restored = AnalysisSession::default();
    let mut errors = Vec::new();
    restored
        .load_state(buf.as_slice(), &mut errors, false)
        .unwrap();
    assert!(errors.is_empty());

    assert_eq!(
        restored.tree().fingerprint(),
        original.tree().fingerprint()
    );
    assert_eq!(restored.stash_list().len(), 1);
    assert_eq!(restored.stash_list()[0].1, "kept sampler");
    assert_eq!(
        restored.collaborator_state(),
        original.collaborator_state()
    );
    // Loading resets history.
    assert_eq!(restored.undo_len(), 0);
}

#[test]
fn failed_load_leaves_session_untouched_with_error_stream() {
    let mut doc = demo_session().state_document();
    // Corrupt the deepest filter's parameters.
    let mut cursor = &mut doc.tree[0];
    while !cursor.children.is_empty() {
        cursor = &mut cursor.children[0];
    }
    cursor.filter.params = serde_json::json!({"fraction": "not a number"});
    let text = serde_json::to_string(&doc).unwrap();

    let mut session = demo_session();
    let fp = session.tree().fingerprint();
    let stashes = session.stash_list().len();
    let mut errors = Vec::new();
    let result = session.load_state(text.as_bytes(), &mut errors, false);

    assert!(result.is_err());
    assert!(!errors.is_empty(), "error stream must name the failure");
    assert_eq!(session.tree().fingerprint(), fp, "live tree unchanged");
    assert_eq!(session.stash_list().len(), stashes);
}

#[test]
fn unparseable_document_reports_and_changes_nothing() {
    let mut session = demo_session();
    let fp = session.tree().fingerprint();
    let mut errors = Vec::new();
    assert!(
        session
            .load_state(&b"{ not json"[..], &mut errors, false)
            .is_err()
    );
    assert!(!errors.is_empty());
    assert_eq!(session.tree().fingerprint(), fp);
}

#[test]
fn duplicate_stash_names_fail_the_whole_load() {
    let mut doc = demo_session().state_document();
    let dup = doc.stashes[0].clone();
    doc.stashes.push(dup);
    let text = serde_json::to_string(&doc).unwrap();

    let mut session = AnalysisSession::default();
    let mut errors = Vec::new();
    assert!(session.load_state(text.as_bytes(), &mut errors, false).is_err());
    assert!(errors.iter().any(|e| e.contains("duplicate stash")));
    assert!(session.tree().is_empty());
}

#[test]
fn strip_on_load_removes_hazardous_subtrees() {
    let mut source = AnalysisSession::default();
    let load = source
        .add_filter(Box::new(PointSource::with_count(10, 1)), None)
        .unwrap();
    let ext = source
        .add_filter(Box::new(ExternalProgram::with_command("echo hi")), Some(load))
        .unwrap();
    source
        .add_filter(Box::new(Downsample::default()), Some(ext))
        .unwrap();
    let mut buf = Vec::new();
    source.save_state(&mut buf).unwrap();

    let mut safe = AnalysisSession::default();
    let mut errors = Vec::new();
    safe.load_state(buf.as_slice(), &mut errors, true).unwrap();
    assert!(errors.is_empty());
    assert!(!safe.has_hazardous_contents());
    assert_eq!(safe.tree().len(), 1, "hazardous node and its child removed");
    assert!(safe.tree().by_kind(FilterKind::ExternalProgram).is_empty());
}

#[test]
fn label_survives_round_trip() {
    let original = demo_session();
    let mut buf = Vec::new();
    original.save_state(&mut buf).unwrap();

    let mut restored = AnalysisSession::default();
    restored
        .load_state(buf.as_slice(), &mut Vec::new(), false)
        .unwrap();
    let down = restored.tree().by_kind(FilterKind::Downsample)[0];
    assert_eq!(
        restored.tree().filter(down).unwrap().custom_label(),
        Some("quarter")
    );
    // And the restored filter still behaves: properties intact.
    let props = restored.tree().filter(down).unwrap().properties();
    assert!(
        props[0]
            .props
            .iter()
            .any(|p| p.key == "fraction" && p.value == PropertyValue::F64(0.25))
    );
}
