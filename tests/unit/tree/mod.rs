use super::*;
use crate::filter::FilterKind;
use crate::filter::downsample::Downsample;
use crate::filter::external::ExternalProgram;
use crate::filter::source::PointSource;
use crate::filter::spectrum::Spectrum;

fn source() -> Box<dyn Filter> {
    Box::new(PointSource::with_count(100, 1))
}

fn downsample() -> Box<dyn Filter> {
    Box::new(Downsample::with_fraction(0.5))
}

#[test]
fn pre_order_visits_parents_before_children_in_sibling_order() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();
    let b = tree.insert(Box::new(Spectrum::default()), Some(root)).unwrap();
    let a1 = tree.insert(downsample(), Some(a)).unwrap();

    let order: Vec<(NodeId, usize)> = tree.pre_order().collect();
    assert_eq!(order, vec![(root, 0), (a, 1), (a1, 2), (b, 1)]);
}

#[test]
fn subtree_uses_relative_depth() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();
    let a1 = tree.insert(downsample(), Some(a)).unwrap();

    let order: Vec<(NodeId, usize)> = tree.subtree(a).collect();
    assert_eq!(order, vec![(a, 0), (a1, 1)]);
}

#[test]
fn remove_subtree_drops_descendants_and_invalidates_ids() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();
    let a1 = tree.insert(downsample(), Some(a)).unwrap();

    tree.remove_subtree(a).unwrap();
    assert_eq!(tree.len(), 1);
    assert!(tree.contains(root));
    assert!(!tree.contains(a));
    assert!(!tree.contains(a1));
    assert!(tree.remove_subtree(a).is_err());
}

#[test]
fn reparent_rejects_self_and_descendants() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();
    let a1 = tree.insert(downsample(), Some(a)).unwrap();

    assert!(tree.reparent(root, a1).is_err(), "into own subtree");
    assert!(tree.reparent(a, a).is_err(), "onto itself");

    // Rejections leave the tree untouched.
    let order: Vec<(NodeId, usize)> = tree.pre_order().collect();
    assert_eq!(order, vec![(root, 0), (a, 1), (a1, 2)]);
}

#[test]
fn reparent_moves_subtree_to_last_child_slot() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();
    let b = tree.insert(downsample(), Some(root)).unwrap();
    let a1 = tree.insert(downsample(), Some(a)).unwrap();

    tree.reparent(a1, b).unwrap();
    assert_eq!(tree.parent(a1), Some(b));
    assert_eq!(tree.children(b), &[a1]);
    assert_eq!(tree.children(a), &[] as &[NodeId]);
}

#[test]
fn clone_uncached_preserves_ids_and_content() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();

    let clone = tree.clone_uncached();
    assert_eq!(clone.len(), 2);
    assert!(clone.contains(root));
    assert!(clone.contains(a));
    assert_eq!(clone.parent(a), Some(root));
    assert_eq!(clone.fingerprint(), tree.fingerprint());
}

#[test]
fn fingerprint_tracks_structure_and_properties() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();
    let base = tree.fingerprint();

    tree.filter_mut(a)
        .unwrap()
        .set_property("fraction", &crate::filter::PropertyValue::F64(0.25))
        .unwrap();
    assert_ne!(tree.fingerprint(), base, "property change changes fingerprint");

    tree.filter_mut(a)
        .unwrap()
        .set_property("fraction", &crate::filter::PropertyValue::F64(0.5))
        .unwrap();
    assert_eq!(tree.fingerprint(), base, "restoring the value restores it");
}

#[test]
fn copy_subtree_clones_into_new_root() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let _child = tree.insert(downsample(), Some(root)).unwrap();

    let copy = tree.copy_subtree(root, None).unwrap();
    assert_eq!(tree.roots().len(), 2);
    assert_eq!(tree.subtree(copy).count(), 2);
    assert_eq!(tree.len(), 4);
}

#[test]
fn strip_hazardous_removes_whole_subtrees() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let ext = tree
        .insert(Box::new(ExternalProgram::default()), Some(root))
        .unwrap();
    let below = tree.insert(downsample(), Some(ext)).unwrap();
    let safe = tree.insert(downsample(), Some(root)).unwrap();

    assert!(tree.has_hazardous());
    let (removed, _) = tree.strip_hazardous();
    assert_eq!(removed, 2, "hazardous node and its child");
    assert!(!tree.has_hazardous());
    assert!(tree.contains(safe));
    assert!(!tree.contains(ext));
    assert!(!tree.contains(below));
}

#[test]
fn by_kind_finds_filters() {
    let mut tree = FilterTree::new();
    let root = tree.insert(source(), None).unwrap();
    let a = tree.insert(downsample(), Some(root)).unwrap();
    let b = tree.insert(downsample(), Some(a)).unwrap();

    assert_eq!(tree.by_kind(FilterKind::Downsample), vec![a, b]);
    assert_eq!(tree.by_kind(FilterKind::PointSource), vec![root]);
    assert!(tree.by_kind(FilterKind::Voxelise).is_empty());
}
