use super::*;
use crate::engine::progress::{CancelToken, ProgressData, RefreshContext};
use crate::foundation::core::{NodeId, Point3};
use crate::stream::data::PlotStream;

fn make_points(n: usize) -> StreamData {
    let mut stream = PointStream::new();
    stream.points = (0..n)
        .map(|i| PointHit {
            pos: Point3::new(i as f32, 0.0, 0.0),
            mass: i as f32,
        })
        .collect();
    StreamData::Points(stream)
}

fn run(
    filter: &mut Downsample,
    arena: &mut StreamArena,
    inputs: &[StreamHandle],
) -> Vec<StreamHandle> {
    let node = NodeId { idx: 9, r#gen: 0 };
    let cancel = CancelToken::new();
    let mut progress = ProgressData::default();
    let mut pump = |_: &ProgressData| true;
    let mut ctx = RefreshContext::new(node, &cancel, &mut progress, &mut pump);
    filter.refresh(inputs, arena, &mut ctx).expect("refresh")
}

#[test]
fn target_len_applies_fraction_and_limit() {
    let mut f = Downsample::with_fraction(0.1);
    assert_eq!(f.target_len(1000), 100);
    f.set_property("limit", &PropertyValue::U64(42)).unwrap();
    assert_eq!(f.target_len(1000), 42);
    f.set_property("fraction", &PropertyValue::F64(1.0)).unwrap();
    assert_eq!(f.target_len(10), 10);
}

#[test]
fn refresh_keeps_exact_fraction() {
    let mut arena = StreamArena::new();
    let producer = NodeId { idx: 1, r#gen: 0 };
    let input = arena.alloc(producer, make_points(1000));

    let mut f = Downsample::with_fraction(0.1);
    let out = run(&mut f, &mut arena, &[input]);
    assert_eq!(out.len(), 1);
    match arena.get(out[0]) {
        Some(StreamData::Points(p)) => assert_eq!(p.points.len(), 100),
        other => panic!("expected points, got {other:?}"),
    }
}

#[test]
fn refresh_forwards_non_point_streams() {
    let mut arena = StreamArena::new();
    let producer = NodeId { idx: 1, r#gen: 0 };
    let plot = arena.alloc(producer, StreamData::Plot(PlotStream::default()));
    let pts = arena.alloc(producer, make_points(10));

    let mut f = Downsample::with_fraction(0.5);
    let out = run(&mut f, &mut arena, &[plot, pts]);
    assert!(out.contains(&plot), "plot passes through by handle");
    assert!(!out.contains(&pts), "point input is consumed, not forwarded");
}

#[test]
fn rejects_out_of_range_fraction() {
    let mut f = Downsample::default();
    assert!(f.set_property("fraction", &PropertyValue::F64(1.5)).is_err());
    assert!(f.set_property("no_such", &PropertyValue::Bool(true)).is_err());
}
