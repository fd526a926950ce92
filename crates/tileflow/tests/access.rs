mod gemm_support;

use std::collections::HashMap;

use gemm_support::{along, tensor, var};
use tileflow::{
    AccessMap, AffineExpr, AttachedEdge, FlowError, IterationVar, Layout, Tensor, TileIndex, Tier,
};

#[test]
fn index_expression_combines_vars_and_offset() {
    let k = var("k", 0..2);
    let n = var("n", 0..2);
    let map = AccessMap::new(
        vec![0],
        vec![vec![2], vec![1]],
        vec![1],
        vec![k.clone(), n.clone()],
    )
    .expect("valid map");

    assert_eq!(map.index_expr(2).to_string(), "[2*k + n + 1, 0]");
    assert_eq!(map.resolve(2, &[3, 4]).expect("resolves"), vec![11, 0]);
}

#[test]
fn unselected_dims_resolve_to_zero() {
    let i = var("i", 0..4);
    let map = AccessMap::new(vec![2], vec![vec![1]], vec![0], vec![i]).expect("valid map");
    assert_eq!(map.index_expr(3).to_string(), "[0, 0, i]");
    assert_eq!(map.resolve(3, &[2]).expect("resolves"), vec![0, 0, 2]);
}

#[test]
fn affine_expressions_print_signs() {
    let expr = AffineExpr {
        terms: vec![("k".to_string(), -1), ("n".to_string(), -3)],
        constant: 3,
    };
    assert_eq!(expr.to_string(), "-k - 3*n + 3");
    assert_eq!(AffineExpr::constant(-2).to_string(), "-2");

    let bindings = HashMap::from([("k".to_string(), 1), ("n".to_string(), 0)]);
    assert_eq!(expr.evaluate(&bindings).expect("bound"), 2);
}

#[test]
fn unbound_variables_fail_evaluation() {
    let index = TileIndex(vec![AffineExpr {
        terms: vec![("k".to_string(), 1)],
        constant: 0,
    }]);
    match index.evaluate(&HashMap::new()) {
        Err(FlowError::UnboundIterationVar { var, .. }) => assert_eq!(var, "k"),
        other => panic!("expected unbound var, got {other:?}"),
    }
}

#[test]
fn map_arity_is_checked_at_construction() {
    let i = var("i", 0..4);
    let cases = [
        AccessMap::new(vec![0], Vec::new(), vec![0], vec![i.clone()]),
        AccessMap::new(vec![0], vec![vec![1, 0]], vec![0], vec![i.clone()]),
        AccessMap::new(vec![0], vec![vec![1]], Vec::new(), vec![i.clone()]),
        AccessMap::new(vec![0, 0], vec![vec![1, 1]], vec![0, 0], vec![i.clone()]),
    ];
    for case in cases {
        assert!(matches!(case, Err(FlowError::AccessMapShape { .. })));
    }
    assert!(matches!(
        AccessMap::new(vec![0], vec![vec![1], vec![1]], vec![0], vec![i.clone(), i]),
        Err(FlowError::DuplicateIterationVar { .. })
    ));
}

#[test]
fn tiled_dims_must_be_selected() {
    let s = tensor("sA", &[64, 16], Tier::Shared);
    let r = tensor("rA", &[16, 16], Tier::Register);
    match AttachedEdge::new(&s, &r, AccessMap::bulk()) {
        Err(FlowError::UnderSpecifiedAccess { dim, tiles, .. }) => {
            assert_eq!(dim, 0);
            assert_eq!(tiles, 4);
        }
        other => panic!("expected under-specified access, got {other:?}"),
    }
    let i = var("i", 0..4);
    assert!(matches!(
        AttachedEdge::new(&s, &r, along(1, &i)),
        Err(FlowError::UnderSpecifiedAccess { dim: 0, .. })
    ));
}

#[test]
fn reachable_tiles_stay_in_bounds() {
    let s = tensor("sA", &[64, 16], Tier::Shared);
    let r = tensor("rA", &[16, 16], Tier::Register);
    let too_far = var("i", 0..5);
    match AttachedEdge::new(&s, &r, along(0, &too_far)) {
        Err(FlowError::AccessOutOfBounds { min, max, tiles, .. }) => {
            assert_eq!((min, max, tiles), (0, 4, 4));
        }
        other => panic!("expected out of bounds, got {other:?}"),
    }

    let i = var("i", 0..4);
    let reversed =
        AccessMap::new(vec![0], vec![vec![-1]], vec![3], vec![i.clone()]).expect("valid map");
    let edge = AttachedEdge::new(&s, &r, reversed).expect("reversed walk stays in range");
    assert_eq!(edge.resolve(&[0]).expect("resolves"), vec![3, 0]);
    assert_eq!(edge.index_expr().to_string(), "[-i + 3, 0]");

    let empty = var("e", 3..3);
    AttachedEdge::new(&s, &r, along(0, &empty)).expect("zero-trip loops are never out of bounds");
}

#[test]
fn oversized_coefficients_are_rejected() {
    let s = tensor("sA", &[64, 16], Tier::Shared);
    let r = tensor("rA", &[16, 16], Tier::Register);
    let i = var("i", 0..4);
    let huge = AccessMap::new(vec![0], vec![vec![i64::MAX]], vec![0], vec![i.clone()])
        .expect("arity is fine");
    assert!(matches!(
        AttachedEdge::new(&s, &r, huge.clone()),
        Err(FlowError::AccessMapShape { .. })
    ));
    assert!(matches!(
        huge.resolve(2, &[2]),
        Err(FlowError::AccessMapShape { .. })
    ));

    let shifted = AccessMap::new(vec![0], vec![vec![1]], vec![i64::MAX], vec![i]).expect("map");
    assert!(AttachedEdge::new(&s, &r, shifted).is_err());

    let expr = AffineExpr {
        terms: vec![("k".to_string(), i64::MIN)],
        constant: -1,
    };
    let bindings = HashMap::from([("k".to_string(), 1)]);
    assert!(matches!(
        expr.evaluate(&bindings),
        Err(FlowError::AccessMapShape { .. })
    ));
}

#[test]
fn endpoint_shapes_must_tile_evenly() {
    let s = tensor("sA", &[50, 16], Tier::Shared);
    let r = tensor("rA", &[16, 16], Tier::Register);
    let i = var("i", 0..3);
    assert!(matches!(
        AttachedEdge::new(&s, &r, along(0, &i)),
        Err(FlowError::AccessMapShape { .. })
    ));

    let flat = tensor("rF", &[256], Tier::Register);
    assert!(matches!(
        AttachedEdge::new(&r, &flat, AccessMap::bulk()),
        Err(FlowError::TierMismatch { .. })
    ));
    let shared_flat = tensor("sF", &[256], Tier::Shared);
    assert!(matches!(
        AttachedEdge::new(&shared_flat, &r, AccessMap::bulk()),
        Err(FlowError::AccessMapShape { .. })
    ));
}

#[test]
fn tensors_and_ranges_are_validated() {
    assert!(matches!(
        Tensor::new("bad", vec![16, 0], Layout::RowMajor, Tier::Shared),
        Err(FlowError::InvalidShape { .. })
    ));
    assert!(matches!(
        Tensor::new("scalar", Vec::new(), Layout::RowMajor, Tier::Shared),
        Err(FlowError::InvalidShape { .. })
    ));
    assert!(matches!(
        IterationVar::new("k", 4..1),
        Err(FlowError::InvalidRange { low: 4, high: 1, .. })
    ));
    match Tensor::new("", vec![16, 16], Layout::RowMajor, Tier::Shared) {
        Err(FlowError::InvalidTensorName { name, .. }) => assert!(name.is_empty()),
        other => panic!("expected invalid name, got {other:?}"),
    }

    let col = Tensor::new("c", vec![4, 8], Layout::ColMajor, Tier::Global).expect("valid");
    assert_eq!(col.strides(), vec![1, 4]);
    let row = Tensor::new("r", vec![4, 8], Layout::RowMajor, Tier::Global).expect("valid");
    assert_eq!(row.strides(), vec![8, 1]);
    assert_eq!(row.byte_len(), 128);
}
