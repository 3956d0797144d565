use reify::analysis::{collect_fusion_sites, reachable_computations, FusionSite, FusionWalker};
use reify::ir::{
    ComputationId, DType, ElementwiseUnaryOp, FusionKind, NodeId, Program, ProgramBuilder,
    ValueType,
};
use reify::ReifyError;

fn f32s(n: u64) -> ValueType {
    ValueType::tensor(DType::F32, [n])
}

fn pred() -> ValueType {
    ValueType::tensor(DType::Pred, Vec::<u64>::new())
}

fn unary_body(builder: &mut ProgramBuilder, name: &str, op: ElementwiseUnaryOp) -> ComputationId {
    builder.computation(name, |b| {
        let p = b.parameter(0, f32s(16));
        b.unary(op, p)
    })
}

fn bodies(sites: &[FusionSite]) -> Vec<ComputationId> {
    sites.iter().map(|site| site.body).collect()
}

/// `main` runs fusion f1, then a while whose cond and body each hold a fusion, then f2.
fn nested_program() -> (Program, [ComputationId; 4]) {
    let mut builder = ProgramBuilder::new("nested");
    let f1 = unary_body(&mut builder, "f1", ElementwiseUnaryOp::Exp);
    let fc = unary_body(&mut builder, "fc", ElementwiseUnaryOp::Neg);
    let fb = unary_body(&mut builder, "fb", ElementwiseUnaryOp::Abs);
    let f2 = unary_body(&mut builder, "f2", ElementwiseUnaryOp::Tanh);
    let cond = builder.computation("cond", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, fc, vec![p], f32s(16));
        b.constant(pred())
    });
    let body = builder.computation("body", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, fb, vec![p], f32s(16))
    });
    let entry = builder.computation("main", |b| {
        let p = b.parameter(0, f32s(16));
        let x = b.fusion(FusionKind::Loop, f1, vec![p], f32s(16));
        let w = b.while_loop(cond, body, x);
        b.fusion(FusionKind::Loop, f2, vec![w], f32s(16))
    });
    (builder.finish(entry), [f1, fc, fb, f2])
}

#[test]
fn sites_follow_body_order_and_enter_callees_in_place() {
    let (program, [f1, fc, fb, f2]) = nested_program();
    let sites = collect_fusion_sites(&program).unwrap();
    assert_eq!(bodies(&sites), vec![f1, fc, fb, f2]);
    assert_eq!(sites[0].computation, program.entry());
    assert_eq!(sites[0].node, NodeId(1));
}

#[test]
fn walk_is_deterministic() {
    let (program, _) = nested_program();
    let first = collect_fusion_sites(&program).unwrap();
    for _ in 0..4 {
        assert_eq!(collect_fusion_sites(&program).unwrap(), first);
    }
}

#[test]
fn conditional_branches_are_walked_in_declared_order() {
    let mut builder = ProgramBuilder::new("branches");
    let fa = unary_body(&mut builder, "fa", ElementwiseUnaryOp::Exp);
    let fb = unary_body(&mut builder, "fb", ElementwiseUnaryOp::Log);
    let branch_b = builder.computation("branch_b", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, fb, vec![p], f32s(16))
    });
    let branch_a = builder.computation("branch_a", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, fa, vec![p], f32s(16))
    });
    let entry = builder.computation("main", |b| {
        let selector = b.parameter(0, pred());
        let x = b.parameter(1, f32s(16));
        b.conditional(vec![branch_b, branch_a], vec![selector, x], f32s(16))
    });
    let program = builder.finish(entry);

    let sites = collect_fusion_sites(&program).unwrap();
    assert_eq!(bodies(&sites), vec![fb, fa]);
}

#[test]
fn shared_callee_is_walked_once() {
    let mut builder = ProgramBuilder::new("shared");
    let fused = unary_body(&mut builder, "fused", ElementwiseUnaryOp::Exp);
    let helper = builder.computation("helper", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, fused, vec![p], f32s(16))
    });
    let entry = builder.computation("main", |b| {
        let p = b.parameter(0, f32s(16));
        let once = b.call(helper, vec![p], f32s(16));
        let twice = b.call(helper, vec![once], f32s(16));
        b.fusion(FusionKind::Loop, fused, vec![twice], f32s(16))
    });
    let program = builder.finish(entry);

    let sites = collect_fusion_sites(&program).unwrap();
    // one site inside helper, one in main; helper is not re-walked for the second call
    assert_eq!(sites.len(), 2);
    assert_eq!(sites[0].computation, helper);
    assert_eq!(sites[1].computation, entry);

    let reachable = reachable_computations(&program).unwrap();
    assert_eq!(reachable, vec![entry, helper, fused]);
}

#[test]
fn fusion_inside_fusion_body_is_not_yielded() {
    let mut builder = ProgramBuilder::new("nested_fusion");
    let inner = unary_body(&mut builder, "inner", ElementwiseUnaryOp::Exp);
    let looped = unary_body(&mut builder, "looped", ElementwiseUnaryOp::Neg);
    let loop_body = builder.computation("loop_body", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, looped, vec![p], f32s(16))
    });
    let loop_cond = builder.computation("loop_cond", |b| {
        b.parameter(0, f32s(16));
        b.constant(pred())
    });
    let outer = builder.computation("outer", |b| {
        let p = b.parameter(0, f32s(16));
        let f = b.fusion(FusionKind::Loop, inner, vec![p], f32s(16));
        b.while_loop(loop_cond, loop_body, f)
    });
    let entry = builder.computation("main", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Output, outer, vec![p], f32s(16))
    });
    let program = builder.finish(entry);

    let sites = collect_fusion_sites(&program).unwrap();
    assert_eq!(bodies(&sites), vec![outer, looped]);
    assert_eq!(sites[1].computation, loop_body);
}

#[test]
fn call_cycle_is_malformed() {
    let mut builder = ProgramBuilder::new("cycle");
    let a = builder.declare("a");
    let b_id = builder.declare("b");
    builder.define(a, |b| {
        let p = b.parameter(0, f32s(4));
        b.call(b_id, vec![p], f32s(4))
    });
    builder.define(b_id, |b| {
        let p = b.parameter(0, f32s(4));
        b.call(a, vec![p], f32s(4))
    });
    let program = builder.finish(a);

    let err = collect_fusion_sites(&program).unwrap_err();
    assert!(matches!(err, ReifyError::MalformedGraph { .. }), "{err}");
    assert!(err.to_string().contains("'a'"), "{err}");
}

#[test]
fn fusion_calling_its_own_computation_is_malformed() {
    let mut builder = ProgramBuilder::new("self_fusion");
    let main = builder.declare("main");
    builder.define(main, |b| {
        let p = b.parameter(0, f32s(4));
        b.fusion(FusionKind::Loop, main, vec![p], f32s(4))
    });
    let program = builder.finish(main);

    let mut walker = FusionWalker::new(&program);
    // the site is reported before its body is entered
    assert!(walker.next().unwrap().is_ok());
    assert_eq!(walker.next().unwrap().unwrap_err().code(), "malformed_graph");
    assert!(walker.next().is_none());
}

#[test]
fn dangling_reference_is_malformed() {
    let mut builder = ProgramBuilder::new("dangling");
    let entry = builder.computation("main", |b| {
        let p = b.parameter(0, f32s(4));
        b.call(ComputationId(7), vec![p], f32s(4))
    });
    let program = builder.finish(entry);

    let err = reachable_computations(&program).unwrap_err();
    assert_eq!(err.code(), "malformed_graph");
}

#[test]
fn unreachable_computations_are_skipped() {
    let mut builder = ProgramBuilder::new("orphan");
    let orphan_body = unary_body(&mut builder, "orphan_body", ElementwiseUnaryOp::Exp);
    builder.computation("orphan", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, orphan_body, vec![p], f32s(16))
    });
    let entry = builder.computation("main", |b| {
        let p = b.parameter(0, f32s(16));
        b.unary(ElementwiseUnaryOp::Neg, p)
    });
    let program = builder.finish(entry);

    assert!(collect_fusion_sites(&program).unwrap().is_empty());
    assert_eq!(reachable_computations(&program).unwrap(), vec![entry]);
}

#[test]
fn fusion_body_reached_later_through_a_call_yields_its_fusions() {
    let mut builder = ProgramBuilder::new("fused_then_called");
    let inner = unary_body(&mut builder, "inner", ElementwiseUnaryOp::Exp);
    let shared = builder.computation("shared", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, inner, vec![p], f32s(16))
    });
    let entry = builder.computation("main", |b| {
        let p = b.parameter(0, f32s(16));
        let f = b.fusion(FusionKind::Loop, shared, vec![p], f32s(16));
        b.call(shared, vec![f], f32s(16))
    });
    let program = builder.finish(entry);

    let sites = collect_fusion_sites(&program).unwrap();
    assert_eq!(bodies(&sites), vec![shared, inner]);
    assert_eq!(sites[1].computation, shared);
    assert_eq!(sites[1].node, NodeId(1));
    assert_eq!(reachable_computations(&program).unwrap(), vec![entry, shared, inner]);
}

#[test]
fn second_control_flow_reach_does_not_repeat_sites() {
    let mut builder = ProgramBuilder::new("fused_then_called_twice");
    let inner = unary_body(&mut builder, "inner", ElementwiseUnaryOp::Exp);
    let shared = builder.computation("shared", |b| {
        let p = b.parameter(0, f32s(16));
        b.fusion(FusionKind::Loop, inner, vec![p], f32s(16))
    });
    let entry = builder.computation("main", |b| {
        let p = b.parameter(0, f32s(16));
        let f = b.fusion(FusionKind::Loop, shared, vec![p], f32s(16));
        let once = b.call(shared, vec![f], f32s(16));
        let twice = b.call(shared, vec![once], f32s(16));
        b.fusion(FusionKind::Loop, shared, vec![twice], f32s(16))
    });
    let program = builder.finish(entry);

    let sites = collect_fusion_sites(&program).unwrap();
    assert_eq!(bodies(&sites), vec![shared, inner, shared]);
}
