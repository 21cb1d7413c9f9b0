//! End-to-end tests: build ASTs the way the parser would, run declaration
//! resolution and function analysis, and check folded values, inferred
//! types, and diagnostics.

use num::BigInt;

use cinderc::{Compiler, Config};
use cinderc::types::{ModuleId, NodeId, Symbol};
use cinderc::types::ast::{AstBinOp, AstUnOp, CallKind, NodeKind};
use cinderc::types::entity::DeclState;
use cinderc::value::{PtrBase, Value, ValueKind};

fn comp() -> Compiler {
  let _ = simplelog::SimpleLogger::init(
    log::LevelFilter::Off, simplelog::Config::default());
  Compiler::new(Config::default())
}

fn sym(c: &mut Compiler, s: &str) -> Symbol { c.syms.intern(s) }

fn ident(c: &mut Compiler, s: &str) -> NodeId {
  let name = sym(c, s);
  c.ast.add(NodeKind::Ident(name))
}

fn int(c: &mut Compiler, n: i64) -> NodeId {
  c.ast.add(NodeKind::IntLit(BigInt::from(n)))
}

fn neg(c: &mut Compiler, operand: NodeId) -> NodeId {
  c.ast.add(NodeKind::UnOp { op: AstUnOp::Neg, operand })
}

fn bin(c: &mut Compiler, op: AstBinOp, lhs: NodeId, rhs: NodeId) -> NodeId {
  c.ast.add(NodeKind::BinOp { op, lhs, rhs })
}

fn const_decl(c: &mut Compiler, name: &str, ty: Option<NodeId>, init: NodeId) -> NodeId {
  let name = sym(c, name);
  c.ast.add(NodeKind::VarDecl {
    name, is_const: true, is_pub: true, is_comptime: false, ty, init,
  })
}

fn block(c: &mut Compiler, stmts: Vec<NodeId>) -> NodeId {
  c.ast.add(NodeKind::Block { label: None, stmts: stmts.into() })
}

fn ret(c: &mut Compiler, operand: Option<NodeId>) -> NodeId {
  c.ast.add(NodeKind::Return(operand))
}

fn param(c: &mut Compiler, name: &str, ty: &str, is_comptime: bool) -> NodeId {
  let name = sym(c, name);
  let ty = ident(c, ty);
  c.ast.add(NodeKind::Param { name, ty: Some(ty), is_comptime })
}

#[allow(clippy::too_many_arguments)]
fn fn_def(
  c: &mut Compiler, name: &str, params: Vec<NodeId>, ret_ty: Option<NodeId>,
  ret_infer_err: bool, is_async: bool, body: NodeId,
) -> NodeId {
  let name = sym(c, name);
  c.ast.add(NodeKind::FnDef {
    name,
    params: params.into(),
    ret: ret_ty,
    ret_infer_err,
    is_async,
    is_inline: false,
    is_pub: true,
    body: Some(body),
  })
}

fn call(c: &mut Compiler, callee: NodeId, args: Vec<NodeId>) -> NodeId {
  c.ast.add(NodeKind::Call { callee, args: args.into(), kind: CallKind::Normal })
}

fn module_of(c: &mut Compiler, decls: Vec<NodeId>) -> NodeId {
  c.ast.add(NodeKind::ContainerDecl {
    kind: cinderc::types::ast::ContainerKind::Struct,
    fields: Box::new([]),
    decls: decls.into(),
  })
}

fn decl_value(c: &Compiler, module: ModuleId, name: Symbol) -> Value {
  let decl = c.ents.find_decl(module, name).expect("declaration exists");
  match &c.ents.decls[decl].state {
    DeclState::Ok(v) => v.clone(),
    s => panic!("declaration not resolved: {s:?}"),
  }
}

// Scenario: a const array, a slice of it, and the slice's length.
#[test]
fn array_slice_literal_length() {
  let mut c = comp();
  let elem_ty = ident(&mut c, "i32");
  let elems = vec![int(&mut c, 1), int(&mut c, 2), int(&mut c, 3)];
  let arr = c.ast.add(NodeKind::ArrayInit { elem_ty, len: None, elems: elems.into() });
  let x = const_decl(&mut c, "x", None, arr);
  let xref = ident(&mut c, "x");
  let addr = c.ast.add(NodeKind::UnOp { op: AstUnOp::AddrOf, operand: xref });
  let i32_ty = ident(&mut c, "i32");
  let slice_ty = c.ast.add(NodeKind::SliceType { is_const: true, align: None, elem: i32_ty });
  let y = const_decl(&mut c, "y", Some(slice_ty), addr);
  let yref = ident(&mut c, "y");
  let len_name = sym(&mut c, "len");
  let len = c.ast.add(NodeKind::FieldAccess { lhs: yref, name: len_name });
  let n = const_decl(&mut c, "n", None, len);
  let root = module_of(&mut c, vec![x, y, n]);
  let module = c.compile(root);
  assert!(!c.diags.has_errors(), "unexpected diagnostics: {:?}", c.diags.list());
  let n_name = sym(&mut c, "n");
  let nv = decl_value(&c, module, n_name);
  assert_eq!(nv.as_int(), Some(&BigInt::from(3)));
  // The slice itself is `{ptr, len}` with base-array provenance.
  let y_name = sym(&mut c, "y");
  let yv = decl_value(&c, module, y_name);
  let ValueKind::Struct(fields) = &yv.k else { panic!("slice should be a struct value") };
  let ptr = c.mem.get(fields[0]);
  let ValueKind::Ptr(p) = &ptr.k else { panic!("slice data should be a pointer") };
  assert!(matches!(p.base, PtrBase::ArrayElem { index: 0, .. }),
    "slice data pointer should point at element 0, got {:?}", p.base);
  assert_eq!(c.mem.get(fields[1]).as_int(), Some(&BigInt::from(3)));
}

// Scenario: `/` on signed integers demands an explicit rounding direction.
#[test]
fn signed_division_requires_explicit_rounding() {
  let mut c = comp();
  let i32a = ident(&mut c, "i32");
  let seven = int(&mut c, 7);
  let minus7 = neg(&mut c, seven);
  let a = const_decl(&mut c, "a", Some(i32a), minus7);
  let i32b = ident(&mut c, "i32");
  let two = int(&mut c, 2);
  let b = const_decl(&mut c, "b", Some(i32b), two);
  let aref = ident(&mut c, "a");
  let bref = ident(&mut c, "b");
  let div = bin(&mut c, AstBinOp::Div, aref, bref);
  let q = const_decl(&mut c, "q", None, div);
  let root = module_of(&mut c, vec![a, b, q]);
  c.compile(root);
  assert!(c.diags.find("signed integers must use @divTrunc, @divFloor, or @divExact")
    .is_some(), "missing division diagnostic: {:?}", c.diags.list());
}

// Scenario: a folded addition that overflows its destination type.
#[test]
fn comptime_addition_overflow() {
  let mut c = comp();
  let u8_ty = ident(&mut c, "u8");
  let lhs = int(&mut c, 200);
  let rhs = int(&mut c, 100);
  let sum = bin(&mut c, AstBinOp::Add, lhs, rhs);
  let x = const_decl(&mut c, "x", Some(u8_ty), sum);
  let root = module_of(&mut c, vec![x]);
  c.compile(root);
  assert!(c.diags.find("operation caused overflow").is_some(),
    "missing overflow diagnostic: {:?}", c.diags.list());
}

// Scenario: `!u8` return type infers the union of both propagated sets.
#[test]
fn inferred_error_set_union() {
  let mut c = comp();
  let set_a_names = [sym(&mut c, "X"), sym(&mut c, "Y")];
  let set_a = c.ast.add(NodeKind::ErrorSetDecl(set_a_names.into()));
  let decl_a = const_decl(&mut c, "SetA", None, set_a);
  let set_b_names = [sym(&mut c, "Y"), sym(&mut c, "Z")];
  let set_b = c.ast.add(NodeKind::ErrorSetDecl(set_b_names.into()));
  let decl_b = const_decl(&mut c, "SetB", None, set_b);
  let mk_fn = |c: &mut Compiler, name: &str, set: &str, err: &str| {
    let set_ref = ident(c, set);
    let u8_ty = ident(c, "u8");
    let ret_ty = c.ast.add(NodeKind::ErrorUnionType { set: Some(set_ref), payload: u8_ty });
    let err_name = sym(c, err);
    let err_val = c.ast.add(NodeKind::ErrorValue(err_name));
    let r = ret(c, Some(err_val));
    let body = block(c, vec![r]);
    fn_def(c, name, vec![], Some(ret_ty), false, false, body)
  };
  let f = mk_fn(&mut c, "f", "SetA", "X");
  let g = mk_fn(&mut c, "g", "SetB", "Z");
  // fn h(cond: bool) !u8 { if (cond) return f() else return g(); }
  let cond_param = param(&mut c, "cond", "bool", false);
  let fref = ident(&mut c, "f");
  let fcall = call(&mut c, fref, vec![]);
  let then = ret(&mut c, Some(fcall));
  let gref = ident(&mut c, "g");
  let gcall = call(&mut c, gref, vec![]);
  let els = ret(&mut c, Some(gcall));
  let condref = ident(&mut c, "cond");
  let iff = c.ast.add(NodeKind::If {
    cond: condref, then, els: Some(els), payload: None, err_payload: None,
  });
  let body = block(&mut c, vec![iff]);
  let u8_ret = ident(&mut c, "u8");
  let h = fn_def(&mut c, "h", vec![cond_param], Some(u8_ret), true, false, body);
  let root = module_of(&mut c, vec![decl_a, decl_b, f, g, h]);
  c.compile(root);
  assert!(!c.diags.has_errors(), "unexpected diagnostics: {:?}", c.diags.list());
  let h_name = sym(&mut c, "h");
  let (_, h_rec) = c.ents.fns.enum_iter()
    .find(|(_, r)| r.name == h_name)
    .expect("h analyzed");
  let mut names: Vec<&str> = h_rec.inferred_errors.iter()
    .map(|&e| c.syms.name(c.errors.name(e)))
    .collect();
  names.sort_unstable();
  assert_eq!(names, ["X", "Y", "Z"]);
}

// Scenario: a generic type function is instantiated once per distinct
// binding tuple.
#[test]
fn generic_instantiation_memoized() {
  let mut c = comp();
  let t_param = {
    let name = sym(&mut c, "T");
    let ty = ident(&mut c, "type");
    c.ast.add(NodeKind::Param { name, ty: Some(ty), is_comptime: true })
  };
  let container = c.ast.add(NodeKind::ContainerDecl {
    kind: cinderc::types::ast::ContainerKind::Struct,
    fields: Box::new([]),
    decls: Box::new([]),
  });
  let r = ret(&mut c, Some(container));
  let body = block(&mut c, vec![r]);
  let type_ret = ident(&mut c, "type");
  let list = fn_def(&mut c, "List", vec![t_param], Some(type_ret), false, false, body);
  let mk_call = |c: &mut Compiler| {
    let callee = ident(c, "List");
    let arg = ident(c, "u8");
    call(c, callee, vec![arg])
  };
  let call_a = mk_call(&mut c);
  let a = const_decl(&mut c, "A", None, call_a);
  let call_b = mk_call(&mut c);
  let b = const_decl(&mut c, "B", None, call_b);
  let root = module_of(&mut c, vec![list, a, b]);
  let module = c.compile(root);
  assert!(!c.diags.has_errors(), "unexpected diagnostics: {:?}", c.diags.list());
  assert_eq!(c.generic_insts.len(), 1, "one generic-table entry for List(u8)");
  let a_name = sym(&mut c, "A");
  let b_name = sym(&mut c, "B");
  let av = decl_value(&c, module, a_name);
  let bv = decl_value(&c, module, b_name);
  assert_eq!(av.as_ty().expect("A is a type"), bv.as_ty().expect("B is a type"),
    "both calls must produce the one instantiated type");
}

// Scenario: an async function that never suspends keeps the completion
// machinery but never references the cancellation path.
#[test]
fn coroutine_early_completion() {
  let mut c = comp();
  let one = int(&mut c, 1);
  let r = ret(&mut c, Some(one));
  let body = block(&mut c, vec![r]);
  let i32_ty = ident(&mut c, "i32");
  let f = fn_def(&mut c, "one", vec![], Some(i32_ty), false, true, body);
  let root = module_of(&mut c, vec![f]);
  c.compile(root);
  assert!(!c.diags.has_errors(), "unexpected diagnostics: {:?}", c.diags.list());
  let name = sym(&mut c, "one");
  let (_, rec) = c.ents.fns.enum_iter().find(|(_, r)| r.name == name).expect("analyzed");
  let air = rec.air.as_ref().expect("analyzed body");
  use cinderc::types::ir::InstKind;
  let mut has_alloc = false;
  let mut has_xchg = false;
  let mut has_cond_br = false;
  for &bb in &air.order {
    for &i in &air.blocks[bb].insts {
      match &air.insts[i].k {
        InstKind::CoroAlloc { .. } => has_alloc = true,
        InstKind::AtomicRmw { .. } => has_xchg = true,
        InstKind::CondBr { .. } => has_cond_br = true,
        _ => {}
      }
    }
  }
  assert!(has_alloc, "coroutine prelude must allocate the frame");
  assert!(has_xchg, "completion must exchange the awaiter slot");
  assert!(has_cond_br, "completion branches on the prior awaiter");
  assert!(air.order.iter().all(|&bb| air.blocks[bb].name != "CoroEarlyFinal"),
    "the cancellation path must be unreachable without a suspend");
  assert!(air.order.iter().any(|&bb| air.blocks[bb].name == "CoroNormalFinal"),
    "the completion path must be reachable");
}

// Boundary: `null` coerces to `?T` but never to `T`; `undefined` coerces
// to anything.
#[test]
fn null_and_undefined_coercions() {
  let mut c = comp();
  let i32_ty = ident(&mut c, "i32");
  let opt_ty = c.ast.add(NodeKind::UnOp { op: AstUnOp::OptionalType, operand: i32_ty });
  let null1 = c.ast.add(NodeKind::NullLit);
  let ok = const_decl(&mut c, "ok", Some(opt_ty), null1);
  let u32_ty = ident(&mut c, "u32");
  let undef = c.ast.add(NodeKind::UndefLit);
  let ud = const_decl(&mut c, "ud", Some(u32_ty), undef);
  let root = module_of(&mut c, vec![ok, ud]);
  let module = c.compile(root);
  assert!(!c.diags.has_errors(), "unexpected diagnostics: {:?}", c.diags.list());
  let ud_name = sym(&mut c, "ud");
  assert!(decl_value(&c, module, ud_name).is_undef());

  let mut c2 = comp();
  let i32_ty = ident(&mut c2, "i32");
  let null2 = c2.ast.add(NodeKind::NullLit);
  let bad = const_decl(&mut c2, "bad", Some(i32_ty), null2);
  let root2 = module_of(&mut c2, vec![bad]);
  c2.compile(root2);
  assert!(c2.diags.find("expected type").is_some(),
    "null must not coerce to a non-optional: {:?}", c2.diags.list());
}

// P6: exhaustiveness over an enum toggles with a single missing prong.
#[test]
fn switch_exhaustiveness_toggles() {
  let build = |include_b: bool| {
    let mut c = comp();
    let fields = {
      let a = sym(&mut c, "A");
      let b = sym(&mut c, "B");
      let fa = c.ast.add(NodeKind::ContainerField { name: a, ty: None, value: None });
      let fb = c.ast.add(NodeKind::ContainerField { name: b, ty: None, value: None });
      vec![fa, fb]
    };
    let color_container = c.ast.add(NodeKind::ContainerDecl {
      kind: cinderc::types::ast::ContainerKind::Enum,
      fields: fields.into(),
      decls: Box::new([]),
    });
    let color = const_decl(&mut c, "Color", None, color_container);
    let target = {
      let colorref = ident(&mut c, "Color");
      let b = sym(&mut c, "B");
      c.ast.add(NodeKind::FieldAccess { lhs: colorref, name: b })
    };
    let mut prongs = vec![];
    let item_a = {
      let colorref = ident(&mut c, "Color");
      let a = sym(&mut c, "A");
      c.ast.add(NodeKind::FieldAccess { lhs: colorref, name: a })
    };
    let body_a = int(&mut c, 1);
    prongs.push(c.ast.add(NodeKind::SwitchProng {
      items: Box::new([item_a]), ranges: Box::new([]), payload: None, body: body_a,
    }));
    if include_b {
      let item_b = {
        let colorref = ident(&mut c, "Color");
        let b = sym(&mut c, "B");
        c.ast.add(NodeKind::FieldAccess { lhs: colorref, name: b })
      };
      let body_b = int(&mut c, 2);
      prongs.push(c.ast.add(NodeKind::SwitchProng {
        items: Box::new([item_b]), ranges: Box::new([]), payload: None, body: body_b,
      }));
    }
    let sw = c.ast.add(NodeKind::Switch { target, prongs: prongs.into() });
    let i32_ty = ident(&mut c, "i32");
    let r = const_decl(&mut c, "r", Some(i32_ty), sw);
    let root = module_of(&mut c, vec![color, r]);
    let module = c.compile(root);
    (c, module)
  };
  let (full, module) = build(true);
  assert!(!full.diags.has_errors(),
    "a covering switch must analyze: {:?}", full.diags.list());
  let _ = module;
  let (missing, _) = build(false);
  assert!(missing.diags.find("not handled in switch").is_some(),
    "a missing prong must be diagnosed: {:?}", missing.diags.list());
}

// A runtime loop interpreted at comptime through `@inlineCall`.
#[test]
fn comptime_execution_of_a_loop() {
  let mut c = comp();
  // fn tri(n: u32) u32 { var total: u32 = 0; var i: u32 = 0;
  //   while (i < n) : (i += 1) { total += i; } return total; }
  let n_param = param(&mut c, "n", "u32", false);
  let u32a = ident(&mut c, "u32");
  let zero1 = int(&mut c, 0);
  let total_name = sym(&mut c, "total");
  let total_decl = c.ast.add(NodeKind::VarDecl {
    name: total_name, is_const: false, is_pub: false, is_comptime: false,
    ty: Some(u32a), init: zero1,
  });
  let u32b = ident(&mut c, "u32");
  let zero2 = int(&mut c, 0);
  let i_name = sym(&mut c, "i");
  let i_decl = c.ast.add(NodeKind::VarDecl {
    name: i_name, is_const: false, is_pub: false, is_comptime: false,
    ty: Some(u32b), init: zero2,
  });
  let iref1 = ident(&mut c, "i");
  let nref = ident(&mut c, "n");
  let cond = bin(&mut c, AstBinOp::CmpLt, iref1, nref);
  let iref2 = ident(&mut c, "i");
  let one1 = int(&mut c, 1);
  let inc = c.ast.add(NodeKind::Assign {
    op: Some(AstBinOp::Add), lhs: iref2, rhs: one1,
  });
  let totalref = ident(&mut c, "total");
  let iref3 = ident(&mut c, "i");
  let acc = c.ast.add(NodeKind::Assign {
    op: Some(AstBinOp::Add), lhs: totalref, rhs: iref3,
  });
  let loop_body = block(&mut c, vec![acc]);
  let while_loop = c.ast.add(NodeKind::While {
    label: None, cond, cont: Some(inc), body: loop_body, els: None,
    payload: None, err_payload: None, is_inline: false,
  });
  let totalref2 = ident(&mut c, "total");
  let r = ret(&mut c, Some(totalref2));
  let body = block(&mut c, vec![total_decl, i_decl, while_loop, r]);
  let u32_ret = ident(&mut c, "u32");
  let tri = fn_def(&mut c, "tri", vec![n_param], Some(u32_ret), false, false, body);
  // const s = @inlineCall(tri, 5);
  let inline_call_name = sym(&mut c, "inlineCall");
  let triref = ident(&mut c, "tri");
  let five = int(&mut c, 5);
  let callnode = c.ast.add(NodeKind::BuiltinCall {
    name: inline_call_name, args: Box::new([triref, five]),
  });
  let s = const_decl(&mut c, "s", None, callnode);
  let root = module_of(&mut c, vec![tri, s]);
  let module = c.compile(root);
  assert!(!c.diags.has_errors(), "unexpected diagnostics: {:?}", c.diags.list());
  let s_name = sym(&mut c, "s");
  let sv = decl_value(&c, module, s_name);
  assert_eq!(sv.as_int(), Some(&BigInt::from(10)), "0+1+2+3+4");
}

// Advisory: a non-void expression statement is diagnosed.
#[test]
fn ignored_value_is_diagnosed() {
  let mut c = comp();
  let lhs = int(&mut c, 1);
  let rhs = int(&mut c, 2);
  let sum = bin(&mut c, AstBinOp::Add, lhs, rhs);
  let body = block(&mut c, vec![sum]);
  let f = fn_def(&mut c, "f", vec![], None, false, false, body);
  let root = module_of(&mut c, vec![f]);
  c.compile(root);
  assert!(c.diags.find("expression value is ignored").is_some(),
    "missing unused-value diagnostic: {:?}", c.diags.list());
}

// Declaration errors: redefinitions and self-reference cycles.
#[test]
fn declaration_cycles_and_redefinitions() {
  let mut c = comp();
  let aref = ident(&mut c, "a");
  let a = const_decl(&mut c, "a", None, aref);
  let root = module_of(&mut c, vec![a]);
  c.compile(root);
  assert!(c.diags.find("depends on itself").is_some(),
    "missing cycle diagnostic: {:?}", c.diags.list());

  let mut c2 = comp();
  let one = int(&mut c2, 1);
  let d1 = const_decl(&mut c2, "x", None, one);
  let two = int(&mut c2, 2);
  let d2 = const_decl(&mut c2, "x", None, two);
  let root2 = module_of(&mut c2, vec![d1, d2]);
  c2.compile(root2);
  assert!(c2.diags.find("redefinition of 'x'").is_some(),
    "missing redefinition diagnostic: {:?}", c2.diags.list());
}
