//! Build the unanalyzed IR from the AST. The walker is syntax-directed:
//! types are unknown here, so the only errors it reports are contextual
//! ("return outside function", `@cInclude` outside `@cImport`); everything
//! type-dependent is deferred to analysis.

use hashbrown::HashMap;
use num::BigInt;

use crate::Compiler;
use crate::builder::IrBuilder;
use crate::types::{FnId, ModuleId, NodeId, ScopeId, Symbol, VarId};
use crate::types::ast::{
  AstBinOp, AstUnOp, CallKind, Capture, ContainerKind, DeferKind, NodeKind,
};
use crate::types::entity::{Arity, Builtin, FnRecord};
use crate::types::ir::{
  BinOp, BlockId, CallModifier, Exec, InstId, InstKind, ScopeKind, SwitchCase, SwitchRange,
  UnOp, Var,
};
use crate::types::ty::{
  CallConv, EnumInfo, FieldInfo, FnTyInfo, Param, PtrInfo, StructInfo, TyId, TyKind, Types,
  UnionInfo,
};
use crate::value::{PtrBase, PtrMut, PtrValue, Value, ValueKind};

/// Indicates that generation reached a terminator; nothing can follow on
/// this path.
#[derive(Copy, Clone, Debug)]
pub struct Diverged;

/// The return type of generation functions that may terminate the current
/// block instead of producing a value.
pub type Gen<T> = Result<T, Diverged>;

bitflags::bitflags! {
  /// The lvalue hint: whether the sub-expression must yield an address,
  /// and with which qualifiers.
  #[derive(Clone, Copy, Debug, PartialEq, Eq)]
  pub struct LVal: u8 {
    /// The expression position wants a pointer.
    const PTR = 1;
    /// The resulting pointer may be const.
    const CONST = 2;
    /// The access is volatile.
    const VOLATILE = 4;
  }
}

/// A value request.
pub const LVAL_NONE: LVal = LVal::empty();
/// An address request.
pub const LVAL_PTR: LVal = LVal::PTR;

/// A breakable construct currently in scope: a labeled block or a loop.
#[derive(Debug)]
struct Frame {
  label: Option<Symbol>,
  is_loop: bool,
  break_bb: BlockId,
  continue_bb: Option<BlockId>,
  /// `(pred, value)` pairs collected lazily from `break`s.
  incoming: Vec<(BlockId, InstId)>,
  /// Exits targeting this frame run defers down to this scope.
  scope: ScopeId,
}

/// The coroutine wiring while generating an async function.
#[derive(Clone, Copy, Debug)]
struct GenCoro {
  promise: InstId,
  early_final: BlockId,
  normal_final: BlockId,
  cleanup: BlockId,
  suspend_bb: BlockId,
}

struct GenIr<'a> {
  comp: &'a mut Compiler,
  b: IrBuilder,
  module: ModuleId,
  func: Option<FnId>,
  root_scope: ScopeId,
  locals: Vec<(Symbol, VarId)>,
  frames: Vec<Frame>,
  coro: Option<GenCoro>,
}

/// The placeholder value slot of unanalyzed instructions.
fn pending() -> Value { Value::runtime(Types::INVALID) }

impl<'a> GenIr<'a> {
  fn new(comp: &'a mut Compiler, module: ModuleId, func: Option<FnId>, root: ScopeId) -> Self {
    let quota = comp.config.branch_quota;
    Self {
      comp,
      b: IrBuilder::new(quota),
      module,
      func,
      root_scope: root,
      locals: vec![],
      frames: vec![],
      coro: None,
    }
  }

  /// Report a contextual error and produce a poison constant so generation
  /// can continue.
  fn gen_error(&mut self, scope: ScopeId, node: NodeId, msg: impl Into<String>) -> InstId {
    let span = self.comp.ast.span(node);
    self.comp.emit_error(span, msg);
    self.b.const_gen(scope, node, Value::invalid())
  }

  fn void_const(&mut self, scope: ScopeId, node: NodeId) -> InstId {
    self.b.const_gen(scope, node, Value::void())
  }

  fn usize_const(&mut self, scope: ScopeId, node: NodeId, n: u64) -> InstId {
    let t = self.comp.types.usize();
    self.b.const_gen(scope, node, Value::int(t, BigInt::from(n)))
  }

  fn enum_const(&mut self, scope: ScopeId, node: NodeId, ty: TyId, idx: u64) -> InstId {
    self.b.const_gen(scope, node, Value { ty, k: ValueKind::Enum(BigInt::from(idx)) })
  }

  /// Wrap a pointer-producing instruction per the lvalue hint.
  fn lval_wrap(&mut self, scope: ScopeId, node: NodeId, ptr: InstId, lval: LVal) -> InstId {
    if lval.contains(LVal::PTR) {
      ptr
    } else {
      self.b.append_gen(scope, node, InstKind::LoadPtr { ptr }, pending())
    }
  }

  /// The address of `node`: the pointer for addressable expressions, a
  /// materialized const ref otherwise.
  fn addr_of(&mut self, scope: ScopeId, node: NodeId) -> Gen<InstId> {
    let addressable = matches!(self.comp.ast.kind(node),
      NodeKind::Ident(_) | NodeKind::FieldAccess { .. } | NodeKind::ArrayAccess { .. } |
      NodeKind::UnOp { op: AstUnOp::Deref, .. });
    if addressable {
      self.expr(scope, node, LVAL_PTR)
    } else {
      let v = self.expr(scope, node, LVAL_NONE)?;
      Ok(self.b.append_gen(scope, node, InstKind::Ref { operand: v }, pending()))
    }
  }

  /// Inline the defer bodies registered between `scope` (inclusive) and
  /// `outer` (exclusive), innermost first. Error-only defers run when
  /// `with_err`.
  fn gen_defers(&mut self, scope: ScopeId, outer: ScopeId, with_err: bool) -> Gen<()> {
    let mut bodies = vec![];
    for (sid, s) in self.comp.scopes.ancestors(scope) {
      if sid == outer { break }
      match &s.k {
        ScopeKind::Defer { kind, body } => {
          if *kind == DeferKind::Unconditional || with_err {
            bodies.push((s.parent, *body));
          }
        }
        ScopeKind::FnDef { .. } | ScopeKind::Decls { .. } => break,
        _ => {}
      }
    }
    for (parent, body) in bodies {
      let dscope = self.comp.scopes.push(parent, body, ScopeKind::DeferExpr);
      self.expr(dscope, body, LVAL_NONE)?;
    }
    Ok(())
  }

  fn count_err_defers(&self, scope: ScopeId) -> usize {
    let mut n = 0;
    for (_, s) in self.comp.scopes.ancestors(scope) {
      match &s.k {
        ScopeKind::Defer { kind: DeferKind::ErrOnly, .. } => n += 1,
        ScopeKind::FnDef { .. } | ScopeKind::Decls { .. } => break,
        _ => {}
      }
    }
    n
  }

  fn find_frame(&self, label: Option<Symbol>, want_loop: bool) -> Option<usize> {
    self.frames.iter().enumerate().rev().find_map(|(i, f)| {
      let hit = match label {
        Some(l) => f.label == Some(l) && (!want_loop || f.is_loop),
        None => !want_loop || f.is_loop,
      };
      hit.then_some(i)
    })
  }

  /// Declare a local variable bound to `init`, returning the new scope that
  /// covers the following statements.
  fn declare_local(
    &mut self, scope: ScopeId, node: NodeId, name: Symbol,
    is_const: bool, is_comptime: bool, ty: Option<InstId>, init: InstId,
  ) -> ScopeId {
    if name != self.comp.syms.intern("_") {
      if self.locals.iter().any(|&(n, _)| n == name) {
        let text = self.comp.syms.name(name).to_owned();
        self.gen_error(scope, node, format!("redeclaration of variable '{text}'"));
      } else {
        let text = self.comp.syms.name(name).to_owned();
        if self.comp.find_primitive_type(&text).is_some() {
          self.gen_error(scope, node,
            format!("variable shadows primitive type '{text}'"));
        } else if self.comp.find_decl_in_scope(scope, name).is_some() {
          self.gen_error(scope, node,
            format!("variable '{text}' shadows a declaration"));
        }
      }
    }
    let var = self.b.exec.vars.push(Var {
      name, scope, decl_node: node, is_const, is_comptime, ty: None, slot: None,
    });
    let vscope = self.comp.scopes.push(Some(scope), node, ScopeKind::VarDecl { var });
    self.b.exec.vars[var].scope = vscope;
    self.locals.push((name, var));
    self.b.append(scope, node, InstKind::DeclVar { var, ty, init }, Value::void());
    vscope
  }

  /// The main expression walker.
  fn expr(&mut self, scope: ScopeId, node: NodeId, lval: LVal) -> Gen<InstId> {
    let kind = self.comp.ast.kind(node).clone();
    match kind {
      NodeKind::IntLit(n) => Ok(self.b.const_val(scope, node, Value::comptime_int(n))),
      NodeKind::FloatLit(r) =>
        Ok(self.b.const_val(scope, node, Value::float(Types::COMPTIME_FLOAT, r))),
      NodeKind::BoolLit(v) => Ok(self.b.const_val(scope, node, Value::bool(v))),
      NodeKind::NullLit => Ok(self.b.const_val(scope, node, Value::null())),
      NodeKind::UndefLit =>
        Ok(self.b.const_val(scope, node, Value::undef(Types::UNDEFINED))),
      NodeKind::StrLit(s) => Ok(self.gen_str_lit(scope, node, &s)),
      NodeKind::ErrorValue(name) => {
        let e = self.comp.errors.intern(name);
        let set = self.comp.types.error_set(vec![e]);
        Ok(self.b.const_val(scope, node, Value { ty: set, k: ValueKind::ErrorCode(e) }))
      }
      NodeKind::ErrorSetDecl(names) => {
        let errs = names.iter().map(|&n| self.comp.errors.intern(n)).collect();
        let set = self.comp.types.error_set(errs);
        Ok(self.b.const_val(scope, node, Value::ty(set)))
      }
      NodeKind::Ident(name) => Ok(self.gen_ident(scope, node, name, lval)),
      NodeKind::FieldAccess { lhs, name } => {
        let container = self.addr_of(scope, lhs)?;
        let ptr = self.b.append(scope, node,
          InstKind::FieldPtr { container, field: name }, pending());
        Ok(self.lval_wrap(scope, node, ptr, lval))
      }
      NodeKind::ArrayAccess { lhs, index } => {
        let array_ptr = self.addr_of(scope, lhs)?;
        let index = self.expr(scope, index, LVAL_NONE)?;
        let ptr = self.b.append(scope, node,
          InstKind::ElemPtr { array_ptr, index, safety: true }, pending());
        Ok(self.lval_wrap(scope, node, ptr, lval))
      }
      NodeKind::SliceExpr { lhs, start, end } => {
        let array_ptr = self.addr_of(scope, lhs)?;
        let start = self.expr(scope, start, LVAL_NONE)?;
        let end = end.map(|e| self.expr(scope, e, LVAL_NONE)).transpose()?;
        Ok(self.b.append(scope, node,
          InstKind::SliceOp { array_ptr, start, end, safety: true }, pending()))
      }
      NodeKind::BinOp { op: AstBinOp::BoolAnd, lhs, rhs } =>
        self.gen_bool_circuit(scope, node, lhs, rhs, true),
      NodeKind::BinOp { op: AstBinOp::BoolOr, lhs, rhs } =>
        self.gen_bool_circuit(scope, node, lhs, rhs, false),
      NodeKind::BinOp { op, lhs, rhs } => {
        let lhs = self.expr(scope, lhs, LVAL_NONE)?;
        let rhs = self.expr(scope, rhs, LVAL_NONE)?;
        let op = map_bin_op(op);
        Ok(self.b.append(scope, node, InstKind::BinOp { op, lhs, rhs }, pending()))
      }
      NodeKind::UnOp { op: AstUnOp::Deref, operand } => {
        let ptr = self.expr(scope, operand, LVAL_NONE)?;
        Ok(self.lval_wrap(scope, node, ptr, lval))
      }
      NodeKind::UnOp { op: AstUnOp::AddrOf, operand } => self.addr_of(scope, operand),
      NodeKind::UnOp { op, operand } => {
        let operand = self.expr(scope, operand, LVAL_NONE)?;
        let op = match op {
          AstUnOp::Neg => UnOp::Neg,
          AstUnOp::NegWrap => UnOp::NegWrap,
          AstUnOp::BoolNot => UnOp::BoolNot,
          AstUnOp::BitNot => UnOp::BitNot,
          AstUnOp::OptionalType => UnOp::OptionalType,
          AstUnOp::Deref | AstUnOp::AddrOf => unreachable!("handled above"),
        };
        Ok(self.b.append(scope, node, InstKind::UnOp { op, operand }, pending()))
      }
      NodeKind::Assign { op, lhs, rhs } => self.gen_assign(scope, node, op, lhs, rhs),
      NodeKind::Block { label, stmts } => self.gen_block(scope, node, label, &stmts, lval),
      NodeKind::VarDecl { .. } =>
        panic!("variable declarations are handled by block generation"),
      NodeKind::Defer { .. } =>
        panic!("defer statements are handled by block generation"),
      NodeKind::Return(operand) => {
        let value = match operand {
          Some(op) => self.expr(scope, op, LVAL_NONE)?,
          None => self.void_const(scope, node),
        };
        self.gen_return(scope, node, value)
      }
      NodeKind::Break { label, operand } => self.gen_break(scope, node, label, operand),
      NodeKind::Continue { label } => self.gen_continue(scope, node, label),
      NodeKind::If { cond, then, els, payload, err_payload } =>
        self.gen_if(scope, node, cond, then, els, payload, err_payload),
      NodeKind::While { .. } => self.gen_while(scope, node, &kind),
      NodeKind::For { .. } => self.gen_for(scope, node, &kind),
      NodeKind::Switch { target, prongs } => self.gen_switch(scope, node, target, &prongs),
      NodeKind::Try(operand) => self.gen_try(scope, node, operand, lval),
      NodeKind::Catch { operand, payload, handler } =>
        self.gen_catch(scope, node, operand, payload, handler),
      NodeKind::OrElse { operand, fallback } =>
        self.gen_orelse(scope, node, operand, fallback),
      NodeKind::Call { callee, args, kind } => {
        let callee = self.expr(scope, callee, LVAL_NONE)?;
        let args = args.iter()
          .map(|&a| self.expr(scope, a, LVAL_NONE))
          .collect::<Gen<Box<[_]>>>()?;
        let modifier = match kind {
          CallKind::Normal => CallModifier::Normal,
          CallKind::Async(alloc) => {
            let alloc = self.expr(scope, alloc, LVAL_NONE)?;
            CallModifier::Async(alloc)
          }
        };
        Ok(self.b.append(scope, node, InstKind::Call { callee, args, modifier }, pending()))
      }
      NodeKind::BuiltinCall { name, args } => self.gen_builtin(scope, node, name, &args),
      NodeKind::Comptime(body) => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        self.expr(ct, body, lval)
      }
      NodeKind::Unreachable => {
        self.b.unreachable(scope, node);
        Err(Diverged)
      }
      NodeKind::Suspend(body) => self.gen_suspend(scope, node, body),
      NodeKind::Resume(operand) => {
        let target = self.expr(scope, operand, LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::CoroResume { target }, Value::void()))
      }
      NodeKind::Await(operand) => self.gen_await(scope, node, operand),
      NodeKind::ArrayInit { elem_ty, len, elems } => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let elem_ty = self.expr(ct, elem_ty, LVAL_NONE)?;
        let len = len.map(|l| self.expr(ct, l, LVAL_NONE)).transpose()?;
        let elems = elems.iter()
          .map(|&e| self.expr(scope, e, LVAL_NONE))
          .collect::<Gen<Box<[_]>>>()?;
        Ok(self.b.append(scope, node,
          InstKind::ArrayInit { elem_ty, len, elems }, pending()))
      }
      NodeKind::StructInit { ty, fields } => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let ty = self.expr(ct, ty, LVAL_NONE)?;
        let fields = fields.iter()
          .map(|&(name, v)| Ok((name, self.expr(scope, v, LVAL_NONE)?)))
          .collect::<Gen<Box<[_]>>>()?;
        Ok(self.b.append(scope, node, InstKind::StructInit { ty, fields }, pending()))
      }
      NodeKind::ArrayType { len, elem } => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let Some(len) = len else {
          return Ok(self.gen_error(scope, node, "inferred array length outside initializer"))
        };
        let len = self.expr(ct, len, LVAL_NONE)?;
        let elem = self.expr(ct, elem, LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::MakeArrayType { len, elem }, pending()))
      }
      NodeKind::PtrType { is_many, is_const, is_volatile, align, elem } => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let align = align.map(|a| self.expr(ct, a, LVAL_NONE)).transpose()?;
        let elem = self.expr(ct, elem, LVAL_NONE)?;
        Ok(self.b.append(scope, node,
          InstKind::MakePtrType { is_many, is_const, is_volatile, align, elem }, pending()))
      }
      NodeKind::SliceType { is_const, align, elem } => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let align = align.map(|a| self.expr(ct, a, LVAL_NONE)).transpose()?;
        let elem = self.expr(ct, elem, LVAL_NONE)?;
        Ok(self.b.append(scope, node,
          InstKind::MakeSliceType { is_const, align, elem }, pending()))
      }
      NodeKind::ErrorUnionType { set, payload } => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let set = set.map(|s| self.expr(ct, s, LVAL_NONE)).transpose()?;
        let payload = self.expr(ct, payload, LVAL_NONE)?;
        Ok(self.b.append(scope, node,
          InstKind::MakeErrUnionType { set, payload }, pending()))
      }
      NodeKind::ContainerDecl { kind, fields, decls } =>
        Ok(self.gen_container(scope, node, kind, &fields, &decls)),
      NodeKind::FnDef { .. } | NodeKind::Param { .. } | NodeKind::SwitchProng { .. } |
      NodeKind::ContainerField { .. } =>
        panic!("node kind only valid in a dedicated position: {kind:?}"),
    }
  }

  fn gen_str_lit(&mut self, scope: ScopeId, node: NodeId, s: &str) -> InstId {
    let u8t = self.comp.types.int(crate::types::IntInfo { signed: false, bits: 8 });
    let elems: Box<[_]> = s.bytes()
      .map(|b| self.comp.mem.alloc(Value::int(u8t, BigInt::from(b))))
      .collect();
    let len = elems.len() as u64;
    let arr_ty = self.comp.types.array(u8t, len);
    let arr = self.comp.mem.alloc(Value {
      ty: arr_ty,
      k: ValueKind::Array(crate::value::ArrayData::Elems(elems)),
    });
    let ptr_ty = self.comp.types.ptr(PtrInfo::single(arr_ty, true));
    self.b.const_val(scope, node, Value { ty: ptr_ty, k: ValueKind::Ptr(PtrValue {
      base: PtrBase::Obj(arr), mutability: PtrMut::ComptimeConst,
    }) })
  }

  fn gen_ident(&mut self, scope: ScopeId, node: NodeId, name: Symbol, lval: LVal) -> InstId {
    if let Some(&(_, var)) = self.locals.iter().rev().find(|&&(n, _)| n == name) {
      let ptr = self.b.append(scope, node, InstKind::VarPtr { var }, pending());
      return self.lval_wrap(scope, node, ptr, lval)
    }
    let text = self.comp.syms.name(name).to_owned();
    if let Some(ty) = self.comp.find_primitive_type(&text) {
      return self.b.const_val(scope, node, Value::ty(ty))
    }
    self.b.append(scope, node,
      InstKind::DeclRef { name, ptr: lval.contains(LVal::PTR) }, pending())
  }

  fn gen_bool_circuit(
    &mut self, scope: ScopeId, node: NodeId, lhs: NodeId, rhs: NodeId, is_and: bool,
  ) -> Gen<InstId> {
    let a = self.expr(scope, lhs, LVAL_NONE)?;
    let rhs_bb = self.b.new_block("BoolRhs");
    let end_bb = self.b.new_block("BoolEnd");
    if is_and {
      self.b.cond_br(scope, node, a, rhs_bb, end_bb);
    } else {
      self.b.cond_br(scope, node, a, end_bb, rhs_bb);
    }
    let short_pred = self.b.cur_bb;
    let mut incoming = vec![(short_pred, a)];
    self.b.append_block(rhs_bb);
    if let Ok(v) = self.expr(scope, rhs, LVAL_NONE) {
      incoming.push((self.b.cur_bb, v));
      self.b.br(scope, node, end_bb);
    }
    self.b.append_block(end_bb);
    Ok(self.b.append(scope, node, InstKind::Phi { incoming: incoming.into() }, pending()))
  }

  fn gen_assign(
    &mut self, scope: ScopeId, node: NodeId,
    op: Option<AstBinOp>, lhs: NodeId, rhs: NodeId,
  ) -> Gen<InstId> {
    // `_ = expr` evaluates and discards.
    if_chain::if_chain! {
      if let NodeKind::Ident(name) = *self.comp.ast.kind(lhs);
      if self.comp.syms.name(name) == "_";
      if !self.locals.iter().any(|&(n, _)| n == name);
      then {
        self.expr(scope, rhs, LVAL_NONE)?;
        return Ok(self.void_const(scope, node))
      }
    }
    let ptr = self.expr(scope, lhs, LVAL_PTR)?;
    let rhs = self.expr(scope, rhs, LVAL_NONE)?;
    let value = match op {
      None => rhs,
      Some(op) => {
        let old = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr }, pending());
        let op = map_bin_op(op);
        self.b.append(scope, node, InstKind::BinOp { op, lhs: old, rhs }, pending())
      }
    };
    self.b.append(scope, node, InstKind::StorePtr { ptr, value }, Value::void());
    Ok(self.void_const(scope, node))
  }

  fn gen_block(
    &mut self, parent: ScopeId, node: NodeId, label: Option<Symbol>,
    stmts: &[NodeId], _lval: LVal,
  ) -> Gen<InstId> {
    let block_scope = self.comp.scopes.push(Some(parent), node, ScopeKind::Block { label });
    let locals_len = self.locals.len();
    let labeled = label.is_some();
    if labeled {
      let break_bb = self.b.new_block("BlockEnd");
      self.frames.push(Frame {
        label, is_loop: false, break_bb, continue_bb: None,
        incoming: vec![], scope: block_scope,
      });
    }
    let mut scope = block_scope;
    let mut flow: Gen<()> = Ok(());
    for &stmt in stmts {
      match self.comp.ast.kind(stmt).clone() {
        NodeKind::VarDecl { name, is_const, is_comptime, ty, init, .. } => {
          let r = (|| {
            let ty = ty.map(|t| {
              let ct = self.comp.scopes.push(Some(scope), t, ScopeKind::Comptime);
              self.expr(ct, t, LVAL_NONE)
            }).transpose()?;
            let init = self.expr(scope, init, LVAL_NONE)?;
            scope = self.declare_local(scope, stmt, name, is_const, is_comptime, ty, init);
            Ok(())
          })();
          if r.is_err() { flow = r; break }
        }
        NodeKind::Defer { kind, body } => {
          scope = self.comp.scopes.push(Some(scope), stmt, ScopeKind::Defer { kind, body });
        }
        _ => match self.expr(scope, stmt, LVAL_NONE) {
          Ok(v) => {
            self.b.append_gen(scope, stmt,
              InstKind::CheckStatementIsVoid { operand: v }, Value::void());
          }
          Err(Diverged) => { flow = Err(Diverged); break }
        },
      }
    }
    self.locals.truncate(locals_len);
    if !labeled {
      return match flow {
        Ok(()) => {
          self.gen_defers(scope, parent, false)?;
          Ok(self.void_const(block_scope, node))
        }
        Err(d) => Err(d),
      }
    }
    // Labeled block: the fall-through joins the breaks.
    if flow.is_ok() && self.gen_defers(scope, parent, false).is_ok() {
      let v = self.void_const(block_scope, node);
      let end = self.frames.last().expect("frame pushed above").break_bb;
      let cur = self.b.cur_bb;
      self.frames.last_mut().expect("frame").incoming.push((cur, v));
      self.b.br(block_scope, node, end);
    }
    let frame = self.frames.pop().expect("frame pushed above");
    if frame.incoming.is_empty() { return Err(Diverged) }
    self.b.append_block(frame.break_bb);
    Ok(self.b.append(block_scope, node,
      InstKind::Phi { incoming: frame.incoming.into() }, pending()))
  }

  fn gen_return(&mut self, scope: ScopeId, node: NodeId, value: InstId) -> Gen<InstId> {
    if self.func.is_none() {
      return Ok(self.gen_error(scope, node, "return expression outside function definition"))
    }
    if self.comp.scopes.inside_defer_expr(scope) {
      return Ok(self.gen_error(scope, node, "cannot return from defer expression"))
    }
    self.b.append_gen(scope, node,
      InstKind::AddImplicitReturnType { operand: value }, Value::void());
    if self.coro.is_some() {
      return self.gen_async_return(scope, node, value)
    }
    if self.count_err_defers(scope) > 0 {
      // Two-pass exit: the error path also runs error-only defers.
      let is_err = self.b.append_gen(scope, node,
        InstKind::TestErr { operand: value }, pending());
      let err_bb = self.b.new_block("ErrRetDefers");
      let ok_bb = self.b.new_block("OkRetDefers");
      self.b.cond_br(scope, node, is_err, err_bb, ok_bb);
      self.b.append_block(err_bb);
      self.gen_defers(scope, self.root_scope, true)?;
      self.b.append(scope, node, InstKind::Return { operand: value }, Value::no_return());
      self.b.append_block(ok_bb);
      self.gen_defers(scope, self.root_scope, false)?;
      self.b.append(scope, node, InstKind::Return { operand: value }, Value::no_return());
    } else {
      self.gen_defers(scope, self.root_scope, false)?;
      self.b.append(scope, node, InstKind::Return { operand: value }, Value::no_return());
    }
    Err(Diverged)
  }

  fn gen_async_return(&mut self, scope: ScopeId, node: NodeId, value: InstId) -> Gen<InstId> {
    let coro = self.coro.expect("async return outside coroutine");
    self.gen_defers(scope, self.root_scope, false)?;
    let result_field = self.comp.syms.intern("result");
    let awaiter_field = self.comp.syms.intern("awaiter");
    let rp = self.b.append_gen(scope, node,
      InstKind::FieldPtr { container: coro.promise, field: result_field }, pending());
    self.b.append_gen(scope, node, InstKind::StorePtr { ptr: rp, value }, Value::void());
    let ap = self.b.append_gen(scope, node,
      InstKind::FieldPtr { container: coro.promise, field: awaiter_field }, pending());
    let one = self.usize_const(scope, node, 1);
    let xchg = self.enum_const(scope, node, self.comp.atomic_rmw_op_ty, 0);
    let seq_cst = self.enum_const(scope, node, self.comp.atomic_order_ty, 5);
    let prior = self.b.append_gen(scope, node,
      InstKind::AtomicRmw { ptr: ap, op: xchg, operand: one, order: seq_cst }, pending());
    let zero = self.usize_const(scope, node, 0);
    let has_awaiter = self.b.append_gen(scope, node,
      InstKind::BinOp { op: BinOp::CmpNeq, lhs: prior, rhs: zero }, pending());
    let resume_bb = self.b.new_block("ResumeAwaiter");
    self.b.cond_br(scope, node, has_awaiter, resume_bb, coro.normal_final);
    self.b.append_block(resume_bb);
    self.b.append_gen(scope, node, InstKind::CoroResume { target: prior }, Value::void());
    self.b.br(scope, node, coro.normal_final);
    Err(Diverged)
  }

  fn gen_break(
    &mut self, scope: ScopeId, node: NodeId,
    label: Option<Symbol>, operand: Option<NodeId>,
  ) -> Gen<InstId> {
    let Some(idx) = self.find_frame(label, label.is_none()) else {
      return Ok(self.gen_error(scope, node, "break expression outside loop"))
    };
    let value = match operand {
      Some(op) => self.expr(scope, op, LVAL_NONE)?,
      None => self.void_const(scope, node),
    };
    let outer = self.frames[idx].scope;
    self.gen_defers(scope, outer, false)?;
    let end = self.frames[idx].break_bb;
    let cur = self.b.cur_bb;
    self.frames[idx].incoming.push((cur, value));
    self.b.br(scope, node, end);
    Err(Diverged)
  }

  fn gen_continue(
    &mut self, scope: ScopeId, node: NodeId, label: Option<Symbol>,
  ) -> Gen<InstId> {
    let Some(idx) = self.find_frame(label, true) else {
      return Ok(self.gen_error(scope, node, "continue expression outside loop"))
    };
    let Some(cont) = self.frames[idx].continue_bb else {
      return Ok(self.gen_error(scope, node, "continue expression outside loop"))
    };
    let outer = self.frames[idx].scope;
    self.gen_defers(scope, outer, false)?;
    self.b.br(scope, node, cont);
    Err(Diverged)
  }

  #[allow(clippy::too_many_arguments)]
  fn gen_if(
    &mut self, scope: ScopeId, node: NodeId,
    cond: NodeId, then: NodeId, els: Option<NodeId>,
    payload: Option<Capture>, err_payload: Option<Capture>,
  ) -> Gen<InstId> {
    let then_bb = self.b.new_block("Then");
    let else_bb = self.b.new_block("Else");
    // The unwrap pointer for payload forms; `None` for a plain boolean if.
    let operand_ptr = if payload.is_some() || err_payload.is_some() {
      Some(self.addr_of(scope, cond)?)
    } else {
      None
    };
    match operand_ptr {
      None => {
        let c = self.expr(scope, cond, LVAL_NONE)?;
        self.b.cond_br(scope, node, c, then_bb, else_bb);
      }
      Some(ptr) => {
        let loaded = self.b.append_gen(scope, cond, InstKind::LoadPtr { ptr }, pending());
        if err_payload.is_some() {
          let is_err = self.b.append_gen(scope, cond,
            InstKind::TestErr { operand: loaded }, pending());
          self.b.cond_br(scope, node, is_err, else_bb, then_bb);
        } else {
          let non_null = self.b.append_gen(scope, cond,
            InstKind::TestNonNull { operand: loaded }, pending());
          self.b.cond_br(scope, node, non_null, then_bb, else_bb);
        }
      }
    }
    let mut incoming: Vec<(BlockId, InstId)> = vec![];
    // Then branch.
    self.b.append_block(then_bb);
    let then_scope = self.comp.scopes.push(Some(scope), then, ScopeKind::Block { label: None });
    let locals_len = self.locals.len();
    let then_scope = match (operand_ptr, payload) {
      (Some(ptr), Some(cap)) => {
        let pp = if err_payload.is_some() {
          self.b.append_gen(scope, cond,
            InstKind::UnwrapErrPayload { err_union_ptr: ptr, safety: false }, pending())
        } else {
          self.b.append_gen(scope, cond,
            InstKind::UnwrapOptional { optional_ptr: ptr, safety: false }, pending())
        };
        let init = if cap.by_ptr {
          pp
        } else {
          self.b.append_gen(scope, cond, InstKind::LoadPtr { ptr: pp }, pending())
        };
        self.declare_local(then_scope, cond, cap.name, true, false, None, init)
      }
      _ => then_scope,
    };
    let then_res = self.expr(then_scope, then, LVAL_NONE);
    let then_end = self.b.cur_bb;
    self.locals.truncate(locals_len);
    // Else branch.
    self.b.append_block(else_bb);
    let else_res = match els {
      Some(e) => {
        let else_scope =
          self.comp.scopes.push(Some(scope), e, ScopeKind::Block { label: None });
        let else_scope = match (operand_ptr, err_payload) {
          (Some(ptr), Some(cap)) => {
            let code = self.b.append_gen(scope, cond,
              InstKind::UnwrapErrCode { err_union_ptr: ptr }, pending());
            self.declare_local(else_scope, cond, cap.name, true, false, None, code)
          }
          _ => else_scope,
        };
        let r = self.expr(else_scope, e, LVAL_NONE);
        self.locals.truncate(locals_len);
        r
      }
      None => Ok(self.void_const(scope, node)),
    };
    let else_end = self.b.cur_bb;
    if let Ok(v) = then_res { incoming.push((then_end, v)) }
    if let Ok(v) = else_res { incoming.push((else_end, v)) }
    if incoming.is_empty() { return Err(Diverged) }
    let endif = self.b.new_block("EndIf");
    for &(bb, _) in &incoming {
      self.b.set_cursor(bb);
      self.b.br(scope, node, endif);
    }
    self.b.append_block(endif);
    Ok(self.b.append(scope, node, InstKind::Phi { incoming: incoming.into() }, pending()))
  }

  fn gen_while(&mut self, scope: ScopeId, node: NodeId, kind: &NodeKind) -> Gen<InstId> {
    let &NodeKind::While {
      label, cond, cont, body, els, payload, err_payload, is_inline,
    } = kind else { unreachable!() };
    let scope = if is_inline || self.comp.scopes.is_comptime(scope) {
      self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime)
    } else {
      scope
    };
    let loop_scope = self.comp.scopes.push(Some(scope), node, ScopeKind::Loop { label });
    let cond_bb = self.b.new_block("WhileCond");
    let body_bb = self.b.new_block("WhileBody");
    let cont_bb = self.b.new_block("WhileContinue");
    let end_bb = self.b.new_block("WhileEnd");
    let has_payload = payload.is_some() || err_payload.is_some();
    let else_bb = if els.is_some() || has_payload {
      self.b.new_block("WhileElse")
    } else {
      end_bb
    };
    self.b.br(loop_scope, node, cond_bb);
    self.b.append_block(cond_bb);
    let operand_ptr = if has_payload {
      let ptr = self.addr_of(loop_scope, cond)?;
      let loaded = self.b.append_gen(loop_scope, cond, InstKind::LoadPtr { ptr }, pending());
      if err_payload.is_some() {
        let is_err = self.b.append_gen(loop_scope, cond,
          InstKind::TestErr { operand: loaded }, pending());
        self.b.cond_br(loop_scope, node, is_err, else_bb, body_bb);
      } else {
        let non_null = self.b.append_gen(loop_scope, cond,
          InstKind::TestNonNull { operand: loaded }, pending());
        self.b.cond_br(loop_scope, node, non_null, body_bb, else_bb);
      }
      Some(ptr)
    } else {
      let c = self.expr(loop_scope, cond, LVAL_NONE)?;
      self.b.cond_br(loop_scope, node, c, body_bb, else_bb);
      None
    };
    self.frames.push(Frame {
      label, is_loop: true, break_bb: end_bb, continue_bb: Some(cont_bb),
      incoming: vec![], scope: loop_scope,
    });
    // Body.
    self.b.append_block(body_bb);
    let locals_len = self.locals.len();
    let body_scope =
      self.comp.scopes.push(Some(loop_scope), body, ScopeKind::Block { label: None });
    let body_scope = match (operand_ptr, payload) {
      (Some(ptr), Some(cap)) => {
        let pp = if err_payload.is_some() {
          self.b.append_gen(loop_scope, cond,
            InstKind::UnwrapErrPayload { err_union_ptr: ptr, safety: false }, pending())
        } else {
          self.b.append_gen(loop_scope, cond,
            InstKind::UnwrapOptional { optional_ptr: ptr, safety: false }, pending())
        };
        let init = if cap.by_ptr {
          pp
        } else {
          self.b.append_gen(loop_scope, cond, InstKind::LoadPtr { ptr: pp }, pending())
        };
        self.declare_local(body_scope, cond, cap.name, true, false, None, init)
      }
      _ => body_scope,
    };
    let body_res = self.expr(body_scope, body, LVAL_NONE);
    self.locals.truncate(locals_len);
    if body_res.is_ok() {
      self.b.br(body_scope, node, cont_bb);
    }
    // Continue block, with the optional continue expression.
    self.b.append_block(cont_bb);
    let cont_ok = match cont {
      Some(c) => self.expr(loop_scope, c, LVAL_NONE).is_ok(),
      None => true,
    };
    if cont_ok {
      self.b.br(loop_scope, node, cond_bb);
    }
    let frame = self.frames.pop().expect("loop frame");
    let mut incoming = frame.incoming;
    // Else branch (the loop exhausted without break).
    if else_bb != end_bb {
      self.b.append_block(else_bb);
      let r = match els {
        Some(e) => {
          let else_scope =
            self.comp.scopes.push(Some(loop_scope), e, ScopeKind::Block { label: None });
          let else_scope = match (operand_ptr, err_payload) {
            (Some(ptr), Some(cap)) => {
              let code = self.b.append_gen(loop_scope, cond,
                InstKind::UnwrapErrCode { err_union_ptr: ptr }, pending());
              self.declare_local(else_scope, cond, cap.name, true, false, None, code)
            }
            _ => else_scope,
          };
          let r = self.expr(else_scope, e, LVAL_NONE);
          self.locals.truncate(locals_len);
          r
        }
        None => Ok(self.void_const(loop_scope, node)),
      };
      if let Ok(v) = r {
        incoming.push((self.b.cur_bb, v));
        self.b.br(loop_scope, node, end_bb);
      }
    }
    self.b.append_block(end_bb);
    if els.is_some() || !incoming.is_empty() {
      if incoming.is_empty() { return Err(Diverged) }
      Ok(self.b.append(loop_scope, node,
        InstKind::Phi { incoming: incoming.into() }, pending()))
    } else {
      Ok(self.void_const(loop_scope, node))
    }
  }

  fn gen_for(&mut self, scope: ScopeId, node: NodeId, kind: &NodeKind) -> Gen<InstId> {
    let &NodeKind::For { label, seq, elem, index, body, els } = kind else { unreachable!() };
    let Some(elem) = elem else {
      return Ok(self.gen_error(scope, node, "for expression missing element parameter"))
    };
    let loop_scope = self.comp.scopes.push(Some(scope), node, ScopeKind::Loop { label });
    let arr_ptr = self.addr_of(loop_scope, seq)?;
    let len_field = self.comp.syms.intern("len");
    let len_ptr = self.b.append_gen(loop_scope, seq,
      InstKind::FieldPtr { container: arr_ptr, field: len_field }, pending());
    let len = self.b.append_gen(loop_scope, seq, InstKind::LoadPtr { ptr: len_ptr }, pending());
    // Hidden index variable.
    let locals_len = self.locals.len();
    let zero = self.usize_const(loop_scope, node, 0);
    let idx_name = self.comp.syms.intern("__for_index");
    let idx_scope = self.declare_local(loop_scope, node, idx_name, false, false, None, zero);
    let (_, idx_var) = *self.locals.last().expect("index var just declared");
    let cond_bb = self.b.new_block("ForCond");
    let body_bb = self.b.new_block("ForBody");
    let cont_bb = self.b.new_block("ForContinue");
    let end_bb = self.b.new_block("ForEnd");
    self.b.br(idx_scope, node, cond_bb);
    self.b.append_block(cond_bb);
    let idx_ptr = self.b.append_gen(idx_scope, node, InstKind::VarPtr { var: idx_var }, pending());
    let idx_val = self.b.append_gen(idx_scope, node, InstKind::LoadPtr { ptr: idx_ptr }, pending());
    let in_range = self.b.append_gen(idx_scope, node,
      InstKind::BinOp { op: BinOp::CmpLt, lhs: idx_val, rhs: len }, pending());
    let else_bb = if els.is_some() { self.b.new_block("ForElse") } else { end_bb };
    self.b.cond_br(idx_scope, node, in_range, body_bb, else_bb);
    self.frames.push(Frame {
      label, is_loop: true, break_bb: end_bb, continue_bb: Some(cont_bb),
      incoming: vec![], scope: loop_scope,
    });
    // Body: element (and index) captures.
    self.b.append_block(body_bb);
    let body_scope =
      self.comp.scopes.push(Some(idx_scope), body, ScopeKind::Block { label: None });
    let elem_ptr = self.b.append_gen(body_scope, seq,
      InstKind::ElemPtr { array_ptr: arr_ptr, index: idx_val, safety: false }, pending());
    let elem_init = if elem.by_ptr {
      elem_ptr
    } else {
      self.b.append_gen(body_scope, seq, InstKind::LoadPtr { ptr: elem_ptr }, pending())
    };
    let mut body_scope =
      self.declare_local(body_scope, node, elem.name, true, false, None, elem_init);
    if let Some(ix) = index {
      body_scope = self.declare_local(body_scope, node, ix, true, false, None, idx_val);
    }
    let body_res = self.expr(body_scope, body, LVAL_NONE);
    self.locals.truncate(locals_len + 1);
    if body_res.is_ok() {
      self.b.br(body_scope, node, cont_bb);
    }
    // Continue: index increment, back edge.
    self.b.append_block(cont_bb);
    let idx_ptr2 = self.b.append_gen(idx_scope, node, InstKind::VarPtr { var: idx_var }, pending());
    let old = self.b.append_gen(idx_scope, node, InstKind::LoadPtr { ptr: idx_ptr2 }, pending());
    let one = self.usize_const(idx_scope, node, 1);
    let next = self.b.append_gen(idx_scope, node,
      InstKind::BinOp { op: BinOp::Add, lhs: old, rhs: one }, pending());
    self.b.append_gen(idx_scope, node,
      InstKind::StorePtr { ptr: idx_ptr2, value: next }, Value::void());
    self.b.br(idx_scope, node, cond_bb);
    let frame = self.frames.pop().expect("loop frame");
    let mut incoming = frame.incoming;
    self.locals.truncate(locals_len);
    if let Some(e) = els {
      self.b.append_block(else_bb);
      let else_scope =
        self.comp.scopes.push(Some(loop_scope), e, ScopeKind::Block { label: None });
      if let Ok(v) = self.expr(else_scope, e, LVAL_NONE) {
        incoming.push((self.b.cur_bb, v));
        self.b.br(loop_scope, node, end_bb);
      }
    }
    self.b.append_block(end_bb);
    if incoming.is_empty() {
      Ok(self.void_const(loop_scope, node))
    } else {
      Ok(self.b.append(loop_scope, node,
        InstKind::Phi { incoming: incoming.into() }, pending()))
    }
  }

  fn gen_switch(
    &mut self, scope: ScopeId, node: NodeId, target: NodeId, prongs: &[NodeId],
  ) -> Gen<InstId> {
    let target_v = self.expr(scope, target, LVAL_NONE)?;
    let end_bb = self.b.new_block("SwitchEnd");
    let mut incoming: Vec<(BlockId, InstId)> = vec![];
    let mut cases: Vec<SwitchCase> = vec![];
    let mut check_ranges: Vec<SwitchRange> = vec![];
    let mut have_else = false;
    let mut bodies: Vec<(BlockId, NodeId, Option<Capture>)> = vec![];
    let mut else_body_bb: Option<BlockId> = None;
    let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
    // Phase 1: range prongs become a chain of conditional branches at
    // block entry; phase 2 collects scalar prongs for the switch_br.
    for &prong in prongs {
      let NodeKind::SwitchProng { items, ranges, payload, body } =
        self.comp.ast.kind(prong).clone() else { panic!("switch prong expected") };
      let prong_bb = self.b.new_block("SwitchProng");
      bodies.push((prong_bb, body, payload));
      if items.is_empty() && ranges.is_empty() {
        if have_else {
          self.gen_error(scope, prong, "multiple else prongs in switch expression");
        }
        have_else = true;
        else_body_bb = Some(prong_bb);
        continue
      }
      for &(lo_n, hi_n) in &ranges {
        let lo = self.expr(ct, lo_n, LVAL_NONE)?;
        let hi = self.expr(ct, hi_n, LVAL_NONE)?;
        check_ranges.push(SwitchRange { start: lo, end: hi });
        let ge = self.b.append_gen(scope, node,
          InstKind::BinOp { op: BinOp::CmpGte, lhs: target_v, rhs: lo }, pending());
        let hi_bb = self.b.new_block("RangeHi");
        let next_bb = self.b.new_block("RangeNext");
        self.b.cond_br(scope, node, ge, hi_bb, next_bb);
        self.b.append_block(hi_bb);
        let le = self.b.append_gen(scope, node,
          InstKind::BinOp { op: BinOp::CmpLte, lhs: target_v, rhs: hi }, pending());
        self.b.cond_br(scope, node, le, prong_bb, next_bb);
        self.b.append_block(next_bb);
      }
      for &item_n in &items {
        let item = self.expr(ct, item_n, LVAL_NONE)?;
        check_ranges.push(SwitchRange { start: item, end: item });
        cases.push(SwitchCase { item, bb: prong_bb });
      }
    }
    // Phase 3: the exhaustiveness check sits at the end of the pre-chain.
    self.b.append_gen(scope, node, InstKind::CheckSwitchProngs {
      target: target_v, ranges: check_ranges.into(), have_else,
    }, Value::void());
    let else_bb = match else_body_bb {
      Some(bb) => bb,
      None => {
        // Exhaustiveness was checked; the fallback traps.
        let bb = self.b.new_block("SwitchElseUnreachable");
        bb
      }
    };
    self.b.append(scope, node, InstKind::SwitchBr {
      target: target_v, cases: cases.into(), else_bb,
    }, Value::no_return());
    if else_body_bb.is_none() {
      self.b.append_block(else_bb);
      self.b.unreachable(scope, node);
    }
    // Prong bodies.
    for (bb, body, payload) in bodies {
      self.b.append_block(bb);
      let prong_scope =
        self.comp.scopes.push(Some(scope), body, ScopeKind::Block { label: None });
      let locals_len = self.locals.len();
      let prong_scope = match payload {
        Some(cap) =>
          self.declare_local(prong_scope, body, cap.name, true, false, None, target_v),
        None => prong_scope,
      };
      if let Ok(v) = self.expr(prong_scope, body, LVAL_NONE) {
        incoming.push((self.b.cur_bb, v));
        self.b.br(prong_scope, body, end_bb);
      }
      self.locals.truncate(locals_len);
    }
    if incoming.is_empty() { return Err(Diverged) }
    self.b.append_block(end_bb);
    Ok(self.b.append(scope, node, InstKind::Phi { incoming: incoming.into() }, pending()))
  }

  fn gen_try(
    &mut self, scope: ScopeId, node: NodeId, operand: NodeId, lval: LVal,
  ) -> Gen<InstId> {
    if self.func.is_none() {
      return Ok(self.gen_error(scope, node, "try expression outside function definition"))
    }
    let eu_ptr = self.addr_of(scope, operand)?;
    let loaded = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr: eu_ptr }, pending());
    let is_err = self.b.append_gen(scope, node,
      InstKind::TestErr { operand: loaded }, pending());
    let ret_bb = self.b.new_block("TryRet");
    let ok_bb = self.b.new_block("TryOk");
    self.b.cond_br(scope, node, is_err, ret_bb, ok_bb);
    // Error path: propagate the code through the error-return machinery.
    self.b.append_block(ret_bb);
    let code = self.b.append_gen(scope, node,
      InstKind::UnwrapErrCode { err_union_ptr: eu_ptr }, pending());
    self.b.append_gen(scope, node,
      InstKind::AddImplicitReturnType { operand: code }, Value::void());
    self.gen_defers(scope, self.root_scope, true)?;
    if self.coro.is_some() {
      // The async return path stores into the promise frame.
      let _ = self.gen_async_return(scope, node, code);
    } else {
      self.b.append_gen(scope, node, InstKind::Return { operand: code }, Value::no_return());
    }
    // Unwrap path.
    self.b.append_block(ok_bb);
    let payload_ptr = self.b.append_gen(scope, node,
      InstKind::UnwrapErrPayload { err_union_ptr: eu_ptr, safety: false }, pending());
    Ok(self.lval_wrap(scope, node, payload_ptr, lval))
  }

  fn gen_catch(
    &mut self, scope: ScopeId, node: NodeId,
    operand: NodeId, payload: Option<Capture>, handler: NodeId,
  ) -> Gen<InstId> {
    let eu_ptr = self.addr_of(scope, operand)?;
    let loaded = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr: eu_ptr }, pending());
    let is_err = self.b.append_gen(scope, node,
      InstKind::TestErr { operand: loaded }, pending());
    let err_bb = self.b.new_block("CatchErr");
    let ok_bb = self.b.new_block("CatchOk");
    let end_bb = self.b.new_block("CatchEnd");
    self.b.cond_br(scope, node, is_err, err_bb, ok_bb);
    let mut incoming = vec![];
    self.b.append_block(err_bb);
    let locals_len = self.locals.len();
    let err_scope =
      self.comp.scopes.push(Some(scope), handler, ScopeKind::Block { label: None });
    let err_scope = match payload {
      Some(cap) => {
        let code = self.b.append_gen(scope, node,
          InstKind::UnwrapErrCode { err_union_ptr: eu_ptr }, pending());
        self.declare_local(err_scope, node, cap.name, true, false, None, code)
      }
      None => err_scope,
    };
    if let Ok(v) = self.expr(err_scope, handler, LVAL_NONE) {
      incoming.push((self.b.cur_bb, v));
      self.b.br(err_scope, node, end_bb);
    }
    self.locals.truncate(locals_len);
    self.b.append_block(ok_bb);
    let payload_ptr = self.b.append_gen(scope, node,
      InstKind::UnwrapErrPayload { err_union_ptr: eu_ptr, safety: false }, pending());
    let v = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr: payload_ptr }, pending());
    incoming.push((self.b.cur_bb, v));
    self.b.br(scope, node, end_bb);
    self.b.append_block(end_bb);
    Ok(self.b.append(scope, node, InstKind::Phi { incoming: incoming.into() }, pending()))
  }

  fn gen_orelse(
    &mut self, scope: ScopeId, node: NodeId, operand: NodeId, fallback: NodeId,
  ) -> Gen<InstId> {
    let opt_ptr = self.addr_of(scope, operand)?;
    let loaded = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr: opt_ptr }, pending());
    let non_null = self.b.append_gen(scope, node,
      InstKind::TestNonNull { operand: loaded }, pending());
    let some_bb = self.b.new_block("OrElseSome");
    let null_bb = self.b.new_block("OrElseNull");
    let end_bb = self.b.new_block("OrElseEnd");
    self.b.cond_br(scope, node, non_null, some_bb, null_bb);
    let mut incoming = vec![];
    self.b.append_block(null_bb);
    if let Ok(v) = self.expr(scope, fallback, LVAL_NONE) {
      incoming.push((self.b.cur_bb, v));
      self.b.br(scope, node, end_bb);
    }
    self.b.append_block(some_bb);
    let pp = self.b.append_gen(scope, node,
      InstKind::UnwrapOptional { optional_ptr: opt_ptr, safety: false }, pending());
    let v = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr: pp }, pending());
    incoming.push((self.b.cur_bb, v));
    self.b.br(scope, node, end_bb);
    self.b.append_block(end_bb);
    Ok(self.b.append(scope, node, InstKind::Phi { incoming: incoming.into() }, pending()))
  }

  fn gen_suspend(
    &mut self, scope: ScopeId, node: NodeId, body: Option<NodeId>,
  ) -> Gen<InstId> {
    let Some(coro) = self.coro else {
      return Ok(self.gen_error(scope, node, "suspend outside async function"))
    };
    if self.comp.scopes.inside_defer_expr(scope) {
      return Ok(self.gen_error(scope, node, "cannot suspend inside defer expression"))
    }
    let susp_scope = self.comp.scopes.push(Some(scope), node, ScopeKind::Suspend);
    if let Some(body) = body {
      self.expr(susp_scope, body, LVAL_NONE)?;
    }
    let s = self.b.append(susp_scope, node,
      InstKind::CoroSuspend { is_final: false }, pending());
    let one = self.b.const_gen(susp_scope, node, Value::comptime_int(BigInt::from(1)));
    let is_destroy = self.b.append_gen(susp_scope, node,
      InstKind::BinOp { op: BinOp::CmpEq, lhs: s, rhs: one }, pending());
    let resume_bb = self.b.new_block("SuspendResume");
    self.b.cond_br(susp_scope, node, is_destroy, coro.early_final, resume_bb);
    self.b.append_block(resume_bb);
    Ok(self.void_const(susp_scope, node))
  }

  fn gen_await(&mut self, scope: ScopeId, node: NodeId, operand: NodeId) -> Gen<InstId> {
    if self.coro.is_none() {
      return Ok(self.gen_error(scope, node, "await outside async function"))
    }
    let target = self.expr(scope, operand, LVAL_NONE)?;
    let awaiter_field = self.comp.syms.intern("awaiter");
    let result_field = self.comp.syms.intern("result");
    let ap = self.b.append_gen(scope, node,
      InstKind::FieldPtr { container: target, field: awaiter_field }, pending());
    let me = self.b.append_gen(scope, node, InstKind::CoroPromise, pending());
    let me_int = self.b.append_gen(scope, node, InstKind::BuiltinCall {
      builtin: Builtin::PtrToInt, args: Box::new([me]),
    }, pending());
    let xchg = self.enum_const(scope, node, self.comp.atomic_rmw_op_ty, 0);
    let seq_cst = self.enum_const(scope, node, self.comp.atomic_order_ty, 5);
    let prior = self.b.append_gen(scope, node,
      InstKind::AtomicRmw { ptr: ap, op: xchg, operand: me_int, order: seq_cst }, pending());
    let one = self.usize_const(scope, node, 1);
    let is_done = self.b.append_gen(scope, node,
      InstKind::BinOp { op: BinOp::CmpEq, lhs: prior, rhs: one }, pending());
    let done_bb = self.b.new_block("AwaitDone");
    let wait_bb = self.b.new_block("AwaitSuspend");
    let end_bb = self.b.new_block("AwaitEnd");
    self.b.cond_br(scope, node, is_done, done_bb, wait_bb);
    let mut incoming = vec![];
    self.b.append_block(done_bb);
    let rp = self.b.append_gen(scope, node,
      InstKind::FieldPtr { container: target, field: result_field }, pending());
    let r1 = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr: rp }, pending());
    incoming.push((self.b.cur_bb, r1));
    self.b.br(scope, node, end_bb);
    self.b.append_block(wait_bb);
    self.b.append(scope, node, InstKind::CoroSuspend { is_final: false }, pending());
    let rp2 = self.b.append_gen(scope, node,
      InstKind::FieldPtr { container: target, field: result_field }, pending());
    let r2 = self.b.append_gen(scope, node, InstKind::LoadPtr { ptr: rp2 }, pending());
    incoming.push((self.b.cur_bb, r2));
    self.b.br(scope, node, end_bb);
    self.b.append_block(end_bb);
    Ok(self.b.append(scope, node, InstKind::Phi { incoming: incoming.into() }, pending()))
  }

  fn gen_builtin(
    &mut self, scope: ScopeId, node: NodeId, name: Symbol, args: &[NodeId],
  ) -> Gen<InstId> {
    let Some(builtin) = self.comp.builtins.get(name) else {
      let text = self.comp.syms.name(name).to_owned();
      return Ok(self.gen_error(scope, node, format!("invalid builtin function: '{text}'")))
    };
    if !builtin.arity().accepts(args.len()) {
      let expected = match builtin.arity() {
        Arity::Fixed(n) => format!("expected {n} arguments"),
        Arity::AtLeast(n) => format!("expected at least {n} arguments"),
      };
      return Ok(self.gen_error(scope, node,
        format!("@{}: {expected}, found {}", builtin.as_str(), args.len())))
    }
    match builtin {
      Builtin::CImport => {
        let ci_scope = self.comp.scopes.push(Some(scope), node, ScopeKind::CImport);
        let ct = self.comp.scopes.push(Some(ci_scope), node, ScopeKind::Comptime);
        self.expr(ct, args[0], LVAL_NONE)?;
        Ok(self.b.append(scope, node,
          InstKind::CImport { cimport_scope: ci_scope }, pending()))
      }
      Builtin::CInclude | Builtin::CDefine | Builtin::CUndef => {
        if self.comp.scopes.enclosing_cimport(scope).is_none() {
          let what = builtin.as_str();
          return Ok(self.gen_error(scope, node,
            format!("@{what} valid only inside C import block")))
        }
        let a0 = self.expr(scope, args[0], LVAL_NONE)?;
        let k = match builtin {
          Builtin::CInclude => InstKind::CInclude { name: a0 },
          Builtin::CUndef => InstKind::CUndef { name: a0 },
          Builtin::CDefine => {
            let v = self.expr(scope, args[1], LVAL_NONE)?;
            InstKind::CDefine { name: a0, value: Some(v) }
          }
          _ => unreachable!(),
        };
        Ok(self.b.append(scope, node, k, Value::void()))
      }
      Builtin::SetRuntimeSafety => {
        let on = self.expr(scope, args[0], LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::SetRuntimeSafety { on }, Value::void()))
      }
      Builtin::SetEvalBranchQuota => {
        let quota = self.expr(scope, args[0], LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::SetEvalBranchQuota { quota }, Value::void()))
      }
      Builtin::CompileError => {
        let msg = self.expr(scope, args[0], LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::CompileErr { msg }, pending()))
      }
      Builtin::Panic => {
        let msg = self.expr(scope, args[0], LVAL_NONE)?;
        self.b.append(scope, node, InstKind::Panic { msg }, Value::no_return());
        Err(Diverged)
      }
      Builtin::DivTrunc | Builtin::DivFloor | Builtin::DivExact | Builtin::Rem |
      Builtin::Mod | Builtin::ShlExact => {
        let lhs = self.expr(scope, args[0], LVAL_NONE)?;
        let rhs = self.expr(scope, args[1], LVAL_NONE)?;
        let op = match builtin {
          Builtin::DivTrunc => BinOp::DivTrunc,
          Builtin::DivFloor => BinOp::DivFloor,
          Builtin::DivExact => BinOp::DivExact,
          Builtin::Rem => BinOp::Rem,
          Builtin::Mod => BinOp::Mod,
          Builtin::ShlExact => BinOp::ShlExact,
          _ => unreachable!(),
        };
        Ok(self.b.append(scope, node, InstKind::BinOp { op, lhs, rhs }, pending()))
      }
      Builtin::AddWithOverflow | Builtin::SubWithOverflow |
      Builtin::MulWithOverflow | Builtin::ShlWithOverflow => {
        let op = match builtin {
          Builtin::AddWithOverflow => crate::types::ir::OverflowOp::Add,
          Builtin::SubWithOverflow => crate::types::ir::OverflowOp::Sub,
          Builtin::MulWithOverflow => crate::types::ir::OverflowOp::Mul,
          Builtin::ShlWithOverflow => crate::types::ir::OverflowOp::Shl,
          _ => unreachable!(),
        };
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let ty = self.expr(ct, args[0], LVAL_NONE)?;
        let lhs = self.expr(scope, args[1], LVAL_NONE)?;
        let rhs = self.expr(scope, args[2], LVAL_NONE)?;
        let result_ptr = self.expr(scope, args[3], LVAL_NONE)?;
        Ok(self.b.append(scope, node,
          InstKind::OverflowOp { op, ty, lhs, rhs, result_ptr }, pending()))
      }
      Builtin::CmpxchgStrong | Builtin::CmpxchgWeak => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let _ty = self.expr(ct, args[0], LVAL_NONE)?;
        let ptr = self.expr(scope, args[1], LVAL_NONE)?;
        let expected = self.expr(scope, args[2], LVAL_NONE)?;
        let new_value = self.expr(scope, args[3], LVAL_NONE)?;
        let success_order = self.expr(ct, args[4], LVAL_NONE)?;
        let failure_order = self.expr(ct, args[5], LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::Cmpxchg {
          ptr, expected, new_value, success_order, failure_order,
          is_weak: builtin == Builtin::CmpxchgWeak,
        }, pending()))
      }
      Builtin::Fence => {
        let order = self.expr(scope, args[0], LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::Fence { order }, Value::void()))
      }
      Builtin::AtomicRmw => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let _ty = self.expr(ct, args[0], LVAL_NONE)?;
        let ptr = self.expr(scope, args[1], LVAL_NONE)?;
        let op = self.expr(ct, args[2], LVAL_NONE)?;
        let operand = self.expr(scope, args[3], LVAL_NONE)?;
        let order = self.expr(ct, args[4], LVAL_NONE)?;
        Ok(self.b.append(scope, node,
          InstKind::AtomicRmw { ptr, op, operand, order }, pending()))
      }
      Builtin::AtomicLoad => {
        let ct = self.comp.scopes.push(Some(scope), node, ScopeKind::Comptime);
        let _ty = self.expr(ct, args[0], LVAL_NONE)?;
        let ptr = self.expr(scope, args[1], LVAL_NONE)?;
        let order = self.expr(ct, args[2], LVAL_NONE)?;
        Ok(self.b.append(scope, node, InstKind::AtomicLoad { ptr, order }, pending()))
      }
      Builtin::InlineCall => {
        let callee = self.expr(scope, args[0], LVAL_NONE)?;
        let rest = args[1..].iter()
          .map(|&a| self.expr(scope, a, LVAL_NONE))
          .collect::<Gen<Box<[_]>>>()?;
        Ok(self.b.append(scope, node, InstKind::Call {
          callee, args: rest, modifier: CallModifier::Inline,
        }, pending()))
      }
      Builtin::NewStackCall => {
        let stack = self.expr(scope, args[0], LVAL_NONE)?;
        let callee = self.expr(scope, args[1], LVAL_NONE)?;
        let rest = args[2..].iter()
          .map(|&a| self.expr(scope, a, LVAL_NONE))
          .collect::<Gen<Box<[_]>>>()?;
        Ok(self.b.append(scope, node, InstKind::Call {
          callee, args: rest, modifier: CallModifier::NewStack(stack),
        }, pending()))
      }
      // The pure fold/cast builtins carry their id into analysis.
      _ => {
        let args = args.iter()
          .map(|&a| self.expr(scope, a, LVAL_NONE))
          .collect::<Gen<Box<[_]>>>()?;
        Ok(self.b.append(scope, node, InstKind::BuiltinCall { builtin, args }, pending()))
      }
    }
  }

  /// Typecheck-free container construction: field types are comptime
  /// expressions resolved right here, nested declarations go into a fresh
  /// module whose scope chains to the current one.
  fn gen_container(
    &mut self, scope: ScopeId, node: NodeId, kind: ContainerKind,
    fields: &[NodeId], decls: &[NodeId],
  ) -> InstId {
    let anon = self.comp.syms.intern("(anonymous container)");
    let pkg = self.comp.ents.modules[self.module].pkg;
    let module = self.comp.ents.new_module(anon, pkg);
    let mscope = self.comp.scopes.push(Some(scope), node, ScopeKind::Decls { module });
    self.comp.ents.modules[module].scope = Some(mscope);
    for &d in decls {
      let (name, is_pub) = match self.comp.ast.kind(d) {
        &NodeKind::VarDecl { name, is_pub, .. } => (name, is_pub),
        &NodeKind::FnDef { name, is_pub, .. } => (name, is_pub),
        k => panic!("unexpected container declaration {k:?}"),
      };
      if let Err(prev) = self.comp.ents.add_decl(module, name, d, is_pub) {
        let text = self.comp.syms.name(name).to_owned();
        let prev_span = self.comp.ast.span(self.comp.ents.decls[prev].node);
        let span = self.comp.ast.span(d);
        let h = self.comp.emit_error(span, format!("redefinition of '{text}'"));
        self.comp.diags.add_note(h, prev_span, "previous definition is here");
      }
    }
    let mut field_infos = vec![];
    let mut enum_fields = vec![];
    let mut next_tag = BigInt::from(0);
    for &f in fields {
      let NodeKind::ContainerField { name, ty, value } = self.comp.ast.kind(f).clone() else {
        panic!("container field expected")
      };
      match kind {
        ContainerKind::Enum => {
          let tag = match value {
            Some(v) => match self.comp.comptime_expr(module, v, Some(Types::COMPTIME_INT)) {
              Some(Value { k: ValueKind::Int(n), .. }) => n,
              _ => next_tag.clone(),
            },
            None => next_tag.clone(),
          };
          next_tag = &tag + 1;
          enum_fields.push((name, tag));
        }
        _ => {
          let ty = match ty {
            Some(t) => self.comp.resolve_type_expr(module, t).unwrap_or(Types::INVALID),
            None => Types::VOID,
          };
          field_infos.push(FieldInfo { name, ty });
        }
      }
    }
    let ty = match kind {
      ContainerKind::Struct => self.comp.types.declare(TyKind::Struct(StructInfo {
        name: anon, fields: field_infos.into(), module: Some(module),
      })),
      ContainerKind::Enum => {
        let bits = (enum_fields.len().max(1) as u32)
          .next_power_of_two().trailing_zeros().max(1);
        let tag_int = self.comp.types.int(crate::types::IntInfo {
          signed: false, bits: bits.try_into().expect("overflow"),
        });
        self.comp.types.declare(TyKind::Enum(EnumInfo {
          name: anon, tag_int, fields: enum_fields.into(),
        }))
      }
      ContainerKind::Union => self.comp.types.declare(TyKind::Union(UnionInfo {
        name: anon, tag: None, fields: field_infos.into(),
      })),
      ContainerKind::TaggedUnion => {
        let bits = (field_infos.len().max(1) as u32)
          .next_power_of_two().trailing_zeros().max(1);
        let tag_int = self.comp.types.int(crate::types::IntInfo {
          signed: false, bits: bits.try_into().expect("overflow"),
        });
        let tag_fields = field_infos.iter().enumerate()
          .map(|(i, f)| (f.name, BigInt::from(i)))
          .collect();
        let tag = self.comp.types.declare(TyKind::Enum(EnumInfo {
          name: anon, tag_int, fields: tag_fields,
        }));
        self.comp.types.declare(TyKind::Union(UnionInfo {
          name: anon, tag: Some(tag), fields: field_infos.into(),
        }))
      }
    };
    self.b.const_val(scope, node, Value::ty(ty))
  }

  /// The coroutine prelude: allocate the frame with the implicit
  /// allocator, handle allocation failure, start the frame, and zero the
  /// awaiter slot.
  fn gen_coro_prelude(
    &mut self, scope: ScopeId, node: NodeId, runtime_params: u32,
  ) -> Gen<ScopeId> {
    let prelude = self.comp.scopes.push(Some(scope), node, ScopeKind::CoroPrelude);
    let allocator = self.b.append_gen(prelude, node,
      InstKind::Param { index: runtime_params }, pending());
    let raw = self.b.append_gen(prelude, node,
      InstKind::CoroAlloc { allocator }, pending());
    let ok = self.b.append_gen(prelude, node,
      InstKind::TestNonNull { operand: raw }, pending());
    let begin_bb = self.b.new_block("CoroBegin");
    let fail_bb = self.b.new_block("CoroAllocFail");
    self.b.cond_br(prelude, node, ok, begin_bb, fail_bb);
    self.b.append_block(fail_bb);
    let oom_sym = self.comp.syms.intern("OutOfMemory");
    let oom = self.comp.errors.intern(oom_sym);
    let oom_set = self.comp.types.error_set(vec![oom]);
    let err = self.b.const_gen(prelude, node,
      Value { ty: oom_set, k: ValueKind::ErrorCode(oom) });
    self.b.append_gen(prelude, node,
      InstKind::CoroAllocFail { err }, Value::no_return());
    self.b.append_block(begin_bb);
    let raw_ref = self.b.append_gen(prelude, node, InstKind::Ref { operand: raw }, pending());
    let frame_pp = self.b.append_gen(prelude, node,
      InstKind::UnwrapOptional { optional_ptr: raw_ref, safety: false }, pending());
    let frame = self.b.append_gen(prelude, node,
      InstKind::LoadPtr { ptr: frame_pp }, pending());
    let promise = self.b.append_gen(prelude, node, InstKind::CoroBegin { frame }, pending());
    let awaiter_field = self.comp.syms.intern("awaiter");
    let ap = self.b.append_gen(prelude, node,
      InstKind::FieldPtr { container: promise, field: awaiter_field }, pending());
    let zero = self.usize_const(prelude, node, 0);
    self.b.append_gen(prelude, node,
      InstKind::StorePtr { ptr: ap, value: zero }, Value::void());
    if self.comp.config.error_return_tracing {
      let trace_field = self.comp.syms.intern("trace");
      let tp = self.b.append_gen(prelude, node,
        InstKind::FieldPtr { container: promise, field: trace_field }, pending());
      let undef = self.b.const_gen(prelude, node, Value::undef(Types::UNDEFINED));
      self.b.append_gen(prelude, node,
        InstKind::StorePtr { ptr: tp, value: undef }, Value::void());
    }
    let early_final = self.b.new_block("CoroEarlyFinal");
    let normal_final = self.b.new_block("CoroNormalFinal");
    let cleanup = self.b.new_block("CoroCleanup");
    let suspend_bb = self.b.new_block("CoroFinalSuspend");
    self.coro = Some(GenCoro { promise, early_final, normal_final, cleanup, suspend_bb });
    self.b.exec.coro = Some(crate::types::ir::CoroInfo {
      promise, early_final, normal_final, cleanup, suspend_bb,
    });
    Ok(prelude)
  }

  fn finish_coro(&mut self, scope: ScopeId, node: NodeId) {
    let coro = self.coro.expect("finish_coro without prelude");
    self.b.append_block(coro.normal_final);
    self.b.br(scope, node, coro.cleanup);
    self.b.append_block(coro.early_final);
    self.b.br(scope, node, coro.cleanup);
    self.b.append_block(coro.cleanup);
    self.b.append_gen(scope, node,
      InstKind::CoroFree { frame: coro.promise }, Value::void());
    self.b.br(scope, node, coro.suspend_bb);
    self.b.append_block(coro.suspend_bb);
    self.b.append_gen(scope, node,
      InstKind::CoroSuspend { is_final: true }, pending());
    self.b.append_gen(scope, node, InstKind::CoroEnd, Value::no_return());
  }
}

fn map_bin_op(op: AstBinOp) -> BinOp {
  match op {
    AstBinOp::Add => BinOp::Add,
    AstBinOp::AddWrap => BinOp::AddWrap,
    AstBinOp::Sub => BinOp::Sub,
    AstBinOp::SubWrap => BinOp::SubWrap,
    AstBinOp::Mul => BinOp::Mul,
    AstBinOp::MulWrap => BinOp::MulWrap,
    AstBinOp::Div => BinOp::Div,
    AstBinOp::Rem => BinOp::RemUnspec,
    AstBinOp::Shl => BinOp::Shl,
    AstBinOp::Shr => BinOp::Shr,
    AstBinOp::BitAnd => BinOp::BitAnd,
    AstBinOp::BitOr => BinOp::BitOr,
    AstBinOp::BitXor => BinOp::BitXor,
    AstBinOp::CmpEq => BinOp::CmpEq,
    AstBinOp::CmpNeq => BinOp::CmpNeq,
    AstBinOp::CmpLt => BinOp::CmpLt,
    AstBinOp::CmpGt => BinOp::CmpGt,
    AstBinOp::CmpLte => BinOp::CmpLte,
    AstBinOp::CmpGte => BinOp::CmpGte,
    AstBinOp::BoolAnd | AstBinOp::BoolOr =>
      unreachable!("short-circuit operators are lowered to branches"),
  }
}

/// Resolve a function's prototype to its function type. For generic
/// instantiations the bound names are visible through the instantiation
/// module, so parameter types referencing comptime parameters resolve.
pub fn resolve_fn_proto(comp: &mut Compiler, func: FnId) -> Option<TyId> {
  let node = comp.ents.fns[func].node;
  let module = comp.ents.fns[func].module;
  let NodeKind::FnDef { params, ret, ret_infer_err, is_async, .. } =
    comp.ast.kind(node).clone() else { panic!("function definition expected") };
  let bound_names: Vec<Symbol> =
    comp.ents.fns[func].bound_args.iter().map(|&(n, _)| n).collect();
  let bound_types: HashMap<Symbol, TyId> =
    comp.ents.fns[func].bound_param_types.iter().copied().collect();
  let mut out_params = vec![];
  let mut is_generic = false;
  for &p in &params {
    let NodeKind::Param { name, ty, is_comptime } = comp.ast.kind(p).clone() else {
      panic!("parameter expected")
    };
    if bound_names.contains(&name) { continue }
    let resolved = match ty {
      Some(t) => Some(comp.resolve_type_expr(module, t)?),
      None => bound_types.get(&name).copied(),
    };
    if resolved.is_none() || is_comptime { is_generic = true }
    out_params.push(Param { name: Some(name), ty: resolved, is_comptime });
  }
  let ret_ty = match ret {
    Some(r) => {
      let payload = comp.resolve_type_expr(module, r)?;
      if ret_infer_err {
        Some(comp.types.error_union(Types::GLOBAL_ERROR_SET, payload))
      } else {
        Some(payload)
      }
    }
    None => Some(Types::VOID),
  };
  let cc = if is_async { CallConv::Async } else { CallConv::Unspecified };
  Some(comp.types.fn_ty(FnTyInfo {
    cc,
    params: out_params.into(),
    ret: ret_ty,
    is_var_args: false,
    is_generic,
    async_allocator: None,
  }))
}

/// Generate the unanalyzed IR for a function body. `None` when the
/// function has no body (extern prototype) or its prototype failed.
pub fn gen_fn(comp: &mut Compiler, func: FnId) -> Option<Exec> {
  let node = comp.ents.fns[func].node;
  let module = comp.ents.fns[func].module;
  if comp.ents.fns[func].ty.is_none() {
    let ty = resolve_fn_proto(comp, func)?;
    comp.ents.fns[func].ty = Some(ty);
  }
  let NodeKind::FnDef { params, body, is_async, .. } = comp.ast.kind(node).clone() else {
    panic!("function definition expected")
  };
  let body = body?;
  let decls_scope = comp.ents.modules[module].scope
    .expect("module scope created with the module");
  let fn_scope = comp.scopes.push(Some(decls_scope), node, ScopeKind::FnDef { func });
  let bound_names: Vec<Symbol> =
    comp.ents.fns[func].bound_args.iter().map(|&(n, _)| n).collect();
  let mut g = GenIr::new(comp, module, Some(func), fn_scope);
  let mut scope = fn_scope;
  let mut runtime_index = 0u32;
  for &p in &params {
    let NodeKind::Param { name, .. } = g.comp.ast.kind(p).clone() else {
      panic!("parameter expected")
    };
    if bound_names.contains(&name) { continue }
    let init = g.b.append_gen(scope, p,
      InstKind::Param { index: runtime_index }, pending());
    runtime_index += 1;
    scope = g.declare_local(scope, p, name, true, false, None, init);
  }
  if is_async {
    scope = match g.gen_coro_prelude(scope, node, runtime_index) {
      Ok(s) => s,
      Err(Diverged) => {
        let exec = g.b.finish();
        return Some(exec)
      }
    };
  }
  let flow = g.expr(scope, body, LVAL_NONE);
  if let Ok(_) = flow {
    // Implicit `return {}` at the end of the body.
    let v = g.void_const(scope, node);
    let _ = g.gen_return(scope, node, v);
  }
  if g.coro.is_some() {
    g.finish_coro(fn_scope, node);
  }
  Some(g.b.finish())
}

/// Generate a one-expression executable for a comptime evaluation: the
/// expression's value feeds implicit-return-type resolution and a final
/// `return`.
pub fn gen_const_expr(comp: &mut Compiler, module: ModuleId, node: NodeId) -> Option<Exec> {
  let decls_scope = comp.ents.modules[module].scope
    .expect("module scope created with the module");
  let ct_scope = comp.scopes.push(Some(decls_scope), node, ScopeKind::Comptime);
  let mut g = GenIr::new(comp, module, None, ct_scope);
  if let Ok(v) = g.expr(ct_scope, node, LVAL_NONE) {
    g.b.append_gen(ct_scope, node,
      InstKind::AddImplicitReturnType { operand: v }, Value::void());
    g.b.append(ct_scope, node, InstKind::Return { operand: v }, Value::no_return());
  }
  Some(g.b.finish())
}

/// Create a generic instantiation record: a fresh module chained under the
/// generic function's module holds the bound comptime arguments as
/// resolved declarations.
pub fn instantiate_generic(
  comp: &mut Compiler, generic: FnId,
  bound_args: Vec<(Symbol, Value)>, bound_param_types: Vec<(Symbol, TyId)>,
) -> FnId {
  let node = comp.ents.fns[generic].node;
  let name = comp.ents.fns[generic].name;
  let parent_module = comp.ents.fns[generic].module;
  let pkg = comp.ents.modules[parent_module].pkg;
  let parent_scope = comp.ents.modules[parent_module].scope
    .expect("module scope created with the module");
  let inst_module = comp.ents.new_module(name, pkg);
  let mscope = comp.scopes.push(Some(parent_scope), node,
    ScopeKind::Decls { module: inst_module });
  comp.ents.modules[inst_module].scope = Some(mscope);
  for &(arg_name, ref value) in &bound_args {
    let decl = comp.ents.add_decl(inst_module, arg_name, node, false)
      .expect("fresh instantiation module cannot have duplicates");
    comp.ents.decls[decl].state = crate::types::entity::DeclState::Ok(value.clone());
  }
  let mut rec = FnRecord::new(name, node, inst_module);
  rec.bound_args = bound_args;
  rec.bound_param_types = bound_param_types;
  comp.ents.fns.push(rec)
}
