//! Call analysis: the cast-syntax, comptime, runtime, generic, and async
//! call modes, plus the pure builtin dispatch.

use log::debug;
use num::BigInt;
use num::traits::ToPrimitive;

use crate::GenericKey;
use crate::build_ir;
use crate::eval;
use crate::types::FnId;
use crate::types::ast::NodeKind;
use crate::types::entity::{Builtin, FnState};
use crate::types::ir::{CallModifier, CastOp, InstId, InstKind};
use crate::types::ty::{CallConv, FnTyInfo, PtrInfo, TyId, TyKind, Types};
use crate::value::{CanonValue, PtrBase, PtrMut, PtrValue, Value, ValueKind};
use super::Analyzer;

impl Analyzer<'_> {
  pub(super) fn analyze_call(
    &mut self, id: InstId, callee: InstId, args: &[InstId], modifier: CallModifier,
  ) {
    let cv = self.operand_val(callee);
    if cv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    // Mode 1: a type used as a callee is the cast syntax.
    if let Some(t) = cv.as_ty() {
      if args.len() != 1 {
        self.err_at(id, "cast expression expects exactly one argument");
        return
      }
      let a = self.use_of(args[0]);
      let r = self.coerce_to(id, a, t);
      self.reuse(id, r);
      return
    }
    // Bound functions prepend their subject.
    let (func, extra_arg) = match cv.k {
      ValueKind::Func(f) => (Some(f), None),
      ValueKind::BoundFn { func, subject } => {
        let v = self.comp.mem.get(subject).clone();
        let (scope, node) = {
          let o = self.old_inst(id);
          (o.scope, o.node)
        };
        let subject_inst = self.b.const_gen(scope, node, v);
        (Some(func), Some(subject_inst))
      }
      _ => (None, None),
    };
    let Some(func) = func else {
      // A runtime function pointer is still a valid mode-3 callee.
      if let TyKind::Fn(info) = self.comp.types.kind(cv.ty).clone() {
        let c = self.use_of(callee);
        let mapped: Vec<InstId> = args.iter().map(|&a| self.use_of(a)).collect();
        self.emit_runtime_call(id, c, &mapped, &info, modifier);
        return
      }
      let name = self.comp.types.name(cv.ty, &self.comp.syms);
      self.err_at(id, format!("type '{name}' not a function"));
      return
    };
    if self.comp.ents.fns[func].ty.is_none() {
      match build_ir::resolve_fn_proto(self.comp, func) {
        Some(t) => self.comp.ents.fns[func].ty = Some(t),
        None => {
          self.b.exec.invalid = true;
          self.emit_const(id, Value::invalid());
          return
        }
      }
    }
    let fn_ty = self.comp.ents.fns[func].ty.expect("just resolved");
    let TyKind::Fn(info) = self.comp.types.kind(fn_ty).clone() else {
      unreachable!("function record with non-function type")
    };
    let mut all_args: Vec<InstId> = Vec::with_capacity(args.len() + 1);
    all_args.extend(extra_arg);
    all_args.extend(args.iter().map(|&a| self.use_of(a)));
    if info.is_generic {
      let Some((func, info, runtime_args)) =
        self.instantiate(id, func, &all_args) else { return };
      self.dispatch_concrete(id, func, &info, &runtime_args, modifier);
    } else {
      self.dispatch_concrete(id, func, &info, &all_args, modifier);
    }
  }

  /// Mode 4: bind comptime arguments, memoize on the canonical binding
  /// tuple, and return the concrete instantiation.
  fn instantiate(
    &mut self, id: InstId, func: FnId, args: &[InstId],
  ) -> Option<(FnId, FnTyInfo, Vec<InstId>)> {
    let node = self.comp.ents.fns[func].node;
    let NodeKind::FnDef { params, .. } = self.comp.ast.kind(node).clone() else {
      unreachable!("function record without definition node")
    };
    if args.len() != params.len() {
      self.err_at(id, format!(
        "expected {} arguments, found {}", params.len(), args.len()));
      return None
    }
    let mut bound_args = vec![];
    let mut bound_param_types = vec![];
    let mut bindings: Vec<CanonValue> = vec![];
    let mut runtime_args = vec![];
    for (&p, &arg) in params.iter().zip(args) {
      let NodeKind::Param { name, ty, is_comptime } = self.comp.ast.kind(p).clone() else {
        unreachable!("non-parameter in parameter list")
      };
      let av = self.value_of(arg).clone();
      if is_comptime {
        if !av.is_comptime() {
          let text = self.comp.syms.name(name).to_owned();
          self.err_at(id, format!(
            "unable to evaluate constant expression for comptime parameter '{text}'"));
          return None
        }
        bindings.push(self.comp.mem.canonical(&av));
        bound_args.push((name, av));
      } else if ty.is_none() {
        // A `var` parameter: its type is captured, the value stays runtime.
        bindings.push(CanonValue::Ty(av.ty));
        bound_param_types.push((name, av.ty));
        runtime_args.push(arg);
      } else {
        runtime_args.push(arg);
      }
    }
    let key = GenericKey { func, bindings };
    let inst_fn = match self.comp.generic_insts.get(&key) {
      Some(&f) => {
        debug!("generic instantiation cache hit for '{}'",
          self.comp.syms.name(self.comp.ents.fns[func].name));
        f
      }
      None => {
        debug!("instantiating generic '{}'",
          self.comp.syms.name(self.comp.ents.fns[func].name));
        let f = build_ir::instantiate_generic(
          self.comp, func, bound_args, bound_param_types);
        match build_ir::resolve_fn_proto(self.comp, f) {
          Some(t) => self.comp.ents.fns[f].ty = Some(t),
          None => {
            self.b.exec.invalid = true;
            self.emit_const(id, Value::invalid());
            return None
          }
        }
        self.comp.generic_insts.insert(key, f);
        f
      }
    };
    let fn_ty = self.comp.ents.fns[inst_fn].ty.expect("instantiation proto resolved");
    let TyKind::Fn(info) = self.comp.types.kind(fn_ty).clone() else { unreachable!() };
    Some((inst_fn, info, runtime_args))
  }

  fn dispatch_concrete(
    &mut self, id: InstId, func: FnId, info: &FnTyInfo, args: &[InstId],
    modifier: CallModifier,
  ) {
    let inst = self.old_inst(id).clone();
    let is_async_fn = info.cc == CallConv::Async;
    if let CallModifier::Async(alloc) = modifier {
      // Mode 5.
      if !is_async_fn {
        self.err_at(id, "'async' call of non-async function");
        return
      }
      let coerced = match self.coerce_args(id, info, args) {
        Some(c) => c,
        None => return,
      };
      let alloc_inst = self.use_of(alloc);
      let ret = info.ret.unwrap_or(Types::VOID);
      let result = if ret == Types::VOID { None } else { Some(ret) };
      let promise = self.comp.types.promise(result);
      let ty = self.comp.types.error_union(Types::GLOBAL_ERROR_SET, promise);
      let fn_ty = self.comp.ents.fns[func].ty.expect("resolved before dispatch");
      let callee_val = Value { ty: fn_ty, k: ValueKind::Func(func) };
      let c = self.b.const_gen(inst.scope, inst.node, callee_val);
      self.emit(id, InstKind::Call {
        callee: c, args: coerced.into(), modifier: CallModifier::Async(alloc_inst),
      }, Value::runtime(ty));
      return
    }
    if is_async_fn {
      self.err_at(id, "must be called using 'async'");
      return
    }
    let node_is_inline = {
      let fnode = self.comp.ents.fns[func].node;
      matches!(self.comp.ast.kind(fnode), NodeKind::FnDef { is_inline: true, .. })
    };
    let ret = info.ret.unwrap_or(Types::VOID);
    let comptime_needed = self.comptime_mode(&inst) ||
      matches!(modifier, CallModifier::Inline) ||
      node_is_inline ||
      self.comp.types.is_comptime_only(ret) ||
      info.params.iter().any(|p| p.ty.is_some_and(|t| self.comp.types.is_comptime_only(t)));
    if comptime_needed {
      // Mode 2: execute the callee at compile time.
      self.comptime_call(id, func, info, args);
    } else {
      // Mode 3.
      let callee_val = Value {
        ty: self.comp.ents.fns[func].ty.expect("resolved"),
        k: ValueKind::Func(func),
      };
      let c = self.b.const_gen(inst.scope, inst.node, callee_val);
      let mapped: Vec<InstId> = args.to_vec();
      self.emit_runtime_call(id, c, &mapped, info, modifier);
    }
  }

  fn coerce_args(
    &mut self, id: InstId, info: &FnTyInfo, args: &[InstId],
  ) -> Option<Vec<InstId>> {
    if args.len() != info.params.len() {
      self.err_at(id, format!(
        "expected {} arguments, found {}", info.params.len(), args.len()));
      return None
    }
    let mut out = Vec::with_capacity(args.len());
    for (&a, p) in args.iter().zip(info.params.iter()) {
      match p.ty {
        Some(t) => out.push(self.coerce_to(id, a, t)),
        None => out.push(a),
      }
    }
    Some(out)
  }

  fn emit_runtime_call(
    &mut self, id: InstId, callee: InstId, args: &[InstId], info: &FnTyInfo,
    modifier: CallModifier,
  ) {
    let Some(coerced) = self.coerce_args(id, info, args) else { return };
    let ret = info.ret.unwrap_or(Types::VOID);
    let modifier = match modifier {
      CallModifier::NewStack(s) => CallModifier::NewStack(self.use_of(s)),
      m => m,
    };
    self.emit(id, InstKind::Call {
      callee, args: coerced.into(), modifier,
    }, Value::runtime(ret));
  }

  /// Mode 2: fold the call by interpreting the callee's analyzed body.
  fn comptime_call(&mut self, id: InstId, func: FnId, info: &FnTyInfo, args: &[InstId]) {
    let Some(coerced) = self.coerce_args(id, info, args) else { return };
    let mut arg_values = Vec::with_capacity(coerced.len());
    for a in coerced {
      let v = self.value_of(a).clone();
      if !v.is_comptime() {
        self.err_at(id, "unable to evaluate constant expression");
        return
      }
      arg_values.push(v);
    }
    match self.comp.ents.fns[func].state {
      FnState::InProgress => {
        self.err_at(id, "unable to evaluate constant expression");
        return
      }
      FnState::Invalid => {
        self.b.exec.invalid = true;
        self.emit_const(id, Value::invalid());
        return
      }
      FnState::Queued => self.comp.ensure_fn_analyzed(func),
      FnState::Done => {}
    }
    if self.comp.ents.fns[func].air.as_ref().is_none_or(|a| a.invalid) {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let node = self.old_inst(id).node;
    self.comp.tld_stack.push(node);
    let quota = self.b.exec.backward_branch_quota;
    let mut count = self.b.exec.backward_branch_count;
    let result = eval::eval_fn(self.comp, func, arg_values, node,
      eval::EvalLimits { count: &mut count, quota });
    self.b.exec.backward_branch_count = count;
    self.comp.tld_stack.pop();
    match result {
      Ok(v) => { self.emit_const(id, v); }
      Err(eval::EvalError) => {
        self.b.exec.invalid = true;
        self.emit_const(id, Value::invalid());
      }
    }
  }

  // ---- pure builtins --------------------------------------------------

  pub(super) fn analyze_builtin(&mut self, id: InstId, builtin: Builtin, args: &[InstId]) {
    match builtin {
      Builtin::SizeOf => {
        let Some(t) = self.static_type_arg(id, args[0]) else { return };
        let n = self.comp.types.abi_size(t);
        self.emit_const(id, Value::comptime_int(BigInt::from(n)));
      }
      Builtin::AlignOf => {
        let Some(t) = self.static_type_arg(id, args[0]) else { return };
        let n = self.comp.types.abi_align(t);
        self.emit_const(id, Value::comptime_int(BigInt::from(n)));
      }
      Builtin::TypeOf => {
        let v = self.operand_val(args[0]);
        self.emit_const(id, Value::ty(v.ty));
      }
      Builtin::IntCast => self.analyze_int_cast(id, args[0], args[1]),
      Builtin::FloatCast => self.analyze_float_cast(id, args[0], args[1]),
      Builtin::Truncate => self.analyze_truncate(id, args[0], args[1]),
      Builtin::AlignCast => self.analyze_align_cast(id, args[0], args[1]),
      Builtin::PtrToInt => self.analyze_ptr_to_int(id, args[0]),
      Builtin::IntToPtr => self.analyze_int_to_ptr(id, args[0], args[1]),
      Builtin::Import => {
        let Some(name) = self.static_string(id, args[0]) else { return };
        let node = self.old_inst(id).node;
        match self.comp.resolve_import(node, &name) {
          Some(module) => {
            let ty = self.comp.types.intern(TyKind::Namespace(module));
            self.emit_const(id, Value { ty, k: ValueKind::Namespace(module) });
          }
          None => {
            self.b.exec.invalid = true;
            self.emit_const(id, Value::invalid());
          }
        }
      }
      _ => unreachable!("builtin '{}' has a dedicated opcode", builtin.as_str()),
    }
  }

  fn static_type_arg(&mut self, id: InstId, arg: InstId) -> Option<TyId> {
    match self.require_static(id, arg).and_then(|v| v.as_ty()) {
      Some(t) => Some(t),
      None => {
        self.err_at(id, "expected type expression");
        None
      }
    }
  }

  fn analyze_int_cast(&mut self, id: InstId, ty: InstId, operand: InstId) {
    let Some(t) = self.static_type_arg(id, ty) else { return };
    let Some(dest) = self.comp.types.int_info(t) else {
      let name = self.comp.types.name(t, &self.comp.syms);
      self.err_at(id, format!("expected integer type, found '{name}'"));
      return
    };
    let v = self.operand_val(operand);
    let src = match self.comp.types.kind(v.ty) {
      &TyKind::Int(info) => Some(info),
      TyKind::ComptimeInt => None,
      _ => {
        let name = self.comp.types.name(v.ty, &self.comp.syms);
        self.err_at(id, format!("expected integer type, found '{name}'"));
        return
      }
    };
    if let Some(n) = v.as_int() {
      // A comptime cast that loses information is an error, not a wrap.
      if !dest.fits(n) {
        let tname = self.comp.types.name(t, &self.comp.syms);
        self.err_at(id, format!("integer value {n} cannot be stored in type '{tname}'"));
        return
      }
      self.emit_const(id, Value::int(t, n.clone()));
      return
    }
    let o = self.use_of(operand);
    let widening = src.is_some_and(|s| {
      dest.signed == s.signed && dest.bits >= s.bits ||
      dest.signed && !s.signed && dest.bits > s.bits
    });
    let op = if widening { CastOp::IntWiden } else { CastOp::IntTrunc };
    self.emit(id, InstKind::Cast { op, operand: o, dest: t }, Value::runtime(t));
  }

  fn analyze_float_cast(&mut self, id: InstId, ty: InstId, operand: InstId) {
    let Some(t) = self.static_type_arg(id, ty) else { return };
    let TyKind::Float(dest_bits) = *self.comp.types.kind(t) else {
      let name = self.comp.types.name(t, &self.comp.syms);
      self.err_at(id, format!("expected float type, found '{name}'"));
      return
    };
    let v = self.operand_val(operand);
    let src_bits = match self.comp.types.kind(v.ty) {
      &TyKind::Float(bits) => bits,
      TyKind::ComptimeFloat => dest_bits,
      _ => {
        let name = self.comp.types.name(v.ty, &self.comp.syms);
        self.err_at(id, format!("expected float type, found '{name}'"));
        return
      }
    };
    if let ValueKind::Float(r) = &v.k {
      let folded = crate::value::round_float(r, dest_bits);
      self.emit_const(id, Value::float(t, folded));
      return
    }
    let o = self.use_of(operand);
    let op = if dest_bits >= src_bits { CastOp::FloatWiden } else { CastOp::FloatTrunc };
    self.emit(id, InstKind::Cast { op, operand: o, dest: t }, Value::runtime(t));
  }

  fn analyze_truncate(&mut self, id: InstId, ty: InstId, operand: InstId) {
    let Some(t) = self.static_type_arg(id, ty) else { return };
    let Some(dest) = self.comp.types.int_info(t) else {
      let name = self.comp.types.name(t, &self.comp.syms);
      self.err_at(id, format!("expected integer type, found '{name}'"));
      return
    };
    let v = self.operand_val(operand);
    if let Some(n) = v.as_int() {
      self.emit_const(id, Value::int(t, dest.wrap(n)));
      return
    }
    let o = self.use_of(operand);
    self.emit(id, InstKind::Cast { op: CastOp::IntTrunc, operand: o, dest: t },
      Value::runtime(t));
  }

  fn analyze_align_cast(&mut self, id: InstId, align: InstId, operand: InstId) {
    let Some(n) = self.require_static(id, align)
      .and_then(|v| v.as_int().and_then(BigInt::to_u32)) else {
      self.err_at(id, "expected alignment");
      return
    };
    if !n.is_power_of_two() {
      self.err_at(id, "alignment must be a power of two");
      return
    }
    let v = self.operand_val(operand);
    let Some(info) = self.comp.types.ptr_info(v.ty).copied() else {
      let name = self.comp.types.name(v.ty, &self.comp.syms);
      self.err_at(id, format!("expected pointer type, found '{name}'"));
      return
    };
    let dest = self.comp.types.ptr(PtrInfo { align: Some(n), ..info });
    if v.is_comptime() {
      // Comptime pointers have abstract placement: retag.
      self.emit_const(id, Value { ty: dest, k: v.k });
      return
    }
    let o = self.use_of(operand);
    // Increasing alignment inserts a runtime check; decreasing is free but
    // still routes through the cast for the type change.
    self.emit(id, InstKind::Cast { op: CastOp::AlignCast, operand: o, dest },
      Value::runtime(dest));
  }

  fn analyze_ptr_to_int(&mut self, id: InstId, operand: InstId) {
    let v = self.operand_val(operand);
    if self.comp.types.ptr_info(v.ty).is_none() &&
      !matches!(self.comp.types.kind(v.ty), TyKind::Promise(_) | TyKind::Fn(_)) {
      let name = self.comp.types.name(v.ty, &self.comp.syms);
      self.err_at(id, format!("expected pointer type, found '{name}'"));
      return
    }
    let usize_ty = self.comp.types.usize();
    match &v.k {
      ValueKind::Ptr(PtrValue { base: PtrBase::Addr(a), .. }) => {
        self.emit_const(id, Value::int(usize_ty, BigInt::from(*a)));
      }
      k if v.is_comptime() && !matches!(k, ValueKind::Runtime) => {
        self.err_at(id, "unable to evaluate constant expression");
      }
      _ => {
        let o = self.use_of(operand);
        self.emit(id, InstKind::Cast { op: CastOp::PtrToInt, operand: o, dest: usize_ty },
          Value::runtime(usize_ty));
      }
    }
  }

  fn analyze_int_to_ptr(&mut self, id: InstId, ty: InstId, operand: InstId) {
    let Some(t) = self.static_type_arg(id, ty) else { return };
    if self.comp.types.ptr_info(t).is_none() {
      let name = self.comp.types.name(t, &self.comp.syms);
      self.err_at(id, format!("expected pointer type, found '{name}'"));
      return
    }
    let v = self.operand_val(operand);
    // The operand resolves through `usize` first; addresses wider than the
    // target pointer are truncated here, explicitly.
    let usize_ty = self.comp.types.usize();
    let oi = self.use_of(operand);
    let oi = self.coerce_to(id, oi, usize_ty);
    if let Some(n) = self.value_of(oi).as_int() {
      let addr = n.to_u64().unwrap_or(0);
      self.emit_const(id, Value { ty: t, k: ValueKind::Ptr(PtrValue {
        base: PtrBase::Addr(addr), mutability: PtrMut::ComptimeConst,
      }) });
      return
    }
    let _ = v;
    self.emit(id, InstKind::Cast { op: CastOp::PtrToInt, operand: oi, dest: t },
      Value::runtime(t));
  }
}
