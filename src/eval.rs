//! The comptime executor: an interpreter over analyzed IR used for constant
//! folding of calls, generic return values, and `comptime` blocks. It works
//! on the value model; memory slots are the executable's slot objects, so
//! stores through `ComptimeVar` pointers are visible to later loads. Any
//! instruction with runtime side effects stops evaluation with "unable to
//! evaluate constant expression".

use hashbrown::HashMap;
use num::BigInt;
use num::traits::ToPrimitive;

use crate::Compiler;
use crate::analyze::ops::{fold_float, fold_int};
use crate::types::{FnId, IdxVec, NodeId, ObjId, VarId};
use crate::types::ir::{
  BinOp, BlockId, CastOp, Exec, InstId, InstKind, UnOp,
};
use crate::types::ty::{TyKind, Types};
use crate::value::{
  ArrayData, PtrBase, PtrMut, PtrValue, Value, ValueKind, optional_is_ptr_like,
};

/// Budget shared with the executable that triggered evaluation.
pub struct EvalLimits<'a> {
  /// Backward branches taken so far, shared with the caller.
  pub count: &'a mut u32,
  /// The quota.
  pub quota: u32,
}

/// Evaluation failed; a diagnostic has been emitted.
#[derive(Debug)]
pub struct EvalError;

/// Execute a function's analyzed body with the given argument values.
pub fn eval_fn(
  comp: &mut Compiler, func: FnId, args: Vec<Value>, call_node: NodeId,
  limits: EvalLimits<'_>,
) -> Result<Value, EvalError> {
  let Some(exec) = comp.ents.fns[func].air.take() else {
    let span = comp.ast.span(call_node);
    comp.emit_error(span, "unable to evaluate constant expression");
    return Err(EvalError)
  };
  let result = eval_exec(comp, &exec, &args, limits);
  comp.ents.fns[func].air = Some(exec);
  result
}

/// Execute an analyzed executable. Slot objects are snapshotted so one
/// evaluation cannot leak comptime-variable state into the next.
pub fn eval_exec(
  comp: &mut Compiler, exec: &Exec, args: &[Value], mut limits: EvalLimits<'_>,
) -> Result<Value, EvalError> {
  let snapshot: Vec<(ObjId, Value)> = exec.slot_objs.iter()
    .map(|&o| (o, comp.mem.get(o).clone()))
    .collect();
  let mut machine = Machine {
    comp,
    exec,
    values: IdxVec::from_fn(exec.insts.len(), || None),
    var_objs: IdxVec::from_fn(exec.vars.len(), || None),
    prev_block: BlockId::ENTRY,
  };
  let result = machine.run(args, &mut limits);
  for (o, v) in snapshot {
    comp.mem.set(o, v);
  }
  result
}

struct Machine<'a> {
  comp: &'a mut Compiler,
  exec: &'a Exec,
  values: IdxVec<InstId, Option<Value>>,
  var_objs: IdxVec<VarId, Option<ObjId>>,
  prev_block: BlockId,
}

/// What the interpreter does after one instruction.
enum Step {
  Next,
  Jump(BlockId),
  Done(Value),
}

impl Machine<'_> {
  fn fail(&mut self, inst: InstId, msg: impl Into<String>) -> EvalError {
    let node = self.exec.insts[inst].node;
    let span = self.comp.ast.span(node);
    self.comp.emit_error(span, msg);
    EvalError
  }

  fn val(&self, id: InstId) -> Value {
    // Constants carry their value; everything else was computed this run.
    match &self.values[id] {
      Some(v) => v.clone(),
      None => self.exec.insts[id].value.clone(),
    }
  }

  fn set(&mut self, id: InstId, v: Value) { self.values[id] = Some(v) }

  fn run(&mut self, args: &[Value], limits: &mut EvalLimits<'_>) -> Result<Value, EvalError> {
    let Some(&entry) = self.exec.order.first() else {
      return Err(EvalError)
    };
    // Position of each scheduled block, to detect backward jumps.
    let position: HashMap<BlockId, usize> =
      self.exec.order.iter().enumerate().map(|(i, &bb)| (bb, i)).collect();
    let mut cur = entry;
    loop {
      let insts = self.exec.blocks[cur].insts.clone();
      let mut next = None;
      for id in insts {
        match self.step(id, args, limits)? {
          Step::Next => {}
          Step::Jump(bb) => { next = Some(bb); break }
          Step::Done(v) => return Ok(v),
        }
      }
      let Some(nb) = next else {
        return Err(self.fail(
          *self.exec.blocks[cur].insts.last().expect("nonempty block"),
          "unable to evaluate constant expression"))
      };
      if position.get(&nb) <= position.get(&cur) {
        *limits.count += 1;
        if *limits.count > limits.quota {
          let quota = limits.quota;
          return Err(self.fail(
            *self.exec.blocks[cur].insts.last().expect("nonempty block"),
            format!("evaluation exceeded {quota} backwards branches")))
        }
      }
      self.prev_block = cur;
      cur = nb;
    }
  }

  fn step(
    &mut self, id: InstId, args: &[Value], limits: &mut EvalLimits<'_>,
  ) -> Result<Step, EvalError> {
    let kind = self.exec.insts[id].k.clone();
    let result_ty = self.exec.insts[id].value.ty;
    match kind {
      InstKind::Const => Ok(Step::Next),
      InstKind::Param { index } => {
        match args.get(index as usize) {
          Some(v) => { self.set(id, v.clone()); Ok(Step::Next) }
          None => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::DeclVar { var, init, .. } => {
        let v = self.val(init);
        let copied = self.comp.mem.copy(&v, true);
        let obj = self.comp.mem.alloc(copied);
        self.var_objs[var] = Some(obj);
        self.set(id, Value::void());
        Ok(Step::Next)
      }
      InstKind::VarPtr { var } => {
        let obj = match self.var_objs[var] {
          Some(o) => o,
          None => {
            // A slot-allocated comptime variable.
            match self.exec.vars[var].slot {
              Some(slot) => self.exec.slot_objs[slot.0 as usize],
              None => return Err(self.fail(id, "variable used before declaration")),
            }
          }
        };
        let mutability = if self.exec.vars[var].is_const {
          PtrMut::ComptimeConst
        } else {
          PtrMut::ComptimeVar
        };
        self.set(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
          base: PtrBase::Obj(obj), mutability,
        }) });
        Ok(Step::Next)
      }
      InstKind::LoadPtr { ptr } => {
        let pv = self.val(ptr);
        let ValueKind::Ptr(p) = &pv.k else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        match p.base {
          PtrBase::Obj(_) | PtrBase::ArrayElem { .. } | PtrBase::Field { .. } => {
            let obj = self.comp.mem.pointee(p.base, &self.comp.types);
            let loaded = self.comp.mem.get(obj).clone();
            self.set(id, Value { ty: result_ty, k: loaded.k });
            Ok(Step::Next)
          }
          _ => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::StorePtr { ptr, value } => {
        let pv = self.val(ptr);
        let v = self.val(value);
        let ValueKind::Ptr(p) = &pv.k else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        if p.mutability == PtrMut::ComptimeConst {
          return Err(self.fail(id, "cannot assign to constant"))
        }
        match p.base {
          PtrBase::Obj(_) | PtrBase::ArrayElem { .. } | PtrBase::Field { .. } => {
            let obj = self.comp.mem.pointee(p.base, &self.comp.types);
            let copied = self.comp.mem.copy(&v, true);
            self.comp.mem.set(obj, copied);
            self.set(id, Value::void());
            Ok(Step::Next)
          }
          PtrBase::Discard => { self.set(id, Value::void()); Ok(Step::Next) }
          _ => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::BinOp { op, lhs, rhs } => {
        let a = self.val(lhs);
        let b = self.val(rhs);
        let v = self.eval_bin_op(id, op, &a, &b, result_ty)?;
        self.set(id, v);
        Ok(Step::Next)
      }
      InstKind::UnOp { op, operand } => {
        let v = self.val(operand);
        let r = self.eval_un_op(id, op, &v, result_ty)?;
        self.set(id, r);
        Ok(Step::Next)
      }
      InstKind::Cast { op, operand, dest } => {
        let v = self.val(operand);
        let r = self.eval_cast(id, op, &v, dest)?;
        self.set(id, r);
        Ok(Step::Next)
      }
      InstKind::Ref { operand } => {
        let v = self.val(operand);
        let obj = self.comp.mem.alloc(v);
        self.set(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
          base: PtrBase::Obj(obj), mutability: PtrMut::ComptimeConst,
        }) });
        Ok(Step::Next)
      }
      InstKind::FieldPtr { container, field } => {
        let cv = self.val(container);
        let ValueKind::Ptr(p) = &cv.k else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let Some(pinfo) = self.comp.types.ptr_info(cv.ty).copied() else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let idx = match self.comp.types.kind(pinfo.elem).clone() {
          TyKind::Struct(info) => info.fields.iter().position(|f| f.name == field),
          TyKind::Union(info) => info.fields.iter().position(|f| f.name == field),
          TyKind::Slice(_) => {
            let text = self.comp.syms.name(field);
            match text {
              "ptr" => Some(0),
              "len" => Some(1),
              _ => None,
            }
          }
          _ => None,
        };
        let Some(idx) = idx else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let agg = self.comp.mem.pointee(p.base, &self.comp.types);
        let mutability = p.mutability;
        self.set(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
          base: PtrBase::Field { agg, index: idx }, mutability,
        }) });
        Ok(Step::Next)
      }
      InstKind::ElemPtr { array_ptr, index, .. } => {
        let pv = self.val(array_ptr);
        let iv = self.val(index);
        let (ValueKind::Ptr(p), Some(i)) = (&pv.k, iv.as_int().and_then(BigInt::to_u64))
        else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let Some(pinfo) = self.comp.types.ptr_info(pv.ty).copied() else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        match self.comp.types.kind(pinfo.elem).clone() {
          TyKind::Array { len, .. } => {
            if i >= len {
              return Err(self.fail(id, format!("index {i} outside array of size {len}")))
            }
            let arr = self.comp.mem.pointee(p.base, &self.comp.types);
            let mutability = p.mutability;
            self.set(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::ArrayElem { array: arr, index: i as usize, c_str: false },
              mutability,
            }) });
            Ok(Step::Next)
          }
          _ => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::TestErr { operand } => {
        let v = self.val(operand);
        match &v.k {
          ValueKind::ErrUnion(r) => { self.set(id, Value::bool(r.is_err())); Ok(Step::Next) }
          ValueKind::ErrorCode(_) => { self.set(id, Value::bool(true)); Ok(Step::Next) }
          _ => { self.set(id, Value::bool(false)); Ok(Step::Next) }
        }
      }
      InstKind::TestNonNull { operand } => {
        let v = self.val(operand);
        let non_null = match &v.k {
          ValueKind::Optional(o) => o.is_some(),
          ValueKind::Ptr(p) => !matches!(p.base, PtrBase::Addr(0)),
          ValueKind::Null => false,
          _ => true,
        };
        self.set(id, Value::bool(non_null));
        Ok(Step::Next)
      }
      InstKind::UnwrapErrCode { err_union_ptr } => {
        let pv = self.val(err_union_ptr);
        let ValueKind::Ptr(p) = &pv.k else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        match &self.comp.mem.get(obj).k {
          ValueKind::ErrUnion(Err(e)) => {
            self.set(id, Value { ty: result_ty, k: ValueKind::ErrorCode(*e) });
            Ok(Step::Next)
          }
          _ => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::UnwrapErrPayload { err_union_ptr, .. } => {
        let pv = self.val(err_union_ptr);
        let ValueKind::Ptr(p) = &pv.k else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        match self.comp.mem.get(obj).k.clone() {
          ValueKind::ErrUnion(Ok(payload)) => {
            let mutability = p.mutability;
            self.set(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::Obj(payload), mutability,
            }) });
            Ok(Step::Next)
          }
          ValueKind::ErrUnion(Err(e)) => {
            let name = self.comp.syms.name(self.comp.errors.name(e)).to_owned();
            Err(self.fail(id, format!("caught unexpected error 'error.{name}'")))
          }
          _ => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::UnwrapOptional { optional_ptr, .. } => {
        let pv = self.val(optional_ptr);
        let ValueKind::Ptr(p) = &pv.k else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        let inner = self.comp.mem.get(obj).clone();
        let child = self.comp.types.ptr_info(result_ty)
          .map_or(Types::INVALID, |i| i.elem);
        let mutability = p.mutability;
        if optional_is_ptr_like(&self.comp.types, child) {
          if matches!(inner.k, ValueKind::Ptr(PtrValue { base: PtrBase::Addr(0), .. })) {
            return Err(self.fail(id, "unable to unwrap null"))
          }
          let payload = self.comp.mem.alloc(Value { ty: child, k: inner.k });
          self.set(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
            base: PtrBase::Obj(payload), mutability,
          }) });
          return Ok(Step::Next)
        }
        match inner.k {
          ValueKind::Optional(Some(payload)) => {
            self.set(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::Obj(payload), mutability,
            }) });
            Ok(Step::Next)
          }
          _ => Err(self.fail(id, "unable to unwrap null")),
        }
      }
      InstKind::Phi { ref incoming } => {
        let prev = self.prev_block;
        match incoming.iter().find(|&&(bb, _)| bb == prev) {
          Some(&(_, v)) => {
            let val = self.val(v);
            self.set(id, val);
            Ok(Step::Next)
          }
          None => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::Br { dest } => Ok(Step::Jump(dest)),
      InstKind::CondBr { cond, then_bb, else_bb } => {
        match self.val(cond).as_bool() {
          Some(true) => Ok(Step::Jump(then_bb)),
          Some(false) => Ok(Step::Jump(else_bb)),
          None => Err(self.fail(id, "unable to evaluate constant expression")),
        }
      }
      InstKind::SwitchBr { target, ref cases, else_bb } => {
        let t = self.val(target);
        for case in cases.iter() {
          let cv = self.val(case.item);
          if self.comp.mem.equals(&t, &cv) {
            return Ok(Step::Jump(case.bb))
          }
        }
        Ok(Step::Jump(else_bb))
      }
      InstKind::Return { operand } => {
        let v = self.val(operand);
        Ok(Step::Done(v))
      }
      InstKind::Unreachable => Err(self.fail(id, "reached unreachable code")),
      InstKind::Panic { .. } =>
        Err(self.fail(id, "encountered @panic at compile-time")),
      InstKind::Call { callee, args: ref call_args, modifier: _ } => {
        let cv = self.val(callee);
        let ValueKind::Func(func) = cv.k else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        let mut vals = Vec::with_capacity(call_args.len());
        for &a in call_args.iter() {
          vals.push(self.val(a));
        }
        let node = self.exec.insts[id].node;
        self.comp.tld_stack.push(node);
        let r = eval_fn(self.comp, func, vals, node,
          EvalLimits { count: &mut *limits.count, quota: limits.quota });
        self.comp.tld_stack.pop();
        let v = r?;
        self.set(id, v);
        Ok(Step::Next)
      }
      InstKind::ArrayInit { ref elems, .. } => {
        let mut objs = Vec::with_capacity(elems.len());
        for &e in elems.iter() {
          let v = self.val(e);
          objs.push(self.comp.mem.alloc(v));
        }
        self.set(id, Value {
          ty: result_ty,
          k: ValueKind::Array(ArrayData::Elems(objs.into())),
        });
        Ok(Step::Next)
      }
      InstKind::StructInit { ref fields, .. } => {
        let mut objs = Vec::with_capacity(fields.len());
        for &(_, v) in fields.iter() {
          let v = self.val(v);
          objs.push(self.comp.mem.alloc(v));
        }
        self.set(id, Value { ty: result_ty, k: ValueKind::Struct(objs.into()) });
        Ok(Step::Next)
      }
      // Pure bookkeeping that already folded during analysis.
      InstKind::CheckStatementIsVoid { .. } | InstKind::CheckSwitchProngs { .. } |
      InstKind::AddImplicitReturnType { .. } | InstKind::SetRuntimeSafety { .. } |
      InstKind::SetEvalBranchQuota { .. } => {
        self.set(id, Value::void());
        Ok(Step::Next)
      }
      // Everything with runtime side effects cannot run at compile time.
      _ => Err(self.fail(id, "unable to evaluate constant expression")),
    }
  }

  fn eval_bin_op(
    &mut self, id: InstId, op: BinOp, a: &Value, b: &Value, result_ty: crate::types::ty::TyId,
  ) -> Result<Value, EvalError> {
    if op.is_cmp() {
      let r = match (&a.k, &b.k) {
        (ValueKind::Int(x), ValueKind::Int(y)) |
        (ValueKind::Enum(x), ValueKind::Enum(y)) => cmp(op, x.cmp(y)),
        (ValueKind::Float(x), ValueKind::Float(y)) => cmp(op, x.cmp(y)),
        (ValueKind::Bool(x), ValueKind::Bool(y)) =>
          if op == BinOp::CmpEq { x == y } else { x != y },
        _ => {
          let same = self.comp.mem.equals(a, b);
          if op == BinOp::CmpEq { same } else { !same }
        }
      };
      return Ok(Value::bool(r))
    }
    if op.is_shift() {
      let (Some(x), Some(y)) = (a.as_int(), b.as_int()) else {
        return Err(self.fail(id, "unable to evaluate constant expression"))
      };
      let info = self.comp.types.int_info(result_ty);
      let k = y.to_u64().unwrap_or(0) as usize;
      let r = match op {
        BinOp::Shl | BinOp::ShlExact => {
          let full: BigInt = x << k;
          match info {
            Some(i) if !i.fits(&full) => {
              let msg = if op == BinOp::ShlExact {
                "exact shift shifted out 1 bits"
              } else {
                "operation caused overflow"
              };
              return Err(self.fail(id, msg))
            }
            _ => full,
          }
        }
        BinOp::Shr => x >> k,
        _ => unreachable!(),
      };
      return Ok(Value::int(result_ty, r))
    }
    match (&a.k, &b.k) {
      (ValueKind::Int(x), ValueKind::Int(y)) => {
        let info = self.comp.types.int_info(result_ty);
        match fold_int(op, info, x, y) {
          Ok(n) => Ok(Value::int(result_ty, n)),
          Err(msg) => Err(self.fail(id, msg)),
        }
      }
      (ValueKind::Float(x), ValueKind::Float(y)) => match fold_float(op, x, y) {
        Ok(r) => {
          let r = match self.comp.types.kind(result_ty) {
            &TyKind::Float(bits) => crate::value::round_float(&r, bits),
            _ => r,
          };
          Ok(Value::float(result_ty, r))
        }
        Err(msg) => Err(self.fail(id, msg)),
      },
      _ => Err(self.fail(id, "unable to evaluate constant expression")),
    }
  }

  fn eval_un_op(
    &mut self, id: InstId, op: UnOp, v: &Value, result_ty: crate::types::ty::TyId,
  ) -> Result<Value, EvalError> {
    match (op, &v.k) {
      (UnOp::BoolNot, ValueKind::Bool(b)) => Ok(Value::bool(!b)),
      (UnOp::Neg | UnOp::NegWrap, ValueKind::Int(n)) => {
        let neg = -n;
        match self.comp.types.int_info(result_ty) {
          Some(i) if !i.fits(&neg) => {
            if op == UnOp::NegWrap {
              Ok(Value::int(result_ty, i.wrap(&neg)))
            } else {
              Err(self.fail(id, "operation caused overflow"))
            }
          }
          _ => Ok(Value::int(result_ty, neg)),
        }
      }
      (UnOp::Neg | UnOp::NegWrap, ValueKind::Float(r)) => Ok(Value::float(result_ty, -r)),
      (UnOp::BitNot, ValueKind::Int(n)) => {
        let flipped: BigInt = -n - 1;
        let folded = self.comp.types.int_info(result_ty)
          .map_or(flipped.clone(), |i| i.wrap(&flipped));
        Ok(Value::int(result_ty, folded))
      }
      _ => Err(self.fail(id, "unable to evaluate constant expression")),
    }
  }

  fn eval_cast(
    &mut self, id: InstId, op: CastOp, v: &Value, dest: crate::types::ty::TyId,
  ) -> Result<Value, EvalError> {
    match op {
      CastOp::Noop | CastOp::ErrSetWiden | CastOp::UnionToTag | CastOp::EnumToUnion =>
        Ok(Value { ty: dest, k: v.k.clone() }),
      CastOp::IntWiden => Ok(Value { ty: dest, k: v.k.clone() }),
      CastOp::IntTrunc => match v.as_int() {
        Some(n) => {
          let info = self.comp.types.int_info(dest)
            .ok_or_else(|| self.fail(id, "unable to evaluate constant expression"))?;
          Ok(Value::int(dest, info.wrap(n)))
        }
        None => Err(self.fail(id, "unable to evaluate constant expression")),
      },
      CastOp::FloatWiden | CastOp::FloatTrunc => match &v.k {
        ValueKind::Float(r) => {
          let bits = match self.comp.types.kind(dest) {
            &TyKind::Float(bits) => bits,
            _ => 64,
          };
          Ok(Value::float(dest, crate::value::round_float(r, bits)))
        }
        _ => Err(self.fail(id, "unable to evaluate constant expression")),
      },
      CastOp::OptionalWrap => {
        let TyKind::Optional(child) = *self.comp.types.kind(dest) else {
          return Err(self.fail(id, "unable to evaluate constant expression"))
        };
        if optional_is_ptr_like(&self.comp.types, child) ||
          matches!(v.k, ValueKind::Null) {
          if matches!(v.k, ValueKind::Null) {
            return Ok(Value { ty: dest, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::Addr(0), mutability: PtrMut::ComptimeConst,
            }) })
          }
          return Ok(Value { ty: dest, k: v.k.clone() })
        }
        if matches!(v.k, ValueKind::Null) {
          return Ok(Value { ty: dest, k: ValueKind::Optional(None) })
        }
        let obj = self.comp.mem.alloc(Value { ty: child, k: v.k.clone() });
        Ok(Value { ty: dest, k: ValueKind::Optional(Some(obj)) })
      }
      CastOp::ErrUnionWrapPayload => {
        let obj = self.comp.mem.alloc(v.clone());
        Ok(Value { ty: dest, k: ValueKind::ErrUnion(Ok(obj)) })
      }
      CastOp::ErrUnionWrapCode => match v.k {
        ValueKind::ErrorCode(e) => Ok(Value { ty: dest, k: ValueKind::ErrUnion(Err(e)) }),
        _ => Err(self.fail(id, "unable to evaluate constant expression")),
      },
      CastOp::InferredRef => {
        let obj = self.comp.mem.alloc(v.clone());
        Ok(Value { ty: dest, k: ValueKind::Ptr(PtrValue {
          base: PtrBase::Obj(obj), mutability: PtrMut::ComptimeConst,
        }) })
      }
      CastOp::ArrayToSlice => {
        let obj = match &v.k {
          ValueKind::Ptr(p) => self.comp.mem.pointee(p.base, &self.comp.types),
          _ => self.comp.mem.alloc(v.clone()),
        };
        let len = match self.comp.types.kind(self.comp.mem.get(obj).ty) {
          &TyKind::Array { len, .. } => len,
          _ => return Err(self.fail(id, "unable to evaluate constant expression")),
        };
        Ok(crate::coerce::make_slice_value(
          &mut self.comp.types, &mut self.comp.mem, dest, obj, 0, len, true))
      }
      CastOp::AlignCast | CastOp::PtrToInt => match &v.k {
        ValueKind::Ptr(PtrValue { base: PtrBase::Addr(a), .. })
        if op == CastOp::PtrToInt => Ok(Value::int(dest, BigInt::from(*a))),
        ValueKind::Ptr(_) if op == CastOp::AlignCast =>
          Ok(Value { ty: dest, k: v.k.clone() }),
        _ => Err(self.fail(id, "unable to evaluate constant expression")),
      },
    }
  }
}

fn cmp(op: BinOp, ord: std::cmp::Ordering) -> bool {
  match op {
    BinOp::CmpEq => ord.is_eq(),
    BinOp::CmpNeq => !ord.is_eq(),
    BinOp::CmpLt => ord.is_lt(),
    BinOp::CmpGt => ord.is_gt(),
    BinOp::CmpLte => ord.is_le(),
    BinOp::CmpGte => ord.is_ge(),
    _ => unreachable!("not a comparison"),
  }
}
