//! The analyze pass: a partial-evaluating rewrite from the unanalyzed IR to
//! a new executable in which every instruction has a concrete type, every
//! comptime-known sub-graph is folded, and comptime control flow has been
//! executed (branches inlined, loops unrolled under the branch quota).
//!
//! The driver walks reachable blocks from the entry; runtime branches
//! enqueue their successors, comptime branches continue inline in the
//! current output block. Operands always dominate their uses, so an
//! operand's analyzed counterpart exists by the time it is needed.

mod call;
pub(crate) mod ops;

use std::collections::VecDeque;

use bit_set::BitSet;
use hashbrown::HashMap;
use itertools::Itertools;
use log::debug;
use num::BigInt;
use num::traits::ToPrimitive;

use crate::Compiler;
use crate::builder::IrBuilder;
use crate::coerce;
use crate::peer::PeerCand;
use crate::types::{FnId, Idx, IdxVec, NodeId, ScopeId, SlotId, Symbol, VarId};
use crate::types::ir::{
  BlockId, Exec, Inst, InstId, InstKind, ScopeKind, SwitchRange,
};
use crate::types::ty::{ErrSet, PtrInfo, PtrLen, TyId, TyKind, Types};
use crate::value::{
  ArrayData, PtrBase, PtrMut, PtrValue, Value, ValueKind, optional_is_ptr_like,
};

/// Options for one executable's analysis.
#[derive(Clone, Copy, Debug)]
pub struct AnalyzeOpts {
  /// The type `return` operands coerce to, when the executable has a
  /// declared result type.
  pub expected_ret: Option<TyId>,
  /// Whether the whole executable runs at compile time.
  pub is_comptime: bool,
  /// The function this executable is the body of, if any.
  pub func: Option<FnId>,
}

/// What the driver does after an instruction.
enum Flow {
  /// Keep going in this block.
  Next,
  /// A comptime branch: continue at this old block, in the same new block.
  Inline(BlockId),
  /// The block ended; pick the next runtime block off the queue.
  End,
}

pub(crate) struct Analyzer<'a> {
  pub(crate) comp: &'a mut Compiler,
  pub(crate) old: &'a Exec,
  pub(crate) b: IrBuilder,
  pub(crate) opts: AnalyzeOpts,
  /// Unanalyzed instruction → its analyzed counterpart. Overwritten when a
  /// comptime loop re-analyzes a block.
  map: IdxVec<InstId, Option<InstId>>,
  /// Old runtime-reachable block → its new block.
  block_map: HashMap<BlockId, BlockId>,
  /// Runtime blocks waiting for analysis.
  queue: VecDeque<BlockId>,
  /// Old blocks already mapped/enqueued.
  enqueued: BitSet,
  /// When set, the next phi collapses to the value coming from this old
  /// predecessor (comptime branch inlining).
  const_pred: Option<BlockId>,
  /// Return operands, for implicit return type resolution.
  ret_candidates: Vec<PeerCand>,
  /// Error codes observed in return position, for `!T` inference.
  inferred_errors: Vec<crate::types::ErrId>,
  /// Resolved variable types.
  var_types: IdxVec<VarId, Option<TyId>>,
  /// Comptime variable storage: variable → memory slot.
  var_slots: IdxVec<VarId, Option<SlotId>>,
  /// Memory slots, backed by comptime objects.
  slots: Vec<crate::types::ObjId>,
  /// The old block currently being analyzed.
  cur_old_bb: BlockId,
  /// Lazily created `*const Allocator` type for async preludes.
  allocator_ptr_ty: Option<TyId>,
  /// Lazily created coroutine frame struct types, per result type.
  frame_structs: HashMap<Option<TyId>, TyId>,
}

/// Analyze one executable.
pub fn analyze_exec(comp: &mut Compiler, old: &Exec, opts: AnalyzeOpts) -> Exec {
  let quota = old.backward_branch_quota;
  let mut a = Analyzer {
    comp,
    old,
    b: IrBuilder::new(quota),
    opts,
    map: IdxVec::from_fn(old.insts.len(), || None),
    block_map: HashMap::new(),
    queue: VecDeque::new(),
    enqueued: BitSet::new(),
    const_pred: None,
    ret_candidates: vec![],
    inferred_errors: vec![],
    var_types: IdxVec::from_fn(old.vars.len(), || None),
    var_slots: IdxVec::from_fn(old.vars.len(), || None),
    slots: vec![],
    cur_old_bb: BlockId::ENTRY,
    allocator_ptr_ty: None,
    frame_structs: HashMap::new(),
  };
  a.run();
  a.finish()
}

/// The folded value produced by a comptime executable: the operand of the
/// (unique reachable) `return`.
#[must_use] pub fn comptime_return_value(exec: &Exec) -> Option<Value> {
  for &bb in &exec.order {
    for &i in &exec.blocks[bb].insts {
      if let InstKind::Return { operand } = exec.insts[i].k {
        let v = &exec.insts[operand].value;
        if v.is_comptime() { return Some(v.clone()) }
      }
    }
  }
  None
}

impl<'a> Analyzer<'a> {
  fn run(&mut self) {
    self.block_map.insert(BlockId::ENTRY, BlockId::ENTRY);
    self.enqueued.insert(BlockId::ENTRY.into_usize());
    let mut cur = BlockId::ENTRY;
    'outer: loop {
      self.cur_old_bb = cur;
      let insts = self.old.blocks[cur].insts.clone();
      let mut flow = Flow::End;
      for id in insts {
        match self.analyze_inst(id) {
          Flow::Next => {}
          f => { flow = f; break }
        }
      }
      match flow {
        Flow::Next | Flow::End => {}
        Flow::Inline(target) => {
          if target <= cur && !self.count_backward_branch(cur) {
            break 'outer
          }
          self.const_pred = Some(cur);
          cur = target;
          continue 'outer
        }
      }
      let Some(next) = self.queue.pop_front() else { break 'outer };
      self.const_pred = None;
      let new_bb = self.block_map[&next];
      self.b.append_block(new_bb);
      cur = next;
    }
  }

  fn finish(mut self) -> Exec {
    self.finish_inferred_errors();
    let mut exec = self.b.finish();
    exec.vars = self.old.vars.clone();
    for (v, ty) in self.var_types.enum_iter() {
      exec.vars[v].ty = *ty;
    }
    for (v, slot) in self.var_slots.enum_iter() {
      exec.vars[v].slot = *slot;
    }
    exec.slot_count = u32::try_from(self.slots.len()).expect("overflow");
    exec.slot_objs = self.slots.clone();
    exec.backward_branch_count = self.old.backward_branch_count;
    exec.parent_call_node = self.old.parent_call_node;
    exec.coro = self.old.coro.map(|c| crate::types::ir::CoroInfo {
      promise: self.map[c.promise].unwrap_or(c.promise),
      early_final: self.block_map.get(&c.early_final).copied().unwrap_or(c.early_final),
      normal_final: self.block_map.get(&c.normal_final).copied().unwrap_or(c.normal_final),
      cleanup: self.block_map.get(&c.cleanup).copied().unwrap_or(c.cleanup),
      suspend_bb: self.block_map.get(&c.suspend_bb).copied().unwrap_or(c.suspend_bb),
    });
    exec
  }

  fn finish_inferred_errors(&mut self) {
    let Some(func) = self.opts.func else { return };
    let mut errs = std::mem::take(&mut self.inferred_errors);
    errs.sort_unstable();
    errs.dedup();
    self.comp.ents.fns[func].inferred_errors = errs;
  }

  // ---- shared helpers -------------------------------------------------

  pub(crate) fn old_inst(&self, id: InstId) -> &Inst { &self.old.insts[id] }

  /// The analyzed counterpart of an old operand.
  pub(crate) fn use_of(&self, old: InstId) -> InstId {
    self.map[old].expect("operand analyzed before its use")
  }

  pub(crate) fn value_of(&self, new_id: InstId) -> &Value {
    &self.b.exec.insts[new_id].value
  }

  pub(crate) fn operand_val(&self, old: InstId) -> Value {
    self.value_of(self.use_of(old)).clone()
  }

  pub(crate) fn comptime_mode(&self, inst: &Inst) -> bool {
    self.opts.is_comptime || self.comp.scopes.is_comptime(inst.scope)
  }

  pub(crate) fn runtime_safety(&self, inst: &Inst) -> bool {
    self.comp.scopes.runtime_safety(inst.scope, self.comp.config.runtime_safety)
  }

  /// Append an analyzed instruction mirroring `old_id`.
  pub(crate) fn emit(&mut self, old_id: InstId, k: InstKind, value: Value) -> InstId {
    let old = &self.old.insts[old_id];
    let (node, scope, is_gen) = (old.node, old.scope, old.is_gen);
    let new = self.b.append_inst(Inst {
      node, scope, value, ref_count: 0, is_gen, other: Some(old_id), k,
    });
    self.map[old_id] = Some(new);
    new
  }

  /// Fold `old_id` to a constant.
  pub(crate) fn emit_const(&mut self, old_id: InstId, v: Value) -> InstId {
    self.emit(old_id, InstKind::Const, v)
  }

  /// Reuse an existing analyzed instruction as the counterpart of
  /// `old_id` (copy-through).
  pub(crate) fn reuse(&mut self, old_id: InstId, new_id: InstId) -> InstId {
    self.map[old_id] = Some(new_id);
    new_id
  }

  /// Report an error at the instruction, poison the executable, and
  /// produce an invalid constant.
  pub(crate) fn err_at(&mut self, old_id: InstId, msg: impl Into<String>) -> InstId {
    let node = self.old.insts[old_id].node;
    let span = self.comp.ast.span(node);
    self.comp.emit_error(span, msg);
    self.b.exec.invalid = true;
    self.emit_const(old_id, Value::invalid())
  }

  /// The operand must be comptime-known.
  pub(crate) fn require_static(&mut self, old_id: InstId, old_operand: InstId) -> Option<Value> {
    let v = self.operand_val(old_operand);
    if v.is_comptime() {
      Some(v)
    } else {
      self.err_at(old_id, "unable to evaluate constant expression");
      None
    }
  }

  /// Coerce an analyzed instruction, poisoning on failure.
  pub(crate) fn coerce_to(&mut self, old_id: InstId, inst: InstId, dest: TyId) -> InstId {
    let (scope, node) = {
      let o = &self.old.insts[old_id];
      (o.scope, o.node)
    };
    // A folded arithmetic result that cannot fit the type it is used at is
    // an overflow, not a type mismatch.
    if let Some(info) = self.comp.types.int_info(dest) {
      let v = self.value_of(inst);
      if v.ty == Types::COMPTIME_INT {
        if let Some(n) = v.as_int() {
          if !info.fits(n) {
            let from_math = self.b.exec.insts[inst].other.is_some_and(|o| {
              matches!(&self.old.insts[o].k,
                InstKind::BinOp { op, .. } if !op.is_cmp())
            });
            if from_math {
              return self.err_at(old_id, "operation caused overflow")
            }
          }
        }
      }
    }
    match coerce::coerce(self.comp, &mut self.b, inst, dest, scope, node) {
      Ok(i) => i,
      Err(()) => {
        self.b.exec.invalid = true;
        let v = Value::invalid();
        self.b.const_gen(scope, node, v)
      }
    }
  }

  fn count_backward_branch(&mut self, at_old_bb: BlockId) -> bool {
    self.b.exec.backward_branch_count += 1;
    if self.b.exec.backward_branch_count > self.b.exec.backward_branch_quota {
      let node = self.old.blocks[at_old_bb].insts.last()
        .map_or(NodeId(0), |&i| self.old.insts[i].node);
      let span = self.comp.ast.span(node);
      let quota = self.b.exec.backward_branch_quota;
      self.comp.emit_error(span,
        format!("evaluation exceeded {quota} backwards branches"));
      self.b.exec.invalid = true;
      self.queue.clear();
      return false
    }
    true
  }

  /// Map a runtime branch target, creating and enqueueing its new block on
  /// first sight.
  fn ensure_runtime_block(&mut self, old_bb: BlockId) -> BlockId {
    if let Some(&bb) = self.block_map.get(&old_bb) { return bb }
    let name = self.old.blocks[old_bb].name;
    let new_bb = self.b.new_block(name);
    self.block_map.insert(old_bb, new_bb);
    if self.enqueued.insert(old_bb.into_usize()) {
      self.queue.push_back(old_bb);
    }
    new_bb
  }

  /// Read a comptime string value (a pointer to an array of `u8`, or a
  /// slice of one).
  pub(crate) fn static_string(&mut self, old_id: InstId, old_operand: InstId) -> Option<String> {
    let v = self.require_static(old_id, old_operand)?;
    let base = match &v.k {
      ValueKind::Ptr(p) => p.base,
      ValueKind::Struct(fields) if fields.len() == 2 => {
        match &self.comp.mem.get(fields[0]).k {
          ValueKind::Ptr(p) => p.base,
          _ => {
            self.err_at(old_id, "expected string constant");
            return None
          }
        }
      }
      _ => {
        self.err_at(old_id, "expected string constant");
        return None
      }
    };
    let obj = match base {
      PtrBase::Obj(o) => o,
      PtrBase::ArrayElem { array, .. } => array,
      _ => {
        self.err_at(old_id, "expected string constant");
        return None
      }
    };
    let arr = self.comp.mem.get(obj).clone();
    let ValueKind::Array(ArrayData::Elems(elems)) = &arr.k else {
      self.err_at(old_id, "expected string constant");
      return None
    };
    let mut out = Vec::with_capacity(elems.len());
    for &e in elems {
      match &self.comp.mem.get(e).k {
        ValueKind::Int(n) => out.push(n.to_u8().unwrap_or(b'?')),
        _ => {
          self.err_at(old_id, "expected string constant");
          return None
        }
      }
    }
    Some(String::from_utf8_lossy(&out).into_owned())
  }

  /// The concrete type of the current function, if analysis has one.
  pub(crate) fn fn_ty_info(&self) -> Option<crate::types::ty::FnTyInfo> {
    let func = self.opts.func?;
    let ty = self.comp.ents.fns[func].ty?;
    match self.comp.types.kind(ty) {
      TyKind::Fn(info) => Some(info.clone()),
      _ => None,
    }
  }

  // ---- dispatch -------------------------------------------------------

  fn analyze_inst(&mut self, id: InstId) -> Flow {
    let kind = self.old.insts[id].k.clone();
    match kind {
      InstKind::Const => {
        let v = self.old.insts[id].value.clone();
        self.emit_const(id, v);
        Flow::Next
      }
      InstKind::Param { index } => { self.analyze_param(id, index); Flow::Next }
      InstKind::BuiltinCall { builtin, ref args } => {
        self.analyze_builtin(id, builtin, args);
        Flow::Next
      }
      InstKind::CompileErr { msg } => {
        let text = self.static_string(id, msg)
          .unwrap_or_else(|| "(invalid message)".into());
        self.err_at(id, text);
        Flow::Next
      }
      InstKind::DeclVar { var, ty, init } => { self.analyze_decl_var(id, var, ty, init); Flow::Next }
      InstKind::VarPtr { var } => { self.analyze_var_ptr(id, var); Flow::Next }
      InstKind::DeclRef { name, ptr } => { self.analyze_decl_ref(id, name, ptr); Flow::Next }
      InstKind::BinOp { op, lhs, rhs } => { self.analyze_bin_op(id, op, lhs, rhs); Flow::Next }
      InstKind::UnOp { op, operand } => { self.analyze_un_op(id, op, operand); Flow::Next }
      InstKind::LoadPtr { ptr } => { self.analyze_load(id, ptr); Flow::Next }
      InstKind::StorePtr { ptr, value } => { self.analyze_store(id, ptr, value); Flow::Next }
      InstKind::FieldPtr { container, field } => {
        self.analyze_field_ptr(id, container, field);
        Flow::Next
      }
      InstKind::ElemPtr { array_ptr, index, safety } => {
        self.analyze_elem_ptr(id, array_ptr, index, safety);
        Flow::Next
      }
      InstKind::SliceOp { array_ptr, start, end, safety } => {
        self.analyze_slice(id, array_ptr, start, end, safety);
        Flow::Next
      }
      InstKind::Call { callee, ref args, modifier } => {
        self.analyze_call(id, callee, args, modifier);
        Flow::Next
      }
      InstKind::Ref { operand } => { self.analyze_ref(id, operand); Flow::Next }
      InstKind::Return { operand } => self.analyze_return(id, operand),
      InstKind::AddImplicitReturnType { operand } => {
        self.analyze_add_implicit_ret(id, operand);
        Flow::Next
      }
      InstKind::TestErr { operand } => { self.analyze_test_err(id, operand); Flow::Next }
      InstKind::UnwrapErrCode { err_union_ptr } => {
        self.analyze_unwrap_err_code(id, err_union_ptr);
        Flow::Next
      }
      InstKind::UnwrapErrPayload { err_union_ptr, safety } => {
        self.analyze_unwrap_err_payload(id, err_union_ptr, safety);
        Flow::Next
      }
      InstKind::TestNonNull { operand } => {
        self.analyze_test_non_null(id, operand);
        Flow::Next
      }
      InstKind::UnwrapOptional { optional_ptr, safety } => {
        self.analyze_unwrap_optional(id, optional_ptr, safety);
        Flow::Next
      }
      InstKind::Cast { .. } =>
        unreachable!("cast instructions are only created by analysis"),
      InstKind::Br { dest } => self.analyze_br(id, dest),
      InstKind::CondBr { cond, then_bb, else_bb } =>
        self.analyze_cond_br(id, cond, then_bb, else_bb),
      InstKind::SwitchBr { target, ref cases, else_bb } =>
        self.analyze_switch_br(id, target, cases, else_bb),
      InstKind::Phi { ref incoming } => { self.analyze_phi(id, incoming); Flow::Next }
      InstKind::Unreachable => {
        if self.comptime_mode(&self.old.insts[id].clone()) {
          self.err_at(id, "reached unreachable code");
        } else {
          self.emit(id, InstKind::Unreachable, Value::no_return());
        }
        Flow::End
      }
      InstKind::Panic { msg } => {
        let inst = self.old.insts[id].clone();
        if self.comptime_mode(&inst) {
          let text = self.static_string(id, msg)
            .unwrap_or_else(|| "(invalid message)".into());
          self.err_at(id, format!("encountered @panic at compile-time: {text}"));
        } else {
          let m = self.use_of(msg);
          self.emit(id, InstKind::Panic { msg: m }, Value::no_return());
        }
        Flow::End
      }
      InstKind::CheckSwitchProngs { target, ref ranges, have_else } => {
        self.analyze_check_switch_prongs(id, target, ranges, have_else);
        Flow::Next
      }
      InstKind::CheckStatementIsVoid { operand } => {
        self.analyze_check_statement_is_void(id, operand);
        Flow::Next
      }
      InstKind::SetRuntimeSafety { on } => {
        self.analyze_set_runtime_safety(id, on);
        Flow::Next
      }
      InstKind::SetEvalBranchQuota { quota } => {
        self.analyze_set_eval_branch_quota(id, quota);
        Flow::Next
      }
      InstKind::OverflowOp { op, ty, lhs, rhs, result_ptr } => {
        self.analyze_overflow_op(id, op, ty, lhs, rhs, result_ptr);
        Flow::Next
      }
      InstKind::Cmpxchg { ptr, expected, new_value, success_order, failure_order, is_weak } => {
        self.analyze_cmpxchg(id, ptr, expected, new_value, success_order, failure_order, is_weak);
        Flow::Next
      }
      InstKind::Fence { order } => { self.analyze_fence(id, order); Flow::Next }
      InstKind::AtomicRmw { ptr, op, operand, order } => {
        self.analyze_atomic_rmw(id, ptr, op, operand, order);
        Flow::Next
      }
      InstKind::AtomicLoad { ptr, order } => {
        self.analyze_atomic_load(id, ptr, order);
        Flow::Next
      }
      InstKind::CImport { cimport_scope } => {
        self.analyze_c_import(id, cimport_scope);
        Flow::Next
      }
      InstKind::CInclude { name } => {
        if let Some(text) = self.static_string(id, name) {
          self.push_c_buffer(id, &format!("#include <{text}>\n"));
          self.emit_const(id, Value::void());
        }
        Flow::Next
      }
      InstKind::CDefine { name, value } => {
        if let Some(text) = self.static_string(id, name) {
          let val = value.and_then(|v| self.static_string(id, v)).unwrap_or_default();
          self.push_c_buffer(id, &format!("#define {text} {val}\n"));
          self.emit_const(id, Value::void());
        }
        Flow::Next
      }
      InstKind::CUndef { name } => {
        if let Some(text) = self.static_string(id, name) {
          self.push_c_buffer(id, &format!("#undef {text}\n"));
          self.emit_const(id, Value::void());
        }
        Flow::Next
      }
      InstKind::ArrayInit { elem_ty, len, ref elems } => {
        self.analyze_array_init(id, elem_ty, len, elems);
        Flow::Next
      }
      InstKind::StructInit { ty, ref fields } => {
        self.analyze_struct_init(id, ty, fields);
        Flow::Next
      }
      InstKind::MakeArrayType { len, elem } => {
        self.analyze_make_array_type(id, len, elem);
        Flow::Next
      }
      InstKind::MakePtrType { is_many, is_const, is_volatile, align, elem } => {
        self.analyze_make_ptr_type(id, is_many, is_const, is_volatile, align, elem);
        Flow::Next
      }
      InstKind::MakeSliceType { is_const, align, elem } => {
        self.analyze_make_slice_type(id, is_const, align, elem);
        Flow::Next
      }
      InstKind::MakeErrUnionType { set, payload } => {
        self.analyze_make_err_union_type(id, set, payload);
        Flow::Next
      }
      InstKind::CoroAlloc { allocator } => { self.analyze_coro_alloc(id, allocator); Flow::Next }
      InstKind::CoroAllocFail { err } => {
        let e = self.use_of(err);
        self.emit(id, InstKind::CoroAllocFail { err: e }, Value::no_return());
        Flow::End
      }
      InstKind::CoroBegin { frame } => { self.analyze_coro_begin(id, frame); Flow::Next }
      InstKind::CoroPromise => { self.analyze_coro_promise(id); Flow::Next }
      InstKind::CoroSuspend { is_final } => {
        let inst = self.old.insts[id].clone();
        if self.comptime_mode(&inst) {
          self.err_at(id, "unable to evaluate constant expression");
        } else {
          let u8t = self.comp.types.int(crate::types::IntInfo { signed: false, bits: 8 });
          self.emit(id, InstKind::CoroSuspend { is_final }, Value::runtime(u8t));
        }
        Flow::Next
      }
      InstKind::CoroResume { target } => {
        let t = self.use_of(target);
        self.emit(id, InstKind::CoroResume { target: t }, Value::void());
        Flow::Next
      }
      InstKind::CoroEnd => {
        self.emit(id, InstKind::CoroEnd, Value::no_return());
        Flow::End
      }
      InstKind::CoroFree { frame } => {
        let f = self.use_of(frame);
        self.emit(id, InstKind::CoroFree { frame: f }, Value::void());
        Flow::Next
      }
    }
  }

  // ---- control flow ---------------------------------------------------

  fn analyze_br(&mut self, id: InstId, dest: BlockId) -> Flow {
    let inst = self.old.insts[id].clone();
    if self.comptime_mode(&inst) {
      self.map[id] = None;
      return Flow::Inline(dest)
    }
    let new_dest = self.ensure_runtime_block(dest);
    self.emit(id, InstKind::Br { dest: new_dest }, Value::no_return());
    Flow::End
  }

  fn analyze_cond_br(
    &mut self, id: InstId, cond: InstId, then_bb: BlockId, else_bb: BlockId,
  ) -> Flow {
    let inst = self.old.insts[id].clone();
    let c = self.operand_val(cond);
    if c.ty == Types::INVALID {
      self.b.exec.invalid = true;
      return Flow::End
    }
    match c.as_bool() {
      Some(taken) => {
        let target = if taken { then_bb } else { else_bb };
        if self.comptime_mode(&inst) {
          self.map[id] = None;
          Flow::Inline(target)
        } else {
          // Fold to an unconditional branch; the untaken side is dead.
          let new_dest = self.ensure_runtime_block(target);
          self.emit(id, InstKind::Br { dest: new_dest }, Value::no_return());
          Flow::End
        }
      }
      None if c.is_undef() => {
        self.err_at(id, "use of undefined value");
        Flow::End
      }
      None => {
        if self.comptime_mode(&inst) {
          self.err_at(id, "unable to evaluate constant expression");
          return Flow::End
        }
        let ci = self.use_of(cond);
        let ci = self.coerce_to(id, ci, Types::BOOL);
        let t = self.ensure_runtime_block(then_bb);
        let e = self.ensure_runtime_block(else_bb);
        self.emit(id, InstKind::CondBr { cond: ci, then_bb: t, else_bb: e },
          Value::no_return());
        Flow::End
      }
    }
  }

  fn analyze_switch_br(
    &mut self, id: InstId, target: InstId,
    cases: &[crate::types::ir::SwitchCase], else_bb: BlockId,
  ) -> Flow {
    let inst = self.old.insts[id].clone();
    let t = self.operand_val(target);
    if t.is_comptime() {
      // Find the matching case by value equality.
      let mut dest = else_bb;
      for case in cases {
        let cv = self.operand_val(case.item);
        if !cv.is_comptime() {
          self.err_at(id, "switch case value must be comptime known");
          return Flow::End
        }
        if self.comp.mem.equals(&t, &cv) {
          dest = case.bb;
          break
        }
      }
      if self.comptime_mode(&inst) {
        self.map[id] = None;
        return Flow::Inline(dest)
      }
      let new_dest = self.ensure_runtime_block(dest);
      self.emit(id, InstKind::Br { dest: new_dest }, Value::no_return());
      return Flow::End
    }
    if self.comptime_mode(&inst) {
      self.err_at(id, "unable to evaluate constant expression");
      return Flow::End
    }
    let ti = self.use_of(target);
    let mut new_cases = Vec::with_capacity(cases.len());
    for case in cases {
      let cv = self.operand_val(case.item);
      if !cv.is_comptime() {
        self.err_at(id, "switch case value must be comptime known");
        return Flow::End
      }
      let item = self.use_of(case.item);
      let item = self.coerce_to(id, item, self.value_of(ti).ty);
      new_cases.push(crate::types::ir::SwitchCase {
        item, bb: self.ensure_runtime_block(case.bb),
      });
    }
    let e = self.ensure_runtime_block(else_bb);
    self.emit(id, InstKind::SwitchBr {
      target: ti, cases: new_cases.into(), else_bb: e,
    }, Value::no_return());
    Flow::End
  }

  fn analyze_phi(&mut self, id: InstId, incoming: &[(BlockId, InstId)]) {
    // A comptime-inlined predecessor collapses the phi to its value.
    if let Some(pred) = self.const_pred {
      if let Some(&(_, v)) = incoming.iter().find(|&&(bb, _)| bb == pred) {
        let mapped = self.use_of(v);
        self.reuse(id, mapped);
        return
      }
    }
    // Keep edges whose predecessor was reached and whose value is not
    // unreachable.
    let mut live: Vec<(BlockId, InstId)> = vec![];
    for &(bb, v) in incoming {
      let Some(&new_bb) = self.block_map.get(&bb) else { continue };
      let Some(nv) = self.map[v] else { continue };
      if self.value_of(nv).is_unreachable() { continue }
      live.push((new_bb, nv));
    }
    match live.len() {
      0 => { self.emit_const(id, Value::no_return()); }
      1 => { let (_, v) = live[0]; self.reuse(id, v); }
      _ => {
        let node = self.old.insts[id].node;
        let cands: Vec<PeerCand> = live.iter().map(|&(_, v)| {
          let val = self.value_of(v);
          PeerCand {
            ty: val.ty,
            value: val.is_comptime().then(|| val.clone()),
            node: self.b.exec.insts[v].node,
          }
        }).collect();
        let ty = crate::peer::resolve_peer_types(self.comp, None, &cands, node);
        if ty == Types::INVALID {
          self.b.exec.invalid = true;
          self.emit_const(id, Value::invalid());
          return
        }
        // Insert coercions in the predecessors, before their terminators.
        let mut coerced = Vec::with_capacity(live.len());
        let scope = self.old.insts[id].scope;
        for (bb, v) in live {
          if self.value_of(v).ty == ty {
            coerced.push((bb, v));
            continue
          }
          let save = self.b.cur_bb;
          self.b.set_cursor(bb);
          // Remove the terminator, coerce, and restore it so the coercion
          // sits before the branch.
          let term = self.b.exec.blocks[bb].insts.pop().expect("terminated predecessor");
          let c = match coerce::coerce(self.comp, &mut self.b, v, ty, scope, node) {
            Ok(c) => c,
            Err(()) => {
              self.b.exec.invalid = true;
              self.b.const_gen(scope, node, Value::invalid())
            }
          };
          self.b.exec.blocks[bb].insts.push(term);
          self.b.set_cursor(save);
          coerced.push((bb, c));
        }
        // All edges statically equal folds the phi.
        let first = self.value_of(coerced[0].1).clone();
        if first.is_comptime() && coerced.iter().all(|&(_, v)| {
          let val = self.value_of(v);
          val.is_comptime() && self.comp.mem.equals(&first, val)
        }) {
          self.emit_const(id, first);
          return
        }
        self.emit(id, InstKind::Phi { incoming: coerced.into() }, Value::runtime(ty));
      }
    }
  }

  fn analyze_return(&mut self, id: InstId, operand: InstId) -> Flow {
    let v = self.use_of(operand);
    let coerced = match self.opts.expected_ret {
      Some(ret) => self.coerce_to(id, v, ret),
      None => v,
    };
    self.emit(id, InstKind::Return { operand: coerced }, Value::no_return());
    Flow::End
  }

  fn analyze_add_implicit_ret(&mut self, id: InstId, operand: InstId) {
    let v = self.use_of(operand);
    let val = self.value_of(v).clone();
    self.ret_candidates.push(PeerCand {
      ty: val.ty,
      value: val.is_comptime().then(|| val.clone()),
      node: self.b.exec.insts[v].node,
    });
    // Collect symbolic errors for `!T` return-set inference.
    match self.comp.types.kind(val.ty) {
      TyKind::ErrorSet(ErrSet::List(list)) => self.inferred_errors.extend(list.iter().copied()),
      TyKind::ErrorUnion { set, .. } => {
        if let Some(list) = self.comp.types.error_list(*set) {
          self.inferred_errors.extend_from_slice(list);
        }
      }
      _ => {}
    }
    self.emit_const(id, Value::void());
  }

  // ---- declarations and memory ---------------------------------------

  fn analyze_param(&mut self, id: InstId, index: u32) {
    let Some(info) = self.fn_ty_info() else {
      self.err_at(id, "parameter reference outside function");
      return
    };
    let idx = index as usize;
    if idx == info.params.len() {
      // The implicit async allocator.
      let ty = self.allocator_ptr_type();
      self.emit(id, InstKind::Param { index }, Value::runtime(ty));
      return
    }
    match info.params.get(idx).and_then(|p| p.ty) {
      Some(ty) => { self.emit(id, InstKind::Param { index }, Value::runtime(ty)); }
      None => { self.err_at(id, "generic parameter used without instantiation"); }
    }
  }

  pub(crate) fn allocator_ptr_type(&mut self) -> TyId {
    if let Some(t) = self.allocator_ptr_ty { return t }
    let name = self.comp.syms.intern("Allocator");
    let opaque = self.comp.types.declare(TyKind::Opaque(name));
    let t = self.comp.types.ptr(PtrInfo::single(opaque, false));
    self.allocator_ptr_ty = Some(t);
    t
  }

  fn analyze_decl_var(&mut self, id: InstId, var: VarId, ty: Option<InstId>, init: InstId) {
    let inst = self.old.insts[id].clone();
    let annotated = match ty {
      Some(t) => match self.require_static(id, t) {
        None => {
          self.var_types[var] = Some(Types::INVALID);
          return
        }
        Some(v) => match v.as_ty() {
          Some(t) => Some(t),
          None => {
            self.err_at(id, "expected type expression");
            self.var_types[var] = Some(Types::INVALID);
            return
          }
        },
      },
      None => None,
    };
    let init_new = self.use_of(init);
    let init_new = match annotated {
      Some(t) => self.coerce_to(id, init_new, t),
      None => init_new,
    };
    let init_val = self.value_of(init_new).clone();
    let var_ty = annotated.unwrap_or(init_val.ty);
    let info = self.old.vars[var].clone();
    if self.comp.types.is_comptime_only(var_ty) &&
      !info.is_const && !info.is_comptime && !self.comptime_mode(&inst) {
      let name = self.comp.types.name(var_ty, &self.comp.syms);
      self.err_at(id, format!("variable of type '{name}' must be const or comptime"));
      self.var_types[var] = Some(Types::INVALID);
      return
    }
    self.var_types[var] = Some(var_ty);
    let make_comptime = info.is_comptime || self.comptime_mode(&inst) ||
      (info.is_const && init_val.is_comptime());
    if make_comptime {
      if !init_val.is_comptime() {
        self.err_at(id, "cannot store runtime value in compile time variable");
        return
      }
      // Mutable comptime storage needs its own object graph.
      let stored = if info.is_const {
        self.comp.mem.copy(&init_val, false)
      } else {
        self.comp.mem.copy(&init_val, true)
      };
      let obj = self.comp.mem.alloc(stored);
      let slot = SlotId(u32::try_from(self.slots.len()).expect("overflow"));
      self.slots.push(obj);
      self.var_slots[var] = Some(slot);
      self.emit_const(id, Value::void());
    } else {
      self.emit(id, InstKind::DeclVar { var, ty: None, init: init_new }, Value::void());
    }
  }

  fn analyze_var_ptr(&mut self, id: InstId, var: VarId) {
    let Some(var_ty) = self.var_types[var] else {
      self.err_at(id, "variable used before declaration");
      return
    };
    if var_ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let info = self.old.vars[var].clone();
    let ptr_ty = self.comp.types.ptr(PtrInfo::single(var_ty, info.is_const));
    match self.var_slots[var] {
      Some(slot) => {
        let obj = self.slots[slot.into_usize()];
        let mutability =
          if info.is_const { PtrMut::ComptimeConst } else { PtrMut::ComptimeVar };
        self.emit_const(id, Value { ty: ptr_ty, k: ValueKind::Ptr(PtrValue {
          base: PtrBase::Obj(obj), mutability,
        }) });
      }
      None => {
        self.emit(id, InstKind::VarPtr { var }, Value::runtime(ptr_ty));
      }
    }
  }

  fn analyze_decl_ref(&mut self, id: InstId, name: Symbol, ptr: bool) {
    let scope = self.old.insts[id].scope;
    let Some(decl) = self.comp.find_decl_in_scope(scope, name) else {
      let text = self.comp.syms.name(name).to_owned();
      self.err_at(id, format!("use of undeclared identifier '{text}'"));
      return
    };
    let value = self.comp.resolve_decl(decl);
    if value.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    if ptr {
      let pointee_ty = value.ty;
      let obj = self.comp.mem.alloc(value);
      let ptr_ty = self.comp.types.ptr(PtrInfo::single(pointee_ty, true));
      self.emit_const(id, Value { ty: ptr_ty, k: ValueKind::Ptr(PtrValue {
        base: PtrBase::Obj(obj), mutability: PtrMut::ComptimeConst,
      }) });
    } else {
      self.emit_const(id, value);
    }
  }

  fn analyze_load(&mut self, id: InstId, ptr: InstId) {
    let pv = self.operand_val(ptr);
    if pv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let Some(info) = self.comp.types.ptr_info(pv.ty).copied() else {
      let name = self.comp.types.name(pv.ty, &self.comp.syms);
      self.err_at(id, format!("attempt to dereference non-pointer type '{name}'"));
      return
    };
    if pv.is_undef() {
      self.err_at(id, "use of undefined value");
      return
    }
    match &pv.k {
      ValueKind::Ptr(p) => match p.base {
        PtrBase::Obj(_) | PtrBase::ArrayElem { .. } | PtrBase::Field { .. } => {
          let obj = self.comp.mem.pointee(p.base, &self.comp.types);
          let loaded = self.comp.mem.get(obj).clone();
          // A load through a comptime pointer sees the current contents.
          self.emit_const(id, Value { ty: info.elem, k: loaded.k });
        }
        _ => {
          let p_new = self.use_of(ptr);
          self.emit(id, InstKind::LoadPtr { ptr: p_new }, Value::runtime(info.elem));
        }
      },
      _ => {
        let p_new = self.use_of(ptr);
        self.emit(id, InstKind::LoadPtr { ptr: p_new }, Value::runtime(info.elem));
      }
    }
  }

  fn analyze_store(&mut self, id: InstId, ptr: InstId, value: InstId) {
    let pv = self.operand_val(ptr);
    if pv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let Some(info) = self.comp.types.ptr_info(pv.ty).copied() else {
      let name = self.comp.types.name(pv.ty, &self.comp.syms);
      self.err_at(id, format!("attempt to dereference non-pointer type '{name}'"));
      return
    };
    if info.is_const {
      self.err_at(id, "cannot assign to constant");
      return
    }
    let v_new = self.use_of(value);
    let v_new = self.coerce_to(id, v_new, info.elem);
    let stored = self.value_of(v_new).clone();
    match &pv.k {
      ValueKind::Ptr(p) if p.mutability == PtrMut::ComptimeVar => {
        if !stored.is_comptime() {
          self.err_at(id, "cannot store runtime value in compile time variable");
          return
        }
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        let deep = self.comp.mem.copy(&stored, true);
        self.comp.mem.set(obj, deep);
        self.emit_const(id, Value::void());
      }
      ValueKind::Ptr(p) if matches!(p.base, PtrBase::Discard) => {
        self.emit_const(id, Value::void());
      }
      ValueKind::Ptr(p) if p.mutability == PtrMut::ComptimeConst => {
        self.err_at(id, "cannot assign to constant");
      }
      _ => {
        let p_new = self.use_of(ptr);
        self.emit(id, InstKind::StorePtr { ptr: p_new, value: v_new }, Value::void());
      }
    }
  }

  fn analyze_ref(&mut self, id: InstId, operand: InstId) {
    let v = self.operand_val(operand);
    if v.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let ptr_ty = self.comp.types.ptr(PtrInfo::single(v.ty, true));
    if v.is_comptime() {
      let obj = self.comp.mem.alloc(v);
      self.emit_const(id, Value { ty: ptr_ty, k: ValueKind::Ptr(PtrValue {
        base: PtrBase::Obj(obj), mutability: PtrMut::ComptimeConst,
      }) });
    } else {
      let o = self.use_of(operand);
      self.emit(id, InstKind::Ref { operand: o }, Value::runtime(ptr_ty));
    }
  }

  // ---- error unions and optionals ------------------------------------

  fn analyze_test_err(&mut self, id: InstId, operand: InstId) {
    let v = self.operand_val(operand);
    match self.comp.types.kind(v.ty).clone() {
      TyKind::Invalid => {
        self.b.exec.invalid = true;
        self.emit_const(id, Value::invalid());
      }
      TyKind::ErrorUnion { .. } => match &v.k {
        ValueKind::ErrUnion(r) => { self.emit_const(id, Value::bool(r.is_err())); }
        ValueKind::Undef => { self.err_at(id, "use of undefined value"); }
        _ => {
          let o = self.use_of(operand);
          self.emit(id, InstKind::TestErr { operand: o }, Value::runtime(Types::BOOL));
        }
      },
      TyKind::ErrorSet(_) => { self.emit_const(id, Value::bool(true)); }
      _ => { self.emit_const(id, Value::bool(false)); }
    }
  }

  /// The error-union type behind a pointer operand, or a diagnostic.
  fn err_union_behind(&mut self, id: InstId, ptr: InstId) -> Option<(Value, TyId, TyId)> {
    let pv = self.operand_val(ptr);
    if pv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return None
    }
    let elem = match self.comp.types.ptr_info(pv.ty) {
      Some(info) => info.elem,
      None => {
        self.err_at(id, "expected pointer to error union");
        return None
      }
    };
    match *self.comp.types.kind(elem) {
      TyKind::ErrorUnion { set, payload } => Some((pv, set, payload)),
      _ => {
        let name = self.comp.types.name(elem, &self.comp.syms);
        self.err_at(id, format!("expected error union type, found '{name}'"));
        None
      }
    }
  }

  fn analyze_unwrap_err_code(&mut self, id: InstId, err_union_ptr: InstId) {
    let Some((pv, set, _)) = self.err_union_behind(id, err_union_ptr) else { return };
    if let ValueKind::Ptr(p) = &pv.k {
      if p.mutability != PtrMut::RuntimeVar {
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        match &self.comp.mem.get(obj).k {
          ValueKind::ErrUnion(Err(e)) => {
            self.emit_const(id, Value { ty: set, k: ValueKind::ErrorCode(*e) });
            return
          }
          ValueKind::ErrUnion(Ok(_)) => {
            self.err_at(id, "expected error, found payload");
            return
          }
          _ => {}
        }
      }
    }
    let p = self.use_of(err_union_ptr);
    self.emit(id, InstKind::UnwrapErrCode { err_union_ptr: p }, Value::runtime(set));
  }

  fn analyze_unwrap_err_payload(&mut self, id: InstId, err_union_ptr: InstId, safety: bool) {
    let Some((pv, _, payload)) = self.err_union_behind(id, err_union_ptr) else { return };
    let is_const = self.comp.types.ptr_info(pv.ty).is_some_and(|i| i.is_const);
    let result_ty = self.comp.types.ptr(PtrInfo::single(payload, is_const));
    if let ValueKind::Ptr(p) = &pv.k {
      if p.mutability != PtrMut::RuntimeVar {
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        match self.comp.mem.get(obj).k.clone() {
          ValueKind::ErrUnion(Ok(payload_obj)) => {
            let mutability = p.mutability;
            self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::Obj(payload_obj), mutability,
            }) });
            return
          }
          ValueKind::ErrUnion(Err(e)) => {
            let name = self.comp.syms.name(self.comp.errors.name(e)).to_owned();
            self.err_at(id, format!("caught unexpected error 'error.{name}'"));
            return
          }
          _ => {}
        }
      }
    }
    let safety = safety && self.runtime_safety(&self.old.insts[id].clone());
    let p = self.use_of(err_union_ptr);
    self.emit(id, InstKind::UnwrapErrPayload { err_union_ptr: p, safety },
      Value::runtime(result_ty));
  }

  fn analyze_test_non_null(&mut self, id: InstId, operand: InstId) {
    let v = self.operand_val(operand);
    match self.comp.types.kind(v.ty).clone() {
      TyKind::Invalid => {
        self.b.exec.invalid = true;
        self.emit_const(id, Value::invalid());
      }
      TyKind::Optional(child) => {
        if v.is_comptime() && !v.is_undef() {
          let non_null = if optional_is_ptr_like(&self.comp.types, child) {
            !matches!(v.k, ValueKind::Ptr(PtrValue { base: PtrBase::Addr(0), .. }))
          } else {
            matches!(v.k, ValueKind::Optional(Some(_)))
          };
          self.emit_const(id, Value::bool(non_null));
        } else if v.is_undef() {
          self.err_at(id, "use of undefined value");
        } else {
          let o = self.use_of(operand);
          self.emit(id, InstKind::TestNonNull { operand: o }, Value::runtime(Types::BOOL));
        }
      }
      TyKind::Null => { self.emit_const(id, Value::bool(false)); }
      _ => { self.emit_const(id, Value::bool(true)); }
    }
  }

  fn analyze_unwrap_optional(&mut self, id: InstId, optional_ptr: InstId, safety: bool) {
    let pv = self.operand_val(optional_ptr);
    if pv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let Some(info) = self.comp.types.ptr_info(pv.ty).copied() else {
      self.err_at(id, "expected pointer to optional");
      return
    };
    let TyKind::Optional(child) = *self.comp.types.kind(info.elem) else {
      let name = self.comp.types.name(info.elem, &self.comp.syms);
      self.err_at(id, format!("expected optional type, found '{name}'"));
      return
    };
    let result_ty = self.comp.types.ptr(PtrInfo::single(child, info.is_const));
    if let ValueKind::Ptr(p) = &pv.k {
      if p.mutability != PtrMut::RuntimeVar {
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        let mutability = p.mutability;
        let inner = self.comp.mem.get(obj).clone();
        if optional_is_ptr_like(&self.comp.types, child) {
          if matches!(inner.k, ValueKind::Ptr(PtrValue { base: PtrBase::Addr(0), .. })) {
            self.err_at(id, "unable to unwrap null");
            return
          }
          let payload_obj = self.comp.mem.alloc(Value { ty: child, k: inner.k });
          self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
            base: PtrBase::Obj(payload_obj), mutability,
          }) });
          return
        }
        match inner.k {
          ValueKind::Optional(Some(payload_obj)) => {
            self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::Obj(payload_obj), mutability,
            }) });
            return
          }
          ValueKind::Optional(None) | ValueKind::Null => {
            self.err_at(id, "unable to unwrap null");
            return
          }
          _ => {}
        }
      }
    }
    let safety = safety && self.runtime_safety(&self.old.insts[id].clone());
    let p = self.use_of(optional_ptr);
    self.emit(id, InstKind::UnwrapOptional { optional_ptr: p, safety },
      Value::runtime(result_ty));
  }

  // ---- aggregates -----------------------------------------------------

  fn analyze_array_init(
    &mut self, id: InstId, elem_ty: InstId, len: Option<InstId>, elems: &[InstId],
  ) {
    let Some(elem_t) = self.require_static(id, elem_ty).and_then(|v| v.as_ty()) else {
      self.err_at(id, "expected type expression");
      return
    };
    let count = match len {
      Some(l) => match self.require_static(id, l).and_then(|v| v.as_int().cloned()) {
        Some(n) => match n.to_u64() {
          Some(n) => n,
          None => {
            self.err_at(id, "array length out of range");
            return
          }
        },
        None => return,
      },
      None => elems.len() as u64,
    };
    if count != elems.len() as u64 {
      self.err_at(id, format!(
        "expected {count} array elements, found {}", elems.len()));
      return
    }
    let arr_ty = self.comp.types.array(elem_t, count);
    let mut coerced = Vec::with_capacity(elems.len());
    for &e in elems {
      let ei = self.use_of(e);
      coerced.push(self.coerce_to(id, ei, elem_t));
    }
    if coerced.iter().all(|&i| self.value_of(i).is_comptime()) {
      let objs: Box<[_]> = coerced.iter()
        .map(|&i| {
          let v = self.value_of(i).clone();
          self.comp.mem.alloc(v)
        })
        .collect();
      self.emit_const(id, Value {
        ty: arr_ty, k: ValueKind::Array(ArrayData::Elems(objs)),
      });
    } else {
      self.emit(id, InstKind::ArrayInit {
        elem_ty: self.use_of(elem_ty), len: None, elems: coerced.into(),
      }, Value::runtime(arr_ty));
    }
  }

  fn analyze_struct_init(&mut self, id: InstId, ty: InstId, fields: &[(Symbol, InstId)]) {
    let Some(struct_t) = self.require_static(id, ty).and_then(|v| v.as_ty()) else {
      self.err_at(id, "expected type expression");
      return
    };
    let TyKind::Struct(info) = self.comp.types.kind(struct_t).clone() else {
      let name = self.comp.types.name(struct_t, &self.comp.syms);
      self.err_at(id, format!("type '{name}' does not support struct initialization"));
      return
    };
    let mut by_field: Vec<Option<InstId>> = vec![None; info.fields.len()];
    for &(name, v) in fields {
      match info.fields.iter().position(|f| f.name == name) {
        Some(i) => {
          let vi = self.use_of(v);
          by_field[i] = Some(self.coerce_to(id, vi, info.fields[i].ty));
        }
        None => {
          let text = self.comp.syms.name(name).to_owned();
          let tname = self.comp.types.name(struct_t, &self.comp.syms);
          self.err_at(id, format!("no member named '{text}' in '{tname}'"));
          return
        }
      }
    }
    let mut inits = Vec::with_capacity(info.fields.len());
    for (i, slot) in by_field.iter().enumerate() {
      match slot {
        Some(v) => inits.push(*v),
        None => {
          let text = self.comp.syms.name(info.fields[i].name).to_owned();
          self.err_at(id, format!("missing field: '{text}'"));
          return
        }
      }
    }
    if inits.iter().all(|&i| self.value_of(i).is_comptime()) {
      let objs: Box<[_]> = inits.iter()
        .map(|&i| {
          let v = self.value_of(i).clone();
          self.comp.mem.alloc(v)
        })
        .collect();
      self.emit_const(id, Value { ty: struct_t, k: ValueKind::Struct(objs) });
    } else {
      let field_insts: Box<[_]> = fields.iter().map(|&(n, _)| n)
        .zip(inits.iter().copied())
        .collect();
      self.emit(id, InstKind::StructInit {
        ty: self.use_of(ty), fields: field_insts,
      }, Value::runtime(struct_t));
    }
  }

  // ---- type constructors ----------------------------------------------

  fn analyze_make_array_type(&mut self, id: InstId, len: InstId, elem: InstId) {
    let Some(n) = self.require_static(id, len).and_then(|v| v.as_int().cloned()) else {
      return
    };
    let Some(elem_t) = self.require_static(id, elem).and_then(|v| v.as_ty()) else {
      self.err_at(id, "expected type expression");
      return
    };
    match n.to_u64() {
      Some(n) => {
        let t = self.comp.types.array(elem_t, n);
        self.emit_const(id, Value::ty(t));
      }
      None => { self.err_at(id, "array length out of range"); }
    }
  }

  fn analyze_make_ptr_type(
    &mut self, id: InstId, is_many: bool, is_const: bool, is_volatile: bool,
    align: Option<InstId>, elem: InstId,
  ) {
    let Some(elem_t) = self.require_static(id, elem).and_then(|v| v.as_ty()) else {
      self.err_at(id, "expected type expression");
      return
    };
    let align = match align {
      Some(a) => match self.require_static(id, a)
        .and_then(|v| v.as_int().and_then(BigInt::to_u32)) {
        Some(n) if n.is_power_of_two() => Some(n),
        _ => {
          self.err_at(id, "alignment must be a power of two");
          return
        }
      },
      None => None,
    };
    let t = self.comp.types.ptr(PtrInfo {
      elem: elem_t,
      len: if is_many { PtrLen::Many } else { PtrLen::Single },
      is_const, is_volatile, align,
      bit_offset: 0, host_int_bits: 0,
    });
    self.emit_const(id, Value::ty(t));
  }

  fn analyze_make_slice_type(
    &mut self, id: InstId, is_const: bool, align: Option<InstId>, elem: InstId,
  ) {
    let Some(elem_t) = self.require_static(id, elem).and_then(|v| v.as_ty()) else {
      self.err_at(id, "expected type expression");
      return
    };
    let align = match align {
      Some(a) => match self.require_static(id, a)
        .and_then(|v| v.as_int().and_then(BigInt::to_u32)) {
        Some(n) if n.is_power_of_two() => Some(n),
        _ => {
          self.err_at(id, "alignment must be a power of two");
          return
        }
      },
      None => None,
    };
    let t = self.comp.types.slice(PtrInfo {
      align, ..PtrInfo::many(elem_t, is_const)
    });
    self.emit_const(id, Value::ty(t));
  }

  fn analyze_make_err_union_type(&mut self, id: InstId, set: Option<InstId>, payload: InstId) {
    let set_t = match set {
      Some(s) => match self.require_static(id, s).and_then(|v| v.as_ty()) {
        Some(t) if matches!(self.comp.types.kind(t), TyKind::ErrorSet(_)) => t,
        Some(t) => {
          let name = self.comp.types.name(t, &self.comp.syms);
          self.err_at(id, format!("expected error set type, found '{name}'"));
          return
        }
        None => return,
      },
      None => Types::GLOBAL_ERROR_SET,
    };
    let Some(payload_t) = self.require_static(id, payload).and_then(|v| v.as_ty()) else {
      self.err_at(id, "expected type expression");
      return
    };
    let t = self.comp.types.error_union(set_t, payload_t);
    self.emit_const(id, Value::ty(t));
  }

  // ---- statement checks ----------------------------------------------

  fn analyze_check_statement_is_void(&mut self, id: InstId, operand: InstId) {
    let v = self.use_of(operand);
    let ty = self.value_of(v).ty;
    let exempt = self.b.exec.insts[v].is_gen;
    if !exempt && !matches!(ty, t if t == Types::VOID || t == Types::NORETURN ||
      t == Types::INVALID) {
      self.err_at(id, "expression value is ignored");
      return
    }
    self.emit_const(id, Value::void());
  }

  fn analyze_set_runtime_safety(&mut self, id: InstId, on: InstId) {
    let Some(v) = self.require_static(id, on) else { return };
    let Some(on) = v.as_bool() else {
      self.err_at(id, "expected bool literal");
      return
    };
    let node = self.old.insts[id].node;
    // Find the enclosing block/function/container scope the toggle binds
    // to.
    let mut target = None;
    for (sid, s) in self.comp.scopes.ancestors(self.old.insts[id].scope) {
      if matches!(s.k,
        ScopeKind::Block { .. } | ScopeKind::FnDef { .. } | ScopeKind::Decls { .. }) {
        target = Some(sid);
        break
      }
    }
    let Some(target) = target else {
      self.err_at(id, "@setRuntimeSafety outside scope");
      return
    };
    if self.comp.scopes.get(target).safety.is_some() {
      self.err_at(id, "runtime safety set twice for same scope");
      return
    }
    self.comp.scopes.get_mut(target).safety = Some((on, node));
    self.emit_const(id, Value::void());
  }

  fn analyze_set_eval_branch_quota(&mut self, id: InstId, quota: InstId) {
    if !self.opts.is_comptime || self.old.parent_call_node.is_some() {
      self.err_at(id,
        "@setEvalBranchQuota must be called from the top of the comptime stack");
      return
    }
    let Some(n) = self.require_static(id, quota)
      .and_then(|v| v.as_int().and_then(BigInt::to_u32)) else {
      self.err_at(id, "expected unsigned integer");
      return
    };
    // The quota only ever goes up.
    let q = &mut self.b.exec.backward_branch_quota;
    *q = (*q).max(n);
    self.emit_const(id, Value::void());
  }

  // ---- switch exhaustiveness -----------------------------------------

  fn analyze_check_switch_prongs(
    &mut self, id: InstId, target: InstId, ranges: &[SwitchRange], have_else: bool,
  ) {
    let t = self.operand_val(target);
    if t.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let mut points: Vec<(BigInt, BigInt)> = vec![];
    for r in ranges {
      let Some(lo) = self.require_static(id, r.start) else { return };
      let Some(hi) = self.require_static(id, r.end) else { return };
      let (lo, hi) = match (range_point(&lo), range_point(&hi)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
          self.err_at(id, "switch case value must be comptime known");
          return
        }
      };
      points.push((lo, hi));
    }
    points.sort();
    for (a, b) in points.iter().tuple_windows() {
      if a.1 >= b.0 {
        self.err_at(id, format!("duplicate switch value: {}", b.0));
        return
      }
    }
    match self.comp.types.kind(t.ty).clone() {
      TyKind::Int(info) => {
        if !have_else && !covers_int_range(&points, &info.min(), &info.max()) {
          self.err_at(id, "switch must handle all possibilities");
          return
        }
      }
      TyKind::ComptimeInt => {
        if !have_else {
          self.err_at(id, "switch on comptime_int must have an else prong");
          return
        }
      }
      TyKind::Enum(info) => {
        if !have_else {
          for (name, tag) in &info.fields {
            if !points.iter().any(|(lo, hi)| lo <= tag && tag <= hi) {
              let text = self.comp.syms.name(*name).to_owned();
              self.err_at(id,
                format!("enumeration value '{text}' not handled in switch"));
              return
            }
          }
        }
      }
      TyKind::ErrorSet(set) => {
        if !have_else {
          let errs: Vec<crate::types::ErrId> = match set {
            ErrSet::List(list) => list.to_vec(),
            ErrSet::Global => {
              self.err_at(id, "else prong required when switching on 'anyerror'");
              return
            }
          };
          for e in errs {
            let tag = BigInt::from(e.0);
            if !points.iter().any(|(lo, hi)| *lo <= tag && tag <= *hi) {
              let name = self.comp.syms.name(self.comp.errors.name(e)).to_owned();
              self.err_at(id,
                format!("error 'error.{name}' not handled in switch"));
              return
            }
          }
        }
      }
      TyKind::Bool => {
        if !have_else && !covers_int_range(&points, &BigInt::from(0), &BigInt::from(1)) {
          self.err_at(id, "switch must handle all possibilities");
          return
        }
      }
      _ => {
        if !have_else {
          let name = self.comp.types.name(t.ty, &self.comp.syms);
          self.err_at(id, format!("switch on type '{name}' must have an else prong"));
          return
        }
      }
    }
    self.emit_const(id, Value::void());
  }

  // ---- C import -------------------------------------------------------

  fn push_c_buffer(&mut self, id: InstId, text: &str) {
    let scope = self.old.insts[id].scope;
    let Some(ci) = self.comp.scopes.enclosing_cimport(scope) else {
      self.err_at(id, "C include outside of C import block");
      return
    };
    self.comp.cimport_bufs.entry(ci).or_default().push_str(text);
  }

  fn analyze_c_import(&mut self, id: InstId, cimport_scope: ScopeId) {
    let buffer = self.comp.cimport_bufs.remove(&cimport_scope).unwrap_or_default();
    debug!("translating C import buffer ({} bytes)", buffer.len());
    let Some(mut importer) = self.comp.c_importer.take() else {
      self.err_at(id, "C import unavailable: no C importer configured");
      return
    };
    let result = importer.translate_c(&buffer, &mut self.comp.ast);
    self.comp.c_importer = Some(importer);
    match result {
      Ok(container) => {
        let name = self.comp.syms.intern("(C import)");
        let module = self.comp.add_module(name, self.comp.root_pkg, container);
        let ty = self.comp.types.intern(TyKind::Namespace(module));
        self.emit_const(id, Value { ty, k: ValueKind::Namespace(module) });
      }
      Err(errors) => {
        let node = self.old.insts[id].node;
        let span = self.comp.ast.span(node);
        let h = self.comp.emit_error(span, "C import failed");
        for e in errors {
          self.comp.diags.add_note(h, span, e);
        }
        self.b.exec.invalid = true;
        self.emit_const(id, Value::invalid());
      }
    }
  }

  // ---- coroutines -----------------------------------------------------

  /// The named promise-frame struct for a result type; layout observable
  /// through the type interner.
  pub(crate) fn frame_struct(&mut self, result: Option<TyId>) -> TyId {
    if let Some(&t) = self.frame_structs.get(&result) { return t }
    let usize_ty = self.comp.types.usize();
    let awaiter = self.comp.syms.intern("awaiter");
    let mut fields = vec![crate::types::ty::FieldInfo { name: awaiter, ty: usize_ty }];
    if let Some(r) = result {
      let name = self.comp.syms.intern("result");
      fields.push(crate::types::ty::FieldInfo { name, ty: r });
    }
    if self.comp.config.error_return_tracing {
      let name = self.comp.syms.intern("trace");
      fields.push(crate::types::ty::FieldInfo { name, ty: usize_ty });
    }
    let name = self.comp.syms.intern("(coroutine frame)");
    let t = self.comp.types.declare(TyKind::Struct(crate::types::ty::StructInfo {
      name, fields: fields.into(), module: None,
    }));
    self.frame_structs.insert(result, t);
    t
  }

  fn coro_result_ty(&self) -> Option<TyId> {
    let info = self.fn_ty_info()?;
    info.ret.filter(|&t| t != Types::VOID)
  }

  fn analyze_coro_alloc(&mut self, id: InstId, allocator: InstId) {
    let a = self.use_of(allocator);
    let u8t = self.comp.types.int(crate::types::IntInfo { signed: false, bits: 8 });
    let mem_ptr = self.comp.types.ptr(PtrInfo::many(u8t, false));
    let ty = self.comp.types.optional(mem_ptr);
    self.emit(id, InstKind::CoroAlloc { allocator: a }, Value::runtime(ty));
  }

  fn analyze_coro_begin(&mut self, id: InstId, frame: InstId) {
    let f = self.use_of(frame);
    let result = self.coro_result_ty();
    let ty = self.comp.types.promise(result);
    // Creating the frame struct here pins its layout in the interner.
    let _ = self.frame_struct(result);
    self.emit(id, InstKind::CoroBegin { frame: f }, Value::runtime(ty));
  }

  fn analyze_coro_promise(&mut self, id: InstId) {
    let result = self.coro_result_ty();
    let ty = self.comp.types.promise(result);
    self.emit(id, InstKind::CoroPromise, Value::runtime(ty));
  }
}

/// The integer key of a switch range endpoint: ints and enum/error tags
/// share the integer lattice.
fn range_point(v: &Value) -> Option<BigInt> {
  match &v.k {
    ValueKind::Int(n) | ValueKind::Enum(n) => Some(n.clone()),
    ValueKind::ErrorCode(e) => Some(BigInt::from(e.0)),
    ValueKind::Bool(b) => Some(BigInt::from(u8::from(*b))),
    _ => None,
  }
}

/// Whether sorted, disjoint `points` cover every value in `[min, max]`.
fn covers_int_range(points: &[(BigInt, BigInt)], min: &BigInt, max: &BigInt) -> bool {
  let mut next = min.clone();
  for (lo, hi) in points {
    if *lo > next { return false }
    let after = hi + 1;
    if after > next { next = after }
    if next > *max { return true }
  }
  next > *max
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pts(v: &[(i64, i64)]) -> Vec<(BigInt, BigInt)> {
    v.iter().map(|&(a, b)| (BigInt::from(a), BigInt::from(b))).collect()
  }

  #[test]
  fn range_cover() {
    let min = BigInt::from(0);
    let max = BigInt::from(3);
    assert!(covers_int_range(&pts(&[(0, 3)]), &min, &max));
    assert!(covers_int_range(&pts(&[(0, 1), (2, 3)]), &min, &max));
    assert!(!covers_int_range(&pts(&[(0, 1), (3, 3)]), &min, &max));
    assert!(!covers_int_range(&pts(&[(1, 3)]), &min, &max));
    assert!(!covers_int_range(&[], &min, &max));
  }
}
