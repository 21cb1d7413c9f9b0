//! The IR builder: appends instructions to an executable under
//! construction, maintaining operand and block reference counts and the
//! current-block cursor. Both the gen pass and the analyzer build their
//! output through this type.

use crate::types::{NodeId, ScopeId};
use crate::types::ir::{BasicBlock, BlockId, Exec, Inst, InstId, InstKind};
use crate::value::Value;

/// An executable under construction.
#[derive(Debug)]
pub struct IrBuilder {
  /// The executable being built.
  pub exec: Exec,
  /// The block new instructions are appended to.
  pub cur_bb: BlockId,
}

impl IrBuilder {
  /// Start building with a fresh executable. The entry block is created and
  /// scheduled.
  #[must_use] pub fn new(branch_quota: u32) -> Self {
    let mut exec = Exec::new(branch_quota);
    exec.order.push(BlockId::ENTRY);
    Self { exec, cur_bb: BlockId::ENTRY }
  }

  /// Create a new basic block. It is not scheduled until
  /// [`Self::append_block`] places it.
  pub fn new_block(&mut self, name: &'static str) -> BlockId {
    self.exec.blocks.push(BasicBlock::new(name))
  }

  /// Schedule `bb` into the executable's block order and move the cursor to
  /// it. Every block must be scheduled at most once.
  pub fn append_block(&mut self, bb: BlockId) {
    debug_assert!(!self.exec.order.contains(&bb), "block scheduled twice");
    self.exec.order.push(bb);
    self.cur_bb = bb;
  }

  /// Move the cursor to an already-scheduled block (analysis repositions
  /// freely, e.g. to patch predecessors).
  pub fn set_cursor(&mut self, bb: BlockId) { self.cur_bb = bb }

  /// Append an instruction to the current block, ref-counting its operands
  /// and referenced blocks.
  pub fn append(
    &mut self, scope: ScopeId, node: NodeId, k: InstKind, value: Value,
  ) -> InstId {
    self.append_inst(Inst {
      node, scope, value, ref_count: 0, is_gen: false, other: None, k,
    })
  }

  /// Append a synthetic (`is_gen`) instruction, exempt from unused-value
  /// diagnostics.
  pub fn append_gen(
    &mut self, scope: ScopeId, node: NodeId, k: InstKind, value: Value,
  ) -> InstId {
    self.append_inst(Inst {
      node, scope, value, ref_count: 0, is_gen: true, other: None, k,
    })
  }

  /// Append a pre-built instruction (see [`Self::create_const`]).
  pub fn append_inst(&mut self, inst: Inst) -> InstId {
    self.retain(&inst.k);
    let id = self.exec.insts.push(inst);
    self.exec.blocks[self.cur_bb].insts.push(id);
    id
  }

  /// Build a constant instruction without appending it anywhere; the caller
  /// stages it into a specific point with [`Self::insert_before_terminator`]
  /// or [`Self::append_inst`].
  #[must_use] pub fn create_const(scope: ScopeId, node: NodeId, value: Value) -> Inst {
    Inst {
      node, scope, value, ref_count: 0, is_gen: true, other: None,
      k: InstKind::Const,
    }
  }

  /// Insert an instruction immediately before the terminator of `bb`. Used
  /// for coercions of phi operands, which must run in the predecessor.
  pub fn insert_before_terminator(&mut self, bb: BlockId, inst: Inst) -> InstId {
    self.retain(&inst.k);
    let id = self.exec.insts.push(inst);
    let insts = &mut self.exec.blocks[bb].insts;
    let at = insts.len().checked_sub(1).expect("empty predecessor block");
    insts.insert(at, id);
    id
  }

  fn retain(&mut self, k: &InstKind) {
    for op in k.operands() {
      self.exec.insts[op].ref_count += 1;
    }
    for bb in k.blocks() {
      self.exec.blocks[bb].ref_count += 1;
    }
  }

  /// Append a constant.
  pub fn const_val(&mut self, scope: ScopeId, node: NodeId, v: Value) -> InstId {
    self.append(scope, node, InstKind::Const, v)
  }

  /// Append a synthetic constant.
  pub fn const_gen(&mut self, scope: ScopeId, node: NodeId, v: Value) -> InstId {
    self.append_gen(scope, node, InstKind::Const, v)
  }

  /// Append an unconditional branch.
  pub fn br(&mut self, scope: ScopeId, node: NodeId, dest: BlockId) -> InstId {
    self.append_gen(scope, node, InstKind::Br { dest }, Value::no_return())
  }

  /// Append a conditional branch.
  pub fn cond_br(
    &mut self, scope: ScopeId, node: NodeId,
    cond: InstId, then_bb: BlockId, else_bb: BlockId,
  ) -> InstId {
    self.append_gen(scope, node,
      InstKind::CondBr { cond, then_bb, else_bb }, Value::no_return())
  }

  /// Append an `unreachable`.
  pub fn unreachable(&mut self, scope: ScopeId, node: NodeId) -> InstId {
    self.append(scope, node, InstKind::Unreachable, Value::no_return())
  }

  /// Whether the current block already ends in a terminator.
  #[must_use] pub fn terminated(&self) -> bool {
    self.exec.is_terminated(self.cur_bb)
  }

  /// Finish building, returning the executable.
  #[must_use] pub fn finish(self) -> Exec { self.exec }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ir::BinOp;
  use num::BigInt;

  fn dummy() -> (ScopeId, NodeId) { (ScopeId(0), NodeId(0)) }

  #[test]
  fn append_ref_counts_operands() {
    let (s, n) = dummy();
    let mut b = IrBuilder::new(1000);
    let one = b.const_val(s, n, Value::comptime_int(BigInt::from(1)));
    let two = b.const_val(s, n, Value::comptime_int(BigInt::from(2)));
    let _sum = b.append(s, n,
      InstKind::BinOp { op: BinOp::Add, lhs: one, rhs: two },
      Value::runtime(crate::types::ty::Types::INVALID));
    assert_eq!(b.exec.insts[one].ref_count, 1);
    assert_eq!(b.exec.insts[two].ref_count, 1);
    assert_eq!(b.exec.blocks[b.cur_bb].insts.len(), 3);
  }

  #[test]
  fn branches_ref_count_blocks() {
    let (s, n) = dummy();
    let mut b = IrBuilder::new(1000);
    let tgt = b.new_block("Then");
    b.br(s, n, tgt);
    assert_eq!(b.exec.blocks[tgt].ref_count, 1);
    assert!(b.terminated());
  }

  #[test]
  fn insert_before_terminator_lands_before_branch() {
    let (s, n) = dummy();
    let mut b = IrBuilder::new(1000);
    let tgt = b.new_block("Join");
    b.br(s, n, tgt);
    let c = IrBuilder::create_const(s, n, Value::comptime_int(BigInt::from(9)));
    let cid = b.insert_before_terminator(BlockId::ENTRY, c);
    let insts = &b.exec.blocks[BlockId::ENTRY].insts;
    assert_eq!(insts[insts.len() - 2], cid);
    assert!(b.exec.insts[*insts.last().unwrap()].k.is_terminator());
  }

  #[test]
  fn blocks_schedule_once() {
    let (s, n) = dummy();
    let mut b = IrBuilder::new(1000);
    let bb = b.new_block("Body");
    b.br(s, n, bb);
    b.append_block(bb);
    assert_eq!(b.exec.order, vec![BlockId::ENTRY, bb]);
  }
}
