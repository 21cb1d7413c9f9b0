//! The instruction representation. Both the unanalyzed IR (emitted by
//! [`build_ir`](crate::build_ir)) and the analyzed IR (emitted by
//! [`analyze`](crate::analyze)) use these types; the difference is that in
//! the analyzed IR every instruction's value has a concrete type and every
//! referenced basic block is scheduled.
//!
//! Instructions and blocks live in per-executable arenas and refer to each
//! other by index, so the cyclic block/instruction structure needs no
//! reference counting beyond the plain `ref_count` bookkeeping fields.

use smallvec::{SmallVec, smallvec};
use super::{IdxVec, NodeId, ScopeId, SlotId, Symbol, VarId, mk_id};
use super::ast::DeferKind;
use super::ty::TyId;
use crate::value::Value;

mk_id! {
  /// An instruction in an executable.
  InstId("%"),
  /// A basic block in an executable.
  BlockId("bb"),
}

impl BlockId {
  /// The entry block of every executable.
  pub const ENTRY: Self = Self(0);
}

/// Binary operations in the IR. These are post-desugaring: short-circuit
/// `and`/`or` never reach the IR (the gen pass lowers them to branches).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
  /// `+`, overflow is a checked error.
  Add,
  /// `+%`, two's complement wrapping.
  AddWrap,
  /// `-`
  Sub,
  /// `-%`
  SubWrap,
  /// `*`
  Mul,
  /// `*%`
  MulWrap,
  /// `/` as written; signed integer division must be disambiguated.
  Div,
  /// `@divTrunc`
  DivTrunc,
  /// `@divFloor`
  DivFloor,
  /// `@divExact`; a nonzero remainder is an error.
  DivExact,
  /// `%` as written; signed remainders must be disambiguated.
  RemUnspec,
  /// `@rem`: remainder with the sign of the numerator.
  Rem,
  /// `@mod`: remainder with the sign of the denominator.
  Mod,
  /// `<<`
  Shl,
  /// `@shlExact`; shifting out set bits is an error.
  ShlExact,
  /// `>>`
  Shr,
  /// `&`
  BitAnd,
  /// `|`
  BitOr,
  /// `^`
  BitXor,
  /// `==`
  CmpEq,
  /// `!=`
  CmpNeq,
  /// `<`
  CmpLt,
  /// `>`
  CmpGt,
  /// `<=`
  CmpLte,
  /// `>=`
  CmpGte,
}

impl BinOp {
  /// Whether this is a comparison operator (result type `bool`).
  #[must_use] pub fn is_cmp(self) -> bool {
    matches!(self, BinOp::CmpEq | BinOp::CmpNeq | BinOp::CmpLt | BinOp::CmpGt |
      BinOp::CmpLte | BinOp::CmpGte)
  }

  /// Whether this is an equality (as opposed to ordering) comparison.
  #[must_use] pub fn is_eq_cmp(self) -> bool {
    matches!(self, BinOp::CmpEq | BinOp::CmpNeq)
  }

  /// Whether this is a bit-shift operator.
  #[must_use] pub fn is_shift(self) -> bool {
    matches!(self, BinOp::Shl | BinOp::ShlExact | BinOp::Shr)
  }

  /// Whether the operation wraps instead of trapping on overflow.
  #[must_use] pub fn is_wrapping(self) -> bool {
    matches!(self, BinOp::AddWrap | BinOp::SubWrap | BinOp::MulWrap)
  }

  /// Whether this is a bitwise logic operator.
  #[must_use] pub fn is_bitwise(self) -> bool {
    matches!(self, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor)
  }
}

/// Unary operations in the IR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
  /// `-`, overflow is a checked error.
  Neg,
  /// `-%`, wrapping negation (allowed on unsigned).
  NegWrap,
  /// `!`
  BoolNot,
  /// `~`
  BitNot,
  /// Prefix `?`: the optional-type constructor (operates on `type` values).
  OptionalType,
}

/// The rewrite chosen by the coercion engine for a runtime cast. Only
/// analysis constructs [`InstKind::Cast`] instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastOp {
  /// Bit-identical reinterpretation (const casts, zero-bit unions, enum to
  /// tagged union with zero-sized payload).
  Noop,
  /// Sign-aware integer widening.
  IntWiden,
  /// Integer narrowing with truncation (safety-checked at runtime).
  IntTrunc,
  /// Float widening.
  FloatWiden,
  /// Float narrowing.
  FloatTrunc,
  /// `[N]T` pointer into `{ptr, len}` slice construction.
  ArrayToSlice,
  /// `T` → `?T`.
  OptionalWrap,
  /// `T` → `E!T` on the payload side.
  ErrUnionWrapPayload,
  /// `E` → `E!T` on the error side.
  ErrUnionWrapCode,
  /// Widening of an error set or error-union error set.
  ErrSetWiden,
  /// Enum ↔ tagged-union tag.
  EnumToUnion,
  /// Tagged union → its tag enum.
  UnionToTag,
  /// Pointer alignment change (checked at runtime when decreasing).
  AlignCast,
  /// `usize`-sized pointer/int conversion.
  PtrToInt,
  /// Materialize a one-item const pointer to the operand (inferred ref).
  InferredRef,
}

/// The modifier on a call instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallModifier {
  /// An ordinary call.
  Normal,
  /// `async<alloc> f(..)`; the operand is the allocator.
  Async(InstId),
  /// `@inlineCall`: force comptime/inline execution.
  Inline,
  /// `@newStackCall`: run on the given stack memory slice.
  NewStack(InstId),
}

/// One scalar case of a `switch_br`.
#[derive(Clone, Copy, Debug)]
pub struct SwitchCase {
  /// The case value (must analyze to a comptime value).
  pub item: InstId,
  /// The prong body block.
  pub bb: BlockId,
}

/// One covered range for the exhaustiveness check, inclusive on both ends.
/// Scalar items are ranges with `start == end`.
#[derive(Clone, Copy, Debug)]
pub struct SwitchRange {
  /// The first covered value.
  pub start: InstId,
  /// The last covered value.
  pub end: InstId,
}

/// An instruction opcode with its operand fields.
#[derive(Clone, Debug)]
pub enum InstKind {
  /// A compile-time constant; the payload is the instruction's value slot.
  Const,
  /// The value of the function's `index`th runtime parameter.
  Param {
    /// The parameter index. For async functions, `param_count` is the
    /// implicit allocator.
    index: u32,
  },
  /// A builtin call whose analysis is a pure fold or cast (`@sizeOf`,
  /// `@intCast`, `@typeOf`, ...). Builtins with dedicated semantics
  /// (atomics, overflow arithmetic, C import) have their own opcodes.
  BuiltinCall {
    /// Which builtin.
    builtin: crate::types::entity::Builtin,
    /// The arguments.
    args: Box<[InstId]>,
  },
  /// `@compileError(msg)`: analyzing this instruction is a comptime-fatal
  /// diagnostic with the given message.
  CompileErr {
    /// The message operand (a comptime `[]const u8`).
    msg: InstId,
  },
  /// `[_]T{..}` array initializer.
  ArrayInit {
    /// The element type (a `type` value).
    elem_ty: InstId,
    /// The declared length, or `None` to infer from the element count.
    len: Option<InstId>,
    /// The element values.
    elems: Box<[InstId]>,
  },
  /// `T{.a = x}` struct initializer.
  StructInit {
    /// The struct type (a `type` value).
    ty: InstId,
    /// `(field name, value)` pairs.
    fields: Box<[(Symbol, InstId)]>,
  },
  /// `[N]T` type constructor.
  MakeArrayType {
    /// The length operand.
    len: InstId,
    /// The element type operand.
    elem: InstId,
  },
  /// `*T` / `[*]T` type constructor.
  MakePtrType {
    /// `[*]T` vs `*T`.
    is_many: bool,
    /// `const` qualifier.
    is_const: bool,
    /// `volatile` qualifier.
    is_volatile: bool,
    /// `align(N)` operand.
    align: Option<InstId>,
    /// The pointee type operand.
    elem: InstId,
  },
  /// `[]T` type constructor.
  MakeSliceType {
    /// `const` qualifier.
    is_const: bool,
    /// `align(N)` operand.
    align: Option<InstId>,
    /// The element type operand.
    elem: InstId,
  },
  /// `E!T` type constructor.
  MakeErrUnionType {
    /// The error-set operand; `None` for the global set.
    set: Option<InstId>,
    /// The payload type operand.
    payload: InstId,
  },
  /// Declare a local variable with an optional type annotation and an
  /// initializer.
  DeclVar {
    /// The declared variable.
    var: VarId,
    /// The annotated type (an instruction producing a `type` value).
    ty: Option<InstId>,
    /// The initializer value.
    init: InstId,
  },
  /// The address of a local variable's storage.
  VarPtr {
    /// The referenced variable.
    var: VarId,
  },
  /// A reference to a top-level declaration, resolved during analysis.
  DeclRef {
    /// The referenced name; looked up through the instruction's scope.
    name: Symbol,
    /// Whether the address of the declaration is wanted (lvalue use).
    ptr: bool,
  },
  /// A binary operation.
  BinOp {
    /// The operator.
    op: BinOp,
    /// Left operand.
    lhs: InstId,
    /// Right operand.
    rhs: InstId,
  },
  /// A unary operation.
  UnOp {
    /// The operator.
    op: UnOp,
    /// The operand.
    operand: InstId,
  },
  /// Load through a pointer.
  LoadPtr {
    /// The loaded-from pointer.
    ptr: InstId,
  },
  /// Store through a pointer.
  StorePtr {
    /// The stored-to pointer.
    ptr: InstId,
    /// The stored value.
    value: InstId,
  },
  /// The address of a field of a container, given the container's address.
  /// Also performs namespace member lookup, enum tag lookup, and the
  /// builtin type-introspection fields.
  FieldPtr {
    /// Pointer to the container (or a `type`/namespace value).
    container: InstId,
    /// The accessed name.
    field: Symbol,
  },
  /// The address of an element of an array, slice, or many-pointer.
  ElemPtr {
    /// Pointer to the indexed value.
    array_ptr: InstId,
    /// The element index.
    index: InstId,
    /// Whether a runtime bounds check may be emitted.
    safety: bool,
  },
  /// Construct a (sub-)slice.
  SliceOp {
    /// Pointer to the sliced value.
    array_ptr: InstId,
    /// Start index.
    start: InstId,
    /// End index; `None` means the operand's length.
    end: Option<InstId>,
    /// Whether a runtime bounds check may be emitted.
    safety: bool,
  },
  /// A function call.
  Call {
    /// The callee (function value, type value, or bound function).
    callee: InstId,
    /// The arguments.
    args: Box<[InstId]>,
    /// The call modifier.
    modifier: CallModifier,
  },
  /// Materialize a const pointer to the operand value.
  Ref {
    /// The referenced value.
    operand: InstId,
  },
  /// Return from the function.
  Return {
    /// The returned value.
    operand: InstId,
  },
  /// Feed a return operand into inferred-return-type resolution before the
  /// actual `return` is analyzed.
  AddImplicitReturnType {
    /// The return operand.
    operand: InstId,
  },
  /// Whether an error union holds an error.
  TestErr {
    /// The error-union operand.
    operand: InstId,
  },
  /// Extract the error code from an error union known to hold one.
  UnwrapErrCode {
    /// Pointer to the error union.
    err_union_ptr: InstId,
  },
  /// Pointer to the payload of an error union; checks for an error.
  UnwrapErrPayload {
    /// Pointer to the error union.
    err_union_ptr: InstId,
    /// Whether a runtime check may be emitted.
    safety: bool,
  },
  /// Whether an optional is non-null.
  TestNonNull {
    /// The optional operand.
    operand: InstId,
  },
  /// Pointer to the payload of an optional; checks for null.
  UnwrapOptional {
    /// Pointer to the optional.
    optional_ptr: InstId,
    /// Whether a runtime check may be emitted.
    safety: bool,
  },
  /// A cast-family instruction inserted by analysis.
  Cast {
    /// The chosen rewrite.
    op: CastOp,
    /// The cast operand.
    operand: InstId,
    /// The destination type.
    dest: TyId,
  },
  /// Unconditional branch.
  Br {
    /// The successor block.
    dest: BlockId,
  },
  /// Conditional branch.
  CondBr {
    /// The branch condition.
    cond: InstId,
    /// Successor when true.
    then_bb: BlockId,
    /// Successor when false.
    else_bb: BlockId,
  },
  /// Multi-way branch on scalar cases.
  SwitchBr {
    /// The switched-on value.
    target: InstId,
    /// The scalar cases.
    cases: Box<[SwitchCase]>,
    /// The fallback block (the `else` prong or the range-chain exit).
    else_bb: BlockId,
  },
  /// Merge point value selection.
  Phi {
    /// `(predecessor, value)` incoming pairs.
    incoming: Box<[(BlockId, InstId)]>,
  },
  /// Control flow cannot reach here.
  Unreachable,
  /// Abort with a message.
  Panic {
    /// The message operand (a `[]const u8`).
    msg: InstId,
  },
  /// Validate that a switch covers its operand type.
  CheckSwitchProngs {
    /// The switched-on value.
    target: InstId,
    /// Every covered range (scalars are single-value ranges).
    ranges: Box<[SwitchRange]>,
    /// Whether the switch has an `else` prong.
    have_else: bool,
  },
  /// Diagnose a non-void expression used as a statement.
  CheckStatementIsVoid {
    /// The statement's value.
    operand: InstId,
  },
  /// Toggle runtime safety checks for the enclosing scope.
  SetRuntimeSafety {
    /// The comptime-known `bool` operand.
    on: InstId,
  },
  /// Raise the comptime backward-branch quota.
  SetEvalBranchQuota {
    /// The comptime-known quota operand.
    quota: InstId,
  },
  /// `@addWithOverflow` and friends: compute and write the wrapped result,
  /// producing the overflow bit.
  OverflowOp {
    /// Which operation.
    op: OverflowOp,
    /// The operand type (a `type` value).
    ty: InstId,
    /// Left operand.
    lhs: InstId,
    /// Right operand.
    rhs: InstId,
    /// Out-pointer receiving the wrapped result.
    result_ptr: InstId,
  },
  /// Atomic compare-exchange.
  Cmpxchg {
    /// The target pointer.
    ptr: InstId,
    /// The expected value.
    expected: InstId,
    /// The replacement value.
    new_value: InstId,
    /// Ordering on success (comptime `AtomicOrder`).
    success_order: InstId,
    /// Ordering on failure (comptime `AtomicOrder`).
    failure_order: InstId,
    /// Whether spurious failure is allowed.
    is_weak: bool,
  },
  /// Atomic fence.
  Fence {
    /// The ordering (comptime `AtomicOrder`).
    order: InstId,
  },
  /// Atomic read-modify-write.
  AtomicRmw {
    /// The target pointer.
    ptr: InstId,
    /// The operation (comptime `AtomicRmwOp`).
    op: InstId,
    /// The operand.
    operand: InstId,
    /// The ordering (comptime `AtomicOrder`).
    order: InstId,
  },
  /// Atomic load.
  AtomicLoad {
    /// The source pointer.
    ptr: InstId,
    /// The ordering (comptime `AtomicOrder`).
    order: InstId,
  },
  /// Finish a `@cImport` block: hand the accumulated buffer to the C
  /// translator.
  CImport {
    /// The `CImport` scope whose buffer was being filled.
    cimport_scope: ScopeId,
  },
  /// `@cInclude(name)`, valid only inside a `@cImport` block.
  CInclude {
    /// The header name.
    name: InstId,
  },
  /// `@cDefine(name, value)`.
  CDefine {
    /// The macro name.
    name: InstId,
    /// The macro value, `None` for a bare define.
    value: Option<InstId>,
  },
  /// `@cUndef(name)`.
  CUndef {
    /// The macro name.
    name: InstId,
  },
  /// Allocate the coroutine frame via the implicit allocator.
  CoroAlloc {
    /// The allocator value.
    allocator: InstId,
  },
  /// Return the allocator's error to the caller before the coroutine has
  /// begun. Terminator.
  CoroAllocFail {
    /// The error value handed back.
    err: InstId,
  },
  /// Begin the coroutine given its frame memory; produces the promise.
  CoroBegin {
    /// The frame memory pointer.
    frame: InstId,
  },
  /// Pointer to the current coroutine's promise frame.
  CoroPromise,
  /// Suspend the coroutine. Produces a `u8`: 0 when resumed, 1 when the
  /// coroutine is being destroyed.
  CoroSuspend {
    /// Whether this is the final suspend (no resume possible).
    is_final: bool,
  },
  /// Resume a suspended coroutine.
  CoroResume {
    /// The target promise.
    target: InstId,
  },
  /// Terminate the coroutine body.
  CoroEnd,
  /// Release the coroutine frame memory.
  CoroFree {
    /// The frame pointer.
    frame: InstId,
  },
}

/// The operation selector for [`InstKind::OverflowOp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowOp {
  /// `@addWithOverflow`
  Add,
  /// `@subWithOverflow`
  Sub,
  /// `@mulWithOverflow`
  Mul,
  /// `@shlWithOverflow`
  Shl,
}

impl InstKind {
  /// The instruction operands, for ref-counting and traversal.
  #[must_use] pub fn operands(&self) -> SmallVec<[InstId; 4]> {
    match *self {
      InstKind::Const | InstKind::Param { .. } | InstKind::VarPtr { .. } |
      InstKind::DeclRef { .. } | InstKind::Br { .. } | InstKind::Unreachable |
      InstKind::CoroPromise | InstKind::CoroSuspend { .. } | InstKind::CoroEnd |
      InstKind::CImport { .. } => smallvec![],
      InstKind::BuiltinCall { ref args, .. } => args.iter().copied().collect(),
      InstKind::CompileErr { msg } => smallvec![msg],
      InstKind::ArrayInit { elem_ty, len, ref elems } =>
        [elem_ty].into_iter().chain(len).chain(elems.iter().copied()).collect(),
      InstKind::StructInit { ty, ref fields } =>
        [ty].into_iter().chain(fields.iter().map(|&(_, v)| v)).collect(),
      InstKind::MakeArrayType { len, elem } => smallvec![len, elem],
      InstKind::MakePtrType { align, elem, .. } =>
        align.into_iter().chain([elem]).collect(),
      InstKind::MakeSliceType { align, elem, .. } =>
        align.into_iter().chain([elem]).collect(),
      InstKind::MakeErrUnionType { set, payload } =>
        set.into_iter().chain([payload]).collect(),
      InstKind::DeclVar { ty, init, .. } =>
        ty.into_iter().chain([init]).collect(),
      InstKind::BinOp { lhs, rhs, .. } => smallvec![lhs, rhs],
      InstKind::UnOp { operand, .. } |
      InstKind::LoadPtr { ptr: operand } |
      InstKind::Ref { operand } |
      InstKind::Return { operand } |
      InstKind::AddImplicitReturnType { operand } |
      InstKind::TestErr { operand } |
      InstKind::UnwrapErrCode { err_union_ptr: operand } |
      InstKind::UnwrapErrPayload { err_union_ptr: operand, .. } |
      InstKind::TestNonNull { operand } |
      InstKind::UnwrapOptional { optional_ptr: operand, .. } |
      InstKind::Cast { operand, .. } |
      InstKind::CondBr { cond: operand, .. } |
      InstKind::Panic { msg: operand } |
      InstKind::CheckStatementIsVoid { operand } |
      InstKind::SetRuntimeSafety { on: operand } |
      InstKind::SetEvalBranchQuota { quota: operand } |
      InstKind::FieldPtr { container: operand, .. } |
      InstKind::Fence { order: operand } |
      InstKind::CInclude { name: operand } |
      InstKind::CUndef { name: operand } |
      InstKind::CoroAlloc { allocator: operand } |
      InstKind::CoroAllocFail { err: operand } |
      InstKind::CoroBegin { frame: operand } |
      InstKind::CoroResume { target: operand } |
      InstKind::CoroFree { frame: operand } => smallvec![operand],
      InstKind::StorePtr { ptr, value } => smallvec![ptr, value],
      InstKind::ElemPtr { array_ptr, index, .. } => smallvec![array_ptr, index],
      InstKind::SliceOp { array_ptr, start, end, .. } =>
        [array_ptr, start].into_iter().chain(end).collect(),
      InstKind::Call { callee, ref args, modifier } => {
        let mut out: SmallVec<[InstId; 4]> = smallvec![callee];
        out.extend(args.iter().copied());
        match modifier {
          CallModifier::Async(a) | CallModifier::NewStack(a) => out.push(a),
          CallModifier::Normal | CallModifier::Inline => {}
        }
        out
      }
      InstKind::SwitchBr { target, ref cases, .. } =>
        [target].into_iter().chain(cases.iter().map(|c| c.item)).collect(),
      InstKind::Phi { ref incoming } => incoming.iter().map(|&(_, v)| v).collect(),
      InstKind::CheckSwitchProngs { target, ref ranges, .. } =>
        [target].into_iter()
          .chain(ranges.iter().flat_map(|r| [r.start, r.end]))
          .collect(),
      InstKind::CDefine { name, value } => [name].into_iter().chain(value).collect(),
      InstKind::OverflowOp { ty, lhs, rhs, result_ptr, .. } =>
        smallvec![ty, lhs, rhs, result_ptr],
      InstKind::Cmpxchg { ptr, expected, new_value, success_order, failure_order, .. } =>
        smallvec![ptr, expected, new_value, success_order, failure_order],
      InstKind::AtomicRmw { ptr, op, operand, order } => smallvec![ptr, op, operand, order],
      InstKind::AtomicLoad { ptr, order } => smallvec![ptr, order],
    }
  }

  /// The basic blocks the instruction references, for ref-counting.
  #[must_use] pub fn blocks(&self) -> SmallVec<[BlockId; 2]> {
    match *self {
      InstKind::Br { dest } => smallvec![dest],
      InstKind::CondBr { then_bb, else_bb, .. } => smallvec![then_bb, else_bb],
      InstKind::SwitchBr { ref cases, else_bb, .. } =>
        cases.iter().map(|c| c.bb).chain([else_bb]).collect(),
      InstKind::Phi { ref incoming } => incoming.iter().map(|&(bb, _)| bb).collect(),
      _ => smallvec![],
    }
  }

  /// Whether the instruction ends a basic block.
  #[must_use] pub fn is_terminator(&self) -> bool {
    matches!(self,
      InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::SwitchBr { .. } |
      InstKind::Return { .. } | InstKind::Unreachable | InstKind::Panic { .. } |
      InstKind::CoroAllocFail { .. } | InstKind::CoroEnd)
  }

  /// Whether the instruction has observable side effects. The complement of
  /// this set is what the comptime executor is allowed to run.
  #[must_use] pub fn has_side_effects(&self) -> bool {
    match self {
      InstKind::Const | InstKind::Param { .. } | InstKind::BinOp { .. } |
      InstKind::UnOp { .. } | InstKind::VarPtr { .. } | InstKind::DeclRef { .. } |
      InstKind::FieldPtr { .. } | InstKind::ElemPtr { .. } | InstKind::SliceOp { .. } |
      InstKind::Ref { .. } | InstKind::TestErr { .. } | InstKind::UnwrapErrCode { .. } |
      InstKind::UnwrapErrPayload { .. } | InstKind::TestNonNull { .. } |
      InstKind::UnwrapOptional { .. } | InstKind::Cast { .. } |
      InstKind::Phi { .. } | InstKind::LoadPtr { .. } |
      InstKind::BuiltinCall { .. } | InstKind::ArrayInit { .. } |
      InstKind::StructInit { .. } | InstKind::MakeArrayType { .. } |
      InstKind::MakePtrType { .. } | InstKind::MakeSliceType { .. } |
      InstKind::MakeErrUnionType { .. } =>
        false,
      // Comptime-var stores are re-admitted by the executor itself; as far
      // as runtime analysis is concerned a store is a side effect.
      _ => true,
    }
  }
}

/// An instruction together with the metadata shared by every opcode.
#[derive(Clone, Debug)]
pub struct Inst {
  /// The source node the instruction was generated from.
  pub node: NodeId,
  /// The scope the instruction was generated in.
  pub scope: ScopeId,
  /// The instruction's value. `ValueKind::Runtime` when not comptime-known;
  /// in the unanalyzed IR the type is not yet meaningful except for
  /// constants.
  pub value: Value,
  /// How many instructions use this one as an operand.
  pub ref_count: u32,
  /// Whether the instruction is synthetic (exempt from unused-value
  /// diagnostics).
  pub is_gen: bool,
  /// Cross-link pairing unanalyzed and analyzed counterparts.
  pub other: Option<InstId>,
  /// The opcode and operands.
  pub k: InstKind,
}

/// A basic block: a straight-line instruction list ending in a terminator.
#[derive(Clone, Debug)]
pub struct BasicBlock {
  /// A debug name hint ("Then", "LoopCond", ...).
  pub name: &'static str,
  /// The instructions in execution order.
  pub insts: Vec<InstId>,
  /// How many instructions reference this block.
  pub ref_count: u32,
}

impl BasicBlock {
  /// A fresh empty block.
  #[must_use] pub fn new(name: &'static str) -> Self {
    Self { name, insts: vec![], ref_count: 0 }
  }
}

/// A local variable. Owned by its declaring scope; the comptime value (if
/// any) lives in the executable's memory-slot array.
#[derive(Clone, Debug)]
pub struct Var {
  /// The declared name.
  pub name: Symbol,
  /// The declaring `VarDecl` scope.
  pub scope: ScopeId,
  /// The declaration site.
  pub decl_node: NodeId,
  /// `const` vs `var`.
  pub is_const: bool,
  /// Declared `comptime`.
  pub is_comptime: bool,
  /// The fixed type, filled in by analysis.
  pub ty: Option<TyId>,
  /// The memory slot holding the comptime value, assigned by analysis.
  pub slot: Option<SlotId>,
}

/// The coroutine wiring of an async function's executable.
#[derive(Clone, Copy, Debug)]
pub struct CoroInfo {
  /// The promise frame pointer instruction from the prelude.
  pub promise: InstId,
  /// The cancellation path: frees the frame without resuming an awaiter.
  pub early_final: BlockId,
  /// The completion path: hands the result to the awaiter.
  pub normal_final: BlockId,
  /// Frame teardown shared by both final paths.
  pub cleanup: BlockId,
  /// The final-suspend block at the end of cleanup.
  pub suspend_bb: BlockId,
}

/// An executable: one function body, comptime block, or initializer worth
/// of IR.
#[derive(Debug, Default)]
pub struct Exec {
  /// The instruction arena.
  pub insts: IdxVec<InstId, Inst>,
  /// The block arena. Creation order; not all created blocks are scheduled.
  pub blocks: IdxVec<BlockId, BasicBlock>,
  /// The scheduled block order. In the analyzed IR every reachable block
  /// appears here exactly once.
  pub order: Vec<BlockId>,
  /// The local variables.
  pub vars: IdxVec<VarId, Var>,
  /// The number of memory slots for comptime-var storage.
  pub slot_count: u32,
  /// The comptime objects backing the memory slots, indexed by slot.
  pub slot_objs: Vec<super::ObjId>,
  /// Backward branches taken at comptime so far.
  pub backward_branch_count: u32,
  /// The comptime branch quota.
  pub backward_branch_quota: u32,
  /// For inlined comptime frames, the call-site node in the parent
  /// executable.
  pub parent_call_node: Option<NodeId>,
  /// The coroutine wiring, for async functions.
  pub coro: Option<CoroInfo>,
  /// Sticky poison bit; set on the first diagnostic against this
  /// executable.
  pub invalid: bool,
}

impl Exec {
  /// A fresh executable with one (entry) block and the given branch quota.
  #[must_use] pub fn new(quota: u32) -> Self {
    let mut exec = Self { backward_branch_quota: quota, ..Self::default() };
    exec.blocks.push(BasicBlock::new("Entry"));
    exec
  }

  /// The final instruction of a block, if the block is nonempty.
  #[must_use] pub fn terminator(&self, bb: BlockId) -> Option<InstId> {
    self.blocks[bb].insts.last().copied()
  }

  /// Whether `bb` ends in a terminator instruction.
  #[must_use] pub fn is_terminated(&self, bb: BlockId) -> bool {
    self.terminator(bb).is_some_and(|i| self.insts[i].k.is_terminator())
  }
}

/// The flavor of a scope-tree node.
#[derive(Clone, Debug)]
pub enum ScopeKind {
  /// A module / container of top-level declarations.
  Decls {
    /// The module.
    module: super::ModuleId,
  },
  /// A function definition.
  FnDef {
    /// The function.
    func: super::FnId,
  },
  /// A block, possibly labeled.
  Block {
    /// The label.
    label: Option<Symbol>,
  },
  /// A variable declaration; children see the variable.
  VarDecl {
    /// The declared variable.
    var: VarId,
  },
  /// A `defer` registration; exits through this scope inline the body.
  Defer {
    /// Unconditional or error-only.
    kind: DeferKind,
    /// The deferred expression, re-generated at each exit.
    body: NodeId,
  },
  /// The inside of a defer body: `return` and `suspend` are forbidden.
  DeferExpr,
  /// A loop body.
  Loop {
    /// The label.
    label: Option<Symbol>,
  },
  /// A `comptime` region: everything inside must be comptime-evaluated.
  Comptime,
  /// A `suspend` block.
  Suspend,
  /// The synthetic scope wrapping an async function's body.
  CoroPrelude,
  /// A `@cImport` block; carries the buffer index used by analysis.
  CImport,
}

/// A node of the scope tree.
#[derive(Clone, Debug)]
pub struct Scope {
  /// The parent scope; `None` only for the root `Decls` scope.
  pub parent: Option<ScopeId>,
  /// The node that introduced the scope.
  pub node: NodeId,
  /// Runtime-safety override set by `@setRuntimeSafety`, with the node
  /// that set it (for duplicate-toggle diagnostics).
  pub safety: Option<(bool, NodeId)>,
  /// The payload.
  pub k: ScopeKind,
}

/// The scope tree for one compilation.
#[derive(Debug, Default)]
pub struct Scopes {
  scopes: IdxVec<ScopeId, Scope>,
}

impl Scopes {
  /// Add a scope under `parent`.
  pub fn push(&mut self, parent: Option<ScopeId>, node: NodeId, k: ScopeKind) -> ScopeId {
    self.scopes.push(Scope { parent, node, safety: None, k })
  }

  /// Look up a scope.
  #[must_use] pub fn get(&self, id: ScopeId) -> &Scope { &self.scopes[id] }

  /// Look up a scope mutably.
  pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope { &mut self.scopes[id] }

  /// Iterate a scope and its ancestors, innermost first.
  pub fn ancestors(&self, id: ScopeId) -> impl Iterator<Item = (ScopeId, &Scope)> {
    std::iter::successors(Some(id), |&s| self.scopes[s].parent).map(|s| (s, &self.scopes[s]))
  }

  /// The function the scope belongs to, if any.
  #[must_use] pub fn fn_scope(&self, id: ScopeId) -> Option<super::FnId> {
    self.ancestors(id).find_map(|(_, s)| match s.k {
      ScopeKind::FnDef { func } => Some(func),
      _ => None,
    })
  }

  /// The innermost enclosing loop scope, not crossing a function boundary.
  #[must_use] pub fn enclosing_loop(&self, id: ScopeId) -> Option<ScopeId> {
    for (sid, s) in self.ancestors(id) {
      match s.k {
        ScopeKind::Loop { .. } => return Some(sid),
        ScopeKind::FnDef { .. } | ScopeKind::Decls { .. } => return None,
        _ => {}
      }
    }
    None
  }

  /// Whether the scope is inside a `defer` body.
  #[must_use] pub fn inside_defer_expr(&self, id: ScopeId) -> bool {
    self.ancestors(id).any(|(_, s)| matches!(s.k, ScopeKind::DeferExpr))
  }

  /// Whether the scope forces comptime evaluation.
  #[must_use] pub fn is_comptime(&self, id: ScopeId) -> bool {
    self.ancestors(id).any(|(_, s)| matches!(s.k, ScopeKind::Comptime))
  }

  /// The innermost enclosing `@cImport` scope, not crossing a function.
  #[must_use] pub fn enclosing_cimport(&self, id: ScopeId) -> Option<ScopeId> {
    for (sid, s) in self.ancestors(id) {
      match s.k {
        ScopeKind::CImport => return Some(sid),
        ScopeKind::FnDef { .. } => return None,
        _ => {}
      }
    }
    None
  }

  /// Whether runtime safety checks are enabled at this scope, given the
  /// compilation default.
  #[must_use] pub fn runtime_safety(&self, id: ScopeId, default: bool) -> bool {
    self.ancestors(id)
      .find_map(|(_, s)| s.safety.map(|(on, _)| on))
      .unwrap_or(default)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn operand_traversal_matches_fields() {
    let k = InstKind::BinOp { op: BinOp::Add, lhs: InstId(3), rhs: InstId(7) };
    assert_eq!(k.operands().into_vec(), vec![InstId(3), InstId(7)]);
    let k = InstKind::StorePtr { ptr: InstId(1), value: InstId(2) };
    assert_eq!(k.operands().into_vec(), vec![InstId(1), InstId(2)]);
    let k = InstKind::Phi {
      incoming: Box::new([(BlockId(0), InstId(5)), (BlockId(1), InstId(6))]),
    };
    assert_eq!(k.operands().into_vec(), vec![InstId(5), InstId(6)]);
    assert_eq!(k.blocks().into_vec(), vec![BlockId(0), BlockId(1)]);
  }

  #[test]
  fn terminators() {
    assert!(InstKind::Br { dest: BlockId(0) }.is_terminator());
    assert!(InstKind::Unreachable.is_terminator());
    assert!(InstKind::Return { operand: InstId(0) }.is_terminator());
    assert!(!InstKind::Const.is_terminator());
    assert!(!InstKind::Phi { incoming: Box::new([]) }.is_terminator());
  }

  #[test]
  fn scope_queries() {
    let mut scopes = Scopes::default();
    let root = scopes.push(None, NodeId(0), ScopeKind::Decls { module: crate::types::ModuleId(0) });
    let f = scopes.push(Some(root), NodeId(1), ScopeKind::FnDef { func: crate::types::FnId(0) });
    let lp = scopes.push(Some(f), NodeId(2), ScopeKind::Loop { label: None });
    let blk = scopes.push(Some(lp), NodeId(3), ScopeKind::Block { label: None });
    assert_eq!(scopes.enclosing_loop(blk), Some(lp));
    assert_eq!(scopes.fn_scope(blk), Some(crate::types::FnId(0)));
    assert_eq!(scopes.enclosing_loop(f), None);
    assert!(!scopes.is_comptime(blk));
    let ct = scopes.push(Some(blk), NodeId(4), ScopeKind::Comptime);
    assert!(scopes.is_comptime(ct));
  }

  #[test]
  fn safety_walks_up() {
    let mut scopes = Scopes::default();
    let root = scopes.push(None, NodeId(0), ScopeKind::Decls { module: crate::types::ModuleId(0) });
    let blk = scopes.push(Some(root), NodeId(1), ScopeKind::Block { label: None });
    let inner = scopes.push(Some(blk), NodeId(2), ScopeKind::Block { label: None });
    assert!(scopes.runtime_safety(inner, true));
    scopes.get_mut(blk).safety = Some((false, NodeId(3)));
    assert!(!scopes.runtime_safety(inner, true));
    assert!(scopes.runtime_safety(root, true));
  }
}
