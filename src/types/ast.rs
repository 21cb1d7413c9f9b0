//! The AST, as handed over by the parser. The core only reads it: nodes are
//! addressed by [`NodeId`] and never mutated after parsing.

use num::{BigInt, BigRational};
use super::{FileSpan, IdxVec, NodeId, Symbol};

/// A capture binding such as `|p|` or `|*p|`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capture {
  /// The bound name.
  pub name: Symbol,
  /// Whether the capture binds a pointer to the payload (`|*p|`).
  pub by_ptr: bool,
}

/// Binary operators as written in source. Assignment compounds reuse these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AstBinOp {
  /// `+`
  Add,
  /// `+%`
  AddWrap,
  /// `-`
  Sub,
  /// `-%`
  SubWrap,
  /// `*`
  Mul,
  /// `*%`
  MulWrap,
  /// `/`
  Div,
  /// `%`
  Rem,
  /// `<<`
  Shl,
  /// `>>`
  Shr,
  /// `&`
  BitAnd,
  /// `|`
  BitOr,
  /// `^`
  BitXor,
  /// `and` (short-circuit)
  BoolAnd,
  /// `or` (short-circuit)
  BoolOr,
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

/// Prefix and postfix unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AstUnOp {
  /// `-`
  Neg,
  /// `-%`
  NegWrap,
  /// `!`
  BoolNot,
  /// `~`
  BitNot,
  /// Postfix `.*`
  Deref,
  /// Prefix `?` (optional type constructor)
  OptionalType,
  /// Prefix `&` (address-of)
  AddrOf,
}

/// The flavor of a `defer` statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferKind {
  /// Runs on every exit path.
  Unconditional,
  /// `errdefer`: runs only on error exit paths.
  ErrOnly,
}

/// The kind of a container declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
  /// `struct { .. }`
  Struct,
  /// `union { .. }` (untagged)
  Union,
  /// `union(enum) { .. }` or `union(Tag) { .. }`
  TaggedUnion,
  /// `enum { .. }`
  Enum,
}

/// A call-site modifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
  /// An ordinary call.
  Normal,
  /// `async<allocator> f(..)`; the payload is the allocator expression.
  Async(NodeId),
}

/// An AST node kind. Statements and expressions share the arena.
#[derive(Clone, Debug)]
pub enum NodeKind {
  /// A function definition.
  FnDef {
    /// The declared name.
    name: Symbol,
    /// The parameter nodes ([`NodeKind::Param`]).
    params: Box<[NodeId]>,
    /// The return type expression; `None` means `!T`-style set inference is
    /// requested via `ret_infer_err` and this is the payload type.
    ret: Option<NodeId>,
    /// Whether the return type was written `!T` (inferred error set).
    ret_infer_err: bool,
    /// Whether this is an `async` function.
    is_async: bool,
    /// Whether calls must be inlined (always comptime-executed or inlined).
    is_inline: bool,
    /// Whether the declaration is visible outside its module.
    is_pub: bool,
    /// The body block, or `None` for an extern prototype.
    body: Option<NodeId>,
  },
  /// A function parameter.
  Param {
    /// The parameter name.
    name: Symbol,
    /// The type expression; `None` for inferred (`var`) parameters.
    ty: Option<NodeId>,
    /// Whether the argument must be comptime-known.
    is_comptime: bool,
  },
  /// A block, possibly labeled.
  Block {
    /// The label, for `break :lbl`.
    label: Option<Symbol>,
    /// The statements in order. The block's value is the value of a
    /// `break` targeting it; an unlabeled block has type `void`.
    stmts: Box<[NodeId]>,
  },
  /// A local (or top-level) variable declaration.
  VarDecl {
    /// The declared name.
    name: Symbol,
    /// `const` vs `var`.
    is_const: bool,
    /// Whether the declaration is visible outside its module.
    is_pub: bool,
    /// Forced comptime (`comptime var x ..`).
    is_comptime: bool,
    /// The type annotation.
    ty: Option<NodeId>,
    /// The initializer.
    init: NodeId,
  },
  /// `return e;` / `return;`
  Return(Option<NodeId>),
  /// `break :label e;`
  Break {
    /// The target label, or `None` for the nearest breakable scope.
    label: Option<Symbol>,
    /// The carried value.
    operand: Option<NodeId>,
  },
  /// `continue :label;`
  Continue {
    /// The target label, or `None` for the nearest loop.
    label: Option<Symbol>,
  },
  /// An if expression, with optional payload captures for optionals and
  /// error unions.
  If {
    /// The condition (or unwrapped operand when `payload` is set).
    cond: NodeId,
    /// The then branch.
    then: NodeId,
    /// The else branch.
    els: Option<NodeId>,
    /// `if (opt) |p|` payload.
    payload: Option<Capture>,
    /// `else |e|` payload (error unions).
    err_payload: Option<Capture>,
  },
  /// A while loop.
  While {
    /// The label, for labeled break/continue.
    label: Option<Symbol>,
    /// The condition.
    cond: NodeId,
    /// The continue expression (`: (i += 1)`).
    cont: Option<NodeId>,
    /// The body.
    body: NodeId,
    /// The else branch.
    els: Option<NodeId>,
    /// `while (opt) |p|` payload.
    payload: Option<Capture>,
    /// `else |e|` payload (error unions).
    err_payload: Option<Capture>,
    /// Whether the loop was written in an `inline while` position.
    is_inline: bool,
  },
  /// A for loop over an array or slice.
  For {
    /// The label.
    label: Option<Symbol>,
    /// The iterated array/slice expression.
    seq: NodeId,
    /// The element capture.
    elem: Option<Capture>,
    /// The index capture name.
    index: Option<Symbol>,
    /// The body.
    body: NodeId,
    /// The else branch, run when the loop completes without break.
    els: Option<NodeId>,
  },
  /// A switch expression.
  Switch {
    /// The switched-on operand.
    target: NodeId,
    /// The prongs ([`NodeKind::SwitchProng`]).
    prongs: Box<[NodeId]>,
  },
  /// One prong of a switch.
  SwitchProng {
    /// The scalar case items. Empty together with `ranges` means `else`.
    items: Box<[NodeId]>,
    /// The range case items, as inclusive `(start, end)` pairs.
    ranges: Box<[(NodeId, NodeId)]>,
    /// The payload capture.
    payload: Option<Capture>,
    /// The prong body.
    body: NodeId,
  },
  /// `defer e;` / `errdefer e;`
  Defer {
    /// Unconditional or error-only.
    kind: DeferKind,
    /// The deferred expression.
    body: NodeId,
  },
  /// `suspend;` / `suspend { .. }`
  Suspend(Option<NodeId>),
  /// `resume h;`
  Resume(NodeId),
  /// `await h;`
  Await(NodeId),
  /// `try e`
  Try(NodeId),
  /// `e catch |err| handler` / `e catch fallback`
  Catch {
    /// The error-union operand.
    operand: NodeId,
    /// The error capture.
    payload: Option<Capture>,
    /// The handler expression.
    handler: NodeId,
  },
  /// `opt orelse fallback`
  OrElse {
    /// The optional operand.
    operand: NodeId,
    /// The fallback expression.
    fallback: NodeId,
  },
  /// A binary operation.
  BinOp {
    /// The operator.
    op: AstBinOp,
    /// Left operand.
    lhs: NodeId,
    /// Right operand.
    rhs: NodeId,
  },
  /// A unary operation.
  UnOp {
    /// The operator.
    op: AstUnOp,
    /// The operand.
    operand: NodeId,
  },
  /// `lhs = rhs` or `lhs op= rhs`.
  Assign {
    /// The compound operator, if any.
    op: Option<AstBinOp>,
    /// The assigned place.
    lhs: NodeId,
    /// The value.
    rhs: NodeId,
  },
  /// A call expression.
  Call {
    /// The callee.
    callee: NodeId,
    /// The arguments.
    args: Box<[NodeId]>,
    /// Normal or `async<..>`.
    kind: CallKind,
  },
  /// A builtin call `@name(..)`.
  BuiltinCall {
    /// The builtin name, without the `@`.
    name: Symbol,
    /// The arguments.
    args: Box<[NodeId]>,
  },
  /// An identifier reference.
  Ident(Symbol),
  /// `lhs.name`
  FieldAccess {
    /// The accessed container or pointer.
    lhs: NodeId,
    /// The field name.
    name: Symbol,
  },
  /// `lhs[index]`
  ArrayAccess {
    /// The indexed value.
    lhs: NodeId,
    /// The index.
    index: NodeId,
  },
  /// `lhs[start..end]` / `lhs[start..]`
  SliceExpr {
    /// The sliced value.
    lhs: NodeId,
    /// The start index.
    start: NodeId,
    /// The end index, or `None` for the length.
    end: Option<NodeId>,
  },
  /// An integer literal.
  IntLit(BigInt),
  /// A float literal, kept exact until coerced.
  FloatLit(BigRational),
  /// `true` / `false`
  BoolLit(bool),
  /// `null`
  NullLit,
  /// `undefined`
  UndefLit,
  /// A string literal.
  StrLit(Box<str>),
  /// `error.Name`
  ErrorValue(Symbol),
  /// `error { A, B }`
  ErrorSetDecl(Box<[Symbol]>),
  /// A container declaration (struct/union/enum literal type).
  ContainerDecl {
    /// struct/union/enum.
    kind: ContainerKind,
    /// The field nodes ([`NodeKind::ContainerField`]).
    fields: Box<[NodeId]>,
    /// Nested declarations (functions, constants).
    decls: Box<[NodeId]>,
  },
  /// A field in a container declaration.
  ContainerField {
    /// The field name.
    name: Symbol,
    /// The type expression (`None` for untyped enum fields).
    ty: Option<NodeId>,
    /// An explicit tag value, for enums.
    value: Option<NodeId>,
  },
  /// `[_]T{..}` / `[N]T{..}` array initializer.
  ArrayInit {
    /// The element type expression.
    elem_ty: NodeId,
    /// Explicit length; `None` infers from the element count.
    len: Option<NodeId>,
    /// The elements.
    elems: Box<[NodeId]>,
  },
  /// `T { .a = x, .. }` struct initializer.
  StructInit {
    /// The struct type expression.
    ty: NodeId,
    /// The field initializers.
    fields: Box<[(Symbol, NodeId)]>,
  },
  /// `[N]T` / `[_]T` array type expression.
  ArrayType {
    /// The length expression; `None` only in init position.
    len: Option<NodeId>,
    /// The element type expression.
    elem: NodeId,
  },
  /// A pointer type expression.
  PtrType {
    /// `[*]T` vs `*T`.
    is_many: bool,
    /// `const` qualifier.
    is_const: bool,
    /// `volatile` qualifier.
    is_volatile: bool,
    /// `align(N)` expression.
    align: Option<NodeId>,
    /// The pointee type expression.
    elem: NodeId,
  },
  /// A slice type expression `[]T`.
  SliceType {
    /// `const` qualifier.
    is_const: bool,
    /// `align(N)` expression.
    align: Option<NodeId>,
    /// The element type expression.
    elem: NodeId,
  },
  /// `E!T` / `!T` error-union type expression.
  ErrorUnionType {
    /// The error-set expression; `None` for the global set (`anyerror`).
    set: Option<NodeId>,
    /// The payload type expression.
    payload: NodeId,
  },
  /// `comptime e`
  Comptime(NodeId),
  /// `unreachable`
  Unreachable,
}

/// A single AST node.
#[derive(Clone, Debug)]
pub struct Node {
  /// The source span.
  pub span: FileSpan,
  /// The node payload.
  pub k: NodeKind,
}

/// The node arena for one compilation. Append-only, read-only to the core.
#[derive(Debug, Default)]
pub struct Ast {
  nodes: IdxVec<NodeId, Node>,
}

impl Ast {
  /// Append a node with an explicit span.
  pub fn add_spanned(&mut self, span: FileSpan, k: NodeKind) -> NodeId {
    self.nodes.push(Node { span, k })
  }

  /// Append a node with a zero span (synthetic / test input).
  pub fn add(&mut self, k: NodeKind) -> NodeId {
    self.add_spanned(FileSpan::default(), k)
  }

  /// Look up a node.
  #[must_use] pub fn node(&self, id: NodeId) -> &Node { &self.nodes[id] }

  /// The kind tag of a node.
  #[must_use] pub fn kind(&self, id: NodeId) -> &NodeKind { &self.nodes[id].k }

  /// The span of a node.
  #[must_use] pub fn span(&self, id: NodeId) -> FileSpan { self.nodes[id].span }
}
