//! Entities: processed top-level declarations, function records, and the
//! builtin-function table. Declaration resolution is an explicit state
//! machine (`Unresolved → Resolving → {Ok, Invalid}`) so that reference
//! cycles are detected by state instead of by blowing the call stack.

use hashbrown::HashMap;
use super::{DeclId, FnId, IdxVec, ModuleId, NodeId, PkgId, ScopeId, Symbol};
use super::ty::TyId;
use crate::value::Value;

/// The resolution state of a top-level declaration.
#[derive(Clone, Debug, Default)]
pub enum DeclState {
  /// Nothing is known beyond the source node.
  #[default]
  Unresolved,
  /// Resolution is in progress somewhere up the call chain; reaching a
  /// declaration in this state is a dependency cycle.
  Resolving,
  /// Resolved to a comptime value.
  Ok(Value),
  /// Resolution failed; a diagnostic has been emitted.
  Invalid,
}

/// A top-level declaration.
#[derive(Clone, Debug)]
pub struct Decl {
  /// The declared name.
  pub name: Symbol,
  /// The declaring node (a `VarDecl` or `FnDef`).
  pub node: NodeId,
  /// The owning module.
  pub module: ModuleId,
  /// Whether the declaration is visible from other modules.
  pub is_pub: bool,
  /// The resolution state.
  pub state: DeclState,
}

/// A module: a container of declarations, either a file or a container
/// declaration body.
#[derive(Debug)]
pub struct Module {
  /// The module name, for diagnostics.
  pub name: Symbol,
  /// The owning package.
  pub pkg: PkgId,
  /// The member declarations by name.
  pub decls: HashMap<Symbol, DeclId>,
  /// The module's `Decls` scope.
  pub scope: Option<ScopeId>,
}

/// The declaration tables for one compilation.
#[derive(Debug, Default)]
pub struct Entities {
  /// All declarations.
  pub decls: IdxVec<DeclId, Decl>,
  /// All modules.
  pub modules: IdxVec<ModuleId, Module>,
  /// All function records.
  pub fns: IdxVec<FnId, FnRecord>,
}

impl Entities {
  /// Create a module.
  pub fn new_module(&mut self, name: Symbol, pkg: PkgId) -> ModuleId {
    self.modules.push(Module { name, pkg, decls: HashMap::new(), scope: None })
  }

  /// Add a declaration to a module. Returns `Err` with the existing id when
  /// the name is already taken (the caller diagnoses the redefinition).
  pub fn add_decl(
    &mut self, module: ModuleId, name: Symbol, node: NodeId, is_pub: bool,
  ) -> Result<DeclId, DeclId> {
    if let Some(&old) = self.modules[module].decls.get(&name) { return Err(old) }
    let id = self.decls.push(Decl {
      name, node, module, is_pub, state: DeclState::Unresolved,
    });
    self.modules[module].decls.insert(name, id);
    Ok(id)
  }

  /// Look up a declaration in a module, without following imports.
  #[must_use] pub fn find_decl(&self, module: ModuleId, name: Symbol) -> Option<DeclId> {
    self.modules[module].decls.get(&name).copied()
  }
}

/// The analysis state of a function body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FnState {
  /// The body has not been lowered yet.
  #[default]
  Queued,
  /// IR generation and analysis are in progress.
  InProgress,
  /// The analyzed IR is complete.
  Done,
  /// Analysis failed; the record's executables are poisoned.
  Invalid,
}

/// A function entity: prototype, body, and its two IRs.
#[derive(Debug)]
pub struct FnRecord {
  /// The function name (instantiations keep the generic's name).
  pub name: Symbol,
  /// The `FnDef` node.
  pub node: NodeId,
  /// The owning module.
  pub module: ModuleId,
  /// The function type, once resolved. Generic functions get a generic
  /// function type; instantiations get a concrete one.
  pub ty: Option<TyId>,
  /// The analysis state.
  pub state: FnState,
  /// For instantiations of a generic function: the values bound to the
  /// comptime parameters, in parameter order.
  pub bound_args: Vec<(Symbol, Value)>,
  /// For instantiations: the types captured for inferred (`var`)
  /// parameters, which stay runtime parameters of the concrete type.
  pub bound_param_types: Vec<(Symbol, TyId)>,
  /// The inferred error set collected from `return` operands, when the
  /// return type was written `!T`.
  pub inferred_errors: Vec<super::ErrId>,
  /// The unanalyzed IR.
  pub uir: Option<super::ir::Exec>,
  /// The analyzed IR.
  pub air: Option<super::ir::Exec>,
}

impl FnRecord {
  /// A fresh record for a declared function.
  #[must_use] pub fn new(name: Symbol, node: NodeId, module: ModuleId) -> Self {
    Self {
      name, node, module,
      ty: None,
      state: FnState::Queued,
      bound_args: vec![],
      bound_param_types: vec![],
      inferred_errors: vec![],
      uir: None,
      air: None,
    }
  }
}

macro_rules! make_builtins {
  {$($(#[$attr0:meta])* enum $name:ident {
    $($(#[$attr:meta])* $x:ident: $e:literal, $ar:expr;)*
  })*} => {$(
    $(#[$attr0])*
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub enum $name { $($(#[$attr])* $x),* }

    impl $name {
      /// Evaluate a function on all elements of the type, with their names.
      pub fn scan(#[allow(unused)] mut f: impl FnMut(Self, &'static str)) {
        $(f($name::$x, $e);)*
      }

      /// Convert a string into this type.
      #[allow(clippy::should_implement_trait)]
      #[must_use] pub fn from_str(s: &str) -> Option<Self> {
        match s {
          $($e => Some(Self::$x),)*
          _ => None,
        }
      }

      /// The source name of this builtin.
      #[must_use] pub fn as_str(self) -> &'static str {
        match self { $($name::$x => $e),* }
      }

      /// The accepted argument count.
      #[must_use] pub fn arity(self) -> Arity {
        match self { $($name::$x => $ar),* }
      }
    }
  )*}
}

/// The accepted argument count of a builtin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
  /// Exactly this many arguments.
  Fixed(u8),
  /// At least this many arguments.
  AtLeast(u8),
}

impl Arity {
  /// Whether `n` arguments satisfy this arity.
  #[must_use] pub fn accepts(self, n: usize) -> bool {
    match self {
      Arity::Fixed(k) => n == usize::from(k),
      Arity::AtLeast(k) => n >= usize::from(k),
    }
  }
}

make_builtins! {
  /// The builtin functions the analyzer dispatches on. There is no runtime
  /// registration: the set is closed.
  enum Builtin {
    /// `@sizeOf(T)`: the ABI size of a type in bytes.
    SizeOf: "sizeOf", Arity::Fixed(1);
    /// `@alignOf(T)`: the ABI alignment of a type in bytes.
    AlignOf: "alignOf", Arity::Fixed(1);
    /// `@typeOf(x)`: the type of an expression.
    TypeOf: "typeOf", Arity::Fixed(1);
    /// `@intCast(T, x)`: checked integer cast.
    IntCast: "intCast", Arity::Fixed(2);
    /// `@floatCast(T, x)`: explicit float narrowing.
    FloatCast: "floatCast", Arity::Fixed(2);
    /// `@truncate(T, x)`: integer truncation, never a safety check.
    Truncate: "truncate", Arity::Fixed(2);
    /// `@divTrunc(a, b)`: signed division rounding toward zero.
    DivTrunc: "divTrunc", Arity::Fixed(2);
    /// `@divFloor(a, b)`: signed division rounding toward negative
    /// infinity.
    DivFloor: "divFloor", Arity::Fixed(2);
    /// `@divExact(a, b)`: division asserting a zero remainder.
    DivExact: "divExact", Arity::Fixed(2);
    /// `@rem(a, b)`: remainder with the sign of the numerator.
    Rem: "rem", Arity::Fixed(2);
    /// `@mod(a, b)`: remainder with the sign of the denominator.
    Mod: "mod", Arity::Fixed(2);
    /// `@shlExact(a, b)`: left shift asserting no bits are lost.
    ShlExact: "shlExact", Arity::Fixed(2);
    /// `@alignCast(N, ptr)`: increase a pointer's alignment, checked.
    AlignCast: "alignCast", Arity::Fixed(2);
    /// `@ptrToInt(ptr)`: the address as a `usize`.
    PtrToInt: "ptrToInt", Arity::Fixed(1);
    /// `@intToPtr(T, addr)`: a hard-coded address as a pointer.
    IntToPtr: "intToPtr", Arity::Fixed(2);
    /// `@setEvalBranchQuota(n)`: raise the comptime branch quota.
    SetEvalBranchQuota: "setEvalBranchQuota", Arity::Fixed(1);
    /// `@setRuntimeSafety(on)`: toggle safety checks for this scope.
    SetRuntimeSafety: "setRuntimeSafety", Arity::Fixed(1);
    /// `@compileError(msg)`: fail compilation with the given message.
    CompileError: "compileError", Arity::Fixed(1);
    /// `@panic(msg)`: abort at runtime.
    Panic: "panic", Arity::Fixed(1);
    /// `@inlineCall(f, args..)`: call with forced inline/comptime
    /// execution.
    InlineCall: "inlineCall", Arity::AtLeast(1);
    /// `@newStackCall(stack, f, args..)`: call on the given stack.
    NewStackCall: "newStackCall", Arity::AtLeast(2);
    /// `@cImport(block)`: run the block and translate the accumulated C
    /// buffer.
    CImport: "cImport", Arity::Fixed(1);
    /// `@cInclude(name)`: append `#include` to the enclosing `@cImport`.
    CInclude: "cInclude", Arity::Fixed(1);
    /// `@cDefine(name, value)`: append `#define`.
    CDefine: "cDefine", Arity::Fixed(2);
    /// `@cUndef(name)`: append `#undef`.
    CUndef: "cUndef", Arity::Fixed(1);
    /// `@import(name)`: resolve a package or relative file.
    Import: "import", Arity::Fixed(1);
    /// `@addWithOverflow(T, a, b, out)`.
    AddWithOverflow: "addWithOverflow", Arity::Fixed(4);
    /// `@subWithOverflow(T, a, b, out)`.
    SubWithOverflow: "subWithOverflow", Arity::Fixed(4);
    /// `@mulWithOverflow(T, a, b, out)`.
    MulWithOverflow: "mulWithOverflow", Arity::Fixed(4);
    /// `@shlWithOverflow(T, a, b, out)`.
    ShlWithOverflow: "shlWithOverflow", Arity::Fixed(4);
    /// `@cmpxchgStrong(T, ptr, expected, new, success, failure)`.
    CmpxchgStrong: "cmpxchgStrong", Arity::Fixed(6);
    /// `@cmpxchgWeak(T, ptr, expected, new, success, failure)`.
    CmpxchgWeak: "cmpxchgWeak", Arity::Fixed(6);
    /// `@fence(order)`.
    Fence: "fence", Arity::Fixed(1);
    /// `@atomicRmw(T, ptr, op, operand, order)`.
    AtomicRmw: "atomicRmw", Arity::Fixed(5);
    /// `@atomicLoad(T, ptr, order)`.
    AtomicLoad: "atomicLoad", Arity::Fixed(3);
  }
}

/// The builtin name table: symbol → builtin id, built once per compilation.
#[derive(Debug, Default)]
pub struct Builtins {
  map: HashMap<Symbol, Builtin>,
}

impl Builtins {
  /// Intern every builtin name into `syms` and build the table.
  #[must_use] pub fn new(syms: &mut super::Symbols) -> Self {
    let mut map = HashMap::new();
    Builtin::scan(|b, name| { map.insert(syms.intern(name), b); });
    Self { map }
  }

  /// Look up a builtin by interned name.
  #[must_use] pub fn get(&self, name: Symbol) -> Option<Builtin> {
    self.map.get(&name).copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Symbols;

  #[test]
  fn builtin_lookup_round_trips() {
    let mut syms = Symbols::default();
    let builtins = Builtins::new(&mut syms);
    let size_of = syms.intern("sizeOf");
    assert_eq!(builtins.get(size_of), Some(Builtin::SizeOf));
    let nope = syms.intern("frobnicate");
    assert_eq!(builtins.get(nope), None);
    assert_eq!(Builtin::from_str("atomicRmw"), Some(Builtin::AtomicRmw));
    assert_eq!(Builtin::AtomicRmw.as_str(), "atomicRmw");
  }

  #[test]
  fn arity_check() {
    assert!(Builtin::IntCast.arity().accepts(2));
    assert!(!Builtin::IntCast.arity().accepts(1));
    assert!(Builtin::InlineCall.arity().accepts(3));
    assert!(!Builtin::InlineCall.arity().accepts(0));
  }

  #[test]
  fn decl_redefinition_is_reported_to_caller() {
    let mut syms = Symbols::default();
    let mut ents = Entities::default();
    let name = syms.intern("main");
    let m = ents.new_module(syms.intern("root"), crate::types::PkgId(0));
    let first = ents.add_decl(m, name, crate::types::NodeId(0), false).unwrap();
    let again = ents.add_decl(m, name, crate::types::NodeId(1), false);
    assert_eq!(again, Err(first));
    assert_eq!(ents.find_decl(m, name), Some(first));
  }
}
