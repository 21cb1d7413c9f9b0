//! The semantic-analysis and compile-time-evaluation core of the Cinder
//! compiler. The input is an AST (plus the unanalyzed IR generated from it
//! by [`build_ir`]); the output is an analyzed IR in which every instruction
//! has a concrete type, every reachable constant is folded, and everything
//! that had to run at compile time has run.
//!
//! Everything outside IR generation ([`build_ir`]), IR analysis
//! ([`analyze`], with [`coerce`] and [`peer`] as its type-decision engines,
//! [`eval`] as its interpreter) and the value model ([`value`]) is a
//! collaborator reached through the narrow hooks on [`Compiler`]: the
//! parser hands over an [`types::ast::Ast`], the C importer and package
//! graph are trait objects, and LLVM lowering consumes the finished
//! executables.

pub mod analyze;
pub mod build_ir;
pub mod builder;
pub mod coerce;
pub mod diag;
pub mod eval;
pub mod peer;
pub mod types;
pub mod value;

use hashbrown::HashMap;
use log::debug;

use types::{DeclId, FileSpan, FnId, ModuleId, NodeId, PkgId, ScopeId, Symbol, Symbols};
use types::ast::{Ast, NodeKind};
use types::entity::{Builtins, DeclState, Entities, FnRecord, FnState};
use types::ir::{Scopes, ScopeKind};
use types::ty::{EnumInfo, ErrorTable, TyId, TyKind, Types};
use value::{CanonValue, Mem, Value};
use diag::{DiagSink, MsgHandle};

pub use types::entity::Builtin;

/// Compilation-wide knobs. Everything has a sensible default; there is no
/// config file and no CLI in this core.
#[derive(Clone, Debug)]
pub struct Config {
  /// Target pointer width in bits.
  pub ptr_bits: u16,
  /// The initial comptime backward-branch quota.
  pub branch_quota: u32,
  /// Whether runtime safety checks default to on.
  pub runtime_safety: bool,
  /// Whether error-return tracing metadata is attached to calls.
  pub error_return_tracing: bool,
  /// How many "called from here" notes a diagnostic may carry.
  pub max_call_notes: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      ptr_bits: 64,
      branch_quota: 1000,
      runtime_safety: true,
      error_return_tracing: false,
      max_call_notes: 10,
    }
  }
}

/// The C importer hook. Invoked when a `@cImport` block's buffer is
/// complete; the translator parses the C header text and appends an AST
/// container holding the translated declarations.
pub trait CImporter {
  /// Translate the accumulated buffer. On success, return a
  /// `ContainerDecl` node appended to `ast`; on failure, return the C
  /// compiler's errors (forwarded as notes).
  fn translate_c(&mut self, buffer: &str, ast: &mut Ast) -> Result<NodeId, Vec<String>>;
}

/// The package-graph hook for `@import`.
pub trait PackageResolver {
  /// Resolve a package name visible from `from`.
  fn resolve_import(&mut self, from: PkgId, name: &str) -> Option<PkgId>;
  /// Fall back to relative-file resolution.
  fn resolve_file(&mut self, from: PkgId, path: &str) -> Option<PkgId>;
}

/// The memoization key of a generic-function instantiation: the generic
/// function plus the canonical form of every bound argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GenericKey {
  /// The generic function being instantiated.
  pub func: FnId,
  /// Canonical forms of the bound arguments, in parameter order. Type-bound
  /// parameters contribute the argument value; value-bound parameters
  /// contribute their type.
  pub bindings: Vec<CanonValue>,
}

/// The context object threaded through every analysis function. Owns the
/// type interner, the error table, the comptime object arena, the scope
/// tree, and the diagnostic sink; none of these is a module-level global.
pub struct Compiler {
  /// Compilation knobs.
  pub config: Config,
  /// The string interner.
  pub syms: Symbols,
  /// The type interner.
  pub types: Types,
  /// The process-global error-entry table.
  pub errors: ErrorTable,
  /// The comptime object arena.
  pub mem: Mem,
  /// The diagnostic sink.
  pub diags: DiagSink,
  /// The AST, owned by the parser side but carried here for access.
  pub ast: Ast,
  /// Declarations, modules, and function records.
  pub ents: Entities,
  /// The scope tree.
  pub scopes: Scopes,
  /// The builtin-function table.
  pub builtins: Builtins,
  /// Memoized generic instantiations.
  pub generic_insts: HashMap<GenericKey, FnId>,
  /// The in-progress reference chain, for "called from here" notes and
  /// cycle reporting.
  pub tld_stack: Vec<NodeId>,
  /// Buffers accumulated by `@cInclude`/`@cDefine`/`@cUndef` per
  /// `@cImport` scope.
  pub cimport_bufs: HashMap<ScopeId, String>,
  /// The builtin `AtomicOrder` enum type.
  pub atomic_order_ty: TyId,
  /// The builtin `AtomicRmwOp` enum type.
  pub atomic_rmw_op_ty: TyId,
  /// The C importer, if the embedder provides one.
  pub c_importer: Option<Box<dyn CImporter>>,
  /// The package graph, if the embedder provides one.
  pub packages: Option<Box<dyn PackageResolver>>,
  /// Modules already created for imported packages.
  pub pkg_modules: HashMap<PkgId, ModuleId>,
  /// The root package.
  pub root_pkg: PkgId,
}

impl Compiler {
  /// Create a compiler with the given configuration.
  #[must_use] pub fn new(config: Config) -> Self {
    let mut syms = Symbols::default();
    let mut types = Types::new(config.ptr_bits);
    let builtins = Builtins::new(&mut syms);
    let atomic_order_ty = Self::declare_builtin_enum(&mut syms, &mut types,
      "AtomicOrder", &["Unordered", "Monotonic", "Acquire", "Release", "AcqRel", "SeqCst"]);
    let atomic_rmw_op_ty = Self::declare_builtin_enum(&mut syms, &mut types,
      "AtomicRmwOp", &["Xchg", "Add", "Sub", "And", "Or", "Xor", "Max", "Min"]);
    Self {
      config,
      syms,
      types,
      errors: ErrorTable::default(),
      mem: Mem::default(),
      diags: DiagSink::default(),
      ast: Ast::default(),
      ents: Entities::default(),
      scopes: Scopes::default(),
      builtins,
      generic_insts: HashMap::new(),
      tld_stack: vec![],
      cimport_bufs: HashMap::new(),
      atomic_order_ty,
      atomic_rmw_op_ty,
      c_importer: None,
      packages: None,
      pkg_modules: HashMap::new(),
      root_pkg: PkgId(0),
    }
  }

  fn declare_builtin_enum(
    syms: &mut Symbols, types: &mut Types, name: &str, fields: &[&str],
  ) -> TyId {
    let tag_bits = (u32::try_from(fields.len()).expect("overflow"))
      .next_power_of_two().trailing_zeros().max(1);
    let tag_int = types.int(types::IntInfo {
      signed: false,
      bits: tag_bits.try_into().expect("overflow"),
    });
    let name = syms.intern(name);
    let fields = fields.iter().enumerate()
      .map(|(i, f)| (syms.intern(f), num::BigInt::from(i)))
      .collect();
    types.declare(TyKind::Enum(EnumInfo { name, tag_int, fields }))
  }

  /// Look up a primitive type by name (`i32`, `bool`, `f64`, ...).
  pub fn find_primitive_type(&mut self, name: &str) -> Option<TyId> {
    Some(match name {
      "bool" => Types::BOOL,
      "void" => Types::VOID,
      "noreturn" => Types::NORETURN,
      "type" => Types::TYPE,
      "comptime_int" => Types::COMPTIME_INT,
      "comptime_float" => Types::COMPTIME_FLOAT,
      "anyerror" => Types::GLOBAL_ERROR_SET,
      "f16" => self.types.float(16),
      "f32" => self.types.float(32),
      "f64" => self.types.float(64),
      "f128" => self.types.float(128),
      "usize" => self.types.usize(),
      "isize" => self.types.isize(),
      "AtomicOrder" => self.atomic_order_ty,
      "AtomicRmwOp" => self.atomic_rmw_op_ty,
      _ => {
        if name.is_empty() { return None }
        let (sign, digits) = name.split_at(1);
        let signed = match sign {
          "i" => true,
          "u" => false,
          _ => return None,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) { return None }
        let bits: u16 = digits.parse().ok().filter(|&b| b > 0)?;
        self.types.int(types::IntInfo { signed, bits })
      }
    })
  }

  /// Report an error at `span`, appending "referenced here" notes for the
  /// in-progress declaration chain.
  pub fn emit_error(&mut self, span: FileSpan, msg: impl Into<String>) -> MsgHandle {
    let h = self.diags.emit_error(span, msg);
    let notes: Vec<FileSpan> = self.tld_stack.iter().rev()
      .take(self.config.max_call_notes)
      .map(|&n| self.ast.span(n))
      .collect();
    for sp in notes {
      self.diags.add_note(h, sp, "called from here");
    }
    h
  }

  /// Build a module from a `ContainerDecl` node: scan its member
  /// declarations into the declaration table. Bodies are not analyzed yet.
  pub fn add_module(&mut self, name: Symbol, pkg: PkgId, container: NodeId) -> ModuleId {
    let module = self.ents.new_module(name, pkg);
    let scope = self.scopes.push(None, container, ScopeKind::Decls { module });
    self.ents.modules[module].scope = Some(scope);
    let decls: Vec<NodeId> = match self.ast.kind(container) {
      NodeKind::ContainerDecl { decls, .. } => decls.to_vec(),
      _ => panic!("add_module expects a container declaration"),
    };
    for decl_node in decls {
      let (name, is_pub) = match self.ast.kind(decl_node) {
        &NodeKind::VarDecl { name, is_pub, .. } => (name, is_pub),
        &NodeKind::FnDef { name, is_pub, .. } => (name, is_pub),
        k => panic!("unexpected top-level node {k:?}"),
      };
      if let Err(prev) = self.ents.add_decl(module, name, decl_node, is_pub) {
        let span = self.ast.span(decl_node);
        let prev_span = self.ast.span(self.ents.decls[prev].node);
        let h = self.emit_error(span,
          format!("redefinition of '{}'", self.syms.name(name)));
        self.diags.add_note(h, prev_span, "previous definition is here");
      }
    }
    module
  }

  /// Resolve a top-level declaration to its comptime value, driving IR
  /// generation and analysis of its initializer on first demand. Reference
  /// cycles are detected by the `Resolving` state.
  pub fn resolve_decl(&mut self, decl: DeclId) -> Value {
    match &self.ents.decls[decl].state {
      DeclState::Ok(v) => return v.clone(),
      DeclState::Invalid => return Value::invalid(),
      DeclState::Resolving => {
        let node = self.ents.decls[decl].node;
        let name = self.ents.decls[decl].name;
        let span = self.ast.span(node);
        self.emit_error(span,
          format!("'{}' depends on itself", self.syms.name(name)));
        self.ents.decls[decl].state = DeclState::Invalid;
        return Value::invalid()
      }
      DeclState::Unresolved => {}
    }
    self.ents.decls[decl].state = DeclState::Resolving;
    let node = self.ents.decls[decl].node;
    let module = self.ents.decls[decl].module;
    self.tld_stack.push(node);
    let value = match self.ast.kind(node).clone() {
      NodeKind::VarDecl { ty, init, .. } => {
        let expected = ty.and_then(|t| self.resolve_type_expr(module, t));
        self.comptime_expr(module, init, expected)
      }
      NodeKind::FnDef { name, .. } => {
        let func = self.ents.fns.push(FnRecord::new(name, node, module));
        match build_ir::resolve_fn_proto(self, func) {
          Some(ty) => {
            self.ents.fns[func].ty = Some(ty);
            Some(Value { ty, k: value::ValueKind::Func(func) })
          }
          None => None,
        }
      }
      k => panic!("unexpected declaration node {k:?}"),
    };
    self.tld_stack.pop();
    match value {
      Some(v) => {
        self.ents.decls[decl].state = DeclState::Ok(v.clone());
        v
      }
      None => {
        self.ents.decls[decl].state = DeclState::Invalid;
        Value::invalid()
      }
    }
  }

  /// Evaluate an expression at comptime: generate a one-expression
  /// executable, analyze it, and extract the folded return value. `None`
  /// means a diagnostic was emitted.
  pub fn comptime_expr(
    &mut self, module: ModuleId, node: NodeId, expected: Option<TyId>,
  ) -> Option<Value> {
    let uir = build_ir::gen_const_expr(self, module, node)?;
    let air = analyze::analyze_exec(self, &uir, analyze::AnalyzeOpts {
      expected_ret: expected,
      is_comptime: true,
      func: None,
    });
    if air.invalid { return None }
    match analyze::comptime_return_value(&air) {
      Some(v) => Some(v),
      None => {
        let span = self.ast.span(node);
        self.emit_error(span, "unable to evaluate constant expression");
        None
      }
    }
  }

  /// Resolve a type expression to a type. `None` means a diagnostic was
  /// emitted.
  pub fn resolve_type_expr(&mut self, module: ModuleId, node: NodeId) -> Option<TyId> {
    let v = self.comptime_expr(module, node, Some(Types::TYPE))?;
    match v.as_ty() {
      Some(t) => Some(t),
      None => {
        let span = self.ast.span(node);
        self.emit_error(span, "expected type expression");
        None
      }
    }
  }

  /// Make sure a function's body has been generated and analyzed.
  pub fn ensure_fn_analyzed(&mut self, func: FnId) {
    match self.ents.fns[func].state {
      FnState::Queued => {}
      FnState::InProgress | FnState::Done | FnState::Invalid => return,
    }
    self.ents.fns[func].state = FnState::InProgress;
    let name = self.ents.fns[func].name;
    debug!("analyzing fn '{}'", self.syms.name(name));
    if self.ents.fns[func].ty.is_none() {
      match build_ir::resolve_fn_proto(self, func) {
        Some(t) => self.ents.fns[func].ty = Some(t),
        None => {
          self.ents.fns[func].state = FnState::Invalid;
          return
        }
      }
    }
    // Generic templates are only analyzed through their instantiations.
    let fn_ty = self.ents.fns[func].ty.expect("just resolved");
    if matches!(self.types.kind(fn_ty), TyKind::Fn(info) if info.is_generic) {
      self.ents.fns[func].state = FnState::Done;
      return
    }
    let Some(uir) = build_ir::gen_fn(self, func) else {
      // Extern prototypes have no body to analyze.
      self.ents.fns[func].state = FnState::Done;
      return
    };
    let expected_ret = self.fn_return_type(func);
    let air = analyze::analyze_exec(self, &uir, analyze::AnalyzeOpts {
      expected_ret,
      is_comptime: false,
      func: Some(func),
    });
    let invalid = air.invalid;
    let rec = &mut self.ents.fns[func];
    rec.uir = Some(uir);
    rec.air = Some(air);
    rec.state = if invalid { FnState::Invalid } else { FnState::Done };
  }

  /// The declared return type of a function, if its prototype resolved.
  #[must_use] pub fn fn_return_type(&self, func: FnId) -> Option<TyId> {
    let ty = self.ents.fns[func].ty?;
    match self.types.kind(ty) {
      TyKind::Fn(info) => info.ret,
      _ => None,
    }
  }

  /// Resolve `@import(name)`: a sibling package, or a relative file, or an
  /// "unable to find" diagnostic.
  pub fn resolve_import(&mut self, from_node: NodeId, name: &str) -> Option<ModuleId> {
    let from = self.root_pkg;
    let pkg = if let Some(mut p) = self.packages.take() {
      let r = p.resolve_import(from, name).or_else(|| p.resolve_file(from, name));
      self.packages = Some(p);
      r
    } else {
      None
    };
    match pkg {
      Some(pkg) => {
        if let Some(&module) = self.pkg_modules.get(&pkg) { return Some(module) }
        let sym = self.syms.intern(name);
        let module = self.ents.new_module(sym, pkg);
        self.pkg_modules.insert(pkg, module);
        Some(module)
      }
      None => {
        let span = self.ast.span(from_node);
        self.emit_error(span, format!("unable to find '{name}'"));
        None
      }
    }
  }

  /// Compile a root container: register its declarations, resolve each of
  /// them, and analyze every function body reached. Independent
  /// declarations keep producing diagnostics after one fails.
  pub fn compile(&mut self, container: NodeId) -> ModuleId {
    let root = self.syms.intern("root");
    let module = self.add_module(root, self.root_pkg, container);
    let decl_ids: Vec<DeclId> = self.ents.modules[module].decls.values().copied().collect();
    for decl in decl_ids {
      self.resolve_decl(decl);
    }
    // Function bodies discovered while resolving (including generic
    // instantiations created along the way) are analyzed to a fixpoint.
    let mut i = 0;
    while i < self.ents.fns.len() {
      self.ensure_fn_analyzed(FnId(u32::try_from(i).expect("overflow")));
      i += 1;
    }
    module
  }

  /// Look up a declaration by name along the scope chain, returning its id
  /// and whether the access crosses a module boundary.
  #[must_use] pub fn find_decl_in_scope(&self, scope: ScopeId, name: Symbol) -> Option<DeclId> {
    for (_, s) in self.scopes.ancestors(scope) {
      if let ScopeKind::Decls { module } = s.k {
        if let Some(d) = self.ents.find_decl(module, name) { return Some(d) }
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn primitive_type_parsing() {
    let mut comp = Compiler::new(Config::default());
    assert_eq!(comp.find_primitive_type("bool"), Some(Types::BOOL));
    let i32t = comp.find_primitive_type("i32").unwrap();
    assert_eq!(comp.types.int_info(i32t),
      Some(types::IntInfo { signed: true, bits: 32 }));
    let usize_t = comp.find_primitive_type("usize").unwrap();
    assert_eq!(comp.types.int_info(usize_t),
      Some(types::IntInfo { signed: false, bits: 64 }));
    assert_eq!(comp.find_primitive_type("i0"), None);
    assert_eq!(comp.find_primitive_type("x32"), None);
    assert_eq!(comp.find_primitive_type("i"), None);
  }

  #[test]
  fn atomic_order_enum_is_declared() {
    let comp = Compiler::new(Config::default());
    let TyKind::Enum(info) = comp.types.kind(comp.atomic_order_ty) else {
      panic!("AtomicOrder should be an enum");
    };
    assert_eq!(info.fields.len(), 6);
  }
}
