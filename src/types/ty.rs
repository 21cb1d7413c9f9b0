//! The type interner. Types are append-only and compared by [`TyId`]
//! identity; structural kinds are canonicalized so identity comparison is
//! sound, while nominal kinds (containers, error sets, opaques) get a fresh
//! id per declaration.

use hashbrown::HashMap;
use num::BigInt;
use super::{ErrId, FnId, IdxVec, IntInfo, ModuleId, Symbol, Symbols, mk_id};

mk_id! {
  /// An interned type.
  TyId("ty"),
}

/// The pointer length kind: how many elements the pointee covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PtrLen {
  /// `*T`, exactly one element.
  Single,
  /// `[*]T`, an unknown number of elements.
  Many,
}

/// The payload of pointer and slice types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PtrInfo {
  /// The element type.
  pub elem: TyId,
  /// Single-item or unknown-length. (Slices carry their own kind tag.)
  pub len: PtrLen,
  /// Whether stores through the pointer are forbidden.
  pub is_const: bool,
  /// Whether loads and stores may not be elided.
  pub is_volatile: bool,
  /// Explicit alignment in bytes, or `None` for the element's ABI alignment.
  pub align: Option<u32>,
  /// For sub-byte pointers, the bit offset into the host integer.
  pub bit_offset: u16,
  /// For sub-byte pointers, the width of the host integer in bits (0 if
  /// this is an ordinary pointer).
  pub host_int_bits: u16,
}

impl PtrInfo {
  /// An ordinary single-item pointer to `elem`.
  #[must_use] pub fn single(elem: TyId, is_const: bool) -> Self {
    Self {
      elem, len: PtrLen::Single, is_const,
      is_volatile: false, align: None, bit_offset: 0, host_int_bits: 0,
    }
  }

  /// An unknown-length pointer to `elem`.
  #[must_use] pub fn many(elem: TyId, is_const: bool) -> Self {
    Self { len: PtrLen::Many, ..Self::single(elem, is_const) }
  }
}

/// The set of symbolic errors denoted by an error-set type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrSet {
  /// The global error set, the union of every declared error.
  Global,
  /// An explicit set of errors, sorted and deduplicated.
  List(Box<[ErrId]>),
}

/// The calling convention of a function type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CallConv {
  /// The default convention; callable only from this language.
  #[default] Unspecified,
  /// C ABI.
  C,
  /// Cold (error-path) convention.
  Cold,
  /// Naked function, no prologue.
  Naked,
  /// An async function; calls must supply an allocator.
  Async,
}

/// A parameter of a function type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Param {
  /// The parameter name, if declared.
  pub name: Option<Symbol>,
  /// The parameter type. `None` when the parameter is generic (`comptime`
  /// parameters of unresolved type, or inferred `var` parameters).
  pub ty: Option<TyId>,
  /// Whether the argument must be comptime-known at every call site.
  pub is_comptime: bool,
}

/// The payload of function types.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FnTyInfo {
  /// The calling convention.
  pub cc: CallConv,
  /// The declared parameters.
  pub params: Box<[Param]>,
  /// The return type. `None` when the return type is generic.
  pub ret: Option<TyId>,
  /// Whether the function accepts C varargs.
  pub is_var_args: bool,
  /// Whether any parameter or the return type is generic; such a function
  /// has no runtime representation and every call instantiates it.
  pub is_generic: bool,
  /// For async functions, the allocator type required at `async` call sites.
  pub async_allocator: Option<TyId>,
}

/// A field of a struct or union.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldInfo {
  /// The field name.
  pub name: Symbol,
  /// The field type.
  pub ty: TyId,
}

/// The payload of struct types. Nominal: never interned structurally.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructInfo {
  /// The declared name.
  pub name: Symbol,
  /// The fields in declaration order.
  pub fields: Box<[FieldInfo]>,
  /// The module holding the container's member declarations, if any.
  pub module: Option<ModuleId>,
}

/// The payload of union types. Nominal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnionInfo {
  /// The declared name.
  pub name: Symbol,
  /// The tag enum, for tagged unions.
  pub tag: Option<TyId>,
  /// The fields in declaration order. For tagged unions the field order
  /// matches the tag enum's field order.
  pub fields: Box<[FieldInfo]>,
}

/// The payload of enum types. Nominal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumInfo {
  /// The declared name.
  pub name: Symbol,
  /// The integer tag type.
  pub tag_int: TyId,
  /// Field names with their tag values, in declaration order.
  pub fields: Box<[(Symbol, BigInt)]>,
}

/// A type. Compared by [`TyId`] identity; see [`Types`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
  /// The poison type produced by failed analysis. Never appears on an
  /// analyzed instruction.
  Invalid,
  /// The type of expressions that do not produce a value (terminators).
  NoReturn,
  /// The zero-sized unit type.
  Void,
  /// `bool`.
  Bool,
  /// A sized integer type.
  Int(IntInfo),
  /// A float type of the given bit width (16, 32, 64 or 128).
  Float(u16),
  /// `[len]elem`.
  Array {
    /// The element type.
    elem: TyId,
    /// The number of elements.
    len: u64,
  },
  /// `*T` / `[*]T` and their qualified forms.
  Pointer(PtrInfo),
  /// `[]T`, semantically the struct `{ptr: [*]T, len: usize}`.
  Slice(PtrInfo),
  /// `?T`.
  Optional(TyId),
  /// An error-set type.
  ErrorSet(ErrSet),
  /// `E!T`.
  ErrorUnion {
    /// The error-set half.
    set: TyId,
    /// The payload half.
    payload: TyId,
  },
  /// A struct declaration.
  Struct(StructInfo),
  /// A union declaration, plain or tagged.
  Union(UnionInfo),
  /// An enum declaration.
  Enum(EnumInfo),
  /// A function type.
  Fn(FnTyInfo),
  /// An opaque type, only usable behind pointers.
  Opaque(Symbol),
  /// The type of an imported module.
  Namespace(ModuleId),
  /// The type of untyped integer literals.
  ComptimeInt,
  /// The type of untyped float literals.
  ComptimeFloat,
  /// The type of a labeled block used as a comptime value.
  BlockTy,
  /// The type of `container.method` before the call is formed.
  BoundFn(FnId),
  /// The type of a frozen argument list captured for a comptime call.
  ArgTuple,
  /// The type of types.
  Type,
  /// The type of the `null` literal.
  Null,
  /// The type of the `undefined` literal.
  Undefined,
  /// `promise` / `promise->T`, the handle to an unfulfilled async frame.
  Promise(Option<TyId>),
}

/// The type interner. All types live here; the rest of the compiler borrows
/// [`TyId`]s. The table is append-only.
#[derive(Debug)]
pub struct Types {
  tys: IdxVec<TyId, TyKind>,
  /// Canonicalization map for structural kinds only.
  map: HashMap<TyKind, TyId>,
  /// Pointer width of the target, in bits.
  ptr_bits: u16,
}

impl Types {
  /// The poison type.
  pub const INVALID: TyId = TyId(0);
  /// The `noreturn` type.
  pub const NORETURN: TyId = TyId(1);
  /// The `void` type.
  pub const VOID: TyId = TyId(2);
  /// The `bool` type.
  pub const BOOL: TyId = TyId(3);
  /// The `type` type.
  pub const TYPE: TyId = TyId(4);
  /// The type of integer literals.
  pub const COMPTIME_INT: TyId = TyId(5);
  /// The type of float literals.
  pub const COMPTIME_FLOAT: TyId = TyId(6);
  /// The type of `null`.
  pub const NULL: TyId = TyId(7);
  /// The type of `undefined`.
  pub const UNDEFINED: TyId = TyId(8);
  /// The global error set.
  pub const GLOBAL_ERROR_SET: TyId = TyId(9);

  /// Create the interner for a target with the given pointer width.
  #[must_use] pub fn new(ptr_bits: u16) -> Self {
    let mut this = Self { tys: IdxVec::new(), map: HashMap::new(), ptr_bits };
    for k in [
      TyKind::Invalid, TyKind::NoReturn, TyKind::Void, TyKind::Bool, TyKind::Type,
      TyKind::ComptimeInt, TyKind::ComptimeFloat, TyKind::Null, TyKind::Undefined,
      TyKind::ErrorSet(ErrSet::Global),
    ] {
      let id = this.tys.push(k.clone());
      this.map.insert(k, id);
    }
    this
  }

  /// The pointer width of the target, in bits.
  #[must_use] pub fn ptr_bits(&self) -> u16 { self.ptr_bits }

  /// Look up a type by id.
  #[must_use] pub fn kind(&self, ty: TyId) -> &TyKind { &self.tys[ty] }

  /// Intern a structural type, canonicalizing.
  pub fn intern(&mut self, k: TyKind) -> TyId {
    if let Some(&id) = self.map.get(&k) { return id }
    let id = self.tys.push(k.clone());
    self.map.insert(k, id);
    id
  }

  /// Append a nominal type (struct, union, enum, opaque, declared error
  /// set) without canonicalization: each declaration is a distinct type.
  pub fn declare(&mut self, k: TyKind) -> TyId { self.tys.push(k) }

  /// The sized integer type with the given info.
  pub fn int(&mut self, info: IntInfo) -> TyId { self.intern(TyKind::Int(info)) }

  /// The target's `usize` type.
  pub fn usize(&mut self) -> TyId {
    let bits = self.ptr_bits;
    self.int(IntInfo { signed: false, bits })
  }

  /// The target's `isize` type.
  pub fn isize(&mut self) -> TyId {
    let bits = self.ptr_bits;
    self.int(IntInfo { signed: true, bits })
  }

  /// A float type of the given width.
  pub fn float(&mut self, bits: u16) -> TyId { self.intern(TyKind::Float(bits)) }

  /// `[len]elem`.
  pub fn array(&mut self, elem: TyId, len: u64) -> TyId {
    self.intern(TyKind::Array { elem, len })
  }

  /// A pointer type.
  pub fn ptr(&mut self, info: PtrInfo) -> TyId { self.intern(TyKind::Pointer(info)) }

  /// A slice type.
  pub fn slice(&mut self, info: PtrInfo) -> TyId {
    self.intern(TyKind::Slice(PtrInfo { len: PtrLen::Many, ..info }))
  }

  /// `?child`.
  pub fn optional(&mut self, child: TyId) -> TyId { self.intern(TyKind::Optional(child)) }

  /// An error-set type from an unsorted error list.
  pub fn error_set(&mut self, mut errs: Vec<ErrId>) -> TyId {
    errs.sort_unstable();
    errs.dedup();
    self.intern(TyKind::ErrorSet(ErrSet::List(errs.into())))
  }

  /// `set!payload`.
  pub fn error_union(&mut self, set: TyId, payload: TyId) -> TyId {
    debug_assert!(matches!(self.kind(set), TyKind::ErrorSet(_)));
    self.intern(TyKind::ErrorUnion { set, payload })
  }

  /// A function type.
  pub fn fn_ty(&mut self, info: FnTyInfo) -> TyId { self.intern(TyKind::Fn(info)) }

  /// `promise` or `promise->result`.
  pub fn promise(&mut self, result: Option<TyId>) -> TyId {
    self.intern(TyKind::Promise(result))
  }

  /// The integer info of `ty`, if it is a sized integer type.
  #[must_use] pub fn int_info(&self, ty: TyId) -> Option<IntInfo> {
    match *self.kind(ty) {
      TyKind::Int(info) => Some(info),
      _ => None,
    }
  }

  /// The pointer payload of `ty`, if it is a pointer or slice.
  #[must_use] pub fn ptr_info(&self, ty: TyId) -> Option<&PtrInfo> {
    match self.kind(ty) {
      TyKind::Pointer(info) | TyKind::Slice(info) => Some(info),
      _ => None,
    }
  }

  /// Whether `ty` only exists at compile time and has no runtime
  /// representation.
  #[must_use] pub fn is_comptime_only(&self, ty: TyId) -> bool {
    match self.kind(ty) {
      TyKind::ComptimeInt | TyKind::ComptimeFloat | TyKind::Type | TyKind::Null |
      TyKind::Undefined | TyKind::Namespace(_) | TyKind::BlockTy | TyKind::BoundFn(_) |
      TyKind::ArgTuple => true,
      TyKind::Fn(info) => info.is_generic,
      _ => false,
    }
  }

  /// Whether values of `ty` occupy no storage.
  #[must_use] pub fn is_zero_size(&self, ty: TyId) -> bool {
    match self.kind(ty) {
      TyKind::Void => true,
      TyKind::Array { len: 0, .. } => true,
      TyKind::Array { elem, .. } => self.is_zero_size(*elem),
      TyKind::Struct(info) => info.fields.iter().all(|f| self.is_zero_size(f.ty)),
      TyKind::Enum(info) => info.fields.len() <= 1,
      _ => self.is_comptime_only(ty),
    }
  }

  /// The ABI alignment of `ty` in bytes.
  #[must_use] pub fn abi_align(&self, ty: TyId) -> u32 {
    match self.kind(ty) {
      TyKind::Int(info) => (u32::from(info.bits).div_ceil(8)).next_power_of_two().min(16),
      TyKind::Float(bits) => u32::from(*bits / 8),
      TyKind::Bool => 1,
      TyKind::Pointer(_) | TyKind::Slice(_) | TyKind::Fn(_) | TyKind::Promise(_) =>
        u32::from(self.ptr_bits / 8),
      TyKind::Array { elem, .. } => self.abi_align(*elem),
      TyKind::Optional(child) => self.abi_align(*child).max(1),
      TyKind::ErrorSet(_) => 2,
      TyKind::ErrorUnion { payload, .. } => self.abi_align(*payload).max(2),
      TyKind::Struct(info) =>
        info.fields.iter().map(|f| self.abi_align(f.ty)).max().unwrap_or(1),
      TyKind::Union(info) =>
        info.fields.iter().map(|f| self.abi_align(f.ty)).max().unwrap_or(1),
      TyKind::Enum(info) => self.abi_align(info.tag_int),
      _ => 1,
    }
  }

  /// The ABI size of `ty` in bytes.
  #[must_use] pub fn abi_size(&self, ty: TyId) -> u64 {
    match self.kind(ty) {
      TyKind::Int(info) => u64::from(info.bits).div_ceil(8).next_power_of_two(),
      TyKind::Float(bits) => u64::from(*bits / 8),
      TyKind::Bool => 1,
      TyKind::Pointer(_) | TyKind::Fn(_) | TyKind::Promise(_) =>
        u64::from(self.ptr_bits / 8),
      TyKind::Slice(_) => 2 * u64::from(self.ptr_bits / 8),
      TyKind::Array { elem, len } => self.abi_size(*elem) * len,
      TyKind::Optional(child) => {
        if matches!(self.kind(*child), TyKind::Pointer(_) | TyKind::Fn(_)) {
          self.abi_size(*child)
        } else {
          self.abi_size(*child) + u64::from(self.abi_align(*child)).max(1)
        }
      }
      TyKind::ErrorSet(_) => 2,
      TyKind::ErrorUnion { payload, .. } =>
        self.abi_size(*payload) + u64::from(self.abi_align(*payload)).max(2),
      TyKind::Struct(info) => {
        let mut size = 0u64;
        for f in &info.fields {
          let align = u64::from(self.abi_align(f.ty)).max(1);
          size = size.div_ceil(align) * align + self.abi_size(f.ty);
        }
        let align = u64::from(self.abi_align(ty)).max(1);
        size.div_ceil(align) * align
      }
      TyKind::Union(info) => {
        let payload = info.fields.iter().map(|f| self.abi_size(f.ty)).max().unwrap_or(0);
        payload + info.tag.map_or(0, |t| self.abi_size(t))
      }
      TyKind::Enum(info) => self.abi_size(info.tag_int),
      _ => 0,
    }
  }

  /// The alignment of a pointer type, honoring an explicit `align(N)`.
  #[must_use] pub fn ptr_align(&self, ty: TyId) -> u32 {
    let info = self.ptr_info(ty).expect("not a pointer");
    info.align.unwrap_or_else(|| self.abi_align(info.elem))
  }

  /// The errors denoted by an error-set type, or `None` for the global set.
  #[must_use] pub fn error_list(&self, set: TyId) -> Option<&[ErrId]> {
    match self.kind(set) {
      TyKind::ErrorSet(ErrSet::List(list)) => Some(list),
      TyKind::ErrorSet(ErrSet::Global) => None,
      _ => panic!("not an error set"),
    }
  }

  /// Render a type for diagnostics.
  #[must_use] pub fn name(&self, ty: TyId, syms: &Symbols) -> String {
    match self.kind(ty) {
      TyKind::Invalid => "(invalid)".into(),
      TyKind::NoReturn => "noreturn".into(),
      TyKind::Void => "void".into(),
      TyKind::Bool => "bool".into(),
      TyKind::Int(info) => info.to_string(),
      TyKind::Float(bits) => format!("f{bits}"),
      TyKind::Array { elem, len } => format!("[{len}]{}", self.name(*elem, syms)),
      TyKind::Pointer(info) => {
        let star = match info.len { PtrLen::Single => "*", PtrLen::Many => "[*]" };
        format!("{star}{}{}", if info.is_const { "const " } else { "" },
          self.name(info.elem, syms))
      }
      TyKind::Slice(info) => format!("[]{}{}",
        if info.is_const { "const " } else { "" }, self.name(info.elem, syms)),
      TyKind::Optional(child) => format!("?{}", self.name(*child, syms)),
      TyKind::ErrorSet(ErrSet::Global) => "error".into(),
      TyKind::ErrorSet(ErrSet::List(_)) => "error{..}".into(),
      TyKind::ErrorUnion { set, payload } =>
        format!("{}!{}", self.name(*set, syms), self.name(*payload, syms)),
      TyKind::Struct(info) => syms.name(info.name).into(),
      TyKind::Union(info) => syms.name(info.name).into(),
      TyKind::Enum(info) => syms.name(info.name).into(),
      TyKind::Fn(info) => {
        let ret = info.ret.map_or("var".into(), |t| self.name(t, syms));
        format!("fn({}) {ret}", info.params.iter().map(|p| {
          p.ty.map_or("var".into(), |t| self.name(t, syms))
        }).collect::<Vec<_>>().join(", "))
      }
      TyKind::Opaque(name) => syms.name(*name).into(),
      TyKind::Namespace(_) => "(namespace)".into(),
      TyKind::ComptimeInt => "comptime_int".into(),
      TyKind::ComptimeFloat => "comptime_float".into(),
      TyKind::BlockTy => "(block)".into(),
      TyKind::BoundFn(_) => "(bound fn)".into(),
      TyKind::ArgTuple => "(args)".into(),
      TyKind::Type => "type".into(),
      TyKind::Null => "(null)".into(),
      TyKind::Undefined => "(undefined)".into(),
      TyKind::Promise(None) => "promise".into(),
      TyKind::Promise(Some(t)) => format!("promise->{}", self.name(*t, syms)),
    }
  }
}

/// The process-global table of symbolic error entries. Monotonically grows;
/// an error name maps to the same [`ErrId`] wherever it appears.
#[derive(Debug, Default)]
pub struct ErrorTable {
  entries: IdxVec<ErrId, Symbol>,
  map: HashMap<Symbol, ErrId>,
}

impl ErrorTable {
  /// Get or create the entry for an error name.
  pub fn intern(&mut self, name: Symbol) -> ErrId {
    if let Some(&id) = self.map.get(&name) { return id }
    let id = self.entries.push(name);
    self.map.insert(name, id);
    id
  }

  /// The name of an error entry.
  #[must_use] pub fn name(&self, id: ErrId) -> Symbol { self.entries[id] }

  /// The number of declared errors.
  #[must_use] pub fn len(&self) -> usize { self.entries.len() }

  /// Whether no errors have been declared.
  #[must_use] pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn structural_interning_canonicalizes() {
    let mut tys = Types::new(64);
    let u8t = tys.int(IntInfo { signed: false, bits: 8 });
    let a = tys.ptr(PtrInfo::single(u8t, true));
    let b = tys.ptr(PtrInfo::single(u8t, true));
    assert_eq!(a, b);
    let c = tys.ptr(PtrInfo::single(u8t, false));
    assert_ne!(a, c);
  }

  #[test]
  fn nominal_types_are_fresh() {
    let mut tys = Types::new(64);
    let mut syms = Symbols::default();
    let name = syms.intern("Point");
    let s1 = tys.declare(TyKind::Struct(StructInfo { name, fields: Box::new([]), module: None }));
    let s2 = tys.declare(TyKind::Struct(StructInfo { name, fields: Box::new([]), module: None }));
    assert_ne!(s1, s2);
  }

  #[test]
  fn error_sets_sort_and_dedup() {
    let mut tys = Types::new(64);
    let (a, b) = (ErrId(1), ErrId(2));
    let s1 = tys.error_set(vec![b, a, a]);
    let s2 = tys.error_set(vec![a, b]);
    assert_eq!(s1, s2);
    assert_eq!(tys.error_list(s1), Some(&[a, b][..]));
  }

  #[test]
  fn error_table_is_idempotent() {
    let mut errs = ErrorTable::default();
    let mut syms = Symbols::default();
    let x = syms.intern("OutOfMemory");
    assert_eq!(errs.intern(x), errs.intern(x));
    assert_eq!(errs.len(), 1);
  }
}
