//! The compile-time value model. A [`Value`] is a type paired with a
//! payload; `Runtime` and `Undef` sit at the top of the payload sum so that
//! "specialness" needs no separate flag. Aggregate children are [`ObjId`]s
//! into the comptime object arena ([`Mem`]), which gives pointers provenance
//! and makes shallow copies share subobjects.

use num::{BigInt, BigRational};
use num::traits::{FromPrimitive, ToPrimitive};
use crate::types::{ErrId, FnId, IdxVec, ModuleId, ObjId};
use crate::types::ir::BlockId;
use crate::types::ty::{TyId, Types};

/// The mutability class of a comptime pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtrMut {
  /// Points at immutable comptime data; copies may share the pointee.
  ComptimeConst,
  /// Points at a comptime variable; stores through it are observable and
  /// copies must deep-copy.
  ComptimeVar,
  /// Points at runtime storage.
  RuntimeVar,
}

/// Where a comptime pointer points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtrBase {
  /// A poison pointer from failed analysis.
  Invalid,
  /// Directly at an object.
  Obj(ObjId),
  /// At an element of an array object.
  ArrayElem {
    /// The array object.
    array: ObjId,
    /// The element index.
    index: usize,
    /// Whether this pointer came from a C-string style literal.
    c_str: bool,
  },
  /// At a field of a struct or union object.
  Field {
    /// The aggregate object.
    agg: ObjId,
    /// The field index.
    index: usize,
  },
  /// A literal address (`@intToPtr` and friends). Not dereferenceable at
  /// comptime. The zero address doubles as `null` for pointer-like
  /// optionals.
  Addr(u64),
  /// A function pointer.
  Func(FnId),
  /// The write-only discard pointer (`_`).
  Discard,
}

/// A comptime pointer: provenance plus mutability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtrValue {
  /// Where it points.
  pub base: PtrBase,
  /// The mutability class.
  pub mutability: PtrMut,
}

/// The elements of a comptime array value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayData {
  /// Entirely undefined; expanded to per-element `undef` objects on the
  /// first elementwise access.
  Undef,
  /// The elements.
  Elems(Box<[ObjId]>),
}

/// The payload of a [`Value`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
  /// Not known at compile time.
  Runtime,
  /// Known to be undefined.
  Undef,
  /// The unit value.
  Void,
  /// A boolean.
  Bool(bool),
  /// An integer (or enum-adjacent integer), arbitrary precision.
  Int(BigInt),
  /// A float, kept exact as a rational until narrowed.
  Float(BigRational),
  /// A pointer with provenance.
  Ptr(PtrValue),
  /// An array.
  Array(ArrayData),
  /// A struct; one object per field in declaration order.
  Struct(Box<[ObjId]>),
  /// A tagged-union value.
  Union {
    /// The active tag.
    tag: BigInt,
    /// The active field's payload.
    payload: ObjId,
  },
  /// An enum tag.
  Enum(BigInt),
  /// A symbolic error.
  ErrorCode(ErrId),
  /// An error union: payload or error.
  ErrUnion(Result<ObjId, ErrId>),
  /// An optional with a non-pointer-like payload. Pointer-like optionals
  /// are represented directly as `Ptr`, with null as the zero address.
  Optional(Option<ObjId>),
  /// A function reference.
  Func(FnId),
  /// A type used as a value.
  Ty(TyId),
  /// The `null` literal (before coercion into an optional).
  Null,
  /// An imported module.
  Namespace(ModuleId),
  /// `container.method` captured before the call is formed.
  BoundFn {
    /// The method.
    func: FnId,
    /// The subject the method is bound to.
    subject: ObjId,
  },
  /// A frozen argument list for a comptime varargs call.
  ArgTuple(Box<[ObjId]>),
  /// A labeled block captured as a comptime value.
  Block(BlockId),
}

/// A typed compile-time value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Value {
  /// The type.
  pub ty: TyId,
  /// The payload.
  pub k: ValueKind,
}

impl Value {
  /// A value of the given type that is only known at runtime.
  #[must_use] pub fn runtime(ty: TyId) -> Self { Self { ty, k: ValueKind::Runtime } }

  /// An undefined value of the given type.
  #[must_use] pub fn undef(ty: TyId) -> Self { Self { ty, k: ValueKind::Undef } }

  /// The poison value produced after a diagnostic.
  #[must_use] pub fn invalid() -> Self { Self::runtime(Types::INVALID) }

  /// The unit value.
  #[must_use] pub fn void() -> Self { Self { ty: Types::VOID, k: ValueKind::Void } }

  /// The value of type `noreturn`, for terminator instructions.
  #[must_use] pub fn no_return() -> Self {
    Self { ty: Types::NORETURN, k: ValueKind::Void }
  }

  /// A boolean constant.
  #[must_use] pub fn bool(b: bool) -> Self { Self { ty: Types::BOOL, k: ValueKind::Bool(b) } }

  /// An integer constant of the given type.
  #[must_use] pub fn int(ty: TyId, n: BigInt) -> Self { Self { ty, k: ValueKind::Int(n) } }

  /// An untyped integer literal.
  #[must_use] pub fn comptime_int(n: BigInt) -> Self { Self::int(Types::COMPTIME_INT, n) }

  /// A float constant of the given type.
  #[must_use] pub fn float(ty: TyId, r: BigRational) -> Self {
    Self { ty, k: ValueKind::Float(r) }
  }

  /// A type constant.
  #[must_use] pub fn ty(t: TyId) -> Self { Self { ty: Types::TYPE, k: ValueKind::Ty(t) } }

  /// The `null` literal.
  #[must_use] pub fn null() -> Self { Self { ty: Types::NULL, k: ValueKind::Null } }

  /// Whether the value is known at compile time (`Undef` counts as known).
  #[must_use] pub fn is_comptime(&self) -> bool { !matches!(self.k, ValueKind::Runtime) }

  /// Whether the value is an `Undef`.
  #[must_use] pub fn is_undef(&self) -> bool { matches!(self.k, ValueKind::Undef) }

  /// Whether this is the value of a terminator (type `noreturn`).
  #[must_use] pub fn is_unreachable(&self) -> bool { self.ty == Types::NORETURN }

  /// The integer payload, if the value is a comptime integer.
  #[must_use] pub fn as_int(&self) -> Option<&BigInt> {
    match &self.k {
      ValueKind::Int(n) => Some(n),
      _ => None,
    }
  }

  /// The boolean payload, if the value is a comptime bool.
  #[must_use] pub fn as_bool(&self) -> Option<bool> {
    match self.k {
      ValueKind::Bool(b) => Some(b),
      _ => None,
    }
  }

  /// The type payload, if the value is a comptime `type`.
  #[must_use] pub fn as_ty(&self) -> Option<TyId> {
    match self.k {
      ValueKind::Ty(t) => Some(t),
      _ => None,
    }
  }
}

/// Parse an `f64` into the exact rational it denotes.
#[must_use] pub fn rational_from_f64(x: f64) -> BigRational {
  BigRational::from_f64(x).expect("not a finite float")
}

/// Round a rational to what a float of the given width can represent.
/// Widths at or below 32 round through `f32`; wider widths round through
/// `f64` (the `f128` mantissa only matters to codegen, which is out of
/// scope here).
#[must_use] pub fn round_float(r: &BigRational, bits: u16) -> BigRational {
  let x = r.to_f64().unwrap_or(0.0);
  if bits <= 32 { rational_from_f64(f64::from(x as f32)) } else { rational_from_f64(x) }
}

/// The comptime object arena. Every aggregate child and every pointee lives
/// here; an [`ObjId`] is stable for the whole compilation.
#[derive(Debug, Default)]
pub struct Mem {
  objs: IdxVec<ObjId, Value>,
}

impl Mem {
  /// Allocate an object holding `v`.
  pub fn alloc(&mut self, v: Value) -> ObjId { self.objs.push(v) }

  /// Read an object.
  #[must_use] pub fn get(&self, id: ObjId) -> &Value { &self.objs[id] }

  /// Write an object.
  pub fn set(&mut self, id: ObjId, v: Value) { self.objs[id] = v }

  /// The element object of an array object, expanding an `undef` array into
  /// per-element `undef` objects first. `len` and `elem_ty` come from the
  /// array's type.
  pub fn elem_obj(&mut self, array: ObjId, index: usize, len: usize, elem_ty: TyId) -> ObjId {
    self.expand_undef_array(array, len, elem_ty);
    match &self.objs[array].k {
      ValueKind::Array(ArrayData::Elems(elems)) => elems[index],
      k => panic!("elem_obj on non-array value {k:?}"),
    }
  }

  /// If `array` holds an `undef`-tagged array, expand it.
  pub fn expand_undef_array(&mut self, array: ObjId, len: usize, elem_ty: TyId) {
    let needs = matches!(self.objs[array].k,
      ValueKind::Array(ArrayData::Undef) | ValueKind::Undef);
    if needs {
      let elems: Box<[ObjId]> =
        (0..len).map(|_| self.alloc(Value::undef(elem_ty))).collect();
      self.objs[array].k = ValueKind::Array(ArrayData::Elems(elems));
    }
  }

  /// The object a pointer base points at. Aborts for bases with no comptime
  /// pointee; those are logic errors in the caller.
  pub fn pointee(&mut self, base: PtrBase, types: &Types) -> ObjId {
    match base {
      PtrBase::Obj(obj) => obj,
      PtrBase::ArrayElem { array, index, .. } => {
        let (len, elem_ty) = match *types.kind(self.objs[array].ty) {
          crate::types::ty::TyKind::Array { elem, len } => (len as usize, elem),
          ref k => panic!("array pointer into non-array type {k:?}"),
        };
        self.elem_obj(array, index, len, elem_ty)
      }
      PtrBase::Field { agg, index } => match &self.objs[agg].k {
        ValueKind::Struct(fields) => fields[index],
        ValueKind::Union { payload, .. } => *payload,
        k => panic!("field pointer into non-aggregate value {k:?}"),
      },
      PtrBase::Invalid | PtrBase::Addr(_) | PtrBase::Func(_) | PtrBase::Discard =>
        panic!("pointee of non-dereferenceable pointer base {base:?}"),
    }
  }

  /// Copy a value. A shallow copy (`deep = false`) shares aggregate
  /// subobjects and is legal only when the source is `ComptimeConst` data
  /// or the destination will never be mutated; a deep copy re-allocates the
  /// whole object graph.
  #[must_use] pub fn copy(&mut self, v: &Value, deep: bool) -> Value {
    if !deep { return v.clone() }
    let k = match &v.k {
      ValueKind::Array(ArrayData::Elems(elems)) => {
        let elems: Box<[ObjId]> = elems.clone().into_vec().into_iter()
          .map(|o| self.copy_obj(o))
          .collect();
        ValueKind::Array(ArrayData::Elems(elems))
      }
      ValueKind::Struct(fields) => {
        let fields: Box<[ObjId]> = fields.clone().into_vec().into_iter()
          .map(|o| self.copy_obj(o))
          .collect();
        ValueKind::Struct(fields)
      }
      ValueKind::Union { tag, payload } =>
        ValueKind::Union { tag: tag.clone(), payload: self.copy_obj(*payload) },
      ValueKind::ErrUnion(Ok(payload)) => ValueKind::ErrUnion(Ok(self.copy_obj(*payload))),
      ValueKind::Optional(Some(payload)) =>
        ValueKind::Optional(Some(self.copy_obj(*payload))),
      k => k.clone(),
    };
    Value { ty: v.ty, k }
  }

  fn copy_obj(&mut self, o: ObjId) -> ObjId {
    let v = self.objs[o].clone();
    let copied = self.copy(&v, true);
    self.alloc(copied)
  }

  /// Structural equality on comptime values. Pointers compare by
  /// provenance identity, numbers by arbitrary-precision comparison.
  /// `Runtime` values are never equal to anything.
  #[must_use] pub fn equals(&self, a: &Value, b: &Value) -> bool {
    match (&a.k, &b.k) {
      (ValueKind::Runtime, _) | (_, ValueKind::Runtime) => false,
      (ValueKind::Undef, ValueKind::Undef) => true,
      (ValueKind::Void, ValueKind::Void) | (ValueKind::Null, ValueKind::Null) => true,
      (ValueKind::Bool(x), ValueKind::Bool(y)) => x == y,
      (ValueKind::Int(x), ValueKind::Int(y)) => x == y,
      (ValueKind::Float(x), ValueKind::Float(y)) => x == y,
      (ValueKind::Enum(x), ValueKind::Enum(y)) => x == y,
      (ValueKind::ErrorCode(x), ValueKind::ErrorCode(y)) => x == y,
      (ValueKind::Func(x), ValueKind::Func(y)) => x == y,
      (ValueKind::Ty(x), ValueKind::Ty(y)) => x == y,
      (ValueKind::Namespace(x), ValueKind::Namespace(y)) => x == y,
      (ValueKind::Ptr(x), ValueKind::Ptr(y)) => x.base == y.base,
      (ValueKind::Array(ArrayData::Undef), ValueKind::Array(ArrayData::Undef)) => true,
      (ValueKind::Array(ArrayData::Elems(xs)), ValueKind::Array(ArrayData::Elems(ys))) =>
        xs.len() == ys.len() &&
        xs.iter().zip(ys.iter()).all(|(&x, &y)| self.obj_equals(x, y)),
      (ValueKind::Struct(xs), ValueKind::Struct(ys)) =>
        xs.len() == ys.len() &&
        xs.iter().zip(ys.iter()).all(|(&x, &y)| self.obj_equals(x, y)),
      (ValueKind::Union { tag: tx, payload: px }, ValueKind::Union { tag: ty_, payload: py }) =>
        tx == ty_ && self.obj_equals(*px, *py),
      (ValueKind::ErrUnion(Err(x)), ValueKind::ErrUnion(Err(y))) => x == y,
      (ValueKind::ErrUnion(Ok(x)), ValueKind::ErrUnion(Ok(y))) => self.obj_equals(*x, *y),
      (ValueKind::Optional(None), ValueKind::Optional(None)) => true,
      (ValueKind::Optional(Some(x)), ValueKind::Optional(Some(y))) =>
        self.obj_equals(*x, *y),
      _ => false,
    }
  }

  fn obj_equals(&self, a: ObjId, b: ObjId) -> bool {
    a == b || self.equals(&self.objs[a], &self.objs[b])
  }

  /// The canonical form of a comptime value, used as (part of) a generic
  /// instantiation key. Hashes and compares structurally on the value
  /// model, not by object address.
  #[must_use] pub fn canonical(&self, v: &Value) -> CanonValue {
    match &v.k {
      ValueKind::Runtime => CanonValue::Runtime,
      ValueKind::Undef => CanonValue::Undef,
      ValueKind::Void => CanonValue::Void,
      ValueKind::Null => CanonValue::Null,
      ValueKind::Bool(b) => CanonValue::Bool(*b),
      ValueKind::Int(n) | ValueKind::Enum(n) => CanonValue::Int(v.ty, n.clone()),
      ValueKind::Float(r) => CanonValue::Float(v.ty, r.clone()),
      ValueKind::ErrorCode(e) => CanonValue::Err(*e),
      ValueKind::Func(f) | ValueKind::BoundFn { func: f, .. } => CanonValue::Fn(*f),
      ValueKind::Ty(t) => CanonValue::Ty(*t),
      ValueKind::Namespace(m) => CanonValue::Namespace(*m),
      ValueKind::Ptr(p) => CanonValue::Ptr(p.base),
      ValueKind::Array(ArrayData::Undef) => CanonValue::Undef,
      ValueKind::Array(ArrayData::Elems(objs)) | ValueKind::Struct(objs) |
      ValueKind::ArgTuple(objs) => CanonValue::Agg(v.ty,
        objs.iter().map(|&o| self.canonical(self.get(o))).collect()),
      ValueKind::Union { tag, payload } => CanonValue::Agg(v.ty, vec![
        CanonValue::Int(v.ty, tag.clone()),
        self.canonical(self.get(*payload)),
      ]),
      ValueKind::ErrUnion(Err(e)) => CanonValue::Err(*e),
      ValueKind::ErrUnion(Ok(o)) | ValueKind::Optional(Some(o)) =>
        CanonValue::Agg(v.ty, vec![self.canonical(self.get(*o))]),
      ValueKind::Optional(None) => CanonValue::Null,
      ValueKind::Block(b) => CanonValue::Block(*b),
    }
  }
}

/// A hashable canonical form of a [`Value`]; see [`Mem::canonical`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanonValue {
  /// A runtime value (only its type participates in the key).
  Runtime,
  /// `undefined`.
  Undef,
  /// `void`.
  Void,
  /// `null`.
  Null,
  /// A boolean.
  Bool(bool),
  /// A typed integer (normalized by `BigInt`).
  Int(TyId, BigInt),
  /// A typed float.
  Float(TyId, BigRational),
  /// An error code.
  Err(ErrId),
  /// A function.
  Fn(FnId),
  /// A type (by interned id).
  Ty(TyId),
  /// A module.
  Namespace(ModuleId),
  /// A pointer, by provenance.
  Ptr(PtrBase),
  /// An aggregate, by canonical children.
  Agg(TyId, Vec<CanonValue>),
  /// A block reference.
  Block(BlockId),
}

impl std::hash::Hash for PtrBase {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    std::mem::discriminant(self).hash(state);
    match *self {
      PtrBase::Obj(o) => o.hash(state),
      PtrBase::ArrayElem { array, index, c_str } => {
        array.hash(state);
        index.hash(state);
        c_str.hash(state);
      }
      PtrBase::Field { agg, index } => {
        agg.hash(state);
        index.hash(state);
      }
      PtrBase::Addr(a) => a.hash(state),
      PtrBase::Func(f) => f.hash(state),
      PtrBase::Invalid | PtrBase::Discard => {}
    }
  }
}

/// Whether a zero value of `n` is the null encoding for pointer-like
/// optional payloads.
#[must_use] pub fn is_zero_addr(base: PtrBase) -> bool {
  matches!(base, PtrBase::Addr(0))
}

/// Whether optionals of `child` use the pointer-is-null-when-zero encoding.
#[must_use] pub fn optional_is_ptr_like(types: &Types, child: TyId) -> bool {
  matches!(types.kind(child),
    crate::types::ty::TyKind::Pointer(_) | crate::types::ty::TyKind::Fn(_) |
    crate::types::ty::TyKind::Promise(_))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::IntInfo;

  fn u8_ty(types: &mut Types) -> TyId { types.int(IntInfo { signed: false, bits: 8 }) }

  #[test]
  fn undef_array_expands_lazily() {
    let mut types = Types::new(64);
    let mut mem = Mem::default();
    let u8t = u8_ty(&mut types);
    let arr_ty = types.array(u8t, 3);
    let arr = mem.alloc(Value { ty: arr_ty, k: ValueKind::Array(ArrayData::Undef) });
    let e1 = mem.elem_obj(arr, 1, 3, u8t);
    assert!(mem.get(e1).is_undef());
    match &mem.get(arr).k {
      ValueKind::Array(ArrayData::Elems(elems)) => assert_eq!(elems.len(), 3),
      k => panic!("expected expanded array, got {k:?}"),
    }
  }

  #[test]
  #[should_panic(expected = "non-dereferenceable")]
  fn pointee_of_addr_aborts() {
    let types = Types::new(64);
    let mut mem = Mem::default();
    mem.pointee(PtrBase::Addr(0x1000), &types);
  }

  #[test]
  fn deep_copy_does_not_share() {
    let mut types = Types::new(64);
    let mut mem = Mem::default();
    let u8t = u8_ty(&mut types);
    let arr_ty = types.array(u8t, 2);
    let a = mem.alloc(Value::int(u8t, BigInt::from(1)));
    let b = mem.alloc(Value::int(u8t, BigInt::from(2)));
    let arr = Value { ty: arr_ty, k: ValueKind::Array(ArrayData::Elems(Box::new([a, b]))) };
    let copy = mem.copy(&arr, true);
    let ValueKind::Array(ArrayData::Elems(elems)) = &copy.k else { panic!() };
    assert_ne!(elems[0], a);
    mem.set(a, Value::int(u8t, BigInt::from(9)));
    assert_eq!(mem.get(elems[0]).as_int(), Some(&BigInt::from(1)));
  }

  #[test]
  fn shallow_copy_shares() {
    let mut types = Types::new(64);
    let mut mem = Mem::default();
    let u8t = u8_ty(&mut types);
    let arr_ty = types.array(u8t, 1);
    let a = mem.alloc(Value::int(u8t, BigInt::from(1)));
    let arr = Value { ty: arr_ty, k: ValueKind::Array(ArrayData::Elems(Box::new([a]))) };
    let copy = mem.copy(&arr, false);
    let ValueKind::Array(ArrayData::Elems(elems)) = &copy.k else { panic!() };
    assert_eq!(elems[0], a);
  }

  #[test]
  fn equality_is_structural_and_runtime_never_equal() {
    let mut types = Types::new(64);
    let mut mem = Mem::default();
    let u8t = u8_ty(&mut types);
    let x = Value::int(u8t, BigInt::from(7));
    let y = Value::int(u8t, BigInt::from(7));
    assert!(mem.equals(&x, &y));
    let rt = Value::runtime(u8t);
    assert!(!mem.equals(&rt, &rt));
    let a = mem.alloc(x.clone());
    let b = mem.alloc(y);
    let p = Value { ty: u8t, k: ValueKind::Ptr(PtrValue {
      base: PtrBase::Obj(a), mutability: PtrMut::ComptimeConst,
    }) };
    let q = Value { ty: u8t, k: ValueKind::Ptr(PtrValue {
      base: PtrBase::Obj(b), mutability: PtrMut::ComptimeConst,
    }) };
    assert!(!mem.equals(&p, &q), "pointer equality is provenance identity");
  }

  #[test]
  fn canonical_form_is_structural() {
    let mut types = Types::new(64);
    let mut mem = Mem::default();
    let u8t = u8_ty(&mut types);
    let arr_ty = types.array(u8t, 2);
    let mk = |mem: &mut Mem| {
      let a = mem.alloc(Value::int(u8t, BigInt::from(1)));
      let b = mem.alloc(Value::int(u8t, BigInt::from(2)));
      Value { ty: arr_ty, k: ValueKind::Array(ArrayData::Elems(Box::new([a, b]))) }
    };
    let v1 = mk(&mut mem);
    let v2 = mk(&mut mem);
    assert_eq!(mem.canonical(&v1), mem.canonical(&v2));
  }

  #[test]
  fn float_rounding() {
    let third = BigRational::new(BigInt::from(1), BigInt::from(3));
    let r32 = round_float(&third, 32);
    let r64 = round_float(&third, 64);
    assert_ne!(r32, third);
    assert_ne!(r64, third);
    assert_ne!(r32, r64);
    assert_eq!(round_float(&rational_from_f64(0.5), 16), rational_from_f64(0.5));
  }
}
