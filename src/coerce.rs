//! The coercion engine: decides whether a value of one type is implicitly
//! assignable to another, and performs the rewrite. The decision
//! ([`decide`]) is an ordered rule table, first match wins; the application
//! ([`coerce`]) folds comptime operands to constants of the destination
//! type and emits a `cast`-family instruction for runtime operands.

use num::{BigInt, BigRational};
use num::traits::ToPrimitive;

use crate::Compiler;
use crate::builder::IrBuilder;
use crate::types::{ErrId, NodeId, ScopeId};
use crate::types::ir::{CastOp, InstId, InstKind};
use crate::types::ty::{ErrSet, PtrInfo, PtrLen, TyId, TyKind, Types};
use crate::value::{
  Mem, PtrBase, PtrMut, PtrValue, Value, ValueKind, optional_is_ptr_like, round_float,
};

/// Why a coercion is not possible. The recursive variants drill into the
/// position that failed, which the diagnostic renderer turns into notes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mismatch {
  /// The type kinds are unrelated.
  Kind,
  /// Pointer element types differ.
  PointerChild(Box<Mismatch>),
  /// The destination discards `const` (`*const T` → `*T`).
  PointerConst,
  /// The destination discards `volatile`.
  PointerVolatile,
  /// Single-item vs unknown-length pointers.
  PointerLen,
  /// The destination requires stricter alignment than the source provides.
  PointerAlign,
  /// Sub-byte bit ranges differ.
  PointerBitRange,
  /// Slice element position failed.
  SliceChild(Box<Mismatch>),
  /// Optional child position failed.
  OptionalChild(Box<Mismatch>),
  /// Error-union payload position failed.
  ErrorUnionPayload(Box<Mismatch>),
  /// Error-union error-set position failed.
  ErrorUnionSet(Box<Mismatch>),
  /// The destination error set is missing members of the source set.
  ErrSetMissing(Vec<ErrId>),
  /// Function types with different parameter counts.
  FnParamCount,
  /// A function parameter position failed.
  FnParam(usize, Box<Mismatch>),
  /// The function return position failed.
  FnReturn(Box<Mismatch>),
  /// Calling conventions differ.
  FnCc,
  /// Array lengths differ.
  ArrayLen,
  /// Array element position failed.
  ArrayChild(Box<Mismatch>),
  /// Integer signedness prevents the conversion.
  IntSign,
  /// The destination integer is narrower.
  IntWidth,
  /// The destination float is narrower.
  FloatWidth,
  /// A comptime literal does not fit the destination type.
  LiteralNoFit,
  /// A float literal with a fractional part in integer context.
  LiteralFraction,
  /// The enum is not the union's tag type.
  UnionNotTag,
  /// The selected union field is not zero-sized.
  UnionFieldNotZeroSized,
  /// A runtime value where only a comptime value can convert.
  NotComptime,
}

/// The rewrite selected by [`decide`]. Wrapping variants recurse: the
/// operand is first coerced to the inner position's type, then wrapped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoercionKind {
  /// Rule 1: the types are equal.
  Identity,
  /// Rule 2: the source is `noreturn` and absorbs into anything.
  Unreachable,
  /// Rule 3: representation-preserving requalification.
  ConstCast,
  /// Rule 4: integer widening.
  IntWiden,
  /// Rule 5: float widening.
  FloatWiden,
  /// Rule 6: the array-to-slice family. The payload is the pointer type of
  /// the resulting slice data pointer.
  ArrayToSlice {
    /// Whether the source is a pointer to an array (vs an array value).
    from_ptr: bool,
  },
  /// Rule 7: `*[N]T` → `[*]T`.
  ArrayPtrToManyPtr,
  /// `null` → `?T`.
  NullToOptional,
  /// Rule 8: `T` → `?T`, recursing on the child.
  OptionalWrap,
  /// Rule 9: `T` → `E!T`, recursing on the payload.
  ErrUnionWrapPayload,
  /// Rule 10: `E` → `E!T`.
  ErrUnionWrapCode,
  /// Error-set widening (also reached through rule 3 on bare sets).
  ErrSetWiden,
  /// Rule 11: a comptime numeric literal that fits the destination.
  LiteralFit,
  /// Rule 12: a typed numeric constant narrowing to a literal type.
  NumberToLiteral,
  /// Rule 13: tagged union → its tag enum.
  UnionToTag,
  /// Rule 14: enum → union whose selected field is zero-sized. A noop at
  /// runtime.
  EnumToUnion,
  /// Rule 15: `undefined` converts to anything.
  Undef,
  /// Rule 16: `T` → `*const T` by materializing a const ref.
  InferredRef,
}

/// The recursive requalification check behind rule 3. `wanted` may add
/// `const`, widen error sets, and wrap non-null pointers into optionals;
/// it may not change representation.
pub fn const_cast_ok(types: &Types, wanted: TyId, actual: TyId) -> Result<(), Mismatch> {
  if wanted == actual { return Ok(()) }
  match (types.kind(wanted), types.kind(actual)) {
    (TyKind::Pointer(w), TyKind::Pointer(a)) => ptr_const_cast(types, w, a)
      .map_err(|m| match m {
        m @ (Mismatch::PointerConst | Mismatch::PointerVolatile |
          Mismatch::PointerLen | Mismatch::PointerAlign | Mismatch::PointerBitRange) => m,
        m => Mismatch::PointerChild(Box::new(m)),
      }),
    (TyKind::Slice(w), TyKind::Slice(a)) => ptr_const_cast(types, w, a)
      .map_err(|m| match m {
        m @ (Mismatch::PointerConst | Mismatch::PointerVolatile |
          Mismatch::PointerAlign | Mismatch::PointerBitRange) => m,
        m => Mismatch::SliceChild(Box::new(m)),
      }),
    // Non-null pointer into optional pointer: same representation.
    (TyKind::Optional(w), _) if optional_is_ptr_like(types, *w) &&
      matches!(types.kind(actual), TyKind::Pointer(_) | TyKind::Fn(_) | TyKind::Promise(_)) =>
      const_cast_ok(types, *w, actual).map_err(|m| Mismatch::OptionalChild(Box::new(m))),
    (TyKind::Optional(w), TyKind::Optional(a)) =>
      const_cast_ok(types, *w, *a).map_err(|m| Mismatch::OptionalChild(Box::new(m))),
    (TyKind::ErrorUnion { set: ws, payload: wp }, TyKind::ErrorUnion { set: as_, payload: ap }) => {
      const_cast_ok(types, *wp, *ap).map_err(|m| Mismatch::ErrorUnionPayload(Box::new(m)))?;
      err_set_subset(types, *ws, *as_).map_err(|m| Mismatch::ErrorUnionSet(Box::new(m)))
    }
    (TyKind::ErrorSet(_), TyKind::ErrorSet(_)) => err_set_subset(types, wanted, actual),
    (TyKind::Array { elem: we, len: wl }, TyKind::Array { elem: ae, len: al }) => {
      if wl != al { return Err(Mismatch::ArrayLen) }
      const_cast_ok(types, *we, *ae).map_err(|m| Mismatch::ArrayChild(Box::new(m)))
    }
    (TyKind::Fn(w), TyKind::Fn(a)) => {
      if w.params.len() != a.params.len() { return Err(Mismatch::FnParamCount) }
      if w.cc != a.cc { return Err(Mismatch::FnCc) }
      for (i, (wp, ap)) in w.params.iter().zip(a.params.iter()).enumerate() {
        if let (Some(wt), Some(at)) = (wp.ty, ap.ty) {
          // Parameters are contravariant.
          const_cast_ok(types, at, wt)
            .map_err(|m| Mismatch::FnParam(i, Box::new(m)))?;
        }
      }
      if let (Some(wr), Some(ar)) = (w.ret, a.ret) {
        const_cast_ok(types, wr, ar).map_err(|m| Mismatch::FnReturn(Box::new(m)))?;
      }
      Ok(())
    }
    _ => Err(Mismatch::Kind),
  }
}

fn ptr_const_cast(types: &Types, w: &PtrInfo, a: &PtrInfo) -> Result<(), Mismatch> {
  if a.is_const && !w.is_const { return Err(Mismatch::PointerConst) }
  if a.is_volatile && !w.is_volatile { return Err(Mismatch::PointerVolatile) }
  if w.len != a.len { return Err(Mismatch::PointerLen) }
  if w.bit_offset != a.bit_offset || w.host_int_bits != a.host_int_bits {
    return Err(Mismatch::PointerBitRange)
  }
  let w_align = w.align.unwrap_or_else(|| types.abi_align(w.elem));
  let a_align = a.align.unwrap_or_else(|| types.abi_align(a.elem));
  if a_align < w_align { return Err(Mismatch::PointerAlign) }
  const_cast_ok(types, w.elem, a.elem)
}

/// Whether every error of `src` is a member of `dst`. The global set
/// contains everything.
fn err_set_subset(types: &Types, dst: TyId, src: TyId) -> Result<(), Mismatch> {
  let Some(dst_list) = types.error_list(dst) else { return Ok(()) };
  match types.error_list(src) {
    None => Err(Mismatch::ErrSetMissing(vec![])),
    Some(src_list) => {
      let missing: Vec<ErrId> = src_list.iter()
        .filter(|e| !dst_list.contains(e))
        .copied()
        .collect();
      if missing.is_empty() { Ok(()) } else { Err(Mismatch::ErrSetMissing(missing)) }
    }
  }
}

/// The ordered rule table. `src_val` carries the operand's comptime value
/// when there is one; rules 11, 12, and 15 need it.
pub fn decide(
  types: &Types, src_ty: TyId, src_val: Option<&Value>, dest: TyId,
) -> Result<CoercionKind, Mismatch> {
  // 1. Identity.
  if src_ty == dest { return Ok(CoercionKind::Identity) }
  // 2. Unreachable absorbs.
  if src_ty == Types::NORETURN { return Ok(CoercionKind::Unreachable) }
  // 15 (hoisted above structural rules so `undefined` wins everywhere).
  if src_ty == Types::UNDEFINED || src_val.is_some_and(Value::is_undef) {
    return Ok(CoercionKind::Undef)
  }
  // 3. Const-cast-only requalification.
  if const_cast_ok(types, dest, src_ty).is_ok() {
    if matches!((types.kind(dest), types.kind(src_ty)),
      (TyKind::ErrorSet(_), TyKind::ErrorSet(_))) {
      return Ok(CoercionKind::ErrSetWiden)
    }
    return Ok(CoercionKind::ConstCast)
  }
  match (types.kind(dest), types.kind(src_ty)) {
    // 4. Integer widening.
    (&TyKind::Int(d), &TyKind::Int(s)) => {
      if d.signed == s.signed {
        if d.bits >= s.bits { Ok(CoercionKind::IntWiden) } else { Err(Mismatch::IntWidth) }
      } else if d.signed && !s.signed {
        if d.bits > s.bits { Ok(CoercionKind::IntWiden) } else { Err(Mismatch::IntWidth) }
      } else {
        Err(Mismatch::IntSign)
      }
    }
    // 5. Float widening.
    (&TyKind::Float(d), &TyKind::Float(s)) =>
      if d >= s { Ok(CoercionKind::FloatWiden) } else { Err(Mismatch::FloatWidth) },
    // 6. The array-to-slice family.
    (TyKind::Slice(d), &TyKind::Array { elem, .. }) => {
      // An array value only coerces to a const slice.
      if !d.is_const { return Err(Mismatch::PointerConst) }
      const_cast_ok(types, d.elem, elem).map_err(|m| Mismatch::SliceChild(Box::new(m)))?;
      Ok(CoercionKind::ArrayToSlice { from_ptr: false })
    }
    (TyKind::Slice(d), TyKind::Pointer(s))
    if s.len == PtrLen::Single && matches!(types.kind(s.elem), TyKind::Array { .. }) => {
      let &TyKind::Array { elem, .. } = types.kind(s.elem) else { unreachable!() };
      if s.is_const && !d.is_const { return Err(Mismatch::PointerConst) }
      const_cast_ok(types, d.elem, elem).map_err(|m| Mismatch::SliceChild(Box::new(m)))?;
      Ok(CoercionKind::ArrayToSlice { from_ptr: true })
    }
    (&TyKind::Optional(child), TyKind::Array { .. } | TyKind::Pointer(_))
    if matches!(types.kind(child), TyKind::Slice(_)) &&
      decide(types, src_ty, src_val, child).is_ok() =>
      Ok(CoercionKind::OptionalWrap),
    // 7. `*[N]T` → `[*]T` when alignments agree.
    (TyKind::Pointer(d), TyKind::Pointer(s))
    if d.len == PtrLen::Many && s.len == PtrLen::Single &&
      matches!(types.kind(s.elem), TyKind::Array { .. }) => {
      let &TyKind::Array { elem, .. } = types.kind(s.elem) else { unreachable!() };
      if s.is_const && !d.is_const { return Err(Mismatch::PointerConst) }
      let d_align = d.align.unwrap_or_else(|| types.abi_align(d.elem));
      let s_align = s.align.unwrap_or_else(|| types.abi_align(s.elem));
      if s_align < d_align { return Err(Mismatch::PointerAlign) }
      const_cast_ok(types, d.elem, elem).map_err(|m| Mismatch::PointerChild(Box::new(m)))?;
      Ok(CoercionKind::ArrayPtrToManyPtr)
    }
    // `null` → `?T`.
    (TyKind::Optional(_), TyKind::Null) => Ok(CoercionKind::NullToOptional),
    // 8. Optional wrap.
    (&TyKind::Optional(child), _) => {
      decide(types, src_ty, src_val, child)
        .map_err(|m| Mismatch::OptionalChild(Box::new(m)))?;
      Ok(CoercionKind::OptionalWrap)
    }
    // 10 before 9: a bare error set wraps on the error side.
    (&TyKind::ErrorUnion { set, .. }, TyKind::ErrorSet(_)) => {
      err_set_subset(types, set, src_ty)
        .map_err(|m| Mismatch::ErrorUnionSet(Box::new(m)))?;
      Ok(CoercionKind::ErrUnionWrapCode)
    }
    // 9. Payload wrap.
    (&TyKind::ErrorUnion { payload, .. }, _) => {
      decide(types, src_ty, src_val, payload)
        .map_err(|m| Mismatch::ErrorUnionPayload(Box::new(m)))?;
      Ok(CoercionKind::ErrUnionWrapPayload)
    }
    // 11. Comptime literal → any numeric type it fits.
    (&TyKind::Int(info), TyKind::ComptimeInt) => match src_val {
      Some(Value { k: ValueKind::Int(n), .. }) =>
        if info.fits(n) { Ok(CoercionKind::LiteralFit) } else { Err(Mismatch::LiteralNoFit) },
      _ => Err(Mismatch::NotComptime),
    },
    (TyKind::Float(_), TyKind::ComptimeInt) => match src_val {
      Some(Value { k: ValueKind::Int(_), .. }) => Ok(CoercionKind::LiteralFit),
      _ => Err(Mismatch::NotComptime),
    },
    (TyKind::Float(_), TyKind::ComptimeFloat) => match src_val {
      Some(Value { k: ValueKind::Float(_), .. }) => Ok(CoercionKind::LiteralFit),
      _ => Err(Mismatch::NotComptime),
    },
    (&TyKind::Int(info), TyKind::ComptimeFloat) => match src_val {
      Some(Value { k: ValueKind::Float(r), .. }) => {
        if !r.is_integer() { return Err(Mismatch::LiteralFraction) }
        if info.fits(&r.to_integer()) {
          Ok(CoercionKind::LiteralFit)
        } else {
          Err(Mismatch::LiteralNoFit)
        }
      }
      _ => Err(Mismatch::NotComptime),
    },
    (TyKind::ComptimeFloat, TyKind::ComptimeInt) => match src_val {
      Some(Value { k: ValueKind::Int(_), .. }) => Ok(CoercionKind::LiteralFit),
      _ => Err(Mismatch::NotComptime),
    },
    // 12. Typed numeric constant → literal type.
    (TyKind::ComptimeInt, TyKind::Int(_)) | (TyKind::ComptimeFloat, TyKind::Float(_)) =>
      match src_val {
        Some(v) if v.is_comptime() => Ok(CoercionKind::NumberToLiteral),
        _ => Err(Mismatch::NotComptime),
      },
    // 13. Tagged union → its tag enum.
    (TyKind::Enum(_), TyKind::Union(u)) if u.tag == Some(dest) =>
      Ok(CoercionKind::UnionToTag),
    // 14. Enum → union it tags, when the active field is zero-sized.
    (TyKind::Union(u), TyKind::Enum(_)) if u.tag == Some(src_ty) => {
      match src_val {
        Some(Value { k: ValueKind::Enum(tag), .. }) => {
          let idx = tag.to_usize().ok_or(Mismatch::UnionFieldNotZeroSized)?;
          let field = u.fields.get(idx).ok_or(Mismatch::UnionFieldNotZeroSized)?;
          if types.is_zero_size(field.ty) {
            Ok(CoercionKind::EnumToUnion)
          } else {
            Err(Mismatch::UnionFieldNotZeroSized)
          }
        }
        // Runtime enums convert only when every field is zero-sized.
        _ if u.fields.iter().all(|f| types.is_zero_size(f.ty)) =>
          Ok(CoercionKind::EnumToUnion),
        _ => Err(Mismatch::UnionFieldNotZeroSized),
      }
    }
    // 16. Inferred ref.
    (TyKind::Pointer(d), _)
    if d.len == PtrLen::Single && d.is_const && d.elem == src_ty &&
      !types.is_comptime_only(src_ty) =>
      Ok(CoercionKind::InferredRef),
    _ => Err(Mismatch::Kind),
  }
}

/// Render a mismatch chain as a note for the "expected type" diagnostic.
#[must_use] pub fn describe_mismatch(m: &Mismatch) -> String {
  match m {
    Mismatch::Kind => "the types are unrelated".into(),
    Mismatch::PointerChild(m) => format!("pointer child: {}", describe_mismatch(m)),
    Mismatch::PointerConst => "cast discards const qualifier".into(),
    Mismatch::PointerVolatile => "cast discards volatile qualifier".into(),
    Mismatch::PointerLen => "pointer length kinds differ".into(),
    Mismatch::PointerAlign => "cast increases pointer alignment".into(),
    Mismatch::PointerBitRange => "pointer bit ranges differ".into(),
    Mismatch::SliceChild(m) => format!("slice element: {}", describe_mismatch(m)),
    Mismatch::OptionalChild(m) => format!("optional child: {}", describe_mismatch(m)),
    Mismatch::ErrorUnionPayload(m) => format!("payload: {}", describe_mismatch(m)),
    Mismatch::ErrorUnionSet(m) => format!("error set: {}", describe_mismatch(m)),
    Mismatch::ErrSetMissing(_) => "destination error set is missing errors".into(),
    Mismatch::FnParamCount => "parameter counts differ".into(),
    Mismatch::FnParam(i, m) => format!("parameter {i}: {}", describe_mismatch(m)),
    Mismatch::FnReturn(m) => format!("return type: {}", describe_mismatch(m)),
    Mismatch::FnCc => "calling conventions differ".into(),
    Mismatch::ArrayLen => "array lengths differ".into(),
    Mismatch::ArrayChild(m) => format!("array element: {}", describe_mismatch(m)),
    Mismatch::IntSign => "signed/unsigned mismatch".into(),
    Mismatch::IntWidth => "destination integer is narrower".into(),
    Mismatch::FloatWidth => "destination float is narrower".into(),
    Mismatch::LiteralNoFit => "literal out of range".into(),
    Mismatch::LiteralFraction => "fractional part in integer context".into(),
    Mismatch::UnionNotTag => "enum is not the union's tag".into(),
    Mismatch::UnionFieldNotZeroSized => "selected union field carries a payload".into(),
    Mismatch::NotComptime => "value is not comptime-known".into(),
  }
}

/// Fold a comptime value through a coercion. The decision must have come
/// from [`decide`] on the same value.
pub fn apply_static(
  types: &mut Types, mem: &mut Mem, v: &Value, dest: TyId, kind: &CoercionKind,
) -> Value {
  match kind {
    CoercionKind::Identity | CoercionKind::Unreachable => v.clone(),
    CoercionKind::ConstCast | CoercionKind::ErrSetWiden |
    CoercionKind::ArrayPtrToManyPtr =>
      Value { ty: dest, k: v.k.clone() },
    CoercionKind::Undef => Value::undef(dest),
    CoercionKind::IntWiden | CoercionKind::NumberToLiteral => match &v.k {
      ValueKind::Int(n) => Value::int(dest, n.clone()),
      ValueKind::Float(r) => Value::float(dest, r.clone()),
      k => panic!("numeric coercion on {k:?}"),
    },
    CoercionKind::FloatWiden => match (&v.k, types.kind(dest)) {
      (ValueKind::Float(r), &TyKind::Float(bits)) =>
        Value::float(dest, round_float(r, bits)),
      _ => panic!("float widening on non-float"),
    },
    CoercionKind::LiteralFit => match (&v.k, types.kind(dest)) {
      (ValueKind::Int(n), TyKind::Int(_)) => Value::int(dest, n.clone()),
      (ValueKind::Int(n), &TyKind::Float(bits)) =>
        Value::float(dest, round_float(&BigRational::from_integer(n.clone()), bits)),
      (ValueKind::Int(n), TyKind::ComptimeFloat) =>
        Value::float(dest, BigRational::from_integer(n.clone())),
      (ValueKind::Float(r), &TyKind::Float(bits)) =>
        Value::float(dest, round_float(r, bits)),
      (ValueKind::Float(r), TyKind::Int(_)) => Value::int(dest, r.to_integer()),
      _ => panic!("literal fit on non-literal"),
    },
    CoercionKind::ArrayToSlice { from_ptr } => {
      let (array_obj, elem_count, is_const) = if *from_ptr {
        let ValueKind::Ptr(p) = &v.k else { panic!("array pointer expected") };
        let obj = mem.pointee(p.base, types);
        let &TyKind::Array { len, .. } = types.kind(mem.get(obj).ty) else {
          panic!("array pointee expected")
        };
        (obj, len, p.mutability == PtrMut::ComptimeConst)
      } else {
        let obj = mem.alloc(v.clone());
        let &TyKind::Array { len, .. } = types.kind(v.ty) else {
          panic!("array value expected")
        };
        (obj, len, true)
      };
      make_slice_value(types, mem, dest, array_obj, 0, elem_count, is_const)
    }
    CoercionKind::NullToOptional => {
      let &TyKind::Optional(child) = types.kind(dest) else { panic!("optional expected") };
      if optional_is_ptr_like(types, child) {
        Value { ty: dest, k: ValueKind::Ptr(PtrValue {
          base: PtrBase::Addr(0), mutability: PtrMut::ComptimeConst,
        }) }
      } else {
        Value { ty: dest, k: ValueKind::Optional(None) }
      }
    }
    CoercionKind::OptionalWrap => {
      let &TyKind::Optional(child) = types.kind(dest) else { panic!("optional expected") };
      let inner_kind = decide(types, v.ty, Some(v), child).expect("decided before");
      let inner = apply_static(types, mem, v, child, &inner_kind);
      if optional_is_ptr_like(types, child) {
        Value { ty: dest, k: inner.k }
      } else {
        let obj = mem.alloc(inner);
        Value { ty: dest, k: ValueKind::Optional(Some(obj)) }
      }
    }
    CoercionKind::ErrUnionWrapPayload => {
      let &TyKind::ErrorUnion { payload, .. } = types.kind(dest) else {
        panic!("error union expected")
      };
      let inner_kind = decide(types, v.ty, Some(v), payload).expect("decided before");
      let inner = apply_static(types, mem, v, payload, &inner_kind);
      let obj = mem.alloc(inner);
      Value { ty: dest, k: ValueKind::ErrUnion(Ok(obj)) }
    }
    CoercionKind::ErrUnionWrapCode => {
      let ValueKind::ErrorCode(e) = v.k else { panic!("error code expected") };
      Value { ty: dest, k: ValueKind::ErrUnion(Err(e)) }
    }
    CoercionKind::UnionToTag => {
      let ValueKind::Union { ref tag, .. } = v.k else { panic!("union expected") };
      Value { ty: dest, k: ValueKind::Enum(tag.clone()) }
    }
    CoercionKind::EnumToUnion => {
      let ValueKind::Enum(ref tag) = v.k else { panic!("enum expected") };
      let payload = mem.alloc(Value::void());
      Value { ty: dest, k: ValueKind::Union { tag: tag.clone(), payload } }
    }
    CoercionKind::InferredRef => {
      let obj = mem.alloc(v.clone());
      Value { ty: dest, k: ValueKind::Ptr(PtrValue {
        base: PtrBase::Obj(obj), mutability: PtrMut::ComptimeConst,
      }) }
    }
  }
}

/// Build the comptime `{ptr, len}` value of a slice into `array_obj`.
pub fn make_slice_value(
  types: &mut Types, mem: &mut Mem, slice_ty: TyId,
  array_obj: crate::types::ObjId, start: usize, len: u64, is_const: bool,
) -> Value {
  let usize_ty = types.usize();
  let mutability = if is_const { PtrMut::ComptimeConst } else { PtrMut::ComptimeVar };
  let data_ptr_ty = {
    let info = *types.ptr_info(slice_ty).expect("slice type expected");
    types.ptr(PtrInfo { len: PtrLen::Many, ..info })
  };
  let ptr = mem.alloc(Value { ty: data_ptr_ty, k: ValueKind::Ptr(PtrValue {
    base: PtrBase::ArrayElem { array: array_obj, index: start, c_str: false },
    mutability,
  }) });
  let len_obj = mem.alloc(Value::int(usize_ty, BigInt::from(len)));
  Value { ty: slice_ty, k: ValueKind::Struct(Box::new([ptr, len_obj])) }
}

/// The runtime cast opcode for a coercion kind, when one is needed.
#[must_use] fn runtime_cast_op(kind: &CoercionKind) -> Option<CastOp> {
  match kind {
    CoercionKind::Identity | CoercionKind::Unreachable => None,
    CoercionKind::ConstCast | CoercionKind::ArrayPtrToManyPtr |
    // Per the source's choice, enum → zero-payload union stays a noop.
    CoercionKind::EnumToUnion => Some(CastOp::Noop),
    CoercionKind::IntWiden => Some(CastOp::IntWiden),
    CoercionKind::FloatWiden => Some(CastOp::FloatWiden),
    CoercionKind::ArrayToSlice { .. } => Some(CastOp::ArrayToSlice),
    CoercionKind::NullToOptional | CoercionKind::OptionalWrap => Some(CastOp::OptionalWrap),
    CoercionKind::ErrUnionWrapPayload => Some(CastOp::ErrUnionWrapPayload),
    CoercionKind::ErrUnionWrapCode => Some(CastOp::ErrUnionWrapCode),
    CoercionKind::ErrSetWiden => Some(CastOp::ErrSetWiden),
    CoercionKind::UnionToTag => Some(CastOp::UnionToTag),
    CoercionKind::InferredRef => Some(CastOp::InferredRef),
    CoercionKind::LiteralFit | CoercionKind::NumberToLiteral | CoercionKind::Undef =>
      unreachable!("comptime-only coercions never reach runtime emission"),
  }
}

/// Coerce the analyzed instruction `inst` to `dest`, emitting into `b`. On
/// mismatch a diagnostic is emitted and `Err(())` returned; the caller
/// substitutes an invalid result.
pub fn coerce(
  comp: &mut Compiler, b: &mut IrBuilder, inst: InstId, dest: TyId,
  scope: ScopeId, node: NodeId,
) -> Result<InstId, ()> {
  let src_ty = b.exec.insts[inst].value.ty;
  if src_ty == Types::INVALID || dest == Types::INVALID { return Err(()) }
  let src_val = b.exec.insts[inst].value.clone();
  let src_for_decide = if src_val.is_comptime() { Some(&src_val) } else { None };
  match decide(&comp.types, src_ty, src_for_decide, dest) {
    Ok(CoercionKind::Identity | CoercionKind::Unreachable) => Ok(inst),
    Ok(kind) => {
      if src_val.is_comptime() {
        let folded = apply_static(&mut comp.types, &mut comp.mem, &src_val, dest, &kind);
        Ok(b.const_gen(scope, node, folded))
      } else {
        let op = runtime_cast_op(&kind).expect("runtime coercion with no cast op");
        Ok(b.append_gen(scope, node,
          InstKind::Cast { op, operand: inst, dest }, Value::runtime(dest)))
      }
    }
    Err(m) => {
      let span = comp.ast.span(node);
      let wanted = comp.types.name(dest, &comp.syms);
      let found = comp.types.name(src_ty, &comp.syms);
      let h = comp.emit_error(span, format!("expected type '{wanted}', found '{found}'"));
      comp.diags.add_note(h, span, describe_mismatch(&m));
      if let Mismatch::ErrSetMissing(missing) = &m {
        for &e in missing {
          let name = comp.syms.name(comp.errors.name(e)).to_owned();
          comp.diags.add_note(h, span, format!("'error.{name}' not a member of destination"));
        }
      }
      Err(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::IntInfo;

  fn mk_types() -> Types { Types::new(64) }

  fn int(types: &mut Types, signed: bool, bits: u16) -> TyId {
    types.int(IntInfo { signed, bits })
  }

  #[test]
  fn identity_first() {
    let mut types = mk_types();
    let i32t = int(&mut types, true, 32);
    assert_eq!(decide(&types, i32t, None, i32t), Ok(CoercionKind::Identity));
  }

  #[test]
  fn unreachable_absorbs() {
    let mut types = mk_types();
    let i32t = int(&mut types, true, 32);
    assert_eq!(decide(&types, Types::NORETURN, None, i32t), Ok(CoercionKind::Unreachable));
  }

  #[test]
  fn const_cast_adds_const_only() {
    let mut types = mk_types();
    let u8t = int(&mut types, false, 8);
    let mut_ptr = types.ptr(PtrInfo::single(u8t, false));
    let const_ptr = types.ptr(PtrInfo::single(u8t, true));
    assert_eq!(decide(&types, mut_ptr, None, const_ptr), Ok(CoercionKind::ConstCast));
    assert!(matches!(decide(&types, const_ptr, None, mut_ptr),
      Err(Mismatch::PointerConst) | Err(Mismatch::Kind)));
  }

  #[test]
  fn int_widening_rules() {
    let mut types = mk_types();
    let u8t = int(&mut types, false, 8);
    let u16t = int(&mut types, false, 16);
    let i8t = int(&mut types, true, 8);
    let i16t = int(&mut types, true, 16);
    assert_eq!(decide(&types, u8t, None, u16t), Ok(CoercionKind::IntWiden));
    assert_eq!(decide(&types, u16t, None, u8t), Err(Mismatch::IntWidth));
    // unsigned → signed only when strictly wider
    assert_eq!(decide(&types, u8t, None, i16t), Ok(CoercionKind::IntWiden));
    assert_eq!(decide(&types, u8t, None, i8t), Err(Mismatch::IntWidth));
    assert_eq!(decide(&types, i8t, None, u16t), Err(Mismatch::IntSign));
  }

  #[test]
  fn array_to_slice_requires_const() {
    let mut types = mk_types();
    let i32t = int(&mut types, true, 32);
    let arr = types.array(i32t, 3);
    let const_slice = types.slice(PtrInfo::many(i32t, true));
    let mut_slice = types.slice(PtrInfo::many(i32t, false));
    assert_eq!(decide(&types, arr, None, const_slice),
      Ok(CoercionKind::ArrayToSlice { from_ptr: false }));
    assert_eq!(decide(&types, arr, None, mut_slice), Err(Mismatch::PointerConst));
    // `*[N]T` → `[]T` is allowed when the pointer is mutable.
    let arr_ptr = types.ptr(PtrInfo::single(arr, false));
    assert_eq!(decide(&types, arr_ptr, None, mut_slice),
      Ok(CoercionKind::ArrayToSlice { from_ptr: true }));
  }

  #[test]
  fn empty_array_coerces_to_any_const_slice() {
    let mut types = mk_types();
    let i32t = int(&mut types, true, 32);
    let empty = types.array(i32t, 0);
    let slice = types.slice(PtrInfo::many(i32t, true));
    assert_eq!(decide(&types, empty, None, slice),
      Ok(CoercionKind::ArrayToSlice { from_ptr: false }));
  }

  #[test]
  fn null_goes_to_optional_not_to_payload() {
    let mut types = mk_types();
    let i32t = int(&mut types, true, 32);
    let opt = types.optional(i32t);
    assert_eq!(decide(&types, Types::NULL, None, opt), Ok(CoercionKind::NullToOptional));
    assert!(decide(&types, Types::NULL, None, i32t).is_err());
  }

  #[test]
  fn literal_fit_and_reject() {
    let mut types = mk_types();
    let u8t = int(&mut types, false, 8);
    let v200 = Value::comptime_int(BigInt::from(200));
    let v300 = Value::comptime_int(BigInt::from(300));
    assert_eq!(decide(&types, Types::COMPTIME_INT, Some(&v200), u8t),
      Ok(CoercionKind::LiteralFit));
    assert_eq!(decide(&types, Types::COMPTIME_INT, Some(&v300), u8t),
      Err(Mismatch::LiteralNoFit));
  }

  #[test]
  fn float_literal_with_fraction_rejected_in_int_context() {
    let mut types = mk_types();
    let i32t = int(&mut types, true, 32);
    let half = Value::float(Types::COMPTIME_FLOAT,
      BigRational::new(BigInt::from(1), BigInt::from(2)));
    assert_eq!(decide(&types, Types::COMPTIME_FLOAT, Some(&half), i32t),
      Err(Mismatch::LiteralFraction));
    let two = Value::float(Types::COMPTIME_FLOAT, BigRational::from_integer(BigInt::from(2)));
    assert_eq!(decide(&types, Types::COMPTIME_FLOAT, Some(&two), i32t),
      Ok(CoercionKind::LiteralFit));
  }

  #[test]
  fn undefined_converts_to_anything() {
    let mut types = mk_types();
    let i32t = int(&mut types, true, 32);
    let slice = types.slice(PtrInfo::many(i32t, true));
    assert_eq!(decide(&types, Types::UNDEFINED, None, i32t), Ok(CoercionKind::Undef));
    assert_eq!(decide(&types, Types::UNDEFINED, None, slice), Ok(CoercionKind::Undef));
  }

  #[test]
  fn error_set_widening_and_missing_members() {
    let mut types = mk_types();
    let (a, b, c) = (ErrId(0), ErrId(1), ErrId(2));
    let small = types.error_set(vec![a, b]);
    let big = types.error_set(vec![a, b, c]);
    assert_eq!(decide(&types, small, None, big), Ok(CoercionKind::ErrSetWiden));
    assert_eq!(decide(&types, big, None, small),
      Err(Mismatch::ErrSetMissing(vec![c])));
    assert_eq!(decide(&types, small, None, Types::GLOBAL_ERROR_SET),
      Ok(CoercionKind::ErrSetWiden));
  }

  #[test]
  fn alignment_monotonicity() {
    // P7: a successful pointer coercion never increases alignment.
    let mut types = mk_types();
    let u8t = int(&mut types, false, 8);
    let hi = types.ptr(PtrInfo { align: Some(8), ..PtrInfo::single(u8t, true) });
    let lo = types.ptr(PtrInfo { align: Some(1), ..PtrInfo::single(u8t, true) });
    assert_eq!(decide(&types, hi, None, lo), Ok(CoercionKind::ConstCast));
    assert_eq!(decide(&types, lo, None, hi), Err(Mismatch::PointerAlign));
  }

  #[test]
  fn static_identity_preserved_exactly() {
    // P3: coercing a value to its own type is the value itself.
    let mut types = mk_types();
    let mut mem = Mem::default();
    let i32t = int(&mut types, true, 32);
    let v = Value::int(i32t, BigInt::from(-7));
    let k = decide(&types, i32t, Some(&v), i32t).unwrap();
    assert_eq!(apply_static(&mut types, &mut mem, &v, i32t, &k), v);
  }

  #[test]
  fn widening_confluence() {
    // P4: u8 → u16 → u32 equals u8 → u32 for a constant.
    let mut types = mk_types();
    let mut mem = Mem::default();
    let u8t = int(&mut types, false, 8);
    let u16t = int(&mut types, false, 16);
    let u32t = int(&mut types, false, 32);
    let v = Value::int(u8t, BigInt::from(200));
    let k1 = decide(&types, u8t, Some(&v), u16t).unwrap();
    let mid = apply_static(&mut types, &mut mem, &v, u16t, &k1);
    let k2 = decide(&types, u16t, Some(&mid), u32t).unwrap();
    let two_step = apply_static(&mut types, &mut mem, &mid, u32t, &k2);
    let k = decide(&types, u8t, Some(&v), u32t).unwrap();
    let one_step = apply_static(&mut types, &mut mem, &v, u32t, &k);
    assert_eq!(two_step, one_step);
  }

  #[test]
  fn undef_preserved_through_wrapping() {
    let mut types = mk_types();
    let mut mem = Mem::default();
    let i32t = int(&mut types, true, 32);
    let opt = types.optional(i32t);
    let v = Value::undef(i32t);
    let k = decide(&types, i32t, Some(&v), opt).unwrap();
    assert_eq!(k, CoercionKind::Undef);
    assert!(apply_static(&mut types, &mut mem, &v, opt, &k).is_undef());
  }

  #[test]
  fn optional_wrap_of_pointer_keeps_repr() {
    let mut types = mk_types();
    let mut mem = Mem::default();
    let u8t = int(&mut types, false, 8);
    let p = types.ptr(PtrInfo::single(u8t, true));
    let opt = types.optional(p);
    let obj = mem.alloc(Value::int(u8t, BigInt::from(1)));
    let v = Value { ty: p, k: ValueKind::Ptr(PtrValue {
      base: PtrBase::Obj(obj), mutability: PtrMut::ComptimeConst,
    }) };
    let k = decide(&types, p, Some(&v), opt).unwrap();
    let wrapped = apply_static(&mut types, &mut mem, &v, opt, &k);
    assert!(matches!(wrapped.k, ValueKind::Ptr(_)), "pointer-like optionals stay pointers");
    assert_eq!(wrapped.ty, opt);
  }
}
