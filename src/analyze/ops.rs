//! Per-opcode analysis for arithmetic, comparisons, shifts, pointer and
//! aggregate addressing, overflow intrinsics, and atomics.

use num::{BigInt, BigRational, Signed, Zero};
use num::traits::ToPrimitive;

use crate::types::IntInfo;
use crate::types::ir::{BinOp, InstId, InstKind, OverflowOp, UnOp};
use crate::types::ty::{PtrInfo, PtrLen, TyId, TyKind, Types};
use crate::value::{ArrayData, PtrBase, PtrMut, PtrValue, Value, ValueKind};
use crate::peer::PeerCand;
use super::Analyzer;

/// `AtomicOrder` tag values, matching the builtin enum declaration order.
mod order {
  pub const MONOTONIC: u64 = 1;
  pub const ACQUIRE: u64 = 2;
  pub const RELEASE: u64 = 3;
  pub const ACQ_REL: u64 = 4;
}

impl Analyzer<'_> {
  // ---- binary operations ---------------------------------------------

  pub(super) fn analyze_bin_op(&mut self, id: InstId, op: BinOp, lhs: InstId, rhs: InstId) {
    let lv = self.operand_val(lhs);
    let rv = self.operand_val(rhs);
    if lv.ty == Types::INVALID || rv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    if op.is_cmp() {
      self.analyze_cmp(id, op, lhs, rhs)
    } else if op.is_shift() {
      self.analyze_shift(id, op, lhs, rhs)
    } else {
      self.analyze_math(id, op, lhs, rhs)
    }
  }

  fn peer_operands(&mut self, id: InstId, lhs: InstId, rhs: InstId) -> TyId {
    let node = self.old_inst(id).node;
    let cands: Vec<PeerCand> = [lhs, rhs].iter().map(|&o| {
      let v = self.operand_val(o);
      PeerCand {
        ty: v.ty,
        value: v.is_comptime().then(|| v.clone()),
        node: self.old_inst(o).node,
      }
    }).collect();
    crate::peer::resolve_peer_types(self.comp, None, &cands, node)
  }

  fn analyze_cmp(&mut self, id: InstId, op: BinOp, lhs: InstId, rhs: InstId) {
    let lv = self.operand_val(lhs);
    let rv = self.operand_val(rhs);
    // An unsigned operand compared against a constant zero folds eagerly,
    // even for runtime operands.
    if let Some(b) = self.unsigned_zero_cmp(op, &lv, &rv) {
      self.emit_const(id, Value::bool(b));
      return
    }
    // Error-set comparisons have their own comptime rules.
    if matches!(self.comp.types.kind(lv.ty), TyKind::ErrorSet(_)) &&
      matches!(self.comp.types.kind(rv.ty), TyKind::ErrorSet(_)) {
      if !op.is_eq_cmp() {
        self.err_at(id, "operator not allowed for error sets");
        return
      }
      let l_list = self.comp.types.error_list(lv.ty).map(<[_]>::to_vec);
      let r_list = self.comp.types.error_list(rv.ty).map(<[_]>::to_vec);
      if l_list.as_ref().is_some_and(Vec::is_empty) ||
        r_list.as_ref().is_some_and(Vec::is_empty) {
        self.emit_const(id, Value::bool(op == BinOp::CmpNeq));
        return
      }
      if let (Some(l), Some(r)) = (&l_list, &r_list) {
        if !l.iter().any(|e| r.contains(e)) {
          let a = self.comp.types.name(lv.ty, &self.comp.syms);
          let b = self.comp.types.name(rv.ty, &self.comp.syms);
          self.err_at(id,
            format!("error sets '{a}' and '{b}' have no common errors"));
          return
        }
      }
    }
    let common = self.peer_operands(id, lhs, rhs);
    if common == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let eq_only = matches!(self.comp.types.kind(common),
      TyKind::Bool | TyKind::Pointer(_) | TyKind::Enum(_) | TyKind::ErrorSet(_) |
      TyKind::Fn(_) | TyKind::Optional(_) | TyKind::Promise(_));
    let numeric = matches!(self.comp.types.kind(common),
      TyKind::Int(_) | TyKind::Float(_) | TyKind::ComptimeInt | TyKind::ComptimeFloat);
    if !numeric && !eq_only {
      let name = self.comp.types.name(common, &self.comp.syms);
      self.err_at(id, format!("operator not allowed for type '{name}'"));
      return
    }
    if eq_only && !op.is_eq_cmp() {
      let name = self.comp.types.name(common, &self.comp.syms);
      self.err_at(id, format!("operator not allowed for type '{name}'"));
      return
    }
    let li = self.use_of(lhs);
    let ri = self.use_of(rhs);
    let li = self.coerce_to(id, li, common);
    let ri = self.coerce_to(id, ri, common);
    let la = self.value_of(li).clone();
    let ra = self.value_of(ri).clone();
    if la.is_undef() || ra.is_undef() {
      self.err_at(id, "use of undefined value");
      return
    }
    if la.is_comptime() && ra.is_comptime() {
      let r = match (&la.k, &ra.k) {
        (ValueKind::Int(a), ValueKind::Int(b)) |
        (ValueKind::Enum(a), ValueKind::Enum(b)) => cmp_order(op, a.cmp(b)),
        // IEEE semantics on exact rationals: -0 and 0 are the same number.
        (ValueKind::Float(a), ValueKind::Float(b)) => cmp_order(op, a.cmp(b)),
        (ValueKind::Bool(a), ValueKind::Bool(b)) =>
          if op == BinOp::CmpEq { a == b } else { a != b },
        (ValueKind::ErrorCode(a), ValueKind::ErrorCode(b)) =>
          if op == BinOp::CmpEq { a == b } else { a != b },
        _ => {
          let same = self.comp.mem.equals(&la, &ra);
          if op == BinOp::CmpEq { same } else { !same }
        }
      };
      self.emit_const(id, Value::bool(r));
    } else {
      self.emit(id, InstKind::BinOp { op, lhs: li, rhs: ri }, Value::runtime(Types::BOOL));
    }
  }

  /// `x < 0` on an unsigned `x` is false, `x >= 0` is true, in either
  /// operand order; known regardless of `x`'s runtime value.
  fn unsigned_zero_cmp(&self, op: BinOp, lv: &Value, rv: &Value) -> Option<bool> {
    let unsigned = |v: &Value| matches!(self.comp.types.kind(v.ty),
      TyKind::Int(IntInfo { signed: false, .. }));
    let zero = |v: &Value| v.as_int().is_some_and(Zero::is_zero);
    if unsigned(lv) && zero(rv) {
      return match op {
        BinOp::CmpLt => Some(false),
        BinOp::CmpGte => Some(true),
        _ => None,
      }
    }
    if zero(lv) && unsigned(rv) {
      return match op {
        BinOp::CmpGt => Some(false),
        BinOp::CmpLte => Some(true),
        _ => None,
      }
    }
    None
  }

  fn analyze_shift(&mut self, id: InstId, op: BinOp, lhs: InstId, rhs: InstId) {
    let lv = self.operand_val(lhs);
    let info = match self.comp.types.kind(lv.ty) {
      &TyKind::Int(info) => Some(info),
      TyKind::ComptimeInt => None,
      _ => {
        let name = self.comp.types.name(lv.ty, &self.comp.syms);
        self.err_at(id, format!("bit shifting operation expected integer type, found '{name}'"));
        return
      }
    };
    // The shift amount type is `u$log2(bits)` for sized integers.
    let shift_ty = match info {
      Some(info) => {
        let bits = info.shift_bits().max(1);
        self.comp.types.int(IntInfo { signed: false, bits })
      }
      None => Types::COMPTIME_INT,
    };
    let rv = self.operand_val(rhs);
    if let Some(n) = rv.as_int() {
      if n.is_negative() {
        self.err_at(id, "shift by negative value");
        return
      }
      if let Some(info) = info {
        let shift_info = IntInfo { signed: false, bits: info.shift_bits().max(1) };
        if !shift_info.fits(n) {
          self.err_at(id, format!(
            "shift amount {n} does not fit in shift-amount type '{shift_info}'"));
          return
        }
      }
    }
    let li = self.use_of(lhs);
    let ri = self.use_of(rhs);
    let ri = self.coerce_to(id, ri, shift_ty);
    let la = self.value_of(li).clone();
    let ra = self.value_of(ri).clone();
    if la.is_undef() || ra.is_undef() {
      self.err_at(id, "use of undefined value");
      return
    }
    match (la.as_int(), ra.as_int()) {
      (Some(a), Some(bn)) => {
        let k = bn.to_u64().unwrap_or(u64::MAX) as usize;
        let folded = match op {
          BinOp::Shl | BinOp::ShlExact => {
            let full: BigInt = a << k;
            match info {
              Some(info) if !info.fits(&full) => {
                if op == BinOp::ShlExact {
                  self.err_at(id, "exact shift shifted out 1 bits");
                } else {
                  self.err_at(id, "operation caused overflow");
                }
                return
              }
              _ => full,
            }
          }
          BinOp::Shr => a >> k,
          _ => unreachable!("not a shift"),
        };
        self.emit_const(id, Value::int(lv.ty, folded));
      }
      _ => {
        self.emit(id, InstKind::BinOp { op, lhs: li, rhs: ri }, Value::runtime(lv.ty));
      }
    }
  }

  fn analyze_math(&mut self, id: InstId, op: BinOp, lhs: InstId, rhs: InstId) {
    let common = self.peer_operands(id, lhs, rhs);
    if common == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let kind = self.comp.types.kind(common).clone();
    let (is_int, is_float, info) = match kind {
      TyKind::Int(info) => (true, false, Some(info)),
      TyKind::ComptimeInt => (true, false, None),
      TyKind::Float(_) | TyKind::ComptimeFloat => (false, true, None),
      _ => {
        let name = self.comp.types.name(common, &self.comp.syms);
        self.err_at(id, format!("invalid operands to binary expression: '{name}'"));
        return
      }
    };
    if op.is_bitwise() && !is_int {
      let name = self.comp.types.name(common, &self.comp.syms);
      self.err_at(id, format!("invalid operands to binary expression: '{name}'"));
      return
    }
    let signed = info.map_or(is_int, |i| i.signed);
    let li = self.use_of(lhs);
    let ri = self.use_of(rhs);
    let li = self.coerce_to(id, li, common);
    let ri = self.coerce_to(id, ri, common);
    let la = self.value_of(li).clone();
    let ra = self.value_of(ri).clone();
    if la.is_undef() || ra.is_undef() {
      self.err_at(id, "use of undefined value");
      return
    }
    let both_static = la.is_comptime() && ra.is_comptime();
    // Signed `/` and `%` must be disambiguated unless folding proves the
    // roundings agree.
    if is_int && signed {
      match op {
        BinOp::Div if !both_static => {
          self.err_at(id,
            "signed integers must use @divTrunc, @divFloor, or @divExact");
          return
        }
        BinOp::RemUnspec if !both_static => {
          self.err_at(id, "signed values must use @rem or @mod");
          return
        }
        _ => {}
      }
    }
    if is_float && matches!(op, BinOp::RemUnspec) && !both_static {
      self.err_at(id, "floats must use @rem or @mod");
      return
    }
    if both_static {
      if is_int {
        let (Some(a), Some(b)) = (la.as_int(), ra.as_int()) else {
          self.err_at(id, "unable to evaluate constant expression");
          return
        };
        match fold_int(op, info, a, b) {
          Ok(n) => { self.emit_const(id, Value::int(common, n)); }
          Err(msg) => { self.err_at(id, msg); }
        }
      } else {
        let (ValueKind::Float(a), ValueKind::Float(b)) = (&la.k, &ra.k) else {
          self.err_at(id, "unable to evaluate constant expression");
          return
        };
        match fold_float(op, a, b) {
          Ok(r) => {
            let r = match self.comp.types.kind(common) {
              &TyKind::Float(bits) => crate::value::round_float(&r, bits),
              _ => r,
            };
            self.emit_const(id, Value::float(common, r));
          }
          Err(msg) => { self.err_at(id, msg); }
        }
      }
    } else {
      self.emit(id, InstKind::BinOp { op, lhs: li, rhs: ri }, Value::runtime(common));
    }
  }

}

/// Fold an integer math operation, detecting overflow for sized types and
/// enforcing the division/remainder discipline.
pub(crate) fn fold_int(
  op: BinOp, info: Option<IntInfo>, a: &BigInt, b: &BigInt,
) -> Result<BigInt, String> {
  let wrap = |n: BigInt| info.map_or_else(|| n.clone(), |i| i.wrap(&n));
  let check = |n: BigInt| match info {
    Some(i) if !i.fits(&n) => Err("operation caused overflow".to_owned()),
    _ => Ok(n),
  };
  match op {
    BinOp::Add => check(a + b),
    BinOp::Sub => check(a - b),
    BinOp::Mul => check(a * b),
    BinOp::AddWrap => Ok(wrap(a + b)),
    BinOp::SubWrap => Ok(wrap(a - b)),
    BinOp::MulWrap => Ok(wrap(a * b)),
    BinOp::Div => {
      if b.is_zero() { return Err("division by zero".into()) }
      let (t, f) = (div_trunc(a, b), div_floor(a, b));
      if t != f {
        return Err("signed integers must use @divTrunc, @divFloor, or @divExact".into())
      }
      check(t)
    }
    BinOp::DivTrunc => {
      if b.is_zero() { return Err("division by zero".into()) }
      check(div_trunc(a, b))
    }
    BinOp::DivFloor => {
      if b.is_zero() { return Err("division by zero".into()) }
      check(div_floor(a, b))
    }
    BinOp::DivExact => {
      if b.is_zero() { return Err("division by zero".into()) }
      let q = div_trunc(a, b);
      if &q * b != *a {
        return Err("exact division had a remainder".into())
      }
      check(q)
    }
    BinOp::RemUnspec => {
      if b.is_zero() { return Err("division by zero".into()) }
      let (r, m) = (rem_trunc(a, b), rem_floor(a, b));
      if r != m { return Err("signed values must use @rem or @mod".into()) }
      Ok(r)
    }
    BinOp::Rem => {
      if b.is_zero() { return Err("division by zero".into()) }
      if b.is_negative() { return Err("remainder division by negative denominator".into()) }
      Ok(rem_trunc(a, b))
    }
    BinOp::Mod => {
      if b.is_zero() { return Err("division by zero".into()) }
      if b.is_negative() { return Err("remainder division by negative denominator".into()) }
      Ok(rem_floor(a, b))
    }
    BinOp::BitAnd => Ok(wrap(a & b)),
    BinOp::BitOr => Ok(wrap(a | b)),
    BinOp::BitXor => Ok(wrap(a ^ b)),
    _ => unreachable!("not a math op: {op:?}"),
}
}

impl Analyzer<'_> {
  // ---- unary operations ----------------------------------------------

  pub(super) fn analyze_un_op(&mut self, id: InstId, op: UnOp, operand: InstId) {
    let v = self.operand_val(operand);
    if v.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    match op {
      UnOp::OptionalType => {
        let Some(t) = self.require_static(id, operand).and_then(|v| v.as_ty()) else {
          self.err_at(id, "expected type expression");
          return
        };
        let opt = self.comp.types.optional(t);
        self.emit_const(id, Value::ty(opt));
      }
      UnOp::BoolNot => {
        let i = self.use_of(operand);
        let i = self.coerce_to(id, i, Types::BOOL);
        match self.value_of(i).as_bool() {
          Some(b) => { self.emit_const(id, Value::bool(!b)); }
          None if self.value_of(i).is_undef() => {
            self.err_at(id, "use of undefined value");
          }
          None => {
            self.emit(id, InstKind::UnOp { op, operand: i }, Value::runtime(Types::BOOL));
          }
        }
      }
      UnOp::Neg | UnOp::NegWrap => {
        let info = match self.comp.types.kind(v.ty) {
          &TyKind::Int(info) => {
            if !info.signed && op == UnOp::Neg {
              let name = self.comp.types.name(v.ty, &self.comp.syms);
              self.err_at(id, format!("negation of type '{name}'"));
              return
            }
            Some(info)
          }
          TyKind::ComptimeInt | TyKind::ComptimeFloat | TyKind::Float(_) => None,
          _ => {
            let name = self.comp.types.name(v.ty, &self.comp.syms);
            self.err_at(id, format!("negation of type '{name}'"));
            return
          }
        };
        if v.is_undef() {
          self.err_at(id, "use of undefined value");
          return
        }
        match &v.k {
          ValueKind::Int(n) => {
            let neg = -n;
            match info {
              Some(i) if !i.fits(&neg) => {
                if op == UnOp::NegWrap {
                  self.emit_const(id, Value::int(v.ty, i.wrap(&neg)));
                } else {
                  self.err_at(id, "operation caused overflow");
                }
              }
              _ => { self.emit_const(id, Value::int(v.ty, neg)); }
            }
          }
          ValueKind::Float(r) => { self.emit_const(id, Value::float(v.ty, -r)); }
          _ => {
            let i = self.use_of(operand);
            self.emit(id, InstKind::UnOp { op, operand: i }, Value::runtime(v.ty));
          }
        }
      }
      UnOp::BitNot => {
        let info = match self.comp.types.kind(v.ty) {
          &TyKind::Int(info) => Some(info),
          TyKind::ComptimeInt => None,
          _ => {
            let name = self.comp.types.name(v.ty, &self.comp.syms);
            self.err_at(id, format!("unable to perform binary not operation on type '{name}'"));
            return
          }
        };
        match &v.k {
          ValueKind::Int(n) => {
            let flipped: BigInt = -n - 1;
            let folded = info.map_or(flipped.clone(), |i| i.wrap(&flipped));
            self.emit_const(id, Value::int(v.ty, folded));
          }
          ValueKind::Undef => { self.err_at(id, "use of undefined value"); }
          _ => {
            let i = self.use_of(operand);
            self.emit(id, InstKind::UnOp { op, operand: i }, Value::runtime(v.ty));
          }
        }
      }
    }
  }

  // ---- addressing -----------------------------------------------------

  pub(super) fn analyze_field_ptr(&mut self, id: InstId, container: InstId, field: crate::types::Symbol) {
    let mut cv = self.operand_val(container);
    if cv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    // Lvalue generation hands over a pointer; when it points at a type or
    // namespace value, member lookup happens on the pointee.
    if let (ValueKind::Ptr(p), Some(info)) =
      (&cv.k, self.comp.types.ptr_info(cv.ty).copied()) {
      if p.mutability != PtrMut::RuntimeVar &&
        matches!(self.comp.types.kind(info.elem),
          TyKind::Type | TyKind::Namespace(_) | TyKind::BoundFn(_)) {
        let obj = self.comp.mem.pointee(p.base, &self.comp.types);
        cv = self.comp.mem.get(obj).clone();
      }
    }
    let field_text = self.comp.syms.name(field).to_owned();
    // Member access on a type value: enum tags, container declarations,
    // and the introspection fields.
    if let Some(t) = cv.as_ty() {
      let v = self.type_member(id, t, field, &field_text);
      if let Some(v) = v {
        self.const_ptr_to(id, v);
      }
      return
    }
    // Namespace member access.
    if let ValueKind::Namespace(module) = cv.k {
      let Some(decl) = self.comp.ents.find_decl(module, field) else {
        let mname = self.comp.syms.name(self.comp.ents.modules[module].name).to_owned();
        self.err_at(id, format!("no member named '{field_text}' in '{mname}'"));
        return
      };
      let my_module = self.current_module();
      if !self.comp.ents.decls[decl].is_pub && my_module != Some(module) {
        self.err_at(id, format!("'{field_text}' is private"));
        return
      }
      let v = self.comp.resolve_decl(decl);
      if v.ty == Types::INVALID {
        self.b.exec.invalid = true;
        self.emit_const(id, Value::invalid());
        return
      }
      self.const_ptr_to(id, v);
      return
    }
    // Promise frame access.
    if let TyKind::Promise(result) = *self.comp.types.kind(cv.ty) {
      let frame = self.frame_struct(result);
      let TyKind::Struct(info) = self.comp.types.kind(frame).clone() else { unreachable!() };
      let Some(f) = info.fields.iter().find(|f| f.name == field) else {
        self.err_at(id, format!("no member named '{field_text}' in coroutine frame"));
        return
      };
      let ptr_ty = self.comp.types.ptr(PtrInfo::single(f.ty, false));
      let c = self.use_of(container);
      self.emit(id, InstKind::FieldPtr { container: c, field }, Value::runtime(ptr_ty));
      return
    }
    let Some(pinfo) = self.comp.types.ptr_info(cv.ty).copied() else {
      let name = self.comp.types.name(cv.ty, &self.comp.syms);
      self.err_at(id, format!("type '{name}' does not support field access"));
      return
    };
    let elem_kind = self.comp.types.kind(pinfo.elem).clone();
    match elem_kind {
      TyKind::Struct(info) => {
        if let Some(idx) = info.fields.iter().position(|f| f.name == field) {
          let fty = info.fields[idx].ty;
          let result_ty = self.comp.types.ptr(PtrInfo::single(fty, pinfo.is_const));
          if let ValueKind::Ptr(p) = &cv.k {
            if p.mutability != PtrMut::RuntimeVar {
              let agg = self.comp.mem.pointee(p.base, &self.comp.types);
              let mutability = p.mutability;
              self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
                base: PtrBase::Field { agg, index: idx }, mutability,
              }) });
              return
            }
          }
          let c = self.use_of(container);
          self.emit(id, InstKind::FieldPtr { container: c, field },
            Value::runtime(result_ty));
          return
        }
        // A method bound to the pointed-at value.
        if let Some(module) = info.module {
          if let Some(decl) = self.comp.ents.find_decl(module, field) {
            let v = self.comp.resolve_decl(decl);
            if let ValueKind::Func(func) = v.k {
              if let ValueKind::Ptr(p) = &cv.k {
                if p.mutability != PtrMut::RuntimeVar {
                  let subject = self.comp.mem.pointee(p.base, &self.comp.types);
                  let ty = self.comp.types.intern(TyKind::BoundFn(func));
                  let bound = Value { ty, k: ValueKind::BoundFn { func, subject } };
                  self.const_ptr_to(id, bound);
                  return
                }
              }
              self.err_at(id, "bound functions require a comptime-known subject");
              return
            }
          }
        }
        let tname = self.comp.types.name(pinfo.elem, &self.comp.syms);
        self.err_at(id, format!("no member named '{field_text}' in '{tname}'"));
      }
      TyKind::Union(info) => {
        let Some(idx) = info.fields.iter().position(|f| f.name == field) else {
          let tname = self.comp.types.name(pinfo.elem, &self.comp.syms);
          self.err_at(id, format!("no member named '{field_text}' in '{tname}'"));
          return
        };
        let fty = info.fields[idx].ty;
        let result_ty = self.comp.types.ptr(PtrInfo::single(fty, pinfo.is_const));
        if let ValueKind::Ptr(p) = &cv.k {
          if p.mutability != PtrMut::RuntimeVar {
            let agg = self.comp.mem.pointee(p.base, &self.comp.types);
            if let ValueKind::Union { tag, .. } = &self.comp.mem.get(agg).k {
              let active = tag.to_usize().unwrap_or(usize::MAX);
              if active != idx {
                let active_name = info.fields.get(active)
                  .map_or("?".into(), |f| self.comp.syms.name(f.name).to_owned());
                self.err_at(id, format!(
                  "accessing union field '{field_text}' while field '{active_name}' is active"));
                return
              }
            }
            let mutability = p.mutability;
            self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::Field { agg, index: idx }, mutability,
            }) });
            return
          }
        }
        let c = self.use_of(container);
        self.emit(id, InstKind::FieldPtr { container: c, field },
          Value::runtime(result_ty));
      }
      TyKind::Slice(sinfo) => {
        let (idx, fty) = if field_text == "ptr" {
          (0, self.comp.types.ptr(PtrInfo { len: PtrLen::Many, ..sinfo }))
        } else if field_text == "len" {
          (1, self.comp.types.usize())
        } else {
          self.err_at(id, format!("no member named '{field_text}' in slice"));
          return
        };
        let result_ty = self.comp.types.ptr(PtrInfo::single(fty, pinfo.is_const));
        if let ValueKind::Ptr(p) = &cv.k {
          if p.mutability != PtrMut::RuntimeVar {
            let agg = self.comp.mem.pointee(p.base, &self.comp.types);
            let mutability = p.mutability;
            self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
              base: PtrBase::Field { agg, index: idx }, mutability,
            }) });
            return
          }
        }
        let c = self.use_of(container);
        self.emit(id, InstKind::FieldPtr { container: c, field },
          Value::runtime(result_ty));
      }
      TyKind::Array { len, .. } => {
        if field_text == "len" {
          let usize_ty = self.comp.types.usize();
          let v = Value::int(usize_ty, BigInt::from(len));
          self.const_ptr_to(id, v);
        } else {
          self.err_at(id, format!("no member named '{field_text}' in array"));
        }
      }
      _ => {
        let name = self.comp.types.name(pinfo.elem, &self.comp.syms);
        self.err_at(id, format!("type '{name}' does not support field access"));
      }
    }
  }

  /// The value of a member access on a type value, or `None` after a
  /// diagnostic.
  fn type_member(
    &mut self, id: InstId, t: TyId, field: crate::types::Symbol, field_text: &str,
  ) -> Option<Value> {
    let kind = self.comp.types.kind(t).clone();
    // Introspection fields first.
    match (&kind, field_text) {
      (TyKind::Optional(child), "Child") |
      (TyKind::Promise(Some(child)), "Child") => return Some(Value::ty(*child)),
      (TyKind::Pointer(info), "Child") | (TyKind::Slice(info), "Child") =>
        return Some(Value::ty(info.elem)),
      (&TyKind::Array { elem, .. }, "Child") => return Some(Value::ty(elem)),
      (&TyKind::Array { len, .. }, "len") => {
        return Some(Value::comptime_int(BigInt::from(len)))
      }
      (TyKind::Int(info), "bit_count") => {
        return Some(Value::comptime_int(BigInt::from(info.bits)))
      }
      (&TyKind::Float(bits), "bit_count") => {
        return Some(Value::comptime_int(BigInt::from(bits)))
      }
      _ => {}
    }
    match kind {
      TyKind::Enum(info) => {
        if let Some((_, tag)) = info.fields.iter().find(|&&(n, _)| n == field) {
          return Some(Value { ty: t, k: ValueKind::Enum(tag.clone()) })
        }
        let tname = self.comp.types.name(t, &self.comp.syms);
        self.err_at(id, format!("enum '{tname}' has no member named '{field_text}'"));
        None
      }
      TyKind::Struct(info) => {
        if let Some(module) = info.module {
          if let Some(decl) = self.comp.ents.find_decl(module, field) {
            let v = self.comp.resolve_decl(decl);
            if v.ty == Types::INVALID {
              self.b.exec.invalid = true;
              self.emit_const(id, Value::invalid());
              return None
            }
            return Some(v)
          }
        }
        let tname = self.comp.types.name(t, &self.comp.syms);
        self.err_at(id, format!("no member named '{field_text}' in '{tname}'"));
        None
      }
      _ => {
        let tname = self.comp.types.name(t, &self.comp.syms);
        self.err_at(id, format!("type '{tname}' does not support field access"));
        None
      }
    }
  }

  /// Produce a const pointer to a comptime value (field-pointer results
  /// for values that have no addressable storage).
  fn const_ptr_to(&mut self, id: InstId, v: Value) {
    let pointee_ty = v.ty;
    let obj = self.comp.mem.alloc(v);
    let ptr_ty = self.comp.types.ptr(PtrInfo::single(pointee_ty, true));
    self.emit_const(id, Value { ty: ptr_ty, k: ValueKind::Ptr(PtrValue {
      base: PtrBase::Obj(obj), mutability: PtrMut::ComptimeConst,
    }) });
  }

  pub(super) fn current_module(&self) -> Option<crate::types::ModuleId> {
    let scope = self.old.insts.get(InstId(0)).map(|i| i.scope)?;
    for (_, s) in self.comp.scopes.ancestors(scope) {
      if let crate::types::ir::ScopeKind::Decls { module } = s.k {
        return Some(module)
      }
    }
    None
  }

  pub(super) fn analyze_elem_ptr(
    &mut self, id: InstId, array_ptr: InstId, index: InstId, safety: bool,
  ) {
    let pv = self.operand_val(array_ptr);
    if pv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let Some(pinfo) = self.comp.types.ptr_info(pv.ty).copied() else {
      let name = self.comp.types.name(pv.ty, &self.comp.syms);
      self.err_at(id, format!("array access of non-array type '{name}'"));
      return
    };
    let usize_ty = self.comp.types.usize();
    let ii = self.use_of(index);
    let ii = self.coerce_to(id, ii, usize_ty);
    let iv = self.value_of(ii).clone();
    let elem_kind = self.comp.types.kind(pinfo.elem).clone();
    match elem_kind {
      TyKind::Array { elem, len } => {
        let base_align = pinfo.align.unwrap_or_else(|| self.comp.types.abi_align(elem));
        let elem_size = self.comp.types.abi_size(elem);
        let align = match iv.as_int().and_then(BigInt::to_u64) {
          Some(i) => tighter_align(base_align, i * elem_size),
          None => tighter_align(base_align, elem_size),
        };
        let result_ty = self.comp.types.ptr(PtrInfo {
          align: Some(align), ..PtrInfo::single(elem, pinfo.is_const)
        });
        if let Some(i) = iv.as_int().and_then(BigInt::to_u64) {
          if i >= len {
            self.err_at(id, format!("index {i} outside array of size {len}"));
            return
          }
          if let ValueKind::Ptr(p) = &pv.k {
            if p.mutability != PtrMut::RuntimeVar {
              let arr = self.comp.mem.pointee(p.base, &self.comp.types);
              let mutability = p.mutability;
              self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
                base: PtrBase::ArrayElem { array: arr, index: i as usize, c_str: false },
                mutability,
              }) });
              return
            }
          }
        }
        let safety = safety && self.runtime_safety(&self.old.insts[id].clone());
        let a = self.use_of(array_ptr);
        self.emit(id, InstKind::ElemPtr { array_ptr: a, index: ii, safety },
          Value::runtime(result_ty));
      }
      TyKind::Slice(sinfo) => {
        let result_ty = self.comp.types.ptr(PtrInfo::single(sinfo.elem, sinfo.is_const));
        if let (ValueKind::Ptr(p), Some(i)) = (&pv.k, iv.as_int().and_then(BigInt::to_u64)) {
          if p.mutability != PtrMut::RuntimeVar {
            let slice_obj = self.comp.mem.pointee(p.base, &self.comp.types);
            if let ValueKind::Struct(fields) = self.comp.mem.get(slice_obj).k.clone() {
              let data = self.comp.mem.get(fields[0]).clone();
              let len = self.comp.mem.get(fields[1]).as_int()
                .and_then(BigInt::to_u64).unwrap_or(0);
              if i >= len {
                self.err_at(id, format!("index {i} outside slice of size {len}"));
                return
              }
              match data.k {
                ValueKind::Ptr(dp) => {
                  let base = match dp.base {
                    PtrBase::ArrayElem { array, index, c_str } =>
                      PtrBase::ArrayElem { array, index: index + i as usize, c_str },
                    PtrBase::Addr(a) => {
                      let size = self.comp.types.abi_size(sinfo.elem);
                      PtrBase::Addr(a + i * size)
                    }
                    b => b,
                  };
                  self.emit_const(id, Value { ty: result_ty, k: ValueKind::Ptr(PtrValue {
                    base, mutability: dp.mutability,
                  }) });
                  return
                }
                _ => {}
              }
            }
          }
        }
        let safety = safety && self.runtime_safety(&self.old.insts[id].clone());
        let a = self.use_of(array_ptr);
        self.emit(id, InstKind::ElemPtr { array_ptr: a, index: ii, safety },
          Value::runtime(result_ty));
      }
      TyKind::Pointer(many) if many.len == PtrLen::Many => {
        // Indexing through a pointer-to-unknown-length-pointer: load the
        // pointer, then index with no bounds check.
        let result_ty = self.comp.types.ptr(PtrInfo::single(many.elem, many.is_const));
        let a = self.use_of(array_ptr);
        let loaded = self.b.append_gen(
          self.old.insts[id].scope, self.old.insts[id].node,
          InstKind::LoadPtr { ptr: a }, Value::runtime(pinfo.elem));
        self.emit(id, InstKind::ElemPtr { array_ptr: loaded, index: ii, safety: false },
          Value::runtime(result_ty));
      }
      _ => {
        let name = self.comp.types.name(pinfo.elem, &self.comp.syms);
        self.err_at(id, format!("array access of non-array type '{name}'"));
      }
    }
  }

  pub(super) fn analyze_slice(
    &mut self, id: InstId, array_ptr: InstId, start: InstId, end: Option<InstId>,
    safety: bool,
  ) {
    let pv = self.operand_val(array_ptr);
    if pv.ty == Types::INVALID {
      self.b.exec.invalid = true;
      self.emit_const(id, Value::invalid());
      return
    }
    let Some(pinfo) = self.comp.types.ptr_info(pv.ty).copied() else {
      let name = self.comp.types.name(pv.ty, &self.comp.syms);
      self.err_at(id, format!("slice of non-array type '{name}'"));
      return
    };
    let usize_ty = self.comp.types.usize();
    let si = self.use_of(start);
    let si = self.coerce_to(id, si, usize_ty);
    let ei = end.map(|e| {
      let e = self.use_of(e);
      self.coerce_to(id, e, usize_ty)
    });
    let sv = self.value_of(si).as_int().and_then(BigInt::to_u64);
    let ev = ei.and_then(|e| self.value_of(e).as_int().and_then(BigInt::to_u64));
    let elem_kind = self.comp.types.kind(pinfo.elem).clone();
    match elem_kind {
      TyKind::Array { elem, len } => {
        // The result's const-ness widens based on the source's mutability.
        let is_const = pinfo.is_const;
        let slice_ty = self.comp.types.slice(PtrInfo::many(elem, is_const));
        let end_val = match (ei, ev) {
          (None, _) => Some(len),
          (_, v) => v,
        };
        if let (Some(s), Some(e)) = (sv, end_val) {
          if s > e || e > len {
            self.err_at(id, format!("slice bounds {s}..{e} outside array of size {len}"));
            return
          }
          if let ValueKind::Ptr(p) = &pv.k {
            if p.mutability != PtrMut::RuntimeVar {
              let arr = self.comp.mem.pointee(p.base, &self.comp.types);
              let v = crate::coerce::make_slice_value(
                &mut self.comp.types, &mut self.comp.mem,
                slice_ty, arr, s as usize, e - s, is_const);
              self.emit_const(id, v);
              return
            }
          }
        }
        let safety = safety && self.runtime_safety(&self.old.insts[id].clone());
        let a = self.use_of(array_ptr);
        self.emit(id, InstKind::SliceOp { array_ptr: a, start: si, end: ei, safety },
          Value::runtime(slice_ty));
      }
      TyKind::Slice(sinfo) => {
        let slice_ty = pinfo.elem;
        if let (ValueKind::Ptr(p), Some(s)) = (&pv.k, sv) {
          if p.mutability != PtrMut::RuntimeVar {
            let slice_obj = self.comp.mem.pointee(p.base, &self.comp.types);
            if let ValueKind::Struct(fields) = self.comp.mem.get(slice_obj).k.clone() {
              let data = self.comp.mem.get(fields[0]).clone();
              let len = self.comp.mem.get(fields[1]).as_int()
                .and_then(BigInt::to_u64).unwrap_or(0);
              let e = match (ei, ev) {
                (None, _) => Some(len),
                (_, v) => v,
              };
              if let (Some(e), ValueKind::Ptr(dp)) = (e, data.k) {
                if s > e || e > len {
                  self.err_at(id,
                    format!("slice bounds {s}..{e} outside slice of size {len}"));
                  return
                }
                match dp.base {
                  PtrBase::ArrayElem { array, index, .. } => {
                    let v = crate::coerce::make_slice_value(
                      &mut self.comp.types, &mut self.comp.mem,
                      slice_ty, array, index + s as usize, e - s,
                      sinfo.is_const);
                    self.emit_const(id, v);
                    return
                  }
                  PtrBase::Addr(base_addr) => {
                    let size = self.comp.types.abi_size(sinfo.elem);
                    let v = self.addr_slice_value(
                      slice_ty, base_addr + s * size, e - s, sinfo);
                    self.emit_const(id, v);
                    return
                  }
                  _ => {}
                }
              }
            }
          }
        }
        let safety = safety && self.runtime_safety(&self.old.insts[id].clone());
        let a = self.use_of(array_ptr);
        self.emit(id, InstKind::SliceOp { array_ptr: a, start: si, end: ei, safety },
          Value::runtime(slice_ty));
      }
      TyKind::Pointer(many) if many.len == PtrLen::Many => {
        let Some(ei) = ei else {
          self.err_at(id, "slice of unknown-length pointer must specify end");
          return
        };
        let slice_ty = self.comp.types.slice(PtrInfo::many(many.elem, many.is_const));
        let a = self.use_of(array_ptr);
        self.emit(id, InstKind::SliceOp {
          array_ptr: a, start: si, end: Some(ei), safety: false,
        }, Value::runtime(slice_ty));
      }
      _ => {
        let name = self.comp.types.name(pinfo.elem, &self.comp.syms);
        self.err_at(id, format!("slice of non-array type '{name}'"));
      }
    }
  }

  /// A comptime slice whose data pointer is a hard-coded address.
  fn addr_slice_value(
    &mut self, slice_ty: TyId, addr: u64, len: u64, sinfo: PtrInfo,
  ) -> Value {
    let usize_ty = self.comp.types.usize();
    let data_ptr_ty = self.comp.types.ptr(PtrInfo { len: PtrLen::Many, ..sinfo });
    let ptr = self.comp.mem.alloc(Value { ty: data_ptr_ty, k: ValueKind::Ptr(PtrValue {
      base: PtrBase::Addr(addr), mutability: PtrMut::ComptimeConst,
    }) });
    let len_obj = self.comp.mem.alloc(Value::int(usize_ty, BigInt::from(len)));
    Value { ty: slice_ty, k: ValueKind::Struct(Box::new([ptr, len_obj])) }
  }

  // ---- overflow intrinsics and atomics -------------------------------

  pub(super) fn analyze_overflow_op(
    &mut self, id: InstId, op: OverflowOp, ty: InstId, lhs: InstId, rhs: InstId,
    result_ptr: InstId,
  ) {
    let Some(t) = self.require_static(id, ty).and_then(|v| v.as_ty()) else {
      self.err_at(id, "expected type expression");
      return
    };
    let Some(info) = self.comp.types.int_info(t) else {
      let name = self.comp.types.name(t, &self.comp.syms);
      self.err_at(id, format!("expected integer type, found '{name}'"));
      return
    };
    let rhs_ty = if op == OverflowOp::Shl {
      let bits = info.shift_bits().max(1);
      self.comp.types.int(IntInfo { signed: false, bits })
    } else {
      t
    };
    let li = self.use_of(lhs);
    let li = self.coerce_to(id, li, t);
    let ri = self.use_of(rhs);
    let ri = self.coerce_to(id, ri, rhs_ty);
    let expect_ptr = self.comp.types.ptr(PtrInfo::single(t, false));
    let pi = self.use_of(result_ptr);
    let pi = self.coerce_to(id, pi, expect_ptr);
    let la = self.value_of(li).clone();
    let ra = self.value_of(ri).clone();
    let pa = self.value_of(pi).clone();
    if let (Some(a), Some(bn)) = (la.as_int(), ra.as_int()) {
      let full = match op {
        OverflowOp::Add => a + bn,
        OverflowOp::Sub => a - bn,
        OverflowOp::Mul => a * bn,
        OverflowOp::Shl => a << bn.to_u64().unwrap_or(0) as usize,
      };
      let wrapped = info.wrap(&full);
      let overflowed = !info.fits(&full);
      if let ValueKind::Ptr(p) = &pa.k {
        if p.mutability == PtrMut::ComptimeVar {
          let obj = self.comp.mem.pointee(p.base, &self.comp.types);
          self.comp.mem.set(obj, Value::int(t, wrapped));
          self.emit_const(id, Value::bool(overflowed));
          return
        }
      }
      // Static operands with a runtime destination: store the folded
      // result, produce the folded bit.
      let scope = self.old.insts[id].scope;
      let node = self.old.insts[id].node;
      let folded = self.b.const_gen(scope, node, Value::int(t, wrapped));
      self.b.append_gen(scope, node,
        InstKind::StorePtr { ptr: pi, value: folded }, Value::void());
      self.emit_const(id, Value::bool(overflowed));
      return
    }
    let ti = self.use_of(ty);
    self.emit(id, InstKind::OverflowOp { op, ty: ti, lhs: li, rhs: ri, result_ptr: pi },
      Value::runtime(Types::BOOL));
  }

  /// The comptime tag of an `AtomicOrder` operand.
  fn atomic_order(&mut self, id: InstId, operand: InstId) -> Option<u64> {
    let v = self.require_static(id, operand)?;
    if v.ty != self.comp.atomic_order_ty {
      self.err_at(id, "expected AtomicOrder enum value");
      return None
    }
    match &v.k {
      ValueKind::Enum(n) => n.to_u64(),
      _ => None,
    }
  }

  /// Integer (power-of-two width, at least a byte) or pointer.
  fn check_atomic_ty(&mut self, id: InstId, t: TyId) -> bool {
    match self.comp.types.kind(t) {
      &TyKind::Int(info) => {
        let bits = u32::from(info.bits);
        if !bits.is_power_of_two() || bits < 8 || info.bits > self.comp.types.ptr_bits() {
          let name = self.comp.types.name(t, &self.comp.syms);
          self.err_at(id, format!(
            "expected power-of-2 integer of at most pointer width, found '{name}'"));
          return false
        }
        true
      }
      TyKind::Pointer(_) => true,
      _ => {
        let name = self.comp.types.name(t, &self.comp.syms);
        self.err_at(id, format!("expected integer or pointer type, found '{name}'"));
        false
      }
    }
  }

  /// A mutable pointer operand for an atomic op, yielding its element type.
  fn atomic_ptr(&mut self, id: InstId, ptr: InstId) -> Option<(InstId, TyId)> {
    let pv = self.operand_val(ptr);
    let Some(info) = self.comp.types.ptr_info(pv.ty).copied() else {
      self.err_at(id, "expected pointer operand");
      return None
    };
    if info.is_const {
      self.err_at(id, "cannot atomically modify constant pointer");
      return None
    }
    if !self.check_atomic_ty(id, info.elem) { return None }
    Some((self.use_of(ptr), info.elem))
  }

  pub(super) fn analyze_cmpxchg(
    &mut self, id: InstId, ptr: InstId, expected: InstId, new_value: InstId,
    success_order: InstId, failure_order: InstId, is_weak: bool,
  ) {
    let inst = self.old.insts[id].clone();
    if self.comptime_mode(&inst) {
      self.err_at(id, "unable to evaluate constant expression");
      return
    }
    let Some((pi, t)) = self.atomic_ptr(id, ptr) else { return };
    let ei = self.use_of(expected);
    let ei = self.coerce_to(id, ei, t);
    let ni = self.use_of(new_value);
    let ni = self.coerce_to(id, ni, t);
    let Some(success) = self.atomic_order(id, success_order) else { return };
    let Some(failure) = self.atomic_order(id, failure_order) else { return };
    // Ordering constraints are always-on undefined-behavior checks.
    if success < order::MONOTONIC || failure < order::MONOTONIC {
      self.err_at(id, "atomic ordering must be Monotonic or stricter");
      return
    }
    if failure == order::RELEASE || failure == order::ACQ_REL {
      self.err_at(id, "failure atomic ordering must not be Release or AcqRel");
      return
    }
    if failure > success {
      self.err_at(id, "failure atomic ordering must be no stricter than success");
      return
    }
    let so = self.use_of(success_order);
    let fo = self.use_of(failure_order);
    let result_ty = self.comp.types.optional(t);
    self.emit(id, InstKind::Cmpxchg {
      ptr: pi, expected: ei, new_value: ni,
      success_order: so, failure_order: fo, is_weak,
    }, Value::runtime(result_ty));
  }

  pub(super) fn analyze_fence(&mut self, id: InstId, order_op: InstId) {
    let inst = self.old.insts[id].clone();
    if self.comptime_mode(&inst) {
      self.err_at(id, "unable to evaluate constant expression");
      return
    }
    let Some(ord) = self.atomic_order(id, order_op) else { return };
    if ord < order::ACQUIRE {
      self.err_at(id, "atomic ordering must be Acquire or stricter");
      return
    }
    let o = self.use_of(order_op);
    self.emit(id, InstKind::Fence { order: o }, Value::void());
  }

  pub(super) fn analyze_atomic_rmw(
    &mut self, id: InstId, ptr: InstId, op: InstId, operand: InstId, order_op: InstId,
  ) {
    let inst = self.old.insts[id].clone();
    if self.comptime_mode(&inst) {
      self.err_at(id, "unable to evaluate constant expression");
      return
    }
    let Some((pi, t)) = self.atomic_ptr(id, ptr) else { return };
    let rmw = self.require_static(id, op);
    let Some(rmw) = rmw else { return };
    if rmw.ty != self.comp.atomic_rmw_op_ty {
      self.err_at(id, "expected AtomicRmwOp enum value");
      return
    }
    let Some(ord) = self.atomic_order(id, order_op) else { return };
    if ord < order::MONOTONIC {
      self.err_at(id, "atomic ordering must be Monotonic or stricter");
      return
    }
    let oi = self.use_of(operand);
    let oi = self.coerce_to(id, oi, t);
    let opi = self.use_of(op);
    let ordi = self.use_of(order_op);
    self.emit(id, InstKind::AtomicRmw { ptr: pi, op: opi, operand: oi, order: ordi },
      Value::runtime(t));
  }

  pub(super) fn analyze_atomic_load(&mut self, id: InstId, ptr: InstId, order_op: InstId) {
    let inst = self.old.insts[id].clone();
    if self.comptime_mode(&inst) {
      self.err_at(id, "unable to evaluate constant expression");
      return
    }
    let pv = self.operand_val(ptr);
    let Some(info) = self.comp.types.ptr_info(pv.ty).copied() else {
      self.err_at(id, "expected pointer operand");
      return
    };
    if !self.check_atomic_ty(id, info.elem) { return }
    let Some(ord) = self.atomic_order(id, order_op) else { return };
    if ord == order::RELEASE || ord == order::ACQ_REL {
      self.err_at(id, "@atomicLoad ordering must not be Release or AcqRel");
      return
    }
    let pi = self.use_of(ptr);
    let oi = self.use_of(order_op);
    self.emit(id, InstKind::AtomicLoad { ptr: pi, order: oi }, Value::runtime(info.elem));
  }

}

/// A pointer into an aggregate at `offset` bytes from a `base`-aligned
/// address is aligned to the largest power of two dividing both.
fn tighter_align(base: u32, offset: u64) -> u32 {
  if offset == 0 { return base }
  let off_align = 1u64 << offset.trailing_zeros().min(31);
  u64::from(base).min(off_align).try_into().expect("bounded by base")
}

fn cmp_order(op: BinOp, ord: std::cmp::Ordering) -> bool {
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

fn div_trunc(a: &BigInt, b: &BigInt) -> BigInt { a / b }

fn div_floor(a: &BigInt, b: &BigInt) -> BigInt {
  let q = a / b;
  let r = a % b;
  if !r.is_zero() && (r.is_negative() != b.is_negative()) { q - 1 } else { q }
}

fn rem_trunc(a: &BigInt, b: &BigInt) -> BigInt { a % b }

fn rem_floor(a: &BigInt, b: &BigInt) -> BigInt {
  let r = a % b;
  if !r.is_zero() && (r.is_negative() != b.is_negative()) { r + b } else { r }
}

/// Exact rational arithmetic for float folding. Division by zero is the
/// only failure; rounding to the destination width happens afterward.
pub(crate) fn fold_float(
  op: BinOp, a: &BigRational, b: &BigRational,
) -> Result<BigRational, String> {
  match op {
    BinOp::Add => Ok(a + b),
    BinOp::Sub => Ok(a - b),
    BinOp::Mul => Ok(a * b),
    BinOp::AddWrap | BinOp::SubWrap | BinOp::MulWrap =>
      Err("wrapping arithmetic on floats".into()),
    BinOp::Div => {
      if b.is_zero() { return Err("division by zero".into()) }
      Ok(a / b)
    }
    BinOp::DivTrunc => {
      if b.is_zero() { return Err("division by zero".into()) }
      Ok((a / b).trunc())
    }
    BinOp::DivFloor => {
      if b.is_zero() { return Err("division by zero".into()) }
      Ok((a / b).floor())
    }
    BinOp::DivExact => {
      if b.is_zero() { return Err("division by zero".into()) }
      let q = a / b;
      if !q.is_integer() { return Err("exact division had a remainder".into()) }
      Ok(q)
    }
    BinOp::RemUnspec => {
      if b.is_zero() { return Err("division by zero".into()) }
      let r = a - (a / b).trunc() * b;
      let m = a - (a / b).floor() * b;
      if r != m { return Err("signed values must use @rem or @mod".into()) }
      Ok(r)
    }
    BinOp::Rem => {
      if b.is_zero() { return Err("division by zero".into()) }
      if b.is_negative() { return Err("remainder division by negative denominator".into()) }
      Ok(a - (a / b).trunc() * b)
    }
    BinOp::Mod => {
      if b.is_zero() { return Err("division by zero".into()) }
      if b.is_negative() { return Err("remainder division by negative denominator".into()) }
      Ok(a - (a / b).floor() * b)
    }
    _ => Err("invalid operands to binary expression".into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn big(n: i64) -> BigInt { BigInt::from(n) }

  #[test]
  fn division_rounding() {
    assert_eq!(div_trunc(&big(-7), &big(2)), big(-3));
    assert_eq!(div_floor(&big(-7), &big(2)), big(-4));
    assert_eq!(div_trunc(&big(7), &big(2)), big(3));
    assert_eq!(div_floor(&big(7), &big(2)), big(3));
  }

  #[test]
  fn remainder_signs() {
    assert_eq!(rem_trunc(&big(-7), &big(2)), big(-1));
    assert_eq!(rem_floor(&big(-7), &big(2)), big(1));
    assert_eq!(rem_trunc(&big(7), &big(2)), big(1));
    assert_eq!(rem_floor(&big(7), &big(2)), big(1));
  }

  #[test]
  fn tighter_align_from_offset() {
    assert_eq!(tighter_align(8, 0), 8);
    assert_eq!(tighter_align(8, 4), 4);
    assert_eq!(tighter_align(8, 6), 2);
    assert_eq!(tighter_align(4, 16), 4);
    assert_eq!(tighter_align(8, 3), 1);
  }

  #[test]
  fn float_fold_exactness() {
    let a = BigRational::from_integer(big(1));
    let b = BigRational::from_integer(big(3));
    let q = fold_float(BinOp::Div, &a, &b).unwrap();
    assert_eq!(q * BigRational::from_integer(big(3)), a);
    assert!(fold_float(BinOp::Div, &a, &BigRational::from_integer(big(0))).is_err());
    assert!(fold_float(BinOp::DivExact, &a, &b).is_err());
  }
}
