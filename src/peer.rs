//! Peer type resolution: given the types flowing into a merge point
//! (branches, switch arms, array literal elements, inferred returns), pick
//! the one type they must all coerce to, or diagnose the pair that cannot
//! meet.

use crate::Compiler;
use crate::coerce::{const_cast_ok, decide};
use crate::types::NodeId;
use crate::types::ty::{TyId, TyKind, Types};
use crate::value::Value;

/// One contributor to a merge point.
#[derive(Clone, Debug)]
pub struct PeerCand {
  /// The contributor's analyzed type.
  pub ty: TyId,
  /// The contributor's comptime value, when it has one (literal rules look
  /// at it).
  pub value: Option<Value>,
  /// Where the contributor came from, for diagnostics.
  pub node: NodeId,
}

impl PeerCand {
  /// A candidate with no comptime value.
  #[must_use] pub fn new(ty: TyId, node: NodeId) -> Self {
    Self { ty, value: None, node }
  }
}

struct Running {
  ty: TyId,
  node: NodeId,
  /// Set when an array/array length disagreement demanded slice promotion.
  want_slice: bool,
}

/// Resolve the common type of `cands`. When `expected` is given the merge
/// point already has a type and every contributor simply coerces to it.
/// On failure a diagnostic names both contributing locations and the
/// result is [`Types::INVALID`].
pub fn resolve_peer_types(
  comp: &mut Compiler, expected: Option<TyId>, cands: &[PeerCand], at: NodeId,
) -> TyId {
  if let Some(t) = expected { return t }
  let mut it = cands.iter();
  let Some(first) = it.next() else { return Types::VOID };
  let mut run = Running { ty: first.ty, node: first.node, want_slice: false };
  for cand in it {
    match merge(comp, &mut run, cand) {
      Ok(ty) => run.ty = ty,
      Err(()) => {
        let span = comp.ast.span(at);
        let a = comp.types.name(run.ty, &comp.syms);
        let b = comp.types.name(cand.ty, &comp.syms);
        let h = comp.emit_error(span, format!("incompatible types: '{a}' and '{b}'"));
        let sp_a = comp.ast.span(run.node);
        let sp_b = comp.ast.span(cand.node);
        comp.diags.add_note(h, sp_a, format!("type '{a}' here"));
        comp.diags.add_note(h, sp_b, format!("type '{b}' here"));
        return Types::INVALID
      }
    }
  }
  // Post-processing: a pair demanded array-to-slice but the winner is
  // still an array.
  if run.want_slice {
    if let &TyKind::Array { elem, .. } = comp.types.kind(run.ty) {
      let info = crate::types::ty::PtrInfo::many(elem, true);
      return comp.types.slice(info)
    }
  }
  run.ty
}

/// The asymmetric pairwise merge. `Ok` is the merged type; `Err` means the
/// caller should report the pair.
fn merge(comp: &mut Compiler, run: &mut Running, cand: &PeerCand) -> Result<TyId, ()> {
  let (prev, cur) = (run.ty, cand.ty);
  if prev == cur { return Ok(prev) }
  // Poison propagates silently.
  if prev == Types::INVALID || cur == Types::INVALID { return Ok(Types::INVALID) }
  // Unreachable absorbs into the other side.
  if prev == Types::NORETURN { run.node = cand.node; return Ok(cur) }
  if cur == Types::NORETURN { return Ok(prev) }
  // `undefined` takes the other side's type.
  if prev == Types::UNDEFINED { run.node = cand.node; return Ok(cur) }
  if cur == Types::UNDEFINED { return Ok(prev) }
  let prev_kind = comp.types.kind(prev).clone();
  let cur_kind = comp.types.kind(cur).clone();
  match (&prev_kind, &cur_kind) {
    // Error-set union.
    (TyKind::ErrorSet(_), TyKind::ErrorSet(_)) => Ok(err_set_union(comp, prev, cur)),
    // Error-union merging: union the sets, merge the payloads.
    (&TyKind::ErrorUnion { set: s1, payload: p1 }, &TyKind::ErrorUnion { set: s2, payload: p2 }) => {
      let set = err_set_union(comp, s1, s2);
      let mut payload_run = Running { ty: p1, node: run.node, want_slice: false };
      let payload = merge(comp, &mut payload_run, &PeerCand::new(p2, cand.node))?;
      Ok(comp.types.error_union(set, payload))
    }
    // Error set + payload type → error union.
    (TyKind::ErrorSet(_), _) => Ok(comp.types.error_union(prev, cur)),
    (_, TyKind::ErrorSet(_)) => Ok(comp.types.error_union(cur, prev)),
    // Error union + bare payload.
    (&TyKind::ErrorUnion { set, payload }, _) => {
      let mut payload_run = Running { ty: payload, node: run.node, want_slice: false };
      let payload = merge(comp, &mut payload_run, &PeerCand::new(cur, cand.node))?;
      Ok(comp.types.error_union(set, payload))
    }
    (_, &TyKind::ErrorUnion { set, payload }) => {
      let mut payload_run = Running { ty: prev, node: run.node, want_slice: false };
      let payload = merge(comp, &mut payload_run, &PeerCand::new(payload, cand.node))?;
      Ok(comp.types.error_union(set, payload))
    }
    // `null` + T → ?T.
    (TyKind::Null, TyKind::Optional(_)) => { run.node = cand.node; Ok(cur) }
    (TyKind::Optional(_), TyKind::Null) => Ok(prev),
    (TyKind::Null, _) => { run.node = cand.node; Ok(comp.types.optional(cur)) }
    (_, TyKind::Null) => Ok(comp.types.optional(prev)),
    // Optional + payload type.
    (&TyKind::Optional(child), _) => {
      let mut child_run = Running { ty: child, node: run.node, want_slice: false };
      let child = merge(comp, &mut child_run, &PeerCand::new(cur, cand.node))?;
      Ok(comp.types.optional(child))
    }
    (_, &TyKind::Optional(child)) => {
      let mut child_run = Running { ty: prev, node: run.node, want_slice: false };
      let child = merge(comp, &mut child_run, &PeerCand::new(child, cand.node))?;
      Ok(comp.types.optional(child))
    }
    // Literal + typed number.
    (TyKind::ComptimeInt, TyKind::Int(_) | TyKind::Float(_) | TyKind::ComptimeFloat) => {
      run.node = cand.node;
      Ok(cur)
    }
    (TyKind::Int(_) | TyKind::Float(_) | TyKind::ComptimeFloat, TyKind::ComptimeInt) =>
      Ok(prev),
    (TyKind::ComptimeFloat, TyKind::Float(_)) => { run.node = cand.node; Ok(cur) }
    (TyKind::Float(_), TyKind::ComptimeFloat) => Ok(prev),
    // Same-signedness integers widen to the wider type.
    (&TyKind::Int(a), &TyKind::Int(b)) if a.signed == b.signed =>
      if a.bits >= b.bits { Ok(prev) } else { run.node = cand.node; Ok(cur) },
    (&TyKind::Float(a), &TyKind::Float(b)) =>
      if a >= b { Ok(prev) } else { run.node = cand.node; Ok(cur) },
    // Arrays of equal element type but different length demand slices.
    (&TyKind::Array { elem: e1, len: l1 }, &TyKind::Array { elem: e2, len: l2 })
    if e1 == e2 && l1 != l2 => {
      run.want_slice = true;
      Ok(prev)
    }
    // Array + slice promotes to the slice.
    (TyKind::Slice(_), TyKind::Array { elem, .. }) => {
      let info = crate::types::ty::PtrInfo::many(*elem, true);
      let as_slice = comp.types.slice(info);
      if const_cast_ok(&comp.types, prev, as_slice).is_ok() { Ok(prev) } else { Err(()) }
    }
    (TyKind::Array { elem, .. }, TyKind::Slice(_)) => {
      let elem = *elem;
      let info = crate::types::ty::PtrInfo::many(elem, true);
      let as_slice = comp.types.slice(info);
      if const_cast_ok(&comp.types, cur, as_slice).is_ok() {
        run.node = cand.node;
        Ok(cur)
      } else {
        Err(())
      }
    }
    // Enum + the tagged union it tags.
    (TyKind::Enum(_), TyKind::Union(u)) if u.tag == Some(prev) => {
      run.node = cand.node;
      Ok(cur)
    }
    (TyKind::Union(u), TyKind::Enum(_)) if u.tag == Some(cur) => Ok(prev),
    // Pointer const broadening and any other requalification.
    _ => {
      if const_cast_ok(&comp.types, prev, cur).is_ok() { return Ok(prev) }
      if const_cast_ok(&comp.types, cur, prev).is_ok() {
        run.node = cand.node;
        return Ok(cur)
      }
      // Last resort: one side implicitly converts to the other.
      if decide(&comp.types, cur, cand.value.as_ref(), prev).is_ok() { return Ok(prev) }
      if decide(&comp.types, prev, None, cur).is_ok() {
        run.node = cand.node;
        return Ok(cur)
      }
      Err(())
    }
  }
}

/// The union of two error sets, deduplicated by error id. Either side being
/// the global set makes the result global.
fn err_set_union(comp: &mut Compiler, a: TyId, b: TyId) -> TyId {
  if a == b { return a }
  let (Some(la), Some(lb)) = (comp.types.error_list(a), comp.types.error_list(b)) else {
    return Types::GLOBAL_ERROR_SET
  };
  let mut all = la.to_vec();
  all.extend_from_slice(lb);
  comp.types.error_set(all)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Compiler, Config};
  use crate::types::{ErrId, IntInfo};
  use crate::types::ty::PtrInfo;

  fn comp() -> Compiler { Compiler::new(Config::default()) }

  fn peer(comp: &mut Compiler, tys: &[TyId]) -> TyId {
    let cands: Vec<PeerCand> =
      tys.iter().map(|&t| PeerCand::new(t, NodeId(0))).collect();
    resolve_peer_types(comp, None, &cands, NodeId(0))
  }

  #[test]
  fn single_candidate_is_itself() {
    let mut c = comp();
    let i32t = c.types.int(IntInfo { signed: true, bits: 32 });
    assert_eq!(peer(&mut c, &[i32t]), i32t);
  }

  #[test]
  fn error_set_union_dedups_and_global_absorbs() {
    let mut c = comp();
    let (x, y, z) = (ErrId(0), ErrId(1), ErrId(2));
    let sa = c.types.error_set(vec![x, y]);
    let sb = c.types.error_set(vec![y, z]);
    let merged = peer(&mut c, &[sa, sb]);
    assert_eq!(c.types.error_list(merged), Some(&[x, y, z][..]));
    let g = peer(&mut c, &[sa, Types::GLOBAL_ERROR_SET]);
    assert_eq!(g, Types::GLOBAL_ERROR_SET);
  }

  #[test]
  fn error_unions_merge_sets_and_payloads() {
    let mut c = comp();
    let u8t = c.types.int(IntInfo { signed: false, bits: 8 });
    let (x, y, z) = (ErrId(0), ErrId(1), ErrId(2));
    let sa = c.types.error_set(vec![x, y]);
    let sb = c.types.error_set(vec![y, z]);
    let ea = c.types.error_union(sa, u8t);
    let eb = c.types.error_union(sb, u8t);
    let merged = peer(&mut c, &[ea, eb]);
    let &TyKind::ErrorUnion { set, payload } = c.types.kind(merged) else {
      panic!("expected an error union");
    };
    assert_eq!(payload, u8t);
    assert_eq!(c.types.error_list(set), Some(&[x, y, z][..]));
  }

  #[test]
  fn null_plus_typed_gives_optional() {
    let mut c = comp();
    let i32t = c.types.int(IntInfo { signed: true, bits: 32 });
    let expect = c.types.optional(i32t);
    assert_eq!(peer(&mut c, &[Types::NULL, i32t]), expect);
    assert_eq!(peer(&mut c, &[i32t, Types::NULL]), expect);
  }

  #[test]
  fn literal_and_typed_commute() {
    // P5 commutativity on the literal rule.
    let mut c = comp();
    let i32t = c.types.int(IntInfo { signed: true, bits: 32 });
    assert_eq!(peer(&mut c, &[Types::COMPTIME_INT, i32t]), i32t);
    assert_eq!(peer(&mut c, &[i32t, Types::COMPTIME_INT]), i32t);
    let f64t = c.types.float(64);
    assert_eq!(peer(&mut c, &[Types::COMPTIME_FLOAT, f64t]), f64t);
    assert_eq!(peer(&mut c, &[f64t, Types::COMPTIME_FLOAT]), f64t);
    assert_eq!(peer(&mut c, &[Types::COMPTIME_INT, Types::COMPTIME_FLOAT]),
      Types::COMPTIME_FLOAT);
  }

  #[test]
  fn unreachable_absorbs() {
    let mut c = comp();
    let i32t = c.types.int(IntInfo { signed: true, bits: 32 });
    assert_eq!(peer(&mut c, &[Types::NORETURN, i32t]), i32t);
    assert_eq!(peer(&mut c, &[i32t, Types::NORETURN]), i32t);
  }

  #[test]
  fn arrays_of_unequal_len_promote_to_slice() {
    let mut c = comp();
    let i32t = c.types.int(IntInfo { signed: true, bits: 32 });
    let a2 = c.types.array(i32t, 2);
    let a3 = c.types.array(i32t, 3);
    let merged = peer(&mut c, &[a2, a3]);
    let TyKind::Slice(info) = c.types.kind(merged) else { panic!("expected slice") };
    assert!(info.is_const);
    assert_eq!(info.elem, i32t);
    // Direction-sensitive case must still produce the same type.
    assert_eq!(peer(&mut c, &[a3, a2]), merged);
  }

  #[test]
  fn pointer_const_broadening_commutes() {
    let mut c = comp();
    let u8t = c.types.int(IntInfo { signed: false, bits: 8 });
    let pm = c.types.ptr(PtrInfo::single(u8t, false));
    let pc = c.types.ptr(PtrInfo::single(u8t, true));
    assert_eq!(peer(&mut c, &[pm, pc]), pc);
    assert_eq!(peer(&mut c, &[pc, pm]), pc);
  }

  #[test]
  fn incompatible_pair_is_diagnosed() {
    let mut c = comp();
    let i32t = c.types.int(IntInfo { signed: true, bits: 32 });
    let boolt = Types::BOOL;
    assert_eq!(peer(&mut c, &[i32t, boolt]), Types::INVALID);
    assert!(c.diags.find("incompatible types").is_some());
  }
}
