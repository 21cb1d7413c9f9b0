//! Package-graph resolution: `@import` falls back from named packages to
//! relative files, and reports "unable to find" when both fail.

use std::path::PathBuf;

use hashbrown::HashMap;
use cinderc::{Compiler, Config, PackageResolver};
use cinderc::types::PkgId;
use cinderc::types::ast::NodeKind;
use cinderc::types::entity::DeclState;

/// Resolves named packages from a fixed table and relative imports against
/// a directory on disk.
struct DirResolver {
  packages: HashMap<String, PkgId>,
  root: PathBuf,
  next: u32,
  files: HashMap<String, PkgId>,
}

impl PackageResolver for DirResolver {
  fn resolve_import(&mut self, _from: PkgId, name: &str) -> Option<PkgId> {
    self.packages.get(name).copied()
  }

  fn resolve_file(&mut self, _from: PkgId, path: &str) -> Option<PkgId> {
    if let Some(&p) = self.files.get(path) { return Some(p) }
    if !self.root.join(path).is_file() { return None }
    self.next += 1;
    let p = PkgId(self.next);
    self.files.insert(path.to_owned(), p);
    Some(p)
  }
}

fn compile_import(c: &mut Compiler, name: &str) -> cinderc::types::ModuleId {
  let import_sym = c.syms.intern("import");
  let str_node = c.ast.add(NodeKind::StrLit(name.into()));
  let call = c.ast.add(NodeKind::BuiltinCall {
    name: import_sym, args: Box::new([str_node]),
  });
  let decl_name = c.syms.intern("m");
  let decl = c.ast.add(NodeKind::VarDecl {
    name: decl_name, is_const: true, is_pub: true, is_comptime: false,
    ty: None, init: call,
  });
  let root = c.ast.add(NodeKind::ContainerDecl {
    kind: cinderc::types::ast::ContainerKind::Struct,
    fields: Box::new([]),
    decls: Box::new([decl]),
  });
  c.compile(root)
}

#[test]
fn relative_file_fallback() {
  let dir = tempfile::tempdir().expect("temp dir");
  std::fs::write(dir.path().join("other.cn"), "").expect("write stub");
  let mut c = Compiler::new(Config::default());
  c.packages = Some(Box::new(DirResolver {
    packages: HashMap::new(),
    root: dir.path().to_owned(),
    next: 10,
    files: HashMap::new(),
  }));
  let module = compile_import(&mut c, "other.cn");
  assert!(!c.diags.has_errors(), "unexpected diagnostics: {:?}", c.diags.list());
  let m = c.syms.intern("m");
  let decl = c.ents.find_decl(module, m).expect("declared");
  match &c.ents.decls[decl].state {
    DeclState::Ok(v) => assert!(matches!(v.k, cinderc::value::ValueKind::Namespace(_))),
    s => panic!("import did not resolve: {s:?}"),
  }
}

#[test]
fn missing_import_is_diagnosed() {
  let dir = tempfile::tempdir().expect("temp dir");
  let mut c = Compiler::new(Config::default());
  c.packages = Some(Box::new(DirResolver {
    packages: HashMap::new(),
    root: dir.path().to_owned(),
    next: 10,
    files: HashMap::new(),
  }));
  compile_import(&mut c, "nope.cn");
  assert!(c.diags.find("unable to find 'nope.cn'").is_some(),
    "missing-import diagnostic expected: {:?}", c.diags.list());
}
