//! The diagnostic sink. Analysis reports as many errors as it can in one
//! compilation; the sink collects them in emission order and hands out
//! handles so "called from here" chains and type-mismatch drill-downs can be
//! attached after the fact.

use crate::types::FileSpan;

/// One reported problem, with any attached notes.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  /// The primary location.
  pub span: FileSpan,
  /// The message.
  pub msg: String,
  /// Attached notes, in attachment order.
  pub notes: Vec<(FileSpan, String)>,
}

/// A handle to an emitted diagnostic, for attaching notes.
#[derive(Clone, Copy, Debug)]
pub struct MsgHandle(usize);

/// The severity-less error collector. The core has no warnings: advisory
/// checks are errors too, matching the rest of the pipeline.
#[derive(Debug, Default)]
pub struct DiagSink {
  diags: Vec<Diagnostic>,
}

impl DiagSink {
  /// Report an error, returning a handle for notes.
  pub fn emit_error(&mut self, span: FileSpan, msg: impl Into<String>) -> MsgHandle {
    let h = MsgHandle(self.diags.len());
    self.diags.push(Diagnostic { span, msg: msg.into(), notes: vec![] });
    h
  }

  /// Attach a note to a previously emitted error.
  pub fn add_note(&mut self, h: MsgHandle, span: FileSpan, text: impl Into<String>) {
    self.diags[h.0].notes.push((span, text.into()));
  }

  /// All diagnostics emitted so far.
  #[must_use] pub fn list(&self) -> &[Diagnostic] { &self.diags }

  /// Whether any diagnostic has been emitted.
  #[must_use] pub fn has_errors(&self) -> bool { !self.diags.is_empty() }

  /// Find a diagnostic whose message contains `needle`. Test helper.
  #[must_use] pub fn find(&self, needle: &str) -> Option<&Diagnostic> {
    self.diags.iter().find(|d| d.msg.contains(needle))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn notes_attach_to_the_right_error() {
    let mut sink = DiagSink::default();
    let a = sink.emit_error(FileSpan::default(), "first");
    let _b = sink.emit_error(FileSpan::default(), "second");
    sink.add_note(a, FileSpan::default(), "called from here");
    assert_eq!(sink.list()[0].notes.len(), 1);
    assert!(sink.list()[1].notes.is_empty());
    assert!(sink.find("second").is_some());
    assert!(sink.find("third").is_none());
  }
}
