//! Uniform failure shape returned in place of a raised fault.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "ok": false, "error": { "code", "message", "trace_id" } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
  pub ok: bool,
  pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
  pub code: String,
  pub message: String,
  /// Operator-side correlation id. Never parsed by callers.
  pub trace_id: String,
}

impl ErrorEnvelope {
  /// Build an envelope whose code is `<prefix>_<status>`.
  ///
  /// Same inputs give the same code and message; the trace id is fresh each
  /// time.
  pub fn build(prefix: &str, status: u16, message: impl Into<String>) -> Self {
    Self {
      ok: false,
      error: ErrorBody {
        code: format!("{}_{}", prefix, status),
        message: message.into(),
        trace_id: new_trace_id(),
      },
    }
  }

  pub fn into_value(self) -> Value {
    serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
  }
}

/// Time-ordered unique id, e.g. `trace_0192f0c1...`.
fn new_trace_id() -> String {
  format!("trace_{}", uuid::Uuid::now_v7().simple())
}

/// Envelope factory bound to one upstream's code prefix.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeBuilder {
  prefix: &'static str,
}

impl EnvelopeBuilder {
  pub const fn new(prefix: &'static str) -> Self {
    Self { prefix }
  }

  pub fn build(&self, status: u16, message: impl Into<String>) -> ErrorEnvelope {
    ErrorEnvelope::build(self.prefix, status, message)
  }
}
