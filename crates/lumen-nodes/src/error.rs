//! Node-level errors.

/// Errors from parsing or evaluating a branch expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
  #[error("expression is {len} characters long, limit is {max}")]
  TooLong { len: usize, max: usize },

  #[error("syntax error at {position}: {message}")]
  Syntax { position: usize, message: String },

  #[error("type error: {message}")]
  Type { message: String },

  #[error("division by zero")]
  DivisionByZero,
}

impl ExpressionError {
  pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
    Self::Syntax {
      position,
      message: message.into(),
    }
  }

  pub(crate) fn type_error(message: impl Into<String>) -> Self {
    Self::Type {
      message: message.into(),
    }
  }
}

/// Errors reported by device capabilities.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapabilityError {
  /// The user denied the permission.
  #[error("permission denied for {capability}")]
  PermissionDenied { capability: String },

  /// The hardware is missing or busy.
  #[error("{capability} unavailable: {message}")]
  Unavailable { capability: String, message: String },

  /// The requested value is out of range.
  #[error("invalid {capability} request: {message}")]
  InvalidRequest { capability: String, message: String },
}
