//! If/else branch routing.

use async_trait::async_trait;
use lumen_graph::GraphNode;
use lumen_registry::NodeError;
use lumen_signal::{HandlerError, Signal, SignalBus, SignalHandler, SignalPropagation};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ExpressionError;
use crate::expression::{Expression, Scope, truthy};

/// Where the branch reads its test value from.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchSource {
  /// The incoming payload: a dotted `field` inside it, or the signal level.
  Input { field: Option<String> },
  /// A variable, by name.
  Variable { key: String },
  /// An expression over the signal and the variables.
  Expression(Expression),
}

impl BranchSource {
  /// Read the source from node settings.
  ///
  /// `source` may name `"input"`, `"variable"` or `"expression"`; without it
  /// the source is the expression if one is set, else the variable, else the
  /// input.
  pub fn from_settings(settings: &Value) -> Result<Self, NodeError> {
    let text = |key: &str| non_empty(settings, key);

    let kind = match text("source") {
      Some(kind) => kind,
      None if text("expression").is_some() => "expression",
      None if text("variable").is_some() => "variable",
      None => "input",
    };

    match kind {
      "input" => Ok(BranchSource::Input {
        field: text("field").map(str::to_string),
      }),
      "variable" => {
        let key = text("variable").ok_or_else(|| NodeError::invalid("variable source needs 'variable'"))?;
        Ok(BranchSource::Variable {
          key: key.to_string(),
        })
      }
      "expression" => {
        let source =
          text("expression").ok_or_else(|| NodeError::invalid("expression source needs 'expression'"))?;
        let expression = Expression::parse(source)
          .map_err(|e| NodeError::invalid(format!("bad expression: {}", e)))?;
        Ok(BranchSource::Expression(expression))
      }
      other => Err(NodeError::invalid(format!("unknown branch source '{}'", other))),
    }
  }

  fn evaluate(&self, signal: &Signal, bus: &SignalBus) -> Result<bool, ExpressionError> {
    match self {
      BranchSource::Input { field: None } => Ok(signal.is_on()),
      BranchSource::Input { field: Some(field) } => {
        let mut current = signal.data.as_ref().unwrap_or(&Value::Null);
        for segment in field.split('.') {
          current = current.get(segment).unwrap_or(&Value::Null);
        }
        Ok(truthy(current))
      }
      BranchSource::Variable { key } => Ok(bus.get_variable(key).is_some_and(|v| truthy(&v))),
      BranchSource::Expression(expression) => {
        let scope = Scope::new(signal.to_value(), bus.get_all_variables());
        expression.evaluate_bool(&scope)
      }
    }
  }
}

/// An if/else node's signal handler.
///
/// Routes to every target of the node's first output port when the test
/// holds, of its second port otherwise. A side with no connections blocks.
pub struct IfElse {
  node: GraphNode,
  source: BranchSource,
  invert: bool,
}

impl IfElse {
  pub fn new(node: GraphNode, source: BranchSource, invert: bool) -> Self {
    Self {
      node,
      source,
      invert,
    }
  }
}

#[async_trait]
impl SignalHandler for IfElse {
  async fn handle(
    &self,
    signal: &Signal,
    bus: &SignalBus,
  ) -> Result<SignalPropagation, HandlerError> {
    let (result, data) = match self.source.evaluate(signal, bus) {
      Ok(result) => (result != self.invert, None),
      Err(e) => {
        warn!(node_id = %self.node.id, error = %e, "branch_evaluation_failed");
        (false, Some(with_error(signal.data.as_ref(), &e.to_string())))
      }
    };

    let targets = self.node.branch_targets(if result { 0 } else { 1 });
    debug!(node_id = %self.node.id, result, targets = ?targets, "branch_routed");
    if targets.is_empty() {
      return Ok(SignalPropagation::block());
    }

    Ok(SignalPropagation {
      propagate: true,
      data,
      target_outputs: Some(targets),
      delay: None,
    })
  }
}

fn non_empty<'a>(settings: &'a Value, key: &str) -> Option<&'a str> {
  settings
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.trim().is_empty())
}

fn with_error(data: Option<&Value>, message: &str) -> Value {
  match data {
    Some(Value::Object(map)) => {
      let mut map = map.clone();
      map.insert("error".to_string(), Value::String(message.to_string()));
      Value::Object(map)
    }
    None | Some(Value::Null) => json!({ "error": message }),
    Some(other) => json!({ "error": message, "value": other }),
  }
}
