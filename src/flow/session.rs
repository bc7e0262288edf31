use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The live execution context of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Active flow first; linked flows are pushed behind it.
    #[serde(default)]
    pub flows_queue: Vec<FlowContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowContext {
    pub flow: SessionFlow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlow {
    pub id: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Variable {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<VariableValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum VariableValue {
    String(String),
    Number(f64),
    Boolean(bool),
    List(Vec<VariableValue>),
    Null,
}

impl SessionState {
    pub fn new(flows_queue: Vec<FlowContext>) -> Self {
        Self { flows_queue }
    }

    /// Bindings of the active flow, empty when nothing is queued.
    pub fn active_variables(&self) -> &[Variable] {
        self.flows_queue
            .first()
            .map(|ctx| ctx.flow.variables.as_slice())
            .unwrap_or(&[])
    }
}

impl FlowContext {
    pub fn new(flow_id: impl Into<String>, variables: Vec<Variable>) -> Self {
        Self {
            flow: SessionFlow {
                id: flow_id.into(),
                variables,
            },
            result_id: None,
        }
    }
}

impl Variable {
    pub fn new(id: impl Into<String>, name: impl Into<String>, value: Option<VariableValue>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value,
        }
    }
}

impl VariableValue {
    pub fn to_json(&self) -> Value {
        match self {
            VariableValue::String(s) => json!(s),
            VariableValue::Number(n) => json!(n),
            VariableValue::Boolean(b) => json!(b),
            VariableValue::List(l) => json!(l.iter().map(|v| v.to_json()).collect::<Vec<_>>()),
            VariableValue::Null => Value::Null,
        }
    }

    /// Text spliced into a template: strings verbatim, whole numbers
    /// without a fraction, everything else JSON-encoded.
    pub fn to_template_string(&self) -> String {
        match self {
            VariableValue::String(s) => s.clone(),
            VariableValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            VariableValue::Null => String::new(),
            other => other.to_json().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_variables_come_from_first_flow() {
        let state = SessionState::new(vec![
            FlowContext::new(
                "main",
                vec![Variable::new("v1", "count", Some(VariableValue::String("5".into())))],
            ),
            FlowContext::new(
                "linked",
                vec![Variable::new("v2", "other", None)],
            ),
        ]);
        let vars = state.active_variables();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "count");
    }

    #[test]
    fn test_active_variables_empty_queue() {
        assert!(SessionState::default().active_variables().is_empty());
    }

    #[test]
    fn test_template_string_rendering() {
        assert_eq!(VariableValue::String("abc".into()).to_template_string(), "abc");
        assert_eq!(VariableValue::Number(5.0).to_template_string(), "5");
        assert_eq!(VariableValue::Number(2.5).to_template_string(), "2.5");
        assert_eq!(VariableValue::Boolean(true).to_template_string(), "true");
        assert_eq!(VariableValue::Null.to_template_string(), "");
        let list = VariableValue::List(vec![
            VariableValue::String("a".into()),
            VariableValue::Null,
        ]);
        assert_eq!(list.to_template_string(), r#"["a",null]"#);
    }

    #[test]
    fn test_session_state_deserializes_camel_case() {
        let state: SessionState = serde_json::from_value(json!({
            "flowsQueue": [
                {
                    "flow": {
                        "id": "main",
                        "variables": [
                            { "id": "v1", "name": "count", "value": "5" },
                            { "id": "v2", "name": "tags", "value": ["x", "y"] },
                            { "id": "v3", "name": "empty" }
                        ]
                    },
                    "resultId": "r1"
                }
            ]
        }))
        .unwrap();
        let vars = state.active_variables();
        assert_eq!(vars[0].value, Some(VariableValue::String("5".into())));
        assert_eq!(
            vars[1].value,
            Some(VariableValue::List(vec![
                VariableValue::String("x".into()),
                VariableValue::String("y".into()),
            ]))
        );
        assert!(vars[2].value.is_none());
        assert_eq!(state.flows_queue[0].result_id.as_deref(), Some("r1"));
    }
}
