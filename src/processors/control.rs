//! Flow-control processors: the check-phase marker, conditional stop and
//! deprecation notices.

use super::{Flow, InputVariable, OutputVariable, Processor, ProcessorContext, ProcessorError};
use crate::core::types::{is_truthy, value_to_string, Value, END_OF_CHECK_PHASE, STOP_PROCESSING_KEY};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

/// Marks the end of the check phase. Does nothing by itself; the executor
/// ends check-mode runs after it.
#[derive(Debug, Default)]
pub struct EndOfCheckPhase;

impl Processor for EndOfCheckPhase {
    fn name(&self) -> &'static str {
        END_OF_CHECK_PHASE
    }

    fn description(&self) -> &'static str {
        "Marks the end of the check phase. Check-mode runs stop here."
    }

    fn input_variables(&self) -> Vec<InputVariable> {
        Vec::new()
    }

    fn output_variables(&self) -> Vec<OutputVariable> {
        Vec::new()
    }

    fn execute(&self, _ctx: &mut ProcessorContext<'_>) -> Result<Flow, ProcessorError> {
        Ok(Flow::Continue)
    }
}

/// Sets `stop_processing_recipe` from a predicate over the environment.
#[derive(Debug, Default)]
pub struct StopProcessingIf;

impl Processor for StopProcessingIf {
    fn name(&self) -> &'static str {
        "StopProcessingIf"
    }

    fn description(&self) -> &'static str {
        "Stops the recipe when a predicate over the environment holds."
    }

    fn input_variables(&self) -> Vec<InputVariable> {
        vec![InputVariable::required(
            "predicate",
            "'<key> == <literal>', '<key> != <literal>', a bare key, TRUEPREDICATE or FALSEPREDICATE",
        )]
    }

    fn output_variables(&self) -> Vec<OutputVariable> {
        vec![OutputVariable::new(
            STOP_PROCESSING_KEY,
            "true when the predicate held",
        )]
    }

    fn execute(&self, ctx: &mut ProcessorContext<'_>) -> Result<Flow, ProcessorError> {
        let text = ctx.require_str("predicate")?.to_string();
        let predicate = Predicate::parse(&text)?;
        let holds = predicate.evaluate(ctx);
        ctx.info(format!("predicate '{}' is {}", text, holds));
        ctx.set(STOP_PROCESSING_KEY, Value::Bool(holds));
        Ok(Flow::Continue)
    }
}

/// Parsed predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    Truthy(String),
    Compare {
        key: String,
        negate: bool,
        literal: Value,
    },
}

fn compare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z0-9_]+)\s*(==|!=)\s*(.*?)\s*$").expect("predicate pattern is valid")
    })
}

impl Predicate {
    pub fn parse(text: &str) -> Result<Self, ProcessorError> {
        let trimmed = text.trim();
        match trimmed {
            "TRUEPREDICATE" => return Ok(Self::Const(true)),
            "FALSEPREDICATE" => return Ok(Self::Const(false)),
            _ => {}
        }

        if let Some(caps) = compare_re().captures(trimmed) {
            let literal = parse_literal(&caps[3]).ok_or_else(|| ProcessorError::InvalidInput {
                key: "predicate".to_string(),
                reason: format!("missing right-hand side in '{}'", trimmed),
            })?;
            return Ok(Self::Compare {
                key: caps[1].to_string(),
                negate: &caps[2] == "!=",
                literal,
            });
        }

        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Ok(Self::Truthy(trimmed.to_string()));
        }

        Err(ProcessorError::InvalidInput {
            key: "predicate".to_string(),
            reason: format!("cannot parse '{}'", trimmed),
        })
    }

    pub fn evaluate(&self, ctx: &ProcessorContext<'_>) -> bool {
        match self {
            Self::Const(b) => *b,
            Self::Truthy(key) => ctx.get(key).is_some_and(is_truthy),
            Self::Compare {
                key,
                negate,
                literal,
            } => {
                let left = ctx.get(key).unwrap_or(&Value::Null);
                literal_matches(left, literal) != *negate
            }
        }
    }
}

fn parse_literal(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Some(Value::String(raw[1..raw.len() - 1].to_string()));
        }
    }
    match raw.to_ascii_uppercase().as_str() {
        "TRUE" | "YES" => return Some(Value::Bool(true)),
        "FALSE" | "NO" => return Some(Value::Bool(false)),
        "NIL" | "NULL" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(json!(n));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Some(json!(f));
    }
    Some(Value::String(raw.to_string()))
}

fn literal_matches(left: &Value, literal: &Value) -> bool {
    match literal {
        Value::Bool(b) => is_truthy(left) == *b,
        Value::Null => left.is_null(),
        Value::Number(n) => {
            let right = n.as_f64();
            let left = match left {
                Value::Number(m) => m.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            left.is_some() && left == right
        }
        other => value_to_string(left) == value_to_string(other),
    }
}

/// Emits a deprecation warning for the running recipe.
#[derive(Debug, Default)]
pub struct DeprecationWarning;

const DEFAULT_DEPRECATION: &str =
    "This recipe has been deprecated. It may be removed soon. See the recipe's description for details.";

impl Processor for DeprecationWarning {
    fn name(&self) -> &'static str {
        "DeprecationWarning"
    }

    fn description(&self) -> &'static str {
        "Warns that the recipe is deprecated."
    }

    fn input_variables(&self) -> Vec<InputVariable> {
        vec![
            InputVariable::optional("warning_message", "Text of the warning")
                .with_default(Value::String(DEFAULT_DEPRECATION.to_string())),
        ]
    }

    fn output_variables(&self) -> Vec<OutputVariable> {
        vec![OutputVariable::new(
            "deprecation_summary_result",
            "Recipe name and warning text for run summaries",
        )]
    }

    fn execute(&self, ctx: &mut ProcessorContext<'_>) -> Result<Flow, ProcessorError> {
        let message = ctx
            .get_string("warning_message")
            .unwrap_or_else(|| DEFAULT_DEPRECATION.to_string());
        let recipe = ctx.get_string("RECIPE_IDENTIFIER").unwrap_or_default();
        ctx.warn(message.clone());
        ctx.set(
            "deprecation_summary_result",
            json!({ "recipe": recipe, "warning": message }),
        );
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::Environment;
    use crate::processors::StepEffects;
    use indexmap::IndexMap;

    fn run(p: &dyn Processor, env: &Environment, args: &[(&str, Value)]) -> StepEffects {
        let args: IndexMap<String, Value> =
            args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let mut ctx = ProcessorContext::new(env, args);
        let flow = p.execute(&mut ctx).unwrap();
        ctx.finish(flow)
    }

    #[test]
    fn test_end_of_check_phase_is_noop() {
        let env = Environment::new();
        let effects = run(&EndOfCheckPhase, &env, &[]);
        assert_eq!(effects.flow, Flow::Continue);
        assert!(effects.outputs.is_empty());
        assert_eq!(EndOfCheckPhase.name(), END_OF_CHECK_PHASE);
    }

    #[test]
    fn test_predicate_parse() {
        assert_eq!(Predicate::parse("TRUEPREDICATE").unwrap(), Predicate::Const(true));
        assert_eq!(Predicate::parse(" FALSEPREDICATE ").unwrap(), Predicate::Const(false));
        assert_eq!(
            Predicate::parse("download_changed == FALSE").unwrap(),
            Predicate::Compare {
                key: "download_changed".to_string(),
                negate: false,
                literal: Value::Bool(false),
            }
        );
        assert_eq!(
            Predicate::parse("version != '1.0'").unwrap(),
            Predicate::Compare {
                key: "version".to_string(),
                negate: true,
                literal: json!("1.0"),
            }
        );
        assert_eq!(Predicate::parse("flag").unwrap(), Predicate::Truthy("flag".to_string()));
        assert!(Predicate::parse("a ==").is_err());
        assert!(Predicate::parse("a < b").is_err());
    }

    #[test]
    fn test_stop_processing_if_true() {
        let mut env = Environment::new();
        env.set("download_changed", json!(false));
        let effects = run(
            &StopProcessingIf,
            &env,
            &[("predicate", json!("download_changed == FALSE"))],
        );
        assert_eq!(effects.outputs[STOP_PROCESSING_KEY], json!(true));
    }

    #[test]
    fn test_stop_processing_if_false() {
        let mut env = Environment::new();
        env.set("version", json!("2.0"));
        let effects = run(&StopProcessingIf, &env, &[("predicate", json!("version == \"1.0\""))]);
        assert_eq!(effects.outputs[STOP_PROCESSING_KEY], json!(false));
    }

    #[test]
    fn test_stop_processing_if_numeric() {
        let mut env = Environment::new();
        env.set("count", json!("3"));
        let effects = run(&StopProcessingIf, &env, &[("predicate", json!("count != 3"))]);
        assert_eq!(effects.outputs[STOP_PROCESSING_KEY], json!(false));
    }

    #[test]
    fn test_stop_processing_if_missing_key_is_null() {
        let env = Environment::new();
        let effects = run(&StopProcessingIf, &env, &[("predicate", json!("absent == nil"))]);
        assert_eq!(effects.outputs[STOP_PROCESSING_KEY], json!(true));
    }

    #[test]
    fn test_stop_processing_if_bad_predicate() {
        let env = Environment::new();
        let mut args = IndexMap::new();
        args.insert("predicate".to_string(), json!("?? nonsense"));
        let mut ctx = ProcessorContext::new(&env, args);
        assert!(matches!(
            StopProcessingIf.execute(&mut ctx),
            Err(ProcessorError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_deprecation_warning_custom_message() {
        let mut env = Environment::new();
        env.set("RECIPE_IDENTIFIER", json!("com.example.old"));
        let effects = run(
            &DeprecationWarning,
            &env,
            &[("warning_message", json!("use com.example.new"))],
        );
        assert_eq!(effects.warnings, vec!["use com.example.new"]);
        assert_eq!(
            effects.outputs["deprecation_summary_result"]["recipe"],
            json!("com.example.old")
        );
    }

    #[test]
    fn test_deprecation_warning_default_message() {
        let env = Environment::new();
        let effects = run(&DeprecationWarning, &env, &[]);
        assert_eq!(effects.warnings, vec![DEFAULT_DEPRECATION]);
    }
}
