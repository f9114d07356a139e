//! Expression-based row filters.
//!
//! Canonical records are bound into an `evalexpr` context (numbers as floats,
//! everything else as strings) so overlay schemas can express business rules
//! such as `marketplace == "amazon.ca" && total > 0`.

use anyhow::{Context, Result};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, Function, HashMapContext, Node,
    Value as EvalValue, build_operator_tree, eval_with_context,
};
use rust_decimal::prelude::ToPrimitive;

use crate::record::{CanonicalRecord, CanonicalValue};

fn register_string_functions(context: &mut HashMapContext) -> Result<()> {
    context
        .set_function(
            "lower".into(),
            Function::new(|argument| {
                let value = expect_string(argument, "lower")?;
                Ok(EvalValue::String(value.to_lowercase()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "upper".into(),
            Function::new(|argument| {
                let value = expect_string(argument, "upper")?;
                Ok(EvalValue::String(value.to_uppercase()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    context
        .set_function(
            "trim".into(),
            Function::new(|argument| {
                let value = expect_string(argument, "trim")?;
                Ok(EvalValue::String(value.trim().to_string()))
            }),
        )
        .map_err(anyhow::Error::from)?;

    Ok(())
}

fn expect_string<'a>(value: &'a EvalValue, name: &str) -> Result<&'a str, evalexpr::EvalexprError> {
    if let EvalValue::String(s) = value {
        Ok(s)
    } else {
        Err(evalexpr::EvalexprError::CustomMessage(format!(
            "{name} expects a string argument"
        )))
    }
}

fn value_to_evalexpr(value: &CanonicalValue) -> EvalValue {
    match value {
        CanonicalValue::Number(n) => match n.to_f64() {
            Some(f) => EvalValue::Float(f),
            None => EvalValue::String(n.to_string()),
        },
        CanonicalValue::Text(s) | CanonicalValue::Date(s) => EvalValue::String(s.clone()),
    }
}

pub fn build_context(record: &CanonicalRecord) -> Result<HashMapContext> {
    let mut context: HashMapContext = HashMapContext::new();
    register_string_functions(&mut context)?;
    for (key, value) in record.iter() {
        context
            .set_value(key.to_string(), value_to_evalexpr(value))
            .with_context(|| format!("Binding field '{key}'"))?;
    }
    Ok(context)
}

/// Parses an expression without evaluating it.
pub fn validate_expression(expression: &str) -> Result<()> {
    let _tree: Node = build_operator_tree(expression)
        .with_context(|| format!("Parsing expression '{expression}'"))?;
    Ok(())
}

pub fn evaluate_record_filter(expression: &str, record: &CanonicalRecord) -> Result<bool> {
    let context = build_context(record)?;
    let result = eval_with_context(expression, &context)
        .with_context(|| format!("Evaluating expression '{expression}'"))?;
    Ok(eval_value_truthy(result))
}

pub fn eval_value_truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(eval_value_truthy),
        EvalValue::Empty => false,
    }
}
