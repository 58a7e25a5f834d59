//! Rule matcher (C4).
//!
//! A rule's predicate is five parts, all of which must hold for the rule to
//! match (spec.md §3/§4.2): a priority floor, a source set, a required tag
//! subset, an output-field equality map, and an optional expression. Only
//! the expression is a user-authored mini-language; the other four are
//! plain structural checks against the event, evaluated before the
//! expression ever runs.

use std::collections::BTreeMap;

use evalexpr::{ContextWithMutableVariables, HashMapContext, Node, Value as EvalValue};

use crate::error::MatchError;
use crate::event::{Event, FieldValue, Priority};
use crate::rule::RuleSpec;

/// A compiled match predicate, ready to evaluate repeatedly without
/// re-parsing its optional expression part.
pub struct MatchPredicate {
    priority_floor: Option<Priority>,
    sources: Vec<String>,
    tags: Vec<String>,
    match_fields: BTreeMap<String, FieldValue>,
    expr: Option<CompiledExpr>,
}

struct CompiledExpr {
    source: String,
    node: Node,
}

impl MatchPredicate {
    /// Compiles a rule's predicate: the structural parts are copied as-is,
    /// the optional expression (if present) is parsed once here so
    /// `matches` never re-parses it.
    pub fn compile(spec: &RuleSpec) -> Result<MatchPredicate, MatchError> {
        let expr = match &spec.match_expr {
            Some(source) => {
                let node = evalexpr::build_operator_tree(source).map_err(|err| MatchError::Compile {
                    expr: source.clone(),
                    source: err,
                })?;
                Some(CompiledExpr {
                    source: source.clone(),
                    node,
                })
            }
            None => None,
        };

        Ok(MatchPredicate {
            priority_floor: spec.priority_floor,
            sources: spec.sources.clone(),
            tags: spec.tags.clone(),
            match_fields: spec.match_fields.clone(),
            expr,
        })
    }

    pub fn source(&self) -> Option<&str> {
        self.expr.as_ref().map(|e| e.source.as_str())
    }

    /// Evaluates every part of the predicate against `event`, short-circuiting
    /// on the first structural part that fails before ever touching the
    /// (comparatively expensive) expression evaluator. A non-boolean
    /// expression result is treated as a compile-time mistake in the rule
    /// file and surfaces as an error rather than silently matching or not
    /// matching.
    pub fn matches(&self, event: &Event) -> Result<bool, MatchError> {
        if !meets_priority_floor(event, self.priority_floor) {
            return Ok(false);
        }

        if !self.sources.is_empty() && !self.sources.iter().any(|s| s == &event.source) {
            return Ok(false);
        }

        if !self.tags.iter().all(|tag| event.tags.contains(tag)) {
            return Ok(false);
        }

        if !self
            .match_fields
            .iter()
            .all(|(key, value)| event.output_fields.get(key) == Some(value))
        {
            return Ok(false);
        }

        match &self.expr {
            Some(expr) => {
                let context = build_context(event);
                let value = expr
                    .node
                    .eval_with_context(&context)
                    .map_err(|err| MatchError::Eval {
                        expr: expr.source.clone(),
                        source: err,
                    })?;
                match value {
                    EvalValue::Boolean(b) => Ok(b),
                    other => Err(MatchError::Eval {
                        expr: expr.source.clone(),
                        source: evalexpr::EvalexprError::expected_boolean(other),
                    }),
                }
            }
            None => Ok(true),
        }
    }
}

/// Builds the expression context the predicate's *optional* fifth part
/// evaluates against: `source`, `priority` (as its rank), every output
/// field by name, and `tags` joined with commas as a convenience binding
/// for expressions that want `str::contains` over them. The structural
/// four parts (priority floor, sources, tags subset, match_fields) are
/// evaluated directly against the event in `MatchPredicate::matches`, not
/// through this context.
fn build_context(event: &Event) -> HashMapContext {
    let mut context = HashMapContext::new();

    let _ = context.set_value("source".into(), EvalValue::String(event.source.clone()));
    let _ = context.set_value(
        "priority".into(),
        EvalValue::Int(event.priority.rank() as i64),
    );
    let _ = context.set_value("rule".into(), EvalValue::String(event.rule.clone()));
    let _ = context.set_value("output".into(), EvalValue::String(event.output.clone()));
    let _ = context.set_value("tags".into(), EvalValue::String(event.tags.join(",")));

    for (key, value) in &event.output_fields {
        let binding = sanitize_identifier(key);
        let eval_value = match value {
            FieldValue::Bool(b) => EvalValue::Boolean(*b),
            FieldValue::Number(n) => EvalValue::Float(*n),
            FieldValue::String(s) => EvalValue::String(s.clone()),
        };
        let _ = context.set_value(binding, eval_value);
    }

    context
}

/// `evalexpr` identifiers can't contain dots, but output field names
/// (`k8s.pod.name`) always do, so rule expressions reference them with
/// underscores instead.
fn sanitize_identifier(key: &str) -> String {
    key.replace('.', "_")
}

/// Priority-floor predicate (spec.md §4.2): "event priority numeric rank ≥
/// rule's rank". A rule with no floor configured always passes this part.
fn meets_priority_floor(event: &Event, floor: Option<Priority>) -> bool {
    match floor {
        Some(floor) => event.priority >= floor,
        None => true,
    }
}
