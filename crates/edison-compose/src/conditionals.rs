//! Step 3: `{{if:EXPR}}...{{else}}...{{/if}}` and `{{include-if:EXPR:path}}`.
//!
//! EXPR is a function-call grammar over a closed set. Unknown functions and
//! malformed expressions are template errors; the processor preserves the
//! original marker in that case.

use regex::{Captures, Regex};

use edison_core::EdisonError;

use crate::context::{yaml_value_to_string, TransformContext, Transformer};

/// Evaluates condition expressions like `and(has-pack(python), not(env(CI)))`.
pub struct ConditionEvaluator<'a> {
    ctx: &'a TransformContext,
    function_re: Regex,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(ctx: &'a TransformContext) -> Self {
        Self {
            ctx,
            function_re: Regex::new(r"^(\w+(?:-\w+)*)\((.*)\)$").expect("static regex"),
        }
    }

    pub fn evaluate(&self, expr: &str) -> Result<bool, EdisonError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(EdisonError::Template("Empty condition expression".into()));
        }

        let caps = self
            .function_re
            .captures(expr)
            .ok_or_else(|| EdisonError::Template(format!("Invalid condition expression: {expr}")))?;
        let func = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let args = parse_args(caps.get(2).map(|m| m.as_str()).unwrap_or(""));

        let expect_arity = |n: usize| -> Result<(), EdisonError> {
            if args.len() != n {
                return Err(EdisonError::Template(format!(
                    "{func}() expects {n} argument(s), got {}",
                    args.len()
                )));
            }
            Ok(())
        };

        match func {
            "has-pack" => {
                expect_arity(1)?;
                Ok(self.ctx.active_packs.iter().any(|p| p == &args[0]))
            }
            "config" => {
                expect_arity(1)?;
                Ok(self
                    .ctx
                    .get_config(&args[0])
                    .map(is_truthy)
                    .unwrap_or(false))
            }
            "config-eq" => {
                expect_arity(2)?;
                let actual = self
                    .ctx
                    .get_config(&args[0])
                    .map(yaml_value_to_string)
                    .unwrap_or_else(|| "None".to_string());
                Ok(actual == args[1])
            }
            "env" => {
                expect_arity(1)?;
                Ok(std::env::var(&args[0]).map(|v| !v.is_empty()).unwrap_or(false))
            }
            "file-exists" => {
                expect_arity(1)?;
                Ok(self
                    .ctx
                    .project_root
                    .as_ref()
                    .map(|root| root.join(&args[0]).exists())
                    .unwrap_or(false))
            }
            "not" => {
                expect_arity(1)?;
                Ok(!self.evaluate(&args[0])?)
            }
            "and" => {
                expect_arity(2)?;
                Ok(self.evaluate(&args[0])? && self.evaluate(&args[1])?)
            }
            "or" => {
                expect_arity(2)?;
                Ok(self.evaluate(&args[0])? || self.evaluate(&args[1])?)
            }
            unknown => Err(EdisonError::Template(format!(
                "Unknown condition function: {unknown}. \
                 Available: and, config, config-eq, env, file-exists, has-pack, not, or"
            ))),
        }
    }
}

fn is_truthy(value: &serde_yaml::Value) -> bool {
    use serde_yaml::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(seq) => !seq.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        Value::Tagged(t) => is_truthy(&t.value),
    }
}

/// Split comma-separated arguments, respecting nested parentheses.
fn parse_args(args_str: &str) -> Vec<String> {
    let trimmed = args_str.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for ch in trimmed.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

/// Pipeline step processing if/else blocks and conditional includes.
pub struct ConditionalTransformer {
    if_else_re: Regex,
    if_re: Regex,
    include_if_re: Regex,
}

impl ConditionalTransformer {
    pub fn new() -> Self {
        Self {
            if_else_re: Regex::new(r"(?s)\{\{if:([^}]+)\}\}(.*?)\{\{else\}\}(.*?)\{\{/if\}\}")
                .expect("static regex"),
            if_re: Regex::new(r"(?s)\{\{if:([^}]+)\}\}(.*?)\{\{/if\}\}").expect("static regex"),
            include_if_re: Regex::new(r"\{\{include-if:([^:}]+):([^}]+)\}\}")
                .expect("static regex"),
        }
    }
}

impl Default for ConditionalTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for ConditionalTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        // If/else first; the plain-if pattern would otherwise swallow the
        // else arm.
        let content = {
            let evaluator = ConditionEvaluator::new(ctx);
            let content = self
                .if_else_re
                .replace_all(content, |caps: &Captures| {
                    match evaluator.evaluate(&caps[1]) {
                        Ok(true) => caps[2].trim().to_string(),
                        Ok(false) => caps[3].trim().to_string(),
                        Err(_) => caps[0].to_string(),
                    }
                })
                .into_owned();

            self.if_re
                .replace_all(&content, |caps: &Captures| {
                    match evaluator.evaluate(&caps[1]) {
                        Ok(true) => caps[2].trim().to_string(),
                        Ok(false) => String::new(),
                        Err(_) => caps[0].to_string(),
                    }
                })
                .into_owned()
        };

        // Conditional includes: evaluation borrows ctx immutably, resolution
        // records into it, so collect decisions first.
        let mut decisions: Vec<(std::ops::Range<usize>, Option<String>)> = Vec::new();
        {
            let evaluator = ConditionEvaluator::new(ctx);
            for caps in self.include_if_re.captures_iter(&content) {
                let whole = caps.get(0).expect("group 0");
                let decision = match evaluator.evaluate(&caps[1]) {
                    Ok(true) => Some(caps[2].trim().to_string()),
                    Ok(false) => None,
                    Err(_) => {
                        // Invalid expression: keep the original marker.
                        continue;
                    }
                };
                decisions.push((whole.range(), decision));
            }
        }

        let mut out = String::with_capacity(content.len());
        let mut last = 0;
        for (range, decision) in decisions {
            out.push_str(&content[last..range.start]);
            match decision {
                Some(path) => match ctx.resolve_path(&path) {
                    Some(full) => {
                        if let Ok(body) = std::fs::read_to_string(&full) {
                            ctx.record_include(&path);
                            out.push_str(&body);
                        }
                    }
                    None => {}
                },
                None => {}
            }
            last = range.end;
        }
        out.push_str(&content[last..]);

        ctx.conditionals_evaluated += 1;
        out
    }
}
