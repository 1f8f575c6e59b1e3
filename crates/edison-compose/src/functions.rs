//! Custom template functions: `{{function:name(args)}}` and the
//! `{{fn:name arg1 arg2}}` alias.
//!
//! Functions are Rust callables registered on a [`FunctionRegistry`] at build
//! time (core built-ins, pack crates, the embedding binary). Every function
//! receives the transform context plus parsed arguments; failures render as
//! inline `[ERROR: ...]` markers.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

use edison_core::EdisonError;

use crate::context::{json_value_to_string, TransformContext, Transformer};

/// A parsed function argument.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// A context variable referenced by bare name in `{{fn:...}}` form.
    Json(JsonValue),
}

impl FunctionArg {
    pub fn as_display_string(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Json(v) => json_value_to_string(v),
        }
    }
}

pub type TemplateFunction =
    Arc<dyn Fn(&TransformContext, &[FunctionArg]) -> Result<String, EdisonError> + Send + Sync>;

/// Named callables available to templates. Later registrations override
/// earlier ones, mirroring layer precedence.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, TemplateFunction>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the core built-ins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("upper", |_ctx, args| {
            Ok(args
                .first()
                .map(|a| a.as_display_string().to_uppercase())
                .unwrap_or_default())
        });
        registry.register("lower", |_ctx, args| {
            Ok(args
                .first()
                .map(|a| a.as_display_string().to_lowercase())
                .unwrap_or_default())
        });
        registry.register("join", |_ctx, args| {
            let sep = args
                .first()
                .map(|a| a.as_display_string())
                .unwrap_or_else(|| ", ".to_string());
            let parts: Vec<String> = args.iter().skip(1).map(|a| a.as_display_string()).collect();
            Ok(parts.join(&sep))
        });
        registry.register("project-name", |ctx, _args| {
            Ok(ctx
                .project_root
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string()))
        });
        registry.register("active-packs", |ctx, _args| Ok(ctx.active_packs.join(", ")));
        registry
    }

    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&TransformContext, &[FunctionArg]) -> Result<String, EdisonError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(func));
    }

    pub fn get(&self, name: &str) -> Option<&TemplateFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    /// Merge another registry on top of this one (later layer wins).
    pub fn extend(&mut self, other: FunctionRegistry) {
        self.functions.extend(other.functions);
    }
}

fn coerce_token(token: &str, ctx: &TransformContext) -> FunctionArg {
    if let Some(value) = ctx.context_vars.get(token) {
        return FunctionArg::Json(value.clone());
    }
    match token.to_ascii_lowercase().as_str() {
        "true" => return FunctionArg::Bool(true),
        "false" => return FunctionArg::Bool(false),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return FunctionArg::Int(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return FunctionArg::Float(f);
    }
    FunctionArg::Str(token.to_string())
}

/// Parse comma-separated literal arguments: quoted strings, ints, floats,
/// booleans. Falls back to one unquoted string argument.
fn parse_literal_args(args_str: &str) -> Vec<FunctionArg> {
    let trimmed = args_str.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = trimmed.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                    args.push(FunctionArg::Str(current.clone()));
                    current.clear();
                    // Swallow a following comma and whitespace.
                    while matches!(chars.peek(), Some(' ') | Some(',')) {
                        chars.next();
                    }
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                }
                ',' => {
                    let token = current.trim().to_string();
                    if !token.is_empty() {
                        args.push(literal_token(&token));
                    }
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }
    let token = current.trim().to_string();
    if !token.is_empty() {
        args.push(literal_token(&token));
    }
    args
}

fn literal_token(token: &str) -> FunctionArg {
    match token.to_ascii_lowercase().as_str() {
        "true" => return FunctionArg::Bool(true),
        "false" => return FunctionArg::Bool(false),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return FunctionArg::Int(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return FunctionArg::Float(f);
    }
    FunctionArg::Str(token.trim_matches(|c| c == '"' || c == '\'').to_string())
}

/// Split `fn:`-style arguments on whitespace, honouring quotes.
fn split_fn_tokens(args_str: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in args_str.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

pub struct FunctionTransformer {
    registry: FunctionRegistry,
    function_re: Regex,
    fn_re: Regex,
}

impl FunctionTransformer {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry,
            function_re: Regex::new(r"(?s)\{\{function:(\w[\w-]*)\((.*?)\)\}\}")
                .expect("static regex"),
            fn_re: Regex::new(r"(?s)\{\{fn:(\w[\w-]*)(.*?)\}\}").expect("static regex"),
        }
    }

    fn call(&self, name: &str, args: &[FunctionArg], ctx: &TransformContext) -> String {
        let Some(func) = self.registry.get(name) else {
            return format!("[ERROR: function '{name}' not found]");
        };
        match func(ctx, args) {
            Ok(result) => result,
            Err(e) => format!("[ERROR: {name}() - {e}]"),
        }
    }
}

impl Transformer for FunctionTransformer {
    fn transform(&self, content: &str, ctx: &mut TransformContext) -> String {
        let content = self
            .function_re
            .replace_all(content, |caps: &Captures| {
                let args = parse_literal_args(&caps[2]);
                self.call(&caps[1], &args, ctx)
            })
            .into_owned();

        self.fn_re
            .replace_all(&content, |caps: &Captures| {
                let raw = caps[2].trim();
                let args: Vec<FunctionArg> =
                    if raw.starts_with('(') && raw.ends_with(')') {
                        parse_literal_args(&raw[1..raw.len() - 1])
                    } else {
                        split_fn_tokens(raw)
                            .iter()
                            .map(|tok| coerce_token(tok, ctx))
                            .collect()
                    };
                self.call(&caps[1], &args, ctx)
            })
            .into_owned()
    }
}
