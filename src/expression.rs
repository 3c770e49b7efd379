use std::cmp::Ordering;
use std::fmt;

use crate::definition::{ParameterValues, ResolveScope};
use crate::error::{ReportError, Result};
use crate::rows::{Row, RowWindow};
use crate::value::{TypeCode, Value, compare_typed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalName {
    PageNumber,
    TotalPages,
    ReportName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    First,
    Last,
}

impl AggregateFunc {
    fn parse(name: &str) -> Option<AggregateFunc> {
        match name.to_ascii_lowercase().as_str() {
            "sum" => Some(AggregateFunc::Sum),
            "count" | "countrows" => Some(AggregateFunc::Count),
            "avg" => Some(AggregateFunc::Avg),
            "min" => Some(AggregateFunc::Min),
            "max" => Some(AggregateFunc::Max),
            "first" => Some(AggregateFunc::First),
            "last" => Some(AggregateFunc::Last),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub name: String,
    pub hint: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Registered but not yet resolved.
    Pending,
    Constant(Value),
    Field(FieldRef),
    Parameter(String),
    Global(GlobalName),
    Aggregate {
        func: AggregateFunc,
        field: Option<FieldRef>,
        scope: Option<String>,
    },
    Concat(Vec<ExprKind>),
    /// Text the built-in evaluator does not understand.
    Opaque,
}

/// An expression attached to a definition node.
///
/// Construction only records the source text and the expected type; the text is
/// parsed and checked against data sets, parameters and scopes when the whole
/// definition has been built.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    expected: TypeCode,
    kind: ExprKind,
}

impl Expression {
    pub(crate) fn register(source: &str, expected: TypeCode) -> Self {
        Self {
            source: source.trim().to_string(),
            expected,
            kind: ExprKind::Pending,
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            source: value.to_string(),
            expected: TypeCode::Object,
            kind: ExprKind::Constant(value),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expected(&self) -> TypeCode {
        self.expected
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.kind != ExprKind::Pending
    }

    /// Parses the source and validates its references.
    pub(crate) fn resolve(&mut self, scope: &mut ResolveScope) {
        if self.is_resolved() {
            return;
        }
        let kind = match self.source.strip_prefix('=') {
            None => {
                let text = Value::Text(self.source.clone());
                match text.convert(self.expected) {
                    Ok(value) => ExprKind::Constant(value),
                    Err(_) => {
                        scope.warn(format!(
                            "Constant '{}' is not a valid {}.",
                            self.source,
                            self.expected.name()
                        ));
                        ExprKind::Constant(text)
                    }
                }
            }
            Some(body) => parse_body(body.trim(), scope),
        };
        if kind == ExprKind::Opaque {
            scope.warn(format!("Expression '{}' is not supported by the built-in evaluator.", self.source));
        }
        self.kind = kind;
    }

    pub fn evaluate(&self, evaluator: &dyn Evaluator, ctx: &EvalContext<'_>) -> Result<Value> {
        evaluator.evaluate(self, ctx)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_body(body: &str, scope: &mut ResolveScope) -> ExprKind {
    let parts = split_top_level(body, '&');
    if parts.len() > 1 {
        return ExprKind::Concat(parts.iter().map(|part| parse_body(part.trim(), scope)).collect());
    }
    if let Some(inner) = strip_parens(body) {
        return parse_body(inner.trim(), scope);
    }
    if let Some(text) = parse_string_literal(body) {
        return ExprKind::Constant(Value::Text(text));
    }
    if let Ok(value) = body.parse::<i64>() {
        return ExprKind::Constant(Value::Int(value));
    }
    if let Ok(value) = body.parse::<f64>() {
        return ExprKind::Constant(Value::Float(value));
    }
    match body.to_ascii_lowercase().as_str() {
        "true" => return ExprKind::Constant(Value::Bool(true)),
        "false" => return ExprKind::Constant(Value::Bool(false)),
        "nothing" => return ExprKind::Constant(Value::Null),
        _ => {}
    }
    if let Some(name) = collection_member(body, "Fields") {
        return match scope.field_hint(&name) {
            Some(hint) => ExprKind::Field(FieldRef { name, hint }),
            None => ExprKind::Opaque,
        };
    }
    if let Some(name) = collection_member(body, "Parameters") {
        if !scope.has_parameter(&name) {
            scope.error(format!("Parameter '{name}' is not defined."));
        }
        return ExprKind::Parameter(name);
    }
    if let Some(rest) = strip_prefix_ci(body, "Globals!") {
        return match rest.to_ascii_lowercase().as_str() {
            "pagenumber" => ExprKind::Global(GlobalName::PageNumber),
            "totalpages" => ExprKind::Global(GlobalName::TotalPages),
            "reportname" => ExprKind::Global(GlobalName::ReportName),
            _ => ExprKind::Opaque,
        };
    }
    if let Some(kind) = parse_aggregate(body, scope) {
        return kind;
    }
    ExprKind::Opaque
}

fn parse_aggregate(body: &str, scope: &mut ResolveScope) -> Option<ExprKind> {
    let open = body.find('(')?;
    if !body.ends_with(')') {
        return None;
    }
    let func = AggregateFunc::parse(body[..open].trim())?;
    let is_count_rows = body[..open].trim().eq_ignore_ascii_case("countrows");
    let args_text = &body[open + 1..body.len() - 1];
    let args: Vec<&str> = split_top_level(args_text, ',')
        .into_iter()
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .collect();

    let (field_arg, scope_arg) = if is_count_rows {
        (None, args.first().copied())
    } else {
        (Some(*args.first()?), args.get(1).copied())
    };
    let field = match field_arg {
        None => None,
        Some(arg) => {
            let name = collection_member(arg, "Fields")?;
            let hint = scope.field_hint(&name)?;
            Some(FieldRef { name, hint })
        }
    };
    let scope_name = match scope_arg {
        None => None,
        Some(arg) => {
            let name = parse_string_literal(arg)?;
            if !scope.has_scope(&name) {
                scope.error(format!("Aggregate scope '{name}' does not name a group, data region or data set."));
            }
            Some(name)
        }
    };
    Some(ExprKind::Aggregate {
        func,
        field,
        scope: scope_name,
    })
}

/// `Fields!Name.Value` -> `Name`.
fn collection_member(body: &str, collection: &str) -> Option<String> {
    let rest = strip_prefix_ci(body, collection)?;
    let rest = rest.strip_prefix('!')?;
    let name = match rest.rsplit_once('.') {
        Some((name, member)) if member.eq_ignore_ascii_case("value") => name,
        _ => rest,
    };
    let valid = !name.is_empty() && name.chars().all(|ch| ch.is_alphanumeric() || ch == '_');
    valid.then(|| name.to_string())
}

fn strip_prefix_ci<'a>(body: &'a str, prefix: &str) -> Option<&'a str> {
    if body.len() >= prefix.len()
        && body.is_char_boundary(prefix.len())
        && body[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&body[prefix.len()..])
    } else {
        None
    }
}

fn parse_string_literal(body: &str) -> Option<String> {
    let inner = body.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            // Only doubled quotes may appear inside a literal.
            if chars.next() != Some('"') {
                return None;
            }
        }
        out.push(ch);
    }
    Some(out)
}

fn strip_parens(body: &str) -> Option<&str> {
    let inner = body.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    let mut in_string = false;
    for ch in inner.chars() {
        match ch {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn split_top_level(body: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0;
    for (index, ch) in body.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            c if c == separator && !in_string && depth == 0 => {
                parts.push(&body[start..index]);
                start = index + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub page_number: usize,
    pub total_pages: usize,
    pub report_name: String,
}

/// Row windows for aggregate scopes.
pub trait ScopeResolver {
    /// `None` asks for the innermost active group or region.
    fn window(&self, scope: Option<&str>) -> Option<RowWindow>;
}

pub(crate) struct NoScopes;

impl ScopeResolver for NoScopes {
    fn window(&self, _scope: Option<&str>) -> Option<RowWindow> {
        None
    }
}

pub struct EvalContext<'a> {
    pub row: Option<&'a Row>,
    pub parameters: &'a ParameterValues,
    pub globals: &'a Globals,
    pub scopes: &'a dyn ScopeResolver,
}

impl<'a> EvalContext<'a> {
    pub fn with_row(&self, row: Option<&'a Row>) -> EvalContext<'a> {
        EvalContext {
            row,
            parameters: self.parameters,
            globals: self.globals,
            scopes: self.scopes,
        }
    }
}

/// Evaluates resolved expressions. Errors carry no node context; callers add it.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expr: &Expression, ctx: &EvalContext<'_>) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl Evaluator for BuiltinEvaluator {
    fn evaluate(&self, expr: &Expression, ctx: &EvalContext<'_>) -> Result<Value> {
        let value = eval_kind(expr, expr.kind(), ctx)?;
        if expr.expected() == TypeCode::Object {
            return Ok(value);
        }
        value.convert(expr.expected()).map_err(|_| {
            ReportError::evaluation(
                "",
                ctx.row.map(Row::index),
                format!(
                    "'{}' produced '{}', which is not a {}",
                    expr.source(),
                    value,
                    expr.expected().name()
                ),
            )
        })
    }
}

fn eval_kind(expr: &Expression, kind: &ExprKind, ctx: &EvalContext<'_>) -> Result<Value> {
    let row_index = ctx.row.map(Row::index);
    match kind {
        ExprKind::Pending => Err(ReportError::evaluation(
            "",
            row_index,
            format!("expression '{}' was never resolved", expr.source()),
        )),
        ExprKind::Opaque => Err(ReportError::evaluation(
            "",
            row_index,
            format!("unsupported expression '{}'", expr.source()),
        )),
        ExprKind::Constant(value) => Ok(value.clone()),
        ExprKind::Field(field) => Ok(ctx
            .row
            .and_then(|row| row.field(&field.name, field.hint))
            .cloned()
            .unwrap_or(Value::Null)),
        ExprKind::Parameter(name) => ctx.parameters.get(name).cloned().ok_or_else(|| {
            ReportError::evaluation("", row_index, format!("no value for parameter '{name}'"))
        }),
        ExprKind::Global(GlobalName::PageNumber) => Ok(Value::Int(ctx.globals.page_number as i64)),
        ExprKind::Global(GlobalName::TotalPages) => Ok(Value::Int(ctx.globals.total_pages as i64)),
        ExprKind::Global(GlobalName::ReportName) => Ok(Value::Text(ctx.globals.report_name.clone())),
        ExprKind::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&eval_kind(expr, part, ctx)?.to_string());
            }
            Ok(Value::Text(out))
        }
        ExprKind::Aggregate { func, field, scope } => {
            let window = ctx.scopes.window(scope.as_deref());
            if window.is_none() {
                if let Some(scope) = scope {
                    return Err(ReportError::evaluation(
                        "",
                        row_index,
                        format!("aggregate scope '{scope}' is not active"),
                    ));
                }
            }
            aggregate(*func, field.as_ref(), window.as_ref(), row_index)
        }
    }
}

fn aggregate(
    func: AggregateFunc,
    field: Option<&FieldRef>,
    window: Option<&RowWindow>,
    row_index: Option<usize>,
) -> Result<Value> {
    let Some(window) = window else {
        return Ok(match func {
            AggregateFunc::Count => Value::Int(0),
            _ => Value::Null,
        });
    };
    let Some(field) = field else {
        return Ok(Value::Int(window.iter().count() as i64));
    };
    let values: Vec<&Value> = window
        .iter()
        .map(|row| row.field(&field.name, field.hint).unwrap_or(&Value::Null))
        .collect();
    match func {
        AggregateFunc::First => Ok(values.first().map(|v| (*v).clone()).unwrap_or_default()),
        AggregateFunc::Last => Ok(values.last().map(|v| (*v).clone()).unwrap_or_default()),
        AggregateFunc::Count => Ok(Value::Int(values.iter().filter(|v| !v.is_null()).count() as i64)),
        AggregateFunc::Min | AggregateFunc::Max => {
            let mut best: Option<&Value> = None;
            for value in values.into_iter().filter(|v| !v.is_null()) {
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let ordering = compare_typed(TypeCode::Object, value, current)?;
                        if func == AggregateFunc::Min {
                            ordering == Ordering::Less
                        } else {
                            ordering == Ordering::Greater
                        }
                    }
                };
                if replace {
                    best = Some(value);
                }
            }
            Ok(best.cloned().unwrap_or_default())
        }
        AggregateFunc::Sum | AggregateFunc::Avg => {
            let mut int_total: i64 = 0;
            let mut float_total = 0.0f64;
            let mut all_int = true;
            let mut count = 0usize;
            for value in values.into_iter().filter(|v| !v.is_null()) {
                let number = value.as_f64().ok_or_else(|| {
                    ReportError::evaluation(
                        "",
                        row_index,
                        format!("cannot sum non-numeric value '{value}' of field '{}'", field.name),
                    )
                })?;
                match value {
                    Value::Int(v) => int_total = int_total.saturating_add(*v),
                    _ => all_int = false,
                }
                float_total += number;
                count += 1;
            }
            if func == AggregateFunc::Avg {
                return Ok(if count == 0 {
                    Value::Null
                } else {
                    Value::Float(float_total / count as f64)
                });
            }
            Ok(if all_int {
                Value::Int(int_total)
            } else {
                Value::Float(float_total)
            })
        }
    }
}
