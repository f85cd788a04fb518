//! Template evaluation: the restricted expression/tag language described in
//! spec §4.2's "template evaluation" contract.
//!
//! This is deliberately not a general-purpose expression language (spec §9:
//! "the template evaluator's filter set is defined as a closed enumeration
//! of named operations with fixed signatures, not as arbitrary host-language
//! callouts"). [`DefaultEvaluator`] supports exactly the surface spec.md
//! calls out: dotted-path variable substitution, a fixed filter set, `if`/
//! `else`, `for`, `with`, and the `csrf_token`/`static`/`include` tags, with
//! automatic HTML escaping unless a value is piped through `|safe`.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::template::{resolve, ResolverCache, TemplateLoader};

/// Evaluates canonical template source against a state mapping, producing
/// the HTML string the parser consumes next (spec §4.2).
pub trait TemplateEvaluator {
    fn evaluate(&self, canonical_source: &str, state: &Value) -> CoreResult<String>;
}

/// The reference evaluator. Optionally backed by a loader/cache so
/// `{% include %}` can pull in and evaluate another template.
pub struct DefaultEvaluator<'a> {
    loader: Option<&'a dyn TemplateLoader>,
    cache: ResolverCache,
}

impl<'a> DefaultEvaluator<'a> {
    pub fn new() -> Self {
        Self { loader: None, cache: ResolverCache::new() }
    }

    #[must_use]
    pub fn with_loader(mut self, loader: &'a dyn TemplateLoader, cache: ResolverCache) -> Self {
        self.loader = Some(loader);
        self.cache = cache;
        self
    }
}

impl Default for DefaultEvaluator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEvaluator for DefaultEvaluator<'_> {
    fn evaluate(&self, canonical_source: &str, state: &Value) -> CoreResult<String> {
        let mut cursor = 0usize;
        let nodes = parse_nodes(canonical_source, &mut cursor, &[]);
        let mut scopes: Vec<FxHashMap<String, Value>> = Vec::new();
        let mut out = String::new();
        self.render_nodes(&nodes, state, &mut scopes, &mut out)?;
        Ok(out)
    }
}

impl DefaultEvaluator<'_> {
    fn render_nodes(
        &self,
        nodes: &[Node],
        state: &Value,
        scopes: &mut Vec<FxHashMap<String, Value>>,
        out: &mut String,
    ) -> CoreResult<()> {
        for node in nodes {
            self.render_node(node, state, scopes, out)?;
        }
        Ok(())
    }

    fn render_node(
        &self,
        node: &Node,
        state: &Value,
        scopes: &mut Vec<FxHashMap<String, Value>>,
        out: &mut String,
    ) -> CoreResult<()> {
        match node {
            Node::Text(s) => out.push_str(s),
            Node::Output(expr) => {
                let value = expr.eval(state, scopes)?;
                let rendered = value_to_string(&value);
                if expr.filters.iter().any(|(name, _)| name == "safe") {
                    out.push_str(&rendered);
                } else {
                    out.push_str(&escape_html(&rendered));
                }
            }
            Node::If(cond, then_branch, else_branch) => {
                if cond.eval_truthy(state, scopes)? {
                    self.render_nodes(then_branch, state, scopes, out)?;
                } else {
                    self.render_nodes(else_branch, state, scopes, out)?;
                }
            }
            Node::For(var, list_expr, body) => {
                let list = list_expr.eval(state, scopes)?;
                let items = list.as_array().cloned().unwrap_or_default();
                for item in items {
                    let mut frame = FxHashMap::default();
                    frame.insert(var.clone(), item);
                    scopes.push(frame);
                    self.render_nodes(body, state, scopes, out)?;
                    scopes.pop();
                }
            }
            Node::With(var, expr, body) => {
                let value = expr.eval(state, scopes)?;
                let mut frame = FxHashMap::default();
                frame.insert(var.clone(), value);
                scopes.push(frame);
                self.render_nodes(body, state, scopes, out)?;
                scopes.pop();
            }
            Node::Csrf => {
                out.push_str("<input type=\"hidden\" name=\"csrf_token\" value=\"\" />");
            }
            Node::Static(path) => {
                out.push_str("/static/");
                out.push_str(path);
            }
            Node::Include(path) => {
                let loader = self.loader.ok_or_else(|| {
                    CoreError::Evaluation(format!("{{% include %}} used with no loader configured for {path}"))
                })?;
                let included = resolve(path, loader, &self.cache)?;
                let rendered = self.evaluate(&included, state)?;
                out.push_str(&rendered);
            }
        }
        Ok(())
    }
}

enum Node {
    Text(String),
    Output(Expr),
    If(Expr, Vec<Node>, Vec<Node>),
    For(String, Expr, Vec<Node>),
    With(String, Expr, Vec<Node>),
    Csrf,
    Static(String),
    Include(String),
}

/// A dotted-path lookup plus a filter pipeline, e.g. `user.name|upper`.
struct Expr {
    path: Vec<String>,
    filters: Vec<(String, Option<String>)>,
    /// Set only for a comparison condition like `count > 0`; `path` holds
    /// the left-hand side in that case.
    comparison: Option<(String, String)>,
    negate: bool,
}

impl Expr {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (negate, raw) = match raw.strip_prefix("not ") {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };
        for op in ["==", "!=", ">=", "<=", ">", "<"] {
            if let Some(idx) = raw.find(op) {
                let lhs = raw[..idx].trim();
                let rhs = raw[idx + op.len()..].trim();
                let (path, filters) = split_filters(lhs);
                return Self {
                    path,
                    filters,
                    comparison: Some((op.to_string(), rhs.to_string())),
                    negate,
                };
            }
        }
        let (path, filters) = split_filters(raw);
        Self { path, filters, comparison: None, negate }
    }

    fn eval(&self, state: &Value, scopes: &[FxHashMap<String, Value>]) -> CoreResult<Value> {
        let mut value = lookup(&self.path, state, scopes);
        for (name, arg) in &self.filters {
            value = apply_filter(name, arg.as_deref(), &value)?;
        }
        Ok(value)
    }

    fn eval_truthy(&self, state: &Value, scopes: &[FxHashMap<String, Value>]) -> CoreResult<bool> {
        let lhs = lookup(&self.path, state, scopes);
        let truthy = if let Some((op, rhs_raw)) = &self.comparison {
            let rhs = literal_or_lookup(rhs_raw, state, scopes);
            compare(&lhs, op, &rhs)
        } else {
            is_truthy(&lhs)
        };
        Ok(truthy != self.negate)
    }
}

fn split_filters(raw: &str) -> (Vec<String>, Vec<(String, Option<String>)>) {
    let mut parts = raw.split('|');
    let path_part = parts.next().unwrap_or_default().trim();
    let path = path_part.split('.').map(str::to_string).collect();
    let filters = parts
        .map(|f| {
            let f = f.trim();
            match f.split_once(':') {
                Some((name, arg)) => (
                    name.trim().to_string(),
                    Some(arg.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
                ),
                None => (f.to_string(), None),
            }
        })
        .collect();
    (path, filters)
}

fn literal_or_lookup(raw: &str, state: &Value, scopes: &[FxHashMap<String, Value>]) -> Value {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return Value::from(n);
    }
    if let Some(unquoted) = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
    {
        return Value::String(unquoted.to_string());
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => lookup(&trimmed.split('.').map(str::to_string).collect::<Vec<_>>(), state, scopes),
    }
}

fn lookup(path: &[String], state: &Value, scopes: &[FxHashMap<String, Value>]) -> Value {
    if path.is_empty() {
        return Value::Null;
    }
    let head = &path[0];
    let mut current = scopes
        .iter()
        .rev()
        .find_map(|scope| scope.get(head))
        .cloned()
        .unwrap_or_else(|| state.get(head).cloned().unwrap_or(Value::Null));
    for segment in &path[1..] {
        current = current.get(segment).cloned().unwrap_or(Value::Null);
    }
    current
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(lhs: &Value, op: &str, rhs: &Value) -> bool {
    let ordering = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => lhs.as_str().and_then(|a| rhs.as_str().map(|b| a.cmp(b).then(std::cmp::Ordering::Equal))),
    };
    match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        ">" => ordering == Some(std::cmp::Ordering::Greater),
        "<" => ordering == Some(std::cmp::Ordering::Less),
        ">=" => matches!(ordering, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
        "<=" => matches!(ordering, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        _ => false,
    }
}

/// The closed filter enumeration spec §4.2 requires at minimum: string
/// case, truncation, date formatting, numeric formatting, escaping, list
/// operations.
fn apply_filter(name: &str, arg: Option<&str>, value: &Value) -> CoreResult<Value> {
    let as_str = value_to_string(value);
    let result = match name {
        "upper" => Value::String(as_str.to_uppercase()),
        "lower" => Value::String(as_str.to_lowercase()),
        "title" => Value::String(title_case(&as_str)),
        "truncate" => {
            let n: usize = arg
                .and_then(|a| a.parse().ok())
                .ok_or_else(|| CoreError::Evaluation("truncate requires a numeric argument".to_string()))?;
            Value::String(as_str.chars().take(n).collect())
        }
        "length" => Value::from(match value {
            Value::Array(a) => a.len(),
            Value::String(s) => s.chars().count(),
            Value::Object(o) => o.len(),
            _ => 0,
        }),
        "join" => {
            let sep = arg.unwrap_or(", ");
            match value {
                Value::Array(items) => Value::String(
                    items.iter().map(value_to_string).collect::<Vec<_>>().join(sep),
                ),
                other => other.clone(),
            }
        }
        "number" => match value.as_f64() {
            Some(n) => Value::String(format_number(n)),
            None => value.clone(),
        },
        "date" => Value::String(as_str), // canonical ISO state values pass through verbatim
        "escape" => Value::String(escape_html(&as_str)),
        "safe" => value.clone(),
        other => {
            return Err(CoreError::Evaluation(format!("unknown filter `{other}`")));
        }
    };
    Ok(result)
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        let int = n as i64;
        let digits = int.unsigned_abs().to_string();
        let mut grouped = String::new();
        for (i, c) in digits.chars().rev().enumerate() {
            if i > 0 && i % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        let grouped: String = grouped.chars().rev().collect();
        if int < 0 { format!("-{grouped}") } else { grouped }
    } else {
        format!("{n:.2}")
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Parse nodes from `src` starting at `*cursor`, stopping at EOF or at the
/// first occurrence of any tag in `stop_tags` (which is left unconsumed so
/// the caller can identify which one matched).
fn parse_nodes(src: &str, cursor: &mut usize, stop_tags: &[&str]) -> Vec<Node> {
    let mut nodes = Vec::new();
    loop {
        let rest = &src[*cursor..];
        let next_tag = rest.find("{%");
        let next_output = rest.find("{{");

        let tag_is_next = match (next_tag, next_output) {
            (None, None) => {
                nodes.push(Node::Text(rest.to_string()));
                *cursor = src.len();
                break;
            }
            (Some(t), Some(o)) => t < o,
            (Some(_), None) => true,
            (None, Some(_)) => false,
        };

        if tag_is_next {
            {
                let tag_start = next_tag.unwrap();
                if tag_start > 0 {
                    nodes.push(Node::Text(rest[..tag_start].to_string()));
                }
                let abs_start = *cursor + tag_start;
                let Some(tag_end_rel) = src[abs_start..].find("%}") else {
                    *cursor = src.len();
                    break;
                };
                let tag_end = abs_start + tag_end_rel + 2;
                let inner = src[abs_start + 2..tag_end - 2].trim();

                if stop_tags.contains(&inner) {
                    *cursor = abs_start;
                    return nodes;
                }

                *cursor = tag_end;
                if let Some(rest_word) = inner.strip_prefix("if ") {
                    let cond = Expr::parse(rest_word);
                    let then_branch = parse_nodes(src, cursor, &["else", "endif"]);
                    let else_branch = if src[*cursor..].trim_start().starts_with("{% else %}") {
                        *cursor += src[*cursor..].find("%}").unwrap() + 2;
                        parse_nodes(src, cursor, &["endif"])
                    } else {
                        Vec::new()
                    };
                    *cursor += src[*cursor..].find("%}").map(|i| i + 2).unwrap_or(0);
                    nodes.push(Node::If(cond, then_branch, else_branch));
                } else if let Some(rest_word) = inner.strip_prefix("for ") {
                    if let Some((var, list_src)) = rest_word.split_once(" in ") {
                        let list_expr = Expr::parse(list_src);
                        let body = parse_nodes(src, cursor, &["endfor"]);
                        *cursor += src[*cursor..].find("%}").map(|i| i + 2).unwrap_or(0);
                        nodes.push(Node::For(var.trim().to_string(), list_expr, body));
                    }
                } else if let Some(rest_word) = inner.strip_prefix("with ") {
                    if let Some((var, val_src)) = rest_word.split_once('=') {
                        let expr = Expr::parse(val_src);
                        let body = parse_nodes(src, cursor, &["endwith"]);
                        *cursor += src[*cursor..].find("%}").map(|i| i + 2).unwrap_or(0);
                        nodes.push(Node::With(var.trim().to_string(), expr, body));
                    }
                } else if inner == "csrf_token" {
                    nodes.push(Node::Csrf);
                } else if let Some(rest_word) = inner.strip_prefix("static ") {
                    let path = rest_word.trim().trim_matches(|c| c == '"' || c == '\'');
                    nodes.push(Node::Static(path.to_string()));
                } else if let Some(rest_word) = inner.strip_prefix("include ") {
                    let path = rest_word.trim().trim_matches(|c| c == '"' || c == '\'');
                    nodes.push(Node::Include(path.to_string()));
                }
                // `{% block %}`/`{% endblock %}` never reach here: the
                // resolver has already flattened them away by the time
                // source gets to the evaluator.
            }
        } else {
            let output_start = next_output.unwrap();
            if output_start > 0 {
                nodes.push(Node::Text(rest[..output_start].to_string()));
            }
            let abs_start = *cursor + output_start;
            let Some(end_rel) = src[abs_start..].find("}}") else {
                *cursor = src.len();
                break;
            };
            let end = abs_start + end_rel + 2;
            let inner = &src[abs_start + 2..end - 2];
            nodes.push(Node::Output(Expr::parse(inner)));
            *cursor = end;
        }
        if *cursor >= src.len() {
            break;
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(src: &str, state: Value) -> String {
        DefaultEvaluator::new().evaluate(src, &state).unwrap()
    }

    #[test]
    fn variable_substitution_with_dotted_path() {
        let out = eval("<p>{{ user.name }}</p>", json!({"user": {"name": "Ada"}}));
        assert_eq!(out, "<p>Ada</p>");
    }

    #[test]
    fn filters_chain() {
        let out = eval("{{ name|upper }}", json!({"name": "ada"}));
        assert_eq!(out, "ADA");
        let out = eval("{{ text|truncate:3 }}", json!({"text": "hello"}));
        assert_eq!(out, "hel");
    }

    #[test]
    fn html_escaped_by_default_but_not_with_safe() {
        let out = eval("{{ v }}", json!({"v": "<b>x</b>"}));
        assert_eq!(out, "&lt;b&gt;x&lt;/b&gt;");
        let out = eval("{{ v|safe }}", json!({"v": "<b>x</b>"}));
        assert_eq!(out, "<b>x</b>");
    }

    #[test]
    fn if_else_with_comparison() {
        let src = "{% if count > 0 %}positive{% else %}zero{% endif %}";
        assert_eq!(eval(src, json!({"count": 1})), "positive");
        assert_eq!(eval(src, json!({"count": 0})), "zero");
    }

    #[test]
    fn for_loop_binds_item() {
        let src = "{% for item in items %}[{{ item.name }}]{% endfor %}";
        let out = eval(src, json!({"items": [{"name": "a"}, {"name": "b"}]}));
        assert_eq!(out, "[a][b]");
    }

    #[test]
    fn with_binds_local_alias() {
        let src = "{% with total = count %}{{ total }}{% endwith %}";
        assert_eq!(eval(src, json!({"count": 42})), "42");
    }

    #[test]
    fn csrf_and_static_tags_render() {
        assert!(eval("{% csrf_token %}", json!({})).contains("csrf_token"));
        assert_eq!(eval("{% static \"app.css\" %}", json!({})), "/static/app.css");
    }

    #[test]
    fn include_pulls_in_another_resolved_template() {
        use crate::template::MapLoader;
        let loader = MapLoader::new().with("partial.html", "<span>{{ name }}</span>");
        let cache = ResolverCache::new();
        let evaluator = DefaultEvaluator::new().with_loader(&loader, cache);
        let out = evaluator
            .evaluate("<div>{% include \"partial.html\" %}</div>", &json!({"name": "x"}))
            .unwrap();
        assert_eq!(out, "<div><span>x</span></div>");
    }
}
