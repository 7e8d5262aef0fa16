//! Minimal patch template engine
//!
//! Supported actions:
//! - `{{.Field}}` substitutes a parameter
//! - `{{if .Flag}}...{{end}}` renders when the parameter is truthy
//! - `{{if lt .Field "1.7.0"}}...{{end}}` renders when the version is lower
//! - `{{else}}` inside either form, and nesting
//!
//! Parameters come from any `Serialize` value whose JSON form is an object.
//! Substituted values are escaped for use inside a JSON string literal.

use crate::error::PatchError;
use serde::Serialize;
use semver::Version;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Field(String),
    If {
        condition: Condition,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Truthy(String),
    Lt(Operand, Operand),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Field(String),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Action(String),
}

#[derive(Debug, PartialEq)]
enum Terminator {
    Else,
    End,
    Eof,
}

/// Render `template` with `params`
pub fn render<P: Serialize>(template: &str, params: &P) -> Result<String, PatchError> {
    let params = match serde_json::to_value(params)? {
        Value::Object(map) => map,
        other => {
            return Err(PatchError::Template(format!("parameters must be an object, got {other}")));
        }
    };
    let tokens = tokenize(template)?;
    let mut position = 0;
    let (nodes, terminator) = parse(&tokens, &mut position)?;
    if terminator != Terminator::Eof {
        return Err(PatchError::Template(format!("unexpected {{{{{terminator:?}}}}}")));
    }
    let mut output = String::with_capacity(template.len());
    emit(&nodes, &params, &mut output)?;
    Ok(output)
}

/// Whether version `a` is lower than `b`
///
/// Only major, minor and patch take part, so `1.7.0-RC2` equals `1.7.0`.
pub fn version_lt(a: &str, b: &str) -> Result<bool, PatchError> {
    Ok(release(a)? < release(b)?)
}

fn release(version: &str) -> Result<(u64, u64, u64), PatchError> {
    let parsed = Version::parse(version.trim())
        .map_err(|e| PatchError::Template(format!("invalid version {version:?}: {e}")))?;
    Ok((parsed.major, parsed.minor, parsed.patch))
}

fn tokenize(template: &str) -> Result<Vec<Token>, PatchError> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| PatchError::Template("unclosed action".to_string()))?;
        tokens.push(Token::Action(after[..end].trim().to_string()));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

fn parse(tokens: &[Token], position: &mut usize) -> Result<(Vec<Node>, Terminator), PatchError> {
    let mut nodes = Vec::new();
    while let Some(token) = tokens.get(*position) {
        *position += 1;
        match token {
            Token::Text(text) => nodes.push(Node::Text(text.clone())),
            Token::Action(action) if action == "end" => return Ok((nodes, Terminator::End)),
            Token::Action(action) if action == "else" => return Ok((nodes, Terminator::Else)),
            Token::Action(action) => {
                if let Some(condition) = action.strip_prefix("if ") {
                    let condition = parse_condition(condition.trim())?;
                    let (then_branch, terminator) = parse(tokens, position)?;
                    let else_branch = match terminator {
                        Terminator::End => Vec::new(),
                        Terminator::Else => match parse(tokens, position)? {
                            (branch, Terminator::End) => branch,
                            _ => return Err(PatchError::Template("if/else without end".to_string())),
                        },
                        Terminator::Eof => return Err(PatchError::Template("if without end".to_string())),
                    };
                    nodes.push(Node::If {
                        condition,
                        then_branch,
                        else_branch,
                    });
                } else {
                    nodes.push(Node::Field(parse_field(action)?));
                }
            }
        }
    }
    Ok((nodes, Terminator::Eof))
}

fn parse_field(action: &str) -> Result<String, PatchError> {
    match action.strip_prefix('.') {
        Some(name) if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
            Ok(name.to_string())
        }
        _ => Err(PatchError::Template(format!("unsupported action {{{{{action}}}}}"))),
    }
}

fn parse_operand(operand: &str) -> Result<Operand, PatchError> {
    if let Some(literal) = operand.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Ok(Operand::Literal(literal.to_string()));
    }
    parse_field(operand).map(Operand::Field)
}

fn parse_condition(condition: &str) -> Result<Condition, PatchError> {
    if let Some(arguments) = condition.strip_prefix("lt ") {
        let arguments: Vec<&str> = arguments.split_whitespace().collect();
        let [left, right] = arguments.as_slice() else {
            return Err(PatchError::Template(format!("lt takes two arguments: {condition}")));
        };
        return Ok(Condition::Lt(parse_operand(left)?, parse_operand(right)?));
    }
    parse_field(condition).map(Condition::Truthy)
}

fn lookup<'a>(params: &'a Map<String, Value>, field: &str) -> Result<&'a Value, PatchError> {
    params
        .get(field)
        .ok_or_else(|| PatchError::Template(format!("missing template parameter {field}")))
}

fn operand_text(params: &Map<String, Value>, operand: &Operand) -> Result<String, PatchError> {
    match operand {
        Operand::Literal(literal) => Ok(literal.clone()),
        Operand::Field(field) => Ok(value_text(lookup(params, field)?)),
    }
}

/// `value` escaped as the body of a JSON string
fn escaped_text(value: &Value) -> Result<String, PatchError> {
    let text = value_text(value);
    let quoted = serde_json::to_string(&text)?;
    Ok(quoted
        .strip_prefix('"')
        .and_then(|body| body.strip_suffix('"'))
        .unwrap_or(&quoted)
        .to_string())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn emit(nodes: &[Node], params: &Map<String, Value>, output: &mut String) -> Result<(), PatchError> {
    for node in nodes {
        match node {
            Node::Text(text) => output.push_str(text),
            Node::Field(field) => output.push_str(&escaped_text(lookup(params, field)?)?),
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let holds = match condition {
                    Condition::Truthy(field) => truthy(lookup(params, field)?),
                    Condition::Lt(left, right) => {
                        version_lt(&operand_text(params, left)?, &operand_text(params, right)?)?
                    }
                };
                emit(if holds { then_branch } else { else_branch }, params, output)?;
            }
        }
    }
    Ok(())
}
