//! # LDAP-style property filters.
//!
//! [`Filter`] selects services by their [`Properties`]. It is used by
//! `get_service_references` and by service listeners registered with a filter.
//!
//! ## Matching rules
//! - Attribute names are case-insensitive.
//! - `Int`/`Float` values compare numerically; an unparsable operand never matches.
//! - `Bool` values compare with `true`/`false` (case-insensitive) for every operator.
//! - `~=` on strings ignores case and whitespace.
//! - `List` values match if any element matches.
//! - Substring patterns (`a*b*c`) apply to string values only.
//!
//! ## Example
//! ```
//! use bundlevisor::{Filter, Properties};
//!
//! let filter: Filter = "(&(objectClass=Echo)(service.ranking>=5))".parse().unwrap();
//! let props = Properties::new()
//!     .with("objectClass", vec!["Echo".into()])
//!     .with("service.ranking", 7);
//! assert!(filter.matches(&props));
//! ```

mod parser;

use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;
use crate::services::{Properties, Value};

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Equal {
        attr: String,
        value: String,
    },
    Approx {
        attr: String,
        value: String,
    },
    Greater {
        attr: String,
        value: String,
    },
    Less {
        attr: String,
        value: String,
    },
    Present {
        attr: String,
    },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

#[derive(Clone, Copy)]
enum Op {
    Equal,
    Approx,
    Greater,
    Less,
}

/// A compiled filter. Two filters are equal iff their normalized text is equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    root: Node,
}

impl Filter {
    /// Parses a filter string.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        parser::parse(text).map(|root| Self { root })
    }

    /// Returns `true` if `props` satisfies the filter.
    pub fn matches(&self, props: &Properties) -> bool {
        eval(&self.root, props)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(&self.root, f)
    }
}

fn eval(node: &Node, props: &Properties) -> bool {
    match node {
        Node::And(nodes) => nodes.iter().all(|n| eval(n, props)),
        Node::Or(nodes) => nodes.iter().any(|n| eval(n, props)),
        Node::Not(inner) => !eval(inner, props),
        Node::Present { attr } => props.contains_key(attr),
        Node::Equal { attr, value } => compare(props.get(attr), Op::Equal, value),
        Node::Approx { attr, value } => compare(props.get(attr), Op::Approx, value),
        Node::Greater { attr, value } => compare(props.get(attr), Op::Greater, value),
        Node::Less { attr, value } => compare(props.get(attr), Op::Less, value),
        Node::Substring {
            attr,
            initial,
            any,
            last,
        } => props
            .get(attr)
            .is_some_and(|v| substring(v, initial.as_deref(), any, last.as_deref())),
    }
}

fn compare(found: Option<&Value>, op: Op, operand: &str) -> bool {
    let Some(value) = found else {
        return false;
    };
    match value {
        Value::String(s) => match op {
            Op::Equal => s == operand,
            Op::Approx => approx(s) == approx(operand),
            Op::Greater => s.as_str() >= operand,
            Op::Less => s.as_str() <= operand,
        },
        Value::Int(n) => match operand.trim().parse::<i64>() {
            Ok(rhs) => match op {
                Op::Equal | Op::Approx => *n == rhs,
                Op::Greater => *n >= rhs,
                Op::Less => *n <= rhs,
            },
            Err(_) => false,
        },
        Value::Float(x) => match operand.trim().parse::<f64>() {
            Ok(rhs) => match op {
                Op::Equal | Op::Approx => *x == rhs,
                Op::Greater => *x >= rhs,
                Op::Less => *x <= rhs,
            },
            Err(_) => false,
        },
        Value::Bool(b) => {
            let rhs = operand.trim();
            if rhs.eq_ignore_ascii_case("true") {
                *b
            } else if rhs.eq_ignore_ascii_case("false") {
                !*b
            } else {
                false
            }
        }
        Value::List(items) => items.iter().any(|item| compare(Some(item), op, operand)),
    }
}

fn substring(value: &Value, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    match value {
        Value::String(s) => {
            let mut rest = s.as_str();
            if let Some(prefix) = initial {
                match rest.strip_prefix(prefix) {
                    Some(r) => rest = r,
                    None => return false,
                }
            }
            for part in any {
                match rest.find(part.as_str()) {
                    Some(i) => rest = &rest[i + part.len()..],
                    None => return false,
                }
            }
            last.is_none_or(|suffix| rest.ends_with(suffix))
        }
        Value::List(items) => items.iter().any(|v| substring(v, initial, any, last)),
        _ => false,
    }
}

fn approx(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn write_node(node: &Node, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("(")?;
    match node {
        Node::And(nodes) | Node::Or(nodes) => {
            f.write_str(if matches!(node, Node::And(_)) { "&" } else { "|" })?;
            for n in nodes {
                write_node(n, f)?;
            }
        }
        Node::Not(inner) => {
            f.write_str("!")?;
            write_node(inner, f)?;
        }
        Node::Equal { attr, value } => write!(f, "{attr}={}", escape(value))?,
        Node::Approx { attr, value } => write!(f, "{attr}~={}", escape(value))?,
        Node::Greater { attr, value } => write!(f, "{attr}>={}", escape(value))?,
        Node::Less { attr, value } => write!(f, "{attr}<={}", escape(value))?,
        Node::Present { attr } => write!(f, "{attr}=*")?,
        Node::Substring {
            attr,
            initial,
            any,
            last,
        } => {
            write!(f, "{attr}=")?;
            if let Some(s) = initial {
                f.write_str(&escape(s))?;
            }
            f.write_str("*")?;
            for s in any {
                write!(f, "{}*", escape(s))?;
            }
            if let Some(s) = last {
                f.write_str(&escape(s))?;
            }
        }
    }
    f.write_str(")")
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '(' | ')' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::new()
            .with("objectClass", vec![Value::from("Echo"), Value::from("Log")])
            .with("service.ranking", 5)
            .with("name", "Primary Echo")
            .with("load", 0.25)
            .with("enabled", true)
    }

    #[test]
    fn equality_presence_and_composition() {
        let p = props();
        assert!(Filter::parse("(objectClass=Echo)").unwrap().matches(&p));
        assert!(Filter::parse("(OBJECTCLASS=Log)").unwrap().matches(&p));
        assert!(!Filter::parse("(objectClass=Nope)").unwrap().matches(&p));
        assert!(Filter::parse("(name=*)").unwrap().matches(&p));
        assert!(!Filter::parse("(missing=*)").unwrap().matches(&p));
        assert!(Filter::parse("(&(objectClass=Echo)(!(enabled=false)))").unwrap().matches(&p));
        assert!(Filter::parse("(|(objectClass=Nope)(service.ranking=5))").unwrap().matches(&p));
    }

    #[test]
    fn numeric_and_approx_comparisons() {
        let p = props();
        assert!(Filter::parse("(service.ranking>=5)").unwrap().matches(&p));
        assert!(Filter::parse("(service.ranking<= 10)").unwrap().matches(&p));
        assert!(!Filter::parse("(service.ranking>=6)").unwrap().matches(&p));
        assert!(!Filter::parse("(service.ranking=five)").unwrap().matches(&p));
        assert!(Filter::parse("(load<=0.5)").unwrap().matches(&p));
        assert!(Filter::parse("(name~=primaryecho)").unwrap().matches(&p));
    }

    #[test]
    fn substrings() {
        let p = props();
        assert!(Filter::parse("(name=Pri*)").unwrap().matches(&p));
        assert!(Filter::parse("(name=*Echo)").unwrap().matches(&p));
        assert!(Filter::parse("(name=P*ry*o)").unwrap().matches(&p));
        assert!(!Filter::parse("(name=*Log*)").unwrap().matches(&p));
        assert!(Filter::parse("(objectClass=E*)").unwrap().matches(&p));
    }

    #[test]
    fn escapes_and_normalized_display() {
        let f = Filter::parse(" ( & (a=x\\*y) (b=*) (c=p*q) ) ").unwrap();
        assert_eq!(f.to_string(), "(&(a=x\\*y)(b=*)(c=p*q))");
        let p = Properties::new().with("a", "x*y").with("b", 1).with("c", "pzq");
        assert!(f.matches(&p));
        assert_eq!(f, Filter::parse("(&(a=x\\*y)(b=*)(c=p*q))").unwrap());
    }

    #[test]
    fn syntax_errors_report_position() {
        let err = Filter::parse("(a=b").unwrap_err();
        assert_eq!(err.position, 4);

        let err = Filter::parse("(&)").unwrap_err();
        assert_eq!(err.message, "missing filter list");

        assert!(Filter::parse("(=b)").is_err());
        assert!(Filter::parse("(a=b))").is_err());
        assert!(Filter::parse("(a>b)").is_err());
        assert!(Filter::parse("a=b").is_err());
        assert!(Filter::parse("(a=)").is_err());
    }
}
