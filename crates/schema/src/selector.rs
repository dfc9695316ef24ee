//! Label selector expressions (`tier=frontend,env in (prod,stage),!canary`) and matching
//! against a label set.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("static regex"));
static VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("static regex"));
static DNS_SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("static regex")
});

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("found '{found}', expected: {expected}")]
    Unexpected { found: String, expected: &'static str },
    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("invalid label value {value:?}: {reason}")]
    InvalidValue { value: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    DoubleEquals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: SmallVec<[String; 4]>,
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::DoubleEquals | Operator::In => {
                value.map(|v| self.values.iter().any(|want| want == v)).unwrap_or(false)
            }
            Operator::NotEquals | Operator::NotIn => {
                value.map(|v| !self.values.iter().any(|want| want == v)).unwrap_or(true)
            }
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::GreaterThan | Operator::LessThan => {
                let (Some(have), Some(bound)) = (
                    value.and_then(|v| v.parse::<i64>().ok()),
                    self.values.first().and_then(|v| v.parse::<i64>().ok()),
                ) else {
                    return false;
                };
                if self.operator == Operator::GreaterThan { have > bound } else { have < bound }
            }
        }
    }
}

/// Conjunction of requirements. The empty selector matches every label set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    pub requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }
}

impl std::str::FromStr for LabelSelector {
    type Err = SelectorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

// ---- lexer ----

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Identifier(String),
    Bang,
    Equals,
    DoubleEquals,
    NotEquals,
    Greater,
    Less,
    OpenParen,
    CloseParen,
    Comma,
    End,
}

impl Token {
    fn literal(&self) -> String {
        match self {
            Token::Identifier(s) => s.clone(),
            Token::Bang => "!".into(),
            Token::Equals => "=".into(),
            Token::DoubleEquals => "==".into(),
            Token::NotEquals => "!=".into(),
            Token::Greater => ">".into(),
            Token::Less => "<".into(),
            Token::OpenParen => "(".into(),
            Token::CloseParen => ")".into(),
            Token::Comma => ",".into(),
            Token::End => "".into(),
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '!' | '=' | '>' | '<' | '(' | ')' | ',')
}

fn lex(input: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if is_special(c) {
            chars.next();
            let tok = match c {
                '!' if chars.peek() == Some(&'=') => { chars.next(); Token::NotEquals }
                '!' => Token::Bang,
                '=' if chars.peek() == Some(&'=') => { chars.next(); Token::DoubleEquals }
                '=' => Token::Equals,
                '>' => Token::Greater,
                '<' => Token::Less,
                '(' => Token::OpenParen,
                ')' => Token::CloseParen,
                _ => Token::Comma,
            };
            out.push(tok);
            continue;
        }
        let mut ident = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || is_special(c) { break; }
            ident.push(c);
            chars.next();
        }
        out.push(Token::Identifier(ident));
    }
    out.push(Token::End);
    out
}

// ---- parser ----

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self { Self { tokens: lex(input), pos: 0 } }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::End)
    }

    fn next(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() { self.pos += 1; }
        t
    }

    fn parse(mut self) -> Result<LabelSelector, SelectorError> {
        let mut requirements = Vec::new();
        loop {
            match self.peek() {
                Token::Identifier(_) | Token::Bang => {
                    requirements.push(self.requirement()?);
                    match self.next() {
                        Token::End => break,
                        Token::Comma => match self.peek() {
                            Token::Identifier(_) | Token::Bang => continue,
                            other => {
                                return Err(SelectorError::Unexpected {
                                    found: other.literal(),
                                    expected: "identifier after ','",
                                })
                            }
                        },
                        other => {
                            return Err(SelectorError::Unexpected {
                                found: other.literal(),
                                expected: "',' or 'end of string'",
                            })
                        }
                    }
                }
                Token::End => break,
                other => {
                    return Err(SelectorError::Unexpected {
                        found: other.literal(),
                        expected: "!, identifier, or 'end of string'",
                    })
                }
            }
        }
        Ok(LabelSelector { requirements })
    }

    fn requirement(&mut self) -> Result<Requirement, SelectorError> {
        let negated = if *self.peek() == Token::Bang { self.next(); true } else { false };
        let key = match self.next() {
            Token::Identifier(k) => k,
            other => return Err(SelectorError::Unexpected { found: other.literal(), expected: "identifier" }),
        };
        validate_key(&key)?;
        if matches!(self.peek(), Token::End | Token::Comma) {
            let operator = if negated { Operator::DoesNotExist } else { Operator::Exists };
            return Ok(Requirement { key, operator, values: SmallVec::new() });
        }
        if negated {
            return Err(SelectorError::Unexpected { found: self.peek().literal(), expected: "',' or 'end of string'" });
        }
        let operator = match self.next() {
            Token::Equals => Operator::Equals,
            Token::DoubleEquals => Operator::DoubleEquals,
            Token::NotEquals => Operator::NotEquals,
            Token::Greater => Operator::GreaterThan,
            Token::Less => Operator::LessThan,
            Token::Identifier(ref s) if s == "in" => Operator::In,
            Token::Identifier(ref s) if s == "notin" => Operator::NotIn,
            other => {
                return Err(SelectorError::Unexpected {
                    found: other.literal(),
                    expected: "in, notin, =, ==, !=, gt, lt",
                })
            }
        };
        let values = match operator {
            Operator::In | Operator::NotIn => self.value_set()?,
            _ => {
                let mut v = SmallVec::new();
                v.push(self.exact_value()?);
                v
            }
        };
        for v in values.iter() {
            validate_value(v)?;
            if matches!(operator, Operator::GreaterThan | Operator::LessThan) && v.parse::<i64>().is_err() {
                return Err(SelectorError::InvalidValue {
                    value: v.clone(),
                    reason: "for 'gt', 'lt' operators, the value must be an integer".into(),
                });
            }
        }
        Ok(Requirement { key, operator, values })
    }

    fn exact_value(&mut self) -> Result<String, SelectorError> {
        match self.peek() {
            Token::End | Token::Comma => Ok(String::new()),
            Token::Identifier(_) => Ok(self.next().literal()),
            other => Err(SelectorError::Unexpected { found: other.literal(), expected: "identifier for value" }),
        }
    }

    fn value_set(&mut self) -> Result<SmallVec<[String; 4]>, SelectorError> {
        match self.next() {
            Token::OpenParen => {}
            other => return Err(SelectorError::Unexpected { found: other.literal(), expected: "'('" }),
        }
        let mut values = SmallVec::new();
        loop {
            match self.next() {
                Token::Identifier(v) => values.push(v),
                Token::CloseParen if values.is_empty() => {
                    values.push(String::new());
                    return Ok(values);
                }
                other => {
                    return Err(SelectorError::Unexpected { found: other.literal(), expected: "identifier or ')'" })
                }
            }
            match self.next() {
                Token::Comma => continue,
                Token::CloseParen => return Ok(values),
                other => return Err(SelectorError::Unexpected { found: other.literal(), expected: "',' or ')'" }),
            }
        }
    }
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason: String| SelectorError::InvalidKey { key: key.to_string(), reason };
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !DNS_SUBDOMAIN_RE.is_match(prefix) {
                return Err(invalid("prefix part must be a DNS-1123 subdomain".into()));
            }
            name
        }
        None => key,
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(invalid(format!("name part must be between 1 and {} characters", MAX_NAME_LEN)));
    }
    if !NAME_RE.is_match(name) {
        return Err(invalid(
            "name part must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character".into(),
        ));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), SelectorError> {
    if value.len() > MAX_NAME_LEN || !VALUE_RE.is_match(value) {
        return Err(SelectorError::InvalidValue {
            value: value.to_string(),
            reason: "a valid label must be an empty string or consist of alphanumeric characters, '-', '_' or '.'".into(),
        });
    }
    Ok(())
}
