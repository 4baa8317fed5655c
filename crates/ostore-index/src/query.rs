use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ostore_types::{IndexValue, NamedIndexValue};

/// Comparison applied by a [`Constraint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Text prefix match.
    StartsWith,
}

impl Operator {
    /// Whether `actual <op> expected` holds. Values of different kinds
    /// never match.
    pub fn matches(&self, actual: &IndexValue, expected: &IndexValue) -> bool {
        if let Operator::StartsWith = self {
            return match (actual, expected) {
                (IndexValue::Text(a), IndexValue::Text(e)) => a.starts_with(e.as_str()),
                _ => false,
            };
        }
        let Some(ordering) = actual.compare(expected) else {
            return false;
        };
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::StartsWith => false,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::StartsWith => "^=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One `index <op> value` term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub index: String,
    pub op: Operator,
    pub value: IndexValue,
}

impl Constraint {
    pub fn new(index: impl Into<String>, op: Operator, value: IndexValue) -> Self {
        Self {
            index: index.into(),
            op,
            value,
        }
    }

    pub fn eq(index: impl Into<String>, value: IndexValue) -> Self {
        Self::new(index, Operator::Eq, value)
    }

    /// Whether an object's index values satisfy this term. An object with
    /// no value for the index never matches.
    pub fn matches(&self, values: &[NamedIndexValue]) -> bool {
        values
            .iter()
            .find(|v| v.name == self.index)
            .is_some_and(|v| self.op.matches(&v.value, &self.value))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.index, self.op, self.value)
    }
}

/// Unparsed `index<op>literal` term, as written on a command line.
///
/// The literal is typed later against the index's declared kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawConstraint {
    pub index: String,
    pub op: Operator,
    pub literal: String,
}

impl FromStr for RawConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Two-character operators first so `<=` is not read as `<`.
        const OPERATORS: [(&str, Operator); 7] = [
            ("!=", Operator::Ne),
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("^=", Operator::StartsWith),
            ("=", Operator::Eq),
            ("<", Operator::Lt),
            (">", Operator::Gt),
        ];
        let (pos, symbol, op) = OPERATORS
            .iter()
            .filter_map(|(symbol, op)| s.find(symbol).map(|pos| (pos, *symbol, *op)))
            .min_by_key(|(pos, symbol, _)| (*pos, std::cmp::Reverse(symbol.len())))
            .ok_or_else(|| format!("no operator in constraint {s:?}"))?;
        let index = s[..pos].trim();
        if index.is_empty() {
            return Err(format!("missing index name in constraint {s:?}"));
        }
        Ok(Self {
            index: index.to_string(),
            op,
            literal: s[pos + symbol.len()..].trim().to_string(),
        })
    }
}

/// Conjunction of constraints, optionally limited to the `top` lowest IDs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub constraints: Vec<Constraint>,
    pub top: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    /// Whether every constraint holds. An empty query matches everything.
    pub fn matches(&self, values: &[NamedIndexValue]) -> bool {
        self.constraints.iter().all(|c| c.matches(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> Vec<NamedIndexValue> {
        vec![
            NamedIndexValue::new("qty", IndexValue::Integer(5)),
            NamedIndexValue::new("sku", IndexValue::Text("AB-100".into())),
        ]
    }

    #[test]
    fn operators() {
        let five = IndexValue::Integer(5);
        let six = IndexValue::Integer(6);
        assert!(Operator::Eq.matches(&five, &five));
        assert!(Operator::Ne.matches(&five, &six));
        assert!(Operator::Lt.matches(&five, &six));
        assert!(Operator::Le.matches(&five, &five));
        assert!(Operator::Gt.matches(&six, &five));
        assert!(Operator::Ge.matches(&six, &six));
        assert!(!Operator::Gt.matches(&five, &five));
    }

    #[test]
    fn mixed_kinds_never_match() {
        let int = IndexValue::Integer(1);
        let text = IndexValue::Text("1".into());
        for op in [Operator::Eq, Operator::Ne, Operator::Lt, Operator::StartsWith] {
            assert!(!op.matches(&int, &text), "{op:?}");
        }
    }

    #[test]
    fn starts_with_text() {
        let sku = IndexValue::Text("AB-100".into());
        assert!(Operator::StartsWith.matches(&sku, &IndexValue::Text("AB".into())));
        assert!(!Operator::StartsWith.matches(&sku, &IndexValue::Text("B".into())));
    }

    #[test]
    fn query_is_conjunctive() {
        let query = Query::new()
            .with(Constraint::new("qty", Operator::Ge, IndexValue::Integer(5)))
            .with(Constraint::new(
                "sku",
                Operator::StartsWith,
                IndexValue::Text("AB".into()),
            ));
        assert!(query.matches(&values()));

        let query = query.with(Constraint::eq("qty", IndexValue::Integer(4)));
        assert!(!query.matches(&values()));
    }

    #[test]
    fn missing_index_value_never_matches() {
        let query = Query::new().with(Constraint::new(
            "color",
            Operator::Ne,
            IndexValue::Text("red".into()),
        ));
        assert!(!query.matches(&values()));
        assert!(Query::new().matches(&values()));
    }

    #[test]
    fn parse_raw_constraints() {
        let c: RawConstraint = "qty>=5".parse().unwrap();
        assert_eq!(
            c,
            RawConstraint {
                index: "qty".into(),
                op: Operator::Ge,
                literal: "5".into()
            }
        );
        let c: RawConstraint = "sku ^= AB".parse().unwrap();
        assert_eq!(c.op, Operator::StartsWith);
        assert_eq!(c.literal, "AB");
        let c: RawConstraint = "name=a=b".parse().unwrap();
        assert_eq!(c.op, Operator::Eq);
        assert_eq!(c.literal, "a=b");
        assert!("qty".parse::<RawConstraint>().is_err());
        assert!("=5".parse::<RawConstraint>().is_err());
    }

    #[test]
    fn constraint_json_is_stable() {
        let c = Constraint::eq("qty", IndexValue::Integer(2));
        assert_eq!(
            serde_json::to_string(&c).unwrap(),
            r#"{"index":"qty","op":"eq","value":{"integer":2}}"#
        );
    }
}
