//! The predicate language consumed by the decision engine.
//!
//! A [`Body`] is a conjunction of terminal clauses. Each clause binds a
//! left-hand [`Term`], a reference into the evaluation input, to a string or
//! string-list predicate. Bodies render deterministically so a policy set
//! produces byte-identical compiled output across processes, which the
//! decision engine relies on for caching.

use serde_json::Value;

/// A dotted reference into the evaluation input, e.g. `input.email`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term(Vec<String>);

/// A terminal predicate over a single string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StringPredicate {
    Is(String),
    Not(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    In(Vec<String>),
}

/// A terminal predicate over a list of strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListPredicate {
    /// At least one element satisfies the sub-predicate.
    Has(StringPredicate),
    /// The list has exactly one element and it satisfies the sub-predicate.
    Is(StringPredicate),
    /// No element satisfies the sub-predicate.
    Exclude(StringPredicate),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Clause {
    String {
        left: Term,
        predicate: StringPredicate,
    },
    List {
        left: Term,
        predicate: ListPredicate,
    },
}

/// A conjunction of clauses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Body(Vec<Clause>);

// === impl Term ===

impl Term {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// A reference to a named field of the evaluation input.
    pub fn input(name: &str) -> Self {
        Self::new(["input", name])
    }

    /// Resolves the term against an evaluation input document.
    fn resolve<'v>(&self, input: &'v Value) -> Option<&'v Value> {
        let mut current = input;
        for segment in self.0.iter().skip(1) {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

// === impl StringPredicate ===

impl StringPredicate {
    pub fn matches(&self, s: &str) -> bool {
        match self {
            Self::Is(v) => s == v,
            Self::Not(v) => s != v,
            Self::Contains(v) => s.contains(v.as_str()),
            Self::StartsWith(v) => s.starts_with(v.as_str()),
            Self::EndsWith(v) => s.ends_with(v.as_str()),
            Self::In(vs) => vs.iter().any(|v| v == s),
        }
    }

    fn write(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        left: &dyn std::fmt::Display,
    ) -> std::fmt::Result {
        let (op, value): (&str, Value) = match self {
            Self::Is(v) => ("eq", Value::from(v.clone())),
            Self::Not(v) => ("ne", Value::from(v.clone())),
            Self::Contains(v) => ("contains", Value::from(v.clone())),
            Self::StartsWith(v) => ("starts_with", Value::from(v.clone())),
            Self::EndsWith(v) => ("ends_with", Value::from(v.clone())),
            Self::In(vs) => ("in", Value::from(vs.clone())),
        };
        write!(f, "{op}({left}, {value})")
    }
}

// === impl ListPredicate ===

impl ListPredicate {
    pub fn matches(&self, items: &[&str]) -> bool {
        match self {
            Self::Has(p) => items.iter().any(|s| p.matches(s)),
            Self::Is(p) => items.len() == 1 && p.matches(items[0]),
            Self::Exclude(p) => !items.iter().any(|s| p.matches(s)),
        }
    }
}

// === impl Clause ===

impl Clause {
    /// Evaluates the clause against an input document. A term that is
    /// missing or of the wrong shape fails the clause.
    pub fn evaluate(&self, input: &Value) -> bool {
        match self {
            Self::String { left, predicate } => left
                .resolve(input)
                .and_then(Value::as_str)
                .map_or(false, |s| predicate.matches(s)),
            Self::List { left, predicate } => {
                let Some(items) = left.resolve(input).and_then(Value::as_array) else {
                    return false;
                };
                let Some(strings) = items.iter().map(Value::as_str).collect::<Option<Vec<_>>>()
                else {
                    return false;
                };
                predicate.matches(&strings)
            }
        }
    }
}

impl std::fmt::Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String { left, predicate } => predicate.write(f, left),
            Self::List { left, predicate } => {
                let (op, p) = match predicate {
                    ListPredicate::Has(p) => ("any", p),
                    ListPredicate::Is(p) => ("only", p),
                    ListPredicate::Exclude(p) => ("none", p),
                };
                write!(f, "{op}({left}, ")?;
                p.write(f, &"$0")?;
                f.write_str(")")
            }
        }
    }
}

// === impl Body ===

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: Clause) {
        self.0.push(clause);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.0
    }

    /// True when every clause holds against the input document.
    pub fn evaluate(&self, input: &Value) -> bool {
        self.0.iter().all(|clause| clause.evaluate(input))
    }
}

impl std::fmt::Display for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, clause) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            clause.fmt(f)?;
        }
        Ok(())
    }
}
