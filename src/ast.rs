use std::fmt;
use std::rc::Rc;

use crate::EvalError;
use crate::builtinops::Arity;
use crate::environment::Environment;

/// Core value/tree type: both the code the evaluator walks and the values it
/// produces.
///
/// Text, pairs, closures and errors sit behind `Rc`, so cloning an `Expr` is
/// cheap and structure is shared rather than copied.
#[derive(Debug, Clone)]
pub enum Expr {
    /// The empty list, and the only false value
    Nil,
    /// Canonical true value
    T,
    Number(f64),
    String(Rc<str>),
    Symbol(Rc<str>),
    Pair(Rc<Pair>),
    /// User-defined procedure produced by `lambda`
    Closure(Rc<Closure>),
    /// A failed evaluation, passed along like any other value
    Error(Rc<EvalError>),
}

/// An immutable cons cell.
#[derive(Debug)]
pub struct Pair {
    head: Expr,
    tail: Expr,
}

impl Pair {
    pub fn head(&self) -> &Expr {
        &self.head
    }

    pub fn tail(&self) -> &Expr {
        &self.tail
    }

    /// Move both halves out, leaving `nil` behind.
    pub(crate) fn take_parts(&mut self) -> (Expr, Expr) {
        (
            std::mem::replace(&mut self.head, Expr::Nil),
            std::mem::replace(&mut self.tail, Expr::Nil),
        )
    }
}

impl Drop for Pair {
    // Unlink the spine iteratively so dropping a long list doesn't recurse once
    // per element.
    fn drop(&mut self) {
        let mut tail = std::mem::replace(&mut self.tail, Expr::Nil);
        while let Expr::Pair(pair) = tail {
            match Rc::try_unwrap(pair) {
                Ok(mut inner) => tail = std::mem::replace(&mut inner.tail, Expr::Nil),
                Err(_) => break,
            }
        }
    }
}

/// A procedure value: parameter spec, body, and the scope it was created in.
pub struct Closure {
    params: Expr,
    body: Vec<Expr>,
    env: Environment,
}

impl Closure {
    pub fn new(params: Expr, body: Vec<Expr>, env: Environment) -> Self {
        Closure { params, body, env }
    }

    /// Parameter spec: a list of symbols, a single symbol (binds the whole
    /// argument list) or a dotted list (binds the remainder to the last symbol).
    pub fn params(&self) -> &Expr {
        &self.params
    }

    pub fn body(&self) -> &[Expr] {
        &self.body
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn into_parts(self) -> (Expr, Vec<Expr>, Environment) {
        (self.params, self.body, self.env)
    }

    /// Number of arguments the parameter spec accepts.
    pub fn arity(&self) -> Arity {
        let mut fixed = 0;
        let mut spec = &self.params;
        loop {
            match spec {
                Expr::Pair(pair) => {
                    fixed += 1;
                    spec = pair.tail();
                }
                Expr::Nil => return Arity::Exact(fixed),
                _ => return Arity::AtLeast(fixed),
            }
        }
    }
}

// The captured environment usually reaches back to this closure, so Debug
// stops at the code.
impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl Expr {
    pub fn string(text: impl Into<Rc<str>>) -> Expr {
        Expr::String(text.into())
    }

    pub fn symbol(name: impl Into<Rc<str>>) -> Expr {
        Expr::Symbol(name.into())
    }

    pub fn error(err: EvalError) -> Expr {
        Expr::Error(Rc::new(err))
    }

    /// `T` for true, `Nil` for false.
    pub fn boolean(value: bool) -> Expr {
        if value { Expr::T } else { Expr::Nil }
    }

    pub fn cons(head: Expr, tail: Expr) -> Expr {
        Expr::Pair(Rc::new(Pair { head, tail }))
    }

    /// Build a proper list from the given elements.
    pub fn list<I>(items: I) -> Expr
    where
        I: IntoIterator<Item = Expr>,
        I::IntoIter: DoubleEndedIterator,
    {
        Expr::list_with_tail(items, Expr::Nil)
    }

    /// Build a list whose final tail is `tail` (a dotted list unless `tail` is
    /// `Nil`).
    pub fn list_with_tail<I>(items: I, tail: Expr) -> Expr
    where
        I: IntoIterator<Item = Expr>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(tail, |tail, head| Expr::cons(head, tail))
    }

    /// First slot of a pair. Anything else, `Nil` included, is an error.
    pub fn head(&self) -> Result<Expr, EvalError> {
        match self {
            Expr::Pair(pair) => Ok(pair.head.clone()),
            other => Err(EvalError::NotAPair {
                op: "car".to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Second slot of a pair. Anything else, `Nil` included, is an error.
    pub fn tail(&self) -> Result<Expr, EvalError> {
        match self {
            Expr::Pair(pair) => Ok(pair.tail.clone()),
            other => Err(EvalError::NotAPair {
                op: "cdr".to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn is_falsy(&self) -> bool {
        matches!(self, Expr::Nil)
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Expr::Pair(_))
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Symbol(name) => Some(name.as_ref()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&EvalError> {
        match self {
            Expr::Error(err) => Some(&**err),
            _ => None,
        }
    }

    /// Elements of a list, stopping at the first non-pair tail.
    pub fn iter(&self) -> ListIter {
        ListIter {
            current: self.clone(),
        }
    }

    /// Collect a proper list into a vector. An improper list is an
    /// `InvalidForm` error.
    pub fn to_vec(&self) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Expr::Pair(pair) => {
                    items.push(pair.head.clone());
                    current = &pair.tail;
                }
                Expr::Nil => return Ok(items),
                _ => {
                    return Err(EvalError::InvalidForm(format!(
                        "improper list: {}",
                        self
                    )));
                }
            }
        }
    }

    /// Equality used by `=`: structural over data, identity for closures, and
    /// false across different variants.
    pub fn structural_equals(&self, other: &Expr) -> bool {
        let (mut left, mut right) = (self, other);
        loop {
            match (left, right) {
                (Expr::Nil, Expr::Nil) | (Expr::T, Expr::T) => return true,
                (Expr::Number(a), Expr::Number(b)) => return a == b,
                (Expr::String(a), Expr::String(b)) | (Expr::Symbol(a), Expr::Symbol(b)) => {
                    return a == b;
                }
                (Expr::Pair(a), Expr::Pair(b)) => {
                    if Rc::ptr_eq(a, b) {
                        return true;
                    }
                    if !a.head.structural_equals(&b.head) {
                        return false;
                    }
                    left = &a.tail;
                    right = &b.tail;
                }
                (Expr::Closure(a), Expr::Closure(b)) => return Rc::ptr_eq(a, b),
                (Expr::Error(a), Expr::Error(b)) => return a == b,
                _ => return false,
            }
        }
    }

    /// Rendering used by `display`: text without quotes, numbers in fixed-point
    /// with six decimals, everything else as [`Display`](fmt::Display).
    pub fn to_display_string(&self) -> String {
        match self {
            Expr::Symbol(text) | Expr::String(text) => text.to_string(),
            Expr::Number(n) => format!("{:.6}", n),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.structural_equals(other)
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Number(n)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::boolean(value)
    }
}

pub struct ListIter {
    current: Expr,
}

impl Iterator for ListIter {
    type Item = Expr;

    fn next(&mut self) -> Option<Expr> {
        let (head, tail) = match &self.current {
            Expr::Pair(pair) => (pair.head.clone(), pair.tail.clone()),
            _ => return None,
        };
        self.current = tail;
        Some(head)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Nil => write!(f, "nil"),
            Expr::T => write!(f, "T"),
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Symbol(name) => write!(f, "{}", name),
            Expr::String(text) => {
                write!(f, "\"")?;
                for ch in text.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Expr::Pair(_) => {
                write!(f, "(")?;
                let mut current = self;
                let mut first = true;
                loop {
                    match current {
                        Expr::Pair(pair) => {
                            if !first {
                                write!(f, " ")?;
                            }
                            write!(f, "{}", pair.head)?;
                            first = false;
                            current = &pair.tail;
                        }
                        Expr::Nil => break,
                        other => {
                            write!(f, " . {}", other)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Expr::Closure(closure) => write!(f, "#<closure {}>", closure.params),
            Expr::Error(err) => write!(f, "#<error: {}>", err),
        }
    }
}
