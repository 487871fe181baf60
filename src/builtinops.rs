//! Built-in operations registry.
//!
//! Every operator the evaluator knows by name lives in one table. An entry
//! carries the operator's name, its declared [`Arity`], an [`EvalPolicy`]
//! describing how the evaluator prepares arguments before the call, and the
//! behavior itself.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions** use [`EvalPolicy::Eager`]: every argument is evaluated, left
//!   to right, before application (e.g. `+`, `car`, `display`).
//! - **Special forms** declare any other policy: `quote` sees its argument
//!   untouched, `if` gets an evaluated test plus raw branches, `or` stops at the
//!   first non-nil result, and so on.
//!
//! Special-form behaviors live in [`crate::evaluator`] next to the dispatch
//! loop; ordinary primitives live here.
//!
//! ## Error Handling
//!
//! Behaviors return `Result<Expr, EvalError>`; the evaluator turns an `Err`
//! into an [`Expr::Error`] value. Arity is checked against the declared
//! [`Arity`] before arguments are prepared, and each behavior still matches
//! its own argument shape so it is safe to call directly.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the behavior** with the signature [`Behavior`]
//! 2. **Add it to `BUILTIN_OPS`** with its name, policy and arity
//! 3. Or, for embedders, build a [`Registry`] and [`Registry::register`] it

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::EvalError;
use crate::ast::Expr;
use crate::environment::Environment;
use crate::evaluator::{
    eval_and, eval_begin, eval_define, eval_eval, eval_if, eval_lambda, eval_or, eval_quote,
    eval_set,
};
use crate::parser;

/// Represents the expected number of arguments for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments required
    Exact(usize),
    /// At least n arguments required
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments (0 or more)
    Any,
}

impl Arity {
    pub fn accepts(&self, arg_count: usize) -> bool {
        match self {
            Arity::Exact(n) => arg_count == *n,
            Arity::AtLeast(n) => arg_count >= *n,
            Arity::Range(min, max) => arg_count >= *min && arg_count <= *max,
            Arity::Any => true,
        }
    }

    /// Check if the given number of arguments is valid for this arity constraint
    pub fn validate(&self, op: &str, arg_count: usize) -> Result<(), EvalError> {
        if self.accepts(arg_count) {
            Ok(())
        } else {
            Err(EvalError::arity(op, *self, arg_count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// How the evaluator prepares an operator's arguments before invoking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPolicy {
    /// Evaluate every argument, left to right
    Eager,
    /// Pass every argument unevaluated
    Opaque,
    /// Evaluate only the arguments at these 0-based positions
    PositionalEager(&'static [usize]),
    /// Evaluate left to right, stopping after the first non-nil result
    ShortCircuitOr,
    /// Evaluate every argument, left to right; falsy results never stop it
    ShortCircuitAnd,
    /// Evaluate the test only; the behavior picks a raw branch, which the
    /// evaluator continues with in tail position
    TailSelect,
    /// Evaluate the argument, then evaluate the resulting value as code
    MetaReenter,
    /// Evaluate all but the last argument; the last is continued with in tail
    /// position
    Sequence,
}

impl EvalPolicy {
    /// Whether the behavior's result is an expression still to be evaluated.
    pub fn forwards_tail(&self) -> bool {
        matches!(
            self,
            EvalPolicy::TailSelect | EvalPolicy::MetaReenter | EvalPolicy::Sequence
        )
    }
}

/// What a behavior can see besides its arguments.
pub struct CallContext<'a> {
    /// The environment the operator was applied in
    pub env: &'a Environment,
    /// Accumulated `display` output
    pub output: &'a mut String,
}

/// Implementation of a built-in operation.
pub type Behavior = fn(&mut CallContext<'_>, &[Expr]) -> Result<Expr, EvalError>;

/// Definition of a built-in operation
#[derive(Clone, Copy)]
pub struct BuiltinOp {
    /// Name the operator is applied by
    pub id: &'static str,
    /// How arguments are prepared before the call
    pub policy: EvalPolicy,
    /// Expected number of arguments
    pub arity: Arity,
    pub behavior: Behavior,
}

impl fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        // Operations are identified by name
        self.id == other.id
    }
}

impl BuiltinOp {
    /// Check if this operation is a special form
    pub fn is_special_form(&self) -> bool {
        self.policy != EvalPolicy::Eager
    }

    /// Check if the given number of arguments is valid for this operation
    pub fn validate_arity(&self, arg_count: usize) -> Result<(), EvalError> {
        self.arity.validate(self.id, arg_count)
    }
}

/// Immutable name -> operation table consulted by the evaluator.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    ops: HashMap<&'static str, BuiltinOp>,
}

static STANDARD_REGISTRY: LazyLock<Registry> = LazyLock::new(|| Registry::from_ops(BUILTIN_OPS));

impl Registry {
    /// An empty registry: nothing but closures can be applied.
    pub fn new() -> Self {
        Registry::default()
    }

    /// The shared registry holding every standard operation.
    pub fn standard() -> &'static Registry {
        &STANDARD_REGISTRY
    }

    pub fn from_ops(ops: &[BuiltinOp]) -> Self {
        Registry {
            ops: ops.iter().map(|op| (op.id, *op)).collect(),
        }
    }

    /// Add an operation, returning the one it replaces.
    pub fn register(&mut self, op: BuiltinOp) -> Option<BuiltinOp> {
        self.ops.insert(op.id, op)
    }

    pub fn get(&self, id: &str) -> Option<&BuiltinOp> {
        self.ops.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ops.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operation names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.ops.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

//
// Builtin Function Implementations
//

fn expect_number(op: &str, value: &Expr) -> Result<f64, EvalError> {
    value.as_number().ok_or_else(|| {
        EvalError::type_mismatch(op, format!("expected a number, got {}", value))
    })
}

fn expect_numbers(op: &str, args: &[Expr]) -> Result<Vec<f64>, EvalError> {
    args.iter().map(|arg| expect_number(op, arg)).collect()
}

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        pub fn $name(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
            if args.len() < 2 {
                return Err(EvalError::arity($op_str, Arity::AtLeast(2), args.len()));
            }

            let numbers = expect_numbers($op_str, args)?;
            // Chain comparisons: all adjacent pairs must satisfy the comparison
            Ok(Expr::boolean(numbers.windows(2).all(|w| w[0] $op w[1])))
        }
    };
}

// Generate all comparison functions
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_ge, >=, ">=");

// Macro to generate single-argument type predicates
macro_rules! type_predicate {
    ($name:ident, $op_str:expr, $pattern:pat) => {
        pub fn $name(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
            match args {
                [value] => Ok(Expr::boolean(matches!(value, $pattern))),
                _ => Err(EvalError::arity($op_str, Arity::Exact(1), args.len())),
            }
        }
    };
}

type_predicate!(builtin_not, "not", Expr::Nil);
type_predicate!(builtin_null, "null?", Expr::Nil);
type_predicate!(builtin_is_list, "list?", Expr::Pair(_) | Expr::Nil);
type_predicate!(builtin_is_number, "number?", Expr::Number(_));
type_predicate!(builtin_is_string, "string?", Expr::String(_));
type_predicate!(builtin_is_symbol, "symbol?", Expr::Symbol(_));

pub fn builtin_is_atom(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [value] => Ok(Expr::boolean(!value.is_pair())),
        _ => Err(EvalError::arity("atom?", Arity::Exact(1), args.len())),
    }
}

/// `=`: every argument structurally equal to the first.
pub fn builtin_eq(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [first, rest @ ..] if !rest.is_empty() => Ok(Expr::boolean(
            rest.iter().all(|arg| first.structural_equals(arg)),
        )),
        _ => Err(EvalError::arity("=", Arity::AtLeast(2), args.len())),
    }
}

pub fn builtin_add(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    let sum: f64 = expect_numbers("+", args)?.into_iter().sum();
    Ok(Expr::from(sum))
}

pub fn builtin_sub(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match expect_numbers("-", args)?.as_slice() {
        [] => Ok(Expr::Number(0.0)),
        // Unary minus
        [only] => Ok(Expr::Number(-only)),
        [first, rest @ ..] => Ok(Expr::Number(rest.iter().fold(*first, |acc, n| acc - n))),
    }
}

pub fn builtin_mul(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    let product: f64 = expect_numbers("*", args)?.into_iter().product();
    Ok(Expr::from(product))
}

pub fn builtin_div(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match expect_numbers("/", args)?.as_slice() {
        [] => Err(EvalError::arity("/", Arity::AtLeast(1), 0)),
        [first, rest @ ..] => {
            let mut result = *first;
            for divisor in rest {
                if *divisor == 0.0 {
                    return Err(EvalError::DivisionByZero("/".to_string()));
                }
                result /= divisor;
            }
            Ok(Expr::Number(result))
        }
    }
}

pub fn builtin_car(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [value] => value.head(),
        _ => Err(EvalError::arity("car", Arity::Exact(1), args.len())),
    }
}

pub fn builtin_cdr(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [value] => value.tail(),
        _ => Err(EvalError::arity("cdr", Arity::Exact(1), args.len())),
    }
}

pub fn builtin_cons(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [head, tail] => Ok(Expr::cons(head.clone(), tail.clone())),
        _ => Err(EvalError::arity("cons", Arity::Exact(2), args.len())),
    }
}

pub fn builtin_list(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    Ok(Expr::list(args.iter().cloned()))
}

pub fn builtin_string_to_symbol(
    _ctx: &mut CallContext<'_>,
    args: &[Expr],
) -> Result<Expr, EvalError> {
    match args {
        [Expr::String(text)] => Ok(Expr::Symbol(text.clone())),
        [other] => Err(EvalError::type_mismatch(
            "string->symbol",
            format!("expected a string, got {}", other),
        )),
        _ => Err(EvalError::arity("string->symbol", Arity::Exact(1), args.len())),
    }
}

pub fn builtin_symbol_to_string(
    _ctx: &mut CallContext<'_>,
    args: &[Expr],
) -> Result<Expr, EvalError> {
    match args {
        [Expr::Symbol(name)] => Ok(Expr::String(name.clone())),
        [other] => Err(EvalError::type_mismatch(
            "symbol->string",
            format!("expected a symbol, got {}", other),
        )),
        _ => Err(EvalError::arity("symbol->string", Arity::Exact(1), args.len())),
    }
}

pub fn builtin_string_to_number(
    _ctx: &mut CallContext<'_>,
    args: &[Expr],
) -> Result<Expr, EvalError> {
    match args {
        [Expr::String(text)] => parser::parse_number(text)
            .map(Expr::Number)
            .map_err(|_| EvalError::InvalidNumber(text.to_string())),
        [other] => Err(EvalError::type_mismatch(
            "string->number",
            format!("expected a string, got {}", other),
        )),
        _ => Err(EvalError::arity("string->number", Arity::Exact(1), args.len())),
    }
}

pub fn builtin_number_to_string(
    _ctx: &mut CallContext<'_>,
    args: &[Expr],
) -> Result<Expr, EvalError> {
    match args {
        [value] => {
            let n = expect_number("number->string", value)?;
            Ok(Expr::string(n.to_string()))
        }
        _ => Err(EvalError::arity("number->string", Arity::Exact(1), args.len())),
    }
}

pub fn builtin_display(ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [value] => {
            ctx.output.push_str(&value.to_display_string());
            Ok(value.clone())
        }
        _ => Err(EvalError::arity("display", Arity::Exact(1), args.len())),
    }
}

pub fn builtin_error(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    // Convert a value to error message string
    fn value_to_error_string(value: &Expr) -> String {
        match value {
            Expr::String(s) => s.to_string(), // Remove quotes for error messages
            _ => value.to_string(),
        }
    }

    if args.is_empty() {
        return Err(EvalError::User("Error".to_string()));
    }

    let message = args
        .iter()
        .map(value_to_error_string)
        .collect::<Vec<_>>()
        .join(" ");
    Err(EvalError::User(message))
}

/// Global registry of all built-in operations as a simple array
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Special forms
    BuiltinOp {
        id: "quote",
        policy: EvalPolicy::Opaque,
        arity: Arity::Exact(1),
        behavior: eval_quote,
    },
    BuiltinOp {
        id: "define",
        policy: EvalPolicy::PositionalEager(&[1]),
        arity: Arity::Exact(2),
        behavior: eval_define,
    },
    BuiltinOp {
        id: "set!",
        policy: EvalPolicy::PositionalEager(&[1]),
        arity: Arity::Exact(2),
        behavior: eval_set,
    },
    BuiltinOp {
        id: "lambda",
        policy: EvalPolicy::PositionalEager(&[]),
        arity: Arity::AtLeast(2),
        behavior: eval_lambda,
    },
    BuiltinOp {
        id: "begin",
        policy: EvalPolicy::Sequence,
        arity: Arity::Any,
        behavior: eval_begin,
    },
    BuiltinOp {
        id: "if",
        policy: EvalPolicy::TailSelect,
        arity: Arity::Range(2, 3),
        behavior: eval_if,
    },
    BuiltinOp {
        id: "and",
        policy: EvalPolicy::ShortCircuitAnd,
        arity: Arity::Any,
        behavior: eval_and,
    },
    BuiltinOp {
        id: "or",
        policy: EvalPolicy::ShortCircuitOr,
        arity: Arity::Any,
        behavior: eval_or,
    },
    BuiltinOp {
        id: "eval",
        policy: EvalPolicy::MetaReenter,
        arity: Arity::Exact(1),
        behavior: eval_eval,
    },
    // Arithmetic operations
    BuiltinOp {
        id: "+",
        policy: EvalPolicy::Eager,
        arity: Arity::Any,
        behavior: builtin_add,
    },
    BuiltinOp {
        id: "-",
        policy: EvalPolicy::Eager,
        arity: Arity::Any,
        behavior: builtin_sub,
    },
    BuiltinOp {
        id: "*",
        policy: EvalPolicy::Eager,
        arity: Arity::Any,
        behavior: builtin_mul,
    },
    BuiltinOp {
        id: "/",
        policy: EvalPolicy::Eager,
        arity: Arity::AtLeast(1),
        behavior: builtin_div,
    },
    // Comparison operations
    BuiltinOp {
        id: "=",
        policy: EvalPolicy::Eager,
        arity: Arity::AtLeast(2),
        behavior: builtin_eq,
    },
    BuiltinOp {
        id: "<",
        policy: EvalPolicy::Eager,
        arity: Arity::AtLeast(2),
        behavior: builtin_lt,
    },
    BuiltinOp {
        id: ">",
        policy: EvalPolicy::Eager,
        arity: Arity::AtLeast(2),
        behavior: builtin_gt,
    },
    BuiltinOp {
        id: "<=",
        policy: EvalPolicy::Eager,
        arity: Arity::AtLeast(2),
        behavior: builtin_le,
    },
    BuiltinOp {
        id: ">=",
        policy: EvalPolicy::Eager,
        arity: Arity::AtLeast(2),
        behavior: builtin_ge,
    },
    // Predicates
    BuiltinOp {
        id: "not",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_not,
    },
    BuiltinOp {
        id: "atom?",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_is_atom,
    },
    BuiltinOp {
        id: "list?",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_is_list,
    },
    BuiltinOp {
        id: "null?",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_null,
    },
    BuiltinOp {
        id: "number?",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_is_number,
    },
    BuiltinOp {
        id: "string?",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_is_string,
    },
    BuiltinOp {
        id: "symbol?",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_is_symbol,
    },
    // List operations
    BuiltinOp {
        id: "car",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_car,
    },
    BuiltinOp {
        id: "cdr",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_cdr,
    },
    BuiltinOp {
        id: "cons",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(2),
        behavior: builtin_cons,
    },
    BuiltinOp {
        id: "list",
        policy: EvalPolicy::Eager,
        arity: Arity::Any,
        behavior: builtin_list,
    },
    // Conversions
    BuiltinOp {
        id: "string->symbol",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_string_to_symbol,
    },
    BuiltinOp {
        id: "symbol->string",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_symbol_to_string,
    },
    BuiltinOp {
        id: "string->number",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_string_to_number,
    },
    BuiltinOp {
        id: "number->string",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_number_to_string,
    },
    // Output
    BuiltinOp {
        id: "display",
        policy: EvalPolicy::Eager,
        arity: Arity::Exact(1),
        behavior: builtin_display,
    },
    // Error handling
    BuiltinOp {
        id: "error",
        policy: EvalPolicy::Eager,
        arity: Arity::Any,
        behavior: builtin_error,
    },
];
