use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Closure, Expr};
use crate::builtinops::{Arity, BuiltinOp, CallContext, EvalPolicy, Registry};
use crate::environment::Environment;
use crate::parser;
use crate::{EvalError, ParseError};

/// Result of one evaluation step: either a finished value, or an expression
/// still to be evaluated in tail position.
#[derive(Debug)]
pub enum Trampoline {
    Value(Expr),
    Eval(Expr, Environment),
}

/// What the head of an application resolved to. Resolved once per
/// application.
enum Operator<'r> {
    Builtin(&'r BuiltinOp),
    Closure(Rc<Closure>),
    /// Head did not name anything callable; holds the error value to return
    Unbound(Expr),
}

/// Evaluator state: the operator table, the global scope every top-level
/// form runs in, and the buffer `display` writes to.
pub struct Interpreter<'r> {
    registry: &'r Registry,
    global: Environment,
    output: String,
}

impl Interpreter<'static> {
    /// Interpreter backed by the standard registry.
    pub fn new() -> Self {
        Interpreter::with_registry(Registry::standard())
    }
}

impl Default for Interpreter<'static> {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl<'r> Interpreter<'r> {
    pub fn with_registry(registry: &'r Registry) -> Self {
        Interpreter {
            registry,
            global: Environment::new(),
            output: String::new(),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn global_env(&self) -> &Environment {
        &self.global
    }

    /// Output written by `display` since the last [`take_output`](Self::take_output).
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Evaluate one expression in the global scope.
    pub fn eval(&mut self, expr: &Expr) -> Expr {
        let global = self.global.clone();
        self.evaluate(expr, &global)
    }

    /// Read every form in `source` and evaluate them in order, returning the
    /// last result (`Nil` for an empty program). Nothing is evaluated if the
    /// source fails to parse.
    pub fn run(&mut self, source: &str) -> Result<Expr, ParseError> {
        let forms = parser::parse_program(source)?;
        Ok(forms
            .iter()
            .fold(Expr::Nil, |_, form| self.eval(form)))
    }

    /// Evaluate `expr` in `env`. Tail positions are continued in this loop
    /// rather than by recursion.
    pub fn evaluate(&mut self, expr: &Expr, env: &Environment) -> Expr {
        let mut expr = expr.clone();
        let mut env = env.clone();
        loop {
            trace!(expr = %expr, "step");
            match self.step(&expr, &env) {
                Trampoline::Value(value) => return value,
                Trampoline::Eval(next, next_env) => {
                    expr = next;
                    env = next_env;
                }
            }
        }
    }

    fn step(&mut self, expr: &Expr, env: &Environment) -> Trampoline {
        match expr {
            Expr::Symbol(name) => Trampoline::Value(env.lookup(name).unwrap_or_else(Expr::error)),
            Expr::Pair(pair) => self.apply(pair.head(), pair.tail(), env),
            // Everything else evaluates to itself
            _ => Trampoline::Value(expr.clone()),
        }
    }

    fn apply(&mut self, head: &Expr, tail: &Expr, env: &Environment) -> Trampoline {
        let args = match tail.to_vec() {
            Ok(args) => args,
            Err(err) => return Trampoline::Value(Expr::error(err)),
        };

        match self.resolve_operator(head, env) {
            Operator::Builtin(op) => self.apply_builtin(op, &args, env),
            Operator::Closure(closure) => self.apply_closure(&closure, head, &args, env),
            Operator::Unbound(error) => Trampoline::Value(error),
        }
    }

    /// A symbol head is looked up in the registry before the environment, so
    /// builtins can't be rebound. Any other head is evaluated.
    fn resolve_operator(&mut self, head: &Expr, env: &Environment) -> Operator<'r> {
        let registry = self.registry;
        let value = match head {
            Expr::Symbol(name) => {
                if let Some(op) = registry.get(name) {
                    return Operator::Builtin(op);
                }
                match env.lookup(name) {
                    Ok(value) => value,
                    Err(err) => return Operator::Unbound(Expr::error(err)),
                }
            }
            other => self.evaluate(other, env),
        };

        match value {
            Expr::Closure(closure) => Operator::Closure(closure),
            // An error in operator position propagates unchanged
            error @ Expr::Error(_) => Operator::Unbound(error),
            other => Operator::Unbound(Expr::error(EvalError::NotCallable(other.to_string()))),
        }
    }

    fn apply_builtin(&mut self, op: &BuiltinOp, args: &[Expr], env: &Environment) -> Trampoline {
        if let Err(err) = op.validate_arity(args.len()) {
            debug!(op = op.id, error = %err, "builtin rejected arguments");
            return Trampoline::Value(Expr::error(err));
        }

        let prepared = self.prepare_args(op.policy, args, env);

        let mut ctx = CallContext {
            env,
            output: &mut self.output,
        };
        match (op.behavior)(&mut ctx, &prepared) {
            Ok(result) if op.policy.forwards_tail() => Trampoline::Eval(result, env.clone()),
            Ok(result) => Trampoline::Value(result),
            Err(err) => {
                debug!(op = op.id, error = %err, "builtin failed");
                Trampoline::Value(Expr::error(err))
            }
        }
    }

    /// Turn raw argument expressions into what the behavior receives.
    fn prepare_args(&mut self, policy: EvalPolicy, args: &[Expr], env: &Environment) -> Vec<Expr> {
        match policy {
            EvalPolicy::Eager | EvalPolicy::ShortCircuitAnd | EvalPolicy::MetaReenter => {
                self.eval_args(args, env)
            }
            EvalPolicy::Opaque => args.to_vec(),
            EvalPolicy::PositionalEager(positions) => {
                let mut prepared = Vec::with_capacity(args.len());
                for (index, arg) in args.iter().enumerate() {
                    if positions.contains(&index) {
                        prepared.push(self.evaluate(arg, env));
                    } else {
                        prepared.push(arg.clone());
                    }
                }
                prepared
            }
            EvalPolicy::ShortCircuitOr => {
                let mut prepared = Vec::with_capacity(args.len());
                for arg in args {
                    let value = self.evaluate(arg, env);
                    let stop = !value.is_falsy();
                    prepared.push(value);
                    if stop {
                        break;
                    }
                }
                prepared
            }
            EvalPolicy::TailSelect => match args.split_first() {
                Some((test, branches)) => {
                    let mut prepared = Vec::with_capacity(args.len());
                    prepared.push(self.evaluate(test, env));
                    prepared.extend_from_slice(branches);
                    prepared
                }
                None => Vec::new(),
            },
            EvalPolicy::Sequence => match args.split_last() {
                Some((last, init)) => {
                    let mut prepared = self.eval_args(init, env);
                    prepared.push(last.clone());
                    prepared
                }
                None => Vec::new(),
            },
        }
    }

    fn apply_closure(
        &mut self,
        closure: &Rc<Closure>,
        head: &Expr,
        args: &[Expr],
        env: &Environment,
    ) -> Trampoline {
        let values = self.eval_args(args, env);

        let arity = closure.arity();
        if !arity.accepts(values.len()) {
            let err = EvalError::arity(&head.to_string(), arity, values.len());
            debug!(error = %err, "closure rejected arguments");
            return Trampoline::Value(Expr::error(err));
        }
        trace!(closure = %head, args = values.len(), "apply closure");

        let scope = closure.env().child_scope();
        bind_params(&scope, closure.params(), values);

        match closure.body().split_last() {
            Some((last, init)) => {
                for expr in init {
                    self.evaluate(expr, &scope);
                }
                Trampoline::Eval(last.clone(), scope)
            }
            None => Trampoline::Value(Expr::Nil),
        }
    }

    /// Helper function to evaluate a list of argument expressions
    fn eval_args(&mut self, args: &[Expr], env: &Environment) -> Vec<Expr> {
        args.iter().map(|arg| self.evaluate(arg, env)).collect()
    }
}

/// Bind argument values to a parameter spec. The count has already been
/// checked against the closure's arity.
fn bind_params(scope: &Environment, params: &Expr, values: Vec<Expr>) {
    let mut spec = params;
    let mut values = values.into_iter();
    loop {
        match spec {
            Expr::Pair(pair) => {
                if let (Some(name), Some(value)) = (pair.head().as_symbol(), values.next()) {
                    scope.define_local(name, value);
                }
                spec = pair.tail();
            }
            // Bare or dotted-tail symbol collects the remaining arguments
            Expr::Symbol(rest) => {
                scope.define_local(rest.to_string(), Expr::list(values));
                return;
            }
            _ => return,
        }
    }
}

/// Parameter specs are a list of symbols, a bare symbol, or a dotted list
/// ending in a symbol, with no name repeated.
fn validate_params(spec: &Expr) -> Result<(), EvalError> {
    let mut seen: Vec<&str> = Vec::new();
    let mut current = spec;
    loop {
        let (param, rest) = match current {
            Expr::Nil => return Ok(()),
            Expr::Pair(pair) => (pair.head(), Some(pair.tail())),
            other => (other, None),
        };

        let Some(name) = param.as_symbol() else {
            return Err(EvalError::type_mismatch(
                "lambda",
                format!("parameter must be a symbol, got {}", param),
            ));
        };
        if seen.contains(&name) {
            return Err(EvalError::InvalidForm(format!(
                "lambda: duplicate parameter name {}",
                name
            )));
        }
        seen.push(name);

        match rest {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }
}

//
// Special forms. Arguments arrive already prepared according to each form's
// evaluation policy.
//

/// Evaluate quote special form
pub fn eval_quote(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(EvalError::arity("quote", Arity::Exact(1), args.len())),
    }
}

/// Evaluate define special form: binds in the current scope and returns the
/// value.
pub fn eval_define(ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [Expr::Symbol(name), value] => {
            debug!(name = %name, depth = ctx.env.depth(), "define");
            ctx.env.define_local(name.to_string(), value.clone());
            Ok(value.clone())
        }
        [target, _] => Err(EvalError::type_mismatch(
            "define",
            format!("expected a symbol, got {}", target),
        )),
        _ => Err(EvalError::arity("define", Arity::Exact(2), args.len())),
    }
}

/// Evaluate set! special form: overwrites the nearest existing binding.
pub fn eval_set(ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [Expr::Symbol(name), value] => {
            debug!(name = %name, "set!");
            ctx.env.assign_existing(name, value.clone())?;
            Ok(value.clone())
        }
        [target, _] => Err(EvalError::type_mismatch(
            "set!",
            format!("expected a symbol, got {}", target),
        )),
        _ => Err(EvalError::arity("set!", Arity::Exact(2), args.len())),
    }
}

/// Evaluate lambda special form
pub fn eval_lambda(ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [params, body @ ..] if !body.is_empty() => {
            validate_params(params)?;
            Ok(Expr::Closure(Rc::new(Closure::new(
                params.clone(),
                body.to_vec(),
                ctx.env.clone(),
            ))))
        }
        _ => Err(EvalError::arity("lambda", Arity::AtLeast(2), args.len())),
    }
}

/// Evaluate begin special form: hands back the final, unevaluated expression.
pub fn eval_begin(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    Ok(args.last().cloned().unwrap_or(Expr::Nil))
}

/// Evaluate if special form: picks the branch to continue with.
pub fn eval_if(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [test, then_expr] => Ok(if test.is_falsy() {
            Expr::Nil
        } else {
            then_expr.clone()
        }),
        [test, then_expr, else_expr] => Ok(if test.is_falsy() {
            else_expr.clone()
        } else {
            then_expr.clone()
        }),
        _ => Err(EvalError::arity("if", Arity::Range(2, 3), args.len())),
    }
}

/// Evaluate and special form: the last result, or `T` with no arguments.
pub fn eval_and(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    Ok(args.last().cloned().unwrap_or(Expr::T))
}

/// Evaluate or special form: the first non-nil result, or `Nil`.
pub fn eval_or(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    Ok(args
        .iter()
        .find(|value| !value.is_falsy())
        .cloned()
        .unwrap_or(Expr::Nil))
}

/// Evaluate eval special form: the evaluated argument is evaluated again as
/// code.
pub fn eval_eval(_ctx: &mut CallContext<'_>, args: &[Expr]) -> Result<Expr, EvalError> {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(EvalError::arity("eval", Arity::Exact(1), args.len())),
    }
}
