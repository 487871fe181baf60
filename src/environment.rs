//! Lexical scopes.
//!
//! An [`Environment`] is a shared handle to one scope. Closures keep the scope
//! they were created in alive, so scopes are reference-counted rather than
//! tied to the evaluator's call stack. Single-threaded by construction.
//!
//! A closure stored in the scope it captured forms a reference cycle, and
//! such a scope is never freed unless the binding is later replaced. This
//! happens for a `define` of a lambda inside a function body (one scope per
//! call) and for top-level definitions. Calls that bind no such closure free
//! their scope on return.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::EvalError;
use crate::ast::Expr;

#[derive(Default)]
struct Scope {
    bindings: HashMap<String, Expr>,
    parent: Option<Environment>,
}

impl Drop for Scope {
    // Scopes own closures and closures own scopes, so a long chain of them
    // is unlinked from a worklist instead of one nested drop per link.
    fn drop(&mut self) {
        let mut values: Vec<Expr> = self.bindings.drain().map(|(_, value)| value).collect();
        let mut scopes: Vec<Environment> = self.parent.take().into_iter().collect();
        loop {
            if let Some(env) = scopes.pop() {
                if let Ok(cell) = Rc::try_unwrap(env.0) {
                    let mut scope = cell.into_inner();
                    values.extend(scope.bindings.drain().map(|(_, value)| value));
                    scopes.extend(scope.parent.take());
                }
            } else if let Some(value) = values.pop() {
                match value {
                    Expr::Closure(closure) => {
                        if let Ok(closure) = Rc::try_unwrap(closure) {
                            let (params, body, env) = closure.into_parts();
                            values.push(params);
                            values.extend(body);
                            scopes.push(env);
                        }
                    }
                    Expr::Pair(pair) => {
                        if let Ok(mut pair) = Rc::try_unwrap(pair) {
                            let (head, tail) = pair.take_parts();
                            values.push(head);
                            values.push(tail);
                        }
                    }
                    _ => {}
                }
            } else {
                break;
            }
        }
    }
}

/// Shared handle to a scope and, through its parent link, the whole chain up
/// to the root. Cloning the handle shares the scope.
#[derive(Clone, Default)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Environment {
    /// A new root scope.
    pub fn new() -> Self {
        Environment::default()
    }

    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    /// A fresh, empty scope whose parent is `self`.
    pub fn child_scope(&self) -> Self {
        Environment::with_parent(self)
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Nearest binding of `name`, walking from this scope toward the root.
    pub fn get(&self, name: &str) -> Option<Expr> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let current = scope.0.borrow();
                if let Some(value) = current.bindings.get(name) {
                    return Some(value.clone());
                }
                current.parent.clone()?
            };
            scope = parent;
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Expr, EvalError> {
        self.get(name)
            .ok_or_else(|| EvalError::UnboundSymbol(name.to_string()))
    }

    /// Bind `name` in this scope, replacing any existing local binding.
    /// Bindings in enclosing scopes are shadowed, never touched.
    pub fn define_local(&self, name: impl Into<String>, value: Expr) {
        let previous = self.0.borrow_mut().bindings.insert(name.into(), value);
        // Released after the borrow: the old value may own other scopes.
        drop(previous);
    }

    /// Overwrite the nearest existing binding of `name`.
    pub fn assign_existing(&self, name: &str, value: Expr) -> Result<(), EvalError> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let mut current = scope.0.borrow_mut();
                if let Some(slot) = current.bindings.get_mut(name) {
                    let previous = std::mem::replace(slot, value);
                    drop(current);
                    drop(previous);
                    return Ok(());
                }
                current.parent.clone()
            };
            match parent {
                Some(parent) => scope = parent,
                None => return Err(EvalError::UnboundSymbol(name.to_string())),
            }
        }
    }

    pub fn is_bound_locally(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// Names bound directly in this scope, sorted.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.borrow().bindings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of scopes above this one.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut parent = self.parent();
        while let Some(scope) = parent {
            depth += 1;
            parent = scope.parent();
        }
        depth
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// Closures stored in a scope usually capture that same scope, so Debug lists
// names instead of recursing into values.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(_) => f
                .debug_struct("Environment")
                .field("bindings", &self.local_names())
                .field("depth", &self.depth())
                .finish(),
            Err(_) => f.write_str("Environment(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Closure;

    fn closure_over(scope: &Environment) -> Expr {
        Expr::Closure(Rc::new(Closure::new(
            Expr::Nil,
            vec![Expr::symbol("k")],
            scope.clone(),
        )))
    }

    #[test]
    fn test_lookup_and_shadowing() {
        let root = Environment::new();
        root.define_local("x", Expr::Number(1.0));

        let child = root.child_scope();
        assert_eq!(child.lookup("x").unwrap(), Expr::Number(1.0));

        child.define_local("x", Expr::Number(2.0));
        assert_eq!(child.lookup("x").unwrap(), Expr::Number(2.0));
        assert_eq!(root.lookup("x").unwrap(), Expr::Number(1.0));

        assert_eq!(
            child.lookup("missing"),
            Err(EvalError::UnboundSymbol("missing".to_string()))
        );
    }

    #[test]
    fn test_define_local_overwrites() {
        let env = Environment::new();
        env.define_local("a", Expr::Number(1.0));
        env.define_local("a", Expr::string("two"));
        assert_eq!(env.get("a"), Some(Expr::string("two")));
        assert_eq!(env.local_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_assign_existing_walks_to_nearest_binding() {
        let root = Environment::new();
        root.define_local("n", Expr::Number(0.0));
        let middle = root.child_scope();
        let leaf = middle.child_scope();

        leaf.assign_existing("n", Expr::Number(5.0)).unwrap();
        assert_eq!(root.lookup("n").unwrap(), Expr::Number(5.0));
        assert!(!leaf.is_bound_locally("n"));

        // A shadowing binding in the middle takes the assignment instead
        middle.define_local("n", Expr::Number(10.0));
        leaf.assign_existing("n", Expr::Number(11.0)).unwrap();
        assert_eq!(middle.lookup("n").unwrap(), Expr::Number(11.0));
        assert_eq!(root.lookup("n").unwrap(), Expr::Number(5.0));

        assert_eq!(
            leaf.assign_existing("undefined", Expr::T),
            Err(EvalError::UnboundSymbol("undefined".to_string()))
        );
        assert!(!leaf.is_bound_locally("undefined"));
    }

    #[test]
    fn test_shared_handles() {
        let root = Environment::new();
        let alias = root.clone();
        alias.define_local("shared", Expr::T);
        assert_eq!(root.lookup("shared").unwrap(), Expr::T);
        assert_eq!(root, alias);
        assert_ne!(root, root.child_scope());
    }

    #[test]
    fn test_parent_and_depth() {
        let root = Environment::new();
        let child = root.child_scope();
        let grandchild = child.child_scope();
        assert_eq!(root.depth(), 0);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.parent(), Some(child));
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_drop_long_closure_chain() {
        // Each closure captures a scope that binds the previous closure
        let root = Environment::new();
        let mut link = Expr::Nil;
        for _ in 0..100_000 {
            let scope = root.child_scope();
            scope.define_local("k", link);
            link = closure_over(&scope);
        }
        drop(link);

        // Same chain with each link wrapped in a list
        let mut link = Expr::Nil;
        for _ in 0..100_000 {
            let scope = root.child_scope();
            scope.define_local("k", Expr::list([link, Expr::T]));
            link = closure_over(&scope);
        }
        drop(link);

        assert_eq!(root.depth(), 0);
    }

    #[test]
    fn test_scope_released_without_cycle() {
        let root = Environment::new();
        let scope = root.child_scope();
        scope.define_local("f", closure_over(&root));
        let weak = Rc::downgrade(&scope.0);
        drop(scope);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_self_capturing_closure_keeps_scope() {
        let root = Environment::new();
        let scope = root.child_scope();
        scope.define_local("helper", closure_over(&scope));
        let weak = Rc::downgrade(&scope.0);
        drop(scope);

        // The closure holds the scope that binds it
        let scope = Environment(weak.upgrade().unwrap());
        assert!(scope.is_bound_locally("helper"));

        // Replacing the binding breaks the cycle
        scope.define_local("helper", Expr::Nil);
        drop(scope);
        assert!(weak.upgrade().is_none());
    }
}
