use lispx::{EvalError, Expr, Interpreter, Registry, parser};

/// Helper function to run a program against an existing interpreter
fn eval_string(input: &str, interp: &mut Interpreter<'_>) -> Expr {
    interp.run(input).unwrap()
}

/// Helper function to run a program in a fresh interpreter
fn eval_fresh(input: &str) -> Expr {
    eval_string(input, &mut Interpreter::new())
}

fn num(n: f64) -> Expr {
    Expr::Number(n)
}

fn error_of(value: Expr) -> EvalError {
    match value {
        Expr::Error(err) => (*err).clone(),
        other => panic!("Expected an error value, got {}", other),
    }
}

#[test]
fn test_basic_arithmetic() {
    assert_eq!(eval_fresh("(+ 1 2 3)"), num(6.0));
    assert_eq!(eval_fresh("(- 10 3 2)"), num(5.0));
    assert_eq!(eval_fresh("(* 2 3 4)"), num(24.0));
    assert_eq!(eval_fresh("(/ 10 4)"), num(2.5));
    assert_eq!(eval_fresh("(/ 5)"), num(5.0));

    // Test unary and nullary operators
    assert_eq!(eval_fresh("(- 5)"), num(-5.0));
    assert_eq!(eval_fresh("(-)"), num(0.0));
    assert_eq!(eval_fresh("(+)"), num(0.0));
    assert_eq!(eval_fresh("(*)"), num(1.0));
}

#[test]
fn test_nested_arithmetic() {
    assert_eq!(eval_fresh("(+ (* 2 3) (- 8 2))"), num(12.0));
    assert_eq!(eval_fresh("(* (+ 1 2) (- 5 2))"), num(9.0));
}

#[test]
fn test_comparisons() {
    assert_eq!(eval_fresh("(= 5 5)"), Expr::T);
    assert_eq!(eval_fresh("(= 5 6)"), Expr::Nil);
    assert_eq!(eval_fresh("(= '(1 (2)) (list 1 (list 2)))"), Expr::T);
    assert_eq!(eval_fresh("(= \"a\" 'a)"), Expr::Nil);
    assert_eq!(eval_fresh("(< 1 2 3)"), Expr::T);
    assert_eq!(eval_fresh("(< 1 3 2)"), Expr::Nil);
    assert_eq!(eval_fresh("(>= 3 3 1)"), Expr::T);
}

#[test]
fn test_list_operations() {
    assert_eq!(eval_fresh("(list 1 2 3)").to_string(), "(1 2 3)");
    assert_eq!(eval_fresh("(car (list 1 2 3))"), num(1.0));
    assert_eq!(eval_fresh("(cdr (list 1 2 3))").to_string(), "(2 3)");
    assert_eq!(eval_fresh("(cons 0 (list 1 2))").to_string(), "(0 1 2)");
    assert_eq!(eval_fresh("(cons 1 2)").to_string(), "(1 . 2)");
    assert_eq!(eval_fresh("(null? '())"), Expr::T);
    assert_eq!(eval_fresh("(null? (list 1))"), Expr::Nil);
    assert_eq!(eval_fresh("(cdr '(1))"), Expr::Nil);

    assert!(matches!(
        error_of(eval_fresh("(car '())")),
        EvalError::NotAPair { .. }
    ));
}

#[test]
fn test_quote() {
    assert_eq!(eval_fresh("(quote hello)"), Expr::symbol("hello"));
    assert_eq!(eval_fresh("'(1 2 3)").to_string(), "(1 2 3)");
    // Unbound symbols are fine inside quote
    assert_eq!(
        eval_fresh("'(undefined-a (undefined-b))").to_string(),
        "(undefined-a (undefined-b))"
    );
    assert_eq!(eval_fresh("'()"), Expr::Nil);
    assert_eq!(eval_fresh("(car ''x)"), Expr::symbol("quote"));
}

#[test]
fn test_predicates_and_conversions() {
    assert_eq!(eval_fresh("(atom? 'a)"), Expr::T);
    assert_eq!(eval_fresh("(atom? '(a))"), Expr::Nil);
    assert_eq!(eval_fresh("(list? '(a))"), Expr::T);
    assert_eq!(eval_fresh("(number? 1.5)"), Expr::T);
    assert_eq!(eval_fresh("(string? \"s\")"), Expr::T);
    assert_eq!(eval_fresh("(symbol? 'a)"), Expr::T);
    assert_eq!(eval_fresh("(not nil)"), Expr::T);
    assert_eq!(eval_fresh("(not 0)"), Expr::Nil);

    assert_eq!(eval_fresh("(string->symbol \"abc\")"), Expr::symbol("abc"));
    assert_eq!(eval_fresh("(symbol->string 'abc)"), Expr::string("abc"));
    assert_eq!(eval_fresh("(+ 1 (string->number \"41\"))"), num(42.0));
    assert_eq!(eval_fresh("(number->string 2.5)"), Expr::string("2.5"));
    assert_eq!(eval_fresh("(number->string 100)"), Expr::string("100"));
    assert_eq!(
        error_of(eval_fresh("(string->number \"4x\")")),
        EvalError::InvalidNumber("4x".to_string())
    );
}

#[test]
fn test_higher_order_functions() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define map (lambda (f xs)
           (if (null? xs)
               nil
               (cons (f (car xs)) (map f (cdr xs))))))",
        &mut interp,
    );
    assert_eq!(
        eval_string("(map (lambda (x) (* x x)) '(1 2 3 4))", &mut interp).to_string(),
        "(1 4 9 16)"
    );

    eval_string(
        "(define compose (lambda (f g) (lambda (x) (f (g x)))))
         (define inc (lambda (x) (+ x 1)))
         (define double (lambda (x) (* x 2)))",
        &mut interp,
    );
    assert_eq!(eval_string("((compose inc double) 5)", &mut interp), num(11.0));
    assert_eq!(eval_string("((compose double inc) 5)", &mut interp), num(12.0));
}

#[test]
fn test_lexical_scoping() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define make-adder (lambda (n) (lambda (x) (+ x n))))
         (define add5 (make-adder 5))
         (define add10 (make-adder 10))",
        &mut interp,
    );
    assert_eq!(eval_string("(add5 1)", &mut interp), num(6.0));
    assert_eq!(eval_string("(add10 1)", &mut interp), num(11.0));

    // The closure sees its defining scope, not the caller's
    eval_string(
        "(define x 'global)
         (define get-x (lambda () x))
         (define call-with-x (lambda (x) (get-x)))",
        &mut interp,
    );
    assert_eq!(
        eval_string("(call-with-x 'local)", &mut interp),
        Expr::symbol("global")
    );
}

#[test]
fn test_closure_state() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define make-counter (lambda ()
           (define count 0)
           (lambda () (set! count (+ count 1)) count)))
         (define c1 (make-counter))
         (define c2 (make-counter))",
        &mut interp,
    );
    eval_string("(c1) (c1)", &mut interp);
    assert_eq!(eval_string("(c1)", &mut interp), num(3.0));
    assert_eq!(eval_string("(c2)", &mut interp), num(1.0));
    assert!(!interp.global_env().is_bound_locally("count"));
}

#[test]
fn test_recursion() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define factorial (lambda (n) (if (<= n 1) 1 (* n (factorial (- n 1))))))
         (define fib (lambda (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))",
        &mut interp,
    );
    assert_eq!(eval_string("(factorial 10)", &mut interp), num(3628800.0));
    assert_eq!(eval_string("(fib 15)", &mut interp), num(610.0));

    // Self-application without define
    assert_eq!(
        eval_fresh(
            "((lambda (f x) (f f x)) (lambda (self n) (if (<= n 1) 1 (* n (self self (- n 1))))) 5)"
        ),
        num(120.0)
    );
}

#[test]
fn test_long_tail_loop() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define total 0)
         (define loop (lambda (i)
           (if (> i 0)
               (begin
                 (set! total (+ total i))
                 (loop (- i 1)))
               total)))",
        &mut interp,
    );
    assert_eq!(eval_string("(loop 100000)", &mut interp), num(5000050000.0));

    // Mutual tail calls
    eval_string(
        "(define even? (lambda (n) (if (= n 0) T (odd? (- n 1)))))
         (define odd? (lambda (n) (if (= n 0) nil (even? (- n 1)))))",
        &mut interp,
    );
    assert_eq!(eval_string("(even? 100001)", &mut interp), Expr::Nil);
}

#[test]
fn test_deep_closure_chain_is_freed() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define g (lambda (n k) (if (= n 0) 'built (g (- n 1) (lambda () k)))))",
        &mut interp,
    );
    assert_eq!(
        eval_string("(g 100000 (lambda () 0))", &mut interp),
        Expr::symbol("built")
    );

    // Keep the chain in a global, then let the rebinding release it
    eval_string(
        "(define h (lambda (n k) (if (= n 0) k (h (- n 1) (lambda () k)))))
         (define chain (h 100000 (lambda () 0)))",
        &mut interp,
    );
    assert!(matches!(
        eval_string("((((chain))))", &mut interp),
        Expr::Closure(_)
    ));
    assert_eq!(eval_string("(define chain nil)", &mut interp), Expr::Nil);
}

#[test]
fn test_tail_call_through_eval() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define spin (lambda (n) (if (= n 0) 'done (eval (list 'spin (- n 1))))))",
        &mut interp,
    );
    assert_eq!(eval_string("(spin 50000)", &mut interp), Expr::symbol("done"));
}

#[test]
fn test_define_and_set() {
    let mut interp = Interpreter::new();
    assert_eq!(
        eval_string("(define x 5) (set! x 6) (+ x 1)", &mut interp),
        num(7.0)
    );
    assert_eq!(
        error_of(eval_string("(set! y 1)", &mut interp)),
        EvalError::UnboundSymbol("y".to_string())
    );
    // A failed set! creates nothing
    assert!(!interp.global_env().is_bound_locally("y"));
}

#[test]
fn test_if_and_logic() {
    assert_eq!(eval_fresh("(if T 10 (car nil))"), num(10.0));
    assert_eq!(eval_fresh("(if nil (car nil) 20)"), num(20.0));
    assert_eq!(eval_fresh("(and)"), Expr::T);
    assert_eq!(eval_fresh("(or)"), Expr::Nil);
    assert_eq!(eval_fresh("(and 1 nil 3)"), num(3.0));
    assert_eq!(eval_fresh("(or nil nil 5)"), num(5.0));

    let mut interp = Interpreter::new();
    eval_string("(define hits 0)", &mut interp);
    eval_string(
        "(or nil (begin (set! hits (+ hits 1)) 'found) (set! hits 100))",
        &mut interp,
    );
    assert_eq!(eval_string("hits", &mut interp), num(1.0));

    eval_string(
        "(and (set! hits (+ hits 1)) nil (set! hits (+ hits 1)))",
        &mut interp,
    );
    assert_eq!(eval_string("hits", &mut interp), num(3.0));
}

#[test]
fn test_variadic_closures() {
    let mut interp = Interpreter::new();
    eval_string(
        "(define count-args (lambda args (if (null? args) 0 (+ 1 (eval (cons 'count-args (cdr args)))))))
         (define head-and-rest (lambda (a . rest) (list a rest)))",
        &mut interp,
    );
    assert_eq!(eval_string("(count-args 1 2 3 4)", &mut interp), num(4.0));
    assert_eq!(eval_string("(count-args)", &mut interp), num(0.0));
    assert_eq!(
        eval_string("(head-and-rest 1 2 3)", &mut interp).to_string(),
        "(1 (2 3))"
    );
}

#[test]
fn test_errors_as_values() {
    let division = eval_fresh("(/ 5 0)");
    assert_eq!(error_of(division.clone()), EvalError::DivisionByZero("/".to_string()));
    assert_eq!(division.to_string(), "#<error: /: division by zero>");

    // Errors travel as ordinary values
    assert_eq!(
        eval_fresh("(car (list (/ 1 0) 2))").to_string(),
        "#<error: /: division by zero>"
    );
    assert!(matches!(
        error_of(eval_fresh("(* 2 (/ 1 0))")),
        EvalError::TypeMismatch { op, .. } if op == "*"
    ));
    assert_eq!(
        error_of(eval_fresh("(error \"custom failure\" 7)")),
        EvalError::User("custom failure 7".to_string())
    );
    assert!(matches!(
        error_of(eval_fresh("(car 1 2)")),
        EvalError::ArityMismatch { got: 2, .. }
    ));
    assert_eq!(
        error_of(eval_fresh("(5 1)")),
        EvalError::NotCallable("5".to_string())
    );
}

#[test]
fn test_display_output() {
    let mut interp = Interpreter::new();
    let result = eval_string(
        "(define greet (lambda (name) (display \"Hello, \") (display name) (display \"!\")))
         (greet 'world)
         (display 42)",
        &mut interp,
    );
    assert_eq!(result, num(42.0));
    assert_eq!(interp.take_output(), "Hello, world!42.000000");
    assert_eq!(interp.output(), "");

    eval_string("(display '(1 \"two\" T))", &mut interp);
    assert_eq!(interp.take_output(), "(1 \"two\" T)");
}

#[test]
fn test_eval() {
    let mut interp = Interpreter::new();
    eval_string("(define code (list '+ 1 2 3))", &mut interp);
    assert_eq!(eval_string("(eval code)", &mut interp), num(6.0));
    assert_eq!(
        eval_string("(eval ''quoted)", &mut interp),
        Expr::symbol("quoted")
    );
}

#[test]
fn test_program_with_parse_error_runs_nothing() {
    let mut interp = Interpreter::new();
    let err = interp.run("(define a 1) (define b").unwrap_err();
    assert!(err.to_string().starts_with("parse error:"));
    assert!(!interp.global_env().is_bound_locally("a"));
}

#[test]
fn test_parse_then_evaluate_in_scope() {
    let mut interp = Interpreter::new();
    let scope = interp.global_env().child_scope();
    scope.define_local("x", num(4.0));

    let expr = parser::parse("(* x x)").unwrap();
    assert_eq!(interp.evaluate(&expr, &scope), num(16.0));
    assert!(matches!(interp.eval(&expr), Expr::Error(_)));
}

#[test]
fn test_interpreters_are_independent() {
    let registry = Registry::standard();
    let mut first = Interpreter::with_registry(registry);
    let mut second = Interpreter::with_registry(registry);
    eval_string("(define shared 1)", &mut first);
    assert_eq!(eval_string("shared", &mut first), num(1.0));
    assert_eq!(
        error_of(eval_string("shared", &mut second)),
        EvalError::UnboundSymbol("shared".to_string())
    );
}
