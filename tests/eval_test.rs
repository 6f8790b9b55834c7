//! Evaluator integration tests: special forms, closures, macros, environment
//! behavior, and the error trap.

mod common;

use common::{new_interp, run, run_err, run_in};

// =============================================================================
// Self-evaluation and variables
// =============================================================================

#[test]
fn atoms_self_evaluate() {
    assert_eq!(run("42"), "42");
    assert_eq!(run("\"hi\""), "\"hi\"");
    assert_eq!(run("t"), "t");
    assert_eq!(run("nil"), "()");
    assert_eq!(run("()"), "()");
}

#[test]
fn unbound_symbol_errors() {
    let msg = run_err("no-such-thing");
    assert!(msg.contains("undefined symbol: no-such-thing"), "{}", msg);
}

#[test]
fn star_env_is_the_current_environment() {
    assert_eq!(run("(type *env*)"), "obj");
    // Inside a call the innermost frame is a different object.
    assert_eq!(run("((fn () (eq? *env* *env*)))"), "t");
    assert_eq!(run("((fn () (if (eq? *env* (obj-proto *env*)) t ())))"), "()");
}

// =============================================================================
// Arithmetic and comparisons
// =============================================================================

#[test]
fn arithmetic() {
    assert_eq!(run("(+ 1 2 3)"), "6");
    assert_eq!(run("(+)"), "0");
    assert_eq!(run("(- 5)"), "-5");
    assert_eq!(run("(- 10 3 2)"), "5");
    assert_eq!(run("(< 1 2)"), "t");
    assert_eq!(run("(< 2 1)"), "()");
    assert_eq!(run("(= 2 2)"), "t");
    assert_eq!(run("(= 2 3)"), "()");
}

#[test]
fn arithmetic_type_errors() {
    assert!(run_err("(+ 1 \"a\")").contains("+ takes only numbers"));
    assert!(run_err("(- t)").contains("- takes only numbers"));
    assert!(run_err("(< 1 \"a\")").contains("< takes only numbers"));
}

#[test]
fn rand_is_bounded() {
    let mut ip = new_interp();
    for _ in 0..20 {
        let s = run_in(&mut ip, "(rand 3)");
        let n: i64 = s.parse().unwrap();
        assert!((0..3).contains(&n));
    }
}

// =============================================================================
// if / do / while
// =============================================================================

#[test]
fn if_basic() {
    assert_eq!(run("(if t 1 2)"), "1");
    assert_eq!(run("(if () 1 2)"), "2");
    assert_eq!(run("(if t 1)"), "1");
    assert_eq!(run("(if () 1)"), "()");
}

#[test]
fn if_multiway() {
    // (if c1 t1 c2 t2 ... else?)
    assert_eq!(run("(if () 1 t 2 3)"), "2");
    assert_eq!(run("(if () 1 () 2)"), "()");
    assert_eq!(run("(if () 1 () 2 99)"), "99");
}

#[test]
fn if_truthiness_is_non_nil() {
    assert_eq!(run("(if 0 'yes 'no)"), "yes");
    assert_eq!(run("(if \"\" 'yes 'no)"), "yes");
}

#[test]
fn do_returns_last() {
    assert_eq!(run("(do 1 2 3)"), "3");
    assert_eq!(run("(do)"), "()");
}

#[test]
fn while_loops() {
    assert_eq!(run("(do (def i 0) (while (< i 5) (set i (+ i 1))) i)"), "5");
    assert_eq!(run("(while () 1)"), "()");
}

// =============================================================================
// Closures
// =============================================================================

#[test]
fn closures_capture_their_environment() {
    assert_eq!(run("((fn (x) (+ x 1)) 41)"), "42");
    assert_eq!(
        run("(do (def mk (fn (n) (fn () n))) (def f (mk 7)) (f))"),
        "7"
    );
}

#[test]
fn closure_counter_mutates_captured_binding() {
    let src = "
        (def make-counter
          (fn ()
            (do (def n 0)
                (fn () (do (set n (+ n 1)) n)))))
        (def c (make-counter))
        (c) (c) (c)";
    assert_eq!(run(src), "3");
}

#[test]
fn variadic_params_capture_all_args() {
    assert_eq!(run("((fn xs xs) 1 2 3)"), "(1 2 3)");
    assert_eq!(run("((fn xs xs))"), "()");
}

#[test]
fn dotted_rest_param() {
    assert_eq!(run("((fn (a . rest) (cons a rest)) 1 2 3)"), "(1 2 3)");
    assert_eq!(run("((fn (a . rest) rest) 1)"), "()");
}

#[test]
fn partial_application_produces_a_closure() {
    let src = "
        (def add3 (fn (a b c) (+ a b c)))
        (def g (add3 1))
        (g 2 3)";
    assert_eq!(run(src), "6");
    assert_eq!(run("(do (def add3 (fn (a b c) (+ a b c))) ((add3 1 2) 3))"), "6");
    assert_eq!(run("(do (def add2 (fn (a b) (+ a b))) (type (add2 1)))"), "fn");
}

#[test]
fn extra_args_are_ignored() {
    assert_eq!(run("((fn (a) a) 1 2 3)"), "1");
}

#[test]
fn recursion() {
    let src = "
        (defn * (a b) (if (= b 0) 0 (+ a (* a (- b 1)))))
        (defn fact (n) (if (< n 2) 1 (* n (fact (- n 1)))))
        (fact 5)";
    assert_eq!(run(src), "120");
}

#[test]
fn head_must_be_callable() {
    assert!(run_err("(1 2 3)").contains("head of a list must be a function"));
    assert!(run_err("(\"s\")").contains("head of a list must be a function"));
}

// =============================================================================
// def / def-global / set
// =============================================================================

#[test]
fn def_binds_in_the_innermost_environment() {
    let src = "
        (def f (fn () (do (def local 1) local)))
        (f)";
    assert_eq!(run(src), "1");
    let msg = run_err("(do (def f (fn () (def local 1))) (f) local)");
    assert!(msg.contains("undefined symbol: local"), "{}", msg);
}

#[test]
fn def_global_binds_at_the_top() {
    let src = "
        (def f (fn () (def-global seen 10)))
        (f)
        seen";
    assert_eq!(run(src), "10");
}

#[test]
fn set_mutates_nearest_binding() {
    assert_eq!(run("(do (def x 1) (set x 2) x)"), "2");
    let src = "
        (def x 1)
        (def f (fn () (set x 99)))
        (f)
        x";
    assert_eq!(run(src), "99");
}

#[test]
fn set_of_unbound_symbol_errors() {
    assert!(run_err("(set nope 1)").contains("Unbound variable: nope"));
}

#[test]
fn shadowing_resolves_innermost_first() {
    let src = "
        (def x 'outer)
        ((fn (x) x) 'inner)";
    assert_eq!(run(src), "inner");
    assert_eq!(run("(do (def x 'outer) ((fn (x) x) 'inner) x)"), "outer");
}

// =============================================================================
// eq?, type, apply, eval
// =============================================================================

#[test]
fn eq_semantics() {
    assert_eq!(run("(eq? 'a 'a)"), "t");
    assert_eq!(run("(eq? 'a 'b)"), "()");
    assert_eq!(run("(eq? 1 1)"), "t");
    assert_eq!(run("(eq? \"ab\" \"ab\")"), "t");
    assert_eq!(run("(eq? (list 1) (list 1))"), "()");
    assert_eq!(run("(do (def l (list 1)) (eq? l l))"), "t");
    assert_eq!(run("(eq? () ())"), "t");
}

#[test]
fn type_names() {
    assert_eq!(run("(type 1)"), "int");
    assert_eq!(run("(type \"s\")"), "str");
    assert_eq!(run("(type 'a)"), "sym");
    assert_eq!(run("(type ())"), "nil");
    assert_eq!(run("(type t)"), "true");
    assert_eq!(run("(type (list 1 2))"), "list");
    assert_eq!(run("(type (cons 1 2))"), "cons");
    assert_eq!(run("(type (fn () ()))"), "fn");
    assert_eq!(run("(type (macro (x) x))"), "macro");
    assert_eq!(run("(type car)"), "prim");
    assert_eq!(run("(type (obj () ()))"), "obj");
}

#[test]
fn apply_spreads_a_list() {
    assert_eq!(run("(apply + (list 1 2 3))"), "6");
    assert_eq!(run("(apply cons (list 1 2))"), "(1 . 2)");
    assert_eq!(run("(do (defn add (a b) (+ a b)) (apply add (list 20 22)))"), "42");
    assert!(run_err("(apply + 5)").contains("apply: 2nd argument is not a list"));
}

#[test]
fn eval_evaluates_a_form() {
    assert_eq!(run("(eval '(+ 1 2))"), "3");
    assert_eq!(run("(eval (read-sexp \"(+ 1 2) (+ 3 4)\"))"), "7");
}

// =============================================================================
// Lists and strings
// =============================================================================

#[test]
fn list_primitives() {
    assert_eq!(run("(do (def l (list 1 2 3)) (car (cdr l)))"), "2");
    assert_eq!(run("(cons 1 (cons 2 ()))"), "(1 2)");
    assert_eq!(run("(car (cons 1 2))"), "1");
    assert_eq!(run("(cdr (cons 1 2))"), "2");
    assert!(run_err("(car 5)").contains("car: not a cell"));
    assert!(run_err("(cdr \"s\")").contains("cdr: not a cell"));
}

#[test]
fn set_car_mutates() {
    assert_eq!(run("(do (def p (cons 1 2)) (set-car! p 9) (car p))"), "9");
}

#[test]
fn length_counts_cells_before_nil() {
    assert_eq!(run("(length (list 1 2 3))"), "3");
    assert_eq!(run("(length ())"), "0");
    assert_eq!(run("(length (cons 1 2))"), "-1");
    assert_eq!(run("(length 5)"), "-1");
}

#[test]
fn string_primitives() {
    assert_eq!(run("(str \"foo\" \"bar\")"), "\"foobar\"");
    assert_eq!(run("(str)"), "\"\"");
    assert_eq!(run("(str-len \"abc\")"), "3");
    assert!(run_err("(str \"a\" 1)").contains("str: argument not a string"));
}

#[test]
fn pr_str_prints() {
    assert_eq!(run("(pr-str (list 1 2))"), "\"(1 2)\"");
    assert_eq!(run("(pr-str \"x\")"), "\"\\\"x\\\"\"");
}

// =============================================================================
// Macros
// =============================================================================

#[test]
fn macros_receive_unevaluated_args() {
    let src = "
        (def firstform (macro (a b) a))
        (firstform (+ 1 2) (error \"never evaluated\"))";
    assert_eq!(run(src), "3");
}

#[test]
fn quasiquote_macro() {
    let src = "
        (def when (macro (c . body) `(if ,c (do ,@body) ())))
        (when t 1 2 3)";
    assert_eq!(run(src), "3");
    let src = "
        (def when (macro (c . body) `(if ,c (do ,@body) ())))
        (when () 1 2 3)";
    assert_eq!(run(src), "()");
}

#[test]
fn macro_expand_returns_the_form() {
    let src = "
        (def twice (macro (x) `(+ ,x ,x)))
        (macro-expand '(twice 3))";
    assert_eq!(run(src), "(+ 3 3)");
}

#[test]
fn macros_require_all_formals() {
    let src = "
        (def m (macro (a b) a))
        (m 1)";
    assert!(run_err(src).contains("number of argument does not match"));
}

#[test]
fn gensym_is_unique() {
    assert_eq!(run("(eq? (gensym) (gensym))"), "()");
    // Interning the same spelling does not produce the generated symbol.
    assert_eq!(run("(do (def g (gensym)) (eq? g (sym (pr-str g))))"), "()");
}

#[test]
fn defn_defines_functions() {
    assert_eq!(run("(do (defn add (a b) (+ a b)) (add 20 22))"), "42");
}

#[test]
fn prelude_helpers() {
    assert_eq!(run("(not ())"), "t");
    assert_eq!(run("(not 1)"), "()");
    assert_eq!(run("(second (list 1 2 3))"), "2");
    assert_eq!(run("(third (list 1 2 3))"), "3");
    assert_eq!(run("(append2 (list 1 2) (list 3))"), "(1 2 3)");
}

#[test]
fn expand_toplevel_rewrites_only_toplevel_def() {
    assert_eq!(run("(expand-toplevel '(def x 1))"), "(def-export x 1)");
    assert_eq!(run("(expand-toplevel '(def-global x 1))"), "(def-global x 1)");
    assert_eq!(run("(expand-toplevel '(do (def x 1)))"), "(do (def x 1))");
    assert_eq!(run("(expand-toplevel 'x)"), "x");
}

#[test]
fn def_export_binds_under_the_given_name() {
    assert_eq!(run("(do (def-export answer 42) answer)"), "42");
}

// =============================================================================
// read-sexp and sym
// =============================================================================

#[test]
fn read_sexp_wrapping() {
    assert_eq!(run("(read-sexp \"1\")"), "1");
    assert_eq!(run("(read-sexp \"1 2 3\")"), "(do 1 2 3)");
    assert_eq!(run("(read-sexp \"\")"), "()");
}

#[test]
fn sym_interns() {
    assert_eq!(run("(eq? (sym \"foo\") 'foo)"), "t");
}

// =============================================================================
// error / trap-error
// =============================================================================

#[test]
fn trap_error_catches_user_errors() {
    assert_eq!(run("(trap-error (fn () (error \"boom\")) (fn (m) m))"), "\"boom\"");
}

#[test]
fn trap_error_passes_through_values() {
    assert_eq!(run("(trap-error (fn () 42) (fn (m) m))"), "42");
}

#[test]
fn trap_error_catches_runtime_errors() {
    assert_eq!(
        run("(trap-error (fn () (car 5)) (fn (m) m))"),
        "\"car: not a cell\""
    );
    assert_eq!(
        run("(trap-error (fn () missing-var) (fn (m) 'caught))"),
        "caught"
    );
}

#[test]
fn trap_error_nests() {
    let src = "
        (trap-error
          (fn () (trap-error (fn () (error \"inner\")) (fn (m) (error (str m \"!\")))))
          (fn (m) m))";
    assert_eq!(run(src), "\"inner!\"");
}

#[test]
fn uncaught_error_propagates() {
    assert!(run_err("(error \"plain\")").contains("plain"));
}
