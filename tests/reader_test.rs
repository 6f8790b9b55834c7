//! Reader integration tests: tokenization, desugaring, and syntax errors.
//! Most go through `read-sexp` so the checked value is the canonical form the
//! evaluator would see.

mod common;

use common::{run, run_err};

// =============================================================================
// Atoms
// =============================================================================

#[test]
fn integers() {
    assert_eq!(run("(read-sexp \"42\")"), "42");
    assert_eq!(run("(read-sexp \"-7\")"), "-7");
    assert_eq!(run("(read-sexp \"0\")"), "0");
}

#[test]
fn minus_alone_is_a_symbol() {
    assert_eq!(run("(type (read-sexp \"-\"))"), "sym");
}

#[test]
fn symbols_allow_the_punctuation_set() {
    assert_eq!(run("(type (read-sexp \"foo-bar?\"))"), "sym");
    assert_eq!(run("(type (read-sexp \"<=>\"))"), "sym");
    assert_eq!(run("(type (read-sexp \"with#hash\"))"), "sym");
}

#[test]
fn strings_and_escapes() {
    assert_eq!(run("(read-sexp \"\\\"hi\\\"\")"), "\"hi\"");
    assert_eq!(run("(str-len (read-sexp \"\\\"a\\\\nb\\\"\"))"), "3");
    assert_eq!(run("(str-len (read-sexp \"\\\"a\\\\tb\\\"\"))"), "3");
    assert_eq!(run("(str-len (read-sexp \"\\\"a\\\\\\\\b\\\"\"))"), "3");
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn atom_round_trips() {
    assert_eq!(run("(read-sexp (pr-str 42))"), "42");
    assert_eq!(run("(read-sexp (pr-str -42))"), "-42");
    assert_eq!(run("(eq? (read-sexp (pr-str 'foo)) 'foo)"), "t");
    assert_eq!(run("(eq? (read-sexp (pr-str \"a b\")) \"a b\")"), "t");
    assert_eq!(run("(eq? (read-sexp (pr-str \"tab\\there\")) \"tab\\there\")"), "t");
}

#[test]
fn list_round_trips() {
    assert_eq!(run("(pr-str (read-sexp \"(1 2 3)\"))"), "\"(1 2 3)\"");
    assert_eq!(run("(pr-str (read-sexp \"(1 . 2)\"))"), "\"(1 . 2)\"");
    assert_eq!(run("(pr-str (read-sexp \"(1 2 . 3)\"))"), "\"(1 2 . 3)\"");
    assert_eq!(run("(pr-str (read-sexp \"()\"))"), "\"()\"");
}

// =============================================================================
// Prefix desugaring
// =============================================================================

#[test]
fn quote_family_desugar() {
    assert_eq!(run("(pr-str (read-sexp \"'a\"))"), "\"(quote a)\"");
    assert_eq!(run("(pr-str (read-sexp \"`a\"))"), "\"(quasiquote a)\"");
    assert_eq!(run("(pr-str (read-sexp \",a\"))"), "\"(unquote a)\"");
    assert_eq!(run("(pr-str (read-sexp \",@a\"))"), "\"(unquote-splicing a)\"");
    assert_eq!(run("(pr-str (read-sexp \"@a\"))"), "\"(unbox a)\"");
}

#[test]
fn quote_nests() {
    assert_eq!(run("(pr-str (read-sexp \"''a\"))"), "\"(quote (quote a))\"");
    assert_eq!(run("(pr-str (read-sexp \"'(a b)\"))"), "\"(quote (a b))\"");
}

#[test]
fn colon_access_desugar() {
    assert_eq!(run("(pr-str (read-sexp \"o:k\"))"), "\"(: o (quote k))\"");
    // Only the first colon splits.
    assert_eq!(run("(pr-str (read-sexp \"a:b:c\"))"), "\"(: a (quote b:c))\"");
    // A leading or trailing colon stays a plain symbol.
    assert_eq!(run("(type (read-sexp \":foo\"))"), "sym");
    assert_eq!(run("(type (read-sexp \"foo:\"))"), "sym");
}

#[test]
fn alist_literal_desugar() {
    assert_eq!(
        run("(pr-str (read-sexp \"{a 1 b 2}\"))"),
        "\"(list (cons a 1) (cons b 2))\""
    );
    assert_eq!(run("(pr-str (read-sexp \"{}\"))"), "\"()\"");
    assert_eq!(run("(pr-str {'x 1})"), "\"((x . 1))\"");
}

// =============================================================================
// Comments and whitespace
// =============================================================================

#[test]
fn line_comments() {
    assert_eq!(run("(+ 1 ; comment\n 2)"), "3");
    assert_eq!(run("; leading\n42"), "42");
}

#[test]
fn shebang_only_at_input_start() {
    let mut ip = common::new_interp();
    assert_eq!(common::run_in(&mut ip, "#!/usr/bin/env shi\n(+ 1 2)"), "3");
    // Elsewhere '#' is an ordinary symbol character.
    assert_eq!(run("(do (def a# 5) a#)"), "5");
}

#[test]
fn multiple_expressions_sequence() {
    assert_eq!(run("(def x 1) (def y 2) (+ x y)"), "3");
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn unclosed_list() {
    assert!(run_err("(+ 1 2").contains("unclosed parenthesis"));
}

#[test]
fn stray_closers() {
    assert!(run_err(")").contains("stray close parenthesis"));
    assert!(run_err("}").contains("stray close curly bracket"));
    assert!(run_err("(a })").contains("stray close curly bracket"));
}

#[test]
fn stray_dot() {
    assert!(run_err(".").contains("stray dot"));
    assert!(run_err("( . 1)").contains("stray dot"));
    assert!(run_err("{1 . 2}").contains("stray dot in alist"));
}

#[test]
fn dotted_tail_shape() {
    assert!(run_err("(1 . )").contains("expected expression after dot"));
    assert!(run_err("(1 . 2 3)").contains("closed parenthesis expected after dot"));
}

#[test]
fn alist_odd_count() {
    assert!(run_err("{a 1 b}").contains("uneven number of elements"));
    assert!(run_err("{a 1").contains("unclosed curly brace"));
}

#[test]
fn unterminated_string() {
    assert!(run_err("\"abc").contains("unterminated string"));
}

#[test]
fn string_too_long() {
    let long = format!("\"{}\"", "x".repeat(1001));
    assert!(run_err(&long).contains("string too long"));
}

#[test]
fn symbol_too_long() {
    let long = "s".repeat(201);
    assert!(run_err(&long).contains("symbol name too long"));
}

#[test]
fn unknown_character() {
    assert!(run_err("[1]").contains("don't know how to handle"));
}

#[test]
fn read_sexp_rejects_sentinels() {
    assert!(run_err("(read-sexp \")\")").contains("stray close parenthesis"));
    assert!(run_err("(read-sexp \".\")").contains("stray dot"));
    assert!(run_err("(read-sexp \"}\")").contains("stray close curly bracket"));
}
