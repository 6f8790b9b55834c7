//! Object model integration tests: property law, prototype chains, key
//! kinds, and the `:` access operator.

mod common;

use common::{run, run_err};

// =============================================================================
// Property law
// =============================================================================

#[test]
fn set_then_get() {
    let src = "
        (def o (obj nil (list (cons 'x 1))))
        (obj-set o 'x 42)
        (obj-get o 'x)";
    assert_eq!(run(src), "42");
}

#[test]
fn get_of_missing_key_is_unbound() {
    let msg = run_err("(obj-get (obj () ()) 'x)");
    assert!(msg.contains("obj-get: unbound key: x"), "{}", msg);
}

#[test]
fn del_removes_only_own_entry() {
    let src = "
        (def o (obj () {'x 1 'y 2}))
        (obj-del o 'x)
        (obj-get o 'y)";
    assert_eq!(run(src), "2");
    let src = "
        (def o (obj () {'x 1}))
        (obj-del o 'x)
        (obj-get o 'x)";
    assert!(run_err(src).contains("unbound key"));
}

#[test]
fn del_accepts_every_valid_key_kind() {
    let src = "
        (def o (obj () ()))
        (obj-set o 'a 1)
        (obj-set o \"b\" 2)
        (obj-set o 3 4)
        (obj-del o 'a)
        (obj-del o \"b\")
        (obj-del o 3)
        (length (obj->alist o))";
    assert_eq!(run(src), "0");
    assert!(run_err("(obj-del (obj () ()) (list 1))").contains("valid object key"));
}

#[test]
fn one_entry_per_key() {
    let src = "
        (def o (obj () ()))
        (obj-set o 'k 1)
        (obj-set o 'k 2)
        (obj-set o 'k 3)
        (length (obj->alist o))";
    assert_eq!(run(src), "1");
}

// =============================================================================
// Key kinds and hashing
// =============================================================================

#[test]
fn string_and_integer_keys() {
    let src = "
        (def o (obj () ()))
        (obj-set o \"name\" \"shi\")
        (obj-set o 7 'seven)
        (cons (obj-get o \"name\") (obj-get o 7))";
    assert_eq!(run(src), "(\"shi\" . seven)");
}

#[test]
fn string_keys_compare_by_bytes() {
    let src = "
        (def o (obj () ()))
        (obj-set o (str \"na\" \"me\") 1)
        (obj-get o \"name\")";
    assert_eq!(run(src), "1");
}

#[test]
fn invalid_keys_are_rejected() {
    assert!(run_err("(obj-set (obj () ()) (list 1) 2)").contains("valid object key"));
    assert!(run_err("(obj-get (obj () ()) (fn () ()))").contains("valid object key"));
}

#[test]
fn more_keys_than_buckets() {
    // 100 integer keys force every bucket to chain.
    let src = "
        (def o (obj () ()))
        (def i 0)
        (while (< i 100) (obj-set o i i) (set i (+ i 1)))
        (cons (obj-get o 57) (length (obj->alist o)))";
    assert_eq!(run(src), "(57 . 100)");
}

// =============================================================================
// Prototype chain
// =============================================================================

#[test]
fn find_walks_the_chain_get_does_not() {
    let src = "
        (def base (obj () {'x 1}))
        (def o (obj base ()))
        o:x";
    assert_eq!(run(src), "1");
    let src = "
        (def base (obj () {'x 1}))
        (def o (obj base ()))
        (obj-get o 'x)";
    assert!(run_err(src).contains("unbound key"));
}

#[test]
fn own_entry_shadows_prototype() {
    let src = "
        (def base (obj () {'x 1}))
        (def o (obj base {'x 2}))
        (cons o:x base:x)";
    assert_eq!(run(src), "(2 . 1)");
}

#[test]
fn set_writes_to_the_receiver_not_the_prototype() {
    let src = "
        (def base (obj () {'x 1}))
        (def o (obj base ()))
        (obj-set o 'x 99)
        (cons o:x base:x)";
    assert_eq!(run(src), "(99 . 1)");
}

#[test]
fn obj_proto_accessors() {
    let src = "
        (def base (obj () ()))
        (def o (obj base ()))
        (eq? (obj-proto o) base)";
    assert_eq!(run(src), "t");
    assert_eq!(run("(obj-proto (obj () ()))"), "()");
    let src = "
        (def a (obj () {'x 'from-a}))
        (def o (obj () ()))
        (obj-proto-set! o a)
        o:x";
    assert_eq!(run(src), "from-a");
    assert!(run_err("(obj-proto-set! (obj () ()) 5)").contains("prototype must be an object or nil"));
}

#[test]
fn colon_access_errors_on_missing_property() {
    assert!(run_err("(: (obj () ()) 'missing)").contains("unbound property"));
}

// =============================================================================
// set sugar
// =============================================================================

#[test]
fn set_on_access_form_mutates_property() {
    let src = "
        (def o (obj () ()))
        (set o:k 5)
        o:k";
    assert_eq!(run(src), "5");
}

#[test]
fn set_on_access_form_requires_an_object() {
    assert!(run_err("(do (def x 1) (set x:k 5))").contains("1st arg is not an object"));
}

// =============================================================================
// obj->alist and printing
// =============================================================================

#[test]
fn obj_to_alist_lists_own_entries() {
    assert_eq!(run("(obj->alist (obj () ()))"), "()");
    let src = "
        (def base (obj () {'hidden 1}))
        (def o (obj base {'x 1}))
        (length (obj->alist o))";
    assert_eq!(run(src), "1");
}

#[test]
fn objects_print_their_name_property() {
    let src = "(pr-str (obj () {'*object-name* \"point\"}))";
    assert_eq!(run(src), "\"<object point>\"");
    assert_eq!(run("(pr-str (obj () ()))"), "\"<object nil>\"");
    // The name is found through the prototype chain.
    let src = "
        (def base (obj () {'*object-name* \"widget\"}))
        (pr-str (obj base ()))";
    assert_eq!(run(src), "\"<object widget>\"");
}

#[test]
fn obj_constructor_validates() {
    assert!(run_err("(obj 5 ())").contains("non object or nil as prototype"));
    assert!(run_err("(obj () 5)").contains("non alist as properties"));
    assert!(run_err("(obj () (list 1))").contains("non alist as properties"));
    assert!(run_err("(obj () (list (cons 1 2)))").contains("non symbol as property key"));
}
