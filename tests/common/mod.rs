//! Shared helpers for the integration tests: a booted interpreter and
//! string-in/string-out evaluation, printing results with the interpreter's
//! own printer.

use shi::{printer, Interp};

pub const TEST_HEAP_SLOTS: usize = 1 << 16;

/// A booted interpreter with the default test heap.
pub fn new_interp() -> Interp {
    let mut ip = Interp::new(TEST_HEAP_SLOTS).expect("heap");
    ip.boot().expect("boot");
    ip
}

/// Evaluate source in a fresh interpreter and print the last value.
/// Panics on error.
pub fn run(src: &str) -> String {
    let mut ip = new_interp();
    run_in(&mut ip, src)
}

/// Evaluate source in an existing interpreter and print the last value.
pub fn run_in(ip: &mut Interp, src: &str) -> String {
    let mark = ip.roots.enter();
    let v = match ip.eval_source(src) {
        Ok(v) => v,
        Err(e) => panic!("eval failed: {}\n  source: {}", e, src),
    };
    let s = printer::pr_str(ip, v);
    ip.roots.leave(mark);
    s
}

/// Evaluate source in a fresh interpreter, expecting an error; returns its
/// message.
pub fn run_err(src: &str) -> String {
    let mut ip = new_interp();
    match ip.eval_source(src) {
        Ok(v) => panic!(
            "expected error, got {}\n  source: {}",
            printer::pr_str(&ip, v),
            src
        ),
        Err(e) => e.to_string(),
    }
}

/// Evaluate source with a collection forced before every allocation, the
/// equivalent of running under SHI_ALWAYS_GC.
#[allow(dead_code)]
pub fn run_always_gc(src: &str) -> String {
    let mut ip = new_interp();
    ip.heap.always_gc = true;
    run_in(&mut ip, src)
}
