use crate::error::{Error, Result};
use crate::ev::Watchers;
use crate::heap::{Heap, PrimFn, PrimKind, Slot, OBJ_BUCKETS};
use crate::os::Term;
use crate::reader::Reader;
use crate::roots::{Handle, RootSet};
use crate::value::Value;
use crate::{ev, os, primitives};

/// Nesting limit of `trap-error` rescue frames.
pub const MAX_RESCUE_DEPTH: usize = 25;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const PRELUDE: &str = include_str!("prelude.shi");

/// Returns true if the environment variable is defined and not empty.
pub fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}

/// The Shi interpreter. All state lives here so the collector can find every
/// root: the heap, the root registry, the interned-symbol list, the global
/// environment, and the event-watcher table. There are no process-level
/// globals; several instances can coexist.
pub struct Interp {
    pub heap: Heap,
    pub roots: RootSet,
    /// The interned-symbol list: a proper list of symbols, scanned linearly by
    /// `intern` and forwarded first on every collection.
    pub symbols: Value,
    /// The global environment: the one object whose proto is nil.
    pub globals: Value,
    pub ev: Watchers,
    pub term: Term,
    pub(crate) rescue_depth: usize,
    pub(crate) gensym_counter: u64,
}

impl Interp {
    /// A fresh interpreter with an empty global environment. `SHI_DEBUG_GC`
    /// and `SHI_ALWAYS_GC` are consulted here; `boot` installs the language.
    pub fn new(capacity: usize) -> Result<Self> {
        let mut heap = Heap::new(capacity);
        heap.debug_gc = env_flag("SHI_DEBUG_GC");
        heap.always_gc = env_flag("SHI_ALWAYS_GC");

        let mut ip = Interp {
            heap,
            roots: RootSet::new(),
            symbols: Value::Nil,
            globals: Value::Nil,
            ev: Watchers::new(),
            term: Term::new(),
            rescue_depth: 0,
            gensym_counter: 0,
        };
        let g = ip.make_obj(Value::Nil)?;
        ip.globals = g;
        Ok(ip)
    }

    /// Install constants, primitives, and the prelude.
    pub fn boot(&mut self) -> Result<()> {
        self.set_global("t", Value::True)?;
        self.set_global("nil", Value::Nil)?;
        let version = self.make_str(VERSION)?;
        self.set_global("*system-version*", version)?;

        // Socket constants.
        self.set_global("PF_INET", Value::Int(libc::PF_INET as i64))?;
        self.set_global("SOCK_STREAM", Value::Int(libc::SOCK_STREAM as i64))?;

        // Watcher kind constants.
        for (name, n) in ev::KINDS {
            self.set_global(name, Value::Int(n))?;
        }

        primitives::install(self)?;
        os::install(self)?;
        ev::install(self)?;

        self.eval_source(PRELUDE)?;
        Ok(())
    }

    /// Bind `*args*` to a proper list of strings, one per argv entry.
    pub fn set_args(&mut self, args: &[String]) -> Result<()> {
        let fr = self.roots.enter();
        let acc = self.roots.save(Value::Nil);
        for a in args.iter().rev() {
            let s = self.make_str(a)?;
            let cell = self.cons(s, self.roots.get(acc))?;
            self.roots.set(acc, cell);
        }
        let list = self.roots.get(acc);
        self.set_global("*args*", list)?;
        self.roots.leave(fr);
        Ok(())
    }

    /// Bind a name in the global environment.
    pub fn set_global(&mut self, name: &str, v: Value) -> Result<()> {
        let fr = self.roots.enter();
        let vh = self.roots.save(v);
        let sym = self.intern(name)?;
        let g = self.globals;
        let v = self.roots.get(vh);
        self.obj_set(g, sym, v)?;
        self.roots.leave(fr);
        Ok(())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Make room for `n` slots, collecting if needed. In `SHI_ALWAYS_GC` mode
    /// a full collection runs before every allocation, which turns any handle
    /// the caller forgot into an immediately visible stale read.
    pub(crate) fn reserve(&mut self, n: usize) -> Result<()> {
        if self.heap.always_gc || self.heap.used() + n > self.heap.capacity() {
            self.collect();
        }
        if self.heap.used() + n > self.heap.capacity() {
            return Err(Heap::exhausted());
        }
        Ok(())
    }

    /// Run a full collection cycle over every root this interpreter owns.
    pub fn collect(&mut self) {
        let Interp { heap, roots, symbols, globals, ev, .. } = self;
        heap.collect(roots, symbols, globals, ev.watchers_mut());
    }

    // Constructors save their value arguments into root slots before
    // reserving, so the caller may pass values it just computed. Anything
    // *else* the caller retains across the call still needs its own handle.

    pub fn cons(&mut self, car: Value, cdr: Value) -> Result<Value> {
        let fr = self.roots.enter();
        let ch = self.roots.save(car);
        let dh = self.roots.save(cdr);
        self.reserve(1)?;
        let r = self.heap.push(Slot::Cell {
            car: self.roots.get(ch),
            cdr: self.roots.get(dh),
        });
        self.roots.leave(fr);
        Ok(Value::Cell(r))
    }

    pub fn make_str(&mut self, s: &str) -> Result<Value> {
        self.reserve(1)?;
        Ok(Value::Str(self.heap.push(Slot::Str(s.into()))))
    }

    /// A symbol that is *not* added to the interned list. Used by `intern`
    /// itself and by `gensym`.
    pub(crate) fn make_sym_uninterned(&mut self, name: &str) -> Result<Value> {
        self.reserve(1)?;
        Ok(Value::Sym(self.heap.push(Slot::Sym(name.into()))))
    }

    pub fn make_obj(&mut self, proto: Value) -> Result<Value> {
        let fr = self.roots.enter();
        let ph = self.roots.save(proto);
        self.reserve(1)?;
        let r = self.heap.push(Slot::Obj {
            proto: self.roots.get(ph),
            buckets: Box::new([Value::Nil; OBJ_BUCKETS]),
        });
        self.roots.leave(fr);
        Ok(Value::Obj(r))
    }

    pub fn make_fun(&mut self, params: Value, body: Value, env: Value) -> Result<Value> {
        let fr = self.roots.enter();
        let ph = self.roots.save(params);
        let bh = self.roots.save(body);
        let eh = self.roots.save(env);
        self.reserve(1)?;
        let r = self.heap.push(Slot::Fun {
            params: self.roots.get(ph),
            body: self.roots.get(bh),
            env: self.roots.get(eh),
        });
        self.roots.leave(fr);
        Ok(Value::Fun(r))
    }

    pub fn make_mac(&mut self, params: Value, body: Value, env: Value) -> Result<Value> {
        let fr = self.roots.enter();
        let ph = self.roots.save(params);
        let bh = self.roots.save(body);
        let eh = self.roots.save(env);
        self.reserve(1)?;
        let r = self.heap.push(Slot::Mac {
            params: self.roots.get(ph),
            body: self.roots.get(bh),
            env: self.roots.get(eh),
        });
        self.roots.leave(fr);
        Ok(Value::Mac(r))
    }

    pub(crate) fn make_prim(&mut self, f: PrimFn, kind: PrimKind) -> Result<Value> {
        self.reserve(1)?;
        Ok(Value::Prim(self.heap.push(Slot::Prim { f, kind })))
    }

    /// Register a primitive under `name` in the global environment.
    pub(crate) fn add_prim(&mut self, name: &str, kind: PrimKind, f: PrimFn) -> Result<()> {
        let fr = self.roots.enter();
        let p = self.make_prim(f, kind)?;
        let ph = self.roots.save(p);
        let sym = self.intern(name)?;
        let g = self.globals;
        let p = self.roots.get(ph);
        self.obj_set(g, sym, p)?;
        self.roots.leave(fr);
        Ok(())
    }

    // ========================================================================
    // List helpers
    // ========================================================================

    pub fn car(&self, v: Value) -> Result<Value> {
        match v {
            Value::Cell(r) => Ok(self.heap.cell(r).0),
            _ => Err(Error::Type("car: not a cell".into())),
        }
    }

    pub fn cdr(&self, v: Value) -> Result<Value> {
        match v {
            Value::Cell(r) => Ok(self.heap.cell(r).1),
            _ => Err(Error::Type("cdr: not a cell".into())),
        }
    }

    /// Number of cells before nil; −1 for improper lists.
    pub fn list_len(&self, v: Value) -> i64 {
        let mut len = 0;
        let mut cur = v;
        while let Value::Cell(r) = cur {
            len += 1;
            cur = self.heap.cell(r).1;
        }
        if cur.is_nil() {
            len
        } else {
            -1
        }
    }

    /// Destructively reverse a proper list. Never allocates.
    pub(crate) fn reverse_in_place(&mut self, list: Value) -> Value {
        let mut ret = Value::Nil;
        let mut p = list;
        while let Value::Cell(r) = p {
            let (_, next) = self.heap.cell(r);
            self.heap.set_cdr(r, ret);
            ret = Value::Cell(r);
            p = next;
        }
        ret
    }

    pub(crate) fn arity(&self, args: Value, n: i64, who: &str) -> Result<()> {
        if self.list_len(args) != n {
            return Err(Error::Arity(format!("{}: expected exactly {} args", who, n)));
        }
        Ok(())
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate the expression behind `expr` in the environment behind `env`.
    /// Both travel as root handles because evaluation allocates freely.
    pub fn eval(&mut self, env: Handle, expr: Handle) -> Result<Value> {
        match self.roots.get(expr) {
            // Self-evaluating values.
            v @ (Value::Nil
            | Value::True
            | Value::Int(_)
            | Value::Str(_)
            | Value::Obj(_)
            | Value::Prim(_)
            | Value::Fun(_)
            | Value::Mac(_)) => Ok(v),
            Value::Sym(r) => {
                if self.heap.sym_name(r) == "*env*" {
                    return Ok(self.roots.get(env));
                }
                let sym = Value::Sym(r);
                match self.env_get(self.roots.get(env), sym) {
                    Some(binding) => self.cdr(binding),
                    None => Err(Error::Unbound(format!(
                        "eval: undefined symbol: {}",
                        self.heap.sym_name(r)
                    ))),
                }
            }
            Value::Cell(_) => self.eval_form(env, expr),
        }
    }

    /// Apply-form: macro expansion, then function application.
    fn eval_form(&mut self, env: Handle, expr: Handle) -> Result<Value> {
        let fr = self.roots.enter();

        let expanded = self.macroexpand(env, expr)?;
        if expanded != self.roots.get(expr) {
            let eh = self.roots.save(expanded);
            let v = self.eval(env, eh)?;
            self.roots.leave(fr);
            return Ok(v);
        }

        let head = self.car(self.roots.get(expr))?;
        let hh = self.roots.save(head);
        let f = self.eval(env, hh)?;
        let fh = self.roots.save(f);
        let args = self.cdr(self.roots.get(expr))?;
        let ah = self.roots.save(args);

        let v = match self.roots.get(fh) {
            Value::Prim(_) | Value::Fun(_) => self.apply(env, fh, ah, true)?,
            _ => return Err(Error::Type("The head of a list must be a function".into())),
        };
        self.roots.leave(fr);
        Ok(v)
    }

    /// Expand `form` once if its head is a macro (either a symbol bound to a
    /// macro or a macro value itself). The expansion is the result of running
    /// the macro body on the unevaluated tail; re-evaluation of the result
    /// happens in the caller.
    pub fn macroexpand(&mut self, env: Handle, form: Handle) -> Result<Value> {
        let f = self.roots.get(form);
        let Value::Cell(c) = f else { return Ok(f) };
        let (head, tail) = self.heap.cell(c);
        let mac = match head {
            Value::Mac(_) => head,
            Value::Sym(_) => match self.env_get(self.roots.get(env), head) {
                Some(binding) => {
                    let v = self.cdr(binding)?;
                    if matches!(v, Value::Mac(_)) {
                        v
                    } else {
                        return Ok(f);
                    }
                }
                None => return Ok(f),
            },
            _ => return Ok(f),
        };
        let fr = self.roots.enter();
        let mh = self.roots.save(mac);
        let th = self.roots.save(tail);
        // Macros must receive all their formals.
        let v = self.apply_fun(mh, th, false)?;
        self.roots.leave(fr);
        Ok(v)
    }

    /// Apply a primitive or closure. `do_eval` selects whether the argument
    /// list still needs evaluation (it does not when coming through the
    /// `apply` primitive).
    pub fn apply(&mut self, env: Handle, f: Handle, args: Handle, do_eval: bool) -> Result<Value> {
        match self.roots.get(f) {
            Value::Prim(r) => {
                let (pf, kind) = self.heap.prim(r);
                match kind {
                    PrimKind::Form => pf(self, env, args),
                    PrimKind::Proc => {
                        if do_eval {
                            let fr = self.roots.enter();
                            let vals = self.eval_list(env, args)?;
                            let vh = self.roots.save(vals);
                            let v = pf(self, env, vh)?;
                            self.roots.leave(fr);
                            Ok(v)
                        } else {
                            pf(self, env, args)
                        }
                    }
                }
            }
            Value::Fun(_) => {
                if do_eval {
                    let fr = self.roots.enter();
                    let vals = self.eval_list(env, args)?;
                    let vh = self.roots.save(vals);
                    let v = self.apply_fun(f, vh, true)?;
                    self.roots.leave(fr);
                    Ok(v)
                } else {
                    self.apply_fun(f, args, true)
                }
            }
            _ => Err(Error::Type("apply: not supported".into())),
        }
    }

    /// Call a closure (or macro body) on an argument list that is taken as
    /// already evaluated. With `partial_ok`, missing trailing arguments
    /// produce a new closure over the remaining formals instead of an error.
    pub(crate) fn apply_fun(&mut self, f: Handle, args: Handle, partial_ok: bool) -> Result<Value> {
        let fr = self.roots.enter();
        let r = match self.roots.get(f) {
            Value::Fun(r) | Value::Mac(r) => r,
            _ => return Err(Error::Type("apply: not a function".into())),
        };
        let (params, body, fenv) = self.heap.fun_parts(r);
        let ph = self.roots.save(params);
        let bh = self.roots.save(body);
        let eh = self.roots.save(fenv);

        match self.push_env(eh, ph, args, partial_ok)? {
            crate::env::Binding::Env(e) => {
                let neh = self.roots.save(e);
                let v = self.progn(neh, bh)?;
                self.roots.leave(fr);
                Ok(v)
            }
            crate::env::Binding::Partial { rest, env } => {
                let rh = self.roots.save(rest);
                let peh = self.roots.save(env);
                let v = self.make_fun(
                    self.roots.get(rh),
                    self.roots.get(bh),
                    self.roots.get(peh),
                )?;
                self.roots.leave(fr);
                Ok(v)
            }
        }
    }

    /// Evaluate a sequence, returning the last value (nil when empty).
    pub(crate) fn progn(&mut self, env: Handle, body: Handle) -> Result<Value> {
        let fr = self.roots.enter();
        let cur = self.roots.save(self.roots.get(body));
        let last = self.roots.save(Value::Nil);
        while let Value::Cell(r) = self.roots.get(cur) {
            let (e, rest) = self.heap.cell(r);
            self.roots.set(cur, rest);
            let f2 = self.roots.enter();
            let eh = self.roots.save(e);
            let v = self.eval(env, eh)?;
            self.roots.set(last, v);
            self.roots.leave(f2);
        }
        let v = self.roots.get(last);
        self.roots.leave(fr);
        Ok(v)
    }

    /// Evaluate every element of a list, left to right, into a fresh list.
    pub(crate) fn eval_list(&mut self, env: Handle, list: Handle) -> Result<Value> {
        let fr = self.roots.enter();
        let cur = self.roots.save(self.roots.get(list));
        let acc = self.roots.save(Value::Nil);
        while let Value::Cell(r) = self.roots.get(cur) {
            let (e, rest) = self.heap.cell(r);
            self.roots.set(cur, rest);
            let f2 = self.roots.enter();
            let eh = self.roots.save(e);
            let v = self.eval(env, eh)?;
            let cell = self.cons(v, self.roots.get(acc))?;
            self.roots.set(acc, cell);
            self.roots.leave(f2);
        }
        let v = self.reverse_in_place(self.roots.get(acc));
        self.roots.leave(fr);
        Ok(v)
    }

    /// Read and evaluate a whole source text in the global environment,
    /// returning the last value. Parses one expression at a time so that
    /// not-yet-read text never holds heap references the collector cannot
    /// see.
    pub fn eval_source(&mut self, src: &str) -> Result<Value> {
        let mut rd = Reader::new(src);
        let fr = self.roots.enter();
        let genv = self.roots.save(self.globals);
        let last = self.roots.save(Value::Nil);
        while let Some(form) = rd.read(self)? {
            let f2 = self.roots.enter();
            let fh = self.roots.save(form);
            let v = self.eval(genv, fh)?;
            self.roots.set(last, v);
            self.roots.leave(f2);
        }
        let v = self.roots.get(last);
        self.roots.leave(fr);
        Ok(v)
    }

    /// Restore the terminal if `term-raw` left it raw. Safe to call twice.
    pub fn term_restore(&mut self) {
        self.term.restore();
    }
}
