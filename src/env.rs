use crate::error::{Error, Result};
use crate::eval::Interp;
use crate::roots::Handle;
use crate::value::Value;

/// Outcome of binding formals to actuals: a populated environment frame, or a
/// partial application (the supplied prefix is bound, the remaining formals
/// become the parameter list of a new closure).
pub enum Binding {
    Env(Value),
    Partial { rest: Value, env: Value },
}

/// Lexical environments are plain objects: the prototype link is the
/// enclosing scope, bindings are properties keyed by symbol.
impl Interp {
    /// Bind directly on the innermost frame, creating or overwriting.
    pub fn env_set(&mut self, env: Value, sym: Value, val: Value) -> Result<()> {
        self.obj_set(env, sym, val)
    }

    /// Prototype-chain lookup. Returns the containing (sym . value) binding
    /// cell, which `set` mutates in place.
    pub fn env_get(&self, env: Value, sym: Value) -> Option<Value> {
        self.obj_find(env, sym).ok().flatten()
    }

    /// The topmost environment: the one whose proto is nil.
    pub fn global_env_of(&self, env: Value) -> Value {
        let mut e = env;
        while let Value::Obj(r) = e {
            let p = self.heap.obj_proto(r);
            if p.is_nil() {
                break;
            }
            e = p;
        }
        e
    }

    /// New frame chained to `proto`, populated from the formal/actual
    /// pairing:
    ///
    /// - a lone symbol captures the whole value list (variadic),
    /// - a list of symbols binds pairwise; a dotted symbol tail captures the
    ///   remaining values,
    /// - values running out before the formals do is an arity error, unless
    ///   `partial_ok` turns the leftover formals into a partial application.
    ///
    /// Extra values beyond the formals are ignored.
    pub(crate) fn push_env(
        &mut self,
        proto: Handle,
        params: Handle,
        vals: Handle,
        partial_ok: bool,
    ) -> Result<Binding> {
        let fr = self.roots.enter();
        let e = self.make_obj(self.roots.get(proto))?;
        let eh = self.roots.save(e);
        let pc = self.roots.save(self.roots.get(params));
        let vc = self.roots.save(self.roots.get(vals));

        loop {
            match self.roots.get(pc) {
                // Lone symbol (variadic) or dotted rest: capture the
                // remaining values wholesale.
                Value::Sym(_) => {
                    let p = self.roots.get(pc);
                    let v = self.roots.get(vc);
                    self.obj_set(self.roots.get(eh), p, v)?;
                    break;
                }
                Value::Nil => break,
                Value::Cell(cr) => {
                    let (psym, prest) = self.heap.cell(cr);
                    if !psym.is_sym() {
                        return Err(Error::Type(
                            "fn|macro: arg list must contain only symbols".into(),
                        ));
                    }
                    match self.roots.get(vc) {
                        Value::Cell(vr) => {
                            let (vval, vrest) = self.heap.cell(vr);
                            self.roots.set(pc, prest);
                            self.roots.set(vc, vrest);
                            self.obj_set(self.roots.get(eh), psym, vval)?;
                        }
                        Value::Nil if partial_ok => {
                            let rest = self.roots.get(pc);
                            let env = self.roots.get(eh);
                            self.roots.leave(fr);
                            return Ok(Binding::Partial { rest, env });
                        }
                        _ => {
                            return Err(Error::Arity(
                                "Cannot apply function: number of argument does not match".into(),
                            ));
                        }
                    }
                }
                _ => {
                    return Err(Error::Type(
                        "fn|macro: arg list must contain only symbols".into(),
                    ));
                }
            }
        }

        let env = self.roots.get(eh);
        self.roots.leave(fr);
        Ok(Binding::Env(env))
    }
}
