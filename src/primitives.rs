use rand::Rng;

use crate::error::{Error, Result};
use crate::eval::{Interp, MAX_RESCUE_DEPTH};
use crate::heap::{PrimKind, OBJ_BUCKETS};
use crate::printer;
use crate::reader::Reader;
use crate::roots::Handle;
use crate::value::Value;

/// Install the language primitives. Special forms (`PrimKind::Form`) receive
/// their argument list unevaluated; procedures (`PrimKind::Proc`) receive it
/// evaluated left to right.
pub fn install(ip: &mut Interp) -> Result<()> {
    use PrimKind::{Form, Proc};

    // Lists
    ip.add_prim("cons", Proc, prim_cons)?;
    ip.add_prim("car", Proc, prim_car)?;
    ip.add_prim("cdr", Proc, prim_cdr)?;
    ip.add_prim("set-car!", Proc, prim_set_car)?;
    ip.add_prim("length", Proc, prim_length)?;

    // Strings
    ip.add_prim("str", Proc, prim_str)?;
    ip.add_prim("str-len", Proc, prim_str_len)?;

    // Language
    ip.add_prim("def", Form, prim_def)?;
    ip.add_prim("def-global", Form, prim_def_global)?;
    ip.add_prim("set", Form, prim_set)?;
    ip.add_prim("fn", Form, prim_fn)?;
    ip.add_prim("if", Form, prim_if)?;
    ip.add_prim("do", Form, prim_do)?;
    ip.add_prim("while", Form, prim_while)?;
    ip.add_prim("eq?", Proc, prim_eq)?;
    ip.add_prim("apply", Proc, prim_apply)?;
    ip.add_prim("type", Proc, prim_type)?;
    ip.add_prim("eval", Proc, prim_eval)?;
    ip.add_prim("read-sexp", Proc, prim_read_sexp)?;
    ip.add_prim("sym", Proc, prim_sym)?;

    // Macro
    ip.add_prim("quote", Form, prim_quote)?;
    ip.add_prim("gensym", Proc, prim_gensym)?;
    ip.add_prim("macro", Form, prim_macro)?;
    ip.add_prim("macro-expand", Proc, prim_macro_expand)?;

    // Object
    ip.add_prim("obj", Proc, prim_obj)?;
    ip.add_prim("obj-get", Proc, prim_obj_get)?;
    ip.add_prim("obj-set", Proc, prim_obj_set)?;
    ip.add_prim("obj-del", Proc, prim_obj_del)?;
    ip.add_prim("obj-proto", Proc, prim_obj_proto)?;
    ip.add_prim("obj-proto-set!", Proc, prim_obj_proto_set)?;
    ip.add_prim("obj->alist", Proc, prim_obj_to_alist)?;
    ip.add_prim(":", Proc, prim_obj_access)?;

    // Math
    ip.add_prim("+", Proc, prim_plus)?;
    ip.add_prim("-", Proc, prim_minus)?;
    ip.add_prim("<", Proc, prim_lt)?;
    ip.add_prim("=", Proc, prim_num_eq)?;
    ip.add_prim("rand", Proc, prim_rand)?;

    // Error
    ip.add_prim("error", Proc, prim_error)?;
    ip.add_prim("trap-error", Proc, prim_trap_error)?;

    ip.add_prim("pr-str", Proc, prim_pr_str)?;
    Ok(())
}

// ============================================================================
// Language
// ============================================================================

/// (quote expr)
fn prim_quote(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    if ip.list_len(a) != 1 {
        return Err(Error::Arity("Malformed quote".into()));
    }
    ip.car(a)
}

/// (if c1 t1 c2 t2 … else?) — tests each condition in turn; a lone trailing
/// expression is the else arm.
fn prim_if(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    if ip.list_len(ip.roots.get(args)) < 2 {
        return Err(Error::Arity("Malformed if".into()));
    }
    let fr = ip.roots.enter();
    let cur = ip.roots.save(ip.roots.get(args));
    loop {
        let a = ip.roots.get(cur);
        let Value::Cell(c) = a else {
            ip.roots.leave(fr);
            return Ok(Value::Nil);
        };
        let (test, rest) = ip.heap.cell(c);
        if !rest.is_cell() {
            // Odd final arm: the else expression.
            let th = ip.roots.save(test);
            let v = ip.eval(env, th)?;
            ip.roots.leave(fr);
            return Ok(v);
        }
        let f2 = ip.roots.enter();
        let th = ip.roots.save(test);
        let condv = ip.eval(env, th)?;
        ip.roots.leave(f2);
        let rest = ip.cdr(ip.roots.get(cur))?;
        if condv.is_truthy() {
            let then = ip.car(rest)?;
            let th = ip.roots.save(then);
            let v = ip.eval(env, th)?;
            ip.roots.leave(fr);
            return Ok(v);
        }
        ip.roots.set(cur, ip.cdr(rest)?);
    }
}

/// (do body …)
fn prim_do(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    ip.progn(env, args)
}

/// (while cond expr …)
fn prim_while(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    if ip.list_len(a) < 2 {
        return Err(Error::Arity("Malformed while".into()));
    }
    let fr = ip.roots.enter();
    let ch = ip.roots.save(ip.car(a)?);
    let bh = ip.roots.save(ip.cdr(a)?);
    loop {
        let f2 = ip.roots.enter();
        let th = ip.roots.save(ip.roots.get(ch));
        let condv = ip.eval(env, th)?;
        ip.roots.leave(f2);
        if !condv.is_truthy() {
            break;
        }
        let f2 = ip.roots.enter();
        let cur = ip.roots.save(ip.roots.get(bh));
        while let Value::Cell(r) = ip.roots.get(cur) {
            let (e, rest) = ip.heap.cell(r);
            ip.roots.set(cur, rest);
            let f3 = ip.roots.enter();
            let eh = ip.roots.save(e);
            ip.eval(env, eh)?;
            ip.roots.leave(f3);
        }
        ip.roots.leave(f2);
    }
    ip.roots.leave(fr);
    Ok(Value::Nil)
}

/// (fn params body …) and (macro params body …) share their shape checks.
fn handle_function(ip: &mut Interp, env: Handle, args: Handle, is_mac: bool) -> Result<Value> {
    let a = ip.roots.get(args);
    let Value::Cell(c) = a else {
        return Err(Error::Type("Malformed fn or macro".into()));
    };
    let (params, body) = ip.heap.cell(c);
    if !(params.is_list() || params.is_sym()) || !body.is_cell() {
        return Err(Error::Type("Malformed fn or macro".into()));
    }
    // (arg0 arg1), (arg0 . rest), or a lone symbol.
    if !params.is_sym() {
        let mut p = params;
        while let Value::Cell(r) = p {
            let (s, rest) = ip.heap.cell(r);
            if !s.is_sym() {
                return Err(Error::Type("fn|macro: arg list must contain only symbols".into()));
            }
            p = rest;
        }
        if !p.is_nil() && !p.is_sym() {
            return Err(Error::Type("fn|macro: arg list must contain only symbols".into()));
        }
    }
    let e = ip.roots.get(env);
    if is_mac {
        ip.make_mac(params, body, e)
    } else {
        ip.make_fun(params, body, e)
    }
}

/// (fn (<symbol> …) expr …)
fn prim_fn(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    handle_function(ip, env, args, false)
}

/// (macro (<symbol> …) expr …)
fn prim_macro(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    handle_function(ip, env, args, true)
}

/// (def <symbol> expr) — binds in the innermost environment.
fn prim_def(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    if ip.list_len(a) != 2 || !ip.car(a)?.is_sym() {
        return Err(Error::Arity("Malformed def".into()));
    }
    let fr = ip.roots.enter();
    let sh = ip.roots.save(ip.car(a)?);
    let eh = ip.roots.save(ip.car(ip.cdr(a)?)?);
    let v = ip.eval(env, eh)?;
    let vh = ip.roots.save(v);
    let e = ip.roots.get(env);
    let s = ip.roots.get(sh);
    ip.env_set(e, s, ip.roots.get(vh))?;
    let v = ip.roots.get(vh);
    ip.roots.leave(fr);
    Ok(v)
}

/// (def-global <symbol> expr) — binds in the topmost environment.
fn prim_def_global(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    if ip.list_len(a) != 2 || !ip.car(a)?.is_sym() {
        return Err(Error::Arity("Malformed def-global".into()));
    }
    let fr = ip.roots.enter();
    let sh = ip.roots.save(ip.car(a)?);
    let eh = ip.roots.save(ip.car(ip.cdr(a)?)?);
    let v = ip.eval(env, eh)?;
    let vh = ip.roots.save(v);
    let top = ip.global_env_of(ip.roots.get(env));
    let s = ip.roots.get(sh);
    ip.env_set(top, s, ip.roots.get(vh))?;
    let v = ip.roots.get(vh);
    ip.roots.leave(fr);
    Ok(v)
}

/// (set <symbol> expr) mutates the nearest enclosing binding;
/// (set (: obj key) expr) mutates an object property.
fn prim_set(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    if ip.list_len(a) != 2 {
        return Err(Error::Arity("Malformed set".into()));
    }
    let place = ip.car(a)?;

    // (set (: obj key) val), as the reader expands obj:key.
    let is_access = place.is_cell()
        && ip.list_len(place) == 3
        && ip
            .sym_text(ip.car(place)?)
            .map(|s| s.starts_with(':'))
            .unwrap_or(false);
    if is_access {
        let fr = ip.roots.enter();
        let oe = ip.roots.save(ip.car(ip.cdr(place)?)?);
        let ke = ip.roots.save(ip.car(ip.cdr(ip.cdr(place)?)?)?);
        let ve = ip.roots.save(ip.car(ip.cdr(a)?)?);

        let o = ip.eval(env, oe)?;
        let oh = ip.roots.save(o);
        let k = ip.eval(env, ke)?;
        let kh = ip.roots.save(k);
        let v = ip.eval(env, ve)?;
        let vh = ip.roots.save(v);

        let o = ip.roots.get(oh);
        if !o.is_obj() {
            return Err(Error::Type("set: (:) 1st arg is not an object".into()));
        }
        let k = ip.roots.get(kh);
        if !ip.valid_key(k) {
            return Err(Error::Type("set: (:) 2nd arg is not a valid object key".into()));
        }
        ip.obj_set(o, k, ip.roots.get(vh))?;
        let o = ip.roots.get(oh);
        ip.roots.leave(fr);
        return Ok(o);
    }

    if !place.is_sym() {
        return Err(Error::Type("Malformed set".into()));
    }
    let Some(binding) = ip.env_get(ip.roots.get(env), place) else {
        let name = ip.sym_text(place).unwrap_or("?").to_string();
        return Err(Error::Unbound(format!("Unbound variable: {}", name)));
    };
    let fr = ip.roots.enter();
    let bh = ip.roots.save(binding);
    let eh = ip.roots.save(ip.car(ip.cdr(a)?)?);
    let v = ip.eval(env, eh)?;
    if let Value::Cell(r) = ip.roots.get(bh) {
        ip.heap.set_cdr(r, v);
    }
    ip.roots.leave(fr);
    Ok(v)
}

/// (eq? a b) — identity, except integers by value and strings by bytes.
fn prim_eq(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "eq?")?;
    let x = ip.car(a)?;
    let y = ip.car(ip.cdr(a)?)?;
    if ip.key_eq(x, y) || x == y {
        Ok(Value::True)
    } else {
        Ok(Value::Nil)
    }
}

/// (type expr) — the type name as a symbol. Cells report "cons" for dotted
/// pairs and "list" otherwise.
fn prim_type(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "type")?;
    let v = ip.car(a)?;
    let name = match v {
        Value::True => "true",
        Value::Nil => "nil",
        Value::Int(_) => "int",
        Value::Str(_) => "str",
        Value::Sym(_) => "sym",
        Value::Obj(_) => "obj",
        Value::Prim(_) => "prim",
        Value::Fun(_) => "fn",
        Value::Mac(_) => "macro",
        Value::Cell(r) => {
            let (_, cdr) = ip.heap.cell(r);
            if !cdr.is_nil() && !cdr.is_cell() {
                "cons"
            } else {
                "list"
            }
        }
    };
    ip.intern(name)
}

/// (apply fn args)
fn prim_apply(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "apply")?;
    let f = ip.car(a)?;
    let l = ip.car(ip.cdr(a)?)?;
    if !l.is_list() {
        return Err(Error::Type("apply: 2nd argument is not a list".into()));
    }
    let fr = ip.roots.enter();
    let fh = ip.roots.save(f);
    let lh = ip.roots.save(l);
    let v = ip.apply(env, fh, lh, false)?;
    ip.roots.leave(fr);
    Ok(v)
}

/// (eval expr) — the argument arrives evaluated; evaluating it once more
/// takes the produced form to its value.
fn prim_eval(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "eval")?;
    let fr = ip.roots.enter();
    let eh = ip.roots.save(ip.car(a)?);
    let v = ip.eval(env, eh)?;
    ip.roots.leave(fr);
    Ok(v)
}

/// (read-sexp str) — one expression returns itself; several wrap in (do …);
/// none is nil.
fn prim_read_sexp(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "read-sexp")?;
    let text = match ip.car(a)? {
        Value::Str(r) => ip.heap.str_text(r).to_string(),
        _ => return Err(Error::Type("read-sexp: 1st arg is not a string".into())),
    };
    let mut rd = Reader::new(&text);
    let fr = ip.roots.enter();
    let acc = ip.roots.save(Value::Nil);
    while let Some(v) = rd.read(ip)? {
        let cell = ip.cons(v, ip.roots.get(acc))?;
        ip.roots.set(acc, cell);
    }
    let n = ip.list_len(ip.roots.get(acc));
    let v = if n == 0 {
        Value::Nil
    } else if n == 1 {
        ip.car(ip.roots.get(acc))?
    } else {
        let l = ip.reverse_in_place(ip.roots.get(acc));
        let lh = ip.roots.save(l);
        let do_sym = ip.intern("do")?;
        ip.cons(do_sym, ip.roots.get(lh))?
    };
    ip.roots.leave(fr);
    Ok(v)
}

/// (sym str) — intern a string as a symbol.
fn prim_sym(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "sym")?;
    let name = match ip.car(a)? {
        Value::Str(r) => ip.heap.str_text(r).to_string(),
        _ => return Err(Error::Type("sym: 1st arg is not a string".into())),
    };
    ip.intern(&name)
}

/// (macro-expand form) — expand the (already evaluated) form once.
fn prim_macro_expand(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "macro-expand")?;
    let fr = ip.roots.enter();
    let fh = ip.roots.save(ip.car(a)?);
    let v = ip.macroexpand(env, fh)?;
    ip.roots.leave(fr);
    Ok(v)
}

/// (gensym)
fn prim_gensym(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    ip.arity(ip.roots.get(args), 0, "gensym")?;
    ip.gensym()
}

// ============================================================================
// Object
// ============================================================================

/// (obj proto props) — proto is an object or nil, props an alist of
/// (symbol . value) pairs.
fn prim_obj(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "obj")?;
    let proto = ip.car(a)?;
    if !proto.is_obj() && !proto.is_nil() {
        return Err(Error::Type("obj: given non object or nil as prototype".into()));
    }
    let props = ip.car(ip.cdr(a)?)?;
    if !props.is_list() {
        return Err(Error::Type("obj: given non alist as properties".into()));
    }
    let mut p = props;
    while let Value::Cell(r) = p {
        let (pair, rest) = ip.heap.cell(r);
        let Value::Cell(pr) = pair else {
            return Err(Error::Type("obj: given non alist as properties".into()));
        };
        if !ip.heap.cell(pr).0.is_sym() {
            return Err(Error::Type("obj: given non symbol as property key".into()));
        }
        p = rest;
    }
    ip.make_obj_alist(proto, props)
}

/// (obj-get o k) — own-table lookup only; the `:` operator walks prototypes.
fn prim_obj_get(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "obj-get")?;
    let o = ip.car(a)?;
    if !o.is_obj() {
        return Err(Error::Type("obj-get: expected 1st argument to be object".into()));
    }
    let k = ip.car(ip.cdr(a)?)?;
    if !ip.valid_key(k) {
        return Err(Error::Type("obj-get: expected 2nd argument to be valid object key".into()));
    }
    match ip.obj_get_own(o, k)? {
        Some(entry) => ip.cdr(entry),
        None => Err(Error::Unbound(format!(
            "obj-get: unbound key: {}",
            printer::pr_str(ip, k)
        ))),
    }
}

/// (obj-set o k v) — returns the object.
fn prim_obj_set(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 3, "obj-set")?;
    let o = ip.car(a)?;
    if !o.is_obj() {
        return Err(Error::Type("obj-set: expected 1st argument to be object".into()));
    }
    let k = ip.car(ip.cdr(a)?)?;
    if !ip.valid_key(k) {
        return Err(Error::Type("obj-set: expected 2nd argument to be valid object key".into()));
    }
    let v = ip.car(ip.cdr(ip.cdr(a)?)?)?;
    let fr = ip.roots.enter();
    let oh = ip.roots.save(o);
    ip.obj_set(o, k, v)?;
    let o = ip.roots.get(oh);
    ip.roots.leave(fr);
    Ok(o)
}

/// (obj-del o k) — removes from the receiver's own table only.
fn prim_obj_del(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "obj-del")?;
    let o = ip.car(a)?;
    if !o.is_obj() {
        return Err(Error::Type("obj-del: expected 1st argument to be object".into()));
    }
    let k = ip.car(ip.cdr(a)?)?;
    if !ip.valid_key(k) {
        return Err(Error::Type("obj-del: expected 2nd argument to be valid object key".into()));
    }
    ip.obj_del(o, k)?;
    Ok(o)
}

/// (obj-proto o)
fn prim_obj_proto(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "obj-proto")?;
    match ip.car(a)? {
        Value::Obj(r) => Ok(ip.heap.obj_proto(r)),
        _ => Err(Error::Type("obj-proto: expected 1st argument to be object".into())),
    }
}

/// (obj-proto-set! o proto)
fn prim_obj_proto_set(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "obj-proto-set!")?;
    let o = ip.car(a)?;
    let Value::Obj(r) = o else {
        return Err(Error::Type("obj-proto-set!: expected 1st argument to be object".into()));
    };
    let proto = ip.car(ip.cdr(a)?)?;
    if !proto.is_obj() && !proto.is_nil() {
        return Err(Error::Type("obj-proto-set!: prototype must be an object or nil".into()));
    }
    ip.heap.set_obj_proto(r, proto);
    Ok(o)
}

/// (obj->alist o) — the live (key . value) entries of the object's own table.
fn prim_obj_to_alist(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "obj->alist")?;
    let o = ip.car(a)?;
    if !o.is_obj() {
        return Err(Error::Type("obj->alist: expected 1st argument to be object".into()));
    }
    let fr = ip.roots.enter();
    let oh = ip.roots.save(o);
    let acc = ip.roots.save(Value::Nil);
    for i in 0..OBJ_BUCKETS {
        let f2 = ip.roots.enter();
        let bucket = match ip.roots.get(oh) {
            Value::Obj(r) => ip.heap.obj_bucket(r, i),
            _ => unreachable!(),
        };
        let cur = ip.roots.save(bucket);
        while let Value::Cell(r) = ip.roots.get(cur) {
            let (entry, rest) = ip.heap.cell(r);
            ip.roots.set(cur, rest);
            let node = ip.cons(entry, ip.roots.get(acc))?;
            ip.roots.set(acc, node);
        }
        ip.roots.leave(f2);
    }
    let v = ip.roots.get(acc);
    ip.roots.leave(fr);
    Ok(v)
}

/// (: o k) — prototype-walking property access, the target of the reader's
/// `obj:key` expansion.
fn prim_obj_access(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, ":")?;
    let o = ip.car(a)?;
    if !o.is_obj() {
        return Err(Error::Type(":: expected 1st argument to be object".into()));
    }
    let k = ip.car(ip.cdr(a)?)?;
    if !ip.valid_key(k) {
        return Err(Error::Type(":: expected 2nd argument to be valid object key".into()));
    }
    match ip.obj_find(o, k)? {
        Some(entry) => ip.cdr(entry),
        None => Err(Error::Unbound(format!(
            ":: unbound property: {}",
            printer::pr_str(ip, k)
        ))),
    }
}

// ============================================================================
// Lists
// ============================================================================

/// (cons a d)
fn prim_cons(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "cons")?;
    let x = ip.car(a)?;
    let y = ip.car(ip.cdr(a)?)?;
    ip.cons(x, y)
}

/// (car cell)
fn prim_car(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "car")?;
    ip.car(ip.car(a)?)
}

/// (cdr cell)
fn prim_cdr(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "cdr")?;
    ip.cdr(ip.car(a)?)
}

/// (set-car! cell v) — returns the mutated cell.
fn prim_set_car(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "set-car!")?;
    let cell = ip.car(a)?;
    let Value::Cell(r) = cell else {
        return Err(Error::Type("set-car!: 1st arg is not a cell".into()));
    };
    let v = ip.car(ip.cdr(a)?)?;
    ip.heap.set_car(r, v);
    Ok(cell)
}

/// (length l) — cells before nil, −1 for improper lists.
fn prim_length(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "length")?;
    Ok(Value::Int(ip.list_len(ip.car(a)?)))
}

// ============================================================================
// Strings
// ============================================================================

/// (str s0 s1 …) — concatenation; all arguments must be strings.
fn prim_str(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let mut out = String::new();
    let mut p = ip.roots.get(args);
    while let Value::Cell(r) = p {
        let (v, rest) = ip.heap.cell(r);
        match v {
            Value::Str(s) => out.push_str(ip.heap.str_text(s)),
            _ => return Err(Error::Type("str: argument not a string".into())),
        }
        p = rest;
    }
    ip.make_str(&out)
}

/// (str-len s) — byte length.
fn prim_str_len(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "str-len")?;
    match ip.car(a)? {
        Value::Str(r) => Ok(Value::Int(ip.heap.str_text(r).len() as i64)),
        _ => Err(Error::Type("str-len: 1st arg is not a string".into())),
    }
}

/// (pr-str v)
fn prim_pr_str(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "pr-str")?;
    let s = printer::pr_str(ip, ip.car(a)?);
    ip.make_str(&s)
}

// ============================================================================
// Math
// ============================================================================

/// (+ n …) — zero arguments sum to 0.
fn prim_plus(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let mut sum: i64 = 0;
    let mut p = ip.roots.get(args);
    while let Value::Cell(r) = p {
        let (v, rest) = ip.heap.cell(r);
        match v {
            Value::Int(n) => sum = sum.wrapping_add(n),
            _ => return Err(Error::Type("+ takes only numbers".into())),
        }
        p = rest;
    }
    Ok(Value::Int(sum))
}

/// (- n …) — one argument negates.
fn prim_minus(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    if ip.list_len(a) < 1 {
        return Err(Error::Arity("Malformed -".into()));
    }
    let mut p = a;
    while let Value::Cell(r) = p {
        let (v, rest) = ip.heap.cell(r);
        if !v.is_int() {
            return Err(Error::Type("- takes only numbers".into()));
        }
        p = rest;
    }
    let first = ip.car(a)?.as_int().unwrap_or(0);
    let rest = ip.cdr(a)?;
    if rest.is_nil() {
        return Ok(Value::Int(first.wrapping_neg()));
    }
    let mut acc = first;
    let mut p = rest;
    while let Value::Cell(r) = p {
        let (v, next) = ip.heap.cell(r);
        acc = acc.wrapping_sub(v.as_int().unwrap_or(0));
        p = next;
    }
    Ok(Value::Int(acc))
}

/// (< a b)
fn prim_lt(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "<")?;
    let x = ip.car(a)?;
    let y = ip.car(ip.cdr(a)?)?;
    match (x, y) {
        (Value::Int(x), Value::Int(y)) => Ok(if x < y { Value::True } else { Value::Nil }),
        _ => Err(Error::Type("< takes only numbers".into())),
    }
}

/// (= a b)
fn prim_num_eq(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "=")?;
    let x = ip.car(a)?;
    let y = ip.car(ip.cdr(a)?)?;
    match (x, y) {
        (Value::Int(x), Value::Int(y)) => Ok(if x == y { Value::True } else { Value::Nil }),
        _ => Err(Error::Type("= only takes numbers".into())),
    }
}

/// (rand n) — a uniform integer in [0, n).
fn prim_rand(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "rand")?;
    match ip.car(a)? {
        Value::Int(n) if n > 0 => {
            let mut rng = rand::thread_rng();
            Ok(Value::Int(rng.gen_range(0..n)))
        }
        _ => Err(Error::Type("rand: 1st arg is not a positive int".into())),
    }
}

// ============================================================================
// Error
// ============================================================================

/// (error message)
fn prim_error(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "error")?;
    match ip.car(a)? {
        Value::Str(r) => Err(Error::User(ip.heap.str_text(r).to_string())),
        _ => Err(Error::Type("error: 1st arg is not a string".into())),
    }
}

/// (trap-error thunk handler) — runs (thunk); a non-fatal error unwinds here
/// and becomes (handler message). Rescue depth is bounded; exceeding it is
/// fatal.
fn prim_trap_error(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "trap-error")?;
    let f = ip.car(a)?;
    let h = ip.car(ip.cdr(a)?)?;
    if !matches!(f, Value::Fun(_)) || !matches!(h, Value::Fun(_)) {
        return Err(Error::Type("trap-error: both args must be functions".into()));
    }
    if ip.rescue_depth >= MAX_RESCUE_DEPTH {
        return Err(Error::Fatal(
            "Max error depth reached. Check for nested `trap-error` calls.".into(),
        ));
    }
    let fr = ip.roots.enter();
    let fh = ip.roots.save(f);
    let hh = ip.roots.save(h);
    let nil_args = ip.roots.save(Value::Nil);
    // The rescue point: on error, the registry unwinds to this watermark,
    // releasing everything the failed subexpression rooted.
    let rescue = ip.roots.enter();

    ip.rescue_depth += 1;
    let r = ip.apply_fun(fh, nil_args, true);
    ip.rescue_depth -= 1;

    match r {
        Ok(v) => {
            ip.roots.leave(fr);
            Ok(v)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            ip.roots.leave(rescue);
            let msg = ip.make_str(e.message())?;
            let mh = ip.roots.save(msg);
            let argl = ip.cons(ip.roots.get(mh), Value::Nil)?;
            let ah = ip.roots.save(argl);
            let v = ip.apply_fun(hh, ah, true)?;
            ip.roots.leave(fr);
            Ok(v)
        }
    }
}
