use crate::eval::Interp;
use crate::value::Value;

const MAX_DEPTH: usize = 1000;

/// Print a value to a string. Atoms round-trip through the reader; compound
/// values print structurally, with a dotted tail where the list is improper.
pub fn pr_str(ip: &Interp, v: Value) -> String {
    let mut out = String::new();
    print_inner(ip, v, &mut out, 0);
    out
}

fn print_inner(ip: &Interp, v: Value, out: &mut String, depth: usize) {
    if depth > MAX_DEPTH {
        out.push_str("...");
        return;
    }
    match v {
        Value::Nil => out.push_str("()"),
        Value::True => out.push('t'),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Sym(r) => out.push_str(ip.heap.sym_name(r)),
        Value::Str(r) => print_string(ip.heap.str_text(r), out),
        Value::Prim(_) => out.push_str("<primitive>"),
        Value::Fun(_) => out.push_str("<function>"),
        Value::Mac(_) => out.push_str("<macro>"),
        Value::Obj(_) => print_obj(ip, v, out),
        Value::Cell(r) => {
            out.push('(');
            let (mut car, mut cdr) = ip.heap.cell(r);
            loop {
                print_inner(ip, car, out, depth + 1);
                match cdr {
                    Value::Nil => break,
                    Value::Cell(r2) => {
                        out.push(' ');
                        let (a, d) = ip.heap.cell(r2);
                        car = a;
                        cdr = d;
                    }
                    other => {
                        out.push_str(" . ");
                        print_inner(ip, other, out, depth + 1);
                        break;
                    }
                }
            }
            out.push(')');
        }
    }
}

fn print_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Objects display their `*object-name*` property when they carry one
/// (directly or through the prototype chain).
fn print_obj(ip: &Interp, obj: Value, out: &mut String) {
    let name = ip
        .lookup_symbol("*object-name*")
        .and_then(|k| ip.obj_find(obj, k).ok().flatten())
        .and_then(|entry| {
            let r = entry.heap_ref()?;
            match ip.heap.cell(r).1 {
                Value::Str(s) => Some(ip.heap.str_text(s).to_string()),
                _ => None,
            }
        });
    match name {
        Some(n) => out.push_str(&format!("<object {}>", n)),
        None => out.push_str("<object nil>"),
    }
}
