use crate::error::{Error, Result};
use crate::eval::Interp;
use crate::value::Value;

pub const SYMBOL_MAX_LEN: usize = 200;
pub const STRING_MAX_LEN: usize = 1000;

const SYMBOL_CHARS: &[u8] = b"~!#$%^&*-_=+:/?<>";

fn symbol_start_char(c: u8) -> bool {
    c.is_ascii_alphabetic() || SYMBOL_CHARS.contains(&c)
}

fn symbol_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || SYMBOL_CHARS.contains(&c)
}

/// One lexical item. The close-delimiter and dot sentinels exist only between
/// `read_form` and its list/alist callers; the public entry point rejects
/// them as syntax errors, so they can never escape the reader.
enum Form {
    Val(Value),
    Close,
    CloseCurly,
    Dot,
}

/// Parses Shi source text into heap values, desugaring the quote family, `@`,
/// `{…}` alist literals, and `obj:key` access as it reads. One expression per
/// `read` call; repeated calls walk the same input to EOF.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str) -> Self {
        Reader { input: input.as_bytes(), pos: 0 }
    }

    /// Read one expression. Returns None at end of input.
    pub fn read(&mut self, ip: &mut Interp) -> Result<Option<Value>> {
        match self.read_form(ip)? {
            None => Ok(None),
            Some(Form::Val(v)) => Ok(Some(v)),
            Some(Form::Close) => Err(Error::Read("stray close parenthesis".into())),
            Some(Form::CloseCurly) => Err(Error::Read("stray close curly bracket".into())),
            Some(Form::Dot) => Err(Error::Read("stray dot".into())),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.next() {
            if c == b'\n' {
                return;
            }
            if c == b'\r' {
                if self.peek() == Some(b'\n') {
                    self.next();
                }
                return;
            }
        }
    }

    fn read_form(&mut self, ip: &mut Interp) -> Result<Option<Form>> {
        loop {
            let c = match self.next() {
                Some(c) => c,
                None => return Ok(None),
            };
            match c {
                b' ' | b'\t' | b'\n' | b'\r' => continue,
                b';' => {
                    self.skip_line();
                    continue;
                }
                // Shebang: '#' is a comment only at the very first character
                // of the input; everywhere else it is a symbol character.
                b'#' if self.pos == 1 => {
                    self.skip_line();
                    continue;
                }
                b'(' => return Ok(Some(Form::Val(self.read_list(ip)?))),
                b')' => return Ok(Some(Form::Close)),
                b'{' => return Ok(Some(Form::Val(self.read_alist(ip)?))),
                b'}' => return Ok(Some(Form::CloseCurly)),
                b'.' => return Ok(Some(Form::Dot)),
                b'@' => return Ok(Some(Form::Val(self.read_prefix(ip, "unbox")?))),
                b'\'' => return Ok(Some(Form::Val(self.read_prefix(ip, "quote")?))),
                b'`' => return Ok(Some(Form::Val(self.read_prefix(ip, "quasiquote")?))),
                b',' => {
                    let name = if self.peek() == Some(b'@') {
                        self.next();
                        "unquote-splicing"
                    } else {
                        "unquote"
                    };
                    return Ok(Some(Form::Val(self.read_prefix(ip, name)?)));
                }
                b'"' => return Ok(Some(Form::Val(self.read_string(ip)?))),
                b'0'..=b'9' => {
                    return Ok(Some(Form::Val(Value::Int(self.read_number((c - b'0') as i64)))));
                }
                b'-' if self.peek().map(|d| d.is_ascii_digit()).unwrap_or(false) => {
                    return Ok(Some(Form::Val(Value::Int(-self.read_number(0)))));
                }
                c if symbol_start_char(c) => {
                    return Ok(Some(Form::Val(self.read_symbol(ip, c)?)));
                }
                c => {
                    return Err(Error::Read(format!(
                        "don't know how to handle {}",
                        c as char
                    )));
                }
            }
        }
    }

    /// Reads a list; the '(' has already been consumed. `.` marks a dotted
    /// tail.
    fn read_list(&mut self, ip: &mut Interp) -> Result<Value> {
        let fr = ip.roots.enter();
        let head = ip.roots.save(Value::Nil);
        loop {
            match self.read_form(ip)? {
                None => return Err(Error::Read("unclosed parenthesis".into())),
                Some(Form::Close) => {
                    let l = ip.reverse_in_place(ip.roots.get(head));
                    ip.roots.leave(fr);
                    return Ok(l);
                }
                Some(Form::Dot) => {
                    if ip.roots.get(head).is_nil() {
                        return Err(Error::Read("stray dot".into()));
                    }
                    let tail = match self.read_form(ip)? {
                        Some(Form::Val(v)) => v,
                        _ => return Err(Error::Read("expected expression after dot".into())),
                    };
                    let th = ip.roots.save(tail);
                    match self.read_form(ip)? {
                        Some(Form::Close) => {}
                        _ => {
                            return Err(Error::Read(
                                "closed parenthesis expected after dot".into(),
                            ));
                        }
                    }
                    let l = ip.reverse_in_place(ip.roots.get(head));
                    // Splice the tail onto the last cell.
                    let mut last = l;
                    while let Value::Cell(r) = last {
                        let (_, d) = ip.heap.cell(r);
                        if !d.is_cell() {
                            ip.heap.set_cdr(r, ip.roots.get(th));
                            break;
                        }
                        last = d;
                    }
                    ip.roots.leave(fr);
                    return Ok(l);
                }
                Some(Form::CloseCurly) => {
                    return Err(Error::Read("stray close curly bracket".into()));
                }
                Some(Form::Val(v)) => {
                    let cell = ip.cons(v, ip.roots.get(head))?;
                    ip.roots.set(head, cell);
                }
            }
        }
    }

    /// Reads an alist literal; the '{' has already been consumed.
    /// `{k1 v1 k2 v2}` desugars to `(list (cons k1 v1) (cons k2 v2))`; the
    /// element count must be even.
    fn read_alist(&mut self, ip: &mut Interp) -> Result<Value> {
        let fr = ip.roots.enter();
        let head = ip.roots.save(Value::Nil);
        loop {
            match self.read_form(ip)? {
                None => return Err(Error::Read("unclosed curly brace".into())),
                Some(Form::Dot) => return Err(Error::Read("stray dot in alist".into())),
                Some(Form::Close) => {
                    return Err(Error::Read("stray close parenthesis in alist".into()));
                }
                Some(Form::CloseCurly) => {
                    let n = ip.list_len(ip.roots.get(head));
                    if n % 2 != 0 {
                        return Err(Error::Read(
                            "alist contains an uneven number of elements".into(),
                        ));
                    }
                    if n == 0 {
                        ip.roots.leave(fr);
                        return Ok(Value::Nil);
                    }
                    // The elements sit reversed, so pairs pop value-first;
                    // consing the built (cons k v) forms restores source
                    // order.
                    let acc = ip.roots.save(Value::Nil);
                    let cur = ip.roots.save(ip.roots.get(head));
                    while let Value::Cell(r) = ip.roots.get(cur) {
                        let (v, rest) = ip.heap.cell(r);
                        let (k, rest2) = match rest {
                            Value::Cell(r2) => ip.heap.cell(r2),
                            _ => unreachable!("alist element count checked even"),
                        };
                        ip.roots.set(cur, rest2);
                        let f2 = ip.roots.enter();
                        let kh = ip.roots.save(k);
                        let vh = ip.roots.save(v);
                        let cons_sym = ip.intern("cons")?;
                        let ch = ip.roots.save(cons_sym);
                        let t = ip.cons(ip.roots.get(vh), Value::Nil)?;
                        let t = ip.cons(ip.roots.get(kh), t)?;
                        let t = ip.cons(ip.roots.get(ch), t)?;
                        let node = ip.cons(t, ip.roots.get(acc))?;
                        ip.roots.set(acc, node);
                        ip.roots.leave(f2);
                    }
                    let list_sym = ip.intern("list")?;
                    let l = ip.cons(list_sym, ip.roots.get(acc))?;
                    ip.roots.leave(fr);
                    return Ok(l);
                }
                Some(Form::Val(v)) => {
                    let cell = ip.cons(v, ip.roots.get(head))?;
                    ip.roots.set(head, cell);
                }
            }
        }
    }

    /// `'x` → (quote x), `` `x `` → (quasiquote x), `,x` → (unquote x),
    /// `,@x` → (unquote-splicing x), `@x` → (unbox x).
    fn read_prefix(&mut self, ip: &mut Interp, name: &str) -> Result<Value> {
        let fr = ip.roots.enter();
        let sym = ip.intern(name)?;
        let sh = ip.roots.save(sym);
        let inner = match self.read_form(ip)? {
            Some(Form::Val(v)) => v,
            _ => {
                return Err(Error::Read(format!("expected expression after {}", name)));
            }
        };
        let t = ip.cons(inner, Value::Nil)?;
        let t = ip.cons(ip.roots.get(sh), t)?;
        ip.roots.leave(fr);
        Ok(t)
    }

    /// Reads a string literal; the opening '"' has already been consumed.
    /// Escapes: \n \r \t \" \\; anything else keeps the escaped character.
    fn read_string(&mut self, ip: &mut Interp) -> Result<Value> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let c = match self.next() {
                Some(c) => c,
                None => return Err(Error::Read("unterminated string".into())),
            };
            match c {
                b'"' => break,
                b'\\' => {
                    let esc = match self.next() {
                        Some(e) => e,
                        None => return Err(Error::Read("unterminated string".into())),
                    };
                    buf.push(match esc {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => other,
                    });
                }
                c => buf.push(c),
            }
            if buf.len() > STRING_MAX_LEN {
                return Err(Error::Read("string too long".into()));
            }
        }
        let text = String::from_utf8_lossy(&buf);
        ip.make_str(&text)
    }

    fn read_number(&mut self, mut val: i64) -> i64 {
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            self.next();
            val = val.wrapping_mul(10).wrapping_add((c - b'0') as i64);
        }
        val
    }

    /// Reads a symbol; the first character has already been consumed. The
    /// first ':' with a non-empty name on both sides splits the token into
    /// object access: `obj:prop` → `(: obj (quote prop))`.
    fn read_symbol(&mut self, ip: &mut Interp, first: u8) -> Result<Value> {
        let start = self.pos - 1;
        debug_assert_eq!(self.input[start], first);
        while let Some(c) = self.peek() {
            if !symbol_char(c) {
                break;
            }
            if self.pos - start >= SYMBOL_MAX_LEN {
                return Err(Error::Read("symbol name too long".into()));
            }
            self.next();
        }
        let word = std::str::from_utf8(&self.input[start..self.pos])
            .expect("symbol characters are ASCII");

        if let Some(i) = word.find(':') {
            if i > 0 && i + 1 < word.len() {
                return self.expand_access(ip, &word[..i], &word[i + 1..]);
            }
        }
        ip.intern(word)
    }

    /// `obj:key` → `(: obj (quote key))`.
    fn expand_access(&mut self, ip: &mut Interp, obj: &str, prop: &str) -> Result<Value> {
        let fr = ip.roots.enter();
        let colon = ip.intern(":")?;
        let ch = ip.roots.save(colon);
        let quote = ip.intern("quote")?;
        let qh = ip.roots.save(quote);
        let osym = ip.intern(obj)?;
        let oh = ip.roots.save(osym);
        let psym = ip.intern(prop)?;
        let ph = ip.roots.save(psym);

        let t = ip.cons(ip.roots.get(ph), Value::Nil)?;
        let quoted = ip.cons(ip.roots.get(qh), t)?;
        let t = ip.cons(quoted, Value::Nil)?;
        let t = ip.cons(ip.roots.get(oh), t)?;
        let t = ip.cons(ip.roots.get(ch), t)?;
        ip.roots.leave(fr);
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer;

    fn interp() -> Interp {
        Interp::new(4096).expect("heap")
    }

    fn read_all(ip: &mut Interp, src: &str) -> Vec<String> {
        let mut rd = Reader::new(src);
        let mut out = Vec::new();
        while let Some(v) = rd.read(ip).expect("read") {
            out.push(printer::pr_str(ip, v));
        }
        out
    }

    #[test]
    fn reads_successive_expressions() {
        let mut ip = interp();
        assert_eq!(read_all(&mut ip, "1 two \"three\""), ["1", "two", "\"three\""]);
        assert_eq!(read_all(&mut ip, "  ; only a comment\n"), Vec::<String>::new());
    }

    #[test]
    fn interned_symbols_are_shared() {
        let mut ip = interp();
        let mut rd = Reader::new("foo foo");
        let a = rd.read(&mut ip).unwrap().unwrap();
        let b = rd.read(&mut ip).unwrap().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sentinels_do_not_escape() {
        let mut ip = interp();
        for src in [")", "}", "."] {
            let err = Reader::new(src).read(&mut ip).unwrap_err();
            assert!(err.to_string().contains("stray"), "{}", err);
        }
    }

    #[test]
    fn dotted_pairs_parse() {
        let mut ip = interp();
        assert_eq!(read_all(&mut ip, "(a b . c)"), ["(a b . c)"]);
        assert_eq!(read_all(&mut ip, "(a . (b . ()))"), ["(a b)"]);
    }
}
