use crate::error::{Error, Result};
use crate::eval::Interp;
use crate::heap::OBJ_BUCKETS;
use crate::value::{Ref, Value};

/// The prototype object model. An object is a fixed-width hash table of
/// association-list buckets plus a prototype link; the same representation
/// serves user records and lexical environment frames.
impl Interp {
    /// Keys must be a symbol, string, or integer.
    pub fn valid_key(&self, k: Value) -> bool {
        matches!(k, Value::Sym(_) | Value::Str(_) | Value::Int(_))
    }

    /// Jenkins one-at-a-time over the key's printable form, reduced to a
    /// bucket index. Symbols hash by name, strings by bytes, integers by
    /// their decimal form; stable for the run.
    pub fn obj_hash(&self, key: Value) -> Result<usize> {
        let h = match key {
            Value::Sym(r) => jenkins(self.heap.sym_name(r).as_bytes()),
            Value::Str(r) => jenkins(self.heap.str_text(r).as_bytes()),
            Value::Int(n) => jenkins(n.to_string().as_bytes()),
            _ => return Err(Error::Type("obj: key is not a sym, str, or int".into())),
        };
        Ok((h as usize) % OBJ_BUCKETS)
    }

    /// Key equality: symbols by identity, integers by value, strings by
    /// bytes.
    pub fn key_eq(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Sym(x), Value::Sym(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => self.heap.str_text(x) == self.heap.str_text(y),
            _ => false,
        }
    }

    fn bucket_scan(&self, obj: Ref, h: usize, k: Value) -> Option<Value> {
        let mut p = self.heap.obj_bucket(obj, h);
        while let Value::Cell(c) = p {
            let (entry, rest) = self.heap.cell(c);
            if let Value::Cell(e) = entry {
                let (ekey, _) = self.heap.cell(e);
                if self.key_eq(k, ekey) {
                    return Some(entry);
                }
            }
            p = rest;
        }
        None
    }

    /// The (key . value) entry for `k` in the receiver's own table, or None.
    /// Does not walk the prototype chain.
    pub fn obj_get_own(&self, obj: Value, k: Value) -> Result<Option<Value>> {
        let Value::Obj(r) = obj else {
            return Err(Error::Type("obj: not an object".into()));
        };
        let h = self.obj_hash(k)?;
        Ok(self.bucket_scan(r, h, k))
    }

    /// The entry for `k` in `obj` or the nearest prototype that has it.
    pub fn obj_find(&self, obj: Value, k: Value) -> Result<Option<Value>> {
        let h = self.obj_hash(k)?;
        let mut o = obj;
        while let Value::Obj(r) = o {
            if let Some(e) = self.bucket_scan(r, h, k) {
                return Ok(Some(e));
            }
            o = self.heap.obj_proto(r);
        }
        Ok(None)
    }

    /// Create or overwrite `k` in the receiver's own table. There is exactly
    /// one entry per key; writes never walk the prototype chain.
    pub fn obj_set(&mut self, obj: Value, k: Value, v: Value) -> Result<()> {
        let Value::Obj(_) = obj else {
            return Err(Error::Type("obj: not an object".into()));
        };
        let fr = self.roots.enter();
        let oh = self.roots.save(obj);
        let kh = self.roots.save(k);
        let vh = self.roots.save(v);

        let h = self.obj_hash(k)?;
        let Value::Obj(r) = obj else { unreachable!() };
        if let Some(entry) = self.bucket_scan(r, h, k) {
            // Found: overwrite in place.
            if let Value::Cell(e) = entry {
                self.heap.set_cdr(e, v);
            }
            self.roots.leave(fr);
            return Ok(());
        }

        // Not found: prepend a fresh (k . v) entry to the bucket.
        let pair = self.cons(self.roots.get(kh), self.roots.get(vh))?;
        let head = match self.roots.get(oh) {
            Value::Obj(r) => self.heap.obj_bucket(r, h),
            _ => unreachable!(),
        };
        let node = self.cons(pair, head)?;
        if let Value::Obj(r) = self.roots.get(oh) {
            self.heap.set_obj_bucket(r, h, node);
        }
        self.roots.leave(fr);
        Ok(())
    }

    /// Remove `k` from the receiver's own table only. Never allocates.
    pub fn obj_del(&mut self, obj: Value, k: Value) -> Result<()> {
        let Value::Obj(r) = obj else {
            return Err(Error::Type("obj: not an object".into()));
        };
        let h = self.obj_hash(k)?;
        let mut prev: Option<Ref> = None;
        let mut p = self.heap.obj_bucket(r, h);
        while let Value::Cell(c) = p {
            let (entry, rest) = self.heap.cell(c);
            let matches = match entry {
                Value::Cell(e) => self.key_eq(k, self.heap.cell(e).0),
                _ => false,
            };
            if matches {
                match prev {
                    Some(pc) => self.heap.set_cdr(pc, rest),
                    None => self.heap.set_obj_bucket(r, h, rest),
                }
            } else {
                prev = Some(c);
            }
            p = rest;
        }
        Ok(())
    }

    /// Fresh object populated from an alist of (key . value) pairs.
    pub fn make_obj_alist(&mut self, proto: Value, props: Value) -> Result<Value> {
        let fr = self.roots.enter();
        let ph = self.roots.save(proto);
        let prh = self.roots.save(props);
        let o = self.make_obj(self.roots.get(ph))?;
        let oh = self.roots.save(o);
        let cur = self.roots.save(self.roots.get(prh));
        while let Value::Cell(c) = self.roots.get(cur) {
            let (pair, rest) = self.heap.cell(c);
            self.roots.set(cur, rest);
            let Value::Cell(pc) = pair else {
                return Err(Error::Type("obj: given non alist as properties".into()));
            };
            let (k, v) = self.heap.cell(pc);
            self.obj_set(self.roots.get(oh), k, v)?;
        }
        let o = self.roots.get(oh);
        self.roots.leave(fr);
        Ok(o)
    }
}

/// http://en.wikipedia.org/wiki/Jenkins_hash_function
fn jenkins(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0;
    for &b in bytes {
        hash = hash.wrapping_add(b as u64);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash
}
