use crate::error::Result;
use crate::eval::Interp;
use crate::value::Value;

/// Symbol interning. The table is the Lisp-side list held in
/// `Interp::symbols`: a linear scan is O(distinct symbols), which is fine
/// because lookups dominate at runtime and the list stays compact.
impl Interp {
    /// Return the symbol with this name, creating and prepending it to the
    /// symbol list if it does not exist yet. Two byte-equal names always
    /// yield the identical value.
    pub fn intern(&mut self, name: &str) -> Result<Value> {
        if let Some(s) = self.lookup_symbol(name) {
            return Ok(s);
        }
        let s = self.make_sym_uninterned(name)?;
        let tail = self.symbols;
        let cell = self.cons(s, tail)?;
        self.symbols = cell;
        // The symbol may have moved while the list cell was allocated; the
        // cell's car is the current address.
        self.car(cell)
    }

    /// Find an already-interned symbol without creating it. Never allocates,
    /// which makes it usable from the printer.
    pub fn lookup_symbol(&self, name: &str) -> Option<Value> {
        let mut cur = self.symbols;
        while let Value::Cell(r) = cur {
            let (car, cdr) = self.heap.cell(r);
            if let Value::Sym(sr) = car {
                if self.heap.sym_name(sr) == name {
                    return Some(car);
                }
            }
            cur = cdr;
        }
        None
    }

    /// A symbol guaranteed distinct from every interned or previously
    /// generated one. Deliberately not inserted into the symbol list, so not
    /// even a later `intern` of the same spelling can collide with it.
    pub fn gensym(&mut self) -> Result<Value> {
        let n = self.gensym_counter;
        self.gensym_counter += 1;
        self.make_sym_uninterned(&format!("G__{}", n))
    }

    /// Name of a symbol value, if it is one.
    pub fn sym_text(&self, v: Value) -> Option<&str> {
        match v {
            Value::Sym(r) => Some(self.heap.sym_name(r)),
            _ => None,
        }
    }
}
