use log::info;

use crate::error::{Error, Result};
use crate::ev::Watcher;
use crate::eval::Interp;
use crate::roots::{Handle, RootSet};
use crate::value::{Ref, Value};

/// Bucket count of every object's property table.
pub const OBJ_BUCKETS: usize = 32;

/// Rust entry point of a primitive. Receives the current environment and the
/// argument list through root handles; whether the arguments arrive evaluated
/// is decided by the primitive's [`PrimKind`].
pub type PrimFn = fn(&mut Interp, Handle, Handle) -> Result<Value>;

/// Special forms receive their argument list raw; procedures receive it
/// already evaluated, left to right.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PrimKind {
    Form,
    Proc,
}

/// One allocated object. The variant is the type tag; `Moved` is the
/// forwarding tombstone that exists only while a collection is running and
/// must never be observed by anything but `forward`.
pub enum Slot {
    Str(Box<str>),
    Sym(Box<str>),
    Cell { car: Value, cdr: Value },
    Obj { proto: Value, buckets: Box<[Value; OBJ_BUCKETS]> },
    Prim { f: PrimFn, kind: PrimKind },
    Fun { params: Value, body: Value, env: Value },
    Mac { params: Value, body: Value, env: Value },
    Moved(Ref),
}

/// The semispace heap. The dormant space is not materialized while the mutator
/// runs; a collection takes the active space as from-space and copies live
/// slots into a fresh to-space of the same capacity.
pub struct Heap {
    space: Vec<Slot>,
    capacity: usize,
    /// Force a full collection before every allocation (SHI_ALWAYS_GC).
    pub always_gc: bool,
    /// Log per-cycle statistics (SHI_DEBUG_GC).
    pub debug_gc: bool,
    gc_running: bool,
    cycles: u64,
}

impl Heap {
    pub fn new(capacity: usize) -> Self {
        Heap {
            space: Vec::with_capacity(capacity.min(1 << 16)),
            capacity,
            always_gc: false,
            debug_gc: false,
            gc_running: false,
            cycles: 0,
        }
    }

    pub fn used(&self) -> usize {
        self.space.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Append a slot. The caller must have reserved space (and thereby given
    /// the collector a chance to run) beforehand; pushing itself never
    /// collects, which is what makes the constructor pattern in `eval.rs`
    /// safe.
    pub fn push(&mut self, slot: Slot) -> Ref {
        debug_assert!(!self.gc_running);
        debug_assert!(self.space.len() < self.capacity);
        let r = Ref(self.space.len() as u32);
        self.space.push(slot);
        r
    }

    #[inline]
    fn slot(&self, r: Ref) -> &Slot {
        &self.space[r.0 as usize]
    }

    // === typed accessors ===

    /// Car and cdr of a cell.
    #[inline]
    pub fn cell(&self, r: Ref) -> (Value, Value) {
        match self.slot(r) {
            Slot::Cell { car, cdr } => (*car, *cdr),
            _ => unreachable!("cell ref does not address a cell"),
        }
    }

    pub fn set_car(&mut self, r: Ref, v: Value) {
        match &mut self.space[r.0 as usize] {
            Slot::Cell { car, .. } => *car = v,
            _ => unreachable!("cell ref does not address a cell"),
        }
    }

    pub fn set_cdr(&mut self, r: Ref, v: Value) {
        match &mut self.space[r.0 as usize] {
            Slot::Cell { cdr, .. } => *cdr = v,
            _ => unreachable!("cell ref does not address a cell"),
        }
    }

    pub fn str_text(&self, r: Ref) -> &str {
        match self.slot(r) {
            Slot::Str(s) => s,
            _ => unreachable!("str ref does not address a string"),
        }
    }

    pub fn sym_name(&self, r: Ref) -> &str {
        match self.slot(r) {
            Slot::Sym(s) => s,
            _ => unreachable!("sym ref does not address a symbol"),
        }
    }

    pub fn obj_proto(&self, r: Ref) -> Value {
        match self.slot(r) {
            Slot::Obj { proto, .. } => *proto,
            _ => unreachable!("obj ref does not address an object"),
        }
    }

    pub fn set_obj_proto(&mut self, r: Ref, v: Value) {
        match &mut self.space[r.0 as usize] {
            Slot::Obj { proto, .. } => *proto = v,
            _ => unreachable!("obj ref does not address an object"),
        }
    }

    pub fn obj_bucket(&self, r: Ref, i: usize) -> Value {
        match self.slot(r) {
            Slot::Obj { buckets, .. } => buckets[i],
            _ => unreachable!("obj ref does not address an object"),
        }
    }

    pub fn set_obj_bucket(&mut self, r: Ref, i: usize, v: Value) {
        match &mut self.space[r.0 as usize] {
            Slot::Obj { buckets, .. } => buckets[i] = v,
            _ => unreachable!("obj ref does not address an object"),
        }
    }

    pub fn prim(&self, r: Ref) -> (PrimFn, PrimKind) {
        match self.slot(r) {
            Slot::Prim { f, kind } => (*f, *kind),
            _ => unreachable!("prim ref does not address a primitive"),
        }
    }

    /// Params, body and captured environment of a closure or macro.
    pub fn fun_parts(&self, r: Ref) -> (Value, Value, Value) {
        match self.slot(r) {
            Slot::Fun { params, body, env } | Slot::Mac { params, body, env } => {
                (*params, *body, *env)
            }
            _ => unreachable!("fun ref does not address a function"),
        }
    }

    // === collection ===

    /// Cheney copying collection. Forwards the symbol list first, then every
    /// slot of the root registry, the global environment, and the values
    /// retained by event watchers; then runs the scan-and-copy loop until the
    /// to-space is closed under reachability. The from-space is dropped
    /// wholesale at the end.
    ///
    /// The collector never allocates from the heap it is collecting, and it is
    /// not reentrant.
    pub fn collect(
        &mut self,
        roots: &mut RootSet,
        symbols: &mut Value,
        globals: &mut Value,
        watchers: &mut [Watcher],
    ) {
        assert!(!self.gc_running, "collector reentered");
        self.gc_running = true;

        let old_used = self.space.len();
        let mut from = std::mem::take(&mut self.space);
        let mut to: Vec<Slot> = Vec::with_capacity(old_used);

        // Roots. The symbol list goes first.
        *symbols = forward(*symbols, &mut from, &mut to);
        *globals = forward(*globals, &mut from, &mut to);
        for slot in roots.slots_mut() {
            *slot = forward(*slot, &mut from, &mut to);
        }
        for w in watchers.iter_mut() {
            w.env = forward(w.env, &mut from, &mut to);
            w.callback = forward(w.callback, &mut from, &mut to);
        }

        // Scan-and-copy: everything before `scan` is fully forwarded,
        // everything between `scan` and the end has been copied but may still
        // point into from-space.
        let mut scan = 0;
        while scan < to.len() {
            match &to[scan] {
                Slot::Str(_) | Slot::Sym(_) | Slot::Prim { .. } => {}
                Slot::Cell { car, cdr } => {
                    let (car, cdr) = (*car, *cdr);
                    let car = forward(car, &mut from, &mut to);
                    let cdr = forward(cdr, &mut from, &mut to);
                    if let Slot::Cell { car: c, cdr: d } = &mut to[scan] {
                        *c = car;
                        *d = cdr;
                    }
                }
                Slot::Obj { proto, buckets } => {
                    let proto = *proto;
                    let mut bs = **buckets;
                    let proto = forward(proto, &mut from, &mut to);
                    for b in bs.iter_mut() {
                        *b = forward(*b, &mut from, &mut to);
                    }
                    if let Slot::Obj { proto: p, buckets } = &mut to[scan] {
                        *p = proto;
                        **buckets = bs;
                    }
                }
                Slot::Fun { params, body, env } | Slot::Mac { params, body, env } => {
                    let (params, body, env) = (*params, *body, *env);
                    let params = forward(params, &mut from, &mut to);
                    let body = forward(body, &mut from, &mut to);
                    let env = forward(env, &mut from, &mut to);
                    match &mut to[scan] {
                        Slot::Fun { params: p, body: b, env: e }
                        | Slot::Mac { params: p, body: b, env: e } => {
                            *p = params;
                            *b = body;
                            *e = env;
                        }
                        _ => unreachable!(),
                    }
                }
                Slot::Moved(_) => unreachable!("tombstone copied into to-space"),
            }
            scan += 1;
        }

        drop(from);
        self.space = to;
        self.cycles += 1;
        if self.debug_gc {
            info!(
                target: "shi::gc",
                "cycle {}: {} of {} slots copied",
                self.cycles,
                self.space.len(),
                old_used
            );
        }
        self.gc_running = false;
    }

    /// The out-of-memory error raised when a collection could not make room.
    pub fn exhausted() -> Error {
        Error::Fatal("memory exhausted".into())
    }
}

/// Relocate one value. Non-heap values pass through; a tombstone yields the
/// already-assigned new address; anything else is moved to the end of the
/// to-space and tombstoned in place.
fn forward(v: Value, from: &mut [Slot], to: &mut Vec<Slot>) -> Value {
    let r = match v.heap_ref() {
        Some(r) => r,
        None => return v,
    };
    if let Slot::Moved(n) = &from[r.0 as usize] {
        return v.with_ref(*n);
    }
    let n = Ref(to.len() as u32);
    let slot = std::mem::replace(&mut from[r.0 as usize], Slot::Moved(n));
    to.push(slot);
    v.with_ref(n)
}
