use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::eval::Interp;
use crate::heap::PrimKind::Proc;
use crate::roots::Handle;
use crate::value::Value;

/// Watcher kind constants, pre-bound as integers at boot.
pub const EV_READ: i64 = 1;
pub const EV_WRITE: i64 = 2;
pub const EV_TIMER: i64 = 256;
pub const EV_SIGNAL: i64 = 1024;

pub const KINDS: [(&str, i64); 4] = [
    ("EV_READ", EV_READ),
    ("EV_WRITE", EV_WRITE),
    ("EV_TIMER", EV_TIMER),
    ("EV_SIGNAL", EV_SIGNAL),
];

pub fn install(ip: &mut Interp) -> Result<()> {
    ip.add_prim("ev-start", Proc, prim_ev_start)?;
    ip.add_prim("ev-stop", Proc, prim_ev_stop)?;
    Ok(())
}

pub enum Kind {
    Io { fd: i32, write: bool },
    Timer { period: Duration, next: Instant },
    Signal { signum: i32 },
}

/// One registered watcher. The callback and its captured environment are GC
/// roots for as long as the watcher lives.
pub struct Watcher {
    pub id: i64,
    pub kind: Kind,
    pub env: Value,
    pub callback: Value,
}

/// The event-watcher table. Single-threaded: callbacks run between evaluator
/// steps on the thread that registered them, never during one.
pub struct Watchers {
    list: Vec<Watcher>,
    next_id: i64,
}

impl Watchers {
    pub fn new() -> Self {
        Watchers { list: Vec::new(), next_id: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn watchers_mut(&mut self) -> &mut [Watcher] {
        &mut self.list
    }

    fn add(&mut self, kind: Kind, env: Value, callback: Value) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.list.push(Watcher { id, kind, env, callback });
        id
    }

    fn find(&self, id: i64) -> Option<&Watcher> {
        self.list.iter().find(|w| w.id == id)
    }

    /// Stop and release a watcher. Already-queued but not-yet-dispatched
    /// events for it will not fire (the dispatch loop re-checks liveness).
    fn stop(&mut self, id: i64) -> bool {
        let Some(pos) = self.list.iter().position(|w| w.id == id) else {
            return false;
        };
        let w = self.list.remove(pos);
        if let Kind::Signal { signum } = w.kind {
            let still_watched = self
                .list
                .iter()
                .any(|w| matches!(w.kind, Kind::Signal { signum: s } if s == signum));
            if !still_watched {
                unsafe {
                    libc::signal(signum, libc::SIG_DFL);
                }
            }
        }
        true
    }
}

impl Default for Watchers {
    fn default() -> Self {
        Self::new()
    }
}

// Signal delivery is latched through flags the handler can touch
// async-signal-safely; the loop consumes them between poll rounds.
const NSIG: usize = 64;
static SIGNAL_FLAGS: [AtomicBool; NSIG] = [const { AtomicBool::new(false) }; NSIG];

extern "C" fn note_signal(sig: libc::c_int) {
    if (0..NSIG as libc::c_int).contains(&sig) {
        SIGNAL_FLAGS[sig as usize].store(true, Ordering::SeqCst);
    }
}

/// (ev-start type cb [arg]) — registers a watcher and returns its id.
/// io watchers take an fd, timers a millisecond period, signal watchers a
/// signal number.
fn prim_ev_start(ip: &mut Interp, env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    if ip.list_len(a) < 2 {
        return Err(Error::Arity("ev-start: not given at least 2 arguments".into()));
    }
    let ty = ip
        .car(a)?
        .as_int()
        .ok_or_else(|| Error::Type("ev-start: type arg not an int".into()))?;
    let cb = ip.car(ip.cdr(a)?)?;
    if !matches!(cb, Value::Fun(_)) {
        return Err(Error::Type("ev-start: callback arg not a function".into()));
    }
    let arg = {
        let rest = ip.cdr(ip.cdr(a)?)?;
        if rest.is_cell() {
            Some(ip.car(rest)?)
        } else {
            None
        }
    };
    let want_arg = |what: &str| -> Result<i64> {
        arg.and_then(|v| v.as_int())
            .ok_or_else(|| Error::Type(format!("ev-start: {}", what)))
    };

    let kind = match ty {
        EV_READ | EV_WRITE => {
            let fd = want_arg("io watcher needs a file descriptor")?;
            Kind::Io { fd: fd as i32, write: ty == EV_WRITE }
        }
        EV_TIMER => {
            let ms = want_arg("timer watcher needs a delay as int")?;
            let period = Duration::from_millis(ms.max(0) as u64);
            Kind::Timer { period, next: Instant::now() + period }
        }
        EV_SIGNAL => {
            let signum = want_arg("signal watcher needs a signal number as integer")?;
            if !(0..NSIG as i64).contains(&signum) {
                return Err(Error::Type("ev-start: signal number out of range".into()));
            }
            let handler = note_signal as extern "C" fn(libc::c_int);
            unsafe {
                libc::signal(signum as i32, handler as usize as libc::sighandler_t);
            }
            Kind::Signal { signum: signum as i32 }
        }
        _ => return Err(Error::Type("ev-start: unknown watcher type".into())),
    };

    let e = ip.roots.get(env);
    let id = ip.ev.add(kind, e, cb);
    Ok(Value::Int(id))
}

/// (ev-stop id) — t on success, nil if the id is unknown.
fn prim_ev_stop(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "ev-stop")?;
    let id = ip
        .car(a)?
        .as_int()
        .ok_or_else(|| Error::Type("ev-stop: 1st arg not int".into()))?;
    if ip.ev.stop(id) {
        Ok(Value::True)
    } else {
        Ok(Value::Nil)
    }
}

/// Drive the event loop until no watchers remain. Callbacks fire on this
/// thread, between evaluator steps; an error in a callback propagates out as
/// an unhandled error.
pub fn run(ip: &mut Interp) -> Result<()> {
    loop {
        if ip.ev.is_empty() {
            return Ok(());
        }

        // Poll io watchers, with the nearest timer deadline as timeout.
        let now = Instant::now();
        let mut timeout_ms: i32 = -1;
        for w in &ip.ev.list {
            if let Kind::Timer { next, .. } = &w.kind {
                let ms = next.saturating_duration_since(now).as_millis().min(i32::MAX as u128);
                let ms = ms as i32;
                if timeout_ms < 0 || ms < timeout_ms {
                    timeout_ms = ms;
                }
            }
        }
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let mut fd_ids: Vec<i64> = Vec::new();
        for w in &ip.ev.list {
            if let Kind::Io { fd, write } = &w.kind {
                fds.push(libc::pollfd {
                    fd: *fd,
                    events: if *write { libc::POLLOUT } else { libc::POLLIN },
                    revents: 0,
                });
                fd_ids.push(w.id);
            }
        }

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let e = std::io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::EINTR) {
                return Err(Error::Io(format!("ev: poll: {}", e)));
            }
        }

        // Gather everything that became due, in delivery order: io readiness,
        // elapsed timers (rearmed for their next period), latched signals.
        let mut due: Vec<i64> = Vec::new();
        for (pfd, id) in fds.iter().zip(&fd_ids) {
            if pfd.revents != 0 {
                due.push(*id);
            }
        }
        let now = Instant::now();
        for w in &mut ip.ev.list {
            if let Kind::Timer { period, next } = &mut w.kind {
                if *next <= now {
                    *next = now + *period;
                    due.push(w.id);
                }
            }
        }
        for sig in 0..NSIG {
            if SIGNAL_FLAGS[sig].swap(false, Ordering::SeqCst) {
                for w in &ip.ev.list {
                    if matches!(w.kind, Kind::Signal { signum } if signum == sig as i32) {
                        due.push(w.id);
                    }
                }
            }
        }

        for id in due {
            // A watcher stopped by an earlier callback must not fire.
            let Some(w) = ip.ev.find(id) else { continue };
            let (cb, env) = (w.callback, w.env);
            let fr = ip.roots.enter();
            let ch = ip.roots.save(cb);
            let _eh = ip.roots.save(env);
            let nil_args = ip.roots.save(Value::Nil);
            ip.apply_fun(ch, nil_args, true)?;
            ip.roots.leave(fr);
        }
    }
}
