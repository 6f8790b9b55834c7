use std::fs::OpenOptions;
use std::os::fd::IntoRawFd;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::eval::Interp;
use crate::heap::PrimKind::Proc;
use crate::roots::Handle;
use crate::value::Value;

/// Install the host-facing primitives: file descriptors, environment, time,
/// sockets, and the terminal.
pub fn install(ip: &mut Interp) -> Result<()> {
    // OS
    ip.add_prim("write", Proc, prim_write)?;
    ip.add_prim("read", Proc, prim_read)?;
    ip.add_prim("seconds", Proc, prim_seconds)?;
    ip.add_prim("sleep", Proc, prim_sleep)?;
    ip.add_prim("exit", Proc, prim_exit)?;
    ip.add_prim("open", Proc, prim_open)?;
    ip.add_prim("close", Proc, prim_close)?;
    ip.add_prim("isatty", Proc, prim_isatty)?;
    ip.add_prim("getenv", Proc, prim_getenv)?;

    // Net
    ip.add_prim("socket", Proc, prim_socket)?;
    ip.add_prim("bind-inet", Proc, prim_bind_inet)?;
    ip.add_prim("listen", Proc, prim_listen)?;
    ip.add_prim("accept", Proc, prim_accept)?;

    // Term
    ip.add_prim("term-raw", Proc, prim_term_raw)?;
    Ok(())
}

/// Terminal raw-mode state. The original attributes are kept so every exit
/// path can restore them.
pub struct Term {
    raw: bool,
    orig: Option<libc::termios>,
}

impl Term {
    pub fn new() -> Self {
        Term { raw: false, orig: None }
    }

    pub fn restore(&mut self) {
        if self.raw {
            if let Some(orig) = &self.orig {
                unsafe {
                    libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, orig);
                }
            }
            self.raw = false;
        }
    }

    fn enable_raw(&mut self) -> Result<()> {
        if self.raw {
            return Ok(());
        }
        unsafe {
            if libc::isatty(libc::STDIN_FILENO) == 0 {
                return Err(Error::Io("term-raw: stdin is not a terminal".into()));
            }
            let mut orig: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut orig) == -1 {
                return Err(Error::Io("term-raw: error reading terminal attributes".into()));
            }
            let mut raw = orig;
            // No break, no CR to NL, no parity check, no strip, no flow
            // control; output post-processing off; 8-bit chars; echo,
            // canonical mode, extended functions and signal chars off.
            raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);
            raw.c_oflag &= !libc::OPOST;
            raw.c_cflag |= libc::CS8;
            raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
            raw.c_cc[libc::VMIN] = 0;
            raw.c_cc[libc::VTIME] = 1;
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, &raw) < 0 {
                return Err(Error::Io("term-raw: error enabling raw mode".into()));
            }
            self.orig = Some(orig);
            self.raw = true;
        }
        Ok(())
    }
}

impl Default for Term {
    fn default() -> Self {
        Self::new()
    }
}

pub fn setnonblock(fd: i32) -> std::result::Result<(), ()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(());
        }
    }
    Ok(())
}

fn want_int(v: Value, who: &str, what: &str) -> Result<i64> {
    v.as_int()
        .ok_or_else(|| Error::Type(format!("{}: {} not int", who, what)))
}

// ============================================================================
// OS
// ============================================================================

/// (write fd str) — writes all bytes; a short write is an error.
fn prim_write(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "write")?;
    let fd = want_int(ip.car(a)?, "write", "1st arg")?;
    let text = match ip.car(ip.cdr(a)?)? {
        Value::Str(r) => ip.heap.str_text(r),
        _ => return Err(Error::Type("write: 2nd arg not string".into())),
    };
    let bytes = text.as_bytes();
    let n = unsafe { libc::write(fd as i32, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if n < 0 {
        return Err(Error::Io("write: error".into()));
    }
    if n as usize != bytes.len() {
        return Err(Error::Io("write: short write".into()));
    }
    Ok(Value::Nil)
}

/// (read fd n) — up to n bytes; empty string at EOF.
fn prim_read(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "read")?;
    let fd = want_int(ip.car(a)?, "read", "1st arg")?;
    let len = want_int(ip.car(ip.cdr(a)?)?, "read", "2nd arg")?;
    if len < 0 {
        return Err(Error::Type("read: 2nd arg not a positive int".into()));
    }
    let mut buf = vec![0u8; len as usize];
    let n = unsafe { libc::read(fd as i32, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(Error::Io("read: error".into()));
    }
    let text = String::from_utf8_lossy(&buf[..n as usize]).into_owned();
    ip.make_str(&text)
}

/// (seconds) — wall-clock seconds since the epoch.
fn prim_seconds(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    ip.arity(ip.roots.get(args), 0, "seconds")?;
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| Error::Io("seconds: clock before epoch".into()))?
        .as_secs();
    Ok(Value::Int(secs as i64))
}

/// (sleep ms)
fn prim_sleep(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "sleep")?;
    let ms = want_int(ip.car(a)?, "sleep", "1st arg")?;
    std::thread::sleep(std::time::Duration::from_millis(ms.max(0) as u64));
    Ok(Value::Nil)
}

/// (exit code)
fn prim_exit(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "exit")?;
    let code = want_int(ip.car(a)?, "exit", "1st arg")?;
    ip.term_restore();
    std::process::exit(code as i32);
}

/// (open path [mode]) — fopen-style mode string, default "r". Returns the fd.
fn prim_open(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    let n = ip.list_len(a);
    if !(1..=2).contains(&n) {
        return Err(Error::Arity("open: not given a path".into()));
    }
    let path = match ip.car(a)? {
        Value::Str(r) => ip.heap.str_text(r).to_string(),
        _ => return Err(Error::Type("open: 1st arg not string".into())),
    };
    let mode = if n == 2 {
        match ip.car(ip.cdr(a)?)? {
            Value::Str(r) => ip.heap.str_text(r).to_string(),
            _ => return Err(Error::Type("open: 2nd arg not string".into())),
        }
    } else {
        "r".to_string()
    };
    let mut opts = OpenOptions::new();
    match mode.as_str() {
        "r" => opts.read(true),
        "r+" => opts.read(true).write(true),
        "w" => opts.write(true).create(true).truncate(true),
        "w+" => opts.read(true).write(true).create(true).truncate(true),
        "a" => opts.append(true).create(true),
        "a+" => opts.read(true).append(true).create(true),
        _ => return Err(Error::Type(format!("open: invalid mode: {}", mode))),
    };
    let file = opts
        .open(&path)
        .map_err(|_| Error::Io("open: error opening file".into()))?;
    Ok(Value::Int(file.into_raw_fd() as i64))
}

/// (close fd)
fn prim_close(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "close")?;
    let fd = want_int(ip.car(a)?, "close", "1st arg")?;
    if unsafe { libc::close(fd as i32) } < 0 {
        return Err(Error::Io("close: error closing file".into()));
    }
    Ok(Value::Nil)
}

/// (isatty fd)
fn prim_isatty(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "isatty")?;
    let fd = want_int(ip.car(a)?, "isatty", "1st arg")?;
    if unsafe { libc::isatty(fd as i32) } == 1 {
        Ok(Value::True)
    } else {
        Ok(Value::Nil)
    }
}

/// (getenv name) — a string, or nil when unset.
fn prim_getenv(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "getenv")?;
    let name = match ip.car(a)? {
        Value::Str(r) => ip.heap.str_text(r).to_string(),
        _ => return Err(Error::Type("getenv: 1st arg not string".into())),
    };
    match std::env::var(&name) {
        Ok(v) => ip.make_str(&v),
        Err(_) => Ok(Value::Nil),
    }
}

// ============================================================================
// Net
// ============================================================================

/// (socket domain type protocol) — the returned fd is set non-blocking.
fn prim_socket(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 3, "socket")?;
    let domain = want_int(ip.car(a)?, "socket", "1st arg")?;
    let ty = want_int(ip.car(ip.cdr(a)?)?, "socket", "2nd arg")?;
    let proto = want_int(ip.car(ip.cdr(ip.cdr(a)?)?)?, "socket", "3rd arg")?;

    let fd = unsafe { libc::socket(domain as i32, ty as i32, proto as i32) };
    if fd < 0 {
        return Err(Error::Io("socket: error creating socket".into()));
    }
    if setnonblock(fd).is_err() {
        return Err(Error::Io("socket: error making socket non-blocking".into()));
    }
    Ok(Value::Int(fd as i64))
}

/// (bind-inet fd host port)
fn prim_bind_inet(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 3, "bind-inet")?;
    let fd = want_int(ip.car(a)?, "bind-inet", "1st arg")?;
    let host = match ip.car(ip.cdr(a)?)? {
        Value::Str(r) => ip.heap.str_text(r).to_string(),
        _ => return Err(Error::Type("bind-inet: 2nd arg not string".into())),
    };
    let port = want_int(ip.car(ip.cdr(ip.cdr(a)?)?)?, "bind-inet", "3rd arg")?;

    let addr: std::net::Ipv4Addr = host
        .parse()
        .map_err(|_| Error::Io("bind-inet: could not parse host".into()))?;
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = (port as u16).to_be();
    sa.sin_addr.s_addr = u32::from(addr).to_be();

    let rc = unsafe {
        libc::bind(
            fd as i32,
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::Io("bind-inet: error binding to address".into()));
    }
    Ok(Value::Nil)
}

/// (listen fd backlog)
fn prim_listen(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 2, "listen")?;
    let fd = want_int(ip.car(a)?, "listen", "1st arg")?;
    let backlog = want_int(ip.car(ip.cdr(a)?)?, "listen", "2nd arg")?;
    if unsafe { libc::listen(fd as i32, backlog as i32) } < 0 {
        let e = std::io::Error::last_os_error();
        return Err(Error::Io(format!("listen: {}", e)));
    }
    Ok(Value::Nil)
}

/// (accept fd) — the client fd, or nil when the non-blocking socket has no
/// pending connection (or the call was interrupted).
fn prim_accept(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "accept")?;
    let fd = want_int(ip.car(a)?, "accept", "1st arg")?;
    let client = unsafe { libc::accept(fd as i32, std::ptr::null_mut(), std::ptr::null_mut()) };
    if client < 0 {
        let e = std::io::Error::last_os_error();
        return match e.raw_os_error() {
            Some(code) if code == libc::EINTR || code == libc::EWOULDBLOCK || code == libc::EAGAIN => {
                Ok(Value::Nil)
            }
            _ => Err(Error::Io(format!("accept: {}", e))),
        };
    }
    Ok(Value::Int(client as i64))
}

// ============================================================================
// Term
// ============================================================================

/// (term-raw t?) — toggles raw mode on stdin.
fn prim_term_raw(ip: &mut Interp, _env: Handle, args: Handle) -> Result<Value> {
    let a = ip.roots.get(args);
    ip.arity(a, 1, "term-raw")?;
    if ip.car(a)?.is_truthy() {
        ip.term.enable_raw()?;
    } else {
        ip.term.restore();
    }
    Ok(Value::Nil)
}
