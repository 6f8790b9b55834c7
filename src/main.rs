use std::io::{IsTerminal, Read};
use std::process;

use log::LevelFilter;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use shi::error::{Error, Result};
use shi::eval::{env_flag, Interp};
use shi::reader::Reader;
use shi::{ev, printer};

/// Default heap capacity, in slots.
const DEFAULT_HEAP_SLOTS: usize = 1 << 20;

fn main() {
    let mut builder = env_logger::Builder::from_default_env();
    if env_flag("SHI_DEBUG_GC") {
        builder.filter_module("shi::gc", LevelFilter::Info);
    }
    builder.init();

    let mut ip = match Interp::new(DEFAULT_HEAP_SLOTS) {
        Ok(ip) => ip,
        Err(e) => {
            eprintln!("unhandled error: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = ip.boot() {
        fail(&mut ip, &e);
    }

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = ip.set_args(&args) {
        fail(&mut ip, &e);
    }

    let result = if args.len() > 1 {
        run_file(&mut ip, &args[1])
    } else if !std::io::stdin().is_terminal() {
        run_stdin(&mut ip)
    } else {
        repl(&mut ip)
    };

    match result {
        Ok(()) => {
            ip.term_restore();
            process::exit(0);
        }
        Err(e) => fail(&mut ip, &e),
    }
}

fn fail(ip: &mut Interp, e: &Error) -> ! {
    ip.term_restore();
    eprintln!("unhandled error: {}", e);
    process::exit(1);
}

fn run_file(ip: &mut Interp, path: &str) -> Result<()> {
    let src = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("cannot read {}: {}", path, e)))?;
    ip.eval_source(&src)?;
    ev::run(ip)
}

fn run_stdin(ip: &mut Interp) -> Result<()> {
    let mut src = String::new();
    std::io::stdin()
        .read_to_string(&mut src)
        .map_err(|e| Error::Io(format!("cannot read stdin: {}", e)))?;
    ip.eval_source(&src)?;
    ev::run(ip)
}

/// Interactive REPL: rustyline line editing, history at $HOME/.shi-history,
/// input accumulated until parens balance. Evaluation errors print and return
/// to the prompt; fatal errors exit.
fn repl(ip: &mut Interp) -> Result<()> {
    let mut rl = DefaultEditor::new().map_err(|e| Error::Io(e.to_string()))?;
    let history = std::env::var("HOME")
        .ok()
        .map(|home| format!("{}/.shi-history", home));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    println!("shi {}", shi::eval::VERSION);

    let mut buf = String::new();
    let mut depth: i32 = 0;
    loop {
        let prompt = if buf.is_empty() { "shi> " } else { "   > " };
        match rl.readline(prompt) {
            Ok(line) => {
                for c in line.chars() {
                    match c {
                        '(' | '{' => depth += 1,
                        ')' | '}' => depth -= 1,
                        _ => {}
                    }
                }
                buf.push_str(&line);
                buf.push('\n');
                if depth > 0 {
                    continue;
                }
                depth = 0;
                let input = std::mem::take(&mut buf);
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);
                // The REPL is the outermost rescue point: the registry
                // unwinds here after an error.
                let mark = ip.roots.enter();
                let r = eval_and_print(ip, input);
                ip.roots.leave(mark);
                if let Err(e) = r {
                    if e.is_fatal() {
                        if let Some(path) = &history {
                            let _ = rl.save_history(path);
                        }
                        return Err(e);
                    }
                    eprintln!("error: {}", e);
                }
            }
            Err(ReadlineError::Interrupted) => {
                buf.clear();
                depth = 0;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(Error::Io(e.to_string())),
        }
    }

    if let Some(path) = &history {
        let _ = rl.save_history(path);
    }
    Ok(())
}

/// Evaluate each form of a REPL input and print its value. Top-level forms
/// pass through the prelude's `expand-toplevel` first, one level deep.
fn eval_and_print(ip: &mut Interp, src: &str) -> Result<()> {
    let mut rd = Reader::new(src);
    loop {
        let fr = ip.roots.enter();
        let form = match rd.read(ip)? {
            Some(f) => f,
            None => {
                ip.roots.leave(fr);
                return Ok(());
            }
        };
        let fh = ip.roots.save(form);
        let genv = ip.roots.save(ip.globals);

        let expander = ip
            .lookup_symbol("expand-toplevel")
            .and_then(|s| ip.env_get(ip.globals, s))
            .and_then(|binding| ip.cdr(binding).ok())
            .filter(|v| matches!(v, shi::Value::Fun(_)));
        if let Some(f) = expander {
            let xh = ip.roots.save(f);
            let argl = ip.cons(ip.roots.get(fh), shi::Value::Nil)?;
            let ah = ip.roots.save(argl);
            let expanded = ip.apply(genv, xh, ah, false)?;
            ip.roots.set(fh, expanded);
        }

        let v = ip.eval(genv, fh)?;
        println!("{}", printer::pr_str(ip, v));
        ip.roots.leave(fr);
    }
}
