//! `lua`: a small CLI front end for the embeddable VM, mirroring the
//! reference interpreter's `-e`/`-`/script-path argument conventions.
//!
//! Grounded on the teacher's own CLI entry point style (install a
//! `tracing_subscriber` gated by `RUST_LOG`, open the stdlib, report
//! compile vs. runtime failures with distinct exit codes).

use std::io::Read;
use std::process::ExitCode;
use std::rc::Rc;

use lua53::{LuaValue, LuaVm};
use tracing_subscriber::EnvFilter;

enum Source {
    Inline(String),
    Stdin,
    File(String, Vec<String>),
}

fn parse_args() -> Result<Source, String> {
    let mut args = std::env::args().skip(1).peekable();
    while let Some(flag) = args.peek() {
        if flag == "-v" || flag == "--verbose" {
            args.next();
            continue;
        }
        break;
    }
    match args.next() {
        Some(flag) if flag == "-e" => {
            let stat = args.next().ok_or("'-e' requires an argument")?;
            Ok(Source::Inline(stat))
        }
        Some(flag) if flag == "-" => Ok(Source::Stdin),
        Some(path) => Ok(Source::File(path, args.collect())),
        None => Ok(Source::Stdin),
    }
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Build the `arg` global table: `arg[0]` is the script path (or a
/// placeholder for `-e`/stdin input), `arg[1..]` are the remaining CLI
/// arguments, matching the reference interpreter's convention.
fn install_arg_table(vm: &mut LuaVm, name: &str, rest: &[String]) {
    let table = std::rc::Rc::new(std::cell::RefCell::new(lua53::LuaTable::with_capacity(0, 4)));
    table.borrow_mut().set(LuaValue::Integer(0), LuaValue::string(name));
    for (i, a) in rest.iter().enumerate() {
        table.borrow_mut().set(LuaValue::Integer(i as i64 + 1), LuaValue::string(a.as_str()));
    }
    vm.globals().borrow_mut().set(LuaValue::string("arg"), LuaValue::table(table));
}

fn main() -> ExitCode {
    install_tracing();

    let source = match parse_args() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("lua: {e}");
            return ExitCode::from(1);
        }
    };

    let mut vm = LuaVm::new();
    vm.open_libs();

    let (chunk_name, text) = match source {
        Source::Inline(stat) => {
            install_arg_table(&mut vm, "-e", &[]);
            ("(command line)".to_string(), stat)
        }
        Source::Stdin => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("lua: could not read stdin: {e}");
                return ExitCode::from(1);
            }
            install_arg_table(&mut vm, "stdin", &[]);
            ("stdin".to_string(), buf)
        }
        Source::File(path, rest) => {
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("lua: cannot open {path}: {e}");
                    return ExitCode::from(1);
                }
            };
            install_arg_table(&mut vm, &path, &rest);
            (path, text)
        }
    };

    let proto = match vm.compile(&text, &chunk_name) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("lua: {e}");
            return ExitCode::from(1);
        }
    };

    match vm.execute(Rc::new(proto)) {
        Ok(_) => ExitCode::from(0),
        Err(e) => {
            eprintln!("lua: {e}");
            ExitCode::from(2)
        }
    }
}
