use lispxp::{EVAL_STACK_SIZE, Interpreter};
use lispxp::ast::Value;
use lispxp::evaluator::Environment;
use lispxp::loader::FileSystemLocator;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process;
use std::thread;

struct Options {
    /// Extra namespace source roots, searched after the script's directory
    paths: Vec<PathBuf>,
    no_repl: bool,
    filename: Option<PathBuf>,
}

fn parse_options() -> Result<Options, String> {
    let mut args = pico_args::Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        println!("Usage: lispxp [options] [file]");
        println!("Options:");
        println!("  -h, --help: Print this help message");
        println!("  --path <dir>: Add a namespace source directory (repeatable)");
        println!("  --no-repl: Exit after running the file instead of starting a REPL");
        println!();
        println!("Set RUST_LOG=debug to trace namespace loading.");
        process::exit(0);
    }

    let no_repl = args.contains("--no-repl");
    let paths = args
        .values_from_str::<_, PathBuf>("--path")
        .map_err(|e| e.to_string())?;
    let filename = args
        .opt_free_from_str::<PathBuf>()
        .map_err(|e| e.to_string())?;

    let rest = args.finish();
    if !rest.is_empty() {
        return Err(format!("unexpected arguments: {rest:?}"));
    }

    Ok(Options {
        paths,
        no_repl,
        filename,
    })
}

fn main() {
    env_logger::init();

    let options = match parse_options() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(2);
        }
    };

    // Deep recursion needs more native stack than the main thread has
    let worker = thread::Builder::new()
        .name("lispxp".into())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run(options));
    let code = match worker.map(|handle| handle.join()) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("The interpreter encountered an unexpected error and must exit.");
            1
        }
        Err(err) => {
            eprintln!("Error: cannot start interpreter thread: {err}");
            1
        }
    };
    process::exit(code);
}

fn run(options: Options) -> i32 {
    let mut roots: Vec<PathBuf> = Vec::new();
    if let Some(dir) = options.filename.as_ref().and_then(|f| f.parent()) {
        roots.push(dir.to_path_buf());
    }
    roots.extend(options.paths);
    roots.push(PathBuf::from("."));
    let mut interp = Interpreter::new().with_locator(FileSystemLocator::new(roots));

    if let Some(filename) = &options.filename {
        match interp.load_file(filename) {
            Ok(Value::Nil) => {}
            Ok(result) if options.no_repl => println!("{result}"),
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error: {e}");
                if options.no_repl {
                    return 1;
                }
            }
        }
    }

    if options.no_repl {
        return 0;
    }
    match run_repl(&mut interp) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}

fn run_repl(interp: &mut Interpreter) -> Result<(), ReadlineError> {
    println!("LispXP - a small Clojure-flavoured Lisp");
    println!("Enter expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = format!("{}=> ", interp.namespaces().current_name());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&interp.current_env());
                        continue;
                    }
                    ":ns" => {
                        let namespaces = interp.namespaces();
                        for name in namespaces.namespace_names() {
                            let marker = if name == namespaces.current_name() { "*" } else { " " };
                            println!(" {marker} {name}");
                        }
                        continue;
                    }
                    ":reset" => {
                        interp.reset_global_state();
                        println!("State reset.");
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match interp.eval_top_level(line) {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn print_help() {
    println!("LispXP REPL commands:");
    println!("  :help   - Show this help message");
    println!("  :env    - Show bindings visible in the current namespace");
    println!("  :ns     - List namespaces (* marks the current one)");
    println!("  :reset  - Drop all definitions and namespaces");
    println!("  :quit   - Exit the interpreter");
    println!("  :exit   - Exit the interpreter");
    println!("  Ctrl+D  - Exit the interpreter");
    println!();
    println!("Examples:");
    println!("  (def xs [1 2 3])");
    println!("  (map (fn [x] (* x x)) xs)");
    println!("  (loop [i 0 acc 0] (if (< i 10) (recur (inc i) (+ acc i)) acc))");
    println!("  (ns app (:import math)) (sqrt 16)");
    println!("  (.toUpperCase \"hello\")");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::NativeFunction { .. } => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Native functions ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
