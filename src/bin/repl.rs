//! lispx command-line entry point: runs source files and `-e` snippets, then
//! (or otherwise) an interactive REPL.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use lispx::{Expr, Interpreter, parser};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lispx", version, about = "A small Lisp evaluator")]
struct Args {
    /// Source files to run, in order, against one interpreter
    #[arg(value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Evaluate EXPR and print the result (may be repeated)
    #[arg(short = 'e', long = "eval", value_name = "EXPR")]
    eval: Vec<String>,

    /// Enter the REPL after running files and expressions
    #[arg(short, long)]
    interactive: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("lispx v{}", lispx::VERSION);

    let mut interp = Interpreter::new();
    let mut ok = true;

    for path in &args.files {
        debug!("Running file: {}", path.display());
        let outcome = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|source| run_source(&mut interp, &source, &path.display().to_string(), false));
        ok &= report(outcome);
    }

    for source in &args.eval {
        ok &= report(run_source(&mut interp, source, "-e", true));
    }

    if args.interactive || (args.files.is_empty() && args.eval.is_empty()) {
        repl(&mut interp)?;
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// `LISPX_LOG` takes `EnvFilter` directives; without it `-v` picks the level.
fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_env("LISPX_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn report(outcome: Result<bool>) -> bool {
    match outcome {
        Ok(ok) => ok,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            false
        }
    }
}

/// Evaluate every form in `source`, flushing `display` output after each one.
/// Returns whether all forms evaluated without producing an error value.
fn run_source(
    interp: &mut Interpreter<'_>,
    source: &str,
    origin: &str,
    print_result: bool,
) -> Result<bool> {
    let forms =
        parser::parse_program(source).with_context(|| format!("failed to parse {}", origin))?;

    let mut ok = true;
    let mut last = Expr::Nil;
    for form in &forms {
        last = interp.eval(form);
        flush_output(interp)?;
        if let Some(err) = last.as_error() {
            eprintln!("{}: error: {}", origin, err);
            ok = false;
        }
    }

    if print_result && last.as_error().is_none() {
        println!("{}", last);
    }
    Ok(ok)
}

fn flush_output(interp: &mut Interpreter<'_>) -> Result<()> {
    let output = interp.take_output();
    if !output.is_empty() {
        let mut stdout = io::stdout().lock();
        stdout.write_all(output.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

fn repl(interp: &mut Interpreter<'_>) -> Result<()> {
    println!("lispx v{}", lispx::VERSION);
    println!("Type expressions to evaluate them, :help for commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new().context("failed to start line editor")?;

    loop {
        match rl.readline("lispx> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // Add the line to history
                let _ = rl.add_history_entry(line);

                // Handle special commands
                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(interp);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match interp.run(line) {
                    Ok(result) => {
                        let output = interp.take_output();
                        if !output.is_empty() {
                            println!("{}", output);
                        }
                        println!("{}", result);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted. Use Ctrl+D or :quit to exit.");
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err).context("failed to read input"),
        }
    }

    Ok(())
}

fn print_help() {
    println!("lispx commands:");
    println!("  :help    - Show this help message");
    println!("  :env     - Show global bindings");
    println!("  :quit    - Exit the interpreter");
    println!("  :exit    - Exit the interpreter");
    println!();
    println!("Language:");
    println!("  Numbers: 42, 3.14, -5, 1e3");
    println!("  Truth: T and nil (nil is also the empty list)");
    println!("  Strings: \"hello world\"");
    println!("  Lists: '(1 2 3), (list 1 2 3), (cons 1 2)");
    println!("  Arithmetic: +, -, *, /");
    println!("  Comparison: =, <, >, <=, >=");
    println!("  Special forms: quote, define, set!, lambda, begin, if, and, or, eval");
    println!("  Output: (display \"text\")");
    println!();
    println!("Examples:");
    println!("  (define square (lambda (x) (* x x)))");
    println!("  (square 5)");
    println!("  (if (> 3 2) 'yes 'no)");
}

fn print_environment(interp: &Interpreter<'_>) {
    let env = interp.global_env();
    let names = env.local_names();
    if names.is_empty() {
        println!("(no global bindings)");
        return;
    }
    for name in names {
        if let Some(value) = env.get(&name) {
            println!("  {} = {}", name, value);
        }
    }
}
