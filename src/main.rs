//! Noir CLI and REPL
//!
//! Usage:
//!   noir run <file.nr>      - Execute a Noir file
//!   noir check <file.nr>    - Type-check without running
//!   noir tokens <file.nr>   - Dump the token stream
//!   noir ast <file.nr>      - Dump the syntax tree
//!   noir repl               - Start interactive REPL
//!   noir help               - Show help message

use std::env;
use std::fs;
use std::process;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use noir::printer::render_program;
use noir::token::render_tokens;
use noir::{
    check_source, parse_source, tokenize, with_large_stack, Checker, ErrorKind, Interpreter,
    InterpreterOptions, NoirError, VERSION,
};

fn main() {
    let mut args: Vec<String> = env::args().collect();
    let trace = args.iter().any(|a| a == "--trace");
    args.retain(|a| a != "--trace");
    let options = InterpreterOptions {
        trace,
        ..InterpreterOptions::default()
    };

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "run" => run_file(file_argument(&args, "run"), options),
        "check" => check_file(file_argument(&args, "check")),
        "tokens" => {
            let source = read_file(file_argument(&args, "tokens"));
            match tokenize(&source) {
                Ok(tokens) => print!("{}", render_tokens(&tokens)),
                Err(e) => fail(e, &source),
            }
        }
        "ast" => {
            let source = read_file(file_argument(&args, "ast"));
            match parse_source(&source) {
                Ok(program) => print!("{}", render_program(&program)),
                Err(e) => fail(e, &source),
            }
        }
        "repl" => run_repl(options),
        "help" | "--help" | "-h" => print_help(),
        "version" | "--version" | "-v" => println!("Noir {}", VERSION),
        _ => {
            // Assume it's a file
            if args[1].ends_with(".nr") {
                run_file(&args[1], options);
            } else {
                eprintln!("{}: unknown command '{}'", "error".red(), args[1]);
                print_help();
                process::exit(1);
            }
        }
    }
}

fn file_argument<'a>(args: &'a [String], command: &str) -> &'a str {
    match args.get(2) {
        Some(path) => path,
        None => {
            eprintln!("{}: missing file argument", "error".red());
            eprintln!("Usage: noir {} <file.nr>", command);
            process::exit(1);
        }
    }
}

fn print_help() {
    println!("{}", "Noir".cyan().bold());
    println!("A statically typed scripting language with shared-state concurrency");
    println!("{} {}\n", "Version".cyan(), VERSION);
    println!("{}", "USAGE:".yellow());
    println!("  noir run <file.nr>       Execute a Noir file");
    println!("  noir check <file.nr>     Type-check a file without running it");
    println!("  noir tokens <file.nr>    Print the token stream");
    println!("  noir ast <file.nr>       Print the syntax tree");
    println!("  noir repl                Start interactive REPL");
    println!("  noir help                Show this help message");
    println!("  noir version             Show version\n");
    println!("{}", "OPTIONS:".yellow());
    println!("  --trace                  Report task, grab and await events on stderr\n");
    println!("{}", "LANGUAGE FEATURES:".yellow());
    println!("  x: Int = 10                     Typed declaration");
    println!("  for i in 0 to 10 by 2: ... ::   Range loop, blocks close with ::");
    println!("  func f(a: Int) -> Int: ... ::   Function definition");
    println!("  shared q: [Int] = empty         Shared resource");
    println!("  grab q to write: ... ::         Lock shared resources");
    println!("  await q.count > 0: ... ::       Wait inside a grab");
}

fn read_file(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("{}: cannot read file '{}': {}", "error".red(), path, e);
            process::exit(1);
        }
    }
}

fn fail(err: NoirError, source: &str) -> ! {
    eprintln!("{}", err.with_source(source));
    process::exit(1);
}

fn check_file(path: &str) {
    let source = read_file(path);
    match check_source(&source) {
        Ok(_) => println!("{} {}", "ok".green(), path.dimmed()),
        Err(e) => fail(e, &source),
    }
}

fn run_file(path: &str, options: InterpreterOptions) {
    let source = read_file(path);
    let program = match check_source(&source) {
        Ok(program) => program,
        Err(e) => fail(e, &source),
    };
    if let Err(e) = with_large_stack(|| Interpreter::new(options).execute(&program)) {
        fail(e, &source);
    }
}

fn run_repl(options: InterpreterOptions) {
    println!(
        "{} {} - {}",
        "Noir".cyan().bold(),
        VERSION.cyan(),
        "blocks close with ::".dimmed()
    );
    println!("Type {} to exit, {} for help\n", "exit".yellow(), "help".yellow());

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{}: cannot start REPL: {}", "error".red(), e);
            process::exit(1);
        }
    };

    // Declarations persist across entries
    let mut checker = Checker::new();
    let mut interpreter = Interpreter::new(options.clone());
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() {
            format!("{} ", "noir>".green().bold())
        } else {
            format!("{} ", "  ...".dimmed())
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(command);

                    match command {
                        "exit" | "quit" => {
                            println!("{}", "Goodbye!".cyan());
                            break;
                        }
                        "help" => {
                            print_repl_help();
                            continue;
                        }
                        "clear" => {
                            checker = Checker::new();
                            interpreter = Interpreter::new(options.clone());
                            println!("{}", "State cleared.".dimmed());
                            continue;
                        }
                        _ => {}
                    }
                } else {
                    let _ = rl.add_history_entry(line.trim());
                }

                buffer.push_str(&line);
                buffer.push('\n');

                let program = match parse_source(&buffer) {
                    Ok(program) => program,
                    // keep reading until every block is closed
                    Err(e) if matches!(e.kind, ErrorKind::UnclosedBlock(..)) => continue,
                    Err(e) => {
                        report(e, &buffer);
                        buffer.clear();
                        continue;
                    }
                };

                let mut candidate = checker.fork();
                if let Err(e) = candidate.check(&program) {
                    report(e, &buffer);
                    buffer.clear();
                    continue;
                }
                checker = candidate;

                if let Err(e) = with_large_stack(|| interpreter.execute(&program)) {
                    report(e, &buffer);
                }
                buffer.clear();
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                println!("{}", "^C".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{}: {:?}", "error".red(), err);
                break;
            }
        }
    }
}

fn report(err: NoirError, source: &str) {
    eprintln!("{}", format!("{}", err.with_source(source)).red());
}

fn print_repl_help() {
    println!("{}", "REPL Commands:".yellow());
    println!("  exit, quit   Exit the REPL");
    println!("  clear        Forget every declaration");
    println!("  help         Show this help\n");
    println!("{}", "Language Examples:".yellow());
    println!("  x: Int = 10");
    println!("  print(x * 2)");
    println!("  func double(n: Int) -> Int:");
    println!("    return n * 2");
    println!("  ::");
}
