//! Noir - a statically typed, block-structured scripting language
//!
//! Source goes through the lexer, the parser, the checker and finally the
//! tree-walking interpreter. Blocks close with `::`, and concurrency is
//! built on declared `shared` state, `grab` blocks and `await`.

pub mod token;
pub mod lexer;
pub mod parser;
pub mod ast;
pub mod printer;
pub mod types;
pub mod checker;
pub mod value;
pub mod environment;
pub mod methods;
pub mod runtime;
pub mod interpreter;
pub mod error;

use std::thread;

pub use ast::Program;
pub use checker::Checker;
pub use error::{ErrorKind, NoirError, Result, Stage};
pub use interpreter::{Interpreter, InterpreterOptions, Output};
pub use lexer::{tokenize, Lexer};
pub use parser::{parse, Parser};
pub use token::Token;
pub use value::Value;

use runtime::TASK_STACK_SIZE;

/// Lex and parse a program
pub fn parse_source(source: &str) -> Result<Program> {
    parse(tokenize(source)?)
}

/// Lex, parse and type-check a program without running it
pub fn check_source(source: &str) -> Result<Program> {
    let program = parse_source(source)?;
    checker::check(&program)?;
    Ok(program)
}

/// Run a program, printing to stdout
pub fn run(source: &str) -> Result<()> {
    run_with_options(source, InterpreterOptions::default())
}

pub fn run_with_options(source: &str, options: InterpreterOptions) -> Result<()> {
    let program = check_source(source)?;
    with_large_stack(|| Interpreter::new(options).execute(&program))
}

/// Run a program and return the lines it printed
pub fn run_captured(source: &str) -> Result<Vec<String>> {
    let (output, lines) = Output::capture();
    run_with_options(source, InterpreterOptions { trace: false, output })?;
    let lines = lines.lock().clone();
    Ok(lines)
}

/// Run `f` on a thread with the same stack reserve as task threads;
/// evaluation recurses on the Rust stack.
pub fn with_large_stack<R, F>(f: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> Result<R> + Send,
{
    thread::scope(|scope| {
        let spawned = thread::Builder::new()
            .name("noir-main".to_string())
            .stack_size(TASK_STACK_SIZE)
            .spawn_scoped(scope, f);
        match spawned {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                Err(NoirError::new(
                    ErrorKind::RuntimeError("interpreter panicked".to_string()),
                    None,
                ))
            }),
            Err(err) => Err(NoirError::new(
                ErrorKind::RuntimeError(format!("cannot start interpreter thread: {}", err)),
                None,
            )),
        }
    })
}

/// Version of the Noir language
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
