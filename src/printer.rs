//! Human-readable rendering of the AST
//!
//! One node per line, children indented by two spaces. Used by the
//! `ast` debug command.

use crate::ast::{Arg, Expr, FuncDecl, MatchArm, Pattern, Program, Stmt};

/// Render a whole program
pub fn render_program(program: &Program) -> String {
    let mut printer = Printer::default();
    printer.out.push_str("== program ==\n");
    for stmt in &program.statements {
        printer.stmt(stmt);
    }
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        self.indent += 1;
        f(self);
        self.indent -= 1;
    }

    fn block(&mut self, label: &str, stmts: &[Stmt]) {
        self.line(label);
        self.nested(|p| {
            for stmt in stmts {
                p.stmt(stmt);
            }
        });
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr { expr } => {
                self.line("ExprStmt");
                self.nested(|p| p.expr(expr));
            }
            Stmt::VarDecl { name, ty, value, .. } => {
                self.line(format!("VarDecl {}: {}", name, ty));
                self.nested(|p| p.expr(value));
            }
            Stmt::SharedDecl { name, ty, value, .. } => {
                self.line(format!("SharedDecl {}: {}", name, ty));
                self.nested(|p| p.expr(value));
            }
            Stmt::Assign { target, value, .. } => {
                self.line("Assign");
                self.nested(|p| {
                    p.expr(target);
                    p.expr(value);
                });
            }
            Stmt::If { branches, else_branch, .. } => {
                self.line("If");
                self.nested(|p| {
                    for (condition, body) in branches {
                        p.line("Branch");
                        p.nested(|p| {
                            p.expr(condition);
                            p.block("Then", body);
                        });
                    }
                    if let Some(body) = else_branch {
                        p.block("Else", body);
                    }
                });
            }
            Stmt::For { var, start, end, step, inclusive, body, .. } => {
                let range = if *inclusive { "thru" } else { "to" };
                self.line(format!("For {} ({})", var, range));
                self.nested(|p| {
                    p.expr(start);
                    p.expr(end);
                    if let Some(step) = step {
                        p.line("By");
                        p.nested(|p| p.expr(step));
                    }
                    p.block("Body", body);
                });
            }
            Stmt::ForEach { var, iterable, body, .. } => {
                self.line(format!("ForEach {}", var));
                self.nested(|p| {
                    p.expr(iterable);
                    p.block("Body", body);
                });
            }
            Stmt::While { condition, body, .. } => {
                self.line("While");
                self.nested(|p| {
                    p.expr(condition);
                    p.block("Body", body);
                });
            }
            Stmt::Func(decl) => self.func(decl),
            Stmt::Struct(decl) => {
                let keyword = if decl.is_class { "Class" } else { "Struct" };
                let mut header = format!("{} {}", keyword, decl.name);
                if let Some(base) = &decl.base {
                    header.push_str(&format!("({})", base));
                }
                if !decl.conforms.is_empty() {
                    header.push_str(&format!(" <- {}", decl.conforms.join(", ")));
                }
                self.line(header);
                self.nested(|p| {
                    for field in &decl.fields {
                        p.line(format!("Field {}: {}", field.name, field.ty));
                        if let Some(default) = &field.default {
                            p.nested(|p| p.expr(default));
                        }
                    }
                    for method in &decl.methods {
                        p.func(method);
                    }
                });
            }
            Stmt::Enum(decl) => {
                let keyword = if decl.is_union { "Union" } else { "Enum" };
                let mut header = format!("{} {}", keyword, decl.name);
                if !decl.conforms.is_empty() {
                    header.push_str(&format!(" <- {}", decl.conforms.join(", ")));
                }
                self.line(header);
                self.nested(|p| {
                    for variant in &decl.variants {
                        let fields: Vec<String> = variant
                            .fields
                            .iter()
                            .map(|f| format!("{}: {}", f.name, f.ty))
                            .collect();
                        if fields.is_empty() {
                            p.line(format!("Variant {}", variant.name));
                        } else {
                            p.line(format!("Variant {}({})", variant.name, fields.join(", ")));
                        }
                    }
                    for method in &decl.methods {
                        p.func(method);
                    }
                });
            }
            Stmt::Protocol(decl) => {
                self.line(format!("Protocol {}", decl.name));
                self.nested(|p| {
                    for property in &decl.properties {
                        p.line(format!("Property {}: {}", property.name, property.ty));
                    }
                    for method in &decl.methods {
                        let params: Vec<String> =
                            method.params.iter().map(|p| format!("{}: {}", p.name, p.ty)).collect();
                        let ret = method
                            .return_type
                            .as_ref()
                            .map_or(String::new(), |t| format!(" -> {}", t));
                        p.line(format!("Requires {}({}){}", method.name, params.join(", "), ret));
                    }
                });
            }
            Stmt::Return { value, .. } => {
                self.line("Return");
                if let Some(value) = value {
                    self.nested(|p| p.expr(value));
                }
            }
            Stmt::Print { args, .. } => {
                self.line("Print");
                self.nested(|p| {
                    for arg in args {
                        p.expr(arg);
                    }
                });
            }
            Stmt::Match { subject, arms, .. } => {
                self.line("Match");
                self.nested(|p| {
                    p.expr(subject);
                    for arm in arms {
                        p.arm(arm);
                    }
                });
            }
            Stmt::Grab { resources, mode, body, .. } => {
                let names: Vec<&str> = resources.iter().map(|(name, _)| name.as_str()).collect();
                self.block(&format!("Grab {} to {}", names.join(", "), mode), body);
            }
            Stmt::Await { condition, body, .. } => {
                self.line("Await");
                self.nested(|p| {
                    p.expr(condition);
                    p.block("Body", body);
                });
            }
            Stmt::Within { body, catch_name, handler, .. } => {
                self.line("Within");
                self.nested(|p| {
                    p.block("Body", body);
                    match catch_name {
                        Some(name) => p.block(&format!("Catch {}", name), handler),
                        None => p.block("Catch", handler),
                    }
                });
            }
            Stmt::Raise { value, .. } => {
                self.line("Raise");
                self.nested(|p| p.expr(value));
            }
        }
    }

    fn func(&mut self, decl: &FuncDecl) {
        let params: Vec<String> = decl
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        let mut header = String::new();
        if decl.is_async {
            header.push_str("Async ");
        }
        header.push_str(&format!("Func {}({})", decl.name, params.join(", ")));
        if decl.throws {
            header.push_str(" throws");
        }
        if let Some(ret) = &decl.return_type {
            header.push_str(&format!(" -> {}", ret));
        }
        self.block(&header, &decl.body);
    }

    fn arm(&mut self, arm: &MatchArm) {
        let label = match &arm.pattern {
            Pattern::Else => "Else".to_string(),
            Pattern::Variant { enum_name, variant, bindings } => {
                let mut label = String::from("Case ");
                if let Some(name) = enum_name {
                    label.push_str(&format!("{}::", name));
                }
                label.push_str(variant);
                if !bindings.is_empty() {
                    label.push_str(&format!("({})", bindings.join(", ")));
                }
                label
            }
        };
        self.block(&label, &arm.body);
    }

    fn args(&mut self, args: &[Arg]) {
        for arg in args {
            match &arg.label {
                Some(label) => {
                    self.line(format!("Label {}", label));
                    self.nested(|p| p.expr(&arg.value));
                }
                None => self.expr(&arg.value),
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Int { value, .. } => self.line(format!("Int {}", value)),
            Expr::Float { value, .. } => self.line(format!("Float {:?}", value)),
            Expr::Str { value, .. } => self.line(format!("Str {:?}", value)),
            Expr::Char { value, .. } => self.line(format!("Char {:?}", value)),
            Expr::Bool { value, .. } => self.line(format!("Bool {}", value)),
            Expr::Empty { .. } => self.line("Empty"),
            Expr::Ident { name, .. } => self.line(format!("Ident {}", name)),
            Expr::Path { type_name, member, .. } => {
                self.line(format!("Path {}::{}", type_name, member))
            }
            Expr::Array { elements, .. } => {
                self.line(format!("Array ({})", elements.len()));
                self.nested(|p| {
                    for element in elements {
                        p.expr(element);
                    }
                });
            }
            Expr::Dict { entries, .. } => {
                self.line(format!("Dict ({})", entries.len()));
                self.nested(|p| {
                    for (key, value) in entries {
                        p.line("Entry");
                        p.nested(|p| {
                            p.expr(key);
                            p.expr(value);
                        });
                    }
                });
            }
            Expr::Binary { left, op, right, .. } => {
                self.line(format!("Binary {}", op));
                self.nested(|p| {
                    p.expr(left);
                    p.expr(right);
                });
            }
            Expr::Logical { left, op, right, .. } => {
                self.line(format!("Logical {}", op));
                self.nested(|p| {
                    p.expr(left);
                    p.expr(right);
                });
            }
            Expr::Unary { op, operand, .. } => {
                self.line(format!("Unary {}", op));
                self.nested(|p| p.expr(operand));
            }
            Expr::Cast { expr, target, .. } => {
                self.line(format!("Cast as {}", target));
                self.nested(|p| p.expr(expr));
            }
            Expr::Call { callee, args, .. } => {
                self.line("Call");
                self.nested(|p| {
                    p.expr(callee);
                    p.args(args);
                });
            }
            Expr::MethodCall { receiver, method, args, .. } => {
                self.line(format!("MethodCall .{}", method));
                self.nested(|p| {
                    p.expr(receiver);
                    p.args(args);
                });
            }
            Expr::Field { object, name, .. } => {
                self.line(format!("Field .{}", name));
                self.nested(|p| p.expr(object));
            }
            Expr::Index { object, index, .. } => {
                self.line("Index");
                self.nested(|p| {
                    p.expr(object);
                    p.expr(index);
                });
            }
            Expr::Try { expr, .. } => {
                self.line("Try");
                self.nested(|p| p.expr(expr));
            }
            Expr::Grouping { expr, .. } => {
                self.line("Group");
                self.nested(|p| p.expr(expr));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn render(source: &str) -> String {
        render_program(&parse(tokenize(source).unwrap()).unwrap())
    }

    #[test]
    fn test_render_declaration() {
        let out = render("x: Int = 1 + 2 * 3");
        assert_eq!(
            out,
            "== program ==\nVarDecl x: Int\n  Binary +\n    Int 1\n    Binary *\n      Int 2\n      Int 3\n"
        );
    }

    #[test]
    fn test_render_blocks() {
        let out = render("for i in 0 to 3:\n  print(i)\n::");
        assert_eq!(
            out,
            "== program ==\nFor i (to)\n  Int 0\n  Int 3\n  Body\n    Print\n      Ident i\n"
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let source = "shared q: [Int] = empty\ngrab q to write:\n  q.append(1)\n::";
        assert_eq!(render(source), render(source));
        assert!(render(source).contains("Grab q to write"));
    }
}
