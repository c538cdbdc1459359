//! Python dependency extraction via a pure static AST walk (§4.1).
//!
//! Only module-scope (depth 0) reads/writes matter for inter-cell edges.
//! Function and class bodies introduce a new scope and are never descended
//! into — their bound name is the only module-level effect they have.

use super::Dependencies;
use rustpython_parser::ast::{self, Expr, ExceptHandler, ExprContext, Mod, Stmt};
use rustpython_parser::{parse, Mode};
use std::collections::BTreeSet;

const BUILTIN_SENTINELS: &[&str] = &["True", "False", "None"];

pub fn extract_python(source: &str) -> Dependencies {
    let module = match parse(source, Mode::Module, "<cell>") {
        Ok(Mod::Module(m)) => m,
        // Extraction never fails; a later execution surfaces the syntax error.
        _ => return Dependencies::default(),
    };

    let mut deps = Dependencies::default();
    walk_stmts(&module.body, &mut deps);
    deps
}

fn walk_stmts(stmts: &[Stmt], deps: &mut Dependencies) {
    for stmt in stmts {
        walk_stmt(stmt, deps);
    }
}

fn walk_stmt(stmt: &Stmt, deps: &mut Dependencies) {
    match stmt {
        Stmt::FunctionDef(s) => {
            deps.writes.insert(s.name.to_string());
        }
        Stmt::AsyncFunctionDef(s) => {
            deps.writes.insert(s.name.to_string());
        }
        Stmt::ClassDef(s) => {
            deps.writes.insert(s.name.to_string());
        }
        Stmt::Assign(s) => {
            for target in &s.targets {
                bind_target(target, deps);
            }
            walk_expr(&s.value, deps);
        }
        Stmt::AugAssign(s) => {
            // AugAssign adds the target to both reads and writes.
            if let Expr::Name(n) = s.target.as_ref() {
                deps.reads.insert(n.id.to_string());
                deps.writes.insert(n.id.to_string());
            }
            walk_expr(&s.value, deps);
        }
        Stmt::AnnAssign(s) => {
            if let Expr::Name(n) = s.target.as_ref() {
                deps.writes.insert(n.id.to_string());
            }
            if let Some(value) = &s.value {
                walk_expr(value, deps);
            }
        }
        Stmt::Import(s) => {
            for alias in &s.names {
                let name = match &alias.asname {
                    Some(asname) => asname.to_string(),
                    None => alias
                        .name
                        .split('.')
                        .next()
                        .unwrap_or(alias.name.as_str())
                        .to_string(),
                };
                deps.writes.insert(name);
            }
        }
        Stmt::ImportFrom(s) => {
            for alias in &s.names {
                if alias.name.as_str() == "*" {
                    // Star-imports are unresolvable statically; ignored.
                    continue;
                }
                let name = match &alias.asname {
                    Some(asname) => asname.to_string(),
                    None => alias.name.to_string(),
                };
                deps.writes.insert(name);
            }
        }
        Stmt::Expr(s) => walk_expr(&s.value, deps),
        Stmt::Return(s) => {
            if let Some(value) = &s.value {
                walk_expr(value, deps);
            }
        }
        Stmt::Delete(s) => {
            for target in &s.targets {
                if let Expr::Name(n) = target {
                    deps.reads.insert(n.id.to_string());
                }
            }
        }
        Stmt::If(s) => {
            walk_expr(&s.test, deps);
            walk_stmts(&s.body, deps);
            walk_stmts(&s.orelse, deps);
        }
        Stmt::For(s) => {
            bind_target(&s.target, deps);
            walk_expr(&s.iter, deps);
            walk_stmts(&s.body, deps);
            walk_stmts(&s.orelse, deps);
        }
        Stmt::AsyncFor(s) => {
            bind_target(&s.target, deps);
            walk_expr(&s.iter, deps);
            walk_stmts(&s.body, deps);
            walk_stmts(&s.orelse, deps);
        }
        Stmt::While(s) => {
            walk_expr(&s.test, deps);
            walk_stmts(&s.body, deps);
            walk_stmts(&s.orelse, deps);
        }
        Stmt::With(s) => {
            for item in &s.items {
                walk_expr(&item.context_expr, deps);
                if let Some(vars) = &item.optional_vars {
                    bind_target(vars, deps);
                }
            }
            walk_stmts(&s.body, deps);
        }
        Stmt::AsyncWith(s) => {
            for item in &s.items {
                walk_expr(&item.context_expr, deps);
                if let Some(vars) = &item.optional_vars {
                    bind_target(vars, deps);
                }
            }
            walk_stmts(&s.body, deps);
        }
        Stmt::Try(s) => {
            walk_stmts(&s.body, deps);
            for handler in &s.handlers {
                let ExceptHandler::ExceptHandler(h) = handler;
                if let Some(ty) = &h.type_ {
                    walk_expr(ty, deps);
                }
                if let Some(name) = &h.name {
                    deps.writes.insert(name.to_string());
                }
                walk_stmts(&h.body, deps);
            }
            walk_stmts(&s.orelse, deps);
            walk_stmts(&s.finalbody, deps);
        }
        Stmt::Assert(s) => {
            walk_expr(&s.test, deps);
            if let Some(msg) = &s.msg {
                walk_expr(msg, deps);
            }
        }
        Stmt::Raise(s) => {
            if let Some(exc) = &s.exc {
                walk_expr(exc, deps);
            }
            if let Some(cause) = &s.cause {
                walk_expr(cause, deps);
            }
        }
        // Global/Nonlocal/Pass/Break/Continue/Match have no module-scope
        // read/write effect worth tracking here.
        _ => {}
    }
}

/// Binds an assignment-style target (possibly a tuple/list destructuring
/// pattern, or a walrus) as writes.
fn bind_target(target: &Expr, deps: &mut Dependencies) {
    match target {
        Expr::Name(n) => {
            deps.writes.insert(n.id.to_string());
        }
        Expr::Tuple(t) => {
            for elt in &t.elts {
                bind_target(elt, deps);
            }
        }
        Expr::List(l) => {
            for elt in &l.elts {
                bind_target(elt, deps);
            }
        }
        Expr::Starred(s) => bind_target(&s.value, deps),
        // Attribute/Subscript targets (e.g. `obj.attr = 1`, `d[k] = 1`) read
        // the base object rather than writing a new module-level name.
        Expr::Attribute(a) => walk_expr(&a.value, deps),
        Expr::Subscript(s) => {
            walk_expr(&s.value, deps);
            walk_expr(&s.slice, deps);
        }
        _ => {}
    }
}

fn walk_expr(expr: &Expr, deps: &mut Dependencies) {
    match expr {
        Expr::Name(n) => {
            if n.ctx == ExprContext::Load && !BUILTIN_SENTINELS.contains(&n.id.as_str()) {
                deps.reads.insert(n.id.to_string());
            }
        }
        Expr::NamedExpr(n) => {
            bind_target(&n.target, deps);
            walk_expr(&n.value, deps);
        }
        Expr::BoolOp(e) => {
            for v in &e.values {
                walk_expr(v, deps);
            }
        }
        Expr::BinOp(e) => {
            walk_expr(&e.left, deps);
            walk_expr(&e.right, deps);
        }
        Expr::UnaryOp(e) => walk_expr(&e.operand, deps),
        // Lambda bodies are a new scope; only walk default argument values,
        // which are evaluated eagerly at module scope.
        Expr::Lambda(e) => {
            for default in arg_defaults(&e.args) {
                walk_expr(default, deps);
            }
        }
        Expr::IfExp(e) => {
            walk_expr(&e.test, deps);
            walk_expr(&e.body, deps);
            walk_expr(&e.orelse, deps);
        }
        Expr::Dict(e) => {
            for key in e.keys.iter().flatten() {
                walk_expr(key, deps);
            }
            for value in &e.values {
                walk_expr(value, deps);
            }
        }
        Expr::Set(e) => {
            for elt in &e.elts {
                walk_expr(elt, deps);
            }
        }
        Expr::List(e) => {
            for elt in &e.elts {
                walk_expr(elt, deps);
            }
        }
        Expr::Tuple(e) => {
            for elt in &e.elts {
                walk_expr(elt, deps);
            }
        }
        // Comprehensions introduce their own scope; the iterable of the
        // first `for` clause is the one part evaluated in the enclosing
        // scope in real Python, but we treat the whole comprehension as
        // opaque for simplicity (conservative: may under-report a read).
        Expr::ListComp(_)
        | Expr::SetComp(_)
        | Expr::DictComp(_)
        | Expr::GeneratorExp(_) => {}
        Expr::Await(e) => walk_expr(&e.value, deps),
        Expr::Yield(e) => {
            if let Some(value) = &e.value {
                walk_expr(value, deps);
            }
        }
        Expr::YieldFrom(e) => walk_expr(&e.value, deps),
        Expr::Compare(e) => {
            walk_expr(&e.left, deps);
            for comparator in &e.comparators {
                walk_expr(comparator, deps);
            }
        }
        Expr::Call(e) => {
            walk_expr(&e.func, deps);
            for arg in &e.args {
                walk_expr(arg, deps);
            }
            for kw in &e.keywords {
                walk_expr(&kw.value, deps);
            }
        }
        Expr::FormattedValue(e) => walk_expr(&e.value, deps),
        Expr::JoinedStr(e) => {
            for value in &e.values {
                walk_expr(value, deps);
            }
        }
        Expr::Attribute(e) => walk_expr(&e.value, deps),
        Expr::Subscript(e) => {
            walk_expr(&e.value, deps);
            walk_expr(&e.slice, deps);
        }
        Expr::Starred(e) => walk_expr(&e.value, deps),
        Expr::Slice(e) => {
            if let Some(lower) = &e.lower {
                walk_expr(lower, deps);
            }
            if let Some(upper) = &e.upper {
                walk_expr(upper, deps);
            }
            if let Some(step) = &e.step {
                walk_expr(step, deps);
            }
        }
        Expr::Constant(_) => {}
    }
}

fn arg_defaults(args: &ast::Arguments) -> impl Iterator<Item = &Expr> {
    args.posonlyargs
        .iter()
        .chain(args.args.iter())
        .chain(args.kwonlyargs.iter())
        .filter_map(|a| a.default.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_write() {
        let deps = extract_python("x = 10");
        assert_eq!(deps.writes, BTreeSet::from(["x".to_string()]));
        assert!(deps.reads.is_empty());
    }

    #[test]
    fn simple_read_and_write() {
        let deps = extract_python("y = x * 2");
        assert_eq!(deps.writes, BTreeSet::from(["y".to_string()]));
        assert_eq!(deps.reads, BTreeSet::from(["x".to_string()]));
    }

    #[test]
    fn self_assignment_keeps_both() {
        let deps = extract_python("x = x + 1");
        assert_eq!(deps.reads, BTreeSet::from(["x".to_string()]));
        assert_eq!(deps.writes, BTreeSet::from(["x".to_string()]));
    }

    #[test]
    fn function_def_writes_name_without_recursing() {
        let deps = extract_python("def f():\n    y = outer_only_inside\n    return y\n");
        assert_eq!(deps.writes, BTreeSet::from(["f".to_string()]));
        assert!(!deps.reads.contains("outer_only_inside"));
        assert!(!deps.reads.contains("y"));
    }

    #[test]
    fn class_def_writes_name_without_recursing() {
        let deps = extract_python("class Foo:\n    x = 1\n");
        assert_eq!(deps.writes, BTreeSet::from(["Foo".to_string()]));
        assert!(!deps.writes.contains("x"));
    }

    #[test]
    fn import_writes_top_level_package() {
        let deps = extract_python("import os.path");
        assert_eq!(deps.writes, BTreeSet::from(["os".to_string()]));
    }

    #[test]
    fn import_as_writes_alias() {
        let deps = extract_python("import numpy as np");
        assert_eq!(deps.writes, BTreeSet::from(["np".to_string()]));
    }

    #[test]
    fn from_import_writes_names() {
        let deps = extract_python("from math import sqrt, floor as fl");
        assert_eq!(
            deps.writes,
            BTreeSet::from(["sqrt".to_string(), "fl".to_string()])
        );
    }

    #[test]
    fn star_import_ignored() {
        let deps = extract_python("from math import *");
        assert!(deps.writes.is_empty());
    }

    #[test]
    fn augassign_reads_and_writes() {
        let deps = extract_python("total += 1");
        assert!(deps.reads.contains("total"));
        assert!(deps.writes.contains("total"));
    }

    #[test]
    fn parse_failure_is_empty_not_error() {
        let deps = extract_python("def (((");
        assert!(deps.reads.is_empty());
        assert!(deps.writes.is_empty());
    }

    #[test]
    fn destructuring_assignment() {
        let deps = extract_python("a, b = 1, 2");
        assert_eq!(
            deps.writes,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn if_block_stays_module_scope() {
        let deps = extract_python("if flag:\n    y = x\n");
        assert!(deps.reads.contains("flag"));
        assert!(deps.reads.contains("x"));
        assert!(deps.writes.contains("y"));
    }
}
