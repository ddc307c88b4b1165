// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Static checks over the parsed policy module
//!
//! The engine only resolves function names and rule paths when evaluation
//! reaches them, so a typo inside an iteration over `input` would go unnoticed
//! until a scrape sees a non-empty collection. These checks walk the module
//! once at startup instead.

use anyhow::{Context, Result, bail};
use regex::Regex;
use regorus::Engine;
use regorus::unstable::{Expr, Literal, Module, Query, Rule, RuleHead};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// A query that is a plain dotted reference into `data`
static DATA_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid data ref regex")
});

/// Builtin (and deprecated builtin) function names the engine provides
pub(super) fn builtin_functions() -> Result<BTreeSet<String>> {
    let mut engine = Engine::new();
    let results = engine.eval_query("opa.runtime()".to_string(), false)?;
    let runtime = results
        .result
        .first()
        .and_then(|r| r.expressions.first())
        .map(|e| &e.value)
        .context("Engine did not report its runtime")?;

    let mut names = BTreeSet::new();
    for name in runtime["builtins"].as_array()? {
        names.insert(name.as_string()?.to_string());
    }
    if let Ok(deprecated) = runtime["deprecated"].as_array() {
        for name in deprecated {
            names.insert(name.as_string()?.to_string());
        }
    }
    Ok(names)
}

struct FunctionCall {
    name: String,
    line: u32,
}

/// Every function called in `module` must be a builtin, a host function
/// (`known`) or a function defined by the module itself, and a query that is a
/// plain `data.` reference must name something the module defines.
pub(super) fn check_module(module: &Module, query: &str, known: &BTreeSet<String>) -> Result<()> {
    let package = ref_path(&module.package.refr).context("Unsupported package name")?;
    let package = format!("data.{package}");

    let mut rule_paths = Vec::new();
    let mut user_functions = BTreeSet::new();
    let mut calls = Vec::new();

    for rule in &module.policy {
        match rule.as_ref() {
            Rule::Spec { head, bodies, .. } => {
                let refr = match head {
                    RuleHead::Compr { refr, assign, .. } => {
                        if let Some(assign) = assign {
                            collect_calls(&assign.value, &mut calls);
                        }
                        refr
                    }
                    RuleHead::Set { refr, key, .. } => {
                        if let Some(key) = key {
                            collect_calls(key, &mut calls);
                        }
                        refr
                    }
                    RuleHead::Func {
                        refr, args, assign, ..
                    } => {
                        for arg in args {
                            collect_calls(arg, &mut calls);
                        }
                        if let Some(assign) = assign {
                            collect_calls(&assign.value, &mut calls);
                        }
                        if let Some(path) = ref_path(refr) {
                            user_functions.insert(format!("{package}.{path}"));
                        }
                        refr
                    }
                };
                if let Some(path) = ref_path(refr) {
                    rule_paths.push(format!("{package}.{path}"));
                }
                for body in bodies {
                    if let Some(assign) = &body.assign {
                        collect_calls(&assign.value, &mut calls);
                    }
                    collect_query_calls(&body.query, &mut calls);
                }
            }
            Rule::Default {
                refr, args, value, ..
            } => {
                collect_calls(value, &mut calls);
                if let Some(path) = ref_path(refr) {
                    let path = format!("{package}.{path}");
                    if !args.is_empty() {
                        user_functions.insert(path.clone());
                    }
                    rule_paths.push(path);
                }
            }
        }
    }

    for call in &calls {
        let resolved = known.contains(&call.name)
            || user_functions.contains(&call.name)
            || user_functions.contains(&format!("{package}.{}", call.name));
        if !resolved {
            bail!("line {}: unknown function '{}'", call.line, call.name);
        }
    }

    check_query_path(query, &package, &rule_paths)
}

fn check_query_path(query: &str, package: &str, rule_paths: &[String]) -> Result<()> {
    let query = query.trim();
    if !DATA_REF.is_match(query) {
        return Ok(());
    }

    // Either side may be the longer one: `data.stub` names the whole package,
    // `data.stub.printer.x` indexes into the rule's value.
    let wanted: Vec<&str> = query.split('.').collect();
    let defined = rule_paths.iter().any(|path| {
        let comps: Vec<&str> = path.split('.').collect();
        let n = comps.len().min(wanted.len());
        comps[..n] == wanted[..n]
    });

    if !defined {
        bail!("query '{query}' does not name a rule in {package}");
    }
    Ok(())
}

/// Dotted path of a simple reference; brackets with non-string indexes are skipped
fn ref_path(expr: &Expr) -> Option<String> {
    let mut comps = Vec::new();
    let mut expr = expr;
    loop {
        match expr {
            Expr::Var((span, _)) => {
                comps.push(span.text());
                break;
            }
            Expr::RefDot { refr, field, .. } => {
                comps.push(field.0.text());
                expr = refr.as_ref();
            }
            Expr::RefBrack { refr, index, .. } => {
                if let Expr::String((span, _)) = index.as_ref() {
                    comps.push(span.text());
                }
                expr = refr.as_ref();
            }
            _ => return None,
        }
    }
    comps.reverse();
    Some(comps.join("."))
}

fn collect_query_calls(query: &Query, calls: &mut Vec<FunctionCall>) {
    for stmt in &query.stmts {
        match &stmt.literal {
            Literal::SomeVars { .. } => {}
            Literal::SomeIn {
                key,
                value,
                collection,
                ..
            } => {
                if let Some(key) = key {
                    collect_calls(key, calls);
                }
                collect_calls(value, calls);
                collect_calls(collection, calls);
            }
            Literal::Expr { expr, .. } | Literal::NotExpr { expr, .. } => collect_calls(expr, calls),
            Literal::Every { domain, query, .. } => {
                collect_calls(domain, calls);
                collect_query_calls(query, calls);
            }
        }
        for modifier in &stmt.with_mods {
            collect_calls(&modifier.r#as, calls);
        }
    }
}

fn collect_calls(expr: &Expr, calls: &mut Vec<FunctionCall>) {
    match expr {
        Expr::Call {
            span, fcn, params, ..
        } => {
            if let Some(name) = ref_path(fcn) {
                calls.push(FunctionCall {
                    name,
                    line: span.line,
                });
            }
            for param in params {
                collect_calls(param, calls);
            }
        }
        Expr::Array { items, .. } | Expr::Set { items, .. } => {
            for item in items {
                collect_calls(item, calls);
            }
        }
        Expr::Object { fields, .. } => {
            for (_, key, value) in fields {
                collect_calls(key, calls);
                collect_calls(value, calls);
            }
        }
        Expr::ArrayCompr { term, query, .. } | Expr::SetCompr { term, query, .. } => {
            collect_calls(term, calls);
            collect_query_calls(query, calls);
        }
        Expr::ObjectCompr {
            key, value, query, ..
        } => {
            collect_calls(key, calls);
            collect_calls(value, calls);
            collect_query_calls(query, calls);
        }
        Expr::UnaryExpr { expr, .. } => collect_calls(expr, calls),
        Expr::RefDot { refr, .. } => collect_calls(refr, calls),
        Expr::RefBrack { refr, index, .. } => {
            collect_calls(refr, calls);
            collect_calls(index, calls);
        }
        Expr::BinExpr { lhs, rhs, .. }
        | Expr::BoolExpr { lhs, rhs, .. }
        | Expr::ArithExpr { lhs, rhs, .. }
        | Expr::AssignExpr { lhs, rhs, .. } => {
            collect_calls(lhs, calls);
            collect_calls(rhs, calls);
        }
        Expr::Membership {
            key,
            value,
            collection,
            ..
        } => {
            if let Some(key) = key {
                collect_calls(key, calls);
            }
            collect_calls(value, calls);
            collect_calls(collection, calls);
        }
        _ => {}
    }
}
