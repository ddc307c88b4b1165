// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Rego policy evaluation
//!
//! The operator-supplied module ("stub") is parsed and checked once at
//! startup into a [`CompiledQuery`]. Each scrape evaluates the query against
//! a fresh copy of the engine with the fetched resources bound as `input`.
//! Only text emitted through `print` becomes the response body; the value the
//! query computes is discarded.

mod check;
mod dedup;

use anyhow::{Context, Result};
use regex::Regex;
use regorus::{Engine, Value};
use std::sync::LazyLock;
use tracing::debug;

/// Query evaluated when the configuration does not name one
pub const DEFAULT_QUERY: &str = "data.stub.printer";

/// File name the module is registered under; shows up in engine diagnostics
const MODULE_PATH: &str = "stub.rego";

/// Location prefix the engine puts in front of every gathered print
static PRINT_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:stub\.rego|<query\.rego>):\d+: ").expect("valid print location regex")
});

/// Host function callable from the policy
struct ExtensionFn {
    name: &'static str,
    arity: u8,
    func: fn(Vec<Value>) -> Result<Value>,
}

/// Every extension injected into the engine
const EXTENSIONS: &[ExtensionFn] = &[ExtensionFn {
    name: dedup::NAME,
    arity: dedup::ARITY,
    func: dedup::extension,
}];

/// Policy source plus the query to run against it
#[derive(Debug, Clone)]
pub struct PolicyModule {
    source: String,
    query: String,
}

impl PolicyModule {
    pub fn new(source: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            query: query.into(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Text emitted by `print` statements during one evaluation, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationOutput {
    fragments: Vec<String>,
}

impl EvaluationOutput {
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Response body text: every fragment newline-terminated
    pub fn to_text(&self) -> String {
        let len = self.fragments.iter().map(|f| f.len() + 1).sum();
        let mut text = String::with_capacity(len);
        for fragment in &self.fragments {
            text.push_str(fragment);
            text.push('\n');
        }
        text
    }
}

/// A parsed and validated policy, ready for concurrent evaluation.
///
/// Holds no per-request state: [`CompiledQuery::evaluate`] works on a clone
/// of the prepared engine.
#[derive(Clone)]
pub struct CompiledQuery {
    engine: Engine,
    query: String,
}

impl std::fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl CompiledQuery {
    /// Parse the module, register extensions and check it.
    ///
    /// Every called function must resolve to a builtin, an extension or a
    /// function the module defines, and a plain `data.` query must name one of
    /// the module's rules. The engine is then prepared once so that scrapes
    /// start from an analyzed copy. Nothing is evaluated against `input` here.
    pub fn prepare(module: &PolicyModule) -> Result<Self> {
        let mut engine = Engine::new();
        engine.set_gather_prints(true);
        engine.set_strict_builtin_errors(true);

        let mut known = check::builtin_functions().context("Failed to list builtin functions")?;
        known.insert("print".to_string());
        for ext in EXTENSIONS {
            engine
                .add_extension(ext.name.to_string(), ext.arity, Box::new(ext.func))
                .with_context(|| format!("Failed to register extension '{}'", ext.name))?;
            known.insert(ext.name.to_string());
        }

        let package = engine
            .add_policy(MODULE_PATH.to_string(), module.source.clone())
            .context("Failed to parse policy module")?;

        let parsed = engine
            .get_modules()
            .last()
            .cloned()
            .context("Parsed policy module missing from engine")?;
        check::check_module(&parsed, &module.query, &known)
            .with_context(|| format!("Invalid policy module for query '{}'", module.query))?;

        // Runs analysis and rule gathering only; no rule is evaluated
        engine
            .eval_query("true".to_string(), false)
            .context("Failed to compile policy module")?;

        debug!(package = %package, query = %module.query, "Policy module compiled");

        Ok(Self {
            engine,
            query: module.query.clone(),
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Evaluate the query with `items` bound as `input`
    pub fn evaluate(&self, items: &[serde_json::Value]) -> Result<EvaluationOutput> {
        let input = serde_json::to_string(items).context("Failed to serialize input")?;
        let input = Value::from_json_str(&input).context("Failed to convert input")?;

        let mut engine = self.engine.clone();
        engine.set_input(input);
        engine.eval_query(self.query.clone(), false)?;

        let fragments = engine
            .take_prints()?
            .into_iter()
            .map(|line| strip_print_location(&line).to_string())
            .collect();

        Ok(EvaluationOutput { fragments })
    }
}

fn strip_print_location(line: &str) -> &str {
    match PRINT_LOCATION.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Iteration over `input` has to sit in a partial set rule: a complete rule
    // stops at its first solution and would print a single line.
    const STUB: &str = r#"
package stub

printer[line] {
    some i
    item := input[i]
    labels := dedup(sprintf("name=%s,namespace=%s,name=%s", [item.metadata.name, item.metadata.namespace, item.metadata.name]))
    line := sprintf("kube_deployment_replicas{%s} %d", [labels, item.spec.replicas])
    print(line)
}
"#;

    fn deployment(name: &str, namespace: &str, replicas: u32) -> serde_json::Value {
        json!({"metadata": {"name": name, "namespace": namespace}, "spec": {"replicas": replicas}})
    }

    fn deployments() -> Vec<serde_json::Value> {
        vec![deployment("web", "prod", 3), deployment("api", "prod", 2)]
    }

    fn compile(source: &str) -> CompiledQuery {
        CompiledQuery::prepare(&PolicyModule::new(source, DEFAULT_QUERY)).unwrap()
    }

    fn prepare_error(source: &str, query: &str) -> String {
        let err = CompiledQuery::prepare(&PolicyModule::new(source, query)).unwrap_err();
        format!("{:#}", err)
    }

    #[test]
    fn test_prints_become_output() {
        let query = compile(STUB);
        let output = query.evaluate(&deployments()).unwrap();
        assert_eq!(
            output.fragments(),
            [
                "kube_deployment_replicas{name=web,namespace=prod} 3",
                "kube_deployment_replicas{name=api,namespace=prod} 2",
            ]
        );
        assert!(output.to_text().ends_with("} 2\n"));
    }

    #[test]
    fn test_every_item_is_printed() {
        let query = compile(STUB);
        let items: Vec<_> = (0..5)
            .map(|i| deployment(&format!("app{i}"), "prod", i))
            .collect();
        let output = query.evaluate(&items).unwrap();

        let expected: Vec<String> = (0..5)
            .map(|i| format!("kube_deployment_replicas{{name=app{i},namespace=prod}} {i}"))
            .collect();
        assert_eq!(output.fragments(), expected.as_slice());
        assert_eq!(output.to_text().lines().count(), 5);
    }

    #[test]
    fn test_multiple_definitions_keep_source_order() {
        let source = r##"
package stub

printer[line] {
    line := "# TYPE kube_deployment_replicas gauge"
    print("# HELP kube_deployment_replicas Desired replicas.")
    print(line)
}

printer[line] {
    item := input[_]
    line := sprintf("kube_deployment_replicas{name=%s} %d", [item.metadata.name, item.spec.replicas])
    print(line)
}
"##;
        let query = compile(source);
        let items = vec![
            deployment("c", "prod", 1),
            deployment("a", "prod", 2),
            deployment("b", "prod", 3),
        ];
        let expected = [
            "# HELP kube_deployment_replicas Desired replicas.",
            "# TYPE kube_deployment_replicas gauge",
            "kube_deployment_replicas{name=c} 1",
            "kube_deployment_replicas{name=a} 2",
            "kube_deployment_replicas{name=b} 3",
        ];
        for _ in 0..3 {
            assert_eq!(query.evaluate(&items).unwrap().fragments(), expected);
        }
    }

    #[test]
    fn test_evaluation_is_repeatable() {
        let query = compile(STUB);
        let items = deployments();
        let first = query.evaluate(&items).unwrap();
        let second = query.evaluate(&items).unwrap();
        assert_eq!(first.to_text(), second.to_text());
    }

    #[test]
    fn test_evaluations_do_not_share_state() {
        let query = compile(STUB);
        let one = query.evaluate(&deployments()[..1]).unwrap();
        let empty = query.evaluate(&[]).unwrap();
        assert_eq!(one.fragments().len(), 1);
        assert!(empty.fragments().is_empty());
        assert_eq!(empty.to_text(), "");
    }

    #[test]
    fn test_set_output_is_ordered() {
        let source = r#"
package stub

names := {n | n := input[_].metadata.name}

printer {
    print(concat(",", names))
}
"#;
        let query = compile(source);
        let output = query.evaluate(&deployments()).unwrap();
        assert_eq!(output.fragments(), ["api,web"]);
    }

    #[test]
    fn test_syntax_error_fails_prepare() {
        let result = CompiledQuery::prepare(&PolicyModule::new(
            "package stub\nprinter {",
            DEFAULT_QUERY,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_function_fails_prepare() {
        let source = "package stub\n\nprinter {\n    print(no_such_fn(\"x\"))\n}\n";
        let msg = prepare_error(source, DEFAULT_QUERY);
        assert!(msg.contains("no_such_fn"), "{msg}");
    }

    #[test]
    fn test_unknown_function_in_iteration_fails_prepare() {
        let source = r#"
package stub

printer[line] {
    item := input[_]
    line := no_such_fn(item.metadata.name)
    print(line)
}
"#;
        let msg = prepare_error(source, DEFAULT_QUERY);
        assert!(msg.contains("unknown function 'no_such_fn'"), "{msg}");
    }

    #[test]
    fn test_unknown_function_in_helper_rule_fails_prepare() {
        let source = r#"
package stub

names := {n | n := upcase(input[_].metadata.name)}

printer {
    print(concat(",", names))
}
"#;
        let msg = prepare_error(source, DEFAULT_QUERY);
        assert!(msg.contains("upcase"), "{msg}");
    }

    #[test]
    fn test_user_functions_and_builtins_resolve() {
        let source = r#"
package stub

label(item) := sprintf("name=%s", [item.metadata.name])

printer[line] {
    item := input[_]
    line := sprintf("up{%s} %d", [dedup(label(item)), count(item)])
    print(line)
}
"#;
        let query = compile(source);
        let output = query.evaluate(&deployments()[..1]).unwrap();
        assert_eq!(output.fragments(), ["up{name=web} 2"]);
    }

    #[test]
    fn test_unknown_query_path_fails_prepare() {
        let msg = prepare_error(STUB, "data.stub.printr");
        assert!(msg.contains("data.stub.printr"), "{msg}");
        assert!(CompiledQuery::prepare(&PolicyModule::new(STUB, "data.other.printer")).is_err());
    }

    #[test]
    fn test_prepare_does_not_evaluate_against_empty_input() {
        let source = r#"
package stub

share := 10 / count(input)

printer {
    print(sprintf("share %v", [share]))
}
"#;
        let query = compile(source);
        let output = query.evaluate(&deployments()).unwrap();
        assert_eq!(output.fragments().len(), 1);
        assert!(output.fragments()[0].starts_with("share 5"), "{:?}", output);
    }

    #[test]
    fn test_runtime_error_is_reported() {
        let source = r#"
package stub

printer {
    x := input[_].spec.replicas
    print(dedup(x))
}
"#;
        let query = compile(source);
        // Fine on an empty collection, fails once an item hands dedup a number
        assert!(query.evaluate(&[]).is_ok());
        assert!(query.evaluate(&deployments()).is_err());
    }

    #[test]
    fn test_strip_print_location() {
        assert_eq!(strip_print_location("stub.rego:12: up 1"), "up 1");
        assert_eq!(strip_print_location("<query.rego>:1: hello"), "hello");
        assert_eq!(strip_print_location("job:rate:5m 1"), "job:rate:5m 1");
        assert_eq!(strip_print_location("up 1"), "up 1");
    }
}
