//! Pipeline orchestrator (C8, the `mcp_pipe` tool's engine).
//!
//! Evaluates a `PipelineSpec` against a shared environment
//! `{vars, steps, last}`, re-entering the tool-call envelope (C4) for each
//! `tool` step. Steps are sequential by default; `parallel` fans out with a
//! bounded worker count, `pipe` recurses into a fresh `steps` scope (same
//! `vars`) one level deeper.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::context::RequestContext;
use crate::core::config::PipelineLimits;
use crate::core::registry::{DispatchOutcome, ToolRegistry};
use crate::recorder::CallRecorder;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineSpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub vars: Option<Value>,
    #[serde(rename = "return", default)]
    pub return_: Option<Value>,
    /// Per-pipeline default for whether a failed step aborts the remaining
    /// sequence. A step's own `continue_on_error` still overrides this for
    /// that one step.
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolStepSpec {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub tool: Option<ToolStepSpec>,
    #[serde(default)]
    pub parallel: Option<Vec<StepSpec>>,
    #[serde(default)]
    pub pipe: Option<Box<PipelineSpec>>,
}

/// Per-step outcome. Kind-specific fields are populated according to which
/// of `tool` / `parallel` / `pipe` the step declared: `structured`/`text`
/// for `tool`, `children` (keyed by child id) for `parallel`, `result`/
/// `steps` for `pipe`.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub id: String,
    pub ok: bool,
    pub error: Option<String>,
    pub structured: Option<Value>,
    pub text: Option<String>,
    pub children: Option<Vec<StepResult>>,
    pub result: Option<Value>,
    pub steps: Option<Map<String, Value>>,
}

impl StepResult {
    fn failed(id: &str, error: String) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            error: Some(error),
            ..Default::default()
        }
    }

    /// The value this step contributes to `env.last` and to any template
    /// that references the step without naming a kind-specific field.
    fn chained_value(&self) -> Value {
        if let Some(structured) = &self.structured {
            structured.clone()
        } else if let Some(text) = &self.text {
            Value::String(text.clone())
        } else if let Some(result) = &self.result {
            result.clone()
        } else if let Some(children) = &self.children {
            Value::Object(children.iter().map(|c| (c.id.clone(), c.chained_value())).collect())
        } else {
            Value::Null
        }
    }
}

fn step_result_to_value(r: &StepResult) -> Value {
    json!({
        "ok": r.ok,
        "error": r.error,
        "structured": r.structured,
        "text": r.text,
        "children": r.children.as_ref().map(|c| {
            Value::Object(c.iter().map(|child| (child.id.clone(), step_result_to_value(child))).collect())
        }),
        "result": r.result,
        "steps": r.steps.clone().map(Value::Object),
    })
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub ok: bool,
    pub error: Option<String>,
    pub result: Value,
    pub steps: Value,
}

fn validate_unique_ids(steps: &[StepSpec]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for step in steps {
        if step.id.is_empty() {
            return Err("step id must be non-empty".to_string());
        }
        if !seen.insert(&step.id) {
            return Err(format!("duplicate step id: {}", step.id));
        }
    }
    Ok(())
}

fn get_path(root: &Value, path: &str) -> Result<Value, String> {
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map
                    .get(segment)
                    .ok_or_else(|| format!("reference not found: {segment}"))?;
            }
            Value::Array(arr) => {
                let idx: usize = segment
                    .parse()
                    .map_err(|_| format!("reference not found: {segment}"))?;
                current = arr
                    .get(idx)
                    .ok_or_else(|| format!("reference not found: {segment}"))?;
            }
            _ => return Err(format!("reference not found: {segment}")),
        }
    }
    Ok(current.clone())
}

fn stringify_for_interpolation(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve_string_template(s: &str, env_root: &Value) -> Result<String, String> {
    let mut out = String::new();
    let mut rest = s;
    loop {
        match rest.find("${") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                match after.find('}') {
                    None => {
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let path = &after[..end];
                        let value = get_path(env_root, path)?;
                        out.push_str(&stringify_for_interpolation(&value));
                        rest = &after[end + 1..];
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Resolves `${path}` string interpolation and `{$ref: "path"}` value
/// references against the current environment. Objects of exactly the
/// shape `{"$ref": <string>}` are replaced wholesale (not stringified);
/// everything else recurses structurally.
fn resolve_value(value: &Value, env_root: &Value) -> Result<Value, String> {
    match value {
        Value::String(s) => resolve_string_template(s, env_root).map(Value::String),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(path)) = map.get("$ref") {
                    return get_path(env_root, path);
                }
            }
            let mut resolved = Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(v, env_root)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(arr) => arr
            .iter()
            .map(|v| resolve_value(v, env_root))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

pub struct PipelineOrchestrator<'a> {
    registry: &'a ToolRegistry,
    recorder: &'a CallRecorder,
    limits: PipelineLimits,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(registry: &'a ToolRegistry, recorder: &'a CallRecorder, limits: PipelineLimits) -> Self {
        Self {
            registry,
            recorder,
            limits,
        }
    }

    pub async fn run(&self, ctx: &RequestContext, spec: PipelineSpec) -> PipelineOutput {
        let counter = Arc::new(AtomicUsize::new(0));
        let vars = spec.vars.clone().unwrap_or_else(|| json!({}));
        let (mut ok, mut error, last, steps_map) = self
            .run_sequence(ctx, &spec.steps, &vars, &counter, 0, spec.continue_on_error)
            .await;

        let result = match &spec.return_ {
            Some(template) => {
                let env_root = json!({"vars": vars, "steps": Value::Object(steps_map.clone()), "last": last});
                match resolve_value(template, &env_root) {
                    Ok(v) => v,
                    Err(e) => {
                        ok = false;
                        if error.is_none() {
                            error = Some(e);
                        }
                        Value::Null
                    }
                }
            }
            None => last,
        };

        PipelineOutput {
            ok,
            error,
            result,
            steps: Value::Object(steps_map),
        }
    }

    async fn run_sequence(
        &self,
        ctx: &RequestContext,
        steps: &[StepSpec],
        vars: &Value,
        counter: &Arc<AtomicUsize>,
        depth: usize,
        pipeline_continue_on_error: bool,
    ) -> (bool, Option<String>, Value, Map<String, Value>) {
        if let Err(dup) = validate_unique_ids(steps) {
            return (false, Some(dup), Value::Null, Map::new());
        }

        let mut steps_map = Map::new();
        let mut last = Value::Null;
        let mut ok = true;
        let mut error: Option<String> = None;

        for step in steps {
            let snapshot = json!({
                "vars": vars,
                "steps": Value::Object(steps_map.clone()),
                "last": last.clone(),
            });

            let result = self.execute_step(ctx, step, &snapshot, counter, depth).await;
            let aborted = result
                .error
                .as_deref()
                .map(|e| e.contains("maximum step limit"))
                .unwrap_or(false);

            last = result.chained_value();

            let step_ok = result.ok;
            let step_error = result.error.clone();
            steps_map.insert(step.id.clone(), step_result_to_value(&result));

            if !step_ok {
                ok = false;
                if error.is_none() {
                    error = step_error;
                }
                if aborted || !(step.continue_on_error || pipeline_continue_on_error) {
                    break;
                }
            }
        }

        (ok, error, last, steps_map)
    }

    fn execute_step<'b>(
        &'b self,
        ctx: &'b RequestContext,
        step: &'b StepSpec,
        snapshot: &'b Value,
        counter: &'b Arc<AtomicUsize>,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = StepResult> + Send + 'b>> {
        Box::pin(async move {
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if count > self.limits.max_steps {
                return StepResult::failed(&step.id, "maximum step limit exceeded".to_string());
            }

            let set_count = [step.tool.is_some(), step.parallel.is_some(), step.pipe.is_some()]
                .iter()
                .filter(|b| **b)
                .count();
            if set_count != 1 {
                return StepResult::failed(
                    &step.id,
                    "step must set exactly one of tool, parallel, pipe".to_string(),
                );
            }

            if let Some(tool_spec) = &step.tool {
                let args = match resolve_value(&tool_spec.args, snapshot) {
                    Ok(v) => v,
                    Err(e) => return StepResult::failed(&step.id, e),
                };
                let nested_ctx = ctx.nested(&step.id);
                let outcome = self
                    .registry
                    .dispatch(&nested_ctx, self.recorder, &tool_spec.name, args)
                    .await;
                return match outcome {
                    DispatchOutcome::Result(r) if !r.is_error => StepResult {
                        id: step.id.clone(),
                        ok: true,
                        error: None,
                        structured: r.structured.clone(),
                        text: Some(r.text.clone()),
                        ..Default::default()
                    },
                    DispatchOutcome::Result(r) => StepResult::failed(&step.id, r.text),
                    DispatchOutcome::TransportError { message } => StepResult::failed(&step.id, message),
                };
            }

            if let Some(children) = &step.parallel {
                if let Err(dup) = validate_unique_ids(children) {
                    return StepResult::failed(&step.id, dup);
                }
                let max_parallel = self.limits.max_parallel.max(1);
                let mut child_results = Vec::with_capacity(children.len());
                for chunk in children.chunks(max_parallel) {
                    let futures = chunk
                        .iter()
                        .map(|c| self.execute_step(ctx, c, snapshot, counter, depth));
                    let chunk_results = futures_util::future::join_all(futures).await;
                    child_results.extend(chunk_results);
                }
                let ok = child_results.iter().all(|c| c.ok);
                let error = child_results.iter().find_map(|c| c.error.clone());
                return StepResult {
                    id: step.id.clone(),
                    ok,
                    error,
                    children: Some(child_results),
                    ..Default::default()
                };
            }

            if let Some(inner_spec) = &step.pipe {
                if depth + 1 > self.limits.max_depth {
                    return StepResult::failed(&step.id, "nesting too deep".to_string());
                }
                let inner_vars = inner_spec
                    .vars
                    .clone()
                    .unwrap_or_else(|| snapshot.get("vars").cloned().unwrap_or_else(|| json!({})));
                let (ok, error, last, inner_steps) = self
                    .run_sequence(ctx, &inner_spec.steps, &inner_vars, counter, depth + 1, inner_spec.continue_on_error)
                    .await;

                let result = match &inner_spec.return_ {
                    Some(template) => {
                        let env_root =
                            json!({"vars": inner_vars, "steps": Value::Object(inner_steps.clone()), "last": last});
                        match resolve_value(template, &env_root) {
                            Ok(v) => v,
                            Err(e) => {
                                return StepResult {
                                    id: step.id.clone(),
                                    ok: false,
                                    error: Some(e),
                                    steps: Some(inner_steps),
                                    ..Default::default()
                                }
                            }
                        }
                    }
                    None => last,
                };

                return StepResult {
                    id: step.id.clone(),
                    ok,
                    error,
                    result: Some(result),
                    steps: Some(inner_steps),
                    ..Default::default()
                };
            }

            unreachable!("exactly-one validation above guarantees one branch was taken")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityContext;
    use crate::core::annotations::ToolAnnotations;
    use crate::core::registry::{ToolDescriptor, ToolHandler, ToolResult};
    use async_trait::async_trait;

    struct AddOneHandler;

    #[async_trait]
    impl ToolHandler for AddOneHandler {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "add_one".to_string(),
                description: "adds one to n".to_string(),
                schema: json!({"type": "object"}),
                annotations: ToolAnnotations::read_only(),
                base_cost: 1,
            }
        }

        async fn handle(
            &self,
            _ctx: &RequestContext,
            arguments: Value,
        ) -> Result<ToolResult, crate::error::CoreError> {
            let n = arguments.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(ToolResult::ok_structured(json!({"n": n + 1})))
        }
    }

    fn test_ctx() -> RequestContext {
        RequestContext::new("pipe-req", IdentityContext::anonymous())
    }

    fn registry_with_add_one() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(AddOneHandler));
        registry
    }

    struct AlwaysFailHandler;

    #[async_trait]
    impl ToolHandler for AlwaysFailHandler {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "always_fail".to_string(),
                description: "always returns an in-protocol error".to_string(),
                schema: json!({"type": "object"}),
                annotations: ToolAnnotations::read_only(),
                base_cost: 0,
            }
        }

        async fn handle(
            &self,
            _ctx: &RequestContext,
            _arguments: Value,
        ) -> Result<ToolResult, crate::error::CoreError> {
            Ok(ToolResult::error("boom"))
        }
    }

    fn registry_with_add_one_and_failure() -> ToolRegistry {
        let mut registry = registry_with_add_one();
        registry.register(Arc::new(AlwaysFailHandler));
        registry
    }

    #[tokio::test]
    async fn sequential_steps_chain_via_last() {
        let registry = registry_with_add_one();
        let recorder = CallRecorder::default();
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, PipelineLimits::default());

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [
                {"id": "a", "tool": {"name": "add_one", "args": {"n": 1}}},
                {"id": "b", "tool": {"name": "add_one", "args": {"n": {"$ref": "steps.a.structured.n"}}}}
            ]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(output.ok);
        assert_eq!(output.result, json!({"n": 3}));
    }

    #[tokio::test]
    async fn exceeding_max_steps_aborts_with_message() {
        let registry = registry_with_add_one();
        let recorder = CallRecorder::default();
        let limits = PipelineLimits {
            max_steps: 1,
            ..PipelineLimits::default()
        };
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, limits);

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [
                {"id": "a", "tool": {"name": "add_one", "args": {"n": 1}}},
                {"id": "b", "tool": {"name": "add_one", "args": {"n": 1}}}
            ]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(!output.ok);
        assert!(output.error.unwrap().contains("maximum step limit"));
    }

    #[tokio::test]
    async fn depth_beyond_max_depth_fails_with_nesting_message() {
        let registry = registry_with_add_one();
        let recorder = CallRecorder::default();
        let limits = PipelineLimits {
            max_depth: 1,
            ..PipelineLimits::default()
        };
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, limits);

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [{
                "id": "outer",
                "pipe": {
                    "steps": [{
                        "id": "inner",
                        "pipe": { "steps": [{"id": "deepest", "tool": {"name": "add_one", "args": {"n": 1}}}] }
                    }]
                }
            }]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(!output.ok);
        assert!(output.error.unwrap().contains("nesting too deep"));
    }

    #[tokio::test]
    async fn duplicate_sibling_ids_fail() {
        let registry = registry_with_add_one();
        let recorder = CallRecorder::default();
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, PipelineLimits::default());

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [
                {"id": "a", "tool": {"name": "add_one", "args": {"n": 1}}},
                {"id": "a", "tool": {"name": "add_one", "args": {"n": 2}}}
            ]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(!output.ok);
        assert!(output.error.unwrap().contains("duplicate step id: a"));
    }

    #[tokio::test]
    async fn missing_ref_segment_fails() {
        let registry = registry_with_add_one();
        let recorder = CallRecorder::default();
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, PipelineLimits::default());

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [{"id": "a", "tool": {"name": "add_one", "args": {"n": {"$ref": "steps.ghost.structured.n"}}}}]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(!output.ok);
        assert!(output.error.unwrap().contains("reference not found"));
    }

    #[tokio::test]
    async fn parallel_group_collects_children_by_id() {
        let registry = registry_with_add_one();
        let recorder = CallRecorder::default();
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, PipelineLimits::default());

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [{
                "id": "fan",
                "parallel": [
                    {"id": "p1", "tool": {"name": "add_one", "args": {"n": 1}}},
                    {"id": "p2", "tool": {"name": "add_one", "args": {"n": 2}}}
                ]
            }]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(output.ok);
        let fan = &output.steps["fan"];
        assert_eq!(fan["children"]["p1"]["structured"], json!({"n": 2}));
        assert_eq!(fan["children"]["p2"]["structured"], json!({"n": 3}));
    }

    #[tokio::test]
    async fn pipeline_level_continue_on_error_runs_remaining_steps() {
        let registry = registry_with_add_one_and_failure();
        let recorder = CallRecorder::default();
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, PipelineLimits::default());

        let spec: PipelineSpec = serde_json::from_value(json!({
            "continue_on_error": true,
            "steps": [
                {"id": "a", "tool": {"name": "always_fail", "args": {}}},
                {"id": "b", "tool": {"name": "add_one", "args": {"n": 1}}}
            ]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(!output.ok);
        assert_eq!(output.error.as_deref(), Some("boom"));
        assert_eq!(output.steps["b"]["structured"], json!({"n": 2}));
    }

    #[tokio::test]
    async fn without_continue_on_error_a_failed_step_halts_the_pipeline() {
        let registry = registry_with_add_one_and_failure();
        let recorder = CallRecorder::default();
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, PipelineLimits::default());

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [
                {"id": "a", "tool": {"name": "always_fail", "args": {}}},
                {"id": "b", "tool": {"name": "add_one", "args": {"n": 1}}}
            ]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(!output.ok);
        assert!(output.steps.get("b").is_none());
    }

    #[tokio::test]
    async fn pipe_step_exposes_result_and_steps() {
        let registry = registry_with_add_one();
        let recorder = CallRecorder::default();
        let orchestrator = PipelineOrchestrator::new(&registry, &recorder, PipelineLimits::default());

        let spec: PipelineSpec = serde_json::from_value(json!({
            "steps": [{
                "id": "outer",
                "pipe": {
                    "steps": [{"id": "inner", "tool": {"name": "add_one", "args": {"n": 1}}}],
                    "return": {"$ref": "steps.inner.structured.n"}
                }
            }]
        }))
        .unwrap();

        let output = orchestrator.run(&test_ctx(), spec).await;
        assert!(output.ok);
        let outer = &output.steps["outer"];
        assert_eq!(outer["result"], json!(2));
        assert_eq!(outer["steps"]["inner"]["structured"], json!({"n": 2}));
    }

    #[test]
    fn string_interpolation_stringifies_non_scalars() {
        let env = json!({"vars": {"count": 3}, "steps": {}, "last": null});
        let resolved = resolve_string_template("total: ${vars.count}", &env).unwrap();
        assert_eq!(resolved, "total: 3");
    }
}
