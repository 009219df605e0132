use crate::parser::document::*;
use anyhow::{Context, Result};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Tolerant parser for GitHub Actions workflow YAML files.
///
/// Parsing never fails on content: sections that cannot be read are skipped and
/// recorded in [`PipelineDocument::diagnostics`].
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow file from disk. Only I/O errors are reported.
    pub fn parse_file(path: &Path) -> Result<PipelineDocument> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Parse workflow YAML content into a best-effort document.
    pub fn parse(content: &str) -> PipelineDocument {
        let mut doc = PipelineDocument::default();

        let root = match serde_yaml::from_str::<Value>(content) {
            Ok(value) => value,
            Err(err) => {
                doc.degraded = true;
                doc.diagnostics
                    .push(format!("YAML parse failed, recovering by section: {err}"));
                Self::recover_sections(content, &mut doc.diagnostics)
            }
        };

        let Some(root_map) = root.as_mapping() else {
            if !root.is_null() {
                doc.degraded = true;
                doc.diagnostics
                    .push("Document root is not a mapping".to_string());
            }
            return doc;
        };

        doc.name = root.get("name").and_then(scalar_string);
        doc.retention_declared = contains_key(&root, "retention-days");

        if let Some(on) = trigger_section(root_map) {
            doc.triggers = Self::parse_triggers(on);
        }

        if let Some(concurrency) = root.get("concurrency") {
            doc.concurrency = Self::parse_concurrency(concurrency);
        }

        match root.get("jobs") {
            Some(Value::Mapping(jobs)) => {
                for (job_id, config) in jobs {
                    let Some(job_id) = scalar_string(job_id) else {
                        continue;
                    };
                    match config {
                        Value::Mapping(_) => doc.jobs.push(Self::parse_job(&job_id, config)),
                        _ => {
                            doc.degraded = true;
                            doc.diagnostics
                                .push(format!("Job '{job_id}' is not a mapping, skipped"));
                        }
                    }
                }
            }
            Some(_) => {
                doc.degraded = true;
                doc.diagnostics
                    .push("'jobs' section is not a mapping".to_string());
            }
            None => doc
                .diagnostics
                .push("No 'jobs' section found in workflow".to_string()),
        }

        doc
    }

    /// Rebuild a root mapping from whichever top-level sections parse on their own.
    fn recover_sections(content: &str, diagnostics: &mut Vec<String>) -> Value {
        let mut root = Mapping::new();

        for (key, text) in split_blocks(content, 0) {
            match serde_yaml::from_str::<Value>(&text) {
                Ok(Value::Mapping(section)) => {
                    for (k, v) in section {
                        root.insert(k, v);
                    }
                }
                Ok(_) => diagnostics.push(format!("Section '{key}' is not a mapping, skipped")),
                Err(err) if key == "jobs" => {
                    diagnostics.push(format!("Section 'jobs' is malformed ({err}), recovering per job"));
                    let jobs = Self::recover_jobs(&text, diagnostics);
                    root.insert(Value::String("jobs".to_string()), Value::Mapping(jobs));
                }
                Err(err) => diagnostics.push(format!("Section '{key}' skipped: {err}")),
            }
        }

        Value::Mapping(root)
    }

    /// Parse each job block of a malformed `jobs:` section independently.
    fn recover_jobs(section: &str, diagnostics: &mut Vec<String>) -> Mapping {
        let mut jobs = Mapping::new();
        let body: String = section.lines().skip(1).map(|l| format!("{l}\n")).collect();

        let Some(indent) = body
            .lines()
            .find(|l| is_content_line(l))
            .map(indentation)
        else {
            return jobs;
        };

        for (job_id, text) in split_blocks(&body, indent) {
            let dedented: String = text
                .lines()
                .map(|l| format!("{}\n", l.get(indent..).unwrap_or(l.trim_start())))
                .collect();
            match serde_yaml::from_str::<Value>(&dedented) {
                Ok(Value::Mapping(job)) => {
                    for (k, v) in job {
                        jobs.insert(k, v);
                    }
                }
                Ok(_) => diagnostics.push(format!("Job '{job_id}' is not a mapping, skipped")),
                Err(err) => diagnostics.push(format!("Job '{job_id}' skipped: {err}")),
            }
        }

        jobs
    }

    fn parse_triggers(on: &Value) -> Vec<Trigger> {
        let mut triggers = Vec::new();

        match on {
            Value::String(event) => triggers.push(Trigger::new(TriggerKind::from_event(event))),
            Value::Sequence(events) => {
                for event in events.iter().filter_map(Value::as_str) {
                    triggers.push(Trigger::new(TriggerKind::from_event(event)));
                }
            }
            Value::Mapping(map) => {
                for (event, config) in map {
                    let Some(event) = event.as_str() else {
                        continue;
                    };
                    let mut trigger = Trigger::new(TriggerKind::from_event(event));
                    trigger.filters = TriggerFilters {
                        branches: config.get("branches").map(string_list),
                        branches_ignore: config.get("branches-ignore").map(string_list),
                        tags: config.get("tags").map(string_list),
                        paths: config.get("paths").map(string_list),
                        paths_ignore: config.get("paths-ignore").map(string_list),
                        types: config.get("types").map(string_list),
                    };
                    if trigger.kind == TriggerKind::Schedule {
                        trigger.crons = Self::parse_crons(config);
                    }
                    triggers.push(trigger);
                }
            }
            _ => {}
        }

        triggers
    }

    fn parse_crons(schedule: &Value) -> Vec<String> {
        match schedule {
            Value::Sequence(entries) => entries
                .iter()
                .filter_map(|entry| entry.get("cron").and_then(scalar_string))
                .collect(),
            Value::Mapping(_) => schedule
                .get("cron")
                .and_then(scalar_string)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn parse_concurrency(value: &Value) -> Option<Concurrency> {
        match value {
            Value::String(group) => Some(Concurrency {
                group: group.clone(),
                cancel_in_progress: None,
            }),
            Value::Mapping(_) => Some(Concurrency {
                group: value.get("group").and_then(scalar_string)?,
                cancel_in_progress: value.get("cancel-in-progress").and_then(Value::as_bool),
            }),
            _ => None,
        }
    }

    fn parse_job(job_id: &str, config: &Value) -> JobSpec {
        let mut job = JobSpec::new(job_id);

        job.name = config.get("name").and_then(scalar_string);
        job.condition = config.get("if").and_then(scalar_string);
        job.uses = config.get("uses").and_then(scalar_string);
        job.concurrency = config.get("concurrency").and_then(Self::parse_concurrency);

        if let Some(timeout) = config.get("timeout-minutes") {
            job.timeout = Self::parse_timeout(timeout);
        }

        let strategy = config.get("strategy");
        if let Some(strategy) = strategy {
            job.matrix = Self::parse_matrix(strategy);
            job.fail_fast = strategy.get("fail-fast").and_then(|v| match v {
                Value::Bool(b) => Some(*b),
                Value::String(s) => s.parse().ok(),
                _ => None,
            });
        }

        if let Some(runs_on) = config.get("runs-on") {
            job.runs_on = Self::resolve_runner_labels(runs_on, strategy);
        }

        if let Some(steps) = config.get("steps").and_then(Value::as_sequence) {
            job.steps = steps.iter().filter(|s| s.is_mapping()).map(Self::parse_step).collect();
        }

        job
    }

    fn parse_timeout(value: &Value) -> Option<Timeout> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f.round().max(0.0) as u64))
                .map(Timeout::Minutes),
            Value::String(s) => Some(match s.trim().parse::<u64>() {
                Ok(minutes) => Timeout::Minutes(minutes),
                Err(_) => Timeout::Expression(s.clone()),
            }),
            _ => None,
        }
    }

    fn parse_matrix(strategy: &Value) -> Option<MatrixStrategy> {
        let matrix = strategy.get("matrix")?;

        match matrix {
            Value::String(_) => Some(MatrixStrategy {
                dimensions: BTreeMap::new(),
                dynamic: true,
            }),
            Value::Mapping(mapping) => {
                let mut dimensions = BTreeMap::new();
                for (key, value) in mapping {
                    let Some(key) = key.as_str() else {
                        continue;
                    };
                    if key == "include" || key == "exclude" {
                        continue;
                    }
                    let values = match value {
                        Value::Sequence(seq) => seq.iter().filter_map(scalar_string).collect(),
                        // Expression-valued dimension, values unknown until runtime.
                        Value::String(_) => Vec::new(),
                        _ => continue,
                    };
                    dimensions.insert(key.to_string(), values);
                }
                Some(MatrixStrategy {
                    dimensions,
                    dynamic: false,
                })
            }
            _ => None,
        }
    }

    /// Collect runner labels, expanding `${{ matrix.<dim> }}` from the job's matrix.
    fn resolve_runner_labels(runs_on: &Value, strategy: Option<&Value>) -> Vec<String> {
        let raw: Vec<String> = match runs_on {
            Value::Mapping(_) => {
                let mut labels = runs_on.get("labels").map(string_list).unwrap_or_default();
                if let Some(group) = runs_on.get("group").and_then(scalar_string) {
                    labels.push(group);
                }
                labels
            }
            other => string_list(other),
        };

        let matrix = strategy.and_then(|s| s.get("matrix"));
        let mut labels = Vec::new();
        for label in raw {
            let dimension = matrix_reference().captures(&label).map(|c| c[1].to_string());
            match (dimension, matrix) {
                (Some(dim), Some(matrix)) => {
                    let mut values = matrix.get(dim.as_str()).map(string_list).unwrap_or_default();
                    if let Some(includes) = matrix.get("include").and_then(Value::as_sequence) {
                        values.extend(
                            includes
                                .iter()
                                .filter_map(|entry| entry.get(dim.as_str()).and_then(scalar_string)),
                        );
                    }
                    if values.is_empty() {
                        push_unique(&mut labels, label);
                    } else {
                        for value in values {
                            push_unique(&mut labels, value);
                        }
                    }
                }
                _ => push_unique(&mut labels, label),
            }
        }

        labels
    }

    fn parse_step(step: &Value) -> StepSpec {
        let with = step
            .get("with")
            .and_then(Value::as_mapping)
            .map(|mapping| {
                mapping
                    .iter()
                    .filter_map(|(k, v)| Some((scalar_string(k)?, stringify(v))))
                    .collect()
            })
            .unwrap_or_default();

        StepSpec {
            name: step.get("name").and_then(scalar_string),
            uses: step.get("uses").and_then(scalar_string),
            run: step.get("run").and_then(scalar_string),
            with,
        }
    }
}

fn matrix_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$\{\{\s*matrix\.([A-Za-z0-9_-]+)\s*\}\}$").expect("valid matrix regex")
    })
}

/// `on:` is read by YAML 1.1 loaders as boolean `true`; accept both spellings.
fn trigger_section(root: &Mapping) -> Option<&Value> {
    root.iter().find_map(|(key, value)| match key {
        Value::String(s) if s == "on" => Some(value),
        Value::Bool(true) => Some(value),
        _ => None,
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    scalar_string(value).unwrap_or_else(|| {
        serde_yaml::to_string(value)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    })
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(seq) => seq.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

fn push_unique(labels: &mut Vec<String>, label: String) {
    if !labels.contains(&label) {
        labels.push(label);
    }
}

fn contains_key(value: &Value, wanted: &str) -> bool {
    match value {
        Value::Mapping(map) => map
            .iter()
            .any(|(k, v)| k.as_str() == Some(wanted) || contains_key(v, wanted)),
        Value::Sequence(seq) => seq.iter().any(|v| contains_key(v, wanted)),
        _ => false,
    }
}

fn is_content_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Split text into `(key, block)` pairs at mapping keys indented exactly `indent`.
///
/// Lines before the first key (comments, `---`) are dropped.
fn split_blocks(content: &str, indent: usize) -> Vec<(String, String)> {
    let mut blocks: Vec<(String, String)> = Vec::new();

    for line in content.lines() {
        let starts_block = is_content_line(line)
            && indentation(line) == indent
            && !line.trim_start().starts_with('-')
            && line.contains(':');

        if starts_block {
            let key = line
                .trim()
                .split(':')
                .next()
                .unwrap_or_default()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            blocks.push((key, format!("{line}\n")));
        } else if let Some((_, block)) = blocks.last_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }

    blocks
}
