//! Variable flow tracing skill
//!
//! A line-based scan: it does not parse the language, so it reports where a
//! name is bound, modified and read, not data dependencies.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::skills::{Skill, SkillArgs, SkillOutput, SkillSignature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
enum Usage {
    Parameter,
    Assignment,
    AugmentedAssignment,
    LoopVariable,
    Reference,
}

impl Usage {
    fn label(&self) -> &'static str {
        match self {
            Self::Parameter => "Parameter",
            Self::Assignment => "Assignment",
            Self::AugmentedAssignment => "Augmented assignment",
            Self::LoopVariable => "Loop variable",
            Self::Reference => "Reference",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Occurrence {
    line: usize,
    usage: Usage,
}

/// Reports where variables are bound, modified and read in a source file
pub struct TraceVariableFlowSkill;

/// Names bound by plain assignment on a line (`x = ..`, `let mut x = ..`)
fn assigned_names(source: &str) -> Result<Vec<String>, regex::Error> {
    let re = Regex::new(
        r"^\s*(?:let\s+(?:mut\s+)?|var\s+|const\s+)?([A-Za-z_]\w*)\s*(?::[^=]+)?=[^=]",
    )?;
    let mut names: Vec<String> = source
        .lines()
        .filter_map(|line| re.captures(line).map(|c| c[1].to_string()))
        .filter(|name| !matches!(name.as_str(), "let" | "var" | "const" | "if" | "while"))
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

fn trace(source: &str, variable: &str) -> Result<Vec<Occurrence>, regex::Error> {
    let name = regex::escape(variable);
    let word = Regex::new(&format!(r"\b{}\b", name))?;
    let augmented = Regex::new(&format!(r"\b{}\s*(?:\+|-|\*|/|%|\||&|\^|<<|>>)=", name))?;
    let assignment = Regex::new(&format!(r"\b{}\s*(?::[^=]+)?=[^=]", name))?;
    let loop_var = Regex::new(&format!(
        r"\bfor\s+(?:\(?[\w\s,]*\b)?{}\b[\w\s,)]*\bin\b",
        name
    ))?;
    let parameter = Regex::new(&format!(
        r"\b(?:fn|def|function)\s+\w+\s*(?:<[^>]*>)?\([^)]*\b{}\b",
        name
    ))?;

    let occurrences = source
        .lines()
        .enumerate()
        .filter(|(_, line)| word.is_match(line))
        .map(|(idx, line)| {
            let usage = if parameter.is_match(line) {
                Usage::Parameter
            } else if loop_var.is_match(line) {
                Usage::LoopVariable
            } else if augmented.is_match(line) {
                Usage::AugmentedAssignment
            } else if assignment.is_match(line) {
                Usage::Assignment
            } else {
                Usage::Reference
            };
            Occurrence { line: idx + 1, usage }
        })
        .collect();
    Ok(occurrences)
}

fn render_report(file: &str, traces: &BTreeMap<String, Vec<Occurrence>>) -> String {
    let mut report = format!("Variable flow for {}\n", file);

    for (name, occurrences) in traces {
        let _ = writeln!(report, "\n{}", name);
        let mut by_usage: BTreeMap<Usage, Vec<usize>> = BTreeMap::new();
        for occ in occurrences {
            by_usage.entry(occ.usage).or_default().push(occ.line);
        }
        for (usage, lines) in by_usage {
            let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            let _ = writeln!(report, "  {}: line {}", usage.label(), lines.join(", "));
        }
    }

    let total: usize = traces.values().map(Vec::len).sum();
    let _ = write!(report, "\nSummary: {} variables, {} usages", traces.len(), total);
    report
}

#[async_trait]
impl Skill for TraceVariableFlowSkill {
    fn name(&self) -> &str {
        "trace_variable_flow"
    }

    fn description(&self) -> &str {
        "Trace where variables are assigned, modified and read in a file"
    }

    fn signature(&self) -> SkillSignature {
        SkillSignature::new()
            .required("file", "string", "Path of the file to analyze")
            .optional(
                "variable",
                "string",
                "Variable to trace (default: every assigned variable)",
                Value::Null,
            )
    }

    async fn invoke(&self, args: &SkillArgs) -> Result<SkillOutput> {
        let file = args
            .get("file")
            .and_then(|v| v.as_str())
            .context("file must be a string")?;
        let source = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file))?;

        let names = match args.get("variable").and_then(|v| v.as_str()) {
            Some(variable) => vec![variable.to_string()],
            None => assigned_names(&source)?,
        };

        let mut traces: BTreeMap<String, Vec<Occurrence>> = BTreeMap::new();
        for name in names {
            let occurrences = trace(&source, &name)?;
            if !occurrences.is_empty() {
                traces.insert(name, occurrences);
            }
        }

        if traces.is_empty() {
            return Ok(SkillOutput::text(format!("No variables found in {}", file)));
        }

        let data = serde_json::to_value(&traces)?;
        Ok(SkillOutput::text(render_report(file, &traces)).with_data(data))
    }
}
