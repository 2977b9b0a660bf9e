mod annotation;
mod check;
mod classpath;
mod dataflow;
mod descriptor;
mod engine;
mod hierarchy;
mod inference;
mod ir;
mod locate;
mod opcodes;
mod scan;
mod selector;
mod signature;
mod telemetry;
#[cfg(test)]
mod test_harness;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, PropertyBag, ReportingDescriptor, Run, SCHEMA_URL, Sarif, Tool,
    ToolComponent,
};

use crate::annotation::load_mixins;
use crate::check::{analyze_mixins, check_mixins};
use crate::classpath::ClassPool;
use crate::engine::{MixinEngine, Scope};
use crate::hierarchy::MemberKind;
use crate::inference::InjectorRegistry;
use crate::scan::{ScanOutput, scan_inputs};
use crate::selector::SelectorParsers;
use crate::telemetry::{Telemetry, in_phase, init_logging};

/// CLI arguments for mixinspect execution.
#[derive(Parser, Debug)]
#[command(
    name = "mixinspect",
    about = "Resolve mixin selectors and check injector handler signatures against JVM class files.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check every described handler and write a SARIF report.
    Check(CheckArgs),
    /// Print the signatures each handler is expected to have as JSON.
    Signatures(SignaturesArgs),
    /// List the members reachable from target classes as JSON.
    Members(MembersArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    inputs: InputArgs,
    #[arg(long, value_name = "FILE")]
    mixins: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// OTLP/HTTP collector endpoint, e.g. http://localhost:4318/
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
}

#[derive(Args, Debug)]
struct SignaturesArgs {
    #[command(flatten)]
    inputs: InputArgs,
    #[arg(long, value_name = "FILE")]
    mixins: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MembersArgs {
    #[command(flatten)]
    inputs: InputArgs,
    #[arg(long, value_name = "CLASS", required = true)]
    target: Vec<String>,
    /// List fields instead of methods.
    #[arg(long)]
    fields: bool,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let engine = MixinEngine::new(SelectorParsers::standard(), InjectorRegistry::standard());
    match cli.command {
        Command::Check(args) => run_check(&engine, args),
        Command::Signatures(args) => run_signatures(&engine, args),
        Command::Members(args) => run_members(&engine, args),
    }
}

fn run_check(engine: &MixinEngine, args: CheckArgs) -> Result<()> {
    let telemetry = args.otel.clone().map(Telemetry::new).transpose()?;
    let started_at = Instant::now();
    let (scan, scan_duration_ms) = load_inputs(&args.inputs, telemetry.as_ref())?;
    let artifact_count = scan.artifacts.len();
    let class_count = scan.class_count;
    let pool = in_phase(telemetry.as_ref(), "classpath", || ClassPool::new(scan.classes));
    let mixins = load_mixins(&args.mixins)?;

    let output = in_phase(telemetry.as_ref(), "check", || {
        check_mixins(engine, &pool, &mixins, telemetry.as_ref())
    });
    let invocation_stats = InvocationStats {
        scan_duration_ms,
        class_count,
        artifact_count,
        classpath_class_count: pool.len(),
        handler_count: output.handler_count,
    };
    let invocation = build_invocation(&invocation_stats);
    let result_count = output.results.len();
    let sarif = build_sarif(scan.artifacts, invocation, output.rules, output.results);

    write_json(args.output.as_deref(), &sarif).context("failed to write SARIF output")?;
    tracing::info!(
        "checked {} handlers in {} ms: {} results",
        invocation_stats.handler_count,
        started_at.elapsed().as_millis(),
        result_count
    );
    if let Some(telemetry) = telemetry {
        telemetry.shutdown()?;
    }
    Ok(())
}

fn run_signatures(engine: &MixinEngine, args: SignaturesArgs) -> Result<()> {
    let (scan, _) = load_inputs(&args.inputs, None)?;
    let pool = ClassPool::new(scan.classes);
    let mixins = load_mixins(&args.mixins)?;
    let reports = analyze_mixins(engine, &pool, &mixins, None);
    write_json(args.output.as_deref(), &reports).context("failed to write signatures")
}

fn run_members(engine: &MixinEngine, args: MembersArgs) -> Result<()> {
    let (scan, _) = load_inputs(&args.inputs, None)?;
    let pool = ClassPool::new(scan.classes);
    let mut targets = Vec::new();
    for name in &args.target {
        let class = pool
            .get(name)
            .with_context(|| format!("target class not found: {name}"))?;
        targets.push(class);
    }
    let kind = if args.fields {
        MemberKind::Field
    } else {
        MemberKind::Method
    };
    let candidates = engine.candidate_members(&pool, &targets, kind, Scope::Hierarchy);
    write_json(args.output.as_deref(), &candidates).context("failed to write members")
}

fn load_inputs(inputs: &InputArgs, telemetry: Option<&Telemetry>) -> Result<(ScanOutput, u128)> {
    if !inputs.input.exists() {
        anyhow::bail!("input not found: {}", inputs.input.display());
    }
    for entry in &inputs.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    let scan_started_at = Instant::now();
    let scan = in_phase(telemetry, "scan", || {
        scan_inputs(&inputs.input, &inputs.classpath, telemetry)
    })?;
    Ok((scan, scan_started_at.elapsed().as_millis()))
}

fn write_json<T: Serialize>(output: Option<&Path>, value: &T) -> Result<()> {
    let mut writer = output_writer(output)?;
    serde_json::to_writer_pretty(&mut writer, value).context("failed to serialize output")?;
    writer.write_all(b"\n").context("failed to write output")?;
    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    scan_duration_ms: u128,
    class_count: usize,
    artifact_count: usize,
    classpath_class_count: usize,
    handler_count: usize,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert("mixinspect.scan_ms".to_string(), json!(stats.scan_duration_ms));
    properties.insert("mixinspect.class_count".to_string(), json!(stats.class_count));
    properties.insert(
        "mixinspect.artifact_count".to_string(),
        json!(stats.artifact_count),
    );
    properties.insert(
        "mixinspect.classpath_class_count".to_string(),
        json!(stats.classpath_class_count),
    );
    properties.insert(
        "mixinspect.handler_count".to_string(),
        json!(stats.handler_count),
    );

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<serde_sarif::sarif::Result>,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("mixinspect")
        .version(env!("CARGO_PKG_VERSION"))
        .rules(rules)
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
