use anyhow::{bail, Context, Result};
use pipeline_engine::cli::commands::{DescribeCommand, RunCommand, ValidateCommand};
use pipeline_engine::cli::output::*;
use pipeline_engine::cli::{Cli, Command};
use pipeline_engine::core::{PipelineImporter, PipelineSource, Tree, YamlImporter};
use pipeline_engine::execution::RuntimeFactory;
use pipeline_engine::{
    Pipeline, PipelineKind, PipelineOptions, PipelineService, PipelineStatus, ProcessRuntime,
    RuntimeConfig, RuntimeExecutor, ServiceConfig, Variable,
};
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const MAIN_ALIAS: &str = "main";
const TEARDOWN_ALIAS: &str = "teardown";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Describe(cmd) => describe_pipeline(cmd)?,
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let runtime_config = RuntimeConfig::new().with_mode(cmd.runtime);
    let factory: RuntimeFactory = Arc::new(move || {
        Arc::new(ProcessRuntime::new(runtime_config.clone())) as Arc<dyn RuntimeExecutor>
    });
    let service = Arc::new(PipelineService::new(ServiceConfig::default(), factory));
    service.install_shutdown_handler();

    let mut pipelines = Vec::new();
    if let Some(teardown) = &cmd.teardown {
        let options = PipelineOptions {
            alias: Some(TEARDOWN_ALIAS.to_string()),
            kind: PipelineKind::Teardown,
            workspace: cmd.workspace.clone(),
            ..Default::default()
        };
        let pipeline = service
            .add_pipeline(PipelineSource::File(teardown.into()), options)
            .await?;
        pipelines.push(pipeline);
    }

    let options = PipelineOptions {
        alias: Some(MAIN_ALIAS.to_string()),
        next: cmd.teardown.as_ref().map(|_| TEARDOWN_ALIAS.to_string()),
        workspace: cmd.workspace.clone(),
        ..Default::default()
    };
    let main = service
        .add_pipeline(PipelineSource::File(cmd.file.clone().into()), options)
        .await?;
    pipelines.insert(0, Arc::clone(&main));

    for pipeline in &pipelines {
        if let Err(e) = pipeline.load_and_validate() {
            println!("{} {} is invalid:", CROSS, style(pipeline.source()).bold());
            for message in pipeline.errors() {
                println!("  {}", style(message).red());
            }
            debug!("{}", e);
            return Ok(1);
        }
        // Definition variables are in place now; command-line values override them
        for (key, value) in &cmd.var {
            pipeline.set_variable(Variable::new(key.clone(), value.clone()))?;
        }
        for (key, value) in &cmd.secret {
            pipeline.set_variable(Variable::secret(key.clone(), value.clone()))?;
        }
    }

    for (key, value) in &cmd.var {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }
    println!("{} Running {}", ROCKET, style(main.name()).bold());
    println!("{}", separator());

    let status = if let Some(breakpoint) = &cmd.break_at {
        run_to_breakpoint(&service, &main, breakpoint).await?
    } else if cmd.step {
        run_step_by_step(&service, &main).await?
    } else {
        let spinner = create_spinner(format!("Running {}", main.name()));
        let status = service.start_pipeline(MAIN_ALIAS).await;
        spinner.finish_and_clear();
        status?
    };

    println!("{}", separator());
    for pipeline in &pipelines {
        print_pipeline(pipeline, cmd.json)?;
    }

    if status == PipelineStatus::Successful {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(main.name()).bold(),
            style("successfully").green()
        );
        Ok(0)
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(main.name()).bold(),
            format_status(status)
        );
        Ok(1)
    }
}

async fn run_to_breakpoint(
    service: &PipelineService,
    main: &Arc<Pipeline>,
    breakpoint: &str,
) -> Result<PipelineStatus> {
    let status = service.resume_pipeline(MAIN_ALIAS, Some(breakpoint)).await?;
    if status == PipelineStatus::Paused {
        println!("{}", format_sequence(&main.describe_sequence()));
        wait_for_enter("Press Enter to run the rest of the pipeline").await?;
        // A step that fails at the breakpoint pauses before the pipeline fails
        if !main.status().is_terminal() {
            service.resume_pipeline(MAIN_ALIAS, None).await?;
        }
    }
    Ok(service.finish_chain(MAIN_ALIAS).await?)
}

async fn run_step_by_step(service: &PipelineService, main: &Arc<Pipeline>) -> Result<PipelineStatus> {
    while !main.status().is_terminal() {
        let status = service.next_step_in_pipeline(MAIN_ALIAS).await?;
        if status.is_terminal() {
            break;
        }
        println!("{}", format_sequence(&main.describe_sequence()));
        wait_for_enter("Press Enter for the next step").await?;
    }
    Ok(service.finish_chain(MAIN_ALIAS).await?)
}

async fn wait_for_enter(prompt: &str) -> Result<()> {
    println!("{} {}", INFO, style(prompt).dim());
    tokio::task::spawn_blocking(|| console::Term::stderr().read_line())
        .await
        .context("Prompt task failed")?
        .context("Failed to read from terminal")?;
    Ok(())
}

fn print_pipeline(pipeline: &Pipeline, json: bool) -> Result<()> {
    let description = pipeline.describe_sequence();
    if json {
        println!("{}", serde_json::to_string_pretty(&description)?);
    } else {
        println!("{}", format_sequence(&description));
    }
    for message in pipeline.errors() {
        error!("{}", message);
    }
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    let imported = YamlImporter.import(&PipelineSource::File(cmd.file.clone().into()));
    let mut errors = imported.errors;
    if let Some(definition) = &imported.definition {
        errors.extend(Tree::build(definition).errors());
    }

    if cmd.json {
        let report = serde_json::json!({
            "file": cmd.file,
            "valid": errors.is_empty(),
            "errors": errors,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if errors.is_empty() { 0 } else { 1 });
    }

    println!("{} Validating {}...", INFO, style(&cmd.file).bold());

    match imported.definition {
        Some(definition) if errors.is_empty() => {
            println!("{} Pipeline definition is valid!", CHECK);
            if let Some(name) = &definition.name {
                println!("  Name: {}", style(name).bold());
            }
            println!("  Steps: {}", style(definition.steps.len()).cyan());
            println!("  Variables: {}", style(definition.environment.len()).cyan());
            println!("  Registries: {}", style(definition.registries.len()).cyan());
            Ok(0)
        }
        _ => {
            println!("{} Validation failed:", CROSS);
            for message in &errors {
                println!("  {}", style(message).red());
            }
            Ok(1)
        }
    }
}

fn describe_pipeline(cmd: &DescribeCommand) -> Result<i32> {
    let imported = YamlImporter.import(&PipelineSource::File(cmd.file.clone().into()));
    let Some(definition) = imported.definition else {
        bail!("{}", imported.errors.join("\n"));
    };

    let tree = Tree::build(&definition);
    let description = tree.describe(tree.root());
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&description)?);
    } else {
        println!(
            "{} {}",
            ROCKET,
            style(definition.name.as_deref().unwrap_or(&cmd.file)).bold()
        );
        for child in description.steps.iter().flatten() {
            println!("{}", format_tree(child));
        }
        let keys = tree.environment_keys();
        if !keys.is_empty() {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            println!("{} Step variables: {}", INFO, style(keys.join(", ")).cyan());
        }
    }
    for message in tree.errors() {
        println!("{} {}", WARN, style(message).yellow());
    }
    Ok(0)
}
