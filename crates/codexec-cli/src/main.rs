use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use codexec_core::config::{CodeExecutionSettings, ConfigLoader, ExecutorBackend};
use codexec_core::context::{CodeExecutorContext, InvocationContext, Session};
use codexec_core::core_types::{CodeExecutionFile, CodeExecutionInput, CodeExecutionResult};
use codexec_core::delimiters::{filter_by_language, DelimiterParser};
use codexec_core::executors::{create_executor, CodeExecutor};
use codexec_core::processor::CodeExecutionProcessor;
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(name = "codexec", author, version = "0.1.0", about = "Run model-generated code blocks")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, help = "YAML settings file")]
    config: Option<PathBuf>,

    #[clap(long, value_parser = parse_backend, help = "Executor backend: builtin, local or docker")]
    backend: Option<ExecutorBackend>,

    #[clap(long, help = "Allow the local backend to run code on this host")]
    allow_unsafe: bool,

    #[clap(long, help = "Container image for the docker backend")]
    image: Option<String>,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Write logs to this file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a source file or an inline snippet
    Run {
        #[clap(help = "Source file to execute")]
        file: Option<PathBuf>,

        #[clap(long, help = "Inline code to execute instead of a file")]
        code: Option<String>,

        #[clap(long, help = "Language hint (python, go, javascript, bash)")]
        language: Option<String>,

        #[clap(long, help = "Timeout in seconds for this call")]
        timeout: Option<u64>,

        #[clap(long = "input", help = "File to stage into the working directory")]
        inputs: Vec<PathBuf>,
    },
    /// Print the code blocks found in stdin as JSON
    Extract {
        #[clap(long = "language", help = "Only keep blocks in these languages")]
        languages: Vec<String>,
    },
    /// Execute the first code block in a model response read from stdin
    Respond {
        #[clap(long = "input", help = "File to stage into the working directory")]
        inputs: Vec<PathBuf>,

        #[clap(long, help = "Print the resulting session state to stderr")]
        show_state: bool,
    },
}

fn parse_backend(value: &str) -> Result<ExecutorBackend, String> {
    match value.to_lowercase().as_str() {
        "builtin" | "built-in" => Ok(ExecutorBackend::Builtin),
        "local" => Ok(ExecutorBackend::Local),
        "docker" | "container" => Ok(ExecutorBackend::Docker),
        other => Err(format!("unknown backend '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let settings = load_settings(&cli).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, cancelling execution");
            ctrl_c.cancel();
        }
    });

    let exit_code = match cli.command {
        Commands::Extract { languages } => extract(&settings, &languages).await?,
        Commands::Run {
            file,
            code,
            language,
            timeout,
            inputs,
        } => {
            let executor = build_executor(&settings).await?;
            let outcome = run(&cancel, executor.clone(), file, code, language, timeout, inputs).await;
            release(executor.as_ref()).await;
            outcome?
        }
        Commands::Respond { inputs, show_state } => {
            let executor = build_executor(&settings).await?;
            let outcome = respond(&cancel, executor.clone(), inputs, show_state).await;
            release(executor.as_ref()).await;
            outcome?
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn build_executor(settings: &CodeExecutionSettings) -> Result<Arc<dyn CodeExecutor>> {
    create_executor(settings)
        .await
        .context("Failed to create code executor")
}

async fn release(executor: &dyn CodeExecutor) {
    if let Err(e) = executor.close().await {
        log::warn!("Failed to release executor resources: {}", e);
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level_filter);
    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

async fn load_settings(cli: &Cli) -> Result<CodeExecutionSettings> {
    let mut settings = match &cli.config {
        Some(path) => ConfigLoader::from_file(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CodeExecutionSettings::default(),
    };
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if cli.allow_unsafe {
        settings.local.allow_unsafe_execution = true;
    }
    if let Some(image) = &cli.image {
        settings.container.image = Some(image.clone());
    }
    Ok(settings)
}

fn new_invocation() -> InvocationContext {
    let id = uuid::Uuid::new_v4().to_string();
    InvocationContext::new(id.clone(), Arc::new(Session::in_memory(id)))
}

async fn read_inputs(paths: &[PathBuf]) -> Result<Vec<CodeExecutionFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Input path {} has no file name", path.display()))?;
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(CodeExecutionFile::new(name, content));
    }
    Ok(files)
}

async fn read_stdin() -> Result<String> {
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("Failed to read stdin")?;
    Ok(text)
}

fn print_result(result: &CodeExecutionResult) {
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if let Some(error) = &result.error {
        eprintln!("{}", error.message);
    }
    for file in &result.output_files {
        eprintln!("output file: {} ({} bytes)", file.name, file.size);
    }
}

async fn run(
    cancel: &CancellationToken,
    executor: Arc<dyn CodeExecutor>,
    file: Option<PathBuf>,
    code: Option<String>,
    language: Option<String>,
    timeout: Option<u64>,
    inputs: Vec<PathBuf>,
) -> Result<i32> {
    let code = match (code, &file) {
        (Some(code), _) => code,
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => bail!("Pass a source file or --code"),
    };
    let language = language.or_else(|| {
        file.as_ref()
            .and_then(|path| path.extension())
            .map(|ext| ext.to_string_lossy().into_owned())
    });

    let mut input = CodeExecutionInput::new(code);
    input.language = language;
    input.timeout = timeout.map(Duration::from_secs);
    input.input_files = read_inputs(&inputs).await?;

    let invocation = new_invocation();
    match executor.execute_code(cancel, &invocation, input).await {
        Ok(Some(result)) => {
            print_result(&result);
            Ok(0)
        }
        Ok(None) => {
            eprintln!("This backend delegates execution to the model provider; nothing ran locally");
            Ok(0)
        }
        Err(e) => match e.partial_result() {
            Some(result) => {
                print_result(result);
                Ok(i32::try_from(result.exit_code).unwrap_or(1).max(1))
            }
            None => Err(e.into()),
        },
    }
}

async fn extract(settings: &CodeExecutionSettings, languages: &[String]) -> Result<i32> {
    let config = settings.execution.to_execution_config()?;
    let text = read_stdin().await?;
    let parser = DelimiterParser::new(&config.code_block_delimiters)?;
    let blocks = filter_by_language(parser.extract_code_blocks(&text), languages);
    println!("{}", serde_json::to_string_pretty(&blocks)?);
    Ok(0)
}

async fn respond(
    cancel: &CancellationToken,
    executor: Arc<dyn CodeExecutor>,
    inputs: Vec<PathBuf>,
    show_state: bool,
) -> Result<i32> {
    let text = read_stdin().await?;
    let invocation = new_invocation();
    let files = read_inputs(&inputs).await?;
    if !files.is_empty() {
        let context = CodeExecutorContext::from_invocation(Some(&invocation))
            .context("Invocation has no session")?;
        context.add_input_files(files);
    }

    let processor = CodeExecutionProcessor::new(executor)?;
    let output = processor
        .process_model_output(cancel, &invocation, &text)
        .await?;
    println!("{}", output.response());
    if show_state {
        eprintln!("{}", serde_json::to_string_pretty(&output.state_delta)?);
    }

    Ok(match &output.result {
        Some(result) if !result.is_success() => 1,
        _ => 0,
    })
}
