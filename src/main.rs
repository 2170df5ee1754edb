use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser};

use roundtrip_qa::ir::{Request, RequestResult};
use roundtrip_qa::pipeline::{init_default_config, LocalPipeline, PipelineConfig};
use roundtrip_qa::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "roundtrip-qa")]
#[command(
    about = "EN->RU translation with back-translation refinement and QA verification (local GGUF backends)",
    long_about = None
)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Request JSON file: {"text": ..., "question": ...} or an array of such
    /// objects (default: read stdin)
    #[arg(value_name = "JSON")]
    input: Option<PathBuf>,

    /// Result JSON file (default: stdout)
    #[arg(short, long, value_name = "JSON")]
    output: Option<PathBuf>,

    /// Config file path (default: search for roundtrip-qa.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Translation backend name from config
    #[arg(long)]
    translate_backend: Option<String>,

    /// QA backend name from config
    #[arg(long)]
    qa_backend: Option<String>,

    /// Translation model GGUF (overrides translate_backend)
    #[arg(long)]
    translate_model: Option<PathBuf>,

    /// QA model GGUF (overrides qa_backend)
    #[arg(long)]
    qa_model: Option<PathBuf>,

    /// Maximum refinement iterations
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Round-trip similarity at which refinement stops early
    #[arg(long)]
    similarity_threshold: Option<f32>,

    /// Threads for llama.cpp (default: -1 = auto)
    #[arg(long)]
    threads: Option<i32>,

    /// GPU layers for llama.cpp (default: -1 = auto/offload as much as possible)
    #[arg(long)]
    gpu_layers: Option<i32>,

    /// Context size for the translation model
    #[arg(long)]
    ctx_translate: Option<u32>,

    /// Context size for the QA model
    #[arg(long)]
    ctx_qa: Option<u32>,

    /// Suppress progress output on stderr
    #[arg(long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let raw = match args.input.as_ref() {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("read request: {}", p.display()))?,
        None => {
            let mut stdin = std::io::stdin();
            if stdin.is_terminal() {
                let mut cmd = Args::command();
                cmd.print_help().context("print help")?;
                eprintln!(
                    "\n\nUSAGE:\n  roundtrip-qa request.json\n  echo '{{\"text\":\"...\",\"question\":\"...\"}}' | roundtrip-qa\n\nTIPS:\n  - Default config search: roundtrip-qa.toml (upwards), or set ROUNDTRIP_QA_CONFIG.\n  - Run `roundtrip-qa --init-config` once to write the default config and prompts.\n"
                );
                return Ok(());
            }
            let mut buf = String::new();
            stdin.read_to_string(&mut buf).context("read stdin")?;
            buf
        }
    };

    let (requests, batch) = parse_requests(&raw)?;
    for (i, request) in requests.iter().enumerate() {
        request
            .validate()
            .with_context(|| format!("invalid request #{}", i + 1))?;
    }

    let workdir = args
        .input
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let cfg = PipelineConfig::from_paths_and_args(
        &workdir,
        args.config,
        args.translate_backend,
        args.qa_backend,
        args.translate_model,
        args.qa_model,
        args.max_iterations,
        args.similarity_threshold,
        args.threads,
        args.gpu_layers,
        args.ctx_translate,
        args.ctx_qa,
    )
    .context("build config")?;

    let mut pipeline = LocalPipeline::load(&cfg, progress)?;

    let results: Vec<RequestResult> = requests.iter().map(|r| pipeline.process(r)).collect();

    let json = if batch {
        serde_json::to_string_pretty(&results).context("serialize results")?
    } else {
        serde_json::to_string_pretty(&results[0]).context("serialize result")?
    };

    match args.output {
        Some(p) => std::fs::write(&p, json.as_bytes())
            .with_context(|| format!("write output: {}", p.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

/// One request object, or an array of them for batch runs.
fn parse_requests(raw: &str) -> anyhow::Result<(Vec<Request>, bool)> {
    let value: serde_json::Value = serde_json::from_str(raw).context("parse request json")?;
    match value {
        serde_json::Value::Array(items) => {
            if items.is_empty() {
                return Err(anyhow!("empty request array"));
            }
            let requests = items
                .into_iter()
                .map(|v| serde_json::from_value::<Request>(v).context("parse request object"))
                .collect::<anyhow::Result<Vec<Request>>>()?;
            Ok((requests, true))
        }
        obj @ serde_json::Value::Object(_) => Ok((
            vec![serde_json::from_value(obj).context("parse request object")?],
            false,
        )),
        _ => Err(anyhow!("request json must be an object or an array of objects")),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_requests;

    #[test]
    fn single_object_parses_as_non_batch() {
        let (requests, batch) =
            parse_requests(r#"{"text":"Some text.","question":"Where?"}"#).expect("parse");
        assert!(!batch);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, "Some text.");
    }

    #[test]
    fn array_parses_as_batch() {
        let (requests, batch) = parse_requests(
            r#"[{"text":"a","question":"q1"},{"text":"b","question":"q2","reference_answer":"r"}]"#,
        )
        .expect("parse");
        assert!(batch);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].reference_answer.as_deref(), Some("r"));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(parse_requests("not json").is_err());
        assert!(parse_requests("[]").is_err());
        assert!(parse_requests("42").is_err());
    }
}
