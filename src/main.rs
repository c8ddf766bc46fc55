//! fairinfer - command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fairinfer::{
    Config, InferenceError, InferenceOrchestrator, InputPayload, RunModelError,
    metadata::{FairModelsClient, MetadataProvider},
    orchestrator::network,
    runtime::DockerRuntime,
};

#[derive(Parser, Debug)]
#[command(name = "fairinfer")]
#[command(about = "Run FAIRmodels inference workloads in ephemeral Docker containers")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one inference against a container image
    Run {
        /// Image reference, e.g. ghcr.io/org/model:1.0
        #[arg(long)]
        image: String,

        /// Input payload: a JSON object, or @path to a file containing one
        #[arg(long)]
        input: String,
    },

    /// Resolve a model's image from its metadata, then run one inference
    Model {
        model_id: String,

        /// Input payload: a JSON object, or @path to a file containing one
        #[arg(long)]
        input: String,
    },

    /// Show a model's name, image and input variables
    Describe { model_id: String },

    /// List models in the catalogue
    List,

    /// Show the detected network topology
    Networks,
}

/// Parse `<json | @file>` into a payload before any container is started.
fn read_payload(arg: &str) -> anyhow::Result<InputPayload> {
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            let path = PathBuf::from(path);
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read input file {}", path.display()))?
        }
        None => arg.to_string(),
    };
    text.parse::<InputPayload>().map_err(anyhow::Error::msg)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Structured error document for inference failures.
fn inference_error_json(err: &InferenceError) -> serde_json::Value {
    let mut body = json!({
        "kind": err.kind(),
        "message": err.to_string(),
    });
    if let Some(logs) = err.logs() {
        body["logs"] = json!(logs);
    }
    json!({ "error": body })
}

fn report_inference(
    outcome: Result<serde_json::Value, InferenceError>,
) -> anyhow::Result<ExitCode> {
    match outcome {
        Ok(result) => {
            print_json(&result)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            print_json(&inference_error_json(&e))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(args: Args, config: Config) -> anyhow::Result<ExitCode> {
    match args.command {
        Command::Run { image, input } => {
            let payload = read_payload(&input)?;
            let orchestrator = InferenceOrchestrator::connect(config.executor).await?;
            report_inference(orchestrator.run_inference(&image, &payload).await)
        }
        Command::Model { model_id, input } => {
            let payload = read_payload(&input)?;
            let provider = FairModelsClient::new(config.metadata)?;
            let orchestrator = InferenceOrchestrator::connect(config.executor).await?;
            match orchestrator.run_model(&provider, &model_id, &payload).await {
                Ok(result) => report_inference(Ok(result)),
                Err(RunModelError::Inference(e)) => report_inference(Err(e)),
                Err(RunModelError::Metadata(e)) => Err(e.into()),
            }
        }
        Command::Describe { model_id } => {
            let provider = FairModelsClient::new(config.metadata)?;
            let metadata = provider.fetch(&model_id).await?;
            print_json(&serde_json::to_value(&metadata)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::List => {
            let provider = FairModelsClient::new(config.metadata)?;
            let models = provider.list_models().await?;
            print_json(&serde_json::to_value(&models)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Networks => {
            let runtime = DockerRuntime::connect().await?;
            let topology = network::detect(&runtime).await;
            print_json(&json!({
                "mode": if topology.is_host() { "host" } else { "network" },
                "networks": topology.networks(),
            }))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // stdout carries the result JSON; logs go to stderr
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fairinfer=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let config = Config::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    run(args, config).await
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn payload_inline_and_from_file() {
        let inline = read_payload(r#"{"age": 70}"#).unwrap();
        assert_eq!(inline.len(), 1);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sex": "female", "age": 55}}"#).unwrap();
        let from_file = read_payload(&format!("@{}", file.path().display())).unwrap();
        let names: Vec<&str> = from_file.names().collect();
        assert_eq!(names, vec!["sex", "age"]);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = read_payload("[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("JSON object"), "got: {err}");
        assert!(read_payload("@/definitely/not/here.json").is_err());
    }

    #[test]
    fn inference_errors_render_with_kind_and_logs() {
        let err = InferenceError::ContainerExited {
            container: "fairinfer-x".to_string(),
            status: "exited".to_string(),
            logs: "ImportError: torch".to_string(),
        };
        let doc = inference_error_json(&err);
        assert_eq!(doc["error"]["kind"], "container_exited");
        assert_eq!(doc["error"]["logs"], "ImportError: torch");

        let err = InferenceError::PredictionFailed {
            message: "bad input".to_string(),
        };
        let doc = inference_error_json(&err);
        assert!(doc["error"].get("logs").is_none());
    }
}
