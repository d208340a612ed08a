use anyhow::Result;
use clap::Parser;
use meshlink_core::{dispatch_command, resolve_root, Cli, MeshConfig, OutputFormat};
use serde_json::{json, Value};

fn main() {
    let cli = Cli::parse();
    let format = cli.output_format;
    if let Err(err) = run(cli) {
        emit_error(format, &err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = resolve_root(cli.root)?;
    let config = MeshConfig::from_env(root);

    let mut log_cfg = meshlink_logging::fs::read_config(&config.root);
    let _guards = meshlink_logging::init("meshlink", &config.root, &log_cfg)?;
    if cli.verbose {
        log_cfg.enabled = true;
        log_cfg.level = "debug".to_string();
        meshlink_logging::apply(&log_cfg)?;
    }
    if let Err(err) = meshlink_logging::run_retention(&config.root, &log_cfg) {
        tracing::warn!(error = %err, "log_retention_failed");
    }
    tracing::debug!(root = %config.root.display(), command = ?cli.command, "command_started");

    let (message, data) = dispatch_command(&config, cli.command)?;
    emit_success(cli.output_format, message, data)
}

fn emit_success(format: OutputFormat, message: String, data: Value) -> Result<()> {
    emit_payload(format, "ok", message, data)
}

fn emit_error(format: OutputFormat, err: &anyhow::Error) {
    let details: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
    let payload = json!({
        "status": "error",
        "message": err.to_string(),
        "details": details,
        "data": Value::Null,
    });

    match format {
        OutputFormat::Json => println!("{}", payload),
        OutputFormat::Text => {
            eprintln!("Error: {}", err);
            for detail in details.iter().skip(1) {
                eprintln!("  -> {}", detail);
            }
        }
    }
}

fn emit_payload(format: OutputFormat, status: &str, message: String, data: Value) -> Result<()> {
    let payload = json!({
        "status": status,
        "message": message,
        "data": data,
    });

    match format {
        OutputFormat::Json => println!("{}", payload),
        OutputFormat::Text => {
            println!("{}", payload["message"].as_str().unwrap_or_default());
            if !payload["data"].is_null() {
                let pretty = serde_json::to_string_pretty(&payload["data"])?;
                println!("{pretty}");
            }
        }
    }
    Ok(())
}
