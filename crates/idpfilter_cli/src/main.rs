//! Attribute filter CLI
//!
//! Runs a policy file against a request file and prints the released
//! attributes.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod request;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use idpfilter_core::IdpAttribute;
use idpfilter_policy::{EngineConfig, FilterOutcome};
use request::RequestFile;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "idpfilter")]
#[command(about = "Identity provider attribute filter", long_about = None)]
struct Cli {
    /// Log engine decisions at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a request's attributes
    Filter {
        /// Path to policy file
        #[arg(short, long)]
        policy: PathBuf,
        /// Path to request file
        #[arg(short, long)]
        request: PathBuf,
        /// Pretty-print output
        #[arg(long)]
        pretty: bool,
    },
    /// Check that a policy file builds
    Validate {
        /// Path to policy file
        #[arg(short, long)]
        policy: PathBuf,
    },
}

/// Output of the `filter` command
#[derive(Debug, Serialize)]
struct FilterReport {
    attributes: Vec<IdpAttribute>,
    #[serde(flatten)]
    outcome: FilterOutcome,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "idpfilter_policy=debug,idpfilter=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn filter(policy: &Path, request: &Path, pretty: bool) -> Result<String> {
    let engine = EngineConfig::from_path(policy)?.build()?;
    let text = std::fs::read_to_string(request)
        .wrap_err_with(|| format!("reading request {}", request.display()))?;
    let request: RequestFile = serde_json::from_str(&text).wrap_err("parsing request")?;

    let mut ctx = request.into_context();
    let outcome = engine.filter_attributes(&mut ctx)?;
    tracing::info!(
        released = outcome.released.len(),
        dropped = outcome.dropped.len(),
        failed = outcome.failed.len(),
        "filtering complete"
    );
    let report = FilterReport {
        attributes: ctx.filtered_attributes().values().cloned().collect(),
        outcome,
    };

    let out = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    Ok(out)
}

fn validate(policy: &Path) -> Result<String> {
    let engine = EngineConfig::from_path(policy)?.build()?;
    Ok(format!(
        "{}: {} policies OK",
        policy.display(),
        engine.policies().len()
    ))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let output = match cli.command {
        Commands::Filter { policy, request, pretty } => filter(&policy, &request, pretty)?,
        Commands::Validate { policy } => validate(&policy)?,
    };
    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const POLICY: &str = r#"{
        "policies": [{
            "id": "releaseAffiliation",
            "requirement": { "type": "matches_all" },
            "rules": [{ "attribute_id": "affiliation", "permit": { "type": "value_regex", "pattern": "employee|staff" } }]
        }]
    }"#;

    const REQUEST: &str = r#"{
        "attributes": [
            { "id": "uid", "values": [{ "type": "string", "value": "jsmith" }] },
            { "id": "affiliation", "values": [
                { "type": "string", "value": "employee" },
                { "type": "string", "value": "illegalValue" }
            ]}
        ]
    }"#;

    fn file(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["idpfilter", "-v", "filter", "-p", "policy.json", "-r", "req.json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Filter { pretty: false, .. }));
    }

    #[test]
    fn test_filter_command() {
        let policy = file(POLICY);
        let request = file(REQUEST);
        let out = filter(policy.path(), request.path(), false).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["attributes"][0]["id"], "affiliation");
        assert_eq!(json["attributes"][0]["values"].as_array().unwrap().len(), 1);
        assert_eq!(json["released"][0], "affiliation");
        assert_eq!(json["dropped"][0], "uid");
    }

    #[test]
    fn test_validate_command() {
        let policy = file(POLICY);
        let out = validate(policy.path()).unwrap();
        assert!(out.ends_with("1 policies OK"));
    }

    #[test]
    fn test_invalid_policy_fails() {
        let policy = file(r#"{"policies":[{"id":"p","requirement":{"type":"and","rules":[]}}]}"#);
        assert!(validate(policy.path()).is_err());
    }

    #[test]
    fn test_failing_policy_is_error() {
        let policy = file(r#"{"policies":[{"id":"p","requirement":{"type":"fail"}}]}"#);
        let request = file(REQUEST);
        let err = filter(policy.path(), request.path(), true).unwrap_err();
        assert!(err.to_string().contains("policy requirement rule failed"));
    }
}
