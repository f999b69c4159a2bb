//! Schema Dereferencer CLI
//!
//! Command-line interface for dereferencing JSON Schemas and inspecting the
//! URIs they make addressable.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use schema_deref::{
    dereference, file_uri, index, is_url, load_schema_auto, DerefOptions, Dialect, MergePolicy,
    SourceRetriever,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-deref")]
#[command(about = "Dereference $ref and $dynamicRef in JSON Schemas")]
#[command(version)]
struct Cli {
    /// Log progress to stderr (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dereference a schema and print the result
    Deref {
        #[command(flatten)]
        source: SourceArgs,

        /// How $ref siblings are combined with the referenced schema
        #[arg(long, default_value = "by-keyword", value_parser = parse_merge_policy)]
        merge_policy: MergePolicy,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Fail on cyclic output instead of writing back edges as pointer $refs
        #[arg(long)]
        strict_acyclic: bool,
    },

    /// List every URI the schema makes addressable and what it designates
    Index {
        #[command(flatten)]
        source: SourceArgs,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Schema source: file path or URL (http:// or https://)
    schema: String,

    /// Base URI of the schema (default: the file's file:// URL, or the source URL)
    #[arg(long)]
    base_uri: Option<String>,

    /// Dialect for schemas without $schema (meta-schema URI, or e.g. draft-07, 2020-12)
    #[arg(long, default_value = "2020-12")]
    default_dialect: Dialect,

    /// Local directory containing schema files
    #[arg(long)]
    schema_local_base: Option<PathBuf>,

    /// URL prefix to strip when mapping to local (e.g., https://example.com/schemas)
    #[arg(long, requires = "schema_local_base")]
    schema_remote_base: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Deref {
            source,
            merge_policy,
            output,
            pretty,
            strict_acyclic,
        } => run_deref(&source, merge_policy, output, pretty, strict_acyclic),
        Commands::Index { source, json } => run_index(&source, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_merge_policy(s: &str) -> Result<MergePolicy, String> {
    MergePolicy::parse(s).ok_or_else(|| {
        format!(
            "unknown merge policy '{}' (expected by-keyword, overwrite, none or default)",
            s
        )
    })
}

/// A loaded root schema with everything needed to resolve its references.
struct Loaded {
    schema: Value,
    base_uri: String,
    retriever: SourceRetriever,
}

fn load(source: &SourceArgs) -> Result<Loaded, u8> {
    let schema = load_schema_auto(&source.schema).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let base_uri = match &source.base_uri {
        Some(base) => base.clone(),
        None if is_url(&source.schema) => source.schema.clone(),
        None => file_uri(Path::new(&source.schema)).map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?,
    };

    let base_dir = if is_url(&source.schema) {
        Path::new(".")
    } else {
        Path::new(&source.schema)
            .parent()
            .unwrap_or(Path::new("."))
    };
    let mut retriever = SourceRetriever::new(base_dir);
    if let (Some(local), Some(remote)) = (&source.schema_local_base, &source.schema_remote_base) {
        retriever = retriever.with_url_mapping(local, remote);
    }

    Ok(Loaded {
        schema,
        base_uri,
        retriever,
    })
}

fn run_deref(
    source: &SourceArgs,
    merge_policy: MergePolicy,
    output: Option<PathBuf>,
    pretty: bool,
    strict_acyclic: bool,
) -> Result<(), u8> {
    let loaded = load(source)?;
    let options = DerefOptions::new()
        .base_uri(loaded.base_uri.as_str())
        .retriever(&loaded.retriever)
        .merge_policy(merge_policy)
        .default_dialect(source.default_dialect);

    let graph = dereference(&loaded.schema, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let resolved = if strict_acyclic {
        graph.to_value().map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?
    } else {
        graph.to_value_with_cycle_refs()
    };

    let json_output = if pretty {
        serde_json::to_string_pretty(&resolved)
    } else {
        serde_json::to_string(&resolved)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn run_index(source: &SourceArgs, json_output: bool) -> Result<(), u8> {
    let loaded = load(source)?;
    let schema_index = index(
        &loaded.schema,
        &loaded.base_uri,
        source.default_dialect,
        Some(&loaded.retriever),
    )
    .map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let rows: Vec<(String, String)> = schema_index
        .uris()
        .into_iter()
        .map(|(uri, location)| {
            let document = schema_index.document_uri(location.document);
            (uri, format!("{}#{}", document, location.pointer))
        })
        .collect();

    if json_output {
        let map: serde_json::Map<String, Value> = rows
            .into_iter()
            .map(|(uri, target)| (uri, Value::String(target)))
            .collect();
        println!("{}", Value::Object(map));
    } else {
        for (uri, target) in rows {
            println!("{}\t{}", uri, target);
        }
    }
    Ok(())
}
