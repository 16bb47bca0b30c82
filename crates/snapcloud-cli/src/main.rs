// Snap!Cloud CLI - Command-line client for the project store

mod client;
pub mod payload;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use snapcloud_storage::ArtifactKind;

use client::ApiClient;

/// Snap!Cloud - save, fetch and moderate projects
#[derive(Parser)]
#[command(name = "snapcloud")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the project store server
    #[arg(long, env = "SNAPCLOUD_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Username to act as
    #[arg(long, env = "SNAPCLOUD_USER")]
    user: Option<String>,

    /// Role to claim (moderator or admin)
    #[arg(long, env = "SNAPCLOUD_ROLE")]
    role: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or overwrite one of your projects
    Save {
        /// Project name
        name: String,

        /// Path to the project XML
        #[arg(short, long)]
        document: PathBuf,

        /// Path to the media XML (defaults to an empty media document)
        #[arg(short, long)]
        assets: Option<PathBuf>,

        /// Path to a PNG thumbnail (defaults to the one embedded in the document)
        #[arg(short, long)]
        thumbnail: Option<PathBuf>,

        /// Project notes
        #[arg(long)]
        notes: Option<String>,

        /// Anyone with the link can open the project
        #[arg(long)]
        public: bool,

        /// List the project in public galleries
        #[arg(long)]
        published: bool,

        /// Record the project as a remix of OWNER/NAME (first save only)
        #[arg(long, value_name = "OWNER/NAME")]
        remix_of: Option<String>,
    },
    /// Show project metadata
    Info { owner: String, name: String },
    /// Download an artifact
    Fetch {
        owner: String,
        name: String,

        /// document, assets or thumbnail
        #[arg(long, default_value = "document")]
        artifact: ArtifactKind,

        /// History position: 0 (current), -1 (previous save) or -2 (before today)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        delta: i32,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored history slots
    Versions { owner: String, name: String },
    /// Delete a project (its content is kept until purged or replaced)
    Delete {
        owner: String,
        name: String,

        /// Reason sent to the owner when deleting someone else's project
        #[arg(long)]
        reason: Option<String>,
    },
    /// Share, unshare, publish or unpublish a project
    Visibility {
        owner: String,
        name: String,

        #[arg(long)]
        public: bool,

        #[arg(long)]
        published: bool,

        /// Reason sent to the owner when unpublishing someone else's project
        #[arg(long)]
        reason: Option<String>,
    },
    /// Permanently remove deleted projects (moderators only)
    Purge { owner: String, name: String },
    /// List public remixes of a project
    Remixes {
        owner: String,
        name: String,

        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },
    /// Show where a project was remixed from
    Ancestor { owner: String, name: String },
}

fn main() {
    let cli = Cli::parse();

    let result = ApiClient::new(&cli.server, cli.user, cli.role)
        .and_then(|client| run(&client, cli.command));

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(client: &ApiClient, command: Commands) -> Result<()> {
    match command {
        Commands::Save {
            name,
            document,
            assets,
            thumbnail,
            notes,
            public,
            published,
            remix_of,
        } => {
            let owner = client
                .user()
                .ok_or_else(|| anyhow!("--user (or SNAPCLOUD_USER) is required to save"))?
                .to_string();
            let body = payload::save_body(&payload::SaveArgs {
                document,
                assets,
                thumbnail,
                notes,
                public,
                published,
                remix_of,
            })?;
            handle_save(client, &owner, &name, body)
        }
        Commands::Info { owner, name } => {
            let url = client.project_url(&owner, &name, None, &[])?;
            print_json(&client.get_json(&url)?)
        }
        Commands::Fetch {
            owner,
            name,
            artifact,
            delta,
            output,
        } => handle_fetch(client, &owner, &name, artifact, delta, output),
        Commands::Versions { owner, name } => handle_versions(client, &owner, &name),
        Commands::Delete {
            owner,
            name,
            reason,
        } => {
            let query: Vec<(&str, String)> = reason.into_iter().map(|r| ("reason", r)).collect();
            let url = client.project_url(&owner, &name, None, &query)?;
            client.delete(&url)?;
            println!("{} Deleted {}/{}", "✓".green().bold(), owner, name);
            Ok(())
        }
        Commands::Visibility {
            owner,
            name,
            public,
            published,
            reason,
        } => {
            let url = client.project_url(&owner, &name, Some("visibility"), &[])?;
            let body = json!({ "isPublic": public, "isPublished": published, "reason": reason });
            let project = client.post_json(&url, Some(body))?;
            println!(
                "{} {}/{} is now {}",
                "✓".green().bold(),
                owner,
                name,
                visibility_label(&project)
            );
            Ok(())
        }
        Commands::Purge { owner, name } => {
            let url = client.project_url(&owner, &name, Some("purge"), &[])?;
            let response = client.post_json(&url, None)?;
            println!(
                "{} Purged {} deleted project(s) named {}/{}",
                "✓".green().bold(),
                response["purged"],
                owner,
                name
            );
            Ok(())
        }
        Commands::Remixes {
            owner,
            name,
            page,
            page_size,
        } => handle_remixes(client, &owner, &name, page, page_size),
        Commands::Ancestor { owner, name } => handle_ancestor(client, &owner, &name),
    }
}

fn handle_save(client: &ApiClient, owner: &str, name: &str, body: Value) -> Result<()> {
    let url = client.project_url(owner, name, None, &[])?;
    let response = client.post_json(&url, Some(body))?;

    let verb = if response["created"].as_bool() == Some(true) {
        "Created"
    } else {
        "Saved"
    };
    println!("{} {} {}/{}", "✓".green().bold(), verb, owner, name);
    println!("  Id:      {}", response["id"]);
    if let Some(updated) = response["lastUpdated"].as_str() {
        println!("  Updated: {}", updated);
    }
    Ok(())
}

fn handle_fetch(
    client: &ApiClient,
    owner: &str,
    name: &str,
    artifact: ArtifactKind,
    delta: i32,
    output: Option<PathBuf>,
) -> Result<()> {
    let url = client.project_url(
        owner,
        name,
        Some(artifact.as_str()),
        &[("delta", delta.to_string())],
    )?;
    let bytes = client.get_bytes(&url)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &bytes)
                .map_err(|e| anyhow!("Failed to write '{}': {}", path.display(), e))?;
            println!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

fn handle_versions(client: &ApiClient, owner: &str, name: &str) -> Result<()> {
    let url = client.project_url(owner, name, Some("versions"), &[])?;
    let slots = client.get_json(&url)?;

    for slot in slots.as_array().into_iter().flatten() {
        let artifacts: Vec<&str> = slot["artifacts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect();
        println!(
            "  {}  {}  {}",
            slot["delta"],
            slot["written"].as_str().unwrap_or("unknown"),
            artifacts.join(", ").dimmed()
        );
    }
    Ok(())
}

fn handle_remixes(
    client: &ApiClient,
    owner: &str,
    name: &str,
    page: i64,
    page_size: i64,
) -> Result<()> {
    let url = client.project_url(
        owner,
        name,
        Some("remixes"),
        &[("page", page.to_string()), ("pageSize", page_size.to_string())],
    )?;
    let remixes = client.get_json(&url)?;
    let remixes = remixes.as_array().map(Vec::as_slice).unwrap_or_default();

    if remixes.is_empty() {
        println!("{}", "No public remixes".dimmed());
    }
    for remix in remixes {
        println!(
            "  {}/{}  {}",
            remix["owner"].as_str().unwrap_or_default(),
            remix["name"].as_str().unwrap_or_default().cyan(),
            remix["remixedAt"].as_str().unwrap_or_default().dimmed()
        );
    }
    Ok(())
}

fn handle_ancestor(client: &ApiClient, owner: &str, name: &str) -> Result<()> {
    let url = client.project_url(owner, name, Some("ancestor"), &[])?;
    let response = client.get_json(&url)?;

    if response["isRemix"].as_bool() != Some(true) {
        println!("{}/{} is an original project", owner, name);
    } else if response["available"].as_bool() == Some(true) {
        println!(
            "{}/{} is a remix of {}/{}",
            owner,
            name,
            response["original"]["owner"].as_str().unwrap_or_default(),
            response["original"]["name"].as_str().unwrap_or_default().cyan()
        );
    } else {
        println!(
            "{}/{} is a remix of a project that {}",
            owner,
            name,
            "no longer exists".yellow()
        );
    }
    Ok(())
}

fn visibility_label(project: &Value) -> &'static str {
    match (
        project["isPublic"].as_bool().unwrap_or(false),
        project["isPublished"].as_bool().unwrap_or(false),
    ) {
        (true, true) => "public and published",
        (true, false) => "public",
        (false, true) => "published but not public",
        (false, false) => "private",
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
