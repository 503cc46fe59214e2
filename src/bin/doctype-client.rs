//! DocType Client CLI
//!
//! Command-line interface for a DocType document backend: session handling,
//! record listing and editing, and offline render-plan tooling.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use doctype_client::{render_plan, validate_document, DocTypeMeta, Document, IdentityStore};

#[cfg(feature = "remote")]
use doctype_client::{
    sign_out, CachedIdentity, Client, ClientConfig, DocumentResource, ListResource,
};

#[derive(Parser)]
#[command(name = "doctype-client")]
#[command(about = "Metadata-driven admin client for DocType backends")]
#[command(version)]
struct Cli {
    /// Backend base URL (e.g. https://erp.example.com)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Path of the cached identity file
    #[arg(long, global = true, default_value = "doctype-identity.json")]
    identity_file: PathBuf,

    /// Log in before running the command
    #[arg(long, global = true, requires = "pwd")]
    usr: Option<String>,

    /// Password for --usr
    #[arg(long, global = true, requires = "usr")]
    pwd: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Establish a session and cache the identity locally
    #[cfg(feature = "remote")]
    Login {
        /// Login user (usually an email address)
        user: String,

        /// Password
        password: String,
    },

    /// End the session and clear the cached identity
    #[cfg(feature = "remote")]
    Logout,

    /// Show the locally cached identity
    Whoami,

    /// Request account creation
    #[cfg(feature = "remote")]
    Signup {
        email: String,

        full_name: String,
    },

    /// List records of a schema
    #[cfg(feature = "remote")]
    List {
        /// Schema identifier (DocType name)
        schema: String,

        /// Fields to project (repeatable)
        #[arg(long = "field", default_values_t = vec!["name".to_string(), "modified".to_string()])]
        fields: Vec<String>,

        /// Filter as key=value (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Follow pagination to the end instead of the first page
        #[arg(long)]
        all: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Fetch one record by identity
    #[cfg(feature = "remote")]
    Get {
        schema: String,

        name: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Create or update a record from a JSON document file
    #[cfg(feature = "remote")]
    Save {
        schema: String,

        /// Document file; a missing or empty "name" creates a new record
        doc: PathBuf,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Delete a record by identity
    #[cfg(feature = "remote")]
    Delete { schema: String, name: String },

    /// Workflow-submit a record by identity
    #[cfg(feature = "remote")]
    Submit {
        schema: String,

        name: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Fetch the metadata of a schema
    #[cfg(feature = "remote")]
    Meta {
        schema: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Compute the render plan for a document under a metadata file
    Plan {
        /// Metadata file (DocTypeMeta JSON)
        meta: PathBuf,

        /// Document file; an empty document when omitted
        doc: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check a document's shape against a metadata file
    Validate {
        /// Metadata file (DocTypeMeta JSON)
        meta: PathBuf,

        /// Document file
        doc: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run(cli: Cli) -> Result<(), u8> {
    let store = IdentityStore::new(&cli.identity_file);

    match &cli.command {
        #[cfg(feature = "remote")]
        Commands::Login { user, password } => {
            let client = connect(&cli)?;
            let response = client.login(user, password).map_err(report)?;
            let identity = CachedIdentity {
                name: response.full_name.clone().unwrap_or_else(|| user.clone()),
                email: user.clone(),
                roles: Vec::new(),
            };
            store.store(&identity).map_err(|e| {
                eprintln!("Error: {}", e);
                3u8
            })?;
            println!("Logged in as {}", identity.name);
            Ok(())
        }

        #[cfg(feature = "remote")]
        Commands::Logout => {
            let client = connect(&cli)?;
            sign_out(&client, &store);
            println!("Logged out");
            Ok(())
        }

        Commands::Whoami => match store.load() {
            Some(identity) => {
                println!("{} <{}>", identity.name, identity.email);
                Ok(())
            }
            None => {
                eprintln!("Not logged in");
                Err(1)
            }
        },

        #[cfg(feature = "remote")]
        Commands::Signup { email, full_name } => {
            let client = connect(&cli)?;
            client.sign_up(email, full_name, None).map_err(report)?;
            println!("Account requested for {}", email);
            Ok(())
        }

        #[cfg(feature = "remote")]
        Commands::List {
            schema,
            fields,
            filters,
            all,
            pretty,
        } => {
            let client = authenticated(&cli)?;
            let filters = parse_filters(filters)?;
            let mut list = ListResource::new(&client, schema.clone(), fields.clone(), filters);

            list.reload();
            while *all && list.error().is_none() && list.has_next_page() {
                list.next();
            }
            if let Some(error) = list.error() {
                eprintln!("Error: {}", error);
                return Err(3);
            }

            let items: Vec<Value> = list
                .items()
                .unwrap_or_default()
                .iter()
                .map(Document::to_json)
                .collect();
            print_json(&Value::Array(items), *pretty)
        }

        #[cfg(feature = "remote")]
        Commands::Get {
            schema,
            name,
            pretty,
        } => {
            let client = authenticated(&cli)?;
            let doc = client.get_record(schema, name).map_err(report)?;
            print_json(&doc.to_json(), *pretty)
        }

        #[cfg(feature = "remote")]
        Commands::Save {
            schema,
            doc,
            pretty,
        } => {
            let client = authenticated(&cli)?;
            let doc = read_document(doc)?;
            let saved = client.save_record(schema, &doc).map_err(report)?;
            print_json(&saved.to_json(), *pretty)
        }

        #[cfg(feature = "remote")]
        Commands::Delete { schema, name } => {
            let client = authenticated(&cli)?;
            client.delete_record(schema, name).map_err(report)?;
            println!("Deleted {}/{}", schema, name);
            Ok(())
        }

        #[cfg(feature = "remote")]
        Commands::Submit {
            schema,
            name,
            pretty,
        } => {
            let client = authenticated(&cli)?;
            let meta = client.fetch_meta(schema);
            let mut resource = DocumentResource::open(&client, schema.clone(), name, meta);
            if resource.error().is_none() {
                resource.submit();
            }
            if let Some(error) = resource.error() {
                eprintln!("Error: {}", error);
                return Err(3);
            }
            let doc = resource.doc().expect("submitted document present");
            print_json(&doc.to_json(), *pretty)
        }

        #[cfg(feature = "remote")]
        Commands::Meta { schema, pretty } => {
            let client = authenticated(&cli)?;
            match client.fetch_meta(schema) {
                Some(meta) => {
                    let value = serde_json::to_value(&meta).map_err(|e| {
                        eprintln!("Error: {}", e);
                        2u8
                    })?;
                    print_json(&value, *pretty)
                }
                None => {
                    eprintln!("Error: no metadata available for {}", schema);
                    Err(2)
                }
            }
        }

        Commands::Plan { meta, doc, pretty } => {
            let meta = read_meta(meta)?;
            let doc = match doc {
                Some(path) => read_document(path)?,
                None => Document::new(),
            };
            let plan = render_plan(&meta, &doc);
            let value = serde_json::to_value(&plan).map_err(|e| {
                eprintln!("Error: {}", e);
                2u8
            })?;
            print_json(&value, *pretty)
        }

        Commands::Validate { meta, doc } => {
            let meta = read_meta(meta)?;
            let doc = read_document(doc)?;
            let violations = validate_document(&meta, &doc);
            if violations.is_empty() {
                println!("Valid");
                Ok(())
            } else {
                eprintln!("Shape violations:");
                for violation in &violations {
                    eprintln!("  {}", violation);
                }
                Err(1)
            }
        }
    }
}

#[cfg(feature = "remote")]
fn connect(cli: &Cli) -> Result<Client, u8> {
    let Some(base_url) = &cli.base_url else {
        eprintln!("Error: --base-url is required for this command");
        return Err(2);
    };
    Client::new(ClientConfig::new(base_url.clone())).map_err(report)
}

/// Connect and, when credentials were given, establish a session first.
#[cfg(feature = "remote")]
fn authenticated(cli: &Cli) -> Result<Client, u8> {
    let client = connect(cli)?;
    if let (Some(usr), Some(pwd)) = (&cli.usr, &cli.pwd) {
        client.login(usr, pwd).map_err(report)?;
    }
    Ok(client)
}

#[cfg(feature = "remote")]
fn report(e: doctype_client::ClientError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

/// Parse repeated `key=value` filter flags into a filter mapping.
#[cfg(feature = "remote")]
fn parse_filters(raw: &[String]) -> Result<serde_json::Map<String, Value>, u8> {
    let mut filters = serde_json::Map::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            eprintln!("Error: invalid filter '{}': expected key=value", entry);
            return Err(2);
        };
        filters.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(filters)
}

fn read_meta(path: &PathBuf) -> Result<DocTypeMeta, u8> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: cannot read {}: {}", path.display(), e);
        3u8
    })?;
    serde_json::from_str(&content).map_err(|e| {
        eprintln!("Error: invalid metadata in {}: {}", path.display(), e);
        2u8
    })
}

fn read_document(path: &PathBuf) -> Result<Document, u8> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: cannot read {}: {}", path.display(), e);
        3u8
    })?;
    serde_json::from_str(&content).map_err(|e| {
        eprintln!("Error: invalid document in {}: {}", path.display(), e);
        2u8
    })
}

fn print_json(value: &Value, pretty: bool) -> Result<(), u8> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}
