use api_shared::{StatusRes, SubmitReq, UpdatePublicationReq};
use clap::{Parser, Subcommand};
use ssv_core::queue::{self, PendingQueue};
use ssv_core::{
    dispatch, open_store, resolve_config, CallbackId, ErrorCatalog, Submission, SubmissionService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ssv")]
#[command(about = "Summary-statistics submission CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the validation error catalog
    Catalog,
    /// Submit a payload from a JSON file
    Submit {
        /// Path to a `{"requestEntries": [...]}` document
        file: PathBuf,
        /// Run validation in this process and print the final status
        #[arg(long)]
        wait: bool,
    },
    /// Print the status of a payload
    Status {
        /// Callback id returned on submission
        callback_id: String,
    },
    /// Attach publication details from a JSON file
    UpdatePublication {
        /// Callback id returned on submission
        callback_id: String,
        /// Path to a `{"requestEntries": [...]}` document
        file: PathBuf,
    },
    /// Delete a payload and its studies
    Delete {
        /// Callback id returned on submission
        callback_id: String,
    },
}

/// Builds the service from the environment.
///
/// The pending side of the queue is returned so that `--wait` can drain it inline; no workers
/// are started in the CLI.
fn build_service() -> Result<(SubmissionService, PendingQueue), Box<dyn std::error::Error>> {
    let cfg = Arc::new(resolve_config(|name| std::env::var(name).ok())?);
    let store = open_store(&cfg)?;
    let backend = dispatch::backend_for(&cfg)?;
    let (handle, pending) = queue::channel();
    let service = SubmissionService::new(
        cfg,
        store,
        Arc::new(ErrorCatalog::seeded()),
        backend,
        handle,
    )?;
    Ok((service, pending))
}

fn print_status(res: &StatusRes) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(res)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("ssv=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Catalog) => {
            for (code, text) in ErrorCatalog::seeded().entries() {
                println!("{:>3}  {}", code, text);
            }
        }
        Some(Commands::Submit { file, wait }) => {
            let req: SubmitReq = serde_json::from_slice(&std::fs::read(&file)?)?;
            let (service, mut pending) = build_service()?;
            match service.submit(&req)? {
                Submission::Accepted(callback_id) => {
                    println!("Accepted payload with callback id: {}", callback_id);
                    if wait {
                        let cancel = CancellationToken::new();
                        while let Some(task) = pending.try_next() {
                            service.run_validation(&task.callback_id, &cancel).await?;
                        }
                        print_status(&service.status(&callback_id)?.into())?;
                    }
                }
                Submission::Rejected {
                    callback_id,
                    errors,
                } => {
                    eprintln!("Rejected payload {}:", callback_id);
                    for error in errors {
                        eprintln!("  {}", error);
                    }
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Status { callback_id }) => {
            let callback_id = CallbackId::parse(&callback_id)?;
            let (service, _pending) = build_service()?;
            print_status(&service.status(&callback_id)?.into())?;
        }
        Some(Commands::UpdatePublication { callback_id, file }) => {
            let callback_id = CallbackId::parse(&callback_id)?;
            let req: UpdatePublicationReq = serde_json::from_slice(&std::fs::read(&file)?)?;
            let (service, _pending) = build_service()?;
            print_status(&service.update_publication(&callback_id, &req)?.into())?;
        }
        Some(Commands::Delete { callback_id }) => {
            let callback_id = CallbackId::parse(&callback_id)?;
            let (service, _pending) = build_service()?;
            let report = service.delete(&callback_id)?;
            println!(
                "Deleted payload {} with {} stud(ies)",
                report.callback_id,
                report.deleted.len()
            );
            for id in report.deleted {
                println!("  {}", id);
            }
        }
        None => {
            println!("Use 'ssv --help' for commands");
        }
    }

    Ok(())
}
