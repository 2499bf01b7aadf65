//! smart-engine - SMART active-learning engine CLI
//!
//! Creates projects, ingests uploads, tops up queues, checks data out to
//! annotators, closes finished training runs and reports pipeline status
//! against the database in the root folder. Commands that submit a batch wait for its trigger check before
//! exiting.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use smart_common::config::{self, ROOT_FOLDER_ENV};
use smart_common::db::{init_database, seed_settings};
use smart_common::events::EventBus;
use smart_engine::assignment::{assign_datum, unassign_datum};
use smart_engine::db::queues::Released;
use smart_engine::db::{batches, data, projects};
use smart_engine::ingest::Ingested;
use smart_engine::pipeline::{RecordingTrainer, TermFrequencyVectorizer};
use smart_engine::project_setup::ProjectSpec;
use smart_engine::storage::FsArtifactStore;
use smart_engine::validation::{validate_upload, UploadLimits};
use smart_engine::{Collaborators, Engine, EVENT_BUS_CAPACITY};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "smart-engine", version, about = "SMART active-learning engine")]
struct Cli {
    /// Root folder holding the database and raw uploads
    #[arg(long, env = ROOT_FOLDER_ENV, global = true)]
    root_folder: Option<String>,

    /// Config file (default: ~/.config/smart/config.toml, /etc/smart/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a project and ingest its first upload
    CreateProject {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Creator username
        #[arg(long)]
        creator: String,
        /// Label name (repeat, at least two)
        #[arg(long = "label", required = true)]
        labels: Vec<String>,
        /// Additional annotator username (repeatable)
        #[arg(long = "annotator")]
        annotators: Vec<String>,
        /// CSV or TSV file with a Text,Label header
        #[arg(long)]
        file: PathBuf,
        /// Override the content type guessed from the file extension
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Ingest another upload into an existing project
    Ingest {
        #[arg(long)]
        project: Uuid,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Top up a queue
    Fill {
        #[arg(long)]
        queue: Uuid,
    },
    /// Check out the next queued datum to an annotator
    Assign {
        #[arg(long)]
        project: Uuid,
        /// Annotator username
        #[arg(long)]
        user: String,
    },
    /// Return a checked-out datum to its queue
    Unassign {
        #[arg(long)]
        data: Uuid,
        #[arg(long)]
        user: String,
    },
    /// Record that the project's training finished and open a new training set
    CompleteTraining {
        #[arg(long)]
        project: Uuid,
    },
    /// Show a project's data and pipeline batches
    Status {
        #[arg(long)]
        project: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = config::load_config(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(toml_config.log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting smart-engine {} ({} {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    let root_folder = config::resolve_root_folder(cli.root_folder.as_deref(), &toml_config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db = init_database(&config::database_path(&root_folder)).await?;
    seed_settings(&db, &toml_config.engine).await?;

    let collaborators = Collaborators {
        artifacts: Arc::new(FsArtifactStore::new(config::data_files_dir(&root_folder))),
        vectorizer: Arc::new(TermFrequencyVectorizer::new(db.clone())),
        trainer: Arc::new(RecordingTrainer::new()),
    };
    let engine = Engine::new(
        db,
        toml_config.engine.clone(),
        EventBus::new(EVENT_BUS_CAPACITY),
        collaborators,
    )?;

    let result = run(&engine, cli.command).await;
    engine.shutdown().await;
    result
}

async fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::CreateProject {
            name,
            description,
            creator,
            labels,
            annotators,
            file,
            content_type,
        } => {
            let labels = smart_engine::validation::validate_label_set(&labels)?;
            let upload = read_upload(engine, &file, content_type.as_deref(), &labels).await?;

            let mut conn = engine.db.acquire().await?;
            let creator = projects::get_or_create_profile(&mut *conn, &creator).await?;
            let mut annotator_ids = Vec::with_capacity(annotators.len());
            for username in &annotators {
                let profile = projects::get_or_create_profile(&mut *conn, username).await?;
                annotator_ids.push((profile.id, projects::Permission::Coder));
            }
            drop(conn);

            let spec = ProjectSpec {
                name,
                description,
                creator: creator.id,
                labels,
                annotators: annotator_ids,
            };
            let (setup, ingested) = engine.create_project_with_upload(&spec, &upload).await?;
            println!("project {}", setup.project_id);
            println!("queue {} (length {})", setup.queue_id, setup.queue_length);
            println!("batch size {}", setup.batch_size);
            report_ingested(&ingested).await
        }
        Command::Ingest {
            project,
            file,
            content_type,
        } => {
            let mut conn = engine.db.acquire().await?;
            let labels: Vec<String> = projects::list_labels(&mut *conn, project)
                .await?
                .into_iter()
                .map(|l| l.name)
                .collect();
            drop(conn);

            let upload = read_upload(engine, &file, content_type.as_deref(), &labels).await?;
            let ingested = engine.ingest(project, &upload, None).await?;
            report_ingested(&ingested).await
        }
        Command::Fill { queue } => {
            let outcome = engine.fill_queue(queue).await?;
            println!(
                "inserted {} (occupancy {}/{})",
                outcome.inserted, outcome.occupancy, outcome.length
            );
            Ok(())
        }
        Command::Assign { project, user } => {
            let mut conn = engine.db.acquire().await?;
            let profile = projects::get_or_create_profile(&mut *conn, &user).await?;
            drop(conn);

            match assign_datum(&engine.db, profile.id, project).await? {
                Some(data_id) => println!("assigned {} to {}", data_id, user),
                None => println!("nothing queued for {}", user),
            }
            Ok(())
        }
        Command::Unassign { data, user } => {
            let mut conn = engine.db.acquire().await?;
            let profile = projects::get_or_create_profile(&mut *conn, &user).await?;
            drop(conn);

            match unassign_datum(&engine.db, profile.id, data).await? {
                Released::NotHeld => bail!("{} holds no checkout of {}", user, data),
                Released::Requeued => println!("returned {} to its queue", data),
                Released::Unqueued => println!("queue full, returned {} to the unlabeled pool", data),
            }
            Ok(())
        }
        Command::CompleteTraining { project } => {
            let training_set = engine.complete_training(project).await?;
            println!("training finished, current training set {}", training_set);
            Ok(())
        }
        Command::Status { project } => {
            let mut conn = engine.db.acquire().await?;
            let record = projects::get_project(&mut *conn, project).await?;
            let labeled =
                projects::labeled_count(&mut *conn, project, record.current_training_set).await?;
            drop(conn);

            println!("project {} ({})", record.name, record.id);
            println!("batch size {}", record.batch_size);
            println!(
                "training set {} ({} labeled){}",
                record.current_training_set,
                labeled,
                if record.training_in_progress { ", training" } else { "" }
            );
            if record.training_in_progress {
                println!("run complete-training --project {} once training finishes", record.id);
            }
            println!("data {}", data::count_data(&engine.db, project).await?);
            println!("vectors {}", data::count_vectors(&engine.db, project).await?);
            for batch in batches::list_batches(&engine.db, project).await? {
                println!(
                    "batch {} {} ({}/{} tasks outstanding){}",
                    batch.batch_id,
                    batch.state,
                    batch.outstanding,
                    batch.total_tasks,
                    batch.error.map(|e| format!(": {}", e)).unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}

async fn read_upload(
    engine: &Engine,
    file: &Path,
    content_type: Option<&str>,
    labels: &[String],
) -> Result<smart_engine::validation::ValidatedUpload> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let content_type = content_type.unwrap_or_else(|| guess_content_type(file));

    Ok(validate_upload(
        &bytes,
        content_type,
        labels,
        UploadLimits::from(&engine.config),
    )?)
}

fn guess_content_type(file: &Path) -> &'static str {
    match file.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => "text/tab-separated-values",
        _ => "text/csv",
    }
}

async fn report_ingested(ingested: &Ingested) -> Result<()> {
    let batch = &ingested.batch;
    println!(
        "batch {}: {} data ({} labeled, {} duplicates skipped)",
        batch.batch_id,
        batch.data_ids.len(),
        batch.labeled,
        batch.duplicates_skipped
    );
    if let Some(fill) = batch.fill {
        println!("queued {} (occupancy {}/{})", fill.inserted, fill.occupancy, fill.length);
    }

    let Some(run) = &ingested.pipeline else {
        bail!("batch {} was committed but not submitted to the pipeline", batch.batch_id);
    };
    let status = run.wait().await;
    println!("trigger check {}", status);
    Ok(())
}
