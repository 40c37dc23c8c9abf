use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use diario::db::{self, PgStore};
use diario::lifecycle::{JournalAction, JournalLifecycle, TransitionRequest};
use diario::models::{Actor, Role};
use diario::{performance, report, Config, LifecycleError};

#[derive(Parser)]
#[command(name = "diario")]
#[command(about = "Class journal workflow and report cards", long_about = None)]
struct Cli {
    /// TOML file with policy and connection settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Move a journal through its lifecycle
    Transition {
        #[arg(long)]
        journal: Uuid,
        #[arg(long, value_enum)]
        action: JournalAction,
        #[arg(long)]
        actor: Uuid,
        #[arg(long, value_enum)]
        role: Role,
        /// Observation (return) or justification (request-return)
        #[arg(long)]
        comment: Option<String>,
    },
    /// Compute one student's figures for one journal
    Performance {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        journal: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Generate a student's boletim
    Boletim {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Export a student's boletim as CSV
    Export {
        #[arg(long)]
        student: Uuid,
        #[arg(long, default_value = "boletim.csv")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let pool = db::connect(config.database_url()?, config.max_connections).await?;
    let store = PgStore::new(pool);

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(store.pool()).await?;
            println!("Seed data inserted.");
        }
        Commands::Transition {
            journal,
            action,
            actor,
            role,
            comment,
        } => {
            let lifecycle = JournalLifecycle::new(config.lifecycle);
            let mut request = TransitionRequest::new(action, Actor { id: actor, role });
            if let Some(comment) = comment {
                request = request.with_comment(comment);
            }

            match lifecycle.apply(&store, journal, &request).await {
                Ok(updated) => println!("Journal {} is now {}.", updated.id, updated.status),
                Err(LifecycleError::Violation(violation)) => {
                    anyhow::bail!(
                        "{} is not allowed while the journal is {} ({})",
                        violation.action,
                        violation.current,
                        violation.reason
                    );
                }
                Err(err) if err.is_retryable() => {
                    anyhow::bail!("{err}; fetch the journal again and retry");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Performance {
            student,
            journal,
            json,
        } => {
            let result =
                performance::load_journal_performance(&store, student, journal, &config.performance)
                    .await?
                    .with_context(|| format!("journal {journal} not found"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            for (index, average) in result.bimester_averages.iter().enumerate() {
                match average {
                    Some(value) => println!("{}º bimestre: {value:.1}", index + 1),
                    None => println!("{}º bimestre: {}", index + 1, report::MISSING),
                }
            }
            println!("Média final: {:.2}", result.final_average);
            println!(
                "Frequência: {:.1}% ({} presenças, {} faltas, {} justificadas em {} aulas)",
                result.attendance,
                result.present_count,
                result.absent_count,
                result.excused_count,
                result.total_lessons
            );
            println!("Situação: {}", result.situation);
        }
        Commands::Boletim { student, out, json } => {
            let card = performance::load_report_card(&store, student, &config.performance).await?;
            let rendered = if json {
                serde_json::to_string_pretty(&card)?
            } else {
                report::render_boletim(&card)
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Boletim written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Export { student, out } => {
            let card = performance::load_report_card(&store, student, &config.performance).await?;
            report::export_boletim_csv(&card, &out)?;
            println!("Exported {} subjects to {}.", card.rows.len(), out.display());
        }
    }

    Ok(())
}
