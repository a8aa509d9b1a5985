mod app;

use anyhow::Result;
use clap::Parser;
use std::io::Write;

use app::{Cli, Command, list_columns, run_import, run_preprocess};
use surveyload::config::LoadOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = std::time::Instant::now();
    match cli.command {
        Command::Columns { input } => {
            let columns = list_columns(&input)?;
            let mut stdout = std::io::stdout().lock();
            for column in columns {
                writeln!(stdout, "{column}")?;
            }
        }
        Command::Preprocess {
            source,
            output,
            format,
            report,
        } => {
            let written = run_preprocess(&source, &output, format, report.as_deref())?;
            tracing::info!(
                "Done! Written {} features in {:.2}s",
                written,
                start.elapsed().as_secs_f64()
            );
        }
        Command::Import {
            source,
            database_url,
            db_schema,
            batch_size,
            report,
        } => {
            let load = LoadOptions {
                batch_size,
                db_schema,
            };
            let rows = run_import(&source, &database_url, load, report.as_deref()).await?;
            tracing::info!(
                "Done! Imported {} rows into '{}' in {:.2}s",
                rows,
                source.table,
                start.elapsed().as_secs_f64()
            );
        }
    }

    Ok(())
}
