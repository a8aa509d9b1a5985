use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use surveyload::coerce::TIMESTAMP_COLUMN;
use surveyload::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_DB_SCHEMA, LoadOptions, NormalizeOptions, SchemaMapping,
};
use surveyload::extract;
use surveyload::load::PostgresDestination;
use surveyload::pipeline::{self, PipelineReport};
use surveyload::sinks::{DataSink, GeoJsonSink, GeoJsonlSink, write_record_set};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the column names a KML or CSV file would produce
    Columns {
        /// Input KML or CSV file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Normalize a file and write a GeoJSON/GeoJSONL preview
    Preprocess {
        #[command(flatten)]
        source: SourceArgs,

        /// Output file (.geojson, .geojsonl), or '-' for GeoJSONL on stdout
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (auto-detected if omitted)
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Write the stage report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Normalize a file and load it into a PostGIS table
    Import {
        #[command(flatten)]
        source: SourceArgs,

        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Schema holding the destination table
        #[arg(long, default_value = DEFAULT_DB_SCHEMA)]
        db_schema: String,

        /// Rows per INSERT statement
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Write the stage report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct SourceArgs {
    /// Input KML or CSV file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Column mapping file (JSON or YAML)
    #[arg(short, long)]
    pub mapping: PathBuf,

    /// Destination table named in the mapping
    #[arg(short, long)]
    pub table: String,

    /// Raw timestamp column split into date and time
    #[arg(long, default_value = TIMESTAMP_COLUMN)]
    pub timestamp_column: String,
}

impl SourceArgs {
    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            timestamp_column: self.timestamp_column.to_lowercase(),
        }
    }

    fn load_mapping(&self) -> Result<SchemaMapping> {
        let mapping = SchemaMapping::load(&self.mapping)?;
        tracing::info!(
            "Config: {} table(s) in {:?}: {}",
            mapping.tables.len(),
            self.mapping,
            mapping.table_names().join(", ")
        );
        Ok(mapping)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum OutputFormat {
    #[value(name = "geojson")]
    GeoJson,
    #[value(name = "geojsonl", alias = "jsonl")]
    GeoJsonl,
}

pub fn output_format_label(format: &OutputFormat) -> &'static str {
    match format {
        OutputFormat::GeoJson => "geojson",
        OutputFormat::GeoJsonl => "geojsonl",
    }
}

/// Explicit format, else the output extension. Stdout is always GeoJSONL.
pub fn detect_format(format: Option<OutputFormat>, output: &Path) -> Result<OutputFormat> {
    if let Some(format) = format {
        return Ok(format);
    }
    if output == Path::new("-") {
        return Ok(OutputFormat::GeoJsonl);
    }
    let ext = output
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("geojson") => Ok(OutputFormat::GeoJson),
        Some("geojsonl") | Some("jsonl") | Some("json") => Ok(OutputFormat::GeoJsonl),
        _ => anyhow::bail!("CLI: Could not detect output format from extension; use --format"),
    }
}

pub fn init_sink(format: &OutputFormat, output: &Path, table: &str) -> Result<Box<dyn DataSink>> {
    match format {
        OutputFormat::GeoJson => {
            if output == Path::new("-") {
                anyhow::bail!(
                    "CLI: GeoJSON output to stdout is not supported; use geojsonl instead"
                );
            }
            tracing::info!("Sink: {} -> {:?}", output_format_label(format), output);
            Ok(Box::new(GeoJsonSink::new(output)?.with_name(table)))
        }
        OutputFormat::GeoJsonl => {
            if output == Path::new("-") {
                tracing::info!("Sink: {} -> stdout", output_format_label(format));
                Ok(Box::new(GeoJsonlSink::stdout()?))
            } else {
                tracing::info!("Sink: {} -> {:?}", output_format_label(format), output);
                Ok(Box::new(GeoJsonlSink::new(output)?))
            }
        }
    }
}

pub fn write_report(path: &Path, report: &PipelineReport) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("CLI: Failed to create report {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("CLI: Failed to write report {:?}", path))?;
    tracing::info!("CLI: report written to {:?}", path);
    Ok(())
}

pub fn list_columns(input: &Path) -> Result<Vec<String>> {
    extract::columns(input).with_context(|| format!("Extract: Failed to read {:?}", input))
}

/// Returns the number of features written.
pub fn run_preprocess(
    source: &SourceArgs,
    output: &Path,
    format: Option<OutputFormat>,
    report_path: Option<&Path>,
) -> Result<usize> {
    let format = detect_format(format, output)?;
    let mapping = source.load_mapping()?;

    let (report, result) = pipeline::preprocess(
        &source.input,
        &mapping,
        &source.table,
        &source.normalize_options(),
    );
    if let Some(path) = report_path {
        write_report(path, &report)?;
    }
    let set = result.with_context(|| format!("Pipeline: preprocessing of {:?} failed", source.input))?;

    // The preview is only created once every stage has succeeded.
    let mut sink = init_sink(&format, output, &source.table)?;
    write_record_set(sink.as_mut(), set).context("Pipeline: Failed to write preview")
}

/// Returns the number of rows loaded.
pub async fn run_import(
    source: &SourceArgs,
    database_url: &str,
    load: LoadOptions,
    report_path: Option<&Path>,
) -> Result<usize> {
    let mapping = source.load_mapping()?;
    let mut destination = PostgresDestination::connect(database_url)
        .await
        .context("Load: Failed to connect to database")?;

    let (report, result) = pipeline::run(
        &mut destination,
        &source.input,
        &mapping,
        &source.table,
        &source.normalize_options(),
        &load,
    )
    .await;
    if let Some(path) = report_path {
        write_report(path, &report)?;
    }
    let loaded = result.with_context(|| format!("Pipeline: import of {:?} failed", source.input))?;
    Ok(loaded.rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(
            detect_format(None, Path::new("out.geojson")).unwrap(),
            OutputFormat::GeoJson
        );
        assert_eq!(
            detect_format(None, Path::new("out.JSONL")).unwrap(),
            OutputFormat::GeoJsonl
        );
        assert_eq!(detect_format(None, Path::new("-")).unwrap(), OutputFormat::GeoJsonl);
        assert!(detect_format(None, Path::new("out.parquet")).is_err());
        assert_eq!(
            detect_format(Some(OutputFormat::GeoJson), Path::new("out.txt")).unwrap(),
            OutputFormat::GeoJson
        );
    }

    #[test]
    fn geojson_to_stdout_is_rejected() {
        assert!(init_sink(&OutputFormat::GeoJson, Path::new("-"), "t").is_err());
    }

    #[test]
    fn parses_import_flags() {
        let cli = Cli::try_parse_from([
            "surveyload",
            "import",
            "-i",
            "survey.kml",
            "-m",
            "schema.json",
            "-t",
            "ocorrencia",
            "--database-url",
            "postgres://localhost/survey",
        ])
        .unwrap();
        match cli.command {
            Command::Import {
                source,
                db_schema,
                batch_size,
                ..
            } => {
                assert_eq!(source.table, "ocorrencia");
                assert_eq!(source.timestamp_column, "when");
                assert_eq!(db_schema, "public");
                assert_eq!(batch_size, 100);
            }
            _ => panic!("expected import"),
        }
    }
}
