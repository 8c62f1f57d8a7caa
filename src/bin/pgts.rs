//! pgts: PostgreSQL / TimescaleDB operator CLI
//!
//! # Usage
//!
//! ```bash
//! # List tables and columns
//! pgts tables
//! pgts fields readings
//!
//! # Time-series reads
//! pgts latest readings temp humidity
//! pgts downsample readings temp --since 6h --bucket 10s
//!
//! # Show SQL only
//! pgts retention readings --older-than 7d --dry-run
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pgts::config::Config;
use pgts::parser::{parse_days, parse_duration};
use pgts::prelude::*;
use pgts::rows::DEFAULT_SCHEMA;
use pgts::{schema, timeseries};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "PostgreSQL / TimescaleDB time-series toolkit", long_about = None)]
#[command(after_help = "EXAMPLES:
    pgts tables
    pgts range readings temp --since 24h
    pgts interpolate readings temp --since 1h --bucket 30s -f json
    pgts query 'SELECT * FROM readings LIMIT $1::int' --bind 10")]
struct Cli {
    /// Config file (default: ./pgts.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, env = "PGTS_HOST")]
    host: Option<String>,

    #[arg(long, env = "PGTS_PORT")]
    port: Option<u16>,

    #[arg(long, env = "PGTS_USER")]
    user: Option<String>,

    #[arg(long, env = "PGTS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "PGTS_DATABASE")]
    database: Option<String>,

    #[arg(long, env = "PGTS_MAX_CONNECTIONS")]
    max_connections: Option<u32>,

    /// Don't execute, just show the generated SQL
    #[arg(short, long, global = true)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List tables of the public schema
    Tables,
    /// List the columns of a table
    Fields { table: String },
    /// Run a query and print its rows
    Query {
        sql: String,
        /// Parameter bindings ($1, $2, etc.)
        #[arg(short, long, value_delimiter = ',')]
        bind: Vec<String>,
    },
    /// Run a statement and print the affected row count
    Exec {
        sql: String,
        #[arg(short, long, value_delimiter = ',')]
        bind: Vec<String>,
    },
    /// Latest non-null value of each field
    Latest {
        table: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Raw samples over a trailing window
    Range {
        table: String,
        #[arg(required = true)]
        fields: Vec<String>,
        /// Window length, e.g. 30m, 24h, 7d
        #[arg(long)]
        since: Option<String>,
    },
    /// Bucket averages over a trailing window
    Downsample {
        table: String,
        #[arg(required = true)]
        fields: Vec<String>,
        #[arg(long)]
        since: Option<String>,
        /// Bucket width, e.g. 10s, 5m
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Gap-filled bucket averages over a trailing window
    Interpolate {
        table: String,
        #[arg(required = true)]
        fields: Vec<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Delete data older than a whole number of days
    Retention {
        table: String,
        #[arg(long)]
        older_than: Option<String>,
    },
    /// Show pool statistics
    Stat,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgts=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("loading config")?;

    if cli.dry_run {
        return dry_run(&cli.command, &config);
    }

    let driver = Driver::connect(pool_config(&cli, &config)?)
        .await
        .context("connecting")?;
    let result = execute(&cli, &config, &driver).await;
    driver.close().await;
    result
}

fn pool_config(cli: &Cli, config: &Config) -> Result<PoolConfig> {
    let mut db = config.database.clone();
    if let Some(host) = &cli.host {
        db.host = host.clone();
    }
    if let Some(port) = cli.port {
        db.port = port;
    }
    if let Some(user) = &cli.user {
        db.user = user.clone();
    }
    if let Some(password) = &cli.password {
        db.password = Some(password.clone());
    }
    if let Some(database) = &cli.database {
        db.name = database.clone();
    }
    if let Some(max) = cli.max_connections {
        db.max_connections = max;
    }
    Ok(db.pool_config()?)
}

/// Parse a `--bind` value: integer, float, bool, else text.
fn parse_binding(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        Value::BigInt(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Double(f)
    } else if raw == "true" {
        Value::Bool(true)
    } else if raw == "false" {
        Value::Bool(false)
    } else {
        Value::Text(raw.to_string())
    }
}

fn window(since: Option<&String>, fallback: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let span = parse_duration(since.map(String::as_str).unwrap_or(fallback))?;
    let end = Utc::now();
    let start = end - chrono::Duration::from_std(span).context("window too large")?;
    Ok((start, end))
}

fn bucket_secs(bucket: Option<&String>, fallback: &str) -> Result<u64> {
    Ok(parse_duration(bucket.map(String::as_str).unwrap_or(fallback))?.as_secs())
}

/// Statements a command would run, for `--dry-run`.
fn plan(command: &Commands, config: &Config) -> Result<Vec<Statement>> {
    let defaults = &config.defaults;
    let statements = match command {
        Commands::Query { sql, bind } | Commands::Exec { sql, bind } => {
            vec![Statement::new(sql.clone(), bind.iter().map(|b| parse_binding(b)).collect())]
        }
        Commands::Latest { table, fields } => fields
            .iter()
            .map(|f| timeseries::latest_value(table, f))
            .collect(),
        Commands::Range { table, fields, since } => {
            let (start, end) = window(since.as_ref(), &defaults.since)?;
            fields
                .iter()
                .map(|f| timeseries::time_series(table, f, &start, &end))
                .collect()
        }
        Commands::Downsample { table, fields, since, bucket } => {
            let (start, end) = window(since.as_ref(), &defaults.since)?;
            let secs = bucket_secs(bucket.as_ref(), &defaults.bucket)?;
            fields
                .iter()
                .map(|f| timeseries::downsampled(table, f, &start, &end, secs))
                .collect::<DbResult<_>>()?
        }
        Commands::Interpolate { table, fields, since, bucket } => {
            let (start, end) = window(since.as_ref(), &defaults.since)?;
            let secs = bucket_secs(bucket.as_ref(), &defaults.bucket)?;
            fields
                .iter()
                .map(|f| timeseries::interpolated(table, f, &start, &end, secs))
                .collect::<DbResult<_>>()?
        }
        Commands::Retention { table, older_than } => {
            let days = parse_days(older_than.as_deref().unwrap_or(&defaults.retention))?;
            vec![
                schema::retention_drop_chunks(DEFAULT_SCHEMA, table, days)?,
                schema::retention_delete(DEFAULT_SCHEMA, table, days)?,
            ]
        }
        Commands::Tables | Commands::Fields { .. } | Commands::Stat => Vec::new(),
    };
    Ok(statements)
}

fn dry_run(command: &Commands, config: &Config) -> Result<()> {
    let statements = plan(command, config)?;
    if statements.is_empty() {
        println!("{}", "Nothing to show: this command only reads the catalog.".yellow());
        return Ok(());
    }
    println!("{}", "Generated SQL:".green().bold());
    for (i, stmt) in statements.iter().enumerate() {
        println!("\n{}{}:", "Statement ".dimmed(), (i + 1).to_string().cyan());
        println!("  {}", stmt.sql.white());
        if !stmt.params.is_empty() {
            println!("  {}", "Bindings:".cyan());
            for (n, param) in stmt.params.iter().enumerate() {
                println!("    ${} = {}", n + 1, param.to_string().yellow());
            }
        }
    }
    if matches!(command, Commands::Retention { .. }) {
        println!(
            "\n{}",
            "Statement 1 runs on hypertables, statement 2 on plain tables.".dimmed()
        );
    }
    println!("\n{}", "No changes made.".yellow());
    Ok(())
}

async fn execute(cli: &Cli, config: &Config, driver: &Driver) -> Result<()> {
    let defaults = &config.defaults;
    match &cli.command {
        Commands::Tables => {
            for name in driver.get_tables_name().await? {
                println!("{}", name);
            }
        }
        Commands::Fields { table } => {
            let fields = driver.get_fields(table).await?;
            if fields.is_empty() {
                println!("{}", "(no such table)".dimmed());
            }
            for field in fields {
                println!("{:24} {}", field.name.white().bold(), field.datatype.to_string().cyan());
            }
        }
        Commands::Query { sql, bind } => {
            let params: Vec<Value> = bind.iter().map(|b| parse_binding(b)).collect();
            let rows = driver.query(sql, &params).await?;
            print_rows(&rows, &cli.format);
        }
        Commands::Exec { sql, bind } => {
            let params: Vec<Value> = bind.iter().map(|b| parse_binding(b)).collect();
            let affected = driver.exec(sql, &params).await?;
            println!("{} {} rows affected", "✓".green(), affected);
        }
        Commands::Latest { table, fields } => {
            for rows in driver.get_latest_value(fields, table).await? {
                print_rows(&rows, &cli.format);
            }
        }
        Commands::Range { table, fields, since } => {
            let (start, end) = window(since.as_ref(), &defaults.since)?;
            for rows in driver.get_time_series_values(fields, table, &start, &end).await? {
                print_rows(&rows, &cli.format);
            }
        }
        Commands::Downsample { table, fields, since, bucket } => {
            let (start, end) = window(since.as_ref(), &defaults.since)?;
            let secs = bucket_secs(bucket.as_ref(), &defaults.bucket)?;
            for rows in driver
                .get_down_sampled_values(fields, table, &start, &end, secs)
                .await?
            {
                print_rows(&rows, &cli.format);
            }
        }
        Commands::Interpolate { table, fields, since, bucket } => {
            let (start, end) = window(since.as_ref(), &defaults.since)?;
            let secs = bucket_secs(bucket.as_ref(), &defaults.bucket)?;
            for rows in driver
                .get_interpolated_values(fields, table, &start, &end, secs)
                .await?
            {
                print_rows(&rows, &cli.format);
            }
        }
        Commands::Retention { table, older_than } => {
            let days = parse_days(older_than.as_deref().unwrap_or(&defaults.retention))?;
            let removed = driver.delete_values_from_interval(table, days).await?;
            println!(
                "{} {} removed from '{}' (older than {} days)",
                "✓".green(),
                removed,
                table,
                days
            );
        }
        Commands::Stat => {
            let stat = driver.stat();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stat)?),
                OutputFormat::Table => {
                    println!("{:12} {}", "max".dimmed(), stat.max_connections);
                    println!("{:12} {}", "current".dimmed(), stat.current_connections);
                    println!("{:12} {}", "available".dimmed(), stat.available_connections);
                }
            }
        }
    }
    Ok(())
}

fn print_rows(rows: &Rows, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            let objects: Vec<serde_json::Map<String, serde_json::Value>> = rows
                .values
                .iter()
                .map(|tuple| {
                    rows.fields
                        .iter()
                        .zip(tuple)
                        .map(|(f, v)| (f.name.clone(), serde_json::to_value(v).unwrap_or_default()))
                        .collect()
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&objects).unwrap_or_default());
        }
        OutputFormat::Table => {
            if !rows.table_name.is_empty() {
                println!("{}", rows.table_name.cyan().bold());
            }
            if rows.is_empty() {
                println!("{}", "(no results)".dimmed());
                println!();
                return;
            }

            let cells: Vec<Vec<String>> = rows
                .values
                .iter()
                .map(|tuple| tuple.iter().map(Value::to_string).collect())
                .collect();
            let widths: Vec<usize> = rows
                .fields
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    cells
                        .iter()
                        .filter_map(|row| row.get(i))
                        .map(|c| c.chars().count())
                        .fold(f.name.chars().count(), usize::max)
                })
                .collect();

            let header: Vec<String> = rows
                .fields
                .iter()
                .zip(&widths)
                .map(|(f, w)| format!("{:width$}", f.name, width = w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());
            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in &cells {
                let line: Vec<String> = row
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| format!("{:width$}", c, width = w))
                    .collect();
                println!("{}", line.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
            println!();
        }
    }
}
