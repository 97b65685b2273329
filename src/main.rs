//! sql-provider - command-line entry point.
//!
//! Opens one provider from flags/environment, runs a single subcommand and
//! closes the pool.

use std::process::ExitCode;

use sql_provider::config::{Command, Config, OutputFormat};
use sql_provider::db::build_paginated_query;
use sql_provider::format::format_row_set;
use sql_provider::models::{DatabaseType, PaginatedQuerySpec, TableDescription};
use sql_provider::{DatabaseProvider, DbError};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse_args();
    init_tracing(&config);

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> Result<(), DbError> {
    let db_type = DatabaseType::from(config.db_type);

    // Generating SQL needs no connection, so it works for every dialect.
    if let Command::Paginate {
        sql,
        page,
        page_size,
        dry_run: true,
    } = &config.command
    {
        let spec = PaginatedQuerySpec::new(sql.as_str(), *page, *page_size, db_type);
        println!("{}", build_paginated_query(&spec)?);
        return Ok(());
    }

    let provider = DatabaseProvider::open(config.provider_config()?, config.provider_options()?).await?;
    info!(
        db_type = %db_type,
        "sql-provider v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = run_command(&provider, config).await;
    provider.close().await;
    result
}

async fn run_command(provider: &DatabaseProvider, config: &Config) -> Result<(), DbError> {
    match &config.command {
        Command::Query { sql, timing } => {
            let rows = if *timing {
                provider.execute_query_with_timing(sql).await?
            } else {
                provider.execute_query(sql).await?
            };
            print!("{}", format_row_set(&rows, config.format));
        }
        Command::Update { statements } => {
            if let [single] = statements.as_slice() {
                let changed = provider.execute_update(single).await?;
                println!(
                    "Query OK, {}",
                    if changed { "rows affected" } else { "no rows affected" }
                );
            } else {
                provider.execute_updates(statements).await?;
                println!("Committed {} statements", statements.len());
            }
        }
        Command::Paginate {
            sql,
            page,
            page_size,
            ..
        } => {
            let rows = provider
                .execute_paginated_query(sql, *page, *page_size)
                .await?;
            print!("{}", format_row_set(&rows, config.format));
        }
        Command::Columns { table } => {
            for name in provider.try_column_names(table).await? {
                println!("{}", name);
            }
        }
        Command::Describe { table } => {
            let description = provider.describe_table(table).await?;
            print_description(&description, config.format);
        }
        Command::Stats => {
            let stats = provider.pool_statistics()?;
            let valid = provider.is_connection_valid().await;
            let version = provider.server_version().await;
            if config.format == OutputFormat::Json {
                let value = serde_json::json!({
                    "db_type": provider.db_type().id(),
                    "server_version": version,
                    "valid": valid,
                    "pool": stats,
                });
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            } else {
                println!("Database:  {}", provider.db_type());
                println!("Version:   {}", version.as_deref().unwrap_or("unknown"));
                println!("Valid:     {}", valid);
                println!(
                    "Pool:      {} active, {} idle, {} total, {} waiting",
                    stats.active, stats.idle, stats.total, stats.waiting
                );
            }
        }
    }
    Ok(())
}

fn print_description(description: &TableDescription, format: OutputFormat) {
    if format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string_pretty(description).unwrap_or_default()
        );
        return;
    }

    println!("Table: {}", description.table_name);
    println!("Rows:  {}", description.row_count);
    println!();
    for column in &description.columns {
        let type_name = description
            .column_types
            .get(column)
            .map(String::as_str)
            .unwrap_or("");
        let mut flags = Vec::new();
        if description.primary_key.contains(column) {
            flags.push("PK".to_string());
        }
        if let Some(target) = description.foreign_keys.get(column) {
            flags.push(format!("FK -> {}", target));
        }
        println!("  {:<24} {:<16} {}", column, type_name, flags.join(", "));
    }
}
