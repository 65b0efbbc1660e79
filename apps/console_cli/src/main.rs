use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console_api::{ConsoleApi, CONSOLE_SERVICE};
use console_core::{
    is_success_workflow, BatchExecutor, ConsoleContext, FetchOutcome, ListOrchestrator,
    RecordSource, WorkflowOrchestrator,
};
use shared::{
    domain::ResourceSummary,
    query::{FilterMap, QueryState, FIRST_PAGE},
    record::RecordSet,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(about = "List, watch and delete console resources")]
struct Cli {
    #[arg(long, default_value = "console.toml")]
    config: PathBuf,
    /// Overrides `api_base_url` from the settings file and environment.
    #[arg(long)]
    api_base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List {
        resource: String,
        #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        /// Follow continuation cursors until the listing is exhausted.
        #[arg(long)]
        all: bool,
    },
    /// Polls the list until no record remains in the given phase.
    Watch {
        resource: String,
        #[arg(long)]
        until_phase_not: String,
        #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    Delete {
        resource: String,
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        force: bool,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("filter key is empty in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(base) = cli.api_base_url {
        settings.api_base_url = base;
    }

    let context = ConsoleContext::new()
        .with_api_address(CONSOLE_SERVICE, settings.api_base_url.clone())
        .with_forbidden_handler(|error| {
            warn!(%error, "permission denied by the console API; check your credentials");
        });
    let api = ConsoleApi::from_context(&context, CONSOLE_SERVICE, settings.request_timeout())?;

    match cli.command {
        Command::List {
            resource,
            filters,
            search,
            page,
            all,
        } => {
            let mut query = QueryState::new(filters.into_iter().collect::<FilterMap>())
                .with_paging(page.unwrap_or(FIRST_PAGE), settings.page_size);
            if let Some(search) = search {
                query = query.with_search(search);
            }
            let list = open_list(&context, &api, &settings, &resource, query)?;
            expect_applied(list.fetch().await, &resource)?;
            while all && list.snapshot().lifecycle.data.has_more() {
                let outcome = list.continue_paging().await;
                if outcome == FetchOutcome::Skipped {
                    break;
                }
                expect_applied(outcome, &resource)?;
            }
            print_records(&list.snapshot().lifecycle.data);
        }
        Command::Watch {
            resource,
            until_phase_not,
            filters,
        } => {
            let query = QueryState::new(filters.into_iter().collect::<FilterMap>());
            let list = open_list(&context, &api, &settings, &resource, query)?;
            let phase = until_phase_not.clone();
            list.poll(settings.poll_interval(), move |data: &RecordSet<ResourceSummary>| {
                !data.records.iter().any(|record| record.in_phase(&phase))
            });

            let mut updates = list.subscribe();
            tokio::select! {
                finished = updates.wait_for(|snapshot| !snapshot.polling) => {
                    finished.context("list closed while polling")?;
                    info!(%resource, phase = %until_phase_not, "no records left in phase");
                }
                interrupted = tokio::signal::ctrl_c() => {
                    interrupted.context("failed to listen for ctrl-c")?;
                    list.clear_polling();
                    warn!(%resource, "watch interrupted");
                }
            }
            print_records(&list.snapshot().lifecycle.data);
        }
        Command::Delete {
            resource,
            ids,
            force,
        } => {
            let executor: Arc<dyn BatchExecutor<ResourceSummary, FilterMap>> =
                Arc::new(api.delete_executor::<ResourceSummary>(&resource)?);
            let workflow =
                WorkflowOrchestrator::new(format!("delete-{resource}"), context.clone(), executor);

            let mut params = FilterMap::new();
            if force {
                params.insert("force".into(), "true".into());
            }
            workflow.start(ids.into_iter().map(ResourceSummary::new).collect(), params)?;
            let done = workflow.perform().await?;

            for result in &done.results {
                match &result.error {
                    None => println!("deleted {}", result.target.id),
                    Some(error) => println!("failed  {}: {error}", result.target.id),
                }
            }
            if !is_success_workflow(&done) {
                bail!(
                    "{} of {} deletions failed",
                    done.failures().count(),
                    done.results.len()
                );
            }
        }
    }

    Ok(())
}

fn open_list(
    context: &ConsoleContext,
    api: &ConsoleApi,
    settings: &Settings,
    resource: &str,
    query: QueryState<FilterMap>,
) -> Result<Arc<ListOrchestrator<FilterMap, ResourceSummary>>> {
    let source: Arc<dyn RecordSource<FilterMap, ResourceSummary>> =
        Arc::new(api.list_source::<FilterMap, ResourceSummary>(resource)?);
    Ok(ListOrchestrator::with_config(
        context.clone(),
        source,
        query,
        settings.list_config(resource),
    ))
}

fn expect_applied(outcome: FetchOutcome, resource: &str) -> Result<()> {
    match outcome {
        FetchOutcome::Failed(error) => {
            Err(error).with_context(|| format!("failed to list {resource}"))
        }
        _ => Ok(()),
    }
}

fn print_records(data: &RecordSet<ResourceSummary>) {
    for record in &data.records {
        println!(
            "{}\t{}\t{}",
            record.id,
            record.name.as_deref().unwrap_or("-"),
            record.phase.as_deref().unwrap_or("-")
        );
    }
    if data.has_more() {
        println!("# {} of {} shown; more available", data.len(), data.record_count);
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
