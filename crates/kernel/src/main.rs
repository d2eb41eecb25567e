//! Tally operator CLI
//!
//! Usage:
//!   tally migrate
//!   tally query TimeEntry --tenant 1 --filter '{"duration":{"gte":3600}}' --relations tags
//!   tally aggregate TimeEntry --tenant 1 --aggregate '{"sum":["duration"],"group_by":["project_id"]}'

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tally_kernel::config::Config;
use tally_kernel::query::{
    AggregateQuery, Filter, Paging, Query, RelationQuery, RequestContext, SortField,
};
use tally_kernel::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the domain tables.
    Migrate,
    /// Print records of an entity as JSON.
    Query {
        /// Entity name, e.g. `TimeEntry`.
        entity: String,
        #[command(flatten)]
        scope: Scope,
        /// Filter tree as JSON.
        #[arg(long)]
        filter: Option<String>,
        /// Sort fields, `field` or `field:desc`.
        #[arg(long, value_delimiter = ',')]
        sort: Vec<String>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u64>,
        /// Relations to load.
        #[arg(long, value_delimiter = ',')]
        relations: Vec<String>,
        /// Also print the total count.
        #[arg(long)]
        count: bool,
    },
    /// Print grouped aggregates of an entity as JSON.
    Aggregate {
        entity: String,
        #[command(flatten)]
        scope: Scope,
        /// Aggregate request as JSON.
        #[arg(long)]
        aggregate: String,
        #[arg(long)]
        filter: Option<String>,
    },
}

/// Request context flags.
#[derive(Args, Debug)]
struct Scope {
    /// Tenant to act for.
    #[arg(long)]
    tenant: Option<i64>,
    /// User to act as.
    #[arg(long)]
    user: Option<i64>,
    /// Bypass tenant scoping.
    #[arg(long)]
    system: bool,
}

impl Scope {
    fn context(&self) -> RequestContext {
        let mut ctx = if self.system {
            RequestContext::system()
        } else {
            RequestContext::default()
        };
        ctx.tenant_id = self.tenant;
        ctx.user_id = self.user;
        ctx
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;
    info!(dialect = ?state.dialect(), "database connected");

    match cli.command {
        Command::Migrate => {
            state.migrate().await.context("migration failed")?;
        }
        Command::Query {
            entity,
            scope,
            filter,
            sort,
            limit,
            offset,
            relations,
            count,
        } => {
            let query = Query {
                filter: parse_filter(filter.as_deref())?,
                paging: (limit.is_some() || offset.is_some()).then_some(Paging { limit, offset }),
                sorting: sort
                    .iter()
                    .map(|s| parse_sort(s))
                    .collect::<Result<Vec<_>>>()?,
                relations: relations.iter().map(|r| RelationQuery::new(r)).collect(),
            };
            let ctx = scope.context();
            let service = state.service();
            let output = if count {
                let (records, total) = service.query_and_count(&ctx, &entity, &query).await?;
                serde_json::json!({ "items": records, "total": total })
            } else {
                serde_json::to_value(service.query(&ctx, &entity, &query).await?)?
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Aggregate {
            entity,
            scope,
            aggregate,
            filter,
        } => {
            let aggregate: AggregateQuery =
                serde_json::from_str(&aggregate).context("invalid --aggregate JSON")?;
            let filter = parse_filter(filter.as_deref())?;
            let rows = state
                .service()
                .aggregate(&scope.context(), &entity, &filter, &aggregate)
                .await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

fn parse_filter(raw: Option<&str>) -> Result<Filter> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("invalid --filter JSON"),
        None => Ok(Filter::new()),
    }
}

fn parse_sort(raw: &str) -> Result<SortField> {
    let (field, direction) = raw.split_once(':').unwrap_or((raw, "asc"));
    match direction.to_lowercase().as_str() {
        "asc" => Ok(SortField::asc(field)),
        "desc" => Ok(SortField::desc(field)),
        other => bail!("unknown sort direction `{other}` for {field}"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally_kernel=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
