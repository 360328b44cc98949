//! Command-line surface over the discovery and retrieval pipeline.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::entities::Pipeline;
use crate::entities::search::{ClinicalFilter, SearchCriteria};
use crate::entities::session::Session;
use crate::entities::table::ResultTable;
use crate::entities::variant::VariantId;
use crate::error::SnpFinderError;
use crate::render;

pub mod health;

#[derive(Parser, Debug)]
#[command(
    name = "snpfinder",
    version,
    about = "Discover SNPs in dbSNP and retrieve population frequencies from Ensembl"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Render JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Bypass the on-disk HTTP cache for this command
    #[arg(long, global = true)]
    pub no_cache: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Number of variants to return (must be > 0)
    #[arg(long)]
    pub limit: u32,

    /// Position in the result set to start from
    #[arg(long, default_value = "0")]
    pub offset: u32,

    /// Chromosome (8, X), gene symbol (TP53) or region (8:1-50000)
    #[arg(long)]
    pub locus: Option<String>,

    /// Clinical significance category, e.g. "likely pathogenic"
    #[arg(long, default_value = "No Filtering")]
    pub clinical: String,

    /// Restrict to common variants (global MAF between 1% and 100%)
    #[arg(long)]
    pub common: bool,
}

impl SearchArgs {
    pub fn criteria(&self) -> Result<SearchCriteria, SnpFinderError> {
        Ok(SearchCriteria {
            row_offset: self.offset,
            row_limit: self.limit,
            locus: self.locus.clone().unwrap_or_default(),
            clinical_filter: self.clinical.parse::<ClinicalFilter>()?,
            common_only: self.common,
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover variant ids in dbSNP matching the filters
    Search(SearchArgs),

    /// Show the phenotype and clinical summary of one variant
    Summary {
        /// rsID or bare dbSNP number
        id: String,
    },

    /// Fetch population, phenotype and genotype data for variants
    Data {
        /// rsIDs or bare dbSNP numbers
        #[arg(required = true)]
        ids: Vec<String>,

        /// Write the full table as CSV
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Search, then fetch data for every discovered variant
    Run {
        #[command(flatten)]
        search: SearchArgs,

        /// Write the full table as CSV
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run one dbSNP search and one Ensembl batch lookup, bypassing the cache
    Health,
}

fn parse_ids(raw: &[String]) -> Result<Vec<VariantId>, SnpFinderError> {
    raw.iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::parse::<VariantId>)
        .collect()
}

fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling data retrieval");
            token.cancel();
        }
    })
}

fn render_table(
    table: &ResultTable,
    output: Option<&Path>,
    json: bool,
) -> anyhow::Result<String> {
    let mut out = if json {
        render::json::to_pretty(table)?
    } else {
        render::markdown::table_markdown(table)?
    };
    if let Some(path) = output {
        render::csv::export_csv(table, path)?;
        if !json {
            out.push_str(&format!(
                "\nWrote {} rows to {}\n",
                table.len(),
                path.display()
            ));
        }
    }
    Ok(out)
}

async fn run_command(command: Commands, json: bool) -> anyhow::Result<String> {
    match command {
        Commands::Search(args) => {
            let criteria = args.criteria()?;
            let page = Pipeline::new()?.discover(&criteria).await?;
            if json {
                Ok(render::json::to_pretty(&page)?)
            } else {
                Ok(render::markdown::search_markdown(&criteria, &page)?)
            }
        }
        Commands::Summary { id } => {
            let id = id.parse::<VariantId>()?;
            let summary = Pipeline::new()?.summary(id).await?;
            if json {
                Ok(render::json::to_pretty(&summary)?)
            } else {
                Ok(render::markdown::summary_markdown(&summary)?)
            }
        }
        Commands::Data { ids, output } => {
            let ids = parse_ids(&ids)?;
            let handle = Pipeline::new()?.spawn_get_data(ids);
            let watcher = cancel_on_ctrl_c(handle.cancellation_token());
            let result = handle.join().await;
            watcher.abort();
            render_table(&result?, output.as_deref(), json)
        }
        Commands::Run { search, output } => {
            let criteria = search.criteria()?;
            let session = Session::new(Pipeline::new()?);
            let page = session.retrieve(&criteria).await?;
            if page.ids.is_empty() {
                return if json {
                    Ok(render::json::to_pretty(&page)?)
                } else {
                    Ok(render::markdown::search_markdown(&criteria, &page)?)
                };
            }

            session.select_all().await;
            let cancel = CancellationToken::new();
            let watcher = cancel_on_ctrl_c(cancel.clone());
            let result = session.get_data(cancel).await;
            watcher.abort();

            let table = result?;
            let body = render_table(&table, output.as_deref(), json)?;
            if json {
                Ok(body)
            } else {
                Ok(format!("{}\n\n{body}", page.status_line()))
            }
        }
        Commands::Health => {
            let report = health::check().await?;
            if json {
                Ok(render::json::to_pretty(&report)?)
            } else {
                Ok(report.to_markdown())
            }
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let Cli {
        command,
        json,
        no_cache,
    } = cli;
    crate::sources::with_no_cache(no_cache, run_command(command, json)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_flags_build_criteria() {
        let cli = Cli::try_parse_from([
            "snpfinder",
            "search",
            "--limit",
            "5",
            "--offset",
            "20",
            "--locus",
            "8:1-50000",
            "--clinical",
            "drug response",
            "--common",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        let criteria = args.criteria().unwrap();
        assert_eq!(criteria.row_offset, 20);
        assert_eq!(criteria.row_limit, 5);
        assert_eq!(criteria.locus, "8:1-50000");
        assert_eq!(criteria.clinical_filter, ClinicalFilter::DrugResponse);
        assert!(criteria.common_only);
    }

    #[test]
    fn search_requires_limit() {
        assert!(Cli::try_parse_from(["snpfinder", "search"]).is_err());
    }

    #[test]
    fn data_accepts_mixed_id_forms() {
        let cli = Cli::try_parse_from([
            "snpfinder",
            "--no-cache",
            "data",
            "rs7",
            "3,RS10",
            "--output",
            "out.csv",
        ])
        .unwrap();
        assert!(cli.no_cache);
        let Commands::Data { ids, output } = cli.command else {
            panic!("expected data");
        };
        assert_eq!(
            parse_ids(&ids).unwrap(),
            vec![VariantId::new(7), VariantId::new(3), VariantId::new(10)]
        );
        assert_eq!(output.as_deref(), Some(Path::new("out.csv")));
    }

    #[test]
    fn data_rejects_unrecognized_ids() {
        let err = parse_ids(&["rs7".into(), "BRAF".into()]).unwrap_err();
        assert!(err.to_string().contains("BRAF"));
    }

    #[test]
    fn render_table_writes_csv_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let out = render_table(&ResultTable::default(), Some(&path), false).unwrap();
        assert!(out.contains("Wrote 0 rows"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("SNP,"));
    }
}
