use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::entities::population::Population;
use crate::entities::search::{DiscoveryPage, SearchCriteria, classify_locus};
use crate::entities::table::{NOT_SPECIFIED, ResultTable};
use crate::entities::variant::VariantSummary;
use crate::error::SnpFinderError;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn env() -> Result<&'static Environment<'static>, SnpFinderError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("af", |v: f64| -> String {
        let mut out = format!("{v:.6}");
        while out.contains('.') && out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
        if out.is_empty() { "0".to_string() } else { out }
    });
    env.add_template(
        "summary.md.j2",
        include_str!("../../templates/summary.md.j2"),
    )?;
    env.add_template("search.md.j2", include_str!("../../templates/search.md.j2"))?;
    env.add_template("table.md.j2", include_str!("../../templates/table.md.j2"))?;

    let _ = ENV.set(env);
    ENV.get().ok_or_else(|| SnpFinderError::Api {
        api: "render".into(),
        message: "Template environment failed to initialize".into(),
    })
}

fn offset_pagination_footer(offset: u32, returned: usize, total: u64) -> String {
    if returned == 0 {
        return format!("Showing 0 of {total} results.");
    }
    let start = u64::from(offset) + 1;
    let end = u64::from(offset) + returned as u64;
    if end < total {
        format!("Showing {start}-{end} of {total} results. Use --offset {end} for more.")
    } else {
        format!("Showing {start}-{end} of {total} results.")
    }
}

fn query_label(criteria: &SearchCriteria) -> String {
    let mut parts = vec![if criteria.common_only {
        "common SNVs (global MAF 1-100%)".to_string()
    } else {
        "SNVs with non-zero global MAF".to_string()
    }];
    match classify_locus(&criteria.locus) {
        Ok(crate::entities::search::Locus::Default) | Err(_) => {}
        Ok(_) => parts.push(format!("locus={}", criteria.locus.trim())),
    }
    if let Some(term) = criteria.clinical_filter.term() {
        parts.push(format!("clinical={term}"));
    }
    parts.join(", ")
}

pub fn search_markdown(
    criteria: &SearchCriteria,
    page: &DiscoveryPage,
) -> Result<String, SnpFinderError> {
    let tmpl = env()?.get_template("search.md.j2")?;
    let mut body = tmpl.render(context! {
        query_label => query_label(criteria),
        status => page.status_line(),
        ids => &page.ids,
        offset => criteria.row_offset,
    })?;
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push('\n');
    body.push_str(&offset_pagination_footer(
        criteria.row_offset,
        page.ids.len(),
        page.total,
    ));
    body.push('\n');
    Ok(body)
}

pub fn summary_markdown(summary: &VariantSummary) -> Result<String, SnpFinderError> {
    let tmpl = env()?.get_template("summary.md.j2")?;
    Ok(tmpl.render(context! {
        name => &summary.name,
        minor_allele => &summary.minor_allele,
        sequence => &summary.sequence,
        genes => &summary.genes,
        consequence => &summary.consequence,
        risk_traits => &summary.risk_traits,
        other_traits => &summary.other_traits,
        clinical_significance => &summary.clinical_significance,
    })?)
}

#[derive(serde::Serialize)]
struct TableRow {
    id: String,
    chromosome: Option<String>,
    position: Option<String>,
    minor_allele: Option<String>,
    major_allele: Option<String>,
    maf: Option<f64>,
    genes: String,
    consequence: String,
    clinical: String,
    het: f64,
    minor_hom: f64,
    major_hom: f64,
}

fn or_not_specified(values: &[String]) -> String {
    if values.is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        values.join(", ")
    }
}

pub fn table_markdown(table: &ResultTable) -> Result<String, SnpFinderError> {
    let rows = table
        .records
        .iter()
        .map(|record| {
            let genotypes = record.genotype_frequencies[Population::All];
            TableRow {
                id: record.id.rsid(),
                chromosome: record.chromosome.clone(),
                position: record.position.clone(),
                minor_allele: record.minor_allele.clone(),
                major_allele: record.major_allele.clone(),
                maf: record.allele_frequencies[Population::All].minor,
                genes: or_not_specified(&record.genes),
                consequence: record
                    .consequence
                    .clone()
                    .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
                clinical: or_not_specified(&record.clinical_significance),
                het: genotypes.heterozygous,
                minor_hom: genotypes.minor_homozygous,
                major_hom: genotypes.major_homozygous,
            }
        })
        .collect::<Vec<_>>();

    let tmpl = env()?.get_template("table.md.j2")?;
    Ok(tmpl.render(context! {
        rows => rows,
        column_count => ResultTable::COLUMN_COUNT,
    })?)
}
