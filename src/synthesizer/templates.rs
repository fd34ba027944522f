//! Deterministic SQL templates
//!
//! Every template enumerates its columns, bounds the partition column with
//! the window it is given and aggregates inside the query. Output is a single
//! line with no trailing separator.

use chamado_core::{DateWindow, PipelineConfig};

use super::question::{Dimension, ParsedQuestion, QueryShape};
use super::{SynthesisError, SynthesisResult};
use crate::schema::{SchemaCatalog, NEIGHBORHOOD_NAME};

const FACT_ALIAS: &str = "c";
const DIM_ALIAS: &str = "b";

/// A rendered template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSql {
    pub sql: String,
    pub name: &'static str,
    pub tables: Vec<String>,
}

/// `DATE 'yyyy-mm-dd'` literal.
pub fn date_literal(date: chrono::NaiveDate) -> String {
    format!("DATE '{}'", date.format("%Y-%m-%d"))
}

/// Predicate bounding `column` to `window`.
pub fn window_predicate(column: &str, window: &DateWindow) -> String {
    if window.is_single_day() {
        format!("{} = {}", column, date_literal(window.start))
    } else {
        format!(
            "{} BETWEEN {} AND {}",
            column,
            date_literal(window.start),
            date_literal(window.end)
        )
    }
}

/// `(LOWER(col) LIKE '%t1%' AND ...) OR ...` over `columns`.
///
/// Terms must already be sanitized. `None` when there is nothing to filter.
pub fn topic_filter(columns: &[String], terms: &[String]) -> Option<String> {
    if columns.is_empty() || terms.is_empty() {
        return None;
    }
    let per_column: Vec<String> = columns
        .iter()
        .map(|col| {
            let likes: Vec<String> = terms
                .iter()
                .map(|t| format!("LOWER({}) LIKE '%{}%'", col, t.to_lowercase()))
                .collect();
            format!("({})", likes.join(" AND "))
        })
        .collect();
    Some(per_column.join(" OR "))
}

fn qualified(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(a) => format!("{}.{}", a, column),
        None => column.to_string(),
    }
}

/// Grouping column and output label for a non-join dimension.
fn grouping(
    dimension: Dimension,
    catalog: &SchemaCatalog,
) -> SynthesisResult<(&'static str, &'static str)> {
    let column = match dimension {
        Dimension::Subtype => catalog.first_text_column(&["subtipo", "tipo", "categoria"]),
        Dimension::Type => catalog.first_text_column(&["tipo", "subtipo", "categoria"]),
        Dimension::Category => catalog.first_text_column(&["categoria", "tipo", "subtipo"]),
        Dimension::Status => catalog.fact.has("status").then_some("status"),
        Dimension::OrgUnit => catalog.org_unit_column(),
        Dimension::Neighborhood => None,
    };
    let column = column.ok_or_else(|| {
        SynthesisError::unsupported(format!("no column available for {:?}", dimension))
    })?;
    let label = match dimension {
        Dimension::OrgUnit => "unidade",
        Dimension::Status => "status",
        _ => column,
    };
    Ok((column, label))
}

struct Where {
    clauses: Vec<String>,
}

impl Where {
    fn new(first: String) -> Self {
        Self {
            clauses: vec![first],
        }
    }

    fn and(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn and_grouped(&mut self, clause: Option<String>) {
        if let Some(c) = clause {
            self.clauses.push(format!("({})", c));
        }
    }

    fn render(&self) -> String {
        self.clauses.join(" AND ")
    }
}

fn topic_clause(
    catalog: &SchemaCatalog,
    alias: Option<&str>,
    topic: &[String],
) -> SynthesisResult<Option<String>> {
    if topic.is_empty() {
        return Ok(None);
    }
    let columns: Vec<String> = catalog
        .text_columns()
        .into_iter()
        .map(|c| qualified(alias, c))
        .collect();
    if columns.is_empty() {
        return Err(SynthesisError::unsupported(
            "no text columns available for a topic filter",
        ));
    }
    Ok(topic_filter(&columns, topic))
}

/// Render the template for `parsed` over `window`.
pub fn render(
    parsed: &ParsedQuestion,
    window: &DateWindow,
    catalog: &SchemaCatalog,
    config: &PipelineConfig,
) -> SynthesisResult<TemplateSql> {
    let fact = &config.fact_table;
    match parsed.shape {
        QueryShape::Count => {
            let mut filter = Where::new(window_predicate(&config.partition_column, window));
            filter.and_grouped(topic_clause(catalog, None, &parsed.topic)?);
            Ok(TemplateSql {
                sql: format!(
                    "SELECT COUNT(1) AS total FROM `{}` WHERE {}",
                    fact,
                    filter.render()
                ),
                name: "count",
                tables: vec![fact.clone()],
            })
        }
        QueryShape::TopBy(Dimension::Neighborhood) => {
            let join = catalog
                .neighborhood_join(FACT_ALIAS, DIM_ALIAS)
                .ok_or_else(|| SynthesisError::unsupported("neighborhood join key unavailable"))?;
            if !catalog.has_neighborhood_name() {
                return Err(SynthesisError::unsupported("neighborhood name unavailable"));
            }
            let mut filter = Where::new(window_predicate(
                &qualified(Some(FACT_ALIAS), &config.partition_column),
                window,
            ));
            filter.and_grouped(topic_clause(catalog, Some(FACT_ALIAS), &parsed.topic)?);
            Ok(TemplateSql {
                sql: format!(
                    "SELECT {d}.{name} AS bairro, COUNT(1) AS total FROM `{fact}` AS {f} JOIN `{dim}` AS {d} ON {join} WHERE {filter} GROUP BY bairro ORDER BY total DESC, bairro ASC LIMIT {limit}",
                    d = DIM_ALIAS,
                    f = FACT_ALIAS,
                    name = NEIGHBORHOOD_NAME,
                    fact = fact,
                    dim = config.dimension_table,
                    join = join,
                    filter = filter.render(),
                    limit = parsed.limit,
                ),
                name: "top_by_neighborhood",
                tables: vec![fact.clone(), config.dimension_table.clone()],
            })
        }
        QueryShape::TopBy(dimension) => {
            let (column, label) = grouping(dimension, catalog)?;
            let mut filter = Where::new(window_predicate(&config.partition_column, window));
            filter.and(format!("{} IS NOT NULL", column));
            filter.and_grouped(topic_clause(catalog, None, &parsed.topic)?);
            Ok(TemplateSql {
                sql: format!(
                    "SELECT {column} AS {label}, COUNT(1) AS total FROM `{fact}` WHERE {filter} GROUP BY {label} ORDER BY total DESC, {label} ASC LIMIT {limit}",
                    column = column,
                    label = label,
                    fact = fact,
                    filter = filter.render(),
                    limit = parsed.limit,
                ),
                name: "top_by_dimension",
                tables: vec![fact.clone()],
            })
        }
    }
}
