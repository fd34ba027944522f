//! Schema Catalog
//!
//! Column types of the fact and dimension tables. The synthesizer reads it to
//! pick grouping columns that actually exist and to coerce the neighborhood
//! join key when the two tables disagree on its type.
//!
//! A built-in snapshot is always available. Discovery through
//! `INFORMATION_SCHEMA.COLUMNS` is optional and runs once, when the pipeline
//! is assembled; the resulting catalog is passed in explicitly.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use chamado_core::{CellValue, PipelineConfig};
use chamado_engine::{RunLimits, TabularEngine};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::utils::{AppError, AppResult};

/// Neighborhood key shared by the fact and dimension tables
pub const NEIGHBORHOOD_KEY: &str = "id_bairro";

/// Neighborhood display name in the dimension table
pub const NEIGHBORHOOD_NAME: &str = "nome";

/// Text columns searched by topic filters, in preference order
const TEXT_COLUMNS: &[&str] = &["subtipo", "tipo", "categoria"];

// ============================================================================
// Types
// ============================================================================

/// `{column -> canonical type}` of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumns {
    pub table: String,
    pub columns: BTreeMap<String, String>,
}

impl TableColumns {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, engine_type: &str) -> Self {
        self.insert(column, engine_type);
        self
    }

    pub fn insert(&mut self, column: &str, engine_type: &str) {
        self.columns
            .insert(column.to_ascii_lowercase(), canonical_type(engine_type));
    }

    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .get(&column.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has(&self, column: &str) -> bool {
        self.column_type(column).is_some()
    }

    pub fn is_text(&self, column: &str) -> bool {
        self.column_type(column) == Some("STRING")
    }
}

/// Map legacy and parameterized type names to one spelling.
///
/// `INTEGER` -> `INT64`, `STRING(10)` -> `STRING`, `NUMERIC(10,2)` -> `NUMERIC`.
pub fn canonical_type(engine_type: &str) -> String {
    let upper = engine_type.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim().to_string();
    match base.as_str() {
        "INTEGER" | "INT" | "SMALLINT" | "BIGINT" | "TINYINT" | "BYTEINT" => "INT64".to_string(),
        "FLOAT" => "FLOAT64".to_string(),
        "BOOLEAN" => "BOOL".to_string(),
        "DECIMAL" => "NUMERIC".to_string(),
        "BIGDECIMAL" => "BIGNUMERIC".to_string(),
        _ => base,
    }
}

fn is_numeric_type(t: &str) -> bool {
    matches!(t, "INT64" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC")
}

/// Catalog of both tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub fact: TableColumns,
    pub dimension: TableColumns,
}

impl SchemaCatalog {
    /// Snapshot of the public 1746 dataset layout.
    ///
    /// The fact table stores the neighborhood key as STRING while the
    /// dimension table stores it as INT64.
    pub fn builtin(config: &PipelineConfig) -> Self {
        let fact = TableColumns::new(config.fact_table.clone())
            .with("id_chamado", "STRING")
            .with("data_inicio", "TIMESTAMP")
            .with("data_fim", "TIMESTAMP")
            .with(NEIGHBORHOOD_KEY, "STRING")
            .with("id_territorialidade", "STRING")
            .with("id_logradouro", "STRING")
            .with("id_unidade_organizacional", "STRING")
            .with("nome_unidade_organizacional", "STRING")
            .with("categoria", "STRING")
            .with("id_tipo", "STRING")
            .with("tipo", "STRING")
            .with("id_subtipo", "STRING")
            .with("subtipo", "STRING")
            .with("status", "STRING")
            .with(&config.partition_column, "DATE");
        let dimension = TableColumns::new(config.dimension_table.clone())
            .with(NEIGHBORHOOD_KEY, "INT64")
            .with(NEIGHBORHOOD_NAME, "STRING")
            .with("id_area_planejamento", "STRING")
            .with("nome_regiao_planejamento", "STRING")
            .with("subprefeitura", "STRING")
            .with("area", "FLOAT64")
            .with("perimetro", "FLOAT64");
        Self { fact, dimension }
    }

    /// Text columns of the fact table available for topic filters.
    pub fn text_columns(&self) -> Vec<&'static str> {
        TEXT_COLUMNS
            .iter()
            .copied()
            .filter(|c| self.fact.is_text(c))
            .collect()
    }

    /// First existing text column among `preference`.
    pub fn first_text_column(&self, preference: &[&'static str]) -> Option<&'static str> {
        preference.iter().copied().find(|c| self.fact.is_text(c))
    }

    /// Column naming the organizational unit, falling back to its id.
    pub fn org_unit_column(&self) -> Option<&'static str> {
        ["nome_unidade_organizacional", "id_unidade_organizacional"]
            .into_iter()
            .find(|c| self.fact.has(c))
    }

    /// Join predicate between fact alias `f` and dimension alias `d` on the
    /// neighborhood key, coercing types when they differ.
    ///
    /// - same type: `f.id_bairro = d.id_bairro`
    /// - one side STRING: the other side is `CAST(.. AS STRING)`
    /// - numeric mismatch: `SAFE_CAST(f.id_bairro AS <dimension type>)`
    ///
    /// `None` when either table lacks the key or a side has a type that
    /// cannot be coerced safely.
    pub fn neighborhood_join(&self, f: &str, d: &str) -> Option<String> {
        let fact_type = self.fact.column_type(NEIGHBORHOOD_KEY)?;
        let dim_type = self.dimension.column_type(NEIGHBORHOOD_KEY)?;
        let fk = format!("{}.{}", f, NEIGHBORHOOD_KEY);
        let dk = format!("{}.{}", d, NEIGHBORHOOD_KEY);

        if fact_type == dim_type {
            return Some(format!("{} = {}", fk, dk));
        }
        match (fact_type, dim_type) {
            ("STRING", other) if is_numeric_type(other) => {
                Some(format!("{} = CAST({} AS STRING)", fk, dk))
            }
            (other, "STRING") if is_numeric_type(other) => {
                Some(format!("CAST({} AS STRING) = {}", fk, dk))
            }
            (a, b) if is_numeric_type(a) && is_numeric_type(b) => {
                Some(format!("SAFE_CAST({} AS {}) = {}", fk, b, dk))
            }
            _ => None,
        }
    }

    pub fn has_neighborhood_name(&self) -> bool {
        self.dimension.is_text(NEIGHBORHOOD_NAME)
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Read both tables' columns from `INFORMATION_SCHEMA.COLUMNS`.
    pub async fn discover(
        engine: &dyn TabularEngine,
        config: &PipelineConfig,
        timeout: Duration,
    ) -> AppResult<Self> {
        let fact = discover_table(engine, &config.fact_table, config, timeout).await?;
        let dimension = discover_table(engine, &config.dimension_table, config, timeout).await?;
        if !fact.has(&config.partition_column) {
            return Err(AppError::validation(format!(
                "{} has no partition column {}",
                config.fact_table, config.partition_column
            )));
        }
        tracing::info!(
            fact_columns = fact.columns.len(),
            dimension_columns = dimension.columns.len(),
            "schema discovered"
        );
        Ok(Self { fact, dimension })
    }
}

fn safe_identifier() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.$\-]+$").ok())
        .as_ref()
}

/// Split `project.dataset.table` (or `dataset.table`) into dataset and table,
/// rejecting anything outside the safe identifier alphabet.
pub fn split_table_name(full: &str) -> AppResult<(String, String)> {
    let name = full.trim().trim_matches('`').trim();
    let safe = safe_identifier().is_some_and(|re| re.is_match(name));
    if name.is_empty() || !safe {
        return Err(AppError::validation(format!("invalid table identifier {:?}", full)));
    }
    match name.rsplit_once('.') {
        Some((dataset, table)) if !dataset.is_empty() && !table.is_empty() => {
            Ok((dataset.to_string(), table.to_string()))
        }
        _ => Err(AppError::validation(format!(
            "table identifier {:?} is not qualified",
            full
        ))),
    }
}

/// `INFORMATION_SCHEMA` query for one table.
pub fn information_schema_sql(full_table: &str) -> AppResult<String> {
    let (dataset, table) = split_table_name(full_table)?;
    Ok(format!(
        "SELECT column_name, data_type FROM `{}.INFORMATION_SCHEMA.COLUMNS` WHERE table_name = '{}'",
        dataset, table
    ))
}

async fn discover_table(
    engine: &dyn TabularEngine,
    full_table: &str,
    config: &PipelineConfig,
    timeout: Duration,
) -> AppResult<TableColumns> {
    let sql = information_schema_sql(full_table)?;
    let limits = RunLimits {
        timeout,
        byte_cap: config.max_bytes_scanned,
        max_rows: 1_000,
    };
    let output = engine
        .run(&sql, limits, &CancellationToken::new())
        .await
        .map_err(|e| AppError::engine(format!("schema discovery for {}: {}", full_table, e)))?;

    let mut columns = TableColumns::new(full_table);
    for row in &output.rows {
        if let (Some(CellValue::Text(name)), Some(CellValue::Text(ty))) = (row.first(), row.get(1))
        {
            columns.insert(name, ty);
        }
    }
    if columns.columns.is_empty() {
        return Err(AppError::validation(format!(
            "no columns found for {}",
            full_table
        )));
    }
    Ok(columns)
}
