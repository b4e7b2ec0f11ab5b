//! Cross-file summary of check tool results.

use crate::models::QaDocument;
use crate::plugins::{CheckToolPlugin, SummaryField};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryColumn {
    pub check_tool: String,
    pub field: SummaryField,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub filename: String,
    /// One value per column; `Null` where a tool has nothing for this file.
    pub values: Vec<Value>,
}

/// One row per input file, one column per summary field offered by a check
/// tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTable {
    pub columns: Vec<SummaryColumn>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn build(plugins: &[Arc<CheckToolPlugin>], document: &QaDocument) -> Self {
        let fields: Vec<(&Arc<CheckToolPlugin>, SummaryField)> = plugins
            .iter()
            .flat_map(|plugin| plugin.summary_details().into_iter().map(move |f| (plugin, f)))
            .collect();

        let rows = document
            .input_file_paths()
            .into_iter()
            .map(|filename| {
                let values = fields
                    .iter()
                    .map(|(plugin, field)| {
                        plugin
                            .summary_value(field, &filename, document)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                SummaryRow { filename, values }
            })
            .collect();

        let columns = fields
            .into_iter()
            .map(|(plugin, field)| SummaryColumn {
                check_tool: plugin.name().to_string(),
                field,
            })
            .collect();

        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for SummaryTable {
    /// Tab separated, header first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File")?;
        for column in &self.columns {
            write!(f, "\t{} / {}", column.field.section, column.field.field)?;
        }
        writeln!(f)?;

        for row in &self.rows {
            write!(f, "{}", row.filename)?;
            for value in &row.values {
                match value {
                    Value::Null => write!(f, "\t")?,
                    Value::String(s) => write!(f, "\t{s}")?,
                    other => write!(f, "\t{other}")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
