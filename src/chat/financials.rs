//! Structured financial statements per document and their plain-text rendering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::types::Document;
use crate::error::{RagrouteError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialValue {
    pub label: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub revenues: Option<FinancialValue>,
    pub operating_expenses: Option<FinancialValue>,
    pub gross_profit: Option<FinancialValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveIncome {
    pub comprehensive_income_loss_attributable_to_parent: Option<FinancialValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub net_cash_flow: Option<FinancialValue>,
    pub net_cash_flow_from_financing_activities: Option<FinancialValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Financials {
    pub income_statement: Option<IncomeStatement>,
    pub comprehensive_income: Option<ComprehensiveIncome>,
    pub cash_flow_statement: Option<CashFlowStatement>,
}

/// One reporting period of a company's filings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockFinancials {
    pub company_name: String,
    pub fiscal_year: String,
    pub fiscal_period: String,
    #[serde(default)]
    pub financials: Financials,
}

fn labelled(value: &FinancialValue) -> String {
    format!("{}: {} {}", value.label, value.value, value.unit)
}

/// Render one period as sentences, skipping any line item that is absent.
pub fn describe_financials(financials: &StockFinancials) -> String {
    let mut sentences = vec![format!(
        "For {} in fiscal year {} covering the period {}:",
        financials.company_name, financials.fiscal_year, financials.fiscal_period
    )];

    if let Some(income) = &financials.financials.income_statement {
        if let Some(revenues) = &income.revenues {
            sentences.push(format!("Revenues were {}.", labelled(revenues)));
        }
        if let Some(expenses) = &income.operating_expenses {
            sentences.push(format!("Operating expenses were {}.", labelled(expenses)));
        }
        if let Some(gross_profit) = &income.gross_profit {
            sentences.push(format!("Gross profit was {} {}.", gross_profit.value, gross_profit.unit));
        }
    }

    if let Some(net_income) = financials
        .financials
        .comprehensive_income
        .as_ref()
        .and_then(|c| c.comprehensive_income_loss_attributable_to_parent.as_ref())
    {
        sentences.push(format!("Net income was {}.", labelled(net_income)));
    }

    if let Some(cash_flows) = &financials.financials.cash_flow_statement {
        if let Some(operating) = &cash_flows.net_cash_flow {
            sentences.push(format!("Net cash from operating activities was {}.", labelled(operating)));
        }
        if let Some(financing) = &cash_flows.net_cash_flow_from_financing_activities {
            sentences.push(format!("Net cash from financing activities was {}.", labelled(financing)));
        }
    }

    sentences.join(" ")
}

/// External source of structured financial data for a document.
#[async_trait]
pub trait FinancialDataSource: Send + Sync {
    async fn financials_for(&self, document: &Document) -> Result<Vec<StockFinancials>>;
}

/// Reads `<dir>/<document id>.json`, a JSON array of [`StockFinancials`].
/// A missing file means no data.
#[derive(Debug, Clone)]
pub struct JsonFinancialDataSource {
    dir: PathBuf,
}

impl JsonFinancialDataSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl FinancialDataSource for JsonFinancialDataSource {
    async fn financials_for(&self, document: &Document) -> Result<Vec<StockFinancials>> {
        let path = self.dir.join(format!("{}.json", document.id));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("No financial data for document {} at {}", document.id, path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map_err(|e| RagrouteError::Parse(format!("Invalid financials in {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn value(label: &str, value: f64) -> Option<FinancialValue> {
        Some(FinancialValue {
            label: label.to_string(),
            value,
            unit: "USD".to_string(),
        })
    }

    #[test]
    fn test_describe_full_statement() {
        let financials = StockFinancials {
            company_name: "Acme Corp".to_string(),
            fiscal_year: "2023".to_string(),
            fiscal_period: "FY".to_string(),
            financials: Financials {
                income_statement: Some(IncomeStatement {
                    revenues: value("Revenues", 1000.0),
                    operating_expenses: value("Operating Expenses", 400.0),
                    gross_profit: value("Gross Profit", 600.0),
                }),
                comprehensive_income: Some(ComprehensiveIncome {
                    comprehensive_income_loss_attributable_to_parent: value("Net Income", 150.5),
                }),
                cash_flow_statement: Some(CashFlowStatement {
                    net_cash_flow: value("Net Cash Flow", 80.0),
                    net_cash_flow_from_financing_activities: None,
                }),
            },
        };

        assert_eq!(
            describe_financials(&financials),
            "For Acme Corp in fiscal year 2023 covering the period FY: \
             Revenues were Revenues: 1000 USD. \
             Operating expenses were Operating Expenses: 400 USD. \
             Gross profit was 600 USD. \
             Net income was Net Income: 150.5 USD. \
             Net cash from operating activities was Net Cash Flow: 80 USD."
        );
    }

    #[test]
    fn test_describe_without_statements() {
        let financials = StockFinancials {
            company_name: "SME LENDING".to_string(),
            fiscal_year: "2022".to_string(),
            fiscal_period: "Q3".to_string(),
            financials: Financials::default(),
        };
        assert_eq!(
            describe_financials(&financials),
            "For SME LENDING in fiscal year 2022 covering the period Q3:"
        );
    }

    #[tokio::test]
    async fn test_json_source_reads_and_tolerates_missing() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("doc-1.json"),
            r#"[{"company_name": "Acme", "fiscal_year": "2023", "fiscal_period": "FY",
                 "financials": {"income_statement": {"revenues": {"label": "Revenues", "value": 10, "unit": "USD"}}}}]"#,
        )
        .unwrap();
        let source = JsonFinancialDataSource::new(temp_dir.path());

        let found = source.financials_for(&Document::new("doc-1", "a.pdf")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(describe_financials(&found[0]).contains("Revenues were Revenues: 10 USD."));

        let missing = source.financials_for(&Document::new("doc-2", "b.pdf")).await.unwrap();
        assert!(missing.is_empty());
    }
}
