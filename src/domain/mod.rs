//! Domain records cached by this layer.
//!
//! Expense-like entities share one collection and are distinguished by the
//! `belongsTo` discriminant; here that is a tagged sum type so matching on
//! the discriminant is exhaustive at compile time. Field names serialize as
//! camelCase to line up with the schema registry's index key paths.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Business audit trail carried by remote records. Distinct from the store
/// engine's envelope timestamps, which are cache bookkeeping only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub created_on: i64,
    pub updated_on: i64,
}

/// Lifecycle status shared by all domain records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Enable,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Enable => "enable",
            RecordStatus::Deleted => "deleted",
        }
    }
}

/// Expense discriminant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseKind {
    Purchase,
    Income,
    Refund,
}

impl ExpenseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseKind::Purchase => "purchase",
            ExpenseKind::Income => "income",
            ExpenseKind::Refund => "refund",
        }
    }
}

impl fmt::Display for ExpenseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an uploaded receipt binary attached to an expense record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRef {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub relation_id: String,
    pub belongs_to: ExpenseKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseItem {
    pub id: String,
    pub bill_name: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_type_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: String,
    pub bill_name: String,
    pub amount: f64,
    pub purchase_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_on: Option<i64>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_account_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub items: Vec<PurchaseItem>,
    #[serde(default)]
    pub receipts: Vec<ReceiptRef>,
    pub status: RecordStatus,
    pub audit_details: AuditDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Income {
    pub id: String,
    pub income_name: String,
    pub amount: f64,
    pub income_date: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub income_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_account_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub receipts: Vec<ReceiptRef>,
    pub status: RecordStatus,
    pub audit_details: AuditDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub id: String,
    pub bill_name: String,
    pub amount: f64,
    pub refund_date: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub receipts: Vec<ReceiptRef>,
    pub status: RecordStatus,
    pub audit_details: AuditDetails,
}

/// An expense-like record: one shared collection, three shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "belongsTo", rename_all = "lowercase")]
pub enum Expense {
    Purchase(Purchase),
    Income(Income),
    Refund(Refund),
}

impl Expense {
    pub fn id(&self) -> &str {
        match self {
            Expense::Purchase(p) => &p.id,
            Expense::Income(i) => &i.id,
            Expense::Refund(r) => &r.id,
        }
    }

    pub fn kind(&self) -> ExpenseKind {
        match self {
            Expense::Purchase(_) => ExpenseKind::Purchase,
            Expense::Income(_) => ExpenseKind::Income,
            Expense::Refund(_) => ExpenseKind::Refund,
        }
    }

    pub fn status(&self) -> RecordStatus {
        match self {
            Expense::Purchase(p) => p.status,
            Expense::Income(i) => i.status,
            Expense::Refund(r) => r.status,
        }
    }

    pub fn audit(&self) -> &AuditDetails {
        match self {
            Expense::Purchase(p) => &p.audit_details,
            Expense::Income(i) => &i.audit_details,
            Expense::Refund(r) => &r.audit_details,
        }
    }

    /// The business date of the underlying transaction.
    pub fn event_date(&self) -> i64 {
        match self {
            Expense::Purchase(p) => p.purchase_date,
            Expense::Income(i) => i.income_date,
            Expense::Refund(r) => r.refund_date,
        }
    }

    pub fn receipts(&self) -> &[ReceiptRef] {
        match self {
            Expense::Purchase(p) => &p.receipts,
            Expense::Income(i) => &i.receipts,
            Expense::Refund(r) => &r.receipts,
        }
    }

    pub fn receipts_mut(&mut self) -> &mut Vec<ReceiptRef> {
        match self {
            Expense::Purchase(p) => &mut p.receipts,
            Expense::Income(i) => &mut i.receipts,
            Expense::Refund(r) => &mut r.receipts,
        }
    }

    pub fn audit_mut(&mut self) -> &mut AuditDetails {
        match self {
            Expense::Purchase(p) => &mut p.audit_details,
            Expense::Income(i) => &mut i.audit_details,
            Expense::Refund(r) => &mut r.audit_details,
        }
    }

    /// All tags on the record, including purchase item breakdown tags.
    pub fn all_tags(&self) -> Vec<String> {
        match self {
            Expense::Purchase(p) => p
                .tags
                .iter()
                .chain(p.items.iter().flat_map(|item| item.tags.iter()))
                .cloned()
                .collect(),
            Expense::Income(i) => i.tags.clone(),
            Expense::Refund(r) => r.tags.clone(),
        }
    }
}

/// Statistics discriminant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StatKind {
    Purchase,
    Refund,
    Income,
    PurchaseMinusRefund,
}

impl StatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Purchase => "purchase",
            StatKind::Refund => "refund",
            StatKind::Income => "income",
            StatKind::PurchaseMinusRefund => "purchase-minus-refund",
        }
    }
}

/// Year summary returned by the stats remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub year: i64,
    pub total: f64,
    pub count: u64,
    #[serde(default)]
    pub by_month: Vec<f64>,
}

/// Cached per-(kind, year) statistics row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    pub id: String,
    pub belongs_to: StatKind,
    pub year: i64,
    pub total: f64,
    pub count: u64,
    #[serde(default)]
    pub by_month: Vec<f64>,
}

/// Which feature a cached tag set belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TagScope {
    #[serde(rename = "purchase")]
    Purchase,
    #[serde(rename = "purchase-refund")]
    PurchaseRefund,
    #[serde(rename = "pymt-acc")]
    PaymentAccounts,
    #[serde(rename = "income")]
    Income,
}

impl TagScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagScope::Purchase => "purchase",
            TagScope::PurchaseRefund => "purchase-refund",
            TagScope::PaymentAccounts => "pymt-acc",
            TagScope::Income => "income",
        }
    }

    pub fn for_expense(kind: ExpenseKind) -> TagScope {
        match kind {
            ExpenseKind::Purchase => TagScope::Purchase,
            ExpenseKind::Income => TagScope::Income,
            ExpenseKind::Refund => TagScope::PurchaseRefund,
        }
    }
}

/// One cached tag value, keyed by (scope, value).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagEntry {
    pub belongs_to: TagScope,
    pub value: String,
}

/// Configurable reference data kinds used for display-name resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    #[serde(rename = "purchase-type")]
    PurchaseType,
    #[serde(rename = "income-type")]
    IncomeType,
    #[serde(rename = "refund-reason")]
    RefundReason,
    #[serde(rename = "pymt-acc")]
    PaymentAccount,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::PurchaseType => "purchase-type",
            ConfigKind::IncomeType => "income-type",
            ConfigKind::RefundReason => "refund-reason",
            ConfigKind::PaymentAccount => "pymt-acc",
        }
    }
}

/// One configurable reference entry (a purchase type, an account, …).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub id: String,
    pub belongs_to: ConfigKind,
    /// Display value resolved into denormalized `*Name` fields.
    pub value: String,
    #[serde(default)]
    pub description: String,
    pub status: RecordStatus,
    pub audit_details: AuditDetails,
}

/// Fetch outcome of a transient receipt resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Fail,
}

/// Cached binary receipt preview. `url` holds the allocator reference that
/// must be released exactly once over the entry's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedReceipt {
    pub id: String,
    pub relation_id: String,
    pub belongs_to: ExpenseKind,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Journal row for a remote endpoint call, stored in the config store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallLogEntry {
    pub id: String,
    /// The endpoint, doubling as the belongs-to index key.
    pub belongs_to: String,
    pub query_params: BTreeMap<String, Vec<String>>,
    pub response_list_size: u64,
    pub called_on: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expense_discriminant_serialization() {
        let expense = Expense::Purchase(Purchase {
            id: "p1".into(),
            bill_name: "groceries".into(),
            amount: 42.5,
            purchase_date: 1_700_000_000_000,
            verified_on: None,
            description: String::new(),
            purchase_type_id: Some("t1".into()),
            purchase_type_name: None,
            payment_account_id: None,
            payment_account_name: None,
            tags: vec!["food".into()],
            items: vec![],
            receipts: vec![],
            status: RecordStatus::Enable,
            audit_details: AuditDetails {
                created_by: None,
                updated_by: None,
                created_on: 1,
                updated_on: 2,
            },
        });

        let value = serde_json::to_value(&expense).unwrap();
        assert_eq!(value["belongsTo"], json!("purchase"));
        assert_eq!(value["id"], json!("p1"));
        assert_eq!(value["status"], json!("enable"));
        assert_eq!(value["auditDetails"]["updatedOn"], json!(2));

        let back: Expense = serde_json::from_value(value).unwrap();
        assert_eq!(back, expense);
    }

    #[test]
    fn test_all_tags_includes_item_breakdown() {
        let expense = Expense::Purchase(Purchase {
            id: "p1".into(),
            bill_name: "electronics".into(),
            amount: 100.0,
            purchase_date: 0,
            verified_on: None,
            description: String::new(),
            purchase_type_id: None,
            purchase_type_name: None,
            payment_account_id: None,
            payment_account_name: None,
            tags: vec!["gift".into()],
            items: vec![PurchaseItem {
                id: "i1".into(),
                bill_name: "cable".into(),
                amount: 10.0,
                purchase_type_id: None,
                purchase_type_name: None,
                tags: vec!["accessory".into()],
            }],
            receipts: vec![],
            status: RecordStatus::Enable,
            audit_details: AuditDetails::default(),
        });
        assert_eq!(expense.all_tags(), vec!["gift", "accessory"]);
    }
}
