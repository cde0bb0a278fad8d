//! Heuristic risk classification of generated SQL.
//!
//! The heuristics are keyword and pattern matches over literal-masked text.
//! They sit behind [`RiskClassifier`] so a parser-based implementation can
//! replace them without touching the validator.

use crate::models::identity::RoleLevel;
use crate::sql::{classify, mask_string_literals, Operation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    AccessControlWrite,
    UnboundedWrite,
    SensitiveColumn,
    DepartmentAggregation,
    PrincipalReference,
    UnfilteredWildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "level")]
pub enum Severity {
    /// Blocks requesters below the level.
    Gate(RoleLevel),
    /// Surfaced as a warning only.
    Advisory,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskFinding {
    pub kind: RiskKind,
    pub severity: Severity,
    pub reason: String,
    /// Principal key the statement filters on, for [`RiskKind::PrincipalReference`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl RiskFinding {
    fn gate(kind: RiskKind, level: RoleLevel, reason: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Gate(level),
            reason: reason.into(),
            subject: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskAssessment {
    pub findings: Vec<RiskFinding>,
}

impl RiskAssessment {
    /// Highest level any gating finding requires; `SYSTEM` when nothing gates.
    pub fn level(&self) -> RoleLevel {
        self.findings
            .iter()
            .filter_map(|f| match f.severity {
                Severity::Gate(level) => Some(level),
                Severity::Advisory => None,
            })
            .max()
            .unwrap_or(RoleLevel::SYSTEM)
    }

    /// Reason of the finding that sets [`Self::level`].
    pub fn reason(&self) -> Option<&str> {
        let level = self.level();
        self.findings
            .iter()
            .find(|f| f.severity == Severity::Gate(level))
            .map(|f| f.reason.as_str())
    }
}

pub trait RiskClassifier: Send + Sync {
    fn classify_risk(&self, sql: &str) -> RiskAssessment;
}

static ACCESS_CONTROL_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:into|update|from)\s+(?:\w+\.)?(roles|permissions|role_permissions|tr_role_permissions)\b",
    )
    .expect("valid access control regex")
});

static ROLE_ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bset\b.*\brole_id\s*=").expect("valid role assignment regex"));

static WHERE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwhere\b").expect("valid WHERE regex"));

static SENSITIVE_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(salary|salaries|compensation|bonus|bank_account\w*|account_number|national_id|ssn|tax_id|password\w*)\b",
    )
    .expect("valid sensitive column regex")
});

static DEPARTMENT_GROUPING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:group|partition)\s+by\s+(?:[\w.]+\s*,\s*)*[\w.]*department\w*")
        .expect("valid department grouping regex")
});

const PRINCIPAL_COLUMN: &str =
    r"(employee_id|manager_id|approved_by|user_id|requested_by|(?:e|emp|employees)\.id)";

static PRINCIPAL_EQUALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{}\s*=\s*'([^']*)'", PRINCIPAL_COLUMN))
        .expect("valid principal filter regex")
});

static PRINCIPAL_EQUALS_REVERSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)'([^']*)'\s*=\s*{}\b", PRINCIPAL_COLUMN))
        .expect("valid reversed principal filter regex")
});

static PRINCIPAL_IN_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{}\s+in\s*\(([^)]*)\)", PRINCIPAL_COLUMN))
        .expect("valid principal list regex")
});

/// Unqualified `id` compared with a literal, in either operand order.
static BARE_ID_EQUALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:(?:^|[^\w.])id\s*=\s*'([^']*)'|'([^']*)'\s*=\s*id\b)")
        .expect("valid bare id regex")
});

static EMPLOYEES_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join|update|into)\s+(?:\w+\.)?employees\b")
        .expect("valid employees table regex")
});

static QUOTED_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([^']*)'").expect("valid quoted value regex"));

static WILDCARD_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bselect\s+(?:\w+\.)?\*").expect("valid wildcard regex"));

static SENSITIVE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+(?:\w+\.)?(employees|payroll|salaries)\b")
        .expect("valid sensitive table regex")
});

/// Pattern-based classifier for the HR schema.
#[derive(Debug, Clone, Default)]
pub struct HeuristicRiskClassifier;

impl HeuristicRiskClassifier {
    pub fn new() -> Self {
        Self
    }

    fn principal_references(sql: &str, masked: &str) -> Vec<(String, String)> {
        let mut references: Vec<(String, String)> = PRINCIPAL_EQUALS
            .captures_iter(sql)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();

        references.extend(
            PRINCIPAL_EQUALS_REVERSED
                .captures_iter(sql)
                .map(|c| (c[2].to_string(), c[1].to_string())),
        );

        if EMPLOYEES_TABLE.is_match(masked) {
            references.extend(BARE_ID_EQUALS.captures_iter(sql).filter_map(|c| {
                c.get(1)
                    .or_else(|| c.get(2))
                    .map(|value| ("employees.id".to_string(), value.as_str().to_string()))
            }));
        }

        for captures in PRINCIPAL_IN_LIST.captures_iter(sql) {
            let column = captures[1].to_string();
            references.extend(
                QUOTED_VALUE
                    .captures_iter(&captures[2])
                    .map(|v| (column.clone(), v[1].to_string())),
            );
        }
        references
    }
}

impl RiskClassifier for HeuristicRiskClassifier {
    fn classify_risk(&self, sql: &str) -> RiskAssessment {
        let masked = mask_string_literals(sql);
        let operation = classify(sql);
        let mut findings = Vec::new();

        if operation.is_write()
            && (ACCESS_CONTROL_TABLE.is_match(&masked) || ROLE_ASSIGNMENT.is_match(&masked))
        {
            findings.push(RiskFinding::gate(
                RiskKind::AccessControlWrite,
                RoleLevel::ADMIN,
                "modifying roles or permissions",
            ));
        }

        if matches!(operation, Operation::Update | Operation::Delete)
            && !WHERE_CLAUSE.is_match(&masked)
        {
            findings.push(RiskFinding::gate(
                RiskKind::UnboundedWrite,
                RoleLevel::ADMIN,
                format!("{} without a WHERE clause", operation),
            ));
        }

        if let Some(column) = SENSITIVE_COLUMN.find(&masked) {
            findings.push(RiskFinding::gate(
                RiskKind::SensitiveColumn,
                RoleLevel::HR,
                format!("access to sensitive column '{}'", column.as_str().to_lowercase()),
            ));
        }

        if DEPARTMENT_GROUPING.is_match(&masked) {
            findings.push(RiskFinding::gate(
                RiskKind::DepartmentAggregation,
                RoleLevel::HR,
                "cross-department aggregation",
            ));
        }

        for (column, subject) in Self::principal_references(sql, &masked) {
            findings.push(RiskFinding {
                kind: RiskKind::PrincipalReference,
                severity: Severity::Gate(RoleLevel::MANAGER),
                reason: format!("filtering {} on another employee", column.to_lowercase()),
                subject: Some(subject),
            });
        }

        if operation.is_read()
            && WILDCARD_SELECT.is_match(&masked)
            && SENSITIVE_TABLE.is_match(&masked)
            && !WHERE_CLAUSE.is_match(&masked)
        {
            findings.push(RiskFinding {
                kind: RiskKind::UnfilteredWildcard,
                severity: Severity::Advisory,
                reason: "SELECT * without WHERE on a sensitive table".to_string(),
                subject: None,
            });
        }

        RiskAssessment { findings }
    }
}
