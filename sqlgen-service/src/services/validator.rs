//! Security validation of generated statements.

use crate::models::identity::{Identity, RoleLevel};
use crate::models::validation::ValidationOutcome;
use crate::services::risk::{RiskClassifier, RiskKind, Severity};
use crate::sql::{classify, mask_string_literals, string_literal_spans, Operation};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

static USER_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)'(?:\$CURRENT_USER_ID|\{\{\s*CURRENT_USER_ID\s*\}\})'|\$CURRENT_USER_ID\b|\{\{\s*CURRENT_USER_ID\s*\}\}",
    )
    .expect("valid user placeholder regex")
});

static DEPARTMENT_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)'(?:\$CURRENT_DEPARTMENT_ID|\{\{\s*CURRENT_DEPARTMENT_ID\s*\}\})'|\$CURRENT_DEPARTMENT_ID\b|\{\{\s*CURRENT_DEPARTMENT_ID\s*\}\}",
    )
    .expect("valid department placeholder regex")
});

static SELF_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bcurrent_user(?:_id)?\b").expect("valid self reference regex"));

static ROW_LOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfor\s+(?:no\s+key\s+)?update\b").expect("valid row lock regex")
});

static MODIFYING_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(insert|update|delete|drop|alter|truncate)\b")
        .expect("valid modifying keyword regex")
});

static DANGEROUS_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(pg_sleep|pg_read_file|pg_read_binary_file|pg_ls_dir|lo_import|lo_export|dblink\w*|pg_terminate_backend|pg_cancel_backend|set_config)\s*\(",
    )
    .expect("valid dangerous function regex")
});

static COPY_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bcopy\s+[\w."]+(?:\s*\([^)]*\))?\s+(?:from|to)\b"#)
        .expect("valid COPY regex")
});

/// Gatekeeper between generation and execution.
///
/// Checks run in a fixed order: operation allow-list, embedded writes and
/// dangerous constructs, placeholder substitution, then role gating on the
/// substituted text. Every failure is collected into the outcome.
#[derive(Clone)]
pub struct SecurityValidator {
    allowed_operations: HashSet<Operation>,
    classifier: Arc<dyn RiskClassifier>,
}

impl SecurityValidator {
    pub fn new(
        allowed_operations: impl IntoIterator<Item = Operation>,
        classifier: Arc<dyn RiskClassifier>,
    ) -> Self {
        Self {
            allowed_operations: allowed_operations.into_iter().collect(),
            classifier,
        }
    }

    pub fn validate(&self, sql: &str, identity: &Identity) -> ValidationOutcome {
        let role_level = identity.role_level;
        if sql.trim().is_empty() {
            return ValidationOutcome::rejected(sql, role_level, "Empty SQL statement");
        }

        let operation = classify(sql);
        let masked = mask_string_literals(sql);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut modifications = Vec::new();

        if !self.allowed_operations.contains(&operation) {
            if operation.is_destructive() {
                errors.push(format!("Dangerous operation '{}' not allowed", operation));
            } else {
                errors.push(format!("Operation '{}' not allowed", operation));
            }
        }

        if operation.is_read() {
            let unlocked = ROW_LOCK.replace_all(&masked, "");
            if let Some(keyword) = MODIFYING_KEYWORD.find(&unlocked) {
                errors.push(format!(
                    "Data-modifying keyword '{}' not allowed in a read statement",
                    keyword.as_str().to_uppercase()
                ));
            }
        }

        if let Some(construct) = DANGEROUS_FUNCTION.captures(&masked) {
            errors.push(format!(
                "Dangerous construct '{}' not allowed",
                construct[1].to_lowercase()
            ));
        }
        if COPY_COMMAND.is_match(&masked) {
            errors.push("Dangerous construct 'COPY' not allowed".to_string());
        }

        let substituted = match identity.concrete_id() {
            Some(user_id) => {
                let mut substituted =
                    Self::substitute(sql, &USER_PLACEHOLDER, user_id, &mut modifications);

                if DEPARTMENT_PLACEHOLDER.is_match(&substituted) {
                    match identity.department_id.as_deref() {
                        Some(department_id) => {
                            substituted = Self::substitute(
                                &substituted,
                                &DEPARTMENT_PLACEHOLDER,
                                department_id,
                                &mut modifications,
                            );
                        }
                        None => errors.push(
                            "Query references the current department but the requester has no department"
                                .to_string(),
                        ),
                    }
                }

                if SELF_REFERENCE.is_match(&mask_string_literals(&substituted)) {
                    warnings.push(
                        "CURRENT_USER names the database role, not the requesting employee"
                            .to_string(),
                    );
                }
                substituted
            }
            None => {
                if USER_PLACEHOLDER.is_match(sql)
                    || DEPARTMENT_PLACEHOLDER.is_match(sql)
                    || SELF_REFERENCE.is_match(&masked)
                {
                    errors.push(
                        "Query is scoped to the current user but no user identity is available"
                            .to_string(),
                    );
                }
                sql.to_string()
            }
        };

        let assessment = self.classifier.classify_risk(&substituted);
        for finding in &assessment.findings {
            let required = match (finding.severity, finding.kind, finding.subject.as_deref()) {
                (Severity::Advisory, _, _) => {
                    warnings.push(finding.reason.clone());
                    continue;
                }
                (Severity::Gate(_), RiskKind::PrincipalReference, Some(subject)) => {
                    match Self::required_level_for(subject, identity) {
                        Some(level) => level,
                        None => continue,
                    }
                }
                (Severity::Gate(level), _, _) => level,
            };

            if role_level < required {
                let message = format!(
                    "Insufficient privileges: {} requires role level {} (current level {})",
                    finding.reason, required, role_level
                );
                if !errors.contains(&message) {
                    errors.push(message);
                }
            }
        }

        let is_valid = errors.is_empty();
        if is_valid {
            debug!(
                operation = %operation,
                modifications = modifications.len(),
                warnings = warnings.len(),
                "Statement validated"
            );
        } else {
            warn!(operation = %operation, errors = ?errors, "Statement rejected");
        }

        ValidationOutcome {
            is_valid,
            validated_sql: if is_valid { substituted } else { sql.to_string() },
            operation,
            role_level,
            errors,
            warnings,
            modifications,
        }
    }

    /// Level needed to filter on `subject`, or `None` when it is the requester.
    fn required_level_for(subject: &str, identity: &Identity) -> Option<RoleLevel> {
        let matches = |id: &String| id.eq_ignore_ascii_case(subject);

        if identity
            .concrete_id()
            .is_some_and(|own| own.eq_ignore_ascii_case(subject))
        {
            None
        } else if identity.direct_report_ids.iter().any(matches) {
            Some(RoleLevel::MANAGER)
        } else if identity.department_member_ids.iter().any(matches) {
            Some(RoleLevel::HR)
        } else {
            Some(RoleLevel::ADMIN)
        }
    }

    /// Replace every placeholder outside string literals with `'value'`.
    fn substitute(
        sql: &str,
        placeholder: &Regex,
        value: &str,
        modifications: &mut Vec<String>,
    ) -> String {
        let literal = format!("'{}'", value.replace('\'', "''"));
        let spans = string_literal_spans(sql);
        let mut out = String::with_capacity(sql.len());
        let mut copied = 0;

        for found in placeholder.find_iter(sql) {
            if spans.iter().any(|span| span.contains(&found.start())) {
                continue;
            }
            out.push_str(&sql[copied..found.start()]);
            out.push_str(&literal);
            modifications.push(format!("Replaced {} with {}", found.as_str(), literal));
            copied = found.end();
        }
        out.push_str(&sql[copied..]);
        out
    }
}
