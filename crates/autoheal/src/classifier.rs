//! Failure classification.
//!
//! An ordered table of category rules. The first rule whose pattern set
//! matches any of the error name, message, code or route wins; nothing
//! matching yields [`ErrorCategory::Unknown`]. Severity is derived from the
//! message and the category in strict precedence order.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{ErrorCategory, ErrorDetails, Severity};

/// Pattern set for one category. Unset fields never match.
struct CategoryRule {
    category: ErrorCategory,
    name: Option<Regex>,
    message: Option<Regex>,
    codes: &'static [&'static str],
    route: Option<Regex>,
}

impl CategoryRule {
    fn matches(&self, error: &ErrorDetails, route: Option<&str>) -> bool {
        let name_hit = self.name.as_ref().is_some_and(|re| re.is_match(&error.name));
        let message_hit = self
            .message
            .as_ref()
            .is_some_and(|re| re.is_match(&error.message));
        let code_hit = error.code.as_deref().is_some_and(|code| {
            self.codes
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(code))
        });
        let route_hit = match (&self.route, route) {
            (Some(re), Some(route)) => re.is_match(route),
            _ => false,
        };
        name_hit || message_hit || code_hit || route_hit
    }
}

fn re(pattern: &str) -> Option<Regex> {
    Some(Regex::new(pattern).unwrap())
}

/// Ordered classification table; earlier rules take precedence.
static CATEGORY_RULES: LazyLock<Vec<CategoryRule>> = LazyLock::new(|| {
    vec![
        CategoryRule {
            category: ErrorCategory::Authentication,
            name: re(r"(?i)auth(entication)?error|unauthori[sz]ed|jwt|token(expired)?error"),
            message: re(
                r"(?i)unauthori[sz]ed|invalid (credentials|token|password)|token (expired|invalid)|not authenticated|session expired|login failed",
            ),
            codes: &["401", "AUTH_FAILED", "TOKEN_EXPIRED", "INVALID_TOKEN"],
            route: re(r"^/(api/)?auth(/|$)"),
        },
        CategoryRule {
            category: ErrorCategory::Authorization,
            name: re(r"(?i)forbidden|permission|accessdenied"),
            message: re(
                r"(?i)forbidden|permission denied|access denied|not allowed|insufficient (permissions|privileges)",
            ),
            codes: &["403", "FORBIDDEN", "EACCES", "EPERM"],
            route: re(r"^/(api/)?admin(/|$)"),
        },
        CategoryRule {
            category: ErrorCategory::Validation,
            name: re(r"(?i)validation|schema|invalid(input|argument)"),
            message: re(
                r"(?i)validation|invalid (format|input|value|argument|email|request)|must be|is required|required field|malformed",
            ),
            codes: &["400", "422", "VALIDATION_ERROR", "BAD_REQUEST"],
            route: None,
        },
        CategoryRule {
            category: ErrorCategory::Database,
            name: re(r"(?i)database|sql|prisma|mongo|query(failed)?error|connectionpool"),
            message: re(
                r"(?i)database|deadlock|connection pool|relation .+ does not exist|duplicate key|constraint|query failed|too many connections",
            ),
            codes: &["P2002", "P2025", "23505", "40P01", "ER_LOCK_DEADLOCK", "SQLITE_BUSY"],
            route: None,
        },
        CategoryRule {
            category: ErrorCategory::Payment,
            name: re(r"(?i)stripe|payment|card"),
            message: re(
                r"(?i)payment|card (declined|expired)|insufficient funds|charge|billing|subscription",
            ),
            codes: &["card_declined", "insufficient_funds", "expired_card", "PAYMENT_FAILED"],
            route: re(r"(?i)/(payments?|billing|checkout|subscriptions?)(/|$)"),
        },
        CategoryRule {
            category: ErrorCategory::Email,
            name: re(r"(?i)smtp|mail"),
            message: re(
                r"(?i)smtp|mail (server|delivery)|email (delivery|send)|failed to send email|bounced|mailbox",
            ),
            codes: &["EENVELOPE", "EMESSAGE"],
            route: re(r"(?i)/(emails?|mail|notifications?)(/|$)"),
        },
        CategoryRule {
            category: ErrorCategory::ExternalApi,
            name: re(r"(?i)axios|fetch|http(client)?error|upstream|apierror"),
            message: re(
                r"(?i)upstream|bad gateway|service unavailable|third[- ]party|api (error|request failed)|status code 5\d\d",
            ),
            codes: &["502", "503", "504", "UPSTREAM_ERROR"],
            route: re(r"(?i)/(webhooks?|integrations?)(/|$)"),
        },
        CategoryRule {
            category: ErrorCategory::RateLimit,
            name: re(r"(?i)ratelimit|throttl"),
            message: re(r"(?i)rate limit|too many requests|throttl|quota exceeded"),
            codes: &["429", "RATE_LIMITED"],
            route: None,
        },
        CategoryRule {
            category: ErrorCategory::FileUpload,
            name: re(r"(?i)multer|upload|filesize"),
            message: re(
                r"(?i)upload|file (too large|size|type)|unsupported (file|media)|payload too large|multipart",
            ),
            codes: &["413", "415", "LIMIT_FILE_SIZE", "LIMIT_UNEXPECTED_FILE"],
            route: re(r"(?i)/(uploads?|files|media)(/|$)"),
        },
        CategoryRule {
            category: ErrorCategory::Network,
            name: re(r"(?i)network|socket|timeout|dns"),
            message: re(
                r"(?i)econnrefused|econnreset|etimedout|enotfound|socket hang up|network|timed out|timeout|dns|connection (reset|refused|closed)",
            ),
            codes: &["ECONNREFUSED", "ECONNRESET", "ETIMEDOUT", "ENOTFOUND", "EAI_AGAIN", "EPIPE"],
            route: None,
        },
    ]
});

/// Messages that are critical regardless of category.
static CRITICAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)data loss|lost data|data (was )?deleted unexpectedly").unwrap(),
        Regex::new(r"(?i)security (breach|violation)|breach detected|sql injection").unwrap(),
        Regex::new(r"(?i)unauthori[sz]ed access attempt|privilege escalation").unwrap(),
        Regex::new(r"(?i)payment (failed|failure)|charge failed|double charge").unwrap(),
        Regex::new(r"(?i)corrupt(ed|ion)|integrity (violation|check failed)").unwrap(),
    ]
});

/// Error names that point at a programming-logic fault.
static LOGIC_FAULT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)type|reference|range|syntax|assert|null|undefined|panic|invariant|unreachable")
        .unwrap()
});

/// Classify an error into a category.
#[must_use]
pub fn classify_error(error: &ErrorDetails, route: Option<&str>) -> ErrorCategory {
    CATEGORY_RULES
        .iter()
        .find(|rule| rule.matches(error, route))
        .map_or(ErrorCategory::Unknown, |rule| rule.category)
}

/// Whether a message matches one of the always-critical patterns.
#[must_use]
pub fn is_critical_message(message: &str) -> bool {
    CRITICAL_PATTERNS.iter().any(|re| re.is_match(message))
}

/// Derive the severity of an error in a category.
///
/// Precedence:
/// 1. critical message patterns override everything
/// 2. high for authentication, authorization, payment, database
/// 3. medium for validation, external_api, email
/// 4. low for rate_limit, file_upload, network
/// 5. otherwise high for logic-fault error names, else medium
#[must_use]
pub fn determine_severity(error: &ErrorDetails, category: ErrorCategory) -> Severity {
    if is_critical_message(&error.message) {
        return Severity::Critical;
    }

    match category {
        ErrorCategory::Authentication
        | ErrorCategory::Authorization
        | ErrorCategory::Payment
        | ErrorCategory::Database => Severity::High,
        ErrorCategory::Validation | ErrorCategory::ExternalApi | ErrorCategory::Email => {
            Severity::Medium
        }
        ErrorCategory::RateLimit | ErrorCategory::FileUpload | ErrorCategory::Network => {
            Severity::Low
        }
        ErrorCategory::Unknown => {
            if LOGIC_FAULT_NAME.is_match(&error.name) {
                Severity::High
            } else {
                Severity::Medium
            }
        }
    }
}
