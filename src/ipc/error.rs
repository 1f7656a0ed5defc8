use serde_json::json;

use crate::curriculum::CatalogError;
use crate::history::HistoryError;
use crate::progression::Rejection;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn no_workspace() -> Self {
        Self::new("no_workspace", "select a workspace first")
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> Self {
        tracing::warn!(error = %e, table, "database write failed");
        Self::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn rejected(rejection: &Rejection) -> Self {
        Self::new("validation_failed", rejection.message()).with_details(rejection.details())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        tracing::warn!(error = %e, "database query failed");
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

impl From<HistoryError> for HandlerErr {
    fn from(e: HistoryError) -> Self {
        tracing::warn!(error = %e, "history lookup failed");
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

impl From<CatalogError> for HandlerErr {
    fn from(e: CatalogError) -> Self {
        tracing::warn!(error = %e, "curriculum load failed");
        HandlerErr::new("curriculum_unavailable", e.to_string())
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        tracing::warn!(error = %e, "workspace operation failed");
        HandlerErr::new("db_query_failed", e.to_string())
    }
}
