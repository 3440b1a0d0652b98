use serde_json::json;

use crate::error::LifecycleError;

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
        Self {
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

    pub fn no_workspace() -> Self {
        Self::new("no_workspace", "select a workspace first")
    }

    pub fn unauthenticated() -> Self {
        Self::new("unauthenticated", "sign in to continue")
    }

    /// Storage or IO failure; the full chain goes to the log only.
    pub fn internal(context: &str, e: anyhow::Error) -> Self {
        tracing::error!(error = ?e, "{}", context);
        Self::new("internal", "internal error")
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<LifecycleError> for HandlerErr {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Internal(inner) => Self::internal("lifecycle operation failed", inner),
            other => Self {
                code: other.code(),
                details: other.details(),
                message: other.to_string(),
            },
        }
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_keep_code_and_details() {
        let e: HandlerErr = LifecycleError::Deadline {
            deadline: "2026-03-10T12:00:00.000000Z".into(),
        }
        .into();
        let resp = e.response("7");
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("deadline_passed"));
        assert_eq!(resp["error"]["details"]["deadline"], json!("2026-03-10T12:00:00.000000Z"));
    }

    #[test]
    fn internal_errors_are_opaque() {
        let e: HandlerErr = LifecycleError::Internal(anyhow::anyhow!("disk I/O error at page 12")).into();
        assert_eq!(e.code, "internal");
        assert_eq!(e.message, "internal error");
        assert!(e.details.is_none());
    }
}
