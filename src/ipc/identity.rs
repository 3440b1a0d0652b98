use super::types::Request;
use crate::lifecycle::profiles::Principal;

fn non_empty(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Principal carried by the request, or `None` when the caller is anonymous.
pub fn resolve_identity(req: &Request) -> Option<Principal> {
    let auth = req.auth.as_ref()?;
    Some(Principal {
        user_id: non_empty(auth.user_id.as_ref())?,
        name: non_empty(auth.name.as_ref()),
        email: non_empty(auth.email.as_ref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(v: serde_json::Value) -> Request {
        serde_json::from_value(v).expect("request")
    }

    #[test]
    fn blank_or_missing_user_id_is_anonymous() {
        assert!(resolve_identity(&req(json!({ "id": "1", "method": "health" }))).is_none());
        assert!(resolve_identity(&req(json!({
            "id": "1", "method": "health", "auth": { "userId": "  " }
        })))
        .is_none());
    }

    #[test]
    fn principal_fields_are_trimmed() {
        let p = resolve_identity(&req(json!({
            "id": "1",
            "method": "user.get",
            "auth": { "userId": " u-1 ", "name": "Asha", "email": "" }
        })))
        .expect("principal");
        assert_eq!(p.user_id, "u-1");
        assert_eq!(p.name.as_deref(), Some("Asha"));
        assert!(p.email.is_none());
    }
}
