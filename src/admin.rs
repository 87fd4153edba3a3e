//! NIP-86 relay management JSON-RPC: `list_allowed_users`, `allow_user`,
//! `ban_user`, gated on an authenticated admin pubkey. Carried over from the
//! teacher's `handle_nip86` (SPEC_FULL §6), generalized onto the [`Store`]
//! trait so it works against either backend.

use serde_json::{json, Value};

use crate::store::Store;

/// Handle one JSON-RPC request object arriving over the relay's WebSocket
/// connection (NIP-86 requests are plain JSON objects, not the `["TYPE",
/// ...]` envelope the rest of the protocol uses, so the socket layer routes
/// them here before they ever reach the pipeline).
///
/// `caller` is the currently NIP-42 authenticated pubkey, if any.
pub async fn handle_rpc(request: &Value, store: &dyn Store, caller: Option<&str>) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str);
    let params = request.get("params").and_then(Value::as_array);

    let Some(method) = method else {
        return error_response(id, -32600, "missing method");
    };

    let is_admin = match caller {
        Some(pubkey) => store.is_admin(pubkey).await.unwrap_or(false),
        None => false,
    };
    if !is_admin {
        return error_response(id, -32000, "unauthorized: admin access required");
    }

    match method {
        "list_allowed_users" => match store.list_allowed_users().await {
            Ok(users) => success_response(id, json!(users)),
            Err(err) => error_response(id, -32001, &format!("store error: {err}")),
        },
        "allow_user" => {
            let Some(pubkey) = params.and_then(|p| p.first()).and_then(Value::as_str) else {
                return error_response(id, -32602, "missing pubkey parameter");
            };
            match store.allow_user(pubkey).await {
                Ok(()) => success_response(id, json!(true)),
                Err(err) => error_response(id, -32001, &format!("store error: {err}")),
            }
        }
        "ban_user" => {
            let Some(pubkey) = params.and_then(|p| p.first()).and_then(Value::as_str) else {
                return error_response(id, -32602, "missing pubkey parameter");
            };
            match store.ban_user(pubkey).await {
                Ok(()) => success_response(id, json!(true)),
                Err(err) => error_response(id, -32001, &format!("store error: {err}")),
            }
        }
        other => error_response(id, -32601, &format!("unknown method: {other}")),
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i32, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn non_admin_caller_is_rejected() {
        let store = MemoryStore::new();
        let req = json!({"id": 1, "method": "list_allowed_users", "params": []});
        let resp = handle_rpc(&req, &store, Some("someone")).await;
        assert!(resp.get("error").is_some());
    }

    #[tokio::test]
    async fn admin_can_allow_and_list_users() {
        let store = MemoryStore::new();
        store.grant_admin("admin-key");

        let req = json!({"id": 1, "method": "allow_user", "params": ["pub1"]});
        let resp = handle_rpc(&req, &store, Some("admin-key")).await;
        assert_eq!(resp["result"], json!(true));

        let req = json!({"id": 2, "method": "list_allowed_users", "params": []});
        let resp = handle_rpc(&req, &store, Some("admin-key")).await;
        assert_eq!(resp["result"], json!(["pub1"]));

        let req = json!({"id": 3, "method": "ban_user", "params": ["pub1"]});
        let resp = handle_rpc(&req, &store, Some("admin-key")).await;
        assert_eq!(resp["result"], json!(true));
        let req = json!({"id": 4, "method": "list_allowed_users", "params": []});
        let resp = handle_rpc(&req, &store, Some("admin-key")).await;
        assert_eq!(resp["result"], json!(Vec::<String>::new()));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected_even_for_admin() {
        let req = json!({"id": 2, "method": "delete_everything"});
        let resp = handle_rpc(&req, &MemoryStore::new(), None).await;
        assert!(resp.get("error").is_some());
    }
}
