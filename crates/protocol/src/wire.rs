use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outbound reply to a server-initiated request.
#[derive(Debug, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub result: Value,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Any inbound JSON-RPC message. The combination of fields present decides
/// what it is: id + result/error is a response, method without id is a
/// notification, method with id is a server-initiated request.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

impl InboundMessage {
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    pub fn is_server_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }
}

/// Identity reported by the server in the initialize result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// One callable capability advertised by tools/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_classification() {
        let resp: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(resp.is_response());
        assert!(!resp.is_notification());

        let notif: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert!(notif.is_notification());
        assert!(!notif.is_server_request());

        let req: InboundMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"sampling/createMessage"}"#)
                .unwrap();
        assert!(req.is_server_request());
        assert!(!req.is_response());
    }

    #[test]
    fn test_request_skips_absent_params() {
        let req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: 3,
            method: "tools/list".to_string(),
            params: None,
        };
        let s = serde_json::to_string(&req).unwrap();
        assert!(!s.contains("params"));
    }
}
