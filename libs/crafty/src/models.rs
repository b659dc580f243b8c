//! Wire types for the Crafty API v2.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Body of `POST /api/v2/auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

/// Response of `POST /api/v2/auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub status: String,
    pub data: Option<LoginData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub token: String,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

/// Crafty has used both numeric and string server ids across releases.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServerId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerId::Numeric(id) => write!(f, "{}", id),
            ServerId::Text(id) => f.write_str(id),
        }
    }
}

/// One entry of `GET /api/v2/servers`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSummary {
    pub server_id: ServerId,
    pub server_port: u16,
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Response of `GET /api/v2/servers`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerList {
    #[serde(default)]
    pub data: Vec<ServerSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_accepts_both_forms() {
        let list: ServerList = serde_json::from_str(
            r#"{"data":[{"server_id":7,"server_port":25565},{"server_id":"a1b2","server_port":25566}]}"#,
        )
        .unwrap();

        assert_eq!(list.data[0].server_id, ServerId::Numeric(7));
        assert_eq!(list.data[1].server_id.to_string(), "a1b2");
        assert_eq!(list.data[1].server_port, 25566);
    }

    #[test]
    fn test_login_response_without_data() {
        let resp: LoginResponse = serde_json::from_str(r#"{"status":"error"}"#).unwrap();
        assert!(resp.data.is_none());
    }
}
