//! JSON bodies exchanged between the relay agent and its callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub hostname: String,
}

/// `GET /fetch-xml/{code}` when the document exists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchXmlResponse {
    pub found: bool,
    /// 1-based priority of the matching search root
    pub path_number: usize,
    pub path: String,
    pub filename: String,
    pub content: String,
    pub size_bytes: u64,
}

/// `GET /fetch-xml/{code}` when no root holds the document (404)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchXmlNotFound {
    pub found: bool,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub searched_paths: Vec<String>,
}

/// `POST /write-csv`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteCsvRequest {
    pub csv_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteCsvResponse {
    pub success: bool,
    pub path: String,
    pub backup: String,
    pub size_bytes: u64,
}

/// `POST /write-xml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteXmlRequest {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteXmlResponse {
    pub success: bool,
    pub path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
}

/// `POST /execute-sql`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSqlRequest {
    pub query: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// `POST /execute-sql` result, tagged by statement type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SqlResponse {
    Select {
        success: bool,
        columns: Vec<String>,
        rows: Vec<Map<String, Value>>,
        row_count: usize,
    },
    Modify {
        success: bool,
        affected_rows: usize,
    },
}

/// Body of every agent error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_response_shape() {
        let select = SqlResponse::Select {
            success: true,
            columns: vec!["id".to_string()],
            rows: vec![],
            row_count: 0,
        };
        let json = serde_json::to_value(&select).unwrap();
        assert_eq!(json["type"], "select");
        assert_eq!(json["row_count"], 0);

        let modify = SqlResponse::Modify {
            success: true,
            affected_rows: 3,
        };
        let json = serde_json::to_value(&modify).unwrap();
        assert_eq!(json["type"], "modify");
        assert_eq!(json["affected_rows"], 3);
    }

    #[test]
    fn test_execute_sql_params_default() {
        let req: ExecuteSqlRequest = serde_json::from_str(r#"{"query":"SELECT 1"}"#).unwrap();
        assert!(req.params.is_empty());
    }
}
