//! JSON-RPC wire structures

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vss_core::{Format, Root, Timestamp};

pub const JSONRPC_VERSION: &str = "2.0";

/// `params` of any request, checked by the schema rules beforehand
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsDto {
    pub instance: Option<String>,
    pub schema: Option<String>,
    pub path: Option<String>,
    pub format: Option<Format>,
    pub root: Option<Root>,
    #[serde(default)]
    pub data: Value,
    pub metadata: Option<Value>,
    pub query: Option<QueryDto>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryDto {
    pub gte: Option<Timestamp>,
    pub lte: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct DataResponseDto<'a> {
    pub jsonrpc: &'static str,
    pub id: Option<&'a Value>,
    pub result: DataResultDto<'a>,
}

#[derive(Debug, Serialize)]
pub struct DataResultDto<'a> {
    pub instance: &'a str,
    pub data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
pub struct EmptyResult {}

#[derive(Debug, Serialize)]
pub struct OkResponseDto<'a> {
    pub jsonrpc: &'static str,
    pub id: Option<&'a Value>,
    pub result: EmptyResult,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponseDto<'a> {
    pub jsonrpc: &'static str,
    pub id: Option<&'a Value>,
    pub error: ErrorBodyDto<'a>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBodyDto<'a> {
    pub code: u16,
    pub message: &'a str,
    pub data: ErrorDataDto<'a>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDataDto<'a> {
    pub reason: &'a str,
}
