//! JSON-RPC envelopes and method shapes spoken to the build host.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use projsys_types::ProjectFileHandle;

pub const HAS_USABLE_TOOLCHAIN: &str = "buildHost/hasUsableToolchain";
pub const IS_PROJECT_FILE_SUPPORTED: &str = "buildHost/isProjectFileSupported";
pub const GET_PROJECTS_IN_SOLUTION: &str = "buildHost/getProjectsInSolution";
pub const LOAD_PROJECT_FILE: &str = "buildHost/loadProjectFile";
pub const SHUTDOWN: &str = "buildHost/shutdown";
pub const GET_DIAGNOSTIC_LOG_ITEMS: &str = "projectFile/getDiagnosticLogItems";
pub const GET_PROJECT_FILE_INFOS: &str = "projectFile/getProjectFileInfos";
pub const UNLOAD_PROJECT_FILE: &str = "projectFile/unload";

/// Notification the host uses to forward its own log output.
pub const LOG_NOTIFICATION: &str = "buildHost/log";

pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 request.
#[derive(Debug, Serialize)]
pub struct Request<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<P>,
}

impl<'a, P: Serialize> Request<'a, P> {
    pub fn new(id: u64, method: &'a str, params: Option<P>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Reply to a request the host sent to us.
pub(crate) fn method_not_found(id: &Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

#[derive(Debug)]
pub(crate) enum IncomingFrame {
    Response {
        id: u64,
        outcome: Result<Value, RemoteError>,
    },
    HostRequest {
        id: Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Classify a raw frame. Returns `None` for frames that fit no JSON-RPC shape.
///
/// A response whose `result` is `null` is a success; `void` methods reply that way.
pub(crate) fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame.get("method").and_then(Value::as_str).map(String::from);
    let result = frame.get("result");
    let error = frame.get("error");

    match (id, method) {
        (Some(id), None) if error.is_some() => {
            let remote = error
                .cloned()
                .and_then(|e| serde_json::from_value::<RemoteError>(e).ok())
                .unwrap_or_else(|| RemoteError {
                    code: 0,
                    message: "malformed error object".to_string(),
                    data: None,
                });
            Some(IncomingFrame::Response {
                id: id.as_u64()?,
                outcome: Err(remote),
            })
        }
        (Some(id), None) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            outcome: Ok(result?.clone()),
        }),
        (Some(id), Some(method)) => Some(IncomingFrame::HostRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method)) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        (None, None) => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileParams<'a> {
    pub project_file_path: &'a Path,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionParams<'a> {
    pub solution_file_path: &'a Path,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProjectFileParams<'a> {
    pub project_file_path: &'a Path,
    pub language_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleParams {
    pub project_file: ProjectFileHandle,
}

/// Payload of [`LOG_NOTIFICATION`].
#[derive(Debug, Deserialize)]
pub(crate) struct LogParams {
    #[serde(default)]
    pub level: Option<String>,
    pub message: String,
}
