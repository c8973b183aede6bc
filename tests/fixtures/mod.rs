//! Payloads and images shared by the integration tests.

use serde_json::{json, Value};

/// PNG signature followed by filler; enough for format sniffing.
pub fn png_bytes(tag: &str) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

pub const GLB_BYTES: &[u8] = b"glTF\x02\x00\x00\x00model";

/// Submission response carrying a job id, Tripo style.
pub fn submit_response(job_id: &str) -> Value {
    json!({ "code": 0, "data": { "task_id": job_id } })
}

/// Status response without any file descriptors.
pub fn status_response(status: &str) -> Value {
    json!({ "code": 0, "data": { "task_id": "ignored", "status": status } })
}

/// Status payload with descriptors next to the status (depth 1).
pub fn done_with_files_flat(urls: &[String]) -> Value {
    let files: Vec<Value> = urls.iter().map(|url| json!({ "url": url })).collect();
    json!({ "status": "DONE", "files": files })
}

/// Tencent-style envelope: everything under `Response`.
pub fn done_with_files_tencent(urls: &[String]) -> Value {
    let files: Vec<Value> = urls
        .iter()
        .map(|url| json!({ "Type": "GLB", "Url": url }))
        .collect();
    json!({ "Response": { "Status": "DONE", "ResultFile3Ds": files, "RequestId": "req-1" } })
}

/// Descriptors buried three objects deep.
pub fn done_with_files_nested(urls: &[String]) -> Value {
    let files: Vec<Value> = urls
        .iter()
        .map(|url| json!({ "download_url": url }))
        .collect();
    json!({
        "code": 0,
        "data": {
            "status": "success",
            "result": { "output": { "files": files } }
        }
    })
}
