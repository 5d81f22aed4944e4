// Uniform command output
// Every command prints exactly one envelope on stdout; logs stay on stderr.

use serde_json::{json, Value};

use crate::error::Error;

/// Success envelope: `{"ok":true,"data":...}`
pub fn success(data: Value) -> Value {
    json!({ "ok": true, "data": data })
}

/// Error envelope: `{"ok":false,"error":{"code":...,"message":...}}`
pub fn failure(err: &Error) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": err.envelope_code(),
            "message": err.to_string(),
        }
    })
}

/// Print the envelope for a finished command and return the process exit code.
pub fn emit(result: Result<Value, Error>) -> i32 {
    match result {
        Ok(data) => {
            println!("{}", success(data));
            0
        }
        Err(err) => {
            println!("{}", failure(&err));
            1
        }
    }
}
