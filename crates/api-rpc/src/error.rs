//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use citewatch_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
    pub const DRIVER_ERROR: i32 = 5002;
}

pub fn invalid_params(msg: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg.into(), None::<()>)
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let (code, message) = match err {
        AppError::Validation(msg) => (code::VALIDATION_ERROR, msg),
        AppError::Domain(e) => (code::VALIDATION_ERROR, e.to_string()),
        AppError::Serialization(e) => (code::VALIDATION_ERROR, e.to_string()),
        AppError::NotFound(msg) => (code::NOT_FOUND, msg),
        AppError::InvalidState(msg) => (code::CONFLICT, msg),
        AppError::Database(msg) => (code::DB_ERROR, msg),
        AppError::Driver(e) => (code::DRIVER_ERROR, e.to_string()),
        AppError::Io(e) => (code::DRIVER_ERROR, e.to_string()),
        AppError::Platform(e) => (code::INTERNAL_ERROR, e.to_string()),
        AppError::Config(msg) => (code::INTERNAL_ERROR, msg),
        AppError::Internal(msg) => (code::INTERNAL_ERROR, msg),
    };
    ErrorObjectOwned::owned(code, message, None::<()>)
}
