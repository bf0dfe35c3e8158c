//! Label keys and fixed label values

/// Label key: lifecycle operation
pub const OPERATION: &str = "operation";

/// Label key: operation outcome (`success` or an error kind)
pub const OUTCOME: &str = "outcome";

/// Label key: SASL mechanism
pub const MECHANISM: &str = "mechanism";

/// Label key: failure reason
pub const REASON: &str = "reason";

/// Operation: create a user
pub const OPERATION_CREATE: &str = "create";

/// Operation: recreate a user with new credentials
pub const OPERATION_UPDATE: &str = "update";

/// Operation: delete a user
pub const OPERATION_DELETE: &str = "delete";

/// Outcome of a successful operation
pub const OUTCOME_SUCCESS: &str = "success";

/// SCRAM-SHA-1 mechanism
pub const MECHANISM_SCRAM_SHA1: &str = "scram_sha_1";

/// SCRAM-SHA-256 mechanism
pub const MECHANISM_SCRAM_SHA256: &str = "scram_sha_256";
