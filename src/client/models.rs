//! Data model for credential lifecycle requests

use crate::protocol::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database whose role grants live in `admin` and span every database
const ADMIN_DATABASE: &str = "admin";

/// Identifies the database a credential belongs to.
///
/// `account` and `deployment` are carried for the caller's bookkeeping and do not
/// influence any command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDeployment {
    /// Owning account (informational)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account: String,
    /// Deployment identifier (informational)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment: String,
    /// Database the user is created on
    #[serde(rename = "name")]
    pub database: String,
}

impl TargetDeployment {
    /// Target a database
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Set the owning account
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Set the deployment identifier
    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }
}

/// A database user to provision.
///
/// `Debug` never prints the password.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Grant read-only roles instead of read-write
    #[serde(default)]
    pub read_only: bool,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Credential {
    /// Read-write credential
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            read_only: false,
        }
    }

    /// Set whether the user gets read-only roles
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Role granted on `database`.
    ///
    /// Users created on `admin` get the cluster-wide variant.
    pub fn role_name(&self, database: &str) -> &'static str {
        match (database == ADMIN_DATABASE, self.read_only) {
            (true, true) => "readAnyDatabase",
            (true, false) => "readWriteAnyDatabase",
            (false, true) => "read",
            (false, false) => "readWrite",
        }
    }

    /// `roles` array for `createUser`
    pub(crate) fn roles(&self, database: &str) -> Vec<Bson> {
        vec![Bson::Document(
            Document::new()
                .with("role", self.role_name(database))
                .with("db", database),
        )]
    }
}
