//! Core types for ZQLZ sync

use serde::{Deserialize, Serialize};

use crate::connection_string::ConnectionUrl;

/// Kind of database a saved connection points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseType {
    Postgres,
    MySql,
    Mssql,
    ClickHouse,
}

impl DatabaseType {
    /// Convert to string representation for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Mssql => "mssql",
            Self::ClickHouse => "clickhouse",
        }
    }

    /// Parse from the storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "mssql" | "sqlserver" => Some(Self::Mssql),
            "clickhouse" => Some(Self::ClickHouse),
            _ => None,
        }
    }

    /// Guess the database type from a connection string's scheme.
    ///
    /// ClickHouse is reached over its HTTP interface, so `http`/`https`
    /// schemes map to it. Blank or unparseable strings yield `None`.
    pub fn from_connection_string(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }

        let url = ConnectionUrl::parse(raw).ok()?;
        match url.scheme().to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "mssql" | "sqlserver" => Some(Self::Mssql),
            "http" | "https" => Some(Self::ClickHouse),
            _ => None,
        }
    }

    /// Human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Mssql => "SQL Server",
            Self::ClickHouse => "ClickHouse",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy deciding whether a connection's password ever leaves the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// The full connection string, password included, is stored in the cloud
    Cloud,
    /// The password is stripped before anything is sent to the cloud
    #[default]
    CloudWithoutPassword,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::CloudWithoutPassword => "cloud_without_password",
        }
    }

    /// Parse from the storage representation. Unknown values fall back to
    /// the password-less mode so a bad row can never leak a credential.
    pub fn from_str(s: &str) -> Self {
        match s {
            "cloud" => Self::Cloud,
            _ => Self::CloudWithoutPassword,
        }
    }

    /// Whether the password may be sent to the remote store
    pub fn syncs_password(&self) -> bool {
        matches!(self, Self::Cloud)
    }
}
