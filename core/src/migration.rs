use std::{fmt::Debug, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::operations::Operation;

/// A migration: a named, ordered list of operations,
/// plus an optional override for the version schema name it exposes — lets
/// two migrations share a version schema, or a migration pick a friendlier
/// schema name than the generated default.
#[derive(Serialize, Deserialize, Debug)]
pub struct Migration {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub version_schema: Option<String>,
    pub operations: Vec<Box<dyn Operation>>,
}

impl Migration {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Migration {
        Migration {
            name: name.into(),
            description,
            version_schema: None,
            operations: vec![],
        }
    }

    pub fn with_operation(mut self, operation: impl Operation + 'static) -> Self {
        self.operations.push(Box::new(operation));
        self
    }

    pub fn from_file(path: impl AsRef<Path>, hint: Option<Format>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| Format::from_str(ext).ok())
            .or(hint)
            .ok_or_else(|| anyhow::anyhow!("migration {} has no file extension", path.to_string_lossy()))?;

        let data = fs::read_to_string(path)?;
        let name = path.file_stem().and_then(|name| name.to_str()).map(ToOwned::to_owned);

        Self::from_text(&data, name, format)
    }

    pub fn from_text(data: &str, name: Option<String>, format: Format) -> anyhow::Result<Self> {
        #[derive(Serialize, Deserialize)]
        struct File {
            name: Option<String>,
            description: Option<String>,
            #[serde(default)]
            version_schema: Option<String>,
            operations: Vec<Box<dyn Operation>>,
        }

        let file: File = match format {
            Format::Toml => toml::from_str(data)?,
            Format::Json => serde_json::from_str(data)?,
        };

        let name = file.name.or(name).ok_or_else(|| anyhow::anyhow!("missing migration name"))?;

        Ok(Migration {
            name,
            description: file.description,
            version_schema: file.version_schema,
            operations: file.operations,
        })
    }

    pub fn version_schema_name(&self) -> String {
        self.version_schema
            .clone()
            .unwrap_or_else(|| crate::naming::version_schema_name(&self.name))
    }

    /// An operation marked [`Operation::is_isolated`] (e.g.
    /// `set_replica_identity`) may not share a migration with any other
    /// operation.
    pub fn validate_isolation(&self) -> crate::error::Result<()> {
        if self.operations.len() > 1 && self.operations.iter().any(|op| op.is_isolated()) {
            return Err(crate::error::EngineError::IsolatedOperationNotAlone(
                self.name.clone(),
                self.operations.len(),
            ));
        }
        Ok(())
    }
}

impl PartialEq for Migration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.operations.len() == other.operations.len()
            && self
                .operations
                .iter()
                .map(|a| serde_json::to_string(a).unwrap())
                .zip(other.operations.iter().map(|a| serde_json::to_string(a).unwrap()))
                .all(|(a, b)| a == b)
    }
}

impl Eq for Migration {}

impl Clone for Migration {
    fn clone(&self) -> Self {
        let serialized = serde_json::to_string(self).unwrap();
        serde_json::from_str(&serialized).unwrap()
    }
}

pub enum Format {
    Toml,
    Json,
}

pub struct InvalidExtension;

impl FromStr for Format {
    type Err = InvalidExtension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toml" => Ok(Format::Toml),
            "json" => Ok(Format::Json),
            _ => Err(InvalidExtension),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::operations::{ColumnDef, CreateTable, ReplicaIdentityKind, SetReplicaIdentity};

    use super::Migration;

    #[test]
    fn isolated_operation_alone_is_valid() {
        let migration = Migration::new("widen_replica_identity", None).with_operation(SetReplicaIdentity {
            table: "users".to_string(),
            identity: ReplicaIdentityKind::Full,
            index_name: None,
        });

        assert!(migration.validate_isolation().is_ok());
    }

    #[test]
    fn isolated_operation_sharing_a_migration_is_rejected() {
        let migration = Migration::new("widen_and_create", None)
            .with_operation(SetReplicaIdentity {
                table: "users".to_string(),
                identity: ReplicaIdentityKind::Full,
                index_name: None,
            })
            .with_operation(CreateTable {
                table: "widgets".to_string(),
                columns: vec![ColumnDef {
                    name: "id".to_string(),
                    r#type: "INTEGER".to_string(),
                    nullable: false,
                    default: None,
                    comment: None,
                    generated: None,
                }],
                primary_key: vec!["id".to_string()],
            });

        let err = migration.validate_isolation().unwrap_err();
        assert!(matches!(err, EngineError::IsolatedOperationNotAlone(name, 2) if name == "widen_and_create"));
    }
}
