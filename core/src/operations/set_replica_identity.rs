use serde::{Deserialize, Serialize};

use crate::action::{DBAction, SetReplicaIdentity as SetReplicaIdentityAction};
use crate::db::Connection;
use crate::error::{EngineError, Result};
use crate::schema::Schema;

use super::{MigrationContext, Operation};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaIdentityKind {
    Default,
    Full,
    Nothing,
    Index,
}

/// Set a table's REPLICA IDENTITY,
/// governing what a logical-replication UPDATE/DELETE record carries for
/// old row values. Metadata-only; applies immediately.
#[derive(Serialize, Deserialize, Debug)]
pub struct SetReplicaIdentity {
    pub table: String,
    pub identity: ReplicaIdentityKind,
    /// Required when `identity` is `Index`.
    pub index_name: Option<String>,
}

#[typetag::serde(name = "set_replica_identity")]
#[async_trait::async_trait]
impl Operation for SetReplicaIdentity {
    fn is_isolated(&self) -> bool {
        true
    }

    async fn validate(&self, db: &mut dyn Connection, schema: &Schema) -> Result<()> {
        let table = schema.get_table(db, &self.table).await.map_err(EngineError::Other)?;

        if self.identity == ReplicaIdentityKind::Index {
            let index_name = self
                .index_name
                .as_ref()
                .ok_or(EngineError::FieldRequired("index_name", "set_replica_identity"))?;
            if table.get_index(index_name).is_none() {
                return Err(EngineError::IndexDoesNotExist(index_name.clone(), self.table.clone()));
            }
        }

        Ok(())
    }

    async fn start(&self, _ctx: &MigrationContext, db: &mut dyn Connection, schema: &mut Schema) -> Result<()> {
        let identity = match self.identity {
            ReplicaIdentityKind::Default => "DEFAULT".to_string(),
            ReplicaIdentityKind::Full => "FULL".to_string(),
            ReplicaIdentityKind::Nothing => "NOTHING".to_string(),
            ReplicaIdentityKind::Index => format!(
                "USING INDEX {}",
                crate::ident::quote_ident(self.index_name.as_deref().unwrap_or_default())
            ),
        };

        let action = SetReplicaIdentityAction {
            table: self.table.clone(),
            identity,
        };
        action.execute(db).await?;
        schema.change_table(&self.table, |_| {});
        Ok(())
    }

    async fn complete(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _ctx: &MigrationContext, _db: &mut dyn Connection) -> Result<()> {
        Ok(())
    }
}
