use tracing::debug;

use super::{QueryResult, StatementEvaluator};
use crate::ast::Statement;
use crate::errors::{Result, internal, not_implemented};

impl StatementEvaluator<'_> {
    /// Forward a DDL statement to the store.
    pub(crate) async fn execute_ddl(&self, statement: &Statement) -> Result<QueryResult> {
        match statement {
            Statement::CreateTable(create) => {
                if create.temporary {
                    return Err(not_implemented!("CREATE TEMPORARY TABLE"));
                }
                self.store
                    .create_table(&create.schema, create.if_not_exists)
                    .await?;
            }
            Statement::DropTable(drop) => {
                for name in &drop.names {
                    self.store.drop_table(name, drop.if_exists).await?;
                }
            }
            Statement::CreateSchema(create) => {
                self.store
                    .create_schema(&create.name, create.if_not_exists)
                    .await?;
            }
            Statement::DropSchema(drop) => {
                self.store
                    .drop_schema(&drop.name, drop.if_exists, drop.cascade)
                    .await?;
            }
            Statement::AlterTable(name) => {
                return Err(not_implemented!("ALTER TABLE {name}"));
            }
            other => return Err(internal!("{} is not a DDL statement", other.kind())),
        }
        debug!(kind = statement.kind(), "executed ddl");
        Ok(QueryResult::RowCount(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ColumnSchema, CreateSchema, CreateTable, DataType, DropSchema, DropTable, ObjectName,
        TableSchema,
    };
    use crate::errors::ExecError;
    use crate::store::{MemoryStore, MutationOptions};

    fn create(schema: TableSchema, temporary: bool) -> Statement {
        Statement::CreateTable(CreateTable {
            schema,
            if_not_exists: false,
            temporary,
        })
    }

    #[tokio::test]
    async fn create_and_drop() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());

        exec.execute_ddl(&Statement::CreateSchema(CreateSchema {
            name: "app".to_string(),
            if_not_exists: false,
        }))
        .await
        .unwrap();
        let schema =
            TableSchema::new("t", vec![ColumnSchema::new("a", DataType::Int)]).with_schema("app");
        exec.execute_ddl(&create(schema, false)).await.unwrap();
        assert!(store.records(&ObjectName::qualified("app", "t")).unwrap().is_empty());

        exec.execute_ddl(&Statement::DropTable(DropTable {
            names: vec![ObjectName::qualified("app", "t")],
            if_exists: false,
        }))
        .await
        .unwrap();
        assert!(store.records(&ObjectName::qualified("app", "t")).is_err());

        exec.execute_ddl(&Statement::DropSchema(DropSchema {
            name: "app".to_string(),
            if_exists: false,
            cascade: false,
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unsupported_ddl() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());

        let schema = TableSchema::new("t", vec![ColumnSchema::new("a", DataType::Int)]);
        let err = exec.execute_ddl(&create(schema, true)).await.unwrap_err();
        assert!(matches!(err, ExecError::NotImplemented(_)));

        let err = exec
            .execute_ddl(&Statement::AlterTable(ObjectName::new("t")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NotImplemented(_)));
    }
}
