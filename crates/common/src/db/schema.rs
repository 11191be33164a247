//! Schema bootstrap: create and drop the collector tables from the entities

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::sea_query::{Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, EntityTrait, Schema};
use tracing::info;

/// Create every table (in foreign-key order) if it does not exist
pub async fn create_tables<C: ConnectionTrait>(conn: &C) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    let statements: Vec<TableCreateStatement> = vec![
        schema.create_table_from_entity(ImportEntity).if_not_exists().to_owned(),
        schema.create_table_from_entity(IdentifierEntity).if_not_exists().to_owned(),
        schema.create_table_from_entity(UrlEntity).if_not_exists().to_owned(),
        schema.create_table_from_entity(RequestLogEntity).if_not_exists().to_owned(),
        schema.create_table_from_entity(EngagementEntity).if_not_exists().to_owned(),
    ];

    for stmt in &statements {
        conn.execute(backend.build(stmt)).await?;
    }

    info!(tables = statements.len(), "Schema created");
    Ok(())
}

/// Drop every table (dependents first)
pub async fn drop_tables<C: ConnectionTrait>(conn: &C) -> Result<()> {
    let backend = conn.get_database_backend();

    drop_table(conn, EngagementEntity).await?;
    drop_table(conn, RequestLogEntity).await?;
    drop_table(conn, UrlEntity).await?;
    drop_table(conn, IdentifierEntity).await?;
    drop_table(conn, ImportEntity).await?;

    info!(backend = ?backend, "Schema dropped");
    Ok(())
}

/// Drop and recreate every table
pub async fn reset_tables<C: ConnectionTrait>(conn: &C) -> Result<()> {
    drop_tables(conn).await?;
    create_tables(conn).await
}

async fn drop_table<C, E>(conn: &C, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let stmt = Table::drop().table(entity).if_exists().to_owned();
    conn.execute(conn.get_database_backend().build(&stmt)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let pool = DbPool::in_memory().await.unwrap();
        create_tables(pool.write()).await.unwrap();
        assert_eq!(IdentifierEntity::find().count(pool.read()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_recreates_tables() {
        let pool = DbPool::in_memory().await.unwrap();
        reset_tables(pool.write()).await.unwrap();
        assert_eq!(UrlEntity::find().count(pool.read()).await.unwrap(), 0);

        drop_tables(pool.write()).await.unwrap();
        assert!(UrlEntity::find().count(pool.read()).await.is_err());
    }
}
