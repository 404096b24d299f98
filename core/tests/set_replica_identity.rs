mod common;
use common::{migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn set_replica_identity_full() {
    let Test { mut engine, mut old_db, mut new_db } = Test::connect().await;

    let first_migration = Migration::from_text(
        r#"
        name = "create_users_table"

        [[operations]]
        type = "create_table"
        table = "users"
        primary_key = ["id"]

            [[operations.columns]]
            name = "id"
            type = "INTEGER"

            [[operations.columns]]
            name = "name"
            type = "TEXT"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "widen_replica_identity"

        [[operations]]
        type = "set_replica_identity"
        table = "users"
        identity = "full"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let identity: String = old_db
        .query_one("SELECT relreplident::TEXT FROM pg_class WHERE relname = 'users'", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!("f", identity);
}
