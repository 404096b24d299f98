mod common;
use common::{abort, complete, migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn remove_table() {
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
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "remove_users_table"

        [[operations]]
        type = "drop_table"
        table = "users"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    // Make sure inserts work against the old schema
    old_db.simple_query("INSERT INTO users(id) VALUES (1)").await.unwrap();

    // Ensure the table is not accessible through the new schema
    assert!(new_db.query("SELECT id FROM users", &[]).await.is_err());

    complete(&mut engine, &first_migration, &second_migration).await;

    let exists: bool = old_db
        .query_one("SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'users')", &[])
        .await
        .map(|row| row.get(0))
        .unwrap();
    assert!(!exists, "expected users table to be physically dropped after complete");
}

#[tokio::test]
async fn remove_table_abort() {
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
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "remove_users_table"

        [[operations]]
        type = "drop_table"
        table = "users"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();
    abort(&mut engine, &first_migration, &second_migration).await;

    old_db.simple_query("INSERT INTO users(id) VALUES (1)").await.unwrap();
    let count: i64 = old_db.query_one("SELECT COUNT(*) FROM users", &[]).await.map(|row| row.get(0)).unwrap();
    assert_eq!(1, count);
}
