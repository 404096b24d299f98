mod common;
use common::{complete, migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn drop_column() {
    let Test { mut engine, mut old_db, mut new_db } = Test::connect().await;

    let first_migration = Migration::from_text(
        r#"
        name = "create_user_table"

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
            nullable = true
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "drop_name_column"

        [[operations]]
        type = "drop_column"
        table = "users"
        column = "name"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    // Insert using old schema and ensure it can be retrieved through new schema
    old_db.simple_query("INSERT INTO users(id, name) VALUES (1, 'John Doe')").await.unwrap();
    let results = new_db.query("SELECT id FROM users WHERE id = 1", &[]).await.unwrap();
    assert_eq!(1, results.len());
    assert_eq!(1, results[0].get::<_, i32>("id"));

    // Ensure the name column is not accessible through the new schema
    assert!(new_db.query("SELECT id, name FROM users", &[]).await.is_err());

    // Insert using new schema; the physical column still exists until complete
    new_db.simple_query("INSERT INTO users(id) VALUES (2)").await.unwrap();

    complete(&mut engine, &first_migration, &second_migration).await;

    // Ensure the column is physically gone after complete
    assert!(old_db.simple_query("SELECT name FROM users").await.is_err());
}

#[tokio::test]
async fn drop_column_with_index() {
    let Test { mut engine, mut old_db, mut new_db } = Test::connect().await;

    let first_migration = Migration::from_text(
        r#"
        name = "create_user_table"

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

        [[operations]]
        type = "create_index"
        table = "users"
        name = "name_idx"
        columns = ["name"]
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "drop_name_column"

        [[operations]]
        type = "drop_column"
        table = "users"
        column = "name"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();
    complete(&mut engine, &first_migration, &second_migration).await;

    // Index over the dropped column should be gone too
    let count: i64 = new_db
        .query(
            "
            SELECT COUNT(*)
            FROM pg_catalog.pg_index
            JOIN pg_catalog.pg_class ON pg_index.indexrelid = pg_class.oid
            WHERE pg_class.relname = 'name_idx'
            ",
            &[],
        )
        .await
        .unwrap()
        .first()
        .map(|row| row.get(0))
        .unwrap();

    assert_eq!(0, count, "expected index to not exist");
}
