mod common;
use common::{complete, migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn add_index() {
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
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "add_users_name_index"

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

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    // Ensure index is valid and ready
    let (is_ready, is_valid): (bool, bool) = old_db
        .query(
            "
            SELECT pg_index.indisready, pg_index.indisvalid
            FROM pg_catalog.pg_index
            JOIN pg_catalog.pg_class ON pg_index.indexrelid = pg_class.oid
            WHERE pg_class.relname = 'name_idx'
            ",
            &[],
        )
        .await
        .unwrap()
        .first()
        .map(|row| (row.get("indisready"), row.get("indisvalid")))
        .unwrap();

    assert!(is_ready, "expected index to be ready");
    assert!(is_valid, "expected index to be valid");

    complete(&mut engine, &first_migration, &second_migration).await;

    // Ensure index is valid and ready
    let (is_ready, is_valid): (bool, bool) = new_db
        .query(
            "
            SELECT pg_index.indisready, pg_index.indisvalid
            FROM pg_catalog.pg_index
            JOIN pg_catalog.pg_class ON pg_index.indexrelid = pg_class.oid
            WHERE pg_class.relname = 'name_idx'
            ",
            &[],
        )
        .await
        .unwrap()
        .first()
        .map(|row| (row.get("indisready"), row.get("indisvalid")))
        .unwrap();

    assert!(is_ready, "expected index to be ready");
    assert!(is_valid, "expected index to be valid");
}

#[tokio::test]
async fn add_index_on_multiple_columns() {
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
            name = "first"
            type = "TEXT"

            [[operations.columns]]
            name = "last"
            type = "TEXT"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "add_full_name_index"

        [[operations]]
        type = "create_index"
        table = "users"
        name = "full_name_idx"
        columns = ["first", "last"]
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let columns: Vec<String> = old_db
        .query(
            "
            SELECT a.attname
            FROM pg_catalog.pg_index i
            JOIN pg_catalog.pg_class c ON i.indexrelid = c.oid
            JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE c.relname = 'full_name_idx'
            ORDER BY array_position(i.indkey, a.attnum)
            ",
            &[],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| row.get(0))
        .collect();

    assert_eq!(vec!["first".to_string(), "last".to_string()], columns);
}
