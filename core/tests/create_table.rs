mod common;
use common::{migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn create_table_with_defaults_and_not_null() {
    let Test { mut engine, mut old_db, mut new_db } = Test::connect().await;

    let first_migration = Migration::from_text(
        r#"
        name = "empty_migration"

        [[operations]]
        type = "raw_sql"
        up = "SELECT 1"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "create_orders_table"

        [[operations]]
        type = "create_table"
        table = "orders"
        primary_key = ["id"]

            [[operations.columns]]
            name = "id"
            type = "INTEGER"

            [[operations.columns]]
            name = "status"
            type = "TEXT"
            default = "'pending'"

            [[operations.columns]]
            name = "quantity"
            type = "INTEGER"
            nullable = true
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    new_db.simple_query("INSERT INTO orders (id) VALUES (1)").await.unwrap();

    let row = new_db.query_one("SELECT status, quantity FROM orders WHERE id = 1", &[]).await.unwrap();
    let status: String = row.get("status");
    let quantity: Option<i32> = row.get("quantity");
    assert_eq!("pending", status);
    assert_eq!(None, quantity);

    // status has no explicit nullable = true, so it should be NOT NULL.
    let result = new_db.simple_query("INSERT INTO orders (id, status) VALUES (2, NULL)").await;
    assert!(result.is_err(), "expected NULL status to be rejected");
}

#[tokio::test]
async fn create_table_with_identity_column_and_comment() {
    let Test { mut engine, mut old_db, mut new_db } = Test::connect().await;

    let first_migration = Migration::from_text(
        r#"
        name = "empty_migration"

        [[operations]]
        type = "raw_sql"
        up = "SELECT 1"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "create_events_table"

        [[operations]]
        type = "create_table"
        table = "events"
        primary_key = ["id"]

            [[operations.columns]]
            name = "id"
            type = "BIGINT"

                [operations.columns.generated]
                identity = { always = true }

            [[operations.columns]]
            name = "payload"
            type = "TEXT"
            comment = "raw event body"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    new_db.simple_query("INSERT INTO events (payload) VALUES ('hello')").await.unwrap();
    let row = new_db.query_one("SELECT id, payload FROM events", &[]).await.unwrap();
    let id: i64 = row.get("id");
    assert_eq!(1, id);

    // GENERATED ALWAYS AS IDENTITY rejects an explicit value by default.
    let result = new_db.simple_query("INSERT INTO events (id, payload) VALUES (99, 'x')").await;
    assert!(result.is_err(), "expected GENERATED ALWAYS AS IDENTITY to reject an explicit id");

    let comment: Option<String> = old_db
        .query_one(
            "SELECT col_description('events'::regclass, 2)",
            &[],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!(Some("raw event body".to_string()), comment);
}
