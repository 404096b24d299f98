mod common;
use common::{complete, migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn add_unique_constraint() {
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
            name = "email"
            type = "TEXT"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "make_email_unique"

        [[operations]]
        type = "set_unique"
        table = "users"
        columns = ["email"]
        name = "users_email_key"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    old_db.simple_query("INSERT INTO users (id, email) VALUES (1, 'a@example.com')").await.unwrap();

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    // The concurrently-built unique index enforces uniqueness as soon as it
    // exists, before the migration completes.
    let result = old_db.simple_query("INSERT INTO users (id, email) VALUES (2, 'a@example.com')").await;
    assert!(result.is_err(), "expected duplicate email to be rejected");

    old_db.simple_query("INSERT INTO users (id, email) VALUES (3, 'b@example.com')").await.unwrap();

    complete(&mut engine, &first_migration, &second_migration).await;

    let constraint_name: Option<String> = new_db
        .query(
            "SELECT constraint_name FROM information_schema.table_constraints WHERE table_name = 'users' AND constraint_type = 'UNIQUE'",
            &[],
        )
        .await
        .unwrap()
        .first()
        .map(|row| row.get(0));
    assert_eq!(Some("users_email_key".to_string()), constraint_name);
}
