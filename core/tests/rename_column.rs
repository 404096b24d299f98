mod common;
use common::{complete, migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn rename_column() {
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
        name = "rename_name_to_full_name"

        [[operations]]
        type = "rename_column"
        table = "users"
        column = "name"
        new_name = "full_name"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    old_db.simple_query("INSERT INTO users (id, name) VALUES (1, 'John Doe')").await.unwrap();

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    // Both names resolve through their respective version's view while the
    // migration is in flight.
    let name: String = old_db.query_one("SELECT name FROM users WHERE id = 1", &[]).await.unwrap().get("name");
    assert_eq!("John Doe", name);
    let full_name: String = new_db.query_one("SELECT full_name FROM users WHERE id = 1", &[]).await.unwrap().get("full_name");
    assert_eq!("John Doe", full_name);

    // Writes through either view land on the one physical column.
    new_db.simple_query("INSERT INTO users (id, full_name) VALUES (2, 'Jane Doe')").await.unwrap();
    let name: String = old_db.query_one("SELECT name FROM users WHERE id = 2", &[]).await.unwrap().get("name");
    assert_eq!("Jane Doe", name);

    complete(&mut engine, &first_migration, &second_migration).await;

    // After complete, only the new name exists.
    assert!(new_db.simple_query("SELECT full_name FROM users").await.is_ok());
    let column_exists = !new_db
        .query("SELECT 1 FROM information_schema.columns WHERE table_name = 'users' AND column_name = 'name'", &[])
        .await
        .unwrap()
        .is_empty();
    assert!(!column_exists, "expected old column name to be gone");
}
