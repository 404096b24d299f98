mod common;
use common::{migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn set_default_applies_to_future_inserts_on_both_schemas() {
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
            name = "role"
            type = "TEXT"
            nullable = true
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "default_role_to_member"

        [[operations]]
        type = "set_default"
        table = "users"
        column = "role"
        default = "'member'"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    old_db.simple_query("INSERT INTO users (id) VALUES (1)").await.unwrap();
    let role: String = new_db.query_one("SELECT role FROM users WHERE id = 1", &[]).await.unwrap().get("role");
    assert_eq!("member", role);

    new_db.simple_query("INSERT INTO users (id) VALUES (2)").await.unwrap();
    let role: String = old_db.query_one("SELECT role FROM users WHERE id = 2", &[]).await.unwrap().get("role");
    assert_eq!("member", role);
}
