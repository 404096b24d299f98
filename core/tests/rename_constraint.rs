mod common;
use common::{migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn rename_constraint() {
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

        [[operations]]
        type = "set_check_constraint"
        table = "users"
        column = "email"
        name = "users_email_not_blank"
        constraint = "email <> ''"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "rename_email_check"

        [[operations]]
        type = "rename_constraint"
        table = "users"
        name = "users_email_not_blank"
        new_name = "users_email_nonempty"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let names: Vec<String> = new_db
        .query("SELECT constraint_name FROM information_schema.table_constraints WHERE table_name = 'users'", &[])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get(0))
        .collect();
    assert!(names.contains(&"users_email_nonempty".to_string()));
    assert!(!names.contains(&"users_email_not_blank".to_string()));
}
