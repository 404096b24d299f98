mod common;
use common::{migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn set_comment_on_table_and_column() {
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
        name = "document_users_table"

        [[operations]]
        type = "set_comment"
        table = "users"
        comment = "Registered users"

        [[operations]]
        type = "set_comment"
        table = "users"
        column = "email"
        comment = "Contact address, unique per account"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let table_comment: String = old_db
        .query_one("SELECT obj_description('users'::regclass, 'pg_class')", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!("Registered users", table_comment);

    let column_comment: String = old_db
        .query_one(
            "SELECT col_description('users'::regclass, (SELECT attnum FROM pg_attribute WHERE attrelid = 'users'::regclass AND attname = 'email'))",
            &[],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!("Contact address, unique per account", column_comment);
}
