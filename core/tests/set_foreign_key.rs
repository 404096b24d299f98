mod common;
use common::{abort, complete, migrate, setup_db, Task, Test};

use pgvista::migration::{Format, Migration};
use pgvista::runner::Runner;

#[tokio::test]
async fn add_foreign_key() {
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

        [[operations]]
        type = "create_table"
        table = "items"
        primary_key = ["id"]

            [[operations.columns]]
            name = "id"
            type = "INTEGER"

            [[operations.columns]]
            name = "user_id"
            type = "INTEGER"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "add_foreign_key"

        [[operations]]
        type = "set_foreign_key"
        table = "items"
        column = "user_id"
        name = "items_user_id_fkey"

            [operations.references]
            table = "users"
            column = "id"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    for task in [Task::Complete, Task::Abort] {
        setup_db(&mut engine, &mut old_db, &first_migration).await;

        // Insert some test users
        old_db.simple_query("INSERT INTO users (id) VALUES (1), (2)").await.unwrap();

        migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

        // Ensure items can be inserted if they reference valid users
        old_db.simple_query("INSERT INTO items (id, user_id) VALUES (1, 1), (2, 2)").await.unwrap();

        // Ensure items can't be inserted if they don't reference valid users
        let result = old_db.simple_query("INSERT INTO items (id, user_id) VALUES (3, 3)").await;
        assert!(result.is_err(), "expected insert to fail");

        match task {
            Task::Complete => {
                complete(&mut engine, &first_migration, &second_migration).await;

                // Ensure items can be inserted if they reference valid users
                new_db.simple_query("INSERT INTO items (id, user_id) VALUES (3, 1), (4, 2)").await.unwrap();

                // Ensure items can't be inserted if they don't reference valid users
                let result = new_db.simple_query("INSERT INTO items (id, user_id) VALUES (5, 3)").await;
                assert!(result.is_err(), "expected insert to fail");

                // Ensure foreign key exists with the right name
                let foreign_key_name: Option<String> = new_db
                .query(
                    "
                    SELECT tc.constraint_name
                    FROM information_schema.table_constraints AS tc
                    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name='items';
                    ",
                    &[],
                ).await
                .unwrap()
                .first()
                .map(|row| row.get(0));
                assert_eq!(Some("items_user_id_fkey".to_string()), foreign_key_name);
            },
            Task::Abort => {
                abort(&mut engine, &first_migration, &second_migration).await;

                // Ensure foreign key doesn't exist
                let fk_does_not_exist = old_db
                .query(
                    "
                    SELECT tc.constraint_name
                    FROM information_schema.table_constraints AS tc
                    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name='items';
                    ",
                    &[],
                ).await
                .unwrap()
                .is_empty();
                assert!(fk_does_not_exist);
            },
        }
    }
}

#[tokio::test]
async fn add_foreign_key_with_preexisting_violation_fails_to_complete() {
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

        [[operations]]
        type = "create_table"
        table = "items"
        primary_key = ["id"]

            [[operations.columns]]
            name = "id"
            type = "INTEGER"

            [[operations.columns]]
            name = "user_id"
            type = "INTEGER"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "add_foreign_key"

        [[operations]]
        type = "set_foreign_key"
        table = "items"
        column = "user_id"
        name = "items_user_id_fkey"

            [operations.references]
            table = "users"
            column = "id"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    // Insert an item which doesn't reference a valid user before the
    // constraint exists.
    old_db.simple_query("INSERT INTO items (id, user_id) VALUES (1, 1)").await.unwrap();

    // Adding the constraint NOT VALID succeeds even with the violating row
    // already present.
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    // But completing the migration runs VALIDATE CONSTRAINT, which fails
    // because of the pre-existing row.
    let result = engine
        .db
        .lock(|db| async move { Runner::new(&second_migration).complete(db, &tokio_util::sync::CancellationToken::new()).await })
        .await;
    assert!(result.is_err(), "expected complete to fail");
}
