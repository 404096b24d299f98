mod common;
use common::{abort, complete, migrate, setup_db, Task, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn add_column() {
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
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "add_first_and_last_name_columns"

        [[operations]]
        type = "add_column"
        table = "users"
        up = "(STRING_TO_ARRAY(name, ' '))[1]"

            [operations.column]
            name = "first"
            type = "TEXT"
            nullable = false

        [[operations]]
        type = "add_column"
        table = "users"
        up = "(STRING_TO_ARRAY(name, ' '))[2]"

            [operations.column]
            name = "last"
            type = "TEXT"
            nullable = false
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    for task in [Task::Complete, Task::Abort] {
        setup_db(&mut engine, &mut old_db, &first_migration).await;

        old_db
            .simple_query(
                "
                INSERT INTO users (id, name) VALUES
                (1, 'John Doe'),
                (2, 'Jane Doe');
                ",
            )
            .await
            .unwrap();

        migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

        // Check that the existing users have the new columns populated
        let expected = vec![("John", "Doe"), ("Jane", "Doe")];
        assert!(new_db
            .query("SELECT first, last FROM users ORDER BY id", &[])
            .await
            .unwrap()
            .iter()
            .map(|row| (row.get("first"), row.get("last")))
            .eq(expected));

        // Insert data using old schema and make sure the new columns are populated
        old_db
            .simple_query("INSERT INTO users (id, name) VALUES (3, 'Test Testsson')")
            .await
            .unwrap();

        let (first_name, last_name): (String, String) = new_db
            .query_one("SELECT first, last from users WHERE id = 3", &[])
            .await
            .map(|row| (row.get("first"), row.get("last")))
            .unwrap();

        assert_eq!(("Test", "Testsson"), (first_name.as_ref(), last_name.as_ref()));

        match task {
            Task::Complete => {
                complete(&mut engine, &first_migration, &second_migration).await;

                let expected = vec![("John", "Doe"), ("Jane", "Doe"), ("Test", "Testsson")];
                assert!(new_db
                    .query("SELECT first, last FROM users ORDER BY id", &[])
                    .await
                    .unwrap()
                    .iter()
                    .map(|row| (row.get("first"), row.get("last")))
                    .eq(expected));
            }
            Task::Abort => {
                abort(&mut engine, &first_migration, &second_migration).await;

                let expected = vec!["John Doe", "Jane Doe", "Test Testsson"];
                assert!(old_db
                    .query("SELECT name FROM users ORDER BY id", &[])
                    .await
                    .unwrap()
                    .iter()
                    .map(|row| row.get::<'_, _, String>("name"))
                    .eq(expected));
            }
        }
    }
}

#[tokio::test]
async fn add_column_nullable() {
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
        name = "add_nullable_name_column"

        [[operations]]
        type = "add_column"
        table = "users"

            [operations.column]
            name = "name"
            type = "TEXT"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    old_db.simple_query("INSERT INTO users (id) VALUES (1), (2);").await.unwrap();

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let expected: Vec<Option<String>> = vec![None, None];
    assert!(new_db
        .query("SELECT name FROM users ORDER BY id", &[])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<_, Option<String>>("name"))
        .eq(expected));

    old_db.simple_query("INSERT INTO users (id) VALUES (3)").await.unwrap();
    let name: Option<String> = new_db
        .query_one("SELECT name from users WHERE id = 3", &[])
        .await
        .map(|row| row.get("name"))
        .unwrap();
    assert_eq!(None, name);

    new_db
        .simple_query("INSERT INTO users (id, name) VALUES (4, 'Test Testsson'), (5, NULL)")
        .await
        .unwrap();

    complete(&mut engine, &first_migration, &second_migration).await;

    let expected: Vec<Option<String>> = vec![None, None, None, Some("Test Testsson".to_owned()), None];
    let result: Vec<Option<String>> = new_db
        .query("SELECT id, name FROM users ORDER BY id", &[])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get("name"))
        .collect();

    assert_eq!(result, expected);
}

#[tokio::test]
async fn add_column_with_default() {
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
        name = "add_name_column_with_default"

        [[operations]]
        type = "add_column"
        table = "users"

            [operations.column]
            name = "name"
            type = "TEXT"
            nullable = false
            default = "'DEFAULT'"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    old_db.simple_query("INSERT INTO users (id) VALUES (1), (2)").await.unwrap();

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let expected = vec!["DEFAULT", "DEFAULT"];
    assert!(new_db
        .query("SELECT name FROM users ORDER BY id", &[])
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<_, String>("name"))
        .eq(expected));

    old_db.simple_query("INSERT INTO users (id) VALUES (3)").await.unwrap();
    let name: String = new_db.query_one("SELECT name from users WHERE id = 3", &[]).await.map(|row| row.get("name")).unwrap();
    assert_eq!("DEFAULT", name);
}
