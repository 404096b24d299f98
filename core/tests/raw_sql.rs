mod common;
use common::{abort, complete, migrate, setup_db, Task, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn custom_enable_extension() {
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
    )
    .unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "enable_extensions"

        [[operations]]
        type = "raw_sql"

        up = """
            CREATE EXTENSION IF NOT EXISTS bloom;
            CREATE EXTENSION IF NOT EXISTS btree_gin;
        """

        down = """
            DROP EXTENSION IF EXISTS bloom;
            DROP EXTENSION IF EXISTS btree_gin;
        """
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    for task in [Task::Complete, Task::Abort] {
        old_db
            .simple_query(
                "
                DROP EXTENSION IF EXISTS bloom;
                DROP EXTENSION IF EXISTS btree_gin;
                ",
            )
            .await
            .unwrap();

        setup_db(&mut engine, &mut old_db, &first_migration).await;

        migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

        let bloom_activated = !old_db.query("SELECT * FROM pg_extension WHERE extname = 'bloom'", &[]).await.unwrap().is_empty();
        assert!(bloom_activated);

        let btree_gin_activated = !old_db
            .query("SELECT * FROM pg_extension WHERE extname = 'btree_gin'", &[])
            .await
            .unwrap()
            .is_empty();
        assert!(btree_gin_activated);

        match task {
            Task::Complete => {
                // raw_sql has no complete-phase hook, so completing the
                // migration leaves the extensions exactly as `up` left them.
                complete(&mut engine, &first_migration, &second_migration).await;

                let bloom_activated = !new_db.query("SELECT * FROM pg_extension WHERE extname = 'bloom'", &[]).await.unwrap().is_empty();
                assert!(bloom_activated);
            }
            Task::Abort => {
                abort(&mut engine, &first_migration, &second_migration).await;

                let bloom_activated = !old_db.query("SELECT * FROM pg_extension WHERE extname = 'bloom'", &[]).await.unwrap().is_empty();
                assert!(!bloom_activated);

                let btree_gin_activated = !old_db
                    .query("SELECT * FROM pg_extension WHERE extname = 'btree_gin'", &[])
                    .await
                    .unwrap()
                    .is_empty();
                assert!(!btree_gin_activated);
            }
        }
    }
}

#[tokio::test]
async fn sql_alias() {
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
        name = "seed_users"

        [[operations]]
        type = "sql"
        up = "INSERT INTO users (id) VALUES (1), (2)"
        down = "DELETE FROM users WHERE id IN (1, 2)"
        "#,
        None,
        Format::Toml,
    )
    .unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;
    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let count: i64 = new_db.query_one("SELECT COUNT(*) FROM users", &[]).await.map(|row| row.get(0)).unwrap();
    assert_eq!(2, count);
}
