mod common;
use common::{complete, migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn create_constraint_unique_on_existing_columns() {
    let Test { mut engine, mut old_db, mut new_db } = Test::connect().await;

    let first_migration = Migration::from_text(
        r#"
        name = "create_memberships_table"

        [[operations]]
        type = "create_table"
        table = "memberships"
        primary_key = ["id"]

            [[operations.columns]]
            name = "id"
            type = "INTEGER"

            [[operations.columns]]
            name = "org_id"
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
        name = "one_membership_per_user"

        [[operations]]
        type = "create_constraint"
        table = "memberships"
        name = "memberships_org_user_key"
        kind = "unique"
        columns = ["org_id", "user_id"]
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    old_db.simple_query("INSERT INTO memberships (id, org_id, user_id) VALUES (1, 1, 1)").await.unwrap();

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    let result = old_db.simple_query("INSERT INTO memberships (id, org_id, user_id) VALUES (2, 1, 1)").await;
    assert!(result.is_err(), "expected duplicate (org_id, user_id) to be rejected");

    old_db.simple_query("INSERT INTO memberships (id, org_id, user_id) VALUES (3, 1, 2)").await.unwrap();

    complete(&mut engine, &first_migration, &second_migration).await;

    let constraint_name: Option<String> = new_db
        .query(
            "SELECT constraint_name FROM information_schema.table_constraints WHERE table_name = 'memberships' AND constraint_type = 'UNIQUE'",
            &[],
        )
        .await
        .unwrap()
        .first()
        .map(|row| row.get(0));
    assert_eq!(Some("memberships_org_user_key".to_string()), constraint_name);
}
