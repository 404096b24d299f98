mod common;
use common::{migrate, setup_db, Test};

use pgvista::migration::{Format, Migration};

#[tokio::test]
async fn change_type_converts_both_directions() {
    let Test { mut engine, mut old_db, mut new_db } = Test::connect().await;

    let first_migration = Migration::from_text(
        r#"
        name = "create_products_table"

        [[operations]]
        type = "create_table"
        table = "products"
        primary_key = ["id"]

            [[operations.columns]]
            name = "id"
            type = "INTEGER"

            [[operations.columns]]
            name = "price_cents"
            type = "INTEGER"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    let second_migration = Migration::from_text(
        r#"
        name = "price_cents_to_text"

        [[operations]]
        type = "change_type"
        table = "products"
        column = "price_cents"
        type = "TEXT"
        up = "price_cents::TEXT"
        down = "price_cents::INTEGER"
        "#,
        None,
        Format::Toml,
    ).unwrap();

    setup_db(&mut engine, &mut old_db, &first_migration).await;

    old_db.simple_query("INSERT INTO products (id, price_cents) VALUES (1, 1099)").await.unwrap();

    migrate(&mut engine, &mut new_db, &first_migration, &second_migration).await.unwrap();

    // Pre-existing row backfilled into the new type.
    let price: String = new_db.query_one("SELECT price_cents FROM products WHERE id = 1", &[]).await.unwrap().get("price_cents");
    assert_eq!("1099", price);

    // Old-schema writer inserts an integer, new schema sees it as text.
    old_db.simple_query("INSERT INTO products (id, price_cents) VALUES (2, 500)").await.unwrap();
    let price: String = new_db.query_one("SELECT price_cents FROM products WHERE id = 2", &[]).await.unwrap().get("price_cents");
    assert_eq!("500", price);

    // New-schema writer inserts text, old schema sees it as an integer.
    new_db.simple_query("INSERT INTO products (id, price_cents) VALUES (3, '250')").await.unwrap();
    let price: i32 = old_db.query_one("SELECT price_cents FROM products WHERE id = 3", &[]).await.unwrap().get("price_cents");
    assert_eq!(250, price);
}
