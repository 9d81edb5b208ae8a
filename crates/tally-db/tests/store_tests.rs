// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use std::collections::BTreeSet;
use tally_app::{
    Choice, CsvOptions, CustomerFileInput, CustomerFormInput, CustomerId, CustomerType, Gender,
    RosterFilter, filter_customers,
};
use tally_db::{NewOrder, SALES_STAFF, Store, validate_db_path};
use tally_testkit::temp_db_path;
use time::macros::date;

fn customer_input(name: &str, phone: &str) -> CustomerFormInput {
    CustomerFormInput {
        name: name.to_owned(),
        phone: phone.to_owned(),
        ..CustomerFormInput::default()
    }
}

fn file_input(data: &[u8]) -> CustomerFileInput {
    CustomerFileInput {
        file_name: "id-card.png".to_owned(),
        mime_type: "image/png".to_owned(),
        data: data.to_vec(),
    }
}

#[test]
fn validate_db_path_rejects_uri_forms() {
    assert!(validate_db_path("file:test.db").is_err());
    assert!(validate_db_path("https://example.com/db.sqlite").is_err());
    assert!(validate_db_path("db.sqlite?mode=ro").is_err());
    assert!(validate_db_path("").is_err());
    assert!(validate_db_path(":memory:").is_ok());
    assert!(validate_db_path("/tmp/tally.db").is_ok());
}

#[test]
fn bootstrap_is_idempotent_on_disk() -> Result<()> {
    let (_dir, path) = temp_db_path()?;
    {
        let store = Store::open(&path)?;
        store.bootstrap()?;
        store.create_customer(&customer_input("张伟", "13800001111"))?;
    }

    let reopened = Store::open(&path)?;
    reopened.bootstrap()?;
    assert_eq!(reopened.list_customers()?.len(), 1);
    Ok(())
}

#[test]
fn bootstrap_rejects_schema_missing_required_column() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    store.raw_connection().execute_batch(
        "
            DROP TABLE customer_tags;
            DROP TABLE customer_files;
            DROP TABLE customer_orders;
            DROP TABLE customers;
            CREATE TABLE customers (
              id INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              phone TEXT NOT NULL
            );
            ",
    )?;

    let err = store
        .bootstrap()
        .expect_err("schema validation should fail");
    let message = err.to_string();
    assert!(message.contains("table `customers` is missing required columns"));
    assert!(message.contains("assigned_sales"));
    Ok(())
}

#[test]
fn create_and_get_customer_round_trips_fields() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let input = CustomerFormInput {
        name: "李娜".to_owned(),
        phone: "13912345678".to_owned(),
        wechat: "lina_wx".to_owned(),
        address: "上海浦东新区".to_owned(),
        occupation: "设计师".to_owned(),
        notes: "prefers evening calls".to_owned(),
        contract_name: "李女士".to_owned(),
        gender: Gender::Female,
        customer_type: CustomerType::Installment,
        assigned_sales: "Carol Li".to_owned(),
        tags: BTreeSet::from(["VIP".to_owned(), "老客户".to_owned()]),
        order_date: Some(date!(2026 - 04 - 02)),
    };
    let id = store.create_customer(&input)?;

    let customer = store.get_customer(id)?;
    assert_eq!(customer.name, "李娜");
    assert_eq!(customer.wechat.as_deref(), Some("lina_wx"));
    assert_eq!(customer.contract_name.as_deref(), Some("李女士"));
    assert_eq!(customer.gender, Gender::Female);
    assert_eq!(customer.customer_type, CustomerType::Installment);
    assert_eq!(customer.sales.resolved(), Some("Carol Li"));
    assert_eq!(customer.tags, input.tags);
    assert_eq!(customer.order_date, Some(date!(2026 - 04 - 02)));
    Ok(())
}

#[test]
fn create_customer_rejects_missing_phone() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let err = store
        .create_customer(&customer_input("王五", " "))
        .expect_err("phone is required");
    assert!(err.to_string().contains("phone is required"));
    assert!(store.list_customers()?.is_empty());
    Ok(())
}

#[test]
fn update_customer_replaces_tags() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let mut input = customer_input("赵云", "15000000001");
    input.tags = BTreeSet::from(["VIP".to_owned()]);
    let id = store.create_customer(&input)?;

    input.tags = BTreeSet::from(["待回访".to_owned()]);
    input.customer_type = CustomerType::Installment;
    store.update_customer(id, &input)?;

    let customer = store.get_customer(id)?;
    assert_eq!(customer.customer_type, CustomerType::Installment);
    assert_eq!(customer.tags, BTreeSet::from(["待回访".to_owned()]));
    Ok(())
}

#[test]
fn update_missing_customer_is_actionable() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let err = store
        .update_customer(CustomerId::new(404), &customer_input("A", "1"))
        .expect_err("customer does not exist");
    assert!(err.to_string().contains("reload the roster"));
    Ok(())
}

#[test]
fn delete_customer_cascades_children() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let mut input = customer_input("孙丽", "18600001234");
    input.tags = BTreeSet::from(["VIP".to_owned()]);
    let id = store.create_customer(&input)?;
    store.attach_file(id, &file_input(b"png"))?;
    store.create_order(
        id,
        &NewOrder {
            title: "钻石戒指".to_owned(),
            amount_cents: 1_200_000,
            ordered_on: Some(date!(2026 - 05 - 01)),
        },
    )?;

    store.delete_customer(id)?;
    assert!(store.list_customers()?.is_empty());

    let leftovers: i64 = store.raw_connection().query_row(
        "
        SELECT
          (SELECT COUNT(*) FROM customer_tags)
          + (SELECT COUNT(*) FROM customer_files)
          + (SELECT COUNT(*) FROM customer_orders)
        ",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(leftovers, 0);

    assert!(store.delete_customer(id).is_err());
    Ok(())
}

#[test]
fn attach_file_stores_checksum_and_content() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;
    let id = store.create_customer(&customer_input("周杰", "13500000000"))?;

    let file = store.attach_file(id, &file_input(b"abc"))?;
    assert_eq!(file.customer_id, id);
    assert_eq!(file.size_bytes, 3);
    assert_eq!(
        file.checksum_sha256,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(store.file_content(file.id)?, b"abc");

    let listed = store.list_customers()?;
    assert_eq!(listed[0].files.len(), 1);
    assert_eq!(listed[0].files[0].file_name, "id-card.png");
    Ok(())
}

#[test]
fn attach_file_enforces_size_limit_and_owner() -> Result<()> {
    let mut store = Store::open_memory()?;
    store.bootstrap()?;
    store.set_max_file_size(4)?;
    assert!(store.set_max_file_size(0).is_err());

    let id = store.create_customer(&customer_input("吴敏", "13700000000"))?;
    let err = store
        .attach_file(id, &file_input(b"too large"))
        .expect_err("file exceeds limit");
    assert!(err.to_string().contains("max allowed is 4"));

    let err = store
        .attach_file(CustomerId::new(999), &file_input(b"ok"))
        .expect_err("missing customer");
    assert!(err.to_string().contains("not found"));
    Ok(())
}

#[test]
fn legacy_salesperson_column_is_matched_by_filters() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let legacy_id = store.create_customer(&customer_input("郭靖", "13800000001"))?;
    store.raw_connection().execute(
        "UPDATE customers SET sales_person = 'Bob Wang' WHERE id = ?",
        [legacy_id.get()],
    )?;
    let mut current = customer_input("黄蓉", "13800000002");
    current.assigned_sales = "Bob Wang".to_owned();
    store.create_customer(&current)?;
    store.create_customer(&customer_input("杨过", "13800000003"))?;

    let customers = store.list_customers()?;
    let filter = RosterFilter {
        sales_person: Choice::Only("Bob Wang".to_owned()),
        ..RosterFilter::default()
    };
    let names: BTreeSet<&str> = filter_customers(&customers, &filter)
        .into_iter()
        .map(|customer| customer.name.as_str())
        .collect();
    assert_eq!(names, BTreeSet::from(["郭靖", "黄蓉"]));
    Ok(())
}

#[test]
fn update_drops_legacy_salesperson() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let mut input = customer_input("郭靖", "13800000001");
    let id = store.create_customer(&input)?;
    store.raw_connection().execute(
        "UPDATE customers SET sales_person = 'Bob Wang' WHERE id = ?",
        [id.get()],
    )?;
    assert_eq!(store.get_customer(id)?.sales.resolved(), Some("Bob Wang"));

    let bob = RosterFilter {
        sales_person: Choice::Only("Bob Wang".to_owned()),
        ..RosterFilter::default()
    };

    input.assigned_sales = "Alice Chen".to_owned();
    store.update_customer(id, &input)?;
    let customers = store.list_customers()?;
    assert_eq!(customers[0].sales.resolved(), Some("Alice Chen"));
    assert!(customers[0].sales.legacy.is_none());
    assert!(filter_customers(&customers, &bob).is_empty());

    input.assigned_sales.clear();
    store.update_customer(id, &input)?;
    assert_eq!(store.get_customer(id)?.sales.resolved(), None);
    Ok(())
}

#[test]
fn orders_are_listed_per_customer() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;
    let id = store.create_customer(&customer_input("马超", "15800000000"))?;

    store.create_order(
        id,
        &NewOrder {
            title: "手镯".to_owned(),
            amount_cents: 300_000,
            ordered_on: Some(date!(2026 - 01 - 10)),
        },
    )?;
    store.create_order(
        id,
        &NewOrder {
            title: "耳饰".to_owned(),
            amount_cents: 80_000,
            ordered_on: Some(date!(2026 - 03 - 10)),
        },
    )?;
    assert!(
        store
            .create_order(
                id,
                &NewOrder {
                    title: "bad".to_owned(),
                    amount_cents: -1,
                    ordered_on: None,
                },
            )
            .is_err()
    );

    let orders = store.list_orders(id)?;
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].title, "耳饰");
    Ok(())
}

#[test]
fn export_writes_dated_csv() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::open_memory()?;
    store.bootstrap()?;

    let err = store
        .export_customers_csv(dir.path(), CsvOptions::default(), date!(2026 - 10 - 18))
        .expect_err("empty roster");
    assert!(err.to_string().contains("no customers to export"));

    let mut input = customer_input("张伟", "13800001111");
    input.assigned_sales = "Alice Chen".to_owned();
    store.create_customer(&input)?;

    let path = store.export_customers_csv(
        dir.path(),
        CsvOptions { utf8_bom: true },
        date!(2026 - 10 - 18),
    )?;
    assert!(path.ends_with("客户数据_2026-10-18.csv"));

    let contents = std::fs::read_to_string(&path)?;
    let mut lines = contents.trim_start_matches('\u{feff}').lines();
    assert_eq!(
        lines.next(),
        Some("姓名,性别,电话,微信,地址,职业,销售员,创建时间")
    );
    let row = lines.next().unwrap_or_default();
    assert!(row.starts_with("张伟,男,13800001111,,,,Alice Chen,"));
    Ok(())
}

#[test]
fn demo_seed_populates_empty_database_once() -> Result<()> {
    let store = Store::open_memory()?;
    store.bootstrap()?;
    store.seed_demo_data(42)?;

    let customers = store.list_customers()?;
    assert_eq!(customers.len(), 24);
    assert!(
        customers
            .iter()
            .any(|customer| customer.sales.assigned.is_none() && customer.sales.legacy.is_some())
    );
    assert!(customers.iter().all(|customer| {
        customer
            .sales
            .resolved()
            .is_some_and(|name| SALES_STAFF.contains(&name))
    }));

    assert!(store.seed_demo_data(42).is_err());
    Ok(())
}
