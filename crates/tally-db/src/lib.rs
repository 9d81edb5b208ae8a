// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod validation;

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, OptionalExtension, Row, params};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tally_app::{
    CsvOptions, Customer, CustomerFile, CustomerFileId, CustomerFileInput, CustomerFormInput,
    CustomerId, CustomerOrder, CustomerOrderId, CustomerType, Gender, SalesAssignment,
    export_file_name, render_customers_csv,
};
use tally_testkit::CustomerFaker;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info};

pub const APP_NAME: &str = "tally";
pub const MAX_FILE_SIZE: i64 = 20 << 20;

/// Salespeople offered by the assignment picker.
pub const SALES_STAFF: [&str; 4] = ["Alice Chen", "Bob Wang", "Carol Li", "David Zhang"];

const DEMO_CUSTOMERS: usize = 24;

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[
    (
        "customers",
        &[
            "id",
            "name",
            "phone",
            "wechat",
            "address",
            "occupation",
            "notes",
            "contract_name",
            "gender",
            "customer_type",
            "assigned_sales",
            "sales_person",
            "order_date",
            "created_at",
            "updated_at",
        ],
    ),
    ("customer_tags", &["customer_id", "tag"]),
    (
        "customer_files",
        &[
            "id",
            "customer_id",
            "file_name",
            "mime_type",
            "size_bytes",
            "sha256",
            "data",
            "uploaded_at",
        ],
    ),
    (
        "customer_orders",
        &[
            "id",
            "customer_id",
            "title",
            "amount_cents",
            "ordered_on",
            "created_at",
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequiredIndex {
    name: &'static str,
    create_sql: &'static str,
}

const REQUIRED_INDEXES: &[RequiredIndex] = &[
    RequiredIndex {
        name: "idx_customers_phone",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_customers_phone ON customers (phone);",
    },
    RequiredIndex {
        name: "idx_customers_created_at",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_customers_created_at ON customers (created_at);",
    },
    RequiredIndex {
        name: "idx_customer_tags_tag",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_customer_tags_tag ON customer_tags (tag);",
    },
    RequiredIndex {
        name: "idx_customer_files_customer_id",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_customer_files_customer_id ON customer_files (customer_id);",
    },
    RequiredIndex {
        name: "idx_customer_orders_customer_id",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_customer_orders_customer_id ON customer_orders (customer_id);",
    },
];

const CUSTOMER_COLUMNS: &str = "
    id, name, phone, wechat, address, occupation, notes, contract_name,
    gender, customer_type, assigned_sales, sales_person, order_date, created_at
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub title: String,
    pub amount_cents: i64,
    pub ordered_on: Option<Date>,
}

pub struct Store {
    conn: Connection,
    max_file_size: i64,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self {
            conn,
            max_file_size: MAX_FILE_SIZE,
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self {
            conn,
            max_file_size: MAX_FILE_SIZE,
        })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn bootstrap(&self) -> Result<()> {
        if has_user_tables(&self.conn)? {
            validate_schema(&self.conn)?;
        } else {
            self.conn
                .execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
            debug!("created customer schema");
        }

        ensure_required_indexes(&self.conn)?;
        Ok(())
    }

    pub fn set_max_file_size(&mut self, value: i64) -> Result<()> {
        if value <= 0 {
            bail!("max file size must be positive, got {value}");
        }
        self.max_file_size = value;
        Ok(())
    }

    pub fn max_file_size(&self) -> i64 {
        self.max_file_size
    }

    pub fn sales_staff(&self) -> &'static [&'static str] {
        &SALES_STAFF
    }

    pub fn create_customer(&self, input: &CustomerFormInput) -> Result<CustomerId> {
        input.validate()?;
        let now = now_rfc3339()?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin customer insert")?;
        tx.execute(
            "
            INSERT INTO customers (
              name, phone, wechat, address, occupation, notes, contract_name,
              gender, customer_type, assigned_sales, order_date,
              created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                input.name.trim(),
                input.phone.trim(),
                non_blank(&input.wechat),
                non_blank(&input.address),
                non_blank(&input.occupation),
                non_blank(&input.notes),
                non_blank(&input.contract_name),
                input.gender.as_str(),
                input.customer_type.as_str(),
                non_blank(&input.assigned_sales),
                input.order_date.map(format_date),
                now,
                now,
            ],
        )
        .context("insert customer")?;
        let customer_id = CustomerId::new(tx.last_insert_rowid());
        replace_tags(&tx, customer_id, &input.tags)?;
        tx.commit().context("commit customer insert")?;

        debug!(customer_id = customer_id.get(), "inserted customer");
        Ok(customer_id)
    }

    /// Rewrites every editable column. The legacy salesperson column is
    /// cleared so `assigned_sales` becomes the only source of the assignment.
    pub fn update_customer(&self, customer_id: CustomerId, input: &CustomerFormInput) -> Result<()> {
        input.validate()?;
        let now = now_rfc3339()?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin customer update")?;
        let rows_affected = tx
            .execute(
                "
                UPDATE customers
                SET
                  name = ?,
                  phone = ?,
                  wechat = ?,
                  address = ?,
                  occupation = ?,
                  notes = ?,
                  contract_name = ?,
                  gender = ?,
                  customer_type = ?,
                  assigned_sales = ?,
                  sales_person = NULL,
                  order_date = ?,
                  updated_at = ?
                WHERE id = ?
                ",
                params![
                    input.name.trim(),
                    input.phone.trim(),
                    non_blank(&input.wechat),
                    non_blank(&input.address),
                    non_blank(&input.occupation),
                    non_blank(&input.notes),
                    non_blank(&input.contract_name),
                    input.gender.as_str(),
                    input.customer_type.as_str(),
                    non_blank(&input.assigned_sales),
                    input.order_date.map(format_date),
                    now,
                    customer_id.get(),
                ],
            )
            .context("update customer")?;
        if rows_affected == 0 {
            bail!(
                "customer {} not found -- reload the roster and retry",
                customer_id.get()
            );
        }
        replace_tags(&tx, customer_id, &input.tags)?;
        tx.commit().context("commit customer update")?;
        Ok(())
    }

    /// Removes the customer along with its tags, files and orders.
    pub fn delete_customer(&self, customer_id: CustomerId) -> Result<()> {
        let rows_affected = self
            .conn
            .execute(
                "DELETE FROM customers WHERE id = ?",
                params![customer_id.get()],
            )
            .context("delete customer")?;
        if rows_affected == 0 {
            bail!(
                "customer {} not found -- reload the roster and retry",
                customer_id.get()
            );
        }
        Ok(())
    }

    pub fn get_customer(&self, customer_id: CustomerId) -> Result<Customer> {
        let mut customer = self
            .conn
            .query_row(
                &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?"),
                params![customer_id.get()],
                customer_from_row,
            )
            .optional()
            .with_context(|| format!("load customer {}", customer_id.get()))?
            .ok_or_else(|| {
                anyhow!(
                    "customer {} not found -- reload the roster and retry",
                    customer_id.get()
                )
            })?;

        customer.tags = self.list_tags(customer_id)?;
        customer.files = self.list_files(customer_id)?;
        customer.orders = self.list_orders(customer_id)?;
        Ok(customer)
    }

    /// Every customer, newest first, with tags, file metadata and orders.
    pub fn list_customers(&self) -> Result<Vec<Customer>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers ORDER BY created_at DESC, id DESC"
            ))
            .context("prepare customers query")?;
        let rows = stmt
            .query_map([], customer_from_row)
            .context("query customers")?;
        let mut customers = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("collect customers")?;

        let mut tags = self.all_tags()?;
        let mut files = group_by_customer(self.query_files(None)?, |file| file.customer_id);
        let mut orders = group_by_customer(self.query_orders(None)?, |order| order.customer_id);
        for customer in &mut customers {
            customer.tags = tags.remove(&customer.id).unwrap_or_default();
            customer.files = files.remove(&customer.id).unwrap_or_default();
            customer.orders = orders.remove(&customer.id).unwrap_or_default();
        }
        Ok(customers)
    }

    pub fn list_tags(&self, customer_id: CustomerId) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM customer_tags WHERE customer_id = ? ORDER BY tag")
            .context("prepare tags query")?;
        let rows = stmt
            .query_map(params![customer_id.get()], |row| row.get::<_, String>(0))
            .context("query tags")?;
        rows.collect::<rusqlite::Result<BTreeSet<_>>>()
            .context("collect tags")
    }

    pub fn attach_file(
        &self,
        customer_id: CustomerId,
        input: &CustomerFileInput,
    ) -> Result<CustomerFile> {
        input.validate()?;
        let size = i64::try_from(input.data.len()).context("file size overflow")?;
        if size > self.max_file_size {
            bail!(
                "file is {} bytes but max allowed is {}; shrink the file and retry",
                size,
                self.max_file_size
            );
        }
        self.ensure_customer_exists(customer_id)?;

        let checksum = checksum_sha256(&input.data);
        let uploaded_at = OffsetDateTime::now_utc();
        let uploaded_at_raw = uploaded_at
            .format(&Rfc3339)
            .context("format upload timestamp")?;
        self.conn
            .execute(
                "
                INSERT INTO customer_files (
                  customer_id, file_name, mime_type, size_bytes, sha256, data, uploaded_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    customer_id.get(),
                    input.file_name,
                    input.mime_type,
                    size,
                    checksum,
                    input.data,
                    uploaded_at_raw,
                ],
            )
            .context("insert customer file")?;

        Ok(CustomerFile {
            id: CustomerFileId::new(self.conn.last_insert_rowid()),
            customer_id,
            file_name: input.file_name.clone(),
            mime_type: input.mime_type.clone(),
            size_bytes: size,
            checksum_sha256: checksum,
            uploaded_at,
        })
    }

    pub fn list_files(&self, customer_id: CustomerId) -> Result<Vec<CustomerFile>> {
        self.query_files(Some(customer_id))
    }

    pub fn file_content(&self, file_id: CustomerFileId) -> Result<Vec<u8>> {
        let (data, checksum): (Vec<u8>, String) = self
            .conn
            .query_row(
                "SELECT data, sha256 FROM customer_files WHERE id = ?",
                params![file_id.get()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .with_context(|| format!("load file content {}", file_id.get()))?;
        if checksum_sha256(&data) != checksum {
            bail!(
                "file {} failed its checksum -- re-upload the file",
                file_id.get()
            );
        }
        Ok(data)
    }

    pub fn create_order(&self, customer_id: CustomerId, order: &NewOrder) -> Result<CustomerOrderId> {
        if order.title.trim().is_empty() {
            bail!("order title is required -- enter a title and retry");
        }
        if order.amount_cents < 0 {
            bail!("order amount cannot be negative");
        }
        self.ensure_customer_exists(customer_id)?;

        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO customer_orders (
                  customer_id, title, amount_cents, ordered_on, created_at
                ) VALUES (?, ?, ?, ?, ?)
                ",
                params![
                    customer_id.get(),
                    order.title.trim(),
                    order.amount_cents,
                    order.ordered_on.map(format_date),
                    now,
                ],
            )
            .context("insert customer order")?;
        Ok(CustomerOrderId::new(self.conn.last_insert_rowid()))
    }

    pub fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<CustomerOrder>> {
        self.query_orders(Some(customer_id))
    }

    /// Writes the full roster as CSV into `dir` and returns the file path.
    pub fn export_customers_csv(
        &self,
        dir: &Path,
        options: CsvOptions,
        today: Date,
    ) -> Result<PathBuf> {
        let customers = self.list_customers()?;
        let contents = render_customers_csv(&customers, options)?;
        fs::create_dir_all(dir)
            .with_context(|| format!("create export directory {}", dir.display()))?;
        let path = dir.join(export_file_name(today));
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        info!(
            path = %path.display(),
            customers = customers.len(),
            "exported customers"
        );
        Ok(path)
    }

    /// Fills an empty database with generated customers and orders. A share
    /// of them keep their salesperson only in the legacy column.
    pub fn seed_demo_data(&self, seed: u64) -> Result<()> {
        let existing: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))
            .context("count customers")?;
        if existing > 0 {
            bail!("database already has {existing} customers -- demo data needs an empty database");
        }

        let mut faker = CustomerFaker::new(seed);
        for index in 0..DEMO_CUSTOMERS {
            let input = faker.customer(&SALES_STAFF);
            let customer_id = self.create_customer(&input)?;
            if index % 5 == 4 {
                self.conn
                    .execute(
                        "
                        UPDATE customers
                        SET sales_person = assigned_sales, assigned_sales = NULL
                        WHERE id = ?
                        ",
                        params![customer_id.get()],
                    )
                    .context("move demo salesperson to legacy column")?;
            }
            for _ in 0..faker.int_n(3) {
                let order = faker.order();
                self.create_order(
                    customer_id,
                    &NewOrder {
                        title: order.title,
                        amount_cents: order.amount_cents,
                        ordered_on: order.ordered_on,
                    },
                )?;
            }
        }
        info!(customers = DEMO_CUSTOMERS, seed, "seeded demo data");
        Ok(())
    }

    fn ensure_customer_exists(&self, customer_id: CustomerId) -> Result<()> {
        let exists: i64 = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM customers WHERE id = ?)",
                params![customer_id.get()],
                |row| row.get(0),
            )
            .with_context(|| format!("check customer {}", customer_id.get()))?;
        if exists != 1 {
            bail!(
                "customer {} not found -- reload the roster and retry",
                customer_id.get()
            );
        }
        Ok(())
    }

    fn all_tags(&self) -> Result<BTreeMap<CustomerId, BTreeSet<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT customer_id, tag FROM customer_tags")
            .context("prepare all tags query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((CustomerId::new(row.get(0)?), row.get::<_, String>(1)?))
            })
            .context("query all tags")?;

        let mut tags: BTreeMap<CustomerId, BTreeSet<String>> = BTreeMap::new();
        for row in rows {
            let (customer_id, tag) = row.context("read tag row")?;
            tags.entry(customer_id).or_default().insert(tag);
        }
        Ok(tags)
    }

    fn query_files(&self, customer_id: Option<CustomerId>) -> Result<Vec<CustomerFile>> {
        let mut sql = String::from(
            "
            SELECT id, customer_id, file_name, mime_type, size_bytes, sha256, uploaded_at
            FROM customer_files
            ",
        );
        if customer_id.is_some() {
            sql.push_str("WHERE customer_id = ?1\n");
        }
        sql.push_str("ORDER BY uploaded_at ASC, id ASC");

        let mut stmt = self.conn.prepare(&sql).context("prepare files query")?;
        let map_row = |row: &Row<'_>| -> rusqlite::Result<CustomerFile> {
            let uploaded_at_raw: String = row.get(6)?;
            Ok(CustomerFile {
                id: CustomerFileId::new(row.get(0)?),
                customer_id: CustomerId::new(row.get(1)?),
                file_name: row.get(2)?,
                mime_type: row.get(3)?,
                size_bytes: row.get(4)?,
                checksum_sha256: row.get(5)?,
                uploaded_at: parse_datetime(&uploaded_at_raw).map_err(to_sql_error)?,
            })
        };
        let rows = match customer_id {
            Some(customer_id) => stmt.query_map(params![customer_id.get()], map_row),
            None => stmt.query_map([], map_row),
        }
        .context("query files")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect files")
    }

    fn query_orders(&self, customer_id: Option<CustomerId>) -> Result<Vec<CustomerOrder>> {
        let mut sql = String::from(
            "
            SELECT id, customer_id, title, amount_cents, ordered_on, created_at
            FROM customer_orders
            ",
        );
        if customer_id.is_some() {
            sql.push_str("WHERE customer_id = ?1\n");
        }
        sql.push_str("ORDER BY ordered_on DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql).context("prepare orders query")?;
        let map_row = |row: &Row<'_>| -> rusqlite::Result<CustomerOrder> {
            let ordered_on_raw: Option<String> = row.get(4)?;
            let created_at_raw: String = row.get(5)?;
            Ok(CustomerOrder {
                id: CustomerOrderId::new(row.get(0)?),
                customer_id: CustomerId::new(row.get(1)?),
                title: row.get(2)?,
                amount_cents: row.get(3)?,
                ordered_on: parse_opt_date(ordered_on_raw).map_err(to_sql_error)?,
                created_at: parse_datetime(&created_at_raw).map_err(to_sql_error)?,
            })
        };
        let rows = match customer_id {
            Some(customer_id) => stmt.query_map(params![customer_id.get()], map_row),
            None => stmt.query_map([], map_row),
        }
        .context("query orders")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect orders")
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("TALLY_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set TALLY_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("tally.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    let gender_raw: String = row.get(8)?;
    let gender = Gender::parse(&gender_raw)
        .ok_or_else(|| invalid_column(8, format!("unknown gender {gender_raw}")))?;
    let type_raw: String = row.get(9)?;
    let customer_type = CustomerType::parse(&type_raw)
        .ok_or_else(|| invalid_column(9, format!("unknown customer type {type_raw}")))?;
    let order_date_raw: Option<String> = row.get(12)?;
    let created_at_raw: String = row.get(13)?;

    Ok(Customer {
        id: CustomerId::new(row.get(0)?),
        name: row.get(1)?,
        phone: row.get(2)?,
        wechat: row.get(3)?,
        address: row.get(4)?,
        occupation: row.get(5)?,
        notes: row.get(6)?,
        contract_name: row.get(7)?,
        gender,
        customer_type,
        sales: SalesAssignment::from_columns(row.get(10)?, row.get(11)?),
        tags: BTreeSet::new(),
        order_date: parse_opt_date(order_date_raw).map_err(to_sql_error)?,
        created_at: parse_datetime(&created_at_raw).map_err(to_sql_error)?,
        files: Vec::new(),
        orders: Vec::new(),
    })
}

fn replace_tags(conn: &Connection, customer_id: CustomerId, tags: &BTreeSet<String>) -> Result<()> {
    conn.execute(
        "DELETE FROM customer_tags WHERE customer_id = ?",
        params![customer_id.get()],
    )
    .context("clear customer tags")?;
    for tag in tags {
        conn.execute(
            "INSERT OR IGNORE INTO customer_tags (customer_id, tag) VALUES (?, ?)",
            params![customer_id.get(), tag.trim()],
        )
        .with_context(|| format!("insert tag {tag}"))?;
    }
    Ok(())
}

fn group_by_customer<T>(
    items: Vec<T>,
    key: impl Fn(&T) -> CustomerId,
) -> BTreeMap<CustomerId, Vec<T>> {
    let mut grouped: BTreeMap<CustomerId, Vec<T>> = BTreeMap::new();
    for item in items {
        grouped.entry(key(&item)).or_default().push(item);
    }
    grouped
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, required_columns) in REQUIRED_SCHEMA {
        if !table_exists(conn, table)? {
            bail!(
                "database is missing required table `{table}`; use a tally-compatible database or migrate first"
            );
        }

        let columns = table_columns(conn, table)?;
        let missing: Vec<&str> = required_columns
            .iter()
            .copied()
            .filter(|column| !columns.contains(*column))
            .collect();

        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing required columns: {}; run migration before launching",
                missing.join(", ")
            );
        }
    }

    Ok(())
}

fn ensure_required_indexes(conn: &Connection) -> Result<()> {
    for index in REQUIRED_INDEXES {
        conn.execute_batch(index.create_sql)
            .with_context(|| format!("ensure required index `{}`", index.name))?;
    }

    let existing_indexes = index_names(conn)?;
    let missing = REQUIRED_INDEXES
        .iter()
        .filter(|index| !existing_indexes.contains(index.name))
        .map(|index| index.name)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "database is missing required indexes: {}; run migration before launching",
            missing.join(", ")
        );
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "
            SELECT EXISTS(
              SELECT 1
              FROM sqlite_master
              WHERE type = 'table' AND name = ?
            )
            ",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("check table existence for {table}"))?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;

    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))
}

fn index_names(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(
            "
            SELECT name
            FROM sqlite_master
            WHERE type = 'index'
              AND name NOT LIKE 'sqlite_%'
            ORDER BY name ASC
            ",
        )
        .context("prepare index names query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query index names")?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("collect index names")
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}

fn parse_datetime(raw: &str) -> Result<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(value);
    }

    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        return Ok(value.assume_utc());
    }

    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    ) {
        return Ok(value.assume_utc());
    }

    if let Ok(value) = Date::parse(raw, &format_description!("[year]-[month]-[day]")) {
        return Ok(value.midnight().assume_utc());
    }

    bail!("unsupported datetime format {raw:?}")
}

fn parse_date(raw: &str) -> Result<Date> {
    if let Ok(value) = Date::parse(raw, &format_description!("[year]-[month]-[day]")) {
        return Ok(value);
    }

    // Older rows may hold full timestamps; keep the calendar day.
    let date_time = parse_datetime(raw)?;
    Ok(date_time.date())
}

fn parse_opt_date(raw: Option<String>) -> Result<Option<Date>> {
    raw.as_deref().map(parse_date).transpose()
}

fn to_sql_error(error: anyhow::Error) -> rusqlite::Error {
    invalid_column(0, error.to_string())
}

fn format_date(value: Date) -> String {
    value
        .format(&format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "1970-01-01".to_owned())
}

fn checksum_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut output = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{Store, checksum_sha256, non_blank, parse_date, parse_datetime};
    use anyhow::Result;
    use tally_app::CustomerFormInput;
    use time::macros::{date, datetime};

    #[test]
    fn checksum_is_lowercase_hex() {
        assert_eq!(
            checksum_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn parse_datetime_accepts_legacy_layouts() -> Result<()> {
        assert_eq!(
            parse_datetime("2026-02-19T12:34:56Z")?,
            datetime!(2026-02-19 12:34:56 UTC)
        );
        assert_eq!(
            parse_datetime("2026-02-19 12:34:56")?,
            datetime!(2026-02-19 12:34:56 UTC)
        );
        assert_eq!(parse_datetime("2026-02-19")?, datetime!(2026-02-19 00:00 UTC));
        assert_eq!(parse_date("2026-02-19T08:00:00Z")?, date!(2026 - 02 - 19));
        assert!(parse_datetime("19/02/2026").is_err());
        Ok(())
    }

    #[test]
    fn blank_optional_columns_are_stored_as_null() -> Result<()> {
        assert_eq!(non_blank("  "), None);
        assert_eq!(non_blank(" wx "), Some("wx"));

        let store = Store::open_memory()?;
        store.bootstrap()?;
        let id = store.create_customer(&CustomerFormInput {
            name: "王芳".to_owned(),
            phone: "13900002222".to_owned(),
            wechat: "   ".to_owned(),
            ..CustomerFormInput::default()
        })?;

        let wechat: Option<String> = store.raw_connection().query_row(
            "SELECT wechat FROM customers WHERE id = ?",
            [id.get()],
            |row| row.get(0),
        )?;
        assert!(wechat.is_none());
        Ok(())
    }
}
