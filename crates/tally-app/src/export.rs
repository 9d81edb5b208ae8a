// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use time::Date;
use time::format_description::well_known::Rfc3339;

use crate::Customer;

pub const CSV_HEADER: [&str; 8] = [
    "姓名", "性别", "电话", "微信", "地址", "职业", "销售员", "创建时间",
];

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CsvOptions {
    pub utf8_bom: bool,
}

/// File name for an export produced on `today`.
pub fn export_file_name(today: Date) -> String {
    format!("客户数据_{today}.csv")
}

/// Renders the whole roster as comma-joined rows. Values are not quoted.
pub fn render_customers_csv(customers: &[Customer], options: CsvOptions) -> Result<String> {
    if customers.is_empty() {
        bail!("no customers to export -- add a customer first");
    }

    let mut lines = Vec::with_capacity(customers.len() + 1);
    lines.push(CSV_HEADER.join(","));
    for customer in customers {
        lines.push(csv_row(customer)?);
    }

    let mut out = String::new();
    if options.utf8_bom {
        out.push(UTF8_BOM);
    }
    out.push_str(&lines.join("\n"));
    Ok(out)
}

fn csv_row(customer: &Customer) -> Result<String> {
    let created_at = customer
        .created_at
        .format(&Rfc3339)
        .with_context(|| format!("format creation time for customer {}", customer.id.get()))?;
    let fields = [
        customer.name.as_str(),
        customer.gender.localized(),
        customer.phone.as_str(),
        customer.wechat.as_deref().unwrap_or_default(),
        customer.address.as_deref().unwrap_or_default(),
        customer.occupation.as_deref().unwrap_or_default(),
        customer.sales.resolved().unwrap_or_default(),
        created_at.as_str(),
    ];
    Ok(fields.join(","))
}
