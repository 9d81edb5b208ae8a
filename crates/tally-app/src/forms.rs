// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::collections::BTreeSet;
use time::Date;

use crate::{CustomerType, FormKind, Gender, InstallmentCount, PaymentChecklist, SalesAssignment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerFormInput {
    pub name: String,
    pub phone: String,
    pub wechat: String,
    pub address: String,
    pub occupation: String,
    pub notes: String,
    pub contract_name: String,
    pub gender: Gender,
    pub customer_type: CustomerType,
    pub assigned_sales: String,
    pub tags: BTreeSet<String>,
    pub order_date: Option<Date>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerFileInput {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentFormInput {
    pub order_date: Option<Date>,
    pub department: String,
    pub sales_person: String,
    pub contract_name: String,
    pub is_overdue: bool,
    pub is_in_group: bool,
    pub has_e_sign_contract: bool,
    pub is_first_payment_manual: bool,
    pub signing_method: String,
    pub notes: String,
    pub installment_amount_cents: i64,
    installment_count: InstallmentCount,
    payment_status: PaymentChecklist,
    pub repayment_date: Option<Date>,
    pub monthly_payment_date: String,
    pub contract_period: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPayload {
    Customer(CustomerFormInput),
    InstallmentRecord(InstallmentFormInput),
}

impl FormPayload {
    pub fn kind(&self) -> FormKind {
        match self {
            Self::Customer(_) => FormKind::Customer,
            Self::InstallmentRecord(_) => FormKind::InstallmentRecord,
        }
    }

    pub fn blank_for(kind: FormKind) -> Self {
        match kind {
            FormKind::Customer => Self::Customer(CustomerFormInput::default()),
            FormKind::InstallmentRecord => {
                Self::InstallmentRecord(InstallmentFormInput::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Customer(customer) => customer.validate(),
            Self::InstallmentRecord(record) => record.validate(),
        }
    }
}

impl Default for CustomerFormInput {
    fn default() -> Self {
        Self {
            name: String::new(),
            phone: String::new(),
            wechat: String::new(),
            address: String::new(),
            occupation: String::new(),
            notes: String::new(),
            contract_name: String::new(),
            gender: Gender::Male,
            customer_type: CustomerType::Retail,
            assigned_sales: String::new(),
            tags: BTreeSet::new(),
            order_date: None,
        }
    }
}

impl CustomerFormInput {
    pub fn from_customer(customer: &crate::Customer) -> Self {
        Self {
            name: customer.name.clone(),
            phone: customer.phone.clone(),
            wechat: customer.wechat.clone().unwrap_or_default(),
            address: customer.address.clone().unwrap_or_default(),
            occupation: customer.occupation.clone().unwrap_or_default(),
            notes: customer.notes.clone().unwrap_or_default(),
            contract_name: customer.contract_name.clone().unwrap_or_default(),
            gender: customer.gender,
            customer_type: customer.customer_type,
            assigned_sales: customer.sales.resolved().unwrap_or_default().to_owned(),
            tags: customer.tags.clone(),
            order_date: customer.order_date,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("customer name is required -- enter a name and retry");
        }
        if self.phone.trim().is_empty() {
            bail!("customer phone is required -- enter a phone number and retry");
        }
        if self.tags.iter().any(|tag| tag.trim().is_empty()) {
            bail!("customer tags cannot be blank");
        }
        Ok(())
    }

    pub fn sales(&self) -> SalesAssignment {
        SalesAssignment::from_columns(Some(self.assigned_sales.clone()), None)
    }
}

impl CustomerFileInput {
    pub fn validate(&self) -> Result<()> {
        if self.file_name.trim().is_empty() {
            bail!("file name is required -- choose a file and retry");
        }
        if self.mime_type.trim().is_empty() {
            bail!("file MIME type is required");
        }
        if self.data.is_empty() {
            bail!("file content is empty -- choose a file with content and retry");
        }
        Ok(())
    }
}

impl Default for InstallmentFormInput {
    fn default() -> Self {
        Self {
            order_date: None,
            department: String::new(),
            sales_person: String::new(),
            contract_name: String::new(),
            is_overdue: false,
            is_in_group: false,
            has_e_sign_contract: false,
            is_first_payment_manual: false,
            signing_method: String::new(),
            notes: String::new(),
            installment_amount_cents: 0,
            installment_count: InstallmentCount::DEFAULT,
            payment_status: PaymentChecklist::unpaid(InstallmentCount::DEFAULT),
            repayment_date: None,
            monthly_payment_date: String::new(),
            contract_period: String::new(),
        }
    }
}

impl InstallmentFormInput {
    /// A blank contract form signed by `contract_name` and sold by `sales_person`.
    pub fn new(contract_name: impl Into<String>, sales_person: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            sales_person: sales_person.into(),
            ..Self::default()
        }
    }

    pub fn installment_count(&self) -> InstallmentCount {
        self.installment_count
    }

    pub fn payment_status(&self) -> &PaymentChecklist {
        &self.payment_status
    }

    /// The monthly payment label describes the old schedule, so it is cleared too.
    pub fn set_installment_count(&mut self, count: InstallmentCount) {
        self.installment_count = count;
        self.monthly_payment_date.clear();
        self.payment_status = PaymentChecklist::unpaid(count);
    }

    pub fn validate(&self) -> Result<()> {
        if self.contract_name.trim().is_empty() || self.sales_person.trim().is_empty() {
            bail!("contract name and salesperson are required -- fill in both and retry");
        }
        if self.installment_amount_cents < 0 {
            bail!("installment amount cannot be negative");
        }
        Ok(())
    }
}
