// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::{Date, OffsetDateTime};

use crate::ids::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Self; 2] = [Self::Male, Self::Female];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            _ => None,
        }
    }

    /// Label used in exported spreadsheets.
    pub const fn localized(self) -> &'static str {
        match self {
            Self::Male => "男",
            Self::Female => "女",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CustomerType {
    Retail,
    Installment,
}

impl CustomerType {
    pub const ALL: [Self; 2] = [Self::Retail, Self::Installment];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retail => "retail",
            Self::Installment => "installment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "retail" => Some(Self::Retail),
            "installment" => Some(Self::Installment),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Retail => "retail customer",
            Self::Installment => "installment customer",
        }
    }
}

/// Salesperson attached to a customer. Older rows carry the name in a legacy
/// column; both are kept so filters can match either one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalesAssignment {
    pub assigned: Option<String>,
    pub legacy: Option<String>,
}

impl SalesAssignment {
    pub fn assigned(name: impl Into<String>) -> Self {
        Self {
            assigned: Some(name.into()),
            legacy: None,
        }
    }

    pub fn from_columns(assigned: Option<String>, legacy: Option<String>) -> Self {
        Self {
            assigned: assigned.filter(|value| !value.trim().is_empty()),
            legacy: legacy.filter(|value| !value.trim().is_empty()),
        }
    }

    pub fn resolved(&self) -> Option<&str> {
        self.assigned.as_deref().or(self.legacy.as_deref())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.assigned.as_deref() == Some(name) || self.legacy.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFile {
    pub id: CustomerFileId,
    pub customer_id: CustomerId,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum_sha256: String,
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerOrder {
    pub id: CustomerOrderId,
    pub customer_id: CustomerId,
    pub title: String,
    pub amount_cents: i64,
    pub ordered_on: Option<Date>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub phone: String,
    pub wechat: Option<String>,
    pub address: Option<String>,
    pub occupation: Option<String>,
    pub notes: Option<String>,
    pub contract_name: Option<String>,
    pub gender: Gender,
    pub customer_type: CustomerType,
    pub sales: SalesAssignment,
    pub tags: BTreeSet<String>,
    pub order_date: Option<Date>,
    pub created_at: OffsetDateTime,
    pub files: Vec<CustomerFile>,
    pub orders: Vec<CustomerOrder>,
}

/// Number of payment periods on a contract, always within 1..=36.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstallmentCount(u8);

impl InstallmentCount {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 36;
    pub const DEFAULT: Self = Self(6);

    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN && value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn periods(self) -> usize {
        self.0 as usize
    }
}

impl Default for InstallmentCount {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One paid/unpaid mark per payment period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChecklist(Vec<bool>);

impl PaymentChecklist {
    pub fn unpaid(count: InstallmentCount) -> Self {
        Self(vec![false; count.periods()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_paid(&self, index: usize) -> Option<bool> {
        self.0.get(index).copied()
    }

    pub fn paid_count(&self) -> usize {
        self.0.iter().filter(|paid| **paid).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn set(&mut self, index: usize, paid: bool) -> Result<()> {
        let len = self.0.len();
        match self.0.get_mut(index) {
            Some(slot) => {
                *slot = paid;
                Ok(())
            }
            None => bail!("payment period {} is out of range 1..={len}", index + 1),
        }
    }

    pub fn toggle(&mut self, index: usize) -> Result<bool> {
        let current = self.is_paid(index).unwrap_or(false);
        self.set(index, !current)?;
        Ok(!current)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentRecord {
    pub id: InstallmentRecordId,
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
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl InstallmentRecord {
    pub fn new(
        id: InstallmentRecordId,
        form: &crate::InstallmentFormInput,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            order_date: form.order_date,
            department: form.department.clone(),
            sales_person: form.sales_person.clone(),
            contract_name: form.contract_name.clone(),
            is_overdue: form.is_overdue,
            is_in_group: form.is_in_group,
            has_e_sign_contract: form.has_e_sign_contract,
            is_first_payment_manual: form.is_first_payment_manual,
            signing_method: form.signing_method.clone(),
            notes: form.notes.clone(),
            installment_amount_cents: form.installment_amount_cents,
            installment_count: form.installment_count(),
            payment_status: form.payment_status().clone(),
            repayment_date: form.repayment_date,
            monthly_payment_date: form.monthly_payment_date.clone(),
            contract_period: form.contract_period.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the checklist with explicit marks; the length must match the count.
    pub fn with_payment_marks(mut self, marks: &[bool]) -> Result<Self> {
        if marks.len() != self.installment_count.periods() {
            bail!(
                "payment marks cover {} periods but the contract has {}",
                marks.len(),
                self.installment_count.get()
            );
        }
        self.payment_status = PaymentChecklist(marks.to_vec());
        Ok(self)
    }

    pub fn installment_count(&self) -> InstallmentCount {
        self.installment_count
    }

    pub fn payment_status(&self) -> &PaymentChecklist {
        &self.payment_status
    }

    /// Changing the count discards every existing paid mark.
    pub fn set_installment_count(&mut self, count: InstallmentCount) {
        self.installment_count = count;
        self.payment_status = PaymentChecklist::unpaid(count);
    }

    pub fn toggle_payment(&mut self, index: usize) -> Result<bool> {
        self.payment_status.toggle(index)
    }

    pub fn set_payment(&mut self, index: usize, paid: bool) -> Result<()> {
        self.payment_status.set(index, paid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabKind {
    Customers,
    Installments,
}

impl TabKind {
    pub const ALL: [Self; 2] = [Self::Customers, Self::Installments];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Installments => "installments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormKind {
    Customer,
    InstallmentRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppMode {
    Nav,
    Edit,
    Form(FormKind),
}

#[cfg(test)]
mod tests {
    use super::{InstallmentCount, PaymentChecklist, SalesAssignment};

    #[test]
    fn installment_count_enforces_bounds() {
        assert!(InstallmentCount::new(0).is_none());
        assert!(InstallmentCount::new(37).is_none());
        assert_eq!(InstallmentCount::new(36).map(InstallmentCount::get), Some(36));
        assert_eq!(InstallmentCount::default().get(), 6);
    }

    #[test]
    fn checklist_toggle_touches_single_index() {
        let count = InstallmentCount::new(4).expect("valid count");
        let mut checklist = PaymentChecklist::unpaid(count);
        assert!(checklist.toggle(2).expect("index in range"));
        assert_eq!(checklist.as_slice(), &[false, false, true, false]);
        assert!(checklist.toggle(4).is_err());
        assert_eq!(checklist.paid_count(), 1);
    }

    #[test]
    fn sales_assignment_prefers_assigned_but_matches_either() {
        let sales =
            SalesAssignment::from_columns(Some("Alice".to_owned()), Some("Bob".to_owned()));
        assert_eq!(sales.resolved(), Some("Alice"));
        assert!(sales.matches("Alice"));
        assert!(sales.matches("Bob"));
        assert!(!sales.matches("Carol"));

        let legacy_only =
            SalesAssignment::from_columns(Some("  ".to_owned()), Some("Bob".to_owned()));
        assert_eq!(legacy_only.resolved(), Some("Bob"));
    }
}
