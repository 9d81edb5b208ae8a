// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow, bail};
use time::macros::{date, datetime};
use time::{Date, OffsetDateTime};

use crate::{
    Customer, InstallmentCount, InstallmentFormInput, InstallmentRecord, InstallmentRecordId,
};

/// A single-field change applied to a record draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFieldEdit {
    OrderDate(Option<Date>),
    Department(String),
    SalesPerson(String),
    ContractName(String),
    Overdue(bool),
    InGroup(bool),
    ESignContract(bool),
    FirstPaymentManual(bool),
    SigningMethod(String),
    Notes(String),
    AmountCents(i64),
    InstallmentCount(InstallmentCount),
    RepaymentDate(Option<Date>),
    MonthlyPaymentDate(String),
    ContractPeriod(String),
}

impl RecordFieldEdit {
    pub fn apply(self, record: &mut InstallmentRecord) -> Result<()> {
        match self {
            Self::OrderDate(value) => record.order_date = value,
            Self::Department(value) => record.department = value,
            Self::SalesPerson(value) => record.sales_person = value,
            Self::ContractName(value) => record.contract_name = value,
            Self::Overdue(value) => record.is_overdue = value,
            Self::InGroup(value) => record.is_in_group = value,
            Self::ESignContract(value) => record.has_e_sign_contract = value,
            Self::FirstPaymentManual(value) => record.is_first_payment_manual = value,
            Self::SigningMethod(value) => record.signing_method = value,
            Self::Notes(value) => record.notes = value,
            Self::AmountCents(value) => {
                if value < 0 {
                    bail!("installment amount cannot be negative -- enter 0 or more");
                }
                record.installment_amount_cents = value;
            }
            Self::InstallmentCount(count) => record.set_installment_count(count),
            Self::RepaymentDate(value) => record.repayment_date = value,
            Self::MonthlyPaymentDate(value) => record.monthly_payment_date = value,
            Self::ContractPeriod(value) => record.contract_period = value,
        }
        Ok(())
    }
}

/// The record currently being edited and its uncommitted copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub record_id: InstallmentRecordId,
    pub draft: InstallmentRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookCommand<'a> {
    BeginEdit(InstallmentRecordId),
    EditField(RecordFieldEdit),
    Save(OffsetDateTime),
    Cancel,
    TogglePayment {
        id: InstallmentRecordId,
        index: usize,
    },
    Add(InstallmentFormInput, OffsetDateTime),
    OpenContractDetail {
        name: String,
        customers: &'a [Customer],
    },
    CloseContractDetail,
    DismissNotice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEvent {
    EditStarted(InstallmentRecordId),
    DraftDiscarded(InstallmentRecordId),
    DraftUpdated(InstallmentRecordId),
    Saved(InstallmentRecordId),
    Cancelled(InstallmentRecordId),
    PaymentToggled {
        id: InstallmentRecordId,
        index: usize,
        paid: bool,
    },
    Added(InstallmentRecordId),
    ContractDetailOpened(String),
    ContractNotFound(String),
    ContractDetailClosed,
    NoticeDismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookStats {
    pub total: usize,
    pub overdue: usize,
    pub e_signed: usize,
    pub in_group: usize,
}

/// In-memory installment contracts for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallmentBook {
    records: Vec<InstallmentRecord>,
    session: Option<EditSession>,
    pub contract_detail: Option<Customer>,
    pub notice: Option<String>,
}

impl InstallmentBook {
    pub fn new(records: Vec<InstallmentRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn with_samples() -> Result<Self> {
        Ok(Self::new(sample_records()?))
    }

    pub fn records(&self) -> &[InstallmentRecord] {
        &self.records
    }

    pub fn record(&self, id: InstallmentRecordId) -> Option<&InstallmentRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn is_editing(&self, id: InstallmentRecordId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.record_id == id)
    }

    /// The draft for a record under edit, otherwise the committed record.
    pub fn displayed(&self, id: InstallmentRecordId) -> Option<&InstallmentRecord> {
        match &self.session {
            Some(session) if session.record_id == id => Some(&session.draft),
            _ => self.record(id),
        }
    }

    pub fn stats(&self) -> BookStats {
        let count = |predicate: fn(&InstallmentRecord) -> bool| {
            self.records.iter().filter(|record| predicate(record)).count()
        };
        BookStats {
            total: self.records.len(),
            overdue: count(|record| record.is_overdue),
            e_signed: count(|record| record.has_e_sign_contract),
            in_group: count(|record| record.is_in_group),
        }
    }

    pub fn dispatch(&mut self, command: BookCommand<'_>) -> Result<Vec<BookEvent>> {
        match command {
            BookCommand::BeginEdit(id) => self.begin_edit(id),
            BookCommand::EditField(edit) => {
                let session = self
                    .session
                    .as_mut()
                    .ok_or_else(|| anyhow!("no record is being edited -- press e on a row first"))?;
                edit.apply(&mut session.draft)?;
                Ok(vec![BookEvent::DraftUpdated(session.record_id)])
            }
            BookCommand::Save(now) => self.save(now),
            BookCommand::Cancel => Ok(self
                .session
                .take()
                .map(|session| vec![BookEvent::Cancelled(session.record_id)])
                .unwrap_or_default()),
            BookCommand::TogglePayment { id, index } => self.toggle_payment(id, index),
            BookCommand::Add(form, now) => self.add(&form, now),
            BookCommand::OpenContractDetail { name, customers } => {
                Ok(vec![self.open_contract_detail(name, customers)])
            }
            BookCommand::CloseContractDetail => {
                self.contract_detail = None;
                Ok(vec![BookEvent::ContractDetailClosed])
            }
            BookCommand::DismissNotice => {
                self.notice = None;
                Ok(vec![BookEvent::NoticeDismissed])
            }
        }
    }

    fn begin_edit(&mut self, id: InstallmentRecordId) -> Result<Vec<BookEvent>> {
        let record = self
            .record(id)
            .cloned()
            .ok_or_else(|| anyhow!("installment record {} not found", id.get()))?;

        let mut events = Vec::new();
        if let Some(previous) = self.session.take() {
            events.push(BookEvent::DraftDiscarded(previous.record_id));
        }
        self.session = Some(EditSession {
            record_id: id,
            draft: record,
        });
        events.push(BookEvent::EditStarted(id));
        Ok(events)
    }

    fn save(&mut self, now: OffsetDateTime) -> Result<Vec<BookEvent>> {
        let Some(EditSession {
            record_id,
            mut draft,
        }) = self.session.take()
        else {
            bail!("no record is being edited -- nothing to save");
        };
        let Some(slot) = self.records.iter_mut().find(|record| record.id == record_id) else {
            bail!("installment record {} no longer exists", record_id.get());
        };
        draft.updated_at = now;
        *slot = draft;
        Ok(vec![BookEvent::Saved(record_id)])
    }

    fn toggle_payment(&mut self, id: InstallmentRecordId, index: usize) -> Result<Vec<BookEvent>> {
        let target = match self.session.as_mut() {
            Some(session) if session.record_id == id => &mut session.draft,
            _ => self
                .records
                .iter_mut()
                .find(|record| record.id == id)
                .ok_or_else(|| anyhow!("installment record {} not found", id.get()))?,
        };
        let paid = target.toggle_payment(index)?;
        Ok(vec![BookEvent::PaymentToggled { id, index, paid }])
    }

    fn add(&mut self, form: &InstallmentFormInput, now: OffsetDateTime) -> Result<Vec<BookEvent>> {
        form.validate()?;
        let id = self.next_id(now);
        self.records.push(InstallmentRecord::new(id, form, now));
        Ok(vec![BookEvent::Added(id)])
    }

    fn open_contract_detail(&mut self, name: String, customers: &[Customer]) -> BookEvent {
        match find_contract_customer(customers, &name) {
            Some(customer) => {
                self.contract_detail = Some(customer.clone());
                self.notice = None;
                BookEvent::ContractDetailOpened(name)
            }
            None => {
                let message = format!("no customer found with contract name \"{name}\"");
                self.notice = Some(message.clone());
                BookEvent::ContractNotFound(message)
            }
        }
    }

    // Millisecond creation time, stepped forward past any id already taken.
    fn next_id(&self, now: OffsetDateTime) -> InstallmentRecordId {
        let mut candidate = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        while self.records.iter().any(|record| record.id.get() == candidate) {
            candidate += 1;
        }
        InstallmentRecordId::new(candidate)
    }
}

/// Finds the customer whose name or contract name equals `name` exactly.
pub fn find_contract_customer<'a>(customers: &'a [Customer], name: &str) -> Option<&'a Customer> {
    customers
        .iter()
        .find(|customer| customer.name == name || customer.contract_name.as_deref() == Some(name))
}

/// "paid/total" progress for the record table.
pub fn payment_progress(record: &InstallmentRecord) -> String {
    format!(
        "{}/{}",
        record.payment_status().paid_count(),
        record.installment_count().get()
    )
}

fn sample_records() -> Result<Vec<InstallmentRecord>> {
    let mut first_form = sample_form(SampleForm {
        order_date: date!(2024 - 01 - 15),
        department: "销售一部",
        sales_person: "Alice Chen",
        contract_name: "张小美",
        signing_method: "线上签约",
        notes: "客户信用良好，按时还款",
        amount_cents: 200_000,
        count: 6,
        repayment_date: date!(2024 - 02 - 15),
        monthly_payment_date: "每月15日",
        contract_period: "2024年1月-2024年6月",
    })?;
    first_form.is_in_group = true;
    first_form.has_e_sign_contract = true;
    let mut first = InstallmentRecord::new(
        InstallmentRecordId::new(1),
        &first_form,
        datetime!(2024-01-15 00:00 UTC),
    );
    first.set_payment(0, true)?;
    first.set_payment(1, true)?;

    let mut second_form = sample_form(SampleForm {
        order_date: date!(2024 - 02 - 01),
        department: "销售二部",
        sales_person: "Bob Wang",
        contract_name: "李先生",
        signing_method: "线下签约",
        notes: "第三期逾期，需要催款",
        amount_cents: 150_000,
        count: 12,
        repayment_date: date!(2024 - 03 - 01),
        monthly_payment_date: "每月1日",
        contract_period: "2024年2月-2025年1月",
    })?;
    second_form.is_overdue = true;
    second_form.is_first_payment_manual = true;
    let mut second = InstallmentRecord::new(
        InstallmentRecordId::new(2),
        &second_form,
        datetime!(2024-02-01 00:00 UTC),
    );
    second.set_payment(0, true)?;
    second.set_payment(1, true)?;

    Ok(vec![first, second])
}

struct SampleForm {
    order_date: Date,
    department: &'static str,
    sales_person: &'static str,
    contract_name: &'static str,
    signing_method: &'static str,
    notes: &'static str,
    amount_cents: i64,
    count: u8,
    repayment_date: Date,
    monthly_payment_date: &'static str,
    contract_period: &'static str,
}

fn sample_form(sample: SampleForm) -> Result<InstallmentFormInput> {
    let count = InstallmentCount::new(sample.count)
        .ok_or_else(|| anyhow!("sample installment count {} is out of range", sample.count))?;
    let mut form = InstallmentFormInput::new(sample.contract_name, sample.sales_person);
    form.order_date = Some(sample.order_date);
    form.department = sample.department.to_owned();
    form.signing_method = sample.signing_method.to_owned();
    form.notes = sample.notes.to_owned();
    form.installment_amount_cents = sample.amount_cents;
    form.repayment_date = Some(sample.repayment_date);
    form.contract_period = sample.contract_period.to_owned();
    form.set_installment_count(count);
    form.monthly_payment_date = sample.monthly_payment_date.to_owned();
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::{
        BookCommand, BookEvent, InstallmentBook, RecordFieldEdit, find_contract_customer,
        payment_progress,
    };
    use crate::{
        Customer, CustomerId, CustomerType, Gender, InstallmentCount, InstallmentFormInput,
        SalesAssignment,
    };
    use std::collections::BTreeSet;
    use time::macros::datetime;

    fn form(contract_name: &str, sales_person: &str) -> InstallmentFormInput {
        InstallmentFormInput::new(contract_name, sales_person)
    }

    fn customer(id: i64, name: &str, contract_name: Option<&str>) -> Customer {
        Customer {
            id: CustomerId::new(id),
            name: name.to_owned(),
            phone: "13800000000".to_owned(),
            wechat: None,
            address: None,
            occupation: None,
            notes: None,
            contract_name: contract_name.map(str::to_owned),
            gender: Gender::Female,
            customer_type: CustomerType::Installment,
            sales: SalesAssignment::default(),
            tags: BTreeSet::new(),
            order_date: None,
            created_at: datetime!(2026-01-01 00:00 UTC),
            files: Vec::new(),
            orders: Vec::new(),
        }
    }

    fn count(value: u8) -> InstallmentCount {
        InstallmentCount::new(value).expect("valid count")
    }

    #[test]
    fn add_then_change_count_regenerates_unpaid_checklist() -> anyhow::Result<()> {
        let mut book = InstallmentBook::default();
        let events = book.dispatch(BookCommand::Add(
            form("Zhao Li", "Alice Chen"),
            datetime!(2026-03-01 10:00 UTC),
        ))?;
        let [BookEvent::Added(id)] = events.as_slice() else {
            panic!("expected a single Added event, got {events:?}");
        };
        let id = *id;
        let record = book.record(id).expect("record added");
        assert_eq!(record.payment_status().as_slice(), &[false; 6]);

        book.dispatch(BookCommand::BeginEdit(id))?;
        book.dispatch(BookCommand::TogglePayment { id, index: 0 })?;
        book.dispatch(BookCommand::EditField(RecordFieldEdit::InstallmentCount(
            count(12),
        )))?;
        book.dispatch(BookCommand::Save(datetime!(2026-03-02 10:00 UTC)))?;

        let record = book.record(id).expect("record still present");
        assert_eq!(record.installment_count().get(), 12);
        assert_eq!(record.payment_status().as_slice(), &[false; 12]);
        assert_eq!(record.updated_at, datetime!(2026-03-02 10:00 UTC));
        Ok(())
    }

    #[test]
    fn add_requires_contract_name_and_salesperson() {
        let mut book = InstallmentBook::default();
        let error = book
            .dispatch(BookCommand::Add(
                form("", "Alice Chen"),
                datetime!(2026-03-01 10:00 UTC),
            ))
            .expect_err("blank contract name");
        assert!(error.to_string().contains("contract name and salesperson"));
        assert!(book.records().is_empty());
    }

    #[test]
    fn ids_never_collide_within_the_same_millisecond() -> anyhow::Result<()> {
        let mut book = InstallmentBook::default();
        let now = datetime!(2026-03-01 10:00 UTC);
        book.dispatch(BookCommand::Add(form("A", "Alice Chen"), now))?;
        book.dispatch(BookCommand::Add(form("B", "Alice Chen"), now))?;
        let ids: Vec<i64> = book.records().iter().map(|record| record.id.get()).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        Ok(())
    }

    #[test]
    fn cancel_leaves_committed_record_untouched() -> anyhow::Result<()> {
        let mut book = InstallmentBook::with_samples()?;
        let id = book.records()[0].id;
        let before = book.records()[0].clone();

        book.dispatch(BookCommand::BeginEdit(id))?;
        book.dispatch(BookCommand::EditField(RecordFieldEdit::Notes(
            "changed".to_owned(),
        )))?;
        book.dispatch(BookCommand::TogglePayment { id, index: 3 })?;
        assert_eq!(book.displayed(id).map(|record| record.notes.as_str()), Some("changed"));

        let events = book.dispatch(BookCommand::Cancel)?;
        assert_eq!(events, vec![BookEvent::Cancelled(id)]);
        assert_eq!(book.records()[0], before);
        assert!(book.session().is_none());
        Ok(())
    }

    #[test]
    fn beginning_another_edit_discards_previous_draft() -> anyhow::Result<()> {
        let mut book = InstallmentBook::with_samples()?;
        let first = book.records()[0].id;
        let second = book.records()[1].id;

        book.dispatch(BookCommand::BeginEdit(first))?;
        book.dispatch(BookCommand::EditField(RecordFieldEdit::Overdue(true)))?;
        let events = book.dispatch(BookCommand::BeginEdit(second))?;

        assert_eq!(
            events,
            vec![
                BookEvent::DraftDiscarded(first),
                BookEvent::EditStarted(second)
            ]
        );
        assert!(!book.record(first).expect("first record").is_overdue);
        assert!(book.is_editing(second));
        Ok(())
    }

    #[test]
    fn toggle_outside_edit_changes_only_that_index() -> anyhow::Result<()> {
        let mut book = InstallmentBook::with_samples()?;
        let id = book.records()[1].id;
        let before = book.records()[1].payment_status().clone();

        let events = book.dispatch(BookCommand::TogglePayment { id, index: 5 })?;
        assert_eq!(
            events,
            vec![BookEvent::PaymentToggled {
                id,
                index: 5,
                paid: true
            }]
        );
        let after = book.records()[1].payment_status();
        for index in 0..after.len() {
            let expected = before.is_paid(index).map(|paid| paid != (index == 5));
            assert_eq!(after.is_paid(index), expected);
        }

        let error = book
            .dispatch(BookCommand::TogglePayment { id, index: 12 })
            .expect_err("index past the last period");
        assert!(error.to_string().contains("out of range"));
        Ok(())
    }

    #[test]
    fn negative_amount_edit_is_rejected() -> anyhow::Result<()> {
        let mut book = InstallmentBook::with_samples()?;
        let id = book.records()[0].id;
        book.dispatch(BookCommand::BeginEdit(id))?;
        assert!(
            book.dispatch(BookCommand::EditField(RecordFieldEdit::AmountCents(-5)))
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn contract_lookup_opens_detail_or_reports_missing() -> anyhow::Result<()> {
        let customers = vec![
            customer(1, "Zhang Xiaomei", Some("张小美")),
            customer(2, "李先生", None),
        ];
        let mut book = InstallmentBook::with_samples()?;

        let events = book.dispatch(BookCommand::OpenContractDetail {
            name: "张小美".to_owned(),
            customers: &customers,
        })?;
        assert_eq!(events, vec![BookEvent::ContractDetailOpened("张小美".to_owned())]);
        assert_eq!(
            book.contract_detail.as_ref().map(|customer| customer.id),
            Some(CustomerId::new(1))
        );

        book.dispatch(BookCommand::CloseContractDetail)?;
        let events = book.dispatch(BookCommand::OpenContractDetail {
            name: "王五".to_owned(),
            customers: &customers,
        })?;
        assert!(matches!(events.as_slice(), [BookEvent::ContractNotFound(_)]));
        assert!(book.contract_detail.is_none());
        assert!(
            book.notice
                .as_deref()
                .is_some_and(|notice| notice.contains("no customer found"))
        );

        assert_eq!(
            find_contract_customer(&customers, "李先生").map(|customer| customer.id),
            Some(CustomerId::new(2))
        );
        Ok(())
    }

    #[test]
    fn samples_and_stats() -> anyhow::Result<()> {
        let book = InstallmentBook::with_samples()?;
        let stats = book.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.e_signed, 1);
        assert_eq!(stats.in_group, 1);
        assert_eq!(payment_progress(&book.records()[0]), "2/6");
        assert_eq!(payment_progress(&book.records()[1]), "2/12");
        assert_eq!(book.records()[0].monthly_payment_date, "每月15日");
        Ok(())
    }

    #[test]
    fn new_form_keeps_checklist_in_step_with_count() -> anyhow::Result<()> {
        let mut input = form("王芳", "Carol Li");
        assert_eq!(input.contract_name, "王芳");
        assert_eq!(input.sales_person, "Carol Li");
        assert_eq!(input.installment_count(), InstallmentCount::DEFAULT);
        assert_eq!(
            input.payment_status().len(),
            InstallmentCount::DEFAULT.periods()
        );

        input.is_in_group = true;
        let count = InstallmentCount::new(9).ok_or_else(|| anyhow::anyhow!("9 is in range"))?;
        input.set_installment_count(count);
        assert!(input.is_in_group);
        assert_eq!(input.payment_status().len(), 9);
        Ok(())
    }

    #[test]
    fn sample_checklists_match_their_counts() -> anyhow::Result<()> {
        let book = InstallmentBook::with_samples()?;
        for record in book.records() {
            assert_eq!(
                record.payment_status().len(),
                record.installment_count().periods()
            );
        }
        assert!(book.records()[0].is_in_group && book.records()[0].has_e_sign_contract);
        assert!(book.records()[1].is_overdue && book.records()[1].is_first_payment_manual);
        Ok(())
    }

    #[test]
    fn edit_without_session_is_an_error() {
        let mut book = InstallmentBook::default();
        assert!(
            book.dispatch(BookCommand::EditField(RecordFieldEdit::InGroup(true)))
                .is_err()
        );
        assert!(book.dispatch(BookCommand::Save(datetime!(2026-01-01 00:00 UTC))).is_err());
    }
}
