// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::{Date, OffsetDateTime};

use crate::{Customer, CustomerFile, CustomerId, CustomerType};

/// A selector that is either unrestricted or pinned to one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice<T> {
    All,
    Only(T),
}

impl<T> Default for Choice<T> {
    fn default() -> Self {
        Self::All
    }
}

impl<T: Clone + PartialEq> Choice<T> {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::All => None,
            Self::Only(value) => Some(value),
        }
    }

    /// Steps through `All` followed by each option, wrapping back to `All`.
    pub fn next_in(&self, options: &[T]) -> Self {
        match self {
            Self::All => options.first().cloned().map_or(Self::All, Self::Only),
            Self::Only(current) => {
                let next = options
                    .iter()
                    .position(|option| option == current)
                    .and_then(|index| options.get(index + 1));
                next.cloned().map_or(Self::All, Self::Only)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RosterFilter {
    pub tag: Choice<String>,
    pub customer_type: Choice<CustomerType>,
    pub sales_person: Choice<String>,
    pub order_date_start: Option<Date>,
    pub order_date_end: Option<Date>,
    pub search: String,
}

impl RosterFilter {
    pub fn matches(&self, customer: &Customer) -> bool {
        self.matches_tag(customer)
            && self.matches_customer_type(customer)
            && self.matches_sales_person(customer)
            && self.matches_order_date(customer)
            && self.matches_search(customer)
    }

    fn matches_tag(&self, customer: &Customer) -> bool {
        match &self.tag {
            Choice::All => true,
            Choice::Only(tag) => customer.tags.contains(tag),
        }
    }

    fn matches_customer_type(&self, customer: &Customer) -> bool {
        match self.customer_type {
            Choice::All => true,
            Choice::Only(kind) => customer.customer_type == kind,
        }
    }

    fn matches_sales_person(&self, customer: &Customer) -> bool {
        match &self.sales_person {
            Choice::All => true,
            Choice::Only(name) => customer.sales.matches(name),
        }
    }

    fn matches_order_date(&self, customer: &Customer) -> bool {
        if self.order_date_start.is_none() && self.order_date_end.is_none() {
            return true;
        }
        let Some(order_date) = customer.order_date else {
            return false;
        };
        let after_start = self.order_date_start.is_none_or(|start| order_date >= start);
        let before_end = self.order_date_end.is_none_or(|end| order_date <= end);
        after_start && before_end
    }

    fn matches_search(&self, customer: &Customer) -> bool {
        if self.search.is_empty() {
            return true;
        }
        let needle = self.search.to_lowercase();
        let contains = |value: &str| value.to_lowercase().contains(&needle);

        contains(&customer.name)
            || contains(&customer.phone)
            || [
                &customer.wechat,
                &customer.address,
                &customer.occupation,
                &customer.notes,
            ]
            .into_iter()
            .flatten()
            .any(|value| contains(value))
    }

    /// True when any selector other than the free-text search is narrowing the roster.
    pub fn has_active_selectors(&self) -> bool {
        !self.tag.is_all()
            || !self.customer_type.is_all()
            || !self.sales_person.is_all()
            || self.order_date_start.is_some()
            || self.order_date_end.is_some()
    }

    /// Human-readable chips for each active selector.
    pub fn summary(&self) -> Vec<String> {
        let mut chips = Vec::new();
        if let Some(tag) = self.tag.value() {
            chips.push(format!("tag: {tag}"));
        }
        if let Some(kind) = self.customer_type.value() {
            chips.push(format!("type: {}", kind.label()));
        }
        if let Some(name) = self.sales_person.value() {
            chips.push(format!("sales: {name}"));
        }
        if self.order_date_start.is_some() || self.order_date_end.is_some() {
            chips.push(format!(
                "ordered: {} ~ {}",
                format_bound(self.order_date_start),
                format_bound(self.order_date_end)
            ));
        }
        chips
    }

    /// Resets every selector; the search term is left as typed.
    pub fn clear_selectors(&mut self) {
        self.tag = Choice::All;
        self.customer_type = Choice::All;
        self.sales_person = Choice::All;
        self.order_date_start = None;
        self.order_date_end = None;
    }
}

fn format_bound(bound: Option<Date>) -> String {
    bound.map_or_else(|| "any".to_owned(), |date| date.to_string())
}

pub fn filter_customers<'a>(customers: &'a [Customer], filter: &RosterFilter) -> Vec<&'a Customer> {
    customers
        .iter()
        .filter(|customer| filter.matches(customer))
        .collect()
}

pub fn tag_options(customers: &[Customer]) -> Vec<String> {
    customers
        .iter()
        .flat_map(|customer| customer.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn sales_options(customers: &[Customer]) -> Vec<String> {
    customers
        .iter()
        .filter_map(|customer| customer.sales.resolved())
        .map(str::to_owned)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RosterStats {
    pub total: usize,
    pub new_this_month: usize,
    pub retail: usize,
    pub installment: usize,
    pub filtered: usize,
}

impl RosterStats {
    pub fn compute(customers: &[Customer], filtered: usize, now: OffsetDateTime) -> Self {
        let count_type = |kind: CustomerType| {
            customers
                .iter()
                .filter(|customer| customer.customer_type == kind)
                .count()
        };
        Self {
            total: customers.len(),
            new_this_month: customers
                .iter()
                .filter(|customer| {
                    customer.created_at.year() == now.year()
                        && customer.created_at.month() == now.month()
                })
                .count(),
            retail: count_type(CustomerType::Retail),
            installment: count_type(CustomerType::Installment),
            filtered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RosterState {
    customers: Vec<Customer>,
    pub filter: RosterFilter,
    pub detail: Option<Customer>,
    pub editing: Option<CustomerId>,
    pub pending_delete: Option<CustomerId>,
    pub load_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterCommand {
    Load(Result<Vec<Customer>, String>),
    SetSearch(String),
    SetTag(Choice<String>),
    SetCustomerType(Choice<CustomerType>),
    SetSalesPerson(Choice<String>),
    SetOrderDateStart(Option<Date>),
    SetOrderDateEnd(Option<Date>),
    ClearDateRange,
    ClearFilters,
    Select(CustomerId),
    ShowDetail(Customer),
    CloseDetail,
    RequestDelete(CustomerId),
    CancelDelete,
    BeginEdit(CustomerId),
    FinishEdit,
    CustomerDeleted(CustomerId),
    FileAttached(CustomerFile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    Loaded(usize),
    LoadFailed(String),
    FilterChanged,
    DetailOpened(CustomerId),
    DetailClosed,
    DeleteRequested(CustomerId),
    DeleteCancelled,
    EditStarted(CustomerId),
    EditFinished,
    CustomerRemoved(CustomerId),
    SelectionCleared,
    FileAdded(CustomerId),
    UnknownCustomer(CustomerId),
}

impl RosterState {
    pub fn with_customers(customers: Vec<Customer>) -> Self {
        Self {
            customers,
            ..Self::default()
        }
    }

    pub fn customers(&self) -> &[Customer] {
        &self.customers
    }

    pub fn customer(&self, id: CustomerId) -> Option<&Customer> {
        self.customers.iter().find(|customer| customer.id == id)
    }

    pub fn visible(&self) -> Vec<&Customer> {
        filter_customers(&self.customers, &self.filter)
    }

    pub fn stats(&self, now: OffsetDateTime) -> RosterStats {
        RosterStats::compute(&self.customers, self.visible().len(), now)
    }

    pub fn tag_options(&self) -> Vec<String> {
        tag_options(&self.customers)
    }

    pub fn sales_options(&self) -> Vec<String> {
        sales_options(&self.customers)
    }

    pub fn dispatch(&mut self, command: RosterCommand) -> Vec<RosterEvent> {
        match command {
            RosterCommand::Load(Ok(customers)) => {
                self.customers = customers;
                self.load_error = None;
                self.refresh_detail();
                vec![RosterEvent::Loaded(self.customers.len())]
            }
            RosterCommand::Load(Err(error)) => {
                self.customers.clear();
                self.load_error = Some(error.clone());
                vec![RosterEvent::LoadFailed(error)]
            }
            RosterCommand::SetSearch(term) => self.update_filter(|filter| filter.search = term),
            RosterCommand::SetTag(tag) => self.update_filter(|filter| filter.tag = tag),
            RosterCommand::SetCustomerType(kind) => {
                self.update_filter(|filter| filter.customer_type = kind)
            }
            RosterCommand::SetSalesPerson(name) => {
                self.update_filter(|filter| filter.sales_person = name)
            }
            RosterCommand::SetOrderDateStart(date) => {
                self.update_filter(|filter| filter.order_date_start = date)
            }
            RosterCommand::SetOrderDateEnd(date) => {
                self.update_filter(|filter| filter.order_date_end = date)
            }
            RosterCommand::ClearDateRange => self.update_filter(|filter| {
                filter.order_date_start = None;
                filter.order_date_end = None;
            }),
            RosterCommand::ClearFilters => self.update_filter(RosterFilter::clear_selectors),
            RosterCommand::Select(id) => match self.customer(id).cloned() {
                Some(customer) => {
                    self.detail = Some(customer);
                    vec![RosterEvent::DetailOpened(id)]
                }
                None => vec![RosterEvent::UnknownCustomer(id)],
            },
            RosterCommand::ShowDetail(customer) => {
                let id = customer.id;
                self.detail = Some(customer);
                vec![RosterEvent::DetailOpened(id)]
            }
            RosterCommand::CloseDetail => {
                self.detail = None;
                vec![RosterEvent::DetailClosed]
            }
            RosterCommand::RequestDelete(id) => {
                if self.customer(id).is_none() {
                    return vec![RosterEvent::UnknownCustomer(id)];
                }
                self.pending_delete = Some(id);
                vec![RosterEvent::DeleteRequested(id)]
            }
            RosterCommand::CancelDelete => {
                self.pending_delete = None;
                vec![RosterEvent::DeleteCancelled]
            }
            RosterCommand::BeginEdit(id) => {
                if self.customer(id).is_none() {
                    return vec![RosterEvent::UnknownCustomer(id)];
                }
                self.editing = Some(id);
                vec![RosterEvent::EditStarted(id)]
            }
            RosterCommand::FinishEdit => {
                self.editing = None;
                vec![RosterEvent::EditFinished]
            }
            RosterCommand::CustomerDeleted(id) => self.remove_customer(id),
            RosterCommand::FileAttached(file) => self.add_file(file),
        }
    }

    fn update_filter(&mut self, apply: impl FnOnce(&mut RosterFilter)) -> Vec<RosterEvent> {
        apply(&mut self.filter);
        vec![RosterEvent::FilterChanged]
    }

    fn remove_customer(&mut self, id: CustomerId) -> Vec<RosterEvent> {
        self.customers.retain(|customer| customer.id != id);
        if self.pending_delete == Some(id) {
            self.pending_delete = None;
        }
        if self.editing == Some(id) {
            self.editing = None;
        }

        let mut events = vec![RosterEvent::CustomerRemoved(id)];
        if self.detail.as_ref().is_some_and(|detail| detail.id == id) {
            self.detail = None;
            events.push(RosterEvent::SelectionCleared);
        }
        events
    }

    fn add_file(&mut self, file: CustomerFile) -> Vec<RosterEvent> {
        let customer_id = file.customer_id;
        if let Some(detail) = self
            .detail
            .as_mut()
            .filter(|detail| detail.id == customer_id)
        {
            detail.files.push(file.clone());
        }
        if let Some(customer) = self
            .customers
            .iter_mut()
            .find(|customer| customer.id == customer_id)
        {
            customer.files.push(file);
        }
        vec![RosterEvent::FileAdded(customer_id)]
    }

    // Keeps the detail overlay pointing at the reloaded copy, or closes it if
    // the customer vanished upstream.
    fn refresh_detail(&mut self) {
        let Some(detail_id) = self.detail.as_ref().map(|detail| detail.id) else {
            return;
        };
        self.detail = self.customer(detail_id).cloned();
    }
}
