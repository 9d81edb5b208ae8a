// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tally_app::{
    AppCommand, AppMode, AppState, BookCommand, BookEvent, Customer, CustomerFile,
    CustomerFormInput, CustomerId, CustomerType, FormKind, Gender, InstallmentBook,
    InstallmentCount, InstallmentFormInput, InstallmentRecord, InstallmentRecordId,
    RecordFieldEdit, RosterCommand, RosterEvent, TabKind, payment_progress,
};
use tally_db::validation::{
    format_cents, format_cents_input, format_date, format_tags, parse_installment_count,
    parse_optional_cents, parse_optional_date, parse_tags,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const ATTACH_FAILED_ALERT: &str = "failed to attach file, please retry";
const PAID_MARK: char = '■';
const UNPAID_MARK: char = '□';
const UNASSIGNED_LABEL: &str = "(unassigned)";
const FLAG_YES: &str = "yes";
const FLAG_NO: &str = "no";

/// Data-access seam between the terminal UI and whatever stores customers.
pub trait AppRuntime {
    fn load_customers(&mut self) -> Result<Vec<Customer>>;
    fn add_customer(&mut self, input: &CustomerFormInput) -> Result<CustomerId>;
    fn update_customer(&mut self, id: CustomerId, input: &CustomerFormInput) -> Result<()>;
    fn delete_customer(&mut self, id: CustomerId) -> Result<()>;
    fn attach_file(&mut self, id: CustomerId, path: &Path) -> Result<CustomerFile>;
    fn sales_staff(&mut self) -> Vec<String>;
    /// Writes the whole roster to a CSV file and returns its path.
    fn export_csv(&mut self) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CustomerField {
    Name,
    Phone,
    Wechat,
    Address,
    Occupation,
    ContractName,
    Gender,
    CustomerType,
    AssignedSales,
    Tags,
    OrderDate,
    Notes,
}

impl CustomerField {
    const ALL: [Self; 12] = [
        Self::Name,
        Self::Phone,
        Self::Wechat,
        Self::Address,
        Self::Occupation,
        Self::ContractName,
        Self::Gender,
        Self::CustomerType,
        Self::AssignedSales,
        Self::Tags,
        Self::OrderDate,
        Self::Notes,
    ];

    const fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Phone => "phone",
            Self::Wechat => "wechat",
            Self::Address => "address",
            Self::Occupation => "occupation",
            Self::ContractName => "contract name",
            Self::Gender => "gender",
            Self::CustomerType => "type",
            Self::AssignedSales => "salesperson",
            Self::Tags => "tags",
            Self::OrderDate => "order date",
            Self::Notes => "notes",
        }
    }

    const fn is_choice(self) -> bool {
        matches!(self, Self::Gender | Self::CustomerType | Self::AssignedSales)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordField {
    OrderDate,
    Department,
    SalesPerson,
    ContractName,
    Overdue,
    InGroup,
    ESignContract,
    FirstPaymentManual,
    SigningMethod,
    Amount,
    InstallmentCount,
    RepaymentDate,
    MonthlyPaymentDate,
    ContractPeriod,
    Notes,
}

impl RecordField {
    const ALL: [Self; 15] = [
        Self::OrderDate,
        Self::Department,
        Self::SalesPerson,
        Self::ContractName,
        Self::Overdue,
        Self::InGroup,
        Self::ESignContract,
        Self::FirstPaymentManual,
        Self::SigningMethod,
        Self::Amount,
        Self::InstallmentCount,
        Self::RepaymentDate,
        Self::MonthlyPaymentDate,
        Self::ContractPeriod,
        Self::Notes,
    ];

    const fn label(self) -> &'static str {
        match self {
            Self::OrderDate => "order date",
            Self::Department => "department",
            Self::SalesPerson => "salesperson",
            Self::ContractName => "contract name",
            Self::Overdue => "overdue",
            Self::InGroup => "in group",
            Self::ESignContract => "e-sign contract",
            Self::FirstPaymentManual => "first payment manual",
            Self::SigningMethod => "signing method",
            Self::Amount => "amount per period",
            Self::InstallmentCount => "installment count",
            Self::RepaymentDate => "repayment date",
            Self::MonthlyPaymentDate => "monthly payment date",
            Self::ContractPeriod => "contract period",
            Self::Notes => "notes",
        }
    }

    const fn is_choice(self) -> bool {
        matches!(
            self,
            Self::Overdue | Self::InGroup | Self::ESignContract | Self::FirstPaymentManual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormTarget {
    NewCustomer,
    EditCustomer(CustomerId),
    NewRecord,
    EditRecord(InstallmentRecordId),
}

impl FormTarget {
    const fn kind(self) -> FormKind {
        match self {
            Self::NewCustomer | Self::EditCustomer(_) => FormKind::Customer,
            Self::NewRecord | Self::EditRecord(_) => FormKind::InstallmentRecord,
        }
    }

    const fn title(self) -> &'static str {
        match self {
            Self::NewCustomer => "add customer",
            Self::EditCustomer(_) => "edit customer",
            Self::NewRecord => "add installment record",
            Self::EditRecord(_) => "edit installment record",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FormUiState {
    target: FormTarget,
    field_index: usize,
    values: Vec<String>,
    // Last count committed from the count field; record forms only.
    count: InstallmentCount,
}

impl FormUiState {
    fn field_count(&self) -> usize {
        match self.target.kind() {
            FormKind::Customer => CustomerField::ALL.len(),
            FormKind::InstallmentRecord => RecordField::ALL.len(),
        }
    }

    fn field_label(&self, index: usize) -> &'static str {
        match self.target.kind() {
            FormKind::Customer => CustomerField::ALL
                .get(index)
                .map_or("", |field| field.label()),
            FormKind::InstallmentRecord => RecordField::ALL
                .get(index)
                .map_or("", |field| field.label()),
        }
    }

    fn is_choice(&self, index: usize) -> bool {
        match self.target.kind() {
            FormKind::Customer => CustomerField::ALL
                .get(index)
                .is_some_and(|field| field.is_choice()),
            FormKind::InstallmentRecord => RecordField::ALL
                .get(index)
                .is_some_and(|field| field.is_choice()),
        }
    }

    fn current_value_mut(&mut self) -> Option<&mut String> {
        self.values.get_mut(self.field_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    Search,
    OrderDateStart,
    OrderDateEnd,
    AttachFile(CustomerId),
}

impl PromptKind {
    const fn title(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::OrderDateStart => "ordered from (YYYY-MM-DD, blank clears)",
            Self::OrderDateEnd => "ordered until (YYYY-MM-DD, blank clears)",
            Self::AttachFile(_) => "attach file (path)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PromptUiState {
    kind: PromptKind,
    input: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ViewData {
    roster: tally_app::RosterState,
    book: InstallmentBook,
    sales_staff: Vec<String>,
    customer_cursor: usize,
    record_cursor: usize,
    payment_cursor: usize,
    form: Option<FormUiState>,
    prompt: Option<PromptUiState>,
    alert: Option<String>,
    help_visible: bool,
    status_token: u64,
}

impl ViewData {
    fn new(book: InstallmentBook) -> Self {
        Self {
            book,
            ..Self::default()
        }
    }
}

pub fn run_app<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    book: InstallmentBook,
) -> Result<()> {
    let mut view_data = ViewData::new(book);
    view_data.sales_staff = runtime.sales_staff();
    reload_roster(runtime, &mut view_data);
    if let Some(error) = view_data.roster.load_error.clone() {
        state.dispatch(AppCommand::SetStatus(format!("load failed: {error}")));
    }

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    let (internal_tx, internal_rx) = mpsc::channel();

    let mut result = Ok(());
    loop {
        process_internal_events(state, &view_data, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, state, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = match event::poll(Duration::from_millis(120)).context("poll event") {
            Ok(has_event) => has_event,
            Err(error) => {
                result = Err(error);
                break;
            }
        };
        if has_event {
            match event::read().context("read event") {
                Ok(Event::Key(key)) => {
                    if handle_key_event(state, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events(
    state: &mut AppState,
    view_data: &ViewData,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                state.dispatch(AppCommand::ClearStatus);
            }
            InternalEvent::ClearStatus { .. } => {}
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(4));
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    state.dispatch(AppCommand::SetStatus(message.into()));
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

// A failed load leaves the roster empty with the error kept for the banner.
fn reload_roster<R: AppRuntime>(runtime: &mut R, view_data: &mut ViewData) {
    let loaded = runtime.load_customers().map_err(|error| {
        let message = format!("{error:#}");
        warn!(error = %message, "load customers failed");
        message
    });
    for event in view_data.roster.dispatch(RosterCommand::Load(loaded)) {
        if let RosterEvent::Loaded(count) = event {
            debug!(count, "roster loaded");
        }
    }
    clamp_cursors(view_data);
}

fn clamp_cursors(view_data: &mut ViewData) {
    let visible = view_data.roster.visible().len();
    view_data.customer_cursor = view_data.customer_cursor.min(visible.saturating_sub(1));
    let records = view_data.book.records().len();
    view_data.record_cursor = view_data.record_cursor.min(records.saturating_sub(1));
    let periods = selected_record(view_data).map_or(0, |record| record.payment_status().len());
    view_data.payment_cursor = view_data.payment_cursor.min(periods.saturating_sub(1));
}

fn selected_customer(view_data: &ViewData) -> Option<&Customer> {
    view_data
        .roster
        .visible()
        .get(view_data.customer_cursor)
        .copied()
}

fn selected_record(view_data: &ViewData) -> Option<&InstallmentRecord> {
    let id = view_data.book.records().get(view_data.record_cursor)?.id;
    view_data.book.displayed(id)
}

fn detail_overlay<'a>(state: &AppState, view_data: &'a ViewData) -> Option<&'a Customer> {
    match state.active_tab {
        TabKind::Customers => view_data.roster.detail.as_ref(),
        TabKind::Installments => view_data.book.contract_detail.as_ref(),
    }
}

fn handle_key_event<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if view_data.alert.is_some() {
        if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
            view_data.alert = None;
        }
        return false;
    }

    if view_data.help_visible {
        if key.code == KeyCode::Esc || key.code == KeyCode::Char('?') {
            view_data.help_visible = false;
            emit_status(state, view_data, internal_tx, "help hidden");
        }
        return false;
    }

    if let Some(id) = view_data.roster.pending_delete {
        handle_delete_confirm_key(state, runtime, view_data, internal_tx, id, key);
        return false;
    }

    if view_data.prompt.is_some() {
        handle_prompt_key(state, runtime, view_data, internal_tx, key);
        return false;
    }

    if matches!(state.mode, AppMode::Form(_)) {
        handle_form_key(state, runtime, view_data, internal_tx, key);
        return false;
    }

    if detail_overlay(state, view_data).is_some() {
        handle_detail_key(state, view_data, internal_tx, key);
        return false;
    }

    match (key.code, key.modifiers) {
        (KeyCode::Char('?'), _) => {
            view_data.help_visible = true;
            return false;
        }
        (KeyCode::Tab, _) | (KeyCode::Char('f'), KeyModifiers::NONE) => {
            state.dispatch(AppCommand::NextTab);
            return false;
        }
        (KeyCode::BackTab, _) | (KeyCode::Char('b'), KeyModifiers::NONE) => {
            state.dispatch(AppCommand::PrevTab);
            return false;
        }
        (KeyCode::Char('E'), _) => {
            export_roster(state, runtime, view_data, internal_tx);
            return false;
        }
        (KeyCode::Char('R'), _) => {
            reload_roster(runtime, view_data);
            let status = match &view_data.roster.load_error {
                Some(error) => format!("load failed: {error}"),
                None => format!("{} customers loaded", view_data.roster.customers().len()),
            };
            emit_status(state, view_data, internal_tx, status);
            return false;
        }
        _ => {}
    }

    match state.mode {
        AppMode::Nav => {
            if key.code == KeyCode::Char('i') {
                state.dispatch(AppCommand::EnterEditMode);
                return false;
            }
        }
        AppMode::Edit => {
            if key.code == KeyCode::Esc {
                state.dispatch(AppCommand::ExitToNav);
                return false;
            }
        }
        AppMode::Form(_) => return false,
    }

    match state.active_tab {
        TabKind::Customers => handle_customers_key(state, view_data, internal_tx, key),
        TabKind::Installments => handle_installments_key(state, view_data, internal_tx, key),
    }
    false
}

fn handle_customers_key(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let visible = view_data.roster.visible().len();
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => {
            view_data.customer_cursor =
                (view_data.customer_cursor + 1).min(visible.saturating_sub(1));
        }
        KeyCode::Char('k') | KeyCode::Up => {
            view_data.customer_cursor = view_data.customer_cursor.saturating_sub(1);
        }
        KeyCode::Char('g') => view_data.customer_cursor = 0,
        KeyCode::Char('G') => view_data.customer_cursor = visible.saturating_sub(1),
        KeyCode::Enter => {
            let Some(id) = selected_customer(view_data).map(|customer| customer.id) else {
                emit_status(state, view_data, internal_tx, "no customer selected");
                return;
            };
            view_data.roster.dispatch(RosterCommand::Select(id));
        }
        KeyCode::Char('/') => {
            view_data.prompt = Some(PromptUiState {
                kind: PromptKind::Search,
                input: view_data.roster.filter.search.clone(),
            });
        }
        KeyCode::Char('t') => {
            let next = view_data
                .roster
                .filter
                .tag
                .next_in(&view_data.roster.tag_options());
            let label = next.value().cloned().unwrap_or_else(|| "all".to_owned());
            apply_filter(state, view_data, internal_tx, RosterCommand::SetTag(next));
            emit_status(state, view_data, internal_tx, format!("tag: {label}"));
        }
        KeyCode::Char('y') => {
            let next = view_data
                .roster
                .filter
                .customer_type
                .next_in(&CustomerType::ALL);
            let label = next.value().map_or("all", |kind| kind.label());
            apply_filter(
                state,
                view_data,
                internal_tx,
                RosterCommand::SetCustomerType(next),
            );
            emit_status(state, view_data, internal_tx, format!("type: {label}"));
        }
        KeyCode::Char('s') => {
            let options = sales_filter_options(view_data);
            let next = view_data.roster.filter.sales_person.next_in(&options);
            let label = next.value().cloned().unwrap_or_else(|| "all".to_owned());
            apply_filter(
                state,
                view_data,
                internal_tx,
                RosterCommand::SetSalesPerson(next),
            );
            emit_status(state, view_data, internal_tx, format!("sales: {label}"));
        }
        KeyCode::Char('[') => open_date_prompt(view_data, PromptKind::OrderDateStart),
        KeyCode::Char(']') => open_date_prompt(view_data, PromptKind::OrderDateEnd),
        KeyCode::Char('x') => {
            apply_filter(state, view_data, internal_tx, RosterCommand::ClearDateRange);
            emit_status(state, view_data, internal_tx, "date range cleared");
        }
        KeyCode::Char('c') => {
            apply_filter(state, view_data, internal_tx, RosterCommand::ClearFilters);
            emit_status(state, view_data, internal_tx, "filters cleared");
        }
        KeyCode::Char('a') if state.mode == AppMode::Edit => {
            let values = customer_form_values(&CustomerFormInput::default());
            open_form(state, view_data, FormTarget::NewCustomer, values);
        }
        KeyCode::Char('e') if state.mode == AppMode::Edit => {
            let Some(customer) = selected_customer(view_data).cloned() else {
                emit_status(state, view_data, internal_tx, "no customer selected");
                return;
            };
            view_data
                .roster
                .dispatch(RosterCommand::BeginEdit(customer.id));
            let values = customer_form_values(&CustomerFormInput::from_customer(&customer));
            open_form(state, view_data, FormTarget::EditCustomer(customer.id), values);
        }
        KeyCode::Char('d') if state.mode == AppMode::Edit => {
            let Some(id) = selected_customer(view_data).map(|customer| customer.id) else {
                emit_status(state, view_data, internal_tx, "no customer selected");
                return;
            };
            view_data.roster.dispatch(RosterCommand::RequestDelete(id));
        }
        _ => {}
    }
}

fn handle_installments_key(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    if key.code == KeyCode::Esc && view_data.book.notice.is_some() {
        let _ = view_data.book.dispatch(BookCommand::DismissNotice);
        return;
    }

    let records = view_data.book.records().len();
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => {
            view_data.record_cursor = (view_data.record_cursor + 1).min(records.saturating_sub(1));
            clamp_cursors(view_data);
        }
        KeyCode::Char('k') | KeyCode::Up => {
            view_data.record_cursor = view_data.record_cursor.saturating_sub(1);
            clamp_cursors(view_data);
        }
        KeyCode::Char('h') | KeyCode::Left => {
            view_data.payment_cursor = view_data.payment_cursor.saturating_sub(1);
        }
        KeyCode::Char('l') | KeyCode::Right => {
            view_data.payment_cursor += 1;
            clamp_cursors(view_data);
        }
        KeyCode::Char(' ') => toggle_selected_payment(state, view_data, internal_tx),
        KeyCode::Enter => {
            let Some(name) = selected_record(view_data).map(|record| record.contract_name.clone())
            else {
                emit_status(state, view_data, internal_tx, "no record selected");
                return;
            };
            let command = BookCommand::OpenContractDetail {
                name,
                customers: view_data.roster.customers(),
            };
            match view_data.book.dispatch(command) {
                Ok(events) => {
                    for event in events {
                        if let BookEvent::ContractNotFound(message) = event {
                            emit_status(state, view_data, internal_tx, message);
                        }
                    }
                }
                Err(error) => {
                    emit_status(state, view_data, internal_tx, format!("{error:#}"));
                }
            }
        }
        KeyCode::Char('a') if state.mode == AppMode::Edit => {
            let values = installment_form_values(&InstallmentFormInput::default());
            open_form(state, view_data, FormTarget::NewRecord, values);
            if let Some(form) = view_data.form.as_mut() {
                form.count = InstallmentCount::DEFAULT;
            }
        }
        KeyCode::Char('e') if state.mode == AppMode::Edit => {
            let Some(id) = view_data
                .book
                .records()
                .get(view_data.record_cursor)
                .map(|record| record.id)
            else {
                emit_status(state, view_data, internal_tx, "no record selected");
                return;
            };
            begin_record_edit(state, view_data, internal_tx, id);
        }
        _ => {}
    }
}

fn begin_record_edit(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    id: InstallmentRecordId,
) {
    let events = match view_data.book.dispatch(BookCommand::BeginEdit(id)) {
        Ok(events) => events,
        Err(error) => {
            emit_status(state, view_data, internal_tx, format!("{error:#}"));
            return;
        }
    };
    if events
        .iter()
        .any(|event| matches!(event, BookEvent::DraftDiscarded(_)))
    {
        emit_status(state, view_data, internal_tx, "unsaved draft discarded");
    }
    let Some(draft) = view_data.book.session().map(|session| session.draft.clone()) else {
        return;
    };
    let values = installment_form_values(&form_input_from_record(&draft));
    open_form(state, view_data, FormTarget::EditRecord(id), values);
    if let Some(form) = view_data.form.as_mut() {
        form.count = draft.installment_count();
    }
}

fn toggle_selected_payment(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(id) = view_data
        .book
        .records()
        .get(view_data.record_cursor)
        .map(|record| record.id)
    else {
        emit_status(state, view_data, internal_tx, "no record selected");
        return;
    };
    let index = view_data.payment_cursor;
    match view_data
        .book
        .dispatch(BookCommand::TogglePayment { id, index })
    {
        Ok(events) => {
            for event in events {
                if let BookEvent::PaymentToggled { index, paid, .. } = event {
                    let label = if paid { "paid" } else { "unpaid" };
                    emit_status(
                        state,
                        view_data,
                        internal_tx,
                        format!("period {} marked {label}", index + 1),
                    );
                }
            }
        }
        Err(error) => emit_status(state, view_data, internal_tx, format!("{error:#}")),
    }
}

fn handle_detail_key(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match (state.active_tab, key.code) {
        (TabKind::Customers, KeyCode::Esc) => {
            view_data.roster.dispatch(RosterCommand::CloseDetail);
        }
        (TabKind::Installments, KeyCode::Esc) => {
            let _ = view_data.book.dispatch(BookCommand::CloseContractDetail);
        }
        (TabKind::Customers, KeyCode::Char('a')) => {
            if let Some(id) = view_data.roster.detail.as_ref().map(|detail| detail.id) {
                view_data.prompt = Some(PromptUiState {
                    kind: PromptKind::AttachFile(id),
                    input: String::new(),
                });
            }
        }
        (TabKind::Customers, KeyCode::Char('d')) => {
            if let Some(id) = view_data.roster.detail.as_ref().map(|detail| detail.id) {
                view_data.roster.dispatch(RosterCommand::RequestDelete(id));
            }
        }
        (_, KeyCode::Char('?')) => view_data.help_visible = true,
        _ => emit_status(state, view_data, internal_tx, "esc closes the detail view"),
    }
}

fn handle_delete_confirm_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    id: CustomerId,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Char('y') | KeyCode::Enter => match runtime.delete_customer(id) {
            Ok(()) => {
                info!(customer_id = id.get(), "customer deleted");
                view_data
                    .roster
                    .dispatch(RosterCommand::CustomerDeleted(id));
                clamp_cursors(view_data);
                emit_status(state, view_data, internal_tx, "customer deleted");
            }
            Err(error) => {
                let message = format!("{error:#}");
                warn!(customer_id = id.get(), error = %message, "delete customer failed");
                view_data.roster.dispatch(RosterCommand::CancelDelete);
                emit_status(
                    state,
                    view_data,
                    internal_tx,
                    format!("delete failed: {message}"),
                );
            }
        },
        KeyCode::Char('n') | KeyCode::Esc => {
            view_data.roster.dispatch(RosterCommand::CancelDelete);
            emit_status(state, view_data, internal_tx, "delete cancelled");
        }
        _ => {}
    }
}

fn handle_prompt_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let Some(mut prompt) = view_data.prompt.take() else {
        return;
    };
    match (key.code, key.modifiers) {
        (KeyCode::Esc, _) => return,
        (KeyCode::Enter, _) => {
            if !submit_prompt(state, runtime, view_data, internal_tx, &prompt) {
                view_data.prompt = Some(prompt);
            }
            return;
        }
        (KeyCode::Backspace, _) => {
            prompt.input.pop();
        }
        (KeyCode::Char('u'), KeyModifiers::CONTROL) => prompt.input.clear(),
        (KeyCode::Char(ch), modifiers) if !modifiers.contains(KeyModifiers::CONTROL) => {
            prompt.input.push(ch);
        }
        _ => {}
    }

    if prompt.kind == PromptKind::Search {
        apply_filter(
            state,
            view_data,
            internal_tx,
            RosterCommand::SetSearch(prompt.input.clone()),
        );
    }
    view_data.prompt = Some(prompt);
}

/// Returns false when the prompt should stay open.
fn submit_prompt<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    prompt: &PromptUiState,
) -> bool {
    match prompt.kind {
        PromptKind::Search => {
            let found = view_data.roster.visible().len();
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("{found} customers found"),
            );
            true
        }
        PromptKind::OrderDateStart | PromptKind::OrderDateEnd => {
            let date = match parse_optional_date(&prompt.input) {
                Ok(date) => date,
                Err(error) => {
                    emit_status(
                        state,
                        view_data,
                        internal_tx,
                        format!("{error} -- use YYYY-MM-DD"),
                    );
                    return false;
                }
            };
            let command = if prompt.kind == PromptKind::OrderDateStart {
                RosterCommand::SetOrderDateStart(date)
            } else {
                RosterCommand::SetOrderDateEnd(date)
            };
            apply_filter(state, view_data, internal_tx, command);
            true
        }
        PromptKind::AttachFile(id) => {
            let path = prompt.input.trim();
            if path.is_empty() {
                emit_status(
                    state,
                    view_data,
                    internal_tx,
                    "enter a file path or press esc",
                );
                return false;
            }
            match runtime.attach_file(id, Path::new(path)) {
                Ok(file) => {
                    info!(customer_id = id.get(), file = %file.file_name, "file attached");
                    let name = file.file_name.clone();
                    view_data.roster.dispatch(RosterCommand::FileAttached(file));
                    emit_status(state, view_data, internal_tx, format!("attached {name}"));
                }
                Err(error) => {
                    let message = format!("{error:#}");
                    warn!(customer_id = id.get(), error = %message, "attach file failed");
                    view_data.alert = Some(ATTACH_FAILED_ALERT.to_owned());
                }
            }
            true
        }
    }
}

fn open_date_prompt(view_data: &mut ViewData, kind: PromptKind) {
    let current = match kind {
        PromptKind::OrderDateStart => view_data.roster.filter.order_date_start,
        PromptKind::OrderDateEnd => view_data.roster.filter.order_date_end,
        PromptKind::Search | PromptKind::AttachFile(_) => None,
    };
    view_data.prompt = Some(PromptUiState {
        kind,
        input: format_date(current),
    });
}

fn apply_filter(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    command: RosterCommand,
) {
    for event in view_data.roster.dispatch(command) {
        if event == RosterEvent::FilterChanged {
            debug!(
                visible = view_data.roster.visible().len(),
                "roster filter changed"
            );
        }
    }
    view_data.customer_cursor = 0;
    clamp_cursors(view_data);
    if view_data.roster.visible().is_empty() && !view_data.roster.customers().is_empty() {
        emit_status(state, view_data, internal_tx, "no customers match the filters");
    }
}

fn sales_filter_options(view_data: &ViewData) -> Vec<String> {
    view_data
        .sales_staff
        .iter()
        .cloned()
        .chain(view_data.roster.sales_options())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn export_roster<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    if view_data.roster.customers().is_empty() {
        emit_status(
            state,
            view_data,
            internal_tx,
            "no customers to export -- add a customer first",
        );
        return;
    }
    match runtime.export_csv() {
        Ok(path) => {
            info!(path = %path.display(), "roster exported");
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("exported {}", path.display()),
            );
        }
        Err(error) => {
            let message = format!("{error:#}");
            warn!(error = %message, "roster export failed");
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("export failed: {message}"),
            );
        }
    }
}

fn open_form(
    state: &mut AppState,
    view_data: &mut ViewData,
    target: FormTarget,
    values: Vec<String>,
) {
    state.dispatch(AppCommand::OpenForm(target.kind()));
    view_data.form = Some(FormUiState {
        target,
        field_index: 0,
        values,
        count: InstallmentCount::DEFAULT,
    });
}

fn close_form(state: &mut AppState, view_data: &mut ViewData) {
    view_data.form = None;
    state.dispatch(AppCommand::EnterEditMode);
}

fn handle_form_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let Some(form) = view_data.form.as_ref() else {
        state.dispatch(AppCommand::EnterEditMode);
        return;
    };
    let on_choice = form.is_choice(form.field_index);

    match (key.code, key.modifiers) {
        (KeyCode::Esc, _) => cancel_form(state, view_data, internal_tx),
        (KeyCode::Enter, _) | (KeyCode::Char('s'), KeyModifiers::CONTROL) => {
            submit_form(state, runtime, view_data, internal_tx);
        }
        (KeyCode::Tab, _) | (KeyCode::Down, _) => {
            move_form_field(state, view_data, internal_tx, 1);
        }
        (KeyCode::BackTab, _) | (KeyCode::Up, _) => {
            move_form_field(state, view_data, internal_tx, -1);
        }
        (KeyCode::Left, _) if on_choice => cycle_form_choice(view_data, -1),
        (KeyCode::Right, _) | (KeyCode::Char(' '), _) if on_choice => {
            cycle_form_choice(view_data, 1);
        }
        (KeyCode::Char('t'), KeyModifiers::CONTROL) => {
            if let Some(FormTarget::EditRecord(id)) = view_data.form.as_ref().map(|form| form.target)
            {
                if let Some(index) = view_data
                    .book
                    .records()
                    .iter()
                    .position(|record| record.id == id)
                {
                    view_data.record_cursor = index;
                }
                toggle_selected_payment(state, view_data, internal_tx);
            }
        }
        (KeyCode::Char('n'), KeyModifiers::CONTROL) => {
            let periods = view_data
                .form
                .as_ref()
                .map_or(1, |form| form.count.periods());
            view_data.payment_cursor = (view_data.payment_cursor + 1) % periods.max(1);
        }
        (KeyCode::Char('u'), KeyModifiers::CONTROL) => {
            if !on_choice
                && let Some(value) = view_data
                    .form
                    .as_mut()
                    .and_then(FormUiState::current_value_mut)
            {
                value.clear();
            }
        }
        (KeyCode::Backspace, _) if !on_choice => {
            if let Some(value) = view_data
                .form
                .as_mut()
                .and_then(FormUiState::current_value_mut)
            {
                value.pop();
            }
        }
        (KeyCode::Char(ch), modifiers) if !modifiers.contains(KeyModifiers::CONTROL) => {
            if on_choice {
                emit_status(
                    state,
                    view_data,
                    internal_tx,
                    "use space or left/right to choose",
                );
            } else if let Some(value) = view_data
                .form
                .as_mut()
                .and_then(FormUiState::current_value_mut)
            {
                value.push(ch);
            }
        }
        _ => {}
    }
}

fn move_form_field(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    delta: isize,
) {
    let Some(form) = view_data.form.as_mut() else {
        return;
    };
    let committed = match form.target.kind() {
        FormKind::InstallmentRecord => commit_record_field(&mut view_data.book, form),
        FormKind::Customer => Ok(None),
    };
    let note = match committed {
        Ok(note) => note,
        Err(error) => {
            emit_status(state, view_data, internal_tx, format!("{error:#}"));
            return;
        }
    };

    let len = form.field_count() as isize;
    form.field_index = (form.field_index as isize + delta).rem_euclid(len) as usize;
    let status = note.unwrap_or_else(|| {
        format!(
            "field {} ({}/{})",
            form.field_label(form.field_index),
            form.field_index + 1,
            len
        )
    });
    emit_status(state, view_data, internal_tx, status);
}

fn cycle_form_choice(view_data: &mut ViewData, delta: isize) {
    let sales_choices = std::iter::once(String::new())
        .chain(view_data.sales_staff.iter().cloned())
        .collect::<Vec<_>>();
    let Some(form) = view_data.form.as_mut() else {
        return;
    };
    let options: Vec<String> = match form.target.kind() {
        FormKind::Customer => match CustomerField::ALL.get(form.field_index) {
            Some(CustomerField::Gender) => Gender::ALL
                .iter()
                .map(|gender| gender.as_str().to_owned())
                .collect(),
            Some(CustomerField::CustomerType) => CustomerType::ALL
                .iter()
                .map(|kind| kind.as_str().to_owned())
                .collect(),
            Some(CustomerField::AssignedSales) => sales_choices,
            _ => return,
        },
        FormKind::InstallmentRecord => vec![FLAG_NO.to_owned(), FLAG_YES.to_owned()],
    };
    let Some(value) = form.current_value_mut() else {
        return;
    };
    let current = options
        .iter()
        .position(|option| option.as_str() == value.as_str())
        .unwrap_or(0) as isize;
    let next = (current + delta).rem_euclid(options.len().max(1) as isize) as usize;
    if let Some(option) = options.get(next) {
        *value = option.clone();
    }
}

// Record forms validate each field as the cursor leaves it. Edits to an
// existing record land in the book's draft; a new record only keeps the text.
fn commit_record_field(
    book: &mut InstallmentBook,
    form: &mut FormUiState,
) -> Result<Option<String>> {
    let Some(field) = RecordField::ALL.get(form.field_index).copied() else {
        return Ok(None);
    };
    let value = form
        .values
        .get(form.field_index)
        .cloned()
        .unwrap_or_default();

    if field == RecordField::InstallmentCount {
        let count = parse_installment_count(&value).map_err(|error| anyhow!("{error}"))?;
        if count == form.count {
            return Ok(None);
        }
        form.count = count;
        match form.target {
            FormTarget::EditRecord(_) => {
                book.dispatch(BookCommand::EditField(RecordFieldEdit::InstallmentCount(
                    count,
                )))?;
            }
            _ => {
                if let Some(monthly) = form
                    .values
                    .get_mut(RecordField::MonthlyPaymentDate as usize)
                {
                    monthly.clear();
                }
            }
        }
        return Ok(Some(format!(
            "payment checklist reset to {} unpaid periods",
            count.get()
        )));
    }

    let edit = record_field_edit(field, &value)?;
    if let FormTarget::EditRecord(_) = form.target {
        book.dispatch(BookCommand::EditField(edit))?;
    }
    Ok(None)
}

fn record_field_edit(field: RecordField, value: &str) -> Result<RecordFieldEdit> {
    let date = |value: &str| {
        parse_optional_date(value)
            .map_err(|error| anyhow!("{}: {error} -- use YYYY-MM-DD", field.label()))
    };
    let text = value.trim().to_owned();
    let flag = value == FLAG_YES;
    Ok(match field {
        RecordField::OrderDate => RecordFieldEdit::OrderDate(date(value)?),
        RecordField::Department => RecordFieldEdit::Department(text),
        RecordField::SalesPerson => RecordFieldEdit::SalesPerson(text),
        RecordField::ContractName => RecordFieldEdit::ContractName(text),
        RecordField::Overdue => RecordFieldEdit::Overdue(flag),
        RecordField::InGroup => RecordFieldEdit::InGroup(flag),
        RecordField::ESignContract => RecordFieldEdit::ESignContract(flag),
        RecordField::FirstPaymentManual => RecordFieldEdit::FirstPaymentManual(flag),
        RecordField::SigningMethod => RecordFieldEdit::SigningMethod(text),
        RecordField::Amount => RecordFieldEdit::AmountCents(
            parse_optional_cents(value).map_err(|error| anyhow!("{}: {error}", field.label()))?,
        ),
        RecordField::InstallmentCount => RecordFieldEdit::InstallmentCount(
            parse_installment_count(value).map_err(|error| anyhow!("{error}"))?,
        ),
        RecordField::RepaymentDate => RecordFieldEdit::RepaymentDate(date(value)?),
        RecordField::MonthlyPaymentDate => RecordFieldEdit::MonthlyPaymentDate(text),
        RecordField::ContractPeriod => RecordFieldEdit::ContractPeriod(text),
        RecordField::Notes => RecordFieldEdit::Notes(text),
    })
}

fn cancel_form(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(target) = view_data.form.as_ref().map(|form| form.target) else {
        return;
    };
    let status = match target {
        FormTarget::EditRecord(_) => {
            let _ = view_data.book.dispatch(BookCommand::Cancel);
            "edit cancelled, changes discarded"
        }
        FormTarget::EditCustomer(_) => {
            view_data.roster.dispatch(RosterCommand::FinishEdit);
            "edit cancelled"
        }
        FormTarget::NewCustomer | FormTarget::NewRecord => "add cancelled",
    };
    close_form(state, view_data);
    clamp_cursors(view_data);
    emit_status(state, view_data, internal_tx, status);
}

fn submit_form<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(target) = view_data.form.as_ref().map(|form| form.target) else {
        return;
    };
    match target {
        FormTarget::NewCustomer | FormTarget::EditCustomer(_) => {
            submit_customer_form(state, runtime, view_data, internal_tx, target);
        }
        FormTarget::NewRecord | FormTarget::EditRecord(_) => {
            submit_record_form(state, view_data, internal_tx, target);
        }
    }
}

fn submit_customer_form<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    target: FormTarget,
) {
    let Some(form) = view_data.form.as_ref() else {
        return;
    };
    let input = match customer_input_from_values(&form.values).and_then(|input| {
        input.validate()?;
        Ok(input)
    }) {
        Ok(input) => input,
        Err(error) => {
            view_data.alert = Some(format!("{error:#}"));
            return;
        }
    };

    let outcome = match target {
        FormTarget::EditCustomer(id) => runtime
            .update_customer(id, &input)
            .map(|()| (id, "customer updated")),
        _ => runtime
            .add_customer(&input)
            .map(|id| (id, "customer added")),
    };
    match outcome {
        Ok((id, status)) => {
            info!(customer_id = id.get(), "{status}");
            if matches!(target, FormTarget::EditCustomer(_)) {
                view_data.roster.dispatch(RosterCommand::FinishEdit);
            }
            close_form(state, view_data);
            reload_roster(runtime, view_data);
            emit_status(state, view_data, internal_tx, status);
        }
        Err(error) => {
            let message = format!("{error:#}");
            warn!(error = %message, "save customer failed");
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("save failed: {message}"),
            );
        }
    }
}

fn submit_record_form(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    target: FormTarget,
) {
    let Some(form) = view_data.form.as_mut() else {
        return;
    };
    if let Err(error) = commit_record_field(&mut view_data.book, form) {
        emit_status(state, view_data, internal_tx, format!("{error:#}"));
        return;
    }
    let now = OffsetDateTime::now_utc();

    let result = match target {
        FormTarget::EditRecord(_) => view_data.book.dispatch(BookCommand::Save(now)),
        _ => installment_input_from_values(&form.values, form.count)
            .and_then(|input| view_data.book.dispatch(BookCommand::Add(input, now))),
    };
    match result {
        Ok(events) => {
            let mut status = "record saved";
            for event in events {
                if let BookEvent::Added(id) = event {
                    status = "installment record added";
                    if let Some(index) = view_data
                        .book
                        .records()
                        .iter()
                        .position(|record| record.id == id)
                    {
                        view_data.record_cursor = index;
                    }
                }
            }
            close_form(state, view_data);
            clamp_cursors(view_data);
            emit_status(state, view_data, internal_tx, status);
        }
        Err(error) => {
            view_data.alert = Some(format!("{error:#}"));
        }
    }
}

fn form_value(values: &[String], index: usize) -> &str {
    values.get(index).map_or("", String::as_str)
}

fn customer_form_values(input: &CustomerFormInput) -> Vec<String> {
    CustomerField::ALL
        .iter()
        .map(|field| match field {
            CustomerField::Name => input.name.clone(),
            CustomerField::Phone => input.phone.clone(),
            CustomerField::Wechat => input.wechat.clone(),
            CustomerField::Address => input.address.clone(),
            CustomerField::Occupation => input.occupation.clone(),
            CustomerField::ContractName => input.contract_name.clone(),
            CustomerField::Gender => input.gender.as_str().to_owned(),
            CustomerField::CustomerType => input.customer_type.as_str().to_owned(),
            CustomerField::AssignedSales => input.assigned_sales.clone(),
            CustomerField::Tags => format_tags(&input.tags),
            CustomerField::OrderDate => format_date(input.order_date),
            CustomerField::Notes => input.notes.clone(),
        })
        .collect()
}

fn customer_input_from_values(values: &[String]) -> Result<CustomerFormInput> {
    let value = |field: CustomerField| form_value(values, field as usize);
    let text = |field: CustomerField| value(field).trim().to_owned();
    Ok(CustomerFormInput {
        name: text(CustomerField::Name),
        phone: text(CustomerField::Phone),
        wechat: text(CustomerField::Wechat),
        address: text(CustomerField::Address),
        occupation: text(CustomerField::Occupation),
        notes: text(CustomerField::Notes),
        contract_name: text(CustomerField::ContractName),
        gender: Gender::parse(value(CustomerField::Gender))
            .ok_or_else(|| anyhow!("unknown gender -- pick male or female"))?,
        customer_type: CustomerType::parse(value(CustomerField::CustomerType))
            .ok_or_else(|| anyhow!("unknown customer type -- pick retail or installment"))?,
        assigned_sales: text(CustomerField::AssignedSales),
        tags: parse_tags(value(CustomerField::Tags)),
        order_date: parse_optional_date(value(CustomerField::OrderDate))
            .map_err(|error| anyhow!("order date: {error} -- use YYYY-MM-DD"))?,
    })
}

fn form_input_from_record(record: &InstallmentRecord) -> InstallmentFormInput {
    let mut input =
        InstallmentFormInput::new(record.contract_name.as_str(), record.sales_person.as_str());
    input.order_date = record.order_date;
    input.department = record.department.clone();
    input.is_overdue = record.is_overdue;
    input.is_in_group = record.is_in_group;
    input.has_e_sign_contract = record.has_e_sign_contract;
    input.is_first_payment_manual = record.is_first_payment_manual;
    input.signing_method = record.signing_method.clone();
    input.notes = record.notes.clone();
    input.installment_amount_cents = record.installment_amount_cents;
    input.repayment_date = record.repayment_date;
    input.contract_period = record.contract_period.clone();
    input.set_installment_count(record.installment_count());
    input.monthly_payment_date = record.monthly_payment_date.clone();
    input
}

fn flag_value(flag: bool) -> String {
    (if flag { FLAG_YES } else { FLAG_NO }).to_owned()
}

fn installment_form_values(input: &InstallmentFormInput) -> Vec<String> {
    RecordField::ALL
        .iter()
        .map(|field| match field {
            RecordField::OrderDate => format_date(input.order_date),
            RecordField::Department => input.department.clone(),
            RecordField::SalesPerson => input.sales_person.clone(),
            RecordField::ContractName => input.contract_name.clone(),
            RecordField::Overdue => flag_value(input.is_overdue),
            RecordField::InGroup => flag_value(input.is_in_group),
            RecordField::ESignContract => flag_value(input.has_e_sign_contract),
            RecordField::FirstPaymentManual => flag_value(input.is_first_payment_manual),
            RecordField::SigningMethod => input.signing_method.clone(),
            RecordField::Amount => format_cents_input(input.installment_amount_cents),
            RecordField::InstallmentCount => input.installment_count().get().to_string(),
            RecordField::RepaymentDate => format_date(input.repayment_date),
            RecordField::MonthlyPaymentDate => input.monthly_payment_date.clone(),
            RecordField::ContractPeriod => input.contract_period.clone(),
            RecordField::Notes => input.notes.clone(),
        })
        .collect()
}

fn installment_input_from_values(
    values: &[String],
    count: InstallmentCount,
) -> Result<InstallmentFormInput> {
    let mut input = InstallmentFormInput::default();
    for field in RecordField::ALL {
        if field == RecordField::InstallmentCount {
            continue;
        }
        let value = form_value(values, field as usize);
        match record_field_edit(field, value)? {
            RecordFieldEdit::OrderDate(date) => input.order_date = date,
            RecordFieldEdit::Department(text) => input.department = text,
            RecordFieldEdit::SalesPerson(text) => input.sales_person = text,
            RecordFieldEdit::ContractName(text) => input.contract_name = text,
            RecordFieldEdit::Overdue(flag) => input.is_overdue = flag,
            RecordFieldEdit::InGroup(flag) => input.is_in_group = flag,
            RecordFieldEdit::ESignContract(flag) => input.has_e_sign_contract = flag,
            RecordFieldEdit::FirstPaymentManual(flag) => input.is_first_payment_manual = flag,
            RecordFieldEdit::SigningMethod(text) => input.signing_method = text,
            RecordFieldEdit::Notes(text) => input.notes = text,
            RecordFieldEdit::AmountCents(cents) => input.installment_amount_cents = cents,
            RecordFieldEdit::InstallmentCount(_) => {}
            RecordFieldEdit::RepaymentDate(date) => input.repayment_date = date,
            RecordFieldEdit::MonthlyPaymentDate(text) => input.monthly_payment_date = text,
            RecordFieldEdit::ContractPeriod(text) => input.contract_period = text,
        }
    }
    let monthly = std::mem::take(&mut input.monthly_payment_date);
    input.set_installment_count(count);
    input.monthly_payment_date = monthly;
    Ok(input)
}

fn render(frame: &mut ratatui::Frame<'_>, state: &AppState, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(frame.area());

    let selected = TabKind::ALL
        .iter()
        .position(|tab| *tab == state.active_tab)
        .unwrap_or(0);
    let tab_titles = TabKind::ALL
        .iter()
        .map(|tab| tab_title(*tab, view_data))
        .collect::<Vec<String>>();
    let tabs = Tabs::new(tab_titles)
        .block(Block::default().title("tally").borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .select(selected);
    frame.render_widget(tabs, layout[0]);

    let (banner_text, banner_style) = match state.active_tab {
        TabKind::Customers => {
            let style = if view_data.roster.load_error.is_some() {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            (
                roster_banner_text(view_data, OffsetDateTime::now_utc()),
                style,
            )
        }
        TabKind::Installments => (book_banner_text(view_data), Style::default()),
    };
    let banner = Paragraph::new(banner_text)
        .style(banner_style)
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(banner, layout[1]);

    match state.active_tab {
        TabKind::Customers => render_customer_table(frame, layout[2], view_data),
        TabKind::Installments => render_record_table(frame, layout[2], view_data),
    }

    let status_widget = Paragraph::new(status_text(state, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status_widget, layout[3]);

    if let Some(customer) = detail_overlay(state, view_data) {
        let area = centered_rect(70, 70, frame.area());
        frame.render_widget(Clear, area);
        let detail = Paragraph::new(detail_overlay_text(customer, state.active_tab))
            .block(Block::default().title(customer.name.as_str()).borders(Borders::ALL));
        frame.render_widget(detail, area);
    }

    if let Some(form) = &view_data.form {
        let area = centered_rect(70, 80, frame.area());
        frame.render_widget(Clear, area);
        let body = Paragraph::new(form_overlay_text(form, view_data)).block(
            Block::default()
                .title(form.target.title())
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Cyan)),
        );
        frame.render_widget(body, area);
    }

    if let Some(prompt) = &view_data.prompt {
        let area = centered_rect(60, 16, frame.area());
        frame.render_widget(Clear, area);
        let body = Paragraph::new(format!("{}_", prompt.input))
            .block(Block::default().title(prompt.kind.title()).borders(Borders::ALL));
        frame.render_widget(body, area);
    }

    if let Some(id) = view_data.roster.pending_delete {
        let area = centered_rect(50, 20, frame.area());
        frame.render_widget(Clear, area);
        let body = Paragraph::new(delete_confirm_text(view_data, id)).block(
            Block::default()
                .title("delete customer")
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Red)),
        );
        frame.render_widget(body, area);
    }

    if view_data.help_visible {
        let area = centered_rect(80, 60, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }

    if let Some(alert) = &view_data.alert {
        let area = centered_rect(50, 20, frame.area());
        frame.render_widget(Clear, area);
        let body = Paragraph::new(format!("{alert}\n\nenter to dismiss")).block(
            Block::default()
                .title("alert")
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Red)),
        );
        frame.render_widget(body, area);
    }
}

fn tab_title(tab: TabKind, view_data: &ViewData) -> String {
    let count = match tab {
        TabKind::Customers => view_data.roster.customers().len(),
        TabKind::Installments => view_data.book.records().len(),
    };
    format!("{} ({count})", tab.label())
}

fn roster_banner_text(view_data: &ViewData, now: OffsetDateTime) -> String {
    let stats = view_data.roster.stats(now);
    let totals = format!(
        "total {} | new this month {} | retail {} | installment {}",
        stats.total, stats.new_this_month, stats.retail, stats.installment
    );
    if let Some(error) = &view_data.roster.load_error {
        return format!("{totals}\nload failed: {error}");
    }

    let filter = &view_data.roster.filter;
    let mut chips = filter.summary();
    if !filter.search.is_empty() {
        chips.push(format!("search: \"{}\"", filter.search));
    }
    if chips.is_empty() {
        return format!("{totals}\n{} customers found", stats.filtered);
    }
    format!(
        "{totals}\n{} customers found | {}",
        stats.filtered,
        chips.join(" | ")
    )
}

fn book_banner_text(view_data: &ViewData) -> String {
    let stats = view_data.book.stats();
    let totals = format!(
        "records {} | overdue {} | e-signed {} | in group {}",
        stats.total, stats.overdue, stats.e_signed, stats.in_group
    );
    if let Some(notice) = &view_data.book.notice {
        return format!("{totals}\n{notice} (esc to dismiss)");
    }
    match view_data.book.session() {
        Some(session) => format!(
            "{totals}\nediting {} (unsaved)",
            session.draft.contract_name
        ),
        None => totals,
    }
}

fn render_customer_table(frame: &mut ratatui::Frame<'_>, area: Rect, view_data: &ViewData) {
    const HEADERS: [&str; 8] = [
        "name",
        "phone",
        "gender",
        "type",
        "sales",
        "tags",
        "ordered",
        "created",
    ];
    let header = table_header(&HEADERS);
    let rows = view_data
        .roster
        .visible()
        .into_iter()
        .enumerate()
        .map(|(index, customer)| {
            let cells = [
                customer.name.clone(),
                customer.phone.clone(),
                customer.gender.localized().to_owned(),
                customer.customer_type.as_str().to_owned(),
                customer.sales.resolved().unwrap_or_default().to_owned(),
                format_tags(&customer.tags),
                format_date(customer.order_date),
                format_date(Some(customer.created_at.date())),
            ];
            Row::new(cells.map(Cell::from)).style(row_style(index == view_data.customer_cursor))
        })
        .collect::<Vec<_>>();

    let table = Table::new(rows, vec![Constraint::Min(8); HEADERS.len()])
        .header(header)
        .column_spacing(1)
        .block(
            Block::default()
                .title(TabKind::Customers.label())
                .borders(Borders::ALL),
        );
    frame.render_widget(table, area);
}

fn render_record_table(frame: &mut ratatui::Frame<'_>, area: Rect, view_data: &ViewData) {
    const HEADERS: [&str; 10] = [
        "contract",
        "sales",
        "department",
        "amount",
        "paid",
        "payments",
        "overdue",
        "e-sign",
        "group",
        "monthly",
    ];
    let header = table_header(&HEADERS);
    let rows = view_data
        .book
        .records()
        .iter()
        .enumerate()
        .map(|(index, committed)| {
            let record = view_data
                .book
                .displayed(committed.id)
                .unwrap_or(committed);
            let selected = index == view_data.record_cursor;
            let mut contract = record.contract_name.clone();
            if view_data.book.is_editing(record.id) {
                contract.push_str(" *");
            }
            let cursor = selected.then_some(view_data.payment_cursor);
            let cells = [
                contract,
                record.sales_person.clone(),
                record.department.clone(),
                format_cents(record.installment_amount_cents),
                payment_progress(record),
                payment_marks(record, cursor),
                flag_value(record.is_overdue),
                flag_value(record.has_e_sign_contract),
                flag_value(record.is_in_group),
                record.monthly_payment_date.clone(),
            ];
            Row::new(cells.map(Cell::from)).style(row_style(selected))
        })
        .collect::<Vec<_>>();

    let table = Table::new(rows, vec![Constraint::Min(6); HEADERS.len()])
        .header(header)
        .column_spacing(1)
        .block(
            Block::default()
                .title(TabKind::Installments.label())
                .borders(Borders::ALL),
        );
    frame.render_widget(table, area);
}

fn table_header(labels: &[&'static str]) -> Row<'static> {
    Row::new(labels.iter().map(|label| {
        Cell::from(*label).style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
    }))
}

fn row_style(selected: bool) -> Style {
    if selected {
        Style::default().bg(Color::DarkGray)
    } else {
        Style::default()
    }
}

/// One mark per period; the period under the cursor is bracketed.
fn payment_marks(record: &InstallmentRecord, cursor: Option<usize>) -> String {
    record
        .payment_status()
        .as_slice()
        .iter()
        .enumerate()
        .map(|(index, paid)| {
            let mark = if *paid { PAID_MARK } else { UNPAID_MARK };
            if cursor == Some(index) {
                format!("[{mark}]")
            } else {
                mark.to_string()
            }
        })
        .collect()
}

fn detail_overlay_text(customer: &Customer, tab: TabKind) -> String {
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_owned());
    let mut lines = vec![
        format!("phone: {}", customer.phone),
        format!("gender: {}", customer.gender.localized()),
        format!("type: {}", customer.customer_type.label()),
        format!("wechat: {}", optional(&customer.wechat)),
        format!("address: {}", optional(&customer.address)),
        format!("occupation: {}", optional(&customer.occupation)),
        format!("contract name: {}", optional(&customer.contract_name)),
        format!(
            "salesperson: {}",
            customer.sales.resolved().unwrap_or(UNASSIGNED_LABEL)
        ),
        format!("tags: {}", format_tags(&customer.tags)),
        format!("order date: {}", format_date(customer.order_date)),
        format!("created: {}", format_date(Some(customer.created_at.date()))),
        format!("notes: {}", optional(&customer.notes)),
        String::new(),
        format!("files ({}):", customer.files.len()),
    ];
    lines.extend(customer.files.iter().map(|file| {
        format!(
            "  {} ({}, {} bytes)",
            file.file_name, file.mime_type, file.size_bytes
        )
    }));
    lines.push(format!("orders ({}):", customer.orders.len()));
    lines.extend(customer.orders.iter().map(|order| {
        format!(
            "  {} {} {}",
            format_date(order.ordered_on),
            order.title,
            format_cents(order.amount_cents)
        )
    }));
    lines.push(String::new());
    lines.push(match tab {
        TabKind::Customers => "a attach file | d delete | esc close".to_owned(),
        TabKind::Installments => "esc close".to_owned(),
    });
    lines.join("\n")
}

fn form_overlay_text(form: &FormUiState, view_data: &ViewData) -> String {
    let mut lines = (0..form.field_count())
        .map(|index| {
            let marker = if index == form.field_index { ">" } else { " " };
            let value = form_value(&form.values, index);
            let shown = if form.is_choice(index) {
                let label = if value.is_empty() {
                    UNASSIGNED_LABEL
                } else {
                    value
                };
                format!("< {label} >")
            } else if index == form.field_index {
                format!("{value}_")
            } else {
                value.to_owned()
            };
            format!("{marker} {}: {shown}", form.field_label(index))
        })
        .collect::<Vec<_>>();

    if form.target.kind() == FormKind::InstallmentRecord {
        let marks = match form.target {
            FormTarget::EditRecord(id) => view_data
                .book
                .displayed(id)
                .map(|record| {
                    format!(
                        "{} ({})",
                        payment_marks(record, Some(view_data.payment_cursor)),
                        payment_progress(record)
                    )
                })
                .unwrap_or_default(),
            _ => format!(
                "{} (0/{})",
                UNPAID_MARK.to_string().repeat(form.count.periods()),
                form.count.get()
            ),
        };
        lines.push(String::new());
        lines.push(format!("payments: {marks}"));
    }

    lines.push(String::new());
    lines.push(form_hint(form.target).to_owned());
    lines.join("\n")
}

fn form_hint(target: FormTarget) -> &'static str {
    match target {
        FormTarget::EditRecord(_) => {
            "tab/shift+tab field | space choose | ctrl+n period | ctrl+t paid | enter save | esc discard"
        }
        _ => "tab/shift+tab field | space choose | ctrl+u clear | enter save | esc cancel",
    }
}

fn delete_confirm_text(view_data: &ViewData, id: CustomerId) -> String {
    let name = view_data
        .roster
        .customer(id)
        .map_or("this customer", |customer| customer.name.as_str());
    format!("delete {name} with all files and orders?\n\ny confirm | n cancel")
}

fn status_text(state: &AppState, view_data: &ViewData) -> String {
    let mode = match state.mode {
        AppMode::Nav => "NAV",
        AppMode::Edit => "EDIT",
        AppMode::Form(_) => "FORM",
    };
    let hints = match (state.mode, state.active_tab) {
        (AppMode::Form(_), _) => view_data
            .form
            .as_ref()
            .map(|form| {
                format!(
                    "field {} ({}/{})",
                    form.field_label(form.field_index),
                    form.field_index + 1,
                    form.field_count()
                )
            })
            .unwrap_or_default(),
        (AppMode::Edit, TabKind::Customers) => "a add | e edit | d delete | esc nav".to_owned(),
        (AppMode::Edit, TabKind::Installments) => "a add | e edit | esc nav".to_owned(),
        (AppMode::Nav, TabKind::Customers) => {
            "j/k | enter detail | / search | t/y/s filter | [/] dates | c clear | i edit | E export | ? help | ctrl+q"
                .to_owned()
        }
        (AppMode::Nav, TabKind::Installments) => {
            "j/k | h/l period | space paid | enter contract | i edit | ? help | ctrl+q".to_owned()
        }
    };
    match &state.status_line {
        Some(status) => format!("{mode} | {status} | {hints}"),
        None => format!("{mode} | {hints}"),
    }
}

fn help_overlay_text() -> &'static str {
    "global: ctrl+q quit | tab/f next tab | shift+tab/b prev tab | E export csv | R reload | ? help\n\
customers: j/k g/G move | enter detail | / search | t tag | y type | s salesperson\n\
customers: [ ordered from | ] ordered until | x clear dates | c clear filters\n\
installments: j/k move | h/l period | space toggle paid | enter contract holder | esc dismiss notice\n\
edit: i enter | a add | e edit | d delete (customers) | esc nav\n\
detail: a attach file | d delete | esc close\n\
form: tab/shift+tab field | space or left/right choose | ctrl+u clear | enter or ctrl+s save | esc cancel\n\
record edit form: ctrl+n next period | ctrl+t toggle paid on draft"
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
