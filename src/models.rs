use chrono::{
    DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Rounds to cents and always keeps two decimal places, `7` becomes `7.00`.
pub fn money(value: Decimal) -> Decimal {
    let mut value = value.round_dp(2);
    value.rescale(2);
    value
}

#[derive(Debug, PartialEq, Clone)]
pub struct User {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Dish {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category_id: u64,
    pub is_active: bool,
    pub has_image: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Image {
    pub data: Vec<u8>,
    pub mimetype: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Customer {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_owned()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Address {
    pub id: u64,
    pub customer_id: u64,
    pub street: String,
    pub reference: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OrderType {
    Table,
    Delivery,
    ToGo,
}

impl OrderType {
    pub const ALL: [OrderType; 3] = [OrderType::Table, OrderType::Delivery, OrderType::ToGo];

    pub fn code(&self) -> &'static str {
        match self {
            OrderType::Table => "T",
            OrderType::Delivery => "D",
            OrderType::ToGo => "G",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OrderStatus {
    InProgress,
    InKitchen,
    Packing,
    Handed,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::InProgress,
        OrderStatus::InKitchen,
        OrderStatus::Packing,
        OrderStatus::Handed,
        OrderStatus::InTransit,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            OrderStatus::InProgress => "IP",
            OrderStatus::InKitchen => "IK",
            OrderStatus::Packing => "PA",
            OrderStatus::Handed => "HA",
            OrderStatus::InTransit => "IT",
            OrderStatus::Delivered => "DO",
            OrderStatus::Cancelled => "CA",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OrderStatus::InProgress => "In Progress",
            OrderStatus::InKitchen => "In Kitchen",
            OrderStatus::Packing => "Packing",
            OrderStatus::Handed => "Handed",
            OrderStatus::InTransit => "In Transit",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Reaching one of these states books the order total as income.
    pub fn books_income(&self) -> bool {
        matches!(self, OrderStatus::Handed | OrderStatus::Delivered)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Order {
    pub id: u64,
    pub order_number: String,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub created_by: Option<u64>,
    pub customer_id: Option<u64>,
    pub address_id: Option<u64>,
    pub document_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub in_kitchen_at: Option<DateTime<Utc>>,
    pub packing_at: Option<DateTime<Utc>>,
    pub handed_at: Option<DateTime<Utc>>,
    pub in_transit_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Format of the daily sequence number, `20240131-4` for the fourth order of the day.
    pub fn format_order_number(day: NaiveDate, sequence: u64) -> String {
        format!("{}-{}", day.format("%Y%m%d"), sequence)
    }

    /// Moves the order into `status`. The timestamp of a stage is only recorded
    /// the first time the order enters it.
    pub fn apply_status(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        if self.status == status {
            return;
        }
        self.status = status;

        let slot = match status {
            OrderStatus::InProgress => return,
            OrderStatus::InKitchen => &mut self.in_kitchen_at,
            OrderStatus::Packing => &mut self.packing_at,
            OrderStatus::Handed => &mut self.handed_at,
            OrderStatus::InTransit => &mut self.in_transit_at,
            OrderStatus::Delivered => &mut self.delivered_at,
            OrderStatus::Cancelled => &mut self.cancelled_at,
        };
        if slot.is_none() {
            *slot = Some(now);
        }
    }

    pub fn stage_started_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            OrderStatus::InProgress => Some(self.created_at),
            OrderStatus::InKitchen => self.in_kitchen_at,
            OrderStatus::Packing => self.packing_at,
            OrderStatus::Handed => self.handed_at,
            OrderStatus::InTransit => self.in_transit_at,
            OrderStatus::Delivered => self.delivered_at,
            OrderStatus::Cancelled => self.cancelled_at,
        }
    }

    /// How long the order has been in its current stage.
    pub fn current_stage_duration(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.stage_started_at().map(|start| now - start)
    }

    /// Prefix used in the description of the income transaction of this order.
    pub fn income_description_prefix(&self) -> String {
        format!("Order {}", self.order_number)
    }

    pub fn income_description(&self) -> String {
        format!(
            "{} - {}",
            self.income_description_prefix(),
            self.status.display_name()
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OrderAction {
    Added,
    Updated,
    Removed,
}

impl OrderAction {
    pub fn code(&self) -> &'static str {
        match self {
            OrderAction::Added => "added",
            OrderAction::Updated => "updated",
            OrderAction::Removed => "removed",
        }
    }
}

/// Change of an order pushed to websocket subscribers.
#[derive(Debug, PartialEq, Clone)]
pub struct OrderUpdate {
    pub order_id: u64,
    pub status: OrderStatus,
    pub action: OrderAction,
}

/// Start and end of a calendar day in the server's time zone.
pub fn local_day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let to_utc = |naive: NaiveDateTime| {
        naive
            .and_local_timezone(Local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    };
    let start = day.and_time(NaiveTime::default());
    (to_utc(start), to_utc(start + Duration::days(1)))
}

pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, PartialEq, Clone)]
pub struct OrderItem {
    pub id: u64,
    pub order_id: u64,
    pub dish_id: u64,
    pub category_id: u64,
    /// Total of the line, already multiplied by the quantity.
    pub price: Decimal,
    pub quantity: u32,
    pub observation: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order item joined with the names of its dish and category.
#[derive(Debug, PartialEq, Clone)]
pub struct OrderItemDetail {
    pub item: OrderItem,
    pub dish_name: String,
    pub category_name: String,
}

impl OrderItemDetail {
    /// Price of a single unit of the line.
    pub fn unit_price(&self) -> Decimal {
        if self.item.quantity == 0 {
            return self.item.price;
        }
        money(self.item.price / Decimal::from(self.item.quantity))
    }
}

pub fn order_total(items: &[OrderItem]) -> Decimal {
    money(items.iter().map(|i| i.price).sum())
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AccountType {
    Cash,
    Bank,
    DigitalWallet,
}

impl AccountType {
    pub const ALL: [AccountType; 3] = [
        AccountType::Cash,
        AccountType::Bank,
        AccountType::DigitalWallet,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            AccountType::Cash => "CH",
            AccountType::Bank => "BA",
            AccountType::DigitalWallet => "DW",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Account {
    pub id: u64,
    pub name: String,
    pub balance: Decimal,
    pub account_type: AccountType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn code(&self) -> &'static str {
        match self {
            TransactionType::Income => "I",
            TransactionType::Expense => "E",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(TransactionType::Income),
            "E" => Some(TransactionType::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Transaction {
    pub id: u64,
    pub transaction_type: TransactionType,
    pub account_id: u64,
    pub amount: Decimal,
    pub category_id: Option<u64>,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Effect of this transaction on the balance of its account.
    pub fn balance_effect(&self) -> Decimal {
        match self.transaction_type {
            TransactionType::Income => self.amount,
            TransactionType::Expense => -self.amount,
        }
    }
}

/// Date window of the transaction list.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DateFilter {
    Today,
    Last7Days,
    ThisWeek,
    ThisMonth,
    Custom(NaiveDate, NaiveDate),
    All,
}

impl DateFilter {
    /// Inclusive lower and upper bound of the window relative to `today`.
    pub fn bounds(&self, today: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
        match *self {
            DateFilter::Today => (Some(today), Some(today)),
            DateFilter::Last7Days => (Some(today - Duration::days(7)), None),
            DateFilter::ThisWeek => (
                Some(today - Duration::days(today.weekday().num_days_from_monday() as i64)),
                None,
            ),
            DateFilter::ThisMonth => (today.with_day(1), None),
            DateFilter::Custom(start, end) => (Some(start), Some(end)),
            DateFilter::All => (None, None),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransactionOrder {
    Date,
    Amount,
}

#[derive(Debug, PartialEq, Clone)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub date: DateFilter,
    pub order: TransactionOrder,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DocumentStatus {
    Pending,
    Processing,
    Accepted,
    Rejected,
    Exception,
    Failed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 6] = [
        DocumentStatus::Pending,
        DocumentStatus::Processing,
        DocumentStatus::Accepted,
        DocumentStatus::Rejected,
        DocumentStatus::Exception,
        DocumentStatus::Failed,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Accepted => "accepted",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Exception => "exception",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Maps the status reported by the aggregator onto the local status.
    pub fn from_sunat_status(status: &str) -> Self {
        match status {
            "ACEPTADO" => DocumentStatus::Accepted,
            "RECHAZADO" => DocumentStatus::Rejected,
            "EXCEPCION" => DocumentStatus::Exception,
            "PENDIENTE" => DocumentStatus::Pending,
            _ => DocumentStatus::Processing,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DocumentType {
    Invoice,
    Ticket,
}

impl DocumentType {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "01",
            DocumentType::Ticket => "03",
        }
    }

    pub fn serie(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "F001",
            DocumentType::Ticket => "B001",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(DocumentType::Invoice),
            "03" => Some(DocumentType::Ticket),
            _ => None,
        }
    }
}

/// Local mirror of an electronic document issued through the aggregator.
#[derive(Debug, PartialEq, Clone)]
pub struct Document {
    pub id: Uuid,
    pub document_type: String,
    pub serie: String,
    pub numero: String,
    pub sunat_id: Option<String>,
    pub sunat_status: String,
    pub status: DocumentStatus,
    pub xml_url: Option<String>,
    pub cdr_url: Option<String>,
    pub sunat_issue_time: Option<i64>,
    pub sunat_response_time: Option<i64>,
    pub production: bool,
    pub is_purchase: bool,
    pub faults: serde_json::Value,
    pub error_message: Option<String>,
    pub amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_type: String::new(),
            serie: String::new(),
            numero: String::new(),
            sunat_id: None,
            sunat_status: String::new(),
            status: DocumentStatus::Processing,
            xml_url: None,
            cdr_url: None,
            sunat_issue_time: None,
            sunat_response_time: None,
            production: false,
            is_purchase: false,
            faults: serde_json::Value::Array(Vec::new()),
            error_message: None,
            amount: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `B001-00000001`, or empty if serie and numero are still unknown.
    pub fn full_number(&self) -> String {
        if self.serie.is_empty() && self.numero.is_empty() {
            return String::new();
        }
        format!("{}-{}", self.serie, self.numero)
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct DocumentFilter {
    pub document_type: Option<String>,
    pub status: Option<DocumentStatus>,
    pub serie: Option<String>,
}
