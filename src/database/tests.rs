use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::error::ServiceError;
use crate::models::{
    local_day_bounds, local_today, order_total, Account, AccountType, Category, Customer,
    DateFilter, Dish, Document, DocumentStatus, DocumentType, Order, OrderItem, OrderStatus,
    OrderType, Transaction, TransactionFilter, TransactionOrder, TransactionType,
};
use crate::sunat::sync::{filter_today, poll_document, sync_documents};
use crate::sunat::tests::test_config;
use crate::sunat::xml::tests::{zipped, INVOICE_XML};
use crate::sunat::{RemoteDocument, SunatClient};

use super::{AppState, BillingFilter, DatabaseConnection};

async fn setup(pool: PgPool, base_url: &str) -> (AppState, DatabaseConnection) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sunat = SunatClient::new(test_config(base_url)).unwrap();
    let app_state = AppState::from_pool(pool, sunat);
    let db = app_state.connection().await.unwrap();
    (app_state, db)
}

fn account(name: &str) -> Account {
    let now = Utc::now();
    Account {
        id: 0,
        name: name.to_owned(),
        balance: Decimal::ZERO,
        account_type: AccountType::Cash,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn transaction(transaction_type: TransactionType, account_id: u64, amount: Decimal) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: 0,
        transaction_type,
        account_id,
        amount,
        category_id: None,
        description: "Groceries".to_owned(),
        transaction_date: local_today(),
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn order() -> Order {
    let now = Utc::now();
    Order {
        id: 0,
        order_number: String::new(),
        order_type: OrderType::ToGo,
        status: OrderStatus::InProgress,
        created_by: None,
        customer_id: None,
        address_id: None,
        document_id: None,
        created_at: now,
        updated_at: now,
        in_kitchen_at: None,
        packing_at: None,
        handed_at: None,
        in_transit_at: None,
        delivered_at: None,
        cancelled_at: None,
    }
}

async fn balance(db: &mut DatabaseConnection, id: u64) -> Decimal {
    db.get_account_by_id(id).await.unwrap().unwrap().balance
}

async fn dish(db: &mut DatabaseConnection, price: Decimal) -> Dish {
    let now = Utc::now();
    let category = db
        .store_category(Category {
            id: 0,
            name: "Ceviches".to_owned(),
            description: String::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    db.store_dish(Dish {
        id: 0,
        name: "Ceviche clasico".to_owned(),
        description: String::new(),
        price,
        category_id: category.id,
        is_active: true,
        has_image: false,
        created_at: now,
        updated_at: now,
    })
    .await
    .unwrap()
}

fn remote(id: &str, numero: &str) -> RemoteDocument {
    RemoteDocument {
        id: Some(id.to_owned()),
        document_type: Some("03".to_owned()),
        status: Some("ACEPTADO".to_owned()),
        file_name: Some(format!("20482674828-03-B001-{numero}")),
        issue_time: Some(1718000000000),
        ..Default::default()
    }
}

async fn move_order_to(db: &mut DatabaseConnection, id: u64, created_at: DateTime<Utc>) {
    sqlx::query("UPDATE orders SET created_at = $2 WHERE id = $1")
        .bind(id as i64)
        .bind(created_at)
        .execute(&mut *db.connection)
        .await
        .unwrap();
}

async fn order_with_status(db: &mut DatabaseConnection, status: OrderStatus) -> Order {
    let mut order = db.create_order(order()).await.unwrap();
    order.apply_status(status, Utc::now());
    db.store_order(order).await.unwrap()
}

#[sqlx::test]
async fn test_transaction_balances(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;

    let cash = db.store_account(account("Caja")).await.unwrap();
    let bank = db.store_account(account("BCP")).await.unwrap();

    let income = db
        .create_transaction(transaction(TransactionType::Income, cash.id, dec!(100.00)))
        .await
        .unwrap();
    db.create_transaction(transaction(TransactionType::Expense, cash.id, dec!(30.50)))
        .await
        .unwrap();
    assert_eq!(balance(&mut db, cash.id).await, dec!(69.50));

    let mut moved = income.clone();
    moved.account_id = bank.id;
    moved.amount = dec!(80.00);
    db.update_transaction(moved).await.unwrap();
    assert_eq!(balance(&mut db, cash.id).await, dec!(-30.50));
    assert_eq!(balance(&mut db, bank.id).await, dec!(80.00));

    assert!(db.delete_transaction(income.id).await.unwrap());
    assert_eq!(balance(&mut db, bank.id).await, dec!(0.00));
    assert!(!db.delete_transaction(income.id).await.unwrap());
}

#[sqlx::test]
async fn test_order_numbers_and_income(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;
    let dish = dish(&mut db, dec!(25.00)).await;

    let first = db.create_order(order()).await.unwrap();
    let second = db.create_order(order()).await.unwrap();
    let today = local_today().format("%Y%m%d").to_string();
    assert_eq!(first.order_number, format!("{today}-1"));
    assert_eq!(second.order_number, format!("{today}-2"));

    let now = Utc::now();
    let item = db
        .store_order_item(OrderItem {
            id: 0,
            order_id: first.id,
            dish_id: dish.id,
            category_id: dish.category_id,
            price: dec!(50.00),
            quantity: 2,
            observation: "sin cebolla".to_owned(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    let total = order_total(&[item]);

    let mut handed = first.clone();
    handed.apply_status(OrderStatus::Handed, now);
    let handed = db.store_order(handed).await.unwrap();

    let booked = db
        .book_order_income(&handed, total, None, local_today())
        .await
        .unwrap()
        .expect("income is booked");
    assert_eq!(booked.amount, dec!(50.00));
    assert_eq!(
        booked.description,
        format!("Order {} - Handed", handed.order_number)
    );

    let accounts = db.get_all_accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].name, "Default Account");
    assert_eq!(accounts[0].balance, dec!(50.00));

    let mut delivered = handed.clone();
    delivered.apply_status(OrderStatus::Delivered, now);
    let duplicate = db
        .book_order_income(&delivered, total, None, local_today())
        .await
        .unwrap();
    assert_eq!(duplicate, None);
    assert_eq!(balance(&mut db, accounts[0].id).await, dec!(50.00));
}

#[sqlx::test]
async fn test_referenced_category_delete_conflicts(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;
    let dish = dish(&mut db, dec!(12.00)).await;

    let error = db.delete_category(dish.category_id).await.unwrap_err();
    assert!(matches!(error, ServiceError::Conflict(_)));

    assert!(db.delete_dish(dish.id).await.unwrap());
    assert!(db.delete_category(dish.category_id).await.unwrap());
}

#[sqlx::test]
async fn test_sync_documents_upserts(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/doc.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/zip")
                .set_body_bytes(zipped(&[("doc.xml", INVOICE_XML)])),
        )
        .mount(&server)
        .await;

    let (app_state, mut db) = setup(pool, &server.uri()).await;

    let mut with_xml = remote("sunat-1", "00000001");
    with_xml.xml = Some(format!("{}/files/doc.zip", server.uri()));
    let mut broken_xml = remote("sunat-2", "00000002");
    broken_xml.xml = Some(format!("{}/files/missing.zip", server.uri()));

    let (synced, errors) =
        sync_documents(&mut db, &app_state.sunat, &[with_xml.clone(), broken_xml]).await;
    assert_eq!(synced, 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].sunat_id, "sunat-2");

    let document = db.get_document_by_sunat_id("sunat-1").await.unwrap().unwrap();
    assert_eq!(document.full_number(), "B001-00000001");
    assert_eq!(document.status, DocumentStatus::Accepted);
    assert_eq!(document.amount, Some(dec!(118.00)));

    // a second sync updates the same row
    with_xml.status = Some("RECHAZADO".to_owned());
    let (synced, _) = sync_documents(&mut db, &app_state.sunat, &[with_xml]).await;
    assert_eq!(synced, 1);
    let updated = db.get_document_by_sunat_id("sunat-1").await.unwrap().unwrap();
    assert_eq!(updated.id, document.id);
    assert_eq!(updated.status, DocumentStatus::Rejected);
    assert_eq!(updated.amount, Some(dec!(118.00)));
}

#[sqlx::test]
async fn test_filter_today(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;

    let mut today = Document::new(Utc::now());
    today.sunat_id = Some("today".to_owned());
    db.store_document(today).await.unwrap();

    let mut old = Document::new(Utc::now() - Duration::days(3));
    old.sunat_id = Some("old".to_owned());
    db.store_document(old).await.unwrap();

    let remotes = vec![
        remote("today", "00000003"),
        remote("old", "00000001"),
        remote("unknown", "00000004"),
        RemoteDocument::default(),
    ];
    let filtered = filter_today(&mut db, remotes).await.unwrap();
    let ids: Vec<_> = filtered.iter().filter_map(|r| r.id.as_deref()).collect();
    assert_eq!(ids, vec!["today", "unknown"]);
}

#[sqlx::test]
async fn test_poll_document_until_final(pool: PgPool) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents/sunat-9/getById"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sunat-9",
            "type": "03",
            "status": "PENDIENTE",
            "fileName": "20482674828-03-B001-00000009",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/documents/sunat-9/getById"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sunat-9",
            "type": "03",
            "status": "ACEPTADO",
            "fileName": "20482674828-03-B001-00000009",
            "issueTime": 1718000000000i64,
        })))
        .mount(&server)
        .await;

    let (app_state, mut db) = setup(pool, &server.uri()).await;

    let mut document = Document::new(Utc::now());
    document.document_type = "03".to_owned();
    document.serie = "B001".to_owned();
    document.numero = "00000009".to_owned();
    document.sunat_id = Some("sunat-9".to_owned());
    document.amount = Some(dec!(59.00));
    let document = db.store_document(document).await.unwrap();

    let polled = poll_document(&mut db, &app_state.sunat, document.clone()).await.unwrap();
    assert_eq!(polled.id, document.id);
    assert_eq!(polled.status, DocumentStatus::Accepted);
    assert_eq!(polled.sunat_issue_time, Some(1718000000000));
    assert_eq!(polled.amount, Some(dec!(59.00)));

    let stored = db.get_document_by_id(document.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Accepted);
}

#[sqlx::test]
async fn test_order_document_link(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;

    let document = db.store_document(Document::new(Utc::now())).await.unwrap();
    let order = db.create_order(order()).await.unwrap();

    assert!(db.set_order_document(order.id, document.id).await.unwrap());
    assert!(!db.set_order_document(order.id + 100, document.id).await.unwrap());

    let linked = db.get_order_by_document(document.id).await.unwrap().unwrap();
    assert_eq!(linked.id, order.id);
    assert_eq!(linked.document_id, Some(document.id));
}

#[sqlx::test]
async fn test_users(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;

    let user = db.create_user("cashier", "token-1").await.unwrap();
    let session = db.get_session_by_token("token-1").await.unwrap().unwrap();
    assert_eq!(session.user, user);

    // recreating a user replaces its token
    db.create_user("cashier", "token-2").await.unwrap();
    assert_eq!(db.get_session_by_token("token-1").await.unwrap(), None);
    assert!(db.get_session_by_token("token-2").await.unwrap().is_some());
}

#[sqlx::test]
async fn test_transaction_filters(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;
    let cash = db.store_account(account("Caja")).await.unwrap();
    let today = local_today();

    let dated = |transaction_type, amount, days_ago| {
        let mut t = transaction(transaction_type, cash.id, amount);
        t.transaction_date = today - Duration::days(days_ago);
        t
    };
    let entries = vec![
        dated(TransactionType::Income, dec!(100.00), 0),
        dated(TransactionType::Expense, dec!(30.00), 0),
        dated(TransactionType::Income, dec!(50.00), 3),
        dated(TransactionType::Income, dec!(200.00), 20),
    ];
    for entry in entries {
        db.create_transaction(entry).await.unwrap();
    }

    let filter = |transaction_type, date, order| TransactionFilter {
        transaction_type,
        date,
        order,
    };
    let amounts = |page: (u64, Vec<Transaction>)| {
        (page.0, page.1.into_iter().map(|t| t.amount).collect::<Vec<_>>())
    };

    let incomes = filter(Some(TransactionType::Income), DateFilter::All, TransactionOrder::Date);
    assert_eq!(
        amounts(db.get_transactions_page(&incomes, today, 10, 0).await.unwrap()),
        (3, vec![dec!(100.00), dec!(50.00), dec!(200.00)])
    );

    let today_only = filter(None, DateFilter::Today, TransactionOrder::Amount);
    assert_eq!(
        amounts(db.get_transactions_page(&today_only, today, 10, 0).await.unwrap()),
        (2, vec![dec!(100.00), dec!(30.00)])
    );

    let last_week = filter(None, DateFilter::Last7Days, TransactionOrder::Date);
    assert_eq!(
        db.get_transactions_page(&last_week, today, 10, 0).await.unwrap().0,
        3
    );

    let custom = filter(
        None,
        DateFilter::Custom(today - Duration::days(25), today - Duration::days(10)),
        TransactionOrder::Date,
    );
    assert_eq!(
        amounts(db.get_transactions_page(&custom, today, 10, 0).await.unwrap()),
        (1, vec![dec!(200.00)])
    );

    let by_amount = filter(None, DateFilter::All, TransactionOrder::Amount);
    assert_eq!(
        amounts(db.get_transactions_page(&by_amount, today, 2, 2).await.unwrap()),
        (4, vec![dec!(50.00), dec!(30.00)])
    );
}

#[sqlx::test]
async fn test_billing_and_status_filters(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;

    let handed_today = order_with_status(&mut db, OrderStatus::Handed).await;
    let handed_before = order_with_status(&mut db, OrderStatus::Handed).await;
    let open = db.create_order(order()).await.unwrap();
    move_order_to(&mut db, handed_before.id, Utc::now() - Duration::days(2)).await;

    let (day_start, day_end) = local_day_bounds(local_today());
    let ids = |page: (u64, Vec<Order>)| {
        (page.0, page.1.into_iter().map(|o| o.id).collect::<Vec<_>>())
    };

    let all = db
        .get_orders_for_billing(&BillingFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(ids(all), (3, vec![open.id, handed_today.id, handed_before.id]));

    let handed = BillingFilter {
        status: Some(OrderStatus::Handed),
        ..Default::default()
    };
    assert_eq!(
        ids(db.get_orders_for_billing(&handed, 10, 0).await.unwrap()),
        (2, vec![handed_today.id, handed_before.id])
    );

    let handed_since_today = BillingFilter {
        created_from: Some(day_start),
        ..handed.clone()
    };
    assert_eq!(
        ids(db.get_orders_for_billing(&handed_since_today, 10, 0).await.unwrap()),
        (1, vec![handed_today.id])
    );

    let before_today = BillingFilter {
        created_until: Some(day_start),
        ..Default::default()
    };
    assert_eq!(
        ids(db.get_orders_for_billing(&before_today, 10, 0).await.unwrap()),
        (1, vec![handed_before.id])
    );

    let by_status = db
        .get_orders_by_status(OrderStatus::Handed, day_start, day_end)
        .await
        .unwrap();
    assert_eq!(
        by_status.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![handed_today.id]
    );
}

#[sqlx::test]
async fn test_orders_in_kitchen(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;
    let now = Utc::now();

    let mut late = db.create_order(order()).await.unwrap();
    late.apply_status(OrderStatus::InKitchen, now);
    let late = db.store_order(late).await.unwrap();

    let mut early = db.create_order(order()).await.unwrap();
    early.apply_status(OrderStatus::InKitchen, now - Duration::minutes(10));
    let early = db.store_order(early).await.unwrap();

    order_with_status(&mut db, OrderStatus::Packing).await;
    db.create_order(order()).await.unwrap();

    let kitchen = db.get_orders_in_kitchen().await.unwrap();
    assert_eq!(
        kitchen.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![early.id, late.id]
    );
}

#[sqlx::test]
async fn test_customers_by_name(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;

    let now = Utc::now();
    let mut stored = Vec::new();
    for (first_name, last_name) in [("Ana", "Torres"), ("Luis", "Anaya"), ("Pedro", "Ruiz")] {
        let customer = db
            .store_customer(Customer {
                id: 0,
                first_name: first_name.to_owned(),
                last_name: last_name.to_owned(),
                phone_number: "987654321".to_owned(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        stored.push(customer.id);
    }

    let names = |customers: Vec<Customer>| customers.into_iter().map(|c| c.id).collect::<Vec<_>>();
    assert_eq!(
        names(db.get_customers_by_name("ana").await.unwrap()),
        vec![stored[0], stored[1]]
    );
    assert_eq!(
        names(db.get_customers_by_name("RUIZ").await.unwrap()),
        vec![stored[2]]
    );
    assert!(db.get_customers_by_name("Quispe").await.unwrap().is_empty());
}

#[sqlx::test]
async fn test_documents_by_type_unissued_first(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;

    let document = |document_type: &str, numero: &str, issue_time: Option<i64>| {
        let mut document = Document::new(Utc::now());
        document.document_type = document_type.to_owned();
        document.serie = if document_type == "01" { "F001" } else { "B001" }.to_owned();
        document.numero = numero.to_owned();
        document.sunat_issue_time = issue_time;
        document
    };
    let documents = vec![
        document("03", "00000001", Some(1_718_000_000_000)),
        document("03", "00000002", None),
        document("03", "00000003", Some(1_718_100_000_000)),
        document("01", "00000001", None),
    ];
    for document in documents {
        db.store_document(document).await.unwrap();
    }

    let (count, tickets) = db
        .get_documents_by_type_page(DocumentType::Ticket, 10, 0)
        .await
        .unwrap();
    assert_eq!(count, 3);
    assert_eq!(
        tickets.iter().map(Document::full_number).collect::<Vec<_>>(),
        vec!["B001-00000002", "B001-00000003", "B001-00000001"]
    );

    let (count, invoices) = db
        .get_documents_by_type_page(DocumentType::Invoice, 10, 0)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(invoices[0].full_number(), "F001-00000001");
}

#[sqlx::test]
async fn test_concurrent_polls_share_request_connections(
    pool_options: PgPoolOptions,
    connect_options: PgConnectOptions,
) {
    const REQUESTS: u32 = 3;

    let server = MockServer::start().await;
    for n in 1..=REQUESTS {
        Mock::given(method("GET"))
            .and(path(format!("/documents/sunat-{n}/getById")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("sunat-{n}"),
                "type": "03",
                "status": "ACEPTADO",
                "fileName": format!("20482674828-03-B001-0000000{n}"),
            })))
            .mount(&server)
            .await;
    }

    let pool = pool_options
        .max_connections(REQUESTS)
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_with(connect_options)
        .await
        .unwrap();
    let app_state = AppState::from_pool(pool, SunatClient::new(test_config(&server.uri())).unwrap());

    // every request holds its own connection, the pool is exhausted while polling
    let mut connections = Vec::new();
    for _ in 0..REQUESTS {
        connections.push(app_state.connection().await.unwrap());
    }

    let polls = connections.into_iter().zip(1..=REQUESTS).map(|(mut db, n)| {
        let client = app_state.sunat.clone();
        async move {
            let mut document = Document::new(Utc::now());
            document.document_type = "03".to_owned();
            document.sunat_id = Some(format!("sunat-{n}"));
            let document = db.store_document(document).await?;
            poll_document(&mut db, &client, document).await
        }
    });

    for result in futures::future::join_all(polls).await {
        let document = result.unwrap();
        assert_eq!(document.status, DocumentStatus::Accepted);
        assert_eq!(document.serie, "B001");
    }
}

#[sqlx::test]
async fn test_order_with_items_is_atomic(pool: PgPool) {
    let (_, mut db) = setup(pool, "http://127.0.0.1:9").await;
    let dish = dish(&mut db, dec!(18.00)).await;

    let now = Utc::now();
    let item = |dish_id| OrderItem {
        id: 0,
        order_id: 0,
        dish_id,
        category_id: dish.category_id,
        price: dec!(18.00),
        quantity: 1,
        observation: String::new(),
        created_at: now,
        updated_at: now,
    };

    let (created, items) = db
        .create_order_with_items(order(), vec![item(dish.id), item(dish.id)])
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.order_id == created.id));

    let error = db
        .create_order_with_items(order(), vec![item(dish.id), item(dish.id + 100)])
        .await
        .unwrap_err();
    assert!(matches!(error, ServiceError::Conflict(_)));

    let (count, orders) = db.get_orders_page(10, 0).await.unwrap();
    assert_eq!(count, 1);
    assert_eq!(orders[0].id, created.id);
    assert_eq!(db.get_all_order_items().await.unwrap().len(), 2);
}
