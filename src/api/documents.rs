use aide::axum::routing::{get_with, post_with};
use aide::axum::ApiRouter;
use aide::transform::TransformOperation;
use axum::extract::{Path, Query};
use axum::Json;
use chrono::{DateTime, Local, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{self, Document, DocumentFilter, DocumentStatus, DocumentType};
use crate::pdf::{render_ticket, Ticket};
use crate::request_state::RequestState;
use crate::sunat::sync::{
    filter_today, poll_document, process_document, sync_documents, sync_from_sunat, SyncError,
};
use crate::sunat::ubl::{self, LineId, Receiver, SaleItem};
use crate::sunat::{xml, SunatError};

use super::pagination::{Paginated, Pagination};
use super::utils::{Created, FileResponse, Payload, Validator};

const PDF_FORMATS: [&str; 4] = ["A4", "A5", "ticket58mm", "ticket80mm"];

pub fn router(app_state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route("/documents", get_with(list_documents, list_documents_docs))
        .api_route(
            "/documents/get-tickets",
            get_with(list_tickets, list_tickets_docs),
        )
        .api_route(
            "/documents/get-invoices",
            get_with(list_invoices, list_invoices_docs),
        )
        .api_route(
            "/documents/create-invoice",
            post_with(create_invoice, create_invoice_docs),
        )
        .api_route(
            "/documents/create-ticket",
            post_with(create_ticket, create_ticket_docs),
        )
        .api_route("/documents/sync", get_with(sync_all, sync_all_docs))
        .api_route(
            "/documents/sync-today",
            get_with(sync_today, sync_today_docs),
        )
        .api_route(
            "/documents/sync-single",
            get_with(sync_single, sync_single_docs),
        )
        .api_route(
            "/documents/generate-ticket",
            post_with(generate_ticket, generate_ticket_docs),
        )
        .api_route("/documents/:id", get_with(get_document, get_document_docs))
        .api_route(
            "/documents/:id/get-pdf",
            get_with(get_document_pdf, get_document_pdf_docs),
        )
        .with_state(app_state)
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct DocumentDto {
    pub id: Uuid,
    pub document_type: String,
    pub serie: String,
    pub numero: String,
    pub full_number: String,
    pub sunat_id: Option<String>,
    pub sunat_status: String,
    pub status: String,
    pub xml_url: Option<String>,
    pub cdr_url: Option<String>,
    pub sunat_issue_time: Option<i64>,
    pub sunat_response_time: Option<i64>,
    pub production: bool,
    pub is_purchase: bool,
    pub faults: Value,
    pub error_message: Option<String>,
    pub amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for DocumentDto {
    fn from(value: &Document) -> Self {
        Self {
            id: value.id,
            document_type: value.document_type.to_owned(),
            serie: value.serie.to_owned(),
            numero: value.numero.to_owned(),
            full_number: value.full_number(),
            sunat_id: value.sunat_id.to_owned(),
            sunat_status: value.sunat_status.to_owned(),
            status: value.status.code().to_owned(),
            xml_url: value.xml_url.to_owned(),
            cdr_url: value.cdr_url.to_owned(),
            sunat_issue_time: value.sunat_issue_time,
            sunat_response_time: value.sunat_response_time,
            production: value.production,
            is_purchase: value.is_purchase,
            faults: value.faults.to_owned(),
            error_message: value.error_message.to_owned(),
            amount: value.amount.map(models::money),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, Default, PartialEq, Deserialize, JsonSchema)]
pub struct DocumentListQuery {
    pub document_type: Option<String>,
    pub status: Option<String>,
    pub serie: Option<String>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct CreateInvoiceDto {
    /// Items as `{"id", "name", "quantity", "cost"}`, `cost` is the unit price including tax.
    pub order_items: Option<Vec<Value>>,
    #[serde(default)]
    pub ruc: String,
    pub razon_social: Option<String>,
    #[serde(default)]
    pub address: String,
    pub order_id: Option<u64>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct CreateTicketDto {
    pub order_items: Option<Vec<Value>>,
    pub order_id: Option<u64>,
}

#[derive(Debug, PartialEq, Deserialize, JsonSchema)]
pub struct GenerateTicketDto {
    pub order_items: Option<Vec<Value>>,
    pub order_number: Option<String>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Default, PartialEq, Deserialize, JsonSchema)]
pub struct SyncSingleQuery {
    pub sunat_id: Option<String>,
    pub document_id: Option<String>,
}

#[derive(Debug, Default, PartialEq, Deserialize, JsonSchema)]
pub struct DocumentPdfQuery {
    /// `local` (default) or `sunat`
    pub source: Option<String>,
    /// Layout of the aggregator pdf, `ticket80mm` by default.
    pub format: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct SyncResultDto {
    pub synced: usize,
    pub total: usize,
    pub errors: Vec<SyncError>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct SyncTodayResultDto {
    pub synced: usize,
    pub total_today: usize,
    pub total_fetched: usize,
    pub errors: Vec<SyncError>,
}

#[derive(Debug, PartialEq, Serialize, JsonSchema)]
pub struct SyncSingleResultDto {
    pub synced: usize,
    pub sunat_id: String,
    pub document: DocumentDto,
    pub errors: Vec<SyncError>,
}

/// Maps aggregator failures, transport problems are reported as `{context}: {cause}`.
fn sunat_failure(error: SunatError, context: &str) -> ServiceError {
    match error {
        SunatError::MissingCredentials
        | SunatError::Rejected(_)
        | SunatError::InvalidResponse(_) => error.into(),
        other => ServiceError::BadGateway(format!("{context}: {other}")),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Reads the sold items of a request, invalid entries are reported under `order_items`.
fn sale_items(
    entries: Option<Vec<Value>>,
    allow_empty: bool,
    validator: &mut Validator,
) -> Vec<SaleItem> {
    let Some(entries) = entries else {
        validator.error("order_items", "This field is required.");
        return Vec::new();
    };
    if entries.is_empty() && !allow_empty {
        validator.error("order_items", "This list may not be empty.");
        return Vec::new();
    }

    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<SaleItem>(entry) {
            Ok(item) if item.quantity <= Decimal::ZERO => validator.error(
                "order_items",
                format!("Item {index}: quantity must be greater than 0."),
            ),
            Ok(item) => items.push(item),
            Err(e) => validator.error("order_items", format!("Item {index}: {e}")),
        }
    }
    items
}

/// Sends a new document to the aggregator and keeps a local copy of it.
async fn issue_document(
    state: &mut RequestState,
    document_type: DocumentType,
    items: &[SaleItem],
    receiver: &Receiver,
    order_id: Option<u64>,
    label: &str,
) -> ServiceResult<Document> {
    let client = state.app_state.sunat.clone();
    let credentials = client.credentials()?;

    let Some(correlative) = client.last_document(document_type).await? else {
        return Err(ServiceError::BadGateway(
            "Failed to get correlative number from Sunat".to_owned(),
        ));
    };

    let issued_at = Local::now().naive_local();
    let payload = ubl::build_document(
        credentials,
        &client.config().supplier,
        document_type,
        &correlative,
        items,
        receiver,
        issued_at,
    );
    let sent = client
        .send_bill(&payload)
        .await
        .map_err(|e| sunat_failure(e, &format!("Failed to create {label}")))?;

    let mut document = Document::new(Utc::now());
    document.document_type = document_type.code().to_owned();
    document.serie = document_type.serie().to_owned();
    document.numero = correlative;
    document.sunat_id = Some(sent.document_id);
    document.status = DocumentStatus::from_sunat_status(&sent.status);
    document.sunat_status = sent.status;
    document.amount = Some(ubl::totals(items).total);
    let document = state.db.store_document(document).await?;
    info!(
        "Issued {} {} for {}",
        label,
        document.full_number(),
        document.amount.unwrap_or_default()
    );

    if let Some(order_id) = order_id {
        if !state.db.set_order_document(order_id, document.id).await? {
            warn!(
                "Order {} does not exist, document {} stays unlinked",
                order_id,
                document.full_number()
            );
        }
    }

    poll_document(&mut state.db, &client, document).await
}

async fn list_documents(
    mut state: RequestState,
    pagination: Pagination,
    Query(query): Query<DocumentListQuery>,
) -> ServiceResult<Json<Paginated<DocumentDto>>> {
    state.session_require()?;

    let status = match non_empty(query.status) {
        Some(code) => match DocumentStatus::from_code(&code) {
            Some(status) => Some(status),
            None => {
                return Err(ServiceError::BadRequest(format!(
                    "Invalid status. Valid options: {}",
                    DocumentStatus::ALL.map(|s| s.code()).join(", ")
                )))
            }
        },
        None => None,
    };
    let filter = DocumentFilter {
        document_type: non_empty(query.document_type),
        status,
        serie: non_empty(query.serie),
    };

    let (count, documents) = state
        .db
        .get_documents_page(&filter, pagination.limit(), pagination.offset())
        .await?;
    let results = documents.iter().map(DocumentDto::from).collect();
    Ok(Json(pagination.page(count, results)?))
}

fn list_documents_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the electronic documents, newest first. Filters: document_type, status, serie.")
        .tag("documents")
        .response::<200, Json<Paginated<DocumentDto>>>()
        .response_with::<400, (), _>(|res| res.description("Invalid status filter!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_by_type(
    state: &mut RequestState,
    pagination: &Pagination,
    document_type: DocumentType,
) -> ServiceResult<Paginated<DocumentDto>> {
    let (count, documents) = state
        .db
        .get_documents_by_type_page(document_type, pagination.limit(), pagination.offset())
        .await?;
    pagination.page(count, documents.iter().map(DocumentDto::from).collect())
}

async fn list_tickets(
    mut state: RequestState,
    pagination: Pagination,
) -> ServiceResult<Json<Paginated<DocumentDto>>> {
    state.session_require()?;
    Ok(Json(
        list_by_type(&mut state, &pagination, DocumentType::Ticket).await?,
    ))
}

fn list_tickets_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the tickets (boletas). Documents still waiting for sunat come first.")
        .tag("documents")
        .response::<200, Json<Paginated<DocumentDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn list_invoices(
    mut state: RequestState,
    pagination: Pagination,
) -> ServiceResult<Json<Paginated<DocumentDto>>> {
    state.session_require()?;
    Ok(Json(
        list_by_type(&mut state, &pagination, DocumentType::Invoice).await?,
    ))
}

fn list_invoices_docs(op: TransformOperation) -> TransformOperation {
    op.description("List the invoices (facturas). Documents still waiting for sunat come first.")
        .tag("documents")
        .response::<200, Json<Paginated<DocumentDto>>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn get_document(
    mut state: RequestState,
    Path(id): Path<String>,
) -> ServiceResult<Json<DocumentDto>> {
    state.session_require()?;

    let Ok(id) = Uuid::parse_str(&id) else {
        return Err(ServiceError::NotFound);
    };
    let document = state.db.get_document_by_id(id).await?;

    if let Some(document) = document {
        return Ok(Json(DocumentDto::from(&document)));
    }

    Err(ServiceError::NotFound)
}

fn get_document_docs(op: TransformOperation) -> TransformOperation {
    op.description("Get a document by id.")
        .tag("documents")
        .response::<200, Json<DocumentDto>>()
        .response_with::<404, (), _>(|res| res.description("The requested document does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

async fn create_invoice(
    mut state: RequestState,
    form: Payload<CreateInvoiceDto>,
) -> ServiceResult<Created<DocumentDto>> {
    state.session_require()?;

    let form = form.0;
    let mut validator = Validator::default();
    let items = sale_items(form.order_items, false, &mut validator);
    validator.required_text("ruc", &form.ruc, 11);
    validator.required_text("address", &form.address, 255);
    validator.finish()?;

    let receiver = Receiver::Company {
        ruc: form.ruc.trim().to_owned(),
        razon_social: non_empty(form.razon_social).unwrap_or_else(|| "---".to_owned()),
        address: form.address.trim().to_owned(),
    };
    let document = issue_document(
        &mut state,
        DocumentType::Invoice,
        &items,
        &receiver,
        form.order_id,
        "invoice",
    )
    .await?;

    Ok(Created(DocumentDto::from(&document)))
}

fn create_invoice_docs(op: TransformOperation) -> TransformOperation {
    op.description("Issue an invoice (factura, serie F001) for a company and wait for sunat to process it.")
        .tag("documents")
        .response::<201, Json<DocumentDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields or rejected by sunat!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<500, (), _>(|res| res.description("Sunat credentials are not configured!"))
        .response_with::<502, (), _>(|res| res.description("Sunat could not be reached!"))
        .security_requirement("Token")
}

async fn create_ticket(
    mut state: RequestState,
    form: Payload<CreateTicketDto>,
) -> ServiceResult<Created<DocumentDto>> {
    state.session_require()?;

    let form = form.0;
    let mut validator = Validator::default();
    let items = sale_items(form.order_items, false, &mut validator);
    validator.finish()?;

    let document = issue_document(
        &mut state,
        DocumentType::Ticket,
        &items,
        &Receiver::Anonymous,
        form.order_id,
        "ticket",
    )
    .await?;

    Ok(Created(DocumentDto::from(&document)))
}

fn create_ticket_docs(op: TransformOperation) -> TransformOperation {
    op.description("Issue a ticket (boleta, serie B001) and wait for sunat to process it.")
        .tag("documents")
        .response::<201, Json<DocumentDto>>()
        .response_with::<400, (), _>(|res| res.description("Invalid fields or rejected by sunat!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<500, (), _>(|res| res.description("Sunat credentials are not configured!"))
        .response_with::<502, (), _>(|res| res.description("Sunat could not be reached!"))
        .security_requirement("Token")
}

async fn sync_all(mut state: RequestState) -> ServiceResult<Json<SyncResultDto>> {
    state.session_require()?;

    let client = state.app_state.sunat.clone();
    let remotes = client
        .get_all()
        .await
        .map_err(|e| sunat_failure(e, "Failed to fetch documents"))?;

    let (synced, errors) = sync_documents(&mut state.db, &client, &remotes).await;
    info!("Synced {} of {} documents", synced, remotes.len());

    Ok(Json(SyncResultDto {
        synced,
        total: remotes.len(),
        errors,
    }))
}

fn sync_all_docs(op: TransformOperation) -> TransformOperation {
    op.description("Fetch every document from sunat and update the local copies.")
        .tag("documents")
        .response::<200, Json<SyncResultDto>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<500, (), _>(|res| res.description("Sunat credentials are not configured!"))
        .response_with::<502, (), _>(|res| res.description("Sunat could not be reached!"))
        .security_requirement("Token")
}

async fn sync_today(mut state: RequestState) -> ServiceResult<Json<SyncTodayResultDto>> {
    state.session_require()?;

    let client = state.app_state.sunat.clone();
    let remotes = client
        .get_all()
        .await
        .map_err(|e| sunat_failure(e, "Failed to fetch documents"))?;
    let total_fetched = remotes.len();

    let remotes = filter_today(&mut state.db, remotes).await?;
    let (synced, errors) = sync_documents(&mut state.db, &client, &remotes).await;
    info!(
        "Synced {} of {} documents from today ({} fetched)",
        synced,
        remotes.len(),
        total_fetched
    );

    Ok(Json(SyncTodayResultDto {
        synced,
        total_today: remotes.len(),
        total_fetched,
        errors,
    }))
}

fn sync_today_docs(op: TransformOperation) -> TransformOperation {
    op.description("Sync the documents created today and those not yet known locally.")
        .tag("documents")
        .response::<200, Json<SyncTodayResultDto>>()
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<500, (), _>(|res| res.description("Sunat credentials are not configured!"))
        .response_with::<502, (), _>(|res| res.description("Sunat could not be reached!"))
        .security_requirement("Token")
}

async fn sync_single(
    mut state: RequestState,
    Query(query): Query<SyncSingleQuery>,
) -> ServiceResult<Json<SyncSingleResultDto>> {
    state.session_require()?;

    let mut local = None;
    let sunat_id = match (non_empty(query.sunat_id), non_empty(query.document_id)) {
        (Some(sunat_id), _) => sunat_id,
        (None, Some(document_id)) => {
            let document = match Uuid::parse_str(&document_id) {
                Ok(id) => state.db.get_document_by_id(id).await?,
                Err(_) => None,
            };
            let Some(document) = document else {
                return Err(ServiceError::NotFoundWith(
                    format!("Document {document_id} not found"),
                    json!({}),
                ));
            };
            let Some(sunat_id) = document.sunat_id.clone() else {
                return Err(ServiceError::BadRequest(format!(
                    "Document {document_id} has no sunat_id"
                )));
            };
            local = Some(document);
            sunat_id
        }
        (None, None) => {
            return Err(ServiceError::BadRequest(
                "sunat_id or document_id parameter is required".to_owned(),
            ))
        }
    };

    let client = state.app_state.sunat.clone();
    let remote = client
        .get_by_id(&sunat_id)
        .await
        .map_err(|e| sunat_failure(e, "Failed to fetch document from Sunat"))?;

    let Some(remote) = remote else {
        if local.is_none() {
            local = state.db.get_document_by_sunat_id(&sunat_id).await?;
        }
        return Err(match local {
            Some(document) => ServiceError::NotFoundWith(
                format!("Document {} not found in Sunat", document.full_number()),
                json!({ "document": DocumentDto::from(&document) }),
            ),
            None => ServiceError::NotFoundWith(
                format!("Document {sunat_id} not found in Sunat"),
                json!({}),
            ),
        });
    };

    let processed = process_document(&client, &remote).await;
    let document = sync_from_sunat(&mut state.db, &remote, &processed).await?;

    let mut errors = Vec::new();
    if let Some(error) = processed.error {
        errors.push(SyncError {
            sunat_id: sunat_id.to_owned(),
            xml_url: remote.xml.clone(),
            error,
        });
    }

    Ok(Json(SyncSingleResultDto {
        synced: 1,
        sunat_id,
        document: DocumentDto::from(&document),
        errors,
    }))
}

fn sync_single_docs(op: TransformOperation) -> TransformOperation {
    op.description("Sync one document, given by its sunat_id or by the local document_id.")
        .tag("documents")
        .response::<200, Json<SyncSingleResultDto>>()
        .response_with::<400, (), _>(|res| res.description("Missing parameters!"))
        .response_with::<404, (), _>(|res| res.description("The document is unknown!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<500, (), _>(|res| res.description("Sunat credentials are not configured!"))
        .response_with::<502, (), _>(|res| res.description("Sunat could not be reached!"))
        .security_requirement("Token")
}

/// Receipt content of a stored document, taken from its order or else from its xml.
async fn document_ticket(state: &mut RequestState, document: &Document) -> ServiceResult<Ticket> {
    let issued_at = document.created_at.with_timezone(&Local).naive_local();

    if let Some(order) = state.db.get_order_by_document(document.id).await? {
        let details = state.db.get_order_item_details(&[order.id]).await?;
        let items = details
            .iter()
            .map(|detail| SaleItem {
                id: LineId::Number(detail.item.dish_id),
                name: detail.dish_name.to_owned(),
                quantity: Decimal::from(detail.item.quantity),
                cost: detail.unit_price(),
            })
            .collect();
        let customer_name = match order.customer_id {
            Some(customer_id) => state
                .db
                .get_customer_by_id(customer_id)
                .await?
                .map(|c| c.full_name()),
            None => None,
        };

        return Ok(Ticket {
            order_number: Some(order.order_number),
            customer_name,
            items,
            issued_at,
        });
    }

    if let Some(xml_url) = &document.xml_url {
        let content = state
            .app_state
            .sunat
            .download_xml(xml_url)
            .await
            .map_err(|e| ServiceError::BadGateway(format!("Failed to download XML: {e}")))?;

        return Ok(Ticket {
            order_number: Some(document.full_number()).filter(|n| !n.is_empty()),
            customer_name: xml::parse_customer_info(&content).razon_social,
            items: xml::parse_invoice_lines(&content),
            issued_at,
        });
    }

    Err(ServiceError::BadRequest(
        "Document has no linked order and no XML to render".to_owned(),
    ))
}

async fn get_document_pdf(
    mut state: RequestState,
    Path(id): Path<String>,
    Query(query): Query<DocumentPdfQuery>,
) -> ServiceResult<FileResponse> {
    state.session_require()?;

    let document = match Uuid::parse_str(&id) {
        Ok(id) => state.db.get_document_by_id(id).await?,
        Err(_) => None,
    };
    let Some(document) = document else {
        return Err(ServiceError::NotFound);
    };

    let base_name = match document.full_number() {
        name if name.is_empty() => document.id.to_string(),
        name => name,
    };

    match non_empty(query.source).as_deref().unwrap_or("local") {
        "local" => {
            let ticket = document_ticket(&mut state, &document).await?;
            let supplier = &state.app_state.sunat.config().supplier;
            let data = render_ticket(supplier, &ticket)?;
            Ok(FileResponse::pdf(&format!("{base_name}.pdf"), data))
        }
        "sunat" => {
            let Some(sunat_id) = document.sunat_id.as_deref() else {
                return Err(ServiceError::BadRequest(
                    "Document has no sunat_id".to_owned(),
                ));
            };
            let format = non_empty(query.format).unwrap_or_else(|| "ticket80mm".to_owned());
            if !PDF_FORMATS.contains(&format.as_str()) {
                return Err(ServiceError::BadRequest(format!(
                    "Invalid format. Valid options: {}",
                    PDF_FORMATS.join(", ")
                )));
            }

            let client = state.app_state.sunat.clone();
            let file_name = format!(
                "{}-{}-{}-{}",
                client.config().supplier.ruc,
                document.document_type,
                document.serie,
                document.numero
            );
            let data = client
                .get_pdf(sunat_id, &format, &file_name)
                .await
                .map_err(|e| ServiceError::BadGateway(format!("Failed to fetch PDF from Sunat: {e}")))?;
            Ok(FileResponse::pdf(&format!("{file_name}.pdf"), data))
        }
        other => Err(ServiceError::BadRequest(format!(
            "Invalid source \"{other}\". Use local or sunat"
        ))),
    }
}

fn get_document_pdf_docs(op: TransformOperation) -> TransformOperation {
    op.description("Pdf of a document, rendered locally as a receipt (source=local) or by sunat (source=sunat, format=A4|A5|ticket58mm|ticket80mm).")
        .tag("documents")
        .response_with::<200, (), _>(|res| res.description("The pdf file."))
        .response_with::<400, (), _>(|res| res.description("Invalid parameters or nothing to render!"))
        .response_with::<404, (), _>(|res| res.description("The requested document does not exist!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .response_with::<502, (), _>(|res| res.description("Sunat could not be reached!"))
        .security_requirement("Token")
}

fn ticket_file_name(order_number: Option<&str>, now: chrono::NaiveDateTime) -> String {
    match order_number {
        Some(order_number) => format!("ticket_{order_number}.pdf"),
        None => format!("ticket_{}.pdf", now.format("%Y%m%d%H%M%S")),
    }
}

async fn generate_ticket(
    mut state: RequestState,
    form: Payload<GenerateTicketDto>,
) -> ServiceResult<FileResponse> {
    state.session_require()?;

    let form = form.0;
    let mut validator = Validator::default();
    let items = sale_items(form.order_items, true, &mut validator);
    validator.finish()?;

    let issued_at = Local::now().naive_local();
    let ticket = Ticket {
        order_number: non_empty(form.order_number),
        customer_name: non_empty(form.customer_name),
        items,
        issued_at,
    };
    let data = render_ticket(&state.app_state.sunat.config().supplier, &ticket)?;

    Ok(FileResponse::pdf(
        &ticket_file_name(ticket.order_number.as_deref(), issued_at),
        data,
    ))
}

fn generate_ticket_docs(op: TransformOperation) -> TransformOperation {
    op.description("Render a receipt for the given items without sending anything to sunat.")
        .tag("documents")
        .response_with::<200, (), _>(|res| res.description("The pdf file."))
        .response_with::<400, (), _>(|res| res.description("Invalid fields!"))
        .response_with::<401, (), _>(|res| res.description("Missing login!"))
        .security_requirement("Token")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use sqlx::PgPool;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::models::{Order, OrderStatus, OrderType};
    use crate::sunat::tests::test_config;
    use crate::sunat::SunatClient;

    use super::*;

    async fn request_state(pool: PgPool, base_url: &str) -> RequestState {
        let _ = env_logger::builder().is_test(true).try_init();
        let sunat = SunatClient::new(test_config(base_url)).unwrap();
        let app_state = AppState::from_pool(pool, sunat);
        RequestState {
            db: app_state.connection().await.unwrap(),
            session: None,
            app_state,
        }
    }

    fn ceviche() -> Vec<SaleItem> {
        vec![SaleItem {
            id: LineId::Number(1),
            name: "Ceviche clasico".to_owned(),
            quantity: dec!(2),
            cost: dec!(25.50),
        }]
    }

    async fn mount_correlative(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/personas/lastDocument/"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[sqlx::test]
    async fn test_issue_ticket_links_and_polls(pool: PgPool) {
        let server = MockServer::start().await;
        mount_correlative(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"suggestedNumber": "00000012"})),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/personas/v1/sendBill"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"documentId": "sunat-12", "status": "PENDIENTE"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/documents/sunat-12/getById"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sunat-12",
                "type": "03",
                "status": "ACEPTADO",
                "fileName": "20482674828-03-B001-00000012",
                "issueTime": 1718000000000i64,
            })))
            .mount(&server)
            .await;

        let mut state = request_state(pool, &server.uri()).await;
        let now = Utc::now();
        let order = state
            .db
            .create_order(Order {
                id: 0,
                order_number: String::new(),
                order_type: OrderType::Table,
                status: OrderStatus::Handed,
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
            })
            .await
            .unwrap();

        let document = issue_document(
            &mut state,
            DocumentType::Ticket,
            &ceviche(),
            &Receiver::Anonymous,
            Some(order.id),
            "ticket",
        )
        .await
        .unwrap();

        assert_eq!(document.full_number(), "B001-00000012");
        assert_eq!(document.sunat_id.as_deref(), Some("sunat-12"));
        assert_eq!(document.status, DocumentStatus::Accepted);
        assert_eq!(document.sunat_issue_time, Some(1718000000000));
        assert_eq!(document.amount, Some(dec!(51.00)));

        let linked = state.db.get_order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(linked.document_id, Some(document.id));

        let stored = state.db.get_document_by_sunat_id("sunat-12").await.unwrap().unwrap();
        assert_eq!(stored.id, document.id);
        assert_eq!(stored.status, DocumentStatus::Accepted);
    }

    #[sqlx::test]
    async fn test_issue_without_correlative(pool: PgPool) {
        let server = MockServer::start().await;
        mount_correlative(&server, ResponseTemplate::new(500)).await;
        Mock::given(method("POST"))
            .and(path("/personas/v1/sendBill"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut state = request_state(pool, &server.uri()).await;
        let error = issue_document(
            &mut state,
            DocumentType::Invoice,
            &ceviche(),
            &Receiver::Company {
                ruc: "20100070970".to_owned(),
                razon_social: "Supermercados Peruanos".to_owned(),
                address: "Av. Javier Prado 123".to_owned(),
            },
            None,
            "invoice",
        )
        .await
        .unwrap_err();

        assert!(matches!(
            error,
            ServiceError::BadGateway(ref m) if m == "Failed to get correlative number from Sunat"
        ));
        let (count, _) = state
            .db
            .get_documents_page(&DocumentFilter::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_sale_items() {
        let mut validator = Validator::default();
        let items = sale_items(
            Some(vec![
                json!({"id": 1, "name": "Ceviche", "quantity": 2, "cost": 25.5}),
                json!({"id": "B", "name": "Chicha", "quantity": "1", "cost": "6.00"}),
            ]),
            false,
            &mut validator,
        );
        assert!(validator.finish().is_ok());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, LineId::Number(1));
        assert_eq!(items[0].line_total(), dec!(51));
        assert_eq!(items[1].cost, dec!(6));
    }

    #[test]
    fn test_sale_items_errors() {
        let mut validator = Validator::default();
        sale_items(None, false, &mut validator);
        let Err(ServiceError::InvalidFields(errors)) = validator.finish() else {
            panic!("expected field errors");
        };
        assert_eq!(errors.0["order_items"], vec!["This field is required."]);

        let mut validator = Validator::default();
        sale_items(
            Some(vec![json!({"name": "Ceviche"}), json!({"quantity": 0, "cost": 1})]),
            false,
            &mut validator,
        );
        let Err(ServiceError::InvalidFields(errors)) = validator.finish() else {
            panic!("expected field errors");
        };
        assert_eq!(errors.0["order_items"].len(), 2);

        let mut validator = Validator::default();
        assert!(sale_items(Some(vec![]), true, &mut validator).is_empty());
        assert!(validator.finish().is_ok());

        let mut validator = Validator::default();
        sale_items(Some(vec![]), false, &mut validator);
        assert!(validator.finish().is_err());
    }

    #[test]
    fn test_sunat_failure_messages() {
        let error = sunat_failure(
            SunatError::Request("connection refused".to_owned()),
            "Failed to create invoice",
        );
        assert!(matches!(
            error,
            ServiceError::BadGateway(ref m) if m == "Failed to create invoice: connection refused"
        ));

        assert!(matches!(
            sunat_failure(SunatError::MissingCredentials, "x"),
            ServiceError::InternalServerError(ref m) if m.contains("credentials")
        ));
        assert!(matches!(
            sunat_failure(SunatError::InvalidResponse("expected a list".to_owned()), "x"),
            ServiceError::BadGateway(ref m) if m.starts_with("Invalid response format")
        ));
        assert!(matches!(
            sunat_failure(SunatError::Rejected(json!({"status": "ERROR"})), "x"),
            ServiceError::BadRequestWith(_, _)
        ));
    }

    #[test]
    fn test_ticket_file_name() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        assert_eq!(ticket_file_name(Some("20240305-12"), now), "ticket_20240305-12.pdf");
        assert_eq!(ticket_file_name(None, now), "ticket_20240305140709.pdf");
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".to_owned())), None);
        assert_eq!(non_empty(Some(" 12 ".to_owned())), Some("12".to_owned()));
        assert_eq!(non_empty(None), None);
    }
}
