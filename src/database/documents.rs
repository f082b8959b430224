use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Document, DocumentFilter, DocumentStatus, DocumentType};

use super::{to_i64, to_u64, DatabaseConnection};

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: Uuid,
    document_type: String,
    serie: String,
    numero: String,
    sunat_id: Option<String>,
    sunat_status: String,
    status: String,
    xml_url: Option<String>,
    cdr_url: Option<String>,
    sunat_issue_time: Option<i64>,
    sunat_response_time: Option<i64>,
    production: bool,
    is_purchase: bool,
    faults: Option<Value>,
    error_message: Option<String>,
    amount: Option<Decimal>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = ServiceError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let status = DocumentStatus::from_code(&row.status).ok_or_else(|| {
            ServiceError::InternalServerError(format!("Unknown document status '{}'", row.status))
        })?;

        Ok(Self {
            id: row.id,
            document_type: row.document_type,
            serie: row.serie,
            numero: row.numero,
            sunat_id: row.sunat_id,
            sunat_status: row.sunat_status,
            status,
            xml_url: row.xml_url,
            cdr_url: row.cdr_url,
            sunat_issue_time: row.sunat_issue_time,
            sunat_response_time: row.sunat_response_time,
            production: row.production,
            is_purchase: row.is_purchase,
            faults: row.faults.unwrap_or_else(|| Value::Array(Vec::new())),
            error_message: row.error_message,
            amount: row.amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_documents(rows: Vec<DocumentRow>) -> ServiceResult<Vec<Document>> {
    rows.into_iter().map(Document::try_from).collect()
}

const DOCUMENT_COLUMNS: &str = "id, document_type, serie, numero, sunat_id, sunat_status, status, xml_url, cdr_url, sunat_issue_time, sunat_response_time, production, is_purchase, faults, error_message, amount, created_at, updated_at";

impl DatabaseConnection {
    pub async fn get_document_by_id(&mut self, id: Uuid) -> ServiceResult<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.connection)
        .await?;

        row.map(Document::try_from).transpose()
    }

    pub async fn get_document_by_sunat_id(
        &mut self,
        sunat_id: &str,
    ) -> ServiceResult<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document WHERE sunat_id = $1"
        ))
        .bind(sunat_id)
        .fetch_optional(&mut *self.connection)
        .await?;

        row.map(Document::try_from).transpose()
    }

    /// Inserts the document or replaces the stored version with the same id.
    pub async fn store_document(&mut self, document: Document) -> ServiceResult<Document> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
                INSERT INTO document (
                    id, document_type, serie, numero, sunat_id, sunat_status, status, xml_url, cdr_url,
                    sunat_issue_time, sunat_response_time, production, is_purchase, faults,
                    error_message, amount, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (id) DO UPDATE SET
                    document_type = excluded.document_type,
                    serie = excluded.serie,
                    numero = excluded.numero,
                    sunat_id = excluded.sunat_id,
                    sunat_status = excluded.sunat_status,
                    status = excluded.status,
                    xml_url = excluded.xml_url,
                    cdr_url = excluded.cdr_url,
                    sunat_issue_time = excluded.sunat_issue_time,
                    sunat_response_time = excluded.sunat_response_time,
                    production = excluded.production,
                    is_purchase = excluded.is_purchase,
                    faults = excluded.faults,
                    error_message = excluded.error_message,
                    amount = excluded.amount,
                    updated_at = now()
                RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(document.id)
        .bind(&document.document_type)
        .bind(&document.serie)
        .bind(&document.numero)
        .bind(&document.sunat_id)
        .bind(&document.sunat_status)
        .bind(document.status.code())
        .bind(&document.xml_url)
        .bind(&document.cdr_url)
        .bind(document.sunat_issue_time)
        .bind(document.sunat_response_time)
        .bind(document.production)
        .bind(document.is_purchase)
        .bind(&document.faults)
        .bind(&document.error_message)
        .bind(document.amount)
        .bind(document.created_at)
        .fetch_one(&mut *self.connection)
        .await?;

        row.try_into()
    }

    /// One page of documents matching `filter`, newest first.
    pub async fn get_documents_page(
        &mut self,
        filter: &DocumentFilter,
        limit: u64,
        offset: u64,
    ) -> ServiceResult<(u64, Vec<Document>)> {
        fn push_filter(builder: &mut QueryBuilder<Postgres>, filter: &DocumentFilter) {
            builder.push(" WHERE TRUE");
            if let Some(document_type) = &filter.document_type {
                builder
                    .push(" AND document_type = ")
                    .push_bind(document_type.to_owned());
            }
            if let Some(status) = filter.status {
                builder.push(" AND status = ").push_bind(status.code());
            }
            if let Some(serie) = &filter.serie {
                builder.push(" AND serie = ").push_bind(serie.to_owned());
            }
        }

        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM document");
        push_filter(&mut count_query, filter);
        let count = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.connection)
            .await?;

        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {DOCUMENT_COLUMNS} FROM document"));
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(to_i64(limit))
            .push(" OFFSET ")
            .push_bind(to_i64(offset));
        let rows = query
            .build_query_as::<DocumentRow>()
            .fetch_all(&mut *self.connection)
            .await?;

        Ok((to_u64(count.max(0)), into_documents(rows)?))
    }

    /// Documents of one type, those not yet issued first, then by newest issue time.
    pub async fn get_documents_by_type_page(
        &mut self,
        document_type: DocumentType,
        limit: u64,
        offset: u64,
    ) -> ServiceResult<(u64, Vec<Document>)> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document WHERE document_type = $1")
            .bind(document_type.code())
            .fetch_one(&mut *self.connection)
            .await?;

        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
                SELECT {DOCUMENT_COLUMNS} FROM document
                WHERE document_type = $1
                ORDER BY sunat_issue_time DESC NULLS FIRST, created_at DESC
                LIMIT $2 OFFSET $3
            "#
        ))
        .bind(document_type.code())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&mut *self.connection)
        .await?;

        Ok((to_u64(count.max(0)), into_documents(rows)?))
    }

    /// Aggregator ids of the documents created locally in the given window.
    pub async fn get_sunat_ids_created_between(
        &mut self,
        created_from: DateTime<Utc>,
        created_until: DateTime<Utc>,
    ) -> ServiceResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
                SELECT sunat_id FROM document
                WHERE sunat_id IS NOT NULL AND created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(created_from)
        .bind(created_until)
        .fetch_all(&mut *self.connection)
        .await?;

        Ok(ids)
    }

    pub async fn get_all_sunat_ids(&mut self) -> ServiceResult<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT sunat_id FROM document WHERE sunat_id IS NOT NULL")
            .fetch_all(&mut *self.connection)
            .await?;

        Ok(ids)
    }
}
