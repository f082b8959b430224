//! Reconciling local documents with the state kept by the aggregator.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::Serialize;

use crate::database::DatabaseConnection;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{local_day_bounds, local_today, Document, DocumentStatus};

use super::{xml, RemoteDocument, SunatClient};

/// Values read from the xml of a remote document.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessedXml {
    pub amount: Option<Decimal>,
    pub serie: Option<String>,
    pub numero: Option<String>,
    pub xml_processed: bool,
    pub error: Option<String>,
}

/// A document that could not be synced completely.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SyncError {
    pub sunat_id: String,
    pub xml_url: Option<String>,
    pub error: String,
}

/// Downloads the xml of `remote` and reads amount, serie and number from it.
/// Failures are reported in [`ProcessedXml::error`].
pub async fn process_document(client: &SunatClient, remote: &RemoteDocument) -> ProcessedXml {
    let mut processed = ProcessedXml::default();

    let Some(url) = remote.xml.as_deref() else {
        processed.error = Some("No XML URL in document".to_owned());
        return processed;
    };

    let content = match client.download_xml(url).await {
        Ok(content) => content,
        Err(e) => {
            processed.error = Some(e.to_string());
            return processed;
        }
    };

    processed.amount = xml::parse_amount(&content);
    if let Some((serie, numero)) = xml::parse_serie_numero(&content) {
        processed.serie = Some(serie);
        processed.numero = Some(numero);
    }
    processed.xml_processed = true;
    processed
}

/// Merges the remote state into `document`. Values only overwrite local ones when present.
pub fn apply_remote(
    document: &mut Document,
    remote: &RemoteDocument,
    processed: &ProcessedXml,
    now: DateTime<Utc>,
) {
    if let Some(id) = &remote.id {
        document.sunat_id = Some(id.to_owned());
    }
    if let Some(status) = &remote.status {
        document.sunat_status = status.to_owned();
        document.status = DocumentStatus::from_sunat_status(status);
    }

    let parts = remote.file_name_parts();
    if let Some(document_type) = remote
        .document_type
        .as_ref()
        .or(parts.as_ref().map(|(t, _, _)| t))
    {
        document.document_type = document_type.to_owned();
    }
    if let Some(serie) = parts
        .as_ref()
        .map(|(_, s, _)| s)
        .or(processed.serie.as_ref())
    {
        document.serie = serie.to_owned();
    }
    if let Some(numero) = parts
        .as_ref()
        .map(|(_, _, n)| n)
        .or(processed.numero.as_ref())
    {
        document.numero = numero.to_owned();
    }

    if remote.xml.is_some() {
        document.xml_url = remote.xml.clone();
    }
    if remote.cdr.is_some() {
        document.cdr_url = remote.cdr.clone();
    }
    if remote.issue_time.is_some() {
        document.sunat_issue_time = remote.issue_time;
    }
    if remote.response_time.is_some() {
        document.sunat_response_time = remote.response_time;
    }
    if let Some(production) = remote.production {
        document.production = production;
    }
    if let Some(is_purchase) = remote.is_purchase {
        document.is_purchase = is_purchase;
    }
    if let Some(faults) = &remote.faults {
        document.faults = faults.to_owned();
    }
    if let Some(amount) = processed.amount {
        document.amount = Some(amount);
    }
    document.updated_at = now;
}

/// Creates or updates the local document with the aggregator id of `remote`.
pub async fn sync_from_sunat(
    db: &mut DatabaseConnection,
    remote: &RemoteDocument,
    processed: &ProcessedXml,
) -> ServiceResult<Document> {
    let Some(sunat_id) = remote.id.as_deref() else {
        return Err(ServiceError::BadGateway(
            "Invalid response format: document without id".to_owned(),
        ));
    };

    let now = Utc::now();
    let mut document = match db.get_document_by_sunat_id(sunat_id).await? {
        Some(document) => document,
        None => Document::new(now),
    };
    apply_remote(&mut document, remote, processed, now);
    db.store_document(document).await
}

/// Syncs every remote document. A failed xml download still stores the document
/// but is reported as an error.
pub async fn sync_documents(
    db: &mut DatabaseConnection,
    client: &SunatClient,
    remotes: &[RemoteDocument],
) -> (usize, Vec<SyncError>) {
    let mut synced = 0;
    let mut errors = Vec::new();

    for remote in remotes {
        let sunat_id = remote.id.clone().unwrap_or_else(|| "unknown".to_owned());
        let processed = process_document(client, remote).await;

        match sync_from_sunat(db, remote, &processed).await {
            Ok(document) => {
                synced += 1;
                info!(
                    "Synced {} (type {}, amount {})",
                    document.full_number(),
                    document.document_type,
                    document
                        .amount
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "-".to_owned())
                );
                if let Some(error) = processed.error {
                    errors.push(SyncError {
                        sunat_id,
                        xml_url: remote.xml.clone(),
                        error,
                    });
                }
            }
            Err(e) => {
                warn!("Could not sync document {}: {}", sunat_id, e);
                errors.push(SyncError {
                    sunat_id,
                    xml_url: remote.xml.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    (synced, errors)
}

/// Keeps the remote documents created locally today and those not known locally at all.
pub async fn filter_today(
    db: &mut DatabaseConnection,
    remotes: Vec<RemoteDocument>,
) -> ServiceResult<Vec<RemoteDocument>> {
    let (start, end) = local_day_bounds(local_today());
    let today: HashSet<String> = db
        .get_sunat_ids_created_between(start, end)
        .await?
        .into_iter()
        .collect();
    let known: HashSet<String> = db.get_all_sunat_ids().await?.into_iter().collect();

    Ok(remotes
        .into_iter()
        .filter(|remote| match remote.id.as_deref() {
            Some(id) => today.contains(id) || !known.contains(id),
            None => false,
        })
        .collect())
}

/// Waits for the aggregator to finish with a freshly sent document, refreshing the local
/// copy after every check. Once the document is final it is synced together with its xml.
///
/// Runs on the connection of the caller, polling never holds a second one.
pub async fn poll_document(
    db: &mut DatabaseConnection,
    client: &SunatClient,
    mut document: Document,
) -> ServiceResult<Document> {
    let Some(sunat_id) = document.sunat_id.clone() else {
        return Ok(document);
    };

    for delay in client.config().poll_delays.iter().copied() {
        tokio::time::sleep(delay).await;

        let remote = match client.get_by_id(&sunat_id).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                warn!("Document {} not yet known to sunat", sunat_id);
                continue;
            }
            Err(e) => {
                warn!("Could not poll document {}: {}", sunat_id, e);
                continue;
            }
        };

        if remote.is_final() {
            let processed = process_document(client, &remote).await;
            if let Some(error) = &processed.error {
                warn!("Could not process xml of {}: {}", sunat_id, error);
            }
            document = sync_from_sunat(db, &remote, &processed).await?;
            info!(
                "Document {} finished with status {}",
                document.full_number(),
                document.sunat_status
            );
            break;
        }

        apply_remote(&mut document, &remote, &ProcessedXml::default(), Utc::now());
        document = db.store_document(document).await?;
    }

    Ok(document)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn remote() -> RemoteDocument {
        RemoteDocument {
            id: Some("675c532840264100151a3644".to_owned()),
            document_type: Some("03".to_owned()),
            status: Some("ACEPTADO".to_owned()),
            file_name: Some("20482674828-03-B001-00000012".to_owned()),
            issue_time: Some(1718000000000),
            response_time: Some(1718000005000),
            xml: Some("https://cdn.example/doc.zip".to_owned()),
            cdr: Some("https://cdn.example/cdr.zip".to_owned()),
            production: Some(true),
            is_purchase: None,
            faults: Some(json!([])),
        }
    }

    #[test]
    fn test_apply_remote_prefers_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 15, 0, 0).unwrap();
        let mut document = Document::new(now);
        let processed = ProcessedXml {
            amount: Some(dec!(59.00)),
            serie: Some("B999".to_owned()),
            numero: Some("99999999".to_owned()),
            xml_processed: true,
            error: None,
        };

        apply_remote(&mut document, &remote(), &processed, now);

        assert_eq!(document.sunat_id.as_deref(), Some("675c532840264100151a3644"));
        assert_eq!(document.status, DocumentStatus::Accepted);
        assert_eq!(document.sunat_status, "ACEPTADO");
        assert_eq!(document.full_number(), "B001-00000012");
        assert_eq!(document.document_type, "03");
        assert_eq!(document.amount, Some(dec!(59.00)));
        assert!(document.production);
        assert!(!document.is_purchase);
    }

    #[test]
    fn test_apply_remote_falls_back_to_xml_values() {
        let now = Utc::now();
        let mut document = Document::new(now);
        document.amount = Some(dec!(12.50));

        let remote = RemoteDocument {
            id: Some("abc".to_owned()),
            status: Some("PENDIENTE".to_owned()),
            ..Default::default()
        };
        let processed = ProcessedXml {
            serie: Some("F001".to_owned()),
            numero: Some("00000003".to_owned()),
            ..Default::default()
        };

        apply_remote(&mut document, &remote, &processed, now);

        assert_eq!(document.status, DocumentStatus::Pending);
        assert_eq!(document.full_number(), "F001-00000003");
        assert_eq!(document.amount, Some(dec!(12.50)));
        assert_eq!(document.xml_url, None);
    }

    #[tokio::test]
    async fn test_process_document_without_xml() {
        let client = SunatClient::new(super::super::tests::test_config("http://127.0.0.1:9"))
            .unwrap();
        let remote = RemoteDocument {
            id: Some("abc".to_owned()),
            ..Default::default()
        };

        let processed = process_document(&client, &remote).await;
        assert!(!processed.xml_processed);
        assert_eq!(processed.error.as_deref(), Some("No XML URL in document"));
    }
}
