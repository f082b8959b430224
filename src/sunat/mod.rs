//! Client for the sunat aggregator that signs and submits electronic documents.

use std::time::Duration;

use log::{info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::env;
use crate::models::DocumentType;

pub mod sync;
pub mod ubl;
pub mod xml;

#[derive(Debug, thiserror::Error)]
pub enum SunatError {
    #[error("Sunat API credentials not configured")]
    MissingCredentials,
    #[error("{0}")]
    Request(String),
    #[error("Sunat API responded with status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
    #[error("Sunat API returned an error")]
    Rejected(Value),
    #[error(transparent)]
    Xml(#[from] xml::XmlError),
}

impl From<reqwest::Error> for SunatError {
    fn from(value: reqwest::Error) -> Self {
        SunatError::Request(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub persona_id: String,
    pub persona_token: String,
}

/// The business issuing the documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Supplier {
    pub ruc: String,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct SunatConfig {
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub supplier: Supplier,
    /// Waits between status checks after a document was sent.
    pub poll_delays: Vec<Duration>,
    pub timeout: Duration,
}

impl SunatConfig {
    pub fn from_env() -> Self {
        let credentials = match (
            env::SUNAT_PERSONA_ID.as_ref(),
            env::SUNAT_PERSONA_TOKEN.as_ref(),
        ) {
            (Some(persona_id), Some(persona_token)) => Some(Credentials {
                persona_id: persona_id.to_owned(),
                persona_token: persona_token.to_owned(),
            }),
            _ => None,
        };

        Self {
            base_url: env::SUNAT_API_URL.trim_end_matches('/').to_owned(),
            credentials,
            supplier: Supplier {
                ruc: env::BUSINESS_RUC.to_owned(),
                name: env::BUSINESS_NAME.to_owned(),
                address: env::BUSINESS_ADDRESS.to_owned(),
            },
            poll_delays: [1, 2, 3, 5].into_iter().map(Duration::from_secs).collect(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Reply of `sendBill`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBillResponse {
    pub document_id: String,
    #[serde(default)]
    pub status: String,
}

/// A document as listed by the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub document_type: Option<String>,
    pub status: Option<String>,
    pub file_name: Option<String>,
    pub issue_time: Option<i64>,
    pub response_time: Option<i64>,
    pub xml: Option<String>,
    pub cdr: Option<String>,
    pub production: Option<bool>,
    pub is_purchase: Option<bool>,
    pub faults: Option<Value>,
}

impl RemoteDocument {
    /// Type, serie and number encoded in the file name, `20482674828-03-B001-00000001`.
    pub fn file_name_parts(&self) -> Option<(String, String, String)> {
        let parts: Vec<&str> = self.file_name.as_deref()?.split('-').collect();
        match parts.as_slice() {
            [_, document_type, serie, numero] => Some((
                document_type.to_string(),
                serie.to_string(),
                numero.to_string(),
            )),
            _ => None,
        }
    }

    /// Whether the aggregator is done with the document.
    pub fn is_final(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some("ACEPTADO") | Some("RECHAZADO") | Some("EXCEPCION")
        )
    }
}

pub struct SunatClient {
    config: SunatConfig,
    http: reqwest::Client,
}

impl SunatClient {
    pub fn new(config: SunatConfig) -> Result<Self, SunatError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &SunatConfig {
        &self.config
    }

    pub fn credentials(&self) -> Result<&Credentials, SunatError> {
        self.config
            .credentials
            .as_ref()
            .ok_or(SunatError::MissingCredentials)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn credential_query(&self) -> Result<[(&'static str, String); 2], SunatError> {
        let credentials = self.credentials()?;
        Ok([
            ("personaId", credentials.persona_id.to_owned()),
            ("personaToken", credentials.persona_token.to_owned()),
        ])
    }

    /// Next free correlative of the serie of `document_type`.
    ///
    /// Lookup failures are logged and reported as `None`, only missing credentials fail.
    pub async fn last_document(
        &self,
        document_type: DocumentType,
    ) -> Result<Option<String>, SunatError> {
        let credentials = self.credentials()?;
        let body = json!({
            "personaId": credentials.persona_id,
            "personaToken": credentials.persona_token,
            "type": document_type.code(),
            "serie": document_type.serie(),
        });

        let response = self
            .http
            .post(self.url("/personas/lastDocument/"))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let result = match response {
            Ok(response) => response.json::<Value>().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => Ok(value
                .get("suggestedNumber")
                .and_then(|n| match n {
                    Value::String(s) => Some(s.to_owned()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })),
            Err(e) => {
                warn!("Could not get correlative: {}", e);
                Ok(None)
            }
        }
    }

    /// Submits a document built by [`ubl::build_document`].
    pub async fn send_bill(&self, payload: &Value) -> Result<SendBillResponse, SunatError> {
        self.credentials()?;
        let response = self
            .http
            .post(self.url("/personas/v1/sendBill"))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SunatError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        if body.get("status").and_then(Value::as_str) == Some("ERROR") {
            return Err(SunatError::Rejected(body));
        }

        let sent: SendBillResponse = serde_json::from_value(body)
            .map_err(|e| SunatError::InvalidResponse(e.to_string()))?;
        info!("Sent document {} ({})", sent.document_id, sent.status);
        Ok(sent)
    }

    /// Current state of a document, `None` if the aggregator does not know it.
    pub async fn get_by_id(&self, sunat_id: &str) -> Result<Option<RemoteDocument>, SunatError> {
        let query = self.credential_query()?;
        let response = self
            .http
            .get(self.url(&format!("/documents/{}/getById", sunat_id)))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SunatError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let document = response
            .json::<RemoteDocument>()
            .await
            .map_err(|e| SunatError::InvalidResponse(e.to_string()))?;
        Ok(Some(document))
    }

    /// All documents issued with the configured credentials.
    pub async fn get_all(&self) -> Result<Vec<RemoteDocument>, SunatError> {
        let query = self.credential_query()?;
        let body: Value = self
            .http
            .get(self.url("/documents/getAll"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Value::Array(entries) = body else {
            return Err(SunatError::InvalidResponse(
                "expected a list of documents".to_owned(),
            ));
        };

        entries
            .into_iter()
            .map(|entry| {
                serde_json::from_value(entry)
                    .map_err(|e| SunatError::InvalidResponse(e.to_string()))
            })
            .collect()
    }

    /// Pdf rendered by the aggregator, `format` is one of `A4`, `A5`, `ticket58mm` or `ticket80mm`.
    pub async fn get_pdf(
        &self,
        sunat_id: &str,
        format: &str,
        file_name: &str,
    ) -> Result<Vec<u8>, SunatError> {
        let response = self
            .http
            .get(self.url(&format!(
                "/documents/{}/getPDF/{}/{}.pdf",
                sunat_id, format, file_name
            )))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SunatError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Downloads the (usually zipped) xml of a document.
    pub async fn download_xml(&self, url: &str) -> Result<String, SunatError> {
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SunatError::Request(format!("Timeout downloading XML from {}", url))
            } else {
                SunatError::Request(format!("Request error downloading XML: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SunatError::Request(format!(
                "HTTP error {} downloading XML from {}",
                status.as_u16(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        let body = response.bytes().await?;

        Ok(xml::extract_xml(&body, &content_type, url)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    pub fn test_config(base_url: &str) -> SunatConfig {
        SunatConfig {
            base_url: base_url.to_owned(),
            credentials: Some(Credentials {
                persona_id: "test-persona".to_owned(),
                persona_token: "test-token".to_owned(),
            }),
            supplier: Supplier {
                ruc: "20482674828".to_owned(),
                name: "Taypa".to_owned(),
                address: "Avis Luz y Fuerza D-8".to_owned(),
            },
            poll_delays: vec![Duration::ZERO; 4],
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_last_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/personas/lastDocument/"))
            .and(body_partial_json(json!({"type": "03", "serie": "B001", "personaId": "test-persona"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"suggestedNumber": "00000007"})))
            .mount(&server)
            .await;

        let client = SunatClient::new(test_config(&server.uri())).unwrap();
        let correlative = client.last_document(DocumentType::Ticket).await.unwrap();
        assert_eq!(correlative.as_deref(), Some("00000007"));
    }

    #[tokio::test]
    async fn test_last_document_failure_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = SunatClient::new(test_config(&server.uri())).unwrap();
        assert_eq!(client.last_document(DocumentType::Invoice).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let mut config = test_config("http://127.0.0.1:9");
        config.credentials = None;
        let client = SunatClient::new(config).unwrap();

        assert!(matches!(
            client.last_document(DocumentType::Ticket).await,
            Err(SunatError::MissingCredentials)
        ));
        assert!(matches!(
            client.get_all().await,
            Err(SunatError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_send_bill() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/personas/v1/sendBill"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"documentId": "abc123", "status": "PENDIENTE"})),
            )
            .mount(&server)
            .await;

        let client = SunatClient::new(test_config(&server.uri())).unwrap();
        let sent = client.send_bill(&json!({})).await.unwrap();
        assert_eq!(sent.document_id, "abc123");
    }

    #[tokio::test]
    async fn test_send_bill_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/personas/v1/sendBill"))
            .and(body_partial_json(json!({"fileName": "rejected"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ERROR", "error": {"message": "bad ruc"}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/personas/v1/sendBill"))
            .and(body_partial_json(json!({"fileName": "broken"})))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = SunatClient::new(test_config(&server.uri())).unwrap();

        let err = client
            .send_bill(&json!({"fileName": "rejected"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SunatError::Rejected(_)));

        let err = client
            .send_bill(&json!({"fileName": "broken"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SunatError::UnexpectedStatus { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents/known/getById"))
            .and(query_param("personaToken", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "known",
                "type": "03",
                "status": "ACEPTADO",
                "fileName": "20482674828-03-B001-00000001",
                "issueTime": 1718000000000i64,
                "xml": "https://cdn.example/known.xml",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/documents/unknown/getById"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let client = SunatClient::new(test_config(&server.uri())).unwrap();

        let document = client.get_by_id("known").await.unwrap().unwrap();
        assert!(document.is_final());
        assert_eq!(document.issue_time, Some(1718000000000));
        assert_eq!(
            document.file_name_parts(),
            Some(("03".to_owned(), "B001".to_owned(), "00000001".to_owned()))
        );

        assert_eq!(client.get_by_id("unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_all_rejects_non_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/documents/getAll"))
            .and(query_param("personaId", "test-persona"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let client = SunatClient::new(test_config(&server.uri())).unwrap();
        assert!(matches!(
            client.get_all().await,
            Err(SunatError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_download_xml() {
        let server = MockServer::start().await;
        let body = xml::tests::zipped(&[("doc.xml", xml::tests::INVOICE_XML)]);
        Mock::given(method("GET"))
            .and(path("/doc.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.zip"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SunatClient::new(test_config(&server.uri())).unwrap();
        let content = client
            .download_xml(&format!("{}/doc.zip", server.uri()))
            .await
            .unwrap();
        assert_eq!(content, xml::tests::INVOICE_XML);

        let err = client
            .download_xml(&format!("{}/missing.zip", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("HTTP error 404"));
    }
}
