//! Online ticket endpoints, used outside sync cycles.

use std::fmt;
use std::time::Duration;

use reqwest::{multipart, Client, Method, Request, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::config::SyncSettings;
use crate::models::{Photo, TicketPayload};
use crate::sync::{
    classify, decode_body, normalize_base_url, parse_api_error, TransportError, TransportResult,
};
use crate::util::normalize_text_option;

use super::types::{
    CreateTicketResponse, Page, PageRequest, RemoteTicket, TicketFilters, TicketSummary,
    TicketUpdate, UploadedPhoto,
};

/// HTTP client for the `/tickets` resource.
#[derive(Clone)]
pub struct TicketsApi {
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
    client: Client,
}

impl fmt::Debug for TicketsApi {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TicketsApi")
            .field("base_url", &self.base_url.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TicketsApi {
    pub fn new(
        api_base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let base = normalize_base_url(api_base_url.into())?;
        let base_url = Url::parse(&base)
            .map_err(|error| TransportError::InvalidConfiguration(error.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidConfiguration(format!(
                "{base} cannot be used as an API base URL"
            )));
        }
        Ok(Self {
            base_url,
            auth_token: normalize_text_option(auth_token),
            timeout,
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn from_settings(settings: &SyncSettings) -> TransportResult<Self> {
        let base = settings.api_base_url.clone().ok_or_else(|| {
            TransportError::InvalidConfiguration("api_base_url is not configured".to_string())
        })?;
        Self::new(
            base,
            settings.auth_token.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub async fn create(&self, payload: &TicketPayload) -> TransportResult<CreateTicketResponse> {
        let request = self.create_request(payload)?;
        self.execute(request).await
    }

    pub async fn get_by_id(&self, id: &str) -> TransportResult<RemoteTicket> {
        let request = self.request(Method::GET, &["tickets", id])?.build()?;
        self.execute(request).await
    }

    pub async fn get_by_number(&self, ticket_number: &str) -> TransportResult<RemoteTicket> {
        let request = self
            .request(Method::GET, &["tickets", "number", ticket_number])?
            .build()?;
        self.execute(request).await
    }

    pub async fn update(&self, id: &str, update: &TicketUpdate) -> TransportResult<RemoteTicket> {
        let request = self
            .request(Method::PATCH, &["tickets", id])?
            .json(update)
            .build()?;
        self.execute(request).await
    }

    pub async fn list(
        &self,
        filters: &TicketFilters,
        page: &PageRequest,
    ) -> TransportResult<Page<TicketSummary>> {
        let request = self.list_request(filters, page)?;
        self.execute(request).await
    }

    pub async fn search(&self, query: &str) -> TransportResult<Vec<TicketSummary>> {
        let request = self
            .request(Method::GET, &["tickets", "search"])?
            .query(&[("q", query.trim())])
            .build()?;
        self.execute(request).await
    }

    /// Cancel a ticket on the server.
    pub async fn void(&self, id: &str, reason: &str) -> TransportResult<RemoteTicket> {
        let request = self.void_request(id, reason)?;
        self.execute(request).await
    }

    /// Upload a photo for a ticket the server already knows.
    pub async fn upload_photo(
        &self,
        server_ticket_id: &str,
        photo: &Photo,
    ) -> TransportResult<UploadedPhoto> {
        let request = self.upload_request(server_ticket_id, photo)?;
        self.execute(request).await
    }

    fn url(&self, segments: &[&str]) -> TransportResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                TransportError::InvalidConfiguration("API base URL cannot hold a path".to_string())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> TransportResult<RequestBuilder> {
        let mut builder = self
            .client
            .request(method, self.url(segments)?)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    fn create_request(&self, payload: &TicketPayload) -> TransportResult<Request> {
        Ok(self.request(Method::POST, &["tickets"])?.json(payload).build()?)
    }

    fn list_request(&self, filters: &TicketFilters, page: &PageRequest) -> TransportResult<Request> {
        let mut query = filters.query_pairs();
        query.extend(page.query_pairs());
        Ok(self
            .request(Method::GET, &["tickets"])?
            .query(&query)
            .build()?)
    }

    fn void_request(&self, id: &str, reason: &str) -> TransportResult<Request> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "a reason is required to void a ticket".to_string(),
            ));
        }
        Ok(self
            .request(Method::POST, &["tickets", id, "void"])?
            .json(&serde_json::json!({ "reason": reason }))
            .build()?)
    }

    fn upload_request(&self, server_ticket_id: &str, photo: &Photo) -> TransportResult<Request> {
        let extension = photo
            .mime_type
            .strip_prefix("image/")
            .filter(|subtype| !subtype.is_empty())
            .unwrap_or("bin");
        let file_part = multipart::Part::bytes(photo.data.clone())
            .file_name(format!("{}.{extension}", photo.id))
            .mime_str(&photo.mime_type)?;
        let form = multipart::Form::new()
            .part("photo", file_part)
            .text("type", photo.kind.as_str());

        Ok(self
            .request(Method::POST, &["tickets", server_ticket_id, "photos"])?
            .multipart(form)
            .build()?)
    }

    async fn execute<T: DeserializeOwned>(&self, request: Request) -> TransportResult<T> {
        let method = request.method().clone();
        let path = request.url().path().to_string();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|error| classify(error, self.timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| classify(error, self.timeout))?;

        if !status.is_success() {
            tracing::warn!("{method} {path} failed with HTTP {}", status.as_u16());
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        tracing::debug!("{method} {path} returned HTTP {}", status.as_u16());
        decode_body(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{PageInfo, SortOrder};
    use crate::models::{PhotoKind, TicketId, TicketStatus};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;

    fn api(token: Option<&str>) -> TicketsApi {
        TicketsApi::new(
            "https://api.example.com/api/v1/",
            token.map(ToString::to_string),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    fn query(request: &Request) -> Vec<(String, String)> {
        request
            .url()
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    #[test]
    fn rejects_invalid_base_urls() {
        assert!(TicketsApi::new("api.example.com", None, Duration::from_secs(1)).is_err());
        assert!(TicketsApi::new("  ", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn path_segments_are_escaped() {
        let request = api(None)
            .request(Method::GET, &["tickets", "number", "GPS/2026 01"])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/api/v1/tickets/number/GPS%2F2026%2001"
        );
    }

    #[test]
    fn bearer_token_is_sent_when_configured() {
        let with_token = api(Some("secret"))
            .request(Method::GET, &["tickets", "T1"])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            with_token.headers()[reqwest::header::AUTHORIZATION],
            "Bearer secret"
        );

        let without = api(None)
            .request(Method::GET, &["tickets", "T1"])
            .unwrap()
            .build()
            .unwrap();
        assert!(without.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn list_sends_filters_and_pagination() {
        let filters = TicketFilters {
            search: Some("  ".to_string()),
            status: vec![TicketStatus::Unpaid, TicketStatus::Overdue],
            date_from: NaiveDate::from_ymd_opt(2026, 3, 1),
            min_amount: Some(50.0),
            officer_id: Some("OFF-7".to_string()),
            ..TicketFilters::default()
        };
        let page = PageRequest {
            page: Some(2),
            limit: Some(20),
            sort_by: None,
            sort_order: Some(SortOrder::Desc),
        };
        let request = api(None).list_request(&filters, &page).unwrap();

        assert_eq!(request.url().path(), "/api/v1/tickets");
        assert_eq!(
            query(&request),
            vec![
                ("officerId".to_string(), "OFF-7".to_string()),
                ("status".to_string(), "unpaid,overdue".to_string()),
                ("dateFrom".to_string(), "2026-03-01".to_string()),
                ("minAmount".to_string(), "50".to_string()),
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "20".to_string()),
                ("sortOrder".to_string(), "desc".to_string()),
            ]
        );
    }

    #[test]
    fn void_requires_a_reason() {
        let client = api(None);
        assert!(client.void_request("T1", " ").is_err());

        let request = client.void_request("T1", "duplicate entry").unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/api/v1/tickets/T1/void");
        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({ "reason": "duplicate entry" }));
    }

    #[test]
    fn photo_upload_is_multipart() {
        let photo = Photo::new(TicketId::new(), PhotoKind::Plate, "image/jpeg", vec![1, 2, 3])
            .unwrap();
        let request = api(Some("secret")).upload_request("S1", &photo).unwrap();

        assert_eq!(request.url().path(), "/api/v1/tickets/S1/photos");
        let content_type = request.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[test]
    fn listing_body_decodes_into_a_page() {
        let body = r#"{
            "success": true,
            "data": [{
                "id": "S1",
                "ticketNumber": "GPS-000001",
                "vehicleReg": "GR-1234-21",
                "status": "unpaid",
                "totalFine": 150.0,
                "issuedAt": "2026-03-01T09:30:00Z",
                "officerName": "Sgt. Owusu",
                "offenceCount": 1
            }],
            "pagination": {
                "page": 1, "limit": 20, "totalItems": 1, "totalPages": 1,
                "hasNextPage": false, "hasPrevPage": false
            }
        }"#;
        let page: Page<TicketSummary> = decode_body(StatusCode::OK, body).unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].ticket_number, "GPS-000001");
        assert_eq!(
            page.pagination,
            PageInfo {
                page: 1,
                limit: 20,
                total_items: 1,
                total_pages: 1,
                has_next_page: false,
                has_prev_page: false,
            }
        );
    }

    #[test]
    fn remote_ticket_keeps_unknown_fields() {
        let body = r#"{"success":true,"data":{
            "id":"S1","ticketNumber":"GPS-000001","status":"cancelled",
            "totalFine":150,"voidReason":"duplicate entry"
        }}"#;
        let ticket: RemoteTicket = decode_body(StatusCode::OK, body).unwrap();

        assert_eq!(ticket.status, TicketStatus::Cancelled);
        assert_eq!(ticket.details["voidReason"], "duplicate entry");
    }

    #[test]
    fn debug_output_redacts_token() {
        let rendered = format!("{:?}", api(Some("secret")));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
