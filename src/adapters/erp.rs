//! SOAP submission of the import template to the ERP web service.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::pipeline::Reportable;
use crate::core::safety::{truncate_chars, MAX_RESPONSE_EXCERPT};
use crate::core::StepError;
use crate::domain::{StepDetail, StepKind, StepOutcome};

/// Default SOAP request timeout in seconds
pub const DEFAULT_ERP_TIMEOUT_SECS: u64 = 60;

/// Substring that marks a SOAP fault in an otherwise 200 response
pub const DEFAULT_FAULT_MARKER: &str = "<faultcode>";

const TARGET: &str = "ERP";

/// Parameters of one `run` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Public name of the import template
    pub template: String,

    /// Connection pool alias
    pub pool_alias: String,

    /// Language code
    pub language: String,
}

/// Successful submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub http_status: u16,
    pub template: String,
}

impl Reportable for Submission {
    fn outcome(&self) -> StepOutcome {
        StepOutcome::ok(
            StepKind::Submit,
            format!("Import template {} accepted by the ERP", self.template),
        )
        .with_detail(StepDetail::Submitted {
            http_status: self.http_status,
        })
    }
}

/// Client for the ERP's SOAP web service
#[derive(Debug, Clone)]
pub struct ErpSubmitter {
    client: Client,
    url: Option<String>,
    user: String,
    password: String,
    timeout: Duration,
    fault_marker: String,
}

impl ErpSubmitter {
    /// Create a submitter; `url` may be absent until a run needs it
    pub fn new(
        url: Option<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        if accept_invalid_certs {
            warn!(target: "security", "TLS certificate validation disabled for ERP endpoint");
        }

        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("Failed to build ERP HTTP client")?;

        Ok(Self {
            client,
            url,
            user: user.into(),
            password: password.into(),
            timeout,
            fault_marker: DEFAULT_FAULT_MARKER.to_string(),
        })
    }

    pub fn with_fault_marker(mut self, marker: impl Into<String>) -> Self {
        self.fault_marker = marker.into();
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Build the SOAP envelope for a `run` call
    pub fn envelope(request: &SubmitRequest) -> String {
        format!(
            concat!(
                r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
                r#"xmlns:wss="http://www.adonix.com/WSS">"#,
                "<soapenv:Header/>",
                "<soapenv:Body>",
                "<wss:run>",
                "<callContext>",
                "<codeLang>{language}</codeLang>",
                "<poolAlias>{pool}</poolAlias>",
                "<requestConfig>adxwss.optreturn=JSON</requestConfig>",
                "</callContext>",
                "<publicName>{template}</publicName>",
                "</wss:run>",
                "</soapenv:Body>",
                "</soapenv:Envelope>"
            ),
            language = xml_escape(&request.language),
            pool = xml_escape(&request.pool_alias),
            template = xml_escape(&request.template),
        )
    }

    /// POST the envelope and classify the response
    #[instrument(skip(self), fields(template = %request.template))]
    pub async fn submit(&self, request: &SubmitRequest) -> Result<Submission, StepError> {
        let url = self.url.as_deref().ok_or(StepError::NotConfigured("ERP URL"))?;

        debug!(%url, "Submitting import template");

        let response = self
            .client
            .post(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(Self::envelope(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StepError::NetworkTimeout {
                        target: TARGET.to_string(),
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    StepError::Unreachable {
                        target: TARGET.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| StepError::Protocol {
            target: TARGET.to_string(),
            reason: e.to_string(),
        })?;

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "ERP rejected the request");
            return Err(StepError::ErpStatus {
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_RESPONSE_EXCERPT),
            });
        }

        if body.contains(&self.fault_marker) {
            warn!("ERP returned a SOAP fault");
            return Err(StepError::SoapFault {
                excerpt: truncate_chars(&body, MAX_RESPONSE_EXCERPT),
            });
        }

        info!("Import template accepted");
        Ok(Submission {
            http_status: status.as_u16(),
            template: request.template.clone(),
        })
    }
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;

    fn request() -> SubmitRequest {
        SubmitRequest {
            template: "KLAES".to_string(),
            pool_alias: "PRODUCTION".to_string(),
            language: "SPA".to_string(),
        }
    }

    #[test]
    fn test_envelope_contents() {
        let envelope = ErpSubmitter::envelope(&request());

        assert!(envelope.contains(r#"xmlns:wss="http://www.adonix.com/WSS""#));
        assert!(envelope.contains("<codeLang>SPA</codeLang>"));
        assert!(envelope.contains("<poolAlias>PRODUCTION</poolAlias>"));
        assert!(envelope.contains("<requestConfig>adxwss.optreturn=JSON</requestConfig>"));
        assert!(envelope.contains("<publicName>KLAES</publicName>"));
    }

    #[test]
    fn test_envelope_escapes_values() {
        let mut req = request();
        req.template = "A<B&C".to_string();
        let envelope = ErpSubmitter::envelope(&req);
        assert!(envelope.contains("<publicName>A&lt;B&amp;C</publicName>"));
    }

    #[tokio::test]
    async fn test_missing_url_is_configuration_error() {
        let submitter = ErpSubmitter::new(None, "u", "p", Duration::from_secs(1), false).unwrap();
        let err = submitter.submit(&request()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
    }

    #[tokio::test]
    async fn test_unreachable_erp_is_transient() {
        let submitter = ErpSubmitter::new(
            Some("http://127.0.0.1:9/soap".to_string()),
            "u",
            "p",
            Duration::from_secs(2),
            false,
        )
        .unwrap();
        let err = submitter.submit(&request()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
