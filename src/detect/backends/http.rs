use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use crate::detect::result::Classification;
use crate::detect::transport::DetectionTransport;
use crate::frame::EncodedFrame;
use crate::multipart;

/// Multipart form field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

/// HTTP transport: one `multipart/form-data` POST per frame.
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse detection endpoint")?;
        match endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported detection scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { agent, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl DetectionTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn classify(&self, frame: &EncodedFrame) -> Result<Classification> {
        let boundary = multipart::new_boundary();
        let body = multipart::encode_file(
            &boundary,
            UPLOAD_FIELD,
            frame.file_name(),
            frame.mime_type,
            &frame.payload,
        );

        let response = match self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", &multipart::content_type_for(&boundary))
            .set("Accept", "application/json")
            .send_bytes(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(anyhow!(
                    "detection service returned status {}: {}",
                    code,
                    detail.trim()
                ));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("post frame to {}", self.endpoint)))
            }
        };

        let text = response.into_string().context("read detection response")?;
        Ok(Classification::from_json(text.as_bytes())?)
    }
}
