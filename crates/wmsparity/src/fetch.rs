//! WMS `GetMap` requests against the two servers under test.
//!
//! Both endpoints receive the same rendering intent (bbox, size, CRS,
//! format); only the layer name, the optional style body and the
//! endpoint's own fixed parameters differ.

use crate::config::EndpointConfig;
use crate::extract::Bbox;
use crate::result::{ParityError, ParityResult};
use std::path::{Path, PathBuf};

/// Media type that marks a successful render
pub const PNG_MEDIA_TYPE: &str = "image/png";

/// Parameters shared by every `GetMap` request
pub const FIXED_PARAMS: [(&str, &str); 5] = [
    ("SERVICE", "WMS"),
    ("VERSION", "1.3.0"),
    ("REQUEST", "GetMap"),
    ("SRS", "EPSG:4326"),
    ("FORMAT", PNG_MEDIA_TYPE),
];

/// Call-specific part of a `GetMap` request
#[derive(Debug, Clone, PartialEq)]
pub struct GetMapRequest {
    /// `LAYERS` value
    pub layers: String,
    /// `BBOX` value
    pub bbox: String,
    /// `WIDTH` value
    pub width: u32,
    /// `HEIGHT` value
    pub height: u32,
    /// `SLD_BODY` value, if any
    pub style: Option<String>,
}

impl GetMapRequest {
    /// Request `layers` over `bbox` at the given size
    #[must_use]
    pub fn new(layers: impl Into<String>, bbox: &Bbox, width: u32, height: u32) -> Self {
        Self {
            layers: layers.into(),
            bbox: bbox.as_str().to_string(),
            width,
            height,
            style: None,
        }
    }

    /// Attach a style body; an empty style is not sent
    #[must_use]
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        let style = style.into();
        self.style = (!style.is_empty()).then_some(style);
        self
    }

    /// Full parameter list for `endpoint`
    ///
    /// Order: fixed WMS set, call-specific values, the project pointer, then
    /// the endpoint's extra parameters (which replace same-named keys).
    #[must_use]
    pub fn params(
        &self,
        endpoint: &EndpointConfig,
        project: Option<&str>,
    ) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = FIXED_PARAMS
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        params.push(("BBOX".to_string(), self.bbox.clone()));
        params.push(("WIDTH".to_string(), self.width.to_string()));
        params.push(("HEIGHT".to_string(), self.height.to_string()));
        params.push(("LAYERS".to_string(), self.layers.clone()));
        if let Some(style) = &self.style {
            params.push(("SLD_BODY".to_string(), style.clone()));
        }

        let project = endpoint
            .project_param
            .as_ref()
            .zip(project)
            .map(|(key, path)| (key.clone(), path.to_string()));
        let extras = project.into_iter().chain(
            endpoint
                .extra_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        for (key, value) in extras {
            match params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
                Some(slot) => slot.1 = value,
                None => params.push((key, value)),
            }
        }
        params
    }
}

/// Build the request URL on top of the endpoint's base URL
pub fn getmap_url(base: &str, params: &[(String, String)]) -> ParityResult<url::Url> {
    let mut url = url::Url::parse(base).map_err(|e| ParityError::InvalidEndpoint {
        url: base.to_string(),
        message: e.to_string(),
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Raw response of one render request
#[derive(Debug, Clone)]
pub struct RenderResponse {
    /// Request URL
    pub url: String,
    /// HTTP status (informational; content type decides success)
    pub status: u16,
    /// `Content-Type` header, if present
    pub content_type: Option<String>,
    /// Response body
    pub body: Vec<u8>,
    /// Where the body was written
    pub saved_to: PathBuf,
}

impl RenderResponse {
    /// Whether the server returned a PNG image
    #[must_use]
    pub fn is_png(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_png_media_type)
    }

    /// Body as text, for error documents
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// `image/png`, ignoring parameters and case
#[must_use]
pub fn is_png_media_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|m| m.trim().eq_ignore_ascii_case(PNG_MEDIA_TYPE))
}

/// Issues `GetMap` requests over one shared connection pool
#[derive(Debug, Clone)]
pub struct MapFetcher {
    client: reqwest::Client,
    project: Option<String>,
}

impl MapFetcher {
    /// Create a fetcher with transport defaults
    pub fn new() -> ParityResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ParityError::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Create a fetcher around an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            project: None,
        }
    }

    /// Server-side project path sent to endpoints that declare a `project_param`
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Request a map and persist the body to `save_as`
    ///
    /// The body is written whatever the content type, so error documents are
    /// kept for the report. No retry; transport failures are returned as-is.
    pub async fn fetch(
        &self,
        endpoint: &EndpointConfig,
        request: &GetMapRequest,
        save_as: &Path,
    ) -> ParityResult<RenderResponse> {
        let params = request.params(endpoint, self.project.as_deref());
        let url = getmap_url(&endpoint.url, &params)?;
        let url_text = url.to_string();
        tracing::debug!(endpoint = %endpoint.label, url = %url_text, "GetMap");

        let transport = |source| ParityError::Transport {
            url: url_text.clone(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport)?.to_vec();

        std::fs::write(save_as, &body)?;

        Ok(RenderResponse {
            url: url_text,
            status,
            content_type,
            body,
            saved_to: save_as.to_path_buf(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    fn request() -> GetMapRequest {
        GetMapRequest::new("sf:roads", &Bbox::parse("1,2,3,4").unwrap(), 300, 200)
    }

    fn value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_fixed_params_present() {
        let params = request().params(&EndpointConfig::new("gs", "http://h/wms?"), None);
        assert_eq!(value(&params, "SERVICE"), Some("WMS"));
        assert_eq!(value(&params, "VERSION"), Some("1.3.0"));
        assert_eq!(value(&params, "REQUEST"), Some("GetMap"));
        assert_eq!(value(&params, "SRS"), Some("EPSG:4326"));
        assert_eq!(value(&params, "FORMAT"), Some("image/png"));
        assert_eq!(value(&params, "BBOX"), Some("1,2,3,4"));
        assert_eq!(value(&params, "WIDTH"), Some("300"));
        assert_eq!(value(&params, "HEIGHT"), Some("200"));
        assert_eq!(value(&params, "LAYERS"), Some("sf:roads"));
        assert_eq!(value(&params, "SLD_BODY"), None);
    }

    #[test]
    fn test_style_param() {
        let params = request()
            .with_style("<sld/>")
            .params(&EndpointConfig::new("gs", "http://h/wms?"), None);
        assert_eq!(value(&params, "SLD_BODY"), Some("<sld/>"));

        assert!(request().with_style("").style.is_none());
    }

    #[test]
    fn test_project_param_only_where_declared() {
        let project = "/data/project.qgs";
        let qgis = EndpointConfig::new("qgis", "http://h/qgis?").with_project_param("MAP");
        let gs = EndpointConfig::new("gs", "http://h/wms?");
        assert_eq!(
            value(&request().params(&qgis, Some(project)), "MAP"),
            Some("/data/project.qgs")
        );
        assert_eq!(value(&request().params(&gs, Some(project)), "MAP"), None);
    }

    #[test]
    fn test_default_source_sends_no_project_pointer() {
        let config = HarnessConfig::default();
        let fetcher = MapFetcher::new().unwrap();
        let params = request().params(&config.source, fetcher.project.as_deref());
        assert_eq!(value(&params, "MAP"), None);
        assert!(params.iter().all(|(_, v)| !v.contains("project.yaml")));
    }

    #[test]
    fn test_extra_params_replace_same_key() {
        let endpoint = EndpointConfig::new("gs", "http://h/wms?")
            .with_param("format", "image/png; mode=8bit")
            .with_param("TRANSPARENT", "TRUE");
        let params = request().params(&endpoint, None);
        assert_eq!(value(&params, "FORMAT"), Some("image/png; mode=8bit"));
        assert_eq!(value(&params, "TRANSPARENT"), Some("TRUE"));
        assert_eq!(params.iter().filter(|(k, _)| k.eq_ignore_ascii_case("format")).count(), 1);
    }

    #[test]
    fn test_url_preserves_base_query() {
        let params = vec![("LAYERS".to_string(), "sf:roads".to_string())];
        let url = getmap_url("http://h/ows?map=/p.qgs", &params).unwrap();
        assert_eq!(url.as_str(), "http://h/ows?map=/p.qgs&LAYERS=sf%3Aroads");

        let url = getmap_url("http://h/wms?", &params).unwrap();
        assert_eq!(url.query(), Some("LAYERS=sf%3Aroads"));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = getmap_url("not a url", &[]).unwrap_err();
        assert!(matches!(err, ParityError::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_png_media_type() {
        assert!(is_png_media_type("image/png"));
        assert!(is_png_media_type("IMAGE/PNG; charset=binary"));
        assert!(!is_png_media_type("application/vnd.ogc.se_xml"));
        assert!(!is_png_media_type("text/xml"));
        assert!(!is_png_media_type("image/pngx"));
    }

    #[test]
    fn test_response_without_content_type_is_not_png() {
        let response = RenderResponse {
            url: String::new(),
            status: 200,
            content_type: None,
            body: Vec::new(),
            saved_to: PathBuf::new(),
        };
        assert!(!response.is_png());
    }
}
