//! API Constants for the Dynamics 365 Web API

/// Dynamics 365 Web API version
pub const API_VERSION: &str = "v9.2";

/// Base API path for Dynamics 365
pub const API_BASE_PATH: &str = "/api/data";

/// Full API path with version
pub fn api_path() -> String {
    format!("{}/{}", API_BASE_PATH, API_VERSION)
}

/// Standard headers for Dynamics 365 requests
pub mod headers {
    /// Content type for JSON requests
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// OData version header
    pub const ODATA_VERSION: &str = "4.0";

    /// Prefer header for returning representation
    pub const PREFER_RETURN_REPRESENTATION: &str = "return=representation";

    /// Ask the server to include annotations such as `@odata.etag`
    pub const PREFER_INCLUDE_ANNOTATIONS: &str = "odata.include-annotations=\"*\"";

    /// If-Match value for unversioned records
    pub const IF_MATCH_ANY: &str = "*";

    /// Correlation header echoed by the server into its own logs
    pub const X_CORRELATION_ID: &str = "x-ms-client-request-id";

    /// Prefer value for server-driven paging of collection requests
    pub fn max_page_size(page_size: u32) -> String {
        format!("odata.maxpagesize={}", page_size)
    }
}

/// OData annotations read from response bodies
pub mod annotations {
    pub const ETAG: &str = "@odata.etag";
    pub const NEXT_LINK: &str = "@odata.nextLink";
    pub const COUNT: &str = "@odata.count";
}

/// Build full entity endpoint URL
pub fn entity_endpoint(base_url: &str, entity: &str) -> String {
    format!("{}{}/{}", base_url.trim_end_matches('/'), api_path(), entity)
}

/// Build entity record endpoint URL
pub fn entity_record_endpoint(base_url: &str, entity: &str, id: &str) -> String {
    format!(
        "{}({})",
        entity_endpoint(base_url, entity),
        urlencoding::encode(id)
    )
}
