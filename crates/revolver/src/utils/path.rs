use crate::services::resolver::Endpoint;

/// Builds the full upstream URL for a resolved endpoint and request path.
///
/// This utility constructs the target URL the HTTP client will call by
/// combining the endpoint's scheme, host and port with the ingress path.
///
/// # Parameters
///
/// * `endpoint` - The resolved upstream address; its `secure` flag selects
///   the scheme
/// * `path` - The request path to append, starting with a forward slash
///
/// # Returns
///
/// A complete URL string ready for HTTP client requests
///
/// # URL Format
///
/// The returned URL follows the format:
/// `{http|https}://{host}:{port}{path}`
///
/// # Examples
///
/// ```rust
/// use revolver::services::resolver::Endpoint;
/// use revolver::utils::path::format_target;
///
/// let ep = Endpoint { host: "payments-1.internal".into(), port: 8080, secure: false };
/// assert_eq!(format_target(&ep, "/orders/42"), "http://payments-1.internal:8080/orders/42");
///
/// let ep = Endpoint { host: "identity.internal".into(), port: 9443, secure: true };
/// assert_eq!(format_target(&ep, "/whoami"), "https://identity.internal:9443/whoami");
/// ```
///
/// # Use Cases
///
/// This function is used by the execution engine when:
/// - Forwarding an ingress request to a resolved upstream endpoint
/// - Building target URLs for retry attempts against the same endpoint
///
/// # Notes
///
/// - The `path` must start with a forward slash (`/`); route matching
///   guarantees this for every ingress path
/// - Port numbers are always included in the output, even for standard
///   ports
pub fn format_target(endpoint: &Endpoint, path: &str) -> String {
    let scheme = if endpoint.secure { "https" } else { "http" };
    format!("{}://{}:{}{}", scheme, endpoint.host, endpoint.port, path)
}
