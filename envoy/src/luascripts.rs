//! Lua snippets attached to the HTTP connection manager filter chain.

/// Strips impersonation headers from incoming requests so only the
/// authorization service can assert an identity.
pub const REMOVE_IMPERSONATE_HEADERS: &str = r#"
function envoy_on_request(request_handle)
    local headers = request_handle:headers()
    headers:remove("x-gatehouse-impersonate-user")
    headers:remove("x-gatehouse-impersonate-email")
    headers:remove("x-gatehouse-impersonate-groups")
end
"#;

/// Promotes client certificate fields into per-request metadata so the
/// authorization service can evaluate downstream mTLS policies.
pub const SET_CLIENT_CERTIFICATE_METADATA: &str = r#"
function envoy_on_request(request_handle)
    local ssl = request_handle:streamInfo():downstreamSslConnection()
    if ssl == nil then
        return
    end
    local metadata = request_handle:streamInfo():dynamicMetadata()
    metadata:set("gatehouse.client_certificate", "presented", ssl:peerCertificatePresented())
    metadata:set("gatehouse.client_certificate", "validated", ssl:peerCertificateValidated())
    metadata:set("gatehouse.client_certificate", "chain", ssl:urlEncodedPemEncodedPeerCertificateChain())
end
"#;

/// Applies Set-Cookie directives produced by the authorization response.
pub const EXT_AUTHZ_SET_COOKIE: &str = r#"
function envoy_on_response(response_handle)
    local metadata = response_handle:streamInfo():dynamicMetadata():get("envoy.filters.http.ext_authz")
    if metadata == nil then
        return
    end
    local cookies = metadata["set-cookie"]
    if cookies == nil then
        return
    end
    for _, cookie in ipairs(cookies) do
        response_handle:headers():add("set-cookie", cookie)
    end
end
"#;

/// Removes headers that are only meaningful between the proxy and the
/// authorization service before the request reaches the upstream.
pub const CLEAN_UPSTREAM: &str = r#"
function envoy_on_request(request_handle)
    local headers = request_handle:headers()
    headers:remove("x-gatehouse-authorization")
    headers:remove("x-gatehouse-routing-key")
end
"#;

/// Applies per-route response header rewrites published in route metadata.
pub const REWRITE_HEADERS: &str = r#"
function envoy_on_response(response_handle)
    local metadata = response_handle:metadata():get("rewrite_response_headers")
    if metadata == nil then
        return
    end
    local headers = response_handle:headers()
    for _, rewrite in ipairs(metadata) do
        local value = headers:get(rewrite.header)
        if value ~= nil and string.sub(value, 1, string.len(rewrite.prefix)) == rewrite.prefix then
            headers:replace(rewrite.header, rewrite.value .. string.sub(value, string.len(rewrite.prefix) + 1))
        end
    end
end
"#;

/// Normalizes the content type of locally generated replies.
pub const LOCAL_REPLY_TYPE: &str = r#"
function envoy_on_response(response_handle)
    if response_handle:headers():get("x-local-reply") == "true" then
        response_handle:headers():replace("content-type", "text/html; charset=UTF-8")
        response_handle:headers():remove("x-local-reply")
    end
end
"#;

/// Advertises HTTP/3 availability on the TLS listener.
pub const ALT_SVC: &str = r#"
function envoy_on_response(response_handle)
    response_handle:headers():set("alt-svc", 'h3=":443"; ma=86400')
end
"#;
