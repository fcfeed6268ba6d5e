use super::*;
use maplit::btreemap;

fn mk_policy(from: &str, to: &[&str]) -> Policy {
    Policy {
        from: from.to_string(),
        to: to.iter().map(|to| WeightedUrl::parse_str(to)).collect(),
        ..Default::default()
    }
}

#[test]
fn valid_policy() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend:8080"]);
    policy.validate().expect("policy must be valid");
    let id = policy.route_id().expect("route id");
    assert_eq!(id.len(), 16);
}

#[test]
fn source_url_must_parse() {
    let mut policy = mk_policy("not a url", &["https://backend"]);
    assert_eq!(
        policy.validate(),
        Err(PolicyError::InvalidSourceUrl("not a url".to_string()))
    );
}

#[test]
fn source_url_must_not_have_a_path() {
    let mut policy = mk_policy("https://app.example.com/foo", &["https://backend"]);
    assert_eq!(
        policy.validate(),
        Err(PolicyError::SourceUrlHasPath(
            "https://app.example.com/foo".to_string()
        ))
    );

    // A bare trailing slash is not a path.
    let mut policy = mk_policy("https://app.example.com/", &["https://backend"]);
    policy.validate().expect("trailing slash is allowed");
}

#[test]
fn exactly_one_destination() {
    let mut policy = mk_policy("https://app.example.com", &[]);
    assert_eq!(policy.validate(), Err(PolicyError::MissingDestination));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.redirect = Some(PolicyRedirect {
        host_redirect: Some("other.example.com".to_string()),
        ..Default::default()
    });
    assert_eq!(policy.validate(), Err(PolicyError::MissingDestination));

    let mut policy = mk_policy("https://app.example.com", &[]);
    policy.response = Some(DirectResponse {
        status: 200,
        body: "OK".to_string(),
    });
    policy.validate().expect("a direct response alone is valid");
}

#[test]
fn mixed_transport_schemes() {
    let mut policy = mk_policy("https://app.example.com", &["https://x", "tcp://y:22"]);
    assert_eq!(
        policy.validate(),
        Err(PolicyError::MixedTransportSchemes("tcp"))
    );

    let mut policy = mk_policy("udp://app.example.com:5000", &["udp://y:53", "https://x"]);
    assert_eq!(
        policy.validate(),
        Err(PolicyError::MixedTransportSchemes("udp"))
    );

    let mut policy = mk_policy("tcp://app.example.com:22", &["tcp://x:22", "tcp://y:22"]);
    policy.validate().expect("all-tcp destinations are valid");
}

#[test]
fn unsupported_redirect_code() {
    let mut policy = mk_policy("https://app.example.com", &[]);
    policy.redirect = Some(PolicyRedirect {
        response_code: Some(418),
        ..Default::default()
    });
    assert_eq!(
        policy.validate(),
        Err(PolicyError::UnsupportedRedirectCode(418))
    );

    for code in [301, 302, 303, 307, 308] {
        let mut policy = mk_policy("https://app.example.com", &[]);
        policy.redirect = Some(PolicyRedirect {
            response_code: Some(code),
            ..Default::default()
        });
        policy.validate().unwrap_or_else(|e| panic!("{code}: {e}"));
    }
}

#[test]
fn conflicting_allowlists() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.allow_public_unauthenticated_access = true;
    policy.allowed_users = vec!["alice@example.com".to_string()];
    assert_eq!(policy.validate(), Err(PolicyError::ConflictingAllowlists));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.allow_any_authenticated_user = true;
    policy.allowed_domains = vec!["example.com".to_string()];
    assert_eq!(policy.validate(), Err(PolicyError::ConflictingAllowlists));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.allow_any_authenticated_user = true;
    policy.validate().expect("any-authenticated alone is valid");
}

#[test]
fn client_cert_must_be_complete() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.tls_client_cert = "Y2VydA==".to_string();
    assert_eq!(policy.validate(), Err(PolicyError::ClientCertIncomplete));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.tls_client_cert = "Y2VydA==".to_string();
    policy.tls_client_key = "a2V5".to_string();
    policy.validate().expect("cert and key together are valid");
    let cert = policy.client_certificate.expect("certificate is loaded");
    assert_eq!(cert.certificate, b"cert");
    assert_eq!(cert.private_key, b"key");
}

#[test]
fn custom_ca_decode_failure() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.tls_custom_ca = "!!! not base64 !!!".to_string();
    assert!(matches!(
        policy.validate(),
        Err(PolicyError::CustomCaDecodeFailure(_))
    ));
}

#[test]
fn custom_ca_file_is_normalized_inline() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ca.pem");
    std::fs::write(&path, b"pem bytes").expect("write ca");

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.tls_custom_ca_file = path.to_string_lossy().to_string();
    policy.validate().expect("readable ca file is valid");
    assert_eq!(policy.tls_custom_ca, STANDARD.encode(b"pem bytes"));

    // The file and inline forms now decode to identical bytes, and a second
    // validation reports the same result without further mutation.
    let before = policy.clone();
    policy.validate().expect("second validation");
    assert_eq!(policy, before);
}

#[test]
fn custom_ca_read_failure() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.tls_custom_ca_file = "/definitely/not/a/file.pem".to_string();
    assert!(matches!(
        policy.validate(),
        Err(PolicyError::CustomCaReadFailure { .. })
    ));
}

#[test]
fn rewrite_options_are_exclusive() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.prefix_rewrite = "/x".to_string();
    policy.regex_rewrite_pattern = "^/service/([^/]+)(/.*)$".to_string();
    assert_eq!(policy.validate(), Err(PolicyError::RegexRewriteConflict));
}

#[test]
fn regex_is_anchored_and_compiled() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.regex = "/api/.*".to_string();
    policy.validate().expect("valid regex");
    let regex = policy.compiled_regex().expect("compiled");
    assert_eq!(regex.as_str(), "^/api/.*$");
    assert!(regex.is_match("/api/users"));
    assert!(!regex.is_match("/apiary"));
    assert!(!regex.is_match("/v1/api/users"));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.regex = "(".to_string();
    assert!(matches!(
        policy.validate(),
        Err(PolicyError::InvalidRegex(_))
    ));
}

#[test]
fn jwt_issuer_format_is_checked() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.jwt_issuer_format = JwtIssuerFormat("uri".to_string());
    policy.validate().expect("uri is valid");

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.jwt_issuer_format = JwtIssuerFormat("hostOnly".to_string());
    assert_eq!(
        policy.validate(),
        Err(PolicyError::InvalidJwtIssuerFormat("hostOnly".to_string()))
    );
}

#[test]
fn depends_on_limits_and_normalization() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.depends_on = (0..6).map(|i| format!("dep{i}.example.com")).collect();
    assert_eq!(policy.validate(), Err(PolicyError::TooManyDependencies));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.depends_on = vec![
        "other.example.com".to_string(),
        "https://third.example.com/login".to_string(),
    ];
    policy.validate().expect("valid dependencies");
    assert_eq!(
        policy.depends_on,
        vec![
            "other.example.com".to_string(),
            "third.example.com".to_string()
        ]
    );

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.depends_on = vec!["bad/dep".to_string()];
    assert_eq!(
        policy.validate(),
        Err(PolicyError::InvalidDependency("bad/dep".to_string()))
    );
}

#[test]
fn mcp_requires_exactly_one_of_server_or_client() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.mcp = Some(Mcp::default());
    assert_eq!(policy.validate(), Err(PolicyError::McpUnderspecified));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.mcp = Some(Mcp {
        server: Some(McpServer::default()),
        client: Some(McpClient {}),
    });
    assert_eq!(policy.validate(), Err(PolicyError::McpUnderspecified));

    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.mcp = Some(Mcp {
        server: Some(McpServer::default()),
        client: None,
    });
    policy.validate().expect("server-only mcp is valid");
    assert!(policy.is_mcp_server());
    assert_eq!(
        policy.mcp.as_ref().unwrap().server.as_ref().unwrap().path(),
        "/"
    );
}

#[test]
fn validation_is_idempotent() {
    let mut policy = mk_policy(
        "https://app.example.com",
        &["https://backend:8080,3", "https://fallback:8080"],
    );
    policy.regex = "/api/.*".to_string();
    policy.depends_on = vec!["https://dep.example.com".to_string()];
    policy.validate().expect("first validation");
    let once = policy.clone();
    policy.validate().expect("second validation");
    assert_eq!(policy, once);
}

#[test]
fn lb_weights_are_installed_on_destinations() {
    let mut policy = mk_policy("https://app.example.com", &["https://a", "https://b"]);
    policy.lb_weights = vec![2, 3];
    policy.validate().expect("valid");
    assert_eq!(policy.to[0].lb_weight, 2);
    assert_eq!(policy.to[1].lb_weight, 3);
    assert!(policy.lb_weights.is_empty());
}

#[test]
fn weighted_destination_syntax() {
    let to = WeightedUrl::parse_str("https://backend:8080,10");
    assert_eq!(to.url, "https://backend:8080");
    assert_eq!(to.lb_weight, 10);

    let to = WeightedUrl::parse_str("https://backend:8080");
    assert_eq!(to.url, "https://backend:8080");
    assert_eq!(to.lb_weight, 0);
    assert_eq!(to.to_string(), "https://backend:8080");
}

#[test]
fn user_supplied_id_is_used_verbatim() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.id = "route-1".to_string();
    assert_eq!(policy.route_id().unwrap(), "route-1");
}

#[test]
fn route_id_is_stable_across_unrelated_fields() {
    let mut p = mk_policy("https://app.example.com", &["https://backend:8080"]);
    let mut q = p.clone();
    q.description = "a description".to_string();
    q.set_request_headers = btreemap! {
        "x-custom".to_string() => "1".to_string(),
    };
    q.allowed_users = vec!["alice@example.com".to_string()];
    p.validate().expect("p valid");
    q.validate().expect("q valid");
    assert_eq!(p.route_id().unwrap(), q.route_id().unwrap());
}

#[test]
fn route_id_changes_with_identity_fields() {
    let base = mk_policy("https://app.example.com", &["https://backend:8080"]);
    let base_id = base.route_id().unwrap();

    let mut other = base.clone();
    other.prefix = "/api".to_string();
    assert_ne!(other.route_id().unwrap(), base_id);

    let mut other = base.clone();
    other.to[0].lb_weight = 7;
    assert_ne!(other.route_id().unwrap(), base_id);

    let mut other = base.clone();
    other.to = vec![];
    other.redirect = Some(PolicyRedirect {
        host_redirect: Some("backend".to_string()),
        ..Default::default()
    });
    assert_ne!(other.route_id().unwrap(), base_id);
}

#[test]
fn route_id_distinguishes_redirect_presence_from_defaults() {
    let mut with_false = mk_policy("https://app.example.com", &[]);
    with_false.redirect = Some(PolicyRedirect {
        https_redirect: Some(false),
        ..Default::default()
    });
    let mut unset = mk_policy("https://app.example.com", &[]);
    unset.redirect = Some(PolicyRedirect::default());
    assert_ne!(
        with_false.route_id().unwrap(),
        unset.route_id().unwrap()
    );
}

#[test]
fn matches_request_urls() {
    let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
    policy.prefix = "/api".to_string();
    policy.validate().expect("valid");

    let url = Url::parse("https://app.example.com/api/users").unwrap();
    assert!(policy.matches(&url, false));

    let url = Url::parse("https://app.example.com/other").unwrap();
    assert!(!policy.matches(&url, false));

    let url = Url::parse("https://other.example.com/api/users").unwrap();
    assert!(!policy.matches(&url, false));

    let url = Url::parse("https://app.example.com:8443/api/users").unwrap();
    assert!(!policy.matches(&url, false));
    assert!(policy.matches(&url, true));
}

#[test]
fn display_names_source_and_destinations() {
    let policy = mk_policy("https://app.example.com", &["https://a", "https://b"]);
    assert_eq!(
        policy.to_string(),
        "https://app.example.com -> https://a,https://b"
    );
}

mod ordering {
    use super::*;

    fn mk(from: &str, path: &str, prefix: &str, regex: &str, order: Option<i64>) -> Policy {
        Policy {
            id: format!("{from}|{path}|{prefix}|{regex}|{order:?}"),
            from: from.to_string(),
            path: path.to_string(),
            prefix: prefix.to_string(),
            regex: regex.to_string(),
            regex_priority_order: order,
            ..Default::default()
        }
    }

    #[test]
    fn more_specific_routes_sort_first() {
        let mut policies = vec![
            mk("https://b.example.com", "", "", "", None),
            mk("https://a.example.com", "", "", "", None),
            mk("https://a.example.com", "/long/path", "", "", None),
            mk("https://a.example.com", "", "/prefix", "", None),
            mk("https://a.example.com", "", "", "/re/.*", Some(2)),
            mk("https://a.example.com", "", "", "/re/.*", None),
        ];
        sort_policies(&mut policies);

        let order = policies
            .iter()
            .map(|p| {
                (
                    p.from.clone(),
                    p.path.clone(),
                    p.regex_priority_order,
                    p.regex.clone(),
                    p.prefix.clone(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                (
                    "https://a.example.com".into(),
                    "/long/path".into(),
                    None,
                    "".into(),
                    "".into()
                ),
                (
                    "https://a.example.com".into(),
                    "".into(),
                    Some(2),
                    "/re/.*".into(),
                    "".into()
                ),
                (
                    "https://a.example.com".into(),
                    "".into(),
                    None,
                    "/re/.*".into(),
                    "".into()
                ),
                (
                    "https://a.example.com".into(),
                    "".into(),
                    None,
                    "".into(),
                    "/prefix".into()
                ),
                (
                    "https://a.example.com".into(),
                    "".into(),
                    None,
                    "".into(),
                    "".into()
                ),
                (
                    "https://b.example.com".into(),
                    "".into(),
                    None,
                    "".into(),
                    "".into()
                ),
            ]
        );
    }

    #[test]
    fn comparator_is_a_total_order() {
        let policies = vec![
            mk("https://a.example.com", "", "", "", None),
            mk("https://a.example.com", "/p", "", "", None),
            mk("https://a.example.com", "/p", "/q", "", Some(1)),
            mk("https://b.example.com", "", "", "/r", None),
            mk("https://b.example.com", "", "", "/r", Some(3)),
        ];

        for a in &policies {
            assert_eq!(a.compare(a), Ordering::Equal);
            for b in &policies {
                assert_eq!(a.compare(b), b.compare(a).reverse());
                for c in &policies {
                    if a.compare(b) == Ordering::Less && b.compare(c) == Ordering::Less {
                        assert_eq!(a.compare(c), Ordering::Less);
                    }
                }
            }
        }
    }

    #[test]
    fn sorting_twice_is_a_no_op() {
        let mut policies = vec![
            mk("https://b.example.com", "", "", "", None),
            mk("https://a.example.com", "/p", "", "", Some(1)),
            mk("https://a.example.com", "/p", "", "", None),
            mk("https://a.example.com", "", "/q", "", None),
        ];
        sort_policies(&mut policies);
        let once = policies.clone();
        sort_policies(&mut policies);
        assert_eq!(policies, once);
    }
}

mod round_trip {
    use super::*;
    use std::time::Duration;

    fn rich_policy() -> Policy {
        let mut policy = mk_policy(
            "https://app.example.com",
            &["https://backend:8080,2", "https://fallback:8080,1"],
        );
        policy.name = "app".to_string();
        policy.description = "the app".to_string();
        policy.prefix = "/api".to_string();
        policy.regex_priority_order = Some(3);
        policy.allowed_users = vec!["alice@example.com".to_string()];
        policy.allowed_domains = vec!["example.com".to_string()];
        policy.allowed_idp_claims = btreemap! {
            "groups".to_string() => vec!["eng".to_string(), "ops".to_string()],
        };
        policy.upstream_timeout = Some(Duration::from_secs(10));
        policy.idle_timeout = Some(Duration::ZERO);
        policy.allow_websockets = true;
        policy.set_request_headers = btreemap! {
            "x-custom".to_string() => "1".to_string(),
        };
        policy.remove_request_headers = vec!["x-scrub".to_string()];
        policy.rewrite_response_headers = vec![RewriteHeader {
            header: "Location".to_string(),
            prefix: "http://".to_string(),
            value: "https://".to_string(),
        }];
        policy.pass_identity_headers = Some(true);
        policy.idp_access_token_allowed_audiences = Some(vec!["aud1".to_string()]);
        policy.sub_policies = vec![SubPolicy {
            id: "sub-1".to_string(),
            name: "engineers".to_string(),
            allowed_users: vec!["bob@example.com".to_string()],
            match_expr: Some(serde_json::json!({"email": {"ends_with": "@example.com"}})),
            explanation: "engineers only".to_string(),
            remediation: "ask your manager".to_string(),
            ..Default::default()
        }];
        policy.depends_on = vec!["dep.example.com".to_string()];
        policy
    }

    #[test]
    fn wire_round_trip_preserves_observable_fields() {
        let policy = rich_policy();
        let restored = Policy::from_proto(policy.to_proto());
        assert_eq!(restored, policy);
        assert_eq!(restored.route_id().unwrap(), policy.route_id().unwrap());
    }

    #[test]
    fn unset_timeout_round_trips_to_unset() {
        let mut policy = mk_policy("https://app.example.com", &["https://backend"]);
        policy.upstream_timeout = None;
        policy.idle_timeout = None;
        let pb = policy.to_proto();
        assert!(pb.timeout.is_none());
        assert!(pb.idle_timeout.is_none());
        let restored = Policy::from_proto(pb);
        assert_eq!(restored.upstream_timeout, None);
        assert_eq!(restored.idle_timeout, None);

        // Zero is distinct from unset.
        policy.idle_timeout = Some(Duration::ZERO);
        let restored = Policy::from_proto(policy.to_proto());
        assert_eq!(restored.idle_timeout, Some(Duration::ZERO));
    }

    #[test]
    fn redirect_round_trip() {
        let mut policy = mk_policy("https://app.example.com", &[]);
        policy.redirect = Some(PolicyRedirect {
            https_redirect: Some(true),
            host_redirect: Some("other.example.com".to_string()),
            response_code: Some(301),
            strip_query: Some(false),
            ..Default::default()
        });
        let restored = Policy::from_proto(policy.to_proto());
        assert_eq!(restored, policy);
        assert_eq!(restored.route_id().unwrap(), policy.route_id().unwrap());
    }

    #[test]
    fn malformed_wire_match_expression_is_rejected_not_ignored() {
        let pb = crate::proto::Route {
            from: "https://app.example.com".to_string(),
            to: vec!["https://backend:8080".to_string()],
            policies: vec![crate::proto::SubPolicy {
                name: "broken".to_string(),
                match_expression: Some("{not json".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut policy = Policy::from_proto(pb);
        assert_eq!(policy.sub_policies[0].match_expr, None);
        assert_eq!(
            policy.sub_policies[0].invalid_match_expr.as_deref(),
            Some("{not json")
        );
        assert_eq!(
            policy.validate(),
            Err(PolicyError::InvalidMatchExpression("broken".to_string()))
        );

        // The raw expression still round-trips verbatim.
        let pb = policy.to_proto();
        assert_eq!(
            pb.policies[0].match_expression.as_deref(),
            Some("{not json")
        );
    }

    #[test]
    fn binary_round_trip() {
        use prost::Message;

        let policy = rich_policy();
        let bytes = policy.to_proto().encode_to_vec();
        let pb = crate::proto::Route::decode(&bytes[..]).expect("decodes");
        let restored = Policy::from_proto(pb);
        assert_eq!(restored, policy);
    }
}
