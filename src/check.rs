//! Translation of logical checks into catalog check registrations

use crate::catalog::CheckRegistration;
use crate::error::{SyncError, SyncResult};
use crate::types::{CheckKind, LogicalCheck};
use std::time::Duration;
use url::Url;

/// Render a duration in the catalog's duration-string format
pub(crate) fn duration_string(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

/// Build a catalog check registration for a logical check.
///
/// Script checks carry only a TTL; the caller runs the script and reports
/// results through the TTL endpoint.
pub fn build_check_registration(
    service_id: &str,
    check_id: &str,
    check: &LogicalCheck,
    host: &str,
    port: u16,
    ttl_buffer: Duration,
) -> SyncResult<CheckRegistration> {
    let mut reg = CheckRegistration {
        id: check_id.to_string(),
        name: check.name.clone(),
        service_id: service_id.to_string(),
        status: check.initial_status.clone(),
        timeout: duration_string(check.timeout),
        interval: Some(duration_string(check.interval)),
        ..Default::default()
    };

    if port == 0 && check.kind.requires_port() {
        return Err(SyncError::Validation(format!(
            "{} checks require an address",
            check.kind.as_str()
        )));
    }

    match check.kind {
        CheckKind::Http => {
            let scheme = if check.protocol.is_empty() {
                "http"
            } else {
                check.protocol.as_str()
            };
            let base = Url::parse(&format!("{}://{}:{}", scheme, host, port))?;
            let target = base.join(&check.path)?;
            reg.http = Some(target.to_string());
            reg.method = check.method.clone();
            reg.header = check.headers.clone();
            reg.tls_skip_verify = check.tls_skip_verify;
        }

        CheckKind::Tcp => {
            reg.tcp = Some(format!("{}:{}", host, port));
        }

        CheckKind::Script => {
            // Setting both TTL and interval is rejected by the catalog
            reg.ttl = Some(duration_string(check.interval + ttl_buffer));
            reg.interval = None;
        }

        CheckKind::Grpc => {
            reg.grpc = Some(format!("{}:{}/{}", host, port, check.grpc_service));
            reg.grpc_use_tls = check.grpc_use_tls;
            reg.tls_skip_verify = check.tls_skip_verify;
        }
    }

    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn check(kind: CheckKind) -> LogicalCheck {
        LogicalCheck {
            name: "probe".to_string(),
            kind,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[test]
    fn http_check_builds_url() {
        let mut c = check(CheckKind::Http);
        c.path = "/healthz".to_string();
        c.method = "GET".to_string();

        let reg =
            build_check_registration("svc1", "chk1", &c, "10.0.0.1", 8080, Duration::from_secs(1))
                .unwrap();
        assert_eq!(reg.http.as_deref(), Some("http://10.0.0.1:8080/healthz"));
        assert_eq!(reg.method, "GET");
        assert_eq!(reg.interval.as_deref(), Some("10s"));
        assert_eq!(reg.timeout, "2s");
        assert!(reg.ttl.is_none());
    }

    #[test]
    fn http_check_honors_protocol_and_tls() {
        let mut c = check(CheckKind::Http);
        c.path = "/status".to_string();
        c.protocol = "https".to_string();
        c.tls_skip_verify = true;
        c.headers = HashMap::from([(
            "Authorization".to_string(),
            vec!["Bearer token".to_string()],
        )]);

        let reg =
            build_check_registration("svc1", "chk1", &c, "10.0.0.1", 8443, Duration::from_secs(1))
                .unwrap();
        assert_eq!(reg.http.as_deref(), Some("https://10.0.0.1:8443/status"));
        assert!(reg.tls_skip_verify);
        assert_eq!(reg.header.len(), 1);
    }

    #[test]
    fn http_relative_path_resolves_against_base() {
        let mut c = check(CheckKind::Http);
        c.path = "healthz".to_string();

        let reg =
            build_check_registration("svc1", "chk1", &c, "10.0.0.1", 8080, Duration::from_secs(1))
                .unwrap();
        assert_eq!(reg.http.as_deref(), Some("http://10.0.0.1:8080/healthz"));
    }

    #[test]
    fn tcp_check_joins_host_port() {
        let reg = build_check_registration(
            "svc1",
            "chk1",
            &check(CheckKind::Tcp),
            "10.0.0.1",
            6379,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(reg.tcp.as_deref(), Some("10.0.0.1:6379"));
    }

    #[test]
    fn script_check_gets_ttl_and_no_interval() {
        let reg = build_check_registration(
            "svc1",
            "chk1",
            &check(CheckKind::Script),
            "",
            0,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(reg.ttl.as_deref(), Some("11s"));
        assert!(reg.interval.is_none());
    }

    #[test]
    fn grpc_check_includes_service_and_tls() {
        let mut c = check(CheckKind::Grpc);
        c.grpc_service = "health.v1.Health".to_string();
        c.grpc_use_tls = true;

        let reg =
            build_check_registration("svc1", "chk1", &c, "10.0.0.1", 9090, Duration::from_secs(1))
                .unwrap();
        assert_eq!(reg.grpc.as_deref(), Some("10.0.0.1:9090/health.v1.Health"));
        assert!(reg.grpc_use_tls);
    }

    #[test]
    fn port_required_for_network_checks() {
        for kind in [CheckKind::Http, CheckKind::Tcp, CheckKind::Grpc] {
            let err = build_check_registration(
                "svc1",
                "chk1",
                &check(kind),
                "10.0.0.1",
                0,
                Duration::from_secs(1),
            )
            .unwrap_err();
            assert!(matches!(err, SyncError::Validation(_)));
        }
    }
}
